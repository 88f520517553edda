//! Per-operation options. Each struct is built once and consumed by the
//! operation it configures.

use crate::client::callbacks::{
    ConnectFailure, FailureCallback, SubscribeCallback, SubscribeFailure, SuccessCallback,
    UnsubscribeFailure,
};
use crate::error::{MqttError, Result};
use crate::packet::SubAckOutcome;
use crate::types::QoS;
use std::fmt;

pub struct ConnectOptions {
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub(crate) on_success: Option<SuccessCallback>,
    pub(crate) on_failure: Option<FailureCallback<ConnectFailure>>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            clean_session: true,
            username: None,
            password: None,
            on_success: None,
            on_failure: None,
        }
    }
}

impl ConnectOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    #[must_use]
    pub fn on_success(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_failure(mut self, callback: impl FnOnce(ConnectFailure) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(callback));
        self
    }

    /// # Errors
    /// Returns `InvalidArgument` for an empty user name or a password without one.
    pub fn validate(&self) -> Result<()> {
        match (&self.username, &self.password) {
            (Some(username), _) if username.is_empty() => {
                Err(MqttError::invalid_argument("username", username))
            }
            (None, Some(_)) => Err(MqttError::invalid_argument("password", "<without username>")),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("clean_session", &self.clean_session)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct SubscribeOptions {
    pub qos: QoS,
    pub(crate) on_success: Option<SubscribeCallback>,
    pub(crate) on_failure: Option<FailureCallback<SubscribeFailure>>,
    pub(crate) on_authorization_failure: Option<FailureCallback<SubscribeFailure>>,
}

impl SubscribeOptions {
    #[must_use]
    pub fn new(qos: QoS) -> Self {
        Self {
            qos,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn on_success(mut self, callback: impl FnOnce(QoS) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_failure(mut self, callback: impl FnOnce(SubscribeFailure) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(callback));
        self
    }

    /// Receives denials from the broker's authorization hook instead of `on_failure`.
    #[must_use]
    pub fn on_authorization_failure(
        mut self,
        callback: impl FnOnce(SubscribeFailure) + Send + 'static,
    ) -> Self {
        self.on_authorization_failure = Some(Box::new(callback));
        self
    }

    pub(crate) fn into_callbacks(self) -> SubscribeCallbacks {
        SubscribeCallbacks {
            on_success: self.on_success,
            on_failure: self.on_failure,
            on_authorization_failure: self.on_authorization_failure,
        }
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

/// Callbacks of one subscribe call, held until its SUBACK.
#[derive(Default)]
pub(crate) struct SubscribeCallbacks {
    on_success: Option<SubscribeCallback>,
    on_failure: Option<FailureCallback<SubscribeFailure>>,
    on_authorization_failure: Option<FailureCallback<SubscribeFailure>>,
}

impl SubscribeCallbacks {
    pub(crate) fn succeed(self, granted: QoS) {
        if let Some(callback) = self.on_success {
            callback(granted);
        }
    }

    pub(crate) fn complete(self, outcome: SubAckOutcome) {
        match outcome {
            SubAckOutcome::Granted(granted) => self.succeed(granted),
            SubAckOutcome::Failure(return_code) => {
                self.fail(SubscribeFailure::Refused { return_code });
            }
            SubAckOutcome::NotAuthorized(return_code) => {
                self.fail(SubscribeFailure::NotAuthorized { return_code });
            }
        }
    }

    pub(crate) fn fail(self, failure: SubscribeFailure) {
        let callback = match failure {
            SubscribeFailure::NotAuthorized { .. } => {
                self.on_authorization_failure.or(self.on_failure)
            }
            _ => self.on_failure,
        };
        if let Some(callback) = callback {
            callback(failure);
        }
    }
}

#[derive(Default)]
pub struct UnsubscribeOptions {
    pub(crate) on_success: Option<SuccessCallback>,
    pub(crate) on_failure: Option<FailureCallback<UnsubscribeFailure>>,
}

impl UnsubscribeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_success(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_failure(mut self, callback: impl FnOnce(UnsubscribeFailure) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(callback));
        self
    }

    pub(crate) fn succeed(self) {
        if let Some(callback) = self.on_success {
            callback();
        }
    }

    pub(crate) fn fail(self, failure: UnsubscribeFailure) {
        if let Some(callback) = self.on_failure {
            callback(failure);
        }
    }
}

impl fmt::Debug for UnsubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsubscribeOptions")
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}
