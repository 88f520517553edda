use crate::options::SubscribeCallbacks;
use crate::packet::SubAckOutcome;
use crate::types::QoS;
use crate::validation::topic_matches_filter;
use std::collections::{HashMap, HashSet, VecDeque};

pub(crate) struct SharedSubscription {
    refcount: usize,
    requested_qos: QoS,
    granted_qos: Option<QoS>,
    waiting: Vec<SubscribeCallbacks>,
}

impl SharedSubscription {
    pub fn refcount(&self) -> usize {
        self.refcount
    }

    pub fn granted_qos(&self) -> Option<QoS> {
        self.granted_qos
    }
}

/// What a shared SUBACK settled.
#[derive(Default)]
pub(crate) struct SubAckResolution {
    pub waiting: Vec<SubscribeCallbacks>,
    /// Set when a denial dropped the registration; true if it had been granted before.
    pub dropped: Option<bool>,
}

/// Shared-connection subscriptions keyed by topic filter, reference counted so
/// that one transport item serves every subscriber of the same filter.
pub(crate) struct SharedSubscriptionRegistry {
    subscriptions: HashMap<String, SharedSubscription>,
    seen: VecDeque<u64>,
    seen_set: HashSet<u64>,
    dedup_window: usize,
}

impl SharedSubscriptionRegistry {
    pub fn new(dedup_window: usize) -> Self {
        Self {
            subscriptions: HashMap::new(),
            seen: VecDeque::new(),
            seen_set: HashSet::new(),
            dedup_window: dedup_window.max(1),
        }
    }

    /// Whether subscribing to `topic_filter` at `qos` has to (re)open the transport item.
    pub fn needs_request(&self, topic_filter: &str, qos: QoS) -> bool {
        self.subscriptions
            .get(topic_filter)
            .map_or(true, |sub| sub.requested_qos != qos)
    }

    /// Adds a subscriber. Returns its callbacks with the granted `QoS` when the
    /// filter is already granted at the requested `QoS` and they can fire now.
    pub fn register(
        &mut self,
        topic_filter: &str,
        qos: QoS,
        callbacks: SubscribeCallbacks,
    ) -> Option<(QoS, SubscribeCallbacks)> {
        let sub = self
            .subscriptions
            .entry(topic_filter.to_string())
            .or_insert_with(|| SharedSubscription {
                refcount: 0,
                requested_qos: qos,
                granted_qos: None,
                waiting: Vec::new(),
            });
        sub.refcount += 1;

        if sub.requested_qos == qos {
            if let Some(granted) = sub.granted_qos {
                if sub.waiting.is_empty() {
                    return Some((granted, callbacks));
                }
            }
        } else {
            sub.requested_qos = qos;
        }
        sub.waiting.push(callbacks);
        None
    }

    /// Applies the SUBACK of a shared item and hands back the callbacks waiting for it.
    ///
    /// A denial only costs the waiting subscribers. Subscribers granted earlier keep
    /// the item at their grant; the registration is dropped once none remain.
    pub fn handle_suback(
        &mut self,
        topic_filter: &str,
        outcome: SubAckOutcome,
    ) -> SubAckResolution {
        let Some(sub) = self.subscriptions.get_mut(topic_filter) else {
            return SubAckResolution::default();
        };
        let waiting = std::mem::take(&mut sub.waiting);
        match outcome {
            SubAckOutcome::Granted(granted) => {
                sub.granted_qos = Some(granted);
                SubAckResolution {
                    waiting,
                    dropped: None,
                }
            }
            SubAckOutcome::Failure(_) | SubAckOutcome::NotAuthorized(_) => {
                sub.refcount = sub.refcount.saturating_sub(waiting.len());
                let had_grant = sub.granted_qos.is_some();
                if let (Some(granted), true) = (sub.granted_qos, sub.refcount > 0) {
                    sub.requested_qos = granted;
                    return SubAckResolution {
                        waiting,
                        dropped: None,
                    };
                }
                self.subscriptions.remove(topic_filter);
                SubAckResolution {
                    waiting,
                    dropped: Some(had_grant),
                }
            }
        }
    }

    pub fn get(&self, topic_filter: &str) -> Option<&SharedSubscription> {
        self.subscriptions.get(topic_filter)
    }

    /// Drops one subscriber. Returns the remaining count, or `None` if the filter
    /// was not registered.
    pub fn release(&mut self, topic_filter: &str) -> Option<usize> {
        let sub = self.subscriptions.get_mut(topic_filter)?;
        sub.refcount = sub.refcount.saturating_sub(1);
        let remaining = sub.refcount;
        if remaining == 0 {
            self.subscriptions.remove(topic_filter);
        }
        Some(remaining)
    }

    /// Highest granted `QoS` among registrations whose filter matches `topic`.
    /// A registration still waiting for its SUBACK counts at its requested `QoS`.
    pub fn max_granted_for(&self, topic: &str) -> Option<QoS> {
        self.subscriptions
            .iter()
            .filter(|(filter, _)| topic_matches_filter(topic, filter))
            .map(|(_, sub)| sub.granted_qos.unwrap_or(sub.requested_qos))
            .max()
    }

    /// Records a shared publish sequence number; false when it was already seen.
    pub fn first_sighting(&mut self, seq: u64) -> bool {
        if !self.seen_set.insert(seq) {
            return false;
        }
        self.seen.push_back(seq);
        while self.seen.len() > self.dedup_window {
            if let Some(evicted) = self.seen.pop_front() {
                self.seen_set.remove(&evicted);
            }
        }
        true
    }

    /// Forgets every sequence number seen so far.
    pub fn reset_dedup(&mut self) {
        self.seen.clear();
        self.seen_set.clear();
    }

    pub fn requests(&self) -> Vec<(String, QoS)> {
        self.subscriptions
            .iter()
            .map(|(filter, sub)| (filter.clone(), sub.requested_qos))
            .collect()
    }

    /// Drops callbacks still waiting for a SUBACK; registrations stay.
    pub fn abandon_waiting(&mut self) -> usize {
        self.subscriptions
            .values_mut()
            .map(|sub| std::mem::take(&mut sub.waiting).len())
            .sum()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }
}
