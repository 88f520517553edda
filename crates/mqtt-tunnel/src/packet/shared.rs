//! Positional item updates of shared connections.
//!
//! Field 1 carries the SUBACK return code of the shared subscription item,
//! fields 2 to 7 carry a PUBLISH: sequence number, destination name, base64
//! payload, `QoS`, duplicate flag and retained flag (`'0'` or `'1'`).

use crate::error::{MqttError, Result};
use crate::types::{Message, QoS};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

const FIELD_COUNT: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedPublish {
    pub seq: u64,
    pub message: Message,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedItemUpdate {
    pub suback_return_code: Option<i32>,
    pub publish: Option<SharedPublish>,
}

impl SharedItemUpdate {
    /// Decodes the 1-based positional fields of an item update (index 0 is field 1).
    ///
    /// # Errors
    /// Returns `MalformedPacket` when a present field cannot be parsed or the
    /// PUBLISH fields are incomplete.
    pub fn from_fields(fields: &[Option<&str>]) -> Result<Self> {
        if fields.len() > FIELD_COUNT {
            return Err(MqttError::MalformedPacket(format!(
                "shared item update has {} fields, expected at most {FIELD_COUNT}",
                fields.len()
            )));
        }
        let field = |n: usize| fields.get(n - 1).copied().flatten();

        let suback_return_code = field(1)
            .map(|code| parse_number::<i32>(code, "return code"))
            .transpose()?;

        let publish = match field(2) {
            None => None,
            Some(seq) => {
                let missing =
                    |name: &str| MqttError::MalformedPacket(format!("shared PUBLISH without {name}"));
                let seq = parse_number::<u64>(seq, "sequence")?;
                let destination = field(3).ok_or_else(|| missing("destination name"))?;
                let payload = STANDARD
                    .decode(field(4).unwrap_or_default())
                    .map_err(|e| MqttError::MalformedPacket(format!("Invalid payload encoding: {e}")))?;
                let qos = QoS::try_from(parse_number::<u8>(
                    field(5).ok_or_else(|| missing("qos"))?,
                    "qos",
                )?)?;
                let message = Message::new(destination, payload)?
                    .with_qos(qos)
                    .with_duplicate(parse_flag(field(6))?)
                    .with_retained(parse_flag(field(7))?);
                Some(SharedPublish { seq, message })
            }
        };

        Ok(Self {
            suback_return_code,
            publish,
        })
    }

    /// Renders the update back to positional fields, mostly for transport fakes.
    #[must_use]
    pub fn to_fields(&self) -> Vec<Option<String>> {
        let mut fields = vec![self.suback_return_code.map(|code| code.to_string())];
        if let Some(publish) = &self.publish {
            let flag = |set: bool| Some(if set { "1" } else { "0" }.to_string());
            fields.extend([
                Some(publish.seq.to_string()),
                Some(publish.message.destination_name.clone()),
                Some(STANDARD.encode(&publish.message.payload)),
                Some(publish.message.qos.as_u8().to_string()),
                flag(publish.message.duplicate),
                flag(publish.message.retained),
            ]);
        }
        fields
    }
}

fn parse_number<T: std::str::FromStr>(text: &str, name: &str) -> Result<T> {
    text.trim()
        .parse()
        .map_err(|_| MqttError::MalformedPacket(format!("Invalid {name} field: {text}")))
}

fn parse_flag(field: Option<&str>) -> Result<bool> {
    match field {
        None | Some("0") => Ok(false),
        Some("1") => Ok(true),
        Some(other) => Err(MqttError::MalformedPacket(format!(
            "Invalid flag field: {other}"
        ))),
    }
}
