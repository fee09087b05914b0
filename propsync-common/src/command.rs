//! JSON envelope exchanged with the broker.
//!
//! Inbound:
//!
//! ```text
//! {"method":"set","key":"<name>","value":<scalar>,"msg_id":<int>}
//! {"method":"get","key":"<name>","msg_id":<int>}
//! {"method":"update","<name1>":<value1>,"<name2>":<value2>,...}
//! {"method":"<other>", ...}
//! ```
//!
//! Outbound: `{"method":"update","msg_id":..,"key":..,"value":..}` and
//! `{"method":"report","<name>":<value>,...}`.

use alloc::{string::String, vec::Vec};
use core::fmt;

use compact_str::CompactString;
use serde::{
    Deserialize, Serialize,
    de::{MapAccess, Visitor},
    ser::SerializeMap,
};

use crate::{PropName, Value};

/// Correlation id echoed back in responses.
pub type MsgId = i64;

/// `msg_id` used when the inbound message carried none.
pub const NO_MSG_ID: MsgId = -1;

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(serde_json::Error),
    #[error("message has no method")]
    MissingMethod,
    #[error("{method} message has no string key")]
    MissingKey { method: &'static str },
    #[error("set message has no value")]
    MissingValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get {
        key: CompactString,
        msg_id: MsgId,
    },
    Set {
        key: CompactString,
        value: serde_json::Value,
        msg_id: MsgId,
    },
    /// Bulk set, in the order the fields appeared in the envelope
    Update {
        entries: Vec<(CompactString, serde_json::Value)>,
        msg_id: MsgId,
    },
    /// Anything else, forwarded verbatim to the collaborator
    Action(serde_json::Value),
}

impl Command {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let Envelope(fields) = serde_json::from_slice(payload).map_err(DecodeError::Json)?;
        Self::from_fields(fields)
    }

    fn from_fields(fields: Vec<(CompactString, serde_json::Value)>) -> Result<Self, DecodeError> {
        let field = |name: &str| fields.iter().find(|(k, _)| k == name).map(|(_, v)| v);

        let msg_id = field("msg_id").and_then(|v| v.as_i64()).unwrap_or(NO_MSG_ID);
        let method = field("method")
            .and_then(|v| v.as_str())
            .ok_or(DecodeError::MissingMethod)?;

        let key = |method: &'static str| {
            field("key")
                .and_then(|v| v.as_str())
                .map(CompactString::from)
                .ok_or(DecodeError::MissingKey { method })
        };

        match method {
            "get" => Ok(Command::Get { key: key("get")?, msg_id }),
            "set" => {
                let key = key("set")?;
                let value = field("value").cloned().ok_or(DecodeError::MissingValue)?;
                Ok(Command::Set { key, value, msg_id })
            }
            "update" => Ok(Command::Update {
                entries: fields
                    .iter()
                    .filter(|(k, _)| k != "method" && k != "msg_id")
                    .cloned()
                    .collect(),
                msg_id,
            }),
            _ => Ok(Command::Action(serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (String::from(k.as_str()), v.clone()))
                    .collect(),
            ))),
        }
    }

    pub fn method(&self) -> &str {
        match self {
            Command::Get { .. } => "get",
            Command::Set { .. } => "set",
            Command::Update { .. } => "update",
            Command::Action(payload) => {
                payload.get("method").and_then(|m| m.as_str()).unwrap_or_default()
            }
        }
    }
}

/// JSON object fields in document order.
struct Envelope(Vec<(CompactString, serde_json::Value)>);

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EnvelopeVisitor;

        impl<'de> Visitor<'de> for EnvelopeVisitor {
            type Value = Envelope;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a json object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Envelope, A::Error> {
                let mut fields = Vec::with_capacity(map.size_hint().unwrap_or(4));
                while let Some(entry) = map.next_entry()? {
                    fields.push(entry);
                }
                Ok(Envelope(fields))
            }
        }

        deserializer.deserialize_map(EnvelopeVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Outbound {
    /// Response to `get`, or echo after a successful `set`
    Update {
        msg_id: MsgId,
        key: PropName,
        value: Value,
    },
    /// Full state report
    Report(Report),
}

/// Name/value pairs of a full report, in registry order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    pub entries: Vec<(PropName, Value)>,
}

impl Report {
    pub fn push(&mut self, name: PropName, value: Value) {
        self.entries.push((name, value));
    }
}

impl Serialize for Report {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name.as_str(), value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decode_set() {
        let cmd = Command::decode(br#"{"method":"set","key":"voltage","value":42,"msg_id":7}"#)
            .unwrap();
        assert_eq!(cmd, Command::Set { key: "voltage".into(), value: json!(42), msg_id: 7 });
    }

    #[test]
    fn decode_get_without_msg_id() {
        let cmd = Command::decode(br#"{"method":"get","key":"battery"}"#).unwrap();
        assert_eq!(cmd, Command::Get { key: "battery".into(), msg_id: NO_MSG_ID });
    }

    #[test]
    fn decode_update_keeps_field_order() {
        let cmd =
            Command::decode(br#"{"method":"update","zeta":1,"alpha":"x","msg_id":3,"mid":2.5}"#)
                .unwrap();
        assert_eq!(cmd, Command::Update {
            entries: vec![
                ("zeta".into(), json!(1)),
                ("alpha".into(), json!("x")),
                ("mid".into(), json!(2.5)),
            ],
            msg_id: 3,
        });
    }

    #[test]
    fn unknown_method_is_action() {
        let cmd = Command::decode(br#"{"method":"tare","grams":500}"#).unwrap();
        assert_eq!(cmd, Command::Action(json!({"method": "tare", "grams": 500})));
        assert_eq!(cmd.method(), "tare");
    }

    #[test]
    fn malformed_envelopes() {
        assert!(matches!(Command::decode(b"not json"), Err(DecodeError::Json(_))));
        assert!(matches!(Command::decode(b"[1,2]"), Err(DecodeError::Json(_))));
        assert!(matches!(Command::decode(br#"{"key":"a"}"#), Err(DecodeError::MissingMethod)));
        assert!(matches!(
            Command::decode(br#"{"method":"get"}"#),
            Err(DecodeError::MissingKey { method: "get" })
        ));
        assert!(matches!(
            Command::decode(br#"{"method":"set","key":"a"}"#),
            Err(DecodeError::MissingValue)
        ));
    }

    #[test]
    fn update_response_shape() {
        let out = Outbound::Update {
            msg_id: 7,
            key: PropName::new("voltage").unwrap(),
            value: Value::Integer(42),
        };
        assert_eq!(
            serde_json::to_value(&out).unwrap(),
            json!({"method": "update", "msg_id": 7, "key": "voltage", "value": 42})
        );
    }

    #[test]
    fn report_shape() {
        let mut report = Report::default();
        report.push(PropName::new("device_type").unwrap(), Value::from("DZC01"));
        report.push(PropName::new("sleep_time").unwrap(), Value::Integer(7200));
        report.push(PropName::new("pressure").unwrap(), Value::Float(1.5));

        let text = serde_json::to_string(&Outbound::Report(report)).unwrap();
        assert_eq!(
            text,
            r#"{"method":"report","device_type":"DZC01","sleep_time":7200,"pressure":1.5}"#
        );
    }
}
