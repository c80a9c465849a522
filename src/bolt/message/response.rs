//! Bolt protocol response messages.
//!
//! Response messages are sent from the server to the client.

use std::fmt;

use super::tag;
use crate::bolt::error::BoltError;
use crate::bolt::packstream::{Structure, Value, ValueMap};

/// All Bolt response messages.
#[derive(Debug, Clone, PartialEq)]
pub enum BoltResponse {
    /// SUCCESS with its metadata map
    Success(ValueMap),
    /// RECORD with one row of values
    Record(Vec<Value>),
    /// IGNORED: request arrived while the connection was FAILED
    Ignored,
    /// FAILURE with the server's status code and message
    Failure { code: String, message: String },
}

impl BoltResponse {
    /// Get the message tag.
    pub fn tag(&self) -> u8 {
        match self {
            BoltResponse::Success(_) => tag::SUCCESS,
            BoltResponse::Record(_) => tag::RECORD,
            BoltResponse::Ignored => tag::IGNORED,
            BoltResponse::Failure { .. } => tag::FAILURE,
        }
    }

    /// Get message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            BoltResponse::Success(_) => "SUCCESS",
            BoltResponse::Record(_) => "RECORD",
            BoltResponse::Ignored => "IGNORED",
            BoltResponse::Failure { .. } => "FAILURE",
        }
    }

    /// Parse a decoded structure, checking the tag and field count.
    pub fn from_structure(mut s: Structure) -> Result<Self, BoltError> {
        match s.tag {
            tag::SUCCESS => {
                expect_fields(&s, "SUCCESS", 1)?;
                match s.take_field(0) {
                    Some(Value::Map(metadata)) => Ok(BoltResponse::Success(metadata)),
                    _ => Err(BoltError::protocol("SUCCESS metadata must be a map")),
                }
            }
            tag::RECORD => {
                expect_fields(&s, "RECORD", 1)?;
                match s.take_field(0) {
                    Some(Value::List(values)) => Ok(BoltResponse::Record(values)),
                    _ => Err(BoltError::protocol("RECORD data must be a list")),
                }
            }
            // Some servers attach an empty map to IGNORED.
            tag::IGNORED if s.fields.len() <= 1 => Ok(BoltResponse::Ignored),
            tag::IGNORED => Err(BoltError::protocol(format!(
                "IGNORED expects at most 1 field, got {}",
                s.fields.len()
            ))),
            tag::FAILURE => {
                expect_fields(&s, "FAILURE", 1)?;
                let metadata = s
                    .take_field(0)
                    .and_then(Value::into_map)
                    .ok_or_else(|| BoltError::protocol("FAILURE metadata must be a map"))?;
                let text = |key: &str| {
                    metadata
                        .get(key)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                Ok(BoltResponse::Failure {
                    code: text("code"),
                    message: text("message"),
                })
            }
            other => Err(BoltError::protocol(format!(
                "Unexpected message tag from server: 0x{:02X}",
                other
            ))),
        }
    }

    /// Structure form, used when playing the server side.
    pub fn to_structure(&self) -> Structure {
        let fields = match self {
            BoltResponse::Success(metadata) => vec![Value::Map(metadata.clone())],
            BoltResponse::Record(values) => vec![Value::List(values.clone())],
            BoltResponse::Ignored => Vec::new(),
            BoltResponse::Failure { code, message } => {
                let mut map = ValueMap::new();
                map.insert("code".into(), Value::from(code.as_str()));
                map.insert("message".into(), Value::from(message.as_str()));
                vec![Value::Map(map)]
            }
        };
        Structure::new(self.tag(), fields)
    }
}

impl fmt::Display for BoltResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoltResponse::Success(metadata) => write!(f, "SUCCESS {}", Value::Map(metadata.clone())),
            BoltResponse::Record(values) => write!(f, "RECORD {}", Value::List(values.clone())),
            BoltResponse::Ignored => write!(f, "IGNORED"),
            BoltResponse::Failure { code, message } => {
                write!(f, "FAILURE {{code: {:?}, message: {:?}}}", code, message)
            }
        }
    }
}

fn expect_fields(s: &Structure, name: &str, count: usize) -> Result<(), BoltError> {
    if s.fields.len() != count {
        return Err(BoltError::protocol(format!(
            "{} expects {} field(s), got {}",
            name,
            count,
            s.fields.len()
        )));
    }
    Ok(())
}
