//! Bolt protocol request messages.
//!
//! Request messages are sent from the client to the server.

use std::fmt;

use super::tag;
use crate::bolt::packstream::{Structure, Value, ValueMap};

/// Access mode for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Read access
    Read,
    /// Write access
    #[default]
    Write,
}

impl AccessMode {
    /// Value of the `mode` entry; write mode is the server default and is omitted.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "r",
            AccessMode::Write => "w",
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, AccessMode::Read)
    }
}

/// Authentication token.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AuthToken {
    /// Authentication scheme ("basic", "none")
    pub scheme: String,
    /// User name
    pub principal: Option<String>,
    /// Password
    pub credentials: Option<String>,
}

impl AuthToken {
    /// Basic user/password authentication.
    pub fn basic(principal: &str, credentials: &str) -> Self {
        Self {
            scheme: "basic".to_string(),
            principal: Some(principal.to_string()),
            credentials: Some(credentials.to_string()),
        }
    }

    /// No authentication.
    pub fn none() -> Self {
        Self {
            scheme: "none".to_string(),
            principal: None,
            credentials: None,
        }
    }

    /// Map form shared by INIT and HELLO.
    pub fn to_map(&self) -> ValueMap {
        let mut map = ValueMap::new();
        map.insert("scheme".into(), Value::from(self.scheme.as_str()));
        if let Some(p) = &self.principal {
            map.insert("principal".into(), Value::from(p.as_str()));
        }
        if let Some(c) = &self.credentials {
            map.insert("credentials".into(), Value::from(c.as_str()));
        }
        map
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("scheme", &self.scheme)
            .field("principal", &self.principal)
            .field("credentials", &self.credentials.as_ref().map(|_| "*******"))
            .finish()
    }
}

/// All Bolt request messages, across versions 1 to 4.1.
#[derive(Debug, Clone, PartialEq)]
pub enum BoltRequest {
    /// INIT (v1-v2)
    Init { user_agent: String, auth: ValueMap },
    /// HELLO (v3+): user agent, auth and routing merged into one map
    Hello { extra: ValueMap },
    /// GOODBYE (v3+)
    Goodbye,
    /// RESET
    Reset,
    /// RUN; `extra` is absent before v3
    Run {
        query: String,
        parameters: ValueMap,
        extra: Option<ValueMap>,
    },
    /// BEGIN (v3+)
    Begin { extra: ValueMap },
    /// COMMIT (v3+)
    Commit,
    /// ROLLBACK (v3+)
    Rollback,
    /// DISCARD_ALL (v1-v3)
    DiscardAll,
    /// PULL_ALL (v1-v3)
    PullAll,
    /// DISCARD (v4+)
    Discard { n: i64, qid: Option<i64> },
    /// PULL (v4+)
    Pull { n: i64, qid: Option<i64> },
}

impl BoltRequest {
    /// Get the message tag.
    pub fn tag(&self) -> u8 {
        match self {
            BoltRequest::Init { .. } | BoltRequest::Hello { .. } => tag::HELLO,
            BoltRequest::Goodbye => tag::GOODBYE,
            BoltRequest::Reset => tag::RESET,
            BoltRequest::Run { .. } => tag::RUN,
            BoltRequest::Begin { .. } => tag::BEGIN,
            BoltRequest::Commit => tag::COMMIT,
            BoltRequest::Rollback => tag::ROLLBACK,
            BoltRequest::DiscardAll | BoltRequest::Discard { .. } => tag::DISCARD,
            BoltRequest::PullAll | BoltRequest::Pull { .. } => tag::PULL,
        }
    }

    /// Get message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            BoltRequest::Init { .. } => "INIT",
            BoltRequest::Hello { .. } => "HELLO",
            BoltRequest::Goodbye => "GOODBYE",
            BoltRequest::Reset => "RESET",
            BoltRequest::Run { .. } => "RUN",
            BoltRequest::Begin { .. } => "BEGIN",
            BoltRequest::Commit => "COMMIT",
            BoltRequest::Rollback => "ROLLBACK",
            BoltRequest::DiscardAll => "DISCARD_ALL",
            BoltRequest::PullAll => "PULL_ALL",
            BoltRequest::Discard { .. } => "DISCARD",
            BoltRequest::Pull { .. } => "PULL",
        }
    }

    /// Convert to the structure that goes on the wire.
    pub fn to_structure(&self) -> Structure {
        let fields = match self {
            BoltRequest::Init { user_agent, auth } => {
                vec![Value::from(user_agent.as_str()), Value::Map(auth.clone())]
            }
            BoltRequest::Hello { extra } | BoltRequest::Begin { extra } => {
                vec![Value::Map(extra.clone())]
            }
            BoltRequest::Run {
                query,
                parameters,
                extra,
            } => {
                let mut fields = vec![Value::from(query.as_str()), Value::Map(parameters.clone())];
                if let Some(extra) = extra {
                    fields.push(Value::Map(extra.clone()));
                }
                fields
            }
            BoltRequest::Discard { n, qid } | BoltRequest::Pull { n, qid } => {
                let mut args = ValueMap::new();
                args.insert("n".into(), Value::Integer(*n));
                if let Some(qid) = qid {
                    args.insert("qid".into(), Value::Integer(*qid));
                }
                vec![Value::Map(args)]
            }
            BoltRequest::Goodbye
            | BoltRequest::Reset
            | BoltRequest::Commit
            | BoltRequest::Rollback
            | BoltRequest::DiscardAll
            | BoltRequest::PullAll => Vec::new(),
        };
        Structure::new(self.tag(), fields)
    }
}

/// Log form. Credentials never appear.
impl fmt::Display for BoltRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoltRequest::Init { user_agent, auth } => {
                write!(f, "INIT {:?} {}", user_agent, Value::Map(redact(auth)))
            }
            BoltRequest::Hello { extra } => write!(f, "HELLO {}", Value::Map(redact(extra))),
            BoltRequest::Run {
                query,
                parameters,
                extra,
            } => {
                write!(f, "RUN {:?} {}", query, Value::Map(parameters.clone()))?;
                if let Some(extra) = extra {
                    write!(f, " {}", Value::Map(extra.clone()))?;
                }
                Ok(())
            }
            BoltRequest::Begin { extra } => write!(f, "BEGIN {}", Value::Map(extra.clone())),
            BoltRequest::Discard { n, qid } | BoltRequest::Pull { n, qid } => {
                write!(f, "{} {{n: {}", self.name(), n)?;
                if let Some(qid) = qid {
                    write!(f, ", qid: {}", qid)?;
                }
                write!(f, "}}")
            }
            other => write!(f, "{}", other.name()),
        }
    }
}

fn redact(map: &ValueMap) -> ValueMap {
    let mut out = map.clone();
    if out.contains_key("credentials") {
        out.insert("credentials".into(), Value::from("*******"));
    }
    out
}
