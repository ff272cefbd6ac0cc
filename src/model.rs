//! Typed protocol messages shared by client and server.
//!
//! Every request kind carries exactly the payload shape it needs, so a
//! decoded request never has to be inspected with ad-hoc casts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single element of a `solve` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(serde_json::Number),
    Text(String),
    Bool(bool),
}

impl Scalar {
    /// Integral value of a number, accepting `12` and `12.0` alike.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Scalar::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Some(i);
                }
                let f = n.as_f64()?;
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Some(f as i64)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A server command issued by a registered client.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Run problem `problem` over `array`.
    Solve { problem: String, array: Vec<Scalar> },
    /// List a server-side entity (only `clients` today).
    List { entity: String },
}

/// Request body, tagged by its wire `requestType`.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    Salute,
    Command(Command),
    Bye,
    /// Client confirmation that an `Ok` response arrived.
    Ack(Response),
}

impl RequestKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            RequestKind::Salute => "salute",
            RequestKind::Command(_) => "command",
            RequestKind::Bye => "bye",
            RequestKind::Ack(_) => "ack",
        }
    }
}

/// A request envelope as sent by a client.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub sender: String,
    pub kind: RequestKind,
}

impl Request {
    pub fn new(sender: impl Into<String>, kind: RequestKind) -> Self {
        Self {
            sender: sender.into(),
            kind,
        }
    }
}

/// Response status codes. The wire spellings are fixed, typo included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "alreadydregistered")]
    AlreadyRegistered,
    #[serde(rename = "unregistered")]
    Unregistered,
    #[serde(rename = "badrequest")]
    BadRequest,
    #[serde(rename = "badname")]
    BadName,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "log")]
    Log,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ok => "ok",
            Status::AlreadyRegistered => "alreadydregistered",
            Status::Unregistered => "unregistered",
            Status::BadRequest => "badrequest",
            Status::BadName => "badname",
            Status::Error => "error",
            Status::Log => "log",
        };
        f.write_str(name)
    }
}

/// A response envelope as sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub content: String,
    pub status: Status,
}

impl Response {
    pub fn new(status: Status, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            status,
        }
    }

    pub fn ok(content: impl Into<String>) -> Self {
        Self::new(Status::Ok, content)
    }

    pub fn log(content: impl Into<String>) -> Self {
        Self::new(Status::Log, content)
    }

    pub fn bad_request(content: impl Into<String>) -> Self {
        Self::new(Status::BadRequest, content)
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}
