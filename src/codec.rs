//! Line codec for request and response envelopes.
//!
//! One JSON object per line:
//!
//! ```text
//! Request:  {"requestType":"command","sender":"bob","content":{"verb":"list","args":{"entity":"clients"}}}
//! Response: {"content":"registered clients: bob","status":"ok"}
//! ```
//!
//! Decoding dispatches on `requestType` (and `verb` for commands) and rejects
//! payloads whose shape does not match the declared type.

use crate::error::{DecodeError, EncodeError};
use crate::model::{Command, Request, RequestKind, Response, Scalar};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const SALUTE: &str = "salute";
const COMMAND: &str = "command";
const BYE: &str = "bye";
const ACK: &str = "ack";

const SOLVE: &str = "solve";
const LIST: &str = "list";

/// Request envelope as it appears on the wire.
#[derive(Serialize, Deserialize)]
struct RawRequest {
    #[serde(rename = "requestType")]
    request_type: String,
    sender: String,
    #[serde(default)]
    content: Value,
}

#[derive(Deserialize)]
struct RawCommand {
    verb: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
struct SolveArgs {
    problem: String,
    array: Vec<Scalar>,
}

#[derive(Deserialize)]
struct ListArgs {
    entity: String,
}

/// Render a request as a single line (no terminator).
pub fn encode_request(request: &Request) -> Result<String, EncodeError> {
    let content = match &request.kind {
        RequestKind::Salute | RequestKind::Bye => Value::String(String::new()),
        RequestKind::Command(Command::Solve { problem, array }) => json!({
            "verb": SOLVE,
            "args": { "problem": problem, "array": array },
        }),
        RequestKind::Command(Command::List { entity }) => json!({
            "verb": LIST,
            "args": { "entity": entity },
        }),
        RequestKind::Ack(response) => serde_json::to_value(response)?,
    };

    let raw = RawRequest {
        request_type: request.kind.type_name().to_string(),
        sender: request.sender.clone(),
        content,
    };
    Ok(serde_json::to_string(&raw)?)
}

/// Parse a single request line.
pub fn decode_request(line: &str) -> Result<Request, DecodeError> {
    let raw: RawRequest = serde_json::from_str(line)?;

    let kind = match raw.request_type.as_str() {
        SALUTE => {
            expect_empty(&raw.content, SALUTE)?;
            RequestKind::Salute
        }
        BYE => {
            expect_empty(&raw.content, BYE)?;
            RequestKind::Bye
        }
        COMMAND => RequestKind::Command(decode_command(raw.content)?),
        ACK => RequestKind::Ack(serde_json::from_value(raw.content)?),
        other => return Err(DecodeError::UnknownRequestType(other.to_string())),
    };

    Ok(Request {
        sender: raw.sender,
        kind,
    })
}

fn decode_command(content: Value) -> Result<Command, DecodeError> {
    let raw: RawCommand = serde_json::from_value(content)?;

    match raw.verb.as_str() {
        SOLVE => {
            let args: SolveArgs = serde_json::from_value(raw.args)?;
            Ok(Command::Solve {
                problem: args.problem,
                array: args.array,
            })
        }
        LIST => {
            let args: ListArgs = serde_json::from_value(raw.args)?;
            Ok(Command::List {
                entity: args.entity,
            })
        }
        other => Err(DecodeError::UnknownVerb(other.to_string())),
    }
}

/// Salute and bye carry no payload: accept an empty string or null.
fn expect_empty(content: &Value, request_type: &str) -> Result<(), DecodeError> {
    match content {
        Value::Null => Ok(()),
        Value::String(s) if s.is_empty() => Ok(()),
        other => Err(DecodeError::MalformedPayload(format!(
            "{} carries unexpected content {}",
            request_type, other
        ))),
    }
}

/// Render a response as a single line (no terminator).
pub fn encode_response(response: &Response) -> Result<String, EncodeError> {
    Ok(serde_json::to_string(response)?)
}

/// Parse a single response line.
pub fn decode_response(line: &str) -> Result<Response, DecodeError> {
    Ok(serde_json::from_str(line)?)
}

/// Append the line terminator, ready for a socket write.
pub fn frame(line: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(line.len() + 1);
    buf.put_slice(line.as_bytes());
    buf.put_u8(b'\n');
    buf.freeze()
}

/// Strip a trailing `\n` or `\r\n`.
pub fn trim_line(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Status;

    fn numbers(values: &[i64]) -> Vec<Scalar> {
        values
            .iter()
            .map(|v| Scalar::Number((*v).into()))
            .collect()
    }

    #[test]
    fn test_request_round_trip() {
        let requests = vec![
            Request::new("ana", RequestKind::Salute),
            Request::new("ana", RequestKind::Bye),
            Request::new(
                "ana",
                RequestKind::Command(Command::Solve {
                    problem: "3".to_string(),
                    array: numbers(&[12, 13, 14]),
                }),
            ),
            Request::new(
                "ana",
                RequestKind::Command(Command::List {
                    entity: "clients".to_string(),
                }),
            ),
            Request::new("ana", RequestKind::Ack(Response::ok("93"))),
        ];

        for request in requests {
            let line = encode_request(&request).unwrap();
            assert!(!line.contains('\n'));
            assert_eq!(decode_request(&line).unwrap(), request);
        }
    }

    #[test]
    fn test_response_round_trip() {
        let response = Response::new(Status::AlreadyRegistered, "client already registered");
        let line = encode_response(&response).unwrap();
        assert_eq!(decode_response(&line).unwrap(), response);
    }

    #[test]
    fn test_wire_shape() {
        let request = Request::new(
            "bob",
            RequestKind::Command(Command::List {
                entity: "clients".to_string(),
            }),
        );
        let value: Value = serde_json::from_str(&encode_request(&request).unwrap()).unwrap();
        assert_eq!(value["requestType"], "command");
        assert_eq!(value["sender"], "bob");
        assert_eq!(value["content"]["verb"], "list");
        assert_eq!(value["content"]["args"]["entity"], "clients");

        let salute = encode_request(&Request::new("bob", RequestKind::Salute)).unwrap();
        let value: Value = serde_json::from_str(&salute).unwrap();
        assert_eq!(value["content"], "");
    }

    #[test]
    fn test_embedded_newline_is_escaped() {
        let line = encode_response(&Response::ok("a\nb")).unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(decode_response(&line).unwrap().content, "a\nb");
    }

    #[test]
    fn test_decode_accepts_missing_salute_content() {
        let request = decode_request(r#"{"requestType":"salute","sender":"x"}"#).unwrap();
        assert_eq!(request.kind, RequestKind::Salute);
    }

    #[test]
    fn test_decode_rejects_mismatched_shapes() {
        let cases = [
            r#"{"requestType":"salute","sender":"x","content":{"verb":"list"}}"#,
            r#"{"requestType":"command","sender":"x","content":""}"#,
            r#"{"requestType":"command","sender":"x","content":{"verb":"solve","args":{"entity":"clients"}}}"#,
            r#"{"requestType":"command","sender":"x","content":{"verb":"list","args":{"problem":"1","array":[]}}}"#,
            r#"{"requestType":"command","sender":"x","content":{"verb":"solve","args":{"problem":"1","array":[[1]]}}}"#,
            r#"{"requestType":"ack","sender":"x","content":"ok"}"#,
            r#"{"sender":"x","content":""}"#,
            "not json",
        ];

        for case in cases {
            match decode_request(case) {
                Err(DecodeError::MalformedPayload(_)) => {}
                other => panic!("unexpected for {}: {:?}", case, other),
            }
        }
    }

    #[test]
    fn test_decode_unknown_type_and_verb() {
        match decode_request(r#"{"requestType":"shout","sender":"x","content":""}"#) {
            Err(DecodeError::UnknownRequestType(t)) => assert_eq!(t, "shout"),
            other => panic!("unexpected: {:?}", other),
        }

        match decode_request(
            r#"{"requestType":"command","sender":"x","content":{"verb":"dance","args":{}}}"#,
        ) {
            Err(DecodeError::UnknownVerb(v)) => assert_eq!(v, "dance"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decode_response_rejects_unknown_status() {
        assert!(decode_response(r#"{"content":"x","status":"maybe"}"#).is_err());
        assert!(decode_response(r#"{"status":"ok"}"#).is_err());
    }

    #[test]
    fn test_frame_and_trim() {
        assert_eq!(&frame("abc")[..], b"abc\n");
        assert_eq!(trim_line("abc\r\n"), "abc");
        assert_eq!(trim_line("abc\n"), "abc");
        assert_eq!(trim_line("abc"), "abc");
    }
}
