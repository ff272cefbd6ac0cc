//! Interpreter for interactive client input.
//!
//! Accepted lines:
//!
//! ```text
//! salute
//! bye
//! list clients
//! solve <problem> [v1,v2,...]
//! ```
//!
//! Interpretation is pure: nothing is sent for a line that fails to parse.

use crate::error::ParseError;
use crate::model::{Command, RequestKind, Scalar};
use regex::Regex;
use std::sync::LazyLock;

static COMMAND_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+(\s+\S+)*$").expect("valid command pattern"));

static ARRAY_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(([^\s,]+,)*[^\s,]+)?\]$").expect("valid array pattern")
});

/// Entities that `list` can enumerate.
const LISTABLE: &[&str] = &["clients"];

/// Interpret one line of user input (terminator optional).
pub fn parse_request(input: &str) -> Result<RequestKind, ParseError> {
    let line = crate::codec::trim_line(input);

    match line {
        "bye" => Ok(RequestKind::Bye),
        "salute" => Ok(RequestKind::Salute),
        _ if COMMAND_LINE.is_match(line) => parse_command(line).map(RequestKind::Command),
        _ => Err(ParseError::UnknownRequestType),
    }
}

fn parse_command(line: &str) -> Result<Command, ParseError> {
    let mut tokens = line.split_whitespace();
    let verb = tokens.next().unwrap_or_default();
    let params: Vec<&str> = tokens.collect();

    match verb {
        "solve" => parse_solve(&params),
        "list" => parse_list(&params),
        other => Err(ParseError::InvalidVerb(other.to_string())),
    }
}

fn parse_list(params: &[&str]) -> Result<Command, ParseError> {
    let [entity] = params else {
        return Err(ParseError::InvalidArgument(
            "only one argument should be provided".to_string(),
        ));
    };

    if !LISTABLE.contains(entity) {
        return Err(ParseError::InvalidArgument(format!(
            "{} cannot be listed",
            entity
        )));
    }

    Ok(Command::List {
        entity: entity.to_string(),
    })
}

fn parse_solve(params: &[&str]) -> Result<Command, ParseError> {
    let [problem, literal] = params else {
        return Err(ParseError::InvalidArgument(
            "two arguments should be provided".to_string(),
        ));
    };

    if !ARRAY_LITERAL.is_match(literal) {
        return Err(ParseError::InvalidArrayFormat);
    }

    Ok(Command::Solve {
        problem: problem.to_string(),
        array: parse_array(literal)?,
    })
}

/// Decode a bracketed literal. Strict JSON is tried first; otherwise each
/// element is read as a JSON scalar, falling back to bare text.
fn parse_array(literal: &str) -> Result<Vec<Scalar>, ParseError> {
    if let Ok(array) = serde_json::from_str::<Vec<Scalar>>(literal) {
        return Ok(array);
    }

    let inner = &literal[1..literal.len() - 1];
    inner
        .split(',')
        .map(|token| match serde_json::from_str::<serde_json::Value>(token) {
            Ok(serde_json::Value::Array(_)) | Ok(serde_json::Value::Object(_)) => {
                Err(ParseError::InvalidArrayFormat)
            }
            Ok(value) => {
                serde_json::from_value(value).map_err(|_| ParseError::InvalidArrayFormat)
            }
            Err(_) => Ok(Scalar::Text(token.to_string())),
        })
        .collect()
}
