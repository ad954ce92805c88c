//! IPC protocol types for server ↔ worker communication.
//!
//! Plain text lines over stdin/stdout pipes:
//!
//! ```text
//! host → worker:  <method> <argument>\n
//! worker → host:  <method> <argument> <result>\n
//! ```
//!
//! `method` and `argument` never contain whitespace. `result` is the free-form
//! remainder of the line (a JSON blob for `classify`, a file path for the
//! explainers).

use std::fmt;
use std::str::FromStr;

use sha1::{Digest, Sha1};

use crate::web::error::ProtocolError;

/// Operations the worker understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerMethod {
    Classify,
    ExplainLime,
    ExplainGradcam,
}

impl WorkerMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerMethod::Classify => "classify",
            WorkerMethod::ExplainLime => "explain_lime",
            WorkerMethod::ExplainGradcam => "explain_gradcam",
        }
    }
}

impl fmt::Display for WorkerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerMethod {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "classify" => Ok(WorkerMethod::Classify),
            "explain_lime" => Ok(WorkerMethod::ExplainLime),
            "explain_gradcam" => Ok(WorkerMethod::ExplainGradcam),
            other => Err(ProtocolError::UnknownMethod(other.to_string())),
        }
    }
}

/// A single command line sent to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub method: WorkerMethod,
    pub argument: String,
}

impl WorkerCommand {
    /// Build a command, rejecting arguments the line protocol cannot carry.
    pub fn new(method: WorkerMethod, argument: impl Into<String>) -> Result<Self, ProtocolError> {
        let argument = argument.into();
        validate_argument(&argument)?;
        Ok(Self { method, argument })
    }

    /// The correlation key a reply to this command will carry.
    pub fn key(&self) -> CorrelationKey {
        CorrelationKey::new(self.method.as_str(), &self.argument)
    }

    /// Wire form, including the trailing newline.
    pub fn to_line(&self) -> String {
        format!("{} {}\n", self.method, self.argument)
    }
}

fn validate_argument(argument: &str) -> Result<(), ProtocolError> {
    if argument.is_empty() {
        return Err(ProtocolError::EmptyArgument);
    }
    if argument.chars().any(char::is_whitespace) {
        return Err(ProtocolError::ArgumentHasWhitespace(argument.to_string()));
    }
    Ok(())
}

/// Content-addressed identity of a (method, argument) pair.
///
/// SHA-1 of `method + " " + argument`, i.e. of the command line itself. Neither
/// token may contain whitespace, so the separator makes the encoding
/// unambiguous; distinct pairs are assumed never to produce the same digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    pub fn new(method: &str, argument: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(method.as_bytes());
        hasher.update(b" ");
        hasher.update(argument.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One parsed response line from the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReply {
    pub method: String,
    pub argument: String,
    pub result: String,
}

impl WorkerReply {
    /// Parse `<method> <argument> <result>`.
    ///
    /// Only the first two whitespace-delimited tokens are delimiters; the
    /// result is everything after the single character that ends the
    /// argument and may itself contain whitespace (or be empty).
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']).trim_start();

        let (method, rest) = split_token(line);
        let (argument, rest) = split_token(rest.trim_start());
        if method.is_empty() || argument.is_empty() {
            return Err(ProtocolError::MalformedReply(line.to_string()));
        }

        // `rest` starts at the delimiter following the argument, if any.
        let result = rest
            .chars()
            .next()
            .map(|delim| &rest[delim.len_utf8()..])
            .unwrap_or("");

        Ok(Self {
            method: method.to_string(),
            argument: argument.to_string(),
            result: result.to_string(),
        })
    }

    pub fn key(&self) -> CorrelationKey {
        CorrelationKey::new(&self.method, &self.argument)
    }
}

/// Split off the leading non-whitespace token; the remainder keeps its delimiter.
fn split_token(s: &str) -> (&str, &str) {
    match s.find(char::is_whitespace) {
        Some(idx) => (&s[..idx], &s[idx..]),
        None => (s, ""),
    }
}
