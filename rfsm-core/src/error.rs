//! Error types.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while bringing up a runtime context.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("cannot allocate embedded runtime: {0}")]
    AllocationFailed(String),

    #[error("cannot load FSM library from {origin}: {reason}")]
    LibraryLoadFailed { origin: String, reason: String },

    #[error("cannot extend search path with '{path}': {reason}")]
    SearchPath { path: String, reason: String },

    #[error("cannot register native bridge: {0}")]
    BridgeRegistration(String),

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("runtime context has been destroyed")]
    Destroyed,
}

/// Errors raised while loading a definition file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read definition '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    ParseError(String),

    #[error("no definition loaded in this context")]
    NotLoaded,
}

/// Errors raised by introspection queries against the live model.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("introspection hook '{0}' is not available")]
    MissingIntrospectionHook(&'static str),

    #[error("malformed {kind} record #{index}: {reason}")]
    MalformedRecord {
        kind: &'static str,
        index: usize,
        reason: String,
    },

    #[error("query failed: {0}")]
    Lua(String),
}

/// Errors surfaced by the [`StateMachine`](crate::StateMachine) driver.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("state machine is not loaded")]
    NotLoaded,

    #[error(transparent)]
    Init(#[from] InitError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("runtime fault: {0}")]
    RuntimeFault(String),

    #[error("unknown state: {0}")]
    UnknownState(String),
}

impl MachineError {
    /// Returns a stable code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            MachineError::NotLoaded => "NOT_LOADED",
            MachineError::Init(InitError::InvalidModel(_)) => "INVALID_MODEL",
            MachineError::Init(_) => "INIT_FAILED",
            MachineError::Load(LoadError::Io { .. }) => "IO_ERROR",
            MachineError::Load(_) => "PARSE_ERROR",
            MachineError::Query(_) => "QUERY_FAILED",
            MachineError::RuntimeFault(_) => "RUNTIME_FAULT",
            MachineError::UnknownState(_) => "UNKNOWN_STATE",
        }
    }

    /// Source location carried by the message, if any.
    pub fn diagnostic(&self) -> Option<Diagnostic> {
        Diagnostic::parse(&self.to_string())
    }
}

/// Location extracted from a `"<file>:<line>: <message>"` diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub file: String,
    /// 1-based line number.
    pub line: u32,
    pub message: String,
}

impl Diagnostic {
    /// Finds the first `:<digits>:` separator in `text`.
    ///
    /// Any prefix before the file name (e.g. `runtime fault: `) is kept in
    /// `file`; use [`Diagnostic::matches_file`] to compare against a path.
    pub fn parse(text: &str) -> Option<Self> {
        for (idx, _) in text.match_indices(':') {
            if idx == 0 {
                continue;
            }
            let rest = &text[idx + 1..];
            let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
            if digits == 0 || !rest[digits..].starts_with(':') {
                continue;
            }
            let line = rest[..digits].parse().ok()?;
            let file = text[..idx].rsplit(": ").next().unwrap_or(&text[..idx]);
            return Some(Diagnostic {
                file: file.to_string(),
                line,
                message: rest[digits + 1..].trim_start().to_string(),
            });
        }
        None
    }

    /// True when the diagnostic refers to `path` (compared by file name).
    pub fn matches_file(&self, path: &Path) -> bool {
        let reported = Path::new(&self.file);
        reported == path || reported.file_name().is_some() && reported.file_name() == path.file_name()
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.message)
    }
}

/// Flattens an embedded-runtime error into its message text, without the
/// traceback the runtime appends.
pub(crate) fn lua_message(err: &mlua::Error) -> String {
    match err {
        mlua::Error::RuntimeError(msg) => msg
            .split("\nstack traceback:")
            .next()
            .unwrap_or(msg)
            .to_string(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::CallbackError { cause, .. } => lua_message(cause),
        other => other.to_string(),
    }
}
