//! Error types for kiosk-core.

use std::{fmt, io, result::Result as StdResult};

use thiserror::Error;

use crate::{classifier::ClassificationError, config::ConfigError};

/// Convenient result type for the core crate.
pub type Result<T> = StdResult<T, Error>;

/// Unified error type for kiosk-core.
#[derive(Debug, Error)]
pub enum Error {
    /// The submitted text could not be resolved to a target.
    #[error(transparent)]
    Classify(#[from] ClassificationError),

    /// The port field of a submission was not a valid TCP port.
    #[error("Invalid port '{0}'")]
    InvalidPort(String),

    /// The static server could not bind its listener.
    #[error("Could not listen on localhost:{port}: {source}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying bind failure.
        #[source]
        source: io::Error,
    },

    /// A script target failed to spawn or exited on its own.
    #[error("Script error: {0}")]
    Script(String),

    /// A start was overtaken by a later `stop` or `start`; its resources were released.
    #[error("Start superseded by a newer request")]
    Superseded,

    /// The key-value store could not be read or written.
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// JSON encoding or decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O failure while performing a system operation.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// The kind reported to the input collector's error display.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Classify(e) => e.kind.into(),
            Self::InvalidPort(_) => ErrorKind::InvalidPort,
            Self::Bind { .. } => ErrorKind::BindFailed,
            Self::Script(_) => ErrorKind::ScriptError,
            Self::Store(_) | Self::Serialization(_) => ErrorKind::Store,
            Self::Superseded | Self::Config(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }
}

/// Error categories surfaced through [`crate::InputCollector::display_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Nothing was entered.
    EmptyInput,
    /// Neither a URL nor a plausible path.
    UnrecognizedInput,
    /// The path does not exist.
    PathNotFound,
    /// A directory without any known entry point.
    NoEntryPoint,
    /// A file with an extension no strategy handles.
    UnsupportedExtension,
    /// The port field did not parse.
    InvalidPort,
    /// A script failed to start or stopped running.
    ScriptError,
    /// The static server listener could not bind.
    BindFailed,
    /// The persisted target could not be written.
    Store,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::EmptyInput => "EmptyInput",
            Self::UnrecognizedInput => "UnrecognizedInput",
            Self::PathNotFound => "PathNotFound",
            Self::NoEntryPoint => "NoEntryPoint",
            Self::UnsupportedExtension => "UnsupportedExtension",
            Self::InvalidPort => "InvalidPort",
            Self::ScriptError => "ScriptError",
            Self::BindFailed => "BindFailed",
            Self::Store => "Store",
            Self::Internal => "Internal",
        };
        f.write_str(s)
    }
}
