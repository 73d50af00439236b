//! Error types for xtalk

use std::io;
use thiserror::Error;

/// Main error type for xtalk
#[derive(Error, Debug)]
pub enum XtalkError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("INI parse error: {0}")]
    IniParse(String),

    #[error("Speech synthesis error: {0}")]
    Speech(String),

    #[error("Phrase store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A negotiation session is already running
    #[error("Speech negotiation already in progress")]
    NegotiationInProgress,

    /// No negotiated backend is attached to the composer
    #[error("Speech is not ready yet")]
    NotReady,

    /// Play was requested before any phrase was selected
    #[error("Compose a sentence first")]
    EmptySentence,

    #[error("Unknown speech backend: {0}")]
    UnknownBackend(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for xtalk operations
pub type Result<T> = std::result::Result<T, XtalkError>;

impl From<String> for XtalkError {
    fn from(s: String) -> Self {
        XtalkError::Other(s)
    }
}

impl From<&str> for XtalkError {
    fn from(s: &str) -> Self {
        XtalkError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for XtalkError {
    fn from(e: serde_json::Error) -> Self {
        XtalkError::Store(format!("JSON error: {}", e))
    }
}
