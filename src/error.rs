//! Error types for the scheduling pipeline
//!
//! Errors are classified by how the orchestrator treats them:
//! - Guidance: malformed command, shown to the user as-is
//! - Soft: a single lookup, guest batch or slot failed; logged and absorbed,
//!   never surfaced as a `SchedulerError`
//! - Fatal: the request cannot complete and ends with an error reply
//!
//! Nothing is retried automatically; the user re-issues the command.

use std::path::PathBuf;

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::parser::ParseError;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Failures that end a single inbound command
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("{0}")]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Guidance,
    Fatal,
}

impl SchedulerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SchedulerError::Parse(_) => ErrorClass::Guidance,
            SchedulerError::Gateway(_) => ErrorClass::Fatal,
        }
    }
}
