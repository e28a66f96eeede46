//! Error taxonomy for the reporting path.
//!
//! Configuration and source plumbing use `anyhow` like the rest of the crate.
//! The types here exist where a caller branches on what went wrong: the
//! reporter decides whether to retry a remote error, and the frame loop
//! logs which report stage failed.

use std::path::PathBuf;
use thiserror::Error;

use crate::category::Category;

/// Malformed category mapping or policy. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("configuration error: {0}")]
pub struct ConfigurationError(String);

impl ConfigurationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Failure talking to a remote backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("remote returned status {code}: {body}")]
    Status { code: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Transport failures, timeouts, throttling and server errors may succeed
    /// on a later attempt; everything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transport(_) => true,
            RemoteError::Status { code, .. } => matches!(*code, 408 | 429 | 500..=599),
            RemoteError::Decode(_) => false,
        }
    }
}

/// The ordered steps of a report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportStage {
    SnapshotWrite,
    Upload,
    EventLog,
    CounterPush,
}

impl std::fmt::Display for ReportStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReportStage::SnapshotWrite => "snapshot write",
            ReportStage::Upload => "upload",
            ReportStage::EventLog => "event log append",
            ReportStage::CounterPush => "counter push",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("{category}: failed to write snapshot {}: {source}", .path.display())]
    SnapshotWrite {
        category: Category,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{category}: upload of {object} failed: {source}")]
    Upload {
        category: Category,
        object: String,
        #[source]
        source: RemoteError,
    },
    #[error("{category}: append to {key} failed: {source}")]
    EventLog {
        category: Category,
        key: String,
        #[source]
        source: RemoteError,
    },
    #[error("{category}: update of {key} failed: {source}")]
    CounterPush {
        category: Category,
        key: String,
        #[source]
        source: RemoteError,
    },
}

impl ReportError {
    pub fn stage(&self) -> ReportStage {
        match self {
            ReportError::SnapshotWrite { .. } => ReportStage::SnapshotWrite,
            ReportError::Upload { .. } => ReportStage::Upload,
            ReportError::EventLog { .. } => ReportStage::EventLog,
            ReportError::CounterPush { .. } => ReportStage::CounterPush,
        }
    }

    pub fn category(&self) -> Category {
        match self {
            ReportError::SnapshotWrite { category, .. }
            | ReportError::Upload { category, .. }
            | ReportError::EventLog { category, .. }
            | ReportError::CounterPush { category, .. } => *category,
        }
    }
}
