//! Post-ingest processing status of a stored blob.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status code reported while enrichment is still running.
pub const IN_PROGRESS_CODE: u16 = 202;

/// Enrichment state of a content record.
///
/// Distinct from storage success: a record in any of these states has its
/// bytes safely stored. `Failed` is data returned alongside readable content,
/// not an error.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Enrichment finished.
    Ok,
    /// Newly ingested; enrichment has not reported yet.
    #[default]
    InProgress,
    /// Enrichment failed with a status code and message.
    Failed { code: u16, message: String },
}

impl ProcessingStatus {
    /// Shorthand for a failure status.
    pub fn failed(code: u16, message: impl Into<String>) -> Self {
        Self::Failed {
            code,
            message: message.into(),
        }
    }

    /// Returns `true` once enrichment has completed successfully.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Returns `true` while enrichment is still running.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::InProgress)
    }

    /// Code/message pair for statuses that are not `Ok`.
    pub fn as_code(&self) -> Option<(u16, &str)> {
        match self {
            Self::Ok => None,
            Self::InProgress => Some((IN_PROGRESS_CODE, "processing file")),
            Self::Failed { code, message } => Some((*code, message.as_str())),
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::InProgress => write!(f, "in progress"),
            Self::Failed { code, message } => write!(f, "failed ({code}): {message}"),
        }
    }
}
