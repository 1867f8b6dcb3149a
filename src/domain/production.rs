//! Provider-side production state as seen by this service.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a production at the enhancement provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductionStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

impl ProductionStatus {
    /// Parse the provider's status string. Case-insensitive; anything
    /// unrecognized counts as still processing.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "done" | "completed" | "finished" => Self::Done,
            "error" | "failed" | "failure" => Self::Failed,
            "queued" | "waiting" | "incomplete" | "file upload" => Self::Queued,
            _ => Self::Processing,
        }
    }

    /// Map the provider's numeric status code
    pub fn from_code(code: i64) -> Self {
        match code {
            3 => Self::Done,
            2 => Self::Failed,
            0 | 1 | 9 | 10 => Self::Queued,
            _ => Self::Processing,
        }
    }

    /// Done or Failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for ProductionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "Queued",
            Self::Processing => "Processing",
            Self::Done => "Done",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// One downloadable output of a finished production
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    #[serde(alias = "download_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl OutputFile {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format: None,
        }
    }
}

/// A production as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalProductionJob {
    pub external_id: String,
    pub status: ProductionStatus,
    pub output_files: Vec<OutputFile>,
}
