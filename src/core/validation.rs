//! Upload validation.
//!
//! Rejects anything that is not an allowed audio type, is too large, or is
//! estimated to run too long. Duration is estimated from size alone at an
//! assumed 128 kbps, so a valid upload never needs decoding.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Audio types accepted by default
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/wav",
    "audio/x-wav",
    "audio/webm",
    "audio/mp4",
    "audio/aac",
    "audio/m4a",
    "audio/ogg",
];

/// Bitrate used for the size-based duration estimate
pub const ASSUMED_BITRATE_BPS: f64 = 128.0 * 1024.0;

/// Limits applied to every upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestLimits {
    /// Maximum upload size in bytes (default: 50MB)
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Maximum estimated duration in seconds (default: 900 = 15 min)
    #[serde(default = "default_max_duration")]
    pub max_duration_seconds: f64,

    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
}

fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}
fn default_max_duration() -> f64 {
    900.0
}
fn default_allowed_mime_types() -> Vec<String> {
    ALLOWED_MIME_TYPES.iter().map(|s| s.to_string()).collect()
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            max_duration_seconds: default_max_duration(),
            allowed_mime_types: default_allowed_mime_types(),
        }
    }
}

impl IngestLimits {
    pub fn is_allowed(&self, mime_type: &str) -> bool {
        self.allowed_mime_types.iter().any(|m| m == mime_type)
    }

    /// Validate an upload by size and declared type
    pub fn validate_len(
        &self,
        size_bytes: u64,
        mime_type: &str,
    ) -> Result<ValidatedUpload, ValidationError> {
        if !self.is_allowed(mime_type) {
            return Err(ValidationError::InvalidMimeType {
                mime_type: mime_type.to_string(),
            });
        }

        if size_bytes > self.max_file_bytes {
            return Err(ValidationError::FileTooLarge {
                actual: size_bytes,
                limit: self.max_file_bytes,
            });
        }

        let estimated = estimate_duration_seconds(size_bytes);
        if estimated > self.max_duration_seconds {
            return Err(ValidationError::TooLong {
                estimated_seconds: estimated,
                limit_seconds: self.max_duration_seconds,
            });
        }

        Ok(ValidatedUpload {
            mime_type: mime_type.to_string(),
            size_bytes,
            estimated_duration_sec: estimated,
        })
    }

    /// Validate upload bytes and declared type
    pub fn validate(&self, bytes: &[u8], mime_type: &str) -> Result<ValidatedUpload, ValidationError> {
        self.validate_len(bytes.len() as u64, mime_type)
    }
}

/// Estimated playback length of `size_bytes` of audio
pub fn estimate_duration_seconds(size_bytes: u64) -> f64 {
    (size_bytes as f64 * 8.0) / ASSUMED_BITRATE_BPS
}

/// Best-effort audio type from a file extension
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext.to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "webm" => "audio/webm",
        "m4a" => "audio/m4a",
        "mp4" => "audio/mp4",
        "aac" => "audio/aac",
        "ogg" | "oga" => "audio/ogg",
        _ => return None,
    };
    Some(mime)
}

/// An upload that passed validation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedUpload {
    pub mime_type: String,
    pub size_bytes: u64,
    pub estimated_duration_sec: f64,
}

/// Why an upload was rejected
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Invalid file type '{mime_type}'. Only audio files are allowed.")]
    InvalidMimeType { mime_type: String },

    #[error("File too large: {actual} bytes exceeds limit of {limit}")]
    FileTooLarge { actual: u64, limit: u64 },

    #[error("Audio too long: ~{estimated_seconds:.0}s exceeds limit of {limit_seconds:.0}s")]
    TooLong {
        estimated_seconds: f64,
        limit_seconds: f64,
    },
}

impl ValidationError {
    /// Stable reason code
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidMimeType { .. } => "InvalidMimeType",
            Self::FileTooLarge { .. } => "FileTooLarge",
            Self::TooLong { .. } => "TooLong",
        }
    }
}
