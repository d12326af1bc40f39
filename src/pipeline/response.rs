//! Caller-facing run report
//!
//! Every stage records its problems into an additive error log keyed by a
//! coarse status-like code; nothing is ever overwritten or dropped within a
//! run. The final [`OperationResponse`] aggregates the log plus, when the log
//! is empty, a single success entry.

use serde::{Deserialize, Serialize};

/// Coarse status-like classification of a recorded problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Invalid caller input (validation failures, bad repository setup)
    BadRequest,
    /// External resource present but not accessible/verifiable
    Forbidden,
    /// Internal failure during publish or reset
    Internal,
    /// Filesystem or transport I/O failure
    Unavailable,
    /// Importer accepted the call but imported nothing
    ImportFailed,
}

impl ErrorCode {
    /// The wire representation, matching HTTP status conventions.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "400",
            ErrorCode::Forbidden => "403",
            ErrorCode::Internal => "500",
            ErrorCode::Unavailable => "503",
            ErrorCode::ImportFailed => "504",
        }
    }
}

/// One recorded problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientError {
    pub code: ErrorCode,
    pub message: String,
}

/// Ordered, additive error log for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct ClientErrorLog {
    entries: Vec<ClientError>,
}

impl ClientErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, code: ErrorCode, message: impl Into<String>) {
        self.entries.push(ClientError {
            code,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ClientError] {
        &self.entries
    }
}

/// Success payload attached when a full run completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessInfo {
    pub model_id: String,
    pub image_name: String,
    pub model_version: String,
    /// Browsable manifest URL of the pushed image
    pub registry_url: Option<String>,
}

/// Aggregated outcome of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse {
    pub errors: Vec<ClientError>,
    pub success: Option<SuccessInfo>,
}

impl OperationResponse {
    pub fn from_log(log: &ClientErrorLog, success: Option<SuccessInfo>) -> Self {
        Self {
            errors: log.entries().to_vec(),
            success: if log.is_empty() { success } else { None },
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.success.is_some()
    }
}
