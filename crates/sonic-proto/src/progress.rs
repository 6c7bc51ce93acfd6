//! Progress reporting.

use serde::{Deserialize, Serialize};

/// Execution status reported in a `P` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgressStatus {
    Queued,
    Started,
    Running,
    Waiting,
    Finished,
    /// Any status code this client does not know about.
    Unknown,
}

impl ProgressStatus {
    /// Map a wire status code to a status. Unrecognised codes map to `Unknown`.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => ProgressStatus::Queued,
            1 => ProgressStatus::Started,
            2 => ProgressStatus::Running,
            3 => ProgressStatus::Waiting,
            4 => ProgressStatus::Finished,
            _ => ProgressStatus::Unknown,
        }
    }

    /// Name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Queued => "Queued",
            ProgressStatus::Started => "Started",
            ProgressStatus::Running => "Running",
            ProgressStatus::Waiting => "Waiting",
            ProgressStatus::Finished => "Finished",
            ProgressStatus::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `p` object of a `P` frame, as sent by the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    /// Status code.
    #[serde(default)]
    pub s: Option<i64>,
    /// Progress made since the last update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<f64>,
    /// Expected total, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<f64>,
    /// Units of `p` and `t`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub u: Option<String>,
}

/// Decoded progress update.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressInfo {
    pub status: ProgressStatus,
    pub status_code: Option<i64>,
    pub progress: Option<f64>,
    pub total: Option<f64>,
    pub units: Option<String>,
}

impl ProgressInfo {
    /// Decode a progress payload. Never fails; a missing or unknown status
    /// code yields [`ProgressStatus::Unknown`].
    pub fn from_payload(payload: &ProgressPayload) -> Self {
        Self {
            status: payload
                .s
                .map(ProgressStatus::from_code)
                .unwrap_or(ProgressStatus::Unknown),
            status_code: payload.s,
            progress: payload.p,
            total: payload.t,
            units: payload.u.clone(),
        }
    }
}

impl From<&ProgressPayload> for ProgressInfo {
    fn from(payload: &ProgressPayload) -> Self {
        Self::from_payload(payload)
    }
}

/// Decode a progress payload.
pub fn to_progress(payload: &ProgressPayload) -> ProgressInfo {
    ProgressInfo::from_payload(payload)
}
