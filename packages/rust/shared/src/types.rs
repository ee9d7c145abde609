//! Core domain types for IntakeSync requests.

use serde::{Deserialize, Serialize};

use crate::error::{IntakeSyncError, Result};

/// Column headers of the staging sheet, in order.
pub const STAGING_HEADERS: [&str; 9] = [
    "ID",
    "Type",
    "Title",
    "Request For",
    "Team",
    "Notes",
    "Due Date",
    "Urgency",
    "Status",
];

/// Optional staging column read when present. Never written by classification.
pub const AMOUNT_HEADER: &str = "Amount";

// ---------------------------------------------------------------------------
// RequestType
// ---------------------------------------------------------------------------

/// The kind of request an intake row describes.
///
/// There is no third state: rows that match neither type are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    Reimbursement,
    Invoice,
}

impl RequestType {
    /// The select-option name used in the staging sheet and the remote database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reimbursement => "Reimbursement",
            Self::Invoice => "Invoice",
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestType {
    type Err = IntakeSyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "Reimbursement" => Ok(Self::Reimbursement),
            "Invoice" => Ok(Self::Invoice),
            other => Err(IntakeSyncError::validation(format!(
                "unknown request type '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// CanonicalRequestRecord
// ---------------------------------------------------------------------------

/// The normalized unit produced by classification and consumed by sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRequestRecord {
    /// 1-based position of the source row in its intake batch.
    ///
    /// Reassigned every classification run; not stable across batches.
    pub id: u32,
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub title: String,
    /// The requesting person's name.
    pub request_for: String,
    pub team: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub due_date: String,
    #[serde(default)]
    pub urgency: String,
    #[serde(default)]
    pub status: String,
    /// Raw amount text from an optional staging column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
}

impl CanonicalRequestRecord {
    /// A freshly classified record: human-maintained fields start empty.
    pub fn new(
        id: u32,
        request_type: RequestType,
        title: impl Into<String>,
        request_for: impl Into<String>,
        team: impl Into<String>,
    ) -> Self {
        Self {
            id,
            request_type,
            title: title.into(),
            request_for: request_for.into(),
            team: team.into(),
            notes: String::new(),
            due_date: String::new(),
            urgency: String::new(),
            status: String::new(),
            amount: None,
        }
    }
}
