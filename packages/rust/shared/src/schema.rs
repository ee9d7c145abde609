//! Versioned mapping from intake form columns to canonical record fields.
//!
//! Intake forms get edited: questions are renamed, reordered, or removed. Each
//! [`FieldRule`] names where a canonical field comes from, in priority order:
//! a literal, a primary column label, then a 1-based position in the row's
//! field order. Positional fallbacks read whatever column sits at that index,
//! so they silently return the wrong data if columns move while the primary
//! label is also missing. Keep them explicit here rather than in code.

use serde::{Deserialize, Serialize};

use crate::error::{IntakeSyncError, Result};
use crate::types::RequestType;

/// Current version of the built-in intake mapping.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// A canonical record field that intake columns can populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Title,
    RequestFor,
    Team,
}

impl CanonicalField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::RequestFor => "request_for",
            Self::Team => "team",
        }
    }
}

impl std::fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the mapping table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Canonical field this rule populates.
    pub field: CanonicalField,
    /// Restrict the rule to one request type. `None` applies to both.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_to: Option<RequestType>,
    /// Fixed value; when set, no column is read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,
    /// Expected column label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
    /// 1-based column position used when `primary` is absent from the row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    /// Fail the row when no source resolves. Otherwise the field is left blank.
    #[serde(default)]
    pub required: bool,
}

impl FieldRule {
    fn named(field: CanonicalField, primary: &str, position: Option<usize>) -> Self {
        Self {
            field,
            applies_to: None,
            literal: None,
            primary: Some(primary.into()),
            position,
            required: false,
        }
    }

    fn for_type(mut self, request_type: RequestType) -> Self {
        self.applies_to = Some(request_type);
        self
    }

    fn matches(&self, field: CanonicalField, request_type: RequestType) -> bool {
        self.field == field && self.applies_to.is_none_or(|t| t == request_type)
    }
}

/// Where a resolved value was read from. Used for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    Literal,
    Primary,
    /// Positional fallback: the 1-based index and the header found there.
    Position { index: usize, header: String },
}

/// The complete intake mapping. Fields missing from a config table take
/// their value from [`SchemaMapping::v1`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaMapping {
    pub version: u32,
    /// Label of the question whose answer selects the request type.
    pub discriminant: String,
    /// Answer option meaning "reimbursement".
    pub reimbursement_option: String,
    /// Answer option meaning "invoice". Wins when both options are selected.
    pub invoice_option: String,
    pub fields: Vec<FieldRule>,
}

impl Default for SchemaMapping {
    fn default() -> Self {
        Self::v1()
    }
}

impl SchemaMapping {
    /// The version-1 mapping for the original intake form.
    pub fn v1() -> Self {
        use CanonicalField::*;
        use RequestType::*;

        Self {
            version: 1,
            discriminant: "What request are you making?".into(),
            reimbursement_option: "Reimbursement".into(),
            invoice_option: "Sponsor Invoice".into(),
            fields: vec![
                FieldRule::named(Title, "Description", Some(4)).for_type(Reimbursement),
                FieldRule::named(Title, "Company", Some(10)).for_type(Invoice),
                FieldRule::named(RequestFor, "Full Name", Some(2)),
                FieldRule {
                    field: Team,
                    applies_to: Some(Reimbursement),
                    literal: None,
                    primary: None,
                    position: Some(5),
                    required: false,
                },
                FieldRule {
                    field: Team,
                    applies_to: Some(Invoice),
                    literal: Some("Sponsorships".into()),
                    primary: None,
                    position: None,
                    required: false,
                },
            ],
        }
    }

    /// First rule for `field` that applies to `request_type`.
    pub fn rule_for(&self, field: CanonicalField, request_type: RequestType) -> Option<&FieldRule> {
        self.fields.iter().find(|r| r.matches(field, request_type))
    }

    /// Check the mapping is usable before classifying anything with it.
    pub fn validate(&self) -> Result<()> {
        if self.version == 0 || self.version > CURRENT_SCHEMA_VERSION {
            return Err(IntakeSyncError::config(format!(
                "schema version {} not supported (max {CURRENT_SCHEMA_VERSION})",
                self.version
            )));
        }
        if self.discriminant.trim().is_empty() {
            return Err(IntakeSyncError::config("schema discriminant label is empty"));
        }
        if self.reimbursement_option == self.invoice_option {
            return Err(IntakeSyncError::config(
                "reimbursement and invoice options must differ",
            ));
        }

        for rule in &self.fields {
            if rule.literal.is_none() && rule.primary.is_none() && rule.position.is_none() {
                return Err(IntakeSyncError::config(format!(
                    "rule for '{}' has no literal, primary label, or position",
                    rule.field
                )));
            }
            if rule.position == Some(0) {
                return Err(IntakeSyncError::config(format!(
                    "rule for '{}' uses position 0; positions are 1-based",
                    rule.field
                )));
            }
        }

        for request_type in [RequestType::Reimbursement, RequestType::Invoice] {
            for field in [CanonicalField::Title, CanonicalField::RequestFor] {
                if self.rule_for(field, request_type).is_none() {
                    return Err(IntakeSyncError::config(format!(
                        "no rule maps '{field}' for {request_type} requests"
                    )));
                }
            }
        }
        Ok(())
    }
}
