//! Intake classification: one raw form row in, one canonical record (or a
//! reason to drop the row) out.
//!
//! Field extraction is table-driven by [`SchemaMapping`]. The classifier never
//! fails a batch: every fault is contained in the [`RowOutcome`] of its row.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, instrument, warn};

use intakesync_shared::{
    CanonicalField, CanonicalRequestRecord, FieldRule, FieldSource, IntakeSyncError,
    RequestType, Result, SchemaMapping,
};

use crate::records::RecordSet;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Normalize a column label for comparison.
fn normalize_label(label: &str) -> String {
    WHITESPACE
        .replace_all(label.trim(), " ")
        .to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// FieldMap
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    key: String,
    header: String,
    value: String,
}

/// Header → value view of one intake row, in column order.
///
/// Duplicate headers collapse to one entry: it keeps the position of the
/// first occurrence and the value of the last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    fields: Vec<Field>,
}

impl FieldMap {
    /// Pair `headers` with `row`. Cells under a blank header are dropped and
    /// missing cells read as empty.
    pub fn build(headers: &[String], row: &[String]) -> Self {
        let mut fields: Vec<Field> = Vec::with_capacity(headers.len());

        for (i, header) in headers.iter().enumerate() {
            let header = header.trim();
            if header.is_empty() {
                continue;
            }
            let key = normalize_label(header);
            let value = row.get(i).map(|v| v.trim()).unwrap_or_default().to_string();

            match fields.iter_mut().find(|f| f.key == key) {
                Some(existing) => existing.value = value,
                None => fields.push(Field {
                    key,
                    header: header.to_string(),
                    value,
                }),
            }
        }

        Self { fields }
    }

    /// Value under `label`, compared case-insensitively with collapsed whitespace.
    pub fn get(&self, label: &str) -> Option<&str> {
        let key = normalize_label(label);
        self.fields
            .iter()
            .find(|f| f.key == key)
            .map(|f| f.value.as_str())
    }

    /// Header and value at 1-based `position`.
    pub fn at(&self, position: usize) -> Option<(&str, &str)> {
        position
            .checked_sub(1)
            .and_then(|i| self.fields.get(i))
            .map(|f| (f.header.as_str(), f.value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of classifying a single row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Classified(CanonicalRequestRecord),
    /// The row is not a request this system handles.
    Discarded { position: u32, reason: String },
    /// The row looked like a request but could not be normalized.
    Failed { position: u32, error: String },
}

/// A row that did not produce a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowIssue {
    pub position: u32,
    pub message: String,
}

/// Result of classifying a batch.
#[derive(Debug, Clone, Default)]
pub struct ClassifyReport {
    pub records: RecordSet,
    pub discarded: Vec<RowIssue>,
    pub failed: Vec<RowIssue>,
}

impl ClassifyReport {
    /// Rows looked at, whatever their outcome.
    pub fn total(&self) -> usize {
        self.records.len() + self.discarded.len() + self.failed.len()
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Classifies intake rows with a fixed [`SchemaMapping`].
#[derive(Debug, Clone)]
pub struct Classifier {
    mapping: SchemaMapping,
}

impl Classifier {
    pub fn new(mapping: SchemaMapping) -> Result<Self> {
        mapping.validate()?;
        Ok(Self { mapping })
    }

    pub fn mapping(&self) -> &SchemaMapping {
        &self.mapping
    }

    /// Classify the row at 1-based `position` of its batch.
    pub fn classify(&self, headers: &[String], row: &[String], position: u32) -> RowOutcome {
        let fields = FieldMap::build(headers, row);

        let Some(request_type) = self.request_type(&fields) else {
            let answer = fields.get(&self.mapping.discriminant).unwrap_or_default();
            debug!(position, answer, "row discarded");
            return RowOutcome::Discarded {
                position,
                reason: if answer.is_empty() {
                    "no request type selected".to_string()
                } else {
                    format!("unrecognized request type '{answer}'")
                },
            };
        };

        match self.build_record(&fields, request_type, position) {
            Ok(record) => {
                debug!(position, %request_type, title = %record.title, "row classified");
                RowOutcome::Classified(record)
            }
            Err(e) => {
                warn!(position, error = %e, "row failed classification");
                RowOutcome::Failed {
                    position,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Classify every row, numbering them from 1.
    #[instrument(skip_all, fields(rows = rows.len()))]
    pub fn classify_batch(&self, headers: &[String], rows: &[Vec<String>]) -> ClassifyReport {
        let mut report = ClassifyReport::default();

        for (i, row) in rows.iter().enumerate() {
            let position = u32::try_from(i + 1).unwrap_or(u32::MAX);
            match self.classify(headers, row, position) {
                RowOutcome::Classified(record) => report.records.push(record),
                RowOutcome::Discarded { position, reason } => report.discarded.push(RowIssue {
                    position,
                    message: reason,
                }),
                RowOutcome::Failed { position, error } => report.failed.push(RowIssue {
                    position,
                    message: error,
                }),
            }
        }

        info!(
            classified = report.records.len(),
            discarded = report.discarded.len(),
            failed = report.failed.len(),
            "classification complete"
        );
        report
    }

    /// Decide the request type from the discriminant answer.
    ///
    /// Multi-choice answers arrive comma-separated. The invoice option wins
    /// when both are selected.
    fn request_type(&self, fields: &FieldMap) -> Option<RequestType> {
        let answer = fields.get(&self.mapping.discriminant)?;
        let selected = |option: &str| {
            answer
                .split(',')
                .any(|choice| choice.trim().eq_ignore_ascii_case(option.trim()))
        };

        if selected(&self.mapping.invoice_option) {
            Some(RequestType::Invoice)
        } else if selected(&self.mapping.reimbursement_option) {
            Some(RequestType::Reimbursement)
        } else {
            None
        }
    }

    fn build_record(
        &self,
        fields: &FieldMap,
        request_type: RequestType,
        position: u32,
    ) -> Result<CanonicalRequestRecord> {
        let title = self.field(fields, CanonicalField::Title, request_type, position)?;
        let request_for = self.field(fields, CanonicalField::RequestFor, request_type, position)?;
        let team = self.field(fields, CanonicalField::Team, request_type, position)?;

        Ok(CanonicalRequestRecord::new(
            position,
            request_type,
            title,
            request_for,
            team,
        ))
    }

    /// Resolve one canonical field, enforcing `required` rules.
    fn field(
        &self,
        fields: &FieldMap,
        field: CanonicalField,
        request_type: RequestType,
        position: u32,
    ) -> Result<String> {
        let Some(rule) = self.mapping.rule_for(field, request_type) else {
            return Ok(String::new());
        };

        match resolve(rule, fields) {
            Some((value, source)) => {
                if let FieldSource::Position { index, header } = &source {
                    debug!(
                        position,
                        %field,
                        column = index,
                        header = %header,
                        "positional fallback used"
                    );
                }
                Ok(value)
            }
            None if rule.required => Err(IntakeSyncError::classification(format!(
                "row {position}: no column supplies required field '{field}'"
            ))),
            None => {
                warn!(position, %field, "no column supplies field, leaving it blank");
                Ok(String::new())
            }
        }
    }
}

/// Apply one rule: literal, then primary label, then position.
fn resolve(rule: &FieldRule, fields: &FieldMap) -> Option<(String, FieldSource)> {
    if let Some(literal) = &rule.literal {
        return Some((literal.clone(), FieldSource::Literal));
    }
    if let Some(label) = &rule.primary {
        if let Some(value) = fields.get(label) {
            return Some((value.to_string(), FieldSource::Primary));
        }
    }
    let index = rule.position?;
    let (header, value) = fields.at(index)?;
    Some((
        value.to_string(),
        FieldSource::Position {
            index,
            header: header.to_string(),
        },
    ))
}
