//! The canonical record set and its staging-sheet representation.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use intakesync_shared::{
    AMOUNT_HEADER, CanonicalRequestRecord, IntakeSyncError, RequestType, Result,
};
use intakesync_sheets::SheetData;

/// Ordered records of one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordSet {
    records: Vec<CanonicalRequestRecord>,
}

/// A staging row that could not be read back as a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagingIssue {
    /// 1-based sheet row (the header is row 1).
    pub row: usize,
    pub message: String,
}

/// Staging columns a record reads from or writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Column {
    Id,
    Type,
    Title,
    RequestFor,
    Team,
    Notes,
    DueDate,
    Urgency,
    Status,
    Amount,
}

impl Column {
    fn from_header(header: &str) -> Option<Self> {
        let header = header.trim();
        let column = match header.to_ascii_lowercase().as_str() {
            "id" => Self::Id,
            "type" => Self::Type,
            "title" => Self::Title,
            "request for" => Self::RequestFor,
            "team" => Self::Team,
            "notes" => Self::Notes,
            "due date" => Self::DueDate,
            "urgency" => Self::Urgency,
            "status" => Self::Status,
            _ if header.eq_ignore_ascii_case(AMOUNT_HEADER) => Self::Amount,
            _ => return None,
        };
        Some(column)
    }

    fn render(self, record: &CanonicalRequestRecord) -> String {
        match self {
            Self::Id => record.id.to_string(),
            Self::Type => record.request_type.to_string(),
            Self::Title => record.title.clone(),
            Self::RequestFor => record.request_for.clone(),
            Self::Team => record.team.clone(),
            Self::Notes => record.notes.clone(),
            Self::DueDate => record.due_date.clone(),
            Self::Urgency => record.urgency.clone(),
            Self::Status => record.status.clone(),
            Self::Amount => record.amount.clone().unwrap_or_default(),
        }
    }
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: CanonicalRequestRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CanonicalRequestRecord> {
        self.records.iter()
    }

    pub fn get(&self, id: u32) -> Option<&CanonicalRequestRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Render every record as a staging row laid out under `header`.
    ///
    /// Columns the record does not know are left blank.
    pub fn render_rows(&self, header: &[String]) -> Vec<Vec<String>> {
        let columns: Vec<Option<Column>> =
            header.iter().map(|h| Column::from_header(h)).collect();

        self.records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|c| c.map(|c| c.render(record)).unwrap_or_default())
                    .collect()
            })
            .collect()
    }

    /// Read records back from the staging sheet.
    ///
    /// Fails only when the sheet lacks the `ID`, `Type` or `Title` column.
    /// Individual bad rows are skipped and reported alongside the records.
    pub fn from_staging(sheet: &SheetData) -> Result<(Self, Vec<StagingIssue>)> {
        if sheet.headers.is_empty() {
            return Ok((Self::new(), Vec::new()));
        }

        let mut index: HashMap<Column, usize> = HashMap::new();
        for (i, header) in sheet.headers.iter().enumerate() {
            if let Some(column) = Column::from_header(header) {
                index.entry(column).or_insert(i);
            }
        }
        for (column, name) in [
            (Column::Id, "ID"),
            (Column::Type, "Type"),
            (Column::Title, "Title"),
        ] {
            if !index.contains_key(&column) {
                return Err(IntakeSyncError::validation(format!(
                    "staging sheet has no '{name}' column"
                )));
            }
        }

        let mut set = Self::new();
        let mut issues = Vec::new();
        let mut seen = HashSet::new();

        for (i, row) in sheet.rows.iter().enumerate() {
            let sheet_row = i + 2;
            if row.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            let cell = |column: Column| cell_at(row, &index, column);

            let parsed = parse_id(cell(Column::Id)).and_then(|id| {
                let request_type: RequestType = cell(Column::Type).parse()?;
                Ok((id, request_type))
            });
            let (id, request_type) = match parsed {
                Ok(v) => v,
                Err(e) => {
                    debug!(row = sheet_row, error = %e, "invalid staging row");
                    issues.push(StagingIssue {
                        row: sheet_row,
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            if !seen.insert(id) {
                issues.push(StagingIssue {
                    row: sheet_row,
                    message: format!("duplicate ID {id}"),
                });
                continue;
            }

            let mut record = CanonicalRequestRecord::new(
                id,
                request_type,
                cell(Column::Title),
                cell(Column::RequestFor),
                cell(Column::Team),
            );
            record.notes = cell(Column::Notes).to_string();
            record.due_date = cell(Column::DueDate).to_string();
            record.urgency = cell(Column::Urgency).to_string();
            record.status = cell(Column::Status).to_string();
            let amount = cell(Column::Amount);
            if !amount.is_empty() {
                record.amount = Some(amount.to_string());
            }
            set.push(record);
        }

        Ok((set, issues))
    }

    /// Carry human-entered fields over from `previous` by id.
    ///
    /// Returns how many records picked up at least one value.
    pub fn merge_manual_fields(&mut self, previous: &RecordSet) -> usize {
        let mut merged = 0;
        for record in &mut self.records {
            let Some(old) = previous.get(record.id) else {
                continue;
            };
            let mut touched = false;
            for (field, value) in [
                (&mut record.notes, &old.notes),
                (&mut record.due_date, &old.due_date),
                (&mut record.urgency, &old.urgency),
                (&mut record.status, &old.status),
            ] {
                if field.is_empty() && !value.is_empty() {
                    field.clone_from(value);
                    touched = true;
                }
            }
            if record.amount.is_none() && old.amount.is_some() {
                record.amount.clone_from(&old.amount);
                touched = true;
            }
            if touched {
                merged += 1;
            }
        }
        merged
    }
}

impl FromIterator<CanonicalRequestRecord> for RecordSet {
    fn from_iter<I: IntoIterator<Item = CanonicalRequestRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

fn cell_at<'a>(row: &'a [String], index: &HashMap<Column, usize>, column: Column) -> &'a str {
    index
        .get(&column)
        .and_then(|&idx| row.get(idx))
        .map(|v| v.trim())
        .unwrap_or_default()
}

/// Parse a staging `ID` cell. Spreadsheets often export integers as `3.0`.
fn parse_id(raw: &str) -> Result<u32> {
    if raw.is_empty() {
        return Err(IntakeSyncError::validation("missing ID"));
    }
    let value: f64 = raw
        .parse()
        .map_err(|_| IntakeSyncError::validation(format!("ID '{raw}' is not a number")))?;
    if value.fract() != 0.0 || value < 1.0 || value > f64::from(u32::MAX) {
        return Err(IntakeSyncError::validation(format!(
            "ID '{raw}' is not a positive integer"
        )));
    }
    Ok(value as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use intakesync_shared::STAGING_HEADERS;

    fn staging_header() -> Vec<String> {
        STAGING_HEADERS.iter().map(|s| s.to_string()).collect()
    }

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    fn sample() -> RecordSet {
        [
            CanonicalRequestRecord::new(1, RequestType::Reimbursement, "Taxi", "Ada", "Ops"),
            CanonicalRequestRecord::new(3, RequestType::Invoice, "Acme", "Bo", "Sponsorships"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn renders_in_header_order() {
        let rows = sample().render_rows(&staging_header());
        assert_eq!(
            rows[1],
            row(&["3", "Invoice", "Acme", "Bo", "Sponsorships", "", "", "", ""])
        );
    }

    #[test]
    fn renders_against_custom_header() {
        let mut set = sample();
        set.records[0].amount = Some("12.50".into());
        let header = row(&["Title", "Amount", "Approver", "ID"]);
        let rows = set.render_rows(&header);
        assert_eq!(rows[0], row(&["Taxi", "12.50", "", "1"]));
    }

    #[test]
    fn staging_roundtrip() {
        let header = staging_header();
        let sheet = SheetData {
            headers: header.clone(),
            rows: sample().render_rows(&header),
        };
        let (set, issues) = RecordSet::from_staging(&sheet).expect("parse");
        assert!(issues.is_empty());
        assert_eq!(set, sample());
    }

    #[test]
    fn staging_reports_bad_rows() {
        let sheet = SheetData {
            headers: row(&["ID", "Type", "Title", "Amount"]),
            rows: vec![
                row(&["2.0", "Reimbursement", "Taxi", "$5"]),
                row(&["", "", "", ""]),
                row(&["abc", "Invoice", "X", ""]),
                row(&["4", "Grant", "Y", ""]),
                row(&["0", "Invoice", "Z", ""]),
                row(&["2", "Invoice", "Dup", ""]),
            ],
        };
        let (set, issues) = RecordSet::from_staging(&sheet).expect("parse");

        assert_eq!(set.len(), 1);
        let rec = set.get(2).expect("id 2");
        assert_eq!(rec.amount.as_deref(), Some("$5"));

        let rows: Vec<usize> = issues.iter().map(|i| i.row).collect();
        assert_eq!(rows, vec![4, 5, 6, 7]);
        assert!(issues[3].message.contains("duplicate"));
    }

    #[test]
    fn staging_requires_key_columns() {
        let sheet = SheetData {
            headers: row(&["ID", "Title"]),
            rows: vec![],
        };
        let err = RecordSet::from_staging(&sheet).unwrap_err();
        assert!(err.to_string().contains("Type"));

        let (set, _) = RecordSet::from_staging(&SheetData::default()).expect("empty");
        assert!(set.is_empty());
    }

    #[test]
    fn merge_keeps_manual_fields() {
        let mut previous = sample();
        previous.records[1].notes = "call first".into();
        previous.records[1].status = "Approved".into();
        previous.records[1].amount = Some("250".into());

        let mut fresh = sample();
        fresh.records[1].title = "Acme Corp".into();
        let merged = fresh.merge_manual_fields(&previous);

        assert_eq!(merged, 1);
        let rec = fresh.get(3).expect("id 3");
        assert_eq!(rec.title, "Acme Corp");
        assert_eq!(rec.notes, "call first");
        assert_eq!(rec.status, "Approved");
        assert_eq!(rec.amount.as_deref(), Some("250"));
        assert!(fresh.get(1).expect("id 1").notes.is_empty());
    }
}
