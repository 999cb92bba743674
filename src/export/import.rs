// CSV Import
// Parses delimited text and inserts it row by row, collecting per-row failures

use crate::db::error::DbError;
use crate::db::manager::ConnectionManager;
use crate::db::types::SqlParam;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Outcome of an import. Row failures are data, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    pub rows_imported: u64,
    pub rows_failed: u64,
    pub errors: Vec<String>,
}

/// One parsed field. Quoted fields never read as NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    text: String,
    quoted: bool,
}

impl Field {
    fn into_param(self) -> SqlParam {
        if !self.quoted && (self.text.is_empty() || self.text == "NULL") {
            SqlParam::Null
        } else {
            SqlParam::Text(self.text)
        }
    }
}

/// Import `path` into `schema.table`. The header row names the target columns.
pub async fn import_csv(
    manager: &ConnectionManager,
    handle: &str,
    schema: &str,
    table: &str,
    path: &Path,
) -> Result<ImportResult, DbError> {
    // Stale handles fail before the file is read
    manager.get(handle).await?;

    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| DbError::IoError(format!("{}: {}", path.display(), e)))?;
    let input = raw.strip_prefix('\u{feff}').unwrap_or(&raw);

    let mut records = parse_records(input, detect_delimiter(input))?.into_iter();
    let header: Vec<String> = records
        .next()
        .ok_or_else(|| DbError::ValidationError("CSV file is empty".to_string()))?
        .into_iter()
        .map(|f| f.text.trim().to_string())
        .collect();
    if header.iter().any(|name| name.is_empty()) {
        return Err(DbError::ValidationError(
            "CSV header contains an empty column name".to_string(),
        ));
    }

    tracing::info!(
        handle = %handle,
        table = %table,
        columns = header.len(),
        path = %path.display(),
        "importing CSV"
    );

    let mut result = ImportResult::default();
    for (index, record) in records.enumerate() {
        let row_number = index + 1;
        let values: Vec<SqlParam> = record.into_iter().map(Field::into_param).collect();

        match manager.insert_row(handle, schema, table, &header, &values).await {
            Ok(_) => result.rows_imported += 1,
            // Losing the session ends the import
            Err(e @ (DbError::UnknownConnection(_) | DbError::Cancelled(_))) => return Err(e),
            Err(e) => {
                result.rows_failed += 1;
                result.errors.push(format!("row {}: {}", row_number, e.message()));
            }
        }
    }

    if result.rows_failed > 0 {
        let summary = DbError::PartialFailure(format!(
            "{} of {} rows failed",
            result.rows_failed,
            result.rows_failed + result.rows_imported
        ));
        tracing::warn!(handle = %handle, table = %table, error = %summary, "import finished with failures");
    } else {
        tracing::info!(handle = %handle, table = %table, rows = result.rows_imported, "import finished");
    }
    Ok(result)
}

/// Tab-separated when the header line holds a tab
fn detect_delimiter(input: &str) -> char {
    let header = input.lines().next().unwrap_or("");
    if header.contains('\t') {
        '\t'
    } else {
        ','
    }
}

/// RFC 4180 records. Quoted fields may span lines; blank lines are skipped.
fn parse_records(input: &str, delimiter: char) -> Result<Vec<Vec<Field>>, DbError> {
    let mut records = Vec::new();
    let mut record: Vec<Field> = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut line = 1usize;
    let mut quote_line = 0usize;

    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => {
                    if c == '\n' {
                        line += 1;
                    }
                    field.push(c);
                }
            }
            continue;
        }

        match c {
            '"' if field.is_empty() && !quoted => {
                in_quotes = true;
                quoted = true;
                quote_line = line;
            }
            c if c == delimiter => {
                record.push(Field {
                    text: std::mem::take(&mut field),
                    quoted,
                });
                quoted = false;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                line += 1;
                end_record(&mut records, &mut record, &mut field, &mut quoted);
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(DbError::ValidationError(format!(
            "unterminated quoted field starting on line {}",
            quote_line
        )));
    }
    end_record(&mut records, &mut record, &mut field, &mut quoted);
    Ok(records)
}

fn end_record(
    records: &mut Vec<Vec<Field>>,
    record: &mut Vec<Field>,
    field: &mut String,
    quoted: &mut bool,
) {
    let blank_line = record.is_empty() && field.is_empty() && !*quoted;
    if !blank_line {
        record.push(Field {
            text: std::mem::take(field),
            quoted: *quoted,
        });
        records.push(std::mem::take(record));
    }
    *quoted = false;
}
