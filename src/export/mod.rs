// Export Module
// Streams in-memory result sets or live table scans to CSV, JSON and SQL files.
// CSV import and DDL generation live here too.

pub mod csv;
pub mod ddl;
pub mod import;
pub mod json;
pub mod sql;

pub use csv::CsvExporter;
pub use import::{import_csv, ImportResult};
pub use json::JsonExporter;
pub use sql::SqlExporter;

use crate::db::dialect::Dialect;
use crate::db::error::DbError;
use crate::db::manager::ConnectionManager;
use crate::db::types::{CellValue, ColumnDef};
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Output buffer for every file writer
pub const WRITE_BUFFER_BYTES: usize = 64 * 1024;

/// Rows fetched per page when exporting a whole table
pub const DEFAULT_PAGE_SIZE: i64 = 1000;

/// Export format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
    Sql,
}

/// Export options for customizing output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Include column headers (CSV)
    pub include_headers: bool,
    /// Pretty print JSON output
    pub pretty_print: bool,
    /// Delimiter for CSV (default: comma)
    pub delimiter: Option<String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_headers: true,
            pretty_print: false,
            delimiter: Some(",".to_string()),
        }
    }
}

impl ExportOptions {
    pub fn delimiter(&self) -> Result<char, ExportError> {
        let Some(delimiter) = self.delimiter.as_deref() else {
            return Ok(',');
        };
        let mut chars = delimiter.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c != '"' && c != '\n' && c != '\r' => Ok(c),
            _ => Err(ExportError::InvalidOptions(format!(
                "delimiter must be a single character, got {:?}",
                delimiter
            ))),
        }
    }
}

/// Result of one export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub rows_exported: u64,
    pub bytes_written: u64,
}

/// Export errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid export options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Database(#[from] DbError),
}

impl From<ExportError> for DbError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::Database(e) => e,
            ExportError::InvalidOptions(m) => DbError::ValidationError(m),
            ExportError::IoError(e) => DbError::IoError(e.to_string()),
            other => DbError::IoError(other.to_string()),
        }
    }
}

/// Incremental writer for one output format
pub trait RowWriter {
    fn begin(&mut self, columns: &[ColumnDef]) -> Result<(), ExportError>;

    fn write_row(&mut self, row: &[CellValue]) -> Result<(), ExportError>;

    /// Close the document and flush
    fn finish(&mut self) -> Result<(), ExportError>;
}

/// Where exported rows come from
pub enum ExportSource<'a> {
    /// Rows already fetched by the caller
    Rows {
        columns: &'a [ColumnDef],
        rows: &'a [Vec<CellValue>],
    },
    /// Fresh paged scan of a live table, one page in memory at a time
    Table {
        manager: &'a ConnectionManager,
        handle: &'a str,
        schema: &'a str,
        table: &'a str,
        page_size: i64,
    },
}

/// Export `source` to `path`.
///
/// `dialect` and `sql_table` only affect SQL output.
pub async fn export_to_file(
    path: &Path,
    format: ExportFormat,
    options: &ExportOptions,
    dialect: &'static dyn Dialect,
    sql_table: &str,
    source: ExportSource<'_>,
) -> Result<ExportSummary, ExportError> {
    let file = std::fs::File::create(path)?;
    let out = BufWriter::with_capacity(WRITE_BUFFER_BYTES, file);

    let mut writer: Box<dyn RowWriter + Send> = match format {
        ExportFormat::Csv => Box::new(CsvExporter::new(out, options)?),
        ExportFormat::Json => Box::new(JsonExporter::new(out, options.pretty_print)),
        ExportFormat::Sql => Box::new(SqlExporter::new(out, dialect, sql_table)),
    };

    let rows_exported = write_all(writer.as_mut(), source).await?;
    writer.finish()?;
    drop(writer);

    let bytes_written = std::fs::metadata(path)?.len();
    tracing::info!(
        path = %path.display(),
        format = ?format,
        rows = rows_exported,
        bytes = bytes_written,
        "export finished"
    );
    Ok(ExportSummary {
        rows_exported,
        bytes_written,
    })
}

/// Feed every row of `source` through `writer`. Returns the row count.
pub async fn write_all(
    writer: &mut (dyn RowWriter + Send),
    source: ExportSource<'_>,
) -> Result<u64, ExportError> {
    match source {
        ExportSource::Rows { columns, rows } => {
            writer.begin(columns)?;
            for row in rows {
                writer.write_row(row)?;
            }
            Ok(rows.len() as u64)
        }
        ExportSource::Table {
            manager,
            handle,
            schema,
            table,
            page_size,
        } => {
            if page_size <= 0 {
                return Err(ExportError::InvalidOptions(format!(
                    "page size must be positive, got {}",
                    page_size
                )));
            }

            let mut offset = 0i64;
            let mut total = 0u64;
            loop {
                let page = manager
                    .get_table_data(handle, schema, table, page_size, offset)
                    .await?;
                if offset == 0 {
                    writer.begin(&page.columns)?;
                }
                for row in &page.rows {
                    writer.write_row(row)?;
                }
                total += page.rows.len() as u64;
                tracing::debug!(table = %table, offset, rows = page.rows.len(), "exported page");

                if (page.rows.len() as i64) < page_size {
                    return Ok(total);
                }
                offset += page_size;
            }
        }
    }
}

/// Write `text` to `path` through the export buffer
pub fn write_text(path: &Path, text: &str) -> Result<u64, ExportError> {
    let file = std::fs::File::create(path)?;
    let mut out = BufWriter::with_capacity(WRITE_BUFFER_BYTES, file);
    out.write_all(text.as_bytes())?;
    out.flush()?;
    Ok(text.len() as u64)
}
