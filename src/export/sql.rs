// SQL Export Engine
// One INSERT statement per row, rendered with the target dialect's literals

use super::{ExportError, RowWriter};
use crate::db::dialect::Dialect;
use crate::db::types::{CellValue, ColumnDef};
use std::io::Write;

/// Table named in the generated statements when the caller gives none
pub const FALLBACK_TABLE: &str = "export";

/// INSERT script writer over any byte sink
pub struct SqlExporter<W: Write> {
    out: W,
    dialect: &'static dyn Dialect,
    table: String,
    column_list: String,
}

impl<W: Write> SqlExporter<W> {
    /// `table` is used verbatim, so qualify and quote it first (see [`target_table`])
    pub fn new(out: W, dialect: &'static dyn Dialect, table: &str) -> Self {
        Self {
            out,
            dialect,
            table: table.to_string(),
            column_list: String::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RowWriter for SqlExporter<W> {
    fn begin(&mut self, columns: &[ColumnDef]) -> Result<(), ExportError> {
        self.column_list = columns
            .iter()
            .map(|c| self.dialect.quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(())
    }

    fn write_row(&mut self, row: &[CellValue]) -> Result<(), ExportError> {
        let values: Vec<String> = row.iter().map(|cell| literal(self.dialect, cell)).collect();
        writeln!(
            self.out,
            "INSERT INTO {} ({}) VALUES ({});",
            self.table,
            self.column_list,
            values.join(", ")
        )?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ExportError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Qualified, quoted table name for an export target
pub fn target_table(dialect: &dyn Dialect, schema: Option<&str>, table: Option<&str>) -> String {
    let table = table.filter(|t| !t.is_empty()).unwrap_or(FALLBACK_TABLE);
    dialect.qualify(schema.unwrap_or(""), table)
}

/// SQL literal for a cell
pub fn literal(dialect: &dyn Dialect, value: &CellValue) -> String {
    match value {
        CellValue::Null => "NULL".to_string(),
        CellValue::Bool(b) => dialect.bool_literal(*b),
        CellValue::Int(i) => i.to_string(),
        CellValue::Float(_) => value.to_string(),
        CellValue::Text(s) | CellValue::Timestamp(s) | CellValue::Json(s) => {
            dialect.string_literal(s)
        }
        CellValue::Binary(bytes) => dialect.binary_literal(bytes),
    }
}
