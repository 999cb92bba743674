// CSV Export Engine
// RFC 4180 output; NULL is an unquoted empty field

use super::{ExportError, ExportOptions, RowWriter};
use crate::db::types::{CellValue, ColumnDef};
use std::io::Write;

/// CSV writer over any byte sink
pub struct CsvExporter<W: Write> {
    out: W,
    delimiter: char,
    include_headers: bool,
}

impl<W: Write> CsvExporter<W> {
    pub fn new(out: W, options: &ExportOptions) -> Result<Self, ExportError> {
        Ok(Self {
            out,
            delimiter: options.delimiter()?,
            include_headers: options.include_headers,
        })
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_record(&mut self, fields: impl Iterator<Item = String>) -> Result<(), ExportError> {
        let mut line = String::new();
        for (i, field) in fields.enumerate() {
            if i > 0 {
                line.push(self.delimiter);
            }
            line.push_str(&field);
        }
        line.push('\n');
        self.out.write_all(line.as_bytes())?;
        Ok(())
    }

    fn format_cell(&self, value: &CellValue) -> String {
        match value {
            CellValue::Null => String::new(),
            // Quoted so they do not read back as NULL
            CellValue::Text(s) if s.is_empty() || s == "NULL" => format!("\"{}\"", s),
            other => escape_field(&other.to_string(), self.delimiter),
        }
    }
}

impl<W: Write> RowWriter for CsvExporter<W> {
    fn begin(&mut self, columns: &[ColumnDef]) -> Result<(), ExportError> {
        if self.include_headers {
            let delimiter = self.delimiter;
            self.write_record(columns.iter().map(|c| escape_field(&c.name, delimiter)))?;
        }
        Ok(())
    }

    fn write_row(&mut self, row: &[CellValue]) -> Result<(), ExportError> {
        let fields: Vec<String> = row.iter().map(|cell| self.format_cell(cell)).collect();
        self.write_record(fields.into_iter())
    }

    fn finish(&mut self) -> Result<(), ExportError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Quote a field when it holds the delimiter, a quote or a line break
pub fn escape_field(value: &str, delimiter: char) -> String {
    let needs_quoting = value.contains(delimiter)
        || value.contains('"')
        || value.contains('\n')
        || value.contains('\r');

    if needs_quoting {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
