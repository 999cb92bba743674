// JSON Export Engine
// Array of objects keyed by column name, written one row at a time

use super::{ExportError, RowWriter};
use crate::db::types::{CellValue, ColumnDef};
use serde_json::{json, Map, Value};
use std::io::Write;

/// JSON writer over any byte sink
pub struct JsonExporter<W: Write> {
    out: W,
    pretty_print: bool,
    columns: Vec<String>,
    rows_written: usize,
}

impl<W: Write> JsonExporter<W> {
    pub fn new(out: W, pretty_print: bool) -> Self {
        Self {
            out,
            pretty_print,
            columns: Vec::new(),
            rows_written: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn row_to_json_object(&self, row: &[CellValue]) -> Value {
        let mut obj = Map::new();
        for (name, value) in self.columns.iter().zip(row.iter()) {
            obj.insert(name.clone(), cell_to_json_value(value));
        }
        Value::Object(obj)
    }
}

impl<W: Write> RowWriter for JsonExporter<W> {
    fn begin(&mut self, columns: &[ColumnDef]) -> Result<(), ExportError> {
        self.columns = columns.iter().map(|c| c.name.clone()).collect();
        self.out.write_all(b"[")?;
        Ok(())
    }

    fn write_row(&mut self, row: &[CellValue]) -> Result<(), ExportError> {
        let obj = self.row_to_json_object(row);
        let json_str = if self.pretty_print {
            serde_json::to_string_pretty(&obj)
        } else {
            serde_json::to_string(&obj)
        }
        .map_err(|e| ExportError::SerializationError(e.to_string()))?;

        if self.rows_written > 0 {
            self.out.write_all(b",")?;
        }
        if self.pretty_print {
            for line in json_str.lines() {
                write!(self.out, "\n  {}", line)?;
            }
        } else {
            self.out.write_all(json_str.as_bytes())?;
        }
        self.rows_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ExportError> {
        if self.pretty_print && self.rows_written > 0 {
            self.out.write_all(b"\n")?;
        }
        self.out.write_all(b"]\n")?;
        self.out.flush()?;
        Ok(())
    }
}

/// Plain JSON scalar for a cell. `Json` cells are embedded when they parse.
pub fn cell_to_json_value(value: &CellValue) -> Value {
    match value {
        CellValue::Null => Value::Null,
        CellValue::Bool(b) => Value::Bool(*b),
        CellValue::Int(i) => json!(*i),
        CellValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        CellValue::Json(s) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
        CellValue::Text(s) | CellValue::Timestamp(s) => Value::String(s.clone()),
        CellValue::Binary(_) => Value::String(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", "int4"),
            ColumnDef::new("name", "nvarchar"),
            ColumnDef::new("active", "bit"),
        ]
    }

    fn sample_rows() -> Vec<Vec<CellValue>> {
        vec![
            vec![
                CellValue::Int(1),
                CellValue::Text("Alice".to_string()),
                CellValue::Bool(true),
            ],
            vec![
                CellValue::Int(2),
                CellValue::Text("Bob".to_string()),
                CellValue::Null,
            ],
        ]
    }

    fn render(pretty: bool, columns: &[ColumnDef], rows: &[Vec<CellValue>]) -> String {
        let mut exporter = JsonExporter::new(Vec::new(), pretty);
        exporter.begin(columns).unwrap();
        for row in rows {
            exporter.write_row(row).unwrap();
        }
        exporter.finish().unwrap();
        String::from_utf8(exporter.into_inner()).unwrap()
    }

    #[test]
    fn test_json_export_basic() {
        let json = render(false, &sample_columns(), &sample_rows());

        let parsed: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 2);

        assert_eq!(parsed[0]["id"], 1);
        assert_eq!(parsed[0]["name"], "Alice");
        assert_eq!(parsed[0]["active"], true);

        assert_eq!(parsed[1]["id"], 2);
        assert_eq!(parsed[1]["name"], "Bob");
        assert!(parsed[1]["active"].is_null());
    }

    #[test]
    fn test_json_export_pretty_print() {
        let json = render(true, &sample_columns(), &sample_rows());

        assert!(json.contains("\n  {"));
        let parsed: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn test_empty_result_is_empty_array() {
        assert_eq!(render(false, &sample_columns(), &[]), "[]\n");
        assert_eq!(render(true, &sample_columns(), &[]), "[]\n");
    }

    #[test]
    fn test_json_cells_are_embedded() {
        assert_eq!(
            cell_to_json_value(&CellValue::Json(r#"{"a":[1,2]}"#.to_string())),
            json!({"a": [1, 2]})
        );
        assert_eq!(
            cell_to_json_value(&CellValue::Json("not json".to_string())),
            json!("not json")
        );
        assert_eq!(cell_to_json_value(&CellValue::Binary(vec![1, 255])), json!("0x01ff"));
        assert_eq!(cell_to_json_value(&CellValue::Float(1.5)), json!(1.5));
    }
}
