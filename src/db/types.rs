// Value Model
// Engine-agnostic cell values and result sets shared by every driver

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single cell of a result set.
///
/// Serialized adjacently tagged, e.g. `{"type": "Int", "value": 1}` and
/// `{"type": "Null"}`, which is the shape the UI decodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// ISO-8601 text (`2024-01-31T08:00:00`, `2024-01-31`, `08:00:00`)
    Timestamp(String),
    Binary(Vec<u8>),
    Json(String),
}

impl CellValue {
    /// Float that stays representable in JSON; NaN and infinities become text.
    pub fn float(value: f64) -> Self {
        if value.is_finite() {
            CellValue::Float(value)
        } else {
            CellValue::Text(value.to_string())
        }
    }

    /// Integer wider than i64 (u64, i128, ...) falls back to its decimal text.
    pub fn wide_int<T>(value: T) -> Self
    where
        T: TryInto<i64> + fmt::Display + Copy,
    {
        match value.try_into() {
            Ok(v) => CellValue::Int(v),
            Err(_) => CellValue::Text(value.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Text-like payload, if the variant carries one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) | CellValue::Timestamp(s) | CellValue::Json(s) => Some(s),
            _ => None,
        }
    }
}

/// Printed form shared by every exporter. Depends on the variant only.
impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => f.write_str("NULL"),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Float(v) => {
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            CellValue::Text(s) | CellValue::Timestamp(s) | CellValue::Json(s) => f.write_str(s),
            CellValue::Binary(bytes) => {
                f.write_str("0x")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// Result column: name plus the engine's own type name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Normalized result of one statement.
///
/// Row-shaped results carry `columns`/`rows` and a null `affected_rows`;
/// DML results carry empty `columns`/`rows` and `affected_rows`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Vec<CellValue>>,
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub affected_rows: Option<u64>,
}

impl QueryResponse {
    pub fn with_rows(columns: Vec<ColumnDef>, rows: Vec<Vec<CellValue>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        Self {
            row_count: rows.len(),
            columns,
            rows,
            execution_time_ms: 0,
            affected_rows: None,
        }
    }

    pub fn affected(count: u64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            execution_time_ms: 0,
            affected_rows: Some(count),
        }
    }

    pub fn elapsed(mut self, started: std::time::Instant) -> Self {
        self.execution_time_ms = started.elapsed().as_millis() as u64;
        self
    }

    pub fn is_row_shaped(&self) -> bool {
        self.affected_rows.is_none()
    }

    /// Index of a column by case-insensitive name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Bind value handed to a driver. Everything the UI sends is text; the
/// engine casts it to the target column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Null,
    Text(String),
}

impl SqlParam {
    pub fn as_deref(&self) -> Option<&str> {
        match self {
            SqlParam::Null => None,
            SqlParam::Text(s) => Some(s),
        }
    }
}

impl From<&str> for SqlParam {
    fn from(s: &str) -> Self {
        SqlParam::Text(s.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(s: String) -> Self {
        SqlParam::Text(s)
    }
}

impl From<Option<String>> for SqlParam {
    fn from(value: Option<String>) -> Self {
        value.map(SqlParam::Text).unwrap_or(SqlParam::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_value_wire_shape() {
        let json = serde_json::to_value(CellValue::Int(1)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "Int", "value": 1}));

        let json = serde_json::to_value(CellValue::Null).unwrap();
        assert_eq!(json, serde_json::json!({"type": "Null"}));

        let back: CellValue =
            serde_json::from_value(serde_json::json!({"type": "Text", "value": "a"})).unwrap();
        assert_eq!(back, CellValue::Text("a".to_string()));
    }

    #[test]
    fn test_display_depends_on_variant_only() {
        assert_eq!(CellValue::Null.to_string(), "NULL");
        assert_eq!(CellValue::Float(1.0).to_string(), "1.0");
        assert_eq!(CellValue::Float(1.5).to_string(), "1.5");
        assert_eq!(CellValue::Bool(true).to_string(), "true");
        assert_eq!(CellValue::Binary(vec![0xde, 0xad]).to_string(), "0xdead");
        assert_eq!(CellValue::Timestamp("2024-01-01".into()).to_string(), "2024-01-01");
    }

    #[test]
    fn test_non_finite_float_becomes_text() {
        assert!(matches!(CellValue::float(f64::NAN), CellValue::Text(_)));
        assert_eq!(CellValue::float(2.5), CellValue::Float(2.5));
    }

    #[test]
    fn test_wide_int_overflow() {
        assert_eq!(CellValue::wide_int(7u64), CellValue::Int(7));
        assert_eq!(
            CellValue::wide_int(u64::MAX),
            CellValue::Text("18446744073709551615".to_string())
        );
    }

    #[test]
    fn test_query_response_shapes() {
        let resp = QueryResponse::with_rows(
            vec![ColumnDef::new("x", "int4")],
            vec![vec![CellValue::Int(1)]],
        );
        assert_eq!(resp.row_count, 1);
        assert!(resp.is_row_shaped());

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["columns"][0]["data_type"], "int4");
        assert_eq!(json["rows"][0][0]["value"], 1);
        assert!(json["affected_rows"].is_null());

        let dml = QueryResponse::affected(3);
        assert!(dml.columns.is_empty() && dml.rows.is_empty());
        assert_eq!(dml.affected_rows, Some(3));
    }
}
