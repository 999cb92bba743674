// Query Execution Engine
// Runs one statement on a leased connection and logs what happened

use crate::db::error::DbError;
use crate::db::traits::Connection;
use crate::db::types::QueryResponse;
use std::time::Instant;

/// Characters of SQL kept in log lines
const PREVIEW_CHARS: usize = 120;

/// Execute one statement. Scripts are not split here; the caller issues one
/// call per statement.
pub async fn run(conn: &mut dyn Connection, sql: &str) -> Result<QueryResponse, DbError> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(DbError::ValidationError("empty SQL statement".to_string()));
    }

    tracing::debug!(sql = %preview(sql), "executing statement");
    let started = Instant::now();

    match conn.query(sql, &[]).await {
        Ok(resp) => {
            tracing::info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                rows = resp.row_count,
                affected = ?resp.affected_rows,
                "statement finished"
            );
            Ok(resp)
        }
        Err(e) => {
            tracing::debug!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %e,
                "statement failed"
            );
            Err(e)
        }
    }
}

/// Single-line SQL excerpt for logs
pub fn preview(sql: &str) -> String {
    let flat: String = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

/// First keyword of a statement, uppercased, skipping comments and parentheses
pub fn leading_keyword(sql: &str) -> Option<String> {
    let mut rest = sql;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
        } else {
            break;
        }
    }

    let word: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    (!word.is_empty()).then(|| word.to_ascii_uppercase())
}

/// Data-changing statement that returns a count rather than rows.
/// `RETURNING`/`OUTPUT` clauses make it row-shaped.
pub fn is_dml(sql: &str) -> bool {
    let is_write = matches!(
        leading_keyword(sql).as_deref(),
        Some("INSERT" | "UPDATE" | "DELETE" | "MERGE")
    );
    is_write
        && !sql
            .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .any(|w| w.eq_ignore_ascii_case("RETURNING") || w.eq_ignore_ascii_case("OUTPUT"))
}
