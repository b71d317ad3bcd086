//!
//! tabletalk query gate & executor
//! -------------------------------
//! Decides whether a generated SQL statement may run, and runs it if so.
//! The gate is a cheap textual check, not a SQL parser: the statement must
//! be non-blank, not flagged as a modification, and start with `select`
//! after trimming and lower-casing. A blocked statement is a deliberate
//! no-op, not an error; the caller still returns the generated text.
//!
//! Engine failures are contained here: a bad AI-written query becomes an
//! `{ "error": ... }` value in the response body rather than a request
//! failure, so the user always sees the SQL and explanation that produced it.

use serde::Serialize;
use tracing::debug;

use crate::extract::GeneratedQuery;
use crate::store::{Row, TableStore};

/// Result of executing a gated query. Serializes as either the row array or
/// an `{ "error": message }` object.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum QueryOutcome {
    Rows(Vec<Row>),
    Failed { error: String },
}

/// True when the command's SQL passes every gate condition.
pub fn is_runnable(cmd: &GeneratedQuery) -> bool {
    if cmd.is_modification {
        return false;
    }
    let sql = cmd.sql.trim();
    !sql.is_empty() && sql.to_lowercase().starts_with("select")
}

/// Run the command against the store if the gate allows it.
///
/// Returns `None` when the gate blocks execution, `Some(outcome)` otherwise.
pub fn run_gated(store: &TableStore, cmd: &GeneratedQuery) -> Option<QueryOutcome> {
    if !is_runnable(cmd) {
        debug!(target: "tabletalk::gate", "blocked: is_modification={} sql='{}'",
            cmd.is_modification, cmd.sql.trim());
        return None;
    }
    match store.query(cmd.sql.trim()) {
        Ok(rows) => Some(QueryOutcome::Rows(rows)),
        Err(e) => {
            debug!(target: "tabletalk::gate", "engine rejected generated sql: {}", e.message);
            Some(QueryOutcome::Failed { error: e.message })
        }
    }
}
