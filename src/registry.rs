//!
//! tabletalk schema registry
//! -------------------------
//! Process-wide, request-safe snapshot of the table shapes currently loaded
//! in the store. The registry is the single source of truth handed to the
//! LLM as schema context and echoed back to the caller after an upload.
//!
//! Content is replaced wholesale on each successful ingestion batch; readers
//! never observe a partially updated registry. Two racing replaces leave
//! whichever completed last.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

/// One table's shape: its name and ordered column list.
///
/// Column order matters: it is echoed verbatim into the schema text the LLM
/// sees, so it must match the source file's header order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<String>,
}

impl TableSchema {
    /// Render as `name(col1, col2, ...)`, the exact line format used in the
    /// prompt's schema section.
    pub fn render(&self) -> String {
        format!("{}({})", self.name, self.columns.join(", "))
    }
}

/// Shared handle to the registry. Cloning is cheap; all clones view the same
/// underlying content.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    inner: Arc<RwLock<Vec<TableSchema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically swap the whole registry content. Never merges with prior
    /// state: a new upload batch fully supersedes the previous table set.
    pub fn replace(&self, descriptors: Vec<TableSchema>) {
        *self.inner.write() = descriptors;
    }

    /// Current content, in registry order.
    pub fn snapshot(&self) -> Vec<TableSchema> {
        self.inner.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// One `name(col1, col2, ...)` line per table, joined by newline, in
    /// registry order. This exact text is what the LLM sees.
    pub fn render(&self) -> String {
        let guard = self.inner.read();
        guard.iter().map(TableSchema::render).collect::<Vec<_>>().join("\n")
    }
}
