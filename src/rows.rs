use std::collections::HashMap;
use std::sync::Arc;

use crate::types::SqlValue;

/// Outcome of a `run` (INSERT/UPDATE/DELETE) statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunResult {
    /// Number of rows changed by the statement.
    pub changes: usize,
    /// Rowid of the most recent successful INSERT on the connection.
    pub last_insert_rowid: i64,
}

/// A single materialized row from a query result.
///
/// Column names and the name→index map are shared across every row of one
/// result set, so a `Row` is cheap to move around.
#[derive(Debug, Clone)]
pub struct Row {
    column_names: Arc<Vec<String>>,
    column_index: Arc<HashMap<String, usize>>,
    values: Vec<SqlValue>,
}

impl Row {
    pub(crate) fn new(
        column_names: Arc<Vec<String>>,
        column_index: Arc<HashMap<String, usize>>,
        values: Vec<SqlValue>,
    ) -> Self {
        Self {
            column_names,
            column_index,
            values,
        }
    }

    /// Get a value by column name, or `None` if the column does not exist.
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&SqlValue> {
        self.column_index
            .get(column_name)
            .and_then(|&idx| self.values.get(idx))
    }

    /// Get a value by column position.
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// Column names, in statement order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.column_names
    }

    /// Number of columns in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consume the row, yielding its values in statement order.
    #[must_use]
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}
