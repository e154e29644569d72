use crate::error::DispatchError;
use crate::types::SqlValue;

/// A SQL statement plus the values bound to its `?` placeholders.
///
/// Build one with [`compose`] from interleaved fragments, construct it
/// directly with [`Query::new`], or convert a bare string (no values):
/// ```rust
/// use sqlite_dispatch::{compose, Query, SqlValue};
///
/// let q = compose(
///     &["SELECT * FROM users WHERE id = ", " AND name = ", ""],
///     vec![SqlValue::Int(1), SqlValue::Text("alice".into())],
/// )?;
/// assert_eq!(q.sql, "SELECT * FROM users WHERE id = ? AND name = ?");
///
/// let verbatim: Query = "SELECT count(*) FROM users".into();
/// assert!(verbatim.values.is_empty());
/// # Ok::<(), sqlite_dispatch::DispatchError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Statement text with `?` placeholders.
    pub sql: String,
    /// Values bound positionally to the placeholders.
    pub values: Vec<SqlValue>,
}

impl Query {
    /// Construct a query from pre-composed SQL and its values.
    #[must_use]
    pub fn new(sql: impl Into<String>, values: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            values,
        }
    }
}

impl From<&str> for Query {
    fn from(sql: &str) -> Self {
        Query::new(sql, Vec::new())
    }
}

impl From<String> for Query {
    fn from(sql: String) -> Self {
        Query::new(sql, Vec::new())
    }
}

/// Interleave `values` between `fragments`, emitting a `?` placeholder at
/// each seam.
///
/// The fragments are literal SQL; the values travel out-of-band and are
/// bound positionally by the worker, so their contents are never inspected
/// or spliced into the statement text.
///
/// # Errors
/// Returns [`DispatchError::InvalidQuery`] when `fragments` is empty or
/// `fragments.len() - 1 != values.len()`.
pub fn compose(fragments: &[&str], values: Vec<SqlValue>) -> Result<Query, DispatchError> {
    if fragments.is_empty() {
        return Err(DispatchError::InvalidQuery(
            "expected at least one SQL fragment".into(),
        ));
    }
    if fragments.len() - 1 != values.len() {
        return Err(DispatchError::InvalidQuery(format!(
            "{} fragments require {} values, got {}",
            fragments.len(),
            fragments.len() - 1,
            values.len()
        )));
    }

    if values.is_empty() {
        return Ok(Query::new(fragments.concat(), values));
    }

    let capacity = fragments.iter().map(|f| f.len()).sum::<usize>() + values.len();
    let mut sql = String::with_capacity(capacity);
    sql.push_str(fragments[0]);
    for fragment in &fragments[1..] {
        sql.push('?');
        sql.push_str(fragment);
    }
    Ok(Query::new(sql, values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaves_placeholders_between_fragments() {
        let q = compose(
            &["insert into t values (", ", ", ")"],
            vec![SqlValue::Int(7), SqlValue::Text("x".into())],
        )
        .unwrap();
        assert_eq!(q.sql, "insert into t values (?, ?)");
        assert_eq!(q.values.len(), 2);
    }

    #[test]
    fn trailing_empty_fragment_yields_trailing_placeholder() {
        let q = compose(&["X", ""], vec![SqlValue::Int(1)]).unwrap();
        assert_eq!(q.sql, "X?");
        assert_eq!(q.values, vec![SqlValue::Int(1)]);
    }

    #[test]
    fn single_fragment_passes_through_verbatim() {
        let q = compose(&["select 1"], vec![]).unwrap();
        assert_eq!(q.sql, "select 1");
        assert!(q.values.is_empty());
    }

    #[test]
    fn placeholder_count_matches_value_count() {
        let fragments = ["a = ", " or b = ", " or c = ", ""];
        let values = vec![SqlValue::Int(1), SqlValue::Int(2), SqlValue::Int(3)];
        let q = compose(&fragments, values.clone()).unwrap();
        assert_eq!(q.sql.matches('?').count(), values.len());
        // Removing the placeholders gives back the fragment concatenation
        assert_eq!(q.sql.replace('?', ""), fragments.concat());
    }

    #[test]
    fn empty_fragment_list_is_rejected() {
        assert!(matches!(
            compose(&[], vec![]),
            Err(DispatchError::InvalidQuery(_))
        ));
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        assert!(matches!(
            compose(&["a", "b"], vec![]),
            Err(DispatchError::InvalidQuery(_))
        ));
        assert!(matches!(
            compose(&["a"], vec![SqlValue::Int(1)]),
            Err(DispatchError::InvalidQuery(_))
        ));
    }

    #[test]
    fn values_are_never_spliced_into_sql() {
        let q = compose(
            &["select * from t where name = ", ""],
            vec![SqlValue::Text("'; drop table t; --".into())],
        )
        .unwrap();
        assert_eq!(q.sql, "select * from t where name = ?");
        assert_eq!(q.values[0].as_text().unwrap(), "'; drop table t; --");
    }
}
