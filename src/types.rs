use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;
use std::fmt::Write;

/// Values that can be bound to a `?` placeholder or read back from a row.
///
/// The same enum is used for parameters and results so helper code never
/// branches on driver types:
/// ```rust
/// use sqlite_dispatch::SqlValue;
///
/// let params = vec![
///     SqlValue::Int(1),
///     SqlValue::Text("alice".into()),
///     SqlValue::Bool(true),
/// ];
/// # let _ = params;
/// ```
///
/// `Bool`, `Timestamp` and `Json` are binding conveniences: they are stored
/// as INTEGER/TEXT and come back as `Int`/`Text` when read.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value, bound as 0/1
    Bool(bool),
    /// Timestamp value, bound as `YYYY-MM-DD HH:MM:SS.SSS` text
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// JSON value, bound as serialized text
    Json(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        if let SqlValue::Int(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let SqlValue::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(value) => Some(*value),
            SqlValue::Int(0) => Some(false),
            SqlValue::Int(1) => Some(true),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let SqlValue::Timestamp(value) = self {
            return Some(*value);
        }
        if let Some(s) = self.as_text() {
            // Try "YYYY-MM-DD HH:MM:SS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt);
            }
            // Try "YYYY-MM-DD HH:MM:SS.SSS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S.%3f") {
                return Some(dt);
            }
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let SqlValue::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let SqlValue::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// Convert into the engine's owned value type for positional binding.
    pub(crate) fn to_sqlite_value(&self) -> rusqlite::types::Value {
        match self {
            SqlValue::Int(i) => rusqlite::types::Value::Integer(*i),
            SqlValue::Float(f) => rusqlite::types::Value::Real(*f),
            SqlValue::Text(s) => rusqlite::types::Value::Text(s.clone()),
            SqlValue::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
            SqlValue::Timestamp(dt) => {
                let mut buf = String::with_capacity(32);
                // Format cannot fail when writing into a String
                let _ = write!(buf, "{}", dt.format("%F %T%.f"));
                rusqlite::types::Value::Text(buf)
            }
            SqlValue::Null => rusqlite::types::Value::Null,
            SqlValue::Json(jval) => rusqlite::types::Value::Text(jval.to_string()),
            SqlValue::Blob(bytes) => rusqlite::types::Value::Blob(bytes.clone()),
        }
    }

    /// Extract a `SqlValue` from a row cell.
    pub(crate) fn from_sqlite_ref(value: rusqlite::types::ValueRef<'_>) -> Self {
        match value {
            rusqlite::types::ValueRef::Null => SqlValue::Null,
            rusqlite::types::ValueRef::Integer(i) => SqlValue::Int(i),
            rusqlite::types::ValueRef::Real(f) => SqlValue::Float(f),
            rusqlite::types::ValueRef::Text(bytes) => {
                SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
            }
            rusqlite::types::ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(i64::from(value))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        SqlValue::Blob(value)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(value: NaiveDateTime) -> Self {
        SqlValue::Timestamp(value)
    }
}

/// Convert a parameter slice into the engine's owned values.
pub(crate) fn to_sqlite_values(params: &[SqlValue]) -> Vec<rusqlite::types::Value> {
    params.iter().map(SqlValue::to_sqlite_value).collect()
}
