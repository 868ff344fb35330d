//! Record trait and index types

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// A typed value stored in the index side table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl IndexValue {
    /// Split into the (text, int) column pair used by the index table
    pub(crate) fn columns(&self) -> (Option<&str>, Option<i64>) {
        match self {
            IndexValue::String(s) => (Some(s.as_str()), None),
            IndexValue::Int(i) => (None, Some(*i)),
            IndexValue::Bool(b) => (None, Some(i64::from(*b))),
        }
    }

    pub(crate) fn is_text(&self) -> bool {
        matches!(self, IndexValue::String(_))
    }

    pub(crate) fn to_sql_value(&self) -> rusqlite::types::Value {
        match self {
            IndexValue::String(s) => rusqlite::types::Value::Text(s.clone()),
            IndexValue::Int(i) => rusqlite::types::Value::Integer(*i),
            IndexValue::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
        }
    }
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        IndexValue::String(value.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        IndexValue::String(value)
    }
}

/// A persistable document
///
/// `collection_name` partitions the id space, so two record types may reuse the
/// same identifier without colliding.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Last modification time in milliseconds since the Unix epoch
    fn updated_at(&self) -> i64;

    fn collection_name() -> &'static str;

    /// Fields written to the index table on every create/update
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}

/// Comparison operator for a [`Filter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
}

impl FilterOp {
    pub(crate) fn as_sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Lt => "<",
            FilterOp::Gte => ">=",
            FilterOp::Lte => "<=",
        }
    }
}

/// A condition on one indexed field
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    /// Shorthand for an equality filter
    pub fn eq(field: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }
}

/// Current time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
