//! Bind parameters and the compiled SQL object.
//!
//! Every literal that originates from a semantic query - filter values,
//! date bounds, limit/offset - is collected into an ordered parameter
//! vector and referenced from the SQL text by a placeholder. The binder
//! must be pushed in text-emission order: positional dialects (`?`) pair
//! the n-th marker with the n-th value.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use super::expr::Expr;

/// A bound parameter value, passed through the driver's placeholder
/// mechanism by the executor - never concatenated into SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
    Null,
}

impl ParamValue {
    /// Convert a wire (JSON) value into a parameter.
    pub fn from_json(value: &Value) -> ParamValue {
        match value {
            Value::Null => ParamValue::Null,
            Value::Bool(b) => ParamValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ParamValue::Int(i)
                } else {
                    ParamValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => ParamValue::String(s.clone()),
            // Arrays/objects have no scalar SQL equivalent; bind their JSON text.
            other => ParamValue::String(other.to_string()),
        }
    }

    /// Render the value as the string a driver would send.
    ///
    /// Used only by executors that need textual binding (e.g. SQLite
    /// datetime affinity); the compiler itself never interpolates this.
    pub fn as_sql_string(&self) -> String {
        match self {
            ParamValue::String(s) => s.clone(),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Float(f) => {
                let mut buffer = ryu::Buffer::new();
                buffer.format(*f).to_string()
            }
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
            ParamValue::Null => "NULL".into(),
        }
    }
}

impl From<DateTime<Utc>> for ParamValue {
    fn from(dt: DateTime<Utc>) -> Self {
        ParamValue::DateTime(dt)
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        ParamValue::Int(n)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.into())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}

/// Ordered collector for bind parameters.
///
/// `push` returns the parameter's expression so call sites read as
/// `binder.push(value)` wherever a literal would otherwise appear.
#[derive(Debug, Default)]
pub struct ParamBinder {
    params: Vec<ParamValue>,
}

impl ParamBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value, returning the placeholder expression referencing it.
    pub fn push(&mut self, value: impl Into<ParamValue>) -> Expr {
        self.params.push(value.into());
        Expr::Param(self.params.len() - 1)
    }

    /// Bind a value, returning the raw placeholder index.
    pub fn push_indexed(&mut self, value: impl Into<ParamValue>) -> usize {
        self.params.push(value.into());
        self.params.len() - 1
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn into_params(self) -> Vec<ParamValue> {
        self.params
    }
}

/// A compiled statement: SQL text plus its ordered bind parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlObject {
    /// The SQL text with dialect-specific placeholders.
    pub sql: String,
    /// Bound parameter values in placeholder order.
    pub params: Vec<ParamValue>,
}

impl SqlObject {
    pub fn new(sql: String, params: Vec<ParamValue>) -> Self {
        Self { sql, params }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_binder_indexes_in_order() {
        let mut binder = ParamBinder::new();
        assert_eq!(binder.push("a"), Expr::Param(0));
        assert_eq!(binder.push(42i64), Expr::Param(1));
        let params = binder.into_params();
        assert_eq!(params[0], ParamValue::String("a".into()));
        assert_eq!(params[1], ParamValue::Int(42));
    }

    #[test]
    fn test_from_json() {
        assert_eq!(
            ParamValue::from_json(&json!("x")),
            ParamValue::String("x".into())
        );
        assert_eq!(ParamValue::from_json(&json!(3)), ParamValue::Int(3));
        assert_eq!(ParamValue::from_json(&json!(2.5)), ParamValue::Float(2.5));
        assert_eq!(ParamValue::from_json(&json!(true)), ParamValue::Bool(true));
        assert_eq!(ParamValue::from_json(&json!(null)), ParamValue::Null);
    }
}
