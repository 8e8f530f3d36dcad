//! Convert serde_json::Value to types that sqlx can bind.

use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::Database;

/// A value that can be bound to a PostgreSQL query.
///
/// Every variant is sent as TEXT and the statement casts the placeholder to the column type
/// (`$1::bigint`). sqlx caches a prepared statement per SQL string together with the parameter
/// types of its first execution, so the wire type of a placeholder must not depend on the value.
#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Json(Value),
}

impl PgBindValue {
    /// Text form sent to the server; `None` for SQL NULL.
    pub fn as_text(&self) -> Option<String> {
        match self {
            PgBindValue::Null => None,
            PgBindValue::Bool(b) => Some(b.to_string()),
            PgBindValue::I64(n) => Some(n.to_string()),
            PgBindValue::F64(n) => Some(n.to_string()),
            PgBindValue::String(s) => Some(s.clone()),
            PgBindValue::Json(v) => Some(v.to_string()),
        }
    }
}

impl From<&Value> for PgBindValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => PgBindValue::Null,
            Value::Bool(b) => PgBindValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => PgBindValue::I64(i),
                None => PgBindValue::F64(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => PgBindValue::String(s.clone()),
            Value::Array(_) | Value::Object(_) => PgBindValue::Json(v.clone()),
        }
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self.as_text() {
            Some(text) => <&str as Encode<Postgres>>::encode_by_ref(&text.as_str(), buf),
            None => Ok(IsNull::Yes),
        }
    }
}

impl sqlx::Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_values_map_to_bind_variants() {
        assert_eq!(PgBindValue::from(&json!(null)), PgBindValue::Null);
        assert_eq!(PgBindValue::from(&json!(7)), PgBindValue::I64(7));
        assert_eq!(PgBindValue::from(&json!(1.5)), PgBindValue::F64(1.5));
        assert_eq!(PgBindValue::from(&json!("x")), PgBindValue::String("x".into()));
        assert_eq!(PgBindValue::from(&json!({"a": 1})), PgBindValue::Json(json!({"a": 1})));
    }

    #[test]
    fn every_variant_travels_as_text() {
        let text = |v: Value| PgBindValue::from(&v).as_text();
        assert_eq!(text(json!(null)), None);
        assert_eq!(text(json!(true)), Some("true".into()));
        assert_eq!(text(json!(-42)), Some("-42".into()));
        assert_eq!(text(json!(2.5)), Some("2.5".into()));
        assert_eq!(text(json!("2024-01-01T00:00:00Z")), Some("2024-01-01T00:00:00Z".into()));
        assert_eq!(text(json!({"a": [1, 2]})), Some(r#"{"a":[1,2]}"#.into()));
    }
}
