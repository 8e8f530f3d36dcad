//! Entity contract: a persisted record with identifier, timestamps and a soft-delete marker.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

/// Server-managed fields shared by every entity. Flatten it into the entity with `#[serde(flatten)]`.
///
/// `id` and the timestamps are assigned by the repository; values supplied by a caller on create
/// are overwritten. `deleted_at` is never serialized back to callers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A persisted column: name as serialized by serde and the PostgreSQL type used for casts and DDL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub pg_type: &'static str,
}

impl Column {
    pub const fn new(name: &'static str, pg_type: &'static str) -> Self {
        Column { name, pg_type }
    }

    /// Convert a raw query-string value into the JSON value matching this column's type.
    /// `None` when the column is numeric or boolean and the value does not parse as one.
    pub fn coerce(&self, raw: &str) -> Option<Value> {
        let t = self.pg_type.to_lowercase();
        if t.contains("int") || t.contains("serial") {
            return raw.trim().parse::<i64>().ok().map(Value::from);
        }
        if t.starts_with("bool") {
            return match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            };
        }
        if t.starts_with("float") || t.starts_with("double") || t == "real" || t.starts_with("numeric") {
            return raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number);
        }
        Some(Value::String(raw.to_string()))
    }
}

pub const ID: Column = Column::new("id", "uuid");
pub const CREATED_AT: Column = Column::new("created_at", "timestamptz");
pub const UPDATED_AT: Column = Column::new("updated_at", "timestamptz");
pub const DELETED_AT: Column = Column::new("deleted_at", "timestamptz");

/// Columns every entity table carries, in table order.
pub const RECORD_COLUMNS: [Column; 4] = [ID, CREATED_AT, UPDATED_AT, DELETED_AT];

/// A record type that a [`Repository`](crate::repository::Repository) can persist and a
/// [`Controller`](crate::controller::Controller) can expose.
pub trait Entity:
    Serialize + DeserializeOwned + Validate + Default + Clone + Send + Sync + Unpin + 'static
{
    const TABLE: &'static str;
    const SCHEMA: &'static str = "public";

    /// Data columns beyond the [`Record`] fields.
    fn columns() -> &'static [Column];

    fn record(&self) -> &Record;

    fn record_mut(&mut self) -> &mut Record;

    fn id(&self) -> Option<Uuid> {
        self.record().id
    }

    /// Look up a record or data column by name.
    fn column(name: &str) -> Option<Column> {
        RECORD_COLUMNS
            .iter()
            .chain(Self::columns().iter())
            .find(|c| c.name == name)
            .copied()
    }

    /// Columns callers may filter on when no explicit list is configured.
    fn filterable() -> Vec<&'static str> {
        RECORD_COLUMNS
            .iter()
            .filter(|c| c.name != DELETED_AT.name)
            .chain(Self::columns().iter())
            .map(|c| c.name)
            .collect()
    }
}
