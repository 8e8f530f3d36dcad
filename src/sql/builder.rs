//! Builds parameterized INSERT, SELECT, UPDATE and soft DELETE statements for an entity table.

use super::predicate::Predicate;
use crate::entity::{Column, Entity, CREATED_AT, DELETED_AT, ID, RECORD_COLUMNS, UPDATED_AT};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table<E: Entity>() -> String {
    format!("{}.{}", quoted(E::SCHEMA), quoted(E::TABLE))
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    pub(crate) fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    fn typed_param(&mut self, c: &Column, v: Value) -> String {
        let n = self.push_param(v);
        format!("${}::{}", n, c.pg_type)
    }
}

fn all_columns<E: Entity>() -> impl Iterator<Item = &'static Column> {
    RECORD_COLUMNS.iter().chain(E::columns().iter())
}

/// SELECT list: each column as-is, except custom enum (schema.typename) and numeric as col::text
/// so rows decode to strings.
fn select_column_list<E: Entity>() -> String {
    all_columns::<E>()
        .map(|c| {
            let q = quoted(c.name);
            if c.pg_type.contains('.') || c.pg_type.starts_with("numeric") {
                format!("{}::text AS {}", q, q)
            } else {
                q
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `deleted_at IS NULL AND (<predicate>)`, collapsing the trivial predicate.
fn live_where<E: Entity>(q: &mut QueryBuf, predicate: &Predicate) -> String {
    let live = format!("{} IS NULL", quoted(DELETED_AT.name));
    if predicate.is_all() {
        live
    } else {
        format!("{} AND {}", live, predicate.write_sql::<E>(q))
    }
}

pub fn select_by_id<E: Entity>(id: Uuid) -> QueryBuf {
    let mut q = QueryBuf::default();
    let ph = q.typed_param(&ID, Value::String(id.to_string()));
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = {} AND {} IS NULL",
        select_column_list::<E>(),
        qualified_table::<E>(),
        quoted(ID.name),
        ph,
        quoted(DELETED_AT.name)
    );
    q
}

/// SELECT live rows matching `predicate`, ordered by creation. Negative limit or offset omits the clause.
pub fn select_list<E: Entity>(predicate: &Predicate, limit: i64, offset: i64) -> QueryBuf {
    let mut q = QueryBuf::default();
    let where_clause = live_where::<E>(&mut q, predicate);
    let limit_clause = if limit >= 0 {
        format!(" LIMIT {}", limit)
    } else {
        String::new()
    };
    let offset_clause = if offset >= 0 {
        format!(" OFFSET {}", offset)
    } else {
        String::new()
    };
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {}, {}{}{}",
        select_column_list::<E>(),
        qualified_table::<E>(),
        where_clause,
        quoted(CREATED_AT.name),
        quoted(ID.name),
        limit_clause,
        offset_clause
    );
    q
}

pub fn count<E: Entity>(predicate: &Predicate) -> QueryBuf {
    let mut q = QueryBuf::default();
    let where_clause = live_where::<E>(&mut q, predicate);
    q.sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        qualified_table::<E>(),
        where_clause
    );
    q
}

/// INSERT with server-assigned timestamps. `values` holds the data columns; missing ones bind NULL.
/// With `upsert`, an existing row with the same id is replaced and revived.
pub fn insert<E: Entity>(id: Uuid, values: &Map<String, Value>, upsert: bool) -> QueryBuf {
    let mut q = QueryBuf::default();
    let mut cols = vec![
        quoted(ID.name),
        quoted(CREATED_AT.name),
        quoted(UPDATED_AT.name),
    ];
    let mut placeholders = vec![
        q.typed_param(&ID, Value::String(id.to_string())),
        "NOW()".to_string(),
        "NOW()".to_string(),
    ];
    for c in E::columns() {
        let val = values.get(c.name).cloned().unwrap_or(Value::Null);
        cols.push(quoted(c.name));
        placeholders.push(q.typed_param(c, val));
    }
    let conflict = if upsert {
        let mut sets: Vec<String> = E::columns()
            .iter()
            .map(|c| format!("{} = EXCLUDED.{}", quoted(c.name), quoted(c.name)))
            .collect();
        sets.push(format!("{} = NOW()", quoted(UPDATED_AT.name)));
        sets.push(format!("{} = NULL", quoted(DELETED_AT.name)));
        format!(" ON CONFLICT ({}) DO UPDATE SET {}", quoted(ID.name), sets.join(", "))
    } else {
        String::new()
    };
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}){} RETURNING {}",
        qualified_table::<E>(),
        cols.join(", "),
        placeholders.join(", "),
        conflict,
        select_column_list::<E>()
    );
    q
}

/// UPDATE live rows matching `predicate`: SET only data columns present and non-null in `values`,
/// always bumping `updated_at`.
pub fn update<E: Entity>(values: &Map<String, Value>, predicate: &Predicate, returning: bool) -> QueryBuf {
    let mut q = QueryBuf::default();
    let mut sets = Vec::new();
    for c in E::columns() {
        match values.get(c.name) {
            None | Some(Value::Null) => continue,
            Some(v) => {
                let ph = q.typed_param(c, v.clone());
                sets.push(format!("{} = {}", quoted(c.name), ph));
            }
        }
    }
    sets.push(format!("{} = NOW()", quoted(UPDATED_AT.name)));
    let where_clause = live_where::<E>(&mut q, predicate);
    let returning = if returning {
        format!(" RETURNING {}", select_column_list::<E>())
    } else {
        String::new()
    };
    q.sql = format!(
        "UPDATE {} SET {} WHERE {}{}",
        qualified_table::<E>(),
        sets.join(", "),
        where_clause,
        returning
    );
    q
}

/// Soft delete: stamp `deleted_at` on live rows matching `predicate`.
pub fn soft_delete<E: Entity>(predicate: &Predicate) -> QueryBuf {
    let mut q = QueryBuf::default();
    let where_clause = live_where::<E>(&mut q, predicate);
    q.sql = format!(
        "UPDATE {} SET {} = NOW() WHERE {}",
        qualified_table::<E>(),
        quoted(DELETED_AT.name),
        where_clause
    );
    q
}

/// CREATE TABLE IF NOT EXISTS from the entity's declared columns.
pub fn create_table<E: Entity>() -> String {
    let mut defs = vec![
        format!("{} UUID PRIMARY KEY", quoted(ID.name)),
        format!("{} TIMESTAMPTZ NOT NULL DEFAULT NOW()", quoted(CREATED_AT.name)),
        format!("{} TIMESTAMPTZ NOT NULL DEFAULT NOW()", quoted(UPDATED_AT.name)),
        format!("{} TIMESTAMPTZ", quoted(DELETED_AT.name)),
    ];
    for c in E::columns() {
        defs.push(format!("{} {}", quoted(c.name), c.pg_type));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        qualified_table::<E>(),
        defs.join(", ")
    )
}
