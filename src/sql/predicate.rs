//! Filter expressions passed to repositories.
//!
//! Structured variants are rendered with quoted identifiers and typed placeholders; `Raw` is an
//! escape hatch taking a SQL fragment with `?` positional placeholders and its arguments.
//! Every argument is bound as TEXT, so a `Raw` fragment casts its own placeholders when the
//! comparison is not textual (`size > ?::bigint`).

use super::builder::{quoted, QueryBuf};
use crate::entity::Entity;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// Matches every row.
    All,
    Eq(String, Value),
    NotEq(String, Value),
    In(String, Vec<Value>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Raw { sql: String, args: Vec<Value> },
}

impl Default for Predicate {
    fn default() -> Self {
        Predicate::All
    }
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq(column.into(), value.into())
    }

    pub fn not_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::NotEq(column.into(), value.into())
    }

    pub fn is_in<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn raw(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Predicate::Raw {
            sql: sql.into(),
            args,
        }
    }

    /// Conjunction that flattens `All` away.
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::All, p) | (p, Predicate::All) => p,
            (Predicate::And(mut a), Predicate::And(b)) => {
                a.extend(b);
                Predicate::And(a)
            }
            (Predicate::And(mut a), p) => {
                a.push(p);
                Predicate::And(a)
            }
            (p, q) => Predicate::And(vec![p, q]),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Predicate::All)
    }

    /// Render into `q`, pushing parameters. Equality placeholders are cast to the column's type.
    pub(crate) fn write_sql<E: Entity>(&self, q: &mut QueryBuf) -> String {
        match self {
            Predicate::All => "TRUE".to_string(),
            Predicate::Eq(col, Value::Null) => format!("{} IS NULL", quoted(col)),
            Predicate::NotEq(col, Value::Null) => format!("{} IS NOT NULL", quoted(col)),
            Predicate::Eq(col, v) => {
                let ph = placeholder::<E>(q, col, v.clone());
                format!("{} = {}", quoted(col), ph)
            }
            Predicate::NotEq(col, v) => {
                let ph = placeholder::<E>(q, col, v.clone());
                format!("{} <> {}", quoted(col), ph)
            }
            Predicate::In(_, values) if values.is_empty() => "FALSE".to_string(),
            Predicate::In(col, values) => {
                let phs: Vec<String> = values
                    .iter()
                    .map(|v| placeholder::<E>(q, col, v.clone()))
                    .collect();
                format!("{} IN ({})", quoted(col), phs.join(", "))
            }
            Predicate::And(parts) => join::<E>(q, parts, " AND ", "TRUE"),
            Predicate::Or(parts) => join::<E>(q, parts, " OR ", "FALSE"),
            Predicate::Raw { sql, args } => {
                let mut out = String::with_capacity(sql.len() + 8);
                let mut args = args.iter();
                for c in sql.chars() {
                    if c == '?' {
                        let v = args.next().cloned().unwrap_or(Value::Null);
                        out.push_str(&format!("${}", q.push_param(v)));
                    } else {
                        out.push(c);
                    }
                }
                format!("({})", out)
            }
        }
    }
}

fn placeholder<E: Entity>(q: &mut QueryBuf, col: &str, v: Value) -> String {
    let n = q.push_param(v);
    E::column(col)
        .map(|c| format!("${}::{}", n, c.pg_type))
        .unwrap_or_else(|| format!("${}", n))
}

fn join<E: Entity>(q: &mut QueryBuf, parts: &[Predicate], sep: &str, empty: &str) -> String {
    if parts.is_empty() {
        return empty.to_string();
    }
    let rendered: Vec<String> = parts.iter().map(|p| p.write_sql::<E>(q)).collect();
    format!("({})", rendered.join(sep))
}
