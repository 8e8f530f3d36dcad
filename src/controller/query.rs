//! List query parameters: `page`, `per_page`, `joiner` and equality filters.

use crate::entity::Entity;
use crate::sql::Predicate;

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_PER_PAGE: u64 = 12;

const RESERVED: &[&str] = &["page", "per_page", "joiner"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Joiner {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub page: u64,
    pub per_page: u64,
    pub joiner: Joiner,
    /// `(field, raw value)` in query-string order; the first value for a field wins.
    pub filters: Vec<(String, String)>,
}

impl Default for ListQuery {
    fn default() -> Self {
        ListQuery {
            page: DEFAULT_PAGE,
            per_page: DEFAULT_PER_PAGE,
            joiner: Joiner::And,
            filters: Vec::new(),
        }
    }
}

/// Positive integer or the default; zero and negatives clamp to 1.
fn positive(raw: Option<&str>, default: u64) -> u64 {
    match raw.map(|s| s.trim().parse::<i64>()) {
        Some(Ok(n)) => n.max(1) as u64,
        _ => default,
    }
}

impl ListQuery {
    pub fn parse(pairs: &[(String, String)]) -> Self {
        let first = |key: &str| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());
        let joiner = match first("joiner") {
            Some(j) if j.eq_ignore_ascii_case("or") => Joiner::Or,
            _ => Joiner::And,
        };
        let mut filters: Vec<(String, String)> = Vec::new();
        for (k, v) in pairs {
            if RESERVED.contains(&k.as_str()) || filters.iter().any(|(seen, _)| seen == k) {
                continue;
            }
            filters.push((k.clone(), v.clone()));
        }
        ListQuery {
            page: positive(first("page"), DEFAULT_PAGE),
            per_page: positive(first("per_page"), DEFAULT_PER_PAGE),
            joiner,
            filters,
        }
    }

    /// Rows skipped before the requested page; saturates instead of overflowing.
    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.per_page)
    }

    /// Equality conditions over `allowed` fields (every entity column when empty), joined per
    /// [`Joiner`]. Unknown fields are dropped; values are typed by their column, and a value
    /// that cannot be read as the column's type matches no row.
    pub fn predicate<E: Entity>(&self, allowed: &[&str]) -> Predicate {
        let fallback = E::filterable();
        let allowed = if allowed.is_empty() { &fallback[..] } else { allowed };
        let conditions: Vec<Predicate> = self
            .filters
            .iter()
            .filter(|(k, _)| allowed.contains(&k.as_str()))
            .filter_map(|(k, v)| {
                E::column(k).map(|c| match c.coerce(v) {
                    Some(value) => Predicate::eq(k.clone(), value),
                    None => Predicate::In(k.clone(), Vec::new()),
                })
            })
            .collect();
        match (conditions.len(), self.joiner) {
            (0, _) => Predicate::All,
            (1, _) => conditions.into_iter().next().unwrap_or_default(),
            (_, Joiner::And) => Predicate::And(conditions),
            (_, Joiner::Or) => Predicate::Or(conditions),
        }
    }
}
