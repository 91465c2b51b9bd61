//! SQL WHERE-clause builders for task filters and tag lookups.
//!
//! Builders emit a clause fragment with numbered placeholders and the matching
//! parameters in order. Callers choose `param_offset` so the fragment can be
//! spliced after their own leading parameters.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::Postgres;
use uuid::Uuid;

use stratum_core::{TagLookup, TaskFilter};

use crate::escape_like;

/// Type-safe parameter binding for SQL queries.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Uuid(Uuid),
    UuidArray(Vec<Uuid>),
    Timestamp(DateTime<Utc>),
    String(String),
    StringArray(Vec<String>),
}

/// Bind parameters in order.
pub fn bind_params<'q>(
    mut q: Query<'q, Postgres, PgArguments>,
    params: &'q [QueryParam],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        q = match param {
            QueryParam::Uuid(id) => q.bind(id),
            QueryParam::UuidArray(ids) => q.bind(ids),
            QueryParam::Timestamp(ts) => q.bind(ts),
            QueryParam::String(s) => q.bind(s),
            QueryParam::StringArray(arr) => q.bind(arr),
        };
    }
    q
}

struct ClauseBuilder {
    clauses: Vec<String>,
    params: Vec<QueryParam>,
    param_idx: usize,
}

impl ClauseBuilder {
    fn new(param_offset: usize) -> Self {
        Self {
            clauses: Vec::new(),
            params: Vec::new(),
            param_idx: param_offset,
        }
    }

    /// Push a clause whose single `{}` is replaced by the next placeholder.
    fn push(&mut self, template: &str, param: QueryParam) {
        self.param_idx += 1;
        self.clauses
            .push(template.replace("{}", &format!("${}", self.param_idx)));
        self.params.push(param);
    }

    fn build(self) -> (String, Vec<QueryParam>) {
        if self.clauses.is_empty() {
            ("TRUE".to_string(), self.params)
        } else {
            (self.clauses.join(" AND "), self.params)
        }
    }
}

/// Builds the WHERE fragment for a [`TaskFilter`] against `task t`.
pub struct TaskFilterQueryBuilder<'a> {
    filter: &'a TaskFilter,
    param_offset: usize,
}

impl<'a> TaskFilterQueryBuilder<'a> {
    pub fn new(filter: &'a TaskFilter, param_offset: usize) -> Self {
        Self {
            filter,
            param_offset,
        }
    }

    pub fn build(&self) -> (String, Vec<QueryParam>) {
        let mut b = ClauseBuilder::new(self.param_offset);

        if let Some(status) = self.filter.status {
            b.push("t.status = {}", QueryParam::String(status.to_string()));
        }
        if let Some(from) = self.filter.due_date_from {
            b.push("t.due_date >= {}", QueryParam::Timestamp(from));
        }
        if let Some(to) = self.filter.due_date_to {
            b.push("t.due_date <= {}", QueryParam::Timestamp(to));
        }
        if let Some(user) = self.filter.user_assignee {
            b.push(
                "EXISTS (SELECT 1 FROM task_user_assignee ua WHERE ua.task_id = t.id AND ua.user_id = {})",
                QueryParam::Uuid(user),
            );
        }
        if let Some(role) = self.filter.role_assignee {
            b.push(
                "EXISTS (SELECT 1 FROM task_role_assignee ra WHERE ra.task_id = t.id AND ra.role_id = {})",
                QueryParam::Uuid(role),
            );
        }

        b.build()
    }
}

/// Builds the WHERE fragment for a [`TagLookup`] against `tag t`.
pub struct TagLookupQueryBuilder<'a> {
    lookup: &'a TagLookup,
    param_offset: usize,
}

impl<'a> TagLookupQueryBuilder<'a> {
    pub fn new(lookup: &'a TagLookup, param_offset: usize) -> Self {
        Self {
            lookup,
            param_offset,
        }
    }

    pub fn build(&self) -> (String, Vec<QueryParam>) {
        let mut b = ClauseBuilder::new(self.param_offset);

        if !self.lookup.ids.is_empty() {
            b.push(
                "t.id = ANY({}::uuid[])",
                QueryParam::UuidArray(self.lookup.ids.clone()),
            );
        }
        if let Some(ref tag_type) = self.lookup.tag_type {
            b.push("t.tag_type = {}", QueryParam::String(tag_type.clone()));
        }
        if !self.lookup.type_names.is_empty() {
            // Pairs travel as two parallel arrays zipped by UNNEST.
            let types = self
                .lookup
                .type_names
                .iter()
                .map(|p| p.tag_type.clone())
                .collect();
            let names = self
                .lookup
                .type_names
                .iter()
                .map(|p| p.name.clone())
                .collect();
            b.param_idx += 2;
            b.clauses.push(format!(
                "(t.tag_type, t.name) IN (SELECT * FROM UNNEST(${}::text[], ${}::text[]))",
                b.param_idx - 1,
                b.param_idx
            ));
            b.params.push(QueryParam::StringArray(types));
            b.params.push(QueryParam::StringArray(names));
        }
        if let Some(ref needle) = self.lookup.name_contains {
            b.push(
                "t.name ILIKE {} ESCAPE '\\'",
                QueryParam::String(format!("%{}%", escape_like(needle))),
            );
        }

        b.build()
    }
}
