//! Row storage seam
//!
//! Every domain service talks to the backend through [`Backend`], so the
//! same code runs against the REST relation API ([`RestBackend`]) and the
//! in-process [`MemoryBackend`] used by tests.

mod memory;
mod rest;

pub use memory::{Call, MemoryBackend, Op};
pub use rest::RestBackend;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

/// A single row predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    /// SQL `<>`: a NULL column never matches
    Neq(String, Value),
    /// Differs from the value, or was never set
    NeqOrNull(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
    IsNull(String),
    /// Case-insensitive `%` pattern
    ILike(String, String),
    /// Any of the columns matches the pattern
    OrILike(Vec<String>, String),
}

/// Selection over one relation
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub columns: String,
    pub filters: Vec<Filter>,
    /// Column and ascending flag
    pub order: Option<(String, bool)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: "*".to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
            offset: None,
        }
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.columns = columns.to_string();
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.to_string(), value.into()));
        self
    }

    pub fn neq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Neq(column.to_string(), value.into()));
        self
    }

    /// Like [`Query::neq`] but also keeps rows where the column is NULL
    pub fn neq_or_null(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::NeqOrNull(column.to_string(), value.into()));
        self
    }

    pub fn gt(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gt(column.to_string(), value.into()));
        self
    }

    pub fn gte(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gte(column.to_string(), value.into()));
        self
    }

    pub fn lt(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Lt(column.to_string(), value.into()));
        self
    }

    pub fn lte(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Lte(column.to_string(), value.into()));
        self
    }

    pub fn in_list<V: Into<Value>>(mut self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.filters.push(Filter::In(
            column.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn is_null(mut self, column: &str) -> Self {
        self.filters.push(Filter::IsNull(column.to_string()));
        self
    }

    pub fn ilike(mut self, column: &str, pattern: &str) -> Self {
        self.filters.push(Filter::ILike(column.to_string(), pattern.to_string()));
        self
    }

    pub fn or_ilike(mut self, columns: &[&str], pattern: &str) -> Self {
        self.filters.push(Filter::OrILike(
            columns.iter().map(|c| c.to_string()).collect(),
            pattern.to_string(),
        ));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some((column.to_string(), ascending));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Render a JSON scalar the way the REST filter syntax expects it
pub(crate) fn param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Wrap a user search term as a contains pattern, dropping the characters
/// that delimit filter expressions.
pub fn contains_pattern(term: &str) -> String {
    let cleaned: String = term
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '(' | ')' | '%' | '*'))
        .collect();
    format!("%{}%", cleaned)
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn select(&self, query: &Query) -> Result<Vec<Value>>;

    async fn count(&self, query: &Query) -> Result<usize>;

    /// Insert one row and return the stored representation
    async fn insert(&self, table: &str, row: Value) -> Result<Vec<Value>>;

    /// Insert, or merge into the row matching `on_conflict` columns
    async fn upsert(&self, table: &str, row: Value, on_conflict: &str) -> Result<Vec<Value>>;

    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>>;

    async fn delete(&self, query: &Query) -> Result<Vec<Value>>;
}

/// Typed helpers over [`Backend`]
#[async_trait]
pub trait BackendExt: Backend {
    async fn select_as<T: DeserializeOwned + Send>(&self, query: &Query) -> Result<Vec<T>> {
        self.select(query)
            .await?
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(Error::from))
            .collect()
    }

    async fn first_as<T: DeserializeOwned + Send>(&self, query: &Query) -> Result<Option<T>> {
        let query = query.clone().limit(1);
        Ok(self.select_as::<T>(&query).await?.into_iter().next())
    }

    async fn insert_as<T: DeserializeOwned + Send>(&self, table: &str, row: Value) -> Result<T> {
        let stored = self
            .insert(table, row)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("{} insert returned no row", table)))?;
        Ok(serde_json::from_value(stored)?)
    }

    async fn update_as<T: DeserializeOwned + Send>(&self, query: &Query, patch: Value) -> Result<Vec<T>> {
        self.update(query, patch)
            .await?
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(Error::from))
            .collect()
    }
}

impl<B: Backend + ?Sized> BackendExt for B {}
