use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use skillfeed_postgrest::{PostgrestApiErrorDetails, PostgrestError, UNIQUE_VIOLATION};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{param, Backend, Filter, Query};
use crate::error::{Error, Result};
use crate::models::tables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Select,
    Count,
    Insert,
    Upsert,
    Update,
    Delete,
}

/// One recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub table: String,
}

/// In-process relational fake
///
/// Rows get an `id` and `created_at` when the caller leaves them out. Column
/// lists in queries are ignored and whole rows come back. Configured unique
/// keys are enforced with the same `23505` error the real backend returns.
#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    unique_keys: HashMap<String, Vec<Vec<String>>>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<Vec<(Op, String, PostgrestApiErrorDetails)>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The unique keys the marketplace schema declares
    pub fn marketplace() -> Self {
        Self::new()
            .with_unique(tables::PROFILES, &["id"])
            .with_unique(tables::VIDEO_LIKES, &["video_id", "user_id"])
            .with_unique(tables::VIDEO_VIEWS, &["video_id", "user_id"])
            .with_unique(tables::FOLLOWERS, &["follower_id", "following_id"])
            .with_unique(tables::RATINGS, &["client_id", "provider_id"])
            .with_unique(tables::VIDEO_MODERATION, &["video_id"])
    }

    pub fn with_unique(mut self, table: &str, columns: &[&str]) -> Self {
        self.unique_keys
            .entry(table.to_string())
            .or_default()
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Seed rows without recording calls
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        let mut tables = lock(&self.tables);
        let stored = tables.entry(table.to_string()).or_default();
        for row in rows {
            stored.push(with_defaults(row));
        }
    }

    /// Snapshot of a table
    pub fn rows(&self, table: &str) -> Vec<Value> {
        lock(&self.tables).get(table).cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Make the next `op` on `table` fail with the given backend code
    pub fn fail_next(&self, op: Op, table: &str, code: &str) {
        lock(&self.failures).push((
            op,
            table.to_string(),
            PostgrestApiErrorDetails::with_code(code, "injected failure"),
        ));
    }

    fn record(&self, op: Op, table: &str) -> Result<()> {
        lock(&self.calls).push(Call {
            op,
            table: table.to_string(),
        });
        let mut failures = lock(&self.failures);
        if let Some(pos) = failures.iter().position(|(o, t, _)| *o == op && t == table) {
            let (_, _, details) = failures.remove(pos);
            return Err(api_error(details, StatusCode::BAD_REQUEST));
        }
        Ok(())
    }

    fn check_unique(&self, table: &str, rows: &[Value], candidate: &Value, skip: Option<usize>) -> Result<()> {
        let Some(keys) = self.unique_keys.get(table) else {
            return Ok(());
        };
        for key in keys {
            let clash = rows.iter().enumerate().any(|(i, row)| {
                Some(i) != skip && key.iter().all(|c| field(row, c) == field(candidate, c) && !field(row, c).is_null())
            });
            if clash {
                return Err(api_error(
                    PostgrestApiErrorDetails::with_code(
                        UNIQUE_VIOLATION,
                        &format!("duplicate key value violates unique constraint on {}({})", table, key.join(", ")),
                    ),
                    StatusCode::CONFLICT,
                ));
            }
        }
        Ok(())
    }
}

fn api_error(details: PostgrestApiErrorDetails, status: StatusCode) -> Error {
    Error::Database(PostgrestError::ApiError { details, status })
}

fn field<'a>(row: &'a Value, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&Value::Null)
}

fn with_defaults(row: Value) -> Value {
    let mut object = match row {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    object
        .entry("id")
        .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
    object
        .entry("created_at")
        .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
    Value::Object(object)
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::Null, _) | (_, Value::Null) => None,
        _ => Some(param(a).cmp(&param(b))),
    }
}

fn same(a: &Value, b: &Value) -> bool {
    !a.is_null() && param(a) == param(b)
}

/// `%` matches any run of characters; comparison ignores case.
fn ilike(value: &str, pattern: &str) -> bool {
    let value = value.to_lowercase();
    let pattern = pattern.to_lowercase();
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return value == pattern;
    }
    let mut rest = value.as_str();
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

fn matches(row: &Value, filter: &Filter) -> bool {
    let text = |c: &str| field(row, c).as_str().map(str::to_string);
    match filter {
        Filter::Eq(c, v) => same(field(row, c), v),
        Filter::Neq(c, v) => !field(row, c).is_null() && !same(field(row, c), v),
        Filter::NeqOrNull(c, v) => !same(field(row, c), v),
        Filter::Gt(c, v) => compare(field(row, c), v) == Some(Ordering::Greater),
        Filter::Gte(c, v) => matches!(compare(field(row, c), v), Some(Ordering::Greater | Ordering::Equal)),
        Filter::Lt(c, v) => compare(field(row, c), v) == Some(Ordering::Less),
        Filter::Lte(c, v) => matches!(compare(field(row, c), v), Some(Ordering::Less | Ordering::Equal)),
        Filter::In(c, values) => values.iter().any(|v| same(field(row, c), v)),
        Filter::IsNull(c) => field(row, c).is_null(),
        Filter::ILike(c, pattern) => text(c).is_some_and(|t| ilike(&t, pattern)),
        Filter::OrILike(columns, pattern) => columns
            .iter()
            .any(|c| text(c).is_some_and(|t| ilike(&t, pattern))),
    }
}

fn select_rows(rows: &[Value], query: &Query) -> Vec<(usize, Value)> {
    let mut selected: Vec<(usize, Value)> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| query.filters.iter().all(|f| matches(row, f)))
        .map(|(i, row)| (i, row.clone()))
        .collect();

    if let Some((column, ascending)) = &query.order {
        selected.sort_by(|(_, a), (_, b)| {
            let (x, y) = (field(a, column), field(b, column));
            // Nulls last in both directions.
            match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                _ => {
                    let ord = compare(x, y).unwrap_or(Ordering::Equal);
                    if *ascending {
                        ord
                    } else {
                        ord.reverse()
                    }
                }
            }
        });
    }

    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(usize::MAX);
    selected.into_iter().skip(offset).take(limit).collect()
}

fn merge(row: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(source)) = (row, patch) {
        for (k, v) in source {
            target.insert(k.clone(), v.clone());
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        self.record(Op::Select, &query.table)?;
        let tables = lock(&self.tables);
        let rows = tables.get(&query.table).map(Vec::as_slice).unwrap_or_default();
        Ok(select_rows(rows, query).into_iter().map(|(_, row)| row).collect())
    }

    async fn count(&self, query: &Query) -> Result<usize> {
        self.record(Op::Count, &query.table)?;
        let tables = lock(&self.tables);
        let rows = tables.get(&query.table).map(Vec::as_slice).unwrap_or_default();
        let unpaged = Query {
            limit: None,
            offset: None,
            ..query.clone()
        };
        Ok(select_rows(rows, &unpaged).len())
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Vec<Value>> {
        self.record(Op::Insert, table)?;
        let row = with_defaults(row);
        let mut tables = lock(&self.tables);
        let rows = tables.entry(table.to_string()).or_default();
        self.check_unique(table, rows, &row, None)?;
        rows.push(row.clone());
        Ok(vec![row])
    }

    async fn upsert(&self, table: &str, row: Value, on_conflict: &str) -> Result<Vec<Value>> {
        self.record(Op::Upsert, table)?;
        let columns: Vec<&str> = on_conflict.split(',').map(str::trim).collect();
        let mut tables = lock(&self.tables);
        let rows = tables.entry(table.to_string()).or_default();

        let existing = rows
            .iter()
            .position(|r| columns.iter().all(|c| same(field(r, c), field(&row, c))));
        match existing {
            Some(i) => {
                let mut merged = rows[i].clone();
                merge(&mut merged, &row);
                self.check_unique(table, rows, &merged, Some(i))?;
                rows[i] = merged.clone();
                Ok(vec![merged])
            }
            None => {
                let row = with_defaults(row);
                self.check_unique(table, rows, &row, None)?;
                rows.push(row.clone());
                Ok(vec![row])
            }
        }
    }

    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>> {
        self.record(Op::Update, &query.table)?;
        let mut tables = lock(&self.tables);
        let rows = tables.entry(query.table.clone()).or_default();
        let targets: Vec<usize> = select_rows(rows, query).into_iter().map(|(i, _)| i).collect();

        let mut updated = Vec::with_capacity(targets.len());
        for i in targets {
            let mut merged = rows[i].clone();
            merge(&mut merged, &patch);
            self.check_unique(&query.table, rows, &merged, Some(i))?;
            rows[i] = merged.clone();
            updated.push(merged);
        }
        Ok(updated)
    }

    async fn delete(&self, query: &Query) -> Result<Vec<Value>> {
        self.record(Op::Delete, &query.table)?;
        let mut tables = lock(&self.tables);
        let rows = tables.entry(query.table.clone()).or_default();
        let mut targets: Vec<usize> = select_rows(rows, query).into_iter().map(|(i, _)| i).collect();
        targets.sort_unstable_by(|a, b| b.cmp(a));
        Ok(targets.into_iter().map(|i| rows.remove(i)).collect())
    }
}
