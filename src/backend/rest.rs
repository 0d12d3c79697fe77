use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use skillfeed_auth::Auth;
use skillfeed_postgrest::{PostgrestClient, SortOrder};

use super::{param, Backend, Filter, Query};
use crate::error::Result;

/// [`Backend`] over the REST relation API
///
/// Requests carry the signed-in user's token when there is a session, and
/// the project key otherwise.
#[derive(Clone)]
pub struct RestBackend {
    base_url: String,
    api_key: String,
    schema: String,
    http_client: Client,
    auth: Option<Auth>,
}

impl RestBackend {
    pub fn new(base_url: &str, api_key: &str, http_client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            schema: "public".to_string(),
            http_client,
            auth: None,
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    pub fn with_session(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    fn token(&self) -> String {
        self.auth
            .as_ref()
            .and_then(|auth| auth.get_session())
            .map(|session| session.access_token)
            .unwrap_or_else(|| self.api_key.clone())
    }

    fn client(&self, table: &str) -> Result<PostgrestClient> {
        let mut client = PostgrestClient::new(&self.base_url, &self.api_key, table, self.http_client.clone())
            .with_auth(&self.token())?;
        if self.schema != "public" {
            client = client.schema(&self.schema)?;
        }
        Ok(client)
    }

    fn filtered(&self, query: &Query) -> Result<PostgrestClient> {
        let mut client = self.client(&query.table)?.select(&query.columns);
        let mut disjunctions = Vec::new();
        for filter in &query.filters {
            client = match filter {
                Filter::Eq(c, v) => client.eq(c, &param(v)),
                Filter::Neq(c, v) => client.neq(c, &param(v)),
                Filter::Gt(c, v) => client.gt(c, &param(v)),
                Filter::Gte(c, v) => client.gte(c, &param(v)),
                Filter::Lt(c, v) => client.lt(c, &param(v)),
                Filter::Lte(c, v) => client.lte(c, &param(v)),
                Filter::In(c, values) => {
                    let rendered: Vec<String> = values.iter().map(param).collect();
                    let refs: Vec<&str> = rendered.iter().map(String::as_str).collect();
                    client.in_list(c, &refs)
                }
                Filter::IsNull(c) => client.is_null(c),
                Filter::ILike(c, pattern) => client.ilike(c, pattern),
                Filter::NeqOrNull(c, v) => {
                    disjunctions.push(format!("{c}.is.null,{c}.neq.{}", param(v)));
                    client
                }
                Filter::OrILike(columns, pattern) => {
                    let expressions: Vec<String> = columns
                        .iter()
                        .map(|c| format!("{}.ilike.{}", c, pattern))
                        .collect();
                    disjunctions.push(expressions.join(","));
                    client
                }
            };
        }
        // A relation accepts a single `or`; several are nested under `and`.
        client = match disjunctions.as_slice() {
            [] => client,
            [only] => client.or(only),
            many => {
                let nested: Vec<String> = many.iter().map(|d| format!("or({})", d)).collect();
                client.and(&nested.join(","))
            }
        };
        if let Some((column, ascending)) = &query.order {
            let order = if *ascending {
                SortOrder::Ascending
            } else {
                SortOrder::Descending
            };
            client = client.order(column, order);
        }
        if let Some(limit) = query.limit {
            client = client.limit(limit);
        }
        if let Some(offset) = query.offset {
            client = client.offset(offset);
        }
        Ok(client)
    }
}

fn rows(value: Value) -> Vec<Value> {
    match value {
        Value::Array(rows) => rows,
        Value::Null => Vec::new(),
        row => vec![row],
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        Ok(self.filtered(query)?.execute::<Value>().await?)
    }

    async fn count(&self, query: &Query) -> Result<usize> {
        Ok(self.filtered(query)?.count().await?)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Vec<Value>> {
        Ok(rows(self.client(table)?.insert(row).await?))
    }

    async fn upsert(&self, table: &str, row: Value, on_conflict: &str) -> Result<Vec<Value>> {
        Ok(rows(self.client(table)?.upsert(row, Some(on_conflict)).await?))
    }

    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>> {
        Ok(rows(self.filtered(query)?.update(patch).await?))
    }

    async fn delete(&self, query: &Query) -> Result<Vec<Value>> {
        Ok(rows(self.filtered(query)?.delete().await?))
    }
}
