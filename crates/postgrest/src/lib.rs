//! Row query client for the marketplace REST relation API
//!
//! This crate issues select/insert/update/upsert/delete calls against named
//! relations, with filter predicates, ordering, pagination and exact counts.
//!
//! # Features
//!
//! - Query API (`select`, `insert`, `update`, `upsert`, `delete`)
//! - Filtering (`eq`, `neq`, `gt`, `lt`, `ilike`, `in_list`, `or`, ...)
//! - Ordering, limits and exact row counts
//! - Structured API errors carrying the backend `code`

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Backend code for a unique constraint violation.
pub const UNIQUE_VIOLATION: &str = "23505";

/// Backend code returned when a single row was requested but none matched.
pub const NO_ROWS: &str = "PGRST116";

/// Structured error body returned by the relation API
#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct PostgrestApiErrorDetails {
    pub code: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl PostgrestApiErrorDetails {
    /// Build details carrying only a code and a message.
    pub fn with_code(code: &str, message: &str) -> Self {
        Self {
            code: Some(code.to_string()),
            message: Some(message.to_string()),
            details: None,
            hint: None,
        }
    }
}

impl fmt::Display for PostgrestApiErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(code) = &self.code {
            parts.push(format!("Code: {}", code));
        }
        if let Some(message) = &self.message {
            parts.push(format!("Message: {}", message));
        }
        if let Some(details) = &self.details {
            parts.push(format!("Details: {}", details));
        }
        if let Some(hint) = &self.hint {
            parts.push(format!("Hint: {}", hint));
        }
        write!(f, "{}", parts.join(", "))
    }
}

#[derive(Error, Debug)]
pub enum PostgrestError {
    #[error("API error: {details} (Status: {status})")]
    ApiError {
        details: PostgrestApiErrorDetails,
        status: StatusCode,
    },

    #[error("API error (unparsed): {message} (Status: {status})")]
    UnparsedApiError { message: String, status: StatusCode },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl PostgrestError {
    /// The backend error code, when the server returned a structured error.
    pub fn code(&self) -> Option<&str> {
        match self {
            PostgrestError::ApiError { details, .. } => details.code.as_deref(),
            _ => None,
        }
    }

    /// HTTP status of a failed API call.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            PostgrestError::ApiError { status, .. }
            | PostgrestError::UnparsedApiError { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        self.code() == Some(UNIQUE_VIOLATION)
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == Some(NO_ROWS)
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Builder for one request against a relation
#[derive(Clone)]
pub struct PostgrestClient {
    base_url: String,
    table: String,
    http_client: Client,
    headers: HeaderMap,
    query_params: Vec<(String, String)>,
}

impl PostgrestClient {
    /// Create a client for `table`, authenticated with the project key.
    pub fn new(base_url: &str, api_key: &str, table: &str, http_client: Client) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(api_key) {
            headers.insert("apikey", value);
        }
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            table: table.to_string(),
            http_client,
            headers,
            query_params: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Add a request header
    pub fn with_header(mut self, key: &str, value: &str) -> Result<Self, PostgrestError> {
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            PostgrestError::InvalidParameters(format!("Invalid header value: {}", value))
        })?;
        let header_name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
            PostgrestError::InvalidParameters(format!("Invalid header name: {}", key))
        })?;

        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    /// Send requests on behalf of a signed-in user
    pub fn with_auth(self, token: &str) -> Result<Self, PostgrestError> {
        self.with_header("Authorization", &format!("Bearer {}", token))
    }

    /// Target a schema other than `public`
    pub fn schema(self, schema_name: &str) -> Result<Self, PostgrestError> {
        self.with_header("Accept-Profile", schema_name)?
            .with_header("Content-Profile", schema_name)
    }

    fn set_param(&mut self, key: &str, value: String) {
        self.query_params.retain(|(k, _)| k != key);
        self.query_params.push((key.to_string(), value));
    }

    fn push_param(mut self, key: &str, value: String) -> Self {
        self.query_params.push((key.to_string(), value));
        self
    }

    /// Columns (and embedded relations) to return
    pub fn select(mut self, columns: &str) -> Self {
        self.set_param("select", columns.to_string());
        self
    }

    pub fn eq(self, column: &str, value: &str) -> Self {
        self.push_param(column, format!("eq.{}", value))
    }

    pub fn neq(self, column: &str, value: &str) -> Self {
        self.push_param(column, format!("neq.{}", value))
    }

    pub fn gt(self, column: &str, value: &str) -> Self {
        self.push_param(column, format!("gt.{}", value))
    }

    pub fn gte(self, column: &str, value: &str) -> Self {
        self.push_param(column, format!("gte.{}", value))
    }

    pub fn lt(self, column: &str, value: &str) -> Self {
        self.push_param(column, format!("lt.{}", value))
    }

    pub fn lte(self, column: &str, value: &str) -> Self {
        self.push_param(column, format!("lte.{}", value))
    }

    pub fn like(self, column: &str, pattern: &str) -> Self {
        self.push_param(column, format!("like.{}", pattern))
    }

    /// Case insensitive pattern match
    pub fn ilike(self, column: &str, pattern: &str) -> Self {
        self.push_param(column, format!("ilike.{}", pattern))
    }

    pub fn is_null(self, column: &str) -> Self {
        self.push_param(column, "is.null".to_string())
    }

    pub fn in_list(self, column: &str, values: &[&str]) -> Self {
        self.push_param(column, format!("in.({})", values.join(",")))
    }

    /// Disjunction of raw filter expressions, e.g. `title.ilike.*x*,description.ilike.*x*`
    pub fn or(self, expressions: &str) -> Self {
        self.push_param("or", format!("({})", expressions))
    }

    /// Conjunction of nested logic trees, e.g. `or(a.eq.1,b.eq.2),c.gt.3`
    pub fn and(self, expressions: &str) -> Self {
        self.push_param("and", format!("({})", expressions))
    }

    pub fn not(self, column: &str, operator_with_value: &str) -> Self {
        self.push_param(column, format!("not.{}", operator_with_value))
    }

    pub fn order(mut self, column: &str, order: SortOrder) -> Self {
        let order_str = match order {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        };
        self.set_param("order", format!("{}.{}", column, order_str));
        self
    }

    pub fn limit(mut self, count: usize) -> Self {
        self.set_param("limit", count.to_string());
        self
    }

    pub fn offset(mut self, count: usize) -> Self {
        self.set_param("offset", count.to_string());
        self
    }

    fn build_url(&self) -> Result<String, PostgrestError> {
        let mut url = Url::parse(&format!("{}/rest/v1/{}", self.base_url, self.table))?;
        if !self.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query_params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url.to_string())
    }

    fn headers_with_prefer(&self, prefer: &str) -> HeaderMap {
        let mut headers = self.headers.clone();
        if let Ok(value) = HeaderValue::from_str(prefer) {
            headers.insert(HeaderName::from_static("prefer"), value);
        }
        headers
    }

    /// Fetch matching rows
    pub async fn execute<T: for<'de> Deserialize<'de>>(&self) -> Result<Vec<T>, PostgrestError> {
        let url = self.build_url()?;
        log::debug!("GET {}", url);

        let response = self
            .http_client
            .get(&url)
            .headers(self.headers.clone())
            .send()
            .await?;

        let response = check_status(response).await?;
        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| PostgrestError::DeserializationError(e.to_string()))
    }

    /// Fetch at most one row; `None` when nothing matched
    pub async fn maybe_single<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, PostgrestError> {
        let rows = self.clone().limit(1).execute::<T>().await?;
        Ok(rows.into_iter().next())
    }

    /// Exact number of matching rows, read from the `Content-Range` header
    pub async fn count(&self) -> Result<usize, PostgrestError> {
        let url = self.clone().limit(1).build_url()?;
        let response = self
            .http_client
            .get(&url)
            .headers(self.headers_with_prefer("count=exact"))
            .send()
            .await?;

        let response = check_status(response).await?;
        let range = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                PostgrestError::DeserializationError("missing Content-Range header".to_string())
            })?;
        parse_content_range_total(range)
    }

    /// Insert one row or an array of rows and return the stored representation
    pub async fn insert<T: Serialize>(&self, values: T) -> Result<Value, PostgrestError> {
        let url = self.build_url()?;
        log::debug!("POST {}", url);

        let response = self
            .http_client
            .post(&url)
            .headers(self.headers_with_prefer("return=representation"))
            .json(&values)
            .send()
            .await?;

        read_body(check_status(response).await?).await
    }

    /// Insert or merge on the given conflict columns
    pub async fn upsert<T: Serialize>(
        &self,
        values: T,
        on_conflict: Option<&str>,
    ) -> Result<Value, PostgrestError> {
        let mut client = self.clone();
        if let Some(columns) = on_conflict {
            client.set_param("on_conflict", columns.to_string());
        }
        let url = client.build_url()?;
        log::debug!("POST (upsert) {}", url);

        let response = self
            .http_client
            .post(&url)
            .headers(self.headers_with_prefer("return=representation,resolution=merge-duplicates"))
            .json(&values)
            .send()
            .await?;

        read_body(check_status(response).await?).await
    }

    /// Patch every row matching the filters
    pub async fn update<T: Serialize>(&self, values: T) -> Result<Value, PostgrestError> {
        let url = self.build_url()?;
        log::debug!("PATCH {}", url);

        let response = self
            .http_client
            .patch(&url)
            .headers(self.headers_with_prefer("return=representation"))
            .json(&values)
            .send()
            .await?;

        read_body(check_status(response).await?).await
    }

    /// Delete every row matching the filters
    pub async fn delete(&self) -> Result<Value, PostgrestError> {
        let url = self.build_url()?;
        log::debug!("DELETE {}", url);

        let response = self
            .http_client
            .delete(&url)
            .headers(self.headers_with_prefer("return=representation"))
            .send()
            .await?;

        read_body(check_status(response).await?).await
    }
}

/// Turn a non-success response into a structured error.
async fn check_status(response: Response) -> Result<Response, PostgrestError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error response".to_string());

    match serde_json::from_str::<PostgrestApiErrorDetails>(&error_text) {
        Ok(details) => Err(PostgrestError::ApiError { details, status }),
        Err(_) => Err(PostgrestError::UnparsedApiError {
            message: error_text,
            status,
        }),
    }
}

/// Mutations may answer 201/204 with an empty body.
async fn read_body(response: Response) -> Result<Value, PostgrestError> {
    let body_text = response.text().await.map_err(|e| {
        PostgrestError::DeserializationError(format!("Failed to read response body: {}", e))
    })?;

    if body_text.trim().is_empty() {
        Ok(Value::Array(Vec::new()))
    } else {
        serde_json::from_str::<Value>(&body_text)
            .map_err(|e| PostgrestError::DeserializationError(e.to_string()))
    }
}

fn parse_content_range_total(range: &str) -> Result<usize, PostgrestError> {
    range
        .rsplit('/')
        .next()
        .and_then(|total| total.trim().parse::<usize>().ok())
        .ok_or_else(|| {
            PostgrestError::DeserializationError(format!("unexpected Content-Range: {}", range))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, table: &str) -> PostgrestClient {
        PostgrestClient::new(&server.uri(), "fake-key", table, reqwest::Client::new())
    }

    #[tokio::test]
    async fn test_select_with_filters() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/skill_videos"))
            .and(query_param("select", "*"))
            .and(query_param("status", "eq.approved"))
            .and(query_param("order", "created_at.desc"))
            .and(header("apikey", "fake-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "v1", "title": "Fade haircut" },
                { "id": "v2", "title": "Pipe fitting" }
            ])))
            .mount(&mock_server)
            .await;

        let rows = client(&mock_server, "skill_videos")
            .select("*")
            .eq("status", "approved")
            .order("created_at", SortOrder::Descending)
            .execute::<Value>()
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["title"], "Fade haircut");
    }

    #[tokio::test]
    async fn test_in_list_and_or_filters() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .and(query_param("id", "in.(a,b)"))
            .and(query_param("or", "(full_name.ilike.*jo*,email.ilike.*jo*)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "a" }])))
            .mount(&mock_server)
            .await;

        let rows = client(&mock_server, "profiles")
            .select("*")
            .in_list("id", &["a", "b"])
            .or("full_name.ilike.*jo*,email.ilike.*jo*")
            .execute::<Value>()
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_and_groups_logic_trees() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .and(query_param("and", "(or(status.is.null,status.neq.banned),user_type.eq.provider)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let rows = client(&mock_server, "profiles")
            .select("*")
            .and("or(status.is.null,status.neq.banned),user_type.eq.provider")
            .execute::<Value>()
            .await
            .unwrap();

        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_insert_returns_representation() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/video_likes"))
            .and(header("prefer", "return=representation"))
            .and(body_json(json!({ "video_id": "v1", "user_id": "u1" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([
                { "id": "l1", "video_id": "v1", "user_id": "u1" }
            ])))
            .mount(&mock_server)
            .await;

        let inserted = client(&mock_server, "video_likes")
            .insert(json!({ "video_id": "v1", "user_id": "u1" }))
            .await
            .unwrap();

        assert_eq!(inserted[0]["id"], "l1");
    }

    #[tokio::test]
    async fn test_unique_violation_is_structured() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/video_views"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint",
                "details": null,
                "hint": null
            })))
            .mount(&mock_server)
            .await;

        let err = client(&mock_server, "video_views")
            .insert(json!({ "video_id": "v1", "viewer_id": "u1" }))
            .await
            .unwrap_err();

        assert!(err.is_unique_violation());
        assert_eq!(err.status(), Some(StatusCode::CONFLICT));
    }

    #[tokio::test]
    async fn test_unparsed_error_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/bookings"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&mock_server)
            .await;

        let err = client(&mock_server, "bookings")
            .select("*")
            .execute::<Value>()
            .await
            .unwrap_err();

        match err {
            PostgrestError::UnparsedApiError { message, status } => {
                assert_eq!(message, "bad gateway");
                assert_eq!(status, StatusCode::BAD_GATEWAY);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_and_empty_delete_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/rest/v1/bookings"))
            .and(query_param("id", "eq.b1"))
            .and(body_json(json!({ "status": "confirmed" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{ "id": "b1", "status": "confirmed" }])),
            )
            .mount(&mock_server)
            .await;

        Mock::given(method("DELETE"))
            .and(path("/rest/v1/video_comments"))
            .and(query_param("id", "eq.c1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let updated = client(&mock_server, "bookings")
            .eq("id", "b1")
            .update(json!({ "status": "confirmed" }))
            .await
            .unwrap();
        assert_eq!(updated[0]["status"], "confirmed");

        let deleted = client(&mock_server, "video_comments")
            .eq("id", "c1")
            .delete()
            .await
            .unwrap();
        assert_eq!(deleted, json!([]));
    }

    #[tokio::test]
    async fn test_upsert_on_conflict() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/video_moderation"))
            .and(query_param("on_conflict", "video_id"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "video_id": "v1" }])))
            .mount(&mock_server)
            .await;

        let rows = client(&mock_server, "video_moderation")
            .upsert(json!({ "video_id": "v1", "status": "approved" }), Some("video_id"))
            .await
            .unwrap();
        assert_eq!(rows[0]["video_id"], "v1");
    }

    #[tokio::test]
    async fn test_exact_count() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/work_samples"))
            .and(query_param("provider_id", "eq.p1"))
            .and(header("prefer", "count=exact"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-range", "0-0/7")
                    .set_body_json(json!([{ "id": "w1" }])),
            )
            .mount(&mock_server)
            .await;

        let count = client(&mock_server, "work_samples")
            .select("id")
            .eq("provider_id", "p1")
            .count()
            .await
            .unwrap();
        assert_eq!(count, 7);
    }

    #[test]
    fn test_content_range_parsing() {
        assert_eq!(parse_content_range_total("*/0").unwrap(), 0);
        assert_eq!(parse_content_range_total("0-24/3573").unwrap(), 3573);
        assert!(parse_content_range_total("0-24/*").is_err());
    }
}
