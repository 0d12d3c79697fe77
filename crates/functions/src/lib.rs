//! Serverless function client for the skillfeed marketplace backend
//!
//! Invokes the functions that dispatch broadcast and reminder email.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum FunctionsError {
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Function returned {status}: {message}")]
    FunctionError { status: u16, message: String },
}

pub type Result<T> = std::result::Result<T, FunctionsError>;

#[derive(Debug, Default, Clone)]
pub struct FunctionOptions {
    pub headers: Option<HashMap<String, String>>,
}

/// Serverless function client
#[derive(Clone)]
pub struct FunctionsClient {
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    http_client: Client,
}

impl FunctionsClient {
    pub fn new(base_url: &str, api_key: &str, http_client: Client) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            access_token: None,
            http_client,
        }
    }

    /// Invoke as a signed-in user
    pub fn with_auth(mut self, token: &str) -> Self {
        self.access_token = Some(token.to_string());
        self
    }

    /// Invoke `function_name` with an optional JSON body
    ///
    /// An empty response body deserialises as JSON `null`.
    pub async fn invoke<T, B>(
        &self,
        function_name: &str,
        body: Option<B>,
        options: Option<FunctionOptions>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| FunctionsError::UrlError(url::ParseError::EmptyHost))?
            .pop_if_empty()
            .push("functions")
            .push("v1")
            .push(function_name);

        let opts = options.unwrap_or_default();
        let token = self.access_token.as_deref().unwrap_or(&self.api_key);

        let mut request = self
            .http_client
            .post(url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", token));

        if let Some(headers) = opts.headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }

        if let Some(body_data) = body {
            request = request.json(&body_data);
        }

        log::debug!("invoking function {}", function_name);
        let response = request.send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            log::warn!("function {} failed with {}: {}", function_name, status, text);
            return Err(FunctionsError::FunctionError {
                status: status.as_u16(),
                message: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(serde_json::from_value(serde_json::Value::Null)?);
        }
        Ok(serde_json::from_str(&text)?)
    }
}
