//! Object storage client for the skillfeed marketplace backend
//!
//! Uploads media into named buckets, removes it again, and resolves the
//! public or signed URLs that profile and video rows store.

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Invalid object path: {0}")]
    InvalidPath(String),
}

/// Upload options
#[derive(Debug, Clone, Serialize, Default)]
pub struct FileOptions {
    pub cache_control: Option<String>,
    pub content_type: Option<String>,
    pub upsert: Option<bool>,
}

impl FileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_control(mut self, cache_control: &str) -> Self {
        self.cache_control = Some(cache_control.to_string());
        self
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = Some(upsert);
        self
    }
}

/// Body returned by a successful upload
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    #[serde(rename = "Key", alias = "key")]
    pub key: String,
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    #[serde(rename = "signedURL", alias = "signedUrl")]
    signed_url: String,
}

/// Storage client scoped to one bucket
pub struct StorageBucketClient<'a> {
    parent: &'a StorageClient,
    bucket_id: String,
}

#[derive(Clone)]
pub struct StorageClient {
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    http_client: Client,
}

impl StorageClient {
    pub fn new(base_url: &str, api_key: &str, http_client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: None,
            http_client,
        }
    }

    /// Send requests on behalf of a signed-in user
    pub fn with_auth(mut self, token: &str) -> Self {
        self.access_token = Some(token.to_string());
        self
    }

    pub fn from<'a>(&'a self, bucket_id: &str) -> StorageBucketClient<'a> {
        StorageBucketClient {
            parent: self,
            bucket_id: bucket_id.to_string(),
        }
    }

    fn bearer(&self) -> String {
        format!(
            "Bearer {}",
            self.access_token.as_deref().unwrap_or(&self.api_key)
        )
    }
}

impl<'a> StorageBucketClient<'a> {
    fn object_url(&self, path: &str) -> Result<Url> {
        if path.is_empty() || path.starts_with('/') || path.split('/').any(|s| s == "..") {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        let mut url = Url::parse(&self.parent.base_url)?;
        url.set_path(&format!("/storage/v1/object/{}/{}", self.bucket_id, path));
        Ok(url)
    }

    /// Upload `contents` to `path` inside the bucket
    pub async fn upload(
        &self,
        path: &str,
        contents: Vec<u8>,
        options: Option<FileOptions>,
    ) -> Result<UploadResponse> {
        let mut url = self.object_url(path)?;
        let options = options.unwrap_or_default();

        {
            let mut query_pairs = url.query_pairs_mut();
            if let Some(cache_control) = &options.cache_control {
                query_pairs.append_pair("cache_control", cache_control);
            }
            if let Some(upsert) = &options.upsert {
                query_pairs.append_pair("upsert", &upsert.to_string());
            }
        }

        let file_name = path.rsplit('/').next().unwrap_or(path).to_string();
        let mut part = Part::bytes(contents).file_name(file_name);
        if let Some(content_type) = &options.content_type {
            part = part.mime_str(content_type)?;
        }
        let form = Form::new().part("file", part);

        log::debug!("uploading {}/{}", self.bucket_id, path);

        let response = self
            .parent
            .http_client
            .post(url)
            .header("apikey", &self.parent.api_key)
            .header("Authorization", self.parent.bearer())
            .multipart(form)
            .send()
            .await?;

        let response = check(response).await?;
        Ok(response.json::<UploadResponse>().await?)
    }

    /// Remove objects by path
    pub async fn remove(&self, paths: &[&str]) -> Result<()> {
        let url = format!(
            "{}/storage/v1/object/{}",
            self.parent.base_url, self.bucket_id
        );

        let payload = serde_json::json!({
            "prefixes": paths
        });

        let response = self
            .parent
            .http_client
            .delete(&url)
            .header("apikey", &self.parent.api_key)
            .header("Authorization", self.parent.bearer())
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        check(response).await?;
        Ok(())
    }

    /// Public URL for an object in a public bucket
    pub fn get_public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.parent.base_url, self.bucket_id, path
        )
    }

    /// Time-limited URL for an object in a private bucket
    pub async fn create_signed_url(&self, path: &str, expires_in: u32) -> Result<String> {
        let url = format!(
            "{}/storage/v1/object/sign/{}/{}",
            self.parent.base_url, self.bucket_id, path
        );

        let response = self
            .parent
            .http_client
            .post(&url)
            .header("apikey", &self.parent.api_key)
            .header("Authorization", self.parent.bearer())
            .json(&serde_json::json!({ "expiresIn": expires_in }))
            .send()
            .await?;

        let signed: SignedUrlResponse = check(response).await?.json().await?;
        Ok(format!("{}/storage/v1{}", self.parent.base_url, signed.signed_url))
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response.text().await?;
    log::warn!("storage request failed with {}: {}", status, message);
    Err(StorageError::ApiError { status, message })
}
