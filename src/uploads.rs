//! Media uploads
//!
//! Files are checked against the bucket's size and type limits, stored under
//! `{owner}/{millis}_{random}.{ext}` and referenced afterwards by public URL.

use async_trait::async_trait;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use skillfeed_storage::{FileOptions, StorageClient};

use crate::error::{Error, Result};

pub const MAX_VIDEO_BYTES: usize = 50 * 1024 * 1024;
pub const MAX_IMAGE_BYTES: usize = 2 * 1024 * 1024;

const VIDEO_TYPES: &[&str] = &["video/mp4", "video/webm", "video/quicktime"];
const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/jpg"];

const CACHE_CONTROL: &str = "3600";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Videos,
    Avatars,
    Portfolio,
    ChatAttachments,
}

impl Bucket {
    pub fn name(&self) -> &'static str {
        match self {
            Bucket::Videos => "videos",
            Bucket::Avatars => "avatars",
            Bucket::Portfolio => "portfolio",
            Bucket::ChatAttachments => "chat-attachments",
        }
    }

    /// Size cap and accepted MIME types; chat attachments take anything
    fn limits(&self) -> Option<(usize, &'static [&'static str])> {
        match self {
            Bucket::Videos => Some((MAX_VIDEO_BYTES, VIDEO_TYPES)),
            Bucket::Avatars | Bucket::Portfolio => Some((MAX_IMAGE_BYTES, IMAGE_TYPES)),
            Bucket::ChatAttachments => None,
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A file picked by the user
#[derive(Debug, Clone, PartialEq)]
pub struct Media {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Media {
    pub fn new(file_name: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            bytes,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn extension(&self) -> &str {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty())
            .unwrap_or("bin")
    }
}

pub fn validate(bucket: Bucket, media: &Media) -> Result<()> {
    let Some((max, types)) = bucket.limits() else {
        return Ok(());
    };
    if media.size() > max {
        return Err(Error::validation(format!(
            "File size exceeds {}MB limit",
            max / (1024 * 1024)
        )));
    }
    if !types.contains(&media.content_type.as_str()) {
        return Err(Error::validation(format!(
            "File type {} is not supported",
            media.content_type
        )));
    }
    Ok(())
}

/// `{owner}/{millis}_{random}.{ext}`
pub fn object_path(owner: &str, media: &Media, millis: i64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(11)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}/{}_{}.{}", owner, millis, suffix, media.extension())
}

/// Bucketed object storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: Bucket, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    async fn remove(&self, bucket: Bucket, paths: &[&str]) -> Result<()>;

    fn public_url(&self, bucket: Bucket, path: &str) -> String;
}

#[async_trait]
impl ObjectStore for StorageClient {
    async fn put(&self, bucket: Bucket, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let options = FileOptions::new()
            .with_content_type(content_type)
            .with_cache_control(CACHE_CONTROL)
            .with_upsert(false);
        self.from(bucket.name()).upload(path, bytes, Some(options)).await?;
        Ok(())
    }

    async fn remove(&self, bucket: Bucket, paths: &[&str]) -> Result<()> {
        self.from(bucket.name()).remove(paths).await?;
        Ok(())
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        self.from(bucket.name()).get_public_url(path)
    }
}

/// Where an upload landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uploaded {
    pub bucket: Bucket,
    pub path: String,
    pub public_url: String,
}

#[derive(Clone)]
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Validate and store `media` under `owner`
    pub async fn upload(&self, bucket: Bucket, owner: &str, media: Media) -> Result<Uploaded> {
        validate(bucket, &media)?;
        let path = object_path(owner, &media, Utc::now().timestamp_millis());
        debug!(%bucket, %path, size = media.size(), "uploading");

        self.store
            .put(bucket, &path, media.bytes, &media.content_type)
            .await?;
        let public_url = self.store.public_url(bucket, &path);
        info!(%bucket, %path, "upload complete");
        Ok(Uploaded {
            bucket,
            path,
            public_url,
        })
    }

    pub async fn delete(&self, bucket: Bucket, path: &str) -> Result<()> {
        self.store.remove(bucket, &[path]).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Stored objects kept in memory
    #[derive(Default)]
    pub struct MemoryStore {
        pub objects: Mutex<Vec<(Bucket, String, usize)>>,
        pub fail: Mutex<bool>,
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn put(&self, bucket: Bucket, path: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
            if *self.fail.lock().unwrap() {
                return Err(Error::Storage(skillfeed_storage::StorageError::ApiError {
                    status: 500,
                    message: "disk full".to_string(),
                }));
            }
            self.objects
                .lock()
                .unwrap()
                .push((bucket, path.to_string(), bytes.len()));
            Ok(())
        }

        async fn remove(&self, bucket: Bucket, paths: &[&str]) -> Result<()> {
            self.objects
                .lock()
                .unwrap()
                .retain(|(b, p, _)| !(*b == bucket && paths.contains(&p.as_str())));
            Ok(())
        }

        fn public_url(&self, bucket: Bucket, path: &str) -> String {
            format!("https://cdn.test/{}/{}", bucket, path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryStore;
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_validate_limits() {
        let clip = Media::new("clip.mp4", "video/mp4", vec![0; 1024]);
        assert!(validate(Bucket::Videos, &clip).is_ok());

        let huge = Media::new("clip.mp4", "video/mp4", vec![0; MAX_VIDEO_BYTES + 1]);
        let err = validate(Bucket::Videos, &huge).unwrap_err();
        assert_eq!(err.to_string(), "Invalid input: File size exceeds 50MB limit");

        let gif = Media::new("face.gif", "image/gif", vec![0; 10]);
        assert!(matches!(validate(Bucket::Avatars, &gif), Err(Error::Validation(_))));

        let big_avatar = Media::new("face.png", "image/png", vec![0; MAX_IMAGE_BYTES + 1]);
        assert!(validate(Bucket::Portfolio, &big_avatar).is_err());

        let pdf = Media::new("quote.pdf", "application/pdf", vec![0; 10]);
        assert!(validate(Bucket::ChatAttachments, &pdf).is_ok());
    }

    #[test]
    fn test_object_path_shape() {
        let media = Media::new("My Clip.MOV", "video/quicktime", vec![]);
        let path = object_path("u1", &media, 1_700_000_000_000);
        let (owner, name) = path.split_once('/').unwrap();
        assert_eq!(owner, "u1");
        assert!(name.starts_with("1700000000000_"));
        assert!(name.ends_with(".MOV"));
        assert_eq!(name.len(), "1700000000000_".len() + 11 + ".MOV".len());

        assert_eq!(Media::new("noext", "x", vec![]).extension(), "bin");
    }

    #[tokio::test]
    async fn test_uploader_rejects_before_storing() {
        let store = Arc::new(MemoryStore::default());
        let uploader = Uploader::new(store.clone());
        let err = uploader
            .upload(Bucket::Avatars, "u1", Media::new("a.bmp", "image/bmp", vec![1]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(store.objects.lock().unwrap().is_empty());

        let done = uploader
            .upload(Bucket::Avatars, "u1", Media::new("a.png", "image/png", vec![1, 2]))
            .await
            .unwrap();
        assert!(done.path.starts_with("u1/"));
        assert_eq!(done.public_url, format!("https://cdn.test/avatars/{}", done.path));

        uploader.delete(Bucket::Avatars, &done.path).await.unwrap();
        assert!(store.objects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_storage_client_upload_options() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/videos/u1/1_abc.mp4"))
            .and(query_param("cache_control", "3600"))
            .and(query_param("upsert", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Key": "videos/u1/1_abc.mp4"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let storage = StorageClient::new(&server.uri(), "anon", reqwest::Client::new());
        storage
            .put(Bucket::Videos, "u1/1_abc.mp4", vec![1, 2, 3], "video/mp4")
            .await
            .unwrap();
        assert_eq!(
            storage.public_url(Bucket::Videos, "u1/1_abc.mp4"),
            format!("{}/storage/v1/object/public/videos/u1/1_abc.mp4", server.uri())
        );
    }
}
