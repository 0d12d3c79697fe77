//! A provider's own videos
//!
//! New videos start out `pending` and only reach the public feed once a
//! moderator approves them.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::backend::{Backend, BackendExt, Query};
use crate::error::{Error, Result};
use crate::models::{tables, Category, Profile, SkillVideo, VideoStatus};
use crate::uploads::{Bucket, Media, Uploader};

/// Form fields shared by uploads and edits
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VideoDetails {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
}

impl VideoDetails {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn category(mut self, category_id: &str) -> Self {
        self.category_id = Some(category_id.to_string());
        self
    }

    fn validated(mut self) -> Result<Self> {
        self.title = self.title.trim().to_string();
        if self.title.is_empty() {
            return Err(Error::validation("Please give the video a title"));
        }
        self.description = self
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        Ok(self)
    }
}

/// Categories for pickers, by name
pub async fn categories(backend: &dyn Backend) -> Result<Vec<Category>> {
    backend
        .select_as(&Query::table(tables::CATEGORIES).order("name", true))
        .await
}

pub struct VideoLibrary {
    backend: Arc<dyn Backend>,
    uploader: Uploader,
    provider_id: String,
}

impl VideoLibrary {
    pub fn new(backend: Arc<dyn Backend>, uploader: Uploader, provider: &Profile) -> Result<Self> {
        if !provider.is_provider() {
            return Err(Error::forbidden("only providers can manage videos"));
        }
        Ok(Self {
            backend,
            uploader,
            provider_id: provider.id.clone(),
        })
    }

    /// All of the provider's videos, whatever their status, newest first
    pub async fn list(&self) -> Result<Vec<SkillVideo>> {
        self.backend
            .select_as(
                &Query::table(tables::VIDEOS)
                    .eq("provider_id", self.provider_id.as_str())
                    .order("created_at", false),
            )
            .await
    }

    /// Store the file, then create the video row
    pub async fn upload(&self, media: Media, details: VideoDetails) -> Result<SkillVideo> {
        let details = details.validated()?;
        let uploaded = self
            .uploader
            .upload(Bucket::Videos, &self.provider_id, media)
            .await?;
        self.insert(&uploaded.public_url, details).await
    }

    /// Create a video row for media hosted elsewhere
    pub async fn publish_url(&self, video_url: &str, details: VideoDetails) -> Result<SkillVideo> {
        let details = details.validated()?;
        let url = url::Url::parse(video_url.trim())?;
        self.insert(url.as_str(), details).await
    }

    async fn insert(&self, video_url: &str, details: VideoDetails) -> Result<SkillVideo> {
        let mut row = serde_json::to_value(&details)?;
        row["provider_id"] = json!(self.provider_id);
        row["video_url"] = json!(video_url);
        row["status"] = json!(VideoStatus::Pending);
        let video: SkillVideo = self.backend.insert_as(tables::VIDEOS, row).await?;
        info!(video_id = %video.id, provider_id = %self.provider_id, "video submitted for review");
        Ok(video)
    }

    pub async fn edit(&self, video_id: &str, details: VideoDetails) -> Result<SkillVideo> {
        let details = details.validated()?;
        let updated: Vec<SkillVideo> = self
            .backend
            .update_as(
                &Query::table(tables::VIDEOS)
                    .eq("id", video_id)
                    .eq("provider_id", self.provider_id.as_str()),
                serde_json::to_value(&details)?,
            )
            .await?;
        updated
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("video {}", video_id)))
    }

    pub async fn delete(&self, video_id: &str) -> Result<()> {
        let deleted = self
            .backend
            .delete(
                &Query::table(tables::VIDEOS)
                    .eq("id", video_id)
                    .eq("provider_id", self.provider_id.as_str()),
            )
            .await?;
        if deleted.is_empty() {
            return Err(Error::not_found(format!("video {}", video_id)));
        }
        info!(video_id, "video deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::feed::{load_feed, FeedQuery};
    use crate::uploads::testing::MemoryStore;

    fn profile(id: &str, role: &str) -> Profile {
        serde_json::from_value(json!({ "id": id, "full_name": id, "user_type": role })).unwrap()
    }

    fn library(backend: Arc<MemoryBackend>) -> VideoLibrary {
        let uploader = Uploader::new(Arc::new(MemoryStore::default()));
        VideoLibrary::new(backend, uploader, &profile("p1", "provider")).unwrap()
    }

    #[test]
    fn test_clients_cannot_manage_videos() {
        let uploader = Uploader::new(Arc::new(MemoryStore::default()));
        let backend = Arc::new(MemoryBackend::new());
        assert!(matches!(
            VideoLibrary::new(backend, uploader, &profile("c1", "client")),
            Err(Error::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_starts_pending_and_stays_out_of_feed() {
        let backend = Arc::new(crate::feed::fixtures::marketplace());
        let library = library(backend.clone());
        let clip = Media::new("tiles.mp4", "video/mp4", vec![0; 128]);
        let video = library
            .upload(clip, VideoDetails::new(" Floor tiling ").category("cat-tiles"))
            .await
            .unwrap();

        assert_eq!(video.status, VideoStatus::Pending);
        assert_eq!(video.title, "Floor tiling");
        assert!(video.video_url.starts_with("https://cdn.test/videos/p1/"));

        let feed = load_feed(backend.as_ref(), None, &FeedQuery::default()).await.unwrap();
        assert!(feed.iter().all(|c| c.video.id != video.id));
        assert!(library.list().await.unwrap().iter().any(|v| v.id == video.id));
    }

    #[tokio::test]
    async fn test_publish_url_validates() {
        let library = library(Arc::new(MemoryBackend::new()));
        assert!(matches!(
            library.publish_url("not a url", VideoDetails::new("x")).await,
            Err(Error::Url(_))
        ));
        assert!(matches!(
            library.publish_url("https://youtu.be/x", VideoDetails::new("  ")).await,
            Err(Error::Validation(_))
        ));
        let video = library
            .publish_url("https://youtu.be/x", VideoDetails::new("Demo").description("  "))
            .await
            .unwrap();
        assert_eq!(video.description, None);
    }

    #[tokio::test]
    async fn test_edit_and_delete_only_own() {
        let backend = Arc::new(crate::feed::fixtures::marketplace());
        let library = library(backend.clone());

        let edited = library
            .edit("v1", VideoDetails::new("Bathroom tiling 2.0").description("Now with grout"))
            .await
            .unwrap();
        assert_eq!(edited.title, "Bathroom tiling 2.0");
        assert_eq!(edited.status, VideoStatus::Approved);

        assert!(matches!(
            library.edit("v2", VideoDetails::new("Mine now")).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(library.delete("v2").await, Err(Error::NotFound(_))));
        library.delete("v3").await.unwrap();
        assert_eq!(library.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_categories_by_name() {
        let backend = crate::feed::fixtures::marketplace();
        let names: Vec<String> = categories(&backend).await.unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Gardening", "Tiling"]);
    }
}
