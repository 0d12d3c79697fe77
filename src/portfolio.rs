//! Provider portfolio of work samples

use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::{Backend, BackendExt, Query};
use crate::error::{Error, Result};
use crate::models::{tables, Profile, WorkSample};
use crate::uploads::{Bucket, Media, Uploader};

pub struct Portfolio {
    backend: Arc<dyn Backend>,
    uploader: Uploader,
    provider_id: String,
}

impl Portfolio {
    pub fn new(backend: Arc<dyn Backend>, uploader: Uploader, provider: &Profile) -> Result<Self> {
        if !provider.is_provider() {
            return Err(Error::forbidden("only providers have a portfolio"));
        }
        Ok(Self {
            backend,
            uploader,
            provider_id: provider.id.clone(),
        })
    }

    pub async fn list(&self) -> Result<Vec<WorkSample>> {
        self.backend
            .select_as(
                &Query::table(tables::WORK_SAMPLES)
                    .eq("provider_id", self.provider_id.as_str())
                    .order("created_at", false),
            )
            .await
    }

    /// Upload the image and add it as a sample
    pub async fn add(&self, title: &str, description: Option<&str>, image: Media) -> Result<WorkSample> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::validation("Please give the sample a title"));
        }
        let uploaded = self
            .uploader
            .upload(Bucket::Portfolio, &self.provider_id, image)
            .await?;

        let description = description.map(str::trim).filter(|d| !d.is_empty());
        let inserted = self
            .backend
            .insert_as::<WorkSample>(
                tables::WORK_SAMPLES,
                json!({
                    "provider_id": self.provider_id,
                    "title": title,
                    "description": description,
                    "image_url": uploaded.public_url,
                }),
            )
            .await;
        match inserted {
            Ok(sample) => {
                info!(sample_id = %sample.id, "work sample added");
                Ok(sample)
            }
            Err(e) => {
                // Don't leave an orphaned image behind.
                if let Err(cleanup) = self.uploader.delete(Bucket::Portfolio, &uploaded.path).await {
                    warn!(path = %uploaded.path, error = %cleanup, "removing orphaned image failed");
                }
                Err(e)
            }
        }
    }

    pub async fn update(&self, sample_id: &str, title: &str, description: Option<&str>) -> Result<WorkSample> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::validation("Please give the sample a title"));
        }
        let updated: Vec<WorkSample> = self
            .backend
            .update_as(
                &Query::table(tables::WORK_SAMPLES)
                    .eq("id", sample_id)
                    .eq("provider_id", self.provider_id.as_str()),
                json!({ "title": title, "description": description.map(str::trim) }),
            )
            .await?;
        updated
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("work sample {}", sample_id)))
    }

    pub async fn remove(&self, sample_id: &str) -> Result<()> {
        let deleted = self
            .backend
            .delete(
                &Query::table(tables::WORK_SAMPLES)
                    .eq("id", sample_id)
                    .eq("provider_id", self.provider_id.as_str()),
            )
            .await?;
        if deleted.is_empty() {
            return Err(Error::not_found(format!("work sample {}", sample_id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Op};
    use crate::uploads::testing::MemoryStore;

    fn provider() -> Profile {
        serde_json::from_value(json!({ "id": "p1", "full_name": "Tola", "user_type": "provider" })).unwrap()
    }

    fn setup() -> (Portfolio, Arc<MemoryBackend>, Arc<MemoryStore>) {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(MemoryStore::default());
        let portfolio = Portfolio::new(backend.clone(), Uploader::new(store.clone()), &provider()).unwrap();
        (portfolio, backend, store)
    }

    #[tokio::test]
    async fn test_add_update_remove() {
        let (portfolio, _, store) = setup();
        let image = Media::new("pool.webp", "image/webp", vec![1; 16]);
        let sample = portfolio.add(" Pool deck ", Some(""), image).await.unwrap();
        assert_eq!(sample.title, "Pool deck");
        assert_eq!(sample.description, None);
        assert!(sample.image_url.starts_with("https://cdn.test/portfolio/p1/"));
        assert_eq!(store.objects.lock().unwrap().len(), 1);

        let sample = portfolio.update(&sample.id, "Pool deck", Some("Teak")).await.unwrap();
        assert_eq!(sample.description.as_deref(), Some("Teak"));

        portfolio.remove(&sample.id).await.unwrap();
        assert!(portfolio.list().await.unwrap().is_empty());
        assert!(matches!(portfolio.remove(&sample.id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_insert_removes_image() {
        let (portfolio, backend, store) = setup();
        backend.fail_next(Op::Insert, tables::WORK_SAMPLES, "42501");
        let image = Media::new("pool.png", "image/png", vec![1]);
        assert!(portfolio.add("Pool", None, image).await.is_err());
        assert!(store.objects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_oversized_image_without_upload() {
        let (portfolio, backend, store) = setup();
        let image = Media::new("big.png", "image/png", vec![0; crate::uploads::MAX_IMAGE_BYTES + 1]);
        assert!(matches!(portfolio.add("Big", None, image).await, Err(Error::Validation(_))));
        assert!(store.objects.lock().unwrap().is_empty());
        assert!(backend.calls().is_empty());
    }
}
