//! Video comments

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::backend::{Backend, BackendExt, Query};
use crate::error::{Error, Result};
use crate::models::{tables, Comment, Profile};

#[derive(Debug, Clone, PartialEq)]
pub struct CommentView {
    pub comment: Comment,
    pub author_name: Option<String>,
    pub author_avatar: Option<String>,
}

/// Comments under one video, oldest first
pub struct CommentSheet {
    backend: Arc<dyn Backend>,
    video_id: String,
    viewer: Option<String>,
    comments: Vec<CommentView>,
}

impl CommentSheet {
    pub async fn open(backend: Arc<dyn Backend>, video_id: &str, viewer: Option<&str>) -> Result<Self> {
        let mut sheet = Self {
            backend,
            video_id: video_id.to_string(),
            viewer: viewer.map(String::from),
            comments: Vec::new(),
        };
        sheet.reload().await?;
        Ok(sheet)
    }

    pub fn comments(&self) -> &[CommentView] {
        &self.comments
    }

    /// Whether the viewer may delete `comment`
    pub fn can_delete(&self, comment: &Comment) -> bool {
        self.viewer.as_deref() == Some(comment.user_id.as_str())
    }

    pub async fn reload(&mut self) -> Result<()> {
        let comments: Vec<Comment> = self
            .backend
            .select_as(
                &Query::table(tables::VIDEO_COMMENTS)
                    .eq("video_id", self.video_id.as_str())
                    .order("created_at", true),
            )
            .await?;

        let authors: HashMap<String, Profile> = if comments.is_empty() {
            HashMap::new()
        } else {
            let ids: Vec<&str> = comments.iter().map(|c| c.user_id.as_str()).collect();
            self.backend
                .select_as::<Profile>(&Query::table(tables::PROFILES).in_list("id", ids))
                .await?
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect()
        };

        self.comments = comments
            .into_iter()
            .map(|comment| {
                let author = authors.get(&comment.user_id);
                CommentView {
                    author_name: author.map(|a| a.full_name.clone()),
                    author_avatar: author.and_then(|a| a.avatar_url.clone()),
                    comment,
                }
            })
            .collect();
        Ok(())
    }

    pub async fn post(&mut self, text: &str) -> Result<Comment> {
        let viewer = self.viewer.clone().ok_or(Error::NotSignedIn)?;
        let content = text.trim();
        if content.is_empty() {
            return Err(Error::validation("Comment cannot be empty"));
        }
        let comment: Comment = self
            .backend
            .insert_as(
                tables::VIDEO_COMMENTS,
                json!({ "video_id": self.video_id, "user_id": viewer, "content": content }),
            )
            .await?;
        info!(video_id = %self.video_id, comment_id = %comment.id, "comment posted");
        self.reload().await?;
        Ok(comment)
    }

    /// Delete one of the viewer's own comments
    pub async fn delete(&mut self, comment_id: &str) -> Result<()> {
        let viewer = self.viewer.clone().ok_or(Error::NotSignedIn)?;
        let deleted = self
            .backend
            .delete(
                &Query::table(tables::VIDEO_COMMENTS)
                    .eq("id", comment_id)
                    .eq("user_id", viewer.as_str()),
            )
            .await?;
        if deleted.is_empty() {
            return Err(Error::forbidden("only the author can delete a comment"));
        }
        self.comments.retain(|c| c.comment.id != comment_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Op};

    fn backend() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::marketplace());
        backend.seed(
            tables::PROFILES,
            vec![
                json!({ "id": "c1", "full_name": "Ada Client", "avatar_url": "https://cdn/ada.png" }),
                json!({ "id": "c2", "full_name": "Bola" }),
            ],
        );
        backend.seed(
            tables::VIDEO_COMMENTS,
            vec![
                json!({ "id": "k2", "video_id": "v1", "user_id": "c2", "content": "Neat",
                        "created_at": "2024-03-02T00:00:00Z" }),
                json!({ "id": "k1", "video_id": "v1", "user_id": "c1", "content": "How much?",
                        "created_at": "2024-03-01T00:00:00Z" }),
            ],
        );
        backend
    }

    #[tokio::test]
    async fn test_load_oldest_first_with_authors() {
        let sheet = CommentSheet::open(backend(), "v1", Some("c1")).await.unwrap();
        let ids: Vec<&str> = sheet.comments().iter().map(|c| c.comment.id.as_str()).collect();
        assert_eq!(ids, vec!["k1", "k2"]);
        assert_eq!(sheet.comments()[0].author_avatar.as_deref(), Some("https://cdn/ada.png"));
        assert!(sheet.can_delete(&sheet.comments()[0].comment));
        assert!(!sheet.can_delete(&sheet.comments()[1].comment));
    }

    #[tokio::test]
    async fn test_post_trims_and_rejects_blank() {
        let backend = backend();
        let mut sheet = CommentSheet::open(backend.clone(), "v1", Some("c1")).await.unwrap();
        backend.clear_calls();
        assert!(matches!(sheet.post("  \n ").await, Err(Error::Validation(_))));
        assert!(backend.calls().is_empty());

        let comment = sheet.post("  Booked you! ").await.unwrap();
        assert_eq!(comment.content, "Booked you!");
        assert_eq!(sheet.comments().len(), 3);
    }

    #[tokio::test]
    async fn test_delete_only_own() {
        let backend = backend();
        let mut sheet = CommentSheet::open(backend.clone(), "v1", Some("c1")).await.unwrap();
        assert!(matches!(sheet.delete("k2").await, Err(Error::Forbidden(_))));
        sheet.delete("k1").await.unwrap();
        assert_eq!(sheet.comments().len(), 1);
        assert_eq!(backend.rows(tables::VIDEO_COMMENTS).len(), 1);
    }

    #[tokio::test]
    async fn test_signed_out_cannot_post() {
        let backend = backend();
        let mut sheet = CommentSheet::open(backend.clone(), "v1", None).await.unwrap();
        assert!(matches!(sheet.post("hi").await, Err(Error::NotSignedIn)));
        assert!(backend.calls().iter().all(|c| c.op == Op::Select));
    }
}
