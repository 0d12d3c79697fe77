//! Follows, likes and viewer lists
//!
//! Edges are unique per pair, so adding an edge that already exists counts
//! as success.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

use crate::backend::{Backend, BackendExt, Query};
use crate::error::{Error, Result};
use crate::models::{tables, Follow, Profile, VideoView};

async fn add_edge(backend: &dyn Backend, table: &str, row: serde_json::Value) -> Result<()> {
    match backend.insert(table, row).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_unique_violation() => {
            debug!(table, "edge already present");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

pub async fn follow(backend: &dyn Backend, follower_id: &str, following_id: &str) -> Result<()> {
    if follower_id == following_id {
        return Err(Error::validation("You cannot follow yourself"));
    }
    add_edge(
        backend,
        tables::FOLLOWERS,
        json!({ "follower_id": follower_id, "following_id": following_id }),
    )
    .await
}

pub async fn unfollow(backend: &dyn Backend, follower_id: &str, following_id: &str) -> Result<()> {
    backend
        .delete(
            &Query::table(tables::FOLLOWERS)
                .eq("follower_id", follower_id)
                .eq("following_id", following_id),
        )
        .await?;
    Ok(())
}

pub async fn is_following(backend: &dyn Backend, follower_id: &str, following_id: &str) -> Result<bool> {
    let n = backend
        .count(
            &Query::table(tables::FOLLOWERS)
                .eq("follower_id", follower_id)
                .eq("following_id", following_id),
        )
        .await?;
    Ok(n > 0)
}

pub async fn like(backend: &dyn Backend, user_id: &str, video_id: &str) -> Result<()> {
    add_edge(
        backend,
        tables::VIDEO_LIKES,
        json!({ "video_id": video_id, "user_id": user_id }),
    )
    .await
}

pub async fn unlike(backend: &dyn Backend, user_id: &str, video_id: &str) -> Result<()> {
    backend
        .delete(
            &Query::table(tables::VIDEO_LIKES)
                .eq("video_id", video_id)
                .eq("user_id", user_id),
        )
        .await?;
    Ok(())
}

pub async fn has_liked(backend: &dyn Backend, user_id: &str, video_id: &str) -> Result<bool> {
    let n = backend
        .count(
            &Query::table(tables::VIDEO_LIKES)
                .eq("video_id", video_id)
                .eq("user_id", user_id),
        )
        .await?;
    Ok(n > 0)
}

async fn profiles_by_id(backend: &dyn Backend, ids: Vec<&str>) -> Result<HashMap<String, Profile>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(backend
        .select_as::<Profile>(&Query::table(tables::PROFILES).in_list("id", ids))
        .await?
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Viewer {
    pub profile: Profile,
    pub viewed_at: Option<DateTime<Utc>>,
}

/// Who watched a video, most recent first
///
/// Viewers without a named profile are skipped.
pub async fn viewers(backend: &dyn Backend, video_id: &str) -> Result<Vec<Viewer>> {
    let views: Vec<VideoView> = backend
        .select_as(
            &Query::table(tables::VIDEO_VIEWS)
                .eq("video_id", video_id)
                .order("viewed_at", false),
        )
        .await?;
    let profiles = profiles_by_id(backend, views.iter().map(|v| v.user_id.as_str()).collect()).await?;

    Ok(views
        .into_iter()
        .filter_map(|view| {
            let profile = profiles.get(&view.user_id)?.clone();
            (!profile.full_name.is_empty()).then_some(Viewer {
                profile,
                viewed_at: view.viewed_at,
            })
        })
        .collect())
}

/// Profiles following `profile_id`, newest first
pub async fn followers(backend: &dyn Backend, profile_id: &str) -> Result<Vec<Profile>> {
    let edges: Vec<Follow> = backend
        .select_as(
            &Query::table(tables::FOLLOWERS)
                .eq("following_id", profile_id)
                .order("created_at", false),
        )
        .await?;
    let mut profiles = profiles_by_id(backend, edges.iter().map(|e| e.follower_id.as_str()).collect()).await?;
    Ok(edges
        .iter()
        .filter_map(|e| profiles.remove(&e.follower_id))
        .collect())
}

/// Profiles `profile_id` follows, newest first
pub async fn following(backend: &dyn Backend, profile_id: &str) -> Result<Vec<Profile>> {
    let edges: Vec<Follow> = backend
        .select_as(
            &Query::table(tables::FOLLOWERS)
                .eq("follower_id", profile_id)
                .order("created_at", false),
        )
        .await?;
    let mut profiles = profiles_by_id(backend, edges.iter().map(|e| e.following_id.as_str()).collect()).await?;
    Ok(edges
        .iter()
        .filter_map(|e| profiles.remove(&e.following_id))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn backend() -> MemoryBackend {
        let backend = MemoryBackend::marketplace();
        backend.seed(
            tables::PROFILES,
            vec![
                json!({ "id": "p1", "full_name": "Tola Tiles", "user_type": "provider" }),
                json!({ "id": "c1", "full_name": "Ada Client" }),
                json!({ "id": "c2", "full_name": "" }),
                json!({ "id": "c3", "full_name": "Chidi" }),
            ],
        );
        backend
    }

    #[tokio::test]
    async fn test_follow_is_idempotent() {
        let backend = backend();
        assert!(matches!(follow(&backend, "c1", "c1").await, Err(Error::Validation(_))));

        follow(&backend, "c1", "p1").await.unwrap();
        follow(&backend, "c1", "p1").await.unwrap();
        assert_eq!(backend.rows(tables::FOLLOWERS).len(), 1);
        assert!(is_following(&backend, "c1", "p1").await.unwrap());

        unfollow(&backend, "c1", "p1").await.unwrap();
        assert!(!is_following(&backend, "c1", "p1").await.unwrap());
    }

    #[tokio::test]
    async fn test_like_round_trip() {
        let backend = backend();
        like(&backend, "c1", "v1").await.unwrap();
        like(&backend, "c1", "v1").await.unwrap();
        assert!(has_liked(&backend, "c1", "v1").await.unwrap());
        unlike(&backend, "c1", "v1").await.unwrap();
        assert!(!has_liked(&backend, "c1", "v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_viewers_skip_unnamed() {
        let backend = backend();
        backend.seed(
            tables::VIDEO_VIEWS,
            vec![
                json!({ "video_id": "v1", "user_id": "c1", "viewed_at": "2024-03-01T10:00:00Z" }),
                json!({ "video_id": "v1", "user_id": "c2", "viewed_at": "2024-03-01T11:00:00Z" }),
                json!({ "video_id": "v1", "user_id": "c3", "viewed_at": "2024-03-01T12:00:00Z" }),
                json!({ "video_id": "v1", "user_id": "gone", "viewed_at": "2024-03-01T13:00:00Z" }),
            ],
        );
        let list = viewers(&backend, "v1").await.unwrap();
        let names: Vec<&str> = list.iter().map(|v| v.profile.full_name.as_str()).collect();
        assert_eq!(names, vec!["Chidi", "Ada Client"]);
    }

    #[tokio::test]
    async fn test_follower_lists() {
        let backend = backend();
        backend.seed(
            tables::FOLLOWERS,
            vec![
                json!({ "follower_id": "c1", "following_id": "p1", "created_at": "2024-01-01T00:00:00Z" }),
                json!({ "follower_id": "c3", "following_id": "p1", "created_at": "2024-02-01T00:00:00Z" }),
            ],
        );
        let names: Vec<String> = followers(&backend, "p1")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.full_name)
            .collect();
        assert_eq!(names, vec!["Chidi", "Ada Client"]);

        let followed = following(&backend, "c1").await.unwrap();
        assert_eq!(followed.len(), 1);
        assert_eq!(followed[0].id, "p1");
    }
}
