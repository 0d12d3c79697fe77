//! Video feed
//!
//! [`load_feed`] builds the decorated card list for the public feed and
//! [`FeedController`] keeps the per-card playback and social state in sync
//! with the viewer's actions.

mod controller;
mod share;

pub use controller::{CardState, FeedController, FeedLoad, HeartBurst, Modal, PlayOutcome, Player, TapOutcome};
pub use share::{share_link, ShareTarget};

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::debug;

use skillfeed_realtime::{ChannelEvent, DatabaseChanges, RealtimeClient, Subscription};

use crate::backend::{contains_pattern, Backend, BackendExt, Query};
use crate::error::Result;
use crate::models::{tables, Category, Follow, Profile, Rating, SkillVideo, VideoLike, VideoStatus};
use crate::reviews::RatingSummary;

/// Feed filters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedQuery {
    pub category: Option<String>,
    /// Matched against title and description
    pub search: Option<String>,
    /// Substring of the provider's location, case-insensitive
    pub location: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl FeedQuery {
    pub fn category(mut self, category_id: &str) -> Self {
        self.category = Some(category_id.to_string());
        self
    }

    pub fn search(mut self, term: &str) -> Self {
        self.search = Some(term.to_string());
        self
    }

    pub fn location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }
}

/// One video with everything the card renders
#[derive(Debug, Clone, PartialEq)]
pub struct FeedCard {
    pub video: SkillVideo,
    pub provider: Profile,
    pub category_name: Option<String>,
    pub user_liked: bool,
    pub is_following: bool,
    pub provider_rating: RatingSummary,
    pub state: CardState,
}

fn ids<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .filter(|id| seen.insert(*id))
        .map(String::from)
        .collect()
}

/// Approved videos, newest first, decorated for `viewer`
///
/// Videos whose provider profile is missing are left out.
pub async fn load_feed(backend: &dyn Backend, viewer: Option<&str>, query: &FeedQuery) -> Result<Vec<FeedCard>> {
    let mut videos_query = Query::table(tables::VIDEOS)
        .eq("status", VideoStatus::Approved.as_str())
        .order("created_at", false);
    if let Some(category) = &query.category {
        videos_query = videos_query.eq("category_id", category.as_str());
    }
    if let Some(term) = query.search.as_deref().filter(|t| !t.trim().is_empty()) {
        videos_query = videos_query.or_ilike(&["title", "description"], &contains_pattern(term));
    }
    if let Some(offset) = query.offset {
        videos_query = videos_query.offset(offset);
    }
    if let Some(limit) = query.limit {
        videos_query = videos_query.limit(limit);
    }

    let videos: Vec<SkillVideo> = backend.select_as(&videos_query).await?;
    if videos.is_empty() {
        return Ok(Vec::new());
    }

    let provider_ids = ids(videos.iter().map(|v| v.provider_id.as_str()));
    let category_ids = ids(videos.iter().filter_map(|v| v.category_id.as_deref()));
    let video_ids = ids(videos.iter().map(|v| v.id.as_str()));

    let providers: HashMap<String, Profile> = backend
        .select_as::<Profile>(&Query::table(tables::PROFILES).in_list("id", provider_ids.clone()))
        .await?
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();

    let categories: HashMap<String, String> = if category_ids.is_empty() {
        HashMap::new()
    } else {
        backend
            .select_as::<Category>(&Query::table(tables::CATEGORIES).in_list("id", category_ids))
            .await?
            .into_iter()
            .map(|c| (c.id, c.name))
            .collect()
    };

    let mut scores: HashMap<String, Vec<u8>> = HashMap::new();
    for rating in backend
        .select_as::<Rating>(&Query::table(tables::RATINGS).in_list("provider_id", provider_ids.clone()))
        .await?
    {
        scores.entry(rating.provider_id).or_default().push(rating.rating);
    }

    let (liked, following) = match viewer {
        Some(user_id) => {
            let liked: HashSet<String> = backend
                .select_as::<VideoLike>(
                    &Query::table(tables::VIDEO_LIKES)
                        .eq("user_id", user_id)
                        .in_list("video_id", video_ids),
                )
                .await?
                .into_iter()
                .map(|l| l.video_id)
                .collect();
            let following: HashSet<String> = backend
                .select_as::<Follow>(
                    &Query::table(tables::FOLLOWERS)
                        .eq("follower_id", user_id)
                        .in_list("following_id", provider_ids),
                )
                .await?
                .into_iter()
                .map(|f| f.following_id)
                .collect();
            (liked, following)
        }
        None => (HashSet::new(), HashSet::new()),
    };

    let location = query
        .location
        .as_deref()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty());

    let cards = videos
        .into_iter()
        .filter_map(|video| {
            let Some(provider) = providers.get(&video.provider_id).cloned() else {
                debug!(video_id = %video.id, "dropping video without provider profile");
                return None;
            };
            if let Some(wanted) = &location {
                let matches = provider
                    .location
                    .as_deref()
                    .is_some_and(|l| l.to_lowercase().contains(wanted.as_str()));
                if !matches {
                    return None;
                }
            }
            Some(FeedCard {
                category_name: video.category_id.as_ref().and_then(|c| categories.get(c).cloned()),
                user_liked: liked.contains(&video.id),
                is_following: following.contains(&provider.id),
                provider_rating: RatingSummary::from_scores(
                    scores.get(&provider.id).map(Vec::as_slice).unwrap_or_default().iter().copied(),
                ),
                state: CardState::NotVisible,
                provider,
                video,
            })
        })
        .collect();

    Ok(cards)
}

/// Forward updated video rows into `updates`
///
/// Drain the receiver into [`FeedController::apply_video_update`]. Counters
/// missed during a dropped connection come back with a reload after
/// [`Resync::reconnected`](crate::resync::Resync::reconnected).
pub async fn subscribe_video_updates(
    realtime: &RealtimeClient,
    updates: mpsc::UnboundedSender<Value>,
) -> Result<Subscription> {
    let subscription = realtime
        .channel("feed-videos")
        .on(
            DatabaseChanges::new(tables::VIDEOS).event(ChannelEvent::Update),
            move |payload| {
                if let Some(row) = payload.record() {
                    // A closed receiver means the feed is gone.
                    let _ = updates.send(row.clone());
                }
            },
        )
        .subscribe()
        .await?;
    Ok(subscription)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::backend::MemoryBackend;
    use crate::models::tables;
    use serde_json::json;

    /// Two providers, three approved videos, one pending, one orphan
    pub fn marketplace() -> MemoryBackend {
        let backend = MemoryBackend::marketplace();
        backend.seed(
            tables::PROFILES,
            vec![
                json!({ "id": "p1", "full_name": "Tola Tiles", "user_type": "provider", "location": "Lagos, Nigeria" }),
                json!({ "id": "p2", "full_name": "Green Gardens", "user_type": "provider", "location": "Abuja" }),
                json!({ "id": "c1", "full_name": "Ada Client", "user_type": "client" }),
            ],
        );
        backend.seed(
            tables::CATEGORIES,
            vec![
                json!({ "id": "cat-tiles", "name": "Tiling" }),
                json!({ "id": "cat-garden", "name": "Gardening" }),
            ],
        );
        backend.seed(
            tables::VIDEOS,
            vec![
                json!({ "id": "v1", "provider_id": "p1", "category_id": "cat-tiles", "video_url": "https://cdn/v1.mp4",
                        "title": "Bathroom tiling", "status": "approved", "likes_count": 2, "views_count": 10,
                        "created_at": "2024-03-01T00:00:00Z" }),
                json!({ "id": "v2", "provider_id": "p2", "category_id": "cat-garden", "video_url": "https://cdn/v2.mp4",
                        "title": "Hedge trimming", "description": "Tidy hedges fast", "status": "approved",
                        "created_at": "2024-03-02T00:00:00Z" }),
                json!({ "id": "v3", "provider_id": "p1", "category_id": "cat-tiles", "video_url": "https://cdn/v3.mp4",
                        "title": "Kitchen backsplash", "status": "approved", "created_at": "2024-03-03T00:00:00Z" }),
                json!({ "id": "v4", "provider_id": "p2", "video_url": "https://cdn/v4.mp4",
                        "title": "Lawn care", "status": "pending", "created_at": "2024-03-04T00:00:00Z" }),
                json!({ "id": "v5", "provider_id": "gone", "video_url": "https://cdn/v5.mp4",
                        "title": "Orphan", "status": "approved", "created_at": "2024-03-05T00:00:00Z" }),
            ],
        );
        backend.seed(
            tables::RATINGS,
            vec![
                json!({ "id": "r1", "booking_id": "b1", "provider_id": "p1", "client_id": "c1", "rating": 5 }),
                json!({ "id": "r2", "booking_id": "b2", "provider_id": "p1", "client_id": "c2", "rating": 4 }),
            ],
        );
        backend.seed(tables::VIDEO_LIKES, vec![json!({ "video_id": "v1", "user_id": "c1" })]);
        backend.seed(tables::FOLLOWERS, vec![json!({ "follower_id": "c1", "following_id": "p2" })]);
        backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_feed_shows_only_approved_with_provider() {
        let backend = fixtures::marketplace();
        let cards = load_feed(&backend, Some("c1"), &FeedQuery::default()).await.unwrap();
        let ids: Vec<&str> = cards.iter().map(|c| c.video.id.as_str()).collect();
        assert_eq!(ids, vec!["v3", "v2", "v1"]);

        let v1 = &cards[2];
        assert!(v1.user_liked);
        assert!(!v1.is_following);
        assert_eq!(v1.category_name.as_deref(), Some("Tiling"));
        assert_eq!(v1.provider_rating.count, 2);
        assert!((v1.provider_rating.average - 4.5).abs() < f64::EPSILON);
        assert!(cards[1].is_following);
        assert!(cards.iter().all(|c| c.state == CardState::NotVisible));
    }

    #[tokio::test]
    async fn test_feed_filters() {
        let backend = fixtures::marketplace();

        let by_category = load_feed(&backend, None, &FeedQuery::default().category("cat-garden"))
            .await
            .unwrap();
        assert_eq!(by_category.len(), 1);
        assert_eq!(by_category[0].video.id, "v2");

        let by_search = load_feed(&backend, None, &FeedQuery::default().search("HEDGES"))
            .await
            .unwrap();
        assert_eq!(by_search.len(), 1);

        let by_location = load_feed(&backend, None, &FeedQuery::default().location("lagos"))
            .await
            .unwrap();
        assert_eq!(by_location.len(), 2);
        assert!(by_location.iter().all(|c| c.provider.id == "p1"));
    }

    #[tokio::test]
    async fn test_anonymous_feed_skips_viewer_lookups() {
        let backend = fixtures::marketplace();
        let cards = load_feed(&backend, None, &FeedQuery::default()).await.unwrap();
        assert!(cards.iter().all(|c| !c.user_liked && !c.is_following));
        assert!(backend
            .calls()
            .iter()
            .all(|c| c.table != tables::VIDEO_LIKES && c.table != tables::FOLLOWERS));
    }
}
