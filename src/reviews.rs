//! Provider reviews
//!
//! A client may review a provider once, and only after a completed booking
//! with them. [`ReviewSheet`] checks that locally before touching the
//! backend; the backend's unique `(client_id, provider_id)` key on ratings
//! is the final word and its violation is reported as [`Error::NotEligible`].

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::{Backend, BackendExt, Query};
use crate::error::{Error, Result};
use crate::models::{tables, Booking, BookingStatus, Profile, Rating};

/// Average score and number of reviews
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RatingSummary {
    pub average: f64,
    pub count: usize,
}

impl RatingSummary {
    pub fn from_scores(scores: impl IntoIterator<Item = u8>) -> Self {
        let (sum, count) = scores
            .into_iter()
            .fold((0u64, 0usize), |(sum, count), s| (sum + u64::from(s), count + 1));
        if count == 0 {
            return Self::default();
        }
        Self {
            average: sum as f64 / count as f64,
            count,
        }
    }
}

pub async fn rating_summary(backend: &dyn Backend, provider_id: &str) -> Result<RatingSummary> {
    let ratings: Vec<Rating> = backend
        .select_as(&Query::table(tables::RATINGS).eq("provider_id", provider_id))
        .await?;
    Ok(RatingSummary::from_scores(ratings.iter().map(|r| r.rating)))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    pub rating: Rating,
    pub author_name: Option<String>,
    pub author_avatar: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    SignedOut,
    NoCompletedBooking,
    AlreadyReviewed,
    Eligible,
}

async fn completed_booking(backend: &dyn Backend, client_id: &str, provider_id: &str) -> Result<Option<Booking>> {
    backend
        .first_as(
            &Query::table(tables::BOOKINGS)
                .eq("client_id", client_id)
                .eq("provider_id", provider_id)
                .eq("status", BookingStatus::Completed.as_str()),
        )
        .await
}

/// Reviews of one provider, plus the viewer's right to add one
pub struct ReviewSheet {
    backend: Arc<dyn Backend>,
    provider_id: String,
    viewer: Option<String>,
    reviews: Vec<Review>,
    eligibility: Eligibility,
}

impl ReviewSheet {
    pub async fn open(backend: Arc<dyn Backend>, provider_id: &str, viewer: Option<&str>) -> Result<Self> {
        let mut sheet = Self {
            backend,
            provider_id: provider_id.to_string(),
            viewer: viewer.map(String::from),
            reviews: Vec::new(),
            eligibility: Eligibility::SignedOut,
        };
        sheet.reload().await?;
        Ok(sheet)
    }

    pub fn reviews(&self) -> &[Review] {
        &self.reviews
    }

    pub fn eligibility(&self) -> Eligibility {
        self.eligibility
    }

    pub fn can_review(&self) -> bool {
        self.eligibility == Eligibility::Eligible
    }

    pub fn summary(&self) -> RatingSummary {
        RatingSummary::from_scores(self.reviews.iter().map(|r| r.rating.rating))
    }

    pub async fn reload(&mut self) -> Result<()> {
        self.reviews = self.load_reviews().await?;
        self.eligibility = self.check_eligibility().await?;
        Ok(())
    }

    async fn load_reviews(&self) -> Result<Vec<Review>> {
        let ratings: Vec<Rating> = self
            .backend
            .select_as(
                &Query::table(tables::RATINGS)
                    .eq("provider_id", self.provider_id.as_str())
                    .order("created_at", false),
            )
            .await?;
        if ratings.is_empty() {
            return Ok(Vec::new());
        }

        let client_ids: Vec<&str> = ratings.iter().map(|r| r.client_id.as_str()).collect();
        let authors: HashMap<String, Profile> = self
            .backend
            .select_as::<Profile>(&Query::table(tables::PROFILES).in_list("id", client_ids))
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        Ok(ratings
            .into_iter()
            .map(|rating| {
                let author = authors.get(&rating.client_id);
                Review {
                    author_name: author.map(|a| a.full_name.clone()),
                    author_avatar: author.and_then(|a| a.avatar_url.clone()),
                    rating,
                }
            })
            .collect())
    }

    async fn check_eligibility(&self) -> Result<Eligibility> {
        let Some(viewer) = self.viewer.as_deref() else {
            return Ok(Eligibility::SignedOut);
        };
        if completed_booking(self.backend.as_ref(), viewer, &self.provider_id)
            .await?
            .is_none()
        {
            return Ok(Eligibility::NoCompletedBooking);
        }
        let existing = self
            .backend
            .count(
                &Query::table(tables::RATINGS)
                    .eq("client_id", viewer)
                    .eq("provider_id", self.provider_id.as_str()),
            )
            .await?;
        Ok(if existing > 0 {
            Eligibility::AlreadyReviewed
        } else {
            Eligibility::Eligible
        })
    }

    /// Submit a review
    ///
    /// Score, text and eligibility are checked before any backend call.
    pub async fn submit(&mut self, score: u8, text: &str) -> Result<Rating> {
        let viewer = self.viewer.clone().ok_or(Error::NotSignedIn)?;
        if !(1..=5).contains(&score) {
            return Err(Error::validation("Rating must be between 1 and 5"));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::validation("Please write a few words about the service"));
        }
        match self.eligibility {
            Eligibility::Eligible => {}
            Eligibility::AlreadyReviewed => {
                return Err(Error::not_eligible("You have already reviewed this provider"))
            }
            _ => {
                return Err(Error::not_eligible(
                    "You must complete a booking before leaving a review",
                ))
            }
        }

        let booking = completed_booking(self.backend.as_ref(), &viewer, &self.provider_id)
            .await?
            .ok_or_else(|| Error::not_eligible("You must complete a booking before leaving a review"))?;

        let inserted = self
            .backend
            .insert_as::<Rating>(
                tables::RATINGS,
                json!({
                    "provider_id": self.provider_id,
                    "client_id": viewer,
                    "booking_id": booking.id,
                    "rating": score,
                    "review": text,
                }),
            )
            .await;
        let rating = match inserted {
            Ok(rating) => rating,
            Err(e) if e.is_unique_violation() => {
                self.eligibility = Eligibility::AlreadyReviewed;
                return Err(Error::not_eligible("You have already reviewed this provider"));
            }
            Err(e) => return Err(e),
        };
        info!(provider_id = %self.provider_id, score, "review submitted");

        if let Err(e) = self.reload().await {
            warn!(error = %e, "reloading reviews failed");
            self.eligibility = Eligibility::AlreadyReviewed;
        }
        Ok(rating)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn backend_with_booking(status: &str) -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::marketplace());
        backend.seed(
            tables::PROFILES,
            vec![
                json!({ "id": "p1", "full_name": "Tola Tiles", "user_type": "provider" }),
                json!({ "id": "c1", "full_name": "Ada Client", "user_type": "client" }),
            ],
        );
        backend.seed(
            tables::BOOKINGS,
            vec![json!({ "id": "b1", "client_id": "c1", "provider_id": "p1", "status": status,
                         "preferred_date": "2024-06-01", "preferred_time": "10:00" })],
        );
        backend
    }

    #[test]
    fn test_summary() {
        assert_eq!(RatingSummary::from_scores([]), RatingSummary::default());
        let s = RatingSummary::from_scores([5, 4, 3]);
        assert_eq!(s.count, 3);
        assert!((s.average - 4.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_submit_without_completed_booking_makes_no_call() {
        let backend = backend_with_booking("confirmed");
        let mut sheet = ReviewSheet::open(backend.clone(), "p1", Some("c1")).await.unwrap();
        assert_eq!(sheet.eligibility(), Eligibility::NoCompletedBooking);

        backend.clear_calls();
        let err = sheet.submit(5, "Great work").await.unwrap_err();
        assert!(matches!(err, Error::NotEligible(_)));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_score_out_of_range_is_rejected_locally() {
        let backend = backend_with_booking("completed");
        let mut sheet = ReviewSheet::open(backend.clone(), "p1", Some("c1")).await.unwrap();
        backend.clear_calls();
        assert!(matches!(sheet.submit(0, "ok").await, Err(Error::Validation(_))));
        assert!(matches!(sheet.submit(6, "ok").await, Err(Error::Validation(_))));
        assert!(matches!(sheet.submit(4, "   ").await, Err(Error::Validation(_))));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_submit_links_completed_booking_once() {
        let backend = backend_with_booking("completed");
        let mut sheet = ReviewSheet::open(backend.clone(), "p1", Some("c1")).await.unwrap();
        assert!(sheet.can_review());

        let rating = sheet.submit(5, "  Great work ").await.unwrap();
        assert_eq!(rating.booking_id, "b1");
        assert_eq!(rating.review.as_deref(), Some("Great work"));
        assert_eq!(sheet.eligibility(), Eligibility::AlreadyReviewed);
        assert_eq!(sheet.summary(), RatingSummary { average: 5.0, count: 1 });
        assert_eq!(sheet.reviews()[0].author_name.as_deref(), Some("Ada Client"));

        let err = sheet.submit(4, "Again").await.unwrap_err();
        assert!(matches!(err, Error::NotEligible(_)));
    }

    #[tokio::test]
    async fn test_server_unique_key_maps_to_not_eligible() {
        let backend = backend_with_booking("completed");
        let mut sheet = ReviewSheet::open(backend.clone(), "p1", Some("c1")).await.unwrap();
        // Another device reviewed in the meantime.
        backend.seed(
            tables::RATINGS,
            vec![json!({ "booking_id": "b1", "provider_id": "p1", "client_id": "c1", "rating": 3 })],
        );
        let err = sheet.submit(5, "Great work").await.unwrap_err();
        assert!(matches!(err, Error::NotEligible(_)));
        assert_eq!(sheet.eligibility(), Eligibility::AlreadyReviewed);
    }

    #[tokio::test]
    async fn test_signed_out_viewer() {
        let backend = backend_with_booking("completed");
        let mut sheet = ReviewSheet::open(backend, "p1", None).await.unwrap();
        assert_eq!(sheet.eligibility(), Eligibility::SignedOut);
        assert!(matches!(sheet.submit(5, "x").await, Err(Error::NotSignedIn)));
    }

    #[tokio::test]
    async fn test_rating_summary_query() {
        let backend = backend_with_booking("completed");
        backend.seed(
            tables::RATINGS,
            vec![
                json!({ "booking_id": "b1", "provider_id": "p1", "client_id": "c1", "rating": 4 }),
                json!({ "booking_id": "b9", "provider_id": "p1", "client_id": "c9", "rating": 2 }),
            ],
        );
        let summary = rating_summary(backend.as_ref(), "p1").await.unwrap();
        assert_eq!(summary.count, 2);
        assert!((summary.average - 3.0).abs() < f64::EPSILON);
    }
}
