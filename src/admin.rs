//! Admin moderation panel
//!
//! Each tab is a filtered list plus single-row actions. An action is one
//! mutation followed by splicing the local list. Moderation history and the
//! owner's notification are written best effort after a video decision.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::{contains_pattern, Backend, BackendExt, Query};
use crate::email::Mailer;
use crate::error::{Error, Result};
use crate::models::{
    tables, Booking, BookingStatus, Category, Comment, NotificationKind, Profile, Rating, Role, SkillVideo,
    VideoStatus,
};
use crate::optimistic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdminTab {
    #[default]
    Providers,
    Videos,
    Comments,
    Reviews,
    Bookings,
    Categories,
}

impl AdminTab {
    pub const ALL: [AdminTab; 6] = [
        AdminTab::Providers,
        AdminTab::Videos,
        AdminTab::Comments,
        AdminTab::Reviews,
        AdminTab::Bookings,
        AdminTab::Categories,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            AdminTab::Providers => "Verification Hub",
            AdminTab::Videos => "Video Moderation",
            AdminTab::Comments => "Comments",
            AdminTab::Reviews => "Reviews",
            AdminTab::Bookings => "Bookings",
            AdminTab::Categories => "Categories",
        }
    }
}

/// Who a broadcast email goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    Providers,
    Clients,
}

const MODERATED_BY: &str = "Admin Panel";
const MODERATION_REASON: &str = "Manual review by administrator";

pub struct AdminPanel {
    backend: Arc<dyn Backend>,
    mailer: Arc<dyn Mailer>,
    tab: AdminTab,
    search: String,
    video_status: Option<VideoStatus>,
    booking_status: Option<BookingStatus>,
    providers: Vec<Profile>,
    videos: Vec<SkillVideo>,
    comments: Vec<Comment>,
    reviews: Vec<Rating>,
    bookings: Vec<Booking>,
    categories: Vec<Category>,
}

impl AdminPanel {
    pub fn new(backend: Arc<dyn Backend>, mailer: Arc<dyn Mailer>, actor: &Profile) -> Result<Self> {
        if !actor.is_admin() {
            return Err(Error::forbidden("admin access required"));
        }
        Ok(Self {
            backend,
            mailer,
            tab: AdminTab::default(),
            search: String::new(),
            video_status: None,
            booking_status: None,
            providers: Vec::new(),
            videos: Vec::new(),
            comments: Vec::new(),
            reviews: Vec::new(),
            bookings: Vec::new(),
            categories: Vec::new(),
        })
    }

    pub fn tab(&self) -> AdminTab {
        self.tab
    }

    pub fn providers(&self) -> &[Profile] {
        &self.providers
    }

    pub fn videos(&self) -> &[SkillVideo] {
        &self.videos
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn reviews(&self) -> &[Rating] {
        &self.reviews
    }

    pub fn bookings(&self) -> &[Booking] {
        &self.bookings
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Switch tabs and load the new tab's list
    pub async fn select_tab(&mut self, tab: AdminTab) -> Result<()> {
        self.tab = tab;
        self.load().await
    }

    pub fn set_search(&mut self, term: &str) {
        self.search = term.trim().to_string();
    }

    pub fn filter_videos(&mut self, status: Option<VideoStatus>) {
        self.video_status = status;
    }

    pub fn filter_bookings(&mut self, status: Option<BookingStatus>) {
        self.booking_status = status;
    }

    fn searched(&self, query: Query, columns: &[&str]) -> Query {
        if self.search.is_empty() {
            query
        } else {
            query.or_ilike(columns, &contains_pattern(&self.search))
        }
    }

    /// Reload the current tab with the current filters
    pub async fn load(&mut self) -> Result<()> {
        match self.tab {
            AdminTab::Providers => {
                let query = Query::table(tables::PROFILES)
                    .eq("user_type", Role::Provider.as_str())
                    .order("created_at", false);
                self.providers = self
                    .backend
                    .select_as(&self.searched(query, &["full_name", "email"]))
                    .await?;
            }
            AdminTab::Videos => {
                let mut query = Query::table(tables::VIDEOS).order("created_at", false);
                if let Some(status) = self.video_status {
                    query = query.eq("status", status.as_str());
                }
                self.videos = self
                    .backend
                    .select_as(&self.searched(query, &["title", "description"]))
                    .await?;
            }
            AdminTab::Comments => {
                let query = Query::table(tables::VIDEO_COMMENTS).order("created_at", false);
                self.comments = self.backend.select_as(&self.searched(query, &["content"])).await?;
            }
            AdminTab::Reviews => {
                let query = Query::table(tables::RATINGS).order("created_at", false);
                self.reviews = self.backend.select_as(&self.searched(query, &["review"])).await?;
            }
            AdminTab::Bookings => {
                let mut query = Query::table(tables::BOOKINGS).order("created_at", false);
                if let Some(status) = self.booking_status {
                    query = query.eq("status", status.as_str());
                }
                self.bookings = self
                    .backend
                    .select_as(&self.searched(query, &["location", "notes"]))
                    .await?;
            }
            AdminTab::Categories => {
                let query = Query::table(tables::CATEGORIES).order("name", true);
                self.categories = self.backend.select_as(&self.searched(query, &["name"])).await?;
            }
        }
        Ok(())
    }

    /// Flip a provider's verified badge; the flip is undone on failure.
    pub async fn toggle_verification(&mut self, provider_id: &str) -> Result<bool> {
        let index = self
            .providers
            .iter()
            .position(|p| p.id == provider_id)
            .ok_or_else(|| Error::not_found(format!("provider {}", provider_id)))?;
        let verified = !self.providers[index].is_verified;
        let backend = self.backend.clone();
        let id = provider_id.to_string();

        let remote = async move {
            backend
                .update(
                    &Query::table(tables::PROFILES).eq("id", id.as_str()),
                    json!({ "is_verified": verified }),
                )
                .await
        };
        let flip = |p: &mut Profile| p.is_verified = !p.is_verified;
        let updated = optimistic::run(&mut self.providers[index], flip, flip, remote).await?;
        if updated.is_empty() {
            self.providers[index].is_verified = !verified;
            return Err(Error::forbidden("permission denied or provider not found"));
        }
        info!(provider_id, verified, "provider verification changed");
        Ok(verified)
    }

    pub async fn approve_video(&mut self, video_id: &str) -> Result<SkillVideo> {
        self.set_video_status(video_id, VideoStatus::Approved).await
    }

    pub async fn reject_video(&mut self, video_id: &str) -> Result<SkillVideo> {
        self.set_video_status(video_id, VideoStatus::Rejected).await
    }

    async fn set_video_status(&mut self, video_id: &str, status: VideoStatus) -> Result<SkillVideo> {
        let updated: Vec<SkillVideo> = self
            .backend
            .update_as(
                &Query::table(tables::VIDEOS).eq("id", video_id),
                json!({ "status": status }),
            )
            .await?;
        // Row-level security hides denied rows, so nothing comes back.
        let video = updated
            .into_iter()
            .next()
            .ok_or_else(|| Error::forbidden("permission denied or video not found"))?;
        info!(video_id, status = status.as_str(), "video moderated");

        let history = json!({
            "video_id": video_id,
            "status": status,
            "moderated_at": Utc::now(),
            "moderated_by": MODERATED_BY,
            "moderation_reason": MODERATION_REASON,
        });
        if let Err(e) = self.backend.upsert(tables::VIDEO_MODERATION, history, "video_id").await {
            warn!(video_id, error = %e, "moderation history not recorded");
        }

        if let Some(local) = self.videos.iter_mut().find(|v| v.id == video_id) {
            local.status = status;
        }
        if self.video_status.is_some_and(|filter| filter != status) {
            self.videos.retain(|v| v.id != video_id);
        }

        let (title, message) = match status {
            VideoStatus::Approved => (
                "Video Approved! 🎥",
                format!("Your video \"{}\" has been approved and is now live!", video.title),
            ),
            _ => (
                "Video Update",
                format!("Your video \"{}\" was not approved at this time.", video.title),
            ),
        };
        let notification = json!({
            "user_id": video.provider_id,
            "type": NotificationKind::VideoApproval,
            "title": title,
            "message": message,
            "data": { "video_id": video_id, "status": status },
        });
        if let Err(e) = self.backend.insert(tables::NOTIFICATIONS, notification).await {
            warn!(video_id, error = %e, "owner notification failed");
        }

        Ok(video)
    }

    async fn delete_row(&self, table: &str, id: &str) -> Result<()> {
        let deleted = self.backend.delete(&Query::table(table).eq("id", id)).await?;
        if deleted.is_empty() {
            return Err(Error::not_found(format!("{} {}", table, id)));
        }
        info!(table, id, "row deleted by admin");
        Ok(())
    }

    pub async fn delete_comment(&mut self, comment_id: &str) -> Result<()> {
        self.delete_row(tables::VIDEO_COMMENTS, comment_id).await?;
        self.comments.retain(|c| c.id != comment_id);
        Ok(())
    }

    pub async fn delete_review(&mut self, rating_id: &str) -> Result<()> {
        self.delete_row(tables::RATINGS, rating_id).await?;
        self.reviews.retain(|r| r.id != rating_id);
        Ok(())
    }

    pub async fn delete_video(&mut self, video_id: &str) -> Result<()> {
        self.delete_row(tables::VIDEOS, video_id).await?;
        self.videos.retain(|v| v.id != video_id);
        Ok(())
    }

    pub async fn cancel_booking(&mut self, booking_id: &str) -> Result<Booking> {
        let booking: Booking = self
            .backend
            .first_as(&Query::table(tables::BOOKINGS).eq("id", booking_id))
            .await?
            .ok_or_else(|| Error::not_found(format!("booking {}", booking_id)))?;
        if !booking.status.can_transition_to(BookingStatus::Cancelled) {
            return Err(Error::InvalidTransition {
                from: booking.status,
                to: BookingStatus::Cancelled,
            });
        }
        let updated: Vec<Booking> = self
            .backend
            .update_as(
                &Query::table(tables::BOOKINGS)
                    .eq("id", booking_id)
                    .eq("status", booking.status.as_str()),
                json!({ "status": BookingStatus::Cancelled, "updated_at": Utc::now() }),
            )
            .await?;
        let cancelled = updated.into_iter().next().ok_or(Error::InvalidTransition {
            from: booking.status,
            to: BookingStatus::Cancelled,
        })?;
        if let Some(local) = self.bookings.iter_mut().find(|b| b.id == booking_id) {
            *local = cancelled.clone();
        }
        info!(booking_id, "booking cancelled by admin");
        Ok(cancelled)
    }

    pub async fn create_category(&mut self, name: &str, icon: Option<&str>) -> Result<Category> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("Category name is required"));
        }
        if self.categories.iter().any(|c| c.name.eq_ignore_ascii_case(name)) {
            return Err(Error::validation(format!("Category {} already exists", name)));
        }
        let category: Category = self
            .backend
            .insert_as(tables::CATEGORIES, json!({ "name": name, "icon": icon }))
            .await?;
        let at = self
            .categories
            .partition_point(|c| c.name.to_lowercase() < category.name.to_lowercase());
        self.categories.insert(at, category.clone());
        Ok(category)
    }

    pub async fn delete_category(&mut self, category_id: &str) -> Result<()> {
        self.delete_row(tables::CATEGORIES, category_id).await?;
        self.categories.retain(|c| c.id != category_id);
        Ok(())
    }

    /// Email addresses of active users in `audience`
    pub async fn recipients(&self, audience: Audience) -> Result<Vec<String>> {
        let mut query = Query::table(tables::PROFILES).neq_or_null("status", "deactivated");
        query = match audience {
            Audience::Everyone => query,
            Audience::Providers => query.eq("user_type", Role::Provider.as_str()),
            Audience::Clients => query.eq("user_type", Role::Client.as_str()),
        };
        let profiles: Vec<Profile> = self.backend.select_as(&query).await?;
        let mut emails: Vec<String> = profiles.into_iter().filter_map(|p| p.email).collect();
        emails.sort();
        emails.dedup();
        Ok(emails)
    }

    /// Send one email to everyone in `audience`; returns the recipient count
    pub async fn broadcast_email(&self, audience: Audience, subject: &str, html: &str) -> Result<usize> {
        let recipients = self.recipients(audience).await?;
        self.mailer.send_broadcast(&recipients, subject, html).await?;
        Ok(recipients.len())
    }
}
