//! Typed rows of the marketplace relations

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub mod tables {
    pub const PROFILES: &str = "profiles";
    pub const CATEGORIES: &str = "skill_categories";
    pub const VIDEOS: &str = "skill_videos";
    pub const VIDEO_LIKES: &str = "video_likes";
    pub const VIDEO_VIEWS: &str = "video_views";
    pub const VIDEO_COMMENTS: &str = "video_comments";
    pub const VIDEO_REPORTS: &str = "video_reports";
    pub const VIDEO_MODERATION: &str = "video_moderation";
    pub const BOOKINGS: &str = "bookings";
    pub const CHAT_MESSAGES: &str = "chat_messages";
    pub const RATINGS: &str = "ratings";
    pub const FOLLOWERS: &str = "followers";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const WORK_SAMPLES: &str = "work_samples";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Client,
    Provider,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Provider => "provider",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProfileStatus {
    #[default]
    Active,
    Deactivated,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub user_type: Role,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default)]
    pub experience: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub followers_count: i64,
    #[serde(default)]
    pub following_count: i64,
    #[serde(default = "default_true")]
    pub is_public: bool,
    #[serde(default)]
    pub status: ProfileStatus,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn role(&self) -> Role {
        self.user_type
    }

    pub fn is_admin(&self) -> bool {
        self.user_type == Role::Admin
    }

    pub fn is_provider(&self) -> bool {
        self.user_type == Role::Provider
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "pending",
            VideoStatus::Approved => "approved",
            VideoStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillVideo {
    pub id: String,
    pub provider_id: String,
    #[serde(default)]
    pub category_id: Option<String>,
    pub video_url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub views_count: i64,
    #[serde(default)]
    pub status: VideoStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// `pending→confirmed→completed`, or `pending/confirmed→cancelled`
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Confirmed, Completed) | (Pending, Cancelled) | (Confirmed, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub client_id: String,
    pub provider_id: String,
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    pub status: BookingStatus,
    pub preferred_date: NaiveDate,
    pub preferred_time: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn involves(&self, user_id: &str) -> bool {
        self.client_id == user_id || self.provider_id == user_id
    }

    /// The other participant, from `user_id`'s point of view
    pub fn counterpart(&self, user_id: &str) -> &str {
        if self.client_id == user_id {
            &self.provider_id
        } else {
            &self.client_id
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    #[default]
    Text,
    Image,
    Audio,
    File,
}

impl AttachmentKind {
    /// Classify an upload by MIME type
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            AttachmentKind::Image
        } else if mime.starts_with("audio/") {
            AttachmentKind::Audio
        } else {
            AttachmentKind::File
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub booking_id: String,
    pub sender_id: String,
    pub message: String,
    #[serde(default)]
    pub message_type: AttachmentKind,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub id: String,
    pub booking_id: String,
    pub provider_id: String,
    pub client_id: String,
    pub rating: u8,
    #[serde(default)]
    pub review: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Follow {
    pub follower_id: String,
    pub following_id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoLike {
    pub video_id: String,
    pub user_id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoView {
    pub video_id: String,
    pub user_id: String,
    #[serde(default)]
    pub viewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub video_id: String,
    pub user_id: String,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Like,
    Follow,
    Booking,
    Message,
    VideoApproval,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkSample {
    pub id: String,
    pub provider_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub image_url: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationRecord {
    pub video_id: String,
    pub status: VideoStatus,
    pub moderated_at: DateTime<Utc>,
    pub moderated_by: String,
    #[serde(default)]
    pub moderation_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoReport {
    pub video_id: String,
    pub reporter_id: String,
    pub reason: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_booking_transitions() {
        use BookingStatus::*;
        let all = [Pending, Confirmed, Completed, Cancelled];
        let allowed: Vec<(BookingStatus, BookingStatus)> = all
            .iter()
            .flat_map(|from| all.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();
        assert_eq!(
            allowed,
            vec![
                (Pending, Confirmed),
                (Pending, Cancelled),
                (Confirmed, Completed),
                (Confirmed, Cancelled)
            ]
        );
        assert!(Completed.is_terminal() && Cancelled.is_terminal());
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let err = serde_json::from_value::<Profile>(json!({
            "id": "u1",
            "full_name": "Ada",
            "user_type": "superuser"
        }));
        assert!(err.is_err());
    }

    #[test]
    fn test_profile_defaults() {
        let profile: Profile = serde_json::from_value(json!({
            "id": "u1",
            "full_name": "Ada",
            "user_type": "provider",
            "created_at": "2024-05-01T10:00:00.123456+00:00"
        }))
        .unwrap();
        assert!(profile.is_provider());
        assert!(profile.is_public);
        assert_eq!(profile.status, ProfileStatus::Active);
        assert_eq!(profile.followers_count, 0);
    }

    #[test]
    fn test_attachment_kind_from_mime() {
        assert_eq!(AttachmentKind::from_mime("image/png"), AttachmentKind::Image);
        assert_eq!(AttachmentKind::from_mime("audio/webm"), AttachmentKind::Audio);
        assert_eq!(AttachmentKind::from_mime("application/pdf"), AttachmentKind::File);
    }

    #[test]
    fn test_notification_kind_wire_names() {
        let n: Notification = serde_json::from_value(json!({
            "id": "n1",
            "user_id": "u1",
            "type": "video_approval",
            "title": "Video Approved!",
            "message": "live",
        }))
        .unwrap();
        assert_eq!(n.kind, NotificationKind::VideoApproval);
        assert!(!n.read);
    }
}
