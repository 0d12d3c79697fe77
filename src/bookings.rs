//! Bookings and the conversation list built on them
//!
//! Status moves `pending → confirmed → completed`, or to `cancelled` from
//! either open state. Every transition is checked before the update is sent.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::backend::{Backend, BackendExt, Query};
use crate::error::{Error, Result};
use crate::models::{tables, Booking, BookingStatus, Category, ChatMessage, Profile};

/// What the booking form submits
#[derive(Debug, Clone, Serialize)]
pub struct BookingRequest {
    pub provider_id: String,
    pub video_id: Option<String>,
    pub category_id: Option<String>,
    pub preferred_date: NaiveDate,
    pub preferred_time: String,
    pub location: Option<String>,
    pub notes: Option<String>,
}

/// One chat thread in the inbox
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub booking: Booking,
    pub counterpart: Option<Profile>,
    pub category_name: Option<String>,
    pub last_message: Option<ChatMessage>,
    /// The latest message is from the other party and unread
    pub unread: bool,
}

impl Conversation {
    /// Last message time, falling back to the booking's creation
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_message
            .as_ref()
            .and_then(|m| m.created_at)
            .or(self.booking.created_at)
    }
}

pub struct Bookings {
    backend: Arc<dyn Backend>,
}

impl Bookings {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Request a booking; it starts out `pending`.
    pub async fn create(&self, client: &Profile, request: BookingRequest) -> Result<Booking> {
        if request.provider_id == client.id {
            return Err(Error::validation("You cannot book yourself"));
        }
        if request.preferred_time.trim().is_empty() {
            return Err(Error::validation("Please choose a preferred time"));
        }
        let mut row = serde_json::to_value(&request)?;
        row["client_id"] = json!(client.id);
        row["status"] = json!(BookingStatus::Pending);

        let booking: Booking = self.backend.insert_as(tables::BOOKINGS, row).await?;
        info!(booking_id = %booking.id, provider_id = %booking.provider_id, "booking requested");
        Ok(booking)
    }

    pub async fn get(&self, booking_id: &str) -> Result<Booking> {
        self.backend
            .first_as(&Query::table(tables::BOOKINGS).eq("id", booking_id))
            .await?
            .ok_or_else(|| Error::not_found(format!("booking {}", booking_id)))
    }

    /// Provider accepts a pending request
    pub async fn confirm(&self, actor: &Profile, booking_id: &str) -> Result<Booking> {
        self.transition(actor, booking_id, BookingStatus::Confirmed).await
    }

    /// Provider marks a confirmed job done
    pub async fn complete(&self, actor: &Profile, booking_id: &str) -> Result<Booking> {
        self.transition(actor, booking_id, BookingStatus::Completed).await
    }

    /// Either party, or an admin, calls it off
    pub async fn cancel(&self, actor: &Profile, booking_id: &str) -> Result<Booking> {
        self.transition(actor, booking_id, BookingStatus::Cancelled).await
    }

    async fn transition(&self, actor: &Profile, booking_id: &str, next: BookingStatus) -> Result<Booking> {
        let booking = self.get(booking_id).await?;

        let allowed = match next {
            BookingStatus::Cancelled => booking.involves(&actor.id) || actor.is_admin(),
            _ => booking.provider_id == actor.id,
        };
        if !allowed {
            return Err(Error::forbidden(format!(
                "not allowed to mark booking {} as {}",
                booking_id, next
            )));
        }
        if !booking.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: booking.status,
                to: next,
            });
        }

        // Only update if nobody moved the booking in the meantime.
        let updated: Vec<Booking> = self
            .backend
            .update_as(
                &Query::table(tables::BOOKINGS)
                    .eq("id", booking_id)
                    .eq("status", booking.status.as_str()),
                json!({ "status": next, "updated_at": Utc::now() }),
            )
            .await?;
        match updated.into_iter().next() {
            Some(booking) => {
                info!(booking_id, status = %next, "booking status changed");
                Ok(booking)
            }
            None => {
                let current = self.get(booking_id).await?;
                Err(Error::InvalidTransition {
                    from: current.status,
                    to: next,
                })
            }
        }
    }

    pub async fn for_client(&self, client_id: &str) -> Result<Vec<Booking>> {
        self.backend
            .select_as(
                &Query::table(tables::BOOKINGS)
                    .eq("client_id", client_id)
                    .order("created_at", false),
            )
            .await
    }

    pub async fn for_provider(&self, provider_id: &str) -> Result<Vec<Booking>> {
        self.backend
            .select_as(
                &Query::table(tables::BOOKINGS)
                    .eq("provider_id", provider_id)
                    .order("created_at", false),
            )
            .await
    }

    /// Every booking `user_id` takes part in, most recent activity first
    pub async fn conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let mut bookings = self.for_client(user_id).await?;
        for booking in self.for_provider(user_id).await? {
            if !bookings.iter().any(|b| b.id == booking.id) {
                bookings.push(booking);
            }
        }
        if bookings.is_empty() {
            return Ok(Vec::new());
        }

        let counterpart_ids: Vec<&str> = bookings.iter().map(|b| b.counterpart(user_id)).collect();
        let profiles: HashMap<String, Profile> = self
            .backend
            .select_as::<Profile>(&Query::table(tables::PROFILES).in_list("id", counterpart_ids))
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        let category_ids: Vec<&str> = bookings.iter().filter_map(|b| b.category_id.as_deref()).collect();
        let categories: HashMap<String, String> = if category_ids.is_empty() {
            HashMap::new()
        } else {
            self.backend
                .select_as::<Category>(&Query::table(tables::CATEGORIES).in_list("id", category_ids))
                .await?
                .into_iter()
                .map(|c| (c.id, c.name))
                .collect()
        };

        let mut conversations = Vec::with_capacity(bookings.len());
        for booking in bookings {
            let last_message: Option<ChatMessage> = self
                .backend
                .first_as(
                    &Query::table(tables::CHAT_MESSAGES)
                        .eq("booking_id", booking.id.as_str())
                        .order("created_at", false),
                )
                .await?;
            let unread = last_message
                .as_ref()
                .is_some_and(|m| m.sender_id != user_id && !m.is_read);
            conversations.push(Conversation {
                counterpart: profiles.get(booking.counterpart(user_id)).cloned(),
                category_name: booking.category_id.as_ref().and_then(|c| categories.get(c).cloned()),
                last_message,
                unread,
                booking,
            });
        }

        conversations.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
        Ok(conversations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Op};
    use crate::models::Role;

    fn profile(id: &str, role: Role) -> Profile {
        serde_json::from_value(json!({ "id": id, "full_name": id, "user_type": role })).unwrap()
    }

    fn request(provider: &str) -> BookingRequest {
        BookingRequest {
            provider_id: provider.to_string(),
            video_id: Some("v1".to_string()),
            category_id: Some("cat-tiles".to_string()),
            preferred_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            preferred_time: "10:00".to_string(),
            location: Some("Lagos".to_string()),
            notes: None,
        }
    }

    fn setup() -> (Bookings, Arc<MemoryBackend>, Profile, Profile) {
        let backend = Arc::new(MemoryBackend::marketplace());
        let client = profile("c1", Role::Client);
        let provider = profile("p1", Role::Provider);
        backend.seed(
            tables::PROFILES,
            vec![serde_json::to_value(&client).unwrap(), serde_json::to_value(&provider).unwrap()],
        );
        backend.seed(tables::CATEGORIES, vec![json!({ "id": "cat-tiles", "name": "Tiling" })]);
        (Bookings::new(backend.clone()), backend, client, provider)
    }

    #[tokio::test]
    async fn test_happy_path() {
        let (bookings, _, client, provider) = setup();
        let booking = bookings.create(&client, request("p1")).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.client_id, "c1");

        let booking = bookings.confirm(&provider, &booking.id).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        let booking = bookings.complete(&provider, &booking.id).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Completed);

        let err = bookings.cancel(&client, &booking.id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: BookingStatus::Completed,
                to: BookingStatus::Cancelled
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_transition_sends_no_update() {
        let (bookings, backend, client, provider) = setup();
        let booking = bookings.create(&client, request("p1")).await.unwrap();
        backend.clear_calls();

        let err = bookings.complete(&provider, &booking.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert!(backend.calls().iter().all(|c| c.op != Op::Update));
    }

    #[tokio::test]
    async fn test_only_provider_confirms() {
        let (bookings, _, client, _) = setup();
        let booking = bookings.create(&client, request("p1")).await.unwrap();
        assert!(matches!(
            bookings.confirm(&client, &booking.id).await,
            Err(Error::Forbidden(_))
        ));
        let stranger = profile("x", Role::Client);
        assert!(matches!(
            bookings.cancel(&stranger, &booking.id).await,
            Err(Error::Forbidden(_))
        ));
        let cancelled = bookings.cancel(&client, &booking.id).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cannot_book_self() {
        let (bookings, _, _, provider) = setup();
        assert!(matches!(
            bookings.create(&provider, request("p1")).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_change_is_reported() {
        let (bookings, backend, client, provider) = setup();
        let booking = bookings.create(&client, request("p1")).await.unwrap();
        backend.fail_next(Op::Update, tables::BOOKINGS, "40001");
        assert!(bookings.confirm(&provider, &booking.id).await.is_err());
        assert_eq!(bookings.get(&booking.id).await.unwrap().status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn test_conversations_sorted_by_activity() {
        let (bookings, backend, client, _) = setup();
        backend.seed(tables::PROFILES, vec![json!({ "id": "p2", "full_name": "Green Gardens", "user_type": "provider" })]);
        let first = bookings.create(&client, request("p1")).await.unwrap();
        let second = bookings.create(&client, request("p2")).await.unwrap();

        backend.seed(
            tables::CHAT_MESSAGES,
            vec![
                json!({ "booking_id": first.id, "sender_id": "p1", "message": "See you then",
                        "created_at": "2099-01-01T10:00:00Z" }),
                json!({ "booking_id": first.id, "sender_id": "c1", "message": "Hi", "is_read": true,
                        "created_at": "2099-01-01T09:00:00Z" }),
            ],
        );

        let inbox = bookings.conversations("c1").await.unwrap();
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[0].booking.id, first.id);
        assert!(inbox[0].unread);
        assert_eq!(inbox[0].last_message.as_ref().unwrap().message, "See you then");
        assert_eq!(inbox[0].counterpart.as_ref().unwrap().full_name, "p1");
        assert_eq!(inbox[0].category_name.as_deref(), Some("Tiling"));
        assert_eq!(inbox[1].booking.id, second.id);
        assert!(!inbox[1].unread);

        let provider_inbox = bookings.conversations("p1").await.unwrap();
        assert_eq!(provider_inbox.len(), 1);
        assert!(!provider_inbox[0].unread);
    }
}
