//! Booking chat
//!
//! Every booking has one thread. New rows and typing signals arrive on the
//! `booking-{id}` channel and are fed back into [`ChatThread::apply`].

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use skillfeed_realtime::{BroadcastChanges, ChannelEvent, DatabaseChanges, RealtimeClient, Subscription};

use crate::backend::{Backend, BackendExt, Query};
use crate::error::{Error, Result};
use crate::models::{tables, AttachmentKind, Booking, ChatMessage};
use crate::uploads::{Bucket, Media, Uploader};

pub const TYPING_EVENT: &str = "typing";

/// Quiet period after the last keystroke before "stopped typing" is sent
pub const TYPING_IDLE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub user_id: String,
    pub is_typing: bool,
}

/// What the booking channel delivers
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Message(ChatMessage),
    Typing(TypingSignal),
}

pub struct ChatThread {
    backend: Arc<dyn Backend>,
    uploader: Uploader,
    booking: Booking,
    user_id: String,
    messages: Vec<ChatMessage>,
    remote_typing: bool,
    last_keystroke: Option<Instant>,
}

impl ChatThread {
    /// Load the thread for a participant of `booking`
    pub async fn open(backend: Arc<dyn Backend>, uploader: Uploader, booking: Booking, user_id: &str) -> Result<Self> {
        if !booking.involves(user_id) {
            return Err(Error::forbidden("not a participant of this booking"));
        }
        let mut thread = Self {
            backend,
            uploader,
            booking,
            user_id: user_id.to_string(),
            messages: Vec::new(),
            remote_typing: false,
            last_keystroke: None,
        };
        thread.load().await?;
        Ok(thread)
    }

    pub fn booking(&self) -> &Booking {
        &self.booking
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn remote_typing(&self) -> bool {
        self.remote_typing
    }

    pub fn channel_name(&self) -> String {
        format!("booking-{}", self.booking.id)
    }

    /// Oldest first; the other party's messages are marked read
    pub async fn load(&mut self) -> Result<()> {
        self.messages = self
            .backend
            .select_as(
                &Query::table(tables::CHAT_MESSAGES)
                    .eq("booking_id", self.booking.id.as_str())
                    .order("created_at", true),
            )
            .await?;

        let unread = Query::table(tables::CHAT_MESSAGES)
            .eq("booking_id", self.booking.id.as_str())
            .neq("sender_id", self.user_id.as_str());
        match self.backend.update(&unread, json!({ "is_read": true })).await {
            Ok(rows) => {
                for message in self.messages.iter_mut().filter(|m| m.sender_id != self.user_id) {
                    message.is_read = true;
                }
                debug!(booking_id = %self.booking.id, marked = rows.len(), "marked messages read");
            }
            Err(e) => warn!(booking_id = %self.booking.id, error = %e, "marking messages read failed"),
        }
        Ok(())
    }

    pub async fn send_text(&mut self, text: &str) -> Result<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::validation("Message cannot be empty"));
        }
        self.insert(json!({
            "booking_id": self.booking.id,
            "sender_id": self.user_id,
            "message": text,
            "message_type": AttachmentKind::Text,
        }))
        .await
    }

    /// Upload `media` and post it; `kind` overrides the MIME-derived kind
    pub async fn send_attachment(&mut self, media: Media, kind: Option<AttachmentKind>) -> Result<ChatMessage> {
        let kind = match kind {
            Some(AttachmentKind::Text) | None => AttachmentKind::from_mime(&media.content_type),
            Some(kind) => kind,
        };
        let file_name = media.file_name.clone();
        let file_size = media.size();
        let label = match kind {
            AttachmentKind::Audio => "Voice message".to_string(),
            AttachmentKind::Image => "Image".to_string(),
            _ => file_name.clone(),
        };

        let uploaded = self
            .uploader
            .upload(Bucket::ChatAttachments, &self.booking.id, media)
            .await?;

        self.insert(json!({
            "booking_id": self.booking.id,
            "sender_id": self.user_id,
            "message": label,
            "message_type": kind,
            "file_url": uploaded.public_url,
            "file_name": file_name,
            "file_size": file_size,
        }))
        .await
    }

    async fn insert(&mut self, row: serde_json::Value) -> Result<ChatMessage> {
        let message: ChatMessage = self.backend.insert_as(tables::CHAT_MESSAGES, row).await?;
        info!(booking_id = %self.booking.id, message_id = %message.id, "message sent");
        self.apply_insert(message.clone());
        Ok(message)
    }

    /// Append unless a message with the same id is already shown
    pub fn apply_insert(&mut self, message: ChatMessage) -> bool {
        if message.booking_id != self.booking.id || self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Handle one channel event
    pub async fn apply(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::Message(message) => {
                let incoming = message.sender_id != self.user_id;
                let id = message.id.clone();
                if self.apply_insert(message) && incoming {
                    self.remote_typing = false;
                    let query = Query::table(tables::CHAT_MESSAGES).eq("id", id.as_str());
                    match self.backend.update(&query, json!({ "is_read": true })).await {
                        Ok(_) => {
                            if let Some(m) = self.messages.iter_mut().find(|m| m.id == id) {
                                m.is_read = true;
                            }
                        }
                        Err(e) => warn!(message_id = %id, error = %e, "marking message read failed"),
                    }
                }
            }
            ChatEvent::Typing(signal) => {
                if signal.user_id != self.user_id {
                    self.remote_typing = signal.is_typing;
                }
            }
        }
    }

    /// Record a keystroke; returns the signal to broadcast when typing starts
    pub fn on_keystroke(&mut self, now: Instant) -> Option<TypingSignal> {
        let started = self.last_keystroke.is_none();
        self.last_keystroke = Some(now);
        started.then(|| TypingSignal {
            user_id: self.user_id.clone(),
            is_typing: true,
        })
    }

    /// Returns the "stopped" signal once input has been idle long enough
    pub fn poll_typing(&mut self, now: Instant) -> Option<TypingSignal> {
        let last = self.last_keystroke?;
        if now.duration_since(last) < TYPING_IDLE {
            return None;
        }
        self.last_keystroke = None;
        Some(TypingSignal {
            user_id: self.user_id.clone(),
            is_typing: false,
        })
    }

    /// Join the thread's channel, forwarding inserts and typing signals
    ///
    /// Drop or unsubscribe the returned handle when the thread closes. After
    /// a dropped connection, call [`load`](Self::load) again once
    /// [`Resync::reconnected`](crate::resync::Resync::reconnected) resolves.
    pub async fn subscribe(
        &self,
        realtime: &RealtimeClient,
        events: mpsc::UnboundedSender<ChatEvent>,
    ) -> Result<Subscription> {
        let typing_events = events.clone();
        let subscription = realtime
            .channel(&self.channel_name())
            .on(
                DatabaseChanges::new(tables::CHAT_MESSAGES)
                    .event(ChannelEvent::Insert)
                    .eq("booking_id", self.booking.id.as_str()),
                move |payload| {
                    let Some(row) = payload.record() else {
                        return;
                    };
                    match serde_json::from_value::<ChatMessage>(row.clone()) {
                        Ok(message) => {
                            let _ = events.send(ChatEvent::Message(message));
                        }
                        Err(e) => warn!(error = %e, "unreadable chat row"),
                    }
                },
            )
            .on_broadcast(BroadcastChanges::new(TYPING_EVENT), move |payload| {
                if let Ok(signal) = serde_json::from_value::<TypingSignal>(payload.data) {
                    let _ = typing_events.send(ChatEvent::Typing(signal));
                }
            })
            .subscribe()
            .await?;
        Ok(subscription)
    }
}

pub async fn send_typing(subscription: &Subscription, signal: &TypingSignal) -> Result<()> {
    subscription
        .send_broadcast(TYPING_EVENT, serde_json::to_value(signal)?)
        .await?;
    Ok(())
}
