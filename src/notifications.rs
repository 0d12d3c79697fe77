//! In-app notifications and device alerts
//!
//! [`Inbox`] mirrors the user's notification rows. [`NotificationService`]
//! decides whether a device alert may be shown and hands it to a
//! [`NotificationSink`], which is whatever the host platform provides.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use skillfeed_realtime::{ChannelEvent, DatabaseChanges, RealtimeClient, Subscription};

use crate::backend::{Backend, BackendExt, Query};
use crate::error::Result;
use crate::models::{tables, Notification};

const PAGE_SIZE: usize = 50;

/// Count of the user's unread notifications, straight from the backend
pub async fn unread_count(backend: &dyn Backend, user_id: &str) -> Result<usize> {
    backend
        .count(
            &Query::table(tables::NOTIFICATIONS)
                .eq("user_id", user_id)
                .eq("read", false),
        )
        .await
}

pub struct Inbox {
    backend: Arc<dyn Backend>,
    user_id: String,
    items: Vec<Notification>,
}

impl Inbox {
    pub async fn open(backend: Arc<dyn Backend>, user_id: &str) -> Result<Self> {
        let mut inbox = Self {
            backend,
            user_id: user_id.to_string(),
            items: Vec::new(),
        };
        inbox.reload().await?;
        Ok(inbox)
    }

    /// Newest first
    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn unread(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }

    pub async fn reload(&mut self) -> Result<()> {
        self.items = self
            .backend
            .select_as(
                &Query::table(tables::NOTIFICATIONS)
                    .eq("user_id", self.user_id.as_str())
                    .order("created_at", false)
                    .limit(PAGE_SIZE),
            )
            .await?;
        Ok(())
    }

    pub async fn mark_read(&mut self, notification_id: &str) -> Result<()> {
        self.backend
            .update(
                &Query::table(tables::NOTIFICATIONS)
                    .eq("id", notification_id)
                    .eq("user_id", self.user_id.as_str()),
                json!({ "read": true }),
            )
            .await?;
        if let Some(n) = self.items.iter_mut().find(|n| n.id == notification_id) {
            n.read = true;
        }
        Ok(())
    }

    pub async fn mark_all_read(&mut self) -> Result<()> {
        let updated = self
            .backend
            .update(
                &Query::table(tables::NOTIFICATIONS)
                    .eq("user_id", self.user_id.as_str())
                    .eq("read", false),
                json!({ "read": true }),
            )
            .await?;
        debug!(user_id = %self.user_id, count = updated.len(), "marked all notifications read");
        for n in &mut self.items {
            n.read = true;
        }
        Ok(())
    }

    /// Prepend a pushed row unless it is already listed
    pub fn apply_insert(&mut self, notification: Notification) -> bool {
        if notification.user_id != self.user_id || self.items.iter().any(|n| n.id == notification.id) {
            return false;
        }
        self.items.insert(0, notification);
        self.items.truncate(PAGE_SIZE);
        true
    }

    /// Forward the user's new notification rows into `inserts`
    ///
    /// Rows written while the socket is down are not pushed; reload once
    /// [`Resync::reconnected`](crate::resync::Resync::reconnected) resolves.
    pub async fn subscribe(
        &self,
        realtime: &RealtimeClient,
        inserts: mpsc::UnboundedSender<Notification>,
    ) -> Result<Subscription> {
        let subscription = realtime
            .channel(&format!("notifications-{}", self.user_id))
            .on(
                DatabaseChanges::new(tables::NOTIFICATIONS)
                    .event(ChannelEvent::Insert)
                    .eq("user_id", self.user_id.as_str()),
                move |payload| {
                    let Some(row) = payload.record() else {
                        return;
                    };
                    match serde_json::from_value::<Notification>(row.clone()) {
                        Ok(n) => {
                            let _ = inserts.send(n);
                        }
                        Err(e) => warn!(error = %e, "unreadable notification row"),
                    }
                },
            )
            .subscribe()
            .await?;
        Ok(subscription)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Not asked yet
    Default,
    Granted,
    Denied,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertOptions {
    pub body: Option<String>,
    pub icon: String,
    pub badge: String,
    pub silent: bool,
    pub tag: Option<String>,
}

impl Default for AlertOptions {
    fn default() -> Self {
        Self {
            body: None,
            icon: "/logo.png".to_string(),
            badge: "/logo.png".to_string(),
            silent: false,
            tag: None,
        }
    }
}

/// Platform hook that actually shows alerts
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn permission(&self) -> Permission;

    async fn request_permission(&self) -> Permission;

    async fn show(&self, title: &str, options: &AlertOptions) -> Result<()>;
}

/// Guards alert permission and shows alerts through a sink
pub struct NotificationService {
    sink: Arc<dyn NotificationSink>,
    granted: AtomicBool,
}

impl NotificationService {
    /// Read the current permission without prompting
    pub fn init(sink: Arc<dyn NotificationSink>) -> Self {
        let permission = sink.permission();
        if permission == Permission::Unsupported {
            warn!("device notifications are not supported here");
        }
        Self {
            granted: AtomicBool::new(permission == Permission::Granted),
            sink,
        }
    }

    pub fn has_permission(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    /// Prompt only if the user has not decided yet
    pub async fn request_permission(&self) -> bool {
        let granted = match self.sink.permission() {
            Permission::Granted => true,
            Permission::Default => self.sink.request_permission().await == Permission::Granted,
            Permission::Denied | Permission::Unsupported => false,
        };
        self.granted.store(granted, Ordering::SeqCst);
        granted
    }

    /// Show an alert; `Ok(false)` when permission is missing
    pub async fn notify(&self, title: &str, options: AlertOptions) -> Result<bool> {
        if !self.has_permission() && !self.request_permission().await {
            debug!(title, "alert suppressed without permission");
            return Ok(false);
        }
        self.sink.show(title, &options).await?;
        info!(title, "alert shown");
        Ok(true)
    }

    /// Alert for a pushed notification row
    pub async fn notify_row(&self, notification: &Notification) -> Result<bool> {
        self.notify(
            &notification.title,
            AlertOptions {
                body: Some(notification.message.clone()),
                tag: Some(notification.id.clone()),
                ..AlertOptions::default()
            },
        )
        .await
    }
}
