use crate::client::RealtimeClient;
use crate::error::RealtimeError;
use crate::filters::{DatabaseFilter, FilterOperator};
use crate::message::{ChannelEvent, Payload, RealtimeMessage};
use log::{debug, trace, warn};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Row-change binding: one event on one table, optionally filtered
#[derive(Debug, Clone)]
pub struct DatabaseChanges {
    schema: String,
    table: String,
    event: ChannelEvent,
    filter: Option<DatabaseFilter>,
}

impl DatabaseChanges {
    pub fn new(table: &str) -> Self {
        Self {
            schema: "public".to_string(),
            table: table.to_string(),
            event: ChannelEvent::All,
            filter: None,
        }
    }

    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    /// `Insert`, `Update`, `Delete` or `All`
    pub fn event(mut self, event: ChannelEvent) -> Self {
        self.event = event;
        self
    }

    /// The server accepts a single filter per binding; a later call replaces it.
    pub fn filter(mut self, filter: DatabaseFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn eq<T: Into<serde_json::Value>>(self, column: &str, value: T) -> Self {
        self.filter(DatabaseFilter::new(column, FilterOperator::Eq, value))
    }

    pub(crate) fn to_binding(&self) -> serde_json::Value {
        let mut binding = json!({
            "event": self.event.as_str(),
            "schema": self.schema,
            "table": self.table,
        });
        if let Some(filter) = &self.filter {
            binding["filter"] = json!(filter.to_string());
        }
        binding
    }

    fn matches(&self, payload: &Payload) -> bool {
        let event_ok = self.event == ChannelEvent::All
            || payload.event_type.as_deref() == Some(self.event.as_str());
        let table_ok = payload
            .data
            .get("table")
            .and_then(|t| t.as_str())
            .map_or(true, |t| t == self.table);
        event_ok && table_ok
    }
}

/// Broadcast binding for one named event
#[derive(Debug, Clone)]
pub struct BroadcastChanges {
    event: String,
}

impl BroadcastChanges {
    pub fn new(event: &str) -> Self {
        Self {
            event: event.to_string(),
        }
    }

    fn matches(&self, payload: &Payload) -> bool {
        self.event == "*" || payload.event_type.as_deref() == Some(self.event.as_str())
    }
}

#[derive(Debug, Clone)]
enum Binding {
    Postgres(DatabaseChanges),
    Broadcast(BroadcastChanges),
}

type CallbackFn = Arc<dyn Fn(Payload) + Send + Sync>;

/// Joined channel as seen by the reader task
pub(crate) struct Channel {
    pub(crate) topic: String,
    /// Join config without the access token, resent on rejoin
    pub(crate) config: serde_json::Value,
    bindings: RwLock<Vec<(Binding, CallbackFn)>>,
}

impl Channel {
    pub(crate) async fn handle_message(&self, message: RealtimeMessage) {
        let (payload, broadcast) = match message.event {
            ChannelEvent::PostgresChanges => (Payload::from_postgres_changes(&message.payload), false),
            ChannelEvent::Broadcast => (Payload::from_broadcast(&message.payload), true),
            ChannelEvent::PhoenixReply => {
                let status = message.payload.get("status").and_then(|s| s.as_str());
                if status == Some("ok") {
                    debug!("channel {} reply ok (ref {})", self.topic, message.message_ref);
                } else {
                    warn!("channel {} reply {:?}: {}", self.topic, status, message.payload);
                }
                return;
            }
            ChannelEvent::PhoenixError | ChannelEvent::PhoenixClose => {
                warn!("channel {} received {}: {}", self.topic, message.event, message.payload);
                return;
            }
            other => {
                trace!("channel {} ignoring {}", self.topic, other);
                return;
            }
        };

        // Callbacks run without the lock held.
        let targets: Vec<CallbackFn> = self
            .bindings
            .read()
            .await
            .iter()
            .filter(|(binding, _)| match binding {
                Binding::Postgres(changes) => !broadcast && changes.matches(&payload),
                Binding::Broadcast(changes) => broadcast && changes.matches(&payload),
            })
            .map(|(_, callback)| callback.clone())
            .collect();

        trace!("channel {} dispatching to {} callbacks", self.topic, targets.len());
        for callback in targets {
            callback(payload.clone());
        }
    }
}

/// A joined channel. Leaving happens on [`Subscription::unsubscribe`] or drop.
pub struct Subscription {
    topic: String,
    client: RealtimeClient,
    left: bool,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Send an ephemeral event to every other member of the channel
    pub async fn send_broadcast(
        &self,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), RealtimeError> {
        self.client.send_broadcast(&self.topic, event, payload).await
    }

    /// Leave the channel and stop delivering callbacks
    pub async fn unsubscribe(mut self) -> Result<(), RealtimeError> {
        self.left = true;
        self.client.leave(&self.topic).await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.left {
            return;
        }
        let topic = self.topic.clone();
        let client = self.client.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.leave(&topic).await {
                        debug!("leave on drop for {} failed: {}", topic, e);
                    }
                });
            }
            Err(_) => warn!("subscription {} dropped outside a runtime; not leaving", topic),
        }
    }
}

/// Collects bindings, then joins the channel
pub struct ChannelBuilder<'a> {
    client: &'a RealtimeClient,
    topic: String,
    bindings: Vec<(Binding, CallbackFn)>,
    broadcast_self: bool,
}

impl<'a> ChannelBuilder<'a> {
    pub(crate) fn new(client: &'a RealtimeClient, name: &str) -> Self {
        Self {
            client,
            topic: format!("realtime:{}", name),
            bindings: Vec::new(),
            broadcast_self: false,
        }
    }

    /// Row-change callback
    pub fn on<F>(mut self, changes: DatabaseChanges, callback: F) -> Self
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        self.bindings
            .push((Binding::Postgres(changes), Arc::new(callback)));
        self
    }

    /// Broadcast callback
    pub fn on_broadcast<F>(mut self, changes: BroadcastChanges, callback: F) -> Self
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        self.bindings
            .push((Binding::Broadcast(changes), Arc::new(callback)));
        self
    }

    /// Also deliver this client's own broadcasts back to it
    pub fn receive_own_broadcasts(mut self, enabled: bool) -> Self {
        self.broadcast_self = enabled;
        self
    }

    /// Connect if needed, register callbacks, and send the join
    pub async fn subscribe(self) -> Result<Subscription, RealtimeError> {
        self.client.ensure_connected().await?;

        let postgres_changes: Vec<serde_json::Value> = self
            .bindings
            .iter()
            .filter_map(|(binding, _)| match binding {
                Binding::Postgres(changes) => Some(changes.to_binding()),
                Binding::Broadcast(_) => None,
            })
            .collect();

        let config = json!({
            "broadcast": { "self": self.broadcast_self, "ack": false },
            "presence": { "key": "" },
            "postgres_changes": postgres_changes,
        });
        let join = self.client.join_frame(&self.topic, &config).await;

        let channel = Arc::new(Channel {
            topic: self.topic.clone(),
            config,
            bindings: RwLock::new(self.bindings),
        });
        self.client
            .channels
            .write()
            .await
            .insert(self.topic.clone(), channel);

        if let Err(e) = self.client.send_message(join).await {
            self.client.channels.write().await.remove(&self.topic);
            return Err(e);
        }

        debug!("joined {}", self.topic);
        Ok(Subscription {
            topic: self.topic,
            client: self.client.clone(),
            left: false,
        })
    }
}
