use crate::channel::{Channel, ChannelBuilder};
use crate::error::RealtimeError;
use crate::message::{ChannelEvent, RealtimeMessage};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct RealtimeClientOptions {
    pub heartbeat_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for RealtimeClientOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Websocket client shared by every channel
///
/// Cloning is cheap and clones share the same connection.
#[derive(Clone)]
pub struct RealtimeClient {
    pub(crate) url: String,
    pub(crate) key: String,
    next_ref: Arc<AtomicU32>,
    pub(crate) channels: Arc<RwLock<HashMap<String, Arc<Channel>>>>,
    pub(crate) socket: Arc<RwLock<Option<mpsc::Sender<Message>>>>,
    pub(crate) options: RealtimeClientOptions,
    state: Arc<RwLock<ConnectionState>>,
    state_change: broadcast::Sender<ConnectionState>,
    pub(crate) access_token: Arc<RwLock<Option<String>>>,
}

impl RealtimeClient {
    pub fn new(url: &str, key: &str) -> Self {
        Self::new_with_options(url, key, RealtimeClientOptions::default())
    }

    pub fn new_with_options(url: &str, key: &str, options: RealtimeClientOptions) -> Self {
        let (state_change, _) = broadcast::channel(16);
        Self {
            url: url.to_string(),
            key: key.to_string(),
            next_ref: Arc::new(AtomicU32::new(1)),
            channels: Arc::new(RwLock::new(HashMap::new())),
            socket: Arc::new(RwLock::new(None)),
            options,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            state_change,
            access_token: Arc::new(RwLock::new(None)),
        }
    }

    /// Set the user token; joined channels are told about the change
    pub async fn set_auth(&self, token: Option<String>) -> Result<(), RealtimeError> {
        info!("setting realtime auth token (is_some: {})", token.is_some());
        *self.access_token.write().await = token.clone();

        let Some(token) = token else {
            return Ok(());
        };
        if self.get_connection_state().await != ConnectionState::Connected {
            return Ok(());
        }
        let topics: Vec<String> = self.channels.read().await.keys().cloned().collect();
        for topic in topics {
            self.send_message(json!({
                "topic": topic,
                "event": ChannelEvent::AccessToken,
                "payload": { "access_token": token },
                "ref": self.next_ref(),
            }))
            .await?;
        }
        Ok(())
    }

    /// Reconnect and join every channel that is still subscribed
    ///
    /// Channels survive a dropped socket; only [`disconnect`](Self::disconnect)
    /// or leaving forgets them. Returns the number of channels joined again,
    /// and does not connect when there are none.
    pub async fn rejoin(&self) -> Result<usize, RealtimeError> {
        let channels: Vec<Arc<Channel>> = self.channels.read().await.values().cloned().collect();
        if channels.is_empty() {
            return Ok(0);
        }
        self.ensure_connected().await?;
        for channel in &channels {
            let join = self.join_frame(&channel.topic, &channel.config).await;
            self.send_message(join).await?;
            debug!("rejoined {}", channel.topic);
        }
        info!("rejoined {} realtime channels", channels.len());
        Ok(channels.len())
    }

    pub(crate) async fn ensure_connected(&self) -> Result<(), RealtimeError> {
        if self.get_connection_state().await == ConnectionState::Connected {
            return Ok(());
        }
        timeout(self.options.connect_timeout, self.connect())
            .await
            .map_err(|_| RealtimeError::ConnectionError("Timeout waiting for connection".to_string()))?
    }

    /// `phx_join` frame carrying the current access token, if any
    pub(crate) async fn join_frame(&self, topic: &str, config: &serde_json::Value) -> serde_json::Value {
        let mut payload = json!({ "config": config });
        if let Some(token) = self.access_token.read().await.as_ref() {
            payload["access_token"] = json!(token);
        }
        json!({
            "topic": topic,
            "event": ChannelEvent::PhoenixJoin,
            "payload": payload,
            "ref": self.next_ref(),
        })
    }

    pub fn on_state_change(&self) -> broadcast::Receiver<ConnectionState> {
        self.state_change.subscribe()
    }

    pub async fn get_connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Builder for channel `name`; the wire topic is `realtime:{name}`
    pub fn channel(&self, name: &str) -> ChannelBuilder<'_> {
        ChannelBuilder::new(self, name)
    }

    pub(crate) fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn socket_url(&self) -> Result<String, RealtimeError> {
        let mut url = Url::parse(&self.url)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            s => {
                return Err(RealtimeError::ConnectionError(format!(
                    "Unsupported URL scheme: {}",
                    s
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| RealtimeError::ConnectionError("Cannot set websocket scheme".to_string()))?;
        let mut url = url.join("/realtime/v1/websocket")?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.key)
            .append_pair("vsn", "1.0.0");
        Ok(url.to_string())
    }

    /// Open the websocket and spawn the reader and writer tasks
    ///
    /// Returns once the connection is established; a no-op when already
    /// connected.
    pub async fn connect(&self) -> Result<(), RealtimeError> {
        if self.get_connection_state().await == ConnectionState::Connected {
            return Ok(());
        }

        let ws_url = self.socket_url()?;
        info!("connecting to realtime at {}", self.url);
        set_state(&self.state, &self.state_change, ConnectionState::Connecting).await;

        let ws_stream = match connect_async(&ws_url).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                error!("websocket connection failed: {}", e);
                set_state(&self.state, &self.state_change, ConnectionState::Disconnected).await;
                return Err(RealtimeError::ConnectionError(format!(
                    "WebSocket connection failed: {}",
                    e
                )));
            }
        };

        let (mut write, mut read) = ws_stream.split();
        let (socket_tx, mut socket_rx) = mpsc::channel::<Message>(100);
        *self.socket.write().await = Some(socket_tx.clone());
        set_state(&self.state, &self.state_change, ConnectionState::Connected).await;

        tokio::spawn(async move {
            while let Some(message) = socket_rx.recv().await {
                trace!("sending frame: {:?}", message);
                if let Err(e) = write.send(message).await {
                    error!("websocket send error: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
            debug!("writer task finished");
        });

        let socket = self.socket.clone();
        let state = self.state.clone();
        let state_change = self.state_change.clone();
        let channels = self.channels.clone();
        let next_ref = self.next_ref.clone();
        let heartbeat_every = self.options.heartbeat_interval;

        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(heartbeat_every);
            heartbeat.tick().await;

            loop {
                tokio::select! {
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<RealtimeMessage>(&text) {
                                Ok(message) => {
                                    let channel = channels.read().await.get(&message.topic).cloned();
                                    match channel {
                                        Some(channel) => channel.handle_message(message).await,
                                        None if message.topic == "phoenix" => trace!("phoenix frame: {:?}", message.event),
                                        None => debug!("frame for unknown topic {}", message.topic),
                                    }
                                }
                                Err(e) => warn!("unparseable frame: {} ({})", e, text),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("websocket closed by remote");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!("websocket read error: {}", e);
                            break;
                        }
                    },
                    _ = heartbeat.tick() => {
                        let Some(tx) = socket.read().await.clone() else {
                            break;
                        };
                        let frame = json!({
                            "topic": "phoenix",
                            "event": ChannelEvent::Heartbeat,
                            "payload": {},
                            "ref": next_ref.fetch_add(1, Ordering::SeqCst).to_string(),
                        });
                        if tx.send(Message::Text(frame.to_string())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            *socket.write().await = None;
            set_state(&state, &state_change, ConnectionState::Disconnected).await;
            debug!("reader task finished");
        });

        Ok(())
    }

    /// Close the connection; joined channels are forgotten
    pub async fn disconnect(&self) -> Result<(), RealtimeError> {
        info!("disconnecting realtime");
        self.channels.write().await.clear();
        if let Some(tx) = self.socket.write().await.take() {
            let _ = tx.send(Message::Close(None)).await;
        }
        set_state(&self.state, &self.state_change, ConnectionState::Disconnected).await;
        Ok(())
    }

    pub(crate) async fn leave(&self, topic: &str) -> Result<(), RealtimeError> {
        if self.channels.write().await.remove(topic).is_none() {
            return Ok(());
        }
        debug!("leaving {}", topic);
        if self.socket.read().await.is_none() {
            return Ok(());
        }
        self.send_message(json!({
            "topic": topic,
            "event": ChannelEvent::PhoenixLeave,
            "payload": {},
            "ref": self.next_ref(),
        }))
        .await
    }

    pub(crate) async fn send_broadcast(
        &self,
        topic: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), RealtimeError> {
        self.send_message(json!({
            "topic": topic,
            "event": ChannelEvent::Broadcast,
            "payload": { "type": "broadcast", "event": event, "payload": payload },
            "ref": self.next_ref(),
        }))
        .await
    }

    pub(crate) async fn send_message(&self, message: serde_json::Value) -> Result<(), RealtimeError> {
        let tx = self.socket.read().await.clone();
        match tx {
            Some(tx) => Ok(tx.send(Message::Text(message.to_string())).await?),
            None => Err(RealtimeError::ConnectionError(
                "Client socket unavailable".to_string(),
            )),
        }
    }
}

async fn set_state(
    state: &RwLock<ConnectionState>,
    state_change: &broadcast::Sender<ConnectionState>,
    next: ConnectionState,
) {
    let mut current = state.write().await;
    if *current != next {
        trace!("realtime state {:?} -> {:?}", *current, next);
        *current = next;
        let _ = state_change.send(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_url_maps_scheme() {
        let client = RealtimeClient::new("https://example.backend.co", "anon");
        assert_eq!(
            client.socket_url().unwrap(),
            "wss://example.backend.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );

        let client = RealtimeClient::new("http://127.0.0.1:54321", "anon");
        assert!(client.socket_url().unwrap().starts_with("ws://127.0.0.1:54321/realtime/v1/websocket"));

        let client = RealtimeClient::new("ftp://example.com", "anon");
        assert!(client.socket_url().is_err());
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let client = RealtimeClient::new("http://127.0.0.1:1", "anon");
        let err = client.send_message(json!({})).await.unwrap_err();
        assert!(matches!(err, RealtimeError::ConnectionError(_)));
        client.set_auth(Some("jwt".to_string())).await.unwrap();
        assert_eq!(client.access_token.read().await.as_deref(), Some("jwt"));
    }
}
