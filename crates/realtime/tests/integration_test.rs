use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use skillfeed_realtime::{
    BroadcastChanges, ChannelEvent, ConnectionState, DatabaseChanges, RealtimeClient,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Loopback server: acks joins, pushes one chat insert after a join, and
/// forwards every frame it receives to the test.
async fn start_mock_server() -> (String, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let frame: Value = serde_json::from_str(&text).unwrap();
            let _ = seen_tx.send(frame.clone());

            if frame["event"] == "phx_join" {
                let topic = frame["topic"].clone();
                let reply = json!({
                    "topic": topic,
                    "event": "phx_reply",
                    "payload": { "status": "ok", "response": {} },
                    "ref": frame["ref"],
                });
                ws.send(Message::Text(reply.to_string())).await.unwrap();

                let insert = json!({
                    "topic": topic,
                    "event": "postgres_changes",
                    "payload": {
                        "ids": [1],
                        "data": {
                            "type": "INSERT",
                            "schema": "public",
                            "table": "chat_messages",
                            "record": { "id": "m1", "booking_id": "b1", "message": "hello" },
                            "old_record": null,
                            "commit_timestamp": "2024-05-01T10:00:00Z"
                        }
                    },
                    "ref": null
                });
                ws.send(Message::Text(insert.to_string())).await.unwrap();
            }
        }
    });

    (format!("http://{}", addr), seen_rx)
}

async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("server gone")
}

#[tokio::test]
async fn test_subscribe_receives_filtered_inserts_and_leaves() {
    let (url, mut server_frames) = start_mock_server().await;
    let client = RealtimeClient::new(&url, "anon");
    client.set_auth(Some("user-jwt".to_string())).await.unwrap();

    let (rows_tx, mut rows_rx) = mpsc::unbounded_channel();
    let subscription = client
        .channel("chat:b1")
        .on(
            DatabaseChanges::new("chat_messages")
                .event(ChannelEvent::Insert)
                .eq("booking_id", "b1"),
            move |payload| {
                let _ = rows_tx.send(payload.record().cloned());
            },
        )
        .on_broadcast(BroadcastChanges::new("typing"), |_| {})
        .subscribe()
        .await
        .unwrap();

    assert_eq!(client.get_connection_state().await, ConnectionState::Connected);

    let join = next_frame(&mut server_frames).await;
    assert_eq!(join["event"], "phx_join");
    assert_eq!(join["topic"], "realtime:chat:b1");
    assert_eq!(join["payload"]["access_token"], "user-jwt");
    assert_eq!(
        join["payload"]["config"]["postgres_changes"],
        json!([{
            "event": "INSERT",
            "schema": "public",
            "table": "chat_messages",
            "filter": "booking_id=eq.b1"
        }])
    );

    let row = tokio::time::timeout(Duration::from_secs(2), rows_rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(row["message"], "hello");

    subscription
        .send_broadcast("typing", json!({ "user_id": "u1", "typing": true }))
        .await
        .unwrap();
    let typing = next_frame(&mut server_frames).await;
    assert_eq!(typing["event"], "broadcast");
    assert_eq!(typing["payload"]["event"], "typing");
    assert_eq!(typing["payload"]["payload"]["user_id"], "u1");

    subscription.unsubscribe().await.unwrap();
    let leave = next_frame(&mut server_frames).await;
    assert_eq!(leave["event"], "phx_leave");
    assert_eq!(leave["topic"], "realtime:chat:b1");

    client.disconnect().await.unwrap();
    assert_eq!(client.get_connection_state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_dropping_subscription_leaves_channel() {
    let (url, mut server_frames) = start_mock_server().await;
    let client = RealtimeClient::new(&url, "anon");

    let subscription = client
        .channel("notifications:u1")
        .on(DatabaseChanges::new("notifications").eq("user_id", "u1"), |_| {})
        .subscribe()
        .await
        .unwrap();

    let join = next_frame(&mut server_frames).await;
    assert!(join["payload"].get("access_token").is_none());

    drop(subscription);
    let leave = next_frame(&mut server_frames).await;
    assert_eq!(leave["event"], "phx_leave");
    assert_eq!(leave["topic"], "realtime:notifications:u1");
}

#[tokio::test]
async fn test_connect_failure_reports_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = RealtimeClient::new(&format!("http://{}", addr), "anon");
    assert!(client.connect().await.is_err());
    assert_eq!(client.get_connection_state().await, ConnectionState::Disconnected);
}

/// Drops the first connection right after its join, then serves a second one.
async fn start_dropping_server() -> (String, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for attempt in 0..2 {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                let Message::Text(text) = msg else { continue };
                let frame: Value = serde_json::from_str(&text).unwrap();
                let _ = seen_tx.send(frame.clone());
                if frame["event"] == "phx_join" && attempt == 0 {
                    let _ = ws.close(None).await;
                    break;
                }
            }
        }
    });

    (format!("http://{}", addr), seen_rx)
}

#[tokio::test]
async fn test_rejoin_after_drop_uses_current_token() {
    let (url, mut server_frames) = start_dropping_server().await;
    let client = RealtimeClient::new(&url, "anon");
    let mut states = client.on_state_change();

    let _subscription = client
        .channel("notifications:u1")
        .on(DatabaseChanges::new("notifications").eq("user_id", "u1"), |_| {})
        .subscribe()
        .await
        .unwrap();
    let first = next_frame(&mut server_frames).await;
    assert_eq!(first["event"], "phx_join");

    tokio::time::timeout(Duration::from_secs(2), async {
        while states.recv().await.unwrap() != ConnectionState::Disconnected {}
    })
    .await
    .unwrap();

    client.set_auth(Some("fresh-jwt".to_string())).await.unwrap();
    assert_eq!(client.rejoin().await.unwrap(), 1);

    let again = next_frame(&mut server_frames).await;
    assert_eq!(again["event"], "phx_join");
    assert_eq!(again["topic"], "realtime:notifications:u1");
    assert_eq!(again["payload"]["access_token"], "fresh-jwt");
    assert_eq!(again["payload"]["config"], first["payload"]["config"]);
}

#[tokio::test]
async fn test_rejoin_without_channels_stays_offline() {
    let client = RealtimeClient::new("http://127.0.0.1:1", "anon");
    assert_eq!(client.rejoin().await.unwrap(), 0);
    assert_eq!(client.get_connection_state().await, ConnectionState::Disconnected);
}
