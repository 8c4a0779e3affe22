//! Integration tests for the hub: handshake, routing, heartbeat, and the
//! full lobby lifecycle over real WebSocket connections.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use lobbysync::LobbyHubBuilder;
use lobbysync::prelude::*;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(3);

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

fn store() -> InMemoryLobbyStore {
    InMemoryLobbyStore::new()
        .with_lobby("L1", "alice", Some("pw"))
        .with_lobby("L2", "bob", None)
}

fn auth() -> StaticAuthenticator {
    StaticAuthenticator::new()
        .with_token("tok-a", "alice")
        .with_token("tok-b", "bob")
        .with_token("tok-c", "carol")
}

fn builder() -> LobbyHubBuilder {
    LobbyHub::builder()
        .bind("127.0.0.1:0")
        .heartbeat(HeartbeatConfig::new(
            Duration::from_millis(50),
            Duration::from_millis(300),
        ))
}

/// Starts a hub on a random port and returns its address and registry.
async fn start_hub(
    builder: LobbyHubBuilder,
) -> (String, Arc<SessionRegistry<InMemoryLobbyStore>>) {
    let hub = builder
        .build(store(), auth())
        .await
        .expect("hub should build");
    let addr = hub.local_addr().expect("should have local addr").to_string();
    let registry = hub.registry();

    tokio::spawn(async move {
        let _ = hub.run().await;
    });

    (addr, registry)
}

/// A test client whose reader runs in the background, so pings are
/// answered while the test waits on other clients.
struct Client {
    sink: SplitSink<ClientWs, Message>,
    inbox: mpsc::UnboundedReceiver<Message>,
    reader: JoinHandle<()>,
}

impl Client {
    async fn connect(addr: &str) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("should connect");
        let (sink, mut stream) = ws.split();
        let (tx, inbox) = mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                match msg {
                    Message::Text(_) | Message::Binary(_) => {
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => {
                        let _ = tx.send(msg);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Self { sink, inbox, reader }
    }

    /// Connects and completes the handshake for `lobby` with `token`.
    async fn join(addr: &str, token: &str, lobby: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client.handshake(token, lobby).await;
        client
    }

    async fn send(&mut self, value: Value) {
        self.send_raw(&value.to_string()).await;
    }

    async fn send_raw(&mut self, text: &str) {
        self.sink
            .send(Message::text(text.to_owned()))
            .await
            .expect("send should succeed");
    }

    async fn handshake(&mut self, token: &str, lobby: &str) {
        self.send(json!({
            "event": "handshake",
            "version": PROTOCOL_VERSION,
            "token": token,
            "lobby_id": lobby,
        }))
        .await;
    }

    async fn next_message(&mut self) -> Message {
        tokio::time::timeout(WAIT, self.inbox.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("connection ended without a close frame")
    }

    /// Next event, panicking on a close frame.
    async fn next_event(&mut self) -> Value {
        match self.next_message().await {
            Message::Text(text) => serde_json::from_str(&text).expect("valid json"),
            Message::Binary(data) => serde_json::from_slice(&data).expect("valid json"),
            other => panic!("expected an event, got {other:?}"),
        }
    }

    /// Skips events until one named `name` arrives.
    async fn event(&mut self, name: &str) -> Value {
        loop {
            let event = self.next_event().await;
            if event["event"] == name {
                return event;
            }
        }
    }

    /// Skips events until the close frame arrives and returns its code.
    async fn close_code(&mut self) -> u16 {
        loop {
            if let Message::Close(frame) = self.next_message().await {
                return frame.map(|f| u16::from(f.code)).unwrap_or(1005);
            }
        }
    }

    /// Stops reading, so pings go unanswered.
    fn go_silent(&self) {
        self.reader.abort();
    }
}

fn lobby(id: &str) -> LobbyId {
    LobbyId::new(id)
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_handshake_success_receives_welcome_then_presence() {
    let (addr, _registry) = start_hub(builder()).await;
    let mut alice = Client::join(&addr, "tok-a", "L1").await;

    let welcome = alice.next_event().await;
    assert_eq!(welcome["event"], "welcome");
    assert_eq!(welcome["lobby_id"], "L1");
    assert_eq!(welcome["user"], "alice");
    assert_eq!(welcome["creator"], "alice");
    assert_eq!(welcome["version"], 0);
    assert_eq!(welcome["count"], 1);
    assert_eq!(welcome["settings"]["similarityThresholdAnalyze"], 0.8);

    let presence = alice.next_event().await;
    assert_eq!(presence["event"], "presence");
    assert_eq!(presence["count"], 1);
}

#[tokio::test]
async fn test_handshake_version_mismatch_closes_policy_violation() {
    let (addr, _registry) = start_hub(builder()).await;
    let mut client = Client::connect(&addr).await;
    client
        .send(json!({
            "event": "handshake", "version": 99, "token": "tok-a", "lobby_id": "L1"
        }))
        .await;

    let error = client.next_event().await;
    assert_eq!(error["event"], "error");
    assert_eq!(error["kind"], "version_mismatch");
    assert_eq!(client.close_code().await, 1008);
}

#[tokio::test]
async fn test_handshake_bad_token_is_unauthorized() {
    let (addr, registry) = start_hub(builder()).await;
    let mut client = Client::join(&addr, "forged", "L1").await;

    let error = client.next_event().await;
    assert_eq!(error["kind"], "unauthorized");
    assert_eq!(error["lobby_id"], "L1");
    assert_eq!(client.close_code().await, 1008);
    assert_eq!(registry.session_count(), 0);
}

#[tokio::test]
async fn test_handshake_unknown_lobby_is_not_found() {
    let (addr, registry) = start_hub(builder()).await;
    let mut client = Client::join(&addr, "tok-a", "nope").await;

    let error = client.next_event().await;
    assert_eq!(error["kind"], "not_found");
    assert_eq!(client.close_code().await, 1008);
    assert_eq!(registry.lobby_count(), 0);
}

#[tokio::test]
async fn test_first_frame_not_handshake_is_rejected() {
    let (addr, _registry) = start_hub(builder()).await;
    let mut client = Client::connect(&addr).await;
    client.send(json!({"event": "join", "username": "alice"})).await;

    let error = client.next_event().await;
    assert_eq!(error["kind"], "invalid_event");
    assert_eq!(client.close_code().await, 1008);
}

#[tokio::test]
async fn test_silent_connection_times_out_handshake() {
    let (addr, _registry) =
        start_hub(builder().handshake_timeout(Duration::from_millis(100))).await;
    let mut client = Client::connect(&addr).await;

    let error = client.next_event().await;
    assert_eq!(error["kind"], "timeout");
    assert_eq!(client.close_code().await, 1008);
}

#[tokio::test]
async fn test_idle_tcp_peer_does_not_delay_other_joins() {
    let (addr, _registry) = start_hub(builder()).await;

    // Connects but never sends the WebSocket upgrade request.
    let _idle = tokio::net::TcpStream::connect(&addr)
        .await
        .expect("tcp connect");

    let started = std::time::Instant::now();
    let mut alice = tokio::time::timeout(WAIT, Client::join(&addr, "tok-a", "L1"))
        .await
        .expect("join should not wait behind the idle peer");
    assert_eq!(alice.next_event().await["event"], "welcome");
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "welcome took {:?}",
        started.elapsed()
    );
}

// =========================================================================
// Event routing
// =========================================================================

#[tokio::test]
async fn test_invalid_frames_close_after_streak() {
    let (addr, _registry) = start_hub(builder().max_invalid_frames(3)).await;
    let mut alice = Client::join(&addr, "tok-a", "L1").await;
    alice.event("presence").await;

    alice.send_raw("not json").await;
    assert_eq!(alice.next_event().await["kind"], "malformed_frame");

    alice.send(json!({"event": "dance"})).await;
    assert_eq!(alice.next_event().await["kind"], "invalid_event");

    alice.send(json!({"event": "settings_updated"})).await;
    assert_eq!(alice.next_event().await["kind"], "malformed_frame");

    assert_eq!(alice.close_code().await, 1008);
}

#[tokio::test]
async fn test_valid_frame_resets_invalid_streak() {
    let (addr, _registry) = start_hub(builder().max_invalid_frames(3)).await;
    let mut alice = Client::join(&addr, "tok-a", "L1").await;
    alice.event("presence").await;

    for _ in 0..2 {
        alice.send_raw("{").await;
        assert_eq!(alice.next_event().await["kind"], "malformed_frame");
    }
    alice.send(json!({"event": "join", "username": "alice"})).await;
    for _ in 0..2 {
        alice.send_raw("{").await;
        assert_eq!(alice.next_event().await["kind"], "malformed_frame");
    }

    // Still open: a settings change goes through.
    alice
        .send(json!({
            "event": "settings_updated",
            "settings": {
                "numConceptsStudent": 10, "numConceptsClass": 15,
                "similarityThresholdUpdate": 0.75, "similarityThresholdAnalyze": 0.85
            }
        }))
        .await;
    let update = alice.next_event().await;
    assert_eq!(update["event"], "settings_updated");
    assert_eq!(update["version"], 1);
}

#[tokio::test]
async fn test_new_note_reaches_others_not_sender() {
    let (addr, _registry) = start_hub(builder()).await;
    let mut alice = Client::join(&addr, "tok-a", "L1").await;
    alice.event("presence").await;
    let mut bob = Client::join(&addr, "tok-b", "L1").await;
    bob.event("presence").await;
    alice.event("presence").await;

    bob.send(json!({"event": "new_note", "hint": "n-1"})).await;
    let note = alice.next_event().await;
    assert_eq!(note["event"], "new_note");
    assert_eq!(note["hint"], "n-1");
    assert_eq!(note["originator"], "bob");

    // Bob's next event is alice's note, not an echo of his own.
    alice.send(json!({"event": "new_note"})).await;
    let note = bob.next_event().await;
    assert_eq!(note["event"], "new_note");
    assert_eq!(note["originator"], "alice");
}

#[tokio::test]
async fn test_repeated_join_and_leave_frames_do_not_change_presence() {
    let (addr, registry) = start_hub(builder()).await;
    let mut alice = Client::join(&addr, "tok-a", "L1").await;
    alice.event("presence").await;
    let mut bob = Client::join(&addr, "tok-b", "L1").await;
    bob.event("presence").await;
    alice.event("presence").await;

    for _ in 0..3 {
        bob.send(json!({"event": "join", "username": "bob"})).await;
    }
    bob.send(json!({"event": "leave"})).await;
    bob.send(json!({"event": "new_note", "hint": "after"})).await;

    // Frames are handled in order, so anything the join/leave frames
    // caused would arrive before the note.
    let note = alice.next_event().await;
    assert_eq!(note["event"], "new_note");
    assert_eq!(note["hint"], "after");

    alice.send(json!({"event": "new_note", "hint": "back"})).await;
    let note = bob.next_event().await;
    assert_eq!(note["event"], "new_note");
    assert_eq!(note["hint"], "back");

    assert_eq!(registry.snapshot_count(&lobby("L1")).await.unwrap(), 2);
}

#[tokio::test]
async fn test_slow_store_write_does_not_stall_requester() {
    let (addr, registry) = start_hub(builder()).await;
    let mut alice = Client::join(&addr, "tok-a", "L1").await;
    alice.event("presence").await;
    let mut bob = Client::join(&addr, "tok-b", "L1").await;
    bob.event("presence").await;
    alice.event("presence").await;

    // Longer than the heartbeat timeout.
    registry.store().set_latency(Duration::from_millis(600));
    alice
        .send(json!({
            "event": "settings_updated",
            "settings": {
                "numConceptsStudent": 10, "numConceptsClass": 15,
                "similarityThresholdUpdate": 0.75, "similarityThresholdAnalyze": 0.9
            }
        }))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    bob.send(json!({"event": "new_note", "hint": "meanwhile"})).await;

    // Alice's queue keeps draining while her write is pending.
    let note = alice.next_event().await;
    assert_eq!(note["event"], "new_note");
    assert_eq!(note["hint"], "meanwhile");

    let update = alice.next_event().await;
    assert_eq!(update["event"], "settings_updated");
    assert_eq!(update["version"], 1);

    // Still connected: heartbeats went on during the write.
    tokio::time::sleep(Duration::from_millis(200)).await;
    bob.send(json!({"event": "new_note", "hint": "later"})).await;
    assert_eq!(alice.event("new_note").await["hint"], "later");
    assert_eq!(registry.snapshot_count(&lobby("L1")).await.unwrap(), 2);
}

#[tokio::test]
async fn test_non_creator_settings_update_is_unauthorized() {
    let (addr, registry) = start_hub(builder()).await;
    let mut alice = Client::join(&addr, "tok-a", "L1").await;
    alice.event("presence").await;
    let mut bob = Client::join(&addr, "tok-b", "L1").await;
    bob.event("presence").await;
    alice.event("presence").await;

    bob.send(json!({
        "event": "settings_updated",
        "settings": {
            "numConceptsStudent": 1, "numConceptsClass": 1,
            "similarityThresholdUpdate": 0.1, "similarityThresholdAnalyze": 0.1
        }
    }))
    .await;

    let error = bob.next_event().await;
    assert_eq!(error["kind"], "unauthorized");

    let snapshot = registry.snapshot(&lobby("L1")).await.unwrap();
    assert_eq!(snapshot.version, 0);
    assert_eq!(snapshot.settings, LobbySettings::default());
}

#[tokio::test]
async fn test_invalid_settings_are_rejected_to_requester() {
    let (addr, registry) = start_hub(builder()).await;
    let mut alice = Client::join(&addr, "tok-a", "L1").await;
    alice.event("presence").await;

    alice
        .send(json!({
            "event": "settings_updated",
            "settings": {
                "numConceptsStudent": -1, "numConceptsClass": 15,
                "similarityThresholdUpdate": 0.75, "similarityThresholdAnalyze": 0.8
            }
        }))
        .await;

    let error = alice.next_event().await;
    assert_eq!(error["kind"], "validation_error");
    assert_eq!(registry.snapshot(&lobby("L1")).await.unwrap().version, 0);
}

#[tokio::test]
async fn test_delete_wrong_password_keeps_lobby() {
    let (addr, registry) = start_hub(builder()).await;
    let mut alice = Client::join(&addr, "tok-a", "L1").await;
    alice.event("presence").await;

    alice
        .send(json!({"event": "lobby_deleted", "password": "guess"}))
        .await;

    let error = alice.next_event().await;
    assert_eq!(error["kind"], "unauthorized");
    assert!(!registry.is_deleted(&lobby("L1")));
    assert_eq!(registry.snapshot_count(&lobby("L1")).await.unwrap(), 1);
}

#[tokio::test]
async fn test_delete_lobby_without_password_is_refused() {
    let (addr, registry) = start_hub(builder()).await;
    let mut bob = Client::join(&addr, "tok-b", "L2").await;
    bob.event("presence").await;

    bob.send(json!({"event": "lobby_deleted", "password": ""})).await;

    assert_eq!(bob.next_event().await["kind"], "unauthorized");
    assert!(!registry.is_deleted(&lobby("L2")));
}

// =========================================================================
// Session lifecycle
// =========================================================================

#[tokio::test]
async fn test_second_connection_supersedes_first() {
    let (addr, registry) = start_hub(builder()).await;
    let mut first = Client::join(&addr, "tok-a", "L1").await;
    first.event("presence").await;

    let mut second = Client::join(&addr, "tok-a", "L1").await;
    let welcome = second.event("welcome").await;
    assert_eq!(welcome["count"], 1);

    assert_eq!(first.close_code().await, 1000);
    assert_eq!(registry.snapshot_count(&lobby("L1")).await.unwrap(), 1);
}

#[tokio::test]
async fn test_disconnect_broadcasts_leave_and_presence() {
    let (addr, _registry) = start_hub(builder()).await;
    let mut alice = Client::join(&addr, "tok-a", "L1").await;
    alice.event("presence").await;
    let mut bob = Client::join(&addr, "tok-b", "L1").await;
    bob.event("presence").await;
    alice.event("presence").await;

    bob.sink.close().await.unwrap();

    let leave = alice.event("leave").await;
    assert_eq!(leave["user"], "bob");
    let presence = alice.event("presence").await;
    assert_eq!(presence["count"], 1);
}

#[tokio::test]
async fn test_shutdown_closes_sessions_going_away() {
    let hub = builder()
        .build(store(), auth())
        .await
        .expect("hub should build");
    let addr = hub.local_addr().unwrap().to_string();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(hub.run_until(async {
        let _ = stop_rx.await;
    }));

    let mut alice = Client::join(&addr, "tok-a", "L1").await;
    alice.event("presence").await;

    stop_tx.send(()).unwrap();

    assert_eq!(alice.close_code().await, 1001);
    let result = tokio::time::timeout(WAIT, running)
        .await
        .expect("hub should stop")
        .expect("hub task should not panic");
    assert!(result.is_ok());
}

// =========================================================================
// Full scenario
// =========================================================================

#[tokio::test]
async fn test_full_lobby_lifecycle() {
    let (addr, registry) = start_hub(builder()).await;

    // Three sessions join: presence 1, 2, 3.
    let mut alice = Client::join(&addr, "tok-a", "L1").await;
    assert_eq!(alice.event("presence").await["count"], 1);

    let mut bob = Client::join(&addr, "tok-b", "L1").await;
    assert_eq!(bob.event("welcome").await["count"], 2);
    assert_eq!(alice.event("join").await["user"], "bob");
    assert_eq!(alice.event("presence").await["count"], 2);
    assert_eq!(bob.event("presence").await["count"], 2);

    let carol = Client::join(&addr, "tok-c", "L1").await;
    assert_eq!(alice.event("presence").await["count"], 3);
    assert_eq!(bob.event("presence").await["count"], 3);

    // Carol stops answering pings and is dropped.
    carol.go_silent();
    assert_eq!(alice.event("leave").await["user"], "carol");
    assert_eq!(alice.event("presence").await["count"], 2);
    assert_eq!(bob.event("presence").await["count"], 2);

    // The creator raises the analyze threshold: both see version 1.
    alice
        .send(json!({
            "event": "settings_updated",
            "settings": {
                "numConceptsStudent": 10, "numConceptsClass": 15,
                "similarityThresholdUpdate": 0.75, "similarityThresholdAnalyze": 0.9
            }
        }))
        .await;
    for client in [&mut alice, &mut bob] {
        let update = client.event("settings_updated").await;
        assert_eq!(update["version"], 1);
        assert_eq!(update["originator"], "alice");
        assert_eq!(update["settings"]["similarityThresholdAnalyze"], 0.9);
    }

    // The creator deletes with the right password: both are fenced out.
    alice
        .send(json!({"event": "lobby_deleted", "password": "pw"}))
        .await;
    for client in [&mut alice, &mut bob] {
        let deleted = client.event("lobby_deleted").await;
        assert_eq!(deleted["deleted_by"], "alice");
        assert_eq!(client.close_code().await, 1001);
    }

    // A later connection attempt fails with gone.
    let mut late = Client::join(&addr, "tok-b", "L1").await;
    let error = late.next_event().await;
    assert_eq!(error["kind"], "gone");
    assert_eq!(late.close_code().await, 1001);
    assert!(registry.is_deleted(&lobby("L1")));
}
