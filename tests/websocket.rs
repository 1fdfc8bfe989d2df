//! End-to-end tests over real WebSocket connections

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use roomchat::{
    serve, serve_with_shutdown, AppState, Authenticator, HandleValidator, Ledger, MemoryLedger,
    MessageType, Registry, RegistrySettings, TokenTable, WireMessage,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    ledger: Arc<MemoryLedger>,
}

async fn start(
    settings: RegistrySettings,
    auth: Arc<dyn Authenticator>,
    default_room: Option<&str>,
) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    let state = AppState {
        registry: Registry::spawn(settings, ledger.clone()),
        auth,
        outbound_queue: 64,
        default_room: default_room.map(str::to_string),
    };
    tokio::spawn(serve(listener, state));

    TestServer { addr, ledger }
}

async fn start_default() -> TestServer {
    start(RegistrySettings::default(), Arc::new(HandleValidator), None).await
}

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/{query}")).await.unwrap();
    ws
}

/// Connect and consume the greeting
async fn login(addr: SocketAddr, handle: &str) -> Client {
    let mut ws = connect(addr, &format!("?token={handle}")).await;
    assert_eq!(recv(&mut ws).await.content, format!("Connected as {handle}."));
    ws
}

async fn recv(ws: &mut Client) -> WireMessage {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended")
            .expect("websocket error");
        if let Message::Text(text) = next {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// True once the server has closed the connection
async fn closed(ws: &mut Client) -> bool {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next()).await {
            Err(_) => return false,
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
            Ok(Some(Ok(_))) => continue,
        }
    }
}

async fn send(ws: &mut Client, json: &str) {
    ws.send(Message::Text(json.to_string())).await.unwrap();
}

async fn join(ws: &mut Client, room: &str) {
    send(
        ws,
        &format!(r#"{{"type":"command","content":"join","room":"{room}"}}"#),
    )
    .await;
    assert_eq!(
        recv(ws).await.content,
        format!("You have joined the room: {room}")
    );
}

#[tokio::test]
async fn test_malformed_frame_gets_diagnostic() {
    let server = start_default().await;
    let mut alice = login(server.addr, "alice").await;

    send(&mut alice, "not json").await;

    let reply = recv(&mut alice).await;
    assert_eq!(reply.kind, MessageType::System);
    assert_eq!(reply.sender, "system");
    assert_eq!(
        reply.content,
        "Invalid message format. Ensure your message is valid JSON."
    );
}

#[tokio::test]
async fn test_regular_before_join() {
    let server = start_default().await;
    let mut alice = login(server.addr, "alice").await;

    send(&mut alice, r#"{"type":"regular","content":"hi"}"#).await;

    assert_eq!(
        recv(&mut alice).await.content,
        "You must join a room first. Use /join <roomName>"
    );
}

#[tokio::test]
async fn test_room_conversation() {
    let server = start_default().await;
    let mut alice = login(server.addr, "alice").await;
    let mut bob = login(server.addr, "bob").await;

    join(&mut alice, "general").await;
    join(&mut bob, "general").await;
    assert_eq!(recv(&mut alice).await.content, "bob has joined the room.");

    send(&mut bob, r#"{"type":"regular","content":"hello"}"#).await;

    for ws in [&mut alice, &mut bob] {
        let message = recv(ws).await;
        assert_eq!(message.kind, MessageType::Regular);
        assert_eq!(message.sender, "bob");
        assert_eq!(message.content, "hello");
        assert_eq!(message.room.as_ref().map(|r| r.name.as_str()), Some("general"));
        assert!(message.timestamp.is_some());
    }

    // Frames from one session are handled in order, so the save is done
    send(&mut bob, r#"{"type":"command","content":"users"}"#).await;
    assert_eq!(recv(&mut bob).await.content, "alice\nbob");

    let room_id = room_id(&server, "general").await;
    let stored = server.ledger.messages(room_id);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].sender, "bob");
    assert_eq!(stored[0].content, "hello");
}

async fn room_id(server: &TestServer, name: &str) -> i64 {
    server
        .ledger
        .find_room(name)
        .await
        .unwrap()
        .expect("room recorded")
        .id
}

#[tokio::test]
async fn test_direct_message() {
    let server = start_default().await;
    let mut alice = login(server.addr, "alice").await;
    let mut bob = login(server.addr, "bob").await;

    send(
        &mut alice,
        r#"{"type":"direct","target":"bob","content":"psst"}"#,
    )
    .await;
    let dm = recv(&mut bob).await;
    assert_eq!(dm.kind, MessageType::Direct);
    assert_eq!(dm.sender, "alice");
    assert_eq!(dm.target.as_deref(), Some("bob"));
    assert_eq!(dm.content, "psst");

    send(
        &mut alice,
        r#"{"type":"direct","target":"carol","content":"psst"}"#,
    )
    .await;
    assert_eq!(recv(&mut alice).await.content, "User carol not found.");
}

#[tokio::test]
async fn test_history_replayed_to_late_joiner() {
    let server = start_default().await;
    let mut alice = login(server.addr, "alice").await;
    join(&mut alice, "general").await;
    send(&mut alice, r#"{"type":"regular","content":"first"}"#).await;
    assert_eq!(recv(&mut alice).await.content, "first");

    let mut bob = login(server.addr, "bob").await;
    join(&mut bob, "general").await;

    let replayed = recv(&mut bob).await;
    assert_eq!(replayed.kind, MessageType::Regular);
    assert_eq!(replayed.sender, "alice");
    assert_eq!(replayed.content, "first");
}

#[tokio::test]
async fn test_handle_already_taken() {
    let server = start_default().await;
    let _alice = login(server.addr, "alice").await;

    let mut imposter = connect(server.addr, "?token=alice").await;
    assert_eq!(
        recv(&mut imposter).await.content,
        "Handle 'alice' is already taken."
    );
    assert!(closed(&mut imposter).await);
}

#[tokio::test]
async fn test_handle_reusable_after_disconnect() {
    let server = start_default().await;
    let mut alice = login(server.addr, "alice").await;
    let mut bob = login(server.addr, "bob").await;
    join(&mut alice, "general").await;
    join(&mut bob, "general").await;
    assert_eq!(recv(&mut alice).await.content, "bob has joined the room.");

    bob.close(None).await.unwrap();
    assert_eq!(recv(&mut alice).await.content, "bob has left the room.");

    let _bob = login(server.addr, "bob").await;
}

#[tokio::test]
async fn test_missing_token_rejected() {
    let server = start_default().await;
    let mut ws = connect(server.addr, "").await;

    assert_eq!(
        recv(&mut ws).await.content,
        "Authentication failed: missing token"
    );
    assert!(closed(&mut ws).await);
}

#[tokio::test]
async fn test_token_table_authentication() {
    let tokens = HashMap::from([("s3cret".to_string(), "alice@example.com".to_string())]);
    let server = start(
        RegistrySettings::default(),
        Arc::new(TokenTable::new(tokens)),
        None,
    )
    .await;

    let mut alice = connect(server.addr, "?token=s3cret").await;
    assert_eq!(
        recv(&mut alice).await.content,
        "Connected as alice@example.com."
    );

    let mut stranger = connect(server.addr, "?token=guess").await;
    assert_eq!(
        recv(&mut stranger).await.content,
        "Authentication failed: invalid token"
    );
    assert!(closed(&mut stranger).await);
}

#[tokio::test]
async fn test_default_room_joined_on_connect() {
    let server = start(
        RegistrySettings::default(),
        Arc::new(HandleValidator),
        Some("lobby"),
    )
    .await;

    let mut alice = login(server.addr, "alice").await;
    assert_eq!(
        recv(&mut alice).await.content,
        "You have joined the room: lobby"
    );

    send(&mut alice, r#"{"type":"regular","content":"here"}"#).await;
    let echo = recv(&mut alice).await;
    assert_eq!(echo.room.map(|r| r.name), Some("lobby".to_string()));
}

#[tokio::test]
async fn test_percent_encoded_token_is_decoded() {
    let server = start_default().await;

    let mut jorg = connect(server.addr, "?token=j%C3%B6rg").await;
    assert_eq!(recv(&mut jorg).await.content, "Connected as jörg.");

    let mut alice = login(server.addr, "alice").await;
    send(
        &mut alice,
        r#"{"type":"direct","target":"jörg","content":"hej"}"#,
    )
    .await;
    assert_eq!(recv(&mut jorg).await.content, "hej");
}

#[tokio::test]
async fn test_shutdown_notice_reaches_clients() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState {
        registry: Registry::spawn(RegistrySettings::default(), Arc::new(MemoryLedger::new())),
        auth: Arc::new(HandleValidator),
        outbound_queue: 64,
        default_room: None,
    };
    let (trigger, signal) = oneshot::channel::<()>();
    let server = tokio::spawn(serve_with_shutdown(listener, state, async {
        let _ = signal.await;
    }));

    let mut alice = login(addr, "alice").await;
    let mut bob = login(addr, "bob").await;
    join(&mut alice, "general").await;

    trigger.send(()).unwrap();

    for ws in [&mut alice, &mut bob] {
        let notice = recv(ws).await;
        assert_eq!(notice.kind, MessageType::System);
        assert_eq!(notice.content, "Server is shutting down.");
        assert!(closed(ws).await);
    }

    tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("server did not stop")
        .unwrap();
}
