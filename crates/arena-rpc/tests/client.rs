//! Integration tests for the RPC client against a real WebSocket server.
//!
//! Each test starts a scripted `tokio-tungstenite` server on a random port
//! and drives the client through its public API only.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use arena_rpc::prelude::*;
use arena_rpc::{SessionError, TransportError};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Server harness
// =========================================================================

type ServerWs = WebSocketStream<TcpStream>;

const TOKEN: &str = "123e4567-e89b-12d3-a456-426614174000";
const WAIT: Duration = Duration::from_secs(5);

/// Starts a server that runs `handler(connection_index, ws)` for every
/// accepted connection. Returns `host:port`.
async fn serve<F, Fut>(handler: F) -> String
where
    F: Fn(usize, ServerWs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let host = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let mut index = 0;
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            tokio::spawn(handler(index, ws));
            index += 1;
        }
    });
    host
}

/// Reads the next JSON text frame. `None` on close.
async fn next_request(ws: &mut ServerWs) -> Option<Value> {
    while let Some(Ok(msg)) = ws.next().await {
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
    None
}

async fn send_json(ws: &mut ServerWs, value: Value) {
    let _ = ws.send(Message::Text(value.to_string().into())).await;
}

fn response(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "result": result, "id": id })
}

/// Answers every request with its own method and params.
async fn echo(mut ws: ServerWs) {
    while let Some(req) = next_request(&mut ws).await {
        let result = json!({ "method": req["method"], "params": req["params"] });
        send_json(&mut ws, response(&req["id"], result)).await;
    }
}

/// Accepts TCP and drops each socket before the WebSocket handshake, so
/// every attempt fails. Returns `host:port` and the number of accepts.
async fn dropping_host() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let host = listener.local_addr().unwrap().to_string();
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepts);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });
    (host, accepts)
}

/// Accepts TCP and holds each socket open without ever answering the
/// handshake.
async fn stalling_host() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let host = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    host
}

// =========================================================================
// Client helpers
// =========================================================================

fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        base_delay_ms: 20,
        max_delay_ms: 100,
        max_attempts,
        jitter: 0.0,
    }
}

fn client_for(host: &str) -> RpcClient {
    RpcClient::builder()
        .host(host)
        .development(true)
        .reconnect(fast_reconnect(3))
        .build()
}

async fn connected_with_session(host: &str) -> RpcClient {
    let client = client_for(host);
    client.connect().await.unwrap();
    client
        .set_session_from_join(&json!({ "session_id": TOKEN }))
        .unwrap();
    client
}

/// A cloneable summary of a [`ClientEvent`].
#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Connected,
    Disconnected,
    Reconnecting(u32),
    Message(Value),
    Error(ErrorKind),
}

impl From<&ClientEvent> for Seen {
    fn from(event: &ClientEvent) -> Self {
        match event {
            ClientEvent::Connected => Seen::Connected,
            ClientEvent::Disconnected { .. } => Seen::Disconnected,
            ClientEvent::Reconnecting { attempt, .. } => Seen::Reconnecting(*attempt),
            ClientEvent::Message(Outcome::Result(value)) => Seen::Message(value.clone()),
            ClientEvent::Message(Outcome::Error(err)) => {
                Seen::Message(json!({ "error": err.code }))
            }
            ClientEvent::Error(err) => Seen::Error(err.kind()),
        }
    }
}

/// Subscribes to every event kind and forwards summaries to a channel.
fn record(client: &RpcClient) -> mpsc::UnboundedReceiver<Seen> {
    let (tx, rx) = mpsc::unbounded_channel();
    for kind in [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::Reconnecting,
        EventKind::Message,
        EventKind::Error,
    ] {
        let tx = tx.clone();
        let _ = client.on(kind, move |event| {
            let _ = tx.send(Seen::from(event));
        });
    }
    rx
}

/// Waits for the first event matching `pred`, skipping others.
async fn expect(rx: &mut mpsc::UnboundedReceiver<Seen>, pred: impl Fn(&Seen) -> bool) -> Seen {
    loop {
        let seen = tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if pred(&seen) {
            return seen;
        }
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Vec<Seen> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    seen
}

// =========================================================================
// Correlation
// =========================================================================

#[tokio::test]
async fn test_call_reverse_order_responses_match_by_id() {
    let host = serve(|_, mut ws| async move {
        let mut requests = Vec::new();
        for _ in 0..3 {
            requests.push(next_request(&mut ws).await.unwrap());
        }
        for req in requests.iter().rev() {
            let result = json!({ "method": req["method"], "session": req["params"]["session_id"] });
            send_json(&mut ws, response(&req["id"], result)).await;
        }
        echo(ws).await;
    })
    .await;
    let client = connected_with_session(&host).await;

    let (moved, attacked, ended) = tokio::join!(
        client.call("move", Some(json!({ "direction": "north" })), None),
        client.call("attack", Some(json!({ "target_id": "g1", "weapon_id": "axe" })), None),
        client.call("endTurn", None, None),
    );

    assert_eq!(moved.unwrap()["method"], "move");
    assert_eq!(attacked.unwrap()["method"], "attack");
    let ended = ended.unwrap();
    assert_eq!(ended["method"], "endTurn");
    assert_eq!(ended["session"], TOKEN);
}

#[tokio::test]
async fn test_call_attaches_session_to_params() {
    let host = serve(|_, ws| echo(ws)).await;
    let client = connected_with_session(&host).await;

    let result = client
        .call("move", Some(json!({ "direction": "east" })), None)
        .await
        .unwrap();
    assert_eq!(
        result["params"],
        json!({ "direction": "east", "session_id": TOKEN })
    );
}

#[tokio::test]
async fn test_call_server_error_object_rejects_call() {
    let host = serve(|_, mut ws| async move {
        while let Some(req) = next_request(&mut ws).await {
            let reply = json!({
                "jsonrpc": "2.0",
                "error": { "code": -32601, "message": "Method not found" },
                "id": req["id"],
            });
            send_json(&mut ws, reply).await;
        }
    })
    .await;
    let client = connected_with_session(&host).await;

    match client.call("dance", None, None).await {
        Err(RpcError::Server { code, message, .. }) => {
            assert_eq!(code, -32601);
            assert_eq!(message, "Method not found");
        }
        other => panic!("expected server error, got {other:?}"),
    }
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_call_timeout_rejects_only_that_call() {
    let host = serve(|_, mut ws| async move {
        // Swallow the first request, echo the rest.
        let _ = next_request(&mut ws).await;
        echo(ws).await;
    })
    .await;
    let client = connected_with_session(&host).await;
    let mut events = record(&client);

    let err = client
        .call("getGameState", None, Some(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    expect(&mut events, |s| *s == Seen::Error(ErrorKind::Timeout)).await;

    assert!(client.is_connected());
    assert!(client.call("endTurn", None, None).await.is_ok());
}

// =========================================================================
// Inbound frames
// =========================================================================

#[tokio::test]
async fn test_notification_emits_message_event() {
    let host = serve(|_, mut ws| async move {
        // Wait for the client's first call so the test has subscribed.
        let req = next_request(&mut ws).await.unwrap();
        send_json(
            &mut ws,
            json!({ "jsonrpc": "2.0", "result": { "tick": 7 }, "id": null }),
        )
        .await;
        send_json(&mut ws, response(&req["id"], json!("ok"))).await;
        echo(ws).await;
    })
    .await;
    let client = connected_with_session(&host).await;
    let mut events = record(&client);

    client.call("getGameState", None, None).await.unwrap();
    let seen = expect(&mut events, |s| matches!(s, Seen::Message(_))).await;
    assert_eq!(seen, Seen::Message(json!({ "tick": 7 })));
}

#[tokio::test]
async fn test_malformed_frames_emit_validation_errors_and_connection_survives() {
    let host = serve(|_, mut ws| async move {
        let req = next_request(&mut ws).await.unwrap();
        let _ = ws.send(Message::Text("not json".into())).await;
        send_json(&mut ws, json!({ "jsonrpc": "1.0", "result": 1, "id": req["id"] })).await;
        send_json(&mut ws, json!({ "jsonrpc": "2.0", "result": 1, "error": {"code": 1, "message": "x"}, "id": req["id"] })).await;
        send_json(&mut ws, json!({ "jsonrpc": "2.0", "result": 1 })).await;
        send_json(&mut ws, response(&req["id"], json!("finally"))).await;
        echo(ws).await;
    })
    .await;
    let client = connected_with_session(&host).await;
    let mut events = record(&client);

    let result = client.call("getGameState", None, None).await.unwrap();
    assert_eq!(result, json!("finally"));

    let errors: Vec<Seen> = drain(&mut events)
        .into_iter()
        .filter(|s| matches!(s, Seen::Error(_)))
        .collect();
    assert_eq!(errors, vec![Seen::Error(ErrorKind::Validation); 4]);
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_unknown_response_id_emits_no_matching_request() {
    let host = serve(|_, mut ws| async move {
        let req = next_request(&mut ws).await.unwrap();
        send_json(&mut ws, response(&json!(999), json!("forged"))).await;
        send_json(&mut ws, response(&req["id"], json!("real"))).await;
        echo(ws).await;
    })
    .await;
    let client = connected_with_session(&host).await;
    let mut events = record(&client);

    let result = client.call("getGameState", None, None).await.unwrap();
    assert_eq!(result, json!("real"));
    expect(&mut events, |s| *s == Seen::Error(ErrorKind::NoMatchingRequest)).await;
}

// =========================================================================
// Reconnection
// =========================================================================

#[tokio::test]
async fn test_server_close_rejects_pending_and_reconnects() {
    let host = serve(|index, mut ws| async move {
        if index == 0 {
            let _ = next_request(&mut ws).await;
            let _ = ws.close(None).await;
        } else {
            echo(ws).await;
        }
    })
    .await;
    let client = connected_with_session(&host).await;
    let mut events = record(&client);

    let err = client.call("getGameState", None, None).await.unwrap_err();
    assert!(matches!(err, RpcError::ConnectionClosed(_)), "got {err:?}");

    expect(&mut events, |s| *s == Seen::Disconnected).await;
    expect(&mut events, |s| *s == Seen::Reconnecting(1)).await;
    expect(&mut events, |s| *s == Seen::Connected).await;

    // Transient drops keep the session.
    assert!(client.session().is_some());
    let result = client.call("endTurn", None, None).await.unwrap();
    assert_eq!(result["method"], "endTurn");
}

#[tokio::test]
async fn test_connect_exhaustion_emits_once_and_stops_retrying() {
    let (host, accepts) = dropping_host().await;
    let client = RpcClient::builder()
        .host(&host)
        .development(true)
        .reconnect(fast_reconnect(2))
        .build();
    let mut events = record(&client);

    let err = client.connect().await.unwrap_err();
    assert!(
        matches!(err, RpcError::MaxReconnectAttemptsExceeded { attempts: 2 }),
        "got {err:?}"
    );

    // Give any stray retry a chance to show up.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let seen = drain(&mut events);

    let retries: Vec<&Seen> = seen
        .iter()
        .filter(|s| matches!(s, Seen::Reconnecting(_)))
        .collect();
    assert_eq!(retries, [&Seen::Reconnecting(1), &Seen::Reconnecting(2)]);

    let exhausted = seen
        .iter()
        .filter(|s| **s == Seen::Error(ErrorKind::MaxReconnectAttemptsExceeded))
        .count();
    assert_eq!(exhausted, 1);

    let failed_attempts = seen
        .iter()
        .filter(|s| **s == Seen::Error(ErrorKind::Connection))
        .count();
    assert_eq!(failed_attempts, 3);
    assert_eq!(accepts.load(Ordering::SeqCst), 3);

    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_clears_session_and_allows_reconnect() {
    let host = serve(|_, ws| echo(ws)).await;
    let client = connected_with_session(&host).await;
    let mut events = record(&client);

    client.disconnect("user logged out").await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.session().is_none());
    expect(&mut events, |s| *s == Seen::Disconnected).await;

    assert!(matches!(
        client.call("endTurn", None, None).await,
        Err(RpcError::NotConnected)
    ));

    // No automatic reconnect after a caller disconnect.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!drain(&mut events).contains(&Seen::Connected));

    client.connect().await.unwrap();
    assert!(client.is_connected());
}

// =========================================================================
// Origin
// =========================================================================

#[tokio::test]
async fn test_origin_rejected_in_production_never_opens_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let host = listener.local_addr().unwrap().to_string();
    let client = RpcClient::builder()
        .host(&host)
        .development(false)
        .build();
    let mut events = record(&client);

    let err = client.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OriginRejected);
    assert!(err.is_security_relevant());
    expect(&mut events, |s| *s == Seen::Error(ErrorKind::OriginRejected)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let accepted = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
    assert!(accepted.is_err(), "no socket should have been opened");
}

#[tokio::test]
async fn test_origin_allow_list_permits_production_connect() {
    let host = serve(|_, ws| echo(ws)).await;
    let client = RpcClient::builder()
        .host(&host)
        .development(false)
        .allow_origin("127.0.0.1")
        .build();

    client.connect().await.unwrap();
    assert!(client.is_connected());
}

// =========================================================================
// Session
// =========================================================================

#[tokio::test]
async fn test_call_without_session_is_rejected_locally() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let host = serve(move |_, mut ws| {
        let seen_tx = seen_tx.clone();
        async move {
            while let Some(req) = next_request(&mut ws).await {
                let _ = seen_tx.send(req);
            }
        }
    })
    .await;
    let client = client_for(&host);
    client.connect().await.unwrap();

    let err = client.call("move", None, None).await.unwrap_err();
    assert!(matches!(err, RpcError::Session(SessionError::NoSession)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(seen_rx.try_recv().is_err(), "nothing should reach the wire");
}

#[tokio::test]
async fn test_expired_session_is_cleared_and_call_never_sent() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let host = serve(move |_, mut ws| {
        let seen_tx = seen_tx.clone();
        async move {
            while let Some(req) = next_request(&mut ws).await {
                let _ = seen_tx.send(req);
            }
        }
    })
    .await;
    let client = RpcClient::builder()
        .host(&host)
        .development(true)
        .session(SessionConfig { expiry_minutes: 0 })
        .build();
    client.connect().await.unwrap();
    client
        .set_session_from_join(&json!({ "session_id": TOKEN }))
        .unwrap();

    let err = client.call("endTurn", None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionExpired);
    assert!(client.session().is_none());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(seen_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_join_and_leave_game_manage_session() {
    let host = serve(|_, mut ws| async move {
        while let Some(req) = next_request(&mut ws).await {
            let result = match req["method"].as_str() {
                Some("joinGame") => json!({
                    "session_id": TOKEN,
                    "player": { "name": req["params"]["player_name"] },
                    "joined_with": req["params"]["session_id"],
                }),
                _ => json!({ "session": req["params"]["session_id"] }),
            };
            send_json(&mut ws, response(&req["id"], result)).await;
        }
    })
    .await;
    let client = client_for(&host);
    client.connect().await.unwrap();
    let game = client.game();

    let joined = game.join_game("Ayla").await.unwrap();
    assert_eq!(joined["player"]["name"], "Ayla");
    assert_eq!(joined["joined_with"], Value::Null);
    assert_eq!(client.session().unwrap().token, TOKEN);

    let moved = game.move_player(Direction::North).await.unwrap();
    assert_eq!(moved["session"], TOKEN);

    game.leave_game().await.unwrap();
    assert!(client.session().is_none());
    assert!(matches!(
        game.end_turn().await,
        Err(RpcError::Session(SessionError::NoSession))
    ));
}

// =========================================================================
// Destroy
// =========================================================================

#[tokio::test]
async fn test_destroy_rejects_pending_call_and_closes_socket() {
    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    let host = serve(move |_, mut ws| {
        let server_tx = server_tx.clone();
        async move {
            // Never answer; report the request and then the close.
            let req = next_request(&mut ws).await;
            let _ = server_tx.send(req.is_some());
            let after = next_request(&mut ws).await;
            let _ = server_tx.send(after.is_none());
        }
    })
    .await;
    let client = Arc::new(connected_with_session(&host).await);

    let pending = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.call("getGameState", None, None).await }
    });
    assert_eq!(tokio::time::timeout(WAIT, server_rx.recv()).await.unwrap(), Some(true));

    client.destroy();
    client.destroy();

    let result = tokio::time::timeout(WAIT, pending).await.unwrap().unwrap();
    assert!(
        matches!(result, Err(RpcError::ConnectionClosed(_) | RpcError::Destroyed)),
        "got {result:?}"
    );
    assert_eq!(tokio::time::timeout(WAIT, server_rx.recv()).await.unwrap(), Some(true));

    assert_eq!(client.state(), ConnectionState::Destroyed);
    assert!(client.session().is_none());
    assert!(matches!(
        client.call("endTurn", None, None).await,
        Err(RpcError::Destroyed)
    ));
}

fn slow_retry_client(host: &str) -> RpcClient {
    RpcClient::builder()
        .host(host)
        .development(true)
        .reconnect(ReconnectConfig {
            base_delay_ms: 200,
            jitter: 0.0,
            ..Default::default()
        })
        .build()
}

#[tokio::test]
async fn test_destroy_cancels_pending_reconnect() {
    let (host, accepts) = dropping_host().await;
    let client = slow_retry_client(&host);
    let mut events = record(&client);

    let connecting = client.connect();
    tokio::pin!(connecting);
    tokio::select! {
        result = &mut connecting => panic!("connect settled while retrying: {result:?}"),
        _ = expect(&mut events, |s| *s == Seen::Reconnecting(1)) => {}
    }
    let before = accepts.load(Ordering::SeqCst);
    assert_eq!(before, 1);

    client.destroy();
    let result = tokio::time::timeout(WAIT, &mut connecting).await.unwrap();
    assert!(matches!(result, Err(RpcError::Destroyed)), "got {result:?}");

    // Well past the 200 ms backoff: the scheduled retry never fires.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), before);
    assert_eq!(client.state(), ConnectionState::Destroyed);
}

#[tokio::test]
async fn test_disconnect_cancels_pending_reconnect() {
    let (host, accepts) = dropping_host().await;
    let client = slow_retry_client(&host);
    let mut events = record(&client);

    let connecting = client.connect();
    tokio::pin!(connecting);
    tokio::select! {
        result = &mut connecting => panic!("connect settled while retrying: {result:?}"),
        _ = expect(&mut events, |s| *s == Seen::Reconnecting(1)) => {}
    }
    let before = accepts.load(Ordering::SeqCst);
    assert_eq!(before, 1);

    client.disconnect("bye").await;
    let result = tokio::time::timeout(WAIT, &mut connecting).await.unwrap();
    assert!(
        matches!(&result, Err(RpcError::ConnectionClosed(reason)) if reason == "bye"),
        "got {result:?}"
    );

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), before);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(
        !drain(&mut events).contains(&Seen::Reconnecting(2)),
        "no retry after disconnect"
    );
}

#[tokio::test]
async fn test_connect_timeout_on_stalled_handshake_schedules_retry() {
    let host = stalling_host().await;
    let client = RpcClient::builder()
        .host(&host)
        .development(true)
        .connect_timeout(Duration::from_millis(100))
        .reconnect(ReconnectConfig {
            base_delay_ms: 1_000,
            jitter: 0.0,
            ..Default::default()
        })
        .build();

    let (tx, mut timeouts) = mpsc::unbounded_channel();
    let _sub = client.on(EventKind::Error, move |event| {
        if let ClientEvent::Error(RpcError::Transport(TransportError::Timeout(after))) = event {
            let _ = tx.send(*after);
        }
    });
    let mut events = record(&client);

    let connecting = client.connect();
    tokio::pin!(connecting);
    tokio::select! {
        result = &mut connecting => panic!("connect settled on a stalled handshake: {result:?}"),
        _ = expect(&mut events, |s| *s == Seen::Reconnecting(1)) => {}
    }

    let after = timeouts.try_recv().expect("timeout error emitted before the retry");
    assert_eq!(after, Duration::from_millis(100));
    assert_eq!(client.state(), ConnectionState::Reconnecting);

    client.destroy();
    let result = tokio::time::timeout(WAIT, &mut connecting).await.unwrap();
    assert!(matches!(result, Err(RpcError::Destroyed)), "got {result:?}");
}
