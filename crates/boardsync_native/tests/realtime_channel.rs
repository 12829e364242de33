//! RealtimeConnector against an in-process WebSocket server.

use std::time::Duration;

use boardsync_core::{ChannelConnector, ChannelEvent, ChannelSession};
use boardsync_native::{RealtimeConnector, ReconnectConfig};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use url::Url;

const WAIT: Duration = Duration::from_secs(5);

/// What the fake server should do on each accepted connection.
#[derive(Clone, Copy)]
enum Behavior {
    /// Acknowledge every command.
    Ack,
    /// Reject `connect`.
    RejectConnect,
    /// Acknowledge, then close the first connection after the first subscribe.
    DropAfterSubscribe,
}

struct Server {
    url: Url,
    /// (connection number, frame text) for every frame the client sent.
    frames: mpsc::UnboundedReceiver<(usize, Value)>,
    /// Frames to push to the latest connection.
    outgoing: mpsc::UnboundedSender<String>,
}

async fn start_server(behavior: Behavior) -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = Url::parse(&format!("ws://{}/connection/websocket", listener.local_addr().unwrap())).unwrap();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let mut conn = 0usize;
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            conn += 1;
            let mut ws = accept_async(stream).await.unwrap();
            loop {
                tokio::select! {
                    msg = ws.next() => {
                        let Some(Ok(Message::Text(text))) = msg else { break };
                        let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                        frames_tx.send((conn, frame.clone())).unwrap();
                        let Some(id) = frame.get("id").and_then(Value::as_u64) else { continue };

                        let reply = if frame.get("connect").is_some() {
                            match behavior {
                                Behavior::RejectConnect => {
                                    json!({"id": id, "error": {"code": 109, "message": "token expired"}})
                                }
                                _ => json!({"id": id, "connect": {"client": "c-1"}}),
                            }
                        } else {
                            json!({"id": id, "subscribe": {}})
                        };
                        ws.send(Message::Text(reply.to_string().into())).await.unwrap();

                        if matches!(behavior, Behavior::DropAfterSubscribe)
                            && conn == 1
                            && frame.get("subscribe").is_some()
                        {
                            let _ = ws.close(None).await;
                            break;
                        }
                    }
                    out = out_rx.recv() => {
                        let Some(out) = out else { return };
                        ws.send(Message::Text(out.into())).await.unwrap();
                    }
                }
            }
        }
    });

    Server {
        url,
        frames: frames_rx,
        outgoing: out_tx,
    }
}

async fn next_frame(server: &mut Server) -> (usize, Value) {
    tokio::time::timeout(WAIT, server.frames.recv())
        .await
        .expect("server saw no frame")
        .unwrap()
}

async fn next_event(session: &mut Box<dyn ChannelSession>) -> Option<ChannelEvent> {
    tokio::time::timeout(WAIT, session.next_event())
        .await
        .expect("no channel event")
}

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        enabled: true,
        max_attempts: 3,
        base_delay_secs: 0,
        max_delay_secs: 0,
    }
}

#[tokio::test]
async fn test_connect_sends_token_and_waits_for_reply() {
    let mut server = start_server(Behavior::Ack).await;
    let connector = RealtimeConnector::new(server.url.clone(), ReconnectConfig::default());

    let mut session = connector.connect("conn-tok").await.unwrap();
    let (conn, frame) = next_frame(&mut server).await;
    assert_eq!(conn, 1);
    assert_eq!(frame["connect"]["token"], "conn-tok");

    session.subscribe("whiteboard:b-1", "sub-tok").await.unwrap();
    let (_, frame) = next_frame(&mut server).await;
    assert_eq!(frame["subscribe"]["channel"], "whiteboard:b-1");
    assert_eq!(frame["subscribe"]["token"], "sub-tok");

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_rejected_connect_is_an_error() {
    let server = start_server(Behavior::RejectConnect).await;
    let connector = RealtimeConnector::new(server.url.clone(), ReconnectConfig::default());

    let err = connector.connect("stale").await.err().expect("connect should fail");
    assert!(err.to_string().contains("token expired"), "{err}");
}

#[tokio::test]
async fn test_publications_for_subscribed_channel_are_delivered() {
    let mut server = start_server(Behavior::Ack).await;
    let connector = RealtimeConnector::new(server.url.clone(), ReconnectConfig::default());
    let mut session = connector.connect("conn-tok").await.unwrap();
    session.subscribe("whiteboard:b-1", "sub-tok").await.unwrap();
    next_frame(&mut server).await;
    next_frame(&mut server).await;

    // Other channels are filtered, batched frames are split.
    let other = json!({"push": {"channel": "whiteboard:other", "pub": {"data": {"n": 0}}}});
    let ours = json!({"push": {"channel": "whiteboard:b-1", "pub": {"data": {"n": 1}}}});
    server
        .outgoing
        .send(format!("{other}\n{ours}"))
        .unwrap();

    assert_eq!(
        next_event(&mut session).await,
        Some(ChannelEvent::Publication(json!({"n": 1})))
    );
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_ping_is_answered() {
    let mut server = start_server(Behavior::Ack).await;
    let connector = RealtimeConnector::new(server.url.clone(), ReconnectConfig::default());
    let mut session = connector.connect("conn-tok").await.unwrap();
    next_frame(&mut server).await;

    server.outgoing.send("{}".into()).unwrap();
    let (_, pong) = next_frame(&mut server).await;
    assert_eq!(pong, json!({}));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_restores_subscription() {
    let mut server = start_server(Behavior::DropAfterSubscribe).await;
    let connector = RealtimeConnector::new(server.url.clone(), fast_reconnect());
    let mut session = connector.connect("conn-tok").await.unwrap();
    session.subscribe("whiteboard:b-1", "sub-tok").await.unwrap();

    assert!(matches!(
        next_event(&mut session).await,
        Some(ChannelEvent::Disconnected { .. })
    ));
    assert_eq!(next_event(&mut session).await, Some(ChannelEvent::Connected));

    let mut second: Vec<Value> = Vec::new();
    while second.len() < 2 {
        let (conn, frame) = next_frame(&mut server).await;
        if conn == 2 {
            second.push(frame);
        }
    }
    assert_eq!(second[0]["connect"]["token"], "conn-tok");
    assert_eq!(second[1]["subscribe"]["channel"], "whiteboard:b-1");
    assert_eq!(second[1]["subscribe"]["token"], "sub-tok");

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_event_stream_ends_when_reconnect_disabled() {
    let server = start_server(Behavior::DropAfterSubscribe).await;
    let connector = RealtimeConnector::new(server.url.clone(), ReconnectConfig::disabled());
    let mut session = connector.connect("conn-tok").await.unwrap();
    session.subscribe("whiteboard:b-1", "sub-tok").await.unwrap();

    assert!(matches!(
        next_event(&mut session).await,
        Some(ChannelEvent::Disconnected { .. })
    ));
    assert_eq!(next_event(&mut session).await, None);
}
