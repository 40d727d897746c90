//! The signaling endpoint over a real loopback socket.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use huddle_common::auth::issue_token;
use huddle_common::config::AppConfig;
use huddle_common::protocol::Envelope;
use huddle_relay::{build_router, RelayState};
use tokio::net::TcpStream;
use tokio::time::{interval, sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

const SECRET: &str = "signaling-test-secret";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn relay(idle_timeout_ms: u64) -> (String, RelayState) {
    let mut config = AppConfig::with_secret(SECRET).unwrap();
    config.relay.idle_timeout_ms = idle_timeout_ms;
    config.relay.reconnect_grace_ms = 5_000;
    let state = RelayState::new(config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state.clone());
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (addr.to_string(), state)
}

async fn connect(addr: &str, name: &str) -> Socket {
    let token = issue_token(Uuid::new_v4(), name, SECRET, 300).unwrap();
    let (mut ws, _) = connect_async(format!("ws://{addr}/rooms/r1/ws?token={token}"))
        .await
        .unwrap();
    let first = timeout(Duration::from_secs(5), ws.next()).await.unwrap();
    let Some(Ok(Message::Text(text))) = first else {
        panic!("expected snapshot, got {first:?}");
    };
    assert!(matches!(Envelope::decode(text.as_str()).unwrap(), Envelope::RoomState(_)));
    ws
}

/// Resolves once the relay has closed the socket.
async fn closed_by_relay(ws: &mut Socket) {
    while let Some(Ok(_)) = ws.next().await {}
}

#[tokio::test]
async fn silent_socket_is_dropped_but_keeps_its_seat() {
    let (addr, state) = relay(200).await;
    let mut ws = connect(&addr, "Ada").await;

    let started = Instant::now();
    timeout(Duration::from_secs(5), closed_by_relay(&mut ws)).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(200));

    // Dropped, not left: the seat waits out the reconnect grace.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(state.rooms.participant_count("r1").await, 1);
}

#[tokio::test]
async fn pinging_socket_stays_open() {
    let (addr, state) = relay(200).await;
    let mut ws = connect(&addr, "Ada").await;

    let mut ticks = interval(Duration::from_millis(50));
    let deadline = sleep(Duration::from_millis(800));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = ticks.tick() => ws.send(Message::Ping(Default::default())).await.unwrap(),
            frame = ws.next() => assert!(matches!(frame, Some(Ok(_))), "socket closed: {frame:?}"),
        }
    }
    assert_eq!(state.rooms.participant_count("r1").await, 1);
}
