//! Signaling transport: the client end of the relay WebSocket.
//!
//! [`Transport::connect`] spawns a supervisor task that owns the socket and reconnects
//! with capped exponential backoff. Envelopes are delivered in order on the event
//! channel. Sending while disconnected drops the envelope: the relay re-sends a full
//! snapshot after every reconnect, so nothing needs replaying.
//!
//! While connected the client pings the relay every heartbeat interval. Any inbound
//! frame (pongs included) counts as life; a socket silent past the heartbeat timeout is
//! treated as dropped and reconnected, so a half-open connection cannot stall the session.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use huddle_common::protocol::{close_code, Envelope};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::Result;

/// What the transport reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The socket is open. `attempt` counts the failed tries that preceded it.
    Connected { attempt: u32 },
    Envelope(Envelope),
    /// The socket dropped; a reconnect is scheduled after `retry_in`.
    Disconnected { retry_in: Duration },
    /// No further reconnects will happen.
    Terminated(TerminalReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalReason {
    /// [`Transport::close`] was called.
    Closed,
    /// The relay closed with a terminal code (bad token, kicked, locked, full).
    Rejected { code: u16, reason: String },
}

impl TerminalReason {
    /// The relay refused our identity; the caller must re-authenticate.
    pub fn needs_reauth(&self) -> bool {
        matches!(self, Self::Rejected { code, .. } if *code == close_code::UNAUTHORIZED)
    }
}

/// Reconnect and liveness timings for one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

/// `min(base × 2^(attempt−1), cap)`; attempt numbering starts at 1.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(20);
    base.saturating_mul(1u32 << exp).min(cap)
}

type Outgoing = Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>;

/// Handle to a running signaling connection.
pub struct Transport {
    outgoing: Outgoing,
    cancel: CancellationToken,
    finished: CancellationToken,
}

enum Outcome {
    Cancelled,
    Rejected { code: u16, reason: String },
    Dropped { connected: bool, error: String },
}

impl Transport {
    /// Start connecting to `room_id`. Returns immediately; progress arrives as events.
    pub fn connect(
        config: &ClientConfig,
        room_id: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        let url = config.signaling_url(room_id)?;
        Ok(Self::connect_url(url.into(), config.timing()))
    }

    pub fn connect_url(
        url: String,
        timing: Timing,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let outgoing: Outgoing = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();

        let task_outgoing = Arc::clone(&outgoing);
        let task_cancel = cancel.clone();
        let task_finished = finished.clone();

        tokio::spawn(async move {
            let mut attempt = 0u32;
            let reason = loop {
                match run_once(&url, attempt, timing, &task_outgoing, &events_tx, &task_cancel).await {
                    Outcome::Cancelled => break TerminalReason::Closed,
                    Outcome::Rejected { code, reason } => {
                        warn!(code, %reason, "Signaling: relay rejected the connection");
                        break TerminalReason::Rejected { code, reason };
                    }
                    Outcome::Dropped { connected, error } => {
                        if connected {
                            attempt = 0;
                        }
                        attempt += 1;
                        let delay = backoff_delay(attempt, timing.reconnect_base, timing.reconnect_cap);
                        warn!("Signaling: disconnected ({error}), reconnecting in {delay:?} (attempt {attempt})");
                        let _ = events_tx.send(TransportEvent::Disconnected { retry_in: delay });
                        tokio::select! {
                            _ = sleep(delay) => {}
                            _ = task_cancel.cancelled() => break TerminalReason::Closed,
                        }
                    }
                }
            };
            let _ = events_tx.send(TransportEvent::Terminated(reason));
            task_finished.cancel();
        });

        (
            Self {
                outgoing,
                cancel,
                finished,
            },
            events_rx,
        )
    }

    /// Queue an envelope for the relay. Returns false (and drops it) while disconnected.
    pub fn send(&self, envelope: &Envelope) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let text = match envelope.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!("Signaling: failed to encode {}: {e}", envelope.kind());
                return false;
            }
        };
        let Ok(guard) = self.outgoing.lock() else {
            return false;
        };
        match guard.as_ref() {
            Some(tx) => tx.send(Message::Text(text.into())).is_ok(),
            None => {
                debug!(kind = envelope.kind(), "Signaling: dropped envelope while disconnected");
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.outgoing.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    /// Close deliberately. Cancels any pending reconnect; safe to call more than once.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the supervisor task has exited.
    pub async fn closed(&self) {
        self.finished.cancelled().await;
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn set_outgoing(outgoing: &Outgoing, value: Option<mpsc::UnboundedSender<Message>>) {
    if let Ok(mut guard) = outgoing.lock() {
        *guard = value;
    }
}

async fn run_once(
    url: &str,
    attempt: u32,
    timing: Timing,
    outgoing: &Outgoing,
    events: &mpsc::UnboundedSender<TransportEvent>,
    cancel: &CancellationToken,
) -> Outcome {
    let connected = tokio::select! {
        result = connect_async(url) => result,
        _ = cancel.cancelled() => return Outcome::Cancelled,
    };
    let ws = match connected {
        Ok((ws, _)) => ws,
        Err(e) => {
            return Outcome::Dropped {
                connected: false,
                error: e.to_string(),
            }
        }
    };
    let (mut sink, mut stream) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    set_outgoing(outgoing, Some(tx));
    info!(attempt, "Signaling: connected");
    let _ = events.send(TransportEvent::Connected { attempt });

    let mut heartbeat = interval_at(Instant::now() + timing.heartbeat_interval, timing.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_heard = Instant::now();

    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "leaving".into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                break Outcome::Cancelled;
            }
            Some(msg) = rx.recv() => {
                if let Err(e) = sink.send(msg).await {
                    break Outcome::Dropped { connected: true, error: e.to_string() };
                }
            }
            _ = heartbeat.tick() => {
                if last_heard.elapsed() >= timing.heartbeat_timeout {
                    break Outcome::Dropped { connected: true, error: "heartbeat timed out".into() };
                }
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    break Outcome::Dropped { connected: true, error: e.to_string() };
                }
            }
            frame = stream.next() => {
                last_heard = Instant::now();
                match frame {
                    Some(Ok(Message::Text(text))) => match Envelope::decode(text.as_str()) {
                        Ok(Envelope::Unknown) => debug!("Signaling: ignoring unknown envelope type"),
                        Ok(envelope) => {
                            let _ = events.send(TransportEvent::Envelope(envelope));
                        }
                        Err(e) => warn!("Signaling: malformed envelope: {e}"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                            .unwrap_or((1005, String::new()));
                        if close_code::is_terminal(code) {
                            break Outcome::Rejected { code, reason };
                        }
                        break Outcome::Dropped { connected: true, error: format!("closed by relay ({code})") };
                    }
                    // Pongs and pings; tungstenite answers pings itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Outcome::Dropped { connected: true, error: e.to_string() },
                    None => break Outcome::Dropped { connected: true, error: "stream ended".into() },
                }
            }
        }
    };

    set_outgoing(outgoing, None);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[test]
    fn backoff_doubles_then_caps() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(10);
        let delays: Vec<u64> = (1..=6).map(|a| backoff_delay(a, base, cap).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(backoff_delay(500, base, cap), cap);
    }

    #[test]
    fn only_unauthorized_needs_reauth() {
        let reauth = TerminalReason::Rejected {
            code: close_code::UNAUTHORIZED,
            reason: String::new(),
        };
        let kicked = TerminalReason::Rejected {
            code: close_code::KICKED,
            reason: String::new(),
        };
        assert!(reauth.needs_reauth());
        assert!(!kicked.needs_reauth());
        assert!(!TerminalReason::Closed.needs_reauth());
    }

    fn timing(heartbeat_interval: Duration, heartbeat_timeout: Duration) -> Timing {
        Timing {
            reconnect_base: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(10),
            heartbeat_interval,
            heartbeat_timeout,
        }
    }

    /// A WebSocket server that accepts one client. When `answer` is false it never reads
    /// from the socket, so pings go unanswered.
    async fn server(answer: bool) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            if answer {
                while let Some(Ok(_)) = ws.next().await {}
            } else {
                std::future::pending::<()>().await;
            }
            drop(ws);
        });
        format!("ws://{addr}/rooms/x/ws")
    }

    #[tokio::test]
    async fn silent_relay_is_dropped_after_heartbeat_timeout() {
        let url = server(false).await;
        let (transport, mut events) = Transport::connect_url(
            url,
            timing(Duration::from_millis(50), Duration::from_millis(200)),
        );

        let started = timeout(Duration::from_secs(5), async {
            loop {
                if let Some(TransportEvent::Connected { .. }) = events.recv().await {
                    return Instant::now();
                }
            }
        })
        .await
        .unwrap();
        let event = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert!(matches!(event, Some(TransportEvent::Disconnected { .. })), "{event:?}");
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(!transport.is_connected());
        transport.close();
    }

    #[tokio::test]
    async fn answered_heartbeats_keep_the_socket_open() {
        let url = server(true).await;
        let (transport, mut events) = Transport::connect_url(
            url,
            timing(Duration::from_millis(50), Duration::from_millis(200)),
        );
        let connected = timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert!(matches!(connected, Some(TransportEvent::Connected { attempt: 0 })));

        sleep(Duration::from_millis(800)).await;
        assert!(events.try_recv().is_err());
        assert!(transport.is_connected());
        transport.close();
    }

    /// A port that refuses connections.
    fn dead_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("ws://127.0.0.1:{port}/rooms/x/ws")
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_back_off_and_close_cancels_retry() {
        let (transport, mut events) = Transport::connect_url(
            dead_url(),
            timing(Duration::from_secs(10), Duration::from_secs(30)),
        );

        let mut delays = Vec::new();
        while delays.len() < 3 {
            match events.recv().await {
                Some(TransportEvent::Disconnected { retry_in }) => delays.push(retry_in.as_secs()),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(delays, vec![1, 2, 4]);
        assert!(!transport.is_connected());
        assert!(!transport.send(&Envelope::notice(
            huddle_common::protocol::NoticeCode::NotHost,
            "dropped"
        )));

        transport.close();
        loop {
            match events.recv().await {
                Some(TransportEvent::Terminated(reason)) => {
                    assert_eq!(reason, TerminalReason::Closed);
                    break;
                }
                Some(TransportEvent::Disconnected { .. }) => continue,
                other => panic!("unexpected {other:?}"),
            }
        }
        transport.closed().await;
    }
}
