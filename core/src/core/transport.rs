//! WebSocket Transport (spec §4.6), grounded on the teacher's
//! `status_server.rs`: an axum router bound to a loopback port, a shared
//! `State` handed to the handler, and a port-scanning bind loop. Unlike the
//! teacher's stateless HTTP POST endpoint, this is a long-lived duplex
//! connection carrying binary PTY-output frames and JSON event/command
//! frames, with single-connection-replaces-previous semantics (spec §4.6
//! "Connection lifecycle").

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{interval, timeout};

use super::delta::{DeltaEngine, Emission};
use super::events::{EventKind, Envelope};
use super::flush::Frame;
use super::router::{CommandRequest, CommandRouter};
use super::session_manager::SessionManager;

pub const PING_INTERVAL: Duration = Duration::from_secs(30);
pub const PONG_TIMEOUT: Duration = Duration::from_secs(90);
pub const WRITE_DEADLINE: Duration = Duration::from_secs(5);

/// Binary frame layout (spec §6): `4-byte length | 4-byte pane_id |
/// 4-byte sequence | 1-byte flags | bytes...`. `length` covers everything
/// after itself.
fn encode_binary_frame(frame: &Frame) -> Vec<u8> {
    let body_len = (4 + 4 + 1 + frame.bytes.len()) as u32;
    let mut buf = Vec::with_capacity(4 + body_len as usize);
    buf.extend_from_slice(&body_len.to_be_bytes());
    buf.extend_from_slice(&frame.pane_id.to_be_bytes());
    buf.extend_from_slice(&frame.sequence.to_be_bytes());
    buf.push(if frame.dropped { 0x01 } else { 0x00 });
    buf.extend_from_slice(&frame.bytes);
    buf
}

/// Client-originated control message, distinguished from a
/// [`CommandRequest`] by its `"type"` tag.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ClientMessage {
    Subscribe { pane_ids: Vec<u32> },
    Command(CommandRequest),
}

struct ConnectionSlot {
    close_tx: Option<oneshot::Sender<()>>,
}

/// Shared state handed to the axum handler, mirroring the teacher's
/// `ServerState` pattern.
struct TransportState {
    session_manager: Arc<SessionManager>,
    delta_engine: Arc<DeltaEngine>,
    router: Arc<CommandRouter>,
    current: Mutex<ConnectionSlot>,
    connection_gen: AtomicU64,
    frame_rx: Mutex<mpsc::UnboundedReceiver<Frame>>,
    emission_rx: Mutex<mpsc::UnboundedReceiver<Emission>>,
}

/// Long-lived duplex transport (spec §4.6). Only one client is ever
/// "current"; a fresh connection closes whatever held the slot before it.
pub struct Transport {
    state: Arc<TransportState>,
    port: u16,
}

impl Transport {
    /// Binds the first free port in `9900..=9999`, matching the teacher's
    /// `find_and_bind_port` scan range and loopback-only policy.
    pub async fn start(
        session_manager: Arc<SessionManager>,
        delta_engine: Arc<DeltaEngine>,
        router: Arc<CommandRouter>,
        frame_rx: mpsc::UnboundedReceiver<Frame>,
        emission_rx: mpsc::UnboundedReceiver<Emission>,
    ) -> Option<Self> {
        let (port, listener) = Self::find_and_bind_port(9900, 9999).await?;
        Some(Self::start_on(
            listener,
            session_manager,
            delta_engine,
            router,
            frame_rx,
            emission_rx,
            port,
        ))
    }

    async fn find_and_bind_port(start: u16, end: u16) -> Option<(u16, TcpListener)> {
        for port in start..=end {
            let addr = format!("127.0.0.1:{port}");
            if let Ok(listener) = TcpListener::bind(&addr).await {
                return Some((port, listener));
            }
        }
        None
    }

    fn start_on(
        listener: TcpListener,
        session_manager: Arc<SessionManager>,
        delta_engine: Arc<DeltaEngine>,
        router: Arc<CommandRouter>,
        frame_rx: mpsc::UnboundedReceiver<Frame>,
        emission_rx: mpsc::UnboundedReceiver<Emission>,
        port: u16,
    ) -> Self {
        let state = Arc::new(TransportState {
            session_manager,
            delta_engine,
            router,
            current: Mutex::new(ConnectionSlot { close_tx: None }),
            connection_gen: AtomicU64::new(0),
            frame_rx: Mutex::new(frame_rx),
            emission_rx: Mutex::new(emission_rx),
        });

        let app = build_router(state.clone());
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                log::error!("transport server stopped: {err}");
            }
        });

        Transport { state, port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

fn build_router(state: Arc<TransportState>) -> Router {
    Router::new()
        .route("/ws", get(handle_upgrade))
        .with_state(state)
}

async fn handle_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<TransportState>>,
) -> axum::response::Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<TransportState>) {
    let (close_tx, close_rx) = oneshot::channel();
    {
        let mut slot = state.current.lock().await;
        if let Some(prev) = slot.close_tx.take() {
            let _ = prev.send(());
        }
        slot.close_tx = Some(close_tx);
    }
    state.connection_gen.fetch_add(1, Ordering::SeqCst);
    state.delta_engine.invalidate_cache().await;

    if let Err(err) = run_connection(socket, state.clone(), close_rx).await {
        log::warn!("transport connection ended: {err}");
    }
}

#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    #[error("write deadline exceeded")]
    WriteTimeout,
    #[error("pong timeout exceeded")]
    PongTimeout,
    #[error("socket closed")]
    Closed,
}

/// One connection's event loop. Pulls frames/emissions from the shared
/// channels (the only consumer while it holds the slot), client messages
/// from the socket, and a keepalive ticker, all via `tokio::select!`.
async fn run_connection(
    socket: WebSocket,
    state: Arc<TransportState>,
    mut close_rx: oneshot::Receiver<()>,
) -> Result<(), ConnectionError> {
    let (mut sink, mut stream) = socket.split();
    let mut subscribed: Option<std::collections::HashSet<u32>> = None;
    let mut ping_ticker = interval(PING_INTERVAL);
    let mut last_pong = tokio::time::Instant::now();

    // Send an initial full snapshot so a fresh client never waits on the
    // next mutation (spec §4.6 "new connection gets a full snapshot").
    {
        let snapshot = state.session_manager.snapshot();
        let envelope = Envelope::new("tmux:snapshot", snapshot.sessions);
        send_text(&mut sink, &envelope).await?;
    }

    loop {
        tokio::select! {
            _ = &mut close_rx => {
                let _ = sink.close().await;
                return Ok(());
            }
            _ = ping_ticker.tick() => {
                if last_pong.elapsed() >= PONG_TIMEOUT {
                    return Err(ConnectionError::PongTimeout);
                }
                send_with_deadline(&mut sink, Message::Ping(Vec::new().into())).await?;
            }
            frame = async { state.frame_rx.lock().await.recv().await } => {
                match frame {
                    Some(frame) => {
                        let wants_frame = match subscribed.as_ref() {
                            Some(set) => set.contains(&frame.pane_id),
                            None => true,
                        };
                        if wants_frame {
                            let bytes = encode_binary_frame(&frame);
                            send_with_deadline(&mut sink, Message::Binary(bytes.into())).await?;
                        }
                    }
                    None => return Err(ConnectionError::Closed),
                }
            }
            emission = async { state.emission_rx.lock().await.recv().await } => {
                match emission {
                    Some(Emission::FullSnapshot(sessions)) => {
                        send_text(&mut sink, &Envelope::new("tmux:snapshot", sessions)).await?;
                    }
                    Some(Emission::Delta(delta)) => {
                        send_text(&mut sink, &Envelope::new("tmux:snapshot-delta", delta)).await?;
                    }
                    None => return Err(ConnectionError::Closed),
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => { last_pong = tokio::time::Instant::now(); }
                    Some(Ok(Message::Text(text))) => {
                        handle_client_text(&text, &state, &mut sink, &mut subscribed).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        log::warn!("websocket read error: {err}");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn handle_client_text(
    text: &str,
    state: &Arc<TransportState>,
    sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    subscribed: &mut Option<std::collections::HashSet<u32>>,
) -> Result<(), ConnectionError> {
    let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
    match parsed {
        Ok(ClientMessage::Subscribe { pane_ids }) => {
            *subscribed = Some(pane_ids.into_iter().collect());
        }
        Ok(ClientMessage::Command(req)) => {
            let (response, events) = state.router.handle(req).await;
            send_text(sink, &Envelope::new("tmux:command-response", response)).await?;
            for event in events {
                state.delta_engine.request(event).await;
            }
        }
        Err(err) => {
            log::warn!("malformed client message: {err}");
        }
    }
    Ok(())
}

async fn send_text(
    sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    envelope: &Envelope<impl serde::Serialize>,
) -> Result<(), ConnectionError> {
    let json = serde_json::to_string(envelope).unwrap_or_else(|_| "{}".to_string());
    send_with_deadline(sink, Message::Text(json.into())).await
}

async fn send_with_deadline(
    sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    msg: Message,
) -> Result<(), ConnectionError> {
    match timeout(WRITE_DEADLINE, sink.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(ConnectionError::Closed),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

#[allow(dead_code)]
fn unused_event_kind_marker(_: EventKind) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::PaneId;
    use crate::core::session_manager::{PaneSpawner, SessionManager};
    use crate::core::terminal::{FakeTerminal, TerminalHandle};
    use std::collections::HashMap as StdHashMap;
    use tokio_tungstenite::connect_async;

    struct TestSpawner;
    impl PaneSpawner for TestSpawner {
        fn spawn(
            &self,
            _label: &str,
            _cwd: &str,
            _env: &StdHashMap<String, String>,
            _cols: u16,
            _rows: u16,
        ) -> Result<TerminalHandle, crate::core::terminal::TerminalError> {
            Ok(FakeTerminal::new())
        }
    }

    fn test_router() -> (Arc<SessionManager>, Arc<CommandRouter>) {
        let sm = Arc::new(SessionManager::new(Arc::new(TestSpawner)));
        let router = Arc::new(CommandRouter::new(sm.clone()));
        (sm, router)
    }

    #[test]
    fn binary_frame_length_prefix_covers_body_only() {
        let frame = Frame {
            pane_id: 7,
            sequence: 2,
            dropped: false,
            bytes: vec![1, 2, 3],
        };
        let encoded = encode_binary_frame(&frame);
        let declared_len = u32::from_be_bytes(encoded[0..4].try_into().unwrap()) as usize;
        assert_eq!(declared_len, encoded.len() - 4);
    }

    #[test]
    fn binary_frame_dropped_flag_is_set() {
        let frame = Frame {
            pane_id: 1,
            sequence: 1,
            dropped: true,
            bytes: vec![],
        };
        let encoded = encode_binary_frame(&frame);
        assert_eq!(encoded[12], 0x01);
    }

    #[tokio::test]
    async fn second_connection_closes_first() {
        let (sm, router) = test_router();
        let (delta_engine, emission_rx) = DeltaEngine::new(sm.clone());
        let (_flush, frame_rx) = super::super::flush::OutputFlushManager::new(sm.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let transport = Transport::start_on(listener, sm, delta_engine, router, frame_rx, emission_rx, addr.port());
        let url = format!("ws://127.0.0.1:{}/ws", transport.port());

        let (mut first, _) = connect_async(&url).await.unwrap();
        let (mut _second, _) = connect_async(&url).await.unwrap();

        // The first connection's slot was replaced; reading from it should
        // observe a close frame or stream end shortly after.
        let msg = tokio::time::timeout(Duration::from_secs(2), first.next()).await;
        assert!(msg.is_ok());
    }

    #[allow(dead_code)]
    fn touch_pane_id(id: PaneId) -> u32 {
        id.0
    }
}
