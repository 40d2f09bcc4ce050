//! Session state machine.
//!
//! One [`Session`] is one end-to-end connection with the translation
//! service: dial the WebSocket with credential headers, exchange the
//! `StartSession` / `SessionStarted` handshake, then run three tasks over
//! the split socket: the paced sender, the receiver/reassembler, and the
//! heartbeat. At most one session is active at a time; the supervisor owns
//! that invariant.

pub mod heartbeat;
pub mod receiver;
pub mod sender;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use futures_util::stream::SplitSink;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audio::{CaptureBridge, PlayerHandle};
use crate::config::Config;
use crate::engine::SubscriberSet;
use crate::error::{ConfigError, EngineError};
use crate::health::{HealthMonitor, SessionState};
use crate::protocol::{codec, EventType, TranslateRequest};

pub use heartbeat::PingState;
pub use sender::SEND_QUEUE_CAPACITY;

/// Per-attempt WebSocket open timeout.
const OPEN_TIMEOUT: Duration = Duration::from_secs(20);

/// Dial attempts per session open (delays 2 s, 4 s between them).
const DIAL_ATTEMPTS: u32 = 3;

/// The service streams whole TTS sentences; allow very large frames.
const MAX_WS_PAYLOAD: usize = 1 << 30;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Process-wide monotone counter tagging session log lines.
static SESSION_SERIAL: AtomicU64 = AtomicU64::new(0);

/// One live connection to the translation service.
pub struct Session {
    pub id: String,
    pub serial: u64,
    active: Arc<AtomicBool>,
    sink: Arc<tokio::sync::Mutex<WsSink>>,
    tasks: Vec<JoinHandle<()>>,
    started_at: Instant,
}

impl Session {
    /// Open a session: dial, handshake, install the send queue (draining the
    /// capture pre-buffer), and spawn the worker tasks.
    pub async fn open(
        config: &Config,
        bridge: &CaptureBridge,
        player: PlayerHandle,
        subscribers: Arc<SubscriberSet>,
        health: Arc<HealthMonitor>,
    ) -> Result<Session, EngineError> {
        let serial = SESSION_SERIAL.fetch_add(1, Ordering::SeqCst) + 1;
        health.set_session_state(SessionState::Connecting);

        let mut ws = match dial(config, serial).await {
            Ok(ws) => ws,
            Err(e) => {
                health.set_session_state(SessionState::Error);
                return Err(e);
            }
        };

        let session_id = Uuid::new_v4().to_string();
        let start = TranslateRequest::start_session(&session_id, config);
        if let Err(e) = ws.send(Message::binary(codec::encode(&start))).await {
            health.set_session_state(SessionState::Error);
            return Err(e.into());
        }

        // The first application frame must be SessionStarted.
        let first = match read_first_response(&mut ws).await {
            Ok(response) => response,
            Err(e) => {
                let _ = ws.close(None).await;
                health.set_session_state(SessionState::Error);
                return Err(e);
            }
        };
        if first.event() != EventType::SessionStarted {
            error!(
                session = serial,
                "session start rejected: {:?} {}",
                first.event(),
                first.message()
            );
            let _ = ws.close(None).await;
            health.set_session_state(SessionState::Error);
            return Err(EngineError::SessionSetup(first.event()));
        }
        info!(session = serial, id = %session_id, "session started");

        let (sink, stream) = ws.split();
        let sink = Arc::new(tokio::sync::Mutex::new(sink));
        let active = Arc::new(AtomicBool::new(true));
        let ping = Arc::new(PingState::new());

        // Installing the queue drains the pre-buffer first, so leading audio
        // goes out ahead of anything captured from here on.
        let (queue_tx, queue_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        bridge.attach_queue(queue_tx);

        let tasks = vec![
            tokio::spawn(sender::run_sender(
                queue_rx,
                Arc::clone(&sink),
                session_id.clone(),
                serial,
                Arc::clone(&active),
                Arc::clone(&health),
            )),
            tokio::spawn(receiver::run_receiver(
                stream,
                receiver::ReceiverContext {
                    serial,
                    player,
                    subscribers,
                    health: Arc::clone(&health),
                    active: Arc::clone(&active),
                    ping: Arc::clone(&ping),
                },
            )),
            tokio::spawn(heartbeat::run_heartbeat(
                Arc::clone(&sink),
                ping,
                Arc::clone(&active),
                serial,
            )),
        ];
        health.set_active_tasks(tasks.len());
        health.set_session_state(SessionState::Connected);

        Ok(Session {
            id: session_id,
            serial,
            active,
            sink,
            tasks,
            started_at: Instant::now(),
        })
    }

    /// Whether the session is still serving traffic.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) && self.tasks.iter().any(|task| !task.is_finished())
    }

    /// Drop finished task handles; returns the number still running.
    pub fn prune_tasks(&mut self) -> usize {
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.len()
    }

    /// Tear the session down: stop the tasks, discard queued audio, close
    /// the socket, and clear the playback buffer.
    pub async fn close(self, bridge: &CaptureBridge, player: &PlayerHandle, health: &HealthMonitor) {
        health.set_session_state(SessionState::Disconnecting);
        self.active.store(false, Ordering::SeqCst);

        // Detaching reverts capture to the pre-buffer; the queued chunks die
        // with the sender task below.
        bridge.detach_queue();
        for task in &self.tasks {
            task.abort();
        }

        if let Err(e) = self.sink.lock().await.close().await {
            debug!(session = self.serial, "socket close: {e}");
        }

        player.clear();
        health.set_active_tasks(0);
        health.set_send_queue_depth(0);
        health.set_session_state(SessionState::Idle);
        info!(
            session = self.serial,
            uptime_s = self.started_at.elapsed().as_secs(),
            "session closed"
        );
    }
}

/// Dial the service with up to three attempts (2 s / 4 s between retries).
async fn dial(config: &Config, serial: u64) -> Result<WsStream, EngineError> {
    let connect_id = Uuid::new_v4().to_string();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match dial_once(config, &connect_id).await {
            Ok((ws, response)) => {
                match response
                    .headers()
                    .get("X-Tt-Logid")
                    .and_then(|v| v.to_str().ok())
                {
                    Some(logid) => info!(session = serial, logid, "websocket connected"),
                    None => info!(session = serial, "websocket connected"),
                }
                return Ok(ws);
            }
            Err(e) if attempt < DIAL_ATTEMPTS => {
                let delay = Duration::from_secs((1u64 << attempt).min(8));
                warn!(
                    session = serial,
                    "connect failed (attempt {attempt}), retrying in {}s: {e}",
                    delay.as_secs()
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn dial_once(
    config: &Config,
    connect_id: &str,
) -> Result<(WsStream, tokio_tungstenite::tungstenite::handshake::client::Response), EngineError> {
    let mut request = config.api.ws_url.as_str().into_client_request()?;
    let headers = request.headers_mut();
    headers.insert("X-Api-App-Key", header_value(&config.api.app_key)?);
    headers.insert("X-Api-Access-Key", header_value(&config.api.access_key)?);
    headers.insert("X-Api-Resource-Id", header_value(&config.api.resource_id)?);
    headers.insert("X-Api-Connect-Id", header_value(connect_id)?);

    // No library-level keepalive: the heartbeat task pings explicitly.
    let ws_config = WebSocketConfig::default()
        .max_message_size(Some(MAX_WS_PAYLOAD))
        .max_frame_size(Some(MAX_WS_PAYLOAD));

    match timeout(
        OPEN_TIMEOUT,
        connect_async_with_config(request, Some(ws_config), false),
    )
    .await
    {
        Ok(Ok((ws, response))) => Ok((ws, response)),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(EngineError::ConnectTimeout(OPEN_TIMEOUT.as_secs())),
    }
}

fn header_value(value: &str) -> Result<HeaderValue, EngineError> {
    HeaderValue::from_str(value).map_err(|_| ConfigError::InvalidHeaderValue.into())
}

/// Read frames until the first binary one and decode it; control frames the
/// library surfaces during setup are skipped.
async fn read_first_response(
    ws: &mut WsStream,
) -> Result<crate::protocol::TranslateResponse, EngineError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Binary(data))) => return Ok(codec::decode(&data)?),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(other)) => {
                debug!("ignoring non-binary frame during session setup: {other:?}");
            }
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(EngineError::Transport(
                    tokio_tungstenite::tungstenite::Error::ConnectionClosed,
                ))
            }
        }
    }
}
