//! Connection lifecycle - open, heartbeat, reconnect, close

use super::reconnect::{CloseReason, ReconnectPolicy, RetryDecision};
use super::router::MessageRouter;
use super::state::{ConnectionStatus, Failure, SessionSnapshot};
use super::timer::TimerSyncEngine;
use super::{ClientError, Credentials, Role};
use crate::api::SESSION_COOKIE;
use crate::config::{Config, ConnectionConfig};
use crate::protocol::{self, OutboundMessage};
use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Close code sent when no status was carried in the close frame
const CLOSE_NO_STATUS: u16 = 1005;
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Requests from a [`Connection`] handle to its task
enum Command {
    Send {
        message: OutboundMessage,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    /// Manual reconnect: reset the attempt counter and reopen now
    Reconnect,
    /// Intentional disconnect
    Close,
}

/// Handle to one live connection
///
/// Cheap to clone. All clones talk to the same connection task; once that
/// task ends every operation reports [`ClientError::NotConnected`].
#[derive(Clone)]
pub struct Connection {
    id: Uuid,
    role: Role,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionSnapshot>,
}

impl Connection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Current snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.borrow().status
    }

    /// Receiver that wakes on every snapshot change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    /// Send a frame; fails unless the connection is `connected` or `registered`
    pub async fn send(&self, message: OutboundMessage) -> Result<(), ClientError> {
        if !self.status().is_open() {
            return Err(ClientError::NotConnected);
        }

        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Send { message, reply })
            .map_err(|_| ClientError::NotConnected)?;

        response.await.map_err(|_| ClientError::NotConnected)?
    }

    /// Reset the retry budget and reconnect immediately
    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.commands
            .send(Command::Reconnect)
            .map_err(|_| ClientError::NotConnected)
    }

    /// Wait until the snapshot satisfies `predicate`
    pub async fn wait_for<F>(
        &self,
        timeout: Duration,
        what: &'static str,
        predicate: F,
    ) -> Result<SessionSnapshot, ClientError>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut state = self.state.clone();
        let snapshot = tokio::time::timeout(timeout, state.wait_for(predicate))
            .await
            .map_err(|_| ClientError::Timeout(what))?
            .map_err(|_| ClientError::NotConnected)?
            .clone();
        Ok(snapshot)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("status", &self.status())
            .finish()
    }
}

struct Running {
    connection: Connection,
    task: JoinHandle<()>,
}

/// Owns the single live connection of one logical client
pub struct ConnectionManager {
    config: Config,
    current: Option<Running>,
}

impl ConnectionManager {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            current: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The live connection, if any
    pub fn current(&self) -> Option<&Connection> {
        self.current.as_ref().map(|running| &running.connection)
    }

    /// Open a channel for `target` (session id, or pairing code for displays).
    ///
    /// Any connection this manager already owns is closed, and its task has
    /// exited, before the new socket is attempted.
    pub async fn open(
        &mut self,
        target: &str,
        role: Role,
        credentials: Credentials,
    ) -> Result<Connection, ClientError> {
        self.close().await;

        let url = channel_url(
            &self.config.server.base_url,
            role,
            target,
            credentials.token.as_deref(),
            self.config.connection.token_in_query,
        )?;
        // Surface a bad address or token now rather than from inside the task
        build_request(&url, credentials.token.as_deref())?;

        let id = Uuid::new_v4();
        let mut initial = SessionSnapshot::new(role);
        if role == Role::Display {
            initial.roomcast.code = Some(target.to_string());
        }

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(initial);

        let task = ConnectionTask {
            id,
            url,
            token: credentials.token,
            connection: self.config.connection.clone(),
            tick_interval: self.config.timer.tick_interval(),
            policy: ReconnectPolicy::from_config(&self.config.reconnect),
            router: MessageRouter::new(TimerSyncEngine::from_config(&self.config.timer)),
            commands: command_rx,
            state: state_tx,
        };

        tracing::info!("Opening {} connection {} to {}", role, id, target);
        let handle = tokio::spawn(task.run());

        let connection = Connection {
            id,
            role,
            commands,
            state: state_rx,
        };
        self.current = Some(Running {
            connection: connection.clone(),
            task: handle,
        });

        Ok(connection)
    }

    /// Intentionally close the live connection and wait for its task to exit
    pub async fn close(&mut self) {
        let Some(running) = self.current.take() else {
            return;
        };

        let _ = running.connection.commands.send(Command::Close);

        let mut task = running.task;
        match tokio::time::timeout(self.config.connection.shutdown_timeout(), &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(join_err)) => {
                tracing::warn!("Connection task terminated with join error: {}", join_err);
            }
            Err(_) => {
                tracing::warn!("Connection task did not exit in time; aborting");
                task.abort();
                if let Err(join_err) = task.await {
                    tracing::debug!("Connection task aborted: {}", join_err);
                }
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(running) = self.current.take() {
            running.task.abort();
        }
    }
}

/// Derive the push channel address from the HTTP base address
pub fn channel_url(
    base_url: &str,
    role: Role,
    target: &str,
    token: Option<&str>,
    token_in_query: bool,
) -> Result<String, ClientError> {
    let invalid = || ClientError::InvalidBaseUrl(base_url.to_string());

    let mut url = reqwest::Url::parse(base_url).map_err(|_| invalid())?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(invalid()),
    };
    url.set_scheme(scheme).map_err(|_| invalid())?;

    let scope = match role {
        Role::Participant => "session",
        Role::Instructor => "instructor",
        Role::Display => "roomcast",
    };
    url.path_segments_mut()
        .map_err(|_| invalid())?
        .pop_if_empty()
        .extend(["ws", scope, target]);

    if token_in_query {
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("token", token);
        }
    }

    Ok(url.to_string())
}

fn build_request(url: &str, token: Option<&str>) -> Result<Request, ClientError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ClientError::WebSocket(Box::new(e)))?;

    if let Some(token) = token {
        let cookie = HeaderValue::from_str(&format!("{}={}", SESSION_COOKIE, token))
            .map_err(|_| ClientError::InvalidBaseUrl(url.to_string()))?;
        request.headers_mut().insert(COOKIE, cookie);
    }

    Ok(request)
}

/// How one socket session ended
enum SessionEnd {
    /// The client asked to close
    Shutdown,
    /// Manual reconnect while the socket was open
    Restart,
    Lost(CloseReason),
}

/// What interrupted a wait between sockets
enum Wake {
    Elapsed,
    Reconnect,
    Shutdown,
}

/// The task behind a [`Connection`]; sole owner of the socket and snapshot
struct ConnectionTask {
    id: Uuid,
    url: String,
    token: Option<String>,
    connection: ConnectionConfig,
    tick_interval: Duration,
    policy: ReconnectPolicy,
    router: MessageRouter,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<SessionSnapshot>,
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            self.publish(
                self.current()
                    .with_status(ConnectionStatus::Connecting)
                    .with_attempt(attempt),
            );

            let end = match self.connect().await {
                Ok(ws) => {
                    attempt = 0;
                    tracing::info!("Connection {} open", self.id);
                    self.publish(
                        self.current()
                            .with_status(ConnectionStatus::Connected)
                            .with_attempt(0),
                    );
                    self.drive(ws).await
                }
                Err(reason) => SessionEnd::Lost(reason),
            };

            let reason = match end {
                SessionEnd::Shutdown => break,
                SessionEnd::Restart => {
                    attempt = 0;
                    continue;
                }
                SessionEnd::Lost(reason) => reason,
            };

            let wake = match self.policy.should_retry(attempt, reason) {
                RetryDecision::Retry { delay } => {
                    tracing::warn!(
                        "Connection {} lost (code {}), retry {} in {:?}",
                        self.id,
                        reason.code,
                        attempt + 1,
                        delay
                    );
                    attempt += 1;
                    self.publish(
                        self.current()
                            .with_status(ConnectionStatus::Disconnected)
                            .with_attempt(attempt),
                    );
                    self.idle(Some(delay)).await
                }
                RetryDecision::Reauthenticate => {
                    tracing::error!(
                        "Connection {} refused (code {}), credential must be renewed",
                        self.id,
                        reason.code
                    );
                    self.publish(self.current().with_failure(Failure::Reauthenticate));
                    self.idle(None).await
                }
                RetryDecision::GiveUp => {
                    tracing::error!(
                        "Connection {} gave up after {} attempts",
                        self.id,
                        attempt
                    );
                    self.publish(
                        self.current()
                            .with_failure(Failure::CouldNotReconnect { attempts: attempt }),
                    );
                    self.idle(None).await
                }
            };

            match wake {
                Wake::Elapsed => {}
                Wake::Reconnect => {
                    tracing::info!("Manual reconnect for connection {}", self.id);
                    attempt = 0;
                }
                Wake::Shutdown => break,
            }
        }

        self.publish(self.current().with_status(ConnectionStatus::Disconnected));
        tracing::debug!("Connection {} task finished", self.id);
    }

    fn current(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    fn publish(&self, next: SessionSnapshot) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    async fn connect(&self) -> Result<WsStream, CloseReason> {
        let request = build_request(&self.url, self.token.as_deref()).map_err(|e| {
            tracing::error!("Cannot build handshake request: {}", e);
            CloseReason::rejected()
        })?;

        match tokio_tungstenite::connect_async(request).await {
            Ok((ws, _response)) => Ok(ws),
            Err(WsError::Http(response))
                if response.status() == StatusCode::UNAUTHORIZED
                    || response.status() == StatusCode::FORBIDDEN =>
            {
                tracing::warn!("Handshake rejected with HTTP {}", response.status());
                Err(CloseReason::rejected())
            }
            Err(e) => {
                tracing::warn!("Connect failed: {}", e);
                Err(CloseReason::abnormal())
            }
        }
    }

    /// Pump one open socket until it closes
    async fn drive(&mut self, ws: WsStream) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();

        // interval_at panics on a zero period
        let heartbeat_period = self.connection.heartbeat_interval().max(MIN_PERIOD);
        let mut heartbeat = interval_at(Instant::now() + heartbeat_period, heartbeat_period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let tick_period = self.tick_interval.max(MIN_PERIOD);
        let mut ticker = interval_at(Instant::now() + tick_period, tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let liveness_timeout = self.connection.liveness_timeout();
        let mut last_inbound = Instant::now();

        if let Some(end) = self.reclaim_group(&mut sink).await {
            return end;
        }

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_inbound = Instant::now();
                        self.handle_text(text.as_str());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map_or(CLOSE_NO_STATUS, |f| u16::from(f.code));
                        tracing::info!("Connection {} closed by server (code {})", self.id, code);
                        return SessionEnd::Lost(CloseReason::clean(code));
                    }
                    Some(Ok(_)) => {
                        last_inbound = Instant::now();
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Connection {} read error: {}", self.id, e);
                        return SessionEnd::Lost(CloseReason::abnormal());
                    }
                    None => return SessionEnd::Lost(CloseReason::abnormal()),
                },

                command = self.commands.recv() => match command {
                    Some(Command::Send { message, reply }) => {
                        let result = if self.current().status.is_open() {
                            write_frame(&mut sink, &message).await
                        } else {
                            Err(ClientError::NotConnected)
                        };
                        let broken = matches!(result, Err(ClientError::WebSocket(_)));
                        let _ = reply.send(result);
                        if broken {
                            return SessionEnd::Lost(CloseReason::abnormal());
                        }
                    }
                    Some(Command::Reconnect) => {
                        close_socket(&mut sink).await;
                        return SessionEnd::Restart;
                    }
                    Some(Command::Close) | None => {
                        close_socket(&mut sink).await;
                        return SessionEnd::Shutdown;
                    }
                },

                _ = heartbeat.tick() => {
                    if self.current().status.is_open() {
                        if let Err(e) = write_frame(&mut sink, &OutboundMessage::Ping).await {
                            tracing::warn!("Connection {} heartbeat failed: {}", self.id, e);
                            return SessionEnd::Lost(CloseReason::abnormal());
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.publish(self.router.tick(&self.current(), Utc::now()));
                    if last_inbound.elapsed() > liveness_timeout {
                        tracing::warn!(
                            "Connection {} silent for {:?}, treating as dropped",
                            self.id,
                            liveness_timeout
                        );
                        return SessionEnd::Lost(CloseReason::abnormal());
                    }
                }
            }
        }
    }

    /// A display that held a group before the drop claims it again
    async fn reclaim_group(&self, sink: &mut WsSink) -> Option<SessionEnd> {
        let snapshot = self.current();
        if snapshot.role != Role::Display {
            return None;
        }
        let (Some(code), Some(group_name)) =
            (snapshot.roomcast.code, snapshot.roomcast.registered_group)
        else {
            return None;
        };

        tracing::info!("Re-registering display for group {}", group_name);
        let message = OutboundMessage::RegisterRoomcast { code, group_name };
        match write_frame(sink, &message).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!("Re-registration failed: {}", e);
                Some(SessionEnd::Lost(CloseReason::abnormal()))
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match protocol::decode(text) {
            Ok(message) => {
                let next = self.router.route(&self.current(), message, Utc::now());
                self.publish(next);
            }
            Err(e) => {
                tracing::warn!("Dropping inbound frame on {}: {}", self.id, e);
            }
        }
    }

    /// Wait between sockets while still answering commands; `None` waits
    /// until a command arrives
    async fn idle(&mut self, delay: Option<Duration>) -> Wake {
        let sleep = async {
            match delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Wake::Elapsed,
                command = self.commands.recv() => match command {
                    Some(Command::Send { reply, .. }) => {
                        let _ = reply.send(Err(ClientError::NotConnected));
                    }
                    Some(Command::Reconnect) => return Wake::Reconnect,
                    Some(Command::Close) | None => return Wake::Shutdown,
                },
            }
        }
    }
}

async fn write_frame(sink: &mut WsSink, message: &OutboundMessage) -> Result<(), ClientError> {
    let text = protocol::encode(message)?;
    tracing::debug!("-> {}", message.kind());
    sink.send(Message::text(text))
        .await
        .map_err(|e| ClientError::WebSocket(Box::new(e)))
}

async fn close_socket(sink: &mut WsSink) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "client closing".into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        tracing::debug!("Close frame not delivered: {}", e);
    }
    let _ = sink.close().await;
}
