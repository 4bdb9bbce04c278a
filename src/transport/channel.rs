//! Single WebSocket channel and its inbound loop.
//!
//! # Event Loop
//!
//! A successful [`Channel::establish`] splits the WebSocket stream:
//!
//! - the write half stays in the channel behind an async mutex, so
//!   concurrent [`Channel::send`] calls are written one frame at a time
//! - the read half moves into one spawned tokio task that pushes
//!   [`ChannelEvent`]s onto a bounded queue and classifies the close frame
//!
//! # Termination
//!
//! | Cause | State | Lifecycle | Event |
//! |-------|-------|-----------|-------|
//! | `close()` + peer echo | `ClosedLocally` | `ClosedLocally` | none |
//! | peer close 1000/1001/1006 | `ClosedByPeer` | `ClosedByPeer` | `PeerClosed` |
//! | peer close, other code | `ClosedByPeer` | `ClosedByPeer` | none |
//! | transport error | `ClosedAbnormally` | `ClosedAbnormally` | `Error` |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ChannelId;
use crate::options::ChannelOptions;
use crate::protocol::{ChannelEvent, CloseInfo, CloseVerdict, classify};

use super::handshake::{WsStream, build_request, dial, identification_header, millis};
use super::lifecycle::{Lifecycle, LifecycleSignal, Termination};
use super::state::{AtomicState, ChannelState};

// ============================================================================
// Constants
// ============================================================================

/// Reason sent with the local normal-closure frame.
const CLOSE_REASON: &str = "bye";

// ============================================================================
// Types
// ============================================================================

type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Receiving end of a channel's event queue.
pub type EventReceiver = mpsc::Receiver<ChannelEvent>;

/// One read off the transport, reduced to what the loop acts on.
enum Inbound {
    Data(Bytes),
    Close(CloseInfo),
    Failure(WsError),
}

/// Connection parameters recorded by a successful establish.
#[derive(Debug, Clone)]
struct Session {
    target: Url,
    identification: String,
}

// ============================================================================
// ConnectingGuard
// ============================================================================

/// Returns the channel to `Idle` if establish stops before reaching `Open`,
/// including when its future is dropped.
struct ConnectingGuard<'a> {
    state: &'a AtomicState,
    armed: bool,
}

impl<'a> ConnectingGuard<'a> {
    fn new(state: &'a AtomicState) -> Self {
        Self { state, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state
                .transition(ChannelState::Connecting, ChannelState::Idle);
        }
    }
}

// ============================================================================
// Inner
// ============================================================================

/// State shared between the channel handles and the inbound task.
struct Inner {
    id: ChannelId,
    options: ChannelOptions,
    state: AtomicState,
    /// Write half; `Some` only while the transport is bound.
    writer: AsyncMutex<Option<WsWriter>>,
    events: mpsc::Sender<ChannelEvent>,
    lifecycle: LifecycleSignal,
    session: Mutex<Option<Session>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

// ============================================================================
// Channel
// ============================================================================

/// Client side of one WebSocket connection to a game server.
///
/// Single-use: once established and terminated, a channel cannot be
/// reopened. Build a new one instead.
///
/// # Thread Safety
///
/// `Channel` is `Send + Sync` and cheap to clone; clones share the same
/// connection.
///
/// # Example
///
/// ```ignore
/// let (channel, mut events) = Channel::new(ChannelOptions::default());
/// let lifecycle = channel.establish(&url, &spec).await?;
///
/// channel.send(r#"{"type":"ready"}"#).await?;
///
/// while let Some(event) = events.recv().await {
///     match event {
///         ChannelEvent::Message(payload) => handle(payload),
///         ChannelEvent::PeerClosed(info) => break,
///         ChannelEvent::Error { message } => break,
///     }
/// }
/// ```
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state.load())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Channel - Constructor
// ============================================================================

impl Channel {
    /// Creates an idle channel and the receiver of its events.
    #[must_use]
    pub fn new(options: ChannelOptions) -> (Self, EventReceiver) {
        let (events, event_rx) = mpsc::channel(options.event_capacity.max(1));

        let inner = Arc::new(Inner {
            id: ChannelId::new(),
            options,
            state: AtomicState::new(),
            writer: AsyncMutex::new(None),
            events,
            lifecycle: LifecycleSignal::new(),
            session: Mutex::new(None),
            reader: Mutex::new(None),
        });

        (Self { inner }, event_rx)
    }
}

// ============================================================================
// Channel - Accessors
// ============================================================================

impl Channel {
    /// Returns the channel ID used in log lines.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.inner.state.load()
    }

    /// Returns `true` while sends are accepted.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.state.load().is_open()
    }

    /// Returns the target the channel was established against.
    #[must_use]
    pub fn target(&self) -> Option<Url> {
        self.inner.session.lock().as_ref().map(|s| s.target.clone())
    }

    /// Returns the identification header value sent at establish.
    #[must_use]
    pub fn identification(&self) -> Option<String> {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|s| s.identification.clone())
    }

    /// Returns a lifecycle observer, if the channel was established.
    #[must_use]
    pub fn lifecycle(&self) -> Option<Lifecycle> {
        self.state()
            .was_established()
            .then(|| self.inner.lifecycle.subscribe())
    }
}

// ============================================================================
// Channel - Establish
// ============================================================================

impl Channel {
    /// Connects to `target`, sending `identification` as a JSON header.
    ///
    /// On success the inbound task is running and the returned
    /// [`Lifecycle`] resolves when the channel ends.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyEstablished`] if the channel is not idle
    /// - [`Error::Identification`] if `identification` cannot be serialized
    /// - [`Error::Config`] if the configured header name is invalid
    /// - [`Error::Connection`] if the handshake fails
    /// - [`Error::ConnectionTimeout`] if the configured connect timeout elapses
    ///
    /// On error, or if the returned future is dropped before completing,
    /// the channel returns to idle and no task is started.
    pub async fn establish<I>(&self, target: &Url, identification: &I) -> Result<Lifecycle>
    where
        I: Serialize + ?Sized,
    {
        let inner = &self.inner;

        if !inner.state.transition(ChannelState::Idle, ChannelState::Connecting) {
            return Err(Error::already_established(inner.state.load()));
        }
        let mut connecting = ConnectingGuard::new(&inner.state);

        let (json, ws_stream) = match self.handshake(target, identification).await {
            Ok(connected) => connected,
            Err(e) => {
                warn!(channel = %inner.id, %target, error = %e, "Establish failed");
                return Err(e);
            }
        };

        // No await from here on: a cancelled establish can only stop at the
        // handshake, where the guard puts the channel back to idle.
        let (sink, stream) = ws_stream.split();
        {
            // Nobody takes the writer lock while the state is `Connecting`
            let Ok(mut writer) = inner.writer.try_lock() else {
                return Err(Error::connection("write half is busy"));
            };
            *writer = Some(sink);
        }
        *inner.session.lock() = Some(Session {
            target: target.clone(),
            identification: json,
        });

        let lifecycle = inner.lifecycle.subscribe();
        {
            // Held across the move to `Open` so a concurrent `close` always
            // finds the reader handle.
            let mut reader = inner.reader.lock();
            inner
                .state
                .transition(ChannelState::Connecting, ChannelState::Open);
            connecting.disarm();
            *reader = Some(tokio::spawn(Inner::run_inbound_loop(
                Arc::clone(inner),
                stream,
            )));
        }

        info!(channel = %inner.id, %target, "Channel established");

        Ok(lifecycle)
    }

    /// Serializes the identification and dials. No I/O happens if the
    /// header cannot be built.
    async fn handshake<I>(&self, target: &Url, identification: &I) -> Result<(String, WsStream)>
    where
        I: Serialize + ?Sized,
    {
        let options = &self.inner.options;
        let (json, value) = identification_header(identification)?;
        let request = build_request(target, &options.identification_header, value)?;
        let ws_stream = dial(request, options.connect_timeout).await?;
        Ok((json, ws_stream))
    }
}

// ============================================================================
// Channel - Outbound
// ============================================================================

impl Channel {
    /// Sends `payload` as a text frame.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPayload`] if `payload` is not UTF-8
    /// - [`Error::NotOpen`] if the channel is not open
    /// - [`Error::WebSocket`] if the write fails
    pub async fn send(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        let text = String::from_utf8(payload.into())
            .map_err(|e| Error::invalid_payload(format!("text frame must be UTF-8: {e}")))?;
        self.write(Message::Text(text.into())).await
    }

    /// Sends `payload` as a binary frame.
    ///
    /// # Errors
    ///
    /// - [`Error::NotOpen`] if the channel is not open
    /// - [`Error::WebSocket`] if the write fails
    pub async fn send_binary(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.write(Message::Binary(payload.into())).await
    }

    /// Writes one frame while holding the write lock.
    async fn write(&self, message: Message) -> Result<()> {
        let inner = &self.inner;

        let state = inner.state.load();
        if !state.is_open() {
            return Err(Error::not_open(state));
        }

        let mut writer = inner.writer.lock().await;
        let state = inner.state.load();
        let Some(sink) = writer.as_mut().filter(|_| state.is_open()) else {
            return Err(Error::not_open(state));
        };

        sink.send(message).await?;
        trace!(channel = %inner.id, "Frame sent");

        Ok(())
    }
}

// ============================================================================
// Channel - Close
// ============================================================================

impl Channel {
    /// Closes the channel with a normal-closure frame.
    ///
    /// The lifecycle resolves with [`Termination::ClosedLocally`] before the
    /// frame is written. Calling this on a channel that is not open does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebSocket`] if the close frame cannot be written.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;

        if !inner
            .state
            .transition(ChannelState::Open, ChannelState::ClosingLocal)
        {
            debug!(channel = %inner.id, state = %inner.state.load(), "Close ignored");
            return Ok(());
        }

        inner.lifecycle.resolve(Termination::ClosedLocally);

        let watched = inner
            .options
            .close_timeout
            .and_then(|limit| inner.reader.lock().take().map(|handle| (handle, limit)));
        if let Some((handle, limit)) = watched {
            tokio::spawn(Inner::await_close_echo(Arc::clone(inner), handle, limit));
        }

        let sink = inner.writer.lock().await.take();
        if let Some(mut sink) = sink {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: CLOSE_REASON.into(),
            };
            sink.send(Message::Close(Some(frame))).await?;
        }

        debug!(channel = %inner.id, "Close frame sent");

        Ok(())
    }
}

// ============================================================================
// Inner - Inbound Loop
// ============================================================================

impl Inner {
    /// Reads frames until the channel terminates.
    async fn run_inbound_loop(self: Arc<Self>, mut stream: WsReader) {
        debug!(channel = %self.id, "Inbound loop started");

        loop {
            let inbound = match stream.next().await {
                Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                    Inbound::Data(message.into_data())
                }

                Some(Ok(Message::Close(frame))) => Inbound::Close(CloseInfo::from_frame(frame)),

                // Pings are answered by tungstenite
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,

                Some(Err(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake))) | None => {
                    Inbound::Close(CloseInfo::abnormal())
                }

                Some(Err(e)) => Inbound::Failure(e),
            };

            match inbound {
                Inbound::Data(payload) => {
                    trace!(channel = %self.id, len = payload.len(), "Message received");
                    self.emit(ChannelEvent::Message(payload)).await;
                }
                Inbound::Close(info) => {
                    self.handle_close(info).await;
                    break;
                }
                Inbound::Failure(e) => {
                    self.handle_failure(e).await;
                    break;
                }
            }
        }

        self.release_writer().await;

        debug!(channel = %self.id, state = %self.state.load(), "Inbound loop terminated");
    }

    /// Applies the close-code classification.
    async fn handle_close(&self, info: CloseInfo) {
        let was_open = self
            .state
            .transition(ChannelState::Open, ChannelState::ClosedByPeer);

        match classify(info.kind(), was_open) {
            CloseVerdict::PeerClosed => {
                info!(channel = %self.id, code = info.code, reason = %info.reason, "Channel closed by peer");
                self.lifecycle
                    .resolve(Termination::ClosedByPeer(info.clone()));
                self.emit(ChannelEvent::PeerClosed(info)).await;
            }
            CloseVerdict::Unexplained => {
                info!(channel = %self.id, code = info.code, reason = %info.reason, "Channel closed with unrecognized code");
                self.lifecycle.resolve(Termination::ClosedByPeer(info));
            }
            CloseVerdict::LocalEcho => {
                self.finish_local_close();
                debug!(channel = %self.id, "Close handshake completed");
            }
            CloseVerdict::Ignored => {
                self.finish_local_close();
                debug!(channel = %self.id, code = info.code, "Close received while closing locally");
            }
        }
    }

    /// Handles a transport error.
    async fn handle_failure(&self, e: WsError) {
        let message = e.to_string();

        if self
            .state
            .transition(ChannelState::Open, ChannelState::ClosedAbnormally)
        {
            error!(channel = %self.id, error = %message, "Channel transport failed");
            self.lifecycle.resolve(Termination::ClosedAbnormally {
                reason: message.clone(),
            });
            self.emit(ChannelEvent::Error { message }).await;
            return;
        }

        debug!(channel = %self.id, error = %message, "Transport error while closing");
        self.finish_local_close();
        self.lifecycle
            .resolve(Termination::ClosedAbnormally { reason: message });
    }

    fn finish_local_close(&self) {
        self.state
            .transition(ChannelState::ClosingLocal, ChannelState::ClosedLocally);
    }

    /// Pushes an event. A dropped receiver does not stop the loop.
    async fn emit(&self, event: ChannelEvent) {
        if self.events.send(event).await.is_err() {
            trace!(channel = %self.id, "Event receiver dropped");
        }
    }

    /// Flushes any pending close reply and drops the write half.
    async fn release_writer(&self) {
        let sink = self.writer.lock().await.take();
        if let Some(mut sink) = sink
            && let Err(e) = sink.close().await
        {
            trace!(channel = %self.id, error = %e, "Writer close failed");
        }
    }

    /// Aborts the inbound task if the peer never answers a local close.
    async fn await_close_echo(self: Arc<Self>, mut handle: JoinHandle<()>, limit: Duration) {
        if timeout(limit, &mut handle).await.is_ok() {
            return;
        }

        handle.abort();
        self.finish_local_close();
        warn!(
            channel = %self.id,
            timeout_ms = millis(limit),
            "No close echo from peer, inbound loop aborted"
        );
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::future::Future;

    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tracing_subscriber::EnvFilter;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Serialize)]
    struct PlayerSpec {
        name: String,
        number: String,
    }

    fn spec() -> PlayerSpec {
        PlayerSpec {
            name: "Bot".into(),
            number: "7".into(),
        }
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(
            &self,
            _serializer: S,
        ) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("no spec"))
        }
    }

    type ServerWs = WebSocketStream<TcpStream>;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Accepts one client, runs `handler`, and yields the captured
    /// identification header.
    async fn serve<F, Fut>(handler: F) -> (Url, JoinHandle<Option<String>>)
    where
        F: FnOnce(ServerWs) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("ws://{}/", listener.local_addr().unwrap())).unwrap();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let captured = Arc::new(Mutex::new(None));
            let header = Arc::clone(&captured);

            let ws = tokio_tungstenite::accept_hdr_async(
                stream,
                move |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
                    *header.lock() = request
                        .headers()
                        .get("X-Player-Specs")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned);
                    Ok(response)
                },
            )
            .await
            .unwrap();

            handler(ws).await;
            captured.lock().clone()
        });

        (url, handle)
    }

    async fn drain(ws: &mut ServerWs) {
        while let Some(Ok(_)) = ws.next().await {}
    }

    async fn close_with(ws: &mut ServerWs, code: CloseCode, reason: &'static str) {
        ws.close(Some(CloseFrame {
            code,
            reason: reason.into(),
        }))
        .await
        .unwrap();
        drain(ws).await;
    }

    async fn next_event(events: &mut EventReceiver) -> ChannelEvent {
        timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event queue closed")
    }

    async fn wait_for_state(channel: &Channel, expected: ChannelState) {
        timeout(WAIT, async {
            while channel.state() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("state stayed {} instead of {expected}", channel.state()));
    }

    #[tokio::test]
    async fn test_send_and_receive_echo() -> anyhow::Result<()> {
        init_tracing();
        let (url, server) = serve(|mut ws| async move {
            while let Some(Ok(message)) = ws.next().await {
                if message.is_text() || message.is_binary() {
                    ws.send(message).await.unwrap();
                }
            }
        })
        .await;

        let (channel, mut events) = Channel::new(ChannelOptions::default());
        let lifecycle = channel.establish(&url, &spec()).await?;
        assert!(channel.is_open());
        assert!(!lifecycle.is_done());

        channel.send(b"ping".to_vec()).await?;
        assert_eq!(
            next_event(&mut events).await,
            ChannelEvent::Message(Bytes::from_static(b"ping"))
        );

        channel.send_binary(vec![0u8, 159, 146, 150]).await?;
        assert_eq!(
            next_event(&mut events).await,
            ChannelEvent::Message(Bytes::from_static(&[0, 159, 146, 150]))
        );

        channel.close().await?;
        wait_for_state(&channel, ChannelState::ClosedLocally).await;

        let header = server.await?;
        assert_eq!(header.as_deref(), Some(r#"{"name":"Bot","number":"7"}"#));
        assert_eq!(channel.identification(), header);
        assert_eq!(channel.target(), Some(url));
        Ok(())
    }

    #[tokio::test]
    async fn test_going_away_notifies_once() {
        init_tracing();
        let (url, _server) = serve(|mut ws| async move {
            close_with(&mut ws, CloseCode::Away, "server shutdown").await;
        })
        .await;

        let (channel, mut events) = Channel::new(ChannelOptions::default());
        let lifecycle = channel.establish(&url, &spec()).await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            ChannelEvent::PeerClosed(CloseInfo::new(1001, "server shutdown"))
        );
        assert_eq!(
            timeout(WAIT, lifecycle.done()).await.unwrap(),
            Termination::ClosedByPeer(CloseInfo::new(1001, "server shutdown"))
        );
        assert_eq!(channel.state(), ChannelState::ClosedByPeer);

        // Task gone: nothing else is ever queued
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn test_local_close_echo_is_silent() {
        init_tracing();
        let (url, server) = serve(|mut ws| async move { drain(&mut ws).await }).await;

        let (channel, mut events) = Channel::new(ChannelOptions::default());
        let lifecycle = channel.establish(&url, &spec()).await.unwrap();

        channel.close().await.unwrap();
        assert_eq!(lifecycle.termination(), Some(Termination::ClosedLocally));

        wait_for_state(&channel, ChannelState::ClosedLocally).await;
        timeout(WAIT, server).await.unwrap().unwrap();

        assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);
        assert_eq!(lifecycle.done().await, Termination::ClosedLocally);
    }

    #[tokio::test]
    async fn test_normal_closure_from_peer_is_peer_closed() {
        let (url, _server) = serve(|mut ws| async move {
            close_with(&mut ws, CloseCode::Normal, "").await;
        })
        .await;

        let (channel, mut events) = Channel::new(ChannelOptions::default());
        let lifecycle = channel.establish(&url, &spec()).await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            ChannelEvent::PeerClosed(CloseInfo::new(1000, ""))
        );
        assert!(timeout(WAIT, lifecycle.done()).await.unwrap().is_unexpected());
    }

    #[tokio::test]
    async fn test_dropped_connection_is_abnormal_closure() {
        let (url, _server) = serve(|ws| async move { drop(ws) }).await;

        let (channel, mut events) = Channel::new(ChannelOptions::default());
        let lifecycle = channel.establish(&url, &spec()).await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            ChannelEvent::PeerClosed(CloseInfo::abnormal())
        );
        assert_eq!(
            timeout(WAIT, lifecycle.done()).await.unwrap(),
            Termination::ClosedByPeer(CloseInfo::abnormal())
        );
    }

    #[tokio::test]
    async fn test_other_close_code_resolves_without_event() {
        let (url, _server) = serve(|mut ws| async move {
            close_with(&mut ws, CloseCode::Policy, "kicked").await;
        })
        .await;

        let (channel, mut events) = Channel::new(ChannelOptions::default());
        let lifecycle = channel.establish(&url, &spec()).await.unwrap();

        assert_eq!(
            timeout(WAIT, lifecycle.done()).await.unwrap(),
            Termination::ClosedByPeer(CloseInfo::new(1008, "kicked"))
        );
        wait_for_state(&channel, ChannelState::ClosedByPeer).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn test_send_requires_open_channel() {
        let (channel, _events) = Channel::new(ChannelOptions::default());

        let err = tokio_test::assert_err!(channel.send("early").await);
        assert!(matches!(
            err,
            Error::NotOpen {
                state: ChannelState::Idle
            }
        ));

        let (url, _server) = serve(|mut ws| async move { drain(&mut ws).await }).await;
        channel.establish(&url, &spec()).await.unwrap();
        channel.close().await.unwrap();

        let err = channel.send("late").await.unwrap_err();
        assert!(matches!(err, Error::NotOpen { .. }));
    }

    #[tokio::test]
    async fn test_send_rejects_invalid_utf8() {
        let (url, _server) = serve(|mut ws| async move { drain(&mut ws).await }).await;
        let (channel, _events) = Channel::new(ChannelOptions::default());
        channel.establish(&url, &spec()).await.unwrap();

        let err = channel.send(vec![0xff, 0xfe]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPayload { .. }));
        assert!(channel.is_open());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (url, _server) = serve(|mut ws| async move { drain(&mut ws).await }).await;
        let (channel, _events) = Channel::new(ChannelOptions::default());

        // Not established yet
        tokio_test::assert_ok!(channel.close().await);
        assert_eq!(channel.state(), ChannelState::Idle);

        let lifecycle = channel.establish(&url, &spec()).await.unwrap();
        tokio_test::assert_ok!(channel.close().await);
        tokio_test::assert_ok!(channel.close().await);

        wait_for_state(&channel, ChannelState::ClosedLocally).await;
        assert_eq!(lifecycle.termination(), Some(Termination::ClosedLocally));
    }

    #[tokio::test]
    async fn test_establish_is_single_use() {
        let (url, _server) = serve(|mut ws| async move { drain(&mut ws).await }).await;
        let (channel, _events) = Channel::new(ChannelOptions::default());
        channel.establish(&url, &spec()).await.unwrap();

        let err = channel.establish(&url, &spec()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::AlreadyEstablished {
                state: ChannelState::Open
            }
        ));
    }

    #[tokio::test]
    async fn test_unserializable_identification_does_no_io() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("ws://{}/", listener.local_addr().unwrap())).unwrap();

        let (channel, _events) = Channel::new(ChannelOptions::default());
        let err = channel.establish(&url, &Unserializable).await.unwrap_err();

        assert!(matches!(err, Error::Identification { .. }));
        assert_eq!(channel.state(), ChannelState::Idle);
        assert!(channel.lifecycle().is_none());
        assert!(
            timeout(Duration::from_millis(100), listener.accept())
                .await
                .is_err(),
            "no connection should have been attempted"
        );
    }

    #[tokio::test]
    async fn test_establish_bad_endpoint() {
        let url = Url::parse("ws://127.0.0.1:1/").unwrap();
        let (channel, _events) = Channel::new(ChannelOptions::default());

        let err = channel.establish(&url, &spec()).await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
        assert_eq!(channel.state(), ChannelState::Idle);
        assert!(channel.lifecycle().is_none());
        assert!(channel.target().is_none());
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        // Accepts TCP but never answers the upgrade
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("ws://{}/", listener.local_addr().unwrap())).unwrap();
        let _hold = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let options = ChannelOptions::new().with_connect_timeout(Duration::from_millis(100));
        let (channel, _events) = Channel::new(options);

        let err = channel.establish(&url, &spec()).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(channel.state(), ChannelState::Idle);
    }

    #[tokio::test]
    async fn test_close_timeout_aborts_silent_peer() {
        let (url, _server) = serve(|ws| async move {
            // Never reads, so no close echo is produced
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(ws);
        })
        .await;

        let options = ChannelOptions::new().with_close_timeout(Duration::from_millis(100));
        let (channel, _events) = Channel::new(options);
        channel.establish(&url, &spec()).await.unwrap();

        channel.close().await.unwrap();
        assert_eq!(channel.state(), ChannelState::ClosingLocal);
        wait_for_state(&channel, ChannelState::ClosedLocally).await;
    }

    #[tokio::test]
    async fn test_concurrent_sends_arrive_whole() {
        const TASKS: usize = 8;
        const PER_TASK: usize = 25;

        let (url, server) = serve(|mut ws| async move {
            let mut received = Vec::new();
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    received.push(text.to_string());
                    if received.len() == TASKS * PER_TASK {
                        ws.send(Message::Text(received.join("\n").into()))
                            .await
                            .unwrap();
                    }
                }
            }
        })
        .await;

        let (channel, mut events) = Channel::new(ChannelOptions::default());
        channel.establish(&url, &spec()).await.unwrap();

        let senders: Vec<_> = (0..TASKS)
            .map(|task| {
                let channel = channel.clone();
                tokio::spawn(async move {
                    for seq in 0..PER_TASK {
                        let payload = format!("{task}:{seq}:{}", "x".repeat(512));
                        channel.send(payload).await.unwrap();
                    }
                })
            })
            .collect();
        for sender in senders {
            sender.await.unwrap();
        }

        let ChannelEvent::Message(report) = next_event(&mut events).await else {
            panic!("expected the server report");
        };
        let report = String::from_utf8(report.to_vec()).unwrap();

        let mut last_seq: HashMap<usize, usize> = HashMap::new();
        for line in report.lines() {
            let mut parts = line.splitn(3, ':');
            let task: usize = parts.next().unwrap().parse().unwrap();
            let seq: usize = parts.next().unwrap().parse().unwrap();
            assert_eq!(parts.next().unwrap().len(), 512, "frame was split");
            if let Some(previous) = last_seq.insert(task, seq) {
                assert_eq!(seq, previous + 1, "task {task} out of order");
            }
        }
        assert_eq!(last_seq.len(), TASKS);

        channel.close().await.unwrap();
        timeout(WAIT, server).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dropped_receiver_does_not_stop_loop() {
        let (url, _server) = serve(|mut ws| async move {
            for i in 0..3 {
                ws.send(Message::Text(format!("tick {i}").into()))
                    .await
                    .unwrap();
            }
            close_with(&mut ws, CloseCode::Away, "").await;
        })
        .await;

        let (channel, events) = Channel::new(ChannelOptions::default().with_event_capacity(1));
        drop(events);

        let lifecycle = channel.establish(&url, &spec()).await.unwrap();
        assert_eq!(
            timeout(WAIT, lifecycle.done()).await.unwrap(),
            Termination::ClosedByPeer(CloseInfo::new(1001, ""))
        );
    }

    #[tokio::test]
    async fn test_cancelled_establish_returns_to_idle() {
        // Accepts TCP but never answers the upgrade
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stalled = Url::parse(&format!("ws://{}/", listener.local_addr().unwrap())).unwrap();
        let _hold = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let (channel, _events) = Channel::new(ChannelOptions::default());
        let cancelled = timeout(
            Duration::from_millis(100),
            channel.establish(&stalled, &spec()),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(channel.state(), ChannelState::Idle);
        assert!(channel.lifecycle().is_none());

        let (url, _server) = serve(|mut ws| async move { drain(&mut ws).await }).await;
        channel.establish(&url, &spec()).await.unwrap();
        assert!(channel.is_open());
        tokio_test::assert_ok!(channel.send("after retry").await);
    }

    #[tokio::test]
    async fn test_transport_error_while_open_reports_error() {
        let (url, _server) = serve(|mut ws| async move {
            // FIN + reserved data opcode 0x3, empty payload
            ws.get_mut().write_all(&[0x83, 0x00]).await.unwrap();
            ws.get_mut().flush().await.unwrap();
            drain(&mut ws).await;
        })
        .await;

        let (channel, mut events) = Channel::new(ChannelOptions::default());
        let lifecycle = channel.establish(&url, &spec()).await.unwrap();

        let ChannelEvent::Error { message } = next_event(&mut events).await else {
            panic!("expected a transport error event");
        };
        assert!(!message.is_empty());

        let termination = timeout(WAIT, lifecycle.done()).await.unwrap();
        assert_eq!(
            termination,
            Termination::ClosedAbnormally {
                reason: message.clone()
            }
        );
        assert!(termination.is_unexpected());
        assert_eq!(channel.state(), ChannelState::ClosedAbnormally);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_racing_establish_still_arms_watchdog() {
        let (url, _server) = serve(|ws| async move {
            // Never reads, so no close echo is produced
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(ws);
        })
        .await;

        let options = ChannelOptions::new().with_close_timeout(Duration::from_millis(100));
        let (channel, _events) = Channel::new(options);

        let establishing = tokio::spawn({
            let channel = channel.clone();
            async move { channel.establish(&url, &spec()).await.map(|_| ()) }
        });

        // Close as soon as the channel turns open
        timeout(WAIT, async {
            while matches!(channel.state(), ChannelState::Idle | ChannelState::Connecting) {
                channel.close().await.unwrap();
                tokio::task::yield_now().await;
            }
            channel.close().await.unwrap();
        })
        .await
        .unwrap();

        establishing.await.unwrap().unwrap();
        wait_for_state(&channel, ChannelState::ClosedLocally).await;
    }
}
