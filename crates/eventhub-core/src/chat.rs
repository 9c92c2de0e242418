// Lobby chat over WebSocket.
//
// A `ChatSession` owns one background task that holds the socket. The
// session publishes its connection state on a `watch` channel and fans
// received messages and lifecycle changes out to any number of subscribers
// over a `broadcast` channel. Outgoing text is queued to the task through an
// mpsc channel so `send` never blocks on the network.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;
use crate::protocol::ChatFrame;

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 64;

/// How long `close` waits for the socket task to say goodbye.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal. Reached only through `ChatSession::close`.
    Closed,
}

impl fmt::Display for ChatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChatState::Disconnected => "disconnected",
            ChatState::Connecting => "connecting",
            ChatState::Connected => "connected",
            ChatState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Unique within the session.
    pub id: String,
    pub text: String,
    pub from_self: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    ClosedByPeer,
    ClosedByClient,
    Error(String),
    ConnectFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Connected,
    Disconnected { reason: DisconnectReason },
    Message(ChatMessage),
    /// A text frame that was not a `{"message": ...}` object.
    ParseError { raw: String, error: String },
    Reconnecting { attempt: u32, delay: Duration },
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat is not connected (state: {0})")]
    NotConnected(ChatState),
    #[error("chat session is closed")]
    Closed,
    #[error("failed to encode chat frame: {0}")]
    Encode(String),
}

// ---------------------------------------------------------------------------
// Reconnect policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Never reconnect.
    pub fn disabled() -> Self {
        ReconnectPolicy {
            max_attempts: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        ReconnectPolicy {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based), or `None` once
    /// the attempts are used up.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        Some(self.initial_delay.saturating_mul(factor).min(self.max_delay))
    }
}

// ---------------------------------------------------------------------------
// Connector seam
// ---------------------------------------------------------------------------

pub type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// Opens a WebSocket and returns its write and read halves.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), WsError>;
}

pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), WsError> {
        let (ws, response) = tokio_tungstenite::connect_async(url).await?;
        debug!(status = %response.status(), "WebSocket handshake complete");
        let (sink, stream) = ws.split();
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ChatLog {
    entries: Vec<ChatMessage>,
    seq: u64,
}

impl ChatLog {
    fn push(&mut self, text: String, from_self: bool) -> ChatMessage {
        self.seq += 1;
        let message = ChatMessage {
            id: format!("{}-{}", Utc::now().timestamp_millis(), self.seq),
            text,
            from_self,
        };
        self.entries.push(message.clone());
        message
    }
}

struct Shared {
    state: watch::Sender<ChatState>,
    /// Taken on close so every subscriber sees the channel end.
    events: Mutex<Option<broadcast::Sender<ChatEvent>>>,
    log: Mutex<ChatLog>,
}

impl Shared {
    fn emit(&self, event: ChatEvent) {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = events.as_ref() {
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }

    /// Move to `next` unless the session is already closed. Returns whether
    /// the state changed.
    fn set_state(&self, next: ChatState) -> bool {
        self.state.send_if_modified(|current| {
            if *current == ChatState::Closed || *current == next {
                false
            } else {
                *current = next;
                true
            }
        })
    }

    fn append(&self, text: String, from_self: bool) -> ChatMessage {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text, from_self)
    }

    fn receive(&self, raw: &str) {
        match serde_json::from_str::<ChatFrame>(raw) {
            Ok(frame) => {
                let message = self.append(frame.message, false);
                self.emit(ChatEvent::Message(message));
            }
            Err(e) => {
                warn!("dropping malformed chat frame: {e}");
                self.emit(ChatEvent::ParseError {
                    raw: raw.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ChatSession
// ---------------------------------------------------------------------------

pub struct ChatSession {
    shared: Arc<Shared>,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ChatSession {
    /// Start connecting to `url` in the background.
    ///
    /// The returned receiver is subscribed before the connection task
    /// starts, so it observes the first `Connected` event.
    pub fn open(
        connector: Arc<dyn Connector>,
        url: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> (Self, broadcast::Receiver<ChatEvent>) {
        let (events_tx, events_rx) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, _) = watch::channel(ChatState::Disconnected);
        let shared = Arc::new(Shared {
            state: state_tx,
            events: Mutex::new(Some(events_tx)),
            log: Mutex::new(ChatLog::default()),
        });

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run_connection(
            connector,
            url.into(),
            policy,
            Arc::clone(&shared),
            outgoing_rx,
            shutdown_rx,
        ));

        let session = ChatSession {
            shared,
            outgoing: Some(outgoing_tx),
            shutdown: Some(shutdown_tx),
            task: Some(task),
        };
        (session, events_rx)
    }

    /// Another listener. After `close` the receiver reports the channel as
    /// closed straight away.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        let events = self
            .shared
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match events.as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    pub fn state(&self) -> ChatState {
        *self.shared.state.borrow()
    }

    /// Snapshot of every message sent or received in this session.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.shared
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone()
    }

    /// Queue `text` for sending and append it to the log.
    ///
    /// Whitespace-only input is ignored and returns `Ok(None)`. There is no
    /// delivery acknowledgement; the message is logged as soon as it is
    /// queued.
    pub fn send(&self, text: &str) -> Result<Option<ChatMessage>, ChatError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        match self.state() {
            ChatState::Connected => {}
            ChatState::Closed => return Err(ChatError::Closed),
            other => return Err(ChatError::NotConnected(other)),
        }

        let frame = serde_json::to_string(&ChatFrame {
            message: text.to_string(),
        })
        .map_err(|e| ChatError::Encode(e.to_string()))?;

        let outgoing = self.outgoing.as_ref().ok_or(ChatError::Closed)?;
        outgoing
            .send(frame)
            .map_err(|_| ChatError::NotConnected(self.state()))?;

        Ok(Some(self.shared.append(text.to_string(), true)))
    }

    /// Close the socket and end the session. Safe to call more than once.
    pub async fn close(&mut self) {
        let previous = self.shared.state.send_replace(ChatState::Closed);
        if previous == ChatState::Closed {
            return;
        }

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.outgoing = None;

        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                warn!("chat task did not stop in time, aborting");
                task.abort();
            }
        }

        if previous == ChatState::Connected {
            self.shared.emit(ChatEvent::Disconnected {
                reason: DisconnectReason::ClosedByClient,
            });
        }
        self.shared
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!("chat session closed");
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

async fn run_connection(
    connector: Arc<dyn Connector>,
    url: String,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut attempt: u32 = 0;

    loop {
        if !shared.set_state(ChatState::Connecting) {
            return;
        }

        let connected = tokio::select! {
            _ = &mut shutdown => return,
            result = connector.connect(&url) => result,
        };

        let reason = match connected {
            Ok((sink, stream)) => {
                attempt = 0;
                if !shared.set_state(ChatState::Connected) {
                    return;
                }
                info!(%url, "chat connected");
                shared.emit(ChatEvent::Connected);

                match drive(&shared, sink, stream, &mut outgoing, &mut shutdown).await {
                    Some(reason) => reason,
                    None => return,
                }
            }
            Err(e) => {
                warn!(%url, "chat connection failed: {e}");
                DisconnectReason::ConnectFailed(e.to_string())
            }
        };

        if !shared.set_state(ChatState::Disconnected) {
            return;
        }
        info!(?reason, "chat disconnected");
        shared.emit(ChatEvent::Disconnected { reason });

        attempt += 1;
        let Some(delay) = policy.delay_for(attempt) else {
            return;
        };
        debug!(attempt, ?delay, "scheduling chat reconnect");
        shared.emit(ChatEvent::Reconnecting { attempt, delay });

        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Pump frames until the connection ends. Returns the disconnect reason, or
/// `None` when the session asked to stop.
async fn drive(
    shared: &Shared,
    mut sink: FrameSink,
    mut stream: FrameStream,
    outgoing: &mut mpsc::UnboundedReceiver<String>,
    shutdown: &mut oneshot::Receiver<()>,
) -> Option<DisconnectReason> {
    loop {
        tokio::select! {
            biased;

            _ = &mut *shutdown => {
                say_goodbye(&mut sink).await;
                return None;
            }

            frame = outgoing.recv() => match frame {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        warn!("chat send failed: {e}");
                        return Some(DisconnectReason::Error(e.to_string()));
                    }
                }
                None => {
                    say_goodbye(&mut sink).await;
                    return None;
                }
            },

            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => shared.receive(text.as_str()),
                Some(Ok(Message::Close(_))) | None => {
                    return Some(DisconnectReason::ClosedByPeer);
                }
                Some(Ok(_)) => {
                    // Binary, ping, pong and raw frames carry no chat content.
                }
                Some(Err(e)) => {
                    warn!("chat socket error: {e}");
                    return Some(DisconnectReason::Error(e.to_string()));
                }
            },
        }
    }
}

async fn say_goodbye(sink: &mut FrameSink) {
    if let Err(e) = sink.send(Message::Close(None)).await {
        debug!("close frame not sent: {e}");
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    // -- Fake socket ---------------------------------------------------------

    /// Server side of an in-memory socket.
    struct FakePeer {
        to_client: mpsc::UnboundedSender<Result<Message, WsError>>,
        from_client: mpsc::UnboundedReceiver<Message>,
    }

    impl FakePeer {
        fn say(&self, text: &str) {
            self.to_client
                .send(Ok(Message::Text(text.to_string().into())))
                .unwrap();
        }

        async fn next_text(&mut self) -> String {
            match self.from_client.recv().await {
                Some(Message::Text(t)) => t.as_str().to_string(),
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    fn socket() -> ((FrameSink, FrameStream), FakePeer) {
        let (client_tx, from_client) = mpsc::unbounded_channel::<Message>();
        let sink = futures_util::sink::unfold(client_tx, |tx, msg: Message| async move {
            tx.send(msg).map_err(|_| WsError::ConnectionClosed)?;
            Ok::<_, WsError>(tx)
        });

        let (to_client, client_rx) = mpsc::unbounded_channel::<Result<Message, WsError>>();
        let stream = futures_util::stream::unfold(client_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        let link: (FrameSink, FrameStream) = (Box::pin(sink), Box::pin(stream));
        (link, FakePeer { to_client, from_client })
    }

    /// Hands out prepared sockets in order; `None` entries and an empty
    /// queue refuse the connection.
    struct FakeConnector {
        links: Mutex<VecDeque<Option<(FrameSink, FrameStream)>>>,
        calls: AtomicUsize,
    }

    impl FakeConnector {
        fn with(links: Vec<Option<(FrameSink, FrameStream)>>) -> Arc<Self> {
            Arc::new(FakeConnector {
                links: Mutex::new(links.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, _url: &str) -> Result<(FrameSink, FrameStream), WsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.links.lock().unwrap().pop_front().flatten();
            next.ok_or_else(|| {
                WsError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "refused",
                ))
            })
        }
    }

    const URL: &str = "ws://test.local/ws/chat/lobby/";

    async fn next_event(rx: &mut broadcast::Receiver<ChatEvent>) -> ChatEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for chat event")
            .expect("event channel closed")
    }

    async fn connected() -> (ChatSession, broadcast::Receiver<ChatEvent>, FakePeer) {
        let (link, peer) = socket();
        let connector = FakeConnector::with(vec![Some(link)]);
        let (session, mut rx) = ChatSession::open(connector, URL, ReconnectPolicy::disabled());
        assert_eq!(next_event(&mut rx).await, ChatEvent::Connected);
        (session, rx, peer)
    }

    // -- Policy --------------------------------------------------------------

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = ReconnectPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };
        assert_eq!(policy.delay_for(0), None);
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(1000)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_millis(2000)));
        assert_eq!(policy.delay_for(4), Some(Duration::from_secs(3)));
        assert_eq!(policy.delay_for(5), Some(Duration::from_secs(3)));
        assert_eq!(policy.delay_for(6), None);
        assert_eq!(ReconnectPolicy::disabled().delay_for(1), None);
    }

    #[test]
    fn policy_from_config() {
        let policy = ReconnectPolicy::from_config(&ReconnectConfig {
            max_attempts: 2,
            initial_delay_ms: 250,
            max_delay_ms: 1000,
        });
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
    }

    // -- Receiving -----------------------------------------------------------

    #[tokio::test]
    async fn incoming_message_is_logged_and_emitted() {
        let (session, mut rx, peer) = connected().await;
        assert_eq!(session.state(), ChatState::Connected);

        peer.say(r#"{"message": "hello"}"#);
        match next_event(&mut rx).await {
            ChatEvent::Message(msg) => {
                assert_eq!(msg.text, "hello");
                assert!(!msg.from_self);
            }
            other => panic!("expected message, got {other:?}"),
        }
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test]
    async fn malformed_frame_reports_parse_error() {
        let (session, mut rx, peer) = connected().await;

        peer.say("not json");
        match next_event(&mut rx).await {
            ChatEvent::ParseError { raw, .. } => assert_eq!(raw, "not json"),
            other => panic!("expected parse error, got {other:?}"),
        }
        assert!(session.messages().is_empty());
        assert_eq!(session.state(), ChatState::Connected);
    }

    #[tokio::test]
    async fn non_text_frames_are_ignored() {
        let (session, mut rx, peer) = connected().await;

        peer.to_client
            .send(Ok(Message::Binary(vec![1, 2, 3].into())))
            .unwrap();
        peer.say(r#"{"message": "after binary"}"#);
        match next_event(&mut rx).await {
            ChatEvent::Message(msg) => assert_eq!(msg.text, "after binary"),
            other => panic!("expected message, got {other:?}"),
        }
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test]
    async fn peer_close_disconnects() {
        let (session, mut rx, peer) = connected().await;

        drop(peer);
        assert_eq!(
            next_event(&mut rx).await,
            ChatEvent::Disconnected {
                reason: DisconnectReason::ClosedByPeer
            }
        );
        assert_eq!(session.state(), ChatState::Disconnected);
        assert!(matches!(
            session.send("anyone?"),
            Err(ChatError::NotConnected(ChatState::Disconnected))
        ));
    }

    #[tokio::test]
    async fn socket_error_disconnects_with_error_reason() {
        let (_session, mut rx, peer) = connected().await;

        peer.to_client.send(Err(WsError::ConnectionClosed)).unwrap();
        match next_event(&mut rx).await {
            ChatEvent::Disconnected {
                reason: DisconnectReason::Error(_),
            } => {}
            other => panic!("expected error disconnect, got {other:?}"),
        }
    }

    // -- Sending -------------------------------------------------------------

    #[tokio::test]
    async fn send_writes_frame_and_logs_optimistically() {
        let (session, _rx, mut peer) = connected().await;

        let sent = session.send("hi").unwrap().unwrap();
        assert_eq!(sent.text, "hi");
        assert!(sent.from_self);
        assert_eq!(session.messages(), vec![sent]);
        assert_eq!(peer.next_text().await, r#"{"message":"hi"}"#);
    }

    #[tokio::test]
    async fn blank_send_is_a_no_op() {
        let (session, _rx, mut peer) = connected().await;

        assert!(session.send("").unwrap().is_none());
        assert!(session.send("  \n\t").unwrap().is_none());
        assert!(session.messages().is_empty());

        session.send("real").unwrap();
        assert_eq!(peer.next_text().await, r#"{"message":"real"}"#);
    }

    #[tokio::test]
    async fn send_before_connect_is_rejected() {
        let connector = FakeConnector::with(vec![]);
        let (session, _rx) = ChatSession::open(connector, URL, ReconnectPolicy::disabled());
        assert!(matches!(
            session.send("too early"),
            Err(ChatError::NotConnected(_))
        ));
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn message_ids_are_unique() {
        let (session, _rx, _peer) = connected().await;
        let a = session.send("one").unwrap().unwrap();
        let b = session.send("two").unwrap().unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn every_subscriber_sees_messages() {
        let (session, mut first, peer) = connected().await;
        let mut second = session.subscribe();

        peer.say(r#"{"message": "fan-out"}"#);
        for rx in [&mut first, &mut second] {
            match next_event(rx).await {
                ChatEvent::Message(msg) => assert_eq!(msg.text, "fan-out"),
                other => panic!("expected message, got {other:?}"),
            }
        }
    }

    // -- Closing -------------------------------------------------------------

    #[tokio::test]
    async fn close_is_idempotent_and_disconnects_once() {
        let (mut session, mut rx, mut peer) = connected().await;

        session.close().await;
        session.close().await;
        assert_eq!(session.state(), ChatState::Closed);

        let mut disconnects = 0;
        loop {
            match rx.recv().await {
                Ok(ChatEvent::Disconnected { reason }) => {
                    assert_eq!(reason, DisconnectReason::ClosedByClient);
                    disconnects += 1;
                }
                Ok(_) => {}
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(_)) => panic!("unexpected lag"),
            }
        }
        assert_eq!(disconnects, 1);

        assert!(matches!(peer.from_client.recv().await, Some(Message::Close(None))));
        assert!(matches!(session.send("late"), Err(ChatError::Closed)));
    }

    #[tokio::test]
    async fn close_before_connect_emits_no_disconnect() {
        let connector = FakeConnector::with(vec![]);
        let (mut session, mut rx) = ChatSession::open(connector, URL, ReconnectPolicy::disabled());

        session.close().await;
        assert_eq!(session.state(), ChatState::Closed);
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
        assert!(matches!(session.subscribe().try_recv(), Err(TryRecvError::Closed)));
    }

    #[tokio::test]
    async fn drop_releases_the_socket() {
        let (session, _rx, mut peer) = connected().await;
        drop(session);

        let end = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match peer.from_client.recv().await {
                    Some(_) => continue,
                    None => break,
                }
            }
        })
        .await;
        assert!(end.is_ok(), "socket still open after drop");
    }

    // -- Reconnect -----------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn reconnects_with_backoff_and_resets_attempts() {
        let (first, first_peer) = socket();
        let (second, _second_peer) = socket();
        let connector = FakeConnector::with(vec![Some(first), None, Some(second)]);
        let policy = ReconnectPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };
        let (session, mut rx) = ChatSession::open(connector.clone(), URL, policy);

        assert_eq!(next_event(&mut rx).await, ChatEvent::Connected);
        drop(first_peer);

        let expected = [
            ChatEvent::Disconnected {
                reason: DisconnectReason::ClosedByPeer,
            },
            ChatEvent::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(100),
            },
        ];
        for want in expected {
            assert_eq!(next_event(&mut rx).await, want);
        }
        assert!(matches!(
            next_event(&mut rx).await,
            ChatEvent::Disconnected {
                reason: DisconnectReason::ConnectFailed(_)
            }
        ));
        assert_eq!(
            next_event(&mut rx).await,
            ChatEvent::Reconnecting {
                attempt: 2,
                delay: Duration::from_millis(200),
            }
        );
        assert_eq!(next_event(&mut rx).await, ChatEvent::Connected);
        assert_eq!(session.state(), ChatState::Connected);
        assert_eq!(connector.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn no_reconnect_when_disabled() {
        let connector = FakeConnector::with(vec![]);
        let (session, mut rx) =
            ChatSession::open(connector.clone(), URL, ReconnectPolicy::disabled());

        assert!(matches!(
            next_event(&mut rx).await,
            ChatEvent::Disconnected {
                reason: DisconnectReason::ConnectFailed(_)
            }
        ));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(connector.calls(), 1);
        assert_eq!(session.state(), ChatState::Disconnected);
    }
}
