//! Session lifecycle and RPC correlation.
//!
//! A [`Session`] owns the byte stream handed over by the transport
//! collaborator and runs the protocol on top of it:
//!
//! 1. Hello exchange: advertise local capabilities, capture the peer's
//!    capability set and session-id, negotiate the framing mode.
//! 2. Calls: allocate a strictly increasing message-id, register a
//!    completion slot, write the framed request through the writer task.
//! 3. Router: a single background task decodes incoming messages and
//!    resolves replies to their waiting callers; notifications go to the
//!    subscriber channel.
//! 4. Close: idempotent teardown that fails every outstanding call.
//!
//! Lifecycle is `Handshaking -> Open -> Closed` and `Closed` is terminal;
//! a session is never reopened and the framing mode never changes
//! mid-stream.
//!
//! # Notification delivery policy
//!
//! The notification sink is a bounded channel written with `try_send`.
//! If the subscriber lags and the channel fills up, new notifications are
//! dropped and counted ([`Session::dropped_notifications`]) rather than
//! blocking the router, so a slow sink can never stall reply delivery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::codec::envelope::{self, Notification, RpcReply, ServerMessage};
use crate::codec::{CAP_BASE_1_0, CAP_BASE_1_1};
use crate::error::{NetconfError, Result};
use crate::frame::{
    end_marker, EndMarkerDecoder, FramingMode, MessageDecoder, MessageEncoder,
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE,
};
use crate::writer::{spawn_writer_task, WriterHandle, DEFAULT_CHANNEL_CAPACITY};

/// The capability set a peer advertised during the hello exchange.
///
/// Capabilities are opaque identifier strings; this is purely a membership
/// test, nothing is parsed further.
#[derive(Debug, Clone, Default)]
pub struct Capabilities(Vec<String>);

impl Capabilities {
    pub fn new(capabilities: Vec<String>) -> Self {
        Self(capabilities)
    }

    /// Membership test. A capability advertised with a query suffix
    /// (`...?module=foo`) still matches its base URI.
    pub fn contains(&self, uri: &str) -> bool {
        self.0
            .iter()
            .any(|c| c == uri || (c.starts_with(uri) && c[uri.len()..].starts_with('?')))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Configuration for establishing a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Extra capability URIs to advertise beyond the base ones.
    pub capabilities: Vec<String>,
    /// Deadline for the whole hello exchange.
    pub handshake_timeout: Duration,
    /// Default per-call deadline. `None` waits indefinitely; use
    /// [`Session::call_with_timeout`] for per-call overrides.
    pub rpc_timeout: Option<Duration>,
    /// Maximum size of one decoded message.
    pub max_message_size: usize,
    /// Chunk size used when encoding in chunked mode.
    pub chunk_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capabilities: Vec::new(),
            handshake_timeout: Duration::from_secs(30),
            rpc_timeout: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Pending-call table. `closed` lives under the same lock so that call
/// registration can never race session teardown.
#[derive(Default)]
struct Pending {
    slots: HashMap<u64, oneshot::Sender<Result<RpcReply>>>,
    closed: bool,
}

struct SessionInner {
    /// Next message-id; strictly increasing, never reused or reset.
    next_message_id: AtomicU64,
    pending: Mutex<Pending>,
    /// Taken on close so the writer task ends and releases the write half.
    writer: Mutex<Option<WriterHandle>>,
    encoder: MessageEncoder,
    capabilities: Capabilities,
    session_id: u64,
    notifications: Mutex<Option<mpsc::Sender<Notification>>>,
    dropped_notifications: AtomicU64,
    rpc_timeout: Option<Duration>,
}

impl SessionInner {
    fn lock_pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn writer_handle(&self) -> Result<WriterHandle> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(NetconfError::SessionClosed)
    }

    fn take_writer(&self) -> Option<WriterHandle> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Transition to closed and resolve every outstanding slot with a
    /// closed-session failure. Idempotent.
    fn fail_all_pending(&self) {
        let slots: Vec<_> = {
            let mut pending = self.lock_pending();
            pending.closed = true;
            pending.slots.drain().collect()
        };
        for (message_id, tx) in slots {
            tracing::debug!(message_id, "failing pending call: session closed");
            let _ = tx.send(Err(NetconfError::SessionClosed));
        }
    }
}

/// Removes a call's pending registration when its future completes or is
/// abandoned (timeout, cancellation, drop).
struct PendingGuard {
    inner: Arc<SessionInner>,
    message_id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.inner.lock_pending().slots.remove(&self.message_id);
    }
}

/// An open session over one transport stream.
pub struct Session {
    inner: Arc<SessionInner>,
    router: Mutex<Option<JoinHandle<()>>>,
    _writer_task: JoinHandle<Result<()>>,
}

impl Session {
    /// Perform the hello exchange over a connected stream and open the
    /// session.
    ///
    /// The hello itself is always end-marker framed; the mode for the rest
    /// of the session comes from the capability intersection: chunked if
    /// both sides speak `:base:1.1`, otherwise end-marker.
    pub async fn handshake<S>(stream: S, config: SessionConfig) -> Result<Session>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut read_half, mut write_half) = tokio::io::split(stream);

        let mut local_caps = vec![CAP_BASE_1_0.to_string(), CAP_BASE_1_1.to_string()];
        local_caps.extend(config.capabilities.iter().cloned());
        let hello = envelope::hello(&local_caps)?;
        let framed_hello = end_marker::encode(hello.as_bytes())?;

        let exchange = async {
            write_half.write_all(&framed_hello).await?;
            write_half.flush().await?;

            let mut decoder = EndMarkerDecoder::new(config.max_message_size);
            let mut buf = vec![0u8; 8 * 1024];
            loop {
                let n = read_half.read(&mut buf).await?;
                if n == 0 {
                    return Err(NetconfError::Handshake(
                        "stream closed before peer hello".to_string(),
                    ));
                }
                let mut messages = decoder.push(&buf[..n])?;
                if !messages.is_empty() {
                    return Ok((messages.remove(0), decoder));
                }
            }
        };
        let (raw_hello, hello_decoder) = timeout(config.handshake_timeout, exchange)
            .await
            .map_err(|_| {
                NetconfError::Handshake("timed out waiting for peer hello".to_string())
            })??;

        let text = std::str::from_utf8(&raw_hello)
            .map_err(|_| NetconfError::Handshake("peer hello is not valid UTF-8".to_string()))?;
        let peer = envelope::parse_hello(text)?;
        let session_id = peer.session_id.ok_or_else(|| {
            NetconfError::Handshake("peer hello did not report a session-id".to_string())
        })?;
        let capabilities = Capabilities::new(peer.capabilities);

        let mode = if capabilities.contains(CAP_BASE_1_1) {
            FramingMode::Chunked
        } else if capabilities.contains(CAP_BASE_1_0) {
            FramingMode::EndMarker
        } else {
            return Err(NetconfError::Handshake(
                "no common base capability with peer".to_string(),
            ));
        };
        tracing::debug!(session_id, ?mode, "session handshake complete");

        let (writer, writer_task) = spawn_writer_task(write_half, DEFAULT_CHANNEL_CAPACITY);
        let inner = Arc::new(SessionInner {
            next_message_id: AtomicU64::new(1),
            pending: Mutex::new(Pending::default()),
            writer: Mutex::new(Some(writer)),
            encoder: MessageEncoder::new(mode, config.chunk_size),
            capabilities,
            session_id,
            notifications: Mutex::new(None),
            dropped_notifications: AtomicU64::new(0),
            rpc_timeout: config.rpc_timeout,
        });

        // Bytes the peer sent after its hello belong to the negotiated
        // framing and are handed to the router's decoder.
        let decoder = MessageDecoder::new(mode, config.max_message_size);
        let residual = hello_decoder.into_remaining();
        let router = tokio::spawn(router_loop(read_half, decoder, residual, inner.clone()));

        Ok(Session {
            inner,
            router: Mutex::new(Some(router)),
            _writer_task: writer_task,
        })
    }

    /// The session identifier the peer reported in its hello.
    pub fn session_id(&self) -> u64 {
        self.inner.session_id
    }

    /// Capabilities advertised by the peer.
    pub fn capabilities(&self) -> &Capabilities {
        &self.inner.capabilities
    }

    /// The framing mode negotiated for this session.
    pub fn framing_mode(&self) -> FramingMode {
        self.inner.encoder.mode()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_pending().closed
    }

    /// Notifications dropped because the subscriber channel was full.
    pub fn dropped_notifications(&self) -> u64 {
        self.inner.dropped_notifications.load(Ordering::Relaxed)
    }

    /// Register the notification sink, replacing any previous one.
    ///
    /// Delivery is bounded: when the returned receiver lags `capacity`
    /// messages behind, further notifications are dropped and counted.
    pub fn notifications(&self, capacity: usize) -> mpsc::Receiver<Notification> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        *self
            .inner
            .notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    /// Issue one RPC and wait for its correlated reply.
    ///
    /// `body` is the operation element; the envelope with a fresh
    /// message-id is added here. A reply carrying `<rpc-error>` records
    /// resolves to [`NetconfError::Rpc`].
    pub async fn call(&self, body: &str) -> Result<RpcReply> {
        self.call_inner(body, self.inner.rpc_timeout).await
    }

    /// Like [`Session::call`] with an explicit deadline. On expiry the
    /// pending registration is removed and `Timeout` returned; the request
    /// may still execute on the server.
    pub async fn call_with_timeout(&self, body: &str, limit: Duration) -> Result<RpcReply> {
        self.call_inner(body, Some(limit)).await
    }

    async fn call_inner(&self, body: &str, limit: Option<Duration>) -> Result<RpcReply> {
        let message_id = self.inner.next_message_id.fetch_add(1, Ordering::Relaxed);
        let rpc = envelope::wrap_rpc(message_id, body);
        let framed = self.inner.encoder.encode(rpc.as_bytes())?;
        let writer = self.inner.writer_handle()?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.lock_pending();
            if pending.closed {
                return Err(NetconfError::SessionClosed);
            }
            pending.slots.insert(message_id, tx);
        }
        let _guard = PendingGuard {
            inner: Arc::clone(&self.inner),
            message_id,
        };

        // The deadline covers the whole call, queueing the write included,
        // so a stalled peer cannot suspend a caller past its limit.
        let exchange = async {
            writer.send(framed).await?;
            match rx.await {
                Ok(result) => result?.check(),
                // Slot sender dropped without resolving: teardown race.
                Err(_) => Err(NetconfError::SessionClosed),
            }
        };
        match limit {
            Some(limit) => match timeout(limit, exchange).await {
                Ok(resolved) => resolved,
                Err(_) => {
                    tracing::debug!(message_id, "call deadline fired, abandoning wait");
                    Err(NetconfError::Timeout)
                }
            },
            None => exchange.await,
        }
    }

    /// Close the session. Idempotent and safe to race with in-flight calls.
    ///
    /// Sends a best-effort `<close-session>` (reply not awaited), fails
    /// every outstanding call with a closed-session error and releases
    /// the stream: the router stops and the writer task ends, dropping
    /// the write half so the peer observes end of stream. The session
    /// cannot be reopened.
    pub async fn close(&self) -> Result<()> {
        {
            let mut pending = self.inner.lock_pending();
            if pending.closed {
                return Ok(());
            }
            pending.closed = true;
        }

        if let Some(writer) = self.inner.take_writer() {
            let message_id = self.inner.next_message_id.fetch_add(1, Ordering::Relaxed);
            let rpc = envelope::wrap_rpc(message_id, "<close-session/>");
            if let Ok(framed) = self.inner.encoder.encode(rpc.as_bytes()) {
                let _ = writer.send(framed).await;
            }
            // With the handle gone the writer task drains what is queued
            // and shuts the stream down.
            drop(writer);
        }

        self.inner.fail_all_pending();
        if let Some(handle) = self
            .router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        tracing::debug!(session_id = self.inner.session_id, "session closed");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self
            .router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Single reader/router task: decodes framed messages and demultiplexes
/// replies vs notifications. Any stream or decode failure is fatal for
/// the session.
async fn router_loop<R>(
    mut reader: R,
    mut decoder: MessageDecoder,
    residual: Bytes,
    inner: Arc<SessionInner>,
) where
    R: AsyncRead + Unpin + Send,
{
    if let Err(e) = run_router(&mut reader, &mut decoder, residual, &inner).await {
        tracing::error!(error = %e, "session router terminated");
    }
    inner.fail_all_pending();
}

async fn run_router<R>(
    reader: &mut R,
    decoder: &mut MessageDecoder,
    residual: Bytes,
    inner: &Arc<SessionInner>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    if !residual.is_empty() {
        for message in decoder.push(&residual)? {
            route(inner, message)?;
        }
    }

    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            decoder.finish()?;
            tracing::debug!("peer closed the stream");
            return Ok(());
        }
        for message in decoder.push(&buf[..n])? {
            route(inner, message)?;
        }
    }
}

fn route(inner: &SessionInner, raw: Bytes) -> Result<()> {
    let text = std::str::from_utf8(&raw)
        .map_err(|_| NetconfError::Framing("message is not valid UTF-8".to_string()))?;
    match envelope::parse_message(text)? {
        ServerMessage::Reply(reply) => {
            let slot = inner.lock_pending().slots.remove(&reply.message_id);
            match slot {
                Some(tx) => {
                    // Receiver may have been abandoned between deregistration
                    // and now; that is fine.
                    let _ = tx.send(Ok(reply));
                }
                None => {
                    tracing::debug!(
                        message_id = reply.message_id,
                        "dropping reply with no pending call"
                    );
                }
            }
        }
        ServerMessage::Notification(notification) => deliver_notification(inner, notification),
    }
    Ok(())
}

fn deliver_notification(inner: &SessionInner, notification: Notification) {
    let sink = inner
        .notifications
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    let Some(tx) = sink else {
        tracing::debug!(event = %notification.name, "no notification sink, dropping");
        return;
    };
    match tx.try_send(notification) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(n)) => {
            inner.dropped_notifications.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(event = %n.name, "notification sink full, dropping");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!("notification sink receiver dropped");
        }
    }
}
