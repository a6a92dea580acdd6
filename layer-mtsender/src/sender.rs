//! The session: outbound pipeline, connection lifecycle and public surface.

use std::io;
use std::sync::{Arc, Weak};
use std::time::Duration;

use layer_crypto::AuthKey;
use layer_tl::mtproto::{MsgsAck, Ping, Pong};
use layer_tl::{Deserializable, RemoteCall, Serializable};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, Endpoint};
use crate::errors::InvocationError;
use crate::message::{Message, Outgoing, is_content_related};
use crate::pending::Reply;
use crate::state::{SessionState, random_session_id};
use crate::transport::{FrameReader, FrameWriter, Transport};
use crate::updates::UpdatePool;

struct ReaderTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub(crate) struct Inner<T: Transport> {
    pub(crate) state:  Mutex<SessionState>,
    pub(crate) writer: tokio::sync::Mutex<Option<T::Writer>>,
    reader:            Mutex<Option<ReaderTask>>,
    transport:         T,
    pub(crate) endpoint: Endpoint,
    pub(crate) auth_key: Arc<AuthKey>,
    pub(crate) config:   Config,
    pub(crate) pool:     UpdatePool,
    pub(crate) runtime:  Handle,
}

impl<T: Transport> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(task) = self.reader.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

fn not_connected() -> InvocationError {
    InvocationError::Io(io::Error::new(io::ErrorKind::NotConnected, "session is not connected"))
}

fn new_session_id() -> Result<i64, InvocationError> {
    random_session_id().map_err(|e| InvocationError::Io(io::Error::other(e.to_string())))
}

impl<T: Transport> Inner<T> {
    pub(crate) fn candidate(&self) -> i64 {
        self.config.clock.generate_message_id(&self.endpoint)
    }

    /// Encrypt and write one message. The caller holds the writer lock.
    pub(crate) async fn transmit(
        &self,
        writer: &mut Option<T::Writer>,
        message: &Message,
        salt: i64,
        session_id: i64,
    ) -> Result<(), InvocationError> {
        let w = writer.as_mut().ok_or_else(not_connected)?;
        let frame = self.config.cipher.encrypt(&self.auth_key, session_id, salt, message)?;
        w.write_frame(&frame).await?;
        log::debug!(
            "[mtsender] sent msg_id={} seq_no={} ({} bytes)",
            message.msg_id, message.seq_no, frame.len()
        );
        Ok(())
    }

    /// Send a request, piggybacking pending acks, and register its caller.
    async fn send_request(&self, body: Vec<u8>) -> Result<oneshot::Receiver<Reply>, InvocationError> {
        let (tx, rx) = oneshot::channel();
        let mut writer = self.writer.lock().await;
        if writer.is_none() {
            return Err(not_connected());
        }

        let (out, request_id, salt, session_id) = {
            let mut st = self.state.lock();
            let acks = st.acks.drain();
            let content_related = is_content_related(&body);

            let (out, request_id) = if acks.is_empty() {
                let id = st.next_msg_id(self.candidate());
                let seq_no = st.next_seq_no(content_related);
                (Outgoing::Single(Message::new(id, seq_no, body)), id)
            } else {
                let ack_id = st.next_msg_id(self.candidate());
                let ack_seq = st.next_seq_no(false);
                let ack = Message::new(ack_id, ack_seq, MsgsAck { msg_ids: acks }.to_bytes());

                let id = st.next_msg_id(self.candidate());
                let seq_no = st.next_seq_no(content_related);
                let request = Message::new(id, seq_no, body);

                let container_id = st.next_msg_id(self.candidate());
                let container_seq = st.next_seq_no(false);
                let out = Outgoing::Container {
                    msg_id:   container_id,
                    seq_no:   container_seq,
                    messages: vec![ack, request],
                };
                (out, id)
            };
            st.pending.insert(request_id, tx);
            st.sent.push(out.clone());
            (out, request_id, st.salt, st.session_id)
        };

        let result = self.transmit(&mut writer, &out.to_message(), salt, session_id).await;
        drop(writer);

        if let Err(e) = result {
            let mut st = self.state.lock();
            st.pending.remove(request_id);
            st.sent.remove(out.msg_id());
            return Err(e);
        }
        Ok(rx)
    }

    /// Send a message nobody waits a reply for. The caller holds the writer lock.
    pub(crate) async fn send_standalone(
        &self,
        writer: &mut Option<T::Writer>,
        body: Vec<u8>,
    ) -> Result<(), InvocationError> {
        let (message, salt, session_id) = {
            let mut st = self.state.lock();
            let id = st.next_msg_id(self.candidate());
            let seq_no = st.next_seq_no(is_content_related(&body));
            let message = Message::new(id, seq_no, body);
            st.sent.push(Outgoing::Single(message.clone()));
            (message, st.salt, st.session_id)
        };
        let result = self.transmit(writer, &message, salt, session_id).await;
        if result.is_err() {
            self.state.lock().sent.remove(message.msg_id);
        }
        result
    }

    /// Write `ids` as a standalone `msgs_ack`.
    pub(crate) async fn send_acks(&self, writer: &mut Option<T::Writer>, ids: Vec<i64>) {
        let n = ids.len();
        match self.send_standalone(writer, MsgsAck { msg_ids: ids }.to_bytes()).await {
            Ok(()) => log::debug!("[mtsender] flushed {n} acks"),
            Err(e) => log::warn!("[mtsender] could not flush {n} acks: {e}"),
        }
    }

    async fn stop_reader(&self) {
        let task = self.reader.lock().take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                log::warn!("[mtsender] reader task ended abnormally: {e}");
            }
        }
    }

    fn start_reader(self: &Arc<Self>, reader: T::Reader) {
        let cancel = CancellationToken::new();
        let handle = self.runtime.spawn(run_reader(Arc::downgrade(self), reader, cancel.clone()));
        *self.reader.lock() = Some(ReaderTask { cancel, handle });
    }
}

async fn run_reader<T: Transport>(inner: Weak<Inner<T>>, mut reader: T::Reader, cancel: CancellationToken) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = reader.read_frame() => frame,
        };
        let Some(inner) = inner.upgrade() else { break };
        match frame {
            Ok(frame) => {
                if let Err(violation) = inner.on_frame(&frame).await {
                    inner.shut_down(violation).await;
                    break;
                }
            }
            Err(e) => {
                if !cancel.is_cancelled() {
                    inner.connection_lost(e).await;
                }
                break;
            }
        }
    }
    log::debug!("[mtsender] reader stopped");
}

// ─── Sender ───────────────────────────────────────────────────────────────────

/// An MTProto session over one transport connection.
///
/// Cheap to clone; all clones share the session. Any number of tasks may
/// call [`Sender::invoke`] concurrently while a background task reads
/// replies.
///
/// ```rust,no_run
/// # async fn f(auth_key: layer_crypto::AuthKey, salt: i64) -> Result<(), layer_mtsender::InvocationError> {
/// use layer_mtsender::{Config, Endpoint, Sender, TcpTransport};
///
/// let endpoint = Endpoint::new(2, "149.154.167.51:443");
/// let sender = Sender::connect(TcpTransport, endpoint, auth_key, salt, Config::default()).await?;
/// let pong = sender.ping().await?;
/// sender.close().await;
/// # Ok(()) }
/// ```
pub struct Sender<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Transport> Sender<T> {
    /// Open `transport` to `endpoint` and start a fresh session.
    pub async fn connect(
        transport: T,
        endpoint: Endpoint,
        auth_key: AuthKey,
        salt: i64,
        config: Config,
    ) -> Result<Self, InvocationError> {
        let (reader, writer) = transport.open(&endpoint).await?;
        let session_id = new_session_id()?;
        let runtime = Handle::current();
        let pool = UpdatePool::spawn(&runtime, config.update_workers, Arc::clone(&config.callbacks));

        let inner = Arc::new(Inner {
            state: Mutex::new(SessionState::new(session_id, salt, &config)),
            writer: tokio::sync::Mutex::new(Some(writer)),
            reader: Mutex::new(None),
            transport,
            endpoint,
            auth_key: Arc::new(auth_key),
            config,
            pool,
            runtime,
        });
        inner.start_reader(reader);
        log::info!("[mtsender] session {session_id:#x} started on {}", inner.endpoint);
        Ok(Self { inner })
    }

    /// Invoke `request` with the configured request timeout.
    pub async fn invoke<R: RemoteCall>(&self, request: &R) -> Result<R::Return, InvocationError> {
        self.invoke_with_timeout(request, self.inner.config.request_timeout).await
    }

    pub async fn invoke_with_timeout<R: RemoteCall>(
        &self,
        request: &R,
        timeout: Duration,
    ) -> Result<R::Return, InvocationError> {
        let bytes = self.invoke_raw(request.to_bytes(), timeout).await?;
        Ok(R::Return::from_bytes(&bytes)?)
    }

    /// Send an already serialized request and wait for the raw result bytes.
    ///
    /// On timeout nothing is sent to the server; a late reply is discarded.
    pub async fn invoke_raw(&self, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, InvocationError> {
        let rx = self.inner.send_request(body).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(InvocationError::Dropped),
            Err(_) => Err(InvocationError::Timeout(timeout)),
        }
    }

    /// Blocking variant of [`Sender::invoke_with_timeout`].
    ///
    /// Runs on the runtime the session was connected on, which must be a
    /// multi-thread runtime: a current-thread runtime is only driven by its
    /// own `block_on`, so the reply would never be read.
    ///
    /// # Panics
    /// When called from inside an asynchronous context.
    pub fn invoke_blocking<R: RemoteCall>(
        &self,
        request: &R,
        timeout: Duration,
    ) -> Result<R::Return, InvocationError> {
        self.inner.runtime.block_on(self.invoke_with_timeout(request, timeout))
    }

    /// Round-trip a `ping` and return the server's `pong`.
    pub async fn ping(&self) -> Result<Pong, InvocationError> {
        let mut b = [0u8; 8];
        getrandom::getrandom(&mut b).map_err(|e| InvocationError::Io(io::Error::other(e.to_string())))?;
        let ping_id = i64::from_le_bytes(b);

        let bytes = self
            .invoke_raw(Ping { ping_id }.to_bytes(), self.inner.config.request_timeout)
            .await?;
        Ok(Pong::from_bytes(&bytes)?)
    }

    /// Reconnect to the same endpoint under a brand-new session.
    ///
    /// Requests still waiting for a reply fail with [`InvocationError::Dropped`].
    pub async fn reset_connection(&self) -> Result<(), InvocationError> {
        let inner = &self.inner;
        inner.stop_reader().await;

        let mut writer = inner.writer.lock().await;
        if let Some(mut w) = writer.take() {
            if let Err(e) = w.close().await {
                log::debug!("[mtsender] closing old connection: {e}");
            }
        }

        let session_id = new_session_id()?;
        inner.state.lock().reset(session_id);

        let (reader, w) = inner.transport.open(&inner.endpoint).await?;
        *writer = Some(w);
        drop(writer);

        inner.start_reader(reader);
        log::info!("[mtsender] connection reset, new session {session_id:#x}");
        Ok(())
    }

    /// Flush outstanding acks, stop reading and close the transport.
    ///
    /// Requests still waiting for a reply fail with [`InvocationError::Dropped`].
    pub async fn close(&self) {
        let inner = &self.inner;
        {
            let mut writer = inner.writer.lock().await;
            let ids = inner.state.lock().acks.drain();
            if !ids.is_empty() {
                inner.send_acks(&mut writer, ids).await;
            }
        }

        inner.stop_reader().await;
        if let Some(mut w) = inner.writer.lock().await.take() {
            if let Err(e) = w.close().await {
                log::debug!("[mtsender] close: {e}");
            }
        }
        inner.state.lock().pending.clear();
        log::info!("[mtsender] session closed");
    }

    pub fn session_id(&self) -> i64 { self.inner.state.lock().session_id }

    pub fn salt(&self) -> i64 { self.inner.state.lock().salt }

    pub fn auth_key(&self) -> &AuthKey { &self.inner.auth_key }

    pub fn endpoint(&self) -> &Endpoint { &self.inner.endpoint }

    /// Requests registered and not yet answered, including abandoned ones
    /// that were not pruned yet.
    pub fn pending_requests(&self) -> usize { self.inner.state.lock().pending.len() }
}
