//! Inbound frames: decryption, container unwrapping, routing and acks.

use std::io;
use std::sync::Arc;

use layer_tl::{Deserializable, Identifiable};
use layer_tl::deserialize::peek_id;
use layer_tl::mtproto::MsgContainer;

use crate::ack::Queued;
use crate::dispatch::{Inbound, classify};
use crate::errors::{InvocationError, ProtocolError};
use crate::message::Message;
use crate::pending::Reply;
use crate::sender::Inner;
use crate::transport::{FrameWriter, Transport};

impl<T: Transport> Inner<T> {
    /// Handle one frame. An `Err` is a violation that ends the session.
    pub(crate) async fn on_frame(self: &Arc<Self>, frame: &[u8]) -> Result<(), ProtocolError> {
        if frame.len() == 4 {
            let code = i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
            log::warn!("[mtsender] transport error {code}");
            self.fail_unattributed(InvocationError::Transport(code));
            return Ok(());
        }

        let session_id = self.state.lock().session_id;
        let message = match self.config.cipher.decrypt(&self.auth_key, session_id, frame) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("[mtsender] dropping undecryptable frame: {e}");
                self.fail_unattributed(InvocationError::Cipher(e));
                return Ok(());
            }
        };

        if peek_id(&message.body) != Ok(MsgContainer::CONSTRUCTOR_ID) {
            let outer = message.msg_id;
            return self.dispatch(message, outer).await;
        }

        let container = match MsgContainer::from_bytes(&message.body) {
            Ok(c) => c,
            Err(e) => {
                let e = ProtocolError::Malformed(e.to_string());
                log::warn!("[mtsender] {e}");
                self.fail_unattributed(InvocationError::Protocol(e));
                return Ok(());
            }
        };
        if let Some(bad) = container.messages.iter().find(|m| m.msg_id >= message.msg_id) {
            return Err(ProtocolError::ContainerOrder { container_id: message.msg_id, msg_id: bad.msg_id });
        }
        log::debug!(
            "[mtsender] container msg_id={} with {} messages",
            message.msg_id, container.messages.len()
        );
        for m in container.messages {
            self.dispatch(Message::new(m.msg_id, m.seq_no, m.body), message.msg_id).await?;
        }
        Ok(())
    }

    /// Route one message. `outer_msg_id` is the id of the frame it came in.
    async fn dispatch(self: &Arc<Self>, message: Message, outer_msg_id: i64) -> Result<(), ProtocolError> {
        let inbound = match classify(&message.body) {
            Ok(i) => i,
            Err(e) => {
                log::warn!("[mtsender] msg_id={}: {e}", message.msg_id);
                self.fail_unattributed(InvocationError::Protocol(e));
                return Ok(());
            }
        };

        match inbound {
            Inbound::Ack(ack) => {
                log::debug!("[mtsender] server acknowledged {:?}", ack.msg_ids);
            }
            Inbound::RpcResult { req_msg_id, outcome } => {
                self.complete(req_msg_id, outcome.map_err(InvocationError::Rpc));
                self.queue_ack(message.msg_id).await;
            }
            Inbound::BareRpcError(e) => return Err(ProtocolError::BareRpcError(e)),
            Inbound::Update(update) => {
                log::debug!("[mtsender] update {:#010x}", update.constructor_id);
                self.pool.dispatch(update);
                self.queue_ack(message.msg_id).await;
            }
            Inbound::NewSession(created) => {
                log::info!(
                    "[mtsender] new session created (first_msg_id={}), salt {:#x}",
                    created.first_msg_id, created.server_salt
                );
                self.state.lock().salt = created.server_salt;
                self.config.callbacks.on_salt_changed(created.server_salt);
                self.queue_ack(message.msg_id).await;
            }
            Inbound::BadSalt(bad) => self.correct_salt(bad).await,
            Inbound::BadMessage(bad) => self.correct_message(bad, outer_msg_id).await,
            Inbound::FutureSalt(salt) => {
                log::debug!("[mtsender] future salt valid until {}", salt.valid_until);
            }
            Inbound::FutureSalts(salts) => {
                log::debug!("[mtsender] {} future salts for msg_id={}", salts.salts.len(), salts.req_msg_id);
            }
            Inbound::DetailedInfo(info) => {
                log::debug!("[mtsender] detailed info for msg_id={} (answer {})", info.msg_id, info.answer_msg_id);
            }
            Inbound::NewDetailedInfo(info) => {
                log::debug!("[mtsender] new detailed info (answer {})", info.answer_msg_id);
            }
            Inbound::ResendReq(req) => {
                log::debug!("[mtsender] server asked to resend {:?}", req.msg_ids);
            }
            Inbound::Pong(pong) => self.complete(pong.msg_id, Ok(message.body)),
            Inbound::Unknown(id) => return Err(ProtocolError::UnknownConstructor(id)),
        }
        Ok(())
    }

    /// Complete the caller waiting on `msg_id`; late and duplicate replies are dropped.
    pub(crate) fn complete(&self, msg_id: i64, reply: Reply) {
        if self.state.lock().pending.complete(msg_id, reply) {
            log::debug!("[mtsender] completed msg_id={msg_id}");
        } else {
            log::warn!("[mtsender] no pending request for msg_id={msg_id}, dropping reply");
        }
    }

    /// Fail whoever may be waiting when an error cannot be tied to one request.
    fn fail_unattributed(&self, err: InvocationError) {
        let mut st = self.state.lock();
        match st.pending.sole_id() {
            Some(id) => {
                st.pending.complete(id, Err(err));
            }
            None => {
                let n = st.pending.fail_all(|| err.duplicate());
                if n > 0 {
                    log::warn!("[mtsender] failed {n} pending requests: {err}");
                }
            }
        }
    }

    // ─── Acks ─────────────────────────────────────────────────────────────────

    pub(crate) async fn queue_ack(self: &Arc<Self>, msg_id: i64) {
        let queued = self.state.lock().acks.push(msg_id);
        match queued {
            Queued::Buffered => {}
            Queued::Arm(epoch) => self.arm_ack_timer(epoch),
            Queued::Flush(ids) => {
                let mut writer = self.writer.lock().await;
                self.send_acks(&mut writer, ids).await;
            }
        }
    }

    fn arm_ack_timer(self: &Arc<Self>, epoch: u64) {
        let weak = Arc::downgrade(self);
        let delay = self.config.ack_delay;
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.flush_acks(epoch).await;
            }
        });
        self.state.lock().acks.set_timer(epoch, task.abort_handle());
    }

    async fn flush_acks(&self, epoch: u64) {
        let mut writer = self.writer.lock().await;
        let ids = self.state.lock().acks.take_if_current(epoch);
        match ids {
            Some(ids) => self.send_acks(&mut writer, ids).await,
            None => log::debug!("[mtsender] ack timer for epoch {epoch} is stale"),
        }
    }

    // ─── Teardown ─────────────────────────────────────────────────────────────

    /// A protocol violation: every caller fails and the connection is closed.
    pub(crate) async fn shut_down(&self, violation: ProtocolError) {
        log::error!("[mtsender] protocol violation, closing session: {violation}");
        self.state.lock().pending.fail_all(|| InvocationError::Protocol(violation.clone()));
        self.close_writer().await;
    }

    /// The reader hit an I/O error: the connection is gone.
    pub(crate) async fn connection_lost(&self, e: io::Error) {
        log::warn!("[mtsender] connection lost: {e}");
        let err = InvocationError::Io(e);
        self.state.lock().pending.fail_all(|| err.duplicate());
        self.close_writer().await;
    }

    async fn close_writer(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut w) = writer {
            if let Err(e) = w.close().await {
                log::debug!("[mtsender] close: {e}");
            }
        }
    }
}
