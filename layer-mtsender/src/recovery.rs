//! Resending rejected messages after salt, message-id and seqno corrections.

use layer_tl::mtproto::{BadMsgNotification, BadServerSalt};

use crate::sender::Inner;
use crate::state::SeqFix;
use crate::transport::Transport;

impl<T: Transport> Inner<T> {
    /// `bad_server_salt`: adopt the new salt and resend the message unchanged.
    pub(crate) async fn correct_salt(&self, bad: BadServerSalt) {
        log::info!(
            "[mtsender] bad salt for msg_id={}, switching to {:#x}",
            bad.bad_msg_id, bad.new_server_salt
        );
        self.state.lock().salt = bad.new_server_salt;
        self.config.callbacks.on_salt_changed(bad.new_server_salt);

        let mut writer = self.writer.lock().await;
        let found = {
            let mut st = self.state.lock();
            let out = st.sent.find_mut(bad.bad_msg_id).cloned();
            out.map(|o| (o, st.salt, st.session_id))
        };
        let Some((out, salt, session_id)) = found else {
            log::warn!("[mtsender] msg_id={} is not in the sent log, cannot resend", bad.bad_msg_id);
            return;
        };
        if let Err(e) = self.transmit(&mut writer, &out.to_message(), salt, session_id).await {
            log::warn!("[mtsender] resend of msg_id={} failed: {e}", out.msg_id());
        }
    }

    /// `bad_msg_notification`: correct the clock or the seqno counter, then
    /// resend the message under fresh ids.
    ///
    /// `server_msg_id` is the id of the frame carrying the notification.
    pub(crate) async fn correct_message(&self, bad: BadMsgNotification, server_msg_id: i64) {
        let fix = match bad.error_code {
            BadMsgNotification::MSG_ID_TOO_LOW | BadMsgNotification::MSG_ID_TOO_HIGH => SeqFix::Keep,
            BadMsgNotification::SEQNO_TOO_LOW | BadMsgNotification::SEQNO_TOO_HIGH => SeqFix::Renumber,
            BadMsgNotification::SEQNO_EXPECTED_EVEN => SeqFix::Parity { odd: false },
            BadMsgNotification::SEQNO_EXPECTED_ODD => SeqFix::Parity { odd: true },
            code => {
                log::warn!(
                    "[mtsender] bad_msg_notification code {code} for msg_id={}, not handled",
                    bad.bad_msg_id
                );
                return;
            }
        };
        log::info!(
            "[mtsender] bad_msg_notification code {} for msg_id={}",
            bad.error_code, bad.bad_msg_id
        );

        let mut writer = self.writer.lock().await;
        let resend = {
            let mut st = self.state.lock();
            match bad.error_code {
                BadMsgNotification::MSG_ID_TOO_LOW | BadMsgNotification::MSG_ID_TOO_HIGH => {
                    st.forget_last_msg_id();
                    self.config.clock.synchronize_time(&self.endpoint, server_msg_id);
                }
                BadMsgNotification::SEQNO_TOO_LOW => st.shift_seq_counter(16),
                BadMsgNotification::SEQNO_TOO_HIGH => st.shift_seq_counter(-8),
                _ => {}
            }
            let out = st.reidentify(bad.bad_msg_id, || self.candidate(), fix);
            out.map(|o| (o, st.salt, st.session_id))
        };
        let Some((out, salt, session_id)) = resend else {
            log::warn!("[mtsender] msg_id={} is not in the sent log, cannot resend", bad.bad_msg_id);
            return;
        };
        log::debug!("[mtsender] resending msg_id={} as {}", bad.bad_msg_id, out.msg_id());
        if let Err(e) = self.transmit(&mut writer, &out.to_message(), salt, session_id).await {
            log::warn!("[mtsender] resend of msg_id={} failed: {e}", out.msg_id());
        }
    }
}
