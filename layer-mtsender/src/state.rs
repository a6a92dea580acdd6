//! Mutable session state, guarded as one unit by the sender.

use crate::ack::AckBuffer;
use crate::config::Config;
use crate::message::{Message, Outgoing, is_content_related};
use crate::pending::PendingTable;
use crate::sent_log::SentLog;

/// A fresh random session id.
pub(crate) fn random_session_id() -> Result<i64, getrandom::Error> {
    let mut b = [0u8; 8];
    getrandom::getrandom(&mut b)?;
    Ok(i64::from_le_bytes(b))
}

/// How a re-identified message gets its sequence number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SeqFix {
    /// Keep the seqno it was sent with.
    Keep,
    /// Draw a new seqno from the (corrected) counter.
    Renumber,
    /// Keep the counter value but force the parity the server expects.
    Parity { odd: bool },
}

pub(crate) struct SessionState {
    pub session_id: i64,
    pub salt:       i64,
    last_msg_id:    i64,
    content_related_sent: i32,
    pub acks:    AckBuffer,
    pub pending: PendingTable,
    pub sent:    SentLog,
}

impl SessionState {
    pub fn new(session_id: i64, salt: i64, config: &Config) -> Self {
        Self {
            session_id,
            salt,
            last_msg_id: 0,
            content_related_sent: 0,
            acks: AckBuffer::new(config.ack_capacity),
            pending: PendingTable::default(),
            sent: SentLog::new(config.sent_log_capacity),
        }
    }

    /// Strictly greater than every id issued before, and divisible by 4.
    pub fn next_msg_id(&mut self, candidate: i64) -> i64 {
        let id = (candidate & !3).max(self.last_msg_id + 4);
        self.last_msg_id = id;
        id
    }

    /// `2n + 1` for content-related messages (then `n += 1`), `2n` otherwise.
    pub fn next_seq_no(&mut self, content_related: bool) -> i32 {
        if content_related {
            let seq = self.content_related_sent * 2 + 1;
            self.content_related_sent += 1;
            seq
        } else {
            self.content_related_sent * 2
        }
    }

    #[cfg(test)]
    pub fn last_msg_id(&self) -> i64 { self.last_msg_id }

    /// The next id is derived from the time source alone.
    pub fn forget_last_msg_id(&mut self) {
        self.last_msg_id = 0;
    }

    /// Move the content-related counter by `delta`, never below zero.
    pub fn shift_seq_counter(&mut self, delta: i32) {
        self.content_related_sent = (self.content_related_sent + delta).max(0);
    }

    /// A new session: id, counters and every table start over together.
    ///
    /// Pending callers are dropped without an answer.
    pub fn reset(&mut self, session_id: i64) {
        self.session_id = session_id;
        self.last_msg_id = 0;
        self.content_related_sent = 0;
        self.acks.drain();
        self.pending.clear();
        self.sent.clear();
    }

    /// Give the logged message carrying `bad_msg_id` new ids and return it
    /// for resending.
    ///
    /// Inner messages of a container are re-identified first, so they stay
    /// below the new container id. Each pending caller moves along with its
    /// message.
    pub fn reidentify(
        &mut self,
        bad_msg_id: i64,
        mut candidate: impl FnMut() -> i64,
        fix: SeqFix,
    ) -> Option<Outgoing> {
        let mut entry = self.sent.find_mut(bad_msg_id)?.clone();
        match &mut entry {
            Outgoing::Single(m) => self.renew(m, &mut candidate, fix),
            Outgoing::Container { msg_id, seq_no, messages } => {
                for m in messages.iter_mut() {
                    self.renew(m, &mut candidate, fix);
                }
                let old = *msg_id;
                *msg_id = self.next_msg_id(candidate());
                *seq_no = self.next_seq_no(false);
                log::debug!("[mtsender] container msg_id {old} → {msg_id}");
            }
        }
        if let Some(slot) = self.sent.find_mut(bad_msg_id) {
            *slot = entry.clone();
        }
        Some(entry)
    }

    fn renew(&mut self, m: &mut Message, candidate: &mut impl FnMut() -> i64, fix: SeqFix) {
        let old = m.msg_id;
        m.msg_id = self.next_msg_id(candidate());
        m.seq_no = match fix {
            SeqFix::Keep => m.seq_no,
            SeqFix::Renumber => self.next_seq_no(is_content_related(&m.body)),
            SeqFix::Parity { odd: true } => m.seq_no | 1,
            SeqFix::Parity { odd: false } => m.seq_no & !1,
        };
        if self.pending.relocate(old, m.msg_id) {
            log::debug!("[mtsender] pending request {old} relocated to {}", m.msg_id);
        }
    }
}
