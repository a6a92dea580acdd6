//! Messages written since the last reset, kept for byte-identical resends.

use std::collections::VecDeque;

use crate::message::Outgoing;

#[derive(Debug)]
pub(crate) struct SentLog {
    entries:  VecDeque<Outgoing>,
    capacity: usize,
}

impl SentLog {
    pub fn new(capacity: usize) -> Self {
        Self { entries: VecDeque::new(), capacity: capacity.max(1) }
    }

    pub fn push(&mut self, out: Outgoing) {
        if self.entries.len() == self.capacity {
            if let Some(old) = self.entries.pop_front() {
                log::debug!("[mtsender] sent log full, evicting msg_id={}", old.msg_id());
            }
        }
        self.entries.push_back(out);
    }

    /// The entry sent under `msg_id` or carrying it as an inner message.
    pub fn find_mut(&mut self, msg_id: i64) -> Option<&mut Outgoing> {
        self.entries.iter_mut().rev().find(|o| o.contains(msg_id))
    }

    /// Remove the entry sent under exactly `msg_id`.
    pub fn remove(&mut self, msg_id: i64) -> Option<Outgoing> {
        let pos = self.entries.iter().position(|o| o.msg_id() == msg_id)?;
        self.entries.remove(pos)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize { self.entries.len() }
}
