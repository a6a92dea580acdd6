//! Callers waiting for a reply, keyed by the message id of their request.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::errors::InvocationError;

pub(crate) type Reply = Result<Vec<u8>, InvocationError>;

#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    map: HashMap<i64, oneshot::Sender<Reply>>,
}

impl PendingTable {
    /// Register a caller. Callers that stopped waiting are pruned first.
    pub fn insert(&mut self, msg_id: i64, tx: oneshot::Sender<Reply>) {
        self.map.retain(|_, tx| !tx.is_closed());
        self.map.insert(msg_id, tx);
    }

    pub fn remove(&mut self, msg_id: i64) -> Option<oneshot::Sender<Reply>> {
        self.map.remove(&msg_id)
    }

    /// Complete and remove the entry for `msg_id`. `false` if there was none.
    pub fn complete(&mut self, msg_id: i64, reply: Reply) -> bool {
        match self.map.remove(&msg_id) {
            Some(tx) => {
                // The caller may have timed out in the meantime.
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Move the entry for `from` to `to` without completing it.
    pub fn relocate(&mut self, from: i64, to: i64) -> bool {
        match self.map.remove(&from) {
            Some(tx) => {
                self.map.insert(to, tx);
                true
            }
            None => false,
        }
    }

    /// Complete every entry with an error built by `err`.
    pub fn fail_all(&mut self, err: impl Fn() -> InvocationError) -> usize {
        let n = self.map.len();
        for (_, tx) in self.map.drain() {
            let _ = tx.send(Err(err()));
        }
        n
    }

    /// Drop every entry without completing it.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize { self.map.len() }

    #[cfg(test)]
    pub fn contains(&self, msg_id: i64) -> bool { self.map.contains_key(&msg_id) }

    /// The only pending id, if exactly one caller is waiting.
    pub fn sole_id(&self) -> Option<i64> {
        let mut keys = self.map.keys();
        match (keys.next(), keys.next()) {
            (Some(id), None) => Some(*id),
            _ => None,
        }
    }
}
