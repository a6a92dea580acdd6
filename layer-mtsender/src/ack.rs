//! Acknowledgment batching.
//!
//! Inbound content-related ids are collected here until one of three
//! triggers empties the buffer: reaching capacity, the one-shot timer, or
//! an outgoing request taking them along in a container. Every trigger
//! swaps the buffer under the session lock and bumps `epoch`, so a timer
//! armed for an earlier batch finds a different epoch and does nothing.

use tokio::task::AbortHandle;

/// Result of [`AckBuffer::push`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Queued {
    /// First id of a new batch; a timer must be armed for this epoch.
    Arm(u64),
    /// The buffer reached capacity; these ids must be flushed now.
    Flush(Vec<i64>),
    /// Appended to a batch that already has a timer.
    Buffered,
}

#[derive(Debug)]
pub(crate) struct AckBuffer {
    ids:      Vec<i64>,
    epoch:    u64,
    capacity: usize,
    timer:    Option<AbortHandle>,
}

impl AckBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { ids: Vec::new(), epoch: 0, capacity: capacity.max(1), timer: None }
    }

    pub fn push(&mut self, msg_id: i64) -> Queued {
        self.ids.push(msg_id);
        if self.ids.len() >= self.capacity {
            Queued::Flush(self.drain())
        } else if self.ids.len() == 1 {
            Queued::Arm(self.epoch)
        } else {
            Queued::Buffered
        }
    }

    /// Record the timer armed for `epoch`; it is aborted on the next swap.
    ///
    /// If the batch was already swapped out, the handle is aborted at once.
    pub fn set_timer(&mut self, epoch: u64, handle: AbortHandle) {
        if epoch == self.epoch && !self.ids.is_empty() {
            if let Some(old) = self.timer.replace(handle) {
                old.abort();
            }
        } else {
            handle.abort();
        }
    }

    /// Swap the buffer for an empty one if `epoch` is still current.
    pub fn take_if_current(&mut self, epoch: u64) -> Option<Vec<i64>> {
        if epoch != self.epoch || self.ids.is_empty() {
            return None;
        }
        self.timer = None;
        Some(self.drain())
    }

    /// Swap the buffer for an empty one, cancelling any armed timer.
    pub fn drain(&mut self) -> Vec<i64> {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.epoch += 1;
        std::mem::take(&mut self.ids)
    }

    #[cfg(test)]
    pub fn epoch(&self) -> u64 { self.epoch }

    #[cfg(test)]
    pub fn len(&self) -> usize { self.ids.len() }
}
