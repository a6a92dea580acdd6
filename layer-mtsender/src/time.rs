//! Message-id seeds and server time drift.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::config::Endpoint;

/// Source of candidate message ids.
///
/// The session only ever uses a candidate if it exceeds the last id it
/// issued, so implementations may go backwards after a correction.
pub trait TimeSource: Send + Sync {
    /// A fresh candidate id derived from (corrected) wall-clock time.
    fn generate_message_id(&self, endpoint: &Endpoint) -> i64;

    /// Adjust the drift estimate for `endpoint` using a server-issued message id.
    fn synchronize_time(&self, endpoint: &Endpoint, server_msg_id: i64);
}

/// Wall clock plus a per-datacenter offset in seconds.
#[derive(Debug, Default)]
pub struct ServerClock {
    offsets: Mutex<HashMap<i32, i32>>,
}

impl ServerClock {
    pub fn new() -> Self { Self::default() }

    /// Start with a known offset for `dc_id` (e.g. one persisted from an earlier run).
    pub fn with_offset(dc_id: i32, offset: i32) -> Self {
        let clock = Self::new();
        clock.offsets.lock().insert(dc_id, offset);
        clock
    }

    /// Current offset for `dc_id`, zero if never synchronised.
    pub fn offset(&self, dc_id: i32) -> i32 {
        self.offsets.lock().get(&dc_id).copied().unwrap_or(0)
    }
}

fn now() -> (i64, i64) {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    (d.as_secs() as i64, d.subsec_nanos() as i64)
}

impl TimeSource for ServerClock {
    fn generate_message_id(&self, endpoint: &Endpoint) -> i64 {
        let (secs, nanos) = now();
        let secs = secs + self.offset(endpoint.dc_id) as i64;
        (secs << 32) | (nanos << 2)
    }

    fn synchronize_time(&self, endpoint: &Endpoint, server_msg_id: i64) {
        let (secs, _) = now();
        let offset = ((server_msg_id >> 32) - secs) as i32;
        log::debug!("[mtsender] time offset for DC{} is now {offset}s", endpoint.dc_id);
        self.offsets.lock().insert(endpoint.dc_id, offset);
    }
}
