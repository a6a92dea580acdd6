//! Session configuration.

use std::{fmt, sync::Arc, time::Duration};

use crate::cipher::{Cipher, Mtproto2};
use crate::time::{ServerClock, TimeSource};
use crate::updates::{Callbacks, NoCallbacks};

/// Where a session connects to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Datacenter id, used to key the server time offset.
    pub dc_id: i32,
    /// `host:port`.
    pub addr: String,
}

impl Endpoint {
    pub fn new(dc_id: i32, addr: impl Into<String>) -> Self {
        Self { dc_id, addr: addr.into() }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DC{} ({})", self.dc_id, self.addr)
    }
}

/// Configuration for [`crate::Sender::connect`].
///
/// ```rust,no_run
/// use std::time::Duration;
/// use layer_mtsender::Config;
///
/// let config = Config {
///     request_timeout: Duration::from_secs(30),
///     ..Default::default()
/// };
/// ```
#[derive(Clone)]
pub struct Config {
    /// Timeout applied by [`crate::Sender::invoke`].
    pub request_timeout:   Duration,
    /// Number of pending acks that forces an immediate standalone flush.
    pub ack_capacity:      usize,
    /// Delay of the one-shot ack flush timer.
    pub ack_delay:         Duration,
    /// Workers delivering updates to [`Callbacks::on_update`].
    pub update_workers:    usize,
    /// Sent messages kept for resends; the oldest are evicted first.
    pub sent_log_capacity: usize,
    pub cipher:            Arc<dyn Cipher>,
    pub clock:             Arc<dyn TimeSource>,
    pub callbacks:         Arc<dyn Callbacks>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout:   Duration::from_secs(10),
            ack_capacity:      15,
            ack_delay:         Duration::from_secs(60),
            update_workers:    8,
            sent_log_capacity: 512,
            cipher:            Arc::new(Mtproto2),
            clock:             Arc::new(ServerClock::new()),
            callbacks:         Arc::new(NoCallbacks),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("request_timeout", &self.request_timeout)
            .field("ack_capacity", &self.ack_capacity)
            .field("ack_delay", &self.ack_delay)
            .field("update_workers", &self.update_workers)
            .field("sent_log_capacity", &self.sent_log_capacity)
            .finish_non_exhaustive()
    }
}
