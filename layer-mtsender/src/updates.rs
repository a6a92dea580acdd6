//! Delivery of updates and session notices to the application.

use std::sync::Arc;

use layer_tl::Deserializable;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, mpsc};

/// Constructor ids of the `Updates` type, the only application objects the
/// server pushes outside an `rpc_result`.
pub mod ids {
    pub const UPDATES_TOO_LONG: u32          = 0xe317af7e;
    pub const UPDATE_SHORT_MESSAGE: u32      = 0x313bc7f8;
    pub const UPDATE_SHORT_CHAT_MESSAGE: u32 = 0x4d6deea5;
    pub const UPDATE_SHORT: u32              = 0x78d4dec1;
    pub const UPDATES_COMBINED: u32          = 0x725b04c3;
    pub const UPDATES: u32                   = 0x74ae4240;
    pub const UPDATE_SHORT_SENT_MESSAGE: u32 = 0x9015e101;
}

pub fn is_updates_constructor(id: u32) -> bool {
    use ids::*;
    matches!(
        id,
        UPDATES_TOO_LONG
            | UPDATE_SHORT_MESSAGE
            | UPDATE_SHORT_CHAT_MESSAGE
            | UPDATE_SHORT
            | UPDATES_COMBINED
            | UPDATES
            | UPDATE_SHORT_SENT_MESSAGE
    )
}

/// A serialized `Updates` object, left for the application to decode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Update {
    pub constructor_id: u32,
    pub body:           Vec<u8>,
}

impl Update {
    pub fn decode<T: Deserializable>(&self) -> Result<T, layer_tl::deserialize::Error> {
        T::from_bytes(&self.body)
    }
}

/// Hooks the session calls into. Both are fire-and-forget.
///
/// `on_update` runs on a blocking thread, at most
/// [`crate::Config::update_workers`] calls at a time, and may take as long
/// as it needs. `on_salt_changed` runs on the reader task and should
/// return quickly.
pub trait Callbacks: Send + Sync {
    fn on_update(&self, update: Update) {
        let _ = update;
    }

    fn on_salt_changed(&self, salt: i64) {
        let _ = salt;
    }
}

/// Ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCallbacks;

impl Callbacks for NoCallbacks {}

// ─── Event channel ────────────────────────────────────────────────────────────

/// Something the session reported through [`Callbacks`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Update(Update),
    SaltChanged(i64),
}

struct Forward(mpsc::UnboundedSender<SessionEvent>);

impl Callbacks for Forward {
    fn on_update(&self, update: Update) {
        let _ = self.0.send(SessionEvent::Update(update));
    }

    fn on_salt_changed(&self, salt: i64) {
        let _ = self.0.send(SessionEvent::SaltChanged(salt));
    }
}

/// Receiving end of [`event_channel`].
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl EventStream {
    /// Wait for the next event. Returns `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }
}

/// Callbacks that forward into a stream, for use as [`crate::Config::callbacks`].
pub fn event_channel() -> (Arc<dyn Callbacks>, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Forward(tx)), EventStream { rx })
}

// ─── Worker pool ──────────────────────────────────────────────────────────────

/// Runs [`Callbacks::on_update`] off the async workers, with at most
/// `workers` handlers in flight.
///
/// The reader only ever enqueues, so a slow handler never stalls it.
pub(crate) struct UpdatePool {
    tx: mpsc::UnboundedSender<Update>,
}

impl UpdatePool {
    pub fn spawn(handle: &Handle, workers: usize, callbacks: Arc<dyn Callbacks>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Update>();
        let permits = Arc::new(Semaphore::new(workers.max(1)));
        let blocking = handle.clone();
        handle.spawn(async move {
            while let Some(update) = rx.recv().await {
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else { break };
                let callbacks = Arc::clone(&callbacks);
                blocking.spawn_blocking(move || {
                    callbacks.on_update(update);
                    drop(permit);
                });
            }
        });
        Self { tx }
    }

    pub fn dispatch(&self, update: Update) {
        if self.tx.send(update).is_err() {
            log::warn!("[mtsender] update pool is gone, dropping update");
        }
    }
}
