//! Mode pipelines (C14): the per-invocation processing that a connected
//! socket is handed to once C13 has produced one. Each submodule here
//! corresponds to one CLI subcommand and one `generate.cpp`/`receive.cpp`/
//! `route.cpp`/`forward.cpp`/`file_send.cpp`/`file_recv.cpp` counterpart in
//! the original tool.

pub mod file_receive;
pub mod file_send;
pub mod forward;
pub mod generate;
pub mod mreceive;
pub mod receive;
pub mod route;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::socket::Socket;

/// Shared configuration for the quality-metrics writer (C11), common to
/// every pipeline that can validate an incoming stream.
#[derive(Debug, Clone, Default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub file: Option<PathBuf>,
    pub freq_ms: u64,
}

/// A single-slot mailbox used to hand a live connected socket from one
/// endpoint's connection loop to the pump running on the other endpoint's
/// connection loop. `route` and `forward` each own a pair of these: one per
/// direction.
pub(crate) struct PeerSlot {
    socket: Mutex<Option<Arc<dyn Socket>>>,
    notify: Notify,
}

impl PeerSlot {
    pub(crate) fn new() -> Self {
        Self {
            socket: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    pub(crate) fn publish(&self, sock: Arc<dyn Socket>) {
        *self.socket.lock() = Some(sock);
        self.notify.notify_waiters();
    }

    pub(crate) fn clear(&self) {
        *self.socket.lock() = None;
    }

    /// Blocks until a peer socket is published or `cancel` is observed.
    pub(crate) async fn wait_for(&self, cancel: &std::sync::atomic::AtomicBool) -> Option<Arc<dyn Socket>> {
        loop {
            if let Some(sock) = self.socket.lock().clone() {
                return Some(sock);
            }
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }
    }
}
