//! I/O dispatch reactor (C12): a single polling loop that routes read
//! readiness to per-socket callbacks. Mirrors `thread_io.hpp`/`.cpp`'s
//! `io_dispatch`: a 100ms poll tick, one ready socket serviced per tick
//! (`MAX_POLL_EVENTS = 1`), write/error readiness logged but never routed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::socket::{Socket, SocketId};

const POLL_TIMEOUT_MS: i64 = 100;
const SCRATCH_SIZE: usize = 1 << 16;

pub type ReadFn = Arc<dyn Fn(Arc<dyn Socket>, Vec<u8>) + Send + Sync>;

struct Registered {
    sock: Arc<dyn Socket>,
    read_fn: ReadFn,
}

struct Registry {
    sockets: Mutex<BTreeMap<SocketId, Registered>>,
}

/// Owns a background task that round-robins over registered sockets,
/// handing exactly one ready socket's bytes to its callback per tick.
pub struct IoDispatch {
    registry: Arc<Registry>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IoDispatch {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                sockets: Mutex::new(BTreeMap::new()),
            }),
            stop: Arc::new(AtomicBool::new(true)),
            worker: Mutex::new(None),
        }
    }

    pub fn add(&self, sock: Arc<dyn Socket>, read_fn: ReadFn) {
        let id = sock.id();
        self.registry.sockets.lock().insert(id, Registered { sock, read_fn });
        tracing::trace!(socket = id, "IO: socket registered for dispatch");

        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }

        self.stop.store(false, Ordering::Release);
        let registry = Arc::clone(&self.registry);
        let stop = Arc::clone(&self.stop);
        *worker = Some(tokio::spawn(Self::dispatch_loop(registry, stop)));
    }

    async fn dispatch_loop(registry: Arc<Registry>, stop: Arc<AtomicBool>) {
        let mut next_index: usize = 0;

        while !stop.load(Ordering::Acquire) {
            let ids: Vec<SocketId> = registry.sockets.lock().keys().copied().collect();
            if ids.is_empty() {
                tokio::time::sleep(Duration::from_millis(POLL_TIMEOUT_MS as u64)).await;
                continue;
            }

            next_index %= ids.len();
            let id = ids[next_index];
            next_index += 1;

            let entry = {
                let sockets = registry.sockets.lock();
                sockets.get(&id).map(|r| (Arc::clone(&r.sock), Arc::clone(&r.read_fn)))
            };

            let Some((sock, read_fn)) = entry else { continue };

            let mut scratch = vec![0u8; SCRATCH_SIZE];
            match sock.read(&mut scratch, 0).await {
                Ok(0) => {}
                Ok(n) => {
                    scratch.truncate(n);
                    read_fn(sock, scratch);
                }
                Err(e) => {
                    tracing::error!(socket = id, error = %e, "IO: error reported, not expected to be routed");
                }
            }

            if ids.len() == 1 {
                tokio::time::sleep(Duration::from_millis(POLL_TIMEOUT_MS as u64)).await;
            }
        }

        tracing::warn!("IO: dispatch finishing");
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}

impl Default for IoDispatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IoDispatch {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::ConnMode;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct OneShotSocket {
        id: SocketId,
        delivered: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Socket for OneShotSocket {
        fn id(&self) -> SocketId {
            self.id
        }
        fn is_caller(&self) -> bool {
            true
        }
        fn mode(&self) -> ConnMode {
            ConnMode::Caller
        }
        async fn read(&self, buf: &mut [u8], _timeout_ms: i64) -> Result<usize> {
            if self.delivered.swap(true, Ordering::SeqCst) {
                Ok(0)
            } else {
                buf[0] = 42;
                Ok(1)
            }
        }
        async fn write(&self, _buf: &[u8], _timeout_ms: i64) -> Result<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn routes_exactly_one_ready_read_to_its_callback() {
        let dispatch = IoDispatch::new();
        let delivered = Arc::new(AtomicBool::new(false));
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);

        let sock: Arc<dyn Socket> = Arc::new(OneShotSocket {
            id: 1,
            delivered: Arc::clone(&delivered),
        });

        dispatch.add(
            sock,
            Arc::new(move |_sock, bytes| {
                assert_eq!(bytes, vec![42]);
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        dispatch.stop();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
