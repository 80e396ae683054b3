//! Link-statistics writer (C10): periodically polls every registered
//! socket's `statistics_csv` and appends the rows to a file. Mirrors
//! `socket_stats.hpp`/`.cpp`'s `stats_writer`, including its two-pass
//! "skip failed, then erase" cleanup.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Result, TransmitError};
use crate::socket::{Socket, SocketId};

struct Registry {
    sockets: Mutex<BTreeMap<SocketId, Arc<dyn Socket>>>,
}

/// Owns a background thread that, once at least one socket has been added,
/// wakes up every `interval` and appends a CSV row per registered socket.
pub struct StatsWriter {
    registry: Arc<Registry>,
    stop: Arc<AtomicBool>,
    interval: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
    output_path: std::path::PathBuf,
}

impl StatsWriter {
    pub fn new(path: impl AsRef<std::path::Path>, interval: Duration) -> Result<Self> {
        let path = path.as_ref();
        File::create(path).map_err(|_| TransmitError::CsvMissing(path.display().to_string()))?;

        Ok(Self {
            registry: Arc::new(Registry {
                sockets: Mutex::new(BTreeMap::new()),
            }),
            stop: Arc::new(AtomicBool::new(true)),
            interval,
            worker: Mutex::new(None),
            output_path: path.to_path_buf(),
        })
    }

    fn run_worker(path: std::path::PathBuf, registry: Arc<Registry>, stop: Arc<AtomicBool>, interval: Duration) {
        let file = match File::options().append(true).open(&path) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "STATS: failed to reopen output file");
                return;
            }
        };
        let mut out = BufWriter::new(file);
        let mut print_header = true;

        while !stop.load(Ordering::Acquire) {
            print_header = Self::print_stats(&registry, &mut out, print_header);
            std::thread::sleep(interval);
        }
    }

    fn print_stats(registry: &Arc<Registry>, out: &mut impl Write, mut print_header: bool) -> bool {
        let mut failed = Vec::new();
        {
            let sockets = registry.sockets.lock();
            for (id, sock) in sockets.iter() {
                if !sock.supports_statistics() {
                    continue;
                }
                let row = sock.statistics_csv(print_header);
                print_header = false;
                if out.write_all(row.as_bytes()).is_err() {
                    tracing::warn!(socket = id, "STATS: removing socket, write failed");
                    failed.push(*id);
                }
            }
            let _ = out.flush();
        }

        if !failed.is_empty() {
            let mut sockets = registry.sockets.lock();
            for id in failed {
                sockets.remove(&id);
            }
        }

        print_header
    }

    pub fn add_socket(&self, sock: Arc<dyn Socket>) {
        if !sock.supports_statistics() {
            return;
        }

        let id = sock.id();
        self.registry.sockets.lock().insert(id, sock);
        tracing::trace!(socket = id, "STATS: added socket");

        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }

        self.stop.store(false, Ordering::Release);
        let registry = Arc::clone(&self.registry);
        let stop = Arc::clone(&self.stop);
        let interval = self.interval;
        // Path reopened inside the worker so the writer owns only a path,
        // not a `File`, across the thread boundary.
        let path = self.output_path.clone();
        *worker = Some(
            std::thread::Builder::new()
                .name("stats-writer".into())
                .spawn(move || Self::run_worker(path, registry, stop, interval))
                .expect("failed to spawn stats writer thread"),
        );
    }

    pub fn remove_socket(&self, id: SocketId) {
        let removed = self.registry.sockets.lock().remove(&id).is_some();
        if removed {
            tracing::trace!(socket = id, "STATS: removed socket");
        } else {
            tracing::trace!(socket = id, "STATS: removing socket: not found");
        }
    }

    pub fn clear(&self) {
        self.registry.sockets.lock().clear();
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::ConnMode;
    use async_trait::async_trait;
    use std::io::Read as _;

    struct FakeSocket(SocketId);

    #[async_trait]
    impl Socket for FakeSocket {
        fn id(&self) -> SocketId {
            self.0
        }
        fn is_caller(&self) -> bool {
            true
        }
        fn mode(&self) -> ConnMode {
            ConnMode::Caller
        }
        async fn read(&self, _buf: &mut [u8], _timeout_ms: i64) -> Result<usize> {
            Ok(0)
        }
        async fn write(&self, _buf: &[u8], _timeout_ms: i64) -> Result<usize> {
            Ok(0)
        }
        fn supports_statistics(&self) -> bool {
            true
        }
        fn statistics_csv(&self, print_header: bool) -> String {
            if print_header {
                "hdr\n1\n".to_string()
            } else {
                "1\n".to_string()
            }
        }
    }

    #[test]
    fn writes_rows_to_file_after_socket_added() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let writer = StatsWriter::new(file.path(), Duration::from_millis(5)).unwrap();
        writer.add_socket(Arc::new(FakeSocket(7)));
        std::thread::sleep(Duration::from_millis(50));
        writer.stop();

        let mut contents = String::new();
        File::open(file.path()).unwrap().read_to_string(&mut contents).unwrap();
        assert!(contents.contains("hdr"));
    }
}
