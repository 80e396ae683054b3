//! `file-receive` pipeline: the inverse of `send` (file_send). Parses the
//! NUL-terminated relative path carried on each file's first packet,
//! creates any missing subdirectories, and writes the payload. Mirrors
//! `file_recv.hpp`/`file_recv.cpp`.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::conn::{common_run, Processing, StatsConfig};
use crate::error::Result;
use crate::socket::{Socket, SocketId};

const FIRST_BIT: u8 = 0b01;
const LAST_BIT: u8 = 0b10;

#[derive(Debug, Clone)]
pub struct FileReceiveConfig {
    pub output_dir: PathBuf,
    pub message_size: usize,
}

struct InFlight {
    file: File,
    rel_path: String,
    bytes: u64,
    started: Instant,
}

struct FileReceive {
    cfg: FileReceiveConfig,
}

impl FileReceive {
    fn open_target(&self, rel_path: &str) -> Result<File> {
        let target = self.cfg.output_dir.join(rel_path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| crate::error::TransmitError::TransportError {
                op: "create_dir_all",
                os_err: e.to_string(),
                diag: parent.display().to_string(),
            })?;
        }
        File::create(&target).map_err(|e| crate::error::TransmitError::TransportError {
            op: "create",
            os_err: e.to_string(),
            diag: target.display().to_string(),
        })
    }
}

#[async_trait]
impl Processing for FileReceive {
    async fn run(&self, conn: Arc<dyn Socket>, force_break: Arc<AtomicBool>) {
        let mut buf = vec![0u8; self.cfg.message_size.max(32)];
        // Keyed by connection id since a single `conn` here is always one
        // logical stream, but the map form mirrors `mreceive`'s per-socket
        // bookkeeping and keeps this loop easy to lift into a multi-source
        // variant later.
        let mut inflight: HashMap<SocketId, InFlight> = HashMap::new();

        loop {
            if force_break.load(Ordering::Relaxed) {
                break;
            }
            let n = match conn.read(&mut buf, 1000).await {
                Ok(0) => continue,
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(error = %e, "FILERECEIVE: read failed, connection lost");
                    break;
                }
            };
            if n == 0 {
                continue;
            }

            let status = buf[0];
            let is_first = status & FIRST_BIT != 0;
            let is_last = status & LAST_BIT != 0;

            let id = conn.id();
            let payload_start;

            if is_first {
                let rest = &buf[1..n];
                let nul = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
                let rel_path = String::from_utf8_lossy(&rest[..nul]).into_owned();
                payload_start = 1 + nul + 1;

                let file = match self.open_target(&rel_path) {
                    Ok(f) => f,
                    Err(e) => {
                        tracing::error!(file = %rel_path, error = %e, "FILERECEIVE: could not open target file");
                        continue;
                    }
                };
                inflight.insert(
                    id,
                    InFlight {
                        file,
                        rel_path,
                        bytes: 0,
                        started: Instant::now(),
                    },
                );
            } else {
                payload_start = 1;
            }

            let payload = &buf[payload_start.min(n)..n];
            let Some(entry) = inflight.get_mut(&id) else {
                tracing::warn!("FILERECEIVE: payload with no open file, dropping");
                continue;
            };

            if let Err(e) = entry.file.write_all(payload) {
                tracing::warn!(file = %entry.rel_path, error = %e, "FILERECEIVE: write failed");
                inflight.remove(&id);
                continue;
            }
            entry.bytes += payload.len() as u64;

            if is_last {
                let entry = inflight.remove(&id).expect("just matched above");
                let elapsed = entry.started.elapsed().as_secs_f64().max(1e-6);
                tracing::info!(
                    file = %entry.rel_path,
                    bytes = entry.bytes,
                    mbps = (entry.bytes as f64 * 8.0) / elapsed / 1_000_000.0,
                    "FILERECEIVE: file complete"
                );
            }
        }
    }
}

pub async fn run(
    urls: &[String],
    stats_cfg: StatsConfig,
    reconnect: bool,
    cancel: Arc<AtomicBool>,
    cfg: FileReceiveConfig,
) -> Result<()> {
    let processing = Arc::new(FileReceive { cfg });
    common_run(urls, &stats_cfg, reconnect, cancel, processing).await
}
