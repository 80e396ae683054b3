//! `send` (file send) pipeline: enumerates a path and streams each file
//! found over one connection, prefixing the first packet of each file with
//! its NUL-terminated relative path. Mirrors `file_send.hpp`/`file_send.cpp`.
//!
//! Wire format (§6): byte 0 holds two status bits — bit 0 marks the first
//! packet of a file, bit 1 marks the last. A single-packet file sets both.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::conn::{common_run, Processing, StatsConfig};
use crate::error::Result;
use crate::socket::Socket;

const FIRST_BIT: u8 = 0b01;
const LAST_BIT: u8 = 0b10;

#[derive(Debug, Clone)]
pub struct FileSendConfig {
    pub path: PathBuf,
    pub segment_size: usize,
    /// Enumerates and prints the files that would be sent, without
    /// transmitting anything.
    pub printout: bool,
}

/// Walks `root` and returns `(absolute_path, relative_path_as_string)` for
/// every regular file, in directory order. A single file argument yields
/// exactly one entry named by its own file name.
fn enumerate_files(root: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut out = Vec::new();
    if root.is_file() {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        out.push((root.to_path_buf(), name));
        return Ok(out);
    }

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "FILESEND: failed to enumerate directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let abs = entry.path();
            if abs.is_dir() {
                stack.push(abs);
            } else if abs.is_file() {
                let rel = abs
                    .strip_prefix(root)
                    .unwrap_or(&abs)
                    .to_string_lossy()
                    .into_owned();
                out.push((abs, rel));
            }
        }
    }
    out.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(out)
}

struct FileSend {
    cfg: FileSendConfig,
}

impl FileSend {
    async fn send_file(&self, conn: &Arc<dyn Socket>, abs: &Path, rel: &str, force_break: &AtomicBool) -> Result<u64> {
        let mut file = fs::File::open(abs).map_err(|e| crate::error::TransmitError::TransportError {
            op: "open",
            os_err: e.to_string(),
            diag: abs.display().to_string(),
        })?;
        let file_len = file.metadata().map(|m| m.len()).unwrap_or(0);

        let mut path_header = Vec::with_capacity(rel.len() + 1);
        path_header.extend_from_slice(rel.as_bytes());
        path_header.push(0);

        let mut sent_bytes: u64 = 0;
        let mut is_first = true;
        let mut read_buf = vec![0u8; self.cfg.segment_size];

        loop {
            if force_break.load(Ordering::Relaxed) {
                break;
            }

            let header_len = if is_first { 1 + path_header.len() } else { 1 };
            let payload_cap = self.cfg.segment_size.saturating_sub(header_len);
            let n = file.read(&mut read_buf[..payload_cap.max(1)]).map_err(|e| {
                crate::error::TransmitError::TransportError {
                    op: "read file",
                    os_err: e.to_string(),
                    diag: abs.display().to_string(),
                }
            })?;

            let is_last = sent_bytes + n as u64 >= file_len;

            let mut message = Vec::with_capacity(header_len + n);
            let mut status = 0u8;
            if is_first {
                status |= FIRST_BIT;
            }
            if is_last {
                status |= LAST_BIT;
            }
            message.push(status);
            if is_first {
                message.extend_from_slice(&path_header);
            }
            message.extend_from_slice(&read_buf[..n]);

            let mut offset = 0;
            while offset < message.len() {
                if force_break.load(Ordering::Relaxed) {
                    return Ok(sent_bytes);
                }
                match conn.write(&message[offset..], -1).await {
                    Ok(0) => continue,
                    Ok(written) => offset += written,
                    Err(e) => {
                        tracing::warn!(error = %e, "FILESEND: write failed");
                        return Err(e);
                    }
                }
            }
            // Accumulated once per successful full message, not per partial
            // write inside the retry loop above — see DESIGN.md.
            sent_bytes += n as u64;

            is_first = false;
            if is_last {
                break;
            }
        }

        Ok(sent_bytes)
    }

    /// Polls `getsndbuffer`-equivalent packet count until it drains to zero
    /// or a 5-second safety deadline passes, matching §4.12's "poll
    /// `getsndbuffer` until zero" before closing. A no-op when the transport
    /// cannot report pending send packets (e.g. plain UDP).
    async fn drain_send_buffer(&self, conn: &Arc<dyn Socket>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match conn.pending_send_packets() {
                Some(pending) if pending > 0 && Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                _ => break,
            }
        }
    }
}

#[async_trait]
impl Processing for FileSend {
    async fn run(&self, conn: Arc<dyn Socket>, force_break: Arc<AtomicBool>) {
        let files = match enumerate_files(&self.cfg.path) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(error = %e, "FILESEND: enumeration failed");
                return;
            }
        };

        if self.cfg.printout {
            for (_, rel) in &files {
                println!("{rel}");
            }
            return;
        }

        let start = Instant::now();
        let mut total_bytes: u64 = 0;

        for (abs, rel) in &files {
            if force_break.load(Ordering::Relaxed) {
                break;
            }
            match self.send_file(&conn, abs, rel, &force_break).await {
                Ok(n) => total_bytes += n,
                Err(e) => {
                    tracing::warn!(file = %rel, error = %e, "FILESEND: file transfer aborted");
                    break;
                }
            }
        }

        self.drain_send_buffer(&conn).await;

        let elapsed = start.elapsed().as_secs_f64().max(1e-6);
        tracing::info!(
            files = files.len(),
            total_bytes,
            mbps = (total_bytes as f64 * 8.0) / elapsed / 1_000_000.0,
            "FILESEND: pipeline finished"
        );
    }
}

pub async fn run(
    urls: &[String],
    stats_cfg: StatsConfig,
    reconnect: bool,
    cancel: Arc<AtomicBool>,
    cfg: FileSendConfig,
) -> Result<()> {
    let processing = Arc::new(FileSend { cfg });
    common_run(urls, &stats_cfg, reconnect, cancel, processing).await
}
