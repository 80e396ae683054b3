//! `receive` pipeline: reads from a connection until cancelled, optionally
//! feeding the quality-metrics validator (C5/C6) and the periodic metrics
//! writer (C11), and optionally echoing a short reply. Mirrors
//! `receive.hpp`/`receive.cpp`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::conn::{common_run, Processing, StatsConfig};
use crate::error::Result;
use crate::metrics::codec::Validator;
use crate::metrics_writer::MetricsWriter;
use crate::modes::MetricsConfig;
use crate::socket::Socket;

#[derive(Debug, Clone)]
pub struct ReceiveConfig {
    pub message_size: usize,
    pub enable_metrics: bool,
    /// Echoes a short fixed reply on each received message (used by
    /// `generate --twoway` to complete a round trip).
    pub reply: bool,
}

struct Receive {
    cfg: ReceiveConfig,
    metrics_writer: Option<Arc<MetricsWriter>>,
}

#[async_trait]
impl Processing for Receive {
    async fn run(&self, conn: Arc<dyn Socket>, force_break: Arc<AtomicBool>) {
        let validator = self
            .cfg
            .enable_metrics
            .then(|| Arc::new(Mutex::new(Validator::new())));

        if let (Some(v), Some(writer)) = (&validator, &self.metrics_writer) {
            writer.add_validator(Arc::clone(v), conn.id());
        }

        let mut buf = vec![0u8; self.cfg.message_size.max(32)];
        let mut received: u64 = 0;

        while !force_break.load(Ordering::Relaxed) {
            match conn.read(&mut buf, 1000).await {
                Ok(0) => continue,
                Ok(n) => {
                    received += 1;
                    if let Some(v) = &validator {
                        if let Err(e) = v.lock().validate_packet(&buf[..n]) {
                            tracing::debug!(error = %e, "RECEIVE: metrics validation skipped for short payload");
                        }
                    }
                    if self.cfg.reply {
                        if let Err(e) = conn.write(b"ack", 0).await {
                            tracing::warn!(error = %e, "RECEIVE: reply write failed");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "RECEIVE: read failed, connection lost");
                    break;
                }
            }
        }

        if let Some(writer) = &self.metrics_writer {
            writer.remove_validator(conn.id());
        }

        tracing::info!(received, "RECEIVE: pipeline finished");
    }
}

pub async fn run(
    urls: &[String],
    stats_cfg: StatsConfig,
    reconnect: bool,
    cancel: Arc<AtomicBool>,
    cfg: ReceiveConfig,
    metrics_cfg: MetricsConfig,
) -> Result<()> {
    let metrics_writer = if metrics_cfg.enabled && metrics_cfg.freq_ms > 0 {
        Some(Arc::new(MetricsWriter::new(
            metrics_cfg.file.as_deref(),
            Duration::from_millis(metrics_cfg.freq_ms),
        )?))
    } else {
        None
    };

    let processing = Arc::new(Receive { cfg, metrics_writer });
    common_run(urls, &stats_cfg, reconnect, cancel, processing).await
}
