//! `mreceive` pipeline: like `receive`, but every source shares one I/O
//! dispatch thread (C12) instead of each owning a dedicated blocking read
//! loop. Mirrors `mreceive.hpp`/`mreceive.cpp`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::conn::{common_run, Processing, StatsConfig};
use crate::error::Result;
use crate::io_dispatch::{IoDispatch, ReadFn};
use crate::metrics::codec::Validator;
use crate::metrics_writer::MetricsWriter;
use crate::modes::receive::ReceiveConfig;
use crate::modes::MetricsConfig;
use crate::socket::Socket;

struct Mreceive {
    cfg: ReceiveConfig,
    dispatch: Arc<IoDispatch>,
    metrics_writer: Option<Arc<MetricsWriter>>,
}

#[async_trait]
impl Processing for Mreceive {
    async fn run(&self, conn: Arc<dyn Socket>, force_break: Arc<AtomicBool>) {
        let validator = self
            .cfg
            .enable_metrics
            .then(|| Arc::new(Mutex::new(Validator::new())));

        if let (Some(v), Some(writer)) = (&validator, &self.metrics_writer) {
            writer.add_validator(Arc::clone(v), conn.id());
        }

        let reply = self.cfg.reply;
        let read_fn: ReadFn = Arc::new(move |sock, bytes| {
            if let Some(v) = &validator {
                if let Err(e) = v.lock().validate_packet(&bytes) {
                    tracing::debug!(error = %e, "MRECEIVE: metrics validation skipped for short payload");
                }
            }
            if reply {
                let sock = Arc::clone(&sock);
                tokio::spawn(async move {
                    let _ = sock.write(b"ack", 0).await;
                });
            }
        });

        self.dispatch.add(Arc::clone(&conn), read_fn);

        while !force_break.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        if let Some(writer) = &self.metrics_writer {
            writer.remove_validator(conn.id());
        }
    }
}

pub async fn run(
    urls: Vec<String>,
    stats_cfg: StatsConfig,
    reconnect: bool,
    cancel: Arc<AtomicBool>,
    cfg: ReceiveConfig,
    metrics_cfg: MetricsConfig,
) -> Result<()> {
    let dispatch = Arc::new(IoDispatch::new());
    let metrics_writer = if metrics_cfg.enabled && metrics_cfg.freq_ms > 0 {
        Some(Arc::new(MetricsWriter::new(
            metrics_cfg.file.as_deref(),
            Duration::from_millis(metrics_cfg.freq_ms),
        )?))
    } else {
        None
    };

    let mut sources = Vec::with_capacity(urls.len());
    for url in urls {
        let processing = Arc::new(Mreceive {
            cfg: cfg.clone(),
            dispatch: Arc::clone(&dispatch),
            metrics_writer: metrics_writer.clone(),
        });
        let cancel = Arc::clone(&cancel);
        let stats_cfg = stats_cfg.clone();
        sources.push(tokio::spawn(async move {
            common_run(&[url], &stats_cfg, reconnect, cancel, processing).await
        }));
    }

    for source in sources {
        match source.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "MRECEIVE: source failed"),
            Err(e) => tracing::error!(error = %e, "MRECEIVE: source task panicked"),
        }
    }

    dispatch.stop();
    Ok(())
}
