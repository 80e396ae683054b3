//! `generate` pipeline: opens a caller-side connection and writes paced,
//! optionally metrics-stamped messages until cancelled or a message-count
//! limit is reached. Mirrors `generate.hpp`/`generate.cpp`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::conn::{common_run, Processing, StatsConfig};
use crate::error::Result;
use crate::metrics::codec::Generator;
use crate::pacer::{CsvPacer, Pacer, RatePacer};
use crate::socket::Socket;

#[derive(Debug, Clone)]
pub struct GenerateConfig {
    pub message_size: usize,
    pub bitrate_bps: u64,
    /// `None` sends without a count limit (the CLI's `--num -1`).
    pub num_messages: Option<u64>,
    pub duration: Option<Duration>,
    pub enable_metrics: bool,
    pub spin: bool,
    pub csv_pacing: Option<PathBuf>,
    /// Spawns a reader sub-task that drains replies from a `receive
    /// --reply`-style peer without interpreting them.
    pub twoway: bool,
}

struct Generate {
    cfg: GenerateConfig,
}

#[async_trait]
impl Processing for Generate {
    async fn run(&self, conn: Arc<dyn Socket>, force_break: Arc<AtomicBool>) {
        let local_done = Arc::new(AtomicBool::new(false));
        if let Some(duration) = self.cfg.duration {
            let flag = Arc::clone(&local_done);
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                flag.store(true, Ordering::Relaxed);
            });
        }

        let mut pacer: Box<dyn Pacer> = match &self.cfg.csv_pacing {
            Some(path) => match CsvPacer::new(path) {
                Ok(p) => Box::new(p),
                Err(e) => {
                    tracing::error!(error = %e, "GENERATE: csv pacer construction failed");
                    return;
                }
            },
            None => Box::new(RatePacer::new(self.cfg.bitrate_bps, self.cfg.message_size, self.cfg.spin)),
        };

        if self.cfg.twoway {
            let reader_conn = Arc::clone(&conn);
            let reader_cancel = Arc::clone(&force_break);
            tokio::spawn(async move {
                let mut scratch = vec![0u8; 2048];
                while !reader_cancel.load(Ordering::Relaxed) {
                    match reader_conn.read(&mut scratch, 100).await {
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!(error = %e, "GENERATE: reply reader stopping");
                            break;
                        }
                    }
                }
            });
        }

        let mut generator = Generator::new(self.cfg.enable_metrics);
        let mut buf = vec![0u8; self.cfg.message_size];
        let mut sent: u64 = 0;

        loop {
            if force_break.load(Ordering::Relaxed) || local_done.load(Ordering::Relaxed) {
                break;
            }
            if let Some(limit) = self.cfg.num_messages {
                if sent >= limit {
                    break;
                }
            }

            if let Err(e) = generator.generate_payload(&mut buf) {
                tracing::error!(error = %e, "GENERATE: payload generation failed");
                break;
            }

            match conn.write(&buf, -1).await {
                Ok(0) => continue,
                Ok(_) => sent += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "GENERATE: write failed, connection lost");
                    break;
                }
            }

            pacer.wait(&force_break).await;
        }

        tracing::info!(sent, "GENERATE: pipeline finished");
    }
}

pub async fn run(
    urls: &[String],
    stats_cfg: StatsConfig,
    reconnect: bool,
    cancel: Arc<AtomicBool>,
    cfg: GenerateConfig,
) -> Result<()> {
    let processing = Arc::new(Generate { cfg });
    common_run(urls, &stats_cfg, reconnect, cancel, processing).await
}
