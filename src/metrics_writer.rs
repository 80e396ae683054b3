//! Quality-metrics writer (C11): periodically polls every registered
//! validator and either appends a CSV row to a file, or logs a
//! human-readable snapshot when no file was configured. Mirrors
//! `metrics_writer.hpp`/`.cpp`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Result, TransmitError};
use crate::metrics::codec::Validator;
use crate::socket::SocketId;

struct Registry {
    validators: Mutex<BTreeMap<SocketId, Arc<Mutex<Validator>>>>,
}

/// Owns a background thread that wakes up every `interval` and either
/// writes a CSV row per validator (file mode) or logs a one-line summary
/// per validator (console mode).
pub struct MetricsWriter {
    registry: Arc<Registry>,
    stop: Arc<AtomicBool>,
    interval: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
    output_path: Option<std::path::PathBuf>,
}

impl MetricsWriter {
    pub fn new(path: Option<impl AsRef<std::path::Path>>, interval: Duration) -> Result<Self> {
        let output_path = match path {
            Some(p) => {
                let p = p.as_ref();
                let mut file =
                    File::create(p).map_err(|_| TransmitError::CsvMissing(p.display().to_string()))?;
                file.write_all(Validator::stats_csv_header().as_bytes())
                    .map_err(|_| TransmitError::CsvMissing(p.display().to_string()))?;
                Some(p.to_path_buf())
            }
            None => None,
        };

        Ok(Self {
            registry: Arc::new(Registry {
                validators: Mutex::new(BTreeMap::new()),
            }),
            stop: Arc::new(AtomicBool::new(true)),
            interval,
            worker: Mutex::new(None),
            output_path,
        })
    }

    fn run_worker(
        output_path: Option<std::path::PathBuf>,
        registry: Arc<Registry>,
        stop: Arc<AtomicBool>,
        interval: Duration,
    ) {
        let mut out = output_path.as_ref().and_then(|p| match File::options().append(true).open(p) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(e) => {
                tracing::error!(path = %p.display(), error = %e, "METRICS: failed to reopen output file");
                None
            }
        });

        while !stop.load(Ordering::Acquire) {
            Self::print_metrics(&registry, out.as_mut());
            std::thread::sleep(interval);
        }
    }

    fn print_metrics(registry: &Arc<Registry>, mut out: Option<&mut BufWriter<File>>) {
        let mut failed = Vec::new();
        {
            let validators = registry.validators.lock();
            for (id, validator) in validators.iter() {
                let mut guard = validator.lock();
                match &mut out {
                    Some(file) => {
                        let row = guard.stats_csv(false);
                        if file.write_all(row.as_bytes()).is_err() {
                            failed.push(*id);
                        }
                    }
                    None => {
                        tracing::info!(socket = id, stats = %guard.stats(), "METRICS");
                    }
                }
            }
            if let Some(file) = out.as_mut() {
                let _ = file.flush();
            }
        }

        if !failed.is_empty() {
            let mut validators = registry.validators.lock();
            for id in failed {
                tracing::warn!(socket = id, "METRICS: removing validator, write failed");
                validators.remove(&id);
            }
        }
    }

    pub fn add_validator(&self, validator: Arc<Mutex<Validator>>, id: SocketId) {
        self.registry.validators.lock().insert(id, validator);
        tracing::trace!(socket = id, "METRICS: added validator");

        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }

        self.stop.store(false, Ordering::Release);
        let registry = Arc::clone(&self.registry);
        let stop = Arc::clone(&self.stop);
        let interval = self.interval;
        let output_path = self.output_path.clone();
        *worker = Some(
            std::thread::Builder::new()
                .name("metrics-writer".into())
                .spawn(move || Self::run_worker(output_path, registry, stop, interval))
                .expect("failed to spawn metrics writer thread"),
        );
    }

    pub fn remove_validator(&self, id: SocketId) {
        let removed = self.registry.validators.lock().remove(&id).is_some();
        if removed {
            tracing::trace!(socket = id, "METRICS: removed validator");
        } else {
            tracing::trace!(socket = id, "METRICS: removing validator: not found");
        }
    }

    pub fn clear(&self) {
        self.registry.validators.lock().clear();
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MetricsWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn writes_csv_rows_once_a_validator_is_added() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let writer = MetricsWriter::new(Some(file.path()), Duration::from_millis(5)).unwrap();
        writer.add_validator(Arc::new(Mutex::new(Validator::new())), 3);
        std::thread::sleep(Duration::from_millis(40));
        writer.stop();

        let mut contents = String::new();
        File::open(file.path()).unwrap().read_to_string(&mut contents).unwrap();
        assert!(contents.starts_with("processed,lost"));
    }

    #[test]
    fn console_mode_requires_no_file() {
        let writer = MetricsWriter::new(None::<&str>, Duration::from_millis(5)).unwrap();
        writer.add_validator(Arc::new(Mutex::new(Validator::new())), 1);
        std::thread::sleep(Duration::from_millis(20));
        writer.stop();
    }
}
