//! Pacer (C7): paces outgoing messages to a target bitrate or to a CSV
//! timeline. Mirrors `pacer.hpp`'s `pacer`/`csv_pacer` pair.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{Result, TransmitError};

#[async_trait::async_trait]
pub trait Pacer: Send {
    async fn wait(&mut self, cancel: &AtomicBool);
}

/// Rate-based pacer: enforces a target bitrate for a given message size.
pub struct RatePacer {
    interval_us: i64,
    spin: bool,
    last_send: Option<Instant>,
    deviation_us: i64,
}

impl RatePacer {
    /// `interval_us = 10_000_000 / ((bps/8)·10 / message_size)`, matching
    /// `pacer::calc_msg_interval_us`. A zero bitrate or message size yields
    /// an unpaced (zero-interval) pacer.
    pub fn new(bps: u64, message_size: usize, spin: bool) -> Self {
        let denom = (bps / 8) * 10 / (message_size.max(1) as u64);
        let interval_us = if denom == 0 { 0 } else { 10_000_000 / denom as i64 };
        Self {
            interval_us,
            spin,
            last_send: None,
            deviation_us: 0,
        }
    }
}

#[async_trait::async_trait]
impl Pacer for RatePacer {
    async fn wait(&mut self, cancel: &AtomicBool) {
        if self.interval_us <= 0 {
            return;
        }

        let now = Instant::now();
        let last_send = self.last_send.unwrap_or(now);
        let adjusted = (self.interval_us - self.deviation_us).max(0);
        let next_time = last_send + Duration::from_micros(adjusted as u64);

        if self.spin {
            while Instant::now() < next_time && !cancel.load(Ordering::Relaxed) {
                std::hint::spin_loop();
            }
        } else if next_time > Instant::now() {
            tokio::time::sleep_until(tokio::time::Instant::from_std(next_time)).await;
        }

        let actual = Instant::now();
        let actual_elapsed_us = actual.duration_since(last_send).as_micros() as i64;
        self.deviation_us += actual_elapsed_us - self.interval_us;
        self.last_send = Some(actual);
    }
}

/// CSV-timeline pacer: each line is a decimal fractional number of seconds
/// since stream start; EOF rewinds and resets the stream origin.
pub struct CsvPacer {
    lines: Vec<f64>,
    cursor: usize,
    stream_start: Instant,
}

impl CsvPacer {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = fs::File::open(path).map_err(|_| TransmitError::CsvMissing(path.display().to_string()))?;
        let reader = BufReader::new(file);

        let mut lines = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|_| TransmitError::CsvParseError(idx))?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let value: f64 = trimmed
                .parse()
                .map_err(|_| TransmitError::CsvParseError(idx))?;
            lines.push(value);
        }

        Ok(Self {
            lines,
            cursor: 0,
            stream_start: Instant::now(),
        })
    }

    fn next_time(&mut self) -> Instant {
        if self.cursor >= self.lines.len() {
            self.cursor = 0;
            self.stream_start = Instant::now();
        }
        let offset = self.lines.get(self.cursor).copied().unwrap_or(0.0);
        self.cursor += 1;
        self.stream_start + Duration::from_secs_f64(offset.max(0.0))
    }
}

#[async_trait::async_trait]
impl Pacer for CsvPacer {
    async fn wait(&mut self, cancel: &AtomicBool) {
        let target = self.next_time();
        while Instant::now() < target && !cancel.load(Ordering::Relaxed) {
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_pacer_computes_interval() {
        // 1316 bytes at 5 Mbps: interval_us = 10_000_000 / ((5_000_000/8)*10/1316)
        let pacer = RatePacer::new(5_000_000, 1316, false);
        assert!(pacer.interval_us > 0);
    }

    #[test]
    fn rate_pacer_zero_bitrate_is_unpaced() {
        let pacer = RatePacer::new(0, 1316, false);
        assert_eq!(pacer.interval_us, 0);
    }

    #[test]
    fn csv_pacer_missing_file_fails() {
        let err = CsvPacer::new("/nonexistent/path/to/pacing.csv").unwrap_err();
        assert!(matches!(err, TransmitError::CsvMissing(_)));
    }

    #[tokio::test]
    async fn csv_pacer_rewinds_at_eof() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(file, "0.0").unwrap();
        writeln!(file, "0.01").unwrap();
        let mut pacer = CsvPacer::new(file.path()).unwrap();
        let cancel = AtomicBool::new(false);
        pacer.wait(&cancel).await;
        pacer.wait(&cancel).await;
        assert_eq!(pacer.cursor, 2);
        pacer.wait(&cancel).await; // rewinds
        assert_eq!(pacer.cursor, 1);
    }
}
