//! Metrics payload codec (C6): the in-band header carrying sequence number
//! and dual-clock timestamps, plus the generator/validator pair that produce
//! and consume it.
//!
//! The header is fixed at 32 bytes and little-endian on the wire — a
//! deliberate commitment this spec makes where the original source left the
//! endianness to the host's `reinterpret_cast` (see DESIGN.md).

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, TransmitError};
use crate::metrics::{DelayFactor, Integrity, Jitter, Latency, Reorder};

pub const HEADER_SIZE: usize = 32;

const SEQNO_OFFSET: usize = 0;
const SYS_TS_OFFSET: usize = 8;
const STD_TS_OFFSET: usize = 16;

fn steady_clock_us() -> i64 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    let origin = *ORIGIN.get_or_init(Instant::now);
    Instant::now().duration_since(origin).as_micros() as i64
}

fn sys_clock_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

pub fn write_header(buf: &mut [u8], seqno: u64, sys_ts_us: i64, std_ts_us: i64) -> Result<()> {
    if buf.len() < HEADER_SIZE {
        return Err(TransmitError::PayloadTooSmall {
            min_required: HEADER_SIZE,
        });
    }
    buf[SEQNO_OFFSET..SEQNO_OFFSET + 8].copy_from_slice(&seqno.to_le_bytes());
    buf[SYS_TS_OFFSET..SYS_TS_OFFSET + 8].copy_from_slice(&sys_ts_us.to_le_bytes());
    buf[STD_TS_OFFSET..STD_TS_OFFSET + 8].copy_from_slice(&std_ts_us.to_le_bytes());
    Ok(())
}

pub fn read_header(buf: &[u8]) -> Result<(u64, i64, i64)> {
    if buf.len() < HEADER_SIZE {
        return Err(TransmitError::PayloadTooSmall {
            min_required: HEADER_SIZE,
        });
    }
    let seqno = u64::from_le_bytes(buf[SEQNO_OFFSET..SEQNO_OFFSET + 8].try_into().unwrap());
    let sys_ts = i64::from_le_bytes(buf[SYS_TS_OFFSET..SYS_TS_OFFSET + 8].try_into().unwrap());
    let std_ts = i64::from_le_bytes(buf[STD_TS_OFFSET..STD_TS_OFFSET + 8].try_into().unwrap());
    Ok((seqno, sys_ts, std_ts))
}

/// Produces payloads of caller-chosen length, optionally stamped with the
/// metrics header.
pub struct Generator {
    seqno: u64,
    enable_metrics: bool,
}

impl Generator {
    pub fn new(enable_metrics: bool) -> Self {
        Self {
            seqno: 0,
            enable_metrics,
        }
    }

    /// Fills `buf` with a byte pattern seeded by the low byte of the current
    /// sequence number, then stamps the header if metrics are enabled.
    pub fn generate_payload(&mut self, buf: &mut [u8]) -> Result<()> {
        let seed = (self.seqno & 0xFF) as u8;
        for (i, b) in buf.iter_mut().enumerate() {
            *b = seed.wrapping_add(i as u8);
        }

        if self.enable_metrics {
            write_header(buf, self.seqno, sys_clock_us(), steady_clock_us())?;
            self.seqno += 1;
        }

        Ok(())
    }
}

/// Consumes metrics-stamped payloads and feeds the quality estimators.
#[derive(Default)]
pub struct Validator {
    reorder: Reorder,
    jitter: Jitter,
    latency: Latency,
    delay_factor: DelayFactor,
    integrity: Integrity,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate_packet(&mut self, payload: &[u8]) -> Result<()> {
        let (seqno, sent_sys_us, sent_std_us) = read_header(payload)?;
        let now_sys_us = sys_clock_us();
        let now_std_us = steady_clock_us();

        self.jitter.new_sample(sent_std_us, now_std_us);
        self.reorder.submit_sample(seqno);
        self.latency.submit_sample(sent_sys_us, now_sys_us);
        self.delay_factor.submit_sample(sent_sys_us, now_sys_us);

        Ok(())
    }

    /// Same as [`Self::validate_packet`] but additionally checks the payload
    /// against an expected length, feeding the supplemental integrity
    /// estimator.
    pub fn validate_packet_with_length(&mut self, payload: &[u8], expected_len: usize) -> Result<()> {
        let is_correct_length = payload.len() == expected_len;
        let seqno_before = self.reorder.stats().pkts_processed;
        self.validate_packet(payload)?;
        self.integrity
            .submit_sample(seqno_before, is_correct_length, true);
        Ok(())
    }

    /// Human-readable snapshot. Matches the original's observed behavior of
    /// resetting the latency estimator's min/max as a side effect of
    /// producing this string (the smoothed average is retained).
    pub fn stats(&mut self) -> String {
        let r = self.reorder.stats();
        let out = format!(
            "processed={} lost={} reordered={} reorder_dist={} jitter_us={:.1} latency_avg_us={:.1}",
            r.pkts_processed,
            r.pkts_lost,
            r.pkts_reordered,
            r.reorder_dist,
            self.jitter.jitter_us(),
            self.latency.avg_us().unwrap_or(0.0),
        );
        self.latency.reset();
        out
    }

    pub fn stats_csv_header() -> &'static str {
        "processed,lost,reordered,reorder_dist,jitter_us,latency_min_us,latency_max_us,latency_avg_us,delay_factor_us\n"
    }

    /// CSV form. Unlike [`Self::stats`], this does not reset the latency
    /// estimator — a reader diffing successive rows must see undisturbed
    /// state.
    pub fn stats_csv(&self, print_header: bool) -> String {
        let r = self.reorder.stats();
        let mut out = String::new();
        if print_header {
            out.push_str(Self::stats_csv_header());
        }
        out.push_str(&format!(
            "{},{},{},{},{:.1},{},{},{:.1},{}\n",
            r.pkts_processed,
            r.pkts_lost,
            r.pkts_reordered,
            r.reorder_dist,
            self.jitter.jitter_us(),
            self.latency.min_us().unwrap_or(0),
            self.latency.max_us().unwrap_or(0),
            self.latency.avg_us().unwrap_or(0.0),
            self.delay_factor.delay_factor_us(),
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_exactly() {
        let mut buf = [0u8; HEADER_SIZE];
        write_header(&mut buf, 42, 123456789, 987654321).unwrap();
        let (seqno, sys_ts, std_ts) = read_header(&buf).unwrap();
        assert_eq!(seqno, 42);
        assert_eq!(sys_ts, 123456789);
        assert_eq!(std_ts, 987654321);
    }

    #[test]
    fn small_payload_fails_to_write_header() {
        let mut buf = [0u8; 10];
        let err = write_header(&mut buf, 0, 0, 0).unwrap_err();
        assert!(matches!(err, TransmitError::PayloadTooSmall { min_required } if min_required == HEADER_SIZE));
    }

    #[test]
    fn generator_enables_and_increments_seqno() {
        let mut gen = Generator::new(true);
        let mut buf = [0u8; 64];
        gen.generate_payload(&mut buf).unwrap();
        let (seqno, ..) = read_header(&buf).unwrap();
        assert_eq!(seqno, 0);
        gen.generate_payload(&mut buf).unwrap();
        let (seqno, ..) = read_header(&buf).unwrap();
        assert_eq!(seqno, 1);
    }

    #[test]
    fn generator_without_metrics_leaves_seqno_untouched() {
        let mut gen = Generator::new(false);
        let mut buf = [0u8; 64];
        gen.generate_payload(&mut buf).unwrap();
        assert_eq!(gen.seqno, 0);
    }

    #[test]
    fn validator_tracks_loss_across_stream() {
        let mut gen = Generator::new(true);
        let mut validator = Validator::new();
        let mut buf = [0u8; 64];

        gen.generate_payload(&mut buf).unwrap();
        validator.validate_packet(&buf).unwrap();
        gen.generate_payload(&mut buf).unwrap();
        gen.generate_payload(&mut buf).unwrap(); // skip one seqno worth
        validator.validate_packet(&buf).unwrap();

        let csv = validator.stats_csv(false);
        assert!(csv.starts_with("2,1,0,0,"));
    }
}
