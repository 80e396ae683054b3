//! # xtransmit-rs
//!
//! A small exerciser for a UDP-based reliable-messaging transport: generates,
//! receives, routes, forwards, and transfers files over `srt://`/`udp://`
//! endpoints, with streaming delivery-quality metrics (reorder, jitter,
//! latency, delay factor, integrity) alongside the transport's own link
//! statistics.

pub mod addr;
pub mod buffer;
pub mod cli;
pub mod conn;
pub mod error;
pub mod io_dispatch;
pub mod logging;
pub mod metrics;
pub mod metrics_writer;
pub mod modes;
pub mod packet;
pub mod pacer;
pub mod scheduler;
pub mod socket;
pub mod stats_writer;
pub mod uri;

pub use error::{Result, TransmitError};

/// The current version of this tool.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
