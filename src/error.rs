//! Error taxonomy shared by every layer of the transmit pipeline.
//!
//! Construction-time failures (bad options, bad addresses, missing files) are
//! fatal to the pipeline that raised them. Runtime transport failures are
//! caught by the connection loop and may trigger a reconnect.

use thiserror::Error;

/// The single tagged-sum error type used across the socket, pacer, and
/// metrics-codec layers.
#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("invalid option '{name}' = '{value}'")]
    OptionInvalid { name: String, value: String },

    #[error("invalid address: host='{host}' port={port}")]
    AddressInvalid { host: String, port: u16 },

    #[error("bind to {address} failed: {os_err}")]
    BindFailed { address: String, os_err: String },

    #[error("connect failed: {reason}")]
    ConnectFailed { reason: String },

    #[error("listen failed: {os_err}")]
    ListenFailed { os_err: String },

    #[error("accept failed: {reason}")]
    AcceptFailed { reason: String },

    #[error("transport error during {op}: {os_err} ({diag})")]
    TransportError {
        op: &'static str,
        os_err: String,
        diag: String,
    },

    #[error("payload too small: at least {min_required} bytes required")]
    PayloadTooSmall { min_required: usize },

    #[error("destination buffer too small for a {message_size}-byte message")]
    BufferTooSmall { message_size: usize },

    #[error("csv pacer file not found: {0}")]
    CsvMissing(String),

    #[error("csv pacer parse error on line {0}")]
    CsvParseError(usize),
}

pub type Result<T> = std::result::Result<T, TransmitError>;
