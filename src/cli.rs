//! Command-line interface: one subcommand per mode pipeline (C14), plus the
//! global ambient flags (verbosity, quiet, log file) shared by all of them.
//! Uses `clap`'s derive API, matching the teacher's `cli.rs`.

use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Styles};
use clap::{Parser, Subcommand};

/// Defines the styles for the help message to replicate clap v3's appearance.
fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// A small UDP/reliable-transport exerciser: generates, receives, routes,
/// forwards, and transfers files over `srt://` or `udp://` endpoints, while
/// tracking delivery-quality metrics (reorder, jitter, latency, delay
/// factor, and packet integrity).
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress the colorized stdout summary layer
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed log destination: a file path, or "stderr". Defaults to a
    /// daily-rotating file in the current directory.
    #[arg(long = "log-file", global = true)]
    pub log_file: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open a connection and send paced, optionally metrics-stamped messages
    Generate(GenerateArgs),
    /// Open a connection and read messages until cancelled
    Receive(ReceiveArgs),
    /// Like `receive`, but shares one I/O dispatch thread across sources
    Mreceive(MreceiveArgs),
    /// Pump bytes from a source connection to a destination connection
    Route(RouteArgs),
    /// Bidirectional file-mode transfer between two connections
    Forward(ForwardArgs),
    /// Send a file or directory tree over a connection
    Send(SendArgs),
    /// Receive a file or directory tree sent by `send`
    FileReceive(FileReceiveArgs),
}

#[derive(clap::Args, Debug)]
pub struct ConnArgs {
    /// Endpoint URI(s), e.g. srt://host:port?mode=caller or udp://:9000
    #[arg(required = true, num_args = 1..)]
    pub urls: Vec<String>,

    /// Reconnect automatically on connection loss
    #[arg(long)]
    pub reconnect: bool,

    /// Stats CSV output file (one row per socket per tick)
    #[arg(long = "statsfile", help_heading = "Stats")]
    pub stats_file: Option<PathBuf>,

    /// Stats sampling period in milliseconds
    #[arg(long = "statsfreq", default_value_t = 1000, help_heading = "Stats")]
    pub stats_freq_ms: u64,
}

#[derive(clap::Args, Debug)]
pub struct MetricsArgs {
    /// Stamp/validate the 32-byte sequence and timestamp header on every message
    #[arg(long, help_heading = "Metrics")]
    pub metrics: bool,

    /// Metrics summary output file; omit to log to the console
    #[arg(long = "metricsfile", help_heading = "Metrics")]
    pub metrics_file: Option<PathBuf>,

    /// Metrics sampling period in milliseconds
    #[arg(long = "metricsfreq", default_value_t = 1000, help_heading = "Metrics")]
    pub metrics_freq_ms: u64,
}

#[derive(clap::Args, Debug)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub conn: ConnArgs,
    #[command(flatten)]
    pub metrics: MetricsArgs,

    /// Message size in bytes
    #[arg(short = 's', long, default_value_t = 1316)]
    pub message_size: usize,

    /// Target bitrate in bits per second
    #[arg(short = 'b', long = "bitrate", default_value_t = 1_000_000)]
    pub bitrate_bps: u64,

    /// Number of messages to send; omit for unbounded
    #[arg(short = 'n', long = "num")]
    pub num_messages: Option<u64>,

    /// Run for a fixed duration instead of (or in addition to) `--num`,
    /// e.g. "30s", "5m"
    #[arg(short = 'd', long, value_parser = parse_duration)]
    pub duration: Option<std::time::Duration>,

    /// Busy-spin the pacer instead of sleeping, for sub-millisecond cadence
    #[arg(long)]
    pub spin: bool,

    /// Replay a CSV send-time schedule instead of pacing by bitrate
    #[arg(long = "csv-pacing")]
    pub csv_pacing: Option<PathBuf>,

    /// Drain a reply from the peer after each send (round-trip timing)
    #[arg(long)]
    pub twoway: bool,
}

#[derive(clap::Args, Debug)]
pub struct ReceiveArgs {
    #[command(flatten)]
    pub conn: ConnArgs,
    #[command(flatten)]
    pub metrics: MetricsArgs,

    /// Expected message size in bytes (read buffer sizing)
    #[arg(short = 's', long, default_value_t = 1316)]
    pub message_size: usize,

    /// Echo a short fixed reply for each received message
    #[arg(long)]
    pub reply: bool,
}

#[derive(clap::Args, Debug)]
pub struct MreceiveArgs {
    #[command(flatten)]
    pub metrics: MetricsArgs,

    /// One or more source endpoint URIs, sharing a single dispatch thread
    #[arg(required = true, num_args = 1..)]
    pub urls: Vec<String>,

    /// Reconnect automatically on connection loss
    #[arg(long)]
    pub reconnect: bool,

    /// Expected message size in bytes (read buffer sizing)
    #[arg(short = 's', long, default_value_t = 1316)]
    pub message_size: usize,

    /// Echo a short fixed reply for each received message
    #[arg(long)]
    pub reply: bool,
}

#[derive(clap::Args, Debug)]
pub struct RouteArgs {
    /// Source endpoint URI
    pub src: String,
    /// Destination endpoint URI
    pub dst: String,

    /// Also pump bytes from destination back to source
    #[arg(long)]
    pub bidir: bool,

    /// Reconnect automatically on connection loss
    #[arg(long)]
    pub reconnect: bool,

    /// Message buffer size in bytes
    #[arg(short = 's', long, default_value_t = 1316)]
    pub message_size: usize,
}

#[derive(clap::Args, Debug)]
pub struct ForwardArgs {
    /// Source endpoint URI
    pub src: String,
    /// Destination endpoint URI
    pub dst: String,

    /// Reconnect automatically on connection loss
    #[arg(long)]
    pub reconnect: bool,

    /// Message buffer size in bytes
    #[arg(short = 's', long, default_value_t = 1316)]
    pub message_size: usize,
}

#[derive(clap::Args, Debug)]
pub struct SendArgs {
    /// Endpoint URI to send over
    pub url: String,

    /// File or directory to send
    pub path: PathBuf,

    /// Reconnect automatically on connection loss
    #[arg(long)]
    pub reconnect: bool,

    /// Per-message segment size in bytes, including the status/path header
    #[arg(short = 's', long, default_value_t = 1316)]
    pub segment_size: usize,

    /// List the files that would be sent, without transmitting them
    #[arg(long)]
    pub printout: bool,
}

#[derive(clap::Args, Debug)]
pub struct FileReceiveArgs {
    /// Endpoint URI to receive on
    pub url: String,

    /// Directory to write received files into
    pub output_dir: PathBuf,

    /// Reconnect automatically on connection loss
    #[arg(long)]
    pub reconnect: bool,

    /// Read buffer size in bytes
    #[arg(short = 's', long, default_value_t = 1316)]
    pub message_size: usize,
}

/// Parses human-readable durations ("30s", "5m", "1h", or a bare integer of
/// seconds).
pub fn parse_duration(raw: &str) -> Result<std::time::Duration, String> {
    let raw = raw.trim();
    let (value, unit) = raw.split_at(raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len()));
    let value: u64 = value
        .parse()
        .map_err(|_| format!("invalid duration: '{raw}'"))?;
    let secs = match unit {
        "" | "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        other => return Err(format!("unknown duration unit '{other}' in '{raw}'")),
    };
    Ok(std::time::Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_bare_seconds_and_suffixes() {
        assert_eq!(parse_duration("30").unwrap().as_secs(), 30);
        assert_eq!(parse_duration("30s").unwrap().as_secs(), 30);
        assert_eq!(parse_duration("5m").unwrap().as_secs(), 300);
        assert_eq!(parse_duration("1h").unwrap().as_secs(), 3600);
    }

    #[test]
    fn parse_duration_rejects_unknown_unit() {
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn args_parses_generate_subcommand() {
        let args = Args::parse_from([
            "xtransmit-rs",
            "generate",
            "srt://127.0.0.1:9000",
            "--bitrate",
            "2000000",
        ]);
        match args.command {
            Command::Generate(g) => assert_eq!(g.bitrate_bps, 2_000_000),
            other => panic!("expected Generate, got {other:?}"),
        }
    }
}
