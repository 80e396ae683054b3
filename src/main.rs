//! # xtransmit-rs — entry point
//!
//! Parses the CLI, installs the cancellation/interrupt signal handling, sets
//! up structured logging, and dispatches to the selected mode pipeline
//! (C14). Mirrors the original tool's `main.cpp` dispatch and the teacher's
//! own layered-`tracing-subscriber` setup in spirit.

use anyhow::Result;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

use xtransmit_rs::cli::{Args, Command};
use xtransmit_rs::conn::StatsConfig;
use xtransmit_rs::logging::ColorizedFormatter;
use xtransmit_rs::modes::{self, MetricsConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configure logging level based on verbosity flags.
    // - default: INFO
    // -v: DEBUG
    // -vv and more: TRACE
    let log_level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    // The guard must be kept alive for the duration of the program for file logging.
    let guard;
    let detailed_log_layer;

    if let Some("stderr") = args.log_file.as_deref() {
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(log_level)
            .boxed();
        guard = None;
    } else {
        let file_appender = match args.log_file.as_deref() {
            Some(path_str) => {
                let log_path = std::path::Path::new(path_str);
                let log_dir = log_path.parent().unwrap_or_else(|| std::path::Path::new("."));
                let log_filename = log_path
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("xtransmit.log"));
                tracing_appender::rolling::daily(log_dir, log_filename)
            }
            None => tracing_appender::rolling::daily(".", "xtransmit.log"),
        };
        let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_filter(log_level)
            .boxed();
        guard = Some(file_guard);
    }

    let stdout_log = if !args.quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(ColorizedFormatter)
                .with_filter(log_level),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(detailed_log_layer)
        .with(stdout_log)
        .init();

    // Keep the logging guard alive for the duration of the program; dropping
    // it immediately would stop file logging.
    let _log_guard = guard;

    let cancel = Arc::new(AtomicBool::new(false));
    // Suppresses automatic outer-loop reconnection in forward mode once the
    // user has explicitly interrupted the process (§6).
    let interrupt = Arc::new(AtomicBool::new(false));
    install_signal_handlers(Arc::clone(&cancel), Arc::clone(&interrupt));

    info!("starting xtransmit-rs");

    let result = run_command(args.command, cancel, interrupt).await;

    match &result {
        Ok(()) => info!("xtransmit-rs finished"),
        Err(e) => error!(error = %e, "xtransmit-rs exiting with error"),
    }

    result
}

/// Installs SIGINT/SIGTERM handling that flips the shared cancel and
/// interrupt flags. Runs as a top-level background task for the lifetime of
/// the process.
fn install_signal_handlers(cancel: Arc<AtomicBool>, interrupt: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }

        info!("signal received, shutting down");
        cancel.store(true, Ordering::Relaxed);
        interrupt.store(true, Ordering::Relaxed);
    });
}

// `_interrupt` mirrors §6's forward-mode reconnect suppression flag; this
// binary has no outer CLI-level retry loop for it to gate, since each
// subcommand dispatches to exactly one pipeline invocation.
async fn run_command(command: Command, cancel: Arc<AtomicBool>, _interrupt: Arc<AtomicBool>) -> Result<()> {
    match command {
        Command::Generate(args) => {
            let stats_cfg = StatsConfig {
                file: args.conn.stats_file,
                freq_ms: args.conn.stats_freq_ms,
            };
            let cfg = modes::generate::GenerateConfig {
                message_size: args.message_size,
                bitrate_bps: args.bitrate_bps,
                num_messages: args.num_messages,
                duration: args.duration,
                enable_metrics: args.metrics.metrics,
                spin: args.spin,
                csv_pacing: args.csv_pacing,
                twoway: args.twoway,
            };
            modes::generate::run(&args.conn.urls, stats_cfg, args.conn.reconnect, cancel, cfg).await?;
        }
        Command::Receive(args) => {
            let stats_cfg = StatsConfig {
                file: args.conn.stats_file,
                freq_ms: args.conn.stats_freq_ms,
            };
            let cfg = modes::receive::ReceiveConfig {
                message_size: args.message_size,
                enable_metrics: args.metrics.metrics,
                reply: args.reply,
            };
            let metrics_cfg = MetricsConfig {
                enabled: args.metrics.metrics,
                file: args.metrics.metrics_file,
                freq_ms: args.metrics.metrics_freq_ms,
            };
            modes::receive::run(&args.conn.urls, stats_cfg, args.conn.reconnect, cancel, cfg, metrics_cfg).await?;
        }
        Command::Mreceive(args) => {
            let cfg = modes::receive::ReceiveConfig {
                message_size: args.message_size,
                enable_metrics: args.metrics.metrics,
                reply: args.reply,
            };
            let metrics_cfg = MetricsConfig {
                enabled: args.metrics.metrics,
                file: args.metrics.metrics_file,
                freq_ms: args.metrics.metrics_freq_ms,
            };
            modes::mreceive::run(args.urls, StatsConfig::default(), args.reconnect, cancel, cfg, metrics_cfg).await?;
        }
        Command::Route(args) => {
            modes::route::run(args.src, args.dst, args.bidir, args.message_size, args.reconnect, cancel).await?;
        }
        Command::Forward(args) => {
            modes::forward::run(args.src, args.dst, args.message_size, args.reconnect, cancel).await?;
        }
        Command::Send(args) => {
            let cfg = modes::file_send::FileSendConfig {
                path: args.path,
                segment_size: args.segment_size,
                printout: args.printout,
            };
            modes::file_send::run(&[args.url], StatsConfig::default(), args.reconnect, cancel, cfg).await?;
        }
        Command::FileReceive(args) => {
            let cfg = modes::file_receive::FileReceiveConfig {
                output_dir: args.output_dir,
                message_size: args.message_size,
            };
            modes::file_receive::run(&[args.url], StatsConfig::default(), args.reconnect, cancel, cfg).await?;
        }
    }

    Ok(())
}
