//! Connection/worker orchestration (C13): resolves a list of endpoint URIs
//! into a live socket (single link, group, or UDP), then hands it to a
//! pipeline for processing in a reconnect loop. Mirrors `misc.cpp`'s
//! `create_connection`/`common_run` and `thread_conn.cpp`'s
//! `connection_loop`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Result, TransmitError};
use crate::scheduler::Scheduler;
use crate::socket::srt_group::{group_is_listener, GroupSocket};
use crate::socket::srt_single::SrtSingle;
use crate::socket::udp::{Mudp, Udp};
use crate::socket::{ConnMode, Socket};
use crate::stats_writer::StatsWriter;
use crate::uri::EndpointUri;

const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default)]
pub struct StatsConfig {
    pub file: Option<PathBuf>,
    pub freq_ms: u64,
}

/// A connection-level pipeline: receives a live connected socket and the
/// shared cancellation flag, and runs until the socket closes or
/// `force_break` is observed.
#[async_trait]
pub trait Processing: Send + Sync {
    async fn run(&self, conn: Arc<dyn Socket>, force_break: Arc<AtomicBool>);
}

/// Holds at most one listening socket across reconnect attempts, so a
/// listener is created once and re-`accept`ed on every subsequent
/// iteration rather than rebound.
enum Listening {
    None,
    Single(Arc<SrtSingle>),
    Group(Arc<GroupSocket>),
}

async fn create_connection(
    uris: &[EndpointUri],
    listening: &mut Listening,
    scheduler: &Arc<Scheduler>,
) -> Result<Arc<dyn Socket>> {
    if uris.is_empty() {
        return Err(TransmitError::OptionInvalid {
            name: "url".into(),
            value: String::new(),
        });
    }

    let is_group = uris.len() > 1 || uris[0].has_option("grouptype");

    if is_group {
        let group = match listening {
            Listening::Group(g) => Arc::clone(g),
            _ => {
                let g = if group_is_listener(uris) {
                    GroupSocket::listen(uris.to_vec(), Arc::clone(scheduler)).await?
                } else {
                    GroupSocket::connect(uris.to_vec(), Arc::clone(scheduler)).await?
                };
                *listening = Listening::Group(Arc::clone(&g));
                g
            }
        };

        if matches!(group.mode(), ConnMode::Listener) {
            group.accept().await?;
        } else {
            *listening = Listening::None;
        }

        return Ok(group as Arc<dyn Socket>);
    }

    let uri = &uris[0];

    if uri.transport == "udp" {
        return if uri.option_bool("multi", false) {
            Ok(Arc::new(Mudp::from_uri(uri).await?) as Arc<dyn Socket>)
        } else {
            Ok(Arc::new(Udp::from_uri(uri).await?) as Arc<dyn Socket>)
        };
    }

    // srt / any other transport identifier is handled by the reliable
    // single-link socket.
    let single = match listening {
        Listening::Single(s) => Arc::clone(s),
        _ => {
            let s = Arc::new(SrtSingle::from_uri(uri)?);
            if matches!(s.mode(), ConnMode::Listener) {
                s.listen()?;
            }
            *listening = Listening::Single(Arc::clone(&s));
            s
        }
    };

    let connection: Arc<dyn Socket> = match single.mode() {
        ConnMode::Listener => match single.accept().await {
            Ok(accepted) => Arc::new(accepted),
            Err(e) => {
                *listening = Listening::None;
                return Err(e);
            }
        },
        ConnMode::Caller | ConnMode::Rendezvous => {
            single.connect_to(uri).await?;
            single as Arc<dyn Socket>
        }
    };

    if !matches!(single.mode(), ConnMode::Listener) {
        *listening = Listening::None;
    }

    Ok(connection)
}

/// Parses, connects, and runs `processing` in a loop: `reconnect = false`
/// runs the pipeline exactly once; `reconnect = true` repeats with a
/// fixed 1-second back-off until `force_break` is set or a connection
/// cannot be created at all.
pub async fn common_run(
    urls: &[String],
    stats_cfg: &StatsConfig,
    reconnect: bool,
    force_break: Arc<AtomicBool>,
    processing: Arc<dyn Processing>,
) -> Result<()> {
    if urls.is_empty() {
        return Err(TransmitError::OptionInvalid {
            name: "url".into(),
            value: String::new(),
        });
    }

    let stats = match (&stats_cfg.file, stats_cfg.freq_ms) {
        (Some(file), freq_ms) if freq_ms > 0 => {
            Some(StatsWriter::new(file, Duration::from_millis(freq_ms))?)
        }
        _ => None,
    };

    let parsed: Vec<EndpointUri> = urls
        .iter()
        .map(|u| {
            EndpointUri::parse(u).ok_or_else(|| TransmitError::OptionInvalid {
                name: "url".into(),
                value: u.clone(),
            })
        })
        .collect::<Result<_>>()?;

    let scheduler = Arc::new(Scheduler::new());
    let listening = Mutex::new(Listening::None);
    let mut next_reconnect = Instant::now();

    loop {
        let now = Instant::now();
        if now < next_reconnect {
            tokio::time::sleep(next_reconnect - now).await;
        }
        next_reconnect = Instant::now() + RECONNECT_INTERVAL;

        let conn = {
            let mut guard = listening.lock();
            match create_connection(&parsed, &mut guard, &scheduler).await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "CONN: failed to establish connection");
                    if reconnect && !force_break.load(Ordering::Relaxed) {
                        continue;
                    }
                    return Err(e);
                }
            }
        };

        if !reconnect {
            *listening.lock() = Listening::None;
        }

        if let Some(stats) = &stats {
            stats.add_socket(Arc::clone(&conn));
        }

        processing.run(Arc::clone(&conn), Arc::clone(&force_break)).await;

        if let Some(stats) = &stats {
            stats.remove_socket(conn.id());
        }

        if !reconnect || force_break.load(Ordering::Relaxed) {
            break;
        }
    }

    Ok(())
}
