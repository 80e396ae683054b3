//! Plain UDP socket (C9 §4.8.3), mirroring `udp_socket.hpp`/`.cpp`: a single
//! `udp` flavor doing one `recv`/`sendto` per call, and a multi-message
//! `mudp` flavor that caches a batch of datagrams per underlying read.
//!
//! The original batches with a single `recvmmsg` syscall; the standard
//! library has no such primitive, so `Mudp` approximates it with up to
//! `MAX_SINGLE_READ` back-to-back non-blocking `recv_from` calls per
//! refill. Externally the behavior is identical: one cached datagram
//! per `read`, refilled only once the cache is drained.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::UdpSocket as TokioUdpSocket;

use crate::addr::{resolve, Family};
use crate::error::{Result, TransmitError};
use crate::socket::{ConnMode, Socket, SocketId};
use crate::uri::EndpointUri;

const MAX_SINGLE_READ: usize = 64;
const SELECT_SLICE: Duration = Duration::from_millis(10);

struct UdpBase {
    inner: TokioUdpSocket,
    dest: Option<SocketAddr>,
    blocking: bool,
    id: SocketId,
}

impl UdpBase {
    async fn from_uri(uri: &EndpointUri) -> Result<Self> {
        let blocking = uri.option_bool("blocking", false);

        let bind_addr = if let Some(bind_opt) = uri.option("bind") {
            let (host, port) = match bind_opt.rsplit_once(':') {
                Some((h, p)) => (h, p.parse().unwrap_or(uri.port)),
                None => (bind_opt.as_str(), uri.port),
            };
            resolve(host, port, Family::V4)?
        } else if uri.host.is_empty() {
            resolve("", uri.port, Family::V4)?
        } else {
            resolve("", 0, Family::V4)?
        };

        let socket = TokioUdpSocket::bind(bind_addr)
            .await
            .map_err(|e| TransmitError::BindFailed {
                address: bind_addr.to_string(),
                os_err: e.to_string(),
            })?;

        let dest = if !uri.host.is_empty() {
            Some(resolve(&uri.host, uri.port, Family::V4)?)
        } else {
            None
        };

        if let Some(d) = dest {
            socket.connect(d).await.map_err(|e| TransmitError::ConnectFailed {
                reason: e.to_string(),
            })?;
        }

        let id = socket
            .local_addr()
            .map(|a| a.port() as SocketId)
            .unwrap_or(-1);

        Ok(Self {
            inner: socket,
            dest,
            blocking,
            id,
        })
    }

    /// Emulates the original's 10ms-slice `select` loop: a negative
    /// `timeout_ms` waits indefinitely, `0` polls once, a positive value
    /// waits up to that many milliseconds.
    async fn wait_readable(&self, timeout_ms: i64) -> Result<bool> {
        if self.blocking {
            return Ok(true);
        }

        if timeout_ms < 0 {
            loop {
                match tokio::time::timeout(SELECT_SLICE, self.inner.readable()).await {
                    Ok(Ok(())) => return Ok(true),
                    Ok(Err(e)) => {
                        return Err(TransmitError::TransportError {
                            op: "select",
                            os_err: e.to_string(),
                            diag: String::new(),
                        })
                    }
                    Err(_) => continue,
                }
            }
        }

        match tokio::time::timeout(Duration::from_millis(timeout_ms as u64), self.inner.readable()).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => Err(TransmitError::TransportError {
                op: "select",
                os_err: e.to_string(),
                diag: String::new(),
            }),
            Err(_) => Ok(false),
        }
    }

    async fn wait_writable(&self, timeout_ms: i64) -> Result<bool> {
        if self.blocking {
            return Ok(true);
        }

        if timeout_ms < 0 {
            loop {
                match tokio::time::timeout(SELECT_SLICE, self.inner.writable()).await {
                    Ok(Ok(())) => return Ok(true),
                    Ok(Err(e)) => {
                        return Err(TransmitError::TransportError {
                            op: "select",
                            os_err: e.to_string(),
                            diag: String::new(),
                        })
                    }
                    Err(_) => continue,
                }
            }
        }

        match tokio::time::timeout(Duration::from_millis(timeout_ms as u64), self.inner.writable()).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => Err(TransmitError::TransportError {
                op: "select",
                os_err: e.to_string(),
                diag: String::new(),
            }),
            Err(_) => Ok(false),
        }
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        match self.inner.try_recv(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_retryable(&e) => Ok(0),
            Err(e) => Err(TransmitError::TransportError {
                op: "read",
                os_err: e.to_string(),
                diag: String::new(),
            }),
        }
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        let result = match self.dest {
            Some(dest) => self.inner.try_send_to(buf, dest),
            None => self.inner.try_send(buf),
        };
        match result {
            Ok(n) => Ok(n),
            Err(e) if is_retryable(&e) => Ok(0),
            Err(e) => Err(TransmitError::TransportError {
                op: "write",
                os_err: e.to_string(),
                diag: String::new(),
            }),
        }
    }
}

fn is_retryable(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted | std::io::ErrorKind::ConnectionRefused
    )
}

/// Single-message flavor: one `recv`/`sendto` per call.
pub struct Udp {
    base: UdpBase,
}

impl Udp {
    pub async fn from_uri(uri: &EndpointUri) -> Result<Self> {
        Ok(Self {
            base: UdpBase::from_uri(uri).await?,
        })
    }
}

#[async_trait]
impl Socket for Udp {
    fn id(&self) -> SocketId {
        self.base.id
    }

    fn is_caller(&self) -> bool {
        self.base.dest.is_some()
    }

    fn mode(&self) -> ConnMode {
        ConnMode::Caller
    }

    async fn read(&self, buf: &mut [u8], timeout_ms: i64) -> Result<usize> {
        if !self.base.wait_readable(timeout_ms).await? {
            return Ok(0);
        }
        self.base.recv(buf).await
    }

    async fn write(&self, buf: &[u8], timeout_ms: i64) -> Result<usize> {
        if !self.base.wait_writable(timeout_ms).await? {
            return Ok(0);
        }
        self.base.send(buf).await
    }
}

/// Multi-message flavor: caches up to `MAX_SINGLE_READ` datagrams per
/// refill, handing one out per `read`. The cache lives behind a `Mutex`
/// so `read` can take `&self`, matching the rest of the `Socket` trait.
pub struct Mudp {
    base: UdpBase,
    cache: Mutex<VecDeque<Vec<u8>>>,
}

impl Mudp {
    pub async fn from_uri(uri: &EndpointUri) -> Result<Self> {
        Ok(Self {
            base: UdpBase::from_uri(uri).await?,
            cache: Mutex::new(VecDeque::new()),
        })
    }

    async fn refill(&self) -> Result<()> {
        let mut scratch = [0u8; 65_536];
        let mut filled = Vec::with_capacity(MAX_SINGLE_READ);
        for _ in 0..MAX_SINGLE_READ {
            match self.base.inner.try_recv(&mut scratch) {
                Ok(n) => filled.push(scratch[..n].to_vec()),
                Err(e) if is_retryable(&e) => break,
                Err(e) => {
                    return Err(TransmitError::TransportError {
                        op: "read",
                        os_err: e.to_string(),
                        diag: String::new(),
                    })
                }
            }
        }
        self.cache.lock().extend(filled);
        Ok(())
    }
}

#[async_trait]
impl Socket for Mudp {
    fn id(&self) -> SocketId {
        self.base.id
    }

    fn is_caller(&self) -> bool {
        self.base.dest.is_some()
    }

    fn mode(&self) -> ConnMode {
        ConnMode::Caller
    }

    async fn read(&self, buf: &mut [u8], timeout_ms: i64) -> Result<usize> {
        if self.cache.lock().is_empty() {
            if !self.base.wait_readable(timeout_ms).await? {
                return Ok(0);
            }
            self.refill().await?;
        }

        // Held across the length check and the pop so a concurrent reader on
        // a cloned `Arc<dyn Socket>` can't drain the cache between the two.
        let mut cache = self.cache.lock();
        let Some(len) = cache.front().map(Vec::len) else {
            return Ok(0);
        };
        if buf.len() < len {
            return Err(TransmitError::BufferTooSmall { message_size: len });
        }
        let datagram = cache.pop_front().unwrap();
        drop(cache);

        buf[..datagram.len()].copy_from_slice(&datagram);
        Ok(datagram.len())
    }

    async fn write(&self, buf: &[u8], timeout_ms: i64) -> Result<usize> {
        if !self.base.wait_writable(timeout_ms).await? {
            return Ok(0);
        }
        self.base.send(buf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn udp_loopback_round_trip() {
        let server_uri = EndpointUri::parse("udp://:0?blocking=0").unwrap();
        let server = Udp::from_uri(&server_uri).await.unwrap();
        let server_addr: SocketAddr = server.base.inner.local_addr().unwrap();

        let client_uri = EndpointUri::parse(&format!("udp://127.0.0.1:{}?blocking=0", server_addr.port())).unwrap();
        let client = Udp::from_uri(&client_uri).await.unwrap();

        let payload = b"hello";
        let mut sent = 0;
        for _ in 0..50 {
            sent = client.write(payload, 0).await.unwrap();
            if sent > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sent, payload.len());

        let mut buf = [0u8; 64];
        let mut received = 0;
        for _ in 0..50 {
            received = server.read(&mut buf, 100).await.unwrap();
            if received > 0 {
                break;
            }
        }
        assert_eq!(received, payload.len());
        assert_eq!(&buf[..received], payload);
    }

    #[tokio::test]
    async fn mudp_reports_buffer_too_small() {
        let uri = EndpointUri::parse("udp://:0?blocking=0").unwrap();
        let mudp = Mudp::from_uri(&uri).await.unwrap();
        mudp.cache.lock().push_back(vec![0u8; 10]);
        let mut tiny = [0u8; 4];
        let err = mudp.read(&mut tiny, 0).await.unwrap_err();
        assert!(matches!(err, TransmitError::BufferTooSmall { message_size } if message_size == 10));
    }
}
