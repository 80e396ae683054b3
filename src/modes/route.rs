//! `route` pipeline: pumps bytes from a source connection to a destination
//! connection, each independently reconnecting. If `bidir`, the reverse
//! pump runs concurrently on the destination's own connection loop.
//! Mirrors `route.hpp`/`route.cpp`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::conn::{common_run, Processing, StatsConfig};
use crate::error::Result;
use crate::modes::PeerSlot;
use crate::socket::Socket;

/// One side of a route: publishes its own connected socket into `my_slot`
/// so the other side can find it, and — if `pump` — actively reads from
/// itself and forwards to whatever socket is currently published in
/// `peer_slot`.
pub(crate) struct Endpoint {
    pub(crate) my_slot: Arc<PeerSlot>,
    pub(crate) peer_slot: Arc<PeerSlot>,
    pub(crate) message_size: usize,
    pub(crate) pump: bool,
    /// `forward` terminates the route on any short write; `route` merely
    /// logs and continues.
    pub(crate) strict: bool,
    pub(crate) label: &'static str,
}

#[async_trait]
impl Processing for Endpoint {
    async fn run(&self, conn: Arc<dyn Socket>, force_break: Arc<AtomicBool>) {
        self.my_slot.publish(Arc::clone(&conn));

        if self.pump {
            let mut buf = vec![0u8; self.message_size.max(1316)];
            loop {
                if force_break.load(Ordering::Relaxed) {
                    break;
                }
                match conn.read(&mut buf, 1000).await {
                    Ok(0) => continue,
                    Ok(n) => {
                        let Some(peer) = self.peer_slot.wait_for(&force_break).await else {
                            break;
                        };
                        match peer.write(&buf[..n], -1).await {
                            Ok(sent) if sent == n => {}
                            Ok(sent) if self.strict => {
                                tracing::warn!(label = self.label, sent, n, "ROUTE: short write, terminating");
                                break;
                            }
                            Ok(sent) => {
                                tracing::warn!(label = self.label, sent, n, "ROUTE: short write, continuing");
                            }
                            Err(e) => {
                                tracing::warn!(label = self.label, error = %e, "ROUTE: peer write failed");
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(label = self.label, error = %e, "ROUTE: read failed, connection lost");
                        break;
                    }
                }
            }
        } else {
            while !force_break.load(Ordering::Relaxed) {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
        }

        self.my_slot.clear();
    }
}

pub async fn run(
    src_url: String,
    dst_url: String,
    bidir: bool,
    message_size: usize,
    reconnect: bool,
    cancel: Arc<AtomicBool>,
) -> Result<()> {
    let src_slot = Arc::new(PeerSlot::new());
    let dst_slot = Arc::new(PeerSlot::new());

    let src_ep = Arc::new(Endpoint {
        my_slot: Arc::clone(&src_slot),
        peer_slot: Arc::clone(&dst_slot),
        message_size,
        pump: true,
        strict: false,
        label: "src",
    });
    let dst_ep = Arc::new(Endpoint {
        my_slot: Arc::clone(&dst_slot),
        peer_slot: Arc::clone(&src_slot),
        message_size,
        pump: bidir,
        strict: false,
        label: "dst",
    });

    let src_cancel = Arc::clone(&cancel);
    let src_task = tokio::spawn(async move {
        common_run(&[src_url], &StatsConfig::default(), reconnect, src_cancel, src_ep).await
    });
    let dst_task = tokio::spawn(async move {
        common_run(&[dst_url], &StatsConfig::default(), reconnect, cancel, dst_ep).await
    });

    let (src_result, dst_result) = tokio::join!(src_task, dst_task);
    src_result.expect("route source task panicked")?;
    dst_result.expect("route destination task panicked")?;
    Ok(())
}
