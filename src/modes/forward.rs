//! `forward` pipeline: file-mode bidirectional transfer built on the same
//! C9 socket abstraction as every other mode — not on a separate
//! connection-management type, unlike the legacy `SrtNode`-based
//! implementation excluded per the redesign notes. Mirrors the retained
//! `forward.cpp` (the duplicate translation unit is excluded).
//!
//! Bidirectional by construction; each side's message is delivered in full
//! or the route terminates (a short write is fatal, unlike plain `route`).

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::conn::StatsConfig;
use crate::error::Result;
use crate::modes::route::Endpoint;
use crate::modes::PeerSlot;

pub async fn run(
    src_url: String,
    dst_url: String,
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
        strict: true,
        label: "src",
    });
    let dst_ep = Arc::new(Endpoint {
        my_slot: Arc::clone(&dst_slot),
        peer_slot: Arc::clone(&src_slot),
        message_size,
        pump: true,
        strict: true,
        label: "dst",
    });

    let src_cancel = Arc::clone(&cancel);
    let src_task = tokio::spawn(async move {
        crate::conn::common_run(&[src_url], &StatsConfig::default(), reconnect, src_cancel, src_ep).await
    });
    let dst_task = tokio::spawn(async move {
        crate::conn::common_run(&[dst_url], &StatsConfig::default(), reconnect, cancel, dst_ep).await
    });

    let (src_result, dst_result) = tokio::join!(src_task, dst_task);
    src_result.expect("forward source task panicked")?;
    dst_result.expect("forward destination task panicked")?;
    Ok(())
}
