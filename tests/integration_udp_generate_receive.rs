use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use xtransmit_rs::conn::StatsConfig;
use xtransmit_rs::modes::generate::{self, GenerateConfig};
use xtransmit_rs::modes::receive::{self, ReceiveConfig};
use xtransmit_rs::modes::MetricsConfig;

/// A lightweight smoke test that generate/receive can complete an
/// end-to-end UDP run without error, the way the teacher's process-level
/// smoke tests check a full mechanism round trip rather than asserting on
/// precise byte counts.
#[tokio::test]
async fn udp_generate_to_receive_smoke() {
    let port = 21445;
    let server_url = format!("udp://:{port}?blocking=0");
    let client_url = format!("udp://127.0.0.1:{port}?blocking=0");

    let receive_cancel = Arc::new(AtomicBool::new(false));
    let receive_handle = {
        let cancel = Arc::clone(&receive_cancel);
        tokio::spawn(async move {
            receive::run(
                &[server_url],
                StatsConfig::default(),
                false,
                cancel,
                ReceiveConfig {
                    message_size: 128,
                    enable_metrics: true,
                    reply: false,
                },
                MetricsConfig::default(),
            )
            .await
        })
    };

    // Give the receive side a moment to bind before the generator starts.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let generate_cancel = Arc::new(AtomicBool::new(false));
    let generate_handle = {
        let cancel = Arc::clone(&generate_cancel);
        tokio::spawn(async move {
            generate::run(
                &[client_url],
                StatsConfig::default(),
                false,
                cancel,
                GenerateConfig {
                    message_size: 128,
                    bitrate_bps: 1_000_000,
                    num_messages: Some(20),
                    duration: None,
                    enable_metrics: true,
                    spin: false,
                    csv_pacing: None,
                    twoway: false,
                },
            )
            .await
        })
    };

    generate_handle.await.expect("generate task panicked").expect("generate returned error");

    tokio::time::sleep(Duration::from_millis(100)).await;
    receive_cancel.store(true, Ordering::Relaxed);
    receive_handle.await.expect("receive task panicked").expect("receive returned error");
}
