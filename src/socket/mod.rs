//! Socket abstraction (C9): a uniform, polymorphic I/O surface over the
//! reliable transport's single-link and group ("bonding") variants, and
//! plain UDP.
//!
//! Mirrors `socket.hpp`'s `isocket` interface. `timeout_ms` follows one
//! convention everywhere: negative = infinite wait, zero = non-blocking
//! poll, positive = wait up to that many milliseconds — never leaking the
//! blocking/non-blocking choice across the trait boundary.

pub mod srt_group;
pub mod srt_single;
pub(crate) mod srt_sys;
pub mod udp;

use async_trait::async_trait;

use crate::error::Result;

pub type SocketId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnMode {
    Caller,
    Listener,
    Rendezvous,
}

/// The capability surface shared by every concrete transport variant.
#[async_trait]
pub trait Socket: Send + Sync {
    fn id(&self) -> SocketId;

    fn is_caller(&self) -> bool;

    fn mode(&self) -> ConnMode;

    /// Reads into `buf`, returning the number of bytes read. Returns `0` on
    /// a `timeout_ms`-bounded timeout — timeouts are not errors.
    async fn read(&self, buf: &mut [u8], timeout_ms: i64) -> Result<usize>;

    /// Writes `buf`, returning the number of bytes written. Returns `0` on a
    /// transient send-full condition.
    async fn write(&self, buf: &[u8], timeout_ms: i64) -> Result<usize>;

    fn supports_statistics(&self) -> bool {
        false
    }

    fn statistics_csv(&self, _print_header: bool) -> String {
        String::new()
    }

    /// Packets still in flight (unacknowledged) on the send side, i.e. the
    /// transport's `getsndbuffer`-equivalent. `None` when the concrete
    /// transport cannot report it (plain UDP has no send buffer to drain).
    fn pending_send_packets(&self) -> Option<i32> {
        None
    }
}

/// The 33-column stats row shared by every transport variant that supports
/// statistics (§6). Constructed from whatever `bstats`-equivalent snapshot
/// the concrete transport returns.
#[derive(Debug, Clone, Default)]
pub struct LinkStats {
    pub timepoint: i64,
    pub time_us: i64,
    pub socket_id: SocketId,
    pub pkt_flow_window: i32,
    pub pkt_congestion_window: i32,
    pub pkt_flight_size: i32,
    pub ms_rtt: f64,
    pub mbps_bandwidth: f64,
    pub mbps_max_bw: f64,
    pub pkt_sent: i64,
    pub pkt_snd_loss: i32,
    pub pkt_snd_drop: i32,
    pub pkt_retrans: i32,
    pub byte_sent: u64,
    pub byte_avail_snd_buf: i32,
    pub byte_snd_drop: u64,
    pub mbps_send_rate: f64,
    pub us_pkt_snd_period: f64,
    pub ms_snd_buf: i32,
    pub pkt_recv: i64,
    pub pkt_rcv_loss: i32,
    pub pkt_rcv_drop: i32,
    pub pkt_rcv_retrans: i32,
    pub pkt_rcv_belated: i64,
    pub byte_recv: u64,
    pub byte_avail_rcv_buf: i32,
    pub byte_rcv_loss: u64,
    pub byte_rcv_drop: u64,
    pub mbps_recv_rate: f64,
    pub ms_rcv_buf: i32,
    pub ms_rcv_tsbpd_delay: i32,
    pub pkt_reorder_tolerance: i32,
    pub pkt_sent_unique: i64,
    pub pkt_recv_unique: i64,
}

pub const STATS_CSV_HEADER: &str = "Timepoint,Time,SocketID,pktFlowWindow,pktCongestionWindow,pktFlightSize,msRTT,mbpsBandwidth,mbpsMaxBW,pktSent,pktSndLoss,pktSndDrop,pktRetrans,byteSent,byteAvailSndBuf,byteSndDrop,mbpsSendRate,usPktSndPeriod,msSndBuf,pktRecv,pktRcvLoss,pktRcvDrop,pktRcvRetrans,pktRcvBelated,byteRecv,byteAvailRcvBuf,byteRcvLoss,byteRcvDrop,mbpsRecvRate,msRcvBuf,msRcvTsbPdDelay,pktReorderTolerance,pktSentUnique,pktRecvUnique\n";

impl LinkStats {
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{:.3},{:.3},{:.3},{},{},{},{},{},{},{},{:.3},{:.3},{},{},{},{},{},{},{},{},{},{},{:.3},{},{},{},{},{}\n",
            self.timepoint,
            self.time_us,
            self.socket_id,
            self.pkt_flow_window,
            self.pkt_congestion_window,
            self.pkt_flight_size,
            self.ms_rtt,
            self.mbps_bandwidth,
            self.mbps_max_bw,
            self.pkt_sent,
            self.pkt_snd_loss,
            self.pkt_snd_drop,
            self.pkt_retrans,
            self.byte_sent,
            self.byte_avail_snd_buf,
            self.byte_snd_drop,
            self.mbps_send_rate,
            self.us_pkt_snd_period,
            self.ms_snd_buf,
            self.pkt_recv,
            self.pkt_rcv_loss,
            self.pkt_rcv_drop,
            self.pkt_rcv_retrans,
            self.pkt_rcv_belated,
            self.byte_recv,
            self.byte_avail_rcv_buf,
            self.byte_rcv_loss,
            self.byte_rcv_drop,
            self.mbps_recv_rate,
            self.ms_rcv_buf,
            self.ms_rcv_tsbpd_delay,
            self.pkt_reorder_tolerance,
            self.pkt_sent_unique,
            self.pkt_recv_unique,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_row_has_one_newline_and_matches_header_arity() {
        let stats = LinkStats::default();
        let row = stats.to_csv_row();
        assert_eq!(row.matches('\n').count(), 1);
        assert_eq!(
            STATS_CSV_HEADER.trim_end().split(',').count(),
            row.trim_end().split(',').count()
        );
    }
}
