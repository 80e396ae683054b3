//! Reliable group ("bonding") socket (C9 §4.8.2), mirroring
//! `srt_socket_group.hpp`/`.cpp`: several member links aggregated behind one
//! logical socket, each with a weight and a broadcast-or-backup group type.
//!
//! The original's C callback (`connect_callback_fn`) closes back over a raw
//! `this` pointer and re-dials a failed member from inside the SRT library's
//! own thread. Here the callback instead holds a `Weak` handle and hands the
//! redial to the scheduler (C8), so a dropped group never receives a
//! reconnect callback on freed memory.
//!
//! Per §3, a group has its own transport-level handle distinct from any
//! member's, and each member is identified by a `token` assigned at
//! endpoint configuration — stable across reconnects — never by its
//! position in a member list.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Result, TransmitError};
use crate::scheduler::Scheduler;
use crate::socket::srt_single::SrtSingle;
use crate::socket::srt_sys;
use crate::socket::{ConnMode, LinkStats, Socket, SocketId, STATS_CSV_HEADER};
use crate::uri::EndpointUri;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupType {
    Broadcast,
    Backup,
}

impl GroupType {
    fn detect(uris: &[EndpointUri]) -> Result<Self> {
        match uris.first().and_then(|u| u.option("grouptype")) {
            None => Ok(GroupType::Broadcast),
            Some("broadcast") => Ok(GroupType::Broadcast),
            Some("backup") => Ok(GroupType::Backup),
            Some(other) => Err(TransmitError::OptionInvalid {
                name: "grouptype".into(),
                value: other.into(),
            }),
        }
    }

    fn as_raw(self) -> i32 {
        match self {
            GroupType::Broadcast => srt_sys::SRT_GTYPE_BROADCAST,
            GroupType::Backup => srt_sys::SRT_GTYPE_BACKUP,
        }
    }
}

/// Whether a group's URIs describe a listener-side or caller-side bonding
/// group, the same `mode=` convention `SrtSingle::from_uri` uses for a
/// single link, applied to the group's first URI as representative.
pub fn group_is_listener(uris: &[EndpointUri]) -> bool {
    match uris[0].option("mode") {
        Some("listener") => true,
        Some(_) => false,
        None => uris[0].host.is_empty(),
    }
}

/// Resolves a single URI's `mode=` the same way `SrtSingle::from_uri` does,
/// without yet enforcing that groups forbid rendezvous — that rejection
/// happens in `validate_group_uris` below, once every URI's mode is known.
fn resolve_mode(uri: &EndpointUri) -> Result<ConnMode> {
    match uri.option("mode").unwrap_or("default") {
        "caller" => Ok(ConnMode::Caller),
        "listener" => Ok(ConnMode::Listener),
        "rendezvous" => Ok(ConnMode::Rendezvous),
        "default" => Ok(if uri.host.is_empty() {
            ConnMode::Listener
        } else {
            ConnMode::Caller
        }),
        other => Err(TransmitError::OptionInvalid {
            name: "mode".into(),
            value: other.into(),
        }),
    }
}

/// §4.8.2's mandatory pre-validation: every URI must name the same
/// transport kind and resolve to the same mode, and rendezvous is
/// disallowed for groups (§3's member invariant). Run before any native
/// group resource is created, so a rejected group never leaks an
/// `srt_create_group` handle.
fn validate_group_uris(uris: &[EndpointUri]) -> Result<ConnMode> {
    let first_transport = &uris[0].transport;
    let first_mode = resolve_mode(&uris[0])?;

    if first_mode == ConnMode::Rendezvous {
        return Err(TransmitError::OptionInvalid {
            name: "mode".into(),
            value: "rendezvous".into(),
        });
    }

    for uri in &uris[1..] {
        if &uri.transport != first_transport {
            return Err(TransmitError::OptionInvalid {
                name: "transport".into(),
                value: uri.transport.clone(),
            });
        }

        let mode = resolve_mode(uri)?;
        if mode == ConnMode::Rendezvous {
            return Err(TransmitError::OptionInvalid {
                name: "mode".into(),
                value: "rendezvous".into(),
            });
        }
        if mode != first_mode {
            return Err(TransmitError::OptionInvalid {
                name: "mode".into(),
                value: format!("{mode:?}"),
            });
        }
    }

    Ok(first_mode)
}

/// Per-URI member weight, §4.8.2: `0..=32767`, default `0`.
fn detect_link_weight(uri: &EndpointUri) -> Result<u16> {
    match uri.option("weight") {
        None => Ok(0),
        Some(raw) => {
            let weight: i64 = raw.parse().map_err(|_| TransmitError::OptionInvalid {
                name: "weight".into(),
                value: raw.into(),
            })?;
            if !(0..=32767).contains(&weight) {
                return Err(TransmitError::OptionInvalid {
                    name: "weight".into(),
                    value: raw.into(),
                });
            }
            Ok(weight as u16)
        }
    }
}

struct Member {
    uri: Option<EndpointUri>,
    weight: u16,
    /// Assigned once at configuration (caller side) or learned from the
    /// transport's own member table on first sighting (listener side);
    /// stable across reconnects, never a vector index.
    token: i32,
    link: Option<Arc<SrtSingle>>,
}

/// A group of member links presented to callers as one `Socket`. `read`
/// pulls from the first member with data ready; `write` fans out to every
/// active member in `Broadcast` mode, or to the single active member in
/// `Backup` mode.
pub struct GroupSocket {
    /// The group's own transport handle (`srt_create_group`), distinct from
    /// any member's socket handle.
    id: SocketId,
    mode: ConnMode,
    group_type: GroupType,
    members: Mutex<Vec<Member>>,
    /// One listener per URI, present only for listener-mode groups.
    listeners: Vec<Arc<SrtSingle>>,
    scheduler: Arc<Scheduler>,
}

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
const ACCEPT_POLL: Duration = Duration::from_millis(200);

static TICK: AtomicI64 = AtomicI64::new(0);

fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

impl GroupSocket {
    pub async fn connect(uris: Vec<EndpointUri>, scheduler: Arc<Scheduler>) -> Result<Arc<Self>> {
        validate_group_uris(&uris)?;
        let group_type = GroupType::detect(&uris)?;
        let id = srt_sys::srt_create_group(group_type.as_raw());
        if id == srt_sys::SRT_INVALID_SOCK {
            return Err(TransmitError::ConnectFailed {
                reason: srt_sys::srt_getlasterror_str(),
            });
        }

        let mut members = Vec::with_capacity(uris.len());
        for (token, uri) in uris.iter().enumerate() {
            let weight = detect_link_weight(uri)?;
            members.push(Member {
                uri: Some(uri.clone()),
                weight,
                token: token as i32,
                link: None,
            });
        }

        let group = Arc::new(Self {
            id,
            mode: ConnMode::Caller,
            group_type,
            members: Mutex::new(members),
            listeners: Vec::new(),
            scheduler,
        });

        let tokens: Vec<i32> = (0..uris.len() as i32).collect();
        for token in tokens {
            Self::connect_member(&group, token).await;
        }

        Ok(group)
    }

    /// Builds a listener-side group: one bound, listening socket per URI,
    /// each wired via `SRTO_GROUPCONNECT` so a connection it accepts joins
    /// `id` as a member rather than standing alone.
    pub async fn listen(uris: Vec<EndpointUri>, scheduler: Arc<Scheduler>) -> Result<Arc<Self>> {
        validate_group_uris(&uris)?;
        let group_type = GroupType::detect(&uris)?;
        let id = srt_sys::srt_create_group(group_type.as_raw());
        if id == srt_sys::SRT_INVALID_SOCK {
            return Err(TransmitError::ConnectFailed {
                reason: srt_sys::srt_getlasterror_str(),
            });
        }

        let mut listeners = Vec::with_capacity(uris.len());
        for uri in &uris {
            let single = SrtSingle::from_uri(uri)?;
            single.set_group_accept(id)?;
            single.listen()?;
            listeners.push(Arc::new(single));
        }

        Ok(Arc::new(Self {
            id,
            mode: ConnMode::Listener,
            group_type,
            members: Mutex::new(Vec::new()),
            listeners,
            scheduler,
        }))
    }

    /// Ensures at least one member has joined the group, blocking on
    /// whichever listener accepts first. A no-op once a member is already
    /// active — later callers just reuse the live group.
    pub async fn accept(&self) -> Result<()> {
        loop {
            if self.has_active_member() {
                return Ok(());
            }

            for listener in &self.listeners {
                match tokio::time::timeout(ACCEPT_POLL, listener.accept()).await {
                    Ok(Ok(accepted)) => {
                        self.absorb_accepted(accepted);
                        if self.has_active_member() {
                            return Ok(());
                        }
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "group listener accept failed");
                    }
                    Err(_) => continue, // this listener's slice timed out, try the next
                }
            }
        }
    }

    fn has_active_member(&self) -> bool {
        self.members.lock().iter().any(|m| m.link.is_some())
    }

    /// Registers a freshly accepted member, identifying its stable `token`
    /// via the transport's own group member table rather than invented
    /// locally, since on the listener side the caller chose the token.
    fn absorb_accepted(&self, accepted: SrtSingle) {
        let handle = accepted.handle();
        let rows = srt_sys::srt_group_data(self.id);
        let token = rows
            .iter()
            .find(|row| row.id == handle)
            .map(|row| row.token)
            .unwrap_or_else(|| self.members.lock().len() as i32);
        let weight = rows.iter().find(|row| row.id == handle).map(|row| row.weight).unwrap_or(0);

        let mut members = self.members.lock();
        match members.iter_mut().find(|m| m.token == token) {
            Some(existing) => existing.link = Some(Arc::new(accepted)),
            None => members.push(Member {
                uri: None,
                weight,
                token,
                link: Some(Arc::new(accepted)),
            }),
        }
    }

    async fn connect_member(group: &Arc<Self>, token: i32) {
        let uri = {
            let guard = group.members.lock();
            guard.iter().find(|m| m.token == token).and_then(|m| m.uri.clone())
        };
        let Some(uri) = uri else { return };

        match SrtSingle::from_uri(&uri) {
            Ok(single) => match single.connect_to(&uri).await {
                Ok(()) => {
                    let mut guard = group.members.lock();
                    if let Some(m) = guard.iter_mut().find(|m| m.token == token) {
                        m.link = Some(Arc::new(single));
                    }
                }
                Err(e) => {
                    tracing::warn!(token, error = %e, "group member connect failed, scheduling retry");
                    Self::schedule_reconnect(group, token);
                }
            },
            Err(e) => {
                tracing::warn!(token, error = %e, "group member socket creation failed, scheduling retry");
                Self::schedule_reconnect(group, token);
            }
        }
    }

    /// Schedules a retry on the timer scheduler, holding only a `Weak`
    /// reference so a dropped group never resurrects member links.
    fn schedule_reconnect(group: &Arc<Self>, token: i32) {
        let weak: Weak<Self> = Arc::downgrade(group);
        group.scheduler.schedule_in(RECONNECT_BACKOFF, move || {
            if let Some(group) = weak.upgrade() {
                tokio::spawn(async move {
                    Self::connect_member(&group, token).await;
                });
            }
        });
    }

    fn active_members(members: &[Member]) -> impl Iterator<Item = (i32, Arc<SrtSingle>)> + '_ {
        members
            .iter()
            .filter_map(|m| m.link.clone().map(|l| (m.token, l)))
    }

    /// The group-level row first (§4.8.2), fetched straight from the
    /// group's own handle — libsrt accepts a group id anywhere a socket id
    /// is expected for statistics — followed by one row per active member.
    pub fn member_statistics_csv(&self, print_header: bool) -> String {
        let mut out = String::new();
        let snapshot = srt_sys::srt_bstats(self.id);
        let group_row = LinkStats {
            timepoint: TICK.fetch_add(1, Ordering::Relaxed),
            time_us: now_us(),
            socket_id: self.id,
            pkt_sent: snapshot.pkt_sent,
            pkt_recv: snapshot.pkt_recv,
            byte_sent: snapshot.byte_sent,
            byte_recv: snapshot.byte_recv,
            ms_rtt: snapshot.ms_rtt,
            mbps_bandwidth: snapshot.mbps_bandwidth,
            pkt_flight_size: snapshot.pkt_flight_size,
            ..Default::default()
        };

        if print_header {
            out.push_str(STATS_CSV_HEADER);
        }
        out.push_str("# group\n");
        out.push_str(&group_row.to_csv_row());

        let members = self.members.lock();
        for (token, link) in Self::active_members(&members) {
            let weight = members.iter().find(|m| m.token == token).map(|m| m.weight).unwrap_or(0);
            out.push_str(&format!("# member token={token} weight={weight}\n"));
            out.push_str(&link.statistics_csv(false));
        }
        out
    }
}

#[async_trait]
impl Socket for GroupSocket {
    fn id(&self) -> SocketId {
        self.id
    }

    fn is_caller(&self) -> bool {
        matches!(self.mode, ConnMode::Caller)
    }

    fn mode(&self) -> ConnMode {
        self.mode
    }

    async fn read(&self, buf: &mut [u8], timeout_ms: i64) -> Result<usize> {
        let snapshot: Vec<Arc<SrtSingle>> = {
            let members = self.members.lock();
            Self::active_members(&members).map(|(_, l)| l).collect()
        };

        for link in snapshot {
            let n = link.read(buf, 0).await?;
            if n > 0 {
                return Ok(n);
            }
        }

        if timeout_ms != 0 {
            tokio::time::sleep(Duration::from_millis(timeout_ms.max(0) as u64)).await;
        }
        Ok(0)
    }

    async fn write(&self, buf: &[u8], timeout_ms: i64) -> Result<usize> {
        let snapshot: Vec<Arc<SrtSingle>> = {
            let members = self.members.lock();
            Self::active_members(&members).map(|(_, l)| l).collect()
        };

        if snapshot.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        for link in snapshot {
            match link.write(buf, timeout_ms).await {
                Ok(n) => written = written.max(n),
                Err(e) => tracing::warn!(error = %e, "group member write failed"),
            }
            if self.group_type == GroupType::Backup && written > 0 {
                break;
            }
        }

        Ok(written)
    }

    fn supports_statistics(&self) -> bool {
        true
    }

    fn pending_send_packets(&self) -> Option<i32> {
        let members = self.members.lock();
        let total: i32 = Self::active_members(&members)
            .filter_map(|(_, l)| l.pending_send_packets())
            .sum();
        Some(total)
    }

    fn statistics_csv(&self, print_header: bool) -> String {
        self.member_statistics_csv(print_header)
    }
}

impl Drop for GroupSocket {
    fn drop(&mut self) {
        srt_sys::srt_close(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_type_defaults_to_broadcast() {
        let uri = EndpointUri::parse("srt://127.0.0.1:4200").unwrap();
        assert_eq!(GroupType::detect(&[uri]).unwrap(), GroupType::Broadcast);
    }

    #[test]
    fn group_type_rejects_unknown_value() {
        let uri = EndpointUri::parse("srt://127.0.0.1:4200?grouptype=bogus").unwrap();
        assert!(GroupType::detect(&[uri]).is_err());
    }

    #[test]
    fn weight_out_of_range_is_rejected() {
        let uri = EndpointUri::parse("srt://127.0.0.1:4200?weight=99999").unwrap();
        assert!(detect_link_weight(&uri).is_err());
    }

    #[test]
    fn weight_defaults_to_zero() {
        let uri = EndpointUri::parse("srt://127.0.0.1:4200").unwrap();
        assert_eq!(detect_link_weight(&uri).unwrap(), 0);
    }

    #[test]
    fn listener_mode_detected_from_empty_host() {
        let uri = EndpointUri::parse("srt://:4200").unwrap();
        assert!(group_is_listener(&[uri]));
    }

    #[test]
    fn caller_mode_detected_from_host() {
        let uri = EndpointUri::parse("srt://127.0.0.1:4200").unwrap();
        assert!(!group_is_listener(&[uri]));
    }

    #[test]
    fn explicit_mode_option_overrides_host_inference() {
        let uri = EndpointUri::parse("srt://127.0.0.1:4200?mode=listener").unwrap();
        assert!(group_is_listener(&[uri]));
    }

    #[test]
    fn validate_rejects_rendezvous() {
        let uri = EndpointUri::parse("srt://127.0.0.1:4200?mode=rendezvous").unwrap();
        assert!(validate_group_uris(&[uri]).is_err());
    }

    #[test]
    fn validate_rejects_mixed_transport() {
        let uris = vec![
            EndpointUri::parse("srt://127.0.0.1:4200?mode=caller").unwrap(),
            EndpointUri::parse("udp://127.0.0.1:4201?mode=caller").unwrap(),
        ];
        assert!(validate_group_uris(&uris).is_err());
    }

    #[test]
    fn validate_rejects_mixed_mode() {
        let uris = vec![
            EndpointUri::parse("srt://127.0.0.1:4200?mode=caller").unwrap(),
            EndpointUri::parse("srt://:4201?mode=listener").unwrap(),
        ];
        assert!(validate_group_uris(&uris).is_err());
    }

    #[test]
    fn validate_accepts_uniform_caller_uris() {
        let uris = vec![
            EndpointUri::parse("srt://127.0.0.1:4200?mode=caller&weight=10").unwrap(),
            EndpointUri::parse("srt://127.0.0.1:4201?mode=caller&weight=20").unwrap(),
        ];
        assert_eq!(validate_group_uris(&uris).unwrap(), ConnMode::Caller);
    }
}
