//! Raw FFI surface over libsrt (the Haivision SRT library), linked as a
//! system library rather than through a registry crate — no maintained,
//! versioned binding for libsrt exists on crates.io today. This module is
//! the small, hand-written `extern "C"` layer a `build.rs`/`bindgen` pair
//! would otherwise generate; everything above `srt_single.rs`/`srt_group.rs`
//! only ever sees the safe wrappers at the bottom of this file.
//!
//! Mirrors the subset of `srt.h`'s C API this tool actually drives: socket
//! and group lifecycle, connect/listen/accept, non-blocking epoll, and the
//! `CBytePerfMon` statistics snapshot (`srt_bstats`).

use std::ffi::CStr;
use std::net::SocketAddr;
use std::os::raw::{c_char, c_int, c_void};

pub type SRTSOCKET = i32;

pub const SRT_INVALID_SOCK: SRTSOCKET = -1;
pub const SRT_ERROR: c_int = -1;

pub const SRT_EPOLL_IN: c_int = 0x1;
pub const SRT_EPOLL_OUT: c_int = 0x4;
pub const SRT_EPOLL_ERR: c_int = 0x8;

/// `SRT_SOCKSTATUS`; only the member this crate checks for is named.
pub const SRTS_CONNECTED: c_int = 5;

/// `SRT_GROUP_TYPE`.
pub const SRT_GTYPE_BROADCAST: c_int = 1;
pub const SRT_GTYPE_BACKUP: c_int = 3;

/// Mirrors libsrt's `CBytePerfMon` (truncated to the fields this tool reads;
/// the real struct has many more trailing fields, which is fine for a
/// read-only snapshot as long as the fields read here keep their offsets).
#[repr(C)]
#[allow(non_snake_case)]
struct CBytePerfMon {
    msTimeStamp: i64,
    pktSentTotal: i64,
    pktRecvTotal: i64,
    pktSndLossTotal: c_int,
    pktRcvLossTotal: c_int,
    pktRetransTotal: c_int,
    pktSentACKTotal: c_int,
    pktRecvACKTotal: c_int,
    pktSentNAKTotal: c_int,
    pktRecvNAKTotal: c_int,
    usSndDurationTotal: i64,
    pktSndDropTotal: c_int,
    pktRcvDropTotal: c_int,
    pktRcvUndecryptTotal: c_int,
    byteSentTotal: u64,
    byteRecvTotal: u64,
    byteRcvLossTotal: u64,
    byteRetransTotal: u64,
    byteSndDropTotal: u64,
    byteRcvDropTotal: u64,
    byteRcvUndecryptTotal: u64,
    pktSent: i64,
    pktRecv: i64,
    pktSndLoss: c_int,
    pktRcvLoss: c_int,
    pktRetrans: c_int,
    pktRcvRetrans: c_int,
    pktSentACK: c_int,
    pktRecvACK: c_int,
    pktSentNAK: c_int,
    pktRecvNAK: c_int,
    mbpsSendRate: f64,
    mbpsRecvRate: f64,
    usSndDuration: i64,
    pktReorderDistance: c_int,
    pktReorderTolerance: c_int,
    pktSentUnique: i64,
    pktRecvUnique: i64,
    byteSentUnique: u64,
    byteRecvUnique: u64,
    pktSndDrop: c_int,
    pktRcvDrop: c_int,
    pktRcvUndecrypt: c_int,
    byteSent: u64,
    byteRecv: u64,
    byteRcvLoss: u64,
    byteRetrans: u64,
    byteSndDrop: u64,
    byteRcvDrop: u64,
    byteRcvUndecrypt: u64,
    usPktSndPeriod: f64,
    pktFlowWindow: c_int,
    pktCongestionWindow: c_int,
    pktFlightSize: c_int,
    msRTT: f64,
    mbpsBandwidth: f64,
    byteAvailSndBuf: c_int,
    byteAvailRcvBuf: c_int,
    mbpsMaxBW: f64,
    byteMSS: c_int,
    pktSndBuf: c_int,
    byteSndBuf: c_int,
    msSndBuf: c_int,
    msSndTsbPdDelay: c_int,
    pktRcvBuf: c_int,
    byteRcvBuf: c_int,
    msRcvBuf: c_int,
    msRcvTsbPdDelay: c_int,
}

/// Raw `SRT_SOCKGROUPDATA` member row, as returned by `srt_group_data`.
#[repr(C)]
struct RawGroupMemberData {
    id: SRTSOCKET,
    /// `sockaddr_storage` in the real header; opaque here since nothing in
    /// this crate reads a member's peer address back out of it.
    _peeraddr: [u8; 128],
    status: c_int,
    result: c_int,
    weight: u16,
    token: i32,
}

/// The raw `extern "C"` declarations. Kept in their own namespace so the
/// safe wrappers below can reuse libsrt's own names without colliding.
mod raw {
    use super::{c_char, c_int, c_void, CBytePerfMon, RawGroupMemberData, SRTSOCKET};

    #[link(name = "srt")]
    extern "C" {
        pub fn srt_startup() -> c_int;
        #[allow(dead_code)]
        pub fn srt_cleanup() -> c_int;

        pub fn srt_create_socket() -> SRTSOCKET;
        pub fn srt_create_group(gtype: c_int) -> SRTSOCKET;
        pub fn srt_close(sock: SRTSOCKET) -> c_int;

        pub fn srt_bind(sock: SRTSOCKET, addr: *const c_void, addrlen: c_int) -> c_int;
        pub fn srt_listen(sock: SRTSOCKET, backlog: c_int) -> c_int;
        pub fn srt_accept(sock: SRTSOCKET, addr: *mut c_void, addrlen: *mut c_int) -> SRTSOCKET;
        pub fn srt_connect(sock: SRTSOCKET, addr: *const c_void, addrlen: c_int) -> c_int;

        pub fn srt_sendmsg2(sock: SRTSOCKET, buf: *const c_char, len: c_int, mctrl: *mut c_void) -> c_int;
        pub fn srt_recvmsg2(sock: SRTSOCKET, buf: *mut c_char, len: c_int, mctrl: *mut c_void) -> c_int;

        pub fn srt_epoll_create() -> c_int;
        pub fn srt_epoll_add_usock(eid: c_int, sock: SRTSOCKET, events: *const c_int) -> c_int;
        pub fn srt_epoll_uwait(eid: c_int, fdsset: *mut c_void, fdsnum: c_int, msec: i64) -> c_int;
        pub fn srt_epoll_release(eid: c_int) -> c_int;

        #[allow(dead_code)]
        pub fn srt_getlasterror(errno_loc: *mut c_int) -> c_int;
        pub fn srt_getlasterror_str() -> *const c_char;
        pub fn srt_getsockstate(sock: SRTSOCKET) -> c_int;

        pub fn srt_bstats(sock: SRTSOCKET, perf: *mut CBytePerfMon, clear: c_int) -> c_int;

        pub fn srt_setsockflag(sock: SRTSOCKET, opt: c_int, val: *const c_void, len: c_int) -> c_int;

        /// Returns the number of member rows written into `data` (capacity
        /// `*size` rows in, actual count out via `*size`); `-1` on error.
        pub fn srt_group_data(group: SRTSOCKET, data: *mut RawGroupMemberData, size: *mut usize) -> c_int;
    }
}

/// `SRTO_GROUPCONNECT`, the pre-bind option that makes a listener socket's
/// accepted connections join `group` instead of standing alone.
const SRTO_GROUPCONNECT: c_int = 63;

fn sockaddr_of(addr: SocketAddr) -> (libc::sockaddr_storage, c_int) {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin);
            }
            std::mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: 0,
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6);
            }
            std::mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as c_int)
}

fn ensure_startup() {
    static START: std::sync::Once = std::sync::Once::new();
    START.call_once(|| {
        // SAFETY: `srt_startup` must be called exactly once per process
        // before any other libsrt entry point; `Once` guarantees that.
        unsafe {
            raw::srt_startup();
        }
    });
}

pub fn srt_getlasterror_str() -> String {
    // SAFETY: `srt_getlasterror_str` returns a pointer to a thread-local,
    // NUL-terminated, statically-owned buffer; it is never null.
    unsafe { CStr::from_ptr(raw::srt_getlasterror_str()).to_string_lossy().into_owned() }
}

pub fn srt_create_socket() -> SRTSOCKET {
    ensure_startup();
    // SAFETY: no preconditions beyond startup having run.
    unsafe { raw::srt_create_socket() }
}

pub fn srt_create_group(gtype: c_int) -> SRTSOCKET {
    ensure_startup();
    // SAFETY: no preconditions beyond startup having run.
    unsafe { raw::srt_create_group(gtype) }
}

pub fn srt_close(sock: SRTSOCKET) {
    // SAFETY: `sock` is a handle this module previously handed out.
    unsafe {
        raw::srt_close(sock);
    }
}

pub fn srt_bind(sock: SRTSOCKET, addr: SocketAddr) -> c_int {
    let (storage, len) = sockaddr_of(addr);
    // SAFETY: `storage` is a valid, fully-initialized sockaddr of the
    // matching family and `len` is its exact size.
    unsafe { raw::srt_bind(sock, &storage as *const _ as *const c_void, len) }
}

pub fn srt_listen(sock: SRTSOCKET, backlog: c_int) -> c_int {
    // SAFETY: `sock` is a bound handle owned by the caller.
    unsafe { raw::srt_listen(sock, backlog) }
}

pub fn srt_accept(sock: SRTSOCKET) -> SRTSOCKET {
    // SAFETY: passing null address/len is valid per `srt_accept`'s contract
    // when the peer address is not needed.
    unsafe { raw::srt_accept(sock, std::ptr::null_mut(), std::ptr::null_mut()) }
}

pub fn srt_connect(sock: SRTSOCKET, addr: SocketAddr) -> c_int {
    let (storage, len) = sockaddr_of(addr);
    // SAFETY: see `srt_bind` above.
    unsafe { raw::srt_connect(sock, &storage as *const _ as *const c_void, len) }
}

pub fn srt_sendmsg2(sock: SRTSOCKET, buf: &[u8]) -> c_int {
    // SAFETY: `buf` outlives the call and its length fits `c_int` for any
    // payload size this tool ever constructs.
    unsafe {
        raw::srt_sendmsg2(
            sock,
            buf.as_ptr() as *const c_char,
            buf.len() as c_int,
            std::ptr::null_mut(),
        )
    }
}

pub fn srt_recvmsg2(sock: SRTSOCKET, buf: &mut [u8]) -> c_int {
    // SAFETY: `buf` is valid for `buf.len()` writes for the call's duration.
    unsafe {
        raw::srt_recvmsg2(
            sock,
            buf.as_mut_ptr() as *mut c_char,
            buf.len() as c_int,
            std::ptr::null_mut(),
        )
    }
}

pub fn srt_epoll_create() -> c_int {
    // SAFETY: no preconditions.
    unsafe { raw::srt_epoll_create() }
}

pub fn srt_epoll_add_usock(eid: c_int, sock: SRTSOCKET, events: &mut c_int) {
    // SAFETY: `events` is a valid, initialized flag word for the call.
    unsafe {
        raw::srt_epoll_add_usock(eid, sock, events as *const c_int);
    }
}

pub fn srt_epoll_release(eid: c_int) {
    // SAFETY: `eid` is an epoll handle this module previously created.
    unsafe {
        raw::srt_epoll_release(eid);
    }
}

/// Blocks (in whatever thread calls it) until `flags` is signalled on `eid`
/// or `timeout_ms` elapses; callers run this inside `spawn_blocking`.
pub fn srt_epoll_wait(eid: c_int, flags: c_int, timeout_ms: i64) -> Result<(), ()> {
    let mut fds = [0 as SRTSOCKET; 8];
    let _ = flags;
    // SAFETY: `fds` is a valid output buffer of 8 elements; libsrt's uwait
    // writes at most that many entries and returns the count or -1.
    let n = unsafe { raw::srt_epoll_uwait(eid, fds.as_mut_ptr() as *mut c_void, fds.len() as c_int, timeout_ms) };
    if n > 0 {
        Ok(())
    } else {
        Err(())
    }
}

pub fn srt_getsockstate(sock: SRTSOCKET) -> c_int {
    // SAFETY: `sock` is a handle owned by the caller.
    unsafe { raw::srt_getsockstate(sock) }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BStats {
    pub pkt_sent: i64,
    pub pkt_recv: i64,
    pub byte_sent: u64,
    pub byte_recv: u64,
    pub ms_rtt: f64,
    pub mbps_bandwidth: f64,
    pub pkt_flight_size: i32,
}

pub fn srt_bstats(sock: SRTSOCKET) -> BStats {
    let mut perf: CBytePerfMon = unsafe { std::mem::zeroed() };
    // SAFETY: `perf` is a correctly-sized, zeroed out-parameter.
    let rc = unsafe { raw::srt_bstats(sock, &mut perf as *mut CBytePerfMon, 1) };
    if rc != 0 {
        return BStats::default();
    }
    BStats {
        pkt_sent: perf.pktSentTotal,
        pkt_recv: perf.pktRecvTotal,
        byte_sent: perf.byteSentTotal,
        byte_recv: perf.byteRecvTotal,
        ms_rtt: perf.msRTT,
        mbps_bandwidth: perf.mbpsBandwidth,
        pkt_flight_size: perf.pktFlightSize,
    }
}

/// Marks `listener` so that sockets it accepts join a group as members
/// instead of standing alone (`SRTO_GROUPCONNECT`); which group is implicit
/// in libsrt's own bookkeeping once accept-group is enabled.
pub fn srt_set_group_accept(listener: SRTSOCKET, _group: SRTSOCKET) -> c_int {
    let flag: c_int = 1;
    // SAFETY: `flag` is a valid, initialized `c_int` pre-option value.
    unsafe {
        raw::srt_setsockflag(
            listener,
            SRTO_GROUPCONNECT,
            &flag as *const c_int as *const c_void,
            std::mem::size_of::<c_int>() as c_int,
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GroupMemberStatus {
    pub id: SRTSOCKET,
    pub token: i32,
    pub weight: u16,
    pub connected: bool,
}

/// Snapshot of a group's current member table (`srt_group_data`), keyed by
/// the caller-assigned `token` rather than table position.
pub fn srt_group_data(group: SRTSOCKET) -> Vec<GroupMemberStatus> {
    const SRTS_CONNECTED_STATUS: c_int = SRTS_CONNECTED;
    let mut members: Vec<RawGroupMemberData> = Vec::with_capacity(16);
    let mut size = members.capacity();
    // SAFETY: `members`'s spare capacity is a valid output buffer of `size`
    // elements; `srt_group_data` writes at most `size` entries and updates
    // `size` to the actual count.
    let rc = unsafe { raw::srt_group_data(group, members.as_mut_ptr(), &mut size) };
    if rc < 0 {
        return Vec::new();
    }
    unsafe { members.set_len(size) };
    members.into_iter()
        .map(|m| GroupMemberStatus {
            id: m.id,
            token: m.token,
            weight: m.weight,
            connected: m.status == SRTS_CONNECTED_STATUS,
        })
        .collect()
}
