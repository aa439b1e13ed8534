//! Wall-clock timestamps for record stamping.
//!
//! Uses `clock_gettime(CLOCK_REALTIME)` on Linux and `SystemTime` elsewhere.

#[cfg(target_os = "linux")]
#[inline]
fn clock_realtime() -> (u64, u64) {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: `ts` is a valid, writable timespec. On failure it stays zeroed
    // (the epoch).
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
    }
    (ts.tv_sec as u64, ts.tv_nsec as u64)
}

#[cfg(not(target_os = "linux"))]
#[inline]
fn clock_realtime() -> (u64, u64) {
    use std::time::{SystemTime, UNIX_EPOCH};
    let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    (d.as_secs(), d.subsec_nanos() as u64)
}

/// Current time as **nanoseconds** since Unix epoch.
#[inline]
pub fn now_ns() -> u64 {
    let (sec, nsec) = clock_realtime();
    sec * 1_000_000_000 + nsec
}
