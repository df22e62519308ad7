//! Coarse 16-bit clock used by the metadata prefix and hotness tracker.
//!
//! The clock is deliberately coarse (it wraps every ~18 hours at a 1ms tick,
//! longer at coarser ticks) — hotness bookkeeping only needs "how long since
//! last access", not wall-clock time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Coarse tick counter, advanced externally by [`advance`] in tests or by
/// wall-clock elapsed milliseconds in production use.
static TICKS: AtomicU64 = AtomicU64::new(0);

fn start() -> Instant {
    *START.get_or_init(Instant::now)
}

/// Current coarse clock value, truncated to 16 bits.
///
/// Backed by milliseconds elapsed since first use, wrapping naturally at
/// `u16::MAX`. Tests that need deterministic wrap behavior should use
/// [`advance`] instead of real elapsed time.
pub fn coarse_clock_low16() -> u16 {
    let extra = TICKS.load(Ordering::Relaxed);
    let elapsed_ms = start().elapsed().as_millis() as u64 + extra;
    (elapsed_ms & 0xFFFF) as u16
}

/// Advance the coarse clock by `ticks` beyond real elapsed time. Test-only
/// hook so decay/wrap scenarios do not depend on wall-clock sleeps.
pub fn advance(ticks: u64) {
    TICKS.fetch_add(ticks, Ordering::Relaxed);
}

/// Signed forward distance from `last` to `current` on a 16-bit wrapping
/// clock, per §4.E: `current < last` implies one wraparound occurred.
pub fn delta16(last: u16, current: u16) -> u32 {
    if current >= last {
        (current - last) as u32
    } else {
        (0xFFFFu32 - last as u32) + current as u32 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_no_wrap() {
        assert_eq!(delta16(10, 15), 5);
        assert_eq!(delta16(100, 100), 0);
    }

    #[test]
    fn delta_wrap() {
        // last = 0xFFFE, current = 0x0002 -> delta 4, per spec boundary case.
        assert_eq!(delta16(0xFFFE, 0x0002), 4);
    }

    #[test]
    fn delta_wrap_exact_boundary() {
        assert_eq!(delta16(0xFFFF, 0x0000), 1);
    }
}
