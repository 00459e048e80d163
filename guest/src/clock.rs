//! Invariant-TSC derived monotonic clock, plus a wall-clock offset
//! sampled once at boot. Algorithm matches the upstream `tscclock.c`:
//! a `(tsc_base, time_base)` sample pair and a `(0.S)` fixed-point
//! multiplier, refreshed on every read.

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Once;

const NSEC_PER_SEC: u64 = 1_000_000_000;

struct Params {
    mult: u32,
    shift: u32,
}

static PARAMS: Once<Params> = Once::new();
static TSC_BASE: AtomicU64 = AtomicU64::new(0);
static TIME_BASE: AtomicU64 = AtomicU64::new(0);
static EPOCH_OFFSET: AtomicU64 = AtomicU64::new(0);

#[inline]
fn rdtsc() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_rdtsc()
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        0
    }
}

/// Computes `mult`/`shift` for a given TSC frequency (Hz): the
/// largest shift in `1..=32` such that `(NSEC_PER_SEC << shift) /
/// tsc_freq` still fits in a 32-bit word.
fn compute_params(tsc_freq_hz: u64) -> Params {
    let mut shift = 32u32;
    loop {
        let scaled = (NSEC_PER_SEC as u128) << shift;
        let mult = scaled / tsc_freq_hz as u128;
        if mult <= u32::MAX as u128 || shift == 1 {
            return Params {
                mult: mult as u32,
                shift,
            };
        }
        shift -= 1;
    }
}

/// Must be called exactly once during boot, with the invariant TSC
/// frequency the tender reports in `boot_info`, and the host's wall
/// time in nanoseconds since the Unix epoch (from the `walltime`
/// hypercall).
pub fn init(tsc_freq_hz: u64, host_wall_nsecs: u64) {
    PARAMS.call_once(|| compute_params(tsc_freq_hz));
    let now = rdtsc();
    TSC_BASE.store(now, Ordering::Relaxed);
    // A non-zero initial time_base, matching the upstream guard
    // against a guest observing clock_monotonic() == 0.
    TIME_BASE.store(1, Ordering::Relaxed);
    EPOCH_OFFSET.store(host_wall_nsecs, Ordering::Relaxed);
}

/// Strictly non-decreasing between successive calls on the same VCPU.
pub fn monotonic() -> u64 {
    let Some(params) = PARAMS.get() else {
        return 0;
    };
    let tsc_base = TSC_BASE.load(Ordering::Relaxed);
    let time_base = TIME_BASE.load(Ordering::Relaxed);

    let now = rdtsc();
    let tsc_delta = now.saturating_sub(tsc_base);
    let ns_delta = ((tsc_delta as u128 * params.mult as u128) >> params.shift) as u64;
    let now_ns = time_base + ns_delta;

    TSC_BASE.store(now, Ordering::Relaxed);
    TIME_BASE.store(now_ns, Ordering::Relaxed);
    now_ns
}

pub fn wall() -> u64 {
    monotonic() + EPOCH_OFFSET.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_fit_in_32_bits_for_typical_frequencies() {
        for freq in [1_000_000u64, 1_000_000_000, 3_500_000_000] {
            let p = compute_params(freq);
            assert!(p.shift >= 1 && p.shift <= 32);
            assert!(p.mult > 0);
        }
    }

    #[test]
    fn larger_frequency_needs_a_smaller_or_equal_shift() {
        let slow = compute_params(1_000_000);
        let fast = compute_params(4_000_000_000);
        assert!(fast.shift <= slow.shift);
    }
}
