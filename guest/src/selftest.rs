//! `#[guest_test]` bodies exercising the bindings from inside the
//! guest. Linked only when the demo binary is built with the
//! `selftest` feature; driven by [`crate::run_selftests`].

use crate::guest_test;
use crate::{clock, cmdline, device, hypercall};

#[guest_test(name = "clock_monotonic_is_nondecreasing")]
fn clock_monotonic_is_nondecreasing() {
    let t1 = clock::monotonic();
    let t2 = clock::monotonic();
    assert!(t2 >= t1, "clock_monotonic went backwards: {t1} -> {t2}");
}

#[guest_test(name = "clock_wall_is_past_2017")]
fn clock_wall_is_past_2017() {
    const JAN_1_2017_NS: u64 = 1_483_228_800 * 1_000_000_000;
    let wall = clock::wall();
    assert!(wall > JAN_1_2017_NS, "wall clock {wall} is not past 2017");
}

#[guest_test(name = "cmdline_reserved_options_are_stripped")]
fn cmdline_reserved_options_are_stripped() {
    let (level, rest) = cmdline::parse("--solo5:debug Hello_Solo5");
    assert_eq!(level, Some(cmdline::LogLevel::Debug));
    assert_eq!(rest, "Hello_Solo5");
}

#[guest_test(name = "net_acquire_unknown_device_is_einval")]
fn net_acquire_unknown_device_is_einval() {
    let result = device::net_acquire("no_such_device");
    assert!(matches!(result, Err(hypercall::ResultCode::Einval)));
}

#[guest_test(name = "block_acquire_unknown_device_is_einval")]
fn block_acquire_unknown_device_is_einval() {
    let result = device::block_acquire("no_such_device");
    assert!(matches!(result, Err(hypercall::ResultCode::Einval)));
}
