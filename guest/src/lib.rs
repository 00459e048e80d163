#![cfg_attr(not(test), no_std)]

pub mod abort;
pub mod boot;
pub mod clock;
pub mod cmdline;
pub mod console;
pub mod device;
pub mod hypercall;
pub mod manifest;
pub mod memory;
pub mod tls;

pub use device::{block_acquire, net_acquire};

pub use guest_tests::{TestName, TestRegistration, guest_test};

/// The `{cmdline, heap_start, heap_size}` triple `app_main` runs with,
/// per the stable guest-facing ABI.
pub struct StartInfo {
    pub cmdline: &'static str,
    pub heap_start: u64,
    pub heap_size: u64,
}

impl From<boot::StartInfo> for StartInfo {
    fn from(info: boot::StartInfo) -> Self {
        Self {
            cmdline: info.cmdline,
            heap_start: info.heap_start,
            heap_size: info.heap_size,
        }
    }
}

/// Blocks until `deadline` (absolute, nanoseconds since boot) or a
/// registered device becomes ready; writes the ready-set into `ready`.
/// Returns the raw hypercall result so callers can distinguish a clean
/// deadline-reached return from `Unspecified` (e.g. `POLLERR`).
pub fn yield_until(deadline: u64, ready: &mut u64) -> hypercall::ResultCode {
    let now = clock::monotonic();
    let timeout = deadline.saturating_sub(now);
    let (result, ready_set) = hypercall::poll(timeout);
    *ready = ready_set;
    result
}

pub fn clock_monotonic() -> u64 {
    clock::monotonic()
}

pub fn clock_wall() -> u64 {
    clock::wall()
}

pub fn console_write(buf: &[u8]) {
    hypercall::puts(buf);
}

#[cfg(feature = "selftest")]
pub mod selftest;

/// Runs every `#[guest_test]`-registered test in link order, printing
/// progress to the console, then halts: status 0 if every test ran to
/// completion (a failing assertion aborts the guest before this
/// returns). Used by the demo guest's `selftest` entrypoint.
#[cfg(feature = "selftest")]
pub fn run_selftests() -> ! {
    let count = guest_tests::run(|name| {
        console_write(b"guest_test: ");
        console_write(name.as_bytes());
        console_write(b"\n");
    });
    console_write(b"guest_test: all ");
    print_usize(count);
    console_write(b" tests passed\n");
    abort::exit(0)
}

#[cfg(feature = "selftest")]
fn print_usize(mut n: usize) {
    let mut buf = [0u8; 20];
    let mut i = buf.len();
    if n == 0 {
        console_write(b"0");
        return;
    }
    while n > 0 {
        i -= 1;
        buf[i] = b'0' + (n % 10) as u8;
        n /= 10;
    }
    console_write(&buf[i..]);
}
