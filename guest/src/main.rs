//! Demo application linked against the `guest` bindings. Selects one
//! of a handful of scenarios by the (non-reserved) command line the
//! tender passes through `--`, the same way a real Solo5 `test_*`
//! guest would: `Hello_Solo5`, `time`, `block`, `net`, or `smash`.
//! Built with the `selftest` feature, it instead runs the in-guest
//! test harness and ignores the scenario command line entirely.
#![no_std]
#![no_main]

mod note;

use core::panic::PanicInfo;

use guest::{abort, boot, console_write, device, println};

#[unsafe(no_mangle)]
pub extern "C" fn _start() -> ! {
    note::keep();
    let start_info = unsafe { boot::start() };

    #[cfg(feature = "selftest")]
    {
        let _ = start_info;
        guest::run_selftests();
    }

    #[cfg(not(feature = "selftest"))]
    {
        let status = app_main(start_info.cmdline);
        abort::exit(status)
    }
}

#[cfg(not(feature = "selftest"))]
fn app_main(cmdline: &str) -> i32 {
    match cmdline {
        "Hello_Solo5" => scenario_hello(),
        "time" => scenario_time(),
        "block" => scenario_block(),
        "net" => scenario_net(),
        "smash" => scenario_smash(),
        other => {
            println!("unrecognized scenario {other:?}");
            1
        }
    }
}

#[cfg(not(feature = "selftest"))]
fn scenario_hello() -> i32 {
    println!("Hello, World");
    println!("SUCCESS");
    0
}

#[cfg(not(feature = "selftest"))]
fn scenario_time() -> i32 {
    use guest::clock;

    const ONE_SEC_NS: u64 = 1_000_000_000;
    const TOLERANCE_NS: u64 = ONE_SEC_NS / 10;

    let t1 = clock::monotonic();
    let deadline = t1 + ONE_SEC_NS;
    let mut ready = 0u64;
    guest::yield_until(deadline, &mut ready);
    let t2 = clock::monotonic();

    let elapsed = t2 - t1;
    if elapsed < ONE_SEC_NS || elapsed > ONE_SEC_NS + TOLERANCE_NS {
        println!("time: elapsed {elapsed}ns out of [1e9, 1.1e9]");
        return 1;
    }

    let wall = clock::wall();
    const JAN_1_2017_NS: u64 = 1_483_228_800 * ONE_SEC_NS;
    if wall <= JAN_1_2017_NS {
        println!("time: wall clock {wall} not past 2017");
        return 1;
    }

    println!("SUCCESS");
    0
}

#[cfg(not(feature = "selftest"))]
fn scenario_block() -> i32 {
    let Ok((handle, info)) = device::block_acquire("block_basic") else {
        println!("block: block_basic device not attached");
        return 1;
    };

    let mut buf = [0u8; 512];
    let block_size = info.block_size as u64;
    let sector_count = info.capacity / block_size;

    let mut sector = 0u64;
    while sector < sector_count {
        for (k, byte) in buf.iter_mut().enumerate() {
            *byte = b'0' + (k % 10) as u8;
        }
        let offset = sector * block_size;
        if !matches!(
            device::block_write(handle, offset, &buf[..info.block_size as usize]),
            guest::hypercall::ResultCode::Ok
        ) {
            println!("block: write at sector {sector} failed");
            return 1;
        }

        let mut readback = [0u8; 512];
        if !matches!(
            device::block_read(handle, offset, &mut readback[..info.block_size as usize]),
            guest::hypercall::ResultCode::Ok
        ) {
            println!("block: read at sector {sector} failed");
            return 1;
        }
        if readback[..info.block_size as usize] != buf[..info.block_size as usize] {
            println!("block: mismatch at sector {sector}");
            return 1;
        }

        sector += 10;
    }

    // A write spanning two sectors at once must be rejected by a
    // single-sector-only backend.
    let two_sectors = [0u8; 1024];
    if !matches!(
        device::block_write(handle, 0, &two_sectors[..(2 * block_size) as usize]),
        guest::hypercall::ResultCode::Einval
    ) {
        println!("block: oversized write should have returned EINVAL");
        return 1;
    }

    println!("SUCCESS");
    0
}

#[cfg(not(feature = "selftest"))]
fn scenario_net() -> i32 {
    let Ok((handle, _info)) = device::net_acquire("net_basic") else {
        println!("net: net_basic device not attached");
        return 1;
    };

    let mut buf = [0u8; 1514];
    let mut requests = 0u32;
    const LIMIT: u32 = 100_000;

    loop {
        let (result, len) = device::net_read(handle, &mut buf);
        match result {
            guest::hypercall::ResultCode::Again => {
                let mut ready = 0u64;
                guest::yield_until(guest::clock_monotonic() + 1_000_000, &mut ready);
                continue;
            }
            guest::hypercall::ResultCode::Ok => {
                if let Some(reply_len) = respond_to_frame(&buf[..len], &mut buf) {
                    let _ = device::net_write(handle, &buf[..reply_len]);
                }
                requests += 1;
                if requests >= LIMIT {
                    println!("SUCCESS");
                    return 0;
                }
            }
            _ => {
                println!("net: read failed");
                return 1;
            }
        }
    }
}

/// Minimal ARP/ICMP responder: answers ARP who-has for `10.0.0.2` and
/// ICMP echo requests with the IP checksum recomputed in place.
/// Returns the reply length if a reply was generated.
#[cfg(not(feature = "selftest"))]
fn respond_to_frame(frame: &[u8], out: &mut [u8; 1514]) -> Option<usize> {
    if frame.len() < 14 {
        return None;
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    match ethertype {
        0x0806 if frame.len() >= 42 => build_arp_reply(frame, out),
        0x0800 if frame.len() >= 34 => build_icmp_reply(frame, out),
        _ => None,
    }
}

#[cfg(not(feature = "selftest"))]
fn build_arp_reply(frame: &[u8], out: &mut [u8; 1514]) -> Option<usize> {
    const TARGET_IP: [u8; 4] = [10, 0, 0, 2];
    if &frame[38..42] != TARGET_IP {
        return None;
    }
    out[..frame.len()].copy_from_slice(frame);
    out[0..6].copy_from_slice(&frame[6..12]);
    out[6..12].copy_from_slice(&frame[22..28]); // our MAC was the sender hw addr
    out[21] = 2; // ARP reply opcode
    out[22..28].copy_from_slice(&frame[6..12]);
    out[28..32].copy_from_slice(&frame[38..42]);
    out[32..38].copy_from_slice(&frame[22..28]);
    out[38..42].copy_from_slice(&frame[28..32]);
    Some(42)
}

#[cfg(not(feature = "selftest"))]
fn build_icmp_reply(frame: &[u8], out: &mut [u8; 1514]) -> Option<usize> {
    let ihl = (frame[14] & 0x0f) as usize * 4;
    let proto = frame[23];
    if proto != 1 {
        return None;
    }
    let icmp_off = 14 + ihl;
    if frame.len() <= icmp_off || frame[icmp_off] != 8 {
        return None; // not an echo request
    }

    out[..frame.len()].copy_from_slice(frame);
    out[0..6].copy_from_slice(&frame[6..12]);
    out[6..12].copy_from_slice(&frame[0..6]);

    out[26..30].copy_from_slice(&frame[30..34]);
    out[30..34].copy_from_slice(&frame[26..30]);
    out[14 + 10] = 0;
    out[14 + 11] = 0;
    let ip_checksum = internet_checksum(&out[14..14 + ihl]);
    out[14 + 10..14 + 12].copy_from_slice(&ip_checksum.to_be_bytes());

    out[icmp_off] = 0; // echo reply type
    out[icmp_off + 2] = 0;
    out[icmp_off + 3] = 0;
    let icmp_checksum = internet_checksum(&out[icmp_off..frame.len()]);
    out[icmp_off + 2..icmp_off + 4].copy_from_slice(&icmp_checksum.to_be_bytes());

    Some(frame.len())
}

#[cfg(not(feature = "selftest"))]
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Deliberately overflows a stack buffer so the compiler-inserted
/// stack-protector epilogue check trips `__stack_chk_fail`.
#[cfg(not(feature = "selftest"))]
#[inline(never)]
fn scenario_smash() -> i32 {
    let mut buf = [0u8; 8];
    let overflowed: *mut u8 = buf.as_mut_ptr();
    for i in 0..64usize {
        unsafe {
            overflowed.add(i).write_volatile(0x41);
        }
    }
    core::hint::black_box(&buf);
    // If the canary check somehow didn't fire, fail loudly rather than
    // silently reporting success.
    1
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("solo5_abort: {info}");
    abort::abort()
}
