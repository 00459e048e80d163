//! GDB remote-serial stub, following the GDB Remote Serial Protocol
//! directly: `$packet#checksum` framing over a plain TCP
//! socket, a handful of `g`/`G`/`m`/`M`/`c`/`s`/`?`/`Z`/`z`/`k`/`D`
//! commands, software breakpoints via `int3` byte-patching plus
//! `KVM_GUESTDBG_USE_SW_BP` so the trap reaches us as `VcpuExit::Debug`
//! instead of triple-faulting the guest (there is no IDT installed).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};

use kvm_bindings::{KVM_GUESTDBG_ENABLE, KVM_GUESTDBG_SINGLESTEP, KVM_GUESTDBG_USE_SW_BP, kvm_guest_debug};
use kvm_ioctls::VcpuFd;
use thiserror::Error as ThisError;

use crate::memory::{GuestAddr, GuestMemory, MemoryError};

const INT3: u8 = 0xcc;

#[derive(ThisError, Debug)]
pub enum GdbError {
    #[error("gdb: {0}")]
    Io(#[from] std::io::Error),

    #[error("gdb: kvm: {0}")]
    Kvm(#[from] kvm_ioctls::Error),

    #[error("gdb: {0}")]
    Memory(#[from] MemoryError),

    #[error("gdb: malformed packet: {0}")]
    Protocol(String),
}

/// What the debugger told us to do with the VCPU once we hand control
/// back to [`crate::vcpu::Vcpu::run`].
enum Resume {
    Continue,
    Step,
}

/// One attached debugger connection plus the breakpoints it has set.
/// Lives for the whole guest run; `--gdb[=PORT]` attachment happens
/// once, synchronously, before the VCPU ever enters the guest
/// (DESIGN.md: "not reproduced [the busy-loop convenience]; purely
/// `--gdb[=PORT]`-driven").
pub struct Stub {
    stream: TcpStream,
    breakpoints: HashMap<u64, u8>,
}

impl Stub {
    /// Binds `127.0.0.1:port` and blocks until a debugger connects,
    /// then arms `KVM_GUESTDBG_ENABLE | KVM_GUESTDBG_USE_SW_BP` on the
    /// VCPU so `int3` and single-step traps surface as
    /// `VcpuExit::Debug` rather than an unhandled guest exception.
    pub fn attach(port: u16, vcpu: &VcpuFd) -> Result<Self, GdbError> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        eprintln!("hvt: waiting for a GDB connection on 127.0.0.1:{port}...");
        let (stream, _addr) = listener.accept()?;
        stream.set_nodelay(true).ok();

        set_debug_control(vcpu, false)?;

        Ok(Self {
            stream,
            breakpoints: HashMap::new(),
        })
    }

    /// Called once per run-loop iteration, before `KVM_RUN`: drains
    /// and services any commands the debugger sent without blocking
    /// the guest (e.g. an async `Ctrl-C` break request arriving while
    /// the guest is running). Most iterations see nothing pending.
    pub fn service_pending(&mut self, vcpu: &mut VcpuFd, mem: &GuestMemory) -> Result<(), GdbError> {
        self.stream.set_nonblocking(true)?;
        let mut probe = [0u8; 1];
        let pending = match self.stream.peek(&mut probe) {
            Ok(0) => return Err(GdbError::Io(std::io::Error::other("gdb peer closed the connection"))),
            Ok(_) => true,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => false,
            Err(e) => return Err(e.into()),
        };
        self.stream.set_nonblocking(false)?;

        if !pending {
            return Ok(());
        }

        match self.serve(vcpu, mem)? {
            Resume::Continue => set_debug_control(vcpu, false),
            Resume::Step => set_debug_control(vcpu, true),
        }
    }

    /// Called when `VcpuExit::Debug` fires: the guest hit a
    /// breakpoint or completed a single step. Sends the stop reply
    /// and then blocks on the debugger's next instruction.
    pub fn break_into(&mut self, vcpu: &mut VcpuFd, mem: &GuestMemory) -> Result<(), GdbError> {
        self.send_packet(b"T05")?;
        match self.serve(vcpu, mem)? {
            Resume::Continue => set_debug_control(vcpu, false),
            Resume::Step => set_debug_control(vcpu, true),
        }
    }

    /// Reads and dispatches packets until a `c`/`s`/`D`/`k` command
    /// tells us to hand control back to the VCPU.
    fn serve(&mut self, vcpu: &mut VcpuFd, mem: &GuestMemory) -> Result<Resume, GdbError> {
        loop {
            let Some(packet) = self.read_packet()? else {
                return Ok(Resume::Continue);
            };
            if packet.is_empty() {
                self.send_packet(b"")?;
                continue;
            }

            match packet[0] {
                b'?' => self.send_packet(b"S05")?,
                b'g' => self.handle_read_regs(vcpu)?,
                b'G' => self.handle_write_regs(vcpu, &packet[1..])?,
                b'm' => self.handle_read_mem(mem, &packet[1..])?,
                b'M' => self.handle_write_mem(mem, &packet[1..])?,
                b'Z' => self.handle_set_breakpoint(mem, &packet[1..])?,
                b'z' => self.handle_clear_breakpoint(mem, &packet[1..])?,
                b'c' => return Ok(Resume::Continue),
                b's' => return Ok(Resume::Step),
                b'D' => {
                    self.send_packet(b"OK")?;
                    return Ok(Resume::Continue);
                }
                b'k' => return Ok(Resume::Continue),
                _ => self.send_packet(b"")?, // unsupported: empty reply per the RSP spec
            }
        }
    }

    fn handle_read_regs(&mut self, vcpu: &VcpuFd) -> Result<(), GdbError> {
        let regs = vcpu.get_regs()?;
        let sregs = vcpu.get_sregs()?;
        let order = [
            regs.rax, regs.rbx, regs.rcx, regs.rdx, regs.rsi, regs.rdi, regs.rbp, regs.rsp,
            regs.r8, regs.r9, regs.r10, regs.r11, regs.r12, regs.r13, regs.r14, regs.r15,
            regs.rip, regs.rflags,
            sregs.cs.selector as u64, sregs.ss.selector as u64, sregs.ds.selector as u64,
            sregs.es.selector as u64, sregs.fs.selector as u64, sregs.gs.selector as u64,
        ];
        let mut hex = String::with_capacity(order.len() * 16);
        for reg in order {
            hex.push_str(&hex_le(&reg.to_le_bytes()));
        }
        self.send_packet(hex.as_bytes())
    }

    fn handle_write_regs(&mut self, vcpu: &mut VcpuFd, payload: &[u8]) -> Result<(), GdbError> {
        let bytes = unhex(payload)?;
        if bytes.len() < 18 * 8 {
            return Err(GdbError::Protocol("G packet too short".to_string()));
        }

        let mut regs = vcpu.get_regs()?;
        let word = |i: usize| u64::from_le_bytes(bytes[i * 8..i * 8 + 8].try_into().unwrap());
        regs.rax = word(0);
        regs.rbx = word(1);
        regs.rcx = word(2);
        regs.rdx = word(3);
        regs.rsi = word(4);
        regs.rdi = word(5);
        regs.rbp = word(6);
        regs.rsp = word(7);
        regs.r8 = word(8);
        regs.r9 = word(9);
        regs.r10 = word(10);
        regs.r11 = word(11);
        regs.r12 = word(12);
        regs.r13 = word(13);
        regs.r14 = word(14);
        regs.r15 = word(15);
        regs.rip = word(16);
        regs.rflags = word(17);
        vcpu.set_regs(&regs)?;
        self.send_packet(b"OK")
    }

    fn handle_read_mem(&mut self, mem: &GuestMemory, args: &[u8]) -> Result<(), GdbError> {
        let (addr, len) = parse_addr_len(args)?;
        match mem.slice(GuestAddr(addr), len) {
            Ok(data) => {
                let text = hex_le(data);
                self.send_packet(text.as_bytes())
            }
            Err(_) => self.send_packet(b"E01"),
        }
    }

    fn handle_write_mem(&mut self, mem: &GuestMemory, args: &[u8]) -> Result<(), GdbError> {
        let colon = args
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| GdbError::Protocol("M packet missing ':'".to_string()))?;
        let (addr, len) = parse_addr_len(&args[..colon])?;
        let data = unhex(&args[colon + 1..])?;
        if data.len() != len {
            return self.send_packet(b"E01");
        }
        match mem.write(GuestAddr(addr), &data) {
            Ok(()) => self.send_packet(b"OK"),
            Err(_) => self.send_packet(b"E01"),
        }
    }

    /// `Z0,addr,len`: software breakpoint. Saves the original byte and
    /// patches in `int3`; `len` is accepted but ignored (an `int3` is
    /// always one byte).
    fn handle_set_breakpoint(&mut self, mem: &GuestMemory, args: &[u8]) -> Result<(), GdbError> {
        if args.first() != Some(&b'0') {
            return self.send_packet(b""); // only software breakpoints are implemented
        }
        let rest = &args[args.iter().position(|&b| b == b',').map(|i| i + 1).unwrap_or(args.len())..];
        let (addr, _len) = parse_addr_len(rest)?;

        if self.breakpoints.contains_key(&addr) {
            return self.send_packet(b"OK");
        }
        let original = match mem.slice(GuestAddr(addr), 1) {
            Ok(b) => b[0],
            Err(_) => return self.send_packet(b"E01"),
        };
        if mem.write(GuestAddr(addr), &[INT3]).is_err() {
            return self.send_packet(b"E01");
        }
        self.breakpoints.insert(addr, original);
        self.send_packet(b"OK")
    }

    fn handle_clear_breakpoint(&mut self, mem: &GuestMemory, args: &[u8]) -> Result<(), GdbError> {
        if args.first() != Some(&b'0') {
            return self.send_packet(b"");
        }
        let rest = &args[args.iter().position(|&b| b == b',').map(|i| i + 1).unwrap_or(args.len())..];
        let (addr, _len) = parse_addr_len(rest)?;

        match self.breakpoints.remove(&addr) {
            Some(original) => {
                if mem.write(GuestAddr(addr), &[original]).is_err() {
                    return self.send_packet(b"E01");
                }
                self.send_packet(b"OK")
            }
            None => self.send_packet(b"OK"),
        }
    }

    /// Reads one `$...#cc` packet, ACKing it with `+`. Returns `None`
    /// on a clean EOF (the debugger hung up between commands).
    fn read_packet(&mut self) -> Result<Option<Vec<u8>>, GdbError> {
        let mut byte = [0u8; 1];
        loop {
            match self.stream.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {}
                Err(e) => return Err(e.into()),
            }
            if byte[0] == b'$' {
                break;
            }
            // Ignore stray acks/nacks and `Ctrl-C` (0x03) bytes between packets.
        }

        let mut payload = Vec::new();
        loop {
            let mut b = [0u8; 1];
            if self.stream.read(&mut b)? == 0 {
                return Ok(None);
            }
            if b[0] == b'#' {
                break;
            }
            payload.push(b[0]);
        }
        let mut checksum = [0u8; 2];
        self.stream.read_exact(&mut checksum)?;

        self.stream.write_all(b"+")?;
        Ok(Some(payload))
    }

    fn send_packet(&mut self, payload: &[u8]) -> Result<(), GdbError> {
        let checksum: u8 = payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        let mut out = Vec::with_capacity(payload.len() + 4);
        out.push(b'$');
        out.extend_from_slice(payload);
        out.push(b'#');
        out.extend_from_slice(format!("{checksum:02x}").as_bytes());
        self.stream.write_all(&out)?;
        Ok(())
    }
}

fn set_debug_control(vcpu: &VcpuFd, single_step: bool) -> Result<(), GdbError> {
    let mut control = KVM_GUESTDBG_ENABLE | KVM_GUESTDBG_USE_SW_BP;
    if single_step {
        control |= KVM_GUESTDBG_SINGLESTEP;
    }
    let debug = kvm_guest_debug {
        control,
        ..Default::default()
    };
    vcpu.set_guest_debug(&debug)?;
    Ok(())
}

fn parse_addr_len(args: &[u8]) -> Result<(u64, usize), GdbError> {
    let text =
        std::str::from_utf8(args).map_err(|_| GdbError::Protocol("non-UTF8 packet".to_string()))?;
    let (addr_s, len_s) = text
        .split_once(',')
        .ok_or_else(|| GdbError::Protocol(format!("expected addr,len in {text:?}")))?;
    let addr = u64::from_str_radix(addr_s, 16)
        .map_err(|_| GdbError::Protocol(format!("bad address {addr_s:?}")))?;
    let len = usize::from_str_radix(len_s.trim(), 16)
        .map_err(|_| GdbError::Protocol(format!("bad length {len_s:?}")))?;
    Ok((addr, len))
}

fn hex_le(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for b in data {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn unhex(data: &[u8]) -> Result<Vec<u8>, GdbError> {
    let text =
        std::str::from_utf8(data).map_err(|_| GdbError::Protocol("non-UTF8 hex payload".to_string()))?;
    if text.len() % 2 != 0 {
        return Err(GdbError::Protocol("odd-length hex payload".to_string()));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&text[i..i + 2], 16)
                .map_err(|_| GdbError::Protocol(format!("bad hex byte {:?}", &text[i..i + 2])))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let data = [0x00u8, 0x7f, 0xff, 0x10];
        let text = hex_le(&data);
        assert_eq!(text, "007fff10");
        assert_eq!(unhex(text.as_bytes()).unwrap(), data);
    }

    #[test]
    fn parse_addr_len_reads_hex_pair() {
        let (addr, len) = parse_addr_len(b"1000,20").unwrap();
        assert_eq!(addr, 0x1000);
        assert_eq!(len, 0x20);
    }

    #[test]
    fn parse_addr_len_rejects_missing_comma() {
        assert!(parse_addr_len(b"1000").is_err());
    }

    #[test]
    fn unhex_rejects_odd_length() {
        assert!(unhex(b"abc").is_err());
    }
}
