//! Net device: attaches a pre-existing TAP file descriptor or
//! opens one by name via `TUNSETIFF`. Read is non-blocking; write
//! transfers exactly one Ethernet frame. A locally-administered MAC
//! (`02:..`) is generated when the manifest doesn't supply one.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;

use thiserror::Error as ThisError;

pub const DEFAULT_MTU: u16 = 1500;
const ETH_HEADER_LEN: usize = 14;

#[derive(ThisError, Debug)]
pub enum NetError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("tap ioctl failed: {0}")]
    Ioctl(io::Error),

    #[error("frame of {len} bytes exceeds mtu {mtu}")]
    FrameTooLarge { len: usize, mtu: u16 },
}

pub struct Net {
    file: File,
    mac: [u8; 6],
    mtu: u16,
}

impl Net {
    /// Opens `/dev/net/tun` and attaches interface `name` via
    /// `TUNSETIFF` in `IFF_TAP | IFF_NO_PI` mode, matching the
    /// upstream tender's Linux TAP attach path.
    pub fn open(name: &str, mac: Option<[u8; 6]>) -> Result<Self, NetError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open("/dev/net/tun")?;

        attach_tap(&file, name)?;

        Ok(Self {
            file,
            mac: mac.unwrap_or_else(generate_mac),
            mtu: DEFAULT_MTU,
        })
    }

    /// Wraps an already-open TAP fd (e.g. handed down by a supervisor),
    /// skipping the `TUNSETIFF` attach step.
    pub fn from_raw_fd(fd: RawFd, mac: Option<[u8; 6]>) -> Self {
        use std::os::fd::FromRawFd;
        Self {
            file: unsafe { File::from_raw_fd(fd) },
            mac: mac.unwrap_or_else(generate_mac),
            mtu: DEFAULT_MTU,
        }
    }

    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Writing a frame larger than `mtu + ETH_HEADER_LEN`
    /// is rejected before touching the device.
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<(), NetError> {
        check_frame_len(frame.len(), self.mtu)?;
        self.file.write_all(frame)?;
        Ok(())
    }

    /// Non-blocking read of one frame. Returns `Ok(None)` when nothing
    /// is queued (mapped to `hypercall::ResultCode::Again`), never
    /// blocking the VCPU thread.
    pub fn read_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>, NetError> {
        match self.file.read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(NetError::Io(e)),
        }
    }
}

/// `EINVAL` iff `len > mtu + ETH_HEADER_LEN`.
fn check_frame_len(len: usize, mtu: u16) -> Result<(), NetError> {
    if len > mtu as usize + ETH_HEADER_LEN {
        return Err(NetError::FrameTooLarge { len, mtu });
    }
    Ok(())
}

fn generate_mac() -> [u8; 6] {
    // Locally-administered, unicast: low two bits of the first octet
    // are `10`. Seeded from the process id so repeated runs on the
    // same host don't collide.
    let pid = std::process::id();
    [
        0x02,
        (pid >> 24) as u8,
        (pid >> 16) as u8,
        (pid >> 8) as u8,
        pid as u8,
        0x01,
    ]
}

#[cfg(target_os = "linux")]
fn attach_tap(file: &File, name: &str) -> Result<(), NetError> {
    const IFF_TAP: libc::c_short = 0x0002;
    const IFF_NO_PI: libc::c_short = 0x1000;
    const TUNSETIFF: libc::c_ulong = 0x4004_54ca;

    #[repr(C)]
    struct IfReq {
        name: [libc::c_char; libc::IFNAMSIZ],
        flags: libc::c_short,
        _pad: [u8; 22],
    }

    let mut req: IfReq = unsafe { std::mem::zeroed() };
    for (dst, &b) in req.name.iter_mut().zip(name.as_bytes()) {
        *dst = b as libc::c_char;
    }
    req.flags = IFF_TAP | IFF_NO_PI;

    let ret = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF as _, &mut req) };
    if ret < 0 {
        return Err(NetError::Ioctl(io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn attach_tap(_file: &File, _name: &str) -> Result<(), NetError> {
    Err(NetError::Ioctl(io::Error::new(
        io::ErrorKind::Unsupported,
        "TAP attach is only implemented for Linux; open /dev/tapN directly on BSD",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_mac_is_locally_administered_unicast() {
        let mac = generate_mac();
        assert_eq!(mac[0] & 0x3, 0x2);
    }

    #[test]
    fn oversized_frame_is_rejected_before_write() {
        let mtu = DEFAULT_MTU;
        let len = mtu as usize + ETH_HEADER_LEN + 1;
        assert!(matches!(
            check_frame_len(len, mtu),
            Err(NetError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn frame_at_exactly_mtu_plus_header_is_accepted() {
        let mtu = DEFAULT_MTU;
        let len = mtu as usize + ETH_HEADER_LEN;
        assert!(check_frame_len(len, mtu).is_ok());
    }
}
