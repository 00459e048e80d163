//! Device modules. Each device owns a manifest entry, a backing
//! resource, and — for net — a pollable file descriptor; a device is
//! constructed once at attach time and then driven purely from
//! hypercall dispatch.

pub mod block;
pub mod console;
pub mod coredump;
pub mod net;

use std::cell::RefCell;
use std::os::fd::RawFd;
use std::path::Path;

use thiserror::Error as ThisError;

use crate::manifest::{Device as ManifestDevice, Kind, Manifest};

#[derive(ThisError, Debug)]
pub enum DeviceError {
    #[error("block: {0}")]
    Block(#[from] block::BlockError),

    #[error("net: {0}")]
    Net(#[from] net::NetError),

    #[error("device {name:?} declared in the manifest but no --disk/--net argument attaches it")]
    Unattached { name: String },

    #[error("device {name:?} not declared in the guest's manifest")]
    NotDeclared { name: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Fixed manifest names the CLI attaches `--disk`/`--net` to,
/// matching the demo guest's scenario bodies (`guest::main`).
pub const BLOCK_NAME: &str = "block_basic";
pub const NET_NAME: &str = "net_basic";

/// Owns every attached device backend plus the manifest those
/// attachments were recorded into. Constructed once, after
/// `manifest::Manifest::validate`, before CPU bring-up; outlives the
/// VCPU loop (device module state is owned exclusively by the
/// dispatch table").
pub struct Devices {
    manifest: Manifest,
    console: RefCell<console::Console>,
    block: Option<(u64, RefCell<block::Block>)>,
    net: Option<(u64, RefCell<net::Net>)>,
}

impl Devices {
    /// Attaches `disk`/`net_iface` into `manifest`'s "block_basic"/
    /// "net_basic" entries, opening their host-side backing resources.
    /// A device named in the manifest but left unattached here stays
    /// declared-but-`attached = false`; the guest's `*_acquire` helpers
    /// reject it with `EINVAL` rather than handing back a handle with
    /// no backing.
    pub fn attach(
        mut manifest: Manifest,
        disk: Option<&Path>,
        net_iface: Option<&str>,
    ) -> Result<Self, DeviceError> {
        let block = match disk {
            Some(path) => {
                let dev = block::Block::open(path)?;
                let (idx, entry) = manifest
                    .find_by_name_mut(BLOCK_NAME, Kind::BlockBasic)
                    .ok_or_else(|| DeviceError::NotDeclared {
                        name: BLOCK_NAME.to_string(),
                    })?;
                entry.device = ManifestDevice::Block {
                    capacity: dev.capacity(),
                    block_size: dev.block_size(),
                };
                entry.backing = Some(dev.raw_fd());
                entry.attached = true;
                Some((idx as u64, RefCell::new(dev)))
            }
            None => None,
        };

        let net = match net_iface {
            Some(iface) => {
                let (idx, entry) = manifest
                    .find_by_name_mut(NET_NAME, Kind::NetBasic)
                    .ok_or_else(|| DeviceError::NotDeclared {
                        name: NET_NAME.to_string(),
                    })?;
                let mac = match entry.device {
                    ManifestDevice::Net { mac, .. } if mac != [0u8; 6] => Some(mac),
                    _ => None,
                };
                let dev = net::Net::open(iface, mac)?;
                entry.device = ManifestDevice::Net {
                    mac: dev.mac(),
                    mtu: dev.mtu(),
                };
                entry.backing = Some(dev.raw_fd());
                entry.attached = true;
                Some((idx as u64, RefCell::new(dev)))
            }
            None => None,
        };

        Ok(Self {
            manifest,
            console: RefCell::new(console::Console::new()),
            block,
            net,
        })
    }

    /// The manifest, with `backing`/`attached` reflecting whatever was
    /// attached above; serialized into guest memory for the guest's
    /// read-only view.
    pub fn manifest_bytes(&self) -> Vec<u8> {
        self.manifest.to_bytes()
    }

    pub fn console(&self) -> &RefCell<console::Console> {
        &self.console
    }

    pub fn block(&self) -> Option<(u64, &RefCell<block::Block>)> {
        self.block.as_ref().map(|(h, d)| (*h, d))
    }

    pub fn net(&self) -> Option<(u64, &RefCell<net::Net>)> {
        self.net.as_ref().map(|(h, d)| (*h, d))
    }

    /// File descriptors the `poll` hypercall should block on: only the
    /// net device is pollable in this build.
    pub fn pollable_fds(&self) -> Vec<RawFd> {
        self.net
            .as_ref()
            .map(|(_, n)| n.borrow().raw_fd())
            .into_iter()
            .collect()
    }

    pub fn flush_console(&self) {
        self.console.borrow_mut().flush();
    }
}
