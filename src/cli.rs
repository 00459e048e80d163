//! Tender command line. One verb (run a guest), so options live on a
//! single `clap::Parser` struct with `#[derive(Args)]`-style
//! flattening rather than a subcommand dispatch.

use std::path::PathBuf;

use clap::Parser;

use crate::error::TenderError;
use crate::layout;

#[derive(Parser, Debug)]
#[command(name = "hvt", about = "Run a Solo5 hvt guest under KVM")]
pub struct Cli {
    /// Path to the guest ELF binary.
    pub kernel: PathBuf,

    /// Arguments passed through to the guest as its command line
    /// (joined with a single space, matching upstream `hvt`'s `--`
    /// separator convention).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    #[command(flatten)]
    pub opts: TenderOpts,
}

#[derive(clap::Args, Debug)]
pub struct TenderOpts {
    /// Guest memory size, e.g. `256` or `256M`/`1G`. Defaults to
    /// `layout::DEFAULT_MEM_MB` MiB.
    #[arg(long = "mem", value_name = "SIZE")]
    pub mem: Option<String>,

    /// File backing the `block_basic` manifest device.
    #[arg(long = "disk", value_name = "PATH")]
    pub disk: Option<PathBuf>,

    /// Host TAP interface backing the `net_basic` manifest device.
    #[arg(long = "net", value_name = "IFACE")]
    pub net: Option<String>,

    /// Write an ELF core file named "<kernel>.core" if the guest aborts.
    #[arg(long = "dumpcore")]
    pub dumpcore: bool,

    /// Wait for a GDB connection on 127.0.0.1:PORT before running the
    /// guest (default port 1234 if none given).
    #[arg(long = "gdb", value_name = "PORT", num_args = 0..=1, default_missing_value = "1234", require_equals = true)]
    pub gdb: Option<u16>,
}

impl Cli {
    /// Parses `--mem`'s `256`/`256M`/`1G`-style size into bytes,
    /// defaulting to `layout::DEFAULT_MEM_MB` MiB.
    pub fn mem_bytes(&self) -> Result<u64, TenderError> {
        let raw = match &self.opts.mem {
            Some(raw) => raw,
            None => return Ok(layout::DEFAULT_MEM_MB * 1024 * 1024),
        };

        let (digits, mult) = match raw.chars().last() {
            Some('g') | Some('G') => (&raw[..raw.len() - 1], 1024 * 1024 * 1024),
            Some('m') | Some('M') => (&raw[..raw.len() - 1], 1024 * 1024),
            Some('k') | Some('K') => (&raw[..raw.len() - 1], 1024),
            _ => (raw.as_str(), 1024 * 1024), // bare number: MiB, matching upstream hvt
        };

        let value: u64 = digits.parse().map_err(|_| {
            TenderError::InvalidArgument("--mem", raw.clone())
        })?;

        let bytes = value
            .checked_mul(mult)
            .ok_or_else(|| TenderError::InvalidArgument("--mem", raw.clone()))?;

        // Rounded down to a huge-page multiple, matching the page size
        // `cpu::x86_64`'s identity map uses past the first 2 MiB.
        let rounded = (bytes / layout::HUGE_PAGE_SIZE) * layout::HUGE_PAGE_SIZE;

        (rounded > 0 && rounded <= layout::MAX_GUEST_MEMORY)
            .then_some(rounded)
            .ok_or_else(|| TenderError::InvalidArgument("--mem", raw.clone()))
    }

    /// The core file path `--dumpcore` writes to on guest abort, or
    /// `None` if the flag wasn't given: `<kernel>.core`, alongside the
    /// kernel image rather than in the current directory.
    pub fn dumpcore_path(&self) -> Option<PathBuf> {
        if !self.opts.dumpcore {
            return None;
        }
        let mut name = self.kernel.clone().into_os_string();
        name.push(".core");
        Some(PathBuf::from(name))
    }

    /// The guest command line: `args` joined with spaces, truncated to
    /// fit `layout::CMDLINE_SIZE` minus the trailing NUL.
    pub fn guest_cmdline(&self) -> [u8; layout::CMDLINE_SIZE] {
        let joined = self.args.join(" ");
        let mut out = [0u8; layout::CMDLINE_SIZE];
        let bytes = joined.as_bytes();
        let len = bytes.len().min(layout::CMDLINE_SIZE - 1);
        out[..len].copy_from_slice(&bytes[..len]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("hvt").chain(args.iter().copied()))
    }

    #[test]
    fn default_mem_is_default_mb() {
        let c = cli(&["guest.elf"]);
        assert_eq!(c.mem_bytes().unwrap(), layout::DEFAULT_MEM_MB * 1024 * 1024);
    }

    #[test]
    fn mem_suffix_g_parses() {
        let c = cli(&["--mem", "1G", "guest.elf"]);
        assert_eq!(c.mem_bytes().unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn mem_bare_number_is_mebibytes() {
        let c = cli(&["--mem", "32", "guest.elf"]);
        assert_eq!(c.mem_bytes().unwrap(), 32 * 1024 * 1024);
    }

    #[test]
    fn mem_rounds_down_to_a_2mib_page_multiple() {
        let c = cli(&["--mem", "33", "guest.elf"]); // 33 MiB, not 2 MiB-aligned
        assert_eq!(c.mem_bytes().unwrap(), 32 * 1024 * 1024);
    }

    #[test]
    fn mem_garbage_is_rejected() {
        let c = cli(&["--mem", "banana", "guest.elf"]);
        assert!(c.mem_bytes().is_err());
    }

    #[test]
    fn gdb_default_missing_value_is_1234() {
        let c = cli(&["--gdb", "guest.elf"]);
        assert_eq!(c.opts.gdb, Some(1234));
    }

    #[test]
    fn dumpcore_flag_derives_path_next_to_kernel() {
        let c = cli(&["--dumpcore", "guest.elf"]);
        assert_eq!(c.dumpcore_path(), Some(PathBuf::from("guest.elf.core")));
    }

    #[test]
    fn no_dumpcore_flag_means_no_path() {
        let c = cli(&["guest.elf"]);
        assert_eq!(c.dumpcore_path(), None);
    }

    #[test]
    fn cmdline_joins_trailing_args() {
        let c = cli(&["guest.elf", "--", "time", "extra"]);
        let joined = std::str::from_utf8(&c.guest_cmdline())
            .unwrap()
            .trim_end_matches('\0')
            .to_string();
        assert_eq!(joined, "time extra");
    }
}
