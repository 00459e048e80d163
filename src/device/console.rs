//! Guest-to-host console. There are no UART registers to emulate:
//! `puts` hands over a whole buffer at once, so buffering here only
//! batches partial lines for a single `write_all` per flush.

use std::io::Write as _;

pub struct Console {
    line_buffer: Vec<u8>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            line_buffer: Vec::new(),
        }
    }

    /// `hypercall::puts` handler: best-effort write, never blocks the
    /// guest and never fails the call.
    pub fn puts(&mut self, data: &[u8]) {
        self.line_buffer.extend_from_slice(data);
        if data.contains(&b'\n') {
            self.flush();
        }
    }

    pub fn flush(&mut self) {
        if self.line_buffer.is_empty() {
            return;
        }
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(&self.line_buffer);
        let _ = stdout.flush();
        self.line_buffer.clear();
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_until_newline() {
        let mut c = Console::new();
        c.puts(b"partial");
        assert_eq!(c.line_buffer, b"partial");
        c.puts(b" line\n");
        assert!(c.line_buffer.is_empty());
    }
}
