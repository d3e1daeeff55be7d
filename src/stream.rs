//! Stream interceptor: a pass-through tap on the terminal output stream.
//!
//! Every byte read from the source is forwarded to the destination unmodified
//! before any side work happens, so interactive output is never delayed or
//! altered. Completed lines are stripped of ANSI escape sequences and pushed
//! into the ring buffer as search/context material.

use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;

use crate::buffer::RingBuffer;

/// CSI and two-byte escape sequences (colors, cursor movement, title sets).
const ANSI_PATTERN: &str = r"\x1b(?:\[[0-9;?]*[ -/]*[@-~]|\][^\x07]*\x07|[@-Z\\-_])";

pub struct Interceptor {
    buffer: Arc<RingBuffer>,
    ansi: Regex,
    partial: Vec<u8>,
}

impl Interceptor {
    /// Create an interceptor keeping the last `context_lines` lines.
    pub fn new(context_lines: usize) -> Self {
        Self::with_buffer(Arc::new(RingBuffer::new(context_lines)))
    }

    pub fn with_buffer(buffer: Arc<RingBuffer>) -> Self {
        Self {
            buffer,
            ansi: Regex::new(ANSI_PATTERN).expect("ANSI pattern is valid"),
            partial: Vec::new(),
        }
    }

    /// Copy `src` to `dst` until end-of-stream, capturing cleaned lines on
    /// the side. Returns the number of bytes forwarded.
    ///
    /// A destination write failure or a non-EOF read failure aborts the copy
    /// and propagates; this component never retries.
    pub fn tee(&mut self, src: &mut dyn Read, dst: &mut dyn Write) -> Result<u64> {
        let mut chunk = [0u8; 8192];
        let mut forwarded = 0u64;

        loop {
            let n = match src.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("failed to read from source stream"),
            };

            dst.write_all(&chunk[..n])
                .context("failed to forward bytes to destination")?;
            dst.flush()
                .context("failed to flush destination stream")?;
            forwarded += n as u64;

            self.consume(&chunk[..n]);
        }

        // Unterminated output before EOF still counts as a line.
        self.flush_partial();

        Ok(forwarded)
    }

    /// Accumulate bytes into the side buffer, emitting completed lines.
    fn consume(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if b == b'\n' {
                let line = std::mem::take(&mut self.partial);
                self.push_line(&line);
            } else {
                self.partial.push(b);
            }
        }
    }

    fn flush_partial(&mut self) {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            self.push_line(&line);
        }
    }

    fn push_line(&self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let clean = self.ansi.replace_all(&text, "");
        let trimmed = clean.trim();
        if !trimmed.is_empty() {
            self.buffer.write(trimmed);
        }
    }

    pub fn recent_lines(&self, n: usize) -> Vec<String> {
        self.buffer.get_lines(n)
    }

    pub fn all_lines(&self) -> Vec<String> {
        self.buffer.get_all()
    }

    pub fn clear(&self) {
        self.buffer.clear()
    }

    pub fn buffer(&self) -> Arc<RingBuffer> {
        Arc::clone(&self.buffer)
    }
}
