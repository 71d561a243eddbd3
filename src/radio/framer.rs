//! Incremental line framer for the modem's ASCII serial protocol.
//!
//! The RYLR998 terminates every reply and every received frame with `\r\n`. Bytes arrive in
//! arbitrary chunks, so the framer accumulates them and yields whole, trimmed lines. Lines that
//! grow beyond [`MAX_LINE_LEN`] without a terminator are discarded to resynchronize.
//!
//! A partial line that stops growing (line noise, a truncated frame) is terminated after a
//! quiet period by [`LineFramer::expire_partial`], so it never sticks to the front of the next
//! line and never looks like traffic still arriving.
use bytes::BytesMut;
use log::debug;

use crate::logutil::hex_preview;

/// Longest accepted line: `+RCV=` header, 240 byte payload, rssi/snr and slack.
pub const MAX_LINE_LEN: usize = 256;

#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
    /// Clock reading of the most recent non-empty push.
    last_rx_ms: u64,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(MAX_LINE_LEN * 2),
            last_rx_ms: 0,
        }
    }

    /// Append bytes received at `now_ms`.
    pub fn push(&mut self, data: &[u8], now_ms: u64) {
        if data.is_empty() {
            return;
        }
        self.buf.extend_from_slice(data);
        self.last_rx_ms = now_ms;
    }

    /// Next complete, non-empty line with surrounding whitespace trimmed.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                if self.buf.len() > MAX_LINE_LEN {
                    debug!(
                        "Discarding {} unterminated bytes: {}",
                        self.buf.len(),
                        hex_preview(&self.buf, 16)
                    );
                    self.buf.clear();
                }
                return None;
            };

            let raw = self.buf.split_to(pos + 1);
            if raw.len() > MAX_LINE_LEN + 1 {
                debug!("Discarding oversize line ({} bytes)", raw.len());
                continue;
            }
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
    }

    /// True while any bytes are buffered, complete lines included.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// True when a complete line is waiting or the unterminated tail grew within `quiet_ms`.
    pub fn has_pending(&self, now_ms: u64, quiet_ms: u64) -> bool {
        if self.buf.contains(&b'\n') {
            return true;
        }
        !self.buf.is_empty() && now_ms.saturating_sub(self.last_rx_ms) < quiet_ms
    }

    /// Terminate an unterminated tail that has not grown for `quiet_ms`, the way a serial read
    /// timeout ends a line. It then comes out of [`next_line`](Self::next_line) on its own.
    /// Returns whether a tail was terminated.
    pub fn expire_partial(&mut self, now_ms: u64, quiet_ms: u64) -> bool {
        let tail_start = self
            .buf
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |pos| pos + 1);
        if tail_start == self.buf.len() || now_ms.saturating_sub(self.last_rx_ms) < quiet_ms {
            return false;
        }
        debug!(
            "Unterminated input timed out: {}",
            hex_preview(&self.buf[tail_start..], 16)
        );
        self.buf.extend_from_slice(b"\n");
        true
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_split_lines() {
        let mut framer = LineFramer::new();
        framer.push(b"+RCV=1,5,hel", 0);
        assert_eq!(framer.next_line(), None);
        assert!(framer.has_partial());
        framer.push(b"lo,-40,9\r\n+OK\r\n", 5);
        assert_eq!(framer.next_line().as_deref(), Some("+RCV=1,5,hello,-40,9"));
        assert_eq!(framer.next_line().as_deref(), Some("+OK"));
        assert_eq!(framer.next_line(), None);
        assert!(!framer.has_partial());
    }

    #[test]
    fn skips_blank_lines() {
        let mut framer = LineFramer::new();
        framer.push(b"\r\n\r\n  \r\n+READY\r\n", 0);
        assert_eq!(framer.next_line().as_deref(), Some("+READY"));
    }

    #[test]
    fn resyncs_after_runaway_input() {
        let mut framer = LineFramer::new();
        framer.push(&[b'x'; MAX_LINE_LEN + 10], 0);
        assert_eq!(framer.next_line(), None);
        assert!(!framer.has_partial());
        framer.push(b"+OK\r\n", 0);
        assert_eq!(framer.next_line().as_deref(), Some("+OK"));
    }

    #[test]
    fn drops_oversize_terminated_line() {
        let mut framer = LineFramer::new();
        let mut data = vec![b'y'; MAX_LINE_LEN + 4];
        data.extend_from_slice(b"\n+OK\n");
        framer.push(&data, 0);
        assert_eq!(framer.next_line().as_deref(), Some("+OK"));
    }

    #[test]
    fn quiet_tail_is_terminated_on_its_own() {
        let mut framer = LineFramer::new();
        framer.push(b"\x00", 1_000);
        assert!(framer.has_pending(1_500, 1_000));
        assert!(!framer.expire_partial(1_500, 1_000));

        assert!(!framer.has_pending(2_000, 1_000));
        assert!(framer.expire_partial(2_000, 1_000));
        assert_eq!(framer.next_line().as_deref(), Some("\x00"));

        framer.push(b"+RCV=1,5,hello,-40,9\r\n", 2_100);
        assert_eq!(framer.next_line().as_deref(), Some("+RCV=1,5,hello,-40,9"));
        assert!(!framer.has_partial());
    }

    #[test]
    fn growing_tail_is_left_alone() {
        let mut framer = LineFramer::new();
        framer.push(b"+OK\r\n+RCV=1,5,", 0);
        framer.push(b"hel", 900);
        assert!(!framer.expire_partial(1_500, 1_000));
        // The complete line keeps the framer pending even once the tail goes quiet.
        assert!(framer.has_pending(5_000, 1_000));
        assert_eq!(framer.next_line().as_deref(), Some("+OK"));
        assert!(!framer.has_pending(5_000, 1_000));
    }
}
