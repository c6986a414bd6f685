//! Bounded scrollback with absolute offsets.
//!
//! Offsets are monotonic over the whole session lifetime: eviction advances
//! `start_offset` instead of renumbering, so a reader that recorded "length
//! L0 before my command" can still ask for "everything after L0" after old
//! bytes have been dropped.

use choraleia_core::config::SCROLLBACK_MAX_BYTES;

pub struct Scrollback {
    buf: Vec<u8>,
    /// Absolute offset of `buf[0]`.
    start_offset: u64,
    cap: usize,
}

impl Scrollback {
    pub fn new() -> Self {
        Self::with_capacity(SCROLLBACK_MAX_BYTES)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::new(),
            start_offset: 0,
            cap,
        }
    }

    /// Append bytes, evicting from the front when over capacity.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        if self.buf.len() > self.cap {
            let excess = self.buf.len() - self.cap;
            self.buf.drain(..excess);
            self.start_offset += excess as u64;
        }
    }

    /// Bytes currently retained.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Absolute offset one past the newest byte. This is the "length" a
    /// sentinel exec records before writing its command.
    pub fn end_offset(&self) -> u64 {
        self.start_offset + self.buf.len() as u64
    }

    /// Everything at or after absolute offset `from`. Evicted ranges yield
    /// whatever is still retained.
    pub fn window_from(&self, from: u64) -> Vec<u8> {
        let rel = from.saturating_sub(self.start_offset) as usize;
        if rel >= self.buf.len() {
            return Vec::new();
        }
        self.buf[rel..].to_vec()
    }

    /// The last `n` bytes (or all of them).
    pub fn tail(&self, n: usize) -> Vec<u8> {
        let start = self.buf.len().saturating_sub(n);
        self.buf[start..].to_vec()
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.buf.clone()
    }
}

impl Default for Scrollback {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_window() {
        let mut sb = Scrollback::with_capacity(100);
        sb.append(b"hello ");
        let mark = sb.end_offset();
        sb.append(b"world");
        assert_eq!(sb.window_from(mark), b"world");
        assert_eq!(sb.window_from(0), b"hello world");
    }

    #[test]
    fn eviction_keeps_cap_and_advances_offsets() {
        let mut sb = Scrollback::with_capacity(10);
        sb.append(b"0123456789");
        assert_eq!(sb.len(), 10);
        sb.append(b"abcde");
        assert_eq!(sb.len(), 10);
        assert_eq!(sb.snapshot(), b"56789abcde");
        // Absolute end offset counts everything ever written.
        assert_eq!(sb.end_offset(), 15);
    }

    #[test]
    fn window_from_inside_evicted_range_returns_retained_tail() {
        let mut sb = Scrollback::with_capacity(8);
        sb.append(b"aaaabbbb");
        sb.append(b"cccc"); // evicts "aaaa"
        assert_eq!(sb.window_from(0), b"bbbbcccc");
        assert_eq!(sb.window_from(6), b"bbcccc");
    }

    #[test]
    fn never_exceeds_cap() {
        let mut sb = Scrollback::with_capacity(1000);
        for _ in 0..100 {
            sb.append(&[7u8; 97]);
            assert!(sb.len() <= 1000);
        }
    }

    #[test]
    fn tail_returns_newest_bytes() {
        let mut sb = Scrollback::with_capacity(100);
        sb.append(b"abcdef");
        assert_eq!(sb.tail(3), b"def");
        assert_eq!(sb.tail(100), b"abcdef");
    }
}
