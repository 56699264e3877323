//! Line framing for the radio byte stream.
//!
//! Transport reads arrive in arbitrary chunks with no alignment to record
//! boundaries. [`ByteStreamFramer`] accumulates them and yields complete
//! lines, splitting on `\n` or `\r` and treating `\r\n` as one delimiter.
//!
//! The cap applies to the undelimited tail only: the bytes after the last
//! delimiter, which are still waiting to become a line. When a push grows
//! that tail past `max_buffer_len`, the tail is dropped. Complete lines are
//! never dropped, so a chunk that ends a burst of noise still yields the
//! records it carries.

use tracing::warn;

/// Result of pushing a chunk into the framer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The chunk was buffered.
    Buffered,
    /// The buffer exceeded its cap and `discarded` bytes were dropped.
    Overflow {
        /// Number of bytes dropped.
        discarded: usize,
    },
}

/// Incremental line splitter with a bounded accumulation buffer.
#[derive(Debug)]
pub struct ByteStreamFramer {
    buf: Vec<u8>,
    max_buffer_len: usize,
}

fn is_delimiter(byte: u8) -> bool {
    byte == b'\n' || byte == b'\r'
}

impl ByteStreamFramer {
    /// Create a framer that holds at most `max_buffer_len` bytes between pushes.
    #[must_use]
    pub fn new(max_buffer_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_buffer_len.min(64 * 1024)),
            max_buffer_len,
        }
    }

    /// Append a chunk, dropping the undelimited tail if it exceeds the cap.
    pub fn push(&mut self, chunk: &[u8]) -> PushOutcome {
        self.buf.extend_from_slice(chunk);

        let tail_start = self
            .buf
            .iter()
            .rposition(|&b| is_delimiter(b))
            .map_or(0, |last| last + 1);
        let tail_len = self.buf.len() - tail_start;
        if tail_len <= self.max_buffer_len {
            return PushOutcome::Buffered;
        }

        self.buf.truncate(tail_start);
        warn!(
            discarded = tail_len,
            cap = self.max_buffer_len,
            "Framer buffer overflow, dropped bytes without a line delimiter"
        );
        PushOutcome::Overflow {
            discarded: tail_len,
        }
    }

    /// Take the next complete line, if any.
    ///
    /// The returned line is trimmed and never contains a delimiter. Lines that
    /// are empty after trimming (including the gap produced by a `\r\n` split
    /// across two chunks) are still returned; callers skip them.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| is_delimiter(b))?;

        let mut consumed = pos + 1;
        if self.buf[pos] == b'\r' && self.buf.get(pos + 1) == Some(&b'\n') {
            consumed += 1;
        }

        let line = String::from_utf8_lossy(&self.buf[..pos]).trim().to_string();
        self.buf.drain(..consumed);
        Some(line)
    }

    /// Iterate over the lines currently available.
    ///
    /// The iterator ends when the buffer holds no further delimiter; pushing
    /// more bytes makes new lines available to a fresh call.
    pub fn lines(&mut self) -> Lines<'_> {
        Lines { framer: self }
    }

    /// Number of buffered bytes, complete lines not yet taken included.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// The configured cap.
    #[must_use]
    pub fn max_buffer_len(&self) -> usize {
        self.max_buffer_len
    }

    /// Drop all buffered bytes.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

/// Draining iterator over complete lines. See [`ByteStreamFramer::lines`].
#[derive(Debug)]
pub struct Lines<'a> {
    framer: &'a mut ByteStreamFramer,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_line()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(framer: &mut ByteStreamFramer) -> Vec<String> {
        framer.lines().filter(|l| !l.is_empty()).collect()
    }

    #[test]
    fn test_splits_on_newline() {
        let mut framer = ByteStreamFramer::new(1024);
        framer.push(b"S,1,2,3,4,5\nS,2,2,3,4,5\n");
        assert_eq!(collect(&mut framer), vec!["S,1,2,3,4,5", "S,2,2,3,4,5"]);
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn test_splits_on_carriage_return() {
        let mut framer = ByteStreamFramer::new(1024);
        framer.push(b"a\rb\r");
        assert_eq!(collect(&mut framer), vec!["a", "b"]);
    }

    #[test]
    fn test_crlf_is_one_delimiter() {
        let mut framer = ByteStreamFramer::new(1024);
        framer.push(b"a\r\nb\r\n");
        let lines: Vec<String> = framer.lines().collect();
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn test_partial_line_waits_for_delimiter() {
        let mut framer = ByteStreamFramer::new(1024);
        framer.push(b"F,1,2");
        assert!(framer.next_line().is_none());
        assert_eq!(framer.buffered_len(), 5);

        framer.push(b",3\n");
        assert_eq!(framer.next_line().as_deref(), Some("F,1,2,3"));
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        let mut framer = ByteStreamFramer::new(1024);
        framer.push(b"a\r");
        assert_eq!(framer.next_line().as_deref(), Some("a"));
        framer.push(b"\nb\n");
        // The dangling \n yields an empty line which callers skip
        assert_eq!(collect(&mut framer), vec!["b"]);
    }

    #[test]
    fn test_lines_are_trimmed() {
        let mut framer = ByteStreamFramer::new(1024);
        framer.push(b"  S,1,2,3,4,5 \t\n");
        assert_eq!(framer.next_line().as_deref(), Some("S,1,2,3,4,5"));
    }

    #[test]
    fn test_overflow_without_delimiter_stays_bounded() {
        let mut framer = ByteStreamFramer::new(64);
        let garbage = [b'x'; 40];

        assert_eq!(framer.push(&garbage), PushOutcome::Buffered);
        let outcome = framer.push(&garbage);
        assert_eq!(outcome, PushOutcome::Overflow { discarded: 80 });
        assert_eq!(framer.buffered_len(), 0);

        for _ in 0..100 {
            framer.push(&garbage);
            assert!(framer.buffered_len() <= framer.max_buffer_len());
        }
    }

    #[test]
    fn test_complete_lines_survive_long_partial() {
        let mut framer = ByteStreamFramer::new(64);
        assert_eq!(framer.push(&[b'x'; 60]), PushOutcome::Buffered);

        let outcome = framer.push(b"\nS,1,1.0,-25.3,-57.5,10\n");
        assert_eq!(outcome, PushOutcome::Buffered);

        let lines = collect(&mut framer);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "S,1,1.0,-25.3,-57.5,10");
    }

    #[test]
    fn test_overflow_drops_only_the_tail() {
        let mut framer = ByteStreamFramer::new(16);
        framer.push(b"S,1,2,3,4,5\n");
        let outcome = framer.push(&[b'#'; 20]);

        assert_eq!(outcome, PushOutcome::Overflow { discarded: 20 });
        assert_eq!(collect(&mut framer), vec!["S,1,2,3,4,5"]);
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn test_noise_burst_then_records_in_one_chunk() {
        let mut framer = ByteStreamFramer::new(32);
        framer.push(&[b'#'; 30]);

        let mut chunk = vec![b'#'; 10];
        chunk.extend_from_slice(b"\nS,2,1,2,3,4\nS,3,1,2,3,4\n");
        assert_eq!(framer.push(&chunk), PushOutcome::Buffered);

        let lines = collect(&mut framer);
        assert_eq!(&lines[1..], ["S,2,1,2,3,4", "S,3,1,2,3,4"]);
    }

    #[test]
    fn test_recovers_after_overflow() {
        let mut framer = ByteStreamFramer::new(32);
        framer.push(&[b'#'; 100]);
        assert_eq!(framer.buffered_len(), 0);

        framer.push(b"S,9,1,2,3,4\n");
        assert_eq!(collect(&mut framer), vec!["S,9,1,2,3,4"]);
    }

    #[test]
    fn test_reset_clears_buffer() {
        let mut framer = ByteStreamFramer::new(128);
        framer.push(b"F,1,2,3");
        framer.reset();
        assert_eq!(framer.buffered_len(), 0);
        assert!(framer.next_line().is_none());
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let mut framer = ByteStreamFramer::new(128);
        framer.push(&[b'S', 0xff, b'\n']);
        let line = framer.next_line().unwrap();
        assert!(line.starts_with('S'));
    }
}
