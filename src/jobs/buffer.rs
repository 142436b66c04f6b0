use std::collections::VecDeque;

use serde::Serialize;

/// Default per-stream capacity: 1 MiB.
pub const DEFAULT_LOG_CAPACITY: usize = 1024 * 1024;

/// Bounded byte window over one output stream.
///
/// Holds at most `capacity` bytes. Appending past capacity drops the oldest
/// bytes, so the contents are always the most recent suffix of everything
/// written.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    bytes: VecDeque<u8>,
    capacity: usize,
    total_written: u64,
}

/// One slice returned by [`LogBuffer::read`].
///
/// Offsets index the buffer's current contents; `next_offset` is where the
/// following read should resume. `dropped` counts bytes discarded from the
/// front so far; when it grows between reads, offsets have shifted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogChunk {
    pub data: Vec<u8>,
    pub next_offset: usize,
    pub is_end: bool,
    pub dropped: u64,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(capacity.min(64 * 1024)),
            capacity,
            total_written: 0,
        }
    }

    pub fn append(&mut self, chunk: &[u8]) {
        self.total_written += chunk.len() as u64;
        if self.capacity == 0 {
            return;
        }
        if chunk.len() >= self.capacity {
            self.bytes.clear();
            self.bytes.extend(&chunk[chunk.len() - self.capacity..]);
            return;
        }
        let overflow = (self.bytes.len() + chunk.len()).saturating_sub(self.capacity);
        self.bytes.drain(..overflow);
        self.bytes.extend(chunk);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes discarded from the front to stay within capacity.
    pub fn dropped(&self) -> u64 {
        self.total_written - self.bytes.len() as u64
    }

    pub fn contents(&self) -> Vec<u8> {
        self.bytes.iter().copied().collect()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    /// Read up to `max_bytes` starting at `offset`.
    ///
    /// An offset past the end yields an empty chunk anchored at the end.
    pub fn read(&self, offset: usize, max_bytes: usize) -> LogChunk {
        let len = self.bytes.len();
        let start = offset.min(len);
        let end = start.saturating_add(max_bytes).min(len);
        let data: Vec<u8> = self.bytes.range(start..end).copied().collect();
        LogChunk {
            data,
            next_offset: end,
            is_end: end >= len,
            dropped: self.dropped(),
        }
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_append_within_capacity() {
        let mut buf = LogBuffer::new(16);
        buf.append(b"hello ");
        buf.append(b"world");
        assert_eq!(buf.contents(), b"hello world");
        assert_eq!(buf.len(), 11);
        assert_eq!(buf.dropped(), 0);
    }

    #[test]
    fn test_append_overflow_keeps_most_recent() {
        let mut buf = LogBuffer::new(8);
        buf.append(b"abcdef");
        buf.append(b"ghijk");
        assert_eq!(buf.contents(), b"defghijk");
        assert_eq!(buf.total_written, 11);
        assert_eq!(buf.dropped(), 3);
    }

    #[test]
    fn test_single_chunk_larger_than_capacity() {
        let mut buf = LogBuffer::new(4);
        buf.append(b"0123456789");
        assert_eq!(buf.contents(), b"6789");
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut buf = LogBuffer::new(0);
        buf.append(b"data");
        assert!(buf.is_empty());
        assert_eq!(buf.total_written, 4);
    }

    #[test]
    fn test_read_chained_offsets_reconstruct_contents() {
        let mut buf = LogBuffer::new(64);
        buf.append(b"line one\nline two\nline three\n");

        let mut offset = 0;
        let mut collected = Vec::new();
        loop {
            let chunk = buf.read(offset, 7);
            collected.extend_from_slice(&chunk.data);
            offset = chunk.next_offset;
            if chunk.is_end {
                break;
            }
        }
        assert_eq!(collected, buf.contents());
    }

    #[test]
    fn test_read_past_end_is_empty() {
        let mut buf = LogBuffer::new(16);
        buf.append(b"abc");
        let chunk = buf.read(100, 10);
        assert!(chunk.data.is_empty());
        assert_eq!(chunk.next_offset, 3);
        assert!(chunk.is_end);
    }

    #[test]
    fn test_read_empty_buffer() {
        let buf = LogBuffer::new(16);
        let chunk = buf.read(0, 10);
        assert!(chunk.data.is_empty());
        assert_eq!(chunk.next_offset, 0);
        assert!(chunk.is_end);
        assert_eq!(chunk.dropped, 0);
    }

    #[test]
    fn test_read_reports_wrapped_bytes() {
        let mut buf = LogBuffer::new(4);
        buf.append(b"abc");
        assert_eq!(buf.read(0, 10).dropped, 0);
        buf.append(b"def");
        let chunk = buf.read(0, 10);
        assert_eq!(chunk.data, b"cdef");
        assert_eq!(chunk.dropped, 2);
    }

    proptest! {
        #[test]
        fn buffer_is_suffix_of_stream(
            capacity in 0usize..64,
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..40), 0..20),
        ) {
            let mut buf = LogBuffer::new(capacity);
            let mut stream = Vec::new();
            for chunk in &chunks {
                buf.append(chunk);
                stream.extend_from_slice(chunk);
                prop_assert!(buf.len() <= capacity);
            }
            let keep = stream.len().min(capacity);
            prop_assert_eq!(buf.contents(), stream[stream.len() - keep..].to_vec());
        }

        #[test]
        fn chained_reads_have_no_gaps(
            data in proptest::collection::vec(any::<u8>(), 0..200),
            step in 1usize..50,
        ) {
            let mut buf = LogBuffer::new(256);
            buf.append(&data);
            let mut offset = 0;
            let mut out = Vec::new();
            let mut last = buf.read(offset, step);
            loop {
                out.extend_from_slice(&last.data);
                offset = last.next_offset;
                if last.is_end {
                    break;
                }
                last = buf.read(offset, step);
            }
            prop_assert!(last.is_end);
            prop_assert_eq!(out, data);
        }
    }
}
