//! Ring buffer for PTY output history.
//!
//! Stores recent output from a session, enabling "late attach"
//! (connecting to a session and seeing what happened before you
//! connected) without unbounded memory growth.

/// A fixed-capacity ring buffer for storing PTY output. Once full, old
/// bytes are overwritten by new ones.
pub struct RingBuffer {
    data: Vec<u8>,
    capacity: usize,
    write_pos: usize,
    total_written: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            write_pos: 0,
            total_written: 0,
        }
    }

    /// Write `data`, overwriting the oldest bytes once the buffer is full.
    /// A single write larger than `capacity` keeps only its final
    /// `capacity` bytes.
    pub fn write(&mut self, data: &[u8]) {
        if self.capacity == 0 {
            return;
        }

        if data.len() >= self.capacity {
            let start = data.len() - self.capacity;
            self.data = data[start..].to_vec();
            self.write_pos = 0;
            self.total_written += data.len();
            return;
        }

        if self.data.len() < self.capacity {
            let space_left = self.capacity - self.data.len();
            if data.len() <= space_left {
                self.data.extend_from_slice(data);
                self.write_pos = self.data.len() % self.capacity;
            } else {
                let (first, second) = data.split_at(space_left);
                self.data.extend_from_slice(first);
                self.data[..second.len()].copy_from_slice(second);
                self.write_pos = second.len();
            }
            self.total_written += data.len();
            return;
        }

        let n = data.len();
        let end = self.write_pos + n;
        if end <= self.capacity {
            self.data[self.write_pos..end].copy_from_slice(data);
            self.write_pos = end % self.capacity;
        } else {
            let first_len = self.capacity - self.write_pos;
            self.data[self.write_pos..].copy_from_slice(&data[..first_len]);
            let remaining = n - first_len;
            self.data[..remaining].copy_from_slice(&data[first_len..]);
            self.write_pos = remaining;
        }
        self.total_written += n;
    }

    /// Read all available data, oldest first.
    pub fn read_all(&self) -> Vec<u8> {
        if !self.has_wrapped() {
            self.data.clone()
        } else {
            let mut out = Vec::with_capacity(self.capacity);
            out.extend_from_slice(&self.data[self.write_pos..]);
            out.extend_from_slice(&self.data[..self.write_pos]);
            out
        }
    }

    pub fn len(&self) -> usize {
        std::cmp::min(self.total_written, self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.total_written == 0
    }

    pub fn has_wrapped(&self) -> bool {
        self.total_written > self.capacity
    }

    pub fn total_written(&self) -> usize {
        self.total_written
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.write_pos = 0;
        self.total_written = 0;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer() {
        let buf = RingBuffer::new(100);
        assert_eq!(buf.capacity(), 100);
        assert!(buf.is_empty());
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_simple_write_read() {
        let mut buf = RingBuffer::new(100);
        buf.write(b"hello");
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.read_all(), b"hello");
    }

    #[test]
    fn test_multiple_writes() {
        let mut buf = RingBuffer::new(100);
        buf.write(b"hello ");
        buf.write(b"world");
        assert_eq!(buf.read_all(), b"hello world");
    }

    #[test]
    fn test_wraparound() {
        let mut buf = RingBuffer::new(10);
        buf.write(b"12345678");
        buf.write(b"abcd");
        let result = buf.read_all();
        assert_eq!(result.len(), 10);
        assert!(buf.has_wrapped());
        assert_eq!(result, b"345678abcd");
    }

    #[test]
    fn test_large_write() {
        let mut buf = RingBuffer::new(5);
        buf.write(b"this is way too long");
        let result = buf.read_all();
        assert_eq!(result.len(), 5);
        assert_eq!(result, b" long");
    }

    #[test]
    fn exact_capacity_write_is_not_wrapped() {
        let mut buf = RingBuffer::new(5);
        buf.write(b"abcde");
        assert!(!buf.has_wrapped());
        assert_eq!(buf.read_all(), b"abcde");
    }

    #[test]
    fn clear_resets_state() {
        let mut buf = RingBuffer::new(10);
        buf.write(b"hello");
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.read_all(), b"");
    }

    #[test]
    fn many_small_writes_wrap_correctly() {
        let mut buf = RingBuffer::new(4);
        for byte in b"abcdefgh" {
            buf.write(&[*byte]);
        }
        assert_eq!(buf.read_all(), b"efgh");
    }
}
