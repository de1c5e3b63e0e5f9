/// Growable receive buffer with a read cursor.
///
/// Bytes are appended at the back and consumed from the front; consumed
/// space is reclaimed lazily so single byte pushes stay cheap.
#[derive(Debug)]
pub struct ByteBuffer {
    buf: Vec<u8>,
    start: usize,
}

const COMPACT_THRESHOLD: usize = 1024;

impl ByteBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            start: 0,
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.start = 0;
    }

    pub fn push(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Byte at offset `i` from the read cursor
    pub fn at(&self, i: usize) -> Option<u8> {
        self.as_slice().get(i).copied()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[self.start..]
    }

    /// Drops `n` bytes from the front (clamped to what is buffered)
    pub fn consume(&mut self, n: usize) {
        self.start = (self.start + n).min(self.buf.len());
        if self.start == self.buf.len() {
            self.clear();
        } else if self.start >= COMPACT_THRESHOLD {
            let _ = self.buf.drain(..self.start);
            self.start = 0;
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
