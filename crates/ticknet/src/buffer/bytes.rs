use super::BufferError;

pub const DEFAULT_BLOCK_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Begin,
    Current,
    /// Offset counts backwards from the end of the logical region.
    End,
}

/// Growable byte region with a read/write cursor.
///
/// `memory.len()` is the capacity; only `[0, size)` is meaningful. Capacity
/// grows in multiples of the block size and never shrinks on its own.
#[derive(Debug)]
pub struct ByteBuffer {
    memory: Vec<u8>,
    size: usize,
    position: usize,
    block_size: usize,
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ByteBuffer {
    fn clone(&self) -> Self {
        let mut copy = Self::with_block_size(self.block_size);
        copy.set_size(self.size);
        copy.memory[..self.size].copy_from_slice(self.as_bytes());
        copy.position = self.position;
        copy
    }
}

impl PartialEq for ByteBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for ByteBuffer {}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            memory: Vec::new(),
            size: 0,
            position: 0,
            block_size: block_size.max(1),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buffer = Self::new();
        buffer.write(bytes);
        buffer.to_start();
        buffer
    }

    pub fn clear(&mut self) {
        self.size = 0;
        self.position = 0;
    }

    pub fn seek(&mut self, offset: isize, origin: Origin) -> Result<(), BufferError> {
        let base = match origin {
            Origin::Begin => 0,
            Origin::Current => self.position as isize,
            Origin::End => self.size as isize,
        };
        let target = match origin {
            Origin::End => base - offset,
            _ => base + offset,
        };

        if target < 0 || target as usize > self.size {
            return Err(BufferError::OutOfRange {
                position: target,
                requested: 0,
                size: self.size,
            });
        }

        self.position = target as usize;
        Ok(())
    }

    pub fn to_start(&mut self) {
        self.position = 0;
    }

    pub fn to_end(&mut self) {
        self.position = self.size;
    }

    pub fn read(&mut self, dst: &mut [u8]) -> Result<(), BufferError> {
        self.check_readable(dst.len())?;
        dst.copy_from_slice(&self.memory[self.position..self.position + dst.len()]);
        self.position += dst.len();
        Ok(())
    }

    pub fn write(&mut self, src: &[u8]) {
        self.ensure_space(src.len());
        self.memory[self.position..self.position + src.len()].copy_from_slice(src);
        self.position += src.len();
    }

    pub fn fill(&mut self, value: u8) {
        self.memory[..self.size].fill(value);
    }

    pub fn ensure_space(&mut self, count: usize) {
        let required = self.position + count;
        if self.size < required {
            self.set_size(required);
        }
    }

    pub fn set_size(&mut self, value: usize) {
        let wanted = value + self.block_size / 2;
        if wanted > self.memory.len() {
            self.set_capacity(wanted);
        }

        if value > self.size {
            self.memory[self.size..value].fill(0);
        }

        self.size = value;
        self.position = self.position.min(self.size);
    }

    /// Rounds `value` up to a block multiple. Shrinking below the current
    /// size truncates the logical region.
    pub fn set_capacity(&mut self, value: usize) {
        let rounded = value.div_ceil(self.block_size) * self.block_size;
        if rounded == self.memory.len() {
            return;
        }

        self.memory.resize(rounded, 0);
        self.memory.shrink_to(rounded);
        self.size = self.size.min(rounded);
        self.position = self.position.min(self.size);
    }

    pub(crate) fn check_readable(&self, count: usize) -> Result<(), BufferError> {
        if self.position + count > self.size {
            return Err(BufferError::OutOfRange {
                position: self.position as isize,
                requested: count,
                size: self.size,
            });
        }
        Ok(())
    }

    pub(crate) fn region_mut(&mut self) -> &mut [u8] {
        &mut self.memory[..self.size]
    }

    pub(crate) fn advance(&mut self, count: usize) {
        self.position = (self.position + count).min(self.size);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.memory[..self.size]
    }

    pub fn into_vec(mut self) -> Vec<u8> {
        self.memory.truncate(self.size);
        self.memory
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, value: usize) -> Result<(), BufferError> {
        self.seek(value as isize, Origin::Begin)
    }

    pub fn remaining(&self) -> usize {
        self.size - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    pub fn capacity(&self) -> usize {
        self.memory.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_extends_size_and_capacity() {
        let mut buf = ByteBuffer::with_block_size(16);
        buf.write(&[1, 2, 3]);

        assert_eq!(buf.size(), 3);
        assert_eq!(buf.position(), 3);
        assert_eq!(buf.capacity() % 16, 0);
        assert!(buf.capacity() >= buf.size());

        buf.write(&[0u8; 40]);
        assert_eq!(buf.size(), 43);
        assert_eq!(buf.capacity() % 16, 0);
        assert!(buf.capacity() >= 43);
    }

    #[test]
    fn test_overwrite_does_not_grow() {
        let mut buf = ByteBuffer::new();
        buf.write(&[1, 2, 3, 4]);
        buf.to_start();
        buf.write(&[9, 9]);

        assert_eq!(buf.size(), 4);
        assert_eq!(buf.as_bytes(), &[9, 9, 3, 4]);
    }

    #[test]
    fn test_read_past_end_is_out_of_range() {
        let mut buf = ByteBuffer::from_bytes(&[1, 2]);
        let mut dst = [0u8; 3];

        assert!(matches!(
            buf.read(&mut dst),
            Err(BufferError::OutOfRange { requested: 3, size: 2, .. })
        ));
        assert_eq!(buf.position(), 0);

        let mut dst = [0u8; 2];
        buf.read(&mut dst).unwrap();
        assert_eq!(dst, [1, 2]);
        assert!(!buf.has_remaining());
    }

    #[test]
    fn test_seek_origins() {
        let mut buf = ByteBuffer::from_bytes(&[0; 10]);

        buf.seek(4, Origin::Begin).unwrap();
        assert_eq!(buf.position(), 4);
        buf.seek(-2, Origin::Current).unwrap();
        assert_eq!(buf.position(), 2);
        buf.seek(3, Origin::End).unwrap();
        assert_eq!(buf.position(), 7);

        assert!(buf.seek(11, Origin::Begin).is_err());
        assert!(buf.seek(-8, Origin::Current).is_err());
        assert_eq!(buf.position(), 7);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut buf = ByteBuffer::new();
        buf.write(&[7; 100]);
        let capacity = buf.capacity();

        buf.clear();

        assert_eq!(buf.size(), 0);
        assert_eq!(buf.position(), 0);
        assert_eq!(buf.capacity(), capacity);
    }

    #[test]
    fn test_regrow_after_shrink_is_zeroed() {
        let mut buf = ByteBuffer::from_bytes(&[0xFF; 8]);
        buf.set_size(2);
        buf.set_size(4);

        assert_eq!(buf.as_bytes(), &[0xFF, 0xFF, 0, 0]);
    }

    #[test]
    fn test_set_capacity_rounds_to_block() {
        let mut buf = ByteBuffer::with_block_size(32);
        buf.set_capacity(33);
        assert_eq!(buf.capacity(), 64);

        buf.write(&[1; 20]);
        buf.set_capacity(0);
        assert_eq!(buf.capacity(), 0);
        assert_eq!(buf.size(), 0);
    }

    #[test]
    fn test_fill_and_clone_are_deep() {
        let mut buf = ByteBuffer::from_bytes(&[1, 2, 3]);
        let copy = buf.clone();
        buf.fill(0xAA);

        assert_eq!(buf.as_bytes(), &[0xAA; 3]);
        assert_eq!(copy.as_bytes(), &[1, 2, 3]);
    }
}
