use super::BufferError;
use super::bytes::{ByteBuffer, Origin};

/// Width of the length prefix written by [`BitBuffer::write_bits_var`].
pub const VAR_PREFIX_BITS: u32 = 5;

/// Largest value a varbits field can carry: the prefix cannot state 32.
pub const VAR_MAX_VALUE: u32 = (1 << 31) - 1;

pub const MAX_BIT_WIDTH: u32 = 32;

#[inline]
pub fn bits_for(value: u32) -> u32 {
    u32::BITS - value.leading_zeros()
}

/// Byte buffer with a secondary sub-byte cursor.
///
/// Fields are packed LSB-first into little-endian bytes. `bit_position`
/// always stays in `[0, 8)`; `bit_end` is the high-water mark of written
/// bits, used for bit-exact copies.
#[derive(Debug, Clone, Default)]
pub struct BitBuffer {
    bytes: ByteBuffer,
    bit_position: u32,
    bit_end: usize,
}

impl PartialEq for BitBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.bit_end == other.bit_end && self.bytes == other.bytes
    }
}

impl Eq for BitBuffer {}

impl BitBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: ByteBuffer::from_bytes(bytes),
            bit_position: 0,
            bit_end: bytes.len() * 8,
        }
    }

    pub fn read_bits(&mut self, size: u32) -> Result<u32, BufferError> {
        if size > MAX_BIT_WIDTH {
            return Err(BufferError::BitWidthExceeded(size));
        }
        self.get_bits(size)
    }

    /// Values wider than `size` bits are clamped to the largest
    /// representable value.
    pub fn write_bits(&mut self, value: u32, size: u32) -> Result<(), BufferError> {
        if size > MAX_BIT_WIDTH {
            return Err(BufferError::BitWidthExceeded(size));
        }
        self.put_bits(value, size);
        Ok(())
    }

    pub fn read_bit(&mut self) -> Result<bool, BufferError> {
        Ok(self.get_bits(1)? > 0)
    }

    pub fn write_bit(&mut self, value: bool) {
        self.put_bits(value as u32, 1);
    }

    pub fn read_bits_for(&mut self, max: u32) -> Result<u32, BufferError> {
        self.get_bits(bits_for(max))
    }

    pub fn write_bits_for(&mut self, value: u32, max: u32) {
        self.put_bits(value, bits_for(max));
    }

    pub fn read_bits_var(&mut self) -> Result<u32, BufferError> {
        let size = self.get_bits(VAR_PREFIX_BITS)?;
        self.get_bits(size)
    }

    pub fn write_bits_var(&mut self, value: u32) {
        let value = value.min(VAR_MAX_VALUE);
        let size = bits_for(value);
        self.put_bits(size, VAR_PREFIX_BITS);
        self.put_bits(value, size);
    }

    pub fn align_byte_boundary(&mut self) {
        self.normalize_bit_position();

        if self.bit_position == 0 {
            return;
        }

        self.bytes.advance(1);
        self.bit_position = 0;
    }

    pub fn normalize_bit_position(&mut self) {
        while self.bit_position >= 8 {
            self.bytes.advance(1);
            self.bit_position -= 8;
        }
    }

    /// `Begin` and `End` also reset the bit cursor; `Current` keeps it.
    pub fn seek(&mut self, offset: isize, origin: Origin) -> Result<(), BufferError> {
        self.bytes.seek(offset, origin)?;
        if origin != Origin::Current {
            self.bit_position = 0;
        }
        Ok(())
    }

    pub fn to_start(&mut self) {
        self.bytes.to_start();
        self.bit_position = 0;
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.bit_position = 0;
        self.bit_end = 0;
    }

    pub fn skip_bits(&mut self, count: usize) -> Result<(), BufferError> {
        if self.remaining_bits() < count {
            return Err(self.out_of_range(count.div_ceil(8)));
        }

        let target = self.cursor_bits() + count;
        self.bytes.set_position(target / 8)?;
        self.bit_position = (target % 8) as u32;
        Ok(())
    }

    pub fn read_bytes(&mut self, dst: &mut [u8]) -> Result<(), BufferError> {
        if self.remaining_bits() < dst.len() * 8 {
            return Err(self.out_of_range(dst.len()));
        }

        if self.bit_position == 0 {
            return self.bytes.read(dst);
        }

        for byte in dst.iter_mut() {
            *byte = self.get_bits(8)? as u8;
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, src: &[u8]) {
        if self.bit_position == 0 {
            self.bytes.write(src);
            self.bit_end = self.bit_end.max(self.cursor_bits());
            return;
        }

        for &byte in src {
            self.put_bits(byte as u32, 8);
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, BufferError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, BufferError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16, BufferError> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, BufferError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, BufferError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, BufferError> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_bytes(&[value]);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_i16(&mut self, value: i16) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_bytes()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes.into_vec()
    }

    pub fn bytes(&self) -> &ByteBuffer {
        &self.bytes
    }

    pub fn size(&self) -> usize {
        self.bytes.size()
    }

    pub fn is_empty(&self) -> bool {
        self.bit_end == 0
    }

    pub fn position(&self) -> usize {
        self.bytes.position()
    }

    pub fn bit_position(&self) -> u32 {
        self.bit_position
    }

    pub fn bit_len(&self) -> usize {
        self.bit_end
    }

    pub fn remaining_bits(&self) -> usize {
        (self.size() * 8).saturating_sub(self.cursor_bits())
    }

    fn cursor_bits(&self) -> usize {
        self.bytes.position() * 8 + self.bit_position as usize
    }

    fn out_of_range(&self, requested: usize) -> BufferError {
        BufferError::OutOfRange {
            position: self.bytes.position() as isize,
            requested,
            size: self.size(),
        }
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], BufferError> {
        let mut out = [0u8; N];
        self.read_bytes(&mut out)?;
        Ok(out)
    }

    fn get_bits(&mut self, size: u32) -> Result<u32, BufferError> {
        debug_assert!(size <= MAX_BIT_WIDTH);

        if size == 0 {
            return Ok(0);
        }

        let offset = self.bit_position;
        let total = offset + size;
        let touched = total.div_ceil(8) as usize;

        self.bytes
            .check_readable(touched)
            .map_err(|_| self.out_of_range(touched))?;

        let position = self.bytes.position();
        let word = self.bytes.as_bytes()[position..position + touched]
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, &b)| acc | (b as u64) << (8 * i));

        let mask = (1u64 << size) - 1;
        let value = ((word >> offset) & mask) as u32;

        self.bytes.advance((total / 8) as usize);
        self.bit_position = total % 8;

        Ok(value)
    }

    pub(crate) fn put_bits(&mut self, value: u32, size: u32) {
        debug_assert!(size <= MAX_BIT_WIDTH);

        if size == 0 {
            return;
        }

        let mask = (1u64 << size) - 1;
        let value = (value as u64).min(mask);

        let offset = self.bit_position;
        let total = offset + size;
        let touched = total.div_ceil(8) as usize;

        self.bytes.ensure_space(touched);

        let position = self.bytes.position();
        let region = &mut self.bytes.region_mut()[position..position + touched];

        let mut word = region
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, &b)| acc | (b as u64) << (8 * i));

        word = (word & !(mask << offset)) | (value << offset);

        for (i, byte) in region.iter_mut().enumerate() {
            *byte = (word >> (8 * i)) as u8;
        }

        self.bytes.advance((total / 8) as usize);
        self.bit_position = total % 8;
        self.bit_end = self.bit_end.max(self.cursor_bits());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_round_trip_all_widths() {
        let mut buf = BitBuffer::new();
        for size in 0..=32u32 {
            let value = u32::MAX.checked_shr(32 - size).unwrap_or(0);
            buf.write_bits(value, size).unwrap();
            buf.write_bits(value / 3, size).unwrap();
        }

        buf.to_start();
        for size in 0..=32u32 {
            let value = u32::MAX.checked_shr(32 - size).unwrap_or(0);
            assert_eq!(buf.read_bits(size).unwrap(), value, "width {size}");
            assert_eq!(buf.read_bits(size).unwrap(), value / 3, "width {size}");
        }
        assert_eq!(buf.remaining_bits(), buf.size() * 8 - buf.bit_len());
    }

    #[test]
    fn test_write_clamps_to_width() {
        let mut buf = BitBuffer::new();
        buf.write_bits(300, 8).unwrap();
        buf.write_bits(9, 3).unwrap();
        buf.write_bits(0, 0).unwrap();

        buf.to_start();
        assert_eq!(buf.read_bits(8).unwrap(), 255);
        assert_eq!(buf.read_bits(3).unwrap(), 7);
        assert_eq!(buf.read_bits(0).unwrap(), 0);
    }

    #[test]
    fn test_bit_width_exceeded() {
        let mut buf = BitBuffer::new();
        assert!(matches!(
            buf.write_bits(1, 33),
            Err(BufferError::BitWidthExceeded(33))
        ));
        assert!(matches!(
            buf.read_bits(40),
            Err(BufferError::BitWidthExceeded(40))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_lsb_first_layout() {
        let mut buf = BitBuffer::new();
        buf.write_bit(true);
        buf.write_bits(0b10, 2).unwrap();
        buf.write_bits(0x1F, 5).unwrap();
        buf.write_bits(0xABC, 12).unwrap();

        assert_eq!(buf.as_bytes(), &[0b1111_1101, 0xBC, 0x0A]);
        assert_eq!(buf.bit_len(), 20);
    }

    #[test]
    fn test_wide_field_across_five_bytes() {
        let mut buf = BitBuffer::new();
        buf.write_bits(0b101, 7).unwrap();
        buf.write_bits(0xDEAD_BEEF, 32).unwrap();
        buf.write_bits(0x7FFF_FFFF, 31).unwrap();

        buf.to_start();
        assert_eq!(buf.read_bits(7).unwrap(), 0b101);
        assert_eq!(buf.read_bits(32).unwrap(), 0xDEAD_BEEF);
        assert_eq!(buf.read_bits(31).unwrap(), 0x7FFF_FFFF);
    }

    #[test]
    fn test_read_past_end() {
        let mut buf = BitBuffer::new();
        buf.write_bits(5, 3).unwrap();
        buf.to_start();

        assert_eq!(buf.read_bits(8).unwrap(), 5);
        assert!(matches!(
            buf.read_bit(),
            Err(BufferError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_bits_for_boundaries() {
        let table = [
            (0, 0),
            (1, 1),
            (2, 2),
            (3, 2),
            (4, 3),
            (7, 3),
            (8, 4),
            (255, 8),
            (256, 9),
            ((1u32 << 31) - 1, 31),
            (u32::MAX, 32),
        ];
        for (value, expected) in table {
            assert_eq!(bits_for(value), expected, "bits_for({value})");
            if value > 0 {
                let n = bits_for(value);
                assert!(u64::from(value) <= (1u64 << n) - 1);
                assert!(u64::from(value) > (1u64 << (n - 1)) - 1);
            }
        }
    }

    #[test]
    fn test_bits_for_fixed_width() {
        let mut buf = BitBuffer::new();
        buf.write_bits_for(5, 10);
        buf.write_bits_for(0, 0);
        assert_eq!(buf.bit_len(), 4);

        buf.to_start();
        assert_eq!(buf.read_bits_for(10).unwrap(), 5);
        assert_eq!(buf.read_bits_for(0).unwrap(), 0);
    }

    #[test]
    fn test_var_bits_round_trip() {
        let values = [0, 1, 31, 32, 1_000_000, (1u32 << 31) - 1];

        let mut buf = BitBuffer::new();
        for value in values {
            buf.write_bits_var(value);
        }

        buf.to_start();
        for value in values {
            assert_eq!(buf.read_bits_var().unwrap(), value);
        }
    }

    #[test]
    fn test_var_bits_layout_and_clamp() {
        let mut buf = BitBuffer::new();
        buf.write_bits_var(0);
        assert_eq!(buf.bit_len(), 5);

        buf.write_bits_var(5);
        assert_eq!(buf.bit_len(), 5 + 5 + 3);

        buf.write_bits_var(u32::MAX);
        buf.to_start();
        buf.read_bits_var().unwrap();
        buf.read_bits_var().unwrap();
        assert_eq!(buf.read_bits_var().unwrap(), VAR_MAX_VALUE);
    }

    #[test]
    fn test_align_byte_boundary() {
        let mut buf = BitBuffer::new();
        buf.write_bits(3, 2).unwrap();
        buf.align_byte_boundary();
        buf.write_u8(0x42);

        assert_eq!(buf.as_bytes(), &[3, 0x42]);

        buf.to_start();
        assert_eq!(buf.read_bits(2).unwrap(), 3);
        buf.align_byte_boundary();
        assert_eq!(buf.read_u8().unwrap(), 0x42);

        buf.align_byte_boundary();
        assert_eq!(buf.position(), 2);
    }

    #[test]
    fn test_unaligned_typed_values() {
        let mut buf = BitBuffer::new();
        buf.write_bit(true);
        buf.write_i16(-1234);
        buf.write_u32(0xCAFE_BABE);
        buf.write_f32(1.5);
        buf.write_i8(-7);

        buf.to_start();
        assert!(buf.read_bit().unwrap());
        assert_eq!(buf.read_i16().unwrap(), -1234);
        assert_eq!(buf.read_u32().unwrap(), 0xCAFE_BABE);
        assert_eq!(buf.read_f32().unwrap(), 1.5);
        assert_eq!(buf.read_i8().unwrap(), -7);
    }

    #[test]
    fn test_seek_resets_bit_cursor() {
        let mut buf = BitBuffer::from_bytes(&[0xFF, 0x01]);
        buf.read_bits(3).unwrap();

        buf.seek(1, Origin::Begin).unwrap();
        assert_eq!(buf.bit_position(), 0);
        assert_eq!(buf.read_u8().unwrap(), 0x01);
    }

    #[test]
    fn test_overwrite_preserves_neighbouring_bits() {
        let mut buf = BitBuffer::from_bytes(&[0xFF, 0xFF]);
        buf.write_bits(0, 3).unwrap();
        buf.write_bits(0, 2).unwrap();

        assert_eq!(buf.as_bytes(), &[0b1110_0000, 0xFF]);
    }
}
