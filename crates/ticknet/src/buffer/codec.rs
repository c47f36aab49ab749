//! Typed field codecs layered on [`BitBuffer`]: strings, bit-exact copies,
//! signed magnitudes, quantized angles and coordinates.

use glam::Vec3;

use super::{BitBuffer, BufferError, MAX_BIT_WIDTH};

const COORD_INT_BITS: u32 = 12;
const COORD_FRAC_BITS: u32 = 3;
const COORD_FRAC_SCALE: f32 = (1 << COORD_FRAC_BITS) as f32;
const COORD_MAX_SCALED: u32 = ((1 << COORD_INT_BITS) - 1) << COORD_FRAC_BITS | 7;

/// Writes the bytes of `value` followed by a zero terminator. Anything after
/// an interior NUL is lost on read.
pub fn write_string(buf: &mut BitBuffer, value: &str) {
    buf.write_bytes(value.as_bytes());
    buf.write_u8(0);
}

pub fn read_string(buf: &mut BitBuffer) -> Result<String, BufferError> {
    let mut bytes = Vec::new();
    loop {
        match buf.read_u8()? {
            0 => break,
            b => bytes.push(b),
        }
    }
    String::from_utf8(bytes).map_err(|_| BufferError::InvalidString)
}

/// Reads exactly `size` bytes as text, with no terminator.
pub fn read_bytes_to_string(buf: &mut BitBuffer, size: usize) -> Result<String, BufferError> {
    let mut bytes = vec![0u8; size];
    buf.read_bytes(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| BufferError::InvalidString)
}

/// Appends exactly the bits written into `from`, independent of its cursor.
pub fn write_to_buffer(from: &BitBuffer, to: &mut BitBuffer) {
    let bits = from.bit_len();
    let full = bits / 8;
    let rest = (bits % 8) as u32;

    to.write_bytes(&from.as_bytes()[..full]);

    if rest > 0 {
        let tail = from.as_bytes()[full] as u32 & ((1 << rest) - 1);
        to.put_bits(tail, rest);
    }
}

pub fn read_to_buffer(from: &mut BitBuffer, count: usize) -> Result<BitBuffer, BufferError> {
    if from.remaining_bits() < count {
        return Err(BufferError::OutOfRange {
            position: from.position() as isize,
            requested: count.div_ceil(8),
            size: from.size(),
        });
    }

    let mut out = BitBuffer::new();
    let mut left = count;
    while left > 0 {
        let chunk = left.min(MAX_BIT_WIDTH as usize) as u32;
        let value = from.read_bits(chunk)?;
        out.put_bits(value, chunk);
        left -= chunk as usize;
    }
    out.to_start();
    Ok(out)
}

pub fn read_sbits(buf: &mut BitBuffer, size: u32) -> Result<i32, BufferError> {
    if size == 0 || size > MAX_BIT_WIDTH {
        return Err(BufferError::BitWidthExceeded(size));
    }

    let negative = buf.read_bit()?;
    let magnitude = buf.read_bits(size - 1)? as i64;

    let value = if negative { -magnitude } else { magnitude };
    Ok(value as i32)
}

/// Sign bit followed by `size - 1` bits of magnitude (clamped).
pub fn write_sbits(buf: &mut BitBuffer, value: i32, size: u32) -> Result<(), BufferError> {
    if size == 0 || size > MAX_BIT_WIDTH {
        return Err(BufferError::BitWidthExceeded(size));
    }

    buf.write_bit(value < 0);
    buf.write_bits(value.unsigned_abs(), size - 1)
}

pub fn read_bit_angle(buf: &mut BitBuffer, size: u32) -> Result<f32, BufferError> {
    let raw = buf.read_bits(size)?;
    let steps = (1u64 << size) as f32;
    Ok(raw as f32 * 360.0 / steps)
}

pub fn write_bit_angle(buf: &mut BitBuffer, angle: f32, size: u32) -> Result<(), BufferError> {
    if size > MAX_BIT_WIDTH {
        return Err(BufferError::BitWidthExceeded(size));
    }

    let steps = 1u64 << size;
    let scaled = ((steps as f64 * angle as f64).trunc() / 360.0) as i64;
    let value = (scaled & (steps - 1) as i64) as u32;
    buf.write_bits(value, size)
}

pub fn read_angle(buf: &mut BitBuffer) -> Result<f32, BufferError> {
    Ok(buf.read_i8()? as f32 * (360.0 / 256.0))
}

pub fn write_angle(buf: &mut BitBuffer, angle: f32) {
    let value = ((angle as f64 % 360.0) * 256.0 / 360.0) as i64 & 0xFF;
    buf.write_u8(value as u8);
}

pub fn read_hires_angle(buf: &mut BitBuffer) -> Result<f32, BufferError> {
    Ok(buf.read_i16()? as f32 * (360.0 / 65536.0))
}

pub fn write_hires_angle(buf: &mut BitBuffer, angle: f32) {
    let value = ((angle as f64 % 360.0) * 65536.0 / 360.0) as i64 & 0xFFFF;
    buf.write_u16(value as u16);
}

pub fn read_coord(buf: &mut BitBuffer) -> Result<f32, BufferError> {
    Ok(buf.read_i16()? as f32 / COORD_FRAC_SCALE)
}

pub fn write_coord(buf: &mut BitBuffer, value: f32) {
    let scaled = (value * COORD_FRAC_SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32);
    buf.write_i16(scaled as i16);
}

/// Near-zero values cost as little as two bits: an integer flag and a
/// fraction flag, then sign, 12 integer bits and 3 bits of eighths as
/// flagged.
pub fn read_bit_coord(buf: &mut BitBuffer) -> Result<f32, BufferError> {
    let has_int = buf.read_bit()?;
    let has_frac = buf.read_bit()?;

    if !has_int && !has_frac {
        return Ok(0.0);
    }

    let negative = buf.read_bit()?;
    let int_part = if has_int {
        buf.read_bits(COORD_INT_BITS)?
    } else {
        0
    };
    let frac_part = if has_frac {
        buf.read_bits(COORD_FRAC_BITS)?
    } else {
        0
    };

    let value = int_part as f32 + frac_part as f32 / COORD_FRAC_SCALE;
    Ok(if negative { -value } else { value })
}

/// Lossy outside ±4095.875 and below 1/8 precision.
pub fn write_bit_coord(buf: &mut BitBuffer, value: f32) {
    let scaled = ((value.abs() * COORD_FRAC_SCALE).round() as u32).min(COORD_MAX_SCALED);
    let int_part = scaled >> COORD_FRAC_BITS;
    let frac_part = scaled & ((1 << COORD_FRAC_BITS) - 1);

    buf.write_bit(int_part != 0);
    buf.write_bit(frac_part != 0);

    if int_part == 0 && frac_part == 0 {
        return;
    }

    buf.write_bit(value < 0.0);
    if int_part != 0 {
        buf.put_bits(int_part, COORD_INT_BITS);
    }
    if frac_part != 0 {
        buf.put_bits(frac_part, COORD_FRAC_BITS);
    }
}

/// Components whose presence bit is clear keep their current value.
pub fn read_bit_vec3(buf: &mut BitBuffer, dst: &mut Vec3) -> Result<(), BufferError> {
    let has_x = buf.read_bit()?;
    let has_y = buf.read_bit()?;
    let has_z = buf.read_bit()?;

    if has_x {
        dst.x = read_bit_coord(buf)?;
    }
    if has_y {
        dst.y = read_bit_coord(buf)?;
    }
    if has_z {
        dst.z = read_bit_coord(buf)?;
    }
    Ok(())
}

pub fn write_bit_vec3(buf: &mut BitBuffer, value: Vec3) {
    let present = value.to_array().map(|c| c != 0.0);
    for flag in present {
        buf.write_bit(flag);
    }
    for (component, flag) in value.to_array().into_iter().zip(present) {
        if flag {
            write_bit_coord(buf, component);
        }
    }
}
