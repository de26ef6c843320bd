//! Primitive little-endian readers for container parsing

use std::io::{Cursor, Read};

use crate::error::{Result, VargateError};

fn read_array<const N: usize>(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    cursor.read_exact(&mut buf).map_err(|e| {
        VargateError::format(format!(
            "truncated container reading {what} at offset {}: {e}",
            cursor.position()
        ))
    })?;
    Ok(buf)
}

/// Read a single u8 from the cursor.
pub(crate) fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8> {
    Ok(read_array::<1>(cursor, "u8")?[0])
}

/// Read a single i8 from the cursor.
pub(crate) fn read_i8(cursor: &mut Cursor<&[u8]>) -> Result<i8> {
    Ok(i8::from_le_bytes(read_array(cursor, "i8")?))
}

/// Read a u16 (little-endian) from the cursor.
pub(crate) fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16> {
    Ok(u16::from_le_bytes(read_array(cursor, "u16")?))
}

/// Read an i16 (little-endian) from the cursor.
pub(crate) fn read_i16(cursor: &mut Cursor<&[u8]>) -> Result<i16> {
    Ok(i16::from_le_bytes(read_array(cursor, "i16")?))
}

/// Read a u32 (little-endian) from the cursor.
pub(crate) fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(cursor, "u32")?))
}

/// Read an i32 (little-endian) from the cursor.
pub(crate) fn read_i32(cursor: &mut Cursor<&[u8]>) -> Result<i32> {
    Ok(i32::from_le_bytes(read_array(cursor, "i32")?))
}

/// Read a u64 (little-endian) from the cursor.
pub(crate) fn read_u64(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    Ok(u64::from_le_bytes(read_array(cursor, "u64")?))
}

/// Read an i64 (little-endian) from the cursor.
pub(crate) fn read_i64(cursor: &mut Cursor<&[u8]>) -> Result<i64> {
    Ok(i64::from_le_bytes(read_array(cursor, "i64")?))
}

/// Read an f32 (little-endian) from the cursor.
pub(crate) fn read_f32(cursor: &mut Cursor<&[u8]>) -> Result<f32> {
    Ok(f32::from_le_bytes(read_array(cursor, "f32")?))
}

/// Read an f64 (little-endian) from the cursor.
pub(crate) fn read_f64(cursor: &mut Cursor<&[u8]>) -> Result<f64> {
    Ok(f64::from_le_bytes(read_array(cursor, "f64")?))
}

/// Read a bool stored as one byte; anything but 0/1 is corruption.
pub(crate) fn read_bool(cursor: &mut Cursor<&[u8]>) -> Result<bool> {
    match read_u8(cursor)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(VargateError::format(format!("invalid bool byte {other}"))),
    }
}

/// Read a string: u64 length + UTF-8 bytes.
pub(crate) fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let len_u64 = read_u64(cursor)?;
    let remaining = cursor.get_ref().len() as u64 - cursor.position().min(cursor.get_ref().len() as u64);
    if len_u64 > remaining {
        return Err(VargateError::format(format!(
            "string length {len_u64} exceeds remaining {remaining} bytes"
        )));
    }
    let len = usize::try_from(len_u64)
        .map_err(|_| VargateError::format(format!("string length {len_u64} exceeds usize")))?;

    let mut bytes = vec![0u8; len];
    cursor
        .read_exact(&mut bytes)
        .map_err(|e| VargateError::format(format!("truncated string: {e}")))?;
    String::from_utf8(bytes).map_err(|e| VargateError::format(format!("invalid UTF-8: {e}")))
}
