//! Primitive big-endian read/write helpers shared by every record layout.
//!
//! Strings and byte arrays are length-prefixed with a `u32`. Readers check the
//! remaining length before touching the buffer so a truncated value surfaces
//! as [`CacheError::Codec`] instead of a panic.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CacheError, CacheResult};

fn ensure(input: &Bytes, needed: usize, what: &str) -> CacheResult<()> {
    if input.remaining() < needed {
        return Err(CacheError::codec(format!(
            "truncated value: need {} bytes for {}, {} left",
            needed,
            what,
            input.remaining()
        )));
    }
    Ok(())
}

pub(crate) fn put_i32(out: &mut BytesMut, value: i32) {
    out.put_i32(value);
}

pub(crate) fn put_u64(out: &mut BytesMut, value: u64) {
    out.put_u64(value);
}

pub(crate) fn put_bool(out: &mut BytesMut, value: bool) {
    out.put_u8(u8::from(value));
}

pub(crate) fn put_bytes(out: &mut BytesMut, value: &[u8]) {
    out.put_u32(value.len() as u32);
    out.put_slice(value);
}

pub(crate) fn put_str(out: &mut BytesMut, value: &str) {
    put_bytes(out, value.as_bytes());
}

pub(crate) fn put_pairs(out: &mut BytesMut, pairs: &[(String, String)]) {
    out.put_u32(pairs.len() as u32);
    for (name, value) in pairs {
        put_str(out, name);
        put_str(out, value);
    }
}

pub(crate) fn get_i32(input: &mut Bytes) -> CacheResult<i32> {
    ensure(input, 4, "i32")?;
    Ok(input.get_i32())
}

pub(crate) fn get_u64(input: &mut Bytes) -> CacheResult<u64> {
    ensure(input, 8, "u64")?;
    Ok(input.get_u64())
}

pub(crate) fn get_bool(input: &mut Bytes) -> CacheResult<bool> {
    ensure(input, 1, "bool")?;
    match input.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(CacheError::codec(format!("invalid bool byte: {}", other))),
    }
}

fn get_len(input: &mut Bytes) -> CacheResult<usize> {
    ensure(input, 4, "length prefix")?;
    Ok(input.get_u32() as usize)
}

/// Split off a length-prefixed byte array without copying.
pub(crate) fn get_bytes(input: &mut Bytes) -> CacheResult<Bytes> {
    let len = get_len(input)?;
    ensure(input, len, "byte array")?;
    Ok(input.split_to(len))
}

pub(crate) fn get_str(input: &mut Bytes) -> CacheResult<String> {
    let raw = get_bytes(input)?;
    String::from_utf8(raw.to_vec())
        .map_err(|e| CacheError::codec(format!("invalid utf-8 string: {}", e)))
}

pub(crate) fn get_pairs(input: &mut Bytes) -> CacheResult<Vec<(String, String)>> {
    let count = get_len(input)?;
    // Each pair needs at least two length prefixes.
    ensure(input, count.saturating_mul(8), "pair list")?;
    let mut pairs = Vec::with_capacity(count);
    for _ in 0..count {
        let name = get_str(input)?;
        let value = get_str(input)?;
        pairs.push((name, value));
    }
    Ok(pairs)
}
