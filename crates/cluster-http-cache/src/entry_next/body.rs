//! Body record layouts.

use bytes::{Bytes, BytesMut};

use crate::error::CacheResult;
use crate::wire;

use super::super::BodyRecord;

pub(crate) fn write_full_impl(record: &BodyRecord, out: &mut BytesMut) {
    wire::put_i32(out, record.version);
    wire::put_bytes(out, &record.buffer);
}

pub(crate) fn read_full_impl(record: &mut BodyRecord, input: &mut Bytes) -> CacheResult<()> {
    record.version = wire::get_i32(input)?;
    record.buffer = wire::get_bytes(input)?;
    Ok(())
}

pub(crate) fn write_unified_impl(record: &BodyRecord, out: &mut BytesMut) {
    wire::put_bytes(out, &record.buffer);
}

pub(crate) fn read_unified_impl(record: &mut BodyRecord, input: &mut Bytes) -> CacheResult<()> {
    record.buffer = wire::get_bytes(input)?;
    Ok(())
}
