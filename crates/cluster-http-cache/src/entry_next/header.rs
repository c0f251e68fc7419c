//! Header record layouts.

use bytes::{Bytes, BytesMut};

use crate::error::CacheResult;
use crate::key::VariantKey;
use crate::types::ResponseHeaders;
use crate::wire;

use super::super::HeaderRecord;

pub(crate) fn write_full_impl(record: &HeaderRecord, out: &mut BytesMut) {
    wire::put_pairs(out, record.headers.fields());
    record.variant_key.write_to(out);
    wire::put_u64(out, record.body_size);
    wire::put_i32(out, record.version);
}

pub(crate) fn read_full_impl(record: &mut HeaderRecord, input: &mut Bytes) -> CacheResult<()> {
    record.headers = ResponseHeaders::from_fields(wire::get_pairs(input)?);
    record.variant_key = VariantKey::read_from(input)?;
    record.body_size = wire::get_u64(input)?;
    record.version = wire::get_i32(input)?;
    Ok(())
}

pub(crate) fn write_unified_impl(record: &HeaderRecord, out: &mut BytesMut) {
    wire::put_pairs(out, record.headers.fields());
    record.variant_key.write_to(out);
    wire::put_i32(out, record.version);
}

pub(crate) fn read_unified_impl(record: &mut HeaderRecord, input: &mut Bytes) -> CacheResult<()> {
    record.headers = ResponseHeaders::from_fields(wire::get_pairs(input)?);
    record.variant_key = VariantKey::read_from(input)?;
    record.version = wire::get_i32(input)?;
    Ok(())
}
