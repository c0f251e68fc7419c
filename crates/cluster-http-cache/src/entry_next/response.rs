//! Response record layout: a unified header followed by a unified body.

use bytes::{Bytes, BytesMut};

use crate::entry::{BodyRecord, HeaderRecord};
use crate::error::CacheResult;

use super::super::ResponseRecord;

pub(crate) fn write_full_impl(record: &ResponseRecord, out: &mut BytesMut) {
    record.header().write_unified(out);
    record.body().write_unified(out);
}

pub(crate) fn read_full_impl(record: &mut ResponseRecord, input: &mut Bytes) -> CacheResult<()> {
    let mut header = HeaderRecord::default();
    header.read_unified(input)?;
    let mut body = BodyRecord::default();
    body.read_unified(input)?;
    *record = ResponseRecord::new(header, body);
    Ok(())
}
