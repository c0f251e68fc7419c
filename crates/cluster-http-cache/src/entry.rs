//! Cache entry records and their binary codec.
//!
//! Every stored value starts with a big-endian `i32` type id followed by the
//! record's field layout:
//!
//! ```text
//! 101 header    fields | variant key | body size u64 | version i32
//! 100 body      version i32 | bytes
//! 102 response  header (unified) | body (unified)
//!
//! unified header  fields | variant key | version i32
//! unified body    bytes
//! ```
//!
//! The unified layouts drop what the enclosing response already implies: the
//! body size is the embedded body's length and the body version is the
//! header's.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{CacheError, CacheResult};
use crate::key::VariantKey;
use crate::types::ResponseHeaders;
use crate::wire;

#[path = "entry_next/mod.rs"]
mod entry_next;

pub const BODY_TYPE_ID: i32 = 100;
pub const HEADER_TYPE_ID: i32 = 101;
pub const RESPONSE_TYPE_ID: i32 = 102;

/// A record with a registered type id and a full wire layout.
pub trait WireRecord: Sized {
    const TYPE_ID: i32;

    fn write_full(&self, out: &mut BytesMut);

    /// Populate `self` from `input`, which is positioned after the type id.
    fn read_full(&mut self, input: &mut Bytes) -> CacheResult<()>;

    fn from_entry(entry: Entry) -> Option<Self>;
}

/// Response headers plus the bookkeeping that ties bodies to them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderRecord {
    pub headers: ResponseHeaders,
    pub variant_key: VariantKey,
    /// Total body size in bytes.
    pub body_size: u64,
    /// Write generation. Body partitions with another version belong to
    /// another generation.
    pub version: i32,
}

impl HeaderRecord {
    pub fn new(
        headers: ResponseHeaders,
        variant_key: VariantKey,
        body_size: u64,
        version: i32,
    ) -> Self {
        Self {
            headers,
            variant_key,
            body_size,
            version,
        }
    }

    /// Write the layout used inside a [`ResponseRecord`].
    pub fn write_unified(&self, out: &mut BytesMut) {
        entry_next::header::write_unified_impl(self, out);
    }

    /// Read the layout used inside a [`ResponseRecord`]. `body_size` is left
    /// untouched.
    pub fn read_unified(&mut self, input: &mut Bytes) -> CacheResult<()> {
        entry_next::header::read_unified_impl(self, input)
    }
}

impl WireRecord for HeaderRecord {
    const TYPE_ID: i32 = HEADER_TYPE_ID;

    fn write_full(&self, out: &mut BytesMut) {
        entry_next::header::write_full_impl(self, out);
    }

    fn read_full(&mut self, input: &mut Bytes) -> CacheResult<()> {
        entry_next::header::read_full_impl(self, input)
    }

    fn from_entry(entry: Entry) -> Option<Self> {
        match entry {
            Entry::Header(h) => Some(h),
            _ => None,
        }
    }
}

/// One body partition (divided) or a whole body (unified).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyRecord {
    pub buffer: Bytes,
    /// Copied from the owning header at write time.
    pub version: i32,
}

impl BodyRecord {
    pub fn new(buffer: impl Into<Bytes>, version: i32) -> Self {
        Self {
            buffer: buffer.into(),
            version,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn write_unified(&self, out: &mut BytesMut) {
        entry_next::body::write_unified_impl(self, out);
    }

    /// `version` is left untouched.
    pub fn read_unified(&mut self, input: &mut Bytes) -> CacheResult<()> {
        entry_next::body::read_unified_impl(self, input)
    }
}

impl WireRecord for BodyRecord {
    const TYPE_ID: i32 = BODY_TYPE_ID;

    fn write_full(&self, out: &mut BytesMut) {
        entry_next::body::write_full_impl(self, out);
    }

    fn read_full(&mut self, input: &mut Bytes) -> CacheResult<()> {
        entry_next::body::read_full_impl(self, input)
    }

    fn from_entry(entry: Entry) -> Option<Self> {
        match entry {
            Entry::Body(b) => Some(b),
            _ => None,
        }
    }
}

/// A whole response stored as one entry (unified mode).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseRecord {
    header: HeaderRecord,
    body: BodyRecord,
}

impl ResponseRecord {
    /// The header's body size and the body's version are derived from each
    /// other so the pair is consistent by construction.
    pub fn new(mut header: HeaderRecord, mut body: BodyRecord) -> Self {
        header.body_size = body.len() as u64;
        body.version = header.version;
        Self { header, body }
    }

    pub fn header(&self) -> &HeaderRecord {
        &self.header
    }

    pub fn body(&self) -> &BodyRecord {
        &self.body
    }

    pub fn into_parts(self) -> (HeaderRecord, BodyRecord) {
        (self.header, self.body)
    }
}

impl WireRecord for ResponseRecord {
    const TYPE_ID: i32 = RESPONSE_TYPE_ID;

    fn write_full(&self, out: &mut BytesMut) {
        entry_next::response::write_full_impl(self, out);
    }

    fn read_full(&mut self, input: &mut Bytes) -> CacheResult<()> {
        entry_next::response::read_full_impl(self, input)
    }

    fn from_entry(entry: Entry) -> Option<Self> {
        match entry {
            Entry::Response(r) => Some(r),
            _ => None,
        }
    }
}

/// Any stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Header(HeaderRecord),
    Body(BodyRecord),
    Response(ResponseRecord),
}

impl Entry {
    pub fn type_id(&self) -> i32 {
        match self {
            Self::Header(_) => HEADER_TYPE_ID,
            Self::Body(_) => BODY_TYPE_ID,
            Self::Response(_) => RESPONSE_TYPE_ID,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Header(_) => "header",
            Self::Body(_) => "body",
            Self::Response(_) => "response",
        }
    }

    fn write_full(&self, out: &mut BytesMut) {
        match self {
            Self::Header(h) => h.write_full(out),
            Self::Body(b) => b.write_full(out),
            Self::Response(r) => r.write_full(out),
        }
    }

    fn read_full(&mut self, input: &mut Bytes) -> CacheResult<()> {
        match self {
            Self::Header(h) => h.read_full(input),
            Self::Body(b) => b.read_full(input),
            Self::Response(r) => r.read_full(input),
        }
    }
}

/// Maps type ids to empty records for the decoder to populate.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryFactory;

impl EntryFactory {
    pub const FACTORY_ID: i32 = 1000;

    /// An empty record for `type_id`, or `None` if the id is not registered.
    pub fn create(type_id: i32) -> Option<Entry> {
        match type_id {
            BODY_TYPE_ID => Some(Entry::Body(BodyRecord::default())),
            HEADER_TYPE_ID => Some(Entry::Header(HeaderRecord::default())),
            RESPONSE_TYPE_ID => Some(Entry::Response(ResponseRecord::default())),
            _ => None,
        }
    }

    pub fn type_ids() -> [i32; 3] {
        [BODY_TYPE_ID, HEADER_TYPE_ID, RESPONSE_TYPE_ID]
    }
}

/// Encode a record with its type id.
pub fn encode<R: WireRecord>(record: &R) -> Bytes {
    let mut out = BytesMut::new();
    wire::put_i32(&mut out, R::TYPE_ID);
    record.write_full(&mut out);
    out.freeze()
}

pub fn encode_entry(entry: &Entry) -> Bytes {
    let mut out = BytesMut::new();
    wire::put_i32(&mut out, entry.type_id());
    entry.write_full(&mut out);
    out.freeze()
}

/// Decode any registered record.
pub fn decode_entry(mut input: Bytes) -> CacheResult<Entry> {
    let type_id = wire::get_i32(&mut input)?;
    let mut entry = EntryFactory::create(type_id).ok_or(CacheError::UnknownTypeId { type_id })?;
    entry.read_full(&mut input)?;
    if input.has_remaining() {
        return Err(CacheError::codec(format!(
            "{} trailing bytes after {} record",
            input.remaining(),
            entry.kind()
        )));
    }
    Ok(entry)
}

/// Decode a record of a known kind.
pub fn decode<R: WireRecord>(input: Bytes) -> CacheResult<R> {
    let entry = decode_entry(input)?;
    let found = entry.kind();
    R::from_entry(entry).ok_or_else(|| {
        CacheError::codec(format!(
            "expected type id {}, found {} record",
            R::TYPE_ID,
            found
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn sample_header() -> HeaderRecord {
        HeaderRecord::new(
            ResponseHeaders::new()
                .with(":status", "200")
                .with("set-cookie", "a=1")
                .with("set-cookie", "b=2")
                .with("cache-control", "public, max-age=3600"),
            VariantKey::new("example.com", "/logo.png").with_vary("accept", "image/webp"),
            250,
            7,
        )
    }

    #[test]
    fn test_header_roundtrip() {
        let header = sample_header();
        let decoded: HeaderRecord = decode(encode(&header)).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_body_roundtrip() {
        let body = BodyRecord::new(vec![0_u8, 1, 2, 255], -42);
        let decoded: BodyRecord = decode(encode(&body)).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_empty_body_roundtrip() {
        let body = BodyRecord::new(Bytes::new(), 1);
        let decoded: BodyRecord = decode(encode(&body)).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_response_roundtrip() {
        let response = ResponseRecord::new(sample_header(), BodyRecord::new(&b"hello"[..], 0));
        assert_eq!(response.header().body_size, 5);
        assert_eq!(response.body().version, 7);

        let decoded: ResponseRecord = decode(encode(&response)).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_unified_header_roundtrip() {
        // The unified layout has no body size; records embedded in a
        // response round-trip once that field is supplied by the response.
        let header = HeaderRecord {
            body_size: 0,
            ..sample_header()
        };
        let mut out = BytesMut::new();
        header.write_unified(&mut out);

        let mut decoded = HeaderRecord::default();
        let mut input = out.freeze();
        decoded.read_unified(&mut input).unwrap();
        assert_eq!(decoded, header);
        assert!(!input.has_remaining());
    }

    #[test]
    fn test_unified_body_roundtrip() {
        let body = BodyRecord::new(&b"partition"[..], 0);
        let mut out = BytesMut::new();
        body.write_unified(&mut out);

        let mut decoded = BodyRecord::default();
        decoded.read_unified(&mut out.freeze()).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_unified_layout_is_smaller() {
        let header = sample_header();
        let mut unified = BytesMut::new();
        header.write_unified(&mut unified);
        let mut full = BytesMut::new();
        header.write_full(&mut full);
        assert_eq!(full.len(), unified.len() + 8);
    }

    #[test]
    fn test_decode_dispatches_on_type_id() {
        let body = BodyRecord::new(&b"x"[..], 3);
        match decode_entry(encode(&body)).unwrap() {
            Entry::Body(b) => assert_eq!(b, body),
            other => panic!("expected body, got {:?}", other),
        }
        assert_eq!(
            decode_entry(encode_entry(&Entry::Header(sample_header())))
                .unwrap()
                .type_id(),
            HEADER_TYPE_ID
        );
    }

    #[test]
    fn test_unknown_type_id() {
        let mut out = BytesMut::new();
        out.put_i32(999);
        out.put_slice(b"whatever");

        let err = decode_entry(out.freeze()).unwrap_err();
        assert!(matches!(err, CacheError::UnknownTypeId { type_id: 999 }));
        assert!(err.is_miss_equivalent());
    }

    #[test]
    fn test_wrong_kind_is_codec_error() {
        let body = BodyRecord::new(&b"x"[..], 3);
        let err = decode::<HeaderRecord>(encode(&body)).unwrap_err();
        assert!(matches!(err, CacheError::Codec { .. }));
    }

    #[test]
    fn test_truncated_header() {
        let encoded = encode(&sample_header());
        let truncated = encoded.slice(0..encoded.len() - 3);
        assert!(decode::<HeaderRecord>(truncated).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut out = BytesMut::from(&encode(&BodyRecord::new(&b"x"[..], 1))[..]);
        out.put_u8(0);
        assert!(matches!(
            decode_entry(out.freeze()),
            Err(CacheError::Codec { .. })
        ));
    }

    #[test]
    fn test_factory() {
        for type_id in EntryFactory::type_ids() {
            let entry = EntryFactory::create(type_id).unwrap();
            assert_eq!(entry.type_id(), type_id);
        }
        assert!(EntryFactory::create(0).is_none());
        assert!(EntryFactory::create(EntryFactory::FACTORY_ID).is_none());
    }
}
