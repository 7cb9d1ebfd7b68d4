//! Compact binary encoding of requests.
//!
//! The layout follows Bond's compact binary protocol: every field starts with a header holding
//! its type and id, integers are LEB128 varints (zig-zag for signed values), strings and
//! containers are count-prefixed and every struct ends with a stop marker.

use crate::{
    convert::{now_millis, time_to_ticks},
    models::{EnrichedEvent, Property, PropertyClass, PropertyValue, Request},
};
use base64::Engine as _;
use bytes::Bytes;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Largest request body sent to the collector, in bytes.
pub const MAX_REQUEST_SIZE: usize = 2_936_012;

const DATA_PACKAGE_SOURCE: &str = "rust_default_source";
const RECORD_TYPE_EVENT: i32 = 1;
const PII_SCRUB_TYPE_O365: i32 = 1;

// Worst case for a container header: type byte(s) plus a five byte varint count.
const MAX_CONTAINER_HEADER: usize = 7;
// Field header of the request map plus the stop byte.
const REQUEST_OVERHEAD: usize = 2 + MAX_CONTAINER_HEADER + 1;

const BT_STOP: u8 = 0;
const BT_BOOL: u8 = 2;
const BT_DOUBLE: u8 = 8;
const BT_STRING: u8 = 9;
const BT_STRUCT: u8 = 10;
const BT_LIST: u8 = 11;
const BT_MAP: u8 = 13;
const BT_INT32: u8 = 16;
const BT_INT64: u8 = 17;

mod field {
    pub(super) const REQUEST_TOKEN_TO_PACKAGES: u16 = 3;

    pub(super) const PACKAGE_SOURCE: u16 = 2;
    pub(super) const PACKAGE_ID: u16 = 5;
    pub(super) const PACKAGE_TIMESTAMP: u16 = 6;
    pub(super) const PACKAGE_RECORDS: u16 = 8;

    pub(super) const RECORD_ID: u16 = 1;
    pub(super) const RECORD_TIMESTAMP: u16 = 3;
    pub(super) const RECORD_TYPE: u16 = 5;
    pub(super) const RECORD_EVENT_TYPE: u16 = 6;
    pub(super) const RECORD_EXTENSION: u16 = 13;
    pub(super) const RECORD_RECORD_TYPE: u16 = 24;
    pub(super) const RECORD_PII: u16 = 30;
    pub(super) const RECORD_BOOLS: u16 = 31;
    pub(super) const RECORD_DATES: u16 = 32;
    pub(super) const RECORD_INT64S: u16 = 33;
    pub(super) const RECORD_DOUBLES: u16 = 34;
    pub(super) const RECORD_CUSTOMER_CONTENT: u16 = 36;

    pub(super) const PII_SCRUB_TYPE: u16 = 1;
    pub(super) const PII_KIND: u16 = 2;
    pub(super) const PII_RAW_CONTENT: u16 = 3;

    pub(super) const CUSTOMER_CONTENT_KIND: u16 = 1;
    pub(super) const CUSTOMER_CONTENT_RAW_CONTENT: u16 = 2;
}

/// Representation of the request body on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadEncoding {
    /// Raw bytes.
    #[default]
    Binary,
    /// Base64 text of the same bytes, for transports that only carry text.
    Base64,
}

/// Result of encoding a request.
#[derive(Debug)]
pub(crate) struct EncodedRequest {
    pub(crate) body: Bytes,
    /// Events contained in `body`.
    pub(crate) sent: Request,
    /// Events that did not fit and must be sent with another request.
    pub(crate) remaining: Option<Request>,
    /// Events that can never be sent because they are too large on their own.
    pub(crate) oversized: Vec<EnrichedEvent>,
}

#[derive(Debug, Clone)]
pub(crate) struct Serializer {
    max_request_size: usize,
    encoding: PayloadEncoding,
}

impl Serializer {
    pub(crate) fn new(encoding: PayloadEncoding) -> Self {
        Serializer {
            max_request_size: MAX_REQUEST_SIZE,
            encoding,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_max_request_size(mut self, max_request_size: usize) -> Self {
        self.max_request_size = max_request_size;
        self
    }

    pub(crate) fn encoding(&self) -> PayloadEncoding {
        self.encoding
    }

    pub(crate) fn encode(&self, request: Request) -> EncodedRequest {
        let package_overhead = package_header_size() + MAX_CONTAINER_HEADER + 1;
        let mut total = REQUEST_OVERHEAD;
        let mut packages: Vec<(String, Vec<Vec<Vec<u8>>>)> = Vec::new();
        let mut sent = Request::new();
        let mut remaining = Request::new();
        let mut oversized = Vec::new();
        let mut full = false;

        for (token, batches) in request.into_batches() {
            let token_overhead = string_size(&token) + MAX_CONTAINER_HEADER;
            if full || total + token_overhead + package_overhead > self.max_request_size {
                full = true;
                for batch in batches {
                    remaining.add_batch(token.clone(), batch);
                }
                continue;
            }
            total += token_overhead;
            let mut token_packages = Vec::new();

            for batch in batches {
                if full {
                    remaining.add_batch(token.clone(), batch);
                    continue;
                }
                total += package_overhead;
                let mut accepted = Vec::with_capacity(batch.len());
                let mut records = Vec::with_capacity(batch.len());
                let mut events = batch.into_iter();
                while let Some(event) = events.next() {
                    let record = encode_record(&event);
                    let alone = REQUEST_OVERHEAD + token_overhead + package_overhead + record.len();
                    if alone > self.max_request_size {
                        oversized.push(event);
                        continue;
                    }
                    if total + record.len() > self.max_request_size {
                        full = true;
                        let mut tail = vec![event];
                        tail.extend(events);
                        remaining.add_batch(token.clone(), tail);
                        break;
                    }
                    total += record.len();
                    accepted.push(event);
                    records.push(record);
                }
                if records.is_empty() {
                    total -= package_overhead;
                } else {
                    token_packages.push(records);
                    sent.add_batch(token.clone(), accepted);
                }
            }

            if token_packages.is_empty() {
                total -= token_overhead;
            } else {
                packages.push((token, token_packages));
            }
        }

        let bytes = write_request(&packages);
        let body = match self.encoding {
            PayloadEncoding::Binary => Bytes::from(bytes),
            PayloadEncoding::Base64 => {
                Bytes::from(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
        };
        EncodedRequest {
            body,
            sent,
            remaining: Some(remaining).filter(|r| !r.is_empty()),
            oversized,
        }
    }
}

fn write_request(packages: &[(String, Vec<Vec<Vec<u8>>>)]) -> Vec<u8> {
    let mut writer = CompactWriter::default();
    writer.field_begin(BT_MAP, field::REQUEST_TOKEN_TO_PACKAGES);
    writer.map_begin(BT_STRING, BT_LIST, packages.len());
    for (token, token_packages) in packages {
        writer.string(token);
        writer.list_begin(BT_STRUCT, token_packages.len());
        for records in token_packages {
            write_package_header(&mut writer);
            writer.field_begin(BT_LIST, field::PACKAGE_RECORDS);
            writer.list_begin(BT_STRUCT, records.len());
            for record in records {
                writer.raw(record);
            }
            writer.struct_end();
        }
    }
    writer.struct_end();
    writer.buf
}

fn write_package_header(writer: &mut CompactWriter) {
    writer.field_begin(BT_STRING, field::PACKAGE_SOURCE);
    writer.string(DATA_PACKAGE_SOURCE);
    writer.field_begin(BT_STRING, field::PACKAGE_ID);
    writer.string(&uuid::Uuid::new_v4().to_string());
    writer.field_begin(BT_INT64, field::PACKAGE_TIMESTAMP);
    writer.int64(now_millis());
}

fn package_header_size() -> usize {
    let mut writer = CompactWriter::default();
    write_package_header(&mut writer);
    // The timestamp varint may grow by a byte between measuring and writing.
    writer.buf.len() + 1
}

fn string_size(value: &str) -> usize {
    let mut writer = CompactWriter::default();
    writer.string(value);
    writer.buf.len()
}

/// Encode a single record struct, including its stop marker.
fn encode_record(event: &EnrichedEvent) -> Vec<u8> {
    let mut extension = BTreeMap::new();
    let mut bools = BTreeMap::new();
    let mut dates = BTreeMap::new();
    let mut int64s = BTreeMap::new();
    let mut doubles = BTreeMap::new();
    let mut pii = BTreeMap::new();
    let mut customer_content = BTreeMap::new();

    for (name, Property { value, class }) in &event.properties {
        match class {
            PropertyClass::Pii(kind) => {
                pii.insert(name.as_str(), (*kind as i32, value.to_string()));
            }
            PropertyClass::CustomerContent(kind) => {
                customer_content.insert(name.as_str(), (*kind as i32, value.to_string()));
            }
            PropertyClass::Plain => match value {
                PropertyValue::String(v) => {
                    extension.insert(name.as_str(), v.as_str());
                }
                PropertyValue::Int64(v) => {
                    int64s.insert(name.as_str(), *v);
                }
                PropertyValue::Double(v) => {
                    doubles.insert(name.as_str(), *v);
                }
                PropertyValue::Bool(v) => {
                    bools.insert(name.as_str(), *v);
                }
                PropertyValue::Date(v) => {
                    dates.insert(name.as_str(), time_to_ticks(*v));
                }
            },
        }
    }

    let mut w = CompactWriter::default();
    w.field_begin(BT_STRING, field::RECORD_ID);
    w.string(&event.id);
    w.field_begin(BT_INT64, field::RECORD_TIMESTAMP);
    w.int64(event.timestamp);
    w.field_begin(BT_STRING, field::RECORD_TYPE);
    w.string(&event.base_type);
    w.field_begin(BT_STRING, field::RECORD_EVENT_TYPE);
    w.string(&event.name);
    if !extension.is_empty() {
        w.field_begin(BT_MAP, field::RECORD_EXTENSION);
        w.map_begin(BT_STRING, BT_STRING, extension.len());
        for (k, v) in extension {
            w.string(k);
            w.string(v);
        }
    }
    w.field_begin(BT_INT32, field::RECORD_RECORD_TYPE);
    w.int32(RECORD_TYPE_EVENT);
    if !pii.is_empty() {
        w.field_begin(BT_MAP, field::RECORD_PII);
        w.map_begin(BT_STRING, BT_STRUCT, pii.len());
        for (k, (kind, raw)) in pii {
            w.string(k);
            w.field_begin(BT_INT32, field::PII_SCRUB_TYPE);
            w.int32(PII_SCRUB_TYPE_O365);
            w.field_begin(BT_INT32, field::PII_KIND);
            w.int32(kind);
            w.field_begin(BT_STRING, field::PII_RAW_CONTENT);
            w.string(&raw);
            w.struct_end();
        }
    }
    if !bools.is_empty() {
        w.field_begin(BT_MAP, field::RECORD_BOOLS);
        w.map_begin(BT_STRING, BT_BOOL, bools.len());
        for (k, v) in bools {
            w.string(k);
            w.bool(v);
        }
    }
    for (id, values) in [(field::RECORD_DATES, dates), (field::RECORD_INT64S, int64s)] {
        if !values.is_empty() {
            w.field_begin(BT_MAP, id);
            w.map_begin(BT_STRING, BT_INT64, values.len());
            for (k, v) in values {
                w.string(k);
                w.int64(v);
            }
        }
    }
    if !doubles.is_empty() {
        w.field_begin(BT_MAP, field::RECORD_DOUBLES);
        w.map_begin(BT_STRING, BT_DOUBLE, doubles.len());
        for (k, v) in doubles {
            w.string(k);
            w.double(v);
        }
    }
    if !customer_content.is_empty() {
        w.field_begin(BT_MAP, field::RECORD_CUSTOMER_CONTENT);
        w.map_begin(BT_STRING, BT_STRUCT, customer_content.len());
        for (k, (kind, raw)) in customer_content {
            w.string(k);
            w.field_begin(BT_INT32, field::CUSTOMER_CONTENT_KIND);
            w.int32(kind);
            w.field_begin(BT_STRING, field::CUSTOMER_CONTENT_RAW_CONTENT);
            w.string(&raw);
            w.struct_end();
        }
    }
    w.struct_end();
    w.buf
}

#[derive(Debug, Default)]
struct CompactWriter {
    buf: Vec<u8>,
}

impl CompactWriter {
    fn field_begin(&mut self, type_id: u8, id: u16) {
        if id <= 5 {
            self.buf.push(type_id | ((id as u8) << 5));
        } else if id <= 0xff {
            self.buf.push(type_id | 0xc0);
            self.buf.push(id as u8);
        } else {
            self.buf.push(type_id | 0xe0);
            self.buf.extend_from_slice(&id.to_le_bytes());
        }
    }

    fn struct_end(&mut self) {
        self.buf.push(BT_STOP);
    }

    fn list_begin(&mut self, element_type: u8, count: usize) {
        self.buf.push(element_type);
        self.varint(count as u64);
    }

    fn map_begin(&mut self, key_type: u8, value_type: u8, count: usize) {
        self.buf.push(key_type);
        self.buf.push(value_type);
        self.varint(count as u64);
    }

    fn varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.push((value as u8) | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }

    fn int32(&mut self, value: i32) {
        self.varint(((value << 1) ^ (value >> 31)) as u32 as u64);
    }

    fn int64(&mut self, value: i64) {
        self.varint(((value << 1) ^ (value >> 63)) as u64);
    }

    fn bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    fn double(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn string(&mut self, value: &str) {
        self.varint(value.len() as u64);
        self.buf.extend_from_slice(value.as_bytes());
    }

    fn raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}
