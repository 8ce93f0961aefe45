//! Streaming BSON writer.
//!
//! The `bson` crate builds documents from owned values; the query emitter
//! needs the document/array/value-writer discipline instead, so `$or`/`$and`
//! framing can interleave with element writes. This writer provides that
//! discipline directly over a byte buffer: an element's type tag is
//! backpatched by the typed write that follows its header, container length
//! prefixes are backpatched on close.

use bson::oid::ObjectId;
use bson::Bson;

use crate::error::Error;

// BSON element type tags.
const TAG_DOUBLE: u8 = 0x01;
const TAG_STRING: u8 = 0x02;
const TAG_DOCUMENT: u8 = 0x03;
const TAG_ARRAY: u8 = 0x04;
const TAG_BINARY: u8 = 0x05;
const TAG_UNDEFINED: u8 = 0x06;
const TAG_OBJECT_ID: u8 = 0x07;
const TAG_BOOL: u8 = 0x08;
const TAG_DATETIME: u8 = 0x09;
const TAG_NULL: u8 = 0x0A;
const TAG_REGEX: u8 = 0x0B;
const TAG_JAVASCRIPT: u8 = 0x0D;
const TAG_SYMBOL: u8 = 0x0E;
const TAG_INT32: u8 = 0x10;
const TAG_TIMESTAMP: u8 = 0x11;
const TAG_INT64: u8 = 0x12;
const TAG_DECIMAL128: u8 = 0x13;
const TAG_MAX_KEY: u8 = 0x7F;
const TAG_MIN_KEY: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Document,
    Array,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    /// Offset of the 4-byte length prefix.
    start: usize,
    /// Next array element index.
    index: u32,
}

/// Streams one BSON document (or array) into a borrowed buffer.
#[derive(Debug)]
pub struct ValueWriter<'a> {
    buf: &'a mut Vec<u8>,
    frames: Vec<Frame>,
    /// Offset of the type tag the next typed write backpatches.
    pending: Option<usize>,
}

impl<'a> ValueWriter<'a> {
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        ValueWriter {
            buf,
            frames: Vec::with_capacity(8),
            pending: None,
        }
    }

    /// Open a document: at the top level, or as the value of the pending
    /// element.
    pub fn begin_document(&mut self) -> Result<(), Error> {
        match self.pending.take() {
            Some(at) => self.buf[at] = TAG_DOCUMENT,
            None if self.frames.is_empty() && self.buf.is_empty() => {}
            None => return Err(Error::Emit("document opened outside an element".into())),
        }
        self.open_frame(FrameKind::Document);
        Ok(())
    }

    /// Open an array as the value of the pending element.
    pub fn begin_array(&mut self) -> Result<(), Error> {
        let at = self
            .pending
            .take()
            .ok_or_else(|| Error::Emit("array opened outside an element".into()))?;
        self.buf[at] = TAG_ARRAY;
        self.open_frame(FrameKind::Array);
        Ok(())
    }

    fn open_frame(&mut self, kind: FrameKind) {
        self.frames.push(Frame {
            kind,
            start: self.buf.len(),
            index: 0,
        });
        self.buf.extend_from_slice(&[0; 4]);
    }

    pub fn end_document(&mut self) -> Result<(), Error> {
        self.close_frame(FrameKind::Document)
    }

    pub fn end_array(&mut self) -> Result<(), Error> {
        self.close_frame(FrameKind::Array)
    }

    fn close_frame(&mut self, kind: FrameKind) -> Result<(), Error> {
        if self.pending.is_some() {
            return Err(Error::Emit("element is missing its value".into()));
        }
        let frame = match self.frames.pop() {
            Some(f) if f.kind == kind => f,
            _ => return Err(Error::Emit("unbalanced container close".into())),
        };
        self.buf.push(0);
        let len = (self.buf.len() - frame.start) as i32;
        self.buf[frame.start..frame.start + 4].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }

    /// Start a named element in the current document. The next typed or
    /// container write supplies its value.
    pub fn document_element(&mut self, name: &str) -> Result<(), Error> {
        if self.pending.is_some() {
            return Err(Error::Emit("element is missing its value".into()));
        }
        match self.frames.last() {
            Some(f) if f.kind == FrameKind::Document => {}
            _ => return Err(Error::Emit("element outside a document".into())),
        }
        self.push_element_header(name)
    }

    /// Start the next element in the current array; names are the running
    /// decimal index.
    pub fn array_element(&mut self) -> Result<(), Error> {
        if self.pending.is_some() {
            return Err(Error::Emit("element is missing its value".into()));
        }
        let index = match self.frames.last_mut() {
            Some(f) if f.kind == FrameKind::Array => {
                let i = f.index;
                f.index += 1;
                i
            }
            _ => return Err(Error::Emit("array element outside an array".into())),
        };
        self.push_element_header(&index.to_string())
    }

    fn push_element_header(&mut self, name: &str) -> Result<(), Error> {
        if name.as_bytes().contains(&0) {
            return Err(Error::Emit("element name contains a NUL byte".into()));
        }
        self.pending = Some(self.buf.len());
        self.buf.push(0);
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    fn set_tag(&mut self, tag: u8) -> Result<(), Error> {
        let at = self
            .pending
            .take()
            .ok_or_else(|| Error::Emit("value written outside an element".into()))?;
        self.buf[at] = tag;
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<(), Error> {
        self.set_tag(TAG_INT32)?;
        self.buf.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_i64(&mut self, value: i64) -> Result<(), Error> {
        self.set_tag(TAG_INT64)?;
        self.buf.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_f64(&mut self, value: f64) -> Result<(), Error> {
        self.set_tag(TAG_DOUBLE)?;
        self.buf.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), Error> {
        self.set_tag(TAG_BOOL)?;
        self.buf.push(u8::from(value));
        Ok(())
    }

    pub fn write_null(&mut self) -> Result<(), Error> {
        self.set_tag(TAG_NULL)
    }

    pub fn write_str(&mut self, value: &str) -> Result<(), Error> {
        self.set_tag(TAG_STRING)?;
        self.push_string(value);
        Ok(())
    }

    /// Milliseconds since the Unix epoch.
    pub fn write_datetime_ms(&mut self, millis: i64) -> Result<(), Error> {
        self.set_tag(TAG_DATETIME)?;
        self.buf.extend_from_slice(&millis.to_le_bytes());
        Ok(())
    }

    pub fn write_object_id(&mut self, id: ObjectId) -> Result<(), Error> {
        self.set_tag(TAG_OBJECT_ID)?;
        self.buf.extend_from_slice(&id.bytes());
        Ok(())
    }

    pub fn write_regex(&mut self, pattern: &str, options: &str) -> Result<(), Error> {
        if pattern.as_bytes().contains(&0) || options.as_bytes().contains(&0) {
            return Err(Error::Emit("regex contains a NUL byte".into()));
        }
        self.set_tag(TAG_REGEX)?;
        self.buf.extend_from_slice(pattern.as_bytes());
        self.buf.push(0);
        self.buf.extend_from_slice(options.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    /// Encode an arbitrary codec value, recursing into documents and arrays.
    pub fn write_bson(&mut self, value: &Bson) -> Result<(), Error> {
        match value {
            Bson::Double(v) => self.write_f64(*v),
            Bson::String(s) => self.write_str(s),
            Bson::Array(items) => {
                self.begin_array()?;
                for item in items {
                    self.array_element()?;
                    self.write_bson(item)?;
                }
                self.end_array()
            }
            Bson::Document(doc) => {
                self.begin_document()?;
                for (name, item) in doc {
                    self.document_element(name)?;
                    self.write_bson(item)?;
                }
                self.end_document()
            }
            Bson::Boolean(v) => self.write_bool(*v),
            Bson::Null => self.write_null(),
            Bson::RegularExpression(re) => self.write_regex(&re.pattern, &re.options),
            Bson::JavaScriptCode(code) => {
                self.set_tag(TAG_JAVASCRIPT)?;
                self.push_string(code);
                Ok(())
            }
            Bson::Int32(v) => self.write_i32(*v),
            Bson::Int64(v) => self.write_i64(*v),
            Bson::Timestamp(ts) => {
                self.set_tag(TAG_TIMESTAMP)?;
                self.buf.extend_from_slice(&ts.increment.to_le_bytes());
                self.buf.extend_from_slice(&ts.time.to_le_bytes());
                Ok(())
            }
            Bson::Binary(bin) => {
                self.set_tag(TAG_BINARY)?;
                self.buf
                    .extend_from_slice(&(bin.bytes.len() as i32).to_le_bytes());
                self.buf.push(u8::from(bin.subtype));
                self.buf.extend_from_slice(&bin.bytes);
                Ok(())
            }
            Bson::ObjectId(oid) => self.write_object_id(*oid),
            Bson::DateTime(dt) => self.write_datetime_ms(dt.timestamp_millis()),
            Bson::Symbol(s) => {
                self.set_tag(TAG_SYMBOL)?;
                self.push_string(s);
                Ok(())
            }
            Bson::Decimal128(d) => {
                self.set_tag(TAG_DECIMAL128)?;
                self.buf.extend_from_slice(&d.bytes());
                Ok(())
            }
            Bson::Undefined => self.set_tag(TAG_UNDEFINED),
            Bson::MaxKey => self.set_tag(TAG_MAX_KEY),
            Bson::MinKey => self.set_tag(TAG_MIN_KEY),
            other => Err(Error::Emit(format!(
                "unsupported parameter value: {other}"
            ))),
        }
    }

    fn push_string(&mut self, value: &str) {
        self.buf
            .extend_from_slice(&(value.len() as i32 + 1).to_le_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
    }

    /// Assert every container was closed.
    pub fn finish(&self) -> Result<(), Error> {
        if !self.frames.is_empty() || self.pending.is_some() {
            return Err(Error::Emit("unclosed container at end of emit".into()));
        }
        Ok(())
    }
}
