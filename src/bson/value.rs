//! Typed representations of BSON element values.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};

use rand::Rng;

use super::raw::RawErrorKind;
use super::view::DocView;
use super::{ElementType, read_i32_le};

/// A 12-byte BSON ObjectId: a 4-byte big-endian timestamp, a 5-byte
/// per-process random value, and a 3-byte big-endian counter.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

static PROCESS_RANDOM: OnceLock<[u8; 5]> = OnceLock::new();
static OID_COUNTER: OnceLock<AtomicU32> = OnceLock::new();

impl ObjectId {
    /// Generate a fresh id.
    pub fn new() -> ObjectId {
        let seconds = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let random = PROCESS_RANDOM.get_or_init(|| rand::thread_rng().r#gen());
        let counter = OID_COUNTER
            .get_or_init(|| AtomicU32::new(rand::thread_rng().r#gen()))
            .fetch_add(1, Ordering::Relaxed);
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(random);
        bytes[9..].copy_from_slice(&counter.to_be_bytes()[1..]);
        ObjectId(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> ObjectId {
        ObjectId(bytes)
    }

    pub fn bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        ObjectId::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

/// Error parsing an ObjectId from its 24-character hex form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("an ObjectId is 24 hexadecimal characters")]
pub struct ParseObjectIdError;

impl FromStr for ObjectId {
    type Err = ParseObjectIdError;

    fn from_str(s: &str) -> Result<ObjectId, ParseObjectIdError> {
        if s.len() != 24 || !s.is_ascii() {
            return Err(ParseObjectIdError);
        }
        let mut bytes = [0u8; 12];
        for (i, chunk) in s.as_bytes().chunks_exact(2).enumerate() {
            let hex = std::str::from_utf8(chunk).map_err(|_| ParseObjectIdError)?;
            bytes[i] = u8::from_str_radix(hex, 16).map_err(|_| ParseObjectIdError)?;
        }
        Ok(ObjectId(bytes))
    }
}

/// A borrowed BSON binary value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binary<'a> {
    pub subtype: u8,
    pub data: &'a [u8],
}

/// A borrowed regular expression value: pattern plus option letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegexRef<'a> {
    pub pattern: &'a str,
    pub options: &'a str,
}

/// A MongoDB internal timestamp: seconds plus an ordinal increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub time: u32,
    pub increment: u32,
}

impl Timestamp {
    pub(crate) fn from_u64(raw: u64) -> Timestamp {
        Timestamp {
            time: (raw >> 32) as u32,
            increment: raw as u32,
        }
    }

    pub(crate) fn to_u64(self) -> u64 {
        (u64::from(self.time) << 32) | u64::from(self.increment)
    }
}

/// An IEEE 754-2008 decimal128 value, kept as raw little-endian bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Decimal128([u8; 16]);

impl Decimal128 {
    pub fn from_bytes(bytes: [u8; 16]) -> Decimal128 {
        Decimal128(bytes)
    }

    pub fn bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for Decimal128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal128(")?;
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

/// A borrowed DBPointer value (deprecated on the wire, still decodable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbPointerRef<'a> {
    pub namespace: &'a str,
    pub id: ObjectId,
}

/// A borrowed code-with-scope value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodeWithScopeRef<'a> {
    pub code: &'a str,
    pub scope: DocView<'a>,
}

/// A decoded element value borrowing from the document it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BsonValue<'a> {
    Double(f64),
    String(&'a str),
    Document(DocView<'a>),
    Array(DocView<'a>),
    Binary(Binary<'a>),
    Undefined,
    ObjectId(ObjectId),
    Boolean(bool),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    Null,
    Regex(RegexRef<'a>),
    DbPointer(DbPointerRef<'a>),
    JavaScript(&'a str),
    Symbol(&'a str),
    JavaScriptWithScope(CodeWithScopeRef<'a>),
    Int32(i32),
    Timestamp(Timestamp),
    Int64(i64),
    Decimal128(Decimal128),
    MinKey,
    MaxKey,
}

/// Decode a length-prefixed BSON string: `i32 length` (including the
/// terminator) followed by the bytes and a trailing zero.
fn decode_string(value: &[u8]) -> Result<&str, RawErrorKind> {
    if value.len() < 5 {
        return Err(RawErrorKind::InvalidLength);
    }
    let declared = read_i32_le(value, 0);
    if declared < 1 || 4 + declared as usize > value.len() {
        return Err(RawErrorKind::InvalidLength);
    }
    let declared = declared as usize;
    if value[4 + declared - 1] != 0 {
        return Err(RawErrorKind::InvalidLength);
    }
    std::str::from_utf8(&value[4..4 + declared - 1]).map_err(|_| RawErrorKind::InvalidUtf8)
}

fn decode_cstring(value: &[u8]) -> Result<(&str, usize), RawErrorKind> {
    let len = value
        .iter()
        .position(|&b| b == 0)
        .ok_or(RawErrorKind::ShortRead)?;
    let s = std::str::from_utf8(&value[..len]).map_err(|_| RawErrorKind::InvalidUtf8)?;
    Ok((s, len + 1))
}

fn decode_doc(value: &[u8]) -> Result<DocView<'_>, RawErrorKind> {
    DocView::parse(value).map_err(|e| match e {
        super::ViewError::ShortRead => RawErrorKind::ShortRead,
        _ => RawErrorKind::InvalidLength,
    })
}

impl<'a> BsonValue<'a> {
    /// Decode a value of type `ty` from its exact wire bytes, as sized by
    /// the iterator.
    pub(crate) fn decode(ty: ElementType, value: &'a [u8]) -> Result<BsonValue<'a>, RawErrorKind> {
        let fixed = |n: usize| -> Result<&'a [u8], RawErrorKind> {
            if value.len() < n {
                Err(RawErrorKind::ShortRead)
            } else {
                Ok(&value[..n])
            }
        };
        Ok(match ty {
            ElementType::Double => {
                let mut b = [0u8; 8];
                b.copy_from_slice(fixed(8)?);
                BsonValue::Double(f64::from_le_bytes(b))
            }
            ElementType::String => BsonValue::String(decode_string(value)?),
            ElementType::Document => BsonValue::Document(decode_doc(value)?),
            ElementType::Array => BsonValue::Array(decode_doc(value)?),
            ElementType::Binary => {
                if value.len() < 5 {
                    return Err(RawErrorKind::ShortRead);
                }
                let declared = read_i32_le(value, 0);
                if declared < 0 || 5 + declared as usize > value.len() {
                    return Err(RawErrorKind::InvalidLength);
                }
                BsonValue::Binary(Binary {
                    subtype: value[4],
                    data: &value[5..5 + declared as usize],
                })
            }
            ElementType::Undefined => BsonValue::Undefined,
            ElementType::ObjectId => {
                let mut b = [0u8; 12];
                b.copy_from_slice(fixed(12)?);
                BsonValue::ObjectId(ObjectId(b))
            }
            ElementType::Boolean => BsonValue::Boolean(fixed(1)?[0] != 0),
            ElementType::DateTime => {
                let mut b = [0u8; 8];
                b.copy_from_slice(fixed(8)?);
                BsonValue::DateTime(i64::from_le_bytes(b))
            }
            ElementType::Null => BsonValue::Null,
            ElementType::Regex => {
                let (pattern, used) = decode_cstring(value)?;
                let (options, _) = decode_cstring(&value[used..])?;
                BsonValue::Regex(RegexRef { pattern, options })
            }
            ElementType::DbPointer => {
                let (namespace, used) = {
                    let s = decode_string(value)?;
                    (s, 4 + s.len() + 1)
                };
                let mut b = [0u8; 12];
                if value.len() < used + 12 {
                    return Err(RawErrorKind::ShortRead);
                }
                b.copy_from_slice(&value[used..used + 12]);
                BsonValue::DbPointer(DbPointerRef {
                    namespace,
                    id: ObjectId(b),
                })
            }
            ElementType::JavaScript => BsonValue::JavaScript(decode_string(value)?),
            ElementType::Symbol => BsonValue::Symbol(decode_string(value)?),
            ElementType::JavaScriptWithScope => {
                if value.len() < 4 {
                    return Err(RawErrorKind::ShortRead);
                }
                let total = read_i32_le(value, 0);
                if total < 0 || (total as usize) > value.len() {
                    return Err(RawErrorKind::InvalidLength);
                }
                let code = decode_string(&value[4..])?;
                let scope_start = 4 + 4 + code.len() + 1;
                if scope_start > value.len() {
                    return Err(RawErrorKind::ShortRead);
                }
                let scope = decode_doc(&value[scope_start..])?;
                BsonValue::JavaScriptWithScope(CodeWithScopeRef { code, scope })
            }
            ElementType::Int32 => BsonValue::Int32(read_i32_le(fixed(4)?, 0)),
            ElementType::Timestamp => {
                let mut b = [0u8; 8];
                b.copy_from_slice(fixed(8)?);
                BsonValue::Timestamp(Timestamp::from_u64(u64::from_le_bytes(b)))
            }
            ElementType::Int64 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(fixed(8)?);
                BsonValue::Int64(i64::from_le_bytes(b))
            }
            ElementType::Decimal128 => {
                let mut b = [0u8; 16];
                b.copy_from_slice(fixed(16)?);
                BsonValue::Decimal128(Decimal128(b))
            }
            ElementType::MaxKey => BsonValue::MaxKey,
            ElementType::MinKey => BsonValue::MinKey,
        })
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            BsonValue::Double(_) => ElementType::Double,
            BsonValue::String(_) => ElementType::String,
            BsonValue::Document(_) => ElementType::Document,
            BsonValue::Array(_) => ElementType::Array,
            BsonValue::Binary(_) => ElementType::Binary,
            BsonValue::Undefined => ElementType::Undefined,
            BsonValue::ObjectId(_) => ElementType::ObjectId,
            BsonValue::Boolean(_) => ElementType::Boolean,
            BsonValue::DateTime(_) => ElementType::DateTime,
            BsonValue::Null => ElementType::Null,
            BsonValue::Regex(_) => ElementType::Regex,
            BsonValue::DbPointer(_) => ElementType::DbPointer,
            BsonValue::JavaScript(_) => ElementType::JavaScript,
            BsonValue::Symbol(_) => ElementType::Symbol,
            BsonValue::JavaScriptWithScope(_) => ElementType::JavaScriptWithScope,
            BsonValue::Int32(_) => ElementType::Int32,
            BsonValue::Timestamp(_) => ElementType::Timestamp,
            BsonValue::Int64(_) => ElementType::Int64,
            BsonValue::Decimal128(_) => ElementType::Decimal128,
            BsonValue::MinKey => ElementType::MinKey,
            BsonValue::MaxKey => ElementType::MaxKey,
        }
    }

    /// Coerce the numeric representations to `f64`. Server replies encode
    /// fields like `ok` as any of double, int32 or int64.
    pub fn as_f64_lossy(&self) -> Option<f64> {
        match self {
            BsonValue::Double(v) => Some(*v),
            BsonValue::Int32(v) => Some(f64::from(*v)),
            BsonValue::Int64(v) => Some(*v as f64),
            _ => None,
        }
    }
}
