//! Borrowed, framing-validated document views.

use std::fmt;

use super::raw::{self, Element, RawError, RawIter};
use super::value::BsonValue;
use super::{DocBuf, ObjectId, read_i32_le};

/// Why a byte buffer could not be viewed as a BSON document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ViewError {
    /// The buffer is shorter than five bytes, or shorter than the length
    /// declared by the document header.
    #[error("buffer is too short for the document it claims to hold")]
    ShortRead,
    /// The length header declares an impossible size.
    #[error("document header declares an invalid length")]
    InvalidHeader,
    /// The byte at `length - 1` is not zero.
    #[error("document is missing its trailing zero byte")]
    InvalidTerminator,
}

/// A read-only view of a single BSON document.
///
/// Construction validates the outer framing only: the length header and the
/// trailing zero byte. Elements are validated lazily by [`RawIter`] as
/// iteration advances. The view's slice is trimmed to the declared length;
/// excess bytes in the source buffer are ignored.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DocView<'a> {
    bytes: &'a [u8],
}

static EMPTY_DOC: [u8; 5] = [5, 0, 0, 0, 0];

impl<'a> DocView<'a> {
    /// Validate `data` as a BSON document and return a view of it.
    ///
    /// Requirements, in the order they are checked:
    ///
    /// 1. `data.len() >= 5`
    /// 2. the little-endian `i32` header is at least 5
    /// 3. the header value fits within `data`
    /// 4. the byte at `header - 1` is zero
    pub fn parse(data: &'a [u8]) -> Result<DocView<'a>, ViewError> {
        if data.len() < 5 {
            return Err(ViewError::ShortRead);
        }
        let declared = read_i32_le(data, 0);
        if declared < 5 {
            return Err(ViewError::InvalidHeader);
        }
        let declared = declared as usize;
        if declared > data.len() {
            return Err(ViewError::ShortRead);
        }
        if data[declared - 1] != 0 {
            return Err(ViewError::InvalidTerminator);
        }
        Ok(DocView {
            bytes: &data[..declared],
        })
    }

    /// The five-byte empty document.
    pub fn empty() -> DocView<'static> {
        DocView { bytes: &EMPTY_DOC }
    }

    /// Wrap bytes that are already known to satisfy the framing invariants.
    pub(crate) fn new_unchecked(bytes: &'a [u8]) -> DocView<'a> {
        debug_assert!(DocView::parse(bytes).is_ok());
        DocView { bytes }
    }

    /// The document bytes, exactly `byte_len()` long.
    pub fn bytes(self) -> &'a [u8] {
        self.bytes
    }

    /// The size declared by the header, including the header itself and the
    /// trailing zero.
    pub fn byte_len(self) -> usize {
        self.bytes.len()
    }

    /// `true` when the document holds no elements.
    pub fn is_empty(self) -> bool {
        self.bytes.len() == 5
    }

    /// Iterate the elements of the document. Iteration stops at the first
    /// malformed element, yielding the decode error.
    pub fn iter(self) -> RawIter<'a> {
        RawIter::new(self.bytes)
    }

    /// Copy the document into an owned buffer.
    pub fn to_owned_doc(self) -> DocBuf {
        DocBuf::from_view(self)
    }

    /// Find the first element whose key equals `key`.
    ///
    /// `Ok(None)` means the key is absent; `Err` means iteration hit a
    /// malformed element before the key was found.
    pub fn get(self, key: &str) -> Result<Option<Element<'a>>, RawError> {
        for el in self.iter() {
            let el = el?;
            if raw::key_eq(el.key_bytes(), key.as_bytes()) {
                return Ok(Some(el));
            }
        }
        Ok(None)
    }

    /// Look up `key` and decode its value, swallowing malformed-document
    /// errors into `None`.
    pub fn get_value(self, key: &str) -> Option<BsonValue<'a>> {
        self.get(key).ok().flatten().and_then(|el| el.value().ok())
    }

    pub fn get_str(self, key: &str) -> Option<&'a str> {
        match self.get_value(key) {
            Some(BsonValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_i32(self, key: &str) -> Option<i32> {
        match self.get_value(key) {
            Some(BsonValue::Int32(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_i64(self, key: &str) -> Option<i64> {
        match self.get_value(key) {
            Some(BsonValue::Int64(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_f64(self, key: &str) -> Option<f64> {
        match self.get_value(key) {
            Some(BsonValue::Double(v)) => Some(v),
            _ => None,
        }
    }

    /// Numeric lookup across the integer and double representations.
    pub fn get_number(self, key: &str) -> Option<f64> {
        self.get_value(key).and_then(|v| v.as_f64_lossy())
    }

    pub fn get_bool(self, key: &str) -> Option<bool> {
        match self.get_value(key) {
            Some(BsonValue::Boolean(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_doc(self, key: &str) -> Option<DocView<'a>> {
        match self.get_value(key) {
            Some(BsonValue::Document(d)) => Some(d),
            _ => None,
        }
    }

    pub fn get_array(self, key: &str) -> Option<DocView<'a>> {
        match self.get_value(key) {
            Some(BsonValue::Array(d)) => Some(d),
            _ => None,
        }
    }

    pub fn get_object_id(self, key: &str) -> Option<ObjectId> {
        match self.get_value(key) {
            Some(BsonValue::ObjectId(oid)) => Some(oid),
            _ => None,
        }
    }
}

impl fmt::Debug for DocView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        super::extjson::fmt_doc(*self, f)
    }
}

impl fmt::Display for DocView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        super::extjson::fmt_doc(*self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_valid() {
        let bytes = [5u8, 0, 0, 0, 0];
        let view = DocView::parse(&bytes).unwrap();
        assert_eq!(view.byte_len(), 5);
        assert!(view.is_empty());
        assert_eq!(view.iter().count(), 0);
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert_eq!(DocView::parse(&[]), Err(ViewError::ShortRead));
        assert_eq!(DocView::parse(&[4, 0, 0, 0]), Err(ViewError::ShortRead));
    }

    #[test]
    fn header_below_minimum_is_rejected() {
        assert_eq!(
            DocView::parse(&[4, 0, 0, 0, 0]),
            Err(ViewError::InvalidHeader)
        );
        assert_eq!(
            DocView::parse(&[0, 0, 0, 0, 0]),
            Err(ViewError::InvalidHeader)
        );
        // Negative header
        assert_eq!(
            DocView::parse(&[0xFF, 0xFF, 0xFF, 0xFF, 0]),
            Err(ViewError::InvalidHeader)
        );
    }

    #[test]
    fn header_longer_than_buffer_is_rejected() {
        assert_eq!(
            DocView::parse(&[6, 0, 0, 0, 0]),
            Err(ViewError::ShortRead)
        );
    }

    #[test]
    fn missing_terminator_is_rejected() {
        assert_eq!(
            DocView::parse(&[5, 0, 0, 0, 1]),
            Err(ViewError::InvalidTerminator)
        );
    }

    #[test]
    fn excess_bytes_are_ignored() {
        // A 5-byte document followed by trailing garbage.
        let bytes = [5u8, 0, 0, 0, 0, 0xAB, 0xCD];
        let view = DocView::parse(&bytes).unwrap();
        assert_eq!(view.byte_len(), 5);
        assert_eq!(view.bytes(), &bytes[..5]);
    }

    #[test]
    fn typed_lookups() {
        // { "s": "x", "n": 7, "b": true }
        let mut doc = DocBuf::new();
        let mut m = doc.mutate();
        m.append_str("s", "x").unwrap();
        m.append_int32("n", 7).unwrap();
        m.append_bool("b", true).unwrap();
        let view = doc.as_view();
        assert_eq!(view.get_str("s"), Some("x"));
        assert_eq!(view.get_i32("n"), Some(7));
        assert_eq!(view.get_bool("b"), Some(true));
        assert_eq!(view.get_str("missing"), None);
        assert_eq!(view.get_i32("s"), None);
        assert_eq!(view.get_number("n"), Some(7.0));
    }
}
