//! Lazy element iteration with per-element validation.
//!
//! Framing validation (header, terminator) happens when a
//! [`DocView`](super::DocView) is created; everything element-level is
//! validated here, one element at a time, as the iterator advances. A
//! malformed element surfaces as an error item and stops the iterator.

use std::fmt;

use super::value::BsonValue;
use super::{ElementType, read_i32_le};

/// Reasons element decoding may fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawErrorKind {
    /// There is not enough data left in the document to hold the element.
    ShortRead,
    /// The element's type tag is not a recognized value.
    InvalidType,
    /// The element declares a length that does not fit the remaining data.
    InvalidLength,
    /// A key or string value is not valid UTF-8.
    InvalidUtf8,
}

/// An element decode error, tagged with the document offset at which
/// decoding stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?} at document offset {offset}")]
pub struct RawError {
    pub kind: RawErrorKind,
    pub offset: usize,
}

impl RawError {
    fn at(kind: RawErrorKind, offset: usize) -> RawError {
        RawError { kind, offset }
    }
}

/// Compare two element keys: length first, then bytes.
pub fn key_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a == b
}

/// A decoded element inside a document.
///
/// Holds the full document slice plus the element's offset, so positions
/// can be handed to the mutator and nested documents can be re-framed
/// without copying.
#[derive(Clone, Copy)]
pub struct Element<'a> {
    doc: &'a [u8],
    offset: usize,
    key_len: usize,
    value_len: usize,
    ty: ElementType,
}

impl<'a> Element<'a> {
    pub fn element_type(&self) -> ElementType {
        self.ty
    }

    /// Byte offset of the element's type tag within the document.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total element size: tag + key + key terminator + value.
    pub fn size(&self) -> usize {
        1 + self.key_len + 1 + self.value_len
    }

    pub fn key_bytes(&self) -> &'a [u8] {
        &self.doc[self.offset + 1..self.offset + 1 + self.key_len]
    }

    /// The element key. Keys are validated as UTF-8 during decoding.
    pub fn key(&self) -> &'a str {
        // Checked in element_at before the Element is constructed.
        std::str::from_utf8(self.key_bytes()).unwrap_or_default()
    }

    /// The raw value bytes, exactly as laid out on the wire.
    pub fn value_bytes(&self) -> &'a [u8] {
        let start = self.offset + 1 + self.key_len + 1;
        &self.doc[start..start + self.value_len]
    }

    /// Decode the value into a typed representation.
    pub fn value(&self) -> Result<BsonValue<'a>, RawError> {
        BsonValue::decode(self.ty, self.value_bytes()).map_err(|kind| {
            RawError::at(kind, self.offset + 1 + self.key_len + 1)
        })
    }
}

impl fmt::Debug for Element<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("key", &self.key())
            .field("type", &self.ty)
            .field("offset", &self.offset)
            .finish()
    }
}

/// Result of positioning an iterator at a document offset.
pub(crate) enum Positioned<'a> {
    /// Positioned on the trailing zero of the document.
    End,
    At(Element<'a>),
}

/// Size in bytes of a regular expression value (two consecutive
/// null-terminated strings), or an error if the strings overrun the
/// remaining data. `value` extends to the end of the document, so the
/// document's own terminator reserves the final byte.
fn regex_value_size(value: &[u8]) -> Result<usize, RawErrorKind> {
    debug_assert!(!value.is_empty());
    // Pattern cstring. The document terminator guarantees a zero exists.
    let mut rx_len = match value.iter().position(|&b| b == 0) {
        Some(n) => n,
        None => return Err(RawErrorKind::ShortRead),
    };
    rx_len += 1; // pattern terminator
    let opt_avail = value.len() - rx_len;
    let opt_len = value[rx_len..]
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(opt_avail);
    // Two more zero bytes must follow the options string: its own
    // terminator and the document terminator.
    if opt_avail - opt_len < 2 {
        return Err(RawErrorKind::ShortRead);
    }
    Ok(rx_len + opt_len + 1)
}

/// Fixed size component and length-prefix flag per type tag. `None` for
/// unrecognized tags; the regex tag is handled separately.
fn size_spec(tag: u8) -> Option<(usize, bool)> {
    Some(match tag {
        0x01 => (8, false),     // double
        0x02 => (4, true),      // utf8
        0x03 => (0, true),      // document (prefix self-includes)
        0x04 => (0, true),      // array
        0x05 => (4 + 1, true),  // binary (+1 for subtype)
        0x06 => (0, false),     // undefined
        0x07 => (12, false),    // oid
        0x08 => (1, false),     // bool
        0x09 => (8, false),     // datetime
        0x0A => (0, false),     // null
        0x0C => (4 + 12, true), // dbpointer (string prefix + oid)
        0x0D => (4, true),      // js code
        0x0E => (4, true),      // symbol
        0x0F => (0, true),      // code with scope (prefix self-includes)
        0x10 => (4, false),     // int32
        0x11 => (8, false),     // timestamp
        0x12 => (8, false),     // int64
        0x13 => (16, false),    // decimal128
        0x7F => (0, false),     // maxkey
        0xFF => (0, false),     // minkey
        _ => return None,
    })
}

/// Compute the byte size of a value of type `tag` whose data begins at
/// `value[0]`. `value` runs to the end of the document and must be
/// non-empty. The value must fit strictly within `value` (the document
/// terminator reserves the final byte).
pub(crate) fn value_size(tag: u8, value: &[u8]) -> Result<usize, RawErrorKind> {
    debug_assert!(!value.is_empty());
    if tag == 0x0B {
        return regex_value_size(value);
    }
    let Some((fixed, prefixed)) = size_spec(tag) else {
        return Err(RawErrorKind::InvalidType);
    };
    let mut full = fixed;
    if prefixed {
        // Four bytes for the length prefix must be readable.
        if value.len() <= 4 {
            return Err(RawErrorKind::InvalidLength);
        }
        let declared = read_i32_le(value, 0);
        if declared < 0 {
            return Err(RawErrorKind::InvalidLength);
        }
        full += declared as usize;
        if full > i32::MAX as usize {
            return Err(RawErrorKind::InvalidLength);
        }
    }
    if full < value.len() {
        Ok(full)
    } else {
        Err(RawErrorKind::InvalidLength)
    }
}

/// Decode the element (or terminal position) at `offset` within `doc`.
///
/// `doc` must be a framing-validated document slice; `offset` must point at
/// an element tag byte or at the trailing zero.
pub(crate) fn element_at(doc: &[u8], offset: usize) -> Result<Positioned<'_>, RawError> {
    let maxlen = doc.len() - offset;
    debug_assert!(maxlen > 0);
    if maxlen == 1 {
        // Only the document terminator remains.
        return Ok(Positioned::End);
    }
    let tag = doc[offset];
    // The key scan always finds a terminator because the document's final
    // byte is zero.
    let key_region = &doc[offset + 1..];
    let key_len = match key_region.iter().position(|&b| b == 0) {
        Some(n) => n,
        None => return Err(RawError::at(RawErrorKind::ShortRead, offset)),
    };
    if std::str::from_utf8(&key_region[..key_len]).is_err() {
        return Err(RawError::at(RawErrorKind::InvalidUtf8, offset));
    }
    let val_offset = offset + 1 + key_len + 1;
    if val_offset >= doc.len() {
        // No room left for even the document terminator after the key.
        return Err(RawError::at(RawErrorKind::ShortRead, offset));
    }
    let value_len = value_size(tag, &doc[val_offset..])
        .map_err(|kind| RawError::at(kind, offset))?;
    // value_size already rejected unknown tags.
    let Some(ty) = ElementType::from_u8(tag) else {
        return Err(RawError::at(RawErrorKind::InvalidType, offset));
    };
    Ok(Positioned::At(Element {
        doc,
        offset,
        key_len,
        value_len,
        ty,
    }))
}

/// Forward iterator over the elements of a document.
///
/// Yields `Err` once and then fuses if a malformed element is reached; the
/// caller distinguishes a clean drain from a failure by whether the last
/// item was an error.
pub struct RawIter<'a> {
    doc: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> RawIter<'a> {
    pub(crate) fn new(doc: &'a [u8]) -> RawIter<'a> {
        RawIter {
            doc,
            offset: 4,
            done: false,
        }
    }

    /// The document offset the iterator will decode next.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for RawIter<'a> {
    type Item = Result<Element<'a>, RawError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match element_at(self.doc, self.offset) {
            Ok(Positioned::End) => {
                self.done = true;
                None
            }
            Ok(Positioned::At(el)) => {
                self.offset += el.size();
                Some(Ok(el))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl std::iter::FusedIterator for RawIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bson::DocBuf;
    use crate::bson::view::DocView;

    fn doc_bytes(raw: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let total = 4 + raw.len() + 1;
        out.extend_from_slice(&(total as i32).to_le_bytes());
        out.extend_from_slice(raw);
        out.push(0);
        out
    }

    #[test]
    fn iterates_simple_document() {
        // { "foo": "bar" }
        let bytes = doc_bytes(&[
            0x02, b'f', b'o', b'o', 0, 4, 0, 0, 0, b'b', b'a', b'r', 0,
        ]);
        let view = DocView::parse(&bytes).unwrap();
        let els: Vec<_> = view.iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(els.len(), 1);
        assert_eq!(els[0].key(), "foo");
        assert_eq!(els[0].element_type(), ElementType::String);
        assert_eq!(els[0].offset(), 4);
        assert_eq!(els[0].size(), bytes.len() - 5);
    }

    #[test]
    fn invalid_type_tag_stops_iteration() {
        // Tag 0x20 is not a BSON type.
        let bytes = doc_bytes(&[0x20, b'k', 0, 1, 2, 3]);
        let view = DocView::parse(&bytes).unwrap();
        let mut it = view.iter();
        let err = it.next().unwrap().unwrap_err();
        assert_eq!(err.kind, RawErrorKind::InvalidType);
        assert!(it.next().is_none(), "iterator must fuse after an error");
    }

    #[test]
    fn oversized_string_prefix_is_invalid_length() {
        // String claims 100 bytes but the document is tiny.
        let bytes = doc_bytes(&[0x02, b'k', 0, 100, 0, 0, 0, b'x', 0]);
        let view = DocView::parse(&bytes).unwrap();
        let err = view.iter().next().unwrap().unwrap_err();
        assert_eq!(err.kind, RawErrorKind::InvalidLength);
    }

    #[test]
    fn fixed_size_overrun_is_invalid_length() {
        // int64 needs 8 value bytes; only 4 remain.
        let bytes = doc_bytes(&[0x12, b'k', 0, 1, 2, 3, 4]);
        let view = DocView::parse(&bytes).unwrap();
        let err = view.iter().next().unwrap().unwrap_err();
        assert_eq!(err.kind, RawErrorKind::InvalidLength);
    }

    #[test]
    fn regex_with_empty_parts() {
        // { "r": // with empty pattern and options }
        let bytes = doc_bytes(&[0x0B, b'r', 0, 0, 0]);
        let view = DocView::parse(&bytes).unwrap();
        let els: Vec<_> = view.iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(els.len(), 1);
        match els[0].value().unwrap() {
            BsonValue::Regex(re) => {
                assert_eq!(re.pattern, "");
                assert_eq!(re.options, "");
            }
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn regex_missing_second_terminator_is_rejected() {
        // Pattern "a", options run to the end of the document with no
        // terminator of their own.
        let bytes = doc_bytes(&[0x0B, b'r', 0, b'a', 0, b'i']);
        let view = DocView::parse(&bytes).unwrap();
        let err = view.iter().next().unwrap().unwrap_err();
        assert_eq!(err.kind, RawErrorKind::ShortRead);
    }

    #[test]
    fn element_offsets_strictly_increase() {
        let mut doc = DocBuf::new();
        let mut m = doc.mutate();
        m.append_int32("a", 1).unwrap();
        m.append_str("b", "two").unwrap();
        m.append_double("c", 3.0).unwrap();
        let view = doc.as_view();
        let mut last = 0;
        for el in view.iter() {
            let el = el.unwrap();
            assert!(el.offset() > last || last == 0);
            last = el.offset();
        }
    }

    #[test]
    fn key_comparison_checks_length_first() {
        assert!(key_eq(b"abc", b"abc"));
        assert!(!key_eq(b"abc", b"ab"));
        assert!(!key_eq(b"abc", b"abd"));
        assert!(key_eq(b"", b""));
    }
}
