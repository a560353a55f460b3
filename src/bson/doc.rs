//! Owned document buffers.

use std::fmt;

use super::mutate::DocMut;
use super::view::{DocView, ViewError};

/// An owned, growable BSON document.
///
/// The buffer always holds a framing-valid document: the first four bytes
/// are the little-endian length and the final byte is zero. Mutation goes
/// through [`DocMut`], which preserves those invariants across every
/// splice.
#[derive(Clone)]
pub struct DocBuf {
    bytes: Vec<u8>,
}

impl DocBuf {
    /// The empty document `{}`.
    pub fn new() -> DocBuf {
        DocBuf {
            bytes: vec![5, 0, 0, 0, 0],
        }
    }

    /// The empty document with room for `capacity` bytes before the buffer
    /// must reallocate.
    pub fn with_capacity(capacity: usize) -> DocBuf {
        let mut bytes = Vec::with_capacity(capacity.max(5));
        bytes.extend_from_slice(&[5, 0, 0, 0, 0]);
        DocBuf { bytes }
    }

    /// Take ownership of encoded document bytes, validating the framing.
    /// Excess bytes past the declared length are discarded.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<DocBuf, ViewError> {
        let len = DocView::parse(&bytes)?.byte_len();
        let mut bytes = bytes;
        bytes.truncate(len);
        Ok(DocBuf { bytes })
    }

    /// Copy a borrowed view into an owned buffer.
    pub fn from_view(view: DocView<'_>) -> DocBuf {
        DocBuf {
            bytes: view.bytes().to_vec(),
        }
    }

    pub fn as_view(&self) -> DocView<'_> {
        DocView::new_unchecked(&self.bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    /// Ensure the buffer can hold `total` bytes without reallocating.
    pub fn reserve_total(&mut self, total: usize) {
        if total > self.bytes.capacity() {
            self.bytes.reserve(total - self.bytes.len());
        }
    }

    /// Obtain a mutator rooted at this document.
    pub fn mutate(&mut self) -> DocMut<'_> {
        DocMut::root(self)
    }

    pub(crate) fn raw_bytes_mut(&mut self) -> &mut Vec<u8> {
        &mut self.bytes
    }
}

impl Default for DocBuf {
    fn default() -> DocBuf {
        DocBuf::new()
    }
}

impl PartialEq for DocBuf {
    fn eq(&self, other: &DocBuf) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for DocBuf {}

impl fmt::Debug for DocBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.as_view(), f)
    }
}

impl fmt::Display for DocBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_view(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_the_empty_document() {
        let doc = DocBuf::new();
        assert_eq!(doc.bytes(), &[5, 0, 0, 0, 0]);
        assert!(doc.as_view().is_empty());
    }

    #[test]
    fn from_bytes_validates_and_trims() {
        let doc = DocBuf::from_bytes(vec![5, 0, 0, 0, 0, 9, 9]).unwrap();
        assert_eq!(doc.byte_len(), 5);
        assert!(DocBuf::from_bytes(vec![6, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn round_trip_through_view() {
        let mut doc = DocBuf::new();
        doc.mutate().append_str("k", "v").unwrap();
        let copy = doc.as_view().to_owned_doc();
        assert_eq!(copy, doc);
        assert_eq!(copy.bytes(), doc.bytes());
    }

    #[test]
    fn reserve_total_grows_capacity() {
        let mut doc = DocBuf::new();
        doc.reserve_total(1024);
        assert!(doc.capacity() >= 1024);
    }
}
