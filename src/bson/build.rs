//! Declarative document construction on top of the mutator.
//!
//! `DocBuilder` appends elements in order and closes over nested builders
//! for subdocuments and arrays, so command documents can be written as one
//! expression instead of a mutator ceremony. Array builders number their
//! own keys.

use super::doc::DocBuf;
use super::mutate::MutateError;
use super::value::{ObjectId, Timestamp};
use super::view::DocView;

/// Builds a document by appending elements in call order.
pub struct DocBuilder {
    doc: DocBuf,
    err: Option<MutateError>,
}

impl DocBuilder {
    pub fn new() -> DocBuilder {
        DocBuilder {
            doc: DocBuf::new(),
            err: None,
        }
    }

    fn append(mut self, f: impl FnOnce(&mut super::mutate::DocMut<'_>) -> Result<usize, MutateError>) -> Self {
        if self.err.is_none() {
            let mut m = self.doc.mutate();
            if let Err(err) = f(&mut m) {
                self.err = Some(err);
            }
        }
        self
    }

    pub fn double(self, key: &str, value: f64) -> Self {
        self.append(|m| m.append_double(key, value))
    }

    pub fn str(self, key: &str, value: &str) -> Self {
        self.append(|m| m.append_str(key, value))
    }

    pub fn int32(self, key: &str, value: i32) -> Self {
        self.append(|m| m.append_int32(key, value))
    }

    pub fn int64(self, key: &str, value: i64) -> Self {
        self.append(|m| m.append_int64(key, value))
    }

    pub fn bool(self, key: &str, value: bool) -> Self {
        self.append(|m| m.append_bool(key, value))
    }

    pub fn null(self, key: &str) -> Self {
        self.append(|m| m.append_null(key))
    }

    pub fn object_id(self, key: &str, oid: ObjectId) -> Self {
        self.append(|m| m.append_object_id(key, oid))
    }

    pub fn datetime(self, key: &str, millis: i64) -> Self {
        self.append(|m| m.append_datetime(key, millis))
    }

    pub fn timestamp(self, key: &str, ts: Timestamp) -> Self {
        self.append(|m| m.append_timestamp(key, ts))
    }

    pub fn binary(self, key: &str, subtype: u8, data: &[u8]) -> Self {
        self.append(|m| m.append_binary(key, subtype, data))
    }

    pub fn regex(self, key: &str, pattern: &str, options: &str) -> Self {
        self.append(|m| m.append_regex(key, pattern, options))
    }

    /// Append an already-encoded document.
    pub fn doc_view(self, key: &str, value: DocView<'_>) -> Self {
        self.append(|m| m.append_doc(key, value))
    }

    /// Append a subdocument built by `f`.
    pub fn doc(self, key: &str, f: impl FnOnce(DocBuilder) -> DocBuilder) -> Self {
        let built = f(DocBuilder::new());
        match built.build() {
            Ok(sub) => self.append(|m| m.append_doc(key, sub.as_view())),
            Err(err) => {
                let mut this = self;
                if this.err.is_none() {
                    this.err = Some(err);
                }
                this
            }
        }
    }

    /// Append an array built by `f`; the array builder numbers its keys.
    pub fn array(self, key: &str, f: impl FnOnce(ArrayBuilder) -> ArrayBuilder) -> Self {
        let built = f(ArrayBuilder::new());
        match built.build() {
            Ok(arr) => self.append(|m| m.append_array(key, arr.as_view())),
            Err(err) => {
                let mut this = self;
                if this.err.is_none() {
                    this.err = Some(err);
                }
                this
            }
        }
    }

    pub fn build(self) -> Result<DocBuf, MutateError> {
        match self.err {
            None => Ok(self.doc),
            Some(err) => Err(err),
        }
    }
}

impl Default for DocBuilder {
    fn default() -> DocBuilder {
        DocBuilder::new()
    }
}

/// Builds an array document with `"0"`, `"1"`, ... keys.
pub struct ArrayBuilder {
    inner: DocBuilder,
    next: u32,
}

impl ArrayBuilder {
    pub fn new() -> ArrayBuilder {
        ArrayBuilder {
            inner: DocBuilder::new(),
            next: 0,
        }
    }

    fn key(&mut self) -> String {
        let key = self.next.to_string();
        self.next += 1;
        key
    }

    pub fn push_str(mut self, value: &str) -> Self {
        let key = self.key();
        self.inner = self.inner.str(&key, value);
        self
    }

    pub fn push_int32(mut self, value: i32) -> Self {
        let key = self.key();
        self.inner = self.inner.int32(&key, value);
        self
    }

    pub fn push_int64(mut self, value: i64) -> Self {
        let key = self.key();
        self.inner = self.inner.int64(&key, value);
        self
    }

    pub fn push_double(mut self, value: f64) -> Self {
        let key = self.key();
        self.inner = self.inner.double(&key, value);
        self
    }

    pub fn push_doc_view(mut self, value: DocView<'_>) -> Self {
        let key = self.key();
        self.inner = self.inner.doc_view(&key, value);
        self
    }

    pub fn push_doc(mut self, f: impl FnOnce(DocBuilder) -> DocBuilder) -> Self {
        let key = self.key();
        self.inner = self.inner.doc(&key, f);
        self
    }

    pub fn build(self) -> Result<DocBuf, MutateError> {
        self.inner.build()
    }
}

impl Default for ArrayBuilder {
    fn default() -> ArrayBuilder {
        ArrayBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_matches_mutator_output() {
        let built = DocBuilder::new()
            .str("name", "ada")
            .int32("n", 3)
            .doc("inner", |d| d.bool("ok", true))
            .array("xs", |a| a.push_int32(1).push_int32(2))
            .build()
            .unwrap();

        let mut manual = DocBuf::new();
        {
            let mut m = manual.mutate();
            m.append_str("name", "ada").unwrap();
            m.append_int32("n", 3).unwrap();
            let pos = m.append_doc("inner", DocView::empty()).unwrap();
            let mut inner = m.child_at(pos).unwrap();
            inner.append_bool("ok", true).unwrap();
            drop(inner);
            let pos = m.append_array("xs", DocView::empty()).unwrap();
            let mut xs = m.child_at(pos).unwrap();
            xs.append_int32("0", 1).unwrap();
            xs.append_int32("1", 2).unwrap();
        }
        assert_eq!(built, manual);
    }

    #[test]
    fn empty_builder_is_the_empty_document() {
        let doc = DocBuilder::new().build().unwrap();
        assert_eq!(doc.bytes(), &[5, 0, 0, 0, 0]);
    }

    #[test]
    fn array_keys_count_up() {
        let doc = DocBuilder::new()
            .array("xs", |a| a.push_str("a").push_str("b").push_str("c"))
            .build()
            .unwrap();
        let xs = doc.as_view().get_array("xs").unwrap();
        assert_eq!(xs.get_str("0"), Some("a"));
        assert_eq!(xs.get_str("1"), Some("b"));
        assert_eq!(xs.get_str("2"), Some("c"));
    }
}
