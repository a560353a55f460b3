//! In-place document mutation.
//!
//! Every structural change funnels through one primitive,
//! [`DocMut::splice_at`]: delete a byte range, open a hole, fill it from a
//! caller buffer or with a placeholder, and rewrite the length header of
//! this document and every enclosing parent.
//!
//! A mutator is either rooted at a [`DocBuf`] or borrowed from a parent
//! mutator for a nested document element. Children carry the header
//! offsets of all enclosing documents (the frame stack), so a splice deep
//! in a nested document updates every length header above it in one pass.
//! Because a child mutably borrows its parent, the compiler rules out both
//! a child outliving its parent and stale aliases across a reallocation.

use super::doc::DocBuf;
use super::raw::{self, Positioned, RawError};
use super::value::{ObjectId, Timestamp};
use super::view::DocView;
use super::{ElementType, read_i32_le, write_u32_le};

/// Slack added on top of a growth reallocation so that a run of small
/// inserts does not reallocate every time.
const GROWTH_SLACK: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MutateError {
    #[error("document size arithmetic would overflow")]
    Overflow,
    #[error("position is outside the document's element region")]
    OutOfBounds,
    #[error("element is not a document or array")]
    NotAContainer,
    #[error("malformed element: {0}")]
    Malformed(#[from] RawError),
}

/// What to put into the hole a splice opens.
///
/// `Fill` writes a placeholder byte that the caller is expected to
/// overwrite before the document is exposed; `Copy` writes from a caller
/// buffer, which cannot alias the document (the mutator holds the only
/// mutable borrow).
pub enum SpliceSource<'s> {
    Fill(usize),
    Copy(&'s [u8]),
}

impl SpliceSource<'_> {
    fn len(&self) -> usize {
        match self {
            SpliceSource::Fill(n) => *n,
            SpliceSource::Copy(b) => b.len(),
        }
    }
}

/// A mutator over one document, possibly nested inside others.
///
/// Positions are byte offsets relative to this document's first byte:
/// `4` is the first element and `byte_len() - 1` is the trailing zero.
/// Inserting at `end_pos()` appends.
pub struct DocMut<'a> {
    doc: &'a mut DocBuf,
    /// Header offsets of every enclosing document, root first. The last
    /// entry is this document's own header.
    frames: Vec<usize>,
}

fn chop_nulls(key: &str) -> &str {
    match key.find('\0') {
        Some(i) => &key[..i],
        None => key,
    }
}

impl<'a> DocMut<'a> {
    pub(crate) fn root(doc: &'a mut DocBuf) -> DocMut<'a> {
        DocMut {
            doc,
            frames: vec![0],
        }
    }

    /// Offset of this document's header within the root buffer.
    pub fn header_offset(&self) -> usize {
        self.frames.last().copied().unwrap_or(0)
    }

    /// Current size of this document.
    pub fn byte_len(&self) -> usize {
        read_i32_le(self.doc.bytes(), self.header_offset()) as usize
    }

    /// Position of the first element.
    pub fn first_pos(&self) -> usize {
        4
    }

    /// Position of the trailing zero; inserting here appends.
    pub fn end_pos(&self) -> usize {
        self.byte_len() - 1
    }

    /// A read view of this document in its current state.
    pub fn as_view(&self) -> DocView<'_> {
        let h = self.header_offset();
        let len = self.byte_len();
        DocView::new_unchecked(&self.doc.bytes()[h..h + len])
    }

    /// Position of the first element whose key equals `key`.
    pub fn find(&self, key: &str) -> Result<Option<usize>, MutateError> {
        for el in self.as_view().iter() {
            let el = el?;
            if raw::key_eq(el.key_bytes(), key.as_bytes()) {
                return Ok(Some(el.offset()));
            }
        }
        Ok(None)
    }

    fn element_dims(&self, pos: usize) -> Result<(usize, usize, ElementType), MutateError> {
        match raw::element_at(self.as_view().bytes(), pos)? {
            Positioned::End => Err(MutateError::OutOfBounds),
            Positioned::At(el) => Ok((el.key_bytes().len(), el.size(), el.element_type())),
        }
    }

    /// Delete `n_delete` bytes at `pos` and insert `source` in their place,
    /// maintaining the length header of this document and every enclosing
    /// parent. On error nothing is mutated.
    pub fn splice_at(
        &mut self,
        pos: usize,
        n_delete: usize,
        source: SpliceSource<'_>,
    ) -> Result<(), MutateError> {
        let my_len = self.byte_len();
        if pos < 4 || pos >= my_len {
            return Err(MutateError::OutOfBounds);
        }
        if n_delete > my_len - 1 - pos {
            return Err(MutateError::OutOfBounds);
        }
        let n_insert = source.len();
        let diff = n_insert as i64 - n_delete as i64;

        // Validate the new size of every enclosing document before touching
        // anything.
        let old_lens: Vec<(usize, i64)> = self
            .frames
            .iter()
            .map(|&f| (f, i64::from(read_i32_le(self.doc.bytes(), f))))
            .collect();
        for &(_, len) in &old_lens {
            let new_len = len.checked_add(diff).ok_or(MutateError::Overflow)?;
            if new_len < 5 || new_len > i64::from(i32::MAX) {
                return Err(MutateError::Overflow);
            }
        }

        let root_len = old_lens[0].1 as usize;
        let new_root = (root_len as i64 + diff) as usize;
        let abs_pos = self.header_offset() + pos;

        if diff > 0 {
            if new_root > self.doc.capacity() {
                self.doc.reserve_total(new_root + GROWTH_SLACK);
            }
            let bytes = self.doc.raw_bytes_mut();
            bytes.resize(new_root, 0);
            bytes.copy_within(abs_pos + n_delete..root_len, abs_pos + n_insert);
        } else if diff < 0 {
            let bytes = self.doc.raw_bytes_mut();
            bytes.copy_within(abs_pos + n_delete..root_len, abs_pos + n_insert);
            bytes.truncate(new_root);
        }

        let bytes = self.doc.raw_bytes_mut();
        match source {
            SpliceSource::Fill(_) => bytes[abs_pos..abs_pos + n_insert].fill(b'X'),
            SpliceSource::Copy(src) => bytes[abs_pos..abs_pos + n_insert].copy_from_slice(src),
        }
        for (frame, len) in old_lens {
            write_u32_le(bytes, frame, (len + diff) as u32);
        }
        Ok(())
    }

    /// Open a hole for one element at `pos` and write its tag, key and key
    /// terminator. Returns the position of the value region, relative to
    /// this document.
    fn prep_element(
        &mut self,
        pos: usize,
        tag: ElementType,
        key: &str,
        datasize: usize,
    ) -> Result<usize, MutateError> {
        let key = chop_nulls(key);
        let elem_size = key
            .len()
            .checked_add(2)
            .and_then(|n| n.checked_add(datasize))
            .ok_or(MutateError::Overflow)?;
        self.splice_at(pos, 0, SpliceSource::Fill(elem_size))?;
        let abs = self.header_offset() + pos;
        let bytes = self.doc.raw_bytes_mut();
        bytes[abs] = tag as u8;
        bytes[abs + 1..abs + 1 + key.len()].copy_from_slice(key.as_bytes());
        bytes[abs + 1 + key.len()] = 0;
        Ok(pos + 1 + key.len() + 1)
    }

    fn write_value(&mut self, value_pos: usize, data: &[u8]) {
        let abs = self.header_offset() + value_pos;
        self.doc.raw_bytes_mut()[abs..abs + data.len()].copy_from_slice(data);
    }

    fn string_prefix(len: usize) -> Result<i32, MutateError> {
        i32::try_from(len + 1).map_err(|_| MutateError::Overflow)
    }

    pub fn insert_double(&mut self, pos: usize, key: &str, value: f64) -> Result<usize, MutateError> {
        let vp = self.prep_element(pos, ElementType::Double, key, 8)?;
        self.write_value(vp, &value.to_le_bytes());
        Ok(pos)
    }

    fn insert_stringlike(
        &mut self,
        pos: usize,
        tag: ElementType,
        key: &str,
        value: &str,
    ) -> Result<usize, MutateError> {
        let prefix = Self::string_prefix(value.len())?;
        let vp = self.prep_element(pos, tag, key, 4 + value.len() + 1)?;
        self.write_value(vp, &prefix.to_le_bytes());
        self.write_value(vp + 4, value.as_bytes());
        self.write_value(vp + 4 + value.len(), &[0]);
        Ok(pos)
    }

    pub fn insert_str(&mut self, pos: usize, key: &str, value: &str) -> Result<usize, MutateError> {
        self.insert_stringlike(pos, ElementType::String, key, value)
    }

    pub fn insert_code(&mut self, pos: usize, key: &str, code: &str) -> Result<usize, MutateError> {
        self.insert_stringlike(pos, ElementType::JavaScript, key, code)
    }

    pub fn insert_symbol(&mut self, pos: usize, key: &str, sym: &str) -> Result<usize, MutateError> {
        self.insert_stringlike(pos, ElementType::Symbol, key, sym)
    }

    fn insert_doclike(
        &mut self,
        pos: usize,
        tag: ElementType,
        key: &str,
        value: DocView<'_>,
    ) -> Result<usize, MutateError> {
        let vp = self.prep_element(pos, tag, key, value.byte_len())?;
        self.write_value(vp, value.bytes());
        Ok(pos)
    }

    pub fn insert_doc(
        &mut self,
        pos: usize,
        key: &str,
        value: DocView<'_>,
    ) -> Result<usize, MutateError> {
        self.insert_doclike(pos, ElementType::Document, key, value)
    }

    pub fn insert_array(
        &mut self,
        pos: usize,
        key: &str,
        value: DocView<'_>,
    ) -> Result<usize, MutateError> {
        self.insert_doclike(pos, ElementType::Array, key, value)
    }

    pub fn insert_binary(
        &mut self,
        pos: usize,
        key: &str,
        subtype: u8,
        data: &[u8],
    ) -> Result<usize, MutateError> {
        let prefix = i32::try_from(data.len()).map_err(|_| MutateError::Overflow)?;
        let vp = self.prep_element(pos, ElementType::Binary, key, 4 + 1 + data.len())?;
        self.write_value(vp, &prefix.to_le_bytes());
        self.write_value(vp + 4, &[subtype]);
        self.write_value(vp + 5, data);
        Ok(pos)
    }

    pub fn insert_undefined(&mut self, pos: usize, key: &str) -> Result<usize, MutateError> {
        self.prep_element(pos, ElementType::Undefined, key, 0)?;
        Ok(pos)
    }

    pub fn insert_object_id(
        &mut self,
        pos: usize,
        key: &str,
        oid: ObjectId,
    ) -> Result<usize, MutateError> {
        let vp = self.prep_element(pos, ElementType::ObjectId, key, 12)?;
        self.write_value(vp, oid.bytes());
        Ok(pos)
    }

    pub fn insert_bool(&mut self, pos: usize, key: &str, value: bool) -> Result<usize, MutateError> {
        let vp = self.prep_element(pos, ElementType::Boolean, key, 1)?;
        self.write_value(vp, &[u8::from(value)]);
        Ok(pos)
    }

    /// Milliseconds since the Unix epoch.
    pub fn insert_datetime(
        &mut self,
        pos: usize,
        key: &str,
        millis: i64,
    ) -> Result<usize, MutateError> {
        let vp = self.prep_element(pos, ElementType::DateTime, key, 8)?;
        self.write_value(vp, &millis.to_le_bytes());
        Ok(pos)
    }

    pub fn insert_null(&mut self, pos: usize, key: &str) -> Result<usize, MutateError> {
        self.prep_element(pos, ElementType::Null, key, 0)?;
        Ok(pos)
    }

    pub fn insert_regex(
        &mut self,
        pos: usize,
        key: &str,
        pattern: &str,
        options: &str,
    ) -> Result<usize, MutateError> {
        // Both parts are cstrings and cannot carry embedded zeros.
        let pattern = chop_nulls(pattern);
        let options = chop_nulls(options);
        let vp = self.prep_element(
            pos,
            ElementType::Regex,
            key,
            pattern.len() + 1 + options.len() + 1,
        )?;
        self.write_value(vp, pattern.as_bytes());
        self.write_value(vp + pattern.len(), &[0]);
        self.write_value(vp + pattern.len() + 1, options.as_bytes());
        self.write_value(vp + pattern.len() + 1 + options.len(), &[0]);
        Ok(pos)
    }

    pub fn insert_dbpointer(
        &mut self,
        pos: usize,
        key: &str,
        namespace: &str,
        id: ObjectId,
    ) -> Result<usize, MutateError> {
        let prefix = Self::string_prefix(namespace.len())?;
        let vp = self.prep_element(
            pos,
            ElementType::DbPointer,
            key,
            4 + namespace.len() + 1 + 12,
        )?;
        self.write_value(vp, &prefix.to_le_bytes());
        self.write_value(vp + 4, namespace.as_bytes());
        self.write_value(vp + 4 + namespace.len(), &[0]);
        self.write_value(vp + 4 + namespace.len() + 1, id.bytes());
        Ok(pos)
    }

    pub fn insert_code_with_scope(
        &mut self,
        pos: usize,
        key: &str,
        code: &str,
        scope: DocView<'_>,
    ) -> Result<usize, MutateError> {
        let string_size = 4 + code.len() + 1;
        let total = 4 + string_size + scope.byte_len();
        let total_prefix = i32::try_from(total).map_err(|_| MutateError::Overflow)?;
        let code_prefix = Self::string_prefix(code.len())?;
        let vp = self.prep_element(pos, ElementType::JavaScriptWithScope, key, total)?;
        self.write_value(vp, &total_prefix.to_le_bytes());
        self.write_value(vp + 4, &code_prefix.to_le_bytes());
        self.write_value(vp + 8, code.as_bytes());
        self.write_value(vp + 8 + code.len(), &[0]);
        self.write_value(vp + 4 + string_size, scope.bytes());
        Ok(pos)
    }

    pub fn insert_int32(&mut self, pos: usize, key: &str, value: i32) -> Result<usize, MutateError> {
        let vp = self.prep_element(pos, ElementType::Int32, key, 4)?;
        self.write_value(vp, &value.to_le_bytes());
        Ok(pos)
    }

    pub fn insert_timestamp(
        &mut self,
        pos: usize,
        key: &str,
        ts: Timestamp,
    ) -> Result<usize, MutateError> {
        let vp = self.prep_element(pos, ElementType::Timestamp, key, 8)?;
        self.write_value(vp, &ts.to_u64().to_le_bytes());
        Ok(pos)
    }

    pub fn insert_int64(&mut self, pos: usize, key: &str, value: i64) -> Result<usize, MutateError> {
        let vp = self.prep_element(pos, ElementType::Int64, key, 8)?;
        self.write_value(vp, &value.to_le_bytes());
        Ok(pos)
    }

    pub fn insert_decimal128(
        &mut self,
        pos: usize,
        key: &str,
        value: super::value::Decimal128,
    ) -> Result<usize, MutateError> {
        let vp = self.prep_element(pos, ElementType::Decimal128, key, 16)?;
        self.write_value(vp, value.bytes());
        Ok(pos)
    }

    pub fn insert_minkey(&mut self, pos: usize, key: &str) -> Result<usize, MutateError> {
        self.prep_element(pos, ElementType::MinKey, key, 0)?;
        Ok(pos)
    }

    pub fn insert_maxkey(&mut self, pos: usize, key: &str) -> Result<usize, MutateError> {
        self.prep_element(pos, ElementType::MaxKey, key, 0)?;
        Ok(pos)
    }

    /// Replace the key of the element at `pos`, preserving its value.
    pub fn set_key(&mut self, pos: usize, new_key: &str) -> Result<(), MutateError> {
        let (old_key_len, _, _) = self.element_dims(pos)?;
        let new_key = chop_nulls(new_key);
        self.splice_at(pos + 1, old_key_len, SpliceSource::Copy(new_key.as_bytes()))
    }

    /// Remove the element at `pos`.
    pub fn erase_at(&mut self, pos: usize) -> Result<(), MutateError> {
        let (_, size, _) = self.element_dims(pos)?;
        self.splice_at(pos, size, SpliceSource::Fill(0))
    }

    /// Remove all elements in `[first, last)`, both element positions (or
    /// the end position).
    pub fn erase_range(&mut self, first: usize, last: usize) -> Result<(), MutateError> {
        if last < first {
            return Err(MutateError::OutOfBounds);
        }
        self.splice_at(first, last - first, SpliceSource::Fill(0))
    }

    /// Obtain a mutator for the document or array element at `pos`. The
    /// child borrows this mutator; growth inside the child updates every
    /// enclosing length header.
    pub fn child_at(&mut self, pos: usize) -> Result<DocMut<'_>, MutateError> {
        let (key_len, _, ty) = self.element_dims(pos)?;
        if !matches!(ty, ElementType::Document | ElementType::Array) {
            return Err(MutateError::NotAContainer);
        }
        let child_header = self.header_offset() + pos + 1 + key_len + 1;
        let mut frames = self.frames.clone();
        frames.push(child_header);
        Ok(DocMut {
            doc: &mut *self.doc,
            frames,
        })
    }

    /// Renumber element keys to decimal indices starting at `index`, from
    /// the element at `pos` through the end of the document.
    pub fn relabel_array_elements_at(
        &mut self,
        mut pos: usize,
        mut index: u32,
    ) -> Result<(), MutateError> {
        loop {
            match raw::element_at(self.as_view().bytes(), pos)? {
                Positioned::End => return Ok(()),
                Positioned::At(_) => {}
            }
            self.set_key(pos, &index.to_string())?;
            let (_, size, _) = self.element_dims(pos)?;
            pos += size;
            index += 1;
        }
    }

    /// Renumber every element key to `"0"`, `"1"`, `"2"`, ...
    pub fn relabel_array_elements(&mut self) -> Result<(), MutateError> {
        self.relabel_array_elements_at(self.first_pos(), 0)
    }

    /// Replace `[pos, delete_end)` in this document with the byte range
    /// `[from, to)` of `source`. The source cannot alias this document; the
    /// exclusive borrow rules make a self-referential source unrepresentable.
    pub fn splice_disjoint_ranges(
        &mut self,
        pos: usize,
        delete_end: usize,
        source: DocView<'_>,
        from: usize,
        to: usize,
    ) -> Result<(), MutateError> {
        if delete_end < pos || from > to || to > source.byte_len() {
            return Err(MutateError::OutOfBounds);
        }
        self.splice_at(
            pos,
            delete_end - pos,
            SpliceSource::Copy(&source.bytes()[from..to]),
        )
    }

    /// Insert the element range `[from, to)` of `source` at `pos` without
    /// deleting anything.
    pub fn insert_disjoint_range(
        &mut self,
        pos: usize,
        source: DocView<'_>,
        from: usize,
        to: usize,
    ) -> Result<(), MutateError> {
        self.splice_disjoint_ranges(pos, pos, source, from, to)
    }

    pub fn append_double(&mut self, key: &str, value: f64) -> Result<usize, MutateError> {
        let p = self.end_pos();
        self.insert_double(p, key, value)
    }

    pub fn append_str(&mut self, key: &str, value: &str) -> Result<usize, MutateError> {
        let p = self.end_pos();
        self.insert_str(p, key, value)
    }

    pub fn append_doc(&mut self, key: &str, value: DocView<'_>) -> Result<usize, MutateError> {
        let p = self.end_pos();
        self.insert_doc(p, key, value)
    }

    pub fn append_array(&mut self, key: &str, value: DocView<'_>) -> Result<usize, MutateError> {
        let p = self.end_pos();
        self.insert_array(p, key, value)
    }

    pub fn append_binary(
        &mut self,
        key: &str,
        subtype: u8,
        data: &[u8],
    ) -> Result<usize, MutateError> {
        let p = self.end_pos();
        self.insert_binary(p, key, subtype, data)
    }

    pub fn append_object_id(&mut self, key: &str, oid: ObjectId) -> Result<usize, MutateError> {
        let p = self.end_pos();
        self.insert_object_id(p, key, oid)
    }

    pub fn append_bool(&mut self, key: &str, value: bool) -> Result<usize, MutateError> {
        let p = self.end_pos();
        self.insert_bool(p, key, value)
    }

    pub fn append_datetime(&mut self, key: &str, millis: i64) -> Result<usize, MutateError> {
        let p = self.end_pos();
        self.insert_datetime(p, key, millis)
    }

    pub fn append_null(&mut self, key: &str) -> Result<usize, MutateError> {
        let p = self.end_pos();
        self.insert_null(p, key)
    }

    pub fn append_regex(
        &mut self,
        key: &str,
        pattern: &str,
        options: &str,
    ) -> Result<usize, MutateError> {
        let p = self.end_pos();
        self.insert_regex(p, key, pattern, options)
    }

    pub fn append_int32(&mut self, key: &str, value: i32) -> Result<usize, MutateError> {
        let p = self.end_pos();
        self.insert_int32(p, key, value)
    }

    pub fn append_timestamp(&mut self, key: &str, ts: Timestamp) -> Result<usize, MutateError> {
        let p = self.end_pos();
        self.insert_timestamp(p, key, ts)
    }

    pub fn append_int64(&mut self, key: &str, value: i64) -> Result<usize, MutateError> {
        let p = self.end_pos();
        self.insert_int64(p, key, value)
    }
}
