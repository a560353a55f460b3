//! MongoDB wire-protocol framing: message headers and OP_MSG bodies.
//!
//! Only OP_MSG (opcode 2013) with a single kind-0 Body section is
//! produced, and only that shape is accepted back. Flag bits are written
//! as zero and ignored on receipt; checksums are not used.

use crate::bson::{DocBuf, DocView, ViewError, read_i32_le};

pub const OP_MSG: i32 = 2013;
pub const OP_COMPRESSED: i32 = 2012;

/// Size of the fixed message header: four little-endian `i32`s.
pub const HEADER_LEN: usize = 16;

/// Header plus OP_MSG flag bits plus the Body section kind byte --
/// everything that precedes the section's BSON document.
pub const OP_MSG_PREFIX_LEN: usize = HEADER_LEN + 4 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("message header is truncated")]
    TruncatedHeader,
    #[error("message body is truncated")]
    TruncatedBody,
    #[error("message length {0} is smaller than the header")]
    BadLength(i32),
    #[error("message would exceed the maximum encodable size")]
    MessageTooLarge,
    #[error("unexpected opcode {0}")]
    UnexpectedOpCode(i32),
    #[error("unsupported section kind {0}")]
    UnsupportedSection(u8),
    #[error("section body is not a valid document: {0}")]
    Bson(#[from] ViewError),
}

/// The 16-byte header that starts every wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

impl MessageHeader {
    pub fn parse(buf: &[u8]) -> Result<MessageHeader, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::TruncatedHeader);
        }
        let header = MessageHeader {
            message_length: read_i32_le(buf, 0),
            request_id: read_i32_le(buf, 4),
            response_to: read_i32_le(buf, 8),
            op_code: read_i32_le(buf, 12),
        };
        if header.message_length < HEADER_LEN as i32 {
            return Err(WireError::BadLength(header.message_length));
        }
        Ok(header)
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.message_length.to_le_bytes());
        out[4..8].copy_from_slice(&self.request_id.to_le_bytes());
        out[8..12].copy_from_slice(&self.response_to.to_le_bytes());
        out[12..16].copy_from_slice(&self.op_code.to_le_bytes());
        out
    }
}

/// Build the 21-byte prefix of an OP_MSG request whose Body section is a
/// document of `doc_len` bytes. The document itself is gather-written
/// after the prefix, avoiding a copy of the body.
pub fn op_msg_prefix(doc_len: usize, request_id: i32) -> Result<[u8; OP_MSG_PREFIX_LEN], WireError> {
    let total = OP_MSG_PREFIX_LEN
        .checked_add(doc_len)
        .ok_or(WireError::MessageTooLarge)?;
    let total = i32::try_from(total).map_err(|_| WireError::MessageTooLarge)?;
    let header = MessageHeader {
        message_length: total,
        request_id,
        response_to: 0,
        op_code: OP_MSG,
    };
    let mut out = [0u8; OP_MSG_PREFIX_LEN];
    out[..HEADER_LEN].copy_from_slice(&header.encode());
    // Flag bits (all zero) then the Body section kind byte (zero).
    out[HEADER_LEN..HEADER_LEN + 4].copy_from_slice(&0u32.to_le_bytes());
    out[HEADER_LEN + 4] = 0;
    Ok(out)
}

/// Encode a complete OP_MSG into one contiguous buffer. Used where the
/// scatter-write path is unnecessary (tests, mock servers).
pub fn encode_op_msg(
    doc: DocView<'_>,
    request_id: i32,
    response_to: i32,
) -> Result<Vec<u8>, WireError> {
    let total = OP_MSG_PREFIX_LEN
        .checked_add(doc.byte_len())
        .ok_or(WireError::MessageTooLarge)?;
    let total_i32 = i32::try_from(total).map_err(|_| WireError::MessageTooLarge)?;
    let header = MessageHeader {
        message_length: total_i32,
        request_id,
        response_to,
        op_code: OP_MSG,
    };
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.push(0);
    out.extend_from_slice(doc.bytes());
    Ok(out)
}

/// Decode an OP_MSG body (everything after the 16-byte header): flag bits,
/// one kind-0 Body section, and the section's document, which is copied
/// into an owned buffer. Any other section kind is a protocol error.
pub fn decode_op_msg(body: &[u8]) -> Result<(u32, DocBuf), WireError> {
    if body.len() < 5 {
        return Err(WireError::TruncatedBody);
    }
    let mut flag_bytes = [0u8; 4];
    flag_bytes.copy_from_slice(&body[..4]);
    let flags = u32::from_le_bytes(flag_bytes);
    let kind = body[4];
    if kind != 0 {
        return Err(WireError::UnsupportedSection(kind));
    }
    let doc = DocView::parse(&body[5..])?;
    Ok((flags, doc.to_owned_doc()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = MessageHeader {
            message_length: 42,
            request_id: 7,
            response_to: 3,
            op_code: OP_MSG,
        };
        let parsed = MessageHeader::parse(&header.encode()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn header_rejects_short_and_bogus_lengths() {
        assert_eq!(
            MessageHeader::parse(&[0u8; 8]),
            Err(WireError::TruncatedHeader)
        );
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&8i32.to_le_bytes());
        assert_eq!(MessageHeader::parse(&bytes), Err(WireError::BadLength(8)));
    }

    #[test]
    fn op_msg_layout_matches_the_spec() {
        // Body { hello: 1 } with request_id 1: header total must equal
        // 16 + 4 + 1 + len(body), followed by five zero bytes, then the
        // document.
        let mut doc = DocBuf::new();
        doc.mutate().append_int32("hello", 1).unwrap();
        let msg = encode_op_msg(doc.as_view(), 1, 0).unwrap();

        let header = MessageHeader::parse(&msg).unwrap();
        assert_eq!(
            header.message_length as usize,
            16 + 4 + 1 + doc.byte_len()
        );
        assert_eq!(header.request_id, 1);
        assert_eq!(header.response_to, 0);
        assert_eq!(header.op_code, 2013);
        assert_eq!(&msg[16..21], &[0, 0, 0, 0, 0]);
        assert_eq!(&msg[21..], doc.bytes());
        assert_eq!(msg.len(), header.message_length as usize);
    }

    #[test]
    fn prefix_matches_contiguous_encoding() {
        let mut doc = DocBuf::new();
        doc.mutate().append_int32("ping", 1).unwrap();
        let msg = encode_op_msg(doc.as_view(), 9, 0).unwrap();
        let prefix = op_msg_prefix(doc.byte_len(), 9).unwrap();
        assert_eq!(&msg[..OP_MSG_PREFIX_LEN], &prefix[..]);
    }

    #[test]
    fn decode_round_trip() {
        let mut doc = DocBuf::new();
        doc.mutate().append_str("ok", "yes").unwrap();
        let msg = encode_op_msg(doc.as_view(), 5, 0).unwrap();
        let (flags, decoded) = decode_op_msg(&msg[HEADER_LEN..]).unwrap();
        assert_eq!(flags, 0);
        assert_eq!(decoded, doc);
    }

    #[test]
    fn non_body_sections_are_rejected() {
        let mut doc = DocBuf::new();
        doc.mutate().append_int32("x", 1).unwrap();
        let mut msg = encode_op_msg(doc.as_view(), 5, 0).unwrap();
        msg[HEADER_LEN + 4] = 1;
        assert_eq!(
            decode_op_msg(&msg[HEADER_LEN..]),
            Err(WireError::UnsupportedSection(1))
        );
    }

    #[test]
    fn truncated_bodies_are_rejected() {
        assert_eq!(decode_op_msg(&[0, 0, 0, 0]), Err(WireError::TruncatedBody));
    }
}
