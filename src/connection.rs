//! One wire connection: the OP_MSG send/receive pipeline.
//!
//! A command exchange is a cold emitter chain over the reactor's
//! primitives: gather-write the 21-byte prefix and the body document,
//! read back a header, read the remainder, then parse the Body section
//! into an owned document. Exactly one exchange may be outstanding per
//! connection; callers above serialize.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use bytes::Bytes;

use crate::bson::DocBuf;
use crate::exec::{Emitter, EmitterResult, just_status};
use crate::reactor::{Reactor, StreamHandle, read_exact, write_all};
use crate::status::Status;
use crate::wire::{self, HEADER_LEN, MessageHeader};

/// A connected client endpoint with its request-id counter.
pub struct ClientConnection {
    reactor: Arc<dyn Reactor>,
    stream: StreamHandle,
    request_id: AtomicI32,
}

impl ClientConnection {
    pub fn new(reactor: Arc<dyn Reactor>, stream: StreamHandle) -> ClientConnection {
        ClientConnection {
            reactor,
            stream,
            request_id: AtomicI32::new(1),
        }
    }

    fn next_request_id(&self) -> i32 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send `doc` as an OP_MSG and receive the reply document.
    ///
    /// The returned emitter is cold; connect and start it (or await it) to
    /// perform the exchange. It completes with a [`DocBuf`] on success.
    pub fn send_op_msg(&self, doc: DocBuf) -> Emitter {
        let request_id = self.next_request_id();
        let prefix = match wire::op_msg_prefix(doc.byte_len(), request_id) {
            Ok(prefix) => prefix,
            Err(err) => {
                tracing::debug!(error = %err, "refusing oversized request");
                return just_status(Status::generic(libc::EMSGSIZE));
            }
        };
        tracing::trace!(request_id, body_len = doc.byte_len(), "sending OP_MSG");

        let reactor = self.reactor.clone();
        let stream = self.stream.clone();
        let bufs = vec![
            Bytes::copy_from_slice(&prefix),
            Bytes::from(doc.into_bytes()),
        ];

        let read_reactor = reactor.clone();
        let read_stream = stream.clone();
        let body_reactor = reactor.clone();
        let body_stream = stream.clone();

        write_all(reactor, stream, bufs)
            .and_then_ok(move |_written| read_exact(read_reactor, read_stream, HEADER_LEN))
            .and_then_ok(move |res| {
                let header_bytes = match res.value.downcast::<Bytes>() {
                    Ok(bytes) => bytes,
                    Err(_) => return just_status(Status::generic(libc::EINVAL)),
                };
                let header = match MessageHeader::parse(&header_bytes) {
                    Ok(header) => header,
                    Err(err) => {
                        tracing::debug!(error = %err, "bad reply header");
                        return just_status(Status::generic(libc::EPROTO));
                    }
                };
                if header.op_code != wire::OP_MSG {
                    tracing::debug!(op_code = header.op_code, "unexpected reply opcode");
                    return just_status(Status::generic(libc::EPROTO));
                }
                tracing::trace!(
                    reply_len = header.message_length,
                    response_to = header.response_to,
                    "reading reply body"
                );
                read_exact(
                    body_reactor,
                    body_stream,
                    header.message_length as usize - HEADER_LEN,
                )
            })
            .then_ok(|res| {
                let body = match res.value.downcast::<Bytes>() {
                    Ok(bytes) => bytes,
                    Err(_) => return EmitterResult::from_status(Status::generic(libc::EINVAL)),
                };
                match wire::decode_op_msg(&body) {
                    Ok((_flags, doc)) => EmitterResult::from_value(doc),
                    Err(err) => {
                        tracing::debug!(error = %err, "malformed reply body");
                        EmitterResult::from_status(Status::generic(libc::EPROTO))
                    }
                }
            })
    }
}
