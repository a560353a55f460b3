//! The abstract event loop and its tokio binding.
//!
//! The async core and the wire client consume the [`Reactor`] trait only:
//! timer posts, name resolution, TCP connect, and single-shot
//! scatter/gather reads and writes, all in continuation style. Every
//! operation honors the stop token carried by its handler, completing with
//! `ECANCELED` when a stop wins the race.
//!
//! [`read_exact`] and [`write_all`] build the buffered transfer loops the
//! wire framer needs out of the single-shot primitives by re-issuing
//! operations from each completion.

use std::io::IoSlice;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::exec::future::wait_stopped;
use crate::exec::{Emitter, EmitterResult, Handler, ValueBox};
use crate::status::{IoErrorCode, Status};

/// Resolved addresses, as produced by [`Reactor::resolve`] and consumed by
/// [`Reactor::tcp_connect`].
pub type AddrList = Vec<SocketAddr>;

/// An owned handle on a connected TCP stream.
///
/// Cloning shares the stream; the exchange protocol above guarantees a
/// single outstanding read/write pair per connection, so the inner lock is
/// uncontended in practice.
#[derive(Clone)]
pub struct StreamHandle {
    inner: Arc<tokio::sync::Mutex<TcpStream>>,
}

impl StreamHandle {
    pub fn new(stream: TcpStream) -> StreamHandle {
        StreamHandle {
            inner: Arc::new(tokio::sync::Mutex::new(stream)),
        }
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StreamHandle")
    }
}

/// Maximum buffer segments passed to one gather write.
const MAX_WRITE_SEGMENTS: usize = 16;

/// The abstract event loop consumed by the async core and the wire client.
///
/// Completions are delivered on reactor-controlled threads. Every method
/// completes its handler exactly once.
pub trait Reactor: Send + Sync {
    /// Post `result` to the handler as soon as possible.
    fn call_soon(&self, result: EmitterResult, handler: Handler);

    /// Post `result` to the handler after `delay`. Cancellable.
    fn call_later(&self, delay: Duration, result: EmitterResult, handler: Handler);

    /// Resolve `host:service`, completing with an [`AddrList`].
    fn resolve(&self, host: &str, service: &str, handler: Handler);

    /// Connect to the first reachable address, completing with a
    /// [`StreamHandle`].
    fn tcp_connect(&self, addrs: AddrList, handler: Handler);

    /// Read up to `max_len` bytes, completing with a `Bytes` chunk. An
    /// empty chunk means the peer closed the connection.
    fn tcp_read_some(&self, stream: StreamHandle, max_len: usize, handler: Handler);

    /// Gather-write the buffers, completing with the `usize` count of
    /// bytes accepted. May write fewer bytes than offered.
    fn tcp_write_some(&self, stream: StreamHandle, bufs: Vec<Bytes>, handler: Handler);
}

/// [`Reactor`] bound to a tokio runtime.
pub struct TokioReactor {
    handle: tokio::runtime::Handle,
}

impl TokioReactor {
    /// Bind to the current runtime. Panics outside of one, like
    /// `Handle::current`.
    pub fn new() -> TokioReactor {
        TokioReactor {
            handle: tokio::runtime::Handle::current(),
        }
    }

    pub fn from_handle(handle: tokio::runtime::Handle) -> TokioReactor {
        TokioReactor { handle }
    }

    pub fn handle(&self) -> &tokio::runtime::Handle {
        &self.handle
    }
}

impl Default for TokioReactor {
    fn default() -> TokioReactor {
        TokioReactor::new()
    }
}

impl Reactor for TokioReactor {
    fn call_soon(&self, result: EmitterResult, handler: Handler) {
        self.handle.spawn(async move {
            handler.complete(result);
        });
    }

    fn call_later(&self, delay: Duration, result: EmitterResult, handler: Handler) {
        let token = handler.stop_token();
        self.handle.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => handler.complete(result),
                _ = wait_stopped(&token) => {
                    handler.complete(EmitterResult::from_status(Status::cancelled()));
                }
            }
        });
    }

    fn resolve(&self, host: &str, service: &str, handler: Handler) {
        let target = format!("{host}:{service}");
        let token = handler.stop_token();
        self.handle.spawn(async move {
            tokio::select! {
                resolved = tokio::net::lookup_host(target.as_str()) => {
                    let result = match resolved {
                        Ok(addrs) => {
                            let addrs: AddrList = addrs.collect();
                            tracing::trace!(%target, count = addrs.len(), "resolved");
                            EmitterResult::from_value(addrs)
                        }
                        Err(err) => {
                            tracing::debug!(%target, error = %err, "resolution failed");
                            EmitterResult::from_status(Status::from_io_error(&err))
                        }
                    };
                    handler.complete(result);
                }
                _ = wait_stopped(&token) => {
                    handler.complete(EmitterResult::from_status(Status::cancelled()));
                }
            }
        });
    }

    fn tcp_connect(&self, addrs: AddrList, handler: Handler) {
        let token = handler.stop_token();
        self.handle.spawn(async move {
            let connect_all = async {
                let mut last_err: Option<std::io::Error> = None;
                for addr in addrs {
                    match TcpStream::connect(addr).await {
                        Ok(stream) => {
                            tracing::debug!(%addr, "connected");
                            return EmitterResult::from_value(StreamHandle::new(stream));
                        }
                        Err(err) => {
                            tracing::debug!(%addr, error = %err, "connect failed");
                            last_err = Some(err);
                        }
                    }
                }
                match last_err {
                    Some(err) => EmitterResult::from_status(Status::from_io_error(&err)),
                    None => EmitterResult::from_status(Status::generic(libc::EINVAL)),
                }
            };
            tokio::select! {
                result = connect_all => handler.complete(result),
                _ = wait_stopped(&token) => {
                    handler.complete(EmitterResult::from_status(Status::cancelled()));
                }
            }
        });
    }

    fn tcp_read_some(&self, stream: StreamHandle, max_len: usize, handler: Handler) {
        let token = handler.stop_token();
        self.handle.spawn(async move {
            let read = async {
                let mut buf = vec![0u8; max_len];
                let mut guard = stream.inner.lock().await;
                match guard.read(&mut buf).await {
                    Ok(n) => EmitterResult::okay(ValueBox::from_value(Bytes::copy_from_slice(
                        &buf[..n],
                    ))),
                    Err(err) => EmitterResult::from_status(Status::from_io_error(&err)),
                }
            };
            tokio::select! {
                result = read => handler.complete(result),
                _ = wait_stopped(&token) => {
                    handler.complete(EmitterResult::from_status(Status::cancelled()));
                }
            }
        });
    }

    fn tcp_write_some(&self, stream: StreamHandle, bufs: Vec<Bytes>, handler: Handler) {
        let token = handler.stop_token();
        self.handle.spawn(async move {
            let write = async {
                let slices: Vec<IoSlice<'_>> = bufs
                    .iter()
                    .take(MAX_WRITE_SEGMENTS)
                    .map(|b| IoSlice::new(b))
                    .collect();
                let mut guard = stream.inner.lock().await;
                match guard.write_vectored(&slices).await {
                    Ok(n) => EmitterResult::from_value(n),
                    Err(err) => EmitterResult::from_status(Status::from_io_error(&err)),
                }
            };
            tokio::select! {
                result = write => handler.complete(result),
                _ = wait_stopped(&token) => {
                    handler.complete(EmitterResult::from_status(Status::cancelled()));
                }
            }
        });
    }
}

/// An emitter that reads exactly `len` bytes from the stream, completing
/// with a `Bytes` value. EOF before `len` bytes completes with a
/// connection-closed status.
pub fn read_exact(reactor: Arc<dyn Reactor>, stream: StreamHandle, len: usize) -> Emitter {
    Emitter::from_start(move |handler| {
        read_step(reactor, stream, BytesMut::with_capacity(len), len, handler)
    })
}

fn read_step(
    reactor: Arc<dyn Reactor>,
    stream: StreamHandle,
    acc: BytesMut,
    need: usize,
    handler: Handler,
) {
    if need == 0 {
        handler.complete(EmitterResult::from_value(acc.freeze()));
        return;
    }
    let token = handler.stop_token();
    let next_reactor = reactor.clone();
    let next_stream = stream.clone();
    reactor.tcp_read_some(
        stream,
        need,
        Handler::with_stop(token, move |res| {
            if res.is_error() {
                handler.complete(res);
                return;
            }
            let chunk = match res.value.downcast::<Bytes>() {
                Ok(chunk) => chunk,
                Err(_) => {
                    handler.complete(EmitterResult::from_status(Status::generic(libc::EINVAL)));
                    return;
                }
            };
            if chunk.is_empty() {
                handler.complete(EmitterResult::from_status(Status::io(
                    IoErrorCode::ConnectionClosed,
                )));
                return;
            }
            let mut acc = acc;
            acc.extend_from_slice(&chunk);
            read_step(next_reactor, next_stream, acc, need - chunk.len(), handler);
        }),
    );
}

/// An emitter that writes every byte of `bufs` to the stream, completing
/// with the total byte count written.
pub fn write_all(reactor: Arc<dyn Reactor>, stream: StreamHandle, bufs: Vec<Bytes>) -> Emitter {
    Emitter::from_start(move |handler| write_step(reactor, stream, bufs, 0, handler))
}

fn write_step(
    reactor: Arc<dyn Reactor>,
    stream: StreamHandle,
    mut bufs: Vec<Bytes>,
    written: usize,
    handler: Handler,
) {
    while bufs.first().is_some_and(Bytes::is_empty) {
        bufs.remove(0);
    }
    if bufs.is_empty() {
        handler.complete(EmitterResult::from_value(written));
        return;
    }
    let token = handler.stop_token();
    let next_reactor = reactor.clone();
    let next_stream = stream.clone();
    reactor.tcp_write_some(
        stream,
        bufs.clone(),
        Handler::with_stop(token, move |res| {
            if res.is_error() {
                handler.complete(res);
                return;
            }
            let n = match res.value.downcast::<usize>() {
                Ok(n) => n,
                Err(_) => {
                    handler.complete(EmitterResult::from_status(Status::generic(libc::EINVAL)));
                    return;
                }
            };
            if n == 0 {
                handler.complete(EmitterResult::from_status(Status::io(
                    IoErrorCode::ConnectionClosed,
                )));
                return;
            }
            // Drop the buffers the write consumed; advance into a
            // partially-consumed one.
            let mut remaining = n;
            while remaining > 0 {
                if bufs[0].len() <= remaining {
                    remaining -= bufs[0].len();
                    bufs.remove(0);
                } else {
                    bufs[0].advance(remaining);
                    remaining = 0;
                }
            }
            write_step(next_reactor, next_stream, bufs, written + n, handler);
        }),
    );
}
