//! The cold-start asynchronous primitives: emitters, handlers and
//! operations.
//!
//! An [`Emitter`] does no work until it is connected to a [`Handler`] and
//! the resulting [`Operation`] is started. Ownership enforces the
//! lifecycle: `connect` and `start` consume their receivers, so an
//! operation starts at most once and a handler completes at most once.
//! Dropping any of the three before use simply runs the destructors of
//! whatever state the closures captured.

use crate::status::Status;

use super::boxed::ValueBox;
use super::stop::StopToken;

/// What an emitter delivers on completion: a status plus a type-erased
/// value.
#[derive(Debug)]
pub struct EmitterResult {
    pub status: Status,
    pub value: ValueBox,
}

impl EmitterResult {
    /// An okay status carrying `value`.
    pub fn okay(value: ValueBox) -> EmitterResult {
        EmitterResult {
            status: Status::okay(),
            value,
        }
    }

    /// An okay status carrying a boxed `value`.
    pub fn from_value<T: Send + 'static>(value: T) -> EmitterResult {
        EmitterResult::okay(ValueBox::from_value(value))
    }

    /// A bare status with no value.
    pub fn from_status(status: Status) -> EmitterResult {
        EmitterResult {
            status,
            value: ValueBox::nil(),
        }
    }

    /// An okay status with no value.
    pub fn nil() -> EmitterResult {
        EmitterResult::from_status(Status::okay())
    }

    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }
}

/// The continuation an emitter completes into.
///
/// Carries a [`StopToken`] so operations below it can observe cancellation
/// requests; a handler built with [`Handler::new`] carries the null token.
pub struct Handler {
    complete: Box<dyn FnOnce(EmitterResult) + Send>,
    stop: StopToken,
}

impl Handler {
    pub fn new(complete: impl FnOnce(EmitterResult) + Send + 'static) -> Handler {
        Handler {
            complete: Box::new(complete),
            stop: StopToken::never(),
        }
    }

    pub fn with_stop(stop: StopToken, complete: impl FnOnce(EmitterResult) + Send + 'static) -> Handler {
        Handler {
            complete: Box::new(complete),
            stop,
        }
    }

    /// Deliver the final result. Consumes the handler; a completed handler
    /// cannot complete again.
    pub fn complete(self, result: EmitterResult) {
        (self.complete)(result)
    }

    /// The stop token governing the operation this handler belongs to.
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }
}

/// A cold asynchronous task: a factory that, connected to a handler,
/// yields a startable operation.
pub struct Emitter {
    connect: Box<dyn FnOnce(Handler) -> Operation + Send>,
}

impl Emitter {
    /// Build an emitter from its connect function.
    pub fn new(connect: impl FnOnce(Handler) -> Operation + Send + 'static) -> Emitter {
        Emitter {
            connect: Box::new(connect),
        }
    }

    /// Build an emitter whose operation runs `start` when started. Most
    /// emitters need no state between connect and start and use this form.
    pub fn from_start(start: impl FnOnce(Handler) + Send + 'static) -> Emitter {
        Emitter::new(move |handler| Operation::new(move || start(handler)))
    }

    /// Connect to a handler, producing the operation that will drive this
    /// emitter's work.
    pub fn connect(self, handler: Handler) -> Operation {
        (self.connect)(handler)
    }
}

/// A connected emitter/handler pair.
///
/// Starting is the single entry point; completion is the handler being
/// invoked exactly once, eventually, after `start`. An operation dropped
/// without being started never completes its handler, and both sides'
/// state is released.
pub struct Operation {
    start: Box<dyn FnOnce() + Send>,
}

impl Operation {
    pub fn new(start: impl FnOnce() + Send + 'static) -> Operation {
        Operation {
            start: Box::new(start),
        }
    }

    pub fn start(self) {
        (self.start)()
    }
}
