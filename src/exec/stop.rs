//! Cooperative cancellation: stop sources, tokens and callbacks.
//!
//! A [`StopSource`] owns a list of registered callbacks. Requesting a stop
//! is idempotent, flips the state monotonically, and runs every registered
//! callback exactly once. Registering against an already-stopped source
//! runs the callback inline. Dropping a [`StopCallback`] deregisters it;
//! if the callback is executing on another thread at that moment, the drop
//! spins until execution finishes so the callback's captures stay alive
//! for the duration of the call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::ThreadId;

struct CallbackEntry {
    /// The handler, taken exactly once by the stopping thread.
    func: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    /// Set after the handler has returned, unless the handler deregistered
    /// itself during its own execution.
    exec_done: AtomicBool,
    /// Set by a drop that happens on the stopping thread while this entry's
    /// handler is running.
    removed_during_exec: AtomicBool,
}

struct StopState {
    stopped: AtomicBool,
    callbacks: Mutex<Vec<Arc<CallbackEntry>>>,
    /// Identity of the thread draining callbacks in `request_stop`, while
    /// the drain is in progress.
    stopping_thread: Mutex<Option<ThreadId>>,
}

/// Owner of a stop state. Dropping the source does not signal a stop.
pub struct StopSource {
    state: Arc<StopState>,
}

impl StopSource {
    pub fn new() -> StopSource {
        StopSource {
            state: Arc::new(StopState {
                stopped: AtomicBool::new(false),
                callbacks: Mutex::new(Vec::new()),
                stopping_thread: Mutex::new(None),
            }),
        }
    }

    pub fn token(&self) -> StopToken {
        StopToken {
            state: Some(Arc::downgrade(&self.state)),
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }

    /// Request a stop. Returns `true` if this call was the one that
    /// transitioned the state; a second call returns `false` and runs
    /// nothing.
    pub fn request_stop(&self) -> bool {
        if self.state.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.state.stopping_thread.lock().unwrap() = Some(std::thread::current().id());
        loop {
            let entry = {
                let mut list = self.state.callbacks.lock().unwrap();
                if list.is_empty() {
                    None
                } else {
                    Some(list.remove(0))
                }
            };
            let Some(entry) = entry else { break };
            // Invoke outside the list lock so a handler may register or
            // deregister other callbacks.
            let func = entry.func.lock().unwrap().take();
            if let Some(func) = func {
                func();
            }
            if !entry.removed_during_exec.load(Ordering::SeqCst) {
                entry.exec_done.store(true, Ordering::SeqCst);
            }
        }
        *self.state.stopping_thread.lock().unwrap() = None;
        true
    }
}

impl Default for StopSource {
    fn default() -> StopSource {
        StopSource::new()
    }
}

/// A borrowed handle onto a stop state, or the null token.
///
/// The null token ([`StopToken::never`]) is stop-token-shaped but never
/// signals; registration against it is a no-op.
#[derive(Clone)]
pub struct StopToken {
    state: Option<Weak<StopState>>,
}

impl StopToken {
    /// The null token.
    pub fn never() -> StopToken {
        StopToken { state: None }
    }

    /// Whether a stop could ever be requested through this token.
    pub fn stop_possible(&self) -> bool {
        match &self.state {
            None => false,
            Some(w) => w.strong_count() > 0,
        }
    }

    pub fn stop_requested(&self) -> bool {
        match self.state.as_ref().and_then(Weak::upgrade) {
            None => false,
            Some(st) => st.stopped.load(Ordering::SeqCst),
        }
    }

    /// Register `func` to run when a stop is requested. If the source has
    /// already stopped, `func` runs inline before this returns. The
    /// returned guard deregisters on drop.
    pub fn register(&self, func: impl FnOnce() + Send + 'static) -> StopCallback {
        let Some(state) = self.state.as_ref().and_then(Weak::upgrade) else {
            return StopCallback {
                entry: None,
                state: None,
            };
        };
        {
            let mut list = state.callbacks.lock().unwrap();
            if !state.stopped.load(Ordering::SeqCst) {
                let entry = Arc::new(CallbackEntry {
                    func: Mutex::new(Some(Box::new(func) as Box<dyn FnOnce() + Send>)),
                    exec_done: AtomicBool::new(false),
                    removed_during_exec: AtomicBool::new(false),
                });
                list.push(entry.clone());
                return StopCallback {
                    entry: Some(entry),
                    state: Some(state.clone()),
                };
            }
        }
        // Stop already requested; run inline with no registration.
        func();
        StopCallback {
            entry: None,
            state: None,
        }
    }
}

impl PartialEq for StopToken {
    fn eq(&self, other: &StopToken) -> bool {
        match (&self.state, &other.state) {
            (None, None) => true,
            (Some(a), Some(b)) => Weak::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Registration guard returned by [`StopToken::register`].
pub struct StopCallback {
    entry: Option<Arc<CallbackEntry>>,
    state: Option<Arc<StopState>>,
}

impl Drop for StopCallback {
    fn drop(&mut self) {
        let (Some(entry), Some(state)) = (self.entry.take(), self.state.take()) else {
            return;
        };
        {
            let mut list = state.callbacks.lock().unwrap();
            if let Some(i) = list.iter().position(|e| Arc::ptr_eq(e, &entry)) {
                // Still registered: splice out, the handler never runs.
                list.remove(i);
                return;
            }
        }
        // The entry is no longer in the list: it has executed or is
        // executing right now.
        let stopping = *state.stopping_thread.lock().unwrap();
        if stopping == Some(std::thread::current().id()) {
            // We are inside request_stop on this thread (a handler is
            // deregistering itself or a sibling). Mark the entry so the
            // drain loop skips its post-execution bookkeeping.
            entry.removed_during_exec.store(true, Ordering::SeqCst);
        } else {
            // Executing on another thread; wait for it to finish so the
            // handler's captures outlive the call.
            while !entry.exec_done.load(Ordering::SeqCst) {
                std::thread::yield_now();
            }
        }
    }
}
