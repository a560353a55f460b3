//! Structured composition of emitters: continuation, sequencing, joining,
//! racing, timeouts and scheduling.
//!
//! Transformers run synchronously on the thread that completed the
//! upstream operation. The `_ok` variants bypass the transform and re-emit
//! the upstream result unchanged when its status is an error.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::reactor::Reactor;
use crate::status::Status;

use super::emitter::{Emitter, EmitterResult, Handler, Operation};
use super::stop::StopSource;

/// An emitter that completes immediately at start with `result`.
pub fn just(result: EmitterResult) -> Emitter {
    Emitter::from_start(move |h| h.complete(result))
}

/// An emitter that completes immediately with an okay status and `value`.
pub fn just_value<T: Send + 'static>(value: T) -> Emitter {
    just(EmitterResult::from_value(value))
}

/// An emitter that completes immediately with `status` and no value.
pub fn just_status(status: Status) -> Emitter {
    just(EmitterResult::from_status(status))
}

impl Emitter {
    /// Transform this emitter's result. `transform` runs on the completing
    /// thread, for errors and successes alike.
    pub fn then(
        self,
        transform: impl FnOnce(EmitterResult) -> EmitterResult + Send + 'static,
    ) -> Emitter {
        Emitter::new(move |h| {
            let stop = h.stop_token();
            self.connect(Handler::with_stop(stop, move |res| h.complete(transform(res))))
        })
    }

    /// As [`then`](Emitter::then), but an error result skips the transform
    /// and is re-emitted unchanged.
    pub fn then_ok(
        self,
        transform: impl FnOnce(EmitterResult) -> EmitterResult + Send + 'static,
    ) -> Emitter {
        self.then(move |res| {
            if res.is_error() {
                res
            } else {
                transform(res)
            }
        })
    }

    /// Continue into the emitter produced by `bind`. The new emitter is
    /// connected and started on the thread that completed this one.
    pub fn and_then(
        self,
        bind: impl FnOnce(EmitterResult) -> Emitter + Send + 'static,
    ) -> Emitter {
        Emitter::new(move |h| {
            let stop = h.stop_token();
            let stop_next = stop.clone();
            self.connect(Handler::with_stop(stop, move |res| {
                let next = bind(res);
                next.connect(Handler::with_stop(stop_next, move |r| h.complete(r)))
                    .start();
            }))
        })
    }

    /// As [`and_then`](Emitter::and_then), but an error result skips
    /// `bind` and completes the downstream handler directly.
    pub fn and_then_ok(
        self,
        bind: impl FnOnce(EmitterResult) -> Emitter + Send + 'static,
    ) -> Emitter {
        Emitter::new(move |h| {
            let stop = h.stop_token();
            let stop_next = stop.clone();
            self.connect(Handler::with_stop(stop, move |res| {
                if res.is_error() {
                    h.complete(res);
                    return;
                }
                let next = bind(res);
                next.connect(Handler::with_stop(stop_next, move |r| h.complete(r)))
                    .start();
            }))
        })
    }
}

struct AllState {
    slots: Vec<Option<EmitterResult>>,
    remaining: usize,
    outer: Option<Handler>,
}

/// Start every child; complete once all of them have completed, with a
/// `Vec<EmitterResult>` in the children's order. An empty set completes
/// immediately.
pub fn when_all(emitters: Vec<Emitter>) -> Emitter {
    Emitter::new(move |h| {
        let n = emitters.len();
        if n == 0 {
            return Operation::new(move || {
                h.complete(EmitterResult::from_value(Vec::<EmitterResult>::new()));
            });
        }
        let token = h.stop_token();
        let state = Arc::new(Mutex::new(AllState {
            slots: (0..n).map(|_| None).collect(),
            remaining: n,
            outer: Some(h),
        }));
        let ops: Vec<Operation> = emitters
            .into_iter()
            .enumerate()
            .map(|(i, em)| {
                let state = state.clone();
                em.connect(Handler::with_stop(token.clone(), move |res| {
                    let finished = {
                        let mut st = state.lock().unwrap();
                        st.slots[i] = Some(res);
                        st.remaining -= 1;
                        if st.remaining == 0 {
                            st.outer.take().map(|outer| {
                                (outer, std::mem::take(&mut st.slots))
                            })
                        } else {
                            None
                        }
                    };
                    if let Some((outer, slots)) = finished {
                        let results: Vec<EmitterResult> = slots.into_iter().flatten().collect();
                        outer.complete(EmitterResult::from_value(results));
                    }
                }))
            })
            .collect();
        Operation::new(move || {
            for op in ops {
                op.start();
            }
        })
    })
}

/// The winning child of a race: which one, and what it delivered.
#[derive(Debug)]
pub struct RaceOutcome {
    pub index: usize,
    pub result: EmitterResult,
}

struct RaceState {
    outstanding: usize,
    winner: Option<RaceOutcome>,
    outer: Option<Handler>,
    /// Keeps the propagation of the outer stop request alive for the
    /// duration of the race.
    _upstream_stop: Option<super::stop::StopCallback>,
}

/// Start every child; the first completion whose result satisfies
/// `predicate` wins. The race then requests a stop on the remaining
/// children and waits for all of them to drain before delivering the
/// winning [`RaceOutcome`].
///
/// Every result is offered to the predicate exactly once, in completion
/// order. If no child's result is accepted the process aborts: a race
/// with no winner has nothing meaningful to deliver.
pub fn first_where(
    emitters: Vec<Emitter>,
    predicate: impl Fn(usize, &EmitterResult) -> bool + Send + Sync + 'static,
) -> Emitter {
    assert!(!emitters.is_empty(), "first_where requires at least one emitter");
    let predicate = Arc::new(predicate);
    Emitter::new(move |h| {
        let source = Arc::new(StopSource::new());
        let upstream = {
            let source = source.clone();
            h.stop_token().register(move || {
                source.request_stop();
            })
        };
        let state = Arc::new(Mutex::new(RaceState {
            outstanding: emitters.len(),
            winner: None,
            outer: Some(h),
            _upstream_stop: Some(upstream),
        }));
        let ops: Vec<Operation> = emitters
            .into_iter()
            .enumerate()
            .map(|(i, em)| {
                let state = state.clone();
                let source = source.clone();
                let predicate = predicate.clone();
                em.connect(Handler::with_stop(source.token(), move |res| {
                    let mut cancel_rest = false;
                    let finished = {
                        let mut st = state.lock().unwrap();
                        if st.winner.is_none() && predicate(i, &res) {
                            st.winner = Some(RaceOutcome { index: i, result: res });
                            cancel_rest = true;
                        }
                        st.outstanding -= 1;
                        if st.outstanding == 0 {
                            Some((st.outer.take(), st.winner.take()))
                        } else {
                            None
                        }
                    };
                    if cancel_rest {
                        source.request_stop();
                    }
                    if let Some((outer, winner)) = finished {
                        match (outer, winner) {
                            (Some(outer), Some(winner)) => {
                                outer.complete(EmitterResult::from_value(winner));
                            }
                            _ => panic!("first_where: no result satisfied the predicate"),
                        }
                    }
                }))
            })
            .collect();
        Operation::new(move || {
            for op in ops {
                op.start();
            }
        })
    })
}

/// A race with an always-accepting predicate: the first completion wins.
pub fn first_completed(emitters: Vec<Emitter>) -> Emitter {
    first_where(emitters, |_, _| true)
}

/// Post a completion onto the reactor; completes with an okay status on a
/// reactor-controlled thread.
pub fn schedule(reactor: Arc<dyn Reactor>) -> Emitter {
    Emitter::from_start(move |h| reactor.call_soon(EmitterResult::nil(), h))
}

/// Post a completion onto the reactor after `delay`. Cancellable: a stop
/// request on the handler completes early with `ECANCELED`.
pub fn schedule_later(reactor: Arc<dyn Reactor>, delay: Duration) -> Emitter {
    Emitter::from_start(move |h| reactor.call_later(delay, EmitterResult::nil(), h))
}

/// Race `emitter` against a timer. If the timer fires first the result is
/// a bare `ETIMEDOUT` status and a stop is requested on `emitter`; the
/// race drains before delivering.
pub fn timeout(reactor: Arc<dyn Reactor>, emitter: Emitter, after: Duration) -> Emitter {
    let timer = schedule_later(reactor, after).then(|res| {
        if res.status.is_cancellation() {
            res
        } else {
            EmitterResult::from_status(Status::timed_out())
        }
    });
    first_completed(vec![emitter, timer]).then(|res| {
        if res.is_error() {
            return res;
        }
        match res.value.downcast::<RaceOutcome>() {
            Ok(outcome) => outcome.result,
            Err(_) => EmitterResult::from_status(Status::generic(libc::EINVAL)),
        }
    })
}

/// Connect `emitter` to a sink that forwards the result through a oneshot
/// channel. Start the returned operation, then await (or blockingly
/// receive) the result.
pub fn tie(emitter: Emitter) -> (Operation, tokio::sync::oneshot::Receiver<EmitterResult>) {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let op = emitter.connect(Handler::new(move |res| {
        let _ = tx.send(res);
    }));
    (op, rx)
}

/// Connect `emitter` to a sink that discards the result.
pub fn detach(emitter: Emitter) -> Operation {
    emitter.connect(Handler::new(|_res| {}))
}

/// Connect to a discarding sink and start immediately.
pub fn detach_start(emitter: Emitter) {
    detach(emitter).start();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn run(emitter: Emitter) -> EmitterResult {
        let cell = Arc::new(Mutex::new(None));
        let cell2 = cell.clone();
        emitter
            .connect(Handler::new(move |res| {
                *cell2.lock().unwrap() = Some(res);
            }))
            .start();
        let res = cell.lock().unwrap().take();
        res.expect("emitter did not complete synchronously")
    }

    #[test]
    fn just_delivers_immediately() {
        let res = run(just_value(41i32));
        assert!(!res.is_error());
        assert_eq!(res.value.downcast::<i32>().ok(), Some(41));
    }

    #[test]
    fn then_transforms_the_result() {
        let res = run(just_value(20i32).then(|res| {
            let n = res.value.downcast::<i32>().unwrap_or(0);
            EmitterResult::from_value(n * 2)
        }));
        assert_eq!(res.value.downcast::<i32>().ok(), Some(40));
    }

    #[test]
    fn then_ok_bypasses_errors() {
        let touched = Arc::new(AtomicUsize::new(0));
        let t = touched.clone();
        let res = run(just_status(Status::server(50)).then_ok(move |res| {
            t.fetch_add(1, Ordering::SeqCst);
            res
        }));
        assert_eq!(res.status, Status::server(50));
        assert_eq!(touched.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn and_then_chains_emitters() {
        let res = run(just_value(1i32).and_then(|res| {
            let n = res.value.downcast::<i32>().unwrap_or(0);
            just_value(n + 10)
        }));
        assert_eq!(res.value.downcast::<i32>().ok(), Some(11));
    }

    #[test]
    fn and_then_ok_short_circuits_errors() {
        let res = run(
            just_status(Status::cancelled()).and_then_ok(|_res| just_value(99i32)),
        );
        assert!(res.status.is_cancellation());
        assert!(res.value.is_nil());
    }

    #[test]
    fn when_all_collects_in_order() {
        let res = run(when_all(vec![
            just_value(1i32),
            just_value(2i32),
            just_value(3i32),
        ]));
        let results = res.value.downcast::<Vec<EmitterResult>>().ok().unwrap();
        let ns: Vec<i32> = results
            .into_iter()
            .map(|r| r.value.downcast::<i32>().unwrap_or(-1))
            .collect();
        assert_eq!(ns, vec![1, 2, 3]);
    }

    #[test]
    fn when_all_of_nothing_completes_immediately() {
        let res = run(when_all(Vec::new()));
        assert!(!res.is_error());
        let results = res.value.downcast::<Vec<EmitterResult>>().ok().unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn first_completed_of_two_immediates() {
        let res = run(first_completed(vec![just_value(41i32), just_value(42i32)]));
        let outcome = res.value.downcast::<RaceOutcome>().ok().unwrap();
        let n = outcome.result.value.downcast::<i32>().unwrap_or(0);
        match outcome.index {
            0 => assert_eq!(n, 41),
            1 => assert_eq!(n, 42),
            other => panic!("impossible winner index {other}"),
        }
    }

    #[test]
    fn race_receiver_is_invoked_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        first_completed(vec![just_value(1i32), just_value(2i32), just_value(3i32)])
            .connect(Handler::new(move |_res| {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .start();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn first_where_selects_by_predicate() {
        // Accept only the even value, which the second emitter delivers.
        let res = run(first_where(
            vec![just_value(3i32), just_value(4i32)],
            |_, res| res.value.view::<i32>().is_some_and(|n| n % 2 == 0),
        ));
        let outcome = res.value.downcast::<RaceOutcome>().ok().unwrap();
        assert_eq!(outcome.index, 1);
        assert_eq!(outcome.result.value.downcast::<i32>().ok(), Some(4));
    }

    #[test]
    fn detached_emitter_still_runs() {
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        detach_start(just_value(()).then(move |res| {
            r.fetch_add(1, Ordering::SeqCst);
            res
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tie_stores_the_result() {
        let (op, rx) = tie(just_value(7i32));
        op.start();
        let res = rx.blocking_recv().unwrap();
        assert_eq!(res.value.downcast::<i32>().ok(), Some(7));
    }
}
