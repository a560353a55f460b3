//! Combinator behavior over real reactor operations: joins, races,
//! cancellation drain and timeouts under tokio timers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use monoxide::exec::{
    Emitter, EmitterResult, RaceOutcome, first_completed, schedule_later, timeout, when_all,
};
use monoxide::reactor::{Reactor, TokioReactor};

fn timer_with_value(reactor: Arc<dyn Reactor>, delay: Duration, value: i32) -> Emitter {
    schedule_later(reactor, delay).then(move |res| {
        if res.is_error() {
            res
        } else {
            EmitterResult::from_value(value)
        }
    })
}

#[tokio::test]
async fn when_all_joins_staggered_timers_in_child_order() {
    let reactor: Arc<dyn Reactor> = Arc::new(TokioReactor::new());
    // Finish out of order on purpose; results must come back in child
    // order regardless.
    let res = when_all(vec![
        timer_with_value(reactor.clone(), Duration::from_millis(60), 1),
        timer_with_value(reactor.clone(), Duration::from_millis(10), 2),
        timer_with_value(reactor.clone(), Duration::from_millis(30), 3),
    ])
    .into_future()
    .await;
    assert!(!res.is_error());
    let results = res.value.downcast::<Vec<EmitterResult>>().ok().unwrap();
    let values: Vec<i32> = results
        .into_iter()
        .map(|r| r.value.downcast::<i32>().unwrap_or(-1))
        .collect();
    assert_eq!(values, vec![1, 2, 3]);
}

#[tokio::test]
async fn race_cancels_the_loser_and_still_finishes_fast() {
    let reactor: Arc<dyn Reactor> = Arc::new(TokioReactor::new());
    let fast = timer_with_value(reactor.clone(), Duration::from_millis(20), 10);
    let slow = timer_with_value(reactor.clone(), Duration::from_secs(30), 20);
    let before = Instant::now();
    let res = first_completed(vec![fast, slow]).into_future().await;
    // The race waits for the cancelled loser to drain; because the loser's
    // timer honors its stop token, that drain is prompt.
    assert!(
        before.elapsed() < Duration::from_secs(3),
        "loser was not cancelled promptly"
    );
    let outcome = res.value.downcast::<RaceOutcome>().ok().unwrap();
    assert_eq!(outcome.index, 0);
    assert_eq!(outcome.result.value.downcast::<i32>().ok(), Some(10));
}

#[tokio::test]
async fn timeout_is_transparent_when_the_work_wins() {
    let reactor: Arc<dyn Reactor> = Arc::new(TokioReactor::new());
    let work = timer_with_value(reactor.clone(), Duration::from_millis(10), 5);
    let res = timeout(reactor, work, Duration::from_secs(10)).into_future().await;
    assert!(!res.is_error());
    assert_eq!(res.value.downcast::<i32>().ok(), Some(5));
}

#[tokio::test]
async fn timeout_reports_etimedout_when_the_timer_wins() {
    let reactor: Arc<dyn Reactor> = Arc::new(TokioReactor::new());
    let work = timer_with_value(reactor.clone(), Duration::from_secs(30), 5);
    let before = Instant::now();
    let res = timeout(reactor, work, Duration::from_millis(100)).into_future().await;
    assert!(before.elapsed() < Duration::from_secs(3));
    assert!(res.status.is_timeout());
}

#[tokio::test]
async fn chained_lets_run_in_sequence() {
    let reactor: Arc<dyn Reactor> = Arc::new(TokioReactor::new());
    let r2 = reactor.clone();
    let r3 = reactor.clone();
    let res = timer_with_value(reactor, Duration::from_millis(5), 1)
        .and_then_ok(move |res| {
            let n = res.value.downcast::<i32>().unwrap_or(0);
            timer_with_value(r2, Duration::from_millis(5), n + 1)
        })
        .and_then_ok(move |res| {
            let n = res.value.downcast::<i32>().unwrap_or(0);
            timer_with_value(r3, Duration::from_millis(5), n * 10)
        })
        .into_future()
        .await;
    assert_eq!(res.value.downcast::<i32>().ok(), Some(20));
}
