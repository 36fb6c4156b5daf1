//! Cancellation tests
//!
//! - a cancelled token interrupts the engine and yields `Cancelled`
//! - the worker is always joined before the future completes
//! - timeouts, both host-side and engine-side

#![allow(missing_docs)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kuzu_bridge::loopback::{HandlerResult, Invocation, LoopbackEngine};
use kuzu_bridge::{AsyncConnection, CancelToken, Error, LogicalTypeId, Result, Value};

const SLOW: &str = "MATCH (a)-[*1..30]->(b) RETURN count(*)";
const FAST: &str = "RETURN 1";

/// Spins until interrupted; gives up (successfully) after a few seconds so a
/// broken interrupt path fails the test instead of hanging it.
fn spin(call: &Invocation<'_>) -> HandlerResult {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        call.check_interrupt()?;
        std::thread::sleep(Duration::from_millis(2));
    }
    Ok(vec![vec![Value::Int64(-1)]])
}

fn engine(finished: Arc<AtomicUsize>) -> LoopbackEngine {
    LoopbackEngine::new()
        .statement(SLOW, &[], &[("count(*)", LogicalTypeId::Int64)], move |call| {
            let outcome = spin(call);
            finished.fetch_add(1, Ordering::SeqCst);
            outcome
        })
        .statement(FAST, &[], &[("1", LogicalTypeId::Int64)], |_| {
            Ok(vec![vec![Value::Int64(1)]])
        })
}

fn connect(finished: &Arc<AtomicUsize>) -> Result<AsyncConnection> {
    let conn = engine(Arc::clone(finished)).open()?.connect()?;
    Ok(AsyncConnection::new(conn))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_interrupts_the_running_query() -> Result<()> {
    let finished = Arc::new(AtomicUsize::new(0));
    let conn = connect(&finished)?;
    let token = CancelToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    match conn.query(SLOW, &token).await {
        Err(Error::Cancelled { operation, detail }) => {
            assert_eq!(operation, "query");
            assert_eq!(detail.as_deref(), Some("Interrupted."));
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(4));
    // the worker returned before the future completed
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert!(token.is_cancelled());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connections_stay_usable_after_a_cancel() -> Result<()> {
    let finished = Arc::new(AtomicUsize::new(0));
    let conn = connect(&finished)?;
    let token = CancelToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });
    assert!(matches!(
        conn.query_scalar::<i64>(SLOW, &token).await,
        Err(Error::Cancelled { .. })
    ));
    // a stale interrupt must not leak into the next query
    let fresh = CancelToken::new();
    assert_eq!(conn.query_scalar::<i64>(FAST, &fresh).await?, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pre_cancelled_tokens_never_reach_the_engine() -> Result<()> {
    let finished = Arc::new(AtomicUsize::new(0));
    let conn = connect(&finished)?;
    let token = CancelToken::new();
    token.cancel();
    token.cancel();
    match conn.query(SLOW, &token).await {
        Err(Error::Cancelled { detail, .. }) => assert!(detail.is_none()),
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(finished.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn uncancelled_queries_complete_normally() -> Result<()> {
    let finished = Arc::new(AtomicUsize::new(0));
    let conn = connect(&finished)?;
    let token = CancelToken::new();
    let rows = conn.query(FAST, &token).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_as::<i64, _>(0)?, 1);
    assert!(!token.is_cancelled());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn host_timeouts_cancel_the_query() -> Result<()> {
    let finished = Arc::new(AtomicUsize::new(0));
    let conn = connect(&finished)?;
    match conn.query_with_timeout(SLOW, Duration::from_millis(100)).await {
        Err(Error::Cancelled { operation, detail }) => {
            assert_eq!(operation, "timed query");
            assert_eq!(detail.as_deref(), Some("Interrupted."));
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(conn.query_with_timeout(FAST, Duration::from_secs(5)).await?.len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tokens_wake_every_waiter() {
    let token = CancelToken::new();
    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(10)).await;
    token.cancel();
    for waiter in waiters {
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter woke")
            .expect("waiter task");
    }
}

#[test]
fn engine_timeouts_fail_the_query_with_its_message() -> Result<()> {
    let finished = Arc::new(AtomicUsize::new(0));
    let conn = engine(Arc::clone(&finished)).open()?.connect()?;
    conn.set_query_timeout(Duration::from_millis(50))?;
    match conn.query(SLOW) {
        Err(Error::NativeCallFailed { stage, message }) => {
            assert_eq!(stage, "Query");
            assert_eq!(message, "Interrupted.");
        }
        other => panic!("unexpected: {other:?}"),
    }
    conn.set_query_timeout(Duration::ZERO)?;
    assert_eq!(conn.query_scalar::<i64>(FAST)?, 1);
    Ok(())
}

#[test]
fn interrupting_an_idle_connection_is_harmless() -> Result<()> {
    let finished = Arc::new(AtomicUsize::new(0));
    let conn = engine(finished).open()?.connect()?;
    conn.interrupt()?;
    // the next query starts with a clear flag
    assert_eq!(conn.query_scalar::<i64>(FAST)?, 1);
    Ok(())
}
