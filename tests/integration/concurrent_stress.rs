//! Concurrency stress tests
//!
//! - many connections on one shared database
//! - closing the database while other threads are mid-query
//! - interrupting a connection from a foreign thread, even while a close of
//!   its database is waiting for the running query

#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use kuzu_bridge::loopback::LoopbackEngine;
use kuzu_bridge::{Database, Error, LogicalTypeId, Result, Value};

const DOUBLE: &str = "RETURN $x * 2 AS doubled";
const RANGE: &str = "UNWIND range(1, 64) AS i RETURN i, 'row ' + i AS label";
const SPIN: &str = "MATCH (a)-[*]->(b) RETURN count(*)";

const THREADS: usize = 8;

fn open() -> Result<Database> {
    LoopbackEngine::new()
        .statement(
            DOUBLE,
            &[("x", LogicalTypeId::Int64)],
            &[("doubled", LogicalTypeId::Int64)],
            |call| {
                let x: i64 = call.param_as("x")?;
                Ok(vec![vec![Value::Int64(x * 2)]])
            },
        )
        .statement(
            RANGE,
            &[],
            &[("i", LogicalTypeId::Int64), ("label", LogicalTypeId::String)],
            |_| {
                Ok((1..=64)
                    .map(|i| vec![Value::Int64(i), Value::from(format!("row {i}"))])
                    .collect())
            },
        )
        .statement(SPIN, &[], &[("count(*)", LogicalTypeId::Int64)], |call| {
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                call.check_interrupt()?;
                thread::sleep(Duration::from_millis(1));
            }
            Ok(vec![vec![Value::Int64(0)]])
        })
        .open()
}

#[test]
fn connections_work_in_parallel_on_one_database() -> Result<()> {
    let db = open()?;
    let barrier = Barrier::new(THREADS);
    thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS)
            .map(|worker| {
                let db = &db;
                let barrier = &barrier;
                scope.spawn(move || -> Result<()> {
                    let conn = db.connect()?;
                    let mut stmt = conn.prepare(DOUBLE)?;
                    barrier.wait();
                    for round in 0..100i64 {
                        let x = worker as i64 * 1_000 + round;
                        stmt.bind("x", x)?;
                        assert_eq!(conn.execute_scalar::<i64>(&stmt)?, x * 2);
                        if round % 10 == 0 {
                            let mut result = conn.query(RANGE)?;
                            let mut sum = 0;
                            while result.has_next()? {
                                sum += result.next()?.get_as::<i64, _>("i")?;
                            }
                            assert_eq!(sum, (1..=64).sum::<i64>());
                        }
                    }
                    Ok(())
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker panicked")?;
        }
        Ok(())
    })
}

#[test]
fn closing_the_database_under_load_only_invalidates_handles() -> Result<()> {
    let db = open()?;
    let barrier = Arc::new(Barrier::new(THREADS + 1));
    let completed = Arc::new(AtomicUsize::new(0));
    let mut workers = Vec::new();
    for _ in 0..THREADS {
        let db = db.clone();
        let barrier = Arc::clone(&barrier);
        let completed = Arc::clone(&completed);
        workers.push(thread::spawn(move || -> Error {
            let conn = match db.connect() {
                Ok(conn) => conn,
                Err(err) => return err,
            };
            barrier.wait();
            loop {
                let outcome = conn.query(RANGE).and_then(|result| {
                    result
                        .rows()
                        .map(|row| row?.get_as::<String, _>("label"))
                        .collect::<Result<Vec<_>>>()
                });
                match outcome {
                    Ok(labels) => {
                        assert_eq!(labels.len(), 64);
                        completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => return err,
                }
            }
        }));
    }
    barrier.wait();
    thread::sleep(Duration::from_millis(20));
    assert!(db.close());

    for worker in workers {
        let err = worker.join().expect("worker panicked");
        assert!(
            matches!(err, Error::InvalidHandleState { .. }),
            "unexpected error after close: {err}"
        );
    }
    assert!(completed.load(Ordering::Relaxed) > 0);
    assert!(matches!(db.connect(), Err(Error::InvalidHandleState { .. })));
    Ok(())
}

#[test]
fn foreign_threads_can_interrupt_a_running_query() -> Result<()> {
    let db = open()?;
    let conn = db.connect()?;
    let interrupt = conn.interrupt_handle();
    let done = Arc::new(AtomicBool::new(false));
    let watcher_done = Arc::clone(&done);
    let interrupter = thread::spawn(move || -> Result<usize> {
        let mut sent = 0;
        // interrupts that land before the query starts are cleared, so repeat
        while !watcher_done.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(20));
            interrupt.interrupt()?;
            sent += 1;
        }
        Ok(sent)
    });
    let started = Instant::now();
    let outcome = conn.query(SPIN);
    done.store(true, Ordering::Release);
    let sent = interrupter.join().expect("interrupter panicked")?;
    assert!(sent > 0);
    assert!(started.elapsed() < Duration::from_secs(4));
    match outcome {
        Err(Error::NativeCallFailed { message, .. }) => assert_eq!(message, "Interrupted."),
        other => panic!("unexpected: {other:?}"),
    }
    Ok(())
}

#[test]
fn interrupts_are_not_queued_behind_a_pending_close() -> Result<()> {
    let db = open()?;
    let conn = db.connect()?;
    let interrupt = conn.interrupt_handle();
    let closer_db = db.clone();
    let closer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        // waits for the running query to let go of the database
        closer_db.close()
    });
    let interrupter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        let started = Instant::now();
        let outcome = interrupt.interrupt();
        (outcome, started.elapsed())
    });

    let started = Instant::now();
    let outcome = conn.query(SPIN);
    let elapsed = started.elapsed();
    let (sent, blocked_for) = interrupter.join().expect("interrupter panicked");
    assert!(closer.join().expect("closer panicked"));

    sent?;
    assert!(blocked_for < Duration::from_secs(1), "interrupt waited {blocked_for:?}");
    assert!(elapsed < Duration::from_secs(2), "query ran for {elapsed:?}");
    match outcome {
        Err(Error::NativeCallFailed { message, .. }) => assert_eq!(message, "Interrupted."),
        other => panic!("unexpected: {other:?}"),
    }
    assert!(matches!(conn.query(DOUBLE), Err(Error::InvalidHandleState { .. })));
    Ok(())
}

#[test]
fn statements_move_between_threads_with_their_connection() -> Result<()> {
    let db = open()?;
    let conn = db.connect()?;
    let mut stmt = conn.prepare(DOUBLE)?;
    stmt.bind("x", 21i64)?;
    let answer = thread::spawn(move || conn.execute_scalar::<i64>(&stmt))
        .join()
        .expect("worker panicked")?;
    assert_eq!(answer, 42);
    Ok(())
}
