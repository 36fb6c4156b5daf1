//! Live handle accounting
//!
//! Runs in its own binary: the counters are process-wide, so nothing else may
//! create handles while the snapshots are compared. Tests here take `SERIAL`.

#![allow(missing_docs)]

use kuzu_bridge::loopback::LoopbackEngine;
use kuzu_bridge::{
    live_handles, live_snapshot, orphaned_handles, HandleKind, LogicalTypeId, NativeValue, Result,
    Value,
};
use parking_lot::Mutex;

fn engine() -> LoopbackEngine {
    LoopbackEngine::new()
        .statement(
            "UNWIND range(1, 3) AS x RETURN x",
            &[],
            &[("x", LogicalTypeId::Int64)],
            |_| Ok((1..=3).map(|x| vec![Value::Int64(x)]).collect()),
        )
        .statement(
            "RETURN $x",
            &[("x", LogicalTypeId::Int64)],
            &[("$x", LogicalTypeId::Int64)],
            |call| Ok(vec![vec![call.param("x").cloned().unwrap_or(Value::Null(LogicalTypeId::Int64))]]),
        )
}

static SERIAL: Mutex<()> = Mutex::new(());

#[test]
fn every_acquired_handle_is_released() -> Result<()> {
    let _serial = SERIAL.lock();
    let baseline = live_snapshot();
    assert_eq!(baseline.total(), 0);

    {
        let db = engine().open()?;
        assert_eq!(live_handles(HandleKind::Database), 1);
        let conn = db.connect()?;
        let mut result = conn.query("UNWIND range(1, 3) AS x RETURN x")?;
        assert_eq!(live_handles(HandleKind::QueryResult), 1);
        {
            let row = result.next()?;
            assert_eq!(row.get_as::<i64, _>(0)?, 1);
            assert_eq!(live_handles(HandleKind::Tuple), 1);
        }
        assert_eq!(live_handles(HandleKind::Tuple), 0);
        let _ = result.summary()?;
        assert_eq!(live_handles(HandleKind::Summary), 0);

        let rows: Vec<_> = result.rows().collect::<Result<_>>()?;
        assert_eq!(rows.len(), 2);
        assert_eq!(live_handles(HandleKind::QueryResult), 0);

        let mut stmt = conn.prepare("RETURN $x")?;
        stmt.bind("x", 5i64)?;
        // bound values are copied by the engine and released right away
        assert_eq!(live_handles(HandleKind::Value), 0);
        assert_eq!(conn.execute_scalar::<i64>(&stmt)?, 5);

        let value = NativeValue::encode(db.api(), &Value::from(vec![1i64, 2, 3]))?;
        assert_eq!(live_handles(HandleKind::Value), 1);
        drop(value);

        let schema = conn.query("UNWIND range(1, 3) AS x RETURN x")?.try_get_schema()?;
        assert!(schema.is_some());
        assert_eq!(live_handles(HandleKind::ArrowSchema), 1);
        assert_eq!(live_handles(HandleKind::QueryResult), 0);
        drop(schema);

        assert_eq!(live_handles(HandleKind::Connection), 1);
        assert_eq!(live_handles(HandleKind::Statement), 1);
    }

    assert_eq!(live_snapshot(), baseline);
    Ok(())
}

#[test]
fn explicit_release_and_drop_count_once() -> Result<()> {
    let _serial = SERIAL.lock();
    let db = engine().open()?;
    let before = live_handles(HandleKind::Connection);
    let conn = db.connect()?;
    assert!(conn.close());
    assert!(!conn.close());
    drop(conn);
    assert_eq!(live_handles(HandleKind::Connection), before);
    Ok(())
}

#[test]
fn orphaned_releases_stay_visible() -> Result<()> {
    let _serial = SERIAL.lock();
    let before = live_snapshot();
    let db = engine().open()?;
    let conn = db.connect()?;
    let result = conn.query("UNWIND range(1, 3) AS x RETURN x")?;
    assert!(db.close());
    // the connection and its result can no longer be destroyed natively
    drop(result);
    drop(conn);
    let after = live_snapshot();
    assert_eq!(after.total(), before.total());
    assert_eq!(after.orphaned(HandleKind::Connection), before.orphaned(HandleKind::Connection) + 1);
    assert_eq!(after.orphaned(HandleKind::QueryResult), before.orphaned(HandleKind::QueryResult) + 1);
    assert_eq!(after.total_orphaned(), before.total_orphaned() + 2);
    assert_eq!(orphaned_handles(HandleKind::Database), before.orphaned(HandleKind::Database));
    Ok(())
}
