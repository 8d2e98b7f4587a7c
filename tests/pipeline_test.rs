//! Relations → refresh → detection, end to end, plus on-disk persistence.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use corridor_signals::db;
use corridor_signals::models::{RelationAggregate, SignalType, Window};
use corridor_signals::orchestrator::{CycleOrchestrator, CycleSettings};
use corridor_signals::refresh::refresh_all;
use corridor_signals::store::{signals_for_entity, SqliteStore};
use rusqlite::Connection;

const ALICE: &str = "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd";
const BOB: &str = "0x2222222222222222222222222222222222222222";

fn relation(from: &str, to: &str, count: u64, volume: &str) -> RelationAggregate {
    let first = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();
    RelationAggregate {
        from: from.to_string(),
        to: to.to_string(),
        window: Window::Week,
        interaction_count: count,
        volume_raw: volume.to_string(),
        density_score: 0.5,
        first_seen_at: first,
        last_seen_at: first + Duration::days(5),
    }
}

fn fixed(at: DateTime<Utc>) -> Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> {
    Arc::new(move || at)
}

fn settings() -> CycleSettings {
    CycleSettings {
        windows: vec![Window::Week],
        batch_limit: 500,
        call_timeout: StdDuration::from_secs(5),
    }
}

fn refresh(conn: &Arc<Mutex<Connection>>, at: DateTime<Utc>) -> usize {
    refresh_all(&mut conn.lock().unwrap(), &[Window::Week], at).unwrap()
}

#[tokio::test]
async fn test_flow_turning_into_wash_is_signalled() {
    let conn = db::connect(":memory:").unwrap();
    db::run_migrations(&conn).unwrap();
    let conn = Arc::new(Mutex::new(conn));
    let t0 = Utc.with_ymd_and_hms(2024, 8, 6, 0, 0, 0).unwrap();

    // mixed-case input addresses are normalised on write
    {
        let db = conn.lock().unwrap();
        let shouty = ALICE.to_uppercase().replace("0X", "0x");
        db::record_relation(&db, &relation(&shouty, BOB, 40, "9000000"), t0).unwrap();
        db::record_relation(&db, &relation(BOB, ALICE, 20, "1000000"), t0).unwrap();
    }
    assert_eq!(refresh(&conn, t0 + Duration::minutes(1)), 2);

    let orch = CycleOrchestrator::sqlite(SqliteStore::new(Arc::clone(&conn)), settings());
    let orch = orch.with_clock(fixed(t0 + Duration::minutes(2)));
    let first = orch.run_cycle().await.unwrap();
    assert_eq!(first.bundles_processed, 2);

    let entity = format!("{ALICE}:{BOB}");
    let seen = signals_for_entity(&conn.lock().unwrap(), &entity).unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].signal_type, SignalType::NewCorridor);

    // reverse volume catches up: near-symmetric round-tripping, same activity
    let t1 = t0 + Duration::minutes(3);
    db::record_relation(&conn.lock().unwrap(), &relation(BOB, ALICE, 20, "8800000"), t1).unwrap();
    assert_eq!(refresh(&conn, t1 + Duration::minutes(1)), 2);

    let orch = orch.with_clock(fixed(t1 + Duration::minutes(2)));
    let second = orch.run_cycle().await.unwrap();
    assert_eq!(second.by_type.get(&SignalType::WashDetected), Some(&2));

    let latest = &signals_for_entity(&conn.lock().unwrap(), &entity).unwrap()[0];
    assert_eq!(latest.signal_type, SignalType::WashDetected);
    assert_eq!(latest.related_addresses, vec![ALICE.to_string(), BOB.to_string()]);
    // |9.0M - 8.8M| / 9.0M truncates to 0.02 -> symmetry 0.98
    assert!((latest.confidence - (0.5 + 0.98 * 0.4)).abs() < 1e-9);
}

#[tokio::test]
async fn test_checkpoint_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corridors.db");
    let path = path.to_str().unwrap();
    let t0 = Utc.with_ymd_and_hms(2024, 8, 6, 0, 0, 0).unwrap();

    {
        let conn = db::connect(path).unwrap();
        db::run_migrations(&conn).unwrap();
        db::record_relation(&conn, &relation(ALICE, BOB, 3, "10"), t0).unwrap();
        db::record_relation(&conn, &relation(BOB, ALICE, 9, "20"), t0).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        refresh(&conn, t0 + Duration::minutes(1));

        let orch = CycleOrchestrator::sqlite(SqliteStore::new(Arc::clone(&conn)), settings())
            .with_clock(fixed(t0 + Duration::minutes(2)));
        assert_eq!(orch.run_cycle().await.unwrap().bundles_processed, 2);
    }

    // new process, same file: nothing new to read, nothing re-emitted
    let conn = Arc::new(Mutex::new(db::connect(path).unwrap()));
    assert_eq!(refresh(&conn, t0 + Duration::minutes(3)), 0);
    let orch = CycleOrchestrator::sqlite(SqliteStore::new(Arc::clone(&conn)), settings())
        .with_clock(fixed(t0 + Duration::minutes(4)));
    let summary = orch.run_cycle().await.unwrap();
    assert_eq!(summary.bundles_processed, 0);
    assert_eq!(summary.signals_generated, 0);
}
