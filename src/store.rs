//! Storage collaborators of the detection cycle and their SQLite backing.
//!
//! The cycle only reads bundles, reads/inserts signals and moves checkpoints;
//! it never updates a bundle or an existing signal.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use tokio::task;

use crate::db::{self, conversion_err, ts_column};
use crate::error::{Error, Result};
use crate::models::{fmt_ts, Bundle, Signal, SignalInput, SignalType, Window};

const BUNDLE_SELECT: &str = "SELECT from_address, to_address, bundle_type, confidence,
        interaction_count, density_score, netflow_raw, netflow_direction,
        intensity_score, consistency_score,
        first_seen_at, last_seen_at, updated_at
 FROM bundles";

#[async_trait]
pub trait BundleStore: Send + Sync {
    /// Bundles of `window` updated strictly after `since`, oldest first.
    /// A capped batch is extended past `limit` only to finish the run of
    /// bundles sharing its last `updated_at`, so resuming after that
    /// timestamp never skips a bundle.
    async fn find_updated_since(
        &self,
        window: Window,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Bundle>>;
}

#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Whether a signal for (entity, type, window) was created within the last
    /// `cooldown_minutes` before `now`
    async fn exists_recent(
        &self,
        entity_id: &str,
        signal_type: SignalType,
        window: Window,
        cooldown_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    async fn create(&self, signal: SignalInput) -> Result<Signal>;
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get_last_processed_at(&self, job_key: &str) -> Result<Option<DateTime<Utc>>>;

    async fn set_last_processed_at(
        &self,
        job_key: &str,
        at: DateTime<Utc>,
        metadata: serde_json::Value,
    ) -> Result<()>;
}

/// All three collaborators over one shared SQLite connection
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    // ---------- DB wrappers (spawn_blocking) ----------

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let db = conn.lock().map_err(|_| Error::LockPoisoned)?;
            f(&db)
        })
        .await?
    }
}

#[async_trait]
impl BundleStore for SqliteStore {
    async fn find_updated_since(
        &self,
        window: Window,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Bundle>> {
        self.with_conn(move |db| {
            let mut stmt = db.prepare(&format!(
                "{BUNDLE_SELECT}
                 WHERE time_window = ?1 AND updated_at > ?2
                 ORDER BY updated_at ASC, from_address ASC, to_address ASC
                 LIMIT ?3"
            ))?;
            let rows = stmt.query_map(
                params![window.as_str(), fmt_ts(&since), limit as i64],
                |r| bundle_from_row(r, window),
            )?;

            let mut bundles = Vec::new();
            for row in rows {
                bundles.push(row?);
            }

            // finish the timestamp group the limit cut into
            let tail = match bundles.last() {
                Some(last) if bundles.len() >= limit => {
                    (fmt_ts(&last.updated_at), last.from.clone(), last.to.clone())
                }
                _ => return Ok(bundles),
            };
            let mut stmt = db.prepare(&format!(
                "{BUNDLE_SELECT}
                 WHERE time_window = ?1 AND updated_at = ?2
                   AND (from_address > ?3 OR (from_address = ?3 AND to_address > ?4))
                 ORDER BY from_address ASC, to_address ASC"
            ))?;
            let rows = stmt.query_map(
                params![window.as_str(), tail.0, tail.1, tail.2],
                |r| bundle_from_row(r, window),
            )?;
            for row in rows {
                bundles.push(row?);
            }
            Ok(bundles)
        })
        .await
    }
}

#[async_trait]
impl SignalStore for SqliteStore {
    async fn exists_recent(
        &self,
        entity_id: &str,
        signal_type: SignalType,
        window: Window,
        cooldown_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let entity_id = entity_id.to_string();
        let cutoff = now - Duration::minutes(cooldown_minutes);
        self.with_conn(move |db| {
            let mut stmt = db.prepare(
                "SELECT 1 FROM signals
                 WHERE entity_id = ?1 AND signal_type = ?2 AND time_window = ?3
                   AND created_at >= ?4
                 LIMIT 1",
            )?;
            let found = stmt.exists(params![
                entity_id,
                signal_type.as_str(),
                window.as_str(),
                fmt_ts(&cutoff),
            ])?;
            Ok(found)
        })
        .await
    }

    async fn create(&self, signal: SignalInput) -> Result<Signal> {
        self.with_conn(move |db| {
            let related = serde_json::to_string(&signal.related_addresses)?;
            db.execute(
                r#"
                INSERT INTO signals (
                    entity_type, entity_id, signal_type, time_window,
                    prev_bundle_type, new_bundle_type, prev_intensity, new_intensity,
                    confidence, related_addresses, created_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
                params![
                    signal.entity_type,
                    signal.entity_id,
                    signal.signal_type.as_str(),
                    signal.window.as_str(),
                    signal.prev_bundle_type.map(|t| t.as_str()),
                    signal.new_bundle_type.map(|t| t.as_str()),
                    signal.prev_intensity,
                    signal.new_intensity,
                    signal.confidence,
                    related,
                    fmt_ts(&signal.created_at),
                ],
            )?;

            Ok(Signal {
                id: db.last_insert_rowid(),
                entity_type: signal.entity_type,
                entity_id: signal.entity_id,
                signal_type: signal.signal_type,
                window: signal.window,
                prev_bundle_type: signal.prev_bundle_type,
                new_bundle_type: signal.new_bundle_type,
                prev_intensity: signal.prev_intensity,
                new_intensity: signal.new_intensity,
                confidence: signal.confidence,
                related_addresses: signal.related_addresses,
                status: "new".to_string(),
                created_at: signal.created_at,
            })
        })
        .await
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn get_last_processed_at(&self, job_key: &str) -> Result<Option<DateTime<Utc>>> {
        let job_key = job_key.to_string();
        self.with_conn(move |db| db::get_checkpoint(db, &job_key)).await
    }

    async fn set_last_processed_at(
        &self,
        job_key: &str,
        at: DateTime<Utc>,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let job_key = job_key.to_string();
        self.with_conn(move |db| db::set_checkpoint(db, &job_key, at, &metadata))
            .await
    }
}

/// Signals for one corridor entity, newest first
pub fn signals_for_entity(conn: &Connection, entity_id: &str) -> Result<Vec<Signal>> {
    let mut stmt = conn.prepare(
        "SELECT id, entity_type, entity_id, signal_type, time_window,
                prev_bundle_type, new_bundle_type, prev_intensity, new_intensity,
                confidence, related_addresses, status, created_at
         FROM signals
         WHERE entity_id = ?1
         ORDER BY created_at DESC, id DESC",
    )?;

    let rows = stmt.query_map([entity_id], signal_from_row)?;
    let mut signals = Vec::new();
    for row in rows {
        signals.push(row?);
    }
    Ok(signals)
}

fn parsed<T: std::str::FromStr<Err = String>>(
    r: &rusqlite::Row<'_>,
    col: usize,
) -> rusqlite::Result<T> {
    let raw: String = r.get(col)?;
    raw.parse().map_err(|e| conversion_err(col, e))
}

fn parsed_opt<T: std::str::FromStr<Err = String>>(
    r: &rusqlite::Row<'_>,
    col: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = r.get(col)?;
    raw.map(|s| s.parse().map_err(|e| conversion_err(col, e)))
        .transpose()
}

fn bundle_from_row(r: &rusqlite::Row<'_>, window: Window) -> rusqlite::Result<Bundle> {
    let count: i64 = r.get(4)?;
    Ok(Bundle {
        from: r.get(0)?,
        to: r.get(1)?,
        window,
        bundle_type: parsed(r, 2)?,
        confidence: r.get(3)?,
        interaction_count: count.max(0) as u64,
        density_score: r.get(5)?,
        netflow_raw: r.get(6)?,
        netflow_direction: parsed(r, 7)?,
        intensity_score: r.get(8)?,
        consistency_score: r.get(9)?,
        first_seen_at: ts_column(r, 10)?,
        last_seen_at: ts_column(r, 11)?,
        updated_at: ts_column(r, 12)?,
    })
}

fn signal_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Signal> {
    let window_raw: String = r.get(4)?;
    let window = window_raw
        .parse::<Window>()
        .map_err(|e| conversion_err(4, e.to_string()))?;
    let related_raw: String = r.get(10)?;
    let related_addresses: Vec<String> =
        serde_json::from_str(&related_raw).map_err(|e| conversion_err(10, e.to_string()))?;

    Ok(Signal {
        id: r.get(0)?,
        entity_type: r.get(1)?,
        entity_id: r.get(2)?,
        signal_type: parsed(r, 3)?,
        window,
        prev_bundle_type: parsed_opt(r, 5)?,
        new_bundle_type: parsed_opt(r, 6)?,
        prev_intensity: r.get(7)?,
        new_intensity: r.get(8)?,
        confidence: r.get(9)?,
        related_addresses,
        status: r.get(11)?,
        created_at: ts_column(r, 12)?,
    })
}
