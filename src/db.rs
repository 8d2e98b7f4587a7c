use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::{fmt_ts, normalize_address, parse_ts, Bundle, RelationAggregate, Window};

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS relations (
  from_address      TEXT NOT NULL,
  to_address        TEXT NOT NULL,
  time_window       TEXT NOT NULL,
  interaction_count INTEGER NOT NULL CHECK (interaction_count >= 0),
  volume_raw        TEXT NOT NULL, -- exact integer stored as string
  density_score     REAL NOT NULL,
  first_seen_at     TEXT NOT NULL,
  last_seen_at      TEXT NOT NULL,
  updated_at        TEXT NOT NULL,
  PRIMARY KEY (from_address, to_address, time_window)
);

CREATE INDEX IF NOT EXISTS idx_relations_window_updated
  ON relations (time_window, updated_at);

CREATE TABLE IF NOT EXISTS bundles (
  from_address      TEXT NOT NULL,
  to_address        TEXT NOT NULL,
  time_window       TEXT NOT NULL,
  bundle_type       TEXT NOT NULL,
  confidence        REAL NOT NULL,
  interaction_count INTEGER NOT NULL,
  density_score     REAL NOT NULL,
  netflow_raw       TEXT NOT NULL, -- signed exact integer stored as string
  netflow_direction TEXT NOT NULL,
  intensity_score   REAL NOT NULL,
  consistency_score REAL NOT NULL,
  first_seen_at     TEXT NOT NULL,
  last_seen_at      TEXT NOT NULL,
  updated_at        TEXT NOT NULL,
  PRIMARY KEY (from_address, to_address, time_window)
);

CREATE INDEX IF NOT EXISTS idx_bundles_window_updated
  ON bundles (time_window, updated_at);

CREATE TABLE IF NOT EXISTS signals (
  id                INTEGER PRIMARY KEY AUTOINCREMENT,
  entity_type       TEXT NOT NULL,
  entity_id         TEXT NOT NULL,
  signal_type       TEXT NOT NULL,
  time_window       TEXT NOT NULL,
  prev_bundle_type  TEXT,
  new_bundle_type   TEXT,
  prev_intensity    REAL,
  new_intensity     REAL,
  confidence        REAL NOT NULL,
  related_addresses TEXT NOT NULL, -- JSON array
  status            TEXT NOT NULL DEFAULT 'new',
  created_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_signals_dedup
  ON signals (entity_id, signal_type, time_window, created_at);

CREATE TABLE IF NOT EXISTS job_checkpoints (
  job_key           TEXT NOT NULL PRIMARY KEY,
  last_processed_at TEXT NOT NULL,
  metadata          TEXT NOT NULL DEFAULT '{}',
  updated_at        TEXT NOT NULL
);
"#;

/// Connect to SQLite (with WAL mode for performance)
pub fn connect(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    if path != ":memory:" {
        conn.pragma_update(None, "journal_mode", "WAL")?;
    }
    Ok(conn)
}

/// Run schema migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(INIT_SQL)?;
    Ok(())
}

/// Insert or update a relation aggregate. Normally written by the ingestion
/// pipeline; exposed here for seeding and tests. Addresses are normalised on
/// the way in so corridor keys match regardless of input casing.
pub fn record_relation(
    conn: &Connection,
    relation: &RelationAggregate,
    updated_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO relations (
            from_address, to_address, time_window,
            interaction_count, volume_raw, density_score,
            first_seen_at, last_seen_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(from_address, to_address, time_window) DO UPDATE SET
            interaction_count = excluded.interaction_count,
            volume_raw        = excluded.volume_raw,
            density_score     = excluded.density_score,
            first_seen_at     = excluded.first_seen_at,
            last_seen_at      = excluded.last_seen_at,
            updated_at        = excluded.updated_at
        "#,
        params![
            normalize_address(&relation.from),
            normalize_address(&relation.to),
            relation.window.as_str(),
            relation.interaction_count as i64,
            relation.volume_raw,
            relation.density_score,
            fmt_ts(&relation.first_seen_at),
            fmt_ts(&relation.last_seen_at),
            fmt_ts(&updated_at),
        ],
    )?;
    Ok(())
}

/// Load one directed relation, if present
pub fn get_relation(
    conn: &Connection,
    from: &str,
    to: &str,
    window: Window,
) -> Result<Option<RelationAggregate>> {
    let relation = conn
        .query_row(
            "SELECT from_address, to_address, interaction_count, volume_raw,
                    density_score, first_seen_at, last_seen_at
             FROM relations
             WHERE from_address = ?1 AND to_address = ?2 AND time_window = ?3",
            params![from, to, window.as_str()],
            |r| relation_from_row(r, window),
        )
        .optional()?;
    Ok(relation)
}

/// Relations in `window` touched after `since` (either direction of the pair
/// counts, so a changed reverse edge re-classifies its forward corridor).
pub fn corridors_changed_since(
    conn: &Connection,
    window: Window,
    since: DateTime<Utc>,
) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT from_address, to_address FROM relations
         WHERE time_window = ?1 AND updated_at > ?2
         UNION
         SELECT r.from_address, r.to_address FROM relations r
         JOIN relations rev
           ON rev.from_address = r.to_address
          AND rev.to_address = r.from_address
          AND rev.time_window = r.time_window
         WHERE r.time_window = ?1 AND rev.updated_at > ?2
         ORDER BY 1, 2",
    )?;

    let rows = stmt.query_map(params![window.as_str(), fmt_ts(&since)], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
    })?;

    let mut corridors = Vec::new();
    for row in rows {
        corridors.push(row?);
    }
    Ok(corridors)
}

/// Insert or overwrite the bundle for its corridor (latest wins)
pub fn upsert_bundle(conn: &Connection, bundle: &Bundle) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO bundles (
            from_address, to_address, time_window,
            bundle_type, confidence, interaction_count, density_score,
            netflow_raw, netflow_direction, intensity_score, consistency_score,
            first_seen_at, last_seen_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        ON CONFLICT(from_address, to_address, time_window) DO UPDATE SET
            bundle_type       = excluded.bundle_type,
            confidence        = excluded.confidence,
            interaction_count = excluded.interaction_count,
            density_score     = excluded.density_score,
            netflow_raw       = excluded.netflow_raw,
            netflow_direction = excluded.netflow_direction,
            intensity_score   = excluded.intensity_score,
            consistency_score = excluded.consistency_score,
            first_seen_at     = excluded.first_seen_at,
            last_seen_at      = excluded.last_seen_at,
            updated_at        = excluded.updated_at
        "#,
        params![
            bundle.from,
            bundle.to,
            bundle.window.as_str(),
            bundle.bundle_type.as_str(),
            bundle.confidence,
            bundle.interaction_count as i64,
            bundle.density_score,
            bundle.netflow_raw,
            bundle.netflow_direction.as_str(),
            bundle.intensity_score,
            bundle.consistency_score,
            fmt_ts(&bundle.first_seen_at),
            fmt_ts(&bundle.last_seen_at),
            fmt_ts(&bundle.updated_at),
        ],
    )?;
    Ok(())
}

/// Read a checkpoint row
pub fn get_checkpoint(conn: &Connection, job_key: &str) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT last_processed_at FROM job_checkpoints WHERE job_key = ?1",
            [job_key],
            |r| r.get(0),
        )
        .optional()?;
    Ok(raw.as_deref().and_then(parse_ts))
}

/// Write a checkpoint row
pub fn set_checkpoint(
    conn: &Connection,
    job_key: &str,
    at: DateTime<Utc>,
    metadata: &serde_json::Value,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO job_checkpoints (job_key, last_processed_at, metadata, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(job_key) DO UPDATE SET
            last_processed_at = excluded.last_processed_at,
            metadata          = excluded.metadata,
            updated_at        = excluded.updated_at
        "#,
        params![
            job_key,
            fmt_ts(&at),
            serde_json::to_string(metadata)?,
            fmt_ts(&Utc::now()),
        ],
    )?;
    Ok(())
}

pub(crate) fn conversion_err(col: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        col,
        rusqlite::types::Type::Text,
        msg.into(),
    )
}

pub(crate) fn ts_column(r: &rusqlite::Row<'_>, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = r.get(col)?;
    parse_ts(&raw).ok_or_else(|| conversion_err(col, format!("bad timestamp: {raw}")))
}

fn relation_from_row(r: &rusqlite::Row<'_>, window: Window) -> rusqlite::Result<RelationAggregate> {
    let count: i64 = r.get(2)?;
    Ok(RelationAggregate {
        from: r.get(0)?,
        to: r.get(1)?,
        window,
        interaction_count: count.max(0) as u64,
        volume_raw: r.get(3)?,
        density_score: r.get(4)?,
        first_seen_at: ts_column(r, 5)?,
        last_seen_at: ts_column(r, 6)?,
    })
}
