//! Classification refresh: turns relation aggregates into persisted bundles.
//!
//! Runs ahead of the detection cycle. Only corridors whose forward or reverse
//! relation changed since the last refresh are re-classified.

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use tracing::{debug, info};

use crate::classifier::{classify, parse_volume};
use crate::consistency::consistency;
use crate::db;
use crate::error::Result;
use crate::models::{Bundle, NetflowDirection, RelationAggregate, Window};

pub const JOB_KEY_PREFIX: &str = "bundle_refresh";

pub fn job_key(window: Window) -> String {
    format!("{JOB_KEY_PREFIX}:{window}")
}

/// Signed `forward - reverse` as an exact decimal string plus its sign label
pub fn netflow(forward: U256, reverse: U256) -> (String, NetflowDirection) {
    if forward > reverse {
        ((forward - reverse).to_string(), NetflowDirection::Forward)
    } else if reverse > forward {
        (format!("-{}", reverse - forward), NetflowDirection::Reverse)
    } else {
        ("0".to_string(), NetflowDirection::Balanced)
    }
}

/// Classify the corridor `forward.from → forward.to`
pub fn build_bundle(
    forward: &RelationAggregate,
    reverse: Option<&RelationAggregate>,
    now: DateTime<Utc>,
) -> Bundle {
    let classification = classify(Some(forward), reverse);

    let dominant = match reverse {
        Some(rev) if rev.interaction_count > forward.interaction_count => rev,
        _ => forward,
    };

    let forward_volume = parse_volume(&forward.volume_raw);
    let reverse_volume = reverse.map_or(U256::ZERO, |r| parse_volume(&r.volume_raw));
    let (netflow_raw, netflow_direction) = netflow(forward_volume, reverse_volume);

    let total = forward.interaction_count + reverse.map_or(0, |r| r.interaction_count);
    let intensity_score = total as f64 / f64::from(forward.window.days());

    let first_seen_at = reverse.map_or(forward.first_seen_at, |r| {
        r.first_seen_at.min(forward.first_seen_at)
    });
    let last_seen_at = reverse.map_or(forward.last_seen_at, |r| {
        r.last_seen_at.max(forward.last_seen_at)
    });

    Bundle {
        from: forward.from.clone(),
        to: forward.to.clone(),
        window: forward.window,
        bundle_type: classification.bundle_type,
        confidence: classification.confidence,
        interaction_count: dominant.interaction_count,
        density_score: dominant.density_score,
        netflow_raw,
        netflow_direction,
        intensity_score,
        consistency_score: consistency(Some(forward), reverse),
        first_seen_at,
        last_seen_at,
        updated_at: now,
    }
}

/// Re-classify every corridor of `window` touched after `since`
pub fn refresh_window(
    tx: &Transaction<'_>,
    window: Window,
    since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<usize> {
    let corridors = db::corridors_changed_since(tx, window, since)?;
    let mut refreshed = 0;

    for (from, to) in corridors {
        let Some(forward) = db::get_relation(tx, &from, &to, window)? else {
            continue;
        };
        let reverse = db::get_relation(tx, &to, &from, window)?;
        let bundle = build_bundle(&forward, reverse.as_ref(), now);

        debug!(
            "💾 {} [{}] => {} ({:.2})",
            bundle.entity_id(),
            window,
            bundle.bundle_type,
            bundle.confidence
        );
        db::upsert_bundle(tx, &bundle)?;
        refreshed += 1;
    }

    Ok(refreshed)
}

/// Refresh all windows, one transaction per window, advancing each window's
/// refresh checkpoint on commit
pub fn refresh_all(conn: &mut Connection, windows: &[Window], now: DateTime<Utc>) -> Result<usize> {
    let mut total = 0;

    for &window in windows {
        let key = job_key(window);
        let since = db::get_checkpoint(conn, &key)?.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        // batch writes
        let tx = conn.transaction()?;
        let refreshed = refresh_window(&tx, window, since, now)?;
        db::set_checkpoint(
            &tx,
            &key,
            now,
            &serde_json::json!({ "refreshed": refreshed }),
        )?;
        tx.commit()?;

        if refreshed > 0 {
            info!("Refreshed {} bundles for window {}", refreshed, window);
        }
        total += refreshed;
    }

    Ok(total)
}
