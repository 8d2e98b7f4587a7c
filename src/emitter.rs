use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::cache::CorridorState;
use crate::error::Result;
use crate::models::{Bundle, Signal, SignalInput, SignalType};
use crate::store::SignalStore;

pub const ENTITY_TYPE_CORRIDOR: &str = "corridor";

/// Build the record for a detected transition. First observations carry no
/// before/after evidence.
pub fn signal_input(
    bundle: &Bundle,
    prev: Option<&CorridorState>,
    signal_type: SignalType,
    now: DateTime<Utc>,
) -> SignalInput {
    let (prev_bundle_type, new_bundle_type, prev_intensity, new_intensity) = match prev {
        Some(p) => (
            Some(p.bundle_type),
            Some(bundle.bundle_type),
            Some(p.intensity_score),
            Some(bundle.intensity_score),
        ),
        None => (None, None, None, None),
    };

    SignalInput {
        entity_type: ENTITY_TYPE_CORRIDOR.to_string(),
        entity_id: bundle.entity_id(),
        signal_type,
        window: bundle.window,
        prev_bundle_type,
        new_bundle_type,
        prev_intensity,
        new_intensity,
        confidence: bundle.confidence,
        related_addresses: vec![bundle.from.clone(), bundle.to.clone()],
        created_at: now,
    }
}

#[derive(Clone)]
pub struct SignalEmitter {
    store: Arc<dyn SignalStore>,
}

impl SignalEmitter {
    pub fn new(store: Arc<dyn SignalStore>) -> Self {
        Self { store }
    }

    pub async fn emit(
        &self,
        bundle: &Bundle,
        prev: Option<&CorridorState>,
        signal_type: SignalType,
        now: DateTime<Utc>,
    ) -> Result<Signal> {
        let signal = self
            .store
            .create(signal_input(bundle, prev, signal_type, now))
            .await?;

        info!(
            "🚨 {} on {} [{}] (confidence {:.2}, id {})",
            signal.signal_type, signal.entity_id, signal.window, signal.confidence, signal.id
        );
        Ok(signal)
    }
}
