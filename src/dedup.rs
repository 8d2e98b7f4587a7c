use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{SignalType, Window};
use crate::store::SignalStore;

/// Minimum minutes between two signals of the same type for one corridor+window.
/// Structural, low-frequency transitions cool down for a day; intensity moves
/// for six hours.
///
/// Every signal type has an entry. A name outside the enum fails to parse
/// before it reaches the gate, so the 60 minute fallback for unlisted types
/// has no arm here.
pub fn cooldown_minutes(signal_type: SignalType) -> i64 {
    match signal_type {
        SignalType::NewCorridor => 1440,
        SignalType::AccumulationStart => 720,
        SignalType::AccumulationEnd => 720,
        SignalType::DistributionStart => 720,
        SignalType::DistributionEnd => 720,
        SignalType::BundleChange => 720,
        SignalType::IntensitySpike => 360,
        SignalType::IntensityDrop => 360,
        SignalType::WashDetected => 1440,
        SignalType::WashCleared => 1440,
        SignalType::RotationShift => 720,
        SignalType::CorridorDormant => 1440,
    }
}

/// Suppresses a signal when the store already holds one with the same
/// (entity, type, window) inside the type's cooldown.
#[derive(Clone)]
pub struct DedupGate {
    store: Arc<dyn SignalStore>,
}

impl DedupGate {
    pub fn new(store: Arc<dyn SignalStore>) -> Self {
        Self { store }
    }

    pub async fn is_duplicate(
        &self,
        entity_id: &str,
        signal_type: SignalType,
        window: Window,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.store
            .exists_recent(
                entity_id,
                signal_type,
                window,
                cooldown_minutes(signal_type),
                now,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_table() {
        assert_eq!(cooldown_minutes(SignalType::NewCorridor), 1440);
        assert_eq!(cooldown_minutes(SignalType::DistributionEnd), 720);
        assert_eq!(cooldown_minutes(SignalType::IntensitySpike), 360);
        assert_eq!(cooldown_minutes(SignalType::IntensityDrop), 360);
        assert_eq!(cooldown_minutes(SignalType::WashCleared), 1440);
        assert_eq!(cooldown_minutes(SignalType::CorridorDormant), 1440);
    }

    #[test]
    fn test_unlisted_names_never_reach_the_table() {
        assert!("price_breakout".parse::<SignalType>().is_err());
        assert_eq!(cooldown_minutes("rotation_shift".parse().unwrap()), 720);
    }
}
