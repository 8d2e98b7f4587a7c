use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::{Bundle, BundleType};

/// Last observed state of one corridor+window
#[derive(Debug, Clone, PartialEq)]
pub struct CorridorState {
    pub bundle_type: BundleType,
    pub intensity_score: f64,
    pub confidence: f64,
    pub last_checked: DateTime<Utc>,
}

impl CorridorState {
    pub fn observed(bundle: &Bundle, at: DateTime<Utc>) -> Self {
        Self {
            bundle_type: bundle.bundle_type,
            intensity_score: bundle.intensity_score,
            confidence: bundle.confidence,
            last_checked: at,
        }
    }
}

/// Process-local memory of the transition state machine, keyed by
/// `"{from}:{to}:{window}"`. A missing key means the corridor has not been
/// processed since this cache was created, which is not the same as `unknown`.
///
/// Owned by exactly one orchestrator; two processes each holding a cache will
/// disagree about "previous state".
#[derive(Debug, Default)]
pub struct CorridorStateCache {
    entries: HashMap<String, CorridorState>,
}

impl CorridorStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&CorridorState> {
        self.entries.get(key)
    }

    /// Record `bundle` as the latest state and hand back what was there before
    pub fn observe(&mut self, bundle: &Bundle, at: DateTime<Utc>) -> Option<CorridorState> {
        self.entries
            .insert(bundle.corridor_key(), CorridorState::observed(bundle, at))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NetflowDirection, Window};

    fn bundle(bundle_type: BundleType, intensity: f64) -> Bundle {
        let now = Utc::now();
        Bundle {
            from: "0x1".into(),
            to: "0x2".into(),
            window: Window::Day,
            bundle_type,
            confidence: 0.7,
            interaction_count: 5,
            density_score: 0.3,
            netflow_raw: "0".into(),
            netflow_direction: NetflowDirection::Balanced,
            intensity_score: intensity,
            consistency_score: 0.1,
            first_seen_at: now,
            last_seen_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_observe_returns_previous_state() {
        let mut cache = CorridorStateCache::new();
        let t0 = Utc::now();

        assert!(cache.observe(&bundle(BundleType::Flow, 1.0), t0).is_none());
        let prev = cache.observe(&bundle(BundleType::Wash, 2.0), t0).unwrap();
        assert_eq!(prev.bundle_type, BundleType::Flow);
        assert_eq!(prev.intensity_score, 1.0);

        let current = cache.get("0x1:0x2:1d").unwrap();
        assert_eq!(current.bundle_type, BundleType::Wash);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_windows_are_separate_keys() {
        let mut cache = CorridorStateCache::new();
        let mut weekly = bundle(BundleType::Flow, 1.0);
        weekly.window = Window::Week;

        cache.observe(&bundle(BundleType::Flow, 1.0), Utc::now());
        assert!(cache.observe(&weekly, Utc::now()).is_none());
        assert_eq!(cache.len(), 2);
    }
}
