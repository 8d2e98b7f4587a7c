//! Transition detection between processing cycles.
//!
//! Once a corridor has previous state, the rules below are tried in order and
//! the first match decides the signal: wash changes, then intensity deltas,
//! then type changes. A matched transition is still dropped when the new
//! classification is below `MIN_CONFIDENCE`.

use tracing::debug;

use crate::cache::CorridorState;
use crate::models::{Bundle, BundleType, SignalType};

pub const MIN_CONFIDENCE: f64 = 0.5;
pub const NEW_CORRIDOR_MIN_INTENSITY: f64 = 0.5;
pub const INTENSITY_SPIKE_THRESHOLD: f64 = 0.5;
pub const INTENSITY_DROP_THRESHOLD: f64 = 0.3;

pub struct TransitionRule {
    pub name: &'static str,
    pub apply: fn(&CorridorState, &Bundle) -> Option<SignalType>,
}

fn wash_rule(prev: &CorridorState, curr: &Bundle) -> Option<SignalType> {
    match (prev.bundle_type, curr.bundle_type) {
        (p, BundleType::Wash) if p != BundleType::Wash => Some(SignalType::WashDetected),
        (BundleType::Wash, n) if n != BundleType::Wash => Some(SignalType::WashCleared),
        _ => None,
    }
}

fn intensity_rule(prev: &CorridorState, curr: &Bundle) -> Option<SignalType> {
    if prev.intensity_score <= 0.0 {
        return None;
    }
    let delta = (curr.intensity_score - prev.intensity_score) / prev.intensity_score;
    if delta >= INTENSITY_SPIKE_THRESHOLD {
        Some(SignalType::IntensitySpike)
    } else if delta <= -INTENSITY_DROP_THRESHOLD {
        Some(SignalType::IntensityDrop)
    } else {
        None
    }
}

fn type_change_rule(prev: &CorridorState, curr: &Bundle) -> Option<SignalType> {
    let (old, new) = (prev.bundle_type, curr.bundle_type);
    if old == new {
        return None;
    }
    let signal = if new == BundleType::Accumulation {
        SignalType::AccumulationStart
    } else if new == BundleType::Distribution {
        SignalType::DistributionStart
    } else if old == BundleType::Accumulation {
        SignalType::AccumulationEnd
    } else if old == BundleType::Distribution {
        SignalType::DistributionEnd
    } else if new == BundleType::Rotation || old == BundleType::Rotation {
        SignalType::RotationShift
    } else {
        SignalType::BundleChange
    };
    Some(signal)
}

pub const TRANSITION_RULES: &[TransitionRule] = &[
    TransitionRule { name: "wash", apply: wash_rule },
    TransitionRule { name: "intensity", apply: intensity_rule },
    TransitionRule { name: "type_change", apply: type_change_rule },
];

#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionDetector;

impl TransitionDetector {
    pub fn new() -> Self {
        Self
    }

    /// Decide which signal, if any, `curr` warrants given the cached state
    pub fn detect(&self, prev: Option<&CorridorState>, curr: &Bundle) -> Option<SignalType> {
        let Some(prev) = prev else {
            let worthy = curr.confidence >= MIN_CONFIDENCE
                && curr.intensity_score > NEW_CORRIDOR_MIN_INTENSITY;
            return worthy.then_some(SignalType::NewCorridor);
        };

        let signal = TRANSITION_RULES.iter().find_map(|rule| {
            let signal = (rule.apply)(prev, curr)?;
            debug!("{}: {} rule gave {}", curr.corridor_key(), rule.name, signal);
            Some(signal)
        })?;

        (curr.confidence >= MIN_CONFIDENCE).then_some(signal)
    }
}
