//! Bundle classification of an address pair.
//!
//! The pair's archetype is decided by an ordered rule table: rules are tried
//! top to bottom and the first one that returns a result wins. Volumes are
//! compared as exact 256-bit integers.

use alloy::primitives::U256;
use tracing::debug;

use crate::models::{BundleType, RelationAggregate};

pub const MIN_INTERACTIONS: u64 = 3;
pub const WASH_SYMMETRY: f64 = 0.1;
pub const DISTRIBUTION_RATIO: f64 = 0.3;
pub const ACCUMULATION_RATIO: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub bundle_type: BundleType,
    pub confidence: f64,
}

impl Classification {
    fn new(bundle_type: BundleType, confidence: f64) -> Self {
        Self { bundle_type, confidence }
    }
}

/// Everything the rules look at, derived once per pair
#[derive(Debug, Clone)]
pub struct PairFeatures {
    pub any_present: bool,
    pub forward_count: u64,
    pub reverse_count: u64,
    pub total: u64,
    pub forward_ratio: f64,
    pub forward_volume: U256,
    pub reverse_volume: U256,
    pub forward_density: f64,
    pub reverse_density: f64,
}

impl PairFeatures {
    pub fn from_pair(
        forward: Option<&RelationAggregate>,
        reverse: Option<&RelationAggregate>,
    ) -> Self {
        let forward_count = forward.map_or(0, |r| r.interaction_count);
        let reverse_count = reverse.map_or(0, |r| r.interaction_count);
        let total = forward_count.saturating_add(reverse_count);
        let forward_ratio = if total == 0 {
            0.0
        } else {
            forward_count as f64 / total as f64
        };

        Self {
            any_present: forward.is_some() || reverse.is_some(),
            forward_count,
            reverse_count,
            total,
            forward_ratio,
            forward_volume: forward.map_or(U256::ZERO, |r| parse_volume(&r.volume_raw)),
            reverse_volume: reverse.map_or(U256::ZERO, |r| parse_volume(&r.volume_raw)),
            forward_density: forward.map_or(0.0, |r| r.density_score),
            reverse_density: reverse.map_or(0.0, |r| r.density_score),
        }
    }
}

/// Decimal string → U256; anything else counts as zero
pub fn parse_volume(raw: &str) -> U256 {
    let digits = raw.trim();
    // from_str_radix tolerates `_` separators
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return U256::ZERO;
    }
    U256::from_str_radix(digits, 10).unwrap_or(U256::ZERO)
}

/// `1 - |a - b| / max(a, b)` with the ratio truncated to two decimals in the
/// integer domain. `None` when both volumes are zero.
pub fn volume_symmetry(a: U256, b: U256) -> Option<f64> {
    let max_vol = a.max(b);
    if max_vol.is_zero() {
        return None;
    }
    let diff = if a > b { a - b } else { b - a };

    let hundred = U256::from(100u64);
    let scaled = match diff.checked_mul(hundred) {
        Some(d) => d / max_vol,
        // Only reachable near the top of the range; dropping 16 low bits keeps
        // two-decimal accuracy.
        None => ((diff >> 16) * hundred) / (max_vol >> 16),
    };
    // diff <= max_vol, so scaled is at most 100
    let pct = scaled.as_limbs()[0] as f64;
    Some(1.0 - pct / 100.0)
}

pub struct ClassifierRule {
    pub name: &'static str,
    pub apply: fn(&PairFeatures) -> Option<Classification>,
}

fn absent_rule(f: &PairFeatures) -> Option<Classification> {
    (!f.any_present).then(|| Classification::new(BundleType::Unknown, 0.0))
}

fn min_interactions_rule(f: &PairFeatures) -> Option<Classification> {
    (f.total < MIN_INTERACTIONS).then(|| Classification::new(BundleType::Unknown, 0.2))
}

fn wash_rule(f: &PairFeatures) -> Option<Classification> {
    if f.forward_count == 0 || f.reverse_count == 0 {
        return None;
    }
    let symmetry = volume_symmetry(f.forward_volume, f.reverse_volume)?;
    (symmetry > 1.0 - WASH_SYMMETRY)
        .then(|| Classification::new(BundleType::Wash, (0.5 + symmetry * 0.4).min(0.9)))
}

fn accumulation_rule(f: &PairFeatures) -> Option<Classification> {
    (f.forward_ratio < DISTRIBUTION_RATIO).then(|| {
        Classification::new(
            BundleType::Accumulation,
            (0.5 + (1.0 - f.forward_ratio) * 0.4).min(0.9),
        )
    })
}

fn distribution_rule(f: &PairFeatures) -> Option<Classification> {
    (f.forward_ratio > ACCUMULATION_RATIO).then(|| {
        Classification::new(
            BundleType::Distribution,
            (0.5 + f.forward_ratio * 0.4).min(0.9),
        )
    })
}

fn rotation_rule(f: &PairFeatures) -> Option<Classification> {
    let dense = (f.forward_density + f.reverse_density) / 2.0 > 1.0;
    (f.forward_count >= 2 && f.reverse_count >= 2 && dense)
        .then(|| Classification::new(BundleType::Rotation, 0.6))
}

fn flow_rule(f: &PairFeatures) -> Option<Classification> {
    let balance = 1.0 - (f.forward_ratio - 0.5).abs() * 2.0;
    Some(Classification::new(
        BundleType::Flow,
        (0.5 + balance * 0.35).min(0.85),
    ))
}

/// Evaluation order matters: wash is checked before the ratio rules, and flow
/// always matches.
pub const CLASSIFIER_RULES: &[ClassifierRule] = &[
    ClassifierRule { name: "absent", apply: absent_rule },
    ClassifierRule { name: "min_interactions", apply: min_interactions_rule },
    ClassifierRule { name: "wash", apply: wash_rule },
    ClassifierRule { name: "accumulation", apply: accumulation_rule },
    ClassifierRule { name: "distribution", apply: distribution_rule },
    ClassifierRule { name: "rotation", apply: rotation_rule },
    ClassifierRule { name: "flow", apply: flow_rule },
];

/// Classify the corridor `forward.from → forward.to` given both directions
pub fn classify(
    forward: Option<&RelationAggregate>,
    reverse: Option<&RelationAggregate>,
) -> Classification {
    let features = PairFeatures::from_pair(forward, reverse);
    CLASSIFIER_RULES
        .iter()
        .find_map(|rule| {
            let hit = (rule.apply)(&features)?;
            debug!("classifier rule {} matched: {:?}", rule.name, hit);
            Some(hit)
        })
        .unwrap_or(Classification::new(BundleType::Unknown, 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Window;
    use chrono::{TimeZone, Utc};

    fn relation(count: u64, volume: &str, density: f64) -> RelationAggregate {
        RelationAggregate {
            from: "0xaaa".to_string(),
            to: "0xbbb".to_string(),
            window: Window::Week,
            interaction_count: count,
            volume_raw: volume.to_string(),
            density_score: density,
            first_seen_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            last_seen_at: Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap(),
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_both_absent_is_unknown_zero() {
        let c = classify(None, None);
        assert_eq!(c.bundle_type, BundleType::Unknown);
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn test_min_interaction_gate() {
        let f = relation(1, "500", 0.1);
        let r = relation(1, "500", 0.1);
        let c = classify(Some(&f), Some(&r));
        assert_eq!(c.bundle_type, BundleType::Unknown);
        assert_eq!(c.confidence, 0.2);

        let only = relation(2, "10", 3.0);
        let c = classify(Some(&only), None);
        assert_eq!(c, Classification::new(BundleType::Unknown, 0.2));
    }

    #[test]
    fn test_wash_scenario() {
        let f = relation(10, "1000000", 0.5);
        let r = relation(8, "950000", 0.5);
        let c = classify(Some(&f), Some(&r));
        assert_eq!(c.bundle_type, BundleType::Wash);
        assert!(approx(c.confidence, 0.88), "confidence = {}", c.confidence);
    }

    #[test]
    fn test_wash_beats_lopsided_ratio() {
        // ratio 0.1 would be accumulation, but volumes are symmetric
        let f = relation(1, "1000", 0.2);
        let r = relation(9, "990", 0.2);
        let c = classify(Some(&f), Some(&r));
        assert_eq!(c.bundle_type, BundleType::Wash);
    }

    #[test]
    fn test_wash_threshold_is_strict() {
        // 10% difference -> symmetry exactly 0.9, not wash
        let f = relation(5, "1000", 0.2);
        let r = relation(5, "900", 0.2);
        assert_ne!(classify(Some(&f), Some(&r)).bundle_type, BundleType::Wash);
    }

    #[test]
    fn test_accumulation_scenario() {
        let f = relation(1, "0", 0.2);
        let r = relation(9, "0", 0.2);
        let c = classify(Some(&f), Some(&r));
        assert_eq!(c.bundle_type, BundleType::Accumulation);
        assert!(approx(c.confidence, 0.86), "confidence = {}", c.confidence);
    }

    #[test]
    fn test_distribution_with_forward_only() {
        let f = relation(12, "77", 0.4);
        let c = classify(Some(&f), None);
        assert_eq!(c.bundle_type, BundleType::Distribution);
        assert!(approx(c.confidence, 0.9));
    }

    #[test]
    fn test_ratio_boundaries_are_strict() {
        let below = classify(Some(&relation(29, "0", 0.1)), Some(&relation(71, "0", 0.1)));
        assert_eq!(below.bundle_type, BundleType::Accumulation);

        let at = classify(Some(&relation(3, "0", 0.1)), Some(&relation(7, "0", 0.1)));
        assert_eq!(at.bundle_type, BundleType::Flow);

        let at_upper = classify(Some(&relation(7, "0", 0.1)), Some(&relation(3, "0", 0.1)));
        assert_eq!(at_upper.bundle_type, BundleType::Flow);
    }

    #[test]
    fn test_rotation_needs_density() {
        let dense = classify(Some(&relation(5, "0", 1.5)), Some(&relation(5, "0", 1.0)));
        assert_eq!(dense, Classification::new(BundleType::Rotation, 0.6));

        let sparse = classify(Some(&relation(5, "0", 1.0)), Some(&relation(5, "0", 1.0)));
        assert_eq!(sparse.bundle_type, BundleType::Flow);
        assert!(approx(sparse.confidence, 0.85));
    }

    #[test]
    fn test_malformed_volume_degrades_to_zero() {
        assert_eq!(parse_volume("12abc"), U256::ZERO);
        assert_eq!(parse_volume("1.5e18"), U256::ZERO);
        assert_eq!(parse_volume("1_000"), U256::ZERO);
        assert_eq!(parse_volume("-5"), U256::ZERO);
        assert_eq!(parse_volume(" 42 "), U256::from(42u64));
        let c = classify(Some(&relation(4, "garbage", 0.1)), Some(&relation(4, "", 0.1)));
        assert_eq!(c.bundle_type, BundleType::Flow);
    }

    #[test]
    fn test_separated_volume_is_not_a_wash() {
        // the forward side degrades to zero, leaving a mostly inbound corridor
        let c = classify(
            Some(&relation(1, "1_000_000", 0.1)),
            Some(&relation(9, "950000", 0.1)),
        );
        assert_eq!(c.bundle_type, BundleType::Accumulation);
    }

    #[test]
    fn test_symmetry_exact_beyond_f64_range() {
        // 2^200-scale amounts differing in the low digits are perfectly symmetric
        let big = "1606938044258990275541962092341162602522202993782792835301376";
        let bigger = "1606938044258990275541962092341162602522202993782792835301377";
        assert_eq!(volume_symmetry(parse_volume(big), parse_volume(bigger)), Some(1.0));

        let max = U256::MAX;
        let half = U256::MAX >> 1;
        let s = volume_symmetry(max, half).unwrap();
        assert!(approx(s, 0.5), "symmetry = {s}");
        assert_eq!(volume_symmetry(U256::ZERO, U256::ZERO), None);
    }

    #[test]
    fn test_confidence_in_unit_range() {
        let counts = [0u64, 1, 2, 3, 5, 9, 50];
        let volumes = ["0", "1", "999", "1000", "bad"];
        for &fc in &counts {
            for &rc in &counts {
                for fv in volumes {
                    let f = relation(fc, fv, 2.0);
                    let r = relation(rc, "1000", 2.0);
                    let first = classify(Some(&f), Some(&r));
                    let second = classify(Some(&f), Some(&r));
                    assert_eq!(first, second);
                    assert!((0.0..=1.0).contains(&first.confidence));
                }
            }
        }
    }
}
