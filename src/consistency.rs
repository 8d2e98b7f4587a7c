use crate::models::RelationAggregate;

const SECS_PER_DAY: f64 = 86_400.0;
/// Interactions per day that count as fully regular
const SATURATION_RATE: f64 = 10.0;

/// Regularity of a corridor's activity cadence in [0, 1]. Descriptive only.
pub fn consistency(
    forward: Option<&RelationAggregate>,
    reverse: Option<&RelationAggregate>,
) -> f64 {
    let scores: Vec<f64> = [forward, reverse]
        .into_iter()
        .flatten()
        .map(relation_score)
        .collect();

    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

fn relation_score(relation: &RelationAggregate) -> f64 {
    let span_secs = (relation.last_seen_at - relation.first_seen_at).num_seconds() as f64;
    let day_span = (span_secs / SECS_PER_DAY).max(1.0);
    let rate = relation.interaction_count as f64 / day_span;
    (rate / SATURATION_RATE).min(1.0)
}
