use super::domain::CalculationTier;

/// Quality weight for an activity: the explicit sub-score when present, else the tier default.
pub fn quality_weight(tier: CalculationTier, explicit: Option<u8>) -> f64 {
    match explicit {
        Some(score) => f64::from(score.min(100)),
        None => match tier {
            CalculationTier::Tier1 => 40.0,
            CalculationTier::Tier2 => 70.0,
            CalculationTier::Tier3 => 100.0,
        },
    }
}

/// Tonnes-weighted mean of per-activity weights, clamped to 0-100.
///
/// Zero total emissions score 0.
pub fn aggregate_score<I>(weighted: I) -> f64
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let (tonnes, weighted_sum) = weighted
        .into_iter()
        .fold((0.0_f64, 0.0_f64), |(tonnes, sum), (activity_tonnes, weight)| {
            (tonnes + activity_tonnes, sum + activity_tonnes * weight)
        });

    if tonnes <= 0.0 || !tonnes.is_finite() {
        return 0.0;
    }

    (weighted_sum / tonnes).clamp(0.0, 100.0)
}
