use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::domain::{Activity, EmissionFactor};
use super::normalizer::ActivityError;
use super::repository::{EmissionFactorStore, RepositoryError};

/// Which fallback level produced a factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorOrigin {
    ActivityOverride,
    RegionalMatch,
    YearMatch,
    MostRecentYear,
}

/// Factor chosen for an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedFactor {
    pub value: f64,
    pub unit: String,
    pub origin: FactorOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FactorError {
    #[error(transparent)]
    Activity(#[from] ActivityError),
    #[error("emission factor lookup failed: {0}")]
    Store(#[from] RepositoryError),
}

/// Resolves factors for a single calculation run, memoising store lookups.
pub struct FactorResolver<'a, F: ?Sized> {
    store: &'a F,
    region: Option<String>,
    candidates: HashMap<(String, i32), Vec<EmissionFactor>>,
}

impl<'a, F> FactorResolver<'a, F>
where
    F: EmissionFactorStore + ?Sized,
{
    pub fn new(store: &'a F, region: Option<&str>) -> Self {
        Self {
            store,
            region: region.map(str::to_string),
            candidates: HashMap::new(),
        }
    }

    pub fn resolve(&mut self, activity: &Activity) -> Result<ResolvedFactor, FactorError> {
        if let (Some(value), Some(unit)) = (activity.emission_factor, activity.factor_unit.as_ref())
        {
            return Ok(ResolvedFactor {
                value,
                unit: unit.clone(),
                origin: FactorOrigin::ActivityOverride,
                year: None,
                source: None,
            });
        }

        let key = (normalize_key(&activity.activity_type), activity.year);
        if !self.candidates.contains_key(&key) {
            let loaded = self.store.load_emission_factors(
                &activity.activity_type,
                activity.year,
                self.region.as_deref(),
            )?;
            debug!(
                activity_type = %activity.activity_type,
                year = activity.year,
                candidates = loaded.len(),
                "loaded emission factor candidates"
            );
            self.candidates.insert(key.clone(), loaded);
        }

        let candidates = self.candidates.get(&key).map(Vec::as_slice).unwrap_or(&[]);
        select_factor(
            candidates,
            &activity.activity_type,
            activity.year,
            self.region.as_deref(),
        )
        .ok_or_else(|| {
            FactorError::Activity(ActivityError::FactorNotFound {
                activity_id: activity.id.clone(),
                activity_type: activity.activity_type.clone(),
                year: activity.year,
                region: self.region.clone(),
            })
        })
    }
}

/// Applies the fallback ordering to a candidate set.
///
/// 1. exact (type, year, region)
/// 2. (type, year) without a region
/// 3. most recent year before the requested one, regional entry ahead of the global one
///
/// Entries tagged with another region are never used.
pub fn select_factor(
    candidates: &[EmissionFactor],
    activity_type: &str,
    year: i32,
    region: Option<&str>,
) -> Option<ResolvedFactor> {
    let activity_type = normalize_key(activity_type);
    let region = region.map(normalize_key);

    let usable = candidates.iter().filter_map(|factor| {
        if normalize_key(&factor.activity_type) != activity_type
            || factor.year > year
            || !factor.value.is_finite()
            || factor.value < 0.0
        {
            return None;
        }
        let regional = match (factor.region.as_deref(), region.as_deref()) {
            (None, _) => false,
            (Some(candidate), Some(wanted)) if normalize_key(candidate) == wanted => true,
            (Some(_), _) => return None,
        };
        Some((factor, regional))
    });

    let (factor, regional) = usable.min_by(|left, right| rank(*left, *right))?;

    let origin = match (factor.year == year, regional) {
        (true, true) => FactorOrigin::RegionalMatch,
        (true, false) => FactorOrigin::YearMatch,
        (false, _) => FactorOrigin::MostRecentYear,
    };

    Some(ResolvedFactor {
        value: factor.value,
        unit: factor.unit.clone(),
        origin,
        year: Some(factor.year),
        source: factor.source.clone(),
    })
}

fn rank(left: (&EmissionFactor, bool), right: (&EmissionFactor, bool)) -> Ordering {
    let (left, left_regional) = left;
    let (right, right_regional) = right;
    right
        .year
        .cmp(&left.year)
        .then_with(|| right_regional.cmp(&left_regional))
        .then_with(|| left.source.cmp(&right.source))
        .then_with(|| left.value.total_cmp(&right.value))
        .then_with(|| left.unit.cmp(&right.unit))
}

fn normalize_key(value: &str) -> String {
    value.trim().to_lowercase()
}
