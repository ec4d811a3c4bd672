use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::warn;

use super::aggregation::{aggregate, Contribution};
use super::domain::{
    Activity, ActivityId, CalculationResult, CalculationWarning, ProjectMeta,
};
use super::factors::{FactorError, FactorResolver};
use super::normalizer::{normalize, ActivityError};
use super::options::{CalculationOptions, EngineConfig};
use super::quality::quality_weight;
use super::repository::{EmissionFactorStore, RepositoryError};
use super::units::FactorUnit;

/// Hard fault raised while evaluating activities; aborts the whole run.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("emission factor store failed: {0}")]
    Store(#[from] RepositoryError),
    #[error("activity {activity_id} produced a non-finite emissions value")]
    NonFinite { activity_id: ActivityId },
}

/// Outcome of pushing one activity through the normaliser and resolver.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Evaluation {
    Emission(Contribution),
    Offset { tonnes_co2e: f64 },
    Skipped,
    Excluded(CalculationWarning),
}

#[derive(Debug, Clone, PartialEq)]
struct LedgerEntry {
    input: Activity,
    duplicated: bool,
    evaluation: Evaluation,
}

/// Per-activity evaluations for one project, keyed and ordered by activity id.
///
/// Results are always reduced from the ledger, so a ledger that was refreshed
/// for a single activity reduces to the same figures as one evaluated from scratch.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityLedger {
    project: ProjectMeta,
    options: CalculationOptions,
    entries: BTreeMap<ActivityId, LedgerEntry>,
}

impl ActivityLedger {
    /// Evaluates every activity of the project.
    pub fn evaluate<F>(
        project: &ProjectMeta,
        activities: Vec<Activity>,
        options: &CalculationOptions,
        factors: &F,
    ) -> Result<Self, LedgerError>
    where
        F: EmissionFactorStore + ?Sized,
    {
        let mut resolver =
            FactorResolver::new(factors, options.effective_region(project.region.as_deref()));
        let counts = id_counts(&activities);
        let mut entries = BTreeMap::new();

        for activity in activities {
            if entries.contains_key(&activity.id) {
                continue;
            }
            let duplicated = counts.get(&activity.id).copied().unwrap_or_default() > 1;
            let evaluation = if duplicated {
                excluded(ActivityError::invalid(
                    &activity,
                    "duplicate activity identifier",
                ))
            } else {
                evaluate_activity(&activity, project, options, &mut resolver)?
            };
            entries.insert(
                activity.id.clone(),
                LedgerEntry {
                    input: activity,
                    duplicated,
                    evaluation,
                },
            );
        }

        Ok(Self {
            project: project.clone(),
            options: options.clone(),
            entries,
        })
    }

    /// Brings the ledger up to date with the current activity set.
    ///
    /// `target` is always re-evaluated, as is every activity whose input differs from
    /// the cached one. Activities that take their factor from the store are resolved
    /// again as well, so factors appended since the last run are picked up; lookups
    /// are memoised per activity type and year. Activities missing from `activities`
    /// are dropped. Returns the refreshed ledger and the number of activities evaluated.
    pub fn refresh<F>(
        &self,
        project: &ProjectMeta,
        activities: Vec<Activity>,
        target: &ActivityId,
        factors: &F,
    ) -> Result<(Self, usize), LedgerError>
    where
        F: EmissionFactorStore + ?Sized,
    {
        let counts = id_counts(&activities);
        let has_duplicates = counts.values().any(|count| *count > 1)
            || self.entries.values().any(|entry| entry.duplicated);
        if has_duplicates || &self.project != project {
            let evaluated = activities.len();
            let ledger = Self::evaluate(project, activities, &self.options, factors)?;
            return Ok((ledger, evaluated));
        }

        let mut resolver = FactorResolver::new(
            factors,
            self.options.effective_region(project.region.as_deref()),
        );
        let mut entries = BTreeMap::new();
        let mut evaluated = 0;

        for activity in activities {
            let cached = self
                .entries
                .get(&activity.id)
                .filter(|entry| {
                    &activity.id != target
                        && entry.input == activity
                        && !depends_on_factor_table(entry)
                })
                .map(|entry| entry.evaluation.clone());

            let evaluation = match cached {
                Some(evaluation) => evaluation,
                None => {
                    evaluated += 1;
                    evaluate_activity(&activity, project, &self.options, &mut resolver)?
                }
            };

            entries.insert(
                activity.id.clone(),
                LedgerEntry {
                    input: activity,
                    duplicated: false,
                    evaluation,
                },
            );
        }

        let ledger = Self {
            project: project.clone(),
            options: self.options.clone(),
            entries,
        };
        Ok((ledger, evaluated))
    }

    pub fn options(&self) -> &CalculationOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reduces the ledger into a result envelope.
    pub fn summarize(
        &self,
        config: &EngineConfig,
        calculated_at: DateTime<Utc>,
    ) -> CalculationResult {
        let contributions = self
            .entries
            .values()
            .filter_map(|entry| match &entry.evaluation {
                Evaluation::Emission(contribution) => Some(contribution),
                _ => None,
            });
        let aggregate = aggregate(contributions, config);

        let offsets: f64 = if self.options.include_offsets {
            self.entries
                .values()
                .filter_map(|entry| match entry.evaluation {
                    Evaluation::Offset { tonnes_co2e } => Some(tonnes_co2e),
                    _ => None,
                })
                .fold(0.0, |total, tonnes| total + tonnes)
        } else {
            0.0
        };

        let warnings = self
            .entries
            .values()
            .filter_map(|entry| match &entry.evaluation {
                Evaluation::Excluded(warning) => Some(warning.clone()),
                _ => None,
            })
            .collect();

        CalculationResult {
            project_id: self.project.id.clone(),
            total_emissions: aggregate.total_emissions,
            scope_totals: aggregate.scope_totals,
            scope3_breakdown: aggregate.scope3_breakdown,
            by_year: aggregate.by_year,
            hot_spots: aggregate.hot_spots,
            data_quality_score: aggregate.data_quality_score,
            offsets,
            net_emissions: aggregate.total_emissions - offsets,
            contributing_activities: aggregate.contributing_activities,
            warnings,
            options: self.options.clone(),
            calculated_at,
        }
    }
}

/// Whether the cached evaluation came from a factor lookup that may have changed.
fn depends_on_factor_table(entry: &LedgerEntry) -> bool {
    let carries_own_factor =
        entry.input.emission_factor.is_some() && entry.input.factor_unit.is_some();
    !carries_own_factor && !matches!(entry.evaluation, Evaluation::Skipped)
}

fn id_counts(activities: &[Activity]) -> HashMap<ActivityId, usize> {
    let mut counts = HashMap::new();
    for activity in activities {
        *counts.entry(activity.id.clone()).or_insert(0) += 1;
    }
    counts
}

fn excluded(error: ActivityError) -> Evaluation {
    warn!(
        activity_id = %error.activity_id(),
        kind = ?error.kind(),
        "activity excluded from totals: {error}"
    );
    Evaluation::Excluded(CalculationWarning {
        activity_id: error.activity_id().clone(),
        kind: error.kind(),
        message: error.to_string(),
    })
}

fn evaluate_activity<F>(
    activity: &Activity,
    project: &ProjectMeta,
    options: &CalculationOptions,
    resolver: &mut FactorResolver<'_, F>,
) -> Result<Evaluation, LedgerError>
where
    F: EmissionFactorStore + ?Sized,
{
    if activity.offset && !options.include_offsets {
        return Ok(Evaluation::Skipped);
    }

    let normalized = match normalize(activity, project) {
        Ok(normalized) => normalized,
        Err(error) => return Ok(excluded(error)),
    };

    let factor = match resolver.resolve(activity) {
        Ok(factor) => factor,
        Err(FactorError::Activity(error)) => return Ok(excluded(error)),
        Err(FactorError::Store(error)) => return Err(LedgerError::Store(error)),
    };

    let Some(factor_unit) = FactorUnit::parse(&factor.unit) else {
        return Ok(excluded(ActivityError::UnitConversion {
            activity_id: activity.id.clone(),
            unit: factor.unit.clone(),
            detail: "unrecognised emission factor unit".to_string(),
        }));
    };

    if factor_unit.denominator.dimension != normalized.quantity.dimension {
        return Ok(excluded(ActivityError::UnitConversion {
            activity_id: activity.id.clone(),
            unit: activity.unit.clone(),
            detail: format!(
                "factor '{}' expects {}, activity is measured in {}",
                factor.unit, factor_unit.denominator.dimension, normalized.quantity.dimension
            ),
        }));
    }

    let tonnes_co2e = normalized.quantity.value * factor_unit.tonnes_per_base_unit(factor.value);
    if !tonnes_co2e.is_finite() {
        return Err(LedgerError::NonFinite {
            activity_id: activity.id.clone(),
        });
    }

    if activity.offset {
        return Ok(Evaluation::Offset { tonnes_co2e });
    }

    Ok(Evaluation::Emission(Contribution {
        activity_id: activity.id.clone(),
        scope: normalized.scope,
        category: normalized.category,
        year: activity.year,
        tonnes_co2e,
        quality_weight: quality_weight(activity.tier, activity.data_quality),
    }))
}
