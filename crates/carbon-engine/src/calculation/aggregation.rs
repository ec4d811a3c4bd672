use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{
    ActivityId, HotSpot, HotSpotBasis, Scope, Scope3Category, ScopeTotals,
};
use super::options::EngineConfig;
use super::quality::aggregate_score;

/// Emissions attributed to one activity after normalisation and factor resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub activity_id: ActivityId,
    pub scope: Scope,
    pub category: Option<Scope3Category>,
    pub year: i32,
    pub tonnes_co2e: f64,
    pub quality_weight: f64,
}

impl Contribution {
    fn bucket(&self) -> String {
        match self.category {
            Some(category) => format!("{}/{}", self.scope.as_str(), category.as_str()),
            None => self.scope.as_str().to_string(),
        }
    }
}

/// Reduced figures for a set of contributions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    pub total_emissions: f64,
    pub scope_totals: ScopeTotals,
    pub scope3_breakdown: BTreeMap<Scope3Category, f64>,
    pub by_year: BTreeMap<i32, f64>,
    pub hot_spots: Vec<HotSpot>,
    pub data_quality_score: f64,
    pub contributing_activities: usize,
}

/// Reduces contributions into subtotals, hot spots and the data-quality score.
///
/// Contributions are visited in ascending activity-id order, so the output does
/// not depend on the order of the input.
pub fn aggregate<'a, I>(contributions: I, config: &EngineConfig) -> Aggregate
where
    I: IntoIterator<Item = &'a Contribution>,
{
    let mut ordered: Vec<&Contribution> = contributions.into_iter().collect();
    ordered.sort_by(|left, right| left.activity_id.cmp(&right.activity_id));

    let mut scope1 = 0.0;
    let mut scope2 = 0.0;
    let mut scope3_breakdown: BTreeMap<Scope3Category, f64> = BTreeMap::new();
    let mut by_year: BTreeMap<i32, f64> = BTreeMap::new();

    for contribution in &ordered {
        match (contribution.scope, contribution.category) {
            (Scope::Scope1, _) => scope1 += contribution.tonnes_co2e,
            (Scope::Scope2, _) => scope2 += contribution.tonnes_co2e,
            (Scope::Scope3, Some(category)) => {
                *scope3_breakdown.entry(category).or_insert(0.0) += contribution.tonnes_co2e;
            }
            // The normaliser never lets a scope3 contribution through without a category.
            (Scope::Scope3, None) => continue,
        }
        *by_year.entry(contribution.year).or_insert(0.0) += contribution.tonnes_co2e;
    }

    let scope_totals = ScopeTotals {
        scope1,
        scope2,
        scope3: scope3_breakdown.values().fold(0.0, |total, tonnes| total + tonnes),
    };
    let total_emissions = scope_totals.sum();

    let hot_spots = rank_hot_spots(&ordered, total_emissions, config);
    let data_quality_score = aggregate_score(
        ordered
            .iter()
            .map(|contribution| (contribution.tonnes_co2e, contribution.quality_weight)),
    );

    Aggregate {
        total_emissions,
        scope_totals,
        scope3_breakdown,
        by_year,
        hot_spots,
        data_quality_score,
        contributing_activities: ordered.len(),
    }
}

/// Share of the grand total, defined as 0 when the total is 0.
pub fn percentage_of(tonnes: f64, total: f64) -> f64 {
    if total > 0.0 {
        tonnes / total * 100.0
    } else {
        0.0
    }
}

fn rank_hot_spots(ordered: &[&Contribution], total: f64, config: &EngineConfig) -> Vec<HotSpot> {
    let mut hot_spots: Vec<HotSpot> = match config.hot_spot_basis {
        HotSpotBasis::Activity => ordered
            .iter()
            .map(|contribution| HotSpot {
                basis: HotSpotBasis::Activity,
                identifier: contribution.activity_id.0.clone(),
                scope: contribution.scope,
                category: contribution.category,
                tonnes_co2e: contribution.tonnes_co2e,
                percentage: percentage_of(contribution.tonnes_co2e, total),
            })
            .collect(),
        HotSpotBasis::Category => {
            let mut buckets: BTreeMap<String, (Scope, Option<Scope3Category>, f64)> =
                BTreeMap::new();
            for contribution in ordered {
                let entry = buckets.entry(contribution.bucket()).or_insert((
                    contribution.scope,
                    contribution.category,
                    0.0,
                ));
                entry.2 += contribution.tonnes_co2e;
            }
            buckets
                .into_iter()
                .map(|(identifier, (scope, category, tonnes))| HotSpot {
                    basis: HotSpotBasis::Category,
                    identifier,
                    scope,
                    category,
                    tonnes_co2e: tonnes,
                    percentage: percentage_of(tonnes, total),
                })
                .collect()
        }
    };

    hot_spots.retain(|hot_spot| hot_spot.tonnes_co2e > 0.0);
    hot_spots.sort_by(|left, right| {
        right
            .tonnes_co2e
            .total_cmp(&left.tonnes_co2e)
            .then_with(|| left.identifier.cmp(&right.identifier))
    });
    hot_spots.truncate(config.hot_spot_limit);
    hot_spots
}
