use serde::{Deserialize, Serialize};

use super::domain::HotSpotBasis;

/// Per-call switches accepted by the calculation entry points.
///
/// Unknown keys are rejected during deserialization so callers cannot pass
/// options the engine silently ignores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalculationOptions {
    #[serde(default)]
    pub include_offsets: bool,
    #[serde(default)]
    pub region_override: Option<String>,
}

impl CalculationOptions {
    /// Region used for factor lookups: the override when present, else the project's region.
    pub fn effective_region<'a>(&'a self, project_region: Option<&'a str>) -> Option<&'a str> {
        self.region_override
            .as_deref()
            .filter(|region| !region.trim().is_empty())
            .or(project_region)
    }
}

/// Engine-wide settings shared by every calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub hot_spot_limit: usize,
    pub hot_spot_basis: HotSpotBasis,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hot_spot_limit: 5,
            hot_spot_basis: HotSpotBasis::Activity,
        }
    }
}
