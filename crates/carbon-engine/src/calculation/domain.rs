use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::options::CalculationOptions;

/// Identifier wrapper for carbon accounting projects.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub String);

/// Identifier wrapper for recorded activities.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActivityId(pub String);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// GHG Protocol accounting scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Scope1,
    Scope2,
    Scope3,
}

impl Scope {
    pub const fn ordered() -> [Self; 3] {
        [Self::Scope1, Self::Scope2, Self::Scope3]
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scope1 => "scope1",
            Self::Scope2 => "scope2",
            Self::Scope3 => "scope3",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Scope1 => "Scope 1 (direct)",
            Self::Scope2 => "Scope 2 (purchased energy)",
            Self::Scope3 => "Scope 3 (value chain)",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace([' ', '_', '-'], "").as_str() {
            "scope1" | "1" => Some(Self::Scope1),
            "scope2" | "2" => Some(Self::Scope2),
            "scope3" | "3" => Some(Self::Scope3),
            _ => None,
        }
    }
}

/// The fifteen Scope 3 categories of the GHG Protocol value-chain standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope3Category {
    PurchasedGoods,
    CapitalGoods,
    FuelAndEnergy,
    UpstreamTransport,
    Waste,
    BusinessTravel,
    EmployeeCommuting,
    UpstreamLeasedAssets,
    DownstreamTransport,
    ProcessingOfSoldProducts,
    UseOfSoldProducts,
    EndOfLifeTreatment,
    DownstreamLeasedAssets,
    Franchises,
    Investments,
}

impl Scope3Category {
    pub const fn ordered() -> [Self; 15] {
        [
            Self::PurchasedGoods,
            Self::CapitalGoods,
            Self::FuelAndEnergy,
            Self::UpstreamTransport,
            Self::Waste,
            Self::BusinessTravel,
            Self::EmployeeCommuting,
            Self::UpstreamLeasedAssets,
            Self::DownstreamTransport,
            Self::ProcessingOfSoldProducts,
            Self::UseOfSoldProducts,
            Self::EndOfLifeTreatment,
            Self::DownstreamLeasedAssets,
            Self::Franchises,
            Self::Investments,
        ]
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PurchasedGoods => "purchased_goods",
            Self::CapitalGoods => "capital_goods",
            Self::FuelAndEnergy => "fuel_and_energy",
            Self::UpstreamTransport => "upstream_transport",
            Self::Waste => "waste",
            Self::BusinessTravel => "business_travel",
            Self::EmployeeCommuting => "employee_commuting",
            Self::UpstreamLeasedAssets => "upstream_leased_assets",
            Self::DownstreamTransport => "downstream_transport",
            Self::ProcessingOfSoldProducts => "processing_of_sold_products",
            Self::UseOfSoldProducts => "use_of_sold_products",
            Self::EndOfLifeTreatment => "end_of_life_treatment",
            Self::DownstreamLeasedAssets => "downstream_leased_assets",
            Self::Franchises => "franchises",
            Self::Investments => "investments",
        }
    }

    /// Category number as printed in the GHG Protocol tables (1-15).
    pub fn number(self) -> u8 {
        Self::ordered()
            .iter()
            .position(|category| *category == self)
            .map(|index| index as u8 + 1)
            .unwrap_or_default()
    }

    pub fn parse(value: &str) -> Option<Self> {
        let key = value.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Self::ordered()
            .into_iter()
            .find(|category| category.as_str() == key)
    }
}

/// Confidence of the calculation method, from estimated (tier1) to directly measured (tier3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationTier {
    Tier1,
    Tier2,
    Tier3,
}

impl CalculationTier {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace([' ', '_', '-'], "").as_str() {
            "tier1" | "1" => Some(Self::Tier1),
            "tier2" | "2" => Some(Self::Tier2),
            "tier3" | "3" => Some(Self::Tier3),
            _ => None,
        }
    }
}

/// An emitting event recorded against a project. The engine only ever reads these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub project_id: ProjectId,
    pub scope: Scope,
    #[serde(default, alias = "scope3_category")]
    pub category: Option<Scope3Category>,
    pub activity_type: String,
    pub quantity: f64,
    pub unit: String,
    #[serde(default)]
    pub emission_factor: Option<f64>,
    #[serde(default)]
    pub factor_unit: Option<String>,
    pub tier: CalculationTier,
    pub year: i32,
    #[serde(default)]
    pub facility: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub data_quality: Option<u8>,
    #[serde(default)]
    pub offset: bool,
}

/// Project metadata needed to validate activities and pick regional factors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMeta {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    pub baseline_year: i32,
    pub reporting_year: i32,
}

impl ProjectMeta {
    pub fn covers_year(&self, year: i32) -> bool {
        let (start, end) = if self.baseline_year <= self.reporting_year {
            (self.baseline_year, self.reporting_year)
        } else {
            (self.reporting_year, self.baseline_year)
        };
        (start..=end).contains(&year)
    }
}

/// Reference table entry mapping an activity type, year and region to a factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionFactor {
    pub activity_type: String,
    pub year: i32,
    #[serde(default)]
    pub region: Option<String>,
    pub value: f64,
    pub unit: String,
    #[serde(default)]
    pub source: Option<String>,
}

/// Subtotals for the three accounting scopes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeTotals {
    pub scope1: f64,
    pub scope2: f64,
    pub scope3: f64,
}

impl ScopeTotals {
    pub fn get(&self, scope: Scope) -> f64 {
        match scope {
            Scope::Scope1 => self.scope1,
            Scope::Scope2 => self.scope2,
            Scope::Scope3 => self.scope3,
        }
    }

    pub fn sum(&self) -> f64 {
        self.scope1 + self.scope2 + self.scope3
    }
}

/// Whether hot spots rank individual activities or scope/category buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotSpotBasis {
    #[default]
    Activity,
    Category,
}

/// A single ranked contributor in a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotSpot {
    pub basis: HotSpotBasis,
    pub identifier: String,
    pub scope: Scope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Scope3Category>,
    pub tonnes_co2e: f64,
    pub percentage: f64,
}

/// Classification of a non-fatal, per-activity problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    InvalidActivity,
    UnitConversion,
    FactorNotFound,
}

impl WarningKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::InvalidActivity => "Invalid activity",
            Self::UnitConversion => "Unit conversion",
            Self::FactorNotFound => "Emission factor not found",
        }
    }
}

/// Activity excluded from the totals together with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationWarning {
    pub activity_id: ActivityId,
    pub kind: WarningKind,
    pub message: String,
}

/// The authoritative output of a recalculation for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    pub project_id: ProjectId,
    pub total_emissions: f64,
    pub scope_totals: ScopeTotals,
    pub scope3_breakdown: BTreeMap<Scope3Category, f64>,
    pub by_year: BTreeMap<i32, f64>,
    pub hot_spots: Vec<HotSpot>,
    pub data_quality_score: f64,
    pub offsets: f64,
    pub net_emissions: f64,
    pub contributing_activities: usize,
    pub warnings: Vec<CalculationWarning>,
    pub options: CalculationOptions,
    pub calculated_at: DateTime<Utc>,
}

impl CalculationResult {
    pub fn warning_for(&self, activity_id: &ActivityId) -> Option<&CalculationWarning> {
        self.warnings
            .iter()
            .find(|warning| &warning.activity_id == activity_id)
    }
}
