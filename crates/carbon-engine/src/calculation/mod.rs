//! Emissions calculation and aggregation engine.
//!
//! Activities are normalised to base units, matched to an emission factor, reduced
//! into scope/category/year subtotals with hot-spot ranking, and scored for data
//! quality. [`CalculationService`] owns the per-project latest result and makes sure
//! only one recalculation per project runs at a time.

pub mod aggregation;
pub mod domain;
pub mod factors;
pub mod ledger;
pub mod normalizer;
pub mod options;
pub mod quality;
pub mod repository;
pub mod router;
pub mod service;
pub mod units;

#[cfg(test)]
mod tests;

pub use aggregation::{aggregate, Aggregate, Contribution};
pub use domain::{
    Activity, ActivityId, CalculationResult, CalculationTier, CalculationWarning,
    EmissionFactor, HotSpot, HotSpotBasis, ProjectId, ProjectMeta, Scope, Scope3Category,
    ScopeTotals, WarningKind,
};
pub use factors::{select_factor, FactorOrigin, ResolvedFactor};
pub use ledger::ActivityLedger;
pub use normalizer::{normalize, ActivityError, NormalizedActivity};
pub use options::{CalculationOptions, EngineConfig};
pub use repository::{EmissionFactorStore, LedgerStore, RepositoryError};
pub use router::calculation_router;
pub use service::{CalculationError, CalculationService, Clock, FootprintBoundary, SystemClock};
