use super::domain::{Activity, CalculationResult, EmissionFactor, ProjectId, ProjectMeta};

/// Persistence boundary for project metadata, raw activities and computed results.
pub trait LedgerStore: Send + Sync {
    fn load_project(&self, project_id: &ProjectId) -> Result<Option<ProjectMeta>, RepositoryError>;
    fn load_activities(&self, project_id: &ProjectId) -> Result<Vec<Activity>, RepositoryError>;
    fn save_calculation_result(
        &self,
        project_id: &ProjectId,
        result: &CalculationResult,
    ) -> Result<(), RepositoryError>;
}

/// Read-only access to the externally owned emission factor table.
///
/// Implementations return the candidate set for an activity type; the resolver
/// applies the year/region fallback ordering itself.
pub trait EmissionFactorStore: Send + Sync {
    fn load_emission_factors(
        &self,
        activity_type: &str,
        year: i32,
        region: Option<&str>,
    ) -> Result<Vec<EmissionFactor>, RepositoryError>;
}

/// Error enumeration for store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
