use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::domain::{Activity, ActivityId, CalculationResult, ProjectId, ProjectMeta};
use super::ledger::{ActivityLedger, LedgerError};
use super::options::{CalculationOptions, EngineConfig};
use super::repository::{EmissionFactorStore, LedgerStore, RepositoryError};

/// Source of calculation timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Activity selection for on-demand footprints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "boundary", content = "product", rename_all = "snake_case")]
pub enum FootprintBoundary {
    /// Every activity of the project (organisational footprint).
    Organization,
    /// Activities tagged with the given product (product footprint).
    Product(String),
}

impl FootprintBoundary {
    pub fn includes(&self, activity: &Activity) -> bool {
        match self {
            Self::Organization => true,
            Self::Product(product) => activity
                .product
                .as_deref()
                .is_some_and(|tag| tag.trim().eq_ignore_ascii_case(product.trim())),
        }
    }
}

/// Error raised by the calculation service. Prior results stay authoritative on every variant.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalculationError {
    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),
    #[error("activity {activity_id} not found in project {project_id}")]
    ActivityNotFound {
        project_id: ProjectId,
        activity_id: ActivityId,
    },
    #[error("a recalculation for project {0} is already in progress")]
    RecalculationInProgress(ProjectId),
    #[error("no calculation result for project {0} yet")]
    NotComputedYet(ProjectId),
    #[error("calculation failed for project {project_id}: {reason}")]
    CalculationFailed {
        project_id: ProjectId,
        reason: String,
    },
}

impl CalculationError {
    fn failed(project_id: &ProjectId, reason: impl Display) -> Self {
        Self::CalculationFailed {
            project_id: project_id.clone(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlightKind {
    Full,
    Activity,
}

#[derive(Debug, Clone)]
struct FlightRecord {
    kind: FlightKind,
    options: CalculationOptions,
    outcome: Result<CalculationResult, CalculationError>,
}

#[derive(Debug, Default)]
struct SlotState {
    in_flight: Option<FlightKind>,
    waiting: usize,
    generation: u64,
    last_flight: Option<FlightRecord>,
    ledger: Option<ActivityLedger>,
    latest: Option<CalculationResult>,
}

/// Latest result, cached ledger and lock token for one project.
#[derive(Debug, Default)]
struct ProjectSlot {
    state: Mutex<SlotState>,
    settled: Condvar,
}

impl ProjectSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks a recalculation in flight; clears the mark and wakes waiters when dropped.
struct Flight<'a> {
    slot: &'a ProjectSlot,
    kind: FlightKind,
    record: Option<FlightRecord>,
    ledger: Option<ActivityLedger>,
}

impl<'a> Flight<'a> {
    fn new(slot: &'a ProjectSlot, kind: FlightKind) -> Self {
        Self {
            slot,
            kind,
            record: None,
            ledger: None,
        }
    }

    fn complete(
        mut self,
        options: CalculationOptions,
        outcome: Result<(CalculationResult, ActivityLedger), CalculationError>,
    ) -> Result<CalculationResult, CalculationError> {
        let outcome = outcome.map(|(result, ledger)| {
            self.ledger = Some(ledger);
            result
        });
        self.record = Some(FlightRecord {
            kind: self.kind,
            options,
            outcome: outcome.clone(),
        });
        outcome
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let mut state = self.slot.lock();
        if let Some(record) = self.record.take() {
            if let Ok(result) = &record.outcome {
                state.latest = Some(result.clone());
                state.ledger = self.ledger.take();
            }
            state.last_flight = Some(record);
        } else {
            state.last_flight = None;
        }
        state.in_flight = None;
        state.generation += 1;
        drop(state);
        self.slot.settled.notify_all();
    }
}

/// Orchestrates normalisation, factor resolution and aggregation per project.
///
/// Recalculations of different projects never wait on each other. Within a project,
/// `recalculate_all` waits for an in-flight run and reuses the outcome of a full run, while
/// `recalculate_activity` is rejected with [`CalculationError::RecalculationInProgress`].
pub struct CalculationService<S, F> {
    store: Arc<S>,
    factors: Arc<F>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    slots: RwLock<HashMap<ProjectId, Arc<ProjectSlot>>>,
}

impl<S, F> CalculationService<S, F>
where
    S: LedgerStore + 'static,
    F: EmissionFactorStore + 'static,
{
    pub fn new(store: Arc<S>, factors: Arc<F>, config: EngineConfig) -> Self {
        Self {
            store,
            factors,
            config,
            clock: Arc::new(SystemClock),
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Recomputes the project's result from its full activity set and persists it.
    pub fn recalculate_all(
        &self,
        project_id: &ProjectId,
        options: CalculationOptions,
    ) -> Result<CalculationResult, CalculationError> {
        let slot = self.slot(project_id);
        let mut state = slot.lock();
        let arrival = state.generation;

        loop {
            if state.in_flight.is_none() {
                if state.generation != arrival {
                    if let Some(record) = state
                        .last_flight
                        .as_ref()
                        .filter(|record| {
                            record.kind == FlightKind::Full && record.options == options
                        })
                    {
                        debug!(project_id = %project_id, "reusing result of concurrent recalculation");
                        return record.outcome.clone();
                    }
                }
                break;
            }
            state.waiting += 1;
            state = slot
                .settled
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            state.waiting -= 1;
        }

        state.in_flight = Some(FlightKind::Full);
        drop(state);

        let flight = Flight::new(&slot, FlightKind::Full);
        let outcome = self.run_full(project_id, &options);
        flight.complete(options, outcome)
    }

    /// Refreshes the project's result after a change to one activity.
    ///
    /// The result equals what [`Self::recalculate_all`] would produce over the same
    /// activity set with the options of the previous run.
    pub fn recalculate_activity(
        &self,
        project_id: &ProjectId,
        activity_id: &ActivityId,
    ) -> Result<CalculationResult, CalculationError> {
        let slot = self.slot(project_id);
        let cached = {
            let mut state = slot.lock();
            if state.in_flight.is_some() {
                debug!(project_id = %project_id, activity_id = %activity_id, "rejecting activity recalculation while another is in flight");
                return Err(CalculationError::RecalculationInProgress(
                    project_id.clone(),
                ));
            }
            state.in_flight = Some(FlightKind::Activity);
            state.ledger.clone()
        };

        let flight = Flight::new(&slot, FlightKind::Activity);
        let options = cached
            .as_ref()
            .map(|ledger| ledger.options().clone())
            .unwrap_or_default();
        let outcome = self.run_incremental(project_id, activity_id, cached);
        flight.complete(options, outcome)
    }

    /// Latest successfully computed result for the project.
    pub fn get_latest_result(
        &self,
        project_id: &ProjectId,
    ) -> Result<CalculationResult, CalculationError> {
        let slot = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project_id)
            .cloned();

        let latest = slot.and_then(|slot| {
            let state = slot.lock();
            state.latest.clone()
        });
        latest.ok_or_else(|| CalculationError::NotComputedYet(project_id.clone()))
    }

    /// Computes an organisational or product footprint without persisting it.
    pub fn calculate_footprint(
        &self,
        project_id: &ProjectId,
        boundary: &FootprintBoundary,
        options: CalculationOptions,
    ) -> Result<CalculationResult, CalculationError> {
        let project = self.load_project(project_id)?;
        let activities: Vec<Activity> = self
            .load_activities(project_id)?
            .into_iter()
            .filter(|activity| boundary.includes(activity))
            .collect();
        let selected = activities.len();

        let ledger = ActivityLedger::evaluate(&project, activities, &options, self.factors.as_ref())
            .map_err(|err| ledger_failure(project_id, err))?;
        let result = ledger.summarize(&self.config, self.clock.now());

        info!(
            project_id = %project_id,
            boundary = ?boundary,
            selected,
            total_emissions = result.total_emissions,
            "footprint calculated"
        );
        Ok(result)
    }

    fn run_full(
        &self,
        project_id: &ProjectId,
        options: &CalculationOptions,
    ) -> Result<(CalculationResult, ActivityLedger), CalculationError> {
        let started = Instant::now();
        let project = self.load_project(project_id)?;
        let activities = self.load_activities(project_id)?;

        let ledger = ActivityLedger::evaluate(&project, activities, options, self.factors.as_ref())
            .map_err(|err| ledger_failure(project_id, err))?;
        let result = self.persist(project_id, &ledger)?;

        info!(
            project_id = %project_id,
            activities = ledger.len(),
            warnings = result.warnings.len(),
            total_emissions = result.total_emissions,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "project recalculated"
        );
        Ok((result, ledger))
    }

    fn run_incremental(
        &self,
        project_id: &ProjectId,
        activity_id: &ActivityId,
        cached: Option<ActivityLedger>,
    ) -> Result<(CalculationResult, ActivityLedger), CalculationError> {
        let started = Instant::now();
        let project = self.load_project(project_id)?;
        let activities = self.load_activities(project_id)?;

        if !activities.iter().any(|activity| &activity.id == activity_id) {
            return Err(CalculationError::ActivityNotFound {
                project_id: project_id.clone(),
                activity_id: activity_id.clone(),
            });
        }

        let (ledger, evaluated) = match cached {
            Some(ledger) => ledger.refresh(&project, activities, activity_id, self.factors.as_ref()),
            None => {
                let evaluated = activities.len();
                ActivityLedger::evaluate(
                    &project,
                    activities,
                    &CalculationOptions::default(),
                    self.factors.as_ref(),
                )
                .map(|ledger| (ledger, evaluated))
            }
        }
        .map_err(|err| ledger_failure(project_id, err))?;

        let result = self.persist(project_id, &ledger)?;

        info!(
            project_id = %project_id,
            activity_id = %activity_id,
            evaluated,
            activities = ledger.len(),
            total_emissions = result.total_emissions,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "activity recalculated"
        );
        Ok((result, ledger))
    }

    fn persist(
        &self,
        project_id: &ProjectId,
        ledger: &ActivityLedger,
    ) -> Result<CalculationResult, CalculationError> {
        let result = ledger.summarize(&self.config, self.clock.now());
        self.store
            .save_calculation_result(project_id, &result)
            .map_err(|err| CalculationError::failed(project_id, format!("saving result: {err}")))?;
        Ok(result)
    }

    fn load_project(&self, project_id: &ProjectId) -> Result<ProjectMeta, CalculationError> {
        match self.store.load_project(project_id) {
            Ok(Some(project)) => Ok(project),
            Ok(None) | Err(RepositoryError::NotFound) => {
                Err(CalculationError::ProjectNotFound(project_id.clone()))
            }
            Err(err) => Err(CalculationError::failed(
                project_id,
                format!("loading project: {err}"),
            )),
        }
    }

    fn load_activities(&self, project_id: &ProjectId) -> Result<Vec<Activity>, CalculationError> {
        self.store
            .load_activities(project_id)
            .map_err(|err| CalculationError::failed(project_id, format!("loading activities: {err}")))
    }

    fn slot(&self, project_id: &ProjectId) -> Arc<ProjectSlot> {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project_id)
        {
            return slot.clone();
        }

        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(project_id.clone())
            .or_default()
            .clone()
    }

    #[cfg(test)]
    pub(crate) fn waiting_callers(&self, project_id: &ProjectId) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project_id)
            .map(|slot| slot.lock().waiting)
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self, project_id: &ProjectId) -> bool {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project_id)
            .map(|slot| slot.lock().in_flight.is_some())
            .unwrap_or_default()
    }
}

fn ledger_failure(project_id: &ProjectId, err: LedgerError) -> CalculationError {
    CalculationError::failed(project_id, err)
}
