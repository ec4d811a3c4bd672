use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::calculation::domain::{
    Activity, ActivityId, CalculationResult, CalculationTier, EmissionFactor, ProjectId,
    ProjectMeta, Scope, Scope3Category,
};
use crate::calculation::options::EngineConfig;
use crate::calculation::repository::{EmissionFactorStore, LedgerStore, RepositoryError};
use crate::calculation::service::{CalculationService, Clock};

pub(super) const PROJECT: &str = "proj-osaka";

pub(super) fn project_id() -> ProjectId {
    ProjectId(PROJECT.to_string())
}

pub(super) fn project() -> ProjectMeta {
    ProjectMeta {
        id: project_id(),
        name: "Osaka assembly plant".to_string(),
        region: Some("JP".to_string()),
        baseline_year: 2020,
        reporting_year: 2024,
    }
}

/// Activity whose override factor turns `tonnes` kilograms into exactly `tonnes` t CO2e.
pub(super) fn direct_activity(
    id: &str,
    scope: Scope,
    category: Option<Scope3Category>,
    tonnes: f64,
) -> Activity {
    Activity {
        id: ActivityId(id.to_string()),
        project_id: project_id(),
        scope,
        category,
        activity_type: "direct_measurement".to_string(),
        quantity: tonnes,
        unit: "kg".to_string(),
        emission_factor: Some(1.0),
        factor_unit: Some("tCO2e/kg".to_string()),
        tier: CalculationTier::Tier3,
        year: 2023,
        facility: None,
        product: None,
        data_quality: None,
        offset: false,
    }
}

pub(super) fn looked_up_activity(
    id: &str,
    scope: Scope,
    category: Option<Scope3Category>,
    activity_type: &str,
    quantity: f64,
    unit: &str,
) -> Activity {
    Activity {
        id: ActivityId(id.to_string()),
        project_id: project_id(),
        scope,
        category,
        activity_type: activity_type.to_string(),
        quantity,
        unit: unit.to_string(),
        emission_factor: None,
        factor_unit: None,
        tier: CalculationTier::Tier2,
        year: 2023,
        facility: Some("Line 1".to_string()),
        product: None,
        data_quality: None,
        offset: false,
    }
}

/// The three-activity example: 10 t scope1, 5 t scope2, 5 t business travel.
pub(super) fn example_activities() -> Vec<Activity> {
    vec![
        direct_activity("act-boiler", Scope::Scope1, None, 10.0),
        direct_activity("act-grid", Scope::Scope2, None, 5.0),
        direct_activity(
            "act-flights",
            Scope::Scope3,
            Some(Scope3Category::BusinessTravel),
            5.0,
        ),
    ]
}

pub(super) fn factor(
    activity_type: &str,
    year: i32,
    region: Option<&str>,
    value: f64,
    unit: &str,
) -> EmissionFactor {
    EmissionFactor {
        activity_type: activity_type.to_string(),
        year,
        region: region.map(str::to_string),
        value,
        unit: unit.to_string(),
        source: Some("test-inventory".to_string()),
    }
}

pub(super) fn factor_table() -> Vec<EmissionFactor> {
    vec![
        factor("grid_electricity", 2023, Some("JP"), 0.45, "kgCO2e/kWh"),
        factor("grid_electricity", 2023, None, 0.40, "kgCO2e/kWh"),
        factor("diesel", 2021, None, 2.58, "kgCO2e/l"),
        factor("air_travel", 2023, None, 0.15, "kgCO2e/passenger_km"),
        factor("steel", 2022, None, 2.0, "tCO2e/t"),
    ]
}

pub(super) fn engine_config() -> EngineConfig {
    EngineConfig::default()
}

pub(super) fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 1, 9, 30, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) struct FixedClock(pub(super) DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Default)]
pub(super) struct MemoryLedgerStore {
    projects: Mutex<HashMap<ProjectId, ProjectMeta>>,
    activities: Mutex<HashMap<ProjectId, Vec<Activity>>>,
    saved: Mutex<HashMap<ProjectId, CalculationResult>>,
    activity_loads: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryLedgerStore {
    pub(super) fn with_project(project: ProjectMeta, activities: Vec<Activity>) -> Self {
        let store = Self::default();
        store
            .activities
            .lock()
            .expect("activities mutex poisoned")
            .insert(project.id.clone(), activities);
        store
            .projects
            .lock()
            .expect("projects mutex poisoned")
            .insert(project.id.clone(), project);
        store
    }

    pub(super) fn upsert_activity(&self, activity: Activity) {
        let mut guard = self.activities.lock().expect("activities mutex poisoned");
        let entries = guard.entry(activity.project_id.clone()).or_default();
        match entries.iter_mut().find(|existing| existing.id == activity.id) {
            Some(existing) => *existing = activity,
            None => entries.push(activity),
        }
    }

    pub(super) fn remove_activity(&self, project_id: &ProjectId, activity_id: &ActivityId) {
        let mut guard = self.activities.lock().expect("activities mutex poisoned");
        if let Some(entries) = guard.get_mut(project_id) {
            entries.retain(|activity| &activity.id != activity_id);
        }
    }

    pub(super) fn saved(&self, project_id: &ProjectId) -> Option<CalculationResult> {
        self.saved
            .lock()
            .expect("saved mutex poisoned")
            .get(project_id)
            .cloned()
    }

    pub(super) fn activity_loads(&self) -> usize {
        self.activity_loads.load(Ordering::SeqCst)
    }

    pub(super) fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load_project(&self, project_id: &ProjectId) -> Result<Option<ProjectMeta>, RepositoryError> {
        Ok(self
            .projects
            .lock()
            .expect("projects mutex poisoned")
            .get(project_id)
            .cloned())
    }

    fn load_activities(&self, project_id: &ProjectId) -> Result<Vec<Activity>, RepositoryError> {
        self.activity_loads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .activities
            .lock()
            .expect("activities mutex poisoned")
            .get(project_id)
            .cloned()
            .unwrap_or_default())
    }

    fn save_calculation_result(
        &self,
        project_id: &ProjectId,
        result: &CalculationResult,
    ) -> Result<(), RepositoryError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("database offline".to_string()));
        }
        self.saved
            .lock()
            .expect("saved mutex poisoned")
            .insert(project_id.clone(), result.clone());
        Ok(())
    }
}

/// Store whose activity load blocks until the test releases it.
pub(super) struct GatedLedgerStore {
    pub(super) inner: MemoryLedgerStore,
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl GatedLedgerStore {
    pub(super) fn new(inner: MemoryLedgerStore, entered: Sender<()>, release: Receiver<()>) -> Self {
        Self {
            inner,
            entered: Mutex::new(entered),
            release: Mutex::new(release),
        }
    }
}

impl LedgerStore for GatedLedgerStore {
    fn load_project(&self, project_id: &ProjectId) -> Result<Option<ProjectMeta>, RepositoryError> {
        self.inner.load_project(project_id)
    }

    fn load_activities(&self, project_id: &ProjectId) -> Result<Vec<Activity>, RepositoryError> {
        self.entered
            .lock()
            .expect("gate mutex poisoned")
            .send(())
            .expect("test listens for entry");
        self.release
            .lock()
            .expect("gate mutex poisoned")
            .recv()
            .expect("test releases the gate");
        self.inner.load_activities(project_id)
    }

    fn save_calculation_result(
        &self,
        project_id: &ProjectId,
        result: &CalculationResult,
    ) -> Result<(), RepositoryError> {
        self.inner.save_calculation_result(project_id, result)
    }
}

#[derive(Default)]
pub(super) struct MemoryFactors {
    factors: Mutex<Vec<EmissionFactor>>,
}

impl MemoryFactors {
    pub(super) fn new(factors: Vec<EmissionFactor>) -> Self {
        Self {
            factors: Mutex::new(factors),
        }
    }

    pub(super) fn append(&self, factor: EmissionFactor) {
        self.factors
            .lock()
            .expect("factors mutex poisoned")
            .push(factor);
    }
}

impl EmissionFactorStore for MemoryFactors {
    fn load_emission_factors(
        &self,
        activity_type: &str,
        year: i32,
        _region: Option<&str>,
    ) -> Result<Vec<EmissionFactor>, RepositoryError> {
        Ok(self
            .factors
            .lock()
            .expect("factors mutex poisoned")
            .iter()
            .filter(|factor| {
                factor.activity_type.eq_ignore_ascii_case(activity_type) && factor.year <= year
            })
            .cloned()
            .collect())
    }
}

pub(super) struct UnavailableFactors;

impl EmissionFactorStore for UnavailableFactors {
    fn load_emission_factors(
        &self,
        _activity_type: &str,
        _year: i32,
        _region: Option<&str>,
    ) -> Result<Vec<EmissionFactor>, RepositoryError> {
        Err(RepositoryError::Unavailable("factor database offline".to_string()))
    }
}

pub(super) fn build_service(
    activities: Vec<Activity>,
) -> (
    CalculationService<MemoryLedgerStore, MemoryFactors>,
    Arc<MemoryLedgerStore>,
) {
    let store = Arc::new(MemoryLedgerStore::with_project(project(), activities));
    let factors = Arc::new(MemoryFactors::new(factor_table()));
    let service = CalculationService::new(store.clone(), factors, engine_config())
        .with_clock(Arc::new(FixedClock(fixed_time())));
    (service, store)
}

pub(super) fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
