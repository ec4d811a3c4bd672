use carbon_engine::calculation::{
    Activity, ActivityId, CalculationResult, CalculationTier, EmissionFactor,
    EmissionFactorStore, LedgerStore, ProjectId, ProjectMeta, RepositoryError, Scope,
    Scope3Category,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Activity ledger and result store held in process memory.
#[derive(Default, Clone)]
pub(crate) struct InMemoryLedgerStore {
    projects: Arc<Mutex<HashMap<ProjectId, ProjectMeta>>>,
    activities: Arc<Mutex<HashMap<ProjectId, Vec<Activity>>>>,
    results: Arc<Mutex<HashMap<ProjectId, CalculationResult>>>,
}

impl InMemoryLedgerStore {
    pub(crate) fn register_project(&self, project: ProjectMeta) {
        let mut guard = self.projects.lock().expect("project mutex poisoned");
        guard.insert(project.id.clone(), project);
    }

    /// Inserts the activity, replacing any stored activity with the same id.
    pub(crate) fn upsert_activity(&self, activity: Activity) {
        let mut guard = self.activities.lock().expect("activity mutex poisoned");
        let entries = guard.entry(activity.project_id.clone()).or_default();
        match entries.iter_mut().find(|existing| existing.id == activity.id) {
            Some(existing) => *existing = activity,
            None => entries.push(activity),
        }
    }

    pub(crate) fn activity(&self, project_id: &ProjectId, id: &ActivityId) -> Option<Activity> {
        let guard = self.activities.lock().expect("activity mutex poisoned");
        guard
            .get(project_id)
            .and_then(|entries| entries.iter().find(|activity| &activity.id == id))
            .cloned()
    }

    pub(crate) fn stored_result(&self, project_id: &ProjectId) -> Option<CalculationResult> {
        let guard = self.results.lock().expect("result mutex poisoned");
        guard.get(project_id).cloned()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn load_project(&self, project_id: &ProjectId) -> Result<Option<ProjectMeta>, RepositoryError> {
        let guard = self.projects.lock().expect("project mutex poisoned");
        Ok(guard.get(project_id).cloned())
    }

    fn load_activities(&self, project_id: &ProjectId) -> Result<Vec<Activity>, RepositoryError> {
        let guard = self.activities.lock().expect("activity mutex poisoned");
        Ok(guard.get(project_id).cloned().unwrap_or_default())
    }

    fn save_calculation_result(
        &self,
        project_id: &ProjectId,
        result: &CalculationResult,
    ) -> Result<(), RepositoryError> {
        let mut guard = self.results.lock().expect("result mutex poisoned");
        guard.insert(project_id.clone(), result.clone());
        Ok(())
    }
}

/// Emission factor table held in process memory.
#[derive(Default, Clone)]
pub(crate) struct InMemoryFactorTable {
    factors: Arc<Vec<EmissionFactor>>,
}

impl InMemoryFactorTable {
    pub(crate) fn new(factors: Vec<EmissionFactor>) -> Self {
        Self {
            factors: Arc::new(factors),
        }
    }
}

impl EmissionFactorStore for InMemoryFactorTable {
    fn load_emission_factors(
        &self,
        activity_type: &str,
        year: i32,
        region: Option<&str>,
    ) -> Result<Vec<EmissionFactor>, RepositoryError> {
        Ok(self
            .factors
            .iter()
            .filter(|factor| factor.activity_type.eq_ignore_ascii_case(activity_type))
            .filter(|factor| factor.year <= year)
            .filter(|factor| match (factor.region.as_deref(), region) {
                (None, _) => true,
                (Some(candidate), Some(wanted)) => candidate.eq_ignore_ascii_case(wanted),
                (Some(_), None) => false,
            })
            .cloned()
            .collect())
    }
}

const DEMO_PROJECT: &str = "proj-demo-osaka";

pub(crate) fn demo_project() -> ProjectMeta {
    ProjectMeta {
        id: ProjectId(DEMO_PROJECT.to_string()),
        name: "Osaka assembly plant".to_string(),
        region: Some("JP".to_string()),
        baseline_year: 2021,
        reporting_year: 2024,
    }
}

pub(crate) fn reference_factors() -> Vec<EmissionFactor> {
    let factor = |activity_type: &str, year, region: Option<&str>, value, unit: &str| EmissionFactor {
        activity_type: activity_type.to_string(),
        year,
        region: region.map(str::to_string),
        value,
        unit: unit.to_string(),
        source: Some("demo reference table".to_string()),
    };

    vec![
        factor("natural_gas", 2022, None, 0.183, "kgCO2e/kWh"),
        factor("diesel", 2022, None, 2.58, "kgCO2e/l"),
        factor("grid_electricity", 2023, Some("JP"), 0.441, "kgCO2e/kWh"),
        factor("grid_electricity", 2023, None, 0.436, "kgCO2e/kWh"),
        factor("refrigerant_r410a", 2021, None, 2_088.0, "kgCO2e/kg"),
        factor("aluminium", 2022, None, 8.6, "tCO2e/t"),
        factor("road_freight", 2023, None, 0.107, "kgCO2e/tkm"),
        factor("air_travel", 2023, None, 0.146, "kgCO2e/passenger_km"),
        factor("rail_commute", 2023, Some("JP"), 0.019, "kgCO2e/passenger_km"),
        factor("general_waste", 2022, None, 0.467, "tCO2e/t"),
        factor("purchased_services", 2022, Some("JP"), 1.2, "kgCO2e/thousand_jpy"),
    ]
}

pub(crate) fn demo_activities() -> Vec<Activity> {
    let project_id = ProjectId(DEMO_PROJECT.to_string());
    let activity = |id: &str,
                    scope: Scope,
                    category: Option<Scope3Category>,
                    activity_type: &str,
                    quantity: f64,
                    unit: &str,
                    tier: CalculationTier| Activity {
        id: ActivityId(id.to_string()),
        project_id: project_id.clone(),
        scope,
        category,
        activity_type: activity_type.to_string(),
        quantity,
        unit: unit.to_string(),
        emission_factor: None,
        factor_unit: None,
        tier,
        year: 2024,
        facility: Some("Osaka line 2".to_string()),
        product: None,
        data_quality: None,
        offset: false,
    };

    let mut aluminium = activity(
        "act-aluminium",
        Scope::Scope3,
        Some(Scope3Category::PurchasedGoods),
        "aluminium",
        42.0,
        "t",
        CalculationTier::Tier2,
    );
    aluminium.product = Some("bike-frame".to_string());

    let mut freight = activity(
        "act-freight",
        Scope::Scope3,
        Some(Scope3Category::UpstreamTransport),
        "road_freight",
        96_000.0,
        "tkm",
        CalculationTier::Tier1,
    );
    freight.product = Some("bike-frame".to_string());

    let mut solar_meter = activity(
        "act-solar-ppa",
        Scope::Scope2,
        None,
        "grid_electricity",
        180.0,
        "MWh",
        CalculationTier::Tier3,
    );
    solar_meter.emission_factor = Some(0.05);
    solar_meter.factor_unit = Some("tCO2e/MWh".to_string());
    solar_meter.data_quality = Some(95);

    let mut credits = activity(
        "act-forest-credits",
        Scope::Scope1,
        None,
        "forest_credit",
        25.0,
        "t",
        CalculationTier::Tier1,
    );
    credits.emission_factor = Some(1.0);
    credits.factor_unit = Some("tCO2e/t".to_string());
    credits.offset = true;

    vec![
        activity(
            "act-boiler-gas",
            Scope::Scope1,
            None,
            "natural_gas",
            410_000.0,
            "kWh",
            CalculationTier::Tier2,
        ),
        activity(
            "act-forklifts",
            Scope::Scope1,
            None,
            "diesel",
            6.5,
            "kL",
            CalculationTier::Tier2,
        ),
        activity(
            "act-chiller-leak",
            Scope::Scope1,
            None,
            "refrigerant_r410a",
            12.0,
            "kg",
            CalculationTier::Tier1,
        ),
        activity(
            "act-grid",
            Scope::Scope2,
            None,
            "grid_electricity",
            1_350.0,
            "MWh",
            CalculationTier::Tier3,
        ),
        solar_meter,
        aluminium,
        freight,
        activity(
            "act-flights",
            Scope::Scope3,
            Some(Scope3Category::BusinessTravel),
            "air_travel",
            310_000.0,
            "pkm",
            CalculationTier::Tier2,
        ),
        activity(
            "act-commuting",
            Scope::Scope3,
            Some(Scope3Category::EmployeeCommuting),
            "rail_commute",
            1_900_000.0,
            "pkm",
            CalculationTier::Tier1,
        ),
        activity(
            "act-waste",
            Scope::Scope3,
            Some(Scope3Category::Waste),
            "general_waste",
            88.0,
            "t",
            CalculationTier::Tier2,
        ),
        activity(
            "act-consulting",
            Scope::Scope3,
            Some(Scope3Category::PurchasedGoods),
            "purchased_services",
            24_000.0,
            "thousand_jpy",
            CalculationTier::Tier1,
        ),
        activity(
            "act-legacy-boiler",
            Scope::Scope1,
            None,
            "coal_stoker",
            14.0,
            "t",
            CalculationTier::Tier1,
        ),
        credits,
    ]
}

/// Store preloaded with the demo project and its activity ledger.
pub(crate) fn seeded_store() -> InMemoryLedgerStore {
    let store = InMemoryLedgerStore::default();
    store.register_project(demo_project());
    for activity in demo_activities() {
        store.upsert_activity(activity);
    }
    store
}
