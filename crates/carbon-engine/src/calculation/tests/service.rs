use super::common::*;
use crate::calculation::domain::{ActivityId, ProjectId, Scope, Scope3Category, WarningKind};
use crate::calculation::options::CalculationOptions;
use crate::calculation::service::{CalculationError, CalculationService, FootprintBoundary};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn recalculate_all_reports_example_totals() {
    let (service, store) = build_service(example_activities());

    let result = service
        .recalculate_all(&project_id(), CalculationOptions::default())
        .expect("calculation succeeds");

    assert_close(result.total_emissions, 20.0);
    assert_close(result.scope_totals.scope1, 10.0);
    assert_close(result.scope_totals.scope2, 5.0);
    assert_close(result.scope_totals.scope3, 5.0);
    assert_eq!(result.scope3_breakdown.len(), 1);
    assert_close(
        result.scope3_breakdown[&Scope3Category::BusinessTravel],
        5.0,
    );
    assert_eq!(result.hot_spots[0].identifier, "act-boiler");
    assert_close(result.hot_spots[0].percentage, 50.0);
    assert_close(result.data_quality_score, 100.0);
    assert!(result.warnings.is_empty());
    assert_eq!(result.calculated_at, fixed_time());

    assert_eq!(store.saved(&project_id()), Some(result.clone()));
    assert_eq!(service.get_latest_result(&project_id()), Ok(result));
}

#[test]
fn zero_activities_produce_an_empty_result() {
    let (service, _) = build_service(Vec::new());

    let result = service
        .recalculate_all(&project_id(), CalculationOptions::default())
        .expect("calculation succeeds");

    assert_eq!(result.total_emissions, 0.0);
    assert_eq!(result.scope_totals.sum(), 0.0);
    assert!(result.scope3_breakdown.is_empty());
    assert!(result.by_year.is_empty());
    assert!(result.hot_spots.is_empty());
    assert_eq!(result.data_quality_score, 0.0);
    assert_eq!(result.contributing_activities, 0);
}

#[test]
fn empty_result_serializes_positive_zeroes() {
    let (service, _) = build_service(Vec::new());

    let result = service
        .recalculate_all(
            &project_id(),
            CalculationOptions {
                include_offsets: true,
                region_override: None,
            },
        )
        .expect("calculation succeeds");

    assert!(result.scope_totals.scope3.is_sign_positive());
    assert!(result.offsets.is_sign_positive());
    assert!(result.net_emissions.is_sign_positive());
    let payload = serde_json::to_string(&result).expect("result serializes");
    assert!(!payload.contains("-0.0"), "negative zero in {payload}");
}

#[test]
fn looked_up_factors_are_converted_through_base_units() {
    let activities = vec![
        looked_up_activity("elec", Scope::Scope2, None, "grid_electricity", 20.0, "MWh"),
        looked_up_activity("genset", Scope::Scope1, None, "diesel", 1.0, "kL"),
        looked_up_activity(
            "flights",
            Scope::Scope3,
            Some(Scope3Category::BusinessTravel),
            "air_travel",
            10_000.0,
            "pkm",
        ),
    ];
    let (service, _) = build_service(activities);

    let result = service
        .recalculate_all(&project_id(), CalculationOptions::default())
        .expect("calculation succeeds");

    // 20 MWh * 0.45 kg/kWh (JP), 1000 l * 2.58 kg/l (2021 fallback), 10000 pkm * 0.15 kg/pkm
    assert_close(result.scope_totals.scope2, 9.0);
    assert_close(result.scope_totals.scope1, 2.58);
    assert_close(result.scope_totals.scope3, 1.5);
    assert_close(result.data_quality_score, 70.0);
}

#[test]
fn region_override_changes_factor_selection() {
    let activities = vec![looked_up_activity(
        "elec",
        Scope::Scope2,
        None,
        "grid_electricity",
        1_000.0,
        "kWh",
    )];
    let (service, _) = build_service(activities);

    let options = CalculationOptions {
        include_offsets: false,
        region_override: Some("US".to_string()),
    };
    let result = service
        .recalculate_all(&project_id(), options.clone())
        .expect("calculation succeeds");

    assert_close(result.total_emissions, 0.4);
    assert_eq!(result.options, options);
}

#[test]
fn unresolvable_factor_is_excluded_with_warning() {
    let mut activities = example_activities();
    activities.push(looked_up_activity(
        "act-mystery",
        Scope::Scope1,
        None,
        "unobtainium_combustion",
        12.0,
        "t",
    ));
    let (service, _) = build_service(activities);

    let result = service
        .recalculate_all(&project_id(), CalculationOptions::default())
        .expect("calculation completes with warnings");

    assert_close(result.total_emissions, 20.0);
    assert_eq!(result.contributing_activities, 3);
    let warning = result
        .warning_for(&ActivityId("act-mystery".to_string()))
        .expect("warning recorded");
    assert_eq!(warning.kind, WarningKind::FactorNotFound);
}

#[test]
fn invalid_and_unconvertible_activities_become_warnings() {
    let mut negative = direct_activity("act-negative", Scope::Scope1, None, 3.0);
    negative.quantity = -3.0;
    let missing_category = direct_activity("act-uncategorised", Scope::Scope3, None, 2.0);
    let wrong_dimension = looked_up_activity(
        "act-litres-of-power",
        Scope::Scope2,
        None,
        "grid_electricity",
        10.0,
        "l",
    );
    let (service, _) = build_service(vec![
        negative,
        missing_category,
        wrong_dimension,
        direct_activity("act-ok", Scope::Scope1, None, 1.0),
    ]);

    let result = service
        .recalculate_all(&project_id(), CalculationOptions::default())
        .expect("calculation completes with warnings");

    assert_close(result.total_emissions, 1.0);
    let kinds: Vec<(&str, WarningKind)> = result
        .warnings
        .iter()
        .map(|warning| (warning.activity_id.0.as_str(), warning.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("act-litres-of-power", WarningKind::UnitConversion),
            ("act-negative", WarningKind::InvalidActivity),
            ("act-uncategorised", WarningKind::InvalidActivity),
        ]
    );
}

#[test]
fn duplicate_identifiers_are_excluded() {
    let (service, _) = build_service(vec![
        direct_activity("act-dup", Scope::Scope1, None, 3.0),
        direct_activity("act-dup", Scope::Scope2, None, 4.0),
        direct_activity("act-single", Scope::Scope1, None, 1.0),
    ]);

    let result = service
        .recalculate_all(&project_id(), CalculationOptions::default())
        .expect("calculation succeeds");

    assert_close(result.total_emissions, 1.0);
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].kind, WarningKind::InvalidActivity);
}

#[test]
fn recalculate_all_is_deterministic() {
    let mut activities = example_activities();
    activities.push(looked_up_activity(
        "elec",
        Scope::Scope2,
        None,
        "grid_electricity",
        3.3,
        "MWh",
    ));
    let (service, store) = build_service(activities.clone());

    let first = service
        .recalculate_all(&project_id(), CalculationOptions::default())
        .expect("first run");
    let second = service
        .recalculate_all(&project_id(), CalculationOptions::default())
        .expect("second run");
    assert_eq!(first, second);

    activities.reverse();
    let (reordered_service, _) = build_service(activities);
    let reordered = reordered_service
        .recalculate_all(&project_id(), CalculationOptions::default())
        .expect("reordered run");
    assert_eq!(first, reordered);
    assert_eq!(store.activity_loads(), 2);
}

#[test]
fn recalculate_activity_matches_full_recalculation() {
    let mut activities = example_activities();
    activities.push(looked_up_activity(
        "elec",
        Scope::Scope2,
        None,
        "grid_electricity",
        7.0,
        "MWh",
    ));
    let (service, store) = build_service(activities);
    service
        .recalculate_all(&project_id(), CalculationOptions::default())
        .expect("initial run");

    let mut changed = direct_activity("act-grid", Scope::Scope2, None, 12.5);
    changed.tier = crate::calculation::domain::CalculationTier::Tier1;
    store.upsert_activity(changed);

    let incremental = service
        .recalculate_activity(&project_id(), &ActivityId("act-grid".to_string()))
        .expect("incremental run");
    let full = service
        .recalculate_all(&project_id(), CalculationOptions::default())
        .expect("full run");

    assert_eq!(incremental, full);
    assert_close(incremental.scope_totals.scope2, 12.5 + 3.15);
    assert_eq!(service.get_latest_result(&project_id()), Ok(full));
}

#[test]
fn recalculate_activity_picks_up_other_changes_and_removals() {
    let (service, store) = build_service(example_activities());
    service
        .recalculate_all(&project_id(), CalculationOptions::default())
        .expect("initial run");

    store.remove_activity(&project_id(), &ActivityId("act-flights".to_string()));
    store.upsert_activity(direct_activity("act-boiler", Scope::Scope1, None, 11.0));
    store.upsert_activity(direct_activity("act-grid", Scope::Scope2, None, 6.0));

    let incremental = service
        .recalculate_activity(&project_id(), &ActivityId("act-grid".to_string()))
        .expect("incremental run");
    let full = service
        .recalculate_all(&project_id(), CalculationOptions::default())
        .expect("full run");

    assert_eq!(incremental, full);
    assert_close(incremental.total_emissions, 17.0);
    assert!(incremental.scope3_breakdown.is_empty());
}

#[test]
fn recalculate_activity_reuses_previous_options() {
    let mut offset = direct_activity("act-credits", Scope::Scope1, None, 2.0);
    offset.offset = true;
    let mut activities = example_activities();
    activities.push(offset);
    let (service, store) = build_service(activities);

    let options = CalculationOptions {
        include_offsets: true,
        region_override: None,
    };
    let initial = service
        .recalculate_all(&project_id(), options.clone())
        .expect("initial run");
    assert_close(initial.offsets, 2.0);
    assert_close(initial.net_emissions, 18.0);

    store.upsert_activity(direct_activity("act-boiler", Scope::Scope1, None, 4.0));
    let incremental = service
        .recalculate_activity(&project_id(), &ActivityId("act-boiler".to_string()))
        .expect("incremental run");

    assert_eq!(incremental.options, options);
    assert_close(incremental.total_emissions, 14.0);
    assert_close(incremental.net_emissions, 12.0);
}

#[test]
fn offsets_are_skipped_unless_requested() {
    let mut offset = direct_activity("act-credits", Scope::Scope1, None, 2.0);
    offset.offset = true;
    let mut activities = example_activities();
    activities.push(offset);
    let (service, _) = build_service(activities);

    let result = service
        .recalculate_all(&project_id(), CalculationOptions::default())
        .expect("calculation succeeds");

    assert_close(result.total_emissions, 20.0);
    assert_eq!(result.offsets, 0.0);
    assert_close(result.net_emissions, 20.0);
    assert!(result.warnings.is_empty());
}

#[test]
fn recalculate_activity_without_prior_run_evaluates_everything() {
    let (service, _) = build_service(example_activities());

    let result = service
        .recalculate_activity(&project_id(), &ActivityId("act-grid".to_string()))
        .expect("incremental run");

    assert_close(result.total_emissions, 20.0);
    assert_eq!(result.options, CalculationOptions::default());
}

#[test]
fn missing_project_and_activity_are_fatal() {
    let (service, _) = build_service(example_activities());
    let unknown = ProjectId("proj-unknown".to_string());

    assert_eq!(
        service.recalculate_all(&unknown, CalculationOptions::default()),
        Err(CalculationError::ProjectNotFound(unknown.clone()))
    );

    match service.recalculate_activity(&project_id(), &ActivityId("act-ghost".to_string())) {
        Err(CalculationError::ActivityNotFound { activity_id, .. }) => {
            assert_eq!(activity_id.0, "act-ghost")
        }
        other => panic!("expected activity not found, got {other:?}"),
    }

    assert_eq!(
        service.get_latest_result(&project_id()),
        Err(CalculationError::NotComputedYet(project_id()))
    );
}

#[test]
fn failed_save_keeps_previous_result() {
    let (service, store) = build_service(example_activities());
    let previous = service
        .recalculate_all(&project_id(), CalculationOptions::default())
        .expect("initial run");

    store.upsert_activity(direct_activity("act-boiler", Scope::Scope1, None, 99.0));
    store.fail_saves(true);

    match service.recalculate_all(&project_id(), CalculationOptions::default()) {
        Err(CalculationError::CalculationFailed { reason, .. }) => {
            assert!(reason.contains("saving result"))
        }
        other => panic!("expected calculation failure, got {other:?}"),
    }
    assert_eq!(service.get_latest_result(&project_id()), Ok(previous.clone()));
    assert_eq!(store.saved(&project_id()), Some(previous));
}

#[test]
fn factor_store_outage_fails_the_run() {
    let store = Arc::new(MemoryLedgerStore::with_project(
        project(),
        vec![looked_up_activity(
            "elec",
            Scope::Scope2,
            None,
            "grid_electricity",
            1.0,
            "MWh",
        )],
    ));
    let service = CalculationService::new(
        store.clone(),
        Arc::new(UnavailableFactors),
        engine_config(),
    );

    match service.recalculate_all(&project_id(), CalculationOptions::default()) {
        Err(CalculationError::CalculationFailed { reason, .. }) => {
            assert!(reason.contains("factor database offline"))
        }
        other => panic!("expected calculation failure, got {other:?}"),
    }
    assert!(store.saved(&project_id()).is_none());
}

#[test]
fn product_footprint_selects_tagged_activities() {
    let mut activities = example_activities();
    activities[0].product = Some("widget-a".to_string());
    activities[2].product = Some("Widget-A".to_string());
    let (service, store) = build_service(activities);

    let product = service
        .calculate_footprint(
            &project_id(),
            &FootprintBoundary::Product("widget-a".to_string()),
            CalculationOptions::default(),
        )
        .expect("product footprint");
    assert_close(product.total_emissions, 15.0);
    assert_close(product.scope_totals.scope2, 0.0);

    let organization = service
        .calculate_footprint(
            &project_id(),
            &FootprintBoundary::Organization,
            CalculationOptions::default(),
        )
        .expect("organization footprint");
    assert_close(organization.total_emissions, 20.0);

    assert!(store.saved(&project_id()).is_none());
    assert!(service.get_latest_result(&project_id()).is_err());
}

#[test]
fn concurrent_full_recalculations_share_one_computation() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let store = Arc::new(GatedLedgerStore::new(
        MemoryLedgerStore::with_project(project(), example_activities()),
        entered_tx,
        release_rx,
    ));
    let service = Arc::new(
        CalculationService::new(
            store.clone(),
            Arc::new(MemoryFactors::new(factor_table())),
            engine_config(),
        )
        .with_clock(Arc::new(FixedClock(fixed_time()))),
    );

    let first = {
        let service = service.clone();
        thread::spawn(move || service.recalculate_all(&project_id(), CalculationOptions::default()))
    };
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("first run reaches the store");

    let second = {
        let service = service.clone();
        thread::spawn(move || service.recalculate_all(&project_id(), CalculationOptions::default()))
    };
    while service.waiting_callers(&project_id()) == 0 {
        thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(
        service.recalculate_activity(&project_id(), &ActivityId("act-grid".to_string())),
        Err(CalculationError::RecalculationInProgress(project_id()))
    );

    release_tx.send(()).expect("release gate");
    let first = first.join().expect("first thread").expect("first result");
    let second = second.join().expect("second thread").expect("second result");

    assert_eq!(first, second);
    assert_eq!(store.inner.activity_loads(), 1);
    assert!(entered_rx.try_recv().is_err());
    assert!(!service.in_flight(&project_id()));
}

#[test]
fn full_recalculation_never_reuses_a_failed_activity_run() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let store = Arc::new(GatedLedgerStore::new(
        MemoryLedgerStore::with_project(project(), example_activities()),
        entered_tx,
        release_rx,
    ));
    let service = Arc::new(
        CalculationService::new(
            store.clone(),
            Arc::new(MemoryFactors::new(factor_table())),
            engine_config(),
        )
        .with_clock(Arc::new(FixedClock(fixed_time()))),
    );

    let ghost = ActivityId("act-ghost".to_string());
    let activity_run = {
        let service = service.clone();
        let ghost = ghost.clone();
        thread::spawn(move || service.recalculate_activity(&project_id(), &ghost))
    };
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("activity run reaches the store");

    let full_run = {
        let service = service.clone();
        thread::spawn(move || service.recalculate_all(&project_id(), CalculationOptions::default()))
    };
    while service.waiting_callers(&project_id()) == 0 {
        thread::sleep(Duration::from_millis(1));
    }

    release_tx.send(()).expect("release activity run");
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("full run loads activities itself");
    release_tx.send(()).expect("release full run");

    let activity_outcome = activity_run.join().expect("activity thread");
    assert_eq!(
        activity_outcome,
        Err(CalculationError::ActivityNotFound {
            project_id: project_id(),
            activity_id: ghost,
        })
    );

    let full = full_run
        .join()
        .expect("full thread")
        .expect("full run computes its own result");
    assert_close(full.total_emissions, 20.0);
    assert_eq!(store.inner.activity_loads(), 2);
    assert_eq!(service.get_latest_result(&project_id()), Ok(full));
    assert!(!service.in_flight(&project_id()));
}

#[test]
fn recalculate_activity_picks_up_appended_factors() {
    let activities = vec![
        looked_up_activity("act-forklift", Scope::Scope1, None, "diesel", 1_000.0, "l"),
        direct_activity("act-grid", Scope::Scope2, None, 5.0),
        looked_up_activity(
            "act-rebar",
            Scope::Scope3,
            Some(Scope3Category::PurchasedGoods),
            "rebar",
            2.0,
            "t",
        ),
    ];
    let store = Arc::new(MemoryLedgerStore::with_project(project(), activities));
    let factors = Arc::new(MemoryFactors::new(factor_table()));
    let service = CalculationService::new(store.clone(), factors.clone(), engine_config())
        .with_clock(Arc::new(FixedClock(fixed_time())));

    let initial = service
        .recalculate_all(&project_id(), CalculationOptions::default())
        .expect("initial run");
    assert_close(initial.total_emissions, 7.58);
    assert_eq!(initial.warnings.len(), 1);

    factors.append(factor("diesel", 2023, None, 3.0, "kgCO2e/l"));
    factors.append(factor("rebar", 2023, None, 1.5, "tCO2e/t"));
    store.upsert_activity(direct_activity("act-grid", Scope::Scope2, None, 6.0));

    let incremental = service
        .recalculate_activity(&project_id(), &ActivityId("act-grid".to_string()))
        .expect("incremental run");
    let full = service
        .recalculate_all(&project_id(), CalculationOptions::default())
        .expect("full run");

    assert_eq!(incremental, full);
    assert_close(incremental.total_emissions, 12.0);
    assert_close(incremental.scope_totals.scope1, 3.0);
    assert!(incremental.warnings.is_empty());
}

#[test]
fn different_projects_do_not_block_each_other() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let inner = MemoryLedgerStore::with_project(project(), example_activities());
    let store = Arc::new(GatedLedgerStore::new(inner, entered_tx, release_rx));
    let service = Arc::new(CalculationService::new(
        store.clone(),
        Arc::new(MemoryFactors::new(factor_table())),
        engine_config(),
    ));

    let blocked = {
        let service = service.clone();
        thread::spawn(move || service.recalculate_all(&project_id(), CalculationOptions::default()))
    };
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("first run reaches the store");
    assert!(service.in_flight(&project_id()));

    let other = ProjectId("proj-other".to_string());
    assert_eq!(
        service.recalculate_all(&other, CalculationOptions::default()),
        Err(CalculationError::ProjectNotFound(other.clone()))
    );
    assert_eq!(
        service.get_latest_result(&other),
        Err(CalculationError::NotComputedYet(other))
    );

    release_tx.send(()).expect("release gate");
    blocked
        .join()
        .expect("blocked thread")
        .expect("blocked result");
}
