use crate::infra::{
    demo_project, reference_factors, seeded_store, InMemoryFactorTable, InMemoryLedgerStore,
};
use carbon_engine::calculation::{
    ActivityId, CalculationOptions, CalculationResult, CalculationService, EngineConfig,
    FootprintBoundary, HotSpotBasis, ProjectId, ProjectMeta,
};
use carbon_engine::config::AppConfig;
use carbon_engine::error::AppError;
use carbon_engine::ingest::{activities_from_path, emission_factors_from_path};
use chrono::SecondsFormat;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct CalculateArgs {
    /// Activity ledger CSV export
    #[arg(long)]
    pub(crate) activities: PathBuf,
    /// Emission factor table CSV export
    #[arg(long)]
    pub(crate) factors: PathBuf,
    /// Project whose activities are calculated
    #[arg(long)]
    pub(crate) project_id: String,
    /// Display name of the project
    #[arg(long)]
    pub(crate) name: Option<String>,
    /// Region used for regional factor matches (e.g. JP)
    #[arg(long)]
    pub(crate) region: Option<String>,
    /// First year of the reporting span
    #[arg(long)]
    pub(crate) baseline_year: i32,
    /// Last year of the reporting span
    #[arg(long)]
    pub(crate) reporting_year: i32,
    /// Net offset activities against the gross total
    #[arg(long)]
    pub(crate) include_offsets: bool,
    /// Look factors up for this region instead of the project's
    #[arg(long)]
    pub(crate) region_override: Option<String>,
    /// Number of hot spots to report (defaults to ENGINE_HOT_SPOT_LIMIT)
    #[arg(long)]
    pub(crate) hot_spots: Option<usize>,
    /// Print the result envelope as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Net the seeded carbon credits against the gross total
    #[arg(long)]
    pub(crate) include_offsets: bool,
    /// Rank hot spots by scope/category bucket instead of by activity
    #[arg(long)]
    pub(crate) category_hot_spots: bool,
    /// Product tag used for the product footprint step
    #[arg(long, default_value = "bike-frame")]
    pub(crate) product: String,
}

pub(crate) fn run_calculate(args: CalculateArgs) -> Result<(), AppError> {
    let CalculateArgs {
        activities,
        factors,
        project_id,
        name,
        region,
        baseline_year,
        reporting_year,
        include_offsets,
        region_override,
        hot_spots,
        json,
    } = args;

    let mut engine = AppConfig::load()?.engine;
    if let Some(limit) = hot_spots {
        engine.hot_spot_limit = limit;
    }

    let project = ProjectMeta {
        id: ProjectId(project_id.clone()),
        name: name.unwrap_or_else(|| project_id.clone()),
        region,
        baseline_year,
        reporting_year,
    };

    let store = InMemoryLedgerStore::default();
    store.register_project(project.clone());
    let mut skipped = 0;
    for activity in activities_from_path(&activities)? {
        if activity.project_id == project.id {
            store.upsert_activity(activity);
        } else {
            skipped += 1;
        }
    }
    let factors = InMemoryFactorTable::new(emission_factors_from_path(&factors)?);

    let service = CalculationService::new(Arc::new(store), Arc::new(factors), engine);
    let options = CalculationOptions {
        include_offsets,
        region_override,
    };
    let result = service.recalculate_all(&project.id, options)?;

    if json {
        let payload = serde_json::to_string_pretty(&result).map_err(std::io::Error::from)?;
        println!("{payload}");
        return Ok(());
    }

    println!("Footprint for {} ({})", project.name, project.id);
    if skipped > 0 {
        println!("Ignored {skipped} activities belonging to other projects");
    }
    for line in report_lines(&result) {
        println!("{line}");
    }
    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        include_offsets,
        category_hot_spots,
        product,
    } = args;

    let engine = EngineConfig {
        hot_spot_basis: if category_hot_spots {
            HotSpotBasis::Category
        } else {
            HotSpotBasis::Activity
        },
        ..EngineConfig::default()
    };
    let store = Arc::new(seeded_store());
    let service = CalculationService::new(
        store.clone(),
        Arc::new(InMemoryFactorTable::new(reference_factors())),
        engine,
    );
    let project = demo_project();
    let options = CalculationOptions {
        include_offsets,
        region_override: None,
    };

    println!("Emissions engine demo: {} ({})", project.name, project.id);
    println!("\n== Full recalculation");
    let initial = service.recalculate_all(&project.id, options.clone())?;
    for line in report_lines(&initial) {
        println!("{line}");
    }

    let grid_id = ActivityId("act-grid".to_string());
    if let Some(mut grid) = store.activity(&project.id, &grid_id) {
        println!("\n== Incremental recalculation");
        println!(
            "Grid purchase revised from {} {} to {} {} after moving load onto the PPA",
            grid.quantity, grid.unit, 900.0, grid.unit
        );
        grid.quantity = 900.0;
        store.upsert_activity(grid);

        let refreshed = service.recalculate_activity(&project.id, &grid_id)?;
        println!(
            "Scope 2: {} -> {}",
            tonnes(initial.scope_totals.scope2),
            tonnes(refreshed.scope_totals.scope2)
        );
        println!(
            "Total: {} -> {} ({:+.2} t)",
            tonnes(initial.total_emissions),
            tonnes(refreshed.total_emissions),
            refreshed.total_emissions - initial.total_emissions
        );

        let latest = service.get_latest_result(&project.id)?;
        let persisted = store.stored_result(&project.id).as_ref() == Some(&latest);
        println!(
            "Latest result calculated at {} (persisted: {})",
            latest.calculated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            if persisted { "yes" } else { "no" }
        );
    }

    println!("\n== Product footprint ({product})");
    let footprint = service.calculate_footprint(
        &project.id,
        &FootprintBoundary::Product(product),
        options,
    )?;
    println!(
        "{} across {} activities ({:.1}% of the organisation)",
        tonnes(footprint.total_emissions),
        footprint.contributing_activities,
        percentage(footprint.total_emissions, organisation_total(&service, &project.id)?)
    );
    for hot_spot in &footprint.hot_spots {
        println!("- {}: {}", hot_spot.identifier, tonnes(hot_spot.tonnes_co2e));
    }

    Ok(())
}

fn organisation_total(
    service: &CalculationService<InMemoryLedgerStore, InMemoryFactorTable>,
    project_id: &ProjectId,
) -> Result<f64, AppError> {
    Ok(service.get_latest_result(project_id)?.total_emissions)
}

/// Plain-text rendering of a result envelope, one line per entry.
pub(crate) fn report_lines(result: &CalculationResult) -> Vec<String> {
    let mut lines = vec![
        format!("Total emissions: {}", tonnes(result.total_emissions)),
        format!("- Scope 1: {}", tonnes(result.scope_totals.scope1)),
        format!("- Scope 2: {}", tonnes(result.scope_totals.scope2)),
        format!("- Scope 3: {}", tonnes(result.scope_totals.scope3)),
    ];

    for (category, value) in &result.scope3_breakdown {
        lines.push(format!(
            "  - Category {} {}: {}",
            category.number(),
            category.as_str(),
            tonnes(*value)
        ));
    }

    if result.options.include_offsets {
        lines.push(format!(
            "Offsets: {} | Net: {}",
            tonnes(result.offsets),
            tonnes(result.net_emissions)
        ));
    }

    if !result.by_year.is_empty() {
        let years: Vec<String> = result
            .by_year
            .iter()
            .map(|(year, value)| format!("{year}: {}", tonnes(*value)))
            .collect();
        lines.push(format!("By year: {}", years.join(", ")));
    }

    lines.push(format!(
        "Data quality score: {:.1} / 100 ({} contributing activities)",
        result.data_quality_score, result.contributing_activities
    ));

    if result.hot_spots.is_empty() {
        lines.push("Hot spots: none".to_string());
    } else {
        lines.push("Hot spots".to_string());
        for (rank, hot_spot) in result.hot_spots.iter().enumerate() {
            lines.push(format!(
                "{}. {} ({}) {} / {:.1}%",
                rank + 1,
                hot_spot.identifier,
                hot_spot.scope.label(),
                tonnes(hot_spot.tonnes_co2e),
                hot_spot.percentage
            ));
        }
    }

    if result.warnings.is_empty() {
        lines.push("Warnings: none".to_string());
    } else {
        lines.push("Warnings".to_string());
        for warning in &result.warnings {
            lines.push(format!(
                "- [{}] {}",
                warning.kind.label(),
                warning.message
            ));
        }
    }

    lines
}

fn tonnes(value: f64) -> String {
    format!("{value:.2} t CO2e")
}

fn percentage(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}
