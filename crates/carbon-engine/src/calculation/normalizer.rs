use super::domain::{Activity, ActivityId, ProjectMeta, Scope, Scope3Category, WarningKind};
use super::units::{to_base, Quantity};

/// Per-activity failure. Recovered locally and reported as a warning on the result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActivityError {
    #[error("activity {activity_id} is invalid: {reason}")]
    InvalidActivity {
        activity_id: ActivityId,
        reason: String,
    },
    #[error("activity {activity_id}: cannot convert '{unit}' ({detail})")]
    UnitConversion {
        activity_id: ActivityId,
        unit: String,
        detail: String,
    },
    #[error("activity {activity_id}: no emission factor for '{activity_type}' in {year}{}", region_suffix(.region))]
    FactorNotFound {
        activity_id: ActivityId,
        activity_type: String,
        year: i32,
        region: Option<String>,
    },
}

fn region_suffix(region: &Option<String>) -> String {
    match region {
        Some(region) => format!(" (region {region})"),
        None => String::new(),
    }
}

impl ActivityError {
    pub fn activity_id(&self) -> &ActivityId {
        match self {
            Self::InvalidActivity { activity_id, .. }
            | Self::UnitConversion { activity_id, .. }
            | Self::FactorNotFound { activity_id, .. } => activity_id,
        }
    }

    pub fn kind(&self) -> WarningKind {
        match self {
            Self::InvalidActivity { .. } => WarningKind::InvalidActivity,
            Self::UnitConversion { .. } => WarningKind::UnitConversion,
            Self::FactorNotFound { .. } => WarningKind::FactorNotFound,
        }
    }

    pub(crate) fn invalid(activity: &Activity, reason: impl Into<String>) -> Self {
        Self::InvalidActivity {
            activity_id: activity.id.clone(),
            reason: reason.into(),
        }
    }
}

/// Canonical view of an activity: its bucket and its quantity in base units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedActivity {
    pub scope: Scope,
    pub category: Option<Scope3Category>,
    pub quantity: Quantity,
}

/// Validates an activity against the project and converts its quantity to base units.
pub fn normalize(
    activity: &Activity,
    project: &ProjectMeta,
) -> Result<NormalizedActivity, ActivityError> {
    if activity.project_id != project.id {
        return Err(ActivityError::invalid(
            activity,
            format!("belongs to project {}", activity.project_id),
        ));
    }

    if !activity.quantity.is_finite() || activity.quantity < 0.0 {
        return Err(ActivityError::invalid(
            activity,
            format!("quantity must be a finite value >= 0, got {}", activity.quantity),
        ));
    }

    let category = match (activity.scope, activity.category) {
        (Scope::Scope3, Some(category)) => Some(category),
        (Scope::Scope3, None) => {
            return Err(ActivityError::invalid(
                activity,
                "scope3 activities require a category",
            ))
        }
        (scope, Some(category)) => {
            return Err(ActivityError::invalid(
                activity,
                format!(
                    "category {} only applies to scope3, activity is {}",
                    category.as_str(),
                    scope.as_str()
                ),
            ))
        }
        (_, None) => None,
    };

    match (activity.emission_factor, activity.factor_unit.as_deref()) {
        (Some(value), Some(_)) if !value.is_finite() || value < 0.0 => {
            return Err(ActivityError::invalid(
                activity,
                format!("emission factor override must be a finite value >= 0, got {value}"),
            ))
        }
        (Some(_), None) | (None, Some(_)) => {
            return Err(ActivityError::invalid(
                activity,
                "emission factor override requires both a value and a unit",
            ))
        }
        _ => {}
    }

    if let Some(score) = activity.data_quality {
        if score > 100 {
            return Err(ActivityError::invalid(
                activity,
                format!("data quality score must be within 0-100, got {score}"),
            ));
        }
    }

    if !(1000..=9999).contains(&activity.year) || !project.covers_year(activity.year) {
        return Err(ActivityError::invalid(
            activity,
            format!(
                "year {} is outside the project span {}-{}",
                activity.year, project.baseline_year, project.reporting_year
            ),
        ));
    }

    let quantity =
        to_base(activity.quantity, &activity.unit).ok_or_else(|| ActivityError::UnitConversion {
            activity_id: activity.id.clone(),
            unit: activity.unit.clone(),
            detail: "unknown unit".to_string(),
        })?;

    Ok(NormalizedActivity {
        scope: activity.scope,
        category,
        quantity,
    })
}
