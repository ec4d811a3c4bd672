//! CSV import of activity ledgers and emission factor tables.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use crate::calculation::{
    Activity, ActivityId, CalculationTier, EmissionFactor, ProjectId, Scope, Scope3Category,
};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read export: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("row {row}: invalid {field} '{value}'")]
    InvalidField {
        row: usize,
        field: &'static str,
        value: String,
    },
}

/// Reads activities from a CSV export with a header row.
///
/// Expected columns: `id`, `project_id`, `scope`, `category`, `activity_type`,
/// `quantity`, `unit`, `emission_factor`, `factor_unit`, `tier`, `year`,
/// `facility`, `product`, `data_quality`, `offset`. Optional cells may be blank.
pub fn read_activities<R: Read>(reader: R) -> Result<Vec<Activity>, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut activities = Vec::new();

    for (index, record) in csv_reader.deserialize::<ActivityRow>().enumerate() {
        activities.push(record?.into_activity(index + 1)?);
    }

    Ok(activities)
}

/// Reads an emission factor table. Columns: `activity_type`, `year`, `region`,
/// `value`, `unit`, `source`; a blank region marks a global factor.
pub fn read_emission_factors<R: Read>(reader: R) -> Result<Vec<EmissionFactor>, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut factors = Vec::new();

    for (index, record) in csv_reader.deserialize::<FactorRow>().enumerate() {
        let row = record?;
        if !row.value.is_finite() || row.value < 0.0 {
            return Err(ImportError::InvalidField {
                row: index + 1,
                field: "value",
                value: row.value.to_string(),
            });
        }
        factors.push(EmissionFactor {
            activity_type: row.activity_type,
            year: row.year,
            region: row.region,
            value: row.value,
            unit: row.unit,
            source: row.source,
        });
    }

    Ok(factors)
}

pub fn activities_from_path<P: AsRef<Path>>(path: P) -> Result<Vec<Activity>, ImportError> {
    read_activities(std::fs::File::open(path)?)
}

pub fn emission_factors_from_path<P: AsRef<Path>>(
    path: P,
) -> Result<Vec<EmissionFactor>, ImportError> {
    read_emission_factors(std::fs::File::open(path)?)
}

#[derive(Debug, Deserialize)]
struct ActivityRow {
    id: String,
    project_id: String,
    scope: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    category: Option<String>,
    activity_type: String,
    quantity: f64,
    unit: String,
    #[serde(default)]
    emission_factor: Option<f64>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    factor_unit: Option<String>,
    tier: String,
    year: i32,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    facility: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    product: Option<String>,
    #[serde(default)]
    data_quality: Option<u8>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    offset: Option<String>,
}

impl ActivityRow {
    fn into_activity(self, row: usize) -> Result<Activity, ImportError> {
        let invalid = |field: &'static str, value: &str| ImportError::InvalidField {
            row,
            field,
            value: value.to_string(),
        };

        let scope = Scope::parse(&self.scope).ok_or_else(|| invalid("scope", &self.scope))?;
        let category = match self.category.as_deref() {
            Some(value) => {
                Some(Scope3Category::parse(value).ok_or_else(|| invalid("category", value))?)
            }
            None => None,
        };
        let tier = CalculationTier::parse(&self.tier).ok_or_else(|| invalid("tier", &self.tier))?;
        let offset = match self.offset.as_deref() {
            Some(value) => parse_flag(value).ok_or_else(|| invalid("offset", value))?,
            None => false,
        };

        Ok(Activity {
            id: ActivityId(self.id),
            project_id: ProjectId(self.project_id),
            scope,
            category,
            activity_type: self.activity_type,
            quantity: self.quantity,
            unit: self.unit,
            emission_factor: self.emission_factor,
            factor_unit: self.factor_unit,
            tier,
            year: self.year,
            facility: self.facility,
            product: self.product,
            data_quality: self.data_quality,
            offset,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FactorRow {
    activity_type: String,
    year: i32,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    region: Option<String>,
    value: f64,
    unit: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    source: Option<String>,
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.and_then(|text| {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }))
}
