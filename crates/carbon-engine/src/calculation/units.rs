use std::fmt;

use serde::{Deserialize, Serialize};

/// Currencies recognised for spend-based factors. Each is its own dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    Jpy,
    Usd,
    Eur,
}

/// Physical (or monetary) dimension of a quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Mass,
    Energy,
    Volume,
    Distance,
    PassengerDistance,
    FreightDistance,
    Count,
    Currency(Currency),
}

impl Dimension {
    /// Canonical unit every quantity of this dimension is converted to.
    pub const fn base_unit(self) -> &'static str {
        match self {
            Self::Mass => "kg",
            Self::Energy => "kWh",
            Self::Volume => "l",
            Self::Distance => "km",
            Self::PassengerDistance => "passenger_km",
            Self::FreightDistance => "tonne_km",
            Self::Count => "item",
            Self::Currency(Currency::Jpy) => "JPY",
            Self::Currency(Currency::Usd) => "USD",
            Self::Currency(Currency::Eur) => "EUR",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Mass => "mass",
            Self::Energy => "energy",
            Self::Volume => "volume",
            Self::Distance => "distance",
            Self::PassengerDistance => "passenger distance",
            Self::FreightDistance => "freight distance",
            Self::Count => "count",
            Self::Currency(_) => "currency",
        };
        write!(f, "{label} ({})", self.base_unit())
    }
}

/// A unit resolved against the conversion table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitSpec {
    pub dimension: Dimension,
    /// Multiplier converting one of this unit into the dimension's base unit.
    pub to_base: f64,
}

/// Quantity expressed in the base unit of its dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub dimension: Dimension,
}

const UNIT_TABLE: &[(&[&str], Dimension, f64)] = &[
    (&["g", "gram", "grams"], Dimension::Mass, 0.001),
    (&["kg", "kilogram", "kilograms"], Dimension::Mass, 1.0),
    (&["t", "tonne", "tonnes", "ton", "metric_ton"], Dimension::Mass, 1_000.0),
    (&["lb", "lbs", "pound", "pounds"], Dimension::Mass, 0.453_592_37),
    (&["wh"], Dimension::Energy, 0.001),
    (&["kwh"], Dimension::Energy, 1.0),
    (&["mwh"], Dimension::Energy, 1_000.0),
    (&["gwh"], Dimension::Energy, 1_000_000.0),
    (&["mj"], Dimension::Energy, 1.0 / 3.6),
    (&["gj"], Dimension::Energy, 1_000.0 / 3.6),
    (&["therm", "therms"], Dimension::Energy, 29.307_107),
    (&["ml"], Dimension::Volume, 0.001),
    (&["l", "litre", "liter", "litres", "liters"], Dimension::Volume, 1.0),
    (&["kl"], Dimension::Volume, 1_000.0),
    (&["m3", "m³", "cubic_meter", "cubic_metre"], Dimension::Volume, 1_000.0),
    (&["gal", "gallon", "gallons", "us_gal"], Dimension::Volume, 3.785_411_784),
    (&["m", "meter", "metre"], Dimension::Distance, 0.001),
    (&["km", "kilometer", "kilometre"], Dimension::Distance, 1.0),
    (&["mi", "mile", "miles"], Dimension::Distance, 1.609_344),
    (&["passenger_km", "pkm", "p_km"], Dimension::PassengerDistance, 1.0),
    (&["passenger_mi", "pmi"], Dimension::PassengerDistance, 1.609_344),
    (&["tonne_km", "tkm", "t_km"], Dimension::FreightDistance, 1.0),
    (&["item", "items", "unit", "units", "pcs", "piece", "pieces"], Dimension::Count, 1.0),
    (&["jpy", "yen"], Dimension::Currency(Currency::Jpy), 1.0),
    (&["thousand_jpy", "kjpy"], Dimension::Currency(Currency::Jpy), 1_000.0),
    (&["million_jpy", "mjpy"], Dimension::Currency(Currency::Jpy), 1_000_000.0),
    (&["usd"], Dimension::Currency(Currency::Usd), 1.0),
    (&["thousand_usd", "kusd"], Dimension::Currency(Currency::Usd), 1_000.0),
    (&["eur"], Dimension::Currency(Currency::Eur), 1.0),
    (&["thousand_eur", "keur"], Dimension::Currency(Currency::Eur), 1_000.0),
];

pub(crate) fn normalize_unit(value: &str) -> String {
    let cleaned = value.replace(['\u{feff}', '\u{200b}'], "");
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    collapsed.replace('-', "_").to_lowercase()
}

/// Looks up a unit by any of its aliases; matching ignores case and surrounding whitespace.
pub fn lookup_unit(unit: &str) -> Option<UnitSpec> {
    let key = normalize_unit(unit);
    UNIT_TABLE
        .iter()
        .find(|(aliases, _, _)| aliases.contains(&key.as_str()))
        .map(|(_, dimension, to_base)| UnitSpec {
            dimension: *dimension,
            to_base: *to_base,
        })
}

/// Converts a raw quantity into the base unit of its dimension.
pub fn to_base(quantity: f64, unit: &str) -> Option<Quantity> {
    lookup_unit(unit).map(|spec| Quantity {
        value: quantity * spec.to_base,
        dimension: spec.dimension,
    })
}

/// Parsed `<mass>CO2e/<unit>` factor unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactorUnit {
    /// Multiplier converting the numerator mass into tonnes.
    pub tonnes_per_numerator: f64,
    pub denominator: UnitSpec,
}

impl FactorUnit {
    pub fn parse(unit: &str) -> Option<Self> {
        let (numerator, denominator) = unit.split_once('/')?;
        let numerator = normalize_unit(numerator);
        let mass = numerator
            .strip_suffix("co2e")
            .or_else(|| numerator.strip_suffix("co2eq"))
            .or_else(|| numerator.strip_suffix("co2"))?
            .trim_end_matches('_');

        let tonnes_per_numerator = match mass {
            "g" => 1e-6,
            "kg" => 1e-3,
            "t" | "tonne" | "tonnes" => 1.0,
            _ => return None,
        };

        Some(Self {
            tonnes_per_numerator,
            denominator: lookup_unit(denominator)?,
        })
    }

    /// Tonnes CO2e emitted per base unit of the denominator dimension.
    pub fn tonnes_per_base_unit(&self, value: f64) -> f64 {
        value * self.tonnes_per_numerator / self.denominator.to_base
    }
}
