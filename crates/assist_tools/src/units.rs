use std::{fmt, str::FromStr};

use anyhow::anyhow;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn symbol(self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "°C",
            TemperatureUnit::Fahrenheit => "°F",
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for TemperatureUnit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('°').to_ascii_lowercase().as_str() {
            "c" | "celsius" => Ok(TemperatureUnit::Celsius),
            "f" | "fahrenheit" => Ok(TemperatureUnit::Fahrenheit),
            _ => Err(anyhow!("unknown temperature unit: {}", s)),
        }
    }
}

/// Converts temperatures into a single display unit.
#[derive(Clone, Copy, Debug)]
pub struct UnitNormalizer {
    display: TemperatureUnit,
}

impl Default for UnitNormalizer {
    fn default() -> Self {
        Self::new(TemperatureUnit::Fahrenheit)
    }
}

impl UnitNormalizer {
    pub fn new(display: TemperatureUnit) -> Self {
        Self { display }
    }

    pub fn display_unit(&self) -> TemperatureUnit {
        self.display
    }

    /// Expresses `value`, measured in `source`, in the display unit. No
    /// rounding is applied.
    pub fn normalize(&self, value: Option<f64>, source: TemperatureUnit) -> Option<f64> {
        let value = value?;

        Some(match (source, self.display) {
            (TemperatureUnit::Celsius, TemperatureUnit::Fahrenheit) => value * 9.0 / 5.0 + 32.0,
            (TemperatureUnit::Fahrenheit, TemperatureUnit::Celsius) => (value - 32.0) * 5.0 / 9.0,
            _ => value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn celsius_is_converted_to_fahrenheit() {
        let normalizer = UnitNormalizer::default();
        assert_eq!(normalizer.normalize(Some(0.0), TemperatureUnit::Celsius), Some(32.0));
        assert_eq!(normalizer.normalize(Some(100.0), TemperatureUnit::Celsius), Some(212.0));
        assert_eq!(normalizer.normalize(Some(-40.0), TemperatureUnit::Celsius), Some(-40.0));
    }

    #[test]
    fn display_unit_passes_through() {
        let normalizer = UnitNormalizer::default();
        assert_eq!(normalizer.normalize(Some(98.6), TemperatureUnit::Fahrenheit), Some(98.6));
    }

    #[test]
    fn missing_value_stays_missing() {
        assert_eq!(UnitNormalizer::default().normalize(None, TemperatureUnit::Celsius), None);
    }

    #[test]
    fn celsius_display_unit() {
        let normalizer = UnitNormalizer::new(TemperatureUnit::Celsius);
        assert_eq!(normalizer.normalize(Some(212.0), TemperatureUnit::Fahrenheit), Some(100.0));
        assert_eq!(normalizer.normalize(Some(21.5), TemperatureUnit::Celsius), Some(21.5));
    }

    #[test]
    fn parses_unit_spellings() {
        assert_eq!("°C".parse::<TemperatureUnit>().unwrap(), TemperatureUnit::Celsius);
        assert_eq!("F".parse::<TemperatureUnit>().unwrap(), TemperatureUnit::Fahrenheit);
        assert_eq!("Celsius".parse::<TemperatureUnit>().unwrap(), TemperatureUnit::Celsius);
        assert!("K".parse::<TemperatureUnit>().is_err());
    }
}
