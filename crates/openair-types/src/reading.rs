//! Normalized air-quality readings.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Duration, OffsetDateTime, UtcOffset};

/// How long persisted readings are kept, and how far back "recent history" reaches.
pub const RETENTION_WINDOW: Duration = Duration::hours(24);

/// One pollutant or ambient measurement carried by a [`Reading`].
///
/// Each variant maps to one key of the API's `iaqi` object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Measure {
    Pm25,
    Pm10,
    O3,
    No2,
    So2,
    Co,
    /// Temperature in degrees Celsius.
    Temperature,
    /// Atmospheric pressure in hPa.
    Pressure,
    /// Relative humidity percentage.
    Humidity,
    /// Wind speed in m/s.
    WindSpeed,
}

impl Measure {
    /// Every measure, in display order.
    pub const ALL: [Measure; 10] = [
        Measure::Pm25,
        Measure::Pm10,
        Measure::O3,
        Measure::No2,
        Measure::So2,
        Measure::Co,
        Measure::Temperature,
        Measure::Pressure,
        Measure::Humidity,
        Measure::WindSpeed,
    ];

    /// Key of this measure inside the API's `iaqi` object.
    #[must_use]
    pub fn iaqi_code(self) -> &'static str {
        match self {
            Measure::Pm25 => "pm25",
            Measure::Pm10 => "pm10",
            Measure::O3 => "o3",
            Measure::No2 => "no2",
            Measure::So2 => "so2",
            Measure::Co => "co",
            Measure::Temperature => "t",
            Measure::Pressure => "p",
            Measure::Humidity => "h",
            Measure::WindSpeed => "w",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Measure::Pm25 => "PM2.5",
            Measure::Pm10 => "PM10",
            Measure::O3 => "O\u{2083}",
            Measure::No2 => "NO\u{2082}",
            Measure::So2 => "SO\u{2082}",
            Measure::Co => "CO",
            Measure::Temperature => "Temperature",
            Measure::Pressure => "Pressure",
            Measure::Humidity => "Humidity",
            Measure::WindSpeed => "Wind",
        }
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One normalized observation.
///
/// `timestamp` is the acquisition time, not the observation time the API
/// reports. Missing sensor values are `None`, never zero.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// When the reading was acquired.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// Place name as reported by the source.
    pub location_label: String,
    /// Overall air-quality index.
    pub aqi: i64,
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub o3: Option<f64>,
    pub no2: Option<f64>,
    pub so2: Option<f64>,
    pub co: Option<f64>,
    /// Temperature in degrees Celsius.
    pub temperature_c: Option<f64>,
    /// Pressure in hPa.
    pub pressure: Option<f64>,
    /// Relative humidity percentage.
    pub humidity: Option<f64>,
    /// Wind speed in m/s.
    pub wind_speed: Option<f64>,
}

impl Reading {
    /// Create a reading with no pollutant or ambient values.
    pub fn new(timestamp: OffsetDateTime, location_label: impl Into<String>, aqi: i64) -> Self {
        Self {
            timestamp,
            location_label: location_label.into(),
            aqi,
            pm25: None,
            pm10: None,
            o3: None,
            no2: None,
            so2: None,
            co: None,
            temperature_c: None,
            pressure: None,
            humidity: None,
            wind_speed: None,
        }
    }

    /// Value of one measure, if the source reported it.
    #[must_use]
    pub fn get(&self, measure: Measure) -> Option<f64> {
        match measure {
            Measure::Pm25 => self.pm25,
            Measure::Pm10 => self.pm10,
            Measure::O3 => self.o3,
            Measure::No2 => self.no2,
            Measure::So2 => self.so2,
            Measure::Co => self.co,
            Measure::Temperature => self.temperature_c,
            Measure::Pressure => self.pressure,
            Measure::Humidity => self.humidity,
            Measure::WindSpeed => self.wind_speed,
        }
    }

    /// Set one measure.
    pub fn set(&mut self, measure: Measure, value: Option<f64>) {
        let slot = match measure {
            Measure::Pm25 => &mut self.pm25,
            Measure::Pm10 => &mut self.pm10,
            Measure::O3 => &mut self.o3,
            Measure::No2 => &mut self.no2,
            Measure::So2 => &mut self.so2,
            Measure::Co => &mut self.co,
            Measure::Temperature => &mut self.temperature_c,
            Measure::Pressure => &mut self.pressure,
            Measure::Humidity => &mut self.humidity,
            Measure::WindSpeed => &mut self.wind_speed,
        };
        *slot = value;
    }

    /// Builder-style variant of [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, measure: Measure, value: f64) -> Self {
        self.set(measure, Some(value));
        self
    }

    /// Hour bucket of this reading's timestamp, seen from `offset`.
    #[must_use]
    pub fn hour_bucket(&self, offset: UtcOffset) -> String {
        hour_bucket(self.timestamp, offset)
    }
}

/// Truncate `timestamp` to its calendar hour in `offset`, formatted as
/// `YYYY-MM-DD HH`.
///
/// This is the same text SQLite's `strftime('%Y-%m-%d %H', ...)` produces,
/// so buckets computed here and in SQL compare equal.
///
/// ```
/// use openair_types::hour_bucket;
/// use time::macros::datetime;
/// use time::UtcOffset;
///
/// let ts = datetime!(2024-03-01 10:59:59 UTC);
/// assert_eq!(hour_bucket(ts, UtcOffset::UTC), "2024-03-01 10");
/// ```
#[must_use]
pub fn hour_bucket(timestamp: OffsetDateTime, offset: UtcOffset) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]");
    let local = timestamp.to_offset(offset);
    // The description has no fallible components, so this cannot fail.
    local.format(&format).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn test_new_reading_has_no_measures() {
        let reading = Reading::new(datetime!(2024-01-01 00:00 UTC), "Here", 10);
        for measure in Measure::ALL {
            assert_eq!(reading.get(measure), None);
        }
    }

    #[test]
    fn test_get_and_set_cover_every_measure() {
        let mut reading = Reading::new(datetime!(2024-01-01 00:00 UTC), "Here", 10);
        for (i, measure) in Measure::ALL.into_iter().enumerate() {
            reading.set(measure, Some(i as f64));
        }
        for (i, measure) in Measure::ALL.into_iter().enumerate() {
            assert_eq!(reading.get(measure), Some(i as f64));
        }
        assert_eq!(reading.temperature_c, Some(6.0));
        assert_eq!(reading.wind_speed, Some(9.0));
    }

    #[test]
    fn test_iaqi_codes_are_unique() {
        let mut codes: Vec<_> = Measure::ALL.iter().map(|m| m.iaqi_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), Measure::ALL.len());
    }

    #[test]
    fn test_hour_bucket_truncates() {
        let ts = datetime!(2024-06-15 10:05:30 UTC);
        assert_eq!(hour_bucket(ts, UtcOffset::UTC), "2024-06-15 10");
        let later = datetime!(2024-06-15 10:50:00 UTC);
        assert_eq!(hour_bucket(ts, UtcOffset::UTC), hour_bucket(later, UtcOffset::UTC));
    }

    #[test]
    fn test_hour_bucket_uses_offset() {
        let ts = datetime!(2024-06-15 23:30 UTC);
        assert_eq!(hour_bucket(ts, offset!(+2)), "2024-06-16 01");
        assert_eq!(hour_bucket(ts, offset!(-7)), "2024-06-15 16");
    }

    #[test]
    fn test_retention_window_is_a_day() {
        assert_eq!(RETENTION_WINDOW.whole_hours(), 24);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_reading_serialization_keeps_nulls() {
        let reading = Reading::new(datetime!(2024-01-01 12:00 UTC), "Paris", 42)
            .with(Measure::Pm25, 12.0);
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["aqi"], 42);
        assert_eq!(json["pm25"], 12.0);
        assert!(json["so2"].is_null());

        let back: Reading = serde_json::from_value(json).unwrap();
        assert_eq!(back, reading);
    }
}
