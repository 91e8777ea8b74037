//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use openair_types::Reading;

/// A reading stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// SQLite row ID.
    pub id: i64,
    /// When this reading was acquired.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Place name reported by the source.
    pub city: String,
    /// Overall air-quality index.
    pub aqi: i64,
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub o3: Option<f64>,
    pub no2: Option<f64>,
    pub so2: Option<f64>,
    pub co: Option<f64>,
    /// Temperature in Celsius.
    pub temperature: Option<f64>,
    /// Pressure in hPa.
    pub pressure: Option<f64>,
    /// Humidity percentage.
    pub humidity: Option<f64>,
    /// Wind speed in m/s.
    pub wind: Option<f64>,
}

impl StoredReading {
    /// Create a StoredReading from a Reading.
    pub fn from_reading(reading: &Reading) -> Self {
        Self {
            id: 0, // Will be set by database
            timestamp: reading.timestamp,
            city: reading.location_label.clone(),
            aqi: reading.aqi,
            pm25: reading.pm25,
            pm10: reading.pm10,
            o3: reading.o3,
            no2: reading.no2,
            so2: reading.so2,
            co: reading.co,
            temperature: reading.temperature_c,
            pressure: reading.pressure,
            humidity: reading.humidity,
            wind: reading.wind_speed,
        }
    }

    /// Convert to a Reading.
    pub fn to_reading(&self) -> Reading {
        Reading {
            timestamp: self.timestamp,
            location_label: self.city.clone(),
            aqi: self.aqi,
            pm25: self.pm25,
            pm10: self.pm10,
            o3: self.o3,
            no2: self.no2,
            so2: self.so2,
            co: self.co,
            temperature_c: self.temperature,
            pressure: self.pressure,
            humidity: self.humidity,
            wind_speed: self.wind,
        }
    }
}

impl From<StoredReading> for Reading {
    fn from(stored: StoredReading) -> Self {
        Reading {
            timestamp: stored.timestamp,
            location_label: stored.city,
            aqi: stored.aqi,
            pm25: stored.pm25,
            pm10: stored.pm10,
            o3: stored.o3,
            no2: stored.no2,
            so2: stored.so2,
            co: stored.co,
            temperature_c: stored.temperature,
            pressure: stored.pressure,
            humidity: stored.humidity,
            wind_speed: stored.wind,
        }
    }
}

/// Whether an upsert created a new hour or overwrote an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The hour had no row yet.
    Inserted,
    /// The hour's row was overwritten.
    Replaced,
}

/// What one maintenance pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Rows older than the retention cutoff.
    pub pruned: usize,
    /// Extra rows sharing an hour with an earlier row.
    pub deduplicated: usize,
}

impl MaintenanceReport {
    /// Total rows deleted.
    pub fn total(&self) -> usize {
        self.pruned + self.deduplicated
    }
}
