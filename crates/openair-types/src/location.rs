//! Canonical location keys.
//!
//! A [`LocationKey`] is the only form in which a place enters the rest of the
//! system. Coordinates are rounded to three decimal places exactly once, when
//! the key is built, which bounds cache-key cardinality and matches the
//! resolution the remote API actually serves.

use core::fmt;
use core::str::FromStr;

use crate::error::{LocationError, LocationResult};

/// Number of decimal places kept for latitude and longitude.
pub const COORDINATE_PRECISION: i32 = 3;

/// Canonical form of a place query.
///
/// # Examples
///
/// ```
/// use openair_types::LocationKey;
///
/// let key = LocationKey::parse("37.77493,-122.41942").unwrap();
/// assert_eq!(key.to_string(), "37.775;-122.419");
///
/// let key = LocationKey::parse("San Francisco").unwrap();
/// assert_eq!(key.to_string(), "San Francisco");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum LocationKey {
    /// A free-text place name, passed verbatim to the remote query.
    Name(String),
    /// A coordinate pair, already rounded to [`COORDINATE_PRECISION`] decimals.
    Coordinates { latitude: f64, longitude: f64 },
}

impl LocationKey {
    /// Build a key from raw coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError::InvalidCoordinate`] if either value is
    /// non-finite, or latitude is outside `[-90, 90]`, or longitude is outside
    /// `[-180, 180]`.
    pub fn from_coordinates(latitude: f64, longitude: f64) -> LocationResult<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);

        if !valid {
            return Err(LocationError::InvalidCoordinate {
                latitude,
                longitude,
            });
        }

        Ok(Self::Coordinates {
            latitude: round_coordinate(latitude),
            longitude: round_coordinate(longitude),
        })
    }

    /// Build a key from a place name.
    ///
    /// The name is kept verbatim (no trimming or case-folding); the API is
    /// case-insensitive and echoes back its own canonical label.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError::EmptyLocation`] if the trimmed text is empty.
    pub fn from_name(text: &str) -> LocationResult<Self> {
        if text.trim().is_empty() {
            return Err(LocationError::EmptyLocation);
        }
        Ok(Self::Name(text.to_string()))
    }

    /// Parse raw user input.
    ///
    /// Input of the form `<number>,<number>` (each optionally signed and
    /// optionally fractional) is treated as `latitude,longitude`. The key's
    /// own `lat;lon` rendering is accepted too, so a key survives a trip
    /// through its string form. Anything else is a place name.
    pub fn parse(raw: &str) -> LocationResult<Self> {
        match split_coordinates(raw.trim()) {
            Some((latitude, longitude)) => Self::from_coordinates(latitude, longitude),
            None => Self::from_name(raw),
        }
    }

    /// Returns true if this key is a coordinate pair.
    pub fn is_coordinates(&self) -> bool {
        matches!(self, Self::Coordinates { .. })
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Coordinates {
                latitude,
                longitude,
            } => write!(f, "{:.3};{:.3}", latitude, longitude),
        }
    }
}

impl FromStr for LocationKey {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for LocationKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for LocationKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Round to [`COORDINATE_PRECISION`] decimals. Idempotent; `-0.0` becomes `0.0`.
fn round_coordinate(value: f64) -> f64 {
    let scale = 10f64.powi(COORDINATE_PRECISION);
    (value * scale).round() / scale + 0.0
}

fn split_coordinates(raw: &str) -> Option<(f64, f64)> {
    let (lat, lon) = raw.split_once(',').or_else(|| raw.split_once(';'))?;
    if !is_decimal(lat) || !is_decimal(lon) {
        return None;
    }
    Some((lat.parse().ok()?, lon.parse().ok()?))
}

/// Matches `[+-]?digits(.digits)?`.
fn is_decimal(s: &str) -> bool {
    let unsigned = s.strip_prefix(['-', '+']).unwrap_or(s);
    let (int, frac) = match unsigned.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (unsigned, None),
    };
    let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    all_digits(int) && frac.is_none_or(all_digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_coordinates_rounds_to_three_decimals() {
        let key = LocationKey::from_coordinates(37.774929, -122.419416).unwrap();
        assert_eq!(
            key,
            LocationKey::Coordinates {
                latitude: 37.775,
                longitude: -122.419
            }
        );
        assert_eq!(key.to_string(), "37.775;-122.419");
    }

    #[test]
    fn test_from_coordinates_rejects_out_of_range() {
        assert!(matches!(
            LocationKey::from_coordinates(90.5, 0.0),
            Err(LocationError::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            LocationKey::from_coordinates(0.0, -180.01),
            Err(LocationError::InvalidCoordinate { .. })
        ));
    }

    #[test]
    fn test_from_coordinates_rejects_non_finite() {
        assert!(LocationKey::from_coordinates(f64::NAN, 0.0).is_err());
        assert!(LocationKey::from_coordinates(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_from_coordinates_accepts_bounds() {
        let key = LocationKey::from_coordinates(-90.0, 180.0).unwrap();
        assert_eq!(key.to_string(), "-90.000;180.000");
    }

    #[test]
    fn test_negative_zero_is_normalized() {
        let key = LocationKey::from_coordinates(-0.0001, 0.0).unwrap();
        assert_eq!(key.to_string(), "0.000;0.000");
    }

    #[test]
    fn test_from_name_keeps_text_verbatim() {
        let key = LocationKey::from_name("  new YORK ").unwrap();
        assert_eq!(key, LocationKey::Name("  new YORK ".to_string()));
    }

    #[test]
    fn test_from_name_rejects_blank() {
        assert_eq!(
            LocationKey::from_name("   "),
            Err(LocationError::EmptyLocation)
        );
        assert_eq!(LocationKey::from_name(""), Err(LocationError::EmptyLocation));
    }

    #[test]
    fn test_parse_coordinates() {
        let key = LocationKey::parse("51.5074,-0.1278").unwrap();
        assert_eq!(key.to_string(), "51.507;-0.128");

        let key = LocationKey::parse("+10,20").unwrap();
        assert_eq!(key.to_string(), "10.000;20.000");
    }

    #[test]
    fn test_parse_invalid_coordinates_are_rejected() {
        assert!(matches!(
            LocationKey::parse("95.0,10.0"),
            Err(LocationError::InvalidCoordinate { .. })
        ));
    }

    #[test]
    fn test_parse_names() {
        assert!(!LocationKey::parse("Beijing").unwrap().is_coordinates());
        // Not a strict number pair, so it's a name.
        assert!(!LocationKey::parse("12a,34").unwrap().is_coordinates());
        assert!(!LocationKey::parse("1.,2").unwrap().is_coordinates());
        assert!(!LocationKey::parse("1,2,3").unwrap().is_coordinates());
        assert_eq!(LocationKey::parse(" "), Err(LocationError::EmptyLocation));
    }

    #[test]
    fn test_parse_own_rendering_round_trips() {
        let key = LocationKey::from_coordinates(35.6895, 139.6917).unwrap();
        let reparsed = LocationKey::parse(&key.to_string()).unwrap();
        assert_eq!(key, reparsed);
    }

    #[test]
    fn test_from_str() {
        let key: LocationKey = "48.8566,2.3522".parse().unwrap();
        assert!(key.is_coordinates());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_as_string() {
        let key = LocationKey::from_coordinates(1.23456, 2.34567).unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"1.235;2.346\"");
        let back: LocationKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
