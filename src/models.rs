//! Data models for the quake feed, weather and warnings.
//!
//! Wire structures match the P2P地震情報 v2 JSON format; `QuakeEvent` is the
//! normalized form the rest of the crate works with.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::errors::QuakedeckError;

/// Feed discriminant for JMA earthquake reports.
pub const JMA_QUAKE_CODE: u64 = 551;

/// Intensity thresholds (inclusive) for each severity tier.
pub const SEVERE_SCALE: i32 = 60;
pub const HIGH_SCALE: i32 = 50;
pub const MODERATE_SCALE: i32 = 30;

/// JST offset used by every timestamp in the feed.
const JST_OFFSET_SECS: i32 = 9 * 3600;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Both components are finite and within geographic range.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// JMA seismic intensity as the P2P integer code (`10` = 1 … `70` = 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntensityScale(pub i32);

impl IntensityScale {
    /// Human-readable shindo label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self.0 {
            10 => "1",
            20 => "2",
            30 => "3",
            40 => "4",
            45 => "5-",
            46 => "5- or above (est.)",
            50 => "5+",
            55 => "6-",
            60 => "6+",
            70 => "7",
            _ => "?",
        }
    }

    #[must_use]
    pub fn severity(self) -> Severity {
        Severity::from_scale(self)
    }
}

/// Display tier derived from the maximum intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Moderate,
    High,
    Severe,
}

impl Severity {
    /// Classify an intensity code. Boundaries belong to the higher tier.
    #[must_use]
    pub fn from_scale(scale: IntensityScale) -> Self {
        match scale.0 {
            s if s >= SEVERE_SCALE => Self::Severe,
            s if s >= HIGH_SCALE => Self::High,
            s if s >= MODERATE_SCALE => Self::Moderate,
            _ => Self::Low,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Severe => "severe",
        }
    }

    /// CSS class used by the dashboard list items.
    #[must_use]
    pub const fn css_class(self) -> &'static str {
        match self {
            Self::Low => "shindo-1",
            Self::Moderate => "shindo-3",
            Self::High => "shindo-5",
            Self::Severe => "shindo-6",
        }
    }

    /// Marker colour on the map.
    #[must_use]
    pub const fn color(self) -> &'static str {
        match self {
            Self::Low => "#2ecc71",
            Self::Moderate => "#f1c40f",
            Self::High => "#f39c12",
            Self::Severe => "#e74c3c",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "moderate" => Ok(Self::Moderate),
            "high" => Ok(Self::High),
            "severe" => Ok(Self::Severe),
            _ => Err(format!(
                "unknown severity: {s} (expected: low, moderate, high, severe)"
            )),
        }
    }
}

/// A JMA earthquake report, normalized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuakeEvent {
    /// Report id, used to drop re-delivered reports
    pub id: Option<String>,
    pub observed_at: DateTime<FixedOffset>,
    pub epicenter_name: String,
    pub magnitude: Option<f64>,
    pub max_intensity: IntensityScale,
    pub coordinates: Option<Coordinates>,
    pub depth_km: Option<f64>,
    pub domestic_tsunami: Option<String>,
}

impl QuakeEvent {
    #[must_use]
    pub fn severity(&self) -> Severity {
        self.max_intensity.severity()
    }

    /// `2024/01/01 16:10` style time as shown in the feed's own timezone.
    #[must_use]
    pub fn time_label(&self) -> String {
        self.observed_at.format("%Y/%m/%d %H:%M:%S").to_string()
    }
}

// ============================================================================
// P2P地震情報 wire format
// ============================================================================

/// `code: 551` message body.
#[derive(Debug, Clone, Deserialize)]
pub struct JmaQuakeReport {
    pub code: u64,

    #[serde(default)]
    pub id: Option<String>,

    /// Some feed revisions carry the id under `_id`
    #[serde(default, rename = "_id")]
    pub legacy_id: Option<String>,

    pub earthquake: Earthquake,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Earthquake {
    /// `YYYY/MM/DD HH:MM:SS`, JST
    pub time: String,

    pub hypocenter: Hypocenter,

    #[serde(rename = "maxScale", default = "unknown_value")]
    pub max_scale: i32,

    #[serde(rename = "domesticTsunami", default)]
    pub domestic_tsunami: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hypocenter {
    #[serde(default)]
    pub name: String,

    /// `-200` when unknown
    #[serde(default = "unknown_coordinate")]
    pub latitude: f64,

    /// `-200` when unknown
    #[serde(default = "unknown_coordinate")]
    pub longitude: f64,

    /// `-1` when unknown
    #[serde(default = "unknown_measure")]
    pub depth: f64,

    /// `-1` when unknown
    #[serde(default = "unknown_measure")]
    pub magnitude: f64,
}

fn unknown_value() -> i32 {
    -1
}

fn unknown_coordinate() -> f64 {
    -200.0
}

fn unknown_measure() -> f64 {
    -1.0
}

impl JmaQuakeReport {
    /// Convert to a `QuakeEvent`, mapping sentinel values to `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the discriminant is wrong or the time cannot be parsed.
    pub fn into_event(self) -> Result<QuakeEvent, QuakedeckError> {
        if self.code != JMA_QUAKE_CODE {
            return Err(QuakedeckError::Validation(format!(
                "expected code {JMA_QUAKE_CODE}, got {}",
                self.code
            )));
        }

        let quake = self.earthquake;
        let observed_at = parse_jst(&quake.time)?;
        let hypo = quake.hypocenter;

        let coordinates = Some(Coordinates::new(hypo.latitude, hypo.longitude))
            .filter(|c| c.is_valid());
        let epicenter_name = if hypo.name.trim().is_empty() {
            "Unknown epicenter".to_string()
        } else {
            hypo.name
        };

        Ok(QuakeEvent {
            id: self.id.or(self.legacy_id).filter(|id| !id.is_empty()),
            observed_at,
            epicenter_name,
            magnitude: Some(hypo.magnitude).filter(|m| *m >= 0.0),
            max_intensity: IntensityScale(quake.max_scale),
            coordinates,
            depth_km: Some(hypo.depth).filter(|d| *d >= 0.0),
            domestic_tsunami: quake.domestic_tsunami,
        })
    }
}

/// Parse a feed timestamp (with or without milliseconds) as JST.
fn parse_jst(raw: &str) -> Result<DateTime<FixedOffset>, QuakedeckError> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y/%m/%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y/%m/%d %H:%M:%S%.f"))
        .map_err(|e| QuakedeckError::Validation(format!("bad time '{raw}': {e}")))?;

    let jst = FixedOffset::east_opt(JST_OFFSET_SECS)
        .ok_or_else(|| QuakedeckError::Validation("invalid JST offset".into()))?;

    jst.from_local_datetime(&naive)
        .single()
        .ok_or_else(|| QuakedeckError::Validation(format!("ambiguous time '{raw}'")))
}

// ============================================================================
// Weather and warnings
// ============================================================================

/// Current conditions at the focus location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherSnapshot {
    pub location_label: String,
    pub temperature_c: f64,
    pub wind_speed: f64,
    pub description: String,
}

/// One active JMA warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarningEntry {
    pub area_name: String,
    pub warning_name: String,
}
