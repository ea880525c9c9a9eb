//! Report filtering for the `watch` command.
//!
//! Geographic radius plus magnitude and severity thresholds.

use std::f64::consts::PI;

use crate::models::{QuakeEvent, Severity};

/// Earth radius in kilometers for haversine calculations.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Radius filter around a point.
#[derive(Debug, Clone, Copy)]
pub struct RadiusFilter {
    pub center_lat: f64,
    pub center_lon: f64,
    pub radius_km: f64,
}

impl std::str::FromStr for RadiusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 3 {
            return Err(format!(
                "radius requires 3 values (lat,lon,radius_km), got {}",
                parts.len()
            ));
        }

        let vals: Result<Vec<f64>, _> = parts.iter().map(|p| p.trim().parse::<f64>()).collect();
        let vals = vals.map_err(|e| format!("invalid number in radius: {e}"))?;

        let filter = Self {
            center_lat: vals[0],
            center_lon: vals[1],
            radius_km: vals[2],
        };

        if !(-90.0..=90.0).contains(&filter.center_lat) {
            return Err(format!(
                "latitude {} out of range [-90, 90]",
                filter.center_lat
            ));
        }
        if !(-180.0..=180.0).contains(&filter.center_lon) {
            return Err(format!(
                "longitude {} out of range [-180, 180]",
                filter.center_lon
            ));
        }
        if filter.radius_km <= 0.0 || !filter.radius_km.is_finite() {
            return Err(format!("radius must be positive, got {}", filter.radius_km));
        }

        Ok(filter)
    }
}

impl RadiusFilter {
    /// Check if a point is within the radius using haversine formula.
    #[must_use]
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        haversine_distance(self.center_lat, self.center_lon, lat, lon) <= self.radius_km
    }
}

/// Great-circle distance between two points in kilometers.
#[must_use]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1 * PI / 180.0;
    let lat2_rad = lat2 * PI / 180.0;
    let delta_lat = (lat2 - lat1) * PI / 180.0;
    let delta_lon = (lon2 - lon1) * PI / 180.0;

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Combined filter criteria.
#[derive(Debug, Default, Clone)]
pub struct ReportFilter {
    pub min_magnitude: Option<f64>,
    pub min_severity: Option<Severity>,
    pub radius: Option<RadiusFilter>,
}

impl ReportFilter {
    /// Check if a report passes all filter criteria.
    #[must_use]
    pub fn matches(&self, event: &QuakeEvent) -> bool {
        self.check_magnitude(event) && self.check_severity(event) && self.check_radius(event)
    }

    fn check_magnitude(&self, event: &QuakeEvent) -> bool {
        match self.min_magnitude {
            None => true,
            Some(min) => event.magnitude.is_some_and(|m| m >= min),
        }
    }

    fn check_severity(&self, event: &QuakeEvent) -> bool {
        match self.min_severity {
            None => true,
            Some(min) => event.severity() >= min,
        }
    }

    // Reports without a located epicenter never match a radius filter
    fn check_radius(&self, event: &QuakeEvent) -> bool {
        match (&self.radius, event.coordinates) {
            (None, _) => true,
            (Some(radius), Some(c)) => radius.contains(c.lat, c.lon),
            (Some(_), None) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, TimeZone};

    use super::*;
    use crate::models::{Coordinates, IntensityScale};

    fn event(scale: i32, magnitude: Option<f64>, coordinates: Option<Coordinates>) -> QuakeEvent {
        let jst = FixedOffset::east_opt(9 * 3600).expect("offset");
        QuakeEvent {
            id: None,
            observed_at: jst.with_ymd_and_hms(2024, 1, 1, 16, 10, 0).unwrap(),
            epicenter_name: "test".into(),
            magnitude,
            max_intensity: IntensityScale(scale),
            coordinates,
            depth_km: None,
            domestic_tsunami: None,
        }
    }

    #[test]
    fn test_radius_parse() {
        let radius: RadiusFilter = "35.68,139.69,300".parse().unwrap();
        assert!((radius.center_lat - 35.68).abs() < 0.001);
        assert!((radius.radius_km - 300.0).abs() < 0.001);
        assert!("35.68,139.69".parse::<RadiusFilter>().is_err());
        assert!("35.68,139.69,-5".parse::<RadiusFilter>().is_err());
    }

    #[test]
    fn test_haversine() {
        // Tokyo to Osaka is roughly 400 km
        let distance = haversine_distance(35.6895, 139.6917, 34.6937, 135.5023);
        assert!(distance > 380.0 && distance < 420.0);
    }

    #[test]
    fn test_filter_by_severity_and_magnitude() {
        let filter = ReportFilter {
            min_magnitude: Some(4.0),
            min_severity: Some(Severity::High),
            radius: None,
        };
        assert!(filter.matches(&event(50, Some(5.1), None)));
        assert!(!filter.matches(&event(45, Some(5.1), None)));
        assert!(!filter.matches(&event(60, Some(3.2), None)));
        assert!(!filter.matches(&event(60, None, None)));
    }

    #[test]
    fn test_filter_by_radius() {
        let filter = ReportFilter {
            radius: Some("35.68,139.69,100".parse().unwrap()),
            ..Default::default()
        };
        // Chiba is within 100 km of Tokyo, Osaka is not
        assert!(filter.matches(&event(30, None, Some(Coordinates::new(35.6, 140.1)))));
        assert!(!filter.matches(&event(30, None, Some(Coordinates::new(34.69, 135.50)))));
        assert!(!filter.matches(&event(30, None, None)));
    }
}
