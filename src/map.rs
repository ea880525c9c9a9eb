//! Map model pushed to the browser.
//!
//! The server keeps the authoritative view and marker set. The page recenters
//! only when `view_revision` moves and redraws markers when they change, so
//! the user's own pan and zoom survive new reports.

use serde::Serialize;

use crate::models::{Coordinates, Severity};

/// Whole-Japan view shown on startup.
pub const INITIAL_CENTER: Coordinates = Coordinates::new(36.2, 138.3);
pub const INITIAL_ZOOM: u8 = 5;

/// Zoom used when the user focuses a location.
pub const FOCUS_ZOOM: u8 = 8;

/// Smallest marker radius in pixels.
const MIN_MARKER_RADIUS: f64 = 6.0;

/// Something that can show a view and point annotations.
pub trait MapView {
    /// Recenter and rescale.
    fn set_view(&mut self, lat: f64, lon: f64, zoom: u8);

    /// Place a marker with a popup shown on interaction.
    fn add_marker(&mut self, lat: f64, lon: f64, popup_html: String, style: StyleHint);

    /// Remove every marker added so far.
    fn clear_markers(&mut self);
}

/// Marker size and colour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StyleHint {
    pub radius: f64,
    pub color: &'static str,
}

impl StyleHint {
    /// Radius grows with magnitude, colour follows severity.
    #[must_use]
    pub fn for_quake(magnitude: Option<f64>, severity: Severity) -> Self {
        Self {
            radius: (magnitude.unwrap_or(0.0) * 3.0).max(MIN_MARKER_RADIUS),
            color: severity.color(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub lat: f64,
    pub lon: f64,
    pub popup_html: String,
    pub style: StyleHint,
}

/// Serializable state of the map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapSnapshot {
    pub center: Coordinates,
    pub zoom: u8,
    pub markers: Vec<Marker>,
    /// Bumped by `set_view` only
    pub view_revision: u64,
    /// Bumped on every change
    pub revision: u64,
}

/// The recenter part of a snapshot, sent on its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewFocus {
    pub center: Coordinates,
    pub zoom: u8,
    pub revision: u64,
}

impl MapSnapshot {
    #[must_use]
    pub fn focus(&self) -> ViewFocus {
        ViewFocus {
            center: self.center,
            zoom: self.zoom,
            revision: self.view_revision,
        }
    }
}

/// In-memory `MapView`; lives only for the session.
#[derive(Debug, Clone)]
pub struct MapLayer {
    snapshot: MapSnapshot,
}

impl MapLayer {
    #[must_use]
    pub fn new(center: Coordinates, zoom: u8) -> Self {
        Self {
            snapshot: MapSnapshot {
                center,
                zoom,
                markers: Vec::new(),
                view_revision: 0,
                revision: 0,
            },
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> &MapSnapshot {
        &self.snapshot
    }

    fn touch(&mut self) {
        self.snapshot.revision += 1;
    }
}

impl Default for MapLayer {
    fn default() -> Self {
        Self::new(INITIAL_CENTER, INITIAL_ZOOM)
    }
}

impl MapView for MapLayer {
    fn set_view(&mut self, lat: f64, lon: f64, zoom: u8) {
        self.snapshot.center = Coordinates::new(lat, lon);
        self.snapshot.zoom = zoom;
        self.snapshot.view_revision += 1;
        self.touch();
    }

    fn add_marker(&mut self, lat: f64, lon: f64, popup_html: String, style: StyleHint) {
        self.snapshot.markers.push(Marker {
            lat,
            lon,
            popup_html,
            style,
        });
        self.touch();
    }

    fn clear_markers(&mut self) {
        if !self.snapshot.markers.is_empty() {
            self.snapshot.markers.clear();
            self.touch();
        }
    }
}
