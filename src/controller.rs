//! Dashboard state machine.
//!
//! `DashboardController` owns every piece of mutable dashboard state. It never
//! performs I/O: operations that need the network hand back a request
//! (`WeatherRequest`, `ToggleOutcome::PermissionNeeded`) for the runtime to
//! execute, and the result comes back through another call. This keeps the
//! whole thing testable without sockets or timers.

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dedup::ReportDedup;
use crate::errors::{FetchError, QuakedeckError};
use crate::map::{FOCUS_ZOOM, MapView, StyleHint};
use crate::models::{Coordinates, QuakeEvent, Severity, WarningEntry, WeatherSnapshot};
use crate::render;

/// Bounds for the quake history length.
pub const MIN_HISTORY: usize = 20;
pub const MAX_HISTORY: usize = 50;

/// A selectable area with fixed coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Area {
    pub name: &'static str,
    pub coordinates: Coordinates,
}

/// Areas offered by the dashboard's area selector.
pub const AREAS: [Area; 5] = [
    Area { name: "東京", coordinates: Coordinates::new(35.6895, 139.6917) },
    Area { name: "大阪", coordinates: Coordinates::new(34.6937, 135.5023) },
    Area { name: "札幌", coordinates: Coordinates::new(43.0618, 141.3545) },
    Area { name: "福岡", coordinates: Coordinates::new(33.5902, 130.4017) },
    Area { name: "那覇", coordinates: Coordinates::new(26.2124, 127.6809) },
];

#[must_use]
pub fn find_area(name: &str) -> Option<&'static Area> {
    AREAS.iter().find(|a| a.name == name.trim())
}

/// Desktop notification permission as reported by the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Permission {
    /// Not asked yet
    #[default]
    Default,
    Granted,
    Denied,
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "granted" => Ok(Self::Granted),
            "denied" => Ok(Self::Denied),
            _ => Err(format!("unknown permission: {s}")),
        }
    }
}

/// User-controlled settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardState {
    pub focus: Coordinates,
    pub area: Option<String>,
    pub notify_enabled: bool,
    pub api_key: Option<String>,
}

impl Default for DashboardState {
    fn default() -> Self {
        let first = AREAS[0];
        Self {
            focus: first.coordinates,
            area: Some(first.name.to_string()),
            notify_enabled: false,
            api_key: None,
        }
    }
}

/// What the weather panel shows.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum WeatherPanel {
    #[default]
    Loading,
    Ready(WeatherSnapshot),
    CredentialMissing,
    Unavailable,
}

/// What the warnings panel shows.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum WarningsPanel {
    #[default]
    Loading,
    /// Possibly empty: an empty list means "no warnings"
    Active(Vec<WarningEntry>),
    Unavailable,
}

/// A weather fetch the runtime should perform.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherRequest {
    /// Only the response carrying the latest token is applied
    pub token: u64,
    pub lat: f64,
    pub lon: f64,
    pub api_key: Option<String>,
}

/// A desktop notification to raise.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuakeOutcome {
    /// Report id already seen; nothing changed
    Duplicate,
    Applied {
        notification: Option<Notification>,
        /// Strong enough for the audible alert
        alert: bool,
        evicted: Option<QuakeEvent>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Enabled,
    Disabled,
    /// Flag is on but the browser must be asked first
    PermissionNeeded,
}

/// Bounded, newest-first quake list.
#[derive(Debug, Clone)]
pub struct QuakeHistory {
    entries: VecDeque<QuakeEvent>,
    capacity: usize,
}

impl QuakeHistory {
    /// Capacity is clamped to `[MIN_HISTORY, MAX_HISTORY]`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(MIN_HISTORY, MAX_HISTORY);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepend, returning the evicted oldest entry when full.
    pub fn push(&mut self, event: QuakeEvent) -> Option<QuakeEvent> {
        self.entries.push_front(event);
        let evicted = if self.entries.len() > self.capacity {
            self.entries.pop_back()
        } else {
            None
        };
        debug_assert!(self.entries.len() <= self.capacity);
        evicted
    }

    #[must_use]
    pub fn latest(&self) -> Option<&QuakeEvent> {
        self.entries.front()
    }

    /// Newest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &QuakeEvent> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Static controller settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub history_capacity: usize,
    /// Weather provider needs an API key
    pub credential_required: bool,
    /// Notifications fire only at or above this tier
    pub min_notify_severity: Severity,
    /// The alert sound plays at or above this tier, notify flag or not
    pub min_alert_severity: Severity,
    pub initial_state: DashboardState,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            history_capacity: MIN_HISTORY,
            credential_required: false,
            min_notify_severity: Severity::High,
            min_alert_severity: Severity::High,
            initial_state: DashboardState::default(),
        }
    }
}

pub struct DashboardController<M: MapView> {
    state: DashboardState,
    map: M,
    history: QuakeHistory,
    seen: ReportDedup,
    weather: WeatherPanel,
    warnings: WarningsPanel,
    permission: Permission,
    credential_required: bool,
    min_notify_severity: Severity,
    min_alert_severity: Severity,
    latest_token: u64,
    last_updated: Option<DateTime<Local>>,
}

impl<M: MapView> DashboardController<M> {
    #[must_use]
    pub fn new(config: ControllerConfig, map: M) -> Self {
        Self {
            state: config.initial_state,
            map,
            history: QuakeHistory::new(config.history_capacity),
            seen: ReportDedup::with_default_capacity(),
            weather: WeatherPanel::default(),
            warnings: WarningsPanel::default(),
            permission: Permission::default(),
            credential_required: config.credential_required,
            min_notify_severity: config.min_notify_severity,
            min_alert_severity: config.min_alert_severity,
            latest_token: 0,
            last_updated: None,
        }
    }

    // ------------------------------------------------------------------
    // Quakes
    // ------------------------------------------------------------------

    /// Apply a quake report from the feed.
    pub fn on_quake(&mut self, event: QuakeEvent) -> QuakeOutcome {
        if let Some(id) = event.id.as_deref() {
            if !self.seen.check_and_mark(id) {
                debug!(id, seen = self.seen.len(), "skipping re-delivered report");
                return QuakeOutcome::Duplicate;
            }
        }

        let notification = self.notification_for(&event);
        let alert = event.severity() >= self.min_alert_severity;

        info!(
            epicenter = %event.epicenter_name,
            scale = event.max_intensity.label(),
            severity = event.severity().as_str(),
            "quake report applied"
        );

        let newest_marker = event.coordinates.map(|c| {
            (c, render::quake_popup(&event), StyleHint::for_quake(event.magnitude, event.severity()))
        });
        let evicted = self.history.push(event);

        if evicted.is_some() {
            self.rebuild_markers();
        } else if let Some((c, popup, style)) = newest_marker {
            self.map.add_marker(c.lat, c.lon, popup, style);
        }

        self.touch_updated();
        QuakeOutcome::Applied {
            notification,
            alert,
            evicted,
        }
    }

    /// Empty the history and the map markers.
    pub fn clear_quakes(&mut self) {
        self.history.clear();
        self.map.clear_markers();
    }

    fn rebuild_markers(&mut self) {
        self.map.clear_markers();
        for event in self.history.iter().rev() {
            if let Some(c) = event.coordinates {
                self.map.add_marker(
                    c.lat,
                    c.lon,
                    render::quake_popup(event),
                    StyleHint::for_quake(event.magnitude, event.severity()),
                );
            }
        }
    }

    fn notification_for(&self, event: &QuakeEvent) -> Option<Notification> {
        if !self.state.notify_enabled || self.permission != Permission::Granted {
            return None;
        }
        if event.severity() < self.min_notify_severity {
            return None;
        }

        let magnitude = event
            .magnitude
            .map_or_else(|| "M?".to_string(), |m| format!("M{m:.1}"));

        Some(Notification {
            title: "Earthquake detected".to_string(),
            body: format!(
                "{} {} {} / max intensity {}",
                event.time_label(),
                event.epicenter_name,
                magnitude,
                event.max_intensity.label()
            ),
            severity: event.severity(),
        })
    }

    // ------------------------------------------------------------------
    // Location and weather
    // ------------------------------------------------------------------

    /// Apply the location form, then begin a weather refresh.
    ///
    /// Valid coordinates move the focus and recenter the map; a non-blank key
    /// replaces the stored one. Either part may be absent.
    pub fn apply_location(
        &mut self,
        lat: Option<f64>,
        lon: Option<f64>,
        api_key: Option<&str>,
    ) -> Option<WeatherRequest> {
        if let (Some(lat), Some(lon)) = (lat, lon) {
            let focus = Coordinates::new(lat, lon);
            if focus.is_valid() {
                self.state.focus = focus;
                self.state.area = None;
                self.map.set_view(lat, lon, FOCUS_ZOOM);
            } else {
                warn!(lat, lon, "ignoring out-of-range location");
            }
        }

        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            self.state.api_key = Some(key.to_string());
        }

        self.begin_weather_refresh()
    }

    /// Focus one of the fixed areas, then begin a weather refresh.
    ///
    /// # Errors
    ///
    /// Returns `UnknownArea` if `name` is not in the area table.
    pub fn select_area(&mut self, name: &str) -> Result<Option<WeatherRequest>, QuakedeckError> {
        let area = find_area(name).ok_or_else(|| QuakedeckError::UnknownArea(name.to_string()))?;

        self.state.focus = area.coordinates;
        self.state.area = Some(area.name.to_string());
        self.map
            .set_view(area.coordinates.lat, area.coordinates.lon, FOCUS_ZOOM);

        Ok(self.begin_weather_refresh())
    }

    /// Issue a new weather request for the current focus.
    ///
    /// Returns `None` (and shows the missing-key placeholder) when the
    /// provider needs a key that is not configured. Any request still in
    /// flight becomes stale either way.
    pub fn begin_weather_refresh(&mut self) -> Option<WeatherRequest> {
        self.latest_token += 1;

        if self.credential_required && self.state.api_key.is_none() {
            self.weather = WeatherPanel::CredentialMissing;
            return None;
        }

        Some(WeatherRequest {
            token: self.latest_token,
            lat: self.state.focus.lat,
            lon: self.state.focus.lon,
            api_key: self.state.api_key.clone(),
        })
    }

    /// Apply a weather response. Returns `false` if it was stale.
    pub fn on_weather_result(
        &mut self,
        token: u64,
        result: Result<WeatherSnapshot, FetchError>,
    ) -> bool {
        if token != self.latest_token {
            debug!(token, latest = self.latest_token, "discarding stale weather response");
            return false;
        }

        self.weather = match result {
            Ok(mut snapshot) => {
                if let Some(area) = &self.state.area {
                    snapshot.location_label = format!("{area} {}", snapshot.location_label);
                }
                self.touch_updated();
                WeatherPanel::Ready(snapshot)
            }
            Err(FetchError::CredentialMissing) => WeatherPanel::CredentialMissing,
            Err(e) => {
                warn!("weather fetch failed: {e}");
                WeatherPanel::Unavailable
            }
        };
        true
    }

    // ------------------------------------------------------------------
    // Warnings
    // ------------------------------------------------------------------

    /// Replace the warnings panel wholesale.
    pub fn on_warnings_result(&mut self, result: Result<Vec<WarningEntry>, FetchError>) {
        self.warnings = match result {
            Ok(entries) => WarningsPanel::Active(entries),
            Err(e) => {
                warn!("warnings fetch failed: {e}");
                WarningsPanel::Unavailable
            }
        };
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Flip the notify flag.
    pub fn toggle_notifications(&mut self) -> ToggleOutcome {
        self.state.notify_enabled = !self.state.notify_enabled;

        match (self.state.notify_enabled, self.permission) {
            (false, _) => ToggleOutcome::Disabled,
            (true, Permission::Granted) => ToggleOutcome::Enabled,
            (true, _) => ToggleOutcome::PermissionNeeded,
        }
    }

    /// Record the browser's permission; anything but granted turns notify off.
    pub fn on_permission_result(&mut self, permission: Permission) {
        self.permission = permission;
        if permission != Permission::Granted && self.state.notify_enabled {
            info!(?permission, "notification permission not granted, turning notify off");
            self.state.notify_enabled = false;
        }
    }

    #[must_use]
    pub fn notify_label(&self) -> &'static str {
        if self.state.notify_enabled {
            "Notify: ON"
        } else {
            "Notify: OFF"
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Stamp the "last updated" time (feed open, applied quake, weather).
    pub fn touch_updated(&mut self) {
        self.last_updated = Some(Local::now());
    }

    #[must_use]
    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    #[must_use]
    pub fn map(&self) -> &M {
        &self.map
    }

    #[must_use]
    pub fn history(&self) -> &QuakeHistory {
        &self.history
    }

    #[must_use]
    pub fn weather(&self) -> &WeatherPanel {
        &self.weather
    }

    #[must_use]
    pub fn warnings(&self) -> &WarningsPanel {
        &self.warnings
    }

    #[must_use]
    pub fn last_updated(&self) -> Option<DateTime<Local>> {
        self.last_updated
    }
}
