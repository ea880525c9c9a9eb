//! Dashboard event loop.
//!
//! `DashboardRuntime` is the only owner of the `DashboardController`. Feed
//! frames, timer ticks, fetch results and browser commands all arrive as
//! `DashboardEvent`s on one channel and are applied in order. After each
//! event the rendered panels are diffed against the last published view;
//! changed panels go out on a broadcast channel for SSE subscribers and the
//! full view is stored in a watch channel for new page loads.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::controller::{
    ControllerConfig, DashboardController, DashboardState, MAX_HISTORY, MIN_HISTORY, Permission,
    QuakeOutcome, ToggleOutcome, WeatherRequest,
};
use crate::errors::{FetchError, QuakedeckError};
use crate::feed::{DEFAULT_RECONNECT_DELAY, P2P_WS_URL, QuakeFeedClient};
use crate::map::{MapLayer, MapSnapshot};
use crate::models::{QuakeEvent, Severity, WarningEntry, WeatherSnapshot};
use crate::render;
use crate::tasks::{BackgroundTasks, TaskKey};
use crate::warnings::{JMA_WARNINGS_URL, WarningsClient};
use crate::weather::{WeatherClient, WeatherProvider};

/// Capacity of the panel update broadcast channel.
const UPDATE_CHANNEL_CAPACITY: usize = 100;

const FEED_TASK: &str = "quake-feed";
const WEATHER_TICKER: &str = "weather-ticker";
const WARNINGS_TICKER: &str = "warnings-ticker";
const WEATHER_FETCH: &str = "weather-fetch";
const WARNINGS_FETCH: &str = "warnings-fetch";

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub feed_url: String,
    pub reconnect_delay: Duration,
    pub provider: WeatherProvider,
    /// Override for the provider endpoint
    pub weather_base_url: Option<String>,
    pub api_key: Option<String>,
    pub warnings_url: String,
    pub history_capacity: usize,
    /// Zero disables periodic weather refresh
    pub weather_interval: Duration,
    /// Zero fetches warnings once at startup only
    pub warnings_interval: Duration,
    pub min_notify_severity: Severity,
    pub min_alert_severity: Severity,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            feed_url: P2P_WS_URL.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            provider: WeatherProvider::default(),
            weather_base_url: None,
            api_key: None,
            warnings_url: JMA_WARNINGS_URL.to_string(),
            history_capacity: MIN_HISTORY,
            weather_interval: Duration::from_secs(60),
            warnings_interval: Duration::from_secs(600),
            min_notify_severity: Severity::High,
            min_alert_severity: Severity::High,
        }
    }
}

impl DashboardConfig {
    fn controller_config(&self) -> ControllerConfig {
        let capacity = self.history_capacity.clamp(MIN_HISTORY, MAX_HISTORY);
        if capacity != self.history_capacity {
            warn!(
                "history size {} clamped to {capacity} (allowed {MIN_HISTORY}..={MAX_HISTORY})",
                self.history_capacity
            );
        }

        ControllerConfig {
            history_capacity: capacity,
            credential_required: self.provider.requires_credential(),
            min_notify_severity: self.min_notify_severity,
            min_alert_severity: self.min_alert_severity,
            initial_state: DashboardState {
                api_key: self
                    .api_key
                    .as_deref()
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(ToString::to_string),
                ..DashboardState::default()
            },
        }
    }
}

/// Something that happened; applied by the event loop in arrival order.
#[derive(Debug)]
pub enum DashboardEvent {
    Quake(QuakeEvent),
    FeedConnected,
    WeatherTick,
    WarningsTick,
    WeatherFetched {
        token: u64,
        result: Result<WeatherSnapshot, FetchError>,
    },
    WarningsFetched(Result<Vec<WarningEntry>, FetchError>),
    Command(UserCommand),
    Shutdown,
}

/// Browser-originated actions.
#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    SetLocation {
        lat: Option<f64>,
        lon: Option<f64>,
        api_key: Option<String>,
    },
    SelectArea(String),
    ToggleNotify,
    PermissionResult(Permission),
    ClearQuakes,
}

/// One SSE message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelUpdate {
    pub event: &'static str,
    pub data: String,
}

/// Every rendered panel plus the map, as of the last applied event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub quake_list: String,
    pub quake_latest: String,
    pub weather: String,
    pub warnings: String,
    pub notify: String,
    pub updated: String,
    pub area: Option<String>,
    pub notify_enabled: bool,
    pub map: MapSnapshot,
}

impl DashboardView {
    fn render(controller: &DashboardController<MapLayer>) -> Self {
        let state = controller.state();
        Self {
            quake_list: render::quake_list(controller.history()),
            quake_latest: render::latest_report(controller.history().latest()),
            weather: render::weather_panel(controller.weather()),
            warnings: render::warnings_panel(controller.warnings()),
            notify: render::notify_button(controller.notify_label(), state.notify_enabled),
            updated: render::updated_stamp(controller.last_updated()),
            area: state.area.clone(),
            notify_enabled: state.notify_enabled,
            map: controller.map().snapshot().clone(),
        }
    }

    /// Everything a freshly connected (or lagged) subscriber needs.
    #[must_use]
    pub fn updates(&self) -> Vec<PanelUpdate> {
        let mut updates: Vec<PanelUpdate> = self
            .panels()
            .into_iter()
            .map(|(event, data)| PanelUpdate {
                event,
                data: data.to_string(),
            })
            .collect();
        updates.extend(map_view_update(&self.map));
        updates.extend(markers_update(&self.map));
        updates
    }

    fn panels(&self) -> [(&'static str, &str); 6] {
        [
            ("quake-list", self.quake_list.as_str()),
            ("quake-latest", self.quake_latest.as_str()),
            ("weather", self.weather.as_str()),
            ("warnings", self.warnings.as_str()),
            ("notify", self.notify.as_str()),
            ("updated", self.updated.as_str()),
        ]
    }
}

fn json_update(event: &'static str, value: &impl Serialize) -> Option<PanelUpdate> {
    match serde_json::to_string(value) {
        Ok(data) => Some(PanelUpdate { event, data }),
        Err(e) => {
            warn!("failed to encode {event}: {e}");
            None
        }
    }
}

fn map_view_update(map: &MapSnapshot) -> Option<PanelUpdate> {
    json_update("map-view", &map.focus())
}

fn markers_update(map: &MapSnapshot) -> Option<PanelUpdate> {
    json_update("markers", &map.markers)
}

/// Payload of the `alert` event.
#[derive(Debug, Serialize)]
struct Alert<'a> {
    severity: Severity,
    epicenter: &'a str,
    max_intensity: &'static str,
}

/// Cloneable access to a running dashboard.
#[derive(Clone)]
pub struct DashboardHandle {
    events: mpsc::UnboundedSender<DashboardEvent>,
    view: watch::Receiver<DashboardView>,
    updates: broadcast::Sender<PanelUpdate>,
}

impl DashboardHandle {
    /// Queue a command. Returns `false` once the runtime has stopped.
    pub fn send(&self, command: UserCommand) -> bool {
        self.events.send(DashboardEvent::Command(command)).is_ok()
    }

    /// Latest published view.
    #[must_use]
    pub fn view(&self) -> DashboardView {
        self.view.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PanelUpdate> {
        self.updates.subscribe()
    }

    /// Stop the loop and abort every background task.
    pub fn shutdown(&self) {
        let _ = self.events.send(DashboardEvent::Shutdown);
    }
}

pub struct DashboardRuntime {
    controller: DashboardController<MapLayer>,
    weather: Arc<WeatherClient>,
    warnings: Arc<WarningsClient>,
    tasks: BackgroundTasks<DashboardEvent>,
    events_tx: mpsc::UnboundedSender<DashboardEvent>,
    events: mpsc::UnboundedReceiver<DashboardEvent>,
    view_tx: watch::Sender<DashboardView>,
    updates: broadcast::Sender<PanelUpdate>,
    config: DashboardConfig,
}

impl DashboardRuntime {
    /// Build the runtime and a handle to it. Nothing runs until `run`.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be initialized.
    pub fn new(config: DashboardConfig) -> Result<(Self, DashboardHandle), QuakedeckError> {
        let weather = match &config.weather_base_url {
            Some(url) => WeatherClient::with_base_url(config.provider, url.clone())?,
            None => WeatherClient::new(config.provider)?,
        };
        let warnings = WarningsClient::with_url(config.warnings_url.clone())?;

        let controller = DashboardController::new(config.controller_config(), MapLayer::default());

        let (events_tx, events) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(DashboardView::render(&controller));
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        let handle = DashboardHandle {
            events: events_tx.clone(),
            view: view_rx,
            updates: updates.clone(),
        };

        let runtime = Self {
            controller,
            weather: Arc::new(weather),
            warnings: Arc::new(warnings),
            tasks: BackgroundTasks::new(events_tx.clone()),
            events_tx,
            events,
            view_tx,
            updates,
            config,
        };

        Ok((runtime, handle))
    }

    /// Start background work and apply events until shutdown.
    pub async fn run(mut self) {
        self.start();

        while let Some(event) = self.events.recv().await {
            if matches!(event, DashboardEvent::Shutdown) {
                break;
            }
            self.handle(event);
            self.publish();
        }

        info!(tasks = self.tasks.len(), "dashboard stopping");
        self.tasks.cancel_all();
    }

    fn start(&mut self) {
        info!(
            feed = %self.config.feed_url,
            provider = self.weather.provider().as_str(),
            history = self.controller.history().capacity(),
            "dashboard starting"
        );

        let quake_tx = self.events_tx.clone();
        let connect_tx = self.events_tx.clone();
        let feed = QuakeFeedClient::new(self.config.feed_url.clone())
            .with_reconnect_delay(self.config.reconnect_delay)
            .on_connect(move || {
                let _ = connect_tx.send(DashboardEvent::FeedConnected);
            });
        self.tasks.spawn_detached(
            FEED_TASK,
            feed.run(move |event| {
                let _ = quake_tx.send(DashboardEvent::Quake(event));
            }),
        );

        if let Some(request) = self.controller.begin_weather_refresh() {
            self.fetch_weather(request);
        }
        if !self.config.weather_interval.is_zero() {
            self.tasks.spawn_interval(WEATHER_TICKER, self.config.weather_interval, || {
                DashboardEvent::WeatherTick
            });
        }

        self.fetch_warnings();
        if !self.config.warnings_interval.is_zero() {
            self.tasks.spawn_interval(WARNINGS_TICKER, self.config.warnings_interval, || {
                DashboardEvent::WarningsTick
            });
        }

        self.publish();
    }

    fn handle(&mut self, event: DashboardEvent) {
        match event {
            DashboardEvent::Quake(quake) => {
                let alert = Alert {
                    severity: quake.severity(),
                    epicenter: &quake.epicenter_name,
                    max_intensity: quake.max_intensity.label(),
                };
                let alert = json_update("alert", &alert);

                if let QuakeOutcome::Applied {
                    notification,
                    alert: sound,
                    ..
                } = self.controller.on_quake(quake)
                {
                    debug!(history = self.controller.history().len(), "history size");
                    if sound {
                        self.send(alert);
                    }
                    if let Some(notification) = notification {
                        self.send(json_update("notification", &notification));
                    }
                }
            }
            DashboardEvent::FeedConnected => self.controller.touch_updated(),
            DashboardEvent::WeatherTick => {
                if let Some(request) = self.controller.begin_weather_refresh() {
                    self.fetch_weather(request);
                }
            }
            DashboardEvent::WarningsTick => {
                if self.tasks.is_running(&TaskKey::new(WARNINGS_FETCH)) {
                    debug!("warnings fetch still in flight, skipping tick");
                } else {
                    self.fetch_warnings();
                }
            }
            DashboardEvent::WeatherFetched { token, result } => {
                self.controller.on_weather_result(token, result);
            }
            DashboardEvent::WarningsFetched(result) => self.controller.on_warnings_result(result),
            DashboardEvent::Command(command) => self.handle_command(command),
            DashboardEvent::Shutdown => {}
        }
    }

    fn handle_command(&mut self, command: UserCommand) {
        debug!(?command, "applying user command");

        match command {
            UserCommand::SetLocation { lat, lon, api_key } => {
                if let Some(request) = self.controller.apply_location(lat, lon, api_key.as_deref()) {
                    self.fetch_weather(request);
                }
            }
            UserCommand::SelectArea(name) => match self.controller.select_area(&name) {
                Ok(Some(request)) => self.fetch_weather(request),
                Ok(None) => {}
                Err(e) => warn!("{e}"),
            },
            UserCommand::ToggleNotify => {
                if self.controller.toggle_notifications() == ToggleOutcome::PermissionNeeded {
                    self.broadcast("permission-request", "notifications".to_string());
                }
            }
            UserCommand::PermissionResult(permission) => {
                self.controller.on_permission_result(permission);
            }
            UserCommand::ClearQuakes => self.controller.clear_quakes(),
        }
    }

    /// Spawning under the same key aborts a fetch still in flight.
    fn fetch_weather(&mut self, request: WeatherRequest) {
        let client = self.weather.clone();
        self.tasks.spawn(WEATHER_FETCH, async move {
            let result = client
                .fetch_weather(request.lat, request.lon, request.api_key.as_deref())
                .await;
            DashboardEvent::WeatherFetched {
                token: request.token,
                result,
            }
        });
    }

    fn fetch_warnings(&mut self) {
        let client = self.warnings.clone();
        self.tasks.spawn(WARNINGS_FETCH, async move {
            DashboardEvent::WarningsFetched(client.fetch_warnings().await)
        });
    }

    fn broadcast(&self, event: &'static str, data: String) {
        self.send(Some(PanelUpdate { event, data }));
    }

    fn send(&self, update: Option<PanelUpdate>) {
        if let Some(update) = update {
            // No subscribers is not an error
            let _ = self.updates.send(update);
        }
    }

    fn publish(&self) {
        let next = DashboardView::render(&self.controller);
        let previous = self.view_tx.borrow().clone();
        if next == previous {
            return;
        }

        // Store first so subscribers reacting to an update see the new view
        self.view_tx.send_replace(next.clone());

        for ((name, old), (_, new)) in previous.panels().into_iter().zip(next.panels()) {
            if old != new {
                self.broadcast(name, new.to_string());
            }
        }

        // The page recenters on map-view only, so new markers keep the user's pan
        if next.map.view_revision != previous.map.view_revision {
            self.send(map_view_update(&next.map));
        }
        if next.map.markers != previous.map.markers {
            self.send(markers_update(&next.map));
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::extract::ws::{Message as ServerMessage, WebSocketUpgrade};
    use axum::routing::get;
    use tokio::net::TcpListener;

    use super::*;

    const QUAKE: &str = include_str!("../tools/sample_jma_quake.json");
    const WARNINGS: &str = include_str!("../tools/sample_warning.json");
    const OPEN_METEO: &str =
        r#"{"current_weather": {"temperature": 12.3, "windspeed": 4.5, "weathercode": 0}}"#;

    /// Sample report with its id, epicenter and max scale replaced.
    fn quake_frame(id: &str, epicenter: &str, scale: i32) -> String {
        let mut value: serde_json::Value = serde_json::from_str(QUAKE).unwrap();
        value["id"] = id.into();
        value["earthquake"]["hypocenter"]["name"] = epicenter.into();
        value["earthquake"]["maxScale"] = scale.into();
        value.to_string()
    }

    async fn spawn_upstream() -> String {
        spawn_upstream_with(vec![QUAKE.to_owned()]).await
    }

    /// One server for feed, weather and warnings; the feed sends `frames` once.
    async fn spawn_upstream_with(frames: Vec<String>) -> String {
        let app = Router::new()
            .route(
                "/ws",
                get(move |ws: WebSocketUpgrade| async move {
                    ws.on_upgrade(move |mut socket| async move {
                        for frame in frames {
                            let _ = socket.send(ServerMessage::Text(frame.into())).await;
                        }
                        // Hold the connection open
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    })
                }),
            )
            .route("/v1/forecast", get(|| async { OPEN_METEO }))
            .route("/warning.json", get(|| async { WARNINGS }));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("127.0.0.1:{}", addr.port())
    }

    fn config_for(addr: &str) -> DashboardConfig {
        DashboardConfig {
            feed_url: format!("ws://{addr}/ws"),
            reconnect_delay: Duration::from_millis(50),
            weather_base_url: Some(format!("http://{addr}")),
            warnings_url: format!("http://{addr}/warning.json"),
            ..DashboardConfig::default()
        }
    }

    impl DashboardHandle {
        pub(crate) fn watch(&self) -> watch::Receiver<DashboardView> {
            self.view.clone()
        }
    }

    async fn wait_until(handle: &DashboardHandle, pred: impl Fn(&DashboardView) -> bool) -> DashboardView {
        let mut rx = handle.watch();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|v| pred(v)))
            .await
            .expect("timed out waiting for view")
            .expect("runtime alive")
            .clone()
    }

    async fn next_named(rx: &mut broadcast::Receiver<PanelUpdate>, name: &str) -> PanelUpdate {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let update = rx.recv().await.expect("update channel open");
                if update.event == name {
                    return update;
                }
            }
        })
        .await
        .expect("timed out waiting for update")
    }

    #[tokio::test]
    async fn test_panels_fill_from_upstream() {
        let addr = spawn_upstream().await;
        let (runtime, handle) = DashboardRuntime::new(config_for(&addr)).unwrap();
        let task = tokio::spawn(runtime.run());

        let view = wait_until(&handle, |v| {
            v.quake_list.contains("石川県能登地方")
                && v.weather.contains("12.3°C")
                && v.warnings.contains("大雨警報")
        })
        .await;

        assert!(view.quake_latest.contains("石川県能登地方"));
        assert_eq!(view.map.markers.len(), 1);
        assert_ne!(view.updated, "Last updated: -");

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("runtime should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_area_and_location_commands() {
        let addr = spawn_upstream().await;
        let (runtime, handle) = DashboardRuntime::new(config_for(&addr)).unwrap();
        tokio::spawn(runtime.run());

        assert!(handle.send(UserCommand::SelectArea("札幌".into())));
        let view = wait_until(&handle, |v| v.weather.contains("札幌")).await;
        assert_eq!(view.area.as_deref(), Some("札幌"));
        assert_eq!(view.map.zoom, crate::map::FOCUS_ZOOM);

        assert!(handle.send(UserCommand::SetLocation {
            lat: Some(26.5),
            lon: Some(128.0),
            api_key: None,
        }));
        let view = wait_until(&handle, |v| v.weather.contains("(26.50, 128.00)")).await;
        assert_eq!(view.area, None);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_notify_permission_flow() {
        let addr = spawn_upstream().await;
        let (runtime, handle) = DashboardRuntime::new(config_for(&addr)).unwrap();
        let mut updates = handle.subscribe();
        tokio::spawn(runtime.run());

        handle.send(UserCommand::ToggleNotify);
        next_named(&mut updates, "permission-request").await;
        let notify = next_named(&mut updates, "notify").await;
        assert!(notify.data.contains("Notify: ON"));

        handle.send(UserCommand::PermissionResult(Permission::Denied));
        let notify = next_named(&mut updates, "notify").await;
        assert!(notify.data.contains("Notify: OFF"));
        assert!(!handle.view().notify_enabled);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_alert_only_for_strong_reports() {
        let addr = spawn_upstream_with(vec![
            quake_frame("weak", "千葉県北西部", 45),
            quake_frame("strong", "茨城県南部", 50),
        ])
        .await;
        let (runtime, handle) = DashboardRuntime::new(config_for(&addr)).unwrap();
        let mut updates = handle.subscribe();
        tokio::spawn(runtime.run());

        // Frames apply in order, so the first alert belongs to the scale-50 report
        let alert = next_named(&mut updates, "alert").await;
        let value: serde_json::Value = serde_json::from_str(&alert.data).unwrap();
        assert_eq!(value["epicenter"], "茨城県南部");
        assert_eq!(value["severity"], "high");

        let view = handle.view();
        assert!(view.quake_list.contains("千葉県北西部"));
        assert!(!view.notify_enabled);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_new_report_does_not_recenter() {
        let addr = spawn_upstream().await;
        let (runtime, handle) = DashboardRuntime::new(config_for(&addr)).unwrap();
        let mut updates = handle.subscribe();
        tokio::spawn(runtime.run());

        let seen = tokio::time::timeout(Duration::from_secs(5), async {
            let mut seen = Vec::new();
            loop {
                let update = updates.recv().await.expect("update channel open");
                let done = update.event == "markers";
                seen.push(update.event);
                if done {
                    return seen;
                }
            }
        })
        .await
        .expect("timed out waiting for markers");
        assert!(!seen.contains(&"map-view"), "quake moved the view: {seen:?}");

        handle.send(UserCommand::SelectArea("福岡".into()));
        let focus = next_named(&mut updates, "map-view").await;
        let value: serde_json::Value = serde_json::from_str(&focus.data).unwrap();
        assert_eq!(value["zoom"], crate::map::FOCUS_ZOOM);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_full_updates_cover_every_panel_and_map() {
        let (_runtime, handle) = DashboardRuntime::new(DashboardConfig::default()).unwrap();
        let events: Vec<&str> = handle.view().updates().iter().map(|u| u.event).collect();
        assert_eq!(
            events,
            [
                "quake-list",
                "quake-latest",
                "weather",
                "warnings",
                "notify",
                "updated",
                "map-view",
                "markers"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_key_shows_placeholder() {
        let addr = spawn_upstream().await;
        let config = DashboardConfig {
            provider: WeatherProvider::OpenWeatherMap,
            ..config_for(&addr)
        };
        let (runtime, handle) = DashboardRuntime::new(config).unwrap();
        tokio::spawn(runtime.run());

        wait_until(&handle, |v| v.weather.contains(render::CREDENTIAL_MISSING)).await;
        handle.shutdown();
    }

    #[test]
    fn test_history_capacity_clamped() {
        let config = DashboardConfig {
            history_capacity: 500,
            ..DashboardConfig::default()
        };
        assert_eq!(config.controller_config().history_capacity, MAX_HISTORY);
    }
}
