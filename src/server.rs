//! Web server for the quakedeck dashboard.
//!
//! Serves the single dashboard page and an SSE stream of panel updates:
//! - Axum for HTTP
//! - SSE (Server-Sent Events) carrying pre-rendered HTML fragments
//! - HTMX swaps the fragments into place
//! - Leaflet recenters on `map-view` and redraws on `markers`

use std::convert::Infallible;

use axum::{
    Form, Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{
        Html, IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use serde::Deserialize;
use futures_util::{StreamExt, stream};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::controller::{AREAS, Permission};
use crate::render::escape_html;
use crate::runtime::{DashboardConfig, DashboardHandle, DashboardRuntime, UserCommand};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub dashboard: DashboardConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".to_string(),
            dashboard: DashboardConfig::default(),
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    dashboard: DashboardHandle,
}

/// Create the Axum router with all routes.
pub fn create_router(dashboard: DashboardHandle) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/stream", get(sse_handler))
        .route("/panels", get(panels_handler))
        .route("/health", get(health_handler))
        .route("/alert.wav", get(alert_sound_handler))
        .route("/location", post(location_handler))
        .route("/area", post(area_handler))
        .route("/notify/toggle", post(toggle_handler))
        .route("/notify/permission", post(permission_handler))
        .route("/quakes/clear", post(clear_handler))
        .with_state(AppState { dashboard })
}

/// Start the dashboard runtime and serve it until Ctrl+C.
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let (runtime, handle) = DashboardRuntime::new(config.dashboard)?;
    let runtime_task = tokio::spawn(runtime.run());

    let app = create_router(handle.clone());

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("quakedeck dashboard starting at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    handle.shutdown();
    runtime_task.await?;
    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Main page, with the current panels already filled in.
async fn index_handler(State(state): State<AppState>) -> Html<String> {
    let view = state.dashboard.view();

    let options: String = AREAS
        .iter()
        .map(|area| {
            let selected = if view.area.as_deref() == Some(area.name) {
                " selected"
            } else {
                ""
            };
            format!(r#"<option value="{0}"{selected}>{0}</option>"#, area.name)
        })
        .collect();

    Html(
        INDEX_HTML
            .replace("{{AREA_OPTIONS}}", &options)
            .replace("{{QUAKE_LATEST}}", &view.quake_latest)
            .replace("{{QUAKE_LIST}}", &view.quake_list)
            .replace("{{WEATHER}}", &view.weather)
            .replace("{{WARNINGS}}", &view.warnings)
            .replace("{{NOTIFY}}", &view.notify)
            .replace("{{UPDATED}}", &escape_html(&view.updated)),
    )
}

/// SSE stream of panel updates.
async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let dashboard = state.dashboard.clone();
    let rx = dashboard.subscribe();
    let stream = BroadcastStream::new(rx).flat_map(move |result| {
        let updates = match result {
            Ok(update) => vec![update],
            // Skipped updates may have touched any panel; resend them all
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "SSE subscriber lagged, resending full view");
                dashboard.view().updates()
            }
        };
        stream::iter(
            updates
                .into_iter()
                .map(|update| Ok(Event::default().event(update.event).data(update.data))),
        )
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Current panels and map as JSON.
async fn panels_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dashboard.view())
}

/// Alert beep played by the page for strong reports.
async fn alert_sound_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "audio/wav")], alert_wav())
}

const ALERT_SAMPLE_RATE: u32 = 8_000;
const ALERT_SAMPLES: u32 = ALERT_SAMPLE_RATE * 4 / 10;

/// 1 kHz square wave, 8-bit mono PCM.
fn alert_wav() -> Vec<u8> {
    let mut wav = Vec::with_capacity(44 + ALERT_SAMPLES as usize);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + ALERT_SAMPLES).to_le_bytes());
    wav.extend_from_slice(b"WAVEfmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&ALERT_SAMPLE_RATE.to_le_bytes());
    wav.extend_from_slice(&ALERT_SAMPLE_RATE.to_le_bytes()); // byte rate
    wav.extend_from_slice(&1u16.to_le_bytes()); // block align
    wav.extend_from_slice(&8u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&ALERT_SAMPLES.to_le_bytes());
    // 8-bit PCM is unsigned, silence is 128
    wav.extend((0..ALERT_SAMPLES).map(|i| if (i / 4) % 2 == 0 { 200u8 } else { 56u8 }));
    wav
}

/// Health check endpoint.
async fn health_handler() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
struct LocationForm {
    #[serde(default)]
    lat: String,
    #[serde(default)]
    lon: String,
    #[serde(default)]
    key: String,
}

fn parse_coordinate(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

async fn location_handler(
    State(state): State<AppState>,
    Form(form): Form<LocationForm>,
) -> StatusCode {
    let key = form.key.trim();
    dispatch(
        &state,
        UserCommand::SetLocation {
            lat: parse_coordinate(&form.lat),
            lon: parse_coordinate(&form.lon),
            api_key: (!key.is_empty()).then(|| key.to_string()),
        },
    )
}

#[derive(Debug, Deserialize)]
struct AreaForm {
    area: String,
}

async fn area_handler(State(state): State<AppState>, Form(form): Form<AreaForm>) -> StatusCode {
    if crate::controller::find_area(&form.area).is_none() {
        tracing::warn!("unknown area requested: {}", form.area);
        return StatusCode::BAD_REQUEST;
    }
    dispatch(&state, UserCommand::SelectArea(form.area))
}

async fn toggle_handler(State(state): State<AppState>) -> StatusCode {
    dispatch(&state, UserCommand::ToggleNotify)
}

#[derive(Debug, Deserialize)]
struct PermissionForm {
    permission: String,
}

async fn permission_handler(
    State(state): State<AppState>,
    Form(form): Form<PermissionForm>,
) -> StatusCode {
    match form.permission.parse::<Permission>() {
        Ok(permission) => dispatch(&state, UserCommand::PermissionResult(permission)),
        Err(e) => {
            tracing::warn!("{e}");
            StatusCode::BAD_REQUEST
        }
    }
}

async fn clear_handler(State(state): State<AppState>) -> StatusCode {
    dispatch(&state, UserCommand::ClearQuakes)
}

fn dispatch(state: &AppState, command: UserCommand) -> StatusCode {
    if state.dashboard.send(command) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

// ============================================================================
// HTML Template (embedded for single-binary deployment)
// ============================================================================

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="ja" data-theme="dark">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>quakedeck</title>

    <!-- HTMX + SSE -->
    <script src="https://unpkg.com/htmx.org@1.9.10"></script>
    <script src="https://unpkg.com/htmx.org@1.9.10/dist/ext/sse.js"></script>

    <!-- Leaflet -->
    <link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css" />
    <script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>

    <style>
        :root {
            --font: -apple-system, BlinkMacSystemFont, 'Hiragino Sans', sans-serif;
            --bg-primary: #09090b;
            --bg-secondary: #0f0f12;
            --bg-elevated: #1c1c1f;
            --text-primary: #fafafa;
            --text-secondary: #a1a1aa;
            --border: #27272a;
            --accent: #818cf8;
            --radius-md: 10px;
        }

        * { box-sizing: border-box; margin: 0; padding: 0; }

        body {
            font-family: var(--font);
            background: var(--bg-primary);
            color: var(--text-primary);
            font-size: 14px;
        }

        .header {
            display: flex;
            align-items: center;
            justify-content: space-between;
            gap: 12px;
            padding: 12px 20px;
            border-bottom: 1px solid var(--border);
            background: var(--bg-secondary);
        }

        .header form { display: flex; gap: 6px; align-items: center; }
        .header input, .header select, .header button {
            background: var(--bg-elevated);
            color: var(--text-primary);
            border: 1px solid var(--border);
            border-radius: 6px;
            padding: 6px 10px;
        }
        .header input { width: 90px; }
        .notify.on { border-color: var(--accent); color: var(--accent); }

        .layout {
            display: grid;
            grid-template-columns: 1fr 360px;
            height: calc(100vh - 58px);
        }

        #map { height: 100%; }

        .sidebar {
            overflow-y: auto;
            border-left: 1px solid var(--border);
            padding: 12px;
            display: flex;
            flex-direction: column;
            gap: 12px;
        }

        .panel {
            background: var(--bg-elevated);
            border: 1px solid var(--border);
            border-radius: var(--radius-md);
            padding: 12px;
        }
        .panel h2 { font-size: 13px; color: var(--text-secondary); margin-bottom: 8px; }
        .panel ul { list-style: none; }
        .panel li { padding: 4px 0; border-bottom: 1px solid var(--border); }
        .placeholder { color: var(--text-secondary); }
        .placeholder.error { color: #e74c3c; }

        .quake .time { color: var(--text-secondary); margin-right: 6px; }
        .quake .shindo { float: right; font-weight: 600; }
        .shindo-1 { border-left: 3px solid #2ecc71; padding-left: 6px; }
        .shindo-3 { border-left: 3px solid #f1c40f; padding-left: 6px; }
        .shindo-5 { border-left: 3px solid #f39c12; padding-left: 6px; }
        .shindo-6 { border-left: 3px solid #e74c3c; padding-left: 6px; }
        .latest-title { font-size: 16px; font-weight: 600; }
        .tsunami { color: #e74c3c; margin-top: 4px; }
        .temp { font-size: 24px; font-weight: 600; }
        .footer { color: var(--text-secondary); font-size: 12px; }
    </style>
</head>
<body hx-ext="sse" sse-connect="/stream">
    <audio id="alert-sound" src="/alert.wav" preload="auto"></audio>
    <!-- Script-handled events ride the same SSE connection; nothing is swapped -->
    <div id="sse-events" hidden hx-swap="none"
         sse-swap="map-view,markers,alert,notification,permission-request"></div>
    <header class="header">
        <strong>quakedeck</strong>

        <form hx-post="/area" hx-trigger="change" hx-swap="none">
            <select name="area">{{AREA_OPTIONS}}</select>
        </form>

        <form hx-post="/location" hx-swap="none">
            <input name="lat" placeholder="lat">
            <input name="lon" placeholder="lon">
            <input name="key" type="password" placeholder="API key">
            <button type="submit">Update</button>
        </form>

        <div sse-swap="notify" hx-swap="innerHTML">{{NOTIFY}}</div>
        <button hx-post="/quakes/clear" hx-swap="none">Clear</button>
    </header>

    <div class="layout">
        <div id="map"></div>

        <aside class="sidebar">
            <section class="panel">
                <h2>最新の地震</h2>
                <div id="eq-latest" sse-swap="quake-latest" hx-swap="innerHTML">{{QUAKE_LATEST}}</div>
            </section>

            <section class="panel">
                <h2>天気</h2>
                <div id="weather" sse-swap="weather" hx-swap="innerHTML">{{WEATHER}}</div>
            </section>

            <section class="panel">
                <h2>警報</h2>
                <ul id="warnings" sse-swap="warnings" hx-swap="innerHTML">{{WARNINGS}}</ul>
            </section>

            <section class="panel">
                <h2>地震履歴</h2>
                <ul id="eq-list" sse-swap="quake-list" hx-swap="innerHTML">{{QUAKE_LIST}}</ul>
            </section>

            <div class="footer" sse-swap="updated" hx-swap="innerHTML">{{UPDATED}}</div>
        </aside>
    </div>

    <script>
        const map = L.map('map');
        L.tileLayer('https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png', {
            attribution: '&copy; OpenStreetMap contributors'
        }).addTo(map);
        const markers = L.layerGroup().addTo(map);

        let viewRevision = -1;

        // Only location and area changes move the map; the user's pan stays otherwise
        function applyView(focus) {
            if (focus.revision <= viewRevision) return;
            viewRevision = focus.revision;
            map.setView([focus.center.lat, focus.center.lon], focus.zoom);
        }

        function applyMarkers(list) {
            markers.clearLayers();
            for (const m of list) {
                L.circleMarker([m.lat, m.lon], {
                    radius: m.style.radius,
                    color: m.style.color,
                    fillColor: m.style.color,
                    fillOpacity: 0.6
                }).bindPopup(m.popup_html).addTo(markers);
            }
        }

        function postPermission(permission) {
            fetch('/notify/permission', {
                method: 'POST',
                headers: { 'Content-Type': 'application/x-www-form-urlencoded' },
                body: 'permission=' + encodeURIComponent(permission)
            });
        }

        fetch('/panels').then(r => r.json()).then(view => {
            applyView({ center: view.map.center, zoom: view.map.zoom, revision: view.map.view_revision });
            applyMarkers(view.map.markers);
        });

        // "default" may mean another tab's prompt is still open; only report settled answers
        if ('Notification' in window && Notification.permission !== 'default') {
            postPermission(Notification.permission);
        }

        const handlers = {
            'map-view': data => applyView(JSON.parse(data)),
            'markers': data => applyMarkers(JSON.parse(data)),
            'alert': () => {
                const sound = document.getElementById('alert-sound');
                sound.currentTime = 0;
                sound.play().catch(() => {});
            },
            'notification': data => {
                const n = JSON.parse(data);
                if ('Notification' in window && Notification.permission === 'granted') {
                    new Notification(n.title, { body: n.body });
                }
            },
            'permission-request': () => {
                if (!('Notification' in window)) {
                    postPermission('denied');
                    return;
                }
                Notification.requestPermission().then(postPermission);
            }
        };

        document.getElementById('sse-events').addEventListener('htmx:sseMessage', e => {
            const handler = handlers[e.detail.type];
            if (handler) handler(e.detail.data);
        });
    </script>
</body>
</html>
"##;
