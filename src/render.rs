//! HTML fragments for the dashboard panels.
//!
//! Each function renders one panel body; the page swaps them in as they
//! arrive over SSE. All feed and provider text goes through `escape_html`.

use std::fmt::Write as _;

use chrono::{DateTime, Local};

use crate::controller::{QuakeHistory, WarningsPanel, WeatherPanel};
use crate::models::QuakeEvent;

pub const WEATHER_LOADING: &str = "Loading weather...";
pub const WEATHER_UNAVAILABLE: &str = "Weather unavailable";
pub const CREDENTIAL_MISSING: &str = "API key not set";
pub const WARNINGS_LOADING: &str = "Loading warnings...";
pub const WARNINGS_NONE: &str = "No active warnings";
pub const WARNINGS_UNAVAILABLE: &str = "Warnings unavailable";
pub const QUAKES_NONE: &str = "No earthquakes received yet";

#[must_use]
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn magnitude_text(event: &QuakeEvent) -> String {
    event
        .magnitude
        .map_or_else(|| "M?".to_string(), |m| format!("M{m:.1}"))
}

/// Marker popup: epicenter, time, magnitude and max intensity.
#[must_use]
pub fn quake_popup(event: &QuakeEvent) -> String {
    format!(
        "<b>{}</b><br>{}<br>{} / 震度{}",
        escape_html(&event.epicenter_name),
        event.time_label(),
        magnitude_text(event),
        event.max_intensity.label()
    )
}

fn quake_item(event: &QuakeEvent) -> String {
    let depth = event
        .depth_km
        .map(|d| format!(" <span class=\"depth\">{d:.0} km</span>"))
        .unwrap_or_default();

    format!(
        r#"<li class="quake {class}">
  <span class="time">{time}</span>
  <span class="place">{place}</span>
  <span class="mag">{mag}</span>{depth}
  <span class="shindo">震度{scale}</span>
</li>"#,
        class = event.severity().css_class(),
        time = event.time_label(),
        place = escape_html(&event.epicenter_name),
        mag = magnitude_text(event),
        scale = event.max_intensity.label(),
    )
}

/// History list, newest first.
#[must_use]
pub fn quake_list(history: &QuakeHistory) -> String {
    if history.is_empty() {
        return format!(r#"<li class="empty">{QUAKES_NONE}</li>"#);
    }

    history.iter().fold(String::new(), |mut out, event| {
        out.push_str(&quake_item(event));
        out.push('\n');
        out
    })
}

/// Highlighted card for the most recent report.
#[must_use]
pub fn latest_report(latest: Option<&QuakeEvent>) -> String {
    let Some(event) = latest else {
        return format!(r#"<div class="latest empty">{QUAKES_NONE}</div>"#);
    };

    let tsunami = event
        .domestic_tsunami
        .as_deref()
        .filter(|t| *t != "None" && *t != "Unknown")
        .map(|t| format!(r#"<div class="tsunami">津波: {}</div>"#, escape_html(t)))
        .unwrap_or_default();

    format!(
        r#"<div class="latest {class}">
  <div class="latest-title">{place}</div>
  <div class="latest-meta">{time} / {mag} / 最大震度{scale}</div>
  {tsunami}
</div>"#,
        class = event.severity().css_class(),
        place = escape_html(&event.epicenter_name),
        time = event.time_label(),
        mag = magnitude_text(event),
        scale = event.max_intensity.label(),
    )
}

#[must_use]
pub fn weather_panel(panel: &WeatherPanel) -> String {
    match panel {
        WeatherPanel::Loading => format!(r#"<div class="placeholder">{WEATHER_LOADING}</div>"#),
        WeatherPanel::CredentialMissing => {
            format!(r#"<div class="placeholder warn">{CREDENTIAL_MISSING}</div>"#)
        }
        WeatherPanel::Unavailable => {
            format!(r#"<div class="placeholder error">{WEATHER_UNAVAILABLE}</div>"#)
        }
        WeatherPanel::Ready(w) => format!(
            r#"<div class="weather">
  <div class="location">{label}</div>
  <div class="temp">{temp:.1}°C</div>
  <div class="wind">風速 {wind:.1} m/s</div>
  <div class="desc">{desc}</div>
</div>"#,
            label = escape_html(&w.location_label),
            temp = w.temperature_c,
            wind = w.wind_speed,
            desc = escape_html(&w.description),
        ),
    }
}

#[must_use]
pub fn warnings_panel(panel: &WarningsPanel) -> String {
    match panel {
        WarningsPanel::Loading => format!(r#"<li class="placeholder">{WARNINGS_LOADING}</li>"#),
        WarningsPanel::Unavailable => {
            format!(r#"<li class="placeholder error">{WARNINGS_UNAVAILABLE}</li>"#)
        }
        WarningsPanel::Active(entries) if entries.is_empty() => {
            format!(r#"<li class="placeholder">{WARNINGS_NONE}</li>"#)
        }
        WarningsPanel::Active(entries) => {
            let mut out = String::new();
            for entry in entries {
                let _ = writeln!(
                    out,
                    "<li><span class=\"area\">{}</span>: {}</li>",
                    escape_html(&entry.area_name),
                    escape_html(&entry.warning_name)
                );
            }
            out
        }
    }
}

#[must_use]
pub fn notify_button(label: &str, enabled: bool) -> String {
    let class = if enabled { "notify on" } else { "notify" };
    format!(
        r#"<button id="notify-toggle" class="{class}" hx-post="/notify/toggle" hx-swap="none">{label}</button>"#
    )
}

#[must_use]
pub fn updated_stamp(at: Option<DateTime<Local>>) -> String {
    match at {
        Some(t) => format!("Last updated: {}", t.format("%H:%M:%S")),
        None => "Last updated: -".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, TimeZone};

    use super::*;
    use crate::models::{IntensityScale, WarningEntry, WeatherSnapshot};

    fn event(name: &str, scale: i32) -> QuakeEvent {
        let jst = FixedOffset::east_opt(9 * 3600).unwrap();
        QuakeEvent {
            id: None,
            observed_at: jst.with_ymd_and_hms(2024, 1, 1, 16, 10, 0).unwrap(),
            epicenter_name: name.to_string(),
            magnitude: Some(7.6),
            max_intensity: IntensityScale(scale),
            coordinates: None,
            depth_km: Some(10.0),
            domestic_tsunami: Some("Warning".into()),
        }
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_popup_escapes_feed_text() {
        let html = quake_popup(&event("<script>x</script>", 60));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("M7.6"));
        assert!(html.contains("震度6+"));
    }

    #[test]
    fn test_quake_list() {
        let mut history = QuakeHistory::new(20);
        assert!(quake_list(&history).contains(QUAKES_NONE));

        history.push(event("Tokyo Bay", 60));
        let html = quake_list(&history);
        assert!(html.contains("Tokyo Bay"));
        assert!(html.contains("2024/01/01 16:10:00"));
        assert!(html.contains("shindo-6"));
    }

    #[test]
    fn test_latest_report_shows_tsunami() {
        let e = event("Noto", 70);
        let html = latest_report(Some(&e));
        assert!(html.contains("津波: Warning"));
        assert!(html.contains("最大震度7"));
        assert!(latest_report(None).contains(QUAKES_NONE));
    }

    #[test]
    fn test_weather_placeholders() {
        assert!(weather_panel(&WeatherPanel::CredentialMissing).contains("API key not set"));
        assert!(weather_panel(&WeatherPanel::Unavailable).contains("Weather unavailable"));

        let html = weather_panel(&WeatherPanel::Ready(WeatherSnapshot {
            location_label: "Tokyo (35.69, 139.69)".into(),
            temperature_c: 21.44,
            wind_speed: 3.0,
            description: "clear sky".into(),
        }));
        assert!(html.contains("21.4°C"));
        assert!(html.contains("3.0 m/s"));
        assert!(html.contains("clear sky"));
    }

    #[test]
    fn test_warnings_empty_vs_failure() {
        let empty = warnings_panel(&WarningsPanel::Active(vec![]));
        let failed = warnings_panel(&WarningsPanel::Unavailable);
        assert!(empty.contains("No active warnings"));
        assert!(failed.contains("Warnings unavailable"));
        assert_ne!(empty, failed);

        let html = warnings_panel(&WarningsPanel::Active(vec![WarningEntry {
            area_name: "石川県能登".into(),
            warning_name: "大雨警報".into(),
        }]));
        assert!(html.contains("石川県能登</span>: 大雨警報"));
    }

    #[test]
    fn test_notify_button_label() {
        assert!(notify_button("Notify: ON", true).contains(">Notify: ON<"));
        assert!(notify_button("Notify: OFF", false).contains(r#"class="notify""#));
        assert_eq!(updated_stamp(None), "Last updated: -");
    }
}
