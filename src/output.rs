//! Terminal output for quake reports, weather and warnings.
//!
//! Supports human-readable (with colors), JSON, and NDJSON formats.

use std::io::{self, Write};

use serde::Serialize;

use crate::models::{QuakeEvent, Severity, WarningEntry, WeatherSnapshot};

// ANSI color codes
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

// Severity colors
const RED: &str = "\x1b[91m";
const YELLOW: &str = "\x1b[93m";
const GREEN: &str = "\x1b[92m";
const WHITE: &str = "\x1b[97m";

const ICON_TSUNAMI: &str = "🌊";
const BELL: &str = "\x07";

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Human-readable terminal output (default)
    #[default]
    Human,
    /// JSON array
    Json,
    /// Newline-delimited JSON (one object per line)
    Ndjson,
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            "ndjson" => Ok(Self::Ndjson),
            _ => Err(format!("unknown format: {s} (expected: human, json, ndjson)")),
        }
    }
}

/// Flat JSON shape of a quake report.
#[derive(Debug, Serialize)]
struct OutputQuake<'a> {
    id: Option<&'a str>,
    time: String,
    epicenter: &'a str,
    magnitude: Option<f64>,
    max_scale: i32,
    max_intensity: &'static str,
    severity: Severity,
    latitude: Option<f64>,
    longitude: Option<f64>,
    depth_km: Option<f64>,
    tsunami: Option<&'a str>,
}

impl<'a> From<&'a QuakeEvent> for OutputQuake<'a> {
    fn from(e: &'a QuakeEvent) -> Self {
        Self {
            id: e.id.as_deref(),
            time: e.observed_at.to_rfc3339(),
            epicenter: &e.epicenter_name,
            magnitude: e.magnitude,
            max_scale: e.max_intensity.0,
            max_intensity: e.max_intensity.label(),
            severity: e.severity(),
            latitude: e.coordinates.map(|c| c.lat),
            longitude: e.coordinates.map(|c| c.lon),
            depth_km: e.depth_km,
            tsunami: e.domestic_tsunami.as_deref(),
        }
    }
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Severe => RED,
        Severity::High => YELLOW,
        Severity::Moderate => GREEN,
        Severity::Low => WHITE,
    }
}

/// Write one quake report per line, colored by severity.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_human<W: Write>(writer: &mut W, events: &[QuakeEvent]) -> io::Result<()> {
    for event in events {
        let severity = event.severity();
        let color = severity_color(severity);

        let mag = event
            .magnitude
            .map_or_else(|| "?".into(), |m| format!("{m:.1}"));
        let depth = event
            .depth_km
            .map_or_else(|| "   ?km".into(), |d| format!("{d:>4.0}km"));

        // "None" / "Unknown" are the feed's way of saying no tsunami info
        let tsunami = match event.domestic_tsunami.as_deref() {
            Some("None" | "Unknown") | None => String::new(),
            Some(kind) => format!(" {ICON_TSUNAMI} {kind}"),
        };

        writeln!(
            writer,
            "{color}{BOLD}震度{scale:<4}{RESET} │ \
             {color}M{mag:<4}{RESET} │ \
             {DIM}{depth}{RESET} │ \
             {time} JST │ \
             {place}{tsunami}",
            scale = event.max_intensity.label(),
            time = event.time_label(),
            place = event.epicenter_name,
        )?;
    }
    Ok(())
}

/// Write reports as a JSON array.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_json<W: Write>(writer: &mut W, events: &[QuakeEvent]) -> io::Result<()> {
    let output: Vec<OutputQuake<'_>> = events.iter().map(OutputQuake::from).collect();
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{json}")
}

/// Write reports as newline-delimited JSON.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_ndjson<W: Write>(writer: &mut W, events: &[QuakeEvent]) -> io::Result<()> {
    for event in events {
        let json = serde_json::to_string(&OutputQuake::from(event))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(writer, "{json}")?;
    }
    Ok(())
}

/// Write reports in the specified format.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_events<W: Write>(writer: &mut W, events: &[QuakeEvent], format: Format) -> io::Result<()> {
    match format {
        Format::Human => write_human(writer, events),
        Format::Json => write_json(writer, events),
        Format::Ndjson => write_ndjson(writer, events),
    }
}

/// Ring the terminal bell.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn ring_bell<W: Write>(writer: &mut W) -> io::Result<()> {
    write!(writer, "{BELL}")
}

/// Write a weather snapshot.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_weather<W: Write>(
    writer: &mut W,
    weather: &WeatherSnapshot,
    format: Format,
) -> io::Result<()> {
    match format {
        Format::Human => writeln!(
            writer,
            "{BOLD}{}{RESET} │ {:.1}°C │ wind {:.1} m/s │ {}",
            weather.location_label, weather.temperature_c, weather.wind_speed, weather.description
        ),
        Format::Json => {
            let json = serde_json::to_string_pretty(weather)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            writeln!(writer, "{json}")
        }
        Format::Ndjson => {
            let json = serde_json::to_string(weather)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            writeln!(writer, "{json}")
        }
    }
}

/// Write active warnings, or a note when there are none.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_warnings<W: Write>(
    writer: &mut W,
    warnings: &[WarningEntry],
    format: Format,
) -> io::Result<()> {
    match format {
        Format::Human if warnings.is_empty() => writeln!(writer, "{DIM}No active warnings{RESET}"),
        Format::Human => {
            for w in warnings {
                writeln!(writer, "{YELLOW}{}{RESET} │ {}", w.warning_name, w.area_name)?;
            }
            Ok(())
        }
        Format::Json => {
            let json = serde_json::to_string_pretty(warnings)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            writeln!(writer, "{json}")
        }
        Format::Ndjson => {
            for w in warnings {
                let json = serde_json::to_string(w)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                writeln!(writer, "{json}")?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JmaQuakeReport;

    fn sample() -> QuakeEvent {
        let report: JmaQuakeReport =
            serde_json::from_str(include_str!("../tools/sample_jma_quake.json")).unwrap();
        report.into_event().unwrap()
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("human".parse::<Format>().unwrap(), Format::Human);
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert_eq!("NDJSON".parse::<Format>().unwrap(), Format::Ndjson);
        assert!("invalid".parse::<Format>().is_err());
    }

    #[test]
    fn test_human_line() {
        let mut out = Vec::new();
        write_human(&mut out, &[sample()]).unwrap();
        let line = String::from_utf8(out).unwrap();

        assert!(line.contains("震度7"));
        assert!(line.contains("M7.6"));
        assert!(line.contains("石川県能登地方"));
        assert!(line.contains(RED));
        assert_eq!(line.lines().count(), 1);
    }

    #[test]
    fn test_ndjson_shape() {
        let mut out = Vec::new();
        write_ndjson(&mut out, &[sample(), sample()]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["severity"], "severe");
        assert_eq!(value["max_scale"], 70);
        assert_eq!(value["max_intensity"], "7");
        assert_eq!(value["time"], "2024-01-01T16:10:00+09:00");
    }

    #[test]
    fn test_warnings_human_empty() {
        let mut out = Vec::new();
        write_warnings(&mut out, &[], Format::Human).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("No active warnings"));
    }
}
