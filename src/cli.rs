//! Command-line interface definitions.
//!
//! Uses clap derive API for argument parsing.

use clap::{Parser, Subcommand};

use crate::feed::P2P_WS_URL;
use crate::filters::RadiusFilter;
use crate::models::Severity;
use crate::output::Format;
use crate::warnings::JMA_WARNINGS_URL;
use crate::weather::WeatherProvider;

/// Live earthquake, weather and warnings dashboard for Japan.
#[derive(Parser, Debug)]
#[command(name = "quakedeck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    pub quiet: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the web dashboard
    Serve(ServeArgs),

    /// Stream quake reports to the terminal
    Watch(WatchArgs),

    /// Show current weather at a location (one-shot)
    Weather(WeatherArgs),

    /// Show active JMA warnings (one-shot)
    Warnings(WarningsArgs),
}

/// Arguments for the `serve` command.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(long, short = 'p', default_value = "8080")]
    pub port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Quake feed WebSocket URL
    #[arg(long, default_value = P2P_WS_URL)]
    pub feed_url: String,

    /// Seconds to wait before reconnecting the feed
    #[arg(long, default_value = "5")]
    pub reconnect_delay: u64,

    /// Weather provider: open-meteo or openweathermap
    #[arg(long, default_value = "open-meteo", value_parser = parse_provider)]
    pub provider: WeatherProvider,

    /// Weather API key (required for openweathermap)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Warnings document URL
    #[arg(long, default_value = JMA_WARNINGS_URL)]
    pub warnings_url: String,

    /// Quake history length (20-50)
    #[arg(long, default_value = "20")]
    pub history: usize,

    /// Weather refresh interval in seconds (0 disables, minimum 10)
    #[arg(long, default_value = "60")]
    pub weather_interval: u64,

    /// Warnings refresh interval in seconds (0 fetches once, minimum 60)
    #[arg(long, default_value = "600")]
    pub warnings_interval: u64,

    /// Minimum severity for desktop notifications
    #[arg(long, default_value = "high", value_parser = parse_severity)]
    pub notify_min: Severity,

    /// Minimum severity for the dashboard alert sound
    #[arg(long, default_value = "high", value_parser = parse_severity)]
    pub alert_min: Severity,

    /// Open browser automatically
    #[arg(long)]
    pub open: bool,
}

/// Arguments for the `watch` command.
#[derive(Parser, Debug)]
pub struct WatchArgs {
    /// Quake feed WebSocket URL
    #[arg(long, default_value = P2P_WS_URL)]
    pub feed_url: String,

    /// Seconds to wait before reconnecting
    #[arg(long, default_value = "5")]
    pub reconnect_delay: u64,

    /// Minimum magnitude to show
    #[arg(long)]
    pub min_magnitude: Option<f64>,

    /// Minimum severity to show: low, moderate, high, severe
    #[arg(long, value_parser = parse_severity)]
    pub min_severity: Option<Severity>,

    /// Radius filter: lat,lon,radius_km
    #[arg(long, value_parser = parse_radius)]
    pub radius: Option<RadiusFilter>,

    /// Ring the terminal bell for reports at or above this severity
    #[arg(long, value_parser = parse_severity)]
    pub bell: Option<Severity>,

    /// Output format
    #[arg(long, short = 'f', default_value = "human", value_parser = parse_format)]
    pub format: Format,
}

/// Arguments for the `weather` command.
#[derive(Parser, Debug)]
pub struct WeatherArgs {
    /// Latitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    /// Longitude in degrees
    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,

    /// Weather provider: open-meteo or openweathermap
    #[arg(long, default_value = "open-meteo", value_parser = parse_provider)]
    pub provider: WeatherProvider,

    /// Weather API key (required for openweathermap)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Output format
    #[arg(long, short = 'f', default_value = "human", value_parser = parse_format)]
    pub format: Format,
}

/// Arguments for the `warnings` command.
#[derive(Parser, Debug)]
pub struct WarningsArgs {
    /// Warnings document URL (defaults to the JMA endpoint)
    #[arg(long)]
    pub url: Option<String>,

    /// Only show warnings whose area name contains this text
    #[arg(long)]
    pub area: Option<String>,

    /// Output format
    #[arg(long, short = 'f', default_value = "human", value_parser = parse_format)]
    pub format: Format,
}

/// Parse an output format from string.
fn parse_format(s: &str) -> Result<Format, String> {
    s.parse()
}

/// Parse a radius filter from string.
fn parse_radius(s: &str) -> Result<RadiusFilter, String> {
    s.parse()
}

fn parse_severity(s: &str) -> Result<Severity, String> {
    s.parse()
}

fn parse_provider(s: &str) -> Result<WeatherProvider, String> {
    s.parse()
}
