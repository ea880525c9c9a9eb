//! quakedeck - live earthquake, weather and warnings dashboard for Japan.
//!
//! Streams JMA earthquake reports from the P2P地震情報 WebSocket feed onto a
//! browser map, next to current weather and active JMA warnings.

use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::error;

mod cli;
mod controller;
mod dedup;
mod errors;
mod feed;
mod filters;
mod map;
mod models;
mod output;
mod render;
mod runtime;
mod server;
mod tasks;
mod warnings;
mod weather;

use cli::{Cli, Command};
use feed::QuakeFeedClient;
use filters::ReportFilter;
use warnings::WarningsClient;
use weather::WeatherClient;

/// Shortest allowed periodic refresh intervals, in seconds.
const MIN_WEATHER_INTERVAL: u64 = 10;
const MIN_WARNINGS_INTERVAL: u64 = 60;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Command::Serve(args) => cmd_serve(args),
        Command::Watch(args) => cmd_watch(args),
        Command::Weather(args) => cmd_weather(args),
        Command::Warnings(args) => cmd_warnings(args),
    }
}

/// Initialize tracing subscriber.
fn init_tracing(verbose: bool, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn tokio_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to create tokio runtime")
}

/// Clamp a refresh interval to `min`, keeping 0 as "off".
fn refresh_interval(name: &str, secs: u64, min: u64) -> Duration {
    if secs == 0 {
        return Duration::ZERO;
    }
    if secs < min {
        tracing::warn!("{name} interval clamped to minimum of {min} seconds");
    }
    Duration::from_secs(secs.max(min))
}

/// Execute the `serve` command - web dashboard.
fn cmd_serve(args: cli::ServeArgs) -> Result<()> {
    let config = server::ServerConfig {
        port: args.port,
        host: args.host.clone(),
        dashboard: runtime::DashboardConfig {
            feed_url: args.feed_url.clone(),
            reconnect_delay: Duration::from_secs(args.reconnect_delay.max(1)),
            provider: args.provider,
            weather_base_url: None,
            api_key: args.api_key,
            warnings_url: args.warnings_url,
            history_capacity: args.history,
            weather_interval: refresh_interval("weather", args.weather_interval, MIN_WEATHER_INTERVAL),
            warnings_interval: refresh_interval(
                "warnings",
                args.warnings_interval,
                MIN_WARNINGS_INTERVAL,
            ),
            min_notify_severity: args.notify_min,
            min_alert_severity: args.alert_min,
        },
    };

    // Print startup message
    let url = format!("http://{}:{}", args.host, args.port);
    println!("\x1b[1mquakedeck\x1b[0m");
    println!("\x1b[2m───────────────────────────────────────\x1b[0m");
    println!("  Local:    \x1b[96m{url}\x1b[0m");
    println!("  Feed:     {}", args.feed_url);
    println!("  Weather:  {}", args.provider.as_str());
    println!("\x1b[2m───────────────────────────────────────\x1b[0m");
    println!("\x1b[2mPress Ctrl+C to stop\x1b[0m\n");

    // Open browser if requested (using xdg-open/open command)
    if args.open {
        #[cfg(target_os = "linux")]
        let _ = std::process::Command::new("xdg-open").arg(&url).spawn();
        #[cfg(target_os = "macos")]
        let _ = std::process::Command::new("open").arg(&url).spawn();
        #[cfg(target_os = "windows")]
        let _ = std::process::Command::new("cmd").args(["/c", "start", &url]).spawn();
    }

    tokio_runtime()?.block_on(server::run_server(config))
}

/// Execute the `watch` command - stream reports to the terminal.
fn cmd_watch(args: cli::WatchArgs) -> Result<()> {
    let filter = ReportFilter {
        min_magnitude: args.min_magnitude,
        min_severity: args.min_severity,
        radius: args.radius,
    };

    tracing::info!("streaming quake reports from {}", args.feed_url);

    if args.format == output::Format::Human {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "\x1b[1mquakedeck watch\x1b[0m")?;
        writeln!(
            handle,
            "\x1b[2mFeed: {} | Press Ctrl+C to stop\x1b[0m",
            args.feed_url
        )?;
        writeln!(
            handle,
            "\x1b[2m─────────────────────────────────────────────────────────────────────\x1b[0m"
        )?;
    }

    let format = args.format;
    let bell = args.bell;
    let client = QuakeFeedClient::new(args.feed_url)
        .with_reconnect_delay(Duration::from_secs(args.reconnect_delay.max(1)));

    tokio_runtime()?.block_on(async move {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let feed = tokio::spawn(client.run(move |event| {
            let _ = tx.send(event);
        }));

        let mut dedup = dedup::ReportDedup::with_default_capacity();
        let mut shown = 0u64;

        loop {
            let event = tokio::select! {
                received = rx.recv() => match received {
                    Some(event) => event,
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            };

            if !filter.matches(&event) {
                continue;
            }
            if let Some(id) = event.id.as_deref() {
                if !dedup.check_and_mark(id) {
                    continue;
                }
            }

            let stdout = io::stdout();
            let mut handle = stdout.lock();
            if let Err(e) = output::write_events(&mut handle, std::slice::from_ref(&event), format) {
                tracing::warn!("failed to write report: {}", e);
            }
            if bell.is_some_and(|min| event.severity() >= min) {
                let _ = output::ring_bell(&mut handle);
            }

            // Flush after each report for real-time output
            let _ = handle.flush();

            shown += 1;
            tracing::debug!(
                "{} reports shown (dedup rate: {:.1}%)",
                shown,
                dedup.dupe_rate() * 100.0
            );
        }

        feed.abort();
        Ok(())
    })
}

/// Execute the `weather` command - one-shot fetch.
fn cmd_weather(args: cli::WeatherArgs) -> Result<()> {
    let client = WeatherClient::new(args.provider).context("failed to create weather client")?;

    let snapshot = tokio_runtime()?
        .block_on(client.fetch_weather(args.lat, args.lon, args.api_key.as_deref()))
        .context("failed to fetch weather")?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    output::write_weather(&mut handle, &snapshot, args.format)?;
    Ok(())
}

/// Execute the `warnings` command - one-shot fetch.
fn cmd_warnings(args: cli::WarningsArgs) -> Result<()> {
    let client = match args.url {
        Some(url) => WarningsClient::with_url(url),
        None => WarningsClient::new(),
    }
    .context("failed to create warnings client")?;

    let mut entries = tokio_runtime()?
        .block_on(client.fetch_warnings())
        .context("failed to fetch warnings")?;

    if let Some(area) = args.area.as_deref() {
        entries.retain(|e| e.area_name.contains(area));
    }

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    output::write_warnings(&mut handle, &entries, args.format)?;
    Ok(())
}
