//! Error types for quakedeck.
//!
//! Uses `thiserror` for library-style error definitions.

use thiserror::Error;

/// Errors from the quake feed, decoding and dashboard commands.
#[derive(Error, Debug)]
pub enum QuakedeckError {
    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport failed
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON parsing failed
    #[error("Failed to parse JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Report validation failed
    #[error("Invalid report data: {0}")]
    Validation(String),

    /// Area is not in the fixed area table
    #[error("Unknown area: {0}")]
    UnknownArea(String),
}

/// Normalized failure of a weather or warnings fetch.
///
/// Every variant maps to a placeholder on the dashboard; none is fatal.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The provider needs an API key and none is configured
    #[error("API key not configured")]
    CredentialMissing,

    /// Latitude or longitude is NaN or infinite
    #[error("coordinates must be finite (lat {lat}, lon {lon})")]
    InvalidCoordinates { lat: f64, lon: f64 },

    /// Transport-level failure (DNS, connect, timeout)
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("API returned HTTP {status}")]
    BadStatus { status: u16 },

    /// Body was not the expected JSON
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// JSON was well-formed but missing required structure
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
