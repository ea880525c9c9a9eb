//! JMA warnings client.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::errors::{FetchError, QuakedeckError};
use crate::models::WarningEntry;

/// Default request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 10;

const USER_AGENT: &str = concat!("quakedeck/", env!("CARGO_PKG_VERSION"));

/// JMA nationwide warnings document.
pub const JMA_WARNINGS_URL: &str = "https://www.jma.go.jp/bosai/warning/data/warning.json";

/// Status string of a warning that is currently issued.
pub const ACTIVE_STATUS: &str = "発表";

#[derive(Debug, Deserialize)]
struct WarningDocument {
    #[serde(rename = "areaTypes", default)]
    area_types: Vec<AreaType>,
}

#[derive(Debug, Deserialize)]
struct AreaType {
    #[serde(default)]
    areas: Vec<Area>,
}

#[derive(Debug, Deserialize)]
struct Area {
    #[serde(default)]
    name: String,
    #[serde(default)]
    warnings: Vec<Warning>,
}

#[derive(Debug, Deserialize)]
struct Warning {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: String,
}

/// Client for the JMA warnings endpoint.
pub struct WarningsClient {
    client: Client,
    url: String,
}

impl WarningsClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new() -> Result<Self, QuakedeckError> {
        Self::with_url(JMA_WARNINGS_URL)
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn with_url(url: impl Into<String>) -> Result<Self, QuakedeckError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Fetch the currently issued warnings, in document order.
    ///
    /// An empty list means no active warnings, which is distinct from an error.
    ///
    /// # Errors
    ///
    /// Returns a normalized `FetchError` on transport, status or decode failure.
    #[instrument(skip(self))]
    pub async fn fetch_warnings(&self) -> Result<Vec<WarningEntry>, FetchError> {
        debug!("fetching warnings from {}", self.url);

        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::BadStatus {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let entries = parse_warnings(&body)?;

        debug!("fetched {} active warnings", entries.len());
        Ok(entries)
    }
}

/// Extract active warnings from a warnings document.
///
/// # Errors
///
/// Returns `Decode` for malformed JSON and `InvalidResponse` when the
/// document has no area types.
pub fn parse_warnings(body: &str) -> Result<Vec<WarningEntry>, FetchError> {
    let document: WarningDocument = serde_json::from_str(body)?;

    let areas = document
        .area_types
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::InvalidResponse("missing areaTypes[0]".into()))?
        .areas;

    let entries = areas
        .into_iter()
        .flat_map(|area| {
            let area_name = area.name;
            area.warnings
                .into_iter()
                .filter(|w| w.status == ACTIVE_STATUS)
                .filter_map(move |w| {
                    w.name.map(|warning_name| WarningEntry {
                        area_name: area_name.clone(),
                        warning_name,
                    })
                })
        })
        .collect();

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use tokio::net::TcpListener;

    use super::*;

    const SAMPLE: &str = include_str!("../tools/sample_warning.json");

    #[test]
    fn test_parse_sample_document() {
        let entries = parse_warnings(SAMPLE).expect("parse");

        let pairs: Vec<(&str, &str)> = entries
            .iter()
            .map(|e| (e.area_name.as_str(), e.warning_name.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("石川県能登", "大雨警報"),
                ("石川県能登", "高潮警報"),
                ("新潟県上越", "暴風警報"),
            ]
        );
    }

    #[test]
    fn test_empty_active_list_is_ok() {
        let body = r#"{"areaTypes": [{"areas": [{"name": "東京都", "warnings": [{"name": "雷注意報", "status": "解除"}]}]}]}"#;
        assert_eq!(parse_warnings(body).unwrap(), vec![]);
    }

    #[test]
    fn test_missing_area_types_is_error() {
        assert!(matches!(
            parse_warnings(r#"{"areaTypes": []}"#),
            Err(FetchError::InvalidResponse(_))
        ));
        assert!(matches!(parse_warnings("[1, 2"), Err(FetchError::Decode(_))));
    }

    #[tokio::test]
    async fn test_fetch_over_http() {
        let app = Router::new()
            .route("/warning.json", get(|| async { SAMPLE }))
            .route(
                "/broken.json",
                get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = WarningsClient::with_url(format!("http://{addr}/warning.json")).unwrap();
        assert_eq!(client.fetch_warnings().await.unwrap().len(), 3);

        let client = WarningsClient::with_url(format!("http://{addr}/broken.json")).unwrap();
        assert!(matches!(
            client.fetch_warnings().await,
            Err(FetchError::BadStatus { status: 503 })
        ));
    }
}
