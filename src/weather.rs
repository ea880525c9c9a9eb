//! Current-weather client.
//!
//! Two providers: OpenWeatherMap (needs an API key) and Open-Meteo (keyless).
//! Every call goes to the network; nothing is cached and nothing is retried.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::errors::{FetchError, QuakedeckError};
use crate::models::WeatherSnapshot;

/// Default request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// User agent string for API requests.
const USER_AGENT: &str = concat!("quakedeck/", env!("CARGO_PKG_VERSION"));

const OPENWEATHERMAP_BASE_URL: &str = "https://api.openweathermap.org";
const OPEN_METEO_BASE_URL: &str = "https://api.open-meteo.com";

/// Weather data provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeatherProvider {
    OpenWeatherMap,
    #[default]
    OpenMeteo,
}

impl WeatherProvider {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenWeatherMap => "openweathermap",
            Self::OpenMeteo => "open-meteo",
        }
    }

    /// Whether requests must carry an API key.
    #[must_use]
    pub const fn requires_credential(self) -> bool {
        matches!(self, Self::OpenWeatherMap)
    }

    const fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenWeatherMap => OPENWEATHERMAP_BASE_URL,
            Self::OpenMeteo => OPEN_METEO_BASE_URL,
        }
    }
}

impl std::str::FromStr for WeatherProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openweathermap" | "owm" => Ok(Self::OpenWeatherMap),
            "open-meteo" | "openmeteo" => Ok(Self::OpenMeteo),
            _ => Err(format!(
                "unknown weather provider: {s} (expected: openweathermap, open-meteo)"
            )),
        }
    }
}

// OpenWeatherMap /data/2.5/weather
#[derive(Debug, Deserialize)]
struct OwmResponse {
    #[serde(default)]
    name: String,
    #[serde(default)]
    weather: Vec<OwmCondition>,
    main: OwmMain,
    #[serde(default)]
    wind: Option<OwmWind>,
}

#[derive(Debug, Deserialize)]
struct OwmCondition {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwmMain {
    temp: f64,
}

#[derive(Debug, Deserialize)]
struct OwmWind {
    speed: f64,
}

// Open-Meteo /v1/forecast?current_weather=true
#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    current_weather: CurrentWeather,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature: f64,
    windspeed: f64,
    weathercode: u8,
}

/// Client for the configured weather provider.
pub struct WeatherClient {
    client: Client,
    provider: WeatherProvider,
    base_url: String,
}

impl WeatherClient {
    /// Create a client against the provider's public endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(provider: WeatherProvider) -> Result<Self, QuakedeckError> {
        Self::with_base_url(provider, provider.default_base_url())
    }

    /// Create a client against a custom base URL (proxies, tests).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn with_base_url(
        provider: WeatherProvider,
        base_url: impl Into<String>,
    ) -> Result<Self, QuakedeckError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            provider,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn provider(&self) -> WeatherProvider {
        self.provider
    }

    /// Fetch current conditions at `(lat, lon)`.
    ///
    /// Short-circuits without a request when the coordinates are not finite
    /// or the provider needs a key and `api_key` is absent or blank.
    ///
    /// # Errors
    ///
    /// Returns a normalized `FetchError`; never panics on bad responses.
    #[instrument(skip(self, api_key), fields(provider = self.provider.as_str()))]
    pub async fn fetch_weather(
        &self,
        lat: f64,
        lon: f64,
        api_key: Option<&str>,
    ) -> Result<WeatherSnapshot, FetchError> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(FetchError::InvalidCoordinates { lat, lon });
        }

        match self.provider {
            WeatherProvider::OpenWeatherMap => {
                let key = api_key
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .ok_or(FetchError::CredentialMissing)?;
                self.fetch_openweathermap(lat, lon, key).await
            }
            WeatherProvider::OpenMeteo => self.fetch_open_meteo(lat, lon).await,
        }
    }

    async fn fetch_openweathermap(
        &self,
        lat: f64,
        lon: f64,
        key: &str,
    ) -> Result<WeatherSnapshot, FetchError> {
        let url = format!("{}/data/2.5/weather", self.base_url);
        let query = [
            ("lat", lat.to_string()),
            ("lon", lon.to_string()),
            ("units", "metric".to_string()),
            ("lang", "ja".to_string()),
            ("appid", key.to_string()),
        ];

        let body = self.get_text(&url, &query).await?;
        let data: OwmResponse = serde_json::from_str(&body)?;

        let description = data
            .weather
            .into_iter()
            .next()
            .map(|w| w.description)
            .unwrap_or_default();

        Ok(WeatherSnapshot {
            location_label: format!("{} ({lat:.2}, {lon:.2})", data.name)
                .trim_start()
                .to_string(),
            temperature_c: data.main.temp,
            wind_speed: data.wind.map_or(0.0, |w| w.speed),
            description,
        })
    }

    async fn fetch_open_meteo(&self, lat: f64, lon: f64) -> Result<WeatherSnapshot, FetchError> {
        let url = format!("{}/v1/forecast", self.base_url);
        let query = [
            ("latitude", lat.to_string()),
            ("longitude", lon.to_string()),
            ("current_weather", "true".to_string()),
        ];

        let body = self.get_text(&url, &query).await?;
        let data: OpenMeteoResponse = serde_json::from_str(&body)?;
        let current = data.current_weather;

        Ok(WeatherSnapshot {
            location_label: format!("({lat:.2}, {lon:.2})"),
            temperature_c: current.temperature,
            wind_speed: current.windspeed,
            description: weather_description(current.weathercode).to_string(),
        })
    }

    async fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String, FetchError> {
        debug!("fetching weather from {}", url);

        let response = self.client.get(url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::BadStatus {
                status: status.as_u16(),
            });
        }

        Ok(response.text().await?)
    }
}

/// Convert a WMO weather code to a description.
#[must_use]
pub fn weather_description(code: u8) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 | 48 => "Fog",
        51 | 53 | 55 => "Drizzle",
        56 | 57 => "Freezing drizzle",
        61 | 63 | 65 => "Rain",
        66 | 67 => "Freezing rain",
        71 | 73 | 75 => "Snow",
        77 => "Snow grains",
        80..=82 => "Rain showers",
        85 | 86 => "Snow showers",
        95 => "Thunderstorm",
        96 | 99 => "Thunderstorm with hail",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Router;
    use axum::http::StatusCode;
    use tokio::net::TcpListener;

    use super::*;

    /// Serve `body` with `status` on every path, counting hits.
    async fn stub_server(status: StatusCode, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().fallback(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (status, body)
            }
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), hits)
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!("owm".parse(), Ok(WeatherProvider::OpenWeatherMap));
        assert_eq!("Open-Meteo".parse(), Ok(WeatherProvider::OpenMeteo));
        assert!("accuweather".parse::<WeatherProvider>().is_err());
        assert!(WeatherProvider::OpenWeatherMap.requires_credential());
        assert!(!WeatherProvider::OpenMeteo.requires_credential());
    }

    #[tokio::test]
    async fn test_missing_key_never_hits_network() {
        let (base, hits) = stub_server(StatusCode::OK, "{}").await;
        let client = WeatherClient::with_base_url(WeatherProvider::OpenWeatherMap, base).unwrap();

        let result = client.fetch_weather(35.0, 139.0, None).await;
        assert!(matches!(result, Err(FetchError::CredentialMissing)));

        let result = client.fetch_weather(35.0, 139.0, Some("   ")).await;
        assert!(matches!(result, Err(FetchError::CredentialMissing)));

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_finite_coordinates_short_circuit() {
        let (base, hits) = stub_server(StatusCode::OK, "{}").await;
        let client = WeatherClient::with_base_url(WeatherProvider::OpenMeteo, base).unwrap();

        let result = client.fetch_weather(f64::NAN, 139.0, None).await;
        assert!(matches!(result, Err(FetchError::InvalidCoordinates { .. })));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_openweathermap_snapshot() {
        let body = r#"{"name": "Tokyo", "weather": [{"description": "晴天"}],
                       "main": {"temp": 21.4}, "wind": {"speed": 3.1}}"#;
        let (base, hits) = stub_server(StatusCode::OK, body).await;
        let client = WeatherClient::with_base_url(WeatherProvider::OpenWeatherMap, base).unwrap();

        let snapshot = client
            .fetch_weather(35.6895, 139.6917, Some("secret"))
            .await
            .expect("snapshot");

        assert_eq!(snapshot.location_label, "Tokyo (35.69, 139.69)");
        assert_eq!(snapshot.description, "晴天");
        assert!((snapshot.temperature_c - 21.4).abs() < f64::EPSILON);
        assert!((snapshot.wind_speed - 3.1).abs() < f64::EPSILON);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_meteo_snapshot() {
        let body = r#"{"current_weather": {"temperature": 12.5, "windspeed": 8.0, "weathercode": 61}}"#;
        let (base, _hits) = stub_server(StatusCode::OK, body).await;
        let client = WeatherClient::with_base_url(WeatherProvider::OpenMeteo, base).unwrap();

        let snapshot = client.fetch_weather(43.0618, 141.3545, None).await.unwrap();
        assert_eq!(snapshot.description, "Rain");
        assert_eq!(snapshot.location_label, "(43.06, 141.35)");
    }

    #[tokio::test]
    async fn test_error_normalization() {
        let (base, _) = stub_server(StatusCode::UNAUTHORIZED, "{}").await;
        let client = WeatherClient::with_base_url(WeatherProvider::OpenWeatherMap, base).unwrap();
        let result = client.fetch_weather(35.0, 139.0, Some("bad")).await;
        assert!(matches!(result, Err(FetchError::BadStatus { status: 401 })));

        let (base, _) = stub_server(StatusCode::OK, "<html>").await;
        let client = WeatherClient::with_base_url(WeatherProvider::OpenMeteo, base).unwrap();
        let result = client.fetch_weather(35.0, 139.0, None).await;
        assert!(matches!(result, Err(FetchError::Decode(_))));

        // Nothing listens on the discard port
        let client =
            WeatherClient::with_base_url(WeatherProvider::OpenMeteo, "http://127.0.0.1:9").unwrap();
        let result = client.fetch_weather(35.0, 139.0, None).await;
        assert!(matches!(result, Err(FetchError::Network(_))));
    }

    #[test]
    fn test_weather_codes() {
        assert_eq!(weather_description(0), "Clear sky");
        assert_eq!(weather_description(81), "Rain showers");
        assert_eq!(weather_description(250), "Unknown");
    }
}
