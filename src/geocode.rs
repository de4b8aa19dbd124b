use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::POI_NAME_FALLBACK;
use crate::error::{RecorderError, RecorderResult};

/// Resolves coordinates to a human-readable place name
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn reverse(&self, latitude: f64, longitude: f64) -> RecorderResult<String>;
}

/// Resolve a name, falling back to the fixed label on any failure.
pub async fn resolve_or_fallback(
    geocoder: &dyn ReverseGeocoder,
    latitude: f64,
    longitude: f64,
) -> String {
    match geocoder.reverse(latitude, longitude).await {
        Ok(name) if !name.trim().is_empty() => name,
        Ok(_) => POI_NAME_FALLBACK.to_string(),
        Err(e) => {
            log::warn!("[geocode] reverse lookup for {},{} failed: {}", latitude, longitude, e);
            POI_NAME_FALLBACK.to_string()
        }
    }
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    name: Option<String>,
    display_name: Option<String>,
    error: Option<String>,
}

impl NominatimResponse {
    fn into_name(self) -> RecorderResult<String> {
        if let Some(error) = self.error {
            return Err(RecorderError::Geocoding(error));
        }
        self.name
            .filter(|n| !n.trim().is_empty())
            .or(self.display_name.filter(|n| !n.trim().is_empty()))
            .ok_or_else(|| RecorderError::Geocoding("No name for this location".to_string()))
    }
}

/// Nominatim reverse geocoding client
///
/// Sends an identifying user agent, as required by the public instance.
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
}

impl NominatimGeocoder {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("TripRecorder/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        NominatimGeocoder {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for NominatimGeocoder {
    fn default() -> Self {
        Self::new("https://nominatim.openstreetmap.org")
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn reverse(&self, latitude: f64, longitude: f64) -> RecorderResult<String> {
        let url = format!("{}/reverse", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", latitude.to_string()),
                ("lon", longitude.to_string()),
            ])
            .send()
            .await
            .map_err(|e| RecorderError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RecorderError::Http(status.as_u16()));
        }

        let body: NominatimResponse = response
            .json()
            .await
            .map_err(|e| RecorderError::Geocoding(format!("Failed to read response: {}", e)))?;
        body.into_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedGeocoder(RecorderResult<String>);

    #[async_trait]
    impl ReverseGeocoder for FixedGeocoder {
        async fn reverse(&self, _latitude: f64, _longitude: f64) -> RecorderResult<String> {
            self.0.clone()
        }
    }

    fn parse(raw: &str) -> RecorderResult<String> {
        serde_json::from_str::<NominatimResponse>(raw).unwrap().into_name()
    }

    #[test]
    fn test_prefers_short_name() {
        let raw = r#"{"name":"Piazza Maggiore","display_name":"Piazza Maggiore, Bologna, Italia"}"#;
        assert_eq!(parse(raw).unwrap(), "Piazza Maggiore");
    }

    #[test]
    fn test_falls_back_to_display_name() {
        let raw = r#"{"name":"","display_name":"Via Emilia, Modena"}"#;
        assert_eq!(parse(raw).unwrap(), "Via Emilia, Modena");
    }

    #[test]
    fn test_error_payload() {
        assert!(matches!(
            parse(r#"{"error":"Unable to geocode"}"#),
            Err(RecorderError::Geocoding(_))
        ));
        assert!(parse("{}").is_err());
    }

    #[tokio::test]
    async fn test_resolve_or_fallback() {
        let ok = FixedGeocoder(Ok("Rifugio".to_string()));
        assert_eq!(resolve_or_fallback(&ok, 1.0, 2.0).await, "Rifugio");

        let failing = FixedGeocoder(Err(RecorderError::Http(503)));
        assert_eq!(resolve_or_fallback(&failing, 1.0, 2.0).await, POI_NAME_FALLBACK);

        let blank = FixedGeocoder(Ok("  ".to_string()));
        assert_eq!(resolve_or_fallback(&blank, 1.0, 2.0).await, POI_NAME_FALLBACK);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let geocoder = NominatimGeocoder::new("http://localhost:8080/");
        assert_eq!(geocoder.base_url, "http://localhost:8080");
    }
}
