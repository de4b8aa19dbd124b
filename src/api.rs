use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RecorderError, RecorderResult};

/// How the trip was travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    #[default]
    Motorhome,
    Campervan,
    Caravan,
    Car,
    Other,
}

/// Trip metadata entered by the user when saving
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TripDetails {
    pub title: String,
    pub description: Option<String>,
    pub start_location: Option<String>,
    pub end_location: Option<String>,
    pub travel_mode: TravelMode,
}

/// Body of the submit-new-trip request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTrip {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_location: Option<String>,
    pub travel_mode: TravelMode,
    pub gpx: String,
}

impl NewTrip {
    pub fn new(details: TripDetails, gpx: String) -> Self {
        NewTrip {
            title: details.title,
            description: details.description,
            start_location: details.start_location,
            end_location: details.end_location,
            travel_mode: details.travel_mode,
            gpx,
        }
    }
}

/// Identifier of a trip created by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripId(pub String);

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything that can persist a finished trip
#[async_trait]
pub trait TripSubmitter: Send + Sync {
    async fn submit_trip(&self, trip: &NewTrip) -> RecorderResult<TripId>;
}

/// REST client for the trips backend
pub struct TripApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl TripApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("TripRecorder/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        TripApiClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

fn parse_trip_id(body: &Value) -> Option<TripId> {
    let id = body.get("id").or_else(|| body.get("trip").and_then(|t| t.get("id")))?;
    match id {
        Value::String(s) if !s.is_empty() => Some(TripId(s.clone())),
        Value::Number(n) => Some(TripId(n.to_string())),
        _ => None,
    }
}

fn validation_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl TripSubmitter for TripApiClient {
    async fn submit_trip(&self, trip: &NewTrip) -> RecorderResult<TripId> {
        let url = format!("{}/trips", self.base_url);
        let mut request = self.client.post(&url).json(trip);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RecorderError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RecorderError::Network(format!("Failed to read response: {}", e)))?;

        match status.as_u16() {
            200..=299 => {
                let value: Value = serde_json::from_str(&body)
                    .map_err(|e| RecorderError::Network(format!("Malformed response: {}", e)))?;
                let id = parse_trip_id(&value).ok_or_else(|| {
                    RecorderError::Network("Response did not contain a trip id".to_string())
                })?;
                log::info!("[api] trip {} created", id);
                Ok(id)
            }
            400 | 422 => Err(RecorderError::Validation(validation_message(&body))),
            code => Err(RecorderError::Http(code)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_trip_body() {
        let details = TripDetails {
            title: "Dolomites loop".to_string(),
            start_location: Some("Bolzano".to_string()),
            travel_mode: TravelMode::Campervan,
            ..Default::default()
        };
        let body = serde_json::to_value(NewTrip::new(details, "<gpx/>".to_string())).unwrap();

        assert_eq!(
            body,
            json!({
                "title": "Dolomites loop",
                "startLocation": "Bolzano",
                "travelMode": "campervan",
                "gpx": "<gpx/>"
            })
        );
    }

    #[test]
    fn test_parse_trip_id() {
        assert_eq!(parse_trip_id(&json!({"id": "abc"})), Some(TripId("abc".to_string())));
        assert_eq!(parse_trip_id(&json!({"id": 42})), Some(TripId("42".to_string())));
        assert_eq!(parse_trip_id(&json!({"trip": {"id": 7}})), Some(TripId("7".to_string())));
        assert_eq!(parse_trip_id(&json!({"id": ""})), None);
        assert_eq!(parse_trip_id(&json!({"ok": true})), None);
    }

    #[test]
    fn test_validation_message() {
        assert_eq!(validation_message(r#"{"message":"Title is required"}"#), "Title is required");
        assert_eq!(validation_message(r#"{"error":"Invalid GPX"}"#), "Invalid GPX");
        assert_eq!(validation_message("Bad Request\n"), "Bad Request");
    }
}
