use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use http_client::HttpClient;
use serde_json::{Value, json};

use crate::{
    config::{CONF_HOME_ASSISTANT_TOKEN, CONF_HOME_ASSISTANT_URL, Config},
    error::ToolError,
    forecast::{ForecastEntry, ForecastKind},
    units::TemperatureUnit,
    utils::{Method, fetch_json},
};

/// Source of weather forecasts, keyed by entity.
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn get_forecasts(&self, entity_id: &str, kind: ForecastKind) -> Result<Vec<ForecastEntry>>;

    /// Unit the provider reports temperatures in.
    async fn temperature_unit(&self) -> Result<TemperatureUnit>;
}

/// Forecasts from a Home Assistant instance through its REST API.
pub struct HomeAssistantForecasts {
    http_client: Arc<dyn HttpClient>,
    base_url: Option<String>,
    token: Option<String>,
    temperature_unit: OnceLock<TemperatureUnit>,
}

impl HomeAssistantForecasts {
    pub fn new(http_client: Arc<dyn HttpClient>, config: &Config) -> Self {
        Self {
            http_client,
            base_url: config
                .string(CONF_HOME_ASSISTANT_URL)
                .map(|url| url.trim_end_matches('/').to_string()),
            token: config.string(CONF_HOME_ASSISTANT_TOKEN),
            temperature_unit: OnceLock::new(),
        }
    }

    fn base_url(&self) -> Result<&str> {
        self.base_url
            .as_deref()
            .ok_or_else(|| anyhow!("Home Assistant URL not configured"))
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        self.token
            .iter()
            .map(|token| ("Authorization", format!("Bearer {}", token)))
            .collect()
    }
}

#[async_trait]
impl ForecastProvider for HomeAssistantForecasts {
    async fn get_forecasts(&self, entity_id: &str, kind: ForecastKind) -> Result<Vec<ForecastEntry>> {
        let url = format!(
            "{}/api/services/weather/get_forecasts?return_response",
            self.base_url()?
        );
        log::debug!("Requesting {} forecast for {}", kind, entity_id);

        let response = fetch_json(
            &self.http_client,
            Method::Post(json!({ "entity_id": entity_id, "type": kind.as_str() })),
            &url,
            &self.headers(),
        )
        .await
        .map_err(provider_error)?;

        extract_forecast(&response, entity_id, kind)
    }

    async fn temperature_unit(&self) -> Result<TemperatureUnit> {
        if let Some(unit) = self.temperature_unit.get() {
            return Ok(*unit);
        }

        let url = format!("{}/api/config", self.base_url()?);
        let response = fetch_json(&self.http_client, Method::Get, &url, &self.headers())
            .await
            .map_err(provider_error)?;

        let unit = response
            .pointer("/unit_system/temperature")
            .and_then(|u| u.as_str())
            .ok_or_else(|| anyhow!("Home Assistant did not report a temperature unit"))?
            .parse::<TemperatureUnit>()?;

        Ok(*self.temperature_unit.get_or_init(|| unit))
    }
}

fn provider_error(err: ToolError) -> anyhow::Error {
    match err {
        ToolError::Status(status) => anyhow!("Home Assistant returned HTTP {}", status),
        other => other.into(),
    }
}

/// Pulls `entity_id`'s forecast list out of a `get_forecasts` response. Both
/// the REST shape (`{"service_response": {...}}`) and the bare service
/// response are accepted.
pub fn extract_forecast(
    response: &Value,
    entity_id: &str,
    kind: ForecastKind,
) -> Result<Vec<ForecastEntry>> {
    let service_response = response.get("service_response").unwrap_or(response);

    let forecast = service_response
        .get(entity_id)
        .and_then(|entity| entity.get("forecast"))
        .and_then(|forecast| forecast.as_array())
        .filter(|forecast| !forecast.is_empty())
        .ok_or_else(|| anyhow!("Failed to retrieve {} forecast from entity", kind))?;

    forecast
        .iter()
        .map(|entry| serde_json::from_value(entry.clone()))
        .collect::<Result<Vec<ForecastEntry>, _>>()
        .with_context(|| format!("Malformed {} forecast from {}", kind, entity_id))
}
