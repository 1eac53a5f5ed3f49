use std::{fmt, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use context_server::{Tool, ToolContent, ToolExecutor};
use indoc::indoc;
use serde_json::{Value, json};

use crate::{
    config::{CONF_DAILY_WEATHER_ENTITY, CONF_HOURLY_WEATHER_ENTITY, Config},
    error::ToolError,
    forecast::{
        ForecastEntry, ForecastKind, date_label, filter_by_date, precipitation_likelihood,
        resolve_target_date, time_label,
    },
    home_assistant::ForecastProvider,
    response::ToolResponse,
    units::UnitNormalizer,
};

pub const NO_FORECAST: &str = "No weather forecast available for the selected range";

const RESPONSE_INSTRUCTION: &str = indoc! {"
    Review the forecast and answer the user clearly.
    Temperatures must be reported in Fahrenheit (°F) unless the user explicitly requests Celsius.
    Always include the unit (°F or °C)."};

pub struct WeatherForecastTool {
    provider: Arc<dyn ForecastProvider>,
    config: Arc<Config>,
    units: UnitNormalizer,
}

impl WeatherForecastTool {
    pub fn new(provider: Arc<dyn ForecastProvider>, config: Arc<Config>) -> Self {
        Self {
            provider,
            config,
            units: UnitNormalizer::default(),
        }
    }

    pub async fn invoke(&self, range: &str, config: &Config) -> ToolResponse {
        self.invoke_at(range, config, Local::now()).await
    }

    /// Answers a forecast request as seen from `now`, whose timezone is used
    /// to place forecast entries on calendar days.
    pub async fn invoke_at<Tz>(&self, range: &str, config: &Config, now: DateTime<Tz>) -> ToolResponse
    where
        Tz: TimeZone + Send + Sync,
        Tz::Offset: fmt::Display + Send + Sync,
    {
        let range = range.trim().to_lowercase();
        log::info!("Weather forecast for the period: {}", range);

        match self.forecast(&range, config, &now).await {
            Ok(Some(forecast)) => ToolResponse::forecast(forecast, RESPONSE_INSTRUCTION),
            Ok(None) => ToolResponse::forecast(NO_FORECAST, RESPONSE_INSTRUCTION),
            Err(err) => {
                log::error!("Weather forecast error: {}", err);
                err.into_response("Error retrieving weather forecast")
            }
        }
    }

    async fn forecast<Tz>(
        &self,
        range: &str,
        config: &Config,
        now: &DateTime<Tz>,
    ) -> Result<Option<String>, ToolError>
    where
        Tz: TimeZone + Send + Sync,
        Tz::Offset: fmt::Display + Send + Sync,
    {
        let hourly_entity = config.entity(CONF_HOURLY_WEATHER_ENTITY);
        let daily_entity = config.entity(CONF_DAILY_WEATHER_ENTITY);
        let target_date = resolve_target_date(range, now);

        if let (Some(entity_id), Some(date)) = (hourly_entity.as_deref(), target_date) {
            match self.hourly_forecast(entity_id, date, now).await {
                Ok(Some(forecast)) => return Ok(Some(forecast)),
                Ok(None) => log::info!("Hourly forecast from {} has no entries for {}", entity_id, date),
                Err(err) => log::warn!(
                    "Hourly forecast from {} failed, falling back to daily: {}",
                    entity_id,
                    err
                ),
            }
        }

        match daily_entity {
            Some(entity_id) => Ok(self.daily_forecast(&entity_id, target_date, now).await?),
            None => Ok(None),
        }
    }

    async fn hourly_forecast<Tz>(
        &self,
        entity_id: &str,
        date: NaiveDate,
        now: &DateTime<Tz>,
    ) -> Result<Option<String>>
    where
        Tz: TimeZone + Send + Sync,
        Tz::Offset: fmt::Display + Send + Sync,
    {
        let forecast = self
            .provider
            .get_forecasts(entity_id, ForecastKind::Hourly)
            .await?;
        let forecast = filter_by_date(forecast, date, &now.timezone());
        if forecast.is_empty() {
            return Ok(None);
        }

        let source_unit = self.provider.temperature_unit().await?;
        let output = forecast
            .iter()
            .map(|hour| {
                let temperature = self
                    .units
                    .normalize(hour.temperature, source_unit)
                    .map(|t| self.format_temperature(t))
                    .unwrap_or_else(|| "Unavailable".to_string());

                let mut lines = vec![
                    format!("- Time: {}", time_label(&hour.datetime, &now.timezone())),
                    format!("  Temperature: {}", temperature),
                ];
                lines.extend(attribute_lines(hour));
                lines.join("\n")
            })
            .collect::<Vec<_>>();

        Ok(Some(output.join("\n")))
    }

    async fn daily_forecast<Tz>(
        &self,
        entity_id: &str,
        date: Option<NaiveDate>,
        now: &DateTime<Tz>,
    ) -> Result<Option<String>>
    where
        Tz: TimeZone + Send + Sync,
        Tz::Offset: fmt::Display + Send + Sync,
    {
        let mut forecast = self
            .provider
            .get_forecasts(entity_id, ForecastKind::Daily)
            .await?;
        if let Some(date) = date {
            forecast = filter_by_date(forecast, date, &now.timezone());
        }
        if forecast.is_empty() {
            return Ok(None);
        }

        let source_unit = self.provider.temperature_unit().await?;
        let output = forecast
            .iter()
            .map(|day| {
                let low = self.units.normalize(day.temperature_low, source_unit);
                let high = self.units.normalize(day.temperature, source_unit);

                let mut lines = vec![
                    format!("- Date: {}", date_label(&day.datetime, now)),
                    format!("  Temperature: {}", self.temperature_range(low, high)),
                ];
                lines.extend(attribute_lines(day));
                lines.join("\n")
            })
            .collect::<Vec<_>>();

        Ok(Some(output.join("\n")))
    }

    fn format_temperature(&self, value: f64) -> String {
        format!("{} {}", round(value), self.units.display_unit())
    }

    fn temperature_range(&self, low: Option<f64>, high: Option<f64>) -> String {
        match (low, high) {
            (Some(low), Some(high)) => format!(
                "{} - {} {}",
                round(low),
                round(high),
                self.units.display_unit()
            ),
            (None, Some(high)) => self.format_temperature(high),
            _ => "Unavailable".to_string(),
        }
    }
}

fn round(value: f64) -> i64 {
    value.round_ties_even() as i64
}

fn attribute_lines(entry: &ForecastEntry) -> Vec<String> {
    let mut lines = Vec::new();

    if let Some(condition) = &entry.condition {
        lines.push(format!("  General Condition: {}", condition));
    }

    if let Some(chance) = entry.precipitation_probability {
        lines.push(format!("  Precipitation: {}", precipitation_likelihood(chance)));
    }

    lines
}

#[async_trait]
impl ToolExecutor for WeatherForecastTool {
    async fn execute(&self, arguments: Option<Value>) -> Result<Vec<ToolContent>> {
        log::debug!("Executing WeatherForecastTool");

        let range = arguments
            .as_ref()
            .and_then(|args| args.get("range"))
            .and_then(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
            .unwrap_or("week");

        self.invoke(range, &self.config).await.into_content()
    }

    fn to_tool(&self) -> Tool {
        Tool {
            name: "GetWeatherForecast".into(),
            description: Some(
                "Use this tool to retrieve weather forecasts for a particular period. Defaults to the weeks weather if `range` is not specified.".into(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "range": {
                        "type": "string",
                        "description": "One of 'week', 'today', 'tomorrow', 'monday', 'tuesday', 'wednesday', 'thursday', 'friday', 'saturday', 'sunday'.",
                        "enum": [
                            "week", "today", "tomorrow", "monday", "tuesday", "wednesday",
                            "thursday", "friday", "saturday", "sunday"
                        ],
                        "default": "week"
                    }
                }
            }),
        }
    }
}
