use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use cache::Cache;
use context_server::{Tool, ToolContent, ToolExecutor};
use http_client::HttpClient;
use indoc::indoc;
use serde_json::{Value, json};

use crate::{
    config::{
        CONF_GOOGLE_PLACES_API_KEY, CONF_GOOGLE_PLACES_LATITUDE, CONF_GOOGLE_PLACES_LONGITUDE,
        CONF_GOOGLE_PLACES_NUM_RESULTS, CONF_GOOGLE_PLACES_RADIUS, CONF_GOOGLE_PLACES_RANKING,
        Config,
    },
    error::ToolError,
    response::{SearchResult, ToolResponse},
    utils::{Method, cached_results, fetch_json, store_results, str_field, string_argument},
};

const NAMESPACE: &str = "find_places";
const PLACES_SEARCH_URL: &str = "https://places.googleapis.com/v1/places:searchText";
const FIELD_MASK: &str = "places.displayName,places.formattedAddress,places.rating,places.currentOpeningHours.openNow,places.googleMapsUri";

const DEFAULT_RADIUS_KM: f64 = 5.0;
// Largest location bias radius Places accepts, in meters.
const MAX_RADIUS_METERS: f64 = 50_000.0;

const RESPONSE_INSTRUCTION: &str = indoc! {"
    Review the places to provide the user with a clear and concise answer to their query.
    Mention the name and address of the most relevant places, and whether they are open if known.
    Your response must be in plain-text, without the use of any formatting, and should be kept to 2-3 sentences."};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RankPreference {
    Distance,
    Relevance,
}

impl RankPreference {
    fn from_config(config: &Config) -> Self {
        match config.string(CONF_GOOGLE_PLACES_RANKING) {
            Some(value) if value.eq_ignore_ascii_case("relevance") => Self::Relevance,
            _ => Self::Distance,
        }
    }

    fn as_api(&self) -> &'static str {
        match self {
            Self::Distance => "DISTANCE",
            Self::Relevance => "RELEVANCE",
        }
    }
}

pub struct FindPlacesTool {
    http_client: Arc<dyn HttpClient>,
    cache: Arc<dyn Cache>,
    config: Arc<Config>,
    endpoint: String,
}

impl FindPlacesTool {
    pub fn new(http_client: Arc<dyn HttpClient>, cache: Arc<dyn Cache>, config: Arc<Config>) -> Self {
        Self {
            http_client,
            cache,
            config,
            endpoint: PLACES_SEARCH_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub async fn invoke(&self, query: &str, config: &Config) -> ToolResponse {
        log::info!("Place search requested for: {}", query);

        match self.search(query, config).await {
            Ok(response) => response,
            Err(err) => {
                log::error!("Place search error: {}", err);
                err.into_response("Error finding places")
            }
        }
    }

    async fn search(&self, query: &str, config: &Config) -> Result<ToolResponse, ToolError> {
        let api_key = config.string(CONF_GOOGLE_PLACES_API_KEY).ok_or_else(|| {
            ToolError::Configuration("Google Places API key not configured".into())
        })?;
        let num_results = config.u64_or(CONF_GOOGLE_PLACES_NUM_RESULTS, 2);
        let body = request_body(query, num_results, config);

        if let Some(results) = cached_results(self.cache.as_ref(), NAMESPACE, &body) {
            return Ok(ToolResponse::results(results, RESPONSE_INSTRUCTION));
        }

        let data = fetch_json(
            &self.http_client,
            Method::Post(body.clone()),
            &self.endpoint,
            &[
                ("X-Goog-Api-Key", api_key),
                ("X-Goog-FieldMask", FIELD_MASK.to_string()),
            ],
        )
        .await?;

        let results = format_results(&data, num_results as usize);
        store_results(self.cache.as_ref(), NAMESPACE, &body, &results);

        Ok(ToolResponse::results(results, RESPONSE_INSTRUCTION))
    }
}

/// Builds the `places:searchText` body. The body doubles as the cache key
/// parameters since it carries every input that shapes the results.
fn request_body(query: &str, num_results: u64, config: &Config) -> Value {
    let mut body = json!({
        "textQuery": query,
        "pageSize": num_results,
        "rankPreference": RankPreference::from_config(config).as_api(),
    });

    let latitude = config.f64(CONF_GOOGLE_PLACES_LATITUDE);
    let longitude = config.f64(CONF_GOOGLE_PLACES_LONGITUDE);
    if let (Some(latitude), Some(longitude)) = (latitude, longitude) {
        let radius_km = config
            .f64(CONF_GOOGLE_PLACES_RADIUS)
            .filter(|r| *r > 0.0)
            .unwrap_or(DEFAULT_RADIUS_KM);

        body["locationBias"] = json!({
            "circle": {
                "center": {"latitude": latitude, "longitude": longitude},
                "radius": (radius_km * 1000.0).min(MAX_RADIUS_METERS),
            }
        });
    }

    body
}

fn format_results(data: &Value, limit: usize) -> Vec<SearchResult> {
    let Some(places) = data.get("places").and_then(|p| p.as_array()) else {
        return Vec::new();
    };

    places
        .iter()
        .take(limit)
        .map(|place| {
            let name = place
                .pointer("/displayName/text")
                .and_then(|n| n.as_str())
                .unwrap_or("");

            let mut details = Vec::new();
            let address = str_field(place, "formattedAddress");
            if !address.is_empty() {
                details.push(address.to_string());
            }
            if let Some(rating) = place.get("rating").and_then(|r| r.as_f64()) {
                details.push(format!("Rating: {}", rating));
            }
            match place
                .pointer("/currentOpeningHours/openNow")
                .and_then(|o| o.as_bool())
            {
                Some(true) => details.push("Open now".into()),
                Some(false) => details.push("Closed now".into()),
                None => {}
            }

            SearchResult::with_source(name, &details.join("; "), str_field(place, "googleMapsUri"))
        })
        .collect()
}

#[async_trait]
impl ToolExecutor for FindPlacesTool {
    async fn execute(&self, arguments: Option<Value>) -> Result<Vec<ToolContent>> {
        log::debug!("Executing FindPlacesTool");

        let response = match string_argument(arguments.as_ref(), "query") {
            Ok(query) => self.invoke(query, &self.config).await,
            Err(err) => err.into_response("Error finding places"),
        };

        response.into_content()
    }

    fn to_tool(&self) -> Tool {
        Tool {
            name: NAMESPACE.into(),
            description: Some(
                "Find places such as businesses, restaurants and points of interest near the user, with their address, rating and opening status".into(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to look for, e.g. 'coffee shop' or 'pharmacy open now'"
                    }
                },
                "required": ["query"]
            }),
        }
    }
}
