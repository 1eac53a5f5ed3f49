use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use cache::Cache;
use context_server::{Tool, ToolContent, ToolExecutor};
use http_client::HttpClient;
use indoc::indoc;
use serde_json::{Map, Value, json};

use crate::{
    config::{
        CONF_BRAVE_API_KEY, CONF_BRAVE_COUNTRY_CODE, CONF_BRAVE_LATITUDE, CONF_BRAVE_LONGITUDE,
        CONF_BRAVE_NUM_RESULTS, CONF_BRAVE_POST_CODE, CONF_BRAVE_TIMEZONE, Config,
    },
    error::ToolError,
    response::{SearchResult, ToolResponse},
    text::clean,
    utils::{
        Method, build_query_string, cached_results, fetch_json, store_results, str_field,
        string_argument,
    },
};

const NAMESPACE: &str = "search_web_brave";
const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";

const RESPONSE_INSTRUCTION: &str = indoc! {"
    Review the results to provide the user with a clear and concise answer to their query.
    If the search results provided do not answer the user request, advise the user of this.
    You may offer to perform related searches for the user, and if confirmed, search new queries to continue assisting the user.
    Your response must be in plain-text, without the use of any formatting, and should be kept to 2-3 sentences."};

/// Location hints forwarded to Brave as `X-Loc-*` headers.
const LOCATION_HEADERS: &[(&str, &str)] = &[
    (CONF_BRAVE_LATITUDE, "X-Loc-Lat"),
    (CONF_BRAVE_LONGITUDE, "X-Loc-Long"),
    (CONF_BRAVE_TIMEZONE, "X-Loc-Timezone"),
    (CONF_BRAVE_COUNTRY_CODE, "X-Loc-Country"),
    (CONF_BRAVE_POST_CODE, "X-Loc-Postal-Code"),
];

pub struct BraveSearchTool {
    http_client: Arc<dyn HttpClient>,
    cache: Arc<dyn Cache>,
    config: Arc<Config>,
    endpoint: String,
}

impl BraveSearchTool {
    pub fn new(http_client: Arc<dyn HttpClient>, cache: Arc<dyn Cache>, config: Arc<Config>) -> Self {
        Self {
            http_client,
            cache,
            config,
            endpoint: BRAVE_SEARCH_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub async fn invoke(&self, query: &str, config: &Config) -> ToolResponse {
        log::info!("Brave web search requested for: {}", query);

        match self.search(query, config).await {
            Ok(response) => response,
            Err(err) => {
                log::error!("Brave web search error: {}", err);
                err.into_response("Error searching web")
            }
        }
    }

    async fn search(&self, query: &str, config: &Config) -> Result<ToolResponse, ToolError> {
        let api_key = config
            .string(CONF_BRAVE_API_KEY)
            .ok_or_else(|| ToolError::Configuration("Brave API key not configured".into()))?;
        let num_results = config.u64_or(CONF_BRAVE_NUM_RESULTS, 2);

        let params = json!({
            "q": query,
            "count": num_results,
            "result_filter": "web",
        });

        let mut headers = vec![("X-Subscription-Token", api_key)];
        let mut cache_params = Map::new();
        cache_params.insert("q".into(), json!(query));
        cache_params.insert("count".into(), json!(num_results));
        for (key, header) in LOCATION_HEADERS {
            if let Some(value) = config.string(key) {
                cache_params.insert(key.to_string(), json!(value));
                headers.push((*header, value));
            }
        }
        let cache_params = Value::Object(cache_params);

        if let Some(results) = cached_results(self.cache.as_ref(), NAMESPACE, &cache_params) {
            return Ok(ToolResponse::results(results, RESPONSE_INSTRUCTION));
        }

        let url = format!("{}?{}", self.endpoint, build_query_string(&params));
        let data = fetch_json(&self.http_client, Method::Get, &url, &headers).await?;

        let results = format_results(&data, num_results as usize);
        store_results(self.cache.as_ref(), NAMESPACE, &cache_params, &results);

        Ok(ToolResponse::results(results, RESPONSE_INSTRUCTION))
    }
}

fn format_results(data: &Value, limit: usize) -> Vec<SearchResult> {
    let Some(items) = data.pointer("/web/results").and_then(|r| r.as_array()) else {
        return Vec::new();
    };

    items
        .iter()
        .take(limit)
        .map(|item| {
            let mut snippets = vec![clean(str_field(item, "description"))];
            if let Some(extra) = item.get("extra_snippets").and_then(|e| e.as_array()) {
                snippets.extend(extra.iter().filter_map(|s| s.as_str()).map(clean));
            }
            let text = snippets
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ");

            SearchResult::with_source(clean(str_field(item, "title")), &text, str_field(item, "url"))
        })
        .collect()
}

#[async_trait]
impl ToolExecutor for BraveSearchTool {
    async fn execute(&self, arguments: Option<Value>) -> Result<Vec<ToolContent>> {
        log::debug!("Executing BraveSearchTool");

        let response = match string_argument(arguments.as_ref(), "query") {
            Ok(query) => self.invoke(query, &self.config).await,
            Err(err) => err.into_response("Error searching web"),
        };

        response.into_content()
    }

    fn to_tool(&self) -> Tool {
        Tool {
            name: NAMESPACE.into(),
            description: Some(
                "Search the web using Brave Search to lookup information and answer user queries. You should use this tool to access additional information about the world".into(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The query to search for"
                    }
                },
                "required": ["query"]
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use http_client_reqwest::HttpClientReqwest;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, query_param},
    };

    use super::*;
    use crate::utils::testing::MemoryCache;

    fn tool(cache: Arc<MemoryCache>, endpoint: &str) -> BraveSearchTool {
        BraveSearchTool::new(
            Arc::new(HttpClientReqwest::default()),
            cache,
            Arc::new(Config::default()),
        )
        .with_endpoint(endpoint)
    }

    #[tokio::test]
    async fn missing_api_key_is_a_configuration_error() {
        let response = tool(Arc::new(MemoryCache::default()), "http://unused.invalid")
            .invoke("rust", &Config::default())
            .await;

        assert_eq!(response.to_value(), json!({"error": "Brave API key not configured"}));
    }

    #[tokio::test]
    async fn sends_token_and_location_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "coffee"))
            .and(query_param("result_filter", "web"))
            .and(header("X-Subscription-Token", "secret"))
            .and(header("X-Loc-Country", "US"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "web": {"results": [{
                    "title": "Best <strong>coffee</strong>",
                    "description": "Freshly roasted &amp; brewed.",
                    "url": "https://coffee.example",
                    "extra_snippets": ["Open <b>daily</b>."]
                }]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(MemoryCache::default());
        let config = Config::from_value(json!({
            CONF_BRAVE_API_KEY: "secret",
            CONF_BRAVE_COUNTRY_CODE: "US",
        }))
        .unwrap();
        let tool = tool(cache.clone(), &format!("{}/res/v1/web/search", server.uri()));

        let response = tool.invoke("coffee", &config).await;
        let cached = tool.invoke("coffee", &config).await;

        assert_eq!(
            response,
            ToolResponse::results(
                vec![SearchResult {
                    title: "Best coffee".into(),
                    description: "Freshly roasted & brewed. Open daily. (https://coffee.example)"
                        .into(),
                }],
                RESPONSE_INSTRUCTION
            )
        );
        assert_eq!(response, cached);
        assert_eq!(cache.write_count(), 1);
    }

    #[test]
    fn results_are_truncated_to_the_limit() {
        let data = json!({"web": {"results": [
            {"title": "a", "description": "first"},
            {"title": "b", "description": "second"},
            {"title": "c", "description": "third"},
        ]}});

        let results = format_results(&data, 2);
        assert_eq!(
            results.iter().map(|r| r.title.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(results[0].description, "first");
    }
}
