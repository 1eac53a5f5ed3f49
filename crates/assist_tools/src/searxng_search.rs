use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use cache::Cache;
use context_server::{Tool, ToolContent, ToolExecutor};
use http_client::HttpClient;
use indoc::indoc;
use serde_json::{Value, json};

use crate::{
    config::{CONF_SEARXNG_NUM_RESULTS, CONF_SEARXNG_URL, Config},
    error::ToolError,
    response::{SearchResult, ToolResponse},
    text::clean,
    utils::{
        Method, USER_AGENT, build_query_string, cached_results, fetch_json, store_results,
        str_field, string_argument,
    },
};

const NAMESPACE: &str = "search_web_searxng";

const RESPONSE_INSTRUCTION: &str = indoc! {"
    Review the results to provide the user with a clear and concise answer to their query.
    If the search results provided do not answer the user request, advise the user of this.
    You may offer to perform related searches for the user, and if confirmed, search new queries to continue assisting the user.
    Your response must be in plain-text, without the use of any formatting, and should be kept to 2-3 sentences."};

pub struct SearxngSearchTool {
    http_client: Arc<dyn HttpClient>,
    cache: Arc<dyn Cache>,
    config: Arc<Config>,
}

impl SearxngSearchTool {
    pub fn new(http_client: Arc<dyn HttpClient>, cache: Arc<dyn Cache>, config: Arc<Config>) -> Self {
        Self {
            http_client,
            cache,
            config,
        }
    }

    pub async fn invoke(&self, query: &str, config: &Config) -> ToolResponse {
        log::info!("SearXNG web search requested for: {}", query);

        match self.search(query, config).await {
            Ok(response) => response,
            Err(err) => {
                log::error!("SearXNG web search error: {}", err);
                err.into_response("Error searching web")
            }
        }
    }

    async fn search(&self, query: &str, config: &Config) -> Result<ToolResponse, ToolError> {
        let base_url = config
            .string(CONF_SEARXNG_URL)
            .ok_or_else(|| ToolError::Configuration("SearXNG URL not configured".into()))?;
        let base_url = base_url.trim_end_matches('/');
        let num_results = config.u64_or(CONF_SEARXNG_NUM_RESULTS, 2);

        let params = json!({
            "q": query,
            "format": "json",
            "count": num_results,
        });
        let cache_params = json!({
            "base_url": base_url,
            "q": query,
            "format": "json",
            "count": num_results,
        });

        if let Some(results) = cached_results(self.cache.as_ref(), NAMESPACE, &cache_params) {
            return Ok(ToolResponse::results(results, RESPONSE_INSTRUCTION));
        }

        let url = format!("{}/search?{}", base_url, build_query_string(&params));
        let data = fetch_json(
            &self.http_client,
            Method::Get,
            &url,
            &[("User-Agent", USER_AGENT.to_string())],
        )
        .await?;

        let results = format_results(&data, num_results as usize);
        store_results(self.cache.as_ref(), NAMESPACE, &cache_params, &results);

        Ok(ToolResponse::results(results, RESPONSE_INSTRUCTION))
    }
}

fn format_results(data: &Value, limit: usize) -> Vec<SearchResult> {
    let Some(items) = data.get("results").and_then(|r| r.as_array()) else {
        return Vec::new();
    };

    items
        .iter()
        .take(limit)
        .map(|item| {
            SearchResult::with_source(
                str_field(item, "title"),
                &clean(str_field(item, "content")),
                str_field(item, "url"),
            )
        })
        .collect()
}

#[async_trait]
impl ToolExecutor for SearxngSearchTool {
    async fn execute(&self, arguments: Option<Value>) -> Result<Vec<ToolContent>> {
        log::debug!("Executing SearxngSearchTool");

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
                "Search the web using SearXNG to lookup information and answer user queries. You should use this tool to access additional information about the world".into(),
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
