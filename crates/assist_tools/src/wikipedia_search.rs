use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use cache::Cache;
use context_server::{Tool, ToolContent, ToolExecutor};
use http_client::HttpClient;
use indoc::indoc;
use serde_json::{Value, json};

use crate::{
    config::{CONF_WIKIPEDIA_NUM_RESULTS, Config},
    error::ToolError,
    response::{SearchResult, ToolResponse},
    text::clean,
    utils::{
        Method, USER_AGENT, build_query_string, cached_results, fetch_json, store_results,
        str_field, string_argument,
    },
};

const NAMESPACE: &str = "search_wikipedia";
const WIKIPEDIA_URL: &str = "https://en.wikipedia.org";

const RESPONSE_INSTRUCTION: &str = indoc! {"
    Review the Wikipedia extracts to provide the user with a clear and concise answer to their query.
    If the extracts do not answer the user request, advise the user of this.
    Your response must be in plain-text, without the use of any formatting, and should be kept to 2-3 sentences."};

struct SearchHit {
    title: String,
    snippet: String,
}

pub struct WikipediaSearchTool {
    http_client: Arc<dyn HttpClient>,
    cache: Arc<dyn Cache>,
    config: Arc<Config>,
    base_url: String,
}

impl WikipediaSearchTool {
    pub fn new(http_client: Arc<dyn HttpClient>, cache: Arc<dyn Cache>, config: Arc<Config>) -> Self {
        Self {
            http_client,
            cache,
            config,
            base_url: WIKIPEDIA_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub async fn invoke(&self, query: &str, config: &Config) -> ToolResponse {
        log::info!("Wikipedia search requested for: {}", query);

        match self.search(query, config).await {
            Ok(response) => response,
            Err(err) => {
                log::error!("Wikipedia search error: {}", err);
                err.into_response("Error searching Wikipedia")
            }
        }
    }

    async fn search(&self, query: &str, config: &Config) -> Result<ToolResponse, ToolError> {
        let num_results = config.u64_or(CONF_WIKIPEDIA_NUM_RESULTS, 1);

        let params = json!({
            "action": "query",
            "list": "search",
            "srsearch": query,
            "srlimit": num_results,
            "format": "json",
        });
        let cache_params = json!({
            "base_url": self.base_url,
            "srsearch": query,
            "srlimit": num_results,
        });

        if let Some(results) = cached_results(self.cache.as_ref(), NAMESPACE, &cache_params) {
            return Ok(ToolResponse::results(results, RESPONSE_INSTRUCTION));
        }

        let url = format!("{}/w/api.php?{}", self.base_url, build_query_string(&params));
        let data = fetch_json(&self.http_client, Method::Get, &url, &self.headers()).await?;
        // MediaWiki reports API errors with a 200 status.
        if let Some(info) = data.pointer("/error/info").and_then(|i| i.as_str()) {
            return Err(ToolError::Provider(format!("Wikipedia error: {}", info)));
        }

        let mut results = Vec::new();
        for hit in search_hits(&data).into_iter().take(num_results as usize) {
            results.push(self.summarize(hit).await);
        }

        store_results(self.cache.as_ref(), NAMESPACE, &cache_params, &results);

        Ok(ToolResponse::results(results, RESPONSE_INSTRUCTION))
    }

    /// Prefers the page summary's extract, falling back to the search
    /// snippet when the summary cannot be fetched.
    async fn summarize(&self, hit: SearchHit) -> SearchResult {
        let page = hit.title.replace(' ', "_");
        let url = format!(
            "{}/api/rest_v1/page/summary/{}",
            self.base_url,
            urlencoding::encode(&page)
        );

        match fetch_json(&self.http_client, Method::Get, &url, &self.headers()).await {
            Ok(summary) => summary_result(&hit, &summary, &self.page_url(&page)),
            Err(err) => {
                log::warn!("Wikipedia summary for {} unavailable: {}", hit.title, err);
                SearchResult::with_source(hit.title.clone(), &hit.snippet, &self.page_url(&page))
            }
        }
    }

    fn page_url(&self, page: &str) -> String {
        format!("{}/wiki/{}", self.base_url, urlencoding::encode(page))
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        vec![("User-Agent", USER_AGENT.to_string())]
    }
}

fn search_hits(data: &Value) -> Vec<SearchHit> {
    data.pointer("/query/search")
        .and_then(|s| s.as_array())
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| {
                    let title = hit.get("title")?.as_str()?;
                    Some(SearchHit {
                        title: title.to_string(),
                        snippet: clean(str_field(hit, "snippet")),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn summary_result(hit: &SearchHit, summary: &Value, fallback_url: &str) -> SearchResult {
    let extract = clean(str_field(summary, "extract"));
    let text = if extract.is_empty() { &hit.snippet } else { &extract };

    let url = summary
        .pointer("/content_urls/desktop/page")
        .and_then(|u| u.as_str())
        .unwrap_or(fallback_url);

    let title = summary
        .get("title")
        .and_then(|t| t.as_str())
        .map(clean)
        .unwrap_or_else(|| hit.title.clone());

    SearchResult::with_source(title, text, url)
}

#[async_trait]
impl ToolExecutor for WikipediaSearchTool {
    async fn execute(&self, arguments: Option<Value>) -> Result<Vec<ToolContent>> {
        log::debug!("Executing WikipediaSearchTool");

        let response = match string_argument(arguments.as_ref(), "query") {
            Ok(query) => self.invoke(query, &self.config).await,
            Err(err) => err.into_response("Error searching Wikipedia"),
        };

        response.into_content()
    }

    fn to_tool(&self) -> Tool {
        Tool {
            name: NAMESPACE.into(),
            description: Some(
                "Search Wikipedia for encyclopedic information about people, places, events and concepts".into(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The subject to look up on Wikipedia"
                    }
                },
                "required": ["query"]
            }),
        }
    }
}
