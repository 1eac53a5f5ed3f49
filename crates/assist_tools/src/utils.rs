use std::sync::Arc;

use anyhow::{Result, anyhow};
use cache::Cache;
use http_client::{HttpClient, Request, RequestBuilderExt, ResponseAsyncBodyExt};
use serde_json::Value;

use crate::{error::ToolError, response::SearchResult};

pub const USER_AGENT: &str = "HomeAssistant-ToolsForAssist/1.0";

pub enum Method {
    Get,
    Post(Value),
}

/// Sends a single request and decodes the JSON body. A non-success status is
/// reported as [`ToolError::Status`]; nothing is retried.
pub async fn fetch_json(
    http_client: &Arc<dyn HttpClient>,
    method: Method,
    url: &str,
    headers: &[(&str, String)],
) -> Result<Value, ToolError> {
    let mut request_builder = Request::builder().uri(url);

    for (name, value) in headers {
        request_builder = request_builder.header(*name, value.as_str());
    }

    let request_builder = request_builder.header("Accept", "application/json");

    let request = match method {
        Method::Get => request_builder
            .method("GET")
            .end()
            .map_err(|e| anyhow!("Failed to build request: {}", e))?,
        Method::Post(body) => request_builder
            .method("POST")
            .header("Content-Type", "application/json")
            .body(body.to_string().into())
            .map_err(|e| anyhow!("Failed to build request: {}", e))?,
    };

    let response = http_client.send(request).await?;

    let status = response.status();
    if !status.is_success() {
        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        log::error!("HTTP error {} from {}: {}", status, url, error_body);

        return Err(ToolError::Status(status.as_u16()));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| anyhow!("Failed to parse JSON response: {}", e))?;
    Ok(body)
}

pub fn build_query_string(params: &Value) -> String {
    let mut query_parts = Vec::new();

    if let Some(obj) = params.as_object() {
        for (key, value) in obj {
            match value {
                Value::String(s) => {
                    query_parts.push(format!("{}={}", key, urlencoding::encode(s)));
                }
                Value::Number(n) => {
                    query_parts.push(format!("{}={}", key, n));
                }
                Value::Bool(b) => {
                    query_parts.push(format!("{}={}", key, b));
                }
                _ => {}
            }
        }
    }

    query_parts.join("&")
}

/// Reads a string field of a provider object, empty when absent.
pub fn str_field<'a>(item: &'a Value, name: &str) -> &'a str {
    item.get(name).and_then(|v| v.as_str()).unwrap_or("")
}

/// Reads the string argument `name` from a tool call.
pub fn string_argument<'a>(arguments: Option<&'a Value>, name: &str) -> Result<&'a str, ToolError> {
    arguments
        .and_then(|args| args.get(name))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ToolError::Argument(format!("Missing or invalid {} parameter", name)))
}

/// Looks up previously stored results. Storage failures and payloads that no
/// longer decode are treated as a miss.
pub fn cached_results(
    cache: &dyn Cache,
    namespace: &str,
    params: &Value,
) -> Option<Vec<SearchResult>> {
    let value = match cache.get(namespace, params) {
        Ok(value) => value?,
        Err(err) => {
            log::warn!("Failed to read {} from cache: {}", namespace, err);
            return None;
        }
    };

    match serde_json::from_value(value) {
        Ok(results) => {
            log::debug!("Serving {} from cache", namespace);
            Some(results)
        }
        Err(err) => {
            log::warn!("Ignoring unreadable cache entry for {}: {}", namespace, err);
            None
        }
    }
}

/// Stores non-empty results. Failures are logged and otherwise ignored.
pub fn store_results(cache: &dyn Cache, namespace: &str, params: &Value, results: &[SearchResult]) {
    if results.is_empty() {
        return;
    }

    let value = match serde_json::to_value(results) {
        Ok(value) => value,
        Err(err) => {
            log::warn!("Failed to encode {} results for cache: {}", namespace, err);
            return;
        }
    };

    if let Err(err) = cache.set(namespace, params, &value) {
        log::warn!("Failed to store {} results in cache: {}", namespace, err);
    }
}
