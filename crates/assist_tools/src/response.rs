use anyhow::Result;
use context_server::ToolContent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const NO_RESULTS: &str = "No results found";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub description: String,
}

impl SearchResult {
    /// Builds a result whose description cites `url` in parentheses, or is
    /// the bare url when there is no text to cite it from.
    pub fn with_source(title: impl Into<String>, text: &str, url: &str) -> Self {
        let description = match (text.is_empty(), url.is_empty()) {
            (_, true) => text.to_string(),
            (true, false) => url.to_string(),
            (false, false) => format!("{} ({})", text, url),
        };

        Self {
            title: title.into(),
            description,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SearchResults {
    Found(Vec<SearchResult>),
    NotFound(String),
}

/// The JSON envelope every tool answers with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResponse {
    Results {
        results: SearchResults,
        instruction: String,
    },
    Forecast {
        forecast: String,
        instruction: String,
    },
    Error {
        error: String,
    },
}

impl ToolResponse {
    /// Wraps search results with the tool's answering instruction. An empty
    /// list becomes the `"No results found"` marker.
    pub fn results(results: Vec<SearchResult>, instruction: &str) -> Self {
        let results = if results.is_empty() {
            SearchResults::NotFound(NO_RESULTS.to_string())
        } else {
            SearchResults::Found(results)
        };

        ToolResponse::Results {
            results,
            instruction: instruction.to_string(),
        }
    }

    pub fn forecast(forecast: impl Into<String>, instruction: &str) -> Self {
        ToolResponse::Forecast {
            forecast: forecast.into(),
            instruction: instruction.to_string(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        ToolResponse::Error {
            error: error.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|err| {
            serde_json::json!({ "error": format!("Failed to serialize response: {}", err) })
        })
    }

    pub fn into_content(self) -> Result<Vec<ToolContent>> {
        Ok(vec![ToolContent::Text {
            text: serde_json::to_string(&self)?,
        }])
    }
}
