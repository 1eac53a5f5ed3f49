use thiserror::Error;

use crate::response::ToolResponse;

/// Failures a tool can run into while serving a single call.
///
/// None of these escape a tool: [`ToolError::into_response`] turns each into
/// an `{"error": ...}` envelope at the outermost boundary of `invoke`.
#[derive(Debug, Error)]
pub enum ToolError {
    /// A required setting is missing.
    #[error("{0}")]
    Configuration(String),
    /// The call's arguments are missing or malformed.
    #[error("{0}")]
    Argument(String),
    /// The provider answered with a non-success HTTP status.
    #[error("Search error: {0}")]
    Status(u16),
    /// The provider answered, but without the data we expected.
    #[error("{0}")]
    Provider(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ToolError {
    /// `context` prefixes transport and unexpected failures, e.g.
    /// `"Error searching web"`.
    pub fn into_response(self, context: &str) -> ToolResponse {
        match self {
            ToolError::Other(err) => ToolResponse::error(format!("{}: {}", context, err)),
            other => ToolResponse::error(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use serde_json::json;

    use super::*;

    #[test]
    fn configuration_message_is_verbatim() {
        let response = ToolError::Configuration("SearXNG URL not configured".into())
            .into_response("Error searching web");
        assert_eq!(
            response.to_value(),
            json!({"error": "SearXNG URL not configured"})
        );
    }

    #[test]
    fn status_is_reported_as_search_error() {
        let response = ToolError::Status(503).into_response("Error searching web");
        assert_eq!(response.to_value(), json!({"error": "Search error: 503"}));
    }

    #[test]
    fn unexpected_failures_carry_context() {
        let response = ToolError::from(anyhow!("connection refused"))
            .into_response("Error searching web");
        assert_eq!(
            response.to_value(),
            json!({"error": "Error searching web: connection refused"})
        );
    }
}
