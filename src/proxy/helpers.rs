//! Utility functions for building the upstream request

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};

/// Path appended to the backend base URL
pub(crate) const RESPONSES_PATH: &str = "/codex/responses";

/// Backend credentials
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub account_id: Option<String>,
}

/// Full upstream URL for the responses endpoint
pub(crate) fn upstream_url(backend_url: &str) -> String {
    format!("{}{}", backend_url.trim_end_matches('/'), RESPONSES_PATH)
}

/// Headers for a backend request
///
/// Values that are not valid header text are skipped with a warning rather
/// than failing the request.
pub(crate) fn build_upstream_headers(
    credentials: &Credentials,
    session_id: Option<&str>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    headers.insert(
        HeaderName::from_static("openai-beta"),
        HeaderValue::from_static("responses=experimental"),
    );
    headers.insert(
        HeaderName::from_static("originator"),
        HeaderValue::from_static("codex_cli_rs"),
    );

    let dynamic = [
        (
            AUTHORIZATION,
            credentials
                .access_token
                .as_ref()
                .map(|token| format!("Bearer {}", token)),
        ),
        (
            HeaderName::from_static("chatgpt-account-id"),
            credentials.account_id.clone(),
        ),
        (
            HeaderName::from_static("session_id"),
            session_id.map(String::from),
        ),
    ];
    for (name, value) in dynamic {
        let Some(value) = value else { continue };
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(name, value);
            }
            Err(_) => tracing::warn!(header = %name, "Skipping header with invalid value"),
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_url() {
        assert_eq!(
            upstream_url("https://chatgpt.com/backend-api"),
            "https://chatgpt.com/backend-api/codex/responses"
        );
        assert_eq!(
            upstream_url("http://localhost:9000/"),
            "http://localhost:9000/codex/responses"
        );
    }

    #[test]
    fn test_headers_with_credentials_and_session() {
        let credentials = Credentials {
            access_token: Some("tok".into()),
            account_id: Some("acct".into()),
        };
        let headers = build_upstream_headers(&credentials, Some("conv-1"));

        assert_eq!(headers["authorization"], "Bearer tok");
        assert_eq!(headers["chatgpt-account-id"], "acct");
        assert_eq!(headers["session_id"], "conv-1");
        assert_eq!(headers["openai-beta"], "responses=experimental");
        assert_eq!(headers["originator"], "codex_cli_rs");
        assert_eq!(headers["accept"], "text/event-stream");
    }

    #[test]
    fn test_headers_without_optional_values() {
        let headers = build_upstream_headers(&Credentials::default(), None);
        assert!(headers.get("authorization").is_none());
        assert!(headers.get("chatgpt-account-id").is_none());
        assert!(headers.get("session_id").is_none());
        assert_eq!(headers["content-type"], "application/json");
    }

    #[test]
    fn test_invalid_header_value_is_skipped() {
        let credentials = Credentials {
            access_token: Some("bad\ntoken".into()),
            account_id: None,
        };
        let headers = build_upstream_headers(&credentials, None);
        assert!(headers.get("authorization").is_none());
    }
}
