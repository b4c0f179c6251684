//! Documentation backends.
//!
//! The cache talks to a [`DocsBackend`]; the shipped implementation is a
//! plain-text HTTP API addressed as `GET {base_url}/{library}?type=txt&topic=..`.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::BoxFuture;
use crate::error::FetchError;

/// Where documentation comes from.
pub trait DocsBackend: Send + Sync {
    /// Backend display name (e.g. "http").
    fn name(&self) -> &str;

    /// Fetch documentation for `library`, narrowed to `topic` when given.
    fn fetch<'a>(
        &'a self,
        library: &'a str,
        topic: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String, FetchError>>;

    /// Cheap reachability check used to leave offline mode.
    fn probe(&self) -> BoxFuture<'_, Result<(), FetchError>>;
}

/// HTTP documentation backend.
pub struct HttpDocsBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpDocsBackend {
    /// Create a backend for `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        })
    }

    /// Build from the `[knowledge]` config section.
    pub fn from_config(config: &ctxpack_config::KnowledgeConfig) -> Result<Self, FetchError> {
        let backend = Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(match &config.api_key {
            Some(key) => backend.with_api_key(key.clone()),
            None => backend,
        })
    }

    /// Send `authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL for one library, without the query string.
    fn library_url(&self, library: &str) -> String {
        format!("{}/{}", self.base_url, library.trim_start_matches('/'))
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.api_key {
            Some(key) => request.header("authorization", format!("Bearer {key}")),
            None => request,
        }
    }
}

/// Map a non-success status to a fetch error.
fn status_error(status: StatusCode, what: &str, retry_after: Option<u64>, body: String) -> FetchError {
    match status {
        StatusCode::NOT_FOUND => FetchError::NotFound(what.to_string()),
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(60),
        },
        _ => FetchError::Backend {
            status: status.as_u16(),
            message: body,
        },
    }
}

impl DocsBackend for HttpDocsBackend {
    fn name(&self) -> &str {
        "http"
    }

    fn fetch<'a>(
        &'a self,
        library: &'a str,
        topic: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String, FetchError>> {
        Box::pin(async move {
            let url = self.library_url(library);
            let mut query = vec![("type", "txt")];
            if let Some(topic) = topic {
                query.push(("topic", topic));
            }
            debug!(%url, ?topic, "documentation fetch");

            let resp = self
                .get(&url)
                .query(&query)
                .send()
                .await
                .map_err(|e| FetchError::Network(e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                let body = resp.text().await.unwrap_or_default();
                let what = match topic {
                    Some(topic) => format!("{library}/{topic}"),
                    None => library.to_string(),
                };
                return Err(status_error(status, &what, retry_after, body));
            }

            let body = resp
                .text()
                .await
                .map_err(|e| FetchError::Network(e.to_string()))?;
            if body.trim().is_empty() {
                return Err(FetchError::Empty(library.to_string()));
            }
            Ok(body)
        })
    }

    fn probe(&self) -> BoxFuture<'_, Result<(), FetchError>> {
        Box::pin(async move {
            let resp = self
                .get(&self.base_url)
                .send()
                .await
                .map_err(|e| FetchError::Network(e.to_string()))?;
            // Any HTTP answer below 500 means the service is reachable
            let status = resp.status();
            if status.is_server_error() {
                return Err(FetchError::Backend {
                    status: status.as_u16(),
                    message: "probe failed".to_string(),
                });
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_library_url() {
        let backend =
            HttpDocsBackend::new("https://docs.example.com/api/v1/", Duration::from_secs(5)).unwrap();
        assert_eq!(backend.base_url(), "https://docs.example.com/api/v1");
        assert_eq!(
            backend.library_url("/facebook/react"),
            "https://docs.example.com/api/v1/facebook/react"
        );
        assert_eq!(
            backend.library_url("tokio"),
            "https://docs.example.com/api/v1/tokio"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_error(StatusCode::NOT_FOUND, "react/hooks", None, String::new()),
            FetchError::NotFound("react/hooks".to_string())
        );
        assert_eq!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "react", Some(12), String::new()),
            FetchError::RateLimited {
                retry_after_secs: 12
            }
        );
        assert_eq!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "react", None, String::new()),
            FetchError::RateLimited {
                retry_after_secs: 60
            }
        );
        assert_eq!(
            status_error(StatusCode::BAD_GATEWAY, "react", None, "upstream".to_string()),
            FetchError::Backend {
                status: 502,
                message: "upstream".to_string()
            }
        );
    }

    #[test]
    fn test_from_config() {
        let config = ctxpack_config::KnowledgeConfig {
            api_key: Some("k".to_string()),
            ..Default::default()
        };
        let backend = HttpDocsBackend::from_config(&config).unwrap();
        assert_eq!(backend.api_key.as_deref(), Some("k"));
        assert_eq!(backend.name(), "http");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        // Port 9 on localhost: nothing listens there in test environments.
        let backend = HttpDocsBackend::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = backend.fetch("react", Some("hooks")).await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));
        assert!(backend.probe().await.is_err());
    }
}
