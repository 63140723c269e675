use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, Request, StatusCode};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::ConfigError;
use crate::params::Params;
use crate::template::{TemplateEngine, TemplateError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to render URL: {0}")]
    Render(#[from] TemplateError),
    #[error("failed to prepare request: {0}")]
    Request(String),
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("request to {url} timed out after {}ms", timeout.as_millis())]
    Timeout { url: String, timeout: Duration },
}

impl DispatchError {
    /// Which step of the send failed, for log fields.
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Render(_) => "render_url",
            Self::Request(_) => "prepare_request",
            Self::Transport { .. } => "transport",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// A request that reached the server. The status is informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub status: StatusCode,
}

/// Sends one rendered notification per call, bounded by `timeout`.
#[derive(Debug)]
pub struct Dispatcher {
    engine: Arc<TemplateEngine>,
    client: Client,
    url_template: String,
    method: String,
    headers: BTreeMap<String, String>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<TemplateEngine>,
        url_template: String,
        method: String,
        headers: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = Self::build_client(timeout).map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self {
            engine,
            client,
            url_template,
            method,
            headers,
            timeout,
        })
    }

    /// Pooled client. Connects are bounded by the hook timeout; the overall
    /// bound is applied per dispatch.
    pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
        Client::builder()
            .connect_timeout(timeout)
            .pool_max_idle_per_host(20)
            .gzip(true)
            .build()
    }

    pub fn url_template(&self) -> &str {
        &self.url_template
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Renders the URL, then sends `body` and drains the response.
    pub async fn dispatch(&self, body: &str, params: &Params) -> Result<Delivery, DispatchError> {
        let url = self.engine.render(&self.url_template, params)?;
        let request = self.build_request(&url, body)?;

        match tokio::time::timeout(self.timeout, self.execute(request)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout {
                url,
                timeout: self.timeout,
            }),
        }
    }

    fn build_request(&self, url: &str, body: &str) -> Result<Request, DispatchError> {
        let parsed = Url::parse(url)
            .map_err(|e| DispatchError::Request(format!("invalid URL {url:?}: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(DispatchError::Request(format!(
                "URL must use http or https: {url}"
            )));
        }
        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|e| DispatchError::Request(format!("invalid method {:?}: {e}", self.method)))?;

        let mut builder = self
            .client
            .request(method, parsed)
            .body(body.as_bytes().to_vec());
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
            .build()
            .map_err(|e| DispatchError::Request(e.to_string()))
    }

    async fn execute(&self, request: Request) -> Result<Delivery, DispatchError> {
        let url = request.url().to_string();
        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                DispatchError::Timeout {
                    url: url.clone(),
                    timeout: self.timeout,
                }
            } else {
                DispatchError::Transport {
                    url: url.clone(),
                    reason: e.to_string(),
                }
            }
        };

        let response = self.client.execute(request).await.map_err(&transport)?;
        let status = response.status();
        // Read to the end so the connection can be reused.
        let drained = response.bytes().await.map_err(&transport)?;
        debug!(%url, status = status.as_u16(), bytes = drained.len(), "Webhook response drained");

        Ok(Delivery { status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dispatcher(url: &str, method: &str, timeout: Duration) -> Dispatcher {
        let mut headers = BTreeMap::new();
        headers.insert("X-Token".to_string(), "{{ label }}".to_string());
        Dispatcher::new(
            Arc::new(TemplateEngine::default()),
            url.to_string(),
            method.to_string(),
            headers,
            timeout,
        )
        .unwrap()
    }

    fn params() -> Params {
        match json!({ "label": "web", "event": "spawned" }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn sends_rendered_url_with_static_headers() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/hooks/web/spawned"))
            .and(header("X-Token", "{{ label }}"))
            .and(body_string("web spawned"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let d = dispatcher(
            &format!("{}/hooks/{{{{ label }}}}/{{{{ event }}}}", server.uri()),
            "PUT",
            Duration::from_secs(5),
        );
        let delivery = d.dispatch("web spawned", &params()).await.unwrap();
        assert_eq!(delivery.status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn error_status_is_still_a_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let d = dispatcher(&server.uri(), "POST", Duration::from_secs(5));
        let delivery = d.dispatch("body", &params()).await.unwrap();
        assert_eq!(delivery.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn url_render_failure_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let d = dispatcher(
            &format!("{}/{{{{ undefined_field }}}}", server.uri()),
            "POST",
            Duration::from_secs(5),
        );
        let err = d.dispatch("body", &params()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Render(TemplateError::Exec(_))), "{err}");
        assert_eq!(err.phase(), "render_url");
    }

    #[tokio::test]
    async fn invalid_url_or_method_is_request_error() {
        let d = dispatcher("not a url {{ label }}", "POST", Duration::from_secs(5));
        let err = d.dispatch("body", &params()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Request(_)), "{err}");

        let d = dispatcher("ftp://example.com/{{ label }}", "POST", Duration::from_secs(5));
        let err = d.dispatch("body", &params()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Request(_)), "{err}");

        let d = dispatcher("http://example.com/", "BAD METHOD", Duration::from_secs(5));
        let err = d.dispatch("body", &params()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Request(_)), "{err}");
        assert_eq!(err.phase(), "prepare_request");
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let d = dispatcher(&server.uri(), "POST", Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = d.dispatch("body", &params()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { .. }), "{err}");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    // Non-routable address: the connect either hangs until the hook timeout
    // or fails fast where the network reports it unreachable.
    #[tokio::test]
    async fn reported_timeout_is_the_bound_that_elapsed() {
        let timeout = Duration::from_secs(6);
        let d = dispatcher("http://10.255.255.1/", "POST", timeout);
        let started = std::time::Instant::now();
        match d.dispatch("body", &params()).await.unwrap_err() {
            DispatchError::Timeout { timeout: reported, .. } => {
                assert_eq!(reported, timeout);
                assert!(started.elapsed() >= timeout, "cut after {:?}", started.elapsed());
            }
            DispatchError::Transport { .. } => {}
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let d = dispatcher("http://127.0.0.1:1/", "POST", Duration::from_secs(5));
        let err = d.dispatch("body", &params()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport { .. }), "{err}");
    }
}
