//! Main client implementation.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use drover_types::{AGENT_HEADER, LogEntry};
use parking_lot::Mutex;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use url::Url;

use crate::api::{HealthApi, WorkflowsApi};
use crate::error::{Error, Result};
use crate::logs;

/// Default timeout for requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for long-poll requests; must exceed the server's window.
const DEFAULT_LONG_POLL_TIMEOUT: Duration = Duration::from_secs(90);

/// drover API client.
///
/// Cheap to clone. Implements [`Peer`](drover_types::Peer) for agents and
/// exposes the admin endpoints through [`DroverClient::workflows`].
#[derive(Clone)]
pub struct DroverClient {
    inner: Arc<ClientInner>,
}

/// Inner client state (shared across clones).
pub(crate) struct ClientInner {
    pub(crate) http: reqwest::Client,
    pub(crate) base_url: Url,
    pub(crate) timeout: Duration,
    pub(crate) long_poll_timeout: Duration,
    pub(crate) agent_id: Mutex<Option<i64>>,
    log_sender: OnceLock<mpsc::UnboundedSender<LogEntry>>,
}

impl DroverClient {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Agent id assigned by the last successful registration.
    pub fn agent_id(&self) -> Option<i64> {
        *self.inner.agent_id.lock()
    }

    pub(crate) fn set_agent_id(&self, id: Option<i64>) {
        *self.inner.agent_id.lock() = id;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // API accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Access the admin workflows API.
    pub fn workflows(&self) -> WorkflowsApi {
        WorkflowsApi::new(self.clone())
    }

    /// Access the health API.
    pub fn health(&self) -> HealthApi {
        HealthApi::new(self.clone())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal HTTP methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Build a URL for an API path.
    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        let path = path.trim_start_matches('/');
        self.inner
            .base_url
            .join(&format!("api/v1/{}", path))
            .map_err(Error::from)
    }

    /// URL for `/api/v1/workflows/{id}[/{action}]` with the id percent-encoded.
    pub(crate) fn workflow_url(&self, id: &str, action: Option<&str>) -> Result<Url> {
        let mut url = self.inner.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::Config("base_url cannot be a base".to_string()))?;
            segments.pop_if_empty().extend(["api", "v1", "workflows", id]);
            if let Some(action) = action {
                segments.push(action);
            }
        }
        Ok(url)
    }

    /// Root-level URL, outside `/api/v1`.
    pub(crate) fn root_url(&self, path: &str) -> Result<Url> {
        self.inner.base_url.join(path).map_err(Error::from)
    }

    /// Attach the agent header and send, turning error statuses into [`Error`].
    pub(crate) async fn send(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let request = match self.agent_id() {
            Some(id) => request.header(AGENT_HEADER, id.to_string()),
            None => request,
        };
        let response = request.timeout(timeout).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(extract_error(response).await)
        }
    }

    /// Make a GET request.
    pub(crate) async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let request = self.inner.http.get(url);
        let response = self.send(request, self.inner.timeout).await?;
        Ok(response.json().await?)
    }

    /// Make a POST request and decode the body.
    pub(crate) async fn post<T, B>(&self, url: Url, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        let request = self.inner.http.post(url).json(body);
        let response = self.send(request, self.inner.timeout).await?;
        Ok(response.json().await?)
    }

    /// Make a POST request whose response has no body.
    pub(crate) async fn post_empty<B>(&self, url: Url, body: Option<&B>) -> Result<()>
    where
        B: serde::Serialize + ?Sized,
    {
        let mut request = self.inner.http.post(url);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request, self.inner.timeout).await?;
        Ok(())
    }

    /// Make a DELETE request.
    pub(crate) async fn delete(&self, url: Url) -> Result<()> {
        let request = self.inner.http.delete(url);
        self.send(request, self.inner.timeout).await?;
        Ok(())
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    pub(crate) fn long_poll_timeout(&self) -> Duration {
        self.inner.long_poll_timeout
    }

    /// Queue a log entry for the background shipper.
    ///
    /// The shipper starts on first use; outside a tokio runtime the entry is
    /// dropped.
    pub(crate) fn ship_log(&self, entry: LogEntry) {
        let sender = match self.inner.log_sender.get() {
            Some(sender) => sender,
            None => {
                let Ok(handle) = tokio::runtime::Handle::try_current() else {
                    tracing::debug!("No runtime for log delivery, dropping log line");
                    return;
                };
                let Ok(url) = self.url("logs") else {
                    return;
                };
                self.inner.log_sender.get_or_init(|| {
                    let (tx, rx) = mpsc::unbounded_channel();
                    handle.spawn(logs::ship(self.shipper(url), rx));
                    tx
                })
            }
        };
        if sender.send(entry).is_err() {
            tracing::debug!("Log shipper stopped, dropping log line");
        }
    }

    /// The shipper holds no reference to the client, so dropping the last
    /// client closes the channel and stops it.
    fn shipper(&self, url: Url) -> logs::Shipper {
        logs::Shipper {
            http: self.inner.http.clone(),
            url,
            timeout: self.inner.timeout,
        }
    }
}

/// Extract an error from a failed response.
async fn extract_error(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();

    match response.json::<drover_types::ErrorResponse>().await {
        Ok(err) => {
            if status == 404 {
                Error::NotFound(err.message)
            } else if status == 401 {
                Error::Auth(err.message)
            } else {
                Error::Api {
                    status,
                    code: err.code,
                    message: err.message,
                }
            }
        }
        Err(_) => match status {
            401 => Error::Auth(format!("HTTP {}", status)),
            404 => Error::NotFound(format!("HTTP {}", status)),
            _ => Error::Api {
                status,
                code: "unknown".to_string(),
                message: format!("HTTP {}", status),
            },
        },
    }
}

/// Builder for creating a [`DroverClient`].
#[derive(Debug)]
pub struct ClientBuilder {
    base_url: Option<String>,
    auth_token: Option<String>,
    timeout: Duration,
    long_poll_timeout: Duration,
    user_agent: Option<String>,
}

impl ClientBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            base_url: None,
            auth_token: None,
            timeout: DEFAULT_TIMEOUT,
            long_poll_timeout: DEFAULT_LONG_POLL_TIMEOUT,
            user_agent: None,
        }
    }

    /// Set the base URL for the server.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the authentication token.
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the timeout for `next` and `wait` long polls.
    pub fn long_poll_timeout(mut self, timeout: Duration) -> Self {
        self.long_poll_timeout = timeout;
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<DroverClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Config("base_url is required".to_string()))?;

        // Parse and normalize base URL
        let mut base_url = Url::parse(&base_url)?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| Error::Config("Invalid auth token".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("drover-client/{}", env!("CARGO_PKG_VERSION")));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .build()?;

        Ok(DroverClient {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                timeout: self.timeout,
                long_poll_timeout: self.long_poll_timeout,
                agent_id: Mutex::new(None),
                log_sender: OnceLock::new(),
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> DroverClient {
        ClientBuilder::new()
            .base_url("http://localhost:9000")
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_base_url() {
        assert!(ClientBuilder::new().build().is_err());
    }

    #[test]
    fn test_builder_normalizes_trailing_slash() {
        assert_eq!(client().base_url().as_str(), "http://localhost:9000/");

        let client = ClientBuilder::new()
            .base_url("http://localhost:9000/")
            .build()
            .unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:9000/");
    }

    #[test]
    fn test_url_building() {
        let url = client().url("/next").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/api/v1/next");
    }

    #[test]
    fn test_workflow_url_encodes_id() {
        let url = client().workflow_url("a b/c", Some("init")).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9000/api/v1/workflows/a%20b%2Fc/init"
        );
        let url = client().workflow_url("w1", None).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/api/v1/workflows/w1");
    }

    #[test]
    fn test_log_dropped_outside_runtime() {
        let client = client();
        client.ship_log(LogEntry {
            workflow_id: "w".into(),
            step_uuid: "s".into(),
            time: 0,
            line: 0,
            data: "x".into(),
        });
        assert!(client.inner.log_sender.get().is_none());
    }
}
