//! HTTP client.
//!
//! [`HttpClient`] is the raw transport endpoint. [`new_client`] wraps it
//! in the client-side middleware, giving a value that can be used wherever
//! a [`ProbeService`](sonar_core::ProbeService) is expected.

use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use sonar_core::{BoxFuture, CallContext, Endpoint, PingRequest, PingResponse, SonarError, SonarResult};
use sonar_middleware::{EndpointSet, SetOptions};
use sonar_telemetry::{inject_context, HeaderInjector};

use super::{decode_response, encode_request, JSON_CONTENT_TYPE, PING_PATH};

/// Raw HTTP endpoint for the ping method.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpClient {
    /// Creates a client for the server at `target`.
    ///
    /// `target` is either `host:port` or a base URL such as
    /// `http://host:port/prefix`. `timeout` bounds every call; the
    /// caller's deadline, when shorter, wins.
    pub fn new(target: &str, timeout: Option<Duration>) -> SonarResult<Self> {
        let base = if target.contains("://") {
            target.to_string()
        } else {
            format!("http://{target}")
        };
        let mut url = reqwest::Url::parse(&base)
            .map_err(|e| SonarError::config(format!("invalid HTTP target '{target}': {e}")))?;
        let path = format!("{}{PING_PATH}", url.path().trim_end_matches('/'));
        url.set_path(&path);

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| SonarError::config(e.to_string()))?;

        Ok(Self { client, url })
    }

    /// Returns the URL ping requests are posted to.
    #[must_use]
    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    async fn ping(&self, ctx: &CallContext, request: PingRequest) -> SonarResult<PingResponse> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        inject_context(ctx.trace_context(), &mut HeaderInjector(&mut headers));

        let mut builder = self
            .client
            .post(self.url.clone())
            .headers(headers)
            .body(encode_request(&request)?);
        if let Some(remaining) = ctx.remaining() {
            builder = builder.timeout(remaining);
        }

        ctx.guard(async move {
            let response = builder.send().await.map_err(|e| transport_error(ctx, e))?;
            let status = response.status();
            let body = response.bytes().await.map_err(|e| transport_error(ctx, e))?;
            decode_response(status, &body)
        })
        .await
    }
}

impl Endpoint<PingRequest, PingResponse> for HttpClient {
    fn call<'a>(
        &'a self,
        ctx: &'a CallContext,
        request: PingRequest,
    ) -> BoxFuture<'a, SonarResult<PingResponse>> {
        Box::pin(self.ping(ctx, request))
    }
}

fn transport_error(ctx: &CallContext, err: reqwest::Error) -> SonarError {
    if err.is_timeout() {
        ctx.timeout_error(err.to_string())
    } else {
        SonarError::transport(err.to_string())
    }
}

/// Builds a client-side [`EndpointSet`] talking HTTP to `target`.
///
/// ```rust,ignore
/// use sonar_core::{CallContext, ProbeService};
/// use sonar_middleware::SetOptions;
///
/// let client = sonar_transport::http::client::new_client("localhost:8081", None, &SetOptions::http_client())?;
/// let payload = client.ping(&CallContext::new()).await?;
/// ```
pub fn new_client(
    target: &str,
    timeout: Option<Duration>,
    options: &SetOptions,
) -> SonarResult<EndpointSet> {
    let raw = HttpClient::new(target, timeout)?;
    Ok(EndpointSet::client(Arc::new(raw), options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonar_core::ProbeService;
    use sonar_middleware::{BreakerState, LogSink};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_url_from_host_port() {
        let client = HttpClient::new("localhost:8081", None).unwrap();
        assert_eq!(client.url().as_str(), "http://localhost:8081/ping");
    }

    #[test]
    fn test_url_keeps_base_path() {
        let client = HttpClient::new("https://probe.internal/api/", None).unwrap();
        assert_eq!(client.url().as_str(), "https://probe.internal/api/ping");
    }

    #[test]
    fn test_invalid_target() {
        let err = HttpClient::new("http://[::1", None).unwrap_err();
        assert!(matches!(err, SonarError::Config(_)));
    }

    /// Accepts connections and never answers.
    async fn silent_server() -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(stream);
            }
        });
        (addr, accepted)
    }

    #[tokio::test]
    async fn test_client_timeout_is_a_transport_failure() {
        let (addr, _) = silent_server().await;
        let client = HttpClient::new(&addr, Some(Duration::from_millis(100))).unwrap();

        let err = client
            .call(&CallContext::new(), PingRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SonarError::Transport(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_hanging_server_opens_client_breaker() {
        let (addr, accepted) = silent_server().await;
        let options = SetOptions::http_client()
            .logger(LogSink::discard())
            .breaker_policy(1, Duration::from_secs(30));
        let client = new_client(&addr, Some(Duration::from_millis(100)), &options).unwrap();
        let ctx = CallContext::new();

        assert!(matches!(client.ping(&ctx).await, Err(SonarError::Transport(_))));
        assert_eq!(client.breaker_state(), BreakerState::Open);

        assert_eq!(client.ping(&ctx).await, Err(SonarError::circuit_open("Ping")));
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_own_deadline_stays_a_deadline() {
        let (addr, _) = silent_server().await;
        let client = HttpClient::new(&addr, Some(Duration::from_secs(30))).unwrap();
        let ctx = CallContext::new().with_timeout(Duration::from_millis(50));

        let err = client.call(&ctx, PingRequest::default()).await.unwrap_err();
        assert_eq!(err, SonarError::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpClient::new(&addr.to_string(), Some(Duration::from_secs(2))).unwrap();
        let err = client
            .call(&CallContext::new(), PingRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SonarError::Transport(_)));
    }
}
