//! HTTP request primitive used by virtual users.
//!
//! [`HttpTransport`] is the seam between the scheduler and the network:
//! the engine only ever sees a [`RequestSpec`] going in and an
//! [`HttpResponse`] (or [`TransportError`]) coming out. [`ReqwestTransport`]
//! is the production implementation; tests substitute an in-process mock.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::time::{Duration, Instant};

use crate::loadtest::error::{LoadTestError, TransportError};
use crate::loadtest::request::{HttpMethod, RequestSpec};

/// A completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Wall time from sending the request to reading the last body byte.
    pub duration: Duration,
}

/// Sends one request and waits for the complete response.
///
/// Implementations must honour [`RequestSpec::timeout`]; the virtual user
/// additionally bounds every call with the same timeout.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, spec: &RequestSpec) -> Result<HttpResponse, TransportError>;
}

/// [`HttpTransport`] backed by a shared, connection-pooling [`reqwest::Client`].
///
/// One instance is shared by every virtual user so keep-alive connections are
/// reused across iterations.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a transport with a client sized for `max_vus` concurrent users.
    pub fn new(max_vus: u32) -> Result<Self, LoadTestError> {
        let client = Client::builder()
            .pool_max_idle_per_host(max_vus.max(1) as usize)
            .build()
            .map_err(|e| LoadTestError::ClientBuild {
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, spec: &RequestSpec) -> Result<HttpResponse, TransportError> {
        let mut request = self
            .client
            .request(to_reqwest_method(spec.method), &spec.url)
            .headers(to_header_map(spec))
            .timeout(spec.timeout);
        if let Some(body) = &spec.body {
            request = request.body(body.clone());
        }

        let start = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::classify_reqwest(&e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::classify_reqwest(&e))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
            duration: start.elapsed(),
        })
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

fn to_header_map(spec: &RequestSpec) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(spec.headers.len());
    for (name, value) in &spec.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Dropping header that is not valid HTTP"),
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec_for(url: String, method: HttpMethod, body: Option<&str>) -> RequestSpec {
        RequestSpec {
            method,
            url,
            headers: BTreeMap::from([
                ("Content-Type".to_string(), "application/json".to_string()),
                ("X-Test".to_string(), "yes".to_string()),
            ]),
            body: body.map(|b| b.as_bytes().to_vec()),
            timeout: Duration::from_secs(5),
            expected_status: 200,
        }
    }

    #[tokio::test]
    async fn test_reqwest_transport_get() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .match_header("x-test", "yes")
            .with_status(200)
            .with_header("x-served-by", "mock")
            .with_body("ok")
            .create_async()
            .await;

        let transport = ReqwestTransport::new(1).unwrap();
        let spec = spec_for(format!("{}/health", server.url()), HttpMethod::Get, None);
        let response = transport.send(&spec).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"ok");
        assert!(response
            .headers
            .iter()
            .any(|(k, v)| k == "x-served-by" && v == "mock"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_reqwest_transport_post_sends_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/items")
            .match_body(r#"{"a":1}"#)
            .with_status(201)
            .create_async()
            .await;

        let transport = ReqwestTransport::new(1).unwrap();
        let spec = spec_for(
            format!("{}/items", server.url()),
            HttpMethod::Post,
            Some(r#"{"a":1}"#),
        );
        let response = transport.send(&spec).await.unwrap();

        assert_eq!(response.status, 201);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_reqwest_transport_returns_error_statuses_as_responses() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/boom")
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let transport = ReqwestTransport::new(1).unwrap();
        let spec = spec_for(format!("{}/boom", server.url()), HttpMethod::Get, None);
        let response = transport.send(&spec).await.unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(response.body, b"unavailable");
    }

    #[tokio::test]
    async fn test_reqwest_transport_connection_refused_is_connection_error() {
        // Port 9 (discard) on loopback is essentially never listening.
        let transport = ReqwestTransport::new(1).unwrap();
        let spec = spec_for("http://127.0.0.1:9/".to_string(), HttpMethod::Get, None);
        let err = transport.send(&spec).await.unwrap_err();
        assert_eq!(err.error_category(), "connection");
    }

    #[test]
    fn test_invalid_header_is_dropped() {
        let mut spec = spec_for("http://localhost".to_string(), HttpMethod::Get, None);
        spec.headers
            .insert("Bad Header".to_string(), "value".to_string());
        let map = to_header_map(&spec);
        assert_eq!(map.len(), 2);
        assert!(map.contains_key("x-test"));
    }
}
