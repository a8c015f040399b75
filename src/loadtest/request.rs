//! Request specification built once from the run configuration.
//!
//! [`build_request_spec`] turns a [`RunConfig`] into the immutable
//! [`RequestSpec`] every virtual user sends. It is the only place a
//! [`ConfigurationError`] can originate, so a run either starts with a
//! complete request or does not start at all.

use serde::ser::SerializeMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::loadtest::config::RunConfig;
use crate::loadtest::error::ConfigurationError;

/// Hard per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Body sent by write methods when no payload is configured.
pub const DEFAULT_PAYLOAD: &str = r#"{"message":"rampload default payload"}"#;

/// Status code expected when no override is configured.
pub const DEFAULT_EXPECTED_STATUS: u16 = 200;

/// Codes a response can carry; anything outside can never match.
const STATUS_CODE_RANGE: std::ops::RangeInclusive<u16> = 100..=999;

/// Headers sent with every request unless overridden.
///
/// A browser-like set so that WAF front ends treat the traffic like a real
/// client. Transfer encoding and connection reuse are left to the transport.
pub const BASE_HEADERS: [(&str, &str); 5] = [
    ("Content-Type", "application/json"),
    (
        "User-Agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    ),
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
    ),
    ("Accept-Language", "en-US,en;q=0.5"),
    ("Cache-Control", "max-age=0"),
];

/// Placeholder written instead of a credential-bearing header value.
pub const REDACTED: &str = "[redacted]";

/// Header names whose values are never written to reports or plans.
const SENSITIVE_HEADERS: [&str; 5] = [
    "authorization",
    "proxy-authorization",
    "cookie",
    "x-api-key",
    "api-key",
];

/// Fragments that mark a custom header as credential-bearing.
const SENSITIVE_FRAGMENTS: [&str; 4] = ["token", "secret", "password", "session"];

/// True when the value of header `name` must not be displayed or persisted.
pub fn is_sensitive_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    SENSITIVE_HEADERS.contains(&name.as_str())
        || SENSITIVE_FRAGMENTS.iter().any(|f| name.contains(f))
}

/// HTTP methods the load generator can send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Parse a method name case-insensitively. Unrecognised names map to `GET`.
    pub fn parse_lenient(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            "DELETE" => Self::Delete,
            _ => Self::Get,
        }
    }

    /// Whether requests with this method carry a body.
    pub fn has_body(&self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The immutable request every virtual user sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub url: String,
    /// Sent verbatim; serialized with credential values replaced by [`REDACTED`].
    #[serde(serialize_with = "serialize_redacted_headers")]
    pub headers: BTreeMap<String, String>,
    /// Present only for methods where [`HttpMethod::has_body`] is true.
    #[serde(skip)]
    pub body: Option<Vec<u8>>,
    #[serde(skip)]
    pub timeout: Duration,
    pub expected_status: u16,
}

impl RequestSpec {
    /// Body length in bytes, zero when there is no body.
    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Vec::len)
    }

    /// Headers as they may be shown to a user or written to disk.
    pub fn display_headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(name, value)| {
            let shown = if is_sensitive_header(name) {
                REDACTED
            } else {
                value.as_str()
            };
            (name.as_str(), shown)
        })
    }
}

fn serialize_redacted_headers<S>(
    headers: &BTreeMap<String, String>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let mut map = serializer.serialize_map(Some(headers.len()))?;
    for (name, value) in headers {
        if is_sensitive_header(name) {
            map.serialize_entry(name, REDACTED)?;
        } else {
            map.serialize_entry(name, value)?;
        }
    }
    map.end()
}

/// Build the request specification from `config`.
///
/// # Errors
///
/// Returns [`ConfigurationError::MissingTargetUrl`] when no target is set,
/// [`ConfigurationError::InvalidTargetUrl`] when it is not an absolute
/// http(s) URL, and [`ConfigurationError::InvalidExpectedStatus`] when the
/// expected status is not an integer from 100 to 999. A malformed `HEADERS`
/// override is logged and ignored.
pub fn build_request_spec(config: &RunConfig) -> Result<RequestSpec, ConfigurationError> {
    let url = validate_target_url(config.target_url())?;
    let method = config
        .method()
        .map(HttpMethod::parse_lenient)
        .unwrap_or_default();
    let expected_status = parse_expected_status(config.expected_status())?;

    let headers = merge_headers(config.headers());

    let body = method.has_body().then(|| {
        config
            .payload_data()
            .unwrap_or(DEFAULT_PAYLOAD)
            .as_bytes()
            .to_vec()
    });

    Ok(RequestSpec {
        method,
        url,
        headers,
        body,
        timeout: REQUEST_TIMEOUT,
        expected_status,
    })
}

/// Merge the optional JSON header override into the base header set.
///
/// Override keys replace base keys compared case-insensitively, taking the
/// override's spelling. String values are used verbatim; numbers and booleans
/// are stringified; any other value is skipped. A payload that is not a JSON
/// object leaves the base set untouched.
pub fn merge_headers(override_json: Option<&str>) -> BTreeMap<String, String> {
    let mut headers: BTreeMap<String, String> = BASE_HEADERS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let Some(raw) = override_json else {
        return headers;
    };

    let overrides = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(other) => {
            tracing::warn!(
                kind = json_kind(&other),
                "HEADERS must be a JSON object; keeping base headers"
            );
            return headers;
        }
        Err(err) => {
            tracing::warn!(error = %err, "Failed to parse HEADERS; keeping base headers");
            return headers;
        }
    };

    for (key, value) in overrides {
        let value = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            other => {
                tracing::warn!(header = %key, kind = json_kind(&other), "Skipping non-scalar header value");
                continue;
            }
        };
        headers.retain(|existing, _| !existing.eq_ignore_ascii_case(&key));
        headers.insert(key, value);
    }

    headers
}

fn validate_target_url(raw: Option<&str>) -> Result<String, ConfigurationError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ConfigurationError::MissingTargetUrl)?;

    let parsed = url::Url::parse(raw).map_err(|e| ConfigurationError::InvalidTargetUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(raw.to_string()),
        scheme => Err(ConfigurationError::InvalidTargetUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{scheme}'"),
        }),
    }
}

fn parse_expected_status(raw: Option<&str>) -> Result<u16, ConfigurationError> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_EXPECTED_STATUS);
    };
    raw.trim()
        .parse::<u16>()
        .ok()
        .filter(|code| STATUS_CODE_RANGE.contains(code))
        .ok_or_else(|| ConfigurationError::InvalidExpectedStatus {
            value: raw.to_string(),
        })
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
