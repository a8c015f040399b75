//! Error types for the load testing engine.
//!
//! Defines [`ConfigurationError`] for run-fatal configuration problems,
//! [`ThresholdError`] for rejected threshold definitions,
//! [`TransportError`] for per-iteration request failures and
//! [`LoadTestError`] for everything that can stop a run.

/// Configuration problems that make it impossible to form a request.
///
/// These are fatal: the run is aborted before any virtual user starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// `TARGET_URL` was not supplied (or was empty).
    #[error("TARGET_URL is required but was not set")]
    MissingTargetUrl,

    /// `TARGET_URL` was supplied but is not an absolute http(s) URL.
    #[error("TARGET_URL '{url}' is not a valid http(s) URL: {reason}")]
    InvalidTargetUrl { url: String, reason: String },

    /// `EXPECTED_STATUS` was supplied but is not an integer in the range a
    /// response status can take (100 to 999).
    #[error("EXPECTED_STATUS '{value}' is not a valid HTTP status code (expected an integer from 100 to 999)")]
    InvalidExpectedStatus { value: String },
}

/// A threshold definition that cannot be parsed or applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThresholdError {
    /// The text is not of the form `metric:expression` or the expression is malformed.
    #[error("Invalid threshold '{input}': {reason}")]
    Parse { input: String, reason: String },

    /// The metric name is not one the recorder aggregates.
    #[error("Unknown threshold metric '{name}' (expected http_req_duration, http_req_failed or checks)")]
    UnknownMetric { name: String },

    /// The aggregation does not apply to the metric (e.g. `rate` on a trend).
    #[error("Aggregation '{aggregation}' is not supported for metric '{metric}'")]
    UnsupportedAggregation { metric: String, aggregation: String },
}

/// Transport-level failures raised by the HTTP primitive.
///
/// A transport failure abandons the current iteration: no checks are
/// recorded, only the failed request itself is counted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request exceeded the per-request timeout.
    #[error("Request timed out")]
    Timeout,

    /// Connection-level failure (DNS resolution, TCP connect, TLS handshake, reset).
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Any other failure while sending the request or reading the body.
    #[error("Request error: {message}")]
    Other { message: String },
}

impl TransportError {
    /// Returns the error category as a static string for metrics classification.
    ///
    /// Categories: `"timeout"`, `"connection"`, `"other"`.
    pub fn error_category(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection { .. } => "connection",
            Self::Other { .. } => "other",
        }
    }

    /// Classify a [`reqwest::Error`] into the appropriate [`TransportError`] variant.
    pub fn classify_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection {
                message: err.to_string(),
            }
        } else {
            Self::Other {
                message: err.to_string(),
            }
        }
    }
}

/// Errors that stop a load test run.
#[derive(Debug, thiserror::Error)]
pub enum LoadTestError {
    /// Fatal configuration problem detected at initialisation.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// A user-supplied threshold was rejected.
    #[error(transparent)]
    Threshold(#[from] ThresholdError),

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {message}")]
    ClientBuild { message: String },

    /// Report file I/O failure.
    #[error("Failed to write report '{path}': {source}")]
    ReportIo {
        source: std::io::Error,
        path: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_timeout() {
        assert_eq!(TransportError::Timeout.error_category(), "timeout");
    }

    #[test]
    fn test_error_category_connection() {
        let err = TransportError::Connection {
            message: "connection reset by peer".to_string(),
        };
        assert_eq!(err.error_category(), "connection");
    }

    #[test]
    fn test_error_category_other() {
        let err = TransportError::Other {
            message: "body decode failed".to_string(),
        };
        assert_eq!(err.error_category(), "other");
    }

    #[test]
    fn test_configuration_error_converts_into_load_test_error() {
        let err: LoadTestError = ConfigurationError::MissingTargetUrl.into();
        assert!(matches!(
            err,
            LoadTestError::Configuration(ConfigurationError::MissingTargetUrl)
        ));
        assert!(err.to_string().contains("TARGET_URL"));
    }

    #[test]
    fn test_invalid_expected_status_message_names_value() {
        let err = ConfigurationError::InvalidExpectedStatus {
            value: "two hundred".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("two hundred"));
        assert!(message.contains("from 100 to 999"));
    }
}
