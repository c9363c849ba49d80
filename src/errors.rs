//! Error types for runs and for individual probes.
//!
//! [`ProbeError`] describes why a single sample was dropped and never leaves
//! the sampler as a failure. [`SpeedTestError`] is reserved for conditions
//! that stop a whole run or the CLI, and carries a suggestion for the user.

use crate::metric::Metric;
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Process exit codes.
pub mod exit_codes {
    /// Every metric was measured.
    pub const SUCCESS: i32 = 0;
    /// No metric could be measured.
    pub const NETWORK_ERROR: i32 = 1;
    /// Invalid arguments or config file.
    pub const CONFIG_ERROR: i32 = 3;
    /// Some metrics were measured, others were not.
    pub const PARTIAL_FAILURE: i32 = 4;
    /// The run was interrupted.
    pub const CANCELLED: i32 = 130;
    pub const UNKNOWN_ERROR: i32 = 99;
}

/// Why a single probe did not produce an observation.
#[derive(Debug)]
pub enum ProbeError {
    /// The request could not be sent or the body could not be read.
    Request(reqwest::Error),
    /// The endpoint answered with a non-success status.
    Status(reqwest::StatusCode),
    /// No complete response within the per-request timeout.
    Timeout(Duration),
    /// The run was cancelled while the probe was in flight.
    Cancelled,
    /// A download finished without transferring any bytes.
    EmptyBody,
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Request(e) => write!(f, "request failed: {}", e),
            ProbeError::Status(status) => write!(f, "server returned {}", status),
            ProbeError::Timeout(after) => {
                write!(f, "timed out after {} ms", after.as_millis())
            }
            ProbeError::Cancelled => write!(f, "cancelled"),
            ProbeError::EmptyBody => write!(f, "response body was empty"),
        }
    }
}

impl Error for ProbeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProbeError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => ProbeError::Status(status),
            None => ProbeError::Request(error),
        }
    }
}

/// Categories of run-level errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Dns,
    Timeout,
    Tls,
    Api,
    Config,
    /// A metric could not be measured at all.
    Measurement,
    Unknown,
}

impl ErrorKind {
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Network
            | ErrorKind::Dns
            | ErrorKind::Timeout
            | ErrorKind::Tls
            | ErrorKind::Api => exit_codes::NETWORK_ERROR,
            ErrorKind::Config => exit_codes::CONFIG_ERROR,
            ErrorKind::Measurement => exit_codes::PARTIAL_FAILURE,
            ErrorKind::Unknown => exit_codes::UNKNOWN_ERROR,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Network error",
            ErrorKind::Dns => "DNS resolution error",
            ErrorKind::Timeout => "Connection timeout",
            ErrorKind::Tls => "TLS/SSL error",
            ErrorKind::Api => "Endpoint error",
            ErrorKind::Config => "Configuration error",
            ErrorKind::Measurement => "Measurement error",
            ErrorKind::Unknown => "Unknown error",
        }
    }

    fn default_suggestion(&self) -> Option<&'static str> {
        match self {
            ErrorKind::Network => {
                Some("Check your internet connection and try again.")
            }
            ErrorKind::Dns => Some(
                "Check your DNS settings or try using a different DNS server.",
            ),
            ErrorKind::Timeout => Some(
                "The endpoint may be slow or unreachable. Try again later or raise --timeout-ms.",
            ),
            ErrorKind::Tls => {
                Some("There may be a certificate issue. Check your system time.")
            }
            ErrorKind::Api => Some(
                "The endpoint rejected the request. Verify the configured URLs accept GET/POST.",
            ),
            ErrorKind::Measurement => Some(
                "Try again, or raise the sample count or --timeout-ms.",
            ),
            ErrorKind::Config | ErrorKind::Unknown => None,
        }
    }
}

/// A user-facing error that stops a run.
#[derive(Debug)]
pub struct SpeedTestError {
    pub kind: ErrorKind,
    pub message: String,
    pub suggestion: Option<String>,
    pub source: Option<Box<dyn Error + Send + Sync>>,
}

impl SpeedTestError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), suggestion: None, source: None }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(
        mut self,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Explain why `metric` produced no observations, given the reason its
    /// last probe failed.
    pub fn unmeasured(metric: Metric, reason: Option<&str>) -> Self {
        let Some(reason) = reason else {
            return Self::from_kind(
                ErrorKind::Measurement,
                format!("{} could not be measured", metric),
            );
        };

        let kind = match classify_message(reason) {
            ErrorKind::Unknown => ErrorKind::Measurement,
            kind => kind,
        };
        Self::from_kind(kind, format!("{} could not be measured: {}", metric, reason))
    }

    fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let error = Self::new(kind, message);
        match kind.default_suggestion() {
            Some(suggestion) => error.with_suggestion(suggestion),
            None => error,
        }
    }
}

impl fmt::Display for SpeedTestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.description(), self.message)?;

        if let Some(ref suggestion) = self.suggestion {
            write!(f, "\n  Suggestion: {}", suggestion)?;
        }

        Ok(())
    }
}

impl Error for SpeedTestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

/// Classify an error into an [`ErrorKind`] based on its message.
pub fn classify_error(error: &dyn Error) -> ErrorKind {
    classify_message(&error.to_string())
}

/// Classify a failure description into an [`ErrorKind`].
pub fn classify_message(message: &str) -> ErrorKind {
    let error_str = message.to_lowercase();

    if ["dns", "resolve", "no such host"]
        .iter()
        .any(|needle| error_str.contains(needle))
    {
        return ErrorKind::Dns;
    }

    if ["timeout", "timed out", "deadline"]
        .iter()
        .any(|needle| error_str.contains(needle))
    {
        return ErrorKind::Timeout;
    }

    if ["tls", "ssl", "certificate", "handshake"]
        .iter()
        .any(|needle| error_str.contains(needle))
    {
        return ErrorKind::Tls;
    }

    if [
        "connection refused",
        "connection reset",
        "network unreachable",
        "host unreachable",
        "no route",
        "broken pipe",
        "error sending request",
    ]
    .iter()
    .any(|needle| error_str.contains(needle))
    {
        return ErrorKind::Network;
    }

    if ["status: 4", "status: 5", "server returned", "server error"]
        .iter()
        .any(|needle| error_str.contains(needle))
    {
        return ErrorKind::Api;
    }

    ErrorKind::Unknown
}

/// Wrap an arbitrary error into a [`SpeedTestError`] with a matching kind
/// and suggestion.
pub fn to_speed_test_error(
    error: Box<dyn Error + Send + Sync>,
    context: &str,
) -> SpeedTestError {
    let kind = classify_error(error.as_ref());
    let mut speed_error =
        SpeedTestError::from_kind(kind, format!("{}: {}", context, error));
    speed_error.source = Some(error);
    speed_error
}

/// Render an error the way the CLI prints it.
pub fn format_error_for_display(error: &SpeedTestError) -> String {
    let mut output = format!("Error: {}", error.message);

    if let Some(ref suggestion) = error.suggestion {
        output.push_str(&format!("\n\nSuggestion: {}", suggestion));
    }

    output
}
