//! Error taxonomy for remote failures.
//!
//! Every transport-level failure enters the core as a [`RemoteError`] and is
//! immediately turned into a [`ClassifiedError`]. Sync logic only ever looks
//! at [`ErrorCategory`], never at the raw shape.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Postgres unique-constraint violation.
pub const UNIQUE_VIOLATION_CODE: &str = "23505";

/// PostgREST "no rows returned" for single-object requests.
pub const NO_ROWS_CODE: &str = "PGRST116";

/// Upper bound for any retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Largest jitter added on top of the exponential delay (30%).
pub const MAX_JITTER_FRACTION: f64 = 0.3;

/// Fixed set of failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Auth,
    Validation,
    NotFound,
    Timeout,
    RateLimit,
    Server,
    Unknown,
}

impl ErrorCategory {
    /// Transient kinds are retried automatically; everything else is surfaced.
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::Server | Self::RateLimit
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Auth => "auth",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "network" => Ok(Self::Network),
            "auth" => Ok(Self::Auth),
            "validation" => Ok(Self::Validation),
            "not_found" => Ok(Self::NotFound),
            "timeout" => Ok(Self::Timeout),
            "rate_limit" => Ok(Self::RateLimit),
            "server" => Ok(Self::Server),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown error category '{other}'")),
        }
    }
}

/// Raw failure reported by a remote store or transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteError {
    /// Category asserted by a recognized domain error
    pub category: Option<ErrorCategory>,
    /// HTTP-like status code
    pub status: Option<u16>,
    /// Backend-specific error code
    pub code: Option<String>,
    /// Human readable message
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn categorized(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::new(message).with_category(category)
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(message).with_status(status)
    }

    #[must_use]
    pub const fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Convert into the tagged form used everywhere inside the core.
    pub fn classify(self) -> ClassifiedError {
        let category = categorize_error(&self);
        ClassifiedError {
            category,
            retryable: category.is_transient(),
            status: self.status,
            code: self.code,
            message: self.message,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, self.code.as_deref()) {
            (Some(status), Some(code)) => write!(f, "{} (HTTP {status}, {code})", self.message),
            (Some(status), None) => write!(f, "{} (HTTP {status})", self.message),
            (None, Some(code)) => write!(f, "{} ({code})", self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        let message = error.to_string();
        if error.is_timeout() {
            return Self::categorized(ErrorCategory::Timeout, message);
        }
        if error.is_connect() || error.is_request() {
            return Self::categorized(ErrorCategory::Network, message);
        }
        match error.status() {
            Some(status) => Self::http(status.as_u16(), message),
            None => Self::new(message),
        }
    }
}

/// Remote failure after classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub retryable: bool,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
}

impl ClassifiedError {
    /// The remote already holds a record with this key.
    pub fn is_unique_violation(&self) -> bool {
        self.code.as_deref() == Some(UNIQUE_VIOLATION_CODE) || self.status == Some(409)
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self.category, ErrorCategory::NotFound)
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

impl From<RemoteError> for ClassifiedError {
    fn from(error: RemoteError) -> Self {
        error.classify()
    }
}

/// Map a raw failure to its category. First matching rule wins.
pub fn categorize_error(error: &RemoteError) -> ErrorCategory {
    if let Some(category) = error.category {
        return category;
    }

    match error.code.as_deref() {
        Some(UNIQUE_VIOLATION_CODE) => return ErrorCategory::Validation,
        Some(NO_ROWS_CODE) => return ErrorCategory::NotFound,
        _ => {}
    }

    if let Some(status) = error.status {
        match status {
            401 | 403 => return ErrorCategory::Auth,
            404 => return ErrorCategory::NotFound,
            408 => return ErrorCategory::Timeout,
            429 => return ErrorCategory::RateLimit,
            500..=599 => return ErrorCategory::Server,
            _ => {}
        }
    }

    let message = error.message.to_ascii_lowercase();
    if message.contains("network") || message.contains("fetch") {
        return ErrorCategory::Network;
    }
    if message.contains("timeout") || message.contains("timed out") {
        return ErrorCategory::Timeout;
    }

    ErrorCategory::Unknown
}

/// Whether another attempt should be made after `attempt` attempts.
///
/// Unclassified errors never retry.
pub const fn should_retry(category: ErrorCategory, attempt: u32, max_attempts: u32) -> bool {
    category.is_transient() && attempt < max_attempts
}

/// Exponential backoff with up to 30% random jitter, capped at 30s.
pub fn retry_delay(attempt: u32, base: Duration) -> Duration {
    let jitter = rand::rng().random_range(0.0..=MAX_JITTER_FRACTION);
    retry_delay_with_jitter(attempt, base, jitter)
}

/// Deterministic form of [`retry_delay`]; `jitter_fraction` is clamped to `[0, 0.3]`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn retry_delay_with_jitter(attempt: u32, base: Duration, jitter_fraction: f64) -> Duration {
    let cap_ms = MAX_RETRY_DELAY.as_millis() as u64;
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let factor = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
    let exponential = base_ms.saturating_mul(factor);
    if exponential >= cap_ms {
        return MAX_RETRY_DELAY;
    }

    let fraction = jitter_fraction.clamp(0.0, MAX_JITTER_FRACTION);
    let jitter = (exponential as f64 * fraction) as u64;
    Duration::from_millis(exponential.saturating_add(jitter).min(cap_ms))
}
