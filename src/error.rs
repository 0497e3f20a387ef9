//! # Gateway Error Handling
//!
//! Hierarchical error types for the vision gateway, with error classification
//! traits and attached context.
//!
//! ## Taxonomy
//!
//! | Error | Raised by | Handling |
//! |-------|-----------|----------|
//! | `Preprocessing` | Preprocessor | fatal, no retry, no fallback |
//! | `ProviderError::Timeout` / `Unavailable` | adapters | retried, then next provider |
//! | `ProviderError::InvalidResponse` | adapters | next provider, no retry |
//! | `BudgetExceeded` | Gateway | fatal unless a free provider remains |
//! | `AllProvidersExhausted` | Gateway | aggregate of per-provider failures, fatal |
//! | `Config` / `Storage` | setup, SQLite | surfaced to the caller |
//!
//! Provider-level errors never reach the caller directly: the gateway absorbs
//! them and only reports them inside `AllProvidersExhausted`.
//!
//! ## Usage
//!
//! ```rust
//! use vision_gateway::error::{GatewayError, HasRecoverySuggestion, ProviderError, Retryable};
//!
//! let error = GatewayError::preprocessing("baseline", "zero-byte input")
//!     .with_recovery_suggestion("Check the screenshot capture step");
//! assert_eq!(error.category(), "preprocessing");
//! assert!(error.recovery_suggestion().is_some());
//!
//! let timeout = ProviderError::timeout("openai", 30_000);
//! assert!(timeout.is_retryable());
//! ```

use std::{error::Error as StdError, fmt, time::SystemTime};

use serde::Serialize;

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ErrorSeverity {
    /// Warnings that may indicate potential issues
    Warning,
    /// Errors that affect a single request
    Error,
    /// Errors that will keep failing until an operator intervenes
    Critical,
}

/// Metadata about when and where an error occurred
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// When the error occurred
    pub timestamp: SystemTime,
    /// The operation being performed when the error occurred
    pub operation: Option<String>,
    /// Additional context about the error
    pub context: Option<String>,
    /// Suggested recovery action
    pub recovery_suggestion: Option<String>,
    /// Error severity level
    pub severity: ErrorSeverity,
    /// Additional metadata as key-value pairs
    pub metadata: std::collections::BTreeMap<String, String>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            timestamp: SystemTime::now(),
            operation: None,
            context: None,
            recovery_suggestion: None,
            severity: ErrorSeverity::Error,
            metadata: std::collections::BTreeMap::new(),
        }
    }
}

impl ErrorContext {
    /// Create a new error context
    pub fn new() -> Self {
        Self::default()
    }

    fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// Budget window that tripped the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetWindow {
    Daily,
    Monthly,
}

impl fmt::Display for BudgetWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetWindow::Daily => write!(f, "daily"),
            BudgetWindow::Monthly => write!(f, "monthly"),
        }
    }
}

/// Error returned by a provider adapter.
///
/// Adapters map every transport failure into one of these three kinds; the
/// gateway's retry table only looks at the kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderError {
    /// Connection refused, 5xx, rate limited, missing credentials
    Unavailable { provider: String, reason: String },
    /// The call did not complete within the provider's timeout
    Timeout { provider: String, duration_ms: u64 },
    /// The provider answered but the answer could not be used
    InvalidResponse { provider: String, reason: String },
}

/// Kind of a [`ProviderError`], without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    Unavailable,
    Timeout,
    InvalidResponse,
}

impl ProviderError {
    pub fn unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(provider: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            provider: provider.into(),
            duration_ms,
        }
    }

    pub fn invalid_response(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::Unavailable { .. } => ProviderErrorKind::Unavailable,
            Self::Timeout { .. } => ProviderErrorKind::Timeout,
            Self::InvalidResponse { .. } => ProviderErrorKind::InvalidResponse,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::Unavailable { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::InvalidResponse { provider, .. } => provider,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Unavailable { provider, reason } => {
                write!(f, "Provider '{}' unavailable: {}", provider, reason)
            }
            ProviderError::Timeout {
                provider,
                duration_ms,
            } => write!(f, "Provider '{}' timed out after {}ms", provider, duration_ms),
            ProviderError::InvalidResponse { provider, reason } => {
                write!(f, "Provider '{}' returned an invalid response: {}", provider, reason)
            }
        }
    }
}

impl StdError for ProviderError {}

/// Why a provider in the fallback chain did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// `is_available()` returned false; never called
    NotAvailable,
    /// Paid provider skipped because the circuit breaker is tripped
    BudgetExceeded { window: BudgetWindow },
    /// Called and failed; holds the last error
    Failed { error: ProviderError },
}

/// One provider's entry in an exhausted fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderFailure {
    pub provider: String,
    /// Number of calls made (0 when skipped)
    pub attempts: u32,
    #[serde(flatten)]
    pub reason: FailureReason,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            FailureReason::NotAvailable => write!(f, "{}: not available", self.provider),
            FailureReason::BudgetExceeded { window } => {
                write!(f, "{}: skipped, {} budget exceeded", self.provider, window)
            }
            FailureReason::Failed { error } => write!(
                f,
                "{}: {} (after {} attempt{})",
                self.provider,
                error,
                self.attempts,
                if self.attempts == 1 { "" } else { "s" }
            ),
        }
    }
}

/// Base error type for the vision gateway
#[derive(Debug)]
pub enum GatewayError {
    /// Input image could not be normalized
    Preprocessing {
        image: String,
        reason: String,
        context: ErrorContext,
    },
    /// Circuit breaker tripped and no free provider is configured
    BudgetExceeded {
        window: BudgetWindow,
        used: f64,
        limit: f64,
        context: ErrorContext,
    },
    /// Every provider in the fallback chain failed or was skipped
    AllProvidersExhausted {
        failures: Vec<ProviderFailure>,
        context: ErrorContext,
    },
    /// Configuration validation errors
    Config {
        field: String,
        value: String,
        reason: String,
        context: ErrorContext,
    },
    /// Durable store (SQLite) failures
    Storage {
        operation: String,
        source: Box<dyn StdError + Send + Sync>,
        context: ErrorContext,
    },
}

impl GatewayError {
    /// Create a preprocessing error for the named image (baseline, current, diff)
    pub fn preprocessing(image: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Preprocessing {
            image: image.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn budget_exceeded(window: BudgetWindow, used: f64, limit: f64) -> Self {
        Self::BudgetExceeded {
            window,
            used,
            limit,
            context: ErrorContext::new().with_severity(ErrorSeverity::Critical),
        }
    }

    pub fn all_providers_exhausted(failures: Vec<ProviderFailure>) -> Self {
        Self::AllProvidersExhausted {
            failures,
            context: ErrorContext::new(),
        }
    }

    pub fn config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Config {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Critical),
        }
    }

    pub fn storage(
        operation: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            operation: operation.into(),
            source: Box::new(source),
            context: ErrorContext::new(),
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context_mut().context = Some(context.into());
        self
    }

    /// Add operation context
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context_mut().operation = Some(operation.into());
        self
    }

    /// Add recovery suggestion
    pub fn with_recovery_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context_mut().recovery_suggestion = Some(suggestion.into());
        self
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_mut().metadata.insert(key.into(), value.into());
        self
    }

    /// Get the error context
    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Preprocessing { context, .. } => context,
            Self::BudgetExceeded { context, .. } => context,
            Self::AllProvidersExhausted { context, .. } => context,
            Self::Config { context, .. } => context,
            Self::Storage { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::Preprocessing { context, .. } => context,
            Self::BudgetExceeded { context, .. } => context,
            Self::AllProvidersExhausted { context, .. } => context,
            Self::Config { context, .. } => context,
            Self::Storage { context, .. } => context,
        }
    }

    /// Get the error category as a string
    pub fn category(&self) -> &'static str {
        match self {
            Self::Preprocessing { .. } => "preprocessing",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::AllProvidersExhausted { .. } => "all_providers_exhausted",
            Self::Config { .. } => "config",
            Self::Storage { .. } => "storage",
        }
    }

    /// Per-provider failures, empty unless the chain was exhausted
    pub fn provider_failures(&self) -> &[ProviderFailure] {
        match self {
            Self::AllProvidersExhausted { failures, .. } => failures,
            _ => &[],
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Preprocessing { image, reason, .. } => {
                write!(f, "Preprocessing failed for {} image: {}", image, reason)
            }
            GatewayError::BudgetExceeded {
                window,
                used,
                limit,
                ..
            } => write!(
                f,
                "Budget exceeded: {} spend ${:.4} reached limit ${:.4}",
                window, used, limit
            ),
            GatewayError::AllProvidersExhausted { failures, .. } => {
                if failures.is_empty() {
                    return write!(f, "All providers exhausted: no providers configured");
                }
                write!(f, "All providers exhausted: ")?;
                for (i, failure) in failures.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", failure)?;
                }
                Ok(())
            }
            GatewayError::Config {
                field,
                value,
                reason,
                ..
            } => write!(
                f,
                "Configuration error in '{}': {} (value: {})",
                field, reason, value
            ),
            GatewayError::Storage {
                operation, source, ..
            } => write!(f, "Storage error during {}: {}", operation, source),
        }
    }
}

impl StdError for GatewayError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Storage { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Result type alias using the gateway error type
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Trait for errors that can be retried
pub trait Retryable {
    /// Check if this error can be retried
    fn is_retryable(&self) -> bool;
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable { .. })
    }
}

impl Retryable for GatewayError {
    /// Gateway-level errors are final for the request that produced them.
    fn is_retryable(&self) -> bool {
        false
    }
}

/// Trait for errors with severity levels
pub trait HasSeverity {
    /// Get the severity level of this error
    fn severity(&self) -> ErrorSeverity;
}

impl HasSeverity for GatewayError {
    fn severity(&self) -> ErrorSeverity {
        self.context().severity
    }
}

/// Trait for errors that provide recovery suggestions
pub trait HasRecoverySuggestion {
    /// Get recovery suggestion for this error
    fn recovery_suggestion(&self) -> Option<&str>;
}

impl HasRecoverySuggestion for GatewayError {
    fn recovery_suggestion(&self) -> Option<&str> {
        if let Some(suggestion) = self.context().recovery_suggestion.as_deref() {
            return Some(suggestion);
        }
        match self {
            Self::BudgetExceeded { .. } => {
                Some("Wait for the budget window to roll over or configure a local provider")
            }
            Self::AllProvidersExhausted { .. } => {
                Some("Check provider credentials, endpoints and network connectivity")
            }
            _ => None,
        }
    }
}

/// Error classification utilities
pub mod classify {
    use super::*;

    /// Outage: every provider that was actually called failed with a transient error
    pub fn is_outage(error: &GatewayError) -> bool {
        let failures = error.provider_failures();
        !failures.is_empty()
            && failures.iter().all(|f| match &f.reason {
                FailureReason::Failed { error } => error.is_retryable(),
                FailureReason::NotAvailable => true,
                FailureReason::BudgetExceeded { .. } => false,
            })
    }

    /// Budget exhaustion, either directly or as the reason paid providers were skipped
    pub fn is_budget_exhaustion(error: &GatewayError) -> bool {
        matches!(error, GatewayError::BudgetExceeded { .. })
            || error
                .provider_failures()
                .iter()
                .any(|f| matches!(f.reason, FailureReason::BudgetExceeded { .. }))
    }

    /// The caller's input was bad; retrying the same request cannot help
    pub fn is_bad_input(error: &GatewayError) -> bool {
        matches!(error, GatewayError::Preprocessing { .. })
    }

    /// A stored row was read but could not be decoded. Reading it again
    /// gives the same answer, unlike a busy database or a failed task.
    pub fn is_corrupt_data(error: &GatewayError) -> bool {
        let GatewayError::Storage { source, .. } = error else {
            return false;
        };
        if source.downcast_ref::<serde_json::Error>().is_some() {
            return true;
        }
        if let Some(io) = source.downcast_ref::<std::io::Error>() {
            return io.kind() == std::io::ErrorKind::InvalidData;
        }
        matches!(
            source.downcast_ref::<rusqlite::Error>(),
            Some(
                rusqlite::Error::FromSqlConversionFailure(..)
                    | rusqlite::Error::InvalidColumnType(..)
            )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = GatewayError::config("budget.daily_limit", "-1", "must not be negative");
        assert_eq!(error.category(), "config");
        assert!(!error.is_retryable());
        assert_eq!(error.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn test_error_with_context() {
        let error = GatewayError::preprocessing("current", "unsupported color type")
            .with_operation("normalize")
            .with_recovery_suggestion("re-capture the screenshot as PNG")
            .with_metadata("bytes", "1024");

        assert_eq!(error.category(), "preprocessing");
        assert_eq!(error.context().operation.as_deref(), Some("normalize"));
        assert_eq!(
            error.recovery_suggestion(),
            Some("re-capture the screenshot as PNG")
        );
        assert!(classify::is_bad_input(&error));
    }

    #[test]
    fn test_provider_error_traits() {
        assert!(ProviderError::timeout("a", 5000).is_retryable());
        assert!(ProviderError::unavailable("a", "503").is_retryable());
        assert!(!ProviderError::invalid_response("a", "not json").is_retryable());
        assert_eq!(
            ProviderError::invalid_response("a", "x").kind(),
            ProviderErrorKind::InvalidResponse
        );
    }

    #[test]
    fn test_exhausted_display_lists_every_provider() {
        let error = GatewayError::all_providers_exhausted(vec![
            ProviderFailure {
                provider: "local".into(),
                attempts: 2,
                reason: FailureReason::Failed {
                    error: ProviderError::timeout("local", 30_000),
                },
            },
            ProviderFailure {
                provider: "openai".into(),
                attempts: 0,
                reason: FailureReason::BudgetExceeded {
                    window: BudgetWindow::Daily,
                },
            },
        ]);

        let text = error.to_string();
        assert!(text.contains("local: Provider 'local' timed out after 30000ms (after 2 attempts)"));
        assert!(text.contains("openai: skipped, daily budget exceeded"));
        assert!(classify::is_budget_exhaustion(&error));
        assert!(!classify::is_outage(&error));
    }

    #[test]
    fn test_outage_classification() {
        let error = GatewayError::all_providers_exhausted(vec![ProviderFailure {
            provider: "openai".into(),
            attempts: 2,
            reason: FailureReason::Failed {
                error: ProviderError::unavailable("openai", "HTTP 503"),
            },
        }]);
        assert!(classify::is_outage(&error));
    }

    #[test]
    fn only_undecodable_rows_count_as_corrupt() {
        let bad_json = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(classify::is_corrupt_data(&GatewayError::storage(
            "decode cache entry",
            bad_json
        )));

        let bad_stamp = std::io::Error::new(std::io::ErrorKind::InvalidData, "out of range");
        assert!(classify::is_corrupt_data(&GatewayError::storage(
            "decode timestamp",
            bad_stamp
        )));

        let busy = std::io::Error::other("database is locked");
        assert!(!classify::is_corrupt_data(&GatewayError::storage(
            "load cache entry",
            busy
        )));
        assert!(!classify::is_corrupt_data(&GatewayError::preprocessing(
            "current",
            "zero-byte input"
        )));
    }
}
