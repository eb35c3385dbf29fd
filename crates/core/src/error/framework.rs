use super::{ErrorCode, ErrorContext};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Recovered in place; the run continues
    Low,
    /// Degraded result (e.g. one target missing from the run)
    Medium,
    /// The current invocation fails
    High,
    /// The history itself is at risk; refuse to proceed
    Critical,
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    System,
    History,
    Collection,
    Identity,
    Report,
    Input,
    Actions,
}

/// Main error type for the auditor
#[derive(Debug, ThisError, Clone)]
#[error("[{code}] {message}")]
pub struct Error {
    /// Standardized error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional detailed description
    pub details: Option<String>,
    /// Error context for debugging
    pub context: ErrorContext,
    /// Error severity
    pub severity: ErrorSeverity,
    /// Optional cause chain
    pub cause: Option<Box<Error>>,
}

impl Error {
    /// Create a new error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            context: ErrorContext::new(),
            severity: Self::default_severity_for_code(code),
            cause: None,
        }
    }

    /// Create error with details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Set error context
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    /// Set error severity
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Chain with another error as cause
    pub fn with_cause(mut self, cause: Error) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Add trace to context
    pub fn add_trace(mut self, trace: impl Into<String>) -> Self {
        self.context = self.context.add_trace(trace.into());
        self
    }

    /// Add metadata to context
    pub fn add_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.add_metadata(key.into(), value);
        self
    }

    /// Attribute the error to a target
    pub fn for_target(mut self, target: impl Into<String>) -> Self {
        self.context.target = Some(target.into());
        self
    }

    /// Attribute the error to a rule
    pub fn for_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.context.rule_id = Some(rule_id.into());
        self
    }

    /// Get process exit code
    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self.code.category() {
            "system" => ErrorCategory::System,
            "history" => ErrorCategory::History,
            "collection" => ErrorCategory::Collection,
            "identity" => ErrorCategory::Identity,
            "report" => ErrorCategory::Report,
            "input" => ErrorCategory::Input,
            "actions" => ErrorCategory::Actions,
            _ => ErrorCategory::System,
        }
    }

    /// Check if the error is recovered in place rather than fatal
    pub fn is_recovered(&self) -> bool {
        self.code.is_recovered()
    }

    /// Check if should be logged as error level
    pub fn should_log_as_error(&self) -> bool {
        self.code.should_log_as_error()
            || matches!(self.severity, ErrorSeverity::High | ErrorSeverity::Critical)
    }

    /// One-line diagnosis for the CLI edge
    pub fn diagnosis(&self) -> String {
        match (&self.context.target, &self.context.rule_id) {
            (Some(target), Some(rule)) => {
                format!("[{}] {} (target {}, rule {})", self.code, self.message, target, rule)
            }
            (Some(target), None) => format!("[{}] {} (target {})", self.code, self.message, target),
            _ => format!("[{}] {}", self.code, self.message),
        }
    }

    /// Convert to full debug JSON (for internal logging only)
    pub fn to_debug_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "details": self.details,
                "context": self.context,
                "severity": self.severity,
                "cause": self.cause.as_ref().map(|c| c.to_debug_json())
            }
        })
    }

    /// Get default severity for error code
    fn default_severity_for_code(code: ErrorCode) -> ErrorSeverity {
        match code {
            ErrorCode::QueryFailed
            | ErrorCode::UuidCollision
            | ErrorCode::DuplicateUuidInReport
            | ErrorCode::AnnotationParseError
            | ErrorCode::ActionDedupConflict => ErrorSeverity::Low,

            ErrorCode::TargetUnreachable
            | ErrorCode::VersionDetectionFailed
            | ErrorCode::Timeout
            | ErrorCode::InvalidInput
            | ErrorCode::MissingRequiredField
            | ErrorCode::ValueOutOfRange
            | ErrorCode::RunNotFound => ErrorSeverity::Medium,

            ErrorCode::ReportLocked
            | ErrorCode::HistoryLocked
            | ErrorCode::ReportParseError
            | ErrorCode::SheetMissing
            | ErrorCode::ReportWriteError
            | ErrorCode::InvalidRowUuid
            | ErrorCode::RunFinalized
            | ErrorCode::Cancelled
            | ErrorCode::IoError
            | ErrorCode::SerializationError
            | ErrorCode::HistoryQueryError => ErrorSeverity::High,

            ErrorCode::InternalError
            | ErrorCode::ConfigurationError
            | ErrorCode::HistoryConnectionError
            | ErrorCode::HistoryConstraintViolation
            | ErrorCode::HistoryTransactionError
            | ErrorCode::SchemaMismatch => ErrorSeverity::Critical,
        }
    }
}

impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        #[derive(Serialize)]
        struct ErrorSer {
            code: ErrorCode,
            message: String,
            details: Option<String>,
            context: ErrorContext,
            severity: ErrorSeverity,
        }

        let error_ser = ErrorSer {
            code: self.code,
            message: self.message.clone(),
            details: self.details.clone(),
            context: self.context.clone(),
            severity: self.severity,
        };

        error_ser.serialize(serializer)
    }
}

// Convenience constructors for common errors
impl Error {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn target_unreachable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TargetUnreachable, message)
    }

    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::QueryFailed, message)
    }

    pub fn report_locked(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ReportLocked, message)
    }

    pub fn run_not_found(run_id: i64) -> Self {
        Self::new(ErrorCode::RunNotFound, format!("run {} not found", run_id))
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCode::SerializationError, err.to_string())
            .add_trace("serde_json::Error conversion")
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::new(ErrorCode::ConfigurationError, err.to_string())
            .add_trace("config::ConfigError conversion")
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorCode::IoError, err.to_string()).add_trace("std::io::Error conversion")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(Error::configuration("bad flag").exit_code(), 1);
        assert_eq!(Error::target_unreachable("PROD1").exit_code(), 2);
        assert_eq!(Error::internal("bug").exit_code(), 3);
        assert_eq!(Error::report_locked("report.xlsx").exit_code(), 4);
        assert_eq!(Error::new(ErrorCode::HistoryLocked, "history.db").exit_code(), 4);
    }

    #[test]
    fn test_recovered_codes_never_lock_exit() {
        for code in [
            ErrorCode::TargetUnreachable,
            ErrorCode::QueryFailed,
            ErrorCode::UuidCollision,
            ErrorCode::DuplicateUuidInReport,
            ErrorCode::AnnotationParseError,
            ErrorCode::ActionDedupConflict,
        ] {
            assert!(code.is_recovered(), "{code} should be recovered");
            assert_ne!(code.exit_code(), 4);
        }
    }

    #[test]
    fn test_cause_chain_and_diagnosis() {
        let inner = Error::query_failed("timeout expanding sys.configurations");
        let outer = Error::target_unreachable("PROD1 lost mid-run")
            .for_target("PROD1\\MSSQLSERVER")
            .with_cause(inner);

        assert!(outer.cause.is_some());
        let diag = outer.diagnosis();
        assert!(diag.contains("TARGET_UNREACHABLE"));
        assert!(diag.contains("PROD1\\MSSQLSERVER"));
    }
}
