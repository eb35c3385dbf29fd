use serde::{Deserialize, Serialize};
use std::fmt;

/// Standardized error codes for the auditor.
/// These represent technical error categories, not individual findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // General System Errors (1000-1999)
    InternalError = 1000,
    ConfigurationError = 1001,
    Timeout = 1002,
    Cancelled = 1003,
    IoError = 1004,
    SerializationError = 1005,

    // History Store Errors (2000-2999)
    HistoryConnectionError = 2000,
    HistoryConstraintViolation = 2001,
    HistoryTransactionError = 2002,
    HistoryQueryError = 2003,
    SchemaMismatch = 2004,
    HistoryLocked = 2005,

    // Collection Errors (3000-3999)
    TargetUnreachable = 3000,
    QueryFailed = 3001,
    VersionDetectionFailed = 3002,

    // Identity Errors (4000-4999)
    UuidCollision = 4000,
    InvalidRowUuid = 4001,
    DuplicateUuidInReport = 4002,

    // Report Errors (5000-5999)
    ReportLocked = 5000,
    ReportParseError = 5001,
    AnnotationParseError = 5002,
    SheetMissing = 5003,
    ReportWriteError = 5004,

    // Input & Run-State Errors (6000-6999)
    InvalidInput = 6000,
    MissingRequiredField = 6001,
    ValueOutOfRange = 6002,
    RunNotFound = 6003,
    RunFinalized = 6004,

    // Action Log Errors (7000-7999)
    ActionDedupConflict = 7000,
}

impl ErrorCode {
    /// Process exit code for this error per the CLI contract:
    /// 1 user error, 2 target failure, 3 internal error, 4 locked resource.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCode::ConfigurationError
            | ErrorCode::InvalidInput
            | ErrorCode::MissingRequiredField
            | ErrorCode::ValueOutOfRange
            | ErrorCode::RunNotFound
            | ErrorCode::RunFinalized => 1,

            ErrorCode::TargetUnreachable
            | ErrorCode::QueryFailed
            | ErrorCode::VersionDetectionFailed => 2,

            ErrorCode::InternalError
            | ErrorCode::Timeout
            | ErrorCode::Cancelled
            | ErrorCode::IoError
            | ErrorCode::SerializationError
            | ErrorCode::HistoryConnectionError
            | ErrorCode::HistoryConstraintViolation
            | ErrorCode::HistoryTransactionError
            | ErrorCode::HistoryQueryError
            | ErrorCode::SchemaMismatch
            | ErrorCode::UuidCollision
            | ErrorCode::InvalidRowUuid
            | ErrorCode::DuplicateUuidInReport
            | ErrorCode::ReportParseError
            | ErrorCode::AnnotationParseError
            | ErrorCode::SheetMissing
            | ErrorCode::ReportWriteError
            | ErrorCode::ActionDedupConflict => 3,

            ErrorCode::ReportLocked | ErrorCode::HistoryLocked => 4,
        }
    }

    /// Error category for logging and grouping
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::InternalError
            | ErrorCode::ConfigurationError
            | ErrorCode::Timeout
            | ErrorCode::Cancelled
            | ErrorCode::IoError
            | ErrorCode::SerializationError => "system",

            ErrorCode::HistoryConnectionError
            | ErrorCode::HistoryConstraintViolation
            | ErrorCode::HistoryTransactionError
            | ErrorCode::HistoryQueryError
            | ErrorCode::SchemaMismatch
            | ErrorCode::HistoryLocked => "history",

            ErrorCode::TargetUnreachable
            | ErrorCode::QueryFailed
            | ErrorCode::VersionDetectionFailed => "collection",

            ErrorCode::UuidCollision
            | ErrorCode::InvalidRowUuid
            | ErrorCode::DuplicateUuidInReport => "identity",

            ErrorCode::ReportLocked
            | ErrorCode::ReportParseError
            | ErrorCode::AnnotationParseError
            | ErrorCode::SheetMissing
            | ErrorCode::ReportWriteError => "report",

            ErrorCode::InvalidInput
            | ErrorCode::MissingRequiredField
            | ErrorCode::ValueOutOfRange
            | ErrorCode::RunNotFound
            | ErrorCode::RunFinalized => "input",

            ErrorCode::ActionDedupConflict => "actions",
        }
    }

    /// Whether the error is recovered in place rather than aborting the
    /// invocation. Recovered errors surface as warnings, not failures.
    pub fn is_recovered(&self) -> bool {
        matches!(
            self,
            ErrorCode::TargetUnreachable
                | ErrorCode::QueryFailed
                | ErrorCode::UuidCollision
                | ErrorCode::DuplicateUuidInReport
                | ErrorCode::AnnotationParseError
                | ErrorCode::ActionDedupConflict
        )
    }

    /// Check if error should be logged at error level
    pub fn should_log_as_error(&self) -> bool {
        !self.is_recovered()
            && !matches!(
                self,
                ErrorCode::InvalidInput
                    | ErrorCode::MissingRequiredField
                    | ErrorCode::ValueOutOfRange
                    | ErrorCode::RunNotFound
            )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
