//! # Error Handling Framework
//!
//! Structured error management for the auditor:
//!
//! - **Structured Error Types**: categorized error codes for consistent handling
//! - **Rich Context**: error ids, run/target attribution, trace metadata
//! - **Severity Classification**: recovered vs fatal, per spec'd policy
//! - **Exit Code Mapping**: every code maps onto the CLI exit-code contract
//!
//! Recovered errors (unreachable target, failed rule query, regenerated row
//! id, unparseable annotation row) surface as warnings in the action log and
//! never abort a fleet-wide run. Fatal errors abort the current invocation
//! but all history writes are transactional, so the store is never left
//! corrupted.

pub mod codes;
pub mod context;
pub mod framework;

pub use codes::ErrorCode;
pub use context::ErrorContext;
pub use framework::{Error, ErrorCategory, ErrorSeverity, Result};
