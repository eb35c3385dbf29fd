pub mod config;
pub mod error;
pub mod identity;
pub mod model;
pub mod rules;
pub mod stats;
pub mod text;

pub use config::{AuditSettings, AuthKind, Settings, TargetSettings};
pub use error::{Error, ErrorCode, ErrorContext, Result};
pub use identity::{IdentityService, KeyIndex, ResurfacePolicy, RowUuid};
pub use model::{
    Action, Annotation, AnnotationDelta, AnnotationFields, AnnotationState, Attributes, AuditRun,
    ChangeType, CompositeKey, EntityKind, Fact, Observation, RemediationItem, RemediationRun,
    RiskLevel, RunStatus, Status,
};
pub use rules::{catalog, Rule, RuleCatalog};
pub use stats::{StatsService, StatsSnapshot};

// Re-export commonly used types from dependencies
pub use chrono::{DateTime, Utc};
