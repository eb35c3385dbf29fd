//! Exception-aware, aggressiveness-tiered remediation script synthesis
//! with rollback metadata.

pub mod generator;
pub mod platform;
pub mod templates;

pub use generator::{GeneratedScripts, RemediationGenerator, ScriptFile};
pub use platform::{target_platform, HostPlatform};
pub use templates::{FixScript, ScriptKind};
