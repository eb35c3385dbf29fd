//! Rule query texts per version family. Queries shared by both families
//! live in `common`; the family modules add their version-specific
//! variants and the rule-id dispatch.

mod common;
pub mod sql2008;
pub mod sql2019;
