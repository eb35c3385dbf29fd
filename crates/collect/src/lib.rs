//! Version-aware collection pipeline: query providers per version family,
//! the TDS target driver, the fact normalizer and the bounded-parallel
//! collector.

pub mod collector;
pub mod driver;
pub mod normalize;
pub mod provider;
pub mod queries;

pub use collector::{CollectWarning, CollectionOutcome, Collector, FactSource};
pub use driver::{Credential, RawRow, TargetDriver, TargetSession, TdsDriver};
pub use normalize::FactNormalizer;
pub use provider::{provider_for, QueryProvider, Sql2008Provider, Sql2019PlusProvider};
