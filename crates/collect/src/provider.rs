//! Version-aware query selection. Each provider covers one version family
//! and every query it returns must be syntax-valid for every version in
//! that family: the 2008 family avoids `STRING_AGG`, `CONCAT_WS`,
//! `TRY_CAST`, `OFFSET/FETCH` and any DMV introduced after 2008 R2.
//! `SERVERPROPERTY` results are cast to portable types at the query level.

use crate::queries;
use audit_core::{Error, ErrorCode, Result};
use std::sync::Arc;

/// Strategy selecting version-compatible query text per rule.
pub trait QueryProvider: Send + Sync {
    /// Family label for logs and script headers
    fn family(&self) -> &'static str;

    /// The query text for one rule, or `None` when the rule has no query
    /// in this family.
    fn query(&self, rule_id: &str) -> Option<&'static str>;
}

/// SQL Server 2008 / 2008 R2 (version_major = 10)
pub struct Sql2008Provider;

impl QueryProvider for Sql2008Provider {
    fn family(&self) -> &'static str {
        "sql2008"
    }

    fn query(&self, rule_id: &str) -> Option<&'static str> {
        queries::sql2008::query(rule_id)
    }
}

/// SQL Server 2012 and later, including 2019/2022 (version_major >= 11)
pub struct Sql2019PlusProvider;

impl QueryProvider for Sql2019PlusProvider {
    fn family(&self) -> &'static str {
        "sql2019plus"
    }

    fn query(&self, rule_id: &str) -> Option<&'static str> {
        queries::sql2019::query(rule_id)
    }
}

/// Select the provider for a detected major version. New families (Azure,
/// 2022-specific) register here without changing callers.
pub fn provider_for(version_major: u32) -> Result<Arc<dyn QueryProvider>> {
    match version_major {
        10 => Ok(Arc::new(Sql2008Provider)),
        v if v >= 11 => Ok(Arc::new(Sql2019PlusProvider)),
        v => Err(Error::new(
            ErrorCode::VersionDetectionFailed,
            format!("unsupported SQL Server major version {v}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_core::rules::catalog;

    #[test]
    fn test_family_selection() {
        assert_eq!(provider_for(10).unwrap().family(), "sql2008");
        assert_eq!(provider_for(11).unwrap().family(), "sql2019plus");
        assert_eq!(provider_for(15).unwrap().family(), "sql2019plus");
        assert_eq!(provider_for(16).unwrap().family(), "sql2019plus");
        assert!(provider_for(9).is_err());
    }

    #[test]
    fn test_every_rule_has_a_query_in_both_families() {
        let families: [&dyn QueryProvider; 2] = [&Sql2008Provider, &Sql2019PlusProvider];
        for provider in families {
            for rule in catalog().all() {
                assert!(
                    provider.query(rule.id).is_some(),
                    "rule {} has no {} query",
                    rule.id,
                    provider.family()
                );
            }
        }
    }

    #[test]
    fn test_2008_family_avoids_forbidden_constructs() {
        for rule in catalog().all() {
            let sql = Sql2008Provider.query(rule.id).unwrap().to_uppercase();
            for forbidden in ["STRING_AGG", "CONCAT_WS", "TRY_CAST", "OFFSET", "FETCH NEXT"] {
                assert!(
                    !sql.contains(forbidden),
                    "rule {} 2008 query uses {}",
                    rule.id,
                    forbidden
                );
            }
        }
    }
}
