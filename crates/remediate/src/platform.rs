use audit_core::{EntityKind, Fact};

/// Host platform of one target instance, probed from its instance fact.
/// Targets that never reported a platform are assumed Windows (the 2008
/// family predates SQL Server on Linux entirely).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Windows,
    Linux,
}

/// Probe the platform for a (server, instance) pair from the run's facts.
pub fn target_platform(facts: &[Fact], server: &str, instance: &str) -> HostPlatform {
    let platform = facts
        .iter()
        .find(|f| {
            f.entity_kind == EntityKind::Instance
                && f.composite_key.parts().first().map(String::as_str) == Some(server)
                && f.composite_key.parts().get(1).map(String::as_str) == Some(instance)
        })
        .and_then(|f| f.attributes.get("host_platform"))
        .and_then(|v| v.as_str());

    match platform {
        Some(p) if p.eq_ignore_ascii_case("linux") => HostPlatform::Linux,
        _ => HostPlatform::Windows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_core::{CompositeKey, RiskLevel, RowUuid, Status};
    use chrono::Utc;

    fn instance_fact(server: &str, platform: Option<&str>) -> Fact {
        let mut attributes = audit_core::Attributes::new();
        if let Some(p) = platform {
            attributes.insert("host_platform".into(), serde_json::json!(p));
        }
        Fact {
            run_id: 1,
            row_uuid: RowUuid::parse("00000001").unwrap(),
            entity_kind: EntityKind::Instance,
            composite_key: CompositeKey::new(vec![server.into(), "MSSQLSERVER".into()]),
            attributes,
            status: Status::Info,
            rule_id: "INST-001".into(),
            risk_level: RiskLevel::Low,
            collected_at: Utc::now(),
        }
    }

    #[test]
    fn test_platform_probe() {
        let facts = vec![instance_fact("LNX1", Some("Linux"))];
        assert_eq!(target_platform(&facts, "LNX1", "MSSQLSERVER"), HostPlatform::Linux);
        assert_eq!(
            target_platform(&facts, "UNKNOWN", "MSSQLSERVER"),
            HostPlatform::Windows
        );
    }

    #[test]
    fn test_missing_platform_defaults_to_windows() {
        let facts = vec![instance_fact("PROD1", None)];
        assert_eq!(
            target_platform(&facts, "PROD1", "MSSQLSERVER"),
            HostPlatform::Windows
        );
    }
}
