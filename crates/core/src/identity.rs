//! Row identity: 8-hex-char row ids minted once per entity and stable
//! across runs, bridged to the composite-key world in one place.
//!
//! Composite keys are the only identity the database knows at collection
//! time; row ids are the only identity that survives schema drift in the
//! report. Both stay; this module is the bridge.

use crate::error::{Error, ErrorCode, Result};
use crate::model::{fact::CompositeKey, EntityKind};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// An 8-character lowercase hexadecimal row identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowUuid(String);

impl RowUuid {
    /// Parse and normalize a raw value. Casing is folded to lowercase on
    /// every read (Excel likes to autocapitalize); whitespace is trimmed.
    pub fn parse(raw: &str) -> Result<RowUuid> {
        let trimmed = raw.trim().to_lowercase();
        if trimmed.len() != 8 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::new(
                ErrorCode::InvalidRowUuid,
                format!("not an 8-char hex row id: {:?}", raw),
            ));
        }
        Ok(RowUuid(trimmed))
    }

    /// Lenient form for report cells: empty cells yield `None`, malformed
    /// values yield the error so the caller can repair and warn.
    pub fn parse_cell(raw: &str) -> Result<Option<RowUuid>> {
        if raw.trim().is_empty() {
            return Ok(None);
        }
        Self::parse(raw).map(Some)
    }

    pub fn mint<R: Rng>(rng: &mut R) -> RowUuid {
        RowUuid(format!("{:08x}", rng.gen::<u32>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What to do when an entity disappears from the baseline and later
/// resurfaces in a new run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResurfacePolicy {
    /// Mint a fresh id for the resurfaced row (the dominant design)
    #[default]
    NewUuid,
    /// Reuse the id the entity carried before it disappeared
    Reuse,
}

/// Index of known entity identities, split into the baseline tier (entities
/// live in the comparison run) and the historical tier (entities seen in
/// any earlier run or annotation).
#[derive(Debug, Default)]
pub struct KeyIndex {
    baseline: HashMap<(EntityKind, String), RowUuid>,
    historical: HashMap<(EntityKind, String), RowUuid>,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_baseline(&mut self, kind: EntityKind, key: &CompositeKey, uuid: RowUuid) {
        self.baseline.insert((kind, key.canonical()), uuid);
    }

    pub fn insert_historical(&mut self, kind: EntityKind, key: &CompositeKey, uuid: RowUuid) {
        self.historical.insert((kind, key.canonical()), uuid);
    }

    pub fn baseline_uuid(&self, kind: EntityKind, key: &CompositeKey) -> Option<&RowUuid> {
        self.baseline.get(&(kind, key.canonical()))
    }

    pub fn historical_uuid(&self, kind: EntityKind, key: &CompositeKey) -> Option<&RowUuid> {
        self.historical.get(&(kind, key.canonical()))
    }
}

/// Mints and validates row ids. The only component that bridges composite
/// keys and row ids; everything downstream of the diff engine works in row
/// ids alone.
pub struct IdentityService {
    policy: ResurfacePolicy,
    /// Every id ever issued in this history; collision retry checks here.
    used: HashSet<String>,
}

impl IdentityService {
    pub fn new(policy: ResurfacePolicy, existing: impl IntoIterator<Item = RowUuid>) -> Self {
        Self {
            policy,
            used: existing.into_iter().map(|u| u.0).collect(),
        }
    }

    pub fn policy(&self) -> ResurfacePolicy {
        self.policy
    }

    /// Mint an id not present anywhere in the history. Collisions are
    /// regenerated; exhausting the retry budget means the id space is
    /// effectively full, which a fleet of <= 10^6 rows never reaches.
    pub fn mint_unique(&mut self) -> Result<RowUuid> {
        let mut rng = rand::thread_rng();
        for _ in 0..64 {
            let candidate = RowUuid::mint(&mut rng);
            if self.used.insert(candidate.0.clone()) {
                return Ok(candidate);
            }
        }
        Err(Error::new(
            ErrorCode::UuidCollision,
            "exhausted row id regeneration attempts",
        ))
    }

    /// Resolve the id for an observed entity: reuse the baseline id when
    /// the entity is live, consult the resurface policy when it is only in
    /// history, and mint otherwise.
    pub fn resolve(
        &mut self,
        kind: EntityKind,
        key: &CompositeKey,
        index: &KeyIndex,
    ) -> Result<RowUuid> {
        if let Some(existing) = index.baseline_uuid(kind, key) {
            return Ok(existing.clone());
        }
        if self.policy == ResurfacePolicy::Reuse {
            if let Some(historical) = index.historical_uuid(kind, key) {
                return Ok(historical.clone());
            }
        }
        self.mint_unique()
    }

    /// Record an externally-sourced id (report read-back) as used.
    pub fn mark_used(&mut self, uuid: &RowUuid) -> bool {
        self.used.insert(uuid.0.clone())
    }

    pub fn is_used(&self, uuid: &RowUuid) -> bool {
        self.used.contains(&uuid.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(parts: &[&str]) -> CompositeKey {
        CompositeKey::new(parts.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_parse_normalizes_case_and_whitespace() {
        let id = RowUuid::parse("  DEADBEEF ").unwrap();
        assert_eq!(id.as_str(), "deadbeef");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(RowUuid::parse("").is_err());
        assert!(RowUuid::parse("xyz").is_err());
        assert!(RowUuid::parse("deadbeef0").is_err());
        assert!(RowUuid::parse("deadbee_").is_err());
    }

    #[test]
    fn test_parse_cell_distinguishes_empty_from_malformed() {
        assert_eq!(RowUuid::parse_cell("   ").unwrap(), None);
        assert!(RowUuid::parse_cell("DEADBEEF").unwrap().is_some());
        assert!(RowUuid::parse_cell("not-hex!").is_err());
    }

    #[test]
    fn test_mint_is_lowercase_hex() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let id = RowUuid::mint(&mut rng);
            assert_eq!(id.as_str().len(), 8);
            assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
            assert_eq!(id.as_str(), id.as_str().to_lowercase());
        }
    }

    #[test]
    fn test_mint_unique_avoids_collisions() {
        let seed = RowUuid::parse("00000001").unwrap();
        let mut service = IdentityService::new(ResurfacePolicy::NewUuid, vec![seed.clone()]);
        for _ in 0..1000 {
            let fresh = service.mint_unique().unwrap();
            assert_ne!(fresh, seed);
        }
    }

    #[test]
    fn test_resolve_reuses_baseline_identity() {
        let mut index = KeyIndex::new();
        let login_key = key(&["PROD1", "MSSQLSERVER", "rogue_admin"]);
        let existing = RowUuid::parse("0badf00d").unwrap();
        index.insert_baseline(EntityKind::Login, &login_key, existing.clone());

        let mut service = IdentityService::new(ResurfacePolicy::NewUuid, vec![existing.clone()]);
        let resolved = service
            .resolve(EntityKind::Login, &login_key, &index)
            .unwrap();
        assert_eq!(resolved, existing);
    }

    #[test]
    fn test_resolve_resurfaced_row_follows_policy() {
        let mut index = KeyIndex::new();
        let login_key = key(&["PROD1", "MSSQLSERVER", "old_timer"]);
        let historical = RowUuid::parse("cafe0001").unwrap();
        index.insert_historical(EntityKind::Login, &login_key, historical.clone());

        let mut minting = IdentityService::new(ResurfacePolicy::NewUuid, vec![historical.clone()]);
        let minted = minting.resolve(EntityKind::Login, &login_key, &index).unwrap();
        assert_ne!(minted, historical);

        let mut reusing = IdentityService::new(ResurfacePolicy::Reuse, vec![historical.clone()]);
        let reused = reusing.resolve(EntityKind::Login, &login_key, &index).unwrap();
        assert_eq!(reused, historical);
    }
}
