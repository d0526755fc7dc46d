//! The pricing registry: an in-memory `technology -> material -> hourly
//! rate` table backed by a JSON file.
//!
//! Mutations take a single lock around the whole
//! read-modify-write-persist sequence, so readers always observe a
//! consistent snapshot and the file on disk always parses back to the
//! in-memory table. Persistence writes a sibling temp file and renames it
//! over the target.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;

use crate::Technology;

/// Hourly rates per material, keyed by canonical material spelling.
pub type MaterialRates = BTreeMap<String, u32>;

/// The full rate table, keyed by canonical technology name.
pub type PriceTable = BTreeMap<String, MaterialRates>;

/// Failures surfaced by registry mutations.
#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    /// POST for a material that already exists (case-insensitive).
    #[error("material {0} already exists")]
    AlreadyExists(String),

    /// PATCH-by-path or DELETE for an unknown material.
    #[error("material {0} not found")]
    NotFound(String),

    /// DELETE aimed at the `default` fallback key.
    #[error("the default material cannot be deleted")]
    ProtectedDefault,

    /// Price was not strictly positive.
    #[error("price must be a positive integer")]
    InvalidPrice,

    /// The table mutated in memory but could not be persisted.
    #[error("failed to persist pricing registry: {0}")]
    Persist(#[source] std::io::Error),
}

/// In-memory pricing registry with synchronous JSON persistence.
pub struct PricingRegistry {
    path: PathBuf,
    table: Mutex<PriceTable>,
}

/// Seed rates in HUF per hour, applied on first start and backfilled under
/// whatever the persisted file is missing.
fn default_table() -> PriceTable {
    let mut fdm = MaterialRates::new();
    fdm.insert("default".to_string(), 800);
    fdm.insert("PLA".to_string(), 800);
    fdm.insert("PETG".to_string(), 900);
    fdm.insert("ABS".to_string(), 950);
    fdm.insert("TPU".to_string(), 1200);

    let mut sla = MaterialRates::new();
    sla.insert("default".to_string(), 1800);
    sla.insert("Standard".to_string(), 1800);
    sla.insert("Tough".to_string(), 2200);

    let mut table = PriceTable::new();
    table.insert(Technology::FDM.as_str().to_string(), fdm);
    table.insert(Technology::SLA.as_str().to_string(), sla);
    table
}

impl PricingRegistry {
    /// Load the registry from `path`, or initialize it from defaults when
    /// the file is absent or unparseable. The merged result is persisted
    /// back so the file and memory agree from the first request on.
    pub fn load(path: &Path) -> Self {
        let table = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<PriceTable>(&raw) {
                Ok(parsed) => merge_over_defaults(parsed),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "pricing registry file is unparseable, falling back to defaults"
                    );
                    default_table()
                }
            },
            Err(_) => default_table(),
        };

        let registry = Self {
            path: path.to_owned(),
            table: Mutex::new(table),
        };
        if let Err(e) = registry.persist_locked(&registry.table.lock()) {
            tracing::warn!(error = %e, "failed to persist pricing registry at startup");
        }
        registry
    }

    /// A deep copy of the full table.
    pub fn get_all(&self) -> PriceTable {
        self.table.lock().clone()
    }

    /// Create a new material. Rejects case-insensitive duplicates and
    /// returns the canonical stored key.
    pub fn create(
        &self,
        technology: Technology,
        material: &str,
        price: u32,
    ) -> Result<String, PricingError> {
        if price == 0 {
            return Err(PricingError::InvalidPrice);
        }
        let mut table = self.table.lock();
        let rates = table.entry(technology.as_str().to_string()).or_default();
        if let Some(existing) = find_key(rates, material) {
            return Err(PricingError::AlreadyExists(existing));
        }
        rates.insert(material.to_string(), price);
        self.persist_locked(&table)?;
        Ok(material.to_string())
    }

    /// Create-or-update a material's price, preserving the canonical
    /// spelling of an existing key. Returns the canonical key and whether
    /// the material was created.
    pub fn update(
        &self,
        technology: Technology,
        material: &str,
        price: u32,
    ) -> Result<(String, bool), PricingError> {
        if price == 0 {
            return Err(PricingError::InvalidPrice);
        }
        let mut table = self.table.lock();
        let rates = table.entry(technology.as_str().to_string()).or_default();
        let (key, created) = match find_key(rates, material) {
            Some(existing) => (existing, false),
            None => (material.to_string(), true),
        };
        rates.insert(key.clone(), price);
        self.persist_locked(&table)?;
        Ok((key, created))
    }

    /// Delete a material. The `default` key is protected to preserve the
    /// fallback chain of [PricingRegistry::rate_for].
    pub fn delete(&self, technology: Technology, material: &str) -> Result<(), PricingError> {
        if material.eq_ignore_ascii_case("default") {
            return Err(PricingError::ProtectedDefault);
        }
        let mut table = self.table.lock();
        let rates = table.entry(technology.as_str().to_string()).or_default();
        let key = find_key(rates, material).ok_or_else(|| PricingError::NotFound(material.to_string()))?;
        rates.remove(&key);
        self.persist_locked(&table)?;
        Ok(())
    }

    /// Hourly rate for `(technology, material)`. Falls back to the first
    /// positive rate for the technology, then to the seeded defaults, then
    /// to 0.
    pub fn rate_for(&self, technology: Technology, material: &str) -> u32 {
        let table = self.table.lock();
        if let Some(rates) = table.get(technology.as_str()) {
            if let Some(key) = find_key(rates, material) {
                return rates[&key];
            }
            if let Some(rate) = rates.values().copied().find(|rate| *rate > 0) {
                return rate;
            }
        }
        default_table()
            .get(technology.as_str())
            .and_then(|rates| rates.values().copied().find(|rate| *rate > 0))
            .unwrap_or(0)
    }

    fn persist_locked(&self, table: &PriceTable) -> Result<(), PricingError> {
        let json = serde_json::to_vec_pretty(table)
            .map_err(|e| PricingError::Persist(std::io::Error::other(e)))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(PricingError::Persist)?;
        std::fs::rename(&tmp, &self.path).map_err(PricingError::Persist)?;
        Ok(())
    }
}

/// Case-insensitive key lookup that returns the canonical stored
/// spelling.
fn find_key(rates: &MaterialRates, material: &str) -> Option<String> {
    rates
        .keys()
        .find(|key| key.eq_ignore_ascii_case(material))
        .cloned()
}

/// Overlay a persisted table onto the defaults: unknown technologies are
/// dropped, missing defaults are backfilled, and non-positive rates are
/// discarded.
fn merge_over_defaults(parsed: PriceTable) -> PriceTable {
    let mut merged = default_table();
    for (technology, rates) in parsed {
        let Some(target) = merged.get_mut(&technology) else {
            continue;
        };
        for (material, price) in rates {
            if price > 0 {
                target.insert(material, price);
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scratch_registry() -> (tempfile::TempDir, PricingRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = PricingRegistry::load(&dir.path().join("pricing.json"));
        (dir, registry)
    }

    #[test]
    fn seeds_defaults_on_first_start() {
        let (_dir, registry) = scratch_registry();
        let table = registry.get_all();
        assert_eq!(table["FDM"]["PETG"], 900);
        assert_eq!(table["SLA"]["Standard"], 1800);
    }

    #[test]
    fn create_is_case_insensitive() {
        let (_dir, registry) = scratch_registry();
        registry.create(Technology::FDM, "ASA", 1200).unwrap();
        let err = registry.create(Technology::FDM, "asa", 1000).unwrap_err();
        assert!(matches!(err, PricingError::AlreadyExists(key) if key == "ASA"));
    }

    #[test]
    fn update_preserves_canonical_spelling() {
        let (_dir, registry) = scratch_registry();
        registry.create(Technology::FDM, "ASA", 1200).unwrap();
        let (key, created) = registry.update(Technology::FDM, "aSa", 950).unwrap();
        assert_eq!(key, "ASA");
        assert!(!created);
        assert_eq!(registry.rate_for(Technology::FDM, "asa"), 950);

        let (key, created) = registry.update(Technology::SLA, "Flexible", 2500).unwrap();
        assert_eq!(key, "Flexible");
        assert!(created);
    }

    #[test]
    fn delete_protects_default() {
        let (_dir, registry) = scratch_registry();
        assert!(matches!(
            registry.delete(Technology::FDM, "Default"),
            Err(PricingError::ProtectedDefault)
        ));
        assert!(matches!(
            registry.delete(Technology::FDM, "nope"),
            Err(PricingError::NotFound(_))
        ));
        registry.create(Technology::FDM, "ASA", 1200).unwrap();
        registry.delete(Technology::FDM, "ASA").unwrap();
        assert!(!registry.get_all()["FDM"].contains_key("ASA"));
    }

    #[test]
    fn rate_for_falls_back() {
        let (_dir, registry) = scratch_registry();
        assert_eq!(registry.rate_for(Technology::FDM, "PETG"), 900);
        // Unknown material: first positive rate for the technology, which
        // is ABS (950) in BTreeMap order.
        assert_eq!(registry.rate_for(Technology::FDM, "unobtainium"), 950);
    }

    #[test]
    fn rate_for_after_create_then_delete() {
        let (_dir, registry) = scratch_registry();
        registry.create(Technology::SLA, "Castable", 2600).unwrap();
        assert_eq!(registry.rate_for(Technology::SLA, "Castable"), 2600);
        registry.delete(Technology::SLA, "Castable").unwrap();
        assert!(registry.rate_for(Technology::SLA, "Castable") > 0);
    }

    #[test]
    fn persisted_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pricing.json");
        {
            let registry = PricingRegistry::load(&path);
            registry.create(Technology::FDM, "ASA", 1200).unwrap();
        }
        let reloaded = PricingRegistry::load(&path);
        assert_eq!(reloaded.rate_for(Technology::FDM, "ASA"), 1200);
    }

    #[test]
    fn unparseable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pricing.json");
        std::fs::write(&path, "{ not json").unwrap();
        let registry = PricingRegistry::load(&path);
        assert_eq!(registry.rate_for(Technology::FDM, "PLA"), 800);
        // The fallback table is re-persisted.
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(serde_json::from_str::<PriceTable>(&raw).is_ok());
    }

    #[test]
    fn unknown_technologies_are_ignored_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pricing.json");
        std::fs::write(&path, r#"{"CNC": {"aluminium": 5000}, "FDM": {"PLA": 850}}"#).unwrap();
        let registry = PricingRegistry::load(&path);
        let table = registry.get_all();
        assert!(!table.contains_key("CNC"));
        assert_eq!(table["FDM"]["PLA"], 850);
        // Missing defaults were backfilled.
        assert_eq!(table["SLA"]["default"], 1800);
    }
}
