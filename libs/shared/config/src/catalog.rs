//! Field-mapping and resolution-rule catalogs: immutable once loaded, swapped
//! atomically on reload (§3 "Ownership & lifecycle", §6 `field_mapping_path` /
//! `resolution_rules_path`).

use crate::error::ConfigError;
use crate::settings::load_yaml;
use arc_swap::ArcSwap;
use cama_sync_models::{FieldMappingCatalog, ResolutionRule};
use std::sync::Arc;
use tracing::info;

pub struct CatalogStore {
    field_mappings: ArcSwap<FieldMappingCatalog>,
    resolution_rules: ArcSwap<Vec<ResolutionRule>>,
    field_mapping_path: Option<String>,
    resolution_rules_path: Option<String>,
}

impl CatalogStore {
    /// Loads both catalogs once at startup. A missing path is not an error —
    /// the catalog is simply empty and the transformer/resolver fall back to
    /// their built-in defaults for every field.
    pub fn load(field_mapping_path: Option<String>, resolution_rules_path: Option<String>) -> Result<Self, ConfigError> {
        let field_mappings = match &field_mapping_path {
            Some(path) => load_yaml(path)?,
            None => FieldMappingCatalog::default(),
        };
        let resolution_rules = match &resolution_rules_path {
            Some(path) => load_yaml(path)?,
            None => Vec::new(),
        };

        Ok(Self {
            field_mappings: ArcSwap::from_pointee(field_mappings),
            resolution_rules: ArcSwap::from_pointee(resolution_rules),
            field_mapping_path,
            resolution_rules_path,
        })
    }

    pub fn field_mappings(&self) -> Arc<FieldMappingCatalog> {
        self.field_mappings.load_full()
    }

    pub fn resolution_rules(&self) -> Arc<Vec<ResolutionRule>> {
        self.resolution_rules.load_full()
    }

    /// Re-reads both catalog files from disk and swaps them in atomically.
    /// In-flight jobs keep the `Arc` they already hold; only new lookups see
    /// the reloaded catalog.
    pub fn reload(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.field_mapping_path {
            let catalog: FieldMappingCatalog = load_yaml(path)?;
            self.field_mappings.store(Arc::new(catalog));
            info!(path, "field mapping catalog reloaded");
        }
        if let Some(path) = &self.resolution_rules_path {
            let rules: Vec<ResolutionRule> = load_yaml(path)?;
            self.resolution_rules.store(Arc::new(rules));
            info!(path, "resolution rule catalog reloaded");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_paths_yield_empty_catalogs() {
        let store = CatalogStore::load(None, None).unwrap();
        assert!(store.field_mappings().entities.is_empty());
        assert!(store.resolution_rules().is_empty());
    }

    #[test]
    fn reload_picks_up_file_changes() {
        let mut mapping_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(mapping_file, "entities: {{}}").unwrap();
        let path = mapping_file.path().to_str().unwrap().to_string();

        let store = CatalogStore::load(Some(path.clone()), None).unwrap();
        assert!(store.field_mappings().entities.is_empty());

        let yaml = "entities:\n  property:\n    entity_type: property\n    fields: []\n";
        std::fs::write(&path, yaml).unwrap();
        store.reload().unwrap();
        assert!(store.field_mappings().entities.contains_key("property"));
    }
}
