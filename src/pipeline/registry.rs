//! Pipeline Registry
//!
//! Maps pipeline names to their definitions. Definitions are registered
//! explicitly at startup; an empty or repeated name is rejected.

use crate::pipeline::error::{RegistryError, RegistryResult};
use crate::pipeline::pipeline::PipelineDefinition;
use std::collections::BTreeMap;

/// Name to definition lookup table
#[derive(Debug, Default)]
pub struct PipelineRegistry {
    definitions: BTreeMap<String, PipelineDefinition>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition under its own name
    pub fn register(&mut self, definition: PipelineDefinition) -> RegistryResult<()> {
        let name = definition.name().trim().to_string();
        if name.is_empty() {
            return Err(RegistryError::MissingName);
        }
        if self.definitions.contains_key(&name) {
            return Err(RegistryError::Duplicate { name });
        }

        log::debug!("Registered pipeline '{}'", name);
        self.definitions.insert(name, definition);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> RegistryResult<&PipelineDefinition> {
        self.definitions
            .get(name)
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.definitions.keys().cloned().collect()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &PipelineDefinition> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = PipelineRegistry::new();
        registry
            .register(PipelineDefinition::new("nightly").describe("batch"))
            .unwrap();
        registry.register(PipelineDefinition::new("adhoc")).unwrap();

        assert_eq!(registry.lookup("nightly").unwrap().description(), "batch");
        assert_eq!(registry.names(), vec!["adhoc", "nightly"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_rejects_missing_and_duplicate_names() {
        let mut registry = PipelineRegistry::new();
        assert_eq!(
            registry.register(PipelineDefinition::new("  ")),
            Err(RegistryError::MissingName)
        );

        registry.register(PipelineDefinition::new("nightly")).unwrap();
        assert_eq!(
            registry.register(PipelineDefinition::new("nightly")),
            Err(RegistryError::Duplicate {
                name: "nightly".to_string()
            })
        );
        assert!(registry.names().len() == 1);
    }

    #[test]
    fn test_lookup_unknown_name() {
        let registry = PipelineRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(
            registry.lookup("ghost").unwrap_err(),
            RegistryError::NotFound {
                name: "ghost".to_string()
            }
        );
    }
}
