//! Target adapter registry
//!
//! In-memory registry for storing and retrieving target-system adapters by
//! slug. Built once at startup from configuration; tests register their own
//! in-memory adapters.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::adapters::trait_::TargetAdapter;
use crate::adapters::{NetSuiteAdapter, ShopifyAdapter};
use crate::config::AppConfig;

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Target '{slug}' not found")]
    TargetNotFound { slug: String },
}

/// Registry of target-system adapters keyed by slug
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn TargetAdapter>>,
}

impl AdapterRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Build a registry from configuration, registering each adapter whose
    /// credentials are present.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new();

        if let (Some(base), Some(token)) = (&config.netsuite_api_base, &config.netsuite_token) {
            match NetSuiteAdapter::new(base, token.clone()) {
                Ok(adapter) => registry.register(Arc::new(adapter)),
                Err(err) => warn!("NetSuite adapter not registered: invalid API base: {}", err),
            }
        } else {
            warn!("NetSuite adapter not registered: missing API base or token");
        }

        if let (Some(base), Some(token)) = (&config.shopify_api_base, &config.shopify_token) {
            match ShopifyAdapter::new(base, token.clone()) {
                Ok(adapter) => registry.register(Arc::new(adapter)),
                Err(err) => warn!("Shopify adapter not registered: invalid API base: {}", err),
            }
        } else {
            warn!("Shopify adapter not registered: missing API base or token");
        }

        registry
    }

    /// Register an adapter under its slug
    pub fn register(&mut self, adapter: Arc<dyn TargetAdapter>) {
        self.adapters.insert(adapter.slug().to_string(), adapter);
    }

    /// Get an adapter by slug
    pub fn get(&self, slug: &str) -> Result<Arc<dyn TargetAdapter>, RegistryError> {
        self.adapters
            .get(slug)
            .cloned()
            .ok_or_else(|| RegistryError::TargetNotFound {
                slug: slug.to_string(),
            })
    }

    /// Registered slugs, sorted for stable ordering
    pub fn slugs(&self) -> Vec<String> {
        let mut slugs: Vec<_> = self.adapters.keys().cloned().collect();
        slugs.sort();
        slugs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::trait_::{AdapterError, TargetState};
    use async_trait::async_trait;
    use serde_json::Value as JsonValue;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    struct NullAdapter;

    #[async_trait]
    impl TargetAdapter for NullAdapter {
        fn slug(&self) -> &'static str {
            "null"
        }

        async fn fetch(
            &self,
            _tenant_id: Uuid,
            _external_id: &str,
        ) -> Result<Option<TargetState>, AdapterError> {
            Ok(None)
        }

        async fn write(
            &self,
            _tenant_id: Uuid,
            _external_id: &str,
            _fields: &BTreeMap<String, JsonValue>,
        ) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_unknown_target() {
        let registry = AdapterRegistry::new();

        let result = registry.get("unknown");
        assert!(result.is_err());
        if let Err(RegistryError::TargetNotFound { slug }) = result {
            assert_eq!(slug, "unknown");
        } else {
            panic!("Expected TargetNotFound error");
        }
    }

    #[test]
    fn test_registry_known_target() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(NullAdapter));

        assert!(registry.get("null").is_ok());
        assert_eq!(registry.slugs(), vec!["null".to_string()]);
    }

    #[test]
    fn test_from_config_skips_unconfigured_targets() {
        let config = AppConfig::default();
        let registry = AdapterRegistry::from_config(&config);
        assert!(registry.slugs().is_empty());
    }
}
