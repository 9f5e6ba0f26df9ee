//! Named provider registry.
//!
//! Model specs are `provider/model` strings; a bare `model` resolves
//! against the default provider.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::traits::LlmProvider;

pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn LlmProvider>>>,
    default_id: RwLock<Option<String>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            default_id: RwLock::new(None),
        }
    }

    /// Register a provider. The first registration becomes the default.
    pub fn register(&self, provider: Arc<dyn LlmProvider>) {
        let id = provider.provider_id().to_owned();
        let mut providers = self.providers.write();
        let mut default_id = self.default_id.write();
        if default_id.is_none() {
            *default_id = Some(id.clone());
        }
        providers.insert(id, provider);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.read().get(provider_id).cloned()
    }

    pub fn default_provider(&self) -> Option<Arc<dyn LlmProvider>> {
        let id = self.default_id.read().clone()?;
        self.get(&id)
    }

    pub fn set_default(&self, provider_id: &str) -> bool {
        if self.providers.read().contains_key(provider_id) {
            *self.default_id.write() = Some(provider_id.to_owned());
            true
        } else {
            false
        }
    }

    /// Resolve a `provider/model` spec (or bare model, or nothing) to a
    /// provider and optional model override.
    pub fn resolve(&self, spec: Option<&str>) -> Option<(Arc<dyn LlmProvider>, Option<String>)> {
        match spec {
            Some(spec) => {
                if let Some((provider_id, model)) = spec.split_once('/') {
                    if let Some(p) = self.get(provider_id) {
                        return Some((p, Some(model.to_owned())));
                    }
                }
                // Bare model name on the default provider.
                self.default_provider().map(|p| (p, Some(spec.to_owned())))
            }
            None => self.default_provider().map(|p| (p, None)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedProvider;

    #[test]
    fn first_registration_is_default() {
        let reg = ProviderRegistry::new();
        reg.register(Arc::new(ScriptedProvider::named("alpha")));
        reg.register(Arc::new(ScriptedProvider::named("beta")));
        assert_eq!(reg.default_provider().unwrap().provider_id(), "alpha");
    }

    #[test]
    fn resolve_provider_slash_model() {
        let reg = ProviderRegistry::new();
        reg.register(Arc::new(ScriptedProvider::named("alpha")));
        let (p, model) = reg.resolve(Some("alpha/fast-1")).unwrap();
        assert_eq!(p.provider_id(), "alpha");
        assert_eq!(model.as_deref(), Some("fast-1"));
    }

    #[test]
    fn resolve_bare_model_uses_default() {
        let reg = ProviderRegistry::new();
        reg.register(Arc::new(ScriptedProvider::named("alpha")));
        let (p, model) = reg.resolve(Some("fast-1")).unwrap();
        assert_eq!(p.provider_id(), "alpha");
        assert_eq!(model.as_deref(), Some("fast-1"));
    }

    #[test]
    fn resolve_none_on_empty_registry() {
        let reg = ProviderRegistry::new();
        assert!(reg.resolve(None).is_none());
    }
}
