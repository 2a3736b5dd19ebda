use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::time::Instant;

use crate::provider::Provider;
use crate::registry::ProviderRegistry;

#[derive(Debug, Default)]
struct ProviderHealth {
    /// `None` means "never failed".
    cooldown_until: RwLock<Option<Instant>>,
}

impl ProviderHealth {
    fn until(&self) -> Option<Instant> {
        *self
            .cooldown_until
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set(&self, until: Instant) {
        *self
            .cooldown_until
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(until);
    }
}

/// Per-provider cooldown state.
///
/// The key set is fixed when the tracker is built; each entry has its own lock,
/// so readers and writers for different providers never contend.
#[derive(Debug)]
pub struct HealthTracker {
    entries: HashMap<String, ProviderHealth>,
}

impl HealthTracker {
    pub fn new(registry: &ProviderRegistry) -> Self {
        let entries = registry
            .providers_by_priority()
            .iter()
            .map(|provider| (provider.name.clone(), ProviderHealth::default()))
            .collect();
        Self { entries }
    }

    pub fn eligible_now(&self, providers: &[Arc<Provider>]) -> Vec<Arc<Provider>> {
        self.eligible_at(providers, Instant::now())
    }

    /// Providers whose cooldown has expired at `now`, in input order.
    pub fn eligible_at(&self, providers: &[Arc<Provider>], now: Instant) -> Vec<Arc<Provider>> {
        providers
            .iter()
            .filter(|provider| !self.is_in_cooldown_at(&provider.name, now))
            .cloned()
            .collect()
    }

    /// Overwrites the provider's cooldown expiry. Returns false for unknown names.
    pub fn mark_cooldown(&self, name: &str, until: Instant) -> bool {
        match self.entries.get(name) {
            Some(entry) => {
                entry.set(until);
                true
            }
            None => false,
        }
    }

    pub fn cooldown_until(&self, name: &str) -> Option<Instant> {
        self.entries.get(name).and_then(ProviderHealth::until)
    }

    pub fn is_in_cooldown(&self, name: &str) -> bool {
        self.is_in_cooldown_at(name, Instant::now())
    }

    pub fn is_in_cooldown_at(&self, name: &str, now: Instant) -> bool {
        self.cooldown_until(name).is_some_and(|until| now < until)
    }

    /// Number of providers cooling down right now.
    pub fn cooldown_count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .values()
            .filter(|entry| entry.until().is_some_and(|until| now < until))
            .count()
    }
}
