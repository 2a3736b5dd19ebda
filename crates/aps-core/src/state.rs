use std::sync::Arc;

use aps_common::{AppConfig, ConfigError};
use aps_provider_core::{CooldownPolicy, HealthTracker, ProviderRegistry};

/// Process-wide routing state shared by every request.
pub struct AppState {
    pub registry: Arc<ProviderRegistry>,
    pub health: Arc<HealthTracker>,
    /// Cooldowns for failures without a retry hint.
    pub cooldown: CooldownPolicy,
}

impl AppState {
    pub fn new(registry: ProviderRegistry, cooldown: CooldownPolicy) -> Self {
        let health = HealthTracker::new(&registry);
        Self {
            registry: Arc::new(registry),
            health: Arc::new(health),
            cooldown,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let registry = ProviderRegistry::load(&config.providers)?;
        Ok(Self::new(
            registry,
            CooldownPolicy::from_config(&config.failover),
        ))
    }
}
