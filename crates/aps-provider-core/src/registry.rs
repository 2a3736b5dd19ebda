use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aps_common::{ConfigError, DEFAULT_PRIORITY, DEFAULT_TIMEOUT_SECS, ProviderConfig};
use aps_protocol::ProtocolKind;
use tracing::debug;
use url::Url;

use crate::provider::Provider;

/// Enabled providers, validated and sorted once at startup.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    ordered: Vec<Arc<Provider>>,
    by_name: HashMap<String, usize>,
}

impl ProviderRegistry {
    pub fn load(configs: &[ProviderConfig]) -> Result<Self, ConfigError> {
        let mut providers: Vec<Provider> = Vec::with_capacity(configs.len());

        for (index, config) in configs.iter().enumerate() {
            let name = config.name.trim();
            if name.is_empty() {
                return Err(ConfigError::EmptyName { index });
            }
            if config.enabled == Some(false) {
                debug!(event = "provider_disabled", provider = %name);
                continue;
            }
            if providers.iter().any(|existing| existing.name == name) {
                return Err(ConfigError::DuplicateName(name.to_string()));
            }

            let protocol = match config.protocol.as_deref() {
                None => ProtocolKind::Anthropic,
                Some(raw) => {
                    ProtocolKind::parse(raw).ok_or_else(|| ConfigError::UnsupportedProtocol {
                        provider: name.to_string(),
                        protocol: raw.to_string(),
                    })?
                }
            };

            providers.push(Provider {
                name: name.to_string(),
                protocol,
                base_url: validate_base_url(name, &config.base_url)?,
                api_key: config.api_key.clone(),
                model_map: config.model_map.clone(),
                priority: config.priority.unwrap_or(DEFAULT_PRIORITY),
                position: index,
                cooldown_secs: config.cooldown_seconds,
                timeout: Duration::from_secs(config.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            });
        }

        if providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }

        // Stable: equal priorities keep declaration order.
        providers.sort_by_key(|provider| provider.priority);

        let ordered: Vec<Arc<Provider>> = providers.into_iter().map(Arc::new).collect();
        let by_name = ordered
            .iter()
            .enumerate()
            .map(|(idx, provider)| (provider.name.clone(), idx))
            .collect();
        Ok(Self { ordered, by_name })
    }

    pub fn providers_by_priority(&self) -> &[Arc<Provider>] {
        &self.ordered
    }

    pub fn get(&self, name: &str) -> Option<Arc<Provider>> {
        self.by_name
            .get(name)
            .and_then(|idx| self.ordered.get(*idx))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

fn validate_base_url(provider: &str, raw: &str) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidBaseUrl {
        provider: provider.to_string(),
        url: raw.to_string(),
        reason,
    };
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed).map_err(|err| invalid(err.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", parsed.scheme())));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, priority: Option<i64>) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            base_url: "https://api.example.com".to_string(),
            api_key: "k".to_string(),
            priority,
            ..Default::default()
        }
    }

    #[test]
    fn orders_by_priority_then_declaration() {
        let registry = ProviderRegistry::load(&[
            config("late", None),
            config("b", Some(2)),
            config("a", Some(1)),
            config("b2", Some(2)),
        ])
        .unwrap();
        let names: Vec<&str> = registry
            .providers_by_priority()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b", "b2", "late"]);
        assert_eq!(registry.get("b2").unwrap().priority, 2);
        assert_eq!(registry.get("late").unwrap().priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn protocol_defaults_to_anthropic_and_accepts_claude_alias() {
        let mut openai = config("o", None);
        openai.protocol = Some("OpenAI".to_string());
        let mut claude = config("c", None);
        claude.protocol = Some("claude".to_string());
        let registry = ProviderRegistry::load(&[config("d", None), openai, claude]).unwrap();
        assert_eq!(registry.get("d").unwrap().protocol, ProtocolKind::Anthropic);
        assert_eq!(registry.get("o").unwrap().protocol, ProtocolKind::OpenAI);
        assert_eq!(registry.get("c").unwrap().protocol, ProtocolKind::Anthropic);
    }

    #[test]
    fn rejects_invalid_entries() {
        let mut gemini = config("g", None);
        gemini.protocol = Some("gemini".to_string());
        assert!(matches!(
            ProviderRegistry::load(&[gemini]),
            Err(ConfigError::UnsupportedProtocol { .. })
        ));

        let mut relative = config("r", None);
        relative.base_url = "api.example.com/v1".to_string();
        assert!(matches!(
            ProviderRegistry::load(&[relative]),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));

        let mut ftp = config("f", None);
        ftp.base_url = "ftp://files.example.com".to_string();
        assert!(matches!(
            ProviderRegistry::load(&[ftp]),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));

        assert!(matches!(
            ProviderRegistry::load(&[config("x", None), config("x", Some(1))]),
            Err(ConfigError::DuplicateName(name)) if name == "x"
        ));

        assert!(matches!(
            ProviderRegistry::load(&[config("  ", None)]),
            Err(ConfigError::EmptyName { index: 0 })
        ));
    }

    #[test]
    fn disabled_providers_are_dropped() {
        let mut off = config("x", Some(0));
        off.enabled = Some(false);
        let registry = ProviderRegistry::load(&[off, config("x", Some(1))]).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("x").unwrap().priority, 1);

        let mut only = config("solo", None);
        only.enabled = Some(false);
        assert!(matches!(
            ProviderRegistry::load(&[only]),
            Err(ConfigError::NoProviders)
        ));
    }
}
