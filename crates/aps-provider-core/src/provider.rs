use std::collections::BTreeMap;
use std::time::Duration;

use aps_protocol::ProtocolKind;

/// A configured upstream endpoint. Immutable after the registry is loaded.
#[derive(Clone)]
pub struct Provider {
    pub name: String,
    pub protocol: ProtocolKind,
    /// Absolute http(s) URL without a trailing slash.
    pub base_url: String,
    pub(crate) api_key: String,
    pub model_map: BTreeMap<String, String>,
    pub priority: i64,
    /// Position in the config file; breaks priority ties.
    pub position: usize,
    /// Overrides the global default cooldown.
    pub cooldown_secs: Option<u64>,
    pub timeout: Duration,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("protocol", &self.protocol)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model_map", &self.model_map)
            .field("priority", &self.priority)
            .field("position", &self.position)
            .field("cooldown_secs", &self.cooldown_secs)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Provider {
    /// Provider model for `client_model`; unmapped names pass through unchanged.
    pub fn map_model<'a>(&'a self, client_model: &'a str) -> &'a str {
        self.model_map
            .get(client_model)
            .map(String::as_str)
            .unwrap_or(client_model)
    }

    pub fn default_cooldown_secs(&self, global_default: u64) -> u64 {
        self.cooldown_secs.unwrap_or(global_default)
    }

    /// Full URL of this provider's generation endpoint.
    ///
    /// `https://h`, `https://h/v1` and `https://h/v1/messages` all resolve to
    /// `https://h/v1/messages`; a base ending in another version segment such as
    /// `/api/v4` keeps it and only gains the resource path.
    pub fn endpoint_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = self.protocol.endpoint_path();
        if base.ends_with(path) {
            return base.to_string();
        }
        let resource = path.strip_prefix("/v1").unwrap_or(path);
        match base.rsplit_once('/') {
            Some((_, last)) if is_version_segment(last) => format!("{base}{resource}"),
            _ => format!("{base}{path}"),
        }
    }
}

fn is_version_segment(segment: &str) -> bool {
    segment
        .strip_prefix('v')
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn provider(protocol: ProtocolKind, base_url: &str) -> Provider {
        Provider {
            name: "p".to_string(),
            protocol,
            base_url: base_url.to_string(),
            api_key: "sk-live-123".to_string(),
            model_map: BTreeMap::from([("claude-opus".to_string(), "glm-4.6".to_string())]),
            priority: 1,
            position: 0,
            cooldown_secs: None,
            timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn endpoint_url_joins_without_duplicating_segments() {
        let cases = [
            (ProtocolKind::Anthropic, "https://api.anthropic.com", "https://api.anthropic.com/v1/messages"),
            (ProtocolKind::Anthropic, "https://proxy.dev/v1/", "https://proxy.dev/v1/messages"),
            (ProtocolKind::Anthropic, "https://proxy.dev/api/v1/messages", "https://proxy.dev/api/v1/messages"),
            (ProtocolKind::OpenAI, "https://api.openai.com/v1", "https://api.openai.com/v1/chat/completions"),
            (ProtocolKind::OpenAI, "https://open.bigmodel.cn/api/paas/v4", "https://open.bigmodel.cn/api/paas/v4/chat/completions"),
            (ProtocolKind::OpenAI, "https://host/openai", "https://host/openai/v1/chat/completions"),
        ];
        for (protocol, base, expected) in cases {
            assert_eq!(provider(protocol, base).endpoint_url(), expected, "{base}");
        }
    }

    #[test]
    fn model_map_falls_back_to_client_model() {
        let p = provider(ProtocolKind::OpenAI, "https://h");
        assert_eq!(p.map_model("claude-opus"), "glm-4.6");
        assert_eq!(p.map_model("claude-haiku"), "claude-haiku");
    }

    #[test]
    fn debug_never_prints_the_key() {
        let p = provider(ProtocolKind::OpenAI, "https://h");
        assert!(!format!("{p:?}").contains("sk-live-123"));
    }
}
