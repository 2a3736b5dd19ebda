//! Cooldown derivation for failed upstream responses.
//!
//! Order of precedence:
//! 1. a machine-readable retry hint in a 429 JSON body,
//! 2. the `Retry-After` header (delta seconds or HTTP-date),
//! 3. a human-readable hint in a 429 error message ("try again in 20s"),
//! 4. the configured fallback for the status (see [`CooldownPolicy`]).
//!
//! Hints are clamped to [`MAX_COOLDOWN`]; unparseable hints are ignored.

use std::sync::LazyLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aps_common::{
    DEFAULT_COOLDOWN_403_SECS, DEFAULT_COOLDOWN_429_SECS, DEFAULT_COOLDOWN_SECS, FailoverConfig,
};
use regex::Regex;
use serde_json::Value;

use crate::headers::{Headers, header_get};
use crate::provider::Provider;

pub const MAX_COOLDOWN: Duration = Duration::from_secs(60 * 60);

/// Cooldowns used when a failure carries no usable retry hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub default_secs: u64,
    pub rate_limited_secs: u64,
    pub forbidden_secs: u64,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            default_secs: DEFAULT_COOLDOWN_SECS,
            rate_limited_secs: DEFAULT_COOLDOWN_429_SECS,
            forbidden_secs: DEFAULT_COOLDOWN_403_SECS,
        }
    }
}

impl CooldownPolicy {
    pub fn from_config(config: &FailoverConfig) -> Self {
        Self {
            default_secs: config.cooldown_seconds,
            rate_limited_secs: config.cooldown_429_seconds,
            forbidden_secs: config.cooldown_403_seconds,
        }
    }

    /// Fallback for `status` (`None` for failures without a response).
    ///
    /// A provider's own `cooldown_seconds` replaces only the generic default;
    /// 429 and 403 keep their dedicated values.
    pub fn fallback_secs(&self, provider: &Provider, status: Option<u16>) -> u64 {
        match status {
            Some(429) => self.rate_limited_secs,
            Some(403) => self.forbidden_secs,
            _ => provider.default_cooldown_secs(self.default_secs),
        }
    }
}

static TEXT_HINT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:try again|retry|wait|reset|available)\D{0,30}?(\d+(?:\.\d+)?)\s*(milliseconds?|ms|seconds?|secs?|s|minutes?|mins?|m|hours?|hrs?|h)\b",
    )
    .ok()
});

pub fn derive_cooldown(status: u16, headers: &Headers, body: &[u8], default_secs: u64) -> Duration {
    derive_cooldown_at(status, headers, body, default_secs, SystemTime::now())
}

/// [`derive_cooldown`] with an explicit wall clock for absolute timestamps.
pub fn derive_cooldown_at(
    status: u16,
    headers: &Headers,
    body: &[u8],
    default_secs: u64,
    now: SystemTime,
) -> Duration {
    let rate_limited = status == 429;

    if rate_limited && let Some(hint) = json_hint(body, now) {
        return hint.min(MAX_COOLDOWN);
    }
    if let Some(hint) = retry_after_header(headers, now) {
        return hint.min(MAX_COOLDOWN);
    }
    if rate_limited && let Some(hint) = text_hint(body) {
        return hint.min(MAX_COOLDOWN);
    }
    Duration::from_secs(default_secs)
}

fn retry_after_header(headers: &Headers, now: SystemTime) -> Option<Duration> {
    let value = header_get(headers, "retry-after")?.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = httpdate::parse_http_date(value).ok()?;
    Some(when.duration_since(now).unwrap_or(Duration::ZERO))
}

fn json_hint(body: &[u8], now: SystemTime) -> Option<Duration> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let error = value.get("error");

    for scope in [Some(&value), error].into_iter().flatten() {
        if let Some(secs) = scope.get("retry_after").and_then(number_like) {
            return seconds(secs);
        }
        if let Some(secs) = scope.get("retry_after_seconds").and_then(number_like) {
            return seconds(secs);
        }
        if let Some(ms) = scope.get("retry_after_ms").and_then(number_like) {
            return seconds(ms / 1000.0);
        }
    }

    if let Some(details) = error
        .and_then(|error| error.get("details"))
        .and_then(Value::as_array)
    {
        for detail in details {
            if let Some(delay) = detail.get("retryDelay").and_then(Value::as_str)
                && let Some(parsed) = parse_delay_string(delay)
            {
                return Some(parsed);
            }
        }
    }

    for scope in [Some(&value), error].into_iter().flatten() {
        if let Some(reset_at) = scope.get("reset_at").and_then(number_like) {
            let reset_at = Duration::try_from_secs_f64(reset_at).ok()?;
            let now = now.duration_since(UNIX_EPOCH).ok()?;
            return Some(reset_at.saturating_sub(now));
        }
    }
    None
}

fn number_like(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn seconds(value: f64) -> Option<Duration> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(value.min(MAX_COOLDOWN.as_secs_f64() * 2.0)))
}

/// Protobuf-style durations such as `"30s"` or `"1.5s"`.
fn parse_delay_string(raw: &str) -> Option<Duration> {
    let number = raw.trim().strip_suffix('s')?;
    seconds(number.trim().parse::<f64>().ok()?)
}

fn text_hint(body: &[u8]) -> Option<Duration> {
    let text = String::from_utf8_lossy(body);
    let regex = TEXT_HINT.as_ref()?;
    let captures = regex.captures(&text)?;
    let amount: f64 = captures.get(1)?.as_str().parse().ok()?;
    let unit = captures.get(2)?.as_str().to_ascii_lowercase();
    let factor = match unit.as_str() {
        "ms" | "millisecond" | "milliseconds" => 0.001,
        "m" | "min" | "mins" | "minute" | "minutes" => 60.0,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3600.0,
        _ => 1.0,
    };
    seconds(amount * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(retry_after: Option<&str>) -> Headers {
        retry_after
            .map(|value| vec![("Retry-After".to_string(), value.to_string())])
            .unwrap_or_default()
    }

    #[test]
    fn body_hint_beats_header() {
        let body = br#"{"error":{"type":"rate_limit_error","retry_after":30}}"#;
        let got = derive_cooldown(429, &headers(Some("60")), body, 300);
        assert_eq!(got, Duration::from_secs(30));
    }

    #[test]
    fn header_alone_is_used() {
        let got = derive_cooldown(429, &headers(Some("60")), b"{}", 300);
        assert_eq!(got, Duration::from_secs(60));
    }

    #[test]
    fn falls_back_to_default() {
        assert_eq!(
            derive_cooldown(503, &Vec::new(), b"oops", 45),
            Duration::from_secs(45)
        );
    }

    #[test]
    fn json_hint_only_applies_to_rate_limits() {
        let body = br#"{"retry_after":5}"#;
        assert_eq!(
            derive_cooldown(503, &Vec::new(), body, 45),
            Duration::from_secs(45)
        );
        assert_eq!(
            derive_cooldown(503, &headers(Some("7")), body, 45),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn reads_millisecond_and_google_style_hints() {
        let ms = br#"{"error":{"retry_after_ms":"2500"}}"#;
        assert_eq!(
            derive_cooldown(429, &Vec::new(), ms, 60),
            Duration::from_millis(2500)
        );

        let google = br#"{"error":{"code":429,"details":[{"@type":"type.googleapis.com/google.rpc.QuotaFailure"},{"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"17s"}]}}"#;
        assert_eq!(
            derive_cooldown(429, &Vec::new(), google, 60),
            Duration::from_secs(17)
        );
    }

    #[test]
    fn reset_timestamp_is_relative_to_now() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let body = br#"{"error":{"reset_at":1700000090}}"#;
        assert_eq!(
            derive_cooldown_at(429, &Vec::new(), body, 60, now),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn http_date_header() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let later = httpdate::fmt_http_date(now + Duration::from_secs(120));
        assert_eq!(
            derive_cooldown_at(503, &headers(Some(&later)), b"", 60, now),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn text_hints_in_rate_limit_messages() {
        let seconds = br#"{"error":{"message":"Rate limit reached. Please try again in 20s."}}"#;
        assert_eq!(
            derive_cooldown(429, &Vec::new(), seconds, 60),
            Duration::from_secs(20)
        );
        let minutes = b"quota exhausted, retry after 2 minutes";
        assert_eq!(
            derive_cooldown(429, &Vec::new(), minutes, 60),
            Duration::from_secs(120)
        );
        assert_eq!(
            derive_cooldown(500, &Vec::new(), seconds, 60),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn fallback_depends_on_status() {
        let policy = CooldownPolicy {
            default_secs: 45,
            rate_limited_secs: 300,
            forbidden_secs: 3600,
        };
        let mut provider = crate::provider::tests::provider(
            aps_protocol::ProtocolKind::Anthropic,
            "https://h",
        );
        assert_eq!(policy.fallback_secs(&provider, Some(429)), 300);
        assert_eq!(policy.fallback_secs(&provider, Some(403)), 3600);
        assert_eq!(policy.fallback_secs(&provider, Some(503)), 45);
        assert_eq!(policy.fallback_secs(&provider, None), 45);

        provider.cooldown_secs = Some(10);
        assert_eq!(policy.fallback_secs(&provider, Some(500)), 10);
        assert_eq!(policy.fallback_secs(&provider, Some(403)), 3600);

        let forbidden = policy.fallback_secs(&provider, Some(403));
        assert_eq!(
            derive_cooldown(403, &Vec::new(), b"{}", forbidden),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn hints_are_clamped_and_garbage_ignored() {
        let huge = br#"{"retry_after":86400}"#;
        assert_eq!(derive_cooldown(429, &Vec::new(), huge, 60), MAX_COOLDOWN);
        assert_eq!(
            derive_cooldown(429, &headers(Some("7200")), b"", 60),
            MAX_COOLDOWN
        );
        assert_eq!(
            derive_cooldown(429, &headers(Some("soon")), br#"{"retry_after":"later"}"#, 60),
            Duration::from_secs(60)
        );
    }
}
