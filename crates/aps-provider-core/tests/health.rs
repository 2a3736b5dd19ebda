use std::time::Duration;

use aps_common::ProviderConfig;
use aps_provider_core::{HealthTracker, ProviderRegistry};
use tokio::time::Instant;

fn registry(names: &[&str]) -> ProviderRegistry {
    let configs: Vec<ProviderConfig> = names
        .iter()
        .enumerate()
        .map(|(idx, name)| ProviderConfig {
            name: name.to_string(),
            base_url: format!("https://{name}.example.com"),
            api_key: "k".to_string(),
            priority: Some(idx as i64),
            ..Default::default()
        })
        .collect();
    ProviderRegistry::load(&configs).unwrap()
}

fn names(providers: &[std::sync::Arc<aps_provider_core::Provider>]) -> Vec<&str> {
    providers.iter().map(|p| p.name.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn cooldown_excludes_until_expiry() {
    let registry = registry(&["a", "b", "c"]);
    let health = HealthTracker::new(&registry);
    let until = Instant::now() + Duration::from_secs(30);
    assert!(health.mark_cooldown("b", until));

    let all = registry.providers_by_priority();
    assert_eq!(names(&health.eligible_now(all)), vec!["a", "c"]);
    assert!(health.is_in_cooldown("b"));

    let just_before = until - Duration::from_millis(1);
    assert_eq!(names(&health.eligible_at(all, just_before)), vec!["a", "c"]);
    assert_eq!(names(&health.eligible_at(all, until)), vec!["a", "b", "c"]);

    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(!health.is_in_cooldown("b"));
    assert_eq!(names(&health.eligible_now(all)), vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn mark_overwrites_instead_of_extending() {
    let registry = registry(&["a"]);
    let health = HealthTracker::new(&registry);
    let now = Instant::now();

    health.mark_cooldown("a", now + Duration::from_secs(300));
    health.mark_cooldown("a", now + Duration::from_secs(10));
    assert_eq!(health.cooldown_until("a"), Some(now + Duration::from_secs(10)));

    tokio::time::advance(Duration::from_secs(11)).await;
    assert!(!health.is_in_cooldown("a"));
}

#[tokio::test(start_paused = true)]
async fn counts_only_active_cooldowns() {
    let registry = registry(&["a", "b", "c"]);
    let health = HealthTracker::new(&registry);
    let now = Instant::now();
    assert_eq!(health.cooldown_count(), 0);

    health.mark_cooldown("a", now + Duration::from_secs(5));
    health.mark_cooldown("c", now + Duration::from_secs(60));
    assert_eq!(health.cooldown_count(), 2);
    assert!(!health.mark_cooldown("unknown", now + Duration::from_secs(5)));

    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(health.cooldown_count(), 1);
}

#[tokio::test]
async fn eligibility_preserves_input_order() {
    let registry = registry(&["a", "b", "c", "d"]);
    let health = HealthTracker::new(&registry);
    let mut reversed = registry.providers_by_priority().to_vec();
    reversed.reverse();
    health.mark_cooldown("c", Instant::now() + Duration::from_secs(60));
    assert_eq!(names(&health.eligible_now(&reversed)), vec!["d", "b", "a"]);
}
