// src/health/registry.rs
use crate::proxy::{Backend, BackendSet};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Health flags of the configured backends plus the round-robin cursor.
///
/// A single lock covers both, so a selection scan and its cursor advance are
/// one atomic step with respect to other selections and to probe writes.
/// The lock is never held across network I/O.
#[derive(Debug)]
pub struct HealthRegistry {
    backends: Arc<BackendSet>,
    state: Mutex<RegistryState>,
}

#[derive(Debug)]
struct RegistryState {
    health: HashMap<String, HealthEntry>,
    /// Index of the last selected backend.
    cursor: usize,
}

#[derive(Debug, Clone, Copy)]
struct HealthEntry {
    healthy: bool,
    checked_at: DateTime<Utc>,
}

impl RegistryState {
    fn is_healthy(&self, id: &str) -> bool {
        self.health.get(id).map_or(false, |entry| entry.healthy)
    }
}

/// Point-in-time view of one backend's recorded health.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendHealth {
    pub id: String,
    /// `None` until the first probe result lands.
    pub healthy: Option<bool>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl HealthRegistry {
    pub fn new(backends: Arc<BackendSet>) -> Self {
        // Start on the last slot so the first selection is the first backend.
        let cursor = backends.len().saturating_sub(1);
        Self {
            backends,
            state: Mutex::new(RegistryState {
                health: HashMap::new(),
                cursor,
            }),
        }
    }

    pub fn backends(&self) -> &Arc<BackendSet> {
        &self.backends
    }

    /// Overwrites the stored flag for `id`, whatever it was before.
    pub async fn set_health(&self, id: &str, healthy: bool) {
        let mut state = self.state.lock().await;
        state.health.insert(
            id.to_string(),
            HealthEntry {
                healthy,
                checked_at: Utc::now(),
            },
        );
    }

    /// Returns the next healthy backend after the cursor, wrapping around the
    /// set, and leaves the cursor on it. Returns `None` after a full cycle
    /// without a healthy backend; the cursor is then back where it started.
    pub async fn next_healthy(&self) -> Option<Backend> {
        if self.backends.is_empty() {
            return None;
        }
        let len = self.backends.len();

        let mut state = self.state.lock().await;
        let start = state.cursor % len;
        let mut index = start;

        loop {
            index = (index + 1) % len;
            state.cursor = index;

            let backend = &self.backends[index];
            if state.is_healthy(&backend.id) {
                return Some(backend.clone());
            }

            if index == start {
                return None;
            }
        }
    }

    /// Unprobed backends count as unhealthy.
    pub async fn is_healthy(&self, id: &str) -> bool {
        self.state.lock().await.is_healthy(id)
    }

    pub async fn healthy_count(&self) -> usize {
        let state = self.state.lock().await;
        self.backends
            .iter()
            .filter(|backend| state.is_healthy(&backend.id))
            .count()
    }

    /// Recorded health of every configured backend, in configured order.
    pub async fn snapshot(&self) -> Vec<BackendHealth> {
        let state = self.state.lock().await;
        self.backends
            .iter()
            .map(|backend| {
                let entry = state.health.get(&backend.id);
                BackendHealth {
                    id: backend.id.clone(),
                    healthy: entry.map(|e| e.healthy),
                    last_checked: entry.map(|e| e.checked_at),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use url::Url;

    fn registry(n: usize) -> HealthRegistry {
        let urls = (0..n).map(|i| Url::parse(&format!("http://backend-{}:80{:02}", i, i)).unwrap());
        HealthRegistry::new(Arc::new(BackendSet::new(urls)))
    }

    async fn mark_all(registry: &HealthRegistry, healthy: bool) {
        for backend in registry.backends().iter() {
            registry.set_health(&backend.id, healthy).await;
        }
    }

    async fn pick(registry: &HealthRegistry) -> Option<String> {
        registry.next_healthy().await.map(|b| b.id)
    }

    #[tokio::test]
    async fn test_set_health_overwrites() {
        let registry = registry(1);
        let id = registry.backends()[0].id.clone();

        assert!(!registry.is_healthy(&id).await);
        registry.set_health(&id, true).await;
        assert!(registry.is_healthy(&id).await);
        registry.set_health(&id, false).await;
        assert!(!registry.is_healthy(&id).await);
    }

    #[tokio::test]
    async fn test_set_health_accepts_unknown_url() {
        let registry = registry(1);
        registry.set_health("http://localhost:9090", true).await;
        assert!(registry.is_healthy("http://localhost:9090").await);
        // Unknown keys never show up in selection.
        assert_eq!(pick(&registry).await, None);
    }

    #[tokio::test]
    async fn test_unprobed_backends_are_not_selected() {
        let registry = registry(3);
        assert_eq!(pick(&registry).await, None);
        assert_eq!(registry.healthy_count().await, 0);
    }

    #[tokio::test]
    async fn test_round_robin_in_configured_order() {
        let registry = registry(3);
        mark_all(&registry, true).await;

        let ids: Vec<String> = registry.backends().iter().map(|b| b.id.clone()).collect();
        for round in 0..3 {
            for expected in &ids {
                assert_eq!(pick(&registry).await.as_ref(), Some(expected), "round {}", round);
            }
        }
    }

    #[tokio::test]
    async fn test_two_backends_ten_requests_split_evenly() {
        let registry = registry(2);
        mark_all(&registry, true).await;

        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut previous = None;
        for _ in 0..10 {
            let id = pick(&registry).await.unwrap();
            assert_ne!(previous.as_ref(), Some(&id), "selection must alternate");
            *counts.entry(id.clone()).or_default() += 1;
            previous = Some(id);
        }

        assert_eq!(counts.len(), 2);
        assert!(counts.values().all(|&c| c == 5));
    }

    #[tokio::test]
    async fn test_unhealthy_backend_is_skipped_until_restored() {
        let registry = registry(3);
        mark_all(&registry, true).await;
        let ids: Vec<String> = registry.backends().iter().map(|b| b.id.clone()).collect();

        registry.set_health(&ids[1], false).await;
        for _ in 0..9 {
            assert_ne!(pick(&registry).await.as_ref(), Some(&ids[1]));
        }

        registry.set_health(&ids[1], true).await;
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(pick(&registry).await.unwrap());
        }
        assert!(seen.contains(&ids[1]));
    }

    #[tokio::test]
    async fn test_all_unhealthy_returns_none_and_keeps_cursor() {
        let registry = registry(3);
        mark_all(&registry, true).await;
        let ids: Vec<String> = registry.backends().iter().map(|b| b.id.clone()).collect();

        assert_eq!(pick(&registry).await.as_ref(), Some(&ids[0]));

        mark_all(&registry, false).await;
        assert_eq!(pick(&registry).await, None);
        assert_eq!(pick(&registry).await, None);

        // Selection resumes right after the last successful pick.
        mark_all(&registry, true).await;
        assert_eq!(pick(&registry).await.as_ref(), Some(&ids[1]));
    }

    #[tokio::test]
    async fn test_single_backend() {
        let registry = registry(1);
        let id = registry.backends()[0].id.clone();

        assert_eq!(pick(&registry).await, None);
        registry.set_health(&id, true).await;
        assert_eq!(pick(&registry).await, Some(id.clone()));
        assert_eq!(pick(&registry).await, Some(id));
    }

    #[tokio::test]
    async fn test_empty_set_yields_none() {
        let registry = HealthRegistry::new(Arc::new(BackendSet::default()));
        assert_eq!(pick(&registry).await, None);
        assert!(registry.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_reports_unprobed_and_probed() {
        let registry = registry(2);
        let first = registry.backends()[0].id.clone();
        registry.set_health(&first, true).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].healthy, Some(true));
        assert!(snapshot[0].last_checked.is_some());
        assert_eq!(snapshot[1].healthy, None);
        assert!(snapshot[1].last_checked.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_selection_is_exactly_fair() {
        let registry = Arc::new(registry(4));
        mark_all(&registry, true).await;

        let mut tasks = Vec::new();
        for _ in 0..400 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move { registry.next_healthy().await }));
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for result in futures::future::join_all(tasks).await {
            let backend = result.unwrap().unwrap();
            *counts.entry(backend.id).or_default() += 1;
        }

        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|&c| c == 100), "{:?}", counts);
    }

    proptest! {
        #[test]
        fn prop_round_robin_is_fair_over_healthy_subset(
            health in proptest::collection::vec(any::<bool>(), 1..8),
            rounds in 1usize..5,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let registry = registry(health.len());
                let ids: Vec<String> = registry.backends().iter().map(|b| b.id.clone()).collect();
                for (id, healthy) in ids.iter().zip(&health) {
                    registry.set_health(id, *healthy).await;
                }

                let healthy_ids: Vec<&String> = ids
                    .iter()
                    .zip(&health)
                    .filter(|(_, h)| **h)
                    .map(|(id, _)| id)
                    .collect();

                if healthy_ids.is_empty() {
                    prop_assert_eq!(pick(&registry).await, None);
                    return Ok(());
                }

                let mut picks = Vec::new();
                for _ in 0..healthy_ids.len() * rounds {
                    picks.push(pick(&registry).await.unwrap());
                }

                // Cyclic repetition of the healthy subset in configured order.
                for (i, id) in picks.iter().enumerate() {
                    prop_assert_eq!(id, healthy_ids[i % healthy_ids.len()]);
                }
                Ok(())
            })?;
        }
    }
}
