//! In-memory view of services, their environments and recent check history.
//!
//! Three writers share this cache: full refetches ([`StatusCache::replace_all`]),
//! live push events ([`StatusCache::apply_status_update`]) and results of
//! user actions. None of them carries an ordering token, so the last write
//! observed wins. A push that arrives after a local check result can replace
//! it with an older reading; the next push or refetch repairs it.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;

use crate::model::{Environment, HealthCheck, HealthStatus, Service};

/// Default number of checks kept per environment.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

struct CacheInner {
    services: Vec<Service>,
    history: HashMap<String, VecDeque<HealthCheck>>,
    history_limit: usize,
}

/// Shared handle to the status cache. Cloning is cheap; all clones see the
/// same content.
#[derive(Clone)]
pub struct StatusCache {
    inner: Arc<RwLock<CacheInner>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCache {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Create an empty cache keeping at most `history_limit` checks per
    /// environment. A limit of 0 is raised to 1.
    pub fn with_history_limit(history_limit: usize) -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(CacheInner {
                services: Vec::new(),
                history: HashMap::new(),
                history_limit: history_limit.max(1),
            })),
            revision: Arc::new(tx),
        }
    }

    /// Subscribe to content changes. The value is a revision counter bumped
    /// after every mutation that changed the cache.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    pub fn history_limit(&self) -> usize {
        self.inner.read().history_limit
    }

    // ── Writers ─────────────────────────────────────────────────────

    /// Replace the whole cache with a freshly fetched snapshot.
    ///
    /// Local and pushed changes not present in `services` are discarded.
    /// History of environments that no longer exist is dropped.
    pub fn replace_all(&self, services: Vec<Service>) {
        {
            let mut inner = self.inner.write();
            inner.history.retain(|env_id, _| {
                services
                    .iter()
                    .any(|s| s.environments.iter().any(|e| &e.id == env_id))
            });
            inner.services = services;
        }
        tracing::debug!(services = self.len(), "cache replaced from fetch");
        self.bump();
    }

    /// Set one environment's status and last-check time from a push event.
    ///
    /// Only `current_status` and `last_check` of the named environment are
    /// touched. Returns `false`, leaving the cache unchanged, if the service
    /// or environment is not loaded. Such updates are dropped, not queued.
    pub fn apply_status_update(
        &self,
        service_id: &str,
        environment_id: &str,
        status: HealthStatus,
        response_time_ms: u64,
        timestamp: &str,
    ) -> bool {
        let applied = {
            let mut inner = self.inner.write();
            let env = inner
                .services
                .iter_mut()
                .find(|s| s.id == service_id)
                .and_then(|s| s.environments.iter_mut().find(|e| e.id == environment_id));
            match env {
                Some(env) => {
                    set_status(env, status, timestamp);
                    true
                }
                None => false,
            }
        };

        if applied {
            tracing::debug!(
                service = %service_id,
                environment = %environment_id,
                status = %status,
                response_time_ms,
                "status update applied"
            );
            self.bump();
        } else {
            tracing::debug!(
                service = %service_id,
                environment = %environment_id,
                "status update for unloaded environment dropped"
            );
        }
        applied
    }

    /// Record the result of a user-triggered check.
    ///
    /// Updates the status of the environment with `environment_id` and puts
    /// `check` at the front of its history, evicting the oldest entries past
    /// the history limit. Returns `false` and changes nothing if no loaded
    /// service holds that environment.
    pub fn apply_local_check_result(&self, environment_id: &str, check: HealthCheck) -> bool {
        let applied = {
            let mut guard = self.inner.write();
            let inner = &mut *guard;
            let limit = inner.history_limit;
            let env = inner
                .services
                .iter_mut()
                .flat_map(|s| s.environments.iter_mut())
                .find(|e| e.id == environment_id);
            match env {
                Some(env) => {
                    set_status(env, check.status, &check.checked_at);
                    let history = inner.history.entry(environment_id.to_string()).or_default();
                    history.push_front(check);
                    history.truncate(limit);
                    true
                }
                None => false,
            }
        };

        if applied {
            self.bump();
        }
        applied
    }

    /// Replace one service with a freshly fetched copy, or append it if it
    /// is not loaded yet. Other services are untouched.
    pub fn upsert_service(&self, service: Service) {
        {
            let mut guard = self.inner.write();
            let inner = &mut *guard;
            if let Some(existing) = inner.services.iter().find(|s| s.id == service.id) {
                let gone: Vec<String> = existing
                    .environments
                    .iter()
                    .filter(|e| !service.environments.iter().any(|n| n.id == e.id))
                    .map(|e| e.id.clone())
                    .collect();
                for env_id in gone {
                    inner.history.remove(&env_id);
                }
            }
            match inner.services.iter_mut().find(|s| s.id == service.id) {
                Some(existing) => *existing = service,
                None => inner.services.push(service),
            }
        }
        self.bump();
    }

    /// Append an environment the server has just created.
    ///
    /// Returns `false` if the service is not loaded or already holds an
    /// environment with the same id.
    pub fn add_environment(&self, service_id: &str, environment: Environment) -> bool {
        let added = {
            let mut inner = self.inner.write();
            match inner.services.iter_mut().find(|s| s.id == service_id) {
                Some(service) if !service.environments.iter().any(|e| e.id == environment.id) => {
                    service.environments.push(environment);
                    true
                }
                _ => false,
            }
        };
        if added {
            self.bump();
        }
        added
    }

    /// Remove an environment the server has just deleted, with its history.
    pub fn remove_environment(&self, service_id: &str, environment_id: &str) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            let removed = match inner.services.iter_mut().find(|s| s.id == service_id) {
                Some(service) => {
                    let before = service.environments.len();
                    service.environments.retain(|e| e.id != environment_id);
                    service.environments.len() != before
                }
                None => false,
            };
            if removed {
                inner.history.remove(environment_id);
            }
            removed
        };
        if removed {
            self.bump();
        }
        removed
    }

    /// Remove a service the server has just deleted.
    pub fn remove_service(&self, service_id: &str) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            match inner.services.iter().position(|s| s.id == service_id) {
                Some(idx) => {
                    let service = inner.services.remove(idx);
                    for env in &service.environments {
                        inner.history.remove(&env.id);
                    }
                    true
                }
                None => false,
            }
        };
        if removed {
            self.bump();
        }
        removed
    }

    /// Seed an environment's history from a fetch, newest first. Entries past
    /// the history limit are discarded.
    pub fn set_history(&self, environment_id: &str, checks: Vec<HealthCheck>) {
        {
            let mut inner = self.inner.write();
            let limit = inner.history_limit;
            let mut history: VecDeque<HealthCheck> = checks.into();
            history.truncate(limit);
            inner.history.insert(environment_id.to_string(), history);
        }
        self.bump();
    }

    // ── Readers ─────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Vec<Service> {
        self.inner.read().services.clone()
    }

    pub fn service(&self, service_id: &str) -> Option<Service> {
        self.inner
            .read()
            .services
            .iter()
            .find(|s| s.id == service_id)
            .cloned()
    }

    pub fn environment(&self, environment_id: &str) -> Option<Environment> {
        self.inner
            .read()
            .services
            .iter()
            .flat_map(|s| s.environments.iter())
            .find(|e| e.id == environment_id)
            .cloned()
    }

    /// Recent checks for an environment, newest first.
    pub fn history(&self, environment_id: &str) -> Vec<HealthCheck> {
        self.inner
            .read()
            .history
            .get(environment_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().services.is_empty()
    }
}

fn set_status(env: &mut Environment, status: HealthStatus, timestamp: &str) {
    // Same-format ISO-8601 strings order lexically. Older readings are still
    // applied: arrival order wins.
    if let Some(previous) = env.last_check.as_deref() {
        if timestamp < previous {
            tracing::debug!(
                environment = %env.id,
                previous = %previous,
                incoming = %timestamp,
                "applying status older than cached value"
            );
        }
    }
    env.current_status = Some(status);
    env.last_check = Some(timestamp.to_string());
}
