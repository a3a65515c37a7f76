//! Keeps a [`StatusCache`] in step with the server.
//!
//! Three sources feed the cache: full refetches over HTTP, status updates
//! from the live channel, and the results of user actions. User actions
//! always wait for the server to confirm before editing the cache.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::{ApiClient, ApiError};
use crate::cache::StatusCache;
use crate::config::Config;
use crate::live::{next_tick, ChannelOptions, LiveChannel, LiveHandle, WsConnector};
use crate::model::{Environment, EnvironmentType, HealthCheck, Service};
use crate::protocol::StatusUpdate;

/// Fetch-state message used when an error carries no text of its own.
pub const FETCH_FAILED_MESSAGE: &str = "Failed to fetch services";

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Restrict refetches to one team's services.
    pub team_id: Option<String>,
    /// Period of the background full refetch; `None` disables it.
    pub refresh_interval: Option<Duration>,
    /// Keep service subscriptions in step with the loaded services after
    /// every background refetch.
    pub follow_loaded: bool,
}

/// Outcome of the most recent full fetch, for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchState {
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct StatusSync {
    api: ApiClient,
    cache: StatusCache,
    live: LiveHandle,
    options: Arc<SyncOptions>,
    fetch: Arc<RwLock<FetchState>>,
}

impl StatusSync {
    pub fn new(api: ApiClient, cache: StatusCache, live: LiveHandle, options: SyncOptions) -> Self {
        Self {
            api,
            cache,
            live,
            options: Arc::new(options),
            fetch: Arc::new(RwLock::new(FetchState::default())),
        }
    }

    /// Build the cache and a WebSocket live channel from `config`, using the
    /// API client's token for the push connection as well.
    ///
    /// The returned receiver carries live status updates and should be
    /// handed to [`run`](StatusSync::run).
    pub fn start(
        api: ApiClient,
        config: &Config,
        team_id: Option<String>,
    ) -> (Self, LiveChannel, mpsc::UnboundedReceiver<StatusUpdate>) {
        let connector = WsConnector::new(
            api.base_url(),
            &config.live.path,
            api.token().map(str::to_string),
        );
        tracing::debug!(url = %connector.url(), "starting live channel");
        let (channel, updates) = LiveChannel::spawn(connector, ChannelOptions::from_config(config));
        let cache = StatusCache::with_history_limit(config.cache.history_limit);
        let options = SyncOptions {
            team_id,
            refresh_interval: config.refresh_interval(),
            follow_loaded: false,
        };
        let sync = Self::new(api, cache, channel.handle(), options);
        (sync, channel, updates)
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn cache(&self) -> &StatusCache {
        &self.cache
    }

    pub fn live(&self) -> &LiveHandle {
        &self.live
    }

    pub fn fetch_state(&self) -> FetchState {
        self.fetch.read().clone()
    }

    pub fn watch_service(&self, service_id: &str) {
        self.live.subscribe_to_service(service_id);
    }

    pub fn unwatch_service(&self, service_id: &str) {
        self.live.unsubscribe_from_service(service_id);
    }

    pub fn watch_environment(&self, environment_id: &str) {
        self.live.subscribe_to_environment(environment_id);
    }

    pub fn unwatch_environment(&self, environment_id: &str) {
        self.live.unsubscribe_from_environment(environment_id);
    }

    /// Follow every loaded service after each background refetch.
    pub fn following_loaded_services(mut self) -> Self {
        Arc::make_mut(&mut self.options).follow_loaded = true;
        self
    }

    /// Subscribe to every loaded service and drop service subscriptions for
    /// services no longer loaded. Returns the number of services followed.
    pub fn watch_loaded_services(&self) -> usize {
        let loaded: Vec<String> = self.cache.snapshot().into_iter().map(|s| s.id).collect();
        let stale: Vec<String> = self
            .live
            .subscriptions()
            .services()
            .filter(|id| !loaded.iter().any(|l| l == id))
            .map(str::to_string)
            .collect();
        for id in &stale {
            self.live.unsubscribe_from_service(id);
        }
        for id in &loaded {
            self.live.subscribe_to_service(id);
        }
        loaded.len()
    }

    /// Fetch all services and replace the cache with them.
    ///
    /// A failure leaves the cache as it was and records a display message in
    /// [`fetch_state`](StatusSync::fetch_state).
    pub async fn refresh(&self) -> Result<usize, ApiError> {
        *self.fetch.write() = FetchState {
            loading: true,
            error: None,
        };

        let result = self.api.services(self.options.team_id.as_deref()).await;

        let mut fetch = self.fetch.write();
        fetch.loading = false;
        match result {
            Ok(list) => {
                let count = list.services.len();
                self.cache.replace_all(list.services);
                Ok(count)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch services");
                let message = e.user_message();
                fetch.error = Some(if message.is_empty() {
                    FETCH_FAILED_MESSAGE.to_string()
                } else {
                    message
                });
                Err(e)
            }
        }
    }

    /// Fetch one service into the cache along with each environment's
    /// history.
    pub async fn load_service(&self, service_id: &str) -> Result<Service, ApiError> {
        let service = self.api.service(service_id).await?;
        self.cache.upsert_service(service.clone());
        for env in &service.environments {
            self.load_history(&env.id).await;
        }
        Ok(service)
    }

    /// Seed an environment's history from the server. A failed fetch leaves
    /// an empty history.
    pub async fn load_history(&self, environment_id: &str) {
        let limit = self.cache.history_limit();
        let checks = match self.api.health_history(environment_id, limit).await {
            Ok(checks) => checks,
            Err(e) => {
                tracing::debug!(environment = %environment_id, error = %e, "history fetch failed");
                Vec::new()
            }
        };
        self.cache.set_history(environment_id, checks);
    }

    /// Run an on-demand check and record its result.
    pub async fn trigger_check(&self, environment_id: &str) -> Result<HealthCheck, ApiError> {
        let check = self
            .api
            .trigger_health_check(environment_id)
            .await
            .inspect_err(|e| {
                tracing::warn!(environment = %environment_id, error = %e, "health check failed")
            })?;
        self.cache
            .apply_local_check_result(environment_id, check.clone());
        Ok(check)
    }

    /// Create an environment, adding it to the cache once the server has
    /// assigned its id.
    pub async fn add_environment(
        &self,
        service_id: &str,
        name: EnvironmentType,
        url: &str,
    ) -> Result<Environment, ApiError> {
        let env = self
            .api
            .create_environment(service_id, name, url)
            .await
            .inspect_err(|e| {
                tracing::warn!(service = %service_id, error = %e, "failed to add environment")
            })?;
        self.cache.add_environment(service_id, env.clone());
        Ok(env)
    }

    pub async fn remove_environment(
        &self,
        service_id: &str,
        environment_id: &str,
    ) -> Result<(), ApiError> {
        self.api
            .delete_environment(environment_id)
            .await
            .inspect_err(|e| {
                tracing::warn!(environment = %environment_id, error = %e, "failed to delete environment")
            })?;
        self.cache.remove_environment(service_id, environment_id);
        self.live.unsubscribe_from_environment(environment_id);
        Ok(())
    }

    pub async fn delete_service(&self, service_id: &str) -> Result<(), ApiError> {
        self.api
            .delete_service(service_id)
            .await
            .inspect_err(|e| {
                tracing::warn!(service = %service_id, error = %e, "failed to delete service")
            })?;
        self.cache.remove_service(service_id);
        self.live.unsubscribe_from_service(service_id);
        Ok(())
    }

    /// Delete a team, then refetch since its services went with it.
    pub async fn delete_team(&self, team_id: &str) -> Result<(), ApiError> {
        self.api
            .delete_team(team_id)
            .await
            .inspect_err(|e| tracing::warn!(team = %team_id, error = %e, "failed to delete team"))?;
        if let Err(e) = self.refresh().await {
            tracing::debug!(error = %e, "refetch after team delete failed");
        }
        Ok(())
    }

    /// Apply live updates and periodic refetches until `cancel` fires or the
    /// live channel stops.
    pub async fn run(
        &self,
        mut updates: mpsc::UnboundedReceiver<StatusUpdate>,
        cancel: CancellationToken,
    ) {
        let mut refetch = self.options.refresh_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                update = updates.recv() => match update {
                    Some(update) => {
                        self.cache.apply_status_update(
                            &update.service_id,
                            &update.environment_id,
                            update.status,
                            update.response_time_ms,
                            &update.timestamp,
                        );
                    }
                    None => {
                        tracing::debug!("live channel closed, stopping sync");
                        break;
                    }
                },
                _ = next_tick(&mut refetch) => {
                    if self.refresh().await.is_ok() && self.options.follow_loaded {
                        self.watch_loaded_services();
                    }
                }
            }
        }
    }
}
