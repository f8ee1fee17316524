// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache lifecycle: start, connect, reconnect, disconnect, L1 sweeper.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::{CacheError, CacheMode, TieredCache};
use crate::config::CacheConfig;
use crate::security::SecurityManager;

impl TieredCache {
    /// Build a Redis-backed cache and connect it.
    ///
    /// Only misconfiguration is fatal: invalid settings, rejected credentials
    /// and certificate failures return an error. An unreachable remote store
    /// leaves the cache running in [`CacheMode::LocalOnly`].
    #[tracing::instrument(skip(config), fields(mode))]
    pub async fn start(config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        let security = Arc::new(SecurityManager::redis(config.security_config())?);
        let cache = Self::new(config, security)?;

        if cache.config.redis_url.is_none() {
            info!("No redis_url configured, running L1-only");
        } else if let Err(e) = cache.connect().await {
            match e {
                CacheError::Security(ref inner) if inner.is_misconfiguration() => {
                    error!(error = %e, "Remote tier rejected our configuration");
                    return Err(e);
                }
                _ => warn!(error = %e, "Remote tier unreachable, starting L1-only"),
            }
        }

        tracing::Span::current().record("mode", tracing::field::display(cache.mode()));
        info!(mode = %cache.mode(), "Tiered cache started");
        Ok(cache)
    }

    /// Connect the remote tier at `redis_url`, replacing any live connection.
    pub async fn connect(&self) -> Result<(), CacheError> {
        let Some(address) = self.config.redis_url.clone() else {
            return Err(CacheError::Configuration("redis_url is not set".into()));
        };
        self.security.connect(&address).await?;
        self.circuit.reset();
        self.spawn_sweeper();
        Ok(())
    }

    /// Re-establish the remote connection and close the circuit.
    ///
    /// Also the way back to [`CacheMode::Tiered`] after
    /// [`disconnect`](Self::disconnect).
    #[tracing::instrument(skip(self))]
    pub async fn reconnect(&self) -> Result<(), CacheError> {
        info!("Reconnecting remote tier");
        self.connect().await
    }

    /// Release the remote connection and background tasks.
    ///
    /// Idempotent. Afterwards every operation runs against L1 alone until
    /// [`reconnect`](Self::reconnect).
    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<(), CacheError> {
        let sweeper = self.sweeper.lock().take();
        if let Some(handle) = sweeper {
            handle.abort();
            debug!("L1 sweeper stopped");
        }
        let was_tiered = self.mode() == CacheMode::Tiered;
        self.security.disconnect().await;
        if was_tiered {
            info!("Tiered cache disconnected, continuing L1-only");
        }
        Ok(())
    }

    /// Start the periodic L1 expiry sweep if enabled and not already running.
    ///
    /// The task holds only the L1 tier, so it never keeps the cache alive.
    pub(super) fn spawn_sweeper(&self) {
        let interval_secs = self.config.l1_sweep_interval_secs;
        if interval_secs == 0 {
            return;
        }

        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No tokio runtime, L1 relies on lazy expiry");
            return;
        };

        let l1 = Arc::clone(&self.l1);
        let period = Duration::from_secs(interval_secs);
        *sweeper = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                l1.purge_expired();
                crate::metrics::set_l1_entries(l1.len());
            }
        }));
        debug!(interval = ?period, "L1 sweeper started");
    }

    /// Whether the background sweep is running.
    #[must_use]
    pub fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}
