//! Per-session universe refresh loop.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use super::UniverseResolver;
use crate::core::domain::{FilterSpec, UniverseUpdate};
use crate::core::provider::MarketDataProvider;

/// Periodically re-resolves the session's FilterSpec, diffs the result
/// against the current set, pushes the new subscription list to the provider
/// and emits a [`UniverseUpdate`] when anything changed.
///
/// The manager holds only a send capability towards the session; it never
/// reaches back into session state. While a manager is alive it is the sole
/// writer of the provider's subscription list.
pub struct UniverseManager {
    spec: FilterSpec,
    provider: Arc<dyn MarketDataProvider>,
    resolver: UniverseResolver,
    updates: mpsc::Sender<UniverseUpdate>,
    current: Mutex<BTreeSet<String>>,
    shutdown: watch::Receiver<bool>,
}

impl UniverseManager {
    /// Build the manager plus the shutdown handle that stops it.
    pub fn new(
        spec: FilterSpec,
        provider: Arc<dyn MarketDataProvider>,
        resolver: UniverseResolver,
        updates: mpsc::Sender<UniverseUpdate>,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (
            Self {
                spec,
                provider,
                resolver,
                updates,
                current: Mutex::new(BTreeSet::new()),
                shutdown: shutdown_rx,
            },
            shutdown_tx,
        )
    }

    /// Refresh loop. Exits on shutdown signal or when the session side of the
    /// update channel goes away.
    pub async fn run(mut self) {
        info!(refresh_seconds = self.spec.refresh_seconds, "Universe manager started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self
                .resolver
                .resolve(&self.spec, self.provider.as_ref())
                .await
            {
                Ok(new_list) => {
                    if !self.apply(new_list).await {
                        break;
                    }
                }
                // Transient (snapshot poll etc.); the next refresh retries.
                Err(e) => warn!(error = %e, "Universe resolve failed; will retry"),
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.spec.refresh_seconds)) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Universe manager stopped");
    }

    /// Diff + commit one resolution. Returns false when the session is gone.
    async fn apply(&self, new_list: Vec<String>) -> bool {
        let new_set: BTreeSet<String> = new_list.into_iter().collect();
        let mut current = self.current.lock().await;

        let added: Vec<String> = new_set.difference(&current).cloned().collect();
        let removed: Vec<String> = current.difference(&new_set).cloned().collect();
        if added.is_empty() && removed.is_empty() {
            return true;
        }

        let universe: Vec<String> = new_set.iter().cloned().collect();
        match self.provider.set_subscriptions(&universe).await {
            Ok(()) => {
                *current = new_set;
                let update = UniverseUpdate::new(added, removed, universe, "filter_refresh");
                if self.updates.send(update).await.is_err() {
                    debug!("Update channel closed; stopping universe manager");
                    return false;
                }
            }
            // Current set stays untouched so the emitted history remains
            // consistent; the next refresh retries the same delta.
            Err(e) => warn!(error = %e, "Failed to push subscriptions; will retry"),
        }
        true
    }
}
