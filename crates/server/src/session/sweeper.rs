// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background expiration sweep: periodically evicts sessions past their
//! TTL from the shared store.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::session::SessionStore;

/// Spawns a loop that calls [`SessionStore::sweep_expired`] on a fixed
/// interval until `shutdown` is cancelled.
pub fn spawn_sweeper(
    store: Arc<dyn SessionStore>,
    interval_secs: u64,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("session sweeper shutting down");
                    break;
                }
                _ = timer.tick() => {
                    match store.sweep_expired().await {
                        Ok(0) => {}
                        Ok(n) => tracing::info!(swept = n, "expired sessions swept"),
                        Err(e) => tracing::warn!(err = %e, "session sweep failed"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::memory::MemorySessionStore;
    use crate::session::SessionStoreConfig;
    use std::collections::HashMap;

    #[tokio::test]
    async fn sweeper_evicts_expired_sessions_then_stops_on_cancel() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(SessionStoreConfig {
            session_ttl_secs: -1,
            ..SessionStoreConfig::default()
        }));
        store.create(HashMap::new()).await.unwrap();

        let shutdown = CancellationToken::new();
        let handle = spawn_sweeper(Arc::clone(&store), 1, shutdown.clone());

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(store.active_session_count().await.unwrap(), 0);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
