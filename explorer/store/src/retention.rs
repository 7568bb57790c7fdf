use crate::{Indexer, Store, StoreError};
use chrono::{DateTime, Utc};
use explorer_core::{KindConfig, Object};
use std::{sync::Arc, time::Duration};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Purges deleted objects once their kind's retention window has elapsed.
#[derive(Clone, Debug)]
pub struct RetentionManager {
    store: Store,
    index: Indexer,
    kinds: Arc<KindConfig>,
    interval: Duration,
}

impl RetentionManager {
    pub fn new(store: Store, index: Indexer, kinds: Arc<KindConfig>, interval: Duration) -> Self {
        Self {
            store,
            index,
            kinds,
            interval,
        }
    }

    /// Sweeps the store on every interval tick until shutdown is signaled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.cancelled() => {
                    debug!("Retention manager shutting down");
                    return;
                }
            }

            let manager = self.clone();
            match tokio::task::spawn_blocking(move || manager.sweep(Utc::now())).await {
                Ok(Ok(purged)) => debug!(purged, "Retention sweep complete"),
                Ok(Err(error)) => warn!(%error, "Retention sweep failed"),
                Err(error) => warn!(%error, "Retention sweep panicked"),
            }
        }
    }

    /// Deletes every object whose retention window elapsed before `now`, returning how many were
    /// purged.
    ///
    /// Live objects and objects of kinds without a retention window are never purged. A failure
    /// to delete one object is logged and does not stop the sweep.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        // Rows are read page by page, so candidates are collected before anything is deleted.
        let mut expired = Vec::new();
        for obj in self.store.get_all_objects() {
            let obj = obj?;
            if self.is_expired(&obj, now) {
                expired.push(obj);
            }
        }

        let mut purged = 0;
        for obj in &expired {
            let id = obj.id();
            if let Err(error) = self.store.delete_objects_by_id(std::slice::from_ref(&id)) {
                warn!(%id, %error, "Failed to purge object from store");
                continue;
            }
            if let Err(error) = self.index.remove_by_id(std::slice::from_ref(&id)) {
                warn!(%id, %error, "Failed to purge object from index");
            }
            purged += 1;
        }

        if purged > 0 {
            info!(purged, "Purged expired objects");
        }
        Ok(purged)
    }

    fn is_expired(&self, obj: &Object, now: DateTime<Utc>) -> bool {
        let Some(deleted_at) = obj.kubernetes_deleted_at else {
            return false;
        };
        let Some(retention) = self.kinds.retention_for(obj) else {
            return false;
        };
        match (now - deleted_at).to_std() {
            Ok(age) => age > retention,
            // Deleted in the future, e.g. under clock skew.
            Err(_) => false,
        }
    }
}
