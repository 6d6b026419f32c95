// src/analytics.rs
// Usage-analytics counter service: bump the persisted counter, then push the
// fresh total through the broadcast hub.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::StoreError;
use crate::hub::HubHandle;
use crate::store::Store;

/// Budget for the detached post-response increment task.
const INCREMENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSummary {
    pub total_visits: u64,
}

#[derive(Clone)]
pub struct AnalyticsService {
    store: Arc<dyn Store>,
    hub: HubHandle,
}

impl AnalyticsService {
    pub fn new(store: Arc<dyn Store>, hub: HubHandle) -> Self {
        Self { store, hub }
    }

    /// Increment the visit counter and broadcast the new total. The
    /// broadcast is best-effort; only the increment can fail.
    pub async fn increment_total_visits(&self) -> Result<u64, StoreError> {
        let total = self.store.increment_total_visits().await?;
        tracing::debug!(
            total_visits = total,
            observers = self.hub.observer_count(),
            "broadcasting analytics update"
        );
        self.hub.publish_analytics(total);
        Ok(total)
    }

    pub async fn summary(&self) -> Result<AnalyticsSummary, StoreError> {
        let total_visits = self.store.total_visits().await?;
        Ok(AnalyticsSummary { total_visits })
    }

    /// Fire-and-forget increment used by the tracking middleware: runs on a
    /// detached task with its own timeout, deliberately not linked to the
    /// request's cancellation. Failures are only logged.
    pub fn increment_detached(&self) {
        let svc = self.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(INCREMENT_TIMEOUT, svc.increment_total_visits()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "failed to increment total visits"),
                Err(_) => tracing::warn!("analytics increment timed out"),
            }
        });
    }
}
