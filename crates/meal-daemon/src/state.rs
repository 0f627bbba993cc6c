//! Shared runtime state for meal-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The fan-out, engine,
//! and roster are built once at boot from [`ServiceSettings`] and share one
//! store.

use std::sync::Arc;
use std::time::Duration;

use meal_config::{ServiceSettings, StatusPolicySetting};
use meal_db::Store;
use meal_delivery::{DeliveryEngine, RetryPolicy, Roster, StatusPolicy};
use meal_fanout::{BusMsg, FanOut};
use serde::{Deserialize, Serialize};

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

pub struct AppState {
    pub fanout: Arc<FanOut>,
    pub engine: DeliveryEngine,
    pub roster: Roster,
    pub build: BuildInfo,
    pub store_backend: &'static str,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, settings: &ServiceSettings) -> Self {
        let fanout = Arc::new(FanOut::new(settings.fanout_capacity));
        let retry = RetryPolicy {
            max_attempts: settings.retry_max_attempts,
            backoff: settings.retry_backoff,
        };
        let policy = match settings.status_policy {
            StatusPolicySetting::Lenient => StatusPolicy::Lenient,
            StatusPolicySetting::Strict => StatusPolicy::Strict,
        };

        Self {
            store_backend: store.backend_name(),
            engine: DeliveryEngine::new(Arc::clone(&store), Arc::clone(&fanout))
                .with_policy(policy)
                .with_retry(retry),
            roster: Roster::new(store, Arc::clone(&fanout)).with_retry(retry),
            fanout,
            build: BuildInfo {
                service: "meal-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}

/// Spawn a background task that emits a heartbeat event every `interval`.
pub fn spawn_heartbeat(fanout: Arc<FanOut>, interval: Duration) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        // The first tick completes immediately.
        tick.tick().await;
        loop {
            tick.tick().await;
            fanout.publish(BusMsg::heartbeat_now());
        }
    });
}
