use std::sync::Arc;

use chrono::Utc;
use meal_db::{Store, StoreError, TransitionGuard};
use meal_fanout::{BusMsg, FanOut};
use meal_schemas::{Delivery, DeliveryStatus, MealType, ResolvedDelivery};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{DeliveryError, DeliveryResult};
use crate::retry::RetryPolicy;

/// How `update_status` treats a move to an earlier stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusPolicy {
    /// Any value in the status domain is accepted.
    #[default]
    Lenient,
    /// A move to a lower-ranked status is a `Conflict`. Same status is fine.
    Strict,
}

impl StatusPolicy {
    fn guard(self) -> TransitionGuard {
        match self {
            StatusPolicy::Lenient => TransitionGuard::Any,
            StatusPolicy::Strict => TransitionGuard::ForwardOnly,
        }
    }
}

/// Creates deliveries, advances their status, and announces both.
///
/// Reads needed to build the announced record happen before the write, so a
/// write that succeeds is always followed by its event.
pub struct DeliveryEngine {
    store: Arc<dyn Store>,
    fanout: Arc<FanOut>,
    policy: StatusPolicy,
    retry: RetryPolicy,
}

impl DeliveryEngine {
    pub fn new(store: Arc<dyn Store>, fanout: Arc<FanOut>) -> Self {
        Self {
            store,
            fanout,
            policy: StatusPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: StatusPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Start a delivery for one meal slot of a diet chart.
    ///
    /// # Errors
    /// - `NotFound` if the diet chart does not exist.
    /// - `Conflict` if the (chart, meal) pair already has a delivery. The
    ///   store's unique index settles races the pre-check cannot see.
    pub async fn create_delivery(
        &self,
        diet_chart_id: Uuid,
        meal_type: MealType,
    ) -> DeliveryResult<ResolvedDelivery> {
        let chart = self
            .retry
            .run("resolve_diet_chart", || self.store.resolve_diet_chart(diet_chart_id))
            .await?;

        let existing = self
            .retry
            .run("find_delivery_by_chart_and_meal", || {
                self.store.find_delivery_by_chart_and_meal(diet_chart_id, meal_type)
            })
            .await?;
        if let Some(d) = existing {
            return Err(DeliveryError::Conflict(format!(
                "delivery {} already exists for diet chart {diet_chart_id} {meal_type}",
                d.id
            )));
        }

        let delivery = Delivery::new(diet_chart_id, meal_type, Utc::now());
        let row = match self
            .retry
            .run("insert_delivery", || self.store.insert_delivery(delivery.clone()))
            .await
        {
            Ok(row) => row,
            Err(StoreError::Conflict(reason)) => self.claim_own_insert(&delivery, reason).await?,
            Err(e) => return Err(e.into()),
        };

        let resolved = row.resolve(chart);
        info!(
            delivery_id = %resolved.id,
            diet_chart_id = %diet_chart_id,
            meal = %meal_type,
            patient = %resolved.diet_chart.patient.name,
            "delivery created"
        );
        self.fanout.publish(BusMsg::NewDelivery(resolved.clone()));
        Ok(resolved)
    }

    /// An attempt that committed but lost its reply makes the retry collide
    /// with our own row. The id is generated here, so a pair holder with the
    /// same id is that row and the create stands.
    async fn claim_own_insert(&self, delivery: &Delivery, reason: String) -> DeliveryResult<Delivery> {
        let holder = self
            .retry
            .run("find_delivery_by_chart_and_meal", || {
                self.store
                    .find_delivery_by_chart_and_meal(delivery.diet_chart_id, delivery.meal_type)
            })
            .await?;
        match holder {
            Some(row) if row.id == delivery.id => {
                warn!(delivery_id = %row.id, "insert committed before its retry; keeping it");
                Ok(row)
            }
            _ => Err(DeliveryError::Conflict(reason)),
        }
    }

    /// Set a delivery's status.
    ///
    /// # Errors
    /// - `NotFound` if the id does not resolve; nothing changes.
    /// - `Conflict` under [`StatusPolicy::Strict`] for a backward move.
    pub async fn update_status(
        &self,
        delivery_id: Uuid,
        status: DeliveryStatus,
    ) -> DeliveryResult<ResolvedDelivery> {
        let before = self
            .retry
            .run("resolve_delivery", || self.store.resolve_delivery(delivery_id))
            .await?;

        let guard = self.policy.guard();
        let row = self
            .retry
            .run("update_delivery_status", || {
                self.store.update_delivery_status(delivery_id, status, guard)
            })
            .await?;

        let resolved = row.resolve(before.diet_chart);
        info!(
            delivery_id = %delivery_id,
            from = %before.status,
            to = %status,
            "delivery status updated"
        );
        self.fanout.publish(BusMsg::DeliveryUpdated(resolved.clone()));
        Ok(resolved)
    }

    /// Deliveries in creation order, optionally only those in one status.
    pub async fn list_deliveries(
        &self,
        status: Option<DeliveryStatus>,
    ) -> DeliveryResult<Vec<ResolvedDelivery>> {
        self.retry
            .run("list_deliveries", || self.store.list_deliveries(status))
            .await
            .map_err(DeliveryError::from)
    }
}

// ---------------------------------------------------------------------------
// Input parsing
// ---------------------------------------------------------------------------

pub fn parse_id(raw: &str) -> DeliveryResult<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| DeliveryError::InvalidInput(format!("malformed id: {raw:?}")))
}

pub fn parse_meal_type(raw: &str) -> DeliveryResult<MealType> {
    raw.parse()
        .map_err(|e: meal_schemas::DomainError| DeliveryError::InvalidInput(e.to_string()))
}

pub fn parse_status(raw: &str) -> DeliveryResult<DeliveryStatus> {
    raw.parse()
        .map_err(|e: meal_schemas::DomainError| DeliveryError::InvalidInput(e.to_string()))
}
