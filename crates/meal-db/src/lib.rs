//! Persistence for patients, diet charts, and deliveries.
//!
//! [`Store`] is the boundary the delivery engine and roster talk to. Two
//! implementations live here:
//!
//! - [`MemStore`]: in-process tables behind one `RwLock`; used by tests and
//!   by the daemon's `memory` backend.
//! - [`PgStore`]: PostgreSQL via sqlx runtime queries and embedded
//!   migrations.
//!
//! Both enforce the (diet chart, meal type) uniqueness of deliveries at the
//! write itself, so the store is the final arbiter for concurrent creates.

use async_trait::async_trait;
use meal_schemas::{
    Delivery, DeliveryStatus, DietChart, MealType, NewDietChart, NewPatient, Patient,
    ResolvedDelivery, ResolvedDietChart,
};
use uuid::Uuid;

mod mem;
mod pg;

pub use mem::MemStore;
pub use pg::{connect, migrate, status, DbStatus, PgStore};
pub use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A uniqueness or referential constraint refused the write.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The backend could not be reached or returned something unusable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Only `Unavailable` is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// TransitionGuard
// ---------------------------------------------------------------------------

/// Check applied atomically with a delivery status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionGuard {
    /// Accept any value in the status domain.
    Any,
    /// Refuse (with `Conflict`) a status of lower rank than the stored one.
    ForwardOnly,
}

impl TransitionGuard {
    pub(crate) fn check(
        &self,
        id: Uuid,
        current: DeliveryStatus,
        next: DeliveryStatus,
    ) -> StoreResult<()> {
        match self {
            TransitionGuard::Any => Ok(()),
            TransitionGuard::ForwardOnly if current.is_backward_to(next) => {
                Err(StoreError::Conflict(format!(
                    "delivery {id} cannot move backward from {current} to {next}"
                )))
            }
            TransitionGuard::ForwardOnly => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Store: Send + Sync {
    fn backend_name(&self) -> &'static str;

    // Patients ---------------------------------------------------------------

    async fn insert_patient(&self, patient: NewPatient) -> StoreResult<Patient>;
    async fn find_patient(&self, id: Uuid) -> StoreResult<Patient>;
    async fn list_patients(&self) -> StoreResult<Vec<Patient>>;
    /// Full replace of the mutable fields.
    async fn update_patient(&self, id: Uuid, patient: NewPatient) -> StoreResult<Patient>;
    /// `Conflict` while any diet chart still references the patient.
    async fn delete_patient(&self, id: Uuid) -> StoreResult<()>;

    // Diet charts ------------------------------------------------------------

    /// `NotFound` when the referenced patient does not exist.
    async fn insert_diet_chart(&self, chart: NewDietChart) -> StoreResult<DietChart>;
    async fn find_diet_chart(&self, id: Uuid) -> StoreResult<DietChart>;
    async fn resolve_diet_chart(&self, id: Uuid) -> StoreResult<ResolvedDietChart>;
    async fn list_diet_charts(&self) -> StoreResult<Vec<ResolvedDietChart>>;
    async fn update_diet_chart(&self, id: Uuid, chart: NewDietChart) -> StoreResult<DietChart>;
    /// `Conflict` while any delivery still references the chart.
    async fn delete_diet_chart(&self, id: Uuid) -> StoreResult<()>;

    // Deliveries -------------------------------------------------------------

    async fn find_delivery_by_chart_and_meal(
        &self,
        diet_chart_id: Uuid,
        meal_type: MealType,
    ) -> StoreResult<Option<Delivery>>;

    /// `Conflict` if a delivery already exists for the record's
    /// (diet chart, meal type) pair; `NotFound` if the chart is gone.
    async fn insert_delivery(&self, delivery: Delivery) -> StoreResult<Delivery>;

    async fn update_delivery_status(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        guard: TransitionGuard,
    ) -> StoreResult<Delivery>;

    async fn resolve_delivery(&self, id: Uuid) -> StoreResult<ResolvedDelivery>;

    /// All deliveries in creation order, joined with chart and patient,
    /// optionally restricted to one status.
    async fn list_deliveries(
        &self,
        status: Option<DeliveryStatus>,
    ) -> StoreResult<Vec<ResolvedDelivery>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_only_guard_refuses_backward_moves() {
        let id = Uuid::new_v4();
        let g = TransitionGuard::ForwardOnly;
        assert!(g.check(id, DeliveryStatus::Ready, DeliveryStatus::Delivering).is_ok());
        assert!(g.check(id, DeliveryStatus::Ready, DeliveryStatus::Ready).is_ok());
        assert!(matches!(
            g.check(id, DeliveryStatus::Ready, DeliveryStatus::Preparing),
            Err(StoreError::Conflict(_))
        ));
        assert!(TransitionGuard::Any
            .check(id, DeliveryStatus::Delivered, DeliveryStatus::Pending)
            .is_ok());
    }
}
