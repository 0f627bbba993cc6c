//! In-process store. All tables sit behind a single `RwLock`, so every
//! write (including the delivery pair-uniqueness check) is serialized.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use meal_schemas::{
    Delivery, DeliveryStatus, DietChart, MealType, NewDietChart, NewPatient, Patient,
    ResolvedDelivery, ResolvedDietChart,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{Store, StoreError, StoreResult, TransitionGuard};

#[derive(Default)]
struct Tables {
    patients: HashMap<Uuid, Patient>,
    patient_order: Vec<Uuid>,
    charts: HashMap<Uuid, DietChart>,
    chart_order: Vec<Uuid>,
    deliveries: HashMap<Uuid, Delivery>,
    delivery_order: Vec<Uuid>,
    /// (diet chart, meal type) -> delivery id
    pair_index: HashMap<(Uuid, MealType), Uuid>,
}

impl Tables {
    fn patient(&self, id: Uuid) -> StoreResult<&Patient> {
        self.patients
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("patient {id}")))
    }

    fn chart(&self, id: Uuid) -> StoreResult<&DietChart> {
        self.charts
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("diet chart {id}")))
    }

    fn resolve_chart(&self, id: Uuid) -> StoreResult<ResolvedDietChart> {
        let chart = self.chart(id)?;
        let patient = self.patient(chart.patient_id)?;
        Ok(chart.clone().resolve(patient))
    }

    fn resolve_delivery(&self, d: &Delivery) -> StoreResult<ResolvedDelivery> {
        let chart = self.resolve_chart(d.diet_chart_id)?;
        Ok(d.clone().resolve(chart))
    }
}

/// In-memory [`Store`].
#[derive(Default)]
pub struct MemStore {
    tables: RwLock<Tables>,
    /// Remaining calls that fail with `Unavailable` (fault injection).
    outage: AtomicU32,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `calls` store operations fail with `Unavailable`.
    #[cfg(any(test, feature = "testkit"))]
    pub fn inject_outage(&self, calls: u32) {
        self.outage.store(calls, Ordering::SeqCst);
    }

    fn gate(&self) -> StoreResult<()> {
        let hit = self
            .outage
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hit {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn insert_patient(&self, patient: NewPatient) -> StoreResult<Patient> {
        self.gate()?;
        let row = patient.into_patient(Uuid::new_v4(), Utc::now());
        let mut t = self.tables.write().await;
        t.patient_order.push(row.id);
        t.patients.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_patient(&self, id: Uuid) -> StoreResult<Patient> {
        self.gate()?;
        let t = self.tables.read().await;
        t.patient(id).cloned()
    }

    async fn list_patients(&self) -> StoreResult<Vec<Patient>> {
        self.gate()?;
        let t = self.tables.read().await;
        Ok(t.patient_order
            .iter()
            .filter_map(|id| t.patients.get(id).cloned())
            .collect())
    }

    async fn update_patient(&self, id: Uuid, patient: NewPatient) -> StoreResult<Patient> {
        self.gate()?;
        let mut t = self.tables.write().await;
        let existing = t
            .patients
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("patient {id}")))?;
        let mut row = patient.into_patient(id, existing.created_at);
        row.updated_at = Utc::now();
        *existing = row.clone();
        Ok(row)
    }

    async fn delete_patient(&self, id: Uuid) -> StoreResult<()> {
        self.gate()?;
        let mut t = self.tables.write().await;
        t.patient(id)?;
        if t.charts.values().any(|c| c.patient_id == id) {
            return Err(StoreError::Conflict(format!(
                "patient {id} still has diet charts"
            )));
        }
        t.patients.remove(&id);
        t.patient_order.retain(|p| *p != id);
        Ok(())
    }

    async fn insert_diet_chart(&self, chart: NewDietChart) -> StoreResult<DietChart> {
        self.gate()?;
        let mut t = self.tables.write().await;
        t.patient(chart.patient_id)?;
        let row = chart.into_chart(Uuid::new_v4(), Utc::now());
        t.chart_order.push(row.id);
        t.charts.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_diet_chart(&self, id: Uuid) -> StoreResult<DietChart> {
        self.gate()?;
        let t = self.tables.read().await;
        t.chart(id).cloned()
    }

    async fn resolve_diet_chart(&self, id: Uuid) -> StoreResult<ResolvedDietChart> {
        self.gate()?;
        let t = self.tables.read().await;
        t.resolve_chart(id)
    }

    async fn list_diet_charts(&self) -> StoreResult<Vec<ResolvedDietChart>> {
        self.gate()?;
        let t = self.tables.read().await;
        t.chart_order.iter().map(|id| t.resolve_chart(*id)).collect()
    }

    async fn update_diet_chart(&self, id: Uuid, chart: NewDietChart) -> StoreResult<DietChart> {
        self.gate()?;
        let mut t = self.tables.write().await;
        t.patient(chart.patient_id)?;
        let created_at = t.chart(id)?.created_at;
        let mut row = chart.into_chart(id, created_at);
        row.updated_at = Utc::now();
        t.charts.insert(id, row.clone());
        Ok(row)
    }

    async fn delete_diet_chart(&self, id: Uuid) -> StoreResult<()> {
        self.gate()?;
        let mut t = self.tables.write().await;
        t.chart(id)?;
        if t.deliveries.values().any(|d| d.diet_chart_id == id) {
            return Err(StoreError::Conflict(format!(
                "diet chart {id} still has deliveries"
            )));
        }
        t.charts.remove(&id);
        t.chart_order.retain(|c| *c != id);
        Ok(())
    }

    async fn find_delivery_by_chart_and_meal(
        &self,
        diet_chart_id: Uuid,
        meal_type: MealType,
    ) -> StoreResult<Option<Delivery>> {
        self.gate()?;
        let t = self.tables.read().await;
        Ok(t.pair_index
            .get(&(diet_chart_id, meal_type))
            .and_then(|id| t.deliveries.get(id))
            .cloned())
    }

    async fn insert_delivery(&self, delivery: Delivery) -> StoreResult<Delivery> {
        self.gate()?;
        let mut t = self.tables.write().await;
        t.chart(delivery.diet_chart_id)?;

        let key = (delivery.diet_chart_id, delivery.meal_type);
        if let Some(existing) = t.pair_index.get(&key) {
            return Err(StoreError::Conflict(format!(
                "delivery {existing} already exists for diet chart {} {}",
                delivery.diet_chart_id, delivery.meal_type
            )));
        }

        t.pair_index.insert(key, delivery.id);
        t.delivery_order.push(delivery.id);
        t.deliveries.insert(delivery.id, delivery.clone());
        Ok(delivery)
    }

    async fn update_delivery_status(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        guard: TransitionGuard,
    ) -> StoreResult<Delivery> {
        self.gate()?;
        let mut t = self.tables.write().await;
        let row = t
            .deliveries
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("delivery {id}")))?;
        guard.check(id, row.status, status)?;
        row.status = status;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn resolve_delivery(&self, id: Uuid) -> StoreResult<ResolvedDelivery> {
        self.gate()?;
        let t = self.tables.read().await;
        let d = t
            .deliveries
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("delivery {id}")))?;
        t.resolve_delivery(d)
    }

    async fn list_deliveries(
        &self,
        status: Option<DeliveryStatus>,
    ) -> StoreResult<Vec<ResolvedDelivery>> {
        self.gate()?;
        let t = self.tables.read().await;
        t.delivery_order
            .iter()
            .filter_map(|id| t.deliveries.get(id))
            .filter(|d| status.map_or(true, |s| d.status == s))
            .map(|d| t.resolve_delivery(d))
            .collect()
    }
}
