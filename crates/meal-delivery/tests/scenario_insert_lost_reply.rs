//! A delivery insert that commits but whose reply is lost. The retry
//! collides with the row it just wrote; the create must still succeed and be
//! announced exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use meal_db::{MemStore, Store, StoreError, StoreResult, TransitionGuard};
use meal_delivery::{DeliveryEngine, ErrorKind, RetryPolicy, Roster};
use meal_fanout::{BusMsg, FanOut};
use meal_schemas::{
    Delivery, DeliveryStatus, DietChart, MealPlan, MealType, NewDietChart, NewPatient, Patient,
    ResolvedDelivery, ResolvedDietChart,
};
use uuid::Uuid;

/// Delegates to `MemStore`; the first delivery insert is written and then
/// reported as `Unavailable`.
struct LostReplyStore {
    inner: MemStore,
    dropped: AtomicBool,
}

#[async_trait]
impl Store for LostReplyStore {
    fn backend_name(&self) -> &'static str {
        "lost-reply"
    }

    async fn insert_patient(&self, patient: NewPatient) -> StoreResult<Patient> {
        self.inner.insert_patient(patient).await
    }
    async fn find_patient(&self, id: Uuid) -> StoreResult<Patient> {
        self.inner.find_patient(id).await
    }
    async fn list_patients(&self) -> StoreResult<Vec<Patient>> {
        self.inner.list_patients().await
    }
    async fn update_patient(&self, id: Uuid, patient: NewPatient) -> StoreResult<Patient> {
        self.inner.update_patient(id, patient).await
    }
    async fn delete_patient(&self, id: Uuid) -> StoreResult<()> {
        self.inner.delete_patient(id).await
    }

    async fn insert_diet_chart(&self, chart: NewDietChart) -> StoreResult<DietChart> {
        self.inner.insert_diet_chart(chart).await
    }
    async fn find_diet_chart(&self, id: Uuid) -> StoreResult<DietChart> {
        self.inner.find_diet_chart(id).await
    }
    async fn resolve_diet_chart(&self, id: Uuid) -> StoreResult<ResolvedDietChart> {
        self.inner.resolve_diet_chart(id).await
    }
    async fn list_diet_charts(&self) -> StoreResult<Vec<ResolvedDietChart>> {
        self.inner.list_diet_charts().await
    }
    async fn update_diet_chart(&self, id: Uuid, chart: NewDietChart) -> StoreResult<DietChart> {
        self.inner.update_diet_chart(id, chart).await
    }
    async fn delete_diet_chart(&self, id: Uuid) -> StoreResult<()> {
        self.inner.delete_diet_chart(id).await
    }

    async fn find_delivery_by_chart_and_meal(
        &self,
        diet_chart_id: Uuid,
        meal_type: MealType,
    ) -> StoreResult<Option<Delivery>> {
        self.inner
            .find_delivery_by_chart_and_meal(diet_chart_id, meal_type)
            .await
    }

    async fn insert_delivery(&self, delivery: Delivery) -> StoreResult<Delivery> {
        let row = self.inner.insert_delivery(delivery).await?;
        if !self.dropped.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("reply lost".into()));
        }
        Ok(row)
    }

    async fn update_delivery_status(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        guard: TransitionGuard,
    ) -> StoreResult<Delivery> {
        self.inner.update_delivery_status(id, status, guard).await
    }
    async fn resolve_delivery(&self, id: Uuid) -> StoreResult<ResolvedDelivery> {
        self.inner.resolve_delivery(id).await
    }
    async fn list_deliveries(
        &self,
        status: Option<DeliveryStatus>,
    ) -> StoreResult<Vec<ResolvedDelivery>> {
        self.inner.list_deliveries(status).await
    }
}

async fn seed_chart(roster: &Roster) -> Uuid {
    let patient = roster
        .create_patient(NewPatient {
            name: "Ruth Okafor".to_string(),
            age: 58,
            gender: "female".to_string(),
            room_number: "311".to_string(),
            bed_number: "A".to_string(),
            floor_number: "3".to_string(),
            contact_information: String::new(),
            emergency_contact: String::new(),
            diseases: vec![],
            allergies: vec![],
        })
        .await
        .unwrap();
    roster
        .create_diet_chart(NewDietChart {
            patient_id: patient.id,
            date: NaiveDate::from_ymd_opt(2026, 10, 15).unwrap(),
            morning: MealPlan::default(),
            evening: MealPlan::default(),
            night: MealPlan::default(),
        })
        .await
        .unwrap()
        .id
}

fn engine_over(store: Arc<dyn Store>, fanout: Arc<FanOut>) -> DeliveryEngine {
    DeliveryEngine::new(store, fanout).with_retry(RetryPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(1),
    })
}

#[tokio::test]
async fn committed_insert_with_lost_reply_still_succeeds_once() {
    let store: Arc<dyn Store> = Arc::new(LostReplyStore {
        inner: MemStore::new(),
        dropped: AtomicBool::new(false),
    });
    let fanout = Arc::new(FanOut::new(16));
    let roster = Roster::new(Arc::clone(&store), Arc::clone(&fanout));
    let chart = seed_chart(&roster).await;
    let engine = engine_over(Arc::clone(&store), Arc::clone(&fanout));
    let mut session = fanout.connect("pantry");

    let created = engine.create_delivery(chart, MealType::Morning).await.unwrap();
    assert_eq!(created.status, DeliveryStatus::Preparing);
    assert_eq!(created.diet_chart.patient.name, "Ruth Okafor");

    let listed = engine.list_deliveries(None).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, created.id);

    let events: Vec<BusMsg> = std::iter::from_fn(|| session.try_recv()).collect();
    assert_eq!(events.len(), 1);
    match &events[0] {
        BusMsg::NewDelivery(d) => assert_eq!(d.id, created.id),
        other => panic!("expected newDelivery, got {other:?}"),
    }
}

#[tokio::test]
async fn pair_held_by_another_delivery_is_still_conflict() {
    let store: Arc<dyn Store> = Arc::new(LostReplyStore {
        inner: MemStore::new(),
        dropped: AtomicBool::new(false),
    });
    let fanout = Arc::new(FanOut::new(16));
    let roster = Roster::new(Arc::clone(&store), Arc::clone(&fanout));
    let chart = seed_chart(&roster).await;
    let engine = engine_over(Arc::clone(&store), Arc::clone(&fanout));

    let first = engine.create_delivery(chart, MealType::Evening).await.unwrap();
    let mut session = fanout.connect("pantry");

    let err = engine
        .create_delivery(chart, MealType::Evening)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(session.try_recv().is_none());

    let listed = engine.list_deliveries(None).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, first.id);
}
