//! MemStore: pair uniqueness, referential checks, joined reads.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use meal_db::{MemStore, Store, StoreError, TransitionGuard};
use meal_schemas::{Delivery, DeliveryStatus, MealPlan, MealType, NewDietChart, NewPatient};
use uuid::Uuid;

fn patient(name: &str, room: &str) -> NewPatient {
    NewPatient {
        name: name.to_string(),
        age: 54,
        gender: "male".to_string(),
        room_number: room.to_string(),
        bed_number: "1".to_string(),
        floor_number: "3".to_string(),
        contact_information: "555-0142".to_string(),
        emergency_contact: "555-0143".to_string(),
        diseases: vec!["hypertension".to_string()],
        allergies: vec!["shellfish".to_string()],
    }
}

fn chart(patient_id: Uuid) -> NewDietChart {
    NewDietChart {
        patient_id,
        date: NaiveDate::from_ymd_opt(2026, 10, 15).unwrap(),
        morning: MealPlan {
            ingredients: vec!["oats".to_string(), "banana".to_string()],
            instructions: vec!["no sugar".to_string()],
        },
        evening: MealPlan::default(),
        night: MealPlan::default(),
    }
}

async fn seeded() -> (MemStore, Uuid) {
    let store = MemStore::new();
    let p = store.insert_patient(patient("Ravi", "312")).await.unwrap();
    let c = store.insert_diet_chart(chart(p.id)).await.unwrap();
    (store, c.id)
}

#[tokio::test]
async fn second_delivery_for_same_pair_is_conflict() {
    let (store, chart_id) = seeded().await;

    store
        .insert_delivery(Delivery::new(chart_id, MealType::Morning, Utc::now()))
        .await
        .unwrap();
    let err = store
        .insert_delivery(Delivery::new(chart_id, MealType::Morning, Utc::now()))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)), "got {err:?}");

    // A different meal slot for the same chart is a different pair.
    store
        .insert_delivery(Delivery::new(chart_id, MealType::Night, Utc::now()))
        .await
        .unwrap();

    assert_eq!(store.list_deliveries(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_inserts_for_one_pair_admit_exactly_one() {
    let (store, chart_id) = seeded().await;
    let store = Arc::new(store);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let s = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            s.insert_delivery(Delivery::new(chart_id, MealType::Evening, Utc::now()))
                .await
        }));
    }

    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(StoreError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(store.list_deliveries(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn delivery_for_missing_chart_is_not_found() {
    let store = MemStore::new();
    let err = store
        .insert_delivery(Delivery::new(Uuid::new_v4(), MealType::Morning, Utc::now()))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn resolved_delivery_carries_patient_and_meal() {
    let (store, chart_id) = seeded().await;
    let d = store
        .insert_delivery(Delivery::new(chart_id, MealType::Morning, Utc::now()))
        .await
        .unwrap();

    let resolved = store.resolve_delivery(d.id).await.unwrap();
    assert_eq!(resolved.diet_chart.patient.name, "Ravi");
    assert_eq!(resolved.diet_chart.patient.room_number, "312");
    assert_eq!(resolved.meal().ingredients, vec!["oats", "banana"]);
    assert_eq!(resolved.status, DeliveryStatus::Preparing);
}

#[tokio::test]
async fn list_filters_by_status() {
    let (store, chart_id) = seeded().await;
    let a = store
        .insert_delivery(Delivery::new(chart_id, MealType::Morning, Utc::now()))
        .await
        .unwrap();
    store
        .insert_delivery(Delivery::new(chart_id, MealType::Evening, Utc::now()))
        .await
        .unwrap();
    store
        .update_delivery_status(a.id, DeliveryStatus::Ready, TransitionGuard::Any)
        .await
        .unwrap();

    let ready = store.list_deliveries(Some(DeliveryStatus::Ready)).await.unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].id, a.id);

    let preparing = store
        .list_deliveries(Some(DeliveryStatus::Preparing))
        .await
        .unwrap();
    assert_eq!(preparing.len(), 1);
    assert_eq!(preparing[0].meal_type, MealType::Evening);
}

#[tokio::test]
async fn forward_only_guard_is_enforced_at_write() {
    let (store, chart_id) = seeded().await;
    let d = store
        .insert_delivery(Delivery::new(chart_id, MealType::Morning, Utc::now()))
        .await
        .unwrap();
    store
        .update_delivery_status(d.id, DeliveryStatus::Delivering, TransitionGuard::ForwardOnly)
        .await
        .unwrap();

    let err = store
        .update_delivery_status(d.id, DeliveryStatus::Ready, TransitionGuard::ForwardOnly)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let after = store.resolve_delivery(d.id).await.unwrap();
    assert_eq!(after.status, DeliveryStatus::Delivering, "refused write must not apply");
}

#[tokio::test]
async fn referenced_records_cannot_be_deleted() {
    let (store, chart_id) = seeded().await;
    let patient_id = store.find_diet_chart(chart_id).await.unwrap().patient_id;

    assert!(matches!(
        store.delete_patient(patient_id).await,
        Err(StoreError::Conflict(_))
    ));

    store
        .insert_delivery(Delivery::new(chart_id, MealType::Morning, Utc::now()))
        .await
        .unwrap();
    assert!(matches!(
        store.delete_diet_chart(chart_id).await,
        Err(StoreError::Conflict(_))
    ));
}

#[tokio::test]
async fn unreferenced_records_delete_cleanly() {
    let store = MemStore::new();
    let p = store.insert_patient(patient("Meera", "101")).await.unwrap();
    let c = store.insert_diet_chart(chart(p.id)).await.unwrap();

    store.delete_diet_chart(c.id).await.unwrap();
    store.delete_patient(p.id).await.unwrap();

    assert!(store.list_patients().await.unwrap().is_empty());
    assert!(matches!(
        store.find_patient(p.id).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn update_patient_keeps_created_at() {
    let store = MemStore::new();
    let p = store.insert_patient(patient("Meera", "101")).await.unwrap();

    let mut changed = patient("Meera", "102");
    changed.allergies.push("gluten".to_string());
    let updated = store.update_patient(p.id, changed).await.unwrap();

    assert_eq!(updated.created_at, p.created_at);
    assert_eq!(updated.room_number, "102");
    assert_eq!(updated.allergies.len(), 2);
}
