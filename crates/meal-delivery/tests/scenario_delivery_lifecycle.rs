//! Delivery lifecycle against the in-memory store: create, update, list,
//! and the events each mutation announces.

use std::sync::Arc;

use chrono::NaiveDate;
use meal_db::{MemStore, Store};
use meal_delivery::{DeliveryEngine, DeliveryError, ErrorKind, Roster, StatusPolicy};
use meal_fanout::{BusMsg, FanOut, Session};
use meal_schemas::{DeliveryStatus, MealPlan, MealType, NewDietChart, NewPatient};
use uuid::Uuid;

struct Desk {
    store: Arc<MemStore>,
    fanout: Arc<FanOut>,
    engine: DeliveryEngine,
    roster: Roster,
}

fn desk() -> Desk {
    let store = Arc::new(MemStore::new());
    let fanout = Arc::new(FanOut::new(64));
    let dyn_store: Arc<dyn Store> = store.clone();
    Desk {
        engine: DeliveryEngine::new(Arc::clone(&dyn_store), Arc::clone(&fanout)),
        roster: Roster::new(dyn_store, Arc::clone(&fanout)),
        store,
        fanout,
    }
}

/// Patient in room 204 with a chart whose morning meal is oatmeal.
async fn seed_chart(desk: &Desk) -> Uuid {
    let patient = desk
        .roster
        .create_patient(NewPatient {
            name: "Ines Duarte".to_string(),
            age: 47,
            gender: "female".to_string(),
            room_number: "204".to_string(),
            bed_number: "B".to_string(),
            floor_number: "2".to_string(),
            contact_information: "555-0101".to_string(),
            emergency_contact: "555-0102".to_string(),
            diseases: vec!["diabetes".to_string()],
            allergies: vec!["peanuts".to_string()],
        })
        .await
        .unwrap();
    desk.roster
        .create_diet_chart(NewDietChart {
            patient_id: patient.id,
            date: NaiveDate::from_ymd_opt(2026, 10, 15).unwrap(),
            morning: MealPlan {
                ingredients: vec!["oatmeal".to_string(), "berries".to_string()],
                instructions: vec!["low sugar".to_string()],
            },
            evening: MealPlan {
                ingredients: vec!["lentil soup".to_string()],
                instructions: vec![],
            },
            night: MealPlan::default(),
        })
        .await
        .unwrap()
        .id
}

fn drain(session: &mut Session) -> Vec<BusMsg> {
    std::iter::from_fn(|| session.try_recv()).collect()
}

#[tokio::test]
async fn create_then_list_shows_preparing() {
    let desk = desk();
    let chart = seed_chart(&desk).await;

    let created = desk.engine.create_delivery(chart, MealType::Morning).await.unwrap();
    assert_eq!(created.status, DeliveryStatus::Preparing);

    let all = desk.engine.list_deliveries(None).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, created.id);
    assert_eq!(all[0].status, DeliveryStatus::Preparing);
}

#[tokio::test]
async fn each_mutation_publishes_one_resolved_event() {
    let desk = desk();
    let chart = seed_chart(&desk).await;
    let mut session = desk.fanout.connect("pantry");

    let created = desk.engine.create_delivery(chart, MealType::Morning).await.unwrap();
    let events = drain(&mut session);
    assert_eq!(events.len(), 1);
    match &events[0] {
        BusMsg::NewDelivery(d) => {
            assert_eq!(d.id, created.id);
            assert_eq!(d.diet_chart.patient.name, "Ines Duarte");
            assert_eq!(d.diet_chart.patient.room_number, "204");
            assert_eq!(d.meal().ingredients, vec!["oatmeal", "berries"]);
            assert_eq!(d.meal().instructions, vec!["low sugar"]);
        }
        other => panic!("expected newDelivery, got {other:?}"),
    }

    desk.engine
        .update_status(created.id, DeliveryStatus::Delivering)
        .await
        .unwrap();
    let events = drain(&mut session);
    assert_eq!(events.len(), 1);
    match &events[0] {
        BusMsg::DeliveryUpdated(d) => {
            assert_eq!(d.status, DeliveryStatus::Delivering);
            assert_eq!(d.diet_chart.patient.room_number, "204");
        }
        other => panic!("expected deliveryUpdated, got {other:?}"),
    }
}

#[tokio::test]
async fn chart_replace_publishes_one_resolved_event() {
    let desk = desk();
    let chart = seed_chart(&desk).await;
    let patient_id = desk.store.resolve_diet_chart(chart).await.unwrap().patient.id;
    let mut session = desk.fanout.connect("manager");

    let replacement = NewDietChart {
        patient_id,
        date: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
        morning: MealPlan {
            ingredients: vec!["rice porridge".to_string()],
            instructions: vec!["no salt".to_string()],
        },
        evening: MealPlan::default(),
        night: MealPlan {
            ingredients: vec!["yogurt".to_string()],
            instructions: vec![],
        },
    };
    let updated = desk
        .roster
        .update_diet_chart(chart, replacement.clone())
        .await
        .unwrap();

    let events = drain(&mut session);
    assert_eq!(events.len(), 1);
    match &events[0] {
        BusMsg::DietChartUpdated(c) => {
            assert_eq!(c, &updated);
            assert_eq!(c.id, chart);
            assert_eq!(c.patient.name, "Ines Duarte");
            assert_eq!(c.patient.room_number, "204");
            assert_eq!(c.morning.ingredients, vec!["rice porridge"]);
            assert_eq!(c.morning.instructions, vec!["no salt"]);
            assert!(c.evening.ingredients.is_empty());
            assert_eq!(c.night.ingredients, vec!["yogurt"]);
        }
        other => panic!("expected dietChartUpdated, got {other:?}"),
    }

    let err = desk
        .roster
        .update_diet_chart(Uuid::new_v4(), replacement)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(drain(&mut session).is_empty());
}

#[tokio::test]
async fn duplicate_pair_is_conflict_and_publishes_nothing() {
    let desk = desk();
    let chart = seed_chart(&desk).await;
    desk.engine.create_delivery(chart, MealType::Evening).await.unwrap();
    let mut session = desk.fanout.connect("pantry");

    let err = desk
        .engine
        .create_delivery(chart, MealType::Evening)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(drain(&mut session).is_empty());

    let for_pair: Vec<_> = desk
        .engine
        .list_deliveries(None)
        .await
        .unwrap()
        .into_iter()
        .filter(|d| d.diet_chart.id == chart && d.meal_type == MealType::Evening)
        .collect();
    assert_eq!(for_pair.len(), 1);
}

#[tokio::test]
async fn create_for_missing_chart_is_not_found() {
    let desk = desk();
    let err = desk
        .engine
        .create_delivery(Uuid::new_v4(), MealType::Night)
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::NotFound(_)));
}

#[tokio::test]
async fn update_unknown_id_is_not_found_and_changes_nothing() {
    let desk = desk();
    let chart = seed_chart(&desk).await;
    let created = desk.engine.create_delivery(chart, MealType::Morning).await.unwrap();
    let mut session = desk.fanout.connect("delivery");

    let err = desk
        .engine
        .update_status(Uuid::new_v4(), DeliveryStatus::Delivered)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(drain(&mut session).is_empty());

    let all = desk.engine.list_deliveries(None).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, created.id);
    assert_eq!(all[0].status, DeliveryStatus::Preparing);
}

#[tokio::test]
async fn consecutive_updates_leave_one_record_with_last_status() {
    let desk = desk();
    let chart = seed_chart(&desk).await;
    let created = desk.engine.create_delivery(chart, MealType::Morning).await.unwrap();

    for s in [
        DeliveryStatus::Ready,
        DeliveryStatus::Delivering,
        DeliveryStatus::Delivered,
    ] {
        desk.engine.update_status(created.id, s).await.unwrap();
    }

    let all = desk.engine.list_deliveries(None).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status, DeliveryStatus::Delivered);
}

#[tokio::test]
async fn pantry_morning_round_trip() {
    // Pantry starts the morning meal for a chart, marks it ready, then a
    // second "start" for the same slot is refused.
    let desk = desk();
    let chart = seed_chart(&desk).await;
    let mut session = desk.fanout.connect("pantry");

    let d = desk.engine.create_delivery(chart, MealType::Morning).await.unwrap();
    assert_eq!(d.status, DeliveryStatus::Preparing);
    drain(&mut session);

    let ready = desk.engine.update_status(d.id, DeliveryStatus::Ready).await.unwrap();
    assert_eq!(ready.status, DeliveryStatus::Ready);
    let events = drain(&mut session);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], BusMsg::DeliveryUpdated(x) if x.id == d.id));

    let again = desk.engine.create_delivery(chart, MealType::Morning).await;
    assert!(matches!(again, Err(DeliveryError::Conflict(_))));
    assert_eq!(desk.engine.list_deliveries(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn lenient_policy_accepts_backward_moves() {
    let desk = desk();
    let chart = seed_chart(&desk).await;
    let d = desk.engine.create_delivery(chart, MealType::Morning).await.unwrap();

    desk.engine.update_status(d.id, DeliveryStatus::Delivered).await.unwrap();
    let back = desk.engine.update_status(d.id, DeliveryStatus::Pending).await.unwrap();
    assert_eq!(back.status, DeliveryStatus::Pending);
}

#[tokio::test]
async fn strict_policy_refuses_backward_moves() {
    let desk = desk();
    let chart = seed_chart(&desk).await;
    let engine = DeliveryEngine::new(desk.store.clone(), Arc::clone(&desk.fanout))
        .with_policy(StatusPolicy::Strict);
    let d = engine.create_delivery(chart, MealType::Night).await.unwrap();

    engine.update_status(d.id, DeliveryStatus::Delivering).await.unwrap();
    engine.update_status(d.id, DeliveryStatus::Delivering).await.unwrap();

    let mut session = desk.fanout.connect("delivery");
    let err = engine.update_status(d.id, DeliveryStatus::Ready).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(drain(&mut session).is_empty());

    let now = engine.list_deliveries(None).await.unwrap();
    assert_eq!(now[0].status, DeliveryStatus::Delivering);
}

#[tokio::test]
async fn list_filters_by_status() {
    let desk = desk();
    let chart = seed_chart(&desk).await;
    let m = desk.engine.create_delivery(chart, MealType::Morning).await.unwrap();
    desk.engine.create_delivery(chart, MealType::Evening).await.unwrap();
    desk.engine.update_status(m.id, DeliveryStatus::Ready).await.unwrap();

    let ready = desk
        .engine
        .list_deliveries(Some(DeliveryStatus::Ready))
        .await
        .unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].meal_type, MealType::Morning);
    assert!(desk
        .engine
        .list_deliveries(Some(DeliveryStatus::Delivered))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn concurrent_creates_for_one_pair_admit_exactly_one() {
    let desk = desk();
    let chart = seed_chart(&desk).await;
    let engine = Arc::new(desk.engine);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let e = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            e.create_delivery(chart, MealType::Morning).await
        }));
    }

    let mut ok = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(DeliveryError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected: {other:?}"),
        }
    }
    assert_eq!((ok, conflicts), (1, 7));
    assert_eq!(engine.list_deliveries(None).await.unwrap().len(), 1);
}
