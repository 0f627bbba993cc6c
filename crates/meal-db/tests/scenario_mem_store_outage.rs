//! Fault injection: the store reports `Unavailable` for exactly N calls.

use meal_db::{MemStore, Store, StoreError};

#[tokio::test]
async fn injected_outage_fails_then_recovers() {
    let store = MemStore::new();
    store.inject_outage(2);

    for _ in 0..2 {
        let err = store.list_patients().await.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    assert!(store.list_patients().await.unwrap().is_empty());
}
