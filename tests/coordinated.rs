// tests/coordinated.rs

use std::sync::Arc;
use std::time::Duration;

use clusterauth::clock::ManualClock;
use clusterauth::secret::store::{CoordinationStore, MemoryStore};
use clusterauth::secret::{CoordinatedSecretSource, SecretRecord, SecretSource};
use clusterauth::RequestSigner;
use rand::rngs::StdRng;
use rand::SeedableRng;

async fn source(
    store: Arc<MemoryStore>,
    seed: u64,
    schedule: bool,
) -> Arc<CoordinatedSecretSource> {
    let source = CoordinatedSecretSource::builder(store, "/auth/secret")
        .validity(Duration::from_secs(1))
        .clock(Arc::new(ManualClock::new(0)))
        .rng(StdRng::seed_from_u64(seed))
        .schedule(schedule)
        .init()
        .await
        .unwrap();
    Arc::new(source)
}

#[tokio::test]
async fn test_processes_converge_after_each_rotation() {
    let store = Arc::new(MemoryStore::new());
    let a = source(store.clone(), 1, false).await;
    let b = source(store.clone(), 2, false).await;
    assert_eq!(a.snapshot(), b.snapshot());

    for _ in 0..3 {
        a.roll_secret().await;
        b.roll_secret().await;
        assert_eq!(a.snapshot(), b.snapshot());
        assert_eq!(a.version().await, b.version().await);
    }

    let record = SecretRecord::decode(&store.get("/auth/secret").await.unwrap().data).unwrap();
    assert_eq!(record.current, a.current_secret());
    assert_eq!(record.next_rollover, 4_000);
}

#[tokio::test]
async fn test_cookie_signed_by_one_process_verifies_in_another() {
    let store = Arc::new(MemoryStore::new());
    let a = source(store.clone(), 1, false).await;
    let b = source(store.clone(), 2, false).await;
    let signed = RequestSigner::new(a.clone()).sign("u=bob&p=bob&t=simple&e=1").unwrap();

    a.roll_secret().await;
    b.roll_secret().await;
    // One rotation later the old secret is still accepted.
    assert_eq!(
        RequestSigner::new(b.clone()).verify_and_extract(&signed).unwrap(),
        "u=bob&p=bob&t=simple&e=1"
    );

    a.roll_secret().await;
    b.roll_secret().await;
    let err = RequestSigner::new(b).verify_and_extract(&signed).unwrap_err();
    assert!(err.is_signature());
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_rotation_converges() {
    let store = Arc::new(MemoryStore::new());
    let a = source(store.clone(), 1, true).await;
    let b = source(store.clone(), 2, true).await;
    assert!(a.is_rotating() && b.is_rotating());
    let first = a.current_secret();

    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert_ne!(a.current_secret(), first);
    assert_eq!(a.snapshot(), b.snapshot());
    assert_eq!(a.snapshot().previous(), Some(&first));

    a.close();
    b.close();
    assert!(!a.is_rotating());
}
