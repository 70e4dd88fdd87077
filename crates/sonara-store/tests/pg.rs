//! Postgres-backed store integration tests.
//!
//! These run only when `SONARA_TEST_DATABASE_URL` points at a reachable
//! Postgres and a container runtime is available, mirroring how the rest of
//! the integration suite gates on infrastructure.

use chrono::Utc;
use sonara_domain::{Track, TrackId, UserId, Version};
use sonara_store::pg::PgStore;
use sonara_store::{
    DocumentStore, Entity, Filter, IndexQuery, StoreError, Transaction, load_entity,
    query_entities,
};
use sonara_store::entities::fields;
use sonara_test_support::docker_available;

fn test_database_url() -> Option<String> {
    std::env::var("SONARA_TEST_DATABASE_URL").ok()
}

fn sample_track(user_id: UserId) -> Track {
    Track::new_processing(
        TrackId::generate(),
        user_id,
        "Prelude".to_string(),
        None,
        "audio/u/t/s".to_string(),
        "audio/ogg".to_string(),
        512,
        "beef".to_string(),
        Utc::now(),
    )
}

#[tokio::test]
async fn round_trip_and_conflict_semantics() -> anyhow::Result<()> {
    let Some(url) = test_database_url() else {
        eprintln!("skipping: SONARA_TEST_DATABASE_URL not set");
        return Ok(());
    };
    if !docker_available() {
        eprintln!("skipping: no container runtime");
        return Ok(());
    }

    let store = PgStore::connect(&url).await?;
    let track = sample_track(UserId::generate());

    let mut tx = Transaction::new();
    tx.put(&track)?;
    store.commit(tx).await?;

    let loaded: Track = load_entity(&store, &track.id.to_string())
        .await?
        .expect("present");
    assert_eq!(loaded.version, Version(1));

    // A writer that never reloaded must lose.
    let mut stale = Transaction::new();
    stale.put(&track)?;
    let err = store.commit(stale).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));
    Ok(())
}

#[tokio::test]
async fn indexed_queries_filter_by_owner() -> anyhow::Result<()> {
    let Some(url) = test_database_url() else {
        eprintln!("skipping: SONARA_TEST_DATABASE_URL not set");
        return Ok(());
    };
    if !docker_available() {
        eprintln!("skipping: no container runtime");
        return Ok(());
    }

    let store = PgStore::connect(&url).await?;
    let owner = UserId::generate();
    for _ in 0..2 {
        let mut tx = Transaction::new();
        tx.put(&sample_track(owner))?;
        store.commit(tx).await?;
    }

    let mine: Vec<Track> = query_entities(
        &store,
        IndexQuery::new(Track::COLLECTION)
            .filter(Filter::eq_text(fields::USER_ID, owner.to_string()))
            .fresh()
            .limit(10),
    )
    .await?;
    assert_eq!(mine.len(), 2);
    assert!(mine[0].id <= mine[1].id);
    Ok(())
}
