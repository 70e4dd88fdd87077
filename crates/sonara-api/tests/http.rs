//! End-to-end HTTP tests over the in-memory gateway stack.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use tempfile::TempDir;
use tower::ServiceExt;

use sonara_api::auth::{
    HEADER_PERMISSIONS, HEADER_ROLES, HEADER_USER_EMAIL, HEADER_USER_ID, HEADER_USER_STATUS,
};
use sonara_api::{ApiServer, ApiState};
use sonara_audit::AuditLog;
use sonara_cache::{EncryptedCache, MemoryCache};
use sonara_config::{
    CacheConfig, LifecycleConfig, ObjectStoreConfig, QuotaConfig, ResilienceConfig, UploadConfig,
};
use sonara_domain::{Track, TrackId, User, UserId, UserStatus, Version};
use sonara_events::{Consumer, EventBus, topics};
use sonara_library::{
    AdminService, PlaylistService, StreamingIssuer, TelemetryIngest, TrackLifecycle,
    UploadCoordinator,
};
use sonara_object::ObjectStore;
use sonara_object::fs::FsObjectStore;
use sonara_resilience::PipelineSet;
use sonara_store::memory::MemoryStore;
use sonara_store::{DocumentStore, Transaction, load_entity};
use sonara_telemetry::Metrics;

const PUBLIC_BASE: &str = "http://api.test";

struct TestApp {
    router: Router,
    store: MemoryStore,
    objects: Arc<FsObjectStore>,
    notifications: Consumer,
    _object_root: TempDir,
}

async fn test_app() -> TestApp {
    let bus = EventBus::new("test");
    let notifications = bus.subscribe(topics::MINIO_EVENTS, "upload-ingestor");

    let object_root = TempDir::new().expect("tempdir");
    let objects = Arc::new(FsObjectStore::new(
        object_root.path(),
        "sonara-audio",
        "signing-secret",
        PUBLIC_BASE,
        bus.clone(),
    ));
    objects.ensure_bucket().await.expect("bucket");

    let store = MemoryStore::new();
    let store_arc: Arc<MemoryStore> = Arc::new(store.clone());
    let pipelines = PipelineSet::from_config(&ResilienceConfig::default());
    let metrics = Metrics::new().expect("metrics");
    let cache = Arc::new(EncryptedCache::new(
        Arc::new(MemoryCache::new()),
        "cache-secret",
        "v1",
    ));

    let upload = Arc::new(UploadCoordinator::new(
        store_arc.clone(),
        objects.clone(),
        pipelines.clone(),
        UploadConfig::default(),
        QuotaConfig::default(),
        metrics.clone(),
    ));
    let streaming = Arc::new(StreamingIssuer::new(
        store_arc.clone(),
        objects.clone(),
        cache,
        pipelines.clone(),
        &ObjectStoreConfig::default(),
        &CacheConfig::default(),
        metrics.clone(),
    ));
    let lifecycle = Arc::new(TrackLifecycle::new(
        store_arc.clone(),
        streaming.clone(),
        pipelines.clone(),
        &LifecycleConfig::default(),
    ));
    let playlists = Arc::new(PlaylistService::new(store_arc.clone(), pipelines.clone()));
    let telemetry = Arc::new(TelemetryIngest::new(Arc::new(bus.clone()), pipelines.clone()));
    let admin = Arc::new(AdminService::new(
        store_arc.clone(),
        Arc::new(AuditLog::new(store_arc)),
        streaming.clone(),
        pipelines,
        &LifecycleConfig::default(),
    ));

    let state = Arc::new(ApiState {
        upload,
        streaming,
        lifecycle,
        playlists,
        telemetry,
        admin,
        object_receiver: Some(objects.clone()),
        metrics,
    });

    TestApp {
        router: ApiServer::new(state).router(),
        store,
        objects,
        notifications,
        _object_root: object_root,
    }
}

async fn seed_user(store: &MemoryStore, used_storage_bytes: u64) -> UserId {
    let user = User {
        id: UserId::generate(),
        normalized_email: "a@x.test".to_string(),
        display_name: "A".to_string(),
        password_hash: "opaque".to_string(),
        status: UserStatus::Active,
        roles: BTreeSet::new(),
        permissions: BTreeSet::new(),
        used_storage_bytes,
        created_at: Utc::now(),
        last_login_at: None,
        version: Version::NEW,
    };
    let mut tx = Transaction::new();
    tx.put(&user).unwrap();
    store.commit(tx).await.unwrap();
    user.id
}

fn authed(request: axum::http::request::Builder, user_id: UserId) -> axum::http::request::Builder {
    request
        .header(HEADER_USER_ID, user_id.to_string())
        .header(HEADER_USER_EMAIL, "a@x.test")
        .header(HEADER_USER_STATUS, "active")
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), 1 << 20).await.expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn unauthenticated_requests_get_a_problem_document() {
    let app = test_app().await;
    let response = app
        .router
        .oneshot(Request::get("/tracks").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/problem+json"
    );
    let body = json_body(response).await;
    assert_eq!(body["status"], 401);
    assert!(body["type"].as_str().unwrap().ends_with("/unauthorized"));
    assert_eq!(body["instance"], "/tracks");
}

#[tokio::test]
async fn initiate_then_direct_put_closes_the_loop() {
    let app = test_app().await;
    let user_id = seed_user(&app.store, 0).await;

    let response = app
        .router
        .clone()
        .oneshot(
            authed(Request::post("/tracks/upload/initiate"), user_id)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "file_name": "a.mp3",
                        "mime": "audio/mpeg",
                        "size": 4_413_068,
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;

    let object_key = body["object_key"].as_str().unwrap().to_string();
    let presigned_url = body["presigned_url"].as_str().unwrap().to_string();
    assert!(body["upload_id"].as_str().unwrap().len() == 26);
    assert!(body["track_id"].as_str().unwrap().len() == 26);
    assert!(object_key.starts_with(&format!("audio/{user_id}/")));
    assert!(presigned_url.starts_with(PUBLIC_BASE));

    // PUT straight to the presigned URL, no principal headers.
    let path_and_query = presigned_url.strip_prefix(PUBLIC_BASE).unwrap().to_string();
    let response = app
        .router
        .clone()
        .oneshot(
            Request::put(&path_and_query)
                .body(Body::from(&b"mp3 bytes"[..]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The store's own notification closes the loop for the ingestor.
    let delivery = app.notifications.try_claim().expect("object-created notification");
    let notification: sonara_events::payloads::ObjectCreated =
        serde_json::from_slice(&delivery.message.payload).unwrap();
    assert_eq!(notification.key, object_key);
    assert_eq!(notification.content_type, "audio/mpeg");
    delivery.ack();
}

#[tokio::test]
async fn signed_get_honours_single_byte_ranges() {
    let app = test_app().await;
    app.objects
        .put_bytes("audio/u/t/c2VlZGVk", b"mp3 bytes", "audio/mpeg")
        .await
        .expect("object seeded");
    let presigned = app
        .objects
        .presign_get("audio/u/t/c2VlZGVk", std::time::Duration::from_secs(120))
        .await
        .expect("presigned");
    let path_and_query = presigned.url.strip_prefix(PUBLIC_BASE).unwrap().to_string();

    // A middle slice comes back as 206 with the slice's Content-Range.
    let response = app
        .router
        .clone()
        .oneshot(
            Request::get(&path_and_query)
                .header(header::RANGE, "bytes=4-8")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 4-8/9"
    );
    let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
    assert_eq!(bytes.as_ref(), b"bytes");

    // A suffix range resolves against the object size.
    let response = app
        .router
        .clone()
        .oneshot(
            Request::get(&path_and_query)
                .header(header::RANGE, "bytes=-4")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 5-8/9"
    );

    // Out-of-bounds ranges are 416 with the mandatory unsatisfied marker.
    let response = app
        .router
        .clone()
        .oneshot(
            Request::get(&path_and_query)
                .header(header::RANGE, "bytes=50-")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes */9"
    );
    let body = json_body(response).await;
    assert!(body["type"].as_str().unwrap().ends_with("/range-not-satisfiable"));
    assert!(body["instance"].as_str().unwrap().starts_with("/objects/"));

    // Multipart ranges are not sliced; the full body is served.
    let response = app
        .router
        .clone()
        .oneshot(
            Request::get(&path_and_query)
                .header(header::RANGE, "bytes=0-1,5-6")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
    assert_eq!(bytes.as_ref(), b"mp3 bytes");
}

#[tokio::test]
async fn tampered_presigned_urls_are_rejected() {
    let app = test_app().await;
    let user_id = seed_user(&app.store, 0).await;

    let response = app
        .router
        .clone()
        .oneshot(
            authed(Request::post("/tracks/upload/initiate"), user_id)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "file_name": "a.mp3",
                        "mime": "audio/mpeg",
                        "size": 100,
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let body = json_body(response).await;
    let presigned_url = body["presigned_url"].as_str().unwrap();
    let path_and_query = presigned_url.strip_prefix(PUBLIC_BASE).unwrap();

    // Grow the signed size cap without re-signing.
    let tampered = path_and_query.replace("size=100", "size=999999");
    let response = app
        .router
        .clone()
        .oneshot(Request::put(&tampered).body(Body::from(&b"x"[..])).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn quota_breach_returns_the_documented_problem() {
    let app = test_app().await;
    let quota = QuotaConfig::default().storage_bytes;
    let user_id = seed_user(&app.store, quota - 10).await;

    let response = app
        .router
        .oneshot(
            authed(Request::post("/tracks/upload/initiate"), user_id)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "file_name": "a.mp3",
                        "mime": "audio/mpeg",
                        "size": 100,
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["type"].as_str().unwrap().ends_with("/quota-exceeded"));
    assert_eq!(body["used"], serde_json::json!(quota - 10));
    assert_eq!(body["quota"], serde_json::json!(quota));
    assert_eq!(body["instance"], "/tracks/upload/initiate");
}

#[tokio::test]
async fn streaming_a_processing_track_conflicts_with_status() {
    let app = test_app().await;
    let user_id = seed_user(&app.store, 0).await;
    let track = Track::new_processing(
        TrackId::generate(),
        user_id,
        "Pending".to_string(),
        None,
        "audio/u/t/s".to_string(),
        "audio/mpeg".to_string(),
        100,
        "c".to_string(),
        Utc::now(),
    );
    let mut tx = Transaction::new();
    tx.put(&track).unwrap();
    app.store.commit(tx).await.unwrap();

    let response = app
        .router
        .oneshot(
            authed(
                Request::post(format!("/tracks/{}/stream", track.id)),
                user_id,
            )
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json_body(response).await;
    assert!(body["type"].as_str().unwrap().ends_with("/track-not-streamable"));
    assert_eq!(body["status"], 409);
    assert_eq!(body["detail"], "track is processing");
}

#[tokio::test]
async fn disabled_accounts_are_blocked_at_the_door() {
    let app = test_app().await;
    let user_id = seed_user(&app.store, 0).await;

    let response = app
        .router
        .oneshot(
            Request::get("/tracks")
                .header(HEADER_USER_ID, user_id.to_string())
                .header(HEADER_USER_EMAIL, "a@x.test")
                .header(HEADER_USER_STATUS, "disabled")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_moderation_requires_the_role_and_audits() {
    let app = test_app().await;
    let owner = seed_user(&app.store, 0).await;
    let admin_id = seed_user(&app.store, 0).await;

    // Seed a Ready track to moderate.
    let mut track = Track::new_processing(
        TrackId::generate(),
        owner,
        "Reported".to_string(),
        None,
        "audio/u/t/s".to_string(),
        "audio/mpeg".to_string(),
        100,
        "c".to_string(),
        Utc::now(),
    );
    track
        .mark_ready(
            sonara_domain::AudioMetadata {
                duration_secs: 10.0,
                sample_rate: 44_100,
                channels: 2,
                codec: "mp3".to_string(),
                bitrate: None,
            },
            "w".to_string(),
            Utc::now(),
        )
        .unwrap();
    let mut tx = Transaction::new();
    tx.put(&track).unwrap();
    app.store.commit(tx).await.unwrap();

    let moderate = serde_json::json!({
        "reason_code": "copyright_claim",
        "reason_text": "claim #42",
    });

    // Without the admin role: forbidden.
    let response = app
        .router
        .clone()
        .oneshot(
            authed(
                Request::post(format!("/admin/tracks/{}/moderate", track.id)),
                owner,
            )
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(moderate.to_string()))
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // With it: the track soft-deletes and the audit trail verifies.
    let response = app
        .router
        .clone()
        .oneshot(
            authed(
                Request::post(format!("/admin/tracks/{}/moderate", track.id)),
                admin_id,
            )
            .header(HEADER_ROLES, "admin")
            .header(HEADER_PERMISSIONS, "audit.read")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(moderate.to_string()))
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored: Track = load_entity(&app.store, &track.id.to_string())
        .await
        .unwrap()
        .expect("track");
    assert_eq!(stored.status, sonara_domain::TrackStatus::Deleted);

    let from = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
    let to = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
    let response = app
        .router
        .oneshot(
            authed(
                Request::post(format!(
                    "/admin/audit/verify?from={}&to={}",
                    urlencode(&from),
                    urlencode(&to)
                )),
                admin_id,
            )
            .header(HEADER_ROLES, "admin")
            .header(HEADER_PERMISSIONS, "audit.read")
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["intact"], true);
    assert_eq!(body["checked"], 1);
}

#[tokio::test]
async fn health_and_metrics_are_public() {
    let app = test_app().await;
    let response = app
        .router
        .clone()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

fn urlencode(raw: &str) -> String {
    raw.replace('+', "%2B").replace(':', "%3A")
}
