//! Full-pipeline test over the wired process: initiate an upload through
//! the API, PUT bytes to the presigned URL, let the ingestor and analyzer
//! workers carry the track to Ready, and stream it.
//!
//! External binaries are stubbed so the suite runs anywhere with a shell;
//! the stubs honour the real invocation contract (JSON on stdout for the
//! prober, a PCM file at the last argument for the decoder).

#![cfg(unix)]

use std::collections::BTreeSet;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use tower::ServiceExt;

use sonara_app::build;
use sonara_config::AppConfig;
use sonara_domain::{Track, TrackStatus, User, UserId, UserStatus, Version};
use sonara_store::{Transaction, load_entity};

const PUBLIC_BASE: &str = "http://api.test";

const PROBE_JSON: &str = r#"{
    "streams": [{"codec_type": "audio", "codec_name": "mp3", "sample_rate": "44100", "channels": 2}],
    "format": {"duration": "221.4", "bit_rate": "160000"}
}"#;

fn write_stub(dir: &std::path::Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("stub written");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("stub mode");
    path.to_string_lossy().into_owned()
}

fn pipeline_config(root: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.http_port = 0;
    config.object_store.root = root.join("objects");
    config.object_store.public_base_url = PUBLIC_BASE.to_string();
    config.object_store.signing_secret = "pipeline-signing".to_string();
    config.cache.encryption_secret = "pipeline-cache".to_string();
    config.analyzer.temp_dir = root.join("scratch");
    config.analyzer.ffprobe_bin = write_stub(
        root,
        "ffprobe-stub",
        &format!("#!/bin/sh\ncat <<'JSON'\n{PROBE_JSON}\nJSON\n"),
    );
    config.analyzer.ffmpeg_bin = write_stub(
        root,
        "ffmpeg-stub",
        "#!/bin/sh\nfor last in \"$@\"; do :; done\ndd if=/dev/zero of=\"$last\" bs=1 count=4000 2>/dev/null\n",
    );
    config.outbox.poll_interval_ms = 50;
    config
}

async fn seed_user(store: &dyn sonara_store::DocumentStore) -> UserId {
    let user = User {
        id: UserId::generate(),
        normalized_email: "a@x.test".to_string(),
        display_name: "A".to_string(),
        password_hash: "opaque".to_string(),
        status: UserStatus::Active,
        roles: BTreeSet::new(),
        permissions: BTreeSet::new(),
        used_storage_bytes: 0,
        created_at: Utc::now(),
        last_login_at: None,
        version: Version::NEW,
    };
    let mut tx = Transaction::new();
    tx.put(&user).expect("serializable");
    store.commit(tx).await.expect("seed user");
    user.id
}

fn authed(builder: axum::http::request::Builder, user_id: UserId) -> axum::http::request::Builder {
    builder
        .header("x-sonara-user-id", user_id.to_string())
        .header("x-sonara-user-email", "a@x.test")
        .header("x-sonara-user-status", "active")
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), 1 << 20).await.expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn upload_processing_streaming_round_trip() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let config = pipeline_config(root.path());
    let handles = build(&config).await?;
    let router = handles.api.router();
    let user_id = seed_user(handles.store.as_ref()).await;

    // 1. Initiate: reserved identities and a presigned PUT.
    let response = router
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
                ))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let initiated = json_body(response).await;
    let track_id = initiated["track_id"].as_str().unwrap().to_string();
    let presigned = initiated["presigned_url"].as_str().unwrap().to_string();

    // 2. Direct PUT: bytes go to the store, not through the API handlers.
    let path_and_query = presigned.strip_prefix(PUBLIC_BASE).unwrap().to_string();
    let response = router
        .clone()
        .oneshot(Request::put(&path_and_query).body(Body::from(&b"mp3 bytes"[..]))?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    // 3. Notification → ingestor → outbox → analyzer. Poll until Ready.
    let mut track: Option<Track> = None;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let loaded: Option<Track> = load_entity(handles.store.as_ref(), &track_id).await?;
        if let Some(loaded) = loaded
            && loaded.status == TrackStatus::Ready
        {
            track = Some(loaded);
            break;
        }
    }
    let track = track.expect("track reached Ready within the deadline");
    assert!(track.processed_at.is_some());
    assert!(track.waveform_object_key.is_some());
    let metadata = track.metadata.as_ref().expect("metadata recorded");
    assert!((metadata.duration_secs - 221.4).abs() < 1e-6);

    let owner: User = load_entity(handles.store.as_ref(), &user_id.to_string())
        .await?
        .expect("owner");
    assert_eq!(owner.used_storage_bytes, 9);

    // 4. Stream: a signed GET bounded by the configured TTL.
    let response = router
        .clone()
        .oneshot(authed(Request::post(format!("/tracks/{track_id}/stream")), user_id).body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let grant = json_body(response).await;
    assert_eq!(grant["supports_range"], true);
    assert_eq!(grant["mime"], "audio/mpeg");
    let stream_url = grant["stream_url"].as_str().unwrap().to_string();

    // 5. The streamed bytes are the uploaded bytes.
    let stream_path = stream_url.strip_prefix(PUBLIC_BASE).unwrap().to_string();
    let response = router
        .clone()
        .oneshot(Request::get(&stream_path).body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), 1 << 20).await?;
    assert_eq!(bytes.as_ref(), b"mp3 bytes");

    // A seek: the advertised range support is real.
    let response = router
        .clone()
        .oneshot(
            Request::get(&stream_path)
                .header(header::RANGE, "bytes=4-8")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 4-8/9"
    );
    let sliced = to_bytes(response.into_body(), 1 << 20).await?;
    assert_eq!(sliced.as_ref(), b"bytes");

    // 6. Delete → restore inside the grace window brings it back.
    let response = router
        .clone()
        .oneshot(authed(Request::delete(format!("/tracks/{track_id}")), user_id).body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router
        .clone()
        .oneshot(
            authed(Request::post(format!("/tracks/{track_id}/restore")), user_id)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let restored = json_body(response).await;
    assert_eq!(restored["status"], "ready");

    handles.shutdown.send(true)?;
    for worker in handles.workers {
        let _ = tokio::time::timeout(Duration::from_secs(5), worker).await;
    }
    Ok(())
}
