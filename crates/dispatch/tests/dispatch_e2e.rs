// End-to-end dispatch against in-process mock workers.
//
// The mocks speak the worker HTTP contract: jobs run for a configurable
// number of status polls, then complete and serve a DASH listing shaped
// like real worker output. Workers are tagged @local so no beam upload
// (and no ffmpeg child) is needed.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use beam_client::{BeamUploader, ClientConfig, create_client};
use beam_proto::SessionId;
use dispatch::{
    BigSplitDispatcher, ChunkedDispatcher, DispatchConfig, DispatchCtx, NullEventSink,
    SingleDispatcher, SwarmDispatcher, WorkerTag, probe_pool,
};
use invocation::ParsedInvocation;
use segmenter::ManifestPoster;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct MockState {
    hw_accel: &'static str,
    fps: f64,
    /// Status polls before a job reports completed.
    polls_to_complete: u32,
    polls: Arc<std::sync::Mutex<std::collections::HashMap<String, u32>>>,
    cancels: Arc<AtomicU32>,
}

impl MockState {
    fn poll(&self, job_id: &str) -> u32 {
        let mut polls = self.polls.lock().unwrap();
        let count = polls.entry(job_id.to_owned()).or_insert(0);
        *count += 1;
        *count
    }
}

/// Listing for one encoded chunk: two video + two audio segments, plus the
/// init segments and the manifest.
fn chunk_listing() -> Vec<&'static str> {
    vec![
        "init-stream0.m4s",
        "init-stream1.m4s",
        "chunk-stream0-00001.m4s",
        "chunk-stream0-00002.m4s",
        "chunk-stream1-00001.m4s",
        "chunk-stream1-00002.m4s",
        "output.mpd",
    ]
}

const MPD: &str = r#"<?xml version="1.0"?><MPD><SegmentTemplate startNumber="1" duration="4"/></MPD>"#;

async fn spawn_worker(state: MockState) -> String {
    let app = Router::new()
        .route(
            "/health",
            get(|State(s): State<MockState>| async move {
                axum::Json(json!({"status": "healthy", "hw_accel": s.hw_accel}))
            }),
        )
        .route(
            "/transcode",
            post(|axum::Json(body): axum::Json<serde_json::Value>| async move {
                let job_id = body["job_id"].as_str().unwrap_or_default().to_owned();
                axum::Json(json!({"job_id": job_id, "status": "queued", "message": "queued"}))
            }),
        )
        .route(
            "/status/{job_id}",
            get(|State(s): State<MockState>, Path(job_id): Path<String>| async move {
                let polls = s.poll(&job_id);
                if polls >= s.polls_to_complete {
                    axum::Json(json!({
                        "status": "completed",
                        "fps": s.fps,
                        "speed": 6.0,
                        "frame": 7200,
                        "out_time_ms": 300_000_000u64,
                        "progress": 100.0
                    }))
                } else {
                    axum::Json(json!({
                        "status": "running",
                        "fps": s.fps,
                        "speed": 6.0,
                        "frame": polls * 100,
                        "out_time_ms": polls as u64 * 1_000_000,
                        "progress": 10.0
                    }))
                }
            }),
        )
        .route(
            "/beam/segments/{job_id}",
            get(|Path(_job_id): Path<String>| async move {
                axum::Json(json!({ "files": chunk_listing() }))
            }),
        )
        .route(
            "/beam/segment/{job_id}/{name}",
            get(|Path((_job, name)): Path<(String, String)>| async move {
                if name == "output.mpd" {
                    MPD.as_bytes().to_vec().into_response()
                } else {
                    format!("bytes-of-{name}").into_bytes().into_response()
                }
            }),
        )
        .route(
            "/job/{job_id}",
            delete(|State(s): State<MockState>, Path(_job): Path<String>| async move {
                s.cancels.fetch_add(1, Ordering::SeqCst);
                StatusCode::OK
            }),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Media-server side: accepts progress and manifest callbacks.
#[derive(Clone, Default)]
struct CallbackState {
    progress_posts: Arc<AtomicU32>,
    manifests: Arc<std::sync::Mutex<Vec<String>>>,
}

async fn spawn_media_server(state: CallbackState) -> String {
    let app = Router::new()
        .route(
            "/callback/progress",
            post(|State(s): State<CallbackState>, body: String| async move {
                assert!(body.contains("progress=continue") || body.contains("progress=end"));
                s.progress_posts.fetch_add(1, Ordering::SeqCst);
                StatusCode::OK
            }),
        )
        .route(
            "/callback/manifest",
            post(|State(s): State<CallbackState>, body: String| async move {
                s.manifests.lock().unwrap().push(body);
                StatusCode::OK
            }),
        )
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn fast_config() -> DispatchConfig {
    DispatchConfig {
        poll_interval: Duration::from_millis(50),
        progressive_interval: Duration::from_millis(100),
        ..DispatchConfig::default()
    }
}

struct Harness {
    ctx: DispatchCtx,
    out_dir: PathBuf,
    callbacks: CallbackState,
    _tmp: tempfile::TempDir,
}

async fn harness(session_tag: &str) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let out_dir = tmp.path().join("out");
    std::fs::create_dir_all(&out_dir).unwrap();

    let callbacks = CallbackState::default();
    let media = spawn_media_server(callbacks.clone()).await;
    let progress_url = format!("{media}/callback/progress");

    let target = out_dir.join("dash");
    let argv: Vec<String> = [
        "-loglevel_plex", "error",
        "-i", "/m/film.mkv",
        "-codec:0", "libx264",
        "-codec:1", "aac_lc",
        "-f", "dash",
        "-seg_duration", "4",
        "-progressurl", progress_url.as_str(),
        target.to_str().unwrap(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    let inv = ParsedInvocation::parse(&argv, tmp.path()).unwrap();

    let client_config = ClientConfig::default();
    let http = create_client(&client_config).unwrap();
    let poster = ManifestPoster::new(http.clone(), inv.manifest_callback_url.clone());
    let uploader = BeamUploader::from_config(&client_config);

    let ctx = DispatchCtx {
        invocation: inv,
        session: SessionId::from_parts(session_tag, std::process::id()),
        config: fast_config(),
        client_config,
        http,
        uploader,
        pull_proxy: None,
        poster,
        events: Arc::new(NullEventSink),
        staging_root: tmp.path().join("staging"),
        token: CancellationToken::new(),
    };

    Harness {
        ctx,
        out_dir,
        callbacks,
        _tmp: tmp,
    }
}

fn mock_state(hw: &'static str, fps: f64, polls_to_complete: u32) -> MockState {
    MockState {
        hw_accel: hw,
        fps,
        polls_to_complete,
        polls: Arc::new(std::sync::Mutex::new(std::collections::HashMap::new())),
        cancels: Arc::new(AtomicU32::new(0)),
    }
}

#[tokio::test]
async fn single_worker_happy_path() {
    let h = harness("20260802T130000").await;
    let worker_url = spawn_worker(mock_state("nvenc", 180.0, 6)).await;

    let entries = vec![(worker_url, WorkerTag::Local)];
    let pool = probe_pool(&entries, &h.ctx.http, &h.ctx.client_config).await;
    assert_eq!(pool.len(), 1);

    let outcome = SingleDispatcher::new(&h.ctx, pool[0].clone())
        .run()
        .await
        .unwrap();
    assert!(outcome.completed);

    // every listed segment landed, numbered from 1 (no skip base)
    for name in chunk_listing() {
        assert!(h.out_dir.join(name).exists(), "missing {name}");
    }

    // both keep-alive channels fired
    assert!(h.callbacks.progress_posts.load(Ordering::SeqCst) >= 1);
    let manifests = h.callbacks.manifests.lock().unwrap();
    assert!(!manifests.is_empty());
    assert!(manifests[0].contains("startNumber=\"1\""));
}

#[tokio::test]
async fn swarm_two_workers_ordered_renumbering() {
    let h = harness("20260802T130100").await;
    // W0 fast (nvenc), W1 slower (qsv): nvenc sorts first and owns chunk 0
    let w0 = spawn_worker(mock_state("nvenc", 200.0, 5)).await;
    let w1 = spawn_worker(mock_state("qsv", 120.0, 12)).await;

    let entries = vec![
        (w1.clone(), WorkerTag::Local),
        (w0.clone(), WorkerTag::Local),
    ];
    let pool = probe_pool(&entries, &h.ctx.http, &h.ctx.client_config).await;
    assert_eq!(pool.len(), 2);
    assert_eq!(pool[0].url, w0, "nvenc worker must rank first");

    // 600 s at 300 s chunks -> 2 chunks
    let outcome = SwarmDispatcher::new(&h.ctx, pool)
        .run(600.0)
        .await
        .unwrap();
    assert!(outcome.completed);

    // chunk 0 numbering starts at 1; chunk 1 continues after chunk 0's two
    // segments per stream
    for name in [
        "init-stream0.m4s",
        "init-stream1.m4s",
        "chunk-stream0-00001.m4s",
        "chunk-stream0-00002.m4s",
        "chunk-stream0-00003.m4s",
        "chunk-stream0-00004.m4s",
        "chunk-stream1-00001.m4s",
        "chunk-stream1-00002.m4s",
        "chunk-stream1-00003.m4s",
        "chunk-stream1-00004.m4s",
        "output.mpd",
    ] {
        assert!(h.out_dir.join(name).exists(), "missing {name}");
    }
    // numbering is contiguous: nothing beyond the expected range
    assert!(!h.out_dir.join("chunk-stream0-00005.m4s").exists());

    let manifests = h.callbacks.manifests.lock().unwrap();
    assert!(!manifests.is_empty(), "manifest must be posted");
}

#[tokio::test]
async fn chunked_mode_fifo_covers_the_timeline() {
    let h = harness("20260802T130300").await;
    let w0 = spawn_worker(mock_state("nvenc", 200.0, 4)).await;
    let w1 = spawn_worker(mock_state("qsv", 120.0, 6)).await;
    let entries = vec![(w0, WorkerTag::Local), (w1, WorkerTag::Local)];
    let pool = probe_pool(&entries, &h.ctx.http, &h.ctx.client_config).await;

    // 900 s -> 3 chunks of 300; two workers cycle through the FIFO
    let outcome = ChunkedDispatcher::new(&h.ctx, pool).run(900.0).await.unwrap();
    assert!(outcome.completed);

    // 3 chunks x 2 segments per stream, contiguous numbering
    for n in 1..=6 {
        let name = format!("chunk-stream0-{n:05}.m4s");
        assert!(h.out_dir.join(&name).exists(), "missing {name}");
    }
    assert!(!h.out_dir.join("chunk-stream0-00007.m4s").exists());
    assert!(h.out_dir.join("init-stream0.m4s").exists());
}

#[tokio::test]
async fn bigsplit_calibrates_then_covers_the_timeline() {
    let h = harness("20260802T130400").await;
    let w0 = spawn_worker(mock_state("nvenc", 200.0, 4)).await;
    let w1 = spawn_worker(mock_state("qsv", 120.0, 6)).await;
    let entries = vec![(w0, WorkerTag::Local), (w1, WorkerTag::Local)];
    let pool = probe_pool(&entries, &h.ctx.http, &h.ctx.client_config).await;

    // calibration probes run first (and are cancelled), then one slice per
    // worker sized by observed fps
    let outcome = BigSplitDispatcher::new(&h.ctx, pool).run(600.0).await.unwrap();
    assert!(outcome.completed);

    for n in 1..=4 {
        let name = format!("chunk-stream0-{n:05}.m4s");
        assert!(h.out_dir.join(&name).exists(), "missing {name}");
    }
    assert!(h.out_dir.join("init-stream0.m4s").exists());
    assert!(h.out_dir.join("output.mpd").exists());
}

#[tokio::test]
async fn swarm_applies_skip_base_to_all_emissions() {
    let mut h = harness("20260802T130200").await;
    // rebuild the invocation with -skip_to_segment 5
    let progress_url = h.ctx.invocation.progress_url.clone().unwrap();
    let target = h.out_dir.join("dash");
    let argv: Vec<String> = [
        "-loglevel_plex", "error",
        "-i", "/m/film.mkv",
        "-codec:0", "libx264",
        "-f", "dash",
        "-progressurl", progress_url.as_str(),
        "-skip_to_segment", "5",
        target.to_str().unwrap(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    h.ctx.invocation = ParsedInvocation::parse(&argv, &h.out_dir).unwrap();

    let w0 = spawn_worker(mock_state("nvenc", 200.0, 4)).await;
    let w1 = spawn_worker(mock_state("qsv", 120.0, 8)).await;
    let entries = vec![(w0, WorkerTag::Local), (w1, WorkerTag::Local)];
    let pool = probe_pool(&entries, &h.ctx.http, &h.ctx.client_config).await;

    let outcome = SwarmDispatcher::new(&h.ctx, pool)
        .run(600.0)
        .await
        .unwrap();
    assert!(outcome.completed);

    // skip base 4: chunk 0 emits 5..6, chunk 1 emits 7..8
    assert!(h.out_dir.join("chunk-stream0-00005.m4s").exists());
    assert!(h.out_dir.join("chunk-stream0-00006.m4s").exists());
    assert!(h.out_dir.join("chunk-stream0-00007.m4s").exists());
    assert!(h.out_dir.join("chunk-stream0-00008.m4s").exists());
    assert!(!h.out_dir.join("chunk-stream0-00001.m4s").exists());

    // the manifest went out with startNumber rewritten
    let manifests = h.callbacks.manifests.lock().unwrap();
    assert!(manifests.iter().any(|m| m.contains("startNumber=\"5\"")));
}
