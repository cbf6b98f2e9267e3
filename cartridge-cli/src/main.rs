//! The cartridge: the binary sitting where the media server expects its
//! transcoder.
//!
//! One invocation, one session: parse the transcoder argv, try the worker
//! pool (multi, then single), and fall back to running the real transcoder
//! locally — GPU-rewritten when the host has one. Exit code 0 whenever any
//! dispatch strategy emitted output; the local transcoder's own exit code
//! when the fallback ran; 1 on configuration errors with no fallback.

mod config;
mod error;
mod logging;
mod session;

use std::path::PathBuf;
use std::sync::Arc;

use beam_client::{BeamUploader, ClientConfig, PullProxyClient, create_client};
use dispatch::{
    BigSplitDispatcher, ChunkedDispatcher, DispatchConfig, DispatchCtx, DispatchOutcome,
    EventSink, MultiMode, ProgressReporter, SingleDispatcher, SwarmDispatcher, Worker,
    parse_pool_spec, probe_duration, probe_pool,
};
use invocation::ParsedInvocation;
use localrun::{GpuKind, SelfHeal, detect_gpu, rewrite_for_gpu, run_local, wants_gpu_rewrite};
use segmenter::ManifestPoster;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::session::Session;

#[tokio::main]
async fn main() {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let code = run(argv).await;
    std::process::exit(code);
}

async fn run(argv: Vec<String>) -> i32 {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("cartridge: {e}");
            return 1;
        }
    };
    let session = match Session::create(&config.state_dir) {
        Ok(session) => Arc::new(session),
        Err(e) => {
            eprintln!("cartridge: cannot create session state: {e}");
            return 1;
        }
    };
    let _log_guard = logging::init(&session.dir, &config.log_filter);
    session.narrative(&format!("cartridge start, {} args", argv.len()));

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let inv = match ParsedInvocation::parse(&argv, &cwd) {
        Ok(inv) => inv,
        Err(e) => {
            // Argument errors are surfaced as a single stderr line.
            eprintln!("cartridge: {e}");
            session.log_event("config_error", serde_json::json!({ "error": e.to_string() }));
            session.append_master("none", 1);
            return 1;
        }
    };
    session.write_json(
        "01_job_request.json",
        &serde_json::to_value(&inv).unwrap_or_default(),
    );

    // Self-heal guards the interception point on Plex deployments before
    // anything else runs.
    let mut real_transcoder: Option<PathBuf> = None;
    if let Some(backup) = &config.real_transcoder {
        let heal = SelfHeal::new(backup.clone(), config.state_dir.clone());
        match heal.locate_transcoder() {
            Ok(path) => {
                if let Err(e) = heal.check_fingerprint(&path) {
                    warn!(error = %e, "fingerprint bookkeeping failed");
                }
                real_transcoder = Some(path);
            }
            Err(e) if inv.is_plex_dialect => {
                error!(error = %e, "self-heal failed, no transcoder to fall back to");
                session.log_event("selfheal_fatal", serde_json::json!({ "error": e.to_string() }));
                eprintln!("cartridge: {e}");
                session.append_master("none", 1);
                return 1;
            }
            Err(e) => warn!(error = %e, "no backup transcoder (non-Plex source)"),
        }
    }

    let client_config = ClientConfig {
        api_key: config.api_key.clone(),
        upload_rate_limit: config.upload_rate,
        ffmpeg_path: config.ffmpeg.clone(),
        ..ClientConfig::default()
    };
    let http = match create_client(&client_config) {
        Ok(http) => http,
        Err(e) => {
            eprintln!("cartridge: http client: {e}");
            session.append_master("none", 1);
            return 1;
        }
    };

    let pull_proxy = config.pull_proxy_url.as_deref().and_then(|url| {
        PullProxyClient::new(url, http.clone(), client_config.clone())
            .inspect_err(|e| warn!(error = %e, "pull proxy misconfigured"))
            .ok()
    });

    let dispatch_config = DispatchConfig {
        mode: config.multi_mode,
        chunk_duration: config.chunk_duration,
        staged_upload: config.staged_upload,
        beam_direct: config.beam_direct,
        real_transcoder: real_transcoder.clone(),
        ..DispatchConfig::default()
    };

    let token = CancellationToken::new();
    spawn_signal_handlers(token.clone());

    let ctx = DispatchCtx {
        session: session.id.clone(),
        config: dispatch_config,
        client_config: client_config.clone(),
        http: http.clone(),
        uploader: BeamUploader::from_config(&client_config),
        pull_proxy,
        poster: ManifestPoster::new(http.clone(), inv.manifest_callback_url.clone()),
        events: session.clone() as Arc<dyn EventSink>,
        staging_root: session.staging_root(),
        invocation: inv,
        token: token.clone(),
    };

    // Assemble and probe the pool.
    let mut entries = Vec::new();
    if let Some(spec) = &config.worker_pool {
        match parse_pool_spec(spec) {
            Ok(parsed) => entries.extend(parsed),
            Err(e) => {
                // unparseable pool spec is a config error: fatal
                error!(error = %e, "pool spec unparseable");
                eprintln!("cartridge: {e}");
                session.append_master("none", 1);
                return 1;
            }
        }
    }
    if let Some(single) = &config.single_worker_url {
        if !entries.iter().any(|(url, _)| url == single) {
            entries.push((single.clone(), dispatch::WorkerTag::Remote));
        }
    }
    let pool = if entries.is_empty() {
        Vec::new()
    } else {
        probe_pool(&entries, &ctx.http, &ctx.client_config).await
    };
    session.write_json(
        "02_job_response.json",
        &serde_json::json!({
            "live_workers": pool.iter().map(|w| w.url.clone()).collect::<Vec<_>>(),
            "mode": format!("{:?}", config.multi_mode),
        }),
    );

    let (strategy, code) = dispatch_ladder(&ctx, &session, &config, pool, real_transcoder).await;

    sweep_pull_dir(&config, &session);
    token.cancel();
    session.append_master(strategy, code);
    session.narrative(&format!("cartridge exit strategy={strategy} code={code}"));
    code
}

/// Multi -> single -> local. Returns the strategy that decided the exit
/// code, and the code.
async fn dispatch_ladder(
    ctx: &DispatchCtx,
    session: &Arc<Session>,
    config: &Config,
    pool: Vec<Worker>,
    real_transcoder: Option<PathBuf>,
) -> (&'static str, i32) {
    if pool.len() >= 2 {
        let duration =
            probe_duration(&config.ffprobe, &ctx.invocation.input_path, &pool).await;
        match duration {
            Some(duration) => {
                let (name, result) = match config.multi_mode {
                    MultiMode::Simple => (
                        "chunked",
                        ChunkedDispatcher::new(ctx, pool.clone()).run(duration).await,
                    ),
                    MultiMode::BigSplit => (
                        "bigsplit",
                        BigSplitDispatcher::new(ctx, pool.clone()).run(duration).await,
                    ),
                    MultiMode::Swarm => (
                        "swarm",
                        SwarmDispatcher::new(ctx, pool.clone()).run(duration).await,
                    ),
                };
                match result {
                    Ok(outcome) => {
                        record_outcome(session, name, &outcome);
                        if outcome.emitted_any {
                            return (name, 0);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "multi-worker dispatch failed, trying single");
                        session.log_event(
                            "multi_failed",
                            serde_json::json!({ "mode": name, "error": e.to_string() }),
                        );
                    }
                }
            }
            None => {
                warn!("duration unknown, skipping multi-worker dispatch");
            }
        }
    }

    if let Some(worker) = pool.first() {
        match SingleDispatcher::new(ctx, worker.clone()).run().await {
            Ok(outcome) => {
                record_outcome(session, "single", &outcome);
                if outcome.emitted_any {
                    return ("single", 0);
                }
            }
            Err(e) => {
                warn!(error = %e, "single-worker dispatch failed, falling back locally");
                session.log_event(
                    "single_failed",
                    serde_json::json!({ "error": e.to_string() }),
                );
            }
        }
    }

    local_fallback(ctx, session, config, real_transcoder).await
}

async fn local_fallback(
    ctx: &DispatchCtx,
    session: &Arc<Session>,
    config: &Config,
    real_transcoder: Option<PathBuf>,
) -> (&'static str, i32) {
    let inv = &ctx.invocation;
    let gpu = detect_gpu();

    if let Some(gpu) = gpu {
        if wants_gpu_rewrite(&inv.raw_args) {
            let args = rewrite_for_gpu(&inv.raw_args, gpu);
            session.log_event(
                "local_gpu_rewrite",
                serde_json::json!({
                    "gpu": match gpu { GpuKind::Nvenc => "nvenc", GpuKind::Qsv => "qsv" },
                }),
            );
            // The rewritten argv targets the system encoder; the Plex
            // dialect (including -progressurl) is stripped, so the forged
            // keep-alive loop covers the progress channel.
            let reporter = ProgressReporter::new(ctx.http.clone(), inv.progress_url.clone());
            let keepalive_token = ctx.token.child_token();
            let keepalive = reporter.spawn_loop(keepalive_token.clone());
            let result = run_local(std::path::Path::new(&config.ffmpeg), &args).await;
            keepalive_token.cancel();
            let _ = keepalive.await;
            reporter.emit_terminal().await;
            match result {
                Ok(code) => {
                    info!(code, "local GPU transcode finished");
                    record_exit(session, "local-gpu", code);
                    return ("local-gpu", code);
                }
                Err(e) => {
                    error!(error = %e, "local GPU transcode failed to start");
                    session.log_event(
                        "local_gpu_failed",
                        serde_json::json!({ "error": e.to_string() }),
                    );
                }
            }
        }
    }

    if let Some(transcoder) = real_transcoder {
        // verbatim argv: the real transcoder understands its own dialect
        match run_local(&transcoder, &inv.raw_args).await {
            Ok(code) => {
                info!(code, "real transcoder finished");
                record_exit(session, "local", code);
                return ("local", code);
            }
            Err(e) => {
                error!(error = %e, "real transcoder failed to start");
                session.log_event(
                    "local_failed",
                    serde_json::json!({ "error": e.to_string() }),
                );
            }
        }
    }

    error!("every dispatch strategy failed and no local fallback is available");
    ("none", 1)
}

fn record_outcome(session: &Arc<Session>, strategy: &str, outcome: &DispatchOutcome) {
    let name = if outcome.completed || outcome.emitted_any {
        "03_job_completed.json"
    } else {
        "03_job_failed.json"
    };
    session.write_json(
        name,
        &serde_json::json!({
            "strategy": strategy,
            "completed": outcome.completed,
            "emitted_any": outcome.emitted_any,
        }),
    );
}

fn record_exit(session: &Arc<Session>, strategy: &str, code: i32) {
    let name = if code == 0 {
        "03_job_completed.json"
    } else {
        "03_job_failed.json"
    };
    session.write_json(
        name,
        &serde_json::json!({ "strategy": strategy, "exit_code": code }),
    );
}

/// Remove this session's staged objects under `PLEXBEAM_PULL_DIR`.
fn sweep_pull_dir(config: &Config, session: &Arc<Session>) {
    let Some(pull_dir) = &config.pull_dir else { return };
    let Ok(entries) = std::fs::read_dir(pull_dir) else { return };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(session.id.as_str()) {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                warn!(file = %entry.path().display(), error = %e, "pull dir sweep failed");
            }
        }
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling session");
                token.cancel();
            }
        }
    });
    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut term) = signal(SignalKind::terminate()) {
            term.recv().await;
            warn!("SIGTERM received, cancelling session");
            token.cancel();
        }
    });
}
