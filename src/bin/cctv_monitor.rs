//! cctv_monitor - live camera session with remote person detection.
//!
//! `run` (the default) acquires the camera, polls the classifier and backend
//! state, records an annotated video and uploads it when the session ends.
//! `health` and `recordings` query the backend and exit.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cctv_monitor::{
    config::MonitorConfig, format_uptime, open_camera, BackendClient, FfmpegRecorder,
    RecordingState, SessionController, SessionDeps,
};

const STATUS_EVERY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "CCTV monitor: live detection overlay and session recording")]
struct Args {
    /// Backend base URL.
    #[arg(long, env = "CCTV_API_BASE_URL", global = true)]
    api_base_url: Option<String>,

    /// Camera URL: stub://<name> or an http(s) MJPEG/JPEG endpoint.
    #[arg(long, env = "CCTV_CAMERA_URL", global = true)]
    camera_url: Option<String>,

    /// Do not start recording automatically after the warm-up.
    #[arg(long, global = true)]
    no_record: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long, global = true)]
    duration_secs: Option<u64>,

    /// ffmpeg binary used for recording.
    #[arg(long, env = "CCTV_FFMPEG_PATH", global = true)]
    ffmpeg: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream, detect and record until Ctrl-C (default).
    Run,
    /// Probe the backend health endpoint.
    Health,
    /// List recordings stored by the backend.
    Recordings,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = MonitorConfig::load()?;
    if let Some(url) = &args.api_base_url {
        cfg.api.base_url = url.clone();
    }
    if let Some(url) = &args.camera_url {
        cfg.camera.url = url.clone();
    }
    if let Some(path) = &args.ffmpeg {
        cfg.recording.ffmpeg_path = path.clone();
    }
    if args.no_record {
        cfg.recording.auto_start = false;
    }
    cfg.validate()?;

    let client = Arc::new(BackendClient::new(&cfg.api.base_url, cfg.api.timeout)?);
    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(&cfg, client, args.duration_secs.map(Duration::from_secs)),
        Command::Health => {
            let status = client.health()?;
            println!("{} {}", client.base_url(), status);
            Ok(())
        }
        Command::Recordings => {
            let recordings = client.list_recordings()?;
            if recordings.is_empty() {
                println!("no recordings");
            }
            for entry in recordings {
                println!(
                    "{}\t{} bytes\t{}",
                    entry.filename,
                    entry.size,
                    entry.url.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
    }
}

fn run(cfg: &MonitorConfig, client: Arc<BackendClient>, duration: Option<Duration>) -> Result<()> {
    let camera = open_camera(&cfg.camera.url, cfg.recording.fps)?;
    let deps = SessionDeps {
        camera,
        services: client.clone(),
        classifier: client.clone(),
        recorder: Arc::new(FfmpegRecorder::new(cfg.recording.ffmpeg_path.clone())),
        sink: client.clone(),
    };
    let controller = SessionController::new(deps, cfg.session_settings());

    log::info!(
        "cctv_monitor {} starting: camera={}, backend={}",
        env!("CARGO_PKG_VERSION"),
        cfg.camera.url,
        client.base_url()
    );
    controller
        .start()
        .map_err(|err| anyhow!("session start failed: {}", err))?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {}", err))?;

    let deadline = duration.map(|d| Instant::now() + d);
    loop {
        let wait = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    log::info!("run duration elapsed");
                    break;
                }
                left.min(STATUS_EVERY)
            }
            None => STATUS_EVERY,
        };
        match rx.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received");
                break;
            }
            Err(RecvTimeoutError::Timeout) => log_status(&controller),
        }
    }

    controller.stop();
    controller.recording().wait_finalized();
    match controller.recording().acknowledge() {
        Some(RecordingState::Uploaded(receipt)) => {
            println!(
                "recording uploaded: {} ({} bytes)",
                receipt.filename, receipt.size
            );
        }
        Some(RecordingState::Error(msg)) => println!("recording failed: {}", msg),
        _ => println!("no recording made"),
    }
    let stats = controller.store().stats();
    println!(
        "detections: {} total, {} normal, {} suspicious; alerts: {}",
        stats.total_detections,
        stats.normal_count,
        stats.suspicious_count,
        controller.store().alerts().len()
    );
    Ok(())
}

fn log_status(controller: &SessionController) {
    let store = controller.store();
    let stats = store.stats();
    log::info!(
        "activity={:?} boxes={} recording={:?} uptime={} alerts={}",
        store.activity(),
        store.snapshot().boxes.len(),
        controller.recording().state(),
        format_uptime(stats.uptime),
        store.alerts().len()
    );
}
