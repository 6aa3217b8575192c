//! ppeyed - PPE monitoring daemon
//!
//! This daemon:
//! 1. Loads configuration (file named by PPEYE_CONFIG plus PPEYE_* overrides)
//! 2. Serves the local control/analytics API
//! 3. Runs a detection session that logs every violation to the event store
//! 4. Stops the session and releases the camera on Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ppeye::{
    api::{ApiConfig, ApiServer},
    FrameLoopController, LogSink, MonitorConfig, SessionHandle, SessionReport, SessionState,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "PPEYE_CONFIG")]
    config: Option<PathBuf>,
    /// Serve the API but wait for an operator to start the session.
    #[arg(long)]
    idle: bool,
    /// End the session after this many frames.
    #[arg(long, value_name = "N")]
    frames: Option<u64>,
    /// Do not serve the control API.
    #[arg(long)]
    no_api: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.idle && args.no_api {
        return Err(anyhow!("--idle needs the control api to start a session"));
    }
    let cfg = MonitorConfig::load_from(args.config.as_deref())?;

    let controller = FrameLoopController::from_config(&cfg)?
        .with_sink(Box::new(LogSink))
        .with_frame_limit(args.frames);
    let session = Arc::new(Mutex::new(SessionHandle::new(controller)));

    let api_handle = if args.no_api {
        None
    } else {
        let handle =
            ApiServer::new(ApiConfig::from_monitor_config(&cfg), session.clone()).spawn()?;
        Some(handle)
    };

    log::info!(
        "ppeyed running. camera={} store={} policy={:?}",
        cfg.camera.device,
        cfg.store.path.display(),
        cfg.policy.labels().collect::<Vec<_>>()
    );

    let stop = lock(&session)?.stop_signal();
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        stop.raise();
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    if !args.idle {
        let started = lock(&session)?.start();
        if let Err(err) = started {
            if api_handle.is_none() {
                return Err(err.into());
            }
            log::error!("session not started: {}; waiting for an operator", err);
        }
    }

    loop {
        match rx.recv_timeout(HEALTH_LOG_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received, stopping session...");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        let status = lock(&session)?.status();
        log::info!(
            "session={:?} frames={} violations={}",
            status.state,
            status.frames,
            status.violations_logged
        );
        // Without the API nobody can restart a session that ended on its own.
        if api_handle.is_none() && status.state == SessionState::Idle {
            break;
        }
    }

    let report = {
        let mut guard = lock(&session)?;
        match guard.stop()? {
            Some(report) => Some(report),
            None => guard.status().last_report,
        }
    };
    if let Some(handle) = api_handle {
        handle.stop()?;
    }

    match report {
        Some(report) => finish(report),
        None => {
            log::info!("no detection session ran");
            Ok(())
        }
    }
}

fn finish(report: SessionReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&report)?);
    match report.failure() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn lock(session: &Mutex<SessionHandle>) -> Result<std::sync::MutexGuard<'_, SessionHandle>> {
    session
        .lock()
        .map_err(|_| anyhow!("session lock poisoned"))
}
