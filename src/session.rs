//! Frame loop controller and the session handle operators drive it with.
//!
//! A session is `Idle -> Running -> Idle`. Starting acquires the camera and
//! fails with `DeviceUnavailable` without leaving `Idle`. While running, each
//! iteration captures a frame, detects, classifies, logs every violation,
//! hands the annotated frame to the sink, pauses, then checks the stop flag.
//! A capture failure ends the session. The camera is released on every path
//! back to `Idle`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::config::MonitorConfig;
use crate::detect::{build_detector, normalize_detections, Detector};
use crate::error::MonitorError;
use crate::ingest::{CameraSource, FrameSource};
use crate::logger::{LoggerStats, ViolationLogger};
use crate::overlay::{annotate, FrameSink, NullSink};
use crate::policy::ClassLabelPolicy;
use crate::storage::open_store;

const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(30);

/// Cooperative stop flag, checked once per loop iteration.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
}

/// Why a session returned to `Idle`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SessionEnd {
    Stopped,
    FrameLimit,
    CaptureFailure { frames: u64, error: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub frames: u64,
    pub violations_logged: u64,
    pub log_failures: u64,
    pub suppressed: u64,
    pub end: SessionEnd,
}

impl SessionReport {
    /// The capture failure that ended the session, if any.
    pub fn failure(&self) -> Option<MonitorError> {
        match &self.end {
            SessionEnd::CaptureFailure { frames, error } => Some(MonitorError::CaptureFailure {
                frames: *frames,
                reason: error.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Progress of the running session, or of the last one when idle.
    pub frames: u64,
    pub violations_logged: u64,
    pub last_report: Option<SessionReport>,
}

/// Live counters readable while the loop owns the controller.
#[derive(Debug, Default)]
struct Progress {
    frames: AtomicU64,
    violations_logged: AtomicU64,
}

/// Drives capture -> detect -> classify -> log -> annotate for one camera.
pub struct FrameLoopController {
    camera: Box<dyn FrameSource>,
    detector: Box<dyn Detector>,
    policy: ClassLabelPolicy,
    logger: ViolationLogger,
    sink: Box<dyn FrameSink>,
    frame_delay: Duration,
    frame_limit: Option<u64>,
    progress: Arc<Progress>,
}

/// Releases the camera when dropped, including during unwinding.
struct CameraLease<'a> {
    camera: &'a mut dyn FrameSource,
}

impl Drop for CameraLease<'_> {
    fn drop(&mut self) {
        self.camera.release();
    }
}

impl FrameLoopController {
    pub fn new(
        camera: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
        policy: ClassLabelPolicy,
        logger: ViolationLogger,
    ) -> Self {
        Self {
            camera,
            detector,
            policy,
            logger,
            sink: Box::new(NullSink),
            frame_delay: DEFAULT_FRAME_DELAY,
            frame_limit: None,
            progress: Arc::default(),
        }
    }

    /// Wire up camera, detector, store and policy from configuration.
    pub fn from_config(cfg: &MonitorConfig) -> Result<Self> {
        let camera = CameraSource::new(&cfg.camera)?;
        let detector = build_detector(&cfg.detector)?;
        let logger = ViolationLogger::new(open_store(&cfg.store))
            .with_dedup_window(cfg.dedup_window);
        Ok(Self::new(Box::new(camera), detector, cfg.policy.clone(), logger)
            .with_frame_delay(cfg.frame_delay))
    }

    pub fn with_sink(mut self, sink: Box<dyn FrameSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    /// End the session cleanly after this many frames.
    pub fn with_frame_limit(mut self, limit: Option<u64>) -> Self {
        self.frame_limit = limit;
        self
    }

    pub fn camera_is_open(&self) -> bool {
        self.camera.is_open()
    }

    pub fn logger_stats(&self) -> LoggerStats {
        self.logger.stats()
    }

    /// Run one session to completion on the calling thread.
    ///
    /// Returns `DeviceUnavailable` if the camera cannot be opened; otherwise
    /// a report whose `end` says whether the session was stopped or lost its
    /// camera.
    pub fn run_session(&mut self, stop: &StopSignal) -> Result<SessionReport, MonitorError> {
        self.acquire()?;
        Ok(self.run_acquired(stop))
    }

    fn acquire(&mut self) -> Result<(), MonitorError> {
        if let Err(err) = self.camera.connect() {
            self.camera.release();
            let device = self.camera.stats().device;
            log::error!("camera {} unavailable: {:#}", device, err);
            return Err(MonitorError::DeviceUnavailable {
                device,
                reason: format!("{err:#}"),
            });
        }
        Ok(())
    }

    fn run_acquired(&mut self, stop: &StopSignal) -> SessionReport {
        let Self {
            camera,
            detector,
            policy,
            logger,
            sink,
            frame_delay,
            frame_limit,
            progress,
        } = self;
        let lease = CameraLease {
            camera: camera.as_mut(),
        };
        let before = logger.stats();
        let mut frames = 0u64;
        progress.frames.store(0, Ordering::Relaxed);
        progress.violations_logged.store(0, Ordering::Relaxed);
        log::info!("detection session started on {}", lease.camera.stats().device);

        let end = loop {
            if frame_limit.is_some_and(|limit| frames >= limit) {
                break SessionEnd::FrameLimit;
            }

            let frame = match lease.camera.next_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    log::error!("frame capture failed after {} frames: {:#}", frames, err);
                    break SessionEnd::CaptureFailure {
                        frames,
                        error: format!("{err:#}"),
                    };
                }
            };
            frames += 1;

            let detections = normalize_detections(detector.detect(&frame));
            let labels = policy.classify(detections.iter().map(|det| det.class_id));
            for label in &labels {
                if let Err(err) = logger.log(label, frame.captured_at) {
                    log::warn!("violation '{}' not logged: {}", label, err);
                }
            }

            sink.present(&frame, &annotate(&detections, policy));
            progress.frames.store(frames, Ordering::Relaxed);
            progress
                .violations_logged
                .store(logger.stats().appended - before.appended, Ordering::Relaxed);

            std::thread::sleep(*frame_delay);
            if stop.is_raised() {
                break SessionEnd::Stopped;
            }
        };

        drop(lease);
        sink.clear();

        let after = logger.stats();
        let report = SessionReport {
            frames,
            violations_logged: after.appended - before.appended,
            log_failures: after.failed - before.failed,
            suppressed: after.suppressed - before.suppressed,
            end,
        };
        log::info!(
            "detection session ended ({:?}): frames={} violations={} log_failures={}",
            report.end,
            report.frames,
            report.violations_logged,
            report.log_failures
        );
        report
    }
}

impl Drop for FrameLoopController {
    fn drop(&mut self) {
        self.camera.release();
    }
}

/// Operator-facing handle: `start`, `stop`, `status`.
///
/// The loop runs on a worker thread that owns the controller while the
/// session is `Running`; the controller comes back when the session ends.
pub struct SessionHandle {
    controller: Option<FrameLoopController>,
    progress: Arc<Progress>,
    worker: Option<JoinHandle<(FrameLoopController, SessionReport)>>,
    stop: StopSignal,
    last_report: Option<SessionReport>,
}

impl SessionHandle {
    pub fn new(controller: FrameLoopController) -> Self {
        Self {
            progress: controller.progress.clone(),
            controller: Some(controller),
            worker: None,
            stop: StopSignal::new(),
            last_report: None,
        }
    }

    /// Acquire the camera and start the loop. The camera is opened on the
    /// caller's thread so `DeviceUnavailable` is returned here.
    pub fn start(&mut self) -> Result<(), MonitorError> {
        self.reap()?;
        if self.worker.is_some() {
            return Err(MonitorError::SessionActive);
        }
        let mut controller = self.controller.take().ok_or(MonitorError::LoopPanicked)?;
        if let Err(err) = controller.acquire() {
            self.controller = Some(controller);
            return Err(err);
        }

        self.stop.reset();
        let stop = self.stop.clone();
        self.worker = Some(std::thread::spawn(move || {
            let report = controller.run_acquired(&stop);
            (controller, report)
        }));
        Ok(())
    }

    /// Raise the stop flag and wait for the current iteration to finish.
    /// Returns the report of the session that was stopped, or `None` if no
    /// session was running.
    pub fn stop(&mut self) -> Result<Option<SessionReport>, MonitorError> {
        if self.worker.is_none() {
            return Ok(None);
        }
        self.stop.raise();
        self.join().map(Some)
    }

    /// Block until the running session ends on its own (capture failure or
    /// frame limit).
    pub fn wait(&mut self) -> Result<Option<SessionReport>, MonitorError> {
        if self.worker.is_none() {
            return Ok(None);
        }
        self.join().map(Some)
    }

    pub fn status(&mut self) -> SessionStatus {
        if let Err(err) = self.reap() {
            log::error!("{}", err);
        }
        SessionStatus {
            state: if self.worker.is_some() {
                SessionState::Running
            } else {
                SessionState::Idle
            },
            frames: self.progress.frames.load(Ordering::Relaxed),
            violations_logged: self.progress.violations_logged.load(Ordering::Relaxed),
            last_report: self.last_report.clone(),
        }
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// The controller, while no session is running.
    pub fn controller(&self) -> Option<&FrameLoopController> {
        self.controller.as_ref()
    }

    /// Collect a worker that ended on its own.
    fn reap(&mut self) -> Result<(), MonitorError> {
        if self.worker.as_ref().is_some_and(|worker| worker.is_finished()) {
            self.join()?;
        }
        Ok(())
    }

    fn join(&mut self) -> Result<SessionReport, MonitorError> {
        let worker = self.worker.take().ok_or(MonitorError::LoopPanicked)?;
        let (controller, report) = worker.join().map_err(|_| MonitorError::LoopPanicked)?;
        self.controller = Some(controller);
        self.last_report = Some(report.clone());
        Ok(report)
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop.raise();
            if let Err(err) = self.join() {
                log::error!("{}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ScriptedDetector;
    use crate::ingest::SyntheticCamera;
    use crate::storage::InMemoryEventStore;

    fn controller(device: &str, script: Vec<Vec<u32>>) -> FrameLoopController {
        FrameLoopController::new(
            Box::new(SyntheticCamera::new(device, 4, 4).unwrap()),
            Box::new(ScriptedDetector::new(script)),
            ClassLabelPolicy::default(),
            ViolationLogger::new(Box::new(InMemoryEventStore::new())),
        )
        .with_frame_delay(Duration::ZERO)
    }

    #[test]
    fn run_session_logs_every_violation_per_frame() {
        let mut ctl = controller("stub://t", vec![vec![7, 5], vec![], vec![7, 7]])
            .with_frame_limit(Some(3));
        let report = ctl.run_session(&StopSignal::new()).unwrap();

        assert_eq!(report.frames, 3);
        assert_eq!(report.violations_logged, 4);
        assert_eq!(report.end, SessionEnd::FrameLimit);
        assert!(!ctl.camera_is_open());
    }

    #[test]
    fn unavailable_camera_never_runs() {
        let mut ctl = controller("stub://t?offline=1", vec![vec![7]]);
        let err = ctl.run_session(&StopSignal::new()).unwrap_err();
        assert!(matches!(err, MonitorError::DeviceUnavailable { .. }));
        assert_eq!(ctl.logger_stats().appended, 0);
        assert!(!ctl.camera_is_open());
    }

    #[test]
    fn capture_failure_ends_session_and_releases_camera() {
        let mut ctl = controller("stub://t?frames=4", vec![vec![7]]);
        let report = ctl.run_session(&StopSignal::new()).unwrap();

        assert_eq!(report.frames, 4);
        assert_eq!(report.violations_logged, 4);
        assert!(matches!(
            report.failure(),
            Some(MonitorError::CaptureFailure { frames: 4, .. })
        ));
        assert!(!ctl.camera_is_open());
    }

    #[test]
    fn reports_serialize_with_end_reason_tag() {
        let mut ctl = controller("stub://t?frames=2", vec![vec![7]]);
        let report = ctl.run_session(&StopSignal::new()).unwrap();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["end"]["reason"], "capture_failure");
        assert_eq!(json["end"]["frames"], 2);
        assert!(json["end"]["error"].as_str().unwrap().contains("stub://t"));

        let stopped = serde_json::to_value(SessionEnd::Stopped).unwrap();
        assert_eq!(stopped, serde_json::json!({"reason": "stopped"}));
    }

    #[test]
    fn raised_stop_ends_after_one_iteration() {
        let mut ctl = controller("stub://t", vec![vec![5]]);
        let stop = StopSignal::new();
        stop.raise();
        let report = ctl.run_session(&stop).unwrap();
        assert_eq!(report.frames, 1);
        assert_eq!(report.end, SessionEnd::Stopped);
    }
}
