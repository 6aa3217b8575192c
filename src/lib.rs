//! PPEye
//!
//! Real-time PPE compliance monitoring: frames are pulled from a camera, run
//! through an object detector, and every detection whose class the policy
//! marks as a violation is appended to a persistent log. The log is later
//! summarized into per-label counts, a label distribution and a daily trend.
//!
//! # Data flow
//!
//! camera -> [`session::FrameLoopController`] -> [`detect::Detector`] ->
//! [`policy::ClassLabelPolicy`] -> [`logger::ViolationLogger`] ->
//! [`storage::EventStore`] -> [`analytics::summarize`]
//!
//! # Module Structure
//!
//! - `ingest`: Camera sources (synthetic `stub://` devices, V4L2)
//! - `detect`: Detector backends and normalization of their output
//! - `policy`: Class id to violation label table
//! - `logger`, `storage`: Append-only violation log
//! - `session`: The frame loop and its operator handle
//! - `analytics`: Summaries over the log
//! - `api`: Local control and analytics endpoint

pub mod analytics;
pub mod api;
pub mod config;
pub mod detect;
pub mod error;
pub mod event;
pub mod frame;
pub mod ingest;
pub mod logger;
pub mod overlay;
pub mod policy;
pub mod session;
pub mod storage;

pub use analytics::{recent_events, summarize, DailyCount, LabelCount, Summary};
pub use config::{MonitorConfig, StoreBackend};
pub use detect::{DetectedObject, Detector, ScriptedDetector};
pub use error::{MonitorError, StoreError};
pub use event::ViolationEvent;
pub use frame::Frame;
pub use ingest::{CameraSource, CameraStats, FrameSource, SyntheticCamera};
pub use logger::{LogOutcome, LoggerStats, ViolationLogger};
pub use overlay::{Annotation, FrameSink, LogSink, NullSink};
pub use policy::ClassLabelPolicy;
pub use session::{
    FrameLoopController, SessionEnd, SessionHandle, SessionReport, SessionState, SessionStatus,
    StopSignal,
};
pub use storage::{CsvEventStore, EventStore, InMemoryEventStore, SqliteEventStore};
