//! Violation logger: the single writer of the event store.

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDateTime;

use crate::error::MonitorError;
use crate::event::ViolationEvent;
use crate::policy::validate_label;
use crate::storage::EventStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogOutcome {
    Appended,
    /// Dropped because the same label was logged inside the dedup window.
    Suppressed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoggerStats {
    pub appended: u64,
    pub failed: u64,
    pub suppressed: u64,
}

pub struct ViolationLogger {
    store: Box<dyn EventStore>,
    dedup_window: Option<Duration>,
    last_logged: HashMap<String, NaiveDateTime>,
    stats: LoggerStats,
}

impl ViolationLogger {
    pub fn new(store: Box<dyn EventStore>) -> Self {
        Self {
            store,
            dedup_window: None,
            last_logged: HashMap::new(),
            stats: LoggerStats::default(),
        }
    }

    /// Log each label at most once per `window`. Without a window every call
    /// is appended.
    pub fn with_dedup_window(mut self, window: Option<Duration>) -> Self {
        self.dedup_window = window;
        self
    }

    /// Append one violation. A failed append loses this event only; the
    /// caller keeps going. Labels the log cannot store verbatim (empty, or
    /// containing control characters) are rejected before touching the store.
    pub fn log(&mut self, label: &str, at: NaiveDateTime) -> Result<LogOutcome, MonitorError> {
        if let Err(err) = validate_label(label) {
            self.stats.failed += 1;
            return Err(MonitorError::InvalidLabel {
                label: label.to_string(),
                reason: err.to_string(),
            });
        }
        let event = ViolationEvent::new(label, at);
        if self.is_duplicate(&event) {
            self.stats.suppressed += 1;
            return Ok(LogOutcome::Suppressed);
        }

        match self.store.append(&event) {
            Ok(()) => {
                self.stats.appended += 1;
                if self.dedup_window.is_some() {
                    self.last_logged.insert(event.label, event.timestamp);
                }
                Ok(LogOutcome::Appended)
            }
            Err(err) => {
                self.stats.failed += 1;
                Err(MonitorError::IoFailure(err))
            }
        }
    }

    fn is_duplicate(&self, event: &ViolationEvent) -> bool {
        let Some(window) = self.dedup_window else {
            return false;
        };
        let Some(last) = self.last_logged.get(&event.label) else {
            return false;
        };
        // A clock stepping backwards never suppresses.
        match (event.timestamp - *last).to_std() {
            Ok(elapsed) => elapsed < window,
            Err(_) => false,
        }
    }

    pub fn stats(&self) -> LoggerStats {
        self.stats
    }

    pub fn store_mut(&mut self) -> &mut dyn EventStore {
        self.store.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::parse_timestamp;
    use crate::storage::{CsvEventStore, InMemoryEventStore};

    fn at(raw: &str) -> NaiveDateTime {
        parse_timestamp(raw).unwrap()
    }

    #[test]
    fn rows_preserve_call_order() -> anyhow::Result<()> {
        let mut logger = ViolationLogger::new(Box::new(InMemoryEventStore::new()));
        logger.log("No Vest", at("2025-03-01 08:00:02"))?;
        logger.log("No Helmet", at("2025-03-01 08:00:01"))?;
        logger.log("No Helmet", at("2025-03-01 08:00:01"))?;

        let stored = logger.store_mut().read_all()?;
        let labels: Vec<_> = stored.events.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["No Vest", "No Helmet", "No Helmet"]);
        assert_eq!(logger.stats().appended, 3);
        Ok(())
    }

    #[test]
    fn write_failure_is_reported_and_logging_continues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone").join("violations.csv");
        let mut logger = ViolationLogger::new(Box::new(CsvEventStore::new(&path)));

        let err = logger.log("No Helmet", at("2025-03-01 08:00:00")).unwrap_err();
        assert!(matches!(err, MonitorError::IoFailure(_)));
        assert!(!err.is_session_fatal());

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        assert_eq!(
            logger.log("No Helmet", at("2025-03-01 08:00:01")).unwrap(),
            LogOutcome::Appended
        );
        assert_eq!(
            logger.stats(),
            LoggerStats {
                appended: 1,
                failed: 1,
                suppressed: 0
            }
        );
    }

    #[test]
    fn unstorable_labels_are_rejected_and_csv_rows_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("violations.csv");
        let mut logger = ViolationLogger::new(Box::new(CsvEventStore::new(&path)));

        for bad in ["No\nHelmet", "No Vest\r", "", "   "] {
            let err = logger.log(bad, at("2025-03-01 08:00:00")).unwrap_err();
            assert!(matches!(err, MonitorError::InvalidLabel { .. }), "{bad:?}");
            assert!(!err.is_session_fatal());
        }
        logger.log("\"x\" y", at("2025-03-01 08:00:01"))?;
        logger.log("No Helmet, left", at("2025-03-01 08:00:02"))?;
        logger.log(" padded ", at("2025-03-01 08:00:03"))?;

        let stored = CsvEventStore::new(&path).read_all()?;
        let labels: Vec<_> = stored.events.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["\"x\" y", "No Helmet, left", " padded "]);
        assert_eq!(stored.skipped_rows, 0);
        assert_eq!(
            logger.stats(),
            LoggerStats {
                appended: 3,
                failed: 4,
                suppressed: 0
            }
        );
        Ok(())
    }

    #[test]
    fn empty_label_never_reaches_the_store() {
        let mut logger = ViolationLogger::new(Box::new(InMemoryEventStore::new()));
        assert!(logger.log("", at("2025-03-01 08:00:00")).is_err());
        assert!(logger.store_mut().read_all().unwrap().events.is_empty());
    }

    #[test]
    fn dedup_window_suppresses_repeats_per_label() -> anyhow::Result<()> {
        let mut logger = ViolationLogger::new(Box::new(InMemoryEventStore::new()))
            .with_dedup_window(Some(Duration::from_secs(5)));

        assert_eq!(logger.log("No Helmet", at("2025-03-01 08:00:00"))?, LogOutcome::Appended);
        assert_eq!(logger.log("No Helmet", at("2025-03-01 08:00:04"))?, LogOutcome::Suppressed);
        assert_eq!(logger.log("No Vest", at("2025-03-01 08:00:04"))?, LogOutcome::Appended);
        assert_eq!(logger.log("No Helmet", at("2025-03-01 08:00:05"))?, LogOutcome::Appended);
        assert_eq!(logger.log("No Helmet", at("2025-03-01 07:59:00"))?, LogOutcome::Appended);

        assert_eq!(logger.stats().suppressed, 1);
        assert_eq!(logger.store_mut().read_all()?.events.len(), 4);
        Ok(())
    }
}
