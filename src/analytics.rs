//! Analytics over the violation log.
//!
//! Everything here is recomputed from the store on every call and never
//! writes to it. Grouping is by whatever labels occur in the log.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::error::MonitorError;
use crate::event::{timestamp_format, ViolationEvent};
use crate::policy::ClassLabelPolicy;
use crate::storage::EventStore;

/// Violations of one label on one calendar day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub label: String,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LabelCount {
    pub label: String,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: u64,
    pub by_label: BTreeMap<String, u64>,
    /// Ordered by date ascending, then label.
    pub daily: Vec<DailyCount>,
    #[serde(with = "timestamp_format")]
    pub first_seen: NaiveDateTime,
    #[serde(with = "timestamp_format")]
    pub last_seen: NaiveDateTime,
    /// Unparseable rows left out of every count.
    pub skipped_rows: usize,
}

impl Summary {
    fn from_events(events: &[ViolationEvent], skipped_rows: usize) -> Option<Self> {
        let first = events.first()?;
        let mut by_label: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_day: BTreeMap<(NaiveDate, &str), u64> = BTreeMap::new();
        let mut first_seen = first.timestamp;
        let mut last_seen = first.timestamp;

        for ev in events {
            *by_label.entry(ev.label.clone()).or_default() += 1;
            *by_day.entry((ev.date(), ev.label.as_str())).or_default() += 1;
            first_seen = first_seen.min(ev.timestamp);
            last_seen = last_seen.max(ev.timestamp);
        }

        let daily = by_day
            .into_iter()
            .map(|((date, label), count)| DailyCount {
                date,
                label: label.to_string(),
                count,
            })
            .collect();

        Some(Self {
            total: events.len() as u64,
            by_label,
            daily,
            first_seen,
            last_seen,
            skipped_rows,
        })
    }

    /// Count for one label; zero when it never occurred.
    pub fn count_for(&self, label: &str) -> u64 {
        self.by_label.get(label).copied().unwrap_or(0)
    }

    /// Fraction of all violations carrying `label`.
    pub fn share(&self, label: &str) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.count_for(label) as f64 / self.total as f64
    }

    /// One count per policy label, in policy order, zeros included.
    pub fn known_counts(&self, policy: &ClassLabelPolicy) -> Vec<LabelCount> {
        policy
            .labels()
            .map(|label| LabelCount {
                label: label.to_string(),
                count: self.count_for(label),
            })
            .collect()
    }
}

/// Summarize the whole log. An empty or missing log is `NoData`.
pub fn summarize(store: &mut dyn EventStore) -> Result<Summary, MonitorError> {
    let stored = store.read_all()?;
    if stored.skipped_rows > 0 {
        log::warn!(
            "{}: skipped {} malformed rows",
            store.describe(),
            stored.skipped_rows
        );
    }
    Summary::from_events(&stored.events, stored.skipped_rows).ok_or_else(|| {
        MonitorError::NoData {
            store: store.describe(),
        }
    })
}

/// The last `limit` rows in append order, or every row when `limit` is `None`.
pub fn recent_events(
    store: &mut dyn EventStore,
    limit: Option<usize>,
) -> Result<Vec<ViolationEvent>, MonitorError> {
    let mut events = store.read_all()?.events;
    if let Some(limit) = limit {
        let skip = events.len().saturating_sub(limit);
        events.drain(..skip);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::parse_timestamp;
    use crate::storage::InMemoryEventStore;

    fn store_with(rows: &[(&str, &str)]) -> InMemoryEventStore {
        let mut store = InMemoryEventStore::new();
        for (ts, label) in rows {
            store
                .append(&ViolationEvent::new(*label, parse_timestamp(ts).unwrap()))
                .unwrap();
        }
        store
    }

    #[test]
    fn empty_store_is_no_data() {
        let mut store = InMemoryEventStore::new();
        let err = summarize(&mut store).unwrap_err();
        assert!(matches!(err, MonitorError::NoData { .. }));
    }

    #[test]
    fn daily_trend_is_ordered_by_date_then_label() {
        let mut store = store_with(&[
            ("2025-03-02 09:00:00", "No Vest"),
            ("2025-03-01 10:00:00", "No Vest"),
            ("2025-03-01 08:00:00", "No Helmet"),
            ("2025-03-02 09:30:00", "No Vest"),
        ]);
        let summary = summarize(&mut store).unwrap();

        let trend: Vec<_> = summary
            .daily
            .iter()
            .map(|d| (d.date.to_string(), d.label.as_str(), d.count))
            .collect();
        assert_eq!(
            trend,
            vec![
                ("2025-03-01".to_string(), "No Helmet", 1),
                ("2025-03-01".to_string(), "No Vest", 1),
                ("2025-03-02".to_string(), "No Vest", 2),
            ]
        );
        assert_eq!(summary.first_seen, parse_timestamp("2025-03-01 08:00:00").unwrap());
        assert_eq!(summary.last_seen, parse_timestamp("2025-03-02 09:30:00").unwrap());
    }

    #[test]
    fn unknown_labels_are_grouped_and_known_labels_default_to_zero() {
        let mut store = store_with(&[
            ("2025-03-01 08:00:00", "No Gloves"),
            ("2025-03-01 08:00:01", "No Helmet"),
        ]);
        let summary = summarize(&mut store).unwrap();

        assert_eq!(summary.count_for("No Gloves"), 1);
        assert_eq!(summary.share("No Helmet"), 0.5);
        let known = summary.known_counts(&ClassLabelPolicy::default());
        assert_eq!(
            known,
            vec![
                LabelCount {
                    label: "No Vest".into(),
                    count: 0
                },
                LabelCount {
                    label: "No Helmet".into(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn recent_events_keeps_the_tail_in_append_order() {
        let mut store = store_with(&[
            ("2025-03-01 08:00:00", "a"),
            ("2025-03-01 08:00:01", "b"),
            ("2025-03-01 08:00:02", "c"),
        ]);
        let tail = recent_events(&mut store, Some(2)).unwrap();
        let labels: Vec<_> = tail.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["b", "c"]);
        assert_eq!(recent_events(&mut store, None).unwrap().len(), 3);
    }
}
