use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Timestamp column format of the violation log.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One violation occurrence. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationEvent {
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    #[serde(rename = "violation")]
    pub label: String,
}

impl ViolationEvent {
    /// Build an event, truncating the timestamp to whole seconds so it
    /// survives a round trip through the log format unchanged.
    pub fn new(label: impl Into<String>, at: NaiveDateTime) -> Self {
        Self {
            timestamp: truncate_to_seconds(at),
            label: label.into(),
        }
    }

    pub fn now(label: impl Into<String>) -> Self {
        Self::new(label, local_now())
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Wall-clock local time, which is what operators read in the log.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
}

fn truncate_to_seconds(at: NaiveDateTime) -> NaiveDateTime {
    at.with_nanosecond(0).unwrap_or(at)
}

pub(crate) mod timestamp_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(at: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&at.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_drops_subsecond_precision() {
        let at = NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_milli_opt(8, 15, 30, 750)
            .unwrap();
        let ev = ViolationEvent::new("No Helmet", at);
        assert_eq!(ev.formatted_timestamp(), "2025-03-01 08:15:30");
        assert_eq!(parse_timestamp(&ev.formatted_timestamp()).unwrap(), ev.timestamp);
    }

    #[test]
    fn serializes_with_log_column_names() {
        let at = parse_timestamp("2025-03-01 08:15:30").unwrap();
        let json = serde_json::to_value(ViolationEvent::new("No Vest", at)).unwrap();
        assert_eq!(json["timestamp"], "2025-03-01 08:15:30");
        assert_eq!(json["violation"], "No Vest");
    }
}
