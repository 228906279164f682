//! Repository layer: entity-scoped database operations.
//!
//! Free functions over a borrowed `Connection`; ids are stored as UUID
//! strings and timestamps as fixed-width RFC 3339 UTC strings so that
//! lexical order matches chronological order.

mod profile;
mod scan;

use chrono::{DateTime, SecondsFormat, Utc};

use super::DatabaseError;

// Re-export all public items from sub-modules
pub use profile::*;
pub use scan::*;

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::CorruptColumn {
            column: column.into(),
            reason: e.to_string(),
        })
}

pub(crate) fn parse_uuid(column: &str, raw: &str) -> Result<uuid::Uuid, DatabaseError> {
    uuid::Uuid::parse_str(raw).map_err(|e| DatabaseError::CorruptColumn {
        column: column.into(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_round_trips_at_microsecond_precision() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let raw = format_timestamp(&ts);
        assert_eq!(raw, "2026-03-14T09:26:53.000000Z");
        assert_eq!(parse_timestamp("created_at", &raw).unwrap(), ts);
    }

    #[test]
    fn formatted_timestamps_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let late = early + chrono::Duration::milliseconds(1500);
        assert!(format_timestamp(&early) < format_timestamp(&late));
    }

    #[test]
    fn garbage_timestamp_is_corrupt_column() {
        let err = parse_timestamp("created_at", "yesterday").unwrap_err();
        assert!(matches!(err, DatabaseError::CorruptColumn { .. }));
    }
}
