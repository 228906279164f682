//! Scan persistence boundary.
//!
//! The orchestrator only knows `ScanSink`; the SQLite profile store is one
//! implementation, `MemoryScanSink` another.

use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use super::normalizer::AnalysisResult;
use crate::db::DatabaseError;
use crate::models::ScanRecord;

/// Append-only destination for finished scans.
pub trait ScanSink: Send + Sync {
    fn append_scan(&self, record: &ScanRecord) -> Result<(), DatabaseError>;
}

impl ScanRecord {
    /// Stamp a result with a fresh id and the current time.
    pub fn from_result(
        result: &AnalysisResult,
        profile_id: Uuid,
        image_reference: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            profile_id,
            created_at: Utc::now(),
            risk_level: result.risk_level(),
            hemoglobin_level: result.hemoglobin_level(),
            confidence: result.confidence(),
            recommendations: result.recommendations().to_vec(),
            color_analysis: result.color_analysis().copied(),
            image_reference,
        }
    }
}

/// In-process sink that keeps records in a vector.
#[derive(Default)]
pub struct MemoryScanSink {
    records: Mutex<Vec<ScanRecord>>,
}

impl MemoryScanSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ScanRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl ScanSink for MemoryScanSink {
    fn append_scan(&self, record: &ScanRecord) -> Result<(), DatabaseError> {
        self.records
            .lock()
            .map_err(|_| DatabaseError::LockPoisoned)?
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteProfileStore;
    use crate::pipeline::normalizer::{normalize, RiskPolicy};
    use crate::pipeline::transport::PredictionResponse;

    fn result(hb: f64, anemic: bool) -> AnalysisResult {
        normalize(&PredictionResponse::new(hb, anemic), RiskPolicy::AnemiaFlagGated).unwrap()
    }

    #[test]
    fn record_copies_result_fields() {
        let analysis = result(9.2, true);
        let profile = Uuid::new_v4();
        let record = ScanRecord::from_result(&analysis, profile, Some("/tmp/a.jpg".into()));

        assert_eq!(record.profile_id, profile);
        assert_eq!(record.risk_level, analysis.risk_level());
        assert_eq!(record.hemoglobin_level, 9.2);
        assert_eq!(record.recommendations, analysis.recommendations());
        assert_eq!(record.image_reference.as_deref(), Some("/tmp/a.jpg"));
    }

    #[test]
    fn round_trip_through_sqlite_preserves_result() {
        let store = SqliteProfileStore::open_in_memory().unwrap();
        let profile = store.ensure_default_profile().unwrap();
        let analysis = result(7.2, true);

        let record = ScanRecord::from_result(&analysis, profile.id, None);
        store.append_scan(&record).unwrap();

        let back = &store.scans(&profile.id).unwrap()[0];
        assert_eq!(back.risk_level, analysis.risk_level());
        assert_eq!(back.hemoglobin_level, analysis.hemoglobin_level());
        assert_eq!(back.recommendations, analysis.recommendations());
        assert_eq!(back.confidence, None);
    }

    #[test]
    fn memory_sink_collects_records() {
        let sink = MemoryScanSink::new();
        let record = ScanRecord::from_result(&result(13.0, false), Uuid::new_v4(), None);
        sink.append_scan(&record).unwrap();
        assert_eq!(sink.records(), vec![record]);
    }

    #[test]
    fn sinks_are_object_safe() {
        let _a: Box<dyn ScanSink> = Box::new(MemoryScanSink::new());
        let _b: Box<dyn ScanSink> = Box::new(SqliteProfileStore::open_in_memory().unwrap());
    }
}
