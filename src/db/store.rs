use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use uuid::Uuid;

use super::repository;
use super::sqlite::{open_database, open_memory_database};
use super::DatabaseError;
use crate::models::{NewProfile, Profile, ProfileSummary, ScanRecord};
use crate::pipeline::persistence::ScanSink;

/// Profile/scan store owning one SQLite connection.
///
/// All access is serialized through the mutex, so the store can be shared
/// between the orchestrator and the CLI front end.
pub struct SqliteProfileStore {
    conn: Mutex<Connection>,
}

impl SqliteProfileStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: Mutex::new(open_database(path)?),
        })
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: Mutex::new(open_memory_database()?),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    pub fn ensure_default_profile(&self) -> Result<Profile, DatabaseError> {
        repository::ensure_default_profile(&*self.conn()?)
    }

    pub fn list_profiles(&self) -> Result<Vec<Profile>, DatabaseError> {
        repository::list_profiles(&*self.conn()?)
    }

    pub fn get_profile(&self, id: &Uuid) -> Result<Option<Profile>, DatabaseError> {
        repository::get_profile(&*self.conn()?, id)
    }

    pub fn create_profile(&self, new: &NewProfile) -> Result<Profile, DatabaseError> {
        repository::create_profile(&*self.conn()?, new)
    }

    pub fn rename_profile(&self, id: &Uuid, name: &str) -> Result<(), DatabaseError> {
        repository::rename_profile(&*self.conn()?, id, name)
    }

    pub fn delete_profile(&self, id: &Uuid) -> Result<(), DatabaseError> {
        repository::delete_profile(&*self.conn()?, id)
    }

    pub fn scans(&self, profile_id: &Uuid) -> Result<Vec<ScanRecord>, DatabaseError> {
        repository::list_scans_for_profile(&*self.conn()?, profile_id)
    }

    pub fn summary(&self, profile_id: &Uuid) -> Result<ProfileSummary, DatabaseError> {
        repository::profile_summary(&*self.conn()?, profile_id)
    }
}

impl ScanSink for SqliteProfileStore {
    fn append_scan(&self, record: &ScanRecord) -> Result<(), DatabaseError> {
        repository::insert_scan(&*self.conn()?, record)?;
        tracing::info!(
            scan_id = %record.id,
            profile_id = %record.profile_id,
            risk = record.risk_level.as_str(),
            "Scan saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskLevel;

    #[test]
    fn store_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SqliteProfileStore>();
    }

    #[test]
    fn appended_scan_shows_up_in_history() {
        let store = SqliteProfileStore::open_in_memory().unwrap();
        let profile = store.ensure_default_profile().unwrap();

        let record = ScanRecord {
            id: Uuid::new_v4(),
            profile_id: profile.id,
            created_at: chrono::Utc::now(),
            risk_level: RiskLevel::Low,
            hemoglobin_level: 13.4,
            confidence: None,
            recommendations: vec!["Stay hydrated and get adequate sleep".into()],
            color_analysis: None,
            image_reference: None,
        };
        store.append_scan(&record).unwrap();

        let scans = store.scans(&profile.id).unwrap();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].id, record.id);
        assert_eq!(store.summary(&profile.id).unwrap().scan_count, 1);
    }

    #[test]
    fn file_store_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.db");

        let id = {
            let store = SqliteProfileStore::open(&path).unwrap();
            store.create_profile(&NewProfile::named("Kai")).unwrap().id
        };

        let store = SqliteProfileStore::open(&path).unwrap();
        let profile = store.get_profile(&id).unwrap().unwrap();
        assert_eq!(profile.name, "Kai");
    }
}
