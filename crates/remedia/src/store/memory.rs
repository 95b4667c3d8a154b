//! In-memory session store.
//!
//! Backs tests and single-process deployments that accept losing open
//! sessions on restart. Creation is atomic through the open-index entry API:
//! two concurrent first messages for the same pair settle on one record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Mutex;

use remedia_channel_protocol::Channel;

use crate::session::{SessionRecord, pair_key};

use super::error::StorageResult;
use super::{ArchivedPatientRecord, SessionStore};

#[derive(Default)]
pub struct MemorySessionStore {
    records: DashMap<String, SessionRecord>,
    /// pair key → session_id of the open session for that pair.
    open_index: DashMap<String, String>,
    archived: Mutex<Vec<ArchivedPatientRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of session records ever created. Test observability.
    pub fn session_count(&self) -> usize {
        self.records.len()
    }

    /// Snapshot of the patient table. Test observability.
    pub async fn archived(&self) -> Vec<ArchivedPatientRecord> {
        self.archived.lock().await.clone()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find_open(
        &self,
        channel: Channel,
        user_external_id: &str,
    ) -> StorageResult<Option<SessionRecord>> {
        let key = pair_key(channel, user_external_id);
        let Some(session_id) = self.open_index.get(&key).map(|e| e.value().clone()) else {
            return Ok(None);
        };

        match self.records.get(&session_id) {
            Some(record) if record.is_open() => Ok(Some(record.value().clone())),
            _ => {
                // Stale index entry; drop it so the pair can start fresh.
                self.open_index.remove(&key);
                Ok(None)
            }
        }
    }

    async fn create(
        &self,
        channel: Channel,
        user_external_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<SessionRecord> {
        let key = pair_key(channel, user_external_id);

        // The entry holds the shard lock for the duration of the closure, so
        // a racing second creator observes the first session and attaches.
        match self.open_index.entry(key) {
            Entry::Occupied(mut occupied) => {
                let existing_id = occupied.get().clone();
                if let Some(record) = self.records.get(&existing_id)
                    && record.is_open()
                {
                    return Ok(record.value().clone());
                }
                let record = SessionRecord::new(channel, user_external_id, now);
                self.records
                    .insert(record.session_id.clone(), record.clone());
                occupied.insert(record.session_id.clone());
                Ok(record)
            }
            Entry::Vacant(vacant) => {
                let record = SessionRecord::new(channel, user_external_id, now);
                self.records
                    .insert(record.session_id.clone(), record.clone());
                vacant.insert(record.session_id.clone());
                Ok(record)
            }
        }
    }

    async fn load(&self, session_id: &str) -> StorageResult<Option<SessionRecord>> {
        Ok(self.records.get(session_id).map(|r| r.value().clone()))
    }

    async fn update(&self, record: &SessionRecord) -> StorageResult<()> {
        self.records
            .insert(record.session_id.clone(), record.clone());

        if !record.is_open() {
            self.open_index
                .remove_if(&record.pair_key(), |_, id| *id == record.session_id);
        }
        Ok(())
    }

    async fn archive_to_patient_table(&self, record: &SessionRecord) -> StorageResult<()> {
        let archived = ArchivedPatientRecord::from_record(record, Utc::now());
        self.archived.lock().await.push(archived);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_find_open() {
        let store = MemorySessionStore::new();
        let created = store
            .create(Channel::Whatsapp, "573001234567", Utc::now())
            .await
            .unwrap();

        let found = store
            .find_open(Channel::Whatsapp, "573001234567")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.session_id, created.session_id);
    }

    #[tokio::test]
    async fn create_is_insert_if_absent() {
        let store = MemorySessionStore::new();
        let first = store
            .create(Channel::Whatsapp, "573001234567", Utc::now())
            .await
            .unwrap();
        let second = store
            .create(Channel::Whatsapp, "573001234567", Utc::now())
            .await
            .unwrap();

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn pairs_are_isolated_by_channel() {
        let store = MemorySessionStore::new();
        let wa = store
            .create(Channel::Whatsapp, "573001234567", Utc::now())
            .await
            .unwrap();
        let tl = store
            .create(Channel::Telegram, "573001234567", Utc::now())
            .await
            .unwrap();
        assert_ne!(wa.session_id, tl.session_id);
    }

    #[tokio::test]
    async fn closing_evicts_from_open_index() {
        let store = MemorySessionStore::new();
        let mut record = store
            .create(Channel::Whatsapp, "573001234567", Utc::now())
            .await
            .unwrap();

        record.grant_consent(Utc::now());
        record.close(Utc::now());
        store.update(&record).await.unwrap();

        assert!(
            store
                .find_open(Channel::Whatsapp, "573001234567")
                .await
                .unwrap()
                .is_none()
        );

        // The closed record itself survives.
        let loaded = store.load(&record.session_id).await.unwrap().unwrap();
        assert!(!loaded.is_open());
    }

    #[tokio::test]
    async fn new_session_after_closure_gets_new_id() {
        let store = MemorySessionStore::new();
        let mut first = store
            .create(Channel::Whatsapp, "573001234567", Utc::now())
            .await
            .unwrap();
        first.grant_consent(Utc::now());
        first.close(Utc::now());
        store.update(&first).await.unwrap();

        let second = store
            .create(Channel::Whatsapp, "573001234567", Utc::now())
            .await
            .unwrap();
        assert_ne!(first.session_id, second.session_id);
        assert_eq!(store.session_count(), 2);
    }

    #[tokio::test]
    async fn archive_appends_patient_record() {
        let store = MemorySessionStore::new();
        let mut record = store
            .create(Channel::Telegram, "987654", Utc::now())
            .await
            .unwrap();
        record.grant_consent(Utc::now());
        record.close(Utc::now());

        store.archive_to_patient_table(&record).await.unwrap();

        let archived = store.archived().await;
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].session_id, record.session_id);
        assert!(archived[0].consent_given);
    }

    #[tokio::test]
    async fn concurrent_creates_settle_on_one_session() {
        use std::sync::Arc;

        let store = Arc::new(MemorySessionStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create(Channel::Whatsapp, "573001234567", Utc::now())
                    .await
                    .unwrap()
                    .session_id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.session_count(), 1);
    }
}
