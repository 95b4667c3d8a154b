//! File-based session storage.
//!
//! Directory structure:
//! ```text
//! {sessions_dir}/
//!   {session_id}.json    # One session record, written atomically
//!   patients.jsonl       # Append-only patient table
//! ```
//!
//! The open-pair index is held in memory and rebuilt from the record files
//! at startup; creation races are settled by a per-pair in-flight lock.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use remedia_channel_protocol::Channel;

use crate::session::{SessionRecord, pair_key};
use crate::sync::KeyedLocks;

use super::error::{StorageError, StorageResult};
use super::{ArchivedPatientRecord, SessionStore};

/// File-based implementation of [`SessionStore`].
pub struct FileSessionStore {
    sessions_dir: PathBuf,
    /// pair key → session_id of the open session for that pair.
    open_index: DashMap<String, String>,
    /// Serializes insert-if-absent per pair.
    creation_locks: KeyedLocks,
    /// Serializes appends to the patient table.
    archive_lock: Mutex<()>,
}

impl FileSessionStore {
    /// Open a store rooted at `sessions_dir`, creating the directory if
    /// needed and rebuilding the open-pair index from existing records.
    pub async fn open(sessions_dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let sessions_dir = sessions_dir.into();
        fs::create_dir_all(&sessions_dir)
            .await
            .map_err(|e| StorageError::io(&sessions_dir, e))?;

        let store = Self {
            sessions_dir,
            open_index: DashMap::new(),
            creation_locks: KeyedLocks::new(),
            archive_lock: Mutex::new(()),
        };
        store.rebuild_index().await?;
        Ok(store)
    }

    fn record_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{}.json", session_id))
    }

    fn patient_table_path(&self) -> PathBuf {
        self.sessions_dir.join("patients.jsonl")
    }

    /// Scan record files and index the open sessions.
    async fn rebuild_index(&self) -> StorageResult<()> {
        let mut entries = fs::read_dir(&self.sessions_dir)
            .await
            .map_err(|e| StorageError::io(&self.sessions_dir, e))?;

        let mut indexed = 0usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.sessions_dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let contents = match fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable record");
                    continue;
                }
            };
            // Skip malformed records (crash recovery): losing one index entry
            // beats refusing to start.
            let Ok(record) = serde_json::from_str::<SessionRecord>(&contents) else {
                warn!(path = %path.display(), "skipping malformed record");
                continue;
            };

            if record.is_open() {
                self.open_index.insert(record.pair_key(), record.session_id);
                indexed += 1;
            }
        }

        if indexed > 0 {
            tracing::info!(open_sessions = indexed, "rebuilt open-session index");
        }
        Ok(())
    }

    /// Write a record to its file via temp file + atomic rename.
    async fn write_record(&self, record: &SessionRecord) -> StorageResult<()> {
        let final_path = self.record_path(&record.session_id);
        let temp_path = self
            .sessions_dir
            .join(format!("{}.json.tmp", record.session_id));

        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| StorageError::serialization(e.to_string()))?;

        fs::write(&temp_path, &json)
            .await
            .map_err(|e| StorageError::io(&temp_path, e))?;
        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| StorageError::io(&final_path, e))?;

        Ok(())
    }

    async fn load_record(&self, session_id: &str) -> StorageResult<Option<SessionRecord>> {
        let path = self.record_path(session_id);
        let contents = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(&path, e)),
        };
        let record = serde_json::from_str(&contents)
            .map_err(|e| StorageError::serialization(format!("{}: {}", path.display(), e)))?;
        Ok(Some(record))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn find_open(
        &self,
        channel: Channel,
        user_external_id: &str,
    ) -> StorageResult<Option<SessionRecord>> {
        let key = pair_key(channel, user_external_id);
        let Some(session_id) = self.open_index.get(&key).map(|e| e.value().clone()) else {
            return Ok(None);
        };

        match self.load_record(&session_id).await? {
            Some(record) if record.is_open() => Ok(Some(record)),
            _ => {
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
        let lock = self.creation_locks.get(&key);
        let _guard = lock.lock().await;

        // Re-check under the lock: a concurrent creator may have won.
        if let Some(session_id) = self.open_index.get(&key).map(|e| e.value().clone())
            && let Some(record) = self.load_record(&session_id).await?
            && record.is_open()
        {
            return Ok(record);
        }

        let record = SessionRecord::new(channel, user_external_id, now);
        self.write_record(&record).await?;
        self.open_index.insert(key, record.session_id.clone());
        Ok(record)
    }

    async fn load(&self, session_id: &str) -> StorageResult<Option<SessionRecord>> {
        self.load_record(session_id).await
    }

    async fn update(&self, record: &SessionRecord) -> StorageResult<()> {
        self.write_record(record).await?;

        if !record.is_open() {
            self.open_index
                .remove_if(&record.pair_key(), |_, id| *id == record.session_id);
        }
        Ok(())
    }

    async fn archive_to_patient_table(&self, record: &SessionRecord) -> StorageResult<()> {
        let archived = ArchivedPatientRecord::from_record(record, Utc::now());
        let mut line = serde_json::to_string(&archived)
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        line.push('\n');

        let path = self.patient_table_path();
        let _guard = self.archive_lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        // fsync: the archive must be durable before closure is persisted.
        file.sync_all()
            .await
            .map_err(|e| StorageError::io(&path, e))?;

        Ok(())
    }
}
