//! File-backed append-only store.
//!
//! Every inserted row is appended to a journal file as one record:
//!
//! ```text
//! +-------------------+----------------------------------------------+
//! | length (4 bytes)  | lz4 block, size-prepended, of the postcard   |
//! | u32 little-endian | encoding of a StoredEvent (length bytes)     |
//! +-------------------+----------------------------------------------+
//! ```
//!
//! On open the journal is replayed into a [`MemoryStore`] index which then
//! answers queries and feeds subscriptions. A record cut short by a crash
//! at the end of the file is dropped and the file truncated to the last
//! complete record; an unreadable record anywhere else is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::client::{PersistenceClient, Subscription};
use crate::error::StoreError;
use crate::memory::MemoryStore;
use crate::rows::{ChatRow, PositionRow, StoredEvent};

/// Largest record, compressed or not, the journal will read or write.
pub const MAX_RECORD_BYTES: usize = 1 << 20;

/// Durable store backed by a journal file.
pub struct JournalStore {
    path: PathBuf,
    index: MemoryStore,
    file: Mutex<File>,
}

impl JournalStore {
    /// Open (or create) the journal at `path` and replay it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file cannot be read or opened, and
    /// [`StoreError::Corrupt`] if a record before the end is unreadable.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let (events, valid_len) = decode_records(&bytes)?;

        let index = MemoryStore::new();
        for event in &events {
            index.index(event);
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if valid_len < bytes.len() {
            tracing::warn!(
                path = %path.display(),
                dropped = bytes.len() - valid_len,
                "Truncating incomplete journal tail"
            );
            file.set_len(valid_len as u64).await?;
        }

        tracing::info!(path = %path.display(), records = events.len(), "Journal replayed");
        Ok(Self {
            path,
            index,
            file: Mutex::new(file),
        })
    }

    /// Location of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows replayed plus rows inserted since open.
    pub fn rows_written(&self) -> u64 {
        self.index.rows_written()
    }

    async fn append(&self, event: StoredEvent) -> Result<(), StoreError> {
        let record = encode_record(&event)?;
        {
            let mut file = self.file.lock().await;
            file.write_all(&record).await?;
            file.flush().await?;
        }
        self.index.publish(event);
        Ok(())
    }
}

#[async_trait]
impl PersistenceClient for JournalStore {
    async fn insert_position(&self, row: PositionRow) -> Result<(), StoreError> {
        self.append(StoredEvent::Position(row)).await
    }

    async fn insert_chat(&self, row: ChatRow) -> Result<(), StoreError> {
        self.append(StoredEvent::Chat(row)).await
    }

    async fn query_latest_per_participant(
        &self,
        window: Duration,
        now_ms: u64,
    ) -> Result<Vec<PositionRow>, StoreError> {
        Ok(self.index.latest_positions(window, now_ms))
    }

    fn subscribe(&self, exclude_id: Option<String>) -> Subscription {
        Subscription::new(self.index.feed(), exclude_id)
    }
}

/// Encode one event as a length-prefixed journal record.
pub fn encode_record(event: &StoredEvent) -> Result<Vec<u8>, StoreError> {
    let body =
        postcard::to_allocvec(event).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let compressed = lz4_flex::compress_prepend_size(&body);
    if compressed.len() > MAX_RECORD_BYTES {
        return Err(StoreError::Serialization(format!(
            "record of {} bytes exceeds {MAX_RECORD_BYTES}",
            compressed.len()
        )));
    }

    let len = compressed.len() as u32;
    let mut out = Vec::with_capacity(4 + compressed.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Decode every complete record in `bytes`. Returns the events and the
/// length of the prefix they occupy.
pub fn decode_records(bytes: &[u8]) -> Result<(Vec<StoredEvent>, usize), StoreError> {
    let mut events = Vec::new();
    let mut offset = 0;

    while let Some(len_bytes) = bytes.get(offset..offset + 4) {
        let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
        let start = offset + 4;
        let end = start.saturating_add(len as usize);
        let Some(record) = bytes.get(start..end) else {
            // Torn tail: the length was written but not the whole body.
            break;
        };

        match decode_record(record) {
            Ok(event) => events.push(event),
            Err(_) if end == bytes.len() => break,
            Err(reason) => {
                return Err(StoreError::Corrupt {
                    offset: offset as u64,
                    reason,
                });
            }
        }
        offset = end;
    }

    Ok((events, offset))
}

fn decode_record(record: &[u8]) -> Result<StoredEvent, String> {
    if record.len() > MAX_RECORD_BYTES {
        return Err(format!("record of {} bytes exceeds limit", record.len()));
    }
    let Some(size_bytes) = record.get(..4) else {
        return Err("record shorter than its size prefix".to_string());
    };
    let size = u32::from_le_bytes([size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]]);
    if size as usize > MAX_RECORD_BYTES {
        return Err(format!("uncompressed size {size} exceeds limit"));
    }

    let body = lz4_flex::decompress_size_prepended(record).map_err(|e| e.to_string())?;
    postcard::from_bytes(&body).map_err(|e| e.to_string())
}
