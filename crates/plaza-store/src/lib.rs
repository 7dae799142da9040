//! Durable presence store: the [`PersistenceClient`] contract, an in-memory
//! backend, a journal-file backend, and a background writer.

pub mod client;
pub mod error;
pub mod journal;
pub mod memory;
pub mod rows;
pub mod writer;

pub use client::{PersistenceClient, Subscription};
pub use error::StoreError;
pub use journal::{JournalStore, MAX_RECORD_BYTES};
pub use memory::{DEFAULT_FEED_CAPACITY, MemoryStore};
pub use rows::{ChatRow, PositionRow, StoredEvent};
pub use writer::{StoreWriter, WriterStats};
