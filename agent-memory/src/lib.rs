//! Per-conversation state: variables, metadata, and bounded history behind a
//! pluggable storage backend.

#![warn(missing_docs, clippy::pedantic)]

mod context;
mod error;
mod kv;
mod state;
mod storage;

pub use context::{ConversationContext, StateHandle};
pub use error::{MemoryError, MemoryResult};
pub use kv::{InMemoryKeyValueStore, KeyValueStore};
pub use state::{ConversationState, HistoryEntry, MAX_HISTORY_ENTRIES, TurnRole};
pub use storage::{FileStorage, InMemoryStorage, KeyValueStorage, StateStorage};
