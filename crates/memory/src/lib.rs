//! Organisational memory: the record model, the notes-backed Record Store,
//! lexical retrieval and the local query log.

pub mod history;
pub mod notes;
pub mod retrieval;
pub mod schema;
pub mod store;

pub use history::{QueryEvent, QueryHistory};
pub use notes::{InsertOutcome, NoteBlob};
pub use retrieval::{RankedRecord, rank_records, tokenize};
pub use schema::{Enhancement, MemoryRecord, Origin, RecordKind, record_id, truncate_str};
pub use store::{MergeOutcome, NotesStore, RecordCursor, StoreOptions, SyncDirection, SyncOutcome};
