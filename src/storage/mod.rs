mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{
    Collection, CollectionDirectory, FileIndex, IndexEntry, ObjectStore, RefStore, RefValue,
    RepoId, StorageBackend,
};
