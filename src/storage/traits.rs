use crate::error::Result;
use crate::git::{FileMode, ObjectId, ObjectKind};

/// Repository identifier, the tenant boundary for every row.
pub type RepoId = i64;

/// A ref row holds a direct sha or a symbolic target, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefValue {
    Direct(ObjectId),
    Symbolic(String),
}

/// One flattened file of a branch: path, blob sha, mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: String,
    pub blob_sha: ObjectId,
    pub mode: FileMode,
}

/// A collection row as seen by the clone endpoint.
#[derive(Debug, Clone)]
pub struct Collection {
    pub repo: RepoId,
    pub private: bool,
}

/// Trait for immutable, content-addressed object rows
pub trait ObjectStore {
    /// Write an object and return its sha. Writing identical content twice
    /// is a no-op that returns the existing sha.
    fn write_object(&self, repo: RepoId, kind: ObjectKind, content: &[u8]) -> Result<ObjectId>;

    /// Read an object, decompressing its content. Absence is `Ok(None)`.
    fn read_object(&self, repo: RepoId, sha: &str) -> Result<Option<(ObjectKind, Vec<u8>)>>;

    /// Existence check without paying for decompression.
    fn has_object(&self, repo: RepoId, sha: &str) -> Result<bool>;
}

/// Trait for named pointers (branches, HEAD)
pub trait RefStore {
    /// Read the raw ref row without resolving symbolic targets.
    fn read_ref(&self, repo: RepoId, name: &str) -> Result<Option<RefValue>>;

    /// Upsert a direct ref, clearing any symbolic target.
    fn set_ref(&self, repo: RepoId, name: &str, sha: &str) -> Result<()>;

    /// Upsert a symbolic ref, clearing any direct sha.
    fn set_symbolic_ref(&self, repo: RepoId, name: &str, target: &str) -> Result<()>;

    /// Advance a ref only if it still holds `expected`; otherwise fail with
    /// `Error::ConcurrencyConflict`. `expected = None` means the ref must
    /// not yet hold a direct sha.
    fn compare_and_set_ref(
        &self,
        repo: RepoId,
        name: &str,
        expected: Option<&str>,
        new_sha: &str,
    ) -> Result<()>;

    /// All ref rows for a repository.
    fn list_refs(&self, repo: RepoId) -> Result<Vec<(String, RefValue)>>;
}

/// Trait for the derived path -> blob cache, one row per branch file.
///
/// Never authoritative: always reconstructable by walking the branch head's
/// tree.
pub trait FileIndex {
    /// All index rows for a branch, ordered by path.
    fn index_entries(&self, repo: RepoId, branch: &str) -> Result<Vec<IndexEntry>>;

    /// Single-path lookup.
    fn index_lookup(&self, repo: RepoId, branch: &str, path: &str) -> Result<Option<IndexEntry>>;

    /// Wholesale rebuild: delete every row for the branch, then insert the
    /// given set, in one transaction.
    fn replace_index(&self, repo: RepoId, branch: &str, entries: &[IndexEntry]) -> Result<()>;
}

/// Combined storage backend trait
pub trait StorageBackend: ObjectStore + RefStore + FileIndex {
    /// Create tables / run migrations.
    fn initialize(&self) -> Result<()>;

    /// The commit operation's durable step: CAS the branch ref from
    /// `expected_head` to `new_head` and swap the branch's file index, all
    /// inside one transaction. On a CAS miss nothing changes and
    /// `Error::ConcurrencyConflict` is returned.
    fn commit_branch(
        &self,
        repo: RepoId,
        branch: &str,
        expected_head: Option<&str>,
        new_head: &str,
        entries: &[IndexEntry],
    ) -> Result<()>;
}

/// Tenant lookups the clone endpoint needs. The product layer owns these
/// tables; only reads happen here.
pub trait CollectionDirectory {
    /// Resolve an `<account>/<collection>` pair to a repository.
    fn find_collection(&self, account: &str, name: &str) -> Result<Option<Collection>>;

    /// Check a clone token against the repository's scoped access keys.
    fn authorize(&self, repo: RepoId, token: &str) -> Result<bool>;

    /// Current uncommitted content rows, used only to synthesize a virtual
    /// commit id for collections without real history.
    fn uncommitted_files(&self, repo: RepoId) -> Result<Vec<(String, Vec<u8>)>>;
}
