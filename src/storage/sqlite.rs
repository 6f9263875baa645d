//! SQLite storage backend.
//!
//! One database holds every tenant; each row carries a `repository_id`.
//! Object rows are immutable and content-addressed, ref and index rows are
//! mutated in place. The commit path's durable step (ref advance plus index
//! swap) runs inside a single transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use super::traits::{
    Collection, CollectionDirectory, FileIndex, IndexEntry, ObjectStore, RefStore, RefValue,
    RepoId, StorageBackend,
};
use crate::error::{Error, Result};
use crate::git::{object, FileMode, ObjectId, ObjectKind};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS collections (
    id          INTEGER PRIMARY KEY,
    account     TEXT NOT NULL,
    name        TEXT NOT NULL,
    private     INTEGER NOT NULL DEFAULT 0,
    UNIQUE (account, name)
);

CREATE TABLE IF NOT EXISTS git_objects (
    repository_id   INTEGER NOT NULL,
    sha             TEXT NOT NULL,
    type            TEXT NOT NULL,
    size            INTEGER NOT NULL,
    content         BLOB NOT NULL,
    PRIMARY KEY (repository_id, sha)
);

CREATE TABLE IF NOT EXISTS git_refs (
    repository_id   INTEGER NOT NULL,
    ref_name        TEXT NOT NULL,
    sha             TEXT,
    symbolic_target TEXT,
    PRIMARY KEY (repository_id, ref_name),
    CHECK (sha IS NULL OR symbolic_target IS NULL)
);

CREATE TABLE IF NOT EXISTS file_index (
    repository_id   INTEGER NOT NULL,
    branch          TEXT NOT NULL,
    path            TEXT NOT NULL,
    blob_sha        TEXT NOT NULL,
    mode            TEXT NOT NULL,
    PRIMARY KEY (repository_id, branch, path)
);

CREATE TABLE IF NOT EXISTS access_keys (
    id              INTEGER PRIMARY KEY,
    repository_id   INTEGER NOT NULL,
    key_hash        TEXT NOT NULL,
    label           TEXT
);

CREATE TABLE IF NOT EXISTS collection_files (
    repository_id   INTEGER NOT NULL,
    path            TEXT NOT NULL,
    content         BLOB NOT NULL,
    PRIMARY KEY (repository_id, path)
);
";

/// SQLite-backed storage for objects, refs, the file index, and the tenant
/// directory.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(SqliteStorage {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(SqliteStorage {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("connection mutex poisoned")
    }

    /// Register a collection, returning its repository id. The wider product
    /// layer owns this table; this entry point exists for seeding and tests.
    pub fn create_collection(&self, account: &str, name: &str, private: bool) -> Result<RepoId> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO collections (account, name, private) VALUES (?1, ?2, ?3)",
            params![account, name, private as i64],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Store the SHA-256 digest of a clone token, scoped to one repository.
    pub fn add_access_key(&self, repo: RepoId, token: &str, label: &str) -> Result<()> {
        self.lock().execute(
            "INSERT INTO access_keys (repository_id, key_hash, label) VALUES (?1, ?2, ?3)",
            params![repo, hash_token(token), label],
        )?;
        Ok(())
    }

    /// Upsert an uncommitted content row. The editor/submission layer
    /// maintains these; the clone endpoint only reads them.
    pub fn put_uncommitted_file(&self, repo: RepoId, path: &str, content: &[u8]) -> Result<()> {
        self.lock().execute(
            "INSERT INTO collection_files (repository_id, path, content) VALUES (?1, ?2, ?3)
             ON CONFLICT (repository_id, path) DO UPDATE SET content = excluded.content",
            params![repo, path, content],
        )?;
        Ok(())
    }
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn read_ref_row(conn: &Connection, repo: RepoId, name: &str) -> Result<Option<RefValue>> {
    let row = conn
        .query_row(
            "SELECT sha, symbolic_target FROM git_refs
             WHERE repository_id = ?1 AND ref_name = ?2",
            params![repo, name],
            |row| {
                let sha: Option<String> = row.get(0)?;
                let target: Option<String> = row.get(1)?;
                Ok((sha, target))
            },
        )
        .optional()?;

    Ok(match row {
        Some((Some(sha), _)) => Some(RefValue::Direct(sha)),
        Some((None, Some(target))) => Some(RefValue::Symbolic(target)),
        Some((None, None)) => None, // unborn placeholder row
        None => None,
    })
}

fn direct_sha(value: &Option<RefValue>) -> Option<String> {
    match value {
        Some(RefValue::Direct(sha)) => Some(sha.clone()),
        _ => None,
    }
}

/// Advance `name` from `expected` to `new_sha`, failing without side effects
/// when the stored sha no longer matches.
fn cas_ref(
    conn: &Connection,
    repo: RepoId,
    name: &str,
    expected: Option<&str>,
    new_sha: &str,
) -> Result<()> {
    let changed = match expected {
        Some(expected) => conn.execute(
            "UPDATE git_refs SET sha = ?1, symbolic_target = NULL
             WHERE repository_id = ?2 AND ref_name = ?3 AND sha = ?4",
            params![new_sha, repo, name, expected],
        )?,
        None => conn.execute(
            "INSERT INTO git_refs (repository_id, ref_name, sha, symbolic_target)
             VALUES (?1, ?2, ?3, NULL)
             ON CONFLICT (repository_id, ref_name)
             DO UPDATE SET sha = excluded.sha, symbolic_target = NULL
             WHERE git_refs.sha IS NULL",
            params![repo, name, new_sha],
        )?,
    };

    if changed == 0 {
        let actual = read_ref_row(conn, repo, name)?;
        return Err(Error::ConcurrencyConflict {
            ref_name: name.to_string(),
            expected: expected.map(String::from),
            actual: direct_sha(&actual),
        });
    }
    Ok(())
}

fn swap_index(
    conn: &Connection,
    repo: RepoId,
    branch: &str,
    entries: &[IndexEntry],
) -> Result<()> {
    conn.execute(
        "DELETE FROM file_index WHERE repository_id = ?1 AND branch = ?2",
        params![repo, branch],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO file_index (repository_id, branch, path, blob_sha, mode)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for entry in entries {
        stmt.execute(params![
            repo,
            branch,
            entry.path,
            entry.blob_sha,
            entry.mode.as_str()
        ])?;
    }
    Ok(())
}

impl ObjectStore for SqliteStorage {
    fn write_object(&self, repo: RepoId, kind: ObjectKind, content: &[u8]) -> Result<ObjectId> {
        let sha = object::object_id(kind, content);
        let conn = self.lock();

        // Content addressing makes this an idempotent no-op for known shas;
        // skip the compression work entirely.
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM git_objects WHERE repository_id = ?1 AND sha = ?2",
                params![repo, sha],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Ok(sha);
        }

        let compressed = object::compress(content)?;
        conn.execute(
            "INSERT OR IGNORE INTO git_objects (repository_id, sha, type, size, content)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![repo, sha, kind.as_str(), content.len() as i64, compressed],
        )?;
        Ok(sha)
    }

    fn read_object(&self, repo: RepoId, sha: &str) -> Result<Option<(ObjectKind, Vec<u8>)>> {
        let row = self
            .lock()
            .query_row(
                "SELECT type, content FROM git_objects
                 WHERE repository_id = ?1 AND sha = ?2",
                params![repo, sha],
                |row| {
                    let kind: String = row.get(0)?;
                    let content: Vec<u8> = row.get(1)?;
                    Ok((kind, content))
                },
            )
            .optional()?;

        match row {
            Some((kind, compressed)) => {
                let kind = ObjectKind::parse(&kind)?;
                let content = object::decompress(&compressed)?;
                Ok(Some((kind, content)))
            }
            None => Ok(None),
        }
    }

    fn has_object(&self, repo: RepoId, sha: &str) -> Result<bool> {
        let row: Option<i64> = self
            .lock()
            .query_row(
                "SELECT 1 FROM git_objects WHERE repository_id = ?1 AND sha = ?2",
                params![repo, sha],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.is_some())
    }
}

impl RefStore for SqliteStorage {
    fn read_ref(&self, repo: RepoId, name: &str) -> Result<Option<RefValue>> {
        read_ref_row(&self.lock(), repo, name)
    }

    fn set_ref(&self, repo: RepoId, name: &str, sha: &str) -> Result<()> {
        self.lock().execute(
            "INSERT INTO git_refs (repository_id, ref_name, sha, symbolic_target)
             VALUES (?1, ?2, ?3, NULL)
             ON CONFLICT (repository_id, ref_name)
             DO UPDATE SET sha = excluded.sha, symbolic_target = NULL",
            params![repo, name, sha],
        )?;
        Ok(())
    }

    fn set_symbolic_ref(&self, repo: RepoId, name: &str, target: &str) -> Result<()> {
        self.lock().execute(
            "INSERT INTO git_refs (repository_id, ref_name, sha, symbolic_target)
             VALUES (?1, ?2, NULL, ?3)
             ON CONFLICT (repository_id, ref_name)
             DO UPDATE SET sha = NULL, symbolic_target = excluded.symbolic_target",
            params![repo, name, target],
        )?;
        Ok(())
    }

    fn compare_and_set_ref(
        &self,
        repo: RepoId,
        name: &str,
        expected: Option<&str>,
        new_sha: &str,
    ) -> Result<()> {
        cas_ref(&self.lock(), repo, name, expected, new_sha)
    }

    fn list_refs(&self, repo: RepoId) -> Result<Vec<(String, RefValue)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT ref_name, sha, symbolic_target FROM git_refs
             WHERE repository_id = ?1 ORDER BY ref_name",
        )?;
        let rows = stmt.query_map(params![repo], |row| {
            let name: String = row.get(0)?;
            let sha: Option<String> = row.get(1)?;
            let target: Option<String> = row.get(2)?;
            Ok((name, sha, target))
        })?;

        let mut refs = Vec::new();
        for row in rows {
            let (name, sha, target) = row?;
            let value = match (sha, target) {
                (Some(sha), _) => RefValue::Direct(sha),
                (None, Some(target)) => RefValue::Symbolic(target),
                (None, None) => continue,
            };
            refs.push((name, value));
        }
        Ok(refs)
    }
}

impl FileIndex for SqliteStorage {
    fn index_entries(&self, repo: RepoId, branch: &str) -> Result<Vec<IndexEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT path, blob_sha, mode FROM file_index
             WHERE repository_id = ?1 AND branch = ?2 ORDER BY path",
        )?;
        let rows = stmt.query_map(params![repo, branch], |row| {
            let path: String = row.get(0)?;
            let blob_sha: String = row.get(1)?;
            let mode: String = row.get(2)?;
            Ok((path, blob_sha, mode))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (path, blob_sha, mode) = row?;
            entries.push(IndexEntry {
                path,
                blob_sha,
                mode: FileMode::parse(&mode)?,
            });
        }
        Ok(entries)
    }

    fn index_lookup(&self, repo: RepoId, branch: &str, path: &str) -> Result<Option<IndexEntry>> {
        let row = self
            .lock()
            .query_row(
                "SELECT blob_sha, mode FROM file_index
                 WHERE repository_id = ?1 AND branch = ?2 AND path = ?3",
                params![repo, branch, path],
                |row| {
                    let blob_sha: String = row.get(0)?;
                    let mode: String = row.get(1)?;
                    Ok((blob_sha, mode))
                },
            )
            .optional()?;

        match row {
            Some((blob_sha, mode)) => Ok(Some(IndexEntry {
                path: path.to_string(),
                blob_sha,
                mode: FileMode::parse(&mode)?,
            })),
            None => Ok(None),
        }
    }

    fn replace_index(&self, repo: RepoId, branch: &str, entries: &[IndexEntry]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        swap_index(&tx, repo, branch, entries)?;
        tx.commit()?;
        Ok(())
    }
}

impl StorageBackend for SqliteStorage {
    fn initialize(&self) -> Result<()> {
        self.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    fn commit_branch(
        &self,
        repo: RepoId,
        branch: &str,
        expected_head: Option<&str>,
        new_head: &str,
        entries: &[IndexEntry],
    ) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        cas_ref(
            &tx,
            repo,
            &format!("refs/heads/{}", branch),
            expected_head,
            new_head,
        )?;
        swap_index(&tx, repo, branch, entries)?;
        tx.commit()?;
        Ok(())
    }
}

impl CollectionDirectory for SqliteStorage {
    fn find_collection(&self, account: &str, name: &str) -> Result<Option<Collection>> {
        let row = self
            .lock()
            .query_row(
                "SELECT id, private FROM collections WHERE account = ?1 AND name = ?2",
                params![account, name],
                |row| {
                    let repo: i64 = row.get(0)?;
                    let private: i64 = row.get(1)?;
                    Ok((repo, private))
                },
            )
            .optional()?;
        Ok(row.map(|(repo, private)| Collection {
            repo,
            private: private != 0,
        }))
    }

    fn authorize(&self, repo: RepoId, token: &str) -> Result<bool> {
        let row: Option<i64> = self
            .lock()
            .query_row(
                "SELECT 1 FROM access_keys WHERE repository_id = ?1 AND key_hash = ?2",
                params![repo, hash_token(token)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    fn uncommitted_files(&self, repo: RepoId) -> Result<Vec<(String, Vec<u8>)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT path, content FROM collection_files
             WHERE repository_id = ?1 ORDER BY path",
        )?;
        let rows = stmt.query_map(params![repo], |row| {
            let path: String = row.get(0)?;
            let content: Vec<u8> = row.get(1)?;
            Ok((path, content))
        })?;

        rows.map(|row| row.map_err(Error::from)).collect()
    }
}
