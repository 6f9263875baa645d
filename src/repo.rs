//! Repository operations over a storage backend: init, the commit write
//! path, file reads, and per-file history.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::git::{commit, tree, Author, Commit, FileMode, ObjectId, ObjectKind, TreeEntry};
use crate::storage::{IndexEntry, RefValue, RepoId, StorageBackend};

/// Branch every new repository starts on.
pub const DEFAULT_BRANCH: &str = "main";

/// Symbolic refs resolve through at most this many hops before the chain is
/// reported as a cycle.
const SYMREF_MAX_DEPTH: usize = 10;

/// A set of edits applied by one commit: path writes plus path deletions.
#[derive(Debug, Default, Clone)]
pub struct Changeset {
    pub writes: Vec<(String, Vec<u8>)>,
    pub deletes: Vec<String>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.writes.push((path.into(), content.into()));
        self
    }

    pub fn delete(mut self, path: impl Into<String>) -> Self {
        self.deletes.push(path.into());
        self
    }
}

/// One entry of a file's change history, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub commit_sha: ObjectId,
    pub message: String,
    pub author: Author,
    /// Blob after this commit; `None` when the commit deleted the file.
    pub blob_sha: Option<ObjectId>,
}

/// A single repository, scoped onto the shared storage backend.
pub struct Repository<'a, S: StorageBackend> {
    storage: &'a S,
    repo: RepoId,
}

impl<'a, S: StorageBackend> Repository<'a, S> {
    pub fn new(storage: &'a S, repo: RepoId) -> Self {
        Repository { storage, repo }
    }

    // ------------------------------------------------------------------
    // Object reads and writes
    // ------------------------------------------------------------------

    /// Store raw file content as a blob.
    pub fn write_blob(&self, content: &[u8]) -> Result<ObjectId> {
        self.storage.write_object(self.repo, ObjectKind::Blob, content)
    }

    /// Read a blob's content. Absence is `Ok(None)`.
    pub fn read_blob(&self, sha: &str) -> Result<Option<Vec<u8>>> {
        match self.storage.read_object(self.repo, sha)? {
            Some((ObjectKind::Blob, content)) => Ok(Some(content)),
            Some((kind, _)) => Err(Error::Decode(format!(
                "expected blob at {}, found {}",
                sha, kind
            ))),
            None => Ok(None),
        }
    }

    /// Encode and store a tree. Entry order never matters.
    pub fn write_tree(&self, entries: &[TreeEntry]) -> Result<ObjectId> {
        let bytes = tree::encode(entries)?;
        self.storage.write_object(self.repo, ObjectKind::Tree, &bytes)
    }

    /// Read and decode a tree. Absence is `Ok(None)`.
    pub fn read_tree(&self, sha: &str) -> Result<Option<Vec<TreeEntry>>> {
        match self.storage.read_object(self.repo, sha)? {
            Some((ObjectKind::Tree, bytes)) => Ok(Some(tree::decode(&bytes)?)),
            Some((kind, _)) => Err(Error::Decode(format!(
                "expected tree at {}, found {}",
                sha, kind
            ))),
            None => Ok(None),
        }
    }

    pub fn write_commit(&self, commit: &Commit) -> Result<ObjectId> {
        let bytes = commit::encode(commit);
        self.storage.write_object(self.repo, ObjectKind::Commit, &bytes)
    }

    pub fn read_commit(&self, sha: &str) -> Result<Option<Commit>> {
        match self.storage.read_object(self.repo, sha)? {
            Some((ObjectKind::Commit, bytes)) => Ok(Some(commit::decode(&bytes)?)),
            Some((kind, _)) => Err(Error::Decode(format!(
                "expected commit at {}, found {}",
                sha, kind
            ))),
            None => Ok(None),
        }
    }

    // A tree or commit referenced by reachable history must exist; a dangling
    // reference is an integrity failure, not a normal absence.
    fn require_tree(&self, sha: &str) -> Result<Vec<TreeEntry>> {
        self.read_tree(sha)?
            .ok_or_else(|| Error::Corrupt(format!("tree {} referenced but missing", sha)))
    }

    fn require_commit(&self, sha: &str) -> Result<Commit> {
        self.read_commit(sha)?
            .ok_or_else(|| Error::Corrupt(format!("commit {} referenced but missing", sha)))
    }

    // ------------------------------------------------------------------
    // Refs
    // ------------------------------------------------------------------

    /// Resolve a ref through symbolic hops to a commit sha. An unborn or
    /// missing ref is `Ok(None)`.
    pub fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        let mut current = name.to_string();
        for _ in 0..SYMREF_MAX_DEPTH {
            match self.storage.read_ref(self.repo, &current)? {
                Some(RefValue::Direct(sha)) => return Ok(Some(sha)),
                Some(RefValue::Symbolic(target)) => current = target,
                None => return Ok(None),
            }
        }
        Err(Error::CycleDetected(name.to_string()))
    }

    /// The branch's current head commit, if born.
    pub fn head_commit(&self, branch: &str) -> Result<Option<ObjectId>> {
        self.resolve_ref(&format!("refs/heads/{}", branch))
    }

    // ------------------------------------------------------------------
    // Init
    // ------------------------------------------------------------------

    /// Seed a fresh repository: empty tree, one "Initial commit", the default
    /// branch ref, and `HEAD` pointing at it symbolically.
    ///
    /// Fails with `ConcurrencyConflict` if the default branch is already
    /// born.
    pub fn init(&self, author: &Author) -> Result<ObjectId> {
        let empty_tree = self.write_tree(&[])?;
        let commit_sha = self.write_commit(&Commit {
            tree: empty_tree,
            parent: None,
            author: author.clone(),
            committer: author.clone(),
            message: "Initial commit".to_string(),
        })?;

        self.storage
            .commit_branch(self.repo, DEFAULT_BRANCH, None, &commit_sha, &[])?;
        self.storage.set_symbolic_ref(
            self.repo,
            "HEAD",
            &format!("refs/heads/{}", DEFAULT_BRANCH),
        )?;
        Ok(commit_sha)
    }

    // ------------------------------------------------------------------
    // Commit operation
    // ------------------------------------------------------------------

    /// Apply a changeset on top of the branch head: write blobs, rebuild the
    /// tree bottom-up, write the commit, then advance the ref and swap the
    /// file index in one transaction.
    ///
    /// The head observed at the start is the commit's parent and the
    /// compare-and-swap expectation; if the branch moves underneath, the call
    /// fails with `ConcurrencyConflict` and the caller retries on the fresh
    /// base.
    pub fn commit(
        &self,
        branch: &str,
        changes: &Changeset,
        message: &str,
        author: &Author,
    ) -> Result<ObjectId> {
        let head = self.head_commit(branch)?;
        let mut files = self.current_files(branch, head.as_deref())?;

        for (path, content) in &changes.writes {
            validate_path(path)?;
            let blob_sha = self.write_blob(content)?;
            files.insert(path.clone(), (blob_sha, FileMode::Regular));
        }
        for path in &changes.deletes {
            files.remove(path);
        }

        let tree_sha = self.write_tree_from_files(&files)?;
        let commit_sha = self.write_commit(&Commit {
            tree: tree_sha,
            parent: head.clone(),
            author: author.clone(),
            committer: author.clone(),
            message: message.to_string(),
        })?;

        let entries: Vec<IndexEntry> = files
            .into_iter()
            .map(|(path, (blob_sha, mode))| IndexEntry {
                path,
                blob_sha,
                mode,
            })
            .collect();
        self.storage
            .commit_branch(self.repo, branch, head.as_deref(), &commit_sha, &entries)?;

        tracing::debug!(repo = self.repo, branch, commit = %commit_sha, "committed");
        Ok(commit_sha)
    }

    /// The branch's flat path map. Fast path: the file index. Slow path (an
    /// empty index for a born branch, e.g. first commit after an external
    /// tree import): a full walk of the head commit's tree.
    fn current_files(
        &self,
        branch: &str,
        head: Option<&str>,
    ) -> Result<BTreeMap<String, (ObjectId, FileMode)>> {
        let indexed = self.storage.index_entries(self.repo, branch)?;
        if !indexed.is_empty() {
            return Ok(indexed
                .into_iter()
                .map(|e| (e.path, (e.blob_sha, e.mode)))
                .collect());
        }

        let Some(head) = head else {
            return Ok(BTreeMap::new());
        };
        let commit = self.require_commit(head)?;
        let flattened = self.list_files_from_tree(&commit.tree)?;
        Ok(flattened
            .into_iter()
            .map(|e| (e.path, (e.blob_sha, e.mode)))
            .collect())
    }

    /// Rebuild the hierarchical tree from a flat path map, children before
    /// parents. The intermediate structure is a trie indexed by integer node
    /// handles; each node becomes one tree object once all of its subtrees
    /// have resolved to shas.
    fn write_tree_from_files(
        &self,
        files: &BTreeMap<String, (ObjectId, FileMode)>,
    ) -> Result<ObjectId> {
        let mut trie = PathTrie::new();
        for (path, (blob_sha, mode)) in files {
            trie.insert(path, blob_sha.clone(), *mode)?;
        }
        self.write_trie_node(&trie, PathTrie::ROOT)
    }

    fn write_trie_node(&self, trie: &PathTrie, node: usize) -> Result<ObjectId> {
        let mut entries = Vec::new();
        for (name, child) in &trie.nodes[node].dirs {
            let sha = self.write_trie_node(trie, *child)?;
            entries.push(TreeEntry::dir(name.clone(), sha));
        }
        for (name, (blob_sha, mode)) in &trie.nodes[node].files {
            entries.push(TreeEntry {
                mode: *mode,
                name: name.clone(),
                sha: blob_sha.clone(),
            });
        }
        self.write_tree(&entries)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Flat file listing for a branch, index-first with a tree-walk fallback.
    /// Reads never repopulate the index.
    pub fn list_files(&self, branch: &str) -> Result<Vec<IndexEntry>> {
        let indexed = self.storage.index_entries(self.repo, branch)?;
        if !indexed.is_empty() {
            return Ok(indexed);
        }
        match self.head_commit(branch)? {
            Some(head) => {
                let commit = self.require_commit(&head)?;
                self.list_files_from_tree(&commit.tree)
            }
            None => Ok(Vec::new()),
        }
    }

    /// Recursively flatten a tree into path-keyed entries. Used by the index
    /// fallback and by export consumers building archives.
    pub fn list_files_from_tree(&self, tree_sha: &str) -> Result<Vec<IndexEntry>> {
        let mut out = Vec::new();
        self.flatten_tree(tree_sha, "", &mut out)?;
        Ok(out)
    }

    fn flatten_tree(&self, tree_sha: &str, prefix: &str, out: &mut Vec<IndexEntry>) -> Result<()> {
        for entry in self.require_tree(tree_sha)? {
            let path = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", prefix, entry.name)
            };
            match entry.mode {
                FileMode::Directory => self.flatten_tree(&entry.sha, &path, out)?,
                FileMode::Regular => out.push(IndexEntry {
                    path,
                    blob_sha: entry.sha,
                    mode: entry.mode,
                }),
            }
        }
        Ok(())
    }

    /// Read one file's content on a branch. Absence is `Ok(None)`.
    pub fn get_file(&self, branch: &str, path: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.storage.index_lookup(self.repo, branch, path)? {
            return self.read_blob(&entry.blob_sha);
        }

        // Index rows may be absent for a born branch; resolve through the
        // tree without touching the index.
        match self.head_commit(branch)? {
            Some(head) => {
                let commit = self.require_commit(&head)?;
                match self.blob_at_path(&commit.tree, path)? {
                    Some(blob_sha) => self.read_blob(&blob_sha),
                    None => Ok(None),
                }
            }
            None => Ok(None),
        }
    }

    /// Descend a tree along path segments to the blob sha at `path`.
    fn blob_at_path(&self, tree_sha: &str, path: &str) -> Result<Option<ObjectId>> {
        let mut current = tree_sha.to_string();
        let mut segments = path.split('/').peekable();

        while let Some(segment) = segments.next() {
            let entries = self.require_tree(&current)?;
            let Some(entry) = entries.iter().find(|e| e.name == segment) else {
                return Ok(None);
            };
            match (entry.mode, segments.peek().is_some()) {
                (FileMode::Regular, false) => return Ok(Some(entry.sha.clone())),
                (FileMode::Directory, true) => current = entry.sha.clone(),
                // A file where a directory is needed, or vice versa
                _ => return Ok(None),
            }
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Walk the branch's parent chain and report the commits that changed
    /// `path`, newest first, up to `limit` entries.
    ///
    /// A commit changed the file when its resolved blob sha differs from its
    /// parent's; commits that did not touch the path are skipped.
    pub fn get_file_history(
        &self,
        branch: &str,
        path: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let mut out = Vec::new();
        let mut cursor = self.head_commit(branch)?;
        let mut cursor_blob: Option<Option<ObjectId>> = None;

        while let Some(sha) = cursor {
            if out.len() >= limit {
                break;
            }

            let commit = self.require_commit(&sha)?;
            let blob = match cursor_blob.take() {
                Some(blob) => blob,
                None => self.blob_at_path(&commit.tree, path)?,
            };

            let parent_blob = match &commit.parent {
                Some(parent_sha) => {
                    let parent = self.require_commit(parent_sha)?;
                    self.blob_at_path(&parent.tree, path)?
                }
                None => None,
            };

            if blob != parent_blob {
                out.push(HistoryEntry {
                    commit_sha: sha,
                    message: commit.message.clone(),
                    author: commit.author.clone(),
                    blob_sha: blob,
                });
            }

            cursor = commit.parent;
            cursor_blob = Some(parent_blob);
        }

        Ok(out)
    }
}

fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || path.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
        return Err(Error::Protocol(format!("invalid path: {:?}", path)));
    }
    Ok(())
}

/// Flat-path trie used to rebuild trees bottom-up. Nodes live in one vector
/// and refer to each other by index, so subtree construction never fights
/// the borrow checker over nested ownership.
struct PathTrie {
    nodes: Vec<TrieNode>,
}

#[derive(Default)]
struct TrieNode {
    dirs: BTreeMap<String, usize>,
    files: BTreeMap<String, (ObjectId, FileMode)>,
}

impl PathTrie {
    const ROOT: usize = 0;

    fn new() -> Self {
        PathTrie {
            nodes: vec![TrieNode::default()],
        }
    }

    /// A name can hold a file or a subtree, never both; a collision would
    /// encode two entries with the same name into one tree object.
    fn insert(&mut self, path: &str, blob_sha: ObjectId, mode: FileMode) -> Result<()> {
        let mut node = Self::ROOT;
        let mut segments = path.split('/').peekable();

        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                if self.nodes[node].dirs.contains_key(segment) {
                    return Err(Error::Protocol(format!(
                        "path {:?} conflicts with a directory of the same name",
                        path
                    )));
                }
                self.nodes[node]
                    .files
                    .insert(segment.to_string(), (blob_sha, mode));
                return Ok(());
            }
            if self.nodes[node].files.contains_key(segment) {
                return Err(Error::Protocol(format!(
                    "path {:?} descends through a file named {:?}",
                    path, segment
                )));
            }
            node = match self.nodes[node].dirs.get(segment) {
                Some(child) => *child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(TrieNode::default());
                    self.nodes[node].dirs.insert(segment.to_string(), child);
                    child
                }
            };
        }
        Err(Error::Protocol(format!("invalid path: {:?}", path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileIndex, RefStore, SqliteStorage};

    const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

    fn test_repo() -> (SqliteStorage, RepoId) {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage.initialize().unwrap();
        let repo = storage.create_collection("acme", "skills", false).unwrap();
        (storage, repo)
    }

    fn author() -> Author {
        Author::new("Test User", "test@example.com", 1_700_000_000)
    }

    #[test]
    fn test_init_scenario() {
        let (storage, id) = test_repo();
        let repo = Repository::new(&storage, id);

        let initial = repo.init(&author()).unwrap();
        let commit = repo.read_commit(&initial).unwrap().unwrap();
        assert_eq!(commit.message, "Initial commit");
        assert_eq!(commit.parent, None);
        assert_eq!(commit.tree, EMPTY_TREE);
        assert_eq!(repo.read_tree(EMPTY_TREE).unwrap().unwrap(), vec![]);

        // HEAD resolves through refs/heads/main
        assert_eq!(repo.resolve_ref("HEAD").unwrap(), Some(initial.clone()));

        // A second init finds the branch already born
        assert!(matches!(
            repo.init(&author()),
            Err(Error::ConcurrencyConflict { .. })
        ));
    }

    #[test]
    fn test_commit_chain_integrity() {
        let (storage, id) = test_repo();
        let repo = Repository::new(&storage, id);
        repo.init(&author()).unwrap();

        let n = 4;
        for i in 0..n {
            let changes = Changeset::new().write("counter.txt", format!("{}", i));
            repo.commit("main", &changes, &format!("step {}", i), &author())
                .unwrap();
        }

        // Walking parents from the head yields init + n commits, ending at a
        // parentless root
        let mut count = 0;
        let mut cursor = repo.head_commit("main").unwrap();
        let mut root_seen = false;
        while let Some(sha) = cursor {
            let commit = repo.read_commit(&sha).unwrap().unwrap();
            count += 1;
            root_seen = commit.parent.is_none();
            cursor = commit.parent;
        }
        assert_eq!(count, n + 1);
        assert!(root_seen);
    }

    #[test]
    fn test_commit_and_read_back() {
        let (storage, id) = test_repo();
        let repo = Repository::new(&storage, id);
        repo.init(&author()).unwrap();

        let changes = Changeset::new()
            .write("skills/alpha/SKILL.md", "# Alpha\n")
            .write("skills/alpha/notes.txt", "notes\n")
            .write("README.md", "hello\n");
        repo.commit("main", &changes, "Add alpha skill", &author())
            .unwrap();

        assert_eq!(
            repo.get_file("main", "skills/alpha/SKILL.md").unwrap(),
            Some(b"# Alpha\n".to_vec())
        );
        assert_eq!(repo.get_file("main", "skills/alpha/missing.txt").unwrap(), None);

        let paths: Vec<String> = repo
            .list_files("main")
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(
            paths,
            vec!["README.md", "skills/alpha/SKILL.md", "skills/alpha/notes.txt"]
        );
    }

    #[test]
    fn test_delete_returns_to_empty_tree() {
        let (storage, id) = test_repo();
        let repo = Repository::new(&storage, id);
        repo.init(&author()).unwrap();

        repo.commit(
            "main",
            &Changeset::new().write("a/b.txt", "x"),
            "add",
            &author(),
        )
        .unwrap();
        let head = repo
            .commit(
                "main",
                &Changeset::new().delete("a/b.txt"),
                "remove",
                &author(),
            )
            .unwrap();

        let commit = repo.read_commit(&head).unwrap().unwrap();
        assert_eq!(commit.tree, EMPTY_TREE);
        assert!(repo.list_files("main").unwrap().is_empty());
    }

    #[test]
    fn test_index_matches_tree_after_commit() {
        let (storage, id) = test_repo();
        let repo = Repository::new(&storage, id);
        repo.init(&author()).unwrap();

        let head = repo
            .commit(
                "main",
                &Changeset::new().write("x/y/z.txt", "deep").write("top.txt", "top"),
                "layout",
                &author(),
            )
            .unwrap();

        let commit = repo.read_commit(&head).unwrap().unwrap();
        let from_tree = repo.list_files_from_tree(&commit.tree).unwrap();
        let from_index = storage.index_entries(id, "main").unwrap();
        assert_eq!(from_index, from_tree);
    }

    #[test]
    fn test_tree_walk_fallback_when_index_empty() {
        let (storage, id) = test_repo();
        let repo = Repository::new(&storage, id);
        repo.init(&author()).unwrap();
        repo.commit(
            "main",
            &Changeset::new().write("kept.txt", "kept").write("dir/other.txt", "other"),
            "base",
            &author(),
        )
        .unwrap();

        // Simulate a branch whose tree exists but whose index was never built
        storage.replace_index(id, "main", &[]).unwrap();

        assert_eq!(
            repo.get_file("main", "kept.txt").unwrap(),
            Some(b"kept".to_vec())
        );
        assert_eq!(repo.list_files("main").unwrap().len(), 2);

        // The next commit goes through the slow path and must not lose files
        repo.commit(
            "main",
            &Changeset::new().write("new.txt", "new"),
            "after fallback",
            &author(),
        )
        .unwrap();
        let paths: Vec<String> = repo
            .list_files("main")
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(paths, vec!["dir/other.txt", "kept.txt", "new.txt"]);
    }

    #[test]
    fn test_history_skips_untouched_commits() {
        let (storage, id) = test_repo();
        let repo = Repository::new(&storage, id);
        repo.init(&author()).unwrap();

        let c1 = repo
            .commit(
                "main",
                &Changeset::new().write("file.txt", "v1").write("other.txt", "o1"),
                "one",
                &author(),
            )
            .unwrap();
        repo.commit(
            "main",
            &Changeset::new().write("other.txt", "o2"),
            "two",
            &author(),
        )
        .unwrap();
        let c3 = repo
            .commit(
                "main",
                &Changeset::new().write("file.txt", "v2"),
                "three",
                &author(),
            )
            .unwrap();

        let history = repo.get_file_history("main", "file.txt", 50).unwrap();
        let commits: Vec<&str> = history.iter().map(|e| e.commit_sha.as_str()).collect();
        assert_eq!(commits, vec![c3.as_str(), c1.as_str()]);
        assert_eq!(history[0].message, "three");
        assert!(history.iter().all(|e| e.blob_sha.is_some()));
    }

    #[test]
    fn test_history_records_deletion_and_honors_limit() {
        let (storage, id) = test_repo();
        let repo = Repository::new(&storage, id);
        repo.init(&author()).unwrap();

        repo.commit(
            "main",
            &Changeset::new().write("file.txt", "v1"),
            "add",
            &author(),
        )
        .unwrap();
        let del = repo
            .commit(
                "main",
                &Changeset::new().delete("file.txt"),
                "drop",
                &author(),
            )
            .unwrap();

        let history = repo.get_file_history("main", "file.txt", 50).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].commit_sha, del);
        assert_eq!(history[0].blob_sha, None);

        let limited = repo.get_file_history("main", "file.txt", 1).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].commit_sha, del);
    }

    #[test]
    fn test_history_for_unknown_path_is_empty() {
        let (storage, id) = test_repo();
        let repo = Repository::new(&storage, id);
        repo.init(&author()).unwrap();
        repo.commit(
            "main",
            &Changeset::new().write("a.txt", "a"),
            "a",
            &author(),
        )
        .unwrap();

        assert!(repo.get_file_history("main", "never.txt", 10).unwrap().is_empty());
    }

    #[test]
    fn test_symbolic_chain_and_cycle_bound() {
        let (storage, id) = test_repo();
        let repo = Repository::new(&storage, id);

        storage
            .set_ref(id, "refs/heads/main", "9daeafb9864cf43055ae93beb0afd6c7d144bfa4")
            .unwrap();
        storage.set_symbolic_ref(id, "HEAD", "refs/heads/main").unwrap();
        assert_eq!(
            repo.resolve_ref("HEAD").unwrap(),
            Some("9daeafb9864cf43055ae93beb0afd6c7d144bfa4".to_string())
        );

        storage.set_symbolic_ref(id, "refs/loop/a", "refs/loop/b").unwrap();
        storage.set_symbolic_ref(id, "refs/loop/b", "refs/loop/a").unwrap();
        assert!(matches!(
            repo.resolve_ref("refs/loop/a"),
            Err(Error::CycleDetected(_))
        ));
    }

    #[test]
    fn test_concurrent_commit_conflicts_instead_of_clobbering() {
        let (storage, id) = test_repo();
        let repo = Repository::new(&storage, id);
        repo.init(&author()).unwrap();
        let base = repo.head_commit("main").unwrap().unwrap();

        // First writer lands normally
        let winner = repo
            .commit(
                "main",
                &Changeset::new().write("a.txt", "first"),
                "first",
                &author(),
            )
            .unwrap();

        // Second writer finished its tree against the stale base; its ref
        // advance must fail rather than discard the winner
        let tree = repo.write_tree(&[]).unwrap();
        let stale = repo
            .write_commit(&Commit {
                tree,
                parent: Some(base.clone()),
                author: author(),
                committer: author(),
                message: "stale".to_string(),
            })
            .unwrap();
        let err = storage
            .commit_branch(id, "main", Some(&base), &stale, &[])
            .unwrap_err();
        assert!(matches!(err, Error::ConcurrencyConflict { .. }));
        assert_eq!(repo.head_commit("main").unwrap(), Some(winner));
    }

    #[test]
    fn test_invalid_paths_rejected() {
        let (storage, id) = test_repo();
        let repo = Repository::new(&storage, id);
        repo.init(&author()).unwrap();

        for bad in ["", "a//b", "../escape", "dir/.."] {
            let err = repo
                .commit(
                    "main",
                    &Changeset::new().write(bad, "x"),
                    "bad",
                    &author(),
                )
                .unwrap_err();
            assert!(matches!(err, Error::Protocol(_)), "path {:?}", bad);
        }
    }

    #[test]
    fn test_write_under_existing_file_rejected() {
        let (storage, id) = test_repo();
        let repo = Repository::new(&storage, id);
        repo.init(&author()).unwrap();

        let head = repo
            .commit(
                "main",
                &Changeset::new().write("a", "i am a file"),
                "file at a",
                &author(),
            )
            .unwrap();

        let err = repo
            .commit(
                "main",
                &Changeset::new().write("a/b.txt", "nested"),
                "nest under a",
                &author(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        // Nothing advanced and nothing leaked into the index
        assert_eq!(repo.head_commit("main").unwrap(), Some(head));
        assert_eq!(
            repo.get_file("main", "a").unwrap(),
            Some(b"i am a file".to_vec())
        );
        let paths: Vec<String> = repo
            .list_files("main")
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(paths, vec!["a"]);
    }

    #[test]
    fn test_write_over_existing_directory_rejected() {
        let (storage, id) = test_repo();
        let repo = Repository::new(&storage, id);
        repo.init(&author()).unwrap();

        repo.commit(
            "main",
            &Changeset::new().write("a/b.txt", "nested"),
            "dir at a",
            &author(),
        )
        .unwrap();

        let err = repo
            .commit(
                "main",
                &Changeset::new().write("a", "now a file"),
                "file over a",
                &author(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(
            repo.get_file("main", "a/b.txt").unwrap(),
            Some(b"nested".to_vec())
        );

        // Deleting the subtree first makes the name available again
        repo.commit(
            "main",
            &Changeset::new().delete("a/b.txt").write("a", "now a file"),
            "replace subtree",
            &author(),
        )
        .unwrap();
        assert_eq!(
            repo.get_file("main", "a").unwrap(),
            Some(b"now a file".to_vec())
        );
    }

    #[test]
    fn test_colliding_paths_in_one_changeset_rejected() {
        let (storage, id) = test_repo();
        let repo = Repository::new(&storage, id);
        repo.init(&author()).unwrap();

        let err = repo
            .commit(
                "main",
                &Changeset::new().write("a", "file").write("a/b.txt", "nested"),
                "both at once",
                &author(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(repo.list_files("main").unwrap().is_empty());
    }
}
