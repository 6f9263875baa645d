//! End-to-end repository flows over a real database file.

use gitvault::git::Author;
use gitvault::repo::{Changeset, Repository};
use gitvault::storage::{SqliteStorage, StorageBackend};
use tempfile::TempDir;

fn author() -> Author {
    Author::new("Integration Bot", "bot@example.com", 1_700_000_000)
}

#[test]
fn test_full_collection_lifecycle() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("store.db");

    let storage = SqliteStorage::open(&db_path).unwrap();
    storage.initialize().unwrap();
    let id = storage.create_collection("acme", "skills", false).unwrap();
    let repo = Repository::new(&storage, id);

    repo.init(&author()).unwrap();

    // Editor saves a skill, then revises it, then adds a second file
    repo.commit(
        "main",
        &Changeset::new().write("skills/review/SKILL.md", "# Review v1\n"),
        "Add review skill",
        &author(),
    )
    .unwrap();
    repo.commit(
        "main",
        &Changeset::new().write("skills/review/SKILL.md", "# Review v2\n"),
        "Revise review skill",
        &author(),
    )
    .unwrap();
    repo.commit(
        "main",
        &Changeset::new().write("skills/review/examples.md", "examples\n"),
        "Add examples",
        &author(),
    )
    .unwrap();

    assert_eq!(
        repo.get_file("main", "skills/review/SKILL.md").unwrap(),
        Some(b"# Review v2\n".to_vec())
    );

    // The skill file changed twice; the examples commit is skipped
    let history = repo
        .get_file_history("main", "skills/review/SKILL.md", 50)
        .unwrap();
    let messages: Vec<&str> = history.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["Revise review skill", "Add review skill"]);
}

#[test]
fn test_state_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("store.db");

    let head;
    let id;
    {
        let storage = SqliteStorage::open(&db_path).unwrap();
        storage.initialize().unwrap();
        id = storage.create_collection("acme", "skills", false).unwrap();
        let repo = Repository::new(&storage, id);
        repo.init(&author()).unwrap();
        head = repo
            .commit(
                "main",
                &Changeset::new().write("SKILL.md", "# Persisted\n"),
                "Persist",
                &author(),
            )
            .unwrap();
    }

    let storage = SqliteStorage::open(&db_path).unwrap();
    storage.initialize().unwrap();
    let repo = Repository::new(&storage, id);

    assert_eq!(repo.head_commit("main").unwrap(), Some(head));
    assert_eq!(
        repo.get_file("main", "SKILL.md").unwrap(),
        Some(b"# Persisted\n".to_vec())
    );
}

#[test]
fn test_export_style_tree_flattening() {
    let temp = TempDir::new().unwrap();
    let storage = SqliteStorage::open(temp.path().join("store.db")).unwrap();
    storage.initialize().unwrap();
    let id = storage.create_collection("acme", "skills", false).unwrap();
    let repo = Repository::new(&storage, id);
    repo.init(&author()).unwrap();

    let head = repo
        .commit(
            "main",
            &Changeset::new()
                .write("a/one.txt", "1")
                .write("a/b/two.txt", "2")
                .write("three.txt", "3"),
            "Layout",
            &author(),
        )
        .unwrap();

    // An archive builder walks the tree directly, then reads each blob
    let commit = repo.read_commit(&head).unwrap().unwrap();
    let files = repo.list_files_from_tree(&commit.tree).unwrap();
    let mut archive = Vec::new();
    for entry in files {
        let content = repo.read_blob(&entry.blob_sha).unwrap().unwrap();
        archive.push((entry.path, content));
    }

    assert_eq!(
        archive,
        vec![
            ("a/b/two.txt".to_string(), b"2".to_vec()),
            ("a/one.txt".to_string(), b"1".to_vec()),
            ("three.txt".to_string(), b"3".to_vec()),
        ]
    );
}

#[test]
fn test_two_collections_do_not_share_anything() {
    let temp = TempDir::new().unwrap();
    let storage = SqliteStorage::open(temp.path().join("store.db")).unwrap();
    storage.initialize().unwrap();

    let a = storage.create_collection("acme", "skills", false).unwrap();
    let b = storage.create_collection("umbrella", "skills", false).unwrap();
    let repo_a = Repository::new(&storage, a);
    let repo_b = Repository::new(&storage, b);

    repo_a.init(&author()).unwrap();
    repo_b.init(&author()).unwrap();
    let commit_sha = repo_a
        .commit(
            "main",
            &Changeset::new().write("only-a.txt", "a"),
            "A only",
            &author(),
        )
        .unwrap();

    assert!(repo_b.get_file("main", "only-a.txt").unwrap().is_none());
    assert!(repo_b.read_commit(&commit_sha).unwrap().is_none());
    assert!(repo_b.list_files("main").unwrap().is_empty());
}
