//! Git commit text encoding.

use crate::error::{Error, Result};
use crate::git::object::ObjectId;

/// Commit author or committer identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
    /// Unix seconds. The timezone is always serialized as +0000.
    pub timestamp: i64,
}

impl Author {
    pub fn new(name: impl Into<String>, email: impl Into<String>, timestamp: i64) -> Self {
        Author {
            name: name.into(),
            email: email.into(),
            timestamp,
        }
    }

    /// Identity stamped with the current time.
    pub fn now(name: impl Into<String>, email: impl Into<String>) -> Self {
        Author::new(name, email, chrono::Utc::now().timestamp())
    }

    fn encode(&self) -> String {
        format!("{} <{}> {} +0000", self.name, self.email, self.timestamp)
    }

    fn decode(line: &str) -> Result<Self> {
        let open = line
            .find(" <")
            .ok_or_else(|| Error::Decode(format!("author line missing '<': {}", line)))?;
        let close = line
            .find("> ")
            .ok_or_else(|| Error::Decode(format!("author line missing '>': {}", line)))?;
        if close < open {
            return Err(Error::Decode(format!("malformed author line: {}", line)));
        }

        let name = line[..open].to_string();
        let email = line[open + 2..close].to_string();
        let rest = &line[close + 2..];
        let timestamp = rest
            .split_whitespace()
            .next()
            .ok_or_else(|| Error::Decode(format!("author line missing timestamp: {}", line)))?
            .parse::<i64>()
            .map_err(|_| Error::Decode(format!("author timestamp not an integer: {}", line)))?;

        Ok(Author {
            name,
            email,
            timestamp,
        })
    }
}

/// Decoded commit metadata. At most one parent; merge commits are out of
/// scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub tree: ObjectId,
    pub parent: Option<ObjectId>,
    pub author: Author,
    pub committer: Author,
    pub message: String,
}

/// Serialize a commit as UTF-8 text: tree, optional parent, author,
/// committer, blank line, message.
pub fn encode(commit: &Commit) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(&format!("tree {}\n", commit.tree));
    if let Some(parent) = &commit.parent {
        out.push_str(&format!("parent {}\n", parent));
    }
    out.push_str(&format!("author {}\n", commit.author.encode()));
    out.push_str(&format!("committer {}\n", commit.committer.encode()));
    out.push('\n');
    out.push_str(&commit.message);
    out.into_bytes()
}

/// Parse commit text. Tolerates a missing parent line; a record without a
/// recognizable tree line is a decode error.
pub fn decode(data: &[u8]) -> Result<Commit> {
    let text =
        std::str::from_utf8(data).map_err(|_| Error::Decode("commit is not UTF-8".to_string()))?;

    let mut tree = None;
    let mut parent = None;
    let mut author = None;
    let mut committer = None;
    let mut message = String::new();

    let mut lines = text.split('\n');
    #[allow(clippy::while_let_on_iterator)]
    while let Some(line) = lines.next() {
        if line.is_empty() {
            // Header section ends at the first blank line; the rest is the
            // message, captured verbatim.
            message = lines.collect::<Vec<&str>>().join("\n");
            break;
        }

        if let Some(rest) = line.strip_prefix("tree ") {
            tree = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("parent ") {
            parent = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("author ") {
            author = Some(Author::decode(rest)?);
        } else if let Some(rest) = line.strip_prefix("committer ") {
            committer = Some(Author::decode(rest)?);
        }
        // Unknown header lines are skipped rather than rejected
    }

    let tree = tree.ok_or_else(|| Error::Decode("commit has no tree line".to_string()))?;
    let author = author.ok_or_else(|| Error::Decode("commit has no author line".to_string()))?;
    let committer =
        committer.ok_or_else(|| Error::Decode("commit has no committer line".to_string()))?;

    Ok(Commit {
        tree,
        parent,
        author,
        committer,
        message,
    })
}
