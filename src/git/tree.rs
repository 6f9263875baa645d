//! Canonical git tree encoding.
//!
//! Layout per entry: ASCII mode, one space, the entry name, one NUL, then the
//! 20 raw bytes of the child object id. Entries are sorted byte-wise by name
//! before encoding, so any permutation of the same set serializes to the same
//! bytes and hashes to the same id.

use crate::error::{Error, Result};
use crate::git::object::ObjectId;

/// Entry modes this store supports. No executable, symlink, or submodule
/// entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Regular file, `100644`
    Regular,
    /// Subdirectory, `40000`
    Directory,
}

impl FileMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileMode::Regular => "100644",
            FileMode::Directory => "40000",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "100644" => Ok(FileMode::Regular),
            "40000" => Ok(FileMode::Directory),
            other => Err(Error::Decode(format!("unsupported tree mode: {}", other))),
        }
    }
}

/// One directory entry: mode, name, child object id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: FileMode,
    pub name: String,
    pub sha: ObjectId,
}

impl TreeEntry {
    pub fn file(name: impl Into<String>, sha: impl Into<ObjectId>) -> Self {
        TreeEntry {
            mode: FileMode::Regular,
            name: name.into(),
            sha: sha.into(),
        }
    }

    pub fn dir(name: impl Into<String>, sha: impl Into<ObjectId>) -> Self {
        TreeEntry {
            mode: FileMode::Directory,
            name: name.into(),
            sha: sha.into(),
        }
    }
}

/// Encode entries as canonical tree bytes. Sorts before encoding; the input
/// order never matters.
pub fn encode(entries: &[TreeEntry]) -> Result<Vec<u8>> {
    let mut sorted: Vec<&TreeEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

    let mut out = Vec::new();
    for entry in sorted {
        let raw = hex::decode(&entry.sha)
            .map_err(|_| Error::Decode(format!("entry {} has non-hex sha", entry.name)))?;
        if raw.len() != 20 {
            return Err(Error::Decode(format!(
                "entry {} sha is {} bytes, want 20",
                entry.name,
                raw.len()
            )));
        }
        out.extend_from_slice(entry.mode.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(entry.name.as_bytes());
        out.push(0);
        out.extend_from_slice(&raw);
    }
    Ok(out)
}

/// Decode canonical tree bytes back into entries.
pub fn decode(data: &[u8]) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        let space = data[pos..]
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| Error::Decode("tree entry missing mode delimiter".to_string()))?;
        let mode_str = std::str::from_utf8(&data[pos..pos + space])
            .map_err(|_| Error::Decode("tree mode is not ASCII".to_string()))?;
        let mode = FileMode::parse(mode_str)?;
        pos += space + 1;

        let nul = data[pos..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::Decode("tree entry missing name terminator".to_string()))?;
        let name = std::str::from_utf8(&data[pos..pos + nul])
            .map_err(|_| Error::Decode("tree entry name is not UTF-8".to_string()))?
            .to_string();
        pos += nul + 1;

        if pos + 20 > data.len() {
            return Err(Error::Decode(format!(
                "tree entry {} truncated before sha",
                name
            )));
        }
        let sha = hex::encode(&data[pos..pos + 20]);
        pos += 20;

        entries.push(TreeEntry { mode, name, sha });
    }

    Ok(entries)
}
