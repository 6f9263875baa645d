//! Git object identities and on-row encoding.

use std::io::{Read, Write};

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// Git object SHA-1 identifier (40 hex characters)
pub type ObjectId = String;

/// All-zero object id advertised for repositories with nothing to serve.
pub const ZERO_ID: &str = "0000000000000000000000000000000000000000";

/// Kind of a stored git object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Commit => "commit",
            ObjectKind::Tag => "tag",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "blob" => Ok(ObjectKind::Blob),
            "tree" => Ok(ObjectKind::Tree),
            "commit" => Ok(ObjectKind::Commit),
            "tag" => Ok(ObjectKind::Tag),
            other => Err(Error::Decode(format!("unknown object type: {}", other))),
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the git object id: SHA-1 over `"{kind} {len}\0"` plus the raw data.
///
/// Identical content always produces the identical id, which is what makes
/// object rows naturally deduplicate.
pub fn object_id(kind: ObjectKind, data: &[u8]) -> ObjectId {
    let header = format!("{} {}\0", kind.as_str(), data.len());
    let mut hasher = Sha1::new();
    hasher.update(header.as_bytes());
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compress object content for storage.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress a stored payload.
///
/// A payload that fails to inflate is a data-integrity failure, reported as
/// `Error::Corrupt` so callers never confuse it with a missing object.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::Corrupt(format!("zlib inflate failed: {}", e)))?;
    Ok(out)
}
