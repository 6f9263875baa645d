//! Smart-HTTP discovery: pkt-line framing and the upload-pack ref
//! advertisement.
//!
//! Only the first stage of the protocol is spoken here; ref discovery is
//! enough for a standard git client to begin a clone. The pack transfer
//! itself is out of scope.

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::git::{ObjectId, ZERO_ID};
use crate::repo::{Repository, DEFAULT_BRANCH};
use crate::storage::{CollectionDirectory, RefValue, RepoId, StorageBackend};

/// The only service this endpoint serves.
pub const UPLOAD_PACK_SERVICE: &str = "git-upload-pack";

/// Flush packet closing each section of the response.
pub const FLUSH_PKT: &[u8] = b"0000";

const AGENT: &str = concat!("agent=gitvault/", env!("CARGO_PKG_VERSION"));

/// Largest payload a pkt-line can carry: the length prefix is four hex
/// digits and counts itself.
pub const MAX_PKT_PAYLOAD: usize = 0xffff - 4;

/// Frame one payload as a pkt-line: 4 hex digits of total length (prefix
/// included), then the payload.
pub fn pkt_line(payload: &[u8]) -> Vec<u8> {
    debug_assert!(
        payload.len() <= MAX_PKT_PAYLOAD,
        "pkt-line payload too long: {} bytes",
        payload.len()
    );
    let mut out = format!("{:04x}", payload.len() + 4).into_bytes();
    out.extend_from_slice(payload);
    out
}

/// Deterministic placeholder commit id for a collection that has content
/// rows but no real history: SHA-1 over the sorted path/content pairs.
///
/// Purely a compatibility affordance. The id is a function of the current
/// rows; editing any content yields a different id, and no identity is
/// stored anywhere.
pub fn virtual_commit_id(files: &[(String, Vec<u8>)]) -> ObjectId {
    let mut sorted: Vec<&(String, Vec<u8>)> = files.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha1::new();
    hasher.update(b"virtual-commit\0");
    for (path, content) in sorted {
        hasher.update(path.as_bytes());
        hasher.update([0]);
        hasher.update(content);
        hasher.update([0]);
    }
    hex::encode(hasher.finalize())
}

fn capability_string(symref_target: Option<&str>) -> String {
    let mut caps = String::from("side-band-64k thin-pack ofs-delta");
    if let Some(target) = symref_target {
        caps.push_str(&format!(" symref=HEAD:{}", target));
    }
    caps.push(' ');
    caps.push_str(AGENT);
    caps
}

/// Build the full `info/refs` advertisement body for one repository.
///
/// Section order: service announcement, flush, ref list (HEAD first, then
/// `refs/heads/*`), flush. The capability string rides after a NUL on the
/// first ref line only.
pub fn advertise_refs<S>(storage: &S, repo: RepoId) -> Result<Vec<u8>>
where
    S: StorageBackend + CollectionDirectory,
{
    let repository = Repository::new(storage, repo);

    let symref_target = match storage.read_ref(repo, "HEAD")? {
        Some(RefValue::Symbolic(target)) => Some(target),
        _ => None,
    };
    let head = repository.resolve_ref("HEAD")?;

    let mut lines: Vec<(ObjectId, String)> = Vec::new();
    if let Some(head) = head {
        lines.push((head, "HEAD".to_string()));
    }
    for (name, value) in storage.list_refs(repo)? {
        if let (true, RefValue::Direct(sha)) = (name.starts_with("refs/heads/"), value) {
            lines.push((sha, name));
        }
    }

    // No real history: synthesize a virtual head from the collection's
    // current content rows so a plain clone still works.
    if lines.is_empty() {
        let files = storage.uncommitted_files(repo)?;
        if !files.is_empty() {
            let sha = virtual_commit_id(&files);
            lines.push((sha, format!("refs/heads/{}", DEFAULT_BRANCH)));
        }
    }

    let caps = capability_string(symref_target.as_deref());

    let mut body = Vec::new();
    body.extend_from_slice(&pkt_line(
        format!("# service={}\n", UPLOAD_PACK_SERVICE).as_bytes(),
    ));
    body.extend_from_slice(FLUSH_PKT);

    if lines.is_empty() {
        // Nothing to advertise at all: capabilities under the placeholder id
        body.extend_from_slice(&pkt_line(
            format!("{} capabilities^{{}}\0{}\n", ZERO_ID, caps).as_bytes(),
        ));
    } else {
        for (i, (sha, name)) in lines.iter().enumerate() {
            let line = if i == 0 {
                format!("{} {}\0{}\n", sha, name, caps)
            } else {
                format!("{} {}\n", sha, name)
            };
            body.extend_from_slice(&pkt_line(line.as_bytes()));
        }
    }
    body.extend_from_slice(FLUSH_PKT);

    Ok(body)
}

/// One parsed packet: a payload, or a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Line(Vec<u8>),
    Flush,
}

/// Parse a pkt-line stream, validating that every declared length matches
/// the bytes actually present.
pub fn parse_pkt_lines(mut body: &[u8]) -> Result<Vec<Packet>> {
    let mut packets = Vec::new();

    while !body.is_empty() {
        if body.len() < 4 {
            return Err(Error::Protocol("truncated pkt-line length".to_string()));
        }
        let len_str = std::str::from_utf8(&body[..4])
            .map_err(|_| Error::Protocol("pkt-line length is not ASCII".to_string()))?;
        let len = usize::from_str_radix(len_str, 16)
            .map_err(|_| Error::Protocol(format!("bad pkt-line length: {:?}", len_str)))?;

        if len == 0 {
            packets.push(Packet::Flush);
            body = &body[4..];
            continue;
        }
        if len < 4 || len > body.len() {
            return Err(Error::Protocol(format!(
                "pkt-line declares {} bytes, {} available",
                len,
                body.len()
            )));
        }
        packets.push(Packet::Line(body[4..len].to_vec()));
        body = &body[len..];
    }

    Ok(packets)
}
