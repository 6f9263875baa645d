use std::fmt;

/// Errors produced by the object store, codecs, and the commit path.
///
/// Absence of an object, ref, or path is never an error: those APIs return
/// `Ok(None)` or an empty list and callers branch on it explicitly.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Sqlite(rusqlite::Error),
    /// Malformed tree or commit bytes. Fatal for the operation; never guessed
    /// around.
    Decode(String),
    /// A stored payload failed to decompress. Data integrity problem, distinct
    /// from "missing".
    Corrupt(String),
    /// A compare-and-swap ref update observed a head other than the expected
    /// one. Retryable: re-read the branch and rebuild on the fresh base.
    ConcurrencyConflict {
        ref_name: String,
        expected: Option<String>,
        actual: Option<String>,
    },
    /// Symbolic ref resolution exceeded the hop bound.
    CycleDetected(String),
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Sqlite(e) => write!(f, "SQLite error: {}", e),
            Error::Decode(msg) => write!(f, "Decode error: {}", msg),
            Error::Corrupt(msg) => write!(f, "Corrupt object: {}", msg),
            Error::ConcurrencyConflict {
                ref_name,
                expected,
                actual,
            } => write!(
                f,
                "Concurrent update on {}: expected {:?}, found {:?}",
                ref_name, expected, actual
            ),
            Error::CycleDetected(name) => {
                write!(f, "Symbolic ref chain too deep starting at {}", name)
            }
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Sqlite(e)
    }
}
