pub mod commit;
pub mod object;
pub mod tree;

pub use commit::{Author, Commit};
pub use object::{object_id, ObjectId, ObjectKind, ZERO_ID};
pub use tree::{FileMode, TreeEntry};
