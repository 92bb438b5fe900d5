pub mod duplicates;
pub mod hash;
pub mod store;
pub mod types;

pub use duplicates::{DuplicatePolicy, DuplicateSummary, HashGroup, HashGroups, group, group_by_hash};
pub use hash::{content_hash, hash_file};
pub use store::{ArtifactStore, MANIFEST_FILE, Provenance, sanitize_label};
pub use types::{Artifact, ArtifactId, ContentHash, StoreError, StoreResult};
