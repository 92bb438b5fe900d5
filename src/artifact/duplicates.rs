//! Duplicate screenshot detection.
//!
//! Groups artifacts by content hash. A run has adequate visual coverage when
//! `unique_hash_count >= total_artifacts - tolerance`; some duplicates are
//! legitimate (returning to an earlier UI state reproduces its screenshot).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::types::{Artifact, ArtifactId, ContentHash};

/// Mapping from content hash to the artifacts sharing it
pub type HashGroups<K = ArtifactId> = BTreeMap<ContentHash, BTreeSet<K>>;

/// Group arbitrary keyed hashes
pub fn group_by_hash<K: Ord>(items: impl IntoIterator<Item = (K, ContentHash)>) -> HashGroups<K> {
    let mut groups: HashGroups<K> = BTreeMap::new();
    for (key, hash) in items {
        groups.entry(hash).or_default().insert(key);
    }
    groups
}

/// Group artifacts by content hash
pub fn group(artifacts: &[Artifact]) -> HashGroups {
    group_by_hash(artifacts.iter().map(|a| (a.id.clone(), a.content_hash.clone())))
}

/// A hash shared by more than one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashGroup {
    pub hash: ContentHash,
    pub artifacts: Vec<ArtifactId>,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateSummary {
    pub total_artifacts: usize,
    pub unique_hash_count: usize,
    /// Only groups with more than one member
    pub duplicate_groups: Vec<HashGroup>,
}

impl DuplicateSummary {
    pub fn from_artifacts(artifacts: &[Artifact]) -> Self {
        let groups = group(artifacts);
        let duplicate_groups = groups
            .iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(hash, ids)| HashGroup {
                hash: hash.clone(),
                artifacts: ids.iter().cloned().collect(),
                labels: ids
                    .iter()
                    .filter_map(|id| artifacts.iter().find(|a| &a.id == id))
                    .map(|a| a.label.clone())
                    .collect(),
            })
            .collect();

        Self {
            total_artifacts: artifacts.len(),
            unique_hash_count: groups.len(),
            duplicate_groups,
        }
    }

    /// Artifacts whose content repeats an earlier one
    pub fn duplicate_count(&self) -> usize {
        self.total_artifacts - self.unique_hash_count
    }
}

/// How many duplicates a run may contain and still count as visually covered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicatePolicy {
    pub tolerance: usize,
}

impl DuplicatePolicy {
    pub fn new(tolerance: usize) -> Self {
        Self { tolerance }
    }

    pub fn is_adequate(&self, summary: &DuplicateSummary) -> bool {
        summary.unique_hash_count >= summary.total_artifacts.saturating_sub(self.tolerance)
    }
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_DUPLICATE_TOLERANCE)
    }
}
