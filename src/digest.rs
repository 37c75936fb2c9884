// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Digest trees and leaf diffing.
//!
//! A network's cached object set is summarised as a one-level Merkle tree:
//!
//! ```text
//! root ─────── hash(id1:d1; id2:d2; ...)
//! ├── id1 ─── d1 = hash(obj1)
//! ├── id2 ─── d2 = hash(obj2)
//! └── ...
//! ```
//!
//! Comparing roots tells a caller whether anything changed at all; diffing
//! the sorted leaf lists tells it exactly which objects to refresh.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Content hash of a blob (hex SHA-256 when produced by this crate).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest {
    pub value: String,
}

impl Digest {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into() }
    }
}

/// Digest of a single object, keyed by its id within the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafDigest {
    pub id: String,
    pub digest: Digest,
}

impl LeafDigest {
    pub fn new(id: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            digest: Digest::new(digest),
        }
    }
}

/// Per-network summary: root digest plus leaf digests sorted by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestTree {
    pub root_digest: Digest,
    pub leaf_digests: Vec<LeafDigest>,
}

impl DigestTree {
    /// Build a tree over a set of object blobs.
    pub fn from_objects(objects: &HashMap<String, Vec<u8>>) -> Self {
        let sorted: BTreeMap<&String, &Vec<u8>> = objects.iter().collect();
        let leaf_digests: Vec<LeafDigest> = sorted
            .into_iter()
            .map(|(id, obj)| LeafDigest {
                id: id.clone(),
                digest: digest_of(obj),
            })
            .collect();
        Self {
            root_digest: root_digest(&leaf_digests),
            leaf_digests,
        }
    }
}

/// Hex SHA-256 of an object blob.
pub fn digest_of(obj: &[u8]) -> Digest {
    Digest::new(hex::encode(Sha256::digest(obj)))
}

/// Fold an id-sorted leaf list into a root digest.
pub fn root_digest(leaves: &[LeafDigest]) -> Digest {
    let mut hasher = Sha256::new();
    for leaf in leaves {
        hasher.update(leaf.id.as_bytes());
        hasher.update(b":");
        hasher.update(leaf.digest.value.as_bytes());
        hasher.update(b";");
    }
    Digest::new(hex::encode(hasher.finalize()))
}

/// Result of diffing two leaf lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafDigestsDiff {
    /// Ids that are new or whose digest changed, mapped to the new digest.
    pub to_renew: BTreeMap<String, String>,
    /// Ids present before but gone now, in the order they appeared in `prev`.
    pub deleted: Vec<String>,
}

impl LeafDigestsDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_renew.is_empty() && self.deleted.is_empty()
    }
}

/// Diff two leaf digest lists with a single merge pass.
///
/// Both inputs must be sorted ascending by id with no duplicate ids; this is
/// not checked.
pub fn leaf_digests_diff(prev: &[LeafDigest], next: &[LeafDigest]) -> LeafDigestsDiff {
    let mut diff = LeafDigestsDiff::default();
    let (mut i, mut j) = (0, 0);

    while i < prev.len() && j < next.len() {
        let (p, n) = (&prev[i], &next[j]);
        match p.id.cmp(&n.id) {
            std::cmp::Ordering::Equal => {
                if p.digest != n.digest {
                    diff.to_renew.insert(n.id.clone(), n.digest.value.clone());
                }
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Greater => {
                diff.to_renew.insert(n.id.clone(), n.digest.value.clone());
                j += 1;
            }
            std::cmp::Ordering::Less => {
                diff.deleted.push(p.id.clone());
                i += 1;
            }
        }
    }

    diff.deleted.extend(prev[i..].iter().map(|p| p.id.clone()));
    for n in &next[j..] {
        diff.to_renew.insert(n.id.clone(), n.digest.value.clone());
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(pairs: &[(&str, &str)]) -> Vec<LeafDigest> {
        pairs.iter().map(|(id, d)| LeafDigest::new(*id, *d)).collect()
    }

    #[test]
    fn test_diff_mixed_changes() {
        let prev = leaves(&[("1", "apple"), ("2", "banana"), ("4", "dragonfruit")]);
        let next = leaves(&[("1", "apple"), ("2", "banana2"), ("3", "cherry")]);

        let diff = leaf_digests_diff(&prev, &next);

        let expected: BTreeMap<String, String> = [("2", "banana2"), ("3", "cherry")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(diff.to_renew, expected);
        assert_eq!(diff.deleted, vec!["4".to_string()]);
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let prev = leaves(&[("a", "1"), ("b", "2")]);
        assert!(leaf_digests_diff(&prev, &prev).is_empty());
    }

    #[test]
    fn test_diff_from_empty() {
        let next = leaves(&[("a", "1"), ("b", "2")]);
        let diff = leaf_digests_diff(&[], &next);
        assert_eq!(diff.to_renew.len(), 2);
        assert!(diff.deleted.is_empty());
    }

    #[test]
    fn test_diff_to_empty_keeps_order() {
        let prev = leaves(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let diff = leaf_digests_diff(&prev, &[]);
        assert!(diff.to_renew.is_empty());
        assert_eq!(diff.deleted, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_diff_interleaved() {
        let prev = leaves(&[("b", "1"), ("d", "1"), ("f", "1")]);
        let next = leaves(&[("a", "1"), ("c", "1"), ("d", "2"), ("g", "1")]);
        let diff = leaf_digests_diff(&prev, &next);
        assert_eq!(
            diff.to_renew.keys().cloned().collect::<Vec<_>>(),
            vec!["a", "c", "d", "g"]
        );
        assert_eq!(diff.deleted, vec!["b", "f"]);
    }

    #[test]
    fn test_tree_from_objects_is_sorted_and_deterministic() {
        let mut objects = HashMap::new();
        objects.insert("imsi2".to_string(), b"two".to_vec());
        objects.insert("imsi1".to_string(), b"one".to_vec());

        let tree = DigestTree::from_objects(&objects);
        assert_eq!(tree.leaf_digests[0].id, "imsi1");
        assert_eq!(tree.leaf_digests[1].id, "imsi2");
        assert_eq!(tree, DigestTree::from_objects(&objects));
        assert_eq!(tree.root_digest, root_digest(&tree.leaf_digests));
    }

    #[test]
    fn test_root_digest_changes_with_leaf() {
        let a = leaves(&[("1", "x")]);
        let b = leaves(&[("1", "y")]);
        assert_ne!(root_digest(&a), root_digest(&b));
        assert_eq!(digest_of(b"abc").value.len(), 64);
    }
}
