//! Merkle tree binding erasure-coded fragments to a batch digest.
//!
//! Every Propose and Echo carries a fragment together with a proof
//! against the tree root, so a Byzantine proposer cannot hand different
//! fragment sets to different validators under the same root. Odd levels
//! duplicate their last node.

use borsh::{BorshDeserialize, BorshSerialize};
use conductor_crypto::{blake3_concat, blake3_hash, Hash};
use serde::{Deserialize, Serialize};

/// Inclusion proof for one leaf, siblings bottom-up.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Index of the proven leaf.
    pub leaf_index: u32,
    /// Sibling hashes from leaf level to just below the root.
    pub siblings: Vec<Hash>,
}

/// A Merkle tree over fragment hashes.
#[derive(Debug, Clone)]
pub struct FragmentTree {
    levels: Vec<Vec<Hash>>,
}

impl FragmentTree {
    /// Build a tree over the given leaf hashes.
    ///
    /// Panics on an empty leaf set; reliable broadcast always has `n >= 4`
    /// fragments.
    pub fn build(leaves: &[Hash]) -> Self {
        assert!(!leaves.is_empty(), "fragment tree needs leaves");

        let mut levels = vec![leaves.to_vec()];
        while levels.last().expect("at least one level").len() > 1 {
            let current = levels.last().expect("at least one level");
            let mut next = Vec::with_capacity((current.len() + 1) / 2);
            for pair in current.chunks(2) {
                let right = if pair.len() == 2 { &pair[1] } else { &pair[0] };
                next.push(blake3_concat(&[&pair[0], right]));
            }
            levels.push(next);
        }

        Self { levels }
    }

    /// Build a tree directly over fragment byte contents.
    pub fn from_fragments<T: AsRef<[u8]>>(fragments: &[T]) -> Self {
        let leaves: Vec<Hash> = fragments
            .iter()
            .map(|f| blake3_hash(f.as_ref()))
            .collect();
        Self::build(&leaves)
    }

    /// The tree root.
    pub fn root(&self) -> Hash {
        self.levels.last().expect("at least one level")[0]
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> u32 {
        self.levels[0].len() as u32
    }

    /// Inclusion proof for the leaf at `index`.
    pub fn prove(&self, index: u32) -> Option<MerkleProof> {
        let mut position = index as usize;
        if position >= self.levels[0].len() {
            return None;
        }

        let mut siblings = Vec::with_capacity(self.levels.len() - 1);
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_position = position ^ 1;
            // Odd tail duplicates itself.
            let sibling = level.get(sibling_position).unwrap_or(&level[position]);
            siblings.push(*sibling);
            position /= 2;
        }

        Some(MerkleProof {
            leaf_index: index,
            siblings,
        })
    }
}

/// Verify that `fragment` sits at `proof.leaf_index` under `root`.
pub fn verify_fragment(root: &Hash, fragment: &[u8], proof: &MerkleProof) -> bool {
    let mut hash = blake3_hash(fragment);
    let mut position = proof.leaf_index as usize;

    for sibling in &proof.siblings {
        hash = if position % 2 == 0 {
            blake3_concat(&[&hash, sibling])
        } else {
            blake3_concat(&[sibling, &hash])
        };
        position /= 2;
    }

    hash == *root
}
