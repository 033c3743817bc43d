//! Merkle tree over transaction digests.
//!
//! The tree is stored as one flat sequence: leaves first, then each upper
//! level in order, the root last. A level with an odd node count pairs its
//! last node with itself. Blocks persist the whole sequence, so unpacking
//! can verify every level, not just the root.

use sha3::{Digest, Sha3_256};

use crate::records::Link;

/// Hash of a left/right node pair.
fn pair_digest(left: &Link, right: &Link) -> Link {
    let mut hasher = Sha3_256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    Link(digest)
}

/// Build the full tree for a block.
///
/// `coinbase` is always leaf zero. For a single leaf the tree is just
/// `[coinbase]` and the root equals the leaf.
pub fn full_merkle_tree(coinbase: Link, tx_ids: &[Link]) -> Vec<Link> {
    let leaf_count = 1 + tx_ids.len();
    let mut tree = Vec::with_capacity(tree_length(leaf_count));
    tree.push(coinbase);
    tree.extend_from_slice(tx_ids);

    let mut start = 0;
    let mut count = leaf_count;
    while count > 1 {
        let level_end = start + count;
        let mut next_count = 0;
        let mut i = start;
        while i < level_end {
            let left = tree[i];
            let right = if i + 1 < level_end { tree[i + 1] } else { left };
            tree.push(pair_digest(&left, &right));
            next_count += 1;
            i += 2;
        }
        start = level_end;
        count = next_count;
    }
    tree
}

/// Number of nodes a full tree stores for `leaf_count` leaves.
pub fn tree_length(leaf_count: usize) -> usize {
    if leaf_count == 0 {
        return 0;
    }
    let mut total = 0;
    let mut count = leaf_count;
    loop {
        total += count;
        if count == 1 {
            return total;
        }
        count = count.div_ceil(2);
    }
}

/// The root is the last stored node.
pub fn root(tree: &[Link]) -> Option<Link> {
    tree.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(byte: u8) -> Link {
        Link([byte; 32])
    }

    #[test]
    fn test_single_leaf_root_is_the_leaf() {
        let coinbase = leaf(0x42);
        let tree = full_merkle_tree(coinbase, &[]);
        assert_eq!(tree, vec![coinbase]);
        assert_eq!(root(&tree), Some(coinbase));
    }

    #[test]
    fn test_two_leaves() {
        let tree = full_merkle_tree(leaf(0x11), &[leaf(0x22)]);
        assert_eq!(tree.len(), 3);
        assert_eq!(tree[2], pair_digest(&leaf(0x11), &leaf(0x22)));
    }

    #[test]
    fn test_odd_leaf_is_duplicated() {
        let tree = full_merkle_tree(leaf(0x11), &[leaf(0x22), leaf(0x33)]);
        // levels: 3 leaves, 2 pairs, 1 root
        assert_eq!(tree.len(), 6);
        let h12 = pair_digest(&leaf(0x11), &leaf(0x22));
        let h33 = pair_digest(&leaf(0x33), &leaf(0x33));
        assert_eq!(tree[3], h12);
        assert_eq!(tree[4], h33);
        assert_eq!(tree[5], pair_digest(&h12, &h33));
    }

    #[test]
    fn test_determinism() {
        let tx_ids: Vec<Link> = (1..=7u8).map(leaf).collect();
        let first = full_merkle_tree(leaf(0), &tx_ids);
        let second = full_merkle_tree(leaf(0), &tx_ids);
        assert_eq!(first, second);
        // any leaf change moves the root
        let mut altered = tx_ids.clone();
        altered[3] = leaf(0xff);
        assert_ne!(
            root(&full_merkle_tree(leaf(0), &altered)),
            root(&first)
        );
    }

    #[test]
    fn test_tree_length() {
        assert_eq!(tree_length(0), 0);
        assert_eq!(tree_length(1), 1);
        assert_eq!(tree_length(2), 3);
        assert_eq!(tree_length(3), 6);
        assert_eq!(tree_length(4), 7);
        for leaves in 1..64 {
            let tx_ids: Vec<Link> = (0..leaves as u8 - 1).map(leaf).collect();
            let tree = full_merkle_tree(leaf(0xee), &tx_ids);
            assert_eq!(tree.len(), tree_length(leaves));
        }
    }
}
