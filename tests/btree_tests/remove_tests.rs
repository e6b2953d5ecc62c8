//! Tests for BpTree removal
//!
//! These tests verify:
//! - Predicate-driven removal of some or all values under a key
//! - `NotFound` for keys with no entries
//! - Emptied leaves are unlinked and their blocks freed
//! - A run whose head leaf empties is re-indexed by its next leaf
//! - The root collapses back to a leaf as the tree shrinks
//! - Removing everything leaves a usable empty tree

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use strata::{BlockStore, BpTree, StrataError};

/// Tag byte of a leaf node
const LEAF_TAG: u8 = 0x02;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_tree() -> BpTree {
    BpTree::create(BlockStore::anonymous(4096).unwrap(), 8).unwrap()
}

fn setup_filled_tree(count: u64) -> BpTree {
    let mut tree = setup_tree();
    for i in 0..count {
        tree.add(&key(i), &[i as u8; 24]).unwrap();
    }
    tree
}

fn key(i: u64) -> [u8; 8] {
    i.to_be_bytes()
}

fn value(i: u64) -> [u8; 8] {
    i.to_le_bytes()
}

fn value_index(v: &[u8]) -> u64 {
    u64::from_le_bytes(v.try_into().unwrap())
}

fn collect_values(tree: &BpTree, k: &[u8]) -> Vec<Vec<u8>> {
    tree.find(k).unwrap().map(|v| v.unwrap()).collect()
}

fn root_tag(tree: &BpTree) -> u8 {
    let root = tree.meta().root;
    tree.store().with_blocks(root, 1, |buf| Ok(buf[0])).unwrap()
}

// =============================================================================
// Basic Removal Tests
// =============================================================================

#[test]
fn test_remove_single_entry() {
    let mut tree = setup_filled_tree(10);

    let removed = tree.remove(&key(4), |_| true).unwrap();

    assert_eq!(removed, 1);
    assert!(!tree.has(&key(4)).unwrap());
    assert!(tree.has(&key(5)).unwrap());
    assert_eq!(tree.len(), 9);
    tree.verify().unwrap();
}

#[test]
fn test_remove_missing_key_is_not_found() {
    let mut tree = setup_filled_tree(10);

    let err = tree.remove(&key(99), |_| true).unwrap_err();
    assert!(matches!(err, StrataError::NotFound));
    assert_eq!(tree.len(), 10);

    let mut empty = setup_tree();
    assert!(matches!(
        empty.remove(&key(1), |_| true),
        Err(StrataError::NotFound)
    ));
}

#[test]
fn test_predicate_selects_values() {
    let mut tree = setup_tree();
    for i in 0..10 {
        tree.add(&key(7), &value(i)).unwrap();
    }

    let removed = tree.remove(&key(7), |v| value_index(v) % 2 == 0).unwrap();

    assert_eq!(removed, 5);
    let left: Vec<u64> = collect_values(&tree, &key(7))
        .iter()
        .map(|v| value_index(v))
        .collect();
    assert_eq!(left, vec![1, 3, 5, 7, 9]);
    assert_eq!(tree.len(), 5);
}

#[test]
fn test_predicate_matching_nothing_removes_nothing() {
    let mut tree = setup_filled_tree(20);

    let removed = tree.remove(&key(3), |_| false).unwrap();

    assert_eq!(removed, 0);
    assert!(tree.has(&key(3)).unwrap());
    assert_eq!(tree.len(), 20);
}

#[test]
fn test_predicate_sees_stored_values() {
    let mut tree = setup_tree();
    tree.add(&key(1), b"keep").unwrap();
    tree.add(&key(1), b"drop").unwrap();
    tree.add(&key(1), &vec![b'x'; 2_000]).unwrap();

    let mut seen = Vec::new();
    tree.remove(&key(1), |v| {
        seen.push(v.to_vec());
        v != b"keep"
    })
    .unwrap();

    assert_eq!(seen.len(), 3);
    assert!(seen.contains(&vec![b'x'; 2_000]));
    assert_eq!(collect_values(&tree, &key(1)), vec![b"keep".to_vec()]);
}

// =============================================================================
// Run Removal Tests
// =============================================================================

#[test]
fn test_remove_whole_run_frees_leaves() {
    let mut tree = setup_tree();
    for i in 0..500 {
        tree.add(&key(42), &value(i)).unwrap();
    }
    let free_before = tree.store().free_list_len().unwrap();

    let removed = tree.remove(&key(42), |_| true).unwrap();

    assert_eq!(removed, 500);
    assert!(!tree.has(&key(42)).unwrap());
    assert!(tree.is_empty());
    assert!(tree.store().free_list_len().unwrap() > free_before);
    tree.verify().unwrap();
}

#[test]
fn test_emptied_run_head_is_replaced() {
    let mut tree = setup_tree();
    for i in 0..500 {
        tree.add(&key(42), &value(i)).unwrap();
    }

    // The head leaf holds the first ~226 values
    let removed = tree.remove(&key(42), |v| value_index(v) < 226).unwrap();

    assert_eq!(removed, 226);
    tree.verify().unwrap();
    let left: Vec<u64> = collect_values(&tree, &key(42))
        .iter()
        .map(|v| value_index(v))
        .collect();
    assert_eq!(left, (226..500).collect::<Vec<u64>>());
}

#[test]
fn test_run_removed_from_middle_of_tree() {
    let mut tree = setup_tree();
    for i in 0..300 {
        tree.add(&key(i), &value(i)).unwrap();
    }
    for i in 0..600 {
        tree.add(&key(150), &value(1_000 + i)).unwrap();
    }

    let removed = tree.remove(&key(150), |_| true).unwrap();

    assert_eq!(removed, 601);
    assert!(!tree.has(&key(150)).unwrap());
    assert!(tree.has(&key(149)).unwrap());
    assert!(tree.has(&key(151)).unwrap());
    assert_eq!(tree.len(), 299);
    tree.verify().unwrap();
}

// =============================================================================
// Shrinking Tests
// =============================================================================

#[test]
fn test_root_collapses_to_leaf() {
    let mut tree = setup_filled_tree(2_000);
    assert_ne!(root_tag(&tree), LEAF_TAG);

    for i in 5..2_000 {
        tree.remove(&key(i), |_| true).unwrap();
    }

    tree.verify().unwrap();
    assert_eq!(root_tag(&tree), LEAF_TAG);
    assert_eq!(tree.len(), 5);
    let keys: Vec<Vec<u8>> = tree.keys().unwrap().map(|k| k.unwrap()).collect();
    assert_eq!(keys, (0..5).map(|i| key(i).to_vec()).collect::<Vec<_>>());
}

#[test]
fn test_sparse_removal_merges_leaves() {
    let mut tree = setup_filled_tree(3_000);
    let free_before = tree.store().free_list_len().unwrap();

    // Keep every fifth key so neighbouring leaves become small
    for i in (0..3_000).filter(|i| i % 5 != 0) {
        tree.remove(&key(i), |_| true).unwrap();
    }

    tree.verify().unwrap();
    assert_eq!(tree.len(), 600);
    assert!(tree.store().free_list_len().unwrap() > free_before);
    for i in (0..3_000).step_by(5) {
        assert!(tree.has(&key(i)).unwrap());
    }
}

#[test]
fn test_remove_everything_in_random_order() {
    let mut tree = setup_filled_tree(2_500);
    let mut order: Vec<u64> = (0..2_500).collect();
    order.shuffle(&mut StdRng::seed_from_u64(11));

    for (n, i) in order.iter().enumerate() {
        assert_eq!(tree.remove(&key(*i), |_| true).unwrap(), 1);
        if n % 500 == 0 {
            tree.verify().unwrap();
        }
    }

    assert!(tree.is_empty());
    assert_eq!(root_tag(&tree), LEAF_TAG);
    assert_eq!(tree.iter().unwrap().count(), 0);
    tree.verify().unwrap();

    // Still usable afterwards
    tree.add(&key(1), b"again").unwrap();
    assert_eq!(collect_values(&tree, &key(1)), vec![b"again".to_vec()]);
}

#[test]
fn test_wrong_key_size_leaves_tree_untouched() {
    let mut tree = setup_filled_tree(3);

    let err = tree.remove(b"abc", |_| true).unwrap_err();

    assert!(matches!(
        err,
        StrataError::KeySizeMismatch {
            expected: 8,
            actual: 3
        }
    ));
    assert_eq!(tree.len(), 3);
}
