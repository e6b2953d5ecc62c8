//! Tests for duplicate keys
//!
//! These tests verify:
//! - Duplicates of one key spill into a chain of pure-run leaves
//! - Duplicates come back in insertion order
//! - Keys inserted before, after and between pure runs
//! - Runs survive a reopen and a structural check

use std::path::PathBuf;

use strata::{BlockStore, BpTree};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_tree() -> BpTree {
    BpTree::create(BlockStore::anonymous(4096).unwrap(), 8).unwrap()
}

fn setup_tree_path() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("dups.db");
    (temp_dir, path)
}

fn key(i: u64) -> [u8; 8] {
    i.to_be_bytes()
}

fn value(i: u64) -> [u8; 8] {
    i.to_le_bytes()
}

fn collect_values(tree: &BpTree, k: &[u8]) -> Vec<Vec<u8>> {
    tree.find(k).unwrap().map(|v| v.unwrap()).collect()
}

fn collect_keys(tree: &BpTree) -> Vec<Vec<u8>> {
    tree.iter().unwrap().map(|e| e.unwrap().0).collect()
}

// =============================================================================
// Pure Run Tests
// =============================================================================

#[test]
fn test_duplicates_spanning_several_leaves() {
    let mut tree = setup_tree();

    // 18-byte entries: about 226 per leaf, so three leaves
    for i in 0..500 {
        tree.add(&key(42), &value(i)).unwrap();
    }

    tree.verify().unwrap();
    let values = collect_values(&tree, &key(42));
    assert_eq!(values.len(), 500);
    let expected: Vec<Vec<u8>> = (0..500).map(|i| value(i).to_vec()).collect();
    assert_eq!(values, expected);
    assert_eq!(tree.len(), 500);
}

#[test]
fn test_duplicates_in_insertion_order_with_varchar_values() {
    let mut tree = setup_tree();
    let size = tree.inline_value_limit() + 1;

    for i in 0..40u8 {
        tree.add(&key(9), &vec![i; size]).unwrap();
    }

    tree.verify().unwrap();
    let values = collect_values(&tree, &key(9));
    assert_eq!(values.len(), 40);
    for (i, v) in values.iter().enumerate() {
        assert_eq!(v, &vec![i as u8; size]);
    }
}

#[test]
fn test_smaller_keys_before_a_run() {
    let mut tree = setup_tree();
    for i in 0..600 {
        tree.add(&key(1_000), &value(i)).unwrap();
    }

    for i in (0..300).rev() {
        tree.add(&key(i), &value(i)).unwrap();
    }

    tree.verify().unwrap();
    let keys = collect_keys(&tree);
    assert_eq!(keys.len(), 900);
    assert_eq!(keys[0], key(0));
    assert_eq!(keys[299], key(299));
    assert!(keys[300..].iter().all(|k| k == &key(1_000)));
}

#[test]
fn test_larger_keys_after_a_run() {
    let mut tree = setup_tree();
    for i in 0..600 {
        tree.add(&key(5), &value(i)).unwrap();
    }

    for i in 10..400 {
        tree.add(&key(i), &value(i)).unwrap();
    }

    tree.verify().unwrap();
    assert_eq!(collect_values(&tree, &key(5)).len(), 600);
    let keys = collect_keys(&tree);
    assert!(keys[..600].iter().all(|k| k == &key(5)));
    assert_eq!(keys[600], key(10));
    assert_eq!(keys.last().unwrap(), &key(399));
}

#[test]
fn test_interleaved_runs() {
    let mut tree = setup_tree();

    // Round robin across a handful of heavily duplicated keys
    for round in 0..400 {
        for k in [3u64, 7, 11, 15] {
            tree.add(&key(k), &value(round)).unwrap();
        }
        tree.add(&key(1_000 + round), &value(round)).unwrap();
    }

    tree.verify().unwrap();
    for k in [3u64, 7, 11, 15] {
        let values = collect_values(&tree, &key(k));
        assert_eq!(values.len(), 400);
        assert_eq!(values[0], value(0));
        assert_eq!(values[399], value(399));
    }
    assert_eq!(tree.len(), 2_000);

    let keys = collect_keys(&tree);
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

#[test]
fn test_keys_between_two_runs() {
    let mut tree = setup_tree();
    for i in 0..300 {
        tree.add(&key(100), &value(i)).unwrap();
        tree.add(&key(200), &value(i)).unwrap();
    }

    for i in 101..200 {
        tree.add(&key(i), &value(i)).unwrap();
    }

    tree.verify().unwrap();
    let distinct: Vec<Vec<u8>> = tree.keys().unwrap().map(|k| k.unwrap()).collect();
    assert_eq!(distinct.len(), 101);
    assert_eq!(distinct[0], key(100));
    assert_eq!(distinct[100], key(200));
    assert_eq!(collect_values(&tree, &key(150)), vec![value(150).to_vec()]);
}

#[test]
fn test_backward_over_run() {
    let mut tree = setup_tree();
    for i in 0..450 {
        tree.add(&key(8), &value(i)).unwrap();
    }
    tree.add(&key(2), b"low").unwrap();
    tree.add(&key(9), b"high").unwrap();

    let backward: Vec<(Vec<u8>, Vec<u8>)> = tree.backward().unwrap().map(|e| e.unwrap()).collect();
    assert_eq!(backward.len(), 452);
    assert_eq!(backward[0], (key(9).to_vec(), b"high".to_vec()));
    assert_eq!(backward[1], (key(8).to_vec(), value(449).to_vec()));
    assert_eq!(backward[450], (key(8).to_vec(), value(0).to_vec()));
    assert_eq!(backward[451], (key(2).to_vec(), b"low".to_vec()));
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_runs_survive_reopen() {
    let (_temp, path) = setup_tree_path();

    {
        let mut tree = BpTree::create(BlockStore::create(&path, 4096).unwrap(), 8).unwrap();
        for i in 0..700 {
            tree.add(&key(i % 3), &value(i)).unwrap();
        }
        tree.close().unwrap();
    }

    let tree = BpTree::open(BlockStore::open(&path).unwrap()).unwrap();
    tree.verify().unwrap();
    assert_eq!(collect_values(&tree, &key(0)).len(), 234);
    assert_eq!(collect_values(&tree, &key(1)).len(), 233);
    assert_eq!(collect_values(&tree, &key(2)).len(), 233);
}
