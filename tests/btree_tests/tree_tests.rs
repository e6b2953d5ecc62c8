//! Tests for BpTree creation, insertion and lookup
//!
//! These tests verify:
//! - Creating, closing and reopening trees
//! - Key size validation on create and on every operation
//! - Sorted iteration and structural checks after splits
//! - Values of every placement class (inline, varchar, big chain)
//! - Behaviour with the node cache disabled

use std::collections::BTreeMap;
use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata::{BlockStore, BpTree, Config, StrataError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_tree(key_size: usize) -> BpTree {
    BpTree::create(BlockStore::anonymous(4096).unwrap(), key_size).unwrap()
}

fn setup_tree_path() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("tree.db");
    (temp_dir, path)
}

fn key(i: u64) -> [u8; 8] {
    i.to_be_bytes()
}

fn collect_entries(tree: &BpTree) -> Vec<(Vec<u8>, Vec<u8>)> {
    tree.iter().unwrap().map(|entry| entry.unwrap()).collect()
}

fn collect_values(tree: &BpTree, k: &[u8]) -> Vec<Vec<u8>> {
    tree.find(k).unwrap().map(|value| value.unwrap()).collect()
}

// =============================================================================
// Create/Open Tests
// =============================================================================

#[test]
fn test_new_tree_is_empty() {
    let tree = setup_tree(8);

    assert!(tree.is_empty());
    assert_eq!(tree.len(), 0);
    assert_eq!(tree.key_size(), 8);
    assert!(!tree.has(&key(1)).unwrap());
    assert!(collect_entries(&tree).is_empty());
    tree.verify().unwrap();
}

#[test]
fn test_create_rejects_unusable_key_sizes() {
    let store = BlockStore::anonymous(4096).unwrap();
    assert!(matches!(
        BpTree::create(store, 0),
        Err(StrataError::Config(_))
    ));

    let store = BlockStore::anonymous(4096).unwrap();
    assert!(matches!(
        BpTree::create(store, 2000),
        Err(StrataError::Config(_))
    ));
}

#[test]
fn test_open_store_without_tree_is_corrupt_meta() {
    let store = BlockStore::anonymous(4096).unwrap();

    let err = BpTree::open(store).unwrap_err();
    assert!(matches!(err, StrataError::CorruptMeta(_)));
}

#[test]
fn test_reopen_keeps_entries() {
    let (_temp, path) = setup_tree_path();

    {
        let store = BlockStore::create(&path, 4096).unwrap();
        let mut tree = BpTree::create(store, 8).unwrap();
        for i in 0..1_000 {
            tree.add(&key(i), format!("value-{}", i).as_bytes()).unwrap();
        }
        tree.close().unwrap();
    }

    let tree = BpTree::open(BlockStore::open(&path).unwrap()).unwrap();
    assert_eq!(tree.len(), 1_000);
    assert_eq!(tree.key_size(), 8);
    assert_eq!(collect_values(&tree, &key(737)), vec![b"value-737".to_vec()]);
    tree.verify().unwrap();
}

#[test]
fn test_into_store_then_open() {
    let mut tree = setup_tree(4);
    tree.add(b"abcd", b"1").unwrap();

    let store = tree.into_store().unwrap();
    let tree = BpTree::open(store).unwrap();

    assert!(tree.has(b"abcd").unwrap());
}

#[test]
fn test_create_with_config() {
    let (_temp, path) = setup_tree_path();
    let config = Config::builder()
        .path(&path)
        .block_size(8192)
        .growth_blocks(8)
        .build();

    let store = BlockStore::with_config(&config).unwrap();
    let mut tree = BpTree::create_with(store, 16, &config).unwrap();
    tree.add(&[7u8; 16], b"hello").unwrap();

    assert_eq!(tree.store().block_size(), 8192);
    assert!(tree.has(&[7u8; 16]).unwrap());
    tree.close().unwrap();
}

// =============================================================================
// Key Size Tests
// =============================================================================

#[test]
fn test_operations_reject_wrong_key_size() {
    let mut tree = setup_tree(8);

    let err = tree.add(b"short", b"v").unwrap_err();
    assert!(matches!(
        err,
        StrataError::KeySizeMismatch {
            expected: 8,
            actual: 5
        }
    ));
    assert!(matches!(
        tree.has(b"short"),
        Err(StrataError::KeySizeMismatch { .. })
    ));
    assert!(matches!(
        tree.find(b"toolongkey"),
        Err(StrataError::KeySizeMismatch { .. })
    ));
    assert!(matches!(
        tree.remove(b"x", |_| true),
        Err(StrataError::KeySizeMismatch { .. })
    ));
    assert_eq!(tree.len(), 0);
}

// =============================================================================
// Insertion Tests
// =============================================================================

#[test]
fn test_add_then_find() {
    let mut tree = setup_tree(8);

    tree.add(&key(5), b"five").unwrap();
    tree.add(&key(1), b"one").unwrap();
    tree.add(&key(3), b"three").unwrap();

    assert!(tree.has(&key(3)).unwrap());
    assert!(!tree.has(&key(2)).unwrap());
    assert_eq!(collect_values(&tree, &key(1)), vec![b"one".to_vec()]);
    assert!(collect_values(&tree, &key(4)).is_empty());
    assert_eq!(tree.len(), 3);
}

#[test]
fn test_descending_inserts_split_correctly() {
    let mut tree = setup_tree(8);

    for i in (0..3_000).rev() {
        tree.add(&key(i), &[i as u8; 24]).unwrap();
    }

    tree.verify().unwrap();
    let keys: Vec<Vec<u8>> = collect_entries(&tree).into_iter().map(|(k, _)| k).collect();
    let expected: Vec<Vec<u8>> = (0..3_000).map(|i| key(i).to_vec()).collect();
    assert_eq!(keys, expected);
}

#[test]
fn test_many_keys_build_several_levels() {
    let mut tree = setup_tree(8);

    // Large values keep leaves small so internal levels fill quickly
    for i in 0..20_000u64 {
        let k = key(i.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        tree.add(&k, &[1u8; 200]).unwrap();
    }

    tree.verify().unwrap();
    assert_eq!(tree.len(), 20_000);
    let keys: Vec<Vec<u8>> = tree.keys().unwrap().map(|k| k.unwrap()).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    assert_eq!(keys.len(), 20_000);
}

#[test]
fn test_random_inserts_match_model() {
    let mut tree = setup_tree(4);
    let mut model: BTreeMap<Vec<u8>, Vec<Vec<u8>>> = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(0xA71A5);

    for _ in 0..4_000 {
        let k = rng.gen_range(0u32..600).to_be_bytes().to_vec();
        let len = match rng.gen_range(0..20) {
            0 => rng.gen_range(1_100..3_000),
            1 => 5_000,
            _ => rng.gen_range(0..60),
        };
        let value: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        tree.add(&k, &value).unwrap();
        model.entry(k).or_default().push(value);
    }

    tree.verify().unwrap();
    for (k, values) in &model {
        let mut found = collect_values(&tree, k);
        let mut expected = values.clone();
        found.sort();
        expected.sort();
        assert_eq!(found, expected);
    }
    assert_eq!(tree.len(), 4_000);
}

// =============================================================================
// Value Placement Tests
// =============================================================================

#[test]
fn test_values_of_every_size_round_trip() {
    let mut tree = setup_tree(8);
    let inline_max = tree.inline_value_limit();
    let big_at = tree.big_value_threshold() + 1;
    let sizes = [0, 1, inline_max, inline_max + 1, 3_000, big_at - 1, big_at, 50_000];

    for (i, &size) in sizes.iter().enumerate() {
        let value: Vec<u8> = (0..size).map(|b| (b % 251) as u8 ^ i as u8).collect();
        tree.add(&key(i as u64), &value).unwrap();
    }

    tree.verify().unwrap();
    for (i, &size) in sizes.iter().enumerate() {
        let value = &collect_values(&tree, &key(i as u64))[0];
        assert_eq!(value.len(), size);
        assert!(value
            .iter()
            .enumerate()
            .all(|(b, v)| *v == (b % 251) as u8 ^ i as u8));
    }
}

#[test]
fn test_varchar_values_use_varchar_store() {
    let mut tree = setup_tree(8);
    let size = tree.inline_value_limit() + 10;

    tree.add(&key(1), &vec![3u8; size]).unwrap();
    let free_after_add = tree.varchar().free_bytes(tree.store()).unwrap();

    tree.remove(&key(1), |_| true).unwrap();
    let free_after_remove = tree.varchar().free_bytes(tree.store()).unwrap();

    assert!(free_after_remove > free_after_add);
    tree.verify().unwrap();
}

#[test]
fn test_inline_limit_override() {
    let config = Config::builder().inline_value_limit(16).build();
    let store = BlockStore::anonymous(4096).unwrap();
    let mut tree = BpTree::create_with(store, 8, &config).unwrap();
    assert_eq!(tree.inline_value_limit(), 16);

    for i in 0..500 {
        tree.add(&key(i), &[i as u8; 40]).unwrap();
    }

    tree.verify().unwrap();
    assert_eq!(collect_values(&tree, &key(250)), vec![vec![250u8; 40]]);
}

#[test]
fn test_inline_limit_too_large_is_rejected() {
    let config = Config::builder().inline_value_limit(4000).build();
    let store = BlockStore::anonymous(4096).unwrap();

    let err = BpTree::create_with(store, 8, &config).unwrap_err();
    assert!(matches!(err, StrataError::Config(_)));
}

// =============================================================================
// Node Cache Tests
// =============================================================================

#[test]
fn test_works_without_node_cache() {
    let config = Config::builder().node_cache_capacity(0).build();
    let store = BlockStore::anonymous(4096).unwrap();
    let mut tree = BpTree::create_with(store, 8, &config).unwrap();

    for i in 0..2_000 {
        tree.add(&key(i * 7 % 2_000), &[9u8; 100]).unwrap();
    }

    tree.verify().unwrap();
    assert_eq!(collect_entries(&tree).len(), 2_000);
}

#[test]
fn test_tiny_node_cache_survives_growth() {
    let config = Config::builder().node_cache_capacity(2).build();
    let store = BlockStore::anonymous(4096).unwrap();
    let mut tree = BpTree::create_with(store, 8, &config).unwrap();

    for i in 0..5_000 {
        tree.add(&key(i), &[5u8; 150]).unwrap();
        if i % 1_000 == 999 {
            tree.verify().unwrap();
        }
    }
    assert!(tree.has(&key(4_321)).unwrap());
}
