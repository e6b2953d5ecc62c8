//! Tests for BpTree::verify on damaged trees
//!
//! These tests verify:
//! - Broken leaf links, unsorted leaves and stale routing keys are reported
//! - A big value whose chain was cut short is reported
//! - Unknown tags and impossible entry counts are violations, not panics
//! - Opening a store whose root is not a tree node is `CorruptMeta`

use strata::{BlockStore, BpTree, StrataError};

const INTERNAL_TAG: u8 = 0x01;
const LEAF_TAG: u8 = 0x02;
const LEAF_HEADER_SIZE: usize = 24;
/// 8-byte key, 2-byte length field, 8-byte inline value
const ENTRY_SIZE: usize = 18;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_tree() -> BpTree {
    BpTree::create(BlockStore::anonymous(4096).unwrap(), 8).unwrap()
}

/// Keys 0, 10, 20, ... over a root with leaf children
fn setup_two_level_tree() -> BpTree {
    let mut tree = setup_tree();
    for i in 0..2_000u64 {
        tree.add(&key(i * 10), &i.to_le_bytes()).unwrap();
    }
    tree.verify().unwrap();
    tree
}

fn key(i: u64) -> [u8; 8] {
    i.to_be_bytes()
}

fn read_block(store: &BlockStore, offset: u64) -> Vec<u8> {
    store.with_blocks(offset, 1, |buf| Ok(buf.to_vec())).unwrap()
}

fn patch(store: &BlockStore, offset: u64, at: usize, bytes: &[u8]) {
    store
        .with_blocks_mut(offset, 1, |buf| {
            buf[at..at + bytes.len()].copy_from_slice(bytes);
            Ok(())
        })
        .unwrap();
}

fn read_u16(buf: &[u8], at: usize) -> usize {
    u16::from_le_bytes([buf[at], buf[at + 1]]) as usize
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
}

/// Children of an internal root, in key order
fn root_children(tree: &BpTree) -> Vec<u64> {
    let root = read_block(tree.store(), tree.meta().root);
    assert_eq!(root[0], INTERNAL_TAG);
    let count = read_u16(&root, 4);
    let cap = read_u16(&root, 6);
    let ptrs_at = 8 + cap * 8;
    (0..count).map(|i| read_u64(&root, ptrs_at + i * 8)).collect()
}

fn entry_key_at(i: usize) -> usize {
    LEAF_HEADER_SIZE + i * ENTRY_SIZE
}

fn assert_violation(tree: &BpTree, needle: &str) {
    match tree.verify() {
        Err(StrataError::StructuralViolation(msg)) => {
            assert!(msg.contains(needle), "unexpected violation: {}", msg)
        }
        other => panic!("expected a structural violation, got {:?}", other),
    }
}

// =============================================================================
// Leaf Corruption Tests
// =============================================================================

#[test]
fn test_broken_prev_link_is_reported() {
    let tree = setup_two_level_tree();
    let children = root_children(&tree);
    assert!(children.len() >= 3);

    patch(tree.store(), children[1], 16, &0u64.to_le_bytes());

    assert_violation(&tree, &format!("points at {} whose prev is 0", children[1]));
}

#[test]
fn test_unsorted_leaf_is_reported() {
    let tree = setup_two_level_tree();
    let first = root_children(&tree)[0];

    // Entry 0 still matches the routing key; entry 1 jumps past everything
    patch(tree.store(), first, entry_key_at(1), &key(u64::MAX));

    assert_violation(&tree, &format!("leaf {} keys out of order", first));
}

#[test]
fn test_stale_routing_key_is_reported() {
    let tree = setup_two_level_tree();
    let second = root_children(&tree)[1];
    let old = read_u64(&read_block(tree.store(), second), entry_key_at(0)).swap_bytes();

    // Still below the leaf's second key, so the leaf itself stays sorted
    patch(tree.store(), second, entry_key_at(0), &key(old + 1));

    assert_violation(&tree, &format!("does not match child {}", second));
}

#[test]
fn test_unknown_tag_is_violation() {
    let tree = setup_two_level_tree();
    let second = root_children(&tree)[1];

    patch(tree.store(), second, 0, &[0x77]);

    assert_violation(&tree, "unknown node tag 0x77");
}

#[test]
fn test_entry_count_past_capacity_is_violation() {
    let tree = setup_two_level_tree();
    let second = root_children(&tree)[1];

    patch(tree.store(), second, 4, &4_000u16.to_le_bytes());

    assert_violation(&tree, "4000 entries but has room for");
}

#[test]
fn test_root_leaf_with_unknown_tag() {
    let mut tree = setup_tree();
    tree.add(&key(1), b"value").unwrap();

    patch(tree.store(), tree.meta().root, 0, &[0x77]);

    assert_violation(&tree, "unknown node tag");
}

// =============================================================================
// Internal Corruption Tests
// =============================================================================

#[test]
fn test_stale_internal_key_after_reopen() {
    let tree = setup_two_level_tree();
    let root = tree.meta().root;
    let store = tree.into_store().unwrap();

    // Internal key 1 sits right after key 0
    let old = read_u64(&read_block(&store, root), 16).swap_bytes();
    patch(&store, root, 16, &key(old - 1));

    let tree = BpTree::open(store).unwrap();
    assert_violation(&tree, "key 1 does not match child");
}

#[test]
fn test_open_with_foreign_root_is_corrupt_meta() {
    let mut tree = setup_tree();
    tree.add(&key(1), b"value").unwrap();
    let root = tree.meta().root;
    let store = tree.into_store().unwrap();

    patch(&store, root, 0, &[0x77]);

    assert!(matches!(BpTree::open(store), Err(StrataError::CorruptMeta(_))));
}

// =============================================================================
// Big Value Corruption Tests
// =============================================================================

#[test]
fn test_short_big_chain_is_reported() {
    let mut tree = setup_tree();
    let value = vec![0xabu8; 3 * 4096 + 47];
    tree.add(&key(1), &value).unwrap();

    let leaf = read_block(tree.store(), tree.meta().root);
    assert_eq!(leaf[0], LEAF_TAG);
    // Length field of entry 0 marks a big-value reference
    assert_eq!(read_u16(&leaf, LEAF_HEADER_SIZE + 8) >> 14, 2);
    let big = read_u64(&leaf, LEAF_HEADER_SIZE + 10);

    // Cut the chain after the big leaf
    patch(tree.store(), big, 16, &0u64.to_le_bytes());

    assert_violation(&tree, &format!("big value {} of {} bytes spans 1 blocks", big, value.len()));
}
