//! Split points and redistribution between sibling nodes

use super::leaf::Leaf;
use super::search::Keyed;

/// Move `guess` off any run of equal keys so a split never divides a run.
///
/// The index moves forward to the end of the run; if that falls off the end
/// of the node it moves backward to the start of the run instead. A result
/// of 0 means the node holds a single key.
pub(crate) fn no_split_balance_point(node: &impl Keyed, guess: usize) -> usize {
    let n = node.key_count();
    if n < 2 {
        return 0;
    }
    let start = guess.clamp(1, n - 1);

    let mut m = start;
    while m < n && node.key(m - 1) == node.key(m) {
        m += 1;
    }
    if m < n {
        return m;
    }

    m = start;
    while m > 0 && node.key(m - 1) == node.key(m) {
        m -= 1;
    }
    m
}

/// Split point for an internal node: its middle entry.
pub(crate) fn internal_balance_point(node: &impl Keyed) -> usize {
    no_split_balance_point(node, node.key_count() / 2)
}

/// Split point for a leaf: the first entry at or past half the used bytes.
pub(crate) fn leaf_balance_point<B: AsRef<[u8]>>(leaf: &Leaf<B>) -> usize {
    let half = leaf.used() / 2;
    let guess = (0..leaf.key_count())
        .find(|&i| leaf.entry_pos(i) >= half)
        .unwrap_or(leaf.key_count());
    no_split_balance_point(leaf, guess)
}

/// Move the tail of `left` into the empty `right`. Returns the split index.
pub(crate) fn balance_leaves<L, R>(left: &mut Leaf<L>, right: &mut Leaf<R>) -> usize
where
    L: AsRef<[u8]> + AsMut<[u8]>,
    R: AsRef<[u8]> + AsMut<[u8]>,
{
    debug_assert_eq!(right.key_count(), 0);
    let m = leaf_balance_point(left);
    let (packed, count) = left.truncate(m);
    right.extend_raw(&packed, count);
    m
}

/// Append every entry of `right` to `left`, leaving `right` empty.
pub(crate) fn merge_leaves<L, R>(left: &mut Leaf<L>, right: &mut Leaf<R>)
where
    L: AsRef<[u8]> + AsMut<[u8]>,
    R: AsRef<[u8]> + AsMut<[u8]>,
{
    let (packed, count) = right.truncate(0);
    left.extend_raw(&packed, count);
}
