//! Binary search shared by internal nodes and leaves

/// Anything with an ordered, indexable sequence of keys.
pub(crate) trait Keyed {
    fn key_count(&self) -> usize;
    fn key(&self, i: usize) -> &[u8];

    fn first_key(&self) -> Option<&[u8]> {
        (self.key_count() > 0).then(|| self.key(0))
    }

    fn last_key(&self) -> Option<&[u8]> {
        let n = self.key_count();
        (n > 0).then(|| self.key(n - 1))
    }
}

/// Leftmost index whose key is `>= key`, and whether that key is equal.
pub(crate) fn find(node: &impl Keyed, key: &[u8]) -> (usize, bool) {
    let n = node.key_count();
    let (mut lo, mut hi) = (0, n);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if node.key(mid) < key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    (lo, lo < n && node.key(lo) == key)
}

/// First index whose key is `> key`; new duplicates go here.
pub(crate) fn upper_bound(node: &impl Keyed, key: &[u8]) -> usize {
    let (mut lo, mut hi) = (0, node.key_count());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if node.key(mid) <= key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Child of an internal node to descend into for `key`.
pub(crate) fn route(node: &impl Keyed, key: &[u8]) -> usize {
    match find(node, key) {
        (i, true) => i,
        (0, false) => 0,
        (i, false) => i - 1,
    }
}
