//! Red-black tree used as the collision chain of a bucket.
//!
//! Nodes are stored in a `Vec`-based arena and addressed by [`NodeId`].
//! Children are owned through the arena; parent links are plain indices and
//! are updated in the same step as the child link they mirror.
//!
//! Every node carries a `stamp` (insertion sequence number). Nodes are
//! ordered by `(key, stamp)`, so among equal keys the first inserted is the
//! leftmost one, and that is the node [`RbTree::search`] returns.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};

/// Index of a node in its tree's arena.
///
/// Stays valid until the node it names is removed, including across
/// rotations and the successor swap performed by [`RbTree::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

#[derive(Clone)]
struct Node<K, V> {
    key: K,
    value: V,
    stamp: u64,
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    color: Color,
}

/// An ordered map from `K` to `V` balanced as a red-black tree.
///
/// Duplicate keys are accepted; see the module docs for how they are ordered.
#[derive(Clone)]
pub struct RbTree<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    /// Arena slots freed by removals, reused by later inserts.
    free: Vec<u32>,
    root: Option<NodeId>,
    len: usize,
    next_stamp: u64,
}

impl<K, V> RbTree<K, V> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: None,
            len: 0,
            next_stamp: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// The smallest node (leftmost), if any.
    pub fn first(&self) -> Option<NodeId> {
        self.root.map(|r| self.subtree_min(r))
    }

    #[inline]
    pub fn key(&self, id: NodeId) -> &K {
        &self.node(id).key
    }

    #[inline]
    pub fn value(&self, id: NodeId) -> &V {
        &self.node(id).value
    }

    #[inline]
    pub fn stamp(&self, id: NodeId) -> u64 {
        self.node(id).stamp
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut iter = Iter {
            tree: self,
            stack: Vec::new(),
        };
        iter.push_left(self.root);
        iter
    }

    // ===== Arena =====

    fn alloc(&mut self, key: K, value: V, stamp: u64) -> NodeId {
        let node = Node {
            key,
            value,
            stamp,
            parent: None,
            left: None,
            right: None,
            color: Color::Red,
        };
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(node);
            NodeId(idx)
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(Some(node));
            NodeId(idx)
        }
    }

    fn release(&mut self, id: NodeId) -> Node<K, V> {
        let node = self.slots[id.index()]
            .take()
            .expect("released node must be live");
        self.free.push(id.0);
        node
    }

    #[inline]
    fn node(&self, id: NodeId) -> &Node<K, V> {
        self.slots[id.index()]
            .as_ref()
            .expect("node id must refer to a live node")
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node<K, V> {
        self.slots[id.index()]
            .as_mut()
            .expect("node id must refer to a live node")
    }

    // ===== Link accessors =====

    #[inline]
    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    #[inline]
    fn left(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).left
    }

    #[inline]
    fn right(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).right
    }

    #[inline]
    fn is_red(&self, id: Option<NodeId>) -> bool {
        id.is_some_and(|n| self.node(n).color == Color::Red)
    }

    #[inline]
    fn is_black(&self, id: Option<NodeId>) -> bool {
        !self.is_red(id)
    }

    #[inline]
    fn set_color(&mut self, id: NodeId, color: Color) {
        self.node_mut(id).color = color;
    }

    fn subtree_min(&self, mut id: NodeId) -> NodeId {
        while let Some(left) = self.left(id) {
            id = left;
        }
        id
    }

    // ===== Rotations =====

    /// Point `dest`'s parent (or the root) at `source` instead of `dest`.
    fn replace_child(&mut self, source: Option<NodeId>, dest: NodeId) {
        let parent = self.parent(dest);
        match parent {
            None => self.root = source,
            Some(p) => {
                if self.left(p) == Some(dest) {
                    self.node_mut(p).left = source;
                } else {
                    self.node_mut(p).right = source;
                }
            }
        }
        if let Some(s) = source {
            self.node_mut(s).parent = parent;
        }
    }

    fn rotate_left(&mut self, x: NodeId) {
        let Some(y) = self.right(x) else {
            return;
        };
        let y_left = self.left(y);
        self.node_mut(x).right = y_left;
        if let Some(b) = y_left {
            self.node_mut(b).parent = Some(x);
        }
        self.replace_child(Some(y), x);
        self.node_mut(y).left = Some(x);
        self.node_mut(x).parent = Some(y);
    }

    fn rotate_right(&mut self, x: NodeId) {
        let Some(y) = self.left(x) else {
            return;
        };
        let y_right = self.right(y);
        self.node_mut(x).left = y_right;
        if let Some(b) = y_right {
            self.node_mut(b).parent = Some(x);
        }
        self.replace_child(Some(y), x);
        self.node_mut(y).right = Some(x);
        self.node_mut(x).parent = Some(y);
    }

    // ===== Insert =====

    fn insert_fix(&mut self, mut node: NodeId) {
        while let Some(parent) = self.parent(node).filter(|&p| self.is_red(Some(p))) {
            // A red parent is never the root, so the grandparent exists.
            let Some(grandparent) = self.parent(parent) else {
                break;
            };

            if Some(parent) == self.left(grandparent) {
                let uncle = self.right(grandparent);
                if let Some(u) = uncle.filter(|&u| self.is_red(Some(u))) {
                    self.set_color(parent, Color::Black);
                    self.set_color(u, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    node = grandparent;
                    continue;
                }
                let mut parent = parent;
                if Some(node) == self.right(parent) {
                    self.rotate_left(parent);
                    node = parent;
                    parent = self.parent(node).expect("rotated node has a parent");
                }
                self.set_color(parent, Color::Black);
                self.set_color(grandparent, Color::Red);
                self.rotate_right(grandparent);
            } else {
                let uncle = self.left(grandparent);
                if let Some(u) = uncle.filter(|&u| self.is_red(Some(u))) {
                    self.set_color(parent, Color::Black);
                    self.set_color(u, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    node = grandparent;
                    continue;
                }
                let mut parent = parent;
                if Some(node) == self.left(parent) {
                    self.rotate_right(parent);
                    node = parent;
                    parent = self.parent(node).expect("rotated node has a parent");
                }
                self.set_color(parent, Color::Black);
                self.set_color(grandparent, Color::Red);
                self.rotate_left(grandparent);
            }
            break;
        }

        if let Some(root) = self.root {
            self.set_color(root, Color::Black);
        }
    }

    /// Insert with an explicit stamp. The table uses this so that stamps are
    /// unique across all of its buckets and survive displacement.
    pub(crate) fn insert_stamped(&mut self, key: K, value: V, stamp: u64) -> NodeId
    where
        K: Ord,
    {
        self.next_stamp = self.next_stamp.max(stamp.wrapping_add(1));

        let mut parent = None;
        let mut go_left = false;
        let mut cur = self.root;
        while let Some(id) = cur {
            parent = Some(id);
            let n = self.node(id);
            go_left = match key.cmp(&n.key) {
                Ordering::Less => true,
                Ordering::Greater => false,
                Ordering::Equal => stamp < n.stamp,
            };
            cur = if go_left { n.left } else { n.right };
        }

        let id = self.alloc(key, value, stamp);
        self.node_mut(id).parent = parent;
        match parent {
            None => self.root = Some(id),
            Some(p) if go_left => self.node_mut(p).left = Some(id),
            Some(p) => self.node_mut(p).right = Some(id),
        }
        self.len += 1;

        self.insert_fix(id);
        id
    }

    /// Insert `key`/`value`. Never overwrites: an existing equal key is kept
    /// and the new node is placed after it.
    pub fn insert(&mut self, key: K, value: V) -> NodeId
    where
        K: Ord,
    {
        let stamp = self.next_stamp;
        self.insert_stamped(key, value, stamp)
    }

    // ===== Lookup =====

    /// Find the first-inserted node whose key equals `key`.
    pub fn search(&self, key: &K) -> Result<NodeId>
    where
        K: Ord,
    {
        let mut found = None;
        let mut cur = self.root;
        while let Some(id) = cur {
            let n = self.node(id);
            cur = match key.cmp(&n.key) {
                Ordering::Less => n.left,
                Ordering::Greater => n.right,
                Ordering::Equal => {
                    found = Some(id);
                    n.left
                }
            };
        }
        found.ok_or(Error::KeyNotFound)
    }

    pub fn get(&self, key: &K) -> Result<&V>
    where
        K: Ord,
    {
        self.search(key).map(|id| self.value(id))
    }

    pub fn exists(&self, key: &K) -> bool
    where
        K: Ord,
    {
        self.search(key).is_ok()
    }

    // ===== Remove =====

    fn remove_fix(&mut self, mut node: Option<NodeId>, mut parent: Option<NodeId>) {
        while let Some(p) = parent {
            if self.is_red(node) {
                break;
            }

            if node == self.left(p) {
                let Some(mut sibling) = self.right(p) else {
                    break;
                };
                if self.is_red(Some(sibling)) {
                    self.set_color(sibling, Color::Black);
                    self.set_color(p, Color::Red);
                    self.rotate_left(p);
                    match self.right(p) {
                        Some(s) => sibling = s,
                        None => break,
                    }
                }

                if self.is_black(self.left(sibling)) && self.is_black(self.right(sibling)) {
                    self.set_color(sibling, Color::Red);
                    node = Some(p);
                    parent = self.parent(p);
                    continue;
                }

                if self.is_black(self.right(sibling)) {
                    if let Some(sl) = self.left(sibling) {
                        self.set_color(sl, Color::Black);
                    }
                    self.set_color(sibling, Color::Red);
                    self.rotate_right(sibling);
                    match self.right(p) {
                        Some(s) => sibling = s,
                        None => break,
                    }
                }
                let p_color = self.node(p).color;
                self.set_color(sibling, p_color);
                self.set_color(p, Color::Black);
                if let Some(sr) = self.right(sibling) {
                    self.set_color(sr, Color::Black);
                }
                self.rotate_left(p);
            } else {
                let Some(mut sibling) = self.left(p) else {
                    break;
                };
                if self.is_red(Some(sibling)) {
                    self.set_color(sibling, Color::Black);
                    self.set_color(p, Color::Red);
                    self.rotate_right(p);
                    match self.left(p) {
                        Some(s) => sibling = s,
                        None => break,
                    }
                }

                if self.is_black(self.right(sibling)) && self.is_black(self.left(sibling)) {
                    self.set_color(sibling, Color::Red);
                    node = Some(p);
                    parent = self.parent(p);
                    continue;
                }

                if self.is_black(self.left(sibling)) {
                    if let Some(sr) = self.right(sibling) {
                        self.set_color(sr, Color::Black);
                    }
                    self.set_color(sibling, Color::Red);
                    self.rotate_left(sibling);
                    match self.left(p) {
                        Some(s) => sibling = s,
                        None => break,
                    }
                }
                let p_color = self.node(p).color;
                self.set_color(sibling, p_color);
                self.set_color(p, Color::Black);
                if let Some(sl) = self.left(sibling) {
                    self.set_color(sl, Color::Black);
                }
                self.rotate_right(p);
            }
            node = self.root;
            break;
        }

        if let Some(n) = node {
            self.set_color(n, Color::Black);
        }
    }

    /// Remove a node previously located with [`search`](Self::search),
    /// [`root`](Self::root) or [`first`](Self::first).
    ///
    /// A node with two children is replaced by its in-order successor, which
    /// also takes over its color; every other `NodeId` stays valid.
    pub fn remove(&mut self, node: NodeId) -> (K, V) {
        let splice = match (self.left(node), self.right(node)) {
            (Some(_), Some(right)) => self.subtree_min(right),
            _ => node,
        };
        let subtree = self.left(splice).or(self.right(splice));
        let subtree_parent = if self.parent(splice) == Some(node) {
            Some(splice)
        } else {
            self.parent(splice)
        };
        let removed_black = self.node(splice).color == Color::Black;

        self.replace_child(subtree, splice);

        if splice != node {
            // Move `splice` into `node`'s position, links and color.
            self.replace_child(Some(splice), node);
            let (left, right, color) = {
                let n = self.node(node);
                (n.left, n.right, n.color)
            };
            let s = self.node_mut(splice);
            s.left = left;
            s.right = right;
            s.color = color;
            if let Some(l) = left {
                self.node_mut(l).parent = Some(splice);
            }
            if let Some(r) = right {
                self.node_mut(r).parent = Some(splice);
            }
        }

        if removed_black {
            self.remove_fix(subtree, subtree_parent);
        }

        self.len -= 1;
        let removed = self.release(node);
        (removed.key, removed.value)
    }

    /// Search for `key` and remove the node found.
    pub fn delete(&mut self, key: &K) -> Result<V>
    where
        K: Ord,
    {
        let id = self.search(key)?;
        Ok(self.remove(id).1)
    }

    /// Check every structural invariant and return the black height.
    #[cfg(test)]
    pub(crate) fn check(&self) -> std::result::Result<usize, String>
    where
        K: Ord + fmt::Debug,
    {
        fn walk<K: Ord + fmt::Debug, V>(
            t: &RbTree<K, V>,
            id: Option<NodeId>,
            parent: Option<NodeId>,
            count: &mut usize,
        ) -> std::result::Result<usize, String> {
            let Some(id) = id else {
                return Ok(1);
            };
            *count += 1;
            let n = t.node(id);
            if n.parent != parent {
                return Err(format!("node {id:?} has parent {:?}, expected {parent:?}", n.parent));
            }
            if n.color == Color::Red && t.is_red(parent) {
                return Err(format!("red node {id:?} has a red parent"));
            }
            for (child, is_left) in [(n.left, true), (n.right, false)] {
                if let Some(c) = child {
                    let cn = t.node(c);
                    let ord = (&cn.key, cn.stamp).cmp(&(&n.key, n.stamp));
                    let ok = if is_left {
                        ord == Ordering::Less
                    } else {
                        ord == Ordering::Greater
                    };
                    if !ok {
                        return Err(format!("child {c:?} of {id:?} is out of order"));
                    }
                }
            }
            let lh = walk(t, n.left, Some(id), count)?;
            let rh = walk(t, n.right, Some(id), count)?;
            if lh != rh {
                return Err(format!("black height mismatch at {id:?}: {lh} vs {rh}"));
            }
            Ok(lh + usize::from(n.color == Color::Black))
        }

        if self.is_red(self.root) {
            return Err("root is red".into());
        }
        let mut count = 0;
        let height = walk(self, self.root, None, &mut count)?;
        if count != self.len {
            return Err(format!("reachable nodes {count} != len {}", self.len));
        }
        let live = self.slots.iter().filter(|s| s.is_some()).count();
        if live != self.len {
            return Err(format!("live arena slots {live} != len {}", self.len));
        }
        let keys: Vec<(&K, u64)> = self
            .iter_ids()
            .map(|id| (self.key(id), self.stamp(id)))
            .collect();
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err("in-order traversal is not sorted".into());
        }
        Ok(height)
    }

    #[cfg(test)]
    fn iter_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        let mut stack = Vec::new();
        let mut cur = self.root;
        std::iter::from_fn(move || {
            while let Some(id) = cur {
                stack.push(id);
                cur = self.left(id);
            }
            let id = stack.pop()?;
            cur = self.right(id);
            Some(id)
        })
    }
}

impl<K, V> Default for RbTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for RbTree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// In-order iterator over an [`RbTree`].
pub struct Iter<'a, K, V> {
    tree: &'a RbTree<K, V>,
    stack: Vec<NodeId>,
}

impl<'a, K, V> Iter<'a, K, V> {
    fn push_left(&mut self, mut cur: Option<NodeId>) {
        while let Some(id) = cur {
            self.stack.push(id);
            cur = self.tree.left(id);
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        self.push_left(self.tree.right(id));
        let n = self.tree.node(id);
        Some((&n.key, &n.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;

    fn assert_valid<K: Ord + fmt::Debug, V>(t: &RbTree<K, V>) {
        if let Err(e) = t.check() {
            panic!("invalid tree: {e}");
        }
    }

    #[test]
    fn test_basic() {
        let mut t: RbTree<u32, &str> = RbTree::new();
        t.insert(2, "two");
        t.insert(1, "one");
        t.insert(3, "three");
        assert_eq!(t.get(&1), Ok(&"one"));
        assert_eq!(t.get(&2), Ok(&"two"));
        assert_eq!(t.get(&3), Ok(&"three"));
        assert_eq!(t.get(&4), Err(Error::KeyNotFound));
        assert!(t.exists(&3));
        assert!(!t.exists(&0));
        assert_eq!(t.len(), 3);
        assert_valid(&t);
    }

    #[test]
    fn test_empty() {
        let mut t: RbTree<u32, u32> = RbTree::new();
        assert!(t.is_empty());
        assert_eq!(t.search(&1), Err(Error::KeyNotFound));
        assert_eq!(t.delete(&1), Err(Error::KeyNotFound));
        assert_eq!(t.root(), None);
        assert_eq!(t.first(), None);
        assert_valid(&t);
    }

    #[test]
    fn test_sequential_insert_stays_balanced() {
        let mut t: RbTree<u32, u32> = RbTree::new();
        for i in 0..1024 {
            t.insert(i, i * 10);
            assert_valid(&t);
        }
        // 1024 nodes: black height is bounded by log2(n + 1) + 1.
        let bh = t.check().unwrap();
        assert!(bh <= 12, "black height {bh}");
        let keys: Vec<u32> = t.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, (0..1024).collect::<Vec<_>>());
    }

    #[test]
    fn test_remove_keeps_other_ids_valid() {
        let mut t: RbTree<u32, u32> = RbTree::new();
        let ids: Vec<(u32, NodeId)> = (0..64).map(|i| (i, t.insert(i, i))).collect();

        // The root of a 64-node tree has two children, so it is swapped with
        // its successor on removal.
        let root = t.root().unwrap();
        let root_key = *t.key(root);
        assert!(t.left(root).is_some() && t.right(root).is_some());
        assert_eq!(t.remove(root), (root_key, root_key));
        assert_valid(&t);

        for (k, id) in ids {
            if k == root_key {
                continue;
            }
            assert_eq!(*t.key(id), k);
            assert_eq!(*t.value(id), k);
        }
    }

    #[test]
    fn test_remove_all_orders_small_set() {
        let keys = [5u32, 1, 9, 3, 7, 2, 8];
        let mut base: RbTree<u32, u32> = RbTree::new();
        for k in keys {
            base.insert(k, k);
        }

        // Every rotation of the removal order, both directions.
        for shift in 0..keys.len() {
            for reverse in [false, true] {
                let mut order: Vec<u32> = keys.to_vec();
                order.rotate_left(shift);
                if reverse {
                    order.reverse();
                }
                let mut t = base.clone();
                for k in &order {
                    assert_eq!(t.delete(k), Ok(*k));
                    assert!(!t.exists(k));
                    assert_valid(&t);
                }
                assert!(t.is_empty());
                assert_eq!(t.root(), None);
            }
        }
    }

    #[test]
    fn test_drain_by_root() {
        let mut t: RbTree<u32, u32> = RbTree::new();
        for i in 0..200 {
            t.insert((i * 37) % 200, i);
        }
        let mut seen = Vec::new();
        while let Some(root) = t.root() {
            let (k, _) = t.remove(root);
            seen.push(k);
            assert_valid(&t);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_duplicates_first_inserted_wins() {
        let mut t: RbTree<u32, &str> = RbTree::new();
        t.insert(5, "first");
        for i in (0..20).filter(|&i| i != 5) {
            t.insert(i, "filler");
        }
        t.insert(5, "second");
        t.insert(5, "third");
        assert_valid(&t);

        assert_eq!(t.get(&5), Ok(&"first"));
        assert_eq!(t.delete(&5), Ok("first"));
        assert_eq!(t.get(&5), Ok(&"second"));
        assert_eq!(t.delete(&5), Ok("second"));
        assert_eq!(t.get(&5), Ok(&"third"));
        assert_eq!(t.len(), 20);
        assert_valid(&t);
    }

    #[test]
    fn test_insert_stamped_orders_by_stamp() {
        let mut t: RbTree<u32, u64> = RbTree::new();
        t.insert_stamped(1, 30, 30);
        t.insert_stamped(1, 10, 10);
        t.insert_stamped(1, 20, 20);
        assert_valid(&t);
        let values: Vec<u64> = t.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![10, 20, 30]);
        assert_eq!(t.get(&1), Ok(&10));

        // Plain inserts continue after the largest stamp seen.
        let id = t.insert(1, 99);
        assert_eq!(t.stamp(id), 31);
    }

    #[test]
    fn test_arena_slots_are_reused() {
        let mut t: RbTree<u32, u32> = RbTree::new();
        for i in 0..10 {
            t.insert(i, i);
        }
        for i in 0..10 {
            t.delete(&i).unwrap();
        }
        for i in 10..20 {
            t.insert(i, i);
        }
        assert_eq!(t.slots.len(), 10);
        assert_valid(&t);
    }

    #[test]
    fn test_randomized_against_btreemap() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut t: RbTree<u16, u64> = RbTree::new();
        let mut m: BTreeMap<u16, u64> = BTreeMap::new();

        for step in 0..20_000 {
            let key = rng.gen_range(0..512u16);
            match rng.gen_range(0..100) {
                0..=54 => {
                    if !m.contains_key(&key) {
                        let v: u64 = rng.gen();
                        t.insert(key, v);
                        m.insert(key, v);
                    }
                }
                55..=89 => {
                    assert_eq!(t.delete(&key).ok(), m.remove(&key));
                }
                _ => {
                    assert_eq!(t.get(&key).ok(), m.get(&key));
                }
            }
            if step % 500 == 0 {
                assert_valid(&t);
            }
        }

        assert_valid(&t);
        assert_eq!(t.len(), m.len());
        let got: Vec<(u16, u64)> = t.iter().map(|(k, v)| (*k, *v)).collect();
        let expected: Vec<(u16, u64)> = m.into_iter().collect();
        assert_eq!(got, expected);
    }
}
