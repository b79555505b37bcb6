//! Cache Index Module
//!
//! Key-ordered index of cache nodes stored as an unbalanced binary search tree.
//! Nodes live in an arena and link to each other by slot index.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::cache::evict::{decay, percentile_threshold};

/// Stable handle of a node inside the arena.
type NodeId = usize;

#[derive(Debug)]
struct Node<C> {
    key: String,
    usage: u64,
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    content: Arc<C>,
}

/// Where a missing key would be attached.
enum Slot {
    Root,
    Left(NodeId),
    Right(NodeId),
}

#[derive(Debug)]
struct Tree<C> {
    nodes: Vec<Option<Node<C>>>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
    len: usize,
}

impl<C> Tree<C> {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            len: 0,
        }
    }

    fn node(&self, id: NodeId) -> &Node<C> {
        self.nodes[id].as_ref().expect("live node handle")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<C> {
        self.nodes[id].as_mut().expect("live node handle")
    }

    /// Walks from the root comparing keys. Returns the matching node or the
    /// slot the key would be attached to.
    fn locate(&self, key: &str) -> Result<NodeId, Slot> {
        let mut current = match self.root {
            Some(root) => root,
            None => return Err(Slot::Root),
        };
        loop {
            let node = self.node(current);
            if node.key.as_str() == key {
                return Ok(current);
            }
            if node.key.as_str() < key {
                match node.right {
                    Some(next) => current = next,
                    None => return Err(Slot::Right(current)),
                }
            } else {
                match node.left {
                    Some(next) => current = next,
                    None => return Err(Slot::Left(current)),
                }
            }
        }
    }

    fn find(&self, key: &str) -> Option<NodeId> {
        self.locate(key).ok()
    }

    fn alloc(&mut self, key: &str, content: Arc<C>) -> NodeId {
        let node = Node {
            key: key.to_string(),
            usage: 0,
            parent: None,
            left: None,
            right: None,
            content,
        };
        self.len += 1;
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    /// Links a detached node into the tree by walking from the root.
    fn attach(&mut self, id: NodeId) {
        let slot = {
            let key = self.node(id).key.as_str();
            self.locate(key)
        };
        match slot {
            Err(Slot::Root) => {
                self.node_mut(id).parent = None;
                self.root = Some(id);
            }
            Err(Slot::Left(parent)) => {
                self.node_mut(parent).left = Some(id);
                self.node_mut(id).parent = Some(parent);
            }
            Err(Slot::Right(parent)) => {
                self.node_mut(parent).right = Some(id);
                self.node_mut(id).parent = Some(parent);
            }
            // Keys are unique, a detached node is never found.
            Ok(_) => {}
        }
    }

    /// Re-inserts every node of a detached subtree one by one from the root.
    fn reinsert(&mut self, subtree: Option<NodeId>) {
        let ids = self.preorder(subtree);
        for &id in &ids {
            let node = self.node_mut(id);
            node.parent = None;
            node.left = None;
            node.right = None;
        }
        for id in ids {
            self.attach(id);
        }
    }

    fn preorder(&self, from: Option<NodeId>) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = from.into_iter().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            let node = self.node(id);
            if let Some(right) = node.right {
                stack.push(right);
            }
            if let Some(left) = node.left {
                stack.push(left);
            }
        }
        out
    }

    fn postorder(&self) -> Vec<NodeId> {
        // Reverse of a root-right-left preorder.
        let mut out = Vec::with_capacity(self.len);
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            let node = self.node(id);
            if let Some(left) = node.left {
                stack.push(left);
            }
            if let Some(right) = node.right {
                stack.push(right);
            }
        }
        out.reverse();
        out
    }

    /// Detaches a node and frees its slot.
    ///
    /// Removing the root promotes the left child (else the right one) and
    /// re-inserts the other subtree under it. Removing any other node splices
    /// its same-side child into the parent and re-inserts the remaining
    /// subtree from the root.
    fn remove_node(&mut self, id: NodeId) -> Arc<C> {
        let (parent, left, right) = {
            let node = self.node(id);
            (node.parent, node.left, node.right)
        };

        if self.root == Some(id) {
            match (left, right) {
                (Some(left), other) => {
                    self.node_mut(left).parent = None;
                    self.root = Some(left);
                    self.reinsert(other);
                }
                (None, Some(right)) => {
                    self.node_mut(right).parent = None;
                    self.root = Some(right);
                }
                (None, None) => self.root = None,
            }
        } else if let Some(parent) = parent {
            if self.node(parent).left == Some(id) {
                self.node_mut(parent).left = left;
                if let Some(left) = left {
                    self.node_mut(left).parent = Some(parent);
                }
                self.reinsert(right);
            } else {
                self.node_mut(parent).right = right;
                if let Some(right) = right {
                    self.node_mut(right).parent = Some(parent);
                }
                self.reinsert(left);
            }
        }

        let node = self.nodes[id].take().expect("live node handle");
        self.free.push(id);
        self.len -= 1;
        node.content
    }

    /// Runs one eviction sweep, never removing `exclude`.
    fn sweep(&mut self, exclude: Option<NodeId>) -> Vec<Arc<C>> {
        if self.len <= 1 {
            return Vec::new();
        }
        let order = self.postorder();
        let mut usage: Vec<u64> = order.iter().map(|&id| self.node(id).usage).collect();
        let threshold = match percentile_threshold(&mut usage) {
            Some(threshold) => threshold,
            None => return Vec::new(),
        };

        let mut evicted = Vec::new();
        for id in order {
            let usage = self.node(id).usage;
            if Some(id) != exclude && usage <= threshold {
                evicted.push(self.remove_node(id));
            } else {
                self.node_mut(id).usage = decay(usage);
            }
        }
        info!(
            threshold,
            evicted = evicted.len(),
            remaining = self.len,
            "Eviction sweep finished"
        );
        evicted
    }

    fn in_order(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.len);
        let mut stack = Vec::new();
        let mut current = self.root;
        while current.is_some() || !stack.is_empty() {
            while let Some(id) = current {
                stack.push(id);
                current = self.node(id).left;
            }
            if let Some(id) = stack.pop() {
                out.push(id);
                current = self.node(id).right;
            }
        }
        out
    }
}

// == Index ==
/// Thread-safe key index with per-node usage counters.
///
/// Every structural operation runs under one lock. `C` is the per-node content,
/// created with `C::default()` the first time a key is looked up. Content of
/// removed nodes is handed back to the caller so it can be torn down after the
/// lock is released.
#[derive(Debug)]
pub struct Index<C> {
    tree: Mutex<Tree<C>>,
    items: AtomicUsize,
    item_limit: usize,
}

impl<C: Default> Index<C> {
    // == Constructor ==
    /// Creates an empty index that sweeps once it holds more than `item_limit` nodes.
    pub fn new(item_limit: usize) -> Self {
        Self {
            tree: Mutex::new(Tree::new()),
            items: AtomicUsize::new(0),
            item_limit,
        }
    }

    // == Get ==
    /// Returns the content for `key`, creating the node on a miss.
    ///
    /// A hit increments the node's usage counter. A miss that pushes the item
    /// count past the limit runs a sweep that spares the new node's parent; the
    /// content evicted by that sweep is returned alongside.
    pub fn get(&self, key: &str) -> (Arc<C>, Vec<Arc<C>>) {
        let mut tree = self.tree.lock();
        let parent = match tree.locate(key) {
            Ok(id) => {
                let node = tree.node_mut(id);
                node.usage = node.usage.saturating_add(1);
                return (Arc::clone(&node.content), Vec::new());
            }
            Err(Slot::Root) => None,
            Err(Slot::Left(parent)) | Err(Slot::Right(parent)) => Some(parent),
        };

        let items = self.items.fetch_add(1, Ordering::AcqRel) + 1;
        let mut evicted = Vec::new();
        if items > self.item_limit {
            info!(max_items = self.item_limit, items, "Item limit exceeded");
            evicted = tree.sweep(parent);
            self.items.fetch_sub(evicted.len(), Ordering::AcqRel);
        }

        let content = Arc::new(C::default());
        let id = tree.alloc(key, Arc::clone(&content));
        tree.attach(id);
        (content, evicted)
    }

    /// Returns the content for `key` without creating it or counting a use.
    pub fn peek(&self, key: &str) -> Option<Arc<C>> {
        let tree = self.tree.lock();
        tree.find(key).map(|id| Arc::clone(&tree.node(id).content))
    }

    // == Remove ==
    /// Removes `key`, returning its content if it was present.
    pub fn remove(&self, key: &str) -> Option<Arc<C>> {
        let mut tree = self.tree.lock();
        let id = tree.find(key)?;
        let content = tree.remove_node(id);
        self.items.fetch_sub(1, Ordering::AcqRel);
        Some(content)
    }

    // == Evict ==
    /// Runs an eviction sweep that spares the node holding `exclude`.
    pub fn evict(&self, exclude: Option<&str>) -> Vec<Arc<C>> {
        let mut tree = self.tree.lock();
        let exclude = exclude.and_then(|key| tree.find(key));
        let evicted = tree.sweep(exclude);
        self.items.fetch_sub(evicted.len(), Ordering::AcqRel);
        evicted
    }

    // == Length ==
    /// Returns the number of nodes without taking the lock.
    pub fn len(&self) -> usize {
        self.items.load(Ordering::Acquire)
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the item limit the index sweeps at.
    pub fn item_limit(&self) -> usize {
        self.item_limit
    }

    // == Inspection ==
    /// Returns all keys in ascending order.
    pub fn keys(&self) -> Vec<String> {
        let tree = self.tree.lock();
        tree.in_order()
            .into_iter()
            .map(|id| tree.node(id).key.clone())
            .collect()
    }

    /// Returns the usage counter of `key` without touching it.
    pub fn usage(&self, key: &str) -> Option<u64> {
        let tree = self.tree.lock();
        tree.find(key).map(|id| tree.node(id).usage)
    }

    /// Returns the key stored at the root.
    pub fn root_key(&self) -> Option<String> {
        let tree = self.tree.lock();
        tree.root.map(|id| tree.node(id).key.clone())
    }

    /// Returns the keys of the left and right children of `key`.
    pub fn children(&self, key: &str) -> Option<(Option<String>, Option<String>)> {
        let tree = self.tree.lock();
        let node = tree.node(tree.find(key)?);
        let key_of = |id: Option<NodeId>| id.map(|id| tree.node(id).key.clone());
        Some((key_of(node.left), key_of(node.right)))
    }

    /// Checks that parent links agree with child links. Test support.
    #[cfg(test)]
    pub(crate) fn links_consistent(&self) -> bool {
        let tree = self.tree.lock();
        if let Some(root) = tree.root {
            if tree.node(root).parent.is_some() {
                return false;
            }
        }
        let ids = tree.in_order();
        ids.len() == tree.len
            && ids.iter().all(|&id| {
                let node = tree.node(id);
                [node.left, node.right]
                    .into_iter()
                    .flatten()
                    .all(|child| tree.node(child).parent == Some(id))
            })
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(keys: &[&str]) -> Index<()> {
        let index = Index::new(1000);
        for key in keys {
            index.get(key);
        }
        index
    }

    fn key(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn test_index_new() {
        let index: Index<()> = Index::new(10);
        assert!(index.is_empty());
        assert_eq!(index.root_key(), None);
        assert_eq!(index.item_limit(), 10);
    }

    #[test]
    fn test_insert_shape() {
        let index = index_with(&["b", "a", "c"]);
        assert_eq!(index.root_key(), key("b"));
        assert_eq!(index.children("b"), Some((key("a"), key("c"))));
        assert_eq!(index.len(), 3);
        assert!(index.links_consistent());
    }

    #[test]
    fn test_get_returns_same_content_and_counts_hits() {
        let index: Index<u8> = Index::new(10);
        let (first, _) = index.get("k");
        assert_eq!(index.usage("k"), Some(0));
        let (second, _) = index.get("k");
        assert!(Arc::ptr_eq(&first, &second));
        index.get("k");
        assert_eq!(index.usage("k"), Some(2));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_remove_root_promotes_left() {
        let index = index_with(&["b", "a", "c"]);
        assert!(index.remove("b").is_some());
        assert_eq!(index.root_key(), key("a"));
        assert_eq!(index.children("a"), Some((None, key("c"))));
        assert_eq!(index.keys(), vec!["a", "c"]);
        assert!(index.links_consistent());
    }

    #[test]
    fn test_remove_root_without_left_promotes_right() {
        let index = index_with(&["a", "b", "c"]);
        index.remove("a");
        assert_eq!(index.root_key(), key("b"));
        assert_eq!(index.keys(), vec!["b", "c"]);
        assert!(index.links_consistent());
    }

    #[test]
    fn test_remove_only_node_empties_tree() {
        let index = index_with(&["solo"]);
        assert!(index.remove("solo").is_some());
        assert!(index.is_empty());
        assert_eq!(index.root_key(), None);
        index.get("again");
        assert_eq!(index.root_key(), key("again"));
    }

    #[test]
    fn test_remove_inner_node_reinserts_from_root() {
        //        m
        //      /   \
        //     f     t
        //    / \
        //   c   h
        //        \
        //         k
        let index = index_with(&["m", "f", "t", "c", "h", "k"]);
        index.remove("f");
        // "c" is spliced into f's place, the "h" subtree is re-inserted.
        assert_eq!(index.children("m"), Some((key("c"), key("t"))));
        assert_eq!(index.children("c"), Some((None, key("h"))));
        assert_eq!(index.children("h"), Some((None, key("k"))));
        assert_eq!(index.keys(), vec!["c", "h", "k", "m", "t"]);
        assert!(index.links_consistent());
    }

    #[test]
    fn test_remove_right_child_reinserts_left_subtree() {
        let index = index_with(&["d", "h", "f", "j"]);
        index.remove("h");
        assert_eq!(index.children("d"), Some((None, key("j"))));
        assert_eq!(index.children("j"), Some((key("f"), None)));
        assert_eq!(index.keys(), vec!["d", "f", "j"]);
        assert!(index.links_consistent());
    }

    #[test]
    fn test_remove_missing_key() {
        let index = index_with(&["a"]);
        assert!(index.remove("zzz").is_none());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_slots_are_reused() {
        let index = index_with(&["a", "b"]);
        index.remove("b");
        index.get("c");
        assert_eq!(index.tree.lock().nodes.len(), 2);
        assert_eq!(index.keys(), vec!["a", "c"]);
    }

    #[test]
    fn test_item_limit_triggers_sweep() {
        let index: Index<()> = Index::new(4);
        for k in ["d", "b", "f", "a"] {
            index.get(k);
        }
        // Make "d" and "b" hot.
        for _ in 0..3 {
            index.get("d");
            index.get("b");
        }
        let (_, evicted) = index.get("e");
        // Threshold is 0; "f" is the parent of "e" and survives, "a" goes.
        assert_eq!(evicted.len(), 1);
        assert_eq!(index.keys(), vec!["b", "d", "e", "f"]);
        assert_eq!(index.len(), 4);
        assert!(index.links_consistent());
    }

    #[test]
    fn test_sweep_decays_hot_counters() {
        let index = index_with(&["m", "a", "z"]);
        for _ in 0..50 {
            index.get("m");
        }
        let evicted = index.evict(None);
        assert_eq!(evicted.len(), 2);
        assert_eq!(index.usage("m"), Some(12));
        assert_eq!(index.keys(), vec!["m"]);
    }

    #[test]
    fn test_evict_spares_excluded_key() {
        let index = index_with(&["m", "a", "z"]);
        let evicted = index.evict(Some("z"));
        assert_eq!(evicted.len(), 2);
        assert_eq!(index.keys(), vec!["z"]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_single_node_never_swept() {
        let index = index_with(&["only"]);
        assert!(index.evict(None).is_empty());
        assert_eq!(index.len(), 1);
    }
}
