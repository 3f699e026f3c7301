//! Persistent path-segment trie.
//!
//! Updates never mutate a published node: [`PathTrie::update`] copies the
//! nodes along the affected path and shares every other subtree with the
//! previous version. A reader holding an older trie keeps a consistent view
//! while a writer builds the next one.
use std::{collections::HashMap, sync::Arc};

#[derive(Debug)]
struct Node<T> {
    children: HashMap<String, Arc<Node<T>>>,
    value: Option<T>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            value: None,
        }
    }
}

impl<T: Clone> Clone for Node<T> {
    fn clone(&self) -> Self {
        Self {
            children: self.children.clone(),
            value: self.value.clone(),
        }
    }
}

/// Segment trie keyed by `/`-separated path prefixes.
///
/// `/api/v2` is stored under the segments `["api", "v2"]`; empty segments are
/// ignored, so `/api/` and `/api` land on the same node and `/` is the root.
#[derive(Debug)]
pub struct PathTrie<T> {
    root: Arc<Node<T>>,
}

impl<T> Clone for PathTrie<T> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
        }
    }
}

impl<T> Default for PathTrie<T> {
    fn default() -> Self {
        Self {
            root: Arc::new(Node::default()),
        }
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl<T: Clone> PathTrie<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// New trie with `value` stored at `prefix`.
    pub fn insert(&self, prefix: &str, value: T) -> Self {
        self.update(prefix, |_| Some(value))
    }

    /// New trie where the value at `prefix` is replaced by `f(current)`.
    /// Returning `None` clears the node's value (the node itself stays).
    pub fn update(&self, prefix: &str, f: impl FnOnce(Option<&T>) -> Option<T>) -> Self {
        let segs: Vec<&str> = segments(prefix).collect();
        Self {
            root: Arc::new(Self::update_node(&self.root, &segs, f)),
        }
    }

    fn update_node(
        node: &Node<T>,
        segs: &[&str],
        f: impl FnOnce(Option<&T>) -> Option<T>,
    ) -> Node<T> {
        let mut copy = node.clone();
        match segs.split_first() {
            None => copy.value = f(node.value.as_ref()),
            Some((head, rest)) => {
                let child = match node.children.get(*head) {
                    Some(existing) => Self::update_node(existing, rest, f),
                    None => Self::update_node(&Node::default(), rest, f),
                };
                copy.children.insert((*head).to_string(), Arc::new(child));
            }
        }
        copy
    }

    /// Value stored exactly at `prefix`.
    pub fn get(&self, prefix: &str) -> Option<&T> {
        let mut node = self.root.as_ref();
        for seg in segments(prefix) {
            node = node.children.get(seg)?;
        }
        node.value.as_ref()
    }

    /// Value at the deepest node whose prefix covers `path`.
    pub fn longest_match(&self, path: &str) -> Option<&T> {
        self.matches(path).into_iter().next()
    }

    /// Every value whose prefix covers `path`, longest prefix first.
    pub fn matches(&self, path: &str) -> Vec<&T> {
        let mut found = Vec::new();
        let mut node = self.root.as_ref();
        if let Some(v) = &node.value {
            found.push(v);
        }
        for seg in segments(path) {
            match node.children.get(seg) {
                Some(child) => node = child.as_ref(),
                None => break,
            }
            if let Some(v) = &node.value {
                found.push(v);
            }
        }
        found.reverse();
        found
    }

    pub fn is_empty(&self) -> bool {
        self.root.value.is_none() && self.root.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_match() {
        let trie = PathTrie::new()
            .insert("/api", "api")
            .insert("/api/v2", "v2")
            .insert("/", "root");

        assert_eq!(trie.longest_match("/api/v2/orders"), Some(&"v2"));
        assert_eq!(trie.longest_match("/api/v1/orders"), Some(&"api"));
        assert_eq!(trie.longest_match("/api"), Some(&"api"));
        assert_eq!(trie.longest_match("/other"), Some(&"root"));
        assert_eq!(trie.matches("/api/v2/x"), vec![&"v2", &"api", &"root"]);
    }

    #[test]
    fn test_segment_boundaries() {
        let trie = PathTrie::new().insert("/api", 1);
        assert_eq!(trie.longest_match("/apix"), None);
        assert_eq!(trie.longest_match("/api/"), Some(&1));
        assert_eq!(trie.longest_match("//api//x"), Some(&1));
    }

    #[test]
    fn test_insert_leaves_previous_version_untouched() {
        let v1 = PathTrie::new().insert("/a", 1);
        let v2 = v1.insert("/a/b", 2).insert("/a", 10);

        assert_eq!(v1.longest_match("/a/b"), Some(&1));
        assert_eq!(v2.longest_match("/a/b"), Some(&2));
        assert_eq!(v2.get("/a"), Some(&10));
        assert_eq!(v1.get("/a"), Some(&1));
    }

    #[test]
    fn test_update_can_clear() {
        let trie = PathTrie::new().insert("/a", 1).insert("/a/b", 2);
        let cleared = trie.update("/a/b", |_| None);
        assert_eq!(cleared.longest_match("/a/b/c"), Some(&1));
        assert_eq!(cleared.get("/a/b"), None);
    }

    #[test]
    fn test_empty() {
        let trie: PathTrie<u8> = PathTrie::new();
        assert!(trie.is_empty());
        assert_eq!(trie.longest_match("/anything"), None);
    }
}
