//! Name trees (`/Names /Dests`, `/Names /EmbeddedFiles`, ...).
//!
//! A tree is flattened into a sorted map on load and rebuilt from scratch
//! when it was modified: leaves of at most [`NODE_SIZE`] pairs with
//! `/Limits`, intermediate nodes of at most [`NODE_SIZE`] kids.

use crate::error::Result;
use crate::object::{Dictionary, Object, ObjectRef};
use crate::store::ObjectStore;
use std::collections::{BTreeMap, HashSet};

/// Entries per leaf and kids per intermediate node.
pub const NODE_SIZE: usize = 40;

/// Flattened name tree.
#[derive(Debug, Clone, Default)]
pub struct NameTree {
    items: BTreeMap<Vec<u8>, Object>,
    modified: bool,
}

impl NameTree {
    /// Empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten the tree whose root is `root` (a reference or a direct dictionary).
    pub fn load(store: &mut dyn ObjectStore, root: &Object) -> Result<Self> {
        let mut tree = Self::new();
        let mut visited = HashSet::new();
        tree.read_node(store, root, &mut visited)?;
        Ok(tree)
    }

    fn read_node(
        &mut self,
        store: &mut dyn ObjectStore,
        node: &Object,
        visited: &mut HashSet<ObjectRef>,
    ) -> Result<()> {
        if let Object::Reference(r) = node {
            if !visited.insert(*r) {
                log::warn!("Name tree cycle at {}", r);
                return Ok(());
            }
        }
        let node = store.resolve(node)?;
        let Some(dict) = node.as_dict() else {
            log::warn!("Name tree node is a {}, not a dictionary", node.type_name());
            return Ok(());
        };
        if let Some(names) = dict.get("Names") {
            let names = store.resolve(names)?;
            if let Some(pairs) = names.as_array() {
                for pair in pairs.chunks(2) {
                    match pair {
                        [Object::String(key), value] => {
                            self.items.insert(key.clone(), value.clone());
                        },
                        [other, _] => log::warn!("Name tree key is a {}; entry skipped", other.type_name()),
                        _ => log::warn!("Name tree /Names has an odd number of entries"),
                    }
                }
            }
        }
        if let Some(kids) = dict.get("Kids") {
            let kids = store.resolve(kids)?;
            for kid in kids.as_array().cloned().unwrap_or_default() {
                self.read_node(store, &kid, visited)?;
            }
        }
        Ok(())
    }

    /// Merge a legacy name dictionary (catalog `/Dests` of PDF 1.1) without
    /// overriding entries of the tree.
    pub fn merge_legacy(&mut self, dict: &Dictionary) {
        for (name, value) in dict {
            self.items
                .entry(name.as_bytes().to_vec())
                .or_insert_with(|| value.clone());
        }
    }

    /// Value stored under `name`.
    pub fn get(&self, name: &[u8]) -> Option<&Object> {
        self.items.get(name)
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &Object)> {
        self.items.iter().map(|(k, v)| (k.as_slice(), v))
    }

    /// Insert or replace an entry.
    pub fn add(&mut self, name: impl Into<Vec<u8>>, value: Object) {
        self.items.insert(name.into(), value);
        self.modified = true;
    }

    /// Remove an entry.
    pub fn remove(&mut self, name: &[u8]) -> Option<Object> {
        let removed = self.items.remove(name);
        if removed.is_some() {
            self.modified = true;
        }
        removed
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// No entries.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Entries changed since load.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Force (or clear) the modified flag.
    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    /// Write the tree as new indirect objects and return its root, or `None` when empty.
    pub fn build(&self, store: &mut dyn ObjectStore) -> Result<Option<ObjectRef>> {
        if self.items.is_empty() {
            return Ok(None);
        }
        let entries: Vec<(&Vec<u8>, &Object)> = self.items.iter().collect();
        if entries.len() <= NODE_SIZE {
            let mut root = Dictionary::new();
            root.insert("Names".into(), names_array(&entries));
            return Ok(Some(store.add(Object::Dictionary(root))));
        }

        let mut level: Vec<(ObjectRef, Vec<u8>, Vec<u8>)> = Vec::new();
        for chunk in entries.chunks(NODE_SIZE) {
            let (first, last) = (chunk[0].0.clone(), chunk[chunk.len() - 1].0.clone());
            let mut leaf = Dictionary::new();
            leaf.insert("Names".into(), names_array(chunk));
            leaf.insert("Limits".into(), limits(&first, &last));
            level.push((store.add(Object::Dictionary(leaf)), first, last));
        }
        while level.len() > NODE_SIZE {
            let mut next = Vec::new();
            for chunk in level.chunks(NODE_SIZE) {
                let (first, last) = (chunk[0].1.clone(), chunk[chunk.len() - 1].2.clone());
                let mut node = Dictionary::new();
                node.insert("Kids".into(), kids_array(chunk));
                node.insert("Limits".into(), limits(&first, &last));
                next.push((store.add(Object::Dictionary(node)), first, last));
            }
            level = next;
        }
        let mut root = Dictionary::new();
        root.insert("Kids".into(), kids_array(&level));
        Ok(Some(store.add(Object::Dictionary(root))))
    }
}

fn names_array(entries: &[(&Vec<u8>, &Object)]) -> Object {
    let mut names = Vec::with_capacity(entries.len() * 2);
    for (key, value) in entries {
        names.push(Object::String((*key).clone()));
        names.push((*value).clone());
    }
    Object::Array(names)
}

fn kids_array(nodes: &[(ObjectRef, Vec<u8>, Vec<u8>)]) -> Object {
    Object::Array(nodes.iter().map(|(r, _, _)| Object::Reference(*r)).collect())
}

fn limits(first: &[u8], last: &[u8]) -> Object {
    Object::Array(vec![Object::String(first.to_vec()), Object::String(last.to_vec())])
}
