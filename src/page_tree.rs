//! Page tree.
//!
//! The source tree is flattened lazily into an ordered list of page
//! references. Pages are grouped into *leaves*: consecutive runs that share
//! one `/Pages` node as their `/Parent`. A page's `/Parent` always names its
//! leaf, so a page that is flushed early stays valid however the upper
//! levels are rebuilt at close.
//!
//! [`PageTree::generate_tree`] rewrites the leaves and builds balanced
//! upper levels of at most [`LEAF_SIZE`] kids each. In append mode an
//! unmodified tree is left alone.

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::store::ObjectStore;
use std::collections::HashSet;

/// Maximum number of kids per generated `/Pages` node.
pub const LEAF_SIZE: usize = 10;

/// Keys a page inherits from its ancestors.
pub const INHERITABLE_KEYS: [&str; 4] = ["Resources", "MediaBox", "CropBox", "Rotate"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Leaf {
    node: ObjectRef,
    count: usize,
}

/// Flattened, mutable view of the document's page tree.
#[derive(Debug, Clone)]
pub struct PageTree {
    root: ObjectRef,
    pages: Vec<ObjectRef>,
    leaves: Vec<Leaf>,
    loaded: bool,
    modified: bool,
    materialize_inherited: bool,
    pending_inherited: Vec<(ObjectRef, Dictionary)>,
}

impl PageTree {
    /// Tree rooted at `root`. When `materialize_inherited` is set, attributes
    /// inherited from intermediate nodes are copied into pages as they load.
    pub fn new(root: ObjectRef, materialize_inherited: bool) -> Self {
        Self {
            root,
            pages: Vec::new(),
            leaves: Vec::new(),
            loaded: false,
            modified: false,
            materialize_inherited,
            pending_inherited: Vec::new(),
        }
    }

    /// Tree for a new, empty document.
    pub(crate) fn empty(root: ObjectRef) -> Self {
        let mut tree = Self::new(root, false);
        tree.loaded = true;
        tree.modified = true;
        tree
    }

    /// Root `/Pages` reference as found in the catalog.
    pub fn root(&self) -> ObjectRef {
        self.root
    }

    /// Pages were added, removed or moved.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    fn ensure_loaded(&mut self, store: &mut dyn ObjectStore) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        let mut visited = HashSet::new();
        let mut found = Vec::new();
        self.walk(store, self.root, self.root, &Dictionary::new(), &mut visited, &mut found)?;

        for (page, parent, inherited) in found {
            match self.leaves.last_mut() {
                Some(leaf) if leaf.node == parent => leaf.count += 1,
                _ => self.leaves.push(Leaf { node: parent, count: 1 }),
            }
            self.pages.push(page);
            if !inherited.is_empty() {
                self.pending_inherited.push((page, inherited));
            }
        }
        self.loaded = true;
        log::debug!("Loaded page tree {}: {} pages", self.root, self.pages.len());

        if self.materialize_inherited {
            self.apply_inherited(store)?;
        }
        Ok(())
    }

    fn walk(
        &self,
        store: &mut dyn ObjectStore,
        node: ObjectRef,
        parent: ObjectRef,
        inherited: &Dictionary,
        visited: &mut HashSet<ObjectRef>,
        found: &mut Vec<(ObjectRef, ObjectRef, Dictionary)>,
    ) -> Result<()> {
        if !visited.insert(node) {
            log::warn!("Page tree cycle at {}; subtree skipped", node);
            return Ok(());
        }
        let dict = match store.dict(node) {
            Ok(dict) => dict,
            Err(e) => {
                log::warn!("Page tree node {} is unusable: {}", node, e);
                return Ok(());
            },
        };
        let is_pages = match dict.get("Type").and_then(Object::as_name) {
            Some("Pages") => true,
            Some("Page") => false,
            _ => dict.contains_key("Kids"),
        };
        if !is_pages {
            let missing: Dictionary = inherited
                .iter()
                .filter(|(k, _)| !dict.contains_key(k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            found.push((node, parent, missing));
            return Ok(());
        }

        // The root's own attributes stay on the root and keep applying.
        let mut inherited = inherited.clone();
        if node != self.root {
            for key in INHERITABLE_KEYS {
                if let Some(value) = dict.get(key) {
                    inherited.insert(key.to_string(), value.clone());
                }
            }
        }
        let kids = dict.get("Kids").and_then(Object::as_array).cloned().unwrap_or_default();
        for kid in kids {
            match kid {
                Object::Reference(r) => self.walk(store, r, node, &inherited, visited, found)?,
                other => log::warn!("Ignoring direct page tree kid ({}) in {}", other.type_name(), node),
            }
        }
        Ok(())
    }

    fn apply_inherited(&mut self, store: &mut dyn ObjectStore) -> Result<()> {
        for (page, inherited) in std::mem::take(&mut self.pending_inherited) {
            if store.is_flushed(page) || store.is_free(page) {
                continue;
            }
            let dict = store.dict_mut(page)?;
            for (key, value) in inherited {
                dict.entry(key).or_insert(value);
            }
        }
        Ok(())
    }

    /// Number of pages.
    pub fn len(&mut self, store: &mut dyn ObjectStore) -> Result<usize> {
        self.ensure_loaded(store)?;
        Ok(self.pages.len())
    }

    /// Page references in document order.
    pub fn refs(&mut self, store: &mut dyn ObjectStore) -> Result<&[ObjectRef]> {
        self.ensure_loaded(store)?;
        Ok(&self.pages)
    }

    /// Page at 1-based `number`.
    pub fn get(&mut self, store: &mut dyn ObjectStore, number: usize) -> Result<ObjectRef> {
        self.ensure_loaded(store)?;
        if number == 0 || number > self.pages.len() {
            return Err(Error::PageIndexOutOfBounds {
                index: number,
                count: self.pages.len(),
            });
        }
        Ok(self.pages[number - 1])
    }

    /// 1-based number of `page`, if it is in the tree.
    pub fn index_of(&mut self, store: &mut dyn ObjectStore, page: ObjectRef) -> Result<Option<usize>> {
        self.ensure_loaded(store)?;
        Ok(self.pages.iter().position(|p| *p == page).map(|i| i + 1))
    }

    /// Index of the leaf holding the page at 0-based `pos`.
    fn leaf_of(&self, pos: usize) -> Option<usize> {
        let mut start = 0;
        for (i, leaf) in self.leaves.iter().enumerate() {
            if pos < start + leaf.count {
                return Some(i);
            }
            start += leaf.count;
        }
        None
    }

    fn new_leaf(&self, store: &mut dyn ObjectStore) -> ObjectRef {
        store.add(Object::dict([
            ("Type", Object::name("Pages")),
            ("Kids", Object::Array(Vec::new())),
            ("Count", Object::Integer(0)),
        ]))
    }

    /// Insert `page` so it becomes page `index` (1-based; `len + 1` appends).
    pub fn insert(&mut self, store: &mut dyn ObjectStore, index: usize, page: ObjectRef) -> Result<()> {
        self.ensure_loaded(store)?;
        let count = self.pages.len();
        if index == 0 || index > count + 1 {
            return Err(Error::PageIndexOutOfBounds { index, count });
        }
        if store.is_flushed(page) {
            return Err(Error::FlushedPageCannotBeAdded(page));
        }
        if self.pages.contains(&page) {
            return Err(Error::InvalidArgument(format!("page {} is already in the page tree", page)));
        }
        let pos = index - 1;

        let leaf_index = if pos < count {
            self.leaf_of(pos)
        } else {
            self.leaves.len().checked_sub(1)
        };
        let leaf_index = match leaf_index {
            Some(i) if pos < count => i,
            Some(i) if self.leaves[i].count < LEAF_SIZE && !store.is_flushed(self.leaves[i].node) => i,
            Some(_) => {
                let node = self.new_leaf(store);
                self.leaves.push(Leaf { node, count: 0 });
                self.leaves.len() - 1
            },
            None => {
                self.leaves.push(Leaf {
                    node: self.root,
                    count: 0,
                });
                0
            },
        };
        let parent = self.leaves[leaf_index].node;
        store
            .dict_mut(page)?
            .insert("Parent".into(), Object::Reference(parent));
        self.leaves[leaf_index].count += 1;
        self.pages.insert(pos, page);
        self.modified = true;
        Ok(())
    }

    /// Append `page`.
    pub fn push(&mut self, store: &mut dyn ObjectStore, page: ObjectRef) -> Result<()> {
        let count = self.len(store)?;
        self.insert(store, count + 1, page)
    }

    /// Remove page `number` (1-based) from the tree and return it.
    ///
    /// The page object itself is left alone.
    pub fn remove(&mut self, store: &mut dyn ObjectStore, number: usize) -> Result<ObjectRef> {
        self.ensure_loaded(store)?;
        let page = self.get(store, number)?;
        let pos = number - 1;
        if let Some(i) = self.leaf_of(pos) {
            self.leaves[i].count -= 1;
            // a flushed page still names its leaf as /Parent
            if self.leaves[i].count == 0 && !store.is_flushed(page) {
                let node = self.leaves.remove(i).node;
                if node != self.root && !store.is_flushed(node) {
                    store.free(node);
                }
            }
        }
        self.pages.remove(pos);
        self.modified = true;
        Ok(page)
    }

    /// Write the tree and return the reference the catalog's `/Pages` must hold.
    pub fn generate_tree(&mut self, store: &mut dyn ObjectStore) -> Result<ObjectRef> {
        if !self.modified && store.is_append_mode() {
            return Ok(self.root);
        }
        self.ensure_loaded(store)?;
        self.apply_inherited(store)?;
        self.split_shared_leaves(store)?;
        if self.pages.is_empty() {
            log::info!("Document has no pages");
        }

        let mut start = 0;
        let mut level: Vec<(ObjectRef, usize)> = Vec::with_capacity(self.leaves.len());
        for leaf in &self.leaves {
            let kids = &self.pages[start..start + leaf.count];
            start += leaf.count;
            if store.is_flushed(leaf.node) {
                log::warn!("Page tree node {} was flushed before the tree was complete", leaf.node);
            } else {
                write_node(store, leaf.node, kids, leaf.count)?;
            }
            level.push((leaf.node, leaf.count));
        }

        let root_is_leaf = self.leaves.iter().any(|l| l.node == self.root);
        loop {
            if level.len() == 1 && (root_is_leaf || level[0].0 == self.root) {
                let top = level[0].0;
                if top != self.root {
                    self.carry_root_attributes(store, top)?;
                }
                store.dict_mut(top)?.shift_remove("Parent");
                return Ok(top);
            }
            if !root_is_leaf && level.len() <= LEAF_SIZE {
                let kids: Vec<ObjectRef> = level.iter().map(|(r, _)| *r).collect();
                let count = level.iter().map(|(_, c)| c).sum();
                write_node(store, self.root, &kids, count)?;
                set_parent(store, &kids, self.root)?;
                store.dict_mut(self.root)?.shift_remove("Parent");
                return Ok(self.root);
            }
            let mut next = Vec::with_capacity(level.len() / LEAF_SIZE + 1);
            for group in level.chunks(LEAF_SIZE) {
                let kids: Vec<ObjectRef> = group.iter().map(|(r, _)| *r).collect();
                let count = group.iter().map(|(_, c)| c).sum();
                let node = store.add(Object::Dictionary(Dictionary::new()));
                write_node(store, node, &kids, count)?;
                set_parent(store, &kids, node)?;
                next.push((node, count));
            }
            level = next;
        }
    }

    /// A node shared by non-adjacent runs keeps the first run; later runs
    /// move to fresh nodes.
    fn split_shared_leaves(&mut self, store: &mut dyn ObjectStore) -> Result<()> {
        let mut seen = HashSet::new();
        let mut start = 0;
        for i in 0..self.leaves.len() {
            let leaf = self.leaves[i];
            if !seen.insert(leaf.node) {
                let node = self.new_leaf(store);
                for page in self.pages[start..start + leaf.count].to_vec() {
                    if store.is_flushed(page) {
                        log::warn!("Flushed page {} keeps a stale /Parent", page);
                        continue;
                    }
                    store.dict_mut(page)?.insert("Parent".into(), Object::Reference(node));
                }
                self.leaves[i].node = node;
            }
            start += leaf.count;
        }
        Ok(())
    }

    fn carry_root_attributes(&self, store: &mut dyn ObjectStore, top: ObjectRef) -> Result<()> {
        let root = store.dict(self.root)?;
        let dict = store.dict_mut(top)?;
        for key in INHERITABLE_KEYS {
            if let Some(value) = root.get(key) {
                dict.entry(key.to_string()).or_insert_with(|| value.clone());
            }
        }
        Ok(())
    }
}

fn write_node(store: &mut dyn ObjectStore, node: ObjectRef, kids: &[ObjectRef], count: usize) -> Result<()> {
    let dict = store.dict_mut(node)?;
    dict.insert("Type".into(), Object::name("Pages"));
    dict.insert(
        "Kids".into(),
        Object::Array(kids.iter().copied().map(Object::Reference).collect()),
    );
    dict.insert("Count".into(), Object::Integer(count as i64));
    Ok(())
}

fn set_parent(store: &mut dyn ObjectStore, kids: &[ObjectRef], parent: ObjectRef) -> Result<()> {
    for kid in kids {
        if store.is_flushed(*kid) {
            continue;
        }
        store.dict_mut(*kid)?.insert("Parent".into(), Object::Reference(parent));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::NoopConformanceChecker;
    use crate::filters::StandardCodec;
    use crate::store::DocumentStore;
    use crate::writer::PdfWriter;
    use std::sync::Arc;

    fn store() -> DocumentStore<Vec<u8>> {
        DocumentStore::new(
            1,
            None,
            Some(PdfWriter::with_defaults(Vec::new())),
            Arc::new(StandardCodec::default()),
            Arc::new(NoopConformanceChecker),
        )
    }

    fn page(store: &mut DocumentStore<Vec<u8>>) -> ObjectRef {
        store.add(Object::dict([("Type", Object::name("Page"))]))
    }

    fn tree(store: &mut DocumentStore<Vec<u8>>) -> PageTree {
        let root = store.add(Object::dict([("Type", Object::name("Pages"))]));
        PageTree::empty(root)
    }

    #[test]
    fn test_insert_and_get() {
        let mut store = store();
        let mut tree = tree(&mut store);
        let (a, b, c) = (page(&mut store), page(&mut store), page(&mut store));
        tree.push(&mut store, a).unwrap();
        tree.push(&mut store, c).unwrap();
        tree.insert(&mut store, 2, b).unwrap();
        assert_eq!(tree.refs(&mut store).unwrap(), &[a, b, c]);
        assert_eq!(tree.index_of(&mut store, c).unwrap(), Some(3));
        assert!(matches!(
            tree.get(&mut store, 4),
            Err(Error::PageIndexOutOfBounds { index: 4, count: 3 })
        ));
        let d = page(&mut store);
        assert!(matches!(tree.insert(&mut store, 5, d), Err(Error::PageIndexOutOfBounds { .. })));
        let parent = store.dict(b).unwrap().get("Parent").and_then(Object::as_reference);
        assert_eq!(parent, Some(tree.root()));
    }

    #[test]
    fn test_remove() {
        let mut store = store();
        let mut tree = tree(&mut store);
        let pages: Vec<_> = (0..3).map(|_| page(&mut store)).collect();
        for p in &pages {
            tree.push(&mut store, *p).unwrap();
        }
        assert_eq!(tree.remove(&mut store, 2).unwrap(), pages[1]);
        assert_eq!(tree.refs(&mut store).unwrap(), &[pages[0], pages[2]]);
    }

    #[test]
    fn test_small_tree_is_flat() {
        let mut store = store();
        let mut tree = tree(&mut store);
        for _ in 0..4 {
            let p = page(&mut store);
            tree.push(&mut store, p).unwrap();
        }
        let top = tree.generate_tree(&mut store).unwrap();
        assert_eq!(top, tree.root());
        let root = store.dict(top).unwrap();
        assert_eq!(root.get("Count").and_then(Object::as_integer), Some(4));
        assert_eq!(root.get("Kids").and_then(Object::as_array).map(Vec::len), Some(4));
    }

    #[test]
    fn test_large_tree_is_balanced() {
        let mut store = store();
        let mut tree = tree(&mut store);
        let pages: Vec<_> = (0..25).map(|_| page(&mut store)).collect();
        for p in &pages {
            tree.push(&mut store, *p).unwrap();
        }
        let top = tree.generate_tree(&mut store).unwrap();
        let top_dict = store.dict(top).unwrap();
        assert_eq!(top_dict.get("Count").and_then(Object::as_integer), Some(25));
        let kids = top_dict.get("Kids").and_then(Object::as_array).cloned().unwrap();
        assert_eq!(kids.len(), 3);
        assert!(!top_dict.contains_key("Parent"));

        // every page's parent lists it
        for p in &pages {
            let parent = store.dict(*p).unwrap().get("Parent").and_then(Object::as_reference).unwrap();
            let listed = store.dict(parent).unwrap();
            let kids = listed.get("Kids").and_then(Object::as_array).unwrap();
            assert!(kids.contains(&Object::Reference(*p)));
        }
    }

    #[test]
    fn test_flatten_nested_source_with_inheritance() {
        let mut store = store();
        let p1 = page(&mut store);
        let p2 = page(&mut store);
        let p3 = page(&mut store);
        let mid = store.add(Object::dict([
            ("Type", Object::name("Pages")),
            ("Kids", Object::Array(vec![Object::Reference(p2), Object::Reference(p3)])),
            ("Rotate", Object::Integer(90)),
        ]));
        let root = store.add(Object::dict([
            ("Type", Object::name("Pages")),
            ("Kids", Object::Array(vec![Object::Reference(p1), Object::Reference(mid)])),
            ("Count", Object::Integer(3)),
        ]));
        let mut tree = PageTree::new(root, true);
        assert_eq!(tree.refs(&mut store).unwrap(), &[p1, p2, p3]);
        assert_eq!(store.dict(p2).unwrap().get("Rotate"), Some(&Object::Integer(90)));
        assert!(store.dict(p1).unwrap().get("Rotate").is_none());
    }

    #[test]
    fn test_cycle_is_skipped() {
        let mut store = store();
        let root = store.add(Object::Null);
        let p = page(&mut store);
        store
            .replace(
                root,
                Object::dict([
                    ("Type", Object::name("Pages")),
                    ("Kids", Object::Array(vec![Object::Reference(p), Object::Reference(root)])),
                ]),
            )
            .unwrap();
        let mut tree = PageTree::new(root, false);
        assert_eq!(tree.len(&mut store).unwrap(), 1);
    }

    #[test]
    fn test_flushed_page_cannot_be_added() {
        let mut store = store();
        let mut tree = tree(&mut store);
        let p = page(&mut store);
        store.flush(p).unwrap();
        assert!(matches!(tree.push(&mut store, p), Err(Error::FlushedPageCannotBeAdded(_))));
    }
}
