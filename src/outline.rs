//! Document outline (bookmarks).
//!
//! Outline items are held in an arena indexed by [`OutlineId`]; index 0 is
//! the `/Outlines` root. The tree is loaded from the `/First` / `/Next`
//! chains of the source, edited in memory and written back by
//! [`OutlineTree::build`], which reuses the object numbers of loaded items.

use crate::error::{Error, Result};
use crate::info::{decode_text_string, encode_text_string};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::store::ObjectStore;
use std::collections::HashSet;

/// Index of an outline item in its tree.
pub type OutlineId = usize;

/// Keys rebuilt from the arena; everything else is carried over.
const LINK_KEYS: [&str; 9] = ["Title", "Parent", "Prev", "Next", "First", "Last", "Count", "Dest", "A"];

/// A single outline item.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlineNode {
    /// Displayed title
    pub title: String,
    /// `/Dest` value: explicit array, or a name / string naming a destination
    pub dest: Option<Object>,
    /// `/A` action dictionary
    pub action: Option<Object>,
    /// Children are shown expanded
    pub open: bool,
    /// Other entries (`/C`, `/F`, `/SE`, ...)
    pub extra: Dictionary,
    parent: Option<OutlineId>,
    children: Vec<OutlineId>,
    source: Option<ObjectRef>,
    removed: bool,
}

impl OutlineNode {
    fn new(title: impl Into<String>, parent: Option<OutlineId>) -> Self {
        Self {
            title: title.into(),
            dest: None,
            action: None,
            open: false,
            extra: Dictionary::new(),
            parent,
            children: Vec::new(),
            source: None,
            removed: false,
        }
    }

    /// Parent item; `None` for the root.
    pub fn parent(&self) -> Option<OutlineId> {
        self.parent
    }

    /// Child items in display order.
    pub fn children(&self) -> &[OutlineId] {
        &self.children
    }

    /// Object the item was loaded from.
    pub fn source(&self) -> Option<ObjectRef> {
        self.source
    }
}

/// Outline arena.
#[derive(Debug, Clone)]
pub struct OutlineTree {
    nodes: Vec<OutlineNode>,
    modified: bool,
}

impl Default for OutlineTree {
    fn default() -> Self {
        Self::new()
    }
}

impl OutlineTree {
    /// Root id.
    pub const ROOT: OutlineId = 0;

    /// Tree with only the root.
    pub fn new() -> Self {
        Self {
            nodes: vec![OutlineNode::new("Outlines", None)],
            modified: false,
        }
    }

    /// Load the tree rooted at the `/Outlines` dictionary `root`.
    pub fn load(store: &mut dyn ObjectStore, root: ObjectRef) -> Result<Self> {
        let mut tree = Self::new();
        tree.nodes[Self::ROOT].source = Some(root);
        let mut visited = HashSet::from([root]);
        let dict = store.dict(root)?;
        tree.load_children(store, Self::ROOT, &dict, &mut visited)?;
        Ok(tree)
    }

    fn load_children(
        &mut self,
        store: &mut dyn ObjectStore,
        parent: OutlineId,
        parent_dict: &Dictionary,
        visited: &mut HashSet<ObjectRef>,
    ) -> Result<()> {
        let mut next = parent_dict.get("First").and_then(Object::as_reference);
        while let Some(current) = next {
            if !visited.insert(current) {
                log::warn!("Outline cycle at {}; remaining siblings skipped", current);
                break;
            }
            let dict = match store.dict(current) {
                Ok(dict) => dict,
                Err(e) => {
                    log::warn!("Outline item {} is unusable: {}", current, e);
                    break;
                },
            };
            let title = dict
                .get("Title")
                .and_then(Object::as_string)
                .map(decode_text_string)
                .unwrap_or_default();
            let id = self.nodes.len();
            let mut node = OutlineNode::new(title, Some(parent));
            node.dest = dict.get("Dest").cloned();
            node.action = dict.get("A").cloned();
            node.open = dict.get("Count").and_then(Object::as_integer).is_some_and(|c| c > 0);
            node.extra = dict
                .iter()
                .filter(|(k, _)| !LINK_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            node.source = Some(current);
            self.nodes.push(node);
            self.nodes[parent].children.push(id);

            self.load_children(store, id, &dict, visited)?;
            next = dict.get("Next").and_then(Object::as_reference);
        }
        Ok(())
    }

    /// Item `id`.
    pub fn node(&self, id: OutlineId) -> Option<&OutlineNode> {
        self.nodes.get(id).filter(|n| !n.removed)
    }

    /// Mutable item `id`; marks the tree modified.
    pub fn node_mut(&mut self, id: OutlineId) -> Option<&mut OutlineNode> {
        self.modified = true;
        self.nodes.get_mut(id).filter(|n| !n.removed)
    }

    /// Top-level items.
    pub fn top_level(&self) -> &[OutlineId] {
        &self.nodes[Self::ROOT].children
    }

    /// Live items in depth-first display order, root excluded.
    pub fn iter(&self) -> Vec<OutlineId> {
        let mut out = Vec::new();
        let mut stack: Vec<OutlineId> = self.top_level().iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.nodes[id].children.iter().rev().copied());
        }
        out
    }

    /// Changed since load.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Number of live items, root excluded.
    pub fn len(&self) -> usize {
        self.iter().len()
    }

    /// No items besides the root.
    pub fn is_empty(&self) -> bool {
        self.top_level().is_empty()
    }

    /// Append a child titled `title` under `parent`.
    pub fn add_outline(&mut self, parent: OutlineId, title: impl Into<String>) -> Result<OutlineId> {
        let position = self.node(parent).map(|n| n.children.len()).unwrap_or(0);
        self.add_outline_at(parent, title, position)
    }

    /// Insert a child titled `title` under `parent` at `position`.
    pub fn add_outline_at(
        &mut self,
        parent: OutlineId,
        title: impl Into<String>,
        position: usize,
    ) -> Result<OutlineId> {
        let count = match self.node(parent) {
            Some(node) => node.children.len(),
            None => return Err(Error::InvalidArgument(format!("no outline item {}", parent))),
        };
        if position > count {
            return Err(Error::InvalidArgument(format!(
                "outline position {} is past the {} children of item {}",
                position, count, parent
            )));
        }
        let id = self.nodes.len();
        self.nodes.push(OutlineNode::new(title, Some(parent)));
        self.nodes[parent].children.insert(position, id);
        self.modified = true;
        Ok(id)
    }

    /// Remove `id` and its subtree.
    pub fn remove(&mut self, id: OutlineId) {
        if id == Self::ROOT || self.node(id).is_none() {
            return;
        }
        if let Some(parent) = self.nodes[id].parent {
            self.nodes[parent].children.retain(|c| *c != id);
        }
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            self.nodes[current].removed = true;
            stack.extend(self.nodes[current].children.iter().copied());
        }
        self.modified = true;
    }

    /// Page an item points at. `named` resolves named destinations.
    pub fn destination_page(
        &self,
        id: OutlineId,
        named: &dyn Fn(&[u8]) -> Option<Object>,
    ) -> Option<ObjectRef> {
        let node = self.node(id)?;
        let dest = match (&node.dest, &node.action) {
            (Some(dest), _) => dest.clone(),
            (None, Some(action)) if action.get("S").and_then(Object::as_name) == Some("GoTo") => {
                action.get("D")?.clone()
            },
            _ => return None,
        };
        destination_page(&dest, named)
    }

    /// Remove every item whose destination is `page`, with its subtree.
    pub fn remove_for_page(&mut self, page: ObjectRef, named: &dyn Fn(&[u8]) -> Option<Object>) -> usize {
        let doomed: Vec<OutlineId> = self
            .iter()
            .into_iter()
            .filter(|id| self.destination_page(*id, named) == Some(page))
            .collect();
        let mut removed = 0;
        for id in doomed {
            if self.node(id).is_some() {
                self.remove(id);
                removed += 1;
            }
        }
        removed
    }

    fn visible_count(&self, id: OutlineId) -> i64 {
        self.nodes[id]
            .children
            .iter()
            .map(|c| 1 + if self.nodes[*c].open { self.visible_count(*c) } else { 0 })
            .sum()
    }

    /// Write the tree and return the `/Outlines` reference, or `None` when
    /// there are no items. Objects of removed items are freed.
    pub fn build(&self, store: &mut dyn ObjectStore) -> Result<Option<ObjectRef>> {
        for node in self.nodes.iter().filter(|n| n.removed) {
            if let Some(r) = node.source {
                if !store.is_flushed(r) {
                    store.free(r);
                }
            }
        }
        if self.is_empty() {
            if let Some(r) = self.nodes[Self::ROOT].source {
                if !store.is_flushed(r) {
                    store.free(r);
                }
            }
            return Ok(None);
        }

        let mut refs: Vec<Option<ObjectRef>> = vec![None; self.nodes.len()];
        let live: Vec<OutlineId> = std::iter::once(Self::ROOT).chain(self.iter()).collect();
        for &id in &live {
            let reuse = self.nodes[id]
                .source
                .filter(|r| !store.is_flushed(*r) && !store.is_free(*r));
            refs[id] = Some(reuse.unwrap_or_else(|| store.add(Object::Null)));
        }
        let at = |id: OutlineId| refs[id].map(Object::Reference).unwrap_or(Object::Null);

        for &id in &live {
            let node = &self.nodes[id];
            let mut dict = Dictionary::new();
            if id == Self::ROOT {
                dict.insert("Type".into(), Object::name("Outlines"));
            } else {
                dict.insert("Title".into(), Object::String(encode_text_string(&node.title)));
            }
            if let Some(parent) = node.parent {
                dict.insert("Parent".into(), at(parent));
                let siblings = &self.nodes[parent].children;
                if let Some(pos) = siblings.iter().position(|s| *s == id) {
                    if pos > 0 {
                        dict.insert("Prev".into(), at(siblings[pos - 1]));
                    }
                    if let Some(next) = siblings.get(pos + 1) {
                        dict.insert("Next".into(), at(*next));
                    }
                }
            }
            if let (Some(first), Some(last)) = (node.children.first(), node.children.last()) {
                dict.insert("First".into(), at(*first));
                dict.insert("Last".into(), at(*last));
                let visible = self.visible_count(id);
                let count = if id == Self::ROOT || node.open {
                    visible
                } else {
                    -(node.children.len() as i64)
                };
                dict.insert("Count".into(), Object::Integer(count));
            }
            if let Some(dest) = &node.dest {
                dict.insert("Dest".into(), dest.clone());
            } else if let Some(action) = &node.action {
                dict.insert("A".into(), action.clone());
            }
            for (k, v) in &node.extra {
                dict.entry(k.clone()).or_insert_with(|| v.clone());
            }
            if let Some(r) = refs[id] {
                store.replace(r, Object::Dictionary(dict))?;
            }
        }
        Ok(refs[Self::ROOT])
    }
}

/// Page named by a destination: an explicit array, a name or string looked
/// up through `named`, or a dictionary with `/D`.
pub fn destination_page(dest: &Object, named: &dyn Fn(&[u8]) -> Option<Object>) -> Option<ObjectRef> {
    match dest {
        Object::Array(items) => items.first().and_then(Object::as_reference),
        Object::Name(name) => named(name.as_bytes()).and_then(|d| destination_page(&d, &|_| None)),
        Object::String(name) => named(name).and_then(|d| destination_page(&d, &|_| None)),
        Object::Dictionary(dict) => dict.get("D").and_then(|d| destination_page(d, named)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::NoopConformanceChecker;
    use crate::filters::StandardCodec;
    use crate::store::DocumentStore;
    use std::sync::Arc;

    fn store() -> DocumentStore<std::io::Sink> {
        DocumentStore::new(
            1,
            None,
            None,
            Arc::new(StandardCodec::default()),
            Arc::new(NoopConformanceChecker),
        )
    }

    fn no_names(_: &[u8]) -> Option<Object> {
        None
    }

    #[test]
    fn test_add_and_iterate() {
        let mut tree = OutlineTree::new();
        let a = tree.add_outline(OutlineTree::ROOT, "A").unwrap();
        let b = tree.add_outline(OutlineTree::ROOT, "B").unwrap();
        let a1 = tree.add_outline(a, "A.1").unwrap();
        assert_eq!(tree.iter(), vec![a, a1, b]);
        assert!(tree.add_outline_at(b, "x", 3).is_err());
    }

    #[test]
    fn test_remove_for_page() {
        let page = ObjectRef::new(7, 0);
        let mut tree = OutlineTree::new();
        let a = tree.add_outline(OutlineTree::ROOT, "A").unwrap();
        tree.node_mut(a).unwrap().dest = Some(Object::Array(vec![Object::Reference(page), Object::name("Fit")]));
        tree.add_outline(a, "child").unwrap();
        let b = tree.add_outline(OutlineTree::ROOT, "B").unwrap();
        tree.node_mut(b).unwrap().action = Some(Object::dict([
            ("S", Object::name("GoTo")),
            ("D", Object::string("named")),
        ]));
        let named = |name: &[u8]| {
            (name == b"named").then(|| Object::Array(vec![Object::Reference(ObjectRef::new(7, 0))]))
        };
        assert_eq!(tree.remove_for_page(page, &named), 2);
        assert!(tree.is_empty());
        assert!(tree.node(a).is_none());
    }

    #[test]
    fn test_build_and_reload() {
        let mut store = store();
        let mut tree = OutlineTree::new();
        let a = tree.add_outline(OutlineTree::ROOT, "Chapter").unwrap();
        tree.add_outline(a, "Section 1").unwrap();
        tree.add_outline(a, "Section 2").unwrap();
        tree.node_mut(a).unwrap().open = true;
        let root = tree.build(&mut store).unwrap().unwrap();

        let root_dict = store.dict(root).unwrap();
        assert_eq!(root_dict.get("Count").and_then(Object::as_integer), Some(3));

        let reloaded = OutlineTree::load(&mut store, root).unwrap();
        let titles: Vec<String> = reloaded
            .iter()
            .into_iter()
            .map(|id| reloaded.node(id).unwrap().title.clone())
            .collect();
        assert_eq!(titles, vec!["Chapter", "Section 1", "Section 2"]);
        assert!(reloaded.node(1).unwrap().open);
        assert!(!reloaded.is_modified());
    }

    #[test]
    fn test_empty_tree_frees_root() {
        let mut store = store();
        let root = store.add(Object::dict([("Type", Object::name("Outlines"))]));
        let tree = OutlineTree::load(&mut store, root).unwrap();
        assert!(tree.build(&mut store).unwrap().is_none());
        assert!(store.is_free(root));
    }

    #[test]
    fn test_destination_page_shapes() {
        let page = ObjectRef::new(3, 0);
        let explicit = Object::Array(vec![Object::Reference(page)]);
        assert_eq!(destination_page(&explicit, &no_names), Some(page));
        let wrapped = Object::dict([("D", explicit.clone())]);
        assert_eq!(destination_page(&wrapped, &no_names), Some(page));
        assert_eq!(destination_page(&Object::name("missing"), &no_names), None);
    }
}
