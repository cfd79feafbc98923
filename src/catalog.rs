//! Document catalog.
//!
//! [`Catalog`] wraps the root dictionary together with the structures hung
//! off it that the document edits in memory: the page tree, name trees and
//! the outline arena. They are written back into the catalog at close.

use crate::error::{Error, Result};
use crate::name_tree::NameTree;
use crate::object::{Dictionary, Object, ObjectRef};
use crate::outline::OutlineTree;
use crate::page::annotation_refs;
use crate::page_tree::PageTree;
use crate::store::ObjectStore;
use std::collections::BTreeMap;

/// Name tree holding named destinations.
pub const DESTS: &str = "Dests";

/// The catalog and its in-memory satellites.
#[derive(Debug, Clone)]
pub struct Catalog {
    obj: ObjectRef,
    pages: PageTree,
    name_trees: BTreeMap<String, NameTree>,
    outlines: Option<OutlineTree>,
    ocg_modified: bool,
}

impl Catalog {
    /// Wrap the catalog at `obj` with its page tree.
    pub fn new(obj: ObjectRef, pages: PageTree) -> Self {
        Self {
            obj,
            pages,
            name_trees: BTreeMap::new(),
            outlines: None,
            ocg_modified: false,
        }
    }

    /// Catalog reference.
    pub fn obj(&self) -> ObjectRef {
        self.obj
    }

    /// Page tree.
    pub fn page_tree(&self) -> &PageTree {
        &self.pages
    }

    /// Mutable page tree.
    pub fn page_tree_mut(&mut self) -> &mut PageTree {
        &mut self.pages
    }

    /// Clone of the catalog dictionary.
    pub fn dict(&self, store: &mut dyn ObjectStore) -> Result<Dictionary> {
        store.dict(self.obj)
    }

    /// `/Version`, when set.
    pub fn version(&self, store: &mut dyn ObjectStore) -> Result<Option<String>> {
        Ok(self
            .dict(store)?
            .get("Version")
            .and_then(Object::as_name)
            .map(str::to_string))
    }

    /// Resolve a catalog entry.
    pub fn entry(&self, store: &mut dyn ObjectStore, key: &str) -> Result<Option<Object>> {
        match self.dict(store)?.get(key) {
            Some(value) => store.resolve(value).map(Some),
            None => Ok(None),
        }
    }

    /// Set a catalog entry; marks the catalog modified.
    pub fn put(&self, store: &mut dyn ObjectStore, key: &str, value: Object) -> Result<()> {
        store.dict_mut(self.obj)?.insert(key.to_string(), value);
        Ok(())
    }

    /// Remove a catalog entry; marks the catalog modified.
    pub fn remove(&self, store: &mut dyn ObjectStore, key: &str) -> Result<Option<Object>> {
        Ok(store.dict_mut(self.obj)?.shift_remove(key))
    }

    /// Name tree `key` (`Dests`, `EmbeddedFiles`, ...), loaded on first use.
    pub fn name_tree(&mut self, store: &mut dyn ObjectStore, key: &str) -> Result<&mut NameTree> {
        if !self.name_trees.contains_key(key) {
            let tree = self.load_name_tree(store, key)?;
            self.name_trees.insert(key.to_string(), tree);
        }
        self.name_trees
            .get_mut(key)
            .ok_or_else(|| Error::InvalidArgument(format!("name tree {} is not loaded", key)))
    }

    fn load_name_tree(&self, store: &mut dyn ObjectStore, key: &str) -> Result<NameTree> {
        let catalog = self.dict(store)?;
        let names = match catalog.get("Names") {
            Some(names) => store.resolve(names)?,
            None => Object::Null,
        };
        let mut tree = match names.get(key) {
            Some(root) => NameTree::load(store, root)?,
            None => NameTree::new(),
        };
        if key == DESTS {
            if let Some(legacy) = catalog.get("Dests") {
                if let Some(legacy) = store.resolve(legacy)?.as_dict() {
                    tree.merge_legacy(legacy);
                }
            }
        }
        Ok(tree)
    }

    /// Add a named destination.
    ///
    /// `value` must be an explicit destination array or a dictionary with
    /// `/D`. An array whose first element is a page number (the form used
    /// for remote destinations) is accepted with a warning.
    pub fn add_named_destination(
        &mut self,
        store: &mut dyn ObjectStore,
        name: impl Into<Vec<u8>>,
        value: Object,
    ) -> Result<()> {
        match &value {
            Object::Array(items) => {
                if items.first().is_some_and(|first| first.as_number().is_some()) {
                    log::warn!("Named destination uses a page number; it is only valid for remote go-to actions");
                }
            },
            Object::Dictionary(_) => {},
            other => {
                return Err(Error::InvalidArgument(format!(
                    "named destination must be an array or a dictionary, not a {}",
                    other.type_name()
                )))
            },
        }
        self.name_tree(store, DESTS)?.add(name, value);
        Ok(())
    }

    /// Destination stored under `name`, from the name tree or the legacy dictionary.
    pub fn named_destination(&mut self, store: &mut dyn ObjectStore, name: &[u8]) -> Result<Option<Object>> {
        Ok(self.name_tree(store, DESTS)?.get(name).cloned())
    }

    /// Snapshot of all named destinations.
    pub fn named_destinations(&mut self, store: &mut dyn ObjectStore) -> Result<BTreeMap<Vec<u8>, Object>> {
        Ok(self
            .name_tree(store, DESTS)?
            .iter()
            .map(|(k, v)| (k.to_vec(), v.clone()))
            .collect())
    }

    /// Write every modified name tree into `/Names`.
    pub fn build_modified_name_trees(&mut self, store: &mut dyn ObjectStore) -> Result<()> {
        let modified: Vec<String> = self
            .name_trees
            .iter()
            .filter(|(_, tree)| tree.is_modified())
            .map(|(k, _)| k.clone())
            .collect();
        for key in modified {
            let root = match self.name_trees.get(&key) {
                Some(tree) => tree.build(store)?,
                None => continue,
            };
            self.with_names_dict(store, |names| match root {
                Some(root) => {
                    names.insert(key.clone(), Object::Reference(root));
                },
                None => {
                    names.shift_remove(&key);
                },
            })?;
            if key == DESTS {
                self.remove(store, "Dests")?;
            }
            if let Some(tree) = self.name_trees.get_mut(&key) {
                tree.set_modified(false);
            }
        }
        Ok(())
    }

    fn with_names_dict(&self, store: &mut dyn ObjectStore, edit: impl FnOnce(&mut Dictionary)) -> Result<()> {
        let current = self.dict(store)?.get("Names").cloned();
        match current {
            Some(Object::Reference(r)) if !store.is_flushed(r) => edit(store.dict_mut(r)?),
            Some(Object::Dictionary(mut names)) => {
                edit(&mut names);
                self.put(store, "Names", Object::Dictionary(names))?;
            },
            _ => {
                let mut names = Dictionary::new();
                edit(&mut names);
                self.put(store, "Names", Object::Dictionary(names))?;
            },
        }
        Ok(())
    }

    /// Catalog has `/Outlines`.
    pub fn has_outlines(&self, store: &mut dyn ObjectStore) -> Result<bool> {
        Ok(self.dict(store)?.contains_key("Outlines"))
    }

    /// Outline tree. It is loaded on first call; `update` reloads it from the catalog.
    pub fn outlines(&mut self, store: &mut dyn ObjectStore, update: bool) -> Result<&mut OutlineTree> {
        if self.outlines.is_none() || update {
            let tree = match self.dict(store)?.get("Outlines").and_then(Object::as_reference) {
                Some(root) => OutlineTree::load(store, root)?,
                None => OutlineTree::new(),
            };
            self.outlines = Some(tree);
        }
        match self.outlines.as_mut() {
            Some(tree) => Ok(tree),
            None => Err(Error::InvalidArgument("outlines are not loaded".into())),
        }
    }

    /// Outlines were loaded through [`Catalog::outlines`].
    pub fn is_outline_mode(&self) -> bool {
        self.outlines.is_some()
    }

    /// Drop outline items pointing at `page`.
    pub fn remove_outlines_for_page(&mut self, store: &mut dyn ObjectStore, page: ObjectRef) -> Result<()> {
        if !self.is_outline_mode() && !self.has_outlines(store)? {
            return Ok(());
        }
        let named = self.named_destinations(store)?;
        let resolver = |name: &[u8]| named.get(name).cloned();
        let removed = self.outlines(store, false)?.remove_for_page(page, &resolver);
        if removed > 0 {
            log::debug!("Removed {} outline items pointing at {}", removed, page);
        }
        Ok(())
    }

    /// Write the outline tree into `/Outlines` when it was loaded and, in
    /// append mode, changed.
    pub fn build_outlines(&mut self, store: &mut dyn ObjectStore) -> Result<()> {
        let Some(tree) = self.outlines.as_ref() else {
            return Ok(());
        };
        if store.is_append_mode() && !tree.is_modified() {
            return Ok(());
        }
        match tree.build(store)? {
            Some(root) => self.put(store, "Outlines", Object::Reference(root))?,
            None => {
                self.remove(store, "Outlines")?;
            },
        }
        Ok(())
    }

    /// `/OCProperties` as an indirect dictionary, hoisting a direct one.
    /// With `create`, an empty one is added when missing.
    pub fn oc_properties(&mut self, store: &mut dyn ObjectStore, create: bool) -> Result<Option<ObjectRef>> {
        match self.dict(store)?.get("OCProperties").cloned() {
            Some(Object::Reference(r)) => Ok(Some(r)),
            Some(Object::Dictionary(props)) => {
                let r = store.add(Object::Dictionary(props));
                self.put(store, "OCProperties", Object::Reference(r))?;
                Ok(Some(r))
            },
            _ if create => {
                let r = store.add(Object::dict([
                    ("OCGs", Object::Array(Vec::new())),
                    ("D", Object::Dictionary(Dictionary::new())),
                ]));
                self.put(store, "OCProperties", Object::Reference(r))?;
                self.ocg_modified = true;
                Ok(Some(r))
            },
            _ => Ok(None),
        }
    }

    /// Record that optional content groups were added.
    pub fn set_oc_properties_modified(&mut self) {
        self.ocg_modified = true;
    }

    /// Flush `/OCProperties`: always in a full rewrite, in append mode only
    /// when changed.
    pub fn flush_oc_properties(&mut self, store: &mut dyn ObjectStore) -> Result<()> {
        let props = self.dict(store)?.get("OCProperties").and_then(Object::as_reference);
        if let Some(r) = props {
            if !store.is_append_mode() || self.ocg_modified || store.is_modified(r) {
                store.flush(r)?;
            }
        }
        Ok(())
    }

    /// Catalog has an interactive form.
    pub fn has_acro_form(&self, store: &mut dyn ObjectStore) -> Result<bool> {
        Ok(self.dict(store)?.contains_key("AcroForm"))
    }

    /// Detach the widget annotations of `page` from the form field hierarchy.
    pub fn release_page_widgets(&mut self, store: &mut dyn ObjectStore, page: ObjectRef) -> Result<()> {
        let Some(acro_form) = self.dict(store)?.get("AcroForm").cloned() else {
            return Ok(());
        };
        let page_dict = store.dict(page)?;
        for annot in annotation_refs(&page_dict) {
            let Ok(widget) = store.dict(annot) else {
                continue;
            };
            if widget.get("Subtype").and_then(Object::as_name) != Some("Widget") {
                continue;
            }
            let target = Object::Reference(annot);
            match widget.get("Parent").and_then(Object::as_reference) {
                Some(parent) if !store.is_flushed(parent) => {
                    if let Some(kids) = store.dict_mut(parent)?.get_mut("Kids").and_then(Object::as_array_mut) {
                        kids.retain(|k| *k != target);
                    }
                },
                Some(parent) => log::warn!("Widget parent {} is flushed; widget {} kept", parent, annot),
                None => match &acro_form {
                    Object::Reference(form) if !store.is_flushed(*form) => {
                        if let Some(fields) = store.dict_mut(*form)?.get_mut("Fields").and_then(Object::as_array_mut) {
                            fields.retain(|f| *f != target);
                        }
                    },
                    Object::Dictionary(form) => {
                        let mut form = form.clone();
                        if let Some(fields) = form.get_mut("Fields").and_then(Object::as_array_mut) {
                            fields.retain(|f| *f != target);
                        }
                        self.put(store, "AcroForm", Object::Dictionary(form))?;
                    },
                    _ => log::warn!("AcroForm is not editable; widget {} kept in /Fields", annot),
                },
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::NoopConformanceChecker;
    use crate::filters::StandardCodec;
    use crate::store::DocumentStore;
    use std::sync::Arc;

    fn setup() -> (DocumentStore<std::io::Sink>, Catalog) {
        let mut store = DocumentStore::new(
            1,
            None,
            None,
            Arc::new(StandardCodec::default()),
            Arc::new(NoopConformanceChecker),
        );
        let pages = store.add(Object::dict([("Type", Object::name("Pages"))]));
        let catalog = store.add(Object::dict([
            ("Type", Object::name("Catalog")),
            ("Pages", Object::Reference(pages)),
        ]));
        (store, Catalog::new(catalog, PageTree::empty(pages)))
    }

    #[test]
    fn test_named_destination_shapes() {
        let (mut store, mut catalog) = setup();
        let page = ObjectRef::new(9, 0);
        catalog
            .add_named_destination(&mut store, "intro", Object::Array(vec![Object::Reference(page)]))
            .unwrap();
        catalog
            .add_named_destination(&mut store, "remote", Object::Array(vec![Object::Integer(0)]))
            .unwrap();
        let err = catalog
            .add_named_destination(&mut store, "bad", Object::Integer(3))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(catalog.named_destinations(&mut store).unwrap().len(), 2);
    }

    #[test]
    fn test_modified_name_tree_lands_in_names() {
        let (mut store, mut catalog) = setup();
        catalog
            .add_named_destination(&mut store, "a", Object::Array(vec![Object::Null]))
            .unwrap();
        catalog.build_modified_name_trees(&mut store).unwrap();
        let names = catalog.entry(&mut store, "Names").unwrap().unwrap();
        let dests = names.get(DESTS).and_then(Object::as_reference).unwrap();
        let tree = NameTree::load(&mut store, &Object::Reference(dests)).unwrap();
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_legacy_dests_are_visible() {
        let (mut store, mut catalog) = setup();
        catalog
            .put(
                &mut store,
                "Dests",
                Object::dict([("old", Object::Array(vec![Object::Null]))]),
            )
            .unwrap();
        assert!(catalog.named_destination(&mut store, b"old").unwrap().is_some());
    }

    #[test]
    fn test_outline_mode_and_build() {
        let (mut store, mut catalog) = setup();
        assert!(!catalog.is_outline_mode());
        let outlines = catalog.outlines(&mut store, false).unwrap();
        outlines.add_outline(OutlineTree::ROOT, "Intro").unwrap();
        catalog.build_outlines(&mut store).unwrap();
        assert!(catalog.has_outlines(&mut store).unwrap());
    }

    #[test]
    fn test_release_widgets() {
        let (mut store, mut catalog) = setup();
        let widget = store.add(Object::dict([("Subtype", Object::name("Widget"))]));
        let form = store.add(Object::dict([(
            "Fields",
            Object::Array(vec![Object::Reference(widget)]),
        )]));
        catalog.put(&mut store, "AcroForm", Object::Reference(form)).unwrap();
        let page = store.add(Object::dict([(
            "Annots",
            Object::Array(vec![Object::Reference(widget)]),
        )]));
        assert!(catalog.has_acro_form(&mut store).unwrap());
        catalog.release_page_widgets(&mut store, page).unwrap();
        let fields = store.dict(form).unwrap();
        assert_eq!(fields.get("Fields").and_then(Object::as_array).map(Vec::len), Some(0));
    }

    #[test]
    fn test_direct_oc_properties_are_hoisted() {
        let (mut store, mut catalog) = setup();
        catalog
            .put(&mut store, "OCProperties", Object::dict([("OCGs", Object::Array(Vec::new()))]))
            .unwrap();
        let r = catalog.oc_properties(&mut store, false).unwrap().unwrap();
        assert_eq!(
            catalog.dict(&mut store).unwrap().get("OCProperties"),
            Some(&Object::Reference(r))
        );
    }
}
