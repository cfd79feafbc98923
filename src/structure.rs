//! Logical structure tree (tagged documents).
//!
//! Only what page-level operations need is modelled: detecting and enabling
//! tagging, allocating `/StructParents` keys, dropping or moving the tags of
//! one page, copying the tags of a page range into another document, and
//! normalizing the root so it holds a single `Document` element.
//!
//! Structure elements are dictionaries with `/S`; their `/K` holds marked
//! content ids, marked-content or object reference dictionaries, and child
//! elements. `/Pg` is inherited by kids that do not name a page.

use crate::copy::ObjectCopier;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::store::ObjectStore;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Handle on a document's `/StructTreeRoot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructTree {
    root: ObjectRef,
}

fn kids_of(dict: &Dictionary) -> Vec<Object> {
    match dict.get("K") {
        Some(Object::Array(items)) => items.clone(),
        Some(Object::Null) | None => Vec::new(),
        Some(single) => vec![single.clone()],
    }
}

fn is_element(dict: &Dictionary) -> bool {
    dict.get("S").and_then(Object::as_name).is_some()
        && !matches!(dict.get("Type").and_then(Object::as_name), Some("MCR" | "OBJR"))
}

fn page_of(dict: &Dictionary) -> Option<ObjectRef> {
    dict.get("Pg").and_then(Object::as_reference)
}

impl StructTree {
    /// Tree referenced by the catalog, if the document is tagged.
    pub fn from_catalog(store: &mut dyn ObjectStore, catalog: ObjectRef) -> Result<Option<Self>> {
        Ok(store
            .dict(catalog)?
            .get("StructTreeRoot")
            .and_then(Object::as_reference)
            .map(|root| Self { root }))
    }

    /// Make the document tagged: add `/StructTreeRoot` and `/MarkInfo`.
    /// Returns the existing tree when already tagged.
    pub fn create(store: &mut dyn ObjectStore, catalog: ObjectRef) -> Result<Self> {
        if let Some(tree) = Self::from_catalog(store, catalog)? {
            return Ok(tree);
        }
        let parent_tree = store.add(Object::dict([("Nums", Object::Array(Vec::new()))]));
        let root = store.add(Object::dict([
            ("Type", Object::name("StructTreeRoot")),
            ("K", Object::Array(Vec::new())),
            ("ParentTree", Object::Reference(parent_tree)),
            ("ParentTreeNextKey", Object::Integer(0)),
        ]));
        let dict = store.dict_mut(catalog)?;
        dict.insert("StructTreeRoot".into(), Object::Reference(root));
        dict.insert("MarkInfo".into(), Object::dict([("Marked", Object::Boolean(true))]));
        log::debug!("Created structure tree root {}", root);
        Ok(Self { root })
    }

    /// `/StructTreeRoot` reference.
    pub fn root(&self) -> ObjectRef {
        self.root
    }

    /// Allocate the next `/StructParents` key.
    pub fn next_struct_parent_index(&self, store: &mut dyn ObjectStore) -> Result<i64> {
        let dict = store.dict_mut(self.root)?;
        let next = dict
            .get("ParentTreeNextKey")
            .and_then(Object::as_integer)
            .unwrap_or(0);
        dict.insert("ParentTreeNextKey".into(), Object::Integer(next + 1));
        Ok(next)
    }

    /// The element kids are added to: the single `Document` element when
    /// the root has one, the root otherwise.
    fn container(&self, store: &mut dyn ObjectStore) -> Result<ObjectRef> {
        let kids = kids_of(&store.dict(self.root)?);
        if let [Object::Reference(only)] = kids.as_slice() {
            if store.dict(*only)?.get("S").and_then(Object::as_name) == Some("Document") {
                return Ok(*only);
            }
        }
        Ok(self.root)
    }

    /// Add an element with role `role` under `parent` (the top container when
    /// `None`). `page` and `mcids` describe the content it tags.
    pub fn add_element(
        &self,
        store: &mut dyn ObjectStore,
        parent: Option<ObjectRef>,
        role: &str,
        page: Option<ObjectRef>,
        mcids: &[i64],
    ) -> Result<ObjectRef> {
        let parent = match parent {
            Some(parent) => parent,
            None => self.container(store)?,
        };
        let mut dict = Dictionary::new();
        dict.insert("S".into(), Object::name(role));
        dict.insert("P".into(), Object::Reference(parent));
        if let Some(page) = page {
            dict.insert("Pg".into(), Object::Reference(page));
        }
        dict.insert(
            "K".into(),
            Object::Array(mcids.iter().map(|m| Object::Integer(*m)).collect()),
        );
        let element = store.add(Object::Dictionary(dict));
        push_kid(store, parent, Object::Reference(element))?;
        if let Some(page) = page {
            let by_mcid: BTreeMap<i64, ObjectRef> = mcids.iter().map(|m| (*m, element)).collect();
            self.register_parent_entries(store, page, &by_mcid)?;
        }
        Ok(element)
    }

    /// Pages whose content is tagged beneath `element`.
    fn element_pages(
        store: &mut dyn ObjectStore,
        element: ObjectRef,
        visited: &mut HashSet<ObjectRef>,
    ) -> Result<HashSet<ObjectRef>> {
        let mut pages = HashSet::new();
        if !visited.insert(element) {
            return Ok(pages);
        }
        let dict = store.dict(element)?;
        let pg = page_of(&dict);
        for kid in kids_of(&dict) {
            match kid {
                Object::Integer(_) => pages.extend(pg),
                Object::Dictionary(d) => pages.extend(page_of(&d).or(pg)),
                Object::Reference(r) => {
                    if store.dict(r).map(|d| is_element(&d)).unwrap_or(false) {
                        pages.extend(Self::element_pages(store, r, visited)?);
                    }
                },
                _ => {},
            }
        }
        Ok(pages)
    }

    /// Remove the tags of `page` and its parent tree entry.
    pub fn remove_page_tags(&self, store: &mut dyn ObjectStore, page: ObjectRef) -> Result<()> {
        let mut visited = HashSet::new();
        prune(store, self.root, None, page, &mut visited)?;

        let key = store.dict(page)?.get("StructParents").and_then(Object::as_integer);
        if let Some(key) = key {
            self.edit_parent_tree(store, |nums| {
                let mut i = 0;
                while i + 1 < nums.len() {
                    if nums[i].as_integer() == Some(key) {
                        nums.drain(i..i + 2);
                    } else {
                        i += 2;
                    }
                }
            })?;
        }
        Ok(())
    }

    /// Move the top-level elements tagging only `page` in front of the
    /// first one tagging `before` (to the end when `None`).
    pub fn move_page_tags(
        &self,
        store: &mut dyn ObjectStore,
        page: ObjectRef,
        before: Option<ObjectRef>,
    ) -> Result<()> {
        let container = self.container(store)?;
        let kids = kids_of(&store.dict(container)?);
        let mut moving = Vec::new();
        let mut staying = Vec::new();
        let mut page_sets = Vec::new();
        for kid in kids {
            let pages = match &kid {
                Object::Reference(r) => Self::element_pages(store, *r, &mut HashSet::new())?,
                _ => HashSet::new(),
            };
            if !pages.is_empty() && pages.iter().all(|p| *p == page) {
                moving.push(kid);
            } else {
                page_sets.push(pages);
                staying.push(kid);
            }
        }
        if moving.is_empty() {
            return Ok(());
        }
        let at = before
            .and_then(|b| page_sets.iter().position(|set| set.contains(&b)))
            .unwrap_or(staying.len());
        staying.splice(at..at, moving);
        store
            .dict_mut(container)?
            .insert("K".into(), Object::Array(staying));
        Ok(())
    }

    /// Wrap the root's kids into one `Document` element unless it already
    /// holds exactly that.
    pub fn normalize(&self, store: &mut dyn ObjectStore) -> Result<()> {
        let kids = kids_of(&store.dict(self.root)?);
        if kids.is_empty() || self.container(store)? != self.root {
            return Ok(());
        }
        let document = store.add(Object::dict([
            ("S", Object::name("Document")),
            ("P", Object::Reference(self.root)),
            ("K", Object::Array(kids.clone())),
        ]));
        for kid in &kids {
            if let Object::Reference(r) = kid {
                if store.is_flushed(*r) {
                    return Err(Error::TagStructureFlush(format!(
                        "element {} is flushed and cannot be re-parented",
                        r
                    )));
                }
                store.dict_mut(*r)?.insert("P".into(), Object::Reference(document));
            }
        }
        store
            .dict_mut(self.root)?
            .insert("K".into(), Object::Array(vec![Object::Reference(document)]));
        Ok(())
    }

    /// Flush every element, the parent tree and the root.
    pub fn flush(&self, store: &mut dyn ObjectStore) -> Result<()> {
        self.flush_all(store)
            .map_err(|e| Error::TagStructureFlush(e.to_string()))
    }

    fn flush_all(&self, store: &mut dyn ObjectStore) -> Result<()> {
        let root = store.dict(self.root)?;
        let mut stack: Vec<ObjectRef> = kids_of(&root).iter().filter_map(Object::as_reference).collect();
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        while let Some(r) = stack.pop() {
            if !visited.insert(r) || store.is_flushed(r) || store.is_free(r) {
                continue;
            }
            let dict = store.dict(r)?;
            if is_element(&dict) {
                stack.extend(kids_of(&dict).iter().filter_map(Object::as_reference));
            }
            order.push(r);
        }
        for r in order {
            store.flush(r)?;
        }
        if let Some(parent_tree) = root.get("ParentTree").and_then(Object::as_reference) {
            store.flush(parent_tree)?;
        }
        store.flush(self.root)
    }

    fn edit_parent_tree(&self, store: &mut dyn ObjectStore, edit: impl FnOnce(&mut Vec<Object>)) -> Result<()> {
        let parent_tree = store.dict(self.root)?.get("ParentTree").cloned();
        let nums = match parent_tree {
            Some(Object::Reference(r)) => store.dict_mut(r)?,
            Some(Object::Dictionary(_)) => store
                .dict_mut(self.root)?
                .get_mut("ParentTree")
                .and_then(Object::as_dict_mut)
                .ok_or_else(|| Error::wrong_type("Dictionary", "ParentTree"))?,
            _ => {
                let r = store.add(Object::dict([("Nums", Object::Array(Vec::new()))]));
                store
                    .dict_mut(self.root)?
                    .insert("ParentTree".into(), Object::Reference(r));
                store.dict_mut(r)?
            },
        };
        if nums.contains_key("Kids") {
            log::warn!("Parent tree has intermediate nodes; entries left unchanged");
            return Ok(());
        }
        let entry = nums
            .entry("Nums".to_string())
            .or_insert_with(|| Object::Array(Vec::new()));
        if let Some(items) = entry.as_array_mut() {
            edit(items);
        }
        Ok(())
    }

    /// Give `page` a `/StructParents` key mapping each marked content id to its element.
    fn register_parent_entries(
        &self,
        store: &mut dyn ObjectStore,
        page: ObjectRef,
        by_mcid: &BTreeMap<i64, ObjectRef>,
    ) -> Result<()> {
        if by_mcid.is_empty() {
            return Ok(());
        }
        let existing = store.dict(page)?.get("StructParents").and_then(Object::as_integer);
        let key = match existing {
            Some(key) => key,
            None => {
                let key = self.next_struct_parent_index(store)?;
                store
                    .dict_mut(page)?
                    .insert("StructParents".into(), Object::Integer(key));
                key
            },
        };
        let max = by_mcid.keys().max().copied().unwrap_or(0).max(0) as usize;
        let mut slots = vec![Object::Null; max + 1];
        for (mcid, element) in by_mcid {
            if *mcid >= 0 {
                slots[*mcid as usize] = Object::Reference(*element);
            }
        }
        self.edit_parent_tree(store, |nums| {
            let mut i = 0;
            while i + 1 < nums.len() {
                if nums[i].as_integer() == Some(key) {
                    if let Some(existing) = nums[i + 1].as_array_mut() {
                        for (idx, slot) in slots.iter().enumerate() {
                            if slot.is_null() {
                                continue;
                            }
                            if existing.len() <= idx {
                                existing.resize(idx + 1, Object::Null);
                            }
                            existing[idx] = slot.clone();
                        }
                        return;
                    }
                }
                i += 2;
            }
            let at = nums
                .chunks(2)
                .position(|pair| pair[0].as_integer().is_some_and(|k| k > key))
                .map_or(nums.len(), |p| p * 2);
            nums.splice(at..at, [Object::Integer(key), Object::Array(slots)]);
        })
    }

    /// Copy the tags of the pages in `pages` (source page to target page) into
    /// `target`. Copied top-level elements go in front of the first element
    /// tagging `insert_before`, or to the end.
    pub fn copy_range_to(
        &self,
        source: &mut dyn ObjectStore,
        target_tree: &StructTree,
        target: &mut dyn ObjectStore,
        pages: &HashMap<ObjectRef, ObjectRef>,
        insert_before: Option<ObjectRef>,
        copier: &mut ObjectCopier,
    ) -> Result<()> {
        let source_container = self.container(source)?;
        let target_container = target_tree.container(target)?;
        let mut copied_top = Vec::new();
        let mut by_page: HashMap<ObjectRef, BTreeMap<i64, ObjectRef>> = HashMap::new();
        let mut visited = HashSet::new();

        for kid in kids_of(&source.dict(source_container)?) {
            let Object::Reference(element) = kid else {
                continue;
            };
            let touched = Self::element_pages(source, element, &mut HashSet::new())?;
            if !touched.iter().any(|p| pages.contains_key(p)) {
                continue;
            }
            let mut ctx = CopyContext {
                pages,
                copier: &mut *copier,
                by_page: &mut by_page,
                visited: &mut visited,
            };
            if let Some(copy) = ctx.copy_element(source, target, element, target_container, None)? {
                copied_top.push(Object::Reference(copy));
            }
        }
        if copied_top.is_empty() {
            return Ok(());
        }

        let existing = kids_of(&target.dict(target_container)?);
        let at = match insert_before {
            Some(before) => {
                let mut found = None;
                for (i, kid) in existing.iter().enumerate() {
                    if let Object::Reference(r) = kid {
                        if Self::element_pages(target, *r, &mut HashSet::new())?.contains(&before) {
                            found = Some(i);
                            break;
                        }
                    }
                }
                found.unwrap_or(existing.len())
            },
            None => existing.len(),
        };
        let mut kids = existing;
        kids.splice(at..at, copied_top);
        target
            .dict_mut(target_container)?
            .insert("K".into(), Object::Array(kids));

        for (page, by_mcid) in by_page {
            target_tree.register_parent_entries(target, page, &by_mcid)?;
        }
        Ok(())
    }
}

struct CopyContext<'a> {
    pages: &'a HashMap<ObjectRef, ObjectRef>,
    copier: &'a mut ObjectCopier,
    by_page: &'a mut HashMap<ObjectRef, BTreeMap<i64, ObjectRef>>,
    visited: &'a mut HashSet<ObjectRef>,
}

impl CopyContext<'_> {
    /// Copy `element` under `parent`, keeping only content of copied pages.
    fn copy_element(
        &mut self,
        source: &mut dyn ObjectStore,
        target: &mut dyn ObjectStore,
        element: ObjectRef,
        parent: ObjectRef,
        inherited_pg: Option<ObjectRef>,
    ) -> Result<Option<ObjectRef>> {
        if !self.visited.insert(element) {
            return Ok(None);
        }
        let dict = source.dict(element)?;
        let source_pg = page_of(&dict).or(inherited_pg);
        let target_pg = source_pg.and_then(|p| self.pages.get(&p).copied());
        let copy = target.add(Object::Null);

        let mut kids = Vec::new();
        for kid in kids_of(&dict) {
            match kid {
                Object::Integer(mcid) => {
                    if let Some(pg) = target_pg {
                        self.by_page.entry(pg).or_default().insert(mcid, copy);
                        kids.push(Object::Integer(mcid));
                    }
                },
                Object::Dictionary(mcr) if mcr.get("Type").and_then(Object::as_name) == Some("MCR") => {
                    let pg = page_of(&mcr).or(source_pg).and_then(|p| self.pages.get(&p).copied());
                    let (Some(pg), Some(mcid)) = (pg, mcr.get("MCID").and_then(Object::as_integer)) else {
                        continue;
                    };
                    let mut out = Dictionary::new();
                    out.insert("Type".into(), Object::name("MCR"));
                    out.insert("Pg".into(), Object::Reference(pg));
                    out.insert("MCID".into(), Object::Integer(mcid));
                    if let Some(stm) = mcr.get("Stm") {
                        out.insert("Stm".into(), self.copier.copy(source, target, stm)?);
                    }
                    self.by_page.entry(pg).or_default().insert(mcid, copy);
                    kids.push(Object::Dictionary(out));
                },
                Object::Dictionary(objr) => {
                    log::debug!(
                        "Object reference {:?} in element {} not copied",
                        objr.get("Obj"),
                        element
                    );
                },
                Object::Reference(child) => {
                    let is_child_element = source.dict(child).map(|d| is_element(&d)).unwrap_or(false);
                    if !is_child_element {
                        continue;
                    }
                    let touched = StructTree::element_pages(source, child, &mut HashSet::new())?;
                    if !touched.iter().any(|p| self.pages.contains_key(p)) {
                        continue;
                    }
                    if let Some(c) = self.copy_element(source, target, child, copy, source_pg)? {
                        kids.push(Object::Reference(c));
                    }
                },
                _ => {},
            }
        }
        if kids.is_empty() && !dict.contains_key("Alt") {
            target.free(copy);
            return Ok(None);
        }

        let mut out = Dictionary::new();
        for (key, value) in &dict {
            match key.as_str() {
                "P" | "K" | "Pg" => {},
                _ => {
                    let value = self.copier.copy(source, target, value)?;
                    out.insert(key.clone(), value);
                },
            }
        }
        out.insert("P".into(), Object::Reference(parent));
        if let Some(pg) = target_pg {
            out.insert("Pg".into(), Object::Reference(pg));
        }
        out.insert("K".into(), Object::Array(kids));
        target.replace(copy, Object::Dictionary(out))?;
        Ok(Some(copy))
    }
}

fn push_kid(store: &mut dyn ObjectStore, parent: ObjectRef, kid: Object) -> Result<()> {
    let dict = store.dict_mut(parent)?;
    let mut kids = kids_of(dict);
    kids.push(kid);
    dict.insert("K".into(), Object::Array(kids));
    Ok(())
}

/// Drop content of `page` beneath `node`. Returns true when `node` is left
/// empty and should be removed from its parent.
fn prune(
    store: &mut dyn ObjectStore,
    node: ObjectRef,
    inherited_pg: Option<ObjectRef>,
    page: ObjectRef,
    visited: &mut HashSet<ObjectRef>,
) -> Result<bool> {
    if !visited.insert(node) || store.is_flushed(node) {
        return Ok(false);
    }
    let dict = store.dict(node)?;
    let pg = page_of(&dict).or(inherited_pg);
    let kids = kids_of(&dict);
    if kids.is_empty() {
        return Ok(false);
    }
    let mut kept = Vec::with_capacity(kids.len());
    for kid in &kids {
        let keep = match kid {
            Object::Integer(_) => pg != Some(page),
            Object::Dictionary(d) => page_of(d).or(pg) != Some(page),
            Object::Reference(r) => {
                let child_is_element = store.dict(*r).map(|d| is_element(&d)).unwrap_or(false);
                if child_is_element && prune(store, *r, pg, page, visited)? {
                    if !store.is_flushed(*r) {
                        store.free(*r);
                    }
                    false
                } else {
                    true
                }
            },
            _ => true,
        };
        if keep {
            kept.push(kid.clone());
        }
    }
    if kept.len() == kids.len() {
        return Ok(false);
    }
    let emptied = kept.is_empty();
    store.dict_mut(node)?.insert("K".into(), Object::Array(kept));
    Ok(emptied && is_element(&dict))
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

    fn tagged(store: &mut DocumentStore<std::io::Sink>) -> (ObjectRef, StructTree) {
        let catalog = store.add(Object::dict([("Type", Object::name("Catalog"))]));
        let tree = StructTree::create(store, catalog).unwrap();
        (catalog, tree)
    }

    #[test]
    fn test_create_marks_catalog() {
        let mut store = store();
        let (catalog, tree) = tagged(&mut store);
        let dict = store.dict(catalog).unwrap();
        assert_eq!(dict.get("StructTreeRoot"), Some(&Object::Reference(tree.root())));
        let marked = dict.get("MarkInfo").and_then(|m| m.get("Marked")).and_then(Object::as_bool);
        assert_eq!(marked, Some(true));
        assert_eq!(StructTree::create(&mut store, catalog).unwrap(), tree);
    }

    #[test]
    fn test_struct_parent_keys_increase() {
        let mut store = store();
        let (_, tree) = tagged(&mut store);
        assert_eq!(tree.next_struct_parent_index(&mut store).unwrap(), 0);
        assert_eq!(tree.next_struct_parent_index(&mut store).unwrap(), 1);
    }

    #[test]
    fn test_remove_page_tags() {
        let mut store = store();
        let (_, tree) = tagged(&mut store);
        let p1 = store.add(Object::dict([("Type", Object::name("Page"))]));
        let p2 = store.add(Object::dict([("Type", Object::name("Page"))]));
        let a = tree.add_element(&mut store, None, "P", Some(p1), &[0]).unwrap();
        let b = tree.add_element(&mut store, None, "P", Some(p2), &[0]).unwrap();
        tree.remove_page_tags(&mut store, p1).unwrap();

        let kids = kids_of(&store.dict(tree.root()).unwrap());
        assert_eq!(kids, vec![Object::Reference(b)]);
        assert!(store.is_free(a));
        let parent_tree = store.dict(tree.root()).unwrap().get("ParentTree").and_then(Object::as_reference).unwrap();
        let nums = store.dict(parent_tree).unwrap();
        assert_eq!(nums.get("Nums").and_then(Object::as_array).map(Vec::len), Some(2));
    }

    #[test]
    fn test_normalize_wraps_in_document() {
        let mut store = store();
        let (_, tree) = tagged(&mut store);
        let p = store.add(Object::dict([("Type", Object::name("Page"))]));
        let a = tree.add_element(&mut store, None, "H1", Some(p), &[0]).unwrap();
        tree.add_element(&mut store, None, "P", Some(p), &[1]).unwrap();
        tree.normalize(&mut store).unwrap();

        let kids = kids_of(&store.dict(tree.root()).unwrap());
        assert_eq!(kids.len(), 1);
        let document = kids[0].as_reference().unwrap();
        assert_eq!(store.dict(document).unwrap().get("S"), Some(&Object::name("Document")));
        assert_eq!(store.dict(a).unwrap().get("P"), Some(&Object::Reference(document)));
        tree.normalize(&mut store).unwrap();
        assert_eq!(kids_of(&store.dict(tree.root()).unwrap()).len(), 1);
    }

    #[test]
    fn test_move_page_tags() {
        let mut store = store();
        let (_, tree) = tagged(&mut store);
        let p1 = store.add(Object::dict([("Type", Object::name("Page"))]));
        let p2 = store.add(Object::dict([("Type", Object::name("Page"))]));
        let a = tree.add_element(&mut store, None, "P", Some(p1), &[0]).unwrap();
        let b = tree.add_element(&mut store, None, "P", Some(p2), &[0]).unwrap();
        tree.move_page_tags(&mut store, p1, None).unwrap();
        let kids = kids_of(&store.dict(tree.root()).unwrap());
        assert_eq!(kids, vec![Object::Reference(b), Object::Reference(a)]);
    }

    #[test]
    fn test_copy_range() {
        let mut source = store();
        let (_, src_tree) = tagged(&mut source);
        let sp1 = source.add(Object::dict([("Type", Object::name("Page"))]));
        let sp2 = source.add(Object::dict([("Type", Object::name("Page"))]));
        src_tree.add_element(&mut source, None, "H1", Some(sp1), &[0]).unwrap();
        src_tree.add_element(&mut source, None, "P", Some(sp2), &[0]).unwrap();

        let mut target = store();
        let (_, tgt_tree) = tagged(&mut target);
        let tp = target.add(Object::dict([("Type", Object::name("Page"))]));
        let map = HashMap::from([(sp2, tp)]);
        let mut copier = ObjectCopier::new();
        src_tree
            .copy_range_to(&mut source, &tgt_tree, &mut target, &map, None, &mut copier)
            .unwrap();

        let kids = kids_of(&target.dict(tgt_tree.root()).unwrap());
        assert_eq!(kids.len(), 1);
        let copy = target.dict(kids[0].as_reference().unwrap()).unwrap();
        assert_eq!(copy.get("S"), Some(&Object::name("P")));
        assert_eq!(copy.get("Pg"), Some(&Object::Reference(tp)));
        assert_eq!(
            target.dict(tp).unwrap().get("StructParents").and_then(Object::as_integer),
            Some(0)
        );
    }
}
