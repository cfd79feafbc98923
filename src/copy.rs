//! Copying pages and their satellites between documents.
//!
//! [`ObjectCopier`] deep-copies object graphs from one store into another,
//! giving every copied indirect object a fresh number in the target and
//! remembering the mapping so shared objects are copied once. The page copy
//! pipeline built on it lives in [`crate::document::PdfDocument::copy_pages_to`];
//! this module holds the individual steps.

use crate::error::Result;
use crate::object::{Dictionary, Object, ObjectRef};
use crate::outline::{destination_page, OutlineId, OutlineTree};
use crate::page::annotation_refs;
use crate::page_tree::INHERITABLE_KEYS;
use crate::store::ObjectStore;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Page keys rebuilt by the target document instead of copied.
pub const PAGE_EXCLUDED_KEYS: [&str; 4] = ["Parent", "Annots", "StructParents", "B"];

/// Annotation keys that link back into the source structure.
const ANNOT_EXCLUDED_KEYS: [&str; 2] = ["P", "Parent"];

/// Link annotation keys remapped against the copied pages.
const LINK_EXCLUDED_KEYS: [&str; 4] = ["Dest", "A", "P", "Parent"];

/// Dictionary types never pulled in by following references.
const STRUCTURAL_TYPES: [&str; 4] = ["Page", "Pages", "Catalog", "StructTreeRoot"];

/// Extra per-page work run after a page has been copied.
pub trait PageExtraCopier {
    /// Called once per copied page with the source and target page objects.
    fn copy(
        &mut self,
        source_page: ObjectRef,
        target_page: ObjectRef,
        source: &mut dyn ObjectStore,
        target: &mut dyn ObjectStore,
    ) -> Result<()>;
}

/// Deep copier with a source-to-target reference map.
#[derive(Debug, Clone, Default)]
pub struct ObjectCopier {
    map: HashMap<ObjectRef, ObjectRef>,
}

impl ObjectCopier {
    /// Copier with an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `from` as already copied to `to`.
    pub fn seed(&mut self, from: ObjectRef, to: ObjectRef) {
        self.map.insert(from, to);
    }

    /// Target reference of a copied source object.
    pub fn mapped(&self, from: ObjectRef) -> Option<ObjectRef> {
        self.map.get(&from).copied()
    }

    /// All copied pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (ObjectRef, ObjectRef)> + '_ {
        self.map.iter().map(|(k, v)| (*k, *v))
    }

    /// Copy `value`, following references.
    ///
    /// A reference to a page, page tree node, catalog or structure root that
    /// was not seeded becomes null.
    pub fn copy(
        &mut self,
        source: &mut dyn ObjectStore,
        target: &mut dyn ObjectStore,
        value: &Object,
    ) -> Result<Object> {
        Ok(match value {
            Object::Reference(r) => {
                if let Some(mapped) = self.mapped(*r) {
                    return Ok(Object::Reference(mapped));
                }
                let object = match source.get(*r) {
                    Ok(object) => object.clone(),
                    Err(e) => {
                        log::warn!("Cannot copy {}: {}", r, e);
                        return Ok(Object::Null);
                    },
                };
                if let Some(kind) = object.dict_type().filter(|t| STRUCTURAL_TYPES.contains(t)) {
                    log::debug!("Reference {} to a {} outside the copied set dropped", r, kind);
                    return Ok(Object::Null);
                }
                let copy = target.add(Object::Null);
                self.map.insert(*r, copy);
                let copied = self.copy(source, target, &object)?;
                target.replace(copy, copied)?;
                Object::Reference(copy)
            },
            Object::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.copy(source, target, item)?);
                }
                Object::Array(out)
            },
            Object::Dictionary(dict) => Object::Dictionary(self.copy_dict(source, target, dict, &[])?),
            Object::Stream { dict, data } => Object::Stream {
                dict: self.copy_dict(source, target, dict, &[])?,
                data: data.clone(),
            },
            Object::MustBeIndirect(inner) => {
                Object::MustBeIndirect(Box::new(self.copy(source, target, inner)?))
            },
            direct => direct.clone(),
        })
    }

    /// Copy a dictionary without the `excluded` keys.
    pub fn copy_dict(
        &mut self,
        source: &mut dyn ObjectStore,
        target: &mut dyn ObjectStore,
        dict: &Dictionary,
        excluded: &[&str],
    ) -> Result<Dictionary> {
        let mut out = Dictionary::new();
        for (key, value) in dict {
            if excluded.contains(&key.as_str()) {
                continue;
            }
            out.insert(key.clone(), self.copy(source, target, value)?);
        }
        Ok(out)
    }
}

/// Copy one page into `target`. Non-link annotations are copied with it;
/// link annotations are returned for [`copy_link_annotation`].
///
/// Attributes the page inherits from its `/Pages` ancestors are copied onto
/// the new page, since it will hang under a different tree.
pub fn copy_page(
    copier: &mut ObjectCopier,
    source: &mut dyn ObjectStore,
    target: &mut dyn ObjectStore,
    page: ObjectRef,
) -> Result<(ObjectRef, Vec<ObjectRef>)> {
    let dict = source.dict(page)?;
    let copy = target.add(Object::Null);
    copier.seed(page, copy);
    let mut out = copier.copy_dict(source, target, &dict, &PAGE_EXCLUDED_KEYS)?;
    for (key, value) in inherited_attributes(source, &dict) {
        let copied = copier.copy(source, target, &value)?;
        out.insert(key, copied);
    }

    let mut links = Vec::new();
    let mut annots = Vec::new();
    for annot in annotation_refs(&dict) {
        let annot_dict = match source.dict(annot) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("Annotation {} of page {} skipped: {}", annot, page, e);
                continue;
            },
        };
        if annot_dict.get("Subtype").and_then(Object::as_name) == Some("Link") {
            links.push(annot);
            continue;
        }
        let mut copied = copier.copy_dict(source, target, &annot_dict, &ANNOT_EXCLUDED_KEYS)?;
        copied.insert("P".into(), Object::Reference(copy));
        let r = target.add(Object::Dictionary(copied));
        copier.seed(annot, r);
        annots.push(Object::Reference(r));
    }
    if !annots.is_empty() {
        out.insert("Annots".into(), Object::Array(annots));
    }
    target.replace(copy, Object::Dictionary(out))?;
    Ok((copy, links))
}

/// Inheritable attributes `page` lacks, taken from the nearest ancestor
/// that has them.
fn inherited_attributes(source: &mut dyn ObjectStore, page: &Dictionary) -> Vec<(String, Object)> {
    let mut found: Vec<(String, Object)> = Vec::new();
    let mut seen = HashSet::new();
    let mut parent = page.get("Parent").and_then(Object::as_reference);
    while let Some(node) = parent {
        if !seen.insert(node) {
            log::warn!("Page tree loop at {}", node);
            break;
        }
        let dict = match source.dict(node) {
            Ok(dict) => dict,
            Err(e) => {
                log::warn!("Page tree node {} unreadable: {}", node, e);
                break;
            },
        };
        for key in INHERITABLE_KEYS {
            if page.contains_key(key) || found.iter().any(|(k, _)| k == key) {
                continue;
            }
            if let Some(value) = dict.get(key) {
                found.push((key.to_string(), value.clone()));
            }
        }
        parent = dict.get("Parent").and_then(Object::as_reference);
    }
    found
}

/// Rewrite an explicit destination onto the copied pages. `None` when the
/// destination page was not copied.
pub fn remap_explicit_destination(
    dest: &Object,
    pages: &HashMap<ObjectRef, ObjectRef>,
) -> Option<Object> {
    let items = dest.as_array()?;
    let page = items.first()?.as_reference()?;
    let mapped = pages.get(&page)?;
    let mut out = Vec::with_capacity(items.len());
    out.push(Object::Reference(*mapped));
    out.extend(items[1..].iter().cloned());
    Some(Object::Array(out))
}

/// What a remapped link points at.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkDestination {
    /// `/Dest` or `/A /D` rewritten in place
    Explicit(Object),
    /// A named destination that must be registered in the target as `Object`
    Named(Vec<u8>, Object),
    /// Not a go-to link; copied as is
    Other,
}

fn classify(
    dest: &Object,
    pages: &HashMap<ObjectRef, ObjectRef>,
    named: &BTreeMap<Vec<u8>, Object>,
) -> Option<LinkDestination> {
    let name = match dest {
        Object::Name(n) => Some(n.as_bytes().to_vec()),
        Object::String(s) => Some(s.clone()),
        _ => None,
    };
    match name {
        Some(name) => {
            let value = named.get(&name)?;
            let explicit = match value {
                Object::Dictionary(d) => d.get("D")?.clone(),
                other => other.clone(),
            };
            let remapped = remap_explicit_destination(&explicit, pages)?;
            Some(LinkDestination::Named(name, remapped))
        },
        None => remap_explicit_destination(dest, pages).map(LinkDestination::Explicit),
    }
}

/// Copy a link annotation onto `target_page`.
///
/// Returns the new annotation and any named destination the target must
/// define, or `None` when the link points at a page outside the copied set.
pub fn copy_link_annotation(
    copier: &mut ObjectCopier,
    source: &mut dyn ObjectStore,
    target: &mut dyn ObjectStore,
    annot: ObjectRef,
    target_page: ObjectRef,
    pages: &HashMap<ObjectRef, ObjectRef>,
    named: &BTreeMap<Vec<u8>, Object>,
) -> Result<Option<(ObjectRef, Option<(Vec<u8>, Object)>)>> {
    let dict = source.dict(annot)?;
    let mut out = copier.copy_dict(source, target, &dict, &LINK_EXCLUDED_KEYS)?;
    let mut new_name = None;

    if let Some(dest) = dict.get("Dest") {
        match classify(dest, pages, named) {
            Some(LinkDestination::Explicit(d)) => {
                out.insert("Dest".into(), d);
            },
            Some(LinkDestination::Named(name, d)) => {
                out.insert("Dest".into(), dest.clone());
                new_name = Some((name, d));
            },
            _ => return Ok(None),
        }
    } else if let Some(action) = dict.get("A") {
        let action = source.resolve(action)?;
        let is_goto = action.get("S").and_then(Object::as_name) == Some("GoTo");
        match action.get("D") {
            Some(d) if is_goto => {
                let mut copied = match &action {
                    Object::Dictionary(a) => copier.copy_dict(source, target, a, &["D"])?,
                    _ => Dictionary::new(),
                };
                match classify(d, pages, named) {
                    Some(LinkDestination::Explicit(remapped)) => {
                        copied.insert("D".into(), remapped);
                    },
                    Some(LinkDestination::Named(name, remapped)) => {
                        copied.insert("D".into(), d.clone());
                        new_name = Some((name, remapped));
                    },
                    _ => return Ok(None),
                }
                out.insert("A".into(), Object::Dictionary(copied));
            },
            _ => {
                out.insert("A".into(), copier.copy(source, target, &action)?);
            },
        }
    }
    out.insert("P".into(), Object::Reference(target_page));
    let r = target.add(Object::Dictionary(out));
    copier.seed(annot, r);
    Ok(Some((r, new_name)))
}

/// Register the optional content groups reached while copying in the
/// target's `/OCProperties` (`target_props`), carrying their default
/// visibility from the source configuration.
pub fn copy_oc_properties(
    copier: &ObjectCopier,
    source: &mut dyn ObjectStore,
    source_props: &Object,
    target: &mut dyn ObjectStore,
    target_props: ObjectRef,
) -> Result<usize> {
    let source_props = source.resolve(source_props)?;
    let source_config = match source_props.get("D") {
        Some(d) => source.resolve(d)?,
        None => Object::Null,
    };
    let listed = |key: &str, r: ObjectRef| {
        source_config
            .get(key)
            .and_then(Object::as_array)
            .is_some_and(|items| items.contains(&Object::Reference(r)))
    };

    let mut groups = Vec::new();
    for (from, to) in copier.pairs() {
        let is_group = source.get(from).map(|o| o.dict_type() == Some("OCG")).unwrap_or(false);
        if is_group {
            groups.push((from, to));
        }
    }
    groups.sort_by_key(|(_, to)| *to);

    let props = target.dict_mut(target_props)?;
    let mut added = 0;
    for (from, to) in &groups {
        let ocgs = props
            .entry("OCGs".to_string())
            .or_insert_with(|| Object::Array(Vec::new()));
        if let Some(ocgs) = ocgs.as_array_mut() {
            if ocgs.contains(&Object::Reference(*to)) {
                continue;
            }
            ocgs.push(Object::Reference(*to));
            added += 1;
        }
        let config = props
            .entry("D".to_string())
            .or_insert_with(|| Object::Dictionary(Dictionary::new()));
        if let Some(config) = config.as_dict_mut() {
            for key in ["OFF", "ON", "Locked", "Order"] {
                let in_source = if key == "Order" {
                    order_contains(&source_config, *from)
                } else {
                    listed(key, *from)
                };
                if in_source {
                    let list = config
                        .entry(key.to_string())
                        .or_insert_with(|| Object::Array(Vec::new()));
                    if let Some(list) = list.as_array_mut() {
                        list.push(Object::Reference(*to));
                    }
                }
            }
        }
    }
    Ok(added)
}

fn order_contains(config: &Object, group: ObjectRef) -> bool {
    fn walk(items: &[Object], group: ObjectRef) -> bool {
        items.iter().any(|item| match item {
            Object::Reference(r) => *r == group,
            Object::Array(nested) => walk(nested, group),
            _ => false,
        })
    }
    config
        .get("Order")
        .and_then(Object::as_array)
        .is_some_and(|items| walk(items, group))
}

/// Copy the outline items pointing at copied pages, with every ancestor
/// they need, into `target_tree`. Returns the number of items created.
pub fn copy_outlines(
    source_tree: &OutlineTree,
    target_tree: &mut OutlineTree,
    pages: &HashMap<ObjectRef, ObjectRef>,
    named: &BTreeMap<Vec<u8>, Object>,
) -> Result<usize> {
    let resolver = |name: &[u8]| named.get(name).cloned();
    let mut wanted = BTreeSet::new();
    for id in source_tree.iter() {
        let page = source_tree.destination_page(id, &resolver);
        if page.is_some_and(|p| pages.contains_key(&p)) {
            let mut current = Some(id);
            while let Some(c) = current.filter(|c| *c != OutlineTree::ROOT) {
                if !wanted.insert(c) {
                    break;
                }
                current = source_tree.node(c).and_then(|n| n.parent());
            }
        }
    }

    let mut mapping: HashMap<OutlineId, OutlineId> = HashMap::from([(OutlineTree::ROOT, OutlineTree::ROOT)]);
    let mut created = 0;
    for id in source_tree.iter() {
        if !wanted.contains(&id) {
            continue;
        }
        let Some(node) = source_tree.node(id) else {
            continue;
        };
        let parent = node
            .parent()
            .and_then(|p| mapping.get(&p).copied())
            .unwrap_or(OutlineTree::ROOT);
        let copy = target_tree.add_outline(parent, node.title.clone())?;
        mapping.insert(id, copy);
        created += 1;

        let dest = source_tree
            .destination_page(id, &resolver)
            .and_then(|p| pages.get(&p).copied());
        if let (Some(page), Some(target_node)) = (dest, target_tree.node_mut(copy)) {
            let mut explicit = match (&node.dest, &node.action) {
                (Some(d), _) => explicit_form(d, named),
                (None, Some(a)) => a.get("D").and_then(|d| explicit_form(d, named)),
                _ => None,
            }
            .unwrap_or_else(|| vec![Object::Null, Object::name("Fit")]);
            if explicit.is_empty() {
                explicit.push(Object::Null);
            }
            explicit[0] = Object::Reference(page);
            target_node.dest = Some(Object::Array(explicit));
            target_node.open = node.open;
        }
    }
    Ok(created)
}

fn explicit_form(dest: &Object, named: &BTreeMap<Vec<u8>, Object>) -> Option<Vec<Object>> {
    match dest {
        Object::Array(items) => Some(items.clone()),
        Object::Name(n) => named.get(n.as_bytes()).and_then(|v| explicit_form(v, &BTreeMap::new())),
        Object::String(s) => named.get(s).and_then(|v| explicit_form(v, &BTreeMap::new())),
        Object::Dictionary(d) => d.get("D").and_then(|v| explicit_form(v, named)),
        _ => None,
    }
}

/// Destination page of an outline item's dest value, for callers holding raw objects.
pub fn dest_page(dest: &Object, named: &BTreeMap<Vec<u8>, Object>) -> Option<ObjectRef> {
    destination_page(dest, &|name: &[u8]| named.get(name).cloned())
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

    #[test]
    fn test_shared_objects_copied_once() {
        let mut source = store();
        let mut target = store();
        let font = source.add(Object::dict([("Type", Object::name("Font"))]));
        let value = Object::Array(vec![Object::Reference(font), Object::Reference(font)]);
        let mut copier = ObjectCopier::new();
        let copied = copier.copy(&mut source, &mut target, &value).unwrap();
        let items = copied.as_array().unwrap();
        assert_eq!(items[0], items[1]);
        let mapped = copier.mapped(font).unwrap();
        assert_eq!(target.dict(mapped).unwrap().get("Type"), Some(&Object::name("Font")));
    }

    #[test]
    fn test_unseeded_pages_become_null() {
        let mut source = store();
        let mut target = store();
        let page = source.add(Object::dict([("Type", Object::name("Page"))]));
        let mut copier = ObjectCopier::new();
        let copied = copier
            .copy(&mut source, &mut target, &Object::Reference(page))
            .unwrap();
        assert_eq!(copied, Object::Null);
    }

    #[test]
    fn test_copy_page_splits_links() {
        let mut source = store();
        let mut target = store();
        let link = source.add(Object::dict([("Subtype", Object::name("Link"))]));
        let note = source.add(Object::dict([("Subtype", Object::name("Text"))]));
        let page = source.add(Object::dict([
            ("Type", Object::name("Page")),
            ("Annots", Object::Array(vec![Object::Reference(link), Object::Reference(note)])),
            ("StructParents", Object::Integer(3)),
        ]));
        let mut copier = ObjectCopier::new();
        let (copy, links) = copy_page(&mut copier, &mut source, &mut target, page).unwrap();
        assert_ne!(copy, page);
        assert_eq!(links, vec![link]);
        let dict = target.dict(copy).unwrap();
        assert!(!dict.contains_key("StructParents"));
        let annots = dict.get("Annots").and_then(Object::as_array).unwrap();
        assert_eq!(annots.len(), 1);
        let copied_note = annots[0].as_reference().unwrap();
        assert_eq!(target.dict(copied_note).unwrap().get("P"), Some(&Object::Reference(copy)));
    }

    #[test]
    fn test_link_to_uncopied_page_is_dropped() {
        let mut source = store();
        let mut target = store();
        let kept = ObjectRef::new(100, 0);
        let gone = ObjectRef::new(101, 0);
        let pages = HashMap::from([(kept, ObjectRef::new(5, 0))]);
        let named = BTreeMap::from([(b"there".to_vec(), Object::Array(vec![Object::Reference(kept)]))]);

        let dropped = source.add(Object::dict([
            ("Subtype", Object::name("Link")),
            ("Dest", Object::Array(vec![Object::Reference(gone)])),
        ]));
        let named_link = source.add(Object::dict([
            ("Subtype", Object::name("Link")),
            ("A", Object::dict([("S", Object::name("GoTo")), ("D", Object::string("there"))])),
        ]));
        let mut copier = ObjectCopier::new();
        let target_page = ObjectRef::new(6, 0);
        assert!(copy_link_annotation(&mut copier, &mut source, &mut target, dropped, target_page, &pages, &named)
            .unwrap()
            .is_none());
        let (_, new_name) =
            copy_link_annotation(&mut copier, &mut source, &mut target, named_link, target_page, &pages, &named)
                .unwrap()
                .unwrap();
        let (name, dest) = new_name.unwrap();
        assert_eq!(name, b"there".to_vec());
        assert_eq!(dest, Object::Array(vec![Object::Reference(ObjectRef::new(5, 0))]));
    }

    #[test]
    fn test_copy_outlines_with_ancestors() {
        let page = ObjectRef::new(1, 0);
        let other = ObjectRef::new(2, 0);
        let mut source = OutlineTree::new();
        let chapter = source.add_outline(OutlineTree::ROOT, "Chapter").unwrap();
        source.node_mut(chapter).unwrap().dest = Some(Object::Array(vec![Object::Reference(other)]));
        let section = source.add_outline(chapter, "Section").unwrap();
        source.node_mut(section).unwrap().dest = Some(Object::Array(vec![Object::Reference(page)]));
        source.add_outline(OutlineTree::ROOT, "Unrelated").unwrap();

        let copied_page = ObjectRef::new(9, 0);
        let pages = HashMap::from([(page, copied_page)]);
        let mut target = OutlineTree::new();
        let created = copy_outlines(&source, &mut target, &pages, &BTreeMap::new()).unwrap();
        assert_eq!(created, 2);
        let top = target.top_level()[0];
        assert_eq!(target.node(top).unwrap().title, "Chapter");
        assert!(target.node(top).unwrap().dest.is_none());
        let child = target.node(top).unwrap().children()[0];
        assert_eq!(
            target.node(child).unwrap().dest,
            Some(Object::Array(vec![Object::Reference(copied_page)]))
        );
    }

    #[test]
    fn test_oc_properties() {
        let mut source = store();
        let mut target = store();
        let ocg = source.add(Object::dict([("Type", Object::name("OCG"))]));
        let props = Object::dict([
            ("OCGs", Object::Array(vec![Object::Reference(ocg)])),
            ("D", Object::dict([("OFF", Object::Array(vec![Object::Reference(ocg)]))])),
        ]);
        let mut copier = ObjectCopier::new();
        copier.copy(&mut source, &mut target, &Object::Reference(ocg)).unwrap();
        let target_props = target.add(Object::Dictionary(Dictionary::new()));
        let added = copy_oc_properties(&copier, &mut source, &props, &mut target, target_props).unwrap();
        assert_eq!(added, 1);
        let mapped = copier.mapped(ocg).unwrap();
        let dict = target.dict(target_props).unwrap();
        let off = dict.get("D").and_then(|d| d.get("OFF")).and_then(Object::as_array).unwrap();
        assert_eq!(off, &vec![Object::Reference(mapped)]);
    }
}
