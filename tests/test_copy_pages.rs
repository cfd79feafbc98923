//! Integration tests for copying pages between documents.

use pdf_graph::copy::PageExtraCopier;
use pdf_graph::outline::OutlineTree;
use pdf_graph::{Error, Object, ObjectRef, ObjectStore, PageSize, PdfDocument, PdfReader, PdfWriter};

type MemoryDocument = PdfDocument<Vec<u8>>;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn new_doc() -> MemoryDocument {
    PdfDocument::new(PdfWriter::with_defaults(Vec::new())).unwrap()
}

fn catalog_entry<W: std::io::Write>(doc: &mut PdfDocument<W>, key: &str) -> Option<Object> {
    let catalog = doc.catalog().obj();
    doc.object(catalog).unwrap().get(key).cloned()
}

/// Three page source, read back from bytes so its outlines and name tree
/// are in the catalog:
/// - pages are 1, 2 and 3 points wide
/// - pages 1 and 3 share a font; page 1 uses an optional content group
/// - page 1 links to page 2 explicitly, page 2 links to `chap3` by name
/// - outline items "Intro" -> page 1 and "End" -> page 3
fn source_document() -> PdfDocument {
    let mut doc = new_doc();
    let p: Vec<_> = (1..=3)
        .map(|i| doc.add_new_page(PageSize::new(i as f64, 100.0)).unwrap())
        .collect();

    let font = doc
        .add_object(Object::dict([
            ("Type", Object::name("Font")),
            ("Subtype", Object::name("Type1")),
            ("BaseFont", Object::name("Helvetica")),
        ]))
        .unwrap();
    let ocg = doc
        .add_object(Object::dict([
            ("Type", Object::name("OCG")),
            ("Name", Object::string("Layer")),
        ]))
        .unwrap();
    for (index, page) in [(0, p[0]), (2, p[2])] {
        let mut resources = Object::dict([(
            "Font",
            Object::dict([("F1", Object::Reference(font))]),
        )]);
        if index == 0 {
            if let Some(dict) = resources.as_dict_mut() {
                dict.insert("Properties".into(), Object::dict([("oc1", Object::Reference(ocg))]));
            }
        }
        doc.page_dict_mut(page).unwrap().insert("Resources".into(), resources);
    }
    let catalog = doc.catalog().obj();
    doc.object_mut(catalog).unwrap().as_dict_mut().unwrap().insert(
        "OCProperties".into(),
        Object::dict([
            ("OCGs", Object::Array(vec![Object::Reference(ocg)])),
            (
                "D",
                Object::dict([
                    ("OFF", Object::Array(vec![Object::Reference(ocg)])),
                    ("Order", Object::Array(vec![Object::Reference(ocg)])),
                ]),
            ),
        ]),
    );

    let explicit = doc
        .add_object(Object::dict([
            ("Type", Object::name("Annot")),
            ("Subtype", Object::name("Link")),
            ("Rect", Object::rect(0.0, 0.0, 1.0, 1.0)),
            ("Dest", Object::Array(vec![Object::Reference(p[1].obj()), Object::name("Fit")])),
        ]))
        .unwrap();
    let named = doc
        .add_object(Object::dict([
            ("Type", Object::name("Annot")),
            ("Subtype", Object::name("Link")),
            ("Rect", Object::rect(0.0, 0.0, 1.0, 1.0)),
            ("Dest", Object::name("chap3")),
        ]))
        .unwrap();
    doc.page_dict_mut(p[0])
        .unwrap()
        .insert("Annots".into(), Object::Array(vec![Object::Reference(explicit)]));
    doc.page_dict_mut(p[1])
        .unwrap()
        .insert("Annots".into(), Object::Array(vec![Object::Reference(named)]));
    doc.add_named_destination(
        "chap3",
        Object::Array(vec![Object::Reference(p[2].obj()), Object::name("Fit")]),
    )
    .unwrap();

    let outlines = doc.get_outlines(false).unwrap();
    for (title, page) in [("Intro", p[0]), ("End", p[2])] {
        let item = outlines.add_outline(OutlineTree::ROOT, title).unwrap();
        outlines.node_mut(item).unwrap().dest =
            Some(Object::Array(vec![Object::Reference(page.obj()), Object::name("Fit")]));
    }

    let bytes = doc.finish().unwrap().unwrap();
    PdfDocument::open(PdfReader::new(bytes).unwrap()).unwrap()
}

fn widths<W: std::io::Write>(doc: &mut PdfDocument<W>) -> Vec<f64> {
    let count = doc.number_of_pages().unwrap();
    (1..=count)
        .map(|n| {
            let page = doc.get_page(n).unwrap();
            let dict = doc.page_dict(page).unwrap();
            PageSize::from_rect(dict.get("MediaBox").unwrap()).unwrap().width
        })
        .collect()
}

fn annots<W: std::io::Write>(doc: &mut PdfDocument<W>, number: usize) -> Vec<ObjectRef> {
    let page = doc.get_page(number).unwrap();
    doc.page_dict(page)
        .unwrap()
        .get("Annots")
        .and_then(Object::as_array)
        .map(|items| items.iter().filter_map(Object::as_reference).collect())
        .unwrap_or_default()
}

#[test]
fn test_copy_in_requested_order() {
    init_logging();
    let mut source = source_document();
    let mut target = new_doc();
    let copied = source.copy_pages_to(&[3, 1], &mut target, None, None).unwrap();

    assert_eq!(copied.len(), 2);
    assert!(copied.iter().all(|p| p.document_id() == target.document_id()));
    assert_eq!(widths(&mut target), vec![3.0, 1.0]);
    assert_eq!(widths(&mut source), vec![1.0, 2.0, 3.0]);
}

#[test]
fn test_copy_before_existing_page() {
    let mut source = source_document();
    let mut target = new_doc();
    target.add_new_page(PageSize::new(50.0, 50.0)).unwrap();
    source.copy_pages_to(&[2], &mut target, Some(1), None).unwrap();
    assert_eq!(widths(&mut target), vec![2.0, 50.0]);

    let result = source.copy_pages_to(&[1], &mut target, Some(4), None);
    assert!(matches!(result, Err(Error::PageIndexOutOfBounds { index: 4, count: 2 })));
}

#[test]
fn test_copy_range_to_end() {
    let mut source = source_document();
    let mut target = new_doc();
    let copied = source.copy_page_range_to(1, 3, &mut target).unwrap();
    assert_eq!(copied.len(), 3);
    assert_eq!(widths(&mut target), vec![1.0, 2.0, 3.0]);
}

#[test]
fn test_copies_are_independent() {
    let mut source = source_document();
    let mut target = new_doc();
    let copied = source.copy_pages_to(&[1], &mut target, None, None).unwrap();
    let original = source.get_page(1).unwrap();

    target
        .page_dict_mut(copied[0])
        .unwrap()
        .insert("MediaBox".into(), PageSize::A4.to_rect());
    assert_eq!(widths(&mut target), vec![595.0]);
    assert_eq!(widths(&mut source), vec![1.0, 2.0, 3.0]);

    // the copy hangs off the target's page tree, not the source's
    let copy_dict = target.page_dict(copied[0]).unwrap();
    assert!(copy_dict.get("StructParents").is_none());
    let parent = copy_dict.get("Parent").and_then(Object::as_reference);
    assert_eq!(parent, catalog_entry(&mut target, "Pages").and_then(|p| p.as_reference()));
    assert_ne!(copied[0].document_id(), original.document_id());
}

#[test]
fn test_shared_resources_are_copied_once() {
    let mut source = source_document();
    let mut target = new_doc();
    let copied = source.copy_pages_to(&[1, 3], &mut target, None, None).unwrap();

    let font_of = |doc: &mut MemoryDocument, page: pdf_graph::PdfPage| {
        let dict = doc.page_dict(page).unwrap();
        dict.get("Resources")
            .and_then(|r| r.get("Font"))
            .and_then(|f| f.get("F1"))
            .and_then(Object::as_reference)
            .unwrap()
    };
    let first = font_of(&mut target, copied[0]);
    let second = font_of(&mut target, copied[1]);
    assert_eq!(first, second);
    assert_eq!(target.object(first).unwrap().get("BaseFont"), Some(&Object::name("Helvetica")));
}

#[test]
fn test_links_follow_copied_pages() {
    let mut source = source_document();
    let mut target = new_doc();
    source.copy_pages_to(&[1, 2, 3], &mut target, None, None).unwrap();

    let second = target.get_page(2).unwrap().obj();
    let third = target.get_page(3).unwrap().obj();

    let link = annots(&mut target, 1)[0];
    let link_dict = target.object(link).unwrap().clone();
    let dest = link_dict.get("Dest").and_then(Object::as_array).unwrap();
    assert_eq!(dest[0], Object::Reference(second));
    assert_eq!(link_dict.get("P"), Some(&Object::Reference(target.get_page(1).unwrap().obj())));

    // the named link keeps its name; the target defines it
    let named_link = annots(&mut target, 2)[0];
    assert_eq!(target.object(named_link).unwrap().get("Dest"), Some(&Object::name("chap3")));
    let chap3 = target.named_destination(b"chap3").unwrap().unwrap();
    assert_eq!(chap3.as_array().unwrap()[0], Object::Reference(third));
}

#[test]
fn test_links_to_uncopied_pages_are_dropped() {
    let mut source = source_document();
    let mut target = new_doc();
    source.copy_pages_to(&[1], &mut target, None, None).unwrap();
    assert!(annots(&mut target, 1).is_empty());

    source.copy_pages_to(&[2], &mut target, None, None).unwrap();
    assert!(annots(&mut target, 2).is_empty());
    assert!(target.named_destination(b"chap3").unwrap().is_none());
}

#[test]
fn test_outlines_follow_copied_pages() {
    let mut source = source_document();
    let mut target = new_doc();
    source.copy_pages_to(&[3], &mut target, None, None).unwrap();
    let copied_page = target.get_page(1).unwrap().obj();

    let outlines = target.get_outlines(false).unwrap();
    assert_eq!(outlines.len(), 1);
    let item = outlines.node(outlines.top_level()[0]).unwrap();
    assert_eq!(item.title, "End");
    let dest = item.dest.as_ref().and_then(Object::as_array).unwrap();
    assert_eq!(dest[0], Object::Reference(copied_page));
}

#[test]
fn test_optional_content_is_registered() {
    let mut source = source_document();
    let mut target = new_doc();
    source.copy_pages_to(&[1], &mut target, None, None).unwrap();

    let props_ref = catalog_entry(&mut target, "OCProperties")
        .and_then(|p| p.as_reference())
        .unwrap();
    let props = target.object(props_ref).unwrap().clone();
    let groups = props.get("OCGs").and_then(Object::as_array).unwrap();
    assert_eq!(groups.len(), 1);
    let off = props.get("D").and_then(|d| d.get("OFF")).and_then(Object::as_array).unwrap();
    assert_eq!(off, groups);
}

#[test]
fn test_untagged_source_into_tagged_target() {
    let mut source = source_document();
    let mut target = new_doc();
    target.set_tagged().unwrap();
    let copied = source.copy_pages_to(&[1], &mut target, None, None).unwrap();
    assert_eq!(copied.len(), 1);
    assert!(target.is_tagged());
}

#[test]
fn test_extra_copier_runs_per_page() {
    struct Marker {
        calls: usize,
    }

    impl PageExtraCopier for Marker {
        fn copy(
            &mut self,
            _source_page: ObjectRef,
            target_page: ObjectRef,
            _source: &mut dyn ObjectStore,
            target: &mut dyn ObjectStore,
        ) -> pdf_graph::Result<()> {
            self.calls += 1;
            target.dict_mut(target_page)?.insert("Marked".into(), Object::Boolean(true));
            Ok(())
        }
    }

    let mut source = source_document();
    let mut target = new_doc();
    let mut marker = Marker { calls: 0 };
    let copied = source
        .copy_pages_to(&[1, 2], &mut target, None, Some(&mut marker))
        .unwrap();
    assert_eq!(marker.calls, 2);
    for page in copied {
        assert_eq!(target.page_dict(page).unwrap().get("Marked"), Some(&Object::Boolean(true)));
    }
}

#[test]
fn test_read_only_target_is_rejected() {
    let mut source = source_document();
    let mut read_only = source_document();
    let result = source.copy_pages_to(&[1], &mut read_only, None, None);
    assert!(matches!(result, Err(Error::NotInWriteMode)));
}

#[test]
fn test_copied_document_round_trips() {
    let mut source = source_document();
    let mut target = new_doc();
    source.copy_pages_to(&[2, 3], &mut target, None, None).unwrap();
    let bytes = target.finish().unwrap().unwrap();

    let mut reopened = PdfDocument::open(PdfReader::new(bytes).unwrap()).unwrap();
    assert_eq!(widths(&mut reopened), vec![2.0, 3.0]);
    let second = reopened.get_page(2).unwrap().obj();
    let link = annots(&mut reopened, 1)[0];
    assert_eq!(reopened.object(link).unwrap().get("Dest"), Some(&Object::name("chap3")));
    let chap3 = reopened.named_destination(b"chap3").unwrap().unwrap();
    assert_eq!(chap3.as_array().unwrap()[0], Object::Reference(second));
}

/// Source whose only page takes its media box and resources from the page
/// tree root and its rotation from an intermediate node.
fn nested_tree_source() -> Vec<u8> {
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>",
        "<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 200 300] \
         /Resources << /Font << /F1 5 0 R >> >> >>",
        "<< /Type /Pages /Parent 2 0 R /Kids [4 0 R] /Count 1 /Rotate 90 >>",
        "<< /Type /Page /Parent 3 0 R >>",
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>",
    ];
    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }
    let xref_at = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f\r\n", objects.len() + 1).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n\r\n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R /ID [<0a0b> <0a0b>] >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_at
        )
        .as_bytes(),
    );
    out
}

#[test]
fn test_inherited_attributes_are_copied() {
    init_logging();
    let mut source = PdfDocument::open(PdfReader::new(nested_tree_source()).unwrap()).unwrap();
    let mut target = new_doc();
    let copied = source.copy_pages_to(&[1], &mut target, None, None).unwrap();

    let page = target.page_dict(copied[0]).unwrap();
    let media_box = PageSize::from_rect(page.get("MediaBox").unwrap()).unwrap();
    assert_eq!((media_box.width, media_box.height), (200.0, 300.0));
    assert_eq!(page.get("Rotate").and_then(Object::as_integer), Some(90));
    let font = page
        .get("Resources")
        .and_then(Object::as_dict)
        .and_then(|resources| resources.get("Font"))
        .and_then(Object::as_dict)
        .and_then(|fonts| fonts.get("F1"))
        .and_then(Object::as_reference)
        .unwrap();
    assert_eq!(
        target.object(font).unwrap().get("BaseFont").and_then(Object::as_name),
        Some("Helvetica")
    );

    let bytes = target.finish().unwrap().unwrap();
    let mut reopened = PdfDocument::open(PdfReader::new(bytes).unwrap()).unwrap();
    let page = reopened.get_page(1).unwrap();
    let dict = reopened.page_dict(page).unwrap();
    assert_eq!(PageSize::from_rect(dict.get("MediaBox").unwrap()).unwrap().width, 200.0);
}
