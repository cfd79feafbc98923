//! Integration tests for the document lifecycle: create, flush, close and reopen.

use pdf_graph::conformance::RequiredCatalogKeys;
use pdf_graph::crypto::EncryptionProperties;
use pdf_graph::doc_id::DocumentIdSource;
use pdf_graph::{
    DocumentProperties, Error, Object, PageSize, PdfDocument, PdfReader, PdfWriter, ReaderProperties,
    WriterProperties,
};
use std::fs::{self, File};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Document writing into memory, with ids that do not collide with other tests
fn memory_document(properties: DocumentProperties) -> PdfDocument<Vec<u8>> {
    PdfDocument::new_with(PdfWriter::with_defaults(Vec::new()), properties).unwrap()
}

/// Page widths in page order
fn widths(doc: &mut PdfDocument) -> Vec<f64> {
    let count = doc.number_of_pages().unwrap();
    (1..=count)
        .map(|n| {
            let page = doc.get_page(n).unwrap();
            let dict = doc.page_dict(page).unwrap();
            PageSize::from_rect(dict.get("MediaBox").unwrap()).unwrap().width
        })
        .collect()
}

fn reopen(bytes: Vec<u8>) -> PdfDocument {
    PdfDocument::open(PdfReader::new(bytes).unwrap()).unwrap()
}

#[test]
fn test_round_trip_preserves_page_order() {
    init_logging();
    let mut doc = memory_document(DocumentProperties::default());
    for i in 0..5 {
        doc.add_new_page(PageSize::new(100.0 + i as f64, 200.0)).unwrap();
    }
    doc.move_page(5, 1).unwrap();
    let bytes = doc.finish().unwrap().unwrap();

    assert!(bytes.starts_with(b"%PDF-1.7\n"));
    assert!(bytes.ends_with(b"%%EOF\n"));

    let mut reopened = reopen(bytes);
    assert_eq!(reopened.number_of_pages().unwrap(), 5);
    assert_eq!(widths(&mut reopened), vec![104.0, 100.0, 101.0, 102.0, 103.0]);
}

#[test]
fn test_round_trip_through_file() {
    init_logging();
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.pdf");

    let mut doc = PdfDocument::create(File::create(&path).unwrap()).unwrap();
    doc.add_new_page(PageSize::A4).unwrap();
    doc.add_new_page(PageSize::LETTER).unwrap();
    doc.close().unwrap();
    assert!(doc.is_closed());
    assert!(doc.writer().is_none(), "writer is released on close");

    let mut reopened = PdfDocument::open_file(&path).unwrap();
    assert_eq!(widths(&mut reopened), vec![595.0, 612.0]);
    assert!(fs::metadata(&path).unwrap().len() > 0);
}

#[test]
fn test_full_compression_writes_xref_stream() {
    let writer = PdfWriter::new(Vec::new(), WriterProperties::new().with_full_compression(true));
    let mut doc = PdfDocument::new(writer).unwrap();
    doc.add_new_page(PageSize::A5).unwrap();
    let bytes = doc.finish().unwrap().unwrap();

    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("/Type /XRef"));
    assert!(!text.contains("\ntrailer\n"));

    let reader = PdfReader::new(bytes).unwrap();
    assert!(reader.has_xref_stream());
    let mut reopened = PdfDocument::open(reader).unwrap();
    assert_eq!(widths(&mut reopened), vec![420.0]);
}

#[test]
fn test_encrypted_xref_stream_reads_back() {
    init_logging();
    let properties = WriterProperties::new()
        .with_full_compression(true)
        .with_encryption(EncryptionProperties::new("", "owner"));
    let mut doc = PdfDocument::new(PdfWriter::new(Vec::new(), properties)).unwrap();
    doc.add_new_page(PageSize::A5).unwrap();
    doc.document_info().unwrap().set_title("Sealed");
    let bytes = doc.finish().unwrap().unwrap();

    let reader = PdfReader::with_properties(bytes, ReaderProperties::strict()).unwrap();
    assert!(reader.has_xref_stream());
    assert!(!reader.is_rebuilt_xref());
    assert!(reader.decryptor().is_some());
    let mut reopened = PdfDocument::open(reader).unwrap();
    assert_eq!(widths(&mut reopened), vec![420.0]);
    assert_eq!(reopened.document_info().unwrap().title().as_deref(), Some("Sealed"));
}

/// Sink that fails once `limit` bytes were written and records being dropped
struct FailingSink {
    written: usize,
    limit: usize,
    dropped: Arc<AtomicBool>,
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() > self.limit {
            return Err(io::Error::other("disk full"));
        }
        self.written += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for FailingSink {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

#[test]
fn test_failed_close_releases_the_writer() {
    let dropped = Arc::new(AtomicBool::new(false));
    let sink = FailingSink {
        written: 0,
        limit: 64,
        dropped: Arc::clone(&dropped),
    };
    let mut doc = PdfDocument::new(PdfWriter::with_defaults(sink)).unwrap();
    doc.add_new_page(PageSize::A4).unwrap();

    assert!(matches!(doc.close(), Err(Error::CannotCloseDocument { .. })));
    assert!(dropped.load(Ordering::SeqCst));
    assert!(doc.is_closed());
    assert!(doc.close().is_ok());
}

#[test]
fn test_unreachable_objects_are_dropped() {
    let mut doc = memory_document(DocumentProperties::default());
    doc.add_new_page(PageSize::A4).unwrap();
    let orphan = doc.add_object(Object::dict([("Orphan", Object::Boolean(true))])).unwrap();
    let bytes = doc.finish().unwrap().unwrap();

    let mut reopened = reopen(bytes);
    assert!(reopened.get_pdf_object(orphan.id).unwrap().is_none());
    assert_eq!(reopened.number_of_pages().unwrap(), 1);
}

#[test]
fn test_flush_unused_objects_keeps_orphans() {
    let mut doc = memory_document(DocumentProperties::default().with_flush_unused_objects(true));
    doc.add_new_page(PageSize::A4).unwrap();
    let orphan = doc.add_object(Object::dict([("Orphan", Object::Boolean(true))])).unwrap();
    let bytes = doc.finish().unwrap().unwrap();

    let mut reopened = reopen(bytes);
    let kept = reopened.get_pdf_object(orphan.id).unwrap().cloned().unwrap();
    assert_eq!(kept.get("Orphan"), Some(&Object::Boolean(true)));
}

#[test]
fn test_must_be_flushed_mark_keeps_orphan() {
    let mut doc = memory_document(DocumentProperties::default());
    let orphan = doc.add_object(Object::Integer(42)).unwrap();
    doc.mark_object_as_must_be_flushed(orphan).unwrap();
    let bytes = doc.finish().unwrap().unwrap();

    let mut reopened = reopen(bytes);
    assert_eq!(reopened.get_pdf_object(orphan.id).unwrap(), Some(&Object::Integer(42)));
}

#[test]
fn test_flushed_object_is_terminal() {
    let mut doc = memory_document(DocumentProperties::default());
    let r = doc.add_object(Object::string("payload")).unwrap();
    doc.flush_object(r).unwrap();

    assert!(matches!(doc.object(r), Err(Error::ObjectFlushed(found)) if found == r));
    assert!(matches!(doc.object_mut(r), Err(Error::ObjectFlushed(_))));
    // flushing again is a no-op
    doc.flush_object(r).unwrap();
    doc.close().unwrap();
}

#[test]
fn test_flushed_page_survives_close() {
    let mut doc = memory_document(DocumentProperties::default());
    let first = doc.add_new_page(PageSize::new(300.0, 300.0)).unwrap();
    doc.flush_page(first).unwrap();
    doc.add_new_page(PageSize::new(400.0, 400.0)).unwrap();
    let bytes = doc.finish().unwrap().unwrap();

    let mut reopened = reopen(bytes);
    assert_eq!(widths(&mut reopened), vec![300.0, 400.0]);
}

#[test]
fn test_close_twice_is_noop() {
    let mut doc = memory_document(DocumentProperties::default());
    doc.add_new_page(PageSize::A4).unwrap();
    doc.close().unwrap();
    doc.close().unwrap();
    assert!(doc.is_closed());
    assert!(matches!(doc.add_new_page(PageSize::A4), Err(Error::DocumentClosed(_))));
}

#[test]
fn test_conformance_failure_aborts_close() {
    let properties = DocumentProperties::default()
        .with_conformance_checker(Arc::new(RequiredCatalogKeys::new(["Lang"])));
    let mut doc = memory_document(properties);
    doc.add_new_page(PageSize::A4).unwrap();

    match doc.close() {
        Err(Error::Conformance { message, .. }) => assert!(message.contains("Lang")),
        other => panic!("Expected Conformance error, got {:?}", other),
    }
    assert!(!doc.is_closed());
}

#[test]
fn test_producer_and_ids_are_written() {
    let ids = DocumentIdSource::isolated(5_000);
    let mut doc = memory_document(DocumentProperties::default().with_id_source(ids));
    assert_eq!(doc.document_id(), 5_001);
    doc.add_new_page(PageSize::A4).unwrap();
    let original_id = doc.original_document_id().to_vec();
    let bytes = doc.finish().unwrap().unwrap();

    let mut reopened = reopen(bytes);
    assert_eq!(reopened.original_document_id(), &original_id[..]);
    let info = reopened.document_info().unwrap();
    let producer = info.producer().unwrap();
    assert!(producer.starts_with(pdf_graph::NAME), "{}", producer);
    assert!(info.get("ModDate").is_some());
}

#[test]
fn test_xmp_metadata_is_attached() {
    let writer = PdfWriter::new(Vec::new(), WriterProperties::new().with_xmp_metadata(true));
    let mut doc = PdfDocument::new(writer).unwrap();
    doc.add_new_page(PageSize::A4).unwrap();
    let bytes = doc.finish().unwrap().unwrap();

    let mut reopened = reopen(bytes);
    let catalog_ref = reopened.catalog().obj();
    let catalog = reopened.object(catalog_ref).unwrap().clone();
    let metadata = catalog.get("Metadata").and_then(Object::as_reference).unwrap();
    let stream = reopened.object(metadata).unwrap();
    assert_eq!(stream.dict_type(), Some("Metadata"));
    assert!(matches!(stream, Object::Stream { .. }));
}

#[test]
fn test_read_only_document_cannot_flush() {
    let mut doc = memory_document(DocumentProperties::default());
    doc.add_new_page(PageSize::A4).unwrap();
    let bytes = doc.finish().unwrap().unwrap();

    let mut reopened = reopen(bytes);
    let page = reopened.get_page(1).unwrap();
    assert!(matches!(reopened.flush_page(page), Err(Error::NotInWriteMode)));
    reopened.close().unwrap();
}
