//! Document controller.
//!
//! [`PdfDocument`] owns the object store, the catalog with its page tree and
//! the trailer state of one document, and runs the open/close protocol in
//! the three construction modes:
//!
//! - **read**: [`PdfDocument::open`] with a [`PdfReader`]; closing only
//!   releases the reader.
//! - **write**: [`PdfDocument::new`] with a [`PdfWriter`]; closing writes the
//!   whole document.
//! - **stamping**: [`PdfDocument::stamp`] with both. Closing either rewrites
//!   the reachable graph or, in append mode, copies the source bytes and
//!   adds only what changed plus a new cross-reference section.

use crate::catalog::Catalog;
use crate::config::{DocumentProperties, StampingProperties, WriterProperties, DEFAULT_PDF_VERSION};
use crate::conformance::ConformanceKey;
use crate::copy::{self, ObjectCopier, PageExtraCopier};
use crate::crypto::{generate_document_id, EncryptionHandler, StandardRc4Handler};
use crate::error::{Error, Result};
use crate::info::{add_modified_postfix, product_name, producer_version, DocumentInfo};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::outline::OutlineTree;
use crate::page::{PageSize, PdfPage};
use crate::page_tree::PageTree;
use crate::reader::PdfReader;
use crate::store::{DocumentStore, ObjectStore};
use crate::structure::StructTree;
use crate::writer::PdfWriter;
use crate::xmp::XmpPacket;
use crate::xref::{RefState, SectionOptions};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Sink, Write};
use std::path::Path;

/// An open document.
///
/// # Example
///
/// ```no_run
/// use pdf_graph::document::PdfDocument;
/// use pdf_graph::page::PageSize;
///
/// let mut doc = PdfDocument::create(Vec::new())?;
/// doc.add_new_page(PageSize::A4)?;
/// doc.add_new_page(PageSize::LETTER)?;
/// let bytes = doc.finish()?.unwrap_or_default();
/// assert!(bytes.starts_with(b"%PDF-"));
/// # Ok::<(), pdf_graph::error::Error>(())
/// ```
pub struct PdfDocument<W: Write = Sink> {
    store: DocumentStore<W>,
    catalog: Catalog,
    info: ObjectRef,
    trailer: Dictionary,
    original_id: Vec<u8>,
    modified_id: Vec<u8>,
    properties: DocumentProperties,
    stamping: StampingProperties,
    struct_tree: Option<StructTree>,
    fonts: Vec<ObjectRef>,
    encrypt: Option<ObjectRef>,
    pdf_version: String,
    default_page_size: PageSize,
    closed: bool,
}

impl<W: Write> std::fmt::Debug for PdfDocument<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDocument")
            .field("document_id", &self.store.document_id())
            .field("pdf_version", &self.pdf_version)
            .field("catalog", &self.catalog.obj())
            .field("append_mode", &self.store.is_append_mode())
            .field("tagged", &self.struct_tree.is_some())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl PdfDocument<Sink> {
    /// Open a document for reading.
    pub fn open(reader: PdfReader) -> Result<Self> {
        Self::open_with(reader, DocumentProperties::default())
    }

    /// Open a document for reading with custom strategies.
    pub fn open_with(reader: PdfReader, properties: DocumentProperties) -> Result<Self> {
        Self::init(Some(reader), None, StampingProperties::default(), properties)
    }

    /// Open a file for reading.
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(PdfReader::open(path)?)
    }
}

impl<W: Write> PdfDocument<W> {
    /// New, empty document written to `writer` on close.
    pub fn new(writer: PdfWriter<W>) -> Result<Self> {
        Self::new_with(writer, DocumentProperties::default())
    }

    /// New document with custom strategies.
    pub fn new_with(writer: PdfWriter<W>, properties: DocumentProperties) -> Result<Self> {
        Self::init(None, Some(writer), StampingProperties::default(), properties)
    }

    /// New document over `out` with default writer properties.
    pub fn create(out: W) -> Result<Self> {
        Self::new(PdfWriter::with_defaults(out))
    }

    /// Modify the document read by `reader`, writing the result to `writer`.
    ///
    /// # Errors
    ///
    /// - [`Error::AppendModeRequiresValidXref`] when append mode is requested
    ///   for a source whose cross-reference table had to be rebuilt.
    /// - [`Error::Encryption`] when the source is encrypted and the properties
    ///   do not ask for an append that preserves its encryption.
    pub fn stamp(reader: PdfReader, writer: PdfWriter<W>, stamping: StampingProperties) -> Result<Self> {
        Self::stamp_with(reader, writer, stamping, DocumentProperties::default())
    }

    /// [`PdfDocument::stamp`] with custom strategies.
    pub fn stamp_with(
        reader: PdfReader,
        writer: PdfWriter<W>,
        stamping: StampingProperties,
        properties: DocumentProperties,
    ) -> Result<Self> {
        Self::init(Some(reader), Some(writer), stamping, properties)
    }

    fn init(
        reader: Option<PdfReader>,
        writer: Option<PdfWriter<W>>,
        stamping: StampingProperties,
        properties: DocumentProperties,
    ) -> Result<Self> {
        let document_id = properties.id_source.next_id();
        let writing = writer.is_some();
        let append = stamping.append_mode && reader.is_some() && writing;
        if let Some(source) = reader.as_ref() {
            if append && source.is_rebuilt_xref() {
                return Err(Error::AppendModeRequiresValidXref);
            }
            if writing && source.is_encrypted() && !(append && stamping.preserve_encryption) {
                return Err(Error::Encryption(
                    "an encrypted document can only be stamped in append mode with preserved encryption"
                        .to_string(),
                ));
            }
            if writing && source.is_encrypted() && source.decryptor().is_none() {
                return Err(Error::Encryption(
                    "the source cannot be decrypted with the given password; \
                     an incremental update would be written in the clear"
                        .to_string(),
                ));
            }
        }

        let mut store = DocumentStore::new(
            document_id,
            reader,
            writer,
            properties.codec.clone(),
            properties.conformance_checker.clone(),
        );
        store.set_append_mode(append);

        let mut doc = if store.reader.is_some() {
            Self::load(store, properties, stamping)?
        } else {
            Self::blank(store, properties)?
        };
        if writing {
            doc.prepare_writer()?;
        }
        log::debug!(
            "Opened document {} (version {}, writing: {}, append: {})",
            document_id,
            doc.pdf_version,
            writing,
            append
        );
        Ok(doc)
    }

    /// Catalog, page tree root and info of a new document take objects 1-3.
    fn blank(mut store: DocumentStore<W>, properties: DocumentProperties) -> Result<Self> {
        let catalog = store.add(Object::dict([("Type", Object::name("Catalog"))]));
        let pages = store.add(Object::dict([
            ("Type", Object::name("Pages")),
            ("Kids", Object::Array(Vec::new())),
            ("Count", Object::Integer(0)),
        ]));
        store.dict_mut(catalog)?.insert("Pages".into(), Object::Reference(pages));
        let mut info_dict = Dictionary::new();
        DocumentInfo::new(&mut info_dict).add_creation_date();
        let info = store.add(Object::Dictionary(info_dict));

        let id = generate_document_id(store.document_id());
        Ok(Self {
            store,
            catalog: Catalog::new(catalog, PageTree::empty(pages)),
            info,
            trailer: Dictionary::new(),
            original_id: id.clone(),
            modified_id: id,
            properties,
            stamping: StampingProperties::default(),
            struct_tree: None,
            fonts: Vec::new(),
            encrypt: None,
            pdf_version: DEFAULT_PDF_VERSION.to_string(),
            default_page_size: PageSize::default(),
            closed: false,
        })
    }

    fn load(
        mut store: DocumentStore<W>,
        properties: DocumentProperties,
        stamping: StampingProperties,
    ) -> Result<Self> {
        store.register_source_entries();
        let freed = store.xref.init_free_references_list();
        log::trace!("{} free entries in the source table", freed);

        let (summary, trailer, header_version) = match store.reader.as_ref() {
            Some(reader) => (
                reader.read_trailer_chain(),
                reader.trailer().clone(),
                reader.header_version().to_string(),
            ),
            None => return Err(Error::InvalidArgument("no reader to load from".to_string())),
        };
        let catalog = summary
            .root
            .ok_or_else(|| Error::InvalidXref("trailer has no /Root".to_string()))?;
        let catalog_dict = store.dict(catalog)?;
        let pages = catalog_dict
            .get("Pages")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::wrong_type("Reference", "missing /Pages"))?;

        let info = match summary.info {
            Some(info) if store.get(info).is_ok_and(|o| o.as_dict().is_some()) => info,
            Some(info) => {
                log::warn!("Trailer /Info {} is not a dictionary; a new one is created", info);
                store.add(Object::Dictionary(Dictionary::new()))
            },
            None => store.add(Object::Dictionary(Dictionary::new())),
        };

        let (original_id, modified_id) = match summary.ids {
            Some(ids) => ids,
            None => {
                log::error!("Document has no valid /ID; new identifiers are generated");
                let id = generate_document_id(store.document_id());
                (id.clone(), id)
            },
        };

        let mut pdf_version = header_version;
        if let Some(version) = catalog_dict.get("Version").and_then(Object::as_name) {
            if is_newer_version(version, &pdf_version) {
                pdf_version = version.to_string();
            }
        }

        let encrypt = trailer.get("Encrypt").and_then(Object::as_reference);
        let materialize = store.writer.is_some() && !store.is_append_mode();
        let struct_tree = StructTree::from_catalog(&mut store, catalog)?;
        Ok(Self {
            store,
            catalog: Catalog::new(catalog, PageTree::new(pages, materialize)),
            info,
            trailer,
            original_id,
            modified_id,
            properties,
            stamping,
            struct_tree,
            fonts: Vec::new(),
            encrypt,
            pdf_version,
            default_page_size: PageSize::default(),
            closed: false,
        })
    }

    /// Apply writer properties: IDs, version, compression mode, encryption,
    /// and the header or the copied source bytes.
    fn prepare_writer(&mut self) -> Result<()> {
        let props = match self.store.writer.as_ref() {
            Some(writer) => writer.properties().clone(),
            None => return Err(Error::NotInWriteMode),
        };
        let stamping = self.store.reader.is_some();
        let append = self.store.is_append_mode();

        // the file key of an encrypted source is derived from its first ID
        let keeps_source_key = self.store.reader.as_ref().is_some_and(PdfReader::is_encrypted)
            && (append || self.stamping.preserve_encryption);
        match props.initial_document_id.as_ref() {
            Some(_) if keeps_source_key => {
                log::warn!("Ignoring the initial document ID; the source encryption depends on it");
            },
            Some(id) => self.original_id = id.clone(),
            None => {},
        }
        self.modified_id = match props.modified_document_id.as_ref() {
            Some(id) if !stamping || *id != self.modified_id => id.clone(),
            _ if stamping => generate_document_id(self.store.document_id()),
            _ => self.modified_id.clone(),
        };

        if let Some(version) = props.pdf_version.as_deref() {
            if !append || is_newer_version(version, &self.pdf_version) {
                if append {
                    self.catalog.put(&mut self.store, "Version", Object::name(version))?;
                }
                self.pdf_version = version.to_string();
            }
        }

        let source_stream = self.store.reader.as_ref().map(PdfReader::has_xref_stream);
        if let (Some(source_stream), Some(writer)) = (source_stream, self.store.writer.as_mut()) {
            match props.full_compression {
                None => writer.set_full_compression(source_stream),
                Some(requested) if append && requested != source_stream => {
                    log::warn!(
                        "Full compression mode requested ({}) differs from the source document; \
                         keeping the source mode ({}) for the incremental update",
                        requested,
                        source_stream
                    );
                    writer.set_full_compression(source_stream);
                },
                Some(_) => {},
            }
        }

        if append && self.stamping.preserve_encryption {
            log::debug!("Keeping source encryption dictionary {:?}", self.encrypt);
            let handler = self.store.reader.as_ref().and_then(PdfReader::decryptor).cloned();
            if let (Some(handler), Some(writer)) = (handler, self.store.writer.as_mut()) {
                writer.set_crypto(Some(Box::new(handler)));
            }
        } else {
            self.encrypt = None;
            self.trailer.shift_remove("Encrypt");
            self.setup_encryption(&props);
        }

        let original = if append {
            self.store.reader.as_ref().map(|r| r.original_bytes().clone())
        } else {
            None
        };
        let version = self.pdf_version.clone();
        let writer = self.store.writer.as_mut().ok_or(Error::NotInWriteMode)?;
        match original {
            Some(bytes) => {
                writer.write_raw_bytes(&bytes)?;
                writer.write_raw_bytes(b"\n")?;
            },
            None => writer.write_header(&version)?,
        }
        Ok(())
    }

    fn setup_encryption(&mut self, props: &WriterProperties) {
        let Some(encryption) = props.encryption.as_ref() else {
            return;
        };
        let handler = StandardRc4Handler::new(encryption, &self.original_id);
        let r = self.store.add(Object::Dictionary(handler.encryption_dictionary()));
        if let Some(writer) = self.store.writer.as_mut() {
            writer.set_crypto(Some(Box::new(handler)));
        }
        self.encrypt = Some(r);
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::DocumentClosed(self.store.document_id()));
        }
        Ok(())
    }

    fn check_owner(&self, page: &PdfPage) -> Result<()> {
        let target = self.store.document_id();
        if page.document_id() != target {
            return Err(Error::PageFromAnotherDocument {
                page: page.obj(),
                owner: page.document_id(),
                target,
            });
        }
        Ok(())
    }

    fn page_ref(&mut self, number: usize) -> Result<ObjectRef> {
        self.catalog.page_tree_mut().get(&mut self.store, number)
    }

    fn insert_page(&mut self, index: usize, page: ObjectRef) -> Result<PdfPage> {
        if self.store.is_flushed(page) {
            return Err(Error::FlushedPageCannotBeAdded(page));
        }
        let object = self.store.get(page)?.clone();
        self.store.checker().check_object(&object, ConformanceKey::PageAdd)?;
        self.catalog.page_tree_mut().insert(&mut self.store, index, page)?;
        Ok(PdfPage::new(page, self.store.document_id()))
    }

    // ---------------------------------------------------------------------
    // Pages
    // ---------------------------------------------------------------------

    /// Append a blank page of `size`.
    pub fn add_new_page(&mut self, size: PageSize) -> Result<PdfPage> {
        let count = self.number_of_pages()?;
        self.add_new_page_at(count + 1, size)
    }

    /// Insert a blank page of `size` at 1-based `index`.
    pub fn add_new_page_at(&mut self, index: usize, size: PageSize) -> Result<PdfPage> {
        self.check_open()?;
        let dict = self.properties.page_factory.create_page(size);
        let page = self.store.add(Object::Dictionary(dict));
        match self.insert_page(index, page) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.store.free(page);
                Err(e)
            },
        }
    }

    /// Append an existing page of this document.
    pub fn add_page(&mut self, page: PdfPage) -> Result<PdfPage> {
        let count = self.number_of_pages()?;
        self.add_page_at(count + 1, page)
    }

    /// Insert an existing page of this document at 1-based `index`.
    pub fn add_page_at(&mut self, index: usize, page: PdfPage) -> Result<PdfPage> {
        self.check_open()?;
        self.check_owner(&page)?;
        self.insert_page(index, page.obj())
    }

    /// Remove page `number` (1-based).
    ///
    /// Outline items pointing at the page are dropped, its widgets leave the
    /// form, its tags leave the structure tree, and an unflushed page object
    /// is freed.
    ///
    /// # Errors
    ///
    /// [`Error::FlushedPageCannotBeRemoved`] when the page was already flushed
    /// and the document is tagged or has an interactive form. The page tree
    /// is left unchanged.
    pub fn remove_page(&mut self, number: usize) -> Result<()> {
        self.check_open()?;
        let page = self.page_ref(number)?;
        let flushed = self.store.is_flushed(page);
        if flushed && (self.is_tagged() || self.catalog.has_acro_form(&mut self.store)?) {
            return Err(Error::FlushedPageCannotBeRemoved(page));
        }

        if self.catalog.is_outline_mode() || self.catalog.has_outlines(&mut self.store)? {
            self.catalog.remove_outlines_for_page(&mut self.store, page)?;
        }
        if !flushed {
            self.catalog.release_page_widgets(&mut self.store, page)?;
        }
        if let Some(tree) = self.struct_tree {
            tree.remove_page_tags(&mut self.store, page)?;
        }
        self.catalog.page_tree_mut().remove(&mut self.store, number)?;
        if !flushed {
            self.store.dict_mut(page)?.shift_remove("Parent");
            self.store.free(page);
        }
        log::debug!("Removed page {} ({})", number, page);
        Ok(())
    }

    /// Remove `page`. Returns false when it is not in the page tree.
    pub fn remove_page_handle(&mut self, page: PdfPage) -> Result<bool> {
        self.check_open()?;
        self.check_owner(&page)?;
        match self.get_page_number(page)? {
            Some(number) => self.remove_page(number).map(|()| true),
            None => Ok(false),
        }
    }

    /// Move page `number` in front of the page currently at `insert_before`;
    /// `number_of_pages() + 1` moves it to the end.
    pub fn move_page(&mut self, number: usize, insert_before: usize) -> Result<()> {
        self.check_open()?;
        let count = self.number_of_pages()?;
        if insert_before == 0 || insert_before > count + 1 {
            return Err(Error::PageIndexOutOfBounds {
                index: insert_before,
                count,
            });
        }
        let page = self.page_ref(number)?;
        if self.store.is_flushed(page) {
            return Err(Error::FlushedPageCannotBeAdded(page));
        }
        if insert_before == number || insert_before == number + 1 {
            return Ok(());
        }
        if let Some(tree) = self.struct_tree {
            let before = if insert_before <= count {
                Some(self.page_ref(insert_before)?)
            } else {
                None
            };
            tree.move_page_tags(&mut self.store, page, before)?;
        }

        let tree = self.catalog.page_tree_mut();
        let removed = tree.remove(&mut self.store, number)?;
        let target = if insert_before > number {
            insert_before - 1
        } else {
            insert_before
        };
        tree.insert(&mut self.store, target, removed)
    }

    /// Page `number` (1-based).
    pub fn get_page(&mut self, number: usize) -> Result<PdfPage> {
        self.check_open()?;
        let page = self.page_ref(number)?;
        Ok(PdfPage::new(page, self.store.document_id()))
    }

    /// 1-based number of `page`, if it is in the page tree.
    pub fn get_page_number(&mut self, page: PdfPage) -> Result<Option<usize>> {
        self.check_owner(&page)?;
        self.catalog.page_tree_mut().index_of(&mut self.store, page.obj())
    }

    /// First page.
    pub fn get_first_page(&mut self) -> Result<PdfPage> {
        self.get_page(1)
    }

    /// Last page.
    pub fn get_last_page(&mut self) -> Result<PdfPage> {
        let count = self.number_of_pages()?;
        self.get_page(count)
    }

    /// Number of pages.
    pub fn number_of_pages(&mut self) -> Result<usize> {
        self.catalog.page_tree_mut().len(&mut self.store)
    }

    /// Size used by callers that do not pick one.
    pub fn default_page_size(&self) -> PageSize {
        self.default_page_size
    }

    /// Change the default page size.
    pub fn set_default_page_size(&mut self, size: PageSize) {
        self.default_page_size = size;
    }

    /// Dictionary of `page`.
    pub fn page_dict(&mut self, page: PdfPage) -> Result<Dictionary> {
        self.check_owner(&page)?;
        self.store.dict(page.obj())
    }

    /// Mutable dictionary of `page`; marks it modified.
    pub fn page_dict_mut(&mut self, page: PdfPage) -> Result<&mut Dictionary> {
        self.check_open()?;
        self.check_owner(&page)?;
        self.store.dict_mut(page.obj())
    }

    /// Write `page` out now, releasing its memory.
    pub fn flush_page(&mut self, page: PdfPage) -> Result<()> {
        self.check_open()?;
        self.check_owner(&page)?;
        self.store.flush(page.obj())
    }

    // ---------------------------------------------------------------------
    // Copying
    // ---------------------------------------------------------------------

    /// Copy pages `from..=to` to the end of `target`.
    pub fn copy_page_range_to<T: Write>(
        &mut self,
        from: usize,
        to: usize,
        target: &mut PdfDocument<T>,
    ) -> Result<Vec<PdfPage>> {
        let pages: Vec<usize> = (from..=to).collect();
        self.copy_pages_to(&pages, target, None, None)
    }

    /// Copy the pages numbered `pages` (any order, repeats allowed) into
    /// `target`, in front of its page `insert_before` or at the end.
    ///
    /// Link annotations, optional content groups, tags and outline items
    /// follow the pages. Links and outlines pointing outside the copied set
    /// are dropped.
    ///
    /// # Errors
    ///
    /// [`Error::TagStructureCopy`] when copying tags fails part way; either
    /// document may then hold an inconsistent structure tree. Failures
    /// copying links, optional content or outlines are logged instead.
    pub fn copy_pages_to<T: Write>(
        &mut self,
        pages: &[usize],
        target: &mut PdfDocument<T>,
        insert_before: Option<usize>,
        mut extra: Option<&mut dyn PageExtraCopier>,
    ) -> Result<Vec<PdfPage>> {
        self.check_open()?;
        target.check_open()?;
        if target.store.writer.is_none() {
            return Err(Error::NotInWriteMode);
        }
        let target_count = target.number_of_pages()?;
        let mut insert_at = insert_before.unwrap_or(target_count + 1);
        if insert_at == 0 || insert_at > target_count + 1 {
            return Err(Error::PageIndexOutOfBounds {
                index: insert_at,
                count: target_count,
            });
        }
        let before_page = if insert_at <= target_count {
            Some(target.page_ref(insert_at)?)
        } else {
            None
        };

        let mut copier = ObjectCopier::new();
        let mut copied = Vec::with_capacity(pages.len());
        let mut page_map: HashMap<ObjectRef, ObjectRef> = HashMap::new();
        let mut links = Vec::new();
        let mut ranges: Vec<Vec<(ObjectRef, ObjectRef)>> = Vec::new();
        let mut last_number = 0;

        for &number in pages {
            let source_page = self.page_ref(number)?;
            let (copy, page_links) =
                copy::copy_page(&mut copier, &mut self.store, &mut target.store, source_page)?;
            if let Some(extra) = extra.as_deref_mut() {
                extra.copy(source_page, copy, &mut self.store, &mut target.store)?;
            }
            copied.push(target.insert_page(insert_at, copy)?);
            insert_at += 1;

            page_map.entry(source_page).or_insert(copy);
            links.extend(page_links.into_iter().map(|annot| (annot, copy)));
            if ranges.is_empty() || last_number >= number {
                ranges.push(Vec::new());
            }
            if let Some(range) = ranges.last_mut() {
                range.push((source_page, copy));
            }
            last_number = number;
        }

        let named = if links.is_empty() && !self.catalog.has_outlines(&mut self.store)? {
            BTreeMap::new()
        } else {
            self.catalog.named_destinations(&mut self.store).unwrap_or_else(|e| {
                log::warn!("Named destinations of document {} unreadable: {}", self.store.document_id(), e);
                BTreeMap::new()
            })
        };
        self.copy_links(target, &mut copier, links, &page_map, &named);

        if let Err(e) = self.copy_optional_content(target, &copier) {
            log::warn!("Optional content properties not copied: {}", e);
        }

        if let Some(target_tree) = target.struct_tree {
            match self.struct_tree {
                Some(source_tree) => {
                    for range in &ranges {
                        let map: HashMap<ObjectRef, ObjectRef> = range.iter().copied().collect();
                        source_tree
                            .copy_range_to(
                                &mut self.store,
                                &target_tree,
                                &mut target.store,
                                &map,
                                before_page,
                                &mut copier,
                            )
                            .map_err(|e| Error::TagStructureCopy(e.to_string()))?;
                    }
                    target_tree
                        .normalize(&mut target.store)
                        .map_err(|e| Error::TagStructureCopy(e.to_string()))?;
                },
                None => log::warn!(
                    "Copying untagged pages of document {} into tagged document {}; no tags are copied",
                    self.store.document_id(),
                    target.store.document_id()
                ),
            }
        }

        if self.catalog.has_outlines(&mut self.store)? {
            let outcome = self.catalog.outlines(&mut self.store, false).and_then(|source_tree| {
                let target_tree = target.catalog.outlines(&mut target.store, false)?;
                copy::copy_outlines(source_tree, target_tree, &page_map, &named)
            });
            match outcome {
                Ok(n) => log::debug!("Copied {} outline items", n),
                Err(e) => log::warn!("Outlines not copied: {}", e),
            }
        }

        log::info!(
            "Copied {} pages from document {} to document {}",
            copied.len(),
            self.store.document_id(),
            target.store.document_id()
        );
        Ok(copied)
    }

    fn copy_links<T: Write>(
        &mut self,
        target: &mut PdfDocument<T>,
        copier: &mut ObjectCopier,
        links: Vec<(ObjectRef, ObjectRef)>,
        pages: &HashMap<ObjectRef, ObjectRef>,
        named: &BTreeMap<Vec<u8>, Object>,
    ) {
        for (annot, target_page) in links {
            let copied = copy::copy_link_annotation(
                copier,
                &mut self.store,
                &mut target.store,
                annot,
                target_page,
                pages,
                named,
            );
            match copied {
                Ok(Some((link, new_name))) => {
                    let attached = target.store.dict_mut(target_page).map(|page| {
                        let annots = page
                            .entry("Annots".to_string())
                            .or_insert_with(|| Object::Array(Vec::new()));
                        if let Some(annots) = annots.as_array_mut() {
                            annots.push(Object::Reference(link));
                        }
                    });
                    if let Err(e) = attached {
                        log::warn!("Link annotation {} not attached to {}: {}", link, target_page, e);
                    }
                    if let Some((name, dest)) = new_name {
                        if let Err(e) = target.catalog.add_named_destination(&mut target.store, name, dest) {
                            log::warn!("Named destination of link {} not copied: {}", annot, e);
                        }
                    }
                },
                Ok(None) => log::debug!("Link annotation {} points outside the copied pages; dropped", annot),
                Err(e) => log::warn!("Link annotation {} not copied: {}", annot, e),
            }
        }
    }

    fn copy_optional_content<T: Write>(
        &mut self,
        target: &mut PdfDocument<T>,
        copier: &ObjectCopier,
    ) -> Result<()> {
        let Some(source_props) = self.catalog.dict(&mut self.store)?.get("OCProperties").cloned() else {
            return Ok(());
        };
        let store = &mut self.store;
        let has_groups = copier
            .pairs()
            .any(|(from, _)| store.get(from).is_ok_and(|o| o.dict_type() == Some("OCG")));
        if !has_groups {
            return Ok(());
        }
        let Some(target_props) = target.catalog.oc_properties(&mut target.store, true)? else {
            return Ok(());
        };
        let added = copy::copy_oc_properties(copier, &mut self.store, &source_props, &mut target.store, target_props)?;
        if added > 0 {
            target.catalog.set_oc_properties_modified();
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Close
    // ---------------------------------------------------------------------

    /// Close the document.
    ///
    /// A writing document is serialized first: a full rewrite flushes
    /// everything reachable from the catalog and frees the rest, an append
    /// flushes only what changed. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::CatalogAlreadyFlushed`] when the catalog was flushed by hand.
    /// - [`Error::Conformance`] from the attached checker, before any bytes
    ///   for the close are written.
    /// - [`Error::CannotCloseDocument`] wrapping an I/O failure.
    ///
    /// The first two leave the document open. Any other failure still
    /// releases the reader and writer per the close flags and marks the
    /// document closed.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            log::debug!("Document {} is already closed", self.store.document_id());
            return Ok(());
        }
        let result = if self.store.writer.is_some() {
            self.store.set_closing(true);
            let written = self.write_document();
            self.store.set_closing(false);
            let document_id = self.store.document_id();
            written.map_err(|e| match e {
                Error::Io(source) => Error::CannotCloseDocument { document_id, source },
                other => other,
            })
        } else {
            Ok(())
        };
        match &result {
            Err(Error::Conformance { .. } | Error::CatalogAlreadyFlushed) => {
                log::debug!("Close of document {} aborted; it stays open", self.store.document_id());
            },
            Err(e) => {
                log::error!("Close of document {} failed: {}", self.store.document_id(), e);
                self.release_resources();
                self.closed = true;
            },
            Ok(()) => {
                self.release_resources();
                self.closed = true;
            },
        }
        result
    }

    /// Close the document and hand back the output, whatever the
    /// close-writer flag says.
    pub fn finish(mut self) -> Result<Option<W>> {
        self.properties.close_writer = false;
        self.close()?;
        Ok(self.store.writer.take().map(PdfWriter::into_inner))
    }

    fn release_resources(&mut self) {
        let document_id = self.store.document_id();
        if let Some(writer) = self.store.writer.as_mut() {
            if let Err(e) = writer.flush() {
                log::error!("Cannot flush the writer of document {}: {}", document_id, e);
            }
        }
        if self.properties.close_writer {
            self.store.writer = None;
        }
        if self.properties.close_reader {
            self.store.reader = None;
        }
    }

    fn write_document(&mut self) -> Result<()> {
        let catalog = self.catalog.obj();
        if self.store.is_flushed(catalog) {
            return Err(Error::CatalogAlreadyFlushed);
        }
        let append = self.store.is_append_mode();

        self.update_info()?;
        self.update_xmp_metadata()?;
        let catalog_dict = self.store.dict(catalog)?;
        let info_dict = self.store.dict(self.info)?;
        self.store.checker().check_document(&catalog_dict, &info_dict)?;

        let forbidden: HashSet<u32> = self.encrypt.iter().map(|r| r.id).collect();
        if append {
            self.catalog.flush_oc_properties(&mut self.store)?;
            if let Some(tree) = self.struct_tree {
                tree.flush(&mut self.store)?;
            }
            self.catalog.build_modified_name_trees(&mut self.store)?;
            self.catalog.build_outlines(&mut self.store)?;
            self.attach_page_tree()?;
            self.flush_structural()?;
            self.store.flush_modified_waiting_objects(&forbidden)?;
            self.store.free_modified_unflushed(&forbidden);
        } else {
            self.catalog.flush_oc_properties(&mut self.store)?;
            self.attach_page_tree()?;
            self.catalog.build_modified_name_trees(&mut self.store)?;
            self.catalog.build_outlines(&mut self.store)?;

            let pages = self.catalog.page_tree_mut().refs(&mut self.store)?.to_vec();
            for page in pages {
                if !self.store.is_flushed(page) {
                    self.store.flush(page)?;
                }
            }
            if let Some(tree) = self.struct_tree {
                tree.normalize(&mut self.store)
                    .and_then(|()| tree.flush(&mut self.store))
                    .map_err(|e| match e {
                        Error::TagStructureFlush(_) => e,
                        other => Error::TagStructureFlush(other.to_string()),
                    })?;
            }
            self.flush_structural()?;
            self.store.flush_waiting_objects(&forbidden)?;
            self.store
                .sweep_unreached(&forbidden, self.properties.flush_unused_objects)?;

        }

        // neither the encryption dictionary nor the xref stream is encrypted
        if let Some(writer) = self.store.writer.as_mut() {
            writer.take_crypto();
        }
        if let Some(encrypt) = self.encrypt.filter(|_| !append) {
            self.store.flush(encrypt)?;
        }

        let mut trailer = self.trailer.clone();
        trailer.insert("Root".into(), Object::Reference(catalog));
        trailer.insert("Info".into(), Object::Reference(self.info));
        match self.encrypt {
            Some(encrypt) => {
                trailer.insert("Encrypt".into(), Object::Reference(encrypt));
            },
            None if !append => {
                trailer.shift_remove("Encrypt");
            },
            None => {},
        }
        let options = SectionOptions {
            append,
            prev: self.store.reader.as_ref().map(PdfReader::startxref),
            file_id: Object::Array(vec![
                Object::String(self.original_id.clone()),
                Object::String(self.modified_id.clone()),
            ]),
        };
        let offset = self.store.write_xref(&trailer, &options)?;
        if let Some(writer) = self.store.writer.as_mut() {
            writer.flush()?;
        }
        log::info!(
            "Closed document {}: {} objects, xref at {}",
            self.store.document_id(),
            self.store.xref().size(),
            offset
        );
        Ok(())
    }

    fn attach_page_tree(&mut self) -> Result<()> {
        let pages = self.catalog.page_tree_mut().generate_tree(&mut self.store)?;
        let current = self.catalog.dict(&mut self.store)?.get("Pages").and_then(Object::as_reference);
        if current != Some(pages) {
            self.catalog.put(&mut self.store, "Pages", Object::Reference(pages))?;
        }
        Ok(())
    }

    /// Catalog, info and fonts.
    fn flush_structural(&mut self) -> Result<()> {
        self.store.flush(self.catalog.obj())?;
        self.store.flush(self.info)?;
        for font in self.fonts.clone() {
            if !self.store.is_free(font) {
                self.store.flush(font)?;
            }
        }
        Ok(())
    }

    fn update_info(&mut self) -> Result<()> {
        if self.store.is_flushed(self.info) {
            log::warn!("Info dictionary {} is already flushed; producer not updated", self.info);
            return Ok(());
        }
        let version = producer_version();
        let stamping = self.store.reader.is_some();
        let mut info = DocumentInfo::new(self.store.dict_mut(self.info)?);
        let producer = if stamping {
            add_modified_postfix(info.producer().as_deref(), &version, product_name())
        } else {
            version
        };
        info.set_producer(&producer).add_mod_date();
        Ok(())
    }

    fn update_xmp_metadata(&mut self) -> Result<()> {
        let existing = self
            .catalog
            .dict(&mut self.store)?
            .get("Metadata")
            .and_then(Object::as_reference);
        let requested = self
            .store
            .writer
            .as_ref()
            .is_some_and(|w| w.properties().add_xmp_metadata);
        if existing.is_none() && !requested {
            return Ok(());
        }

        let info = self.store.dict(self.info)?;
        let mut packet = XmpPacket::from_info(&info);
        if let Ok(id) = uuid::Uuid::from_slice(&self.original_id) {
            packet = packet.with_document_id(id);
        }
        let mut dict = Dictionary::new();
        dict.insert("Type".into(), Object::name("Metadata"));
        dict.insert("Subtype".into(), Object::name("XML"));
        let stream = Object::stream(dict, packet.to_bytes());

        match existing {
            Some(r) if self.store.is_append_mode() && !self.store.is_flushed(r) && !self.store.is_free(r) => {
                self.store.replace(r, stream)?;
            },
            _ => {
                let r = self.store.add(stream);
                self.catalog.put(&mut self.store, "Metadata", Object::Reference(r))?;
            },
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Catalog features
    // ---------------------------------------------------------------------

    /// Outline tree, loaded on first use; `update` reloads it.
    pub fn get_outlines(&mut self, update: bool) -> Result<&mut OutlineTree> {
        self.check_open()?;
        self.catalog.outlines(&mut self.store, update)
    }

    /// Register a named destination.
    pub fn add_named_destination(&mut self, name: impl Into<Vec<u8>>, value: Object) -> Result<()> {
        self.check_open()?;
        self.catalog.add_named_destination(&mut self.store, name, value)
    }

    /// Look up a named destination.
    pub fn named_destination(&mut self, name: &[u8]) -> Result<Option<Object>> {
        self.catalog.named_destination(&mut self.store, name)
    }

    /// Make the document tagged.
    pub fn set_tagged(&mut self) -> Result<StructTree> {
        self.check_open()?;
        let tree = StructTree::create(&mut self.store, self.catalog.obj())?;
        self.struct_tree = Some(tree);
        Ok(tree)
    }

    /// Document has a structure tree.
    pub fn is_tagged(&self) -> bool {
        self.struct_tree.is_some()
    }

    /// Structure tree handle.
    pub fn struct_tree(&self) -> Option<StructTree> {
        self.struct_tree
    }

    /// Next `/StructParents` key; `None` for untagged documents.
    pub fn next_struct_parent_index(&mut self) -> Result<Option<i64>> {
        match self.struct_tree {
            Some(tree) => tree.next_struct_parent_index(&mut self.store).map(Some),
            None => Ok(None),
        }
    }

    /// Document has an interactive form.
    pub fn has_acro_form(&mut self) -> Result<bool> {
        self.catalog.has_acro_form(&mut self.store)
    }

    /// Register a font dictionary; it is flushed at close.
    pub fn add_font(&mut self, font: Dictionary) -> Result<ObjectRef> {
        self.check_open()?;
        let r = self.store.add(Object::Dictionary(font));
        self.fonts.push(r);
        Ok(r)
    }

    /// Fonts registered through [`PdfDocument::add_font`].
    pub fn fonts(&self) -> &[ObjectRef] {
        &self.fonts
    }

    // ---------------------------------------------------------------------
    // Objects and introspection
    // ---------------------------------------------------------------------

    /// Register a new indirect object.
    pub fn add_object(&mut self, object: Object) -> Result<ObjectRef> {
        self.check_open()?;
        Ok(self.store.add(object))
    }

    /// Value of object `r`.
    pub fn object(&mut self, r: ObjectRef) -> Result<&Object> {
        self.store.get(r)
    }

    /// Mutable value of object `r`; marks it modified.
    pub fn object_mut(&mut self, r: ObjectRef) -> Result<&mut Object> {
        self.check_open()?;
        self.store.get_mut(r)
    }

    /// Write object `r` out now.
    pub fn flush_object(&mut self, r: ObjectRef) -> Result<()> {
        self.check_open()?;
        self.store.flush(r)
    }

    /// Force `r` into the output of a full rewrite even if nothing refers to it.
    pub fn mark_object_as_must_be_flushed(&mut self, r: ObjectRef) -> Result<()> {
        let slot = self
            .store
            .xref
            .get_mut(r.id)
            .ok_or(Error::ObjectNotFound(r.id, r.gen))?;
        slot.set_state(RefState::MUST_BE_FLUSHED);
        Ok(())
    }

    /// Object `number`, or `None` when the slot is unassigned or free.
    pub fn get_pdf_object(&mut self, number: u32) -> Result<Option<&Object>> {
        let r = match self.store.xref().get(number) {
            Some(slot) if !slot.is_free() => slot.to_ref(),
            _ => return Ok(None),
        };
        self.store.get(r).map(Some)
    }

    /// References of every assigned slot except the free-list head.
    pub fn list_indirect_references(&self) -> Vec<ObjectRef> {
        self.store
            .xref()
            .iter()
            .filter(|slot| slot.number() != 0)
            .map(|slot| slot.to_ref())
            .collect()
    }

    /// Size of the reference table, the trailer `/Size`.
    pub fn number_of_indirect_objects(&self) -> usize {
        self.store.xref().size()
    }

    /// Trailer carried over from the source (empty for new documents).
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Catalog wrapper.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Editable view of the info dictionary.
    pub fn document_info(&mut self) -> Result<DocumentInfo<'_>> {
        self.check_open()?;
        Ok(DocumentInfo::new(self.store.dict_mut(self.info)?))
    }

    /// Info dictionary reference.
    pub fn info_ref(&self) -> ObjectRef {
        self.info
    }

    /// Version written to the header (or `/Version` in an append).
    pub fn pdf_version(&self) -> &str {
        &self.pdf_version
    }

    /// First `/ID` string.
    pub fn original_document_id(&self) -> &[u8] {
        &self.original_id
    }

    /// Second `/ID` string.
    pub fn modified_document_id(&self) -> &[u8] {
        &self.modified_id
    }

    /// Process-unique id of this document.
    pub fn document_id(&self) -> u64 {
        self.store.document_id()
    }

    /// The document has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closing writes an incremental update.
    pub fn is_append_mode(&self) -> bool {
        self.store.is_append_mode()
    }

    /// Source reader, until it is released.
    pub fn reader(&self) -> Option<&PdfReader> {
        self.store.reader.as_ref()
    }

    /// Output writer, until it is released.
    pub fn writer(&self) -> Option<&PdfWriter<W>> {
        self.store.writer.as_ref()
    }

    /// Take the writer out, e.g. after closing with the close-writer flag cleared.
    pub fn take_writer(&mut self) -> Option<PdfWriter<W>> {
        self.store.writer.take()
    }

    /// Object store.
    pub fn store(&mut self) -> &mut DocumentStore<W> {
        &mut self.store
    }

    /// Write unreachable objects in a full rewrite instead of freeing them.
    pub fn set_flush_unused_objects(&mut self, flush: bool) -> Result<()> {
        self.check_open()?;
        self.properties.flush_unused_objects = flush;
        Ok(())
    }

    /// Release the reader on close.
    pub fn set_close_reader(&mut self, close: bool) {
        self.properties.close_reader = close;
    }

    /// Release the writer on close.
    pub fn set_close_writer(&mut self, close: bool) {
        self.properties.close_writer = close;
    }
}

/// `candidate` names a later version than `current` (`"1.4"` style).
fn is_newer_version(candidate: &str, current: &str) -> bool {
    let parse = |v: &str| -> (u32, u32) {
        let mut parts = v.trim().splitn(2, '.');
        let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        (major, minor)
    };
    parse(candidate) > parse(current)
}
