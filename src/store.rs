//! Object store.
//!
//! [`DocumentStore`] joins the xref arena with the reader that objects are
//! lazily loaded from and the writer they are flushed to. Everything above
//! it (page tree, name trees, outlines, structure tree, copying) works
//! through the object-safe [`ObjectStore`] trait, so the same code serves
//! documents with any output type.
//!
//! Flushing an object:
//! 1. hoists every nested [`Object::MustBeIndirect`] into a fresh slot,
//! 2. compresses an unfiltered stream through the codec,
//! 3. consults the conformance checker,
//! 4. marks every referenced, unflushed slot `MUST_BE_FLUSHED`,
//! 5. writes the object and releases its value.

use crate::conformance::{ConformanceChecker, ConformanceKey};
use crate::error::{Error, Result};
use crate::filters::StreamCodec;
use crate::object::{Dictionary, Object, ObjectRef};
use crate::reader::PdfReader;
use crate::writer::PdfWriter;
use crate::xref::{Location, RefState, SectionOptions, XrefTable};
use bytes::Bytes;
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

/// Access to the indirect objects of one document.
pub trait ObjectStore {
    /// Id of the owning document.
    fn document_id(&self) -> u64;

    /// Value of `r`, loading it from the source if needed.
    fn get(&mut self, r: ObjectRef) -> Result<&Object>;

    /// Mutable value of `r`; marks the slot modified.
    fn get_mut(&mut self, r: ObjectRef) -> Result<&mut Object>;

    /// Register `object` under a new object number.
    fn add(&mut self, object: Object) -> ObjectRef;

    /// Replace the value of `r`; marks the slot modified.
    fn replace(&mut self, r: ObjectRef, object: Object) -> Result<()>;

    /// Put `r` on the free list. Returns false if it was already free.
    fn free(&mut self, r: ObjectRef) -> bool;

    /// `r` has been written out.
    fn is_flushed(&self, r: ObjectRef) -> bool;

    /// `r` is on the free list or unknown.
    fn is_free(&self, r: ObjectRef) -> bool;

    /// `r` changed since it was read or created.
    fn is_modified(&self, r: ObjectRef) -> bool;

    /// Serialize `r` now. A no-op for flushed or free slots.
    fn flush(&mut self, r: ObjectRef) -> Result<()>;

    /// Writing an incremental update.
    fn is_append_mode(&self) -> bool;

    /// Clone of the dictionary behind `r`.
    fn dict(&mut self, r: ObjectRef) -> Result<Dictionary> {
        let object = self.get(r)?;
        object
            .as_dict()
            .cloned()
            .ok_or_else(|| Error::wrong_type("Dictionary", object.type_name()))
    }

    /// Mutable dictionary behind `r`; marks the slot modified.
    fn dict_mut(&mut self, r: ObjectRef) -> Result<&mut Dictionary> {
        let object = self.get_mut(r)?;
        let found = object.type_name();
        object
            .as_dict_mut()
            .ok_or_else(|| Error::wrong_type("Dictionary", found))
    }

    /// Follow `object` if it is a reference; clone it otherwise.
    fn resolve(&mut self, object: &Object) -> Result<Object> {
        match object {
            Object::Reference(r) => self.get(*r).cloned(),
            other => Ok(other.clone()),
        }
    }
}

/// The xref arena with its reader and writer.
pub struct DocumentStore<W: Write> {
    pub(crate) xref: XrefTable,
    pub(crate) reader: Option<PdfReader>,
    pub(crate) writer: Option<PdfWriter<W>>,
    document_id: u64,
    codec: Arc<dyn StreamCodec>,
    checker: Arc<dyn ConformanceChecker>,
    append_mode: bool,
    compress_streams: bool,
    closing: bool,
}

impl<W: Write> DocumentStore<W> {
    pub(crate) fn new(
        document_id: u64,
        reader: Option<PdfReader>,
        writer: Option<PdfWriter<W>>,
        codec: Arc<dyn StreamCodec>,
        checker: Arc<dyn ConformanceChecker>,
    ) -> Self {
        let compress_streams = writer
            .as_ref()
            .map_or(false, |w| w.properties().effective_compression_level() > 0);
        Self {
            xref: XrefTable::new(),
            reader,
            writer,
            document_id,
            codec,
            checker,
            append_mode: false,
            compress_streams,
            closing: false,
        }
    }

    pub(crate) fn set_append_mode(&mut self, append: bool) {
        self.append_mode = append;
    }

    pub(crate) fn set_closing(&mut self, closing: bool) {
        self.closing = closing;
    }

    /// Stream codec shared with the reader side.
    pub fn codec(&self) -> &dyn StreamCodec {
        self.codec.as_ref()
    }

    /// Conformance checker consulted at checkpoints.
    pub fn checker(&self) -> &dyn ConformanceChecker {
        self.checker.as_ref()
    }

    /// The indirect reference table.
    pub fn xref(&self) -> &XrefTable {
        &self.xref
    }

    /// Copy every entry of the reader's chain into the table.
    pub(crate) fn register_source_entries(&mut self) {
        let Some(reader) = self.reader.as_ref() else {
            return;
        };
        for (number, entry) in reader.entries() {
            match entry {
                crate::reader::SourceEntry::InUse { offset, generation } => {
                    self.xref
                        .register_source(number, generation, Location::Offset(offset))
                },
                crate::reader::SourceEntry::Compressed { stream, index } => self
                    .xref
                    .register_source(number, 0, Location::Compressed { stream, index }),
                crate::reader::SourceEntry::Free { generation } => {
                    self.xref.register_source_free(number, generation)
                },
            }
        }
    }

    fn ensure_loaded(&mut self, r: ObjectRef) -> Result<()> {
        let slot = self
            .xref
            .get(r.id)
            .ok_or(Error::ObjectNotFound(r.id, r.gen))?;
        if slot.is_free() {
            return Err(Error::ObjectFreed(slot.to_ref()));
        }
        if slot.is_flushed() {
            return Err(Error::ObjectFlushed(slot.to_ref()));
        }
        if slot.object().is_some() {
            return Ok(());
        }
        let location = slot.location();
        let object = match (location, self.reader.as_mut()) {
            (Location::New, _) => Object::Null,
            (_, Some(reader)) => reader.resolve(r.id)?,
            (_, None) => return Err(Error::ObjectNotFound(r.id, r.gen)),
        };
        if let Some(slot) = self.xref.get_mut(r.id) {
            slot.set_object(object);
        }
        Ok(())
    }

    fn slot_loaded(&self, number: u32) -> bool {
        self.xref.get(number).is_some_and(|s| s.object().is_some())
    }

    /// Move nested must-be-indirect values into their own slots.
    fn hoist_indirect(&mut self, object: &mut Object) {
        match object {
            Object::MustBeIndirect(_) => {
                if let Object::MustBeIndirect(inner) = std::mem::replace(object, Object::Null) {
                    let r = self.xref.create_next_indirect_reference();
                    if let Some(slot) = self.xref.get_mut(r.id) {
                        slot.set_object(*inner);
                        slot.set_state(RefState::MUST_BE_FLUSHED);
                    }
                    *object = Object::Reference(r);
                }
            },
            Object::Array(items) => items.iter_mut().for_each(|item| self.hoist_indirect(item)),
            Object::Dictionary(dict) | Object::Stream { dict, .. } => {
                dict.values_mut().for_each(|value| self.hoist_indirect(value))
            },
            _ => {},
        }
    }

    fn compress(&self, r: ObjectRef, object: &mut Object) -> Result<()> {
        let Object::Stream { dict, data } = object else {
            return Ok(());
        };
        let skip = !self.compress_streams
            || dict.contains_key("Filter")
            || matches!(dict.get("Type").and_then(Object::as_name), Some("Metadata" | "XRef"));
        if skip || data.is_empty() {
            return Ok(());
        }
        let filters = vec!["FlateDecode".to_string()];
        match self.codec.encode(data, &filters) {
            Ok(encoded) => {
                *data = Bytes::from(encoded);
                dict.insert("Filter".into(), Object::name("FlateDecode"));
                Ok(())
            },
            Err(e) if self.closing => {
                log::warn!("Writing stream {} uncompressed: {}", r, e);
                Ok(())
            },
            Err(e) => Err(Error::Encode {
                object: r,
                reason: e.to_string(),
            }),
        }
    }

    fn mark_children(&mut self, owner: ObjectRef, object: &Object) {
        object.for_each_reference(&mut |child| match self.xref.get_mut(child.id) {
            Some(slot) if slot.is_free() => {
                log::warn!("Object {} refers to freed object {}", owner, child)
            },
            Some(slot) if !slot.is_flushed() => slot.set_state(RefState::MUST_BE_FLUSHED),
            Some(_) => {},
            None => log::debug!("Object {} refers to unknown object {}", owner, child),
        });
    }

    fn flush_impl(&mut self, r: ObjectRef) -> Result<()> {
        if self.writer.is_none() {
            return Err(Error::NotInWriteMode);
        }
        let Some(slot) = self.xref.get(r.id) else {
            return Err(Error::ObjectNotFound(r.id, r.gen));
        };
        if slot.is_free() {
            log::warn!("Flush of free object {} ignored", r);
            return Ok(());
        }
        if slot.is_flushed() {
            return Ok(());
        }
        if self.append_mode && !slot.check_state(RefState::MODIFIED) {
            log::info!("Object {} is unchanged; not flushed in append mode", r);
            return Ok(());
        }
        let source_encrypted = self.reader.as_ref().is_some_and(PdfReader::is_encrypted);
        if self.append_mode && source_encrypted && !self.writer.as_ref().is_some_and(PdfWriter::has_crypto) {
            return Err(Error::Encryption(format!(
                "object {} would be written in the clear into an encrypted document",
                r
            )));
        }
        let actual = slot.to_ref();
        self.ensure_loaded(actual)?;
        let mut object = self
            .xref
            .get_mut(r.id)
            .and_then(|slot| slot.take_object())
            .unwrap_or(Object::Null);

        self.hoist_indirect(&mut object);
        let key = if matches!(object, Object::Stream { .. }) {
            ConformanceKey::StreamFlush
        } else {
            ConformanceKey::ObjectFlush
        };
        let prepared = self
            .compress(actual, &mut object)
            .and_then(|()| self.checker.check_object(&object, key));
        if let Err(e) = prepared {
            if let Some(slot) = self.xref.get_mut(r.id) {
                slot.set_object(object);
            }
            return Err(e);
        }
        self.mark_children(actual, &object);

        let writer = self.writer.as_mut().ok_or(Error::NotInWriteMode)?;
        let offset = writer.write_object(actual, &object)?;
        if let Some(slot) = self.xref.get_mut(r.id) {
            slot.mark_flushed(offset);
        }
        log::trace!("Flushed {} at {}", actual, offset);
        Ok(())
    }

    /// Append close: flush loaded slots that changed.
    pub(crate) fn flush_modified_waiting_objects(&mut self, forbidden: &HashSet<u32>) -> Result<()> {
        let mut number = 1;
        while (number as usize) < self.xref.size() {
            let eligible = self.xref.get(number).is_some_and(|s| {
                !s.is_free()
                    && !s.is_flushed()
                    && s.check_state(RefState::MODIFIED)
                    && s.object().is_some()
            });
            if eligible && !forbidden.contains(&number) {
                self.flush_impl(ObjectRef::new(number, 0))?;
            }
            number += 1;
        }
        Ok(())
    }

    /// Full close: flush everything reachable from what was already flushed.
    pub(crate) fn flush_waiting_objects(&mut self, forbidden: &HashSet<u32>) -> Result<()> {
        loop {
            let waiting = self.xref.numbers_where(|s| {
                !s.is_free() && !s.is_flushed() && s.check_state(RefState::MUST_BE_FLUSHED)
            });
            let waiting: Vec<u32> = waiting
                .into_iter()
                .filter(|n| *n != 0 && !forbidden.contains(n))
                .collect();
            if waiting.is_empty() {
                return Ok(());
            }
            for number in waiting {
                match self.flush_impl(ObjectRef::new(number, 0)) {
                    Err(Error::ObjectNotFound(..)) => {
                        log::warn!("Referenced object {} cannot be loaded; freeing it", number);
                        self.xref.free_reference(number);
                    },
                    other => other?,
                }
            }
        }
    }

    /// Full close: write or free whatever was not reached.
    pub(crate) fn sweep_unreached(&mut self, forbidden: &HashSet<u32>, flush_unused: bool) -> Result<()> {
        let mut number = 1;
        while (number as usize) < self.xref.size() {
            let pending = self
                .xref
                .get(number)
                .is_some_and(|s| !s.is_free() && !s.is_flushed());
            if pending && !forbidden.contains(&number) {
                let original_stream = self
                    .xref
                    .get(number)
                    .is_some_and(|s| s.check_state(RefState::ORIGINAL_OBJECT_STREAM));
                if flush_unused && !original_stream {
                    match self.flush_impl(ObjectRef::new(number, 0)) {
                        Ok(()) => {},
                        Err(Error::ObjectNotFound(..)) | Err(Error::Parse { .. }) => {
                            self.xref.free_reference(number);
                        },
                        Err(e) => return Err(e),
                    }
                } else {
                    self.xref.free_reference(number);
                }
            }
            number += 1;
        }
        Ok(())
    }

    /// Append close: free whatever changed but was not written.
    pub(crate) fn free_modified_unflushed(&mut self, forbidden: &HashSet<u32>) {
        let numbers = self.xref.numbers_where(|s| {
            !s.is_free() && !s.is_flushed() && s.check_state(RefState::MODIFIED)
        });
        for number in numbers {
            if !forbidden.contains(&number) {
                log::debug!("Freeing modified but unwritten object {}", number);
                self.xref.free_reference(number);
            }
        }
    }

    /// Write the xref section and trailer through the writer.
    pub(crate) fn write_xref(&mut self, trailer: &Dictionary, options: &SectionOptions) -> Result<u64> {
        let writer = self.writer.as_mut().ok_or(Error::NotInWriteMode)?;
        self.xref
            .write_xref_table_and_trailer(writer, trailer, options, self.codec.as_ref())
    }

    /// Whether `number` holds a value in memory.
    pub fn is_loaded(&self, number: u32) -> bool {
        self.slot_loaded(number)
    }
}

impl<W: Write> ObjectStore for DocumentStore<W> {
    fn document_id(&self) -> u64 {
        self.document_id
    }

    fn get(&mut self, r: ObjectRef) -> Result<&Object> {
        self.ensure_loaded(r)?;
        self.xref
            .get(r.id)
            .and_then(|slot| slot.object())
            .ok_or(Error::ObjectNotFound(r.id, r.gen))
    }

    fn get_mut(&mut self, r: ObjectRef) -> Result<&mut Object> {
        self.ensure_loaded(r)?;
        let slot = self
            .xref
            .get_mut(r.id)
            .ok_or(Error::ObjectNotFound(r.id, r.gen))?;
        slot.set_state(RefState::MODIFIED);
        slot.object_mut().ok_or(Error::ObjectNotFound(r.id, r.gen))
    }

    fn add(&mut self, object: Object) -> ObjectRef {
        let r = self.xref.create_next_indirect_reference();
        if let Some(slot) = self.xref.get_mut(r.id) {
            slot.set_object(object);
        }
        r
    }

    fn replace(&mut self, r: ObjectRef, object: Object) -> Result<()> {
        let slot = self
            .xref
            .get_mut(r.id)
            .ok_or(Error::ObjectNotFound(r.id, r.gen))?;
        if slot.is_free() {
            return Err(Error::ObjectFreed(slot.to_ref()));
        }
        if slot.is_flushed() {
            return Err(Error::ObjectFlushed(slot.to_ref()));
        }
        slot.set_object(object);
        slot.set_state(RefState::MODIFIED);
        Ok(())
    }

    fn free(&mut self, r: ObjectRef) -> bool {
        self.xref.free_reference(r.id)
    }

    fn is_flushed(&self, r: ObjectRef) -> bool {
        self.xref.get(r.id).is_some_and(|s| s.is_flushed())
    }

    fn is_free(&self, r: ObjectRef) -> bool {
        self.xref.get(r.id).map_or(true, |s| s.is_free())
    }

    fn is_modified(&self, r: ObjectRef) -> bool {
        self.xref
            .get(r.id)
            .is_some_and(|s| s.check_state(RefState::MODIFIED))
    }

    fn flush(&mut self, r: ObjectRef) -> Result<()> {
        self.flush_impl(r)
    }

    fn is_append_mode(&self) -> bool {
        self.append_mode
    }
}

impl<W: Write> std::fmt::Debug for DocumentStore<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("document_id", &self.document_id)
            .field("slots", &self.xref.size())
            .field("reader", &self.reader)
            .field("writer", &self.writer)
            .field("append_mode", &self.append_mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::NoopConformanceChecker;
    use crate::filters::StandardCodec;

    fn store() -> DocumentStore<Vec<u8>> {
        DocumentStore::new(
            1,
            None,
            Some(PdfWriter::with_defaults(Vec::new())),
            Arc::new(StandardCodec::default()),
            Arc::new(NoopConformanceChecker),
        )
    }

    #[test]
    fn test_flush_hoists_and_marks_children() {
        let mut store = store();
        let leaf = store.add(Object::Integer(5));
        let parent = store.add(Object::dict([
            ("Leaf", Object::Reference(leaf)),
            ("Inline", Object::MustBeIndirect(Box::new(Object::string("x")))),
        ]));
        store.flush(parent).unwrap();
        assert!(store.is_flushed(parent));
        assert!(store
            .xref
            .get(leaf.id)
            .unwrap()
            .check_state(RefState::MUST_BE_FLUSHED));
        let hoisted = store.xref.get(3).unwrap();
        assert!(hoisted.check_state(RefState::MUST_BE_FLUSHED));
        assert_eq!(hoisted.object(), Some(&Object::string("x")));
    }

    #[test]
    fn test_flushed_objects_are_terminal() {
        let mut store = store();
        let r = store.add(Object::Integer(1));
        store.flush(r).unwrap();
        let written = store.writer.as_ref().unwrap().current_pos();
        store.flush(r).unwrap();
        assert_eq!(store.writer.as_ref().unwrap().current_pos(), written);
        assert!(matches!(store.get_mut(r), Err(Error::ObjectFlushed(_))));
        assert!(matches!(store.replace(r, Object::Null), Err(Error::ObjectFlushed(_))));
    }

    #[test]
    fn test_streams_are_compressed() {
        let mut store = store();
        let r = store.add(Object::stream(Dictionary::new(), vec![b'a'; 500]));
        store.flush(r).unwrap();
        let out = store.writer.take().unwrap().into_inner();
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("/Filter /FlateDecode"));
        assert!(!text.contains(&"a".repeat(500)));
    }

    #[test]
    fn test_read_only_store_cannot_flush() {
        let mut store: DocumentStore<std::io::Sink> = DocumentStore::new(
            1,
            None,
            None,
            Arc::new(StandardCodec::default()),
            Arc::new(NoopConformanceChecker),
        );
        let r = store.add(Object::Null);
        assert!(matches!(store.flush(r), Err(Error::NotInWriteMode)));
    }

    #[test]
    fn test_free_then_access() {
        let mut store = store();
        let r = store.add(Object::Integer(1));
        assert!(store.free(r));
        assert!(store.is_free(r));
        assert!(matches!(store.get(r), Err(Error::ObjectFreed(_))));
    }
}
