//! Indirect reference table.
//!
//! The table is the arena of the object graph: slot `n` holds the
//! [`IndirectReference`] for object number `n`, and every other part of the
//! crate names objects by [`ObjectRef`] handles into it. Slot 0 is the head
//! of the free list with generation 65535.
//!
//! Object numbers are handed out strictly increasing from the high-water
//! mark. A freed number is never reassigned within a session.

use crate::error::{Error, Result};
use crate::filters::StreamCodec;
use crate::object::{Dictionary, Object, ObjectRef};
use crate::writer::PdfWriter;
use bitflags::bitflags;
use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;

/// Generation number of the free-list head.
pub const MAX_GENERATION: u16 = 65535;

bitflags! {
    /// Transient state bits of an indirect reference.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RefState: u8 {
        /// Value changed since it was read or created
        const MODIFIED = 1 << 0;
        /// Value has been serialized; terminal
        const FLUSHED = 1 << 1;
        /// Referenced from a flushed object and waiting to be written
        const MUST_BE_FLUSHED = 1 << 2;
        /// Read from an object stream of the source document
        const ORIGINAL_OBJECT_STREAM = 1 << 3;
        /// Slot is on the free list
        const FREE = 1 << 4;
    }
}

/// Where a slot's value lives in the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Created in this session
    New,
    /// Byte offset of `N G obj` in the source
    Offset(u64),
    /// Entry `index` of object stream `stream`
    Compressed {
        /// Object number of the containing object stream
        stream: u32,
        /// Index inside the stream
        index: u32,
    },
}

/// One slot of the table.
#[derive(Debug, Clone)]
pub struct IndirectReference {
    number: u32,
    generation: u16,
    location: Location,
    written_at: Option<u64>,
    state: RefState,
    object: Option<Object>,
}

impl IndirectReference {
    fn new(number: u32, generation: u16, location: Location, state: RefState) -> Self {
        Self {
            number,
            generation,
            location,
            written_at: None,
            state,
            object: None,
        }
    }

    /// Object number.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Generation number.
    pub fn generation(&self) -> u16 {
        self.generation
    }

    /// Handle naming this slot.
    pub fn to_ref(&self) -> ObjectRef {
        ObjectRef::new(self.number, self.generation)
    }

    /// Source location.
    pub fn location(&self) -> Location {
        self.location
    }

    /// Output offset once written.
    pub fn written_at(&self) -> Option<u64> {
        self.written_at
    }

    /// Current state bits.
    pub fn state(&self) -> RefState {
        self.state
    }

    /// True if all bits of `state` are set.
    pub fn check_state(&self, state: RefState) -> bool {
        self.state.contains(state)
    }

    /// Set state bits.
    pub fn set_state(&mut self, state: RefState) {
        self.state.insert(state);
    }

    /// Clear state bits.
    pub fn clear_state(&mut self, state: RefState) {
        self.state.remove(state);
    }

    /// Slot is free.
    pub fn is_free(&self) -> bool {
        self.state.contains(RefState::FREE)
    }

    /// Slot has been serialized.
    pub fn is_flushed(&self) -> bool {
        self.state.contains(RefState::FLUSHED)
    }

    /// In-memory value, if loaded.
    pub fn object(&self) -> Option<&Object> {
        self.object.as_ref()
    }

    pub(crate) fn object_mut(&mut self) -> Option<&mut Object> {
        self.object.as_mut()
    }

    pub(crate) fn set_object(&mut self, object: Object) {
        self.object = Some(object);
    }

    pub(crate) fn take_object(&mut self) -> Option<Object> {
        self.object.take()
    }

    /// Mark written at `offset`, release the value and clear pending bits.
    pub(crate) fn mark_flushed(&mut self, offset: u64) {
        self.written_at = Some(offset);
        self.object = None;
        self.state.insert(RefState::FLUSHED);
        self.state.remove(RefState::MUST_BE_FLUSHED);
    }
}

/// Entry kinds of an emitted cross-reference section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Free { next: u32, generation: u16 },
    InUse { offset: u64, generation: u16 },
}

/// Parameters of one emitted cross-reference section.
#[derive(Debug, Clone)]
pub struct SectionOptions {
    /// Only changed slots are listed; `/Prev` chains to `prev`
    pub append: bool,
    /// Offset of the previous section in append mode
    pub prev: Option<u64>,
    /// The `/ID` array
    pub file_id: Object,
}

/// The indirect reference table.
#[derive(Debug, Clone)]
pub struct XrefTable {
    slots: Vec<Option<IndirectReference>>,
}

impl Default for XrefTable {
    fn default() -> Self {
        Self::new()
    }
}

impl XrefTable {
    /// Empty table holding only the free-list head.
    pub fn new() -> Self {
        let head = IndirectReference::new(0, MAX_GENERATION, Location::New, RefState::FREE);
        Self {
            slots: vec![Some(head)],
        }
    }

    /// Number of slots including slot 0; the trailer `/Size`.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Allocate the next object number (generation 0), marked modified.
    pub fn create_next_indirect_reference(&mut self) -> ObjectRef {
        let number = self.slots.len() as u32;
        self.slots.push(Some(IndirectReference::new(
            number,
            0,
            Location::New,
            RefState::MODIFIED,
        )));
        ObjectRef::new(number, 0)
    }

    /// Slot for `number`, if assigned.
    pub fn get(&self, number: u32) -> Option<&IndirectReference> {
        self.slots.get(number as usize).and_then(Option::as_ref)
    }

    /// Mutable slot for `number`, if assigned.
    pub fn get_mut(&mut self, number: u32) -> Option<&mut IndirectReference> {
        self.slots.get_mut(number as usize).and_then(Option::as_mut)
    }

    /// Slot for `r`, checking the generation.
    pub fn get_ref(&self, r: ObjectRef) -> Option<&IndirectReference> {
        self.get(r.id).filter(|slot| slot.generation == r.gen || slot.is_free())
    }

    fn ensure_len(&mut self, number: u32) {
        if self.slots.len() <= number as usize {
            self.slots.resize(number as usize + 1, None);
        }
    }

    /// Register an in-use slot found in the source document.
    pub fn register_source(&mut self, number: u32, generation: u16, location: Location) {
        if number == 0 {
            return;
        }
        self.ensure_len(number);
        let mut state = RefState::empty();
        if matches!(location, Location::Compressed { .. }) {
            state.insert(RefState::ORIGINAL_OBJECT_STREAM);
        }
        self.slots[number as usize] =
            Some(IndirectReference::new(number, generation, location, state));
    }

    /// Register a free entry found in the source document.
    pub fn register_source_free(&mut self, number: u32, generation: u16) {
        if number == 0 {
            return;
        }
        self.ensure_len(number);
        self.slots[number as usize] = Some(IndirectReference::new(
            number,
            generation,
            Location::New,
            RefState::FREE,
        ));
    }

    /// Mark every unassigned number below the high-water mark free.
    ///
    /// Run once after loading so the flush pass skips those numbers and new
    /// allocations continue above the source's largest object number.
    pub fn init_free_references_list(&mut self) -> usize {
        let mut freed = 0;
        for (number, slot) in self.slots.iter_mut().enumerate().skip(1) {
            if slot.is_none() {
                *slot = Some(IndirectReference::new(
                    number as u32,
                    0,
                    Location::New,
                    RefState::FREE,
                ));
                freed += 1;
            }
        }
        freed
    }

    /// Put a slot on the free list. The value is dropped and the next
    /// generation recorded. Returns false if the slot was already free.
    pub fn free_reference(&mut self, number: u32) -> bool {
        match self.get_mut(number) {
            Some(slot) if number != 0 && !slot.is_free() => {
                if !slot.is_flushed() {
                    slot.object = None;
                }
                slot.state = RefState::FREE | RefState::MODIFIED;
                slot.written_at = None;
                slot.generation = slot.generation.saturating_add(1).min(MAX_GENERATION - 1);
                true
            },
            _ => false,
        }
    }

    /// Iterate over assigned slots in object-number order.
    pub fn iter(&self) -> impl Iterator<Item = &IndirectReference> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Object numbers whose slots satisfy `pred`.
    pub fn numbers_where(&self, pred: impl Fn(&IndirectReference) -> bool) -> Vec<u32> {
        self.iter().filter(|s| pred(s)).map(|s| s.number).collect()
    }

    fn entries(&self, append: bool) -> Vec<(u32, Entry)> {
        let listed: Vec<&IndirectReference> = self
            .iter()
            .filter(|slot| {
                slot.number == 0
                    || !append
                    || slot.is_flushed()
                    || (slot.is_free() && slot.check_state(RefState::MODIFIED))
            })
            .collect();

        let free_numbers: Vec<u32> = listed
            .iter()
            .filter(|s| s.number != 0 && (s.is_free() || s.written_at.is_none()))
            .map(|s| s.number)
            .collect();
        let next_free = |number: u32| -> u32 {
            free_numbers.iter().copied().find(|&n| n > number).unwrap_or(0)
        };

        listed
            .into_iter()
            .map(|slot| {
                let entry = match slot.written_at {
                    Some(offset) if !slot.is_free() => Entry::InUse {
                        offset,
                        generation: slot.generation,
                    },
                    _ => {
                        if !slot.is_free() {
                            log::warn!(
                                "Object {} was never written; listing it as free",
                                slot.to_ref()
                            );
                        }
                        Entry::Free {
                            next: next_free(slot.number),
                            generation: slot.generation,
                        }
                    },
                };
                (slot.number, entry)
            })
            .collect()
    }

    /// Runs of consecutive object numbers: `(first, count)`.
    fn sections(numbers: &[u32]) -> Vec<(u32, u32)> {
        let mut sections: Vec<(u32, u32)> = Vec::new();
        for &n in numbers {
            match sections.last_mut() {
                Some((first, count)) if *first + *count == n => *count += 1,
                _ => sections.push((n, 1)),
            }
        }
        sections
    }

    /// Write the cross-reference section and trailer, then `startxref` and `%%EOF`.
    ///
    /// Emits a classic table or, when the writer is in full-compression mode,
    /// a compressed cross-reference stream (which itself takes a new object
    /// number). `trailer` supplies `/Root`, `/Info`, `/Encrypt` and any keys
    /// carried over from the source; `/Size`, `/ID` and `/Prev` are set here.
    /// Returns the offset of the section.
    pub fn write_xref_table_and_trailer<W: Write>(
        &mut self,
        writer: &mut PdfWriter<W>,
        trailer: &Dictionary,
        options: &SectionOptions,
        codec: &dyn StreamCodec,
    ) -> Result<u64> {
        let stream_ref = writer
            .is_full_compression()
            .then(|| self.create_next_indirect_reference());
        let start = writer.current_pos();
        if let Some(r) = stream_ref {
            if let Some(slot) = self.get_mut(r.id) {
                slot.written_at = Some(start);
                slot.state.insert(RefState::FLUSHED);
            }
        }

        let entries = self.entries(options.append);
        let numbers: Vec<u32> = entries.iter().map(|(n, _)| *n).collect();
        let sections = Self::sections(&numbers);

        let mut dict = Dictionary::new();
        dict.insert("Size".into(), Object::Integer(self.size() as i64));
        for (key, value) in trailer {
            if !matches!(
                key.as_str(),
                "Size" | "Prev" | "ID" | "XRefStm" | "Type" | "W" | "Index" | "Filter"
                    | "DecodeParms" | "Length"
            ) {
                dict.insert(key.clone(), value.clone());
            }
        }
        dict.insert("ID".into(), options.file_id.clone());
        if let Some(prev) = options.prev.filter(|_| options.append) {
            dict.insert("Prev".into(), Object::Integer(prev as i64));
        }

        match stream_ref {
            Some(r) => {
                let max_offset = entries
                    .iter()
                    .map(|(_, e)| match e {
                        Entry::InUse { offset, .. } => *offset,
                        Entry::Free { next, .. } => *next as u64,
                    })
                    .max()
                    .unwrap_or(0);
                let width = bytes_needed(max_offset);
                let mut rows = Vec::with_capacity(entries.len() * (width + 3));
                for (_, entry) in &entries {
                    let (kind, field2, field3) = match *entry {
                        Entry::Free { next, generation } => (0u8, next as u64, generation),
                        Entry::InUse { offset, generation } => (1u8, offset, generation),
                    };
                    rows.push(kind);
                    rows.write_uint::<BigEndian>(field2, width)?;
                    rows.write_u16::<BigEndian>(field3)?;
                }
                let filters = vec!["FlateDecode".to_string()];
                let encoded = codec.encode(&rows, &filters).map_err(|e| Error::Encode {
                    object: r,
                    reason: e.to_string(),
                })?;

                dict.insert("Type".into(), Object::name("XRef"));
                dict.insert(
                    "W".into(),
                    Object::Array(vec![
                        Object::Integer(1),
                        Object::Integer(width as i64),
                        Object::Integer(2),
                    ]),
                );
                dict.insert(
                    "Index".into(),
                    Object::Array(
                        sections
                            .iter()
                            .flat_map(|&(first, count)| {
                                [Object::Integer(first as i64), Object::Integer(count as i64)]
                            })
                            .collect(),
                    ),
                );
                dict.insert("Filter".into(), Object::name("FlateDecode"));
                writer.write_object(r, &Object::stream(dict, encoded))?;
            },
            None => {
                let mut table = Vec::with_capacity(entries.len() * 20 + 32);
                table.extend_from_slice(b"xref\n");
                let mut cursor = entries.iter();
                for &(first, count) in &sections {
                    writeln!(table, "{} {}", first, count)?;
                    for (_, entry) in cursor.by_ref().take(count as usize) {
                        match *entry {
                            Entry::Free { next, generation } => {
                                write!(table, "{:010} {:05} f\r\n", next, generation)?
                            },
                            Entry::InUse { offset, generation } => {
                                write!(table, "{:010} {:05} n\r\n", offset, generation)?
                            },
                        }
                    }
                }
                table.extend_from_slice(b"trailer\n");
                crate::serializer::ObjectSerializer::new().write_object(
                    &mut table,
                    &Object::Dictionary(dict),
                    None,
                )?;
                table.push(b'\n');
                writer.write_raw_bytes(&table)?;
            },
        }

        writer.write_raw_bytes(format!("startxref\n{}\n%%EOF\n", start).as_bytes())?;
        Ok(start)
    }
}

fn bytes_needed(value: u64) -> usize {
    let mut width = 1;
    while width < 8 && value >> (8 * width) != 0 {
        width += 1;
    }
    width
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::StandardCodec;

    fn file_id() -> Object {
        Object::Array(vec![Object::String(vec![1; 16]), Object::String(vec![2; 16])])
    }

    #[test]
    fn test_slot_zero_is_free_head() {
        let table = XrefTable::new();
        let head = table.get(0).unwrap();
        assert!(head.is_free());
        assert_eq!(head.generation(), MAX_GENERATION);
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn test_create_next_is_monotonic() {
        let mut table = XrefTable::new();
        let a = table.create_next_indirect_reference();
        let b = table.create_next_indirect_reference();
        assert_eq!((a.id, b.id), (1, 2));
        assert!(table.get(2).unwrap().check_state(RefState::MODIFIED));
        assert!(table.get(3).is_none());
    }

    #[test]
    fn test_freed_numbers_are_not_reused() {
        let mut table = XrefTable::new();
        let a = table.create_next_indirect_reference();
        assert!(table.free_reference(a.id));
        assert!(!table.free_reference(a.id));
        assert_eq!(table.get(a.id).unwrap().generation(), 1);
        assert_eq!(table.create_next_indirect_reference().id, 2);
    }

    #[test]
    fn test_init_free_references_fills_gaps() {
        let mut table = XrefTable::new();
        table.register_source(1, 0, Location::Offset(15));
        table.register_source(4, 0, Location::Offset(90));
        table.register_source_free(2, 3);
        assert_eq!(table.init_free_references_list(), 1);
        assert!(table.get(3).unwrap().is_free());
        assert_eq!(table.get(2).unwrap().generation(), 3);
        assert_eq!(table.create_next_indirect_reference().id, 5);
    }

    #[test]
    fn test_compressed_source_slot_is_marked() {
        let mut table = XrefTable::new();
        table.register_source(7, 0, Location::Compressed { stream: 3, index: 1 });
        assert!(table
            .get(7)
            .unwrap()
            .check_state(RefState::ORIGINAL_OBJECT_STREAM));
    }

    #[test]
    fn test_sections_split_on_gaps() {
        assert_eq!(XrefTable::sections(&[0, 1, 2, 5, 6, 9]), vec![(0, 3), (5, 2), (9, 1)]);
    }

    #[test]
    fn test_classic_table_layout() {
        let mut table = XrefTable::new();
        let a = table.create_next_indirect_reference();
        let b = table.create_next_indirect_reference();
        let mut writer = PdfWriter::with_defaults(Vec::new());
        writer.write_header("1.7").unwrap();
        let off_a = writer.write_object(a, &Object::Null).unwrap();
        table.get_mut(a.id).unwrap().mark_flushed(off_a);
        table.free_reference(b.id);

        let mut trailer = Dictionary::new();
        trailer.insert("Root".into(), Object::Reference(a));
        let options = SectionOptions {
            append: false,
            prev: Some(99),
            file_id: file_id(),
        };
        let start = table
            .write_xref_table_and_trailer(&mut writer, &trailer, &options, &StandardCodec::default())
            .unwrap();
        let out = writer.into_inner();
        let text = String::from_utf8_lossy(&out[start as usize..]).into_owned();
        let expected_head = format!(
            "xref\n0 3\n0000000002 65535 f\r\n{:010} 00000 n\r\n0000000000 00001 f\r\n",
            off_a
        );
        assert!(text.starts_with(&expected_head), "{}", text);
        assert!(text.contains("/Size 3"));
        assert!(!text.contains("/Prev"));
        assert!(text.ends_with(&format!("startxref\n{}\n%%EOF\n", start)));
    }

    #[test]
    fn test_append_lists_only_changes() {
        let mut table = XrefTable::new();
        for n in 1..=4 {
            table.register_source(n, 0, Location::Offset(n as u64 * 10));
        }
        let mut writer = PdfWriter::with_defaults(Vec::new());
        writer.write_raw_bytes(&[b' '; 200]).unwrap();
        let off = writer.write_object(ObjectRef::new(3, 0), &Object::Integer(1)).unwrap();
        table.get_mut(3).unwrap().mark_flushed(off);

        let options = SectionOptions {
            append: true,
            prev: Some(150),
            file_id: file_id(),
        };
        let start = table
            .write_xref_table_and_trailer(
                &mut writer,
                &Dictionary::new(),
                &options,
                &StandardCodec::default(),
            )
            .unwrap();
        let out = writer.into_inner();
        let text = String::from_utf8_lossy(&out[start as usize..]).into_owned();
        assert!(text.starts_with("xref\n0 1\n0000000000 65535 f\r\n3 1\n"));
        assert!(text.contains("/Prev 150"));
        assert!(text.contains("/Size 5"));
    }

    #[test]
    fn test_xref_stream_output() {
        let mut table = XrefTable::new();
        let a = table.create_next_indirect_reference();
        let mut writer = PdfWriter::with_defaults(Vec::new());
        writer.set_full_compression(true);
        let off = writer.write_object(a, &Object::Null).unwrap();
        table.get_mut(a.id).unwrap().mark_flushed(off);
        let options = SectionOptions {
            append: false,
            prev: None,
            file_id: file_id(),
        };
        let start = table
            .write_xref_table_and_trailer(
                &mut writer,
                &Dictionary::new(),
                &options,
                &StandardCodec::default(),
            )
            .unwrap();
        let out = writer.into_inner();
        let text = String::from_utf8_lossy(&out[start as usize..]).into_owned();
        assert!(text.starts_with("2 0 obj\n"));
        assert!(text.contains("/Type /XRef"));
        assert!(text.contains("/Index [0 3]"));
        assert!(table.get(2).unwrap().is_flushed());
    }

    #[test]
    fn test_bytes_needed() {
        assert_eq!(bytes_needed(0), 1);
        assert_eq!(bytes_needed(255), 1);
        assert_eq!(bytes_needed(256), 2);
        assert_eq!(bytes_needed(70_000), 3);
    }
}
