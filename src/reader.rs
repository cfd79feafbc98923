//! Reader collaborator.
//!
//! Holds the source bytes, reads the cross-reference chain (classic tables,
//! cross-reference streams and hybrid files) and resolves objects by number,
//! including objects packed in object streams.
//!
//! When the chain is unreadable and the reader is lenient, the table is
//! rebuilt by scanning the file for `N G obj` headers. A rebuilt table is
//! reported through [`PdfReader::is_rebuilt_xref`], which rules out
//! append-mode stamping.
//!
//! An encrypted source is decrypted on load when the standard RC4 handler
//! accepts the password from [`ReaderProperties`]. The handler is kept so an
//! incremental update can encrypt with the same key.

use crate::config::ReaderProperties;
use crate::crypto::{EncryptionHandler, StandardRc4Handler};
use crate::error::{Error, Result};
use crate::filters::{decode_stream, StandardCodec, StreamCodec};
use crate::lexer::{skip_ws, token, Token};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::parser::{parse_indirect_object, parse_object, parse_trailer};
use bytes::Bytes;
use lazy_static::lazy_static;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

lazy_static! {
    static ref RE_OBJ_HEADER: regex::bytes::Regex =
        regex::bytes::Regex::new(r"(\d+)\s+(\d+)\s+obj\b").unwrap();
    static ref RE_TRAILER: regex::bytes::Regex = regex::bytes::Regex::new(r"trailer\s*<<").unwrap();
    static ref RE_HEADER: regex::bytes::Regex =
        regex::bytes::Regex::new(r"%PDF-(\d\.\d)").unwrap();
}

/// How far from the end of the file `startxref` is searched for.
const STARTXREF_WINDOW: usize = 2048;

/// One entry of the source cross-reference chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEntry {
    /// Free entry with the generation to use on reuse
    Free {
        /// Next generation
        generation: u16,
    },
    /// Uncompressed object at a byte offset
    InUse {
        /// Offset of the object header
        offset: u64,
        /// Generation number
        generation: u16,
    },
    /// Object stored in an object stream
    Compressed {
        /// Object number of the object stream
        stream: u32,
        /// Index within the stream
        index: u32,
    },
}

/// Summary of the newest trailer.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailerSummary {
    /// `/Root` reference
    pub root: Option<ObjectRef>,
    /// `/Info` reference
    pub info: Option<ObjectRef>,
    /// `/ID` pair, when well formed
    pub ids: Option<(Vec<u8>, Vec<u8>)>,
    /// `/Prev` of the newest section
    pub prev: Option<u64>,
    /// The newest section is a cross-reference stream
    pub used_xref_stream: bool,
}

/// Parsed source document.
pub struct PdfReader {
    data: Bytes,
    properties: ReaderProperties,
    codec: Arc<dyn StreamCodec>,
    header_version: String,
    entries: BTreeMap<u32, SourceEntry>,
    trailer: Dictionary,
    startxref: u64,
    xref_stream: bool,
    rebuilt_xref: bool,
    object_streams: HashMap<u32, Vec<Object>>,
    decryptor: Option<StandardRc4Handler>,
    encrypt_ref: Option<ObjectRef>,
}

impl PdfReader {
    /// Read `data` with default properties.
    pub fn new(data: impl Into<Bytes>) -> Result<Self> {
        Self::with_properties(data, ReaderProperties::default())
    }

    /// Read a file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(std::fs::read(path)?)
    }

    /// Read `data` with the given properties.
    pub fn with_properties(data: impl Into<Bytes>, properties: ReaderProperties) -> Result<Self> {
        Self::with_codec(data, properties, Arc::new(StandardCodec::default()))
    }

    /// Read `data` with a custom stream codec.
    pub fn with_codec(
        data: impl Into<Bytes>,
        properties: ReaderProperties,
        codec: Arc<dyn StreamCodec>,
    ) -> Result<Self> {
        let data = data.into();
        let header_version = match find_header_version(&data) {
            Some(v) => v,
            None if properties.strict => {
                return Err(Error::Parse {
                    offset: 0,
                    reason: "missing %PDF- header".to_string(),
                })
            },
            None => {
                log::warn!("No %PDF- header found; assuming 1.7");
                "1.7".to_string()
            },
        };

        let mut reader = Self {
            data,
            properties,
            codec,
            header_version,
            entries: BTreeMap::new(),
            trailer: Dictionary::new(),
            startxref: 0,
            xref_stream: false,
            rebuilt_xref: false,
            object_streams: HashMap::new(),
            decryptor: None,
            encrypt_ref: None,
        };

        let strict = reader.properties.strict;
        match reader.read_xref_chain() {
            Ok(()) if reader.trailer.contains_key("Root") => {},
            Ok(()) if strict => return Err(Error::InvalidXref("trailer has no /Root".to_string())),
            Err(e) if strict => return Err(e),
            outcome => {
                if let Err(e) = outcome {
                    log::warn!("Cross-reference chain unreadable ({}); rebuilding", e);
                }
                reader.rebuild_xref()?;
            },
        }
        reader.setup_decryption()?;
        log::debug!(
            "Read {} xref entries (stream: {}, rebuilt: {})",
            reader.entries.len(),
            reader.xref_stream,
            reader.rebuilt_xref
        );
        Ok(reader)
    }

    /// The source bytes.
    pub fn original_bytes(&self) -> &Bytes {
        &self.data
    }

    /// Version from the `%PDF-` header.
    pub fn header_version(&self) -> &str {
        &self.header_version
    }

    /// Properties the reader was created with.
    pub fn properties(&self) -> &ReaderProperties {
        &self.properties
    }

    /// Newest trailer dictionary.
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Offset of the newest cross-reference section.
    pub fn startxref(&self) -> u64 {
        self.startxref
    }

    /// The newest section is a cross-reference stream.
    pub fn has_xref_stream(&self) -> bool {
        self.xref_stream
    }

    /// The table was rebuilt by scanning instead of read from the chain.
    pub fn is_rebuilt_xref(&self) -> bool {
        self.rebuilt_xref
    }

    /// Source has an `/Encrypt` entry.
    pub fn is_encrypted(&self) -> bool {
        self.trailer.contains_key("Encrypt")
    }

    /// Handler that decrypts the source, when it is encrypted and the password was accepted.
    pub fn decryptor(&self) -> Option<&StandardRc4Handler> {
        self.decryptor.as_ref()
    }

    /// Merged entries of the chain; newer sections win.
    pub fn entries(&self) -> impl Iterator<Item = (u32, SourceEntry)> + '_ {
        self.entries.iter().map(|(n, e)| (*n, *e))
    }

    /// Entry for one object number.
    pub fn entry(&self, number: u32) -> Option<SourceEntry> {
        self.entries.get(&number).copied()
    }

    /// `/Root`, `/Info`, `/ID` and `/Prev` of the newest trailer.
    pub fn read_trailer_chain(&self) -> TrailerSummary {
        let ids = match self.trailer.get("ID").and_then(Object::as_array) {
            Some(items) if items.len() == 2 => match (items[0].as_string(), items[1].as_string()) {
                (Some(a), Some(b)) => Some((a.to_vec(), b.to_vec())),
                _ => None,
            },
            _ => None,
        };
        TrailerSummary {
            root: self.trailer.get("Root").and_then(Object::as_reference),
            info: self.trailer.get("Info").and_then(Object::as_reference),
            ids,
            prev: self
                .trailer
                .get("Prev")
                .and_then(Object::as_integer)
                .map(|p| p as u64),
            used_xref_stream: self.xref_stream,
        }
    }

    /// Load object `number` from the source.
    pub fn resolve(&mut self, number: u32) -> Result<Object> {
        match self.entries.get(&number).copied() {
            Some(SourceEntry::InUse { offset, generation }) => {
                let (r, object) = self.parse_at(offset)?;
                if r.id != number || r.gen != generation {
                    log::warn!(
                        "Expected object {} {} at offset {}, found {}",
                        number,
                        generation,
                        offset,
                        r
                    );
                }
                Ok(self.decrypt_object(r, object))
            },
            Some(SourceEntry::Compressed { stream, index }) => {
                self.load_object_stream(stream)?;
                self.object_streams
                    .get(&stream)
                    .and_then(|objects| objects.get(index as usize))
                    .cloned()
                    .ok_or(Error::ObjectNotFound(number, 0))
            },
            Some(SourceEntry::Free { generation }) => Err(Error::ObjectNotFound(number, generation)),
            None => Err(Error::ObjectNotFound(number, 0)),
        }
    }

    fn parse_at(&self, offset: u64) -> Result<(ObjectRef, Object)> {
        let start = offset as usize;
        if start >= self.data.len() {
            return Err(Error::Parse {
                offset: start,
                reason: "offset beyond end of file".to_string(),
            });
        }
        let lengths = |r: ObjectRef| self.direct_integer(r);
        parse_indirect_object(&self.data[start..], start, &lengths)
    }

    /// Value of an indirect integer, used for stream `/Length` entries.
    fn direct_integer(&self, r: ObjectRef) -> Option<i64> {
        match self.entries.get(&r.id) {
            Some(SourceEntry::InUse { offset, .. }) => {
                let start = *offset as usize;
                let bytes = self.data.get(start..)?;
                parse_indirect_object(bytes, start, &|_| None)
                    .ok()
                    .and_then(|(_, o)| o.as_integer())
            },
            _ => None,
        }
    }

    fn load_object_stream(&mut self, stream: u32) -> Result<()> {
        if self.object_streams.contains_key(&stream) {
            return Ok(());
        }
        let container = match self.entries.get(&stream).copied() {
            Some(SourceEntry::InUse { offset, .. }) => {
                let (r, container) = self.parse_at(offset)?;
                self.decrypt_object(r, container)
            },
            _ => return Err(Error::ObjectNotFound(stream, 0)),
        };
        let objects = parse_object_stream(self.codec.as_ref(), &container)?
            .into_iter()
            .map(|(_, o)| o)
            .collect();
        self.object_streams.insert(stream, objects);
        Ok(())
    }

    fn setup_decryption(&mut self) -> Result<()> {
        let dict = match self.trailer.get("Encrypt").cloned() {
            None => return Ok(()),
            Some(Object::Reference(r)) => {
                self.encrypt_ref = Some(r);
                self.resolve(r.id)?
            },
            Some(direct) => direct,
        };
        let file_id = self
            .trailer
            .get("ID")
            .and_then(Object::as_array)
            .and_then(|ids| ids.first())
            .and_then(Object::as_string)
            .map(<[u8]>::to_vec)
            .unwrap_or_default();
        let password = self.properties.password.as_deref();
        let handler = dict
            .as_dict()
            .ok_or_else(|| Error::Encryption("/Encrypt is not a dictionary".to_string()))
            .and_then(|dict| {
                StandardRc4Handler::from_encryption_dictionary(dict, &file_id, password.unwrap_or_default())
            });
        match handler {
            Ok(handler) => {
                log::debug!("Decrypting source with {:?}", handler);
                self.decryptor = Some(handler);
            },
            Err(e) if password.is_some() => return Err(e),
            Err(e) => log::warn!("Source is encrypted and cannot be decrypted ({}); reading strings as stored", e),
        }
        Ok(())
    }

    /// Decrypt strings and stream data of a top-level source object.
    fn decrypt_object(&self, r: ObjectRef, object: Object) -> Object {
        match &self.decryptor {
            Some(handler) if self.encrypt_ref.map(|e| e.id) != Some(r.id) => {
                decrypt_value(handler, r, object)
            },
            _ => object,
        }
    }

    fn read_xref_chain(&mut self) -> Result<()> {
        let startxref = find_startxref(&self.data)?;
        self.startxref = startxref;

        let mut visited = HashSet::new();
        let mut next = Some(startxref);
        let mut newest = true;
        while let Some(offset) = next {
            if !visited.insert(offset) {
                log::warn!("Cross-reference chain loops at offset {}", offset);
                break;
            }
            if visited.len() > self.properties.max_xref_chain {
                return Err(Error::InvalidXref(format!(
                    "more than {} chained sections",
                    self.properties.max_xref_chain
                )));
            }
            let (trailer, is_stream) = self.read_section(offset)?;
            if let Some(stm) = trailer.get("XRefStm").and_then(Object::as_integer) {
                if visited.insert(stm as u64) {
                    self.read_section(stm as u64)?;
                }
            }
            next = trailer
                .get("Prev")
                .and_then(Object::as_integer)
                .map(|p| p as u64);
            if newest {
                self.trailer = trailer;
                self.xref_stream = is_stream;
                newest = false;
            }
        }
        Ok(())
    }

    fn read_section(&mut self, offset: u64) -> Result<(Dictionary, bool)> {
        let start = offset as usize;
        let section = self.data.get(start..).ok_or_else(|| {
            Error::InvalidXref(format!("startxref {} beyond end of file", offset))
        })?;
        let body = skip_ws(section);
        if body.starts_with(b"xref") {
            let mut found = Vec::new();
            let trailer_at = parse_classic_table(&body[4..], start, &mut found)?;
            for (number, entry) in found {
                self.entries.entry(number).or_insert(entry);
            }
            let consumed = section.len() - body.len() + 4 + trailer_at;
            let trailer = parse_trailer(&section[consumed..], start + consumed)?;
            Ok((trailer, false))
        } else {
            let (_, stream) = self.parse_at(offset)?;
            if stream.dict_type() != Some("XRef") {
                return Err(Error::InvalidXref(format!(
                    "no cross-reference section at offset {}",
                    offset
                )));
            }
            let found = parse_xref_stream(self.codec.as_ref(), &stream)?;
            for (number, entry) in found {
                self.entries.entry(number).or_insert(entry);
            }
            let trailer = stream.as_dict().cloned().unwrap_or_default();
            Ok((trailer, true))
        }
    }

    fn rebuild_xref(&mut self) -> Result<()> {
        log::info!("Reconstructing xref table by scanning file...");
        self.entries.clear();
        self.object_streams.clear();
        self.rebuilt_xref = true;
        self.xref_stream = false;

        let data = self.data.clone();
        let mut object_streams = Vec::new();
        let mut catalog = None;
        for capture in RE_OBJ_HEADER.captures_iter(&data) {
            let (Some(whole), Some(num), Some(gen)) =
                (capture.get(0), capture.get(1), capture.get(2))
            else {
                continue;
            };
            let (Some(number), Some(generation)) = (
                parse_decimal::<u32>(num.as_bytes()),
                parse_decimal::<u16>(gen.as_bytes()),
            ) else {
                continue;
            };
            let offset = whole.start() as u64;
            self.entries
                .insert(number, SourceEntry::InUse { offset, generation });
            if let Ok((_, object)) = self.parse_at(offset) {
                match object.dict_type() {
                    Some("ObjStm") => object_streams.push((number, object)),
                    Some("Catalog") => catalog = Some(ObjectRef::new(number, generation)),
                    _ => {},
                }
            }
        }
        if self.entries.is_empty() {
            return Err(Error::InvalidXref("no objects found while scanning".to_string()));
        }

        for (stream, container) in object_streams {
            match parse_object_stream(self.codec.as_ref(), &container) {
                Ok(objects) => {
                    for (index, (number, object)) in objects.into_iter().enumerate() {
                        if object.dict_type() == Some("Catalog") && catalog.is_none() {
                            catalog = Some(ObjectRef::new(number, 0));
                        }
                        self.entries.entry(number).or_insert(SourceEntry::Compressed {
                            stream,
                            index: index as u32,
                        });
                    }
                },
                Err(e) => log::warn!("Skipping unreadable object stream {}: {}", stream, e),
            }
        }

        let mut trailer = RE_TRAILER
            .find_iter(&data)
            .last()
            .and_then(|m| parse_trailer(&data[m.start()..], m.start()).ok())
            .unwrap_or_default();
        let root_valid = trailer
            .get("Root")
            .and_then(Object::as_reference)
            .is_some_and(|r| self.entries.contains_key(&r.id));
        if !root_valid {
            let root = catalog.ok_or_else(|| {
                Error::InvalidXref("no catalog found while scanning".to_string())
            })?;
            trailer.insert("Root".into(), Object::Reference(root));
        }
        let size = self.entries.keys().next_back().map_or(1, |n| n + 1);
        trailer.insert("Size".into(), Object::Integer(size as i64));
        trailer.shift_remove("Prev");
        self.trailer = trailer;
        log::info!("Rebuilt xref with {} objects", self.entries.len());
        Ok(())
    }
}

impl std::fmt::Debug for PdfReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfReader")
            .field("len", &self.data.len())
            .field("header_version", &self.header_version)
            .field("entries", &self.entries.len())
            .field("xref_stream", &self.xref_stream)
            .field("rebuilt_xref", &self.rebuilt_xref)
            .finish()
    }
}

fn decrypt_value(handler: &StandardRc4Handler, r: ObjectRef, object: Object) -> Object {
    match object {
        Object::String(data) => Object::String(handler.decrypt(r.id, r.gen, &data)),
        Object::Array(items) => {
            Object::Array(items.into_iter().map(|o| decrypt_value(handler, r, o)).collect())
        },
        Object::Dictionary(dict) => Object::Dictionary(decrypt_dict(handler, r, dict)),
        Object::Stream { dict, data } => {
            let untouched = match dict.get("Type").and_then(Object::as_name) {
                Some("XRef") => true,
                Some("Metadata") => !handler.encrypt_metadata(),
                _ => false,
            };
            let data = if untouched {
                data
            } else {
                Bytes::from(handler.decrypt(r.id, r.gen, &data))
            };
            Object::Stream {
                dict: decrypt_dict(handler, r, dict),
                data,
            }
        },
        other => other,
    }
}

fn decrypt_dict(handler: &StandardRc4Handler, r: ObjectRef, dict: Dictionary) -> Dictionary {
    dict.into_iter()
        .map(|(key, value)| (key, decrypt_value(handler, r, value)))
        .collect()
}

fn parse_decimal<T: std::str::FromStr>(bytes: &[u8]) -> Option<T> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

fn find_header_version(data: &[u8]) -> Option<String> {
    let window = &data[..data.len().min(1024)];
    let capture = RE_HEADER.captures(window)?;
    std::str::from_utf8(capture.get(1)?.as_bytes())
        .ok()
        .map(str::to_string)
}

fn find_startxref(data: &[u8]) -> Result<u64> {
    let tail_start = data.len().saturating_sub(STARTXREF_WINDOW);
    let tail = &data[tail_start..];
    let pos = tail
        .windows(b"startxref".len())
        .rposition(|w| w == b"startxref")
        .ok_or_else(|| Error::InvalidXref("startxref not found".to_string()))?;
    match token(&tail[pos + b"startxref".len()..]) {
        Ok((_, Token::Integer(n))) if n >= 0 => Ok(n as u64),
        _ => Err(Error::InvalidXref("startxref has no offset".to_string())),
    }
}

fn read_uint(input: &[u8]) -> Option<(&[u8], u64)> {
    let input = skip_ws(input);
    let len = input.iter().take_while(|c| c.is_ascii_digit()).count();
    if len == 0 {
        return None;
    }
    let value = parse_decimal(&input[..len])?;
    Some((&input[len..], value))
}

/// Parse subsections after the `xref` keyword. Returns the position of `trailer`
/// relative to `input`.
fn parse_classic_table(
    input: &[u8],
    base: usize,
    found: &mut Vec<(u32, SourceEntry)>,
) -> Result<usize> {
    let bad = |reason: &str| Error::InvalidXref(format!("{} (section at {})", reason, base));
    let mut cursor = input;
    loop {
        let trimmed = skip_ws(cursor);
        if trimmed.starts_with(b"trailer") {
            return Ok(input.len() - trimmed.len());
        }
        let (rest, first) = read_uint(trimmed).ok_or_else(|| bad("bad subsection header"))?;
        let (rest, count) = read_uint(rest).ok_or_else(|| bad("bad subsection header"))?;
        cursor = rest;
        for i in 0..count {
            let (rest, field1) = read_uint(cursor).ok_or_else(|| bad("truncated entry"))?;
            let (rest, field2) = read_uint(rest).ok_or_else(|| bad("truncated entry"))?;
            let rest = skip_ws(rest);
            let number = (first + i) as u32;
            let generation = field2.min(u16::MAX as u64) as u16;
            match rest.first() {
                Some(b'n') => found.push((
                    number,
                    SourceEntry::InUse {
                        offset: field1,
                        generation,
                    },
                )),
                Some(b'f') => found.push((number, SourceEntry::Free { generation })),
                _ => return Err(bad("entry type is neither 'n' nor 'f'")),
            }
            cursor = &rest[1..];
        }
    }
}

fn parse_xref_stream(codec: &dyn StreamCodec, stream: &Object) -> Result<Vec<(u32, SourceEntry)>> {
    let dict = stream
        .as_dict()
        .ok_or_else(|| Error::wrong_type("Stream", stream.type_name()))?;
    let widths: Vec<usize> = dict
        .get("W")
        .and_then(Object::as_array)
        .map(|w| {
            w.iter()
                .map(|o| o.as_integer().unwrap_or(0).max(0) as usize)
                .collect()
        })
        .unwrap_or_default();
    if widths.len() != 3 || widths.iter().any(|&w| w > 8) {
        return Err(Error::InvalidXref("bad /W in cross-reference stream".to_string()));
    }
    let size = dict.get("Size").and_then(Object::as_integer).unwrap_or(0);
    let index: Vec<i64> = match dict.get("Index").and_then(Object::as_array) {
        Some(items) => items.iter().filter_map(Object::as_integer).collect(),
        None => vec![0, size],
    };

    let data = decode_stream(codec, stream)?;
    let row_len: usize = widths.iter().sum();
    if row_len == 0 {
        return Err(Error::InvalidXref("zero-width cross-reference rows".to_string()));
    }
    let mut rows = data.chunks_exact(row_len);
    let mut found = Vec::new();
    for pair in index.chunks_exact(2) {
        let (first, count) = (pair[0].max(0) as u32, pair[1].max(0) as u32);
        for number in first..first.saturating_add(count) {
            let Some(row) = rows.next() else {
                log::warn!("Cross-reference stream shorter than its /Index");
                return Ok(found);
            };
            let (f1, rest) = row.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            let kind = if widths[0] == 0 { 1 } else { be_uint(f1) };
            let entry = match kind {
                0 => SourceEntry::Free {
                    generation: be_uint(f3) as u16,
                },
                1 => SourceEntry::InUse {
                    offset: be_uint(f2),
                    generation: be_uint(f3) as u16,
                },
                2 => SourceEntry::Compressed {
                    stream: be_uint(f2) as u32,
                    index: be_uint(f3) as u32,
                },
                other => {
                    log::debug!("Ignoring xref entry of type {} for object {}", other, number);
                    continue;
                },
            };
            found.push((number, entry));
        }
    }
    Ok(found)
}

fn be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Parse an `/ObjStm` container into `(number, object)` pairs in index order.
pub fn parse_object_stream(codec: &dyn StreamCodec, container: &Object) -> Result<Vec<(u32, Object)>> {
    if container.dict_type() != Some("ObjStm") {
        return Err(Error::wrong_type("ObjStm", container.dict_type().unwrap_or("untyped")));
    }
    let count = |key: &str| {
        let value = container
            .get(key)
            .and_then(Object::as_integer)
            .ok_or_else(|| Error::Decode(format!("object stream has no /{}", key)))?;
        usize::try_from(value).map_err(|_| Error::Decode(format!("object stream /{} is {}", key, value)))
    };
    let n = count("N")?;
    let first = count("First")?;
    let data = decode_stream(codec, container)?;
    if first > data.len() {
        return Err(Error::Decode("object stream /First beyond data".to_string()));
    }
    // each header pair takes at least four bytes
    if n > first / 4 + 1 {
        return Err(Error::Decode(format!("object stream /N {} exceeds its header", n)));
    }

    let mut header = &data[..first];
    let mut pairs = Vec::with_capacity(n);
    for _ in 0..n {
        let (rest, number) = read_uint(header)
            .ok_or_else(|| Error::Decode("truncated object stream header".to_string()))?;
        let (rest, offset) = read_uint(rest)
            .ok_or_else(|| Error::Decode("truncated object stream header".to_string()))?;
        pairs.push((number as u32, offset as usize));
        header = rest;
    }

    pairs
        .into_iter()
        .map(|(number, offset)| {
            let start = first
                .checked_add(offset)
                .ok_or_else(|| Error::Decode(format!("object {} offset overflows", number)))?;
            let body = data
                .get(start..)
                .ok_or_else(|| Error::Decode(format!("object {} beyond stream data", number)))?;
            let (_, object) = parse_object(body).map_err(|_| Error::Parse {
                offset: start,
                reason: format!("malformed object {} in object stream", number),
            })?;
            Ok((number, object))
        })
        .collect()
}
