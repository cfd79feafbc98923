//! Writer collaborator.
//!
//! Wraps the output sink, tracks the byte position used for xref offsets,
//! serializes indirect objects (through the encryption handler when one is
//! attached) and copies raw bytes for incremental updates.

use crate::config::WriterProperties;
use crate::crypto::EncryptionHandler;
use crate::error::Result;
use crate::object::{Object, ObjectRef};
use crate::serializer::ObjectSerializer;
use std::io::Write;

/// Byte sink with position tracking.
pub struct PdfWriter<W: Write> {
    out: W,
    position: u64,
    properties: WriterProperties,
    serializer: ObjectSerializer,
    crypto: Option<Box<dyn EncryptionHandler>>,
    full_compression: bool,
}

impl<W: Write> PdfWriter<W> {
    /// Wrap `out`. Nothing is written until the document opens.
    pub fn new(out: W, properties: WriterProperties) -> Self {
        let full_compression = properties.full_compression.unwrap_or(false);
        Self {
            out,
            position: 0,
            properties,
            serializer: ObjectSerializer::new(),
            crypto: None,
            full_compression,
        }
    }

    /// Writer with default properties.
    pub fn with_defaults(out: W) -> Self {
        Self::new(out, WriterProperties::default())
    }

    /// Properties the writer was created with.
    pub fn properties(&self) -> &WriterProperties {
        &self.properties
    }

    /// Current output offset; the next object will start here.
    pub fn current_pos(&self) -> u64 {
        self.position
    }

    /// True when the cross-reference section is written as a stream.
    pub fn is_full_compression(&self) -> bool {
        self.full_compression
    }

    /// Switch between classic table and cross-reference stream output.
    pub fn set_full_compression(&mut self, full: bool) {
        self.full_compression = full;
    }

    /// Attach or detach the encryption handler.
    pub fn set_crypto(&mut self, crypto: Option<Box<dyn EncryptionHandler>>) {
        self.crypto = crypto;
    }

    /// Detach and return the encryption handler.
    pub fn take_crypto(&mut self) -> Option<Box<dyn EncryptionHandler>> {
        self.crypto.take()
    }

    /// Whether an encryption handler is attached.
    pub fn has_crypto(&self) -> bool {
        self.crypto.is_some()
    }

    /// Copy bytes verbatim.
    pub fn write_raw_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.out.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Write the file header with a binary marker comment.
    pub fn write_header(&mut self, version: &str) -> std::io::Result<()> {
        let header = format!("%PDF-{}\n", version);
        self.write_raw_bytes(header.as_bytes())?;
        self.write_raw_bytes(b"%\xE2\xE3\xCF\xD3\n")
    }

    /// Serialize one indirect object and return the offset it starts at.
    pub fn write_object(&mut self, r: ObjectRef, obj: &Object) -> Result<u64> {
        let offset = self.position;
        let bytes = self
            .serializer
            .serialize_indirect(r, obj, self.crypto.as_deref())?;
        self.write_raw_bytes(&bytes)?;
        Ok(offset)
    }

    /// Flush the underlying sink.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }

    /// Borrow the underlying sink.
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    /// Unwrap the sink.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> std::fmt::Debug for PdfWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfWriter")
            .field("position", &self.position)
            .field("full_compression", &self.full_compression)
            .field("encrypted", &self.crypto.is_some())
            .finish()
    }
}
