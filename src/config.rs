//! Configuration for reading, writing and stamping documents.
//!
//! All property structs follow the same pattern: public fields, a
//! `Default`, and chainable `with_*` setters.
//!
//! # Example
//!
//! ```
//! use pdf_graph::config::{StampingProperties, WriterProperties};
//!
//! let writer = WriterProperties::default()
//!     .with_full_compression(true)
//!     .with_compression_level(9);
//! let stamping = StampingProperties::default().with_append_mode(true);
//! assert!(stamping.append_mode);
//! assert_eq!(writer.full_compression, Some(true));
//! ```

use crate::conformance::{ConformanceChecker, NoopConformanceChecker};
use crate::crypto::EncryptionProperties;
use crate::doc_id::DocumentIdSource;
use crate::filters::{StandardCodec, StreamCodec};
use crate::page::{DefaultPageFactory, PageFactory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Header version written for new documents.
pub const DEFAULT_PDF_VERSION: &str = "1.7";

/// Options for the reader collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderProperties {
    /// Fail instead of reconstructing a broken cross-reference table
    pub strict: bool,
    /// Maximum number of `/Prev` sections followed
    pub max_xref_chain: usize,
    /// User or owner password of an encrypted source; `None` tries the empty password
    pub password: Option<Vec<u8>>,
}

impl Default for ReaderProperties {
    fn default() -> Self {
        Self {
            strict: false,
            max_xref_chain: 100,
            password: None,
        }
    }
}

impl ReaderProperties {
    /// Strict mode: no xref reconstruction.
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// Password for an encrypted source.
    pub fn with_password(mut self, password: impl AsRef<[u8]>) -> Self {
        self.password = Some(password.as_ref().to_vec());
        self
    }
}

/// Options for the writer collaborator.
#[derive(Debug, Clone, Default)]
pub struct WriterProperties {
    /// Header version; `None` keeps the source version or uses [`DEFAULT_PDF_VERSION`]
    pub pdf_version: Option<String>,
    /// Write a compressed cross-reference stream instead of a classic table.
    /// `None` follows the source document, or a classic table for new documents.
    pub full_compression: Option<bool>,
    /// zlib level for stream compression; 0 disables compression of new streams
    pub compression_level: Option<u32>,
    /// Replaces the original (first) document ID
    pub initial_document_id: Option<Vec<u8>>,
    /// Replaces the modified (second) document ID
    pub modified_document_id: Option<Vec<u8>>,
    /// Attach a generated XMP metadata stream at close
    pub add_xmp_metadata: bool,
    /// Encrypt the output with the standard security handler
    pub encryption: Option<EncryptionProperties>,
}

impl WriterProperties {
    /// Create default writer properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the header version.
    pub fn with_pdf_version(mut self, version: impl Into<String>) -> Self {
        self.pdf_version = Some(version.into());
        self
    }

    /// Force classic table (`false`) or cross-reference stream (`true`).
    pub fn with_full_compression(mut self, full: bool) -> Self {
        self.full_compression = Some(full);
        self
    }

    /// Set the zlib level for new streams.
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = Some(level.min(9));
        self
    }

    /// Override the original document ID.
    pub fn with_initial_document_id(mut self, id: impl Into<Vec<u8>>) -> Self {
        self.initial_document_id = Some(id.into());
        self
    }

    /// Override the modified document ID.
    pub fn with_modified_document_id(mut self, id: impl Into<Vec<u8>>) -> Self {
        self.modified_document_id = Some(id.into());
        self
    }

    /// Attach XMP metadata at close.
    pub fn with_xmp_metadata(mut self, add: bool) -> Self {
        self.add_xmp_metadata = add;
        self
    }

    /// Encrypt the output.
    pub fn with_encryption(mut self, encryption: EncryptionProperties) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Effective compression level.
    pub fn effective_compression_level(&self) -> u32 {
        self.compression_level.unwrap_or(6)
    }
}

/// Options for read+write documents.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StampingProperties {
    /// Incremental update instead of a full rewrite
    pub append_mode: bool,
    /// Keep the source `/Encrypt` dictionary when appending
    pub preserve_encryption: bool,
}

impl StampingProperties {
    /// Select incremental update.
    pub fn with_append_mode(mut self, append: bool) -> Self {
        self.append_mode = append;
        self
    }

    /// Keep source encryption.
    pub fn with_preserve_encryption(mut self, preserve: bool) -> Self {
        self.preserve_encryption = preserve;
        self
    }
}

/// Strategy objects and lifecycle flags of a document.
#[derive(Clone)]
pub struct DocumentProperties {
    /// Source of the document's numeric id
    pub id_source: DocumentIdSource,
    /// Creates page dictionaries
    pub page_factory: Arc<dyn PageFactory>,
    /// Conformance profile consulted at checkpoints
    pub conformance_checker: Arc<dyn ConformanceChecker>,
    /// Stream codec used at flush time and for reading
    pub codec: Arc<dyn StreamCodec>,
    /// Write unreachable objects in a full rewrite instead of dropping them
    pub flush_unused_objects: bool,
    /// Drop the reader when the document closes
    pub close_reader: bool,
    /// Flush and drop the writer when the document closes
    pub close_writer: bool,
}

impl Default for DocumentProperties {
    fn default() -> Self {
        Self {
            id_source: DocumentIdSource::global(),
            page_factory: Arc::new(DefaultPageFactory),
            conformance_checker: Arc::new(NoopConformanceChecker),
            codec: Arc::new(StandardCodec::default()),
            flush_unused_objects: false,
            close_reader: true,
            close_writer: true,
        }
    }
}

impl std::fmt::Debug for DocumentProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentProperties")
            .field("id_source", &self.id_source)
            .field("flush_unused_objects", &self.flush_unused_objects)
            .field("close_reader", &self.close_reader)
            .field("close_writer", &self.close_writer)
            .finish_non_exhaustive()
    }
}

impl DocumentProperties {
    /// Use a specific id source.
    pub fn with_id_source(mut self, ids: DocumentIdSource) -> Self {
        self.id_source = ids;
        self
    }

    /// Use a custom page factory.
    pub fn with_page_factory(mut self, factory: Arc<dyn PageFactory>) -> Self {
        self.page_factory = factory;
        self
    }

    /// Attach a conformance checker.
    pub fn with_conformance_checker(mut self, checker: Arc<dyn ConformanceChecker>) -> Self {
        self.conformance_checker = checker;
        self
    }

    /// Use a custom stream codec.
    pub fn with_codec(mut self, codec: Arc<dyn StreamCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Keep unreachable objects in a full rewrite.
    pub fn with_flush_unused_objects(mut self, flush: bool) -> Self {
        self.flush_unused_objects = flush;
        self
    }
}
