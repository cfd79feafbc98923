//! Error types for the document engine.
//!
//! Errors fall into a handful of classes: invalid arguments, state violations
//! (closed document, flushed objects, pages owned by another document),
//! conformance failures raised by an attached checker, document-scoped I/O
//! failures, and structure-tree corruption risks. Parsing errors from the
//! reader side share the same enum.

use crate::object::ObjectRef;

/// Result type alias for document operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while reading, mutating or writing a document.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// A precondition on an argument was violated
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Page number or insertion index outside the page tree
    #[error("Requested page number {index} is out of bounds (document has {count} pages)")]
    PageIndexOutOfBounds {
        /// Requested 1-based index
        index: usize,
        /// Current number of pages
        count: usize,
    },

    /// Operation on a document that has already been closed
    #[error("Document {0} is closed")]
    DocumentClosed(u64),

    /// Mutation of an object that has already been written out
    #[error("Object {0} has already been flushed")]
    ObjectFlushed(ObjectRef),

    /// Access to a slot that has been released
    #[error("Object {0} is free")]
    ObjectFreed(ObjectRef),

    /// Close was attempted after the catalog had been flushed
    #[error("Catalog has already been flushed; document cannot be closed again")]
    CatalogAlreadyFlushed,

    /// A page that has been flushed cannot be placed in the page tree
    #[error("Flushed page {0} cannot be added or inserted")]
    FlushedPageCannotBeAdded(ObjectRef),

    /// Removing a flushed page would orphan tag or form references
    #[error("Flushed page {0} cannot be removed from a tagged document or a document with an AcroForm")]
    FlushedPageCannotBeRemoved(ObjectRef),

    /// A page handle from one document was passed to another
    #[error("Page {page} belongs to document {owner}, not document {target}")]
    PageFromAnotherDocument {
        /// Page dictionary reference in its owning document
        page: ObjectRef,
        /// Owning document id
        owner: u64,
        /// Document the page was passed to
        target: u64,
    },

    /// Append mode needs a source whose xref was read without reconstruction
    #[error("Append mode requires a document without errors, even if recovery is possible")]
    AppendModeRequiresValidXref,

    /// Operation needs a writer but the document is read-only
    #[error("Document is not in writing mode")]
    NotInWriteMode,

    /// Policy violation raised by an attached conformance checker
    #[error("Conformance check failed at {key}: {message}")]
    Conformance {
        /// Checkpoint that raised the failure
        key: String,
        /// Checker message
        message: String,
    },

    /// I/O failure while closing, tagged with the document it happened in
    #[error("Cannot close document {document_id}")]
    CannotCloseDocument {
        /// Id of the document being closed
        document_id: u64,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Structure tree copy failed; source or target tag tree may be inconsistent
    #[error("Tag structure copying failed: it might be corrupted in one of the documents: {0}")]
    TagStructureCopy(String),

    /// Structure tree flush failed; the tag tree may be inconsistent
    #[error("Tag structure flushing failed: it might be corrupted: {0}")]
    TagStructureFlush(String),

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    Parse {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Invalid cross-reference table
    #[error("Invalid cross-reference table: {0}")]
    InvalidXref(String),

    /// Referenced object not found in cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Object has wrong type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        /// Expected object type
        expected: String,
        /// Actual object type found
        found: String,
    },

    /// Stream filter the codec does not implement
    #[error("Unsupported stream filter: {0}")]
    UnsupportedFilter(String),

    /// Stream encoding failed
    #[error("Failed to encode stream {object}: {reason}")]
    Encode {
        /// Stream being encoded
        object: ObjectRef,
        /// Codec message
        reason: String,
    },

    /// Stream decoding failed
    #[error("Stream decode error: {0}")]
    Decode(String),

    /// Encryption handler failure
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a conformance failure raised by a checker.
    pub fn conformance(key: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Error::Conformance {
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Shorthand for a type mismatch.
    pub fn wrong_type(expected: &str, found: &str) -> Self {
        Error::InvalidObjectType {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}
