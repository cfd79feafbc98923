//! Conformance checking strategy.
//!
//! A document consults its [`ConformanceChecker`] at fixed checkpoints. The
//! default checker accepts everything; a profile that needs to enforce rules
//! returns [`Error::Conformance`](crate::Error::Conformance) and the operation
//! in progress is aborted before any bytes for it are written.

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object};
use std::fmt;

/// Checkpoints at which the checker is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConformanceKey {
    /// A page is placed in the page tree
    PageAdd,
    /// An indirect object is about to be serialized
    ObjectFlush,
    /// A stream is about to be serialized
    StreamFlush,
    /// The document is closing, before the first structural flush
    DocumentClose,
}

impl fmt::Display for ConformanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConformanceKey::PageAdd => "page-add",
            ConformanceKey::ObjectFlush => "object-flush",
            ConformanceKey::StreamFlush => "stream-flush",
            ConformanceKey::DocumentClose => "document-close",
        };
        f.write_str(name)
    }
}

/// Policy hook for a conformance profile.
pub trait ConformanceChecker: Send + Sync {
    /// Check one object at a checkpoint.
    fn check_object(&self, _object: &Object, _key: ConformanceKey) -> Result<()> {
        Ok(())
    }

    /// Check the catalog and info dictionaries before close writes anything.
    fn check_document(&self, _catalog: &Dictionary, _info: &Dictionary) -> Result<()> {
        Ok(())
    }
}

/// Accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConformanceChecker;

impl ConformanceChecker for NoopConformanceChecker {}

/// Rejects catalogs that lack any of the listed keys.
///
/// A minimal profile, mostly useful to require `/Metadata` or `/MarkInfo`.
#[derive(Debug, Clone, Default)]
pub struct RequiredCatalogKeys {
    keys: Vec<String>,
}

impl RequiredCatalogKeys {
    /// Require each of `keys` in the catalog.
    pub fn new<K: Into<String>>(keys: impl IntoIterator<Item = K>) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl ConformanceChecker for RequiredCatalogKeys {
    fn check_document(&self, catalog: &Dictionary, _info: &Dictionary) -> Result<()> {
        match self.keys.iter().find(|k| !catalog.contains_key(k.as_str())) {
            Some(missing) => Err(Error::conformance(
                ConformanceKey::DocumentClose,
                format!("catalog has no /{}", missing),
            )),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_accepts() {
        let checker = NoopConformanceChecker;
        assert!(checker.check_object(&Object::Null, ConformanceKey::ObjectFlush).is_ok());
        assert!(checker.check_document(&Dictionary::new(), &Dictionary::new()).is_ok());
    }

    #[test]
    fn test_required_keys() {
        let checker = RequiredCatalogKeys::new(["Metadata"]);
        let err = checker
            .check_document(&Dictionary::new(), &Dictionary::new())
            .unwrap_err();
        assert!(matches!(err, Error::Conformance { ref key, .. } if key == "document-close"));

        let mut catalog = Dictionary::new();
        catalog.insert("Metadata".into(), Object::Null);
        assert!(checker.check_document(&catalog, &Dictionary::new()).is_ok());
    }
}
