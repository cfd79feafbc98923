//! Page handles, sizes and the page factory strategy.

use crate::object::{Dictionary, Object, ObjectRef};

/// Width and height of a page in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    /// Width in points
    pub width: f64,
    /// Height in points
    pub height: f64,
}

impl PageSize {
    /// ISO A3
    pub const A3: PageSize = PageSize::new(842.0, 1190.0);
    /// ISO A4
    pub const A4: PageSize = PageSize::new(595.0, 842.0);
    /// ISO A5
    pub const A5: PageSize = PageSize::new(420.0, 595.0);
    /// US Letter
    pub const LETTER: PageSize = PageSize::new(612.0, 792.0);
    /// US Legal
    pub const LEGAL: PageSize = PageSize::new(612.0, 1008.0);

    /// Custom size.
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Swap width and height.
    pub fn rotate(self) -> Self {
        Self::new(self.height, self.width)
    }

    /// `[0 0 width height]`
    pub fn to_rect(self) -> Object {
        Object::rect(0.0, 0.0, self.width, self.height)
    }

    /// Size of a `/MediaBox` array.
    pub fn from_rect(rect: &Object) -> Option<Self> {
        let values: Vec<f64> = rect.as_array()?.iter().filter_map(Object::as_number).collect();
        match values.as_slice() {
            [llx, lly, urx, ury] => Some(Self::new((urx - llx).abs(), (ury - lly).abs())),
            _ => None,
        }
    }
}

impl Default for PageSize {
    fn default() -> Self {
        PageSize::A4
    }
}

/// Handle to a page of a specific document.
///
/// The handle is only valid for the document that produced it; passing it
/// to another document fails with
/// [`Error::PageFromAnotherDocument`](crate::Error::PageFromAnotherDocument).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PdfPage {
    obj: ObjectRef,
    document_id: u64,
}

impl PdfPage {
    pub(crate) fn new(obj: ObjectRef, document_id: u64) -> Self {
        Self { obj, document_id }
    }

    /// Page dictionary reference.
    pub fn obj(&self) -> ObjectRef {
        self.obj
    }

    /// Id of the owning document.
    pub fn document_id(&self) -> u64 {
        self.document_id
    }
}

/// Creates the dictionary of a new blank page.
pub trait PageFactory: Send + Sync {
    /// Build a page dictionary for a page of `size`. `/Parent` is set by the page tree.
    fn create_page(&self, size: PageSize) -> Dictionary;
}

/// Standard blank page: media box, empty resources and an empty content stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPageFactory;

impl PageFactory for DefaultPageFactory {
    fn create_page(&self, size: PageSize) -> Dictionary {
        let mut page = Dictionary::new();
        page.insert("Type".into(), Object::name("Page"));
        page.insert("MediaBox".into(), size.to_rect());
        page.insert("Resources".into(), Object::Dictionary(Dictionary::new()));
        page.insert(
            "Contents".into(),
            Object::MustBeIndirect(Box::new(Object::stream(Dictionary::new(), Vec::new()))),
        );
        page
    }
}

/// Annotation references of a page dictionary.
pub(crate) fn annotation_refs(page: &Dictionary) -> Vec<ObjectRef> {
    page.get("Annots")
        .and_then(Object::as_array)
        .map(|annots| annots.iter().filter_map(Object::as_reference).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(PageSize::A4.rotate(), PageSize::new(842.0, 595.0));
        let rect = PageSize::LETTER.to_rect();
        assert_eq!(PageSize::from_rect(&rect), Some(PageSize::LETTER));
        assert_eq!(PageSize::from_rect(&Object::Null), None);
    }

    #[test]
    fn test_default_factory() {
        let page = DefaultPageFactory.create_page(PageSize::A5);
        assert_eq!(page.get("Type").and_then(Object::as_name), Some("Page"));
        assert!(matches!(page.get("Contents"), Some(Object::MustBeIndirect(_))));
        assert!(!page.contains_key("Parent"));
    }
}
