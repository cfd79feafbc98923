//! Object graph node types.
//!
//! Containment between indirect objects is always expressed through
//! [`Object::Reference`], an integer handle into the document's xref table.
//! This keeps cyclic structures such as `Page -> Parent -> Pages -> Kids`
//! free of ownership cycles: a dictionary never embeds another indirect
//! object, it only names it.

use indexmap::IndexMap;

/// Dictionary payload. Insertion order is preserved so output is deterministic.
pub type Dictionary = IndexMap<String, Object>;

/// A node of the document graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Null object
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Real (floating-point) value
    Real(f64),
    /// String (byte array)
    String(Vec<u8>),
    /// Name (without the leading slash)
    Name(String),
    /// Array of objects
    Array(Vec<Object>),
    /// Dictionary (key-value pairs)
    Dictionary(Dictionary),
    /// Stream (dictionary + payload as it will be written)
    Stream {
        /// Stream dictionary
        dict: Dictionary,
        /// Stream data; encoded per `/Filter` when the dictionary has one
        data: bytes::Bytes,
    },
    /// Indirect object reference
    Reference(ObjectRef),
    /// A direct value that must live in its own indirect slot.
    ///
    /// When the containing object is flushed the value is hoisted into a
    /// freshly allocated slot and replaced by a [`Object::Reference`].
    MustBeIndirect(Box<Object>),
}

/// Reference to an indirect object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    /// Object number
    pub id: u32,
    /// Generation number
    pub gen: u16,
}

impl ObjectRef {
    /// Create a new object reference.
    pub fn new(id: u32, gen: u16) -> Self {
        Self { id, gen }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.id, self.gen)
    }
}

impl From<ObjectRef> for Object {
    fn from(r: ObjectRef) -> Self {
        Object::Reference(r)
    }
}

impl From<Dictionary> for Object {
    fn from(d: Dictionary) -> Self {
        Object::Dictionary(d)
    }
}

impl From<i64> for Object {
    fn from(i: i64) -> Self {
        Object::Integer(i)
    }
}

impl From<bool> for Object {
    fn from(b: bool) -> Self {
        Object::Boolean(b)
    }
}

impl Object {
    /// Create a name object.
    pub fn name(name: impl Into<String>) -> Self {
        Object::Name(name.into())
    }

    /// Create a string object from text.
    pub fn string(text: impl AsRef<[u8]>) -> Self {
        Object::String(text.as_ref().to_vec())
    }

    /// Create a dictionary object from key/value pairs.
    pub fn dict<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Object)>) -> Self {
        Object::Dictionary(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Create a stream with an unencoded payload.
    pub fn stream(dict: Dictionary, data: impl Into<bytes::Bytes>) -> Self {
        Object::Stream {
            dict,
            data: data.into(),
        }
    }

    /// Create a rectangle array.
    pub fn rect(llx: f64, lly: f64, urx: f64, ury: f64) -> Self {
        Object::Array(vec![
            Object::Real(llx),
            Object::Real(lly),
            Object::Real(urx),
            Object::Real(ury),
        ])
    }

    /// Get the type name of this object (without data).
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::String(_) => "String",
            Object::Name(_) => "Name",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream { .. } => "Stream",
            Object::Reference(_) => "Reference",
            Object::MustBeIndirect(inner) => inner.type_name(),
        }
    }

    /// Try to cast to integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Integer(i) => Some(*i),
            Object::Real(r) if r.fract() == 0.0 => Some(*r as i64),
            _ => None,
        }
    }

    /// Try to cast to a number of either kind.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Object::Integer(i) => Some(*i as f64),
            Object::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Try to cast to name.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(s) => Some(s),
            _ => None,
        }
    }

    /// Try to cast to dictionary. Works for both Dictionary and Stream objects.
    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            Object::MustBeIndirect(inner) => inner.as_dict(),
            _ => None,
        }
    }

    /// Mutable dictionary access. Works for both Dictionary and Stream objects.
    pub fn as_dict_mut(&mut self) -> Option<&mut Dictionary> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            Object::MustBeIndirect(inner) => inner.as_dict_mut(),
            _ => None,
        }
    }

    /// Try to cast to array.
    pub fn as_array(&self) -> Option<&Vec<Object>> {
        match self {
            Object::Array(arr) => Some(arr),
            Object::MustBeIndirect(inner) => inner.as_array(),
            _ => None,
        }
    }

    /// Mutable array access.
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Object>> {
        match self {
            Object::Array(arr) => Some(arr),
            Object::MustBeIndirect(inner) => inner.as_array_mut(),
            _ => None,
        }
    }

    /// Try to cast to reference.
    pub fn as_reference(&self) -> Option<ObjectRef> {
        match self {
            Object::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// Try to cast to boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to cast to string (bytes).
    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    /// Check if this is a null object.
    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    /// Look up a key when this object is a dictionary or stream.
    pub fn get(&self, key: &str) -> Option<&Object> {
        self.as_dict().and_then(|d| d.get(key))
    }

    /// `/Type` of a dictionary, if present.
    pub fn dict_type(&self) -> Option<&str> {
        self.get("Type").and_then(Object::as_name)
    }

    /// Visit every reference contained in this object, depth first.
    pub fn for_each_reference(&self, f: &mut impl FnMut(ObjectRef)) {
        match self {
            Object::Reference(r) => f(*r),
            Object::Array(items) => items.iter().for_each(|o| o.for_each_reference(f)),
            Object::Dictionary(dict) | Object::Stream { dict, .. } => {
                dict.values().for_each(|o| o.for_each_reference(f))
            },
            Object::MustBeIndirect(inner) => inner.for_each_reference(f),
            _ => {},
        }
    }

    /// Collect every reference contained in this object.
    pub fn references(&self) -> Vec<ObjectRef> {
        let mut refs = Vec::new();
        self.for_each_reference(&mut |r| refs.push(r));
        refs
    }

    /// True if any nested value still waits to be hoisted into its own slot.
    pub fn has_pending_indirect(&self) -> bool {
        match self {
            Object::MustBeIndirect(_) => true,
            Object::Array(items) => items.iter().any(Object::has_pending_indirect),
            Object::Dictionary(dict) | Object::Stream { dict, .. } => {
                dict.values().any(Object::has_pending_indirect)
            },
            _ => false,
        }
    }
}
