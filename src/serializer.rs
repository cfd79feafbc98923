//! Object serialization.
//!
//! Produces the byte form of objects. When an encryption handler is
//! supplied, string and stream payloads are encrypted with the key of the
//! indirect object that contains them.

use crate::crypto::EncryptionHandler;
use crate::error::Result;
use crate::object::{Dictionary, Object, ObjectRef};
use std::io::Write;

/// Encryption context for one indirect object.
#[derive(Clone, Copy)]
pub struct CryptoContext<'a> {
    /// Handler doing the work
    pub handler: &'a dyn EncryptionHandler,
    /// Object whose key is used
    pub owner: ObjectRef,
}

/// Serializer for objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectSerializer {
    compact: bool,
}

impl ObjectSerializer {
    /// Create a new object serializer with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compact serializer (minimal whitespace).
    pub fn compact() -> Self {
        Self { compact: true }
    }

    /// Serialize a direct object to bytes.
    pub fn serialize(&self, obj: &Object) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_object(&mut buf, obj, None)?;
        Ok(buf)
    }

    /// Serialize an object to a string (for debugging and tests).
    pub fn serialize_to_string(&self, obj: &Object) -> String {
        self.serialize(obj)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    }

    /// Serialize an indirect object definition.
    ///
    /// Format: `{id} {gen} obj\n{object}\nendobj\n`
    pub fn serialize_indirect(
        &self,
        r: ObjectRef,
        obj: &Object,
        crypto: Option<&dyn EncryptionHandler>,
    ) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        writeln!(buf, "{} {} obj", r.id, r.gen)?;
        let ctx = crypto.map(|handler| CryptoContext { handler, owner: r });
        self.write_object(&mut buf, obj, ctx)?;
        buf.write_all(b"\nendobj\n")?;
        Ok(buf)
    }

    /// Write one object, recursing into containers.
    pub fn write_object<W: Write>(
        &self,
        w: &mut W,
        obj: &Object,
        crypto: Option<CryptoContext<'_>>,
    ) -> Result<()> {
        match obj {
            Object::Null => w.write_all(b"null")?,
            Object::Boolean(b) => write!(w, "{}", b)?,
            Object::Integer(i) => write!(w, "{}", i)?,
            Object::Real(r) => write_real(w, *r)?,
            Object::String(data) => match crypto {
                Some(ctx) => {
                    let sealed = ctx.handler.encrypt(ctx.owner.id, ctx.owner.gen, data)?;
                    write_hex_string(w, &sealed)?
                },
                None => write_string(w, data)?,
            },
            Object::Name(name) => write_name(w, name)?,
            Object::Array(items) => {
                w.write_all(b"[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        w.write_all(b" ")?;
                    }
                    self.write_object(w, item, crypto)?;
                }
                w.write_all(b"]")?;
            },
            Object::Dictionary(dict) => self.write_dictionary(w, dict, crypto)?,
            Object::Stream { dict, data } => {
                let payload = match crypto {
                    Some(ctx) if !is_unencrypted_metadata(dict, ctx) => {
                        ctx.handler.encrypt(ctx.owner.id, ctx.owner.gen, data)?
                    },
                    _ => data.to_vec(),
                };
                let mut dict = dict.clone();
                dict.insert("Length".to_string(), Object::Integer(payload.len() as i64));
                self.write_dictionary(w, &dict, crypto)?;
                w.write_all(b"\nstream\n")?;
                w.write_all(&payload)?;
                w.write_all(b"\nendstream")?;
            },
            Object::Reference(r) => write!(w, "{} {} R", r.id, r.gen)?,
            Object::MustBeIndirect(inner) => self.write_object(w, inner, crypto)?,
        }
        Ok(())
    }

    fn write_dictionary<W: Write>(
        &self,
        w: &mut W,
        dict: &Dictionary,
        crypto: Option<CryptoContext<'_>>,
    ) -> Result<()> {
        let sep: &[u8] = if self.compact { b"" } else { b" " };
        w.write_all(b"<<")?;
        for (key, value) in dict {
            w.write_all(sep)?;
            write_name(w, key)?;
            w.write_all(b" ")?;
            self.write_object(w, value, crypto)?;
        }
        w.write_all(sep)?;
        w.write_all(b">>")?;
        Ok(())
    }
}

fn is_unencrypted_metadata(dict: &Dictionary, ctx: CryptoContext<'_>) -> bool {
    !ctx.handler.encrypt_metadata()
        && dict.get("Type").and_then(Object::as_name) == Some("Metadata")
}

/// Reals are written without exponent, trimmed of trailing zeros.
fn write_real<W: Write>(w: &mut W, value: f64) -> std::io::Result<()> {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        write!(w, "{}", value as i64)
    } else {
        let formatted = format!("{:.5}", value);
        let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
        w.write_all(trimmed.as_bytes())
    }
}

fn write_string<W: Write>(w: &mut W, data: &[u8]) -> std::io::Result<()> {
    let printable = data
        .iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..=0x7E).contains(&b));
    if !printable {
        return write_hex_string(w, data);
    }
    w.write_all(b"(")?;
    for &byte in data {
        match byte {
            b'(' => w.write_all(b"\\(")?,
            b')' => w.write_all(b"\\)")?,
            b'\\' => w.write_all(b"\\\\")?,
            b'\n' => w.write_all(b"\\n")?,
            b'\r' => w.write_all(b"\\r")?,
            b'\t' => w.write_all(b"\\t")?,
            _ => w.write_all(&[byte])?,
        }
    }
    w.write_all(b")")
}

fn write_hex_string<W: Write>(w: &mut W, data: &[u8]) -> std::io::Result<()> {
    w.write_all(b"<")?;
    for byte in data {
        write!(w, "{:02X}", byte)?;
    }
    w.write_all(b">")
}

fn write_name<W: Write>(w: &mut W, name: &str) -> std::io::Result<()> {
    w.write_all(b"/")?;
    for byte in name.bytes() {
        let regular = (0x21..=0x7E).contains(&byte)
            && !matches!(byte, b'#' | b'/' | b'%' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}');
        if regular {
            w.write_all(&[byte])?;
        } else {
            write!(w, "#{:02X}", byte)?;
        }
    }
    Ok(())
}
