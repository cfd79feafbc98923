//! Encryption collaborator and document identifiers.
//!
//! The document core treats encryption as opaque: the writer holds an
//! optional [`EncryptionHandler`] and calls [`EncryptionHandler::encrypt`]
//! for every string and stream payload of an object it serializes. The
//! encryption dictionary itself is always written in the clear.
//!
//! [`StandardRc4Handler`] implements the standard security handler with
//! RC4 keys. It encrypts new documents and, rebuilt from a source
//! `/Encrypt` dictionary, decrypts the objects of an encrypted source.

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object};
use md5::{Digest, Md5};

const PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Per-object encryption invoked by the writer at flush time.
pub trait EncryptionHandler: Send {
    /// Encrypt `plaintext` belonging to object `obj` generation `gen`.
    fn encrypt(&self, obj: u32, gen: u16, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// The `/Encrypt` dictionary describing this handler.
    fn encryption_dictionary(&self) -> Dictionary;

    /// Whether XML metadata streams are encrypted.
    fn encrypt_metadata(&self) -> bool {
        true
    }
}

/// User-facing encryption settings.
#[derive(Debug, Clone)]
pub struct EncryptionProperties {
    /// User password (may be empty)
    pub user_password: Vec<u8>,
    /// Owner password; the user password is used when empty
    pub owner_password: Vec<u8>,
    /// Permission bits for `/P`
    pub permissions: i32,
    /// Encrypt the XMP metadata stream
    pub encrypt_metadata: bool,
}

impl EncryptionProperties {
    /// Settings with the given passwords and all permissions granted.
    pub fn new(user_password: impl AsRef<[u8]>, owner_password: impl AsRef<[u8]>) -> Self {
        Self {
            user_password: user_password.as_ref().to_vec(),
            owner_password: owner_password.as_ref().to_vec(),
            permissions: -4,
            encrypt_metadata: true,
        }
    }

    /// Set the permission bits.
    pub fn with_permissions(mut self, permissions: i32) -> Self {
        self.permissions = permissions;
        self
    }
}

/// Standard security handler with RC4, revision 2 (40-bit) or 3 (up to 128-bit).
///
/// New documents always get revision 3 with a 128-bit key. Handlers for
/// encrypted sources are rebuilt with [`StandardRc4Handler::from_encryption_dictionary`].
#[derive(Clone)]
pub struct StandardRc4Handler {
    key: Vec<u8>,
    revision: i64,
    owner_entry: Vec<u8>,
    user_entry: Vec<u8>,
    permissions: i32,
    encrypt_metadata: bool,
}

impl StandardRc4Handler {
    const KEY_LEN: usize = 16;

    /// Derive keys and dictionary entries for a document whose first ID is `file_id`.
    pub fn new(props: &EncryptionProperties, file_id: &[u8]) -> Self {
        let owner_entry = owner_entry(&props.owner_password, &props.user_password);
        let key = file_key(
            &pad(&props.user_password),
            &owner_entry,
            props.permissions,
            file_id,
            3,
            Self::KEY_LEN,
        );
        let user_entry = user_entry(&key, file_id, 3);
        Self {
            key,
            revision: 3,
            owner_entry,
            user_entry,
            permissions: props.permissions,
            encrypt_metadata: props.encrypt_metadata,
        }
    }

    /// Rebuild the handler of an encrypted source.
    ///
    /// `password` is tried as the user password first, then as the owner
    /// password.
    ///
    /// # Errors
    ///
    /// [`Error::Encryption`] for handlers other than the standard RC4 one
    /// and for a password that matches neither entry.
    pub fn from_encryption_dictionary(dict: &Dictionary, file_id: &[u8], password: &[u8]) -> Result<Self> {
        if dict.get("Filter").and_then(Object::as_name) != Some("Standard") {
            return Err(Error::Encryption("only the standard security handler is supported".to_string()));
        }
        let version = dict.get("V").and_then(Object::as_integer).unwrap_or(0);
        let revision = dict.get("R").and_then(Object::as_integer).unwrap_or(0);
        if !matches!(version, 1 | 2) || !matches!(revision, 2 | 3) {
            return Err(Error::Encryption(format!(
                "unsupported security handler V {} R {}",
                version, revision
            )));
        }
        let key_len = match revision {
            2 => 5,
            _ => {
                let bits = dict.get("Length").and_then(Object::as_integer).unwrap_or(40);
                if !(40..=128).contains(&bits) || bits % 8 != 0 {
                    return Err(Error::Encryption(format!("bad key length {}", bits)));
                }
                bits as usize / 8
            },
        };
        let entry = |key: &str| {
            dict.get(key)
                .and_then(Object::as_string)
                .filter(|s| s.len() >= 32)
                .map(|s| s[..32].to_vec())
                .ok_or_else(|| Error::Encryption(format!("missing or short /{} entry", key)))
        };
        let owner_entry = entry("O")?;
        let user_entry = entry("U")?;
        // /P is a 32-bit value some writers store unsigned
        let permissions = dict
            .get("P")
            .and_then(Object::as_integer)
            .ok_or_else(|| Error::Encryption("missing /P entry".to_string()))? as u32 as i32;
        let encrypt_metadata = dict
            .get("EncryptMetadata")
            .and_then(Object::as_bool)
            .unwrap_or(true);

        let authenticate = |padded: &[u8; 32]| {
            let key = file_key(padded, &owner_entry, permissions, file_id, revision, key_len);
            let expected = user_entry_for_check(&key, file_id, revision);
            (user_entry[..expected.len()] == expected[..]).then_some(key)
        };
        let key = authenticate(&pad(password))
            .or_else(|| authenticate(&pad(&owner_to_user(password, &owner_entry, revision, key_len))))
            .ok_or_else(|| Error::Encryption("wrong password".to_string()))?;

        Ok(Self {
            key,
            revision,
            owner_entry,
            user_entry,
            permissions,
            encrypt_metadata,
        })
    }

    /// Decrypt a payload of object `obj` generation `gen`.
    pub fn decrypt(&self, obj: u32, gen: u16, ciphertext: &[u8]) -> Vec<u8> {
        rc4(&self.object_key(obj, gen), ciphertext)
    }

    fn object_key(&self, obj: u32, gen: u16) -> Vec<u8> {
        let mut hasher = Md5::new();
        hasher.update(&self.key);
        hasher.update(&obj.to_le_bytes()[..3]);
        hasher.update(gen.to_le_bytes());
        let digest = hasher.finalize();
        digest[..(self.key.len() + 5).min(16)].to_vec()
    }
}

impl std::fmt::Debug for StandardRc4Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardRc4Handler")
            .field("revision", &self.revision)
            .field("key_bits", &(self.key.len() * 8))
            .field("permissions", &self.permissions)
            .finish()
    }
}

impl EncryptionHandler for StandardRc4Handler {
    fn encrypt(&self, obj: u32, gen: u16, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(rc4(&self.object_key(obj, gen), plaintext))
    }

    fn encryption_dictionary(&self) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.insert("Filter".into(), Object::name("Standard"));
        dict.insert("V".into(), Object::Integer(if self.revision == 2 { 1 } else { 2 }));
        dict.insert("R".into(), Object::Integer(self.revision));
        dict.insert("Length".into(), Object::Integer((self.key.len() * 8) as i64));
        dict.insert("O".into(), Object::String(self.owner_entry.clone()));
        dict.insert("U".into(), Object::String(self.user_entry.clone()));
        dict.insert("P".into(), Object::Integer(self.permissions as i64));
        if !self.encrypt_metadata {
            dict.insert("EncryptMetadata".into(), Object::Boolean(false));
        }
        dict
    }

    fn encrypt_metadata(&self) -> bool {
        self.encrypt_metadata
    }
}

/// File key from the padded user password.
fn file_key(
    padded: &[u8; 32],
    owner_entry: &[u8],
    permissions: i32,
    file_id: &[u8],
    revision: i64,
    key_len: usize,
) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(padded);
    hasher.update(owner_entry);
    hasher.update(permissions.to_le_bytes());
    hasher.update(file_id);
    let mut key = hasher.finalize().to_vec();
    if revision >= 3 {
        for _ in 0..50 {
            key = Md5::digest(&key[..key_len]).to_vec();
        }
    }
    key.truncate(key_len);
    key
}

/// `/U` entry as written: 32 bytes for both revisions.
fn user_entry(key: &[u8], file_id: &[u8], revision: i64) -> Vec<u8> {
    let mut entry = user_entry_for_check(key, file_id, revision);
    entry.resize(32, 0);
    entry
}

/// The significant part of `/U`: all 32 bytes for revision 2, the first 16 after.
fn user_entry_for_check(key: &[u8], file_id: &[u8], revision: i64) -> Vec<u8> {
    if revision == 2 {
        return rc4(key, &PADDING);
    }
    let mut hasher = Md5::new();
    hasher.update(PADDING);
    hasher.update(file_id);
    let mut entry = rc4(key, &hasher.finalize());
    for i in 1..=19u8 {
        let round_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
        entry = rc4(&round_key, &entry);
    }
    entry
}

/// Recover the user password from `/O` given the owner password.
fn owner_to_user(owner_password: &[u8], owner_entry: &[u8], revision: i64, key_len: usize) -> Vec<u8> {
    let mut hash = Md5::digest(pad(owner_password)).to_vec();
    if revision >= 3 {
        for _ in 0..50 {
            hash = Md5::digest(&hash).to_vec();
        }
    }
    let key = &hash[..key_len];
    if revision == 2 {
        return rc4(key, owner_entry);
    }
    let mut user = owner_entry.to_vec();
    for i in (0..=19u8).rev() {
        let round_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
        user = rc4(&round_key, &user);
    }
    user
}

fn pad(password: &[u8]) -> [u8; 32] {
    let mut padded = PADDING;
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PADDING[..32 - len]);
    padded
}

fn owner_entry(owner_password: &[u8], user_password: &[u8]) -> Vec<u8> {
    let password = if owner_password.is_empty() {
        user_password
    } else {
        owner_password
    };
    let mut hash = Md5::digest(pad(password)).to_vec();
    for _ in 0..50 {
        hash = Md5::digest(&hash).to_vec();
    }
    let mut result = rc4(&hash, &pad(user_password));
    for i in 1..=19u8 {
        let round_key: Vec<u8> = hash.iter().map(|b| b ^ i).collect();
        result = rc4(&round_key, &result);
    }
    result
}

/// RC4 keystream XOR; encryption and decryption are the same operation.
pub fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut s: [u8; 256] = std::array::from_fn(|i| i as u8);
    let mut j = 0u8;
    for i in 0..256 {
        j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
        s.swap(i, j as usize);
    }
    let (mut i, mut j) = (0u8, 0u8);
    data.iter()
        .map(|&byte| {
            i = i.wrapping_add(1);
            j = j.wrapping_add(s[i as usize]);
            s.swap(i as usize, j as usize);
            byte ^ s[s[i as usize].wrapping_add(s[j as usize]) as usize]
        })
        .collect()
}

/// Fresh 16-byte document identifier.
///
/// MD5 over a random UUID, the current time and `seed` (usually the
/// document id), so two documents created in the same instant differ.
pub fn generate_document_id(seed: u64) -> Vec<u8> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let mut hasher = Md5::new();
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    hasher.update(now.as_nanos().to_le_bytes());
    hasher.update(seed.to_le_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rc4_known_vector() {
        // RFC 6229 style check: "Key" / "Plaintext"
        let out = rc4(b"Key", b"Plaintext");
        assert_eq!(out, vec![0xBB, 0xF3, 0x16, 0xE8, 0xD9, 0x40, 0xAF, 0x0A, 0xD3]);
        assert_eq!(rc4(b"Key", &out), b"Plaintext");
    }

    #[test]
    fn test_object_keys_differ_per_object() {
        let handler = StandardRc4Handler::new(&EncryptionProperties::new("", "owner"), &[7u8; 16]);
        let a = handler.encrypt(1, 0, b"same text").unwrap();
        let b = handler.encrypt(2, 0, b"same text").unwrap();
        assert_ne!(a, b);
        assert_eq!(rc4(&handler.object_key(1, 0), &a), b"same text");
    }

    #[test]
    fn test_encryption_dictionary_entries() {
        let handler = StandardRc4Handler::new(
            &EncryptionProperties::new("user", "owner").with_permissions(-44),
            b"0123456789abcdef",
        );
        let dict = handler.encryption_dictionary();
        assert_eq!(dict.get("Filter").and_then(Object::as_name), Some("Standard"));
        assert_eq!(dict.get("P"), Some(&Object::Integer(-44)));
        assert_eq!(dict.get("O").and_then(Object::as_string).map(<[u8]>::len), Some(32));
        assert_eq!(dict.get("U").and_then(Object::as_string).map(<[u8]>::len), Some(32));
    }

    #[test]
    fn test_source_handler_accepts_user_and_owner_passwords() {
        let id = b"0123456789abcdef";
        let written = StandardRc4Handler::new(&EncryptionProperties::new("user", "owner"), id);
        let dict = written.encryption_dictionary();
        let sealed = written.encrypt(4, 0, b"Plain title").unwrap();

        for password in [&b"user"[..], &b"owner"[..]] {
            let source = StandardRc4Handler::from_encryption_dictionary(&dict, id, password).unwrap();
            assert_eq!(source.decrypt(4, 0, &sealed), b"Plain title");
            assert_eq!(source.encryption_dictionary(), dict);
        }

        let result = StandardRc4Handler::from_encryption_dictionary(&dict, id, b"guess");
        assert!(matches!(result, Err(Error::Encryption(_))));
        let result = StandardRc4Handler::from_encryption_dictionary(&dict, b"another id", b"user");
        assert!(matches!(result, Err(Error::Encryption(_))));
    }

    #[test]
    fn test_source_handler_reads_unsigned_permissions() {
        let id = [3u8; 16];
        let written = StandardRc4Handler::new(&EncryptionProperties::new("", "owner"), &id);
        let mut dict = written.encryption_dictionary();
        dict.insert("P".into(), Object::Integer(-4i32 as u32 as i64));
        let source = StandardRc4Handler::from_encryption_dictionary(&dict, &id, b"").unwrap();
        assert_eq!(source.encrypt(1, 0, b"x").unwrap(), written.encrypt(1, 0, b"x").unwrap());
    }

    #[test]
    fn test_source_handler_rejects_other_filters() {
        let mut dict = Dictionary::new();
        dict.insert("Filter".into(), Object::name("Adobe.PubSec"));
        let result = StandardRc4Handler::from_encryption_dictionary(&dict, &[], b"");
        assert!(matches!(result, Err(Error::Encryption(_))));

        dict.insert("Filter".into(), Object::name("Standard"));
        dict.insert("V".into(), Object::Integer(4));
        dict.insert("R".into(), Object::Integer(4));
        let result = StandardRc4Handler::from_encryption_dictionary(&dict, &[], b"");
        assert!(matches!(result, Err(Error::Encryption(_))));
    }

    #[test]
    fn test_document_ids_are_unique() {
        let a = generate_document_id(1);
        let b = generate_document_id(1);
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }
}
