//! The git object model: ids, kinds, and the loose encoding.
//!
//! Objects are immutable `(type, content)` pairs named by
//! `SHA1("<type> <size>\0" || content)`. The stored encoding is that same
//! header followed by the content, zlib-wrapped, so decode∘encode is the
//! identity and the hash can always be re-derived from storage.

use std::io::{Read, Write};

use sha1::{Digest, Sha1};
use thiserror::Error;

/// A SHA-1 object name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

/// The kind of a git object.
///
/// Delta kinds exist only on the packfile wire; a store never accepts them,
/// but they must be representable so the rejection is typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// A commit object.
    Commit,
    /// A tree object.
    Tree,
    /// A blob object.
    Blob,
    /// An annotated tag object.
    Tag,
    /// A delta against an object at an earlier pack offset.
    OfsDelta,
    /// A delta against an object named by SHA-1.
    RefDelta,
}

/// An error decoding stored object bytes.
#[derive(Error, Debug)]
pub enum Error {
    /// The zlib stream failed to inflate.
    #[error("corrupt object: {0}")]
    Inflate(#[from] std::io::Error),
    /// The loose header is missing or malformed.
    #[error("corrupt object: malformed loose header")]
    BadHeader,
    /// The header names an unknown object type.
    #[error("corrupt object: unknown type `{0}`")]
    UnknownType(String),
    /// The header size does not match the content length.
    #[error("corrupt object: declared size {declared} but found {actual} bytes")]
    SizeMismatch {
        /// The size named in the header.
        declared: u64,
        /// The real content length.
        actual: u64,
    },
    /// The string is not a 40-character hex SHA-1.
    #[error("invalid object id `{0}`")]
    BadId(String),
}

impl ObjectId {
    /// The all-zero id git uses for "no object".
    pub const ZERO: ObjectId = ObjectId([0; 20]);

    /// Wrap raw digest bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        ObjectId(bytes)
    }

    /// Parse a 40-character hex name.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let bytes = hex::decode(s).map_err(|_| Error::BadId(s.to_owned()))?;
        let bytes: [u8; 20] = bytes.try_into().map_err(|_| Error::BadId(s.to_owned()))?;
        Ok(ObjectId(bytes))
    }

    /// The 40-character hex name.
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Whether this is the zero id.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// The `(shard, rest)` split used for content paths:
    /// `objects/<sha[0:2]>/<sha[2:]>`.
    pub fn shard(&self) -> (String, String) {
        let hex = self.hex();
        (hex[..2].to_owned(), hex[2..].to_owned())
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.hex())
    }
}

impl std::fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ObjectId").field(&self.hex()).finish()
    }
}

impl ObjectType {
    /// The type name as it appears in loose headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Commit => "commit",
            ObjectType::Tree => "tree",
            ObjectType::Blob => "blob",
            ObjectType::Tag => "tag",
            ObjectType::OfsDelta => "ofs-delta",
            ObjectType::RefDelta => "ref-delta",
        }
    }

    /// Parse a loose-header type name. Deltas have no loose form.
    pub fn from_header(s: &str) -> Result<Self, Error> {
        match s {
            "commit" => Ok(ObjectType::Commit),
            "tree" => Ok(ObjectType::Tree),
            "blob" => Ok(ObjectType::Blob),
            "tag" => Ok(ObjectType::Tag),
            other => Err(Error::UnknownType(other.to_owned())),
        }
    }

    /// Whether this is a packfile delta kind.
    pub fn is_delta(&self) -> bool {
        matches!(self, ObjectType::OfsDelta | ObjectType::RefDelta)
    }

    /// The 3-bit type code used in pack entry headers.
    pub fn pack_code(&self) -> u8 {
        match self {
            ObjectType::Commit => 1,
            ObjectType::Tree => 2,
            ObjectType::Blob => 3,
            ObjectType::Tag => 4,
            ObjectType::OfsDelta => 6,
            ObjectType::RefDelta => 7,
        }
    }

    /// Decode a pack entry type code.
    pub fn from_pack_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ObjectType::Commit),
            2 => Some(ObjectType::Tree),
            3 => Some(ObjectType::Blob),
            4 => Some(ObjectType::Tag),
            6 => Some(ObjectType::OfsDelta),
            7 => Some(ObjectType::RefDelta),
            _ => None,
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One git object: a kind and its raw content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    /// The object's kind.
    pub kind: ObjectType,
    /// The raw content, without the loose header.
    pub data: Vec<u8>,
}

impl Object {
    /// Construct an object from its parts.
    pub fn new(kind: ObjectType, data: Vec<u8>) -> Self {
        Object { kind, data }
    }

    /// The content length.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// The object's SHA-1 name.
    pub fn id(&self) -> ObjectId {
        let mut hasher = Sha1::new();
        hasher.update(self.header());
        hasher.update(&self.data);
        ObjectId(hasher.finalize().into())
    }

    fn header(&self) -> Vec<u8> {
        format!("{} {}\0", self.kind.as_str(), self.data.len()).into_bytes()
    }

    /// The zlib-wrapped loose encoding stored on the ledger.
    pub fn encode_loose(&self) -> Vec<u8> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        // writes to a Vec cannot fail
        encoder.write_all(&self.header()).expect("write to vec");
        encoder.write_all(&self.data).expect("write to vec");
        encoder.finish().expect("finish to vec")
    }

    /// Decode a stored loose encoding back into an object.
    pub fn decode_loose(bytes: &[u8]) -> Result<Self, Error> {
        let mut raw = Vec::new();
        flate2::read::ZlibDecoder::new(bytes).read_to_end(&mut raw)?;

        let nul = raw
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::BadHeader)?;
        let header = std::str::from_utf8(&raw[..nul]).map_err(|_| Error::BadHeader)?;
        let (kind, size) = header.split_once(' ').ok_or(Error::BadHeader)?;
        let kind = ObjectType::from_header(kind)?;
        let declared: u64 = size.parse().map_err(|_| Error::BadHeader)?;

        let data = raw[nul + 1..].to_vec();
        if declared != data.len() as u64 {
            return Err(Error::SizeMismatch {
                declared,
                actual: data.len() as u64,
            });
        }
        Ok(Object { kind, data })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn well_known_ids() {
        // the empty blob and empty tree have famous names
        let blob = Object::new(ObjectType::Blob, vec![]);
        assert_eq!(blob.id().hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");

        let tree = Object::new(ObjectType::Tree, vec![]);
        assert_eq!(tree.id().hex(), "4b825dc642cb6eb9a060e54bf8d69288fbee4904");
    }

    #[test]
    fn loose_round_trip_preserves_the_id() {
        let obj = Object::new(ObjectType::Blob, b"hello dgit\n".to_vec());
        let decoded = Object::decode_loose(&obj.encode_loose()).unwrap();
        assert_eq!(decoded, obj);
        assert_eq!(decoded.id(), obj.id());
    }

    #[test]
    fn decode_rejects_size_lies() {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"blob 99\0hi").unwrap();
        let bytes = encoder.finish().unwrap();
        assert!(matches!(
            Object::decode_loose(&bytes),
            Err(Error::SizeMismatch { declared: 99, .. })
        ));
    }

    #[test]
    fn decode_rejects_unknown_types() {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"sausage 2\0hi").unwrap();
        let bytes = encoder.finish().unwrap();
        assert!(matches!(
            Object::decode_loose(&bytes),
            Err(Error::UnknownType(_))
        ));
    }

    #[test]
    fn shard_splits_the_hex_name() {
        let id = ObjectId::from_hex("e69de29bb2d1d6434b8b29ae775ad8c2e48c5391").unwrap();
        let (shard, rest) = id.shard();
        assert_eq!(shard, "e6");
        assert_eq!(rest, "9de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }
}
