//! The packfile v2 wire codec.
//!
//! Inbound packs are parsed by [`parse::PackReader`], which inflates every
//! entry, resolves ofs/ref deltas against earlier entries and verifies the
//! SHA-1 trailer, surfacing the stream as [`PackEvent`]s. Outbound packs are
//! produced by [`encode`], which writes undeltified entries in the order
//! given.
//!
//! The event shape mirrors what ingestion needs: a header with the object
//! count, one fully-inflated object per entry, and a footer carrying the
//! verified checksum. Store ingestion turns that into exactly one object
//! transaction per packfile.

pub mod delta;
pub mod encode;
pub mod parse;

use thiserror::Error;

use crate::object::{Object, ObjectId};

pub use encode::encode;
pub use parse::PackReader;

/// One step of a packfile stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackEvent {
    /// The pack header was read.
    Header {
        /// How many objects the pack declares.
        objects: u32,
    },
    /// One object, inflated and delta-resolved.
    Object(Object),
    /// The trailer was read and verified.
    Footer {
        /// The pack's SHA-1 checksum.
        checksum: ObjectId,
    },
}

/// An error reading or resolving a packfile.
#[derive(Error, Debug)]
pub enum Error {
    /// The stream does not start with `PACK`.
    #[error("not a packfile: bad magic")]
    BadMagic,
    /// Only version 2 packs are understood.
    #[error("unsupported packfile version {0}")]
    UnsupportedVersion(u32),
    /// The stream ended before the declared content.
    #[error("truncated packfile")]
    Truncated,
    /// An entry carries an unknown type code.
    #[error("unknown pack entry type {0}")]
    UnknownEntryType(u8),
    /// An entry failed to inflate.
    #[error("corrupt pack entry: {0}")]
    Inflate(#[from] flate2::DecompressError),
    /// An inflated entry is not the size its header declared.
    #[error("pack entry declared {declared} bytes but inflated to {actual}")]
    SizeMismatch {
        /// Declared inflated size.
        declared: u64,
        /// Actual inflated size.
        actual: u64,
    },
    /// A delta references a base that is not in the pack.
    #[error("delta references a missing base")]
    MissingBase,
    /// A delta's instructions are malformed.
    #[error("malformed delta: {0}")]
    BadDelta(&'static str),
    /// The trailer checksum does not match the content.
    #[error("packfile checksum mismatch")]
    BadChecksum,
    /// Bytes follow the trailer.
    #[error("trailing bytes after packfile checksum")]
    TrailingBytes,
}
