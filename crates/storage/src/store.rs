//! The object-store contract shared by both backends.

use async_trait::async_trait;
use thiserror::Error;

use crate::iter::ObjectIter;
use crate::object::{self, Object, ObjectId, ObjectType};
use crate::pack::{self, PackEvent, PackReader};

/// Content path prefix under which objects are sharded.
pub(crate) const OBJECTS_PREFIX: &str = "objects";

/// The content path for an object: `objects/<sha[0:2]>/<sha[2:]>`.
pub(crate) fn object_path(id: &ObjectId) -> String {
    let (shard, rest) = id.shard();
    format!("{OBJECTS_PREFIX}/{shard}/{rest}")
}

/// The sorted child keys of the map at `path`, or empty when absent.
pub(crate) fn sorted_keys(tree: &chaintree::Tree, path: &str) -> Vec<String> {
    match tree.resolve(path) {
        (Some(chaintree::Value::Map(m)), _) => m.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

/// Filters reads and iteration by object kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeHint {
    /// Accept any kind.
    Any,
    /// Accept only the named kind.
    Kind(ObjectType),
}

impl TypeHint {
    /// Whether an object of `kind` passes the filter.
    pub fn matches(&self, kind: ObjectType) -> bool {
        match self {
            TypeHint::Any => true,
            TypeHint::Kind(k) => *k == kind,
        }
    }
}

/// An error from an object store.
#[derive(Error, Debug)]
pub enum Error {
    /// The object is absent, or present with a kind the hint excludes.
    #[error("object {0} not found")]
    NotFound(ObjectId),
    /// A delta kind was handed to `put`.
    #[error("refusing to store a {0} object")]
    InvalidType(ObjectType),
    /// Stored bytes or a stored link failed to decode.
    #[error("corrupt stored object: {0}")]
    Corrupt(String),
    /// The blob network failed.
    #[error("blob network: {0}")]
    Network(String),
    /// The stored encoding failed to decode.
    #[error(transparent)]
    Object(#[from] object::Error),
    /// The packfile stream failed to parse.
    #[error(transparent)]
    Pack(#[from] pack::Error),
    /// The underlying tree failed.
    #[error(transparent)]
    Tree(#[from] chaintree::tree::Error),
    /// A content value had the wrong shape.
    #[error(transparent)]
    Value(#[from] chaintree::value::Error),
    /// The repository config is invalid.
    #[error(transparent)]
    Config(#[from] chaintree::repo::Error),
}

/// A content-addressed git object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Persist `obj` under its SHA-1. Idempotent; always returns the id.
    ///
    /// Delta kinds fail with [`Error::InvalidType`] without touching storage.
    async fn put(&self, obj: &Object) -> Result<ObjectId, Error>;

    /// Fetch the object at `id`, provided its kind passes `hint`.
    async fn get(&self, hint: TypeHint, id: &ObjectId) -> Result<Object, Error>;

    /// Whether `id` is present (under any kind).
    async fn contains(&self, id: &ObjectId) -> Result<bool, Error> {
        match self.get(TypeHint::Any, id).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The content size of the object at `id`.
    async fn size(&self, id: &ObjectId) -> Result<u64, Error> {
        Ok(self.get(TypeHint::Any, id).await?.size())
    }

    /// Lazily iterate every stored object in ascending SHA-1 order,
    /// skipping kinds the hint excludes.
    fn iter(&self, hint: TypeHint) -> ObjectIter;

    /// Open an object transaction. Puts are buffered; only `commit` touches
    /// the ledger.
    async fn begin(&self) -> Result<Box<dyn ObjectTxn>, Error>;

    /// Parse a complete packfile and persist every contained object in one
    /// transaction.
    ///
    /// Either all objects land (single ledger batch, committed on the
    /// verified footer) or none do. Returns the number of objects stored.
    async fn write_pack(&self, pack: &[u8]) -> Result<u32, Error> {
        let mut reader = PackReader::new(pack);
        let mut txn: Option<Box<dyn ObjectTxn>> = None;
        let mut stored = 0u32;
        loop {
            match reader.next_event() {
                Ok(Some(PackEvent::Header { objects })) => {
                    tracing::debug!(objects, "ingesting packfile");
                }
                Ok(Some(PackEvent::Object(obj))) => {
                    if txn.is_none() {
                        txn = Some(self.begin().await?);
                    }
                    let active = txn.as_mut().expect("opened above");
                    if let Err(e) = active.put(&obj).await {
                        txn.take().expect("still open").rollback();
                        return Err(e);
                    }
                    stored += 1;
                }
                Ok(Some(PackEvent::Footer { .. })) => {
                    if let Some(txn) = txn.take() {
                        txn.commit().await?;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    if let Some(txn) = txn.take() {
                        txn.rollback();
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(stored)
    }
}

/// A buffered object transaction.
#[async_trait]
pub trait ObjectTxn: Send {
    /// Buffer a put. Same kind checks as the store's `put`.
    async fn put(&mut self, obj: &Object) -> Result<ObjectId, Error>;

    /// Read through the buffer, falling back to committed storage.
    async fn get(&self, hint: TypeHint, id: &ObjectId) -> Result<Object, Error>;

    /// Atomically persist everything buffered.
    async fn commit(self: Box<Self>) -> Result<(), Error>;

    /// Drop the buffer without touching storage.
    fn rollback(self: Box<Self>);
}
