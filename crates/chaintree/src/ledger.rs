//! The seam to the consensus substrate.
//!
//! dgit does not implement the ledger; it assumes one that can hand back the
//! latest signed version of a document and atomically apply a transaction
//! batch. [`Ledger`] is that assumption as a trait. The in-memory
//! implementation lives in [`crate::memory`]; a networked client would
//! implement the same trait out of tree.

use async_trait::async_trait;
use thiserror::Error;

use crate::keys::Keypair;
use crate::value::Value;

/// The signed tip of a document: changes exactly when the document changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tip([u8; 32]);

impl Tip {
    /// Wrap a raw 32-byte tip digest.
    pub fn new(bytes: [u8; 32]) -> Self {
        Tip(bytes)
    }
}

impl std::fmt::Display for Tip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// One mutation inside a transaction batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Transaction {
    /// Set (or, with [`Value::Null`], delete) the value at a content path.
    SetData {
        /// Slash-separated content path.
        path: String,
        /// The value to store.
        value: Value,
    },
    /// Replace the document's ownership set.
    SetOwnership {
        /// Addresses or DIDs permitted to author future batches.
        authentications: Vec<String>,
    },
}

impl Transaction {
    /// Shorthand for a [`Transaction::SetData`].
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Transaction::SetData {
            path: path.into(),
            value: value.into(),
        }
    }
}

/// A snapshot of a document's latest version.
#[derive(Debug, Clone)]
pub struct Document {
    /// The document's DID.
    pub did: String,
    /// The signed tip of this version.
    pub tip: Tip,
    /// Addresses or DIDs permitted to author batches.
    pub owners: Vec<String>,
    /// The content root.
    pub root: Value,
}

/// An error surfaced by a ledger implementation.
#[derive(Error, Debug)]
pub enum Error {
    /// The signer is not in the document's (transitive) ownership set.
    #[error("`{address}` is not an owner of {did}")]
    Unauthorized {
        /// The document being mutated.
        did: String,
        /// The rejected signer address.
        address: String,
    },
    /// The document's tip moved since the caller resolved it.
    #[error("transaction replay failed: tip of {did} has moved")]
    TipMoved {
        /// The document whose tip moved.
        did: String,
    },
    /// The ledger rejected the batch outright.
    #[error("transaction batch rejected: {0}")]
    Rejected(String),
    /// The ledger did not become ready in time.
    #[error("timed out waiting for the ledger")]
    Timeout,
    /// Transport-level failure talking to the ledger.
    #[error("ledger i/o: {0}")]
    Io(String),
}

/// A versioned-document ledger.
///
/// Implementations must apply each batch atomically and order concurrent
/// batches on the same document: a batch played against a stale tip fails
/// with [`Error::TipMoved`] rather than silently rebasing.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Fetch the latest version of `did`, or `None` if it has never been
    /// created.
    async fn get_latest(&self, did: &str) -> Result<Option<Document>, Error>;

    /// Atomically apply `txns` to `did`, signed by `signer`.
    ///
    /// `expected_tip` is the tip the caller resolved; `None` only for
    /// creation, which requires `did == signer.did()`. Returns the new tip.
    async fn play_transactions(
        &self,
        did: &str,
        signer: &Keypair,
        expected_tip: Option<&Tip>,
        txns: Vec<Transaction>,
    ) -> Result<Tip, Error>;

    /// Resolve once the ledger has seen its first round and can serve reads.
    async fn wait_until_ready(&self) -> Result<(), Error>;
}
