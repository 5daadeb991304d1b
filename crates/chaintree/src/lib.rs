//! # Chaintree
//!
//! The `chaintree` crate holds the ledger-facing data model of dgit: versioned,
//! owned document trees addressed by DIDs, and the typed views over them that
//! the rest of the system works with.
//!
//! ## Key Concepts
//!
//! **Trees** are versioned documents on a tamper-evident ledger. A tree is
//! identified by a DID derived from a keypair, carries a content root (a map of
//! nested maps and scalars), and only changes through signed transaction
//! batches authored by a current owner.
//!
//! **Typed views** interpret a tree's content for one purpose:
//! - [`UserTree`]: one per username, mapping repository names to repo DIDs,
//! - [`RepoTree`]: one per repository, holding config, the default team, git
//!   objects and refs,
//! - [`TeamTree`]: a member set whose DIDs are exactly the tree's owners.
//!
//! **The ledger itself is external.** The consensus substrate is reached
//! through the async [`Ledger`] trait; an in-memory implementation backs tests
//! and offline use.
//!
//! ## Identity
//!
//! Tree keys are derived deterministically from `(name, namespace)` so that
//! any machine can locate a tree knowing only its name; user keys are derived
//! from a BIP-39 recovery phrase with the username as seed passphrase. See
//! [`keys`].
#![warn(missing_docs)]

pub mod client;
pub mod keys;
pub mod ledger;
pub mod memory;
pub mod repo;
pub mod team;
pub mod tree;
pub mod user;
pub mod value;

pub use keys::Keypair;
pub use ledger::{Document, Ledger, Tip, Transaction};
pub use memory::MemoryLedger;
pub use repo::RepoTree;
pub use team::TeamTree;
pub use tree::Tree;
pub use user::UserTree;
pub use value::Value;

/// The document type marker set at creation on every dgit tree.
pub const DOC_TYPE: &str = "dgit";

/// The DID method prefix for tree identifiers.
pub const DID_PREFIX: &str = "did:dgit:";
