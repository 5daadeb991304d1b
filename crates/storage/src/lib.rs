//! # Storage
//!
//! Git-side persistence over a chaintree: the object store, the reference
//! store, and the composite storer that bundles them into one surface for the
//! transport sessions.
//!
//! ## Layout on the ledger
//!
//! A repository tree carries objects at `objects/<sha[0:2]>/<sha[2:]>` and
//! refs at their own names (`refs/heads/main`, …). Two interchangeable object
//! backends share that path space:
//!
//! - [`chain::ChainStore`] keeps the zlib-wrapped loose encoding inline in the
//!   tree,
//! - [`blob::BlobStore`] uploads the encoding to an external blob network and
//!   stores a `did:sia:` URI instead.
//!
//! Both speak the [`store::ObjectStore`] contract: idempotent puts keyed by
//! SHA-1, type-hinted gets, lazy lexicographic iteration, and object
//! transactions that land a whole packfile as a single ledger batch.
//!
//! ## Packfiles
//!
//! [`pack`] holds the wire codec: a parser that inflates pack entries,
//! resolves deltas and verifies the trailer, surfaced as an event iterator,
//! and an encoder producing undeltified v2 packfiles.
#![warn(missing_docs)]

pub mod blob;
pub mod chain;
pub mod iter;
pub mod object;
pub mod pack;
pub mod readonly;
pub mod refs;
pub mod split;
pub mod store;
pub mod storer;

pub use object::{Object, ObjectId, ObjectType};
pub use store::{ObjectStore, ObjectTxn, TypeHint};
pub use storer::Storer;
