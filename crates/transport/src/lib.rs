//! # Transport
//!
//! The git-side sessions served over the ledger: reference advertisement,
//! upload-pack (fetch) and receive-pack (push), plus the client and scheme
//! registry the remote helper drives them through.
//!
//! A [`Session`] is one conversation between git and a repository tree: it
//! pins the repo snapshot it resolved at open, negotiates capabilities, and
//! either streams a packfile out (fetch) or lands one as a single ledger
//! batch followed by one batch of ref mutations (push).
#![warn(missing_docs)]


pub mod auth;
pub mod caps;
pub mod client;
pub mod endpoint;
pub mod receive;
pub mod session;
pub mod upload;

pub use auth::PrivateKeyAuth;
pub use caps::CapabilitySet;
pub use client::{Client, Registry};
pub use endpoint::Endpoint;
pub use receive::{Action, RefCommand, ReceivePackRequest, ReportStatus};
pub use session::{AdvertisedRefs, Error, Service, Session};
pub use upload::{UploadPackRequest, UploadPackResponse};

/// The URL scheme the helper registers for, and the DID method of trees.
pub const SCHEME: &str = "dgit";
