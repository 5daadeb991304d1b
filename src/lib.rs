//! # dgit
//!
//! A decentralized git remote: an unmodified git client can clone, fetch and
//! push against `dgit://` URLs whose reference state lives on a per-repository
//! ledger tree and whose objects live either inline on that tree or in an
//! external blob network.
//!
//! The heavy lifting is in the workspace crates: `chaintree` (ledger data
//! model), `storage` (object/ref persistence) and `transport` (sessions).
//! This crate carries the user-facing surfaces: the CLI, the
//! git-remote-helper loop, and the keyring.

pub mod cli;
pub mod helper;
pub mod keyring;
pub mod repo;
