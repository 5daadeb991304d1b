//! An in-process [`Ledger`].
//!
//! Backs the test suite and offline use. It enforces the same contract a
//! networked substrate would: creation only by the keypair the DID names,
//! mutation only by a (transitively resolved) owner, and optimistic
//! concurrency on the tip.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::keys::{Keypair, keccak256};
use crate::ledger::{Document, Error, Ledger, Tip, Transaction};
use crate::value::Value;
use crate::DID_PREFIX;

/// How many DID indirections ownership resolution will follow.
///
/// Repo → team → user → address is three hops; four leaves headroom without
/// letting a membership cycle spin.
const MAX_OWNER_DEPTH: usize = 4;

#[derive(Clone)]
struct Doc {
    seq: u64,
    tip: Tip,
    owners: Vec<String>,
    root: Value,
}

/// An in-memory ledger holding every document in a process-local map.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    docs: Arc<RwLock<HashMap<String, Doc>>>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn get_latest(&self, did: &str) -> Result<Option<Document>, Error> {
        let docs = self.docs.read().await;
        Ok(docs.get(did).map(|doc| Document {
            did: did.to_owned(),
            tip: doc.tip,
            owners: doc.owners.clone(),
            root: doc.root.clone(),
        }))
    }

    async fn play_transactions(
        &self,
        did: &str,
        signer: &Keypair,
        expected_tip: Option<&Tip>,
        txns: Vec<Transaction>,
    ) -> Result<Tip, Error> {
        let mut docs = self.docs.write().await;
        let address = signer.address().to_string();

        let mut doc = match docs.get(did) {
            Some(doc) => {
                if let Some(expected) = expected_tip {
                    if *expected != doc.tip {
                        return Err(Error::TipMoved {
                            did: did.to_owned(),
                        });
                    }
                }
                if !authorized(&docs, &doc.owners, &address, MAX_OWNER_DEPTH) {
                    return Err(Error::Unauthorized {
                        did: did.to_owned(),
                        address,
                    });
                }
                doc.clone()
            }
            None => {
                // Genesis: only the keypair the DID names may create it.
                if signer.did() != did {
                    return Err(Error::Unauthorized {
                        did: did.to_owned(),
                        address,
                    });
                }
                Doc {
                    seq: 0,
                    tip: Tip::new([0; 32]),
                    owners: vec![address.clone()],
                    root: Value::Map(Default::default()),
                }
            }
        };

        // Apply to the copy; the stored document only changes if every
        // transaction in the batch succeeds.
        for txn in txns {
            match txn {
                Transaction::SetData { path, value } => doc
                    .root
                    .set_path(&path, value)
                    .map_err(|e| Error::Rejected(e.to_string()))?,
                Transaction::SetOwnership { authentications } => {
                    if authentications.is_empty() {
                        return Err(Error::Rejected(
                            "ownership set may not be empty".to_owned(),
                        ));
                    }
                    doc.owners = authentications;
                }
            }
        }

        doc.seq += 1;
        doc.tip = tip_of(did, doc.seq, &doc.root);
        let tip = doc.tip;
        docs.insert(did.to_owned(), doc);
        Ok(tip)
    }

    async fn wait_until_ready(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Whether `address` may author a batch against a document with `owners`.
///
/// An owner entry that is itself a DID delegates to that document's owners,
/// bounded by `depth`.
fn authorized(docs: &HashMap<String, Doc>, owners: &[String], address: &str, depth: usize) -> bool {
    if owners.iter().any(|o| o == address) {
        return true;
    }
    if depth == 0 {
        return false;
    }
    owners
        .iter()
        .filter(|o| o.starts_with(DID_PREFIX))
        .filter_map(|did| docs.get(did.as_str()))
        .any(|doc| authorized(docs, &doc.owners, address, depth - 1))
}

fn tip_of(did: &str, seq: u64, root: &Value) -> Tip {
    let mut buf = Vec::new();
    buf.extend_from_slice(did.as_bytes());
    buf.extend_from_slice(&seq.to_be_bytes());
    fingerprint(root, &mut buf);
    Tip::new(keccak256(&buf))
}

fn fingerprint(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Null => buf.push(0),
        Value::Int(i) => {
            buf.push(1);
            buf.extend_from_slice(&i.to_be_bytes());
        }
        Value::Str(s) => {
            buf.push(2);
            buf.extend_from_slice(&(s.len() as u64).to_be_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            buf.push(3);
            buf.extend_from_slice(&(b.len() as u64).to_be_bytes());
            buf.extend_from_slice(b);
        }
        Value::Map(m) => {
            buf.push(4);
            buf.extend_from_slice(&(m.len() as u64).to_be_bytes());
            for (k, v) in m {
                buf.extend_from_slice(&(k.len() as u64).to_be_bytes());
                buf.extend_from_slice(k.as_bytes());
                fingerprint(v, buf);
            }
        }
        Value::Seq(s) => {
            buf.push(5);
            buf.extend_from_slice(&(s.len() as u64).to_be_bytes());
            for v in s {
                fingerprint(v, buf);
            }
        }
    }
}
