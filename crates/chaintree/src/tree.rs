//! The document-tree wrapper.
//!
//! [`Tree`] is a thin, typed handle over one ledger document: it caches the
//! tip and content root it resolved, exposes path resolution over that
//! snapshot, and plays transaction batches against the tip it holds so that
//! concurrent mutation surfaces as an error instead of a silent rebase.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::keys::Keypair;
use crate::ledger::{self, Ledger, Tip, Transaction};
use crate::value::{self, Value};
use crate::DOC_TYPE;

/// An error from a tree operation.
#[derive(Error, Debug)]
pub enum Error {
    /// The ledger rejected the creation batch.
    #[error("tree creation rejected: {0}")]
    CreationRejected(#[source] ledger::Error),
    /// No document exists for the DID.
    #[error("no tree found for {did}")]
    NotFound {
        /// The DID that resolved to nothing.
        did: String,
    },
    /// The document exists but is not a dgit tree.
    #[error("malformed tree {did}")]
    Malformed {
        /// The offending document.
        did: String,
        /// What was wrong with it.
        #[source]
        source: value::Error,
    },
    /// A value in the content tree had the wrong shape.
    #[error(transparent)]
    Value(#[from] value::Error),
    /// The ledger failed.
    #[error(transparent)]
    Ledger(#[from] ledger::Error),
}

/// A handle on one versioned document.
pub struct Tree {
    ledger: Arc<dyn Ledger>,
    did: String,
    name: String,
    tip: Tip,
    owners: Vec<String>,
    root: Value,
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("did", &self.did)
            .field("name", &self.name)
            .field("tip", &self.tip)
            .field("owners", &self.owners)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl Tree {
    /// Create a new tree named `name`, owned by `owners`, signed by `key`.
    ///
    /// Plays a single genesis batch: ownership, `name`, `createdAt` and the
    /// `__doctype` marker, followed by `extra` in order.
    pub async fn create(
        ledger: Arc<dyn Ledger>,
        name: &str,
        owners: Vec<String>,
        key: &Keypair,
        extra: Vec<Transaction>,
    ) -> Result<Self, Error> {
        let did = key.did();
        let mut txns = vec![
            Transaction::SetOwnership {
                authentications: owners,
            },
            Transaction::set("name", name),
            Transaction::set("createdAt", now_unix()),
            Transaction::set("__doctype", DOC_TYPE),
        ];
        txns.extend(extra);

        ledger
            .play_transactions(&did, key, None, txns)
            .await
            .map_err(Error::CreationRejected)?;
        tracing::debug!(did = %did, name, "created tree");

        Self::find(ledger, &did).await
    }

    /// Load the latest version of the tree at `did`.
    pub async fn find(ledger: Arc<dyn Ledger>, did: &str) -> Result<Self, Error> {
        let doc = ledger
            .get_latest(did)
            .await?
            .ok_or_else(|| Error::NotFound {
                did: did.to_owned(),
            })?;
        let name = match doc.root.resolve("name") {
            (Some(v), _) => v
                .expect_str("name")
                .map_err(|source| Error::Malformed {
                    did: did.to_owned(),
                    source,
                })?
                .to_owned(),
            (None, _) => {
                return Err(Error::Malformed {
                    did: did.to_owned(),
                    source: value::Error::Malformed {
                        path: "name".to_owned(),
                        expected: "string",
                        found: "null",
                    },
                });
            }
        };
        Ok(Tree {
            ledger,
            did: doc.did,
            name,
            tip: doc.tip,
            owners: doc.owners,
            root: doc.root,
        })
    }

    /// The tree's DID.
    pub fn did(&self) -> &str {
        &self.did
    }

    /// The tree's human name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tip this handle resolved.
    pub fn tip(&self) -> &Tip {
        &self.tip
    }

    /// The addresses and DIDs currently authorized to mutate the tree.
    pub fn owners(&self) -> &[String] {
        &self.owners
    }

    /// Resolve `path` within the cached content root.
    ///
    /// See [`Value::resolve`] for the `(value, remaining)` contract.
    pub fn resolve(&self, path: &str) -> (Option<&Value>, Vec<String>) {
        self.root.resolve(path)
    }

    /// Atomically apply `txns`, signed by `key`, against the tip this handle
    /// holds; refreshes the handle on success.
    pub async fn play(&mut self, key: &Keypair, txns: Vec<Transaction>) -> Result<(), Error> {
        self.ledger
            .play_transactions(&self.did, key, Some(&self.tip), txns)
            .await?;
        self.refresh().await
    }

    /// Re-resolve the latest tip and content root.
    pub async fn refresh(&mut self) -> Result<(), Error> {
        let fresh = Self::find(self.ledger.clone(), &self.did).await?;
        self.tip = fresh.tip;
        self.root = fresh.root;
        self.owners = fresh.owners;
        self.name = fresh.name;
        Ok(())
    }

    /// The ledger this tree lives on.
    pub fn ledger(&self) -> Arc<dyn Ledger> {
        self.ledger.clone()
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::keys::{USER_NAMESPACE, genesis_key};
    use crate::memory::MemoryLedger;

    fn ledger() -> Arc<dyn Ledger> {
        Arc::new(MemoryLedger::new())
    }

    #[tokio::test]
    async fn create_then_find() {
        let ledger = ledger();
        let key = genesis_key("alice", USER_NAMESPACE);
        let tree = Tree::create(
            ledger.clone(),
            "alice",
            vec![key.address().to_string()],
            &key,
            vec![],
        )
        .await
        .unwrap();

        let found = Tree::find(ledger, tree.did()).await.unwrap();
        assert_eq!(found.name(), "alice");
        let (doctype, _) = found.resolve("__doctype");
        assert_eq!(doctype.unwrap(), &Value::Str(DOC_TYPE.into()));
        let (created, _) = found.resolve("createdAt");
        assert!(matches!(created.unwrap(), Value::Int(_)));
    }

    #[tokio::test]
    async fn find_unknown_is_not_found() {
        let err = Tree::find(ledger(), "did:dgit:0xdeadbeef").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn find_without_name_is_malformed() {
        let ledger = ledger();
        let key = genesis_key("nameless", USER_NAMESPACE);
        // a raw document with no name set
        ledger
            .play_transactions(&key.did(), &key, None, vec![Transaction::set("x", 1i64)])
            .await
            .unwrap();

        let err = Tree::find(ledger, &key.did()).await.unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[tokio::test]
    async fn play_detects_concurrent_mutation() {
        let ledger = ledger();
        let key = genesis_key("alice", USER_NAMESPACE);
        let mut ours = Tree::create(
            ledger.clone(),
            "alice",
            vec![key.address().to_string()],
            &key,
            vec![],
        )
        .await
        .unwrap();
        let mut theirs = Tree::find(ledger, ours.did()).await.unwrap();

        theirs
            .play(&key, vec![Transaction::set("a", 1i64)])
            .await
            .unwrap();

        let err = ours
            .play(&key, vec![Transaction::set("b", 2i64)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ledger(ledger::Error::TipMoved { .. })));

        ours.refresh().await.unwrap();
        ours.play(&key, vec![Transaction::set("b", 2i64)])
            .await
            .unwrap();
    }
}
