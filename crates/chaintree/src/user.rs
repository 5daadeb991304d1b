//! The per-user tree: `repos/<name> → repo DID`.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::keys::{self, Keypair, USER_NAMESPACE};
use crate::ledger::{Ledger, Transaction};
use crate::tree::{self, Tree};
use crate::value::Value;

/// An error from a user-tree operation.
#[derive(Error, Debug)]
pub enum Error {
    /// No tree exists for the username.
    #[error("no user found for `{0}`")]
    NotFound(String),
    /// The underlying tree failed.
    #[error(transparent)]
    Tree(#[from] tree::Error),
}

/// The tree registering a user's repositories.
///
/// There is exactly one per username: its key is derived from the lowercased
/// username, so every machine finds the same tree.
#[derive(Debug)]
pub struct UserTree {
    tree: Tree,
}

impl UserTree {
    /// The DID a user tree has for `username`, whether or not it exists yet.
    pub fn did_for(username: &str) -> String {
        keys::genesis_did(username, USER_NAMESPACE)
    }

    /// Create the tree for `username`, owned by the given signing addresses.
    pub async fn create(
        ledger: Arc<dyn Ledger>,
        username: &str,
        owners: Vec<String>,
    ) -> Result<Self, Error> {
        let username = username.to_lowercase();
        let genesis = keys::genesis_key(&username, USER_NAMESPACE);
        let tree = Tree::create(ledger, &username, owners, &genesis, vec![]).await?;
        Ok(UserTree { tree })
    }

    /// Load the tree for `username`.
    pub async fn find(ledger: Arc<dyn Ledger>, username: &str) -> Result<Self, Error> {
        let username = username.to_lowercase();
        let did = Self::did_for(&username);
        match Tree::find(ledger, &did).await {
            Ok(tree) => Ok(UserTree { tree }),
            Err(tree::Error::NotFound { .. }) => Err(Error::NotFound(username)),
            Err(e) => Err(e.into()),
        }
    }

    /// The user tree's DID.
    pub fn did(&self) -> &str {
        self.tree.did()
    }

    /// The username the tree was created for.
    pub fn username(&self) -> &str {
        self.tree.name()
    }

    /// Whether `address` is one of the user's signing addresses.
    pub fn is_owner(&self, address: &str) -> bool {
        self.tree.owners().iter().any(|o| o == address)
    }

    /// The registered repositories: name → repo DID. Empty if none.
    pub fn repos(&self) -> BTreeMap<String, String> {
        let mut repos = BTreeMap::new();
        if let (Some(Value::Map(m)), _) = self.tree.resolve("repos") {
            for (name, v) in m {
                if let Value::Str(did) = v {
                    repos.insert(name.clone(), did.clone());
                }
            }
        }
        repos
    }

    /// Register a repository DID under `reponame`.
    pub async fn add_repo(
        &mut self,
        key: &Keypair,
        reponame: &str,
        did: &str,
    ) -> Result<(), Error> {
        self.tree
            .play(key, vec![Transaction::set(format!("repos/{reponame}"), did)])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::memory::MemoryLedger;

    #[tokio::test]
    async fn create_find_and_register() {
        let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
        let key = keys::genesis_key("alice-signing", USER_NAMESPACE);

        let mut user = UserTree::create(ledger.clone(), "Alice", vec![key.address().to_string()])
            .await
            .unwrap();
        assert!(user.repos().is_empty());
        assert!(user.is_owner(&key.address().to_string()));

        user.add_repo(&key, "widgets", "did:dgit:0xabc").await.unwrap();
        let found = UserTree::find(ledger, "alice").await.unwrap();
        assert_eq!(
            found.repos().get("widgets").map(String::as_str),
            Some("did:dgit:0xabc")
        );
    }

    #[tokio::test]
    async fn find_missing_user() {
        let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
        let err = UserTree::find(ledger, "ghost").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(name) if name == "ghost"));
    }
}
