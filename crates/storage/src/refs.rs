//! The reference store.
//!
//! Refs are stored as string leaves at paths spelled by their own names
//! (`refs/heads/main` → content path `refs/heads/main`), so the ref
//! namespace is just a subtree of the repo document and listing it is a
//! sorted depth-first walk.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

use chaintree::keys::Keypair;
use chaintree::ledger::Transaction;
use chaintree::tree::{self, Tree};
use chaintree::value::Value;

use crate::object::{self, ObjectId};

/// The subtree all references live under.
pub const REFS_PREFIX: &str = "refs";

/// A named pointer to an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// The full ref name, beginning with `refs/`.
    pub name: String,
    /// The object the ref points at.
    pub target: ObjectId,
}

impl Reference {
    /// Construct a reference.
    pub fn new(name: impl Into<String>, target: ObjectId) -> Self {
        Reference {
            name: name.into(),
            target,
        }
    }
}

/// An error from the reference store.
#[derive(Error, Debug)]
pub enum Error {
    /// No reference of that name exists.
    #[error("reference `{0}` not found")]
    NotFound(String),
    /// A compare-and-set lost: the ref is not at the expected value.
    #[error("reference `{0}` has changed")]
    Changed(String),
    /// The name does not live under `refs/`.
    #[error("`{0}` is not a reference name")]
    BadName(String),
    /// The stored leaf is not a valid sha.
    #[error(transparent)]
    BadTarget(#[from] object::Error),
    /// The stored leaf has the wrong shape.
    #[error(transparent)]
    Value(#[from] chaintree::value::Error),
    /// The underlying tree failed.
    #[error(transparent)]
    Tree(#[from] tree::Error),
}

/// Path-structured reference storage over a repository tree.
#[derive(Clone)]
pub struct RefStore {
    tree: Arc<Mutex<Tree>>,
    key: Keypair,
}

impl RefStore {
    /// Open the store over a repository tree, signing with `key`.
    pub fn new(tree: Arc<Mutex<Tree>>, key: Keypair) -> Self {
        RefStore { tree, key }
    }

    fn check_name(name: &str) -> Result<(), Error> {
        if name.starts_with("refs/") {
            Ok(())
        } else {
            Err(Error::BadName(name.to_owned()))
        }
    }

    /// Read the reference named `name`.
    pub async fn get(&self, name: &str) -> Result<Reference, Error> {
        Self::check_name(name)?;
        let tree = self.tree.lock().await;
        match tree.resolve(name) {
            (Some(value), _) => {
                let sha = value.expect_str(name)?;
                Ok(Reference::new(name, ObjectId::from_hex(sha)?))
            }
            (None, _) => Err(Error::NotFound(name.to_owned())),
        }
    }

    /// Unconditionally set a reference.
    pub async fn set(&self, reference: &Reference) -> Result<(), Error> {
        Self::check_name(&reference.name)?;
        let mut tree = self.tree.lock().await;
        tree.play(
            &self.key,
            vec![Transaction::set(
                reference.name.clone(),
                reference.target.hex(),
            )],
        )
        .await?;
        Ok(())
    }

    /// Set `new` only if the ref currently matches `old` (`None` = must be
    /// absent). The loser of a race observes [`Error::Changed`].
    pub async fn compare_and_set(
        &self,
        new: &Reference,
        old: Option<&Reference>,
    ) -> Result<(), Error> {
        let current = match self.get(&new.name).await {
            Ok(reference) => Some(reference),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        match (old, current) {
            (None, None) => {}
            (Some(old), Some(current)) if old.target == current.target => {}
            _ => return Err(Error::Changed(new.name.clone())),
        }
        self.set(new).await
    }

    /// Delete the reference named `name`.
    pub async fn remove(&self, name: &str) -> Result<(), Error> {
        Self::check_name(name)?;
        let mut tree = self.tree.lock().await;
        tree.play(&self.key, vec![Transaction::set(name, Value::Null)])
            .await?;
        Ok(())
    }

    /// Every reference, fully named, in sorted name order.
    ///
    /// Maps are recursed depth-first with sorted keys at every level; null
    /// leaves are skipped.
    pub async fn iter(&self) -> Result<Vec<Reference>, Error> {
        let tree = self.tree.lock().await;
        let mut out = Vec::new();
        if let (Some(node), _) = tree.resolve(REFS_PREFIX) {
            walk(REFS_PREFIX, node, &mut out)?;
        }
        Ok(out)
    }

    /// How many references exist. Everything is "loose" here.
    pub async fn count_loose(&self) -> Result<usize, Error> {
        Ok(self.iter().await?.len())
    }

    /// Storage draws no loose/packed distinction; packing is a no-op.
    pub fn pack_refs(&self) {}
}

fn walk(prefix: &str, node: &Value, out: &mut Vec<Reference>) -> Result<(), Error> {
    match node {
        Value::Map(m) => {
            for (key, child) in m {
                walk(&format!("{prefix}/{key}"), child, out)?;
            }
        }
        Value::Str(sha) => out.push(Reference::new(prefix, ObjectId::from_hex(sha)?)),
        Value::Null => {}
        other => return Err(other.mismatch_at(prefix)),
    }
    Ok(())
}

trait MismatchAt {
    fn mismatch_at(&self, path: &str) -> Error;
}

impl MismatchAt for Value {
    fn mismatch_at(&self, path: &str) -> Error {
        Error::Value(chaintree::value::Error::Malformed {
            path: path.to_owned(),
            expected: "string or map",
            found: self.kind(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chain::test::test_tree;

    fn sha(n: u8) -> ObjectId {
        ObjectId::from_bytes([n; 20])
    }

    async fn store() -> RefStore {
        let (tree, key) = test_tree().await;
        RefStore::new(tree, key)
    }

    #[tokio::test]
    async fn set_get_remove() {
        let refs = store().await;
        let main = Reference::new("refs/heads/main", sha(1));

        refs.set(&main).await.unwrap();
        assert_eq!(refs.get("refs/heads/main").await.unwrap(), main);

        refs.remove("refs/heads/main").await.unwrap();
        assert!(matches!(
            refs.get("refs/heads/main").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn names_outside_refs_are_rejected() {
        let refs = store().await;
        let err = refs.get("objects/ab/cd").await.unwrap_err();
        assert!(matches!(err, Error::BadName(_)));
    }

    #[tokio::test]
    async fn compare_and_set_enforces_the_expected_value() {
        let refs = store().await;
        let name = "refs/heads/main";

        // create: requires absent
        refs.compare_and_set(&Reference::new(name, sha(1)), None)
            .await
            .unwrap();
        let err = refs
            .compare_and_set(&Reference::new(name, sha(2)), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Changed(_)));

        // update: requires the old value to still hold
        let old = Reference::new(name, sha(1));
        refs.compare_and_set(&Reference::new(name, sha(2)), Some(&old))
            .await
            .unwrap();
        let err = refs
            .compare_and_set(&Reference::new(name, sha(3)), Some(&old))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Changed(_)));
    }

    #[tokio::test]
    async fn iteration_is_sorted_and_complete() {
        let refs = store().await;
        for (name, n) in [
            ("refs/tags/v1", 4u8),
            ("refs/heads/main", 1),
            ("refs/heads/dev", 2),
            ("refs/heads/feature/test", 3),
        ] {
            refs.set(&Reference::new(name, sha(n))).await.unwrap();
        }

        let names: Vec<String> = refs
            .iter()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(
            names,
            [
                "refs/heads/dev",
                "refs/heads/feature/test",
                "refs/heads/main",
                "refs/tags/v1",
            ]
        );
        assert_eq!(refs.count_loose().await.unwrap(), 4);
    }
}
