//! The composite storer: one git-storage surface per repository.
//!
//! Bundles the object store (backend chosen from the repo's
//! `config.objectStorage.type`, defaulting to the externalized backend), the
//! reference store, and the in-memory shallow/index/config stores the git
//! side expects to exist even though this storage never persists them.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;

use chaintree::keys::Keypair;
use chaintree::repo::{ObjectStorage, STORAGE_TYPE_PATH};
use chaintree::tree::Tree;

use crate::blob::{BlobNetwork, BlobStore};
use crate::chain::ChainStore;
use crate::object::ObjectId;
use crate::refs::RefStore;
use crate::store::{Error, ObjectStore};

/// Everything a transport session needs to serve one repository.
#[derive(Clone)]
pub struct Storer {
    tree: Arc<Mutex<Tree>>,
    objects: Arc<dyn ObjectStore>,
    refs: RefStore,
    shallow: Arc<StdMutex<Vec<ObjectId>>>,
    index: Arc<StdMutex<Option<Vec<u8>>>>,
    config: Arc<StdMutex<BTreeMap<String, String>>>,
}

impl Storer {
    /// Open a storer over a repository tree.
    ///
    /// The object backend is selected by the repo's stored config; `net` is
    /// only consulted when the externalized backend is chosen.
    pub fn open(tree: Tree, key: Keypair, net: Arc<dyn BlobNetwork>) -> Result<Self, Error> {
        let backend = match tree.resolve(STORAGE_TYPE_PATH) {
            (Some(v), _) => v.expect_str(STORAGE_TYPE_PATH)?.parse()?,
            (None, _) => ObjectStorage::default(),
        };
        let tree = Arc::new(Mutex::new(tree));
        let objects: Arc<dyn ObjectStore> = match backend {
            ObjectStorage::Chaintree => Arc::new(ChainStore::new(tree.clone(), key.clone())),
            ObjectStorage::Siaskynet => Arc::new(BlobStore::new(tree.clone(), key.clone(), net)),
        };
        tracing::debug!(backend = %backend, "opened storer");
        Ok(Storer {
            refs: RefStore::new(tree.clone(), key),
            tree,
            objects,
            shallow: Arc::default(),
            index: Arc::default(),
            config: Arc::default(),
        })
    }

    /// The shared repository tree snapshot.
    pub fn tree(&self) -> Arc<Mutex<Tree>> {
        self.tree.clone()
    }

    /// The object store.
    pub fn objects(&self) -> Arc<dyn ObjectStore> {
        self.objects.clone()
    }

    /// The reference store.
    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    /// Replace the in-memory shallow roots.
    pub fn set_shallow(&self, roots: Vec<ObjectId>) {
        *self.shallow.lock().expect("shallow lock") = roots;
    }

    /// The in-memory shallow roots.
    pub fn shallow(&self) -> Vec<ObjectId> {
        self.shallow.lock().expect("shallow lock").clone()
    }

    /// Set an in-memory config entry.
    pub fn set_config(&self, key: impl Into<String>, value: impl Into<String>) {
        self.config
            .lock()
            .expect("config lock")
            .insert(key.into(), value.into());
    }

    /// Read an in-memory config entry.
    pub fn config(&self, key: &str) -> Option<String> {
        self.config.lock().expect("config lock").get(key).cloned()
    }

    /// Replace the in-memory index blob.
    pub fn set_index(&self, index: Option<Vec<u8>>) {
        *self.index.lock().expect("index lock") = index;
    }

    /// The in-memory index blob.
    pub fn index(&self) -> Option<Vec<u8>> {
        self.index.lock().expect("index lock").clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::blob::MemoryBlobNetwork;
    use chaintree::Transaction;
    use chaintree::keys::{USER_NAMESPACE, genesis_key};
    use chaintree::memory::MemoryLedger;

    async fn tree_with_backend(backend: Option<&str>) -> (Tree, Keypair) {
        let ledger: Arc<dyn chaintree::Ledger> = Arc::new(MemoryLedger::new());
        let key = genesis_key("storer-tests", USER_NAMESPACE);
        let extra = backend
            .map(|b| vec![Transaction::set(STORAGE_TYPE_PATH, b)])
            .unwrap_or_default();
        let tree = Tree::create(
            ledger,
            "storer-tests",
            vec![key.address().to_string()],
            &key,
            extra,
        )
        .await
        .unwrap();
        (tree, key)
    }

    #[tokio::test]
    async fn backend_defaults_to_externalized() {
        let (tree, key) = tree_with_backend(None).await;
        let storer = Storer::open(tree, key, Arc::new(MemoryBlobNetwork::new())).unwrap();
        // objects written through the default backend are stored as links
        let obj = crate::Object::new(crate::ObjectType::Blob, b"x".to_vec());
        let id = storer.objects().put(&obj).await.unwrap();
        let guard = storer.tree();
        let guard = guard.lock().await;
        let (hit, _) = guard.resolve(&crate::store::object_path(&id));
        assert!(matches!(hit, Some(chaintree::Value::Str(s)) if s.starts_with("did:sia:")));
    }

    #[tokio::test]
    async fn backend_honors_the_repo_config() {
        let (tree, key) = tree_with_backend(Some("chaintree")).await;
        let storer = Storer::open(tree, key, Arc::new(MemoryBlobNetwork::new())).unwrap();
        let obj = crate::Object::new(crate::ObjectType::Blob, b"x".to_vec());
        let id = storer.objects().put(&obj).await.unwrap();
        let guard = storer.tree();
        let guard = guard.lock().await;
        let (hit, _) = guard.resolve(&crate::store::object_path(&id));
        assert!(matches!(hit, Some(chaintree::Value::Bytes(_))));
    }

    #[tokio::test]
    async fn unknown_backend_is_an_error() {
        let (tree, key) = tree_with_backend(Some("carrier-pigeon")).await;
        assert!(Storer::open(tree, key, Arc::new(MemoryBlobNetwork::new())).is_err());
    }

    #[tokio::test]
    async fn aux_stores_are_process_local() {
        let (tree, key) = tree_with_backend(Some("chaintree")).await;
        let storer = Storer::open(tree, key, Arc::new(MemoryBlobNetwork::new())).unwrap();
        storer.set_config("core.bare", "true");
        assert_eq!(storer.config("core.bare").as_deref(), Some("true"));
        storer.set_shallow(vec![ObjectId::ZERO]);
        assert_eq!(storer.shallow(), vec![ObjectId::ZERO]);
        assert!(storer.index().is_none());
    }
}
