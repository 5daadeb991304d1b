//! Backend A: objects inline in the repository tree.
//!
//! The loose encoding is stored as a byte string at
//! `objects/<sha[0:2]>/<sha[2:]>`; a single put is a single-transaction play
//! and a transaction commit is one batched play regardless of object count.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use chaintree::keys::Keypair;
use chaintree::ledger::Transaction;
use chaintree::tree::Tree;
use chaintree::value::Value;

use crate::iter::{ObjectIter, ShardRead};
use crate::object::{Object, ObjectId};
use crate::store::{Error, ObjectStore, ObjectTxn, TypeHint, object_path, sorted_keys};

/// The ledger-embedded object store.
#[derive(Clone)]
pub struct ChainStore {
    tree: Arc<Mutex<Tree>>,
    key: Keypair,
}

impl ChainStore {
    /// Open the store over a repository tree, signing with `key`.
    pub fn new(tree: Arc<Mutex<Tree>>, key: Keypair) -> Self {
        ChainStore { tree, key }
    }
}

#[async_trait]
impl ObjectStore for ChainStore {
    async fn put(&self, obj: &Object) -> Result<ObjectId, Error> {
        if obj.kind.is_delta() {
            return Err(Error::InvalidType(obj.kind));
        }
        let id = obj.id();
        let mut tree = self.tree.lock().await;
        tree.play(
            &self.key,
            vec![Transaction::set(object_path(&id), obj.encode_loose())],
        )
        .await?;
        Ok(id)
    }

    async fn get(&self, hint: TypeHint, id: &ObjectId) -> Result<Object, Error> {
        let tree = self.tree.lock().await;
        let path = object_path(id);
        let obj = match tree.resolve(&path) {
            (Some(Value::Bytes(bytes)), _) => Object::decode_loose(bytes)?,
            (Some(other), _) => {
                return Err(Error::Corrupt(format!(
                    "expected inline object bytes at {path}, found {}",
                    other.kind()
                )));
            }
            (None, _) => return Err(Error::NotFound(*id)),
        };
        if !hint.matches(obj.kind) {
            return Err(Error::NotFound(*id));
        }
        Ok(obj)
    }

    fn iter(&self, hint: TypeHint) -> ObjectIter {
        ObjectIter::new(Arc::new(self.clone()), hint)
    }

    async fn begin(&self) -> Result<Box<dyn ObjectTxn>, Error> {
        Ok(Box::new(ChainTxn {
            store: self.clone(),
            objects: Vec::new(),
            ids: HashMap::new(),
        }))
    }
}

#[async_trait]
impl ShardRead for ChainStore {
    async fn shards(&self) -> Result<Vec<String>, Error> {
        let tree = self.tree.lock().await;
        Ok(sorted_keys(&tree, crate::store::OBJECTS_PREFIX))
    }

    async fn keys(&self, shard: &str) -> Result<Vec<String>, Error> {
        let tree = self.tree.lock().await;
        Ok(sorted_keys(
            &tree,
            &format!("{}/{shard}", crate::store::OBJECTS_PREFIX),
        ))
    }

    async fn load(&self, shard: &str, key: &str) -> Result<Object, Error> {
        let id = ObjectId::from_hex(&format!("{shard}{key}"))?;
        self.get(TypeHint::Any, &id).await
    }
}

struct ChainTxn {
    store: ChainStore,
    objects: Vec<Object>,
    ids: HashMap<ObjectId, usize>,
}

#[async_trait]
impl ObjectTxn for ChainTxn {
    async fn put(&mut self, obj: &Object) -> Result<ObjectId, Error> {
        if obj.kind.is_delta() {
            return Err(Error::InvalidType(obj.kind));
        }
        let id = obj.id();
        if !self.ids.contains_key(&id) {
            self.ids.insert(id, self.objects.len());
            self.objects.push(obj.clone());
        }
        Ok(id)
    }

    async fn get(&self, hint: TypeHint, id: &ObjectId) -> Result<Object, Error> {
        if let Some(&index) = self.ids.get(id) {
            let obj = &self.objects[index];
            if hint.matches(obj.kind) {
                return Ok(obj.clone());
            }
            return Err(Error::NotFound(*id));
        }
        self.store.get(hint, id).await
    }

    async fn commit(self: Box<Self>) -> Result<(), Error> {
        if self.objects.is_empty() {
            return Ok(());
        }
        let txns = self
            .objects
            .iter()
            .map(|obj| Transaction::set(object_path(&obj.id()), obj.encode_loose()))
            .collect();
        let mut tree = self.store.tree.lock().await;
        tree.play(&self.store.key, txns).await?;
        tracing::debug!(objects = self.objects.len(), "committed object batch");
        Ok(())
    }

    fn rollback(self: Box<Self>) {}
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::object::ObjectType;
    use crate::pack;
    use chaintree::keys::{USER_NAMESPACE, genesis_key};
    use chaintree::memory::MemoryLedger;

    /// A tree owned directly by the returned key, for store tests.
    pub(crate) async fn test_tree() -> (Arc<Mutex<Tree>>, Keypair) {
        let ledger: Arc<dyn chaintree::Ledger> = Arc::new(MemoryLedger::new());
        let key = genesis_key("store-tests", USER_NAMESPACE);
        let tree = Tree::create(
            ledger,
            "store-tests",
            vec![key.address().to_string()],
            &key,
            vec![],
        )
        .await
        .unwrap();
        (Arc::new(Mutex::new(tree)), key)
    }

    fn blob(text: &str) -> Object {
        Object::new(ObjectType::Blob, text.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let (tree, key) = test_tree().await;
        let store = ChainStore::new(tree, key);
        let obj = blob("hello");

        let id = store.put(&obj).await.unwrap();
        assert_eq!(id, obj.id());
        assert_eq!(store.get(TypeHint::Any, &id).await.unwrap(), obj);
        assert_eq!(
            store.get(TypeHint::Kind(ObjectType::Blob), &id).await.unwrap(),
            obj
        );
        assert_eq!(store.size(&id).await.unwrap(), 5);
        assert!(store.contains(&id).await.unwrap());

        // repeated puts are no-ops that still return the hash
        assert_eq!(store.put(&obj).await.unwrap(), id);
    }

    #[tokio::test]
    async fn type_hint_mismatch_reads_as_absent() {
        let (tree, key) = test_tree().await;
        let store = ChainStore::new(tree, key);
        let id = store.put(&blob("hello")).await.unwrap();

        let err = store
            .get(TypeHint::Kind(ObjectType::Commit), &id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(found) if found == id));
    }

    #[tokio::test]
    async fn deltas_are_rejected_without_touching_storage() {
        let (tree, key) = test_tree().await;
        let store = ChainStore::new(tree.clone(), key);
        let delta = Object::new(ObjectType::OfsDelta, vec![1, 2, 3]);

        let err = store.put(&delta).await.unwrap_err();
        assert!(matches!(err, Error::InvalidType(ObjectType::OfsDelta)));

        let guard = tree.lock().await;
        let (hit, _) = guard.resolve(crate::store::OBJECTS_PREFIX);
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn iteration_is_lexicographic_and_filtered() {
        let (tree, key) = test_tree().await;
        let store = ChainStore::new(tree, key);

        let mut ids = Vec::new();
        for text in ["one", "two", "three", "four", "five"] {
            ids.push(store.put(&blob(text)).await.unwrap());
        }
        store
            .put(&Object::new(ObjectType::Tree, vec![]))
            .await
            .unwrap();

        let all = store.iter(TypeHint::Any).collect().await.unwrap();
        let seen: Vec<String> = all.iter().map(|o| o.id().hex()).collect();
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(seen, sorted);
        assert_eq!(all.len(), 6);

        let blobs = store
            .iter(TypeHint::Kind(ObjectType::Blob))
            .collect()
            .await
            .unwrap();
        assert_eq!(blobs.len(), 5);
    }

    #[tokio::test]
    async fn pack_ingestion_is_atomic() {
        let (tree, key) = test_tree().await;
        let store = ChainStore::new(tree.clone(), key);

        let objects = vec![blob("a"), blob("b"), blob("c")];
        let pack = pack::encode(&objects);

        // a corrupted trailer must leave nothing behind
        let mut bad = pack.clone();
        let last = bad.len() - 1;
        bad[last] ^= 0xff;
        assert!(store.write_pack(&bad).await.is_err());
        for obj in &objects {
            assert!(!store.contains(&obj.id()).await.unwrap());
        }

        // the intact pack lands everything in one batch
        assert_eq!(store.write_pack(&pack).await.unwrap(), 3);
        for obj in &objects {
            assert!(store.contains(&obj.id()).await.unwrap());
        }
    }

    #[tokio::test]
    async fn txn_get_reads_through_the_buffer() {
        let (tree, key) = test_tree().await;
        let store = ChainStore::new(tree, key);
        let committed = blob("committed");
        store.put(&committed).await.unwrap();

        let mut txn = store.begin().await.unwrap();
        let staged = blob("staged");
        txn.put(&staged).await.unwrap();

        assert_eq!(
            txn.get(TypeHint::Any, &staged.id()).await.unwrap(),
            staged
        );
        assert_eq!(
            txn.get(TypeHint::Any, &committed.id()).await.unwrap(),
            committed
        );

        // rollback drops the staged object
        txn.rollback();
        assert!(!store.contains(&staged.id()).await.unwrap());
    }
}
