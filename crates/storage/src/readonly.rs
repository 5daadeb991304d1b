//! Readonly wrappers.
//!
//! Reads delegate to the real store; writes land in an ephemeral in-memory
//! overlay whose lifetime ends with the process. Useful when the helper
//! needs a store that behaves normally but must never mutate the ledger.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::iter::ObjectIter;
use crate::object::{Object, ObjectId};
use crate::refs::{Error as RefError, RefStore, Reference};
use crate::store::{Error, ObjectStore, ObjectTxn, TypeHint};

/// An object store that swallows writes into a discarded overlay.
#[derive(Clone)]
pub struct ReadonlyObjects {
    inner: Arc<dyn ObjectStore>,
    overlay: Arc<RwLock<HashMap<ObjectId, Object>>>,
}

impl ReadonlyObjects {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        ReadonlyObjects {
            inner,
            overlay: Arc::default(),
        }
    }
}

#[async_trait]
impl ObjectStore for ReadonlyObjects {
    async fn put(&self, obj: &Object) -> Result<ObjectId, Error> {
        if obj.kind.is_delta() {
            return Err(Error::InvalidType(obj.kind));
        }
        let id = obj.id();
        self.overlay.write().await.insert(id, obj.clone());
        Ok(id)
    }

    async fn get(&self, hint: TypeHint, id: &ObjectId) -> Result<Object, Error> {
        if let Some(obj) = self.overlay.read().await.get(id) {
            if hint.matches(obj.kind) {
                return Ok(obj.clone());
            }
            return Err(Error::NotFound(*id));
        }
        self.inner.get(hint, id).await
    }

    /// Iteration sees only the real store; overlay writes are ephemeral.
    fn iter(&self, hint: TypeHint) -> ObjectIter {
        self.inner.iter(hint)
    }

    async fn begin(&self) -> Result<Box<dyn ObjectTxn>, Error> {
        Ok(Box::new(OverlayTxn {
            store: self.clone(),
            objects: Vec::new(),
        }))
    }
}

struct OverlayTxn {
    store: ReadonlyObjects,
    objects: Vec<Object>,
}

#[async_trait]
impl ObjectTxn for OverlayTxn {
    async fn put(&mut self, obj: &Object) -> Result<ObjectId, Error> {
        if obj.kind.is_delta() {
            return Err(Error::InvalidType(obj.kind));
        }
        self.objects.push(obj.clone());
        Ok(obj.id())
    }

    async fn get(&self, hint: TypeHint, id: &ObjectId) -> Result<Object, Error> {
        if let Some(obj) = self.objects.iter().find(|o| o.id() == *id) {
            if hint.matches(obj.kind) {
                return Ok(obj.clone());
            }
            return Err(Error::NotFound(*id));
        }
        self.store.get(hint, id).await
    }

    async fn commit(self: Box<Self>) -> Result<(), Error> {
        let mut overlay = self.store.overlay.write().await;
        for obj in self.objects {
            overlay.insert(obj.id(), obj);
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) {}
}

/// A ref store that swallows writes into a discarded overlay.
#[derive(Clone)]
pub struct ReadonlyRefs {
    inner: RefStore,
    overlay: Arc<RwLock<BTreeMap<String, Option<ObjectId>>>>,
}

impl ReadonlyRefs {
    /// Wrap `inner`.
    pub fn new(inner: RefStore) -> Self {
        ReadonlyRefs {
            inner,
            overlay: Arc::default(),
        }
    }

    /// Read a ref, seeing overlay writes first.
    pub async fn get(&self, name: &str) -> Result<Reference, RefError> {
        match self.overlay.read().await.get(name) {
            Some(Some(target)) => Ok(Reference::new(name, *target)),
            Some(None) => Err(RefError::NotFound(name.to_owned())),
            None => self.inner.get(name).await,
        }
    }

    /// Write a ref into the overlay only.
    pub async fn set(&self, reference: &Reference) -> Result<(), RefError> {
        self.overlay
            .write()
            .await
            .insert(reference.name.clone(), Some(reference.target));
        Ok(())
    }

    /// Delete a ref in the overlay only.
    pub async fn remove(&self, name: &str) -> Result<(), RefError> {
        self.overlay.write().await.insert(name.to_owned(), None);
        Ok(())
    }

    /// List refs with the overlay applied over the real store.
    pub async fn iter(&self) -> Result<Vec<Reference>, RefError> {
        let mut merged: BTreeMap<String, ObjectId> = self
            .inner
            .iter()
            .await?
            .into_iter()
            .map(|r| (r.name, r.target))
            .collect();
        for (name, target) in self.overlay.read().await.iter() {
            match target {
                Some(target) => {
                    merged.insert(name.clone(), *target);
                }
                None => {
                    merged.remove(name);
                }
            }
        }
        Ok(merged
            .into_iter()
            .map(|(name, target)| Reference::new(name, target))
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chain::{ChainStore, test::test_tree};
    use crate::object::ObjectType;

    #[tokio::test]
    async fn writes_never_reach_the_inner_store() {
        let (tree, key) = test_tree().await;
        let inner = Arc::new(ChainStore::new(tree, key.clone()));
        let readonly = ReadonlyObjects::new(inner.clone());

        let obj = Object::new(ObjectType::Blob, b"ephemeral".to_vec());
        let id = readonly.put(&obj).await.unwrap();

        assert_eq!(readonly.get(TypeHint::Any, &id).await.unwrap(), obj);
        assert!(!inner.contains(&id).await.unwrap());
    }

    #[tokio::test]
    async fn ref_overlay_shadows_and_deletes() {
        let (tree, key) = test_tree().await;
        let inner = RefStore::new(tree, key);
        let real = Reference::new("refs/heads/main", ObjectId::from_bytes([1; 20]));
        inner.set(&real).await.unwrap();

        let readonly = ReadonlyRefs::new(inner.clone());
        let shadow = Reference::new("refs/heads/main", ObjectId::from_bytes([2; 20]));
        readonly.set(&shadow).await.unwrap();
        assert_eq!(readonly.get("refs/heads/main").await.unwrap(), shadow);
        assert_eq!(inner.get("refs/heads/main").await.unwrap(), real);

        readonly.remove("refs/heads/main").await.unwrap();
        assert!(readonly.get("refs/heads/main").await.is_err());
        assert!(readonly.iter().await.unwrap().is_empty());
        assert_eq!(inner.get("refs/heads/main").await.unwrap(), real);
    }
}
