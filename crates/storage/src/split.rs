//! Mixing sub-stores from two storers.
//!
//! The helper uses this to serve object writes from one storer while keeping
//! refs, index and config pinned to another (typically a readonly one): a
//! split storer is nothing more than that composition.

use crate::refs::RefStore;
use crate::store::ObjectStore;
use crate::storer::Storer;
use std::sync::Arc;

/// A storer assembled from the object side of one storer and everything
/// else from another.
#[derive(Clone)]
pub struct SplitStorer {
    objects: Arc<dyn ObjectStore>,
    refs: RefStore,
    rest: Storer,
}

impl SplitStorer {
    /// Objects from `object_side`; refs and the in-memory stores from
    /// `rest`.
    pub fn new(object_side: &Storer, rest: &Storer) -> Self {
        SplitStorer {
            objects: object_side.objects(),
            refs: rest.refs().clone(),
            rest: rest.clone(),
        }
    }

    /// The object store.
    pub fn objects(&self) -> Arc<dyn ObjectStore> {
        self.objects.clone()
    }

    /// The reference store.
    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    /// The storer serving everything except objects.
    pub fn rest(&self) -> &Storer {
        &self.rest
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::blob::MemoryBlobNetwork;
    use crate::object::{Object, ObjectType};
    use crate::refs::Reference;
    use crate::store::TypeHint;
    use chaintree::Transaction;
    use chaintree::keys::{USER_NAMESPACE, genesis_key};
    use chaintree::memory::MemoryLedger;
    use chaintree::repo::STORAGE_TYPE_PATH;
    use chaintree::tree::Tree;

    async fn storer(name: &str) -> Storer {
        let ledger: Arc<dyn chaintree::Ledger> = Arc::new(MemoryLedger::new());
        let key = genesis_key(name, USER_NAMESPACE);
        let tree = Tree::create(
            ledger,
            name,
            vec![key.address().to_string()],
            &key,
            vec![Transaction::set(STORAGE_TYPE_PATH, "chaintree")],
        )
        .await
        .unwrap();
        Storer::open(tree, key, Arc::new(MemoryBlobNetwork::new())).unwrap()
    }

    #[tokio::test]
    async fn sides_stay_separate() {
        let object_side = storer("split-objects").await;
        let ref_side = storer("split-refs").await;
        let split = SplitStorer::new(&object_side, &ref_side);

        let obj = Object::new(ObjectType::Blob, b"split".to_vec());
        let id = split.objects().put(&obj).await.unwrap();
        // the object landed on the object side only
        assert!(object_side.objects().contains(&id).await.unwrap());
        assert!(!ref_side.objects().contains(&id).await.unwrap());

        let reference = Reference::new("refs/heads/main", id);
        split.refs().set(&reference).await.unwrap();
        assert!(ref_side.refs().get("refs/heads/main").await.is_ok());
        assert!(object_side.refs().get("refs/heads/main").await.is_err());

        assert_eq!(
            split.objects().get(TypeHint::Any, &id).await.unwrap(),
            obj
        );
    }
}
