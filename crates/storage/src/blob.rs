//! Backend B: objects in an external blob network.
//!
//! The repo tree keeps the same `objects/<shard>/<key>` path space as the
//! inline backend, but the stored value is a `did:sia:<link>` URI; the
//! encoded object itself lives behind the link. Uploads and downloads go
//! through the [`BlobNetwork`] seam with bounded retries; transaction commit
//! fans uploads out over a fixed pool of workers and plays the ledger batch
//! only once every upload has succeeded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tokio::sync::{Mutex, RwLock, mpsc};

use chaintree::keys::Keypair;
use chaintree::ledger::Transaction;
use chaintree::tree::Tree;
use chaintree::value::Value;

use crate::iter::{ObjectIter, ShardRead};
use crate::object::{Object, ObjectId};
use crate::store::{Error, ObjectStore, ObjectTxn, TypeHint, object_path, sorted_keys};

/// The URI prefix marking an externalized object.
pub const URI_PREFIX: &str = "did:sia:";

/// How many times a network job is attempted before its error is surfaced.
const ATTEMPTS: u32 = 3;
const BACKOFF: Duration = Duration::from_millis(250);

/// How long to wait for the blob peer when first connecting.
const BOOTSTRAP_WAIT: Duration = Duration::from_secs(15);

/// Default worker counts for the transaction upload pool.
const UPLOADERS: usize = 4;

/// The blob network seam: upload bytes for a link, download a link's bytes.
#[async_trait]
pub trait BlobNetwork: Send + Sync {
    /// Store `data`, returning the content link.
    async fn upload(&self, data: Vec<u8>) -> Result<String, Error>;
    /// Fetch the bytes behind `link`.
    async fn download(&self, link: &str) -> Result<Vec<u8>, Error>;
}

/// An HTTP client for a Skynet-style portal.
pub struct SkynetClient {
    base: String,
    http: reqwest::Client,
}

impl SkynetClient {
    /// Point a client at a portal base URL.
    pub fn new(base: impl Into<String>) -> Self {
        SkynetClient {
            base: base.into().trim_end_matches('/').to_owned(),
            http: reqwest::Client::builder()
                .connect_timeout(BOOTSTRAP_WAIT)
                .build()
                .expect("default client configuration"),
        }
    }
}

fn net_err(e: reqwest::Error) -> Error {
    Error::Network(e.to_string())
}

#[async_trait]
impl BlobNetwork for SkynetClient {
    async fn upload(&self, data: Vec<u8>) -> Result<String, Error> {
        #[derive(Deserialize)]
        struct Uploaded {
            skylink: String,
        }

        let part = reqwest::multipart::Part::bytes(data).file_name("object");
        let form = reqwest::multipart::Form::new().part("file", part);
        let uploaded: Uploaded = self
            .http
            .post(format!("{}/skynet/skyfile", self.base))
            .multipart(form)
            .send()
            .await
            .map_err(net_err)?
            .error_for_status()
            .map_err(net_err)?
            .json()
            .await
            .map_err(net_err)?;
        Ok(uploaded.skylink)
    }

    async fn download(&self, link: &str) -> Result<Vec<u8>, Error> {
        let bytes = self
            .http
            .get(format!("{}/{link}", self.base))
            .send()
            .await
            .map_err(net_err)?
            .error_for_status()
            .map_err(net_err)?
            .bytes()
            .await
            .map_err(net_err)?;
        Ok(bytes.to_vec())
    }
}

/// An in-process blob network for tests and offline use.
#[derive(Default)]
pub struct MemoryBlobNetwork {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobNetwork for MemoryBlobNetwork {
    async fn upload(&self, data: Vec<u8>) -> Result<String, Error> {
        let mut hasher = Sha1::new();
        hasher.update(&data);
        let link = hex::encode(hasher.finalize());
        self.blobs.write().await.insert(link.clone(), data);
        Ok(link)
    }

    async fn download(&self, link: &str) -> Result<Vec<u8>, Error> {
        self.blobs
            .read()
            .await
            .get(link)
            .cloned()
            .ok_or_else(|| Error::Network(format!("no blob for link {link}")))
    }
}

/// The externalized object store.
#[derive(Clone)]
pub struct BlobStore {
    tree: Arc<Mutex<Tree>>,
    key: Keypair,
    net: Arc<dyn BlobNetwork>,
    uploaders: usize,
}

impl BlobStore {
    /// Open the store over a repository tree, signing with `key`.
    pub fn new(tree: Arc<Mutex<Tree>>, key: Keypair, net: Arc<dyn BlobNetwork>) -> Self {
        BlobStore {
            tree,
            key,
            net,
            uploaders: UPLOADERS,
        }
    }

    /// Override the transaction upload pool size.
    pub fn with_uploaders(mut self, workers: usize) -> Self {
        self.uploaders = workers.max(1);
        self
    }

    fn uri_for(link: &str) -> String {
        format!("{URI_PREFIX}{link}")
    }

    async fn resolve_link(&self, id: &ObjectId) -> Result<String, Error> {
        let tree = self.tree.lock().await;
        let path = object_path(id);
        match tree.resolve(&path) {
            (Some(Value::Str(uri)), _) => uri
                .strip_prefix(URI_PREFIX)
                .map(str::to_owned)
                .ok_or_else(|| Error::Corrupt(format!("stored link at {path} lacks {URI_PREFIX}"))),
            (Some(other), _) => Err(Error::Corrupt(format!(
                "expected a link string at {path}, found {}",
                other.kind()
            ))),
            (None, _) => Err(Error::NotFound(*id)),
        }
    }
}

#[async_trait]
impl ObjectStore for BlobStore {
    async fn put(&self, obj: &Object) -> Result<ObjectId, Error> {
        if obj.kind.is_delta() {
            return Err(Error::InvalidType(obj.kind));
        }
        let id = obj.id();
        let link = upload_with_retry(self.net.as_ref(), obj.encode_loose()).await?;
        let mut tree = self.tree.lock().await;
        tree.play(
            &self.key,
            vec![Transaction::set(object_path(&id), Self::uri_for(&link))],
        )
        .await?;
        Ok(id)
    }

    async fn get(&self, hint: TypeHint, id: &ObjectId) -> Result<Object, Error> {
        let link = self.resolve_link(id).await?;
        let bytes = download_with_retry(self.net.as_ref(), &link).await?;
        let obj = Object::decode_loose(&bytes)?;
        if !hint.matches(obj.kind) {
            return Err(Error::NotFound(*id));
        }
        Ok(obj)
    }

    fn iter(&self, hint: TypeHint) -> ObjectIter {
        ObjectIter::new(Arc::new(self.clone()), hint)
    }

    async fn begin(&self) -> Result<Box<dyn ObjectTxn>, Error> {
        Ok(Box::new(BlobTxn {
            store: self.clone(),
            objects: Vec::new(),
            ids: HashMap::new(),
        }))
    }
}

#[async_trait]
impl ShardRead for BlobStore {
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

struct BlobTxn {
    store: BlobStore,
    objects: Vec<Object>,
    ids: HashMap<ObjectId, usize>,
}

#[async_trait]
impl ObjectTxn for BlobTxn {
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

        let links = upload_all(&self.store, &self.objects).await?;
        let txns = self
            .objects
            .iter()
            .zip(links)
            .map(|(obj, link)| {
                Transaction::set(object_path(&obj.id()), BlobStore::uri_for(&link))
            })
            .collect();

        let mut tree = self.store.tree.lock().await;
        tree.play(&self.store.key, txns).await?;
        tracing::debug!(objects = self.objects.len(), "committed externalized batch");
        Ok(())
    }

    fn rollback(self: Box<Self>) {}
}

/// Upload every object over a fixed worker pool, preserving order.
///
/// Jobs are distributed round-robin, one single-producer channel per worker;
/// results come back over one shared channel as `(index, outcome)` pairs. The
/// first failed job fails the whole commit.
async fn upload_all(store: &BlobStore, objects: &[Object]) -> Result<Vec<String>, Error> {
    let workers = store.uploaders.min(objects.len()).max(1);
    let (result_tx, mut result_rx) = mpsc::channel(objects.len());

    let mut job_txs = Vec::with_capacity(workers);
    for _ in 0..workers {
        let (job_tx, mut job_rx) = mpsc::channel::<(usize, Vec<u8>)>(8);
        let net = store.net.clone();
        let results = result_tx.clone();
        tokio::spawn(async move {
            while let Some((index, bytes)) = job_rx.recv().await {
                let outcome = upload_with_retry(net.as_ref(), bytes).await;
                if results.send((index, outcome)).await.is_err() {
                    break;
                }
            }
        });
        job_txs.push(job_tx);
    }
    drop(result_tx);

    for (index, obj) in objects.iter().enumerate() {
        if job_txs[index % workers]
            .send((index, obj.encode_loose()))
            .await
            .is_err()
        {
            return Err(Error::Network("upload worker exited early".to_owned()));
        }
    }
    drop(job_txs);

    let mut links: Vec<Option<String>> = vec![None; objects.len()];
    while let Some((index, outcome)) = result_rx.recv().await {
        links[index] = Some(outcome?);
    }
    links
        .into_iter()
        .map(|link| link.ok_or_else(|| Error::Network("upload worker lost a job".to_owned())))
        .collect()
}

async fn upload_with_retry(net: &dyn BlobNetwork, data: Vec<u8>) -> Result<String, Error> {
    let mut last = None;
    for attempt in 1..=ATTEMPTS {
        match net.upload(data.clone()).await {
            Ok(link) => return Ok(link),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "blob upload failed");
                last = Some(e);
            }
        }
        if attempt < ATTEMPTS {
            tokio::time::sleep(BACKOFF * attempt).await;
        }
    }
    Err(last.expect("at least one attempt"))
}

async fn download_with_retry(net: &dyn BlobNetwork, link: &str) -> Result<Vec<u8>, Error> {
    let mut last = None;
    for attempt in 1..=ATTEMPTS {
        match net.download(link).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "blob download failed");
                last = Some(e);
            }
        }
        if attempt < ATTEMPTS {
            tokio::time::sleep(BACKOFF * attempt).await;
        }
    }
    Err(last.expect("at least one attempt"))
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::chain::test::test_tree;
    use crate::object::ObjectType;
    use crate::pack;

    /// Fails the first `failures` calls, then behaves.
    struct FlakyNetwork {
        inner: MemoryBlobNetwork,
        failures: AtomicU32,
    }

    impl FlakyNetwork {
        fn new(failures: u32) -> Self {
            FlakyNetwork {
                inner: MemoryBlobNetwork::new(),
                failures: AtomicU32::new(failures),
            }
        }

        fn trip(&self) -> Result<(), Error> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n > 0).then(|| n - 1)
            }).is_ok()
            {
                return Err(Error::Network("injected failure".to_owned()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BlobNetwork for FlakyNetwork {
        async fn upload(&self, data: Vec<u8>) -> Result<String, Error> {
            self.trip()?;
            self.inner.upload(data).await
        }

        async fn download(&self, link: &str) -> Result<Vec<u8>, Error> {
            self.trip()?;
            self.inner.download(link).await
        }
    }

    async fn store_with(net: Arc<dyn BlobNetwork>) -> BlobStore {
        let (tree, key) = test_tree().await;
        BlobStore::new(tree, key, net).with_uploaders(2)
    }

    fn blob(text: &str) -> Object {
        Object::new(ObjectType::Blob, text.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn put_get_round_trip_via_links() {
        let store = store_with(Arc::new(MemoryBlobNetwork::new())).await;
        let obj = blob("externalized");
        let id = store.put(&obj).await.unwrap();
        assert_eq!(store.get(TypeHint::Any, &id).await.unwrap(), obj);

        // the ledger holds a prefixed link, not the bytes
        let link = store.resolve_link(&id).await.unwrap();
        assert!(!link.is_empty());
    }

    #[tokio::test]
    async fn malformed_links_are_corrupt() {
        let store = store_with(Arc::new(MemoryBlobNetwork::new())).await;
        let obj = blob("x");
        let id = obj.id();

        {
            let mut tree = store.tree.lock().await;
            tree.play(
                &store.key,
                vec![Transaction::set(object_path(&id), "not-a-did-link")],
            )
            .await
            .unwrap();
        }
        let err = store.get(TypeHint::Any, &id).await.unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let store = store_with(Arc::new(FlakyNetwork::new(2))).await;
        let obj = blob("eventually");
        let id = store.put(&obj).await.unwrap();
        assert_eq!(store.get(TypeHint::Any, &id).await.unwrap(), obj);
    }

    #[tokio::test]
    async fn commit_waits_for_every_upload() {
        let store = store_with(Arc::new(MemoryBlobNetwork::new())).await;
        let objects = vec![blob("a"), blob("b"), blob("c"), blob("d"), blob("e")];

        assert_eq!(
            store.write_pack(&pack::encode(&objects)).await.unwrap(),
            5
        );
        for obj in &objects {
            assert_eq!(store.get(TypeHint::Any, &obj.id()).await.unwrap(), *obj);
        }
    }

    #[tokio::test]
    async fn exhausted_network_fails_the_commit_cleanly() {
        // enough failures that retries cannot save the batch
        let store = store_with(Arc::new(FlakyNetwork::new(1000))).await;
        let objects = vec![blob("a"), blob("b")];

        assert!(store.write_pack(&pack::encode(&objects)).await.is_err());
        for obj in &objects {
            let err = store.get(TypeHint::Any, &obj.id()).await.unwrap_err();
            assert!(matches!(err, Error::NotFound(_)));
        }
    }
}
