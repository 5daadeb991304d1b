//! Session state shared by both directions.

use std::sync::Arc;

use thiserror::Error;

use chaintree::Ledger;
use chaintree::repo::{self, RepoTree};
use storage::blob::BlobNetwork;
use storage::object::ObjectId;
use storage::refs::Reference;
use storage::storer::Storer;

use crate::auth::PrivateKeyAuth;
use crate::caps::CapabilitySet;
use crate::endpoint::Endpoint;

/// An error from a transport session.
#[derive(Error, Debug)]
pub enum Error {
    /// The endpoint names a repository that does not exist.
    #[error("repository `{0}` not found")]
    RepositoryNotFound(String),
    /// A fetch was attempted against a repository with no references.
    #[error("remote repository is empty")]
    EmptyRemoteRepository,
    /// An upload-pack request without wants.
    #[error("empty upload-pack request")]
    EmptyUploadPackRequest,
    /// The client requested a capability outside the supported set.
    #[error("unsupported capability `{0}`")]
    UnsupportedCapability(String),
    /// Shallow fetches are not served.
    #[error("shallow clients are not supported")]
    ShallowUnsupported,
    /// A push failed and the client did not negotiate report-status.
    #[error("push rejected: {0}")]
    PushRejected(String),
    /// A commit or tree in the store failed to parse during traversal.
    #[error("corrupt object graph at {id}: {message}")]
    CorruptGraph {
        /// The unparsable object.
        id: ObjectId,
        /// The parse failure.
        message: String,
    },
    /// The pack pipe failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The object or ref store failed.
    #[error(transparent)]
    Store(#[from] storage::store::Error),
    /// The reference store failed.
    #[error(transparent)]
    Refs(#[from] storage::refs::Error),
    /// The repository tree failed.
    #[error(transparent)]
    Repo(#[from] repo::Error),
}

/// Which direction a session serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// Serving a fetch (we are the server of `git fetch`).
    UploadPack,
    /// Serving a push (we are the server of `git push`).
    ReceivePack,
}

/// The advertisement: every ref, plus the capability tokens.
#[derive(Debug, Clone)]
pub struct AdvertisedRefs {
    /// All references, sorted by name.
    pub refs: Vec<Reference>,
    /// The capability tokens the session supports.
    pub capabilities: Vec<String>,
}

impl AdvertisedRefs {
    /// The ref HEAD points at: `refs/heads/master` when present, otherwise
    /// the lexicographically last ref. `None` for an empty repository.
    pub fn head(&self) -> Option<&Reference> {
        self.refs
            .iter()
            .find(|r| r.name == "refs/heads/master")
            .or_else(|| self.refs.last())
    }
}

/// One live conversation between git and a repository tree.
pub struct Session {
    endpoint: Endpoint,
    service: Service,
    auth: PrivateKeyAuth,
    caps: CapabilitySet,
    ledger: Arc<dyn Ledger>,
    net: Arc<dyn BlobNetwork>,
    storer: Option<Storer>,
}

impl Session {
    pub(crate) fn new(
        endpoint: Endpoint,
        service: Service,
        auth: PrivateKeyAuth,
        ledger: Arc<dyn Ledger>,
        net: Arc<dyn BlobNetwork>,
    ) -> Self {
        let caps = match service {
            Service::UploadPack => CapabilitySet::for_fetch(),
            Service::ReceivePack => CapabilitySet::for_push(),
        };
        Session {
            endpoint,
            service,
            auth,
            caps,
            ledger,
            net,
            storer: None,
        }
    }

    /// The endpoint this session serves.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The session's direction.
    pub fn service(&self) -> Service {
        self.service
    }

    /// The credential signing this session's ledger batches.
    pub fn auth(&self) -> &PrivateKeyAuth {
        &self.auth
    }

    /// The supported capability set.
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.caps
    }

    /// Resolve the repository snapshot, loading it on first use.
    ///
    /// An absent tree maps to [`Error::RepositoryNotFound`].
    pub async fn storer(&mut self) -> Result<&Storer, Error> {
        if self.storer.is_none() {
            let repo = match RepoTree::find(
                self.ledger.clone(),
                &self.endpoint.username,
                &self.endpoint.repo,
            )
            .await
            {
                Ok(repo) => repo,
                Err(repo::Error::NotFound(name)) => {
                    return Err(Error::RepositoryNotFound(name));
                }
                Err(e) => return Err(e.into()),
            };
            let storer = Storer::open(
                repo.into_tree(),
                self.auth.key().clone(),
                self.net.clone(),
            )?;
            self.storer = Some(storer);
        }
        Ok(self.storer.as_ref().expect("loaded above"))
    }

    /// Advertise the repository's references.
    ///
    /// A fetch session against a repository with no refs at all reports
    /// [`Error::EmptyRemoteRepository`].
    pub async fn advertised_refs(&mut self) -> Result<AdvertisedRefs, Error> {
        let service = self.service;
        let capabilities = self.caps.advertise();
        let storer = self.storer().await?;
        let refs = storer.refs().iter().await?;
        tracing::debug!(refs = refs.len(), ?service, "advertising references");

        if refs.is_empty() && service == Service::UploadPack {
            return Err(Error::EmptyRemoteRepository);
        }
        Ok(AdvertisedRefs { refs, capabilities })
    }

    /// Serve a fetch. See [`crate::upload`].
    pub async fn upload_pack(
        &mut self,
        req: crate::upload::UploadPackRequest,
    ) -> Result<crate::upload::UploadPackResponse, Error> {
        crate::upload::upload_pack(self, req).await
    }

    /// Serve a push. See [`crate::receive`].
    pub async fn receive_pack(
        &mut self,
        req: crate::receive::ReceivePackRequest,
    ) -> Result<crate::receive::ReportStatus, Error> {
        crate::receive::receive_pack(self, req).await
    }
}
