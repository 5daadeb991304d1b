//! The transport client and scheme registry.

use std::collections::HashMap;
use std::sync::Arc;

use chaintree::Ledger;
use storage::blob::BlobNetwork;

use crate::SCHEME;
use crate::auth::PrivateKeyAuth;
use crate::endpoint::Endpoint;
use crate::session::{Service, Session};

/// A process-wide transport client: the ledger and blob-network handles
/// sessions borrow.
pub struct Client {
    ledger: Arc<dyn Ledger>,
    net: Arc<dyn BlobNetwork>,
}

impl Client {
    /// Bundle the shared handles.
    pub fn new(ledger: Arc<dyn Ledger>, net: Arc<dyn BlobNetwork>) -> Self {
        Client { ledger, net }
    }

    /// The ledger handle.
    pub fn ledger(&self) -> Arc<dyn Ledger> {
        self.ledger.clone()
    }

    /// The blob-network handle.
    pub fn blob_network(&self) -> Arc<dyn BlobNetwork> {
        self.net.clone()
    }

    /// Open a session against `endpoint`.
    pub fn session(&self, endpoint: Endpoint, service: Service, auth: PrivateKeyAuth) -> Session {
        Session::new(
            endpoint,
            service,
            auth,
            self.ledger.clone(),
            self.net.clone(),
        )
    }
}

/// An explicit scheme → client registry.
///
/// There is no process-global slot: whoever owns the registry passes it to
/// whatever needs to resolve a scheme, and its lifetime is the process's.
#[derive(Default)]
pub struct Registry {
    clients: HashMap<String, Arc<Client>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `client` installed for the default scheme.
    pub fn with_default(client: Arc<Client>) -> Self {
        let mut registry = Self::new();
        registry.register(SCHEME, client);
        registry
    }

    /// Install a client for `scheme`.
    pub fn register(&mut self, scheme: impl Into<String>, client: Arc<Client>) {
        self.clients.insert(scheme.into(), client);
    }

    /// Resolve the client for `scheme`.
    pub fn get(&self, scheme: &str) -> Option<Arc<Client>> {
        self.clients.get(scheme).cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chaintree::memory::MemoryLedger;
    use storage::blob::MemoryBlobNetwork;

    #[test]
    fn registry_resolves_by_scheme() {
        let client = Arc::new(Client::new(
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryBlobNetwork::new()),
        ));
        let registry = Registry::with_default(client);
        assert!(registry.get(SCHEME).is_some());
        assert!(registry.get("https").is_none());
    }
}
