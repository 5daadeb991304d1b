//! Builds the transport client the commands and the helper share.

use std::sync::Arc;

use anyhow::Result;
use config::Config;
use storage::blob::{BlobNetwork, SkynetClient};
use transport::{Client, Registry};

/// Construct the process's transport client: a ready ledger handle plus the
/// configured blob-network portal.
pub async fn client(config: &Config) -> Result<Arc<Client>> {
    let ledger = chaintree::client::Builder::new().build().await?;
    let net: Arc<dyn BlobNetwork> = Arc::new(SkynetClient::new(&config.blob_gateway));
    Ok(Arc::new(Client::new(ledger, net)))
}

/// The scheme registry with the default client installed.
pub async fn registry(config: &Config) -> Result<Registry> {
    Ok(Registry::with_default(client(config).await?))
}
