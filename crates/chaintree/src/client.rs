//! Ledger client construction.
//!
//! A process builds its ledger handle once, up front, and waits for the
//! substrate to see its first round before serving any git traffic. The
//! networked substrate is an external collaborator; what ships here is the
//! in-memory implementation and the bootstrap seam a networked client would
//! slot into.

use std::sync::Arc;
use std::time::Duration;

use crate::ledger::{Error, Ledger};
use crate::memory::MemoryLedger;

/// How long to wait for the ledger's first round before giving up.
const FIRST_ROUND_WAIT: Duration = Duration::from_secs(10);

/// Builds a ready [`Ledger`] handle.
pub struct Builder {
    ledger: Option<Arc<dyn Ledger>>,
    ready_timeout: Duration,
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            ledger: None,
            ready_timeout: FIRST_ROUND_WAIT,
        }
    }
}

impl Builder {
    /// Start a builder with the default first-round timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific ledger implementation instead of the in-memory default.
    pub fn with_ledger(mut self, ledger: Arc<dyn Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Override the first-round wait.
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Construct the handle, waiting until the ledger can serve reads.
    ///
    /// Fatal on expiry of the first-round wait.
    pub async fn build(self) -> Result<Arc<dyn Ledger>, Error> {
        let ledger = self
            .ledger
            .unwrap_or_else(|| Arc::new(MemoryLedger::new()));
        tokio::time::timeout(self.ready_timeout, ledger.wait_until_ready())
            .await
            .map_err(|_| Error::Timeout)??;
        tracing::debug!("ledger client ready");
        Ok(ledger)
    }
}
