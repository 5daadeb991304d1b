//! The git remote helper.
//!
//! git invokes `git-remote-dgit <remote> <url>` with stdin/stdout bound to
//! its control channel; [`run`] wires the configured identity and the
//! transport client into a [`Runner`] that speaks the line protocol.

use anyhow::{Context, Result};
use config::Config;
use transport::{Endpoint, PrivateKeyAuth, SCHEME};

mod runner;

pub use runner::Runner;

/// The helper's scratch directory inside the repository.
pub fn workspace_dir(git_dir: &std::path::Path) -> std::path::PathBuf {
    git_dir.join(SCHEME)
}

/// Run the helper loop over the process's stdio.
pub async fn run(remote: &str, url: &str) -> Result<()> {
    let config = Config::load();
    let local = crate::repo::open_local()?;
    let username = config
        .username_for(Some(&local))
        .context("no username configured; set `git config --global dgit.username <name>`")?;
    let ring = crate::keyring::default_keyring()?;
    let key = crate::keyring::resolve_key(ring.as_ref(), &username)?
        .with_context(|| format!("no key found for `{username}`; run `dgit init` first"))?;

    let endpoint = Endpoint::parse(url)?;
    std::fs::create_dir_all(workspace_dir(local.git_dir()))?;
    tracing::debug!(remote, url = %endpoint, user = %username, "helper starting");

    let storage = match config.object_storage() {
        Some(name) => name.parse()?,
        None => Default::default(),
    };
    let registry = crate::cli::store::registry(&config).await?;
    let client = registry
        .get(SCHEME)
        .context("no transport client registered for the scheme")?;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut runner = Runner::new(
        client,
        endpoint,
        PrivateKeyAuth::new(key),
        local,
        username,
        storage,
        stdout.lock(),
    );
    runner.run(stdin.lock()).await
}
