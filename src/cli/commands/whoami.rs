//! `dgit whoami`.

use anyhow::{Context, Result};
use config::Config;

use crate::keyring;

pub async fn run() -> Result<()> {
    let config = Config::load();
    let local = crate::repo::open_local().ok();
    let username = config
        .username_for(local.as_ref())
        .context("no username configured")?;

    let ring = keyring::default_keyring()?;
    match keyring::resolve_key(ring.as_ref(), &username)? {
        Some(key) => println!("{username} ({})", key.address()),
        None => println!("{username} (no key on this machine; run `dgit init`)"),
    }
    Ok(())
}
