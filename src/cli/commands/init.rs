//! `dgit init`: key setup and user-tree creation.

use anyhow::{Context, Result};
use clap::Parser;

use chaintree::keys;
use chaintree::user::{self, UserTree};
use config::Config;

use crate::keyring;

/// Arguments for `dgit init`.
#[derive(Parser)]
pub struct InitArgs {
    /// Recover an existing identity from a 24-word phrase instead of
    /// generating a fresh one.
    #[arg(long, value_name = "PHRASE")]
    recover: Option<String>,
}

pub async fn run(args: InitArgs) -> Result<()> {
    let config = Config::load();
    let local = crate::repo::open_local().ok();
    let username = config
        .username_for(local.as_ref())
        .context("no username configured; set `git config --global dgit.username <name>`")?;

    let ring = keyring::default_keyring()?;
    let key = match keyring::resolve_key(ring.as_ref(), &username)? {
        Some(key) => {
            tracing::info!(username, "existing key found, reusing it");
            key
        }
        None => {
            let (key, phrase) = match args.recover {
                Some(phrase) => (keys::key_from_phrase(&phrase, &username)?, None),
                None => {
                    let phrase = keys::generate_phrase();
                    (keys::key_from_phrase(&phrase, &username)?, Some(phrase))
                }
            };
            ring.set(&username, &key.to_hex())?;
            if let Some(phrase) = phrase {
                eprintln!("Your recovery phrase (store it somewhere safe):\n\n  {phrase}\n");
            }
            key
        }
    };

    let ledger = chaintree::client::Builder::new().build().await?;
    match UserTree::find(ledger.clone(), &username).await {
        Ok(user) => {
            if !user.is_owner(&key.address().to_string()) {
                anyhow::bail!(
                    "user `{username}` exists but this key is not one of its owners; \
                     recover with the original phrase"
                );
            }
        }
        Err(user::Error::NotFound(_)) => {
            UserTree::create(ledger, &username, vec![key.address().to_string()]).await?;
            tracing::info!(username, "created user tree");
        }
        Err(e) => return Err(e.into()),
    }

    eprintln!("initialized as {username} ({})", key.address());
    Ok(())
}
