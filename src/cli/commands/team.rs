//! `dgit team`: default-team membership of the current repo's remote.

use anyhow::{Context, Result};
use clap::Subcommand;

use chaintree::repo::RepoTree;
use chaintree::team::Members;
use chaintree::user::UserTree;
use config::Config;
use transport::Endpoint;

use crate::keyring;

/// Team membership operations.
#[derive(Subcommand)]
pub enum TeamCommand {
    /// Grant users write access by adding them to the default team.
    Add {
        /// Usernames to add.
        #[arg(required = true)]
        usernames: Vec<String>,
    },
    /// List the default team's members.
    List,
    /// Remove users from the default team.
    Remove {
        /// Usernames to remove.
        #[arg(required = true)]
        usernames: Vec<String>,
    },
}

pub async fn run(command: TeamCommand) -> Result<()> {
    let config = Config::load();
    let local = crate::repo::open_local().context("not inside a git repository")?;
    let url = crate::repo::find_remote_url(&local)
        .context("no dgit:// remote configured on this repository")?;
    let endpoint = Endpoint::parse(&url)?;

    let username = config
        .username_for(Some(&local))
        .context("no username configured")?;
    let ring = keyring::default_keyring()?;
    let key = keyring::resolve_key(ring.as_ref(), &username)?
        .context("no key found; run `dgit init` first")?;

    let ledger = chaintree::client::Builder::new().build().await?;
    let repo = RepoTree::find(ledger.clone(), &endpoint.username, &endpoint.repo).await?;
    let mut team = repo.team("default").await?;

    match command {
        TeamCommand::Add { usernames } => {
            let mut additions = Members::new();
            for username in &usernames {
                let user = UserTree::find(ledger.clone(), username).await?;
                additions.insert(user.username().to_owned(), user.did().to_owned());
            }
            team.add_members(&key, additions).await?;
            eprintln!("added {} member(s)", usernames.len());
        }
        TeamCommand::List => {
            for (username, did) in team.members() {
                println!("{username}\t{did}");
            }
        }
        TeamCommand::Remove { usernames } => {
            team.remove_members(&key, &usernames).await?;
            eprintln!("removed {} member(s)", usernames.len());
        }
    }
    Ok(())
}
