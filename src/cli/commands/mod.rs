//! Subcommand dispatch.

use anyhow::Result;
use clap::Subcommand;

use super::Args;

mod init;
mod team;
mod version;
mod whoami;

/// The available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Set up this machine's key and user tree.
    Init(init::InitArgs),
    /// Manage the default team of the current repository's remote.
    Team {
        /// The team operation.
        #[command(subcommand)]
        command: team::TeamCommand,
    },
    /// Print the configured username and key address.
    Whoami,
    /// Print the version.
    Version,
    /// The git remote helper loop (invoked by git, not by hand).
    #[command(hide = true)]
    RemoteHelper {
        /// The remote's name in git config.
        remote: String,
        /// The remote URL.
        url: String,
    },
}

/// Execute the parsed command.
pub async fn run(args: Args) -> Result<()> {
    match args.command {
        Commands::Init(init) => init::run(init).await,
        Commands::Team { command } => team::run(command).await,
        Commands::Whoami => whoami::run().await,
        Commands::Version => version::run(),
        Commands::RemoteHelper { remote, url } => crate::helper::run(&remote, &url).await,
    }
}
