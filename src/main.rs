//! The main entry point for the dgit CLI and the git remote helper.
//!
//! The same binary ships under two names: `dgit` (the CLI) and
//! `git-remote-dgit` (the helper git invokes for `dgit://` remotes). Which
//! personality runs is decided by `argv[0]`.

#![warn(missing_docs)]

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use dgit::cli::{self, Args};

const HELPER_PREFIX: &str = "git-remote-";

//================================================================================================
// Functions
//================================================================================================

fn main() -> ExitCode {
    let arg0 = std::env::args_os().next().unwrap_or(OsString::from("dgit"));
    let is_helper = PathBuf::from(&arg0)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.starts_with(HELPER_PREFIX));
    if is_helper { helper() } else { dgit() }
}

/// The CLI personality.
#[tokio::main]
async fn dgit() -> ExitCode {
    let args = Args::parse_from(cli::change_directory());
    let Args { log, .. } = args;

    let _guard = cli::init_global_subscriber(log);

    if let Err(e) = cli::run(args).await {
        dgit::fatal!(e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// The remote-helper personality: `git-remote-dgit <remote> <url>`.
#[tokio::main]
async fn helper() -> ExitCode {
    let _guard = cli::init_global_subscriber(cli::LogArgs::default());

    let mut args = std::env::args().skip(1);
    let (remote, url) = match (args.next(), args.next()) {
        (Some(remote), Some(url)) => (remote, url),
        _ => {
            eprintln!("usage: git-remote-dgit <remote> <url>");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = dgit::helper::run(&remote, &url).await {
        dgit::fatal!(e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
