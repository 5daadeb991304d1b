//! Local repository access for the helper and the CLI.

use anyhow::{Context, Result};
use gix::remote::Direction;

use transport::SCHEME;

const SCHEME_URL_PREFIX: &str = "dgit://";

/// Open the repository git invoked us in: `GIT_DIR` when set, discovery
/// otherwise.
pub fn open_local() -> Result<gix::Repository> {
    if let Ok(git_dir) = std::env::var("GIT_DIR") {
        return gix::open(&git_dir).with_context(|| format!("opening GIT_DIR `{git_dir}`"));
    }
    let repo = gix::discover(".").context("discovering the current repository")?;
    Ok(repo)
}

/// Find the repository's `dgit://` remote URL.
///
/// Remotes are considered in priority order: a remote named after the scheme
/// first, then `origin`, then the rest alphabetically; the first one whose
/// URL carries the scheme wins.
pub fn find_remote_url(repo: &gix::Repository) -> Option<String> {
    let mut names: Vec<String> = repo
        .remote_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();
    names.sort_by_key(|name| (name != SCHEME, name != "origin", name.clone()));

    for name in names {
        let Ok(remote) = repo.find_remote(name.as_str()) else {
            continue;
        };
        for direction in [Direction::Push, Direction::Fetch] {
            if let Some(url) = remote.url(direction) {
                let url = url.to_bstring().to_string();
                if url.starts_with(SCHEME_URL_PREFIX) {
                    return Some(url);
                }
            }
        }
    }
    None
}
