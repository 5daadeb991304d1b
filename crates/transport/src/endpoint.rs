//! Remote URL parsing: `dgit://<username>/<repopath>`.

use thiserror::Error;

use crate::SCHEME;

/// An error parsing a remote URL.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The string is not a URL at all.
    #[error("invalid remote url `{0}`")]
    Invalid(String),
    /// The URL carries a scheme this transport does not serve.
    #[error("unsupported scheme `{0}`")]
    BadScheme(String),
    /// The URL names no user.
    #[error("remote url `{0}` is missing a username")]
    MissingUser(String),
    /// The URL names no repository.
    #[error("remote url `{0}` is missing a repository path")]
    MissingRepo(String),
}

/// The parsed identity of a remote repository.
///
/// Both components are lowercased on parse; the naming layer is
/// case-insensitive throughout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// The owning username.
    pub username: String,
    /// The repository path under the user.
    pub repo: String,
}

impl Endpoint {
    /// Parse a `dgit://user/repo` URL.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let url = url::Url::parse(raw).map_err(|_| Error::Invalid(raw.to_owned()))?;
        if url.scheme() != SCHEME {
            return Err(Error::BadScheme(url.scheme().to_owned()));
        }
        let username = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::MissingUser(raw.to_owned()))?
            .to_lowercase();
        let repo = url.path().trim_matches('/').to_lowercase();
        if repo.is_empty() {
            return Err(Error::MissingRepo(raw.to_owned()));
        }
        Ok(Endpoint { username, repo })
    }

    /// The canonical `<user>/<repo>` name.
    pub fn repo_name(&self) -> String {
        format!("{}/{}", self.username, self.repo)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{SCHEME}://{}/{}", self.username, self.repo)
    }
}
