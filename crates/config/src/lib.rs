//! Manages dgit configuration from its standard locations.
//!
//! Sources are layered, later over earlier: compiled defaults, the user's
//! `dgit.toml` under the platform config directory, the repository-local
//! `.git/info/dgit.toml`, git config itself (`dgit.username`), and finally
//! `DG_*` environment variables (with deprecated `DGIT_*` fallbacks).

use std::borrow::Cow;

use etcetera::BaseStrategy;
use figment::providers::{Env, Format, Toml};
use figment::{Figment, Metadata, Provider};
use gix::ThreadSafeRepository;
use serde::{Deserialize, Serialize};

/// The compiled default configuration.
const DEFAULT_TOML_CONFIG: &str = include_str!("./dgit.default.toml");

/// The environment prefix configuration is read from.
pub const ENV_PREFIX: &str = "DG_";
/// The deprecated environment prefix still honored for compatibility.
pub const DEPRECATED_ENV_PREFIX: &str = "DGIT_";

/// The git config key naming the user.
const GIT_CONFIG_USERNAME: &str = "dgit.username";

//================================================================================================
// Types
//================================================================================================

/// dgit's resolved configuration.
#[derive(Deserialize, Serialize)]
pub struct Config {
    /// The configured username, if any source names one.
    #[serde(default)]
    pub username: Option<String>,
    /// The object-storage backend to request at repo-create time.
    #[serde(default)]
    pub object_storage: Option<String>,
    /// The portal serving the external blob network.
    #[serde(default = "default_gateway")]
    pub blob_gateway: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            username: None,
            object_storage: None,
            blob_gateway: default_gateway(),
        }
    }
}

//================================================================================================
// Impls
//================================================================================================

impl Config {
    /// The layered configuration provider, without any repository context.
    pub fn figment() -> Figment {
        let mut fig = Figment::from(Config::default()).merge(Toml::string(DEFAULT_TOML_CONFIG));

        if let Ok(strategy) = etcetera::choose_base_strategy() {
            fig = fig.admerge(Toml::file(strategy.config_dir().join("dgit.toml")));
        }
        if let Ok(repo) = ThreadSafeRepository::discover(".") {
            fig = fig.admerge(Toml::file(repo.git_dir().join("info/dgit.toml")));
        }

        fig.admerge(Env::prefixed(DEPRECATED_ENV_PREFIX))
            .admerge(Env::prefixed(ENV_PREFIX))
    }

    /// Load the configuration, falling back to defaults on error.
    pub fn load() -> Config {
        Config::figment().extract().unwrap_or_else(|e| {
            tracing::error!(error = %e, "problem loading config, falling back to defaults");
            Config::default()
        })
    }

    /// Resolve the effective username.
    ///
    /// Priority: `DG_USERNAME` (then deprecated `DGIT_USERNAME`), git config
    /// `dgit.username` from `repo` when given (local over global), then the
    /// config files.
    pub fn username_for(&self, repo: Option<&gix::Repository>) -> Option<String> {
        if let Some(username) = env_or_deprecated("USERNAME") {
            return Some(username);
        }
        if let Some(repo) = repo {
            if let Some(username) = repo
                .config_snapshot()
                .string(GIT_CONFIG_USERNAME)
                .map(|v: Cow<'_, gix::bstr::BStr>| v.to_string())
                .filter(|v| !v.is_empty())
            {
                return Some(username);
            }
        }
        self.username.clone().filter(|v| !v.is_empty())
    }

    /// The object-storage backend override for repo creation, if any.
    pub fn object_storage(&self) -> Option<String> {
        env_or_deprecated("OBJ_STORAGE").or_else(|| self.object_storage.clone())
    }
}

impl Provider for Config {
    fn metadata(&self) -> Metadata {
        Metadata::named("dgit config")
    }

    fn data(
        &self,
    ) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        figment::providers::Serialized::defaults(self).data()
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Read `DG_<name>`, falling back to the deprecated `DGIT_<name>` with a
/// warning.
pub fn env_or_deprecated(name: &str) -> Option<String> {
    if let Ok(value) = std::env::var(format!("{ENV_PREFIX}{name}")) {
        if !value.is_empty() {
            return Some(value);
        }
    }
    match std::env::var(format!("{DEPRECATED_ENV_PREFIX}{name}")) {
        Ok(value) if !value.is_empty() => {
            tracing::warn!(
                "{DEPRECATED_ENV_PREFIX}{name} is deprecated; use {ENV_PREFIX}{name} instead"
            );
            Some(value)
        }
        _ => None,
    }
}

fn default_gateway() -> String {
    "https://siasky.net".to_owned()
}

/// The directory the file-backed keyring stores keys under.
pub fn keyring_dir() -> std::path::PathBuf {
    if let Ok(strategy) = etcetera::choose_base_strategy() {
        strategy.data_dir().join("dgit/keys")
    } else {
        std::env::temp_dir().join("dgit/keys")
    }
}
