//! Private-key storage.
//!
//! A [`Keyring`] stores hex-encoded secret keys under the username. The OS
//! secure-store binding is an external collaborator; shipped here are the
//! volatile in-memory ring the tests use and a file-backed ring under the
//! user's data directory. `DGIT_PRIVATE_KEY` bypasses the ring entirely for
//! CI use.
//!
//! Early versions stored a single key under the name `default`; reads
//! migrate that entry to the requested username on first touch.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;

use chaintree::keys::{self, Keypair};

/// The key name used before keys were stored per-username.
pub const LEGACY_KEY: &str = "default";

/// The environment variable that bypasses the keyring.
pub const PRIVATE_KEY_ENV: &str = "DGIT_PRIVATE_KEY";

/// An error from keyring storage.
#[derive(Error, Debug)]
pub enum Error {
    /// The backing store failed.
    #[error("keyring i/o: {0}")]
    Io(#[from] std::io::Error),
    /// A stored or supplied key failed to parse.
    #[error(transparent)]
    Key(#[from] keys::Error),
}

/// Named secret storage.
pub trait Keyring: Send + Sync {
    /// The backend's name, for messages.
    fn name(&self) -> &'static str;
    /// Read the secret stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, Error>;
    /// Store `value` under `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), Error>;
    /// Delete the entry under `key`.
    fn delete(&self, key: &str) -> Result<(), Error>;
}

/// A volatile in-memory keyring.
#[derive(Default)]
pub struct MemoryKeyring {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyring {
    /// An empty ring.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Keyring for MemoryKeyring {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.entries.lock().expect("keyring lock").get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.entries
            .lock()
            .expect("keyring lock")
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), Error> {
        self.entries.lock().expect("keyring lock").remove(key);
        Ok(())
    }
}

/// A keyring storing one file per key under a directory.
pub struct FileKeyring {
    dir: PathBuf,
}

impl FileKeyring {
    /// A ring rooted at `dir`.
    pub fn new(dir: PathBuf) -> Self {
        FileKeyring { dir }
    }

    fn path(&self, key: &str) -> PathBuf {
        // usernames are validated lowercase words, but never trust a path
        self.dir.join(key.replace(['/', '\\'], "_"))
    }
}

impl Keyring for FileKeyring {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        match std::fs::read_to_string(self.path(key)) {
            Ok(value) => Ok(Some(value.trim().to_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(key);
        std::fs::write(&path, value)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), Error> {
        match std::fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// The keyring this platform uses by default.
pub fn default_keyring() -> Result<Box<dyn Keyring>, Error> {
    Ok(Box::new(FileKeyring::new(config::keyring_dir())))
}

/// Read the key stored for `username`, migrating a legacy `default` entry.
pub fn find_private_key(ring: &dyn Keyring, username: &str) -> Result<Option<Keypair>, Error> {
    if let Some(hex) = ring.get(username)? {
        return Ok(Some(Keypair::from_hex(&hex)?));
    }
    if let Some(hex) = ring.get(LEGACY_KEY)? {
        tracing::info!(username, ring = ring.name(), "migrating legacy keyring entry");
        ring.set(username, &hex)?;
        ring.delete(LEGACY_KEY)?;
        return Ok(Some(Keypair::from_hex(&hex)?));
    }
    Ok(None)
}

/// Resolve the signing key for `username`: `DGIT_PRIVATE_KEY` when set,
/// otherwise the keyring.
pub fn resolve_key(ring: &dyn Keyring, username: &str) -> Result<Option<Keypair>, Error> {
    if let Ok(hex) = std::env::var(PRIVATE_KEY_ENV) {
        if !hex.is_empty() {
            return Ok(Some(Keypair::from_hex(&hex)?));
        }
    }
    find_private_key(ring, username)
}

#[cfg(test)]
mod test {
    use super::*;
    use chaintree::keys::{USER_NAMESPACE, genesis_key};

    #[test]
    fn legacy_entries_migrate_on_read() {
        let ring = MemoryKeyring::new();
        let key = genesis_key("alice", USER_NAMESPACE);
        ring.set(LEGACY_KEY, &key.to_hex()).unwrap();

        let found = find_private_key(&ring, "alice").unwrap().unwrap();
        assert_eq!(found.address(), key.address());

        // migrated: now stored under the username, legacy gone
        assert!(ring.get(LEGACY_KEY).unwrap().is_none());
        assert_eq!(ring.get("alice").unwrap().unwrap(), key.to_hex());
    }

    #[test]
    fn file_ring_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let ring = FileKeyring::new(dir.path().to_path_buf());
        let key = genesis_key("bob", USER_NAMESPACE);

        assert!(find_private_key(&ring, "bob").unwrap().is_none());
        ring.set("bob", &key.to_hex()).unwrap();
        let found = find_private_key(&ring, "bob").unwrap().unwrap();
        assert_eq!(found.address(), key.address());

        ring.delete("bob").unwrap();
        assert!(ring.get("bob").unwrap().is_none());
    }
}
