//! # Deterministic Identity
//!
//! Every tree on the ledger is named by the keypair that created it, and every
//! keypair here is derived rather than random:
//!
//! - **Tree keys** come from `genesis_key(name, namespace)`: a passphrase KDF
//!   over the lowercased name, salted by the namespace. The same `(name,
//!   namespace)` always yields the same key on any machine, which is what lets
//!   a helper locate `user/repo` knowing only the string. Lowercasing is the
//!   case-insensitivity contract: `did("A/B") == did("a/b")`.
//! - **User keys** come from a 24-word BIP-39 recovery phrase with the
//!   username as the seed passphrase, walked down the derivation path
//!   `m/44'/1392825'/0'/0`. Two machines holding the same phrase and username
//!   produce the same signing key.
//!
//! Addresses are keccak-256 of the uncompressed public key, last twenty bytes,
//! and a tree DID is `did:dgit:<address>`.

use bip39::{Language, Mnemonic, MnemonicType, Seed};
use hmac::{Hmac, Mac};
use libsecp256k1::{Message, PublicKey, RecoveryId, SecretKey, Signature};
use sha2::{Sha256, Sha512};
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

use crate::DID_PREFIX;

/// The namespace under which user trees are keyed.
pub const USER_NAMESPACE: &str = "users";
/// The namespace under which repo trees are keyed.
pub const REPO_NAMESPACE: &str = "repos";
/// The namespace under which team trees are keyed.
pub const TEAM_NAMESPACE: &str = "teams";

const HARDENED: u32 = 0x8000_0000;

/// The BIP-32 path user signing keys are derived along: `m/44'/1392825'/0'/0`.
const DERIVATION_PATH: [u32; 4] = [44 | HARDENED, 1_392_825 | HARDENED, HARDENED, 0];

const KDF_ROUNDS: u32 = 4096;

/// An error encountered deriving or using a keypair.
#[derive(Error, Debug)]
pub enum Error {
    /// The supplied bytes are not a valid secp256k1 secret key.
    #[error("invalid secret key")]
    InvalidSecretKey,
    /// The supplied string is not valid hex.
    #[error("invalid hex encoding of a secret key")]
    InvalidHex(#[from] hex::FromHexError),
    /// The recovery phrase failed BIP-39 validation.
    #[error("invalid recovery phrase")]
    InvalidMnemonic,
    /// A signature failed to verify or parse.
    #[error("invalid signature")]
    InvalidSignature,
}

/// A secp256k1 keypair with its public half cached.
#[derive(Clone)]
pub struct Keypair {
    secret: SecretKey,
    public: PublicKey,
}

/// The keccak-derived twenty-byte address of a public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

/// A recoverable signature over a 32-byte digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sig {
    sig: [u8; 64],
    recovery: u8,
}

impl Keypair {
    /// Construct a keypair from raw secret-key bytes.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, Error> {
        let secret = SecretKey::parse(bytes).map_err(|_| Error::InvalidSecretKey)?;
        let public = PublicKey::from_secret_key(&secret);
        Ok(Keypair { secret, public })
    }

    /// Construct a keypair from a hex-encoded secret key, as stored in the
    /// keyring.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let bytes = hex::decode(s.trim().trim_start_matches("0x"))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| Error::InvalidSecretKey)?;
        Self::from_secret_bytes(&bytes)
    }

    /// The hex encoding of the secret key, for keyring storage.
    pub fn to_hex(&self) -> String {
        hex::encode(self.secret.serialize())
    }

    /// The keccak address of the public key.
    pub fn address(&self) -> Address {
        Address::of(&self.public)
    }

    /// The DID this keypair names: `did:dgit:<address>`.
    pub fn did(&self) -> String {
        format!("{}{}", DID_PREFIX, self.address())
    }

    /// Sign a 32-byte digest, producing a recoverable signature.
    pub fn sign(&self, digest: &[u8; 32]) -> Sig {
        let (sig, recovery) = libsecp256k1::sign(&Message::parse(digest), &self.secret);
        Sig {
            sig: sig.serialize(),
            recovery: recovery.serialize(),
        }
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print the secret half
        f.debug_tuple("Keypair").field(&self.address()).finish()
    }
}

impl Address {
    fn of(public: &PublicKey) -> Self {
        let uncompressed = public.serialize();
        let digest = keccak256(&uncompressed[1..]);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Address(out)
    }

    /// The raw address bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Sig {
    /// Recover the address that produced this signature over `digest`.
    pub fn recover(&self, digest: &[u8; 32]) -> Result<Address, Error> {
        let sig = Signature::parse_standard(&self.sig).map_err(|_| Error::InvalidSignature)?;
        let recovery = RecoveryId::parse(self.recovery).map_err(|_| Error::InvalidSignature)?;
        let public = libsecp256k1::recover(&Message::parse(digest), &sig, &recovery)
            .map_err(|_| Error::InvalidSignature)?;
        Ok(Address::of(&public))
    }
}

/// Keccak-256 of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}

/// Derive the deterministic genesis keypair for a named tree.
///
/// The name is lowercased before derivation; the namespace keeps user, repo
/// and team trees in disjoint key spaces.
pub fn genesis_key(name: &str, namespace: &str) -> Keypair {
    let passphrase = name.to_lowercase();
    for counter in 0u32.. {
        let mut salt = Vec::with_capacity(namespace.len() + 4);
        salt.extend_from_slice(namespace.as_bytes());
        salt.extend_from_slice(&counter.to_be_bytes());
        let candidate = pbkdf2_sha256(passphrase.as_bytes(), &salt, KDF_ROUNDS);
        if let Ok(pair) = Keypair::from_secret_bytes(&candidate) {
            return pair;
        }
        // out-of-range scalar, re-derive with the next counter
    }
    unreachable!("a valid scalar is found after finitely many rounds")
}

/// The DID of the tree named `(name, namespace)`.
pub fn genesis_did(name: &str, namespace: &str) -> String {
    genesis_key(name, namespace).did()
}

/// Generate a fresh 24-word recovery phrase.
pub fn generate_phrase() -> String {
    Mnemonic::new(MnemonicType::Words24, Language::English)
        .phrase()
        .to_owned()
}

/// Recover a user signing key from a recovery phrase and username.
///
/// The username serves as the BIP-39 seed passphrase, so the same phrase
/// yields distinct keys for distinct usernames.
pub fn key_from_phrase(phrase: &str, username: &str) -> Result<Keypair, Error> {
    let mnemonic =
        Mnemonic::from_phrase(phrase, Language::English).map_err(|_| Error::InvalidMnemonic)?;
    let seed = Seed::new(&mnemonic, &username.to_lowercase());
    derive_path(seed.as_bytes(), &DERIVATION_PATH)
}

fn derive_path(seed: &[u8], path: &[u32]) -> Result<Keypair, Error> {
    let i = hmac_sha512(b"Bitcoin seed", seed);
    let mut key = SecretKey::parse(i[..32].try_into().expect("32 bytes"))
        .map_err(|_| Error::InvalidSecretKey)?;
    let mut chain: [u8; 32] = i[32..].try_into().expect("32 bytes");

    for &index in path {
        let mut data = Vec::with_capacity(37);
        if index & HARDENED != 0 {
            data.push(0);
            data.extend_from_slice(&key.serialize());
        } else {
            let public = PublicKey::from_secret_key(&key);
            data.extend_from_slice(&public.serialize_compressed());
        }
        data.extend_from_slice(&index.to_be_bytes());

        let i = hmac_sha512(&chain, &data);
        let tweak = SecretKey::parse(i[..32].try_into().expect("32 bytes"))
            .map_err(|_| Error::InvalidSecretKey)?;
        key.tweak_add_assign(&tweak)
            .map_err(|_| Error::InvalidSecretKey)?;
        chain = i[32..].try_into().expect("32 bytes");
    }

    let bytes = key.serialize();
    Keypair::from_secret_bytes(&bytes)
}

fn hmac_sha512(key: &[u8], data: &[u8]) -> [u8; 64] {
    let mut mac =
        Hmac::<Sha512>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize()
        .into_bytes()
        .as_slice()
        .try_into()
        .expect("sha-512 output is 64 bytes")
}

/// PBKDF2-HMAC-SHA256 with a single 32-byte output block.
fn pbkdf2_sha256(pass: &[u8], salt: &[u8], rounds: u32) -> [u8; 32] {
    let mut block = Vec::with_capacity(salt.len() + 4);
    block.extend_from_slice(salt);
    block.extend_from_slice(&1u32.to_be_bytes());

    let mut u: [u8; 32] = prf(pass, &block);
    let mut out = u;
    for _ in 1..rounds {
        u = prf(pass, &u);
        for (o, b) in out.iter_mut().zip(u.iter()) {
            *o ^= b;
        }
    }
    out
}

fn prf(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize()
        .into_bytes()
        .as_slice()
        .try_into()
        .expect("sha-256 output is 32 bytes")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn genesis_key_is_case_insensitive() {
        let lower = genesis_key("alice/widgets", REPO_NAMESPACE);
        let upper = genesis_key("ALICE/Widgets", REPO_NAMESPACE);
        assert_eq!(lower.did(), upper.did());
    }

    #[test]
    fn genesis_key_is_namespace_separated() {
        let user = genesis_key("alice", USER_NAMESPACE);
        let team = genesis_key("alice", TEAM_NAMESPACE);
        assert_ne!(user.did(), team.did());
    }

    #[test]
    fn genesis_key_is_stable() {
        let a = genesis_key("alice", USER_NAMESPACE);
        let b = genesis_key("alice", USER_NAMESPACE);
        assert_eq!(a.to_hex(), b.to_hex());
    }

    #[test]
    fn did_has_method_and_address() {
        let did = genesis_did("alice", USER_NAMESPACE);
        assert!(did.starts_with("did:dgit:0x"));
        assert_eq!(did.len(), "did:dgit:0x".len() + 40);
    }

    #[test]
    fn phrase_round_trips_to_the_same_key() {
        let phrase = generate_phrase();
        let a = key_from_phrase(&phrase, "alice").unwrap();
        let b = key_from_phrase(&phrase, "alice").unwrap();
        assert_eq!(a.to_hex(), b.to_hex());

        let other = key_from_phrase(&phrase, "bob").unwrap();
        assert_ne!(a.to_hex(), other.to_hex());
    }

    #[test]
    fn phrase_is_validated() {
        assert!(key_from_phrase("not a phrase", "alice").is_err());
    }

    #[test]
    fn signatures_recover_the_signer() {
        let key = genesis_key("alice", USER_NAMESPACE);
        let digest = keccak256(b"payload");
        let sig = key.sign(&digest);
        assert_eq!(sig.recover(&digest).unwrap(), key.address());
    }

    #[test]
    fn hex_round_trip() {
        let key = genesis_key("alice", USER_NAMESPACE);
        let restored = Keypair::from_hex(&key.to_hex()).unwrap();
        assert_eq!(restored.address(), key.address());
    }
}
