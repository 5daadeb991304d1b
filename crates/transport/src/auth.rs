//! The auth credential sessions carry.

use chaintree::keys::Keypair;

/// A private-key credential.
///
/// Presented to the transport as an opaque method whose string form is the
/// keccak address of the public key; the key itself signs every ledger batch
/// the session plays.
#[derive(Clone)]
pub struct PrivateKeyAuth {
    key: Keypair,
}

impl PrivateKeyAuth {
    /// Wrap a signing key.
    pub fn new(key: Keypair) -> Self {
        PrivateKeyAuth { key }
    }

    /// The auth method name.
    pub fn name(&self) -> &'static str {
        "private-key-auth"
    }

    /// The signing key.
    pub fn key(&self) -> &Keypair {
        &self.key
    }
}

impl std::fmt::Display for PrivateKeyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key.address())
    }
}

impl std::fmt::Debug for PrivateKeyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PrivateKeyAuth")
            .field(&self.key.address())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chaintree::keys::{USER_NAMESPACE, genesis_key};

    #[test]
    fn displays_as_the_address() {
        let auth = PrivateKeyAuth::new(genesis_key("alice", USER_NAMESPACE));
        assert_eq!(auth.name(), "private-key-auth");
        assert_eq!(auth.to_string(), auth.key().address().to_string());
    }
}
