use crate::error::Error;
use crate::msgs::enums::NamedGroup;

use ring::agreement;

/// The result of a key exchange.  This has our public key,
/// and the agreed shared secret (also known as the "premaster secret"
/// in TLS1.0-era protocols, and "Z" in TLS1.3).
pub struct KeyExchangeResult {
    pub pubkey: ring::agreement::PublicKey,
    pub shared_secret: Vec<u8>,
}

/// An in-progress key exchange.  This has the algorithm,
/// our private key, and our public key.
pub struct KeyExchange {
    skxg: &'static SupportedKxGroup,
    privkey: agreement::EphemeralPrivateKey,
    pub pubkey: agreement::PublicKey,
}

impl KeyExchange {
    /// Choose a SupportedKxGroup by name, from a list of supported groups.
    pub fn choose(
        name: NamedGroup,
        supported: &[&'static SupportedKxGroup],
    ) -> Option<&'static SupportedKxGroup> {
        supported
            .iter()
            .find(|skxg| skxg.name == name)
            .cloned()
    }

    /// Start a key exchange, using the given SupportedKxGroup.
    ///
    /// This generates an ephemeral key pair and stores it in the returned KeyExchange object.
    pub fn start(skxg: &'static SupportedKxGroup) -> Result<Self, Error> {
        let rng = ring::rand::SystemRandom::new();
        let ours = agreement::EphemeralPrivateKey::generate(skxg.agreement_algorithm, &rng)
            .map_err(|_| Error::FailedToGetRandomBytes)?;

        let pubkey = ours
            .compute_public_key()
            .map_err(|_| Error::General("cannot compute public key".to_string()))?;

        Ok(Self {
            skxg,
            privkey: ours,
            pubkey,
        })
    }

    /// Return the group being used.
    pub fn group(&self) -> NamedGroup {
        self.skxg.name
    }

    /// Completes the key exchange, given the peer's public key.
    pub fn complete(self, peer: &[u8]) -> Result<KeyExchangeResult, Error> {
        let peer_key = agreement::UnparsedPublicKey::new(self.skxg.agreement_algorithm, peer);
        let pubkey = self.pubkey;
        agreement::agree_ephemeral(self.privkey, &peer_key, (), |secret| {
            Ok(KeyExchangeResult {
                pubkey,
                shared_secret: secret.to_vec(),
            })
        })
        .map_err(|()| Error::PeerMisbehavedError("key agreement failed".to_string()))
    }
}

/// A key-exchange group supported by the engine.
///
/// All possible instances of this class are provided by the library in
/// the `ALL_KX_GROUPS` array.
pub struct SupportedKxGroup {
    /// The IANA "TLS Supported Groups" name of the group
    pub name: NamedGroup,

    /// The corresponding ring agreement::Algorithm
    agreement_algorithm: &'static ring::agreement::Algorithm,
}

impl std::fmt::Debug for SupportedKxGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name.fmt(f)
    }
}

/// Ephemeral ECDH on curve25519
pub static X25519: SupportedKxGroup = SupportedKxGroup {
    name: NamedGroup::X25519,
    agreement_algorithm: &agreement::X25519,
};

/// Ephemeral ECDH on secp256r1 (aka NIST-P256)
pub static SECP256R1: SupportedKxGroup = SupportedKxGroup {
    name: NamedGroup::secp256r1,
    agreement_algorithm: &agreement::ECDH_P256,
};

/// Ephemeral ECDH on secp384r1 (aka NIST-P384)
pub static SECP384R1: SupportedKxGroup = SupportedKxGroup {
    name: NamedGroup::secp384r1,
    agreement_algorithm: &agreement::ECDH_P384,
};

/// A list of all the key exchange groups we support.
pub static ALL_KX_GROUPS: [&SupportedKxGroup; 3] = [&X25519, &SECP256R1, &SECP384R1];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x25519_agreement() {
        let ours = KeyExchange::start(&X25519).unwrap();
        let theirs = KeyExchange::start(&X25519).unwrap();

        let our_pub = ours.pubkey.as_ref().to_vec();
        let their_pub = theirs.pubkey.as_ref().to_vec();

        let a = ours.complete(&their_pub).unwrap();
        let b = theirs.complete(&our_pub).unwrap();
        assert_eq!(a.shared_secret, b.shared_secret);
        assert_eq!(a.shared_secret.len(), 32);
    }

    #[test]
    fn p256_rejects_garbage_peer_key() {
        let ours = KeyExchange::start(&SECP256R1).unwrap();
        assert!(ours.complete(&[0xab; 12]).is_err());
    }

    #[test]
    fn choose_respects_support_list() {
        assert!(KeyExchange::choose(NamedGroup::X25519, &[&X25519, &SECP256R1]).is_some());
        assert!(KeyExchange::choose(NamedGroup::secp384r1, &[&X25519]).is_none());
    }
}
