use crate::conn::{CommonState, ConnectionCommon, PlaintextSink, Reader, Writer};
use crate::error::Error;
use crate::kx::SupportedKxGroup;
use crate::msgs::enums::{CipherSuite, HeartbeatMode, ProtocolVersion, SignatureScheme};
use crate::rand::{RandomSource, RingRandom};
use crate::sign;
use crate::suites::SupportedCipherSuite;
use crate::tls12::Side;
use crate::verify::ServerCertVerifier;

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

mod common;
pub(crate) mod hs;
mod tls12;
mod tls13;

pub use common::ServerName;

/// A trait for the ability to store client session data.
///
/// The keys and values are opaque.
///
/// Both the keys and values should be treated as
/// **highly sensitive data**, containing enough key material
/// to break all security of the corresponding session.
///
/// Implementations must be internally synchronized.
pub trait StoresClientSessions: Send + Sync {
    /// Stores a new `value` for `key`.  Returns `true`
    /// if the value was stored.
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> bool;

    /// Returns the latest value for `key`.  Returns `None`
    /// if there's no such value.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Removes any value for `key`, returning it.
    fn remove(&self, key: &[u8]) -> Option<Vec<u8>>;
}

/// An implementer of `StoresClientSessions` which does nothing.
pub struct NoClientSessionStorage;

impl StoresClientSessions for NoClientSessionStorage {
    fn put(&self, _key: Vec<u8>, _value: Vec<u8>) -> bool {
        false
    }

    fn get(&self, _key: &[u8]) -> Option<Vec<u8>> {
        None
    }

    fn remove(&self, _key: &[u8]) -> Option<Vec<u8>> {
        None
    }
}

/// An implementer of `StoresClientSessions` that stores everything
/// in memory.  It enforces a limit on the number of entries
/// to bound memory usage.
pub struct ClientSessionMemoryCache {
    cache: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    max_entries: usize,
}

impl ClientSessionMemoryCache {
    /// Make a new ClientSessionMemoryCache.  `size` is the
    /// maximum number of stored sessions.
    pub fn new(size: usize) -> Arc<Self> {
        debug_assert!(size > 0);
        Arc::new(Self {
            cache: Mutex::new(HashMap::new()),
            max_entries: size,
        })
    }
}

impl StoresClientSessions for ClientSessionMemoryCache {
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> bool {
        let mut cache = self.cache.lock().unwrap();
        if cache.len() >= self.max_entries && !cache.contains_key(&key) {
            // Arbitrary eviction is fine here: the only penalty for
            // evicting a usable session is a full handshake.
            let victim = cache.keys().next().cloned();
            if let Some(victim) = victim {
                cache.remove(&victim);
            }
        }
        cache.insert(key, value);
        true
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.cache.lock().unwrap().get(key).cloned()
    }

    fn remove(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.cache.lock().unwrap().remove(key)
    }
}

/// A trait for the ability to choose a certificate chain and
/// private key for the purposes of client authentication.
pub trait ResolvesClientCert: Send + Sync {
    /// With the server-supplied acceptable issuers in `acceptable_issuers`,
    /// the server's supported signature schemes in `sigschemes`,
    /// return a certificate chain and signing key to use.
    fn resolve(
        &self,
        acceptable_issuers: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<sign::CertifiedKey>>;

    /// Return true if any certificates at all are available.
    fn has_certs(&self) -> bool;
}

/// Does not resolve any certificate: turns off client auth.
struct FailResolveClientCert;

impl ResolvesClientCert for FailResolveClientCert {
    fn resolve(
        &self,
        _acceptable_issuers: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<sign::CertifiedKey>> {
        None
    }

    fn has_certs(&self) -> bool {
        false
    }
}

/// Always resolves to a single certificate and key.
pub struct AlwaysResolvesClientCert(Arc<sign::CertifiedKey>);

impl AlwaysResolvesClientCert {
    /// Use the given chain and key for every client-auth request.
    pub fn new(
        chain: Vec<crate::key::Certificate>,
        priv_key: &crate::key::PrivateKey,
    ) -> Result<Self, Error> {
        let key = sign::any_supported_type(priv_key)?;
        Ok(Self(Arc::new(sign::CertifiedKey::new(chain, key))))
    }
}

impl ResolvesClientCert for AlwaysResolvesClientCert {
    fn resolve(
        &self,
        _acceptable_issuers: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<sign::CertifiedKey>> {
        self.0
            .key
            .choose_scheme(sigschemes)
            .map(|_| Arc::clone(&self.0))
    }

    fn has_certs(&self) -> bool {
        true
    }
}

/// Common configuration for (typically) all connections made by
/// a program.
///
/// Making one of these can be expensive, and should be
/// once per process rather than once per connection.
///
/// These must be created via `ClientConfig::new()`.
pub struct ClientConfig {
    /// List of ciphersuites, in preference order.
    pub cipher_suites: Vec<SupportedCipherSuite>,

    /// List of supported key exchange groups, in preference order.
    pub kx_groups: Vec<&'static SupportedKxGroup>,

    /// Supported versions, in no particular order.  The default
    /// is all supported versions.
    pub versions: Vec<ProtocolVersion>,

    /// Which ALPN protocols we include in our client hello.
    /// If empty, no ALPN extension is sent.
    pub alpn_protocols: Vec<Vec<u8>>,

    /// How we store session data or tickets.
    pub session_storage: Arc<dyn StoresClientSessions>,

    /// Whether to support RFC5077 tickets and TLS1.3 resumption.
    pub enable_tickets: bool,

    /// How to verify the server certificate chain.
    pub verifier: Arc<dyn ServerCertVerifier>,

    /// How to decide what client auth certificate/keys to use.
    pub client_auth_cert_resolver: Arc<dyn ResolvesClientCert>,

    /// Whether to send the Server Name Indication (SNI) extension
    /// during the client handshake.
    pub enable_sni: bool,

    /// Whether to refuse TLS1.2 sessions lacking the extended-master-secret
    /// binding (RFC7627).  The extension is always offered.
    pub require_ems: bool,

    /// Whether to offer the encrypt-then-MAC extension (RFC7366).
    /// It only changes the wire protocol for CBC suites, none of
    /// which we ship, but offering it is harmless and recording the
    /// negotiated result lets sessions carry the flag.
    pub offer_etm: bool,

    /// Heartbeat mode to advertise, or None to leave heartbeat
    /// un-negotiated.  `PeerAllowedToSend` grants the *server*
    /// permission to send requests to us.
    pub heartbeat_mode: Option<HeartbeatMode>,

    /// Source of cryptographically secure random bytes used for the
    /// hello random, session ids, and heartbeat padding.
    pub random: Arc<dyn RandomSource>,
}

impl ClientConfig {
    /// Make a `ClientConfig` with a default set of ciphersuites,
    /// no keys/certificates, and the provided server certificate
    /// verifier.
    pub fn new(verifier: Arc<dyn ServerCertVerifier>) -> Self {
        Self {
            cipher_suites: crate::suites::DEFAULT_CIPHER_SUITES.to_vec(),
            kx_groups: crate::kx::ALL_KX_GROUPS.to_vec(),
            versions: vec![ProtocolVersion::TLSv1_3, ProtocolVersion::TLSv1_2],
            alpn_protocols: Vec::new(),
            session_storage: ClientSessionMemoryCache::new(32),
            enable_tickets: true,
            verifier,
            client_auth_cert_resolver: Arc::new(FailResolveClientCert),
            enable_sni: true,
            require_ems: false,
            offer_etm: false,
            heartbeat_mode: None,
            random: Arc::new(RingRandom::default()),
        }
    }

    /// Set the client auth certificate and key.
    pub fn set_single_client_cert(
        &mut self,
        cert_chain: Vec<crate::key::Certificate>,
        key_der: crate::key::PrivateKey,
    ) -> Result<(), Error> {
        self.client_auth_cert_resolver =
            Arc::new(AlwaysResolvesClientCert::new(cert_chain, &key_der)?);
        Ok(())
    }

    pub(crate) fn supports_version(&self, v: ProtocolVersion) -> bool {
        self.versions.contains(&v)
    }

    pub(crate) fn find_cipher_suite(&self, suite: CipherSuite) -> Option<SupportedCipherSuite> {
        self.cipher_suites
            .iter()
            .copied()
            .find(|scs| scs.suite() == suite)
    }
}

/// State associated with a client connection.
pub struct ClientConnectionData {
    pub(crate) resumption_ciphersuite: Option<SupportedCipherSuite>,
}

impl ClientConnectionData {
    fn new() -> Self {
        Self {
            resumption_ciphersuite: None,
        }
    }
}

/// This represents a single TLS client connection.
pub struct ClientConnection {
    inner: ConnectionCommon<ClientConnectionData>,
}

impl ClientConnection {
    /// Make a new ClientConnection.  `config` controls how
    /// we behave in the TLS protocol, `name` is the
    /// name of the server we want to talk to.
    pub fn new(config: Arc<ClientConfig>, name: ServerName) -> Result<Self, Error> {
        let mut common_state = CommonState::new(Side::Client, Arc::clone(&config.random));
        let mut data = ClientConnectionData::new();

        let mut cx = crate::conn::Context {
            common: &mut common_state,
            data: &mut data,
        };

        let state = hs::start_handshake(name, config, &mut cx)?;

        Ok(Self {
            inner: ConnectionCommon::new(state, data, common_state),
        })
    }

    /// Returns an `io::Write` implementer you can write bytes to
    /// to send TLS1.3 early data (ie, zero-RTT data) to the server.
    ///
    /// Early data is not supported by this engine: gating is
    /// implemented (tickets record a zero early-data limit and the
    /// extension is never offered), so this returns `None`.
    pub fn early_data(&mut self) -> Option<()> {
        None
    }

    /// Returns the cipher suite of the session this connection resumed,
    /// if it was resumed via a TLS1.3 pre-shared key.
    pub fn resumption_cipher_suite(&self) -> Option<SupportedCipherSuite> {
        self.inner.data.resumption_ciphersuite
    }

    /// Returns an object that allows reading plaintext.
    pub fn reader(&mut self) -> Reader {
        self.inner.reader()
    }

    /// Returns an object that allows writing plaintext.
    pub fn writer(&mut self) -> Writer {
        Writer::new(self)
    }
}

impl PlaintextSink for ClientConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self
            .inner
            .common_state
            .send_some_plaintext(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Deref for ClientConnection {
    type Target = ConnectionCommon<ClientConnectionData>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for ClientConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_cache_evicts_at_limit() {
        let cache = ClientSessionMemoryCache::new(2);
        assert!(cache.put(b"a".to_vec(), b"1".to_vec()));
        assert!(cache.put(b"b".to_vec(), b"2".to_vec()));
        assert!(cache.put(b"c".to_vec(), b"3".to_vec()));

        let live = [b"a", b"b", b"c"]
            .iter()
            .filter(|k| cache.get(&k[..]).is_some())
            .count();
        assert_eq!(live, 2);
    }

    #[test]
    fn memory_cache_remove_takes_value() {
        let cache = ClientSessionMemoryCache::new(4);
        cache.put(b"k".to_vec(), b"v".to_vec());
        assert_eq!(cache.remove(b"k"), Some(b"v".to_vec()));
        assert_eq!(cache.get(b"k"), None);
    }
}
