use crate::conn::{CommonState, ConnectionCommon, PlaintextSink, Reader, Writer};
use crate::error::Error;
use crate::key;
use crate::kx::SupportedKxGroup;
use crate::msgs::enums::{CipherSuite, HeartbeatMode, ProtocolVersion, SignatureScheme};
use crate::rand::{RandomSource, RingRandom};
use crate::sign;
use crate::suites::SupportedCipherSuite;
use crate::ticketer::{NeverProducesTickets, ProducesTickets};
use crate::tls12::Side;
use crate::verify::ClientCertVerifier;

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

pub(crate) mod hs;
mod tls12;
mod tls13;

/// A trait for the ability to store server session data.
///
/// The keys and values are opaque.
///
/// Both the keys and values should be treated as
/// **highly sensitive data**, containing enough key material
/// to break all security of the corresponding sessions.
///
/// Implementations must be internally synchronized: they will be
/// shared between connections running on different threads.
pub trait StoresServerSessions: Send + Sync {
    /// Store session secrets encoded in `value` against `key`,
    /// overwrites any existing value against `key`.  Returns `true`
    /// if the value was stored.
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> bool;

    /// Find a value with the given `key`.  Return it, or None
    /// if it doesn't exist.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Find a value with the given `key`.  Return it and delete it;
    /// or None if it doesn't exist.
    fn take(&self, key: &[u8]) -> Option<Vec<u8>>;
}

/// Something which never stores sessions.
pub struct NoServerSessionStorage;

impl StoresServerSessions for NoServerSessionStorage {
    fn put(&self, _id: Vec<u8>, _sec: Vec<u8>) -> bool {
        false
    }
    fn get(&self, _id: &[u8]) -> Option<Vec<u8>> {
        None
    }
    fn take(&self, _id: &[u8]) -> Option<Vec<u8>> {
        None
    }
}

/// An implementer of `StoresServerSessions` that stores everything
/// in memory.  If enforces a limit on the number of stored sessions
/// to bound memory usage.
pub struct ServerSessionMemoryCache {
    cache: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    max_entries: usize,
}

impl ServerSessionMemoryCache {
    /// Make a new ServerSessionMemoryCache.  `size` is the maximum
    /// number of stored sessions.
    pub fn new(size: usize) -> Arc<Self> {
        debug_assert!(size > 0);
        Arc::new(Self {
            cache: Mutex::new(HashMap::new()),
            max_entries: size,
        })
    }
}

impl StoresServerSessions for ServerSessionMemoryCache {
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> bool {
        let mut cache = self.cache.lock().unwrap();
        if cache.len() >= self.max_entries && !cache.contains_key(&key) {
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

    fn take(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.cache.lock().unwrap().remove(key)
    }
}

/// A struct representing the received Client Hello
pub struct ClientHello<'a> {
    /// The server name indication, if supplied by the client.
    pub server_name: Option<&'a str>,

    /// The compatible signature schemes offered.
    pub signature_schemes: &'a [SignatureScheme],

    /// The ALPN protocol identifiers offered.
    pub alpn: Option<Vec<&'a [u8]>>,

    /// The cipher suite ids offered.
    pub cipher_suites: &'a [CipherSuite],
}

/// How to choose a certificate chain and signing key for use
/// in server authentication.
pub trait ResolvesServerCert: Send + Sync {
    /// Choose a certificate chain and matching key given simplified
    /// ClientHello information.
    ///
    /// Return `None` to abort the handshake.
    fn resolve(&self, client_hello: ClientHello) -> Option<Arc<sign::CertifiedKey>>;
}

/// Something which always resolves to the same cert chain.
struct AlwaysResolvesChain(Arc<sign::CertifiedKey>);

impl AlwaysResolvesChain {
    fn new(chain: Vec<key::Certificate>, priv_key: &key::PrivateKey) -> Result<Self, Error> {
        let key = sign::any_supported_type(priv_key)?;
        Ok(Self(Arc::new(sign::CertifiedKey::new(chain, key))))
    }
}

impl ResolvesServerCert for AlwaysResolvesChain {
    fn resolve(&self, _client_hello: ClientHello) -> Option<Arc<sign::CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }
}

/// Something which never resolves a certificate.
struct FailResolveChain;

impl ResolvesServerCert for FailResolveChain {
    fn resolve(&self, _client_hello: ClientHello) -> Option<Arc<sign::CertifiedKey>> {
        None
    }
}

/// Common configuration for a set of server sessions.
///
/// Making one of these can be expensive, and should be
/// once per process rather than once per connection.
pub struct ServerConfig {
    /// List of ciphersuites, in preference order.
    pub cipher_suites: Vec<SupportedCipherSuite>,

    /// List of supported key exchange groups, in preference order.
    pub kx_groups: Vec<&'static SupportedKxGroup>,

    /// Supported protocol versions, in no particular order.
    pub versions: Vec<ProtocolVersion>,

    /// Which ALPN protocols we support, most preferred first.
    /// If empty we don't do ALPN at all.
    pub alpn_protocols: Vec<Vec<u8>>,

    /// How to store client sessions (for TLS1.2 session-id resumption).
    pub session_storage: Arc<dyn StoresServerSessions>,

    /// How to produce tickets (TLS1.2 RFC5077 and TLS1.3 resumption).
    pub ticketer: Arc<dyn ProducesTickets>,

    /// How to choose a server cert and key.
    pub cert_resolver: Arc<dyn ResolvesServerCert>,

    /// How to verify client certificates, and whether to request them.
    pub verifier: Arc<dyn ClientCertVerifier>,

    /// Whether to refuse TLS1.2 handshakes lacking the
    /// extended-master-secret binding (RFC7627).
    pub require_ems: bool,

    /// How many TLS1.3 tickets to send immediately after a completed
    /// handshake.
    pub send_tls13_tickets: usize,

    /// Heartbeat mode to advertise when the client offers the
    /// extension; None leaves heartbeat un-negotiated.
    pub heartbeat_mode: Option<HeartbeatMode>,

    /// Source of cryptographically secure random bytes.
    pub random: Arc<dyn RandomSource>,
}

impl ServerConfig {
    /// Make a config with no certificate resolver (set one with
    /// `set_single_cert`), no client auth, and safe defaults.
    pub fn new(verifier: Arc<dyn ClientCertVerifier>) -> Self {
        Self {
            cipher_suites: crate::suites::DEFAULT_CIPHER_SUITES.to_vec(),
            kx_groups: crate::kx::ALL_KX_GROUPS.to_vec(),
            versions: vec![ProtocolVersion::TLSv1_3, ProtocolVersion::TLSv1_2],
            alpn_protocols: Vec::new(),
            session_storage: ServerSessionMemoryCache::new(256),
            ticketer: Arc::new(NeverProducesTickets),
            cert_resolver: Arc::new(FailResolveChain),
            verifier,
            require_ems: false,
            send_tls13_tickets: 1,
            heartbeat_mode: None,
            random: Arc::new(RingRandom::default()),
        }
    }

    /// Sets a single certificate chain and matching private key.  This
    /// certificate and key is used for all subsequent connections,
    /// irrespective of things like SNI hostname.
    pub fn set_single_cert(
        &mut self,
        cert_chain: Vec<key::Certificate>,
        key_der: key::PrivateKey,
    ) -> Result<(), Error> {
        let resolver = AlwaysResolvesChain::new(cert_chain, &key_der)?;
        self.cert_resolver = Arc::new(resolver);
        Ok(())
    }

    pub(crate) fn supports_version(&self, v: ProtocolVersion) -> bool {
        self.versions.contains(&v)
    }
}

/// State associated with a server connection.
pub struct ServerConnectionData {
    /// The SNI hostname the client supplied, once known.
    pub(crate) sni: Option<String>,
}

impl ServerConnectionData {
    fn new() -> Self {
        Self { sni: None }
    }
}

/// This represents a single TLS server connection.
///
/// Send TLS-protected data to the peer using the `io::Write` trait
/// implementation on the object `writer()` returns.  Read data from
/// the peer using the `io::Read` trait implementation on `reader()`.
pub struct ServerConnection {
    inner: ConnectionCommon<ServerConnectionData>,
}

impl ServerConnection {
    /// Make a new ServerConnection.  `config` controls how
    /// we behave in the TLS protocol.
    pub fn new(config: Arc<ServerConfig>) -> Result<Self, Error> {
        let common_state = CommonState::new(Side::Server, Arc::clone(&config.random));
        let data = ServerConnectionData::new();
        let state = Box::new(hs::ExpectClientHello::new(config));

        Ok(Self {
            inner: ConnectionCommon::new(state, data, common_state),
        })
    }

    /// Retrieves the SNI hostname, if any, used to select the certificate and
    /// private key.
    ///
    /// This returns `None` until some time after the client's SNI extension
    /// value is processed during the handshake.
    pub fn sni_hostname(&self) -> Option<&str> {
        self.inner.data.sni.as_deref()
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

impl PlaintextSink for ServerConnection {
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

impl Deref for ServerConnection {
    type Target = ConnectionCommon<ServerConnectionData>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for ServerConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConnection")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_cache_put_get_take() {
        let cache = ServerSessionMemoryCache::new(4);
        assert!(cache.put(b"id".to_vec(), b"state".to_vec()));
        assert_eq!(cache.get(b"id"), Some(b"state".to_vec()));
        assert_eq!(cache.take(b"id"), Some(b"state".to_vec()));
        assert_eq!(cache.get(b"id"), None);
    }

    #[test]
    fn server_cache_bounded() {
        let cache = ServerSessionMemoryCache::new(2);
        for i in 0..5u8 {
            cache.put(vec![i], vec![i]);
        }
        let live = (0..5u8).filter(|i| cache.get(&[*i]).is_some()).count();
        assert_eq!(live, 2);
    }
}
