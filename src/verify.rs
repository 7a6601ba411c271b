use crate::error::Error;
use crate::key;
use crate::msgs::enums::SignatureScheme;
use crate::msgs::handshake::DigitallySignedStruct;

use once_cell::sync::Lazy;
use ring::digest;

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

type SignatureAlgorithms = &'static [&'static webpki::SignatureAlgorithm];

/// Which signature verification mechanisms we support.  No particular
/// order.
static SUPPORTED_SIG_ALGS: SignatureAlgorithms = &[
    &webpki::ECDSA_P256_SHA256,
    &webpki::ECDSA_P256_SHA384,
    &webpki::ECDSA_P384_SHA256,
    &webpki::ECDSA_P384_SHA384,
    &webpki::ED25519,
    &webpki::RSA_PSS_2048_8192_SHA256_LEGACY_KEY,
    &webpki::RSA_PSS_2048_8192_SHA384_LEGACY_KEY,
    &webpki::RSA_PSS_2048_8192_SHA512_LEGACY_KEY,
    &webpki::RSA_PKCS1_2048_8192_SHA256,
    &webpki::RSA_PKCS1_2048_8192_SHA384,
    &webpki::RSA_PKCS1_2048_8192_SHA512,
];

/// Marker types.  These are used to bind the fact some verification
/// (certificate chain or handshake signature) has taken place into
/// protocol states.  We use this to have the compiler check that there
/// are no 'goto fail'-style elisions of important checks before we
/// reach the traffic stage.
///
/// These types are public, but cannot be directly constructed.  This
/// means their origins can be precisely determined by looking
/// for their `assertion` constructors.
pub struct ServerCertVerified(());

impl ServerCertVerified {
    /// Make a `ServerCertVerified`
    pub fn assertion() -> Self {
        Self(())
    }
}

/// Marker type for a verified handshake signature.
pub struct HandshakeSignatureValid(());

impl HandshakeSignatureValid {
    /// Make a `HandshakeSignatureValid`
    pub fn assertion() -> Self {
        Self(())
    }
}

/// Marker type for a verified client certificate chain.
pub struct ClientCertVerified(());

impl ClientCertVerified {
    /// Make a `ClientCertVerified`
    pub fn assertion() -> Self {
        Self(())
    }
}

/// Something that can verify a server certificate chain, and verify
/// signatures made by certificates.
pub trait ServerCertVerifier: Send + Sync {
    /// Verify the end-entity certificate `end_entity` is valid for the
    /// hostname `server_name` and chains to at least one trust anchor,
    /// via `intermediates`.
    ///
    /// `now` is the current time; certificate validity is assessed
    /// against it.
    fn verify_server_cert(
        &self,
        end_entity: &key::Certificate,
        intermediates: &[key::Certificate],
        server_name: &str,
        now: SystemTime,
    ) -> Result<ServerCertVerified, Error>;

    /// Verify a signature allegedly by the given server certificate.
    ///
    /// `message` is not hashed, and needs hashing during the verification.
    /// The signature and algorithm are within `dss`.  `cert` contains the
    /// public key to use.
    ///
    /// This method is only called for TLS1.2 handshakes.
    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &key::Certificate,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        verify_signed_struct(message, cert, dss)
    }

    /// Verify a signature allegedly by the given server certificate.
    ///
    /// This method is only called for TLS1.3 handshakes.
    /// The `dss.scheme` is guaranteed to be one of those returned by
    /// `supported_verify_schemes`.
    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &key::Certificate,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        verify_tls13(message, cert, dss)
    }

    /// Return the list of SignatureSchemes that this verifier will handle,
    /// in `verify_tls12_signature` and `verify_tls13_signature` calls.
    ///
    /// This should be in priority order, with the most preferred first.
    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        default_supported_verify_schemes()
    }
}

/// Something that can verify a client certificate chain.
pub trait ClientCertVerifier: Send + Sync {
    /// Returns `true` to enable the server to request a client certificate.
    fn offer_client_auth(&self) -> bool {
        true
    }

    /// Return `true` to require a client certificate and `false` to make
    /// client authentication optional.
    fn client_auth_mandatory(&self) -> bool {
        self.offer_client_auth()
    }

    /// Verify the end-entity certificate `end_entity` is valid, acceptable,
    /// and chains to at least one of our trust anchors, via `intermediates`.
    fn verify_client_cert(
        &self,
        end_entity: &key::Certificate,
        intermediates: &[key::Certificate],
        now: SystemTime,
    ) -> Result<ClientCertVerified, Error>;

    /// Verify a signature allegedly by the given client certificate.
    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &key::Certificate,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        verify_signed_struct(message, cert, dss)
    }

    /// Verify a TLS1.3 signature allegedly by the given client certificate.
    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &key::Certificate,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        verify_tls13(message, cert, dss)
    }

    /// Return the list of SignatureSchemes that this verifier will handle.
    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        default_supported_verify_schemes()
    }
}

static DEFAULT_VERIFY_SCHEMES: Lazy<Vec<SignatureScheme>> = Lazy::new(|| {
    vec![
        SignatureScheme::ECDSA_NISTP384_SHA384,
        SignatureScheme::ECDSA_NISTP256_SHA256,
        SignatureScheme::ED25519,
        SignatureScheme::RSA_PSS_SHA512,
        SignatureScheme::RSA_PSS_SHA384,
        SignatureScheme::RSA_PSS_SHA256,
        SignatureScheme::RSA_PKCS1_SHA512,
        SignatureScheme::RSA_PKCS1_SHA384,
        SignatureScheme::RSA_PKCS1_SHA256,
    ]
});

fn default_supported_verify_schemes() -> Vec<SignatureScheme> {
    DEFAULT_VERIFY_SCHEMES.clone()
}

/// A trust anchor, commonly known as a "Root Certificate."
#[derive(Debug, Clone)]
pub struct OwnedTrustAnchor {
    subject: Vec<u8>,
    spki: Vec<u8>,
    name_constraints: Option<Vec<u8>>,
}

impl OwnedTrustAnchor {
    /// Constructs an `OwnedTrustAnchor` from its components.
    pub fn from_subject_spki_name_constraints(
        subject: impl Into<Vec<u8>>,
        spki: impl Into<Vec<u8>>,
        name_constraints: Option<impl Into<Vec<u8>>>,
    ) -> Self {
        Self {
            subject: subject.into(),
            spki: spki.into(),
            name_constraints: name_constraints.map(|x| x.into()),
        }
    }

    fn to_trust_anchor(&self) -> webpki::TrustAnchor {
        webpki::TrustAnchor {
            subject: &self.subject,
            spki: &self.spki,
            name_constraints: self.name_constraints.as_deref(),
        }
    }
}

/// A container for root certificates able to provide a root-of-trust
/// for connection authentication.
#[derive(Debug, Clone, Default)]
pub struct RootCertStore {
    /// The list of roots.
    pub roots: Vec<OwnedTrustAnchor>,
}

impl RootCertStore {
    /// Make a new, empty `RootCertStore`.
    pub fn empty() -> Self {
        Self { roots: Vec::new() }
    }

    /// Say how many certificates are in the container.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Return true if there are no certificates.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Add a single DER-encoded certificate to the store.
    pub fn add(&mut self, der: &key::Certificate) -> Result<(), Error> {
        let ta = webpki::TrustAnchor::try_from_cert_der(&der.0)?;
        self.roots
            .push(OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            ));
        Ok(())
    }
}

/// Default `ServerCertVerifier`: uses webpki for certificate path
/// validation against a `RootCertStore`.
pub struct WebPkiVerifier {
    roots: Arc<RootCertStore>,
}

impl WebPkiVerifier {
    /// Constructs a new `WebPkiVerifier`.
    pub fn new(roots: impl Into<Arc<RootCertStore>>) -> Self {
        Self {
            roots: roots.into(),
        }
    }
}

impl ServerCertVerifier for WebPkiVerifier {
    /// Will verify the certificate is valid in the following ways:
    /// - Signed by a trusted `RootCertStore` CA
    /// - Not Expired
    /// - Valid for DNS entry
    fn verify_server_cert(
        &self,
        end_entity: &key::Certificate,
        intermediates: &[key::Certificate],
        server_name: &str,
        now: SystemTime,
    ) -> Result<ServerCertVerified, Error> {
        let (cert, chain, trustroots) = prepare(end_entity, intermediates, &self.roots)?;
        let webpki_now = webpki::Time::try_from(now).map_err(|_| Error::FailedToGetCurrentTime)?;

        cert.verify_is_valid_tls_server_cert(
            SUPPORTED_SIG_ALGS,
            &webpki::TlsServerTrustAnchors(&trustroots),
            &chain,
            webpki_now,
        )?;

        let dns_name = webpki::DnsNameRef::try_from_ascii_str(server_name)
            .map_err(|_| Error::UnsupportedNameType)?;
        cert.verify_is_valid_for_dns_name(dns_name)?;

        Ok(ServerCertVerified::assertion())
    }
}

type CertChainAndRoots<'a, 'b> = (
    webpki::EndEntityCert<'a>,
    Vec<&'a [u8]>,
    Vec<webpki::TrustAnchor<'b>>,
);

fn prepare<'a, 'b>(
    end_entity: &'a key::Certificate,
    intermediates: &'a [key::Certificate],
    roots: &'b RootCertStore,
) -> Result<CertChainAndRoots<'a, 'b>, Error> {
    // EE cert must appear first.
    let cert = webpki::EndEntityCert::try_from(end_entity.0.as_ref())?;

    let intermediates: Vec<&'a [u8]> = intermediates
        .iter()
        .map(|cert| cert.0.as_ref())
        .collect();

    let trustroots: Vec<webpki::TrustAnchor> = roots
        .roots
        .iter()
        .map(OwnedTrustAnchor::to_trust_anchor)
        .collect();

    Ok((cert, intermediates, trustroots))
}

fn convert_scheme(scheme: SignatureScheme) -> Result<&'static webpki::SignatureAlgorithm, Error> {
    Ok(match scheme {
        SignatureScheme::ECDSA_NISTP256_SHA256 => &webpki::ECDSA_P256_SHA256,
        SignatureScheme::ECDSA_NISTP384_SHA384 => &webpki::ECDSA_P384_SHA384,
        SignatureScheme::ED25519 => &webpki::ED25519,
        SignatureScheme::RSA_PKCS1_SHA256 => &webpki::RSA_PKCS1_2048_8192_SHA256,
        SignatureScheme::RSA_PKCS1_SHA384 => &webpki::RSA_PKCS1_2048_8192_SHA384,
        SignatureScheme::RSA_PKCS1_SHA512 => &webpki::RSA_PKCS1_2048_8192_SHA512,
        SignatureScheme::RSA_PSS_SHA256 => &webpki::RSA_PSS_2048_8192_SHA256_LEGACY_KEY,
        SignatureScheme::RSA_PSS_SHA384 => &webpki::RSA_PSS_2048_8192_SHA384_LEGACY_KEY,
        SignatureScheme::RSA_PSS_SHA512 => &webpki::RSA_PSS_2048_8192_SHA512_LEGACY_KEY,
        _ => {
            return Err(Error::PeerMisbehavedError(
                "signature scheme not supported".to_string(),
            ));
        }
    })
}

fn verify_sig_using_any_alg(
    cert: &webpki::EndEntityCert,
    alg: &'static webpki::SignatureAlgorithm,
    message: &[u8],
    sig: &[u8],
) -> Result<(), webpki::Error> {
    cert.verify_signature(alg, message, sig)
}

/// Verify the signed `message` using the public key quoted in
/// `cert` and algorithm and signature in `dss`.
///
/// `cert` MUST have been authenticated before using this function,
/// typically using `verify_server_cert` or `verify_client_cert`.
pub fn verify_signed_struct(
    message: &[u8],
    cert: &key::Certificate,
    dss: &DigitallySignedStruct,
) -> Result<HandshakeSignatureValid, Error> {
    let alg = convert_scheme(dss.scheme)?;
    let cert = webpki::EndEntityCert::try_from(cert.0.as_ref())?;

    verify_sig_using_any_alg(&cert, alg, message, &dss.sig.0)
        .map_err(Error::from)
        .map(|_| HandshakeSignatureValid::assertion())
}

fn eq_consttime(a: &[u8], b: &[u8]) -> bool {
    ring::constant_time::verify_slices_are_equal(a, b).is_ok()
}

/// Constructs the signature message specified in section 4.4.3 of RFC8446.
pub fn construct_tls13_server_verify_message(handshake_hash: &digest::Digest) -> Vec<u8> {
    construct_tls13_verify_message(handshake_hash, b"TLS 1.3, server CertificateVerify\x00")
}

/// As above, for client authentication.
pub fn construct_tls13_client_verify_message(handshake_hash: &digest::Digest) -> Vec<u8> {
    construct_tls13_verify_message(handshake_hash, b"TLS 1.3, client CertificateVerify\x00")
}

fn construct_tls13_verify_message(
    handshake_hash: &digest::Digest,
    context_string_with_0: &[u8],
) -> Vec<u8> {
    let mut msg = Vec::new();
    msg.resize(64, 0x20u8);
    msg.extend_from_slice(context_string_with_0);
    msg.extend_from_slice(handshake_hash.as_ref());
    msg
}

/// Verify a TLS1.3 CertificateVerify body.
pub fn verify_tls13(
    msg: &[u8],
    cert: &key::Certificate,
    dss: &DigitallySignedStruct,
) -> Result<HandshakeSignatureValid, Error> {
    let alg = convert_scheme(dss.scheme)?;

    let cert = webpki::EndEntityCert::try_from(cert.0.as_ref())?;
    cert.verify_signature(alg, msg, &dss.sig.0)
        .map_err(Error::from)
        .map(|_| HandshakeSignatureValid::assertion())
}

/// Check `verify_data` against `expect`, in constant time.
pub(crate) fn check_verify_data(expect: &[u8], got: &[u8]) -> Result<(), Error> {
    match eq_consttime(expect, got) {
        true => Ok(()),
        false => Err(Error::DecryptError),
    }
}

/// A `ClientCertVerifier` that will ensure that every client provides a
/// trusted certificate.
pub struct AllowAnyAuthenticatedClient {
    roots: RootCertStore,
}

impl AllowAnyAuthenticatedClient {
    /// Construct a new `AllowAnyAuthenticatedClient`.
    pub fn new(roots: RootCertStore) -> Arc<dyn ClientCertVerifier> {
        Arc::new(Self { roots })
    }
}

impl ClientCertVerifier for AllowAnyAuthenticatedClient {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn verify_client_cert(
        &self,
        end_entity: &key::Certificate,
        intermediates: &[key::Certificate],
        now: SystemTime,
    ) -> Result<ClientCertVerified, Error> {
        let (cert, chain, trustroots) = prepare(end_entity, intermediates, &self.roots)?;
        let now = webpki::Time::try_from(now).map_err(|_| Error::FailedToGetCurrentTime)?;
        cert.verify_is_valid_tls_client_cert(
            SUPPORTED_SIG_ALGS,
            &webpki::TlsClientTrustAnchors(&trustroots),
            &chain,
            now,
        )
        .map_err(Error::from)
        .map(|_| ClientCertVerified::assertion())
    }
}

/// Turns off client authentication.
pub struct NoClientAuth;

impl NoClientAuth {
    /// Construct a `NoClientAuth`, wrap it in an `Arc`.
    pub fn new() -> Arc<dyn ClientCertVerifier> {
        Arc::new(Self)
    }
}

impl ClientCertVerifier for NoClientAuth {
    fn offer_client_auth(&self) -> bool {
        false
    }

    fn verify_client_cert(
        &self,
        _end_entity: &key::Certificate,
        _intermediates: &[key::Certificate],
        _now: SystemTime,
    ) -> Result<ClientCertVerified, Error> {
        unimplemented!();
    }
}

impl fmt::Debug for dyn ServerCertVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dyn ServerCertVerifier")
    }
}

impl fmt::Debug for dyn ClientCertVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dyn ClientCertVerifier")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls13_verify_message_layout() {
        let hash = digest::digest(&digest::SHA256, b"transcript");
        let msg = construct_tls13_server_verify_message(&hash);

        assert_eq!(&msg[..64], &[0x20u8; 64][..]);
        assert_eq!(&msg[64..97], b"TLS 1.3, server CertificateVerify\x00");
        assert_eq!(&msg[97..], hash.as_ref());
    }

    #[test]
    fn client_and_server_verify_messages_differ() {
        let hash = digest::digest(&digest::SHA256, b"transcript");
        assert_ne!(
            construct_tls13_server_verify_message(&hash),
            construct_tls13_client_verify_message(&hash)
        );
    }

    #[test]
    fn verify_data_check_is_exact() {
        assert!(check_verify_data(&[1, 2, 3], &[1, 2, 3]).is_ok());
        assert_eq!(
            check_verify_data(&[1, 2, 3], &[1, 2, 4]),
            Err(Error::DecryptError)
        );
        assert_eq!(
            check_verify_data(&[1, 2, 3], &[1, 2]),
            Err(Error::DecryptError)
        );
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let dss = DigitallySignedStruct::new(SignatureScheme::ECDSA_SHA1_Legacy, vec![0; 64]);
        assert!(matches!(
            verify_signed_struct(b"msg", &key::Certificate(vec![]), &dss),
            Err(Error::PeerMisbehavedError(_))
        ));
    }
}
