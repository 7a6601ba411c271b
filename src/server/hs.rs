use crate::check::require_handshake_msg;
use crate::conn::{Context, State};
use crate::error::Error;
use crate::hash_hs::{HandshakeHash, HandshakeHashBuffer};
use crate::msgs::enums::{
    AlertDescription, Compression, ExtensionType, HandshakeType, ProtocolVersion, SignatureScheme,
};
use crate::msgs::handshake::{ClientHelloPayload, ConvertServerNameList, HandshakePayload, HasExtensions};
use crate::msgs::handshake::ConvertProtocolNameList;
use crate::msgs::message::{Message, MessagePayload};
use crate::server::{ClientHello, ServerConfig, ServerConnectionData};
use crate::suites::{self, SupportedCipherSuite};
use crate::suites::SupportedCipherSuite::{Tls12, Tls13};

use crate::server::{tls12, tls13};

use log::{debug, trace};

use std::sync::Arc;

pub(crate) type NextState = Box<dyn State<ServerConnectionData>>;
pub(crate) type NextStateOrError = Result<NextState, Error>;
pub(crate) type ServerContext<'a> = Context<'a, ServerConnectionData>;

pub(super) fn incompatible(common: &mut crate::conn::CommonState, why: &str) -> Error {
    common.send_fatal_alert(AlertDescription::HandshakeFailure);
    Error::PeerIncompatibleError(why.to_string())
}

pub(super) fn bad_version(common: &mut crate::conn::CommonState, why: &str) -> Error {
    common.send_fatal_alert(AlertDescription::ProtocolVersion);
    Error::PeerIncompatibleError(why.to_string())
}

pub(super) fn illegal_param(common: &mut crate::conn::CommonState, why: &str) -> Error {
    common.send_fatal_alert(AlertDescription::IllegalParameter);
    Error::PeerMisbehavedError(why.to_string())
}

pub(super) fn decode_error(common: &mut crate::conn::CommonState, why: &str) -> Error {
    common.send_fatal_alert(AlertDescription::DecodeError);
    Error::PeerMisbehavedError(why.to_string())
}

/// The entrypoint of the server state machine.  The single transition
/// out of this state covers version, suite, group and resumption
/// negotiation; it re-enters itself once after issuing a
/// HelloRetryRequest.
pub(crate) struct ExpectClientHello {
    config: Arc<ServerConfig>,
    transcript: HandshakeHashOrBuffer,
    done_retry: bool,
}

pub(super) enum HandshakeHashOrBuffer {
    Buffer(HandshakeHashBuffer),
    Hash(HandshakeHash),
}

impl ExpectClientHello {
    pub(crate) fn new(config: Arc<ServerConfig>) -> Self {
        let mut transcript_buffer = HandshakeHashBuffer::new();
        if config.verifier.offer_client_auth() {
            transcript_buffer.set_client_auth_enabled();
        }

        Self {
            config,
            transcript: HandshakeHashOrBuffer::Buffer(transcript_buffer),
            done_retry: false,
        }
    }

    pub(super) fn with_hash(config: Arc<ServerConfig>, transcript: HandshakeHash) -> Self {
        Self {
            config,
            transcript: HandshakeHashOrBuffer::Hash(transcript),
            done_retry: true,
        }
    }
}

impl State<ServerConnectionData> for ExpectClientHello {
    fn handle(self: Box<Self>, cx: &mut ServerContext<'_>, m: Message) -> NextStateOrError {
        let client_hello =
            require_handshake_msg!(m, HandshakeType::ClientHello, HandshakePayload::ClientHello)?;
        trace!("we got a clienthello {:?}", client_hello);

        if !client_hello
            .compression_methods
            .contains(&Compression::Null)
        {
            return Err(illegal_param(cx.common, "client did not offer Null compression"));
        }

        if client_hello.has_duplicate_extension() {
            return Err(decode_error(cx.common, "client sent duplicate extensions"));
        }

        // A pre_shared_key extension must be the last extension.
        if client_hello.get_psk().is_some() && !client_hello.psk_offer_is_last_extension() {
            return Err(illegal_param(cx.common, "psk extension in wrong position"));
        }

        // Extract and validate the SNI hostname.
        let sni: Option<String> = match client_hello.get_sni_extension() {
            Some(sni) => match sni.get_single_hostname() {
                Some(hostname) => std::str::from_utf8(hostname)
                    .ok()
                    .filter(|name| webpki::DnsNameRef::try_from_ascii_str(name).is_ok())
                    .map(str::to_string)
                    .map(Some)
                    .ok_or_else(|| {
                        cx.common
                            .send_fatal_alert(AlertDescription::UnrecognisedName);
                        Error::PeerMisbehavedError("bad sni hostname".to_string())
                    })?,
                None => None,
            },
            None => None,
        };

        // The SNI hostname must not change over a retry.
        if self.done_retry && sni != cx.data.sni {
            return Err(illegal_param(cx.common, "sni changed after hrr"));
        }
        cx.data.sni = sni;

        // Choose the protocol version, preferring the supported_versions
        // extension and falling back to legacy_version.
        let version = match client_hello.get_versions_extension() {
            Some(versions) => {
                if versions.contains(&ProtocolVersion::TLSv1_3)
                    && self.config.supports_version(ProtocolVersion::TLSv1_3)
                {
                    ProtocolVersion::TLSv1_3
                } else if versions.contains(&ProtocolVersion::TLSv1_2)
                    && self.config.supports_version(ProtocolVersion::TLSv1_2)
                {
                    ProtocolVersion::TLSv1_2
                } else {
                    return Err(bad_version(cx.common, "TLS versions not offered"));
                }
            }
            None if client_hello.client_version.get_u16() < ProtocolVersion::TLSv1_2.get_u16() => {
                return Err(bad_version(cx.common, "client does not support TLSv1.2"));
            }
            None if !self.config.supports_version(ProtocolVersion::TLSv1_2) => {
                return Err(bad_version(cx.common, "server requires TLSv1.3"));
            }
            None => ProtocolVersion::TLSv1_2,
        };

        cx.common.negotiated_version = Some(version);

        // Signature schemes the client can verify.
        let sigschemes = client_hello
            .get_sigalgs_extension()
            .ok_or_else(|| {
                cx.common
                    .send_fatal_alert(AlertDescription::MissingExtension);
                Error::MissingExtension(ExtensionType::SignatureAlgorithms)
            })?;

        // Choose a certificate.
        let certkey = {
            let alpn: Option<Vec<&[u8]>> = client_hello
                .get_alpn_extension()
                .map(|protos| protos.iter().map(|p| p.as_ref()).collect());
            let client_hello_info = ClientHello {
                server_name: cx.data.sni.as_deref(),
                signature_schemes: sigschemes,
                alpn,
                cipher_suites: &client_hello.cipher_suites,
            };
            self.config
                .cert_resolver
                .resolve(client_hello_info)
                .ok_or_else(|| {
                    cx.common
                        .send_fatal_alert(AlertDescription::AccessDenied);
                    Error::General("no server certificate chain resolved".to_string())
                })?
        };

        // Reduce our supported ciphersuites by the certified key's algorithm.
        let suitable_suites: Vec<SupportedCipherSuite> = self
            .config
            .cipher_suites
            .iter()
            .filter(|suite| {
                suite.usable_for_signature_algorithm(certkey.key.algorithm())
            })
            .copied()
            .collect();

        let suite = suites::choose_ciphersuite_preferring_server(
            &client_hello.cipher_suites,
            &suitable_suites,
            version,
        )
        .ok_or_else(|| incompatible(cx.common, "no ciphersuites in common"))?;

        debug!("decided upon suite {:?}", suite);
        cx.common.suite = Some(suite);

        // Start handshake hash.
        let starting_hash = suite.hash_algorithm();
        let transcript = match self.transcript {
            HandshakeHashOrBuffer::Buffer(inner) => inner.start_hash(starting_hash),
            HandshakeHashOrBuffer::Hash(inner) if inner.algorithm() == starting_hash => inner,
            _ => {
                return Err(illegal_param(cx.common, "hash differed on retry"));
            }
        };

        match suite {
            Tls13(suite) => tls13::CompleteClientHelloHandling {
                config: self.config,
                transcript,
                suite,
                done_retry: self.done_retry,
            }
            .handle_client_hello(cx, certkey, &m, client_hello, sigschemes.to_vec()),
            Tls12(suite) => tls12::CompleteClientHelloHandling {
                config: self.config,
                transcript,
                suite,
                using_ems: client_hello.ems_support_offered(),
            }
            .handle_client_hello(cx, certkey, &m, client_hello, sigschemes.to_vec()),
        }
    }
}

/// Choose an ALPN protocol: server preference order wins.
pub(super) fn process_alpn(
    cx: &mut ServerContext<'_>,
    config: &ServerConfig,
    client_hello: &ClientHelloPayload,
) -> Result<(), Error> {
    if config.alpn_protocols.is_empty() {
        return Ok(());
    }

    let their_protos = match client_hello.get_alpn_extension() {
        Some(protos) => protos.to_vecs(),
        None => return Ok(()),
    };

    cx.common.alpn_protocol = config
        .alpn_protocols
        .iter()
        .find(|our| their_protos.contains(*our))
        .cloned();

    if cx.common.alpn_protocol.is_none() {
        cx.common
            .send_fatal_alert(AlertDescription::NoApplicationProtocol);
        return Err(Error::NoApplicationProtocol);
    }

    debug!("ALPN protocol is {:?}", cx.common.alpn_protocol);
    Ok(())
}

/// Work out the heartbeat permissions from the client's offer and our
/// configuration.  Returns the mode to put in our answering extension,
/// if any.
pub(super) fn process_heartbeat(
    cx: &mut ServerContext<'_>,
    config: &ServerConfig,
    client_hello: &ClientHelloPayload,
) -> Option<crate::msgs::enums::HeartbeatMode> {
    use crate::msgs::enums::HeartbeatMode;

    let client_mode = client_hello.get_heartbeat_extension()?;
    let our_mode = config.heartbeat_mode?;

    cx.common.we_may_send_heartbeat = client_mode == HeartbeatMode::PeerAllowedToSend;
    cx.common.peer_may_send_heartbeat = our_mode == HeartbeatMode::PeerAllowedToSend;
    debug!(
        "Heartbeat negotiated: we_may_send {} peer_may_send {}",
        cx.common.we_may_send_heartbeat, cx.common.peer_may_send_heartbeat
    );

    Some(our_mode)
}

/// Choose a signature scheme usable with our key from the client's
/// offer, respecting `restrict` (e.g. a TLS1.2 suite's compatible set).
pub(super) fn choose_sigscheme(
    cx: &mut ServerContext<'_>,
    certkey: &crate::sign::CertifiedKey,
    offered: &[SignatureScheme],
    restrict: Option<&[SignatureScheme]>,
) -> Result<Box<dyn crate::sign::Signer>, Error> {
    let filtered: Vec<SignatureScheme> = match restrict {
        Some(allowed) => offered
            .iter()
            .filter(|scheme| allowed.contains(*scheme))
            .cloned()
            .collect(),
        None => offered.to_vec(),
    };

    certkey
        .key
        .choose_scheme(&filtered)
        .ok_or_else(|| incompatible(cx.common, "no supported sig scheme"))
}
