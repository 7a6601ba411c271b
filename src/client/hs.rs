use crate::check::{check_message, require_handshake_msg};
use crate::conn::{CommonState, Context, State};
use crate::error::Error;
use crate::hash_hs::HandshakeHashBuffer;
use crate::key_schedule::KeyScheduleEarly;
use crate::kx;
use crate::msgs::base::Payload;
use crate::msgs::codec::{Codec, Reader};
use crate::msgs::enums::{AlertDescription, CipherSuite, Compression, ContentType, ECPointFormat,
    ExtensionType, HandshakeType, PSKKeyExchangeMode, ProtocolVersion};
use crate::msgs::handshake::{
    ClientExtension, ClientHelloPayload, ClientSessionTicket, ConvertProtocolNameList,
    HandshakeMessagePayload, HandshakePayload, HasExtensions, HelloRetryRequest, KeyShareEntry,
    ProtocolNameList, Random, SessionID,
};
use crate::msgs::message::{Message, MessagePayload};
use crate::msgs::persist;
use crate::suites::SupportedCipherSuite;
use crate::ticketer::TimeBase;
use crate::tls12::ConnectionRandoms;

use crate::client::common::{ClientHelloDetails, ServerName};
use crate::client::{tls12, tls13, ClientConfig, ClientConnectionData, StoresClientSessions};

use log::{debug, trace};

use std::sync::Arc;

pub(crate) type NextState = Box<dyn State<ClientConnectionData>>;
pub(crate) type NextStateOrError = Result<NextState, Error>;
pub(crate) type ClientContext<'a> = Context<'a, ClientConnectionData>;

fn find_session(
    server_name: &ServerName,
    config: &ClientConfig,
) -> Option<persist::ClientSessionValue> {
    let key = persist::ClientSessionKey::session_for_dns_name(server_name.as_str());
    let key_buf = key.get_encoding();

    let value = config
        .session_storage
        .get(&key_buf)
        .or_else(|| {
            debug!("No cached session for {:?}", server_name);
            None
        })?;

    let mut reader = Reader::init(&value[..]);
    let value = persist::ClientSessionValue::read(&mut reader)?;

    let time = TimeBase::now().ok()?;
    let still_valid = match &value {
        persist::ClientSessionValue::Tls12(inner) => !inner.has_expired(time),
        persist::ClientSessionValue::Tls13(inner) => !inner.has_expired(time),
    };

    if still_valid {
        Some(value)
    } else {
        None
    }
}

pub(crate) fn start_handshake(
    server_name: ServerName,
    config: Arc<ClientConfig>,
    cx: &mut ClientContext<'_>,
) -> NextStateOrError {
    let mut transcript_buffer = HandshakeHashBuffer::new();
    if config
        .client_auth_cert_resolver
        .has_certs()
    {
        transcript_buffer.set_client_auth_enabled();
    }

    let support_tls13 = config.supports_version(ProtocolVersion::TLSv1_3);

    let mut session_id: Option<SessionID> = None;
    let mut resuming_session = if config.enable_tickets {
        find_session(&server_name, &config)
    } else {
        None
    };

    let key_share = if support_tls13 {
        Some(initial_key_share(&config)?)
    } else {
        None
    };

    if let Some(persist::ClientSessionValue::Tls12(resuming)) = &mut resuming_session {
        // If we have a ticket, we use the sessionid as a signal that
        // we're doing an abbreviated handshake.  See section 3.4 in
        // RFC5077.
        if !resuming.ticket.0.is_empty() {
            resuming.set_session_id(random_session_id(&config)?);
        }
        session_id = Some(resuming.session_id);
        debug!("Resuming session");
    } else {
        debug!("Not resuming any session");
    }

    // https://tools.ietf.org/html/rfc8446#appendix-D.4
    if session_id.is_none() {
        session_id = Some(random_session_id(&config)?);
    }

    let random = {
        let mut bytes = [0u8; 32];
        config.random.fill(&mut bytes)?;
        Random(bytes)
    };

    Ok(emit_client_hello_for_retry(
        config,
        cx,
        resuming_session,
        random,
        transcript_buffer,
        ClientHelloDetails::new(),
        session_id.unwrap_or_else(SessionID::empty),
        None,
        server_name,
        key_share,
        None,
    ))
}

fn initial_key_share(config: &ClientConfig) -> Result<kx::KeyExchange, Error> {
    let group = config
        .kx_groups
        .first()
        .copied()
        .ok_or_else(|| Error::General("no kx groups configured".to_string()))?;
    kx::KeyExchange::start(group)
}

fn random_session_id(config: &ClientConfig) -> Result<SessionID, Error> {
    let mut id = [0u8; 32];
    config.random.fill(&mut id)?;
    Ok(SessionID::new(&id))
}

struct ExpectServerHello {
    config: Arc<ClientConfig>,
    resuming_session: Option<persist::ClientSessionValue>,
    server_name: ServerName,
    random: Random,
    transcript_buffer: HandshakeHashBuffer,
    early_key_schedule: Option<KeyScheduleEarly>,
    hello: ClientHelloDetails,
    offered_key_share: Option<kx::KeyExchange>,
    session_id: SessionID,
    suite: Option<SupportedCipherSuite>,
}

struct ExpectServerHelloOrHelloRetryRequest {
    next: ExpectServerHello,
}

#[allow(clippy::too_many_arguments)]
fn emit_client_hello_for_retry(
    config: Arc<ClientConfig>,
    cx: &mut ClientContext<'_>,
    mut resuming_session: Option<persist::ClientSessionValue>,
    random: Random,
    mut transcript_buffer: HandshakeHashBuffer,
    mut hello: ClientHelloDetails,
    session_id: SessionID,
    retryreq: Option<&HelloRetryRequest>,
    server_name: ServerName,
    key_share: Option<kx::KeyExchange>,
    suite: Option<SupportedCipherSuite>,
) -> NextState {
    let support_tls12 = config.supports_version(ProtocolVersion::TLSv1_2);
    let support_tls13 = config.supports_version(ProtocolVersion::TLSv1_3);

    let mut supported_versions = Vec::new();
    if support_tls13 {
        supported_versions.push(ProtocolVersion::TLSv1_3);
    }

    if support_tls12 {
        supported_versions.push(ProtocolVersion::TLSv1_2);
    }

    let mut exts = Vec::new();
    if !supported_versions.is_empty() {
        exts.push(ClientExtension::SupportedVersions(supported_versions));
    }
    if config.enable_sni {
        exts.push(ClientExtension::make_sni(server_name.as_str()));
    }
    exts.push(ClientExtension::ECPointFormats(vec![
        ECPointFormat::Uncompressed,
    ]));
    exts.push(ClientExtension::NamedGroups(
        config
            .kx_groups
            .iter()
            .map(|skxg| skxg.name)
            .collect(),
    ));
    exts.push(ClientExtension::SignatureAlgorithms(
        config
            .verifier
            .supported_verify_schemes(),
    ));
    exts.push(ClientExtension::ExtendedMasterSecretRequest);

    if config.offer_etm {
        exts.push(ClientExtension::EncryptThenMacRequest);
    }

    if let Some(mode) = config.heartbeat_mode {
        exts.push(ClientExtension::Heartbeat(mode));
        hello.offered_heartbeat_mode = Some(mode);
    }

    if let Some(key_share) = &key_share {
        debug_assert!(support_tls13);
        let key_share = KeyShareEntry::new(key_share.group(), key_share.pubkey.as_ref());
        exts.push(ClientExtension::KeyShare(vec![key_share]));
    }

    if let Some(cookie) = retryreq.and_then(HelloRetryRequest::get_cookie) {
        exts.push(ClientExtension::Cookie(cookie.clone()));
    }

    if support_tls13 && config.enable_tickets {
        // We could support PSK_KE here too. Such connections don't
        // have forward secrecy, and are similar to TLS1.2 resumption.
        let psk_modes = vec![PSKKeyExchangeMode::PSK_DHE_KE];
        exts.push(ClientExtension::PresharedKeyModes(psk_modes));
    }

    if !config.alpn_protocols.is_empty() {
        exts.push(ClientExtension::Protocols(ProtocolNameList::from_slices(
            &config
                .alpn_protocols
                .iter()
                .map(|proto| &proto[..])
                .collect::<Vec<_>>(),
        )));
    }

    // A TLS1.3 resumption is only usable if the new and previous
    // suites share a hash; check now so the binder is never built
    // on a dead offer.
    let tls13_resuming = match &resuming_session {
        Some(persist::ClientSessionValue::Tls13(inner))
            if support_tls13 && config.enable_tickets =>
        {
            let resuming_suite = config.find_cipher_suite(inner.cipher_suite);
            match (suite, resuming_suite) {
                (_, None) => None,
                (Some(selected), Some(resuming_suite))
                    if selected.hash_algorithm() != resuming_suite.hash_algorithm() =>
                {
                    None
                }
                (_, Some(resuming_suite)) => resuming_suite.tls13(),
            }
        }
        _ => None,
    };

    if tls13_resuming.is_none() && config.enable_tickets && support_tls12 {
        // If we have a ticket, include it.  Otherwise, request one.
        match &mut resuming_session {
            Some(persist::ClientSessionValue::Tls12(inner)) if !inner.ticket.0.is_empty() => {
                exts.push(ClientExtension::SessionTicket(ClientSessionTicket::Offer(
                    Payload::new(inner.ticket.0.clone()),
                )));
            }
            _ => {
                exts.push(ClientExtension::SessionTicket(ClientSessionTicket::Request));
            }
        }
    }

    // The preshared-key extension must always be last; fill the
    // offer in with a zero binder, compute the real binder over the
    // resulting truncated encoding, and patch it in.
    let psk = match (&resuming_session, tls13_resuming) {
        (Some(persist::ClientSessionValue::Tls13(inner)), Some(resuming_suite)) => {
            match TimeBase::now() {
                Ok(now) => {
                    tls13::prepare_resumption(inner, resuming_suite, now, &mut exts);
                    Some((inner, resuming_suite))
                }
                Err(_) => None,
            }
        }
        _ => None,
    };

    // Note what extensions we sent.
    hello.sent_extensions = exts
        .iter()
        .map(ClientExtension::get_type)
        .collect();

    let mut cipher_suites: Vec<_> = config
        .cipher_suites
        .iter()
        .map(|cs| cs.suite())
        .collect();
    // We don't do renegotiation at all, in fact.
    cipher_suites.push(CipherSuite::TLS_EMPTY_RENEGOTIATION_INFO_SCSV);

    let mut chp = HandshakeMessagePayload {
        typ: HandshakeType::ClientHello,
        payload: HandshakePayload::ClientHello(ClientHelloPayload {
            client_version: ProtocolVersion::TLSv1_2,
            random,
            session_id,
            cipher_suites,
            compression_methods: vec![Compression::Null],
            extensions: exts,
        }),
    };

    let early_key_schedule = psk.map(|(resuming, resuming_suite)| {
        tls13::fill_in_psk_binder(resuming, resuming_suite, &transcript_buffer, &mut chp)
    });

    let ch = Message {
        // "This value MUST be set to 0x0303 for all records generated
        //  by a TLS 1.3 implementation other than an initial ClientHello
        //  (i.e., one not generated after a HelloRetryRequest)"
        version: if retryreq.is_some() {
            ProtocolVersion::TLSv1_2
        } else {
            ProtocolVersion::TLSv1_0
        },
        payload: MessagePayload::Handshake(chp),
    };

    if retryreq.is_some() {
        // send dummy CCS to fool middleboxes prior
        // to second client hello
        tls13::emit_fake_ccs(cx.common);
    }

    trace!("Sending ClientHello {:#?}", ch);

    transcript_buffer.add_message(&ch);
    cx.common.send_msg(ch, false);

    let next = ExpectServerHello {
        config,
        resuming_session,
        server_name,
        random,
        transcript_buffer,
        early_key_schedule,
        hello,
        offered_key_share: key_share,
        session_id,
        suite,
    };

    if support_tls13 && retryreq.is_none() {
        Box::new(ExpectServerHelloOrHelloRetryRequest { next })
    } else {
        Box::new(next)
    }
}

pub(super) fn process_alpn_protocol(
    cx: &mut ClientContext<'_>,
    config: &ClientConfig,
    proto: Option<&[u8]>,
) -> Result<(), Error> {
    cx.common.alpn_protocol = proto.map(ToOwned::to_owned);

    if let Some(alpn_protocol) = &cx.common.alpn_protocol {
        if !config
            .alpn_protocols
            .contains(alpn_protocol)
        {
            return Err(illegal_param(
                cx.common,
                "server sent non-offered ALPN protocol",
            ));
        }
    }

    debug!("ALPN protocol is {:?}", cx.common.alpn_protocol);
    Ok(())
}

/// Send an illegal_parameter alert, and return the corresponding error.
pub(super) fn illegal_param(common: &mut CommonState, why: &str) -> Error {
    common.send_fatal_alert(AlertDescription::IllegalParameter);
    Error::PeerMisbehavedError(why.to_string())
}

/// RFC8446 s4.1.3: last 8 bytes of ServerHello.random when a TLS1.3-capable
/// server negotiates TLS1.2 (or below).
static DOWNGRADE_SENTINEL_TLS12: [u8; 8] = [0x44, 0x4f, 0x57, 0x4e, 0x47, 0x52, 0x44, 0x01];
static DOWNGRADE_SENTINEL_TLS11: [u8; 8] = [0x44, 0x4f, 0x57, 0x4e, 0x47, 0x52, 0x44, 0x00];

pub(crate) fn has_downgrade_sentinel(random: &Random) -> bool {
    let tail = &random.0[24..];
    tail == DOWNGRADE_SENTINEL_TLS12 || tail == DOWNGRADE_SENTINEL_TLS11
}

pub(crate) fn downgrade_sentinel_tls12() -> [u8; 8] {
    DOWNGRADE_SENTINEL_TLS12
}

impl State<ClientConnectionData> for ExpectServerHello {
    fn handle(mut self: Box<Self>, cx: &mut ClientContext<'_>, m: Message) -> NextStateOrError {
        if m.is_handshake_type(HandshakeType::HelloRetryRequest) {
            // Either a second retry, or a retry when we never offered
            // TLS1.3: both are illegal.
            return Err(illegal_param(cx.common, "unexpected HelloRetryRequest"));
        }

        let server_hello =
            require_handshake_msg!(m, HandshakeType::ServerHello, HandshakePayload::ServerHello)?;
        trace!("We got ServerHello {:#?}", server_hello);

        use crate::msgs::enums::ProtocolVersion::{TLSv1_2, TLSv1_3};
        let tls13_supported = self.config.supports_version(TLSv1_3);

        let server_version = if server_hello.legacy_version == TLSv1_2 {
            server_hello
                .get_supported_versions()
                .unwrap_or(server_hello.legacy_version)
        } else {
            server_hello.legacy_version
        };

        let version = match server_version {
            TLSv1_3 if tls13_supported => TLSv1_3,
            TLSv1_2 if self.config.supports_version(TLSv1_2) => {
                if server_hello
                    .get_supported_versions()
                    .is_some()
                {
                    return Err(illegal_param(
                        cx.common,
                        "server chose v1.2 using v1.3 extension",
                    ));
                }

                // RFC8446 s4.1.3 downgrade protection: a 1.3-capable
                // server selecting an older version marks the random.
                if tls13_supported && has_downgrade_sentinel(&server_hello.random) {
                    return Err(illegal_param(
                        cx.common,
                        "downgrade sentinel in ServerHello.random",
                    ));
                }

                TLSv1_2
            }
            _ => {
                cx.common
                    .send_fatal_alert(AlertDescription::ProtocolVersion);
                return Err(Error::PeerIncompatibleError(
                    "server does not support TLS v1.2/v1.3".to_string(),
                ));
            }
        };

        if server_hello.compression_method != Compression::Null {
            return Err(illegal_param(cx.common, "server chose non-Null compression"));
        }

        if server_hello.has_duplicate_extension() {
            cx.common
                .send_fatal_alert(AlertDescription::DecodeError);
            return Err(Error::PeerMisbehavedError(
                "server sent duplicate extensions".to_string(),
            ));
        }

        let allowed_unsolicited = [ExtensionType::RenegotiationInfo];
        if self
            .hello
            .server_sent_unsolicited_extensions(server_hello, &allowed_unsolicited)
        {
            cx.common
                .send_fatal_alert(AlertDescription::UnsupportedExtension);
            return Err(Error::PeerMisbehavedError(
                "server sent unsolicited extension".to_string(),
            ));
        }

        cx.common.negotiated_version = Some(version);

        // Extract ALPN protocol
        if !cx.common.is_tls13() {
            process_alpn_protocol(cx, &self.config, server_hello.get_alpn_protocol())?;
        }

        // If ECPointFormats extension is supplied by the server, it must contain
        // Uncompressed.  But it's allowed to be omitted.
        if let Some(point_fmts) = server_hello.get_ecpoints_extension() {
            if !point_fmts.contains(&ECPointFormat::Uncompressed) {
                cx.common
                    .send_fatal_alert(AlertDescription::HandshakeFailure);
                return Err(Error::PeerMisbehavedError(
                    "server does not support uncompressed points".to_string(),
                ));
            }
        }

        let suite = self
            .config
            .find_cipher_suite(server_hello.cipher_suite)
            .ok_or_else(|| {
                cx.common
                    .send_fatal_alert(AlertDescription::HandshakeFailure);
                Error::PeerMisbehavedError("server chose non-offered ciphersuite".to_string())
            })?;

        if version != suite.version() {
            return Err(illegal_param(
                cx.common,
                "server chose unusable ciphersuite for version",
            ));
        }

        match self.suite {
            Some(prev_suite) if prev_suite != suite => {
                return Err(illegal_param(
                    cx.common,
                    "server varied selected ciphersuite",
                ));
            }
            _ => {
                debug!("Using ciphersuite {:?}", suite);
                self.suite = Some(suite);
                cx.common.suite = Some(suite);
            }
        }

        // Start our handshake hash, and input the server-hello.
        let mut transcript = self
            .transcript_buffer
            .start_hash(suite.hash_algorithm());
        transcript.add_message(&m);

        let randoms = ConnectionRandoms::new(self.random, server_hello.random);

        // For TLS1.3, start message encryption using
        // handshake_traffic_secret.
        match suite {
            SupportedCipherSuite::Tls13(suite) => {
                let resuming_session = match self.resuming_session {
                    Some(persist::ClientSessionValue::Tls13(inner)) => Some(inner),
                    _ => None,
                };

                tls13::handle_server_hello(
                    self.config,
                    cx,
                    server_hello,
                    resuming_session,
                    self.server_name,
                    randoms,
                    suite,
                    transcript,
                    self.early_key_schedule,
                    self.hello,
                    // We always send a key share when TLS 1.3 is enabled.
                    self.offered_key_share.unwrap(),
                )
            }
            SupportedCipherSuite::Tls12(suite) => {
                let resuming_session = match self.resuming_session {
                    Some(persist::ClientSessionValue::Tls12(inner)) => Some(inner),
                    _ => None,
                };

                tls12::CompleteServerHelloHandling {
                    config: self.config,
                    resuming_session,
                    server_name: self.server_name,
                    randoms,
                    using_ems: server_hello.ems_support_acked(),
                    transcript,
                    session_id: server_hello.session_id,
                    hello: self.hello,
                }
                .handle_server_hello(cx, suite, server_hello)
            }
        }
    }
}

impl ExpectServerHelloOrHelloRetryRequest {
    fn into_expect_server_hello(self) -> NextState {
        Box::new(self.next)
    }

    fn handle_hello_retry_request(
        self,
        cx: &mut ClientContext<'_>,
        m: Message,
    ) -> NextStateOrError {
        let hrr = require_handshake_msg!(
            m,
            HandshakeType::HelloRetryRequest,
            HandshakePayload::HelloRetryRequest
        )?;
        trace!("Got HRR {:?}", hrr);

        cx.common.check_aligned_handshake()?;

        let cookie = hrr.get_cookie();
        let req_group = hrr.get_requested_key_share_group();

        // We always send a key share when TLS 1.3 is enabled.
        let offered_key_share = self.next.offered_key_share.unwrap();

        // A retry request is illegal if it contains no cookie and asks for
        // retry of a group we already sent.
        if cookie.is_none() && req_group == Some(offered_key_share.group()) {
            return Err(illegal_param(cx.common, "server requested hrr with our group"));
        }

        // Or has an empty cookie.
        if let Some(cookie) = cookie {
            if cookie.0.is_empty() {
                return Err(illegal_param(
                    cx.common,
                    "server requested hrr with empty cookie",
                ));
            }
        }

        // Or has something unrecognised
        if hrr.has_unknown_extension() {
            cx.common
                .send_fatal_alert(AlertDescription::UnsupportedExtension);
            return Err(Error::PeerIncompatibleError(
                "server sent hrr with unhandled extension".to_string(),
            ));
        }

        // Or has the same extensions more than once
        if hrr.has_duplicate_extension() {
            return Err(illegal_param(cx.common, "server send duplicate hrr extensions"));
        }

        // Or asks us to change nothing.
        if cookie.is_none() && req_group.is_none() {
            return Err(illegal_param(cx.common, "server requested hrr with no changes"));
        }

        // Or asks us to talk a protocol we didn't offer, or doesn't support
        // HRR at all.
        match hrr.get_supported_versions() {
            Some(ProtocolVersion::TLSv1_3) => {
                cx.common.negotiated_version = Some(ProtocolVersion::TLSv1_3);
            }
            _ => {
                return Err(illegal_param(
                    cx.common,
                    "server requested unsupported version in hrr",
                ));
            }
        }

        // Or asks us to use a ciphersuite we didn't offer.
        let cs = match self
            .next
            .config
            .find_cipher_suite(hrr.cipher_suite)
        {
            Some(cs) => cs,
            None => {
                return Err(illegal_param(cx.common, "server requested unsupported cs in hrr"));
            }
        };

        // HRR selects the ciphersuite.
        cx.common.suite = Some(cs);

        // This is the draft19 change where the transcript became a tree
        let transcript = self
            .next
            .transcript_buffer
            .start_hash(cs.hash_algorithm());
        let mut transcript_buffer = transcript.into_hrr_buffer();
        transcript_buffer.add_message(&m);

        let key_share = match req_group {
            Some(group) if group != offered_key_share.group() => {
                let skxg = match kx::KeyExchange::choose(group, &self.next.config.kx_groups) {
                    Some(skxg) => skxg,
                    None => {
                        return Err(illegal_param(cx.common, "server requested hrr with bad group"));
                    }
                };
                kx::KeyExchange::start(skxg)?
            }
            _ => offered_key_share,
        };

        Ok(emit_client_hello_for_retry(
            self.next.config,
            cx,
            self.next.resuming_session,
            self.next.random,
            transcript_buffer,
            self.next.hello,
            self.next.session_id,
            Some(hrr),
            self.next.server_name,
            Some(key_share),
            Some(cs),
        ))
    }
}

impl State<ClientConnectionData> for ExpectServerHelloOrHelloRetryRequest {
    fn handle(self: Box<Self>, cx: &mut ClientContext<'_>, m: Message) -> NextStateOrError {
        check_message(
            &m,
            &[ContentType::Handshake],
            &[HandshakeType::ServerHello, HandshakeType::HelloRetryRequest],
        )?;
        if m.is_handshake_type(HandshakeType::ServerHello) {
            self.into_expect_server_hello()
                .handle(cx, m)
        } else {
            self.handle_hello_retry_request(cx, m)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downgrade_sentinel_detection() {
        let mut random = [7u8; 32];
        assert!(!has_downgrade_sentinel(&Random(random)));

        random[24..].copy_from_slice(&downgrade_sentinel_tls12());
        assert!(has_downgrade_sentinel(&Random(random)));

        random[31] = 0x00;
        assert!(has_downgrade_sentinel(&Random(random)));
    }
}
