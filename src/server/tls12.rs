use crate::check::{check_message, require_handshake_msg, require_handshake_msg_move};
use crate::conn::{CommonState, State};
use crate::error::Error;
use crate::hash_hs::HandshakeHash;
use crate::kx;
use crate::msgs::base::{Payload, PayloadU8};
use crate::msgs::ccs::ChangeCipherSpecPayload;
use crate::msgs::codec::{Codec, Reader};
use crate::msgs::enums::{
    AlertDescription, ClientCertificateType, Compression, ContentType, ECPointFormat,
    HandshakeType, ProtocolVersion, SignatureScheme,
};
use crate::msgs::handshake::{
    CertificatePayload, CertificateRequestPayload, ClientHelloPayload, ClientSessionTicket,
    DigitallySignedStruct, EcdheServerKeyExchange, HandshakeMessagePayload, HandshakePayload,
    HasExtensions, NewSessionTicketPayload, Random, ServerEcdhParams, ServerExtension,
    ServerHelloPayload, ServerKeyExchangePayload, SessionID,
};
use crate::msgs::message::{Message, MessagePayload};
use crate::msgs::persist::ServerSessionValue;
use crate::sign::CertifiedKey;
use crate::suites::Tls12CipherSuite;
use crate::ticketer::ProducesTickets;
use crate::tls12::{ConnectionRandoms, ConnectionSecrets, Side};
use crate::verify;

use crate::server::hs::{
    choose_sigscheme, illegal_param, incompatible, process_alpn, process_heartbeat,
    NextStateOrError, ServerContext,
};
use crate::server::{ServerConfig, ServerConnectionData, StoresServerSessions};

use crate::client::hs::downgrade_sentinel_tls12;

use log::{debug, trace, warn};

use std::sync::Arc;

pub(super) struct CompleteClientHelloHandling {
    pub(super) config: Arc<ServerConfig>,
    pub(super) transcript: HandshakeHash,
    pub(super) suite: &'static Tls12CipherSuite,
    pub(super) using_ems: bool,
}

impl CompleteClientHelloHandling {
    pub(super) fn handle_client_hello(
        mut self,
        cx: &mut ServerContext<'_>,
        server_key: Arc<CertifiedKey>,
        chm: &Message,
        client_hello: &ClientHelloPayload,
        sigschemes_ext: Vec<SignatureScheme>,
    ) -> NextStateOrError {
        if self.config.require_ems && !self.using_ems {
            return Err(incompatible(
                cx.common,
                "client did not offer extended master secret",
            ));
        }

        let sigschemes = self
            .suite
            .resolve_sig_schemes(&sigschemes_ext);
        if sigschemes.is_empty() {
            return Err(incompatible(cx.common, "no supported sig scheme"));
        }

        // If the client supplied point formats, they must include
        // uncompressed.
        if let Some(crate::msgs::handshake::ClientExtension::ECPointFormats(formats)) =
            client_hello.find_extension(crate::msgs::enums::ExtensionType::ECPointFormats)
        {
            if !formats.contains(&ECPointFormat::Uncompressed) {
                return Err(illegal_param(
                    cx.common,
                    "client does not support uncompressed points",
                ));
            }
        }

        let group = self
            .config
            .kx_groups
            .iter()
            .find(|skxg| {
                client_hello
                    .get_namedgroups_extension()
                    .map(|groups| groups.contains(&skxg.name))
                    .unwrap_or(false)
            })
            .copied()
            .ok_or_else(|| incompatible(cx.common, "no kx group overlap with client"))?;

        self.transcript.add_message(chm);

        process_alpn(cx, &self.config, client_hello)?;
        let hb_mode = process_heartbeat(cx, &self.config, client_hello);

        let randoms = {
            let mut server_random = [0u8; 32];
            self.config.random.fill(&mut server_random)?;

            // RFC8446 s4.1.3: a server negotiating TLS1.2 while also
            // supporting TLS1.3 marks its random so capable clients can
            // detect an active downgrade.
            if self
                .config
                .supports_version(ProtocolVersion::TLSv1_3)
            {
                server_random[24..].copy_from_slice(&downgrade_sentinel_tls12());
            }

            ConnectionRandoms::new(client_hello.random, Random(server_random))
        };

        // Does the client offer a ticket we issued earlier?
        let mut resumedata = None;

        if let Some(ClientSessionTicket::Offer(ticket)) = client_hello
            .get_ticket_extension()
            .and_then(|ext| match ext {
                crate::msgs::handshake::ClientExtension::SessionTicket(offer) => Some(offer),
                _ => None,
            })
        {
            debug!("Ticket received");

            if let Some(plain) = self.config.ticketer.decrypt(&ticket.0) {
                resumedata = ServerSessionValue::read_bytes(&plain);
            } else {
                debug!("Ticket didn't decrypt");
            }
        }

        // Are we offering a ticket in return?
        let offers_ticket = client_hello.get_ticket_extension().is_some();
        let send_ticket = offers_ticket && self.config.ticketer.enabled();

        // If not, maybe the client has a stored session to resume.
        if resumedata.is_none() && !client_hello.session_id.is_empty() {
            resumedata = self
                .config
                .session_storage
                .get(client_hello.session_id.as_ref())
                .and_then(|x| ServerSessionValue::read_bytes(&x));
        }

        // A resumption must not change the protocol parameters.
        let resumedata = resumedata.filter(|resume| {
            resume.version == ProtocolVersion::TLSv1_2
                && resume.cipher_suite == self.suite.common.suite
                && resume.extended_ms == self.using_ems
                && same_dns_name_or_both_none(resume.sni.as_ref(), cx.data.sni.as_ref())
        });

        if let Some(resume) = resumedata {
            return self.start_resumption(cx, client_hello, &randoms, resume, hb_mode);
        }

        // -- Full handshake --
        // Generate a fresh session id to cache this session under,
        // unless the ticket machinery makes that pointless.
        let session_id = if send_ticket {
            SessionID::empty()
        } else {
            let mut id = [0u8; 32];
            self.config.random.fill(&mut id)?;
            SessionID::new(&id)
        };

        self.emit_server_hello(
            cx,
            session_id,
            &randoms,
            send_ticket,
            client_hello,
            hb_mode,
        );
        self.emit_certificate(cx, &server_key);
        let kx = self.emit_server_kx(cx, &sigschemes, group, &server_key, &randoms)?;
        let doing_client_auth = self.emit_certificate_req(cx)?;
        self.emit_server_hello_done(cx);

        if doing_client_auth {
            Ok(Box::new(ExpectCertificate {
                config: self.config,
                transcript: self.transcript,
                randoms,
                session_id,
                suite: self.suite,
                using_ems: self.using_ems,
                server_kx: kx,
                send_ticket,
            }))
        } else {
            Ok(Box::new(ExpectClientKx {
                config: self.config,
                transcript: self.transcript,
                randoms,
                session_id,
                suite: self.suite,
                using_ems: self.using_ems,
                server_kx: kx,
                client_cert: None,
                send_ticket,
            }))
        }
    }

    fn start_resumption(
        mut self,
        cx: &mut ServerContext<'_>,
        client_hello: &ClientHelloPayload,
        randoms: &ConnectionRandoms,
        resumedata: ServerSessionValue,
        hb_mode: Option<crate::msgs::enums::HeartbeatMode>,
    ) -> NextStateOrError {
        debug!("Resuming session");

        // The client's session_id is echoed to signal resumption.
        let session_id = client_hello.session_id;
        self.emit_server_hello(cx, session_id, randoms, false, client_hello, hb_mode);

        let secrets = ConnectionSecrets::new_resume(
            randoms,
            self.suite,
            &resumedata.master_secret.0,
        );
        let (dec, enc) = secrets.make_cipher_pair(Side::Server);
        cx.common
            .record_layer
            .prepare_message_decrypter(dec);
        cx.common
            .record_layer
            .prepare_message_encrypter(enc);

        cx.common.peer_certificates = resumedata.client_cert_chain;

        emit_ccs(cx.common);
        cx.common.record_layer.start_encrypting();
        emit_finished(&secrets, &mut self.transcript, cx.common);

        Ok(Box::new(ExpectCcs {
            config: self.config,
            secrets,
            transcript: self.transcript,
            session_id: SessionID::empty(),
            using_ems: self.using_ems,
            resuming: true,
            send_ticket: false,
        }))
    }

    fn emit_server_hello(
        &mut self,
        cx: &mut ServerContext<'_>,
        session_id: SessionID,
        randoms: &ConnectionRandoms,
        send_ticket: bool,
        client_hello: &ClientHelloPayload,
        hb_mode: Option<crate::msgs::enums::HeartbeatMode>,
    ) {
        let mut extensions = Vec::new();

        // Renegotiation is not supported; announce that fact.
        if client_hello
            .cipher_suites
            .contains(&crate::msgs::enums::CipherSuite::TLS_EMPTY_RENEGOTIATION_INFO_SCSV)
        {
            extensions.push(ServerExtension::RenegotiationInfo(PayloadU8::empty()));
        }

        if cx.data.sni.is_some() {
            extensions.push(ServerExtension::ServerNameAck);
        }

        if self.using_ems {
            extensions.push(ServerExtension::ExtendedMasterSecretAck);
        }

        // encrypt_then_mac is not acknowledged: every shipped suite is
        // an AEAD, for which RFC7366 s3 says the extension changes
        // nothing.

        if send_ticket {
            extensions.push(ServerExtension::SessionTicketAck);
        }

        if let Some(protocol) = cx.common.alpn_protocol.clone() {
            extensions.push(ServerExtension::make_alpn(&[&protocol]));
        }

        if let Some(mode) = hb_mode {
            extensions.push(ServerExtension::Heartbeat(mode));
        }

        extensions.push(ServerExtension::ECPointFormats(vec![
            ECPointFormat::Uncompressed,
        ]));

        let sh = Message {
            version: ProtocolVersion::TLSv1_2,
            payload: MessagePayload::Handshake(HandshakeMessagePayload {
                typ: HandshakeType::ServerHello,
                payload: HandshakePayload::ServerHello(ServerHelloPayload {
                    legacy_version: ProtocolVersion::TLSv1_2,
                    random: Random(randoms.server),
                    session_id,
                    cipher_suite: self.suite.common.suite,
                    compression_method: Compression::Null,
                    extensions,
                }),
            }),
        };

        trace!("sending server hello {:?}", sh);
        self.transcript.add_message(&sh);
        cx.common.send_msg(sh, false);
    }

    fn emit_certificate(&mut self, cx: &mut ServerContext<'_>, server_key: &CertifiedKey) {
        let c = Message {
            version: ProtocolVersion::TLSv1_2,
            payload: MessagePayload::Handshake(HandshakeMessagePayload {
                typ: HandshakeType::Certificate,
                payload: HandshakePayload::Certificate(server_key.cert.clone()),
            }),
        };

        self.transcript.add_message(&c);
        cx.common.send_msg(c, false);
    }

    fn emit_server_kx(
        &mut self,
        cx: &mut ServerContext<'_>,
        sigschemes: &[SignatureScheme],
        skxg: &'static kx::SupportedKxGroup,
        server_key: &CertifiedKey,
        randoms: &ConnectionRandoms,
    ) -> Result<kx::KeyExchange, Error> {
        let kx = kx::KeyExchange::start(skxg)?;
        let secdh = ServerEcdhParams::new(skxg.name, kx.pubkey.as_ref());

        let mut msg = Vec::new();
        msg.extend(randoms.client);
        msg.extend(randoms.server);
        secdh.encode(&mut msg);

        let signer = choose_sigscheme(cx, server_key, sigschemes, None)?;
        let sigscheme = signer.scheme();
        let sig = signer.sign(&msg)?;

        let skx = ServerKeyExchangePayload::Ecdhe(EcdheServerKeyExchange {
            params: secdh,
            dss: DigitallySignedStruct::new(sigscheme, sig),
        });

        let m = Message {
            version: ProtocolVersion::TLSv1_2,
            payload: MessagePayload::Handshake(HandshakeMessagePayload {
                typ: HandshakeType::ServerKeyExchange,
                payload: HandshakePayload::ServerKeyExchange(skx),
            }),
        };

        self.transcript.add_message(&m);
        cx.common.send_msg(m, false);
        Ok(kx)
    }

    fn emit_certificate_req(&mut self, cx: &mut ServerContext<'_>) -> Result<bool, Error> {
        let client_auth = &self.config.verifier;

        if !client_auth.offer_client_auth() {
            return Ok(false);
        }

        let verify_schemes = client_auth.supported_verify_schemes();

        let cr = CertificateRequestPayload {
            certtypes: vec![
                ClientCertificateType::RSASign,
                ClientCertificateType::ECDSASign,
            ],
            sigschemes: verify_schemes,
            canames: Vec::new(),
        };

        let m = Message {
            version: ProtocolVersion::TLSv1_2,
            payload: MessagePayload::Handshake(HandshakeMessagePayload {
                typ: HandshakeType::CertificateRequest,
                payload: HandshakePayload::CertificateRequest(cr),
            }),
        };

        trace!("Sending CertificateRequest {:?}", m);
        self.transcript.add_message(&m);
        cx.common.send_msg(m, false);
        Ok(true)
    }

    fn emit_server_hello_done(&mut self, cx: &mut ServerContext<'_>) {
        let m = Message {
            version: ProtocolVersion::TLSv1_2,
            payload: MessagePayload::Handshake(HandshakeMessagePayload {
                typ: HandshakeType::ServerHelloDone,
                payload: HandshakePayload::ServerHelloDone,
            }),
        };

        self.transcript.add_message(&m);
        cx.common.send_msg(m, false);
    }
}

fn same_dns_name_or_both_none(a: Option<&PayloadU8>, b: Option<&String>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.0 == b.as_bytes(),
        (None, None) => true,
        _ => false,
    }
}

// --- Process client's Certificate for client auth ---
struct ExpectCertificate {
    config: Arc<ServerConfig>,
    transcript: HandshakeHash,
    randoms: ConnectionRandoms,
    session_id: SessionID,
    suite: &'static Tls12CipherSuite,
    using_ems: bool,
    server_kx: kx::KeyExchange,
    send_ticket: bool,
}

impl State<ServerConnectionData> for ExpectCertificate {
    fn handle(mut self: Box<Self>, cx: &mut ServerContext<'_>, m: Message) -> NextStateOrError {
        self.transcript.add_message(&m);
        let cert_chain = require_handshake_msg_move!(
            m,
            HandshakeType::Certificate,
            HandshakePayload::Certificate
        )?;

        // If we can't determine if the auth is mandatory, abort
        let mandatory = self.config.verifier.client_auth_mandatory();

        trace!("certs {:?}", cert_chain);

        let client_cert = match cert_chain.len() {
            0 if mandatory => {
                cx.common
                    .send_fatal_alert(AlertDescription::CertificateRequired);
                return Err(Error::NoCertificatesPresented);
            }
            0 => {
                debug!("client auth requested but no certificate supplied");
                self.transcript.abandon_client_auth();
                None
            }
            _ => Some(cert_chain),
        };

        Ok(Box::new(ExpectClientKx {
            config: self.config,
            transcript: self.transcript,
            randoms: self.randoms,
            session_id: self.session_id,
            suite: self.suite,
            using_ems: self.using_ems,
            server_kx: self.server_kx,
            client_cert,
            send_ticket: self.send_ticket,
        }))
    }
}

// --- Process client's KeyExchange ---
struct ExpectClientKx {
    config: Arc<ServerConfig>,
    transcript: HandshakeHash,
    randoms: ConnectionRandoms,
    session_id: SessionID,
    suite: &'static Tls12CipherSuite,
    using_ems: bool,
    server_kx: kx::KeyExchange,
    client_cert: Option<CertificatePayload>,
    send_ticket: bool,
}

impl State<ServerConnectionData> for ExpectClientKx {
    fn handle(mut self: Box<Self>, cx: &mut ServerContext<'_>, m: Message) -> NextStateOrError {
        let client_kx = require_handshake_msg!(
            m,
            HandshakeType::ClientKeyExchange,
            HandshakePayload::ClientKeyExchange
        )?;
        self.transcript.add_message(&m);
        let ems_seed = self
            .using_ems
            .then(|| self.transcript.get_current_hash());

        // Complete the key exchange: our ephemeral key against
        // the client's public point.
        let peer_kx_params = {
            let mut rd = Reader::init(&client_kx.0);
            let ecpoint = PayloadU8::read(&mut rd).ok_or_else(|| {
                cx.common
                    .send_fatal_alert(AlertDescription::DecodeError);
                Error::CorruptMessagePayload(ContentType::Handshake)
            })?;

            if rd.any_left() {
                cx.common
                    .send_fatal_alert(AlertDescription::DecodeError);
                return Err(Error::CorruptMessagePayload(ContentType::Handshake));
            }

            ecpoint.0
        };

        let kxd = self.server_kx.complete(&peer_kx_params)?;

        let secrets = match ems_seed {
            Some(seed) => ConnectionSecrets::new_ems(
                &self.randoms,
                seed.as_ref(),
                self.suite,
                &kxd.shared_secret,
            ),
            None => ConnectionSecrets::new(&self.randoms, self.suite, &kxd.shared_secret),
        };

        let (dec, enc) = secrets.make_cipher_pair(Side::Server);
        cx.common
            .record_layer
            .prepare_message_decrypter(dec);
        cx.common
            .record_layer
            .prepare_message_encrypter(enc);

        if let Some(client_cert) = self.client_cert {
            Ok(Box::new(ExpectCertificateVerify {
                config: self.config,
                secrets,
                transcript: self.transcript,
                session_id: self.session_id,
                using_ems: self.using_ems,
                client_cert,
                send_ticket: self.send_ticket,
            }))
        } else {
            Ok(Box::new(ExpectCcs {
                config: self.config,
                secrets,
                transcript: self.transcript,
                session_id: self.session_id,
                using_ems: self.using_ems,
                resuming: false,
                send_ticket: self.send_ticket,
            }))
        }
    }
}

// --- Process client's certificate proof ---
struct ExpectCertificateVerify {
    config: Arc<ServerConfig>,
    secrets: ConnectionSecrets,
    transcript: HandshakeHash,
    session_id: SessionID,
    using_ems: bool,
    client_cert: CertificatePayload,
    send_ticket: bool,
}

impl State<ServerConnectionData> for ExpectCertificateVerify {
    fn handle(mut self: Box<Self>, cx: &mut ServerContext<'_>, m: Message) -> NextStateOrError {
        let rc = {
            let sig = require_handshake_msg!(
                m,
                HandshakeType::CertificateVerify,
                HandshakePayload::CertificateVerify
            )?;

            match self.transcript.take_handshake_buf() {
                Some(msgs) => {
                    let (end_entity, intermediates) = self
                        .client_cert
                        .split_first()
                        .ok_or(Error::NoCertificatesPresented)?;
                    let now = std::time::SystemTime::now();
                    self.config
                        .verifier
                        .verify_client_cert(end_entity, intermediates, now)
                        .and_then(|_| {
                            self.config
                                .verifier
                                .verify_tls12_signature(&msgs, end_entity, sig)
                        })
                }
                None => {
                    // This should be unreachable; the handshake buffer
                    // is retained whenever client auth is offered.
                    Err(Error::General("client auth transcript unavailable".to_string()))
                }
            }
        };

        if let Err(e) = rc {
            cx.common
                .send_fatal_alert(AlertDescription::BadCertificate);
            return Err(e);
        }

        trace!("client CertificateVerify OK");
        cx.common.peer_certificates = Some(self.client_cert);

        self.transcript.add_message(&m);
        Ok(Box::new(ExpectCcs {
            config: self.config,
            secrets: self.secrets,
            transcript: self.transcript,
            session_id: self.session_id,
            using_ems: self.using_ems,
            resuming: false,
            send_ticket: self.send_ticket,
        }))
    }
}

// --- Process client's ChangeCipherSpec ---
struct ExpectCcs {
    config: Arc<ServerConfig>,
    secrets: ConnectionSecrets,
    transcript: HandshakeHash,
    session_id: SessionID,
    using_ems: bool,
    resuming: bool,
    send_ticket: bool,
}

impl State<ServerConnectionData> for ExpectCcs {
    fn handle(self: Box<Self>, cx: &mut ServerContext<'_>, m: Message) -> NextStateOrError {
        check_message(&m, &[ContentType::ChangeCipherSpec], &[])?;

        // CCS should not be received interleaved with fragmented handshake-level
        // message.
        cx.common.check_aligned_handshake()?;

        cx.common.record_layer.start_decrypting();

        Ok(Box::new(ExpectFinished {
            config: self.config,
            secrets: self.secrets,
            transcript: self.transcript,
            session_id: self.session_id,
            using_ems: self.using_ems,
            resuming: self.resuming,
            send_ticket: self.send_ticket,
        }))
    }
}

// --- Process client's Finished ---
fn get_server_session_value(
    transcript_sni: Option<&str>,
    secrets: &ConnectionSecrets,
    using_ems: bool,
    cx: &ServerContext<'_>,
) -> ServerSessionValue {
    ServerSessionValue::new(
        transcript_sni,
        ProtocolVersion::TLSv1_2,
        secrets.suite().common.suite,
        secrets.get_master_secret(),
        using_ems,
        cx.common.peer_certificates.clone(),
        cx.common.alpn_protocol.clone(),
    )
}

fn emit_ticket(
    secrets: &ConnectionSecrets,
    using_ems: bool,
    cx: &mut ServerContext<'_>,
    ticketer: &dyn ProducesTickets,
    transcript: &mut HandshakeHash,
) {
    // If we can't produce a ticket for some reason, we can't
    // send a new session ticket... but the client expects one
    // (we acked the extension), so send an empty one.
    let plain = get_server_session_value(cx.data.sni.as_deref(), secrets, using_ems, cx)
        .get_encoding();

    let (ticket, lifetime) = match ticketer.encrypt(&plain) {
        Some(ticket) => (ticket, ticketer.lifetime()),
        None => (Vec::new(), 0),
    };

    let m = Message {
        version: ProtocolVersion::TLSv1_2,
        payload: MessagePayload::Handshake(HandshakeMessagePayload {
            typ: HandshakeType::NewSessionTicket,
            payload: HandshakePayload::NewSessionTicket(NewSessionTicketPayload::new(
                lifetime, ticket,
            )),
        }),
    };

    transcript.add_message(&m);
    cx.common.send_msg(m, false);
}

fn emit_ccs(common: &mut CommonState) {
    let m = Message {
        version: ProtocolVersion::TLSv1_2,
        payload: MessagePayload::ChangeCipherSpec(ChangeCipherSpecPayload {}),
    };

    common.send_msg(m, false);
}

fn emit_finished(
    secrets: &ConnectionSecrets,
    transcript: &mut HandshakeHash,
    common: &mut CommonState,
) {
    let vh = transcript.get_current_hash();
    let verify_data = secrets.server_verify_data(vh.as_ref());
    let verify_data_payload = Payload::new(verify_data);

    let f = Message {
        version: ProtocolVersion::TLSv1_2,
        payload: MessagePayload::Handshake(HandshakeMessagePayload {
            typ: HandshakeType::Finished,
            payload: HandshakePayload::Finished(verify_data_payload),
        }),
    };

    transcript.add_message(&f);
    common.send_msg(f, true);
}

struct ExpectFinished {
    config: Arc<ServerConfig>,
    secrets: ConnectionSecrets,
    transcript: HandshakeHash,
    session_id: SessionID,
    using_ems: bool,
    resuming: bool,
    send_ticket: bool,
}

impl State<ServerConnectionData> for ExpectFinished {
    fn handle(mut self: Box<Self>, cx: &mut ServerContext<'_>, m: Message) -> NextStateOrError {
        let finished =
            require_handshake_msg!(m, HandshakeType::Finished, HandshakePayload::Finished)?;

        cx.common.check_aligned_handshake()?;

        let vh = self.transcript.get_current_hash();
        let expect_verify_data = self.secrets.client_verify_data(vh.as_ref());

        let _fin_verified = verify::check_verify_data(&expect_verify_data, &finished.0)
            .map_err(|_| {
                cx.common
                    .send_fatal_alert(AlertDescription::DecryptError);
                warn!("Finished wrong");
                Error::DecryptError
            })?;

        // Save session, perhaps.
        if !self.resuming && !self.session_id.is_empty() {
            let value = get_server_session_value(
                cx.data.sni.as_deref(),
                &self.secrets,
                self.using_ems,
                cx,
            );

            let worked = self
                .config
                .session_storage
                .put(self.session_id.as_ref().to_vec(), value.get_encoding());
            if worked {
                debug!("Session saved");
            } else {
                debug!("Session not saved");
            }
        }

        // Send our CCS and Finished.
        self.transcript.add_message(&m);
        if !self.resuming {
            if self.send_ticket {
                emit_ticket(
                    &self.secrets,
                    self.using_ems,
                    cx,
                    self.config.ticketer.as_ref(),
                    &mut self.transcript,
                );
            }
            emit_ccs(cx.common);
            cx.common.record_layer.start_encrypting();
            emit_finished(&self.secrets, &mut self.transcript, cx.common);
        }

        cx.common.start_traffic();
        Ok(Box::new(ExpectTraffic {
            _secrets: self.secrets,
        }))
    }
}

// --- Process traffic ---
struct ExpectTraffic {
    _secrets: ConnectionSecrets,
}

impl State<ServerConnectionData> for ExpectTraffic {
    fn handle(self: Box<Self>, cx: &mut ServerContext<'_>, m: Message) -> NextStateOrError {
        match m.payload {
            MessagePayload::ApplicationData(payload) => cx
                .common
                .take_received_plaintext(payload),
            payload => {
                return Err(crate::check::inappropriate_message(
                    &Message {
                        version: m.version,
                        payload,
                    },
                    &[ContentType::ApplicationData],
                ));
            }
        }

        Ok(self)
    }
}
