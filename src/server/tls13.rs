use crate::check::require_handshake_msg;
use crate::cipher;
use crate::conn::State;
use crate::error::Error;
use crate::hash_hs::HandshakeHash;
use crate::key_schedule::{
    KeyScheduleEarly, KeyScheduleHandshake, KeyScheduleTraffic,
    KeyScheduleTrafficWithClientFinishedPending,
};
use crate::kx;
use crate::msgs::base::{Payload, PayloadU8};
use crate::msgs::ccs::ChangeCipherSpecPayload;
use crate::msgs::codec::Codec;
use crate::msgs::enums::{
    AlertDescription, ContentType, ExtensionType, HandshakeType, KeyUpdateRequest,
    ProtocolVersion, SignatureScheme,
};
use crate::msgs::handshake::{
    CertReqExtension, CertificatePayloadTls13, CertificateRequestPayloadTls13, ClientHelloPayload,
    DigitallySignedStruct, HandshakeMessagePayload, HandshakePayload, HelloRetryExtension,
    HelloRetryRequest, KeyShareEntry, NewSessionTicketPayloadTls13, Random, ServerExtension,
    ServerHelloPayload, SessionID,
};
use crate::msgs::message::{Message, MessagePayload};
use crate::msgs::persist::ServerSessionValue;
use crate::rand;
use crate::sign::CertifiedKey;
use crate::suites::Tls13CipherSuite;
use crate::ticketer::ProducesTickets;
use crate::verify;

use crate::server::hs::{
    self, choose_sigscheme, decode_error, illegal_param, incompatible, process_alpn,
    process_heartbeat, NextStateOrError, ServerContext,
};
use crate::server::{ServerConfig, ServerConnectionData};

use log::{debug, trace, warn};

use std::sync::Arc;

pub(super) struct CompleteClientHelloHandling {
    pub(super) config: Arc<ServerConfig>,
    pub(super) transcript: HandshakeHash,
    pub(super) suite: &'static Tls13CipherSuite,
    pub(super) done_retry: bool,
}

impl CompleteClientHelloHandling {
    fn check_binder(
        &self,
        chm: &Message,
        psk: &[u8],
        binder: &[u8],
    ) -> bool {
        let binder_plaintext = match &chm.payload {
            MessagePayload::Handshake(hmp) => hmp.get_encoding_for_binder_signing(),
            _ => unreachable!(),
        };

        let handshake_hash = self
            .transcript
            .get_hash_given(&binder_plaintext);

        let key_schedule = KeyScheduleEarly::new(self.suite, psk);
        let real_binder =
            key_schedule.resumption_psk_binder_key_and_sign_verify_data(handshake_hash.as_ref());

        ring::constant_time::verify_slices_are_equal(&real_binder, binder).is_ok()
    }

    pub(super) fn handle_client_hello(
        mut self,
        cx: &mut ServerContext<'_>,
        server_key: Arc<CertifiedKey>,
        chm: &Message,
        client_hello: &ClientHelloPayload,
        sigschemes_ext: Vec<SignatureScheme>,
    ) -> NextStateOrError {
        let sigschemes: Vec<SignatureScheme> = sigschemes_ext
            .iter()
            .cloned()
            .filter(SignatureScheme::supported_in_tls13)
            .collect();

        if sigschemes.is_empty() {
            return Err(incompatible(cx.common, "no supported sig scheme"));
        }

        let shares_ext = client_hello
            .get_keyshare_extension()
            .ok_or_else(|| {
                cx.common
                    .send_fatal_alert(AlertDescription::MissingExtension);
                Error::MissingExtension(ExtensionType::KeyShare)
            })?;

        if client_hello.has_keyshare_extension_with_duplicates() {
            return Err(illegal_param(cx.common, "client sent duplicate keyshares"));
        }

        let groups_ext = client_hello
            .get_namedgroups_extension()
            .ok_or_else(|| {
                cx.common
                    .send_fatal_alert(AlertDescription::MissingExtension);
                Error::MissingExtension(ExtensionType::EllipticCurves)
            })?;

        // Choose our favoured group from the client's key shares.
        let chosen_share = self
            .config
            .kx_groups
            .iter()
            .find_map(|group| {
                shares_ext
                    .iter()
                    .find(|share| share.group == group.name)
            });

        let chosen_share = match chosen_share {
            Some(share) => share,
            None => {
                // We don't have a suitable key share.  Choose a suitable group and
                // send a HelloRetryRequest.
                let retry_group_maybe = self
                    .config
                    .kx_groups
                    .iter()
                    .find(|group| groups_ext.contains(&group.name))
                    .copied();

                self.transcript.add_message(chm);

                if let Some(group) = retry_group_maybe {
                    if self.done_retry {
                        return Err(illegal_param(cx.common, "did not follow retry request"));
                    }

                    emit_hello_retry_request(
                        &mut self.transcript,
                        self.suite,
                        cx,
                        group.name,
                        client_hello.session_id,
                    );

                    return Ok(Box::new(hs::ExpectClientHello::with_hash(
                        self.config,
                        self.transcript,
                    )));
                }

                return Err(incompatible(cx.common, "no kx group overlap with client"));
            }
        };

        // -- Consider PSK resumption --
        // If the client offers a ticket we can decrypt and its binder
        // verifies, resume.  A bad binder is always fatal.
        let mut chosen_psk_index = None;
        let mut resumedata = None;

        if let Some(psk_offer) = client_hello.get_psk() {
            if !client_hello.psk_mode_offered(crate::msgs::enums::PSKKeyExchangeMode::PSK_DHE_KE) {
                debug!("Client unwilling to resume, DHE_KE not offered");
            } else {
                if psk_offer.binders.is_empty() {
                    return Err(decode_error(cx.common, "psk extension missing binder"));
                }

                if psk_offer.binders.len() != psk_offer.identities.len() {
                    return Err(illegal_param(
                        cx.common,
                        "psk extension mismatched ids/binders",
                    ));
                }

                for (i, psk_id) in psk_offer.identities.iter().enumerate() {
                    let maybe_resume = self
                        .config
                        .ticketer
                        .decrypt(&psk_id.identity.0)
                        .and_then(|plain| ServerSessionValue::read_bytes(&plain));

                    let resume = match maybe_resume {
                        Some(resume)
                            if resume.version == ProtocolVersion::TLSv1_3
                                && can_resume(self.suite, &self.config, &resume) =>
                        {
                            resume
                        }
                        _ => continue,
                    };

                    if !self.check_binder(
                        chm,
                        &resume.master_secret.0,
                        psk_offer.binders[i].as_ref(),
                    ) {
                        cx.common
                            .send_fatal_alert(AlertDescription::DecryptError);
                        return Err(Error::PeerMisbehavedError(
                            "client sent wrong binder".to_string(),
                        ));
                    }

                    chosen_psk_index = Some(i);
                    resumedata = Some(resume);
                    break;
                }
            }
        }

        self.transcript.add_message(chm);

        process_alpn(cx, &self.config, client_hello)?;
        let hb_mode = process_heartbeat(cx, &self.config, client_hello);

        // Start key exchange with the group in the chosen share.
        let skxg = kx::KeyExchange::choose(chosen_share.group, &self.config.kx_groups)
            .ok_or_else(|| Error::General("no kx group overlap".to_string()))?;
        let kx = kx::KeyExchange::start(skxg)?;

        let mut extensions = Vec::new();
        extensions.push(ServerExtension::KeyShare(KeyShareEntry::new(
            chosen_share.group,
            kx.pubkey.as_ref(),
        )));
        extensions.push(ServerExtension::SupportedVersions(ProtocolVersion::TLSv1_3));

        if let Some(psk_index) = chosen_psk_index {
            extensions.push(ServerExtension::PresharedKey(psk_index as u16));
        }

        let mut random_bytes = [0u8; 32];
        self.config.random.fill(&mut random_bytes)?;

        let sh = Message {
            version: ProtocolVersion::TLSv1_2,
            payload: MessagePayload::Handshake(HandshakeMessagePayload {
                typ: HandshakeType::ServerHello,
                payload: HandshakePayload::ServerHello(ServerHelloPayload {
                    legacy_version: ProtocolVersion::TLSv1_2,
                    random: Random(random_bytes),
                    session_id: client_hello.session_id,
                    cipher_suite: self.suite.common.suite,
                    compression_method: crate::msgs::enums::Compression::Null,
                    extensions,
                }),
            }),
        };

        trace!("sending server hello {:?}", sh);
        self.transcript.add_message(&sh);
        cx.common.send_msg(sh, false);

        // Middlebox compatibility: a server sends a bare CCS directly
        // after its ServerHello.
        emit_fake_ccs(cx);

        // Complete the key exchange and install handshake protection.
        let kxr = kx.complete(&chosen_share.payload.0)?;

        let key_schedule = match &resumedata {
            Some(resume) => KeyScheduleEarly::new(self.suite, &resume.master_secret.0)
                .into_handshake(&kxr.shared_secret),
            None => KeyScheduleHandshake::start(self.suite, &kxr.shared_secret),
        };

        cx.common.check_aligned_handshake()?;

        let hs_hash = self.transcript.get_current_hash();
        let mut key_schedule = key_schedule;
        let client_secret = key_schedule.client_handshake_traffic_secret(hs_hash.as_ref());
        let server_secret = key_schedule.server_handshake_traffic_secret(hs_hash.as_ref());

        cx.common
            .record_layer
            .set_message_encrypter(cipher::new_tls13_write(self.suite, &server_secret));
        cx.common
            .record_layer
            .set_message_decrypter(cipher::new_tls13_read(self.suite, &client_secret));

        // -- EncryptedExtensions --
        let mut ee_exts = Vec::new();
        if cx.data.sni.is_some() {
            ee_exts.push(ServerExtension::ServerNameAck);
        }
        if let Some(protocol) = cx.common.alpn_protocol.clone() {
            ee_exts.push(ServerExtension::make_alpn(&[&protocol]));
        }
        if let Some(mode) = hb_mode {
            ee_exts.push(ServerExtension::Heartbeat(mode));
        }

        let ee = Message {
            version: ProtocolVersion::TLSv1_3,
            payload: MessagePayload::Handshake(HandshakeMessagePayload {
                typ: HandshakeType::EncryptedExtensions,
                payload: HandshakePayload::EncryptedExtensions(ee_exts),
            }),
        };
        trace!("sending encrypted extensions {:?}", ee);
        self.transcript.add_message(&ee);
        cx.common.send_msg(ee, true);

        let doing_client_auth = if resumedata.is_none() {
            let client_auth = self.config.verifier.offer_client_auth();
            if client_auth {
                self.emit_certificate_req_tls13(cx)?;
            }
            client_auth
        } else {
            false
        };

        if resumedata.is_none() {
            self.emit_certificate_tls13(cx, &server_key);
            self.emit_certificate_verify_tls13(cx, &server_key, &sigschemes)?;
        }

        // -- Finished --
        let handshake_hash = self.transcript.get_current_hash();
        let verify_data = key_schedule.sign_server_finish(handshake_hash.as_ref());

        let fin = Message {
            version: ProtocolVersion::TLSv1_3,
            payload: MessagePayload::Handshake(HandshakeMessagePayload {
                typ: HandshakeType::Finished,
                payload: HandshakePayload::Finished(Payload::new(verify_data)),
            }),
        };
        trace!("sending finished {:?}", fin);
        self.transcript.add_message(&fin);
        cx.common.send_msg(fin, true);

        // Application secrets cover CH..server Finished.
        let hash_at_server_fin = self.transcript.get_current_hash();
        let key_schedule_pending =
            key_schedule.into_traffic_with_client_finished_pending(hash_at_server_fin.as_ref());

        // We may send application data immediately (half-RTT), under
        // our application write keys.  The client's flight is still
        // protected by the handshake keys.
        let server_app_secret = key_schedule_pending
            .current_server_traffic_secret()
            .to_vec();
        cx.common
            .record_layer
            .set_message_encrypter(cipher::new_tls13_write(self.suite, &server_app_secret));
        cx.common.start_outgoing_traffic();

        let send_tickets = self.config.send_tls13_tickets;

        if doing_client_auth {
            Ok(Box::new(ExpectCertificate {
                config: self.config,
                transcript: self.transcript,
                suite: self.suite,
                key_schedule: key_schedule_pending,
                send_tickets,
                resumed: false,
            }))
        } else {
            Ok(Box::new(ExpectFinished {
                config: self.config,
                transcript: self.transcript,
                suite: self.suite,
                key_schedule: key_schedule_pending,
                send_tickets,
                resumed: resumedata.is_some(),
            }))
        }
    }

    fn emit_certificate_req_tls13(&mut self, cx: &mut ServerContext<'_>) -> Result<(), Error> {
        let mut cr = CertificateRequestPayloadTls13 {
            context: PayloadU8::empty(),
            extensions: Vec::new(),
        };

        let schemes = self
            .config
            .verifier
            .supported_verify_schemes();
        cr.extensions
            .push(CertReqExtension::SignatureAlgorithms(schemes));

        let m = Message {
            version: ProtocolVersion::TLSv1_3,
            payload: MessagePayload::Handshake(HandshakeMessagePayload {
                typ: HandshakeType::CertificateRequest,
                payload: HandshakePayload::CertificateRequestTls13(cr),
            }),
        };

        trace!("Sending CertificateRequest {:?}", m);
        self.transcript.add_message(&m);
        cx.common.send_msg(m, true);
        Ok(())
    }

    fn emit_certificate_tls13(&mut self, cx: &mut ServerContext<'_>, server_key: &CertifiedKey) {
        let cert_body = CertificatePayloadTls13::new(&server_key.cert);

        let c = Message {
            version: ProtocolVersion::TLSv1_3,
            payload: MessagePayload::Handshake(HandshakeMessagePayload {
                typ: HandshakeType::Certificate,
                payload: HandshakePayload::CertificateTls13(cert_body),
            }),
        };

        trace!("sending certificate {:?}", c);
        self.transcript.add_message(&c);
        cx.common.send_msg(c, true);
    }

    fn emit_certificate_verify_tls13(
        &mut self,
        cx: &mut ServerContext<'_>,
        server_key: &CertifiedKey,
        schemes: &[SignatureScheme],
    ) -> Result<(), Error> {
        let message = verify::construct_tls13_server_verify_message(
            &self.transcript.get_current_hash(),
        );

        let signer = choose_sigscheme(cx, server_key, schemes, None)?;
        let scheme = signer.scheme();
        let sig = signer.sign(&message)?;

        let cv = DigitallySignedStruct::new(scheme, sig);

        let m = Message {
            version: ProtocolVersion::TLSv1_3,
            payload: MessagePayload::Handshake(HandshakeMessagePayload {
                typ: HandshakeType::CertificateVerify,
                payload: HandshakePayload::CertificateVerify(cv),
            }),
        };

        trace!("sending certificate-verify {:?}", m);
        self.transcript.add_message(&m);
        cx.common.send_msg(m, true);
        Ok(())
    }
}

fn can_resume(
    suite: &'static Tls13CipherSuite,
    config: &ServerConfig,
    resumedata: &ServerSessionValue,
) -> bool {
    match config
        .cipher_suites
        .iter()
        .find(|scs| scs.suite() == resumedata.cipher_suite)
    {
        Some(resuming_suite) => suite.hash_algorithm() == resuming_suite.hash_algorithm(),
        None => false,
    }
}

fn emit_fake_ccs(cx: &mut ServerContext<'_>) {
    if cx.common.sent_fake_ccs {
        return;
    }
    cx.common.sent_fake_ccs = true;

    let m = Message {
        version: ProtocolVersion::TLSv1_2,
        payload: MessagePayload::ChangeCipherSpec(ChangeCipherSpecPayload {}),
    };
    cx.common.send_msg(m, false);
}

fn emit_hello_retry_request(
    transcript: &mut HandshakeHash,
    suite: &'static Tls13CipherSuite,
    cx: &mut ServerContext<'_>,
    group: crate::msgs::enums::NamedGroup,
    session_id: SessionID,
) {
    let mut req = HelloRetryRequest {
        legacy_version: ProtocolVersion::TLSv1_2,
        session_id,
        cipher_suite: suite.common.suite,
        extensions: Vec::new(),
    };

    req.extensions
        .push(HelloRetryExtension::KeyShare(group));
    req.extensions
        .push(HelloRetryExtension::SupportedVersions(
            ProtocolVersion::TLSv1_3,
        ));

    let m = Message {
        version: ProtocolVersion::TLSv1_2,
        payload: MessagePayload::Handshake(HandshakeMessagePayload {
            typ: HandshakeType::ServerHello,
            payload: HandshakePayload::HelloRetryRequest(req),
        }),
    };

    trace!("Requesting retry {:?}", m);
    transcript.rollup_for_hrr();
    transcript.add_message(&m);
    cx.common.send_msg(m, false);

    // A subsequent middlebox CCS is ours too.
    emit_fake_ccs(cx);
}

struct ExpectCertificate {
    config: Arc<ServerConfig>,
    transcript: HandshakeHash,
    suite: &'static Tls13CipherSuite,
    key_schedule: KeyScheduleTrafficWithClientFinishedPending,
    send_tickets: usize,
    resumed: bool,
}

impl State<ServerConnectionData> for ExpectCertificate {
    fn handle(mut self: Box<Self>, cx: &mut ServerContext<'_>, m: Message) -> NextStateOrError {
        let certp = require_handshake_msg!(
            m,
            HandshakeType::Certificate,
            HandshakePayload::CertificateTls13
        )?;
        self.transcript.add_message(&m);

        // We don't send any CertificateRequest extensions, so any extensions
        // here are illegal.
        if certp
            .entries
            .iter()
            .any(|e| !e.exts.is_empty())
        {
            return Err(illegal_param(cx.common, "certificate extensions disallowed"));
        }

        if !certp.context.0.is_empty() {
            return Err(decode_error(cx.common, "certificate context disallowed"));
        }

        let cert_chain = certp.convert();

        if cert_chain.is_empty() {
            if self.config.verifier.client_auth_mandatory() {
                cx.common
                    .send_fatal_alert(AlertDescription::CertificateRequired);
                return Err(Error::NoCertificatesPresented);
            }

            debug!("client auth requested but no certificate supplied");
            self.transcript.abandon_client_auth();
            return Ok(Box::new(ExpectFinished {
                config: self.config,
                transcript: self.transcript,
                suite: self.suite,
                key_schedule: self.key_schedule,
                send_tickets: self.send_tickets,
                resumed: self.resumed,
            }));
        }

        Ok(Box::new(ExpectCertificateVerify {
            config: self.config,
            transcript: self.transcript,
            suite: self.suite,
            key_schedule: self.key_schedule,
            client_cert: cert_chain,
            send_tickets: self.send_tickets,
            resumed: self.resumed,
        }))
    }
}

struct ExpectCertificateVerify {
    config: Arc<ServerConfig>,
    transcript: HandshakeHash,
    suite: &'static Tls13CipherSuite,
    key_schedule: KeyScheduleTrafficWithClientFinishedPending,
    client_cert: Vec<crate::key::Certificate>,
    send_tickets: usize,
    resumed: bool,
}

impl State<ServerConnectionData> for ExpectCertificateVerify {
    fn handle(mut self: Box<Self>, cx: &mut ServerContext<'_>, m: Message) -> NextStateOrError {
        let rc = {
            let sig = require_handshake_msg!(
                m,
                HandshakeType::CertificateVerify,
                HandshakePayload::CertificateVerify
            )?;
            let handshake_hash = self.transcript.get_current_hash();
            self.transcript.abandon_client_auth();
            let (end_entity, intermediates) = self
                .client_cert
                .split_first()
                .ok_or(Error::NoCertificatesPresented)?;
            let now = std::time::SystemTime::now();
            let msg = verify::construct_tls13_client_verify_message(&handshake_hash);

            self.config
                .verifier
                .verify_client_cert(end_entity, intermediates, now)
                .and_then(|_| {
                    self.config
                        .verifier
                        .verify_tls13_signature(&msg, end_entity, sig)
                })
        };

        if let Err(e) = rc {
            cx.common
                .send_fatal_alert(AlertDescription::BadCertificate);
            return Err(e);
        }

        trace!("client CertificateVerify OK");
        cx.common.peer_certificates = Some(self.client_cert);

        self.transcript.add_message(&m);
        Ok(Box::new(ExpectFinished {
            config: self.config,
            transcript: self.transcript,
            suite: self.suite,
            key_schedule: self.key_schedule,
            send_tickets: self.send_tickets,
            resumed: self.resumed,
        }))
    }
}

struct ExpectFinished {
    config: Arc<ServerConfig>,
    transcript: HandshakeHash,
    suite: &'static Tls13CipherSuite,
    key_schedule: KeyScheduleTrafficWithClientFinishedPending,
    send_tickets: usize,
    resumed: bool,
}

impl ExpectFinished {
    fn emit_ticket(
        transcript: &HandshakeHash,
        suite: &'static Tls13CipherSuite,
        cx: &mut ServerContext<'_>,
        key_schedule: &KeyScheduleTraffic,
        config: &ServerConfig,
    ) -> Result<(), Error> {
        let mut nonce = [0u8; 16];
        config.random.fill(&mut nonce)?;
        let age_add = rand::random_u32(config.random.as_ref())?;

        let plain_hash = transcript.get_current_hash();
        let secret = key_schedule
            .resumption_master_secret_and_derive_ticket_psk(plain_hash.as_ref(), &nonce);

        let plain = ServerSessionValue::new(
            cx.data.sni.as_deref(),
            ProtocolVersion::TLSv1_3,
            suite.common.suite,
            secret,
            false,
            cx.common.peer_certificates.clone(),
            cx.common.alpn_protocol.clone(),
        )
        .get_encoding();

        let ticket = match config.ticketer.encrypt(&plain) {
            Some(t) => t,
            None => {
                debug!("resumption not available; not issuing ticket");
                return Ok(());
            }
        };
        let lifetime = config.ticketer.lifetime();

        let payload = NewSessionTicketPayloadTls13::new(lifetime, age_add, nonce.to_vec(), ticket);
        let m = Message {
            version: ProtocolVersion::TLSv1_3,
            payload: MessagePayload::Handshake(HandshakeMessagePayload {
                typ: HandshakeType::NewSessionTicket,
                payload: HandshakePayload::NewSessionTicketTls13(payload),
            }),
        };

        trace!("sending new ticket {:?}", m);
        cx.common.send_msg(m, true);
        Ok(())
    }
}

impl State<ServerConnectionData> for ExpectFinished {
    fn handle(mut self: Box<Self>, cx: &mut ServerContext<'_>, m: Message) -> NextStateOrError {
        let finished =
            require_handshake_msg!(m, HandshakeType::Finished, HandshakePayload::Finished)?;

        let handshake_hash = self.transcript.get_current_hash();
        let expect_verify_data = self
            .key_schedule
            .sign_client_finish(handshake_hash.as_ref());

        let _fin_verified = verify::check_verify_data(&expect_verify_data, &finished.0)
            .map_err(|_| {
                cx.common
                    .send_fatal_alert(AlertDescription::DecryptError);
                warn!("Finished wrong");
                Error::DecryptError
            })?;

        // Note the transcript covers the client's Finished: the
        // resumption master secret is derived over it.
        self.transcript.add_message(&m);

        cx.common.check_aligned_handshake()?;

        // Install keys to read the client's application traffic.
        let client_app_secret = self
            .key_schedule
            .current_client_traffic_secret()
            .to_vec();
        let key_schedule = self.key_schedule.into_traffic();

        cx.common
            .record_layer
            .set_message_decrypter(cipher::new_tls13_read(self.suite, &client_app_secret));

        cx.common.start_traffic();

        if self.config.ticketer.enabled() {
            for _ in 0..self.send_tickets {
                Self::emit_ticket(
                    &self.transcript,
                    self.suite,
                    cx,
                    &key_schedule,
                    &self.config,
                )?;
            }
        }

        Ok(Box::new(ExpectTraffic {
            suite: self.suite,
            key_schedule,
            _resumed: self.resumed,
        }))
    }
}

// -- Process traffic --
struct ExpectTraffic {
    suite: &'static Tls13CipherSuite,
    key_schedule: KeyScheduleTraffic,
    _resumed: bool,
}

impl ExpectTraffic {
    fn handle_key_update(
        &mut self,
        common: &mut crate::conn::CommonState,
        kur: &KeyUpdateRequest,
    ) -> Result<(), Error> {
        common.check_aligned_handshake()?;

        match kur {
            KeyUpdateRequest::UpdateNotRequested => {}
            KeyUpdateRequest::UpdateRequested => {
                common.send_msg(Message::build_key_update_notify(), true);
                let write_key = self
                    .key_schedule
                    .next_server_application_traffic_secret();
                common
                    .record_layer
                    .set_message_encrypter(cipher::new_tls13_write(self.suite, &write_key));
            }
            _ => {
                common.send_fatal_alert(AlertDescription::IllegalParameter);
                return Err(Error::CorruptMessagePayload(ContentType::Handshake));
            }
        }

        // Update our read-side keys: the client's sending keys rotated.
        let read_key = self
            .key_schedule
            .next_client_application_traffic_secret();
        common
            .record_layer
            .set_message_decrypter(cipher::new_tls13_read(self.suite, &read_key));
        Ok(())
    }
}

impl State<ServerConnectionData> for ExpectTraffic {
    fn handle(mut self: Box<Self>, cx: &mut ServerContext<'_>, m: Message) -> NextStateOrError {
        match m.payload {
            MessagePayload::ApplicationData(payload) => cx
                .common
                .take_received_plaintext(payload),
            MessagePayload::Handshake(payload) => match payload.payload {
                HandshakePayload::KeyUpdate(key_update) => {
                    self.handle_key_update(cx.common, &key_update)?
                }
                _ => {
                    return Err(crate::check::inappropriate_handshake_message(
                        &Message {
                            version: m.version,
                            payload: MessagePayload::Handshake(payload),
                        },
                        &[HandshakeType::KeyUpdate],
                    ));
                }
            },
            payload => {
                return Err(crate::check::inappropriate_message(
                    &Message {
                        version: m.version,
                        payload,
                    },
                    &[ContentType::ApplicationData, ContentType::Handshake],
                ));
            }
        }

        Ok(self)
    }

    fn export_keying_material(
        &self,
        output: &mut [u8],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), Error> {
        self.key_schedule
            .export_keying_material(output, label, context)
    }

    fn send_key_update_request(
        &mut self,
        common: &mut crate::conn::CommonState,
        request_update: bool,
    ) -> Result<(), Error> {
        let message = match request_update {
            true => Message {
                version: ProtocolVersion::TLSv1_3,
                payload: MessagePayload::Handshake(
                    HandshakeMessagePayload::build_key_update_request(),
                ),
            },
            false => Message::build_key_update_notify(),
        };
        common.send_msg(message, true);

        let write_key = self
            .key_schedule
            .next_server_application_traffic_secret();
        common
            .record_layer
            .set_message_encrypter(cipher::new_tls13_write(self.suite, &write_key));
        Ok(())
    }
}
