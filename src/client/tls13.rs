use crate::check::{check_message, require_handshake_msg};
use crate::cipher;
use crate::conn::{CommonState, State};
use crate::error::Error;
use crate::hash_hs::{HandshakeHash, HandshakeHashBuffer};
use crate::key_schedule::{KeyScheduleEarly, KeyScheduleHandshake, KeyScheduleTraffic};
use crate::kx;
use crate::msgs::base::Payload;
use crate::msgs::ccs::ChangeCipherSpecPayload;
use crate::msgs::codec::Codec;
use crate::msgs::enums::{
    AlertDescription, ContentType, ExtensionType, HandshakeType, HeartbeatMode, KeyUpdateRequest,
    ProtocolVersion, SignatureScheme,
};
use crate::msgs::handshake::{
    CertificatePayloadTls13, ClientExtension, DigitallySignedStruct, HandshakeMessagePayload,
    HandshakePayload, NewSessionTicketPayloadTls13, PresharedKeyIdentity, PresharedKeyOffer,
    ServerExtension, ServerHelloPayload,
};
use crate::msgs::message::{Message, MessagePayload};
use crate::msgs::persist;
use crate::sign::{CertifiedKey, Signer};
use crate::suites::Tls13CipherSuite;
use crate::ticketer::TimeBase;
use crate::tls12::ConnectionRandoms;
use crate::verify;

use crate::client::common::{ClientHelloDetails, ServerName};
use crate::client::hs::{illegal_param, process_alpn_protocol, ClientContext, NextStateOrError};
use crate::client::{ClientConfig, ClientConnectionData, StoresClientSessions};

use log::{debug, trace, warn};

use std::sync::Arc;

// Extensions we expect in plaintext in the ServerHello.
static ALLOWED_PLAINTEXT_EXTS: &[ExtensionType] = &[
    ExtensionType::KeyShare,
    ExtensionType::PreSharedKey,
    ExtensionType::SupportedVersions,
];

pub(super) fn validate_server_hello(
    common: &mut CommonState,
    server_hello: &ServerHelloPayload,
) -> Result<(), Error> {
    for ext in &server_hello.extensions {
        if !ALLOWED_PLAINTEXT_EXTS.contains(&ext.get_type()) {
            common.send_fatal_alert(AlertDescription::UnsupportedExtension);
            return Err(Error::PeerMisbehavedError(
                "server sent unexpected cleartext ext".to_string(),
            ));
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(super) fn handle_server_hello(
    config: Arc<ClientConfig>,
    cx: &mut ClientContext,
    server_hello: &ServerHelloPayload,
    mut resuming_session: Option<persist::Tls13ClientSessionValue>,
    server_name: ServerName,
    _randoms: ConnectionRandoms,
    suite: &'static Tls13CipherSuite,
    mut transcript: HandshakeHash,
    early_key_schedule: Option<KeyScheduleEarly>,
    hello: ClientHelloDetails,
    our_key_share: kx::KeyExchange,
) -> NextStateOrError {
    validate_server_hello(cx.common, server_hello)?;

    let their_key_share = server_hello
        .get_key_share()
        .ok_or_else(|| {
            cx.common
                .send_fatal_alert(AlertDescription::MissingExtension);
            Error::MissingExtension(ExtensionType::KeyShare)
        })?;

    if our_key_share.group() != their_key_share.group {
        return Err(illegal_param(
            cx.common,
            "wrong group for key share",
        ));
    }

    let key_exchange = our_key_share.complete(&their_key_share.payload.0)?;

    let key_schedule = if let (Some(selected_psk), Some(early_key_schedule)) =
        (server_hello.get_psk_index(), early_key_schedule)
    {
        if let Some(resuming) = &resuming_session {
            let Some(resuming_suite) = config.find_cipher_suite(resuming.cipher_suite) else {
                return Err(Error::General("resuming suite vanished".to_string()));
            };

            if suite.hash_algorithm() != resuming_suite.hash_algorithm() {
                return Err(illegal_param(
                    cx.common,
                    "server resuming incompatible suite",
                ));
            }

            // If the server varies the suite here, we will have encrypted
            // early data with the wrong suite.
            if selected_psk != 0 {
                return Err(illegal_param(cx.common, "server selected invalid psk"));
            }

            debug!("Resuming using PSK");
            cx.data.resumption_ciphersuite = Some(resuming_suite);
        } else {
            return Err(Error::PeerMisbehavedError(
                "server selected unoffered psk".to_string(),
            ));
        }
        early_key_schedule.into_handshake(&key_exchange.shared_secret)
    } else {
        debug!("Not resuming");
        // Discard the early data key schedule.
        resuming_session.take();
        KeyScheduleHandshake::start(suite, &key_exchange.shared_secret)
    };

    // Remember what KX group the server liked for next time.
    // (via the session cache key, not implemented further)

    // If we change keying when a subsequent handshake message is being joined,
    // the two halves will have different record layer protections.  Disallow this.
    cx.common.check_aligned_handshake()?;

    let hs_hash = transcript.get_current_hash();

    let mut key_schedule = key_schedule;
    let client_secret = key_schedule.client_handshake_traffic_secret(hs_hash.as_ref());
    let server_secret = key_schedule.server_handshake_traffic_secret(hs_hash.as_ref());

    cx.common
        .record_layer
        .set_message_encrypter(cipher::new_tls13_write(suite, &client_secret));
    cx.common
        .record_layer
        .set_message_decrypter(cipher::new_tls13_read(suite, &server_secret));

    Ok(Box::new(ExpectEncryptedExtensions {
        config,
        resuming_session,
        server_name,
        suite,
        transcript,
        key_schedule,
        hello,
    }))
}

/// Fill in the `pre_shared_key` extension: the offer carries the
/// ticket and a placeholder binder; the real binder is computed once
/// the rest of the ClientHello is known.
pub(super) fn prepare_resumption(
    resuming: &persist::Tls13ClientSessionValue,
    suite: &'static Tls13CipherSuite,
    now: TimeBase,
    exts: &mut Vec<ClientExtension>,
) {
    let obfuscated_ticket_age = resuming.obfuscated_ticket_age(now);

    let binder_len = suite.hash_algorithm().output_len;
    let binder = vec![0u8; binder_len];

    let psk_identity =
        PresharedKeyIdentity::new(resuming.ticket.0.clone(), obfuscated_ticket_age);
    let psk_ext = PresharedKeyOffer::new(psk_identity, binder);
    exts.push(ClientExtension::PresharedKey(psk_ext));
}

pub(super) fn fill_in_psk_binder(
    resuming: &persist::Tls13ClientSessionValue,
    suite: &'static Tls13CipherSuite,
    transcript: &HandshakeHashBuffer,
    hmp: &mut HandshakeMessagePayload,
) -> KeyScheduleEarly {
    // We need to know the hash function of the suite we're trying to resume into.
    let suite_hash = suite.hash_algorithm();

    // The binder is calculated over the clienthello, but doesn't include itself or its
    // length, or the length of its container.
    let binder_plaintext = hmp.get_encoding_for_binder_signing();
    let handshake_hash = transcript.get_hash_given(suite_hash, &binder_plaintext);

    // Run a fake key_schedule to simulate what the server will do if it chooses
    // to resume.
    let key_schedule = KeyScheduleEarly::new(suite, &resuming.secret.0);
    let real_binder =
        key_schedule.resumption_psk_binder_key_and_sign_verify_data(handshake_hash.as_ref());

    if let HandshakePayload::ClientHello(ch) = &mut hmp.payload {
        ch.set_psk_binder(real_binder);
    };

    key_schedule
}

/// A client sends a single dummy ChangeCipherSpec after its (second)
/// ClientHello or before its encrypted flight, for the benefit of
/// middleboxes that expect one.
pub(crate) fn emit_fake_ccs(common: &mut CommonState) {
    if common.sent_fake_ccs {
        return;
    }
    common.sent_fake_ccs = true;

    let m = Message {
        version: ProtocolVersion::TLSv1_2,
        payload: MessagePayload::ChangeCipherSpec(ChangeCipherSpecPayload {}),
    };
    common.send_msg(m, false);
}

struct ExpectEncryptedExtensions {
    config: Arc<ClientConfig>,
    resuming_session: Option<persist::Tls13ClientSessionValue>,
    server_name: ServerName,
    suite: &'static Tls13CipherSuite,
    transcript: HandshakeHash,
    key_schedule: KeyScheduleHandshake,
    hello: ClientHelloDetails,
}

impl State<ClientConnectionData> for ExpectEncryptedExtensions {
    fn handle(mut self: Box<Self>, cx: &mut ClientContext, m: Message) -> NextStateOrError {
        let exts = require_handshake_msg!(
            m,
            HandshakeType::EncryptedExtensions,
            HandshakePayload::EncryptedExtensions
        )?;
        debug!("TLS1.3 encrypted extensions: {:?}", exts);
        self.transcript.add_message(&m);

        validate_encrypted_extensions(cx.common, &self.hello, exts)?;
        process_alpn_protocol(cx, &self.config, get_alpn(exts))?;
        process_heartbeat(cx.common, &self.hello, get_heartbeat(exts));

        if let Some(_resuming_session) = self.resuming_session {
            // We *are* resuming: the server authenticates via the PSK
            // binder, so no certificate flight follows.
            let cert_verified = verify::ServerCertVerified::assertion();
            let sig_verified = verify::HandshakeSignatureValid::assertion();

            Ok(Box::new(ExpectFinished {
                config: self.config,
                server_name: self.server_name,
                suite: self.suite,
                transcript: self.transcript,
                key_schedule: self.key_schedule,
                client_auth: None,
                cert_verified,
                sig_verified,
            }))
        } else {
            Ok(Box::new(ExpectCertificateOrCertReq {
                config: self.config,
                server_name: self.server_name,
                suite: self.suite,
                transcript: self.transcript,
                key_schedule: self.key_schedule,
            }))
        }
    }
}

fn get_alpn(exts: &[ServerExtension]) -> Option<&[u8]> {
    exts.iter().find_map(|ext| match ext {
        ServerExtension::Protocols(protos) => {
            use crate::msgs::handshake::ConvertProtocolNameList;
            protos.as_single_slice()
        }
        _ => None,
    })
}

fn get_heartbeat(exts: &[ServerExtension]) -> Option<HeartbeatMode> {
    exts.iter().find_map(|ext| match ext {
        ServerExtension::Heartbeat(mode) => Some(*mode),
        _ => None,
    })
}

/// Work out the negotiated heartbeat permissions from our offer and
/// the server's answer.  An endpoint may only send requests if the
/// *peer's* extension said `PeerAllowedToSend`, and only if it sent
/// the extension itself (RFC6520 s2).
pub(super) fn process_heartbeat(
    common: &mut CommonState,
    hello: &ClientHelloDetails,
    server_mode: Option<HeartbeatMode>,
) {
    let our_mode = match hello.offered_heartbeat_mode {
        Some(mode) => mode,
        None => return,
    };

    if let Some(server_mode) = server_mode {
        common.we_may_send_heartbeat = server_mode == HeartbeatMode::PeerAllowedToSend;
        common.peer_may_send_heartbeat = our_mode == HeartbeatMode::PeerAllowedToSend;
        debug!(
            "Heartbeat negotiated: we_may_send {} peer_may_send {}",
            common.we_may_send_heartbeat, common.peer_may_send_heartbeat
        );
    }
}

fn validate_encrypted_extensions(
    common: &mut CommonState,
    hello: &ClientHelloDetails,
    exts: &[ServerExtension],
) -> Result<(), Error> {
    let mut seen = std::collections::HashSet::new();
    for ext in exts {
        let typ = ext.get_type();

        if !seen.insert(typ.get_u16()) {
            common.send_fatal_alert(AlertDescription::DecodeError);
            return Err(Error::PeerMisbehavedError(
                "server sent duplicate encrypted extensions".to_string(),
            ));
        }

        if ALLOWED_PLAINTEXT_EXTS.contains(&typ) || !hello.sent_extensions.contains(&typ) {
            common.send_fatal_alert(AlertDescription::UnsupportedExtension);
            return Err(Error::PeerMisbehavedError(
                "server sent unsolicited encrypted extension".to_string(),
            ));
        }
    }

    Ok(())
}

struct ExpectCertificateOrCertReq {
    config: Arc<ClientConfig>,
    server_name: ServerName,
    suite: &'static Tls13CipherSuite,
    transcript: HandshakeHash,
    key_schedule: KeyScheduleHandshake,
}

impl State<ClientConnectionData> for ExpectCertificateOrCertReq {
    fn handle(self: Box<Self>, cx: &mut ClientContext, m: Message) -> NextStateOrError {
        check_message(
            &m,
            &[ContentType::Handshake],
            &[
                HandshakeType::Certificate,
                HandshakeType::CertificateRequest,
            ],
        )?;
        if m.is_handshake_type(HandshakeType::Certificate) {
            Box::new(ExpectCertificate {
                config: self.config,
                server_name: self.server_name,
                suite: self.suite,
                transcript: self.transcript,
                key_schedule: self.key_schedule,
                client_auth: None,
            })
            .handle(cx, m)
        } else {
            Box::new(ExpectCertificateRequest {
                config: self.config,
                server_name: self.server_name,
                suite: self.suite,
                transcript: self.transcript,
                key_schedule: self.key_schedule,
            })
            .handle(cx, m)
        }
    }
}

/// TLS1.3 version of CertificateRequest handling.  We then move to
/// expecting the server Certificate.  Unfortunately the CertificateRequest
/// type changed in an annoying way in TLS1.3.
struct ExpectCertificateRequest {
    config: Arc<ClientConfig>,
    server_name: ServerName,
    suite: &'static Tls13CipherSuite,
    transcript: HandshakeHash,
    key_schedule: KeyScheduleHandshake,
}

impl State<ClientConnectionData> for ExpectCertificateRequest {
    fn handle(mut self: Box<Self>, cx: &mut ClientContext, m: Message) -> NextStateOrError {
        let certreq = require_handshake_msg!(
            m,
            HandshakeType::CertificateRequest,
            HandshakePayload::CertificateRequestTls13
        )?;
        self.transcript.add_message(&m);
        debug!("Got CertificateRequest {:?}", certreq);

        // Fortunately the problems here in TLS1.2 and prior are corrected in
        // TLS1.3.

        // Must be empty during handshake.
        if !certreq.context.0.is_empty() {
            warn!("Server sent non-empty certreq context");
            cx.common
                .send_fatal_alert(AlertDescription::DecodeError);
            return Err(Error::CorruptMessagePayload(ContentType::Handshake));
        }

        let compat_sigschemes = certreq
            .get_sigalgs_extension()
            .ok_or_else(|| {
                cx.common
                    .send_fatal_alert(AlertDescription::MissingExtension);
                Error::MissingExtension(ExtensionType::SignatureAlgorithms)
            })?
            .iter()
            .cloned()
            .filter(SignatureScheme::supported_in_tls13)
            .collect::<Vec<SignatureScheme>>();

        if compat_sigschemes.is_empty() {
            cx.common
                .send_fatal_alert(AlertDescription::HandshakeFailure);
            return Err(Error::PeerIncompatibleError(
                "server sent bad certreq schemes".to_string(),
            ));
        }

        let client_auth = self
            .config
            .client_auth_cert_resolver
            .resolve(&[], &compat_sigschemes);

        Ok(Box::new(ExpectCertificate {
            config: self.config,
            server_name: self.server_name,
            suite: self.suite,
            transcript: self.transcript,
            key_schedule: self.key_schedule,
            client_auth: Some(ClientAuthDetails {
                certkey: client_auth,
                sigschemes: compat_sigschemes,
            }),
        }))
    }
}

pub(super) struct ClientAuthDetails {
    pub(super) certkey: Option<Arc<CertifiedKey>>,
    pub(super) sigschemes: Vec<SignatureScheme>,
}

struct ExpectCertificate {
    config: Arc<ClientConfig>,
    server_name: ServerName,
    suite: &'static Tls13CipherSuite,
    transcript: HandshakeHash,
    key_schedule: KeyScheduleHandshake,
    client_auth: Option<ClientAuthDetails>,
}

impl State<ClientConnectionData> for ExpectCertificate {
    fn handle(mut self: Box<Self>, cx: &mut ClientContext, m: Message) -> NextStateOrError {
        let cert_chain = require_handshake_msg!(
            m,
            HandshakeType::Certificate,
            HandshakePayload::CertificateTls13
        )?;
        self.transcript.add_message(&m);

        // This is only non-empty for client auth.
        if !cert_chain.context.0.is_empty() {
            warn!("certificate with non-empty context during handshake");
            cx.common
                .send_fatal_alert(AlertDescription::DecodeError);
            return Err(Error::CorruptMessagePayload(ContentType::Handshake));
        }

        if cert_chain
            .entries
            .iter()
            .any(|e| !e.exts.is_empty())
        {
            warn!("certificate entry has unexpected extension");
            cx.common
                .send_fatal_alert(AlertDescription::UnsupportedExtension);
            return Err(Error::PeerMisbehavedError(
                "bad cert chain extensions".to_string(),
            ));
        }

        let server_cert_chain = cert_chain.convert();

        Ok(Box::new(ExpectCertificateVerify {
            config: self.config,
            server_name: self.server_name,
            suite: self.suite,
            transcript: self.transcript,
            key_schedule: self.key_schedule,
            server_cert_chain,
            client_auth: self.client_auth,
        }))
    }
}

// --- TLS1.3 CertificateVerify ---
struct ExpectCertificateVerify {
    config: Arc<ClientConfig>,
    server_name: ServerName,
    suite: &'static Tls13CipherSuite,
    transcript: HandshakeHash,
    key_schedule: KeyScheduleHandshake,
    server_cert_chain: Vec<crate::key::Certificate>,
    client_auth: Option<ClientAuthDetails>,
}

impl State<ClientConnectionData> for ExpectCertificateVerify {
    fn handle(mut self: Box<Self>, cx: &mut ClientContext, m: Message) -> NextStateOrError {
        let cert_verify = require_handshake_msg!(
            m,
            HandshakeType::CertificateVerify,
            HandshakePayload::CertificateVerify
        )?;

        trace!("Server cert is {:?}", self.server_cert_chain);

        // 1. Verify the certificate chain.
        let (end_entity, intermediates) = self
            .server_cert_chain
            .split_first()
            .ok_or(Error::NoCertificatesPresented)?;

        let now = std::time::SystemTime::now();
        let cert_verified = self
            .config
            .verifier
            .verify_server_cert(end_entity, intermediates, self.server_name.as_str(), now)
            .map_err(|err| send_cert_error_alert(cx.common, err))?;

        // 2. Verify their signature on the handshake.
        if !cert_verify.scheme.supported_in_tls13() {
            cx.common
                .send_fatal_alert(AlertDescription::IllegalParameter);
            return Err(Error::PeerMisbehavedError(
                "signature scheme not usable in TLS1.3".to_string(),
            ));
        }

        let handshake_hash = self.transcript.get_current_hash();
        let verify_message = verify::construct_tls13_server_verify_message(&handshake_hash);
        let sig_verified = self
            .config
            .verifier
            .verify_tls13_signature(&verify_message, end_entity, cert_verify)
            .map_err(|err| send_cert_error_alert(cx.common, err))?;

        self.transcript.add_message(&m);

        cx.common.peer_certificates = Some(self.server_cert_chain);

        Ok(Box::new(ExpectFinished {
            config: self.config,
            server_name: self.server_name,
            suite: self.suite,
            transcript: self.transcript,
            key_schedule: self.key_schedule,
            client_auth: self.client_auth,
            cert_verified,
            sig_verified,
        }))
    }
}

pub(super) fn send_cert_error_alert(common: &mut CommonState, err: Error) -> Error {
    match &err {
        Error::WebPkiError(webpki::Error::BadDer | webpki::Error::BadDerTime) => {
            common.send_fatal_alert(AlertDescription::DecodeError);
        }
        Error::PeerMisbehavedError(_) => {
            common.send_fatal_alert(AlertDescription::IllegalParameter);
        }
        _ => {
            common.send_fatal_alert(AlertDescription::BadCertificate);
        }
    };

    err
}

fn emit_certificate_tls13(
    transcript: &mut HandshakeHash,
    certkey: Option<&CertifiedKey>,
    common: &mut CommonState,
) {
    let chain = certkey.map(|ck| ck.cert.as_slice()).unwrap_or(&[]);
    let cert_payload = CertificatePayloadTls13::new(chain);

    let m = Message {
        version: ProtocolVersion::TLSv1_3,
        payload: MessagePayload::Handshake(HandshakeMessagePayload {
            typ: HandshakeType::Certificate,
            payload: HandshakePayload::CertificateTls13(cert_payload),
        }),
    };
    transcript.add_message(&m);
    common.send_msg(m, true);
}

fn emit_certverify_tls13(
    transcript: &mut HandshakeHash,
    signer: &dyn Signer,
    common: &mut CommonState,
) -> Result<(), Error> {
    let message = verify::construct_tls13_client_verify_message(&transcript.get_current_hash());

    let scheme = signer.scheme();
    let sig = signer.sign(&message)?;
    let dss = DigitallySignedStruct::new(scheme, sig);

    let m = Message {
        version: ProtocolVersion::TLSv1_3,
        payload: MessagePayload::Handshake(HandshakeMessagePayload {
            typ: HandshakeType::CertificateVerify,
            payload: HandshakePayload::CertificateVerify(dss),
        }),
    };

    transcript.add_message(&m);
    common.send_msg(m, true);
    Ok(())
}

fn emit_finished_tls13(
    verify_data: Vec<u8>,
    transcript: &mut HandshakeHash,
    common: &mut CommonState,
) {
    let verify_data_payload = Payload::new(verify_data);

    let m = Message {
        version: ProtocolVersion::TLSv1_3,
        payload: MessagePayload::Handshake(HandshakeMessagePayload {
            typ: HandshakeType::Finished,
            payload: HandshakePayload::Finished(verify_data_payload),
        }),
    };

    transcript.add_message(&m);
    common.send_msg(m, true);
}

struct ExpectFinished {
    config: Arc<ClientConfig>,
    server_name: ServerName,
    suite: &'static Tls13CipherSuite,
    transcript: HandshakeHash,
    key_schedule: KeyScheduleHandshake,
    client_auth: Option<ClientAuthDetails>,
    cert_verified: verify::ServerCertVerified,
    sig_verified: verify::HandshakeSignatureValid,
}

impl State<ClientConnectionData> for ExpectFinished {
    fn handle(self: Box<Self>, cx: &mut ClientContext, m: Message) -> NextStateOrError {
        let mut st = *self;
        let finished =
            require_handshake_msg!(m, HandshakeType::Finished, HandshakePayload::Finished)?;

        let handshake_hash = st.transcript.get_current_hash();
        let expect_verify_data = st
            .key_schedule
            .sign_server_finish(handshake_hash.as_ref());

        let _fin_verified = verify::check_verify_data(&expect_verify_data, &finished.0)
            .map_err(|_| {
                cx.common
                    .send_fatal_alert(AlertDescription::DecryptError);
                Error::DecryptError
            })?;

        st.transcript.add_message(&m);

        let hash_after_handshake = st.transcript.get_current_hash();

        // The key schedule goes to traffic keys here: the application
        // secrets cover the transcript up to and including the server's
        // Finished.
        let key_schedule_pending = st
            .key_schedule
            .into_traffic_with_client_finished_pending(hash_after_handshake.as_ref());

        // Middlebox compatibility CCS if we didn't already send one.
        emit_fake_ccs(cx.common);

        // Send our authentication/finished messages.  These are still
        // encrypted with our handshake keys.
        if let Some(client_auth) = &st.client_auth {
            match &client_auth.certkey {
                Some(certkey) => {
                    emit_certificate_tls13(&mut st.transcript, Some(certkey.as_ref()), cx.common);
                    let signer = certkey
                        .key
                        .choose_scheme(&client_auth.sigschemes)
                        .ok_or_else(|| {
                            Error::General("no overlapping sigschemes".to_string())
                        })?;
                    emit_certverify_tls13(&mut st.transcript, signer.as_ref(), cx.common)?;
                }
                None => {
                    emit_certificate_tls13(&mut st.transcript, None, cx.common);
                }
            }
        }

        let verify_data = key_schedule_pending
            .sign_client_finish(st.transcript.get_current_hash().as_ref());
        emit_finished_tls13(verify_data, &mut st.transcript, cx.common);

        // Now move to our application traffic keys.
        cx.common.check_aligned_handshake()?;

        let client_secret = key_schedule_pending
            .current_client_traffic_secret()
            .to_vec();
        let server_secret = key_schedule_pending
            .current_server_traffic_secret()
            .to_vec();
        let key_schedule = key_schedule_pending.into_traffic();

        cx.common
            .record_layer
            .set_message_decrypter(cipher::new_tls13_read(st.suite, &server_secret));
        cx.common
            .record_layer
            .set_message_encrypter(cipher::new_tls13_write(st.suite, &client_secret));

        cx.common.start_traffic();

        let st = ExpectTraffic {
            session_storage: Arc::clone(&st.config.session_storage),
            server_name: st.server_name,
            suite: st.suite,
            transcript: st.transcript,
            key_schedule,
            _cert_verified: st.cert_verified,
            _sig_verified: st.sig_verified,
        };

        Ok(Box::new(st))
    }
}

impl SignatureScheme {
    /// Whether a signature scheme is usable for TLS1.3 handshake
    /// signatures (RFC8446 s4.2.3 removes PKCS#1 and SHA-1 schemes).
    pub(crate) fn supported_in_tls13(&self) -> bool {
        matches!(
            *self,
            Self::ECDSA_NISTP384_SHA384
                | Self::ECDSA_NISTP256_SHA256
                | Self::RSA_PSS_SHA512
                | Self::RSA_PSS_SHA384
                | Self::RSA_PSS_SHA256
                | Self::ED25519
        )
    }
}

// -- Traffic state (TLS1.3) --
// In this state we can be sent tickets, key updates,
// and application data.
struct ExpectTraffic {
    session_storage: Arc<dyn StoresClientSessions>,
    server_name: ServerName,
    suite: &'static Tls13CipherSuite,
    transcript: HandshakeHash,
    key_schedule: KeyScheduleTraffic,
    _cert_verified: verify::ServerCertVerified,
    _sig_verified: verify::HandshakeSignatureValid,
}

impl ExpectTraffic {
    fn handle_new_ticket_tls13(
        &mut self,
        nst: &NewSessionTicketPayloadTls13,
    ) -> Result<(), Error> {
        let handshake_hash = self.transcript.get_current_hash();
        let secret = self
            .key_schedule
            .resumption_master_secret_and_derive_ticket_psk(
                handshake_hash.as_ref(),
                &nst.nonce.0,
            );

        let now = TimeBase::now()?;

        let value = persist::Tls13ClientSessionValue::new(
            self.suite.common.suite,
            nst.ticket.0.clone(),
            secret,
            now,
            nst.lifetime,
            nst.age_add,
            nst.get_max_early_data_size()
                .unwrap_or_default(),
        );

        let key = persist::ClientSessionKey::session_for_dns_name(self.server_name.as_str());

        let worked = self.session_storage.put(
            key.get_encoding(),
            persist::ClientSessionValue::Tls13(value).get_encoding(),
        );

        if worked {
            debug!("Ticket saved");
        } else {
            debug!("Ticket not saved");
        }

        Ok(())
    }

    fn handle_key_update(
        &mut self,
        common: &mut CommonState,
        key_update_request: &KeyUpdateRequest,
    ) -> Result<(), Error> {
        // Mustn't be interleaved with other handshake messages.
        common.check_aligned_handshake()?;

        match key_update_request {
            KeyUpdateRequest::UpdateNotRequested => {}
            KeyUpdateRequest::UpdateRequested => {
                // Update our write keys, telling the peer.
                common.send_msg(Message::build_key_update_notify(), true);
                let write_key = self
                    .key_schedule
                    .next_client_application_traffic_secret();
                common
                    .record_layer
                    .set_message_encrypter(cipher::new_tls13_write(self.suite, &write_key));
            }
            _ => {
                common.send_fatal_alert(AlertDescription::IllegalParameter);
                return Err(Error::CorruptMessagePayload(ContentType::Handshake));
            }
        }

        // Update our read-side keys.
        let read_key = self
            .key_schedule
            .next_server_application_traffic_secret();
        common
            .record_layer
            .set_message_decrypter(cipher::new_tls13_read(self.suite, &read_key));
        Ok(())
    }
}

impl State<ClientConnectionData> for ExpectTraffic {
    fn handle(mut self: Box<Self>, cx: &mut ClientContext, m: Message) -> NextStateOrError {
        match m.payload {
            MessagePayload::ApplicationData(payload) => cx
                .common
                .take_received_plaintext(payload),
            MessagePayload::Handshake(payload) => match payload.payload {
                HandshakePayload::NewSessionTicketTls13(new_ticket) => {
                    self.handle_new_ticket_tls13(&new_ticket)?
                }
                HandshakePayload::KeyUpdate(key_update) => {
                    self.handle_key_update(cx.common, &key_update)?
                }
                _ => {
                    return Err(crate::check::inappropriate_handshake_message(
                        &Message {
                            version: m.version,
                            payload: MessagePayload::Handshake(payload),
                        },
                        &[HandshakeType::NewSessionTicket, HandshakeType::KeyUpdate],
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
        common: &mut CommonState,
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

        // Install the new write keys: the message above is the last
        // under the old epoch.
        let write_key = self
            .key_schedule
            .next_client_application_traffic_secret();
        common
            .record_layer
            .set_message_encrypter(cipher::new_tls13_write(self.suite, &write_key));
        Ok(())
    }
}
