use crate::check::{check_message, require_handshake_msg, require_handshake_msg_move};
use crate::conn::{CommonState, State};
use crate::error::Error;
use crate::hash_hs::HandshakeHash;
use crate::kx;
use crate::msgs::base::{Payload, PayloadU8};
use crate::msgs::ccs::ChangeCipherSpecPayload;
use crate::msgs::codec::Codec;
use crate::msgs::enums::{
    AlertDescription, ContentType, HandshakeType, ProtocolVersion, SignatureScheme,
};
use crate::msgs::handshake::{
    CertificatePayload, DigitallySignedStruct, HandshakeMessagePayload, HandshakePayload,
    HasExtensions, ServerHelloPayload, SessionID,
};
use crate::msgs::message::{Message, MessagePayload};
use crate::msgs::persist;
use crate::sign::CertifiedKey;
use crate::suites::Tls12CipherSuite;
use crate::ticketer::TimeBase;
use crate::tls12::{ConnectionRandoms, ConnectionSecrets, Side};
use crate::verify;

use crate::client::common::{ClientHelloDetails, ServerName};
use crate::client::hs::{illegal_param, ClientContext, NextStateOrError};
use crate::client::tls13::{process_heartbeat, send_cert_error_alert};
use crate::client::{ClientConfig, ClientConnectionData, StoresClientSessions};

use log::{debug, trace, warn};

use std::sync::Arc;

pub(super) struct CompleteServerHelloHandling {
    pub(super) config: Arc<ClientConfig>,
    pub(super) resuming_session: Option<persist::Tls12ClientSessionValue>,
    pub(super) server_name: ServerName,
    pub(super) randoms: ConnectionRandoms,
    pub(super) using_ems: bool,
    pub(super) transcript: HandshakeHash,
    pub(super) session_id: SessionID,
    pub(super) hello: ClientHelloDetails,
}

impl CompleteServerHelloHandling {
    pub(super) fn handle_server_hello(
        mut self,
        cx: &mut ClientContext,
        suite: &'static Tls12CipherSuite,
        server_hello: &ServerHelloPayload,
    ) -> NextStateOrError {
        cx.common.negotiated_version = Some(ProtocolVersion::TLSv1_2);

        if self.config.require_ems && !self.using_ems {
            cx.common
                .send_fatal_alert(AlertDescription::HandshakeFailure);
            return Err(Error::PeerIncompatibleError(
                "server does not support extended master secret".to_string(),
            ));
        }

        process_heartbeat(
            cx.common,
            &self.hello,
            server_hello.get_heartbeat_extension(),
        );

        // Might the server send a ticket?
        let must_issue_new_ticket = server_hello
            .find_extension(crate::msgs::enums::ExtensionType::SessionTicket)
            .is_some();
        if must_issue_new_ticket {
            debug!("Server supports tickets");
        }

        // See if we're successfully resuming.
        if let Some(resuming) = &self.resuming_session {
            if resuming.session_id == server_hello.session_id
                && !server_hello.session_id.is_empty()
            {
                debug!("Server agreed to resume");

                // Is the server telling lies about the ciphersuite?
                if resuming.cipher_suite != suite.common.suite {
                    return Err(Error::PeerMisbehavedError(
                        "abbreviated handshake offered, but with varied cs".to_string(),
                    ));
                }

                // And about EMS support?
                if resuming.extended_ms != self.using_ems {
                    return Err(Error::PeerMisbehavedError(
                        "server varied ems support over resume".to_string(),
                    ));
                }

                let secrets = ConnectionSecrets::new_resume(
                    &self.randoms,
                    suite,
                    &resuming.master_secret.0,
                );
                prepare_encryption_tls12(&secrets, cx.common);

                if must_issue_new_ticket {
                    return Ok(Box::new(ExpectNewTicket {
                        config: self.config,
                        secrets,
                        resuming_session: self.resuming_session,
                        session_id: server_hello.session_id,
                        server_name: self.server_name,
                        using_ems: self.using_ems,
                        transcript: self.transcript,
                        resuming: true,
                        cert_verified: verify::ServerCertVerified::assertion(),
                        sig_verified: verify::HandshakeSignatureValid::assertion(),
                    }));
                }

                return Ok(Box::new(ExpectCcs {
                    config: self.config,
                    secrets,
                    resuming_session: self.resuming_session,
                    session_id: server_hello.session_id,
                    server_name: self.server_name,
                    using_ems: self.using_ems,
                    transcript: self.transcript,
                    ticket: None,
                    new_ticket_lifetime: 0,
                    resuming: true,
                    cert_verified: verify::ServerCertVerified::assertion(),
                    sig_verified: verify::HandshakeSignatureValid::assertion(),
                }));
            }
        }

        Ok(Box::new(ExpectCertificate {
            config: self.config,
            server_name: self.server_name,
            randoms: self.randoms,
            using_ems: self.using_ems,
            transcript: self.transcript,
            session_id: server_hello.session_id,
            suite,
            must_issue_new_ticket,
        }))
    }
}

struct ExpectCertificate {
    config: Arc<ClientConfig>,
    server_name: ServerName,
    randoms: ConnectionRandoms,
    using_ems: bool,
    transcript: HandshakeHash,
    session_id: SessionID,
    suite: &'static Tls12CipherSuite,
    must_issue_new_ticket: bool,
}

impl State<ClientConnectionData> for ExpectCertificate {
    fn handle(mut self: Box<Self>, _cx: &mut ClientContext, m: Message) -> NextStateOrError {
        self.transcript.add_message(&m);
        let server_cert_chain = require_handshake_msg_move!(
            m,
            HandshakeType::Certificate,
            HandshakePayload::Certificate
        )?;

        Ok(Box::new(ExpectServerKx {
            config: self.config,
            server_name: self.server_name,
            randoms: self.randoms,
            using_ems: self.using_ems,
            transcript: self.transcript,
            session_id: self.session_id,
            suite: self.suite,
            server_cert_chain,
            must_issue_new_ticket: self.must_issue_new_ticket,
        }))
    }
}

struct ExpectServerKx {
    config: Arc<ClientConfig>,
    server_name: ServerName,
    randoms: ConnectionRandoms,
    using_ems: bool,
    transcript: HandshakeHash,
    session_id: SessionID,
    suite: &'static Tls12CipherSuite,
    server_cert_chain: CertificatePayload,
    must_issue_new_ticket: bool,
}

impl State<ClientConnectionData> for ExpectServerKx {
    fn handle(mut self: Box<Self>, cx: &mut ClientContext, m: Message) -> NextStateOrError {
        let opaque_kx = require_handshake_msg!(
            m,
            HandshakeType::ServerKeyExchange,
            HandshakePayload::ServerKeyExchange
        )?;
        self.transcript.add_message(&m);

        let ecdhe = opaque_kx
            .unwrap_given_ecdhe()
            .ok_or_else(|| {
                cx.common
                    .send_fatal_alert(AlertDescription::DecodeError);
                Error::CorruptMessagePayload(ContentType::Handshake)
            })?;

        debug!("ECDHE curve is {:?}", ecdhe.params.curve_params);

        // Save the signature and signed parameters for later verification.
        let mut kx_params = Vec::new();
        ecdhe.params.encode(&mut kx_params);

        Ok(Box::new(ExpectServerDoneOrCertReq {
            config: self.config,
            server_name: self.server_name,
            randoms: self.randoms,
            using_ems: self.using_ems,
            transcript: self.transcript,
            session_id: self.session_id,
            suite: self.suite,
            server_cert_chain: self.server_cert_chain,
            server_kx_params: kx_params,
            server_kx_sig: ecdhe.dss,
            peer_pub_key: ecdhe.params.public.0,
            peer_group: ecdhe.params.curve_params.named_group,
            must_issue_new_ticket: self.must_issue_new_ticket,
        }))
    }
}

struct ClientAuthDetails {
    certkey: Option<Arc<CertifiedKey>>,
    sigschemes: Vec<SignatureScheme>,
}

struct ExpectServerDoneOrCertReq {
    config: Arc<ClientConfig>,
    server_name: ServerName,
    randoms: ConnectionRandoms,
    using_ems: bool,
    transcript: HandshakeHash,
    session_id: SessionID,
    suite: &'static Tls12CipherSuite,
    server_cert_chain: CertificatePayload,
    server_kx_params: Vec<u8>,
    server_kx_sig: DigitallySignedStruct,
    peer_pub_key: Vec<u8>,
    peer_group: crate::msgs::enums::NamedGroup,
    must_issue_new_ticket: bool,
}

impl State<ClientConnectionData> for ExpectServerDoneOrCertReq {
    fn handle(mut self: Box<Self>, cx: &mut ClientContext, m: Message) -> NextStateOrError {
        check_message(
            &m,
            &[ContentType::Handshake],
            &[
                HandshakeType::CertificateRequest,
                HandshakeType::ServerHelloDone,
            ],
        )?;

        let client_auth = if let MessagePayload::Handshake(HandshakeMessagePayload {
            payload: HandshakePayload::CertificateRequest(certreq),
            ..
        }) = &m.payload
        {
            self.transcript.add_message(&m);
            debug!("Got CertificateRequest {:?}", certreq);

            // The RFC jovially describes the design here as 'somewhat complicated'
            // and 'somewhat underspecified'.  So thanks for that.
            let compat_sigschemes = self
                .suite
                .resolve_sig_schemes(&certreq.sigschemes);

            let certkey = if compat_sigschemes.is_empty() {
                warn!("No overlapping sigschemes for client auth");
                None
            } else {
                self.config
                    .client_auth_cert_resolver
                    .resolve(&[], &compat_sigschemes)
            };

            if certkey.is_none() {
                debug!("Client auth requested but no cert/sigscheme available");
            }

            Some(ClientAuthDetails {
                certkey,
                sigschemes: compat_sigschemes,
            })
        } else {
            self.transcript.abandon_client_auth();
            None
        };

        if m.is_handshake_type(HandshakeType::CertificateRequest) {
            return Ok(Box::new(ExpectServerDone {
                client_auth,
                inner: *self,
            }));
        }

        Box::new(ExpectServerDone {
            client_auth,
            inner: *self,
        })
        .handle(cx, m)
    }
}

struct ExpectServerDone {
    client_auth: Option<ClientAuthDetails>,
    inner: ExpectServerDoneOrCertReq,
}

impl State<ClientConnectionData> for ExpectServerDone {
    fn handle(self: Box<Self>, cx: &mut ClientContext, m: Message) -> NextStateOrError {
        let mut st = *self;
        check_message(
            &m,
            &[ContentType::Handshake],
            &[HandshakeType::ServerHelloDone],
        )?;
        st.inner.transcript.add_message(&m);

        trace!("Server cert is {:?}", st.inner.server_cert_chain);
        debug!("Server DNS name is {:?}", st.inner.server_name);

        // 1. Verify the cert chain.
        // 2. Verify that the top certificate signed their kx.
        // 3. If doing client auth, send our Certificate.
        // 4. Complete the key exchange:
        //    a) generate our kx pair
        //    b) emit a ClientKeyExchange containing it
        //    c) if doing client auth, emit a CertificateVerify
        //    d) emit a CCS
        //    e) derive the shared keys, and start encryption
        // 5. emit a Finished, our first encrypted message under the new keys.

        // 1.
        let (end_entity, intermediates) = st
            .inner
            .server_cert_chain
            .split_first()
            .ok_or(Error::NoCertificatesPresented)?;
        let now = std::time::SystemTime::now();
        let cert_verified = st
            .inner
            .config
            .verifier
            .verify_server_cert(
                end_entity,
                intermediates,
                st.inner.server_name.as_str(),
                now,
            )
            .map_err(|err| send_cert_error_alert(cx.common, err))?;

        // 2.
        // Build up the contents of the signed message.
        // It's ClientHello.random || ServerHello.random || ServerKeyExchange.params
        let sig_verified = {
            let mut message = Vec::new();
            message.extend_from_slice(&st.inner.randoms.client);
            message.extend_from_slice(&st.inner.randoms.server);
            message.extend_from_slice(&st.inner.server_kx_params);

            // Check the signature is compatible with the ciphersuite.
            let sig = &st.inner.server_kx_sig;
            if !st
                .inner
                .suite
                .sign
                .contains(&sig.scheme)
            {
                warn!(
                    "peer signed kx with wrong algorithm (got {:?})",
                    sig.scheme
                );
                return Err(illegal_param(cx.common, "signing with wrong algorithm"));
            }

            st.inner
                .config
                .verifier
                .verify_tls12_signature(&message, end_entity, sig)
                .map_err(|err| send_cert_error_alert(cx.common, err))?
        };
        cx.common.peer_certificates = Some(st.inner.server_cert_chain.clone());

        // 3.
        if let Some(client_auth) = &st.client_auth {
            let certs = client_auth
                .certkey
                .as_ref()
                .map(|ck| ck.cert.clone())
                .unwrap_or_default();
            emit_certificate(&mut st.inner.transcript, certs, cx.common);
        }

        // 4a.
        let skxg = kx::KeyExchange::choose(st.inner.peer_group, &st.inner.config.kx_groups)
            .ok_or_else(|| {
                cx.common
                    .send_fatal_alert(AlertDescription::IllegalParameter);
                Error::PeerMisbehavedError("server chose an unoffered group".to_string())
            })?;
        let kx = kx::KeyExchange::start(skxg)?;

        // 4b.
        emit_clientkx(&mut st.inner.transcript, cx.common, kx.pubkey.as_ref());
        // Note: EMS binds the master secret to the transcript up to and
        // including this ClientKeyExchange.
        let ems_seed = st
            .inner
            .using_ems
            .then(|| st.inner.transcript.get_current_hash());

        // 4c.
        if let Some(client_auth) = &st.client_auth {
            if let Some(certkey) = &client_auth.certkey {
                emit_certverify(
                    &mut st.inner.transcript,
                    certkey,
                    &client_auth.sigschemes,
                    cx.common,
                )?;
            }
        }

        // 4d.
        emit_ccs(cx.common);

        // 4e. Now commit secrets.
        let kxd = kx.complete(&st.inner.peer_pub_key)?;
        let secrets = match ems_seed {
            Some(seed) => ConnectionSecrets::new_ems(
                &st.inner.randoms,
                seed.as_ref(),
                st.inner.suite,
                &kxd.shared_secret,
            ),
            None => {
                ConnectionSecrets::new(&st.inner.randoms, st.inner.suite, &kxd.shared_secret)
            }
        };
        prepare_encryption_tls12(&secrets, cx.common);
        cx.common.record_layer.start_encrypting();

        // 5.
        emit_finished(&secrets, &mut st.inner.transcript, cx.common);

        if st.inner.must_issue_new_ticket {
            Ok(Box::new(ExpectNewTicket {
                config: st.inner.config,
                secrets,
                resuming_session: None,
                session_id: st.inner.session_id,
                server_name: st.inner.server_name,
                using_ems: st.inner.using_ems,
                transcript: st.inner.transcript,
                resuming: false,
                cert_verified,
                sig_verified,
            }))
        } else {
            Ok(Box::new(ExpectCcs {
                config: st.inner.config,
                secrets,
                resuming_session: None,
                session_id: st.inner.session_id,
                server_name: st.inner.server_name,
                using_ems: st.inner.using_ems,
                transcript: st.inner.transcript,
                ticket: None,
                new_ticket_lifetime: 0,
                resuming: false,
                cert_verified,
                sig_verified,
            }))
        }
    }
}

fn emit_certificate(
    transcript: &mut HandshakeHash,
    certs: CertificatePayload,
    common: &mut CommonState,
) {
    let cert = Message {
        version: ProtocolVersion::TLSv1_2,
        payload: MessagePayload::Handshake(HandshakeMessagePayload {
            typ: HandshakeType::Certificate,
            payload: HandshakePayload::Certificate(certs),
        }),
    };

    transcript.add_message(&cert);
    common.send_msg(cert, false);
}

fn emit_clientkx(transcript: &mut HandshakeHash, common: &mut CommonState, pubkey: &[u8]) {
    let mut buf = Vec::new();
    let ecpoint = PayloadU8::new(pubkey.to_vec());
    ecpoint.encode(&mut buf);
    let pubkey = Payload::new(buf);

    let ckx = Message {
        version: ProtocolVersion::TLSv1_2,
        payload: MessagePayload::Handshake(HandshakeMessagePayload {
            typ: HandshakeType::ClientKeyExchange,
            payload: HandshakePayload::ClientKeyExchange(pubkey),
        }),
    };

    transcript.add_message(&ckx);
    common.send_msg(ckx, false);
}

fn emit_certverify(
    transcript: &mut HandshakeHash,
    certkey: &CertifiedKey,
    sigschemes: &[SignatureScheme],
    common: &mut CommonState,
) -> Result<(), Error> {
    let message = match transcript.take_handshake_buf() {
        Some(buf) => buf,
        None => {
            // This should not happen: the transcript buffer retains the
            // full handshake when client auth is configured.
            return Err(Error::General("client auth transcript unavailable".to_string()));
        }
    };

    let signer = certkey
        .key
        .choose_scheme(sigschemes)
        .ok_or_else(|| Error::General("no overlapping sigschemes".to_string()))?;
    let scheme = signer.scheme();
    let sig = signer.sign(&message)?;
    let body = DigitallySignedStruct::new(scheme, sig);

    let m = Message {
        version: ProtocolVersion::TLSv1_2,
        payload: MessagePayload::Handshake(HandshakeMessagePayload {
            typ: HandshakeType::CertificateVerify,
            payload: HandshakePayload::CertificateVerify(body),
        }),
    };

    transcript.add_message(&m);
    common.send_msg(m, false);
    Ok(())
}

fn emit_ccs(common: &mut CommonState) {
    let ccs = Message {
        version: ProtocolVersion::TLSv1_2,
        payload: MessagePayload::ChangeCipherSpec(ChangeCipherSpecPayload {}),
    };

    common.send_msg(ccs, false);
}

/// Install (but do not yet activate) the record protection derived
/// from `secrets`.  Each direction starts when the corresponding CCS
/// is sent or received.
fn prepare_encryption_tls12(secrets: &ConnectionSecrets, common: &mut CommonState) {
    let (dec, enc) = secrets.make_cipher_pair(Side::Client);
    common
        .record_layer
        .prepare_message_encrypter(enc);
    common
        .record_layer
        .prepare_message_decrypter(dec);
}

fn emit_finished(
    secrets: &ConnectionSecrets,
    transcript: &mut HandshakeHash,
    common: &mut CommonState,
) {
    let vh = transcript.get_current_hash();
    let verify_data = secrets.client_verify_data(vh.as_ref());
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

// --- Waiting for their CCS ---
struct ExpectCcs {
    config: Arc<ClientConfig>,
    secrets: ConnectionSecrets,
    resuming_session: Option<persist::Tls12ClientSessionValue>,
    session_id: SessionID,
    server_name: ServerName,
    using_ems: bool,
    transcript: HandshakeHash,
    ticket: Option<Vec<u8>>,
    new_ticket_lifetime: u32,
    resuming: bool,
    cert_verified: verify::ServerCertVerified,
    sig_verified: verify::HandshakeSignatureValid,
}

impl State<ClientConnectionData> for ExpectCcs {
    fn handle(self: Box<Self>, cx: &mut ClientContext, m: Message) -> NextStateOrError {
        check_message(&m, &[ContentType::ChangeCipherSpec], &[])?;
        // CCS should not be received interleaved with fragmented handshake-level
        // message.
        cx.common.check_aligned_handshake()?;

        // nb. msgs layer validates trivial contents of CCS.
        cx.common.record_layer.start_decrypting();

        Ok(Box::new(ExpectFinished {
            config: self.config,
            secrets: self.secrets,
            resuming_session: self.resuming_session,
            session_id: self.session_id,
            server_name: self.server_name,
            using_ems: self.using_ems,
            transcript: self.transcript,
            ticket: self.ticket,
            new_ticket_lifetime: self.new_ticket_lifetime,
            resuming: self.resuming,
            cert_verified: self.cert_verified,
            sig_verified: self.sig_verified,
        }))
    }
}

struct ExpectNewTicket {
    config: Arc<ClientConfig>,
    secrets: ConnectionSecrets,
    resuming_session: Option<persist::Tls12ClientSessionValue>,
    session_id: SessionID,
    server_name: ServerName,
    using_ems: bool,
    transcript: HandshakeHash,
    resuming: bool,
    cert_verified: verify::ServerCertVerified,
    sig_verified: verify::HandshakeSignatureValid,
}

impl State<ClientConnectionData> for ExpectNewTicket {
    fn handle(mut self: Box<Self>, _cx: &mut ClientContext, m: Message) -> NextStateOrError {
        self.transcript.add_message(&m);
        let nst = require_handshake_msg_move!(
            m,
            HandshakeType::NewSessionTicket,
            HandshakePayload::NewSessionTicket
        )?;

        Ok(Box::new(ExpectCcs {
            config: self.config,
            secrets: self.secrets,
            resuming_session: self.resuming_session,
            session_id: self.session_id,
            server_name: self.server_name,
            using_ems: self.using_ems,
            transcript: self.transcript,
            ticket: Some(nst.ticket.0),
            new_ticket_lifetime: nst.lifetime_hint,
            resuming: self.resuming,
            cert_verified: self.cert_verified,
            sig_verified: self.sig_verified,
        }))
    }
}

// -- Waiting for their finished --
fn save_session(
    config: &ClientConfig,
    secrets: &ConnectionSecrets,
    session_id: SessionID,
    server_name: &ServerName,
    using_ems: bool,
    mut ticket: Option<Vec<u8>>,
    new_ticket_lifetime: u32,
    resuming_session: &mut Option<persist::Tls12ClientSessionValue>,
) {
    // Save a ticket.  If we got a new ticket, save that.  Otherwise, save the
    // original ticket again.
    if ticket.is_none() {
        if let Some(resuming) = resuming_session {
            ticket = Some(resuming.take_ticket());
        }
    }

    let ticket = ticket.unwrap_or_default();

    if session_id.is_empty() && ticket.is_empty() {
        debug!("Session not saved: server didn't allocate id or ticket");
        return;
    }

    let time_now = match TimeBase::now() {
        Ok(t) => t,
        Err(_) => {
            debug!("Could not get current time");
            return;
        }
    };

    let key = persist::ClientSessionKey::session_for_dns_name(server_name.as_str());
    let value = persist::Tls12ClientSessionValue::new(
        secrets.suite().common.suite,
        session_id,
        ticket,
        secrets.get_master_secret(),
        time_now,
        new_ticket_lifetime,
        using_ems,
    );

    let worked = config.session_storage.put(
        key.get_encoding(),
        persist::ClientSessionValue::Tls12(value).get_encoding(),
    );

    if worked {
        debug!("Session saved");
    } else {
        debug!("Session not saved");
    }
}

struct ExpectFinished {
    config: Arc<ClientConfig>,
    secrets: ConnectionSecrets,
    resuming_session: Option<persist::Tls12ClientSessionValue>,
    session_id: SessionID,
    server_name: ServerName,
    using_ems: bool,
    transcript: HandshakeHash,
    ticket: Option<Vec<u8>>,
    new_ticket_lifetime: u32,
    resuming: bool,
    cert_verified: verify::ServerCertVerified,
    sig_verified: verify::HandshakeSignatureValid,
}

impl State<ClientConnectionData> for ExpectFinished {
    fn handle(self: Box<Self>, cx: &mut ClientContext, m: Message) -> NextStateOrError {
        let mut st = *self;
        let finished =
            require_handshake_msg!(m, HandshakeType::Finished, HandshakePayload::Finished)?;

        cx.common.check_aligned_handshake()?;

        // Work out what verify_data we expect.
        let vh = st.transcript.get_current_hash();
        let expect_verify_data = st.secrets.server_verify_data(vh.as_ref());

        // Constant-time verification of this is relatively unimportant: they only
        // get one chance.  But it can't hurt.
        let _fin_verified = verify::check_verify_data(&expect_verify_data, &finished.0)
            .map_err(|_| {
                cx.common
                    .send_fatal_alert(AlertDescription::DecryptError);
                Error::DecryptError
            })?;

        // Hash this message too.
        st.transcript.add_message(&m);

        save_session(
            &st.config,
            &st.secrets,
            st.session_id,
            &st.server_name,
            st.using_ems,
            st.ticket.take(),
            st.new_ticket_lifetime,
            &mut st.resuming_session,
        );

        if st.resuming {
            // The server speaks first in the abbreviated flow: our own
            // CCS and Finished close it out.
            emit_ccs(cx.common);
            cx.common.record_layer.start_encrypting();
            emit_finished(&st.secrets, &mut st.transcript, cx.common);
        }

        cx.common.start_traffic();
        Ok(Box::new(ExpectTraffic {
            _secrets: st.secrets,
            _cert_verified: st.cert_verified,
            _sig_verified: st.sig_verified,
        }))
    }
}

// -- Traffic transit state --
struct ExpectTraffic {
    _secrets: ConnectionSecrets,
    _cert_verified: verify::ServerCertVerified,
    _sig_verified: verify::HandshakeSignatureValid,
}

impl State<ClientConnectionData> for ExpectTraffic {
    fn handle(self: Box<Self>, cx: &mut ClientContext, m: Message) -> NextStateOrError {
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
