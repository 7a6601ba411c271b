//! Assorted public API tests: full client/server handshakes run over
//! in-memory buffers.

use std::io::{self, Read, Write};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use ring::signature::KeyPair;
use test_log::test;

use puffin_tls::key::{Certificate, PrivateKey};
use puffin_tls::verify::{
    ClientCertVerified, ClientCertVerifier, HandshakeSignatureValid, NoClientAuth,
    ServerCertVerified, ServerCertVerifier,
};
use puffin_tls::{
    AeadTicketer, ClientConfig, ClientConnection, ConnectionCommon, Error, HeartbeatMode,
    ProtocolVersion, RingRandom, ServerConfig, ServerConnection, ServerName, SignatureScheme,
};

use puffin_tls::msgs::handshake::DigitallySignedStruct;

/// A test identity: an Ed25519 keypair whose public half the test
/// verifiers check signatures against.  The "certificate" carries no
/// X.509 structure; the verifiers are the trust decision.
struct TestIdentity {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl TestIdentity {
    fn new() -> Self {
        let rng = ring::rand::SystemRandom::new();
        let pkcs8 = ring::signature::Ed25519KeyPair::generate_pkcs8(&rng)
            .unwrap()
            .as_ref()
            .to_vec();
        let key = ring::signature::Ed25519KeyPair::from_pkcs8(&pkcs8).unwrap();
        Self {
            public_key: key.public_key().as_ref().to_vec(),
            pkcs8,
        }
    }

    fn cert_chain(&self) -> Vec<Certificate> {
        vec![Certificate(b"test certificate".to_vec())]
    }

    fn private_key(&self) -> PrivateKey {
        PrivateKey(self.pkcs8.clone())
    }
}

fn check_ed25519(
    public_key: &[u8],
    message: &[u8],
    dss: &DigitallySignedStruct,
) -> Result<HandshakeSignatureValid, Error> {
    assert_eq!(dss.scheme, SignatureScheme::ED25519);
    ring::signature::UnparsedPublicKey::new(&ring::signature::ED25519, public_key)
        .verify(message, &dss.sig.0)
        .map(|_| HandshakeSignatureValid::assertion())
        .map_err(|_| Error::DecryptError)
}

struct TestServerVerifier {
    server_public_key: Vec<u8>,
}

impl ServerCertVerifier for TestServerVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &str,
        _now: std::time::SystemTime,
    ) -> Result<ServerCertVerified, Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        _cert: &Certificate,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        check_ed25519(&self.server_public_key, message, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        _cert: &Certificate,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        check_ed25519(&self.server_public_key, message, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![SignatureScheme::ED25519]
    }
}

struct TestClientVerifier {
    client_public_key: Vec<u8>,
}

impl ClientCertVerifier for TestClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn verify_client_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _now: std::time::SystemTime,
    ) -> Result<ClientCertVerified, Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        _cert: &Certificate,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        check_ed25519(&self.client_public_key, message, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![SignatureScheme::ED25519]
    }
}

struct Identities {
    server: TestIdentity,
    client: TestIdentity,
}

impl Identities {
    fn new() -> Self {
        Self {
            server: TestIdentity::new(),
            client: TestIdentity::new(),
        }
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig::new(Arc::new(TestServerVerifier {
            server_public_key: self.server.public_key.clone(),
        }))
    }

    fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::new(NoClientAuth::new());
        config
            .set_single_cert(self.server.cert_chain(), self.server.private_key())
            .unwrap();
        config
    }
}

fn server_name() -> ServerName {
    ServerName::try_from("testserver.example").unwrap()
}

fn make_pair(
    client_config: ClientConfig,
    server_config: ServerConfig,
) -> (ClientConnection, ServerConnection) {
    let client = ClientConnection::new(Arc::new(client_config), server_name()).unwrap();
    let server = ServerConnection::new(Arc::new(server_config)).unwrap();
    (client, server)
}

/// Move all pending TLS bytes from `from` to `to`, returning how many
/// moved.  Optionally mutate the raw bytes in transit.
fn transfer_altered<FromC, FromData, ToC, ToData>(
    from: &mut FromC,
    to: &mut ToC,
    alter: impl Fn(&mut Vec<u8>),
) -> usize
where
    FromC: DerefMut + Deref<Target = ConnectionCommon<FromData>>,
    ToC: DerefMut + Deref<Target = ConnectionCommon<ToData>>,
{
    let mut buf = Vec::new();
    while from.wants_write() {
        from.write_tls(&mut buf).unwrap();
    }
    alter(&mut buf);

    let mut offs = 0;
    while offs < buf.len() {
        let mut rd = io::Cursor::new(&buf[offs..]);
        offs += to.read_tls(&mut rd).unwrap();
    }
    buf.len()
}

fn transfer<FromC, FromData, ToC, ToData>(from: &mut FromC, to: &mut ToC) -> usize
where
    FromC: DerefMut + Deref<Target = ConnectionCommon<FromData>>,
    ToC: DerefMut + Deref<Target = ConnectionCommon<ToData>>,
{
    transfer_altered(from, to, |_| ())
}

fn do_handshake(client: &mut ClientConnection, server: &mut ServerConnection) {
    while server.is_handshaking() || client.is_handshaking() {
        transfer(client, server);
        server.process_new_packets().unwrap();
        transfer(server, client);
        client.process_new_packets().unwrap();
    }
}

fn round_trip(client: &mut ClientConnection, server: &mut ServerConnection) {
    client.writer().write_all(b"ping").unwrap();
    transfer(client, server);
    server.process_new_packets().unwrap();

    let mut received = [0u8; 4];
    server.reader().read_exact(&mut received).unwrap();
    assert_eq!(&received, b"ping");

    server.writer().write_all(b"pong").unwrap();
    transfer(server, client);
    client.process_new_packets().unwrap();

    let mut received = [0u8; 4];
    client.reader().read_exact(&mut received).unwrap();
    assert_eq!(&received, b"pong");
}

#[test]
fn tls13_x25519_handshake_and_echo() {
    let ids = Identities::new();
    let mut client_config = ids.client_config();
    client_config.kx_groups = vec![&puffin_tls::kx::X25519];
    let mut server_config = ids.server_config();
    server_config.kx_groups = vec![&puffin_tls::kx::X25519];

    let (mut client, mut server) = make_pair(client_config, server_config);
    do_handshake(&mut client, &mut server);

    assert_eq!(client.protocol_version(), Some(ProtocolVersion::TLSv1_3));
    assert_eq!(server.protocol_version(), Some(ProtocolVersion::TLSv1_3));
    assert_eq!(
        client.negotiated_cipher_suite(),
        server.negotiated_cipher_suite(),
    );
    assert!(client.peer_certificates().is_some());

    round_trip(&mut client, &mut server);
}

#[test]
fn tls13_hello_retry_request_path() {
    let ids = Identities::new();
    let mut client_config = ids.client_config();
    // The client keyshares only its first preference...
    client_config.kx_groups = vec![&puffin_tls::kx::SECP256R1, &puffin_tls::kx::X25519];
    // ...which the server doesn't do: it asks for a retry with x25519.
    let mut server_config = ids.server_config();
    server_config.kx_groups = vec![&puffin_tls::kx::X25519];

    let (mut client, mut server) = make_pair(client_config, server_config);
    do_handshake(&mut client, &mut server);

    assert_eq!(client.protocol_version(), Some(ProtocolVersion::TLSv1_3));
    round_trip(&mut client, &mut server);
}

#[test]
fn tls12_handshake_with_extended_master_secret() {
    let ids = Identities::new();
    let mut client_config = ids.client_config();
    client_config.versions = vec![ProtocolVersion::TLSv1_2];
    client_config.require_ems = true;
    let mut server_config = ids.server_config();
    server_config.require_ems = true;

    let (mut client, mut server) = make_pair(client_config, server_config);
    do_handshake(&mut client, &mut server);

    assert_eq!(client.protocol_version(), Some(ProtocolVersion::TLSv1_2));
    assert_eq!(server.protocol_version(), Some(ProtocolVersion::TLSv1_2));
    round_trip(&mut client, &mut server);
}

#[test]
fn tls13_psk_resumption() {
    let ids = Identities::new();
    let client_config = Arc::new(ids.client_config());
    let mut server_config = ids.server_config();
    server_config.ticketer =
        AeadTicketer::new(6 * 60 * 60, Arc::new(RingRandom::default())).unwrap();
    let server_config = Arc::new(server_config);

    // First connection: a full handshake issuing a ticket.
    let mut client =
        ClientConnection::new(Arc::clone(&client_config), server_name()).unwrap();
    let mut server = ServerConnection::new(Arc::clone(&server_config)).unwrap();
    do_handshake(&mut client, &mut server);
    assert!(client.peer_certificates().is_some());

    // Flush the post-handshake NewSessionTicket to the client.
    transfer(&mut server, &mut client);
    client.process_new_packets().unwrap();

    // Second connection resumes: the server sends no certificate flight.
    let mut client2 =
        ClientConnection::new(Arc::clone(&client_config), server_name()).unwrap();
    let mut server2 = ServerConnection::new(Arc::clone(&server_config)).unwrap();
    do_handshake(&mut client2, &mut server2);

    assert!(client2.peer_certificates().is_none());
    assert!(client2.resumption_cipher_suite().is_some());
    round_trip(&mut client2, &mut server2);
}

#[test]
fn tls12_session_id_resumption() {
    let ids = Identities::new();
    let mut client_config = ids.client_config();
    client_config.versions = vec![ProtocolVersion::TLSv1_2];
    let client_config = Arc::new(client_config);
    let server_config = Arc::new(ids.server_config());

    let mut client =
        ClientConnection::new(Arc::clone(&client_config), server_name()).unwrap();
    let mut server = ServerConnection::new(Arc::clone(&server_config)).unwrap();
    do_handshake(&mut client, &mut server);
    assert!(client.peer_certificates().is_some());

    let mut client2 =
        ClientConnection::new(Arc::clone(&client_config), server_name()).unwrap();
    let mut server2 = ServerConnection::new(Arc::clone(&server_config)).unwrap();
    do_handshake(&mut client2, &mut server2);

    // No certificate flight on the abbreviated handshake.
    assert!(client2.peer_certificates().is_none());
    round_trip(&mut client2, &mut server2);
}

#[test]
fn tls12_ticket_resumption() {
    let ids = Identities::new();
    let mut client_config = ids.client_config();
    client_config.versions = vec![ProtocolVersion::TLSv1_2];
    let client_config = Arc::new(client_config);

    let mut server_config = ids.server_config();
    server_config.ticketer =
        AeadTicketer::new(6 * 60 * 60, Arc::new(RingRandom::default())).unwrap();
    let server_config = Arc::new(server_config);

    let mut client =
        ClientConnection::new(Arc::clone(&client_config), server_name()).unwrap();
    let mut server = ServerConnection::new(Arc::clone(&server_config)).unwrap();
    do_handshake(&mut client, &mut server);
    assert!(client.peer_certificates().is_some());

    let mut client2 =
        ClientConnection::new(Arc::clone(&client_config), server_name()).unwrap();
    let mut server2 = ServerConnection::new(Arc::clone(&server_config)).unwrap();
    do_handshake(&mut client2, &mut server2);

    assert!(client2.peer_certificates().is_none());
    round_trip(&mut client2, &mut server2);
}

#[test]
fn tls13_key_update() {
    let ids = Identities::new();
    let (mut client, mut server) = make_pair(ids.client_config(), ids.server_config());
    do_handshake(&mut client, &mut server);

    // Client updates its write keys and asks the server to do the same.
    client.send_key_update(true).unwrap();
    transfer(&mut client, &mut server);
    server.process_new_packets().unwrap();

    // The server's reply rotates its own write keys.
    transfer(&mut server, &mut client);
    client.process_new_packets().unwrap();

    // Traffic flows in both directions under the new keys.
    round_trip(&mut client, &mut server);
    round_trip(&mut client, &mut server);
}

#[test]
fn tls12_key_update_refused() {
    let ids = Identities::new();
    let mut client_config = ids.client_config();
    client_config.versions = vec![ProtocolVersion::TLSv1_2];
    let (mut client, mut server) = make_pair(client_config, ids.server_config());
    do_handshake(&mut client, &mut server);

    // KeyUpdate is a TLS1.3 construct.
    assert!(client.send_key_update(false).is_err());
}

#[test]
fn heartbeat_round_trip() {
    let ids = Identities::new();
    let mut client_config = ids.client_config();
    client_config.heartbeat_mode = Some(HeartbeatMode::PeerAllowedToSend);
    let mut server_config = ids.server_config();
    server_config.heartbeat_mode = Some(HeartbeatMode::PeerAllowedToSend);

    let (mut client, mut server) = make_pair(client_config, server_config);
    do_handshake(&mut client, &mut server);

    let echoed: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let echoed_in_cb = Arc::clone(&echoed);
    client.set_heartbeat_callback(Arc::new(move |payload: &[u8]| {
        *echoed_in_cb.lock().unwrap() = Some(payload.to_vec());
    }));

    client
        .send_heartbeat_request(&[0xaa, 0xbb], 18)
        .unwrap();
    transfer(&mut client, &mut server);
    server.process_new_packets().unwrap();

    transfer(&mut server, &mut client);
    client.process_new_packets().unwrap();

    assert_eq!(*echoed.lock().unwrap(), Some(vec![0xaa, 0xbb]));
}

#[test]
fn heartbeat_without_negotiation_is_refused() {
    let ids = Identities::new();
    let (mut client, mut server) = make_pair(ids.client_config(), ids.server_config());
    do_handshake(&mut client, &mut server);

    assert_eq!(
        client.send_heartbeat_request(&[1, 2, 3], 16),
        Err(Error::HeartbeatNotNegotiated)
    );
}

#[test]
fn corrupt_record_fails_with_bad_record_mac() {
    use puffin_tls::AlertDescription;

    let ids = Identities::new();
    let (mut client, mut server) = make_pair(ids.client_config(), ids.server_config());
    do_handshake(&mut client, &mut server);

    client.writer().write_all(b"ping").unwrap();
    // Flip one bit inside the record body (past the 5-byte header).
    transfer_altered(&mut client, &mut server, |bytes| {
        let index = bytes.len() - 1;
        bytes[index] ^= 0x01;
    });

    assert_eq!(
        server.process_new_packets(),
        Err(Error::DecryptError)
    );

    // The server emitted bad_record_mac on its way down.
    transfer(&mut server, &mut client);
    assert_eq!(
        client.process_new_packets(),
        Err(Error::AlertReceived(AlertDescription::BadRecordMac))
    );
}

#[test]
fn close_notify_is_clean_eof_and_idempotent() {
    let ids = Identities::new();
    let (mut client, mut server) = make_pair(ids.client_config(), ids.server_config());
    do_handshake(&mut client, &mut server);

    client.writer().write_all(b"bye").unwrap();
    client.send_close_notify();

    // Drain everything the close produced; a second close must
    // produce nothing further.
    let mut wire = Vec::new();
    while client.wants_write() {
        client.write_tls(&mut wire).unwrap();
    }
    client.send_close_notify();
    assert!(!client.wants_write());

    let mut rd = io::Cursor::new(&wire);
    while (rd.position() as usize) < wire.len() {
        server.read_tls(&mut rd).unwrap();
    }
    let io_state = server.process_new_packets().unwrap();
    assert!(io_state.peer_has_closed());

    let mut buf = Vec::new();
    server.reader().read_to_end(&mut buf).unwrap();
    assert_eq!(buf, b"bye");
}

#[test]
fn downgrade_sentinel_aborts_when_tls13_offered() {
    let ids = Identities::new();

    // Client offers 1.3+1.2; a middle box rewrites the 1.2 server's
    // random to carry the downgrade sentinel.
    let client_config = ids.client_config();
    let mut server_config = ids.server_config();
    server_config.versions = vec![ProtocolVersion::TLSv1_2];

    let (mut client, mut server) = make_pair(client_config, server_config);

    transfer(&mut client, &mut server);
    server.process_new_packets().unwrap();

    // ServerHello starts the first record: 5 bytes record header,
    // 4 bytes handshake header, 2 bytes version; the random's final
    // 8 bytes then live at offset 35.
    transfer_altered(&mut server, &mut client, |bytes| {
        bytes[35..43].copy_from_slice(&[0x44, 0x4f, 0x57, 0x4e, 0x47, 0x52, 0x44, 0x01]);
    });

    assert!(matches!(
        client.process_new_packets(),
        Err(Error::PeerMisbehavedError(_))
    ));
}

#[test]
fn tls13_client_auth() {
    let ids = Identities::new();

    let mut client_config = ids.client_config();
    client_config
        .set_single_client_cert(ids.client.cert_chain(), ids.client.private_key())
        .unwrap();

    let mut server_config = ServerConfig::new(Arc::new(TestClientVerifier {
        client_public_key: ids.client.public_key.clone(),
    }));
    server_config
        .set_single_cert(ids.server.cert_chain(), ids.server.private_key())
        .unwrap();

    let (mut client, mut server) = make_pair(client_config, server_config);
    do_handshake(&mut client, &mut server);

    assert_eq!(client.protocol_version(), Some(ProtocolVersion::TLSv1_3));
    assert!(server.peer_certificates().is_some());
    round_trip(&mut client, &mut server);
}

#[test]
fn tls12_chacha20_suite() {
    let ids = Identities::new();
    let mut client_config = ids.client_config();
    client_config.versions = vec![ProtocolVersion::TLSv1_2];
    client_config.cipher_suites =
        vec![puffin_tls::suites::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256];

    let (mut client, mut server) = make_pair(client_config, ids.server_config());
    do_handshake(&mut client, &mut server);

    assert_eq!(
        client
            .negotiated_cipher_suite()
            .map(|suite| suite.suite()),
        Some(puffin_tls::CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256)
    );
    round_trip(&mut client, &mut server);
}

#[test]
fn large_writes_fragment_and_reassemble() {
    let ids = Identities::new();
    let (mut client, mut server) = make_pair(ids.client_config(), ids.server_config());
    do_handshake(&mut client, &mut server);

    // More than one maximum-size fragment, of uncompressible content.
    let body: Vec<u8> = (0..40_000).map(|_| rand::random::<u8>()).collect();
    let mut sent = 0;
    while sent < body.len() {
        sent += client.writer().write(&body[sent..]).unwrap();
        transfer(&mut client, &mut server);
        server.process_new_packets().unwrap();
    }

    let mut received = Vec::new();
    while received.len() < body.len() {
        let mut chunk = [0u8; 8192];
        match server.reader().read(&mut chunk) {
            Ok(n) => received.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => panic!("read failed: {}", e),
        }
    }
    assert_eq!(received, body);
}
