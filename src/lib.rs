//! A pure-Rust TLS 1.2/1.3 protocol engine.
//!
//! The crate drives full TLS handshakes for both clients and servers,
//! negotiates cipher suites and key-exchange groups, installs traffic
//! secrets, protects records, and exposes a duplex byte stream to the
//! application.  IO is the caller's problem: ciphertext moves through
//! [`ConnectionCommon::read_tls`]/[`ConnectionCommon::write_tls`] (or
//! the [`Stream`] convenience adapter), and the engine never blocks.
//!
//! Cryptographic primitives come from *ring*; certificate path
//! validation is delegated to *webpki* behind the
//! [`verify::ServerCertVerifier`] / [`verify::ClientCertVerifier`]
//! seams.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::net::TcpStream;
//! use std::io::{Read, Write};
//!
//! let mut roots = puffin_tls::RootCertStore::empty();
//! // ... add trust anchors to `roots` ...
//! let config = puffin_tls::ClientConfig::new(Arc::new(
//!     puffin_tls::verify::WebPkiVerifier::new(roots),
//! ));
//!
//! let name = puffin_tls::ServerName::try_from("example.com").unwrap();
//! let mut conn = puffin_tls::ClientConnection::new(Arc::new(config), name).unwrap();
//! let mut sock = TcpStream::connect("example.com:443").unwrap();
//! let mut tls = puffin_tls::Stream::new(&mut conn, &mut sock);
//! tls.write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();
//! let mut plaintext = Vec::new();
//! let _ = tls.read_to_end(&mut plaintext);
//! ```

// Require docs for public APIs, deny unsafe code, etc.
#![forbid(unsafe_code)]
#![warn(clippy::use_self)]
#![allow(clippy::new_without_default)]

mod check;

/// Buffering and chunking of plaintext/ciphertext.
mod vecbuf;

/// Wire message layer: codec, framing, every message and extension.
pub mod msgs {
    #[macro_use]
    mod macros;

    pub mod alert;
    pub mod base;
    pub mod ccs;
    pub mod codec;
    pub mod deframer;
    pub mod enums;
    pub mod fragmenter;
    pub mod handshake;
    pub mod heartbeat;
    pub mod hsjoiner;
    pub mod message;
    pub mod persist;
}

mod cipher;
mod conn;
/// The typed error surfaced by every fallible operation.
pub mod error;
mod hash_hs;
/// Certificate and private key types.
pub mod key;
mod key_schedule;
/// Supported key-exchange groups.
pub mod kx;
mod prf;
mod rand;
mod record_layer;
/// Signing key loading and per-connection signers.
pub mod sign;
/// Cipher suite descriptors and tables.
pub mod suites;
/// TLS 1.3 session ticket production.
pub mod ticketer;
mod tls12;
/// Certificate chain and handshake-signature verification seams.
pub mod verify;

/// The TLS client machinery.
pub mod client;
/// The TLS server machinery.
pub mod server;

mod stream;

pub use crate::client::{
    ClientConfig, ClientConnection, ClientSessionMemoryCache, NoClientSessionStorage,
    ResolvesClientCert, ServerName, StoresClientSessions,
};
pub use crate::conn::{
    CommonState, ConnectionCommon, HeartbeatCallback, IoState, Reader, Writer,
};
pub use crate::error::Error;
pub use crate::key::{Certificate, PrivateKey};
pub use crate::msgs::enums::{
    AlertDescription, CipherSuite, ContentType, HandshakeType, HeartbeatMode, NamedGroup,
    ProtocolVersion, SignatureAlgorithm, SignatureScheme,
};
pub use crate::rand::{RandomSource, RingRandom};
pub use crate::server::{
    ClientHello, NoServerSessionStorage, ResolvesServerCert, ServerConfig, ServerConnection,
    ServerSessionMemoryCache, StoresServerSessions,
};
pub use crate::stream::{Stream, StreamOwned};
pub use crate::suites::{
    BulkAlgorithm, SupportedCipherSuite, ALL_CIPHER_SUITES, DEFAULT_CIPHER_SUITES,
};
pub use crate::ticketer::{AeadTicketer, ProducesTickets, TimeBase};
pub use crate::verify::{OwnedTrustAnchor, RootCertStore, WebPkiVerifier};

/// A TLS connection, client or server.
///
/// This is useful for code which operates on connections without caring
/// which side they are: most of the common API is reachable through the
/// `Deref` to [`ConnectionCommon`]'s shared surface via the inner types,
/// or through the dispatching methods here.
pub enum Connection {
    /// A client connection
    Client(ClientConnection),
    /// A server connection
    Server(ServerConnection),
}

impl Connection {
    /// Read TLS content from `rd`.
    pub fn read_tls(&mut self, rd: &mut dyn std::io::Read) -> Result<usize, std::io::Error> {
        match self {
            Self::Client(conn) => conn.read_tls(rd),
            Self::Server(conn) => conn.read_tls(rd),
        }
    }

    /// Writes TLS messages to `wr`.
    pub fn write_tls(&mut self, wr: &mut dyn std::io::Write) -> Result<usize, std::io::Error> {
        match self {
            Self::Client(conn) => conn.write_tls(wr),
            Self::Server(conn) => conn.write_tls(wr),
        }
    }

    /// Processes any new packets read by a previous call to `read_tls`.
    pub fn process_new_packets(&mut self) -> Result<IoState, Error> {
        match self {
            Self::Client(conn) => conn.process_new_packets(),
            Self::Server(conn) => conn.process_new_packets(),
        }
    }

    /// Returns an object that allows reading plaintext.
    pub fn reader(&mut self) -> Reader {
        match self {
            Self::Client(conn) => conn.reader(),
            Self::Server(conn) => conn.reader(),
        }
    }

    /// Returns an object that allows writing plaintext.
    pub fn writer(&mut self) -> Writer {
        match self {
            Self::Client(conn) => conn.writer(),
            Self::Server(conn) => conn.writer(),
        }
    }

    /// Sends a close_notify warning alert.  Idempotent.
    pub fn send_close_notify(&mut self) {
        match self {
            Self::Client(conn) => conn.send_close_notify(),
            Self::Server(conn) => conn.send_close_notify(),
        }
    }
}

impl From<ClientConnection> for Connection {
    fn from(conn: ClientConnection) -> Self {
        Self::Client(conn)
    }
}

impl From<ServerConnection> for Connection {
    fn from(conn: ServerConnection) -> Self {
        Self::Server(conn)
    }
}

impl std::ops::Deref for Connection {
    type Target = CommonState;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Client(conn) => conn,
            Self::Server(conn) => conn,
        }
    }
}
