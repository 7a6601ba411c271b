use crate::msgs::base::{PayloadU16, PayloadU8};
use crate::msgs::codec::{Codec, Reader};
use crate::msgs::enums::{CipherSuite, ProtocolVersion};
use crate::msgs::handshake::SessionID;
use crate::ticketer::TimeBase;

/// The keys we use to index the client session cache: a tag plus the
/// server's name.
#[derive(Debug)]
pub struct ClientSessionKey {
    kind: &'static [u8],
    dns_name: Vec<u8>,
}

impl Codec for ClientSessionKey {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(self.kind);
        bytes.extend_from_slice(&self.dns_name);
    }

    // Don't need to read these.
    fn read(_r: &mut Reader) -> Option<Self> {
        None
    }
}

impl ClientSessionKey {
    pub fn session_for_dns_name(dns_name: &str) -> Self {
        Self {
            kind: b"session",
            dns_name: dns_name.as_bytes().to_vec(),
        }
    }
}

/// A TLS1.2 session, as remembered by a client.
#[derive(Clone, Debug)]
pub struct Tls12ClientSessionValue {
    pub cipher_suite: CipherSuite,
    pub session_id: SessionID,
    pub ticket: PayloadU16,
    pub master_secret: PayloadU8,
    pub epoch: u64,
    pub lifetime_secs: u32,
    pub extended_ms: bool,
}

impl Tls12ClientSessionValue {
    pub fn new(
        cipher_suite: CipherSuite,
        session_id: SessionID,
        ticket: Vec<u8>,
        master_secret: Vec<u8>,
        time_now: TimeBase,
        lifetime_secs: u32,
        extended_ms: bool,
    ) -> Self {
        Self {
            cipher_suite,
            session_id,
            ticket: PayloadU16::new(ticket),
            master_secret: PayloadU8::new(master_secret),
            epoch: time_now.as_secs(),
            lifetime_secs,
            extended_ms,
        }
    }

    pub fn has_expired(&self, time_now: TimeBase) -> bool {
        self.lifetime_secs != 0 && self.epoch + u64::from(self.lifetime_secs) < time_now.as_secs()
    }

    pub fn take_ticket(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.ticket.0)
    }

    pub fn set_session_id(&mut self, id: SessionID) {
        self.session_id = id;
    }
}

impl Codec for Tls12ClientSessionValue {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.cipher_suite.encode(bytes);
        self.session_id.encode(bytes);
        self.ticket.encode(bytes);
        self.master_secret.encode(bytes);
        self.epoch.encode(bytes);
        self.lifetime_secs.encode(bytes);
        (u8::from(self.extended_ms)).encode(bytes);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        Some(Self {
            cipher_suite: CipherSuite::read(r)?,
            session_id: SessionID::read(r)?,
            ticket: PayloadU16::read(r)?,
            master_secret: PayloadU8::read(r)?,
            epoch: u64::read(r)?,
            lifetime_secs: u32::read(r)?,
            extended_ms: u8::read(r)? == 1,
        })
    }
}

/// A TLS1.3 session: a ticket and the secret to derive its PSK, as
/// remembered by a client.
#[derive(Clone, Debug)]
pub struct Tls13ClientSessionValue {
    pub cipher_suite: CipherSuite,
    pub ticket: PayloadU16,
    pub secret: PayloadU8,
    pub epoch: u64,
    pub lifetime_secs: u32,
    pub age_add: u32,
    pub max_early_data_size: u32,
}

impl Tls13ClientSessionValue {
    pub fn new(
        cipher_suite: CipherSuite,
        ticket: Vec<u8>,
        secret: Vec<u8>,
        time_now: TimeBase,
        lifetime_secs: u32,
        age_add: u32,
        max_early_data_size: u32,
    ) -> Self {
        Self {
            cipher_suite,
            ticket: PayloadU16::new(ticket),
            secret: PayloadU8::new(secret),
            epoch: time_now.as_secs(),
            lifetime_secs,
            age_add,
            max_early_data_size,
        }
    }

    pub fn has_expired(&self, time_now: TimeBase) -> bool {
        self.lifetime_secs != 0 && self.epoch + u64::from(self.lifetime_secs) < time_now.as_secs()
    }

    /// The "obfuscated ticket age" the peer uses to check ticket
    /// freshness without a shared clock.
    pub fn obfuscated_ticket_age(&self, time_now: TimeBase) -> u32 {
        let age_secs = time_now.as_secs().saturating_sub(self.epoch);
        let age_millis = (age_secs as u32).saturating_mul(1000);
        age_millis.wrapping_add(self.age_add)
    }
}

impl Codec for Tls13ClientSessionValue {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.cipher_suite.encode(bytes);
        self.ticket.encode(bytes);
        self.secret.encode(bytes);
        self.epoch.encode(bytes);
        self.lifetime_secs.encode(bytes);
        self.age_add.encode(bytes);
        self.max_early_data_size.encode(bytes);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        Some(Self {
            cipher_suite: CipherSuite::read(r)?,
            ticket: PayloadU16::read(r)?,
            secret: PayloadU8::read(r)?,
            epoch: u64::read(r)?,
            lifetime_secs: u32::read(r)?,
            age_add: u32::read(r)?,
            max_early_data_size: u32::read(r)?,
        })
    }
}

/// A value stored in the client session cache: either version's session.
#[derive(Clone, Debug)]
pub enum ClientSessionValue {
    Tls12(Tls12ClientSessionValue),
    Tls13(Tls13ClientSessionValue),
}

impl ClientSessionValue {
    pub fn cipher_suite(&self) -> CipherSuite {
        match self {
            Self::Tls12(inner) => inner.cipher_suite,
            Self::Tls13(inner) => inner.cipher_suite,
        }
    }
}

impl Codec for ClientSessionValue {
    fn encode(&self, bytes: &mut Vec<u8>) {
        match self {
            Self::Tls12(inner) => {
                ProtocolVersion::TLSv1_2.encode(bytes);
                inner.encode(bytes);
            }
            Self::Tls13(inner) => {
                ProtocolVersion::TLSv1_3.encode(bytes);
                inner.encode(bytes);
            }
        }
    }

    fn read(r: &mut Reader) -> Option<Self> {
        match ProtocolVersion::read(r)? {
            ProtocolVersion::TLSv1_2 => Tls12ClientSessionValue::read(r).map(Self::Tls12),
            ProtocolVersion::TLSv1_3 => Tls13ClientSessionValue::read(r).map(Self::Tls13),
            _ => None,
        }
    }
}

/// The server's copy of a resumable session: what goes inside a
/// sealed ticket, and into the session-id cache.
#[derive(Clone, Debug)]
pub struct ServerSessionValue {
    pub sni: Option<PayloadU8>,
    pub version: ProtocolVersion,
    pub cipher_suite: CipherSuite,
    pub master_secret: PayloadU8,
    pub extended_ms: bool,
    pub client_cert_chain: Option<Vec<crate::key::Certificate>>,
    pub alpn: Option<PayloadU8>,
}

impl ServerSessionValue {
    pub fn new(
        sni: Option<&str>,
        version: ProtocolVersion,
        cipher_suite: CipherSuite,
        master_secret: Vec<u8>,
        extended_ms: bool,
        client_cert_chain: Option<Vec<crate::key::Certificate>>,
        alpn: Option<Vec<u8>>,
    ) -> Self {
        Self {
            sni: sni.map(|s| PayloadU8::new(s.as_bytes().to_vec())),
            version,
            cipher_suite,
            master_secret: PayloadU8::new(master_secret),
            extended_ms,
            client_cert_chain,
            alpn: alpn.map(PayloadU8::new),
        }
    }
}

impl Codec for ServerSessionValue {
    fn encode(&self, bytes: &mut Vec<u8>) {
        match &self.sni {
            Some(sni) => {
                1u8.encode(bytes);
                sni.encode(bytes);
            }
            None => 0u8.encode(bytes),
        }
        self.version.encode(bytes);
        self.cipher_suite.encode(bytes);
        self.master_secret.encode(bytes);
        (u8::from(self.extended_ms)).encode(bytes);
        match &self.client_cert_chain {
            Some(chain) => {
                1u8.encode(bytes);
                crate::msgs::codec::encode_vec_u24(bytes, chain);
            }
            None => 0u8.encode(bytes),
        }
        match &self.alpn {
            Some(alpn) => {
                1u8.encode(bytes);
                alpn.encode(bytes);
            }
            None => 0u8.encode(bytes),
        }
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let sni = match u8::read(r)? {
            1 => Some(PayloadU8::read(r)?),
            _ => None,
        };
        let version = ProtocolVersion::read(r)?;
        let cipher_suite = CipherSuite::read(r)?;
        let master_secret = PayloadU8::read(r)?;
        let extended_ms = u8::read(r)? == 1;
        let client_cert_chain = match u8::read(r)? {
            1 => Some(crate::msgs::codec::read_vec_u24_limited(r, 0x10000)?),
            _ => None,
        };
        let alpn = match u8::read(r)? {
            1 => Some(PayloadU8::read(r)?),
            _ => None,
        };

        Some(Self {
            sni,
            version,
            cipher_suite,
            master_secret,
            extended_ms,
            client_cert_chain,
            alpn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_value_round_trips() {
        let v = ClientSessionValue::Tls13(Tls13ClientSessionValue::new(
            CipherSuite::TLS13_AES_128_GCM_SHA256,
            vec![1, 2, 3],
            vec![9; 32],
            TimeBase::from_secs(1000),
            7200,
            0xdeadbeef,
            0,
        ));

        let enc = v.get_encoding();
        let parsed = ClientSessionValue::read_bytes(&enc).unwrap();
        assert_eq!(parsed.get_encoding(), enc);
    }

    #[test]
    fn expiry_includes_lifetime() {
        let v = Tls13ClientSessionValue::new(
            CipherSuite::TLS13_AES_128_GCM_SHA256,
            vec![],
            vec![],
            TimeBase::from_secs(1000),
            10,
            0,
            0,
        );
        assert!(!v.has_expired(TimeBase::from_secs(1005)));
        assert!(v.has_expired(TimeBase::from_secs(1011)));
    }

    #[test]
    fn obfuscated_age_adds_age_add() {
        let v = Tls13ClientSessionValue::new(
            CipherSuite::TLS13_AES_128_GCM_SHA256,
            vec![],
            vec![],
            TimeBase::from_secs(1000),
            7200,
            100,
            0,
        );
        assert_eq!(v.obfuscated_ticket_age(TimeBase::from_secs(1002)), 2100);
    }

    #[test]
    fn server_value_round_trips() {
        let v = ServerSessionValue::new(
            Some("the.server"),
            ProtocolVersion::TLSv1_2,
            CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            vec![0x55; 48],
            true,
            None,
            Some(b"h2".to_vec()),
        );
        let enc = v.get_encoding();
        let parsed = ServerSessionValue::read_bytes(&enc).unwrap();
        assert_eq!(parsed.get_encoding(), enc);
        assert!(parsed.extended_ms);
    }
}
