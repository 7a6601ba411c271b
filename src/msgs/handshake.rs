use crate::key;
use crate::msgs::base::{Payload, PayloadU16, PayloadU24, PayloadU8};
use crate::msgs::codec;
use crate::msgs::codec::{Codec, Reader};
use crate::msgs::enums::{
    CipherSuite, ClientCertificateType, Compression, ContentType, ECCurveType, ECPointFormat,
    ExtensionType, HandshakeType, HeartbeatMode, KeyUpdateRequest, NamedGroup, PSKKeyExchangeMode,
    ProtocolVersion, ServerNameType, SignatureScheme,
};

use std::collections;
use std::fmt;

/// Create a newtype wrapper around a given type.
///
/// This is used to create newtypes for the various TLS message types which is used to wrap
/// the `PayloadU8` or `PayloadU16` types. This is typically used for types where we don't need
/// anything but access to the underlying bytes.
macro_rules! wrapped_payload(
  ($(#[$comment:meta])* $name:ident, $inner:ident,) => {
    $(#[$comment])*
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct $name($inner);

    impl From<Vec<u8>> for $name {
        fn from(v: Vec<u8>) -> Self {
            Self($inner::new(v))
        }
    }

    impl AsRef<[u8]> for $name {
        fn as_ref(&self) -> &[u8] {
            self.0.0.as_slice()
        }
    }

    impl Codec for $name {
        fn encode(&self, bytes: &mut Vec<u8>) {
            self.0.encode(bytes);
        }

        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self($inner::read(r)?))
        }
    }
  }
);

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Random(pub [u8; 32]);

static HELLO_RETRY_REQUEST_RANDOM: Random = Random([
    0xcf, 0x21, 0xad, 0x74, 0xe5, 0x9a, 0x61, 0x11, 0xbe, 0x1d, 0x8c, 0x02, 0x1e, 0x65, 0xb8,
    0x91, 0xc2, 0xa2, 0x11, 0x16, 0x7a, 0xbb, 0x8c, 0x5e, 0x07, 0x9e, 0x09, 0xe2, 0xc8, 0xa8,
    0x33, 0x9c,
]);

static ZERO_RANDOM: Random = Random([0u8; 32]);

impl Codec for Random {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.0);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let bytes = r.take(32)?;
        let mut opaque = [0; 32];
        opaque.clone_from_slice(bytes);
        Some(Self(opaque))
    }
}

impl Random {
    pub fn write_slice(&self, bytes: &mut [u8]) {
        bytes.copy_from_slice(&self.0);
    }
}

impl From<[u8; 32]> for Random {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Random {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct SessionID {
    len: usize,
    data: [u8; 32],
}

impl fmt::Debug for SessionID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for b in &self.data[..self.len] {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl Codec for SessionID {
    fn encode(&self, bytes: &mut Vec<u8>) {
        debug_assert!(self.len <= 32);
        bytes.push(self.len as u8);
        bytes.extend_from_slice(self.as_ref());
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let len = u8::read(r)? as usize;
        if len > 32 {
            return None;
        }

        let bytes = r.take(len)?;
        let mut out = [0u8; 32];
        out[..len].clone_from_slice(&bytes[..len]);

        Some(Self { data: out, len })
    }
}

impl SessionID {
    pub fn new(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() <= 32);
        let mut data = [0u8; 32];
        data[..bytes.len()].copy_from_slice(bytes);
        Self {
            data,
            len: bytes.len(),
        }
    }

    pub fn empty() -> Self {
        Self {
            data: [0u8; 32],
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRef<[u8]> for SessionID {
    fn as_ref(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnknownExtension {
    pub typ: ExtensionType,
    pub payload: Payload,
}

impl UnknownExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.payload.encode(bytes);
    }

    fn read(typ: ExtensionType, r: &mut Reader) -> Self {
        let payload = Payload::read(r);
        Self { typ, payload }
    }
}

wrapped_payload!(ProtocolName, PayloadU8,);

pub type ProtocolNameList = Vec<ProtocolName>;

pub trait ConvertProtocolNameList {
    fn from_slices(names: &[&[u8]]) -> Self;
    fn to_vecs(&self) -> Vec<Vec<u8>>;
    fn as_single_slice(&self) -> Option<&[u8]>;
}

impl ConvertProtocolNameList for ProtocolNameList {
    fn from_slices(names: &[&[u8]]) -> Self {
        let mut ret = Self::new();

        for name in names {
            ret.push(ProtocolName::from(name.to_vec()));
        }

        ret
    }

    fn to_vecs(&self) -> Vec<Vec<u8>> {
        self.iter()
            .map(|proto| proto.as_ref().to_vec())
            .collect()
    }

    fn as_single_slice(&self) -> Option<&[u8]> {
        if self.len() == 1 {
            Some(self[0].as_ref())
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyShareEntry {
    pub group: NamedGroup,
    pub payload: PayloadU16,
}

impl KeyShareEntry {
    pub fn new(group: NamedGroup, payload: &[u8]) -> Self {
        Self {
            group,
            payload: PayloadU16::new(payload.to_vec()),
        }
    }
}

impl Codec for KeyShareEntry {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.group.encode(bytes);
        self.payload.encode(bytes);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let group = NamedGroup::read(r)?;
        let payload = PayloadU16::read(r)?;

        Some(Self { group, payload })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PresharedKeyIdentity {
    pub identity: PayloadU16,
    pub obfuscated_ticket_age: u32,
}

impl PresharedKeyIdentity {
    pub fn new(id: Vec<u8>, age: u32) -> Self {
        Self {
            identity: PayloadU16::new(id),
            obfuscated_ticket_age: age,
        }
    }
}

impl Codec for PresharedKeyIdentity {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.identity.encode(bytes);
        self.obfuscated_ticket_age.encode(bytes);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        Some(Self {
            identity: PayloadU16::read(r)?,
            obfuscated_ticket_age: u32::read(r)?,
        })
    }
}

wrapped_payload!(PresharedKeyBinder, PayloadU8,);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PresharedKeyOffer {
    pub identities: Vec<PresharedKeyIdentity>,
    pub binders: Vec<PresharedKeyBinder>,
}

impl PresharedKeyOffer {
    /// Make a new one with one entry.
    pub fn new(id: PresharedKeyIdentity, binder: Vec<u8>) -> Self {
        Self {
            identities: vec![id],
            binders: vec![PresharedKeyBinder::from(binder)],
        }
    }
}

impl Codec for PresharedKeyOffer {
    fn encode(&self, bytes: &mut Vec<u8>) {
        codec::encode_vec_u16(bytes, &self.identities);
        codec::encode_vec_u16(bytes, &self.binders);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        Some(Self {
            identities: codec::read_vec_u16(r)?,
            binders: codec::read_vec_u16(r)?,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ServerNamePayload {
    HostName(PayloadU16),
    Unknown(Payload),
}

impl ServerNamePayload {
    pub fn new_hostname(hostname: Vec<u8>) -> Self {
        Self::HostName(PayloadU16::new(hostname))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerName {
    pub typ: ServerNameType,
    pub payload: ServerNamePayload,
}

impl Codec for ServerName {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.typ.encode(bytes);

        match self.payload {
            ServerNamePayload::HostName(ref name) => name.encode(bytes),
            ServerNamePayload::Unknown(ref payload) => payload.encode(bytes),
        }
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let typ = ServerNameType::read(r)?;

        let payload = match typ {
            ServerNameType::HostName => ServerNamePayload::HostName(PayloadU16::read(r)?),
            _ => ServerNamePayload::Unknown(Payload::read(r)),
        };

        Some(Self { typ, payload })
    }
}

pub type ServerNameRequest = Vec<ServerName>;

pub trait ConvertServerNameList {
    fn get_single_hostname(&self) -> Option<&[u8]>;
}

impl ConvertServerNameList for ServerNameRequest {
    fn get_single_hostname(&self) -> Option<&[u8]> {
        for name in self {
            if let ServerNamePayload::HostName(ref host) = name.payload {
                return Some(&host.0);
            }
        }

        None
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClientSessionTicket {
    Request,
    Offer(Payload),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClientExtension {
    ECPointFormats(Vec<ECPointFormat>),
    NamedGroups(Vec<NamedGroup>),
    SignatureAlgorithms(Vec<SignatureScheme>),
    ServerName(ServerNameRequest),
    SessionTicket(ClientSessionTicket),
    Protocols(ProtocolNameList),
    SupportedVersions(Vec<ProtocolVersion>),
    KeyShare(Vec<KeyShareEntry>),
    PresharedKeyModes(Vec<PSKKeyExchangeMode>),
    PresharedKey(PresharedKeyOffer),
    Cookie(PayloadU16),
    ExtendedMasterSecretRequest,
    EncryptThenMacRequest,
    Heartbeat(HeartbeatMode),
    Unknown(UnknownExtension),
}

impl ClientExtension {
    pub fn get_type(&self) -> ExtensionType {
        match *self {
            Self::ECPointFormats(_) => ExtensionType::ECPointFormats,
            Self::NamedGroups(_) => ExtensionType::EllipticCurves,
            Self::SignatureAlgorithms(_) => ExtensionType::SignatureAlgorithms,
            Self::ServerName(_) => ExtensionType::ServerName,
            Self::SessionTicket(_) => ExtensionType::SessionTicket,
            Self::Protocols(_) => ExtensionType::ALProtocolNegotiation,
            Self::SupportedVersions(_) => ExtensionType::SupportedVersions,
            Self::KeyShare(_) => ExtensionType::KeyShare,
            Self::PresharedKeyModes(_) => ExtensionType::PSKKeyExchangeModes,
            Self::PresharedKey(_) => ExtensionType::PreSharedKey,
            Self::Cookie(_) => ExtensionType::Cookie,
            Self::ExtendedMasterSecretRequest => ExtensionType::ExtendedMasterSecret,
            Self::EncryptThenMacRequest => ExtensionType::EncryptThenMAC,
            Self::Heartbeat(_) => ExtensionType::Heartbeat,
            Self::Unknown(ref r) => r.typ,
        }
    }

    pub fn make_sni(hostname: &str) -> Self {
        let name = ServerName {
            typ: ServerNameType::HostName,
            payload: ServerNamePayload::new_hostname(hostname.as_bytes().to_vec()),
        };

        Self::ServerName(vec![name])
    }
}

impl Codec for ClientExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.get_type().encode(bytes);

        let mut sub: Vec<u8> = Vec::new();
        match *self {
            Self::ECPointFormats(ref r) => codec::encode_vec_u8(&mut sub, r),
            Self::NamedGroups(ref r) => codec::encode_vec_u16(&mut sub, r),
            Self::SignatureAlgorithms(ref r) => codec::encode_vec_u16(&mut sub, r),
            Self::ServerName(ref r) => codec::encode_vec_u16(&mut sub, r),
            Self::SessionTicket(ClientSessionTicket::Request) => {}
            Self::SessionTicket(ClientSessionTicket::Offer(ref r)) => r.encode(&mut sub),
            Self::Protocols(ref r) => codec::encode_vec_u16(&mut sub, r),
            Self::SupportedVersions(ref r) => codec::encode_vec_u8(&mut sub, r),
            Self::KeyShare(ref r) => codec::encode_vec_u16(&mut sub, r),
            Self::PresharedKeyModes(ref r) => codec::encode_vec_u8(&mut sub, r),
            Self::PresharedKey(ref r) => r.encode(&mut sub),
            Self::Cookie(ref r) => r.encode(&mut sub),
            Self::ExtendedMasterSecretRequest | Self::EncryptThenMacRequest => {}
            Self::Heartbeat(ref r) => r.encode(&mut sub),
            Self::Unknown(ref r) => r.encode(&mut sub),
        }

        (sub.len() as u16).encode(bytes);
        bytes.append(&mut sub);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let typ = ExtensionType::read(r)?;
        let len = u16::read(r)? as usize;
        let mut sub = r.sub(len)?;

        let ext = match typ {
            ExtensionType::ECPointFormats => Self::ECPointFormats(codec::read_vec_u8(&mut sub)?),
            ExtensionType::EllipticCurves => Self::NamedGroups(codec::read_vec_u16(&mut sub)?),
            ExtensionType::SignatureAlgorithms => {
                Self::SignatureAlgorithms(codec::read_vec_u16(&mut sub)?)
            }
            ExtensionType::ServerName => Self::ServerName(codec::read_vec_u16(&mut sub)?),
            ExtensionType::SessionTicket => {
                if sub.any_left() {
                    let contents = Payload::read(&mut sub);
                    Self::SessionTicket(ClientSessionTicket::Offer(contents))
                } else {
                    Self::SessionTicket(ClientSessionTicket::Request)
                }
            }
            ExtensionType::ALProtocolNegotiation => {
                Self::Protocols(codec::read_vec_u16(&mut sub)?)
            }
            ExtensionType::SupportedVersions => {
                Self::SupportedVersions(codec::read_vec_u8(&mut sub)?)
            }
            ExtensionType::KeyShare => Self::KeyShare(codec::read_vec_u16(&mut sub)?),
            ExtensionType::PSKKeyExchangeModes => {
                Self::PresharedKeyModes(codec::read_vec_u8(&mut sub)?)
            }
            ExtensionType::PreSharedKey => Self::PresharedKey(PresharedKeyOffer::read(&mut sub)?),
            ExtensionType::Cookie => Self::Cookie(PayloadU16::read(&mut sub)?),
            ExtensionType::ExtendedMasterSecret if !sub.any_left() => {
                Self::ExtendedMasterSecretRequest
            }
            ExtensionType::EncryptThenMAC if !sub.any_left() => Self::EncryptThenMacRequest,
            ExtensionType::Heartbeat => Self::Heartbeat(HeartbeatMode::read(&mut sub)?),
            _ => Self::Unknown(UnknownExtension::read(typ, &mut sub)),
        };

        if sub.any_left() {
            None
        } else {
            Some(ext)
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ServerExtension {
    ECPointFormats(Vec<ECPointFormat>),
    ServerNameAck,
    SessionTicketAck,
    RenegotiationInfo(PayloadU8),
    Protocols(ProtocolNameList),
    KeyShare(KeyShareEntry),
    PresharedKey(u16),
    ExtendedMasterSecretAck,
    EncryptThenMacAck,
    SupportedVersions(ProtocolVersion),
    Heartbeat(HeartbeatMode),
    Unknown(UnknownExtension),
}

impl ServerExtension {
    pub fn get_type(&self) -> ExtensionType {
        match *self {
            Self::ECPointFormats(_) => ExtensionType::ECPointFormats,
            Self::ServerNameAck => ExtensionType::ServerName,
            Self::SessionTicketAck => ExtensionType::SessionTicket,
            Self::RenegotiationInfo(_) => ExtensionType::RenegotiationInfo,
            Self::Protocols(_) => ExtensionType::ALProtocolNegotiation,
            Self::KeyShare(_) => ExtensionType::KeyShare,
            Self::PresharedKey(_) => ExtensionType::PreSharedKey,
            Self::ExtendedMasterSecretAck => ExtensionType::ExtendedMasterSecret,
            Self::EncryptThenMacAck => ExtensionType::EncryptThenMAC,
            Self::SupportedVersions(_) => ExtensionType::SupportedVersions,
            Self::Heartbeat(_) => ExtensionType::Heartbeat,
            Self::Unknown(ref r) => r.typ,
        }
    }

    pub fn make_alpn(proto: &[&[u8]]) -> Self {
        Self::Protocols(ProtocolNameList::from_slices(proto))
    }
}

impl Codec for ServerExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.get_type().encode(bytes);

        let mut sub: Vec<u8> = Vec::new();
        match *self {
            Self::ECPointFormats(ref r) => codec::encode_vec_u8(&mut sub, r),
            Self::ServerNameAck
            | Self::SessionTicketAck
            | Self::ExtendedMasterSecretAck
            | Self::EncryptThenMacAck => {}
            Self::RenegotiationInfo(ref r) => r.encode(&mut sub),
            Self::Protocols(ref r) => codec::encode_vec_u16(&mut sub, r),
            Self::KeyShare(ref r) => r.encode(&mut sub),
            Self::PresharedKey(ref r) => r.encode(&mut sub),
            Self::SupportedVersions(ref r) => r.encode(&mut sub),
            Self::Heartbeat(ref r) => r.encode(&mut sub),
            Self::Unknown(ref r) => r.encode(&mut sub),
        }

        (sub.len() as u16).encode(bytes);
        bytes.append(&mut sub);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let typ = ExtensionType::read(r)?;
        let len = u16::read(r)? as usize;
        let mut sub = r.sub(len)?;

        let ext = match typ {
            ExtensionType::ECPointFormats => Self::ECPointFormats(codec::read_vec_u8(&mut sub)?),
            ExtensionType::ServerName => Self::ServerNameAck,
            ExtensionType::SessionTicket => Self::SessionTicketAck,
            ExtensionType::StatusRequest => {
                Self::Unknown(UnknownExtension::read(typ, &mut sub))
            }
            ExtensionType::RenegotiationInfo => Self::RenegotiationInfo(PayloadU8::read(&mut sub)?),
            ExtensionType::ALProtocolNegotiation => {
                Self::Protocols(codec::read_vec_u16(&mut sub)?)
            }
            ExtensionType::KeyShare => Self::KeyShare(KeyShareEntry::read(&mut sub)?),
            ExtensionType::PreSharedKey => Self::PresharedKey(u16::read(&mut sub)?),
            ExtensionType::ExtendedMasterSecret if !sub.any_left() => {
                Self::ExtendedMasterSecretAck
            }
            ExtensionType::EncryptThenMAC if !sub.any_left() => Self::EncryptThenMacAck,
            ExtensionType::SupportedVersions => {
                Self::SupportedVersions(ProtocolVersion::read(&mut sub)?)
            }
            ExtensionType::Heartbeat => Self::Heartbeat(HeartbeatMode::read(&mut sub)?),
            _ => Self::Unknown(UnknownExtension::read(typ, &mut sub)),
        };

        if sub.any_left() {
            None
        } else {
            Some(ext)
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientHelloPayload {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionID,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<Compression>,
    pub extensions: Vec<ClientExtension>,
}

impl Codec for ClientHelloPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.client_version.encode(bytes);
        self.random.encode(bytes);
        self.session_id.encode(bytes);
        codec::encode_vec_u16(bytes, &self.cipher_suites);
        codec::encode_vec_u8(bytes, &self.compression_methods);

        if !self.extensions.is_empty() {
            codec::encode_vec_u16(bytes, &self.extensions);
        }
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let mut ret = Self {
            client_version: ProtocolVersion::read(r)?,
            random: Random::read(r)?,
            session_id: SessionID::read(r)?,
            cipher_suites: codec::read_vec_u16(r)?,
            compression_methods: codec::read_vec_u8(r)?,
            extensions: Vec::new(),
        };

        if r.any_left() {
            ret.extensions = codec::read_vec_u16(r)?;
        }

        Some(ret)
    }
}

pub trait HasExtensions {
    type Extension: Codec;

    fn extensions(&self) -> &[Self::Extension];
    fn extension_type(ext: &Self::Extension) -> ExtensionType;

    fn find_extension(&self, ext: ExtensionType) -> Option<&Self::Extension> {
        self.extensions()
            .iter()
            .find(|x| Self::extension_type(x) == ext)
    }

    fn has_duplicate_extension(&self) -> bool {
        let mut seen = collections::HashSet::new();

        for ext in self.extensions() {
            let typ = Self::extension_type(ext).get_u16();

            if seen.contains(&typ) {
                return true;
            }
            seen.insert(typ);
        }

        false
    }
}

impl HasExtensions for ClientHelloPayload {
    type Extension = ClientExtension;

    fn extensions(&self) -> &[ClientExtension] {
        &self.extensions
    }

    fn extension_type(ext: &ClientExtension) -> ExtensionType {
        ext.get_type()
    }
}

impl ClientHelloPayload {
    pub fn get_sni_extension(&self) -> Option<&ServerNameRequest> {
        match self.find_extension(ExtensionType::ServerName)? {
            ClientExtension::ServerName(req) => Some(req),
            _ => None,
        }
    }

    pub fn get_sigalgs_extension(&self) -> Option<&[SignatureScheme]> {
        match self.find_extension(ExtensionType::SignatureAlgorithms)? {
            ClientExtension::SignatureAlgorithms(req) => Some(req),
            _ => None,
        }
    }

    pub fn get_namedgroups_extension(&self) -> Option<&[NamedGroup]> {
        match self.find_extension(ExtensionType::EllipticCurves)? {
            ClientExtension::NamedGroups(req) => Some(req),
            _ => None,
        }
    }

    pub fn get_alpn_extension(&self) -> Option<&ProtocolNameList> {
        match self.find_extension(ExtensionType::ALProtocolNegotiation)? {
            ClientExtension::Protocols(req) => Some(req),
            _ => None,
        }
    }

    pub fn get_versions_extension(&self) -> Option<&[ProtocolVersion]> {
        match self.find_extension(ExtensionType::SupportedVersions)? {
            ClientExtension::SupportedVersions(vers) => Some(vers),
            _ => None,
        }
    }

    pub fn get_keyshare_extension(&self) -> Option<&[KeyShareEntry]> {
        match self.find_extension(ExtensionType::KeyShare)? {
            ClientExtension::KeyShare(shares) => Some(shares),
            _ => None,
        }
    }

    pub fn has_keyshare_extension_with_duplicates(&self) -> bool {
        if let Some(entries) = self.get_keyshare_extension() {
            let mut seen = collections::HashSet::new();

            for kse in entries {
                let grp = kse.group.get_u16();

                if !seen.insert(grp) {
                    return true;
                }
            }
        }

        false
    }

    pub fn get_psk(&self) -> Option<&PresharedKeyOffer> {
        match self.find_extension(ExtensionType::PreSharedKey)? {
            ClientExtension::PresharedKey(psk) => Some(psk),
            _ => None,
        }
    }

    pub fn get_psk_modes(&self) -> Option<&[PSKKeyExchangeMode]> {
        match self.find_extension(ExtensionType::PSKKeyExchangeModes)? {
            ClientExtension::PresharedKeyModes(psk_modes) => Some(psk_modes),
            _ => None,
        }
    }

    pub fn psk_mode_offered(&self, mode: PSKKeyExchangeMode) -> bool {
        self.get_psk_modes()
            .map(|modes| modes.contains(&mode))
            .unwrap_or(false)
    }

    pub fn get_ticket_extension(&self) -> Option<&ClientExtension> {
        self.find_extension(ExtensionType::SessionTicket)
    }

    pub fn get_heartbeat_extension(&self) -> Option<HeartbeatMode> {
        match self.find_extension(ExtensionType::Heartbeat)? {
            ClientExtension::Heartbeat(mode) => Some(*mode),
            _ => None,
        }
    }

    pub fn ems_support_offered(&self) -> bool {
        self.find_extension(ExtensionType::ExtendedMasterSecret)
            .is_some()
    }

    pub fn etm_support_offered(&self) -> bool {
        self.find_extension(ExtensionType::EncryptThenMAC)
            .is_some()
    }

    /// Has the PreSharedKey extension, and it is the last one.
    pub fn psk_offer_is_last_extension(&self) -> bool {
        self.extensions
            .last()
            .map(|ext| ext.get_type() == ExtensionType::PreSharedKey)
            .unwrap_or(false)
    }

    /// Encoding with the PSK binders themselves removed: what binder
    /// HMACs are computed over.
    pub fn get_encoding_for_binder_signing(&self) -> Vec<u8> {
        let mut ret = self.get_encoding();

        let binder_len = match self.extensions.last() {
            Some(ClientExtension::PresharedKey(offer)) => {
                let mut binders_encoding = Vec::new();
                codec::encode_vec_u16(&mut binders_encoding, &offer.binders);
                binders_encoding.len()
            }
            _ => 0,
        };

        let ret_len = ret.len() - binder_len;
        ret.truncate(ret_len);
        ret
    }

    pub fn set_psk_binder(&mut self, binder: Vec<u8>) {
        if let Some(ClientExtension::PresharedKey(offer)) = self.extensions.last_mut() {
            offer.binders[0] = PresharedKeyBinder::from(binder);
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerHelloPayload {
    pub legacy_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionID,
    pub cipher_suite: CipherSuite,
    pub compression_method: Compression,
    pub extensions: Vec<ServerExtension>,
}

impl Codec for ServerHelloPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.legacy_version.encode(bytes);
        self.random.encode(bytes);
        self.session_id.encode(bytes);
        self.cipher_suite.encode(bytes);
        self.compression_method.encode(bytes);

        if !self.extensions.is_empty() {
            codec::encode_vec_u16(bytes, &self.extensions);
        }
    }

    // minus version and random, which have already been read.
    fn read(r: &mut Reader) -> Option<Self> {
        let mut ret = Self {
            legacy_version: ProtocolVersion::Unknown(0),
            random: ZERO_RANDOM,
            session_id: SessionID::read(r)?,
            cipher_suite: CipherSuite::read(r)?,
            compression_method: Compression::read(r)?,
            extensions: Vec::new(),
        };

        if r.any_left() {
            ret.extensions = codec::read_vec_u16(r)?;
        }

        Some(ret)
    }
}

impl HasExtensions for ServerHelloPayload {
    type Extension = ServerExtension;

    fn extensions(&self) -> &[ServerExtension] {
        &self.extensions
    }

    fn extension_type(ext: &ServerExtension) -> ExtensionType {
        ext.get_type()
    }
}

impl ServerHelloPayload {
    pub fn get_key_share(&self) -> Option<&KeyShareEntry> {
        match self.find_extension(ExtensionType::KeyShare)? {
            ServerExtension::KeyShare(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn get_psk_index(&self) -> Option<u16> {
        match self.find_extension(ExtensionType::PreSharedKey)? {
            ServerExtension::PresharedKey(index) => Some(*index),
            _ => None,
        }
    }

    pub fn get_ecpoints_extension(&self) -> Option<&[ECPointFormat]> {
        match self.find_extension(ExtensionType::ECPointFormats)? {
            ServerExtension::ECPointFormats(fmts) => Some(fmts),
            _ => None,
        }
    }

    pub fn get_alpn_protocol(&self) -> Option<&[u8]> {
        match self.find_extension(ExtensionType::ALProtocolNegotiation)? {
            ServerExtension::Protocols(protos) => protos.as_single_slice(),
            _ => None,
        }
    }

    pub fn get_supported_versions(&self) -> Option<ProtocolVersion> {
        match self.find_extension(ExtensionType::SupportedVersions)? {
            ServerExtension::SupportedVersions(vers) => Some(*vers),
            _ => None,
        }
    }

    pub fn get_heartbeat_extension(&self) -> Option<HeartbeatMode> {
        match self.find_extension(ExtensionType::Heartbeat)? {
            ServerExtension::Heartbeat(mode) => Some(*mode),
            _ => None,
        }
    }

    pub fn ems_support_acked(&self) -> bool {
        self.find_extension(ExtensionType::ExtendedMasterSecret)
            .is_some()
    }

    pub fn etm_support_acked(&self) -> bool {
        self.find_extension(ExtensionType::EncryptThenMAC)
            .is_some()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HelloRetryExtension {
    KeyShare(NamedGroup),
    Cookie(PayloadU16),
    SupportedVersions(ProtocolVersion),
    Unknown(UnknownExtension),
}

impl HelloRetryExtension {
    pub fn get_type(&self) -> ExtensionType {
        match *self {
            Self::KeyShare(_) => ExtensionType::KeyShare,
            Self::Cookie(_) => ExtensionType::Cookie,
            Self::SupportedVersions(_) => ExtensionType::SupportedVersions,
            Self::Unknown(ref r) => r.typ,
        }
    }
}

impl Codec for HelloRetryExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.get_type().encode(bytes);

        let mut sub: Vec<u8> = Vec::new();
        match *self {
            Self::KeyShare(ref r) => r.encode(&mut sub),
            Self::Cookie(ref r) => r.encode(&mut sub),
            Self::SupportedVersions(ref r) => r.encode(&mut sub),
            Self::Unknown(ref r) => r.encode(&mut sub),
        }

        (sub.len() as u16).encode(bytes);
        bytes.append(&mut sub);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let typ = ExtensionType::read(r)?;
        let len = u16::read(r)? as usize;
        let mut sub = r.sub(len)?;

        let ext = match typ {
            ExtensionType::KeyShare => Self::KeyShare(NamedGroup::read(&mut sub)?),
            ExtensionType::Cookie => Self::Cookie(PayloadU16::read(&mut sub)?),
            ExtensionType::SupportedVersions => {
                Self::SupportedVersions(ProtocolVersion::read(&mut sub)?)
            }
            _ => Self::Unknown(UnknownExtension::read(typ, &mut sub)),
        };

        if sub.any_left() {
            None
        } else {
            Some(ext)
        }
    }
}

/// HelloRetryRequest is a ServerHello on the wire, distinguished by its
/// magic `random` value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HelloRetryRequest {
    pub legacy_version: ProtocolVersion,
    pub session_id: SessionID,
    pub cipher_suite: CipherSuite,
    pub extensions: Vec<HelloRetryExtension>,
}

impl Codec for HelloRetryRequest {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.legacy_version.encode(bytes);
        HELLO_RETRY_REQUEST_RANDOM.encode(bytes);
        self.session_id.encode(bytes);
        self.cipher_suite.encode(bytes);
        Compression::Null.encode(bytes);
        codec::encode_vec_u16(bytes, &self.extensions);
    }

    // minus version and random.
    fn read(r: &mut Reader) -> Option<Self> {
        let session_id = SessionID::read(r)?;
        let cipher_suite = CipherSuite::read(r)?;
        let compression = Compression::read(r)?;

        if compression != Compression::Null {
            return None;
        }

        Some(Self {
            legacy_version: ProtocolVersion::Unknown(0),
            session_id,
            cipher_suite,
            extensions: codec::read_vec_u16(r)?,
        })
    }
}

impl HasExtensions for HelloRetryRequest {
    type Extension = HelloRetryExtension;

    fn extensions(&self) -> &[HelloRetryExtension] {
        &self.extensions
    }

    fn extension_type(ext: &HelloRetryExtension) -> ExtensionType {
        ext.get_type()
    }
}

impl HelloRetryRequest {
    pub fn get_requested_key_share_group(&self) -> Option<NamedGroup> {
        match self.find_extension(ExtensionType::KeyShare)? {
            HelloRetryExtension::KeyShare(grp) => Some(*grp),
            _ => None,
        }
    }

    pub fn get_cookie(&self) -> Option<&PayloadU16> {
        match self.find_extension(ExtensionType::Cookie)? {
            HelloRetryExtension::Cookie(cookie) => Some(cookie),
            _ => None,
        }
    }

    pub fn get_supported_versions(&self) -> Option<ProtocolVersion> {
        match self.find_extension(ExtensionType::SupportedVersions)? {
            HelloRetryExtension::SupportedVersions(vers) => Some(*vers),
            _ => None,
        }
    }

    pub fn has_unknown_extension(&self) -> bool {
        self.extensions
            .iter()
            .any(|ext| matches!(ext, HelloRetryExtension::Unknown(_)))
    }
}

pub type CertificatePayload = Vec<key::Certificate>;

impl Codec for CertificatePayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        codec::encode_vec_u24(bytes, self);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        // 64KB of certificates is plenty, 16MB is obviously silly
        codec::read_vec_u24_limited(r, 0x10000)
    }
}

// TLS 1.3 certificates: each entry carries its own extensions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CertificateExtension {
    Unknown(UnknownExtension),
}

impl CertificateExtension {
    pub fn get_type(&self) -> ExtensionType {
        match *self {
            Self::Unknown(ref r) => r.typ,
        }
    }
}

impl Codec for CertificateExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.get_type().encode(bytes);

        let mut sub: Vec<u8> = Vec::new();
        match *self {
            Self::Unknown(ref r) => r.encode(&mut sub),
        }

        (sub.len() as u16).encode(bytes);
        bytes.append(&mut sub);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let typ = ExtensionType::read(r)?;
        let len = u16::read(r)? as usize;
        let mut sub = r.sub(len)?;

        let ext = Self::Unknown(UnknownExtension::read(typ, &mut sub));

        if sub.any_left() {
            None
        } else {
            Some(ext)
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificateEntry {
    pub cert: key::Certificate,
    pub exts: Vec<CertificateExtension>,
}

impl Codec for CertificateEntry {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.cert.encode(bytes);
        codec::encode_vec_u16(bytes, &self.exts);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        Some(Self {
            cert: key::Certificate::read(r)?,
            exts: codec::read_vec_u16(r)?,
        })
    }
}

impl CertificateEntry {
    pub fn new(cert: key::Certificate) -> Self {
        Self {
            cert,
            exts: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificatePayloadTls13 {
    pub context: PayloadU8,
    pub entries: Vec<CertificateEntry>,
}

impl Codec for CertificatePayloadTls13 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.context.encode(bytes);
        codec::encode_vec_u24(bytes, &self.entries);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        Some(Self {
            context: PayloadU8::read(r)?,
            entries: codec::read_vec_u24_limited(r, 0x10000)?,
        })
    }
}

impl CertificatePayloadTls13 {
    pub fn new(certs: &[key::Certificate]) -> Self {
        Self {
            context: PayloadU8::empty(),
            entries: certs
                .iter()
                .map(|cert| CertificateEntry::new(cert.clone()))
                .collect(),
        }
    }

    pub fn convert(&self) -> CertificatePayload {
        self.entries
            .iter()
            .map(|entry| entry.cert.clone())
            .collect()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EcParameters {
    pub curve_type: ECCurveType,
    pub named_group: NamedGroup,
}

impl Codec for EcParameters {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.curve_type.encode(bytes);
        self.named_group.encode(bytes);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let ct = ECCurveType::read(r)?;
        if ct != ECCurveType::NamedCurve {
            return None;
        }

        let grp = NamedGroup::read(r)?;

        Some(Self {
            curve_type: ct,
            named_group: grp,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerEcdhParams {
    pub curve_params: EcParameters,
    pub public: PayloadU8,
}

impl ServerEcdhParams {
    pub fn new(named_group: NamedGroup, pubkey: &[u8]) -> Self {
        Self {
            curve_params: EcParameters {
                curve_type: ECCurveType::NamedCurve,
                named_group,
            },
            public: PayloadU8::new(pubkey.to_vec()),
        }
    }
}

impl Codec for ServerEcdhParams {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.curve_params.encode(bytes);
        self.public.encode(bytes);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        Some(Self {
            curve_params: EcParameters::read(r)?,
            public: PayloadU8::read(r)?,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DigitallySignedStruct {
    pub scheme: SignatureScheme,
    pub sig: PayloadU16,
}

impl DigitallySignedStruct {
    pub fn new(scheme: SignatureScheme, sig: Vec<u8>) -> Self {
        Self {
            scheme,
            sig: PayloadU16::new(sig),
        }
    }
}

impl Codec for DigitallySignedStruct {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.scheme.encode(bytes);
        self.sig.encode(bytes);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        Some(Self {
            scheme: SignatureScheme::read(r)?,
            sig: PayloadU16::read(r)?,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EcdheServerKeyExchange {
    pub params: ServerEcdhParams,
    pub dss: DigitallySignedStruct,
}

impl Codec for EcdheServerKeyExchange {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.params.encode(bytes);
        self.dss.encode(bytes);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        Some(Self {
            params: ServerEcdhParams::read(r)?,
            dss: DigitallySignedStruct::read(r)?,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ServerKeyExchangePayload {
    Ecdhe(EcdheServerKeyExchange),
    Unknown(Payload),
}

impl Codec for ServerKeyExchangePayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        match *self {
            Self::Ecdhe(ref x) => x.encode(bytes),
            Self::Unknown(ref x) => x.encode(bytes),
        }
    }

    fn read(r: &mut Reader) -> Option<Self> {
        // read as Unknown, fully parse when we know the
        // selected cipher suite.
        Some(Self::Unknown(Payload::read(r)))
    }
}

impl ServerKeyExchangePayload {
    pub fn unwrap_given_ecdhe(&self) -> Option<EcdheServerKeyExchange> {
        if let Self::Unknown(unk) = self {
            let mut rd = Reader::init(&unk.0);

            let result = EcdheServerKeyExchange::read(&mut rd);
            if rd.any_left() {
                return None;
            }
            return result;
        }

        None
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificateRequestPayload {
    pub certtypes: Vec<ClientCertificateType>,
    pub sigschemes: Vec<SignatureScheme>,
    pub canames: Vec<PayloadU16>,
}

impl Codec for CertificateRequestPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        codec::encode_vec_u8(bytes, &self.certtypes);
        codec::encode_vec_u16(bytes, &self.sigschemes);
        codec::encode_vec_u16(bytes, &self.canames);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let certtypes = codec::read_vec_u8(r)?;
        let sigschemes = codec::read_vec_u16(r)?;
        let canames = codec::read_vec_u16(r)?;

        if sigschemes.is_empty() {
            return None;
        }

        Some(Self {
            certtypes,
            sigschemes,
            canames,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CertReqExtension {
    SignatureAlgorithms(Vec<SignatureScheme>),
    Unknown(UnknownExtension),
}

impl CertReqExtension {
    pub fn get_type(&self) -> ExtensionType {
        match *self {
            Self::SignatureAlgorithms(_) => ExtensionType::SignatureAlgorithms,
            Self::Unknown(ref r) => r.typ,
        }
    }
}

impl Codec for CertReqExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.get_type().encode(bytes);

        let mut sub: Vec<u8> = Vec::new();
        match *self {
            Self::SignatureAlgorithms(ref r) => codec::encode_vec_u16(&mut sub, r),
            Self::Unknown(ref r) => r.encode(&mut sub),
        }

        (sub.len() as u16).encode(bytes);
        bytes.append(&mut sub);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let typ = ExtensionType::read(r)?;
        let len = u16::read(r)? as usize;
        let mut sub = r.sub(len)?;

        let ext = match typ {
            ExtensionType::SignatureAlgorithms => {
                let schemes = codec::read_vec_u16(&mut sub)?;
                if schemes.is_empty() {
                    return None;
                }
                Self::SignatureAlgorithms(schemes)
            }
            _ => Self::Unknown(UnknownExtension::read(typ, &mut sub)),
        };

        if sub.any_left() {
            None
        } else {
            Some(ext)
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificateRequestPayloadTls13 {
    pub context: PayloadU8,
    pub extensions: Vec<CertReqExtension>,
}

impl Codec for CertificateRequestPayloadTls13 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.context.encode(bytes);
        codec::encode_vec_u16(bytes, &self.extensions);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        Some(Self {
            context: PayloadU8::read(r)?,
            extensions: codec::read_vec_u16(r)?,
        })
    }
}

impl CertificateRequestPayloadTls13 {
    pub fn get_sigalgs_extension(&self) -> Option<&[SignatureScheme]> {
        for ext in &self.extensions {
            if let CertReqExtension::SignatureAlgorithms(schemes) = ext {
                return Some(schemes);
            }
        }
        None
    }
}

// -- NewSessionTicket --
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewSessionTicketPayload {
    pub lifetime_hint: u32,
    pub ticket: PayloadU16,
}

impl NewSessionTicketPayload {
    pub fn new(lifetime_hint: u32, ticket: Vec<u8>) -> Self {
        Self {
            lifetime_hint,
            ticket: PayloadU16::new(ticket),
        }
    }
}

impl Codec for NewSessionTicketPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.lifetime_hint.encode(bytes);
        self.ticket.encode(bytes);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        Some(Self {
            lifetime_hint: u32::read(r)?,
            ticket: PayloadU16::read(r)?,
        })
    }
}

// -- NewSessionTicket electric boogaloo --
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NewSessionTicketExtension {
    EarlyData(u32),
    Unknown(UnknownExtension),
}

impl NewSessionTicketExtension {
    pub fn get_type(&self) -> ExtensionType {
        match *self {
            Self::EarlyData(_) => ExtensionType::EarlyData,
            Self::Unknown(ref r) => r.typ,
        }
    }
}

impl Codec for NewSessionTicketExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.get_type().encode(bytes);

        let mut sub: Vec<u8> = Vec::new();
        match *self {
            Self::EarlyData(r) => r.encode(&mut sub),
            Self::Unknown(ref r) => r.encode(&mut sub),
        }

        (sub.len() as u16).encode(bytes);
        bytes.append(&mut sub);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let typ = ExtensionType::read(r)?;
        let len = u16::read(r)? as usize;
        let mut sub = r.sub(len)?;

        let ext = match typ {
            ExtensionType::EarlyData => Self::EarlyData(u32::read(&mut sub)?),
            _ => Self::Unknown(UnknownExtension::read(typ, &mut sub)),
        };

        if sub.any_left() {
            None
        } else {
            Some(ext)
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewSessionTicketPayloadTls13 {
    pub lifetime: u32,
    pub age_add: u32,
    pub nonce: PayloadU8,
    pub ticket: PayloadU16,
    pub exts: Vec<NewSessionTicketExtension>,
}

impl NewSessionTicketPayloadTls13 {
    pub fn new(lifetime: u32, age_add: u32, nonce: Vec<u8>, ticket: Vec<u8>) -> Self {
        Self {
            lifetime,
            age_add,
            nonce: PayloadU8::new(nonce),
            ticket: PayloadU16::new(ticket),
            exts: vec![],
        }
    }

    pub fn get_max_early_data_size(&self) -> Option<u32> {
        for ext in &self.exts {
            if let NewSessionTicketExtension::EarlyData(size) = ext {
                return Some(*size);
            }
        }
        None
    }
}

impl Codec for NewSessionTicketPayloadTls13 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.lifetime.encode(bytes);
        self.age_add.encode(bytes);
        self.nonce.encode(bytes);
        self.ticket.encode(bytes);
        codec::encode_vec_u16(bytes, &self.exts);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        Some(Self {
            lifetime: u32::read(r)?,
            age_add: u32::read(r)?,
            nonce: PayloadU8::read(r)?,
            ticket: PayloadU16::read(r)?,
            exts: codec::read_vec_u16(r)?,
        })
    }
}

// -- RFC6066 extensions to Certificate, none supported --

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HandshakePayload {
    HelloRequest,
    ClientHello(ClientHelloPayload),
    ServerHello(ServerHelloPayload),
    HelloRetryRequest(HelloRetryRequest),
    Certificate(CertificatePayload),
    CertificateTls13(CertificatePayloadTls13),
    ServerKeyExchange(ServerKeyExchangePayload),
    CertificateRequest(CertificateRequestPayload),
    CertificateRequestTls13(CertificateRequestPayloadTls13),
    CertificateVerify(DigitallySignedStruct),
    ServerHelloDone,
    ClientKeyExchange(Payload),
    NewSessionTicket(NewSessionTicketPayload),
    NewSessionTicketTls13(NewSessionTicketPayloadTls13),
    EncryptedExtensions(Vec<ServerExtension>),
    KeyUpdate(KeyUpdateRequest),
    Finished(Payload),
    MessageHash(Payload),
    Unknown(Payload),
}

impl HandshakePayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        use self::HandshakePayload::*;
        match *self {
            HelloRequest | ServerHelloDone => {}
            ClientHello(ref x) => x.encode(bytes),
            ServerHello(ref x) => x.encode(bytes),
            HelloRetryRequest(ref x) => x.encode(bytes),
            Certificate(ref x) => x.encode(bytes),
            CertificateTls13(ref x) => x.encode(bytes),
            ServerKeyExchange(ref x) => x.encode(bytes),
            ClientKeyExchange(ref x) => x.encode(bytes),
            CertificateRequest(ref x) => x.encode(bytes),
            CertificateRequestTls13(ref x) => x.encode(bytes),
            CertificateVerify(ref x) => x.encode(bytes),
            NewSessionTicket(ref x) => x.encode(bytes),
            NewSessionTicketTls13(ref x) => x.encode(bytes),
            EncryptedExtensions(ref x) => codec::encode_vec_u16(bytes, x),
            KeyUpdate(ref x) => x.encode(bytes),
            Finished(ref x) => x.encode(bytes),
            MessageHash(ref x) => x.encode(bytes),
            Unknown(ref x) => x.encode(bytes),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HandshakeMessagePayload {
    pub typ: HandshakeType,
    pub payload: HandshakePayload,
}

impl Codec for HandshakeMessagePayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        // output type, length-prefix, and the payload
        self.typ.encode(bytes);

        let nested_offset = bytes.len();
        bytes.extend([0, 0, 0]);
        self.payload.encode(bytes);

        let len = bytes.len() - nested_offset - 3;
        debug_assert!(len <= 0xff_ffff);
        let len_bytes = (len as u32).to_be_bytes();
        bytes[nested_offset..nested_offset + 3].copy_from_slice(&len_bytes[1..]);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        Self::read_version(r, ProtocolVersion::TLSv1_2)
    }
}

impl HandshakeMessagePayload {
    pub fn read_version(r: &mut Reader, vers: ProtocolVersion) -> Option<Self> {
        let mut typ = HandshakeType::read(r)?;
        let len = codec::u24::read(r)?.0 as usize;
        let mut sub = r.sub(len)?;

        let payload = match typ {
            HandshakeType::HelloRequest if sub.left() == 0 => HandshakePayload::HelloRequest,
            HandshakeType::ClientHello => {
                HandshakePayload::ClientHello(ClientHelloPayload::read(&mut sub)?)
            }
            HandshakeType::ServerHello => {
                let version = ProtocolVersion::read(&mut sub)?;
                let random = Random::read(&mut sub)?;

                if random == HELLO_RETRY_REQUEST_RANDOM {
                    let mut hrr = HelloRetryRequest::read(&mut sub)?;
                    hrr.legacy_version = version;
                    typ = HandshakeType::HelloRetryRequest;
                    HandshakePayload::HelloRetryRequest(hrr)
                } else {
                    let mut shp = ServerHelloPayload::read(&mut sub)?;
                    shp.legacy_version = version;
                    shp.random = random;
                    HandshakePayload::ServerHello(shp)
                }
            }
            HandshakeType::Certificate if vers == ProtocolVersion::TLSv1_3 => {
                let p = CertificatePayloadTls13::read(&mut sub)?;
                HandshakePayload::CertificateTls13(p)
            }
            HandshakeType::Certificate => {
                HandshakePayload::Certificate(CertificatePayload::read(&mut sub)?)
            }
            HandshakeType::ServerKeyExchange => {
                let p = ServerKeyExchangePayload::read(&mut sub)?;
                HandshakePayload::ServerKeyExchange(p)
            }
            HandshakeType::ServerHelloDone => {
                if sub.any_left() {
                    return None;
                }
                HandshakePayload::ServerHelloDone
            }
            HandshakeType::ClientKeyExchange => {
                HandshakePayload::ClientKeyExchange(Payload::read(&mut sub))
            }
            HandshakeType::CertificateRequest if vers == ProtocolVersion::TLSv1_3 => {
                let p = CertificateRequestPayloadTls13::read(&mut sub)?;
                HandshakePayload::CertificateRequestTls13(p)
            }
            HandshakeType::CertificateRequest => {
                let p = CertificateRequestPayload::read(&mut sub)?;
                HandshakePayload::CertificateRequest(p)
            }
            HandshakeType::CertificateVerify => {
                HandshakePayload::CertificateVerify(DigitallySignedStruct::read(&mut sub)?)
            }
            HandshakeType::NewSessionTicket if vers == ProtocolVersion::TLSv1_3 => {
                let p = NewSessionTicketPayloadTls13::read(&mut sub)?;
                HandshakePayload::NewSessionTicketTls13(p)
            }
            HandshakeType::NewSessionTicket => {
                let p = NewSessionTicketPayload::read(&mut sub)?;
                HandshakePayload::NewSessionTicket(p)
            }
            HandshakeType::EncryptedExtensions => {
                HandshakePayload::EncryptedExtensions(codec::read_vec_u16(&mut sub)?)
            }
            HandshakeType::KeyUpdate => {
                HandshakePayload::KeyUpdate(KeyUpdateRequest::read(&mut sub)?)
            }
            HandshakeType::Finished => HandshakePayload::Finished(Payload::read(&mut sub)),
            HandshakeType::MessageHash => {
                // does not appear on the wire
                return None;
            }
            HandshakeType::HelloRetryRequest => {
                // not legal on wire
                return None;
            }
            _ => HandshakePayload::Unknown(Payload::read(&mut sub)),
        };

        if sub.any_left() {
            None
        } else {
            Some(Self { typ, payload })
        }
    }

    pub fn build_handshake_hash(hash: &[u8]) -> Self {
        Self {
            typ: HandshakeType::MessageHash,
            payload: HandshakePayload::MessageHash(Payload::new(hash.to_vec())),
        }
    }

    pub fn build_key_update_notify() -> Self {
        Self {
            typ: HandshakeType::KeyUpdate,
            payload: HandshakePayload::KeyUpdate(KeyUpdateRequest::UpdateNotRequested),
        }
    }

    pub fn build_key_update_request() -> Self {
        Self {
            typ: HandshakeType::KeyUpdate,
            payload: HandshakePayload::KeyUpdate(KeyUpdateRequest::UpdateRequested),
        }
    }

    pub fn get_encoding_for_binder_signing(&self) -> Vec<u8> {
        let mut ret = self.get_encoding();

        let binder_len = match self.payload {
            HandshakePayload::ClientHello(ref ch) => {
                let offer = ch.get_psk().unwrap();

                let mut binders_encoding = Vec::new();
                codec::encode_vec_u16(&mut binders_encoding, &offer.binders);
                binders_encoding.len()
            }
            _ => 0,
        };

        let ret_len = ret.len() - binder_len;
        ret.truncate(ret_len);
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hs_roundtrip(hmp: &HandshakeMessagePayload, vers: ProtocolVersion) {
        let enc = hmp.get_encoding();
        let mut rd = Reader::init(&enc);
        let parsed = HandshakeMessagePayload::read_version(&mut rd, vers).unwrap();
        assert!(!rd.any_left());
        assert_eq!(hmp, &parsed);
        assert_eq!(enc, parsed.get_encoding());
    }

    fn sample_client_hello() -> ClientHelloPayload {
        ClientHelloPayload {
            client_version: ProtocolVersion::TLSv1_2,
            random: Random([0x55; 32]),
            session_id: SessionID::new(&[0xau8; 32]),
            cipher_suites: vec![
                CipherSuite::TLS13_AES_128_GCM_SHA256,
                CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            ],
            compression_methods: vec![Compression::Null],
            extensions: vec![
                ClientExtension::SupportedVersions(vec![
                    ProtocolVersion::TLSv1_3,
                    ProtocolVersion::TLSv1_2,
                ]),
                ClientExtension::make_sni("hello.example"),
                ClientExtension::NamedGroups(vec![NamedGroup::X25519, NamedGroup::secp256r1]),
                ClientExtension::SignatureAlgorithms(vec![SignatureScheme::ED25519]),
                ClientExtension::KeyShare(vec![KeyShareEntry::new(NamedGroup::X25519, &[0xab; 32])]),
                ClientExtension::ExtendedMasterSecretRequest,
                ClientExtension::Heartbeat(HeartbeatMode::PeerAllowedToSend),
                ClientExtension::PresharedKey(PresharedKeyOffer::new(
                    PresharedKeyIdentity::new(vec![1, 2, 3], 0x12345),
                    vec![0u8; 32],
                )),
            ],
        }
    }

    #[test]
    fn client_hello_round_trip() {
        hs_roundtrip(
            &HandshakeMessagePayload {
                typ: HandshakeType::ClientHello,
                payload: HandshakePayload::ClientHello(sample_client_hello()),
            },
            ProtocolVersion::TLSv1_2,
        );
    }

    #[test]
    fn binder_signing_encoding_truncates_binders_only() {
        let ch = sample_client_hello();
        let full = ch.get_encoding();
        let truncated = ch.get_encoding_for_binder_signing();
        // u16 binder list length + one 32-byte binder with u8 length
        assert_eq!(full.len() - truncated.len(), 2 + 1 + 32);
        assert_eq!(&full[..truncated.len()], &truncated[..]);
    }

    #[test]
    fn server_hello_round_trip() {
        hs_roundtrip(
            &HandshakeMessagePayload {
                typ: HandshakeType::ServerHello,
                payload: HandshakePayload::ServerHello(ServerHelloPayload {
                    legacy_version: ProtocolVersion::TLSv1_2,
                    random: Random([0x22; 32]),
                    session_id: SessionID::empty(),
                    cipher_suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
                    compression_method: Compression::Null,
                    extensions: vec![
                        ServerExtension::SupportedVersions(ProtocolVersion::TLSv1_3),
                        ServerExtension::KeyShare(KeyShareEntry::new(
                            NamedGroup::X25519,
                            &[0xcd; 32],
                        )),
                    ],
                }),
            },
            ProtocolVersion::TLSv1_2,
        );
    }

    #[test]
    fn hello_retry_request_is_discriminated_by_random() {
        let hrr = HelloRetryRequest {
            legacy_version: ProtocolVersion::TLSv1_2,
            session_id: SessionID::empty(),
            cipher_suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
            extensions: vec![
                HelloRetryExtension::SupportedVersions(ProtocolVersion::TLSv1_3),
                HelloRetryExtension::KeyShare(NamedGroup::X25519),
            ],
        };

        let hmp = HandshakeMessagePayload {
            // HRR goes on the wire as ServerHello
            typ: HandshakeType::ServerHello,
            payload: HandshakePayload::HelloRetryRequest(hrr),
        };
        let enc = hmp.get_encoding();

        let mut rd = Reader::init(&enc);
        let parsed = HandshakeMessagePayload::read_version(&mut rd, ProtocolVersion::TLSv1_2)
            .unwrap();
        assert_eq!(parsed.typ, HandshakeType::HelloRetryRequest);
        assert!(matches!(
            parsed.payload,
            HandshakePayload::HelloRetryRequest(_)
        ));
    }

    #[test]
    fn certificate_payload_version_dispatch() {
        let certs = vec![
            key::Certificate(vec![1, 2, 3]),
            key::Certificate(vec![4, 5, 6, 7]),
        ];

        hs_roundtrip(
            &HandshakeMessagePayload {
                typ: HandshakeType::Certificate,
                payload: HandshakePayload::Certificate(certs.clone()),
            },
            ProtocolVersion::TLSv1_2,
        );

        hs_roundtrip(
            &HandshakeMessagePayload {
                typ: HandshakeType::Certificate,
                payload: HandshakePayload::CertificateTls13(CertificatePayloadTls13::new(&certs)),
            },
            ProtocolVersion::TLSv1_3,
        );
    }

    #[test]
    fn new_session_ticket_both_versions() {
        hs_roundtrip(
            &HandshakeMessagePayload {
                typ: HandshakeType::NewSessionTicket,
                payload: HandshakePayload::NewSessionTicket(NewSessionTicketPayload::new(
                    7200,
                    vec![9; 128],
                )),
            },
            ProtocolVersion::TLSv1_2,
        );

        hs_roundtrip(
            &HandshakeMessagePayload {
                typ: HandshakeType::NewSessionTicket,
                payload: HandshakePayload::NewSessionTicketTls13(
                    NewSessionTicketPayloadTls13::new(7200, 0xdead_beef, vec![1; 12], vec![9; 128]),
                ),
            },
            ProtocolVersion::TLSv1_3,
        );
    }

    #[test]
    fn truncated_client_hello_rejected() {
        let hmp = HandshakeMessagePayload {
            typ: HandshakeType::ClientHello,
            payload: HandshakePayload::ClientHello(sample_client_hello()),
        };
        let enc = hmp.get_encoding();

        for l in 3..enc.len() {
            let mut rd = Reader::init(&enc[..l]);
            assert!(
                HandshakeMessagePayload::read_version(&mut rd, ProtocolVersion::TLSv1_2).is_none()
            );
        }
    }

    #[test]
    fn server_ecdh_params_roundtrip_inside_ske() {
        let ske = EcdheServerKeyExchange {
            params: ServerEcdhParams::new(NamedGroup::X25519, &[0x33; 32]),
            dss: DigitallySignedStruct::new(SignatureScheme::ECDSA_NISTP256_SHA256, vec![8; 70]),
        };
        let enc = ServerKeyExchangePayload::Ecdhe(ske.clone()).get_encoding();

        let parsed = ServerKeyExchangePayload::read_bytes(&enc).unwrap();
        assert_eq!(parsed.unwrap_given_ecdhe(), Some(ske));
    }
}
