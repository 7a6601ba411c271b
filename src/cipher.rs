use crate::error::Error;
use crate::key_schedule::{derive_traffic_iv, derive_traffic_key};
use crate::msgs::base::Payload;
use crate::msgs::codec;
use crate::msgs::codec::Codec;
use crate::msgs::enums::{ContentType, ProtocolVersion};
use crate::msgs::fragmenter::MAX_FRAGMENT_LEN;
use crate::msgs::message::{BorrowedPlainMessage, OpaqueMessage, PlainMessage};
use crate::suites::Tls13CipherSuite;

use ring::aead;

/// Objects with this trait can decrypt TLS messages.
pub trait MessageDecrypter: Send + Sync {
    /// Perform the decryption over the concerned TLS message.
    fn decrypt(&self, m: OpaqueMessage, seq: u64) -> Result<PlainMessage, Error>;
}

/// Objects with this trait can encrypt TLS messages.
pub trait MessageEncrypter: Send + Sync {
    /// Perform the encryption over the concerned TLS message.
    fn encrypt(&self, m: BorrowedPlainMessage, seq: u64) -> Result<OpaqueMessage, Error>;
}

impl dyn MessageEncrypter {
    pub fn invalid() -> Box<dyn MessageEncrypter> {
        Box::new(InvalidMessageEncrypter {})
    }
}

impl dyn MessageDecrypter {
    pub fn invalid() -> Box<dyn MessageDecrypter> {
        Box::new(InvalidMessageDecrypter {})
    }
}

/// A write or read IV.
#[derive(Default)]
pub struct Iv(pub(crate) [u8; aead::NONCE_LEN]);

impl Iv {
    pub(crate) fn new(value: [u8; aead::NONCE_LEN]) -> Self {
        Self(value)
    }

    pub(crate) fn copy(value: &[u8]) -> Self {
        debug_assert_eq!(value.len(), aead::NONCE_LEN);
        let mut iv = Self::new(Default::default());
        iv.0.copy_from_slice(value);
        iv
    }
}

impl AsRef<[u8]> for Iv {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

/// Combine an `Iv` and sequence number to produce a unique nonce.
///
/// This is `iv ^ (0^32 || seq)`, per RFC8446 s5.3 and RFC7905 s2.
pub(crate) fn make_nonce(iv: &Iv, seq: u64) -> [u8; aead::NONCE_LEN] {
    let mut nonce = [0u8; aead::NONCE_LEN];
    codec::put_u64(seq, &mut nonce[4..]);

    nonce
        .iter_mut()
        .zip(iv.0.iter())
        .for_each(|(nonce, iv)| {
            *nonce ^= *iv;
        });

    nonce
}

/// TLS1.2 per-message additional data: seq || type || version || plaintext-length.
fn make_tls12_aad(
    seq: u64,
    typ: ContentType,
    vers: ProtocolVersion,
    len: usize,
) -> [u8; TLS12_AAD_SIZE] {
    let mut out = [0; TLS12_AAD_SIZE];
    codec::put_u64(seq, &mut out[0..]);
    out[8] = typ.get_u8();
    codec::put_u16(vers.get_u16(), &mut out[9..]);
    codec::put_u16(len as u16, &mut out[11..]);
    out
}

const TLS12_AAD_SIZE: usize = 8 + 1 + 2 + 2;

/// TLS1.3 additional data is the record header of the protected record.
fn make_tls13_aad(len: usize) -> [u8; TLS13_AAD_SIZE] {
    [
        0x17, // ContentType::ApplicationData
        0x3,  // ProtocolVersion (major)
        0x3,  // ProtocolVersion (minor)
        (len >> 8) as u8,
        len as u8,
    ]
}

const TLS13_AAD_SIZE: usize = 1 + 2 + 2;

const GCM_EXPLICIT_NONCE_LEN: usize = 8;
const GCM_OVERHEAD: usize = GCM_EXPLICIT_NONCE_LEN + 16;

/// A `MessageEncrypter` for AES-GCM AEAD ciphersuites. TLS 1.2 only.
pub(crate) struct GcmMessageEncrypter {
    enc_key: aead::LessSafeKey,
    iv: Iv,
}

impl GcmMessageEncrypter {
    /// `full_iv` is salt (4 bytes) then explicit nonce seed (8 bytes).
    pub(crate) fn new(alg: &'static aead::Algorithm, key: &[u8], full_iv: &[u8]) -> Self {
        Self {
            enc_key: aead::LessSafeKey::new(aead::UnboundKey::new(alg, key).unwrap()),
            iv: Iv::copy(full_iv),
        }
    }
}

impl MessageEncrypter for GcmMessageEncrypter {
    fn encrypt(&self, msg: BorrowedPlainMessage, seq: u64) -> Result<OpaqueMessage, Error> {
        let nonce = make_nonce(&self.iv, seq);
        let aad = aead::Aad::from(make_tls12_aad(seq, msg.typ, msg.version, msg.payload.len()));

        let total_len = GCM_EXPLICIT_NONCE_LEN + msg.payload.len() + self.enc_key.algorithm().tag_len();
        let mut payload = Vec::with_capacity(total_len);
        payload.extend_from_slice(&nonce[4..]);
        payload.extend_from_slice(msg.payload);

        self.enc_key
            .seal_in_place_separate_tag(
                aead::Nonce::assume_unique_for_key(nonce),
                aad,
                &mut payload[GCM_EXPLICIT_NONCE_LEN..],
            )
            .map(|tag| payload.extend(tag.as_ref()))
            .map_err(|_| Error::General("encrypt failed".to_string()))?;

        Ok(OpaqueMessage {
            typ: msg.typ,
            version: msg.version,
            payload: Payload::new(payload),
        })
    }
}

/// A `MessageDecrypter` for AES-GCM AEAD ciphersuites.  TLS1.2 only.
pub(crate) struct GcmMessageDecrypter {
    dec_key: aead::LessSafeKey,
    dec_salt: [u8; 4],
}

impl GcmMessageDecrypter {
    pub(crate) fn new(alg: &'static aead::Algorithm, key: &[u8], salt: &[u8]) -> Self {
        let mut dec_salt = [0u8; 4];
        dec_salt.copy_from_slice(salt);
        Self {
            dec_key: aead::LessSafeKey::new(aead::UnboundKey::new(alg, key).unwrap()),
            dec_salt,
        }
    }
}

impl MessageDecrypter for GcmMessageDecrypter {
    fn decrypt(&self, mut msg: OpaqueMessage, seq: u64) -> Result<PlainMessage, Error> {
        let payload = &msg.payload.0;
        if payload.len() < GCM_OVERHEAD {
            return Err(Error::DecryptError);
        }

        let nonce = {
            let mut nonce = [0u8; aead::NONCE_LEN];
            nonce[..4].copy_from_slice(&self.dec_salt);
            nonce[4..].copy_from_slice(&payload[..GCM_EXPLICIT_NONCE_LEN]);
            aead::Nonce::assume_unique_for_key(nonce)
        };

        let aad = aead::Aad::from(make_tls12_aad(
            seq,
            msg.typ,
            msg.version,
            payload.len() - GCM_OVERHEAD,
        ));

        let payload = &mut msg.payload.0;
        let plain_len = self
            .dec_key
            .open_within(nonce, aad, payload, GCM_EXPLICIT_NONCE_LEN..)
            .map_err(|_| Error::DecryptError)?
            .len();

        if plain_len > MAX_FRAGMENT_LEN {
            return Err(Error::PeerSentOversizedRecord);
        }

        payload.truncate(plain_len);
        Ok(msg.into_plain_message())
    }
}

/// The RFC7905/RFC7539 ChaCha20Poly1305 construction, in TLS1.2.
///
/// This implementation does the AAD formulation required in TLS1.2:
/// there is no explicit nonce; the full nonce is the (secret) IV
/// xored with the sequence number.
pub(crate) struct ChaCha20Poly1305MessageEncrypter {
    enc_key: aead::LessSafeKey,
    enc_offset: Iv,
}

impl ChaCha20Poly1305MessageEncrypter {
    pub(crate) fn new(alg: &'static aead::Algorithm, key: &[u8], iv: &[u8]) -> Self {
        Self {
            enc_key: aead::LessSafeKey::new(aead::UnboundKey::new(alg, key).unwrap()),
            enc_offset: Iv::copy(iv),
        }
    }
}

impl MessageEncrypter for ChaCha20Poly1305MessageEncrypter {
    fn encrypt(&self, msg: BorrowedPlainMessage, seq: u64) -> Result<OpaqueMessage, Error> {
        let nonce = aead::Nonce::assume_unique_for_key(make_nonce(&self.enc_offset, seq));
        let aad = aead::Aad::from(make_tls12_aad(seq, msg.typ, msg.version, msg.payload.len()));

        let mut buf = Vec::with_capacity(msg.payload.len() + self.enc_key.algorithm().tag_len());
        buf.extend_from_slice(msg.payload);

        self.enc_key
            .seal_in_place_append_tag(nonce, aad, &mut buf)
            .map_err(|_| Error::General("encrypt failed".to_string()))?;

        Ok(OpaqueMessage {
            typ: msg.typ,
            version: msg.version,
            payload: Payload::new(buf),
        })
    }
}

pub(crate) struct ChaCha20Poly1305MessageDecrypter {
    dec_key: aead::LessSafeKey,
    dec_offset: Iv,
}

impl ChaCha20Poly1305MessageDecrypter {
    pub(crate) fn new(alg: &'static aead::Algorithm, key: &[u8], iv: &[u8]) -> Self {
        Self {
            dec_key: aead::LessSafeKey::new(aead::UnboundKey::new(alg, key).unwrap()),
            dec_offset: Iv::copy(iv),
        }
    }
}

impl MessageDecrypter for ChaCha20Poly1305MessageDecrypter {
    fn decrypt(&self, mut msg: OpaqueMessage, seq: u64) -> Result<PlainMessage, Error> {
        let payload = &msg.payload.0;

        if payload.len() < CHACHAPOLY1305_OVERHEAD {
            return Err(Error::DecryptError);
        }

        let nonce = aead::Nonce::assume_unique_for_key(make_nonce(&self.dec_offset, seq));
        let aad = aead::Aad::from(make_tls12_aad(
            seq,
            msg.typ,
            msg.version,
            payload.len() - CHACHAPOLY1305_OVERHEAD,
        ));

        let payload = &mut msg.payload.0;
        let plain_len = self
            .dec_key
            .open_in_place(nonce, aad, payload)
            .map_err(|_| Error::DecryptError)?
            .len();

        if plain_len > MAX_FRAGMENT_LEN {
            return Err(Error::PeerSentOversizedRecord);
        }

        payload.truncate(plain_len);
        Ok(msg.into_plain_message())
    }
}

const CHACHAPOLY1305_OVERHEAD: usize = 16;

/// A TLS 1.3 write state: the universal AEAD construction with the
/// content type inside the protection.
pub(crate) struct Tls13MessageEncrypter {
    enc_key: aead::LessSafeKey,
    iv: Iv,
}

impl Tls13MessageEncrypter {
    pub(crate) fn new(alg: &'static aead::Algorithm, key: &[u8], iv: Iv) -> Self {
        Self {
            enc_key: aead::LessSafeKey::new(aead::UnboundKey::new(alg, key).unwrap()),
            iv,
        }
    }
}

impl MessageEncrypter for Tls13MessageEncrypter {
    fn encrypt(&self, msg: BorrowedPlainMessage, seq: u64) -> Result<OpaqueMessage, Error> {
        let total_len = msg.payload.len() + 1 + self.enc_key.algorithm().tag_len();
        let mut payload = Vec::with_capacity(total_len);
        payload.extend_from_slice(msg.payload);
        msg.typ.encode(&mut payload);

        let nonce = aead::Nonce::assume_unique_for_key(make_nonce(&self.iv, seq));
        let aad = aead::Aad::from(make_tls13_aad(total_len));

        self.enc_key
            .seal_in_place_append_tag(nonce, aad, &mut payload)
            .map_err(|_| Error::General("encrypt failed".to_string()))?;

        Ok(OpaqueMessage {
            typ: ContentType::ApplicationData,
            version: ProtocolVersion::TLSv1_2,
            payload: Payload::new(payload),
        })
    }
}

pub(crate) struct Tls13MessageDecrypter {
    dec_key: aead::LessSafeKey,
    iv: Iv,
}

impl Tls13MessageDecrypter {
    pub(crate) fn new(alg: &'static aead::Algorithm, key: &[u8], iv: Iv) -> Self {
        Self {
            dec_key: aead::LessSafeKey::new(aead::UnboundKey::new(alg, key).unwrap()),
            iv,
        }
    }
}

impl MessageDecrypter for Tls13MessageDecrypter {
    fn decrypt(&self, mut msg: OpaqueMessage, seq: u64) -> Result<PlainMessage, Error> {
        let payload = &mut msg.payload.0;
        if payload.len() < self.dec_key.algorithm().tag_len() {
            return Err(Error::DecryptError);
        }

        let nonce = aead::Nonce::assume_unique_for_key(make_nonce(&self.iv, seq));
        let aad = aead::Aad::from(make_tls13_aad(payload.len()));
        let plain_len = self
            .dec_key
            .open_in_place(nonce, aad, payload)
            .map_err(|_| Error::DecryptError)?
            .len();

        payload.truncate(plain_len);

        if payload.len() > MAX_FRAGMENT_LEN + 1 {
            return Err(Error::PeerSentOversizedRecord);
        }

        // The unprotected content ends with the true content type,
        // preceded by any amount of zero padding.
        msg.typ = unpad_tls13(&mut msg.payload.0);
        if msg.typ == ContentType::Unknown(0) {
            return Err(Error::PeerMisbehavedError(
                "peer sent bad TLSInnerPlaintext".to_string(),
            ));
        }

        if msg.payload.0.len() > MAX_FRAGMENT_LEN {
            return Err(Error::PeerSentOversizedRecord);
        }

        msg.version = ProtocolVersion::TLSv1_3;
        Ok(msg.into_plain_message())
    }
}

/// Removes the TLS1.3 zero padding and returns the true content type.
fn unpad_tls13(v: &mut Vec<u8>) -> ContentType {
    loop {
        match v.pop() {
            Some(0) => {}
            Some(content_type) => return ContentType::from(content_type),
            None => return ContentType::Unknown(0),
        }
    }
}

/// Build a TLS1.3 write state from a traffic secret.
pub(crate) fn new_tls13_write(
    suite: &'static Tls13CipherSuite,
    secret: &[u8],
) -> Box<dyn MessageEncrypter> {
    let hash = suite.hash_algorithm();
    let alg = suite.common.aead_algorithm;
    let key = derive_traffic_key(hash, secret, alg);
    let iv = derive_traffic_iv(hash, secret);
    Box::new(Tls13MessageEncrypter::new(alg, &key, iv))
}

/// Build a TLS1.3 read state from a traffic secret.
pub(crate) fn new_tls13_read(
    suite: &'static Tls13CipherSuite,
    secret: &[u8],
) -> Box<dyn MessageDecrypter> {
    let hash = suite.hash_algorithm();
    let alg = suite.common.aead_algorithm;
    let key = derive_traffic_key(hash, secret, alg);
    let iv = derive_traffic_iv(hash, secret);
    Box::new(Tls13MessageDecrypter::new(alg, &key, iv))
}

/// A `MessageEncrypter` which doesn't work, but denies in detail.
struct InvalidMessageEncrypter {}

impl MessageEncrypter for InvalidMessageEncrypter {
    fn encrypt(&self, _m: BorrowedPlainMessage, _seq: u64) -> Result<OpaqueMessage, Error> {
        Err(Error::General("encrypt not yet available".to_string()))
    }
}

/// A `MessageDecrypter` which doesn't work, but denies in detail.
struct InvalidMessageDecrypter {}

impl MessageDecrypter for InvalidMessageDecrypter {
    fn decrypt(&self, _m: OpaqueMessage, _seq: u64) -> Result<PlainMessage, Error> {
        Err(Error::DecryptError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonces_are_iv_xor_sequence() {
        let iv = Iv::new([0xff; 12]);
        let nonce = make_nonce(&iv, 1);
        assert_eq!(
            nonce,
            [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe]
        );

        // distinct sequence numbers give distinct nonces
        assert_ne!(make_nonce(&iv, 1), make_nonce(&iv, 2));
        assert_ne!(make_nonce(&iv, 0xffff_ffff), make_nonce(&iv, 0x1_0000_0000));
    }

    #[test]
    fn tls13_round_trip_strips_padding_and_type() {
        let key = [0x11u8; 16];
        let enc = Tls13MessageEncrypter::new(&aead::AES_128_GCM, &key, Iv::new([7; 12]));
        let dec = Tls13MessageDecrypter::new(&aead::AES_128_GCM, &key, Iv::new([7; 12]));

        let protected = enc
            .encrypt(
                BorrowedPlainMessage {
                    typ: ContentType::Handshake,
                    version: ProtocolVersion::TLSv1_3,
                    payload: b"hello",
                },
                42,
            )
            .unwrap();

        // outer type is always application_data
        assert_eq!(protected.typ, ContentType::ApplicationData);
        assert_eq!(protected.version, ProtocolVersion::TLSv1_2);

        let plain = dec.decrypt(protected, 42).unwrap();
        assert_eq!(plain.typ, ContentType::Handshake);
        assert_eq!(plain.payload.0, b"hello");
    }

    #[test]
    fn tls13_wrong_sequence_fails() {
        let key = [0x11u8; 16];
        let enc = Tls13MessageEncrypter::new(&aead::AES_128_GCM, &key, Iv::new([7; 12]));
        let dec = Tls13MessageDecrypter::new(&aead::AES_128_GCM, &key, Iv::new([7; 12]));

        let protected = enc
            .encrypt(
                BorrowedPlainMessage {
                    typ: ContentType::ApplicationData,
                    version: ProtocolVersion::TLSv1_3,
                    payload: b"hello",
                },
                0,
            )
            .unwrap();

        assert_eq!(dec.decrypt(protected, 1).unwrap_err(), Error::DecryptError);
    }

    #[test]
    fn tls13_bit_flip_fails_tag_check() {
        let key = [0x11u8; 16];
        let enc = Tls13MessageEncrypter::new(&aead::AES_128_GCM, &key, Iv::new([7; 12]));
        let dec = Tls13MessageDecrypter::new(&aead::AES_128_GCM, &key, Iv::new([7; 12]));

        let mut protected = enc
            .encrypt(
                BorrowedPlainMessage {
                    typ: ContentType::ApplicationData,
                    version: ProtocolVersion::TLSv1_3,
                    payload: b"hello",
                },
                0,
            )
            .unwrap();

        protected.payload.0[0] ^= 0x01;
        assert_eq!(dec.decrypt(protected, 0).unwrap_err(), Error::DecryptError);
    }

    #[test]
    fn tls13_all_zero_plaintext_is_rejected() {
        let key = [0x11u8; 16];
        // forge "plaintext || type || padding" that is entirely zero
        let enc_key = aead::LessSafeKey::new(
            aead::UnboundKey::new(&aead::AES_128_GCM, &key).unwrap(),
        );
        let mut payload = vec![0u8; 8];
        let total_len = payload.len() + 16;
        let nonce = aead::Nonce::assume_unique_for_key(make_nonce(&Iv::new([7; 12]), 0));
        enc_key
            .seal_in_place_append_tag(nonce, aead::Aad::from(make_tls13_aad(total_len)), &mut payload)
            .unwrap();

        let msg = OpaqueMessage {
            typ: ContentType::ApplicationData,
            version: ProtocolVersion::TLSv1_2,
            payload: Payload::new(payload),
        };

        let dec = Tls13MessageDecrypter::new(&aead::AES_128_GCM, &key, Iv::new([7; 12]));
        assert!(matches!(
            dec.decrypt(msg, 0),
            Err(Error::PeerMisbehavedError(_))
        ));
    }

    #[test]
    fn tls12_gcm_explicit_nonce_round_trip() {
        let key = [0x42u8; 16];
        let full_iv = [9u8; 12];
        let enc = GcmMessageEncrypter::new(&aead::AES_128_GCM, &key, &full_iv);
        let dec = GcmMessageDecrypter::new(&aead::AES_128_GCM, &key, &full_iv[..4]);

        let protected = enc
            .encrypt(
                BorrowedPlainMessage {
                    typ: ContentType::ApplicationData,
                    version: ProtocolVersion::TLSv1_2,
                    payload: b"applejack",
                },
                3,
            )
            .unwrap();

        // explicit nonce (8) + ciphertext + tag (16)
        assert_eq!(protected.payload.0.len(), 8 + 9 + 16);
        assert_eq!(protected.typ, ContentType::ApplicationData);

        let plain = dec.decrypt(protected, 3).unwrap();
        assert_eq!(plain.payload.0, b"applejack");
    }

    #[test]
    fn tls12_chacha_round_trip() {
        let key = [0x42u8; 32];
        let iv = [9u8; 12];
        let enc = ChaCha20Poly1305MessageEncrypter::new(&aead::CHACHA20_POLY1305, &key, &iv);
        let dec = ChaCha20Poly1305MessageDecrypter::new(&aead::CHACHA20_POLY1305, &key, &iv);

        let protected = enc
            .encrypt(
                BorrowedPlainMessage {
                    typ: ContentType::ApplicationData,
                    version: ProtocolVersion::TLSv1_2,
                    payload: b"rainbow",
                },
                9,
            )
            .unwrap();

        assert_eq!(protected.payload.0.len(), 7 + 16);
        let plain = dec.decrypt(protected, 9).unwrap();
        assert_eq!(plain.payload.0, b"rainbow");
    }
}
