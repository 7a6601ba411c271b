use crate::cipher::{MessageDecrypter, MessageEncrypter};
use crate::error::Error;
use crate::msgs::message::{BorrowedPlainMessage, OpaqueMessage, PlainMessage};

static SEQ_SOFT_LIMIT: u64 = 0xffff_ffff_ffff_0000u64;
static SEQ_HARD_LIMIT: u64 = 0xffff_ffff_ffff_fffeu64;

#[derive(PartialEq)]
enum DirectionState {
    /// No keying material.
    Invalid,

    /// Keying material present, but not yet in use.
    Prepared,

    /// Keying material in use.
    Active,
}

/// Record layer that tracks decryption and encryption keys.
pub struct RecordLayer {
    message_encrypter: Box<dyn MessageEncrypter>,
    message_decrypter: Box<dyn MessageDecrypter>,
    write_seq: u64,
    read_seq: u64,
    encrypt_state: DirectionState,
    decrypt_state: DirectionState,
}

impl RecordLayer {
    /// Create new record layer with no keys.
    pub fn new() -> Self {
        Self {
            message_encrypter: <dyn MessageEncrypter>::invalid(),
            message_decrypter: <dyn MessageDecrypter>::invalid(),
            write_seq: 0,
            read_seq: 0,
            encrypt_state: DirectionState::Invalid,
            decrypt_state: DirectionState::Invalid,
        }
    }

    pub(crate) fn is_encrypting(&self) -> bool {
        self.encrypt_state == DirectionState::Active
    }

    pub(crate) fn is_decrypting(&self) -> bool {
        self.decrypt_state == DirectionState::Active
    }

    /// Prepare to use the given `MessageEncrypter` for future message encryption.
    /// It is not used until you call `start_encrypting`.
    pub(crate) fn prepare_message_encrypter(&mut self, cipher: Box<dyn MessageEncrypter>) {
        self.message_encrypter = cipher;
        self.write_seq = 0;
        self.encrypt_state = DirectionState::Prepared;
    }

    /// Prepare to use the given `MessageDecrypter` for future message decryption.
    /// It is not used until you call `start_decrypting`.
    pub(crate) fn prepare_message_decrypter(&mut self, cipher: Box<dyn MessageDecrypter>) {
        self.message_decrypter = cipher;
        self.read_seq = 0;
        self.decrypt_state = DirectionState::Prepared;
    }

    /// Start using the `MessageEncrypter` previously provided to the previous
    /// call to `prepare_message_encrypter`.
    pub(crate) fn start_encrypting(&mut self) {
        debug_assert!(self.encrypt_state == DirectionState::Prepared);
        self.encrypt_state = DirectionState::Active;
    }

    /// Start using the `MessageDecrypter` previously provided to the previous
    /// call to `prepare_message_decrypter`.
    pub(crate) fn start_decrypting(&mut self) {
        debug_assert!(self.decrypt_state == DirectionState::Prepared);
        self.decrypt_state = DirectionState::Active;
    }

    /// Set and start using the given `MessageEncrypter` for future outgoing
    /// message encryption.
    pub(crate) fn set_message_encrypter(&mut self, cipher: Box<dyn MessageEncrypter>) {
        self.prepare_message_encrypter(cipher);
        self.start_encrypting();
    }

    /// Set and start using the given `MessageDecrypter` for future incoming
    /// message decryption.
    pub(crate) fn set_message_decrypter(&mut self, cipher: Box<dyn MessageDecrypter>) {
        self.prepare_message_decrypter(cipher);
        self.start_decrypting();
    }

    /// Return true if we are getting close to encrypting too many
    /// messages with our encryption key.
    pub(crate) fn wants_close_before_encrypt(&self) -> bool {
        self.write_seq == SEQ_SOFT_LIMIT
    }

    /// Return true if we outright refuse to do anything with the
    /// encryption key.
    pub(crate) fn encrypt_exhausted(&self) -> bool {
        self.write_seq >= SEQ_HARD_LIMIT
    }

    /// Decrypt a TLS message.
    ///
    /// `encr` is a decoded message allegedly received from the peer.
    /// If it can be decrypted, its decryption is returned.  Otherwise,
    /// an error is returned.
    pub(crate) fn decrypt_incoming(&mut self, encr: OpaqueMessage) -> Result<PlainMessage, Error> {
        if self.read_seq >= SEQ_HARD_LIMIT {
            return Err(Error::SequenceOverflow);
        }

        let seq = self.read_seq;
        let plain = self.message_decrypter.decrypt(encr, seq)?;
        // The sequence number is consumed only by a successful
        // decryption; a failed record does not advance it (the
        // connection dies anyway).
        self.read_seq += 1;
        Ok(plain)
    }

    /// Encrypt a TLS message.
    ///
    /// `plain` is a TLS message we'd like to send.  This function
    /// panics if the requisite keying material hasn't been established yet.
    pub(crate) fn encrypt_outgoing(
        &mut self,
        plain: BorrowedPlainMessage,
    ) -> Result<OpaqueMessage, Error> {
        debug_assert!(self.encrypt_state == DirectionState::Active);
        if self.encrypt_exhausted() {
            return Err(Error::SequenceOverflow);
        }

        let seq = self.write_seq;
        self.write_seq += 1;
        self.message_encrypter.encrypt(plain, seq)
    }

    /// The sequence number of the next outgoing record.
    pub(crate) fn write_seq(&self) -> u64 {
        self.write_seq
    }

    /// The sequence number of the next expected incoming record.
    pub(crate) fn read_seq(&self) -> u64 {
        self.read_seq
    }

}

impl Default for RecordLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{Iv, Tls13MessageDecrypter, Tls13MessageEncrypter};
    use crate::msgs::base::Payload;
    use crate::msgs::enums::{ContentType, ProtocolVersion};

    fn pair() -> (Box<dyn MessageEncrypter>, Box<dyn MessageDecrypter>) {
        let key = [0x33u8; 16];
        (
            Box::new(Tls13MessageEncrypter::new(
                &ring::aead::AES_128_GCM,
                &key,
                Iv::new([1; 12]),
            )),
            Box::new(Tls13MessageDecrypter::new(
                &ring::aead::AES_128_GCM,
                &key,
                Iv::new([1; 12]),
            )),
        )
    }

    fn plaintext<'a>() -> BorrowedPlainMessage<'a> {
        BorrowedPlainMessage {
            typ: ContentType::ApplicationData,
            version: ProtocolVersion::TLSv1_3,
            payload: b"data",
        }
    }

    #[test]
    fn install_resets_sequence_to_zero() {
        let mut rl = RecordLayer::new();
        let (enc, _) = pair();
        rl.set_message_encrypter(enc);
        assert_eq!(rl.write_seq(), 0);

        rl.encrypt_outgoing(plaintext()).unwrap();
        assert_eq!(rl.write_seq(), 1);

        // new epoch: counter must return to exactly 0
        let (enc, _) = pair();
        rl.set_message_encrypter(enc);
        assert_eq!(rl.write_seq(), 0);
    }

    #[test]
    fn sequence_numbers_advance_per_record() {
        let mut rl = RecordLayer::new();
        let (enc, dec) = pair();
        rl.set_message_encrypter(enc);
        rl.set_message_decrypter(dec);

        for expect_seq in 0..4u64 {
            assert_eq!(rl.read_seq(), expect_seq);
            let wire = rl.encrypt_outgoing(plaintext()).unwrap();
            let plain = rl.decrypt_incoming(wire).unwrap();
            assert_eq!(plain.payload, Payload::new(&b"data"[..]));
            assert_eq!(rl.read_seq(), expect_seq + 1);
        }
    }

    #[test]
    fn failed_decrypt_does_not_advance_sequence() {
        let mut rl = RecordLayer::new();
        let (enc, dec) = pair();
        rl.set_message_encrypter(enc);
        rl.set_message_decrypter(dec);

        let mut wire = rl.encrypt_outgoing(plaintext()).unwrap();
        wire.payload.0[0] ^= 0x80;
        assert!(rl.decrypt_incoming(wire).is_err());
        assert_eq!(rl.read_seq(), 0);
    }

    #[test]
    fn exhausted_write_sequence_is_refused() {
        let mut rl = RecordLayer::new();
        let (enc, _) = pair();
        rl.set_message_encrypter(enc);
        rl.write_seq = SEQ_HARD_LIMIT;

        assert_eq!(
            rl.encrypt_outgoing(plaintext()).unwrap_err(),
            Error::SequenceOverflow
        );
    }
}
