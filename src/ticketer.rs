use crate::error::Error;
use crate::rand::RandomSource;

use ring::aead;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// The timebase for expiring and rolling tickets and ticketing keys:
/// seconds since the Unix epoch.
#[derive(Clone, Copy, Debug)]
pub struct TimeBase(u64);

impl TimeBase {
    #[inline]
    pub fn now() -> Result<Self, Error> {
        Ok(Self(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)?
                .as_secs(),
        ))
    }

    #[inline]
    pub fn as_secs(&self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_secs(secs: u64) -> Self {
        Self(secs)
    }
}

/// A producer of tickets.  The tickets are opaque to clients: anything
/// the server can later recover counts.
pub trait ProducesTickets: Send + Sync {
    /// Returns true if this implementation will encrypt/decrypt
    /// tickets.  Should return false if this is a dummy
    /// implementation: the server will not send the SessionTicket
    /// extension and will not issue tickets.
    fn enabled(&self) -> bool;

    /// Returns the lifetime in seconds of tickets produced now.
    /// The lifetime is provided as a hint to clients that the
    /// ticket will not be useful after the given time.
    fn lifetime(&self) -> u32;

    /// Encrypt and authenticate `plain`, returning the resulting
    /// ticket.  Return None if `plain` cannot be encrypted for
    /// some reason: an empty ticket will be sent and the connection
    /// will continue.
    fn encrypt(&self, plain: &[u8]) -> Option<Vec<u8>>;

    /// Decrypt `cipher`, validating its authenticity protection
    /// and recovering the plaintext.  `cipher` is fully attacker
    /// controlled, so decryption side-channels are of interest.
    fn decrypt(&self, cipher: &[u8]) -> Option<Vec<u8>>;
}

/// A ticketer that produces unauthenticated, never-decryptable tickets:
/// resumption is effectively off.
pub(crate) struct NeverProducesTickets;

impl ProducesTickets for NeverProducesTickets {
    fn enabled(&self) -> bool {
        false
    }
    fn lifetime(&self) -> u32 {
        0
    }
    fn encrypt(&self, _bytes: &[u8]) -> Option<Vec<u8>> {
        None
    }
    fn decrypt(&self, _bytes: &[u8]) -> Option<Vec<u8>> {
        None
    }
}

/// A concrete, safe ticket creation mechanism: tickets are sealed with
/// ChaCha20-Poly1305 under a random process-lifetime key, with a random
/// nonce carried in the ticket.
///
/// The encryption key is bound to this process: tickets are not
/// recoverable across server restarts, which is the conservative
/// default for forward secrecy.
pub struct AeadTicketer {
    key: aead::LessSafeKey,
    lifetime: u32,
    random: Arc<dyn RandomSource>,
}

impl AeadTicketer {
    /// Make a ticketer with a random key, producing tickets with the
    /// given lifetime in seconds.
    pub fn new(lifetime: u32, random: Arc<dyn RandomSource>) -> Result<Arc<dyn ProducesTickets>, Error> {
        let mut key = [0u8; 32];
        random.fill(&mut key)?;

        let key = aead::UnboundKey::new(&aead::CHACHA20_POLY1305, &key)
            .map_err(|_| Error::General("ticketer key setup".into()))?;

        Ok(Arc::new(Self {
            key: aead::LessSafeKey::new(key),
            lifetime,
            random,
        }))
    }
}

impl ProducesTickets for AeadTicketer {
    fn enabled(&self) -> bool {
        true
    }

    fn lifetime(&self) -> u32 {
        self.lifetime
    }

    /// Encrypt `message` and return the ciphertext.
    fn encrypt(&self, message: &[u8]) -> Option<Vec<u8>> {
        // Random nonce, because a counter is a state.
        let mut nonce_buf = [0u8; 12];
        self.random.fill(&mut nonce_buf).ok()?;
        let nonce = aead::Nonce::assume_unique_for_key(nonce_buf);

        let mut ciphertext =
            Vec::with_capacity(nonce_buf.len() + message.len() + self.key.algorithm().tag_len());
        ciphertext.extend(nonce_buf);
        ciphertext.extend(message);
        self.key
            .seal_in_place_separate_tag(nonce, aead::Aad::empty(), &mut ciphertext[nonce_buf.len()..])
            .map(|tag| {
                ciphertext.extend(tag.as_ref());
                ciphertext
            })
            .ok()
    }

    /// Decrypt `ciphertext` and recover the original message.
    fn decrypt(&self, ciphertext: &[u8]) -> Option<Vec<u8>> {
        let nonce = ciphertext.get(..12)?;
        let ciphertext = ciphertext.get(12..)?;

        let nonce = aead::Nonce::try_assume_unique_for_key(nonce).ok()?;
        let mut out = ciphertext.to_vec();

        let plain_len = self
            .key
            .open_in_place(nonce, aead::Aad::empty(), &mut out)
            .ok()?
            .len();
        out.truncate(plain_len);

        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rand::RingRandom;

    #[test]
    fn round_trips_and_rejects_tampering() {
        let t = AeadTicketer::new(7200, Arc::new(RingRandom::default())).unwrap();
        assert!(t.enabled());
        assert_eq!(t.lifetime(), 7200);

        let ticket = t.encrypt(b"session state").unwrap();
        assert_eq!(t.decrypt(&ticket).unwrap(), b"session state");

        let mut bad = ticket.clone();
        *bad.last_mut().unwrap() ^= 1;
        assert!(t.decrypt(&bad).is_none());

        assert!(t.decrypt(&ticket[..8]).is_none());
    }

    #[test]
    fn tickets_are_unlinkable() {
        let t = AeadTicketer::new(7200, Arc::new(RingRandom::default())).unwrap();
        // same plaintext, different ciphertexts: fresh nonce each time
        assert_ne!(t.encrypt(b"x").unwrap(), t.encrypt(b"x").unwrap());
    }

    #[test]
    fn distinct_ticketers_cannot_read_each_others_tickets() {
        let a = AeadTicketer::new(7200, Arc::new(RingRandom::default())).unwrap();
        let b = AeadTicketer::new(7200, Arc::new(RingRandom::default())).unwrap();
        let ticket = a.encrypt(b"state").unwrap();
        assert!(b.decrypt(&ticket).is_none());
    }
}
