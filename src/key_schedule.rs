use crate::cipher::Iv;
use crate::error::Error;
use crate::suites::Tls13CipherSuite;

use ring::{aead, digest, hmac};

/// Key schedule maintenance for TLS1.3
///
/// The kinds of secret we can extract from `KeySchedule`.
#[derive(Debug, Clone, Copy, PartialEq)]
enum SecretKind {
    ResumptionPskBinderKey,
    ClientHandshakeTrafficSecret,
    ServerHandshakeTrafficSecret,
    ClientApplicationTrafficSecret,
    ServerApplicationTrafficSecret,
    ExporterMasterSecret,
    ResumptionMasterSecret,
    DerivedSecret,
}

impl SecretKind {
    fn to_bytes(self) -> &'static [u8] {
        match self {
            Self::ResumptionPskBinderKey => b"res binder",
            Self::ClientHandshakeTrafficSecret => b"c hs traffic",
            Self::ServerHandshakeTrafficSecret => b"s hs traffic",
            Self::ClientApplicationTrafficSecret => b"c ap traffic",
            Self::ServerApplicationTrafficSecret => b"s ap traffic",
            Self::ExporterMasterSecret => b"exp master",
            Self::ResumptionMasterSecret => b"res master",
            Self::DerivedSecret => b"derived",
        }
    }
}

/// The underlying key schedule state: the current HKDF-Extract output
/// and the hash algorithm it is sized by.
struct KeySchedule {
    current: Vec<u8>,
    algorithm: &'static digest::Algorithm,
}

impl KeySchedule {
    fn new(algorithm: &'static digest::Algorithm, secret: &[u8]) -> Self {
        let zeroes = vec![0u8; algorithm.output_len];
        Self {
            current: hkdf_extract(algorithm, &zeroes, secret),
            algorithm,
        }
    }

    fn new_with_empty_secret(algorithm: &'static digest::Algorithm) -> Self {
        let zeroes = vec![0u8; algorithm.output_len];
        Self::new(algorithm, &zeroes)
    }

    /// Input the given secret, chaining via the "derived" secret.
    fn input_secret(&mut self, secret: &[u8]) {
        let salt = self.derive_for_empty_hash(SecretKind::DerivedSecret);
        self.current = hkdf_extract(self.algorithm, &salt, secret);
    }

    /// Input the zero secret.
    fn input_empty(&mut self) {
        let zeroes = vec![0u8; self.algorithm.output_len];
        self.input_secret(&zeroes);
    }

    /// Derive a secret of kind `kind`, using the current handshake hash.
    fn derive(&self, kind: SecretKind, hs_hash: &[u8]) -> Vec<u8> {
        hkdf_expand_label(
            self.algorithm,
            &self.current,
            kind.to_bytes(),
            hs_hash,
            self.algorithm.output_len,
        )
    }

    /// Derive a secret of kind `kind` using the hash of the empty string.
    fn derive_for_empty_hash(&self, kind: SecretKind) -> Vec<u8> {
        let empty_hash = digest::digest(self.algorithm, b"");
        self.derive(kind, empty_hash.as_ref())
    }

    /// Sign the finished message consisting of `hs_hash` using a derived
    /// finished key from the given traffic secret.
    fn sign_finish(&self, base_secret: &[u8], hs_hash: &[u8]) -> Vec<u8> {
        let hmac_alg = hmac_for_digest(self.algorithm);
        let finished_key = hkdf_expand_label(
            self.algorithm,
            base_secret,
            b"finished",
            b"",
            self.algorithm.output_len,
        );

        let key = hmac::Key::new(hmac_alg, &finished_key);
        hmac::sign(&key, hs_hash).as_ref().to_vec()
    }
}

/// The initial key schedule state: zero or PSK input only.
pub(crate) struct KeyScheduleEarly {
    ks: KeySchedule,
}

impl KeyScheduleEarly {
    pub(crate) fn new(suite: &'static Tls13CipherSuite, secret: &[u8]) -> Self {
        Self {
            ks: KeySchedule::new(suite.hash_algorithm(), secret),
        }
    }

    /// Compute the PSK binder value over `truncated_hash`, the hash of
    /// the ClientHello up to (not including) its binders list.
    pub(crate) fn resumption_psk_binder_key_and_sign_verify_data(
        &self,
        truncated_hash: &[u8],
    ) -> Vec<u8> {
        let binder_key = self
            .ks
            .derive_for_empty_hash(SecretKind::ResumptionPskBinderKey);
        self.ks.sign_finish(&binder_key, truncated_hash)
    }

    pub(crate) fn into_handshake(mut self, ecdhe_shared: &[u8]) -> KeyScheduleHandshake {
        self.ks.input_secret(ecdhe_shared);
        KeyScheduleHandshake {
            ks: self.ks,
            current_client_traffic_secret: Vec::new(),
            current_server_traffic_secret: Vec::new(),
        }
    }
}

/// KeySchedule during the handshake proper: ECDHE has been input.
pub(crate) struct KeyScheduleHandshake {
    ks: KeySchedule,
    current_client_traffic_secret: Vec<u8>,
    current_server_traffic_secret: Vec<u8>,
}

impl KeyScheduleHandshake {
    /// Begin a key schedule with no PSK, directly at the handshake stage.
    pub(crate) fn start(suite: &'static Tls13CipherSuite, ecdhe_shared: &[u8]) -> Self {
        KeyScheduleEarly {
            ks: KeySchedule::new_with_empty_secret(suite.hash_algorithm()),
        }
        .into_handshake(ecdhe_shared)
    }

    pub(crate) fn client_handshake_traffic_secret(&mut self, hs_hash: &[u8]) -> Vec<u8> {
        let secret = self
            .ks
            .derive(SecretKind::ClientHandshakeTrafficSecret, hs_hash);
        self.current_client_traffic_secret = secret.clone();
        secret
    }

    pub(crate) fn server_handshake_traffic_secret(&mut self, hs_hash: &[u8]) -> Vec<u8> {
        let secret = self
            .ks
            .derive(SecretKind::ServerHandshakeTrafficSecret, hs_hash);
        self.current_server_traffic_secret = secret.clone();
        secret
    }

    pub(crate) fn sign_server_finish(&self, hs_hash: &[u8]) -> Vec<u8> {
        self.ks
            .sign_finish(&self.current_server_traffic_secret, hs_hash)
    }

    pub(crate) fn sign_client_finish(&self, hs_hash: &[u8]) -> Vec<u8> {
        self.ks
            .sign_finish(&self.current_client_traffic_secret, hs_hash)
    }

    /// Input the empty secret (producing the master secret internally) and
    /// derive the application traffic secrets and exporter secret over
    /// `hs_hash`, which covers ClientHello..server Finished.
    pub(crate) fn into_traffic_with_client_finished_pending(
        mut self,
        hs_hash: &[u8],
    ) -> KeyScheduleTrafficWithClientFinishedPending {
        let handshake_client_secret = std::mem::take(&mut self.current_client_traffic_secret);
        self.ks.input_empty();

        let current_client_traffic_secret = self
            .ks
            .derive(SecretKind::ClientApplicationTrafficSecret, hs_hash);
        let current_server_traffic_secret = self
            .ks
            .derive(SecretKind::ServerApplicationTrafficSecret, hs_hash);
        let current_exporter_secret = self
            .ks
            .derive(SecretKind::ExporterMasterSecret, hs_hash);

        KeyScheduleTrafficWithClientFinishedPending {
            handshake_client_traffic_secret: handshake_client_secret,
            traffic: KeyScheduleTraffic {
                ks: self.ks,
                current_client_traffic_secret,
                current_server_traffic_secret,
                current_exporter_secret,
            },
        }
    }
}

/// KeySchedule during traffic stage, with the client's Finished still
/// outstanding.  The server Finished has been sent/verified, and the
/// application traffic secrets are available.
pub(crate) struct KeyScheduleTrafficWithClientFinishedPending {
    handshake_client_traffic_secret: Vec<u8>,
    traffic: KeyScheduleTraffic,
}

impl KeyScheduleTrafficWithClientFinishedPending {
    /// The expected contents of the client's Finished: signed with the
    /// client *handshake* traffic secret, even though application
    /// secrets are installed by now.
    pub(crate) fn sign_client_finish(&self, hs_hash: &[u8]) -> Vec<u8> {
        self.traffic
            .ks
            .sign_finish(&self.handshake_client_traffic_secret, hs_hash)
    }

    pub(crate) fn into_traffic(self) -> KeyScheduleTraffic {
        self.traffic
    }

    pub(crate) fn current_client_traffic_secret(&self) -> &[u8] {
        &self.traffic.current_client_traffic_secret
    }

    pub(crate) fn current_server_traffic_secret(&self) -> &[u8] {
        &self.traffic.current_server_traffic_secret
    }
}

/// KeySchedule during traffic stage.  All traffic & exporter keys are
/// guaranteed to be available.
pub(crate) struct KeyScheduleTraffic {
    ks: KeySchedule,
    current_client_traffic_secret: Vec<u8>,
    current_server_traffic_secret: Vec<u8>,
    current_exporter_secret: Vec<u8>,
}

impl KeyScheduleTraffic {
    /// Rotate the client traffic secret per RFC8446 s7.2, returning the
    /// new secret.
    pub(crate) fn next_client_application_traffic_secret(&mut self) -> Vec<u8> {
        let next = derive_next_traffic_secret(
            self.ks.algorithm,
            &self.current_client_traffic_secret,
        );
        self.current_client_traffic_secret = next.clone();
        next
    }

    /// Rotate the server traffic secret, returning the new secret.
    pub(crate) fn next_server_application_traffic_secret(&mut self) -> Vec<u8> {
        let next = derive_next_traffic_secret(
            self.ks.algorithm,
            &self.current_server_traffic_secret,
        );
        self.current_server_traffic_secret = next.clone();
        next
    }

    /// Derive the resumption master secret over `hs_hash`, which covers
    /// ClientHello..client Finished, and from it the per-ticket PSK for
    /// `nonce`.
    pub(crate) fn resumption_master_secret_and_derive_ticket_psk(
        &self,
        hs_hash: &[u8],
        nonce: &[u8],
    ) -> Vec<u8> {
        let resumption_master_secret = self
            .ks
            .derive(SecretKind::ResumptionMasterSecret, hs_hash);
        hkdf_expand_label(
            self.ks.algorithm,
            &resumption_master_secret,
            b"resumption",
            nonce,
            self.ks.algorithm.output_len,
        )
    }

    /// RFC8446 s7.5 exporter interface.
    pub(crate) fn export_keying_material(
        &self,
        out: &mut [u8],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), Error> {
        let digest_alg = self.ks.algorithm;

        let h_empty = digest::digest(digest_alg, b"");
        let secret = hkdf_expand_label(
            digest_alg,
            &self.current_exporter_secret,
            label,
            h_empty.as_ref(),
            digest_alg.output_len,
        );

        let h_context = digest::digest(digest_alg, context.unwrap_or(b""));
        let okm = hkdf_expand_label(
            digest_alg,
            &secret,
            b"exporter",
            h_context.as_ref(),
            out.len(),
        );
        out.copy_from_slice(&okm);
        Ok(())
    }
}

/// `HKDF-Expand-Label(secret, "traffic upd", "", Hash.length)`
pub(crate) fn derive_next_traffic_secret(
    algorithm: &'static digest::Algorithm,
    secret: &[u8],
) -> Vec<u8> {
    hkdf_expand_label(algorithm, secret, b"traffic upd", b"", algorithm.output_len)
}

/// Derive an AEAD key of the right length from a traffic secret.
pub(crate) fn derive_traffic_key(
    algorithm: &'static digest::Algorithm,
    secret: &[u8],
    aead_algorithm: &'static aead::Algorithm,
) -> Vec<u8> {
    hkdf_expand_label(algorithm, secret, b"key", b"", aead_algorithm.key_len())
}

/// Derive a record-protection IV from a traffic secret.
pub(crate) fn derive_traffic_iv(algorithm: &'static digest::Algorithm, secret: &[u8]) -> Iv {
    let out = hkdf_expand_label(algorithm, secret, b"iv", b"", aead::NONCE_LEN);
    Iv::copy(&out)
}

fn hmac_for_digest(algorithm: &'static digest::Algorithm) -> hmac::Algorithm {
    if algorithm == &digest::SHA384 {
        hmac::HMAC_SHA384
    } else {
        hmac::HMAC_SHA256
    }
}

/// RFC5869 HKDF-Extract.
fn hkdf_extract(algorithm: &'static digest::Algorithm, salt: &[u8], ikm: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac_for_digest(algorithm), salt);
    hmac::sign(&key, ikm).as_ref().to_vec()
}

/// RFC5869 HKDF-Expand.
fn hkdf_expand(
    algorithm: &'static digest::Algorithm,
    prk: &[u8],
    info: &[u8],
    out_len: usize,
) -> Vec<u8> {
    let key = hmac::Key::new(hmac_for_digest(algorithm), prk);
    let mut out = Vec::with_capacity(out_len);
    let mut t: Vec<u8> = Vec::new();
    let mut n = 1u8;

    while out.len() < out_len {
        let mut ctx = hmac::Context::with_key(&key);
        ctx.update(&t);
        ctx.update(info);
        ctx.update(&[n]);
        t = ctx.sign().as_ref().to_vec();
        out.extend_from_slice(&t);
        n += 1;
    }

    out.truncate(out_len);
    out
}

/// RFC8446 s7.1 HKDF-Expand-Label.
pub(crate) fn hkdf_expand_label(
    algorithm: &'static digest::Algorithm,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    out_len: usize,
) -> Vec<u8> {
    const LABEL_PREFIX: &[u8] = b"tls13 ";

    let mut info = Vec::with_capacity(2 + 1 + LABEL_PREFIX.len() + label.len() + 1 + context.len());
    info.extend_from_slice(&(out_len as u16).to_be_bytes());
    info.push((LABEL_PREFIX.len() + label.len()) as u8);
    info.extend_from_slice(LABEL_PREFIX);
    info.extend_from_slice(label);
    info.push(context.len() as u8);
    info.extend_from_slice(context);

    hkdf_expand(algorithm, secret, &info, out_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// RFC5869 A.1 test case, SHA-256.
    #[test]
    fn hkdf_rfc5869_case_1() {
        let ikm = [0x0bu8; 22];
        let salt: Vec<u8> = (0x00..=0x0c).collect();
        let info: Vec<u8> = (0xf0..=0xf9).collect();

        let prk = hkdf_extract(&digest::SHA256, &salt, &ikm);
        assert_eq!(
            prk,
            hex::decode("077709362c2e32df0ddc3f0dc47bba6390b6c73bb50f9c3122ec844ad7c2b3e5")
                .unwrap()
        );

        let okm = hkdf_expand(&digest::SHA256, &prk, &info, 42);
        assert_eq!(
            okm,
            hex::decode(
                "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
            )
            .unwrap()
        );
    }

    /// The two constants every TLS1.3 key schedule starts from.
    #[test]
    fn early_and_derived_secrets_without_psk() {
        let ks = KeySchedule::new_with_empty_secret(&digest::SHA256);
        assert_eq!(
            ks.current,
            hex::decode("33ad0a1c607ec03b09e6cd9893680ce210adf300aa1f2660e1b22e10f170f92a")
                .unwrap()
        );

        assert_eq!(
            ks.derive_for_empty_hash(SecretKind::DerivedSecret),
            hex::decode("6f2615a108c702c5678f54fc9dbab69716c076189c48250cebeac3576c3611ba")
                .unwrap()
        );
    }

    #[test]
    fn traffic_key_lengths_fit_the_aead() {
        let secret = [7u8; 32];
        let key = derive_traffic_key(&digest::SHA256, &secret, &aead::AES_128_GCM);
        assert_eq!(key.len(), 16);
        let key = derive_traffic_key(&digest::SHA256, &secret, &aead::CHACHA20_POLY1305);
        assert_eq!(key.len(), 32);
        assert_eq!(derive_traffic_iv(&digest::SHA256, &secret).as_ref().len(), 12);
    }

    #[test]
    fn key_update_rotation_changes_both_directions_independently() {
        let suite = match crate::suites::TLS13_AES_128_GCM_SHA256 {
            crate::suites::SupportedCipherSuite::Tls13(s) => s,
            _ => unreachable!(),
        };

        let mut hs = KeyScheduleHandshake::start(suite, &[0x20; 32]);
        let hash = [0x5au8; 32];
        hs.client_handshake_traffic_secret(&hash);
        hs.server_handshake_traffic_secret(&hash);

        let mut traffic = hs
            .into_traffic_with_client_finished_pending(&hash)
            .into_traffic();

        let c0 = traffic.current_client_traffic_secret.clone();
        let s0 = traffic.current_server_traffic_secret.clone();
        let c1 = traffic.next_client_application_traffic_secret();
        assert_ne!(c0, c1);
        assert_eq!(s0, traffic.current_server_traffic_secret);
        assert_eq!(c1, derive_next_traffic_secret(&digest::SHA256, &c0));
    }

    #[test]
    fn finished_keys_differ_per_direction() {
        let suite = match crate::suites::TLS13_AES_128_GCM_SHA256 {
            crate::suites::SupportedCipherSuite::Tls13(s) => s,
            _ => unreachable!(),
        };

        let mut hs = KeyScheduleHandshake::start(suite, &[0x20; 32]);
        let hash = [0x5au8; 32];
        hs.client_handshake_traffic_secret(&hash);
        hs.server_handshake_traffic_secret(&hash);

        assert_ne!(hs.sign_client_finish(&hash), hs.sign_server_finish(&hash));
        assert_eq!(hs.sign_client_finish(&hash).len(), 32);
    }
}
