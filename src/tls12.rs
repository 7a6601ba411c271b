//! TLS1.2 secret plumbing: master-secret computation (with and without
//! the RFC7627 extended-master-secret binding), key-block expansion, and
//! Finished verify_data.

use crate::cipher::{
    ChaCha20Poly1305MessageDecrypter, ChaCha20Poly1305MessageEncrypter, GcmMessageDecrypter,
    GcmMessageEncrypter, MessageDecrypter, MessageEncrypter,
};
use crate::prf;
use crate::suites::{BulkAlgorithm, Tls12CipherSuite};

/// The two random values from the Hello messages.
#[derive(Clone, Copy)]
pub(crate) struct ConnectionRandoms {
    pub(crate) client: [u8; 32],
    pub(crate) server: [u8; 32],
}

impl ConnectionRandoms {
    pub(crate) fn new(client: crate::msgs::handshake::Random, server: crate::msgs::handshake::Random) -> Self {
        Self {
            client: client.0,
            server: server.0,
        }
    }
}

/// Which side of the connection we are.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Side {
    Client,
    Server,
}

fn join_randoms(first: &[u8; 32], second: &[u8; 32]) -> [u8; 64] {
    let mut randoms = [0u8; 64];
    randoms[..32].copy_from_slice(first);
    randoms[32..].copy_from_slice(second);
    randoms
}

/// TLS1.2 per-connection keying material
pub(crate) struct ConnectionSecrets {
    pub(crate) randoms: ConnectionRandoms,
    suite: &'static Tls12CipherSuite,
    pub(crate) master_secret: [u8; 48],
}

impl ConnectionSecrets {
    /// The classic master secret: bound to the randoms only.
    pub(crate) fn new(
        randoms: &ConnectionRandoms,
        suite: &'static Tls12CipherSuite,
        pms: &[u8],
    ) -> Self {
        let mut ret = Self {
            randoms: *randoms,
            suite,
            master_secret: [0u8; 48],
        };

        let randoms = join_randoms(&ret.randoms.client, &ret.randoms.server);
        prf::prf(
            &mut ret.master_secret,
            suite.hmac_algorithm,
            pms,
            b"master secret",
            &randoms,
        );
        ret
    }

    /// The RFC7627 extended master secret: bound to the whole
    /// ClientHello..ClientKeyExchange transcript.
    pub(crate) fn new_ems(
        randoms: &ConnectionRandoms,
        hs_hash: &[u8],
        suite: &'static Tls12CipherSuite,
        pms: &[u8],
    ) -> Self {
        let mut ret = Self {
            randoms: *randoms,
            suite,
            master_secret: [0u8; 48],
        };

        prf::prf(
            &mut ret.master_secret,
            suite.hmac_algorithm,
            pms,
            b"extended master secret",
            hs_hash,
        );
        ret
    }

    /// Resume with a master secret recovered from a session.
    pub(crate) fn new_resume(
        randoms: &ConnectionRandoms,
        suite: &'static Tls12CipherSuite,
        master_secret: &[u8],
    ) -> Self {
        let mut ret = Self {
            randoms: *randoms,
            suite,
            master_secret: [0u8; 48],
        };
        ret.master_secret
            .copy_from_slice(master_secret);
        ret
    }

    /// Make a `MessageCipherPair` based on the given supported ciphersuite `self.suite`.
    ///
    /// RFC5246: "The master secret is expanded into a sequence of
    /// secure bytes, which is then split to a client write MAC key,
    /// a server write MAC key, a client write encryption key, and a
    /// server write encryption key."
    pub(crate) fn make_cipher_pair(
        &self,
        side: Side,
    ) -> (Box<dyn MessageDecrypter>, Box<dyn MessageEncrypter>) {
        // Make a key block, and chop it up.
        // Our shipped suites are all AEAD, so the MAC keys have zero size.
        let key_block = self.make_key_block();
        let suite = self.suite;
        let alg = suite.common.aead_algorithm;

        let (client_write_key, key_block) = key_block.split_at(alg.key_len());
        let (server_write_key, key_block) = key_block.split_at(alg.key_len());
        let (client_write_iv, key_block) = key_block.split_at(suite.fixed_iv_len);
        let (server_write_iv, extra) = key_block.split_at(suite.fixed_iv_len);

        let (write_key, write_iv, read_key, read_iv) = match side {
            Side::Client => (
                client_write_key,
                client_write_iv,
                server_write_key,
                server_write_iv,
            ),
            Side::Server => (
                server_write_key,
                server_write_iv,
                client_write_key,
                client_write_iv,
            ),
        };

        match suite.common.bulk {
            BulkAlgorithm::Aes128Gcm | BulkAlgorithm::Aes256Gcm => {
                let mut full_write_iv = Vec::with_capacity(12);
                full_write_iv.extend_from_slice(write_iv);
                full_write_iv.extend_from_slice(extra);

                (
                    Box::new(GcmMessageDecrypter::new(alg, read_key, read_iv)),
                    Box::new(GcmMessageEncrypter::new(alg, write_key, &full_write_iv)),
                )
            }
            BulkAlgorithm::Chacha20Poly1305 => (
                Box::new(ChaCha20Poly1305MessageDecrypter::new(alg, read_key, read_iv)),
                Box::new(ChaCha20Poly1305MessageEncrypter::new(alg, write_key, write_iv)),
            ),
        }
    }

    fn make_key_block(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.suite.key_block_len()];

        // NOTE: opposite order to above for no good reason.
        // Don't design security protocols on drugs, kids.
        let randoms = join_randoms(&self.randoms.server, &self.randoms.client);
        prf::prf(
            &mut out,
            self.suite.hmac_algorithm,
            &self.master_secret,
            b"key expansion",
            &randoms,
        );

        out
    }

    pub(crate) fn suite(&self) -> &'static Tls12CipherSuite {
        self.suite
    }

    pub(crate) fn get_master_secret(&self) -> Vec<u8> {
        self.master_secret.to_vec()
    }

    fn make_verify_data(&self, handshake_hash: &[u8], label: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; 12];
        prf::prf(
            &mut out,
            self.suite.hmac_algorithm,
            &self.master_secret,
            label,
            handshake_hash,
        );
        out
    }

    pub(crate) fn client_verify_data(&self, handshake_hash: &[u8]) -> Vec<u8> {
        self.make_verify_data(handshake_hash, b"client finished")
    }

    pub(crate) fn server_verify_data(&self, handshake_hash: &[u8]) -> Vec<u8> {
        self.make_verify_data(handshake_hash, b"server finished")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::base::Payload;
    use crate::msgs::enums::{ContentType, ProtocolVersion};
    use crate::msgs::message::BorrowedPlainMessage;
    use crate::suites::{SupportedCipherSuite, TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256};

    fn gcm_suite() -> &'static Tls12CipherSuite {
        match TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256 {
            SupportedCipherSuite::Tls12(suite) => suite,
            _ => unreachable!(),
        }
    }

    fn randoms() -> ConnectionRandoms {
        ConnectionRandoms {
            client: [1; 32],
            server: [2; 32],
        }
    }

    #[test]
    fn sides_agree_on_traffic() {
        let secrets = ConnectionSecrets::new(&randoms(), gcm_suite(), &[0x17; 32]);
        let (_, client_enc) = secrets.make_cipher_pair(Side::Client);
        let (server_dec, _) = secrets.make_cipher_pair(Side::Server);

        let protected = client_enc
            .encrypt(
                BorrowedPlainMessage {
                    typ: ContentType::ApplicationData,
                    version: ProtocolVersion::TLSv1_2,
                    payload: b"hello from the client",
                },
                0,
            )
            .unwrap();

        let plain = server_dec.decrypt(protected, 0).unwrap();
        assert_eq!(plain.payload, Payload::new(&b"hello from the client"[..]));
    }

    #[test]
    fn ems_and_classic_master_secrets_differ() {
        let pms = [0x17; 32];
        let classic = ConnectionSecrets::new(&randoms(), gcm_suite(), &pms);
        let ems = ConnectionSecrets::new_ems(&randoms(), &[9; 32], gcm_suite(), &pms);
        assert_ne!(classic.master_secret, ems.master_secret);
    }

    #[test]
    fn verify_data_is_12_bytes_and_directional() {
        let secrets = ConnectionSecrets::new(&randoms(), gcm_suite(), &[0x17; 32]);
        let hash = [0x44; 32];
        let c = secrets.client_verify_data(&hash);
        let s = secrets.server_verify_data(&hash);
        assert_eq!(c.len(), 12);
        assert_eq!(s.len(), 12);
        assert_ne!(c, s);
    }

    #[test]
    fn resumed_secrets_reproduce_keys() {
        let original = ConnectionSecrets::new(&randoms(), gcm_suite(), &[0x17; 32]);
        let resumed =
            ConnectionSecrets::new_resume(&randoms(), gcm_suite(), &original.get_master_secret());
        assert_eq!(original.master_secret, resumed.master_secret);
    }
}
