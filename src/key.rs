use crate::msgs::codec;
use crate::msgs::codec::{Codec, Reader};

use std::fmt;

/// This type contains a private key by value.
///
/// The private key must be DER-encoded ASN.1 in either
/// PKCS#8 or PKCS#1 format.
#[derive(Clone)]
pub struct PrivateKey(pub Vec<u8>);

/// This type contains a single certificate by value.
///
/// The certificate must be in DER-encoded X.509 format.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Certificate(pub Vec<u8>);

impl Codec for Certificate {
    fn encode(&self, bytes: &mut Vec<u8>) {
        codec::u24(self.0.len() as u32).encode(bytes);
        bytes.extend_from_slice(&self.0);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let len = codec::u24::read(r)?.0 as usize;
        let mut sub = r.sub(len)?;
        let body = sub.rest().to_vec();
        Some(Self(body))
    }
}

impl AsRef<[u8]> for Certificate {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Certificate(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::Certificate;
    use crate::msgs::codec::Codec;

    #[test]
    fn certificate_is_u24_prefixed() {
        let cert = Certificate(vec![1, 2, 3]);
        assert_eq!(cert.get_encoding(), vec![0, 0, 3, 1, 2, 3]);
        assert_eq!(Certificate::read_bytes(&[0, 0, 1, 0xf0]).unwrap().0, vec![0xf0]);
    }
}
