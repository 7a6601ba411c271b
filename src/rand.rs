//! The single place where we generate random material for our own use.

use crate::error::Error;

use ring::rand::{SecureRandom, SystemRandom};

/// A source of cryptographically secure randomness.
///
/// The process-wide CSPRNG is deliberately not reachable from elsewhere
/// in the crate: anything needing entropy receives one of these through
/// its configuration.
pub trait RandomSource: Send + Sync + std::fmt::Debug {
    /// Fill the whole of `dest` with random material.
    fn fill(&self, dest: &mut [u8]) -> Result<(), Error>;
}

/// `RandomSource` backed by ring's `SystemRandom`.
#[derive(Debug)]
pub struct RingRandom(SystemRandom);

impl Default for RingRandom {
    fn default() -> Self {
        Self(SystemRandom::new())
    }
}

impl RandomSource for RingRandom {
    fn fill(&self, dest: &mut [u8]) -> Result<(), Error> {
        self.0
            .fill(dest)
            .map_err(|_| Error::FailedToGetRandomBytes)
    }
}

/// Return a uniformly random `u32` from `source`.
pub fn random_u32(source: &dyn RandomSource) -> Result<u32, Error> {
    let mut buf = [0u8; 4];
    source.fill(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_all_bytes() {
        let source = RingRandom::default();
        let mut buf = [0u8; 64];
        source.fill(&mut buf).unwrap();
        // 64 zero bytes from a CSPRNG is 2^-512 likely
        assert_ne!(buf, [0u8; 64]);
    }
}
