use std::collections::VecDeque;

use crate::msgs::codec;
use crate::msgs::enums::{ContentType, ProtocolVersion};
use crate::msgs::handshake::HandshakeMessagePayload;
use crate::msgs::message::{Message, MessagePayload, PlainMessage};

const HEADER_SIZE: usize = 1 + 3;

/// This works to reconstruct TLS handshake messages
/// from individual TLS messages.  It's guaranteed that
/// TLS messages output from this layer contain precisely
/// one handshake payload.
pub struct HandshakeJoiner {
    /// Completed handshake frames for output.
    pub frames: VecDeque<Message>,

    /// The message payload we're currently accumulating.
    buf: Vec<u8>,
}

impl Default for HandshakeJoiner {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeJoiner {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::new(),
            buf: Vec::new(),
        }
    }

    /// Do we want to process this message?
    pub fn want_message(&self, msg: &PlainMessage) -> bool {
        msg.typ == ContentType::Handshake
    }

    /// Do we have any buffered data?
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the message, and join/split it as needed.
    /// Return the number of new messages added to the
    /// output deque as a result of this message.
    ///
    /// Returns None if msg or a preceding message was corrupt.
    /// You cannot recover from this situation.  Otherwise returns
    /// a count of how many messages we queued.
    pub fn take_message(&mut self, msg: PlainMessage, vers: ProtocolVersion) -> Option<usize> {
        // The vast majority of the time `self.buf` will be empty since most
        // handshake messages arrive in a single fragment. Avoid allocating and
        // copying in that common case.
        if self.buf.is_empty() {
            self.buf = msg.payload.0;
        } else {
            self.buf
                .extend_from_slice(&msg.payload.0[..]);
        }

        let mut count = 0;
        while self.buf_contains_message() {
            if !self.deframe_one(vers) {
                return None;
            }

            count += 1;
        }

        Some(count)
    }

    /// Does our internal buffer contain a full handshake payload?  It does if it is big
    /// enough to contain a header, and that header has a length which falls within `buf`.
    fn buf_contains_message(&self) -> bool {
        self.buf.len() >= HEADER_SIZE
            && HEADER_SIZE + payload_size(&self.buf) <= self.buf.len()
    }

    /// Take a TLS handshake payload off the front of `buf`, and put it onto
    /// the back of our `frames` deque inside a normal `Message`.
    ///
    /// Returns false if the stream is desynchronised beyond repair.
    fn deframe_one(&mut self, vers: ProtocolVersion) -> bool {
        let used = {
            let mut rd = codec::Reader::init(&self.buf);
            let parsed = match HandshakeMessagePayload::read_version(&mut rd, vers) {
                Some(p) => p,
                None => return false,
            };

            let m = Message {
                version: vers,
                payload: MessagePayload::Handshake(parsed),
            };

            self.frames.push_back(m);
            rd.used()
        };
        self.buf = self.buf.split_off(used);
        true
    }
}

fn payload_size(buf: &[u8]) -> usize {
    u32::from_be_bytes([0, buf[1], buf[2], buf[3]]) as usize
}

#[cfg(test)]
mod tests {
    use super::HandshakeJoiner;
    use crate::msgs::base::Payload;
    use crate::msgs::enums::{ContentType, HandshakeType, ProtocolVersion};
    use crate::msgs::message::{MessagePayload, PlainMessage};

    fn hs_record(payload: &[u8]) -> PlainMessage {
        PlainMessage {
            typ: ContentType::Handshake,
            version: ProtocolVersion::TLSv1_2,
            payload: Payload::new(payload.to_vec()),
        }
    }

    // ServerHelloDone and HelloRequest are empty-bodied; ideal fodder.
    const SHD: &[u8] = &[0x0e, 0x00, 0x00, 0x00];

    #[test]
    fn single_message() {
        let mut hj = HandshakeJoiner::new();
        assert_eq!(
            hj.take_message(hs_record(SHD), ProtocolVersion::TLSv1_2),
            Some(1)
        );
        assert!(hj.is_empty());

        let m = hj.frames.pop_front().unwrap();
        assert!(m.is_handshake_type(HandshakeType::ServerHelloDone));
    }

    #[test]
    fn coalesced_messages() {
        let mut hj = HandshakeJoiner::new();
        let mut both = SHD.to_vec();
        both.extend(SHD);
        assert_eq!(
            hj.take_message(hs_record(&both), ProtocolVersion::TLSv1_2),
            Some(2)
        );
        assert!(hj.is_empty());
    }

    #[test]
    fn fragmented_message() {
        let mut hj = HandshakeJoiner::new();
        assert_eq!(
            hj.take_message(hs_record(&SHD[..2]), ProtocolVersion::TLSv1_2),
            Some(0)
        );
        assert!(!hj.is_empty());
        assert_eq!(
            hj.take_message(hs_record(&SHD[2..]), ProtocolVersion::TLSv1_2),
            Some(1)
        );
        assert!(hj.is_empty());
    }

    #[test]
    fn corrupt_message_is_unrecoverable() {
        let mut hj = HandshakeJoiner::new();
        // ServerHelloDone with a nonempty body
        let bad = &[0x0e, 0x00, 0x00, 0x01, 0xff];
        assert_eq!(
            hj.take_message(hs_record(bad), ProtocolVersion::TLSv1_2),
            None
        );
    }

    #[test]
    fn wants_only_handshake() {
        let hj = HandshakeJoiner::new();
        assert!(hj.want_message(&hs_record(SHD)));
        assert!(!hj.want_message(&PlainMessage {
            typ: ContentType::Alert,
            version: ProtocolVersion::TLSv1_2,
            payload: Payload::new(vec![]),
        }));
    }
}
