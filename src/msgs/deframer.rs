use crate::msgs::codec;
use crate::msgs::message::{MessageError, OpaqueMessage};

use std::collections::VecDeque;
use std::io;

/// This deframer works to reconstruct TLS records
/// from arbitrary-sized reads, buffering as necessary.
/// The input is `read()`, the output is the `frames` deque.
pub struct MessageDeframer {
    /// Completed frames for output.
    pub frames: VecDeque<OpaqueMessage>,

    /// Set to true if the peer is not talking TLS, but some other
    /// protocol.  The caller should abort the connection, because
    /// the deframer cannot recover.
    pub desynced: bool,

    /// A fixed-size buffer containing the currently-accumulating
    /// TLS message.
    buf: Box<[u8; OpaqueMessage::MAX_WIRE_SIZE]>,

    /// What size prefix of `buf` is used.
    used: usize,
}

enum BufferContents {
    /// Contains an invalid message as a header.
    Invalid,

    /// Might contain a valid message if we receive more.
    /// Perhaps totally empty!
    Partial,

    /// Contains a valid frame as a prefix.
    Valid,
}

impl Default for MessageDeframer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageDeframer {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::new(),
            desynced: false,
            buf: Box::new([0u8; OpaqueMessage::MAX_WIRE_SIZE]),
            used: 0,
        }
    }

    /// Read some bytes from `rd`, and add them to our internal
    /// buffer.  If this means our internal buffer contains
    /// full messages, decode them all.
    pub fn read(&mut self, rd: &mut dyn io::Read) -> io::Result<usize> {
        // Try to do the largest reads possible.  Note that if
        // we get a message with a length field out of range here,
        // we do a zero length read.  That looks like an EOF to
        // the next layer up, which is fine.
        debug_assert!(self.used <= OpaqueMessage::MAX_WIRE_SIZE);
        let new_bytes = rd.read(&mut self.buf[self.used..])?;

        self.used += new_bytes;

        loop {
            match self.try_deframe_one() {
                BufferContents::Invalid => {
                    self.desynced = true;
                    break;
                }
                BufferContents::Valid => continue,
                BufferContents::Partial => break,
            }
        }

        Ok(new_bytes)
    }

    /// Returns true if we have messages for the caller
    /// to process, either whole messages in our output
    /// queue or partial messages in our buffer.
    pub fn has_pending(&self) -> bool {
        !self.frames.is_empty() || self.used > 0
    }

    /// Does our `buf` contain a full message?  It does if it is big enough to
    /// contain a header, and that header has a length which falls within `buf`.
    /// If so, deframe it and place the message onto the frames output queue.
    fn try_deframe_one(&mut self) -> BufferContents {
        // Try to decode a message off the front of buf.
        let mut rd = codec::Reader::init(&self.buf[..self.used]);

        match OpaqueMessage::read(&mut rd) {
            Ok(m) => {
                let used = rd.used();
                self.frames.push_back(m);
                self.buf_consume(used);
                BufferContents::Valid
            }
            Err(MessageError::TooShortForHeader | MessageError::TooShortForLength) => {
                BufferContents::Partial
            }
            Err(_) => BufferContents::Invalid,
        }
    }

    fn buf_consume(&mut self, taken: usize) {
        if taken < self.used {
            /* Before:
             * +----------+----------+----------+
             * | taken    | pending  |xxxxxxxxxx|
             * +----------+----------+----------+
             * 0          ^ taken    ^ self.used
             *
             * After:
             * +----------+----------+----------+
             * | pending  |xxxxxxxxxxxxxxxxxxxxx|
             * +----------+----------+----------+
             * 0          ^ self.used
             */

            self.buf.copy_within(taken..self.used, 0);
            self.used -= taken;
        } else if taken == self.used {
            self.used = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::enums::ContentType;

    const FIRST_MESSAGE: &[u8] = &[0x16, 0x03, 0x03, 0x00, 0x02, 0x0e, 0x00];
    const SECOND_MESSAGE: &[u8] = &[0x15, 0x03, 0x03, 0x00, 0x02, 0x01, 0x00];

    fn input(d: &mut MessageDeframer, bytes: &[u8]) -> usize {
        let mut rd = io::Cursor::new(bytes);
        let mut total = 0;
        while (rd.position() as usize) < bytes.len() {
            total += d.read(&mut rd).unwrap();
        }
        total
    }

    #[test]
    fn two_whole_messages() {
        let mut d = MessageDeframer::new();
        let mut joined = FIRST_MESSAGE.to_vec();
        joined.extend(SECOND_MESSAGE);
        input(&mut d, &joined);

        assert!(!d.desynced);
        assert_eq!(d.frames.len(), 2);
        assert_eq!(
            d.frames.pop_front().unwrap().typ,
            ContentType::Handshake
        );
        assert_eq!(d.frames.pop_front().unwrap().typ, ContentType::Alert);
        assert!(!d.has_pending());
    }

    #[test]
    fn byte_by_byte() {
        let mut d = MessageDeframer::new();
        for b in FIRST_MESSAGE {
            assert!(d.frames.is_empty());
            input(&mut d, &[*b]);
        }
        assert_eq!(d.frames.len(), 1);
        assert!(!d.desynced);
    }

    #[test]
    fn invalid_contenttype_desyncs() {
        let mut d = MessageDeframer::new();
        input(&mut d, &[0x01, 0x03, 0x03, 0x00, 0x02, 0x00, 0x00]);
        assert!(d.desynced);
    }

    #[test]
    fn oversize_length_desyncs() {
        let mut d = MessageDeframer::new();
        let mut msg = vec![0x17, 0x03, 0x03];
        msg.extend((OpaqueMessage::MAX_PAYLOAD).to_be_bytes());
        input(&mut d, &msg);
        assert!(d.desynced);
    }

    #[test]
    fn split_across_reads() {
        let mut d = MessageDeframer::new();
        input(&mut d, &FIRST_MESSAGE[..3]);
        assert!(d.frames.is_empty());
        assert!(d.has_pending());
        input(&mut d, &FIRST_MESSAGE[3..]);
        assert_eq!(d.frames.len(), 1);
    }
}
