use crate::msgs::enums::{ContentType, ProtocolVersion};
use crate::msgs::message::{BorrowedPlainMessage, PlainMessage};

pub const MAX_FRAGMENT_LEN: usize = 16384;
pub const PACKET_OVERHEAD: usize = 1 + 2 + 2;

pub struct MessageFragmenter {
    max_frag: usize,
}

impl Default for MessageFragmenter {
    fn default() -> Self {
        Self::new(MAX_FRAGMENT_LEN)
    }
}

impl MessageFragmenter {
    /// Make a new fragmenter.  `max_fragment_len` is the maximum
    /// fragment size that will be produced -- this does not include
    /// overheads (so a `max_fragment_len` of 5 will produce 10 byte
    /// packets).
    pub fn new(max_fragment_len: usize) -> Self {
        debug_assert!(max_fragment_len <= MAX_FRAGMENT_LEN);
        Self {
            max_frag: max_fragment_len,
        }
    }

    /// Take the Message `msg` and re-fragment it into new
    /// messages whose fragment is no more than max_frag.
    /// The new messages are appended to the `out` deque.
    /// Payloads are copied.
    pub fn fragment(&self, msg: PlainMessage, out: &mut impl Extend<PlainMessage>) {
        // Non-fragment path
        if msg.payload.0.len() <= self.max_frag {
            out.extend(Some(msg));
            return;
        }

        for chunk in msg.payload.0.chunks(self.max_frag) {
            out.extend(Some(PlainMessage {
                typ: msg.typ,
                version: msg.version,
                payload: crate::msgs::base::Payload(chunk.to_vec()),
            }));
        }
    }

    /// Enqueue borrowed fragments of (version, typ, payload) which
    /// are no longer than max_frag onto the `out` deque.
    pub fn fragment_borrow<'a>(
        &self,
        typ: ContentType,
        version: ProtocolVersion,
        payload: &'a [u8],
        out: &mut impl Extend<BorrowedPlainMessage<'a>>,
    ) {
        for chunk in payload.chunks(self.max_frag) {
            out.extend(Some(BorrowedPlainMessage {
                typ,
                version,
                payload: chunk,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::base::Payload;

    fn msg(len: usize) -> PlainMessage {
        PlainMessage {
            typ: ContentType::Handshake,
            version: ProtocolVersion::TLSv1_2,
            payload: Payload(vec![0xab; len]),
        }
    }

    #[test]
    fn unfragmented_passthrough() {
        let frag = MessageFragmenter::new(32);
        let mut out = Vec::new();
        frag.fragment(msg(32), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload.0.len(), 32);
    }

    #[test]
    fn splits_on_boundary() {
        let frag = MessageFragmenter::new(32);
        let mut out = Vec::new();
        frag.fragment(msg(65), &mut out);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].payload.0.len(), 32);
        assert_eq!(out[1].payload.0.len(), 32);
        assert_eq!(out[2].payload.0.len(), 1);
        for m in &out {
            assert_eq!(m.typ, ContentType::Handshake);
            assert_eq!(m.version, ProtocolVersion::TLSv1_2);
        }
    }

    #[test]
    fn borrowed_fragments() {
        let frag = MessageFragmenter::new(10);
        let payload = vec![0u8; 25];
        let mut out: Vec<BorrowedPlainMessage> = Vec::new();
        frag.fragment_borrow(
            ContentType::ApplicationData,
            ProtocolVersion::TLSv1_3,
            &payload,
            &mut out,
        );
        assert_eq!(out.len(), 3);
        assert_eq!(out.iter().map(|f| f.payload.len()).sum::<usize>(), 25);
    }
}
