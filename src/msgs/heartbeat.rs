use crate::msgs::base::PayloadU16;
use crate::msgs::codec::{Codec, Reader};
use crate::msgs::enums::HeartbeatMessageType;

/// RFC 6520 §4. At least 16 bytes of padding follow the payload; a
/// receiver discards the padding without inspecting it, but a message
/// too short to hold the mandatory padding is invalid and MUST be
/// dropped.
pub const MIN_PADDING_LEN: usize = 16;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HeartbeatPayload {
    pub typ: HeartbeatMessageType,
    pub payload: PayloadU16,
    pub padding: Vec<u8>,
}

impl HeartbeatPayload {
    pub fn new(typ: HeartbeatMessageType, payload: &[u8], padding: Vec<u8>) -> Self {
        debug_assert!(padding.len() >= MIN_PADDING_LEN);
        Self {
            typ,
            payload: PayloadU16::new(payload.to_vec()),
            padding,
        }
    }
}

impl Codec for HeartbeatPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.typ.encode(bytes);
        self.payload.encode(bytes);
        bytes.extend_from_slice(&self.padding);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let typ = HeartbeatMessageType::read(r)?;
        let payload = PayloadU16::read(r)?;
        let padding = r.rest().to_vec();

        if padding.len() < MIN_PADDING_LEN {
            return None;
        }

        Some(Self {
            typ,
            payload,
            padding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let hb = HeartbeatPayload::new(
            HeartbeatMessageType::Request,
            &[0xaa, 0xbb],
            vec![0x7f; 18],
        );
        let enc = hb.get_encoding();
        assert_eq!(enc.len(), 1 + 2 + 2 + 18);
        assert_eq!(HeartbeatPayload::read_bytes(&enc), Some(hb));
    }

    #[test]
    fn short_padding_rejected() {
        // declared payload fills the message, leaving 0 bytes of padding
        let bytes = [0x01, 0x00, 0x02, 0xaa, 0xbb];
        assert!(HeartbeatPayload::read_bytes(&bytes).is_none());
    }

    #[test]
    fn length_field_beyond_message_rejected() {
        // payload_length runs past the end of the record
        let bytes = [0x01, 0xff, 0xff, 0xaa, 0xbb];
        assert!(HeartbeatPayload::read_bytes(&bytes).is_none());
    }
}
