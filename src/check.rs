use crate::error::Error;
use crate::msgs::enums::{ContentType, HandshakeType};
use crate::msgs::message::{Message, MessagePayload};

/// For a Message $m, and a HandshakePayload enum member $payload_type,
/// return Ok(payload) if $m is both a handshake message and one that
/// contains the given $payload_type.
macro_rules! require_handshake_msg(
    ( $m:expr, $handshake_type:path, $payload_type:path ) => (
        match &$m.payload {
            MessagePayload::Handshake(hsp) => match &hsp.payload {
                $payload_type(payload) => Ok(payload),
                _ => Err(crate::check::inappropriate_handshake_message(
                    &$m, &[$handshake_type]))
            },
            _ => Err(crate::check::inappropriate_message(&$m, &[crate::msgs::enums::ContentType::Handshake]))
        }
    )
);

pub(crate) use require_handshake_msg;

/// Like require_handshake_msg, but moves the payload out of $m.
macro_rules! require_handshake_msg_move(
    ( $m:expr, $handshake_type:path, $payload_type:path ) => (
        match $m.payload {
            MessagePayload::Handshake(hsp) => match hsp.payload {
                $payload_type(payload) => Ok(payload),
                _ => Err(crate::error::Error::InappropriateHandshakeMessage {
                    expect_types: vec![$handshake_type],
                    got_type: hsp.typ,
                })
            },
            payload => Err(crate::error::Error::InappropriateMessage {
                expect_types: vec![crate::msgs::enums::ContentType::Handshake],
                got_type: payload.content_type(),
            })
        }
    )
);

pub(crate) use require_handshake_msg_move;

/// Validate the message `m`: return an error if:
///
/// - the type of m does not appear in `content_types`.
/// - if m is a handshake message, the handshake message type does
///   not appear in `handshake_types`.
pub(crate) fn check_message(
    m: &Message,
    content_types: &[ContentType],
    handshake_types: &[HandshakeType],
) -> Result<(), Error> {
    if !content_types.contains(&m.payload.content_type()) {
        return Err(inappropriate_message(m, content_types));
    }

    if let MessagePayload::Handshake(hsp) = &m.payload {
        if !handshake_types.is_empty() && !handshake_types.contains(&hsp.typ) {
            return Err(inappropriate_handshake_message(m, handshake_types));
        }
    }

    Ok(())
}

pub(crate) fn inappropriate_message(m: &Message, content_types: &[ContentType]) -> Error {
    Error::InappropriateMessage {
        expect_types: content_types.to_vec(),
        got_type: m.payload.content_type(),
    }
}

pub(crate) fn inappropriate_handshake_message(m: &Message, handshake_types: &[HandshakeType]) -> Error {
    match &m.payload {
        MessagePayload::Handshake(hsp) => Error::InappropriateHandshakeMessage {
            expect_types: handshake_types.to_vec(),
            got_type: hsp.typ,
        },
        _ => Error::CorruptMessage,
    }
}
