use crate::msgs::enums::{AlertDescription, ContentType, ExtensionType, HandshakeType};

use std::error::Error as StdError;
use std::fmt;
use std::time::SystemTimeError;

/// The engine reports protocol errors using this type.
#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    /// We received a TLS message that isn't valid right now.
    /// `expect_types` lists the message types we can expect right now.
    /// `got_type` is the type we found.  This error is typically
    /// caused by a buggy TLS stack (the peer or this one), a broken
    /// network, or an attack.
    InappropriateMessage {
        /// Which types we expected
        expect_types: Vec<ContentType>,
        /// What type we received
        got_type: ContentType,
    },

    /// We received a TLS handshake message that isn't valid right now.
    /// `expect_types` lists the handshake message types we can expect
    /// right now.  `got_type` is the type we found.
    InappropriateHandshakeMessage {
        /// Which handshake type we expected
        expect_types: Vec<HandshakeType>,
        /// What handshake type we received
        got_type: HandshakeType,
    },

    /// The peer sent us a syntactically incorrect TLS message.
    CorruptMessage,

    /// The peer sent us a TLS message with invalid contents.
    CorruptMessagePayload(ContentType),

    /// The peer didn't give us any certificates.
    NoCertificatesPresented,

    /// The certificate verifier doesn't support the given type of name.
    UnsupportedNameType,

    /// We couldn't decrypt a message.  This is invariably fatal.
    DecryptError,

    /// The peer doesn't support a protocol version/feature we require.
    /// The parameter gives a hint as to what version/feature it is.
    PeerIncompatibleError(String),

    /// The peer deviated from the standard TLS protocol.
    /// The parameter gives a hint where.
    PeerMisbehavedError(String),

    /// We received a fatal alert.  This means the peer is unhappy.
    AlertReceived(AlertDescription),

    /// A mandatory extension was absent from a peer message.
    MissingExtension(ExtensionType),

    /// The presented certificate chain is invalid.
    WebPkiError(webpki::Error),

    /// The presented public key exceeds the configured size policy.
    InsufficientSecurity,

    /// A catch-all error for unlikely errors.
    General(String),

    /// We failed to figure out what time it currently is.
    FailedToGetCurrentTime,

    /// We failed to acquire random bytes from the system.
    FailedToGetRandomBytes,

    /// This function doesn't work until the TLS handshake
    /// is complete.
    HandshakeNotComplete,

    /// The peer sent an oversized record/fragment.
    PeerSentOversizedRecord,

    /// A sequence number would wrap; the connection must be torn
    /// down before a nonce repeats.
    SequenceOverflow,

    /// An incoming connection did not support any known application protocol.
    NoApplicationProtocol,

    /// Heartbeat was not negotiated with the peer, or the peer did not
    /// permit us to send requests.
    HeartbeatNotNegotiated,
}

impl Error {
    /// The alert we send (or would have sent) to the peer when this
    /// error terminates a connection.  `None` means the error is
    /// local-only (for example, transport failure) and no alert
    /// corresponds.
    pub fn get_alert(&self) -> Option<AlertDescription> {
        Some(match self {
            Self::InappropriateMessage { .. } | Self::InappropriateHandshakeMessage { .. } => {
                AlertDescription::UnexpectedMessage
            }
            Self::CorruptMessage | Self::CorruptMessagePayload(_) => AlertDescription::DecodeError,
            Self::NoCertificatesPresented => AlertDescription::CertificateRequired,
            Self::DecryptError => AlertDescription::DecryptError,
            Self::PeerIncompatibleError(_) => AlertDescription::HandshakeFailure,
            Self::PeerMisbehavedError(_) => AlertDescription::IllegalParameter,
            Self::MissingExtension(_) => AlertDescription::MissingExtension,
            Self::WebPkiError(webpki::Error::BadDer | webpki::Error::BadDerTime) => {
                AlertDescription::DecodeError
            }
            Self::WebPkiError(_) => AlertDescription::BadCertificate,
            Self::InsufficientSecurity => AlertDescription::InsufficientSecurity,
            Self::PeerSentOversizedRecord | Self::SequenceOverflow => {
                AlertDescription::RecordOverflow
            }
            Self::NoApplicationProtocol => AlertDescription::NoApplicationProtocol,
            Self::General(_) | Self::FailedToGetCurrentTime | Self::FailedToGetRandomBytes => {
                AlertDescription::InternalError
            }
            Self::UnsupportedNameType
            | Self::AlertReceived(_)
            | Self::HandshakeNotComplete
            | Self::HeartbeatNotNegotiated => return None,
        })
    }
}

fn join<T: fmt::Debug>(items: &[T]) -> String {
    items
        .iter()
        .map(|x| format!("{:?}", x))
        .collect::<Vec<String>>()
        .join(" or ")
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InappropriateMessage {
                expect_types,
                got_type,
            } => write!(
                f,
                "received unexpected message: got {:?} when expecting {}",
                got_type,
                join(expect_types)
            ),
            Self::InappropriateHandshakeMessage {
                expect_types,
                got_type,
            } => write!(
                f,
                "received unexpected handshake message: got {:?} when expecting {}",
                got_type,
                join(expect_types)
            ),
            Self::CorruptMessagePayload(typ) => {
                write!(f, "received corrupt message of type {:?}", typ)
            }
            Self::PeerIncompatibleError(why) => write!(f, "peer is incompatible: {}", why),
            Self::PeerMisbehavedError(why) => write!(f, "peer misbehaved: {}", why),
            Self::AlertReceived(alert) => write!(f, "received fatal alert: {:?}", alert),
            Self::MissingExtension(ext) => write!(f, "peer omitted extension: {:?}", ext),
            Self::WebPkiError(e) => write!(f, "invalid certificate: {:?}", e),
            Self::CorruptMessage => write!(f, "received corrupt message"),
            Self::NoCertificatesPresented => write!(f, "peer sent no certificates"),
            Self::UnsupportedNameType => write!(f, "presented server name type wasn't supported"),
            Self::DecryptError => write!(f, "cannot decrypt peer's message"),
            Self::InsufficientSecurity => {
                write!(f, "peer's key falls outside the configured size policy")
            }
            Self::PeerSentOversizedRecord => write!(f, "peer sent excess record size"),
            Self::SequenceOverflow => write!(f, "sequence number would wrap"),
            Self::HandshakeNotComplete => write!(f, "handshake not complete"),
            Self::NoApplicationProtocol => write!(f, "peer doesn't support any known protocol"),
            Self::HeartbeatNotNegotiated => write!(f, "heartbeat not permitted by peer"),
            Self::FailedToGetCurrentTime => write!(f, "failed to get current time"),
            Self::FailedToGetRandomBytes => write!(f, "failed to get random bytes"),
            Self::General(err) => write!(f, "unexpected error: {}", err),
        }
    }
}

impl StdError for Error {}

impl From<webpki::Error> for Error {
    fn from(e: webpki::Error) -> Self {
        Self::WebPkiError(e)
    }
}

impl From<SystemTimeError> for Error {
    fn from(_: SystemTimeError) -> Self {
        Self::FailedToGetCurrentTime
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::msgs::enums::{
        AlertDescription, ContentType, ExtensionType, HandshakeType,
    };

    #[test]
    fn alert_mapping_matches_taxonomy() {
        let cases = [
            (Error::CorruptMessage, AlertDescription::DecodeError),
            (
                Error::InappropriateMessage {
                    expect_types: vec![ContentType::Alert],
                    got_type: ContentType::Handshake,
                },
                AlertDescription::UnexpectedMessage,
            ),
            (
                Error::InappropriateHandshakeMessage {
                    expect_types: vec![HandshakeType::Finished],
                    got_type: HandshakeType::ClientHello,
                },
                AlertDescription::UnexpectedMessage,
            ),
            (Error::DecryptError, AlertDescription::DecryptError),
            (
                Error::PeerSentOversizedRecord,
                AlertDescription::RecordOverflow,
            ),
            (Error::SequenceOverflow, AlertDescription::RecordOverflow),
            (
                Error::MissingExtension(ExtensionType::SupportedVersions),
                AlertDescription::MissingExtension,
            ),
            (
                Error::PeerMisbehavedError("x".into()),
                AlertDescription::IllegalParameter,
            ),
            (
                Error::PeerIncompatibleError("x".into()),
                AlertDescription::HandshakeFailure,
            ),
            (
                Error::InsufficientSecurity,
                AlertDescription::InsufficientSecurity,
            ),
            (
                Error::General("x".into()),
                AlertDescription::InternalError,
            ),
        ];

        for (err, alert) in cases {
            assert_eq!(err.get_alert(), Some(alert), "{:?}", err);
        }

        assert_eq!(
            Error::AlertReceived(AlertDescription::CloseNotify).get_alert(),
            None
        );
    }

    #[test]
    fn smoke_display() {
        for err in [
            Error::CorruptMessage,
            Error::DecryptError,
            Error::AlertReceived(AlertDescription::DecodeError),
            Error::PeerMisbehavedError("quux".to_string()),
        ] {
            assert!(!format!("{}", err).is_empty());
        }
    }
}
