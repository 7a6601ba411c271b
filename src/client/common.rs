use crate::error::Error;
use crate::msgs::enums::ExtensionType;
use crate::msgs::handshake::{HasExtensions, ServerHelloPayload};

use std::fmt;

/// Encodes ways a client can know the expected name of the server.
///
/// Only DNS hostnames are supported: the name is validated at
/// construction and used both for SNI and certificate checks.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct ServerName {
    inner: String,
}

impl ServerName {
    /// The name, as a string.
    pub fn as_str(&self) -> &str {
        &self.inner
    }
}

impl TryFrom<&str> for ServerName {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        webpki::DnsNameRef::try_from_ascii_str(s)
            .map(|_| Self {
                inner: s.to_string(),
            })
            .map_err(|_| Error::UnsupportedNameType)
    }
}

impl fmt::Debug for ServerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServerName").field(&self.inner).finish()
    }
}

/// Details of the ClientHello we sent: what we need to check
/// against the corresponding ServerHello.
pub(super) struct ClientHelloDetails {
    pub(super) sent_extensions: Vec<ExtensionType>,
    pub(super) offered_heartbeat_mode: Option<crate::msgs::enums::HeartbeatMode>,
}

impl ClientHelloDetails {
    pub(super) fn new() -> Self {
        Self {
            sent_extensions: Vec::new(),
            offered_heartbeat_mode: None,
        }
    }

    pub(super) fn server_sent_unsolicited_extensions(
        &self,
        received_exts: &ServerHelloPayload,
        allowed_unsolicited: &[ExtensionType],
    ) -> bool {
        for ext in received_exts.extensions() {
            let ext_type = ServerHelloPayload::extension_type(ext);
            if !self.sent_extensions.contains(&ext_type)
                && !allowed_unsolicited.contains(&ext_type)
            {
                log::debug!("Unsolicited extension {:?}", ext_type);
                return true;
            }
        }

        false
    }
}
