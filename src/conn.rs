use crate::error::Error;
use crate::key;
use crate::msgs::alert::AlertMessagePayload;
use crate::msgs::base::Payload;
use crate::msgs::deframer::MessageDeframer;
use crate::msgs::enums::{AlertDescription, AlertLevel, ContentType, HeartbeatMessageType};
use crate::msgs::enums::{HandshakeType, ProtocolVersion};
use crate::msgs::fragmenter::{MessageFragmenter, MAX_FRAGMENT_LEN};
use crate::msgs::heartbeat::{HeartbeatPayload, MIN_PADDING_LEN};
use crate::msgs::hsjoiner::HandshakeJoiner;
use crate::msgs::message::{
    BorrowedPlainMessage, Message, MessagePayload, OpaqueMessage, PlainMessage,
};
use crate::rand::RandomSource;
use crate::record_layer::RecordLayer;
use crate::suites::SupportedCipherSuite;
use crate::tls12::Side;
use crate::vecbuf::ChunkVecBuffer;

use log::{debug, trace, warn};

use std::io;
use std::sync::Arc;

/// Values of this structure are returned from `process_new_packets`
/// and tell the caller the current I/O state of the TLS connection.
#[derive(Debug, Eq, PartialEq)]
pub struct IoState {
    tls_bytes_to_write: usize,
    plaintext_bytes_to_read: usize,
    peer_has_closed: bool,
}

impl IoState {
    /// How many bytes could be written by `write_tls` if called
    /// right now.  A non-zero value implies `wants_write`.
    pub fn tls_bytes_to_write(&self) -> usize {
        self.tls_bytes_to_write
    }

    /// How many plaintext bytes could be obtained via `std::io::Read`
    /// without further I/O.
    pub fn plaintext_bytes_to_read(&self) -> usize {
        self.plaintext_bytes_to_read
    }

    /// True if the peer has sent us a close_notify alert.  This is
    /// the TLS mechanism to securely half-close a TLS connection,
    /// and signifies that the peer will not send any further data
    /// on this connection.
    pub fn peer_has_closed(&self) -> bool {
        self.peer_has_closed
    }
}

/// A structure that implements `std::io::Read` for reading plaintext.
pub struct Reader<'a> {
    received_plaintext: &'a mut ChunkVecBuffer,
    peer_cleanly_closed: bool,
    has_seen_eof: bool,
}

impl io::Read for Reader<'_> {
    /// Obtain plaintext data received from the peer over this TLS connection.
    ///
    /// If the peer closes the TLS session cleanly, this returns `Ok(0)` once all
    /// the pending data has been read.
    ///
    /// If the peer closes the TLS session uncleanly (a TCP EOF without sending a
    /// `close_notify` alert) this function returns `Err(ErrorKind::UnexpectedEof)`
    /// once any pending data has been read.
    ///
    /// If there is no data to read, this returns `Err(ErrorKind::WouldBlock)`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.received_plaintext.read(buf)?;

        if len == 0 && !buf.is_empty() {
            // No bytes available:
            // - if we received a close_notify, this is a genuine permanent EOF
            // - if we hit an unexpected EOF, that's an error
            // - otherwise say EWOULDBLOCK
            if self.peer_cleanly_closed {
                return Ok(0);
            }

            if self.has_seen_eof {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }

            return Err(io::ErrorKind::WouldBlock.into());
        }

        Ok(len)
    }
}

/// Internal trait implemented by the [`ClientConnection`]/[`ServerConnection`]
/// allowing them to be the subject of a [`Writer`].
///
/// [`ClientConnection`]: crate::client::ClientConnection
/// [`ServerConnection`]: crate::server::ServerConnection
pub trait PlaintextSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn flush(&mut self) -> io::Result<()>;
}

/// A structure that implements `std::io::Write` for writing plaintext.
pub struct Writer<'a> {
    sink: &'a mut dyn PlaintextSink,
}

impl<Data> PlaintextSink for ConnectionCommon<Data> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.common_state.send_some_plaintext(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> Writer<'a> {
    /// Create a new Writer.
    ///
    /// This is not an external interface.  Get one of these objects
    /// from `Connection::writer`.
    pub fn new(sink: &'a mut dyn PlaintextSink) -> Self {
        Writer { sink }
    }
}

impl io::Write for Writer<'_> {
    /// Send the plaintext `buf` to the peer, encrypting
    /// and authenticating it.  Once this function succeeds
    /// you should call `write_tls` which will output the
    /// corresponding TLS records.
    ///
    /// This function buffers plaintext sent before the
    /// TLS handshake completes, and sends it as soon
    /// as it can.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

/// A callback invoked with the payload of each heartbeat_response
/// that matches an outstanding request.
pub type HeartbeatCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Connection state common to both sides and both protocol versions,
/// consumed by the handshake state objects through [`Context`].
pub struct CommonState {
    pub(crate) side: Side,
    pub(crate) record_layer: RecordLayer,
    pub(crate) suite: Option<SupportedCipherSuite>,
    pub(crate) negotiated_version: Option<ProtocolVersion>,
    pub(crate) alpn_protocol: Option<Vec<u8>>,
    pub(crate) peer_certificates: Option<Vec<key::Certificate>>,
    pub(crate) random: Arc<dyn RandomSource>,
    message_fragmenter: MessageFragmenter,
    received_plaintext: ChunkVecBuffer,
    sendable_plaintext: ChunkVecBuffer,
    pub(crate) sendable_tls: ChunkVecBuffer,
    pub(crate) may_send_application_data: bool,
    pub(crate) may_receive_application_data: bool,
    pub(crate) aligned_handshake: bool,
    sent_fatal_alert: bool,
    sent_close_notify: bool,
    pub(crate) has_received_close_notify: bool,
    pub(crate) has_seen_eof: bool,
    received_middlebox_ccs: u8,
    pub(crate) sent_fake_ccs: bool,
    /// The peer said we may send heartbeat requests.
    pub(crate) we_may_send_heartbeat: bool,
    /// We said the peer may send heartbeat requests.
    pub(crate) peer_may_send_heartbeat: bool,
    outstanding_heartbeat: Option<Vec<u8>>,
    pub(crate) heartbeat_callback: Option<HeartbeatCallback>,
}

impl CommonState {
    pub(crate) fn new(side: Side, random: Arc<dyn RandomSource>) -> Self {
        Self {
            side,
            record_layer: RecordLayer::new(),
            suite: None,
            negotiated_version: None,
            alpn_protocol: None,
            peer_certificates: None,
            random,
            message_fragmenter: MessageFragmenter::default(),
            received_plaintext: ChunkVecBuffer::new(Some(DEFAULT_RECEIVED_PLAINTEXT_LIMIT)),
            sendable_plaintext: ChunkVecBuffer::new(Some(DEFAULT_BUFFER_LIMIT)),
            sendable_tls: ChunkVecBuffer::new(Some(DEFAULT_BUFFER_LIMIT)),
            may_send_application_data: false,
            may_receive_application_data: false,
            aligned_handshake: true,
            sent_fatal_alert: false,
            sent_close_notify: false,
            has_received_close_notify: false,
            has_seen_eof: false,
            received_middlebox_ccs: 0,
            sent_fake_ccs: false,
            we_may_send_heartbeat: false,
            peer_may_send_heartbeat: false,
            outstanding_heartbeat: None,
            heartbeat_callback: None,
        }
    }

    /// Returns true if the caller should call `write_tls` as soon as possible.
    pub fn wants_write(&self) -> bool {
        !self.sendable_tls.is_empty()
    }

    /// Returns true if the connection is currently performing the TLS handshake.
    pub fn is_handshaking(&self) -> bool {
        !(self.may_send_application_data && self.may_receive_application_data)
    }

    /// Retrieves the ciphersuite agreed with the peer.
    pub fn negotiated_cipher_suite(&self) -> Option<SupportedCipherSuite> {
        self.suite
    }

    /// Retrieves the protocol version agreed with the peer.
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.negotiated_version
    }

    /// Retrieves the protocol agreed with the peer via ALPN.
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.alpn_protocol.as_deref()
    }

    /// Retrieves the certificate chain used by the peer to authenticate.
    pub fn peer_certificates(&self) -> Option<&[key::Certificate]> {
        self.peer_certificates.as_deref()
    }

    pub(crate) fn is_tls13(&self) -> bool {
        matches!(self.negotiated_version, Some(ProtocolVersion::TLSv1_3))
    }

    /// A handshake message must not be split by a key change.
    pub(crate) fn check_aligned_handshake(&mut self) -> Result<(), Error> {
        if !self.aligned_handshake {
            self.send_fatal_alert(AlertDescription::UnexpectedMessage);
            Err(Error::PeerMisbehavedError(
                "key epoch or handshake flight with pending fragment".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    /// Fragment `m`, encrypt the fragments, and then queue
    /// the encrypted fragments for sending.
    pub(crate) fn send_msg_encrypt(&mut self, m: PlainMessage) {
        let mut plain_messages = Vec::new();
        self.message_fragmenter
            .fragment(m, &mut plain_messages);

        for m in plain_messages {
            self.send_single_fragment(m.borrow());
        }
    }

    /// Like send_msg_encrypt, but operate on an appdata directly.
    fn send_appdata_encrypt(&mut self, payload: &[u8], limit: Limit) -> usize {
        // Here, the limit on sendable_tls applies to encrypted data,
        // but we're respecting it for plaintext data -- so we'll
        // be out by whatever the cipher+record overhead is.  That's a
        // constant and predictable amount, so it's not a terrible issue.
        let len = match limit {
            Limit::Yes => self
                .sendable_tls
                .apply_limit(payload.len()),
            Limit::No => payload.len(),
        };

        let mut plain_messages = Vec::new();
        self.message_fragmenter.fragment_borrow(
            ContentType::ApplicationData,
            ProtocolVersion::TLSv1_2,
            &payload[..len],
            &mut plain_messages,
        );

        for m in plain_messages {
            self.send_single_fragment(m);
        }

        len
    }

    fn send_single_fragment(&mut self, m: BorrowedPlainMessage) {
        // Close connection once we start to run out of
        // sequence space.
        if self
            .record_layer
            .wants_close_before_encrypt()
        {
            self.send_close_notify();
        }

        // Refuse to wrap counter at all costs.  This
        // is basically untestable unfortunately.
        if self.record_layer.encrypt_exhausted() {
            return;
        }

        let em = match self.record_layer.encrypt_outgoing(m) {
            Ok(em) => em,
            Err(_) => return,
        };
        self.queue_tls_message(em);
    }

    /// Are we done? i.e., have we processed all received messages, and
    /// received a close_notify to indicate that no new messages will arrive?
    pub(crate) fn connection_was_cleanly_closed(&self) -> bool {
        self.has_received_close_notify && self.received_plaintext.is_empty()
    }

    fn queue_tls_message(&mut self, m: OpaqueMessage) {
        self.sendable_tls.append(m.encode());
    }

    /// Send a raw TLS message, fragmenting it if needed, and
    /// encrypting it if the record layer is ready.
    pub(crate) fn send_msg(&mut self, m: Message, must_encrypt: bool) {
        if !must_encrypt {
            let mut to_send = Vec::new();
            self.message_fragmenter
                .fragment(m.into(), &mut to_send);
            for mm in to_send {
                self.queue_tls_message(mm.into_unencrypted_opaque());
            }
        } else {
            self.send_msg_encrypt(m.into());
        }
    }

    pub(crate) fn take_received_plaintext(&mut self, bytes: Payload) {
        self.received_plaintext.append(bytes.0);
    }

    pub(crate) fn start_outgoing_traffic(&mut self) {
        self.may_send_application_data = true;
        self.flush_plaintext();
    }

    pub(crate) fn start_traffic(&mut self) {
        self.may_receive_application_data = true;
        self.start_outgoing_traffic();
    }

    /// Send plaintext application data, fragmenting and
    /// encrypting it as it goes out.
    ///
    /// If internal buffers are too small, this function will not accept
    /// all the data.
    pub(crate) fn send_some_plaintext(&mut self, data: &[u8]) -> usize {
        self.send_plain(data, Limit::Yes)
    }

    /// Encrypt and send some plaintext `data`.  `limit` controls
    /// whether the per-connection buffer limits apply.
    ///
    /// Returns the number of bytes written from `data`: this might
    /// be less than `data.len()` if buffer limits were exceeded.
    fn send_plain(&mut self, data: &[u8], limit: Limit) -> usize {
        if !self.may_send_application_data {
            // If we haven't completed handshaking, buffer
            // plaintext to send once we do.
            let len = match limit {
                Limit::Yes => self
                    .sendable_plaintext
                    .append_limited_copy(data),
                Limit::No => self
                    .sendable_plaintext
                    .append(data.to_vec()),
            };
            return len;
        }

        debug_assert!(self.record_layer.is_encrypting());

        if data.is_empty() {
            // Don't send empty fragments.
            return 0;
        }

        self.send_appdata_encrypt(data, limit)
    }

    /// Mark the connection as ready to send application data.
    ///
    /// Also flush `sendable_plaintext` if it is `Some`.
    fn flush_plaintext(&mut self) {
        if !self.may_send_application_data {
            return;
        }

        while let Some(buf) = self.sendable_plaintext.pop() {
            self.send_plain(&buf, Limit::No);
        }
    }

    pub(crate) fn send_warning_alert(&mut self, desc: AlertDescription) {
        warn!("Sending warning alert {:?}", desc);
        self.send_warning_alert_no_log(desc);
    }

    pub(crate) fn send_fatal_alert(&mut self, desc: AlertDescription) {
        warn!("Sending fatal alert {:?}", desc);
        debug_assert!(!self.sent_fatal_alert);
        let m = Message::build_alert(AlertLevel::Fatal, desc);
        self.send_msg(m, self.record_layer.is_encrypting());
        self.sent_fatal_alert = true;
    }

    /// Queue a close_notify alert, informing the peer no further
    /// data will be sent on this connection.
    pub(crate) fn send_close_notify(&mut self) {
        if self.sent_close_notify {
            return;
        }

        debug!("Sending warning alert {:?}", AlertDescription::CloseNotify);
        self.sent_close_notify = true;
        self.send_warning_alert_no_log(AlertDescription::CloseNotify);
    }

    fn send_warning_alert_no_log(&mut self, desc: AlertDescription) {
        let m = Message::build_alert(AlertLevel::Warning, desc);
        self.send_msg(m, self.record_layer.is_encrypting());
    }

    /// Send the fatal alert implied by `err`, unless one has already
    /// been sent.
    pub(crate) fn maybe_send_fatal_alert(&mut self, err: &Error) {
        if self.sent_fatal_alert {
            return;
        }

        if let Some(desc) = err.get_alert() {
            self.send_fatal_alert(desc);
        }
    }

    pub(crate) fn process_alert(&mut self, alert: &AlertMessagePayload) -> Result<(), Error> {
        // Reject unknown AlertLevels.
        if let AlertLevel::Unknown(_) = alert.level {
            self.send_fatal_alert(AlertDescription::IllegalParameter);
            return Err(Error::AlertReceived(alert.description));
        }

        // If we get a CloseNotify, make a note to declare EOF to our
        // caller.  But do not treat unauthenticated alerts like this.
        if alert.description == AlertDescription::CloseNotify {
            self.has_received_close_notify = true;
            return Ok(());
        }

        // Warnings are nonfatal for TLS1.2, but outlawed in TLS1.3
        // (except, for no good reason, user_cancelled).
        if alert.level == AlertLevel::Warning {
            if self.is_tls13() && alert.description != AlertDescription::UserCanceled {
                self.send_fatal_alert(AlertDescription::DecodeError);
            } else {
                warn!("TLS alert warning received: {:#?}", alert);
                return Ok(());
            }
        }

        warn!("TLS alert received: {:#?}", alert);
        Err(Error::AlertReceived(alert.description))
    }

    /// A middlebox-compatibility ChangeCipherSpec seen during a TLS1.3
    /// handshake: drop exactly one, as a treat.
    pub(crate) fn filter_tls13_ccs(&mut self, msg: &OpaqueMessage) -> Result<bool, Error> {
        if msg.typ != ContentType::ChangeCipherSpec
            || self.may_receive_application_data
            || matches!(self.negotiated_version, Some(ProtocolVersion::TLSv1_2))
        {
            return Ok(false);
        }

        self.received_middlebox_ccs += 1;
        if self.received_middlebox_ccs > 1 {
            self.send_fatal_alert(AlertDescription::UnexpectedMessage);
            Err(Error::PeerMisbehavedError(
                "illegal middlebox CCS received".to_string(),
            ))
        } else {
            trace!("Dropping CCS");
            Ok(true)
        }
    }

    // -- Heartbeat (RFC6520) --

    /// Queue a heartbeat_request carrying `payload`, padded with
    /// `padding_len` random bytes (at least 16).
    pub(crate) fn send_heartbeat_request(
        &mut self,
        payload: &[u8],
        padding_len: usize,
    ) -> Result<(), Error> {
        if self.is_handshaking() {
            return Err(Error::HandshakeNotComplete);
        }

        if !self.we_may_send_heartbeat {
            return Err(Error::HeartbeatNotNegotiated);
        }

        if payload.len() + padding_len + 3 > MAX_FRAGMENT_LEN || padding_len < MIN_PADDING_LEN {
            return Err(Error::General("heartbeat payload too large or padding too small".into()));
        }

        let mut padding = vec![0u8; padding_len];
        self.random.fill(&mut padding)?;

        self.outstanding_heartbeat = Some(payload.to_vec());
        let hb = HeartbeatPayload::new(HeartbeatMessageType::Request, payload, padding);
        self.send_msg(
            Message {
                version: self.hb_version(),
                payload: MessagePayload::Heartbeat(hb),
            },
            true,
        );
        Ok(())
    }

    fn hb_version(&self) -> ProtocolVersion {
        match self.is_tls13() {
            true => ProtocolVersion::TLSv1_3,
            false => ProtocolVersion::TLSv1_2,
        }
    }

    /// Deal with an incoming heartbeat message.
    pub(crate) fn process_heartbeat(&mut self, hb: &HeartbeatPayload) -> Result<(), Error> {
        if self.is_handshaking() {
            self.send_fatal_alert(AlertDescription::UnexpectedMessage);
            return Err(Error::InappropriateMessage {
                expect_types: vec![ContentType::Handshake],
                got_type: ContentType::Heartbeat,
            });
        }

        match hb.typ {
            HeartbeatMessageType::Request => {
                if !self.peer_may_send_heartbeat {
                    self.send_fatal_alert(AlertDescription::UnexpectedMessage);
                    return Err(Error::PeerMisbehavedError(
                        "peer sent heartbeat_request without permission".to_string(),
                    ));
                }

                let mut padding = vec![0u8; hb.padding.len().max(MIN_PADDING_LEN)];
                self.random.fill(&mut padding)?;

                let response =
                    HeartbeatPayload::new(HeartbeatMessageType::Response, &hb.payload.0, padding);
                self.send_msg(
                    Message {
                        version: self.hb_version(),
                        payload: MessagePayload::Heartbeat(response),
                    },
                    true,
                );
            }
            HeartbeatMessageType::Response => {
                // A response is only meaningful if it echoes an
                // outstanding request; all others are dropped on the
                // floor per RFC6520 s4.
                match self.outstanding_heartbeat.take() {
                    Some(expected) if expected == hb.payload.0 => {
                        if let Some(cb) = &self.heartbeat_callback {
                            cb(&hb.payload.0);
                        }
                    }
                    outstanding => {
                        debug!("Ignoring unsolicited heartbeat_response");
                        self.outstanding_heartbeat = outstanding;
                    }
                }
            }
            HeartbeatMessageType::Unknown(_) => {
                self.send_fatal_alert(AlertDescription::UnexpectedMessage);
                return Err(Error::CorruptMessagePayload(ContentType::Heartbeat));
            }
        }

        Ok(())
    }

    pub(crate) fn current_io_state(&self) -> IoState {
        IoState {
            tls_bytes_to_write: self.sendable_tls.len(),
            plaintext_bytes_to_read: self.received_plaintext.len(),
            peer_has_closed: self.has_received_close_notify,
        }
    }
}


enum Limit {
    Yes,
    No,
}

const DEFAULT_RECEIVED_PLAINTEXT_LIMIT: usize = 16 * 1024;
const DEFAULT_BUFFER_LIMIT: usize = 64 * 1024;

/// Context through which the handshake state objects reach the
/// connection.
pub(crate) struct Context<'a, Data> {
    pub(crate) common: &'a mut CommonState,
    pub(crate) data: &'a mut Data,
}

/// One wait-point of the handshake state machine.  Each implementation
/// consumes a whole TLS message, and returns either an error or the
/// next state.
pub(crate) trait State<Data>: Send + Sync {
    fn handle(
        self: Box<Self>,
        cx: &mut Context<'_, Data>,
        message: Message,
    ) -> Result<Box<dyn State<Data>>, Error>;

    fn export_keying_material(
        &self,
        _output: &mut [u8],
        _label: &[u8],
        _context: Option<&[u8]>,
    ) -> Result<(), Error> {
        Err(Error::HandshakeNotComplete)
    }

    /// Start a locally-initiated KeyUpdate (TLS1.3 only).
    fn send_key_update_request(
        &mut self,
        _common: &mut CommonState,
        _request_update: bool,
    ) -> Result<(), Error> {
        Err(Error::HandshakeNotComplete)
    }
}

/// Interface shared by client and server connections.
pub struct ConnectionCommon<Data> {
    pub(crate) state: Result<Box<dyn State<Data>>, Error>,
    pub(crate) data: Data,
    pub(crate) common_state: CommonState,
    message_deframer: MessageDeframer,
    handshake_joiner: HandshakeJoiner,
}

impl<Data> ConnectionCommon<Data> {
    pub(crate) fn new(state: Box<dyn State<Data>>, data: Data, common_state: CommonState) -> Self {
        Self {
            state: Ok(state),
            data,
            common_state,
            message_deframer: MessageDeframer::new(),
            handshake_joiner: HandshakeJoiner::new(),
        }
    }

    /// Returns an object that allows reading plaintext.
    pub fn reader(&mut self) -> Reader {
        Reader {
            received_plaintext: &mut self.common_state.received_plaintext,
            // The peer has cleanly closed once we have both seen its
            // close_notify and drained every record before it.
            peer_cleanly_closed: self.common_state.has_received_close_notify
                && !self.message_deframer.has_pending(),
            has_seen_eof: self.common_state.has_seen_eof,
        }
    }

    /// Returns an object that allows writing plaintext.
    pub fn writer(&mut self) -> Writer {
        Writer::new(self)
    }

    /// This function uses `io` to complete any outstanding IO for this connection.
    ///
    /// This is a convenience function which solely uses `read_tls`,
    /// `process_new_packets` and `write_tls`: a server loop that needs
    /// control over when those happen can call them directly.
    ///
    /// Returns `(rdlen, wrlen)`: the number of bytes read and written.
    pub fn complete_io<T>(&mut self, io: &mut T) -> Result<(usize, usize), io::Error>
    where
        Self: Sized,
        T: io::Read + io::Write,
    {
        let until_handshaked = self.is_handshaking();
        let mut eof = false;
        let mut wrlen = 0;
        let mut rdlen = 0;

        loop {
            while self.wants_write() {
                wrlen += self.write_tls(io)?;
            }

            if !until_handshaked && wrlen > 0 {
                return Ok((rdlen, wrlen));
            }

            if !eof && self.wants_read() {
                match self.read_tls(io)? {
                    0 => eof = true,
                    n => rdlen += n,
                }
            }

            match self.process_new_packets() {
                Ok(_) => {}
                Err(e) => {
                    // In case we have an alert to send describing this error,
                    // try a last-gasp write -- but don't predate the primary
                    // error.
                    let _ignored = self.write_tls(io);

                    return Err(io::Error::new(io::ErrorKind::InvalidData, e));
                }
            };

            match (eof, until_handshaked, self.is_handshaking()) {
                (_, true, false) => return Ok((rdlen, wrlen)),
                (_, false, _) => return Ok((rdlen, wrlen)),
                (true, true, true) => {
                    return Err(io::Error::from(io::ErrorKind::UnexpectedEof))
                }
                (..) => {}
            }
        }
    }

    /// Read TLS content from `rd` into the internal buffer.
    ///
    /// Due to the internal buffering, `rd` can supply TLS messages in
    /// arbitrary-sized chunks (like a socket or pipe might).
    ///
    /// You should call `process_new_packets()` each time a call to this
    /// function succeeds in order to empty the incoming TLS data buffer.
    pub fn read_tls(&mut self, rd: &mut dyn io::Read) -> Result<usize, io::Error> {
        if self.received_plaintext_full() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "received plaintext buffer full",
            ));
        }

        let res = self.message_deframer.read(rd);
        if let Ok(0) = res {
            self.common_state.has_seen_eof = true;
        }
        res
    }

    fn received_plaintext_full(&self) -> bool {
        self.common_state
            .received_plaintext
            .apply_limit(1)
            == 0
    }

    /// Writes TLS messages to `wr`.
    ///
    /// On success, this function returns `Ok(n)` where `n` is a number of bytes
    /// written to `wr` (after encoding and encryption).
    ///
    /// After this function returns, the connection buffer may not yet be fully
    /// flushed.  The `wants_write` function can be used to check if the output
    /// buffer is empty.
    pub fn write_tls(&mut self, wr: &mut dyn io::Write) -> Result<usize, io::Error> {
        self.common_state.sendable_tls.write_to(wr)
    }

    /// Processes any new packets read by a previous call to `read_tls`.
    ///
    /// Errors from this function relate to TLS protocol errors, and
    /// are fatal to the connection.  Future calls after an error will do
    /// no new work and will return the same error. After an error is
    /// received from `process_new_packets`, you should not call `read_tls`
    /// any more (it will fill up buffers to no purpose). However, you
    /// may call the other methods on the connection, including `write`,
    /// `send_close_notify`, and `write_tls`. Most likely you will want to
    /// call `write_tls` to send any alerts queued by the error and then
    /// close the underlying connection.
    pub fn process_new_packets(&mut self) -> Result<IoState, Error> {
        let mut state = match std::mem::replace(&mut self.state, Err(Error::HandshakeNotComplete)) {
            Ok(state) => state,
            Err(e) => {
                self.state = Err(e.clone());
                return Err(e);
            }
        };

        if self.message_deframer.desynced {
            let e = Error::CorruptMessage;
            self.common_state.maybe_send_fatal_alert(&e);
            self.state = Err(e.clone());
            return Err(e);
        }

        while let Some(msg) = self.message_deframer.frames.pop_front() {
            match self.process_msg(msg, state) {
                Ok(new) => state = new,
                Err(e) => {
                    self.state = Err(e.clone());
                    return Err(e);
                }
            }
        }

        self.state = Ok(state);
        Ok(self.common_state.current_io_state())
    }

    fn process_msg(
        &mut self,
        msg: OpaqueMessage,
        state: Box<dyn State<Data>>,
    ) -> Result<Box<dyn State<Data>>, Error> {
        // Drop (up to one) CCS sent for middlebox compatibility during
        // a TLS1.3 handshake.
        if self.common_state.filter_tls13_ccs(&msg)? {
            return Ok(state);
        }

        let plain = if self.common_state.record_layer.is_decrypting() {
            match self.common_state.record_layer.decrypt_incoming(msg) {
                Ok(plain) => plain,
                Err(e @ Error::DecryptError) => {
                    // A record that failed its AEAD check is a
                    // bad_record_mac at the wire level (RFC8446 s5.2).
                    self.common_state
                        .send_fatal_alert(AlertDescription::BadRecordMac);
                    return Err(e);
                }
                Err(e) => {
                    self.common_state.maybe_send_fatal_alert(&e);
                    return Err(e);
                }
            }
        } else {
            msg.into_plain_message()
        };

        self.process_plain(plain, state)
    }

    fn process_plain(
        &mut self,
        plain: PlainMessage,
        mut state: Box<dyn State<Data>>,
    ) -> Result<Box<dyn State<Data>>, Error> {
        // pass handshake messages through the joiner: they may be
        // fragmented or coalesced.
        if self.handshake_joiner.want_message(&plain) {
            let version = match plain.version {
                ProtocolVersion::TLSv1_3 => ProtocolVersion::TLSv1_3,
                _ => self
                    .common_state
                    .negotiated_version
                    .unwrap_or(ProtocolVersion::TLSv1_2),
            };

            let count = self
                .handshake_joiner
                .take_message(plain, version)
                .ok_or_else(|| {
                    self.common_state
                        .maybe_send_fatal_alert(&Error::CorruptMessagePayload(ContentType::Handshake));
                    Error::CorruptMessagePayload(ContentType::Handshake)
                })?;

            self.common_state.aligned_handshake = self.handshake_joiner.is_empty();

            for _ in 0..count {
                let msg = self.handshake_joiner.frames.pop_front().unwrap();
                state = self.process_main_protocol(msg, state)?;
            }

            return Ok(state);
        }

        let msg = Message::try_from(plain).map_err(|e| {
            self.common_state.maybe_send_fatal_alert(&e);
            e
        })?;

        self.process_main_protocol(msg, state)
    }

    /// Process `msg`.  First, we get the current state.  Then we ask what messages
    /// that state expects, enforced via `check_message`.  Finally, we ask the handler
    /// to handle the message.
    fn process_main_protocol(
        &mut self,
        msg: Message,
        state: Box<dyn State<Data>>,
    ) -> Result<Box<dyn State<Data>>, Error> {
        match &msg.payload {
            MessagePayload::Alert(alert) => {
                self.common_state.process_alert(alert)?;
                return Ok(state);
            }
            MessagePayload::Heartbeat(hb) => {
                self.common_state.process_heartbeat(hb)?;
                return Ok(state);
            }
            _ => {}
        };

        // For TLS1.2, outside of the handshake, a HelloRequest is a
        // renegotiation request: we don't support renegotiation, and
        // respond with a warning (RFC5246 s7.4.1.1).
        if !self.common_state.is_tls13()
            && !self.common_state.is_handshaking()
            && msg.is_handshake_type(HandshakeType::HelloRequest)
        {
            self.common_state
                .send_warning_alert(AlertDescription::NoRenegotiation);
            return Ok(state);
        }

        let mut cx = Context {
            common: &mut self.common_state,
            data: &mut self.data,
        };
        match state.handle(&mut cx, msg) {
            Ok(next) => Ok(next),
            Err(e) => {
                self.common_state.maybe_send_fatal_alert(&e);
                Err(e)
            }
        }
    }

    /// Send a KeyUpdate message (TLS1.3 only).  If `request_update` is
    /// true the peer is asked to update its own sending keys too.
    pub fn send_key_update(&mut self, request_update: bool) -> Result<(), Error> {
        match &mut self.state {
            Ok(state) => state.send_key_update_request(&mut self.common_state, request_update),
            Err(e) => Err(e.clone()),
        }
    }

    /// Send a heartbeat_request carrying `payload` with `padding_len`
    /// bytes of fresh random padding.
    ///
    /// Fails unless the peer negotiated permission for us to send
    /// (RFC6520 `peer_allowed_to_send`).
    pub fn send_heartbeat_request(
        &mut self,
        payload: &[u8],
        padding_len: usize,
    ) -> Result<(), Error> {
        self.common_state
            .send_heartbeat_request(payload, padding_len)
    }

    /// Register a callback invoked with the payload of each
    /// heartbeat_response answering one of our requests.
    pub fn set_heartbeat_callback(&mut self, cb: HeartbeatCallback) {
        self.common_state.heartbeat_callback = Some(cb);
    }

    /// Derives key material from the agreed connection secrets.
    pub fn export_keying_material(
        &self,
        output: &mut [u8],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), Error> {
        match &self.state {
            Ok(state) => state.export_keying_material(output, label, context),
            Err(e) => Err(e.clone()),
        }
    }

    /// Sends a `close_notify` warning alert, which means the
    /// connection will not send any more data.  The second and later
    /// calls do nothing.
    pub fn send_close_notify(&mut self) {
        self.common_state.send_close_notify();
    }

    /// Returns true if the caller should call `read_tls` as soon
    /// as possible.
    pub fn wants_read(&self) -> bool {
        // We want to read more data all the time, except when we have
        // unprocessed plaintext.  This provides back-pressure to the TCP
        // buffers.  We also don't want to read more after the peer has sent us
        // a close notification.
        //
        // In the handshake case we don't have readable plaintext before the
        // handshake has completed, but also don't want to read if we still
        // have sendable tls.
        self.common_state
            .received_plaintext
            .is_empty()
            && !self.common_state.has_received_close_notify
            && (self.common_state.may_send_application_data
                || self.common_state.sendable_tls.is_empty())
    }
}


impl<Data> std::ops::Deref for ConnectionCommon<Data> {
    type Target = CommonState;

    fn deref(&self) -> &Self::Target {
        &self.common_state
    }
}

impl<Data> std::ops::DerefMut for ConnectionCommon<Data> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.common_state
    }
}
