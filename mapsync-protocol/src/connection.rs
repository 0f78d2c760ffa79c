//! Per-connection protocol driver.
//!
//! [`ServerConnection`] owns the frame decoder and the handshake machine of a
//! single accepted connection. It performs no I/O: the transport feeds raw
//! bytes in and polls events out, which keeps the whole protocol testable
//! without sockets.

use crate::codec::Decoder;
use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::handshake::{HandshakeMachine, HandshakeState, RejectReason, Session, VersionPolicy};
use crate::packet::{Packet, PacketBody};
use crate::packets::{Disconnect, DisconnectReason, Handshake};
use crate::registry::PacketRegistry;
use crate::wire::CodecLimits;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// What to do with a well-framed packet whose id is not registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownPacketPolicy {
    /// Skip the frame and keep the connection open.
    #[default]
    Ignore,
    /// Treat the frame as a fatal protocol error.
    Close,
}

/// Something the connection produced from buffered bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The handshake was accepted.
    Ready(Session),
    /// A packet arrived after the handshake.
    Packet(Packet),
    /// A frame with an unregistered id was skipped.
    Skipped { packet_id: u16 },
}

/// Fatal connection errors. After any of these the connection is closed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("handshake rejected: {0}")]
    Rejected(RejectReason),

    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("connection closed")]
    Closed,
}

impl ConnectionError {
    /// Builds the packet to send the peer before closing, if any.
    pub fn disconnect(&self) -> Option<Disconnect> {
        match self {
            ConnectionError::Rejected(reason) => Some(reason.to_disconnect()),
            ConnectionError::Protocol(err) => {
                let reason = match err {
                    ProtocolError::FrameTooLarge { .. } => DisconnectReason::FrameTooLarge,
                    ProtocolError::UnknownPacketId(_) => DisconnectReason::ProtocolViolation,
                    _ => DisconnectReason::MalformedFrame,
                };
                Some(Disconnect::new(reason, err.to_string()))
            }
            ConnectionError::Closed => None,
        }
    }
}

/// Server side of one mapsync connection.
pub struct ServerConnection {
    decoder: Decoder,
    handshake: HandshakeMachine,
    registry: &'static PacketRegistry,
    unknown_packets: UnknownPacketPolicy,
    session: Option<Session>,
    closed: bool,
}

impl ServerConnection {
    /// Creates a connection using the standard packet registry.
    pub fn new(policy: VersionPolicy, limits: CodecLimits) -> Self {
        Self {
            decoder: Decoder::with_limits(limits),
            handshake: HandshakeMachine::new(policy),
            registry: PacketRegistry::standard(),
            unknown_packets: UnknownPacketPolicy::default(),
            session: None,
            closed: false,
        }
    }

    /// Replaces the packet registry.
    pub fn with_registry(mut self, registry: &'static PacketRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_unknown_packets(mut self, policy: UnknownPacketPolicy) -> Self {
        self.unknown_packets = policy;
        self
    }

    /// Appends bytes read from the transport. Ignored once closed.
    pub fn feed(&mut self, data: &[u8]) {
        if !self.closed {
            self.decoder.extend(data);
        }
    }

    /// Produces the next event from buffered bytes.
    ///
    /// Returns `Ok(None)` when more bytes are needed. On `Err` the connection
    /// is closed and every later call returns [`ConnectionError::Closed`].
    pub fn poll(&mut self) -> Result<Option<ConnectionEvent>, ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }

        let frame = match self.decoder.decode_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(e) => return Err(self.fail(ConnectionError::Protocol(e))),
        };

        if self.session.is_none() {
            return self.on_handshake_frame(&frame);
        }

        if frame.packet_id == Handshake::PACKET_ID {
            // Routes through the machine so the state ends up Rejected
            let limits = *self.decoder.limits();
            return match self.handshake.on_frame(&frame, self.registry, &limits) {
                Ok(_) => Err(self.fail(ConnectionError::Rejected(
                    RejectReason::ProtocolViolation {
                        packet_id: frame.packet_id,
                    },
                ))),
                Err(reason) => Err(self.fail(ConnectionError::Rejected(reason))),
            };
        }

        match self.registry.dispatch_frame(&frame, self.decoder.limits()) {
            Ok(packet) => {
                debug!(packet = packet.name(), "packet received");
                Ok(Some(ConnectionEvent::Packet(packet)))
            }
            Err(ProtocolError::UnknownPacketId(id))
                if self.unknown_packets == UnknownPacketPolicy::Ignore =>
            {
                warn!(packet_id = id, len = frame.body.len(), "skipping unknown packet");
                Ok(Some(ConnectionEvent::Skipped { packet_id: id }))
            }
            Err(e) => Err(self.fail(ConnectionError::Protocol(e))),
        }
    }

    fn on_handshake_frame(
        &mut self,
        frame: &Frame,
    ) -> Result<Option<ConnectionEvent>, ConnectionError> {
        let limits = *self.decoder.limits();
        match self.handshake.on_frame(frame, self.registry, &limits) {
            Ok(session) => {
                debug!(
                    username = %session.username,
                    world = %session.world,
                    version = %session.mod_version,
                    "handshake accepted"
                );
                self.session = Some(session.clone());
                Ok(Some(ConnectionEvent::Ready(session)))
            }
            Err(reason) => Err(self.fail(ConnectionError::Rejected(reason))),
        }
    }

    fn fail(&mut self, err: ConnectionError) -> ConnectionError {
        warn!(error = %err, "closing connection");
        self.close();
        err
    }

    /// Closes the connection and drops any buffered bytes.
    pub fn close(&mut self) {
        self.closed = true;
        self.decoder.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns the session once the handshake succeeded.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn state(&self) -> &HandshakeState {
        self.handshake.state()
    }

    pub fn limits(&self) -> &CodecLimits {
        self.decoder.limits()
    }

    /// Returns the number of bytes waiting for a complete frame.
    pub fn buffered(&self) -> usize {
        self.decoder.buffered()
    }
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("state", self.handshake.state())
            .field("buffered", &self.decoder.buffered())
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Encoder;
    use crate::packets::{ChunkTile, Welcome};
    use bytes::Bytes;

    fn steve() -> Handshake {
        Handshake::new("1.4.0", "Steve", "play.example.com:25565", "overworld")
    }

    fn conn() -> ServerConnection {
        ServerConnection::new(
            VersionPolicy::Exact("1.4.0".to_string()),
            CodecLimits::default(),
        )
    }

    fn encode(packet: impl Into<Packet>) -> Vec<u8> {
        Encoder::encode(packet, &CodecLimits::default())
            .unwrap()
            .to_vec()
    }

    fn tile() -> ChunkTile {
        ChunkTile::new("overworld", 3, -4, 1_700_000_000_000, Bytes::from_static(b"tile"))
    }

    #[test]
    fn test_handshake_then_packets() {
        let mut c = conn();
        c.feed(&encode(steve()));

        match c.poll().unwrap() {
            Some(ConnectionEvent::Ready(session)) => assert_eq!(session.username, "Steve"),
            other => panic!("expected Ready, got {:?}", other),
        }
        assert_eq!(c.state(), &HandshakeState::Ready);
        assert_eq!(c.poll().unwrap(), None);

        c.feed(&encode(tile()));
        assert_eq!(
            c.poll().unwrap(),
            Some(ConnectionEvent::Packet(Packet::ChunkTile(tile())))
        );
        assert_eq!(c.session().map(|s| s.world.as_str()), Some("overworld"));
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut c = conn();
        let bytes = encode(steve());

        for (i, byte) in bytes.iter().enumerate() {
            c.feed(std::slice::from_ref(byte));
            let event = c.poll().unwrap();
            if i + 1 < bytes.len() {
                assert_eq!(event, None);
            } else {
                assert!(matches!(event, Some(ConnectionEvent::Ready(_))));
            }
        }
    }

    #[test]
    fn test_handshake_and_tile_in_one_read() {
        let mut c = conn();
        let mut bytes = encode(steve());
        bytes.extend(encode(tile()));
        c.feed(&bytes);

        assert!(matches!(c.poll(), Ok(Some(ConnectionEvent::Ready(_)))));
        assert!(matches!(c.poll(), Ok(Some(ConnectionEvent::Packet(_)))));
        assert_eq!(c.poll(), Ok(None));
    }

    #[test]
    fn test_tile_before_handshake_rejected() {
        let mut c = conn();
        c.feed(&encode(tile()));

        let err = c.poll().unwrap_err();
        assert_eq!(
            err,
            ConnectionError::Rejected(RejectReason::ProtocolViolation { packet_id: 4 })
        );
        let reply = err.disconnect().unwrap();
        assert_eq!(reply.reason, DisconnectReason::ProtocolViolation);

        assert!(c.is_closed());
        assert_eq!(c.poll(), Err(ConnectionError::Closed));
    }

    #[test]
    fn test_second_handshake_rejected() {
        let mut c = conn();
        c.feed(&encode(steve()));
        c.poll().unwrap();

        c.feed(&encode(steve()));
        assert_eq!(
            c.poll(),
            Err(ConnectionError::Rejected(RejectReason::ProtocolViolation {
                packet_id: 1
            }))
        );
        assert!(matches!(c.state(), HandshakeState::Rejected(_)));
    }

    #[test]
    fn test_unknown_packet_ignored() {
        let mut c = conn();
        c.feed(&encode(steve()));
        c.poll().unwrap();

        let unknown = Frame::new(0x7777, Bytes::from_static(b"future"))
            .encode(crate::DEFAULT_MAX_FRAME_SIZE)
            .unwrap();
        c.feed(&unknown);
        c.feed(&encode(tile()));

        assert_eq!(
            c.poll(),
            Ok(Some(ConnectionEvent::Skipped { packet_id: 0x7777 }))
        );
        assert!(matches!(c.poll(), Ok(Some(ConnectionEvent::Packet(_)))));
        assert!(!c.is_closed());
    }

    #[test]
    fn test_unknown_packet_closes_when_strict() {
        let mut c = conn().with_unknown_packets(UnknownPacketPolicy::Close);
        c.feed(&encode(steve()));
        c.poll().unwrap();

        let unknown = Frame::new(0x7777, Bytes::new())
            .encode(crate::DEFAULT_MAX_FRAME_SIZE)
            .unwrap();
        c.feed(&unknown);

        assert_eq!(
            c.poll(),
            Err(ConnectionError::Protocol(ProtocolError::UnknownPacketId(
                0x7777
            )))
        );
        assert!(c.is_closed());
    }

    #[test]
    fn test_oversized_frame_closes() {
        let limits = CodecLimits::default().with_max_frame_size(64);
        let mut c = ServerConnection::new(VersionPolicy::Exact("1.4.0".to_string()), limits);
        c.feed(b"\x00\x01\x00\x00\x00\x01");

        let err = c.poll().unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Protocol(ProtocolError::FrameTooLarge { .. })
        ));
        assert_eq!(
            err.disconnect().map(|d| d.reason),
            Some(DisconnectReason::FrameTooLarge)
        );
        assert_eq!(c.buffered(), 0);
    }

    #[test]
    fn test_malformed_packet_after_handshake_closes() {
        let mut c = conn();
        c.feed(&encode(steve()));
        c.poll().unwrap();

        let broken = Frame::new(ChunkTile::PACKET_ID, Bytes::from_static(b"\x00\x05ab"))
            .encode(crate::DEFAULT_MAX_FRAME_SIZE)
            .unwrap();
        c.feed(&broken);

        let err = c.poll().unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Protocol(ProtocolError::MalformedFrame(_))
        ));
        assert_eq!(
            err.disconnect().map(|d| d.reason),
            Some(DisconnectReason::MalformedFrame)
        );
    }

    #[test]
    fn test_version_mismatch_reply() {
        let mut c = conn();
        let mut hs = steve();
        hs.mod_version = "1.2.0".to_string();
        c.feed(&encode(hs));

        let err = c.poll().unwrap_err();
        let reply = err.disconnect().unwrap();
        assert_eq!(reply.reason, DisconnectReason::VersionMismatch);
        assert!(reply.message.contains("1.2.0"));
    }

    #[test]
    fn test_long_version_reply_still_encodes() {
        let limits = CodecLimits::default();
        let mut c = conn();
        let mut hs = steve();
        hs.mod_version = "9".repeat(1000);
        c.feed(&encode(hs));

        let reply = c.poll().unwrap_err().disconnect().unwrap();
        assert!(reply.message.len() > limits.max_string_len as usize);

        let mut decoder = Decoder::with_limits(limits);
        decoder.extend(&Encoder::encode(reply, &limits).unwrap());
        match decoder.decode_packet(PacketRegistry::standard()).unwrap() {
            Some(Packet::Disconnect(d)) => {
                assert_eq!(d.reason, DisconnectReason::VersionMismatch);
                assert_eq!(d.message.len(), limits.max_string_len as usize);
            }
            other => panic!("expected Disconnect, got {:?}", other),
        }
    }

    #[test]
    fn test_reply_fits_small_string_limit() {
        let limits = CodecLimits::default().with_max_string_len(16);
        let mut c = ServerConnection::new(VersionPolicy::Exact("1.4.0".to_string()), limits);
        c.feed(&encode(Disconnect::normal()));

        let reply = c.poll().unwrap_err().disconnect().unwrap();
        assert_eq!(reply.reason, DisconnectReason::ProtocolViolation);

        let mut decoder = Decoder::with_limits(limits);
        decoder.extend(&Encoder::encode(reply, &limits).unwrap());
        match decoder.decode_packet(PacketRegistry::standard()).unwrap() {
            Some(Packet::Disconnect(d)) => {
                assert_eq!(d.reason, DisconnectReason::ProtocolViolation);
                assert!(d.message.len() <= 16);
            }
            other => panic!("expected Disconnect, got {:?}", other),
        }
    }

    #[test]
    fn test_feed_after_close_ignored() {
        let mut c = conn();
        c.close();
        c.feed(&encode(Welcome::new("1.4.0", "x")));
        assert_eq!(c.buffered(), 0);
        assert_eq!(c.poll(), Err(ConnectionError::Closed));
        assert_eq!(ConnectionError::Closed.disconnect(), None);
    }
}
