//! Handshake state machine.
//!
//! ```text
//! AwaitingHandshake --(valid Handshake)--> Ready
//!         |
//!         +--(anything else)-------------> Rejected(reason)
//! ```
//!
//! Both `Ready` and `Rejected` are terminal. The machine never retries;
//! whether to reconnect is up to whoever owns the transport.

use crate::frame::Frame;
use crate::packet::{Packet, PacketBody};
use crate::packets::{Disconnect, DisconnectReason, Handshake};
use crate::registry::PacketRegistry;
use crate::wire::CodecLimits;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a peer's mod version is matched against the local one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionMatching {
    /// Versions must be identical.
    #[default]
    Exact,
    /// Major and minor components must be equal; patch may differ.
    SameMinor,
}

impl VersionMatching {
    /// Builds a policy around the local version.
    pub fn policy(self, local_version: impl Into<String>) -> VersionPolicy {
        match self {
            VersionMatching::Exact => VersionPolicy::Exact(local_version.into()),
            VersionMatching::SameMinor => VersionPolicy::SameMinor(local_version.into()),
        }
    }
}

/// Version compatibility policy, holding the local version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionPolicy {
    Exact(String),
    SameMinor(String),
}

impl VersionPolicy {
    /// Returns the local version.
    pub fn local_version(&self) -> &str {
        match self {
            VersionPolicy::Exact(v) | VersionPolicy::SameMinor(v) => v,
        }
    }

    /// Returns whether a peer announcing `remote` may connect.
    pub fn accepts(&self, remote: &str) -> bool {
        match self {
            VersionPolicy::Exact(local) => local == remote,
            VersionPolicy::SameMinor(local) => match (major_minor(local), major_minor(remote)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Human-readable description of what this policy accepts.
    pub fn describe(&self) -> String {
        match self {
            VersionPolicy::Exact(v) => v.clone(),
            VersionPolicy::SameMinor(v) => match major_minor(v) {
                Some((major, minor)) => format!("{major}.{minor}.x"),
                None => v.clone(),
            },
        }
    }
}

/// Parses `MAJOR.MINOR[.PATCH[-suffix]]`.
fn major_minor(version: &str) -> Option<(u64, u64)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

/// Identity established by a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Mod version the peer announced.
    pub mod_version: String,
    pub username: String,
    pub game_address: String,
    pub world: String,
}

impl From<Handshake> for Session {
    fn from(hs: Handshake) -> Self {
        Self {
            mod_version: hs.mod_version,
            username: hs.username,
            game_address: hs.game_address,
            world: hs.world,
        }
    }
}

/// Why a handshake was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("protocol violation: expected Handshake, got packet id {packet_id}")]
    ProtocolViolation { packet_id: u16 },

    #[error("version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },

    #[error("malformed handshake: {0}")]
    MalformedHandshake(String),
}

impl RejectReason {
    /// Reason code sent to the peer.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            RejectReason::ProtocolViolation { .. } => DisconnectReason::ProtocolViolation,
            RejectReason::VersionMismatch { .. } => DisconnectReason::VersionMismatch,
            RejectReason::MalformedHandshake(_) => DisconnectReason::MalformedHandshake,
        }
    }

    /// Message meant for the player rather than for logs.
    pub fn user_message(&self) -> String {
        match self {
            RejectReason::ProtocolViolation { .. } => {
                "Connection must start with a handshake".to_string()
            }
            RejectReason::VersionMismatch { expected, actual } => format!(
                "Incompatible mapsync version {actual}; this server requires {expected}"
            ),
            RejectReason::MalformedHandshake(detail) => format!("Invalid handshake: {detail}"),
        }
    }

    /// Builds the reply sent before closing the connection.
    pub fn to_disconnect(&self) -> Disconnect {
        Disconnect::new(self.disconnect_reason(), self.user_message())
    }
}

/// Handshake progress of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingHandshake,
    Ready,
    Rejected(RejectReason),
}

/// Per-connection handshake state machine.
#[derive(Debug)]
pub struct HandshakeMachine {
    policy: VersionPolicy,
    state: HandshakeState,
}

impl HandshakeMachine {
    pub fn new(policy: VersionPolicy) -> Self {
        Self {
            policy,
            state: HandshakeState::AwaitingHandshake,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    /// Returns the version policy.
    pub fn policy(&self) -> &VersionPolicy {
        &self.policy
    }

    pub fn is_ready(&self) -> bool {
        self.state == HandshakeState::Ready
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.state, HandshakeState::Rejected(_))
    }

    /// Feeds the first frame of the connection.
    ///
    /// The frame must carry a Handshake; its id is checked before anything is
    /// decoded. Any frame fed after the machine left `AwaitingHandshake` is a
    /// protocol violation.
    pub fn on_frame(
        &mut self,
        frame: &Frame,
        registry: &PacketRegistry,
        limits: &CodecLimits,
    ) -> Result<Session, RejectReason> {
        if self.state != HandshakeState::AwaitingHandshake
            || frame.packet_id != Handshake::PACKET_ID
        {
            return Err(self.reject(RejectReason::ProtocolViolation {
                packet_id: frame.packet_id,
            }));
        }

        match registry.dispatch_frame(frame, limits) {
            Ok(Packet::Handshake(handshake)) => self.on_handshake(handshake),
            Ok(other) => Err(self.reject(RejectReason::ProtocolViolation {
                packet_id: other.id(),
            })),
            Err(e) => Err(self.reject(RejectReason::MalformedHandshake(e.to_string()))),
        }
    }

    /// Validates an already decoded Handshake.
    pub fn on_handshake(&mut self, handshake: Handshake) -> Result<Session, RejectReason> {
        if self.state != HandshakeState::AwaitingHandshake {
            return Err(self.reject(RejectReason::ProtocolViolation {
                packet_id: Handshake::PACKET_ID,
            }));
        }

        if let Some(field) = handshake.missing_field() {
            return Err(self.reject(RejectReason::MalformedHandshake(format!(
                "{field} is empty"
            ))));
        }

        if !self.policy.accepts(&handshake.mod_version) {
            return Err(self.reject(RejectReason::VersionMismatch {
                expected: self.policy.describe(),
                actual: handshake.mod_version,
            }));
        }

        self.state = HandshakeState::Ready;
        Ok(Session::from(handshake))
    }

    fn reject(&mut self, reason: RejectReason) -> RejectReason {
        self.state = HandshakeState::Rejected(reason.clone());
        reason
    }
}
