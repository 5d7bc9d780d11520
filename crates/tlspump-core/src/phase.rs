//! Connection phase.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────┐ start ┌──────────────────┐ FINISHED ┌─────────────┐
//! │ Created │──────>│ InitialHandshake │─────────>│ Established │<──┐
//! └─────────┘       └──────────────────┘          └─────────────┘   │
//!                            │                        │ NEED_*      │ FINISHED
//!                            │                        ↓             │
//!                            │                  ┌───────────────┐   │
//!                            │                  │ Rehandshaking │───┘
//!                            │                  └───────────────┘
//!                            ↓ close (from any phase)
//!                       ┌────────┐
//!                       │ Closed │
//!                       └────────┘
//! ```
//!
//! Transitions are driven by the handshake status of every engine result and
//! by explicit close. `Closed` is absorbing.

use crate::engine::{EngineResult, HandshakeStatus, Status};

/// Overall phase of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Endpoint built, no engine call made yet
    #[default]
    Created,
    /// First handshake in progress
    InitialHandshake,
    /// Handshake complete, application data flows
    Established,
    /// Renegotiation or key update in progress
    Rehandshaking,
    /// Terminal; no further wrap or unwrap
    Closed,
}

impl Phase {
    /// Returns true while a handshake is in progress.
    pub fn is_handshaking(self) -> bool {
        matches!(self, Self::InitialHandshake | Self::Rehandshaking)
    }

    /// Phase after `start()`.
    #[must_use]
    pub fn started(self) -> Self {
        match self {
            Self::Created => Self::InitialHandshake,
            other => other,
        }
    }

    /// Phase after the engine reported `result`.
    ///
    /// A `Closed` result leaves the phase alone: its handshake status
    /// describes the close exchange, not a new handshake.
    #[must_use]
    pub fn transition(self, result: &EngineResult) -> Self {
        let status = result.handshake_status;
        match self {
            Self::Closed => Self::Closed,
            _ if result.status == Status::Closed => self,
            Self::Created | Self::InitialHandshake | Self::Rehandshaking
                if status == HandshakeStatus::Finished =>
            {
                Self::Established
            },
            Self::Created if status.is_handshaking() => Self::InitialHandshake,
            Self::Established if status.is_handshaking() => Self::Rehandshaking,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(handshake_status: HandshakeStatus) -> EngineResult {
        EngineResult::idle(Status::Ok, handshake_status)
    }

    #[test]
    fn initial_handshake_lifecycle() {
        let phase = Phase::Created.started();
        assert_eq!(phase, Phase::InitialHandshake);

        let phase = phase.transition(&result(HandshakeStatus::NeedUnwrap));
        assert_eq!(phase, Phase::InitialHandshake);

        let phase = phase.transition(&result(HandshakeStatus::Finished));
        assert_eq!(phase, Phase::Established);

        let phase = phase.transition(&result(HandshakeStatus::NotHandshaking));
        assert_eq!(phase, Phase::Established);
    }

    #[test]
    fn rehandshake_returns_to_established() {
        let phase = Phase::Established.transition(&result(HandshakeStatus::NeedWrap));
        assert_eq!(phase, Phase::Rehandshaking);
        assert!(phase.is_handshaking());

        let phase = phase.transition(&result(HandshakeStatus::Finished));
        assert_eq!(phase, Phase::Established);
    }

    #[test]
    fn closed_is_absorbing() {
        for status in [
            HandshakeStatus::Finished,
            HandshakeStatus::NeedWrap,
            HandshakeStatus::NotHandshaking,
        ] {
            assert_eq!(Phase::Closed.transition(&result(status)), Phase::Closed);
        }
        assert_eq!(Phase::Closed.started(), Phase::Closed);
    }

    #[test]
    fn closing_result_is_not_a_rehandshake() {
        let closing = EngineResult::idle(Status::Closed, HandshakeStatus::NeedWrap);
        assert_eq!(Phase::Established.transition(&closing), Phase::Established);

        let closing = EngineResult::idle(Status::Closed, HandshakeStatus::NeedUnwrap);
        assert_eq!(Phase::Established.transition(&closing), Phase::Established);
        assert_eq!(Phase::Rehandshaking.transition(&closing), Phase::Rehandshaking);
    }

    #[test]
    fn engine_activity_before_start_enters_handshake() {
        let phase = Phase::Created.transition(&result(HandshakeStatus::NeedWrap));
        assert_eq!(phase, Phase::InitialHandshake);
    }
}
