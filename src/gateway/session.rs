use std::net::SocketAddr;
use tracing::trace;

use crate::net::Direction;

// -----------------------------------------------------------------------------
// ----- SessionState ----------------------------------------------------------

/// ACCEPTED -> SELECTING -> RELAYING -> DRAINING -> CLOSED. Any failure before
/// RELAYING jumps straight to CLOSED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    Selecting,
    Relaying,
    Draining(Direction),
    Closed,
}

// -----------------------------------------------------------------------------
// ----- GatewaySession --------------------------------------------------------

/// Bookkeeping for one client connection while the dispatcher serves it.
#[derive(Debug)]
pub struct GatewaySession {
    id: u64,
    peer: SocketAddr,
    state: SessionState,
}

impl GatewaySession {
    pub fn new(id: u64, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            state: SessionState::Accepted,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_move_to(next),
            "illegal session transition {:?} -> {next:?}",
            self.state
        );
        trace!("session {} {:?} -> {next:?}", self.id, self.state);
        self.state = next;
    }
}

impl SessionState {
    fn can_move_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Accepted, Selecting)
                | (Accepted, Closed)
                | (Selecting, Relaying)
                | (Selecting, Closed)
                | (Relaying, Draining(_))
                | (Relaying, Closed)
                | (Draining(_), Closed)
        )
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle() {
        let mut session = GatewaySession::new(7, "127.0.0.1:5000".parse().unwrap());
        session.advance(SessionState::Selecting);
        session.advance(SessionState::Relaying);
        session.advance(SessionState::Draining(Direction::Upstream));
        session.advance(SessionState::Closed);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn failures_before_relaying_close_directly() {
        assert!(SessionState::Selecting.can_move_to(SessionState::Closed));
        assert!(!SessionState::Closed.can_move_to(SessionState::Selecting));
        assert!(!SessionState::Accepted.can_move_to(SessionState::Relaying));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
