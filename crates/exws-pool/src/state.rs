//! Connection-record state machine.
//!
//! Lifecycle dispatch is driven by explicit state transitions rather than
//! implicit listener registration, so illegal transitions (for example a
//! message arriving while `Closed`) are detectable and testable.

/// State of one connection record.
///
/// Records start `Closed` (allocated but never opened). A scheduled renewal
/// keeps the record `Open` for its whole window: the record briefly owns two
/// sockets, old draining and new accepting, and only the sockets change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Open,
    Draining,
    Closed,
}

impl ConnState {
    /// Whether moving to `next` is a legal transition.
    ///
    /// Same-state transitions are legal no-ops (a renewal socket re-emits
    /// `open` while the record is already `Open`).
    pub fn can_transition(self, next: ConnState) -> bool {
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Self::Closed, Self::Connecting)
                | (Self::Connecting, Self::Open)
                | (Self::Connecting, Self::Closed)
                | (Self::Connecting, Self::Draining)
                | (Self::Open, Self::Draining)
                | (Self::Open, Self::Closed)
                | (Self::Draining, Self::Closed)
        )
    }
}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Open => write!(f, "OPEN"),
            Self::Draining => write!(f, "DRAINING"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        assert!(ConnState::Closed.can_transition(ConnState::Connecting));
        assert!(ConnState::Connecting.can_transition(ConnState::Open));
        assert!(ConnState::Open.can_transition(ConnState::Draining));
        assert!(ConnState::Draining.can_transition(ConnState::Closed));
        assert!(ConnState::Open.can_transition(ConnState::Closed));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!ConnState::Closed.can_transition(ConnState::Open));
        assert!(!ConnState::Draining.can_transition(ConnState::Open));
        assert!(!ConnState::Closed.can_transition(ConnState::Draining));
    }

    #[test]
    fn test_same_state_is_noop() {
        assert!(ConnState::Open.can_transition(ConnState::Open));
    }
}
