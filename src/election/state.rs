//! Election state machine.
//!
//! # State Transitions
//! ```text
//! Candidate → Leader:    lock acquired
//! Leader → Candidate:    session lost (lock released, election retried)
//! Candidate | Leader → Stopped: stop() only
//! ```

/// Where an election currently stands.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    Candidate = 0,
    Leader = 1,
    Stopped = 2,
}

impl From<u8> for ElectionState {
    fn from(val: u8) -> Self {
        match val {
            1 => ElectionState::Leader,
            2 => ElectionState::Stopped,
            _ => ElectionState::Candidate,
        }
    }
}

impl ElectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElectionState::Candidate => "candidate",
            ElectionState::Leader => "leader",
            ElectionState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ElectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_roundtrip() {
        for state in [ElectionState::Candidate, ElectionState::Leader, ElectionState::Stopped] {
            assert_eq!(ElectionState::from(state as u8), state);
        }
        assert_eq!(ElectionState::from(42), ElectionState::Candidate);
    }
}
