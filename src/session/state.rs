//! Connection states and the sets of states a message is accepted in

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum SessionState {
    Initial = 0,
    ChallengeSent = 1,
    LogonProofPending = 2,
    ReconnectProofPending = 3,
    Authenticated = 4,
    AwaitingRealmList = 5,
    Closed = 6,
}

/// Which protocol a transition table applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Logon,
    World,
}

impl Protocol {
    pub fn name(self) -> &'static str {
        match self {
            Self::Logon => "logon",
            Self::World => "world",
        }
    }
}

impl SessionState {
    const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }

    pub fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated | Self::AwaitingRealmList)
    }

    /// Whether moving from `self` to `next` is a legal step for `protocol`.
    /// Closing is always legal; nothing leaves `Closed`.
    pub fn can_advance_to(self, next: SessionState, protocol: Protocol) -> bool {
        use SessionState::*;

        if self == Closed {
            return false;
        }
        if next == Closed {
            return true;
        }
        match protocol {
            Protocol::Logon => matches!(
                (self, next),
                (Initial, ChallengeSent)
                    | (ChallengeSent, LogonProofPending)
                    | (ChallengeSent, ReconnectProofPending)
                    | (LogonProofPending, Authenticated)
                    | (ReconnectProofPending, Authenticated)
                    | (Authenticated, AwaitingRealmList)
                    | (AwaitingRealmList, Authenticated)
            ),
            Protocol::World => matches!(
                (self, next),
                (Initial, ChallengeSent) | (ChallengeSent, Authenticated)
            ),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A small set of states, stored as a bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct StateSet(u8);

impl StateSet {
    pub const EMPTY: StateSet = StateSet(0);

    pub const fn of(states: &[SessionState]) -> Self {
        let mut bits = 0u8;
        let mut i = 0;
        while i < states.len() {
            bits |= states[i].bit();
            i += 1;
        }
        StateSet(bits)
    }

    pub const fn with(self, state: SessionState) -> Self {
        StateSet(self.0 | state.bit())
    }

    pub fn contains(self, state: SessionState) -> bool {
        self.0 & state.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for StateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use SessionState::*;

        let members = [
            Initial,
            ChallengeSent,
            LogonProofPending,
            ReconnectProofPending,
            Authenticated,
            AwaitingRealmList,
            Closed,
        ];
        f.debug_set()
            .entries(members.iter().filter(|s| self.contains(**s)))
            .finish()
    }
}
