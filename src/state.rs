//! Driver and control endpoint state

use crate::endpoint::{InState, OutState};

/// Driver lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum State {
    /// Powered down. Call [`start()`](crate::Driver::start).
    #[default]
    Stopped,
    /// Powered, and waiting for a bus reset
    Ready,
    /// The host assigned an address
    Selected,
    /// Reset by the host, or configured
    Active,
    /// The bus is suspended
    Suspended,
}

/// Transfer state of a half-duplex control endpoint
///
/// A control endpoint is either sending, receiving, or waiting for the
/// next SETUP. Preparing a transfer moves it into the matching phase,
/// and a SETUP moves it back to `Idle`.
#[derive(Default)]
pub enum Ep0Phase<'a> {
    #[default]
    Idle,
    In(InState<'a>),
    Out(OutState<'a>),
}

impl<'a> Ep0Phase<'a> {
    pub fn in_state(&self) -> Option<&InState<'a>> {
        match self {
            Ep0Phase::In(state) => Some(state),
            _ => None,
        }
    }

    pub fn in_state_mut(&mut self) -> Option<&mut InState<'a>> {
        match self {
            Ep0Phase::In(state) => Some(state),
            _ => None,
        }
    }

    pub fn out_state(&self) -> Option<&OutState<'a>> {
        match self {
            Ep0Phase::Out(state) => Some(state),
            _ => None,
        }
    }

    pub fn out_state_mut(&mut self) -> Option<&mut OutState<'a>> {
        match self {
            Ep0Phase::Out(state) => Some(state),
            _ => None,
        }
    }
}

impl core::fmt::Debug for Ep0Phase<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Ep0Phase::Idle => f.write_str("Idle"),
            Ep0Phase::In(state) => f.debug_tuple("In").field(state).finish(),
            Ep0Phase::Out(state) => f.debug_tuple("Out").field(state).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Ep0Phase, State};
    use crate::endpoint::{InState, TxSource};

    #[test]
    fn default_states() {
        assert_eq!(State::default(), State::Stopped);
        assert!(matches!(Ep0Phase::default(), Ep0Phase::Idle));
    }

    #[test]
    fn phase_accessors() {
        let data = [1, 2, 3];
        let mut phase = Ep0Phase::In(InState::new(TxSource::Linear(&data), 3));
        assert_eq!(phase.in_state().map(|s| s.txsize()), Some(3));
        assert!(phase.out_state().is_none());
        assert!(phase.out_state_mut().is_none());
        phase = Ep0Phase::Idle;
        assert!(phase.in_state_mut().is_none());
    }
}
