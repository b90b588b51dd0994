//! Client-visible command status.

use serde::{Deserialize, Serialize};

use crate::engine::NetStatus;

/// Command status, advancing `Ready -> Scheduled -> Running -> Terminated`.
///
/// `Error` can be entered from any non-terminal state. `Terminated` and
/// `Error` are absorbing: the final results are decided on the first
/// terminal report, so an engine error arriving after `Terminated` is
/// dropped as stale rather than reopening them (see the status decisions
/// in DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandStatus {
    Ready,
    Scheduled,
    Running,
    Terminated,
    Error,
}

impl CommandStatus {
    /// Translate an engine report.
    pub fn from_net(status: NetStatus) -> Self {
        match status {
            NetStatus::Loading | NetStatus::Ready => CommandStatus::Ready,
            NetStatus::Scheduled => CommandStatus::Scheduled,
            NetStatus::Running | NetStatus::Cancelling => CommandStatus::Running,
            NetStatus::Terminated | NetStatus::Unloaded => CommandStatus::Terminated,
            NetStatus::Error | NetStatus::Invalid | NetStatus::Rejected => CommandStatus::Error,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CommandStatus::Terminated | CommandStatus::Error)
    }

    fn rank(self) -> u8 {
        match self {
            CommandStatus::Ready => 0,
            CommandStatus::Scheduled => 1,
            CommandStatus::Running => 2,
            CommandStatus::Terminated | CommandStatus::Error => 3,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition.
    ///
    /// Repeated and backwards reports are not.
    pub fn advances_to(self, next: CommandStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

/// Outcome of a named result as reported to result listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultState {
    /// The result's condition became true.
    Active,
    /// The command ended without the result ever becoming true.
    Impossible,
}

#[cfg(test)]
mod tests {
    use super::*;
    use CommandStatus::*;

    #[test]
    fn engine_statuses_translate() {
        assert_eq!(CommandStatus::from_net(NetStatus::Loading), Ready);
        assert_eq!(CommandStatus::from_net(NetStatus::Cancelling), Running);
        assert_eq!(CommandStatus::from_net(NetStatus::Unloaded), Terminated);
        assert_eq!(CommandStatus::from_net(NetStatus::Rejected), Error);
    }

    #[test]
    fn only_forward_transitions_advance() {
        assert!(Ready.advances_to(Scheduled));
        assert!(Ready.advances_to(Running));
        assert!(Running.advances_to(Error));
        assert!(!Running.advances_to(Scheduled));
        assert!(!Running.advances_to(Running));
    }

    #[test]
    fn terminal_states_absorb() {
        assert!(!Terminated.advances_to(Error));
        assert!(!Error.advances_to(Terminated));
    }

    #[test]
    fn error_is_reachable_until_terminal() {
        for from in [Ready, Scheduled, Running] {
            assert!(from.advances_to(Error));
        }
        let late = CommandStatus::from_net(NetStatus::Error);
        assert!(!Terminated.advances_to(late));
    }
}
