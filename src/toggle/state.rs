//! Value types shared between the controller and its observers

use std::fmt;

/// Last known power state of the remote light
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ToggleState {
    /// No status received yet
    #[default]
    Unknown,
    On,
    Off,
}

impl ToggleState {
    /// Command that flips the light away from this state.
    ///
    /// An unknown state is treated like `Off`, so the first toggle turns the light on.
    pub fn inverse_command(self) -> Command {
        match self {
            ToggleState::On => Command::Off,
            ToggleState::Off | ToggleState::Unknown => Command::On,
        }
    }
}

impl fmt::Display for ToggleState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ToggleState::Unknown => write!(f, "unknown"),
            ToggleState::On => write!(f, "on"),
            ToggleState::Off => write!(f, "off"),
        }
    }
}

/// Outbound command payloads, sent verbatim
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Ask the device to report its current state
    Status,
    On,
    Off,
}

impl Command {
    pub fn as_payload(&self) -> &'static str {
        match self {
            Command::Status => "STATUS",
            Command::On => "ON",
            Command::Off => "OFF",
        }
    }

    /// State the device should end up in after applying this command
    pub fn target_state(&self) -> Option<ToggleState> {
        match self {
            Command::Status => None,
            Command::On => Some(ToggleState::On),
            Command::Off => Some(ToggleState::Off),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_payload())
    }
}

/// Recognized inbound status report
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusReport {
    On,
    Off,
}

impl StatusReport {
    /// Matches `STATUS_ON` / `STATUS_OFF` ignoring ASCII case.
    ///
    /// Anything else, including our own echoed commands on the shared topic,
    /// yields `None`. Only ASCII letters fold, so `ſ` does not match `S`.
    pub fn parse(payload: &str) -> Option<Self> {
        if payload.eq_ignore_ascii_case("STATUS_ON") {
            Some(StatusReport::On)
        } else if payload.eq_ignore_ascii_case("STATUS_OFF") {
            Some(StatusReport::Off)
        } else {
            None
        }
    }

    pub fn state(&self) -> ToggleState {
        match self {
            StatusReport::On => ToggleState::On,
            StatusReport::Off => ToggleState::Off,
        }
    }
}

/// Snapshot of the controller published to the presentation layer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToggleView {
    pub state: ToggleState,
    pub loading: bool,
    /// Command sent but not yet followed by a status report
    pub pending: Option<Command>,
}

impl Default for ToggleView {
    fn default() -> Self {
        Self {
            state: ToggleState::Unknown,
            loading: true,
            pending: None,
        }
    }
}

impl fmt::Display for ToggleView {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.loading {
            return write!(f, "checking latest light status...");
        }
        match self.pending {
            Some(command) => write!(f, "light {} (sent {}, awaiting status)", self.state, command),
            None => write!(f, "light {}", self.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_ignores_case() {
        for payload in ["STATUS_ON", "status_on", "Status_On"] {
            assert_eq!(StatusReport::parse(payload), Some(StatusReport::On));
        }
        assert_eq!(StatusReport::parse("sTaTuS_oFf"), Some(StatusReport::Off));
    }

    #[test]
    fn unrelated_payloads_are_not_status() {
        for payload in ["STATUS", "ON", "OFF", "", " STATUS_ON", "STATUS_ON\n", "STATUS_ONN"] {
            assert_eq!(StatusReport::parse(payload), None, "payload {:?}", payload);
        }
    }

    #[test]
    fn only_ascii_letters_fold() {
        assert_eq!(StatusReport::parse("ſTATUS_ON"), None);
        assert_eq!(StatusReport::parse("STATUS_ÖN"), None);
    }

    #[test]
    fn inverse_command_turns_unknown_on() {
        assert_eq!(ToggleState::Unknown.inverse_command(), Command::On);
        assert_eq!(ToggleState::Off.inverse_command(), Command::On);
        assert_eq!(ToggleState::On.inverse_command(), Command::Off);
    }

    #[test]
    fn payloads_are_upper_case() {
        assert_eq!(Command::Status.as_payload(), "STATUS");
        assert_eq!(Command::On.to_string(), "ON");
        assert_eq!(Command::Off.to_string(), "OFF");
    }

    #[test]
    fn fresh_view_is_loading() {
        let view = ToggleView::default();
        assert!(view.loading);
        assert_eq!(view.state, ToggleState::Unknown);
        assert_eq!(view.pending, None);
    }
}
