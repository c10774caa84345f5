use std::time::Duration;
use tokio::time::Instant;

/// Minimum spacing between user-initiated commands.
///
/// Requests arriving inside the window are dropped, not queued. Uses tokio's
/// clock so paused-time tests can drive it.
#[derive(Debug, Clone)]
pub struct DebounceGuard {
    min_interval: Duration,
    last_command: Option<Instant>,
}

impl DebounceGuard {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_command: None,
        }
    }

    /// Returns true and records `now` if the window since the last accepted
    /// command has elapsed.
    pub fn try_accept(&mut self, now: Instant) -> bool {
        match self.last_command {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => false,
            _ => {
                self.last_command = Some(now);
                true
            }
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_command_always_passes() {
        let mut guard = DebounceGuard::new(Duration::from_millis(1000));
        assert!(guard.try_accept(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn commands_inside_window_are_dropped() {
        let mut guard = DebounceGuard::new(Duration::from_millis(1000));
        let start = Instant::now();
        assert!(guard.try_accept(start));
        assert!(!guard.try_accept(start + Duration::from_millis(500)));
        assert!(!guard.try_accept(start + Duration::from_millis(999)));
        assert!(guard.try_accept(start + Duration::from_millis(1000)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_commands_do_not_extend_window() {
        let mut guard = DebounceGuard::new(Duration::from_millis(1000));
        let start = Instant::now();
        assert!(guard.try_accept(start));
        assert!(!guard.try_accept(start + Duration::from_millis(900)));
        assert!(guard.try_accept(start + Duration::from_millis(1100)));
    }
}
