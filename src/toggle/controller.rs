//! Toggle controller core and its serialized update loop
//!
//! All state lives in [`ToggleController`], owned by exactly one task. Inbound
//! status messages and user toggle requests reach that task through separate
//! channels and are handled one at a time, so no locking is needed.
//!
//! ```text
//! MqttHandler ─[MQTTMessage]─┐
//!                            ├─► run_controller ─[Command]─► MqttHandler
//! ToggleHandle ─[Request]────┘         │
//!                                      └─[ToggleView]─► presentation (watch)
//! ```

use std::future::pending;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::controller_handle::ControllerSettings;
use super::debounce::DebounceGuard;
use super::state::{Command, StatusReport, ToggleState, ToggleView};
use crate::mqtt::message_manager::MQTTMessage;

/// Requests accepted by the controller task
#[derive(Debug)]
pub enum ControllerRequest {
    /// User intent to flip the light. Answers with the emitted command,
    /// or `None` if the debounce window swallowed it.
    Toggle {
        response_tx: oneshot::Sender<Option<Command>>,
    },
    /// Current view, ordered after every inbound message already queued
    View {
        response_tx: oneshot::Sender<ToggleView>,
    },
}

/// Local view of the remote light plus the debounce window
#[derive(Debug, Clone)]
pub struct ToggleController {
    view: ToggleView,
    debounce: DebounceGuard,
}

impl ToggleController {
    /// Starts in the loading state with nothing known about the light
    pub fn new(settings: &ControllerSettings) -> Self {
        Self {
            view: ToggleView::default(),
            debounce: DebounceGuard::new(settings.debounce()),
        }
    }

    pub fn view(&self) -> ToggleView {
        self.view
    }

    pub fn state(&self) -> ToggleState {
        self.view.state
    }

    pub fn is_loading(&self) -> bool {
        self.view.loading
    }

    /// Applies a status report. Returns whether the view changed.
    ///
    /// Unrecognized payloads are dropped without error. A recognized report
    /// is authoritative: it overrides an optimistic state and clears the
    /// pending marker.
    pub fn on_message(&mut self, payload: &str) -> bool {
        let Some(report) = StatusReport::parse(payload) else {
            debug!("Ignoring payload {:?}", payload);
            return false;
        };

        let next = ToggleView {
            state: report.state(),
            loading: false,
            pending: None,
        };
        if let Some(command) = self.view.pending {
            if command.target_state() != Some(next.state) {
                warn!(
                    "Status {} contradicts pending command {}",
                    next.state, command
                );
            }
        }

        let changed = next != self.view;
        self.view = next;
        changed
    }

    /// Turns user intent into a command, or drops it inside the debounce window.
    ///
    /// The state flips optimistically to the command's target; the next status
    /// report confirms or corrects it. `loading` is cleared here too, which also
    /// ends any STATUS retry; the light switch screen this replaces kept its
    /// spinner until the first status report instead.
    pub fn request_toggle(&mut self, now: Instant) -> Option<Command> {
        if !self.debounce.try_accept(now) {
            debug!(
                "Toggle dropped, less than {:?} since last command",
                self.debounce.min_interval()
            );
            return None;
        }

        let command = self.view.state.inverse_command();
        if let Some(target) = command.target_state() {
            self.view.state = target;
        }
        self.view.loading = false;
        self.view.pending = Some(command);
        Some(command)
    }
}

/// Hands a command to the transport without waiting
fn emit(outbound: &mpsc::Sender<Command>, command: Command) {
    match outbound.try_send(command) {
        Ok(()) => debug!("Queued command {}", command),
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Outbound queue full, dropping command {}", command)
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!("Transport gone, dropping command {}", command)
        }
    }
}

async fn next_retry(retry: &mut Option<Interval>) {
    match retry {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}

/// Serialized update loop for one controller session.
///
/// Sends the deferred STATUS query once, re-sends it while loading if a retry
/// interval is configured, and applies inbound messages and toggle requests in
/// arrival order. Cancellation is checked before any other work, so nothing
/// queued before teardown mutates the view afterwards.
pub async fn run_controller(
    mut controller: ToggleController,
    settings: ControllerSettings,
    mut requests: mpsc::Receiver<ControllerRequest>,
    mut inbound: mpsc::Receiver<MQTTMessage>,
    outbound: mpsc::Sender<Command>,
    view_tx: watch::Sender<ToggleView>,
    cancel: CancellationToken,
) {
    info!("Toggle controller started, state {}", controller.state());

    let query_deadline = Instant::now() + settings.status_query_delay();
    let status_query = sleep(settings.status_query_delay());
    tokio::pin!(status_query);
    let mut query_sent = false;

    let mut retry = settings.status_retry_interval().map(|period| {
        let mut interval = interval_at(query_deadline + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    let mut inbound_open = true;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("Toggle controller cancelled");
                break;
            }

            _ = &mut status_query, if !query_sent => {
                query_sent = true;
                info!("Querying current light status");
                emit(&outbound, Command::Status);
            }

            _ = next_retry(&mut retry), if query_sent && controller.is_loading() => {
                info!("No status reply yet, querying again");
                emit(&outbound, Command::Status);
            }

            msg = inbound.recv(), if inbound_open => match msg {
                Some(msg) => {
                    debug!("Inbound {}", msg.render());
                    if controller.on_message(msg.content()) {
                        info!("Light is {}", controller.state());
                        view_tx.send_replace(controller.view());
                    }
                }
                None => {
                    warn!("Inbound message channel closed, status updates stop");
                    inbound_open = false;
                }
            },

            request = requests.recv() => match request {
                Some(ControllerRequest::Toggle { response_tx }) => {
                    let command = controller.request_toggle(Instant::now());
                    if let Some(command) = command {
                        info!("Sending {} command", command);
                        emit(&outbound, command);
                        view_tx.send_replace(controller.view());
                    }
                    if response_tx.send(command).is_err() {
                        debug!("Toggle requester went away");
                    }
                }
                Some(ControllerRequest::View { response_tx }) => {
                    let _ = response_tx.send(controller.view());
                }
                None => {
                    info!("All controller handles dropped");
                    break;
                }
            },
        }
    }

    info!("Toggle controller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn controller() -> ToggleController {
        ToggleController::new(&ControllerSettings::default())
    }

    #[test]
    fn starts_loading_with_unknown_state() {
        let ctrl = controller();
        assert!(ctrl.is_loading());
        assert_eq!(ctrl.state(), ToggleState::Unknown);
    }

    #[test]
    fn unrecognized_payloads_change_nothing() {
        let mut ctrl = controller();
        for payload in ["STATUS", "ON", "OFF", "hello", "", "STATUS ON"] {
            assert!(!ctrl.on_message(payload));
            assert_eq!(ctrl.view(), ToggleView::default());
        }

        ctrl.on_message("STATUS_ON");
        let before = ctrl.view();
        assert!(!ctrl.on_message("garbage"));
        assert_eq!(ctrl.view(), before);
    }

    #[test]
    fn status_messages_match_any_case() {
        for payload in ["status_on", "STATUS_ON", "Status_On"] {
            let mut ctrl = controller();
            assert!(ctrl.on_message(payload));
            assert_eq!(ctrl.state(), ToggleState::On);
            assert!(!ctrl.is_loading());
        }
    }

    #[test]
    fn repeated_status_is_idempotent() {
        let mut ctrl = controller();
        assert!(ctrl.on_message("STATUS_OFF"));
        let once = ctrl.view();
        assert!(!ctrl.on_message("STATUS_OFF"));
        assert_eq!(ctrl.view(), once);
        assert_eq!(once.state, ToggleState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_sends_inverse_and_flips_optimistically() {
        let mut ctrl = controller();
        ctrl.on_message("STATUS_OFF");

        assert_eq!(ctrl.request_toggle(Instant::now()), Some(Command::On));
        let view = ctrl.view();
        assert_eq!(view.state, ToggleState::On);
        assert_eq!(view.pending, Some(Command::On));
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_from_unknown_turns_on() {
        let mut ctrl = controller();
        assert_eq!(ctrl.request_toggle(Instant::now()), Some(Command::On));
        assert!(!ctrl.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_toggles_are_debounced() {
        let mut ctrl = controller();
        ctrl.on_message("STATUS_OFF");
        let start = Instant::now();

        assert_eq!(ctrl.request_toggle(start), Some(Command::On));
        assert_eq!(ctrl.request_toggle(start + Duration::from_millis(500)), None);
        assert_eq!(ctrl.state(), ToggleState::On);
        assert_eq!(
            ctrl.request_toggle(start + Duration::from_millis(1000)),
            Some(Command::Off)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn status_report_overrides_optimistic_state() {
        let mut ctrl = controller();
        ctrl.on_message("STATUS_OFF");
        ctrl.request_toggle(Instant::now());
        assert_eq!(ctrl.state(), ToggleState::On);

        assert!(ctrl.on_message("STATUS_OFF"));
        let view = ctrl.view();
        assert_eq!(view.state, ToggleState::Off);
        assert_eq!(view.pending, None);
    }

    #[tokio::test(start_paused = true)]
    async fn confirming_status_clears_pending() {
        let mut ctrl = controller();
        ctrl.on_message("STATUS_OFF");
        ctrl.request_toggle(Instant::now());

        assert!(ctrl.on_message("STATUS_ON"));
        assert_eq!(ctrl.view().pending, None);
        assert_eq!(ctrl.state(), ToggleState::On);
    }
}
