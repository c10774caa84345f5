//! Toggle Handle - session API for the toggle controller
//!
//! Spawns the controller task and gives the presentation layer a cheap way to
//! request toggles, read the current view and tear the session down.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::controller::{run_controller, ControllerRequest, ToggleController};
use super::state::{Command, ToggleView};
use crate::mqtt::message_manager::MQTTMessage;

/// Timing settings for a controller session
///
/// # Examples
///
/// ```toml
/// [controller]
/// debounce_ms = 1000
/// status_query_delay_ms = 1000
/// # re-send STATUS every 5s until the first reply
/// status_retry_interval_ms = 5000
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Minimum spacing between user commands; faster requests are dropped
    pub debounce_ms: u64,

    /// Delay before the initial STATUS query, lets the subscription settle
    pub status_query_delay_ms: u64,

    /// Re-send STATUS at this interval while still loading. Absent means the
    /// query is sent exactly once.
    pub status_retry_interval_ms: Option<u64>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            status_query_delay_ms: 1000,
            status_retry_interval_ms: None,
        }
    }
}

impl ControllerSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn status_query_delay(&self) -> Duration {
        Duration::from_millis(self.status_query_delay_ms)
    }

    pub fn status_retry_interval(&self) -> Option<Duration> {
        self.status_retry_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// Errors seen by callers of a [`ToggleHandle`]
///
/// The controller itself never fails; these only report that the session
/// is no longer there to talk to.
#[derive(Debug, thiserror::Error)]
pub enum ToggleError {
    #[error("Controller session closed")]
    SessionClosed,

    #[error("Controller task failed: {0}")]
    TaskError(String),
}

/// Handle for one controller session
pub struct ToggleHandle {
    request_tx: mpsc::Sender<ControllerRequest>,
    view_rx: watch::Receiver<ToggleView>,
    cancel: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl ToggleHandle {
    /// Spawns the controller task.
    ///
    /// # Arguments
    ///
    /// * `settings` - Optional timing settings; uses defaults if None
    /// * `inbound` - Messages received on the shared topic, in delivery order
    /// * `outbound` - Commands for the transport to publish
    /// * `cancel` - Session token; the controller stops once it is cancelled
    pub fn spawn(
        settings: Option<ControllerSettings>,
        inbound: mpsc::Receiver<MQTTMessage>,
        outbound: mpsc::Sender<Command>,
        cancel: CancellationToken,
    ) -> Self {
        let settings = settings.unwrap_or_default();
        info!("Initializing toggle controller with settings: {:?}", settings);

        let controller = ToggleController::new(&settings);
        let (view_tx, view_rx) = watch::channel(controller.view());
        let (request_tx, request_rx) = mpsc::channel(16);
        let cancel = cancel.child_token();

        let task_handle = tokio::spawn(run_controller(
            controller,
            settings,
            request_rx,
            inbound,
            outbound,
            view_tx,
            cancel.clone(),
        ));

        Self {
            request_tx,
            view_rx,
            cancel,
            task_handle: Some(task_handle),
        }
    }

    /// Asks the controller to flip the light.
    ///
    /// Returns the command that was published, or `None` if the request fell
    /// inside the debounce window.
    pub async fn request_toggle(&self) -> Result<Option<Command>, ToggleError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(ControllerRequest::Toggle { response_tx })
            .await
            .map_err(|_| ToggleError::SessionClosed)?;
        response_rx.await.map_err(|_| ToggleError::SessionClosed)
    }

    /// View after every already-delivered inbound message has been applied
    pub async fn current_view(&self) -> Result<ToggleView, ToggleError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(ControllerRequest::View { response_tx })
            .await
            .map_err(|_| ToggleError::SessionClosed)?;
        response_rx.await.map_err(|_| ToggleError::SessionClosed)
    }

    /// Last published view, without a round trip
    pub fn view(&self) -> ToggleView {
        *self.view_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ToggleView> {
        debug!("New subscriber to toggle view");
        self.view_rx.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.request_tx.is_closed()
    }

    /// Cancels the session and waits for the controller task to finish.
    ///
    /// After this returns the view no longer changes.
    pub async fn shutdown(&mut self) -> Result<(), ToggleError> {
        debug!("Cancelling toggle controller");
        self.cancel.cancel();

        match self.task_handle.take() {
            Some(handle) => match handle.await {
                Ok(()) => {
                    info!("Toggle controller shut down");
                    Ok(())
                }
                Err(e) => {
                    error!("Toggle controller task panicked: {}", e);
                    Err(ToggleError::TaskError(e.to_string()))
                }
            },
            None => {
                warn!("Toggle controller already shut down");
                Ok(())
            }
        }
    }
}
