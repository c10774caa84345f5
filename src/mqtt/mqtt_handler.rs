use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, Outgoing, Publish, QoS,
};
use statum::{machine, state};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::message_manager::MQTTMessage;
use crate::toggle::state::Command;

const REQUEST_CAPACITY: usize = 10;
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_ERROR_MESSAGES: usize = 20;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct MQTTStatus {
    pub connection_state: ConnectionState,
    /// Most recent transport errors, oldest first
    pub error_messages: Vec<String>,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<chrono::DateTime<chrono::Local>>,
}

impl MQTTStatus {
    fn record_error(&mut self, err: &TransportError) {
        if self.error_messages.len() == MAX_ERROR_MESSAGES {
            self.error_messages.remove(0);
        }
        self.error_messages.push(err.to_string());
    }
}

/// Transport failures. Logged and recorded in [`MQTTStatus`], never handed to
/// the controller.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Publish error: {0}")]
    PublishError(String),

    #[error("Subscribe error: {0}")]
    SubscribeError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),
}

#[state]
#[derive(Debug, Clone)]
pub enum LinkState {
    Disconnected, // Client built, event loop not running
    Connected,    // Event loop polling, subscription maintained
    Closed,       // DISCONNECT sent, event loop stopped
}

/// Single-topic MQTT adapter
///
/// Typestate lifecycle: `Disconnected ──connect──► Connected ──disconnect──► Closed`.
/// Commands can only be published while `Connected`.
#[machine]
pub struct MqttHandler<S: LinkState> {
    config: MqttConfig,
    client: AsyncClient,
    event_loop: Option<EventLoop>,
    status_tx: Arc<watch::Sender<MQTTStatus>>,
    cancel: CancellationToken,
    loop_handle: Option<JoinHandle<()>>,
}

impl<S: LinkState> MqttHandler<S> {
    pub fn status(&self) -> watch::Receiver<MQTTStatus> {
        self.status_tx.subscribe()
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }
}

impl MqttHandler<Disconnected> {
    pub fn create(config: MqttConfig) -> Self {
        let mqtt_options = config.mqtt_options();
        info!(
            "Creating MQTT client {} for {}:{}",
            mqtt_options.client_id(),
            config.host,
            config.port
        );

        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let (status_tx, _) = watch::channel(MQTTStatus::default());

        Self::new(
            config,
            client,
            Some(event_loop),
            Arc::new(status_tx),
            CancellationToken::new(),
            None,
        )
    }

    /// Starts the receive loop. Every publish on the configured topic is
    /// forwarded to `inbound` in delivery order.
    pub fn connect(
        mut self,
        inbound: mpsc::Sender<MQTTMessage>,
    ) -> Result<MqttHandler<Connected>, TransportError> {
        let event_loop = self.event_loop.take().ok_or_else(|| {
            TransportError::ConnectionError("event loop already taken".to_string())
        })?;

        self.status_tx
            .send_modify(|status| status.connection_state = ConnectionState::Connecting);

        let receive_loop = ReceiveLoop {
            client: self.client.clone(),
            topic: self.config.topic.clone(),
            reconnect_delay: self.config.reconnect_delay(),
            inbound,
            status_tx: self.status_tx.clone(),
            cancel: self.cancel.clone(),
        };
        self.loop_handle = Some(tokio::spawn(receive_loop.run(event_loop)));

        info!("MQTT receive loop started for topic {}", self.config.topic);
        Ok(self.transition())
    }
}

impl MqttHandler<Connected> {
    pub fn is_connected(&self) -> bool {
        self.status_tx.borrow().connection_state == ConnectionState::Connected
    }

    /// Fire-and-forget publish. Dropped with a warning while the link is down.
    pub fn publish(&self, command: Command) {
        if let Err(e) = self.try_publish(command) {
            warn!("{}", e);
            self.status_tx.send_modify(|status| status.record_error(&e));
        }
    }

    fn try_publish(&self, command: Command) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::PublishError(format!(
                "not connected, dropping {}",
                command
            )));
        }

        self.client
            .try_publish(
                self.config.topic.clone(),
                QoS::AtLeastOnce,
                false,
                command.as_payload(),
            )
            .map_err(|e| TransportError::PublishError(e.to_string()))?;

        debug!("Published {} to {}", command, self.config.topic);
        self.status_tx.send_modify(|status| {
            status.messages_sent += 1;
            status.last_activity = Some(chrono::Local::now());
        });
        Ok(())
    }

    /// Sends DISCONNECT if the link is up, then stops the receive loop.
    pub async fn disconnect(mut self) -> MqttHandler<Closed> {
        info!("Disconnecting from {}:{}", self.config.host, self.config.port);

        if self.is_connected() {
            if let Err(e) = self.client.try_disconnect() {
                warn!("Failed to queue DISCONNECT: {}", e);
            }
        } else {
            self.cancel.cancel();
        }

        if let Some(mut handle) = self.loop_handle.take() {
            match timeout(DISCONNECT_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => debug!("Receive loop finished"),
                Ok(Err(e)) => error!("Receive loop panicked: {}", e),
                Err(_) => {
                    warn!("Receive loop did not stop in time, cancelling");
                    self.cancel.cancel();
                    if let Err(e) = handle.await {
                        error!("Receive loop panicked: {}", e);
                    }
                }
            }
        }

        self.status_tx
            .send_modify(|status| status.connection_state = ConnectionState::Disconnected);
        info!("MQTT connection closed");
        self.transition()
    }
}

impl MqttHandler<Closed> {}

/// Builds the inbound message for a publish on `topic`, ignoring other topics
pub fn inbound_message(topic: &str, publish: &Publish) -> Option<MQTTMessage> {
    if publish.topic != topic {
        return None;
    }
    Some(MQTTMessage::from_payload(&publish.topic, &publish.payload))
}

struct ReceiveLoop {
    client: AsyncClient,
    topic: String,
    reconnect_delay: Duration,
    inbound: mpsc::Sender<MQTTMessage>,
    status_tx: Arc<watch::Sender<MQTTStatus>>,
    cancel: CancellationToken,
}

impl ReceiveLoop {
    async fn run(self, mut event_loop: EventLoop) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = event_loop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        info!("Connected to broker (session present: {})", ack.session_present);
                        self.set_state(ConnectionState::Connected);
                        self.subscribe();
                    } else {
                        self.fail(
                            ConnectionState::Failed,
                            TransportError::ConnectionError(format!("{:?}", ack.code)),
                        );
                    }
                }
                Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                    debug!("Subscription acknowledged: {:?}", ack.return_codes);
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => self.forward(&publish),
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("DISCONNECT sent, stopping receive loop");
                    break;
                }
                Ok(event) => debug!("MQTT event: {:?}", event),
                Err(e) => {
                    self.fail(
                        ConnectionState::Reconnecting,
                        TransportError::ConnectionError(e.to_string()),
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }
        info!("MQTT receive loop stopped");
    }

    // Clean sessions drop subscriptions, so this runs after every ConnAck
    fn subscribe(&self) {
        if let Err(e) = self.client.try_subscribe(self.topic.clone(), QoS::AtLeastOnce) {
            let err = TransportError::SubscribeError(e.to_string());
            error!("{}", err);
            self.status_tx.send_modify(|status| status.record_error(&err));
        } else {
            info!("Subscribing to {}", self.topic);
        }
    }

    fn forward(&self, publish: &Publish) {
        let Some(msg) = inbound_message(&self.topic, publish) else {
            debug!("Ignoring publish on {}", publish.topic);
            return;
        };

        self.status_tx.send_modify(|status| {
            status.messages_received += 1;
            status.last_activity = Some(chrono::Local::now());
        });

        if let Err(e) = self.inbound.try_send(msg) {
            let err = TransportError::ChannelError(e.to_string());
            warn!("Dropping inbound message: {}", err);
            self.status_tx.send_modify(|status| status.record_error(&err));
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.status_tx
            .send_modify(|status| status.connection_state = state);
    }

    fn fail(&self, state: ConnectionState, err: TransportError) {
        error!("{}", err);
        self.status_tx.send_modify(|status| {
            status.connection_state = state;
            status.record_error(&err);
        });
    }
}

/// Owns the transport for one session
///
/// Publishes every command arriving on the outbound channel until the channel
/// closes or the handle is shut down, then disconnects.
pub struct MQTTHandle {
    status_rx: watch::Receiver<MQTTStatus>,
    cancel: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl MQTTHandle {
    pub fn spawn(
        config: MqttConfig,
        mut outbound: mpsc::Receiver<Command>,
        inbound: mpsc::Sender<MQTTMessage>,
        cancel: CancellationToken,
    ) -> Result<Self, TransportError> {
        let handler = MqttHandler::create(config).connect(inbound)?;
        let status_rx = handler.status();
        info!("Transport ready, publishing commands to {}", handler.topic());
        let cancel = cancel.child_token();
        let stop = cancel.clone();

        let task_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    command = outbound.recv() => match command {
                        Some(command) => handler.publish(command),
                        None => {
                            debug!("Outbound channel closed");
                            break;
                        }
                    },
                }
            }
            handler.disconnect().await;
        });

        Ok(Self {
            status_rx,
            cancel,
            task_handle: Some(task_handle),
        })
    }

    pub fn status(&self) -> watch::Receiver<MQTTStatus> {
        self.status_rx.clone()
    }

    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.cancel.cancel();
        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| TransportError::ChannelError(format!("transport task failed: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> MqttConfig {
        MqttConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            reconnect_delay_ms: 10,
            ..MqttConfig::default()
        }
    }

    #[test]
    fn publishes_on_other_topics_are_ignored() {
        let topic = "esp32/light_control";
        let matching = Publish::new(topic, QoS::AtLeastOnce, "STATUS_ON");
        let other = Publish::new("esp32/other", QoS::AtLeastOnce, "STATUS_ON");

        let msg = inbound_message(topic, &matching).unwrap();
        assert_eq!(msg.content(), "STATUS_ON");
        assert!(inbound_message(topic, &other).is_none());
    }

    #[test]
    fn status_keeps_recent_errors_only() {
        let mut status = MQTTStatus::default();
        for i in 0..(MAX_ERROR_MESSAGES + 5) {
            status.record_error(&TransportError::PublishError(i.to_string()));
        }
        assert_eq!(status.error_messages.len(), MAX_ERROR_MESSAGES);
        assert_eq!(status.error_messages[0], "Publish error: 5");
    }

    #[tokio::test]
    async fn publish_without_connection_is_dropped() {
        let (inbound_tx, _inbound_rx) = mpsc::channel(4);
        let handler = MqttHandler::create(unreachable_config())
            .connect(inbound_tx)
            .unwrap();

        handler.publish(Command::Status);
        let status = handler.status().borrow().clone();
        assert_eq!(status.messages_sent, 0);
        assert!(status
            .error_messages
            .iter()
            .any(|e| e.starts_with("Publish error")));

        let closed = handler.disconnect().await;
        assert_eq!(
            closed.status().borrow().connection_state,
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn handle_stops_when_outbound_closes() {
        let (inbound_tx, _inbound_rx) = mpsc::channel(4);
        let (outbound_tx, outbound_rx) = mpsc::channel(4);
        let mut handle = MQTTHandle::spawn(
            unreachable_config(),
            outbound_rx,
            inbound_tx,
            CancellationToken::new(),
        )
        .unwrap();

        outbound_tx.send(Command::On).await.unwrap();
        drop(outbound_tx);
        handle.shutdown().await.unwrap();

        assert_eq!(handle.status().borrow().messages_sent, 0);
    }
}
