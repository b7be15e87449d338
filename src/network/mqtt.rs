//! MQTT transport
//!
//! Runs the rumqttc event loop as a tokio task. Publishes on the sensor's
//! topics are forwarded to the ingest thread through a bounded channel; when
//! the ingest side falls behind, new messages are dropped rather than
//! stalling the event loop (and with it keep-alives and control publishes).

use bytes::Bytes;
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::MqttConfig;
use crate::error::{ControlError, NetworkError};
use crate::network::transport::{InboundMessage, Publisher};
use crate::protocol::Topics;

/// Delay before polling again after a connection error
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Publisher half of the MQTT client
pub struct MqttPublisher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl Publisher for MqttPublisher {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn try_publish(&self, topic: &str, payload: Bytes) -> Result<(), ControlError> {
        if !self.is_connected() {
            return Err(ControlError::NotConnected);
        }
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|_| ControlError::Busy)
    }
}

/// Running MQTT connection
pub struct MqttTransport {
    publisher: Arc<MqttPublisher>,
    inbound_dropped: Arc<AtomicU64>,
    last_error: Arc<Mutex<Option<NetworkError>>>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MqttTransport {
    /// Start the event loop; must be called inside a tokio runtime
    ///
    /// Connection happens in the background; use
    /// [`Publisher::is_connected`] to observe it.
    pub fn start(config: &MqttConfig, topics: Topics, inbound_tx: Sender<InboundMessage>) -> Self {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("sensor-receiver-{}", uuid::Uuid::new_v4().simple()));

        let mut options = MqttOptions::new(client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(user.clone(), password.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(options, config.outbound_capacity);
        let connected = Arc::new(AtomicBool::new(false));
        let inbound_dropped = Arc::new(AtomicU64::new(0));
        let last_error = Arc::new(Mutex::new(None));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        tracing::info!(
            "Connecting to MQTT broker {}:{} as {}",
            config.host,
            config.port,
            client_id
        );

        let task_client = client.clone();
        let task_connected = connected.clone();
        let task_dropped = inbound_dropped.clone();
        let task_error = last_error.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    event = eventloop.poll() => match event {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            if ack.code == ConnectReturnCode::Success {
                                task_connected.store(true, Ordering::SeqCst);
                                *task_error.lock() = None;
                                tracing::info!("MQTT connected");
                                // Subscriptions do not survive a clean session
                                for topic in topics.inbound() {
                                    if let Err(e) = task_client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                                        tracing::error!("Failed to subscribe to {}: {}", topic, e);
                                        *task_error.lock() =
                                            Some(NetworkError::SubscribeFailed(format!("{}: {}", topic, e)));
                                    } else {
                                        tracing::info!("Subscribed to {}", topic);
                                    }
                                }
                            } else {
                                tracing::error!("MQTT connection refused: {:?}", ack.code);
                                *task_error.lock() =
                                    Some(NetworkError::ConnectionFailed(format!("refused: {:?}", ack.code)));
                            }
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            let message = InboundMessage::new(publish.topic, publish.payload);
                            match inbound_tx.try_send(message) {
                                Ok(()) => {}
                                Err(TrySendError::Full(_)) => {
                                    task_dropped.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(TrySendError::Disconnected(_)) => break,
                            }
                        }
                        Ok(Event::Incoming(Packet::Disconnect)) => {
                            task_connected.store(false, Ordering::SeqCst);
                            tracing::warn!("MQTT broker closed the session");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            if task_connected.swap(false, Ordering::SeqCst) {
                                tracing::warn!("MQTT connection lost: {}", e);
                            } else {
                                tracing::warn!("MQTT connection failed: {}", e);
                            }
                            *task_error.lock() = Some(NetworkError::ConnectionFailed(e.to_string()));
                            tokio::select! {
                                _ = shutdown_rx.changed() => break,
                                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                            }
                        }
                    },
                }
            }
            task_connected.store(false, Ordering::SeqCst);
            tracing::info!("MQTT event loop stopped");
        });

        Self {
            publisher: Arc::new(MqttPublisher { client, connected }),
            inbound_dropped,
            last_error,
            shutdown_tx,
            handle,
        }
    }

    pub fn publisher(&self) -> Arc<MqttPublisher> {
        self.publisher.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.publisher.is_connected()
    }

    /// Inbound messages dropped because the ingest queue was full
    pub fn inbound_dropped(&self) -> u64 {
        self.inbound_dropped.load(Ordering::Relaxed)
    }

    /// Most recent connection or subscription failure, cleared on reconnect
    pub fn last_error(&self) -> Option<NetworkError> {
        self.last_error.lock().clone()
    }

    /// Disconnect and stop the event loop, waiting at most `timeout`
    pub async fn shutdown(self, timeout: Duration) {
        let _ = self.publisher.client.try_disconnect();
        let _ = self.shutdown_tx.send(true);
        if tokio::time::timeout(timeout, self.handle).await.is_err() {
            tracing::warn!("MQTT event loop did not stop within {:?}", timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[tokio::test]
    async fn test_unreachable_broker_reports_connection_failure() {
        let config = MqttConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..MqttConfig::default()
        };
        let (tx, _rx) = bounded(8);
        let transport = MqttTransport::start(&config, Topics::new("esp32/audio"), tx);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while transport.last_error().is_none() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(matches!(
            transport.last_error(),
            Some(NetworkError::ConnectionFailed(_))
        ));
        assert!(!transport.is_connected());
        transport.shutdown(Duration::from_secs(1)).await;
    }
}
