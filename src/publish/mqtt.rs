//! MQTT publish sink on `rumqttc`.
//!
//! [`connect`] returns the sink, which the station owns, and the [`MqttConnection`] whose
//! event loop must run as a task of its own. They share connection state through atomics.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};

use super::{PublishError, PublishSink};
use crate::config::MqttConfig;

const REQUEST_CAPACITY: usize = 32;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct SessionState {
    connected: AtomicBool,
    sessions: AtomicU64,
}

pub struct MqttSink {
    client: AsyncClient,
    state: Arc<SessionState>,
}

pub struct MqttConnection {
    eventloop: EventLoop,
    state: Arc<SessionState>,
}

pub fn connect(config: &MqttConfig) -> (MqttSink, MqttConnection) {
    let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
        options.set_credentials(username, config.password.clone().unwrap_or_default());
    }

    let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    let state = Arc::new(SessionState::default());
    info!("MQTT broker {}:{} as {}", config.host, config.port, config.client_id);
    (
        MqttSink {
            client,
            state: Arc::clone(&state),
        },
        MqttConnection { eventloop, state },
    )
}

impl PublishSink for MqttSink {
    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), PublishError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload.as_bytes().to_vec())
            .map_err(|e| PublishError::Rejected {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Relaxed)
    }

    fn session(&self) -> u64 {
        self.state.sessions.load(Ordering::Relaxed)
    }
}

impl MqttConnection {
    /// Drive the event loop forever. rumqttc reconnects on the next poll after an error.
    pub async fn run(mut self) {
        loop {
            self.poll().await;
        }
    }

    /// Handle one event. Errors back off before returning so a dead broker does not spin.
    async fn poll(&mut self) {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                self.state.connected.store(true, Ordering::Relaxed);
                let session = self.state.sessions.fetch_add(1, Ordering::Relaxed) + 1;
                info!("MQTT connected (session {})", session);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                self.state.connected.store(false, Ordering::Relaxed);
                warn!("MQTT broker closed the session");
            }
            Ok(_) => {}
            Err(e) => {
                if self.state.connected.swap(false, Ordering::Relaxed) {
                    warn!("MQTT connection lost: {}", e);
                } else {
                    debug!("MQTT connect failed: {}", e);
                }
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }
    }
}
