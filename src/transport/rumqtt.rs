// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `rumqttc`-backed transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{QoS, Transport, TransportEvent, TransportPublisher};
use crate::config::MqttSettings;
use crate::error::TransportError;

/// Global counter for generating unique client IDs.
static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Buffered events between the rumqttc event loop and the supervisor.
const EVENT_CHANNEL_CAPACITY: usize = 256;

fn map_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
    }
}

/// MQTT transport backed by [`rumqttc`].
///
/// Each `connect` builds a fresh client and event loop and spawns a pump
/// task that forwards broker events into the session's event channel.
/// The pump exits when the event loop errors, which surfaces as a
/// [`TransportEvent::Disconnected`] to the supervisor.
#[derive(Debug)]
pub struct RumqttTransport {
    settings: MqttSettings,
    client: Option<AsyncClient>,
    event_rx: Option<mpsc::Receiver<TransportEvent>>,
    pump: Option<JoinHandle<()>>,
}

impl RumqttTransport {
    /// Creates a transport from broker settings. No I/O happens until
    /// `connect`.
    #[must_use]
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            client: None,
            event_rx: None,
            pump: None,
        }
    }

    fn mqtt_options(&self) -> MqttOptions {
        let client_id = self.settings.client_id.clone().unwrap_or_else(|| {
            let counter = CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
            format!("icsia_{}_{}", std::process::id(), counter)
        });

        let mut options = MqttOptions::new(client_id, &self.settings.broker, self.settings.port);
        options.set_keep_alive(Duration::from_secs_f64(self.settings.keep_alive));
        options.set_clean_session(true);
        if let (Some(username), Some(password)) =
            (&self.settings.username, &self.settings.password)
        {
            options.set_credentials(username, password);
        }
        options
    }

    fn teardown(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.client = None;
        self.event_rx = None;
    }
}

impl Transport for RumqttTransport {
    type Publisher = RumqttPublisher;

    async fn connect(&mut self) -> Result<RumqttPublisher, TransportError> {
        self.teardown();

        let (client, event_loop) = AsyncClient::new(self.mqtt_options(), 64);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (connack_tx, connack_rx) = oneshot::channel();

        let pump = tokio::spawn(run_event_pump(event_loop, event_tx, connack_tx));

        let timeout = Duration::from_secs_f64(self.settings.connect_timeout);
        match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(())) => {
                tracing::info!(
                    broker = %self.settings.broker,
                    port = self.settings.port,
                    "connected to MQTT broker"
                );
            }
            Ok(Err(_)) => {
                pump.abort();
                return Err(TransportError::ConnectionFailed(
                    "MQTT event loop terminated before ConnAck".to_string(),
                ));
            }
            Err(_) => {
                pump.abort();
                return Err(TransportError::Timeout(timeout.as_secs()));
            }
        }

        self.client = Some(client.clone());
        self.event_rx = Some(event_rx);
        self.pump = Some(pump);

        Ok(RumqttPublisher { client })
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        match &mut self.event_rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    async fn disconnect(&mut self) {
        if let Some(client) = &self.client
            && let Err(e) = client.disconnect().await
        {
            tracing::debug!(error = %e, "MQTT disconnect failed");
        }
        self.teardown();
    }
}

/// Publish/subscribe handle for an established rumqttc session.
#[derive(Debug, Clone)]
pub struct RumqttPublisher {
    client: AsyncClient,
}

impl TransportPublisher for RumqttPublisher {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), TransportError> {
        self.client
            .subscribe(filter, map_qos(qos))
            .await
            .map_err(TransportError::Mqtt)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.client
            .publish(topic, map_qos(qos), retain, payload)
            .await
            .map_err(TransportError::Mqtt)
    }
}

/// Forwards rumqttc events into the session channel.
async fn run_event_pump(
    mut event_loop: EventLoop,
    event_tx: mpsc::Sender<TransportEvent>,
    connack_tx: oneshot::Sender<()>,
) {
    let mut connack_tx = Some(connack_tx);

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT session acknowledged");
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(());
                }
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::trace!(topic = %publish.topic, len = publish.payload.len(), "MQTT message received");
                let event = TransportEvent::Message {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                    properties: None,
                };
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("MQTT broker closed the connection");
                let _ = event_tx.send(TransportEvent::Disconnected).await;
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "MQTT event loop error");
                let _ = event_tx.send(TransportEvent::Disconnected).await;
                break;
            }
        }
    }
}
