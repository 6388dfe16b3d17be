// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory transport for integration tests.
//!
//! [`MockBroker`] plays the broker side of the [`Transport`] contract:
//! tests inject inbound messages, script connect failures and
//! disconnects, and inspect everything the application publishes.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use icsia_lib::{
    AppConfig, AppHandle, MqttApplication, QoS, Transport, TransportError, TransportEvent,
    TransportPublisher,
};

/// A message the application published through the mock transport.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishedMessage {
    /// The payload parsed as JSON.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).expect("published payload is not JSON")
    }

    /// The payload as a string.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<String>>,
    event_tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    connect_failures: AtomicUsize,
    publish_failures: AtomicUsize,
    connects: AtomicUsize,
}

/// The broker side of the mock transport.
#[derive(Debug, Clone, Default)]
pub struct MockBroker {
    state: Arc<BrokerState>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport wired to this broker, for `MqttApplication::with_transport`.
    pub fn transport(&self) -> MockTransport {
        MockTransport {
            state: Arc::clone(&self.state),
            event_rx: None,
        }
    }

    /// Makes the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.state.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` publish attempts fail.
    pub fn fail_next_publishes(&self, n: usize) {
        self.state.publish_failures.store(n, Ordering::SeqCst);
    }

    /// Delivers an inbound message to the application, if connected.
    pub fn inject(&self, topic: &str, payload: &[u8]) {
        let event = TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            properties: None,
        };
        if let Some(tx) = self.state.event_tx.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Simulates losing the broker session.
    pub fn drop_connection(&self) {
        if let Some(tx) = self.state.event_tx.lock().take() {
            let _ = tx.send(TransportEvent::Disconnected);
        }
    }

    /// Everything published so far, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.published.lock().clone()
    }

    /// Messages published on one topic, in publish order.
    pub fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.state
            .published
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Every subscribe call seen, including replays.
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.subscriptions.lock().clone()
    }

    /// Number of successful connects.
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Polls `pred` until it holds or `timeout` expires.
    pub async fn wait_until<F>(&self, mut pred: F, timeout: Duration) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if pred() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        pred()
    }

    /// Waits until at least `count` messages were published on `topic`.
    pub async fn wait_published_on(&self, topic: &str, count: usize) -> Vec<PublishedMessage> {
        let ok = self
            .wait_until(|| self.published_on(topic).len() >= count, Duration::from_secs(5))
            .await;
        assert!(
            ok,
            "timed out waiting for {count} messages on '{topic}'; saw {:?}",
            self.published()
                .iter()
                .map(|m| m.topic.clone())
                .collect::<Vec<_>>()
        );
        self.published_on(topic)
    }
}

/// The application side of the mock transport.
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<BrokerState>,
    event_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl Transport for MockTransport {
    type Publisher = MockPublisher;

    async fn connect(&mut self) -> Result<MockPublisher, TransportError> {
        let failures = self.state.connect_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.state
                .connect_failures
                .store(failures - 1, Ordering::SeqCst);
            return Err(TransportError::ConnectionFailed(
                "scripted connect failure".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.state.event_tx.lock() = Some(tx);
        self.event_rx = Some(rx);
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockPublisher {
            state: Arc::clone(&self.state),
        })
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        match &mut self.event_rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    async fn disconnect(&mut self) {
        *self.state.event_tx.lock() = None;
        self.event_rx = None;
    }
}

/// Publish/subscribe handle of the mock transport.
#[derive(Debug, Clone)]
pub struct MockPublisher {
    state: Arc<BrokerState>,
}

impl TransportPublisher for MockPublisher {
    async fn subscribe(&self, filter: &str, _qos: QoS) -> Result<(), TransportError> {
        self.state.subscriptions.lock().push(filter.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        let failures = self.state.publish_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.state
                .publish_failures
                .store(failures - 1, Ordering::SeqCst);
            return Err(TransportError::ConnectionFailed(
                "scripted publish failure".to_string(),
            ));
        }
        self.state.published.lock().push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }
}

/// A running application under test.
pub struct TestApp {
    pub broker: MockBroker,
    pub handle: AppHandle,
    task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Requests shutdown and waits for `run()` to return.
    pub async fn shutdown(self) {
        self.handle.shutdown();
        let _ = self.task.await;
    }
}

/// Builds an application over a fresh mock broker, applies `setup`
/// (command/callback registration), runs it, and waits for the first
/// connect.
pub async fn start_app<F>(config: AppConfig, setup: F) -> TestApp
where
    F: FnOnce(&MqttApplication<MockTransport>),
{
    let broker = MockBroker::new();
    let mut app =
        MqttApplication::with_transport(config, broker.transport()).expect("valid test config");
    setup(&app);
    let handle = app.handle();

    let task = tokio::spawn(async move {
        app.run().await.expect("run() failed");
    });

    let connected = broker
        .wait_until(|| handle.is_connected(), Duration::from_secs(5))
        .await;
    assert!(connected, "application never connected");

    TestApp {
        broker,
        handle,
        task,
    }
}

/// A motor-controller style configuration with test-friendly timings.
pub fn motor_config() -> AppConfig {
    AppConfig::from_yaml_str(
        r#"
namespace: icsia
device:
  device_id: motor_01
mqtt:
  broker: mock
  reconnect_interval: 0.01
  throttle_interval: 0.001
status:
  publish_interval: 60.0
  payload:
    current_position: {x: 0.0, y: 0.0, z: 0.0}
    speed: 100
    moving: false
commands:
  move:
    target_position: {x: 0.0, y: 0.0, z: 0.0}
    speed: {default: 100}
    mode: "absolute"
  stop: {}
"#,
    )
    .expect("test config is valid")
}
