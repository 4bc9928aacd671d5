//! Mock protocol link and factory
//!
//! [`MockLinkFactory`] stands in for the rumqttc adapter in tests. Every
//! opened [`MockLink`] records the calls made against it, failures can be
//! scripted per operation, and the captured event sender lets tests drive
//! the session through arbitrary [`LinkEvent`] sequences.

use crate::config::{ConnectionOptions, ProtocolVersion, QosLevel};
use crate::transport::{
    LinkError, LinkEvent, LinkFactory, Mqtt5PublishProperties, ProtocolLink, SubscribeOptions,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One recorded call against a [`MockLink`].
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Subscribe(SubscribeOptions),
    Unsubscribe(String),
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
        has_properties: bool,
    },
    Shutdown {
        force: bool,
    },
}

/// Scriptable in-memory protocol link.
#[derive(Debug, Default)]
pub struct MockLink {
    version: ProtocolVersion,
    calls: Mutex<Vec<MockCall>>,
    fail_subscribe: Mutex<Option<String>>,
    fail_unsubscribe: Mutex<Option<String>>,
    fail_publish: Mutex<Option<String>>,
}

impl MockLink {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        locked(&self.calls).clone()
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::Subscribe(options) => Some(options.topic),
                _ => None,
            })
            .collect()
    }

    pub fn shutdown_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, MockCall::Shutdown { .. }))
            .count()
    }

    /// Make the next and all following subscribe calls fail.
    pub fn fail_subscribe_with(&self, reason: impl Into<String>) {
        *locked(&self.fail_subscribe) = Some(reason.into());
    }

    pub fn fail_unsubscribe_with(&self, reason: impl Into<String>) {
        *locked(&self.fail_unsubscribe) = Some(reason.into());
    }

    pub fn fail_publish_with(&self, reason: impl Into<String>) {
        *locked(&self.fail_publish) = Some(reason.into());
    }
}

#[async_trait]
impl ProtocolLink for MockLink {
    async fn subscribe(&self, options: &SubscribeOptions) -> Result<(), LinkError> {
        locked(&self.calls).push(MockCall::Subscribe(options.clone()));
        match locked(&self.fail_subscribe).clone() {
            Some(reason) => Err(LinkError::SubscribeFailed(reason)),
            None => Ok(()),
        }
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), LinkError> {
        locked(&self.calls).push(MockCall::Unsubscribe(topic.to_string()));
        match locked(&self.fail_unsubscribe).clone() {
            Some(reason) => Err(LinkError::UnsubscribeFailed(reason)),
            None => Ok(()),
        }
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
        properties: Option<&Mqtt5PublishProperties>,
    ) -> Result<(), LinkError> {
        locked(&self.calls).push(MockCall::Publish {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
            has_properties: properties.is_some(),
        });
        match locked(&self.fail_publish).clone() {
            Some(reason) => Err(LinkError::PublishFailed(reason)),
            None => Ok(()),
        }
    }

    async fn shutdown(&self, force: bool) -> Result<(), LinkError> {
        locked(&self.calls).push(MockCall::Shutdown { force });
        Ok(())
    }

    fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }
}

/// Factory handing out [`MockLink`]s and capturing their event senders.
#[derive(Debug, Default)]
pub struct MockLinkFactory {
    opened: AtomicUsize,
    fail_open: AtomicBool,
    announce_connected: AtomicBool,
    last_link: Mutex<Option<Arc<MockLink>>>,
    last_events: Mutex<Option<mpsc::Sender<LinkEvent>>>,
}

impl MockLinkFactory {
    /// A factory whose links immediately report a fresh connection.
    pub fn connecting() -> Self {
        let factory = Self::default();
        factory.announce_connected.store(true, Ordering::SeqCst);
        factory
    }

    /// Make the next open attempt fail.
    pub fn fail_next_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// The most recently opened link.
    pub fn last_link(&self) -> Option<Arc<MockLink>> {
        locked(&self.last_link).clone()
    }

    /// Event sender of the most recently opened link, for driving the
    /// session from a test.
    pub fn event_sender(&self) -> Option<mpsc::Sender<LinkEvent>> {
        locked(&self.last_events).clone()
    }
}

#[async_trait]
impl LinkFactory for MockLinkFactory {
    async fn open(
        &self,
        options: &ConnectionOptions,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Arc<dyn ProtocolLink>, LinkError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.swap(false, Ordering::SeqCst) {
            return Err(LinkError::ConnectFailed("scripted open failure".to_string()));
        }

        let link = Arc::new(MockLink::new(options.version));
        *locked(&self.last_link) = Some(link.clone());
        *locked(&self.last_events) = Some(events.clone());

        if self.announce_connected.load(Ordering::SeqCst) {
            let _ = events
                .send(LinkEvent::Connected {
                    session_present: false,
                })
                .await;
        }

        Ok(link)
    }
}
