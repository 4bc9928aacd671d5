//! Protocol client adapter layer
//!
//! The session manager never talks to `rumqttc` directly; it drives a
//! [`ProtocolLink`] obtained from a [`LinkFactory`] and consumes the
//! [`LinkEvent`] stream the link feeds back. This is the seam used for
//! dependency injection in tests.

use crate::config::{ConnectionOptions, ProtocolVersion, QosLevel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod rumqtt;

pub use rumqtt::RumqttLinkFactory;

/// MQTT 5 subscribe options carried alongside the topic filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mqtt5SubscribeOptions {
    #[serde(default)]
    pub no_local: bool,
    #[serde(default)]
    pub retain_as_published: bool,
    /// Retain handling 0/1/2 per the MQTT 5 specification.
    #[serde(default)]
    pub retain_handling: u8,
}

/// Subscribe request as issued by the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeOptions {
    pub topic: String,
    #[serde(default)]
    pub qos: QosLevel,
    /// Display alias shown instead of the topic filter.
    #[serde(default)]
    pub alias: Option<String>,
    /// Display color; assigned from the palette when absent.
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub mqtt5: Option<Mqtt5SubscribeOptions>,
}

impl SubscribeOptions {
    pub fn new(topic: impl Into<String>, qos: QosLevel) -> Self {
        Self {
            topic: topic.into(),
            qos,
            alias: None,
            color: None,
            mqtt5: None,
        }
    }

    pub fn validate(&self) -> Result<(), LinkError> {
        if let Some(mqtt5) = &self.mqtt5 {
            if mqtt5.retain_handling > 2 {
                return Err(LinkError::InvalidOptions(format!(
                    "retain handling must be 0, 1 or 2, got {}",
                    mqtt5.retain_handling
                )));
            }
        }
        Ok(())
    }
}

/// MQTT 5 publish properties; `correlation_data` is base64 text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mqtt5PublishProperties {
    #[serde(default)]
    pub payload_format_indicator: Option<bool>,
    #[serde(default)]
    pub message_expiry_interval: Option<u32>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub response_topic: Option<String>,
    #[serde(default)]
    pub correlation_data: Option<String>,
    #[serde(default)]
    pub user_properties: Vec<(String, String)>,
}

/// Lifecycle and delivery events a link reports back to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// CONNACK accepted; the connection is live.
    Connected { session_present: bool },
    /// Connection-level error; the transport may still retry on its own.
    Error { reason: String },
    /// The transport started a reconnect cycle.
    Reconnecting,
    /// The transport connection closed.
    Closed,
    /// The transport went offline (no route to broker).
    Offline,
    /// The link was shut down and will emit nothing further.
    Ended,
    /// Inbound PUBLISH delivery.
    Message {
        topic: String,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
    },
}

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to open connection: {0}")]
    ConnectFailed(String),
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("unsubscribe failed: {0}")]
    UnsubscribeFailed(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("timed out waiting for broker acknowledgment")]
    AckTimeout,
    #[error("link is closed")]
    Closed,
    #[error("invalid connection options: {0}")]
    InvalidOptions(String),
}

/// One live protocol-client handle.
///
/// `subscribe` and `unsubscribe` complete on broker acknowledgment with
/// validated return codes; `publish` completes when the client accepts the
/// packet for delivery.
#[async_trait]
pub trait ProtocolLink: Send + Sync {
    async fn subscribe(&self, options: &SubscribeOptions) -> Result<(), LinkError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), LinkError>;

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
        properties: Option<&Mqtt5PublishProperties>,
    ) -> Result<(), LinkError>;

    /// Close the connection. `force` skips the graceful DISCONNECT.
    async fn shutdown(&self, force: bool) -> Result<(), LinkError>;

    /// Protocol version this link speaks.
    fn protocol_version(&self) -> ProtocolVersion;
}

/// Factory producing one fresh link per connect attempt.
#[async_trait]
pub trait LinkFactory: Send + Sync {
    async fn open(
        &self,
        options: &ConnectionOptions,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Arc<dyn ProtocolLink>, LinkError>;
}

/// Validate SubAck/UnsubAck reason codes; values >= 0x80 are failures.
pub(crate) fn validate_ack_codes(codes: &[u8]) -> Result<(), LinkError> {
    if codes.iter().any(|&code| code >= 0x80) {
        Err(LinkError::SubscribeFailed(format!(
            "broker rejected request with reason codes {codes:?}"
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ack_codes() {
        assert!(validate_ack_codes(&[0x00, 0x01, 0x02]).is_ok());
        assert!(validate_ack_codes(&[0x80]).is_err());
        assert!(validate_ack_codes(&[0x01, 0x87]).is_err());
        assert!(validate_ack_codes(&[]).is_ok());
    }

    #[test]
    fn test_subscribe_options_defaults() {
        let options = SubscribeOptions::new("sensors/#", QosLevel::AtLeastOnce);
        assert_eq!(options.topic, "sensors/#");
        assert!(options.alias.is_none());
        assert!(options.mqtt5.is_none());
    }

    #[test]
    fn test_retain_handling_out_of_range_is_rejected() {
        let mut options = SubscribeOptions::new("sensors/#", QosLevel::AtMostOnce);
        assert!(options.validate().is_ok());

        for retain_handling in 0..=2 {
            options.mqtt5 = Some(Mqtt5SubscribeOptions {
                retain_handling,
                ..Default::default()
            });
            assert!(options.validate().is_ok());
        }

        options.mqtt5 = Some(Mqtt5SubscribeOptions {
            retain_handling: 3,
            ..Default::default()
        });
        assert!(matches!(
            options.validate(),
            Err(LinkError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_link_error_display() {
        let errors = [
            LinkError::ConnectFailed("refused".to_string()),
            LinkError::SubscribeFailed("bad filter".to_string()),
            LinkError::UnsubscribeFailed("bad filter".to_string()),
            LinkError::PublishFailed("queue full".to_string()),
            LinkError::AckTimeout,
            LinkError::Closed,
            LinkError::InvalidOptions("no host".to_string()),
        ];
        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
