//! Connection options for a single connect attempt
//!
//! Everything here is plain data validated before it reaches the transport
//! layer. MQTT 5 extended properties are explicit structs rather than
//! free-form property bags, so malformed input is rejected at construction
//! instead of at the broker.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport scheme for the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportScheme {
    /// Plain TCP (`mqtt://`)
    Mqtt,
    /// TLS over TCP (`mqtts://`)
    Mqtts,
    /// Plain websocket (`ws://`)
    Ws,
    /// TLS websocket (`wss://`)
    Wss,
}

impl TransportScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportScheme::Mqtt => "mqtt",
            TransportScheme::Mqtts => "mqtts",
            TransportScheme::Ws => "ws",
            TransportScheme::Wss => "wss",
        }
    }

    /// Whether the scheme carries TLS.
    pub fn is_secure(&self) -> bool {
        matches!(self, TransportScheme::Mqtts | TransportScheme::Wss)
    }

    /// Whether the scheme runs over websockets.
    pub fn is_websocket(&self) -> bool {
        matches!(self, TransportScheme::Ws | TransportScheme::Wss)
    }
}

impl std::fmt::Display for TransportScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MQTT protocol version negotiated with the broker.
///
/// Serialized as the numeric protocol level used on the wire (4 or 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum ProtocolVersion {
    #[default]
    V311,
    V5,
}

impl From<ProtocolVersion> for u8 {
    fn from(version: ProtocolVersion) -> u8 {
        match version {
            ProtocolVersion::V311 => 4,
            ProtocolVersion::V5 => 5,
        }
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(ProtocolVersion::V311),
            5 => Ok(ProtocolVersion::V5),
            other => Err(format!("unsupported protocol level: {other}")),
        }
    }
}

/// Quality-of-service level, serialized as 0/1/2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum QosLevel {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl From<QosLevel> for u8 {
    fn from(qos: QosLevel) -> u8 {
        match qos {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QosLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(format!("invalid QoS level: {other}")),
        }
    }
}

/// Username/password pair for broker authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// TLS material for `mqtts`/`wss` connections, PEM encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsOptions {
    /// CA certificate chain. When absent the platform trust store is used.
    #[serde(default)]
    pub ca: Option<String>,
    /// Client certificate for mutual TLS.
    #[serde(default)]
    pub cert: Option<String>,
    /// Client private key for mutual TLS.
    #[serde(default)]
    pub key: Option<String>,
    /// Reject connections to brokers with unverifiable certificates.
    #[serde(default = "default_reject_unauthorized")]
    pub reject_unauthorized: bool,
}

fn default_reject_unauthorized() -> bool {
    true
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            ca: None,
            cert: None,
            key: None,
            reject_unauthorized: true,
        }
    }
}

/// MQTT 5 properties attached to the last-will message.
///
/// `correlation_data` is carried as base64 text (the form layer works in
/// strings); it is decoded to bytes when the wire options are built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WillProperties {
    #[serde(default)]
    pub will_delay_interval: Option<u32>,
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

/// Last-will descriptor registered with the broker at connect time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastWillOptions {
    pub topic: String,
    pub payload: String,
    #[serde(default)]
    pub qos: QosLevel,
    #[serde(default)]
    pub retain: bool,
    /// Only meaningful when connecting with protocol version 5.
    #[serde(default)]
    pub properties: Option<WillProperties>,
}

/// MQTT 5 CONNECT properties as an explicit, validated struct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mqtt5ConnectProperties {
    #[serde(default)]
    pub session_expiry_interval: Option<u32>,
    #[serde(default)]
    pub receive_maximum: Option<u16>,
    #[serde(default)]
    pub maximum_packet_size: Option<u32>,
    #[serde(default)]
    pub topic_alias_maximum: Option<u16>,
    #[serde(default)]
    pub request_response_information: Option<bool>,
    #[serde(default)]
    pub request_problem_information: Option<bool>,
    #[serde(default)]
    pub user_properties: Vec<(String, String)>,
}

impl Mqtt5ConnectProperties {
    /// Validate protocol-level constraints before the options reach the wire.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.receive_maximum == Some(0) {
            return Err(OptionsError::InvalidField(
                "receive_maximum must be greater than 0".to_string(),
            ));
        }
        if self.maximum_packet_size == Some(0) {
            return Err(OptionsError::InvalidField(
                "maximum_packet_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Immutable per-connect-attempt options.
///
/// Constructed by the caller (forms, profiles) and treated as read-only
/// input by the session manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    pub scheme: TransportScheme,
    pub host: String,
    pub port: u16,
    /// Websocket endpoint path, ignored for TCP schemes.
    #[serde(default = "default_ws_path")]
    pub path: String,
    pub client_id: String,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u16,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_reconnect_period")]
    pub reconnect_period_secs: u64,
    pub version: ProtocolVersion,
    #[serde(default)]
    pub last_will: Option<LastWillOptions>,
    #[serde(default)]
    pub mqtt5_properties: Option<Mqtt5ConnectProperties>,
    #[serde(default)]
    pub tls: Option<TlsOptions>,
}

fn default_ws_path() -> String {
    "/mqtt".to_string()
}

fn default_clean_session() -> bool {
    true
}

fn default_keepalive() -> u16 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_reconnect_period() -> u64 {
    4
}

impl ConnectionOptions {
    /// Minimal options for a plain TCP connection; the rest take defaults.
    pub fn tcp(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            scheme: TransportScheme::Mqtt,
            host: host.into(),
            port,
            path: default_ws_path(),
            client_id: client_id.into(),
            credentials: None,
            clean_session: true,
            keepalive_secs: default_keepalive(),
            connect_timeout_secs: default_connect_timeout(),
            reconnect_period_secs: default_reconnect_period(),
            version: ProtocolVersion::V311,
            last_will: None,
            mqtt5_properties: None,
            tls: None,
        }
    }

    /// Broker URL for logging and display.
    pub fn broker_url(&self) -> String {
        if self.scheme.is_websocket() {
            format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
        } else {
            format!("{}://{}:{}", self.scheme, self.host, self.port)
        }
    }

    /// Check the options before a connect attempt.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.host.trim().is_empty() {
            return Err(OptionsError::InvalidField(
                "host must not be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(OptionsError::InvalidField("port must not be 0".to_string()));
        }
        if self.client_id.trim().is_empty() {
            return Err(OptionsError::InvalidField(
                "client_id must not be empty".to_string(),
            ));
        }
        if self.keepalive_secs == 0 {
            return Err(OptionsError::InvalidField(
                "keepalive_secs must be greater than 0".to_string(),
            ));
        }
        if self.version == ProtocolVersion::V311 {
            if self.mqtt5_properties.is_some() {
                return Err(OptionsError::VersionMismatch(
                    "MQTT 5 connect properties require protocol version 5".to_string(),
                ));
            }
            if self
                .last_will
                .as_ref()
                .is_some_and(|will| will.properties.is_some())
            {
                return Err(OptionsError::VersionMismatch(
                    "last-will properties require protocol version 5".to_string(),
                ));
            }
        }
        if let Some(props) = &self.mqtt5_properties {
            props.validate()?;
        }
        if let Some(will) = &self.last_will {
            if will.topic.trim().is_empty() {
                return Err(OptionsError::InvalidField(
                    "last-will topic must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Validation errors for connection options.
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("invalid option: {0}")]
    InvalidField(String),
    #[error("protocol version mismatch: {0}")]
    VersionMismatch(String),
}
