//! mqttdeck - MQTT session core for dashboard and test clients
//!
//! # Overview
//!
//! This crate manages one live MQTT connection (3.1.1 or 5.0) and the
//! session state around it:
//! - Connection lifecycle with bounded automatic reconnection
//! - A subscription registry with per-subscription selection
//! - Bounded message history with a filtered, referentially stable view
//! - Payload encoding for plaintext, JSON, hex and base64 publishes
//! - Saved connection profiles persisted as TOML
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mqttdeck::{
//!     ConnectionOptions, PublishRequest, QosLevel, RumqttLinkFactory, SessionManager,
//!     SubscribeOptions,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), mqttdeck::SessionError> {
//! let session = SessionManager::new(Arc::new(RumqttLinkFactory));
//! let mut events = session.subscribe_events();
//!
//! let options = ConnectionOptions::tcp("broker.local", 1883, "deck-1");
//! let initial = vec![SubscribeOptions::new("sensors/#", QosLevel::AtLeastOnce)];
//! session.connect(options, initial).await?;
//!
//! // wait for the first state change, then inspect the session
//! let _ = events.recv().await;
//! println!("status: {:?}", session.status());
//!
//! session
//!     .publish(PublishRequest::text("sensors/ping", "hello"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod payload;
pub mod profiles;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{
    ConnectionOptions, Credentials, LastWillOptions, Mqtt5ConnectProperties, OptionsError,
    ProtocolVersion, QosLevel, TlsOptions, TransportScheme, WillProperties,
};
pub use error::SessionError;
pub use payload::{PayloadError, PayloadFormat};
pub use profiles::{ConnectionProfile, ProfileError, ProfileStore};
pub use session::{
    ConnectionStatus, Message, NoticeLevel, PublishRequest, ReconnectPolicy, SessionEvent,
    SessionManager, Subscription, MESSAGE_CAPACITY,
};
pub use transport::{
    LinkError, LinkEvent, LinkFactory, Mqtt5PublishProperties, Mqtt5SubscribeOptions,
    ProtocolLink, RumqttLinkFactory, SubscribeOptions,
};
