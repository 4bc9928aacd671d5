//! Session management
//!
//! A [`SessionManager`] owns at most one live broker link plus the state
//! that belongs to it: connection status, the subscription registry, and
//! the bounded message history. All mutation funnels through one mutex
//! that is never held across an await, and observers learn about changes
//! through the broadcast [`EventBus`].
//!
//! Every connect attempt gets a new epoch. Events from a superseded link
//! carry a stale epoch and are dropped, so a slow teardown can never
//! corrupt the state of the connection that replaced it.

pub mod buffer;
pub mod events;
pub mod registry;

pub use buffer::{Message, MessageBuffer, MESSAGE_CAPACITY};
pub use events::{EventBus, NoticeLevel, SessionEvent};
pub use registry::{topic_matches, Subscription, SubscriptionRegistry};

use crate::config::{ConnectionOptions, ProtocolVersion, QosLevel};
use crate::error::SessionError;
use crate::payload::{self, PayloadFormat};
use crate::transport::{
    LinkEvent, LinkFactory, Mqtt5PublishProperties, ProtocolLink, SubscribeOptions,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

const LINK_EVENT_CAPACITY: usize = 64;

/// Color for messages no subscription covers.
const DEFAULT_MESSAGE_COLOR: &str = "#7f8c9a";

/// Connection lifecycle as observed by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error(String),
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

/// Limits automatic reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Connection drops tolerated before the session is torn down for good.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_attempts: 10 }
    }
}

/// One publish as requested by the caller, payload still in text form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    pub payload: String,
    #[serde(default)]
    pub format: PayloadFormat,
    #[serde(default)]
    pub qos: QosLevel,
    #[serde(default)]
    pub retain: bool,
    #[serde(default)]
    pub properties: Option<Mqtt5PublishProperties>,
}

impl PublishRequest {
    pub fn text(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            format: PayloadFormat::Plaintext,
            qos: QosLevel::AtMostOnce,
            retain: false,
            properties: None,
        }
    }
}

/// Everything that belongs to the current connection, guarded by one lock.
struct SessionState {
    epoch: u64,
    status: ConnectionStatus,
    options: Option<ConnectionOptions>,
    link: Option<Arc<dyn ProtocolLink>>,
    registry: SubscriptionRegistry,
    buffer: MessageBuffer,
    filtered: Arc<[Message]>,
    reconnect_attempts: u32,
    pending_initial: Vec<SubscribeOptions>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            epoch: 0,
            status: ConnectionStatus::Disconnected,
            options: None,
            link: None,
            registry: SubscriptionRegistry::new(),
            buffer: MessageBuffer::new(),
            filtered: Arc::from(Vec::new()),
            reconnect_attempts: 0,
            pending_initial: Vec::new(),
        }
    }

    /// Clear the per-connection collections in one step. Options, link and
    /// epoch are left alone so a reconnect cycle can continue.
    fn reset_collections(&mut self) {
        self.registry.clear();
        self.buffer.clear();
        self.filtered = Arc::from(Vec::new());
    }

    /// Rebuild the filtered view: messages covered by a selected
    /// subscription's topic filter. The existing allocation is kept whenever
    /// the content is unchanged, so observers can compare by pointer.
    fn recompute_filtered(&mut self) {
        let selected: Vec<&Subscription> = self.registry.selected().collect();
        let next: Vec<Message> = self
            .buffer
            .iter()
            .filter(|message| {
                selected
                    .iter()
                    .any(|s| topic_matches(&s.options.topic, &message.topic))
            })
            .cloned()
            .collect();
        if self.filtered.as_ref() != next.as_slice() {
            self.filtered = next.into();
        }
    }

    /// Record a message, deriving its structured form and display color.
    fn record_message(&mut self, mut message: Message) {
        message.parsed = payload::parse_structured(&message.payload);
        message.color = self
            .registry
            .matching(&message.topic)
            .and_then(|s| s.options.color.clone())
            .or_else(|| Some(DEFAULT_MESSAGE_COLOR.to_string()));
        self.buffer.push(message);
        self.recompute_filtered();
    }
}

/// Owner of one broker connection and its session state.
pub struct SessionManager {
    state: Arc<Mutex<SessionState>>,
    factory: Arc<dyn LinkFactory>,
    bus: Arc<EventBus>,
    policy: ReconnectPolicy,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn LinkFactory>) -> Self {
        Self::with_policy(factory, ReconnectPolicy::default())
    }

    pub fn with_policy(factory: Arc<dyn LinkFactory>, policy: ReconnectPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState::new())),
            factory,
            bus: Arc::new(EventBus::new()),
            policy,
        }
    }

    /// Receive session events. Late subscribers only see events emitted
    /// after this call.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    // Accessors clone state out under the lock; none of them block.

    pub fn status(&self) -> ConnectionStatus {
        lock(&self.state).status.clone()
    }

    pub fn options(&self) -> Option<ConnectionOptions> {
        lock(&self.state).options.clone()
    }

    /// Protocol version of the live link, if any.
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        lock(&self.state)
            .link
            .as_ref()
            .map(|link| link.protocol_version())
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        lock(&self.state).registry.iter().cloned().collect()
    }

    /// Subscriptions currently selected for the filtered view.
    pub fn selected_subscriptions(&self) -> Vec<Subscription> {
        lock(&self.state).registry.selected().cloned().collect()
    }

    pub fn is_selected(&self, id: Uuid) -> bool {
        lock(&self.state).registry.is_selected(id)
    }

    /// Full message history, newest first.
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.state).buffer.snapshot()
    }

    /// Messages matching the selected subscriptions, newest first. The
    /// returned allocation is reused while the content is unchanged, so
    /// `Arc::ptr_eq` tells observers whether anything moved.
    pub fn filtered_messages(&self) -> Arc<[Message]> {
        lock(&self.state).filtered.clone()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.state).reconnect_attempts
    }

    /// Open a connection, replacing any existing one. `initial` lists
    /// subscriptions to establish as soon as the broker acknowledges the
    /// connect.
    pub async fn connect(
        &self,
        options: ConnectionOptions,
        initial: Vec<SubscribeOptions>,
    ) -> Result<(), SessionError> {
        if let Err(e) = options.validate() {
            self.bus
                .notice(NoticeLevel::Error, format!("connect failed: {e}"));
            return Err(e.into());
        }

        let (old_link, epoch) = {
            let mut state = lock(&self.state);
            state.epoch += 1;
            state.reset_collections();
            state.status = ConnectionStatus::Connecting;
            state.options = Some(options.clone());
            state.reconnect_attempts = 0;
            state.pending_initial = initial;
            (state.link.take(), state.epoch)
        };
        if let Some(link) = old_link {
            debug!("shutting down superseded link");
            self.bus
                .notice(NoticeLevel::Warning, "replacing the live connection");
            let _ = link.shutdown(true).await;
        }
        self.bus.state_changed();

        let (event_tx, event_rx) = mpsc::channel(LINK_EVENT_CAPACITY);
        let link = match self.factory.open(&options, event_tx).await {
            Ok(link) => link,
            Err(e) => {
                let mut state = lock(&self.state);
                if state.epoch == epoch {
                    state.status = ConnectionStatus::Error(e.to_string());
                }
                drop(state);
                self.bus.notice(NoticeLevel::Error, format!("connect failed: {e}"));
                self.bus.state_changed();
                return Err(e.into());
            }
        };

        {
            let mut state = lock(&self.state);
            if state.epoch != epoch {
                drop(state);
                let _ = link.shutdown(true).await;
                return Ok(());
            }
            state.link = Some(link);
        }

        info!(url = %options.broker_url(), "connecting");
        tokio::spawn(run_link_events(
            self.state.clone(),
            self.bus.clone(),
            self.policy,
            event_rx,
            epoch,
        ));
        Ok(())
    }

    /// Gracefully close the current connection and reset the session.
    /// A no-op when nothing is connected.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let link = {
            let mut state = lock(&self.state);
            if state.link.is_none() && state.status == ConnectionStatus::Disconnected {
                drop(state);
                self.bus
                    .notice(NoticeLevel::Warning, "disconnect called with no live connection");
                return Ok(());
            }
            state.epoch += 1;
            state.status = ConnectionStatus::Disconnected;
            state.reset_collections();
            state.reconnect_attempts = 0;
            state.pending_initial.clear();
            state.link.take()
        };

        let result = match link {
            Some(link) => link.shutdown(false).await.map_err(SessionError::from),
            None => Ok(()),
        };

        self.bus.notice(NoticeLevel::Info, "disconnected");
        self.bus.state_changed();
        self.report_failure(result)
    }

    /// Subscribe to a topic. The topic must not already be registered.
    pub async fn subscribe(
        &self,
        options: SubscribeOptions,
    ) -> Result<Subscription, SessionError> {
        let result = self.subscribe_inner(options).await;
        self.report_failure(result)
    }

    async fn subscribe_inner(
        &self,
        options: SubscribeOptions,
    ) -> Result<Subscription, SessionError> {
        options.validate()?;
        let link = {
            let state = lock(&self.state);
            if state.registry.contains_topic(&options.topic) {
                return Err(SessionError::DuplicateTopic {
                    topic: options.topic,
                });
            }
            require_connected(&state)?
        };

        link.subscribe(&options).await?;

        let subscription = {
            let mut state = lock(&self.state);
            // connection may have turned over while the ack was in flight
            if state.registry.contains_topic(&options.topic) {
                return Err(SessionError::DuplicateTopic {
                    topic: options.topic,
                });
            }
            let subscription = state.registry.add(options);
            state.recompute_filtered();
            subscription
        };

        debug!(topic = %subscription.options.topic, "subscribed");
        self.bus.state_changed();
        Ok(subscription)
    }

    /// Unsubscribe by id, purging the history entries its filter matched.
    pub async fn unsubscribe(&self, id: Uuid) -> Result<(), SessionError> {
        let result = self.unsubscribe_inner(id).await;
        self.report_failure(result)
    }

    async fn unsubscribe_inner(&self, id: Uuid) -> Result<(), SessionError> {
        let (link, topic) = {
            let state = lock(&self.state);
            let subscription = state
                .registry
                .get(id)
                .ok_or(SessionError::UnknownSubscription { id })?;
            let topic = subscription.options.topic.clone();
            (require_connected(&state)?, topic)
        };

        link.unsubscribe(&topic).await?;

        let purged = {
            let mut state = lock(&self.state);
            state.registry.remove(id);
            let purged = state
                .buffer
                .purge_where(|message| topic_matches(&topic, &message.topic));
            state.recompute_filtered();
            purged
        };

        debug!(%topic, purged, "unsubscribed");
        self.bus.state_changed();
        Ok(())
    }

    /// Publish a message. The payload is encoded per its declared format
    /// before anything reaches the wire; success means the client accepted
    /// the packet for delivery.
    pub async fn publish(&self, request: PublishRequest) -> Result<(), SessionError> {
        let result = self.publish_inner(request).await;
        self.report_failure(result)
    }

    async fn publish_inner(&self, request: PublishRequest) -> Result<(), SessionError> {
        let encoded = payload::encode(&request.payload, request.format)?;
        let encoded_len = encoded.len();
        let link = require_connected(&lock(&self.state))?;

        link.publish(
            &request.topic,
            encoded,
            request.qos,
            request.retain,
            request.properties.as_ref(),
        )
        .await?;

        {
            let mut state = lock(&self.state);
            let mut message =
                Message::published(&request.topic, &request.payload, request.qos, request.retain);
            message.size = encoded_len;
            state.record_message(message);
        }

        self.bus.state_changed();
        Ok(())
    }

    /// Include or exclude a subscription from the filtered message view.
    pub fn set_selected(&self, id: Uuid, selected: bool) -> Result<(), SessionError> {
        {
            let mut state = lock(&self.state);
            if !state.registry.set_selected(id, selected) {
                return Err(SessionError::UnknownSubscription { id });
            }
            state.recompute_filtered();
        }
        self.bus.state_changed();
        Ok(())
    }

    /// Flip a subscription in or out of the filtered view. Works in any
    /// connection state and is a no-op for unknown ids.
    pub fn toggle_selected(&self, id: Uuid) -> bool {
        let toggled = {
            let mut state = lock(&self.state);
            let toggled = state.registry.toggle(id);
            if toggled.is_some() {
                state.recompute_filtered();
            }
            toggled
        };
        match toggled {
            Some(selected) => {
                self.bus.state_changed();
                selected
            }
            None => false,
        }
    }

    fn report_failure<T>(&self, result: Result<T, SessionError>) -> Result<T, SessionError> {
        if let Err(e) = &result {
            self.bus.notice(NoticeLevel::Error, e.to_string());
        }
        result
    }
}

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn require_connected(state: &SessionState) -> Result<Arc<dyn ProtocolLink>, SessionError> {
    if !state.status.is_connected() {
        return Err(SessionError::NotConnected {
            status: state.status.clone(),
        });
    }
    state.link.clone().ok_or(SessionError::NotConnected {
        status: state.status.clone(),
    })
}

/// Per-connection event pump. Runs until the link stops emitting or the
/// session moves on to a newer epoch.
async fn run_link_events(
    state: Arc<Mutex<SessionState>>,
    bus: Arc<EventBus>,
    policy: ReconnectPolicy,
    mut events: mpsc::Receiver<LinkEvent>,
    epoch: u64,
) {
    while let Some(event) = events.recv().await {
        if lock(&state).epoch != epoch {
            debug!("dropping event from superseded connection");
            break;
        }
        match event {
            LinkEvent::Connected { session_present } => {
                let (link, pending) = {
                    let mut s = lock(&state);
                    s.status = ConnectionStatus::Connected;
                    s.reconnect_attempts = 0;
                    // kept for the connection's lifetime so a transport
                    // reconnect re-establishes the same subscriptions
                    (s.link.clone(), s.pending_initial.clone())
                };
                info!(session_present, "connected");
                bus.notice(NoticeLevel::Info, "connected");
                bus.state_changed();

                if let Some(link) = link {
                    apply_initial_subscriptions(&state, &bus, link, pending, epoch).await;
                }
            }
            LinkEvent::Message {
                topic,
                payload,
                qos,
                retain,
            } => {
                let text = payload::decode_text(&payload);
                {
                    let mut s = lock(&state);
                    let mut message = Message::received(&topic, text, qos, retain);
                    message.size = payload.len();
                    s.record_message(message);
                }
                bus.state_changed();
            }
            LinkEvent::Error { reason } => {
                {
                    let mut s = lock(&state);
                    s.status = ConnectionStatus::Error(reason.clone());
                }
                bus.notice(NoticeLevel::Error, format!("connection error: {reason}"));
                bus.state_changed();
            }
            LinkEvent::Closed => {
                let torn_down = {
                    let mut s = lock(&state);
                    s.reconnect_attempts += 1;
                    if s.reconnect_attempts > policy.max_attempts {
                        s.status = ConnectionStatus::Disconnected;
                        s.reset_collections();
                        s.pending_initial.clear();
                        s.link.take()
                    } else {
                        s.status = ConnectionStatus::Disconnected;
                        s.reset_collections();
                        None
                    }
                };
                if let Some(link) = torn_down {
                    warn!(
                        max_attempts = policy.max_attempts,
                        "giving up on reconnection"
                    );
                    let _ = link.shutdown(true).await;
                    bus.notice(
                        NoticeLevel::Terminal,
                        format!(
                            "connection closed; giving up after {} attempts",
                            policy.max_attempts
                        ),
                    );
                    bus.state_changed();
                    break;
                }
                bus.notice(NoticeLevel::Warning, "connection closed");
                bus.state_changed();
            }
            LinkEvent::Reconnecting => {
                let attempt = {
                    let mut s = lock(&state);
                    s.status = ConnectionStatus::Reconnecting;
                    s.reconnect_attempts
                };
                bus.notice(
                    NoticeLevel::Info,
                    format!("reconnecting (attempt {attempt} of {})", policy.max_attempts),
                );
                bus.state_changed();
            }
            LinkEvent::Offline => {
                let already_down = {
                    let mut s = lock(&state);
                    if s.status == ConnectionStatus::Disconnected {
                        true
                    } else {
                        s.status = ConnectionStatus::Disconnected;
                        s.reset_collections();
                        false
                    }
                };
                if !already_down {
                    bus.notice(NoticeLevel::Warning, "connection offline");
                    bus.state_changed();
                }
            }
            LinkEvent::Ended => {
                let already_down = {
                    let mut s = lock(&state);
                    let already = s.status == ConnectionStatus::Disconnected && s.link.is_none();
                    if !already {
                        s.status = ConnectionStatus::Disconnected;
                        s.reset_collections();
                        s.link.take();
                    }
                    already
                };
                if !already_down {
                    bus.notice(NoticeLevel::Info, "connection ended");
                    bus.state_changed();
                }
                break;
            }
        }
    }
    debug!(epoch, "link event pump stopped");
}

/// Establish the subscriptions requested alongside connect. Failures are
/// reported as notices; a refused topic does not abort the others.
async fn apply_initial_subscriptions(
    state: &Arc<Mutex<SessionState>>,
    bus: &Arc<EventBus>,
    link: Arc<dyn ProtocolLink>,
    pending: Vec<SubscribeOptions>,
    epoch: u64,
) {
    if pending.is_empty() {
        return;
    }
    let mut changed = false;
    for options in pending {
        let topic = options.topic.clone();
        if lock(state).registry.contains_topic(&topic) {
            continue;
        }
        if let Err(e) = options.validate() {
            bus.notice(
                NoticeLevel::Warning,
                format!("initial subscription to {topic} failed: {e}"),
            );
            continue;
        }
        match link.subscribe(&options).await {
            Ok(()) => {
                let mut s = lock(state);
                if s.epoch != epoch {
                    return;
                }
                if !s.registry.contains_topic(&topic) {
                    s.registry.add(options);
                    s.recompute_filtered();
                    changed = true;
                }
            }
            Err(e) => {
                bus.notice(
                    NoticeLevel::Warning,
                    format!("initial subscription to {topic} failed: {e}"),
                );
            }
        }
    }
    if changed {
        bus.state_changed();
    }
}
