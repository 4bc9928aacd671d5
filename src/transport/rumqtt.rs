//! rumqttc-backed protocol link
//!
//! One [`RumqttLink`] wraps one `rumqttc` client handle, v4 for MQTT 3.1.1
//! and v5 for MQTT 5. A spawned event-loop task translates rumqttc events
//! into [`LinkEvent`]s; subscribe/unsubscribe acknowledgments are matched
//! to callers through FIFO oneshot queues (the broker answers in request
//! order within a connection).

use super::{
    validate_ack_codes, LinkError, LinkEvent, LinkFactory, Mqtt5PublishProperties, ProtocolLink,
    SubscribeOptions,
};
use crate::config::{ConnectionOptions, LastWillOptions, ProtocolVersion, QosLevel, TransportScheme};
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5 as v5pkt;
use rumqttc::{TlsConfiguration, Transport as RumqttcTransport};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long we wait for a SubAck/UnsubAck before reporting failure.
const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Max packet size; the 10KB client default is too small for dashboard use.
const MAX_PACKET_SIZE: u32 = 256 * 1024;

/// Channel capacity for the rumqttc request queue.
const CLIENT_CAPACITY: usize = 10;

type AckResult = Result<(), LinkError>;

/// FIFO queues pairing in-flight subscribe/unsubscribe calls with their
/// acknowledgments.
#[derive(Default)]
struct AckQueues {
    subs: Mutex<VecDeque<oneshot::Sender<AckResult>>>,
    unsubs: Mutex<VecDeque<oneshot::Sender<AckResult>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl AckQueues {
    fn push_sub(&self) -> oneshot::Receiver<AckResult> {
        let (tx, rx) = oneshot::channel();
        locked(&self.subs).push_back(tx);
        rx
    }

    fn push_unsub(&self) -> oneshot::Receiver<AckResult> {
        let (tx, rx) = oneshot::channel();
        locked(&self.unsubs).push_back(tx);
        rx
    }

    fn abandon_last_sub(&self) {
        locked(&self.subs).pop_back();
    }

    fn abandon_last_unsub(&self) {
        locked(&self.unsubs).pop_back();
    }

    fn resolve_sub(&self, result: AckResult) {
        if let Some(tx) = locked(&self.subs).pop_front() {
            let _ = tx.send(result);
        }
    }

    fn resolve_unsub(&self, result: AckResult) {
        if let Some(tx) = locked(&self.unsubs).pop_front() {
            let _ = tx.send(result);
        }
    }

    /// Fail everything in flight; acks will never arrive once the
    /// connection dropped.
    fn fail_pending(&self) {
        for tx in locked(&self.subs).drain(..) {
            let _ = tx.send(Err(LinkError::Closed));
        }
        for tx in locked(&self.unsubs).drain(..) {
            let _ = tx.send(Err(LinkError::Closed));
        }
    }
}

enum LinkClient {
    V311(rumqttc::AsyncClient),
    V5(rumqttc::v5::AsyncClient),
}

/// A live connection handle produced by [`RumqttLinkFactory`].
pub struct RumqttLink {
    version: ProtocolVersion,
    client: LinkClient,
    acks: Arc<AckQueues>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Factory opening rumqttc-backed links.
#[derive(Debug, Default)]
pub struct RumqttLinkFactory;

#[async_trait]
impl LinkFactory for RumqttLinkFactory {
    async fn open(
        &self,
        options: &ConnectionOptions,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Arc<dyn ProtocolLink>, LinkError> {
        options
            .validate()
            .map_err(|e| LinkError::InvalidOptions(e.to_string()))?;

        let acks = Arc::new(AckQueues::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let timing = LoopTiming {
            connect_timeout: Duration::from_secs(options.connect_timeout_secs),
            reconnect_period: Duration::from_secs(options.reconnect_period_secs.max(1)),
        };

        info!(url = %options.broker_url(), version = ?options.version, "opening MQTT link");

        let (client, task) = match options.version {
            ProtocolVersion::V311 => {
                let mqtt_options = mqtt_options_v4(options)?;
                let (client, event_loop) = rumqttc::AsyncClient::new(mqtt_options, CLIENT_CAPACITY);
                let task = tokio::spawn(run_v4(
                    event_loop,
                    events,
                    acks.clone(),
                    shutdown_rx,
                    timing,
                ));
                (LinkClient::V311(client), task)
            }
            ProtocolVersion::V5 => {
                let mqtt_options = mqtt_options_v5(options)?;
                let (client, event_loop) =
                    rumqttc::v5::AsyncClient::new(mqtt_options, CLIENT_CAPACITY);
                let task = tokio::spawn(run_v5(
                    event_loop,
                    events,
                    acks.clone(),
                    shutdown_rx,
                    timing,
                ));
                (LinkClient::V5(client), task)
            }
        };

        Ok(Arc::new(RumqttLink {
            version: options.version,
            client,
            acks,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        }))
    }
}

#[async_trait]
impl ProtocolLink for RumqttLink {
    async fn subscribe(&self, options: &SubscribeOptions) -> Result<(), LinkError> {
        options.validate()?;
        let ack = self.acks.push_sub();

        let issued = match &self.client {
            LinkClient::V311(client) => client
                .subscribe(&options.topic, qos_v4(options.qos))
                .await
                .map_err(|e| LinkError::SubscribeFailed(e.to_string())),
            LinkClient::V5(client) => {
                let mut filter = v5pkt::Filter::new(options.topic.clone(), qos_v5(options.qos));
                if let Some(mqtt5) = &options.mqtt5 {
                    filter.nolocal = mqtt5.no_local;
                    filter.preserve_retain = mqtt5.retain_as_published;
                    filter.retain_forward_rule = retain_forward_rule(mqtt5.retain_handling);
                }
                client
                    .subscribe_many([filter])
                    .await
                    .map_err(|e| LinkError::SubscribeFailed(e.to_string()))
            }
        };
        if let Err(e) = issued {
            self.acks.abandon_last_sub();
            return Err(e);
        }

        await_ack(ack).await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), LinkError> {
        let ack = self.acks.push_unsub();

        let issued = match &self.client {
            LinkClient::V311(client) => client
                .unsubscribe(topic)
                .await
                .map_err(|e| LinkError::UnsubscribeFailed(e.to_string())),
            LinkClient::V5(client) => client
                .unsubscribe(topic)
                .await
                .map_err(|e| LinkError::UnsubscribeFailed(e.to_string())),
        };
        if let Err(e) = issued {
            self.acks.abandon_last_unsub();
            return Err(e);
        }

        await_ack(ack).await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
        properties: Option<&Mqtt5PublishProperties>,
    ) -> Result<(), LinkError> {
        match &self.client {
            LinkClient::V311(client) => client
                .publish(topic, qos_v4(qos), retain, payload)
                .await
                .map_err(|e| LinkError::PublishFailed(e.to_string())),
            LinkClient::V5(client) => {
                let props = match properties {
                    Some(props) => publish_properties(props)?,
                    None => v5pkt::PublishProperties::default(),
                };
                client
                    .publish_with_properties(topic, qos_v5(qos), retain, payload, props)
                    .await
                    .map_err(|e| LinkError::PublishFailed(e.to_string()))
            }
        }
    }

    async fn shutdown(&self, force: bool) -> Result<(), LinkError> {
        let _ = self.shutdown_tx.send(true);

        let disconnected = match &self.client {
            LinkClient::V311(client) => client.disconnect().await.map_err(|e| e.to_string()),
            LinkClient::V5(client) => client.disconnect().await.map_err(|e| e.to_string()),
        };
        self.acks.fail_pending();

        match disconnected {
            Ok(()) => Ok(()),
            Err(_) if force => Ok(()),
            Err(reason) => Err(LinkError::ConnectFailed(reason)),
        }
    }

    fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }
}

impl Drop for RumqttLink {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.lock().ok().and_then(|mut slot| slot.take()) {
            task.abort();
        }
    }
}

async fn await_ack(ack: oneshot::Receiver<AckResult>) -> Result<(), LinkError> {
    match tokio::time::timeout(ACK_TIMEOUT, ack).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(LinkError::Closed),
        Err(_) => Err(LinkError::AckTimeout),
    }
}

#[derive(Clone, Copy)]
struct LoopTiming {
    connect_timeout: Duration,
    reconnect_period: Duration,
}

/// Event-loop task for MQTT 3.1.1 links.
async fn run_v4(
    mut event_loop: rumqttc::EventLoop,
    events: mpsc::Sender<LinkEvent>,
    acks: Arc<AckQueues>,
    mut shutdown_rx: watch::Receiver<bool>,
    timing: LoopTiming,
) {
    use rumqttc::{Event, Packet};

    let mut connected = false;
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            polled = poll_v4(&mut event_loop, connected, timing.connect_timeout) => {
                match polled {
                    Ok(Event::Incoming(packet)) => match packet {
                        Packet::ConnAck(ack) => {
                            connected = true;
                            if events
                                .send(LinkEvent::Connected { session_present: ack.session_present })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Packet::Publish(publish) => {
                            let delivered = LinkEvent::Message {
                                topic: publish.topic.clone(),
                                payload: publish.payload.to_vec(),
                                qos: qos_level_v4(publish.qos),
                                retain: publish.retain,
                            };
                            if events.send(delivered).await.is_err() {
                                break;
                            }
                        }
                        Packet::SubAck(suback) => {
                            let codes: Vec<u8> = suback
                                .return_codes
                                .iter()
                                .map(|code| match code {
                                    rumqttc::mqttbytes::v4::SubscribeReasonCode::Success(qos) => {
                                        *qos as u8
                                    }
                                    rumqttc::mqttbytes::v4::SubscribeReasonCode::Failure => 0x80,
                                })
                                .collect();
                            acks.resolve_sub(validate_ack_codes(&codes));
                        }
                        Packet::UnsubAck(_) => {
                            acks.resolve_unsub(Ok(()));
                        }
                        Packet::Disconnect => {
                            connected = false;
                            if events.send(LinkEvent::Closed).await.is_err() {
                                break;
                            }
                        }
                        other => {
                            debug!(target: "mqtt_link", "event: {other:?}");
                        }
                    },
                    Ok(Event::Outgoing(_)) => {}
                    Err(reason) => {
                        connected = false;
                        acks.fail_pending();
                        if !report_drop_and_wait(&events, &mut shutdown_rx, reason, timing).await {
                            break;
                        }
                    }
                }
            }
        }
    }
    let _ = events.send(LinkEvent::Ended).await;
    debug!(target: "mqtt_link", "v4 event loop stopped");
}

/// Event-loop task for MQTT 5 links.
async fn run_v5(
    mut event_loop: rumqttc::v5::EventLoop,
    events: mpsc::Sender<LinkEvent>,
    acks: Arc<AckQueues>,
    mut shutdown_rx: watch::Receiver<bool>,
    timing: LoopTiming,
) {
    use rumqttc::v5::Event;
    use v5pkt::Packet;

    let mut connected = false;
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            polled = poll_v5(&mut event_loop, connected, timing.connect_timeout) => {
                match polled {
                    Ok(Event::Incoming(packet)) => match packet {
                        Packet::ConnAck(ack) => {
                            connected = true;
                            if events
                                .send(LinkEvent::Connected { session_present: ack.session_present })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Packet::Publish(publish) => {
                            let delivered = LinkEvent::Message {
                                topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                                payload: publish.payload.to_vec(),
                                qos: qos_level_v5(publish.qos),
                                retain: publish.retain,
                            };
                            if events.send(delivered).await.is_err() {
                                break;
                            }
                        }
                        Packet::SubAck(suback) => {
                            let codes: Vec<u8> = suback
                                .return_codes
                                .iter()
                                .map(suback_code_v5)
                                .collect();
                            acks.resolve_sub(validate_ack_codes(&codes));
                        }
                        Packet::UnsubAck(unsuback) => {
                            let codes: Vec<u8> = unsuback
                                .reasons
                                .iter()
                                .map(|reason| match reason {
                                    v5pkt::UnsubAckReason::Success => 0x00,
                                    _ => 0x80,
                                })
                                .collect();
                            acks.resolve_unsub(validate_ack_codes(&codes));
                        }
                        Packet::Disconnect(_) => {
                            connected = false;
                            if events.send(LinkEvent::Closed).await.is_err() {
                                break;
                            }
                        }
                        other => {
                            debug!(target: "mqtt_link", "event: {other:?}");
                        }
                    },
                    Ok(Event::Outgoing(_)) => {}
                    Err(reason) => {
                        connected = false;
                        acks.fail_pending();
                        if !report_drop_and_wait(&events, &mut shutdown_rx, reason, timing).await {
                            break;
                        }
                    }
                }
            }
        }
    }
    let _ = events.send(LinkEvent::Ended).await;
    debug!(target: "mqtt_link", "v5 event loop stopped");
}

/// Poll with a deadline while the connection is still being established;
/// established connections poll without one (keepalive covers liveness).
async fn poll_v4(
    event_loop: &mut rumqttc::EventLoop,
    connected: bool,
    connect_timeout: Duration,
) -> Result<rumqttc::Event, String> {
    if connected {
        event_loop.poll().await.map_err(|e| e.to_string())
    } else {
        match tokio::time::timeout(connect_timeout, event_loop.poll()).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err("connect timed out".to_string()),
        }
    }
}

async fn poll_v5(
    event_loop: &mut rumqttc::v5::EventLoop,
    connected: bool,
    connect_timeout: Duration,
) -> Result<rumqttc::v5::Event, String> {
    if connected {
        event_loop.poll().await.map_err(|e| e.to_string())
    } else {
        match tokio::time::timeout(connect_timeout, event_loop.poll()).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err("connect timed out".to_string()),
        }
    }
}

/// Surface a dropped connection, then sleep out the reconnect period.
/// Returns false when shutdown was requested during the wait.
async fn report_drop_and_wait(
    events: &mpsc::Sender<LinkEvent>,
    shutdown_rx: &mut watch::Receiver<bool>,
    reason: String,
    timing: LoopTiming,
) -> bool {
    warn!(target: "mqtt_link", "connection dropped: {reason}");
    if events.send(LinkEvent::Error { reason }).await.is_err() {
        return false;
    }
    if events.send(LinkEvent::Closed).await.is_err() {
        return false;
    }

    tokio::select! {
        _ = shutdown_rx.changed() => {
            if *shutdown_rx.borrow() {
                return false;
            }
        }
        _ = tokio::time::sleep(timing.reconnect_period) => {}
    }
    if *shutdown_rx.borrow() {
        return false;
    }

    events.send(LinkEvent::Reconnecting).await.is_ok()
}

fn mqtt_options_v4(options: &ConnectionOptions) -> Result<rumqttc::MqttOptions, LinkError> {
    let mut mqtt_options =
        rumqttc::MqttOptions::new(&options.client_id, broker_host(options), options.port);

    if let Some(transport) = transport_for(options)? {
        mqtt_options.set_transport(transport);
    }
    mqtt_options.set_clean_session(options.clean_session);
    mqtt_options.set_keep_alive(Duration::from_secs(u64::from(options.keepalive_secs)));
    mqtt_options.set_max_packet_size(MAX_PACKET_SIZE as usize, MAX_PACKET_SIZE as usize);

    if let Some(credentials) = &options.credentials {
        mqtt_options.set_credentials(
            &credentials.username,
            credentials.password.as_deref().unwrap_or_default(),
        );
    }

    if let Some(will) = &options.last_will {
        mqtt_options.set_last_will(rumqttc::LastWill::new(
            &will.topic,
            will.payload.clone(),
            qos_v4(will.qos),
            will.retain,
        ));
    }

    Ok(mqtt_options)
}

fn mqtt_options_v5(options: &ConnectionOptions) -> Result<rumqttc::v5::MqttOptions, LinkError> {
    let mut mqtt_options =
        rumqttc::v5::MqttOptions::new(&options.client_id, broker_host(options), options.port);

    if let Some(transport) = transport_for(options)? {
        mqtt_options.set_transport(transport);
    }
    mqtt_options.set_clean_start(options.clean_session);
    mqtt_options.set_keep_alive(Duration::from_secs(u64::from(options.keepalive_secs)));
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    if let Some(credentials) = &options.credentials {
        mqtt_options.set_credentials(
            &credentials.username,
            credentials.password.as_deref().unwrap_or_default(),
        );
    }

    if let Some(props) = &options.mqtt5_properties {
        let connect_properties = v5pkt::ConnectProperties {
            session_expiry_interval: props.session_expiry_interval,
            receive_maximum: props.receive_maximum,
            max_packet_size: props.maximum_packet_size,
            topic_alias_max: props.topic_alias_maximum,
            request_response_info: props.request_response_information.map(u8::from),
            request_problem_info: props.request_problem_information.map(u8::from),
            user_properties: props.user_properties.clone(),
            authentication_method: None,
            authentication_data: None,
        };
        mqtt_options.set_connect_properties(connect_properties);
    }

    if let Some(will) = &options.last_will {
        mqtt_options.set_last_will(last_will_v5(will)?);
    }

    Ok(mqtt_options)
}

fn last_will_v5(will: &LastWillOptions) -> Result<v5pkt::LastWill, LinkError> {
    let properties = will
        .properties
        .as_ref()
        .map(|props| {
            Ok::<_, LinkError>(v5pkt::LastWillProperties {
                delay_interval: props.will_delay_interval,
                payload_format_indicator: props.payload_format_indicator.map(u8::from),
                message_expiry_interval: props.message_expiry_interval,
                content_type: props.content_type.clone(),
                response_topic: props.response_topic.clone(),
                correlation_data: props
                    .correlation_data
                    .as_deref()
                    .map(decode_correlation_data)
                    .transpose()?,
                user_properties: props.user_properties.clone(),
            })
        })
        .transpose()?;

    Ok(v5pkt::LastWill::new(
        &will.topic,
        will.payload.clone(),
        qos_v5(will.qos),
        will.retain,
        properties,
    ))
}

fn publish_properties(
    props: &Mqtt5PublishProperties,
) -> Result<v5pkt::PublishProperties, LinkError> {
    Ok(v5pkt::PublishProperties {
        payload_format_indicator: props.payload_format_indicator.map(u8::from),
        message_expiry_interval: props.message_expiry_interval,
        content_type: props.content_type.clone(),
        response_topic: props.response_topic.clone(),
        correlation_data: props
            .correlation_data
            .as_deref()
            .map(decode_correlation_data)
            .transpose()?,
        user_properties: props.user_properties.clone(),
        ..Default::default()
    })
}

fn decode_correlation_data(encoded: &str) -> Result<Bytes, LinkError> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map(Bytes::from)
        .map_err(|e| LinkError::InvalidOptions(format!("correlation data is not base64: {e}")))
}

/// For websocket schemes rumqttc expects the full URL in the host slot.
fn broker_host(options: &ConnectionOptions) -> String {
    if options.scheme.is_websocket() {
        options.broker_url()
    } else {
        options.host.clone()
    }
}

/// Transport override for the scheme; `None` keeps the TCP default.
fn transport_for(options: &ConnectionOptions) -> Result<Option<RumqttcTransport>, LinkError> {
    match options.scheme {
        TransportScheme::Mqtt => Ok(None),
        TransportScheme::Mqtts => Ok(Some(match tls_configuration(options) {
            Some(config) => RumqttcTransport::Tls(config),
            None => RumqttcTransport::tls_with_default_config(),
        })),
        TransportScheme::Ws => Ok(Some(RumqttcTransport::Ws)),
        TransportScheme::Wss => Ok(Some(match tls_configuration(options) {
            Some(config) => RumqttcTransport::Wss(config),
            None => RumqttcTransport::wss_with_default_config(),
        })),
    }
}

/// Build a TLS configuration from user-supplied PEM material. Without a CA
/// the platform trust store applies and client certificates are ignored.
fn tls_configuration(options: &ConnectionOptions) -> Option<TlsConfiguration> {
    let tls = options.tls.as_ref()?;
    if !tls.reject_unauthorized {
        // rustls has no sanctioned insecure mode; verification stays on.
        warn!("reject_unauthorized=false is not honored; certificate verification stays enabled");
    }
    let ca = tls.ca.as_ref()?;

    let client_auth = match (&tls.cert, &tls.key) {
        (Some(cert), Some(key)) => Some((cert.clone().into_bytes(), key.clone().into_bytes())),
        (None, None) => None,
        _ => {
            warn!("client certificate and key must both be provided; ignoring partial pair");
            None
        }
    };

    Some(TlsConfiguration::Simple {
        ca: ca.clone().into_bytes(),
        alpn: None,
        client_auth,
    })
}

fn qos_v4(qos: QosLevel) -> rumqttc::QoS {
    match qos {
        QosLevel::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QosLevel::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn qos_v5(qos: QosLevel) -> rumqttc::v5::mqttbytes::QoS {
    match qos {
        QosLevel::AtMostOnce => rumqttc::v5::mqttbytes::QoS::AtMostOnce,
        QosLevel::AtLeastOnce => rumqttc::v5::mqttbytes::QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => rumqttc::v5::mqttbytes::QoS::ExactlyOnce,
    }
}

fn qos_level_v4(qos: rumqttc::QoS) -> QosLevel {
    match qos {
        rumqttc::QoS::AtMostOnce => QosLevel::AtMostOnce,
        rumqttc::QoS::AtLeastOnce => QosLevel::AtLeastOnce,
        rumqttc::QoS::ExactlyOnce => QosLevel::ExactlyOnce,
    }
}

fn qos_level_v5(qos: rumqttc::v5::mqttbytes::QoS) -> QosLevel {
    match qos {
        rumqttc::v5::mqttbytes::QoS::AtMostOnce => QosLevel::AtMostOnce,
        rumqttc::v5::mqttbytes::QoS::AtLeastOnce => QosLevel::AtLeastOnce,
        rumqttc::v5::mqttbytes::QoS::ExactlyOnce => QosLevel::ExactlyOnce,
    }
}

fn suback_code_v5(code: &v5pkt::SubscribeReasonCode) -> u8 {
    match code {
        v5pkt::SubscribeReasonCode::Success(qos) => *qos as u8,
        _ => 0x80,
    }
}

fn retain_forward_rule(retain_handling: u8) -> v5pkt::RetainForwardRule {
    match retain_handling {
        1 => v5pkt::RetainForwardRule::OnNewSubscribe,
        2 => v5pkt::RetainForwardRule::Never,
        _ => v5pkt::RetainForwardRule::OnEverySubscribe,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credentials, Mqtt5ConnectProperties, TlsOptions, WillProperties};

    fn base_options() -> ConnectionOptions {
        ConnectionOptions::tcp("localhost", 1883, "deck-link-test")
    }

    #[test]
    fn test_mqtt_options_v4_builds() {
        let mut options = base_options();
        options.credentials = Some(Credentials {
            username: "deck".to_string(),
            password: Some("secret".to_string()),
        });
        options.last_will = Some(LastWillOptions {
            topic: "deck/offline".to_string(),
            payload: "gone".to_string(),
            qos: QosLevel::AtLeastOnce,
            retain: true,
            properties: None,
        });
        assert!(mqtt_options_v4(&options).is_ok());
    }

    #[test]
    fn test_mqtt_options_v5_with_connect_properties() {
        let mut options = base_options();
        options.version = ProtocolVersion::V5;
        options.mqtt5_properties = Some(Mqtt5ConnectProperties {
            session_expiry_interval: Some(300),
            receive_maximum: Some(20),
            topic_alias_maximum: Some(10),
            ..Default::default()
        });
        assert!(mqtt_options_v5(&options).is_ok());
    }

    #[test]
    fn test_will_correlation_data_must_be_base64() {
        let will = LastWillOptions {
            topic: "deck/offline".to_string(),
            payload: "gone".to_string(),
            qos: QosLevel::AtMostOnce,
            retain: false,
            properties: Some(WillProperties {
                correlation_data: Some("!!not base64!!".to_string()),
                ..Default::default()
            }),
        };
        assert!(matches!(
            last_will_v5(&will),
            Err(LinkError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_websocket_host_is_full_url() {
        let mut options = base_options();
        options.scheme = TransportScheme::Ws;
        options.port = 8083;
        assert_eq!(broker_host(&options), "ws://localhost:8083/mqtt");

        options.scheme = TransportScheme::Mqtt;
        assert_eq!(broker_host(&options), "localhost");
    }

    #[test]
    fn test_tls_configuration_requires_ca_for_custom_config() {
        let mut options = base_options();
        options.scheme = TransportScheme::Mqtts;
        options.tls = Some(TlsOptions::default());
        assert!(tls_configuration(&options).is_none());

        options.tls = Some(TlsOptions {
            ca: Some("-----BEGIN CERTIFICATE-----".to_string()),
            ..Default::default()
        });
        assert!(tls_configuration(&options).is_some());
    }

    #[test]
    fn test_retain_forward_rule_mapping() {
        assert_eq!(
            retain_forward_rule(0),
            v5pkt::RetainForwardRule::OnEverySubscribe
        );
        assert_eq!(
            retain_forward_rule(1),
            v5pkt::RetainForwardRule::OnNewSubscribe
        );
        assert_eq!(retain_forward_rule(2), v5pkt::RetainForwardRule::Never);
    }

    #[test]
    fn test_suback_code_mapping() {
        use rumqttc::v5::mqttbytes::QoS;

        assert_eq!(
            suback_code_v5(&v5pkt::SubscribeReasonCode::Success(QoS::AtMostOnce)),
            0x00
        );
        assert_eq!(
            suback_code_v5(&v5pkt::SubscribeReasonCode::Success(QoS::ExactlyOnce)),
            0x02
        );
        assert_eq!(
            suback_code_v5(&v5pkt::SubscribeReasonCode::Unspecified),
            0x80
        );
        assert!(validate_ack_codes(&[0x01, 0x80]).is_err());
    }

    #[test]
    fn test_ack_queue_fifo_order() {
        let queues = AckQueues::default();
        let mut first = queues.push_sub();
        let mut second = queues.push_sub();

        queues.resolve_sub(Ok(()));
        assert!(matches!(first.try_recv(), Ok(Ok(()))));
        assert!(second.try_recv().is_err());

        queues.resolve_sub(Err(LinkError::Closed));
        assert!(matches!(second.try_recv(), Ok(Err(LinkError::Closed))));
    }

    #[test]
    fn test_ack_queue_fail_pending_drains_everything() {
        let queues = AckQueues::default();
        let mut sub = queues.push_sub();
        let mut unsub = queues.push_unsub();

        queues.fail_pending();
        assert!(matches!(sub.try_recv(), Ok(Err(LinkError::Closed))));
        assert!(matches!(unsub.try_recv(), Ok(Err(LinkError::Closed))));
    }
}
