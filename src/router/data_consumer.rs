use crate::data_producer::DataProducerId;
use crate::data_structures::{AppData, StatsReport, WebRtcMessage};
use crate::messages::{self, PpidData, Target, ThresholdData};
use crate::router::resource::{EngineLink, Lifecycle};
use crate::sctp_parameters::SctpStreamParameters;
use crate::transport::TransportId;
use crate::worker::RequestError;
use bytes::Bytes;
use event_listener_primitives::{Bag, BagOnce, HandlerId};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Weak};

resource_id!(
    /// [`DataConsumer`] identifier.
    DataConsumerId
);

/// What [`Transport::consume_data`](crate::transport::Transport::consume_data) needs to forward
/// a data producer.
///
/// Reliability settings only matter over SCTP. Those left unset are inherited from the data
/// producer, a direct data producer has none and gives an ordered stream.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct DataConsumerOptions {
    pub(super) data_producer_id: DataProducerId,
    pub(super) ordered: Option<bool>,
    /// Milliseconds after which an unordered message is no longer retransmitted.
    pub(super) max_packet_life_time: Option<u16>,
    /// Times an unordered message is retransmitted at most.
    pub(super) max_retransmits: Option<u16>,
    /// Application data.
    pub app_data: AppData,
}

impl DataConsumerOptions {
    fn with_reliability(
        data_producer_id: DataProducerId,
        ordered: Option<bool>,
        max_packet_life_time: Option<u16>,
        max_retransmits: Option<u16>,
    ) -> Self {
        Self {
            data_producer_id,
            ordered,
            max_packet_life_time,
            max_retransmits,
            app_data: AppData::default(),
        }
    }

    /// Same reliability as the data producer.
    #[must_use]
    pub fn new_sctp(data_producer_id: DataProducerId) -> Self {
        Self::with_reliability(data_producer_id, None, None, None)
    }

    /// Messages handed to the application, on a
    /// [`DirectTransport`](crate::direct_transport::DirectTransport).
    #[must_use]
    pub fn new_direct(data_producer_id: DataProducerId) -> Self {
        Self::with_reliability(data_producer_id, Some(true), None, None)
    }

    /// Reliable and ordered.
    #[must_use]
    pub fn new_sctp_ordered(data_producer_id: DataProducerId) -> Self {
        Self::with_reliability(data_producer_id, Some(true), None, None)
    }

    /// Unordered, retransmitted for at most `max_packet_life_time` ms.
    #[must_use]
    pub fn new_sctp_unordered_with_life_time(
        data_producer_id: DataProducerId,
        max_packet_life_time: u16,
    ) -> Self {
        Self::with_reliability(data_producer_id, Some(false), Some(max_packet_life_time), None)
    }

    /// Unordered, retransmitted at most `max_retransmits` times.
    #[must_use]
    pub fn new_sctp_unordered_with_retransmits(
        data_producer_id: DataProducerId,
        max_retransmits: u16,
    ) -> Self {
        Self::with_reliability(data_producer_id, Some(false), None, Some(max_retransmits))
    }
}

/// Where the messages of a data consumer go.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataConsumerType {
    /// SCTP stream of a network transport.
    Sctp,
    /// The application, see [`DataConsumer::on_message`].
    Direct,
}

/// Engine-side snapshot of a data consumer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DataConsumerDump {
    /// Data consumer id.
    pub id: DataConsumerId,
    /// Forwarded data producer.
    pub data_producer_id: DataProducerId,
    /// Where messages go.
    #[serde(rename = "type")]
    pub data_consumer_type: DataConsumerType,
    /// Data channel label.
    pub label: String,
    /// Data channel sub-protocol.
    pub protocol: String,
    /// Everything else the engine reported.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    DataProducerClose,
    SctpSendBufferFull,
    #[serde(rename_all = "camelCase")]
    BufferedAmountLow { buffered_amount: u32 },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum PayloadNotification {
    Message { ppid: u32 },
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    message: Bag<Arc<dyn Fn(&WebRtcMessage) + Send + Sync>, WebRtcMessage>,
    sctp_send_buffer_full: Bag<Arc<dyn Fn() + Send + Sync>>,
    buffered_amount_low: Bag<Arc<dyn Fn(u32) + Send + Sync>>,
    data_producer_close: BagOnce<Box<dyn FnOnce() + Send>>,
}

/// Everything a transport learned while creating a data consumer.
pub(super) struct DataConsumerSetup {
    pub(super) id: DataConsumerId,
    pub(super) data_producer_id: DataProducerId,
    pub(super) transport_id: TransportId,
    pub(super) data_consumer_type: DataConsumerType,
    pub(super) sctp_stream_parameters: Option<SctpStreamParameters>,
    pub(super) label: String,
    pub(super) protocol: String,
}

struct Inner {
    setup: DataConsumerSetup,
    target: Target,
    link: EngineLink,
    handlers: Handlers,
    app_data: AppData,
    lifecycle: Lifecycle,
}

impl Drop for Inner {
    fn drop(&mut self) {
        debug!("drop()");

        self.close();
    }
}

impl Inner {
    fn close(&self) {
        if self.lifecycle.close(|| {}) {
            debug!("close() [id:{}]", self.setup.id);

            self.link
                .spawn_close(messages::data_consumer_close(self.target));
        }
    }

    fn handle_notification(&self, notification: Notification) {
        match notification {
            Notification::DataProducerClose => {
                if !self.lifecycle.closed() {
                    self.handlers.data_producer_close.call_simple();
                    // The engine already dropped the data consumer
                    self.lifecycle.close(|| {});
                }
            }
            Notification::SctpSendBufferFull => {
                self.handlers.sctp_send_buffer_full.call_simple();
            }
            Notification::BufferedAmountLow { buffered_amount } => {
                self.handlers
                    .buffered_amount_low
                    .call(|callback| callback(buffered_amount));
            }
        }
    }

    fn handle_message(&self, notification: PayloadNotification, payload: Bytes) {
        let PayloadNotification::Message { ppid } = notification;

        match WebRtcMessage::new(ppid, payload) {
            Ok(message) => self.handlers.message.call_simple(&message),
            Err(error) => error!("failed to decode message: {}", error),
        }
    }
}

/// Data consumer sending over SCTP to the remote endpoint.
#[derive(Clone)]
#[must_use = "Data consumer will be closed on drop, make sure to keep it around for as long as needed"]
pub struct RegularDataConsumer {
    inner: Arc<Inner>,
}

impl fmt::Debug for RegularDataConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegularDataConsumer")
            .field("id", &self.inner.setup.id)
            .field("data_producer_id", &self.inner.setup.data_producer_id)
            .field("label", &self.inner.setup.label)
            .field("lifecycle", &self.inner.lifecycle)
            .finish()
    }
}

impl From<RegularDataConsumer> for DataConsumer {
    fn from(data_consumer: RegularDataConsumer) -> Self {
        DataConsumer::Regular(data_consumer)
    }
}

/// Data consumer handing messages to the application, see [`DataConsumer::on_message`].
#[derive(Clone)]
#[must_use = "Data consumer will be closed on drop, make sure to keep it around for as long as needed"]
pub struct DirectDataConsumer {
    inner: Arc<Inner>,
}

impl fmt::Debug for DirectDataConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectDataConsumer")
            .field("id", &self.inner.setup.id)
            .field("data_producer_id", &self.inner.setup.data_producer_id)
            .field("label", &self.inner.setup.label)
            .field("lifecycle", &self.inner.lifecycle)
            .finish()
    }
}

impl From<DirectDataConsumer> for DataConsumer {
    fn from(data_consumer: DirectDataConsumer) -> Self {
        DataConsumer::Direct(data_consumer)
    }
}

/// Messages of one data producer on their way out of the router.
#[derive(Debug, Clone)]
#[non_exhaustive]
#[must_use = "Data consumer will be closed on drop, make sure to keep it around for as long as needed"]
pub enum DataConsumer {
    /// Over SCTP.
    Regular(RegularDataConsumer),
    /// To the application.
    Direct(DirectDataConsumer),
}

impl DataConsumer {
    pub(super) fn new(
        setup: DataConsumerSetup,
        target: Target,
        link: EngineLink,
        app_data: AppData,
    ) -> Self {
        debug!("new() [id:{}]", setup.id);

        let id = setup.id;
        let inner = Arc::new_cyclic(|inner_weak: &Weak<Inner>| {
            let lifecycle = Lifecycle::default();

            lifecycle.keep({
                let inner_weak = inner_weak.clone();

                link.subscribe(id, move |notification: Notification| {
                    if let Some(inner) = inner_weak.upgrade() {
                        inner.handle_notification(notification);
                    }
                })
            });

            lifecycle.keep({
                let inner_weak = inner_weak.clone();

                link.subscribe_payload(id, move |notification: PayloadNotification, payload| {
                    if let Some(inner) = inner_weak.upgrade() {
                        inner.handle_message(notification, payload);
                    }
                })
            });

            Inner {
                setup,
                target,
                link,
                handlers: Handlers::default(),
                app_data,
                lifecycle,
            }
        });

        Self::from_inner(inner)
    }

    fn from_inner(inner: Arc<Inner>) -> Self {
        match inner.setup.data_consumer_type {
            DataConsumerType::Sctp => Self::Regular(RegularDataConsumer { inner }),
            DataConsumerType::Direct => Self::Direct(DirectDataConsumer { inner }),
        }
    }

    fn inner(&self) -> &Arc<Inner> {
        match self {
            DataConsumer::Regular(data_consumer) => &data_consumer.inner,
            DataConsumer::Direct(data_consumer) => &data_consumer.inner,
        }
    }

    #[must_use]
    pub fn id(&self) -> DataConsumerId {
        self.inner().setup.id
    }

    /// Forwarded data producer.
    #[must_use]
    pub fn data_producer_id(&self) -> DataProducerId {
        self.inner().setup.data_producer_id
    }

    /// Transport the data consumer was created on.
    #[must_use]
    pub fn transport_id(&self) -> TransportId {
        self.inner().setup.transport_id
    }

    #[must_use]
    pub fn r#type(&self) -> DataConsumerType {
        self.inner().setup.data_consumer_type
    }

    /// Stream the messages go out on, `None` for direct data consumers.
    #[must_use]
    pub fn sctp_stream_parameters(&self) -> Option<SctpStreamParameters> {
        self.inner().setup.sctp_stream_parameters
    }

    #[must_use]
    pub fn label(&self) -> &String {
        &self.inner().setup.label
    }

    #[must_use]
    pub fn protocol(&self) -> &String {
        &self.inner().setup.protocol
    }

    #[must_use]
    pub fn app_data(&self) -> &AppData {
        &self.inner().app_data
    }

    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner().lifecycle.closed()
    }

    /// Engine-side snapshot of the data consumer.
    pub async fn dump(&self) -> Result<DataConsumerDump, RequestError> {
        debug!("dump()");

        let inner = self.inner();
        inner
            .link
            .request(messages::data_consumer_dump(inner.target))
            .await
    }

    /// Message and byte counters.
    pub async fn get_stats(&self) -> Result<Vec<StatsReport>, RequestError> {
        debug!("get_stats()");

        let inner = self.inner();
        inner
            .link
            .request(messages::data_consumer_get_stats(inner.target))
            .await
    }

    /// Bytes waiting in the SCTP send buffer.
    pub async fn get_buffered_amount(&self) -> Result<u32, RequestError> {
        debug!("get_buffered_amount()");

        let inner = self.inner();
        let reply = inner
            .link
            .request(messages::data_consumer_get_buffered_amount(inner.target))
            .await?;

        Ok(reply.buffered_amount)
    }

    /// Buffered amount below which [`DataConsumer::on_buffered_amount_low`] fires.
    pub async fn set_buffered_amount_low_threshold(
        &self,
        threshold: u32,
    ) -> Result<(), RequestError> {
        debug!("set_buffered_amount_low_threshold() [threshold:{}]", threshold);

        let inner = self.inner();
        inner
            .link
            .request(messages::data_consumer_set_buffered_amount_low_threshold(
                inner.target,
                ThresholdData { threshold },
            ))
            .await
    }

    pub fn close(&self) {
        self.inner().close();
    }

    /// Message of the data producer reached a direct data consumer.
    pub fn on_message<F: Fn(&WebRtcMessage) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner().handlers.message.add(Arc::new(callback))
    }

    /// Message was dropped, the SCTP send buffer is full.
    pub fn on_sctp_send_buffer_full<F: Fn() + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner()
            .handlers
            .sctp_send_buffer_full
            .add(Arc::new(callback))
    }

    /// Buffered amount fell to the threshold set with
    /// [`DataConsumer::set_buffered_amount_low_threshold`].
    pub fn on_buffered_amount_low<F: Fn(u32) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner()
            .handlers
            .buffered_amount_low
            .add(Arc::new(callback))
    }

    /// Data producer was closed, which closes the data consumer as well.
    pub fn on_data_producer_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner()
            .handlers
            .data_producer_close
            .add(Box::new(callback))
    }

    /// Transport was closed, which closes the data consumer as well.
    pub fn on_transport_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner().lifecycle.on_parent_close(callback)
    }

    /// Data consumer was closed, for whatever reason. Runs right away if it already is.
    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner().lifecycle.on_close(callback)
    }

    pub(super) fn transport_closed(&self) {
        self.inner().lifecycle.parent_closed(|| {});
    }
}

impl DirectDataConsumer {
    /// Sends a message to the remote endpoint of this data consumer's transport.
    pub async fn send(&self, message: WebRtcMessage) -> Result<(), RequestError> {
        let (ppid, payload) = message.into_ppid_and_payload();

        self.inner
            .link
            .payload_channel()
            .request(
                messages::data_consumer_send(self.inner.target, PpidData { ppid }),
                payload,
            )
            .await
    }
}

weak_handle!(
    /// Handle that doesn't keep the data consumer open.
    WeakDataConsumer => enum DataConsumer
);
