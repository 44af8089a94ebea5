//! Functionality every transport kind shares: the [`Transport`] and [`TransportGeneric`] traits,
//! the errors their operations return and the bookkeeping of what was created on a transport.
//!
//! Transport kinds:
//! * [`WebRtcTransport`](crate::webrtc_transport::WebRtcTransport)
//! * [`PlainTransport`](crate::plain_transport::PlainTransport)
//! * [`PipeTransport`](crate::pipe_transport::PipeTransport)
//! * [`DirectTransport`](crate::direct_transport::DirectTransport)

use crate::consumer::{Consumer, ConsumerId, ConsumerOptions, ConsumerType};
use crate::router::consumer::ConsumerSetup;
use crate::data_consumer::{
    DataConsumer, DataConsumerId, DataConsumerOptions, DataConsumerType,
};
use crate::router::data_consumer::DataConsumerSetup;
use crate::data_producer::{
    DataProducer, DataProducerId, DataProducerOptions, DataProducerType,
};
use crate::router::data_producer::DataProducerSetup;
use crate::data_structures::{AppData, StatsReport, TraceEvent};
use crate::messages::{
    self, BitrateData, ConsumeData, DataChannelData, ProduceData, Target, TraceEventTypes,
};
use crate::ortc::{
    self, ConsumerRtpParametersError, RtpCapabilitiesError, RtpParametersError,
    RtpParametersMappingError, SctpStreamParametersError,
};
use crate::producer::{Producer, ProducerId, ProducerOptions};
use crate::router::producer::ProducerSetup;
use crate::router::resource::{parse_notification, EngineLink, Lifecycle};
use crate::router::{Router, RouterId};
use crate::rtp_parameters::{MediaKind, RtpEncodingParameters};
use crate::sctp_parameters::{SctpParameters, SctpStreamParameters};
use crate::worker::RequestError;
use async_trait::async_trait;
use event_listener_primitives::{Bag, HandlerId};
use hash_hasher::HashedMap;
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

resource_id!(
    /// Transport identifier.
    TransportId
);

/// Transport trace event kinds.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportTraceEventType {
    /// Probation packet sent for bandwidth estimation.
    Probation,
    /// Bandwidth estimation update.
    Bwe,
}

/// Trace event emitted by a transport after [`Transport::enable_trace_event`].
pub type TransportTraceEvent = TraceEvent<TransportTraceEventType>;

/// Snapshot of a transport as the engine sees it. Ids of what lives on the transport are parsed,
/// the rest depends on the transport kind and is kept as is.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TransportDump {
    /// Transport id.
    pub id: TransportId,
    /// Producers on this transport.
    #[serde(default)]
    pub producer_ids: Vec<ProducerId>,
    /// Consumers on this transport.
    #[serde(default)]
    pub consumer_ids: Vec<ConsumerId>,
    /// Data producers on this transport.
    #[serde(default)]
    pub data_producer_ids: Vec<DataProducerId>,
    /// Data consumers on this transport.
    #[serde(default)]
    pub data_consumer_ids: Vec<DataConsumerId>,
    /// Everything else the engine reported.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Operations available on every transport kind.
///
/// Event subscriptions, dump and stats live in [`TransportGeneric`].
#[async_trait(?Send)]
pub trait Transport
where
    Self: Send + Sync,
{
    /// Transport id.
    fn id(&self) -> TransportId;

    /// Id of the router the transport belongs to.
    fn router_id(&self) -> RouterId;

    /// Application data given on creation.
    fn app_data(&self) -> &AppData;

    /// Whether the transport was closed.
    fn closed(&self) -> bool;

    /// Starts receiving media from the remote endpoint into the router.
    async fn produce(&self, producer_options: ProducerOptions) -> Result<Producer, ProduceError>;

    /// Starts sending media of a producer to the remote endpoint.
    ///
    /// Consumers are usually created paused and resumed once the remote endpoint is ready to
    /// receive, so that no key frame gets lost.
    async fn consume(&self, consumer_options: ConsumerOptions) -> Result<Consumer, ConsumeError>;

    /// Starts receiving data messages, over SCTP or from the application itself on a
    /// [`DirectTransport`](crate::direct_transport::DirectTransport).
    async fn produce_data(
        &self,
        data_producer_options: DataProducerOptions,
    ) -> Result<DataProducer, ProduceDataError>;

    /// Starts sending messages of a data producer, over SCTP or to the application itself on a
    /// [`DirectTransport`](crate::direct_transport::DirectTransport).
    async fn consume_data(
        &self,
        data_consumer_options: DataConsumerOptions,
    ) -> Result<DataConsumer, ConsumeDataError>;

    /// Caps the bitrate the remote endpoint may send with, in bps.
    async fn set_max_incoming_bitrate(&self, bitrate: u32) -> Result<(), RequestError>;

    /// Selects which trace events the engine emits for this transport, see
    /// [`TransportGeneric::on_trace`].
    async fn enable_trace_event(
        &self,
        types: Vec<TransportTraceEventType>,
    ) -> Result<(), RequestError>;
}

/// Inspection and events available on every transport kind.
#[async_trait(?Send)]
pub trait TransportGeneric: Transport + Clone {
    /// Engine-side snapshot of the transport.
    async fn dump(&self) -> Result<TransportDump, RequestError>;

    /// Statistics reports, their content depends on the transport kind.
    async fn get_stats(&self) -> Result<Vec<StatsReport>, RequestError>;

    /// Producer was created on this transport.
    fn on_new_producer<F: Fn(&Producer) + Send + Sync + 'static>(&self, callback: F) -> HandlerId;

    /// Consumer was created on this transport.
    fn on_new_consumer<F: Fn(&Consumer) + Send + Sync + 'static>(&self, callback: F) -> HandlerId;

    /// Data producer was created on this transport.
    fn on_new_data_producer<F: Fn(&DataProducer) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId;

    /// Data consumer was created on this transport.
    fn on_new_data_consumer<F: Fn(&DataConsumer) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId;

    /// Trace event enabled with [`Transport::enable_trace_event`].
    fn on_trace<F: Fn(&TransportTraceEvent) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId;

    /// Router was closed, which closes the transport as well.
    fn on_router_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId;

    /// Transport was closed, for whatever reason. Runs right away if it already is.
    fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId;
}

/// Failure of [`Transport::produce`].
#[derive(Debug, Error)]
pub enum ProduceError {
    /// Another producer in the router already uses this id.
    #[error("Producer with the same id \"{0}\" already exists")]
    AlreadyExists(ProducerId),
    /// Malformed RTP parameters.
    #[error("Incorrect RTP parameters: {0}")]
    IncorrectRtpParameters(RtpParametersError),
    /// RTP parameters don't map onto the router capabilities.
    #[error("RTP mapping error: {0}")]
    FailedRtpParametersMapping(RtpParametersMappingError),
    /// Transport closed while the request was in flight.
    #[error("Transport closed")]
    TransportClosed,
    /// Engine request failed.
    #[error("Request to worker failed: {0}")]
    Request(RequestError),
}

/// Failure of [`Transport::consume`].
#[derive(Debug, Error)]
pub enum ConsumeError {
    /// No producer with this id in the router.
    #[error("Producer with id \"{0}\" not found")]
    ProducerNotFound(ProducerId),
    /// Malformed RTP capabilities.
    #[error("RTP capabilities error: {0}")]
    FailedRtpCapabilitiesValidation(RtpCapabilitiesError),
    /// Producer can't be consumed with these capabilities.
    #[error("Bad consumer RTP parameters: {0}")]
    BadConsumerRtpParameters(ConsumerRtpParametersError),
    /// MID was given, but empty.
    #[error("MID must not be empty")]
    EmptyMid,
    /// Transport closed while the request was in flight.
    #[error("Transport closed")]
    TransportClosed,
    /// Engine request failed.
    #[error("Request to worker failed: {0}")]
    Request(RequestError),
}

/// Failure of [`Transport::produce_data`].
#[derive(Debug, Error)]
pub enum ProduceDataError {
    /// Another data producer in the router already uses this id.
    #[error("Data producer with the same id \"{0}\" already exists")]
    AlreadyExists(DataProducerId),
    /// SCTP transports need SCTP stream parameters.
    #[error("SCTP stream parameters are required for this transport")]
    SctpStreamParametersRequired,
    /// Malformed SCTP stream parameters.
    #[error("Incorrect SCTP stream parameters: {0}")]
    IncorrectSctpStreamParameters(SctpStreamParametersError),
    /// Transport closed while the request was in flight.
    #[error("Transport closed")]
    TransportClosed,
    /// Engine request failed.
    #[error("Request to worker failed: {0}")]
    Request(RequestError),
}

/// Failure of [`Transport::consume_data`].
#[derive(Debug, Error)]
pub enum ConsumeDataError {
    /// No data producer with this id in the router.
    #[error("Data producer with id \"{0}\" not found")]
    DataProducerNotFound(DataProducerId),
    /// Every SCTP stream of the transport is taken.
    #[error("No free sctp_stream_id available in transport")]
    NoSctpStreamId,
    /// Transport closed while the request was in flight.
    #[error("Transport closed")]
    TransportClosed,
    /// Engine request failed.
    #[error("Request to worker failed: {0}")]
    Request(RequestError),
}

/// What sets transport kinds apart as far as shared operations are concerned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(super) enum TransportKind {
    Direct,
    Pipe { rtx: bool },
    Plain,
    WebRtc,
}

/// SCTP stream ids in use by data consumers of one transport, one slot per negotiated incoming
/// stream.
#[derive(Debug, Clone, Default)]
pub(super) struct SctpStreamIds {
    used: Arc<Mutex<Vec<bool>>>,
}

impl SctpStreamIds {
    pub(super) fn new(sctp_parameters: Option<&SctpParameters>) -> Self {
        let streams = sctp_parameters.map_or(0, |sctp_parameters| sctp_parameters.mis);

        Self {
            used: Arc::new(Mutex::new(vec![false; usize::from(streams)])),
        }
    }

    /// Claims the lowest free stream id.
    pub(super) fn allocate(&self) -> Option<u16> {
        let mut used = self.used.lock();
        let index = used.iter().position(|used| !used)?;
        used[index] = true;

        u16::try_from(index).ok()
    }

    pub(super) fn deallocate(&self, stream_id: u16) {
        if let Some(used) = self.used.lock().get_mut(usize::from(stream_id)) {
            *used = false;
        }
    }
}

type ChildMap<Id, Child> = Arc<Mutex<HashedMap<Id, Child>>>;

/// Producers, consumers, data producers and data consumers owned by one transport.
#[derive(Default)]
struct TransportChildren {
    producers: ChildMap<ProducerId, Producer>,
    consumers: ChildMap<ConsumerId, Consumer>,
    data_producers: ChildMap<DataProducerId, DataProducer>,
    data_consumers: ChildMap<DataConsumerId, DataConsumer>,
}

/// Keeps `child` in `map` for as long as it stays open.
fn adopt<Id, Child, F>(map: &ChildMap<Id, Child>, id: Id, child: &Child, on_close: F)
where
    Id: Hash + Eq + Copy + Send + 'static,
    Child: Clone + Send + 'static,
    F: FnOnce(Box<dyn FnOnce() + Send>) -> HandlerId,
{
    map.lock().insert(id, child.clone());

    let map = Arc::downgrade(map);
    on_close(Box::new(move || {
        if let Some(map) = map.upgrade() {
            map.lock().remove(&id);
        }
    }))
    .detach();
}

/// Empties `map` and hands every child to `closed` once the lock is released, children remove
/// themselves from the same map while closing.
fn orphan_all<Id, Child>(map: &ChildMap<Id, Child>, closed: impl FnMut(Child)) {
    let children = map
        .lock()
        .drain()
        .map(|(_, child)| child)
        .collect::<Vec<_>>();

    children.into_iter().for_each(closed);
}

impl TransportChildren {
    fn transport_closed(&self) {
        orphan_all(&self.producers, |producer| producer.transport_closed());
        orphan_all(&self.consumers, |consumer| consumer.transport_closed());
        orphan_all(&self.data_producers, |data_producer| {
            data_producer.transport_closed();
        });
        orphan_all(&self.data_consumers, |data_consumer| {
            data_consumer.transport_closed();
        });
    }
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
pub(super) struct CommonHandlers {
    pub(super) new_producer: Bag<Arc<dyn Fn(&Producer) + Send + Sync>, Producer>,
    pub(super) new_consumer: Bag<Arc<dyn Fn(&Consumer) + Send + Sync>, Consumer>,
    pub(super) new_data_producer: Bag<Arc<dyn Fn(&DataProducer) + Send + Sync>, DataProducer>,
    pub(super) new_data_consumer: Bag<Arc<dyn Fn(&DataConsumer) + Send + Sync>, DataConsumer>,
    pub(super) trace: Bag<Arc<dyn Fn(&TransportTraceEvent) + Send + Sync>, TransportTraceEvent>,
}

/// State and operations shared by all transport kinds, each kind wraps one together with its
/// own state.
///
/// Dropping the core closes the transport.
pub(super) struct TransportCore {
    id: TransportId,
    kind: TransportKind,
    router: Router,
    link: EngineLink,
    app_data: AppData,
    handlers: Arc<CommonHandlers>,
    lifecycle: Lifecycle,
    children: TransportChildren,
    sctp_stream_ids: SctpStreamIds,
    cname: Mutex<Option<String>>,
    next_mid: AtomicUsize,
}

impl fmt::Debug for TransportCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCore")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("router_id", &self.router.id())
            .field("closed", &self.closed())
            .finish()
    }
}

impl Drop for TransportCore {
    fn drop(&mut self) {
        debug!("drop()");

        self.close();
    }
}

impl TransportCore {
    /// Control channel notifications other than traces go to `on_notification`.
    pub(super) fn new<F>(
        id: TransportId,
        kind: TransportKind,
        router: Router,
        app_data: AppData,
        sctp_parameters: Option<&SctpParameters>,
        on_notification: F,
    ) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        debug!("new() [id:{}, kind:{:?}]", id, kind);

        let link = router.link().clone();
        let handlers = Arc::<CommonHandlers>::default();
        let lifecycle = Lifecycle::default();

        lifecycle.keep({
            let handlers = Arc::clone(&handlers);

            link.channel()
                .subscribe_to_notifications(id.into(), move |mut notification: Value| {
                    if notification["event"] != "trace" {
                        on_notification(notification);
                        return;
                    }

                    let data = notification
                        .get_mut("data")
                        .map(Value::take)
                        .unwrap_or_default();
                    if let Some(trace) = parse_notification(data) {
                        handlers.trace.call_simple(&trace);
                    }
                })
        });

        Self {
            id,
            kind,
            router,
            link,
            app_data,
            handlers,
            lifecycle,
            children: TransportChildren::default(),
            sctp_stream_ids: SctpStreamIds::new(sctp_parameters),
            cname: Mutex::default(),
            next_mid: AtomicUsize::default(),
        }
    }

    pub(super) fn id(&self) -> TransportId {
        self.id
    }

    pub(super) fn router(&self) -> &Router {
        &self.router
    }

    pub(super) fn link(&self) -> &EngineLink {
        &self.link
    }

    pub(super) fn app_data(&self) -> &AppData {
        &self.app_data
    }

    pub(super) fn handlers(&self) -> &CommonHandlers {
        &self.handlers
    }

    pub(super) fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub(super) fn closed(&self) -> bool {
        self.lifecycle.closed()
    }

    pub(super) fn target(&self) -> Target {
        Target::router(self.router.id()).transport(self.id)
    }

    pub(super) fn close(&self) {
        if self.lifecycle.close(|| self.children.transport_closed()) {
            debug!("close() [id:{}]", self.id);

            self.link.spawn_close(messages::transport_close(self.target()));
        }
    }

    /// Router went away, the engine already dropped this transport.
    pub(super) fn router_closed(&self) {
        self.lifecycle
            .parent_closed(|| self.children.transport_closed());
    }

    pub(super) async fn dump(&self) -> Result<TransportDump, RequestError> {
        debug!("dump()");

        self.link.request(messages::transport_dump(self.target())).await
    }

    pub(super) async fn get_stats(&self) -> Result<Vec<StatsReport>, RequestError> {
        debug!("get_stats()");

        self.link
            .request(messages::transport_get_stats(self.target()))
            .await
    }

    pub(super) async fn set_max_incoming_bitrate(&self, bitrate: u32) -> Result<(), RequestError> {
        debug!("set_max_incoming_bitrate() [bitrate:{}]", bitrate);

        self.link
            .request(messages::transport_set_max_incoming_bitrate(
                self.target(),
                BitrateData { bitrate },
            ))
            .await
    }

    pub(super) async fn enable_trace_event(
        &self,
        types: Vec<TransportTraceEventType>,
    ) -> Result<(), RequestError> {
        debug!("enable_trace_event()");

        self.link
            .request(messages::transport_enable_trace_event(
                self.target(),
                TraceEventTypes { types },
            ))
            .await
    }

    /// CNAME shared by every producer on the transport: the first one given wins, later
    /// producers are rewritten to use it.
    fn settle_cname(&self, cname: &mut Option<String>) {
        let mut transport_cname = self.cname.lock();
        match (transport_cname.as_ref(), cname.as_ref()) {
            (Some(existing), _) => {
                *cname = Some(existing.clone());
            }
            (None, Some(given)) => {
                *transport_cname = Some(given.clone());
            }
            (None, None) => {
                let generated = Uuid::new_v4().to_string();
                *transport_cname = Some(generated.clone());
                *cname = Some(generated);
            }
        }
    }

    /// MID for the next consumer, at most 8 digits long.
    fn next_mid(&self) -> String {
        (self.next_mid.fetch_add(1, Ordering::Relaxed) % 100_000_000).to_string()
    }

    pub(super) async fn produce(
        &self,
        producer_options: ProducerOptions,
    ) -> Result<Producer, ProduceError> {
        debug!("produce()");

        let ProducerOptions {
            id,
            kind,
            mut rtp_parameters,
            paused,
            key_frame_request_delay,
            app_data,
        } = producer_options;

        if let Some(id) = id {
            if self.router.has_producer(&id) {
                return Err(ProduceError::AlreadyExists(id));
            }
        }

        ortc::validate_rtp_parameters(&rtp_parameters)
            .map_err(ProduceError::IncorrectRtpParameters)?;

        if rtp_parameters.encodings.is_empty() {
            rtp_parameters
                .encodings
                .push(RtpEncodingParameters::default());
        }

        // Pipe transports carry producers of many endpoints, each keeps its own CNAME
        if !matches!(self.kind, TransportKind::Pipe { .. }) {
            self.settle_cname(&mut rtp_parameters.rtcp.cname);
        }

        let capabilities = self.router.rtp_capabilities();
        let rtp_mapping = ortc::get_producer_rtp_parameters_mapping(&rtp_parameters, capabilities)
            .map_err(ProduceError::FailedRtpParametersMapping)?;
        let consumable_rtp_parameters =
            ortc::get_consumable_rtp_parameters(kind, &rtp_parameters, capabilities, &rtp_mapping);

        let producer_id = id.unwrap_or_else(ProducerId::new);
        let target = self.target().producer(producer_id);

        let reply = self
            .link
            .request(messages::transport_produce(
                target,
                ProduceData {
                    kind,
                    rtp_parameters: rtp_parameters.clone(),
                    rtp_mapping,
                    key_frame_request_delay,
                    paused,
                },
            ))
            .await
            .map_err(ProduceError::Request)?;

        let producer = Producer::new(
            ProducerSetup {
                id: producer_id,
                transport_id: self.id,
                kind,
                producer_type: reply.producer_type,
                rtp_parameters,
                consumable_rtp_parameters,
                paused,
                direct: self.kind == TransportKind::Direct,
            },
            target,
            self.link.clone(),
            app_data,
        );

        if self.closed() {
            producer.transport_closed();
            return Err(ProduceError::TransportClosed);
        }

        adopt(&self.children.producers, producer_id, &producer, |callback| {
            producer.on_close(callback)
        });
        self.handlers.new_producer.call_simple(&producer);

        Ok(producer)
    }

    pub(super) async fn consume(
        &self,
        consumer_options: ConsumerOptions,
    ) -> Result<Consumer, ConsumeError> {
        debug!("consume()");

        let ConsumerOptions {
            producer_id,
            rtp_capabilities,
            paused,
            mid,
            preferred_layers,
            enable_rtx,
            ignore_dtx,
            pipe,
            app_data,
        } = consumer_options;

        if mid.as_deref() == Some("") {
            return Err(ConsumeError::EmptyMid);
        }

        let pipe_rtx = match self.kind {
            TransportKind::Pipe { rtx } => Some(rtx),
            _ => None,
        };

        // The other end of a pipe transport is a router, it takes whatever the producer sends
        if pipe_rtx.is_none() {
            ortc::validate_rtp_capabilities(&rtp_capabilities)
                .map_err(ConsumeError::FailedRtpCapabilitiesValidation)?;
        }

        let producer = self
            .router
            .get_producer(&producer_id)
            .ok_or(ConsumeError::ProducerNotFound(producer_id))?;
        let consumable_rtp_parameters = producer.consumable_rtp_parameters();

        let rtp_parameters = match pipe_rtx {
            Some(rtx) => ortc::get_pipe_consumer_rtp_parameters(consumable_rtp_parameters, rtx),
            None => {
                let enable_rtx = enable_rtx.unwrap_or(producer.kind() == MediaKind::Video);
                let mut rtp_parameters = ortc::get_consumer_rtp_parameters(
                    consumable_rtp_parameters,
                    &rtp_capabilities,
                    pipe,
                    enable_rtx,
                )
                .map_err(ConsumeError::BadConsumerRtpParameters)?;

                if !pipe {
                    rtp_parameters.mid = Some(mid.unwrap_or_else(|| self.next_mid()));
                }

                rtp_parameters
            }
        };

        let consumer_type = if pipe_rtx.is_some() || pipe {
            ConsumerType::Pipe
        } else {
            producer.r#type().into()
        };

        let consumer_id = ConsumerId::new();
        let target = self.target().consumer(consumer_id).producer(producer_id);

        let reply = self
            .link
            .request(messages::transport_consume(
                target,
                ConsumeData {
                    kind: producer.kind(),
                    rtp_parameters: rtp_parameters.clone(),
                    consumer_type,
                    consumable_rtp_encodings: consumable_rtp_parameters.encodings.clone(),
                    paused,
                    preferred_layers,
                    ignore_dtx,
                },
            ))
            .await
            .map_err(ConsumeError::Request)?;

        let consumer = Consumer::new(
            ConsumerSetup {
                id: consumer_id,
                producer_id,
                transport_id: self.id,
                kind: producer.kind(),
                consumer_type,
                rtp_parameters,
                paused: reply.paused,
                producer_paused: reply.producer_paused,
                score: reply.score,
                preferred_layers: reply.preferred_layers,
            },
            target,
            self.link.clone(),
            app_data,
        );

        if self.closed() {
            consumer.transport_closed();
            return Err(ConsumeError::TransportClosed);
        }

        adopt(&self.children.consumers, consumer_id, &consumer, |callback| {
            consumer.on_close(callback)
        });
        self.handlers.new_consumer.call_simple(&consumer);

        Ok(consumer)
    }

    pub(super) async fn produce_data(
        &self,
        data_producer_options: DataProducerOptions,
    ) -> Result<DataProducer, ProduceDataError> {
        debug!("produce_data()");

        let DataProducerOptions {
            id,
            sctp_stream_parameters,
            label,
            protocol,
            app_data,
        } = data_producer_options;

        if let Some(id) = id {
            if self.router.has_data_producer(&id) {
                return Err(ProduceDataError::AlreadyExists(id));
            }
        }

        let (data_producer_type, sctp_stream_parameters) = if self.kind == TransportKind::Direct {
            if sctp_stream_parameters.is_some() {
                warn!("produce_data() | SCTP stream parameters are ignored on a direct transport");
            }

            (DataProducerType::Direct, None)
        } else {
            let sctp_stream_parameters =
                sctp_stream_parameters.ok_or(ProduceDataError::SctpStreamParametersRequired)?;
            ortc::validate_sctp_stream_parameters(&sctp_stream_parameters)
                .map_err(ProduceDataError::IncorrectSctpStreamParameters)?;

            (DataProducerType::Sctp, Some(sctp_stream_parameters))
        };

        let data_producer_id = id.unwrap_or_else(DataProducerId::new);
        let target = self.target().data_producer(data_producer_id);

        let reply = self
            .link
            .request(messages::transport_produce_data(
                target,
                DataChannelData {
                    channel_type: data_producer_type,
                    sctp_stream_parameters,
                    label,
                    protocol,
                },
            ))
            .await
            .map_err(ProduceDataError::Request)?;

        let data_producer = DataProducer::new(
            DataProducerSetup {
                id: data_producer_id,
                transport_id: self.id,
                data_producer_type: reply.channel_type,
                sctp_stream_parameters: reply.sctp_stream_parameters,
                label: reply.label,
                protocol: reply.protocol,
            },
            target,
            self.link.clone(),
            app_data,
        );

        if self.closed() {
            data_producer.transport_closed();
            return Err(ProduceDataError::TransportClosed);
        }

        adopt(
            &self.children.data_producers,
            data_producer_id,
            &data_producer,
            |callback| data_producer.on_close(callback),
        );
        self.handlers.new_data_producer.call_simple(&data_producer);

        Ok(data_producer)
    }

    pub(super) async fn consume_data(
        &self,
        data_consumer_options: DataConsumerOptions,
    ) -> Result<DataConsumer, ConsumeDataError> {
        debug!("consume_data()");

        let DataConsumerOptions {
            data_producer_id,
            ordered,
            max_packet_life_time,
            max_retransmits,
            app_data,
        } = data_consumer_options;

        let data_producer = self
            .router
            .get_data_producer(&data_producer_id)
            .ok_or(ConsumeDataError::DataProducerNotFound(data_producer_id))?;

        let (data_consumer_type, sctp_stream_parameters) = if self.kind == TransportKind::Direct {
            if ordered == Some(false) || max_packet_life_time.is_some() || max_retransmits.is_some()
            {
                warn!("consume_data() | reliability settings are ignored on a direct transport");
            }

            (DataConsumerType::Direct, None)
        } else {
            let stream_id = self
                .sctp_stream_ids
                .allocate()
                .ok_or(ConsumeDataError::NoSctpStreamId)?;

            // Reliability is inherited unless overridden, direct producers have none to inherit
            let sctp_stream_parameters = data_producer
                .sctp_stream_parameters()
                .map_or_else(
                    || SctpStreamParameters::new_ordered(stream_id),
                    |parameters| parameters.with_stream_id(stream_id),
                )
                .with_reliability(ordered, max_packet_life_time, max_retransmits);

            (DataConsumerType::Sctp, Some(sctp_stream_parameters))
        };
        let stream_id = sctp_stream_parameters.map(|parameters| parameters.stream_id());

        let data_consumer_id = DataConsumerId::new();
        let target = self
            .target()
            .data_consumer(data_consumer_id)
            .data_producer(data_producer_id);

        let reply = self
            .link
            .request(messages::transport_consume_data(
                target,
                DataChannelData {
                    channel_type: data_consumer_type,
                    sctp_stream_parameters,
                    label: data_producer.label().clone(),
                    protocol: data_producer.protocol().clone(),
                },
            ))
            .await;

        let reply = match reply {
            Ok(reply) => reply,
            Err(error) => {
                if let Some(stream_id) = stream_id {
                    self.sctp_stream_ids.deallocate(stream_id);
                }
                return Err(ConsumeDataError::Request(error));
            }
        };

        let data_consumer = DataConsumer::new(
            DataConsumerSetup {
                id: data_consumer_id,
                data_producer_id,
                transport_id: self.id,
                data_consumer_type: reply.channel_type,
                sctp_stream_parameters: reply.sctp_stream_parameters,
                label: reply.label,
                protocol: reply.protocol,
            },
            target,
            self.link.clone(),
            app_data,
        );

        if let Some(stream_id) = stream_id {
            let sctp_stream_ids = self.sctp_stream_ids.clone();
            data_consumer
                .on_close(move || sctp_stream_ids.deallocate(stream_id))
                .detach();
        }

        if self.closed() {
            data_consumer.transport_closed();
            return Err(ConsumeDataError::TransportClosed);
        }

        adopt(
            &self.children.data_consumers,
            data_consumer_id,
            &data_consumer,
            |callback| data_consumer.on_close(callback),
        );
        self.handlers.new_data_consumer.call_simple(&data_consumer);

        Ok(data_consumer)
    }
}
