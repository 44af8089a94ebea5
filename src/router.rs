//! Routers forward media and data between the transports created on them, the closest thing to
//! a conference room the engine has.
//!
//! Routers come from [`Worker::create_router`](crate::worker::Worker::create_router).

pub(super) mod active_speaker_observer;
pub(super) mod audio_level_observer;
pub(super) mod consumer;
pub(super) mod data_consumer;
pub(super) mod data_producer;
pub(super) mod direct_transport;
pub(super) mod pipe_transport;
pub(super) mod plain_transport;
pub(super) mod producer;
pub(super) mod resource;
pub(super) mod rtp_observer;
pub(super) mod transport;
pub(super) mod webrtc_transport;

use crate::active_speaker_observer::{
    ActiveSpeakerObserver, ActiveSpeakerObserverOptions, WeakActiveSpeakerObserver,
};
use crate::audio_level_observer::{
    AudioLevelObserver, AudioLevelObserverOptions, WeakAudioLevelObserver,
};
use crate::consumer::{Consumer, ConsumerId, ConsumerOptions};
use crate::data_consumer::{DataConsumer, DataConsumerId, DataConsumerOptions};
use crate::data_producer::{DataProducer, DataProducerId, DataProducerOptions, WeakDataProducer};
use crate::data_structures::{AppData, TransportListenIp};
use crate::direct_transport::{DirectTransport, DirectTransportOptions, WeakDirectTransport};
use crate::messages::{self, DirectTransportData, NetworkTransportData, Target};
use crate::ortc;
use crate::pipe_transport::{
    PipeTransport, PipeTransportOptions, PipeTransportRemoteParameters, WeakPipeTransport,
};
use crate::plain_transport::{PlainTransport, PlainTransportOptions, WeakPlainTransport};
use crate::producer::{Producer, ProducerId, ProducerOptions, WeakProducer};
use crate::router::resource::{EngineLink, Lifecycle};
use crate::rtp_observer::{RtpObserver, RtpObserverId};
use crate::rtp_parameters::{RtpCapabilities, RtpCapabilitiesFinalized, RtpCodecCapability};
use crate::sctp_parameters::NumSctpStreams;
use crate::transport::{
    ConsumeDataError, ConsumeError, ProduceDataError, ProduceError, Transport, TransportGeneric,
    TransportId,
};
use crate::webrtc_transport::{WebRtcTransport, WebRtcTransportOptions, WeakWebRtcTransport};
use crate::worker::{RequestError, Worker};
use async_mutex::Mutex as AsyncMutex;
use event_listener_primitives::{Bag, HandlerId};
use futures_lite::future;
use hash_hasher::HashedMap;
use log::{debug, error};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Weak};
use thiserror::Error;

resource_id!(
    /// [`Router`] identifier.
    RouterId
);

/// What [`Worker::create_router`](crate::worker::Worker::create_router) needs.
#[derive(Debug, Default, Clone)]
#[non_exhaustive]
pub struct RouterOptions {
    /// Codecs the router accepts, turned into [`Router::rtp_capabilities`].
    pub media_codecs: Vec<RtpCodecCapability>,
    /// Application data.
    pub app_data: AppData,
}

impl RouterOptions {
    #[must_use]
    pub fn new(media_codecs: Vec<RtpCodecCapability>) -> Self {
        Self {
            media_codecs,
            app_data: AppData::default(),
        }
    }
}

/// How [`Router::pipe_producer_to_router`] and [`Router::pipe_data_producer_to_router`] reach
/// the other router.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PipeToRouterOptions {
    /// Router to pipe into, must not be the one piping.
    pub router: Router,
    /// Address both pipe transports listen on. Default `127.0.0.1`.
    pub listen_ip: TransportListenIp,
    /// Needed to pipe data producers. Default true.
    pub enable_sctp: bool,
    pub num_sctp_streams: NumSctpStreams,
    /// Default false.
    pub enable_rtx: bool,
    /// Default false.
    pub enable_srtp: bool,
}

impl PipeToRouterOptions {
    /// Options for a router of the same host.
    #[must_use]
    pub fn new(router: Router) -> Self {
        Self {
            router,
            listen_ip: TransportListenIp {
                ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                announced_ip: None,
            },
            enable_sctp: true,
            num_sctp_streams: NumSctpStreams::default(),
            enable_rtx: false,
            enable_srtp: false,
        }
    }

    fn pipe_transport_options(&self) -> PipeTransportOptions {
        let mut options = PipeTransportOptions::new(self.listen_ip);
        options.enable_sctp = self.enable_sctp;
        options.num_sctp_streams = self.num_sctp_streams;
        options.enable_rtx = self.enable_rtx;
        options.enable_srtp = self.enable_srtp;
        options
    }
}

/// Result of [`Router::pipe_producer_to_router`].
#[derive(Debug)]
pub struct PipeProducerToRouterPair {
    /// Lives in the piping router and feeds the pipe.
    pub pipe_consumer: Consumer,
    /// Lives in the other router, with the id of the piped producer.
    pub pipe_producer: Producer,
}

/// Why [`Router::pipe_producer_to_router`] failed.
#[derive(Debug, Error)]
pub enum PipeProducerToRouterError {
    #[error("Cannot pipe a producer into its own router")]
    SameRouter,
    #[error("Producer with id \"{0}\" not found")]
    ProducerNotFound(ProducerId),
    /// Creating or connecting a pipe transport failed.
    #[error("Failed to create or connect pipe transport: {0}")]
    TransportFailed(#[from] RequestError),
    #[error("Failed to consume: {0}")]
    ConsumeFailed(#[from] ConsumeError),
    #[error("Failed to produce: {0}")]
    ProduceFailed(#[from] ProduceError),
    /// Piped producer went away before the pipe was complete.
    #[error("Original producer closed")]
    ProducerClosed,
}

/// Result of [`Router::pipe_data_producer_to_router`].
#[derive(Debug)]
pub struct PipeDataProducerToRouterPair {
    /// Lives in the piping router and feeds the pipe.
    pub pipe_data_consumer: DataConsumer,
    /// Lives in the other router, with the id of the piped data producer.
    pub pipe_data_producer: DataProducer,
}

/// Why [`Router::pipe_data_producer_to_router`] failed.
#[derive(Debug, Error)]
pub enum PipeDataProducerToRouterError {
    #[error("Cannot pipe a data producer into its own router")]
    SameRouter,
    #[error("Data producer with id \"{0}\" not found")]
    DataProducerNotFound(DataProducerId),
    /// Creating or connecting a pipe transport failed.
    #[error("Failed to create or connect pipe transport: {0}")]
    TransportFailed(#[from] RequestError),
    #[error("Failed to consume: {0}")]
    ConsumeFailed(#[from] ConsumeDataError),
    #[error("Failed to produce: {0}")]
    ProduceFailed(#[from] ProduceDataError),
    /// Piped data producer went away before the pipe was complete.
    #[error("Original data producer closed")]
    DataProducerClosed,
}

/// Engine-side snapshot of a router.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct RouterDump {
    pub id: RouterId,
    pub transport_ids: Vec<TransportId>,
    pub rtp_observer_ids: Vec<RtpObserverId>,
    /// Which consumers each producer feeds.
    #[serde(default)]
    pub map_producer_id_consumer_ids: HashMap<ProducerId, Vec<ConsumerId>>,
    /// Which data consumers each data producer feeds.
    #[serde(default)]
    pub map_data_producer_id_data_consumer_ids: HashMap<DataProducerId, Vec<DataConsumerId>>,
    /// Everything else the engine reported.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Transport handed to [`Router::on_new_transport`] callbacks.
#[derive(Debug, Clone)]
pub enum NewTransport {
    Direct(DirectTransport),
    Pipe(PipeTransport),
    Plain(PlainTransport),
    WebRtc(WebRtcTransport),
}

impl NewTransport {
    #[must_use]
    pub fn id(&self) -> TransportId {
        match self {
            Self::Direct(transport) => transport.id(),
            Self::Pipe(transport) => transport.id(),
            Self::Plain(transport) => transport.id(),
            Self::WebRtc(transport) => transport.id(),
        }
    }

    fn downgrade(&self) -> WeakTransport {
        match self {
            Self::Direct(transport) => WeakTransport::Direct(transport.downgrade()),
            Self::Pipe(transport) => WeakTransport::Pipe(transport.downgrade()),
            Self::Plain(transport) => WeakTransport::Plain(transport.downgrade()),
            Self::WebRtc(transport) => WeakTransport::WebRtc(transport.downgrade()),
        }
    }

    fn router_closed(&self) {
        match self {
            Self::Direct(transport) => transport.router_closed(),
            Self::Pipe(transport) => transport.router_closed(),
            Self::Plain(transport) => transport.router_closed(),
            Self::WebRtc(transport) => transport.router_closed(),
        }
    }
}

#[derive(Clone)]
enum WeakTransport {
    Direct(WeakDirectTransport),
    Pipe(WeakPipeTransport),
    Plain(WeakPlainTransport),
    WebRtc(WeakWebRtcTransport),
}

impl WeakTransport {
    fn upgrade(&self) -> Option<NewTransport> {
        Some(match self {
            Self::Direct(transport) => NewTransport::Direct(transport.upgrade()?),
            Self::Pipe(transport) => NewTransport::Pipe(transport.upgrade()?),
            Self::Plain(transport) => NewTransport::Plain(transport.upgrade()?),
            Self::WebRtc(transport) => NewTransport::WebRtc(transport.upgrade()?),
        })
    }
}

/// Observer handed to [`Router::on_new_rtp_observer`] callbacks.
#[derive(Debug, Clone)]
pub enum NewRtpObserver {
    AudioLevel(AudioLevelObserver),
    ActiveSpeaker(ActiveSpeakerObserver),
}

impl NewRtpObserver {
    #[must_use]
    pub fn id(&self) -> RtpObserverId {
        match self {
            Self::AudioLevel(observer) => observer.id(),
            Self::ActiveSpeaker(observer) => observer.id(),
        }
    }

    fn downgrade(&self) -> WeakRtpObserver {
        match self {
            Self::AudioLevel(observer) => WeakRtpObserver::AudioLevel(observer.downgrade()),
            Self::ActiveSpeaker(observer) => WeakRtpObserver::ActiveSpeaker(observer.downgrade()),
        }
    }

    fn router_closed(&self) {
        match self {
            Self::AudioLevel(observer) => observer.router_closed(),
            Self::ActiveSpeaker(observer) => observer.router_closed(),
        }
    }
}

#[derive(Clone)]
enum WeakRtpObserver {
    AudioLevel(WeakAudioLevelObserver),
    ActiveSpeaker(WeakActiveSpeakerObserver),
}

impl WeakRtpObserver {
    fn upgrade(&self) -> Option<NewRtpObserver> {
        Some(match self {
            Self::AudioLevel(observer) => NewRtpObserver::AudioLevel(observer.upgrade()?),
            Self::ActiveSpeaker(observer) => NewRtpObserver::ActiveSpeaker(observer.upgrade()?),
        })
    }
}

/// Both ends of a pipe between two routers, keyed by the router each transport lives in.
#[derive(Clone)]
struct PipeTransportPair {
    first_router_id: RouterId,
    first: PipeTransport,
    second: PipeTransport,
}

impl PipeTransportPair {
    /// `(local, remote)` as seen from `router_id`.
    fn local_and_remote(&self, router_id: RouterId) -> (PipeTransport, PipeTransport) {
        if router_id == self.first_router_id {
            (self.first.clone(), self.second.clone())
        } else {
            (self.second.clone(), self.first.clone())
        }
    }

    fn closed(&self) -> bool {
        self.first.closed() || self.second.closed()
    }
}

type PipeTransportPairSlot = Arc<AsyncMutex<Option<PipeTransportPair>>>;
type Registry<Id, Weak> = Arc<Mutex<HashedMap<Id, Weak>>>;

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    new_transport: Bag<Arc<dyn Fn(&NewTransport) + Send + Sync>, NewTransport>,
    new_rtp_observer: Bag<Arc<dyn Fn(&NewRtpObserver) + Send + Sync>, NewRtpObserver>,
}

struct Inner {
    id: RouterId,
    link: EngineLink,
    rtp_capabilities: RtpCapabilitiesFinalized,
    handlers: Handlers,
    app_data: AppData,
    lifecycle: Lifecycle,
    transports: Registry<TransportId, WeakTransport>,
    rtp_observers: Registry<RtpObserverId, WeakRtpObserver>,
    producers: Registry<ProducerId, WeakProducer>,
    data_producers: Registry<DataProducerId, WeakDataProducer>,
    mapped_pipe_transports: Arc<Mutex<HashMap<RouterId, PipeTransportPairSlot>>>,
    // Engine stays up for as long as any of its routers is in use
    worker: Worker,
}

impl Drop for Inner {
    fn drop(&mut self) {
        debug!("drop()");

        self.close();
    }
}

impl Inner {
    fn target(&self) -> Target {
        Target::router(self.id)
    }

    fn close(&self) {
        if self.lifecycle.close(|| self.orphan_children()) {
            debug!("close() [id:{}]", self.id);

            self.link.spawn_close(messages::router_close(self.target()));
        }
    }

    fn worker_closed(&self) {
        self.lifecycle.parent_closed(|| self.orphan_children());
    }

    /// Registries are emptied before children are told, children deregister themselves while
    /// closing.
    fn orphan_children(&self) {
        let transports = drain_alive(&self.transports, WeakTransport::upgrade);
        for transport in transports {
            transport.router_closed();
        }

        let rtp_observers = drain_alive(&self.rtp_observers, WeakRtpObserver::upgrade);
        for rtp_observer in rtp_observers {
            rtp_observer.router_closed();
        }

        self.producers.lock().clear();
        self.data_producers.lock().clear();
        let mapped_pipe_transports = mem::take(&mut *self.mapped_pipe_transports.lock());
        drop(mapped_pipe_transports);
    }
}

fn drain_alive<Id, W, T>(registry: &Registry<Id, W>, upgrade: impl Fn(&W) -> Option<T>) -> Vec<T> {
    registry
        .lock()
        .drain()
        .filter_map(|(_, weak)| upgrade(&weak))
        .collect()
}

/// Forwarding context inside of a worker. Transports and RTP observers are created on it and
/// close together with it.
#[derive(Clone)]
#[must_use = "Router will be closed on drop, make sure to keep it around for as long as needed"]
pub struct Router {
    inner: Arc<Inner>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("id", &self.inner.id)
            .field("lifecycle", &self.inner.lifecycle)
            .finish()
    }
}

impl Router {
    pub(super) fn new(
        id: RouterId,
        link: EngineLink,
        rtp_capabilities: RtpCapabilitiesFinalized,
        app_data: AppData,
        worker: Worker,
    ) -> Self {
        debug!("new() [id:{}]", id);

        Self {
            inner: Arc::new(Inner {
                id,
                link,
                rtp_capabilities,
                handlers: Handlers::default(),
                app_data,
                lifecycle: Lifecycle::default(),
                transports: Arc::default(),
                rtp_observers: Arc::default(),
                producers: Arc::default(),
                data_producers: Arc::default(),
                mapped_pipe_transports: Arc::default(),
                worker,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> RouterId {
        self.inner.id
    }

    /// Worker the router lives in.
    pub fn worker(&self) -> &Worker {
        &self.inner.worker
    }

    #[must_use]
    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner.lifecycle.closed()
    }

    /// Codecs and header extensions the router accepts, what endpoints negotiate against.
    #[must_use]
    pub fn rtp_capabilities(&self) -> &RtpCapabilitiesFinalized {
        &self.inner.rtp_capabilities
    }

    pub(crate) fn link(&self) -> &EngineLink {
        &self.inner.link
    }

    /// Engine-side snapshot of the router.
    pub async fn dump(&self) -> Result<RouterDump, RequestError> {
        debug!("dump()");

        self.inner
            .link
            .request(messages::router_dump(self.inner.target()))
            .await
    }

    pub async fn create_webrtc_transport(
        &self,
        webrtc_transport_options: WebRtcTransportOptions,
    ) -> Result<WebRtcTransport, RequestError> {
        debug!("create_webrtc_transport()");

        let transport_id = TransportId::new();
        let state = self
            .inner
            .link
            .request(messages::router_create_webrtc_transport(
                self.inner.target().transport(transport_id),
                NetworkTransportData {
                    options: webrtc_transport_options.clone(),
                    is_data_channel: true,
                },
            ))
            .await?;

        let transport = WebRtcTransport::new(
            transport_id,
            state,
            webrtc_transport_options.app_data,
            self.clone(),
        );
        self.register_transport(&transport, NewTransport::WebRtc(transport.clone()))?;

        Ok(transport)
    }

    pub async fn create_plain_transport(
        &self,
        plain_transport_options: PlainTransportOptions,
    ) -> Result<PlainTransport, RequestError> {
        debug!("create_plain_transport()");

        let transport_id = TransportId::new();
        let state = self
            .inner
            .link
            .request(messages::router_create_plain_transport(
                self.inner.target().transport(transport_id),
                NetworkTransportData {
                    options: plain_transport_options.clone(),
                    is_data_channel: false,
                },
            ))
            .await?;

        let transport = PlainTransport::new(
            transport_id,
            state,
            plain_transport_options.app_data,
            self.clone(),
        );
        self.register_transport(&transport, NewTransport::Plain(transport.clone()))?;

        Ok(transport)
    }

    pub async fn create_pipe_transport(
        &self,
        pipe_transport_options: PipeTransportOptions,
    ) -> Result<PipeTransport, RequestError> {
        debug!("create_pipe_transport()");

        let transport_id = TransportId::new();
        let state = self
            .inner
            .link
            .request(messages::router_create_pipe_transport(
                self.inner.target().transport(transport_id),
                NetworkTransportData {
                    options: pipe_transport_options.clone(),
                    is_data_channel: false,
                },
            ))
            .await?;

        let transport = PipeTransport::new(
            transport_id,
            state,
            pipe_transport_options.app_data,
            self.clone(),
        );
        self.register_transport(&transport, NewTransport::Pipe(transport.clone()))?;

        Ok(transport)
    }

    pub async fn create_direct_transport(
        &self,
        direct_transport_options: DirectTransportOptions,
    ) -> Result<DirectTransport, RequestError> {
        debug!("create_direct_transport()");

        let transport_id = TransportId::new();
        self.inner
            .link
            .request(messages::router_create_direct_transport(
                self.inner.target().transport(transport_id),
                DirectTransportData {
                    direct: true,
                    options: direct_transport_options.clone(),
                },
            ))
            .await?;

        let transport = DirectTransport::new(
            transport_id,
            direct_transport_options.app_data,
            self.clone(),
        );
        self.register_transport(&transport, NewTransport::Direct(transport.clone()))?;

        Ok(transport)
    }

    pub async fn create_audio_level_observer(
        &self,
        audio_level_observer_options: AudioLevelObserverOptions,
    ) -> Result<AudioLevelObserver, RequestError> {
        debug!("create_audio_level_observer()");

        let rtp_observer_id = RtpObserverId::new();
        self.inner
            .link
            .request(messages::router_create_audio_level_observer(
                self.inner.target().rtp_observer(rtp_observer_id),
                audio_level_observer_options.clone(),
            ))
            .await?;

        let observer = AudioLevelObserver::new(
            rtp_observer_id,
            audio_level_observer_options.app_data,
            self.clone(),
        );
        self.register_rtp_observer(&observer, NewRtpObserver::AudioLevel(observer.clone()))?;

        Ok(observer)
    }

    pub async fn create_active_speaker_observer(
        &self,
        active_speaker_observer_options: ActiveSpeakerObserverOptions,
    ) -> Result<ActiveSpeakerObserver, RequestError> {
        debug!("create_active_speaker_observer()");

        let rtp_observer_id = RtpObserverId::new();
        self.inner
            .link
            .request(messages::router_create_active_speaker_observer(
                self.inner.target().rtp_observer(rtp_observer_id),
                active_speaker_observer_options.clone(),
            ))
            .await?;

        let observer = ActiveSpeakerObserver::new(
            rtp_observer_id,
            active_speaker_observer_options.app_data,
            self.clone(),
        );
        self.register_rtp_observer(&observer, NewRtpObserver::ActiveSpeaker(observer.clone()))?;

        Ok(observer)
    }

    /// Makes a producer of this router available in another one, which may live in another
    /// worker. The other router gets a producer with the same id, fed through a pair of pipe
    /// transports.
    ///
    /// Two routers share one pipe transport pair, concurrent calls wait for the pair being
    /// created instead of creating another one.
    pub async fn pipe_producer_to_router(
        &self,
        producer_id: ProducerId,
        pipe_to_router_options: PipeToRouterOptions,
    ) -> Result<PipeProducerToRouterPair, PipeProducerToRouterError> {
        debug!("pipe_producer_to_router() [producer_id:{}]", producer_id);

        if pipe_to_router_options.router.id() == self.id() {
            return Err(PipeProducerToRouterError::SameRouter);
        }

        let producer = self
            .get_producer(&producer_id)
            .ok_or(PipeProducerToRouterError::ProducerNotFound(producer_id))?;

        let (local_pipe_transport, remote_pipe_transport) =
            self.pipe_transport_pair(&pipe_to_router_options).await?;

        if producer.closed() {
            return Err(PipeProducerToRouterError::ProducerClosed);
        }

        // Capabilities are not looked at on pipe transports
        let pipe_consumer = local_pipe_transport
            .consume(ConsumerOptions::new(producer_id, RtpCapabilities::default()))
            .await?;

        let mut producer_options = ProducerOptions::new_pipe_transport(
            producer_id,
            pipe_consumer.kind(),
            pipe_consumer.rtp_parameters().clone(),
        );
        producer_options.paused = pipe_consumer.producer_paused();
        producer_options.app_data = producer.app_data().clone();

        let pipe_producer = match remote_pipe_transport.produce(producer_options).await {
            Ok(pipe_producer) => pipe_producer,
            Err(error) => {
                pipe_consumer.close();
                return Err(error.into());
            }
        };

        if producer.closed() {
            pipe_consumer.close();
            pipe_producer.close();
            return Err(PipeProducerToRouterError::ProducerClosed);
        }

        // Closing either end of the pipe closes the other one
        pipe_consumer
            .on_close({
                let pipe_producer = pipe_producer.downgrade();

                move || {
                    if let Some(pipe_producer) = pipe_producer.upgrade() {
                        pipe_producer.close();
                    }
                }
            })
            .detach();
        pipe_producer
            .on_close({
                let pipe_consumer = pipe_consumer.downgrade();

                move || {
                    if let Some(pipe_consumer) = pipe_consumer.upgrade() {
                        pipe_consumer.close();
                    }
                }
            })
            .detach();

        // Pause state of the original producer travels through the pipe
        pipe_consumer
            .on_producer_pause({
                let link = self.inner.link.clone();
                let pipe_producer = pipe_producer.downgrade();

                move || {
                    if let Some(pipe_producer) = pipe_producer.upgrade() {
                        link.executor()
                            .spawn(async move {
                                if let Err(error) = pipe_producer.pause().await {
                                    error!("failed to pause pipe producer: {}", error);
                                }
                            })
                            .detach();
                    }
                }
            })
            .detach();
        pipe_consumer
            .on_producer_resume({
                let link = self.inner.link.clone();
                let pipe_producer = pipe_producer.downgrade();

                move || {
                    if let Some(pipe_producer) = pipe_producer.upgrade() {
                        link.executor()
                            .spawn(async move {
                                if let Err(error) = pipe_producer.resume().await {
                                    error!("failed to resume pipe producer: {}", error);
                                }
                            })
                            .detach();
                    }
                }
            })
            .detach();

        Ok(PipeProducerToRouterPair {
            pipe_consumer,
            pipe_producer,
        })
    }

    /// Same as [`Router::pipe_producer_to_router`] for a data producer, the pipe carries SCTP.
    pub async fn pipe_data_producer_to_router(
        &self,
        data_producer_id: DataProducerId,
        pipe_to_router_options: PipeToRouterOptions,
    ) -> Result<PipeDataProducerToRouterPair, PipeDataProducerToRouterError> {
        debug!(
            "pipe_data_producer_to_router() [data_producer_id:{}]",
            data_producer_id
        );

        if pipe_to_router_options.router.id() == self.id() {
            return Err(PipeDataProducerToRouterError::SameRouter);
        }

        let data_producer = self.get_data_producer(&data_producer_id).ok_or(
            PipeDataProducerToRouterError::DataProducerNotFound(data_producer_id),
        )?;

        let (local_pipe_transport, remote_pipe_transport) =
            self.pipe_transport_pair(&pipe_to_router_options).await?;

        if data_producer.closed() {
            return Err(PipeDataProducerToRouterError::DataProducerClosed);
        }

        let pipe_data_consumer = local_pipe_transport
            .consume_data(DataConsumerOptions::new_sctp(data_producer_id))
            .await?;

        let pipe_data_producer = match pipe_data_consumer.sctp_stream_parameters() {
            Some(sctp_stream_parameters) => {
                let mut data_producer_options =
                    DataProducerOptions::new_pipe_transport(data_producer_id, sctp_stream_parameters);
                data_producer_options.label = pipe_data_consumer.label().clone();
                data_producer_options.protocol = pipe_data_consumer.protocol().clone();
                data_producer_options.app_data = data_producer.app_data().clone();

                remote_pipe_transport
                    .produce_data(data_producer_options)
                    .await
            }
            None => Err(ProduceDataError::SctpStreamParametersRequired),
        };

        let pipe_data_producer = match pipe_data_producer {
            Ok(pipe_data_producer) => pipe_data_producer,
            Err(error) => {
                pipe_data_consumer.close();
                return Err(error.into());
            }
        };

        if data_producer.closed() {
            pipe_data_consumer.close();
            pipe_data_producer.close();
            return Err(PipeDataProducerToRouterError::DataProducerClosed);
        }

        pipe_data_consumer
            .on_close({
                let pipe_data_producer = pipe_data_producer.downgrade();

                move || {
                    if let Some(pipe_data_producer) = pipe_data_producer.upgrade() {
                        pipe_data_producer.close();
                    }
                }
            })
            .detach();
        pipe_data_producer
            .on_close({
                let pipe_data_consumer = pipe_data_consumer.downgrade();

                move || {
                    if let Some(pipe_data_consumer) = pipe_data_consumer.upgrade() {
                        pipe_data_consumer.close();
                    }
                }
            })
            .detach();

        Ok(PipeDataProducerToRouterPair {
            pipe_data_consumer,
            pipe_data_producer,
        })
    }

    /// Whether an endpoint with `rtp_capabilities` can receive the producer. Unknown producers
    /// can't be consumed.
    #[must_use]
    pub fn can_consume(&self, producer_id: &ProducerId, rtp_capabilities: &RtpCapabilities) -> bool {
        let producer = match self.get_producer(producer_id) {
            Some(producer) => producer,
            None => {
                error!("can_consume() | producer {} not found", producer_id);
                return false;
            }
        };

        ortc::can_consume(producer.consumable_rtp_parameters(), rtp_capabilities).unwrap_or_else(
            |error| {
                error!("can_consume() | invalid RTP capabilities: {}", error);
                false
            },
        )
    }

    pub fn on_new_transport<F: Fn(&NewTransport) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.handlers.new_transport.add(Arc::new(callback))
    }

    pub fn on_new_rtp_observer<F: Fn(&NewRtpObserver) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.handlers.new_rtp_observer.add(Arc::new(callback))
    }

    /// Worker was closed, which closes the router as well.
    pub fn on_worker_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner.lifecycle.on_parent_close(callback)
    }

    /// Router was closed, for whatever reason. Runs right away if it already is.
    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner.lifecycle.on_close(callback)
    }

    /// Closes the router along with its transports and RTP observers.
    pub fn close(&self) {
        self.inner.close();
    }

    pub(super) fn worker_closed(&self) {
        self.inner.worker_closed();
    }

    pub(crate) fn has_producer(&self, producer_id: &ProducerId) -> bool {
        self.inner.producers.lock().contains_key(producer_id)
    }

    pub(crate) fn get_producer(&self, producer_id: &ProducerId) -> Option<Producer> {
        self.inner
            .producers
            .lock()
            .get(producer_id)
            .and_then(WeakProducer::upgrade)
    }

    pub(crate) fn has_data_producer(&self, data_producer_id: &DataProducerId) -> bool {
        self.inner.data_producers.lock().contains_key(data_producer_id)
    }

    pub(crate) fn get_data_producer(&self, data_producer_id: &DataProducerId) -> Option<DataProducer> {
        self.inner
            .data_producers
            .lock()
            .get(data_producer_id)
            .and_then(WeakDataProducer::upgrade)
    }

    /// Takes ownership of a freshly created transport and indexes the producers and data
    /// producers created on it.
    fn register_transport<T: TransportGeneric>(
        &self,
        transport: &T,
        new_transport: NewTransport,
    ) -> Result<(), RequestError> {
        // Router may have closed while the request was in flight
        if self.closed() {
            new_transport.router_closed();
            return Err(RequestError::ChannelClosed);
        }

        transport
            .on_new_producer({
                let producers = Arc::downgrade(&self.inner.producers);

                move |producer| {
                    index(&producers, producer.id(), producer.downgrade(), |callback| {
                        producer.on_close(callback)
                    });
                }
            })
            .detach();
        transport
            .on_new_data_producer({
                let data_producers = Arc::downgrade(&self.inner.data_producers);

                move |data_producer| {
                    index(
                        &data_producers,
                        data_producer.id(),
                        data_producer.downgrade(),
                        |callback| data_producer.on_close(callback),
                    );
                }
            })
            .detach();

        index(
            &Arc::downgrade(&self.inner.transports),
            transport.id(),
            new_transport.downgrade(),
            |callback| transport.on_close(callback),
        );

        self.inner
            .handlers
            .new_transport
            .call_simple(&new_transport);

        Ok(())
    }

    fn register_rtp_observer<O: RtpObserver>(
        &self,
        rtp_observer: &O,
        new_rtp_observer: NewRtpObserver,
    ) -> Result<(), RequestError> {
        if self.closed() {
            new_rtp_observer.router_closed();
            return Err(RequestError::ChannelClosed);
        }

        index(
            &Arc::downgrade(&self.inner.rtp_observers),
            rtp_observer.id(),
            new_rtp_observer.downgrade(),
            |callback| rtp_observer.on_close(callback),
        );

        self.inner
            .handlers
            .new_rtp_observer
            .call_simple(&new_rtp_observer);

        Ok(())
    }

    /// Slot shared by this router and `remote_router` for the pipe transport pair between them,
    /// installed in both when missing.
    fn pipe_transport_pair_slot(&self, remote_router: &Router) -> PipeTransportPairSlot {
        // Locking in router id order lets calls from either side see the same slot
        let mut local_map;
        let mut remote_map;
        if self.id() < remote_router.id() {
            local_map = self.inner.mapped_pipe_transports.lock();
            remote_map = remote_router.inner.mapped_pipe_transports.lock();
        } else {
            remote_map = remote_router.inner.mapped_pipe_transports.lock();
            local_map = self.inner.mapped_pipe_transports.lock();
        }

        let slot = local_map
            .get(&remote_router.id())
            .or_else(|| remote_map.get(&self.id()))
            .cloned()
            .unwrap_or_default();

        local_map.insert(remote_router.id(), Arc::clone(&slot));
        remote_map.insert(self.id(), Arc::clone(&slot));

        slot
    }

    /// `(local, remote)` pipe transports connected to each other, created on first use.
    async fn pipe_transport_pair(
        &self,
        pipe_to_router_options: &PipeToRouterOptions,
    ) -> Result<(PipeTransport, PipeTransport), RequestError> {
        let remote_router = &pipe_to_router_options.router;

        // Slot is in place before the first await, concurrent calls queue up on its lock
        let slot = self.pipe_transport_pair_slot(remote_router);
        let mut pair = slot.lock().await;

        if let Some(pair) = pair.as_ref().filter(|pair| !pair.closed()) {
            return Ok(pair.local_and_remote(self.id()));
        }

        let created = self
            .create_pipe_transport_pair(remote_router, pipe_to_router_options, &slot)
            .await?;
        let local_and_remote = created.local_and_remote(self.id());
        pair.replace(created);

        Ok(local_and_remote)
    }

    async fn create_pipe_transport_pair(
        &self,
        remote_router: &Router,
        pipe_to_router_options: &PipeToRouterOptions,
        slot: &PipeTransportPairSlot,
    ) -> Result<PipeTransportPair, RequestError> {
        let options = pipe_to_router_options.pipe_transport_options();

        let (local, remote) = future::try_zip(
            self.create_pipe_transport(options.clone()),
            remote_router.create_pipe_transport(options),
        )
        .await?;

        let local_tuple = local.tuple();
        let remote_tuple = remote.tuple();

        let connected = future::try_zip(
            local.connect(PipeTransportRemoteParameters {
                ip: remote_tuple.local_ip(),
                port: remote_tuple.local_port(),
                srtp_parameters: remote.srtp_parameters(),
            }),
            remote.connect(PipeTransportRemoteParameters {
                ip: local_tuple.local_ip(),
                port: local_tuple.local_port(),
                srtp_parameters: local.srtp_parameters(),
            }),
        )
        .await;
        if let Err(error) = connected {
            local.close();
            remote.close();
            return Err(error);
        }

        let forget_pair = {
            let local_mapped = Arc::downgrade(&self.inner.mapped_pipe_transports);
            let remote_mapped = Arc::downgrade(&remote_router.inner.mapped_pipe_transports);
            let local_router_id = self.id();
            let remote_router_id = remote_router.id();
            let slot = Arc::downgrade(slot);

            move || {
                forget_pipe_transport_pair(&local_mapped, remote_router_id, &slot);
                forget_pipe_transport_pair(&remote_mapped, local_router_id, &slot);
            }
        };

        local
            .on_close({
                let remote = remote.downgrade();
                let forget_pair = forget_pair.clone();

                move || {
                    if let Some(remote) = remote.upgrade() {
                        remote.close();
                    }
                    forget_pair();
                }
            })
            .detach();
        remote
            .on_close({
                let local = local.downgrade();

                move || {
                    if let Some(local) = local.upgrade() {
                        local.close();
                    }
                    forget_pair();
                }
            })
            .detach();

        Ok(PipeTransportPair {
            first_router_id: self.id(),
            first: local,
            second: remote,
        })
    }
}

/// Keeps `weak` under `id` until the resource closes, `on_close` registers the removal.
fn index<Id, W, F>(registry: &Weak<Mutex<HashedMap<Id, W>>>, id: Id, weak: W, on_close: F)
where
    Id: std::hash::Hash + Eq + Copy + Send + Sync + 'static,
    W: Send + 'static,
    F: FnOnce(Box<dyn FnOnce() + Send>) -> HandlerId,
{
    if let Some(registry) = registry.upgrade() {
        registry.lock().insert(id, weak);
    }

    let registry = registry.clone();
    on_close(Box::new(move || {
        if let Some(registry) = registry.upgrade() {
            registry.lock().remove(&id);
        }
    }))
    .detach();
}

/// Drops the slot from `mapped_pipe_transports` unless a newer one already replaced it.
fn forget_pipe_transport_pair(
    mapped_pipe_transports: &Weak<Mutex<HashMap<RouterId, PipeTransportPairSlot>>>,
    router_id: RouterId,
    slot: &Weak<AsyncMutex<Option<PipeTransportPair>>>,
) {
    if let Some(mapped_pipe_transports) = mapped_pipe_transports.upgrade() {
        // Slot may hold the last reference to the pair, it is dropped once the lock is released
        let removed_slot = {
            let mut mapped_pipe_transports = mapped_pipe_transports.lock();
            let same_slot = mapped_pipe_transports
                .get(&router_id)
                .map_or(false, |existing| Arc::as_ptr(existing) == slot.as_ptr());
            if same_slot {
                mapped_pipe_transports.remove(&router_id)
            } else {
                None
            }
        };

        drop(removed_slot);
    }
}

weak_handle!(
    /// Handle that doesn't keep the router open.
    WeakRouter => Router
);
