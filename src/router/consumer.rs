use crate::data_structures::{AppData, StatsReport, TraceEvent};
use crate::messages::{self, PriorityData, Target, TraceEventTypes};
use crate::producer::{ProducerId, ProducerType};
use crate::router::resource::{EngineLink, Lifecycle};
use crate::rtp_parameters::{MediaKind, RtpCapabilities, RtpParameters};
use crate::transport::TransportId;
use crate::worker::RequestError;
use bytes::Bytes;
use event_listener_primitives::{Bag, BagOnce, HandlerId};
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Weak};

resource_id!(
    /// [`Consumer`] identifier.
    ConsumerId
);

/// Spatial and temporal layer pair of a simulcast or SVC stream.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerLayers {
    /// Starting from 0.
    pub spatial_layer: u8,
    /// Starting from 0, all of them if `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal_layer: Option<u8>,
}

/// Quality of what a consumer sends, next to the quality of what its producer receives. Scores
/// go from 0 to 10.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerScore {
    pub score: u8,
    /// Score of the producer stream currently forwarded.
    pub producer_score: u8,
    /// Score of every producer stream, in encoding order.
    #[serde(default)]
    pub producer_scores: Vec<u8>,
}

/// What [`Transport::consume`](crate::transport::Transport::consume) needs to forward a producer.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ConsumerOptions {
    /// Producer to forward.
    pub producer_id: ProducerId,
    /// What the receiving endpoint is able to decode.
    pub rtp_capabilities: RtpCapabilities,
    /// Start paused. Default false.
    ///
    /// Handy for video: signal the parameters to the receiver first and resume once it is ready,
    /// so that the first packets it gets include a key frame.
    pub paused: bool,
    /// MID for the consumer. A transport-wide counter is used if `None`. Must not be empty.
    pub mid: Option<String>,
    /// Layers to start with for simulcast or SVC producers, the highest available if `None`.
    pub preferred_layers: Option<ConsumerLayers>,
    /// Whether to retransmit on NACK. `None` means enabled for video and disabled for audio.
    pub enable_rtx: Option<bool>,
    /// Drop DTX packets instead of forwarding them (Opus only). Default false.
    pub ignore_dtx: bool,
    /// Forward every stream of the producer instead of a single one, as pipe consumers do.
    /// Default false.
    pub pipe: bool,
    /// Custom application data.
    pub app_data: AppData,
}

impl ConsumerOptions {
    /// Options with defaults for everything but the producer and the receiver capabilities.
    #[must_use]
    pub fn new(producer_id: ProducerId, rtp_capabilities: RtpCapabilities) -> Self {
        Self {
            producer_id,
            rtp_capabilities,
            paused: false,
            mid: None,
            preferred_layers: None,
            enable_rtx: None,
            ignore_dtx: false,
            pipe: false,
            app_data: AppData::default(),
        }
    }
}

/// Engine-side snapshot of a consumer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ConsumerDump {
    /// Consumer id.
    pub id: ConsumerId,
    /// Forwarded producer.
    pub producer_id: ProducerId,
    /// Audio or video.
    pub kind: MediaKind,
    /// Stream layout.
    #[serde(rename = "type")]
    pub consumer_type: ConsumerType,
    /// Paused on its own.
    pub paused: bool,
    /// Producer is paused.
    pub producer_paused: bool,
    /// Everything else the engine reported.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Layout of what a consumer sends.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerType {
    /// One stream without layers.
    Simple,
    /// One of the producer streams at a time, switching between them.
    Simulcast,
    /// One stream, forwarding a subset of its layers.
    Svc,
    /// Every producer stream as is, towards another router.
    Pipe,
}

impl From<ProducerType> for ConsumerType {
    fn from(producer_type: ProducerType) -> Self {
        match producer_type {
            ProducerType::Simple => ConsumerType::Simple,
            ProducerType::Simulcast => ConsumerType::Simulcast,
            ProducerType::Svc => ConsumerType::Svc,
        }
    }
}

/// Consumer trace event kinds.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerTraceEventType {
    Rtp,
    KeyFrame,
    Nack,
    Pli,
    Fir,
}

/// Trace event emitted by a consumer after [`Consumer::enable_trace_event`].
pub type ConsumerTraceEvent = TraceEvent<ConsumerTraceEventType>;

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    ProducerClose,
    ProducerPause,
    ProducerResume,
    Score(ConsumerScore),
    LayersChange(Option<ConsumerLayers>),
    Trace(ConsumerTraceEvent),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum PayloadNotification {
    Rtp,
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    rtp: Bag<Arc<dyn Fn(&Bytes) + Send + Sync>, Bytes>,
    pause: Bag<Arc<dyn Fn() + Send + Sync>>,
    resume: Bag<Arc<dyn Fn() + Send + Sync>>,
    producer_pause: Bag<Arc<dyn Fn() + Send + Sync>>,
    producer_resume: Bag<Arc<dyn Fn() + Send + Sync>>,
    score: Bag<Arc<dyn Fn(&ConsumerScore) + Send + Sync>, ConsumerScore>,
    layers_change: Bag<Arc<dyn Fn(&Option<ConsumerLayers>) + Send + Sync>, Option<ConsumerLayers>>,
    trace: Bag<Arc<dyn Fn(&ConsumerTraceEvent) + Send + Sync>, ConsumerTraceEvent>,
    producer_close: BagOnce<Box<dyn FnOnce() + Send>>,
}

/// Everything a transport learned while creating a consumer.
pub(super) struct ConsumerSetup {
    pub(super) id: ConsumerId,
    pub(super) producer_id: ProducerId,
    pub(super) transport_id: TransportId,
    pub(super) kind: MediaKind,
    pub(super) consumer_type: ConsumerType,
    pub(super) rtp_parameters: RtpParameters,
    pub(super) paused: bool,
    pub(super) producer_paused: bool,
    pub(super) score: ConsumerScore,
    pub(super) preferred_layers: Option<ConsumerLayers>,
}

/// Part of the consumer that changes over time.
#[derive(Debug)]
struct State {
    paused: bool,
    producer_paused: bool,
    priority: u8,
    score: ConsumerScore,
    preferred_layers: Option<ConsumerLayers>,
    current_layers: Option<ConsumerLayers>,
}

impl State {
    /// Consumer sends nothing, on its own or because of its producer.
    fn effectively_paused(&self) -> bool {
        self.paused || self.producer_paused
    }
}

struct Inner {
    id: ConsumerId,
    producer_id: ProducerId,
    transport_id: TransportId,
    kind: MediaKind,
    consumer_type: ConsumerType,
    rtp_parameters: RtpParameters,
    state: Mutex<State>,
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
            debug!("close() [id:{}]", self.id);

            self.link.spawn_close(messages::consumer_close(self.target));
        }
    }

    /// Applies a change of the pause flags and fires `pause`/`resume` when the consumer as a
    /// whole switches between sending and not sending.
    fn update_paused(&self, change: impl FnOnce(&mut State)) {
        let (was_paused, is_paused) = {
            let mut state = self.state.lock();
            let was_paused = state.effectively_paused();
            change(&mut state);
            (was_paused, state.effectively_paused())
        };

        match (was_paused, is_paused) {
            (false, true) => self.handlers.pause.call_simple(),
            (true, false) => self.handlers.resume.call_simple(),
            _ => {}
        }
    }

    fn handle_notification(&self, notification: Notification) {
        match notification {
            Notification::ProducerClose => {
                if !self.lifecycle.closed() {
                    self.handlers.producer_close.call_simple();
                    // The engine already dropped the consumer
                    self.lifecycle.close(|| {});
                }
            }
            Notification::ProducerPause => {
                if !self.state.lock().producer_paused {
                    self.handlers.producer_pause.call_simple();
                    self.update_paused(|state| state.producer_paused = true);
                }
            }
            Notification::ProducerResume => {
                if self.state.lock().producer_paused {
                    self.handlers.producer_resume.call_simple();
                    self.update_paused(|state| state.producer_paused = false);
                }
            }
            Notification::Score(score) => {
                self.state.lock().score = score.clone();
                self.handlers.score.call_simple(&score);
            }
            Notification::LayersChange(layers) => {
                self.state.lock().current_layers = layers;
                self.handlers.layers_change.call_simple(&layers);
            }
            Notification::Trace(trace) => {
                self.handlers.trace.call_simple(&trace);
            }
        }
    }
}

/// Media of one producer on its way out of the router, through the transport it was created on.
///
/// The consumer only remembers the id of its producer. When the producer goes away the engine
/// notifies the consumer, which then closes itself.
#[derive(Clone)]
#[must_use = "Consumer will be closed on drop, make sure to keep it around for as long as needed"]
pub struct Consumer {
    inner: Arc<Inner>,
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.inner.id)
            .field("producer_id", &self.inner.producer_id)
            .field("kind", &self.inner.kind)
            .field("type", &self.inner.consumer_type)
            .field("state", &self.inner.state)
            .field("transport_id", &self.inner.transport_id)
            .field("lifecycle", &self.inner.lifecycle)
            .finish()
    }
}

impl Consumer {
    pub(super) fn new(
        setup: ConsumerSetup,
        target: Target,
        link: EngineLink,
        app_data: AppData,
    ) -> Self {
        debug!("new() [id:{}]", setup.id);

        let ConsumerSetup {
            id,
            producer_id,
            transport_id,
            kind,
            consumer_type,
            rtp_parameters,
            paused,
            producer_paused,
            score,
            preferred_layers,
        } = setup;

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

                link.subscribe_payload(id, move |_rtp: PayloadNotification, payload: Bytes| {
                    if let Some(inner) = inner_weak.upgrade() {
                        inner.handlers.rtp.call_simple(&payload);
                    }
                })
            });

            Inner {
                id,
                producer_id,
                transport_id,
                kind,
                consumer_type,
                rtp_parameters,
                state: Mutex::new(State {
                    paused,
                    producer_paused,
                    priority: 1,
                    score,
                    preferred_layers,
                    current_layers: None,
                }),
                target,
                link,
                handlers: Handlers::default(),
                app_data,
                lifecycle,
            }
        });

        Self { inner }
    }

    #[must_use]
    pub fn id(&self) -> ConsumerId {
        self.inner.id
    }

    /// Forwarded producer.
    #[must_use]
    pub fn producer_id(&self) -> ProducerId {
        self.inner.producer_id
    }

    /// Transport the consumer was created on.
    #[must_use]
    pub fn transport_id(&self) -> TransportId {
        self.inner.transport_id
    }

    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    /// What the receiving endpoint gets, as computed from its capabilities.
    #[must_use]
    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.inner.rtp_parameters
    }

    #[must_use]
    pub fn r#type(&self) -> ConsumerType {
        self.inner.consumer_type
    }

    /// Paused with [`Consumer::pause`]. Says nothing about the producer.
    #[must_use]
    pub fn paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    #[must_use]
    pub fn producer_paused(&self) -> bool {
        self.inner.state.lock().producer_paused
    }

    /// Share of the outgoing bitrate relative to other consumers on the transport, 1 by default.
    #[must_use]
    pub fn priority(&self) -> u8 {
        self.inner.state.lock().priority
    }

    #[must_use]
    pub fn score(&self) -> ConsumerScore {
        self.inner.state.lock().score.clone()
    }

    /// Layers requested with [`Consumer::set_preferred_layers`], simulcast and SVC only.
    #[must_use]
    pub fn preferred_layers(&self) -> Option<ConsumerLayers> {
        self.inner.state.lock().preferred_layers
    }

    /// Layers being sent right now, simulcast and SVC only.
    #[must_use]
    pub fn current_layers(&self) -> Option<ConsumerLayers> {
        self.inner.state.lock().current_layers
    }

    #[must_use]
    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner.lifecycle.closed()
    }

    /// Engine-side snapshot of the consumer.
    pub async fn dump(&self) -> Result<ConsumerDump, RequestError> {
        debug!("dump()");

        self.inner
            .link
            .request(messages::consumer_dump(self.inner.target))
            .await
    }

    /// Statistics of the outgoing stream, possibly followed by those of the producer streams.
    pub async fn get_stats(&self) -> Result<Vec<StatsReport>, RequestError> {
        debug!("get_stats()");

        self.inner
            .link
            .request(messages::consumer_get_stats(self.inner.target))
            .await
    }

    pub async fn pause(&self) -> Result<(), RequestError> {
        debug!("pause()");

        self.inner
            .link
            .request(messages::consumer_pause(self.inner.target))
            .await?;

        self.inner.update_paused(|state| state.paused = true);

        Ok(())
    }

    pub async fn resume(&self) -> Result<(), RequestError> {
        debug!("resume()");

        self.inner
            .link
            .request(messages::consumer_resume(self.inner.target))
            .await?;

        self.inner.update_paused(|state| state.paused = false);

        Ok(())
    }

    /// Highest layers to send, simulcast and SVC only. The engine answers with the layers it
    /// settled on.
    pub async fn set_preferred_layers(
        &self,
        consumer_layers: ConsumerLayers,
    ) -> Result<(), RequestError> {
        debug!("set_preferred_layers()");

        let preferred_layers = self
            .inner
            .link
            .request(messages::consumer_set_preferred_layers(
                self.inner.target,
                consumer_layers,
            ))
            .await?;

        self.inner.state.lock().preferred_layers = preferred_layers;

        Ok(())
    }

    /// Consumers with higher priority get a larger share of the estimated outgoing bitrate.
    pub async fn set_priority(&self, priority: u8) -> Result<(), RequestError> {
        debug!("set_priority()");

        let reply = self
            .inner
            .link
            .request(messages::consumer_set_priority(
                self.inner.target,
                PriorityData { priority },
            ))
            .await?;

        self.inner.state.lock().priority = reply.priority;

        Ok(())
    }

    /// Back to priority 1.
    pub async fn unset_priority(&self) -> Result<(), RequestError> {
        debug!("unset_priority()");

        self.set_priority(1).await
    }

    /// Asks the producer side for a key frame, video only.
    pub async fn request_key_frame(&self) -> Result<(), RequestError> {
        debug!("request_key_frame()");

        self.inner
            .link
            .request(messages::consumer_request_key_frame(self.inner.target))
            .await
    }

    /// Selects which trace events the engine emits for this consumer, see
    /// [`Consumer::on_trace`].
    pub async fn enable_trace_event(
        &self,
        types: Vec<ConsumerTraceEventType>,
    ) -> Result<(), RequestError> {
        debug!("enable_trace_event()");

        self.inner
            .link
            .request(messages::consumer_enable_trace_event(
                self.inner.target,
                TraceEventTypes { types },
            ))
            .await
    }

    pub fn close(&self) {
        self.inner.close();
    }

    /// RTP packet forwarded by a consumer on a
    /// [`DirectTransport`](crate::direct_transport::DirectTransport).
    pub fn on_rtp<F: Fn(&Bytes) + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.rtp.add(Arc::new(callback))
    }

    /// Consumer stopped sending, because of itself or its producer.
    pub fn on_pause<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.pause.add(Arc::new(callback))
    }

    /// Consumer sends again.
    pub fn on_resume<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.resume.add(Arc::new(callback))
    }

    pub fn on_producer_pause<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.producer_pause.add(Arc::new(callback))
    }

    pub fn on_producer_resume<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.producer_resume.add(Arc::new(callback))
    }

    pub fn on_score<F: Fn(&ConsumerScore) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.handlers.score.add(Arc::new(callback))
    }

    /// Layers being sent changed, `None` when there is not enough bitrate for even the lowest
    /// ones or nothing is sent at all.
    pub fn on_layers_change<F: Fn(&Option<ConsumerLayers>) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.handlers.layers_change.add(Arc::new(callback))
    }

    pub fn on_trace<F: Fn(&ConsumerTraceEvent) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner.handlers.trace.add(Arc::new(callback))
    }

    /// Producer was closed, which closes the consumer as well.
    pub fn on_producer_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.producer_close.add(Box::new(callback))
    }

    /// Transport was closed, which closes the consumer as well.
    pub fn on_transport_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner.lifecycle.on_parent_close(callback)
    }

    /// Consumer was closed, for whatever reason. Runs right away if it already is.
    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner.lifecycle.on_close(callback)
    }

    /// Transport went away, the engine already dropped this consumer.
    pub(super) fn transport_closed(&self) {
        self.inner.lifecycle.parent_closed(|| {});
    }
}

weak_handle!(
    /// Handle that doesn't keep the consumer open.
    WeakConsumer => Consumer
);
