use crate::data_structures::{AppData, StatsReport, TraceEvent};
use crate::messages::{self, Target, TraceEventTypes};
pub use crate::ortc::RtpMapping;
use crate::router::resource::{EngineLink, Lifecycle};
use crate::rtp_parameters::{MediaKind, RtpParameters};
use crate::transport::TransportId;
use crate::worker::{NotificationError, RequestError};
use bytes::Bytes;
use event_listener_primitives::{Bag, HandlerId};
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

resource_id!(
    /// [`Producer`] identifier.
    ProducerId
);

/// What [`Transport::produce`](crate::transport::Transport::produce) needs to know about the
/// incoming media.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ProducerOptions {
    /// Reused id of the producer on the other side of a pipe.
    pub(super) id: Option<ProducerId>,
    /// Audio or video.
    pub kind: MediaKind,
    /// What the endpoint sends.
    pub rtp_parameters: RtpParameters,
    /// Start paused. Default false.
    pub paused: bool,
    /// Minimum time in ms between two key frame requests sent to the endpoint, 0 for none.
    /// Video only.
    pub key_frame_request_delay: u32,
    /// Application data.
    pub app_data: AppData,
}

impl ProducerOptions {
    /// Options for the receiving end of a pipe, which keeps the id of the piped producer.
    #[must_use]
    pub fn new_pipe_transport(
        producer_id: ProducerId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Self {
        Self {
            id: Some(producer_id),
            ..Self::new(kind, rtp_parameters)
        }
    }

    #[must_use]
    pub fn new(kind: MediaKind, rtp_parameters: RtpParameters) -> Self {
        Self {
            id: None,
            kind,
            rtp_parameters,
            paused: false,
            key_frame_request_delay: 0,
            app_data: AppData::default(),
        }
    }
}

/// Engine-side snapshot of a producer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ProducerDump {
    /// Producer id.
    pub id: ProducerId,
    /// Audio or video.
    pub kind: MediaKind,
    /// Stream layout.
    #[serde(rename = "type")]
    pub producer_type: ProducerType,
    /// Whether media is being forwarded.
    pub paused: bool,
    /// Everything else the engine reported.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Layout of the RTP streams a producer receives.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerType {
    /// One stream without layers.
    Simple,
    /// Several streams, each possibly with temporal layers.
    Simulcast,
    /// One stream with spatial and temporal layers.
    Svc,
}

/// Transmission quality of one incoming stream.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerScore {
    /// Position of the stream in the producer encodings.
    #[serde(default)]
    pub encoding_idx: u32,
    pub ssrc: u32,
    #[serde(default)]
    pub rid: Option<String>,
    /// From 0 (unusable) to 10 (perfect).
    pub score: u8,
}

/// Orientation of the video source, signalled with the `urn:3gpp:video-orientation` header
/// extension.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct ProducerVideoOrientation {
    /// Source is a camera.
    pub camera: bool,
    /// Source is mirrored.
    pub flip: bool,
    /// Clockwise, in degrees: 0, 90, 180 or 270.
    pub rotation: u16,
}

/// Producer trace event kinds.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerTraceEventType {
    Rtp,
    KeyFrame,
    Nack,
    Pli,
    Fir,
}

/// Trace event emitted by a producer after [`Producer::enable_trace_event`].
pub type ProducerTraceEvent = TraceEvent<ProducerTraceEventType>;

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    Score(Vec<ProducerScore>),
    VideoOrientationChange(ProducerVideoOrientation),
    Trace(ProducerTraceEvent),
}

#[derive(Default)]
#[allow(clippy::type_complexity)]
struct Handlers {
    score: Bag<Arc<dyn Fn(&[ProducerScore]) + Send + Sync>>,
    video_orientation_change: Bag<Arc<dyn Fn(ProducerVideoOrientation) + Send + Sync>>,
    pause: Bag<Arc<dyn Fn() + Send + Sync>>,
    resume: Bag<Arc<dyn Fn() + Send + Sync>>,
    trace: Bag<Arc<dyn Fn(&ProducerTraceEvent) + Send + Sync>, ProducerTraceEvent>,
}

/// Everything a transport learned while creating a producer.
pub(super) struct ProducerSetup {
    pub(super) id: ProducerId,
    pub(super) transport_id: TransportId,
    pub(super) kind: MediaKind,
    pub(super) producer_type: ProducerType,
    pub(super) rtp_parameters: RtpParameters,
    pub(super) consumable_rtp_parameters: RtpParameters,
    pub(super) paused: bool,
    pub(super) direct: bool,
}

struct Inner {
    setup: ProducerSetup,
    target: Target,
    link: EngineLink,
    paused: AtomicBool,
    score: Arc<Mutex<Vec<ProducerScore>>>,
    handlers: Arc<Handlers>,
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

            self.link.spawn_close(messages::producer_close(self.target));
        }
    }
}

/// Producer on a network transport, the endpoint sends its media.
#[derive(Clone)]
#[must_use = "Producer will be closed on drop, make sure to keep it around for as long as needed"]
pub struct RegularProducer {
    inner: Arc<Inner>,
}

impl fmt::Debug for RegularProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegularProducer")
            .field("id", &self.inner.setup.id)
            .field("kind", &self.inner.setup.kind)
            .field("type", &self.inner.setup.producer_type)
            .field("paused", &self.inner.paused)
            .field("lifecycle", &self.inner.lifecycle)
            .finish()
    }
}

impl From<RegularProducer> for Producer {
    fn from(producer: RegularProducer) -> Self {
        Producer::Regular(producer)
    }
}

/// Producer on a [`DirectTransport`](crate::direct_transport::DirectTransport), the application
/// sends RTP packets itself with [`DirectProducer::send`].
#[derive(Clone)]
#[must_use = "Producer will be closed on drop, make sure to keep it around for as long as needed"]
pub struct DirectProducer {
    inner: Arc<Inner>,
}

impl fmt::Debug for DirectProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectProducer")
            .field("id", &self.inner.setup.id)
            .field("kind", &self.inner.setup.kind)
            .field("paused", &self.inner.paused)
            .field("lifecycle", &self.inner.lifecycle)
            .finish()
    }
}

impl From<DirectProducer> for Producer {
    fn from(producer: DirectProducer) -> Self {
        Producer::Direct(producer)
    }
}

/// Audio or video source injected into a router through a transport.
#[derive(Debug, Clone)]
#[non_exhaustive]
#[must_use = "Producer will be closed on drop, make sure to keep it around for as long as needed"]
pub enum Producer {
    /// On a network transport.
    Regular(RegularProducer),
    /// On a [`DirectTransport`](crate::direct_transport::DirectTransport).
    Direct(DirectProducer),
}

impl Producer {
    pub(super) fn new(
        setup: ProducerSetup,
        target: Target,
        link: EngineLink,
        app_data: AppData,
    ) -> Self {
        debug!("new() [id:{}]", setup.id);

        let handlers = Arc::<Handlers>::default();
        let score = Arc::<Mutex<Vec<ProducerScore>>>::default();
        let lifecycle = Lifecycle::default();

        lifecycle.keep({
            let handlers = Arc::clone(&handlers);
            let score = Arc::clone(&score);

            link.subscribe(setup.id, move |notification: Notification| match notification {
                Notification::Score(scores) => {
                    *score.lock() = scores.clone();
                    handlers.score.call(|callback| callback(&scores));
                }
                Notification::VideoOrientationChange(orientation) => {
                    handlers
                        .video_orientation_change
                        .call(|callback| callback(orientation));
                }
                Notification::Trace(trace) => {
                    handlers.trace.call_simple(&trace);
                }
            })
        });

        let inner = Arc::new(Inner {
            paused: AtomicBool::new(setup.paused),
            setup,
            target,
            link,
            score,
            handlers,
            app_data,
            lifecycle,
        });

        Self::from_inner(inner)
    }

    fn from_inner(inner: Arc<Inner>) -> Self {
        if inner.setup.direct {
            Self::Direct(DirectProducer { inner })
        } else {
            Self::Regular(RegularProducer { inner })
        }
    }

    fn inner(&self) -> &Arc<Inner> {
        match self {
            Producer::Regular(producer) => &producer.inner,
            Producer::Direct(producer) => &producer.inner,
        }
    }

    #[must_use]
    pub fn id(&self) -> ProducerId {
        self.inner().setup.id
    }

    /// Transport the producer was created on.
    #[must_use]
    pub fn transport_id(&self) -> TransportId {
        self.inner().setup.transport_id
    }

    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.inner().setup.kind
    }

    /// Parameters as the endpoint gave them, with CNAME and encodings filled in.
    #[must_use]
    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.inner().setup.rtp_parameters
    }

    #[must_use]
    pub fn r#type(&self) -> ProducerType {
        self.inner().setup.producer_type
    }

    #[must_use]
    pub fn paused(&self) -> bool {
        self.inner().paused.load(Ordering::SeqCst)
    }

    /// Latest score of each incoming stream.
    #[must_use]
    pub fn score(&self) -> Vec<ProducerScore> {
        self.inner().score.lock().clone()
    }

    #[must_use]
    pub fn app_data(&self) -> &AppData {
        &self.inner().app_data
    }

    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner().lifecycle.closed()
    }

    /// Router-side parameters every consumer of this producer is derived from.
    #[must_use]
    pub fn consumable_rtp_parameters(&self) -> &RtpParameters {
        &self.inner().setup.consumable_rtp_parameters
    }

    /// Engine-side snapshot of the producer.
    pub async fn dump(&self) -> Result<ProducerDump, RequestError> {
        debug!("dump()");

        let inner = self.inner();
        inner.link.request(messages::producer_dump(inner.target)).await
    }

    /// Statistics of every incoming stream.
    pub async fn get_stats(&self) -> Result<Vec<StatsReport>, RequestError> {
        debug!("get_stats()");

        let inner = self.inner();
        inner
            .link
            .request(messages::producer_get_stats(inner.target))
            .await
    }

    /// Stops forwarding media to consumers, they are told with a `producerpause` notification.
    pub async fn pause(&self) -> Result<(), RequestError> {
        debug!("pause()");

        let inner = self.inner();
        inner.link.request(messages::producer_pause(inner.target)).await?;

        if !inner.paused.swap(true, Ordering::SeqCst) {
            inner.handlers.pause.call_simple();
        }

        Ok(())
    }

    /// Forwards media to consumers again.
    pub async fn resume(&self) -> Result<(), RequestError> {
        debug!("resume()");

        let inner = self.inner();
        inner
            .link
            .request(messages::producer_resume(inner.target))
            .await?;

        if inner.paused.swap(false, Ordering::SeqCst) {
            inner.handlers.resume.call_simple();
        }

        Ok(())
    }

    /// Selects which trace events the engine emits for this producer, see
    /// [`Producer::on_trace`].
    pub async fn enable_trace_event(
        &self,
        types: Vec<ProducerTraceEventType>,
    ) -> Result<(), RequestError> {
        debug!("enable_trace_event()");

        let inner = self.inner();
        inner
            .link
            .request(messages::producer_enable_trace_event(
                inner.target,
                TraceEventTypes { types },
            ))
            .await
    }

    /// Closes the producer, the engine closes its consumers.
    pub fn close(&self) {
        self.inner().close();
    }

    pub fn on_score<F: Fn(&[ProducerScore]) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner().handlers.score.add(Arc::new(callback))
    }

    pub fn on_video_orientation_change<F: Fn(ProducerVideoOrientation) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner()
            .handlers
            .video_orientation_change
            .add(Arc::new(callback))
    }

    pub fn on_pause<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner().handlers.pause.add(Arc::new(callback))
    }

    pub fn on_resume<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner().handlers.resume.add(Arc::new(callback))
    }

    pub fn on_trace<F: Fn(&ProducerTraceEvent) + Send + Sync + 'static>(
        &self,
        callback: F,
    ) -> HandlerId {
        self.inner().handlers.trace.add(Arc::new(callback))
    }

    /// Transport was closed, which closes the producer as well.
    pub fn on_transport_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner().lifecycle.on_parent_close(callback)
    }

    /// Producer was closed, for whatever reason. Runs right away if it already is.
    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner().lifecycle.on_close(callback)
    }

    /// Transport went away, the engine already dropped this producer.
    pub(super) fn transport_closed(&self) {
        self.inner().lifecycle.parent_closed(|| {});
    }
}

impl DirectProducer {
    /// Injects one RTP packet.
    pub async fn send(&self, rtp_packet: Bytes) -> Result<(), NotificationError> {
        self.inner
            .link
            .payload_channel()
            .notify(messages::producer_send(self.inner.target), rtp_packet)
            .await
    }
}

weak_handle!(
    /// Handle that doesn't keep the producer open.
    WeakProducer => enum Producer
);
