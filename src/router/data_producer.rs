use crate::data_structures::{AppData, StatsReport, WebRtcMessage};
use crate::messages::{self, PpidData, Target};
use crate::router::resource::{EngineLink, Lifecycle};
use crate::sctp_parameters::SctpStreamParameters;
use crate::transport::TransportId;
use crate::worker::{NotificationError, RequestError};
use event_listener_primitives::HandlerId;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

resource_id!(
    /// [`DataProducer`] identifier.
    DataProducerId
);

/// What [`Transport::produce_data`](crate::transport::Transport::produce_data) needs to know
/// about the incoming messages.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct DataProducerOptions {
    /// Reused id of the data producer on the other side of a pipe.
    pub(super) id: Option<DataProducerId>,
    /// How the endpoint sends over SCTP. Absent on a direct transport.
    pub(super) sctp_stream_parameters: Option<SctpStreamParameters>,
    /// Data channel label.
    pub label: String,
    /// Data channel sub-protocol.
    pub protocol: String,
    /// Application data.
    pub app_data: AppData,
}

impl DataProducerOptions {
    /// Receiving end of a pipe, keeps the id of the piped data producer.
    #[must_use]
    pub(crate) fn new_pipe_transport(
        data_producer_id: DataProducerId,
        sctp_stream_parameters: SctpStreamParameters,
    ) -> Self {
        Self {
            id: Some(data_producer_id),
            ..Self::new_sctp(sctp_stream_parameters)
        }
    }

    /// Messages arrive over an SCTP stream.
    #[must_use]
    pub fn new_sctp(sctp_stream_parameters: SctpStreamParameters) -> Self {
        Self {
            sctp_stream_parameters: Some(sctp_stream_parameters),
            ..Self::new_direct()
        }
    }

    /// Messages come from the application, on a
    /// [`DirectTransport`](crate::direct_transport::DirectTransport).
    #[must_use]
    pub fn new_direct() -> Self {
        Self {
            id: None,
            sctp_stream_parameters: None,
            label: String::new(),
            protocol: String::new(),
            app_data: AppData::default(),
        }
    }
}

/// Where the messages of a data producer come from.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataProducerType {
    /// SCTP stream of a network transport.
    Sctp,
    /// The application, see [`DirectDataProducer::send`].
    Direct,
}

/// Engine-side snapshot of a data producer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DataProducerDump {
    /// Data producer id.
    pub id: DataProducerId,
    /// Where messages come from.
    #[serde(rename = "type")]
    pub data_producer_type: DataProducerType,
    /// Data channel label.
    pub label: String,
    /// Data channel sub-protocol.
    pub protocol: String,
    /// Everything else the engine reported.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Everything a transport learned while creating a data producer.
pub(super) struct DataProducerSetup {
    pub(super) id: DataProducerId,
    pub(super) transport_id: TransportId,
    pub(super) data_producer_type: DataProducerType,
    pub(super) sctp_stream_parameters: Option<SctpStreamParameters>,
    pub(super) label: String,
    pub(super) protocol: String,
}

struct Inner {
    setup: DataProducerSetup,
    target: Target,
    link: EngineLink,
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
                .spawn_close(messages::data_producer_close(self.target));
        }
    }
}

/// Data producer fed over SCTP by the remote endpoint.
#[derive(Clone)]
#[must_use = "Data producer will be closed on drop, make sure to keep it around for as long as needed"]
pub struct RegularDataProducer {
    inner: Arc<Inner>,
}

impl fmt::Debug for RegularDataProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegularDataProducer")
            .field("id", &self.inner.setup.id)
            .field("label", &self.inner.setup.label)
            .field("lifecycle", &self.inner.lifecycle)
            .finish()
    }
}

impl From<RegularDataProducer> for DataProducer {
    fn from(data_producer: RegularDataProducer) -> Self {
        DataProducer::Regular(data_producer)
    }
}

/// Data producer fed by the application with [`DirectDataProducer::send`].
#[derive(Clone)]
#[must_use = "Data producer will be closed on drop, make sure to keep it around for as long as needed"]
pub struct DirectDataProducer {
    inner: Arc<Inner>,
}

impl fmt::Debug for DirectDataProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectDataProducer")
            .field("id", &self.inner.setup.id)
            .field("label", &self.inner.setup.label)
            .field("lifecycle", &self.inner.lifecycle)
            .finish()
    }
}

impl From<DirectDataProducer> for DataProducer {
    fn from(data_producer: DirectDataProducer) -> Self {
        DataProducer::Direct(data_producer)
    }
}

/// Source of data channel messages injected into a router through a transport.
#[derive(Debug, Clone)]
#[non_exhaustive]
#[must_use = "Data producer will be closed on drop, make sure to keep it around for as long as needed"]
pub enum DataProducer {
    /// Fed over SCTP.
    Regular(RegularDataProducer),
    /// Fed by the application.
    Direct(DirectDataProducer),
}

impl DataProducer {
    pub(super) fn new(
        setup: DataProducerSetup,
        target: Target,
        link: EngineLink,
        app_data: AppData,
    ) -> Self {
        debug!("new() [id:{}]", setup.id);

        Self::from_inner(Arc::new(Inner {
            setup,
            target,
            link,
            app_data,
            lifecycle: Lifecycle::default(),
        }))
    }

    fn from_inner(inner: Arc<Inner>) -> Self {
        match inner.setup.data_producer_type {
            DataProducerType::Sctp => Self::Regular(RegularDataProducer { inner }),
            DataProducerType::Direct => Self::Direct(DirectDataProducer { inner }),
        }
    }

    fn inner(&self) -> &Arc<Inner> {
        match self {
            DataProducer::Regular(data_producer) => &data_producer.inner,
            DataProducer::Direct(data_producer) => &data_producer.inner,
        }
    }

    #[must_use]
    pub fn id(&self) -> DataProducerId {
        self.inner().setup.id
    }

    /// Transport the data producer was created on.
    #[must_use]
    pub fn transport_id(&self) -> TransportId {
        self.inner().setup.transport_id
    }

    #[must_use]
    pub fn r#type(&self) -> DataProducerType {
        self.inner().setup.data_producer_type
    }

    /// `None` for direct data producers.
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

    /// Engine-side snapshot of the data producer.
    pub async fn dump(&self) -> Result<DataProducerDump, RequestError> {
        debug!("dump()");

        let inner = self.inner();
        inner
            .link
            .request(messages::data_producer_dump(inner.target))
            .await
    }

    /// Message and byte counters.
    pub async fn get_stats(&self) -> Result<Vec<StatsReport>, RequestError> {
        debug!("get_stats()");

        let inner = self.inner();
        inner
            .link
            .request(messages::data_producer_get_stats(inner.target))
            .await
    }

    /// Closes the data producer, the engine closes its data consumers.
    pub fn close(&self) {
        self.inner().close();
    }

    /// Transport was closed, which closes the data producer as well.
    pub fn on_transport_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner().lifecycle.on_parent_close(callback)
    }

    /// Data producer was closed, for whatever reason. Runs right away if it already is.
    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner().lifecycle.on_close(callback)
    }

    pub(super) fn transport_closed(&self) {
        self.inner().lifecycle.parent_closed(|| {});
    }
}

impl DirectDataProducer {
    /// Injects one message, delivered to every data consumer of this data producer.
    pub async fn send(&self, message: WebRtcMessage) -> Result<(), NotificationError> {
        let (ppid, payload) = message.into_ppid_and_payload();

        self.inner
            .link
            .payload_channel()
            .notify(
                messages::data_producer_send(self.inner.target, PpidData { ppid }),
                payload,
            )
            .await
    }
}

weak_handle!(
    /// Handle that doesn't keep the data producer open.
    WeakDataProducer => enum DataProducer
);
