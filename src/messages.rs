//! Everything this crate sends to the engine. A request carries its method name, the ids of the
//! object it addresses and an optional body; the type its response is parsed into travels along
//! with it in [`Call`].

use crate::active_speaker_observer::ActiveSpeakerObserverOptions;
use crate::audio_level_observer::AudioLevelObserverOptions;
use crate::consumer::{ConsumerDump, ConsumerId, ConsumerLayers, ConsumerScore, ConsumerType};
use crate::data_consumer::{DataConsumerDump, DataConsumerId, DataConsumerType};
use crate::data_producer::{DataProducerDump, DataProducerId, DataProducerType};
use crate::data_structures::{DtlsParameters, DtlsRole, IceParameters, StatsReport, TransportTuple};
use crate::direct_transport::DirectTransportOptions;
use crate::ortc::RtpMapping;
use crate::producer::{ProducerDump, ProducerId, ProducerType};
use crate::router::pipe_transport::PipeTransportState;
use crate::router::plain_transport::PlainTransportState;
use crate::router::webrtc_transport::WebRtcTransportState;
use crate::router::{RouterDump, RouterId};
use crate::rtp_observer::RtpObserverId;
use crate::rtp_parameters::{MediaKind, RtpEncodingParameters, RtpParameters};
use crate::sctp_parameters::SctpStreamParameters;
use crate::srtp_parameters::SrtpParameters;
use crate::transport::{TransportDump, TransportId};
use crate::worker::{WorkerDump, WorkerResourceUsage, WorkerUpdateSettings};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::net::IpAddr;

/// Request to the engine, answered with `Response`.
pub(crate) trait Request: Debug + Serialize {
    type Response: DeserializeOwned;

    /// Request method to call on the engine.
    fn as_method(&self) -> &'static str;
}

/// Fire-and-forget message to the engine, sent over the payload channel with a binary payload.
pub(crate) trait Notification: Debug + Serialize {
    /// Event name on the engine side.
    fn as_event(&self) -> &'static str;
}

/// Ids the engine looks the addressed object up by, sent as the `internal` member. Ids that are
/// not set are left out.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Target {
    #[serde(skip_serializing_if = "Option::is_none")]
    router_id: Option<RouterId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transport_id: Option<TransportId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    producer_id: Option<ProducerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    consumer_id: Option<ConsumerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_producer_id: Option<DataProducerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_consumer_id: Option<DataConsumerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rtp_observer_id: Option<RtpObserverId>,
}

impl Target {
    pub(crate) fn router(router_id: RouterId) -> Self {
        Self {
            router_id: Some(router_id),
            ..Self::default()
        }
    }

    pub(crate) fn transport(self, transport_id: TransportId) -> Self {
        Self {
            transport_id: Some(transport_id),
            ..self
        }
    }

    pub(crate) fn producer(self, producer_id: ProducerId) -> Self {
        Self {
            producer_id: Some(producer_id),
            ..self
        }
    }

    pub(crate) fn consumer(self, consumer_id: ConsumerId) -> Self {
        Self {
            consumer_id: Some(consumer_id),
            ..self
        }
    }

    pub(crate) fn data_producer(self, data_producer_id: DataProducerId) -> Self {
        Self {
            data_producer_id: Some(data_producer_id),
            ..self
        }
    }

    pub(crate) fn data_consumer(self, data_consumer_id: DataConsumerId) -> Self {
        Self {
            data_consumer_id: Some(data_consumer_id),
            ..self
        }
    }

    pub(crate) fn rtp_observer(self, rtp_observer_id: RtpObserverId) -> Self {
        Self {
            rtp_observer_id: Some(rtp_observer_id),
            ..self
        }
    }
}

/// Control channel request whose reply is parsed into `R`.
#[derive(Serialize)]
pub(crate) struct Call<D, R> {
    #[serde(skip)]
    method: &'static str,
    #[serde(rename = "internal", skip_serializing_if = "Option::is_none")]
    target: Option<Target>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<D>,
    #[serde(skip)]
    response: PhantomData<fn() -> R>,
}

impl<D: Debug, R> Debug for Call<D, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("method", &self.method)
            .field("target", &self.target)
            .field("data", &self.data)
            .finish()
    }
}

impl<D, R> Request for Call<D, R>
where
    D: Debug + Serialize,
    R: DeserializeOwned,
{
    type Response = R;

    fn as_method(&self) -> &'static str {
        self.method
    }
}

/// Payload channel notification, the binary payload goes next to it.
#[derive(Debug, Serialize)]
pub(crate) struct Event<D> {
    #[serde(skip)]
    event: &'static str,
    internal: Target,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<D>,
}

impl<D: Debug + Serialize> Notification for Event<D> {
    fn as_event(&self) -> &'static str {
        self.event
    }
}

// Every addressed request becomes a function taking the target (and the body, if any) and
// returning a `Call` typed with its response.
macro_rules! calls {
    (@data) => { () };
    (@data $data_type: ty) => { $data_type };
    (@body) => { None };
    (@body $data: ident) => { Some($data) };
    (
        $(
            $name: ident($($data: ident: $data_type: ty)?) => $method: literal -> $response: ty;
        )*
    ) => {
        $(
            pub(crate) fn $name(
                target: Target
                $(, $data: $data_type)?
            ) -> Call<calls!(@data $($data_type)?), $response> {
                Call {
                    method: $method,
                    target: Some(target),
                    data: calls!(@body $($data)?),
                    response: PhantomData,
                }
            }
        )*
    };
}

pub(crate) fn worker_dump() -> Call<(), WorkerDump> {
    Call {
        method: "worker.dump",
        target: None,
        data: None,
        response: PhantomData,
    }
}

pub(crate) fn worker_get_resource_usage() -> Call<(), WorkerResourceUsage> {
    Call {
        method: "worker.getResourceUsage",
        target: None,
        data: None,
        response: PhantomData,
    }
}

pub(crate) fn worker_update_settings(data: WorkerUpdateSettings) -> Call<WorkerUpdateSettings, ()> {
    Call {
        method: "worker.updateSettings",
        target: None,
        data: Some(data),
        response: PhantomData,
    }
}

/// Creation options of a network transport plus the flag telling the engine whether its SCTP
/// association backs WebRTC data channels.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NetworkTransportData<O> {
    #[serde(flatten)]
    pub(crate) options: O,
    pub(crate) is_data_channel: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct DirectTransportData {
    pub(crate) direct: bool,
    #[serde(flatten)]
    pub(crate) options: DirectTransportOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WebRtcConnectData {
    pub(crate) dtls_parameters: DtlsParameters,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WebRtcConnectReply {
    pub(crate) dtls_local_role: DtlsRole,
}

/// Remote address of a plain or pipe transport, fields the caller left out are not sent.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RemoteAddressData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) rtcp_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) srtp_parameters: Option<SrtpParameters>,
}

/// Tuples and SRTP parameters the engine settled on while connecting.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RemoteAddressReply {
    #[serde(default)]
    pub(crate) tuple: Option<TransportTuple>,
    #[serde(default)]
    pub(crate) rtcp_tuple: Option<TransportTuple>,
    #[serde(default)]
    pub(crate) srtp_parameters: Option<SrtpParameters>,
}

#[derive(Debug, Serialize)]
pub(crate) struct BitrateData {
    pub(crate) bitrate: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RestartIceReply {
    pub(crate) ice_parameters: IceParameters,
}

#[derive(Debug, Serialize)]
pub(crate) struct TraceEventTypes<T> {
    pub(crate) types: Vec<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProduceData {
    pub(crate) kind: MediaKind,
    pub(crate) rtp_parameters: RtpParameters,
    pub(crate) rtp_mapping: RtpMapping,
    pub(crate) key_frame_request_delay: u32,
    pub(crate) paused: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProduceReply {
    #[serde(rename = "type")]
    pub(crate) producer_type: ProducerType,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConsumeData {
    pub(crate) kind: MediaKind,
    pub(crate) rtp_parameters: RtpParameters,
    #[serde(rename = "type")]
    pub(crate) consumer_type: ConsumerType,
    pub(crate) consumable_rtp_encodings: Vec<RtpEncodingParameters>,
    pub(crate) paused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) preferred_layers: Option<ConsumerLayers>,
    pub(crate) ignore_dtx: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConsumeReply {
    pub(crate) paused: bool,
    pub(crate) producer_paused: bool,
    pub(crate) score: ConsumerScore,
    #[serde(default)]
    pub(crate) preferred_layers: Option<ConsumerLayers>,
}

/// Body of `transport.produceData` and `transport.consumeData`, the engine replies with the same
/// shape after filling in what it decided.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DataChannelData<T> {
    #[serde(rename = "type")]
    pub(crate) channel_type: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) sctp_stream_parameters: Option<SctpStreamParameters>,
    pub(crate) label: String,
    pub(crate) protocol: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct PriorityData {
    pub(crate) priority: u8,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PriorityReply {
    pub(crate) priority: u8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BufferedAmountReply {
    pub(crate) buffered_amount: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct ThresholdData {
    pub(crate) threshold: u32,
}

/// SCTP payload protocol identifier of a data channel message.
#[derive(Debug, Serialize)]
pub(crate) struct PpidData {
    pub(crate) ppid: u32,
}

calls! {
    worker_create_router() => "worker.createRouter" -> ();

    router_close() => "router.close" -> ();
    router_dump() => "router.dump" -> RouterDump;
    router_create_webrtc_transport(
        data: NetworkTransportData<crate::webrtc_transport::WebRtcTransportOptions>
    ) => "router.createWebRtcTransport" -> WebRtcTransportState;
    router_create_plain_transport(
        data: NetworkTransportData<crate::plain_transport::PlainTransportOptions>
    ) => "router.createPlainTransport" -> PlainTransportState;
    router_create_pipe_transport(
        data: NetworkTransportData<crate::pipe_transport::PipeTransportOptions>
    ) => "router.createPipeTransport" -> PipeTransportState;
    router_create_direct_transport(data: DirectTransportData) => "router.createDirectTransport" -> ();
    router_create_audio_level_observer(
        data: AudioLevelObserverOptions
    ) => "router.createAudioLevelObserver" -> ();
    router_create_active_speaker_observer(
        data: ActiveSpeakerObserverOptions
    ) => "router.createActiveSpeakerObserver" -> ();

    transport_close() => "transport.close" -> ();
    transport_dump() => "transport.dump" -> TransportDump;
    transport_get_stats() => "transport.getStats" -> Vec<StatsReport>;
    transport_connect_webrtc(data: WebRtcConnectData) => "transport.connect" -> WebRtcConnectReply;
    transport_connect_address(data: RemoteAddressData) => "transport.connect" -> RemoteAddressReply;
    transport_set_max_incoming_bitrate(data: BitrateData) => "transport.setMaxIncomingBitrate" -> ();
    transport_set_max_outgoing_bitrate(data: BitrateData) => "transport.setMaxOutgoingBitrate" -> ();
    transport_restart_ice() => "transport.restartIce" -> RestartIceReply;
    transport_enable_trace_event(
        data: TraceEventTypes<crate::transport::TransportTraceEventType>
    ) => "transport.enableTraceEvent" -> ();
    transport_produce(data: ProduceData) => "transport.produce" -> ProduceReply;
    transport_consume(data: ConsumeData) => "transport.consume" -> ConsumeReply;
    transport_produce_data(
        data: DataChannelData<DataProducerType>
    ) => "transport.produceData" -> DataChannelData<DataProducerType>;
    transport_consume_data(
        data: DataChannelData<DataConsumerType>
    ) => "transport.consumeData" -> DataChannelData<DataConsumerType>;

    producer_close() => "producer.close" -> ();
    producer_dump() => "producer.dump" -> ProducerDump;
    producer_get_stats() => "producer.getStats" -> Vec<StatsReport>;
    producer_pause() => "producer.pause" -> ();
    producer_resume() => "producer.resume" -> ();
    producer_enable_trace_event(
        data: TraceEventTypes<crate::producer::ProducerTraceEventType>
    ) => "producer.enableTraceEvent" -> ();

    consumer_close() => "consumer.close" -> ();
    consumer_dump() => "consumer.dump" -> ConsumerDump;
    consumer_get_stats() => "consumer.getStats" -> Vec<StatsReport>;
    consumer_pause() => "consumer.pause" -> ();
    consumer_resume() => "consumer.resume" -> ();
    consumer_set_preferred_layers(
        data: ConsumerLayers
    ) => "consumer.setPreferredLayers" -> Option<ConsumerLayers>;
    consumer_set_priority(data: PriorityData) => "consumer.setPriority" -> PriorityReply;
    consumer_request_key_frame() => "consumer.requestKeyFrame" -> ();
    consumer_enable_trace_event(
        data: TraceEventTypes<crate::consumer::ConsumerTraceEventType>
    ) => "consumer.enableTraceEvent" -> ();

    data_producer_close() => "dataProducer.close" -> ();
    data_producer_dump() => "dataProducer.dump" -> DataProducerDump;
    data_producer_get_stats() => "dataProducer.getStats" -> Vec<StatsReport>;

    data_consumer_close() => "dataConsumer.close" -> ();
    data_consumer_dump() => "dataConsumer.dump" -> DataConsumerDump;
    data_consumer_get_stats() => "dataConsumer.getStats" -> Vec<StatsReport>;
    data_consumer_get_buffered_amount() => "dataConsumer.getBufferedAmount" -> BufferedAmountReply;
    data_consumer_set_buffered_amount_low_threshold(
        data: ThresholdData
    ) => "dataConsumer.setBufferedAmountLowThreshold" -> ();
    // Payload channel request, the message itself is the payload
    data_consumer_send(data: PpidData) => "dataConsumer.send" -> ();

    rtp_observer_close() => "rtpObserver.close" -> ();
    rtp_observer_pause() => "rtpObserver.pause" -> ();
    rtp_observer_resume() => "rtpObserver.resume" -> ();
    rtp_observer_add_producer() => "rtpObserver.addProducer" -> ();
    rtp_observer_remove_producer() => "rtpObserver.removeProducer" -> ();
}

pub(crate) fn transport_send_rtcp(internal: Target) -> Event<()> {
    Event {
        event: "transport.sendRtcp",
        internal,
        data: None,
    }
}

pub(crate) fn producer_send(internal: Target) -> Event<()> {
    Event {
        event: "producer.send",
        internal,
        data: None,
    }
}

pub(crate) fn data_producer_send(internal: Target, data: PpidData) -> Event<PpidData> {
    Event {
        event: "dataProducer.send",
        internal,
        data: Some(data),
    }
}
