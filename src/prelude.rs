//! Everything most applications need, in one import.
//!
//! ```
//! # #[allow(unused_imports)]
//! use sfu_control::prelude::*;
//! ```

pub use crate::worker_manager::WorkerManager;

pub use crate::worker::{Worker, WorkerEndpoints, WorkerSettings};

pub use crate::router::{
    NewRtpObserver, NewTransport, PipeDataProducerToRouterError, PipeDataProducerToRouterPair,
    PipeProducerToRouterError, PipeProducerToRouterPair, PipeToRouterOptions, Router,
    RouterOptions, WeakRouter,
};

pub use crate::direct_transport::{DirectTransport, DirectTransportOptions, WeakDirectTransport};
pub use crate::pipe_transport::{
    PipeTransport, PipeTransportOptions, PipeTransportRemoteParameters, WeakPipeTransport,
};
pub use crate::plain_transport::{
    PlainTransport, PlainTransportOptions, PlainTransportRemoteParameters, WeakPlainTransport,
};
pub use crate::transport::{
    ConsumeDataError, ConsumeError, ProduceDataError, ProduceError, Transport, TransportDump,
    TransportGeneric, TransportId, TransportTraceEvent, TransportTraceEventType,
};
pub use crate::webrtc_transport::{
    TransportListenIps, WeakWebRtcTransport, WebRtcTransport, WebRtcTransportOptions,
    WebRtcTransportRemoteParameters,
};

pub use crate::active_speaker_observer::{
    ActiveSpeakerObserver, ActiveSpeakerObserverDominantSpeaker, ActiveSpeakerObserverOptions,
    WeakActiveSpeakerObserver,
};
pub use crate::audio_level_observer::{
    AudioLevelObserver, AudioLevelObserverOptions, AudioLevelObserverVolume, WeakAudioLevelObserver,
};
pub use crate::rtp_observer::{RtpObserver, RtpObserverAddProducerOptions, RtpObserverId};

pub use crate::consumer::{Consumer, ConsumerId, ConsumerLayers, ConsumerOptions, WeakConsumer};
pub use crate::data_consumer::{
    DataConsumer, DataConsumerId, DataConsumerOptions, DirectDataConsumer, RegularDataConsumer,
    WeakDataConsumer,
};
pub use crate::data_producer::{
    DataProducer, DataProducerId, DataProducerOptions, DirectDataProducer, RegularDataProducer,
    WeakDataProducer,
};
pub use crate::producer::{Producer, ProducerId, ProducerOptions, WeakProducer};

pub use crate::data_structures::{
    AppData, DtlsParameters, IceCandidate, IceParameters, StatsReport, TraceEvent,
    TransportListenIp, TransportTuple, WebRtcMessage,
};
pub use crate::rtp_parameters::{
    MediaKind, MimeType, RtcpFeedback, RtpCapabilities, RtpCapabilitiesFinalized,
    RtpCodecCapability, RtpCodecParametersParameters, RtpParameters,
};
pub use crate::sctp_parameters::SctpStreamParameters;
pub use crate::srtp_parameters::SrtpCryptoSuite;
