//! Control plane for a selective forwarding unit (SFU) media engine.
//!
//! The media engine runs as a separate process (or any peer reachable over a pair of byte
//! streams) and this crate drives it over two framed channels: a JSON control channel for
//! requests, responses and notifications, and a payload channel that carries binary payloads
//! next to their JSON headers.
//!
//! On top of those channels the crate exposes a tree of resources, each one owned by its parent
//! and closed together with it:
//! * [`Worker`](worker::Worker) is one engine
//! * [`Router`](router::Router) is a media forwarding context inside of a worker
//! * transports ([`WebRtcTransport`](webrtc_transport::WebRtcTransport),
//!   [`PlainTransport`](plain_transport::PlainTransport),
//!   [`PipeTransport`](pipe_transport::PipeTransport) and
//!   [`DirectTransport`](direct_transport::DirectTransport)) carry media and data in and out of a
//!   router
//! * [`Producer`](producer::Producer), [`Consumer`](consumer::Consumer),
//!   [`DataProducer`](data_producer::DataProducer) and
//!   [`DataConsumer`](data_consumer::DataConsumer) live on transports
//! * RTP observers ([`AudioLevelObserver`](audio_level_observer::AudioLevelObserver) and
//!   [`ActiveSpeakerObserver`](active_speaker_observer::ActiveSpeakerObserver)) inspect audio of
//!   selected producers
//!
//! Codec negotiation between router capabilities, producer parameters and consumer capabilities
//! is done locally in the [`ortc`] module.

#![warn(rust_2018_idioms, missing_debug_implementations)]

#[macro_use]
mod macros;

pub mod data_structures;
mod messages;
#[doc(hidden)]
pub mod ortc;
pub mod prelude;
pub mod router;
pub mod rtp_parameters;
pub mod scalability_modes;
pub mod sctp_parameters;
pub mod srtp_parameters;
pub mod supported_rtp_capabilities;
pub mod worker;
pub mod worker_manager;

pub mod audio_level_observer {
    //! Periodic volume reports of the loudest audio producers.

    pub use crate::router::audio_level_observer::*;
}

pub mod active_speaker_observer {
    //! Dominant speaker detection among a set of audio producers.

    pub use crate::router::active_speaker_observer::*;
}

pub mod consumer {
    //! Media leaving a router towards one endpoint.

    pub use crate::router::consumer::*;
}

pub mod data_consumer {
    //! Data messages leaving a router, over an SCTP stream or straight to the application.

    pub use crate::router::data_consumer::*;
}

pub mod producer {
    //! Media entering a router from one endpoint.

    pub use crate::router::producer::*;
}

pub mod data_producer {
    //! Data messages entering a router, over an SCTP stream or straight from the application.

    pub use crate::router::data_producer::*;
}

pub mod transport {
    //! What every kind of transport has in common.

    pub use crate::router::transport::*;
}

pub mod webrtc_transport {
    //! Transport towards browsers and other WebRTC endpoints, secured with ICE and DTLS.

    pub use crate::router::webrtc_transport::*;
}

pub mod plain_transport {
    //! Plain RTP and RTCP over UDP, with optional SRTP and SCTP.

    pub use crate::router::plain_transport::*;
}

pub mod pipe_transport {
    //! Link between two routers.

    pub use crate::router::pipe_transport::*;
}

pub mod direct_transport {
    //! Media and data exchanged with the application itself.

    pub use crate::router::direct_transport::*;
}

pub mod rtp_observer {
    //! Common interface of the observers that watch a set of audio producers.

    pub use crate::router::rtp_observer::*;
}
