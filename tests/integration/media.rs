//! Codecs and parameters shared by the tests.

use sfu_control::data_structures::TransportListenIp;
use sfu_control::producer::ProducerOptions;
use sfu_control::router::{Router, RouterOptions};
use sfu_control::rtp_parameters::{
    MediaKind, MimeType, RtcpFeedback, RtcpParameters, RtpCapabilities, RtpCodecCapability,
    RtpCodecParameters, RtpCodecParametersParameters, RtpEncodingParameters,
    RtpEncodingParametersRtx, RtpParameters,
};
use sfu_control::webrtc_transport::{TransportListenIps, WebRtcTransportOptions};
use std::net::{IpAddr, Ipv4Addr};
use std::num::{NonZeroU32, NonZeroU8};

pub fn media_codecs() -> Vec<RtpCodecCapability> {
    vec![
        RtpCodecCapability {
            channels: NonZeroU8::new(2),
            parameters: RtpCodecParametersParameters::from([
                ("useinbandfec", 1_u32.into()),
                ("foo", "bar".into()),
            ]),
            ..RtpCodecCapability::new(MimeType::OPUS, NonZeroU32::new(48000).unwrap())
        },
        RtpCodecCapability::new(MimeType::VP8, NonZeroU32::new(90000).unwrap()),
    ]
}

pub fn router_options() -> RouterOptions {
    RouterOptions::new(media_codecs())
}

pub fn listen_ip() -> TransportListenIp {
    TransportListenIp {
        ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        announced_ip: None,
    }
}

pub fn webrtc_transport_options() -> WebRtcTransportOptions {
    WebRtcTransportOptions::new(TransportListenIps::new(listen_ip()))
}

pub fn audio_producer_options() -> ProducerOptions {
    ProducerOptions::new(
        MediaKind::Audio,
        RtpParameters {
            mid: Some("AUDIO".to_string()),
            codecs: vec![RtpCodecParameters {
                channels: NonZeroU8::new(2),
                parameters: RtpCodecParametersParameters::from([
                    ("useinbandfec", 1_u32.into()),
                    ("usedtx", 1_u32.into()),
                ]),
                ..RtpCodecParameters::new(MimeType::OPUS, 111, NonZeroU32::new(48000).unwrap())
            }],
            header_extensions: vec![],
            encodings: vec![RtpEncodingParameters {
                ssrc: Some(11111111),
                dtx: Some(true),
                ..RtpEncodingParameters::default()
            }],
            rtcp: RtcpParameters {
                cname: Some("audio-1".to_string()),
                ..RtcpParameters::default()
            },
        },
    )
}

pub fn video_producer_options() -> ProducerOptions {
    ProducerOptions::new(
        MediaKind::Video,
        RtpParameters {
            mid: Some("VIDEO".to_string()),
            codecs: vec![
                RtpCodecParameters {
                    rtcp_feedback: vec![
                        RtcpFeedback::NACK,
                        RtcpFeedback::NACK_PLI,
                        RtcpFeedback::GOOG_REMB,
                    ],
                    ..RtpCodecParameters::new(MimeType::VP8, 112, NonZeroU32::new(90000).unwrap())
                },
                RtpCodecParameters {
                    parameters: RtpCodecParametersParameters::from([("apt", 112_u32.into())]),
                    ..RtpCodecParameters::new(
                        MimeType::VIDEO_RTX,
                        113,
                        NonZeroU32::new(90000).unwrap(),
                    )
                },
            ],
            header_extensions: vec![],
            encodings: vec![
                RtpEncodingParameters {
                    ssrc: Some(22222222),
                    rtx: Some(RtpEncodingParametersRtx { ssrc: 22222223 }),
                    ..RtpEncodingParameters::default()
                },
                RtpEncodingParameters {
                    ssrc: Some(22222224),
                    rtx: Some(RtpEncodingParametersRtx { ssrc: 22222225 }),
                    ..RtpEncodingParameters::default()
                },
            ],
            rtcp: RtcpParameters {
                cname: Some("video-1".to_string()),
                ..RtcpParameters::default()
            },
        },
    )
}

/// Receiver that supports everything the router does.
pub fn consumer_device_capabilities(router: &Router) -> RtpCapabilities {
    router.rtp_capabilities().clone().into()
}

/// Receiver that only supports video.
pub fn video_only_capabilities(router: &Router) -> RtpCapabilities {
    let mut capabilities = consumer_device_capabilities(router);
    capabilities
        .codecs
        .retain(|codec| codec.kind() == MediaKind::Video);
    capabilities
}
