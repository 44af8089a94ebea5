use crate::rtp_parameters::{
    MediaKind, MimeType, RtcpFeedback, RtpCapabilities, RtpCodecCapability,
    RtpCodecParametersParameters, RtpHeaderExtension, RtpHeaderExtensionDirection,
    RtpHeaderExtensionUri,
};
use std::num::{NonZeroU32, NonZeroU8};

fn codec(
    mime_type: MimeType,
    preferred_payload_type: Option<u8>,
    clock_rate: u32,
    channels: Option<u8>,
    parameters: RtpCodecParametersParameters,
    rtcp_feedback: &[RtcpFeedback],
) -> RtpCodecCapability {
    // Table values below are all non-zero.
    RtpCodecCapability {
        mime_type,
        preferred_payload_type,
        clock_rate: NonZeroU32::new(clock_rate).unwrap(),
        channels: channels.and_then(NonZeroU8::new),
        parameters,
        rtcp_feedback: rtcp_feedback.to_vec(),
    }
}

fn header_extension(
    kind: MediaKind,
    uri: RtpHeaderExtensionUri,
    preferred_id: u16,
    direction: RtpHeaderExtensionDirection,
) -> RtpHeaderExtension {
    RtpHeaderExtension {
        kind,
        uri,
        preferred_id,
        preferred_encrypt: false,
        direction,
    }
}

/// Codecs and RTP header extensions the engine is able to handle.
pub fn get_supported_rtp_capabilities() -> RtpCapabilities {
    let audio_feedback = [RtcpFeedback::TRANSPORT_CC];
    let video_feedback = [
        RtcpFeedback::NACK,
        RtcpFeedback::NACK_PLI,
        RtcpFeedback::CCM_FIR,
        RtcpFeedback::GOOG_REMB,
        RtcpFeedback::TRANSPORT_CC,
    ];
    let none = RtpCodecParametersParameters::default;

    let mut codecs = vec![
        codec(MimeType::OPUS, None, 48000, Some(2), none(), &audio_feedback),
        codec(
            MimeType::MULTI_CHANNEL_OPUS,
            None,
            48000,
            Some(4),
            RtpCodecParametersParameters::from([
                // Quad channel.
                ("channel_mapping", "0,1,2,3".into()),
                ("num_streams", 2_u32.into()),
                ("coupled_streams", 2_u32.into()),
            ]),
            &audio_feedback,
        ),
        codec(
            MimeType::MULTI_CHANNEL_OPUS,
            None,
            48000,
            Some(6),
            RtpCodecParametersParameters::from([
                // 5.1.
                ("channel_mapping", "0,4,1,2,3,5".into()),
                ("num_streams", 4_u32.into()),
                ("coupled_streams", 2_u32.into()),
            ]),
            &audio_feedback,
        ),
        codec(
            MimeType::MULTI_CHANNEL_OPUS,
            None,
            48000,
            Some(8),
            RtpCodecParametersParameters::from([
                // 7.1.
                ("channel_mapping", "0,6,1,2,3,4,5,7".into()),
                ("num_streams", 5_u32.into()),
                ("coupled_streams", 3_u32.into()),
            ]),
            &audio_feedback,
        ),
        codec(MimeType::PCMU, Some(0), 8000, None, none(), &audio_feedback),
        codec(MimeType::PCMA, Some(8), 8000, None, none(), &audio_feedback),
        codec(MimeType::ISAC, None, 32000, None, none(), &audio_feedback),
        codec(MimeType::ISAC, None, 16000, None, none(), &audio_feedback),
        codec(MimeType::G722, Some(9), 8000, None, none(), &audio_feedback),
        codec(MimeType::ILBC, None, 8000, None, none(), &audio_feedback),
    ];

    for clock_rate in [24000, 16000, 12000, 8000] {
        codecs.push(codec(
            MimeType::SILK,
            None,
            clock_rate,
            None,
            none(),
            &audio_feedback,
        ));
    }
    for clock_rate in [32000, 16000, 8000] {
        let payload_type = (clock_rate == 8000).then(|| 13);
        codecs.push(codec(MimeType::CN, payload_type, clock_rate, None, none(), &[]));
    }
    for clock_rate in [48000, 32000, 16000, 8000] {
        codecs.push(codec(
            MimeType::TELEPHONE_EVENT,
            None,
            clock_rate,
            None,
            none(),
            &[],
        ));
    }

    codecs.push(codec(MimeType::VP8, None, 90000, None, none(), &video_feedback));
    codecs.push(codec(MimeType::VP9, None, 90000, None, none(), &video_feedback));
    for mime_type in [MimeType::H264, MimeType::H265] {
        for packetization_mode in [1_u32, 0] {
            codecs.push(codec(
                mime_type.clone(),
                None,
                90000,
                None,
                RtpCodecParametersParameters::from([
                    ("packetization-mode", packetization_mode.into()),
                    ("level-asymmetry-allowed", 1_u32.into()),
                ]),
                &video_feedback,
            ));
        }
    }

    use MediaKind::{Audio, Video};
    use RtpHeaderExtensionDirection::{RecvOnly, SendRecv};
    use RtpHeaderExtensionUri::*;

    let header_extensions = vec![
        header_extension(Audio, Mid, 1, SendRecv),
        header_extension(Video, Mid, 1, SendRecv),
        header_extension(Video, RtpStreamId, 2, RecvOnly),
        header_extension(Video, RepairRtpStreamId, 3, RecvOnly),
        header_extension(Audio, AbsSendTime, 4, SendRecv),
        header_extension(Video, AbsSendTime, 4, SendRecv),
        // For audio transport-wide-cc is only enabled when receiving media.
        header_extension(Audio, TransportWideCcDraft01, 5, RecvOnly),
        header_extension(Video, TransportWideCcDraft01, 5, SendRecv),
        header_extension(Video, FrameMarkingDraft07, 6, SendRecv),
        header_extension(Video, FrameMarking, 7, SendRecv),
        header_extension(Audio, AudioLevel, 10, SendRecv),
        header_extension(Video, VideoOrientation, 11, SendRecv),
        header_extension(Video, TimeOffset, 12, SendRecv),
        header_extension(Video, AbsCaptureTime, 13, SendRecv),
        header_extension(Audio, AbsCaptureTime, 13, SendRecv),
    ];

    RtpCapabilities {
        codecs,
        header_extensions,
    }
}
