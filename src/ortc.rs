//! Capability negotiation: router capabilities generation, producer parameters mapping and
//! consumer parameters derivation. Everything here is pure and does no I/O.


use crate::rtp_parameters::{
    MediaKind, MimeType, RtcpFeedback, RtcpParameters, RtpCapabilities, RtpCapabilitiesFinalized,
    RtpCodecCapability, RtpCodecCapabilityFinalized, RtpCodecParameters,
    RtpCodecParametersParameters, RtpCodecParametersParametersValue, RtpEncodingParameters,
    RtpEncodingParametersRtx, RtpHeaderExtensionDirection, RtpHeaderExtensionParameters,
    RtpHeaderExtensionUri, RtpParameters,
};
use crate::scalability_modes;
use crate::sctp_parameters::SctpStreamParameters;
use crate::supported_rtp_capabilities;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::num::{NonZeroU32, NonZeroU8};
use thiserror::Error;

const DYNAMIC_PAYLOAD_TYPES: &[u8] = &[
    100, 101, 102, 103, 104, 105, 106, 107, 108, 109, 110, 111, 112, 113, 114, 115, 116, 117, 118,
    119, 120, 121, 122, 123, 124, 125, 126, 127, 96, 97, 98, 99,
];

#[doc(hidden)]
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpMappingCodec {
    pub payload_type: u8,
    pub mapped_payload_type: u8,
}

#[doc(hidden)]
#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpMappingEncoding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssrc: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scalability_mode: Option<String>,
    pub mapped_ssrc: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapped_rtx_ssrc: Option<u32>,
}

/// Translation of a producer's payload types and SSRCs into router-side values.
#[doc(hidden)]
#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct RtpMapping {
    pub codecs: Vec<RtpMappingCodec>,
    pub encodings: Vec<RtpMappingEncoding>,
}

/// Malformed [`RtpParameters`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RtpParametersError {
    /// `apt` is not a number.
    #[error("Invalid codec apt parameter {0}")]
    InvalidAptParameter(String),
    /// RTX codec without apt parameter.
    #[error("Missing apt parameter in RTX codec with payload type {payload_type}")]
    MissingAptParameter {
        payload_type: u8,
    },
    /// Two codecs share the same payload type.
    #[error("Duplicated codec payload type {0}")]
    DuplicatedPayloadType(u8),
    /// Two header extensions share the same id.
    #[error("Duplicated header extension id {0}")]
    DuplicatedHeaderExtensionId(u16),
}

/// Malformed [`RtpCapabilities`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RtpCapabilitiesError {
    /// `apt` is not a number.
    #[error("Invalid codec apt parameter {0}")]
    InvalidAptParameter(String),
}

/// Media codecs a router can't be built with.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RouterRtpCapabilitiesError {
    #[error("Invalid media codec: {0}")]
    InvalidCapabilities(RtpCapabilitiesError),
    /// Not in the engine's supported capabilities.
    #[error("Media codec not supported [mime_type:{mime_type}]")]
    UnsupportedCodec {
        mime_type: MimeType,
    },
    /// Dynamic payload types 96-127 ran out.
    #[error("Cannot allocate more dynamic codec payload types")]
    CannotAllocate,
    #[error("Duplicated preferred payload type {0}")]
    DuplicatedPreferredPayloadType(u8),
}

/// Producer parameters that don't fit the router capabilities.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RtpParametersMappingError {
    #[error("Unsupported codec [mime_type:{mime_type}, payloadType:{payload_type}]")]
    UnsupportedCodec {
        mime_type: MimeType,
        payload_type: u8,
    },
    /// Producer sends RTX for a codec the router has no RTX for.
    #[error("No RTX codec for capability codec PT {preferred_payload_type}")]
    UnsupportedRtxCodec {
        preferred_payload_type: u8,
    },
    /// RTX codec whose `apt` points at no media codec.
    #[error("Missing media codec found for RTX PT {payload_type}")]
    MissingMediaCodecForRtx {
        payload_type: u8,
    },
}

/// Why consumer parameters can't be derived.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConsumerRtpParametersError {
    #[error("Invalid capabilities: {0}")]
    InvalidCapabilities(RtpCapabilitiesError),
    /// Endpoint supports none of the producer's codecs.
    #[error("No compatible media codecs")]
    NoCompatibleMediaCodecs,
}

/// Error caused by invalid SCTP stream parameters.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SctpStreamParametersError {
    /// Ordered stream with partial reliability settings.
    #[error("Ordered stream can't have max_packet_life_time or max_retransmits")]
    OrderedWithPartialReliability,
    /// Both partial reliability settings are present.
    #[error("Both max_packet_life_time and max_retransmits are set")]
    BothLifeTimeAndRetransmits,
}

fn generate_ssrc() -> u32 {
    rand::thread_rng().gen_range(100_000_000..999_999_999)
}

fn apt(parameters: &RtpCodecParametersParameters) -> Option<u8> {
    parameters
        .get_number("apt")
        .and_then(|apt| u8::try_from(apt).ok())
}

fn validate_apt(
    parameters: &RtpCodecParametersParameters,
) -> Result<(), RtpCodecParametersParametersValue> {
    match parameters.get("apt") {
        Some(value @ RtpCodecParametersParametersValue::String(_)) => Err(value.clone()),
        _ => Ok(()),
    }
}

fn value_to_string(value: RtpCodecParametersParametersValue) -> String {
    match value {
        RtpCodecParametersParametersValue::String(string) => string.into_owned(),
        RtpCodecParametersParametersValue::Number(number) => number.to_string(),
    }
}

/// `apt` must be numeric and present on RTX codecs, payload types and extension ids unique.
pub(crate) fn validate_rtp_parameters(
    rtp_parameters: &RtpParameters,
) -> Result<(), RtpParametersError> {
    for (index, codec) in rtp_parameters.codecs.iter().enumerate() {
        validate_apt(&codec.parameters)
            .map_err(|value| RtpParametersError::InvalidAptParameter(value_to_string(value)))?;

        if codec.is_rtx() && apt(&codec.parameters).is_none() {
            return Err(RtpParametersError::MissingAptParameter {
                payload_type: codec.payload_type,
            });
        }

        if rtp_parameters.codecs[..index]
            .iter()
            .any(|other| other.payload_type == codec.payload_type)
        {
            return Err(RtpParametersError::DuplicatedPayloadType(codec.payload_type));
        }
    }

    for (index, ext) in rtp_parameters.header_extensions.iter().enumerate() {
        if rtp_parameters.header_extensions[..index]
            .iter()
            .any(|other| other.id == ext.id)
        {
            return Err(RtpParametersError::DuplicatedHeaderExtensionId(ext.id));
        }
    }

    Ok(())
}

/// Codec `apt` parameters must be numeric.
pub(crate) fn validate_rtp_capabilities(
    caps: &RtpCapabilities,
) -> Result<(), RtpCapabilitiesError> {
    for codec in &caps.codecs {
        validate_rtp_codec_capability(codec)?;
    }

    Ok(())
}

fn validate_rtp_codec_capability(codec: &RtpCodecCapability) -> Result<(), RtpCapabilitiesError> {
    validate_apt(&codec.parameters)
        .map_err(|value| RtpCapabilitiesError::InvalidAptParameter(value_to_string(value)))
}

/// Validates [`SctpStreamParameters`].
pub(crate) fn validate_sctp_stream_parameters(
    params: &SctpStreamParameters,
) -> Result<(), SctpStreamParametersError> {
    let partial_reliability =
        params.max_packet_life_time().is_some() || params.max_retransmits().is_some();

    if params.max_packet_life_time().is_some() && params.max_retransmits().is_some() {
        return Err(SctpStreamParametersError::BothLifeTimeAndRetransmits);
    }
    if params.ordered() && partial_reliability {
        return Err(SctpStreamParametersError::OrderedWithPartialReliability);
    }

    Ok(())
}

/// Generate RTP capabilities for the Router based on the given media codecs and the engine's
/// supported RTP capabilities.
pub fn generate_router_rtp_capabilities(
    media_codecs: Vec<RtpCodecCapability>,
) -> Result<RtpCapabilitiesFinalized, RouterRtpCapabilitiesError> {
    let supported_rtp_capabilities = supported_rtp_capabilities::get_supported_rtp_capabilities();

    let mut dynamic_payload_types = Vec::from(DYNAMIC_PAYLOAD_TYPES);
    let mut caps = RtpCapabilitiesFinalized {
        codecs: vec![],
        header_extensions: supported_rtp_capabilities.header_extensions,
    };

    for media_codec in media_codecs {
        validate_rtp_codec_capability(&media_codec)
            .map_err(RouterRtpCapabilitiesError::InvalidCapabilities)?;

        let supported_codec = supported_rtp_capabilities
            .codecs
            .iter()
            .find(|supported_codec| {
                match_codecs(
                    CodecToMatch::from(&media_codec),
                    CodecToMatch::from(*supported_codec),
                    false,
                )
            })
            .ok_or_else(|| RouterRtpCapabilitiesError::UnsupportedCodec {
                mime_type: media_codec.mime_type.clone(),
            })?;

        let preferred_payload_type = match media_codec.preferred_payload_type {
            Some(preferred_payload_type) => {
                // Keep it and remove it from the dynamic pool.
                dynamic_payload_types.retain(|&pt| pt != preferred_payload_type);

                preferred_payload_type
            }
            None => match supported_codec.preferred_payload_type {
                // Static payload type, not part of the dynamic pool.
                Some(preferred_payload_type) => preferred_payload_type,
                None => {
                    if dynamic_payload_types.is_empty() {
                        return Err(RouterRtpCapabilitiesError::CannotAllocate);
                    }
                    dynamic_payload_types.remove(0)
                }
            },
        };

        if caps
            .codecs
            .iter()
            .any(|codec| codec.preferred_payload_type == preferred_payload_type)
        {
            return Err(RouterRtpCapabilitiesError::DuplicatedPreferredPayloadType(
                preferred_payload_type,
            ));
        }

        let mut parameters = supported_codec.parameters.clone();
        parameters.extend(media_codec.parameters);

        let codec = RtpCodecCapabilityFinalized {
            mime_type: supported_codec.mime_type.clone(),
            preferred_payload_type,
            clock_rate: supported_codec.clock_rate,
            channels: match supported_codec.kind() {
                MediaKind::Audio => supported_codec.channels,
                MediaKind::Video => None,
            },
            parameters,
            rtcp_feedback: supported_codec.rtcp_feedback.clone(),
        };

        let rtx_codec = if codec.kind() == MediaKind::Video {
            if dynamic_payload_types.is_empty() {
                return Err(RouterRtpCapabilitiesError::CannotAllocate);
            }

            Some(RtpCodecCapabilityFinalized {
                mime_type: MimeType::rtx(MediaKind::Video),
                preferred_payload_type: dynamic_payload_types.remove(0),
                clock_rate: codec.clock_rate,
                channels: None,
                parameters: RtpCodecParametersParameters::from([(
                    "apt",
                    preferred_payload_type.into(),
                )]),
                rtcp_feedback: vec![],
            })
        } else {
            None
        };

        caps.codecs.push(codec);
        caps.codecs.extend(rtx_codec);
    }

    Ok(caps)
}

/// Matches producer codecs against the router capabilities and assigns router-side payload
/// types and SSRCs to every codec and encoding.
pub fn get_producer_rtp_parameters_mapping(
    rtp_parameters: &RtpParameters,
    rtp_capabilities: &RtpCapabilitiesFinalized,
) -> Result<RtpMapping, RtpParametersMappingError> {
    let mut rtp_mapping = RtpMapping::default();

    // Media codecs first, so RTX codecs can find their associated media codec mapping.
    for codec in &rtp_parameters.codecs {
        if codec.is_rtx() {
            continue;
        }

        let cap_codec = rtp_capabilities
            .codecs
            .iter()
            .find(|cap_codec| {
                match_codecs(
                    CodecToMatch::from(codec),
                    CodecToMatch::from(*cap_codec),
                    true,
                )
            })
            .ok_or_else(|| RtpParametersMappingError::UnsupportedCodec {
                mime_type: codec.mime_type.clone(),
                payload_type: codec.payload_type,
            })?;

        rtp_mapping.codecs.push(RtpMappingCodec {
            payload_type: codec.payload_type,
            mapped_payload_type: cap_codec.preferred_payload_type,
        });
    }

    let mut has_rtx = false;

    for codec in &rtp_parameters.codecs {
        if !codec.is_rtx() {
            continue;
        }

        let cap_media_payload_type = apt(&codec.parameters)
            .and_then(|apt| {
                rtp_mapping
                    .codecs
                    .iter()
                    .find(|entry| entry.payload_type == apt)
            })
            .map(|entry| entry.mapped_payload_type)
            .ok_or(RtpParametersMappingError::MissingMediaCodecForRtx {
                payload_type: codec.payload_type,
            })?;

        let cap_rtx_codec = rtp_capabilities
            .codecs
            .iter()
            .find(|cap_codec| {
                cap_codec.is_rtx() && apt(&cap_codec.parameters) == Some(cap_media_payload_type)
            })
            .ok_or(RtpParametersMappingError::UnsupportedRtxCodec {
                preferred_payload_type: cap_media_payload_type,
            })?;

        rtp_mapping.codecs.push(RtpMappingCodec {
            payload_type: codec.payload_type,
            mapped_payload_type: cap_rtx_codec.preferred_payload_type,
        });
        has_rtx = true;
    }

    let base_ssrc = generate_ssrc();
    let encodings_count = rtp_parameters.encodings.len() as u32;

    for (encoding, index) in rtp_parameters.encodings.iter().zip(0_u32..) {
        rtp_mapping.encodings.push(RtpMappingEncoding {
            ssrc: encoding.ssrc,
            rid: encoding.rid.clone(),
            scalability_mode: encoding.scalability_mode.clone(),
            mapped_ssrc: base_ssrc + index,
            mapped_rtx_ssrc: has_rtx.then(|| base_ssrc + encodings_count + index),
        });
    }

    Ok(rtp_mapping)
}

/// Generate RTP parameters to be internally used by Consumers given the RTP parameters of a
/// Producer and the RTP capabilities of the Router.
pub fn get_consumable_rtp_parameters(
    kind: MediaKind,
    params: &RtpParameters,
    caps: &RtpCapabilitiesFinalized,
    rtp_mapping: &RtpMapping,
) -> RtpParameters {
    let mut consumable_params = RtpParameters::default();

    for codec in &params.codecs {
        if codec.is_rtx() {
            continue;
        }

        let cap_codec = rtp_mapping
            .codecs
            .iter()
            .find(|entry| entry.payload_type == codec.payload_type)
            .and_then(|entry| {
                caps.codecs
                    .iter()
                    .find(|cap_codec| cap_codec.preferred_payload_type == entry.mapped_payload_type)
            });
        let cap_codec = match cap_codec {
            Some(cap_codec) => cap_codec,
            None => continue,
        };

        consumable_params.codecs.push(RtpCodecParameters {
            mime_type: cap_codec.mime_type.clone(),
            payload_type: cap_codec.preferred_payload_type,
            clock_rate: cap_codec.clock_rate,
            channels: cap_codec.channels,
            // Parameters as the producer sent them
            parameters: codec.parameters.clone(),
            rtcp_feedback: cap_codec.rtcp_feedback.clone(),
        });

        if let Some(cap_rtx_codec) = caps.codecs.iter().find(|cap_rtx_codec| {
            cap_rtx_codec.is_rtx()
                && apt(&cap_rtx_codec.parameters) == Some(cap_codec.preferred_payload_type)
        }) {
            consumable_params.codecs.push(RtpCodecParameters {
                mime_type: cap_rtx_codec.mime_type.clone(),
                payload_type: cap_rtx_codec.preferred_payload_type,
                clock_rate: cap_rtx_codec.clock_rate,
                channels: cap_rtx_codec.channels,
                parameters: cap_rtx_codec.parameters.clone(),
                rtcp_feedback: cap_rtx_codec.rtcp_feedback.clone(),
            });
        }
    }

    for cap_ext in &caps.header_extensions {
        // Only extensions Consumers are able to send.
        if cap_ext.kind != kind
            || !matches!(
                cap_ext.direction,
                RtpHeaderExtensionDirection::SendRecv | RtpHeaderExtensionDirection::SendOnly
            )
            || matches!(
                cap_ext.uri,
                RtpHeaderExtensionUri::Mid | RtpHeaderExtensionUri::RtpStreamId
            )
        {
            continue;
        }

        consumable_params
            .header_extensions
            .push(RtpHeaderExtensionParameters {
                uri: cap_ext.uri,
                id: cap_ext.preferred_id,
                encrypt: cap_ext.preferred_encrypt,
                parameters: RtpCodecParametersParameters::default(),
            });
    }

    for (encoding, mapping_encoding) in params.encodings.iter().zip(&rtp_mapping.encodings) {
        consumable_params.encodings.push(RtpEncodingParameters {
            ssrc: Some(mapping_encoding.mapped_ssrc),
            rid: None,
            codec_payload_type: None,
            rtx: mapping_encoding
                .mapped_rtx_ssrc
                .map(|ssrc| RtpEncodingParametersRtx { ssrc }),
            ..encoding.clone()
        });
    }

    consumable_params.rtcp = RtcpParameters {
        cname: params.rtcp.cname.clone(),
        reduced_size: true,
        mux: Some(true),
    };

    consumable_params
}

/// Whether receiver capabilities advertise given consumable codec: strict match and same payload
/// type.
fn find_cap_codec<'a>(
    caps: &'a RtpCapabilities,
    codec: &RtpCodecParameters,
) -> Option<&'a RtpCodecCapability> {
    caps.codecs.iter().find(|cap_codec| {
        cap_codec.preferred_payload_type == Some(codec.payload_type)
            && match_codecs(CodecToMatch::from(*cap_codec), CodecToMatch::from(codec), true)
    })
}

/// Consumable codecs the receiver advertises, in consumable order, with each codec's RTCP feedback
/// taken from the receiver. RTX codecs whose media codec didn't match are left out.
fn matched_consumer_codecs(
    consumable_params: &RtpParameters,
    caps: &RtpCapabilities,
) -> Vec<RtpCodecParameters> {
    let mut codecs = consumable_params
        .codecs
        .iter()
        .filter_map(|codec| {
            find_cap_codec(caps, codec).map(|cap_codec| RtpCodecParameters {
                rtcp_feedback: cap_codec.rtcp_feedback.clone(),
                ..codec.clone()
            })
        })
        .collect::<Vec<_>>();

    let media_payload_types = codecs
        .iter()
        .filter(|codec| !codec.is_rtx())
        .map(|codec| codec.payload_type)
        .collect::<Vec<_>>();
    codecs.retain(|codec| {
        !codec.is_rtx()
            || apt(&codec.parameters).map_or(false, |apt| media_payload_types.contains(&apt))
    });

    codecs
}

/// `true` when the first matching codec is a media codec, RTX alone can't be consumed.
pub(crate) fn can_consume(
    consumable_params: &RtpParameters,
    caps: &RtpCapabilities,
) -> Result<bool, RtpCapabilitiesError> {
    validate_rtp_capabilities(caps)?;

    Ok(matched_consumer_codecs(consumable_params, caps)
        .first()
        .map_or(false, |codec| !codec.is_rtx()))
}

/// Parameters a consumer sends with towards an endpoint with `caps`.
///
/// Codecs, their RTCP feedback and header extensions are reduced to what `caps` supports. Regular
/// consumers get a single encoding, `pipe` consumers keep one per consumable encoding. Without
/// `enable_rtx` RTX codecs and plain NACK feedback are removed.
pub fn get_consumer_rtp_parameters(
    consumable_params: &RtpParameters,
    caps: &RtpCapabilities,
    pipe: bool,
    enable_rtx: bool,
) -> Result<RtpParameters, ConsumerRtpParametersError> {
    validate_rtp_capabilities(caps).map_err(ConsumerRtpParametersError::InvalidCapabilities)?;

    let mut consumer_params = RtpParameters {
        codecs: matched_consumer_codecs(consumable_params, caps),
        rtcp: consumable_params.rtcp.clone(),
        ..RtpParameters::default()
    };

    match consumer_params.codecs.first() {
        Some(codec) if !codec.is_rtx() => {}
        _ => {
            return Err(ConsumerRtpParametersError::NoCompatibleMediaCodecs);
        }
    }

    if !enable_rtx {
        consumer_params.codecs.retain(|codec| !codec.is_rtx());
        for codec in &mut consumer_params.codecs {
            codec.rtcp_feedback.retain(|fb| fb != &RtcpFeedback::NACK);
        }
    }
    let rtx_supported = consumer_params.codecs.iter().any(|codec| codec.is_rtx());

    consumer_params.header_extensions = consumable_params
        .header_extensions
        .iter()
        .filter(|ext| {
            caps.header_extensions
                .iter()
                .any(|cap_ext| cap_ext.preferred_id == ext.id && cap_ext.uri == ext.uri)
        })
        .cloned()
        .collect();

    // Congestion feedback follows the header extension available, transport-cc first
    let has_extension = |uri: RtpHeaderExtensionUri| {
        consumer_params
            .header_extensions
            .iter()
            .any(|ext| ext.uri == uri)
    };
    let keep_feedback: fn(&RtcpFeedback) -> bool =
        if has_extension(RtpHeaderExtensionUri::TransportWideCcDraft01) {
            |fb| fb != &RtcpFeedback::GOOG_REMB
        } else if has_extension(RtpHeaderExtensionUri::AbsSendTime) {
            |fb| fb != &RtcpFeedback::TRANSPORT_CC
        } else {
            |fb| fb != &RtcpFeedback::GOOG_REMB && fb != &RtcpFeedback::TRANSPORT_CC
        };
    for codec in &mut consumer_params.codecs {
        codec.rtcp_feedback.retain(keep_feedback);
    }

    if pipe {
        let base_ssrc = generate_ssrc();
        let base_rtx_ssrc = generate_ssrc();

        for (encoding, index) in consumable_params.encodings.iter().zip(0_u32..) {
            consumer_params.encodings.push(RtpEncodingParameters {
                ssrc: Some(base_ssrc.wrapping_add(index)),
                rtx: rtx_supported.then(|| RtpEncodingParametersRtx {
                    ssrc: base_rtx_ssrc.wrapping_add(index),
                }),
                ..encoding.clone()
            });
        }

        return Ok(consumer_params);
    }

    let ssrc = generate_ssrc();
    let mut consumer_encoding = RtpEncodingParameters {
        ssrc: Some(ssrc),
        rtx: rtx_supported.then(|| RtpEncodingParametersRtx { ssrc: ssrc + 1 }),
        ..RtpEncodingParameters::default()
    };

    // Assume all encodings share the same scalability mode.
    let scalability_mode = consumable_params
        .encodings
        .iter()
        .find_map(|encoding| encoding.scalability_mode.clone());

    consumer_encoding.scalability_mode = if consumable_params.encodings.len() > 1 {
        // Simulcast is exposed as spatial layers.
        let temporal_layers = scalability_mode
            .as_deref()
            .map(scalability_modes::parse)
            .unwrap_or_default()
            .temporal_layers;

        Some(format!(
            "S{}T{}",
            consumable_params.encodings.len(),
            temporal_layers
        ))
    } else {
        scalability_mode
    };

    consumer_encoding.max_bitrate = consumable_params
        .encodings
        .iter()
        .filter_map(|encoding| encoding.max_bitrate)
        .max();

    consumer_params.encodings.push(consumer_encoding);

    Ok(consumer_params)
}

/// Parameters of a consumer feeding a pipe transport: every consumable encoding, no congestion
/// feedback, and RTX with NACK only with `enable_rtx`.
pub(crate) fn get_pipe_consumer_rtp_parameters(
    consumable_params: &RtpParameters,
    enable_rtx: bool,
) -> RtpParameters {
    let mut consumer_params = RtpParameters {
        rtcp: consumable_params.rtcp.clone(),
        ..RtpParameters::default()
    };

    for codec in &consumable_params.codecs {
        if !enable_rtx && codec.is_rtx() {
            continue;
        }

        let mut codec = codec.clone();
        codec.rtcp_feedback.retain(|fb| {
            fb == &RtcpFeedback::NACK_PLI
                || fb == &RtcpFeedback::CCM_FIR
                || (enable_rtx && fb == &RtcpFeedback::NACK)
        });

        consumer_params.codecs.push(codec);
    }

    // Transport MID and BWE related extensions make no sense between routers.
    consumer_params.header_extensions = consumable_params
        .header_extensions
        .iter()
        .filter(|ext| {
            !matches!(
                ext.uri,
                RtpHeaderExtensionUri::Mid
                    | RtpHeaderExtensionUri::AbsSendTime
                    | RtpHeaderExtensionUri::TransportWideCcDraft01
            )
        })
        .cloned()
        .collect();

    let base_ssrc = generate_ssrc();
    let base_rtx_ssrc = generate_ssrc();

    for (encoding, index) in consumable_params.encodings.iter().zip(0_u32..) {
        consumer_params.encodings.push(RtpEncodingParameters {
            ssrc: Some(base_ssrc.wrapping_add(index)),
            rtx: enable_rtx.then(|| RtpEncodingParametersRtx {
                ssrc: base_rtx_ssrc.wrapping_add(index),
            }),
            ..encoding.clone()
        });
    }

    consumer_params
}

struct CodecToMatch<'a> {
    mime_type: &'a MimeType,
    clock_rate: NonZeroU32,
    /// Audio channels normalized to 1, `None` for video.
    channels: Option<u8>,
    parameters: &'a RtpCodecParametersParameters,
}

impl<'a> CodecToMatch<'a> {
    fn new(
        mime_type: &'a MimeType,
        clock_rate: NonZeroU32,
        channels: Option<NonZeroU8>,
        parameters: &'a RtpCodecParametersParameters,
    ) -> Self {
        Self {
            mime_type,
            clock_rate,
            channels: match mime_type.kind() {
                MediaKind::Audio => Some(channels.map_or(1, NonZeroU8::get)),
                MediaKind::Video => None,
            },
            parameters,
        }
    }
}

impl<'a> From<&'a RtpCodecCapability> for CodecToMatch<'a> {
    fn from(codec: &'a RtpCodecCapability) -> Self {
        Self::new(
            &codec.mime_type,
            codec.clock_rate,
            codec.channels,
            &codec.parameters,
        )
    }
}

impl<'a> From<&'a RtpCodecCapabilityFinalized> for CodecToMatch<'a> {
    fn from(codec: &'a RtpCodecCapabilityFinalized) -> Self {
        Self::new(
            &codec.mime_type,
            codec.clock_rate,
            codec.channels,
            &codec.parameters,
        )
    }
}

impl<'a> From<&'a RtpCodecParameters> for CodecToMatch<'a> {
    fn from(codec: &'a RtpCodecParameters) -> Self {
        Self::new(
            &codec.mime_type,
            codec.clock_rate,
            codec.channels,
            &codec.parameters,
        )
    }
}

fn match_codecs(codec_a: CodecToMatch<'_>, codec_b: CodecToMatch<'_>, strict: bool) -> bool {
    if codec_a.mime_type != codec_b.mime_type
        || codec_a.clock_rate != codec_b.clock_rate
        || codec_a.channels != codec_b.channels
    {
        return false;
    }

    let number_or_zero = |codec: &CodecToMatch<'_>, key: &str| {
        codec.parameters.get_number(key).unwrap_or_default()
    };

    // Codec specific parameters that must agree
    if codec_a.mime_type == &MimeType::MULTI_CHANNEL_OPUS {
        for key in ["num_streams", "coupled_streams"] {
            if codec_a.parameters.get(key) != codec_b.parameters.get(key) {
                return false;
            }
        }
    } else if codec_a.mime_type == &MimeType::H264 {
        if number_or_zero(&codec_a, "packetization-mode")
            != number_or_zero(&codec_b, "packetization-mode")
        {
            return false;
        }

        // TODO: Compare and negotiate `profile-level-id` in strict mode.
    } else if codec_a.mime_type == &MimeType::VP9 {
        if strict && number_or_zero(&codec_a, "profile-id") != number_or_zero(&codec_b, "profile-id")
        {
            return false;
        }
    }

    true
}
