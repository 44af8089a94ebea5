//! Codecs, header extensions and encodings as endpoints and routers describe them, in the JSON
//! shape the engine expects.


use serde::de::{self, Visitor};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::FromIterator;
use std::num::{NonZeroU32, NonZeroU8};

/// Audio or video.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// String representation as used in MIME types.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codec MIME type, `kind/subtype` (e.g. `audio/opus`).
///
/// Subtype comparison is case-insensitive, the original spelling is kept for serialization.
#[derive(Debug, Clone)]
pub struct MimeType {
    kind: MediaKind,
    subtype: Cow<'static, str>,
}

impl MimeType {
    pub const OPUS: Self = Self::audio("opus");
    pub const MULTI_CHANNEL_OPUS: Self = Self::audio("multiopus");
    pub const PCMU: Self = Self::audio("PCMU");
    pub const PCMA: Self = Self::audio("PCMA");
    pub const ISAC: Self = Self::audio("ISAC");
    pub const G722: Self = Self::audio("G722");
    pub const ILBC: Self = Self::audio("iLBC");
    pub const SILK: Self = Self::audio("SILK");
    pub const CN: Self = Self::audio("CN");
    pub const TELEPHONE_EVENT: Self = Self::audio("telephone-event");
    pub const AUDIO_RTX: Self = Self::audio("rtx");
    pub const VP8: Self = Self::video("VP8");
    pub const VP9: Self = Self::video("VP9");
    pub const H264: Self = Self::video("H264");
    pub const H265: Self = Self::video("H265");
    pub const VIDEO_RTX: Self = Self::video("rtx");

    const fn audio(subtype: &'static str) -> Self {
        Self {
            kind: MediaKind::Audio,
            subtype: Cow::Borrowed(subtype),
        }
    }

    const fn video(subtype: &'static str) -> Self {
        Self {
            kind: MediaKind::Video,
            subtype: Cow::Borrowed(subtype),
        }
    }

    /// Create MIME type from arbitrary kind and subtype.
    pub fn new<S>(kind: MediaKind, subtype: S) -> Self
    where
        S: Into<Cow<'static, str>>,
    {
        Self {
            kind,
            subtype: subtype.into(),
        }
    }

    /// RTX MIME type for given media kind.
    pub fn rtx(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => Self::AUDIO_RTX,
            MediaKind::Video => Self::VIDEO_RTX,
        }
    }

    /// Media kind part of the MIME type.
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Subtype part of the MIME type as it was given.
    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    /// Whether this is an RTX (retransmission) MIME type.
    pub fn is_rtx(&self) -> bool {
        self.subtype.eq_ignore_ascii_case("rtx")
    }
}

impl PartialEq for MimeType {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.subtype.eq_ignore_ascii_case(&other.subtype)
    }
}

impl Eq for MimeType {}

impl Hash for MimeType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        for byte in self.subtype.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.subtype)
    }
}

impl Serialize for MimeType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MimeType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct MimeTypeVisitor;

        impl<'de> Visitor<'de> for MimeTypeVisitor {
            type Value = MimeType;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(r#"MIME type like "audio/opus" or "video/VP8""#)
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let (kind, subtype) = v
                    .split_once('/')
                    .ok_or_else(|| de::Error::invalid_value(de::Unexpected::Str(v), &self))?;
                let kind = if kind.eq_ignore_ascii_case("audio") {
                    MediaKind::Audio
                } else if kind.eq_ignore_ascii_case("video") {
                    MediaKind::Video
                } else {
                    return Err(de::Error::invalid_value(de::Unexpected::Str(v), &self));
                };
                if subtype.is_empty() {
                    return Err(de::Error::invalid_value(de::Unexpected::Str(v), &self));
                }

                Ok(MimeType::new(kind, subtype.to_string()))
            }
        }

        deserializer.deserialize_str(MimeTypeVisitor)
    }
}

/// Single value of codec specific parameters.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RtpCodecParametersParametersValue {
    String(Cow<'static, str>),
    Number(u32),
}

impl From<&'static str> for RtpCodecParametersParametersValue {
    fn from(s: &'static str) -> Self {
        Self::String(Cow::Borrowed(s))
    }
}

impl From<String> for RtpCodecParametersParametersValue {
    fn from(s: String) -> Self {
        Self::String(Cow::Owned(s))
    }
}

impl From<u8> for RtpCodecParametersParametersValue {
    fn from(n: u8) -> Self {
        Self::Number(u32::from(n))
    }
}

impl From<u16> for RtpCodecParametersParametersValue {
    fn from(n: u16) -> Self {
        Self::Number(u32::from(n))
    }
}

impl From<u32> for RtpCodecParametersParametersValue {
    fn from(n: u32) -> Self {
        Self::Number(n)
    }
}

/// Codec specific parameters. Some parameters (such as `packetization-mode` in H264 or
/// `profile-id` in VP9) are critical for codec matching.
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct RtpCodecParametersParameters(
    BTreeMap<Cow<'static, str>, RtpCodecParametersParametersValue>,
);

impl RtpCodecParametersParameters {
    /// Sets `key`, replacing a previous value.
    pub fn insert<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: Into<Cow<'static, str>>,
        V: Into<RtpCodecParametersParametersValue>,
    {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&RtpCodecParametersParametersValue> {
        self.0.get(key)
    }

    /// Numeric parameter, `None` when missing or not a number.
    pub fn get_number(&self, key: &str) -> Option<u32> {
        match self.0.get(key)? {
            RtpCodecParametersParametersValue::Number(n) => Some(*n),
            RtpCodecParametersParametersValue::String(_) => None,
        }
    }

    pub fn iter(
        &self,
    ) -> std::collections::btree_map::Iter<'_, Cow<'static, str>, RtpCodecParametersParametersValue>
    {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, const N: usize> From<[(K, RtpCodecParametersParametersValue); N]>
    for RtpCodecParametersParameters
where
    K: Into<Cow<'static, str>>,
{
    fn from(array: [(K, RtpCodecParametersParametersValue); N]) -> Self {
        IntoIterator::into_iter(array).collect()
    }
}

impl<K> Extend<(K, RtpCodecParametersParametersValue)> for RtpCodecParametersParameters
where
    K: Into<Cow<'static, str>>,
{
    fn extend<T: IntoIterator<Item = (K, RtpCodecParametersParametersValue)>>(&mut self, iter: T) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K> FromIterator<(K, RtpCodecParametersParametersValue)> for RtpCodecParametersParameters
where
    K: Into<Cow<'static, str>>,
{
    fn from_iter<T: IntoIterator<Item = (K, RtpCodecParametersParametersValue)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl IntoIterator for RtpCodecParametersParameters {
    type Item = (Cow<'static, str>, RtpCodecParametersParametersValue);
    type IntoIter =
        std::collections::btree_map::IntoIter<Cow<'static, str>, RtpCodecParametersParametersValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// RTCP feedback a codec supports, such as `nack` or `ccm fir`. What the engine handles is
/// listed in [`supported_rtp_capabilities`](crate::supported_rtp_capabilities).
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct RtcpFeedback {
    /// RTCP feedback type.
    pub r#type: Cow<'static, str>,
    /// RTCP feedback parameter, empty when there is none.
    #[serde(default)]
    pub parameter: Cow<'static, str>,
}

impl RtcpFeedback {
    pub const NACK: Self = Self::new_static("nack", "");
    pub const NACK_PLI: Self = Self::new_static("nack", "pli");
    pub const CCM_FIR: Self = Self::new_static("ccm", "fir");
    pub const GOOG_REMB: Self = Self::new_static("goog-remb", "");
    pub const TRANSPORT_CC: Self = Self::new_static("transport-cc", "");

    const fn new_static(r#type: &'static str, parameter: &'static str) -> Self {
        Self {
            r#type: Cow::Borrowed(r#type),
            parameter: Cow::Borrowed(parameter),
        }
    }
}

/// Codec an endpoint or router can handle.
///
/// Media kind is taken from the MIME type, `kind` is only written on serialization.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    /// `audio/opus`, `video/VP8` and the like.
    pub mime_type: MimeType,
    #[serde(default)]
    pub preferred_payload_type: Option<u8>,
    /// In Hz.
    pub clock_rate: NonZeroU32,
    /// Audio only, 2 for stereo.
    #[serde(default)]
    pub channels: Option<NonZeroU8>,
    #[serde(default)]
    pub parameters: RtpCodecParametersParameters,
    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl Serialize for RtpCodecCapability {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("RtpCodecCapability", 7)?;
        state.serialize_field("kind", &self.kind())?;
        state.serialize_field("mimeType", &self.mime_type)?;
        if let Some(preferred_payload_type) = self.preferred_payload_type {
            state.serialize_field("preferredPayloadType", &preferred_payload_type)?;
        }
        state.serialize_field("clockRate", &self.clock_rate)?;
        if let Some(channels) = self.channels {
            state.serialize_field("channels", &channels)?;
        }
        state.serialize_field("parameters", &self.parameters)?;
        state.serialize_field("rtcpFeedback", &self.rtcp_feedback)?;
        state.end()
    }
}

impl RtpCodecCapability {
    /// Create codec capability with no payload type preference, parameters or feedback.
    pub fn new(mime_type: MimeType, clock_rate: NonZeroU32) -> Self {
        Self {
            mime_type,
            preferred_payload_type: None,
            clock_rate,
            channels: None,
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: Vec::new(),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.mime_type.kind()
    }

    pub(crate) fn is_rtx(&self) -> bool {
        self.mime_type.is_rtx()
    }
}

/// Same as [`RtpCodecCapability`], but with `preferred_payload_type` always allocated. Router
/// capabilities consist of these.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapabilityFinalized {
    pub mime_type: MimeType,
    pub preferred_payload_type: u8,
    /// In Hz.
    pub clock_rate: NonZeroU32,
    /// Audio only.
    #[serde(default)]
    pub channels: Option<NonZeroU8>,
    #[serde(default)]
    pub parameters: RtpCodecParametersParameters,
    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl Serialize for RtpCodecCapabilityFinalized {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("RtpCodecCapabilityFinalized", 7)?;
        state.serialize_field("kind", &self.kind())?;
        state.serialize_field("mimeType", &self.mime_type)?;
        state.serialize_field("preferredPayloadType", &self.preferred_payload_type)?;
        state.serialize_field("clockRate", &self.clock_rate)?;
        if let Some(channels) = self.channels {
            state.serialize_field("channels", &channels)?;
        }
        state.serialize_field("parameters", &self.parameters)?;
        state.serialize_field("rtcpFeedback", &self.rtcp_feedback)?;
        state.end()
    }
}

impl RtpCodecCapabilityFinalized {
    pub fn kind(&self) -> MediaKind {
        self.mime_type.kind()
    }

    pub(crate) fn is_rtx(&self) -> bool {
        self.mime_type.is_rtx()
    }
}

impl From<RtpCodecCapabilityFinalized> for RtpCodecCapability {
    fn from(codec: RtpCodecCapabilityFinalized) -> Self {
        Self {
            mime_type: codec.mime_type,
            preferred_payload_type: Some(codec.preferred_payload_type),
            clock_rate: codec.clock_rate,
            channels: codec.channels,
            parameters: codec.parameters,
            rtcp_feedback: codec.rtcp_feedback,
        }
    }
}

/// Whether the router reads a header extension, writes it, or both.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RtpHeaderExtensionDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl Default for RtpHeaderExtensionDirection {
    fn default() -> Self {
        Self::SendRecv
    }
}

/// Header extensions the engine knows about, serialized as their URI.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum RtpHeaderExtensionUri {
    #[serde(rename = "urn:ietf:params:rtp-hdrext:sdes:mid")]
    Mid,
    #[serde(rename = "urn:ietf:params:rtp-hdrext:sdes:rtp-stream-id")]
    RtpStreamId,
    #[serde(rename = "urn:ietf:params:rtp-hdrext:sdes:repaired-rtp-stream-id")]
    RepairRtpStreamId,
    #[serde(rename = "http://tools.ietf.org/html/draft-ietf-avtext-framemarking-07")]
    FrameMarkingDraft07,
    #[serde(rename = "urn:ietf:params:rtp-hdrext:framemarking")]
    FrameMarking,
    #[serde(rename = "urn:ietf:params:rtp-hdrext:ssrc-audio-level")]
    AudioLevel,
    #[serde(rename = "urn:3gpp:video-orientation")]
    VideoOrientation,
    #[serde(rename = "urn:ietf:params:rtp-hdrext:toffset")]
    TimeOffset,
    #[serde(rename = "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01")]
    TransportWideCcDraft01,
    #[serde(rename = "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time")]
    AbsSendTime,
    #[serde(rename = "http://www.webrtc.org/experiments/rtp-hdrext/abs-capture-time")]
    AbsCaptureTime,
    #[doc(hidden)]
    #[serde(other, rename = "unsupported")]
    Unsupported,
}

/// Header extension as offered in capabilities.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeaderExtension {
    pub kind: MediaKind,
    pub uri: RtpHeaderExtensionUri,
    /// Id written into packets, unique within the capabilities.
    pub preferred_id: u16,
    /// Encrypt the extension (RFC 6904). Default false.
    #[serde(default)]
    pub preferred_encrypt: bool,
    /// `SendOnly` extensions are ignored on incoming packets, `RecvOnly` ones are not written
    /// towards consumers.
    #[serde(default)]
    pub direction: RtpHeaderExtensionDirection,
}

/// What an endpoint can send or receive, the input of codec negotiation.
#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    /// Media codecs and their RTX companions.
    pub codecs: Vec<RtpCodecCapability>,
    pub header_extensions: Vec<RtpHeaderExtension>,
}

/// Same as [`RtpCapabilities`], but with every codec payload type allocated.
#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilitiesFinalized {
    /// Media codecs and their RTX companions.
    pub codecs: Vec<RtpCodecCapabilityFinalized>,
    pub header_extensions: Vec<RtpHeaderExtension>,
}

impl From<RtpCapabilitiesFinalized> for RtpCapabilities {
    fn from(capabilities: RtpCapabilitiesFinalized) -> Self {
        Self {
            codecs: capabilities.codecs.into_iter().map(Into::into).collect(),
            header_extensions: capabilities.header_extensions,
        }
    }
}

/// Codec in actual use by a stream.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecParameters {
    pub mime_type: MimeType,
    /// Unique within the parameters.
    pub payload_type: u8,
    /// In Hz.
    pub clock_rate: NonZeroU32,
    /// Audio only, 2 for stereo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<NonZeroU8>,
    #[serde(default)]
    pub parameters: RtpCodecParametersParameters,
    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecParameters {
    pub fn new(mime_type: MimeType, payload_type: u8, clock_rate: NonZeroU32) -> Self {
        Self {
            mime_type,
            payload_type,
            clock_rate,
            channels: None,
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: Vec::new(),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.mime_type.kind()
    }

    pub(crate) fn is_rtx(&self) -> bool {
        self.mime_type.is_rtx()
    }
}

/// SSRC of the retransmission stream of an encoding.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct RtpEncodingParametersRtx {
    pub ssrc: u32,
}

/// One RTP stream (a simulcast layer for instance) together with its RTX stream.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncodingParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssrc: Option<u32>,
    /// Unique RID, identifies simulcast streams that have no SSRC yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    /// Payload type of the codec used, the first media codec when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_payload_type: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtx: Option<RtpEncodingParametersRtx>,
    /// Discontinuous transmission, which also turns off inactivity checks of the engine for
    /// streams that legitimately go quiet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtx: Option<bool>,
    /// Layer structure such as `L1T3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalability_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_resolution_down_by: Option<f64>,
    /// In bps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
}

/// Header extension in actual use by a stream.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeaderExtensionParameters {
    pub uri: RtpHeaderExtensionUri,
    pub id: u16,
    /// RFC 6904 encryption. Default false.
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default)]
    pub parameters: RtpCodecParametersParameters,
}

/// RTCP settings of a stream.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcpParameters {
    /// CNAME sent in SDES, generated by the engine when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
    /// Reduced size RTCP (RFC 5506) instead of compound packets. Default true.
    #[serde(default = "default_true")]
    pub reduced_size: bool,
    /// RTP and RTCP on the same port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mux: Option<bool>,
}

fn default_true() -> bool {
    true
}

impl Default for RtcpParameters {
    fn default() -> Self {
        Self {
            cname: None,
            reduced_size: true,
            mux: None,
        }
    }
}

/// Everything about one media stream: what a producer receives from its endpoint or what a
/// consumer sends to its endpoint.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    /// BUNDLE media id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    pub codecs: Vec<RtpCodecParameters>,
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtensionParameters>,
    #[serde(default)]
    pub encodings: Vec<RtpEncodingParameters>,
    #[serde(default)]
    pub rtcp: RtcpParameters,
}
