//! Records shared between transports and other parts of the control plane.


use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::convert::TryFrom;
use std::fmt;
use std::net::IpAddr;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use thiserror::Error;

/// Container for arbitrary data attached by the user to any resource.
#[derive(Debug, Clone)]
pub struct AppData(Arc<dyn Any + Send + Sync>);

impl Default for AppData {
    fn default() -> Self {
        Self::new(())
    }
}

impl Deref for AppData {
    type Target = Arc<dyn Any + Send + Sync>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for AppData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl AppData {
    pub fn new<T: Any + Send + Sync>(app_data: T) -> Self {
        Self(Arc::new(app_data))
    }
}

/// IP to listen on, optionally announced to remote endpoints as a different address (useful
/// behind NAT).
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportListenIp {
    pub ip: IpAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announced_ip: Option<IpAddr>,
}

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceRole {
    Controlled,
    Controlling,
}

#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice_lite: Option<bool>,
}

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceCandidateType {
    Host,
    Srflx,
    Prflx,
    Relay,
}

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceCandidateTcpType {
    Passive,
}

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

/// ICE candidate of a WebRTC transport, engine side.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    pub ip: IpAddr,
    pub protocol: TransportProtocol,
    pub port: u16,
    pub r#type: IceCandidateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_type: Option<IceCandidateTcpType>,
}

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IceState {
    New,
    Connected,
    Completed,
    Disconnected,
    Closed,
}

/// Local (and, once known, remote) address of a transport.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TransportTuple {
    #[serde(rename_all = "camelCase")]
    WithRemote {
        local_ip: IpAddr,
        local_port: u16,
        remote_ip: IpAddr,
        remote_port: u16,
        protocol: TransportProtocol,
    },
    #[serde(rename_all = "camelCase")]
    LocalOnly {
        local_ip: IpAddr,
        local_port: u16,
        protocol: TransportProtocol,
    },
}

impl TransportTuple {
    pub fn local_ip(&self) -> IpAddr {
        let (Self::WithRemote { local_ip, .. } | Self::LocalOnly { local_ip, .. }) = self;
        *local_ip
    }

    pub fn local_port(&self) -> u16 {
        let (Self::WithRemote { local_port, .. } | Self::LocalOnly { local_port, .. }) = self;
        *local_port
    }

    pub fn protocol(&self) -> TransportProtocol {
        let (Self::WithRemote { protocol, .. } | Self::LocalOnly { protocol, .. }) = self;
        *protocol
    }
}

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SctpState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    Auto,
    Client,
    Server,
}

impl Default for DtlsRole {
    fn default() -> Self {
        Self::Auto
    }
}

/// Hash function used for a DTLS certificate fingerprint.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum FingerprintAlgorithm {
    #[serde(rename = "sha-1")]
    Sha1,
    #[serde(rename = "sha-224")]
    Sha224,
    #[serde(rename = "sha-256")]
    Sha256,
    #[serde(rename = "sha-384")]
    Sha384,
    #[serde(rename = "sha-512")]
    Sha512,
}

impl FingerprintAlgorithm {
    /// Digest length in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }
}

/// Invalid DTLS fingerprint.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum DtlsFingerprintError {
    /// Digest doesn't have the length of the algorithm output.
    #[error("{algorithm:?} digest must be {expected} bytes long, got {actual}")]
    WrongLength {
        algorithm: FingerprintAlgorithm,
        expected: usize,
        actual: usize,
    },
    /// Value is not a series of `:`-separated hex bytes.
    #[error("Failed to parse \"{0}\" as series of hex bytes")]
    InvalidValue(String),
}

/// DTLS certificate fingerprint, serialized as `{"algorithm": "sha-256", "value": "AB:CD:.."}`.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(try_from = "RawDtlsFingerprint", into = "RawDtlsFingerprint")]
pub struct DtlsFingerprint {
    algorithm: FingerprintAlgorithm,
    value: Vec<u8>,
}

impl DtlsFingerprint {
    pub fn new(
        algorithm: FingerprintAlgorithm,
        value: Vec<u8>,
    ) -> Result<Self, DtlsFingerprintError> {
        if value.len() != algorithm.digest_len() {
            return Err(DtlsFingerprintError::WrongLength {
                algorithm,
                expected: algorithm.digest_len(),
                actual: value.len(),
            });
        }

        Ok(Self { algorithm, value })
    }

    pub fn algorithm(&self) -> FingerprintAlgorithm {
        self.algorithm
    }

    /// Digest bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

impl fmt::Display for DtlsFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, byte) in self.value.iter().enumerate() {
            if index > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02X}", byte)?;
        }

        Ok(())
    }
}

#[derive(Deserialize, Serialize)]
struct RawDtlsFingerprint {
    algorithm: FingerprintAlgorithm,
    value: String,
}

impl TryFrom<RawDtlsFingerprint> for DtlsFingerprint {
    type Error = DtlsFingerprintError;

    fn try_from(raw: RawDtlsFingerprint) -> Result<Self, Self::Error> {
        let value = raw
            .value
            .split(':')
            .map(|byte| {
                if byte.len() == 2 {
                    u8::from_str_radix(byte, 16).ok()
                } else {
                    None
                }
            })
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| DtlsFingerprintError::InvalidValue(raw.value.clone()))?;

        Self::new(raw.algorithm, value)
    }
}

impl From<DtlsFingerprint> for RawDtlsFingerprint {
    fn from(fingerprint: DtlsFingerprint) -> Self {
        Self {
            algorithm: fingerprint.algorithm,
            value: fingerprint.to_string(),
        }
    }
}

#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct DtlsParameters {
    #[serde(default)]
    pub role: DtlsRole,
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// Whether a traced packet was received or sent by the engine.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceDirection {
    In,
    Out,
}

/// Packet-level event emitted by a resource once tracing of `Kind` events is enabled on it.
///
/// Only the envelope is interpreted, `info` is forwarded as the engine produced it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TraceEvent<Kind> {
    /// What was traced.
    #[serde(rename = "type")]
    pub kind: Kind,
    /// Engine clock, in ms.
    pub timestamp: u64,
    pub direction: TraceDirection,
    /// Details specific to `kind`.
    #[serde(default)]
    pub info: Value,
}

/// Single entry of a `getStats` reply.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StatsReport {
    /// Entry kind such as `outbound-rtp` or `transport`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Engine clock, in ms.
    pub timestamp: u64,
    /// Counters specific to the entry kind.
    #[serde(flatten)]
    pub counters: Map<String, Value>,
}

/// Data channel message as carried over SCTP, tagged with its payload protocol identifier.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum WebRtcMessage {
    String(String),
    Binary(Bytes),
    EmptyString,
    EmptyBinary,
}

/// Payload that can't be represented as a [`WebRtcMessage`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum WebRtcMessageError {
    #[error("Unsupported PPID {0}")]
    UnsupportedPpid(u32),
    #[error("String message is not valid UTF-8")]
    NotUtf8,
}

const PPID_STRING: u32 = 51;
const PPID_BINARY: u32 = 53;
const PPID_EMPTY_STRING: u32 = 56;
const PPID_EMPTY_BINARY: u32 = 57;

impl WebRtcMessage {
    pub(crate) fn new(ppid: u32, payload: Bytes) -> Result<Self, WebRtcMessageError> {
        match ppid {
            PPID_STRING => String::from_utf8(payload.to_vec())
                .map(Self::String)
                .map_err(|_| WebRtcMessageError::NotUtf8),
            PPID_BINARY => Ok(Self::Binary(payload)),
            PPID_EMPTY_STRING => Ok(Self::EmptyString),
            PPID_EMPTY_BINARY => Ok(Self::EmptyBinary),
            ppid => Err(WebRtcMessageError::UnsupportedPpid(ppid)),
        }
    }

    // Empty messages still carry one byte, SCTP can't send empty payloads.
    pub(crate) fn into_ppid_and_payload(self) -> (u32, Bytes) {
        match self {
            Self::String(string) => (PPID_STRING, Bytes::from(string)),
            Self::Binary(binary) => (PPID_BINARY, binary),
            Self::EmptyString => (PPID_EMPTY_STRING, Bytes::from_static(b" ")),
            Self::EmptyBinary => (PPID_EMPTY_BINARY, Bytes::from_static(&[0])),
        }
    }
}
