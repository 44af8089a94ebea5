//! SCTP settings of transports and of the streams data producers and consumers use.

use serde::{Deserialize, Serialize};

/// Stream counts a transport negotiates for its SCTP association.
///
/// `os` bounds the streams data consumers can get, `mis` the ones data producers can use.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct NumSctpStreams {
    /// Outgoing streams.
    #[serde(rename = "OS")]
    pub os: u16,
    /// Incoming streams.
    #[serde(rename = "MIS")]
    pub mis: u16,
}

impl Default for NumSctpStreams {
    fn default() -> Self {
        Self {
            os: 1024,
            mis: 1024,
        }
    }
}

/// SCTP association parameters of a transport.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SctpParameters {
    /// Always 5000.
    pub port: u16,
    /// Outgoing streams.
    #[serde(rename = "OS")]
    pub os: u16,
    /// Incoming streams.
    #[serde(rename = "MIS")]
    pub mis: u16,
    /// In bytes.
    pub max_message_size: usize,
}

/// Stream id and delivery guarantees of one SCTP stream.
///
/// Ordered streams are fully reliable, unordered ones give up either after a time or after a
/// number of retransmissions, never both.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SctpStreamParameters {
    stream_id: u16,
    #[serde(default = "default_ordered")]
    ordered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_packet_life_time: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_retransmits: Option<u16>,
}

fn default_ordered() -> bool {
    true
}

impl SctpStreamParameters {
    /// Reliable and ordered.
    pub fn new_ordered(stream_id: u16) -> Self {
        Self {
            stream_id,
            ordered: true,
            max_packet_life_time: None,
            max_retransmits: None,
        }
    }

    /// Unordered, a packet is dropped once `max_packet_life_time` ms passed.
    pub fn new_unordered_with_life_time(stream_id: u16, max_packet_life_time: u16) -> Self {
        Self {
            stream_id,
            ordered: false,
            max_packet_life_time: Some(max_packet_life_time),
            max_retransmits: None,
        }
    }

    /// Unordered, a packet is dropped after `max_retransmits` attempts.
    pub fn new_unordered_with_retransmits(stream_id: u16, max_retransmits: u16) -> Self {
        Self {
            stream_id,
            ordered: false,
            max_packet_life_time: None,
            max_retransmits: Some(max_retransmits),
        }
    }

    /// Same reliability settings on another stream.
    pub(crate) fn with_stream_id(self, stream_id: u16) -> Self {
        Self { stream_id, ..self }
    }

    /// Reliability settings replaced by the given ones where present.
    pub(crate) fn with_reliability(
        self,
        ordered: Option<bool>,
        max_packet_life_time: Option<u16>,
        max_retransmits: Option<u16>,
    ) -> Self {
        Self {
            stream_id: self.stream_id,
            ordered: ordered.unwrap_or(self.ordered),
            max_packet_life_time: max_packet_life_time.or(self.max_packet_life_time),
            max_retransmits: max_retransmits.or(self.max_retransmits),
        }
    }

    pub fn stream_id(&self) -> u16 {
        self.stream_id
    }

    pub fn ordered(&self) -> bool {
        self.ordered
    }

    /// In ms.
    pub fn max_packet_life_time(&self) -> Option<u16> {
        self.max_packet_life_time
    }

    pub fn max_retransmits(&self) -> Option<u16> {
        self.max_retransmits
    }
}
