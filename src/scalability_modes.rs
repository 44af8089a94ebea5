//! Scalability mode parsing (`L1T3`, `S3T3_KEY` and friends).


use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of spatial and temporal layers of an RTP stream.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalabilityMode {
    pub spatial_layers: u8,
    pub temporal_layers: u8,
    /// K-SVC (`_KEY` suffix).
    pub ksvc: bool,
}

impl Default for ScalabilityMode {
    fn default() -> Self {
        Self {
            spatial_layers: 1,
            temporal_layers: 1,
            ksvc: false,
        }
    }
}

impl fmt::Display for ScalabilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}T{}", self.spatial_layers, self.temporal_layers)?;
        if self.ksvc {
            f.write_str("_KEY")?;
        }
        Ok(())
    }
}

/// Parse scalability mode string, anything unrecognized yields the default single layer mode.
pub fn parse(scalability_mode: &str) -> ScalabilityMode {
    static SCALABILITY_MODE_REGEX: OnceCell<Option<Regex>> = OnceCell::new();

    SCALABILITY_MODE_REGEX
        .get_or_init(|| Regex::new(r"^[LS]([1-9][0-9]?)T([1-9][0-9]?)(_KEY)?").ok())
        .as_ref()
        .and_then(|regex| regex.captures(scalability_mode))
        .and_then(|captures| {
            Some(ScalabilityMode {
                spatial_layers: captures.get(1)?.as_str().parse().ok()?,
                temporal_layers: captures.get(2)?.as_str().parse().ok()?,
                ksvc: captures.get(3).is_some(),
            })
        })
        .unwrap_or_default()
}
