//! SRTP keying exchanged with plain and pipe transports when encryption is enabled.

use serde::{Deserialize, Serialize};

/// Crypto suite plus keying material for one direction of an SRTP session.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SrtpParameters {
    /// Cipher and authentication tag combination.
    pub crypto_suite: SrtpCryptoSuite,
    /// Master key followed by master salt, Base64 encoded.
    pub key_base64: String,
}

/// Crypto suites understood by the engine, named as on the wire.
#[derive(
    Debug, Default, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize,
)]
pub enum SrtpCryptoSuite {
    /// `AEAD_AES_256_GCM`
    #[serde(rename = "AEAD_AES_256_GCM")]
    AeadAes256Gcm,
    /// `AEAD_AES_128_GCM`
    #[serde(rename = "AEAD_AES_128_GCM")]
    AeadAes128Gcm,
    /// `AES_CM_128_HMAC_SHA1_80`
    #[default]
    #[serde(rename = "AES_CM_128_HMAC_SHA1_80")]
    AesCm128HmacSha180,
    /// `AES_CM_128_HMAC_SHA1_32`
    #[serde(rename = "AES_CM_128_HMAC_SHA1_32")]
    AesCm128HmacSha132,
}
