use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

/// Errors produced by value transforms. Messages never carry plaintext.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("key unavailable: {0}")]
    Key(String),
}

/// Reversible transform applied to every value crossing the persistence boundary.
///
/// Implementations must satisfy `decode(encode(x)) == x`. Encoded values carry
/// [`ValueCipher::marker`] as a prefix; `decode` returns values without the
/// marker unchanged, so entries written unencoded by another path stay
/// readable instead of being truncated.
pub trait ValueCipher: Send + Sync {
    /// Prefix identifying values produced by this transform.
    fn marker(&self) -> &str;

    fn encode(&self, plain: &str) -> Result<String, CipherError>;

    /// Decode a payload with the marker already stripped.
    fn decode_payload(&self, payload: &str) -> Result<String, CipherError>;

    fn is_encoded(&self, stored: &str) -> bool {
        stored.starts_with(self.marker())
    }

    fn decode(&self, stored: &str) -> Result<String, CipherError> {
        match stored.strip_prefix(self.marker()) {
            Some(payload) => self.decode_payload(payload),
            None => Ok(stored.to_string()),
        }
    }
}

impl<C: ValueCipher + ?Sized> ValueCipher for Box<C> {
    fn marker(&self) -> &str {
        (**self).marker()
    }

    fn encode(&self, plain: &str) -> Result<String, CipherError> {
        (**self).encode(plain)
    }

    fn decode_payload(&self, payload: &str) -> Result<String, CipherError> {
        (**self).decode_payload(payload)
    }
}

pub const MASK_MARKER: &str = "mask:";
const MASK_BYTE: u8 = 0xA5;

/// Placeholder transform: XOR mask plus base64 behind a fixed marker.
///
/// This keeps plaintext out of the file for tests and smoke runs. It is not
/// cryptography; production stores use an AEAD cipher keyed from the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct MaskCipher;

impl ValueCipher for MaskCipher {
    fn marker(&self) -> &str {
        MASK_MARKER
    }

    fn encode(&self, plain: &str) -> Result<String, CipherError> {
        Ok(format!("{MASK_MARKER}{}", STANDARD.encode(mask(plain.as_bytes()))))
    }

    fn decode_payload(&self, payload: &str) -> Result<String, CipherError> {
        let masked = STANDARD
            .decode(payload)
            .map_err(|e| CipherError::Decode(format!("base64: {e}")))?;
        String::from_utf8(mask(&masked)).map_err(|e| CipherError::Decode(format!("utf-8: {e}")))
    }
}

fn mask(input: &[u8]) -> Vec<u8> {
    input.iter().map(|b| b ^ MASK_BYTE).collect()
}
