use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use securestore_core::{CipherError, ValueCipher};

use crate::key_provider::{KeyMaterial, KeyProvider};

pub const AEAD_MARKER: &str = "aead:v1:";
const NONCE_LEN: usize = 12;

/// AES-256-GCM value cipher. Each value gets a fresh random nonce; the stored
/// form is [`AEAD_MARKER`] followed by URL-safe base64 of `nonce || ciphertext`.
pub struct AesGcmCipher {
    key_id: String,
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// Fetch (or create) the key once and keep the initialised cipher.
    pub fn from_provider<P: KeyProvider + ?Sized>(provider: &P) -> Result<Self, CipherError> {
        let material = provider
            .get_or_create()
            .map_err(|e| CipherError::Key(format!("key provider: {e}")))?;
        Self::new(&material)
    }

    pub fn new(material: &KeyMaterial) -> Result<Self, CipherError> {
        let cipher = Aes256Gcm::new_from_slice(&material.bytes)
            .map_err(|e| CipherError::Key(format!("cipher init failed: {e}")))?;
        Ok(Self {
            key_id: material.id.clone(),
            cipher,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl ValueCipher for AesGcmCipher {
    fn marker(&self) -> &str {
        AEAD_MARKER
    }

    fn encode(&self, plain: &str) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain.as_bytes())
            .map_err(|e| CipherError::Encode(format!("encrypt failed: {e}")))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(&ciphertext);
        Ok(format!("{AEAD_MARKER}{}", URL_SAFE_NO_PAD.encode(blob)))
    }

    fn decode_payload(&self, payload: &str) -> Result<String, CipherError> {
        let blob = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| CipherError::Decode(format!("payload decode failed: {e}")))?;
        if blob.len() < NONCE_LEN {
            return Err(CipherError::Decode("payload shorter than nonce".to_string()));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CipherError::Decode(format!("decrypt failed: {e}")))?;
        String::from_utf8(plain).map_err(|e| CipherError::Decode(format!("utf-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_provider::InMemoryKeyProvider;

    fn cipher() -> AesGcmCipher {
        AesGcmCipher::from_provider(&InMemoryKeyProvider::default()).expect("cipher")
    }

    #[test]
    fn round_trip_encrypts_and_decrypts() {
        let cipher = cipher();
        let encoded = cipher.encode("hello-securestore").expect("encode");
        assert!(encoded.starts_with(AEAD_MARKER));
        assert!(!encoded.contains("hello-securestore"), "plaintext must not be stored");
        assert_eq!(cipher.decode(&encoded).expect("decode"), "hello-securestore");
    }

    #[test]
    fn nonces_differ_per_value() {
        let cipher = cipher();
        assert_ne!(cipher.encode("same").unwrap(), cipher.encode("same").unwrap());
    }

    #[test]
    fn wrong_key_fails_to_decode() {
        let writer = AesGcmCipher::from_provider(&InMemoryKeyProvider::with_key([1u8; 32])).unwrap();
        let reader = AesGcmCipher::from_provider(&InMemoryKeyProvider::with_key([2u8; 32])).unwrap();
        let encoded = writer.encode("secret").unwrap();
        let err = reader.decode(&encoded).expect_err("wrong key");
        assert!(matches!(err, CipherError::Decode(_)));
        assert!(!err.to_string().contains("secret"));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let cipher = cipher();
        let mut encoded = cipher.encode("secret").unwrap();
        let last = encoded.pop().unwrap();
        encoded.push(if last == 'A' { 'B' } else { 'A' });
        assert!(cipher.decode(&encoded).is_err());
        assert!(cipher.decode("aead:v1:AAAA").is_err());
    }

    #[test]
    fn unmarked_value_passes_through() {
        assert_eq!(cipher().decode("legacy-plain").unwrap(), "legacy-plain");
    }
}
