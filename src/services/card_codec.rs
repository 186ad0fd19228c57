use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::aead::{
    Aad, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey, AES_256_GCM,
};
use ring::digest;
use ring::error::Unspecified;
use ring::hmac;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const NONCE_KEY_LABEL: &[u8] = b"bankcards/card-number-nonce";

/// Placeholder returned by [`mask`] when the number is too short to show its tail.
pub const MASK_PLACEHOLDER: &str = "****";
const MASK_PREFIX: &str = "**** **** **** ";

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("Card number key material is empty")]
    EmptyKey,

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid identifier format")]
    InvalidFormat,
}

impl From<Unspecified> for CodecError {
    fn from(_: Unspecified) -> Self {
        CodecError::EncodingFailed("Cryptographic operation failed".to_string())
    }
}

/// Hands out one fixed nonce. Each key is bound to a single seal/open call.
struct SingleNonce {
    nonce: [u8; NONCE_LEN],
}

impl SingleNonce {
    fn new(nonce: [u8; NONCE_LEN]) -> Self {
        Self { nonce }
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> Result<Nonce, Unspecified> {
        Nonce::try_assume_unique_for_key(&self.nonce)
    }
}

/// Deterministic, reversible transform between a card number and its storage
/// identifier.
///
/// The AES-256-GCM nonce is an HMAC of the plain number, so the same number
/// always yields the same identifier and the identifier can serve as a lookup
/// key. Format: `base64url([nonce (12 bytes)][ciphertext + auth tag])`.
#[derive(Clone)]
pub struct CardCodec {
    cipher_key: [u8; 32],
    nonce_key: hmac::Key,
}

impl std::fmt::Debug for CardCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardCodec").finish_non_exhaustive()
    }
}

impl CardCodec {
    /// Builds a codec from configured key material of any length.
    pub fn new(key_material: &str) -> Result<Self, CodecError> {
        if key_material.trim().is_empty() {
            return Err(CodecError::EmptyKey);
        }

        let cipher_key = derive_key(key_material);

        let mut labelled = NONCE_KEY_LABEL.to_vec();
        labelled.extend_from_slice(key_material.as_bytes());
        let nonce_key = hmac::Key::new(hmac::HMAC_SHA256, &derive_key_bytes(&labelled));

        Ok(Self {
            cipher_key,
            nonce_key,
        })
    }

    pub fn encode(&self, card_number: &str) -> Result<String, CodecError> {
        let nonce_bytes = self.synthetic_nonce(card_number);

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.cipher_key)?;
        let mut sealing_key = SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut in_out = card_number.as_bytes().to_vec();
        sealing_key
            .seal_in_place_append_tag(Aad::empty(), &mut in_out)
            .map_err(|_| CodecError::EncodingFailed("Sealing failed".to_string()))?;

        let mut raw = Vec::with_capacity(NONCE_LEN + in_out.len());
        raw.extend_from_slice(&nonce_bytes);
        raw.extend_from_slice(&in_out);

        Ok(URL_SAFE_NO_PAD.encode(raw))
    }

    pub fn decode(&self, identifier: &str) -> Result<String, CodecError> {
        let raw = URL_SAFE_NO_PAD
            .decode(identifier)
            .map_err(|_| CodecError::InvalidFormat)?;

        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(CodecError::InvalidFormat);
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(&raw[..NONCE_LEN]);

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.cipher_key)
            .map_err(|_| CodecError::DecodingFailed("Invalid key".to_string()))?;
        let mut opening_key = OpeningKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut in_out = raw[NONCE_LEN..].to_vec();
        let opened = opening_key
            .open_in_place(Aad::empty(), &mut in_out)
            .map_err(|_| CodecError::DecodingFailed("Opening failed".to_string()))?;

        let card_number = String::from_utf8(opened.to_vec())
            .map_err(|_| CodecError::DecodingFailed("Invalid UTF-8".to_string()))?;

        // A valid ciphertext under a foreign nonce means the row was not produced by `encode`.
        if self.synthetic_nonce(&card_number) != nonce_bytes {
            return Err(CodecError::DecodingFailed("Nonce mismatch".to_string()));
        }

        Ok(card_number)
    }

    fn synthetic_nonce(&self, card_number: &str) -> [u8; NONCE_LEN] {
        let tag = hmac::sign(&self.nonce_key, card_number.as_bytes());
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&tag.as_ref()[..NONCE_LEN]);
        nonce
    }
}

/// Display form of a card number showing only its last 4 characters.
pub fn mask(card_number: &str) -> String {
    let chars: Vec<char> = card_number.chars().collect();
    if chars.len() < 4 {
        return MASK_PLACEHOLDER.to_string();
    }

    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", MASK_PREFIX, tail)
}

/// Derives a 32-byte key from a string (e.g., from environment variable).
/// Uses SHA-256 to ensure we always get exactly 32 bytes.
pub fn derive_key(key_string: &str) -> [u8; 32] {
    derive_key_bytes(key_string.as_bytes())
}

fn derive_key_bytes(material: &[u8]) -> [u8; 32] {
    let hash = digest::digest(&digest::SHA256, material);
    let mut key = [0u8; 32];
    key.copy_from_slice(hash.as_ref());
    key
}
