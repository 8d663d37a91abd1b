//! Detached Ed25519 signatures over contract payloads.
//!
//! A party's `cert` holds its verifying key as base64 (32 bytes). Signatures
//! are base64 as well (64 bytes). Standard and URL-safe alphabets are both
//! accepted, with or without padding.

use base64::{Engine as _, engine::general_purpose};
use ed25519_dalek::{Signature, VerifyingKey};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed verifying key: {0}")]
    MalformedKey(String),

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("signature does not match the payload")]
    Mismatch,
}

fn decode(input: &str) -> Option<Vec<u8>> {
    let input = input.trim();
    [
        general_purpose::STANDARD,
        general_purpose::URL_SAFE,
        general_purpose::STANDARD_NO_PAD,
        general_purpose::URL_SAFE_NO_PAD,
    ]
    .iter()
    .find_map(|engine| engine.decode(input).ok())
}

/// Parse a base64 Ed25519 verifying key.
pub fn parse_verifying_key(encoded: &str) -> Result<VerifyingKey, SignatureError> {
    let bytes = decode(encoded).ok_or_else(|| SignatureError::MalformedKey("not base64".into()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| SignatureError::MalformedKey(format!("expected 32 bytes, got {}", b.len())))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| SignatureError::MalformedKey(e.to_string()))
}

/// Check `signature` (base64) over `payload` against `public_key` (base64).
pub fn verify_signature(public_key: &str, signature: &str, payload: &[u8]) -> Result<(), SignatureError> {
    let key = parse_verifying_key(public_key)?;
    let bytes =
        decode(signature).ok_or_else(|| SignatureError::MalformedSignature("not base64".into()))?;
    let bytes: [u8; 64] = bytes.try_into().map_err(|b: Vec<u8>| {
        SignatureError::MalformedSignature(format!("expected 64 bytes, got {}", b.len()))
    })?;

    key.verify_strict(payload, &Signature::from_bytes(&bytes))
        .map_err(|_| SignatureError::Mismatch)
}
