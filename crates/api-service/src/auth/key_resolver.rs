//! Resolves a token's key ID to a usable RSA public key.
//!
//! Keys are rebuilt from the cached descriptor on every call; reconstruction
//! is a couple of base64 decodes and is not worth a second cache.

use crate::auth::error::{AuthError, FetchError};
use crate::auth::jwks::KeyDescriptor;
use crate::auth::key_set_cache::KeySetCache;
use crate::auth::verifier::RsaAlgorithm;
use common::jwt::decode_base64url_lenient;
use ring::signature::RsaPublicKeyComponents;
use std::sync::Arc;
use tracing::instrument;

/// Smallest accepted RSA modulus, in bits.
pub const MIN_MODULUS_BITS: usize = 2048;

/// Largest accepted RSA modulus, in bits.
pub const MAX_MODULUS_BITS: usize = 8192;

/// Largest accepted public exponent, in bits.
pub const MAX_EXPONENT_BITS: usize = 33;

/// RSA public key reconstructed from a key descriptor.
///
/// Owned by the resolution call that produced it; never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    /// Big-endian modulus without leading zero bytes.
    modulus: Vec<u8>,
    exponent: u64,
}

impl PublicKey {
    /// Rebuild a key from the base64url `n` and `e` of a descriptor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKeyMaterial` when the descriptor is not an RSA signing
    /// key or its components do not decode to a usable key.
    pub fn from_descriptor(descriptor: &KeyDescriptor) -> Result<Self, AuthError> {
        if !descriptor.kty.is_empty() && descriptor.kty != "RSA" {
            tracing::warn!(target: "api.auth.keys", kid = %descriptor.kid, kty = %descriptor.kty, "Key is not an RSA key");
            return Err(AuthError::InvalidKeyMaterial);
        }

        if !descriptor.key_use.is_empty() && descriptor.key_use != "sig" {
            tracing::warn!(target: "api.auth.keys", kid = %descriptor.kid, key_use = %descriptor.key_use, "Key is not a signing key");
            return Err(AuthError::InvalidKeyMaterial);
        }

        let modulus = decode_component(&descriptor.n, "n")?;
        let modulus = strip_leading_zeros(&modulus).to_vec();
        let bits = bit_length(&modulus);
        if !(MIN_MODULUS_BITS..=MAX_MODULUS_BITS).contains(&bits) {
            tracing::warn!(target: "api.auth.keys", kid = %descriptor.kid, bits, "RSA modulus size out of range");
            return Err(AuthError::InvalidKeyMaterial);
        }

        let exponent = decode_component(&descriptor.e, "e")?;
        let exponent = strip_leading_zeros(&exponent);
        if bit_length(exponent) > MAX_EXPONENT_BITS {
            tracing::warn!(target: "api.auth.keys", kid = %descriptor.kid, "RSA exponent is wider than 33 bits");
            return Err(AuthError::InvalidKeyMaterial);
        }
        let exponent = exponent
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
        // Verification needs an odd exponent of at least 3.
        if exponent < 3 || exponent % 2 == 0 {
            tracing::warn!(target: "api.auth.keys", kid = %descriptor.kid, exponent, "RSA exponent is unusable");
            return Err(AuthError::InvalidKeyMaterial);
        }

        Ok(Self { modulus, exponent })
    }

    pub fn modulus_bits(&self) -> usize {
        bit_length(&self.modulus)
    }

    pub fn exponent(&self) -> u64 {
        self.exponent
    }

    /// Check `signature` over `message` with RSASSA-PKCS1-v1_5.
    pub fn verify(&self, algorithm: RsaAlgorithm, message: &[u8], signature: &[u8]) -> bool {
        let exponent_bytes = self.exponent.to_be_bytes();
        let components = RsaPublicKeyComponents {
            n: self.modulus.as_slice(),
            e: strip_leading_zeros(&exponent_bytes),
        };

        components
            .verify(algorithm.parameters(), message, signature)
            .is_ok()
    }
}

// Key material is public, but it is noisy in logs.
impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("modulus_bits", &self.modulus_bits())
            .field("exponent", &self.exponent)
            .finish()
    }
}

fn decode_component(value: &str, name: &'static str) -> Result<Vec<u8>, AuthError> {
    decode_base64url_lenient(value).map_err(|e| {
        tracing::warn!(target: "api.auth.keys", component = name, error = %e, "Invalid base64url in key component");
        AuthError::InvalidKeyMaterial
    })
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().take_while(|b| **b == 0).count();
    bytes.get(start..).unwrap_or_default()
}

fn bit_length(bytes: &[u8]) -> usize {
    match bytes.first() {
        None => 0,
        Some(first) => (bytes.len() - 1) * 8 + (8 - first.leading_zeros() as usize),
    }
}

/// Looks up signing keys in the shared key set cache.
#[derive(Clone)]
pub struct KeyResolver {
    cache: Arc<KeySetCache>,
}

impl KeyResolver {
    pub fn new(cache: Arc<KeySetCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<KeySetCache> {
        &self.cache
    }

    /// Resolve `kid` to a public key.
    ///
    /// An unknown `kid` is reported as-is; it does not force a refresh of a
    /// fresh key set.
    ///
    /// # Errors
    ///
    /// - `Fetch` - The key set could not be obtained
    /// - `KeyNotFound` - No key is published under `kid`
    /// - `InvalidKeyMaterial` - The key cannot be reconstructed
    #[instrument(skip(self))]
    pub async fn resolve(&self, kid: &str) -> Result<PublicKey, AuthError> {
        let key_set = self.cache.get(false).await.map_err(|e: FetchError| {
            tracing::warn!(target: "api.auth.keys", error = %e, "Key set unavailable");
            AuthError::Fetch(e)
        })?;

        let descriptor = key_set.find(kid).ok_or_else(|| {
            tracing::debug!(target: "api.auth.keys", kid = %kid, "Signing key not found in key set");
            AuthError::KeyNotFound
        })?;

        PublicKey::from_descriptor(descriptor)
    }
}
