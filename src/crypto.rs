use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature as Ed25519Signature, Verifier as _, VerifyingKey};
use k256::ecdsa::signature::Verifier as _;
use k256::ecdsa::{Signature as Secp256k1Signature, VerifyingKey as Secp256k1VerifyingKey};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::errors::{ChainError, ChainResult};

const ED25519_KEY_LEN: usize = 32;
const SECP256K1_KEY_LEN: usize = 33;
const CONSENSUS_ADDRESS_LEN: usize = 20;

/// A validator consensus public key. The chain carries these base64-encoded;
/// the byte length decides the scheme.
#[derive(Clone, Debug)]
pub enum ConsensusKey {
    Ed25519(VerifyingKey),
    Secp256k1(Secp256k1VerifyingKey),
}

impl ConsensusKey {
    pub fn from_base64(encoded: &str) -> ChainResult<Self> {
        if encoded.is_empty() {
            return Err(ChainError::InvalidArgument(
                "consensus key is empty".into(),
            ));
        }
        let bytes = BASE64.decode(encoded).map_err(|err| {
            ChainError::InvalidArgument(format!("invalid consensus key encoding: {err}"))
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> ChainResult<Self> {
        match bytes.len() {
            ED25519_KEY_LEN => {
                let raw: [u8; ED25519_KEY_LEN] = bytes.try_into().expect("checked length");
                let key = VerifyingKey::from_bytes(&raw).map_err(|err| {
                    ChainError::InvalidArgument(format!("invalid ed25519 key bytes: {err}"))
                })?;
                Ok(ConsensusKey::Ed25519(key))
            }
            SECP256K1_KEY_LEN => {
                let key = Secp256k1VerifyingKey::from_sec1_bytes(bytes).map_err(|err| {
                    ChainError::InvalidArgument(format!("invalid secp256k1 key bytes: {err}"))
                })?;
                Ok(ConsensusKey::Secp256k1(key))
            }
            other => Err(ChainError::InvalidArgument(format!(
                "unsupported consensus key length {other}"
            ))),
        }
    }

    /// Consensus address as upper-case hex: truncated SHA-256 for ed25519,
    /// RIPEMD-160 over SHA-256 for secp256k1, matching the upstream chain.
    pub fn address_hex(&self) -> String {
        match self {
            ConsensusKey::Ed25519(key) => {
                let digest = Sha256::digest(key.as_bytes());
                hex_upper(&digest[..CONSENSUS_ADDRESS_LEN])
            }
            ConsensusKey::Secp256k1(key) => {
                let sha = Sha256::digest(key.to_sec1_bytes());
                let digest = Ripemd160::digest(sha);
                hex_upper(&digest)
            }
        }
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> ChainResult<()> {
        match self {
            ConsensusKey::Ed25519(key) => {
                let signature = Ed25519Signature::from_slice(signature).map_err(|err| {
                    ChainError::VerificationFailed(format!("invalid ed25519 signature: {err}"))
                })?;
                key.verify(message, &signature).map_err(|err| {
                    ChainError::VerificationFailed(format!(
                        "ed25519 signature verification failed: {err}"
                    ))
                })
            }
            ConsensusKey::Secp256k1(key) => {
                let signature = Secp256k1Signature::from_slice(signature).map_err(|err| {
                    ChainError::VerificationFailed(format!("invalid secp256k1 signature: {err}"))
                })?;
                key.verify(message, &signature).map_err(|err| {
                    ChainError::VerificationFailed(format!(
                        "secp256k1 signature verification failed: {err}"
                    ))
                })
            }
        }
    }
}

/// Derives the upper-case hex consensus address from a base64 consensus key.
pub fn consensus_key_to_address(key_base64: &str) -> ChainResult<String> {
    Ok(ConsensusKey::from_base64(key_base64)?.address_hex())
}

pub fn hex_upper(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

pub fn decode_hex(data: &str) -> ChainResult<Vec<u8>> {
    hex::decode(data)
        .map_err(|err| ChainError::InvalidArgument(format!("invalid hex encoding: {err}")))
}

pub fn decode_base64(data: &str) -> ChainResult<Vec<u8>> {
    BASE64
        .decode(data)
        .map_err(|err| ChainError::InvalidArgument(format!("invalid base64 encoding: {err}")))
}

pub fn encode_base64(data: &[u8]) -> String {
    BASE64.encode(data)
}
