//! The external MPC signer capability.
//!
//! Everything cryptographic happens behind [`MpcSigner`]: allocating rooms, running the
//! keygen and signing rounds with the remote party, and deriving child public keys. This
//! crate treats its inputs and outputs as opaque values to be stored and passed along.
pub mod relay;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::scheme::{DerivationPath, InvalidPublicKey, PublicKey, Scheme, SignMessage};

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("signer unreachable: {0}")]
    Unreachable(String),
    #[error("signer rejected request: {0}")]
    Rejected(String),
    #[error("protocol run failed: {0}")]
    Protocol(String),
}

/// Opaque rendezvous channel allocated by the signer for one protocol run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        RoomId(id.to_string())
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        RoomId(id)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-party material produced before keygen rounds start.
///
/// `keygen_id` is this party's protocol participant id, handed to the peer so it can
/// name us in its own keygen call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitMaterial {
    pub keygen_id: String,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
}

/// Secret key share bytes. Zeroed when dropped and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretShare(#[serde(with = "hex_bytes")] Vec<u8>);

impl SecretShare {
    pub fn new(bytes: Vec<u8>) -> Self {
        SecretShare(bytes)
    }

    /// Short SHA-256 fingerprint, safe to log.
    pub fn fingerprint(&self) -> String {
        hex::encode(&Sha256::digest(&self.0)[..8])
    }
}

impl fmt::Debug for SecretShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretShare({})", self.fingerprint())
    }
}

/// One party's output of a completed keygen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeygenResult {
    pub pubkey: PublicKey,
    pub secret_share: SecretShare,
}

impl KeygenResult {
    pub(crate) fn to_wire(&self) -> KeygenResultWire {
        KeygenResultWire {
            pubkey: self.pubkey.to_canonical_bytes(),
            secret_share: self.secret_share.clone(),
        }
    }

    pub(crate) fn from_wire(
        scheme: Scheme,
        wire: KeygenResultWire,
    ) -> Result<Self, InvalidPublicKey> {
        Ok(KeygenResult {
            pubkey: PublicKey::from_canonical_bytes(scheme, &wire.pubkey)?,
            secret_share: wire.secret_share,
        })
    }
}

/// [`KeygenResult`] with its public key in canonical byte form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct KeygenResultWire {
    pub pubkey: Vec<u8>,
    pub secret_share: SecretShare,
}

/// Signature bytes as produced by the signer (DER for ECDSA, 64 bytes for Ed25519).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(#[serde(with = "hex_bytes")] pub Vec<u8>);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// A participant id as declared by a peer (its `keygen_id`).
pub type ParticipantId = String;

#[async_trait]
pub trait MpcSigner: Send + Sync {
    async fn create_room(&self, party_count: u16, api_key: &str) -> Result<RoomId, SignerError>;

    async fn init_keygen(&self) -> Result<InitMaterial, SignerError>;

    /// Run keygen rounds in `room` until every party holds its share.
    async fn keygen(
        &self,
        room: &RoomId,
        parties: u16,
        threshold: u16,
        init: &InitMaterial,
        peers: &[ParticipantId],
    ) -> Result<KeygenResult, SignerError>;

    async fn derive_pubkey(
        &self,
        share: &KeygenResult,
        path: &DerivationPath,
    ) -> Result<PublicKey, SignerError>;

    async fn sign(
        &self,
        room: &RoomId,
        share: &KeygenResult,
        message: &SignMessage,
        path: &DerivationPath,
    ) -> Result<Signature, SignerError>;
}

/// One signer per supported scheme.
#[derive(Clone)]
pub struct Signers {
    ecdsa: Arc<dyn MpcSigner>,
    ed25519: Arc<dyn MpcSigner>,
}

impl Signers {
    pub fn new(ecdsa: Arc<dyn MpcSigner>, ed25519: Arc<dyn MpcSigner>) -> Self {
        Self { ecdsa, ed25519 }
    }

    pub fn get(&self, scheme: Scheme) -> &dyn MpcSigner {
        match scheme {
            Scheme::Ecdsa => self.ecdsa.as_ref(),
            Scheme::Ed25519 => self.ed25519.as_ref(),
        }
    }
}

impl fmt::Debug for Signers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signers").finish_non_exhaustive()
    }
}

pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_shares_are_not_printed() {
        let share = SecretShare::new(vec![0xab; 32]);
        let printed = format!("{:?}", share);
        assert!(!printed.contains("abab"));
        assert_eq!(printed, format!("SecretShare({})", share.fingerprint()));
        assert_eq!(share.fingerprint().len(), 16);
    }

    #[test]
    fn secret_shares_serialize_as_hex() {
        let share = SecretShare::new(vec![1, 2, 255]);
        let json = serde_json::to_string(&share).unwrap();
        assert_eq!(json, "\"0102ff\"");
        let back: SecretShare = serde_json::from_str(&json).unwrap();
        assert_eq!(back, share);
    }
}
