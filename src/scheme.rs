//! Signature schemes, their public keys, message formatting and derivation paths.
use std::{fmt, str::FromStr};

use ed25519_dalek::VerifyingKey;
use secp256kfun::Point;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

/// The signature schemes a share can be generated for.
///
/// The set is fixed by the signer protocol, so everything scheme specific is a `match` on
/// this enum rather than a trait object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Ecdsa,
    Ed25519,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown signature scheme `{0}`")]
    UnknownScheme(String),
    #[error("invalid derivation path `{0}`")]
    DerivationPath(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {scheme} public key ({len} bytes)")]
pub struct InvalidPublicKey {
    pub scheme: Scheme,
    pub len: usize,
}

impl Scheme {
    pub const ALL: [Scheme; 2] = [Scheme::Ecdsa, Scheme::Ed25519];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Ecdsa => "ecdsa",
            Scheme::Ed25519 => "ed25519",
        }
    }

    /// Prepare a message for signing under this scheme.
    ///
    /// ECDSA signs the Keccak-256 digest of the message, Ed25519 signs the raw bytes.
    pub fn format_message(&self, message: &str) -> SignMessage {
        match self {
            Scheme::Ecdsa => SignMessage::Digest(keccak256(message.as_bytes())),
            Scheme::Ed25519 => SignMessage::Raw(message.as_bytes().to_vec()),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ecdsa" => Ok(Scheme::Ecdsa),
            "ed25519" => Ok(Scheme::Ed25519),
            other => Err(ParseError::UnknownScheme(other.to_string())),
        }
    }
}

/// A message after scheme specific formatting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "bytes")]
pub enum SignMessage {
    Digest([u8; 32]),
    Raw(Vec<u8>),
}

impl SignMessage {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            SignMessage::Digest(digest) => digest,
            SignMessage::Raw(bytes) => bytes,
        }
    }
}

pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut digest = [0u8; 32];
    hasher.update(bytes);
    hasher.finalize(&mut digest);
    digest
}

/// A public key in its scheme's native representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicKey {
    Ecdsa(Point),
    Ed25519(VerifyingKey),
}

impl PublicKey {
    pub fn scheme(&self) -> Scheme {
        match self {
            PublicKey::Ecdsa(_) => Scheme::Ecdsa,
            PublicKey::Ed25519(_) => Scheme::Ed25519,
        }
    }

    /// The byte form used whenever a key leaves the process.
    ///
    /// ECDSA keys are 65 byte uncompressed SEC1 points, Ed25519 keys their 32 byte encoding.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        match self {
            PublicKey::Ecdsa(point) => point.to_bytes_uncompressed().to_vec(),
            PublicKey::Ed25519(key) => key.to_bytes().to_vec(),
        }
    }

    /// Rebuild a key from [`PublicKey::to_canonical_bytes`] output.
    ///
    /// Compressed 33 byte ECDSA points are accepted as well since signers commonly hand
    /// those out.
    pub fn from_canonical_bytes(scheme: Scheme, bytes: &[u8]) -> Result<Self, InvalidPublicKey> {
        let invalid = InvalidPublicKey {
            scheme,
            len: bytes.len(),
        };
        match scheme {
            Scheme::Ecdsa => {
                let point = if let Ok(uncompressed) = <[u8; 65]>::try_from(bytes) {
                    Point::from_bytes_uncompressed(uncompressed)
                } else if let Ok(compressed) = <[u8; 33]>::try_from(bytes) {
                    Point::from_bytes(compressed)
                } else {
                    None
                };
                point.map(PublicKey::Ecdsa).ok_or(invalid)
            }
            Scheme::Ed25519 => {
                let bytes = <[u8; 32]>::try_from(bytes).map_err(|_| invalid.clone())?;
                VerifyingKey::from_bytes(&bytes)
                    .map(PublicKey::Ed25519)
                    .map_err(|_| invalid)
            }
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublicKey::Ecdsa(point) => f.write_str(&hex::encode(point.to_bytes())),
            PublicKey::Ed25519(key) => f.write_str(&hex::encode(key.to_bytes())),
        }
    }
}

/// Child key indices selecting a key below a share's root key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DerivationPath(pub Vec<u32>);

impl FromStr for DerivationPath {
    type Err = ParseError;

    /// Accepts a JSON array (`[44,60,0]`) or a bare comma separated list (`44,60,0`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || ParseError::DerivationPath(s.to_string());
        if trimmed.starts_with('[') {
            return serde_json::from_str(trimmed).map_err(|_| invalid());
        }
        if trimmed.is_empty() {
            return Ok(DerivationPath::default());
        }
        trimmed
            .split(',')
            .map(|index| index.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map(DerivationPath)
            .map_err(|_| invalid())
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for index in &self.0 {
            write!(f, "/{}", index)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use secp256kfun::{g, Scalar, G};

    fn ecdsa_key() -> PublicKey {
        let secret = Scalar::random(&mut rand::thread_rng());
        PublicKey::Ecdsa(g!(secret * G).normalize())
    }

    fn ed25519_key() -> PublicKey {
        PublicKey::Ed25519(SigningKey::from_bytes(&[7u8; 32]).verifying_key())
    }

    #[test]
    fn scheme_names_round_trip() {
        for scheme in Scheme::ALL {
            assert_eq!(scheme.as_str().parse::<Scheme>(), Ok(scheme));
        }
        assert_eq!(
            "schnorr".parse::<Scheme>(),
            Err(ParseError::UnknownScheme("schnorr".into()))
        );
        assert_eq!(
            serde_json::to_string(&Scheme::Ed25519).unwrap(),
            "\"ed25519\""
        );
    }

    #[test]
    fn ecdsa_messages_are_keccak_digests() {
        let formatted = Scheme::Ecdsa.format_message("");
        assert_eq!(
            hex::encode(formatted.as_bytes()),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn ed25519_messages_are_raw() {
        assert_eq!(
            Scheme::Ed25519.format_message("hello"),
            SignMessage::Raw(b"hello".to_vec())
        );
    }

    #[test]
    fn canonical_bytes_rebuild_the_same_key() {
        let ecdsa = ecdsa_key();
        let bytes = ecdsa.to_canonical_bytes();
        assert_eq!(bytes.len(), 65);
        assert_eq!(PublicKey::from_canonical_bytes(Scheme::Ecdsa, &bytes), Ok(ecdsa));

        let ed25519 = ed25519_key();
        let bytes = ed25519.to_canonical_bytes();
        assert_eq!(bytes.len(), 32);
        assert_eq!(
            PublicKey::from_canonical_bytes(Scheme::Ed25519, &bytes),
            Ok(ed25519)
        );
    }

    #[test]
    fn compressed_ecdsa_keys_are_accepted() {
        let key = ecdsa_key();
        let PublicKey::Ecdsa(point) = key else {
            unreachable!()
        };
        assert_eq!(
            PublicKey::from_canonical_bytes(Scheme::Ecdsa, &point.to_bytes()),
            Ok(key)
        );
        assert_eq!(key.to_string(), hex::encode(point.to_bytes()));
    }

    #[test]
    fn keys_are_checked_against_their_scheme() {
        let ed25519_bytes = ed25519_key().to_canonical_bytes();
        assert_eq!(
            PublicKey::from_canonical_bytes(Scheme::Ecdsa, &ed25519_bytes),
            Err(InvalidPublicKey {
                scheme: Scheme::Ecdsa,
                len: 32
            })
        );
        assert!(PublicKey::from_canonical_bytes(Scheme::Ed25519, &[1u8; 31]).is_err());
        assert!(PublicKey::from_canonical_bytes(Scheme::Ecdsa, &[0u8; 65]).is_err());
    }

    #[test]
    fn derivation_paths_parse() {
        assert_eq!(
            "[44,60,0,0,0]".parse::<DerivationPath>(),
            Ok(DerivationPath(vec![44, 60, 0, 0, 0]))
        );
        assert_eq!(
            " 1, 2 ".parse::<DerivationPath>(),
            Ok(DerivationPath(vec![1, 2]))
        );
        assert_eq!("[]".parse::<DerivationPath>(), Ok(DerivationPath::default()));
        assert!("[1,-2]".parse::<DerivationPath>().is_err());
        assert!("m/44".parse::<DerivationPath>().is_err());
        assert_eq!(DerivationPath(vec![44, 0]).to_string(), "m/44/0");
    }
}
