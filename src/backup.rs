//! Client held backups of a key share and how they are revalidated against the server.
//!
//! A backup only means something while the server still holds the matching share. Restoring
//! therefore yields one of three outcomes: no backup at all, a backup the server no longer
//! has a counterpart for ([`Restored::Stale`]), or a usable one ([`Restored::Valid`]).
//! A backup that fails to decode is an error, never one of those outcomes.
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    client::{LivenessProbe, ProbeError},
    scheme::{PublicKey, Scheme},
    signer::{KeygenResult, KeygenResultWire},
};

pub const BACKUP_FILE_NAME: &str = "secret_backup.json";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("malformed backup: {0}")]
    Malformed(String),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error("backup storage failed: {0}")]
    Io(#[from] std::io::Error),
}

/// The client's copy of its share, as written to backup storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPackage {
    pub user_id: String,
    pub scheme: Scheme,
    pub keygen_result: KeygenResult,
    pub derived_pubkey: PublicKey,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupWire {
    user_id: String,
    sig_algo: Scheme,
    keygen_result: KeygenResultWire,
    derived_pubkey: Vec<u8>,
}

impl BackupPackage {
    pub fn new(
        user_id: &str,
        keygen_result: KeygenResult,
        derived_pubkey: PublicKey,
    ) -> Result<Self, BackupError> {
        let scheme = keygen_result.pubkey.scheme();
        if derived_pubkey.scheme() != scheme {
            return Err(BackupError::Malformed(format!(
                "derived key is {} but share is {}",
                derived_pubkey.scheme(),
                scheme
            )));
        }
        Ok(Self {
            user_id: user_id.to_string(),
            scheme,
            keygen_result,
            derived_pubkey,
        })
    }

    /// Encode as JSON with public keys in canonical byte form.
    pub fn encode(&self) -> Result<String, BackupError> {
        let wire = BackupWire {
            user_id: self.user_id.clone(),
            sig_algo: self.scheme,
            keygen_result: self.keygen_result.to_wire(),
            derived_pubkey: self.derived_pubkey.to_canonical_bytes(),
        };
        serde_json::to_string(&wire).map_err(|e| BackupError::Malformed(e.to_string()))
    }

    pub fn decode(raw: &str) -> Result<Self, BackupError> {
        let wire: BackupWire =
            serde_json::from_str(raw).map_err(|e| BackupError::Malformed(e.to_string()))?;
        let keygen_result = KeygenResult::from_wire(wire.sig_algo, wire.keygen_result)
            .map_err(|e| BackupError::Malformed(e.to_string()))?;
        let derived_pubkey = PublicKey::from_canonical_bytes(wire.sig_algo, &wire.derived_pubkey)
            .map_err(|e| BackupError::Malformed(e.to_string()))?;

        Ok(Self {
            user_id: wire.user_id,
            scheme: wire.sig_algo,
            keygen_result,
            derived_pubkey,
        })
    }
}

/// Outcome of [`restore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restored {
    /// No backup stored.
    Absent,
    /// The backup decodes, but the server has no live share for it anymore.
    Stale(BackupPackage),
    Valid(BackupPackage),
}

impl Restored {
    pub fn package(&self) -> Option<&BackupPackage> {
        match self {
            Restored::Absent => None,
            Restored::Stale(package) | Restored::Valid(package) => Some(package),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Restored::Valid(_))
    }
}

#[async_trait]
pub trait BackupSource: Send + Sync {
    /// The most recent raw backup, if any.
    async fn load_latest(&self) -> Result<Option<String>, BackupError>;
}

#[async_trait]
pub trait BackupSink: Send + Sync {
    async fn save(&self, package: &BackupPackage) -> Result<(), BackupError>;
}

/// Load the latest backup and classify it against the server's view of the share.
pub async fn restore<S, P>(source: &S, probe: &P) -> Result<Restored, BackupError>
where
    S: BackupSource + ?Sized,
    P: LivenessProbe + ?Sized,
{
    let raw = match source.load_latest().await? {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(Restored::Absent),
    };
    let package = BackupPackage::decode(&raw)?;

    if probe.is_live(&package.user_id, package.scheme).await? {
        debug!(user_id = %package.user_id, scheme = %package.scheme, "backup is valid");
        Ok(Restored::Valid(package))
    } else {
        warn!(user_id = %package.user_id, scheme = %package.scheme, "backup is stale, server share expired");
        Ok(Restored::Stale(package))
    }
}

/// Keeps the backup as a single file inside `dir`; every save replaces the previous one.
#[derive(Debug, Clone)]
pub struct FileBackupStore {
    dir: PathBuf,
}

impl FileBackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(BACKUP_FILE_NAME)
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!("{}.tmp", BACKUP_FILE_NAME))
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>, BackupError> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl BackupSource for FileBackupStore {
    async fn load_latest(&self) -> Result<Option<String>, BackupError> {
        read_optional(&self.path()).await
    }
}

#[async_trait]
impl BackupSink for FileBackupStore {
    async fn save(&self, package: &BackupPackage) -> Result<(), BackupError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, package.encode()?).await?;
        tokio::fs::rename(&temp, self.path()).await?;
        Ok(())
    }
}
