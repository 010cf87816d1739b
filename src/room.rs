//! Allocation of signer rooms, one per protocol run.
use tracing::debug;

use crate::{
    error::Error,
    scheme::Scheme,
    signer::{RoomId, Signers},
};

/// Allocates a fresh signer room for every protocol run.
///
/// Rooms are never reused, and who may join one is up to the signer.
#[derive(Debug, Clone)]
pub struct RoomCoordinator {
    signers: Signers,
    party_count: u16,
    api_key: String,
}

impl RoomCoordinator {
    pub fn new(signers: Signers, party_count: u16, api_key: &str) -> Self {
        Self {
            signers,
            party_count,
            api_key: api_key.to_string(),
        }
    }

    pub async fn create_room(&self, scheme: Scheme) -> Result<RoomId, Error> {
        let room_id = self
            .signers
            .get(scheme)
            .create_room(self.party_count, &self.api_key)
            .await?;
        debug!(%scheme, %room_id, parties = self.party_count, "room created");
        Ok(room_id)
    }
}
