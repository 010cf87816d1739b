//! The synchronous half of every endpoint: validate, allocate a room, hand off to the
//! dispatcher, and answer with what the client needs to join the run.
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    client::{LivenessProbe, ProbeError},
    dispatcher::{Dispatcher, Job},
    error::Error,
    room::RoomCoordinator,
    scheme::{DerivationPath, Scheme},
    signer::{ParticipantId, RoomId, Signers},
    store::{init_key, share_key, SessionStore},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeygenHandshake {
    pub room_id: RoomId,
    /// The server's protocol participant id, the client names it as its keygen peer.
    pub keygen_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignHandshake {
    pub room_id: RoomId,
}

#[derive(Debug, Clone)]
pub struct SessionService {
    store: SessionStore,
    rooms: RoomCoordinator,
    signers: Signers,
    dispatcher: Arc<Dispatcher>,
}

impl SessionService {
    pub fn new(
        store: SessionStore,
        rooms: RoomCoordinator,
        signers: Signers,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            store,
            rooms,
            signers,
            dispatcher,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Start a keygen run with the client identified by `client_participant_id`.
    ///
    /// Returns once the room exists and the server's init material is stored; the rounds
    /// themselves run detached and overwrite any share the user already had.
    pub async fn start_keygen(
        &self,
        user_id: &str,
        scheme: Scheme,
        client_participant_id: &str,
    ) -> Result<KeygenHandshake, Error> {
        require("userId", user_id)?;
        require("client participant id", client_participant_id)?;

        let slot = self.dispatcher.reserve()?;
        let room_id = self.rooms.create_room(scheme).await?;
        let init = self.signers.get(scheme).init_keygen().await?;
        let keygen_id = init.keygen_id.clone();
        self.store.put_init(init_key(user_id, scheme, &room_id), init);

        slot.send(Job::Keygen {
            user_id: user_id.to_string(),
            scheme,
            room_id: room_id.clone(),
            client_participant_id: ParticipantId::from(client_participant_id),
        });

        info!(user_id, %scheme, %room_id, "keygen started");
        Ok(KeygenHandshake { room_id, keygen_id })
    }

    /// Start a signing run over `message`. Fails before allocating a room when the user
    /// has no live share or the run queue is full.
    pub async fn start_sign(
        &self,
        user_id: &str,
        scheme: Scheme,
        message: &str,
        path: DerivationPath,
    ) -> Result<SignHandshake, Error> {
        self.check_exists(user_id, scheme)?;

        let slot = self.dispatcher.reserve()?;
        let room_id = self.rooms.create_room(scheme).await?;
        slot.send(Job::Sign {
            user_id: user_id.to_string(),
            scheme,
            room_id: room_id.clone(),
            message: message.to_string(),
            path,
        });

        info!(user_id, %scheme, %room_id, "signing started");
        Ok(SignHandshake { room_id })
    }

    /// Whether the server still holds a usable share. A successful check renews its TTL.
    pub fn check_exists(&self, user_id: &str, scheme: Scheme) -> Result<(), Error> {
        match self.store.get_share(user_id, scheme) {
            Some(_) => Ok(()),
            None => Err(Error::ShareUnavailable(share_key(user_id, scheme))),
        }
    }
}

fn require(what: &str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::InvalidRequest(format!("{} must not be empty", what)));
    }
    Ok(())
}

#[async_trait]
impl LivenessProbe for SessionService {
    async fn is_live(&self, user_id: &str, scheme: Scheme) -> Result<bool, ProbeError> {
        Ok(self.check_exists(user_id, scheme).is_ok())
    }
}
