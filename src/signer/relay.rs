//! [`MpcSigner`] backed by a signer relay reached over HTTP.
//!
//! Each operation is a JSON `POST` to `<base_url>/<scheme>/<operation>` carrying the API
//! key in the `Authorization` header. Room creation uses the key it is given, every other
//! operation the key the relay was built with.
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use super::{
    InitMaterial, KeygenResult, KeygenResultWire, MpcSigner, ParticipantId, RoomId, Signature,
    SignerError,
};
use crate::scheme::{DerivationPath, PublicKey, Scheme, SignMessage};

#[derive(Debug, Clone)]
pub struct RelaySigner {
    client: reqwest::Client,
    base_url: String,
    scheme: Scheme,
    api_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomRequest {
    party_count: u16,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomResponse {
    room_id: RoomId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeygenRequest<'a> {
    room_id: &'a RoomId,
    parties: u16,
    threshold: u16,
    init: &'a InitMaterial,
    peers: &'a [ParticipantId],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeriveRequest<'a> {
    share: KeygenResultWire,
    path: &'a DerivationPath,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeriveResponse {
    pubkey: Vec<u8>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest<'a> {
    room_id: &'a RoomId,
    share: KeygenResultWire,
    message: &'a SignMessage,
    path: &'a DerivationPath,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignResponse {
    signature: Signature,
}

impl RelaySigner {
    pub fn new(client: reqwest::Client, base_url: &str, scheme: Scheme, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            scheme,
            api_key: api_key.to_string(),
        }
    }

    pub fn endpoint(&self, operation: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.scheme, operation)
    }

    async fn call<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        operation: &str,
        body: &B,
    ) -> Result<R, SignerError> {
        self.call_as(operation, body, &self.api_key).await
    }

    async fn call_as<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        operation: &str,
        body: &B,
        api_key: &str,
    ) -> Result<R, SignerError> {
        let url = self.endpoint(operation);
        debug!(%url, "calling signer relay");
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| SignerError::Unreachable(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SignerError::Rejected(format!(
                "{} returned {}: {}",
                operation, status, detail
            )));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| SignerError::Protocol(format!("bad {} response: {}", operation, e)))
    }
}

#[async_trait]
impl MpcSigner for RelaySigner {
    async fn create_room(&self, party_count: u16, api_key: &str) -> Result<RoomId, SignerError> {
        let response: CreateRoomResponse = self
            .call_as("create-room", &CreateRoomRequest { party_count }, api_key)
            .await?;
        Ok(response.room_id)
    }

    async fn init_keygen(&self) -> Result<InitMaterial, SignerError> {
        self.call("init-keygen", &serde_json::json!({})).await
    }

    async fn keygen(
        &self,
        room: &RoomId,
        parties: u16,
        threshold: u16,
        init: &InitMaterial,
        peers: &[ParticipantId],
    ) -> Result<KeygenResult, SignerError> {
        let wire: KeygenResultWire = self
            .call(
                "keygen",
                &KeygenRequest {
                    room_id: room,
                    parties,
                    threshold,
                    init,
                    peers,
                },
            )
            .await?;
        KeygenResult::from_wire(self.scheme, wire).map_err(|e| SignerError::Protocol(e.to_string()))
    }

    async fn derive_pubkey(
        &self,
        share: &KeygenResult,
        path: &DerivationPath,
    ) -> Result<PublicKey, SignerError> {
        let response: DeriveResponse = self
            .call(
                "derive-pubkey",
                &DeriveRequest {
                    share: share.to_wire(),
                    path,
                },
            )
            .await?;
        PublicKey::from_canonical_bytes(self.scheme, &response.pubkey)
            .map_err(|e| SignerError::Protocol(e.to_string()))
    }

    async fn sign(
        &self,
        room: &RoomId,
        share: &KeygenResult,
        message: &SignMessage,
        path: &DerivationPath,
    ) -> Result<Signature, SignerError> {
        let response: SignResponse = self
            .call(
                "sign",
                &SignRequest {
                    room_id: room,
                    share: share.to_wire(),
                    message,
                    path,
                },
            )
            .await?;
        Ok(response.signature)
    }
}
