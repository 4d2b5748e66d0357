//! Client for the node API

use mosaic_core::{Address, BlockHeight, Hash, Position, VoteSignature};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// API Client for interacting with a Mosaic node
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::builder().timeout(Duration::from_secs(30)).build()?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let resp: ApiResponse<T> = self.client.get(self.url(path)).send().await?.json().await?;
        resp.into_result()
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let resp: ApiResponse<T> = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await?
            .json()
            .await?;
        resp.into_result()
    }

    /// Get node status
    pub async fn status(&self) -> Result<NodeStatus, ClientError> {
        self.get("/status").await
    }

    pub async fn validator(&self, address: &Address) -> Result<ValidatorInfo, ClientError> {
        self.get(&format!("/validators/{}", address.to_hex())).await
    }

    pub async fn vote_count(&self, proposal: &Hash) -> Result<VoteCountInfo, ClientError> {
        self.get(&format!("/proposals/{}", proposal.to_hex())).await
    }

    /// Submit a signed vote
    pub async fn vote(
        &self,
        proposal: &Hash,
        signature: &VoteSignature,
    ) -> Result<VoteReceiptInfo, ClientError> {
        let body = SignedRequest {
            public_key: signature.public_key.to_hex(),
            signature: signature.signature.to_hex(),
            proposal: Some(proposal.to_hex()),
            ..Default::default()
        };
        self.post("/votes", &body).await
    }

    pub async fn committee(&self, proposal: &Hash) -> Result<CommitteeInfo, ClientError> {
        self.get(&format!("/committees/{}", proposal.to_hex())).await
    }

    /// Member a validator must be seated in front of
    pub async fn hint(
        &self,
        proposal: &Hash,
        validator: &Address,
    ) -> Result<Option<String>, ClientError> {
        let path = format!(
            "/committees/{}/hint/{}",
            proposal.to_hex(),
            validator.to_hex()
        );
        let resp: ApiResponse<Option<String>> =
            self.client.get(self.url(&path)).send().await?.json().await?;
        resp.into_optional()
    }

    pub async fn cooldown(
        &self,
        proposal: &Hash,
        signature: &VoteSignature,
    ) -> Result<BlockHeight, ClientError> {
        self.post(
            &format!("/committees/{}/cooldown", proposal.to_hex()),
            &SignedRequest::of(signature),
        )
        .await
    }

    pub async fn activate(
        &self,
        proposal: &Hash,
        signature: &VoteSignature,
    ) -> Result<BlockHeight, ClientError> {
        self.post(
            &format!("/committees/{}/activate", proposal.to_hex()),
            &SignedRequest::of(signature),
        )
        .await
    }

    pub async fn commit(
        &self,
        proposal: &Hash,
        sealed: &Hash,
        signature: &VoteSignature,
    ) -> Result<CommitteeInfo, ClientError> {
        let body = SignedRequest {
            sealed: Some(sealed.to_hex()),
            ..SignedRequest::of(signature)
        };
        self.post(&format!("/committees/{}/commits", proposal.to_hex()), &body)
            .await
    }

    pub async fn reveal(
        &self,
        proposal: &Hash,
        position: &Position,
        salt: &Hash,
        signature: &VoteSignature,
    ) -> Result<u64, ClientError> {
        let body = SignedRequest {
            position: Some(position.to_hex()),
            salt: Some(salt.to_hex()),
            ..SignedRequest::of(signature)
        };
        self.post(&format!("/committees/{}/reveals", proposal.to_hex()), &body)
            .await
    }
}

/// API response wrapper
#[derive(Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<T, ClientError> {
        if self.success {
            self.data.ok_or(ClientError::EmptyResponse)
        } else {
            Err(ClientError::Server(self.error.unwrap_or_default()))
        }
    }
}

impl<T> ApiResponse<Option<T>> {
    /// `null` data is a valid answer
    fn into_optional(self) -> Result<Option<T>, ClientError> {
        if self.success {
            Ok(self.data.flatten())
        } else {
            Err(ClientError::Server(self.error.unwrap_or_default()))
        }
    }
}

/// Body of a request authorized by a validator signature
#[derive(Debug, Default, Serialize)]
struct SignedRequest {
    public_key: String,
    signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    proposal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sealed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    salt: Option<String>,
}

impl SignedRequest {
    fn of(signature: &VoteSignature) -> Self {
        Self {
            public_key: signature.public_key.to_hex(),
            signature: signature.signature.to_hex(),
            ..Default::default()
        }
    }
}

/// Node status
#[derive(Debug, Deserialize)]
pub struct NodeStatus {
    pub name: String,
    pub orchestrator: String,
    pub block_height: u64,
    pub core: CoreInfo,
    pub committees: usize,
}

#[derive(Debug, Deserialize)]
pub struct CoreInfo {
    pub core_id: String,
    pub status: String,
    pub open_kernel_height: u64,
    pub open_kernel_hash: String,
    pub quorum: u64,
    pub validator_count: u64,
    pub precommit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ValidatorRecordInfo {
    pub address: String,
    pub begin_height: u64,
    pub end_height: u64,
}

#[derive(Debug, Deserialize)]
pub struct ValidatorInfo {
    pub record: ValidatorRecordInfo,
    pub is_validator: bool,
    pub reputation: u64,
    pub vote: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VoteCountInfo {
    pub height: u64,
    pub dynasty: u64,
    pub count: u64,
}

#[derive(Debug, Deserialize)]
pub struct VoteReceiptInfo {
    pub validator: String,
    pub count: u64,
    pub precommitted: bool,
}

#[derive(Debug, Deserialize)]
pub struct CommitteeInfo {
    pub proposal: String,
    pub status: String,
    pub quorum: u64,
    pub members: Vec<String>,
    pub activation_block_height: u64,
    pub commit_timeout_block_height: u64,
    pub reveal_timeout_block_height: u64,
    pub sealed_commits: usize,
    pub revealed_positions: u64,
    pub decision: Option<String>,
}

/// Client Error
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Empty response")]
    EmptyResponse,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::{PublicKey, Signature};

    #[test]
    fn test_response_unwrapping() {
        let ok: ApiResponse<u64> =
            serde_json::from_str(r#"{"success":true,"data":7,"error":null}"#).unwrap();
        assert_eq!(ok.into_result().unwrap(), 7);

        let failed: ApiResponse<u64> =
            serde_json::from_str(r#"{"success":false,"data":null,"error":"halted"}"#).unwrap();
        assert!(matches!(failed.into_result(), Err(ClientError::Server(e)) if e == "halted"));

        let none: ApiResponse<Option<String>> =
            serde_json::from_str(r#"{"success":true,"data":null,"error":null}"#).unwrap();
        assert_eq!(none.into_optional().unwrap(), None);
    }

    #[test]
    fn test_signed_request_body() {
        let signature = VoteSignature {
            public_key: PublicKey([1u8; 32]),
            signature: Signature([2u8; 64]),
        };
        let body = SignedRequest {
            sealed: Some(Hash([3u8; 32]).to_hex()),
            ..SignedRequest::of(&signature)
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["public_key"], hex::encode([1u8; 32]));
        assert_eq!(json["sealed"], hex::encode([3u8; 32]));
        assert!(json.get("salt").is_none());
    }
}
