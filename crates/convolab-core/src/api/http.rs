//! HTTP lab client.
//!
//! Bearer-token JSON over reqwest. Non-2xx responses become
//! [`ApiError::Status`] carrying the response body verbatim. No retries here;
//! the only timeout is the client's per-request timeout.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::error::{ApiError, ApiResult};
use crate::api::{
    AgentParticipantRequest, CohortRequest, ConversationApi, ExperimentRequest,
    ExportedConversations, ProvisioningApi,
};
use crate::config::ApiConfig;
use crate::domain::error::{ConvolabError, Result};

#[derive(Debug, Deserialize)]
struct IdBody {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ExperimentEnvelope {
    experiment: IdBody,
}

#[derive(Debug, Deserialize)]
struct CohortEnvelope {
    cohort: IdBody,
}

#[derive(Debug, Deserialize)]
struct ParticipantEnvelope {
    participant: IdBody,
}

#[derive(Debug, Deserialize)]
struct ExportEnvelope {
    #[serde(default)]
    conversations: ExportedConversations,
}

/// reqwest-backed implementation of [`ProvisioningApi`] and [`ConversationApi`].
#[derive(Debug, Clone)]
pub struct HttpLabClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl HttpLabClient {
    /// Build a client. Fails with a setup error when credentials are missing.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConvolabError::setup(format!("failed to create HTTP client: {e}")))?;

        Ok(HttpLabClient {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().unwrap_or_default(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> ApiResult<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        debug!(path = %path, "POST");
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &str) -> ApiResult<R> {
        debug!(path = %path, "GET");
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> ApiResult<R> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ProvisioningApi for HttpLabClient {
    async fn create_experiment(&self, request: &ExperimentRequest) -> ApiResult<String> {
        let envelope: ExperimentEnvelope = self.post_json("/experiments", request).await?;
        Ok(envelope.experiment.id)
    }

    async fn create_cohort(&self, experiment_id: &str, request: &CohortRequest) -> ApiResult<String> {
        let path = format!("/experiments/{experiment_id}/cohorts");
        let envelope: CohortEnvelope = self.post_json(&path, request).await?;
        Ok(envelope.cohort.id)
    }

    async fn add_agent_participant(
        &self,
        experiment_id: &str,
        cohort_id: &str,
        request: &AgentParticipantRequest,
    ) -> ApiResult<String> {
        let path = format!("/experiments/{experiment_id}/cohorts/{cohort_id}/participants");
        let envelope: ParticipantEnvelope = self.post_json(&path, request).await?;
        Ok(envelope.participant.id)
    }
}

#[async_trait]
impl ConversationApi for HttpLabClient {
    async fn export_conversations(&self, experiment_id: &str) -> ApiResult<ExportedConversations> {
        let path = format!("/experiments/{experiment_id}/export");
        let envelope: ExportEnvelope = self.get_json(&path).await?;
        Ok(envelope.conversations)
    }
}
