//! Client for the hosted backend: row upserts/deletes for queued mutations
//! and the three serverless functions. Kept behind a trait so the sync engine
//! and tests never touch the network directly.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::model::{EntityType, MutationOp, PendingMutation};
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/")]
pub struct SuggestionRequest {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/")]
pub struct SuggestionResponse {
    pub suggestions: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/")]
pub struct InvitationRequest {
    pub email: String,
    pub clinic_id: String,
    pub invited_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/")]
pub struct ReminderRequest {
    pub clinic_id: String,
    /// Sessions scheduled before this horizon get a reminder.
    #[ts(type = "number")]
    pub horizon_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/")]
pub struct ReminderReport {
    #[ts(type = "number")]
    pub sent: i64,
}

#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Apply one queued mutation. Create/update are an upsert of the payload,
    /// delete removes the row by id. Any failure is opaque to the caller; the
    /// engine does not classify errors.
    async fn apply_mutation(&self, mutation: &PendingMutation) -> AppResult<()>;

    async fn generate_session_suggestions(
        &self,
        request: &SuggestionRequest,
    ) -> AppResult<SuggestionResponse>;

    async fn send_secretary_invitation(&self, request: &InvitationRequest) -> AppResult<()>;

    async fn send_session_reminders(&self, request: &ReminderRequest) -> AppResult<ReminderReport>;
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub token: String,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn from_env() -> AppResult<Self> {
        let base_url = std::env::var("CLINICA_REMOTE_URL").map_err(|_| {
            AppError::new("REMOTE/CONFIG", "CLINICA_REMOTE_URL is not set")
        })?;
        let token = std::env::var("CLINICA_REMOTE_TOKEN").map_err(|_| {
            AppError::new("REMOTE/CONFIG", "CLINICA_REMOTE_TOKEN is not set")
        })?;
        Ok(Self::new(base_url, token))
    }
}

pub struct HttpRemoteBackend {
    client: reqwest::Client,
    config: RemoteConfig,
}

impl HttpRemoteBackend {
    /// No request timeout: a hung call blocks its queue item, which is the
    /// documented baseline behavior.
    pub fn new(config: RemoteConfig) -> AppResult<Self> {
        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {}", config.token);
        let mut auth = HeaderValue::from_str(&bearer).map_err(|_| {
            AppError::new("REMOTE/CONFIG", "Remote token is not a valid header value")
        })?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(AppError::from)?;
        Ok(Self { client, config })
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url, table)
    }

    fn function_url(&self, name: &str) -> String {
        format!("{}/functions/v1/{}", self.config.base_url, name)
    }

    fn table_for(entity: EntityType) -> &'static str {
        match entity {
            EntityType::Patient => "patients",
            EntityType::Session => "sessions",
        }
    }

    /// Cheap reachability probe. `sync run` checks it before draining the
    /// queue so an offline invocation fails fast instead of erroring every
    /// item.
    pub async fn ping(&self) -> bool {
        self.client
            .get(format!("{}/rest/v1/", self.config.base_url))
            .send()
            .await
            .is_ok()
    }
}

#[async_trait]
impl RemoteBackend for HttpRemoteBackend {
    async fn apply_mutation(&self, mutation: &PendingMutation) -> AppResult<()> {
        let table = Self::table_for(mutation.entity_type);
        let response = match mutation.op {
            // Upsert: last write wins on the remote, by design.
            MutationOp::Create | MutationOp::Update => {
                let payload = mutation.payload_json()?;
                self.client
                    .post(self.rest_url(table))
                    .header("Prefer", "resolution=merge-duplicates")
                    .query(&[("on_conflict", "id")])
                    .json(&payload)
                    .send()
                    .await
            }
            MutationOp::Delete => {
                self.client
                    .delete(self.rest_url(table))
                    .query(&[("id", format!("eq.{}", mutation.entity_id))])
                    .send()
                    .await
            }
        }
        .map_err(AppError::from)?;

        response
            .error_for_status()
            .map_err(AppError::from)
            .map_err(|err| {
                err.with_context("mutation_id", mutation.id.clone())
                    .with_context("table", table)
            })?;
        Ok(())
    }

    async fn generate_session_suggestions(
        &self,
        request: &SuggestionRequest,
    ) -> AppResult<SuggestionResponse> {
        let response = self
            .client
            .post(self.function_url("generate-session-suggestions"))
            .json(request)
            .send()
            .await
            .map_err(AppError::from)?
            .error_for_status()
            .map_err(AppError::from)?;
        response
            .json::<SuggestionResponse>()
            .await
            .map_err(AppError::from)
    }

    async fn send_secretary_invitation(&self, request: &InvitationRequest) -> AppResult<()> {
        self.client
            .post(self.function_url("send-secretary-invitation"))
            .json(request)
            .send()
            .await
            .map_err(AppError::from)?
            .error_for_status()
            .map_err(AppError::from)?;
        Ok(())
    }

    async fn send_session_reminders(&self, request: &ReminderRequest) -> AppResult<ReminderReport> {
        let response = self
            .client
            .post(self.function_url("send-session-reminders"))
            .json(request)
            .send()
            .await
            .map_err(AppError::from)?
            .error_for_status()
            .map_err(AppError::from)?;
        response
            .json::<ReminderReport>()
            .await
            .map_err(AppError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_trims_trailing_slash() {
        let config = RemoteConfig::new("https://example.test/", "secret");
        assert_eq!(config.base_url, "https://example.test");
        assert_eq!(config.token, "secret");
    }

    #[test]
    fn urls_are_composed_from_base() {
        let backend =
            HttpRemoteBackend::new(RemoteConfig::new("https://example.test", "t")).unwrap();
        assert_eq!(backend.rest_url("patients"), "https://example.test/rest/v1/patients");
        assert_eq!(
            backend.function_url("send-session-reminders"),
            "https://example.test/functions/v1/send-session-reminders"
        );
    }
}
