#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use clinica_lib::model::PendingMutation;
use clinica_lib::remote::{
    InvitationRequest, ReminderReport, ReminderRequest, RemoteBackend, SuggestionRequest,
    SuggestionResponse,
};
use clinica_lib::{migrate, AppError, AppResult};

pub async fn memory_pool() -> SqlitePool {
    // Match the production pool: references are advisory (src/db.rs).
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("parse url")
        .foreign_keys(false);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("connect in-memory");
    migrate::apply_migrations(&pool).await.expect("migrate");
    pool
}

/// In-process stand-in for the hosted backend. Records every applied entity
/// id and fails deterministically for ids listed in `fail_ids`.
pub struct MockRemote {
    fail_ids: Mutex<HashSet<String>>,
    applied: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            fail_ids: Mutex::new(HashSet::new()),
            applied: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn failing<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let remote = Self::new();
        {
            let mut guard = remote.fail_ids.lock().unwrap();
            guard.extend(ids.into_iter().map(Into::into));
        }
        remote
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn clear_failures(&self) {
        self.fail_ids.lock().unwrap().clear();
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteBackend for MockRemote {
    async fn apply_mutation(&self, mutation: &PendingMutation) -> AppResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_ids.lock().unwrap().contains(&mutation.entity_id) {
            return Err(AppError::new("REMOTE/HTTP", "simulated remote failure")
                .with_context("entity_id", mutation.entity_id.clone()));
        }
        self.applied.lock().unwrap().push(mutation.entity_id.clone());
        Ok(())
    }

    async fn generate_session_suggestions(
        &self,
        _request: &SuggestionRequest,
    ) -> AppResult<SuggestionResponse> {
        Ok(SuggestionResponse {
            suggestions: "Focus on breathing exercises.".into(),
        })
    }

    async fn send_secretary_invitation(&self, _request: &InvitationRequest) -> AppResult<()> {
        Ok(())
    }

    async fn send_session_reminders(
        &self,
        _request: &ReminderRequest,
    ) -> AppResult<ReminderReport> {
        Ok(ReminderReport { sent: 0 })
    }
}
