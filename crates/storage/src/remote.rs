//! Draft and attempt persistence against the hosted backend's RPC endpoints.

use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use quiz_core::model::{AttemptId, AttemptSubmission, DraftAnswer, QuizId};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::repository::{AttemptRepository, DraftAnswerRepository, Storage, StorageError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RemoteConfigError {
    #[error("invalid backend URL: {0}")]
    InvalidBaseUrl(String),
}

#[derive(Clone, Debug)]
pub struct RemoteConfig {
    base_url: Url,
    api_key: Option<String>,
}

impl RemoteConfig {
    /// # Errors
    ///
    /// Returns `RemoteConfigError::InvalidBaseUrl` if `base_url` is not an absolute http(s) URL.
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, RemoteConfigError> {
        let mut parsed = Url::parse(base_url.trim())
            .map_err(|_| RemoteConfigError::InvalidBaseUrl(base_url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RemoteConfigError::InvalidBaseUrl(base_url.to_string()));
        }
        // `Url::join` drops the last path segment unless the base ends in '/'.
        if !parsed.path().ends_with('/') {
            let path = format!("{}/", parsed.path());
            parsed.set_path(&path);
        }
        let api_key = api_key.filter(|key| !key.trim().is_empty());
        Ok(Self {
            base_url: parsed,
            api_key,
        })
    }

    /// Reads `QUIZ_API_URL` and `QUIZ_API_KEY`; `None` when no URL is configured.
    ///
    /// # Errors
    ///
    /// Returns `RemoteConfigError` if the configured URL is invalid.
    pub fn from_env() -> Result<Option<Self>, RemoteConfigError> {
        let Ok(base_url) = env::var("QUIZ_API_URL") else {
            return Ok(None);
        };
        if base_url.trim().is_empty() {
            return Ok(None);
        }
        Self::new(&base_url, env::var("QUIZ_API_KEY").ok()).map(Some)
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, function: &str) -> Result<Url, StorageError> {
        self.base_url
            .join(&format!("rpc/{function}"))
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[derive(Clone)]
pub struct RemoteRepository {
    client: Client,
    config: RemoteConfig,
}

impl RemoteRepository {
    #[must_use]
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn post(&self, function: &str) -> Result<RequestBuilder, StorageError> {
        let url = self.config.endpoint(function)?;
        let mut request = self.client.post(url);
        if let Some(key) = &self.config.api_key {
            request = request.header("apikey", key).bearer_auth(key);
        }
        Ok(request)
    }

    async fn call<B: Serialize + ?Sized>(
        &self,
        function: &str,
        body: &B,
    ) -> Result<reqwest::Response, StorageError> {
        let response = self
            .post(function)?
            .json(body)
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound),
            StatusCode::CONFLICT => Err(StorageError::Conflict),
            status => {
                let message = response.text().await.unwrap_or_default();
                tracing::warn!(%status, function, "backend rejected request");
                Err(StorageError::Rejected(format!("{status}: {message}")))
            }
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AttemptRef<'a> {
    quiz_id: &'a QuizId,
    attempt_id: &'a AttemptId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveDraftsRequest<'a> {
    quiz_id: &'a QuizId,
    attempt_id: &'a AttemptId,
    answers: &'a [DraftAnswer],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionRef<'a> {
    attempt_id: &'a AttemptId,
}

#[async_trait]
impl DraftAnswerRepository for RemoteRepository {
    async fn save_draft_answers(
        &self,
        quiz_id: &QuizId,
        attempt_id: &AttemptId,
        answers: &[DraftAnswer],
    ) -> Result<(), StorageError> {
        let body = SaveDraftsRequest {
            quiz_id,
            attempt_id,
            answers,
        };
        self.call("save_draft_answers", &body).await?;
        Ok(())
    }

    async fn load_draft_answers(
        &self,
        quiz_id: &QuizId,
        attempt_id: &AttemptId,
    ) -> Result<Vec<DraftAnswer>, StorageError> {
        let body = AttemptRef {
            quiz_id,
            attempt_id,
        };
        let values: Option<Vec<serde_json::Value>> = self
            .call("load_draft_answers", &body)
            .await?
            .json()
            .await
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        values
            .unwrap_or_default()
            .into_iter()
            .map(|value| {
                DraftAnswer::from_value(value)
                    .map_err(|e| StorageError::Serialization(e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl AttemptRepository for RemoteRepository {
    async fn submit_attempt(&self, submission: &AttemptSubmission) -> Result<(), StorageError> {
        self.call("submit_attempt", submission).await?;
        Ok(())
    }

    async fn get_submission(
        &self,
        attempt_id: &AttemptId,
    ) -> Result<Option<AttemptSubmission>, StorageError> {
        match self
            .call("get_submission", &SubmissionRef { attempt_id })
            .await
        {
            Ok(response) => response
                .json()
                .await
                .map_err(|e| StorageError::Serialization(e.to_string())),
            Err(StorageError::NotFound) => Ok(None),
            Err(other) => Err(other),
        }
    }
}

impl Storage {
    #[must_use]
    pub fn remote(config: RemoteConfig) -> Self {
        let repo = RemoteRepository::new(config);
        let drafts: Arc<dyn DraftAnswerRepository> = Arc::new(repo.clone());
        let attempts: Arc<dyn AttemptRepository> = Arc::new(repo);
        Self { drafts, attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_keeps_base_path() {
        let config = RemoteConfig::new("https://backend.example.com/rest/v1", None).unwrap();
        let url = config.endpoint("save_draft_answers").unwrap();
        assert_eq!(
            url.as_str(),
            "https://backend.example.com/rest/v1/rpc/save_draft_answers"
        );
    }

    #[test]
    fn endpoint_accepts_trailing_slash() {
        let config = RemoteConfig::new("http://localhost:54321/rest/v1/", None).unwrap();
        let url = config.endpoint("submit_attempt").unwrap();
        assert_eq!(url.as_str(), "http://localhost:54321/rest/v1/rpc/submit_attempt");
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(RemoteConfig::new("ftp://example.com", None).is_err());
        assert!(RemoteConfig::new("not a url", None).is_err());
    }

    #[test]
    fn blank_api_key_is_ignored() {
        let config = RemoteConfig::new("https://example.com", Some("  ".into())).unwrap();
        assert!(config.api_key.is_none());
    }

    #[test]
    fn save_request_matches_rpc_shape() {
        let quiz_id = QuizId::new("quiz");
        let attempt_id = AttemptId::new("attempt");
        let answers = vec![DraftAnswer::short_answer(
            quiz_core::model::QuestionId::new("q1"),
            "",
        )];
        let body = SaveDraftsRequest {
            quiz_id: &quiz_id,
            attempt_id: &attempt_id,
            answers: &answers,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["quizId"], "quiz");
        assert_eq!(value["attemptId"], "attempt");
        assert_eq!(value["answers"][0]["type"], "short_answer");
    }
}
