//! 임베딩 모듈 - Gemini API를 통한 텍스트 벡터화
//!
//! 시맨틱 인덱스(LanceDB)의 색인/질의 양쪽에서 사용합니다.
//! 질의와 문서는 서로 다른 task type으로 임베딩합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = GeminiEmbedding::new(api_key, "text-embedding-004")?;
//! let vector = embedder.embed("拒絕酒測", EmbedTask::RetrievalQuery).await?;
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::knowledge::EMBEDDING_DIMENSION;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 용도
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedTask {
    /// 검색 질의
    RetrievalQuery,
    /// 색인 대상 문서
    RetrievalDocument,
}

impl EmbedTask {
    fn as_api_str(self) -> &'static str {
        match self {
            EmbedTask::RetrievalQuery => "RETRIEVAL_QUERY",
            EmbedTask::RetrievalDocument => "RETRIEVAL_DOCUMENT",
        }
    }

    /// 호출 정책
    ///
    /// 질의 임베딩은 채팅 턴 안에서 실행되므로 간격 조절과 재시도 없이
    /// 한 번만 시도합니다. 실패하면 퓨전이 어휘 트랙만으로 진행합니다.
    fn call_policy(self) -> CallPolicy {
        match self {
            EmbedTask::RetrievalQuery => CallPolicy {
                paced: false,
                max_retries: 0,
            },
            EmbedTask::RetrievalDocument => CallPolicy {
                paced: true,
                max_retries: MAX_RETRIES,
            },
        }
    }
}

/// 색인/질의별 API 호출 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CallPolicy {
    /// 프로세스 전역 최소 간격 적용 여부
    paced: bool,
    /// 429 재시도 횟수
    max_retries: u32,
}

/// 임베딩 프로바이더 트레이트
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str, task: EmbedTask) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String], task: EmbedTask) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text, task).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;
}

// ============================================================================
// Google Gemini Embedding
// ============================================================================

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// 호출 간 최소 간격 (무료 티어 보호)
const MIN_INTERVAL: Duration = Duration::from_millis(1000);
/// 429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

/// Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    model: String,
    client: reqwest::Client,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl GeminiEmbedding {
    /// 새 Gemini 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `model` - 임베딩 모델 (예: `text-embedding-004`)
    pub fn new(api_key: String, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            model: model.into(),
            client,
            last_request: Arc::new(Mutex::new(None)),
        })
    }

    fn model_path(&self) -> String {
        format!("models/{}", self.model)
    }

    /// 최소 호출 간격 유지
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < MIN_INTERVAL {
                let wait_time = MIN_INTERVAL - elapsed;
                tracing::debug!("Embedding pacing: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn request_for(&self, text: &str, task: EmbedTask) -> EmbedRequest {
        EmbedRequest {
            model: self.model_path(),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type: task.as_api_str().to_string(),
        }
    }

    /// POST + 429 재시도, 성공 시 응답 본문 반환
    async fn post_with_retry<T: Serialize + Sync>(
        &self,
        method: &str,
        body: &T,
        policy: CallPolicy,
    ) -> Result<String> {
        let url = format!("{}/{}:{}", GEMINI_API_BASE, self.model, method);

        for attempt in 0..=policy.max_retries {
            if policy.paced {
                self.pace().await;
            }

            let response = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(body)
                .send()
                .await
                .context("Failed to send embedding request")?;

            let status = response.status();
            let text = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                return Ok(text);
            }

            if status.as_u16() == 429 && attempt < policy.max_retries {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                tracing::warn!(
                    "Embedding rate limited (429), backing off {:?} (attempt {}/{})",
                    backoff,
                    attempt + 1,
                    policy.max_retries
                );
                tokio::time::sleep(backoff).await;
                continue;
            }

            if let Ok(error) = serde_json::from_str::<GeminiError>(&text) {
                anyhow::bail!(
                    "Gemini API error ({}): {}",
                    error.error.status,
                    error.error.message
                );
            }
            anyhow::bail!("Gemini API error ({}): {}", status, text);
        }

        anyhow::bail!("Embedding failed after {} retries", policy.max_retries)
    }
}

/// Gemini API 요청 본문
/// source: https://ai.google.dev/gemini-api/docs/embeddings
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: String,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str, task: EmbedTask) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension()]);
        }

        let request = self.request_for(text, task);
        let body = self
            .post_with_retry("embedContent", &request, task.call_policy())
            .await?;

        let response: EmbedResponse =
            serde_json::from_str(&body).context("Failed to parse embedding response")?;
        Ok(response.embedding.values)
    }

    async fn embed_batch(&self, texts: &[String], task: EmbedTask) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let request = BatchEmbedRequest {
            requests: texts.iter().map(|t| self.request_for(t, task)).collect(),
        };
        let body = self
            .post_with_retry("batchEmbedContents", &request, task.call_policy())
            .await?;

        let response: BatchEmbedResponse =
            serde_json::from_str(&body).context("Failed to parse batch embedding response")?;

        if response.embeddings.len() != texts.len() {
            anyhow::bail!(
                "Batch embedding size mismatch: sent {}, got {}",
                texts.len(),
                response.embeddings.len()
            );
        }

        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION as usize
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_strings() {
        assert_eq!(EmbedTask::RetrievalQuery.as_api_str(), "RETRIEVAL_QUERY");
        assert_eq!(EmbedTask::RetrievalDocument.as_api_str(), "RETRIEVAL_DOCUMENT");
    }

    #[test]
    fn test_query_embedding_is_single_unpaced_attempt() {
        let query = EmbedTask::RetrievalQuery.call_policy();
        assert!(!query.paced);
        assert_eq!(query.max_retries, 0);

        let document = EmbedTask::RetrievalDocument.call_policy();
        assert!(document.paced);
        assert_eq!(document.max_retries, MAX_RETRIES);
    }

    #[test]
    fn test_request_shape() {
        let embedder = GeminiEmbedding::new("fake_key".to_string(), "text-embedding-004").unwrap();
        let request = embedder.request_for("酒測", EmbedTask::RetrievalDocument);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "models/text-embedding-004");
        assert_eq!(json["taskType"], "RETRIEVAL_DOCUMENT");
        assert_eq!(json["content"]["parts"][0]["text"], "酒測");
    }

    #[tokio::test]
    async fn test_blank_text_skips_api() {
        let embedder = GeminiEmbedding::new("fake_key".to_string(), "text-embedding-004").unwrap();
        let vector = embedder.embed("   ", EmbedTask::RetrievalQuery).await.unwrap();
        assert_eq!(vector.len(), EMBEDDING_DIMENSION as usize);
        assert!(vector.iter().all(|v| *v == 0.0));
    }
}
