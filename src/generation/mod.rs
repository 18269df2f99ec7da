//! 생성 모듈 - Gemini generateContent 호출
//!
//! 파이프라인 입장에서는 `complete(prompt) -> text` 하나뿐인 불투명한 기능입니다.
//! 질의 재작성과 답변 생성이 같은 트레이트를 사용합니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// Generation Trait
// ============================================================================

/// 텍스트 생성 트레이트
#[async_trait]
pub trait Generation: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

// ============================================================================
// Gemini
// ============================================================================

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Gemini 텍스트 생성 구현체
#[derive(Debug, Clone)]
pub struct GeminiGeneration {
    api_key: String,
    model: String,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl GeminiGeneration {
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `model` - 모델 이름 (예: `gemini-2.0-flash`)
    pub fn new(api_key: String, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            model: model.into(),
            temperature: None,
            client,
        })
    }

    /// 샘플링 온도 지정 (답변 생성은 약간 창의적으로 0.7)
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn url(&self) -> String {
        format!("{}/{}:generateContent", GEMINI_API_BASE, self.model)
    }

    fn request_for(&self, prompt: &str) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: self.temperature.map(|temperature| GenerationConfig { temperature }),
        }
    }
}

#[async_trait]
impl Generation for GeminiGeneration {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_for(prompt))
            .send()
            .await
            .context("Failed to send generateContent request")?;

        let status = response.status();
        let body = response.text().await.context("Failed to read response body")?;

        if !status.is_success() {
            anyhow::bail!("Gemini API error ({}): {}", status, body);
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&body).context("Failed to parse generateContent response")?;

        extract_text(parsed).ok_or_else(|| anyhow::anyhow!("Gemini returned no text candidates"))
    }
}

/// 첫 후보의 텍스트 파트를 모두 이어 붙임
fn extract_text(response: GenerateResponse) -> Option<String> {
    let candidate = response.candidates.into_iter().next()?;
    let text: String = candidate
        .content?
        .parts
        .into_iter()
        .filter_map(|p| p.text)
        .collect();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    text: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
