//! 채팅 턴 오케스트레이션
//!
//! 한 턴의 흐름:
//! 세션 잠금 → 최근 10턴 로드 → 질의 재작성 → 랭크 퓨전 → 답변 생성(타임아웃)
//! → 후처리 → 한 트랜잭션으로 커밋
//!
//! 같은 세션의 턴은 세션별 비동기 잠금으로 직렬화됩니다. 커밋 전에
//! 실패하거나 퓨처가 버려지면 저장소에는 아무것도 쓰이지 않습니다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::config::HISTORY_WINDOW;
use crate::error::PipelineError;
use crate::knowledge::{AnalysisSnapshot, ConversationTurn, RankFusion, SessionStore, TurnRecord};

use super::postprocess::{ProcessedResponse, ResponsePostProcessor};
use super::rewrite::QueryRewriter;
use super::synthesize::{AnswerSynthesizer, Style};

/// 채팅으로 생성되는 세션 제목 길이 (문자 수)
const TITLE_CHARS: usize = 20;

// ============================================================================
// Request / Reply
// ============================================================================

/// `POST /chat` 요청 본문
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub client_id: String,
}

/// `POST /chat` 응답 본문
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub session_id: String,
    pub analysis: Option<AnalysisSnapshot>,
}

// ============================================================================
// SessionLocks
// ============================================================================

/// 세션별 비동기 잠금 테이블
#[derive(Default)]
pub struct SessionLocks {
    inner: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 세션 잠금 획득 (같은 세션의 이전 턴이 끝날 때까지 대기)
    pub async fn acquire(&self, session_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            // 아무도 잡고 있지 않은 항목 정리
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(session_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// 현재 추적 중인 세션 수
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// ChatPipeline
// ============================================================================

/// 채팅 파이프라인
pub struct ChatPipeline {
    fusion: Arc<RankFusion>,
    rewriter: QueryRewriter,
    synthesizer: AnswerSynthesizer,
    postprocessor: ResponsePostProcessor,
    store: SessionStore,
    locks: SessionLocks,
    context_k: usize,
    generation_timeout: Duration,
}

impl ChatPipeline {
    /// # Arguments
    /// * `context_k` - 답변 컨텍스트에 넣을 조문 수
    /// * `generation_timeout` - 모델 호출 하나당 제한 시간
    pub fn new(
        fusion: Arc<RankFusion>,
        rewriter: QueryRewriter,
        synthesizer: AnswerSynthesizer,
        store: SessionStore,
        context_k: usize,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            fusion,
            rewriter,
            synthesizer,
            postprocessor: ResponsePostProcessor,
            store,
            locks: SessionLocks::new(),
            context_k,
            generation_timeout,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// 채팅 한 턴 처리
    ///
    /// 어떤 실패든 사과 문구와 `analysis: None`으로 응답하며, 그 경우
    /// 해당 턴은 저장되지 않습니다.
    pub async fn chat(&self, request: ChatRequest) -> ChatReply {
        let session_id = resolve_session_id(request.session_id.as_deref());
        let style = Style::parse_or_default(request.style.as_deref());

        match self.run_turn(&request, session_id, style).await {
            Ok(processed) => ChatReply {
                reply: processed.reply,
                session_id: session_id.to_string(),
                analysis: Some(processed.analysis),
            },
            Err(e) => {
                tracing::error!("Chat turn failed for session {}: {}", session_id, e);
                ChatReply {
                    reply: e.apology().to_string(),
                    session_id: session_id.to_string(),
                    analysis: None,
                }
            }
        }
    }

    async fn run_turn(
        &self,
        request: &ChatRequest,
        session_id: Uuid,
        style: Style,
    ) -> Result<ProcessedResponse, PipelineError> {
        let _guard = self.locks.acquire(session_id).await;

        let history = self
            .store
            .recent_turns(&session_id, HISTORY_WINDOW)
            .map_err(PipelineError::StoreUnavailable)?;

        let processed = self
            .answer(&request.message, &history, style, self.context_k)
            .await?;

        let title: String = request.message.chars().take(TITLE_CHARS).collect();
        self.store
            .commit_turn(&TurnRecord {
                session_id,
                client_id: &request.client_id,
                title: &title,
                user: &request.message,
                assistant: &processed.reply,
                analysis: &processed.analysis,
            })
            .map_err(PipelineError::StoreUnavailable)?;

        tracing::info!(
            "Chat turn committed: session={}, domain={}, risk={}",
            session_id,
            processed.analysis.domain,
            processed.analysis.risk_level
        );
        Ok(processed)
    }

    /// 세션 없이 질문 하나에 답변 (저장하지 않음)
    pub async fn ask(
        &self,
        question: &str,
        style: Style,
        context_k: usize,
    ) -> Result<ProcessedResponse, PipelineError> {
        self.answer(question, &[], style, context_k).await
    }

    async fn answer(
        &self,
        question: &str,
        history: &[ConversationTurn],
        style: Style,
        context_k: usize,
    ) -> Result<ProcessedResponse, PipelineError> {
        let rewritten = match tokio::time::timeout(
            self.generation_timeout,
            self.rewriter.rewrite(question, history),
        )
        .await
        {
            Ok(rewritten) => rewritten,
            Err(_) => {
                tracing::warn!("Query rewrite timed out; using raw question");
                question.to_string()
            }
        };

        let context = self
            .fusion
            .fuse_context(&rewritten, question, context_k)
            .await;

        let raw = tokio::time::timeout(
            self.generation_timeout,
            self.synthesizer
                .synthesize(question, &rewritten, &context, history, style),
        )
        .await
        .map_err(|_| PipelineError::GenerationTimeout(self.generation_timeout))?
        .map_err(PipelineError::UpstreamUnavailable)?;

        Ok(self.postprocessor.process(&raw))
    }
}

/// 요청의 session_id 해석 (없거나 잘못된 값이면 새 세션)
fn resolve_session_id(raw: Option<&str>) -> Uuid {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => match Uuid::parse_str(s) {
            Ok(id) => id,
            Err(_) => {
                tracing::warn!("Ignoring malformed session id: {}", s);
                Uuid::new_v4()
            }
        },
        None => Uuid::new_v4(),
    }
}

// ============================================================================
// Tests
// ============================================================================
