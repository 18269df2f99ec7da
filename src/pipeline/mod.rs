//! 채팅 파이프라인
//!
//! 질문 → 재작성 → 랭크 퓨전 → 답변 생성 → 후처리 → 세션 저장
//!
//! - `rewrite`: 모델 기반 검색 문자열 재작성 (실패 시 원문)
//! - `synthesize`: 스타일별 프롬프트로 답변 생성
//! - `postprocess`: JSON 분석 블록 추출, 인용 링크 재인코딩, 면책 문구
//! - `chat`: 턴 단위 오케스트레이션 + 세션별 직렬화

mod chat;
mod postprocess;
mod rewrite;
mod synthesize;

pub use chat::{ChatPipeline, ChatReply, ChatRequest, SessionLocks};
pub use postprocess::{
    encode_citations, enforce_disclaimer, extract_analysis, ProcessedResponse,
    ResponsePostProcessor, DISCLAIMER, MISSING_ARTICLE_FALLBACK, MISSING_ARTICLE_SENTINEL,
};
pub use rewrite::QueryRewriter;
pub use synthesize::{AnswerSynthesizer, Style, StyleBook, StyleProfile};

use crate::config::HISTORY_WINDOW;
use crate::knowledge::{ConversationTurn, Role};

/// 최근 대화 턴을 역할 라벨과 함께 나열
pub(crate) fn format_history(history: &[ConversationTurn]) -> String {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    let recent = &history[start..];

    if recent.is_empty() {
        return "(無)".to_string();
    }

    recent
        .iter()
        .map(|turn| {
            let label = match turn.role {
                Role::User => "使用者",
                Role::Assistant => "法律顧問",
            };
            format!("{}: {}", label, turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
