//! Semantic Index - 시맨틱 검색 트레이트 및 타입
//!
//! 파이프라인은 `query(text, k)` 계약만 사용합니다.
//! 구현체: [`super::lance::LanceSemanticIndex`]

use anyhow::Result;
use async_trait::async_trait;

/// 벡터 임베딩 차원 (Gemini text-embedding-004)
/// source: https://ai.google.dev/gemini-api/docs/embeddings
pub const EMBEDDING_DIMENSION: i32 = 768;

// ============================================================================
// Types
// ============================================================================

/// 벡터 엔트리 (저장용)
#[derive(Debug, Clone)]
pub struct FragmentVector {
    /// 조문 ID (LawFragment.id)
    pub fragment_id: String,
    /// 조문 텍스트
    pub text: String,
    /// 법령명
    pub category: String,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
}

/// 시맨틱 검색 결과 (가까운 순)
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticHit {
    pub id: String,
    pub text: String,
}

// ============================================================================
// SemanticIndex Trait
// ============================================================================

/// 시맨틱 인덱스 트레이트 (async)
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// 텍스트와 가까운 상위 k개 조문
    async fn query(&self, text: &str, k: usize) -> Result<Vec<SemanticHit>>;
}
