//! 랭크 퓨전 - 렉시컬(BM25) + 시맨틱(LanceDB) 결과 통합
//!
//! 두 트랙의 점수 척도가 달라 직접 비교할 수 없으므로, 각 트랙에
//! 고정 기본 점수를 주고 중복/키워드 보너스를 더하는 휴리스틱 누적 점수를
//! 사용합니다. 점수는 확률이 아니라 우선순위입니다.
//!
//! 1. 동의어 확장
//! 2. 트랙 A (BM25) / 트랙 B (시맨틱) 병렬 실행
//! 3. id 기준 중복 제거 (양쪽 모두 나오면 중복 보너스)
//! 4. 원본 질문 키워드 보너스
//! 5. 점수 내림차순 (동점은 먼저 나온 순서)

use std::collections::HashMap;
use std::sync::Arc;

use super::corpus::LawFragment;
use super::lexical::LexicalIndex;
use super::segment::Segmenter;
use super::synonym::SynonymExpander;
use super::vector::{SemanticHit, SemanticIndex};

/// 검색 결과가 없을 때 모델에 넘기는 컨텍스트
pub const EMPTY_CONTEXT: &str = "目前資料庫中無相關法條。";

// ============================================================================
// Types
// ============================================================================

/// 퓨전 가중치 및 깊이
#[derive(Debug, Clone, PartialEq)]
pub struct FusionConfig {
    /// 트랙 A 조회 개수
    pub lexical_depth: usize,
    /// 트랙 B 조회 개수
    pub semantic_depth: usize,
    /// 트랙 A 기본 점수
    pub lexical_base: f32,
    /// 트랙 B 기본 점수
    pub semantic_base: f32,
    /// 양 트랙 모두 나온 조문 보너스
    pub overlap_bonus: f32,
    /// 원본 질문 토큰이 조문에 그대로 있을 때 토큰당 보너스
    pub keyword_bonus: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            lexical_depth: 50,
            semantic_depth: 50,
            lexical_base: 0.8,
            semantic_base: 0.7,
            overlap_bonus: 0.5,
            keyword_bonus: 0.3,
        }
    }
}

/// 점수가 매겨진 조문 (쿼리마다 생성)
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredFragment {
    pub id: String,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Origin {
    Lexical,
    Semantic,
    Both,
}

// ============================================================================
// RankFusion
// ============================================================================

/// 하이브리드 검색기
pub struct RankFusion {
    expander: Arc<SynonymExpander>,
    segmenter: Arc<dyn Segmenter>,
    lexical: Arc<LexicalIndex>,
    semantic: Arc<dyn SemanticIndex>,
    config: FusionConfig,
}

impl RankFusion {
    pub fn new(
        expander: Arc<SynonymExpander>,
        segmenter: Arc<dyn Segmenter>,
        lexical: Arc<LexicalIndex>,
        semantic: Arc<dyn SemanticIndex>,
        config: FusionConfig,
    ) -> Self {
        Self {
            expander,
            segmenter,
            lexical,
            semantic,
            config,
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// 하이브리드 검색
    ///
    /// # Arguments
    /// * `query` - 검색용 쿼리 (보통 재작성된 질문)
    /// * `raw_query` - 사용자 원본 질문 (키워드 보너스용)
    /// * `k` - 최대 결과 수
    pub async fn fuse(&self, query: &str, raw_query: &str, k: usize) -> Vec<ScoredFragment> {
        let expanded = self.expander.expand(query);
        tracing::debug!("Expanded query: {}", expanded);

        let (lexical, semantic) = tokio::join!(
            self.lexical_track(&expanded),
            self.semantic_track(&expanded)
        );

        let keywords = self.segmenter.segment(raw_query);
        let mut fused = merge_tracks(lexical, semantic, &keywords, &self.config);
        fused.truncate(k);

        tracing::debug!(
            "Fused top ids: {:?}",
            fused.iter().take(3).map(|f| f.id.as_str()).collect::<Vec<_>>()
        );
        fused
    }

    /// 검색 후 모델용 컨텍스트 블록 생성
    pub async fn fuse_context(&self, query: &str, raw_query: &str, k: usize) -> String {
        render_context(&self.fuse(query, raw_query, k).await)
    }

    /// 트랙 A: BM25 (CPU 작업이므로 blocking 풀에서 실행)
    async fn lexical_track(&self, expanded: &str) -> Vec<LawFragment> {
        if self.lexical.is_empty() {
            return vec![];
        }

        let index = Arc::clone(&self.lexical);
        let segmenter = Arc::clone(&self.segmenter);
        let expanded = expanded.to_string();
        let depth = self.config.lexical_depth;

        match tokio::task::spawn_blocking(move || {
            let tokens = segmenter.segment(&expanded);
            index.top_n(&tokens, depth)
        })
        .await
        {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!("Lexical track failed: {}", e);
                vec![]
            }
        }
    }

    /// 트랙 B: 시맨틱 (실패 시 빈 결과로 진행)
    async fn semantic_track(&self, expanded: &str) -> Vec<SemanticHit> {
        match self
            .semantic
            .query(expanded, self.config.semantic_depth)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!("Semantic track unavailable, continuing lexical-only: {:#}", e);
                vec![]
            }
        }
    }
}

// ============================================================================
// Merge
// ============================================================================

/// 두 트랙 결과를 누적 점수로 통합
///
/// 결과 id는 항상 유일하며, 점수 내림차순 / 동점은 최초 등장 순서입니다.
pub fn merge_tracks(
    lexical: Vec<LawFragment>,
    semantic: Vec<SemanticHit>,
    keywords: &[String],
    config: &FusionConfig,
) -> Vec<ScoredFragment> {
    let mut entries: Vec<(ScoredFragment, Origin)> =
        Vec::with_capacity(lexical.len() + semantic.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for fragment in lexical {
        if positions.contains_key(&fragment.id) {
            continue;
        }
        positions.insert(fragment.id.clone(), entries.len());
        entries.push((
            ScoredFragment {
                id: fragment.id,
                text: fragment.text,
                score: config.lexical_base,
            },
            Origin::Lexical,
        ));
    }

    for hit in semantic {
        match positions.get(&hit.id) {
            Some(&pos) => {
                let (entry, origin) = &mut entries[pos];
                if *origin == Origin::Lexical {
                    entry.score += config.overlap_bonus;
                    *origin = Origin::Both;
                }
            }
            None => {
                positions.insert(hit.id.clone(), entries.len());
                entries.push((
                    ScoredFragment {
                        id: hit.id,
                        text: hit.text,
                        score: config.semantic_base,
                    },
                    Origin::Semantic,
                ));
            }
        }
    }

    let mut fused: Vec<ScoredFragment> = entries.into_iter().map(|(entry, _)| entry).collect();

    // 키워드 보너스: 한 글자 토큰은 제외
    for entry in &mut fused {
        for keyword in keywords {
            if keyword.chars().count() > 1 && entry.text.contains(keyword.as_str()) {
                entry.score += config.keyword_bonus;
            }
        }
    }

    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused
}

/// 조문 텍스트를 빈 줄로 이어 붙인 컨텍스트 (없으면 안내 문구)
pub fn render_context(fragments: &[ScoredFragment]) -> String {
    if fragments.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }

    fragments
        .iter()
        .map(|f| f.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ============================================================================
// Tests
// ============================================================================
