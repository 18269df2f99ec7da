//! 렉시컬 인덱스 - 분할 토큰 기반 BM25 순위
//!
//! 시작 시 전체 코퍼스로 한 번 구축되며 이후 읽기 전용입니다.
//! ref: https://en.wikipedia.org/wiki/Okapi_BM25

use std::collections::HashMap;

use super::corpus::LawFragment;
use super::segment::Segmenter;

/// BM25 term frequency 포화 계수
const K1: f64 = 1.5;
/// BM25 문서 길이 정규화 계수
const B: f64 = 0.75;

/// 색인된 문서 (토큰 빈도 + 길이)
#[derive(Debug)]
struct IndexedDoc {
    term_freqs: HashMap<String, u32>,
    len: usize,
}

/// BM25 렉시컬 인덱스
#[derive(Debug)]
pub struct LexicalIndex {
    fragments: Vec<LawFragment>,
    docs: Vec<IndexedDoc>,
    /// term -> 포함 문서 수
    doc_freqs: HashMap<String, usize>,
    avg_len: f64,
}

impl LexicalIndex {
    /// 코퍼스 전체로 인덱스 구축
    pub fn build(fragments: Vec<LawFragment>, segmenter: &dyn Segmenter) -> Self {
        let mut docs = Vec::with_capacity(fragments.len());
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();
        let mut total_len = 0usize;

        for fragment in &fragments {
            let tokens = segmenter.segment(&fragment.text);
            let mut term_freqs: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *term_freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in term_freqs.keys() {
                *doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }

            total_len += tokens.len();
            docs.push(IndexedDoc {
                term_freqs,
                len: tokens.len(),
            });
        }

        let avg_len = if docs.is_empty() {
            0.0
        } else {
            total_len as f64 / docs.len() as f64
        };

        tracing::info!(
            "Lexical index built: {} fragments, {} distinct terms",
            fragments.len(),
            doc_freqs.len()
        );

        Self {
            fragments,
            docs,
            doc_freqs,
            avg_len,
        }
    }

    /// 색인된 조문 수
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// 상위 n개 조문
    ///
    /// 점수가 0인 조문(쿼리 토큰이 하나도 없는 조문)은 제외합니다.
    /// 동점은 코퍼스 순서를 따릅니다.
    pub fn top_n(&self, tokens: &[String], n: usize) -> Vec<LawFragment> {
        if self.is_empty() || tokens.is_empty() || n == 0 {
            return vec![];
        }

        let mut scored: Vec<(usize, f64)> = (0..self.docs.len())
            .map(|i| (i, self.score(i, tokens)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        // sort_by는 stable - 동점이면 코퍼스 순서 유지
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(n);

        scored
            .into_iter()
            .map(|(i, _)| self.fragments[i].clone())
            .collect()
    }

    /// 문서 하나의 BM25 점수
    fn score(&self, doc_index: usize, tokens: &[String]) -> f64 {
        let doc = &self.docs[doc_index];
        let len_norm = if self.avg_len > 0.0 {
            doc.len as f64 / self.avg_len
        } else {
            0.0
        };

        tokens
            .iter()
            .map(|token| {
                let tf = doc.term_freqs.get(token).copied().unwrap_or(0) as f64;
                if tf == 0.0 {
                    return 0.0;
                }
                let idf = self.idf(token);
                idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * len_norm))
            })
            .sum()
    }

    /// 음수가 되지 않는 IDF (Lucene 방식)
    fn idf(&self, term: &str) -> f64 {
        let n = self.docs.len() as f64;
        let df = self.doc_freqs.get(term).copied().unwrap_or(0) as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::segment::WhitespaceSegmenter;

    fn tokens(s: &str) -> Vec<String> {
        WhitespaceSegmenter.segment(s)
    }

    fn corpus() -> Vec<LawFragment> {
        vec![
            LawFragment::new("traffic_40", "道路交通 第40條 行車速度 超過 最高時速 罰鍰", "道路交通管理處罰條例"),
            LawFragment::new("traffic_35", "道路交通 第35條 酒精濃度 測試 檢定 拒絕", "道路交通管理處罰條例"),
            LawFragment::new("criminal_320", "刑法 第320條 竊盜 竊取 他人 動產", "中華民國刑法"),
        ]
    }

    #[test]
    fn test_empty_corpus() {
        let index = LexicalIndex::build(vec![], &WhitespaceSegmenter);
        assert!(index.is_empty());
        assert!(index.top_n(&tokens("超速"), 50).is_empty());
    }

    #[test]
    fn test_ranks_matching_fragment_first() {
        let index = LexicalIndex::build(corpus(), &WhitespaceSegmenter);
        let results = index.top_n(&tokens("行車速度 超過 最高時速"), 50);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "traffic_40");
    }

    #[test]
    fn test_non_matching_fragments_excluded() {
        let index = LexicalIndex::build(corpus(), &WhitespaceSegmenter);
        assert!(index.top_n(&tokens("租賃 押金"), 50).is_empty());
    }

    #[test]
    fn test_ties_follow_corpus_order() {
        let index = LexicalIndex::build(corpus(), &WhitespaceSegmenter);
        let results = index.top_n(&tokens("道路交通"), 50);

        let ids: Vec<&str> = results.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["traffic_40", "traffic_35"]);
    }

    #[test]
    fn test_truncates_to_n() {
        let index = LexicalIndex::build(corpus(), &WhitespaceSegmenter);
        let results = index.top_n(&tokens("道路交通 刑法"), 2);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_single_document_scores_positive() {
        let index = LexicalIndex::build(
            vec![LawFragment::new("A", "超速 罰鍰 1800", "x")],
            &WhitespaceSegmenter,
        );
        let results = index.top_n(&tokens("超速"), 50);
        assert_eq!(results.len(), 1);
    }
}
