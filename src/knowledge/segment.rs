//! 단어 분할 (segmentation)
//!
//! 중국어 조문은 공백이 없으므로 BM25 색인/키워드 가중치 모두
//! 분할기를 거친 토큰을 사용합니다. 분할기는 교체 가능한 트레이트입니다.

use jieba_rs::Jieba;

/// 단어 분할기 트레이트
pub trait Segmenter: Send + Sync {
    /// 텍스트를 토큰 목록으로 분할 (공백 토큰 제외, 순서 유지)
    fn segment(&self, text: &str) -> Vec<String>;
}

/// jieba 기반 분할기 (번체/간체 공용 기본 사전)
pub struct JiebaSegmenter {
    jieba: Jieba,
}

impl JiebaSegmenter {
    pub fn new() -> Self {
        let jieba = Jieba::new();
        tracing::debug!("jieba dictionary loaded");
        Self { jieba }
    }
}

impl Default for JiebaSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Segmenter for JiebaSegmenter {
    fn segment(&self, text: &str) -> Vec<String> {
        self.jieba
            .cut(text, true)
            .into_iter()
            .filter(|t| !t.trim().is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// 공백 분할기
///
/// 이미 띄어쓰기된 텍스트나 테스트용.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceSegmenter;

impl Segmenter for WhitespaceSegmenter {
    fn segment(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }
}
