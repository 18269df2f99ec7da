//! Knowledge 모듈 - 법령 조문 검색 + 대화 세션 저장소
//!
//! - Corpus: 조문 JSON 코퍼스 로드/저장
//! - Synonym: 구어 → 법률 용어 확장
//! - Segment: 중국어 단어 분할 (jieba)
//! - Lexical: BM25 키워드 검색
//! - Vector/Lance: 의미 검색 (LanceDB)
//! - Fusion: 두 트랙의 점수 가산 병합
//! - Store: SQLite 세션/메시지 저장소

mod corpus;
mod fusion;
mod lance;
mod lexical;
mod segment;
mod store;
mod synonym;
mod vector;

// Re-exports
pub use corpus::{load_corpus, save_corpus, LawFragment};
pub use fusion::{
    merge_tracks, render_context, FusionConfig, RankFusion, ScoredFragment, EMPTY_CONTEXT,
};
pub use lance::LanceSemanticIndex;
pub use lexical::LexicalIndex;
pub use segment::{JiebaSegmenter, Segmenter, WhitespaceSegmenter};
pub use store::{
    AnalysisSnapshot, ConversationTurn, Role, Session, SessionDetail, SessionStore, TurnRecord,
    DEFAULT_SESSION_TITLE,
};
pub use synonym::SynonymExpander;
pub use vector::{FragmentVector, SemanticHit, SemanticIndex, EMBEDDING_DIMENSION};
