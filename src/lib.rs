//! legal-rag - 대만 법령 하이브리드 RAG 상담 시스템
//!
//! BM25 키워드 검색 + LanceDB 의미 검색을 가산 점수로 병합해 컨텍스트를
//! 만들고, Gemini로 구조화된 법률 답변을 생성하는 채팅 API입니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod knowledge;
pub mod pipeline;
pub mod scraper;
pub mod server;

// Re-exports
pub use config::{get_api_key, get_data_dir, has_api_key, Config};
pub use embedding::{EmbedTask, EmbeddingProvider, GeminiEmbedding};
pub use error::PipelineError;
pub use generation::{GeminiGeneration, Generation};
pub use knowledge::{
    load_corpus, save_corpus, AnalysisSnapshot, ConversationTurn, FusionConfig, LanceSemanticIndex,
    LawFragment, LexicalIndex, RankFusion, Role, ScoredFragment, SemanticIndex, Session,
    SessionStore, SynonymExpander,
};
pub use pipeline::{
    AnswerSynthesizer, ChatPipeline, ChatReply, ChatRequest, QueryRewriter, ResponsePostProcessor,
    Style,
};
pub use scraper::LawScraper;
