//! 설정 - 환경변수 + 기본값
//!
//! | 환경변수 | 기본값 |
//! |---|---|
//! | `GEMINI_API_KEY` / `GOOGLE_API_KEY` | (필수: 생성/임베딩) |
//! | `LEGAL_RAG_DATA_DIR` | `<local data dir>/.legal-rag` |
//! | `LEGAL_RAG_CORPUS` | `<data dir>/laws.json` |
//! | `LEGAL_RAG_BIND` | `127.0.0.1:8000` |
//! | `LEGAL_RAG_CHAT_MODEL` | `gemini-2.0-flash` |
//! | `LEGAL_RAG_EMBED_MODEL` | `text-embedding-004` |
//! | `LEGAL_RAG_CONTEXT_K` | `15` |
//! | `LEGAL_RAG_GENERATION_TIMEOUT_SECS` | `60` |
//! | `LEGAL_RAG_SYNONYMS` | (내장 테이블) |
//! | `LEGAL_RAG_STYLES` | (내장 스타일) |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;

use crate::knowledge::FusionConfig;

/// 채팅 컨텍스트 조문 수 기본값
pub const DEFAULT_CHAT_CONTEXT_K: usize = 15;
/// 단발성 질의(CLI) 컨텍스트 조문 수 기본값
pub const DEFAULT_ASK_CONTEXT_K: usize = 30;
/// 프롬프트에 넣는 최근 대화 턴 수
pub const HISTORY_WINDOW: usize = 10;

/// 데이터 디렉토리 경로 (~/.legal-rag/)
pub fn get_data_dir() -> PathBuf {
    if let Some(dir) = non_empty_env("LEGAL_RAG_DATA_DIR") {
        return PathBuf::from(dir);
    }

    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".legal-rag")
}

/// 런타임 설정
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub corpus_path: PathBuf,
    pub bind: String,
    pub chat_model: String,
    pub embed_model: String,
    pub context_k: usize,
    pub generation_timeout: Duration,
    pub synonyms_path: Option<PathBuf>,
    pub styles_path: Option<PathBuf>,
    pub fusion: FusionConfig,
}

impl Config {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Self {
        let data_dir = get_data_dir();
        let corpus_path = non_empty_env("LEGAL_RAG_CORPUS")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("laws.json"));

        Self {
            corpus_path,
            bind: non_empty_env("LEGAL_RAG_BIND").unwrap_or_else(|| "127.0.0.1:8000".to_string()),
            chat_model: non_empty_env("LEGAL_RAG_CHAT_MODEL")
                .unwrap_or_else(|| "gemini-2.0-flash".to_string()),
            embed_model: non_empty_env("LEGAL_RAG_EMBED_MODEL")
                .unwrap_or_else(|| "text-embedding-004".to_string()),
            context_k: parse_env("LEGAL_RAG_CONTEXT_K").unwrap_or(DEFAULT_CHAT_CONTEXT_K),
            generation_timeout: Duration::from_secs(
                parse_env("LEGAL_RAG_GENERATION_TIMEOUT_SECS").unwrap_or(60),
            ),
            synonyms_path: non_empty_env("LEGAL_RAG_SYNONYMS").map(PathBuf::from),
            styles_path: non_empty_env("LEGAL_RAG_STYLES").map(PathBuf::from),
            fusion: FusionConfig::default(),
            data_dir,
        }
    }

    pub fn sessions_db_path(&self) -> PathBuf {
        self.data_dir.join("sessions.db")
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.data_dir.join("vectors.lance")
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드
///
/// 우선순위:
/// 1. `GEMINI_API_KEY`
/// 2. `GOOGLE_API_KEY`
pub fn get_api_key() -> Result<String> {
    for var in ["GEMINI_API_KEY", "GOOGLE_API_KEY"] {
        if let Some(key) = non_empty_env(var) {
            tracing::debug!("Using API key from {}", var);
            return Ok(key);
        }
    }

    anyhow::bail!(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
    )
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    get_api_key().is_ok()
}

// ============================================================================
// Helper Functions
// ============================================================================

fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(var: &str) -> Option<T> {
    let raw = non_empty_env(var)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {}: {}", var, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_env();
        assert!(config.context_k > 0);
        assert_eq!(config.sessions_db_path(), config.data_dir.join("sessions.db"));
        assert_eq!(config.fusion, FusionConfig::default());
    }

    #[test]
    fn test_parse_env_rejects_garbage() {
        std::env::set_var("LEGAL_RAG_TEST_NUMBER", "abc");
        assert_eq!(parse_env::<usize>("LEGAL_RAG_TEST_NUMBER"), None);

        std::env::set_var("LEGAL_RAG_TEST_NUMBER", " 42 ");
        assert_eq!(parse_env::<usize>("LEGAL_RAG_TEST_NUMBER"), Some(42));
        std::env::remove_var("LEGAL_RAG_TEST_NUMBER");
    }
}
