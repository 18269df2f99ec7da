//! 법령 코퍼스 - laws.json 로드/저장
//!
//! 코퍼스는 프로세스 시작 시 한 번 로드되며 이후 읽기 전용입니다.
//! 조문 하나가 하나의 검색 단위(fragment)입니다.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// 법령 조문 단위
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LawFragment {
    /// 안정 식별자 (예: `K0040012_第40條`)
    pub id: String,
    /// 조문 전문 (법령명 + 조번호 + 본문)
    pub text: String,
    /// 법령명
    #[serde(default = "unknown_category")]
    pub category: String,
}

fn unknown_category() -> String {
    "unknown".to_string()
}

impl LawFragment {
    pub fn new(id: impl Into<String>, text: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            category: category.into(),
        }
    }
}

// ============================================================================
// Load / Save
// ============================================================================

/// 코퍼스 로드
///
/// 파일이 없으면 경고만 남기고 빈 코퍼스를 반환합니다.
/// (렉시컬 트랙은 자동으로 건너뜀)
pub fn load_corpus(path: &Path) -> Result<Vec<LawFragment>> {
    if !path.exists() {
        tracing::warn!("Corpus not found at {:?}; lexical track disabled", path);
        return Ok(vec![]);
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus: {:?}", path))?;

    let fragments: Vec<LawFragment> =
        serde_json::from_str(&raw).context("Failed to parse corpus JSON")?;

    tracing::info!("Loaded {} law fragments from {:?}", fragments.len(), path);
    Ok(fragments)
}

/// 코퍼스 저장 (pretty JSON, 한자 그대로 유지)
pub fn save_corpus(path: &Path, fragments: &[LawFragment]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).context("Failed to create corpus directory")?;
        }
    }

    let json = serde_json::to_string_pretty(fragments).context("Failed to serialize corpus")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write corpus: {:?}", path))?;

    tracing::info!("Saved {} law fragments to {:?}", fragments.len(), path);
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
