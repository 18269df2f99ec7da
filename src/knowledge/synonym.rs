//! 동의어 확장 - 구어체/속칭/오타를 법조문 용어로 보강
//!
//! 사용자가 쓰는 표현("酒測", "闖紅燈")과 조문 원문 표현("酒精濃度 測試")의
//! 차이를 메우기 위해, 쿼리에 포함된 키마다 확장 구문을 덧붙입니다.

use std::path::Path;

use anyhow::{Context, Result};

/// 기본 동의어 테이블 (정의 순서대로 적용)
const DEFAULT_SYNONYMS: &[(&str, &str)] = &[
    ("酒測", "酒精濃度 測試 檢定 拒絕"),
    ("九策", "酒精濃度 測試 檢定 拒絕"),
    ("闖紅燈", "號誌 管制 闖越 交岔路口"),
    ("紅燈", "號誌 管制"),
    ("超速", "行車速度 超過 最高時速"),
    ("無照", "未領有 駕駛執照"),
    ("偷拿", "竊盜 竊取"),
    ("打人", "傷害罪 身體 健康"),
    ("罵人", "公然侮辱 誹謗"),
    ("未禮讓", "暫停 讓 行人 先行"),
    ("安全帽", "未依規定 戴安全帽"),
];

/// 동의어 확장기
///
/// 순서가 있는 (키, 확장 구문) 목록을 보관합니다. 키끼리 겹쳐도
/// ("闖紅燈" / "紅燈") 각각 독립적으로 적용됩니다.
#[derive(Debug, Clone)]
pub struct SynonymExpander {
    entries: Vec<(String, String)>,
}

impl SynonymExpander {
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    /// JSON 파일에서 로드: `[["酒測", "酒精濃度 測試"], ...]`
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read synonym table: {:?}", path))?;
        let entries: Vec<(String, String)> =
            serde_json::from_str(&raw).context("Failed to parse synonym table")?;

        tracing::info!("Loaded {} synonym entries from {:?}", entries.len(), path);
        Ok(Self::new(entries))
    }

    /// 쿼리 확장
    ///
    /// 결과는 항상 원본 쿼리로 시작하므로 입력보다 짧아지지 않습니다.
    pub fn expand(&self, query: &str) -> String {
        let mut expanded = query.to_string();

        for (key, phrase) in &self.entries {
            if !key.is_empty() && query.contains(key.as_str()) {
                expanded.push(' ');
                expanded.push_str(phrase);
            }
        }

        expanded
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SynonymExpander {
    fn default() -> Self {
        Self::new(
            DEFAULT_SYNONYMS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_expand_speeding() {
        let expander = SynonymExpander::default();
        assert_eq!(expander.expand("超速"), "超速 行車速度 超過 最高時速");
    }

    #[test]
    fn test_no_match_is_identity() {
        let expander = SynonymExpander::default();
        assert_eq!(expander.expand("租屋押金"), "租屋押金");
        assert_eq!(expander.expand(""), "");
    }

    #[test]
    fn test_overlapping_keys_fire_in_table_order() {
        let expander = SynonymExpander::default();
        let expanded = expander.expand("闖紅燈罰多少");
        assert_eq!(expanded, "闖紅燈罰多少 號誌 管制 闖越 交岔路口 號誌 管制");
    }

    #[test]
    fn test_output_never_shorter() {
        let expander = SynonymExpander::default();
        for q in ["酒測拒絕", "打人又罵人", "hello", "未禮讓行人"] {
            let out = expander.expand(q);
            assert!(out.starts_with(q));
            assert!(out.len() >= q.len());
        }
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("synonyms.json");
        std::fs::write(&path, r#"[["押金", "擔保金 租賃"]]"#).unwrap();

        let expander = SynonymExpander::from_file(&path).unwrap();
        assert_eq!(expander.len(), 1);
        assert_eq!(expander.expand("押金不還"), "押金不還 擔保金 租賃");
    }
}
