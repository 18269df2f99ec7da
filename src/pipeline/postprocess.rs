//! 응답 후처리
//!
//! 1. 분석 블록(`---JSON_START--- ... ---JSON_END---`) 분리
//! 2. `law://content/` 인용 링크 페이로드 재인코딩
//! 3. 면책 문구를 끝에 정확히 한 번
//!
//! 세 단계 모두 어떤 입력에도 실패하지 않습니다.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::knowledge::AnalysisSnapshot;

pub(crate) const JSON_START: &str = "---JSON_START---";
pub(crate) const JSON_END: &str = "---JSON_END---";

const CITATION_PREFIX: &str = "law://content/";

/// 모델이 "조문 전문 없음"을 표시할 때 쓰는 페이로드
pub const MISSING_ARTICLE_SENTINEL: &str = "no full article text";

/// 센티널 페이로드를 대체하는 안내 문구
pub const MISSING_ARTICLE_FALLBACK: &str = "資料庫中暫無此條文全文，請至全國法規資料庫查詢。";

/// 모든 답변 끝에 붙는 면책 문구
pub const DISCLAIMER: &str = "本回答僅供參考，不構成正式法律意見；如有具體個案，請諮詢專業律師。";

/// RFC 3986 unreserved 문자만 그대로 둠
const PAYLOAD_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// 후처리 결과
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedResponse {
    pub reply: String,
    pub analysis: AnalysisSnapshot,
}

/// 원문 → (답변, 분석)
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponsePostProcessor;

impl ResponsePostProcessor {
    pub fn process(&self, raw: &str) -> ProcessedResponse {
        let (reply, analysis) = extract_analysis(raw);
        let reply = enforce_disclaimer(&encode_citations(&reply));
        ProcessedResponse { reply, analysis }
    }
}

// ============================================================================
// Analysis Block
// ============================================================================

/// 첫 번째 START/END 쌍을 분리해 분석 스냅샷으로 파싱
///
/// - 쌍이 없으면 원문 전체가 답변, 분석은 기본값
/// - JSON이 깨져 있어도 블록은 답변에서 제거되고 분석은 기본값
pub fn extract_analysis(raw: &str) -> (String, AnalysisSnapshot) {
    let Some(start) = raw.find(JSON_START) else {
        return (raw.trim().to_string(), AnalysisSnapshot::default());
    };
    let inner_start = start + JSON_START.len();
    let Some(end_offset) = raw[inner_start..].find(JSON_END) else {
        return (raw.trim().to_string(), AnalysisSnapshot::default());
    };
    let inner_end = inner_start + end_offset;

    let block = strip_code_fence(&raw[inner_start..inner_end]);
    let analysis = match serde_json::from_str::<AnalysisSnapshot>(block) {
        Ok(analysis) => analysis,
        Err(e) => {
            tracing::warn!("Malformed analysis block: {}", e);
            AnalysisSnapshot::default()
        }
    };

    let before = raw[..start].trim_end();
    let after = raw[inner_end + JSON_END.len()..].trim();
    let reply = if after.is_empty() {
        before.trim().to_string()
    } else {
        format!("{}\n\n{}", before, after).trim().to_string()
    };

    (reply, analysis)
}

/// ```json ... ``` 감싸기 제거
fn strip_code_fence(block: &str) -> &str {
    let mut inner = block.trim();
    if let Some(rest) = inner.strip_prefix("```") {
        inner = rest.strip_prefix("json").unwrap_or(rest);
        inner = inner.strip_suffix("```").unwrap_or(inner);
    }
    inner.trim()
}

// ============================================================================
// Citations
// ============================================================================

/// `[label](law://content/<payload>)` 링크의 페이로드를 정규화
///
/// 페이로드는 디코드 → 센티널 치환 → 개행 제거 → 퍼센트 인코딩 순서로
/// 처리되며, 이미 처리된 텍스트에 다시 적용해도 결과가 같습니다.
/// 페이로드의 여는 괄호가 닫히지 않으면 같은 줄의 마지막 `)`가 링크를
/// 닫는 것으로 보고, `)`가 하나도 없는 링크는 그대로 둡니다.
pub fn encode_citations(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('[') {
        out.push_str(&rest[..open]);
        let candidate = &rest[open..];

        match parse_citation(candidate) {
            Some(citation) => {
                out.push('[');
                out.push_str(citation.label);
                out.push_str("](");
                out.push_str(CITATION_PREFIX);
                out.push_str(&normalize_payload(citation.payload));
                out.push(')');
                rest = &candidate[citation.consumed..];
            }
            None => {
                out.push('[');
                rest = &candidate[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

struct Citation<'a> {
    label: &'a str,
    payload: &'a str,
    consumed: usize,
}

/// `[`로 시작하는 문자열에서 인용 링크 하나를 읽음
fn parse_citation(s: &str) -> Option<Citation<'_>> {
    let close = s[1..].find(']')? + 1;
    let label = &s[1..close];

    let link = s[close + 1..].strip_prefix('(')?;
    let payload_src = link.strip_prefix(CITATION_PREFIX)?;
    let payload_start = s.len() - payload_src.len();

    // 페이로드 안의 괄호는 짝을 맞춰 통과
    let mut depth = 0usize;
    // 짝이 끝내 맞지 않으면 첫 줄의 마지막 ')'에서 끊음
    let mut last_close_on_line = None;
    let mut on_first_line = true;
    for (i, c) in payload_src.char_indices() {
        match c {
            '(' => depth += 1,
            ')' if depth == 0 => {
                return Some(Citation {
                    label,
                    payload: &payload_src[..i],
                    consumed: payload_start + i + 1,
                });
            }
            ')' => {
                depth -= 1;
                if on_first_line {
                    last_close_on_line = Some(i);
                }
            }
            '\n' => on_first_line = false,
            _ => {}
        }
    }

    last_close_on_line.map(|i| Citation {
        label,
        payload: &payload_src[..i],
        consumed: payload_start + i + 1,
    })
}

fn normalize_payload(payload: &str) -> String {
    let decoded = percent_decode_str(payload).decode_utf8_lossy();
    let flattened: String = decoded.chars().filter(|c| *c != '\r' && *c != '\n').collect();

    let text = if flattened.trim() == MISSING_ARTICLE_SENTINEL {
        MISSING_ARTICLE_FALLBACK
    } else {
        flattened.as_str()
    };

    utf8_percent_encode(text, PAYLOAD_SET).to_string()
}

// ============================================================================
// Disclaimer
// ============================================================================

/// 본문 중간의 면책 문구를 제거하고 끝에 인용 블록으로 한 번 붙임
pub fn enforce_disclaimer(text: &str) -> String {
    let mut lines = Vec::new();

    for line in text.lines() {
        if !line.contains(DISCLAIMER) {
            lines.push(line.to_string());
            continue;
        }

        // 제거 후 앞뒤가 이어져 문구가 다시 생길 수 있음
        let mut stripped = line.to_string();
        while stripped.contains(DISCLAIMER) {
            stripped = stripped.replace(DISCLAIMER, "");
        }
        let residue = stripped.trim_matches(|c: char| c == '>' || c.is_whitespace());
        if !residue.is_empty() {
            lines.push(stripped);
        }
    }

    let body = lines.join("\n");
    let body = body.trim_start_matches('\n').trim_end();

    if body.is_empty() {
        format!("> {}", DISCLAIMER)
    } else {
        format!("{}\n\n> {}", body, DISCLAIMER)
    }
}

// ============================================================================
// Tests
// ============================================================================
