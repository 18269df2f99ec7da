//! 답변 생성 - 스타일별 구조화 프롬프트
//!
//! 모델이 출력 형식을 지켰는지는 검증하지 않습니다 (후처리 단계 담당).

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::generation::Generation;
use crate::knowledge::ConversationTurn;

use super::format_history;
use super::postprocess::{JSON_END, JSON_START, MISSING_ARTICLE_SENTINEL};

// ============================================================================
// Style
// ============================================================================

/// 답변 스타일
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    General,
    Professional,
    Humorous,
}

impl Style {
    pub const ALL: [Style; 3] = [Style::General, Style::Professional, Style::Humorous];

    pub fn as_str(&self) -> &'static str {
        match self {
            Style::General => "general",
            Style::Professional => "professional",
            Style::Humorous => "humorous",
        }
    }

    /// 알 수 없는 값이나 누락은 `General`
    pub fn parse_or_default(value: Option<&str>) -> Style {
        value.and_then(|v| v.parse().ok()).unwrap_or_default()
    }
}

impl FromStr for Style {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(Style::General),
            "professional" => Ok(Style::Professional),
            "humorous" => Ok(Style::Humorous),
            other => anyhow::bail!("Unknown style: {}", other),
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 스타일 하나의 지시문 묶음
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleProfile {
    /// 어조
    pub tone: String,
    /// 사례(상황극) 지시
    pub case_example: String,
    /// 실무 조언 지시
    pub advice: String,
}

impl StyleProfile {
    fn new(tone: &str, case_example: &str, advice: &str) -> Self {
        Self {
            tone: tone.to_string(),
            case_example: case_example.to_string(),
            advice: advice.to_string(),
        }
    }
}

/// 스타일 → 지시문 매핑 (설정 데이터)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StyleBook {
    general: StyleProfile,
    professional: StyleProfile,
    humorous: StyleProfile,
}

impl StyleBook {
    /// JSON 파일에서 로드: `{"general": {"tone": ..., "case_example": ..., "advice": ...}}`
    ///
    /// 파일에 없는 스타일은 내장 기본값을 유지합니다.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read style book: {:?}", path))?;
        let book: StyleBook = serde_json::from_str(&raw).context("Failed to parse style book")?;

        tracing::info!("Loaded style book from {:?}", path);
        Ok(book)
    }

    pub fn profile(&self, style: Style) -> &StyleProfile {
        match style {
            Style::General => &self.general,
            Style::Professional => &self.professional,
            Style::Humorous => &self.humorous,
        }
    }
}

impl Default for StyleBook {
    fn default() -> Self {
        Self {
            general: StyleProfile::new(
                "語氣親切、白話，像一位耐心的朋友，把艱澀的條文翻譯成一般人聽得懂的話。",
                "請創造一個簡短的生活案例（例如：「假設小明今天...」），說明這種情況下會發生什麼事。",
                "用一般民眾做得到的步驟給建議，例如該保留哪些證據、可以向哪個機關申訴或求助。",
            ),
            professional: StyleProfile::new(
                "語氣正式、精確，使用法律專業用語，論述須有條理，如同律師撰寫的法律意見書。",
                "請以實務判決常見的事實型態舉例，說明構成要件如何涵攝到具體事實。",
                "從訴訟與非訟策略角度給建議，包含時效、舉證責任與可能的法律風險。",
            ),
            humorous: StyleProfile::new(
                "幽默風趣、說話直白，但專業度滿分。請用「簡單來說」開頭，並使用一個生活比喻（例如把「侵權」比喻成「弄壞別人的玩具」）讓使用者會心一笑。",
                "請寫一個小劇場（例如：「假設張三今天...」），讓使用者更有帶入感。",
                "建議要實用又好記，可以帶點俏皮，但不能偏離法律正確性。",
            ),
        }
    }
}

// ============================================================================
// AnswerSynthesizer
// ============================================================================

/// 답변 생성기
pub struct AnswerSynthesizer {
    generation: Arc<dyn Generation>,
    styles: Arc<StyleBook>,
}

impl AnswerSynthesizer {
    pub fn new(generation: Arc<dyn Generation>, styles: Arc<StyleBook>) -> Self {
        Self { generation, styles }
    }

    /// 답변 생성 프롬프트
    pub fn build_prompt(
        &self,
        question: &str,
        rewritten: &str,
        context: &str,
        history: &[ConversationTurn],
        style: Style,
    ) -> String {
        let profile = self.styles.profile(style);

        format!(
            r#"你是一位台灣法律 AI 顧問，只回答與台灣法律相關的問題；與法律無關的問題請婉拒並引導回法律主題。

【語氣】
{tone}

【相關法規資料庫】
{context}

【對話紀錄】
{history}

【使用者問題】
{question}

【檢索用關鍵詞】
{rewritten}

【回答規則（請嚴格遵守 Markdown 格式）】
1. 結論先行：第一段直接給出答案（金額、刑期、責任），並用 **粗體** 標示重點。
2. 情境模擬：{case_example}
3. 詳細分析：說明適用的法條、構成要件與例外情形；若有罰則細項（如機車/汽車）請條列清楚。
4. 實用建議：以編號清單列出。{advice}
5. 引用法條：每一條引用都必須寫成 [法條名稱與條號](law://content/<該條文在資料庫中的完整原文>)，原文需逐字照抄；若資料庫中沒有該條全文，請寫成 [法條名稱與條號](law://content/{sentinel})。
6. 最後另起一段，輸出分析區塊，格式如下（JSON 必須合法）：
{json_start}
{{"domain": "法律領域", "risk_level": "low|medium|high", "keywords": ["關鍵詞1", "關鍵詞2"]}}
{json_end}
"#,
            tone = profile.tone,
            context = context,
            history = format_history(history),
            question = question,
            rewritten = rewritten,
            case_example = profile.case_example,
            advice = profile.advice,
            sentinel = MISSING_ARTICLE_SENTINEL,
            json_start = JSON_START,
            json_end = JSON_END,
        )
    }

    /// 모델 원문 생성
    pub async fn synthesize(
        &self,
        question: &str,
        rewritten: &str,
        context: &str,
        history: &[ConversationTurn],
        style: Style,
    ) -> Result<String> {
        let prompt = self.build_prompt(question, rewritten, context, history, style);
        tracing::debug!("Synthesis prompt: {} chars, style={}", prompt.chars().count(), style);

        self.generation
            .complete(&prompt)
            .await
            .context("Answer generation failed")
    }
}

// ============================================================================
// Tests
// ============================================================================
