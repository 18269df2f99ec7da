//! 질의 재작성 - 오타 교정 + 주어 보충으로 검색 문자열 생성
//!
//! 최선 노력(best-effort) 최적화입니다. 모델 호출이 실패하면 원래 질문을
//! 그대로 검색에 사용합니다.

use std::sync::Arc;

use crate::generation::Generation;
use crate::knowledge::ConversationTurn;

use super::format_history;

/// 질의 재작성기
pub struct QueryRewriter {
    generation: Arc<dyn Generation>,
}

impl QueryRewriter {
    pub fn new(generation: Arc<dyn Generation>) -> Self {
        Self { generation }
    }

    /// 재작성 프롬프트
    pub fn build_prompt(question: &str, history: &[ConversationTurn]) -> String {
        let history_block = format_history(history);

        format!(
            "請根據對話紀錄，將使用者最新的問題改寫為精準的法律搜尋字串。\n\
             1. 修正錯字 (如: 拒絕九策 -> 拒絕酒測)。\n\
             2. 補充主詞與省略的前文 (如: 未禮讓 -> 汽車機車駕駛未禮讓行人)。\n\
             3. 只輸出改寫後的字串，不要任何解釋。\n\n\
             【對話紀錄】\n{}\n\n\
             【最新問題】\n{}\n",
            history_block, question
        )
    }

    /// 검색 문자열 생성 (실패 시 원래 질문)
    pub async fn rewrite(&self, question: &str, history: &[ConversationTurn]) -> String {
        let prompt = Self::build_prompt(question, history);

        match self.generation.complete(&prompt).await {
            Ok(text) => {
                let rewritten = text.trim();
                if rewritten.is_empty() {
                    tracing::warn!("Query rewrite returned empty text; using raw question");
                    return question.to_string();
                }
                tracing::debug!("Rewritten query: {}", rewritten);
                rewritten.to_string()
            }
            Err(e) => {
                tracing::warn!("Query rewrite failed, using raw question: {:#}", e);
                question.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::Role;
    use crate::pipeline::testing::ScriptedGeneration;

    #[tokio::test]
    async fn test_rewrite_trims_model_output() {
        let generation = Arc::new(ScriptedGeneration::replying("  拒絕酒測 罰則\n"));
        let rewriter = QueryRewriter::new(generation.clone());

        assert_eq!(rewriter.rewrite("拒絕九策會怎樣", &[]).await, "拒絕酒測 罰則");
        assert_eq!(generation.calls(), 1);
    }

    #[tokio::test]
    async fn test_rewrite_falls_back_on_error() {
        let rewriter = QueryRewriter::new(Arc::new(ScriptedGeneration::failing()));
        assert_eq!(rewriter.rewrite("闖紅燈罰多少", &[]).await, "闖紅燈罰多少");
    }

    #[tokio::test]
    async fn test_rewrite_falls_back_on_blank_output() {
        let rewriter = QueryRewriter::new(Arc::new(ScriptedGeneration::replying("   ")));
        assert_eq!(rewriter.rewrite("無照駕駛", &[]).await, "無照駕駛");
    }

    #[test]
    fn test_prompt_keeps_last_ten_turns() {
        let history: Vec<ConversationTurn> = (0..14)
            .map(|i| ConversationTurn::new(if i % 2 == 0 { Role::User } else { Role::Assistant }, format!("turn-{:02}", i)))
            .collect();

        let prompt = QueryRewriter::build_prompt("那機車呢？", &history);
        assert!(!prompt.contains("turn-03"));
        assert!(prompt.contains("turn-04"));
        assert!(prompt.contains("turn-13"));
        assert!(prompt.contains("那機車呢？"));
    }
}
