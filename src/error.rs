//! 채팅 턴 에러 분류
//!
//! 인프라 계층은 `anyhow::Result`를 쓰고, 채팅 경계에서만 이 분류로
//! 변환합니다. 어떤 변형이든 호출자에게는 정형화된 사과 응답으로 나갑니다.

use std::time::Duration;

/// 채팅 턴을 중단시키는 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 생성 모델 호출 실패
    #[error("upstream model unavailable: {0:#}")]
    UpstreamUnavailable(anyhow::Error),

    /// 생성 모델 응답 시간 초과
    #[error("generation timed out after {0:?}")]
    GenerationTimeout(Duration),

    /// 세션 저장소 읽기/쓰기 실패
    #[error("session store unavailable: {0:#}")]
    StoreUnavailable(anyhow::Error),
}

impl PipelineError {
    /// 호출자에게 보여줄 사과 문구
    pub fn apology(&self) -> &'static str {
        match self {
            PipelineError::UpstreamUnavailable(_) | PipelineError::GenerationTimeout(_) => {
                "抱歉，法律顧問目前暫時無法回應，請稍後再試一次。"
            }
            PipelineError::StoreUnavailable(_) => {
                "抱歉，系統暫時無法保存這次對話，請稍後再試一次。"
            }
        }
    }
}
