//! CLI 모듈
//!
//! legal-rag CLI 명령어 정의 및 구현

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{get_api_key, has_api_key, Config, DEFAULT_ASK_CONTEXT_K};
use crate::embedding::{EmbeddingProvider, GeminiEmbedding};
use crate::generation::GeminiGeneration;
use crate::knowledge::{
    load_corpus, save_corpus, JiebaSegmenter, LanceSemanticIndex, LawFragment, LexicalIndex,
    RankFusion, Segmenter, SessionStore, SynonymExpander,
};
use crate::pipeline::{AnswerSynthesizer, ChatPipeline, QueryRewriter, Style, StyleBook};
use crate::scraper::{LawScraper, DEFAULT_TARGETS};
use crate::server::{self, AppState};

/// 답변 생성 샘플링 온도
const ANSWER_TEMPERATURE: f32 = 0.7;

/// 색인 배치 크기 기본값
const DEFAULT_INGEST_BATCH: usize = 10;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "legal-rag")]
#[command(version, about = "대만 법령 하이브리드 RAG 상담 서버", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 채팅 API 서버 실행
    Serve {
        /// 바인드 주소 (기본: LEGAL_RAG_BIND 또는 127.0.0.1:8000)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// 질문 하나에 답변 (세션 저장 없음)
    Ask {
        /// 질문
        question: String,

        /// 답변 스타일 (general, professional, humorous)
        #[arg(short, long, default_value = "general")]
        style: String,

        /// 컨텍스트 조문 수
        #[arg(short = 'k', long, default_value_t = DEFAULT_ASK_CONTEXT_K)]
        context_k: usize,
    },

    /// 全國法規資料庫에서 조문 수집 → 코퍼스 JSON 저장
    Fetch {
        /// 수집 대상 (PCODE=법령명, 반복 가능). 생략 시 기본 3개 법령
        #[arg(short, long = "law")]
        laws: Vec<String>,

        /// 출력 경로 (기본: 코퍼스 경로)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 코퍼스를 임베딩해 벡터 인덱스에 저장
    Ingest {
        /// 코퍼스 경로 (기본: LEGAL_RAG_CORPUS 또는 <data dir>/laws.json)
        #[arg(short, long)]
        corpus: Option<PathBuf>,

        /// 배치 크기
        #[arg(long, default_value_t = DEFAULT_INGEST_BATCH)]
        batch_size: usize,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env();

    match cli.command {
        Commands::Serve { bind } => cmd_serve(&config, bind).await,
        Commands::Ask {
            question,
            style,
            context_k,
        } => cmd_ask(&config, &question, &style, context_k).await,
        Commands::Fetch { laws, output } => cmd_fetch(&config, &laws, output).await,
        Commands::Ingest { corpus, batch_size } => cmd_ingest(&config, corpus, batch_size).await,
        Commands::Status => cmd_status(&config).await,
    }
}

// ============================================================================
// Pipeline Assembly
// ============================================================================

/// 설정으로 채팅 파이프라인 구성
///
/// 코퍼스 로드와 BM25 색인 구축은 여기서 한 번만 일어납니다.
pub async fn build_pipeline(config: &Config) -> Result<ChatPipeline> {
    let api_key = get_api_key()?;

    let corpus = load_corpus(&config.corpus_path)?;

    let expander = match &config.synonyms_path {
        Some(path) => SynonymExpander::from_file(path)?,
        None => SynonymExpander::default(),
    };
    let styles = match &config.styles_path {
        Some(path) => StyleBook::from_file(path)?,
        None => StyleBook::default(),
    };

    let segmenter: Arc<dyn Segmenter> = Arc::new(JiebaSegmenter::new());
    let lexical = Arc::new(LexicalIndex::build(corpus, segmenter.as_ref()));

    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(GeminiEmbedding::new(api_key.clone(), &config.embed_model)?);
    let semantic = Arc::new(
        LanceSemanticIndex::open(&config.vectors_path(), embedder)
            .await
            .context("Failed to open vector index")?,
    );

    let fusion = Arc::new(RankFusion::new(
        Arc::new(expander),
        segmenter,
        lexical,
        semantic,
        config.fusion.clone(),
    ));

    let rewriter = QueryRewriter::new(Arc::new(GeminiGeneration::new(
        api_key.clone(),
        &config.chat_model,
    )?));
    let synthesizer = AnswerSynthesizer::new(
        Arc::new(GeminiGeneration::new(api_key, &config.chat_model)?.with_temperature(ANSWER_TEMPERATURE)),
        Arc::new(styles),
    );

    let store = SessionStore::open(&config.sessions_db_path())?;

    Ok(ChatPipeline::new(
        fusion,
        rewriter,
        synthesizer,
        store,
        config.context_k,
        config.generation_timeout,
    ))
}

// ============================================================================
// Command Implementations
// ============================================================================

fn require_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    Ok(())
}

/// 서버 실행 명령어 (serve)
async fn cmd_serve(config: &Config, bind: Option<String>) -> Result<()> {
    require_api_key()?;

    let pipeline = build_pipeline(config)
        .await
        .context("파이프라인 초기화 실패")?;
    let bind = bind.unwrap_or_else(|| config.bind.clone());

    server::serve(&bind, AppState::new(Arc::new(pipeline))).await
}

/// 단발 질문 명령어 (ask)
async fn cmd_ask(config: &Config, question: &str, style: &str, context_k: usize) -> Result<()> {
    require_api_key()?;

    let style: Style = style.parse()?;
    let pipeline = build_pipeline(config)
        .await
        .context("파이프라인 초기화 실패")?;

    println!("[*] 질문: \"{}\" (style={}, k={})", question, style, context_k);

    let processed = pipeline
        .ask(question, style, context_k)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    println!();
    println!("{}", processed.reply);
    println!();
    println!(
        "[分析] 領域: {} | 風險: {} | 關鍵詞: {}",
        processed.analysis.domain,
        processed.analysis.risk_level,
        processed.analysis.keywords.join(", ")
    );

    Ok(())
}

/// 조문 수집 명령어 (fetch)
async fn cmd_fetch(config: &Config, laws: &[String], output: Option<PathBuf>) -> Result<()> {
    let targets: Vec<(String, String)> = if laws.is_empty() {
        DEFAULT_TARGETS
            .iter()
            .map(|(p, n)| (p.to_string(), n.to_string()))
            .collect()
    } else {
        laws.iter().map(|l| parse_target(l)).collect::<Result<_>>()?
    };
    let target_refs: Vec<(&str, &str)> = targets
        .iter()
        .map(|(p, n)| (p.as_str(), n.as_str()))
        .collect();

    println!("[*] 수집 대상: {} 개 법령", target_refs.len());

    let scraper = LawScraper::new().context("LawScraper 생성 실패")?;
    let fragments = scraper.fetch_all(&target_refs).await;

    if fragments.is_empty() {
        bail!("수집된 조문이 없습니다");
    }

    let output = output.unwrap_or_else(|| config.corpus_path.clone());
    save_corpus(&output, &fragments)?;

    println!("[OK] {} 개 조문 저장: {}", fragments.len(), output.display());
    for (pcode, name) in &target_refs {
        let count = fragments.iter().filter(|f| f.id.starts_with(&format!("{}_", pcode))).count();
        println!("     {} ({}): {} 조", name, pcode, count);
    }

    Ok(())
}

/// 벡터 색인 명령어 (ingest)
///
/// 실패한 배치는 로그만 남기고 건너뜁니다.
async fn cmd_ingest(config: &Config, corpus: Option<PathBuf>, batch_size: usize) -> Result<()> {
    require_api_key()?;

    let corpus_path = corpus.unwrap_or_else(|| config.corpus_path.clone());
    let fragments = load_corpus(&corpus_path)?;
    if fragments.is_empty() {
        bail!("코퍼스가 비어 있습니다: {}", corpus_path.display());
    }

    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(GeminiEmbedding::new(get_api_key()?, &config.embed_model)?);
    let index = LanceSemanticIndex::open(&config.vectors_path(), embedder).await?;

    println!(
        "[*] {} 개 조문 색인 시작 (배치 {} 개)",
        fragments.len(),
        batch_size.max(1)
    );

    let report = ingest_batches(&index, &fragments, batch_size).await;

    println!();
    println!(
        "[OK] 완료: 성공 {}, 실패 {} (인덱스 총 {} 건)",
        report.indexed,
        report.failed,
        index.count().await.unwrap_or(0)
    );

    Ok(())
}

/// 배치 색인 결과
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub indexed: usize,
    pub failed: usize,
}

/// 조문을 배치 단위로 색인
pub async fn ingest_batches(
    index: &LanceSemanticIndex,
    fragments: &[LawFragment],
    batch_size: usize,
) -> IngestReport {
    let mut report = IngestReport::default();
    let batches: Vec<&[LawFragment]> = fragments.chunks(batch_size.max(1)).collect();

    for (i, batch) in batches.iter().enumerate() {
        match index.upsert(batch).await {
            Ok(n) => {
                report.indexed += n;
                tracing::info!("Batch {}/{} indexed ({} fragments)", i + 1, batches.len(), n);
            }
            Err(e) => {
                report.failed += batch.len();
                tracing::warn!("Batch {}/{} failed, skipping: {:#}", i + 1, batches.len(), e);
            }
        }
    }

    report
}

/// 상태 명령어 (status)
async fn cmd_status(config: &Config) -> Result<()> {
    println!("legal-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!("[*] 채팅 모델: {} / 임베딩 모델: {}", config.chat_model, config.embed_model);

    // API 키 상태
    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    // 코퍼스
    match load_corpus(&config.corpus_path) {
        Ok(corpus) => {
            let bytes: usize = corpus.iter().map(|f| f.text.len()).sum();
            println!(
                "[OK] 코퍼스: {} 조 ({}) - {}",
                corpus.len(),
                format_bytes(bytes),
                config.corpus_path.display()
            );
            for (category, count) in count_by_category(&corpus) {
                println!("     - {}: {} 조", category, count);
            }
            if let Some(first) = corpus.first() {
                println!("     예: {}", truncate_text(&first.text, 60));
            }
        }
        Err(e) => println!("[!] 코퍼스 로드 실패: {}", e),
    }

    // 세션 저장소
    match SessionStore::open(&config.sessions_db_path()).and_then(|s| s.count_sessions()) {
        Ok(count) => println!("[OK] 저장된 세션: {} 건", count),
        Err(e) => println!("[!] 세션 저장소 열기 실패: {}", e),
    }

    // 벡터 인덱스 (API 키가 있을 때만)
    if let Ok(api_key) = get_api_key() {
        let embedder: Result<Arc<dyn EmbeddingProvider>> = GeminiEmbedding::new(api_key, &config.embed_model)
            .map(|e| Arc::new(e) as Arc<dyn EmbeddingProvider>);
        match embedder {
            Ok(embedder) => match LanceSemanticIndex::open(&config.vectors_path(), embedder).await {
                Ok(index) => match index.count().await {
                    Ok(count) => println!("[OK] 벡터 인덱스: {} 조", count),
                    Err(e) => tracing::debug!("벡터 통계 조회 실패: {}", e),
                },
                Err(e) => tracing::debug!("벡터 인덱스 열기 실패: {}", e),
            },
            Err(e) => tracing::debug!("임베딩 클라이언트 생성 실패: {}", e),
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// `PCODE=법령명` 파싱
fn parse_target(raw: &str) -> Result<(String, String)> {
    let (pcode, name) = raw
        .split_once('=')
        .with_context(|| format!("수집 대상 형식 오류 (PCODE=법령명): {}", raw))?;
    let (pcode, name) = (pcode.trim(), name.trim());

    if pcode.is_empty() || name.is_empty() {
        bail!("수집 대상 형식 오류 (PCODE=법령명): {}", raw);
    }
    Ok((pcode.to_string(), name.to_string()))
}

/// 분류별 조문 수 (많은 순, 같으면 이름순)
fn count_by_category(corpus: &[LawFragment]) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for fragment in corpus {
        *counts.entry(fragment.category.as_str()).or_default() += 1;
    }

    let mut counts: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(category, count)| (category.to_string(), count))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbedTask;
    use crate::knowledge::{SemanticIndex, EMBEDDING_DIMENSION};
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// "FAIL"이 들어간 배치는 실패하는 임베더
    struct PickyEmbedder;

    #[async_trait]
    impl EmbeddingProvider for PickyEmbedder {
        async fn embed(&self, text: &str, _task: EmbedTask) -> Result<Vec<f32>> {
            if text.contains("FAIL") {
                bail!("quota exceeded");
            }
            let mut v = vec![0.0; EMBEDDING_DIMENSION as usize];
            v[text.chars().count() % EMBEDDING_DIMENSION as usize] = 1.0;
            Ok(v)
        }

        fn dimension(&self) -> usize {
            EMBEDDING_DIMENSION as usize
        }
    }

    #[tokio::test]
    async fn test_ingest_skips_failed_batches() {
        let dir = TempDir::new().unwrap();
        let index = LanceSemanticIndex::open(&dir.path().join("vectors.lance"), Arc::new(PickyEmbedder))
            .await
            .unwrap();

        let fragments: Vec<LawFragment> = (0..25)
            .map(|i| {
                let text = if i == 12 { format!("FAIL {}", i) } else { format!("第 {} 條", i) };
                LawFragment::new(format!("T_{}", i), text, "test")
            })
            .collect();

        let report = ingest_batches(&index, &fragments, 10).await;
        assert_eq!(report, IngestReport { indexed: 15, failed: 10 });
        assert_eq!(index.count().await.unwrap(), 15);

        let hits = index.query("第 3 條", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(
            parse_target("B0000001=民法").unwrap(),
            ("B0000001".to_string(), "民法".to_string())
        );
        assert!(parse_target("B0000001").is_err());
        assert!(parse_target("=民法").is_err());
    }

    #[test]
    fn test_count_by_category() {
        let corpus = vec![
            LawFragment::new("B0000001_第184條", "民法 第184條：侵權行為。", "民法"),
            LawFragment::new("K0040012_第35條", "道路交通管理處罰條例 第35條：酒駕。", "道路交通管理處罰條例"),
            LawFragment::new("K0040012_第40條", "道路交通管理處罰條例 第40條：超速。", "道路交通管理處罰條例"),
            LawFragment::new("C0000001_第185條之3", "中華民國刑法 第185條之3：不能安全駕駛。", "中華民國刑法"),
        ];

        assert_eq!(
            count_by_category(&corpus),
            vec![
                ("道路交通管理處罰條例".to_string(), 2),
                ("中華民國刑法".to_string(), 1),
                ("民法".to_string(), 1),
            ]
        );
        assert!(count_by_category(&[]).is_empty());
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_truncate_unicode() {
        let text = "道路交通管理處罰條例";
        assert_eq!(truncate_text(text, 4), "道路交通...");
    }

    #[test]
    fn test_cli_parses_ask() {
        let cli = Cli::try_parse_from(["legal-rag", "ask", "超速罰多少", "-s", "humorous"]).unwrap();
        match cli.command {
            Commands::Ask { question, style, context_k } => {
                assert_eq!(question, "超速罰多少");
                assert_eq!(style, "humorous");
                assert_eq!(context_k, DEFAULT_ASK_CONTEXT_K);
            }
            _ => panic!("expected ask"),
        }
    }
}
