//! legal-rag CLI 진입점

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    // 로깅 초기화 (lance 내부 로그는 경고 이상만)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
                .add_directive("lance=warn".parse()?)
                .add_directive("lancedb=warn".parse()?),
        )
        .init();

    let cli = legal_rag::cli::Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(legal_rag::cli::run(cli))
}
