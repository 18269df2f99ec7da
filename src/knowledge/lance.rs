//! LanceDB Semantic Index - 조문 임베딩 저장 및 ANN 검색
//!
//! 조문마다 하나의 벡터를 저장합니다 (조문은 충분히 짧아 청킹하지 않음).
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::table::Table;

use crate::embedding::{EmbedTask, EmbeddingProvider};

use super::corpus::LawFragment;
use super::vector::{FragmentVector, SemanticHit, SemanticIndex, EMBEDDING_DIMENSION};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "legal_knowledge";

// ============================================================================
// LanceSemanticIndex
// ============================================================================

/// LanceDB 기반 시맨틱 인덱스
pub struct LanceSemanticIndex {
    db: Connection,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl LanceSemanticIndex {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `embedder` - 질의/색인용 임베딩 프로바이더
    pub async fn open(path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self { db, embedder })
    }

    fn create_schema() -> Schema {
        Schema::new(vec![
            Field::new("fragment_id", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("category", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    EMBEDDING_DIMENSION,
                ),
                false,
            ),
        ])
    }

    /// 벡터들을 Arrow RecordBatch로 변환
    fn vectors_to_batch(vectors: &[FragmentVector]) -> Result<RecordBatch> {
        if vectors.is_empty() {
            anyhow::bail!("Cannot create batch from empty vectors");
        }

        if let Some(bad) = vectors
            .iter()
            .find(|v| v.embedding.len() != EMBEDDING_DIMENSION as usize)
        {
            anyhow::bail!(
                "Embedding for {} has dimension {}, expected {}",
                bad.fragment_id,
                bad.embedding.len(),
                EMBEDDING_DIMENSION
            );
        }

        let ids: Vec<&str> = vectors.iter().map(|v| v.fragment_id.as_str()).collect();
        let texts: Vec<&str> = vectors.iter().map(|v| v.text.as_str()).collect();
        let categories: Vec<&str> = vectors.iter().map(|v| v.category.as_str()).collect();

        let flat: Vec<f32> = vectors
            .iter()
            .flat_map(|v| v.embedding.iter().copied())
            .collect();
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings = FixedSizeListArray::try_new(
            field,
            EMBEDDING_DIMENSION,
            Arc::new(Float32Array::from(flat)) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Arc::new(Self::create_schema()),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(texts)),
                Arc::new(StringArray::from(categories)),
                Arc::new(embeddings),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.iter().any(|n| n == TABLE_NAME))
            .unwrap_or(false)
    }

    async fn open_table(&self) -> Result<Table> {
        self.db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table")
    }

    /// 미리 계산된 벡터 저장 (같은 fragment_id는 교체)
    pub async fn upsert_vectors(&self, vectors: &[FragmentVector]) -> Result<usize> {
        if vectors.is_empty() {
            return Ok(0);
        }

        let batch = Self::vectors_to_batch(vectors)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if self.table_exists().await {
            let table = self.open_table().await?;

            let ids: Vec<&str> = vectors.iter().map(|v| v.fragment_id.as_str()).collect();
            table
                .delete(&id_filter(&ids))
                .await
                .context("Failed to delete stale vectors")?;

            table
                .add(batches)
                .execute()
                .await
                .context("Failed to add vectors to table")?;
        } else {
            self.db
                .create_table(TABLE_NAME, batches)
                .execute()
                .await
                .context("Failed to create table")?;
        }

        Ok(vectors.len())
    }

    /// 조문 임베딩 후 저장
    pub async fn upsert(&self, fragments: &[LawFragment]) -> Result<usize> {
        if fragments.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = fragments.iter().map(|f| f.text.clone()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&texts, EmbedTask::RetrievalDocument)
            .await
            .context("Failed to embed fragments")?;

        let vectors: Vec<FragmentVector> = fragments
            .iter()
            .zip(embeddings)
            .map(|(fragment, embedding)| FragmentVector {
                fragment_id: fragment.id.clone(),
                text: fragment.text.clone(),
                category: fragment.category.clone(),
                embedding,
            })
            .collect();

        self.upsert_vectors(&vectors).await
    }

    /// 벡터 개수 조회
    pub async fn count(&self) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self.open_table().await?;
        table.count_rows(None).await.context("Failed to count rows")
    }

    /// 임베딩 벡터로 직접 검색
    pub async fn search_vector(&self, embedding: &[f32], k: usize) -> Result<Vec<SemanticHit>> {
        if k == 0 || !self.table_exists().await {
            return Ok(vec![]);
        }

        let table = self.open_table().await?;
        let stream = table
            .vector_search(embedding.to_vec())
            .context("Failed to create vector search")?
            .limit(k)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = stream.try_collect().await?;

        let mut hits = Vec::new();
        for batch in batches {
            let ids = string_column(&batch, "fragment_id")?;
            let texts = string_column(&batch, "text")?;

            for i in 0..batch.num_rows() {
                hits.push(SemanticHit {
                    id: ids.value(i).to_string(),
                    text: texts.value(i).to_string(),
                });
            }
        }

        Ok(hits)
    }
}

#[async_trait]
impl SemanticIndex for LanceSemanticIndex {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<SemanticHit>> {
        let embedding = self
            .embedder
            .embed(text, EmbedTask::RetrievalQuery)
            .await
            .context("Failed to embed query")?;

        self.search_vector(&embedding, k).await
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

/// `fragment_id IN ('a', 'b')` 필터 (작은따옴표 이스케이프)
fn id_filter(ids: &[&str]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("'{}'", id.replace('\'', "''")))
        .collect();
    format!("fragment_id IN ({})", quoted.join(", "))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// "超速"가 들어간 텍스트는 축 0, 나머지는 축 1
    struct AxisEmbedder;

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedder {
        async fn embed(&self, text: &str, _task: EmbedTask) -> Result<Vec<f32>> {
            let mut v = vec![0.0; EMBEDDING_DIMENSION as usize];
            if text.contains("超速") {
                v[0] = 1.0;
            } else {
                v[1] = 1.0;
            }
            Ok(v)
        }

        fn dimension(&self) -> usize {
            EMBEDDING_DIMENSION as usize
        }
    }

    async fn open_index(dir: &TempDir) -> LanceSemanticIndex {
        LanceSemanticIndex::open(&dir.path().join("vectors.lance"), Arc::new(AxisEmbedder))
            .await
            .unwrap()
    }

    fn fragments() -> Vec<LawFragment> {
        vec![
            LawFragment::new("K0040012_第40條", "道路交通管理處罰條例 第40條：超速者處罰鍰。", "道路交通管理處罰條例"),
            LawFragment::new("C0000001_第320條", "中華民國刑法 第320條：竊盜罪。", "中華民國刑法"),
        ]
    }

    #[test]
    fn test_id_filter_escapes_quotes() {
        assert_eq!(id_filter(&["a", "b'c"]), "fragment_id IN ('a', 'b''c')");
    }

    #[tokio::test]
    async fn test_empty_index() {
        let dir = TempDir::new().unwrap();
        let index = open_index(&dir).await;

        assert_eq!(index.count().await.unwrap(), 0);
        assert!(index.query("超速", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_and_query() {
        let dir = TempDir::new().unwrap();
        let index = open_index(&dir).await;

        assert_eq!(index.upsert(&fragments()).await.unwrap(), 2);
        assert_eq!(index.count().await.unwrap(), 2);

        let hits = index.query("我超速了", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "K0040012_第40條");
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_ids() {
        let dir = TempDir::new().unwrap();
        let index = open_index(&dir).await;

        index.upsert(&fragments()).await.unwrap();
        index.upsert(&fragments()).await.unwrap();

        assert_eq!(index.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rejects_wrong_dimension() {
        let dir = TempDir::new().unwrap();
        let index = open_index(&dir).await;

        let result = index
            .upsert_vectors(&[FragmentVector {
                fragment_id: "x".to_string(),
                text: "x".to_string(),
                category: "x".to_string(),
                embedding: vec![0.1; 3],
            }])
            .await;
        assert!(result.is_err());
    }
}
