use anyhow::{anyhow, Context, Result};
use arrow_array::{
    types::Float32Type, Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch,
    RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::{
    query::{ExecutableQuery, QueryBase, Select},
    Connection,
};
use serde::Serialize;
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::atomic::{AtomicI64, Ordering},
    sync::Arc,
};

/// One embedded structural entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexRecord {
    pub path: String,
    pub cache_key: String,
    pub content: String,
    pub title: String,
    #[serde(skip)]
    pub vector: Vec<f32>,
    pub kind: String,
}

/// Search result. `record.vector` is left empty.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: IndexRecord,
    pub distance: f32,
    pub seq: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Path,
    CacheKey,
    Title,
    Kind,
}

impl Column {
    fn name(self) -> &'static str {
        match self {
            Column::Path => "path",
            Column::CacheKey => "cache_key",
            Column::Title => "title",
            Column::Kind => "kind",
        }
    }
}

/// Filter applied before the nearest-neighbour scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Eq(Column, String),
    NotEq(Column, String),
    All(Vec<Predicate>),
}

impl Predicate {
    /// Excludes rows without a source path.
    pub fn non_placeholder() -> Self {
        Predicate::NotEq(Column::Path, String::new())
    }

    pub fn to_sql(&self) -> String {
        match self {
            Predicate::Eq(col, value) => {
                format!("{} = '{}'", col.name(), escape_lancedb_string(value))
            }
            Predicate::NotEq(col, value) => {
                format!("{} != '{}'", col.name(), escape_lancedb_string(value))
            }
            Predicate::All(parts) if parts.is_empty() => "true".to_string(),
            Predicate::All(parts) => parts
                .iter()
                .map(|p| format!("({})", p.to_sql()))
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }
}

/// LanceDB table holding every [`IndexRecord`], keyed by source path.
pub struct SemanticIndexStore {
    table: lancedb::Table,
    vector_dim: usize,
    next_seq: AtomicI64,
}

impl SemanticIndexStore {
    /// Opens (or creates) `table_name` under `db_dir`. A table whose schema does
    /// not match the expected columns or vector dimension is recreated empty.
    pub async fn open(db_dir: &Path, table_name: &str, vector_dim: usize) -> Result<Self> {
        let db = connect(db_dir).await?;
        let expected = Arc::new(build_schema(vector_dim));

        let existing = db
            .table_names()
            .execute()
            .await
            .context("Failed to list lancedb table names")?;

        if existing.iter().any(|n| n == table_name) {
            let table = db
                .open_table(table_name)
                .execute()
                .await
                .context("Failed to open lancedb table")?;
            let actual = table
                .schema()
                .await
                .context("Failed to read lancedb table schema")?;
            if schema_matches(&actual, vector_dim) {
                return Ok(Self::from_table(table, vector_dim));
            }
            tracing::warn!(
                table = %table_name,
                vector_dim,
                "Vector table schema is incompatible, recreating it"
            );
            drop(table);
            remove_table_dir(db_dir, table_name)?;
        }

        db.create_empty_table(table_name, expected)
            .execute()
            .await
            .context("Failed to create lancedb table")?;
        let table = db
            .open_table(table_name)
            .execute()
            .await
            .context("Failed to open lancedb table")?;

        Ok(Self::from_table(table, vector_dim))
    }

    fn from_table(table: lancedb::Table, vector_dim: usize) -> Self {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos().min(i64::MAX as u128) as i64)
            .unwrap_or(0);
        Self {
            table,
            vector_dim,
            next_seq: AtomicI64::new(seed),
        }
    }

    pub fn vector_dim(&self) -> usize {
        self.vector_dim
    }

    pub async fn try_insert(&self, records: &[IndexRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        for record in records {
            if record.vector.len() != self.vector_dim {
                return Err(anyhow!(
                    "Vector dim mismatch for {} ({}): expected {}, got {}",
                    record.path,
                    record.title,
                    self.vector_dim,
                    record.vector.len()
                ));
            }
        }

        let first_seq = self
            .next_seq
            .fetch_add(records.len() as i64, Ordering::SeqCst);
        let schema = Arc::new(build_schema(self.vector_dim));
        let batch = build_record_batch(schema.clone(), records, self.vector_dim, first_seq)?;
        let batches = RecordBatchIterator::new(vec![batch].into_iter().map(Ok), schema.clone());

        self.table
            .add(Box::new(batches))
            .execute()
            .await
            .context("Failed to add records to lancedb table")?;

        Ok(())
    }

    pub async fn try_delete_by_path(&self, path: &str) -> Result<()> {
        let predicate = Predicate::Eq(Column::Path, path.to_string()).to_sql();
        self.table
            .delete(&predicate)
            .await
            .context("Failed to delete lancedb records by path")?;
        Ok(())
    }

    /// Nearest rows first; equal distances keep insertion order.
    pub async fn try_search(
        &self,
        query_vector: &[f32],
        limit: usize,
        predicate: &Predicate,
    ) -> Result<Vec<SearchHit>> {
        if query_vector.len() != self.vector_dim {
            return Err(anyhow!(
                "Query vector dim mismatch: expected {}, got {}",
                self.vector_dim,
                query_vector.len()
            ));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        // Over-fetch so ties straddling the limit are resolved by sequence, not by scan order.
        let fetch = limit.saturating_mul(2).max(limit + 8);
        let stream = self
            .table
            .query()
            .nearest_to(query_vector)
            .context("Failed to create lancedb nearest_to query")?
            .only_if(predicate.to_sql())
            .limit(fetch)
            .execute()
            .await
            .context("Failed to execute lancedb query")?;

        let batches: Vec<RecordBatch> = stream.try_collect().await?;

        let mut out = Vec::new();
        for batch in &batches {
            out.extend(hits_from_batch(batch)?);
        }
        out.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        out.truncate(limit);
        Ok(out)
    }

    pub async fn try_count_rows(&self) -> Result<usize> {
        self.table
            .count_rows(None)
            .await
            .context("Failed to count lancedb rows")
    }

    /// Distinct non-empty paths currently stored.
    pub async fn list_paths(&self) -> Result<BTreeSet<String>> {
        let total = self.try_count_rows().await?;
        if total == 0 {
            return Ok(BTreeSet::new());
        }

        let stream = self
            .table
            .query()
            .select(Select::Columns(vec!["path".to_string()]))
            .limit(total)
            .execute()
            .await
            .context("Failed to list lancedb paths")?;
        let batches: Vec<RecordBatch> = stream.try_collect().await?;

        let mut out = BTreeSet::new();
        for batch in &batches {
            let paths = string_column(batch, "path")?;
            for row in 0..batch.num_rows() {
                if !paths.is_null(row) && !paths.value(row).is_empty() {
                    out.insert(paths.value(row).to_string());
                }
            }
        }
        Ok(out)
    }

    pub async fn insert(&self, records: &[IndexRecord]) {
        if let Err(err) = self.try_insert(records).await {
            tracing::error!(error = %err, count = records.len(), "Vector insert failed");
        }
    }

    pub async fn delete_by_path(&self, path: &str) {
        if let Err(err) = self.try_delete_by_path(path).await {
            tracing::error!(file = %path, error = %err, "Vector delete failed");
        }
    }

    pub async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        predicate: &Predicate,
    ) -> Vec<SearchHit> {
        match self.try_search(query_vector, limit, predicate).await {
            Ok(hits) => hits,
            Err(err) => {
                tracing::error!(error = %err, "Vector search failed");
                Vec::new()
            }
        }
    }

    pub async fn count_rows(&self) -> usize {
        match self.try_count_rows().await {
            Ok(n) => n,
            Err(err) => {
                tracing::error!(error = %err, "Vector row count failed");
                0
            }
        }
    }
}

async fn connect(path: &Path) -> Result<Connection> {
    let uri = path
        .to_str()
        .ok_or_else(|| anyhow!("VECTOR_DB_PATH is not valid UTF-8"))?;

    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create VECTOR_DB_PATH: {}", path.display()))?;

    lancedb::connect(uri)
        .execute()
        .await
        .context("Failed to connect to lancedb")
}

fn remove_table_dir(db_dir: &Path, table_name: &str) -> Result<()> {
    let dir: PathBuf = db_dir.join(format!("{table_name}.lance"));
    if dir.exists() {
        std::fs::remove_dir_all(&dir)
            .with_context(|| format!("Failed to remove vector table: {}", dir.display()))?;
    }
    Ok(())
}

fn escape_lancedb_string(s: &str) -> String {
    s.replace('\'', "''")
}

fn build_schema(vector_dim: usize) -> Schema {
    Schema::new(vec![
        Field::new("path", DataType::Utf8, false),
        Field::new("cache_key", DataType::Utf8, true),
        Field::new("content", DataType::Utf8, true),
        Field::new("title", DataType::Utf8, true),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                vector_dim as i32,
            ),
            true,
        ),
        Field::new("kind", DataType::Utf8, true),
        Field::new("seq", DataType::Int64, false),
    ])
}

fn schema_matches(actual: &Schema, vector_dim: usize) -> bool {
    let expected = build_schema(vector_dim);
    if actual.fields().len() != expected.fields().len() {
        return false;
    }
    expected.fields().iter().all(|want| {
        actual
            .field_with_name(want.name())
            .map(|have| have.data_type() == want.data_type())
            .unwrap_or(false)
    })
}

fn build_record_batch(
    schema: Arc<Schema>,
    records: &[IndexRecord],
    vector_dim: usize,
    first_seq: i64,
) -> Result<RecordBatch> {
    let paths = StringArray::from(records.iter().map(|r| r.path.as_str()).collect::<Vec<_>>());
    let cache_keys = StringArray::from(
        records
            .iter()
            .map(|r| r.cache_key.as_str())
            .collect::<Vec<_>>(),
    );
    let contents = StringArray::from(
        records
            .iter()
            .map(|r| r.content.as_str())
            .collect::<Vec<_>>(),
    );
    let titles = StringArray::from(records.iter().map(|r| r.title.as_str()).collect::<Vec<_>>());
    let kinds = StringArray::from(records.iter().map(|r| r.kind.as_str()).collect::<Vec<_>>());
    let seqs = Int64Array::from(
        (0..records.len() as i64)
            .map(|i| first_seq + i)
            .collect::<Vec<_>>(),
    );

    let vectors = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
        records
            .iter()
            .map(|r| Some(r.vector.iter().copied().map(Some))),
        vector_dim as i32,
    );

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(paths),
            Arc::new(cache_keys),
            Arc::new(contents),
            Arc::new(titles),
            Arc::new(vectors),
            Arc::new(kinds),
            Arc::new(seqs),
        ],
    )
    .context("Failed to build arrow record batch")
}

fn string_column<'b>(batch: &'b RecordBatch, name: &str) -> Result<&'b StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| anyhow!("Missing {name} column in lancedb result"))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| anyhow!("{name} column is not StringArray"))
}

fn hits_from_batch(batch: &RecordBatch) -> Result<Vec<SearchHit>> {
    let path = string_column(batch, "path")?;
    let cache_key = string_column(batch, "cache_key")?;
    let content = string_column(batch, "content")?;
    let title = string_column(batch, "title")?;
    let kind = string_column(batch, "kind")?;
    let seq = batch
        .column_by_name("seq")
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| anyhow!("seq column missing or not Int64Array"))?;
    let distance = batch
        .column_by_name("_distance")
        .or_else(|| batch.column_by_name("distance"))
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    let text = |col: &StringArray, row: usize| {
        if col.is_null(row) {
            String::new()
        } else {
            col.value(row).to_string()
        }
    };

    let mut out = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        out.push(SearchHit {
            record: IndexRecord {
                path: text(path, row),
                cache_key: text(cache_key, row),
                content: text(content, row),
                title: text(title, row),
                vector: Vec::new(),
                kind: text(kind, row),
            },
            distance: distance
                .filter(|d| !d.is_null(row))
                .map(|d| d.value(row))
                .unwrap_or(f32::MAX),
            seq: if seq.is_null(row) { 0 } else { seq.value(row) },
        });
    }
    Ok(out)
}
