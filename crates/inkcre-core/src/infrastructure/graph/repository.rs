//! SQLite implementation of the GraphRepository
//!
//! Embeddings are stored as little-endian `f32` BLOBs and timestamps as
//! RFC 3339 text. A [`SqliteGraphBatch`] wraps one SQLite transaction.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{FromRow, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::domain::graph::{
    Block, BlockId, EntityKind, GraphBatch, GraphRepository, GraphStats, NewBlock, NewRelation,
    Relation, RelationId, ResolverKind, Storage, StorageKind,
};
use crate::error::{Error, Result};

const BLOCK_COLUMNS: &str = "id, kind, content, storage, embedding, created_at, updated_at";
const RELATION_COLUMNS: &str =
    "id, from_block, to_block, content, embedding, created_at, updated_at";

/// SQLite implementation of the block graph repository
#[derive(Clone)]
pub struct SqliteGraphRepository {
    pool: SqlitePool,
}

impl SqliteGraphRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn list_relations(&self, column: &str, block: BlockId) -> Result<Vec<Relation>> {
        let rows: Vec<RelationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM relations WHERE {} = ? ORDER BY id",
            RELATION_COLUMNS, column
        ))
        .bind(block.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RelationRow::into_relation).collect())
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(sql).fetch_one(&self.pool).await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl GraphRepository for SqliteGraphRepository {
    // ========== Writes ==========

    async fn begin_batch(&self) -> Result<Box<dyn GraphBatch>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::PersistenceConflict(format!("cannot open batch: {}", e)))?;
        Ok(Box::new(SqliteGraphBatch {
            tx,
            blocks: 0,
            relations: 0,
        }))
    }

    async fn update_block_embedding(&self, id: BlockId, embedding: &[f32]) -> Result<()> {
        let result = sqlx::query("UPDATE blocks SET embedding = ?, updated_at = ? WHERE id = ?")
            .bind(encode_embedding(embedding))
            .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::block_not_found(id));
        }
        debug!(block_id = %id, dimension = embedding.len(), "Block embedding updated");
        Ok(())
    }

    async fn save_storage(&self, storage: &Storage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO storages (name, nickname, type) VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                nickname = excluded.nickname,
                type = excluded.type
            "#,
        )
        .bind(&storage.name)
        .bind(&storage.nickname)
        .bind(storage.kind.as_str())
        .execute(&self.pool)
        .await?;

        info!(storage = %storage.name, kind = storage.kind.as_str(), "Storage saved");
        Ok(())
    }

    // ========== Reads ==========

    async fn get_block(&self, id: BlockId) -> Result<Option<Block>> {
        let row: Option<BlockRow> = sqlx::query_as(&format!(
            "SELECT {} FROM blocks WHERE id = ?",
            BLOCK_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(BlockRow::into_block))
    }

    async fn get_relation(&self, id: RelationId) -> Result<Option<Relation>> {
        let row: Option<RelationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM relations WHERE id = ?",
            RELATION_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(RelationRow::into_relation))
    }

    async fn list_outgoing(&self, block: BlockId) -> Result<Vec<Relation>> {
        self.list_relations("from_block", block).await
    }

    async fn list_incoming(&self, block: BlockId) -> Result<Vec<Relation>> {
        self.list_relations("to_block", block).await
    }

    async fn find_outgoing_by_label(&self, block: BlockId, label: &str) -> Result<Vec<Relation>> {
        let rows: Vec<RelationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM relations WHERE from_block = ? AND content = ? ORDER BY id",
            RELATION_COLUMNS
        ))
        .bind(block.0)
        .bind(label)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RelationRow::into_relation).collect())
    }

    async fn recent_blocks(&self, limit: usize) -> Result<Vec<Block>> {
        let rows: Vec<BlockRow> = sqlx::query_as(&format!(
            "SELECT {} FROM blocks ORDER BY updated_at DESC, id DESC LIMIT ?",
            BLOCK_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BlockRow::into_block).collect())
    }

    async fn list_embeddings(&self, kind: EntityKind) -> Result<Vec<(i64, Vec<f32>)>> {
        let table = match kind {
            EntityKind::Block => "blocks",
            EntityKind::Relation => "relations",
        };
        let rows: Vec<(i64, Vec<u8>)> = sqlx::query_as(&format!(
            "SELECT id, embedding FROM {} WHERE embedding IS NOT NULL ORDER BY id",
            table
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, bytes)| (id, decode_embedding(&bytes)))
            .collect())
    }

    async fn get_storage(&self, name: &str) -> Result<Option<Storage>> {
        let row: Option<StorageRow> =
            sqlx::query_as("SELECT name, nickname, type FROM storages WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        row.map(StorageRow::into_storage).transpose()
    }

    async fn get_stats(&self) -> Result<GraphStats> {
        let by_kind: Vec<(String, i64)> =
            sqlx::query_as("SELECT kind, COUNT(*) FROM blocks GROUP BY kind ORDER BY kind")
                .fetch_all(&self.pool)
                .await?;

        Ok(GraphStats {
            total_blocks: self.count("SELECT COUNT(*) FROM blocks").await?,
            total_relations: self.count("SELECT COUNT(*) FROM relations").await?,
            blocks_with_embeddings: self
                .count("SELECT COUNT(*) FROM blocks WHERE embedding IS NOT NULL")
                .await?,
            relations_with_embeddings: self
                .count("SELECT COUNT(*) FROM relations WHERE embedding IS NOT NULL")
                .await?,
            blocks_by_kind: by_kind
                .into_iter()
                .map(|(kind, count)| (kind, count as u64))
                .collect(),
        })
    }
}

/// Writes inside one SQLite transaction
///
/// Dropping the batch without committing rolls the transaction back.
pub struct SqliteGraphBatch {
    tx: Transaction<'static, Sqlite>,
    blocks: usize,
    relations: usize,
}

impl SqliteGraphBatch {
    async fn block_exists(conn: &mut SqliteConnection, id: BlockId) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM blocks WHERE id = ?)")
            .bind(id.0)
            .fetch_one(conn)
            .await?;
        Ok(exists)
    }
}

#[async_trait]
impl GraphBatch for SqliteGraphBatch {
    async fn create_block(&mut self, draft: &NewBlock, embedding: Option<&[f32]>) -> Result<Block> {
        if let Some(storage) = &draft.storage {
            let (exists,): (bool,) =
                sqlx::query_as("SELECT EXISTS(SELECT 1 FROM storages WHERE name = ?)")
                    .bind(storage)
                    .fetch_one(&mut *self.tx)
                    .await?;
            if !exists {
                return Err(Error::StorageNotFound(storage.clone()));
            }
        }

        let now = Utc::now();
        let id = sqlx::query(
            r#"
            INSERT INTO blocks (kind, content, storage, embedding, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(draft.kind.as_str())
        .bind(&draft.content)
        .bind(&draft.storage)
        .bind(embedding.map(encode_embedding))
        .bind(now.to_rfc3339_opts(SecondsFormat::Micros, true))
        .bind(now.to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| Error::PersistenceConflict(format!("block insert failed: {}", e)))?
        .last_insert_rowid();

        self.blocks += 1;
        debug!(block_id = id, kind = %draft.kind, "Block staged");

        Ok(Block {
            id: BlockId(id),
            kind: draft.kind.clone(),
            content: draft.content.clone(),
            storage: draft.storage.clone(),
            embedding: embedding.map(<[f32]>::to_vec),
            created_at: now,
            updated_at: now,
        })
    }

    async fn create_relation(
        &mut self,
        draft: &NewRelation,
        embedding: Option<&[f32]>,
    ) -> Result<Relation> {
        for endpoint in [draft.from, draft.to] {
            if !Self::block_exists(&mut *self.tx, endpoint).await? {
                return Err(Error::block_not_found(endpoint));
            }
        }

        let now = Utc::now();
        let id = sqlx::query(
            r#"
            INSERT INTO relations (from_block, to_block, content, embedding, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(draft.from.0)
        .bind(draft.to.0)
        .bind(&draft.content)
        .bind(embedding.map(encode_embedding))
        .bind(now.to_rfc3339_opts(SecondsFormat::Micros, true))
        .bind(now.to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| Error::PersistenceConflict(format!("relation insert failed: {}", e)))?
        .last_insert_rowid();

        self.relations += 1;
        debug!(relation_id = id, from = %draft.from, to = %draft.to, "Relation staged");

        Ok(Relation {
            id: RelationId(id),
            from: draft.from,
            to: draft.to,
            content: draft.content.clone(),
            embedding: embedding.map(<[f32]>::to_vec),
            created_at: now,
            updated_at: now,
        })
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let (blocks, relations) = (self.blocks, self.relations);
        self.tx
            .commit()
            .await
            .map_err(|e| Error::PersistenceConflict(format!("commit failed: {}", e)))?;
        debug!(blocks, relations, "Batch committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let (blocks, relations) = (self.blocks, self.relations);
        self.tx.rollback().await?;
        debug!(blocks, relations, "Batch rolled back");
        Ok(())
    }
}

// ========== Row Types ==========

#[derive(Debug, FromRow)]
struct BlockRow {
    id: i64,
    kind: String,
    content: String,
    storage: Option<String>,
    embedding: Option<Vec<u8>>,
    created_at: String,
    updated_at: String,
}

impl BlockRow {
    fn into_block(self) -> Block {
        Block {
            id: BlockId(self.id),
            kind: ResolverKind::new(self.kind),
            content: self.content,
            storage: self.storage,
            embedding: self.embedding.as_deref().map(decode_embedding),
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        }
    }
}

#[derive(Debug, FromRow)]
struct RelationRow {
    id: i64,
    from_block: i64,
    to_block: i64,
    content: String,
    embedding: Option<Vec<u8>>,
    created_at: String,
    updated_at: String,
}

impl RelationRow {
    fn into_relation(self) -> Relation {
        Relation {
            id: RelationId(self.id),
            from: BlockId(self.from_block),
            to: BlockId(self.to_block),
            content: self.content,
            embedding: self.embedding.as_deref().map(decode_embedding),
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        }
    }
}

#[derive(Debug, FromRow)]
struct StorageRow {
    name: String,
    nickname: Option<String>,
    #[sqlx(rename = "type")]
    kind: String,
}

impl StorageRow {
    fn into_storage(self) -> Result<Storage> {
        let kind = StorageKind::parse(&self.kind)
            .ok_or_else(|| Error::Other(format!("Invalid storage type: {}", self.kind)))?;
        Ok(Storage {
            name: self.name,
            nickname: self.nickname,
            kind,
        })
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
