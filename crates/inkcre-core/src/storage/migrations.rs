//! Graph schema migrations
//!
//! Applied versions are recorded in `_migrations`. Each step runs in its
//! own transaction together with its record, so a failed step leaves the
//! previous version intact.

use anyhow::Context;
use sqlx::SqlitePool;
use tracing::{debug, info};

const CREATE_MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Migration v1: storages, blocks and relations
const MIGRATION_V1: &str = r#"
-- Backends that dereference block content
CREATE TABLE IF NOT EXISTS storages (
    name TEXT PRIMARY KEY,
    nickname TEXT,
    type TEXT NOT NULL CHECK (type IN ('url'))
);

-- Atomic content units
CREATE TABLE IF NOT EXISTS blocks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    content TEXT NOT NULL,
    storage TEXT REFERENCES storages(name) ON DELETE RESTRICT,
    embedding BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Directed, labelled edges: "to is the content of from"
CREATE TABLE IF NOT EXISTS relations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_block INTEGER NOT NULL REFERENCES blocks(id) ON DELETE CASCADE,
    to_block INTEGER NOT NULL REFERENCES blocks(id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    embedding BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_relations_from ON relations(from_block);
CREATE INDEX IF NOT EXISTS idx_relations_to ON relations(to_block);
"#;

/// Migration v2: recency and label lookups
const MIGRATION_V2: &str = r#"
CREATE INDEX IF NOT EXISTS idx_blocks_updated_at ON blocks(updated_at);
CREATE INDEX IF NOT EXISTS idx_blocks_kind ON blocks(kind);
CREATE INDEX IF NOT EXISTS idx_relations_from_content ON relations(from_block, content);
"#;

/// One schema step
struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

/// Every schema step, oldest first
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "block graph schema",
        sql: MIGRATION_V1,
    },
    Migration {
        version: 2,
        name: "recency and label indexes",
        sql: MIGRATION_V2,
    },
];

/// Current schema version
pub const CURRENT_VERSION: i32 = MIGRATIONS[MIGRATIONS.len() - 1].version;

async fn applied_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let (version,): (Option<i32>,) = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_one(pool)
        .await?;

    Ok(version.unwrap_or(0))
}

/// Apply one step and its bookkeeping row atomically
async fn apply(pool: &SqlitePool, migration: &Migration) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::raw_sql(migration.sql)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("migration v{} ({}) failed", migration.version, migration.name))?;
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(migration.version)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Apply every step newer than the recorded version
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let applied = applied_version(pool).await?;
    if applied >= CURRENT_VERSION {
        debug!(version = applied, "Graph schema is up to date");
        return Ok(());
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        info!(version = migration.version, name = migration.name, "Applying migration");
        apply(pool, migration).await?;
    }

    info!(from = applied, to = CURRENT_VERSION, "Graph schema migrated");
    Ok(())
}

pub async fn needs_migration(pool: &SqlitePool) -> anyhow::Result<bool> {
    Ok(applied_version(pool).await? < CURRENT_VERSION)
}

pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = applied_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Recorded versus latest schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStatus {
    pub current_version: i32,
    pub target_version: i32,
    pub needs_migration: bool,
}
