//! PostgreSQL transfer store

use super::{TransferStats, TransferStore};
use crate::config::DatabaseConfig;
use crate::contracts::LockId;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::transfer::{TransferRecord, TransferState};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

const SELECT_COLUMNS: &str = r#"
    SELECT id, lock_id, from_chain, to_chain, amount, recipient, state,
           lock_tx, mint_tx, mint_attempts, last_error, created_at, updated_at
    FROM transfer_records
"#;

/// Transfer store for PostgreSQL persistence
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and create the pool
    pub async fn new(config: &DatabaseConfig) -> OrchestratorResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transfer_records (
                id UUID PRIMARY KEY,
                lock_id BYTEA,
                from_chain BIGINT NOT NULL,
                to_chain BIGINT NOT NULL,
                amount TEXT NOT NULL,
                recipient VARCHAR(42) NOT NULL,
                state VARCHAR(20) NOT NULL,
                lock_tx VARCHAR(66),
                mint_tx VARCHAR(66),
                mint_attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_transfer_records_lock_id
            ON transfer_records (lock_id)
            WHERE lock_id IS NOT NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transfer_records_state
            ON transfer_records (state, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }
}

#[async_trait]
impl TransferStore for PostgresStore {
    async fn save(&self, record: &TransferRecord) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transfer_records
                (id, lock_id, from_chain, to_chain, amount, recipient, state,
                 lock_tx, mint_tx, mint_attempts, last_error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id)
            DO UPDATE SET lock_id = $2, state = $7, lock_tx = $8, mint_tx = $9,
                          mint_attempts = $10, last_error = $11, updated_at = $13
            "#,
        )
        .bind(record.id)
        .bind(record.lock_id.map(|id| id.as_bytes().to_vec()))
        .bind(record.from_chain as i64)
        .bind(record.to_chain as i64)
        .bind(record.amount.to_string())
        .bind(format!("{:?}", record.recipient))
        .bind(record.state.as_str())
        .bind(record.lock_tx.map(|h| format!("{:?}", h)))
        .bind(record.mint_tx.map(|h| format!("{:?}", h)))
        .bind(record.mint_attempts as i32)
        .bind(record.last_error.as_deref())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("Saved transfer {} in state {}", record.id, record.state);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> OrchestratorResult<Option<TransferRecord>> {
        let row = sqlx::query(&format!("{} WHERE id = $1", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn get_by_lock_id(&self, lock_id: &LockId) -> OrchestratorResult<Option<TransferRecord>> {
        let row = sqlx::query(&format!("{} WHERE lock_id = $1", SELECT_COLUMNS))
            .bind(lock_id.as_bytes().to_vec())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn list_by_state(&self, state: TransferState) -> OrchestratorResult<Vec<TransferRecord>> {
        let rows = sqlx::query(&format!(
            "{} WHERE state = $1 ORDER BY created_at",
            SELECT_COLUMNS
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn stats(&self) -> OrchestratorResult<TransferStats> {
        let rows = sqlx::query(
            "SELECT state, COUNT(*) AS count FROM transfer_records GROUP BY state",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = TransferStats::default();
        for row in rows {
            let state: String = row.get("state");
            stats.add(state.parse()?, row.get::<i64, _>("count") as u64);
        }
        Ok(stats)
    }

    async fn health_check(&self) -> OrchestratorResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn record_from_row(row: &PgRow) -> OrchestratorResult<TransferRecord> {
    let lock_id: Option<Vec<u8>> = row.get("lock_id");
    let lock_id = lock_id
        .map(|bytes| {
            <[u8; 32]>::try_from(bytes.as_slice())
                .map(LockId)
                .map_err(|_| OrchestratorError::Storage("lock id must be 32 bytes".to_string()))
        })
        .transpose()?;

    let amount: String = row.get("amount");
    let recipient: String = row.get("recipient");
    let state: String = row.get("state");
    let lock_tx: Option<String> = row.get("lock_tx");
    let mint_tx: Option<String> = row.get("mint_tx");

    Ok(TransferRecord {
        id: row.get("id"),
        lock_id,
        from_chain: row.get::<i64, _>("from_chain") as u64,
        to_chain: row.get::<i64, _>("to_chain") as u64,
        amount: Decimal::from_str(&amount).map_err(storage_error)?,
        recipient: Address::from_str(&recipient).map_err(storage_error)?,
        state: state.parse()?,
        lock_tx: lock_tx.as_deref().map(parse_hash).transpose()?,
        mint_tx: mint_tx.as_deref().map(parse_hash).transpose()?,
        mint_attempts: row.get::<i32, _>("mint_attempts") as u32,
        last_error: row.get("last_error"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    })
}

fn parse_hash(value: &str) -> OrchestratorResult<H256> {
    H256::from_str(value).map_err(storage_error)
}

fn storage_error(e: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_column_format() {
        let hash = H256::repeat_byte(0xab);
        let column = format!("{:?}", hash);
        assert_eq!(column.len(), 66);
        assert_eq!(parse_hash(&column).unwrap(), hash);
        assert!(parse_hash("0x1234").is_err());
    }

    #[test]
    fn test_address_column_format() {
        let address = Address::repeat_byte(0x42);
        let column = format!("{:?}", address);
        assert_eq!(column.len(), 42);
        assert_eq!(Address::from_str(&column).unwrap(), address);
    }
}
