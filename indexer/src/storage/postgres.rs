//! Postgres store.
//!
//! Unsigned 64-bit values are stored as `NUMERIC` through
//! [`rust_decimal::Decimal`]; positions as their 40-byte sortable key.
//! Amounts use `NUMERIC(39, 0)` and cross the wire as decimal text
//! (`$n::text::numeric` on write, `column::text` on read), so the whole
//! `i128` range round-trips.

use std::fmt::Display;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::{PgExecutor, PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::info;

use super::{StorageError, Store, StoreTx};
use crate::checkpoint::Checkpoint;
use crate::events::{ContractId, IndexedEvent, Position};
use crate::projection::{
    EntityKind, EntityRef, GrantRecord, GrantStatus, ProjectionSnapshot, ProposalRecord,
    ProposalStatus, QuarantineRecord, RewardRecord, TradeRecord,
};

/// Derived tables cleared by [`StoreTx::clear_projection`].
const PROJECTION_TABLES: [&str; 6] = [
    "trades",
    "proposals",
    "rewards",
    "grants",
    "quarantined_entities",
    "checkpoints",
];

const TRADE_COLUMNS: &str = "contract_id, trade_id, maker, taker, base_asset, quote_asset, \
    base_amount::text AS base_amount, quote_amount::text AS quote_amount, executed_at, position";

const REWARD_COLUMNS: &str = "contract_id, reward_id, recipient, amount::text AS amount, reason, \
    added_at, claimed, claimed_amount::text AS claimed_amount, claimed_at, created_position, \
    claim_position";

const GRANT_COLUMNS: &str = "contract_id, grant_id, beneficiary, amount::text AS amount, \
    start_time, cliff_seconds, duration_seconds, granted_at, total_claimed::text AS total_claimed, \
    claim_count, status, revoked_at, unvested_amount::text AS unvested_amount, created_position, \
    last_position";

/// Postgres-backed [`Store`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        info!(max_connections, "connecting to database");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("database connection established");
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        info!("running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Permanent(format!("migration failed: {e}")))?;

        info!("migrations completed");
        Ok(())
    }

    /// Returns the connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Closes the pool.
    pub async fn close(&self) {
        info!("closing database connection");
        self.pool.close().await;
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self, contract_id: &ContractId) -> Result<PgTx, StorageError> {
        let tx = self.pool.begin().await?;
        Ok(PgTx {
            contract_id: contract_id.clone(),
            tx,
        })
    }

    async fn checkpoint(
        &self,
        contract_id: &ContractId,
    ) -> Result<Option<Checkpoint>, StorageError> {
        fetch_checkpoint(&self.pool, contract_id).await
    }

    async fn indexed_events(
        &self,
        contract_id: &ContractId,
    ) -> Result<Vec<IndexedEvent>, StorageError> {
        fetch_indexed_events(&self.pool, contract_id).await
    }

    async fn trade(
        &self,
        contract_id: &ContractId,
        trade_id: u64,
    ) -> Result<Option<TradeRecord>, StorageError> {
        fetch_trade(&self.pool, contract_id, trade_id).await
    }

    async fn proposal(
        &self,
        contract_id: &ContractId,
        proposal_id: u64,
    ) -> Result<Option<ProposalRecord>, StorageError> {
        fetch_proposal(&self.pool, contract_id, proposal_id).await
    }

    async fn reward(
        &self,
        contract_id: &ContractId,
        reward_id: u64,
    ) -> Result<Option<RewardRecord>, StorageError> {
        fetch_reward(&self.pool, contract_id, reward_id).await
    }

    async fn grant(
        &self,
        contract_id: &ContractId,
        grant_id: u64,
    ) -> Result<Option<GrantRecord>, StorageError> {
        fetch_grant(&self.pool, contract_id, grant_id).await
    }

    async fn snapshot(
        &self,
        contract_id: &ContractId,
    ) -> Result<ProjectionSnapshot, StorageError> {
        let trades = fetch_all(&self.pool, contract_id, "trades", TRADE_COLUMNS, "trade_id").await?;
        let proposals =
            fetch_all(&self.pool, contract_id, "proposals", "*", "proposal_id").await?;
        let rewards =
            fetch_all(&self.pool, contract_id, "rewards", REWARD_COLUMNS, "reward_id").await?;
        let grants = fetch_all(&self.pool, contract_id, "grants", GRANT_COLUMNS, "grant_id").await?;
        let quarantined = fetch_all(
            &self.pool,
            contract_id,
            "quarantined_entities",
            "*",
            "entity_kind, entity_id",
        )
        .await?;

        let mut quarantined = quarantined
            .iter()
            .map(quarantine_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        quarantined.sort_by_key(|record| record.entity);

        Ok(ProjectionSnapshot {
            trades: trades.iter().map(trade_from_row).collect::<Result<_, _>>()?,
            proposals: proposals
                .iter()
                .map(proposal_from_row)
                .collect::<Result<_, _>>()?,
            rewards: rewards.iter().map(reward_from_row).collect::<Result<_, _>>()?,
            grants: grants.iter().map(grant_from_row).collect::<Result<_, _>>()?,
            quarantined,
        })
    }
}

/// Transaction over one contract's rows.
#[derive(Debug)]
pub struct PgTx {
    contract_id: ContractId,
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    fn contract_id(&self) -> &ContractId {
        &self.contract_id
    }

    async fn checkpoint(&mut self) -> Result<Option<Checkpoint>, StorageError> {
        fetch_checkpoint(&mut *self.tx, &self.contract_id).await
    }

    async fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (contract_id, position, events_applied, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (contract_id) DO UPDATE SET
                position = EXCLUDED.position,
                events_applied = EXCLUDED.events_applied,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(checkpoint.contract_id.as_str())
        .bind(checkpoint.position.to_key().to_vec())
        .bind(Decimal::from(checkpoint.events_applied))
        .bind(checkpoint.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn clear_projection(&mut self) -> Result<(), StorageError> {
        for table in PROJECTION_TABLES {
            let sql = format!("DELETE FROM {table} WHERE contract_id = $1");
            sqlx::query(&sql)
                .bind(self.contract_id.as_str())
                .execute(&mut *self.tx)
                .await?;
        }
        Ok(())
    }

    async fn indexed_event(
        &mut self,
        position: &Position,
    ) -> Result<Option<IndexedEvent>, StorageError> {
        let row = sqlx::query(
            "SELECT * FROM indexed_events WHERE contract_id = $1 AND position = $2",
        )
        .bind(self.contract_id.as_str())
        .bind(position.to_key().to_vec())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(indexed_event_from_row).transpose()
    }

    async fn append_indexed_event(&mut self, event: &IndexedEvent) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO indexed_events (
                contract_id, position, topic, ledger, ledger_closed_at,
                raw_payload, decoded_payload, decode_error, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.contract_id.as_str())
        .bind(event.position.to_key().to_vec())
        .bind(&event.topic)
        .bind(i64::from(event.position.ledger))
        .bind(event.ledger_closed_at)
        .bind(&event.raw_payload)
        .bind(&event.decoded_payload)
        .bind(&event.decode_error)
        .bind(event.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn indexed_events(&mut self) -> Result<Vec<IndexedEvent>, StorageError> {
        fetch_indexed_events(&mut *self.tx, &self.contract_id).await
    }

    async fn load_trade(&mut self, trade_id: u64) -> Result<Option<TradeRecord>, StorageError> {
        fetch_trade(&mut *self.tx, &self.contract_id, trade_id).await
    }

    async fn save_trade(&mut self, row: &TradeRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                contract_id, trade_id, maker, taker, base_asset, quote_asset,
                base_amount, quote_amount, executed_at, position
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7::text::numeric, $8::text::numeric, $9, $10)
            ON CONFLICT (contract_id, trade_id) DO UPDATE SET
                maker = EXCLUDED.maker,
                taker = EXCLUDED.taker,
                base_asset = EXCLUDED.base_asset,
                quote_asset = EXCLUDED.quote_asset,
                base_amount = EXCLUDED.base_amount,
                quote_amount = EXCLUDED.quote_amount,
                executed_at = EXCLUDED.executed_at,
                position = EXCLUDED.position
            "#,
        )
        .bind(row.contract_id.as_str())
        .bind(Decimal::from(row.trade_id))
        .bind(&row.maker)
        .bind(&row.taker)
        .bind(&row.base_asset)
        .bind(&row.quote_asset)
        .bind(row.base_amount.to_string())
        .bind(row.quote_amount.to_string())
        .bind(Decimal::from(row.executed_at))
        .bind(row.position.to_key().to_vec())
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn load_proposal(
        &mut self,
        proposal_id: u64,
    ) -> Result<Option<ProposalRecord>, StorageError> {
        fetch_proposal(&mut *self.tx, &self.contract_id, proposal_id).await
    }

    async fn save_proposal(&mut self, row: &ProposalRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO proposals (
                contract_id, proposal_id, proposer, title, approval_threshold,
                current_approvals, status, created_at, closed_at,
                created_position, last_position
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (contract_id, proposal_id) DO UPDATE SET
                proposer = EXCLUDED.proposer,
                title = EXCLUDED.title,
                approval_threshold = EXCLUDED.approval_threshold,
                current_approvals = EXCLUDED.current_approvals,
                status = EXCLUDED.status,
                created_at = EXCLUDED.created_at,
                closed_at = EXCLUDED.closed_at,
                created_position = EXCLUDED.created_position,
                last_position = EXCLUDED.last_position
            "#,
        )
        .bind(row.contract_id.as_str())
        .bind(Decimal::from(row.proposal_id))
        .bind(&row.proposer)
        .bind(&row.title)
        .bind(i64::from(row.approval_threshold))
        .bind(i64::from(row.current_approvals))
        .bind(row.status.as_str())
        .bind(Decimal::from(row.created_at))
        .bind(row.closed_at.map(Decimal::from))
        .bind(row.created_position.to_key().to_vec())
        .bind(row.last_position.to_key().to_vec())
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn load_reward(&mut self, reward_id: u64) -> Result<Option<RewardRecord>, StorageError> {
        fetch_reward(&mut *self.tx, &self.contract_id, reward_id).await
    }

    async fn save_reward(&mut self, row: &RewardRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO rewards (
                contract_id, reward_id, recipient, amount, reason, added_at,
                claimed, claimed_amount, claimed_at, created_position, claim_position
            )
            VALUES (
                $1, $2, $3, $4::text::numeric, $5, $6, $7, $8::text::numeric, $9, $10, $11
            )
            ON CONFLICT (contract_id, reward_id) DO UPDATE SET
                recipient = EXCLUDED.recipient,
                amount = EXCLUDED.amount,
                reason = EXCLUDED.reason,
                added_at = EXCLUDED.added_at,
                claimed = EXCLUDED.claimed,
                claimed_amount = EXCLUDED.claimed_amount,
                claimed_at = EXCLUDED.claimed_at,
                created_position = EXCLUDED.created_position,
                claim_position = EXCLUDED.claim_position
            "#,
        )
        .bind(row.contract_id.as_str())
        .bind(Decimal::from(row.reward_id))
        .bind(&row.recipient)
        .bind(row.amount.to_string())
        .bind(&row.reason)
        .bind(Decimal::from(row.added_at))
        .bind(row.claimed)
        .bind(row.claimed_amount.map(|amount| amount.to_string()))
        .bind(row.claimed_at.map(Decimal::from))
        .bind(row.created_position.to_key().to_vec())
        .bind(row.claim_position.map(|p| p.to_key().to_vec()))
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn load_grant(&mut self, grant_id: u64) -> Result<Option<GrantRecord>, StorageError> {
        fetch_grant(&mut *self.tx, &self.contract_id, grant_id).await
    }

    async fn save_grant(&mut self, row: &GrantRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO grants (
                contract_id, grant_id, beneficiary, amount, start_time,
                cliff_seconds, duration_seconds, granted_at, total_claimed,
                claim_count, status, revoked_at, unvested_amount,
                created_position, last_position
            )
            VALUES (
                $1, $2, $3, $4::text::numeric, $5, $6, $7, $8, $9::text::numeric,
                $10, $11, $12, $13::text::numeric, $14, $15
            )
            ON CONFLICT (contract_id, grant_id) DO UPDATE SET
                beneficiary = EXCLUDED.beneficiary,
                amount = EXCLUDED.amount,
                start_time = EXCLUDED.start_time,
                cliff_seconds = EXCLUDED.cliff_seconds,
                duration_seconds = EXCLUDED.duration_seconds,
                granted_at = EXCLUDED.granted_at,
                total_claimed = EXCLUDED.total_claimed,
                claim_count = EXCLUDED.claim_count,
                status = EXCLUDED.status,
                revoked_at = EXCLUDED.revoked_at,
                unvested_amount = EXCLUDED.unvested_amount,
                created_position = EXCLUDED.created_position,
                last_position = EXCLUDED.last_position
            "#,
        )
        .bind(row.contract_id.as_str())
        .bind(Decimal::from(row.grant_id))
        .bind(&row.beneficiary)
        .bind(row.amount.to_string())
        .bind(Decimal::from(row.start_time))
        .bind(Decimal::from(row.cliff_seconds))
        .bind(Decimal::from(row.duration_seconds))
        .bind(Decimal::from(row.granted_at))
        .bind(row.total_claimed.to_string())
        .bind(i64::from(row.claim_count))
        .bind(row.status.as_str())
        .bind(row.revoked_at.map(Decimal::from))
        .bind(row.unvested_amount.map(|amount| amount.to_string()))
        .bind(row.created_position.to_key().to_vec())
        .bind(row.last_position.to_key().to_vec())
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn load_quarantine(
        &mut self,
        entity: &EntityRef,
    ) -> Result<Option<QuarantineRecord>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM quarantined_entities
            WHERE contract_id = $1 AND entity_kind = $2 AND entity_id = $3
            "#,
        )
        .bind(self.contract_id.as_str())
        .bind(entity.kind.as_str())
        .bind(Decimal::from(entity.id))
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(quarantine_from_row).transpose()
    }

    async fn save_quarantine(&mut self, record: &QuarantineRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO quarantined_entities (contract_id, entity_kind, entity_id, position, reason)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (contract_id, entity_kind, entity_id) DO NOTHING
            "#,
        )
        .bind(record.contract_id.as_str())
        .bind(record.entity.kind.as_str())
        .bind(Decimal::from(record.entity.id))
        .bind(record.position.to_key().to_vec())
        .bind(&record.reason)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self) -> Result<(), StorageError> {
        self.tx.commit().await?;
        Ok(())
    }
}

async fn fetch_checkpoint<'e, E: PgExecutor<'e>>(
    executor: E,
    contract_id: &ContractId,
) -> Result<Option<Checkpoint>, StorageError> {
    let row = sqlx::query("SELECT * FROM checkpoints WHERE contract_id = $1")
        .bind(contract_id.as_str())
        .fetch_optional(executor)
        .await?;

    row.map(|row| -> Result<Checkpoint, StorageError> {
        Ok(Checkpoint {
            contract_id: contract_id.clone(),
            position: get_position(&row, "position")?,
            events_applied: get_u64(&row, "events_applied")?,
            updated_at: row.try_get("updated_at")?,
        })
    })
    .transpose()
}

async fn fetch_indexed_events<'e, E: PgExecutor<'e>>(
    executor: E,
    contract_id: &ContractId,
) -> Result<Vec<IndexedEvent>, StorageError> {
    let rows = sqlx::query("SELECT * FROM indexed_events WHERE contract_id = $1 ORDER BY position")
        .bind(contract_id.as_str())
        .fetch_all(executor)
        .await?;

    rows.iter().map(indexed_event_from_row).collect()
}

async fn fetch_all<'e, E: PgExecutor<'e>>(
    executor: E,
    contract_id: &ContractId,
    table: &str,
    columns: &str,
    order_by: &str,
) -> Result<Vec<PgRow>, StorageError> {
    let sql = format!("SELECT {columns} FROM {table} WHERE contract_id = $1 ORDER BY {order_by}");
    Ok(sqlx::query(&sql)
        .bind(contract_id.as_str())
        .fetch_all(executor)
        .await?)
}

async fn fetch_trade<'e, E: PgExecutor<'e>>(
    executor: E,
    contract_id: &ContractId,
    trade_id: u64,
) -> Result<Option<TradeRecord>, StorageError> {
    let sql = format!("SELECT {TRADE_COLUMNS} FROM trades WHERE contract_id = $1 AND trade_id = $2");
    let row = sqlx::query(&sql)
        .bind(contract_id.as_str())
        .bind(Decimal::from(trade_id))
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(trade_from_row).transpose()
}

async fn fetch_proposal<'e, E: PgExecutor<'e>>(
    executor: E,
    contract_id: &ContractId,
    proposal_id: u64,
) -> Result<Option<ProposalRecord>, StorageError> {
    let row = sqlx::query("SELECT * FROM proposals WHERE contract_id = $1 AND proposal_id = $2")
        .bind(contract_id.as_str())
        .bind(Decimal::from(proposal_id))
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(proposal_from_row).transpose()
}

async fn fetch_reward<'e, E: PgExecutor<'e>>(
    executor: E,
    contract_id: &ContractId,
    reward_id: u64,
) -> Result<Option<RewardRecord>, StorageError> {
    let sql = format!("SELECT {REWARD_COLUMNS} FROM rewards WHERE contract_id = $1 AND reward_id = $2");
    let row = sqlx::query(&sql)
        .bind(contract_id.as_str())
        .bind(Decimal::from(reward_id))
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(reward_from_row).transpose()
}

async fn fetch_grant<'e, E: PgExecutor<'e>>(
    executor: E,
    contract_id: &ContractId,
    grant_id: u64,
) -> Result<Option<GrantRecord>, StorageError> {
    let sql = format!("SELECT {GRANT_COLUMNS} FROM grants WHERE contract_id = $1 AND grant_id = $2");
    let row = sqlx::query(&sql)
        .bind(contract_id.as_str())
        .bind(Decimal::from(grant_id))
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(grant_from_row).transpose()
}

fn indexed_event_from_row(row: &PgRow) -> Result<IndexedEvent, StorageError> {
    let ledger_closed_at: DateTime<Utc> = row.try_get("ledger_closed_at")?;
    let raw_payload: Value = row.try_get("raw_payload")?;

    Ok(IndexedEvent {
        contract_id: ContractId::new(row.try_get::<String, _>("contract_id")?),
        topic: row.try_get("topic")?,
        position: get_position(row, "position")?,
        ledger_closed_at,
        raw_payload,
        decoded_payload: row.try_get("decoded_payload")?,
        decode_error: row.try_get("decode_error")?,
        created_at: row.try_get("created_at")?,
    })
}

fn trade_from_row(row: &PgRow) -> Result<TradeRecord, StorageError> {
    Ok(TradeRecord {
        contract_id: ContractId::new(row.try_get::<String, _>("contract_id")?),
        trade_id: get_u64(row, "trade_id")?,
        maker: row.try_get("maker")?,
        taker: row.try_get("taker")?,
        base_asset: row.try_get("base_asset")?,
        quote_asset: row.try_get("quote_asset")?,
        base_amount: get_i128(row, "base_amount")?,
        quote_amount: get_i128(row, "quote_amount")?,
        executed_at: get_u64(row, "executed_at")?,
        position: get_position(row, "position")?,
    })
}

fn proposal_from_row(row: &PgRow) -> Result<ProposalRecord, StorageError> {
    let status: String = row.try_get("status")?;

    Ok(ProposalRecord {
        contract_id: ContractId::new(row.try_get::<String, _>("contract_id")?),
        proposal_id: get_u64(row, "proposal_id")?,
        proposer: row.try_get("proposer")?,
        title: row.try_get("title")?,
        approval_threshold: get_u32(row, "approval_threshold")?,
        current_approvals: get_u32(row, "current_approvals")?,
        status: ProposalStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        created_at: get_u64(row, "created_at")?,
        closed_at: get_opt_u64(row, "closed_at")?,
        created_position: get_position(row, "created_position")?,
        last_position: get_position(row, "last_position")?,
    })
}

fn reward_from_row(row: &PgRow) -> Result<RewardRecord, StorageError> {
    Ok(RewardRecord {
        contract_id: ContractId::new(row.try_get::<String, _>("contract_id")?),
        reward_id: get_u64(row, "reward_id")?,
        recipient: row.try_get("recipient")?,
        amount: get_i128(row, "amount")?,
        reason: row.try_get("reason")?,
        added_at: get_u64(row, "added_at")?,
        claimed: row.try_get("claimed")?,
        claimed_amount: get_opt_i128(row, "claimed_amount")?,
        claimed_at: get_opt_u64(row, "claimed_at")?,
        created_position: get_position(row, "created_position")?,
        claim_position: get_opt_position(row, "claim_position")?,
    })
}

fn grant_from_row(row: &PgRow) -> Result<GrantRecord, StorageError> {
    let status: String = row.try_get("status")?;

    Ok(GrantRecord {
        contract_id: ContractId::new(row.try_get::<String, _>("contract_id")?),
        grant_id: get_u64(row, "grant_id")?,
        beneficiary: row.try_get("beneficiary")?,
        amount: get_i128(row, "amount")?,
        start_time: get_u64(row, "start_time")?,
        cliff_seconds: get_u64(row, "cliff_seconds")?,
        duration_seconds: get_u64(row, "duration_seconds")?,
        granted_at: get_u64(row, "granted_at")?,
        total_claimed: get_i128(row, "total_claimed")?,
        claim_count: get_u32(row, "claim_count")?,
        status: GrantStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        revoked_at: get_opt_u64(row, "revoked_at")?,
        unvested_amount: get_opt_i128(row, "unvested_amount")?,
        created_position: get_position(row, "created_position")?,
        last_position: get_position(row, "last_position")?,
    })
}

fn quarantine_from_row(row: &PgRow) -> Result<QuarantineRecord, StorageError> {
    let kind: String = row.try_get("entity_kind")?;

    Ok(QuarantineRecord {
        contract_id: ContractId::new(row.try_get::<String, _>("contract_id")?),
        entity: EntityRef {
            kind: EntityKind::parse(&kind).ok_or_else(|| corrupt("entity_kind", &kind))?,
            id: get_u64(row, "entity_id")?,
        },
        position: get_position(row, "position")?,
        reason: row.try_get("reason")?,
    })
}

fn corrupt(column: &str, value: impl Display) -> StorageError {
    StorageError::Permanent(format!("column {column} holds invalid value {value}"))
}

fn decimal_to_u64(column: &str, value: Decimal) -> Result<u64, StorageError> {
    if !value.fract().is_zero() {
        return Err(corrupt(column, value));
    }
    value.to_u64().ok_or_else(|| corrupt(column, value))
}

fn parse_amount(column: &str, text: &str) -> Result<i128, StorageError> {
    text.parse::<i128>().map_err(|_| corrupt(column, text))
}

fn get_u64(row: &PgRow, column: &str) -> Result<u64, StorageError> {
    decimal_to_u64(column, row.try_get(column)?)
}

fn get_opt_u64(row: &PgRow, column: &str) -> Result<Option<u64>, StorageError> {
    let value: Option<Decimal> = row.try_get(column)?;
    value.map(|v| decimal_to_u64(column, v)).transpose()
}

fn get_i128(row: &PgRow, column: &str) -> Result<i128, StorageError> {
    let text: String = row.try_get(column)?;
    parse_amount(column, &text)
}

fn get_opt_i128(row: &PgRow, column: &str) -> Result<Option<i128>, StorageError> {
    let text: Option<String> = row.try_get(column)?;
    text.map(|t| parse_amount(column, &t)).transpose()
}

fn get_u32(row: &PgRow, column: &str) -> Result<u32, StorageError> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value).map_err(|_| corrupt(column, value))
}

fn position_from_bytes(column: &str, bytes: &[u8]) -> Result<Position, StorageError> {
    Position::from_key(bytes).map_err(|e| StorageError::Permanent(format!("column {column}: {e}")))
}

fn get_position(row: &PgRow, column: &str) -> Result<Position, StorageError> {
    let bytes: Vec<u8> = row.try_get(column)?;
    position_from_bytes(column, &bytes)
}

fn get_opt_position(row: &PgRow, column: &str) -> Result<Option<Position>, StorageError> {
    let bytes: Option<Vec<u8>> = row.try_get(column)?;
    bytes
        .map(|b| position_from_bytes(column, &b))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amounts_beyond_decimal_range() {
        // 10^29 is above the 96-bit mantissa of `Decimal`.
        let big = 100_000_000_000_000_000_000_000_000_000_i128;
        assert!(Decimal::try_from_i128_with_scale(big, 0).is_err());
        assert_eq!(parse_amount("amount", &big.to_string()).expect("amount"), big);

        for value in [i128::MAX, i128::MIN, -big, 0] {
            assert_eq!(parse_amount("amount", &value.to_string()).expect("amount"), value);
        }
    }

    #[test]
    fn test_parse_amount_rejects_non_integers() {
        for bad in ["1.5", "", "NaN", "170141183460469231731687303715884105728"] {
            let err = parse_amount("amount", bad).expect_err("invalid");
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn test_decimal_to_integers() {
        assert_eq!(decimal_to_u64("c", Decimal::from(u64::MAX)).expect("u64"), u64::MAX);
        assert!(decimal_to_u64("c", Decimal::from(-1)).is_err());
        assert!(decimal_to_u64("c", Decimal::new(15, 1)).is_err());
    }

    #[test]
    fn test_amount_columns_cast_to_text() {
        for (columns, amounts) in [
            (TRADE_COLUMNS, &["base_amount", "quote_amount"][..]),
            (REWARD_COLUMNS, &["amount", "claimed_amount"][..]),
            (GRANT_COLUMNS, &["amount", "total_claimed", "unvested_amount"][..]),
        ] {
            for column in amounts {
                assert!(
                    columns.contains(&format!("{column}::text AS {column}")),
                    "{column} is not read as text"
                );
            }
        }
    }

    #[test]
    fn test_position_from_bytes() {
        let position = Position::new(9, crate::events::TxHash::new([3u8; 32]), 1);
        assert_eq!(
            position_from_bytes("position", &position.to_key()).expect("position"),
            position
        );

        let err = position_from_bytes("position", &[0u8; 3]).expect_err("short");
        assert_eq!(
            err,
            StorageError::Permanent("column position: invalid position key length: 3".to_string())
        );
    }
}
