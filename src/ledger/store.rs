//! SQLite-backed ledger store
//!
//! Appends run inside a `BEGIN IMMEDIATE` transaction: SQLite hands out its
//! single write lock before the tail is read, so "read tail, compute next
//! index, insert" is one serialized step across every pooled connection and
//! every process sharing the file. The primary key on `block_index` rejects
//! a duplicate index should that ever be violated.

use super::hash::{block_hash, GENESIS_PREVIOUS_HASH};
use super::{AppendReceipt, Block, BlockPayload, ChainReport, LedgerQuery, Order};
use crate::department::GENERAL_LABEL;
use crate::error::{CivicError, Result};
use crate::storage::{format_timestamp, parse_timestamp, DbPool};
use ahash::AHashSet;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};

/// Department label on the genesis block
const GENESIS_DEPARTMENT: &str = "System";

/// Row exactly as stored; hashing always works from these strings
struct StoredBlock {
    index: i64,
    timestamp: String,
    data: String,
    hash: String,
    previous_hash: String,
    department: String,
}

impl StoredBlock {
    fn recompute_hash(&self) -> String {
        block_hash(
            self.index,
            &self.timestamp,
            &self.data,
            &self.previous_hash,
            &self.department,
        )
    }

    fn into_block(self) -> Result<Block> {
        let timestamp = parse_timestamp(1, &self.timestamp)?;
        let payload = BlockPayload::decode(&self.data)?;
        Ok(Block {
            index: self.index,
            timestamp,
            payload,
            hash: self.hash,
            previous_hash: self.previous_hash,
            department: self.department,
        })
    }
}

/// Durable, append-only, ordered sequence of blocks
#[derive(Clone)]
pub struct LedgerStore {
    pool: DbPool,
}

impl LedgerStore {
    /// Open the ledger, writing the genesis block if the chain is empty
    pub fn open(pool: DbPool) -> Result<Self> {
        let store = Self { pool };
        store.ensure_genesis()?;
        Ok(store)
    }

    fn ensure_genesis(&self) -> Result<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let count: i64 = tx.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;
        if count == 0 {
            let receipt = append_in(&tx, &BlockPayload::genesis(), GENESIS_DEPARTMENT)?;
            tx.commit()?;
            tracing::info!("Genesis block created ({})", receipt.hash);
        }
        Ok(())
    }

    /// Append a block for `payload`, filed under `department`
    pub fn append(&self, payload: &BlockPayload, department: &str) -> Result<AppendReceipt> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let receipt = append_in(&tx, payload, department)?;
        tx.commit()?;

        tracing::info!(
            "Block #{} added to chain: {} complaint={:?}",
            receipt.index,
            payload.action,
            payload.complaint_id
        );
        Ok(receipt)
    }

    /// Every decodable block in the requested order
    pub fn list(&self, order: Order) -> Result<Vec<Block>> {
        Ok(decode_all(self.stored(order)?))
    }

    /// Blocks filed under one department label
    pub fn list_for_department(&self, department: &str, order: Order) -> Result<Vec<Block>> {
        let sql = format!(
            "SELECT block_index, timestamp, data, hash, previous_hash, department
             FROM blocks WHERE department = ?1 ORDER BY block_index {}",
            order_sql(order)
        );
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![department], map_stored)?;

        let mut stored = Vec::new();
        for row in rows {
            stored.push(row?);
        }
        Ok(decode_all(stored))
    }

    /// Audit history of one complaint, oldest first
    pub fn blocks_for_complaint(&self, complaint_id: i64) -> Result<Vec<Block>> {
        Ok(self
            .list(Order::Ascending)?
            .into_iter()
            .filter(|b| b.payload.complaint_id == Some(complaint_id))
            .collect())
    }

    /// Blocks matching every filter in `query`
    pub fn query(&self, query: &LedgerQuery) -> Result<Vec<Block>> {
        let order = query.order();
        let mut blocks = match &query.department {
            Some(department) => self.list_for_department(department, order)?,
            None => self.list(order)?,
        };

        if let Some(id) = query.complaint_id {
            blocks.retain(|b| b.payload.complaint_id == Some(id));
        }
        if let Some(limit) = query.limit {
            blocks.truncate(limit);
        }
        Ok(blocks)
    }

    /// Highest-index block
    pub fn tail(&self) -> Result<Option<Block>> {
        let conn = self.pool.get()?;
        let stored = conn
            .query_row(
                "SELECT block_index, timestamp, data, hash, previous_hash, department
                 FROM blocks ORDER BY block_index DESC LIMIT 1",
                [],
                map_stored,
            )
            .optional()?;
        stored.map(StoredBlock::into_block).transpose()
    }

    /// Number of blocks, genesis included
    pub fn len(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Complaint ids referenced by any block.
    ///
    /// Rows whose payload cannot be decoded are skipped with a warning so a
    /// single bad row cannot hide coverage for everything else.
    pub fn covered_complaint_ids(&self) -> Result<AHashSet<i64>> {
        let mut covered = AHashSet::new();
        for stored in self.stored(Order::Ascending)? {
            match BlockPayload::decode(&stored.data) {
                Ok(payload) => {
                    if let Some(id) = payload.complaint_id {
                        covered.insert(id);
                    }
                }
                Err(e) => {
                    tracing::warn!("Skipping undecodable payload in block #{}: {}", stored.index, e)
                }
            }
        }
        Ok(covered)
    }

    /// Walk the chain from genesis and check every link and hash.
    ///
    /// Tampering, a missing block or a duplicated index is reported as
    /// [`CivicError::HashChainBroken`]; storage failures keep their own
    /// error kinds.
    pub fn verify(&self) -> Result<ChainReport> {
        let stored = self.stored(Order::Ascending)?;
        let mut expected_previous = GENESIS_PREVIOUS_HASH.to_string();

        for (position, block) in stored.iter().enumerate() {
            if block.index != position as i64 {
                return Err(CivicError::HashChainBroken {
                    index: block.index,
                    details: format!("expected index {}, found {}", position, block.index),
                });
            }

            if block.previous_hash != expected_previous {
                return Err(CivicError::HashChainBroken {
                    index: block.index,
                    details: "previous_hash does not match the preceding block".to_string(),
                });
            }

            if block.recompute_hash() != block.hash {
                return Err(CivicError::HashChainBroken {
                    index: block.index,
                    details: "stored hash does not match block contents".to_string(),
                });
            }

            expected_previous = block.hash.clone();
        }

        tracing::debug!("Verified {} blocks", stored.len());

        Ok(ChainReport {
            blocks_checked: stored.len(),
            tip_hash: stored.last().map(|b| b.hash.clone()),
        })
    }

    /// `verify` as a yes/no answer; storage failures still propagate
    pub fn is_intact(&self) -> Result<bool> {
        match self.verify() {
            Ok(_) => Ok(true),
            Err(CivicError::HashChainBroken { index, details }) => {
                tracing::error!("Ledger integrity failure at block #{}: {}", index, details);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn stored(&self, order: Order) -> Result<Vec<StoredBlock>> {
        let sql = format!(
            "SELECT block_index, timestamp, data, hash, previous_hash, department
             FROM blocks ORDER BY block_index {}",
            order_sql(order)
        );
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_stored)?;

        let mut stored = Vec::new();
        for row in rows {
            stored.push(row?);
        }
        Ok(stored)
    }
}

/// Read the tail and insert the next block inside an open immediate transaction
fn append_in(tx: &Transaction<'_>, payload: &BlockPayload, department: &str) -> Result<AppendReceipt> {
    let tail: Option<(i64, String)> = tx
        .query_row(
            "SELECT block_index, hash FROM blocks ORDER BY block_index DESC LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (index, previous_hash) = match tail {
        Some((tail_index, tail_hash)) => (tail_index + 1, tail_hash),
        None => (0, GENESIS_PREVIOUS_HASH.to_string()),
    };

    let department = if department.trim().is_empty() {
        GENERAL_LABEL
    } else {
        department
    };
    let timestamp = format_timestamp(&Utc::now());
    let data = payload.encode()?;
    let hash = block_hash(index, &timestamp, &data, &previous_hash, department);

    tx.execute(
        "INSERT INTO blocks (block_index, timestamp, data, hash, previous_hash, department)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![index, &timestamp, &data, &hash, &previous_hash, department],
    )?;

    Ok(AppendReceipt { index, hash })
}

/// Decode rows for reading. A row that does not decode is skipped with a
/// warning; `verify` still covers it through the raw text.
fn decode_all(stored: Vec<StoredBlock>) -> Vec<Block> {
    stored
        .into_iter()
        .filter_map(|row| {
            let index = row.index;
            match row.into_block() {
                Ok(block) => Some(block),
                Err(e) => {
                    tracing::warn!("Skipping undecodable block #{}: {}", index, e);
                    None
                }
            }
        })
        .collect()
}

fn map_stored(row: &rusqlite::Row<'_>) -> std::result::Result<StoredBlock, rusqlite::Error> {
    Ok(StoredBlock {
        index: row.get(0)?,
        timestamp: row.get(1)?,
        data: row.get(2)?,
        hash: row.get(3)?,
        previous_hash: row.get(4)?,
        department: row.get(5)?,
    })
}

fn order_sql(order: Order) -> &'static str {
    match order {
        Order::Ascending => "ASC",
        Order::Descending => "DESC",
    }
}
