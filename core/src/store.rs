//! SQLite persistence layer: the Ledger Store.
//!
//! RULE: Only the store talks to the database. Components call store
//! methods and propose transitions; the store applies them, enforcing
//! unique constraints, forward-only state machines, optimistic version
//! checks, and the per-partner batch ordering fence.

use crate::{
    error::EngineResult,
    event::EventLogEntry,
    types::{BatchStatus, PayoutStatus, ScheduleKind, Tier},
};
use chrono::Utc;
use rust_decimal::Decimal;
use rusqlite::{params, Connection, Row};
use std::str::FromStr;

mod batch;
mod calculation;
mod partner;
mod payout;
mod rule;

pub struct LedgerStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl LedgerStore {
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        // Writers may briefly contend under concurrent executor workers.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases this returns a new isolated database;
    /// for file-based databases it opens the same file.
    pub fn reopen(&self) -> EngineResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EngineResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/002_calculations.sql"))?;
        self.conn
            .execute_batch(include_str!("../../migrations/003_batches.sql"))?;
        Ok(())
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (component, event_type, payload, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.component,
                entry.event_type,
                entry.payload,
                entry.recorded_at,
            ],
        )?;
        Ok(())
    }

    pub fn event_count(&self, event_type: &str) -> EngineResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM event_log WHERE event_type = ?1",
                params![event_type],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    pub fn events_of_type(&self, event_type: &str) -> EngineResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, component, event_type, payload, recorded_at
             FROM event_log WHERE event_type = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![event_type], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    component: row.get(1)?,
                    event_type: row.get(2)?,
                    payload: row.get(3)?,
                    recorded_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

// ── Row types shared by store submodules ───────────────────────────

#[derive(Debug, Clone)]
pub struct PartnerRow {
    pub partner_id: String,
    pub name: String,
    pub tier: Tier,
    pub parent_id: Option<String>,
    pub channel: String,
    pub monthly_volume: Decimal,
    pub team_size: u32,
    pub retention_rate: Decimal,
    pub active: bool,
    pub last_applied_batch_seq: i64,
}

#[derive(Debug, Clone)]
pub struct BatchRow {
    pub batch_seq: i64,
    pub batch_id: String,
    pub schedule: ScheduleKind,
    pub currency: String,
    pub channel: String,
    pub status: BatchStatus,
    pub requires_approval: bool,
    pub total_amount: Decimal,
    pub created_at: String,
    pub approver_id: Option<String>,
    pub decided_at: Option<String>,
    pub reject_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PayoutRow {
    pub payout_id: String,
    pub batch_id: String,
    pub partner_id: String,
    pub channel: String,
    pub currency: String,
    pub gross_amount: Decimal,
    pub fee_amount: Decimal,
    pub net_amount: Decimal,
    pub idempotency_key: String,
    pub status: PayoutStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub version: i64,
}

// ── Column helpers ─────────────────────────────────────────────────

pub(crate) fn decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn opt_decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        Decimal::from_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

pub(crate) fn enum_col<T>(
    row: &Row<'_>,
    idx: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unrecognized value '{raw}'").into(),
        )
    })
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}
