use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::warn;
use uuid::Uuid;

use super::{EventRecord, EventSink, LedgerEvent};
use crate::ports::AccountId;

struct StoreInner {
    conn: Connection,
    next_seq: u64,
}

/// SQLite-backed append-only event log.
pub struct SqliteEventStore {
    inner: Mutex<StoreInner>,
}

impl SqliteEventStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open event store")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory event store")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS ledger_events (
                id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL UNIQUE,
                ts INTEGER NOT NULL,
                source TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_ledger_events_source_seq ON ledger_events(source, seq)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_ledger_events_kind ON ledger_events(kind)",
            [],
        )?;

        let last_seq: i64 = conn
            .query_row("SELECT COALESCE(MAX(seq), 0) FROM ledger_events", [], |row| {
                row.get(0)
            })
            .context("read last event seq")?;

        Ok(Self {
            inner: Mutex::new(StoreInner {
                conn,
                next_seq: last_seq as u64 + 1,
            }),
        })
    }

    /// Append one call's events inside a single SQLite transaction.
    pub fn append(&self, source: &AccountId, events: Vec<LedgerEvent>) -> Result<Vec<EventRecord>> {
        let mut inner = self.inner.lock();
        let first_seq = inner.next_seq;
        let records: Vec<EventRecord> = events
            .into_iter()
            .enumerate()
            .map(|(i, event)| EventRecord::new(first_seq + i as u64, source, event))
            .collect();

        let tx = inner.conn.transaction().context("begin event append")?;
        for record in &records {
            let payload = serde_json::to_string(&record.event).context("encode event")?;
            tx.execute(
                "INSERT INTO ledger_events (id, seq, ts, source, kind, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id.to_string(),
                    record.seq as i64,
                    record.ts.timestamp_millis(),
                    record.source.as_str(),
                    record.event.kind(),
                    payload,
                ],
            )?;
        }
        tx.commit().context("commit event append")?;

        inner.next_seq = first_seq + records.len() as u64;
        Ok(records)
    }

    /// Events emitted by one ledger, oldest first.
    pub fn by_source(&self, source: &AccountId) -> Result<Vec<EventRecord>> {
        self.query(
            "SELECT id, seq, ts, source, payload FROM ledger_events WHERE source = ?1 ORDER BY seq ASC",
            Some(source.as_str()),
        )
    }

    /// Most recent `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<EventRecord>> {
        let inner = self.inner.lock();
        let mut stmt = inner.conn.prepare(
            "SELECT id, seq, ts, source, payload FROM ledger_events ORDER BY seq DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_parts)?;
        let records = rows
            .map(|row| parts_to_record(row?))
            .collect::<Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn count(&self) -> Result<u64> {
        let inner = self.inner.lock();
        let n: i64 = inner
            .conn
            .query_row("SELECT COUNT(*) FROM ledger_events", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    fn query(&self, sql: &str, source: Option<&str>) -> Result<Vec<EventRecord>> {
        let inner = self.inner.lock();
        let mut stmt = inner.conn.prepare(sql)?;
        let rows = match source {
            Some(source) => stmt.query_map(params![source], row_to_parts)?,
            None => stmt.query_map([], row_to_parts)?,
        };
        let records = rows
            .map(|row| parts_to_record(row?))
            .collect::<Result<Vec<_>>>()?;
        Ok(records)
    }
}

type RowParts = (String, i64, i64, String, String);

fn row_to_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<RowParts> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn parts_to_record((id, seq, ts_ms, source, payload): RowParts) -> Result<EventRecord> {
    Ok(EventRecord {
        id: Uuid::parse_str(&id).context("decode event id")?,
        seq: seq as u64,
        ts: Utc
            .timestamp_millis_opt(ts_ms)
            .single()
            .context("decode event timestamp")?,
        source: AccountId::from(source),
        event: serde_json::from_str(&payload).context("decode event payload")?,
    })
}

impl EventSink for SqliteEventStore {
    fn publish(&self, source: &AccountId, events: Vec<LedgerEvent>) {
        let n = events.len();
        if let Err(e) = self.append(source, events) {
            warn!(source = %source, events = n, error = %e, "event store append failed");
        }
    }
}
