//! Durable correlation cache: fingerprint → (last notification, ticket id).
//!
//! # Schema
//! - `events`: one record per fingerprint, payload is the JSON-encoded
//!   [`EventTicket`].
//! - `pending_events`: reserved, never touched.
//!
//! # SQLite settings
//! Applied at open: WAL, synchronous=FULL, foreign_keys=ON.
//! PRAGMA integrity_check runs at open; a corrupt file is an error.
//!
//! The cache is soft state: losing it makes the engine treat the next event
//! per fingerprint as fresh, which is acceptable.

use icinga_client::Notification;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::Path;
use tracing::debug;

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// 64-bit FNV-1a of `host || service`.
///
/// Only host and service contribute, so repeated notifications for the same
/// check hash identically regardless of their payload. Not collision
/// resistant, but deterministic across processes and platforms.
pub fn fingerprint(n: &Notification) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for byte in n.host.bytes().chain(n.service.bytes()) {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// The cache key: big-endian fingerprint bytes, so BLOB order is key order.
fn key(n: &Notification) -> [u8; 8] {
    fingerprint(n).to_be_bytes()
}

// ---------------------------------------------------------------------------
// EventTicket
// ---------------------------------------------------------------------------

/// One cache record: the last-seen notification and its ticket.
///
/// A ticket id of `-1` means "no ticket". The serde names double as the
/// import/export text format, one record per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTicket {
    #[serde(rename = "Event")]
    pub event: Notification,
    #[serde(rename = "TicketID")]
    pub ticket_id: i64,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),
    #[error("malformed record: {0}")]
    MalformedRecord(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("import line {line}: {reason}")]
    Import { line: usize, reason: String },
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// The single-file correlation cache.
///
/// Every mutation is one SQL statement, i.e. one transaction; no operation
/// spans transactions.
pub struct Cache {
    conn: Connection,
}

impl Cache {
    /// Open (or create) the cache at the given path.
    ///
    /// Applies PRAGMAs, runs `PRAGMA integrity_check`, and creates tables if
    /// needed. Returns `Err` if integrity_check fails.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=FULL;
             PRAGMA foreign_keys=ON;",
        )?;

        let check: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
        if check != "ok" {
            return Err(CacheError::IntegrityCheckFailed(check));
        }

        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Cache { conn })
    }

    /// The record stored for the notification's fingerprint, if any.
    pub fn get(&self, n: &Notification) -> Result<Option<(Notification, i64)>, CacheError> {
        debug!(host = %n.host, service = %n.service, "cache: get event");

        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM events WHERE fingerprint = ?1",
                params![key(n).as_slice()],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            None => Ok(None),
            Some(bytes) => {
                let record: EventTicket = serde_json::from_slice(&bytes)
                    .map_err(|e| CacheError::MalformedRecord(e.to_string()))?;
                Ok(Some((record.event, record.ticket_id)))
            }
        }
    }

    /// Insert or overwrite the record at the notification's fingerprint.
    pub fn put(&mut self, n: &Notification, ticket_id: i64) -> Result<(), CacheError> {
        debug!(host = %n.host, service = %n.service, ticket_id, "cache: update event");

        let record = EventTicket {
            event: n.clone(),
            ticket_id,
        };
        let payload = serde_json::to_vec(&record)
            .map_err(|e| CacheError::MalformedRecord(e.to_string()))?;

        self.conn.execute(
            "INSERT INTO events (fingerprint, payload) VALUES (?1, ?2)
             ON CONFLICT (fingerprint) DO UPDATE SET payload = excluded.payload",
            params![key(n).as_slice(), payload],
        )?;
        Ok(())
    }

    /// Remove the record at the notification's fingerprint; no-op when absent.
    pub fn delete(&mut self, n: &Notification) -> Result<(), CacheError> {
        debug!(host = %n.host, service = %n.service, "cache: delete event");

        self.conn.execute(
            "DELETE FROM events WHERE fingerprint = ?1",
            params![key(n).as_slice()],
        )?;
        Ok(())
    }

    /// Stream all records as newline-delimited JSON, in ascending key order.
    ///
    /// Returns the number of records written. Payloads are stored as the
    /// export encoding, so this is a straight dump.
    pub fn write_to(&self, w: &mut dyn Write) -> Result<usize, CacheError> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM events ORDER BY fingerprint")?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;

        let mut count = 0;
        for row in rows {
            w.write_all(&row?)?;
            w.write_all(b"\n")?;
            count += 1;
        }
        Ok(count)
    }

    /// Consume a newline-delimited JSON stream, inserting each record.
    ///
    /// Each record is its own unit of atomicity: a malformed line aborts with
    /// an error naming it, records already inserted stay.
    pub fn read_from(&mut self, r: &mut dyn BufRead) -> Result<usize, CacheError> {
        let mut count = 0;
        for (idx, line) in r.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let record: EventTicket =
                serde_json::from_str(&line).map_err(|e| CacheError::Import {
                    line: idx + 1,
                    reason: e.to_string(),
                })?;
            self.put(&record.event, record.ticket_id)?;
            count += 1;
        }
        Ok(count)
    }
}
