//! SQLite-backed command store.
//!
//! Owns the history schema: the `commands` table with its FTS5 shadow index
//! (kept in sync by triggers) and the `embedding_cache` snapshot table used to
//! warm-start the in-memory cache. One connection serves the interactive path
//! and the worker pool; it sits behind a mutex so the store is `Send + Sync`
//! while SQLite serializes the actual writes.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};

use super::EmbeddingStatus;
use crate::embeddings::vector::cosine_similarity_bytes;

/// One executed shell command as persisted.
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub id: i64,
    pub command: String,
    pub timestamp: DateTime<Utc>,
    pub exit_code: i32,
    pub duration_ms: i64,
    pub working_dir: String,
    pub output_preview: String,
    pub embedding: Option<Vec<u8>>,
    pub command_hash: String,
    pub last_used: Option<DateTime<Utc>>,
    pub status: EmbeddingStatus,
}

impl CommandRecord {
    /// A fresh record for a command that just finished executing.
    pub fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        let command_hash = hash_command(&command);
        Self {
            id: 0,
            command,
            timestamp: Utc::now(),
            exit_code: 0,
            duration_ms: 0,
            working_dir: String::new(),
            output_preview: String::new(),
            embedding: None,
            command_hash,
            last_used: None,
            status: EmbeddingStatus::Pending,
        }
    }
}

/// Result of a deduplicated save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// First sighting of this command text; a new row was inserted.
    New(i64),
    /// The hash already existed; `last_used` was refreshed on this row.
    Existing(i64),
}

impl SaveOutcome {
    pub fn id(&self) -> i64 {
        match self {
            SaveOutcome::New(id) | SaveOutcome::Existing(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, SaveOutcome::New(_))
    }
}

/// A semantic search hit with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredCommand {
    pub record: CommandRecord,
    pub similarity: f32,
}

/// Aggregate history statistics.
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    pub total_commands: i64,
    pub commands_today: i64,
    pub avg_duration_ms: f64,
    pub embedded_commands: i64,
    pub pending_embeddings: i64,
    pub failed_embeddings: i64,
}

/// Entry of the persisted embedding-cache snapshot.
#[derive(Debug, Clone)]
pub struct CacheSnapshotEntry {
    pub command_text: String,
    pub embedding: Vec<u8>,
    pub last_accessed: DateTime<Utc>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS commands (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    command TEXT NOT NULL,
    timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
    exit_code INTEGER DEFAULT 0,
    duration_ms INTEGER DEFAULT 0,
    working_dir TEXT,
    output_preview TEXT,
    embedding BLOB,
    command_hash TEXT,
    last_used DATETIME,
    embedding_status TEXT DEFAULT 'pending'
);

CREATE VIRTUAL TABLE IF NOT EXISTS commands_fts USING fts5(
    command,
    output_preview,
    content='commands',
    content_rowid='id'
);

CREATE TRIGGER IF NOT EXISTS commands_ai AFTER INSERT ON commands BEGIN
    INSERT INTO commands_fts(rowid, command, output_preview)
    VALUES (new.id, new.command, new.output_preview);
END;

CREATE TRIGGER IF NOT EXISTS commands_ad AFTER DELETE ON commands BEGIN
    INSERT INTO commands_fts(commands_fts, rowid, command, output_preview)
    VALUES ('delete', old.id, old.command, old.output_preview);
END;

CREATE TRIGGER IF NOT EXISTS commands_au AFTER UPDATE ON commands BEGIN
    INSERT INTO commands_fts(commands_fts, rowid, command, output_preview)
    VALUES ('delete', old.id, old.command, old.output_preview);
    INSERT INTO commands_fts(rowid, command, output_preview)
    VALUES (new.id, new.command, new.output_preview);
END;

CREATE INDEX IF NOT EXISTS idx_timestamp ON commands(timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_working_dir ON commands(working_dir);
CREATE INDEX IF NOT EXISTS idx_command_hash ON commands(command_hash);
CREATE INDEX IF NOT EXISTS idx_embedding_status ON commands(embedding_status);
CREATE INDEX IF NOT EXISTS idx_has_embedding ON commands(embedding) WHERE embedding IS NOT NULL;

CREATE TABLE IF NOT EXISTS embedding_cache (
    command_text TEXT PRIMARY KEY,
    embedding BLOB NOT NULL,
    hit_count INTEGER DEFAULT 0,
    last_accessed DATETIME DEFAULT CURRENT_TIMESTAMP
);
";

/// Phase-1 candidate window for semantic search.
const SEMANTIC_CANDIDATE_LIMIT: usize = 1000;
/// Below this many FTS matches, phase 1 widens to plain recency.
const SEMANTIC_MIN_FTS_MATCHES: usize = 50;

pub struct CommandStore {
    conn: Mutex<Connection>,
}

impl CommandStore {
    /// Open (or create) the history database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open history database")?;

        // WAL keeps the interactive path readable while workers write.
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL mode")?;

        Self::init(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("failed to create in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("failed to initialize history schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a row unconditionally, keeping any embedding already present.
    pub fn save_command(&self, record: &CommandRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO commands
                 (command, timestamp, exit_code, duration_ms, working_dir,
                  output_preview, embedding, command_hash, last_used, embedding_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.command,
                record.timestamp,
                record.exit_code,
                record.duration_ms,
                record.working_dir,
                record.output_preview,
                record.embedding,
                hash_command(&record.command),
                record.last_used,
                record.status,
            ],
        )
        .context("failed to save command")?;
        Ok(())
    }

    /// Insert a row with status `pending`, decoupled from embedding
    /// generation. Returns the new row id for enqueueing.
    pub fn save_command_async(&self, record: &CommandRecord) -> Result<i64> {
        let conn = self.conn.lock();
        Self::insert_pending(&conn, record)
    }

    fn insert_pending(conn: &Connection, record: &CommandRecord) -> Result<i64> {
        conn.execute(
            "INSERT INTO commands
                 (command, timestamp, exit_code, duration_ms, working_dir,
                  output_preview, command_hash, last_used, embedding_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.command,
                record.timestamp,
                record.exit_code,
                record.duration_ms,
                record.working_dir,
                record.output_preview,
                hash_command(&record.command),
                record.timestamp,
                EmbeddingStatus::Pending,
            ],
        )
        .context("failed to save command")?;
        Ok(conn.last_insert_rowid())
    }

    /// Save with content-hash deduplication.
    ///
    /// A repeated command refreshes `last_used` on the existing row instead of
    /// inserting a duplicate. The read-then-write sequence runs under the
    /// connection lock, so in-process races cannot produce duplicate hash
    /// rows; the store assumes a single process.
    pub fn save_command_deduplicated(&self, record: &CommandRecord) -> Result<SaveOutcome> {
        let hash = hash_command(&record.command);
        let conn = self.conn.lock();

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM commands WHERE command_hash = ?1",
                params![hash],
                |row| row.get(0),
            )
            .optional()
            .context("failed to look up command hash")?;

        match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE commands SET last_used = ?1 WHERE id = ?2",
                    params![record.timestamp, id],
                )
                .context("failed to refresh last_used")?;
                Ok(SaveOutcome::Existing(id))
            }
            None => {
                let id = Self::insert_pending(&conn, record)?;
                Ok(SaveOutcome::New(id))
            }
        }
    }

    /// Full-text search over command text and output preview.
    pub fn search_commands(&self, query: &str, limit: usize) -> Result<Vec<CommandRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT c.id, c.command, c.timestamp, c.exit_code, c.duration_ms,
                    c.working_dir, c.output_preview, c.embedding, c.command_hash,
                    c.last_used, c.embedding_status
             FROM commands c
             JOIN commands_fts fts ON c.id = fts.rowid
             WHERE commands_fts MATCH ?1
             ORDER BY c.timestamp DESC
             LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![query, limit as i64], row_to_record)
            .context("full-text search failed")?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_recent_commands(&self, limit: usize) -> Result<Vec<CommandRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, command, timestamp, exit_code, duration_ms, working_dir,
                    output_preview, embedding, command_hash, last_used, embedding_status
             FROM commands
             ORDER BY timestamp DESC
             LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Rows awaiting embedding computation, most recent first. Feeds the
    /// worker's refill cycle.
    pub fn get_pending_embeddings(&self, limit: usize) -> Result<Vec<CommandRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, command, timestamp, exit_code, duration_ms, working_dir,
                    output_preview, embedding, command_hash, last_used, embedding_status
             FROM commands
             WHERE embedding_status = ?1
             ORDER BY timestamp DESC
             LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![EmbeddingStatus::Pending, limit as i64], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Ids of rows whose embedding generation exhausted its retries.
    pub fn get_failed_ids(&self) -> Result<Vec<i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id FROM commands WHERE embedding_status = ?1 ORDER BY timestamp DESC",
        )?;
        let ids = stmt
            .query_map(params![EmbeddingStatus::Failed], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    pub fn get_command_text(&self, id: i64) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let text = conn
            .query_row(
                "SELECT command FROM commands WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text)
    }

    pub fn get_embedding_status(&self, id: i64) -> Result<Option<EmbeddingStatus>> {
        let conn = self.conn.lock();
        let status = conn
            .query_row(
                "SELECT embedding_status FROM commands WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status)
    }

    /// Atomically advance one row's lifecycle state, storing the embedding
    /// bytes on the transition to `completed`.
    pub fn update_embedding_status(
        &self,
        id: i64,
        status: EmbeddingStatus,
        embedding: Option<&[u8]>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE commands SET embedding_status = ?1, embedding = ?2 WHERE id = ?3",
            params![status, embedding, id],
        )
        .context("failed to update embedding status")?;
        Ok(())
    }

    /// Two-phase semantic search.
    ///
    /// Phase 1 narrows to the most recent embedded rows matching the query
    /// text; when FTS errors on the query or matches fewer than
    /// [`SEMANTIC_MIN_FTS_MATCHES`] rows, it widens to plain recency so the
    /// keyword filter improves recall without gating it. Phase 2 ranks the
    /// candidates by cosine similarity against `query_embedding`, keeps those
    /// at or above `threshold`, and returns the top `limit` descending.
    pub fn search_semantic(
        &self,
        query: &str,
        query_embedding: &[u8],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredCommand>> {
        let mut candidates = {
            let conn = self.conn.lock();

            // FTS can reject queries containing operator syntax; treat that
            // the same as too few matches.
            let fts = Self::fts_candidates(&conn, query).unwrap_or_default();
            if fts.len() < SEMANTIC_MIN_FTS_MATCHES {
                Self::recent_embedded(&conn)?
            } else {
                fts
            }
        };

        let mut scored: Vec<ScoredCommand> = candidates
            .drain(..)
            .filter_map(|record| {
                let embedding = record.embedding.as_deref()?;
                let similarity = cosine_similarity_bytes(query_embedding, embedding);
                (similarity >= threshold).then_some(ScoredCommand { record, similarity })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    fn fts_candidates(conn: &Connection, query: &str) -> Result<Vec<CommandRecord>> {
        let mut stmt = conn.prepare(
            "SELECT c.id, c.command, c.timestamp, c.exit_code, c.duration_ms,
                    c.working_dir, c.output_preview, c.embedding, c.command_hash,
                    c.last_used, c.embedding_status
             FROM commands c
             JOIN commands_fts fts ON c.id = fts.rowid
             WHERE commands_fts MATCH ?1 AND c.embedding IS NOT NULL
             ORDER BY c.timestamp DESC
             LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(
                params![query, SEMANTIC_CANDIDATE_LIMIT as i64],
                row_to_record,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn recent_embedded(conn: &Connection) -> Result<Vec<CommandRecord>> {
        let mut stmt = conn.prepare(
            "SELECT id, command, timestamp, exit_code, duration_ms, working_dir,
                    output_preview, embedding, command_hash, last_used, embedding_status
             FROM commands
             WHERE embedding IS NOT NULL
             ORDER BY timestamp DESC
             LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![SEMANTIC_CANDIDATE_LIMIT as i64], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();

        let total_commands: i64 =
            conn.query_row("SELECT COUNT(*) FROM commands", [], |row| row.get(0))?;

        let commands_today: i64 = conn.query_row(
            "SELECT COUNT(*) FROM commands WHERE DATE(timestamp) = DATE('now')",
            [],
            |row| row.get(0),
        )?;

        let avg_duration_ms: f64 = conn.query_row(
            "SELECT COALESCE(AVG(duration_ms), 0) FROM commands WHERE duration_ms > 0",
            [],
            |row| row.get(0),
        )?;

        let count_by_status = |status: EmbeddingStatus| -> Result<i64> {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM commands WHERE embedding_status = ?1",
                params![status],
                |row| row.get(0),
            )?;
            Ok(n)
        };

        Ok(StoreStats {
            total_commands,
            commands_today,
            avg_duration_ms,
            embedded_commands: count_by_status(EmbeddingStatus::Completed)?,
            pending_embeddings: count_by_status(EmbeddingStatus::Pending)?,
            failed_embeddings: count_by_status(EmbeddingStatus::Failed)?,
        })
    }

    /// Read up to `limit` snapshot rows, highest value first (hit count,
    /// then recency). Rows that fail to decode are skipped so one bad row
    /// cannot block a warm start.
    pub fn load_cache_snapshot(&self, limit: usize) -> Result<Vec<CacheSnapshotEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT command_text, embedding, last_accessed
             FROM embedding_cache
             ORDER BY hit_count DESC, last_accessed DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(CacheSnapshotEntry {
                command_text: row.get(0)?,
                embedding: row.get(1)?,
                last_accessed: row.get(2)?,
            })
        })?;

        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Replace the persisted snapshot with `entries` inside one transaction.
    /// Individual row failures are skipped rather than aborting the save.
    pub fn save_cache_snapshot(&self, entries: &[CacheSnapshotEntry]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM embedding_cache", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO embedding_cache (command_text, embedding, hit_count, last_accessed)
                 VALUES (?1, ?2, 1, ?3)",
            )?;
            for entry in entries {
                if let Err(e) = stmt.execute(params![
                    entry.command_text,
                    entry.embedding,
                    entry.last_accessed
                ]) {
                    tracing::debug!(error = %e, "skipping cache snapshot row");
                }
            }
        }

        tx.commit().context("failed to commit cache snapshot")?;
        Ok(())
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<CommandRecord> {
    Ok(CommandRecord {
        id: row.get(0)?,
        command: row.get(1)?,
        timestamp: row.get(2)?,
        exit_code: row.get(3)?,
        duration_ms: row.get(4)?,
        working_dir: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        output_preview: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        embedding: row.get(7)?,
        command_hash: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        last_used: row.get(9)?,
        status: row.get(10)?,
    })
}

/// Stable content hash of a command's text: SHA-256, hex-encoded.
pub fn hash_command(command: &str) -> String {
    let digest = Sha256::digest(command.as_bytes());
    hex::encode(digest)
}
