//! Local record store.
//!
//! [`Storage`] is the synchronous `SQLite` engine. [`RecordStore`] is the async
//! seam the pipeline talks to; [`SqliteStore`] bridges the two by running each
//! call on the blocking pool behind a mutex.

pub mod migrations;
pub mod record_store;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::checklist::{Header, LineItem, Outcome, Submission, SubmissionId, TripFlags};
use crate::error::{Error, Result};

pub use record_store::{ItemWriteReport, RecordStore, SqliteStore};

const SUBMISSION_COLUMNS: &str = r"
    id, operator_id, operator_name, created_at, tractor_plate, trailer_plate,
    document_ref, seal_number, gross_weight,
    flag_entry, flag_exit, flag_overnight, flag_stop,
    location, email_sent, document_path
";

/// Storage engine for submissions and their line items.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a new submission header or overwrite an existing one.
    ///
    /// Overwriting resets the sent-flag and document path: an edited
    /// submission needs a fresh document and a fresh delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if `location` is blank or the write fails.
    pub fn upsert_submission(
        &self,
        id: Option<SubmissionId>,
        header: &Header,
        location: &str,
    ) -> Result<SubmissionId> {
        if location.trim().is_empty() {
            return Err(Error::internal("refusing to persist an empty location"));
        }

        self.conn.execute(
            r"
            INSERT INTO submissions (
                id, operator_id, operator_name, created_at, tractor_plate, trailer_plate,
                document_ref, seal_number, gross_weight,
                flag_entry, flag_exit, flag_overnight, flag_stop,
                location, email_sent, document_path
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 0, NULL)
            ON CONFLICT(id) DO UPDATE SET
                operator_id = excluded.operator_id,
                operator_name = excluded.operator_name,
                created_at = excluded.created_at,
                tractor_plate = excluded.tractor_plate,
                trailer_plate = excluded.trailer_plate,
                document_ref = excluded.document_ref,
                seal_number = excluded.seal_number,
                gross_weight = excluded.gross_weight,
                flag_entry = excluded.flag_entry,
                flag_exit = excluded.flag_exit,
                flag_overnight = excluded.flag_overnight,
                flag_stop = excluded.flag_stop,
                location = excluded.location,
                email_sent = 0,
                document_path = NULL
            ",
            params![
                id.map(|i| i.0),
                header.operator_id,
                header.operator_name,
                timestamp(header.created_at),
                header.tractor_plate,
                header.trailer_plate,
                header.document_ref,
                header.seal_number,
                header.gross_weight,
                header.flags.entry,
                header.flags.exit,
                header.flags.overnight,
                header.flags.stop,
                location,
            ],
        )?;

        let id = id.unwrap_or_else(|| SubmissionId(self.conn.last_insert_rowid()));
        debug!(submission_id = %id, "Upserted submission header");
        Ok(id)
    }

    /// Insert or update one line item.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails, including when the parent
    /// submission does not exist.
    pub fn upsert_item(&self, id: SubmissionId, item: &LineItem) -> Result<()> {
        self.conn.execute(
            r"
            INSERT INTO line_items (submission_id, ordinal, outcome, comment, photo_path)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(submission_id, ordinal) DO UPDATE SET
                outcome = excluded.outcome,
                comment = excluded.comment,
                photo_path = excluded.photo_path
            ",
            params![
                id.0,
                item.ordinal,
                item.outcome.code(),
                item.comment,
                item.photo.as_ref().map(|p| p.to_string_lossy().into_owned()),
            ],
        )?;
        Ok(())
    }

    /// Get a submission by its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_submission(&self, id: SubmissionId) -> Result<Option<Submission>> {
        let sql = format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = ?1");
        let result = self
            .conn
            .query_row(&sql, [id.0], Self::row_to_submission)
            .optional()?;
        Ok(result)
    }

    /// Line items of a submission, in ordinal order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_items(&self, id: SubmissionId) -> Result<Vec<LineItem>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT ordinal, outcome, comment, photo_path
            FROM line_items WHERE submission_id = ?1 ORDER BY ordinal
            ",
        )?;
        let items = stmt
            .query_map([id.0], Self::row_to_item)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Submissions with a document whose email is still owed, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn undelivered_with_document(&self, limit: usize) -> Result<Vec<Submission>> {
        self.query_submissions(
            "email_sent = 0 AND document_path IS NOT NULL ORDER BY created_at DESC LIMIT ?1",
            params![to_limit(limit)],
        )
    }

    /// Submissions whose location still holds `sentinel`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn pending_location(&self, sentinel: &str, limit: usize) -> Result<Vec<Submission>> {
        self.query_submissions(
            "location = ?1 ORDER BY created_at DESC LIMIT ?2",
            params![sentinel, to_limit(limit)],
        )
    }

    /// The most recent submissions.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recent(&self, limit: usize) -> Result<Vec<Submission>> {
        self.query_submissions(
            "1 = 1 ORDER BY created_at DESC LIMIT ?1",
            params![to_limit(limit)],
        )
    }

    /// Whether the email for a submission went out.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SubmissionNotFound`] for an unknown ID.
    pub fn is_email_sent(&self, id: SubmissionId) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT email_sent FROM submissions WHERE id = ?1",
                [id.0],
                |row| row.get::<_, bool>(0),
            )
            .optional()?
            .ok_or(Error::SubmissionNotFound(id))
    }

    /// Set the sent-flag. Returns `true` if the flag changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SubmissionNotFound`] for an unknown ID.
    pub fn mark_email_sent(&self, id: SubmissionId) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE submissions SET email_sent = 1 WHERE id = ?1 AND email_sent = 0",
            [id.0],
        )?;
        if changed == 0 && !self.is_email_sent(id)? {
            warn!(submission_id = %id, "Sent-flag did not stick");
        }
        Ok(changed > 0)
    }

    /// Record the rendered document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SubmissionNotFound`] for an unknown ID.
    pub fn set_document_path(&self, id: SubmissionId, path: &Path) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE submissions SET document_path = ?2 WHERE id = ?1",
            params![id.0, path.to_string_lossy()],
        )?;
        if changed == 0 {
            return Err(Error::SubmissionNotFound(id));
        }
        Ok(())
    }

    /// Replace the location string.
    ///
    /// # Errors
    ///
    /// Returns an error for a blank location or an unknown ID.
    pub fn set_location(&self, id: SubmissionId, location: &str) -> Result<()> {
        if location.trim().is_empty() {
            return Err(Error::internal("refusing to persist an empty location"));
        }
        let changed = self.conn.execute(
            "UPDATE submissions SET location = ?2 WHERE id = ?1",
            params![id.0, location],
        )?;
        if changed == 0 {
            return Err(Error::SubmissionNotFound(id));
        }
        Ok(())
    }

    /// Delete submissions created before `cutoff` that never got a document
    /// and were never sent. Their line items go with them.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn purge_abandoned(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn.execute(
            r"
            DELETE FROM submissions
            WHERE email_sent = 0 AND document_path IS NULL AND created_at <= ?1
            ",
            [timestamp(cutoff)],
        )?;

        if affected > 0 {
            info!("Purged {} abandoned submissions", affected);
        }
        Ok(affected)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StoreStats> {
        let (total, sent, pending, undocumented): (i64, i64, i64, i64) = self.conn.query_row(
            r"
            SELECT
                COUNT(*),
                COALESCE(SUM(email_sent = 1), 0),
                COALESCE(SUM(email_sent = 0 AND document_path IS NOT NULL), 0),
                COALESCE(SUM(email_sent = 0 AND document_path IS NULL), 0)
            FROM submissions
            ",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        let problems: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM line_items WHERE outcome = ?1",
            [Outcome::Negative.code()],
            |row| row.get(0),
        )?;

        let newest: Option<String> = self
            .conn
            .query_row(
                "SELECT created_at FROM submissions ORDER BY created_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StoreStats {
            total,
            sent,
            pending,
            undocumented,
            problems,
            newest_submission: newest.as_deref().map(parse_timestamp),
            db_size_bytes,
        })
    }

    fn query_submissions(
        &self,
        filter: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Submission>> {
        let sql = format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE {filter}");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params, Self::row_to_submission)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn row_to_submission(row: &rusqlite::Row) -> rusqlite::Result<Submission> {
        let created_at: String = row.get(3)?;
        let document_path: Option<String> = row.get(15)?;

        Ok(Submission {
            id: SubmissionId(row.get(0)?),
            header: Header {
                operator_id: row.get(1)?,
                operator_name: row.get(2)?,
                created_at: parse_timestamp(&created_at),
                tractor_plate: row.get(4)?,
                trailer_plate: row.get(5)?,
                document_ref: row.get(6)?,
                seal_number: row.get(7)?,
                gross_weight: row.get(8)?,
                flags: TripFlags {
                    entry: row.get(9)?,
                    exit: row.get(10)?,
                    overnight: row.get(11)?,
                    stop: row.get(12)?,
                },
            },
            location: row.get(13)?,
            email_sent: row.get(14)?,
            document_path: document_path.map(PathBuf::from),
        })
    }

    fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<LineItem> {
        let outcome: String = row.get(1)?;
        let photo: Option<String> = row.get(3)?;
        Ok(LineItem {
            ordinal: row.get(0)?,
            outcome: Outcome::from_code(&outcome),
            comment: row.get(2)?,
            photo: photo.map(PathBuf::from),
        })
    }
}

/// Counts over the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// All submissions.
    pub total: i64,
    /// Email delivered.
    pub sent: i64,
    /// Document rendered, email still owed.
    pub pending: i64,
    /// No document yet.
    pub undocumented: i64,
    /// Line items answered "NÃO" across all submissions.
    pub problems: i64,
    /// Creation time of the newest submission.
    pub newest_submission: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(
        |_| {
            warn!("Unparseable timestamp in database: {}", s);
            DateTime::<Utc>::default()
        },
        |dt| dt.with_timezone(&Utc),
    )
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
