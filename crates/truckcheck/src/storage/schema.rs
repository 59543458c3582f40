//! `SQLite` schema definitions.

/// Submission headers.
///
/// `location` is never empty once a row exists; placeholder sentinels stand in
/// for an unresolved location.
pub const CREATE_SUBMISSIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS submissions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operator_id TEXT NOT NULL,
    operator_name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    tractor_plate TEXT NOT NULL,
    trailer_plate TEXT NOT NULL,
    document_ref TEXT,
    seal_number TEXT,
    gross_weight TEXT,
    flag_entry INTEGER NOT NULL DEFAULT 0,
    flag_exit INTEGER NOT NULL DEFAULT 0,
    flag_overnight INTEGER NOT NULL DEFAULT 0,
    flag_stop INTEGER NOT NULL DEFAULT 0,
    location TEXT NOT NULL CHECK (length(location) > 0),
    email_sent INTEGER NOT NULL DEFAULT 0,
    document_path TEXT
)
";

/// Line items, owned by a submission.
pub const CREATE_LINE_ITEMS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS line_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    submission_id INTEGER NOT NULL REFERENCES submissions(id) ON DELETE CASCADE,
    ordinal INTEGER NOT NULL,
    outcome TEXT NOT NULL DEFAULT '',
    comment TEXT,
    photo_path TEXT,
    UNIQUE (submission_id, ordinal)
)
";

/// Redelivery scans: document present, email not sent, newest first.
pub const CREATE_UNDELIVERED_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_submissions_undelivered
ON submissions(email_sent, created_at DESC)
";

/// Location sweep scans.
pub const CREATE_LOCATION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_submissions_location ON submissions(location)
";

/// Key-value metadata (schema version).
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_SUBMISSIONS_TABLE,
    CREATE_LINE_ITEMS_TABLE,
    CREATE_UNDELIVERED_INDEX,
    CREATE_LOCATION_INDEX,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.trim().is_empty());
        }
    }

    #[test]
    fn test_line_items_cascade_with_parent() {
        assert!(CREATE_LINE_ITEMS_TABLE.contains("ON DELETE CASCADE"));
        assert!(CREATE_LINE_ITEMS_TABLE.contains("UNIQUE (submission_id, ordinal)"));
    }

    #[test]
    fn test_location_is_required() {
        assert!(CREATE_SUBMISSIONS_TABLE.contains("location TEXT NOT NULL"));
    }
}
