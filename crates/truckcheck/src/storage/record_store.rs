//! Async access to the record store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::checklist::{Header, LineItem, Submission, SubmissionId};
use crate::error::{Error, Result};

use super::{Storage, StoreStats};

/// Outcome of writing a batch of line items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemWriteReport {
    /// Items written.
    pub written: usize,
    /// Ordinals whose write failed.
    pub failed: Vec<u8>,
}

impl ItemWriteReport {
    /// Whether every item was written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The operations the save pipeline and sweepers need from storage.
#[async_trait]
pub trait RecordStore: Send + Sync + std::fmt::Debug {
    /// Insert or overwrite a header. Overwriting resets delivery state.
    async fn upsert_submission(
        &self,
        id: Option<SubmissionId>,
        header: &Header,
        location: &str,
    ) -> Result<SubmissionId>;

    /// Insert or update one line item.
    async fn upsert_item(&self, id: SubmissionId, item: &LineItem) -> Result<()>;

    /// Write a batch of line items, carrying on past individual failures.
    async fn upsert_items(&self, id: SubmissionId, items: &[LineItem]) -> ItemWriteReport {
        let mut report = ItemWriteReport::default();
        for item in items {
            match self.upsert_item(id, item).await {
                Ok(()) => report.written += 1,
                Err(e) => {
                    warn!(submission_id = %id, ordinal = item.ordinal, error = %e, "Failed to persist line item");
                    report.failed.push(item.ordinal);
                }
            }
        }
        report
    }

    /// Point query.
    async fn get_submission(&self, id: SubmissionId) -> Result<Option<Submission>>;

    /// Line items of a submission, in ordinal order.
    async fn get_items(&self, id: SubmissionId) -> Result<Vec<LineItem>>;

    /// Submissions with a document whose email is still owed, newest first.
    async fn undelivered_with_document(&self, limit: usize) -> Result<Vec<Submission>>;

    /// Submissions whose location still equals `sentinel`.
    async fn pending_location(&self, sentinel: &str, limit: usize) -> Result<Vec<Submission>>;

    /// The most recent submissions.
    async fn recent(&self, limit: usize) -> Result<Vec<Submission>>;

    /// Authoritative sent-flag.
    async fn is_email_sent(&self, id: SubmissionId) -> Result<bool>;

    /// Set the sent-flag. Returns `true` if it changed.
    async fn mark_email_sent(&self, id: SubmissionId) -> Result<bool>;

    /// Record the rendered document.
    async fn set_document_path(&self, id: SubmissionId, path: &Path) -> Result<()>;

    /// Replace the location string.
    async fn set_location(&self, id: SubmissionId, location: &str) -> Result<()>;

    /// Delete abandoned submissions created before `cutoff`.
    async fn purge_abandoned(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Counts over the store.
    async fn stats(&self) -> Result<StoreStats>;
}

/// [`RecordStore`] over a [`Storage`], serialised by a mutex and run on the
/// blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    inner: Arc<Mutex<Storage>>,
}

impl SqliteStore {
    /// Wrap an open storage engine.
    #[must_use]
    pub fn new(storage: Storage) -> Self {
        Self {
            inner: Arc::new(Mutex::new(storage)),
        }
    }

    /// Open the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Storage::open(path).map(Self::new)
    }

    /// An in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        Storage::open_in_memory().map(Self::new)
    }

    async fn with<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Storage) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let storage = inner
                .lock()
                .map_err(|_| Error::internal("record store lock poisoned"))?;
            op(&*storage)
        })
        .await
        .map_err(|e| Error::internal(format!("record store task failed: {e}")))?
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn upsert_submission(
        &self,
        id: Option<SubmissionId>,
        header: &Header,
        location: &str,
    ) -> Result<SubmissionId> {
        let header = header.clone();
        let location = location.to_string();
        self.with(move |s| s.upsert_submission(id, &header, &location))
            .await
    }

    async fn upsert_item(&self, id: SubmissionId, item: &LineItem) -> Result<()> {
        let item = item.clone();
        self.with(move |s| s.upsert_item(id, &item)).await
    }

    async fn get_submission(&self, id: SubmissionId) -> Result<Option<Submission>> {
        self.with(move |s| s.get_submission(id)).await
    }

    async fn get_items(&self, id: SubmissionId) -> Result<Vec<LineItem>> {
        self.with(move |s| s.get_items(id)).await
    }

    async fn undelivered_with_document(&self, limit: usize) -> Result<Vec<Submission>> {
        self.with(move |s| s.undelivered_with_document(limit)).await
    }

    async fn pending_location(&self, sentinel: &str, limit: usize) -> Result<Vec<Submission>> {
        let sentinel = sentinel.to_string();
        self.with(move |s| s.pending_location(&sentinel, limit))
            .await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Submission>> {
        self.with(move |s| s.recent(limit)).await
    }

    async fn is_email_sent(&self, id: SubmissionId) -> Result<bool> {
        self.with(move |s| s.is_email_sent(id)).await
    }

    async fn mark_email_sent(&self, id: SubmissionId) -> Result<bool> {
        self.with(move |s| s.mark_email_sent(id)).await
    }

    async fn set_document_path(&self, id: SubmissionId, path: &Path) -> Result<()> {
        let path: PathBuf = path.to_path_buf();
        self.with(move |s| s.set_document_path(id, &path)).await
    }

    async fn set_location(&self, id: SubmissionId, location: &str) -> Result<()> {
        let location = location.to_string();
        self.with(move |s| s.set_location(id, &location)).await
    }

    async fn purge_abandoned(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.with(move |s| s.purge_abandoned(cutoff)).await
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.with(Storage::stats).await
    }
}
