//! Remote dashboard sync.
//!
//! Best effort: a failed or slow upsert is logged and reported as `false`,
//! never as an error.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bounded::{run_bounded, Bounded};
use crate::checklist::{LineItem, Submission, SubmissionId};
use crate::error::{Error, Result};
use crate::storage::RecordStore;

use super::document::{
    ChecklistDocument, DriverDocument, VehicleDocument, CHECKLISTS, DRIVERS, VEHICLES,
};

/// Document-oriented upsert target.
#[async_trait]
pub trait RemoteSink: Send + Sync + fmt::Debug {
    /// Create or replace document `id` in `collection`.
    async fn put(&self, collection: &str, id: &str, document: &serde_json::Value) -> Result<()>;
}

/// [`RemoteSink`] over a REST document API: `PUT {endpoint}/{collection}/{id}`.
#[derive(Debug, Clone)]
pub struct HttpRemoteSink {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpRemoteSink {
    /// Create a sink for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("truckcheck/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl RemoteSink for HttpRemoteSink {
    async fn put(&self, collection: &str, id: &str, document: &serde_json::Value) -> Result<()> {
        let url = format!("{}/{collection}/{id}", self.endpoint);
        let mut request = self.client.put(&url).json(document);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Remote {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

/// The remote-sync attempter.
#[derive(Debug, Clone)]
pub struct RemoteSync {
    sink: Arc<dyn RemoteSink>,
    company_id: String,
    timeout: Duration,
}

impl RemoteSync {
    /// Create an attempter writing through `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn RemoteSink>, company_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            sink,
            company_id: company_id.into(),
            timeout,
        }
    }

    /// Upsert the checklist document, then the vehicle and driver documents.
    ///
    /// Returns whether the checklist document was written. Side documents
    /// are best effort and do not affect the result.
    pub async fn upsert(&self, submission: &Submission, items: &[LineItem]) -> bool {
        let now = Utc::now();
        let document = ChecklistDocument::build(submission, items, &self.company_id, now);
        let id = document.id.clone();

        if !self.put(CHECKLISTS, &id, &document).await {
            return false;
        }
        info!(submission_id = %submission.id, document_id = %id, "Checklist synced to dashboard");

        if let Some(vehicle) = VehicleDocument::build(submission, &self.company_id, now) {
            self.put(VEHICLES, &vehicle.id, &vehicle).await;
        }
        if let Some(driver) = DriverDocument::build(submission, &self.company_id, now) {
            self.put(DRIVERS, &driver.id, &driver).await;
        }
        true
    }

    /// Load a stored submission and upsert it.
    pub async fn sync(&self, store: &dyn RecordStore, id: SubmissionId) -> bool {
        let submission = match store.get_submission(id).await {
            Ok(Some(submission)) => submission,
            Ok(None) => return false,
            Err(e) => {
                warn!(submission_id = %id, error = %e, "Could not load submission for sync");
                return false;
            }
        };
        match store.get_items(id).await {
            Ok(items) if !items.is_empty() => self.upsert(&submission, &items).await,
            Ok(_) => {
                debug!(submission_id = %id, "No items stored, skipping sync");
                false
            }
            Err(e) => {
                warn!(submission_id = %id, error = %e, "Could not load items for sync");
                false
            }
        }
    }

    async fn put<T: Serialize + Sync>(&self, collection: &str, id: &str, document: &T) -> bool {
        let value = match serde_json::to_value(document) {
            Ok(value) => value,
            Err(e) => {
                warn!(collection, id, error = %e, "Could not encode remote document");
                return false;
            }
        };

        match run_bounded("remote.put", self.timeout, self.sink.put(collection, id, &value)).await {
            Bounded::Completed(Ok(())) => true,
            Bounded::Completed(Err(e)) => {
                warn!(collection, id, error = %e, "Remote upsert failed");
                false
            }
            Bounded::TimedOut => false,
        }
    }
}
