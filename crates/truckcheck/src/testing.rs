//! Scripted collaborators and a wired-up harness for tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use crate::checklist::tests::complete_form;
use crate::checklist::{Header, LineItem, Submission, SubmissionId};
use crate::delivery::{EmailDelivery, EmailTransport, OutgoingEmail, RemoteSink, RemoteSync, RetryPolicy};
use crate::error::{Error, Result};
use crate::location::{Address, Fix, Geocoder, LocationProvider, LocationResolver, ResolverSettings};
use crate::orchestrator::{SaveOrchestrator, SaveTimeouts};
use crate::render::DocumentRenderer;
use crate::storage::{RecordStore, SqliteStore, StoreStats};
use crate::sweep::{SweepSettings, Sweeper};

/// Behaviour of one transport call.
#[derive(Debug, Clone)]
pub(crate) enum TransportStep {
    Succeed,
    Fail,
    Reject,
    Hang,
    Delay(Duration),
}

/// Email transport that follows a script, then succeeds.
#[derive(Debug, Default)]
pub(crate) struct FakeTransport {
    script: Mutex<VecDeque<TransportStep>>,
    calls: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: AtomicUsize,
    sent: Mutex<Vec<OutgoingEmail>>,
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeTransport {
    pub(crate) fn scripted(steps: Vec<TransportStep>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_concurrent(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailTransport for FakeTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(Arc::clone(&self.in_flight));

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TransportStep::Succeed);
        match step {
            TransportStep::Succeed => {}
            TransportStep::Fail => return Err(Error::email("scripted failure")),
            TransportStep::Reject => {
                return Err(Error::email_rejected("550 mailbox unavailable"))
            }
            TransportStep::Hang => tokio::time::sleep(Duration::from_secs(3600)).await,
            TransportStep::Delay(delay) => tokio::time::sleep(delay).await,
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// Renderer that writes a stub file after an optional delay.
#[derive(Debug, Default)]
pub(crate) struct FakeRenderer {
    output: Option<PathBuf>,
    delay: Duration,
    fail: bool,
}

impl FakeRenderer {
    pub(crate) fn delayed(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl DocumentRenderer for FakeRenderer {
    async fn render(&self, submission: &Submission, _items: &[LineItem]) -> Option<PathBuf> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return None;
        }
        let path = self
            .output
            .as_ref()?
            .join(format!("checklist_{}.pdf", submission.id));
        std::fs::write(&path, b"%PDF-1.4").ok()?;
        Some(path)
    }
}

/// Location provider with fixed answers.
#[derive(Debug)]
pub(crate) struct FakeLocationProvider {
    pub permission: bool,
    pub last_known: Option<Fix>,
    pub current: Option<Fix>,
    pub gps_only: Option<Fix>,
    pub delay: Duration,
}

impl Default for FakeLocationProvider {
    fn default() -> Self {
        Self {
            permission: true,
            last_known: None,
            current: None,
            gps_only: None,
            delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl LocationProvider for FakeLocationProvider {
    fn has_permission(&self) -> bool {
        self.permission
    }

    async fn last_known(&self) -> Option<Fix> {
        tokio::time::sleep(self.delay).await;
        self.last_known
    }

    async fn current_fix(&self) -> Option<Fix> {
        tokio::time::sleep(self.delay).await;
        self.current
    }

    async fn gps_only_fix(&self) -> Option<Fix> {
        tokio::time::sleep(self.delay).await;
        self.gps_only
    }
}

/// Geocoder with a fixed answer.
#[derive(Debug, Default)]
pub(crate) struct FakeGeocoder {
    pub address: Option<Address>,
    pub delay: Duration,
}

impl FakeGeocoder {
    pub(crate) fn failing() -> Self {
        Self::default()
    }

    pub(crate) fn returning(address: Address) -> Self {
        Self {
            address: Some(address),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn reverse(&self, _fix: &Fix) -> Result<Address> {
        tokio::time::sleep(self.delay).await;
        self.address
            .clone()
            .ok_or_else(|| Error::internal("geocoder unavailable"))
    }
}

/// Remote sink that records what it receives.
#[derive(Debug, Default)]
pub(crate) struct FakeSink {
    pub delay: Duration,
    pub fail: bool,
    pub puts: Mutex<Vec<(String, String, serde_json::Value)>>,
}

impl FakeSink {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn puts(&self) -> Vec<(String, String, serde_json::Value)> {
        self.puts.lock().unwrap().clone()
    }

    /// Wait until at least `count` documents arrived, or `limit` passed.
    pub(crate) async fn wait_for_puts(&self, count: usize, limit: Duration) {
        let deadline = std::time::Instant::now() + limit;
        while self.puts.lock().unwrap().len() < count && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl RemoteSink for FakeSink {
    async fn put(&self, collection: &str, id: &str, document: &serde_json::Value) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(Error::Remote {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        self.puts
            .lock()
            .unwrap()
            .push((collection.to_string(), id.to_string(), document.clone()));
        Ok(())
    }
}

/// A record store whose every operation fails.
#[derive(Debug, Default)]
pub(crate) struct BrokenStore;

fn broken<T>() -> Result<T> {
    Err(Error::internal("store unavailable"))
}

#[async_trait]
impl RecordStore for BrokenStore {
    async fn upsert_submission(
        &self,
        _id: Option<SubmissionId>,
        _header: &Header,
        _location: &str,
    ) -> Result<SubmissionId> {
        broken()
    }

    async fn upsert_item(&self, _id: SubmissionId, _item: &LineItem) -> Result<()> {
        broken()
    }

    async fn get_submission(&self, _id: SubmissionId) -> Result<Option<Submission>> {
        broken()
    }

    async fn get_items(&self, _id: SubmissionId) -> Result<Vec<LineItem>> {
        broken()
    }

    async fn undelivered_with_document(&self, _limit: usize) -> Result<Vec<Submission>> {
        broken()
    }

    async fn pending_location(&self, _sentinel: &str, _limit: usize) -> Result<Vec<Submission>> {
        broken()
    }

    async fn recent(&self, _limit: usize) -> Result<Vec<Submission>> {
        broken()
    }

    async fn is_email_sent(&self, _id: SubmissionId) -> Result<bool> {
        broken()
    }

    async fn mark_email_sent(&self, _id: SubmissionId) -> Result<bool> {
        broken()
    }

    async fn set_document_path(&self, _id: SubmissionId, _path: &Path) -> Result<()> {
        broken()
    }

    async fn set_location(&self, _id: SubmissionId, _location: &str) -> Result<()> {
        broken()
    }

    async fn purge_abandoned(&self, _cutoff: DateTime<Utc>) -> Result<usize> {
        broken()
    }

    async fn stats(&self) -> Result<StoreStats> {
        broken()
    }
}

/// Every component wired over an in-memory store and fakes.
#[derive(Debug)]
pub(crate) struct Harness {
    pub store: Arc<SqliteStore>,
    pub transport: Arc<FakeTransport>,
    pub renderer: Arc<FakeRenderer>,
    pub sink: Arc<FakeSink>,
    pub provider: Arc<FakeLocationProvider>,
    pub dir: TempDir,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::build(
            FakeTransport::default(),
            FakeRenderer::default(),
            FakeLocationProvider::default(),
        )
    }

    pub(crate) fn with_transport(transport: FakeTransport) -> Self {
        Self::build(transport, FakeRenderer::default(), FakeLocationProvider::default())
    }

    pub(crate) fn with_renderer(renderer: FakeRenderer) -> Self {
        Self::build(FakeTransport::default(), renderer, FakeLocationProvider::default())
    }

    pub(crate) fn with_provider(provider: FakeLocationProvider) -> Self {
        Self::build(FakeTransport::default(), FakeRenderer::default(), provider)
    }

    pub(crate) fn with_slow_location(delay: Duration) -> Self {
        Self::with_provider(FakeLocationProvider {
            delay,
            ..FakeLocationProvider::default()
        })
    }

    fn build(
        transport: FakeTransport,
        mut renderer: FakeRenderer,
        provider: FakeLocationProvider,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        renderer.output = Some(dir.path().to_path_buf());
        Self {
            store: Arc::new(SqliteStore::open_in_memory().unwrap()),
            transport: Arc::new(transport),
            renderer: Arc::new(renderer),
            sink: Arc::new(FakeSink::default()),
            provider: Arc::new(provider),
            dir,
        }
    }

    pub(crate) fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_step: Duration::from_millis(10),
            attempt_timeout: Duration::from_secs(1),
            total_timeout: Duration::from_secs(2),
        }
    }

    pub(crate) fn email(&self) -> EmailDelivery {
        EmailDelivery::new(self.transport.clone(), self.store.clone(), Self::policy())
    }

    pub(crate) fn resolver(&self) -> LocationResolver {
        LocationResolver::new(
            self.provider.clone(),
            Arc::new(FakeGeocoder::failing()),
            ResolverSettings {
                freshness: Duration::from_secs(300),
                geocode_timeout: Duration::from_millis(100),
                gps_only_timeout: Duration::from_millis(500),
            },
        )
    }

    pub(crate) fn remote(&self) -> RemoteSync {
        RemoteSync::new(self.sink.clone(), "paranalog_001", Duration::from_millis(500))
    }

    pub(crate) fn orchestrator(&self, timeouts: SaveTimeouts) -> SaveOrchestrator {
        self.orchestrator_over(self.store.clone(), timeouts)
    }

    pub(crate) fn orchestrator_over(
        &self,
        store: Arc<dyn RecordStore>,
        timeouts: SaveTimeouts,
    ) -> SaveOrchestrator {
        SaveOrchestrator::new(
            store,
            self.resolver(),
            self.renderer.clone(),
            self.email(),
            Some(self.remote()),
            timeouts,
        )
    }

    pub(crate) fn sweeper(&self, settings: SweepSettings) -> Sweeper {
        self.sweeper_with_transport(self.transport.clone(), settings)
    }

    pub(crate) fn sweeper_with_transport(
        &self,
        transport: Arc<FakeTransport>,
        settings: SweepSettings,
    ) -> Sweeper {
        Sweeper::new(
            self.store.clone(),
            EmailDelivery::new(transport, self.store.clone(), Self::policy()),
            self.resolver(),
            Some(self.remote()),
            settings,
        )
    }

    /// Store a complete submission with a document on disk and no email sent.
    pub(crate) async fn stored_with_document(&self) -> SubmissionId {
        let form = complete_form();
        let id = self
            .store
            .upsert_submission(None, &form.header, "GPS sem sinal")
            .await
            .unwrap();
        self.store.upsert_items(id, &form.items).await;

        let document = self.dir.path().join(format!("stored_{id}.pdf"));
        std::fs::write(&document, b"%PDF-1.4").unwrap();
        self.store.set_document_path(id, &document).await.unwrap();
        id
    }
}
