//! The save pipeline.
//!
//! A save moves through `Validating -> Persisting -> RenderingDocument ->
//! AttemptingDelivery -> Finalized`. Every step is bounded and the whole run
//! sits under a global ceiling, so a caller always gets exactly one
//! [`SaveOutcome`] in bounded time. Work still running when the ceiling hits
//! is detached, not cancelled; its writes are idempotent and the sweepers
//! pick up whatever it leaves unfinished. A short-lived caller can wait for
//! detached work with [`SaveOrchestrator::settle`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bounded::{run_bounded, Bounded, Deadline};
use crate::checklist::{FieldError, FormSnapshot, LineItem, Submission, SubmissionId};
use crate::delivery::document::strip_photos;
use crate::delivery::{EmailDelivery, RemoteSync};
use crate::location::{self, LocationResolver};
use crate::render::DocumentRenderer;
use crate::storage::RecordStore;

/// Per-step and global deadlines of a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveTimeouts {
    /// Hard ceiling for the whole save.
    pub global: Duration,
    /// Just-in-time location resolution.
    pub location: Duration,
    /// Document rendering.
    pub render: Duration,
    /// How long the save waits on the email attempt.
    pub email_wait: Duration,
}

impl Default for SaveTimeouts {
    fn default() -> Self {
        Self {
            global: Duration::from_secs(20),
            location: Duration::from_secs(5),
            render: Duration::from_secs(8),
            email_wait: Duration::from_secs(3),
        }
    }
}

/// Whether the form is being edited or saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Idle; a save may start.
    #[default]
    Editing,
    /// A save is in flight.
    Saving,
}

/// Events that move the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The driver pressed save.
    SaveRequested,
    /// The save reached a terminal outcome.
    Finalized,
}

impl SessionState {
    /// Transition table. `None` means the event is not accepted here.
    #[must_use]
    pub fn on(self, event: SessionEvent) -> Option<Self> {
        match (self, event) {
            (Self::Editing, SessionEvent::SaveRequested) => Some(Self::Saving),
            (Self::Saving, SessionEvent::Finalized) => Some(Self::Editing),
            _ => None,
        }
    }
}

type Session = Arc<Mutex<SessionState>>;

fn apply(session: &Session, event: SessionEvent) -> bool {
    let mut state = session.lock().unwrap_or_else(PoisonError::into_inner);
    match state.on(event) {
        Some(next) => {
            *state = next;
            true
        }
        None => false,
    }
}

/// Returns the session to `Editing` when dropped.
struct SavingGuard {
    session: Session,
}

impl SavingGuard {
    fn begin(session: &Session) -> Option<Self> {
        apply(session, SessionEvent::SaveRequested).then(|| Self {
            session: Arc::clone(session),
        })
    }
}

impl Drop for SavingGuard {
    fn drop(&mut self) {
        apply(&self.session, SessionEvent::Finalized);
    }
}

/// Pipeline stage, published for progress display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveStage {
    /// Nothing running.
    #[default]
    Idle,
    /// Checking the form.
    Validating,
    /// Writing header and items.
    Persisting,
    /// Producing the document.
    RenderingDocument,
    /// Email and remote sync running.
    AttemptingDelivery,
    /// A terminal outcome was produced.
    Finalized,
}

impl SaveStage {
    /// Progress text shown while the stage runs.
    #[must_use]
    pub fn message(self) -> Option<&'static str> {
        match self {
            Self::Persisting => Some("Salvando checklist..."),
            Self::RenderingDocument => Some("Gerando PDF..."),
            Self::AttemptingDelivery => Some("Finalizando..."),
            Self::Idle | Self::Validating | Self::Finalized => None,
        }
    }
}

/// Stage feed shared by every run.
///
/// Each save runs under a generation number. Finalizing bumps the generation,
/// so a run detached at the ceiling can no longer move the feed.
#[derive(Debug)]
struct Progress {
    stage: watch::Sender<SaveStage>,
    generation: AtomicU64,
}

impl Progress {
    fn new() -> Self {
        let (stage, _) = watch::channel(SaveStage::Idle);
        Self {
            stage,
            generation: AtomicU64::new(0),
        }
    }

    fn current(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn publish(&self, generation: u64, stage: SaveStage) {
        self.stage.send_if_modified(|current| {
            if self.generation.load(Ordering::Acquire) != generation {
                return false;
            }
            *current = stage;
            true
        });
    }

    fn finalize(&self) {
        self.stage.send_modify(|current| {
            self.generation.fetch_add(1, Ordering::AcqRel);
            *current = SaveStage::Finalized;
        });
    }
}

/// The terminal result of a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Saved and emailed.
    Delivered,
    /// Saved and documented; the email will be retried.
    Undelivered,
    /// Saved, but no document was produced.
    Undocumented,
    /// The ceiling was reached; remaining work continues in the background.
    Background,
    /// The header could not be persisted.
    Failed(String),
}

impl SaveOutcome {
    /// The single message shown to the driver.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Delivered => "Checklist salvo e email enviado!".to_string(),
            Self::Undelivered => {
                "Checklist salvo! Email será enviado automaticamente quando houver conexão."
                    .to_string()
            }
            Self::Undocumented => "Checklist salvo! (PDF não gerado)".to_string(),
            Self::Background => "Checklist salvo! (Processamento em background)".to_string(),
            Self::Failed(reason) => format!("Erro ao salvar checklist: {reason}"),
        }
    }

    /// Whether the header reached the store.
    #[must_use]
    pub fn is_saved(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for SaveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// A finished save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    /// What happened.
    pub outcome: SaveOutcome,
    /// The stored submission, once the header was written.
    pub submission_id: Option<SubmissionId>,
}

/// Why a save did not start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveRejection {
    /// Another save is in flight.
    Busy,
    /// The form has field-level problems. Nothing was written.
    Invalid(Vec<FieldError>),
}

impl fmt::Display for SaveRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "Aguarde, salvamento em andamento..."),
            Self::Invalid(errors) => {
                let list: Vec<String> = errors.iter().map(ToString::to_string).collect();
                write!(f, "{}", list.join("; "))
            }
        }
    }
}

/// Runs saves.
#[derive(Debug, Clone)]
pub struct SaveOrchestrator {
    store: Arc<dyn RecordStore>,
    resolver: LocationResolver,
    renderer: Arc<dyn DocumentRenderer>,
    email: EmailDelivery,
    remote: Option<RemoteSync>,
    timeouts: SaveTimeouts,
    session: Session,
    progress: Arc<Progress>,
    detached: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SaveOrchestrator {
    /// Wire an orchestrator. `remote` is `None` when remote sync is disabled.
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        resolver: LocationResolver,
        renderer: Arc<dyn DocumentRenderer>,
        email: EmailDelivery,
        remote: Option<RemoteSync>,
        timeouts: SaveTimeouts,
    ) -> Self {
        Self {
            store,
            resolver,
            renderer,
            email,
            remote,
            timeouts,
            session: Arc::default(),
            progress: Arc::new(Progress::new()),
            detached: Arc::default(),
        }
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Follow pipeline progress.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SaveStage> {
        self.progress.stage.subscribe()
    }

    /// Save a form.
    ///
    /// # Errors
    ///
    /// Rejected without side effects when another save is in flight or the
    /// form does not validate.
    pub async fn save(&self, form: FormSnapshot) -> Result<SaveReport, SaveRejection> {
        let Some(_guard) = SavingGuard::begin(&self.session) else {
            debug!("Save requested while another is in flight");
            return Err(SaveRejection::Busy);
        };

        let generation = self.progress.current();
        self.progress.publish(generation, SaveStage::Validating);
        if let Err(errors) = form.validate() {
            debug!(errors = errors.len(), "Form rejected");
            self.progress.publish(generation, SaveStage::Idle);
            return Err(SaveRejection::Invalid(errors));
        }

        let stored = Arc::new(OnceLock::new());
        let mut pipeline = tokio::spawn(self.clone().run(form, Arc::clone(&stored), generation));

        let outcome = match run_bounded("save", self.timeouts.global, &mut pipeline).await {
            Bounded::Completed(Ok(outcome)) => outcome,
            Bounded::Completed(Err(e)) => {
                error!(error = %e, "Save pipeline aborted");
                SaveOutcome::Failed(e.to_string())
            }
            Bounded::TimedOut => {
                self.track(tokio::spawn(async move {
                    let _ = pipeline.await;
                }));
                SaveOutcome::Background
            }
        };

        self.progress.finalize();
        let submission_id = stored.get().copied();
        info!(
            submission_id = ?submission_id.map(|id| id.0),
            outcome = ?outcome,
            "Save finalized"
        );
        Ok(SaveReport {
            outcome,
            submission_id,
        })
    }

    /// Wait up to `limit` for work earlier saves left running: remote sync,
    /// an email attempt past its wait, a pipeline past the ceiling.
    ///
    /// Returns `true` when all of it finished. Work still running at the limit
    /// stays detached.
    pub async fn settle(&self, limit: Duration) -> bool {
        let deadline = Deadline::after(limit);
        loop {
            let pending = std::mem::take(
                &mut *self.detached.lock().unwrap_or_else(PoisonError::into_inner),
            );
            if pending.is_empty() {
                return true;
            }
            debug!(tasks = pending.len(), "Waiting on detached save work");
            for task in pending {
                if run_bounded("save.settle", deadline.remaining(), task)
                    .await
                    .is_timed_out()
                {
                    return false;
                }
            }
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut detached = self.detached.lock().unwrap_or_else(PoisonError::into_inner);
        detached.retain(|t| !t.is_finished());
        detached.push(task);
    }

    async fn run(
        self,
        mut form: FormSnapshot,
        stored: Arc<OnceLock<SubmissionId>>,
        generation: u64,
    ) -> SaveOutcome {
        self.progress.publish(generation, SaveStage::Persisting);
        form.header.normalize();

        // The resolver keeps to its budget and always ends in a terminal answer.
        let location = match form.location.as_deref() {
            Some(location) if !location::needs_resolution(Some(location)) => location.to_string(),
            _ => self.resolver.resolve(self.timeouts.location).await,
        };

        let id = match self
            .store
            .upsert_submission(form.id, &form.header, &location)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "Failed to persist checklist header");
                return SaveOutcome::Failed(e.to_string());
            }
        };
        let _ = stored.set(id);

        let written = self.store.upsert_items(id, &form.items).await;
        if !written.is_complete() {
            warn!(submission_id = %id, failed = ?written.failed, "Some line items were not persisted");
        }

        let mut submission = Submission {
            id,
            header: form.header,
            location,
            email_sent: false,
            document_path: None,
        };
        let items = form.items;

        self.progress.publish(generation, SaveStage::RenderingDocument);
        submission.document_path = self.render(&submission, &items).await;

        self.progress.publish(generation, SaveStage::AttemptingDelivery);
        if let Some(remote) = self.remote.clone() {
            let submission = submission.clone();
            let items = strip_photos(&items);
            self.track(tokio::spawn(async move {
                remote.upsert(&submission, &items).await;
            }));
        }

        if submission.document_path.is_none() {
            return SaveOutcome::Undocumented;
        }

        let email = self.email.clone();
        let mut attempt = tokio::spawn(async move {
            email.deliver(id).await;
        });
        if run_bounded("save.email_wait", self.timeouts.email_wait, &mut attempt)
            .await
            .is_timed_out()
        {
            debug!(submission_id = %id, "Email still in flight; not waiting further");
            self.track(attempt);
        }

        match self.store.is_email_sent(id).await {
            Ok(true) => SaveOutcome::Delivered,
            Ok(false) => SaveOutcome::Undelivered,
            Err(e) => {
                warn!(submission_id = %id, error = %e, "Could not re-read sent-flag");
                SaveOutcome::Undelivered
            }
        }
    }

    async fn render(&self, submission: &Submission, items: &[LineItem]) -> Option<std::path::PathBuf> {
        let path = run_bounded(
            "save.render",
            self.timeouts.render,
            self.renderer.render(submission, items),
        )
        .await
        .flatten()?;

        match self.store.set_document_path(submission.id, &path).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(submission_id = %submission.id, error = %e, "Failed to record document path");
                None
            }
        }
    }
}
