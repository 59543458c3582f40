//! Pending-work sweepers.
//!
//! A sweep re-attempts whatever earlier saves left unfinished: undelivered
//! emails, unresolved locations, and (depending on the trigger) remote resync
//! and the maintenance purge. Sweeps are safe to run concurrently with each
//! other and with an in-flight save.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bounded::run_bounded;
use crate::delivery::{EmailDelivery, RemoteSync};
use crate::location::{self, LocationResolver};
use crate::storage::RecordStore;

/// What started a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepTrigger {
    /// The application came back to the foreground.
    Resume,
    /// Network connectivity returned.
    ConnectivityRestored,
    /// The periodic timer fired.
    Periodic,
}

impl fmt::Display for SweepTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resume => write!(f, "resume"),
            Self::ConnectivityRestored => write!(f, "connectivity"),
            Self::Periodic => write!(f, "periodic"),
        }
    }
}

/// Tuning of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSettings {
    /// Rows fetched per redelivery or relocation query.
    pub batch_limit: usize,
    /// Redeliveries run concurrently within a chunk of this size.
    pub chunk_size: usize,
    /// Budget for one redelivery.
    pub item_timeout: Duration,
    /// Whether the redelivery pass runs at all.
    pub auto_resend: bool,
    /// How many recent submissions a connectivity sweep resyncs.
    pub remote_resync_count: usize,
    /// Budget for re-resolving one location.
    pub location_budget: Duration,
    /// Abandoned submissions older than this are purged.
    pub retention: chrono::Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            batch_limit: 10,
            chunk_size: 3,
            item_timeout: Duration::from_secs(30),
            auto_resend: true,
            remote_resync_count: 3,
            location_budget: Duration::from_secs(10),
            retention: chrono::Duration::days(7),
        }
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Redeliveries attempted.
    pub redelivery_attempted: usize,
    /// Redeliveries that left the submission marked sent.
    pub delivered: usize,
    /// Locations replaced.
    pub relocated: usize,
    /// Submissions pushed to the remote dashboard.
    pub resynced: usize,
    /// Abandoned submissions deleted.
    pub purged: usize,
}

/// Runs sweeps.
#[derive(Debug, Clone)]
pub struct Sweeper {
    store: Arc<dyn RecordStore>,
    email: EmailDelivery,
    resolver: LocationResolver,
    remote: Option<RemoteSync>,
    settings: SweepSettings,
}

impl Sweeper {
    /// Wire a sweeper. `remote` is `None` when remote sync is disabled.
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        email: EmailDelivery,
        resolver: LocationResolver,
        remote: Option<RemoteSync>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            store,
            email,
            resolver,
            remote,
            settings,
        }
    }

    /// Run one sweep.
    pub async fn run(&self, trigger: SweepTrigger) -> SweepReport {
        debug!(%trigger, "Sweep started");
        let mut report = SweepReport::default();

        if self.settings.auto_resend {
            self.redeliver(&mut report).await;
        }
        self.relocate(&mut report).await;
        match trigger {
            SweepTrigger::ConnectivityRestored => self.resync(&mut report).await,
            SweepTrigger::Periodic => self.purge(&mut report).await,
            SweepTrigger::Resume => {}
        }

        info!(
            %trigger,
            attempted = report.redelivery_attempted,
            delivered = report.delivered,
            relocated = report.relocated,
            resynced = report.resynced,
            purged = report.purged,
            "Sweep finished"
        );
        report
    }

    async fn redeliver(&self, report: &mut SweepReport) {
        let pending = match self
            .store
            .undelivered_with_document(self.settings.batch_limit)
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Could not query undelivered submissions");
                return;
            }
        };

        for chunk in pending.chunks(self.settings.chunk_size.max(1)) {
            let mut attempts = JoinSet::new();
            for submission in chunk {
                let email = self.email.clone();
                let id = submission.id;
                let budget = self.settings.item_timeout;
                attempts.spawn(async move {
                    run_bounded("sweep.redeliver", budget, email.deliver(id))
                        .await
                        .completed()
                        .unwrap_or(false)
                });
            }
            while let Some(result) = attempts.join_next().await {
                report.redelivery_attempted += 1;
                match result {
                    Ok(true) => report.delivered += 1,
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "Redelivery task failed"),
                }
            }
        }
    }

    async fn relocate(&self, report: &mut SweepReport) {
        let pending = match self
            .store
            .pending_location(location::RESOLVING, self.settings.batch_limit)
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Could not query pending locations");
                return;
            }
        };

        for submission in pending {
            let resolved = self.resolver.resolve(self.settings.location_budget).await;
            if resolved == location::RESOLVING {
                continue;
            }
            match self.store.set_location(submission.id, &resolved).await {
                Ok(()) => report.relocated += 1,
                Err(e) => warn!(submission_id = %submission.id, error = %e, "Could not update location"),
            }
        }
    }

    async fn resync(&self, report: &mut SweepReport) {
        let Some(remote) = &self.remote else {
            return;
        };
        let recent = match self.store.recent(self.settings.remote_resync_count).await {
            Ok(recent) => recent,
            Err(e) => {
                warn!(error = %e, "Could not query recent submissions");
                return;
            }
        };
        for submission in recent {
            if remote.sync(self.store.as_ref(), submission.id).await {
                report.resynced += 1;
            }
        }
    }

    async fn purge(&self, report: &mut SweepReport) {
        let cutoff = Utc::now() - self.settings.retention;
        match self.store.purge_abandoned(cutoff).await {
            Ok(purged) => report.purged = purged,
            Err(e) => warn!(error = %e, "Maintenance purge failed"),
        }
    }
}

/// Background sweep loop: a periodic timer plus on-demand triggers.
///
/// Dropping the handle stops the loop after the sweep in progress, if any.
#[derive(Debug)]
pub struct SweepScheduler {
    triggers: mpsc::Sender<SweepTrigger>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweepScheduler {
    /// Start the loop. The first periodic sweep runs one `interval` from now.
    #[must_use]
    pub fn spawn(sweeper: Sweeper, interval: Duration) -> Self {
        let (triggers, mut requests) = mpsc::channel(8);
        let (stop, mut stopped) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        sweeper.run(SweepTrigger::Periodic).await;
                    }
                    Some(trigger) = requests.recv() => {
                        sweeper.run(trigger).await;
                    }
                }
            }
            debug!("Sweep scheduler stopped");
        });

        Self {
            triggers,
            stop: Some(stop),
            task,
        }
    }

    /// Request a sweep. Returns `false` if the request queue is full.
    pub fn trigger(&self, trigger: SweepTrigger) -> bool {
        self.triggers.try_send(trigger).is_ok()
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "Sweep scheduler task failed");
        }
    }
}

impl Drop for SweepScheduler {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}
