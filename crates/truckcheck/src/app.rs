//! Component wiring.
//!
//! [`App`] builds the whole pipeline from a [`Config`]: the record store, the
//! location resolver, the renderer, both delivery attempters, the save
//! orchestrator and the sweeper.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::checklist::{DeliveryStatus, FormSnapshot, Submission};
use crate::config::Config;
use crate::delivery::{EmailDelivery, HttpRemoteSink, RemoteSync, SmtpMailer};
use crate::error::Result;
use crate::location::{Geocoder, LocationResolver, NoGeocoder, NominatimGeocoder, StaticLocationProvider};
use crate::orchestrator::{SaveOrchestrator, SaveReport, SaveRejection};
use crate::render::PdfRenderer;
use crate::storage::{RecordStore, SqliteStore, StoreStats};
use crate::sweep::{SweepReport, SweepScheduler, SweepTrigger, Sweeper};

/// A fully wired pipeline.
#[derive(Debug, Clone)]
pub struct App {
    store: Arc<SqliteStore>,
    orchestrator: SaveOrchestrator,
    sweeper: Sweeper,
    sweep_interval: std::time::Duration,
}

impl App {
    /// Wire every component from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or a network client
    /// cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(config.database_path())?);

        let geocoder: Arc<dyn Geocoder> = match &config.location.geocoder_url {
            Some(url) => Arc::new(NominatimGeocoder::new(
                url.clone(),
                config.resolver_settings().geocode_timeout,
            )?),
            None => Arc::new(NoGeocoder),
        };
        let resolver = LocationResolver::new(
            Arc::new(StaticLocationProvider::from_config(&config.location)),
            geocoder,
            config.resolver_settings(),
        );

        let renderer = Arc::new(PdfRenderer::new(
            config.documents_dir(),
            config.render.fonts_dir.clone(),
            config.render.font_family.clone(),
        ));

        let email = EmailDelivery::new(
            Arc::new(SmtpMailer::from_config(&config.email)?),
            store.clone(),
            config.retry_policy(),
        );

        let remote = match &config.remote.endpoint {
            Some(endpoint) => {
                let sink = HttpRemoteSink::new(
                    endpoint.clone(),
                    config.remote.api_key.clone(),
                    config.remote_timeout(),
                )?;
                Some(RemoteSync::new(
                    Arc::new(sink),
                    config.remote.company_id.clone(),
                    config.remote_timeout(),
                ))
            }
            None => {
                debug!("Remote sync disabled");
                None
            }
        };

        let orchestrator = SaveOrchestrator::new(
            store.clone(),
            resolver.clone(),
            renderer,
            email.clone(),
            remote.clone(),
            config.save_timeouts(),
        );
        let sweeper = Sweeper::new(
            store.clone(),
            email,
            resolver,
            remote,
            config.sweep_settings(),
        );

        info!(
            database = %config.database_path().display(),
            remote = config.remote_enabled(),
            "Pipeline ready"
        );
        Ok(Self {
            store,
            orchestrator,
            sweeper,
            sweep_interval: config.sweep_interval(),
        })
    }

    /// Save a form through the orchestrator.
    ///
    /// # Errors
    ///
    /// See [`SaveOrchestrator::save`].
    pub async fn save(&self, form: FormSnapshot) -> std::result::Result<SaveReport, SaveRejection> {
        self.orchestrator.save(form).await
    }

    /// Wait up to `limit` for delivery work a save left running.
    ///
    /// Returns `false` if some of it was still running at the limit.
    pub async fn settle(&self, limit: Duration) -> bool {
        self.orchestrator.settle(limit).await
    }

    /// Run one sweep now.
    pub async fn sweep(&self, trigger: SweepTrigger) -> SweepReport {
        self.sweeper.run(trigger).await
    }

    /// Start the periodic sweep scheduler.
    #[must_use]
    pub fn spawn_scheduler(&self) -> SweepScheduler {
        SweepScheduler::spawn(self.sweeper.clone(), self.sweep_interval)
    }

    /// Store statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }

    /// The most recent submissions, optionally only those with an email owed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    pub async fn list(&self, limit: usize, pending_only: bool) -> Result<Vec<Submission>> {
        if pending_only {
            return self.store.undelivered_with_document(limit).await;
        }
        self.store.recent(limit).await
    }
}

/// Count of each delivery status in `submissions`.
#[must_use]
pub fn status_counts(submissions: &[Submission]) -> [(DeliveryStatus, usize); 3] {
    [DeliveryStatus::Sent, DeliveryStatus::Pending, DeliveryStatus::Incomplete].map(|status| {
        let count = submissions
            .iter()
            .filter(|s| s.delivery_status() == status)
            .count();
        (status, count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checklist::tests::complete_form;

    fn config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.storage.database_path = Some(dir.path().join("checklists.db"));
        config.render.output_dir = Some(dir.path().join("documents"));
        config
    }

    #[tokio::test]
    async fn test_from_config_opens_store() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::from_config(&config(&dir)).unwrap();

        assert!(dir.path().join("checklists.db").exists());
        assert_eq!(app.stats().await.unwrap().total, 0);
        assert!(app.list(10, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_from_config_with_remote_and_geocoder() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.remote.endpoint = Some("https://dashboard.example.com/api".to_string());
        config.location.geocoder_url = Some("https://nominatim.example.com".to_string());

        assert!(App::from_config(&config).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_form_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::from_config(&config(&dir)).unwrap();

        let mut form = complete_form();
        form.header.operator_name = String::new();
        assert!(matches!(
            app.save(form).await,
            Err(SaveRejection::Invalid(_))
        ));
        assert_eq!(app.stats().await.unwrap().total, 0);
        assert!(app.settle(Duration::from_millis(50)).await);
    }

    #[test]
    fn test_status_counts() {
        let base = Submission {
            id: crate::checklist::SubmissionId(1),
            header: complete_form().header,
            location: "GPS sem sinal".to_string(),
            email_sent: false,
            document_path: None,
        };
        let sent = Submission {
            email_sent: true,
            document_path: Some("a.pdf".into()),
            ..base.clone()
        };
        let pending = Submission {
            document_path: Some("b.pdf".into()),
            ..base.clone()
        };

        let counts = status_counts(&[sent, pending, base.clone(), base]);
        assert_eq!(
            counts,
            [
                (DeliveryStatus::Sent, 1),
                (DeliveryStatus::Pending, 1),
                (DeliveryStatus::Incomplete, 2),
            ]
        );
    }
}
