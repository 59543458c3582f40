//! Email delivery of the rendered report.
//!
//! [`EmailDelivery::send`] retries transient failures inside its own budget
//! and collapses every failure into `false`. [`EmailDelivery::deliver`] adds
//! the record-store side: it re-checks the sent-flag right before sending and
//! sets it after a successful send, so repeated calls never send twice.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use tracing::{debug, info, warn};

use crate::bounded::run_bounded;
use crate::checklist::{Submission, SubmissionId};
use crate::error::{Error, Result};
use crate::storage::RecordStore;

/// Every report goes to this mailbox.
pub const REPORT_RECIPIENT: &str = "checklist@paranalog.com.br";

/// A fully composed message with one PDF attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Attachment on disk.
    pub attachment: PathBuf,
    /// File name the attachment is sent under.
    pub attachment_name: String,
}

impl OutgoingEmail {
    /// Compose the report email for a submission.
    #[must_use]
    pub fn for_submission(submission: &Submission, attachment: PathBuf) -> Self {
        Self {
            to: REPORT_RECIPIENT.to_string(),
            subject: subject(submission),
            body: body(submission),
            attachment,
            attachment_name: attachment_name(submission),
        }
    }
}

/// `CRT No. {crt|S/N} | Motorista: {name}`
#[must_use]
pub fn subject(submission: &Submission) -> String {
    let header = &submission.header;
    format!(
        "CRT No. {} | Motorista: {}",
        header.document_ref().unwrap_or("S/N"),
        header.operator_name.trim()
    )
}

/// Plain-text report summary.
#[must_use]
pub fn body(submission: &Submission) -> String {
    let header = &submission.header;
    let created = header.created_at.with_timezone(&Local);
    let document = header
        .document_ref()
        .map_or_else(|| "Não aplicável (viagem sem carga)".to_string(), str::to_string);

    format!(
        "Checklist de inspeção veicular:\n\n\
         Data: {}\n\
         Hora: {}\n\
         Placas: {} / {}\n\
         Motorista: {}\n\
         CRT/MIC/DUE: {}\n\n\
         Segue em anexo o documento completo do checklist.",
        created.format("%d/%m/%Y"),
        created.format("%H:%M"),
        header.tractor_plate,
        header.trailer_plate,
        header.operator_name,
        document,
    )
}

/// `CRT{crt}_` or `SemCRT_`, driver initials, plates and date.
#[must_use]
pub fn attachment_name(submission: &Submission) -> String {
    let header = &submission.header;
    let crt = header
        .document_ref()
        .map_or_else(|| "SemCRT_".to_string(), |c| format!("CRT{c}_"));
    format!(
        "{crt}{}_{}_{}_{}.pdf",
        initials(&header.operator_name),
        header.tractor_plate,
        header.trailer_plate,
        header.created_at.with_timezone(&Local).format("%Y%m%d")
    )
}

/// Initials used in attachment names.
///
/// A single word contributes its first three letters; several words
/// contribute the first letter of up to three of them.
#[must_use]
pub fn initials(name: &str) -> String {
    let words: Vec<&str> = name.split_whitespace().collect();
    match words.as_slice() {
        [] => "XXX".to_string(),
        [word] => word.chars().take(3).collect::<String>().to_uppercase(),
        many => many
            .iter()
            .take(3)
            .filter_map(|w| w.chars().next())
            .collect::<String>()
            .to_uppercase(),
    }
}

/// Sends one composed message.
#[async_trait]
pub trait EmailTransport: Send + Sync + fmt::Debug {
    /// Send `email`. Not expected to retry or to bound itself.
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;
}

/// Retry and timeout budget of one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// Backoff after attempt `n` is `n * backoff_step`.
    pub backoff_step: Duration,
    /// Budget for one attempt.
    pub attempt_timeout: Duration,
    /// Budget for all attempts and backoff together.
    pub total_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_millis(2000),
            attempt_timeout: Duration::from_secs(25),
            total_timeout: Duration::from_secs(30),
        }
    }
}

type InFlightSet = Arc<Mutex<HashSet<SubmissionId>>>;

/// Held while a submission's email is being delivered.
struct Claim {
    set: InFlightSet,
    id: SubmissionId,
}

impl Claim {
    fn acquire(set: &InFlightSet, id: SubmissionId) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        inserted.then(|| Self {
            set: Arc::clone(set),
            id,
        })
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// The email delivery attempter.
#[derive(Debug, Clone)]
pub struct EmailDelivery {
    transport: Arc<dyn EmailTransport>,
    store: Arc<dyn RecordStore>,
    policy: RetryPolicy,
    in_flight: InFlightSet,
}

impl EmailDelivery {
    /// Create an attempter over `transport`, recording success in `store`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn EmailTransport>,
        store: Arc<dyn RecordStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            store,
            policy,
            in_flight: Arc::default(),
        }
    }

    /// Send with bounded retries. A missing attachment fails immediately.
    pub async fn send(&self, email: &OutgoingEmail) -> bool {
        if !tokio::fs::try_exists(&email.attachment)
            .await
            .unwrap_or(false)
        {
            warn!(path = %email.attachment.display(), "Attachment missing, not sending");
            return false;
        }

        let attempts = async {
            for attempt in 1..=self.policy.max_attempts {
                let result = run_bounded(
                    "email.attempt",
                    self.policy.attempt_timeout,
                    self.transport.send(email),
                )
                .await
                .completed()
                .unwrap_or_else(|| Err(Error::timeout("email attempt")));

                match result {
                    Ok(()) => {
                        debug!(attempt, "Email sent");
                        return true;
                    }
                    Err(e) if !e.is_transient() => {
                        warn!(attempt, error = %e, "Email cannot be sent, not retrying");
                        return false;
                    }
                    Err(e) => warn!(attempt, error = %e, "Email attempt failed"),
                }
                if attempt < self.policy.max_attempts {
                    tokio::time::sleep(self.policy.backoff_step * attempt).await;
                }
            }
            false
        };

        run_bounded("email.send", self.policy.total_timeout, attempts)
            .await
            .completed()
            .unwrap_or(false)
    }

    /// Deliver the report of a stored submission and set its sent-flag.
    ///
    /// Returns whether the submission is now marked sent. A submission
    /// already marked sent is not sent again.
    pub async fn deliver(&self, id: SubmissionId) -> bool {
        let Some(_claim) = Claim::acquire(&self.in_flight, id) else {
            debug!(submission_id = %id, "Delivery already in flight");
            return false;
        };

        match self.store.is_email_sent(id).await {
            Ok(true) => {
                debug!(submission_id = %id, "Email already sent");
                return true;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(submission_id = %id, error = %e, "Could not read sent-flag");
                return false;
            }
        }

        let submission = match self.store.get_submission(id).await {
            Ok(Some(submission)) => submission,
            Ok(None) => {
                warn!(submission_id = %id, "Submission vanished before delivery");
                return false;
            }
            Err(e) => {
                warn!(submission_id = %id, error = %e, "Could not load submission");
                return false;
            }
        };
        let Some(document) = submission.document_path.clone() else {
            debug!(submission_id = %id, "No document to deliver");
            return false;
        };

        let email = OutgoingEmail::for_submission(&submission, document);
        if !self.send(&email).await {
            return false;
        }

        match self.store.mark_email_sent(id).await {
            Ok(_) => {
                info!(submission_id = %id, "Report emailed");
                true
            }
            Err(e) => {
                warn!(submission_id = %id, error = %e, "Email sent but sent-flag not recorded");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checklist::tests::complete_form;
    use crate::storage::SqliteStore;
    use crate::testing::{FakeTransport, TransportStep};

    fn submission(name: &str, document_ref: Option<&str>) -> Submission {
        let mut header = complete_form().header;
        header.operator_name = name.to_string();
        header.document_ref = document_ref.map(str::to_string);
        Submission {
            id: SubmissionId(1),
            header,
            location: "GPS sem sinal".to_string(),
            email_sent: false,
            document_path: None,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_step: Duration::from_millis(10),
            attempt_timeout: Duration::from_millis(100),
            total_timeout: Duration::from_secs(2),
        }
    }

    async fn stored_with_document(
        store: &SqliteStore,
        dir: &tempfile::TempDir,
    ) -> SubmissionId {
        let form = complete_form();
        let id = store
            .upsert_submission(None, &form.header, "GPS sem sinal")
            .await
            .unwrap();
        let document = dir.path().join("report.pdf");
        std::fs::write(&document, b"%PDF-1.4").unwrap();
        store.set_document_path(id, &document).await.unwrap();
        id
    }

    #[test]
    fn test_initials() {
        assert_eq!(initials("João da Silva"), "JDS");
        assert_eq!(initials("Ana Maria Souza Lima"), "AMS");
        assert_eq!(initials("pedro"), "PED");
        assert_eq!(initials("Li"), "LI");
        assert_eq!(initials("   "), "XXX");
    }

    #[test]
    fn test_subject() {
        assert_eq!(
            subject(&submission("João da Silva", Some("BR123"))),
            "CRT No. BR123 | Motorista: João da Silva"
        );
        assert_eq!(
            subject(&submission("João da Silva", Some("  "))),
            "CRT No. S/N | Motorista: João da Silva"
        );
    }

    #[test]
    fn test_body() {
        let text = body(&submission("João da Silva", None));
        assert!(text.starts_with("Checklist de inspeção veicular:\n\nData: "));
        assert!(text.contains("Placas: ABC-1234 / XYZ-9876\n"));
        assert!(text.contains("Motorista: João da Silva\n"));
        assert!(text.contains("CRT/MIC/DUE: Não aplicável (viagem sem carga)\n\n"));
        assert!(text.ends_with("Segue em anexo o documento completo do checklist."));
    }

    #[test]
    fn test_attachment_name() {
        let sub = submission("João da Silva", Some("BR123"));
        let date = sub.header.created_at.with_timezone(&Local).format("%Y%m%d");
        assert_eq!(
            attachment_name(&sub),
            format!("CRTBR123_JDS_ABC-1234_XYZ-9876_{date}.pdf")
        );
        assert!(attachment_name(&submission("pedro", None)).starts_with("SemCRT_PED_"));
    }

    #[test]
    fn test_email_goes_to_fixed_recipient() {
        let email = OutgoingEmail::for_submission(
            &submission("João da Silva", None),
            PathBuf::from("/tmp/r.pdf"),
        );
        assert_eq!(email.to, REPORT_RECIPIENT);
    }

    #[tokio::test]
    async fn test_missing_attachment_fails_without_sending() {
        let transport = Arc::new(FakeTransport::default());
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let delivery = EmailDelivery::new(transport.clone(), store, fast_policy());

        let email = OutgoingEmail::for_submission(
            &submission("João da Silva", None),
            PathBuf::from("/nonexistent/report.pdf"),
        );
        assert!(!delivery.send(&email).await);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_send_retries_transient_failures() {
        let dir = tempfile::tempdir().unwrap();
        let document = dir.path().join("r.pdf");
        std::fs::write(&document, b"%PDF").unwrap();

        let transport = Arc::new(FakeTransport::scripted(vec![
            TransportStep::Fail,
            TransportStep::Fail,
            TransportStep::Succeed,
        ]));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let delivery = EmailDelivery::new(transport.clone(), store, fast_policy());

        let email = OutgoingEmail::for_submission(&submission("Ana", None), document);
        assert!(delivery.send(&email).await);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_send_gives_up_after_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let document = dir.path().join("r.pdf");
        std::fs::write(&document, b"%PDF").unwrap();

        let transport = Arc::new(FakeTransport::scripted(vec![TransportStep::Fail; 5]));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let delivery = EmailDelivery::new(transport.clone(), store, fast_policy());

        let email = OutgoingEmail::for_submission(&submission("Ana", None), document);
        assert!(!delivery.send(&email).await);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_rejected_email_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let document = dir.path().join("r.pdf");
        std::fs::write(&document, b"%PDF").unwrap();

        let transport = Arc::new(FakeTransport::scripted(vec![TransportStep::Reject]));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let delivery = EmailDelivery::new(transport.clone(), store, fast_policy());

        let email = OutgoingEmail::for_submission(&submission("Ana", None), document);
        assert!(!delivery.send(&email).await);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_send_bounded_by_total_budget() {
        let dir = tempfile::tempdir().unwrap();
        let document = dir.path().join("r.pdf");
        std::fs::write(&document, b"%PDF").unwrap();

        let transport = Arc::new(FakeTransport::scripted(vec![TransportStep::Hang; 3]));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let policy = RetryPolicy {
            attempt_timeout: Duration::from_secs(10),
            total_timeout: Duration::from_millis(150),
            ..fast_policy()
        };
        let delivery = EmailDelivery::new(transport, store, policy);

        let started = std::time::Instant::now();
        let email = OutgoingEmail::for_submission(&submission("Ana", None), document);
        assert!(!delivery.send(&email).await);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_deliver_marks_sent() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let id = stored_with_document(&store, &dir).await;
        let transport = Arc::new(FakeTransport::default());
        let delivery = EmailDelivery::new(transport.clone(), store.clone(), fast_policy());

        assert!(delivery.deliver(id).await);
        assert!(store.is_email_sent(id).await.unwrap());
        assert_eq!(transport.calls(), 1);
        assert_eq!(transport.sent()[0].to, REPORT_RECIPIENT);
    }

    #[tokio::test]
    async fn test_deliver_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let id = stored_with_document(&store, &dir).await;
        store.mark_email_sent(id).await.unwrap();

        let transport = Arc::new(FakeTransport::default());
        let delivery = EmailDelivery::new(transport.clone(), store.clone(), fast_policy());

        assert!(delivery.deliver(id).await);
        assert!(delivery.deliver(id).await);
        assert!(store.is_email_sent(id).await.unwrap());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_send_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let id = stored_with_document(&store, &dir).await;

        let transport = Arc::new(FakeTransport::scripted(vec![TransportStep::Delay(
            Duration::from_millis(100),
        )]));
        let delivery = EmailDelivery::new(transport.clone(), store.clone(), fast_policy());

        let (a, b) = tokio::join!(delivery.deliver(id), delivery.deliver(id));
        assert!(a || b);
        assert_eq!(transport.calls(), 1);
        assert!(store.is_email_sent(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_deliver_without_document() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let id = store
            .upsert_submission(None, &complete_form().header, "GPS sem sinal")
            .await
            .unwrap();
        let transport = Arc::new(FakeTransport::default());
        let delivery = EmailDelivery::new(transport.clone(), store.clone(), fast_policy());

        assert!(!delivery.deliver(id).await);
        assert!(!store.is_email_sent(id).await.unwrap());
        assert_eq!(transport.calls(), 0);
    }
}
