//! Delivery attempters.
//!
//! Two independent best-effort senders: the report email and the remote
//! dashboard upsert. Neither raises an error past its boundary.

pub mod document;
pub mod email;
pub mod remote;
pub mod smtp;

pub use email::{EmailDelivery, EmailTransport, OutgoingEmail, RetryPolicy, REPORT_RECIPIENT};
pub use remote::{HttpRemoteSink, RemoteSink, RemoteSync};
pub use smtp::SmtpMailer;
