//! `truckcheck` - Offline-first vehicle inspection checklists
//!
//! This library holds the checklist model, the local record store and the
//! save pipeline that persists a checklist, renders its report and delivers
//! it by email and to the remote dashboard, leaving anything that did not go
//! out to the background sweeps.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod app;
pub mod bounded;
pub mod catalog;
pub mod checklist;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod error;
pub mod location;
pub mod logging;
pub mod orchestrator;
pub mod render;
pub mod storage;
pub mod sweep;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{status_counts, App};
pub use checklist::{
    DeliveryStatus, FieldError, FormSnapshot, Header, LineItem, Outcome, Submission, SubmissionId,
};
pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use orchestrator::{SaveOrchestrator, SaveOutcome, SaveReport, SaveRejection};
pub use storage::{RecordStore, SqliteStore, Storage, StoreStats};
pub use sweep::{SweepReport, SweepScheduler, SweepTrigger, Sweeper};
