//! Checklist data model.
//!
//! A [`Submission`] is one inspection of one tractor/trailer pair. It owns
//! exactly 25 [`LineItem`]s, one per catalog ordinal. The form the driver edits
//! arrives as a [`FormSnapshot`]; validation happens there, before anything is
//! written.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{self, ITEM_COUNT};

/// Locally assigned, monotonically increasing submission identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(pub i64);

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The answer recorded for one inspection point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// "SIM"
    Affirmative,
    /// "NÃO"
    Negative,
    /// "N/A"
    NotApplicable,
    /// Not answered yet.
    #[default]
    Unset,
}

impl Outcome {
    /// All outcomes, unset included.
    pub const ALL: [Outcome; 4] = [
        Self::Affirmative,
        Self::Negative,
        Self::NotApplicable,
        Self::Unset,
    ];

    /// The code stored in the database and printed on the document.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Affirmative => "SIM",
            Self::Negative => "NÃO",
            Self::NotApplicable => "N/A",
            Self::Unset => "",
        }
    }

    /// Parse a stored code. Anything unrecognised is `Unset`.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_uppercase().as_str() {
            "SIM" => Self::Affirmative,
            "NÃO" | "NAO" => Self::Negative,
            "N/A" | "NA" => Self::NotApplicable,
            _ => Self::Unset,
        }
    }

    /// The status vocabulary of the remote dashboard.
    #[must_use]
    pub fn remote_status(self) -> &'static str {
        match self {
            Self::Affirmative => "ok",
            Self::Negative => "problema",
            Self::NotApplicable => "na",
            Self::Unset => "pendente",
        }
    }

    /// Whether the driver answered this item.
    #[must_use]
    pub fn is_set(self) -> bool {
        !matches!(self, Self::Unset)
    }
}

/// Trip-stage flags. Independent; more than one may be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TripFlags {
    /// Entering the facility.
    pub entry: bool,
    /// Leaving the facility.
    pub exit: bool,
    /// Overnight stay.
    pub overnight: bool,
    /// Intermediate stop.
    pub stop: bool,
}

impl TripFlags {
    /// Labels of the flags that are set, in display order.
    #[must_use]
    pub fn labels(&self) -> Vec<&'static str> {
        [
            (self.entry, "Entrada"),
            (self.exit, "Saída"),
            (self.overnight, "Pernoite"),
            (self.stop, "Parada"),
        ]
        .into_iter()
        .filter_map(|(set, label)| set.then_some(label))
        .collect()
    }
}

/// Header fields the driver fills in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// External reference of the driver (tax id).
    pub operator_id: String,
    /// Driver display name.
    pub operator_name: String,
    /// When the inspection was started.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Tractor unit plate.
    pub tractor_plate: String,
    /// Trailer plate.
    pub trailer_plate: String,
    /// CRT/MIC/DUE transport document reference. Absent for empty trips.
    #[serde(default)]
    pub document_ref: Option<String>,
    /// Seal number.
    #[serde(default)]
    pub seal_number: Option<String>,
    /// Gross weight as a grouped-digit string ("20.000").
    #[serde(default)]
    pub gross_weight: Option<String>,
    /// Trip-stage flags.
    #[serde(default)]
    pub flags: TripFlags,
}

impl Header {
    /// The transport document reference, if one was entered.
    #[must_use]
    pub fn document_ref(&self) -> Option<&str> {
        non_blank(self.document_ref.as_deref())
    }

    /// The seal number, if one was entered.
    #[must_use]
    pub fn seal_number(&self) -> Option<&str> {
        non_blank(self.seal_number.as_deref())
    }

    /// The gross weight, if one was entered.
    #[must_use]
    pub fn gross_weight(&self) -> Option<&str> {
        non_blank(self.gross_weight.as_deref())
    }

    /// Bring driver input into its stored form. The gross weight is kept as
    /// grouped digits; an entry with no digits is cleared.
    pub fn normalize(&mut self) {
        self.gross_weight = self
            .gross_weight
            .as_deref()
            .map(format_weight)
            .filter(|w| !w.is_empty());
    }
}

/// A persisted submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Identifier assigned by the record store.
    pub id: SubmissionId,
    /// Driver-entered header.
    #[serde(flatten)]
    pub header: Header,
    /// Collection location. Never empty; may hold a placeholder sentinel.
    pub location: String,
    /// Whether the report email went out.
    pub email_sent: bool,
    /// Rendered document, once one exists.
    pub document_path: Option<PathBuf>,
}

impl Submission {
    /// Delivery state as shown in listings.
    #[must_use]
    pub fn delivery_status(&self) -> DeliveryStatus {
        if self.email_sent {
            DeliveryStatus::Sent
        } else if self.document_path.is_some() {
            DeliveryStatus::Pending
        } else {
            DeliveryStatus::Incomplete
        }
    }
}

/// Where a submission stands in the delivery pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Email delivered.
    Sent,
    /// Document rendered, email still owed.
    Pending,
    /// No document yet.
    Incomplete,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Pending => write!(f, "pending"),
            Self::Incomplete => write!(f, "incomplete"),
        }
    }
}

/// One inspection point of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Catalog position, 1..=25.
    pub ordinal: u8,
    /// Recorded answer.
    #[serde(default)]
    pub outcome: Outcome,
    /// Free-text comment.
    #[serde(default)]
    pub comment: Option<String>,
    /// Photo taken for this item.
    #[serde(default)]
    pub photo: Option<PathBuf>,
}

impl LineItem {
    /// A blank item for the given ordinal.
    #[must_use]
    pub fn unset(ordinal: u8) -> Self {
        Self {
            ordinal,
            outcome: Outcome::Unset,
            comment: None,
            photo: None,
        }
    }

    /// Catalog description, or an empty string for an unknown ordinal.
    #[must_use]
    pub fn description(&self) -> &'static str {
        catalog::entry(self.ordinal).map_or("", |e| e.description)
    }

    /// The comment, if one was written.
    #[must_use]
    pub fn comment(&self) -> Option<&str> {
        non_blank(self.comment.as_deref())
    }
}

/// A field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// A required header field is blank.
    #[error("campo obrigatório não preenchido: {0}")]
    Missing(&'static str),
    /// An item was not answered.
    #[error("item {0} sem resposta")]
    Unanswered(u8),
    /// An ordinal of the catalog has no item.
    #[error("item {0} ausente")]
    MissingItem(u8),
    /// An item carries an ordinal outside the catalog.
    #[error("item {0} desconhecido")]
    UnknownItem(u8),
    /// The same ordinal appears twice.
    #[error("item {0} repetido")]
    DuplicateItem(u8),
}

/// Everything the form holds at the moment the driver presses save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSnapshot {
    /// Set when editing an existing submission.
    #[serde(default)]
    pub id: Option<SubmissionId>,
    /// Header fields.
    #[serde(flatten)]
    pub header: Header,
    /// Location resolved while the form was open, if any.
    #[serde(default)]
    pub location: Option<String>,
    /// The 25 inspection points.
    pub items: Vec<LineItem>,
}

impl FormSnapshot {
    /// A fresh form with all 25 items unset.
    #[must_use]
    pub fn blank(now: DateTime<Utc>) -> Self {
        Self {
            id: None,
            header: Header {
                operator_id: String::new(),
                operator_name: String::new(),
                created_at: now,
                tractor_plate: String::new(),
                trailer_plate: String::new(),
                document_ref: None,
                seal_number: None,
                gross_weight: None,
                flags: TripFlags::default(),
            },
            location: None,
            items: (1..=ITEM_COUNT).map(LineItem::unset).collect(),
        }
    }

    /// Check the form can be finalized.
    ///
    /// # Errors
    ///
    /// Returns every field-level problem found, in form order.
    pub fn validate(&self) -> std::result::Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        let required = [
            ("motorista_cpf", &self.header.operator_id),
            ("motorista", &self.header.operator_name),
            ("placa_cavalo", &self.header.tractor_plate),
            ("placa_carreta", &self.header.trailer_plate),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                errors.push(FieldError::Missing(field));
            }
        }

        let mut seen = HashSet::new();
        for item in &self.items {
            if catalog::entry(item.ordinal).is_none() {
                errors.push(FieldError::UnknownItem(item.ordinal));
            } else if !seen.insert(item.ordinal) {
                errors.push(FieldError::DuplicateItem(item.ordinal));
            } else if !item.outcome.is_set() {
                errors.push(FieldError::Unanswered(item.ordinal));
            }
        }
        for ordinal in 1..=ITEM_COUNT {
            if !seen.contains(&ordinal) {
                errors.push(FieldError::MissingItem(ordinal));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn non_digits() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\D").expect("Invalid regex pattern"))
}

/// Group the digits of a weight entry with '.' separators ("20000" -> "20.000").
///
/// Non-digit characters are dropped first, so re-formatting is stable.
#[must_use]
pub fn format_weight(raw: &str) -> String {
    let digits = non_digits().replace_all(raw, "");
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return if raw.chars().any(|c| c == '0') {
            "0".to_string()
        } else {
            String::new()
        };
    }

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    grouped
}

/// Numeric value of a stored weight. Unparseable input counts as zero.
#[must_use]
pub fn parse_weight(stored: Option<&str>) -> i64 {
    stored
        .map(|s| s.replace(['.', ','], ""))
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}
