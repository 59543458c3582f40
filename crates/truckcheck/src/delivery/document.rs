//! Documents written to the remote dashboard.
//!
//! Field names are a contract with the dashboard, including the duplicated
//! Portuguese/English aliases it reads.

use std::collections::BTreeMap;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crate::catalog;
use crate::checklist::{parse_weight, LineItem, Outcome, Submission};

/// Collection holding checklist documents.
pub const CHECKLISTS: &str = "checklists";
/// Collection holding vehicle documents.
pub const VEHICLES: &str = "vehicles";
/// Collection holding driver documents.
pub const DRIVERS: &str = "drivers";

const SCHEMA_VERSION: &str = "1.0";
const SOURCE: &str = "TruckCheck";
const COMPLETION_TIME_MINUTES: f64 = 8.5;

/// `{yyyy-MM-dd}_{plate without dashes}_{HH}h{mm}m`, in local time.
#[must_use]
pub fn document_id(submission: &Submission) -> String {
    let created = submission.header.created_at.with_timezone(&Local);
    let plate = submission.header.tractor_plate.trim().replace('-', "");
    let plate = if plate.is_empty() {
        "UNKNOWN".to_string()
    } else {
        plate
    };
    format!(
        "{}_{plate}_{}",
        created.format("%Y-%m-%d"),
        created.format("%Hh%Mm")
    )
}

/// Items with their photo references removed.
#[must_use]
pub fn strip_photos(items: &[LineItem]) -> Vec<LineItem> {
    items
        .iter()
        .map(|item| LineItem {
            photo: None,
            ..item.clone()
        })
        .collect()
}

/// The checklist document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ChecklistDocument {
    pub id: String,
    pub company_id: String,
    pub vehicle_id: String,
    pub driver_id: String,

    pub vehicle_plate: String,
    pub trailer_plate: String,
    pub placa_carreta: String,
    pub driver_name: String,
    pub motorista_name: String,

    pub timestamp: DateTime<Utc>,
    pub date: String,
    pub status: &'static str,

    pub crt_mic_due: String,
    pub seal_number: String,
    pub n_lacre: String,
    pub gross_weight: i64,

    pub location: LocationBlock,
    pub items: BTreeMap<String, ItemEntry>,
    pub summary: Summary,
    pub attachments: Attachments,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: &'static str,
    pub source: &'static str,
    pub device_info: DeviceInfo,
}

/// Location as the dashboard reads it. Coordinates are not tracked.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct LocationBlock {
    pub address: String,
    pub coordinates: Coordinates,
}

/// A coordinate pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// One entry of the `items` map.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ItemEntry {
    pub numero_item: u8,
    pub name: String,
    pub descricao: String,
    pub status: &'static str,
    pub actual_answer: &'static str,
    pub expected_answer: &'static str,
    pub is_conform: bool,
    pub comentario: String,
    pub observation: String,
    pub tem_foto: bool,
    pub foto_path: String,
    pub photo_url: String,
    pub required: bool,
    pub critical: bool,
    pub is_critical: bool,
    pub category: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl ItemEntry {
    fn new(item: &LineItem, now: DateTime<Utc>) -> Self {
        let description = item.description().to_string();
        let comment = item.comment.clone().unwrap_or_default();
        let photo = item
            .photo
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let critical = catalog::is_critical(item.ordinal);

        Self {
            numero_item: item.ordinal,
            name: description.clone(),
            descricao: description,
            status: item.outcome.remote_status(),
            actual_answer: item.outcome.code(),
            expected_answer: catalog::expected_code(item.ordinal),
            is_conform: catalog::is_conform(item.ordinal, item.outcome),
            comentario: comment.clone(),
            observation: comment,
            tem_foto: item.photo.is_some(),
            foto_path: photo.clone(),
            photo_url: photo,
            required: true,
            critical,
            is_critical: critical,
            category: catalog::category_tag(item.ordinal),
            timestamp: now,
        }
    }
}

/// Counts over the items.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    /// Number of items.
    pub total_items: u32,
    /// Conformant items.
    pub items_ok: u32,
    /// Non-conformant items that are not N/A.
    pub items_problema: u32,
    /// Non-conformant items answered N/A.
    #[serde(rename = "itemsNA")]
    pub items_na: u32,
    /// Critical items among `items_problema`.
    pub critical_issues: u32,
    /// Conformant share, whole percent rounded down.
    pub conformity_rate: u32,
    /// Minutes spent filling the form.
    pub completion_time: f64,
}

impl Summary {
    /// Compute the summary of `items`.
    #[must_use]
    pub fn compute(items: &[LineItem]) -> Self {
        let mut summary = Self {
            total_items: 0,
            items_ok: 0,
            items_problema: 0,
            items_na: 0,
            critical_issues: 0,
            conformity_rate: 0,
            completion_time: COMPLETION_TIME_MINUTES,
        };

        for item in items {
            summary.total_items += 1;
            if catalog::is_conform(item.ordinal, item.outcome) {
                summary.items_ok += 1;
            } else if item.outcome == Outcome::NotApplicable {
                summary.items_na += 1;
            } else {
                summary.items_problema += 1;
                if catalog::is_critical(item.ordinal) {
                    summary.critical_issues += 1;
                }
            }
        }
        if summary.total_items > 0 {
            summary.conformity_rate = summary.items_ok * 100 / summary.total_items;
        }
        summary
    }
}

/// Attachment references.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Attachments {
    pub photos: Vec<PhotoRef>,
    pub pdf_generated: bool,
    pub pdf_path: String,
    pub email_sent: bool,
}

/// A photo and the item it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct PhotoRef {
    pub path: String,
    pub item_number: u8,
}

/// Where the document came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct DeviceInfo {
    pub os: &'static str,
    pub app: &'static str,
}

impl ChecklistDocument {
    /// Build the document for a submission.
    #[must_use]
    pub fn build(
        submission: &Submission,
        items: &[LineItem],
        company_id: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let header = &submission.header;
        let created = header.created_at;
        let text = |v: Option<&str>| v.unwrap_or_default().to_string();

        Self {
            id: document_id(submission),
            company_id: company_id.to_string(),
            vehicle_id: header.tractor_plate.clone(),
            driver_id: header.operator_id.clone(),

            vehicle_plate: header.tractor_plate.clone(),
            trailer_plate: header.trailer_plate.clone(),
            placa_carreta: header.trailer_plate.clone(),
            driver_name: header.operator_name.clone(),
            motorista_name: header.operator_name.clone(),

            timestamp: created,
            date: created.with_timezone(&Local).format("%Y-%m-%d").to_string(),
            status: "completed",

            crt_mic_due: text(header.document_ref()),
            seal_number: text(header.seal_number()),
            n_lacre: text(header.seal_number()),
            gross_weight: parse_weight(header.gross_weight()),

            location: LocationBlock {
                address: submission.location.clone(),
                coordinates: Coordinates::default(),
            },
            items: items
                .iter()
                .map(|item| {
                    (
                        catalog::item_key(item.ordinal).into_owned(),
                        ItemEntry::new(item, now),
                    )
                })
                .collect(),
            summary: Summary::compute(items),
            attachments: Attachments {
                photos: items
                    .iter()
                    .filter_map(|item| {
                        item.photo.as_ref().map(|p| PhotoRef {
                            path: p.display().to_string(),
                            item_number: item.ordinal,
                        })
                    })
                    .collect(),
                pdf_generated: submission.document_path.is_some(),
                pdf_path: submission
                    .document_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                email_sent: submission.email_sent,
            },

            created_at: created,
            updated_at: now,
            version: SCHEMA_VERSION,
            source: SOURCE,
            device_info: DeviceInfo {
                os: std::env::consts::OS,
                app: SOURCE,
            },
        }
    }
}

/// Vehicle document, keyed by tractor plate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct VehicleDocument {
    pub id: String,
    pub company_id: String,
    pub plate: String,
    pub trailer_plate: String,
    pub current_driver: String,
    pub driver_id: String,
    pub last_checklist_date: DateTime<Utc>,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl VehicleDocument {
    /// `None` when the submission has no tractor plate.
    #[must_use]
    pub fn build(submission: &Submission, company_id: &str, now: DateTime<Utc>) -> Option<Self> {
        let header = &submission.header;
        let plate = header.tractor_plate.trim();
        (!plate.is_empty()).then(|| Self {
            id: plate.to_string(),
            company_id: company_id.to_string(),
            plate: plate.to_string(),
            trailer_plate: header.trailer_plate.clone(),
            current_driver: header.operator_name.clone(),
            driver_id: header.operator_id.clone(),
            last_checklist_date: header.created_at,
            active: true,
            updated_at: now,
        })
    }
}

/// Driver document, keyed by operator id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct DriverDocument {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub cpf: String,
    pub last_checklist_date: DateTime<Utc>,
    pub current_vehicle: String,
    pub assigned_vehicles: Vec<String>,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl DriverDocument {
    /// `None` when the submission has no operator id.
    #[must_use]
    pub fn build(submission: &Submission, company_id: &str, now: DateTime<Utc>) -> Option<Self> {
        let header = &submission.header;
        let operator = header.operator_id.trim();
        (!operator.is_empty()).then(|| Self {
            id: operator.to_string(),
            company_id: company_id.to_string(),
            name: header.operator_name.clone(),
            cpf: operator.to_string(),
            last_checklist_date: header.created_at,
            current_vehicle: header.tractor_plate.clone(),
            assigned_vehicles: vec![header.tractor_plate.clone()],
            active: true,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checklist::tests::complete_form;
    use crate::checklist::SubmissionId;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn submission() -> Submission {
        let mut header = complete_form().header;
        header.created_at = Local
            .with_ymd_and_hms(2024, 3, 5, 14, 7, 9)
            .unwrap()
            .with_timezone(&Utc);
        Submission {
            id: SubmissionId(7),
            header,
            location: "Curitiba - PR".to_string(),
            email_sent: false,
            document_path: Some(PathBuf::from("/docs/r.pdf")),
        }
    }

    #[test]
    fn test_document_id() {
        assert_eq!(document_id(&submission()), "2024-03-05_ABC1234_14h07m");

        let mut sub = submission();
        sub.header.tractor_plate = " ".to_string();
        assert!(document_id(&sub).contains("_UNKNOWN_"));
    }

    #[test]
    fn test_summary_of_expected_answers() {
        let summary = Summary::compute(&complete_form().items);
        assert_eq!(summary.total_items, 25);
        assert_eq!(summary.items_ok, 25);
        assert_eq!(summary.items_problema, 0);
        assert_eq!(summary.items_na, 0);
        assert_eq!(summary.conformity_rate, 100);
    }

    #[test]
    fn test_summary_counts_problems_and_na() {
        let mut items = complete_form().items;
        // Item 2 is critical; item 4 is not.
        items[1].outcome = Outcome::Negative;
        items[3].outcome = Outcome::NotApplicable;
        // Tail items expect "NÃO"; "SIM" is an incident on a critical item.
        items[21].outcome = Outcome::Affirmative;

        let summary = Summary::compute(&items);
        assert_eq!(summary.items_ok, 22);
        assert_eq!(summary.items_na, 1);
        assert_eq!(summary.items_problema, 2);
        assert_eq!(summary.critical_issues, 2);
        assert_eq!(summary.conformity_rate, 88);
    }

    #[test]
    fn test_checklist_document_fields() {
        let sub = submission();
        let mut items = complete_form().items;
        items[18].photo = Some(PathBuf::from("/photos/19.jpg"));
        let doc = ChecklistDocument::build(&sub, &items, "paranalog_001", Utc::now());
        let json = serde_json::to_value(&doc).unwrap();

        assert_eq!(json["id"], "2024-03-05_ABC1234_14h07m");
        assert_eq!(json["companyId"], "paranalog_001");
        assert_eq!(json["vehicleId"], "ABC-1234");
        assert_eq!(json["placaCarreta"], "XYZ-9876");
        assert_eq!(json["motoristaName"], "João da Silva");
        assert_eq!(json["nLacre"], "");
        assert_eq!(json["grossWeight"], 20_000);
        assert_eq!(json["status"], "completed");
        assert_eq!(json["date"], "2024-03-05");
        assert_eq!(json["location"]["address"], "Curitiba - PR");
        assert_eq!(json["summary"]["itemsNA"], 0);
        assert_eq!(json["attachments"]["pdfGenerated"], true);
        assert_eq!(json["attachments"]["photos"][0]["itemNumber"], 19);

        let items = json["items"].as_object().unwrap();
        assert_eq!(items.len(), 25);
        let tail = &items["autoridadeNotificada"];
        assert_eq!(tail["numeroItem"], 25);
        assert_eq!(tail["status"], "problema");
        assert_eq!(tail["actualAnswer"], "NÃO");
        assert_eq!(tail["expectedAnswer"], "NÃO");
        assert_eq!(tail["isConform"], true);
        assert_eq!(tail["category"], "oea");
        assert_eq!(tail["isCritical"], true);
        assert_eq!(items["motorCamaraFria"]["temFoto"], true);
    }

    #[test]
    fn test_strip_photos() {
        let mut items = complete_form().items;
        items[0].photo = Some(PathBuf::from("/photos/1.jpg"));
        let stripped = strip_photos(&items);
        assert!(stripped.iter().all(|i| i.photo.is_none()));
        assert_eq!(stripped[0].outcome, items[0].outcome);
    }

    #[test]
    fn test_side_documents() {
        let sub = submission();
        let now = Utc::now();

        let vehicle = VehicleDocument::build(&sub, "paranalog_001", now).unwrap();
        assert_eq!(vehicle.id, "ABC-1234");
        assert_eq!(vehicle.current_driver, "João da Silva");

        let driver = DriverDocument::build(&sub, "paranalog_001", now).unwrap();
        assert_eq!(driver.cpf, "123.456.789-00");
        assert_eq!(driver.assigned_vehicles, vec!["ABC-1234".to_string()]);

        let mut anonymous = sub;
        anonymous.header.operator_id = String::new();
        assert!(DriverDocument::build(&anonymous, "paranalog_001", now).is_none());
    }
}
