//! Document rendering.
//!
//! The renderer turns a saved submission into a paginated PDF report. It is
//! not timeout-aware; callers bound it with [`crate::bounded::run_bounded`].

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use genpdf::elements::{Break, FrameCellDecorator, Image, Paragraph, TableLayout};
use genpdf::style::{Style, StyledString};
use genpdf::{Alignment, Document, Element, SimplePageDecorator};
use tracing::{debug, warn};

use crate::checklist::{LineItem, Outcome, Submission};
use crate::error::{Error, Result};

/// Document title.
pub const TITLE: &str = "CHECKLIST PARA INSPEÇÃO DE VEÍCULOS - 17 PONTOS";

const IMAGE_DPI: f64 = 150.0;

/// Produces a document artifact for a submission.
#[async_trait]
pub trait DocumentRenderer: Send + Sync + fmt::Debug {
    /// Render the report. `None` when no document could be produced.
    async fn render(&self, submission: &Submission, items: &[LineItem]) -> Option<PathBuf>;
}

/// `checklist_{tractor}_{yyyyMMdd_HHmmss}.pdf`
#[must_use]
pub fn document_file_name(tractor_plate: &str, generated_at: DateTime<Local>) -> String {
    format!(
        "checklist_{}_{}.pdf",
        tractor_plate.trim(),
        generated_at.format("%Y%m%d_%H%M%S")
    )
}

/// Location as printed in the header table.
#[must_use]
pub fn location_display(location: &str) -> String {
    let location = location.trim();
    if location.is_empty() {
        crate::location::UNAVAILABLE.to_string()
    } else if location.starts_with("Lat:") {
        format!("Coordenadas: {location}")
    } else {
        location.to_string()
    }
}

fn local(at: DateTime<Utc>) -> DateTime<Local> {
    at.with_timezone(&Local)
}

/// Label/value rows of the header table.
#[must_use]
pub fn header_rows(submission: &Submission) -> Vec<(&'static str, String)> {
    let header = &submission.header;
    let or_blank = |v: Option<&str>| v.unwrap_or_default().to_string();
    let flags = header.flags.labels();

    vec![
        ("Local da Coleta", location_display(&submission.location)),
        (
            "Data",
            local(header.created_at).format("%d/%m/%Y %H:%M").to_string(),
        ),
        ("CRT/MIC/DUE", or_blank(header.document_ref())),
        ("Responsável pela inspeção", header.operator_name.clone()),
        ("Placa cavalo", header.tractor_plate.clone()),
        ("Placa carreta", header.trailer_plate.clone()),
        ("Motorista", header.operator_name.clone()),
        ("N. Lacre", or_blank(header.seal_number())),
        ("Peso Bruto (Kg)", or_blank(header.gross_weight())),
        (
            "Status",
            if flags.is_empty() {
                "N/A".to_string()
            } else {
                flags.join(", ")
            },
        ),
    ]
}

/// "Item N - description: comment" lines for every commented item.
#[must_use]
pub fn comment_lines(items: &[LineItem]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| {
            item.comment().map(|c| {
                format!("Item {} - {}: {c}", item.ordinal, item.description())
            })
        })
        .collect()
}

/// The SIM / NÃO / N/A column marks of an item.
fn outcome_marks(outcome: Outcome) -> [&'static str; 3] {
    let mark = |o: Outcome| if outcome == o { "X" } else { "" };
    [
        mark(Outcome::Affirmative),
        mark(Outcome::Negative),
        mark(Outcome::NotApplicable),
    ]
}

/// PDF renderer built on `genpdf`.
#[derive(Debug, Clone)]
pub struct PdfRenderer {
    output_dir: PathBuf,
    fonts_dir: PathBuf,
    font_family: String,
}

impl PdfRenderer {
    /// Create a renderer writing into `output_dir`.
    pub fn new(
        output_dir: impl Into<PathBuf>,
        fonts_dir: impl Into<PathBuf>,
        font_family: impl Into<String>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            fonts_dir: fonts_dir.into(),
            font_family: font_family.into(),
        }
    }

    fn configure_document(&self) -> Result<Document> {
        let fonts = genpdf::fonts::from_files(&self.fonts_dir, &self.font_family, None)?;
        let mut doc = Document::new(fonts);
        doc.set_title(TITLE);
        doc.set_font_size(9);
        doc.set_line_spacing(1.1);

        let mut decorator = SimplePageDecorator::new();
        decorator.set_margins(10);
        doc.set_page_decorator(decorator);
        Ok(doc)
    }

    fn write(&self, submission: &Submission, items: &[LineItem]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir).map_err(|e| Error::DirectoryCreate {
            path: self.output_dir.clone(),
            source: e,
        })?;

        let mut doc = self.configure_document()?;
        let bold = Style::new().bold();

        doc.push(
            Paragraph::new(StyledString::new(TITLE, Style::new().bold().with_font_size(12)))
                .aligned(Alignment::Center),
        );
        doc.push(Break::new(1));

        let mut header = TableLayout::new(vec![1, 2]);
        header.set_cell_decorator(FrameCellDecorator::new(true, true, false));
        for (label, value) in header_rows(submission) {
            header
                .row()
                .element(Paragraph::new(StyledString::new(label, bold)).padded(1))
                .element(Paragraph::new(value).padded(1))
                .push()?;
        }
        doc.push(header);
        doc.push(Break::new(1));

        doc.push(Paragraph::new(StyledString::new("Itens Inspecionados", bold)));
        let mut table = TableLayout::new(vec![1, 8, 1, 1, 1]);
        table.set_cell_decorator(FrameCellDecorator::new(true, true, false));
        let mut heading = table.row();
        for column in ["Nº", "Item Inspecionado", "SIM", "NÃO", "N/A"] {
            heading.push_element(Paragraph::new(StyledString::new(column, bold)).padded(1));
        }
        heading.push()?;
        for item in items {
            let [yes, no, na] = outcome_marks(item.outcome);
            table
                .row()
                .element(Paragraph::new(item.ordinal.to_string()).padded(1))
                .element(Paragraph::new(item.description()).padded(1))
                .element(Paragraph::new(yes).aligned(Alignment::Center))
                .element(Paragraph::new(no).aligned(Alignment::Center))
                .element(Paragraph::new(na).aligned(Alignment::Center))
                .push()?;
        }
        doc.push(table);
        doc.push(Break::new(1));

        doc.push(Paragraph::new(StyledString::new("Comentários:", bold)));
        let comments = comment_lines(items);
        if comments.is_empty() {
            doc.push(Paragraph::new("Nenhum comentário registrado"));
        }
        for line in comments {
            doc.push(Paragraph::new(line));
        }
        doc.push(Break::new(1));

        doc.push(Paragraph::new(StyledString::new(
            "Fotos relacionadas aos itens:",
            bold,
        )));
        let photos: Vec<(&LineItem, &Path)> = items
            .iter()
            .filter_map(|i| i.photo.as_deref().map(|p| (i, p)))
            .collect();
        if photos.is_empty() {
            doc.push(Paragraph::new("Nenhuma foto registrada"));
        }
        for (item, path) in photos {
            doc.push(Paragraph::new(format!(
                "Foto relacionada ao item {} - {}:",
                item.ordinal,
                item.description()
            )));
            match Image::from_path(path) {
                Ok(mut image) => {
                    image.set_dpi(IMAGE_DPI);
                    image.set_alignment(Alignment::Center);
                    doc.push(image);
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Photo could not be embedded");
                    doc.push(Paragraph::new(format!("Erro ao carregar imagem: {e}")));
                }
            }
            doc.push(Break::new(1));
        }

        let now = Local::now();
        doc.push(Break::new(2));
        doc.push(
            Paragraph::new(StyledString::new("ASSINADO DIGITALMENTE POR", bold))
                .aligned(Alignment::Center),
        );
        doc.push(
            Paragraph::new(format!("Motorista: {}", submission.header.operator_name))
                .aligned(Alignment::Center),
        );
        doc.push(
            Paragraph::new(format!(
                "Data Checklist: {}",
                local(submission.header.created_at).format("%d/%m/%Y %H:%M")
            ))
            .aligned(Alignment::Center),
        );
        doc.push(Break::new(1));
        doc.push(
            Paragraph::new(StyledString::new(
                format!(
                    "Documento gerado em TruckCheck by Paranálog {}",
                    now.format("%d/%m/%Y %H:%M:%S")
                ),
                Style::new().italic().with_font_size(7),
            ))
            .aligned(Alignment::Center),
        );

        let path = self
            .output_dir
            .join(document_file_name(&submission.header.tractor_plate, now));
        doc.render_to_file(&path)?;
        Ok(path)
    }
}

#[async_trait]
impl DocumentRenderer for PdfRenderer {
    async fn render(&self, submission: &Submission, items: &[LineItem]) -> Option<PathBuf> {
        let renderer = self.clone();
        let submission = submission.clone();
        let items = items.to_vec();
        let id = submission.id;

        let result =
            tokio::task::spawn_blocking(move || renderer.write(&submission, &items)).await;
        match result {
            Ok(Ok(path)) => {
                debug!(submission_id = %id, path = %path.display(), "Document rendered");
                Some(path)
            }
            Ok(Err(e)) => {
                warn!(submission_id = %id, error = %e, "Document rendering failed");
                None
            }
            Err(e) => {
                warn!(submission_id = %id, error = %e, "Document rendering task failed");
                None
            }
        }
    }
}
