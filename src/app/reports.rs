//! CSV and PDF renderings of a sol's contribution ledger.

use std::collections::HashMap;

use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfLayerReference};
use uuid::Uuid;

use crate::domain::{AppError, ParticipantInfo, Payment, Sol, Transfer};

/// Everything a report needs, fetched up front by the service layer.
pub struct ReportInput {
    pub sol: Sol,
    pub participants: Vec<ParticipantInfo>,
    pub payments: Vec<Payment>,
    pub transfers: Vec<Transfer>,
}

impl ReportInput {
    fn member_label(&self, user_id: Uuid) -> (&str, &str) {
        self.participants
            .iter()
            .find(|p| p.user_id == user_id)
            .map(|p| (p.full_name.as_str(), p.email.as_str()))
            .unwrap_or(("unknown", "unknown"))
    }
}

/// Render the ledger as CSV: one row per contribution, then one per payout.
pub fn render_csv(input: &ReportInput) -> Result<Vec<u8>, AppError> {
    let mut writer = csv::Writer::from_writer(vec![]);

    writer
        .write_record([
            "record", "tour", "member", "email", "amount", "currency", "method", "status", "date",
        ])
        .map_err(csv_error)?;

    for payment in &input.payments {
        let (name, email) = input.member_label(payment.user_id);
        writer
            .write_record([
                "contribution",
                &payment.tour.to_string(),
                name,
                email,
                &format_amount(payment.amount),
                &input.sol.currency,
                payment.method.as_str(),
                payment.status.as_str(),
                &payment.created_at.to_rfc3339(),
            ])
            .map_err(csv_error)?;
    }

    for transfer in &input.transfers {
        let (name, email) = input.member_label(transfer.beneficiary_id);
        writer
            .write_record([
                "payout",
                &transfer.tour.to_string(),
                name,
                email,
                &format_amount(transfer.amount),
                &input.sol.currency,
                "transfer",
                transfer.status.as_str(),
                &transfer.created_at.to_rfc3339(),
            ])
            .map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("csv buffer error: {e}")))?;
    Ok(bytes)
}

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 18.0;
const LINE_HEIGHT_MM: f32 = 6.0;

/// Render the ledger as a paginated A4 PDF.
pub fn render_pdf(input: &ReportInput) -> Result<Vec<u8>, AppError> {
    let title = format!("Sol report: {}", input.sol.name);
    let (doc, page, layer) = PdfDocument::new(&title, Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "report");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(pdf_error)?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(pdf_error)?;

    let mut writer = PageWriter {
        doc: &doc,
        layer: doc.get_page(page).get_layer(layer),
        y: PAGE_HEIGHT_MM - MARGIN_MM,
    };

    writer.line(&bold, 16.0, &title);
    writer.line(
        &font,
        10.0,
        &format!(
            "Status: {} | Tour: {} | Contribution: {} {} | Participants: {}",
            input.sol.status,
            input.sol.current_tour,
            format_amount(input.sol.amount),
            input.sol.currency,
            input.participants.len(),
        ),
    );
    writer.skip();

    writer.line(&bold, 12.0, "Rotation order");
    for participant in &input.participants {
        writer.line(
            &font,
            10.0,
            &format!(
                "{}. {} <{}>",
                participant.rotation_order, participant.full_name, participant.email
            ),
        );
    }
    writer.skip();

    writer.line(&bold, 12.0, "Contributions");
    let mut by_tour: HashMap<i32, Vec<&Payment>> = HashMap::new();
    for payment in &input.payments {
        by_tour.entry(payment.tour).or_default().push(payment);
    }
    let mut tours: Vec<i32> = by_tour.keys().copied().collect();
    tours.sort_unstable();
    for tour in tours {
        writer.line(&font, 10.0, &format!("Tour {tour}:"));
        for payment in &by_tour[&tour] {
            let (name, _) = input.member_label(payment.user_id);
            writer.line(
                &font,
                10.0,
                &format!(
                    "    {} - {} {} - {} ({})",
                    name,
                    format_amount(payment.amount),
                    input.sol.currency,
                    payment.status,
                    payment.method,
                ),
            );
        }
    }
    writer.skip();

    writer.line(&bold, 12.0, "Payouts");
    if input.transfers.is_empty() {
        writer.line(&font, 10.0, "No payout made yet.");
    }
    for transfer in &input.transfers {
        let (name, _) = input.member_label(transfer.beneficiary_id);
        writer.line(
            &font,
            10.0,
            &format!(
                "Tour {} -> {} - {} {} - {}",
                transfer.tour,
                name,
                format_amount(transfer.amount),
                input.sol.currency,
                transfer.status,
            ),
        );
    }

    doc.save_to_bytes()
        .map_err(|e| AppError::Internal(format!("pdf serialization failed: {e}")))
}

/// Cursor over A4 pages, breaking to a new page when the bottom margin is hit.
struct PageWriter<'a> {
    doc: &'a printpdf::PdfDocumentReference,
    layer: PdfLayerReference,
    y: f32,
}

impl PageWriter<'_> {
    fn line(&mut self, font: &IndirectFontRef, size: f32, text: &str) {
        if self.y < MARGIN_MM + LINE_HEIGHT_MM {
            let (page, layer) =
                self.doc
                    .add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "report");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = PAGE_HEIGHT_MM - MARGIN_MM;
        }
        self.layer
            .use_text(text, size, Mm(MARGIN_MM), Mm(self.y), font);
        self.y -= LINE_HEIGHT_MM;
    }

    fn skip(&mut self) {
        self.y -= LINE_HEIGHT_MM / 2.0;
    }
}

fn format_amount(minor_units: i64) -> String {
    format!("{}.{:02}", minor_units / 100, minor_units % 100)
}

fn csv_error(e: csv::Error) -> AppError {
    AppError::Internal(format!("csv serialization failed: {e}"))
}

fn pdf_error(e: printpdf::Error) -> AppError {
    AppError::Internal(format!("pdf rendering failed: {e}"))
}
