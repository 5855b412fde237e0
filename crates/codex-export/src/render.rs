//! Drawing laid-out pages with printpdf.

use crate::layout::{layout, PageLayout, Style, PAGE_HEIGHT_MM, PAGE_WIDTH_MM};
use crate::text::sanitize_text;
use crate::{ExportDocument, ExportError};
use printpdf::{BuiltinFont, Color, IndirectFontRef, Mm, PdfDocument, PdfLayerReference, Rgb};

fn pdf_error(err: printpdf::Error) -> ExportError {
    ExportError::Pdf(err.to_string())
}

fn colour_for(style: Style) -> Color {
    match style {
        Style::Footer | Style::Brand | Style::Subtitle => {
            Color::Rgb(Rgb::new(0.42, 0.42, 0.45, None))
        }
        _ => Color::Rgb(Rgb::new(0.08, 0.08, 0.1, None)),
    }
}

fn draw_page(
    layer: &PdfLayerReference,
    page: &PageLayout,
    regular: &IndirectFontRef,
    bold: &IndirectFontRef,
) {
    for line in &page.lines {
        let font = if line.style.bold() { bold } else { regular };
        layer.set_fill_color(colour_for(line.style));
        layer.use_text(
            line.text.as_str(),
            line.style.size_pt(),
            Mm(line.x_mm),
            Mm(line.y_mm),
            font,
        );
    }
}

/// Renders a codex as an A4 PDF and returns the file bytes.
///
/// # Errors
///
/// Returns [`ExportError::Pdf`] if printpdf fails to load a font or to
/// serialize the document.
pub fn render_pdf(doc: &ExportDocument) -> Result<Vec<u8>, ExportError> {
    let pages = layout(doc);

    let (pdf, first_page, first_layer) = PdfDocument::new(
        sanitize_text(&doc.title),
        Mm(PAGE_WIDTH_MM),
        Mm(PAGE_HEIGHT_MM),
        "Page 1",
    );
    let regular = pdf
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(pdf_error)?;
    let bold = pdf
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(pdf_error)?;

    for page in &pages {
        let layer = if page.number == 1 {
            pdf.get_page(first_page).get_layer(first_layer)
        } else {
            let (page_idx, layer_idx) = pdf.add_page(
                Mm(PAGE_WIDTH_MM),
                Mm(PAGE_HEIGHT_MM),
                format!("Page {}", page.number),
            );
            pdf.get_page(page_idx).get_layer(layer_idx)
        };
        draw_page(&layer, page, &regular, &bold);
    }

    let bytes = pdf.save_to_bytes().map_err(pdf_error)?;
    tracing::debug!(
        title = %doc.title,
        pages = pages.len(),
        bytes = bytes.len(),
        "rendered codex pdf"
    );
    Ok(bytes)
}
