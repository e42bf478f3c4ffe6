//! Delivery receipt, rendered as an A4 PDF.
//!
//! The layout is built as styled text lines first, then typeset in a
//! monospaced builtin font so the item table keeps its columns.

use chrono::{DateTime, Utc};
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument};
use thiserror::Error;

use agriconnect_orders::OrderId;

use crate::projections::OrderReadModel;
use crate::users::UserProfile;

const RULE: &str = "------------------------------------------------------------------";

const PAGE_WIDTH: Mm = Mm(210.0);
const PAGE_HEIGHT: Mm = Mm(297.0);
const MARGIN_LEFT: f32 = 18.0;
const TOP: f32 = 280.0;
const BOTTOM: f32 = 15.0;

#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("failed to render receipt: {0}")]
    Render(String),
}

impl From<printpdf::Error> for ReceiptError {
    fn from(e: printpdf::Error) -> Self {
        ReceiptError::Render(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptDocument {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl ReceiptDocument {
    pub const CONTENT_TYPE: &'static str = "application/pdf";
}

pub fn receipt_file_name(order_id: OrderId) -> String {
    format!("AgriConnect_Receipt_{}.pdf", order_id.short())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Title,
    Heading,
    Body,
}

impl LineStyle {
    fn font_size(self) -> f32 {
        match self {
            LineStyle::Title => 18.0,
            LineStyle::Heading => 11.0,
            LineStyle::Body => 9.0,
        }
    }

    fn leading(self) -> f32 {
        match self {
            LineStyle::Title => 9.0,
            LineStyle::Heading => 6.5,
            LineStyle::Body => 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptLine {
    pub style: LineStyle,
    pub text: String,
}

fn line(style: LineStyle, text: impl Into<String>) -> ReceiptLine {
    ReceiptLine {
        style,
        text: text.into(),
    }
}

/// Text layout of the receipt of a delivered order. An unknown buyer renders
/// with placeholder contact details.
pub fn receipt_lines(
    order: &OrderReadModel,
    buyer: Option<&UserProfile>,
    delivered_at: DateTime<Utc>,
) -> Vec<ReceiptLine> {
    use LineStyle::{Body, Heading, Title};

    let short = order.order_id.short();
    let (buyer_name, buyer_email) = buyer
        .map(|b| (b.name.as_str(), b.email.as_str()))
        .unwrap_or(("-", "-"));
    let addr = &order.shipping_address;

    let mut out = vec![
        line(Title, "AgriConnect"),
        line(Body, "Connecting Farmers & Buyers Directly"),
        line(Heading, format!("RECEIPT #{short}")),
        line(Body, RULE),
        line(Heading, "Receipt Details"),
        line(Body, format!("  Order ID:  #{short}")),
        line(Body, format!("  Date:      {}", delivered_at.format("%-d %B %Y"))),
        line(Body, "  Status:    DELIVERED"),
        line(Body, format!("  Payment:   {}", order.payment_method.as_str())),
        line(Body, ""),
        line(Heading, "Buyer Details"),
        line(Body, format!("  Name:      {buyer_name}")),
        line(Body, format!("  Email:     {buyer_email}")),
        line(Body, format!("  Phone:     {}", addr.phone)),
        line(Body, RULE),
        line(Heading, "Delivery Address"),
        line(
            Body,
            format!("  {}, {}, {} - {}", addr.street, addr.city, addr.state, addr.pincode),
        ),
        line(Body, RULE),
        line(
            Heading,
            format!("{:<30} {:>12} {:>10} {:>12}", "PRODUCT", "QTY", "RATE (Rs.)", "SUBTOTAL (Rs.)"),
        ),
    ];

    for item in &order.items {
        let name: String = item.product_name.chars().take(30).collect();
        out.push(line(
            Body,
            format!(
                "{:<30} {:>12} {:>10} {:>12}",
                name,
                format!("{} {}", item.quantity, item.unit),
                format!("{}.00", item.price_per_unit),
                format!("{}.00", item.subtotal),
            ),
        ));
    }

    out.extend([
        line(Body, RULE),
        line(
            Heading,
            format!("{:<53} {:>12}", "TOTAL AMOUNT", format!("Rs. {}.00", order.total_amount)),
        ),
        line(Body, RULE),
        line(
            Body,
            "Thank you for shopping with AgriConnect. Fresh from the farm, straight to you.",
        ),
    ]);
    out
}

/// Render the receipt of a delivered order as a PDF document.
pub fn render_receipt(
    order: &OrderReadModel,
    buyer: Option<&UserProfile>,
    delivered_at: DateTime<Utc>,
) -> Result<ReceiptDocument, ReceiptError> {
    let short = order.order_id.short();
    let (doc, page, layer) = PdfDocument::new(
        format!("AgriConnect Receipt #{short}"),
        PAGE_WIDTH,
        PAGE_HEIGHT,
        "Receipt",
    );
    let regular = doc.add_builtin_font(BuiltinFont::Courier)?;
    let bold = doc.add_builtin_font(BuiltinFont::CourierBold)?;

    let mut current = doc.get_page(page).get_layer(layer);
    let mut y = TOP;
    for l in receipt_lines(order, buyer, delivered_at) {
        if y - l.style.leading() < BOTTOM {
            let (page, layer) = doc.add_page(PAGE_WIDTH, PAGE_HEIGHT, "Receipt");
            current = doc.get_page(page).get_layer(layer);
            y = TOP;
        }
        y -= l.style.leading();
        if l.text.is_empty() {
            continue;
        }
        let font: &IndirectFontRef = match l.style {
            LineStyle::Body => &regular,
            LineStyle::Title | LineStyle::Heading => &bold,
        };
        current.use_text(l.text, l.style.font_size(), Mm(MARGIN_LEFT), Mm(y), font);
    }

    Ok(ReceiptDocument {
        file_name: receipt_file_name(order.order_id),
        bytes: doc.save_to_bytes()?,
    })
}
