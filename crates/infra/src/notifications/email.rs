//! Order email content.

use agriconnect_orders::OrderStatus;

use crate::projections::OrderReadModel;

use super::receipt::ReceiptDocument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailContent {
    pub subject: String,
    pub text_body: String,
}

pub fn order_confirmation(order: &OrderReadModel, buyer_name: &str) -> EmailContent {
    let mut body = format!(
        "Order Confirmed!\n\nThank you, {buyer_name}. Your order has been placed successfully.\n\nOrder Summary\n"
    );
    push_items(&mut body, order, "Total Amount");

    let addr = &order.shipping_address;
    body.push_str(&format!(
        "\nDelivery Address\n{},\n{}, {} - {}\nPhone: {}\n",
        addr.street, addr.city, addr.state, addr.pincode, addr.phone
    ));
    body.push_str(&format!(
        "\nPayment: {}\nStatus: {}\n",
        order.payment_method.as_str(),
        order.status.label()
    ));

    EmailContent {
        subject: format!("Order Confirmed #{}", order.order_id.short()),
        text_body: body,
    }
}

pub fn status_message(status: OrderStatus) -> String {
    match status {
        OrderStatus::Confirmed => {
            "Great news! Your order has been confirmed by the farmer and is being prepared.".to_string()
        }
        OrderStatus::Processing => {
            "Your order is currently being processed and packed at the farm.".to_string()
        }
        OrderStatus::Shipped => {
            "Your order is on its way! Expect delivery within the next few days.".to_string()
        }
        OrderStatus::Delivered => {
            "Your order has been delivered. We hope you enjoy the fresh produce!".to_string()
        }
        OrderStatus::Cancelled => "Unfortunately, your order has been cancelled.".to_string(),
        OrderStatus::Pending => {
            format!("Your order status has been updated to {}.", status.label())
        }
    }
}

/// Status update email. The delivered email lists the items and points at the
/// attached receipt, when there is one.
pub fn status_update(
    order: &OrderReadModel,
    buyer_name: &str,
    status: OrderStatus,
    receipt: Option<&ReceiptDocument>,
) -> EmailContent {
    let short = order.order_id.short();
    let heading = match status {
        OrderStatus::Delivered => "Order Delivered!".to_string(),
        OrderStatus::Cancelled => "Order Cancelled".to_string(),
        other => format!("Order Update: {}", other.label()),
    };

    let mut body = format!("{heading}\n\nHi {buyer_name},\n{}\n\n", status_message(status));
    if status == OrderStatus::Delivered {
        body.push_str(&format!("Amount Paid: Rs.{}\n\nItemised Receipt\n", order.total_amount));
        push_items(&mut body, order, "Total Paid");
        if let Some(doc) = receipt {
            body.push_str(&format!("\nYour receipt is attached: {}\n", doc.file_name));
        }
    } else {
        body.push_str(&format!("Order #{short}\nTotal: Rs.{}\n", order.total_amount));
    }

    let subject = if status == OrderStatus::Delivered {
        format!("Receipt & Delivery Confirmation #{short}")
    } else {
        format!("Order {}: #{short}", status.label())
    };

    EmailContent {
        subject,
        text_body: body,
    }
}

fn push_items(body: &mut String, order: &OrderReadModel, total_label: &str) {
    for item in &order.items {
        body.push_str(&format!(
            "  {} x {} {} @ Rs.{} = Rs.{}\n",
            item.product_name, item.quantity, item.unit, item.price_per_unit, item.subtotal
        ));
    }
    body.push_str(&format!("  {total_label}: Rs.{}\n", order.total_amount));
}
