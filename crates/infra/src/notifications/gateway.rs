//! Notification Gateway: best-effort delivery of order events to people.

use thiserror::Error;
use tracing::warn;

use agriconnect_core::UserId;
use agriconnect_orders::OrderStatus;

use crate::projections::OrderReadModel;
use crate::users::UserDirectory;

use super::email::{order_confirmation, status_update};
use super::mailer::{Attachment, Email, MailError, Mailer};
use super::receipt::{ReceiptDocument, render_receipt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Created,
    StatusChanged { from: OrderStatus, to: OrderStatus },
}

/// An order as it stood right after the event being announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderNotification {
    pub kind: NotificationKind,
    pub order: OrderReadModel,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no profile for recipient {0}")]
    UnknownRecipient(UserId),

    #[error(transparent)]
    Mail(#[from] MailError),
}

pub trait NotificationGateway: Send + Sync {
    fn notify(&self, notification: &OrderNotification) -> Result<(), NotifyError>;
}

impl<G> NotificationGateway for std::sync::Arc<G>
where
    G: NotificationGateway + ?Sized,
{
    fn notify(&self, notification: &OrderNotification) -> Result<(), NotifyError> {
        (**self).notify(notification)
    }
}

/// Emails the buyer on creation and on every status change.
#[derive(Debug)]
pub struct EmailNotifier<D, M> {
    users: D,
    mailer: M,
    from: String,
}

impl<D, M> EmailNotifier<D, M>
where
    D: UserDirectory,
    M: Mailer,
{
    pub fn new(users: D, mailer: M, from: impl Into<String>) -> Self {
        Self {
            users,
            mailer,
            from: from.into(),
        }
    }
}

impl<D, M> NotificationGateway for EmailNotifier<D, M>
where
    D: UserDirectory,
    M: Mailer,
{
    fn notify(&self, notification: &OrderNotification) -> Result<(), NotifyError> {
        let order = &notification.order;
        let buyer = self
            .users
            .get_user(order.buyer_id)
            .ok_or(NotifyError::UnknownRecipient(order.buyer_id))?;

        let (content, attachments) = match notification.kind {
            NotificationKind::Created => (order_confirmation(order, &buyer.name), vec![]),
            NotificationKind::StatusChanged { to, .. } => {
                let receipt: Option<ReceiptDocument> = if to == OrderStatus::Delivered {
                    // The email still goes out without the attachment.
                    render_receipt(order, Some(&buyer), order.updated_at)
                        .inspect_err(|e| warn!(order_id = %order.order_id, error = %e, "receipt not attached"))
                        .ok()
                } else {
                    None
                };
                let content = status_update(order, &buyer.name, to, receipt.as_ref());
                let attachments = receipt
                    .into_iter()
                    .map(|doc| Attachment {
                        file_name: doc.file_name,
                        content_type: ReceiptDocument::CONTENT_TYPE.to_string(),
                        body: doc.bytes,
                    })
                    .collect();
                (content, attachments)
            }
        };

        self.mailer.send(&Email {
            from: self.from.clone(),
            to: buyer.email,
            subject: content.subject,
            text_body: content.text_body,
            attachments,
        })?;
        Ok(())
    }
}
