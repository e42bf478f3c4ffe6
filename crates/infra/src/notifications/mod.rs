//! Order notifications: gateway, email rendering, receipts and the bus relay.

pub mod email;
pub mod gateway;
pub mod mailer;
pub mod receipt;
pub mod relay;

pub use gateway::{
    EmailNotifier, NotificationGateway, NotificationKind, NotifyError, OrderNotification,
};
pub use mailer::{
    Attachment, DEFAULT_SMTP_PORT, Email, LogMailer, MailError, Mailer, SmtpMailer, SmtpSettings,
};
pub use receipt::{ReceiptDocument, ReceiptError, receipt_file_name, render_receipt};
pub use relay::{NotificationRelay, RelayError};
