//! Operator notification for overdue deletions.
//!
//! The engine renders the configured message template and hands the result
//! to a [`Notifier`]; the actual mail transport belongs to the composing
//! layer. The default implementation writes the notification to the log.

use std::path::PathBuf;

use tracing::error;

use coldpack_types::Result;

use crate::config::EmailConfig;

/// Placeholder in the email template replaced by the overdue target list.
pub const FILE_LIST_PLACEHOLDER: &str = "${file-list}";

/// Delivers an operator notification. One call per overdue batch.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &NotificationMessage) -> Result<()>;
}

/// A rendered notification, ready for any transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

/// Render the overdue-deletion notification from the configured template.
pub fn render_overdue_notification(
    email: &EmailConfig,
    overdue_targets: &[PathBuf],
) -> NotificationMessage {
    let file_list = overdue_targets
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    NotificationMessage {
        to: email.email_address.clone(),
        from: email.email_from_address.clone(),
        subject: email.email_subject.clone(),
        body: email.email_template.replace(FILE_LIST_PLACEHOLDER, &file_list),
    }
}

/// Notifier that escalates through the log only. Used when no transport is
/// wired in; overdue deletions are an operator problem either way.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &NotificationMessage) -> Result<()> {
        error!(
            to = %message.to,
            subject = %message.subject,
            body = %message.body,
            "operator notification"
        );
        Ok(())
    }
}
