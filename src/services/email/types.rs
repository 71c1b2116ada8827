// Email Service Types - Shared types and structures for email module

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during email operations
#[derive(Error, Debug)]
pub enum EmailError {
    #[error("Failed to send email: {0}")]
    SendError(String),

    #[error("Template rendering error: {0}")]
    TemplateError(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Service unavailable")]
    ServiceUnavailable,
}

/// Generic email message structure that can be sent
#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

impl EmailMessage {
    pub fn new(from: String, to: Vec<String>, subject: String, html: String) -> Self {
        Self {
            from,
            to,
            subject,
            html,
            text: None,
        }
    }

    pub fn with_text(mut self, text: String) -> Self {
        self.text = Some(text);
        self
    }
}

/// Trait that all email builders must implement
pub trait EmailBuilder {
    fn build(&self) -> Result<EmailMessage, EmailError>;
}

/// Data for the training-complete template
#[derive(Serialize)]
pub struct TrainingCompleteEmailData {
    pub user_name: Option<String>,
    pub generate_url: String,
    pub app_name: String,
}

/// Resend API payload; `text` is omitted when None
#[derive(Debug, Serialize)]
pub struct ResendEmailPayload {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl From<EmailMessage> for ResendEmailPayload {
    fn from(message: EmailMessage) -> Self {
        Self {
            from: message.from,
            to: message.to,
            subject: message.subject,
            html: message.html,
            text: message.text,
        }
    }
}
