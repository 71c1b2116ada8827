// Email Service Module
// Coordinates template rendering (builders) and delivery (sender)

pub mod builders;
pub mod sender;
pub mod types;

use self::types::EmailBuilder;
use crate::app_config::EmailConfig;
use builders::TrainingCompleteEmailBuilder;
use handlebars::Handlebars;
use sender::EmailSender;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub use types::{EmailError, EmailMessage};

#[derive(Clone)]
pub struct EmailService {
    sender: EmailSender,
    config: EmailConfig,
    templates: Arc<Handlebars<'static>>,
}

impl EmailService {
    pub fn new(config: EmailConfig) -> Result<Self, EmailError> {
        let mut templates = Handlebars::new();
        Self::register_templates(&mut templates)?;

        let sender =
            EmailSender::new_resend(config.resend_api_key.clone(), config.resend_api_url.clone())
                .with_max_retries(3)
                .with_retry_delay(std::time::Duration::from_secs(1));

        Ok(Self {
            sender,
            config,
            templates: Arc::new(templates),
        })
    }

    fn register_templates(templates: &mut Handlebars) -> Result<(), EmailError> {
        let training_complete = include_str!("../../templates/email/training_complete.html");
        templates
            .register_template_string("training_complete", training_complete)
            .map_err(|e| EmailError::TemplateError(e.to_string()))?;

        Ok(())
    }

    /// Delivery is skipped when no API key is configured
    pub fn is_enabled(&self) -> bool {
        !self.config.resend_api_key.is_empty()
    }

    /// Tell a user their model finished training
    #[instrument(skip(self, user_name))]
    pub async fn send_training_complete(
        &self,
        to_email: &str,
        user_name: Option<&str>,
        model_id: i32,
    ) -> Result<(), EmailError> {
        if !self.is_enabled() {
            warn!("Email delivery disabled, skipping training notification for model {}", model_id);
            return Ok(());
        }

        info!("Sending training complete email for model {}", model_id);

        let message = TrainingCompleteEmailBuilder::new(
            to_email,
            user_name,
            model_id,
            &self.config,
            &self.templates,
        )
        .build()?;

        self.sender.send_with_retry(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config(api_key: &str) -> EmailConfig {
        EmailConfig {
            resend_api_key: api_key.to_string(),
            resend_api_url: "https://api.resend.com/emails".to_string(),
            from_email: "noreply@test.com".to_string(),
            from_name: "Test App".to_string(),
            frontend_url: "https://app.test.com".to_string(),
        }
    }

    #[test]
    fn test_email_service_creation() {
        let service = EmailService::new(create_test_config("test_key")).unwrap();
        assert!(service.is_enabled());
    }

    #[tokio::test]
    async fn test_disabled_service_skips_delivery() {
        let service = EmailService::new(create_test_config("")).unwrap();
        assert!(!service.is_enabled());
        assert!(service
            .send_training_complete("user@test.com", None, 3)
            .await
            .is_ok());
    }
}
