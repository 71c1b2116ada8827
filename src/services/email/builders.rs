// Email Builders
// Each builder knows how to construct its specific email type

use super::types::{EmailBuilder, EmailError, EmailMessage, TrainingCompleteEmailData};
use crate::app_config::EmailConfig;
use handlebars::Handlebars;
use tracing::instrument;

pub const TRAINING_COMPLETE_SUBJECT: &str = "Your AI Model Training is Complete! 🎉";

/// Builder for the "model ready" notification
pub struct TrainingCompleteEmailBuilder<'a> {
    to_email: &'a str,
    user_name: Option<&'a str>,
    model_id: i32,
    config: &'a EmailConfig,
    templates: &'a Handlebars<'a>,
}

impl<'a> TrainingCompleteEmailBuilder<'a> {
    pub fn new(
        to_email: &'a str,
        user_name: Option<&'a str>,
        model_id: i32,
        config: &'a EmailConfig,
        templates: &'a Handlebars<'a>,
    ) -> Self {
        Self {
            to_email,
            user_name,
            model_id,
            config,
            templates,
        }
    }

    pub fn generate_url(&self) -> String {
        format!(
            "{}/generate/{}",
            self.config.frontend_url.trim_end_matches('/'),
            self.model_id
        )
    }
}

impl<'a> EmailBuilder for TrainingCompleteEmailBuilder<'a> {
    #[instrument(skip(self), fields(model_id = self.model_id))]
    fn build(&self) -> Result<EmailMessage, EmailError> {
        let data = TrainingCompleteEmailData {
            user_name: self.user_name.map(str::to_string),
            generate_url: self.generate_url(),
            app_name: self.config.from_name.clone(),
        };

        let html = self
            .templates
            .render("training_complete", &data)
            .map_err(|e| EmailError::TemplateError(e.to_string()))?;

        let text = format!(
            "Your AI Model is Ready!\n\n\
            Your AI model has finished training and is now ready to generate headshots.\n\n\
            Start generating: {}\n\n\
            Thank you for using {}!",
            data.generate_url, self.config.from_name
        );

        Ok(EmailMessage::new(
            format!("{} <{}>", self.config.from_name, self.config.from_email),
            vec![self.to_email.to_string()],
            TRAINING_COMPLETE_SUBJECT.to_string(),
            html,
        )
        .with_text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EmailConfig {
        EmailConfig {
            resend_api_key: String::new(),
            resend_api_url: "https://api.resend.com/emails".to_string(),
            from_email: "no-reply@example.com".to_string(),
            from_name: "Headshot AI".to_string(),
            frontend_url: "https://headshots.example.com/".to_string(),
        }
    }

    fn templates() -> Handlebars<'static> {
        let mut templates = Handlebars::new();
        templates
            .register_template_string(
                "training_complete",
                include_str!("../../templates/email/training_complete.html"),
            )
            .unwrap();
        templates
    }

    #[test]
    fn test_training_complete_email() {
        let config = config();
        let templates = templates();
        let builder =
            TrainingCompleteEmailBuilder::new("ana@example.com", Some("Ana"), 17, &config, &templates);

        let message = builder.build().unwrap();

        assert_eq!(message.subject, TRAINING_COMPLETE_SUBJECT);
        assert_eq!(message.to, vec!["ana@example.com"]);
        assert_eq!(message.from, "Headshot AI <no-reply@example.com>");
        assert!(message.html.contains("https://headshots.example.com/generate/17"));
        assert!(message.html.contains("Hi Ana,"));
        assert!(message
            .text
            .unwrap()
            .contains("https://headshots.example.com/generate/17"));
    }

    #[test]
    fn test_greeting_omitted_without_name() {
        let config = config();
        let templates = templates();
        let message = TrainingCompleteEmailBuilder::new("a@example.com", None, 1, &config, &templates)
            .build()
            .unwrap();

        assert!(!message.html.contains("Hi "));
    }
}
