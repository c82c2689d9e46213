use async_trait::async_trait;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    UserWelcome,
    TokenActivation,
    PasswordReset,
}

impl Template {
    pub fn key(&self) -> &'static str {
        match self {
            Template::UserWelcome => "user_welcome",
            Template::TokenActivation => "token_activation",
            Template::PasswordReset => "token_password_reset",
        }
    }
}

/// Outbound notification sink. Only ever called from background tasks.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        template: Template,
        data: serde_json::Value,
    ) -> anyhow::Result<()>;
}

/// Records dispatches in the log instead of delivering them.
pub struct LogMailer {
    sender: String,
}

impl LogMailer {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(
        &self,
        recipient: &str,
        template: Template,
        data: serde_json::Value,
    ) -> anyhow::Result<()> {
        info!(from = %self.sender, to = %recipient, template = template.key(), "mail dispatched");
        debug!(fields = data.as_object().map(|o| o.len()).unwrap_or(0), "mail payload");
        Ok(())
    }
}
