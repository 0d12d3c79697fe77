//! Outbound email through serverless functions
//!
//! Delivery is best effort. A successful call means the function accepted
//! the request, not that any mail arrived.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use skillfeed_functions::FunctionsClient;

use crate::error::{Error, Result};
use crate::validation::is_valid_email;

pub const BROADCAST_FUNCTION: &str = "send-broadcast";
pub const CHAT_REMINDER_FUNCTION: &str = "chat-reminder";

#[derive(Debug, Serialize)]
struct BroadcastBody<'a> {
    recipients: &'a [String],
    subject: &'a str,
    html: &'a str,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send one message to every recipient; returns the function's reply
    async fn send_broadcast(&self, recipients: &[String], subject: &str, html: &str) -> Result<Value>;
}

#[derive(Clone)]
pub struct EmailService {
    functions: FunctionsClient,
}

impl EmailService {
    pub fn new(functions: FunctionsClient) -> Self {
        Self { functions }
    }

    /// Ask the backend to nudge users with unanswered chat messages
    pub async fn trigger_chat_reminders(&self) -> Result<Value> {
        match self
            .functions
            .invoke::<Value, ()>(CHAT_REMINDER_FUNCTION, None, None)
            .await
        {
            Ok(reply) => Ok(reply),
            Err(e) => {
                error!(error = %e, "chat reminder function failed");
                Err(e.into())
            }
        }
    }
}

fn check_broadcast(recipients: &[String], subject: &str) -> Result<()> {
    if recipients.is_empty() {
        return Err(Error::validation("No recipients selected"));
    }
    if let Some(bad) = recipients.iter().find(|r| !is_valid_email(r)) {
        return Err(Error::validation(format!("Invalid recipient address: {}", bad)));
    }
    if subject.trim().is_empty() {
        return Err(Error::validation("Subject is required"));
    }
    Ok(())
}

#[async_trait]
impl Mailer for EmailService {
    async fn send_broadcast(&self, recipients: &[String], subject: &str, html: &str) -> Result<Value> {
        check_broadcast(recipients, subject)?;
        let body = BroadcastBody {
            recipients,
            subject,
            html,
        };
        match self
            .functions
            .invoke::<Value, _>(BROADCAST_FUNCTION, Some(body), None)
            .await
        {
            Ok(reply) => {
                info!(recipients = recipients.len(), "broadcast email handed off");
                Ok(reply)
            }
            Err(e) => {
                error!(error = %e, "broadcast email failed");
                Err(e.into())
            }
        }
    }
}
