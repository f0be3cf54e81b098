//! Email delivery job handler.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing;
use validator::Validate;

use jobhub_entity::job::Job;

use crate::executor::{JobExecutionError, JobHandler};

/// Payload schema for `send_email` jobs.
#[derive(Debug, Deserialize, Validate)]
struct SendEmailPayload {
    /// Recipient address.
    #[validate(email)]
    email: String,
    /// Message subject.
    subject: Option<String>,
    /// Message body.
    body: Option<String>,
}

/// Handles `send_email` jobs.
///
/// Delivery here is a demo stand-in: the message is logged rather than
/// handed to a mail relay. Safe to re-execute.
#[derive(Debug, Default)]
pub struct SendEmailHandler;

impl SendEmailHandler {
    /// Create a new email handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for SendEmailHandler {
    fn job_type(&self) -> &str {
        "send_email"
    }

    async fn execute(&self, job: &Job) -> Result<Option<Value>, JobExecutionError> {
        let payload: SendEmailPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobExecutionError::Permanent(format!("Invalid payload: {}", e)))?;
        payload
            .validate()
            .map_err(|e| JobExecutionError::Permanent(format!("Invalid payload: {}", e)))?;

        tracing::info!(
            job_id = %job.id,
            email = %payload.email,
            subject = payload.subject.as_deref().unwrap_or(""),
            body_bytes = payload.body.as_deref().map_or(0, str::len),
            "Sending email"
        );

        Ok(Some(serde_json::json!({
            "delivered_to": payload.email,
        })))
    }
}
