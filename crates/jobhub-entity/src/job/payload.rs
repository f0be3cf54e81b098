//! Typed job payload definitions.
//!
//! Payloads for known job types form a tagged union keyed by the job
//! type string, so producers can submit schema-checked data instead of
//! loose JSON. Handlers deserialize and validate their own variant.

use serde::{Deserialize, Serialize};

use jobhub_core::result::AppResult;

/// Typed payloads for known job types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "job_type", rename_all = "snake_case")]
pub enum JobPayload {
    /// Deliver an email to a recipient.
    SendEmail {
        /// Recipient address.
        email: String,
        /// Message subject.
        subject: Option<String>,
        /// Message body.
        body: Option<String>,
    },
    /// Purge terminal jobs past the retention window.
    RetentionSweep,
}

impl JobPayload {
    /// The job type string this payload is routed by.
    pub fn job_type(&self) -> &'static str {
        match self {
            Self::SendEmail { .. } => "send_email",
            Self::RetentionSweep => "retention_sweep",
        }
    }

    /// Serialize into the opaque payload stored on the job record.
    ///
    /// The `job_type` tag is stripped: the type travels on the job
    /// record itself, not inside the payload.
    pub fn into_value(self) -> AppResult<serde_json::Value> {
        let mut value = serde_json::to_value(self)?;
        if let Some(map) = value.as_object_mut() {
            map.remove("job_type");
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_its_type_string() {
        let payload = JobPayload::SendEmail {
            email: "user@example.com".to_string(),
            subject: None,
            body: None,
        };
        assert_eq!(payload.job_type(), "send_email");
        assert_eq!(JobPayload::RetentionSweep.job_type(), "retention_sweep");
    }

    #[test]
    fn tag_is_stripped_from_stored_value() {
        let value = JobPayload::SendEmail {
            email: "user@example.com".to_string(),
            subject: Some("hello".to_string()),
            body: None,
        }
        .into_value()
        .unwrap();
        assert!(value.get("job_type").is_none());
        assert_eq!(value["email"], "user@example.com");
        assert_eq!(value["subject"], "hello");
    }
}
