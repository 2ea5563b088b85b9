//! Approval envelope carried inside generic `send-message` text content.
//!
//! Registrar and admin exchange two JSON messages over an established
//! connection: an approval request and the matching response. Both are
//! encoded with one canonical spelling; decoding also accepts the legacy
//! spelling (`approval_request` / `approval_response` with `cred_ex_id`)
//! used by older counterpart consoles.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::models::approval::SubjectData;

const KNOWN_TYPES: &[&str] = &[
    "credential_approval_request",
    "credential_approval_response",
    "approval_request",
    "approval_response",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "credential_approval_request", alias = "approval_request")]
    ApprovalRequest(ApprovalRequest),
    #[serde(rename = "credential_approval_response", alias = "approval_response")]
    ApprovalResponse(ApprovalResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    #[serde(alias = "cred_ex_id")]
    pub approval_id: String,
    #[serde(default)]
    pub student_data: SubjectData,
    /// Unix seconds, as a string.
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registrar_id: Option<String>,
    /// Legacy peers send only a name instead of `student_data`.
    #[serde(default, skip_serializing)]
    student_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    #[serde(alias = "cred_ex_id")]
    pub approval_id: String,
    pub approved: bool,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<String>,
}

/// What a basic-message `content` string turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Envelope(Envelope),
    /// Anything that is not one of our envelopes: shown to the operator as-is.
    Text(String),
}

fn unix_now() -> String {
    Utc::now().timestamp().to_string()
}

impl Envelope {
    pub fn request(approval_id: &str, student_data: SubjectData, registrar_id: &str) -> Self {
        Envelope::ApprovalRequest(ApprovalRequest {
            approval_id: approval_id.to_string(),
            student_data,
            timestamp: unix_now(),
            registrar_id: Some(registrar_id.to_string()),
            student_name: None,
        })
    }

    pub fn response(approval_id: &str, approved: bool, comments: &str, admin_id: &str) -> Self {
        Envelope::ApprovalResponse(ApprovalResponse {
            approval_id: approval_id.to_string(),
            approved,
            comments: comments.to_string(),
            timestamp: unix_now(),
            admin_id: Some(admin_id.to_string()),
        })
    }

    pub fn approval_id(&self) -> &str {
        match self {
            Envelope::ApprovalRequest(r) => &r.approval_id,
            Envelope::ApprovalResponse(r) => &r.approval_id,
        }
    }

    /// Serialize to the string placed in a `send-message` `content` field.
    pub fn encode(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a basic-message `content` string.
    ///
    /// Non-JSON text and JSON without a known `type` are plain text. A known
    /// `type` with missing or mistyped fields is `MalformedPayload`.
    pub fn decode(content: &str) -> AppResult<Inbound> {
        let value: serde_json::Value = match serde_json::from_str(content) {
            Ok(v) => v,
            Err(_) => return Ok(Inbound::Text(content.to_string())),
        };

        let is_ours = value
            .get("type")
            .and_then(|t| t.as_str())
            .map(|t| KNOWN_TYPES.contains(&t))
            .unwrap_or(false);
        if !is_ours {
            return Ok(Inbound::Text(content.to_string()));
        }

        let mut envelope: Envelope = serde_json::from_value(value)
            .map_err(|e| AppError::MalformedPayload(format!("approval envelope: {}", e)))?;

        if let Envelope::ApprovalRequest(ref mut req) = envelope {
            if let Some(name) = req.student_name.take() {
                req.student_data.entry("student_name".to_string()).or_insert(name);
            }
        }

        if envelope.approval_id().is_empty() {
            return Err(AppError::MalformedPayload(
                "approval envelope without an approval id".into(),
            ));
        }

        Ok(Inbound::Envelope(envelope))
    }
}
