//! Webhook events posted by the agent to `/webhooks/topic/{topic}/`.
//!
//! Only the fields the consoles act on are modelled; everything else in the
//! agent's payload is ignored.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::errors::{AppError, AppResult};
use crate::watch::ConnectionState;

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Connection(ConnectionEvent),
    BasicMessage(BasicMessageEvent),
    IssueCredential(CredentialExchangeEvent),
    PresentProof(PresentationEvent),
    /// A topic no role reacts to (revocation, endorse_transaction, ...).
    Other { topic: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionEvent {
    pub connection_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub rfc23_state: Option<String>,
    #[serde(default)]
    pub their_label: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
}

impl ConnectionEvent {
    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_agent(&self.state)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BasicMessageEvent {
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub content: String,
}

/// Stage of an issue-credential exchange, normalized across the v1
/// (`request_received`) and v2 (`request-received`) spellings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeStage {
    OfferSent,
    RequestReceived,
    CredentialIssued,
    Done,
    Abandoned,
    Other(String),
}

impl ExchangeStage {
    pub fn parse(state: &str) -> Self {
        match state.replace('_', "-").as_str() {
            "offer-sent" => ExchangeStage::OfferSent,
            "request-received" => ExchangeStage::RequestReceived,
            "credential-issued" => ExchangeStage::CredentialIssued,
            "done" | "credential-acked" => ExchangeStage::Done,
            "abandoned" => ExchangeStage::Abandoned,
            other => ExchangeStage::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CredentialExchangeEvent {
    #[serde(alias = "credential_exchange_id")]
    pub cred_ex_id: String,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub state: String,
    /// Set from the topic, not the body.
    #[serde(skip)]
    pub v2: bool,
}

impl CredentialExchangeEvent {
    pub fn stage(&self) -> ExchangeStage {
        ExchangeStage::parse(&self.state)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PresentationEvent {
    #[serde(alias = "presentation_exchange_id")]
    pub pres_ex_id: String,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub state: String,
    /// v2 reports `"true"` / `"false"` once the exchange is done.
    #[serde(default)]
    pub verified: Option<String>,
    #[serde(default)]
    pub presentation: Option<Value>,
    #[serde(default)]
    pub by_format: Option<Value>,
}

impl PresentationEvent {
    pub fn is_verified(&self) -> bool {
        match self.state.as_str() {
            "verified" => true,
            "done" => self.verified.as_deref() == Some("true"),
            _ => false,
        }
    }

    /// Revealed attribute name → raw value, from either the v1 `presentation`
    /// or the v2 `by_format.pres.indy` shape.
    pub fn revealed_attrs(&self) -> BTreeMap<String, String> {
        let proof = self
            .presentation
            .as_ref()
            .and_then(|p| p.get("requested_proof"))
            .or_else(|| {
                self.by_format
                    .as_ref()
                    .and_then(|b| b.pointer("/pres/indy/requested_proof"))
            });

        let mut out = BTreeMap::new();
        if let Some(Value::Object(attrs)) = proof.and_then(|p| p.get("revealed_attrs")) {
            for (name, attr) in attrs {
                let raw = attr
                    .get("raw")
                    .and_then(|r| r.as_str())
                    .unwrap_or("N/A")
                    .to_string();
                out.insert(name.clone(), raw);
            }
        }
        out
    }
}

impl AgentEvent {
    /// Interpret a webhook body for `topic`.
    pub fn parse(topic: &str, body: Value) -> AppResult<Self> {
        let malformed = |e: serde_json::Error| {
            AppError::MalformedPayload(format!("{} webhook: {}", topic, e))
        };
        let event = match topic {
            "connections" => {
                AgentEvent::Connection(serde_json::from_value(body).map_err(malformed)?)
            }
            "basicmessages" => {
                AgentEvent::BasicMessage(serde_json::from_value(body).map_err(malformed)?)
            }
            "issue_credential" | "issue_credential_v2_0" => {
                let mut ev: CredentialExchangeEvent =
                    serde_json::from_value(body).map_err(malformed)?;
                ev.v2 = topic == "issue_credential_v2_0";
                AgentEvent::IssueCredential(ev)
            }
            "present_proof" | "present_proof_v2_0" => {
                AgentEvent::PresentProof(serde_json::from_value(body).map_err(malformed)?)
            }
            other => AgentEvent::Other {
                topic: other.to_string(),
            },
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_connection_event() {
        let ev = AgentEvent::parse(
            "connections",
            json!({"connection_id": "c-1", "state": "active", "their_label": "Uni Admin"}),
        )
        .unwrap();
        match ev {
            AgentEvent::Connection(c) => {
                assert_eq!(c.connection_id, "c-1");
                assert_eq!(c.connection_state(), ConnectionState::Active);
                assert_eq!(c.their_label.as_deref(), Some("Uni Admin"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_v1_credential_exchange_id_alias() {
        let ev = AgentEvent::parse(
            "issue_credential",
            json!({"credential_exchange_id": "x-1", "state": "request_received"}),
        )
        .unwrap();
        match ev {
            AgentEvent::IssueCredential(c) => {
                assert_eq!(c.cred_ex_id, "x-1");
                assert!(!c.v2);
                assert_eq!(c.stage(), ExchangeStage::RequestReceived);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_missing_required_field_is_malformed() {
        let err = AgentEvent::parse("connections", json!({"state": "active"})).unwrap_err();
        assert!(matches!(err, AppError::MalformedPayload(_)));
    }

    #[test]
    fn test_unknown_topic_is_other() {
        let ev = AgentEvent::parse("revocation_registry", json!({})).unwrap();
        assert_eq!(
            ev,
            AgentEvent::Other {
                topic: "revocation_registry".into()
            }
        );
    }

    #[test]
    fn test_v2_presentation_verified_and_revealed() {
        let ev: PresentationEvent = serde_json::from_value(json!({
            "pres_ex_id": "p-1",
            "state": "done",
            "verified": "true",
            "by_format": {"pres": {"indy": {"requested_proof": {"revealed_attrs": {
                "0_student_name_uuid": {"raw": "Jane Doe", "encoded": "123"}
            }}}}}
        }))
        .unwrap();
        assert!(ev.is_verified());
        assert_eq!(
            ev.revealed_attrs().get("0_student_name_uuid").map(String::as_str),
            Some("Jane Doe")
        );
    }

    #[test]
    fn test_v1_presentation_state_verified() {
        let ev: PresentationEvent = serde_json::from_value(json!({
            "presentation_exchange_id": "p-2",
            "state": "verified",
            "presentation": {"requested_proof": {"revealed_attrs": {"cgpa": {"raw": "3.9"}}}}
        }))
        .unwrap();
        assert_eq!(ev.pres_ex_id, "p-2");
        assert!(ev.is_verified());
        assert_eq!(ev.revealed_attrs().get("cgpa").unwrap(), "3.9");
    }
}
