//! Request bodies for the agent's admin API.
//!
//! Pure functions: every input, including the clock, is a parameter, so the
//! same inputs always produce the same body. Field names and nesting follow
//! the agent's admin API.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub mod offer;
pub mod proof;

/// Aries Interop Profile level the agent speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aip {
    /// Issue-credential / present-proof v1 endpoints.
    V10,
    /// `-2.0` endpoints.
    V20,
}

impl FromStr for Aip {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "10" => Ok(Aip::V10),
            "20" => Ok(Aip::V20),
            other => Err(format!("unsupported AIP level '{}', expected 10 or 20", other)),
        }
    }
}

impl fmt::Display for Aip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Aip::V10 => "10",
            Aip::V20 => "20",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredFormat {
    Indy,
    JsonLd,
}

impl FromStr for CredFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "indy" => Ok(CredFormat::Indy),
            "json-ld" | "jsonld" | "json_ld" => Ok(CredFormat::JsonLd),
            other => Err(format!("unsupported credential format '{}'", other)),
        }
    }
}

impl fmt::Display for CredFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredFormat::Indy => "indy",
            CredFormat::JsonLd => "json-ld",
        })
    }
}

/// Signature suite requested for JSON-LD credentials and presentations.
pub const SIG_TYPE_BLS: &str = "BbsBlsSignature2020";

/// Body for `POST /connections/{id}/send-message`.
pub fn send_message_body(content: &str) -> Value {
    json!({ "content": content })
}

/// Body for `POST /revocation/revoke` (or its anoncreds mirror).
pub fn revoke_body(
    rev_reg_id: &str,
    cred_rev_id: &str,
    publish: bool,
    connection_id: Option<&str>,
) -> Value {
    let mut body = json!({
        "rev_reg_id": rev_reg_id,
        "cred_rev_id": cred_rev_id,
        "publish": publish,
        "comment": "Revoked by registrar",
    });
    if let Some(conn) = connection_id {
        body["connection_id"] = json!(conn);
        body["notify"] = json!(true);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aip_and_format_parse() {
        assert_eq!("20".parse::<Aip>().unwrap(), Aip::V20);
        assert!("30".parse::<Aip>().is_err());
        assert_eq!("JSON-LD".parse::<CredFormat>().unwrap(), CredFormat::JsonLd);
        assert!("mdoc".parse::<CredFormat>().is_err());
    }

    #[test]
    fn test_revoke_body_notifies_holder_when_connected() {
        let body = revoke_body("reg-1", "7", true, Some("conn-1"));
        assert_eq!(body["cred_rev_id"], "7");
        assert_eq!(body["publish"], true);
        assert_eq!(body["connection_id"], "conn-1");

        let body = revoke_body("reg-1", "7", false, None);
        assert!(body.get("connection_id").is_none());
    }
}
