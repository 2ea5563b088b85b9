use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use super::{Aip, CredFormat, SIG_TYPE_BLS};
use crate::errors::{AppError, AppResult};
use crate::models::approval::SubjectData;

pub const CRED_PREVIEW_TYPE: &str = "https://didcomm.org/issue-credential/2.0/credential-preview";

/// Everything needed to offer one credential to one holder.
#[derive(Debug, Clone)]
pub struct OfferSpec<'a> {
    pub aip: Aip,
    pub format: CredFormat,
    pub cred_def_id: &'a str,
    pub issuer_did: &'a str,
    pub connection_id: &'a str,
    pub attributes: &'a SubjectData,
    pub trace: bool,
    pub issued_at: DateTime<Utc>,
}

pub fn offer_endpoint(aip: Aip) -> &'static str {
    match aip {
        Aip::V10 => "/issue-credential/send-offer",
        Aip::V20 => "/issue-credential-2.0/send-offer",
    }
}

pub fn credential_preview(attributes: &SubjectData) -> Value {
    let attrs: Vec<Value> = attributes
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    json!({
        "@type": CRED_PREVIEW_TYPE,
        "attributes": attrs,
    })
}

/// Body for the send-offer endpoint of `spec.aip`.
pub fn credential_offer(spec: &OfferSpec<'_>) -> AppResult<Value> {
    if spec.connection_id.is_empty() {
        return Err(AppError::InvalidUserInput(
            "no holder connection to offer the credential to".into(),
        ));
    }

    match (spec.aip, spec.format) {
        (Aip::V10, CredFormat::Indy) => {
            require_cred_def(spec)?;
            Ok(json!({
                "connection_id": spec.connection_id,
                "cred_def_id": spec.cred_def_id,
                "comment": comment(spec),
                "auto_remove": false,
                "credential_preview": credential_preview(spec.attributes),
                "trace": spec.trace,
            }))
        }
        (Aip::V20, CredFormat::Indy) => {
            require_cred_def(spec)?;
            Ok(json!({
                "connection_id": spec.connection_id,
                "comment": comment(spec),
                "auto_remove": false,
                "credential_preview": credential_preview(spec.attributes),
                "filter": { "indy": { "cred_def_id": spec.cred_def_id } },
                "trace": spec.trace,
            }))
        }
        (Aip::V20, CredFormat::JsonLd) => Ok(json!({
            "connection_id": spec.connection_id,
            "filter": { "ld_proof": ld_proof(spec) },
            "trace": spec.trace,
        })),
        (Aip::V10, CredFormat::JsonLd) => Err(AppError::InvalidUserInput(
            "JSON-LD credentials require AIP 20".into(),
        )),
    }
}

fn require_cred_def(spec: &OfferSpec<'_>) -> AppResult<()> {
    if spec.cred_def_id.is_empty() {
        return Err(AppError::InvalidUserInput(
            "no credential definition id configured (UNICRED_CRED_DEF_ID)".into(),
        ));
    }
    Ok(())
}

fn comment(spec: &OfferSpec<'_>) -> String {
    format!(
        "University Registration offer on cred def id {}",
        spec.cred_def_id
    )
}

fn ld_proof(spec: &OfferSpec<'_>) -> Value {
    let attr = |name: &str, default: &str| {
        spec.attributes
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    };
    let full_name = attr("student_name", "");
    let mut parts = full_name.split_whitespace();
    let given = parts.next().unwrap_or("").to_uppercase();
    let family = parts.last().map(str::to_uppercase).unwrap_or_else(|| given.clone());

    json!({
        "credential": {
            "@context": [
                "https://www.w3.org/2018/credentials/v1",
                "https://w3id.org/citizenship/v1",
                "https://w3id.org/security/bbs/v1",
            ],
            "type": ["VerifiableCredential", "UniversityStudent"],
            "id": format!(
                "https://credential.example.com/students/{}",
                attr("student_id", "unknown")
            ),
            "issuer": spec.issuer_did,
            "issuanceDate": spec.issued_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            "credentialSubject": {
                "type": ["UniversityStudent"],
                "givenName": given,
                "familyName": family,
                "universityName": attr("university_name", ""),
                "graduationYear": attr("graduation_year", ""),
                "cgpa": attr("cgpa", ""),
            },
        },
        "options": { "proofType": SIG_TYPE_BLS },
    })
}

/// Body for `POST /issue-credential-2.0/records/{id}/issue`, carrying the
/// preview of the original offer when the exchange record has one.
pub fn issue_body(cred_ex_id: &str, preview: Option<Value>) -> Value {
    let mut body = json!({
        "comment": format!("Issuing credential, exchange {}", cred_ex_id),
    });
    if let Some(preview) = preview {
        body["credential_preview"] = preview;
    }
    body
}
