use serde_json::{json, Map, Value};

use super::{Aip, CredFormat, SIG_TYPE_BLS};
use crate::errors::{AppError, AppResult};

pub const UNIVERSITY_SCHEMA: &str = "university_registration_schema";
pub const DEFAULT_GENERIC_SCHEMA: &str = "university registration schema";

const UNIVERSITY_ATTRS: [&str; 5] = [
    "student_id",
    "student_name",
    "university_name",
    "graduation_year",
    "cgpa",
];

const DIF_CHALLENGE: &str = "3fa85f64-5717-4562-b3fc-2c963f66afa7";
const DIF_DOMAIN: &str = "4jt78h47fh47";
const DIF_DEFINITION_ID: &str = "32f54163-7166-48f1-93d8-ff217bdb0654";

#[derive(Debug, Clone)]
pub struct ProofSpec<'a> {
    pub aip: Aip,
    pub format: CredFormat,
    pub revocation: bool,
    pub self_attested: bool,
    pub trace: bool,
    /// `None` builds a connectionless (out-of-band) request.
    pub connection_id: Option<&'a str>,
    /// Unix seconds used for `non_revoked` intervals.
    pub now: i64,
}

pub fn send_request_endpoint(aip: Aip) -> &'static str {
    match aip {
        Aip::V10 => "/present-proof/send-request",
        Aip::V20 => "/present-proof-2.0/send-request",
    }
}

pub fn create_request_endpoint(aip: Aip) -> &'static str {
    match aip {
        Aip::V10 => "/present-proof/create-request",
        Aip::V20 => "/present-proof-2.0/create-request",
    }
}

/// Request for the university registration credential.
pub fn university_proof_request(spec: &ProofSpec<'_>) -> AppResult<Value> {
    if spec.aip == Aip::V20 && spec.format == CredFormat::JsonLd {
        return Ok(with_connection(dif_request(), spec.connection_id));
    }
    if spec.format == CredFormat::JsonLd {
        return Err(AppError::InvalidUserInput(
            "JSON-LD presentations require AIP 20".into(),
        ));
    }

    let mut attrs: Vec<Value> = UNIVERSITY_ATTRS
        .iter()
        .map(|name| {
            let mut attr = json!({
                "name": name,
                "restrictions": [{ "schema_name": UNIVERSITY_SCHEMA }],
            });
            if spec.revocation {
                attr["non_revoked"] = json!({ "to": spec.now - 1 });
            }
            attr
        })
        .collect();
    if spec.self_attested {
        attrs.push(json!({ "name": "self_attested_thing" }));
    }

    let mut indy = indy_request("Proof of University Registration", attrs);
    if spec.revocation {
        indy["non_revoked"] = json!({ "to": spec.now });
    }
    Ok(wrap_indy(spec, indy))
}

/// Request arbitrary attributes restricted to `schema_name`.
///
/// Only AIP 20 indy has a generic form; other combinations fall back to the
/// university request without revocation.
pub fn generic_proof_request(
    spec: &ProofSpec<'_>,
    schema_name: &str,
    attributes: &[String],
) -> AppResult<Value> {
    if spec.aip != Aip::V20 || spec.format != CredFormat::Indy {
        let fallback = ProofSpec {
            revocation: false,
            ..spec.clone()
        };
        return university_proof_request(&fallback);
    }

    let schema_name = if schema_name.trim().is_empty() {
        DEFAULT_GENERIC_SCHEMA
    } else {
        schema_name.trim()
    };
    let names: Vec<&str> = if attributes.is_empty() {
        vec!["student_name", "student_id"]
    } else {
        attributes.iter().map(String::as_str).collect()
    };

    let attrs = names
        .into_iter()
        .map(|name| {
            json!({
                "name": name,
                "restrictions": [{ "schema_name": schema_name }],
            })
        })
        .collect();
    let indy = indy_request(&format!("Generic Credential Verification ({})", schema_name), attrs);
    Ok(wrap_indy(spec, indy))
}

fn indy_request(name: &str, attrs: Vec<Value>) -> Value {
    let requested: Map<String, Value> = attrs
        .into_iter()
        .map(|attr| {
            let referent = format!("0_{}_uuid", attr["name"].as_str().unwrap_or_default());
            (referent, attr)
        })
        .collect();
    json!({
        "name": name,
        "version": "1.0",
        "requested_attributes": requested,
        "requested_predicates": {},
    })
}

fn wrap_indy(spec: &ProofSpec<'_>, indy: Value) -> Value {
    let body = match spec.aip {
        Aip::V10 => json!({ "proof_request": indy, "trace": spec.trace }),
        Aip::V20 => json!({
            "presentation_request": { "indy": indy },
            "trace": spec.trace,
        }),
    };
    with_connection(body, spec.connection_id)
}

fn with_connection(mut body: Value, connection_id: Option<&str>) -> Value {
    if let Some(conn) = connection_id {
        body["connection_id"] = json!(conn);
    }
    body
}

fn dif_request() -> Value {
    let field = |name: &str, purpose: &str| {
        json!({
            "path": [format!("$.credentialSubject.{}", name)],
            "purpose": purpose,
        })
    };
    json!({
        "comment": "Verification request for university registration json-ld",
        "presentation_request": {
            "dif": {
                "options": {
                    "challenge": DIF_CHALLENGE,
                    "domain": DIF_DOMAIN,
                },
                "presentation_definition": {
                    "id": DIF_DEFINITION_ID,
                    "format": { "ldp_vp": { "proof_type": [SIG_TYPE_BLS] } },
                    "input_descriptors": [{
                        "id": "university_input_1",
                        "name": "University Student Credential",
                        "schema": [
                            { "uri": "https://www.w3.org/2018/credentials#VerifiableCredential" },
                            { "uri": "https://w3id.org/citizenship#UniversityStudent" },
                        ],
                        "constraints": {
                            "limit_disclosure": "required",
                            "fields": [
                                field("givenName", "We need your first name"),
                                field("familyName", "We need your last name"),
                                field("universityName", "We need your university name"),
                                field("graduationYear", "We need your graduation year"),
                                field("cgpa", "We need your CGPA"),
                            ],
                        },
                    }],
                },
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(aip: Aip, format: CredFormat) -> ProofSpec<'static> {
        ProofSpec {
            aip,
            format,
            revocation: false,
            self_attested: false,
            trace: false,
            connection_id: Some("conn-1"),
            now: 1_700_000_000,
        }
    }

    #[test]
    fn test_v20_indy_request_attributes_and_restrictions() {
        let body = university_proof_request(&spec(Aip::V20, CredFormat::Indy)).unwrap();
        let indy = &body["presentation_request"]["indy"];
        let attrs = indy["requested_attributes"].as_object().unwrap();
        assert_eq!(attrs.len(), 5);
        assert_eq!(
            attrs["0_cgpa_uuid"]["restrictions"][0]["schema_name"],
            UNIVERSITY_SCHEMA
        );
        assert!(indy["requested_predicates"].as_object().unwrap().is_empty());
        assert!(indy.get("non_revoked").is_none());
        assert_eq!(body["connection_id"], "conn-1");
    }

    #[test]
    fn test_revocation_and_self_attested() {
        let mut s = spec(Aip::V10, CredFormat::Indy);
        s.revocation = true;
        s.self_attested = true;
        let body = university_proof_request(&s).unwrap();
        let req = &body["proof_request"];
        assert_eq!(req["non_revoked"]["to"], 1_700_000_000);
        let attrs = &req["requested_attributes"];
        assert_eq!(attrs["0_student_id_uuid"]["non_revoked"]["to"], 1_699_999_999);
        assert_eq!(attrs["0_self_attested_thing_uuid"]["name"], "self_attested_thing");
        assert!(attrs["0_self_attested_thing_uuid"].get("restrictions").is_none());
    }

    #[test]
    fn test_connectionless_omits_connection() {
        let mut s = spec(Aip::V20, CredFormat::Indy);
        s.connection_id = None;
        let body = university_proof_request(&s).unwrap();
        assert!(body.get("connection_id").is_none());
    }

    #[test]
    fn test_json_ld_uses_dif() {
        let body = university_proof_request(&spec(Aip::V20, CredFormat::JsonLd)).unwrap();
        let dif = &body["presentation_request"]["dif"];
        assert_eq!(dif["options"]["challenge"], DIF_CHALLENGE);
        let fields = dif["presentation_definition"]["input_descriptors"][0]["constraints"]["fields"]
            .as_array()
            .unwrap();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[0]["path"][0], "$.credentialSubject.givenName");

        assert!(university_proof_request(&spec(Aip::V10, CredFormat::JsonLd)).is_err());
    }

    #[test]
    fn test_generic_request_defaults_and_fallback() {
        let body = generic_proof_request(&spec(Aip::V20, CredFormat::Indy), "", &[]).unwrap();
        let indy = &body["presentation_request"]["indy"];
        assert_eq!(
            indy["name"],
            "Generic Credential Verification (university registration schema)"
        );
        assert_eq!(indy["requested_attributes"].as_object().unwrap().len(), 2);

        let attrs = vec!["degree".to_string()];
        let body = generic_proof_request(&spec(Aip::V20, CredFormat::Indy), "degree_schema", &attrs)
            .unwrap();
        assert_eq!(
            body["presentation_request"]["indy"]["requested_attributes"]["0_degree_uuid"]
                ["restrictions"][0]["schema_name"],
            "degree_schema"
        );

        let mut s = spec(Aip::V10, CredFormat::Indy);
        s.revocation = true;
        let body = generic_proof_request(&s, "x", &attrs).unwrap();
        assert!(body["proof_request"].get("non_revoked").is_none());
        assert!(body["proof_request"]["requested_attributes"]
            .get("0_student_id_uuid")
            .is_some());
    }
}
