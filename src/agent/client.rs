//! HTTP client for the agent's admin API.
//! Reads go through reqwest-middleware with retries; writes are sent once.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde_json::{json, Value};
use url::Url;

use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::payload::offer::offer_endpoint;
use crate::payload::proof::{create_request_endpoint, send_request_endpoint};
use crate::payload::{send_message_body, Aip};
use crate::watch::{ConnectionState, ConnectionWatch};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct AdminClient {
    base: Url,
    /// Single-shot client for POST and DELETE.
    writes: reqwest::Client,
    /// Same connection pool, with transient-error retry for GET.
    reads: ClientWithMiddleware,
    anoncreds: bool,
}

impl AdminClient {
    pub fn new(cfg: &Config) -> AppResult<Self> {
        let mut base = Url::parse(&cfg.admin_url).map_err(|e| {
            AppError::InvalidUserInput(format!("admin url '{}': {}", cfg.admin_url, e))
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        if let Some(key) = cfg.admin_api_key.as_deref() {
            let value = HeaderValue::from_str(key)
                .map_err(|_| AppError::InvalidUserInput("admin api key is not a valid header".into()))?;
            headers.insert("x-api-key", value);
        }

        let writes = reqwest::Client::builder()
            .use_rustls_tls()
            .default_headers(headers)
            .timeout(cfg.request_timeout())
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let reads = ClientBuilder::new(writes.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            base,
            writes,
            reads,
            anoncreds: cfg.is_anoncreds(),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    fn url(&self, path: &str) -> AppResult<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| AppError::InvalidUserInput(format!("bad admin path '{}': {}", path, e)))
    }

    // ── Transport ────────────────────────────────────────────────

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> AppResult<Value> {
        let url = self.url(path)?;
        tracing::debug!(method = "GET", path, "admin request");
        let resp = self.reads.get(url).query(query).send().await?;
        read_json(resp, path).await
    }

    async fn post(&self, path: &str, body: &Value) -> AppResult<Value> {
        let url = self.url(path)?;
        tracing::debug!(method = "POST", path, "admin request");
        let resp = self.writes.post(url).json(body).send().await?;
        read_json(resp, path).await
    }

    async fn delete(&self, path: &str) -> AppResult<()> {
        let url = self.url(path)?;
        tracing::debug!(method = "DELETE", path, "admin request");
        let resp = self.writes.delete(url).send().await?;
        read_json(resp, path).await.map(|_| ())
    }

    fn revocation_path(&self, rest: &str) -> String {
        if self.anoncreds {
            format!("/anoncreds/revocation/{}", rest)
        } else {
            format!("/revocation/{}", rest)
        }
    }

    // ── Connections ──────────────────────────────────────────────

    pub async fn get_connection(&self, connection_id: &str) -> AppResult<Value> {
        self.get(&format!("/connections/{}", connection_id), &[])
            .await
            .map_err(|e| rename_not_found(e, "connection", connection_id))
    }

    pub async fn delete_connection(&self, connection_id: &str) -> AppResult<()> {
        self.delete(&format!("/connections/{}", connection_id))
            .await
            .map_err(|e| rename_not_found(e, "connection", connection_id))
    }

    pub async fn send_message(&self, connection_id: &str, content: &str) -> AppResult<()> {
        self.post(
            &format!("/connections/{}/send-message", connection_id),
            &send_message_body(content),
        )
        .await
        .map(|_| ())
        .map_err(|e| rename_not_found(e, "connection", connection_id))
    }

    /// Accept an out-of-band invitation. Returns the new connection id.
    pub async fn receive_invitation(&self, invitation: &Value) -> AppResult<String> {
        let resp = self.post("/out-of-band/receive-invitation", invitation).await?;
        string_field(&resp, &["connection_id"], "receive-invitation response")
    }

    /// Create an out-of-band invitation using DID Exchange.
    pub async fn create_invitation(&self, alias: &str) -> AppResult<Value> {
        let body = json!({
            "alias": alias,
            "handshake_protocols": ["https://didcomm.org/didexchange/1.0"],
            "use_public_did": false,
        });
        self.post("/out-of-band/create-invitation", &body).await
    }

    /// Resolve once `connection_id` is active, using webhook notifications
    /// and a 1 s poll of the connection record, whichever sees it first.
    pub async fn await_active(
        &self,
        watch: &ConnectionWatch,
        connection_id: &str,
        timeout: Duration,
    ) -> AppResult<()> {
        if watch.state(connection_id) == Some(ConnectionState::Active) {
            return Ok(());
        }
        let poll = async {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            loop {
                ticker.tick().await;
                match self.get_connection(connection_id).await {
                    Ok(conn) => {
                        let state = conn
                            .get("state")
                            .and_then(Value::as_str)
                            .map(ConnectionState::from_agent)
                            .unwrap_or(ConnectionState::Pending);
                        match watch.observe(connection_id, state) {
                            ConnectionState::Active => return Ok(()),
                            ConnectionState::Terminated => {
                                return Err(AppError::Unreachable(format!(
                                    "connection {} was terminated",
                                    connection_id
                                )))
                            }
                            ConnectionState::Pending => {}
                        }
                    }
                    Err(AppError::NotFound { .. }) => {
                        watch.observe(connection_id, ConnectionState::Terminated);
                        return Err(AppError::not_found("connection", connection_id));
                    }
                    Err(e) => {
                        tracing::debug!(connection_id, error = %e, "connection poll failed");
                    }
                }
            }
        };

        tokio::select! {
            res = watch.wait_active(connection_id, timeout) => res,
            res = poll => res,
        }
    }

    // ── Issue credential ─────────────────────────────────────────

    /// Send a credential offer. Returns the credential exchange id.
    pub async fn send_offer(&self, aip: Aip, body: &Value) -> AppResult<String> {
        let resp = self.post(offer_endpoint(aip), body).await?;
        string_field(
            &resp,
            &["cred_ex_id", "credential_exchange_id"],
            "send-offer response",
        )
    }

    pub async fn get_cred_ex_record(&self, cred_ex_id: &str) -> AppResult<Value> {
        self.get(&format!("/issue-credential-2.0/records/{}", cred_ex_id), &[])
            .await
            .map_err(|e| rename_not_found(e, "credential exchange", cred_ex_id))
    }

    pub async fn issue(&self, cred_ex_id: &str, v2: bool, body: &Value) -> AppResult<()> {
        let path = if v2 {
            format!("/issue-credential-2.0/records/{}/issue", cred_ex_id)
        } else {
            format!("/issue-credential/records/{}/issue", cred_ex_id)
        };
        self.post(&path, body)
            .await
            .map(|_| ())
            .map_err(|e| rename_not_found(e, "credential exchange", cred_ex_id))
    }

    // ── Present proof ────────────────────────────────────────────

    pub async fn send_proof_request(&self, aip: Aip, body: &Value) -> AppResult<Value> {
        self.post(send_request_endpoint(aip), body).await
    }

    /// Create a connectionless request; the caller wraps it in an invitation.
    pub async fn create_proof_request(&self, aip: Aip, body: &Value) -> AppResult<Value> {
        self.post(create_request_endpoint(aip), body).await
    }

    // ── Revocation ───────────────────────────────────────────────

    pub async fn revoke(&self, body: &Value) -> AppResult<()> {
        self.post(&self.revocation_path("revoke"), body).await.map(|_| ())
    }

    pub async fn publish_revocations(&self) -> AppResult<Value> {
        self.post(&self.revocation_path("publish-revocations"), &json!({}))
            .await
    }

    pub async fn rotate_registry(&self, cred_def_id: &str) -> AppResult<Value> {
        let path = self.revocation_path(&format!("active-registry/{}/rotate", cred_def_id));
        self.post(&path, &json!({})).await
    }

    pub async fn list_registries(&self, state: &str) -> AppResult<Value> {
        let path = if self.anoncreds {
            self.revocation_path("registries")
        } else {
            self.revocation_path("registries/created")
        };
        self.get(&path, &[("state", state)]).await
    }

    pub fn registry_states(&self) -> (&'static [&'static str], &'static str) {
        if self.anoncreds {
            (
                &["finished", "failed", "action", "wait", "decommissioned", "full"],
                "finished",
            )
        } else {
            (
                &["init", "generated", "posted", "active", "full", "decommissioned"],
                "active",
            )
        }
    }
}

async fn read_json(resp: Response, path: &str) -> AppResult<Value> {
    let status = resp.status();
    let text = resp.text().await?;

    if status == StatusCode::NOT_FOUND {
        return Err(AppError::not_found("admin resource", path));
    }
    if status.is_client_error() {
        return Err(AppError::InvalidUserInput(format!(
            "agent rejected {} ({}): {}",
            path, status, text
        )));
    }
    if !status.is_success() {
        tracing::warn!("Admin API {} returned {}: {}", path, status, text);
        return Err(AppError::Unreachable(format!("{} returned {}", path, status)));
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text)
        .map_err(|e| AppError::MalformedPayload(format!("{} response: {}", path, e)))
}

fn rename_not_found(err: AppError, kind: &'static str, id: &str) -> AppError {
    match err {
        AppError::NotFound { .. } => AppError::not_found(kind, id),
        other => other,
    }
}

pub(crate) fn string_field(value: &Value, keys: &[&str], what: &str) -> AppResult<String> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| AppError::MalformedPayload(format!("{} has no {}", what, keys[0])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let cfg = Config {
            admin_url: "http://agent:8021/admin".into(),
            ..Config::default()
        };
        let client = AdminClient::new(&cfg).unwrap();
        assert_eq!(client.base_url(), "http://agent:8021/admin/");
        assert_eq!(
            client.url("/connections/abc").unwrap().as_str(),
            "http://agent:8021/admin/connections/abc"
        );
    }

    #[test]
    fn test_invalid_admin_url_rejected() {
        let cfg = Config {
            admin_url: "not a url".into(),
            ..Config::default()
        };
        assert!(matches!(
            AdminClient::new(&cfg),
            Err(AppError::InvalidUserInput(_))
        ));
    }

    #[test]
    fn test_revocation_paths_follow_wallet_type() {
        let plain = AdminClient::new(&Config::default()).unwrap();
        assert_eq!(plain.revocation_path("revoke"), "/revocation/revoke");

        let anon = AdminClient::new(&Config {
            wallet_type: crate::config::ANONCREDS_WALLET.into(),
            ..Config::default()
        })
        .unwrap();
        assert_eq!(anon.revocation_path("revoke"), "/anoncreds/revocation/revoke");
        assert_eq!(anon.registry_states().1, "finished");
    }

    #[test]
    fn test_string_field_accepts_alias() {
        let v = json!({"credential_exchange_id": "x-1"});
        assert_eq!(
            string_field(&v, &["cred_ex_id", "credential_exchange_id"], "r").unwrap(),
            "x-1"
        );
        assert!(string_field(&json!({}), &["cred_ex_id"], "r").is_err());
    }
}
