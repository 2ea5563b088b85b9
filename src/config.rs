use std::time::Duration;

use serde::Deserialize;

use crate::payload::{Aip, CredFormat};

pub const DEFAULT_ADMIN_URL: &str = "http://localhost:8021";
pub const DEFAULT_WEBHOOK_PORT: u16 = 8022;
pub const ANONCREDS_WALLET: &str = "askar-anoncreds";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the agent's admin API.
    pub admin_url: String,
    /// Sent as `X-API-Key` when the agent runs with an admin key.
    pub admin_api_key: Option<String>,
    pub webhook_port: u16,
    /// When set, webhook posts must carry the same value in `x-api-key`.
    pub webhook_secret: Option<String>,
    /// Extra URL the agent posts webhooks to. Logged only; the agent is
    /// configured with it out of band.
    pub webhook_target: Option<String>,
    pub aip: Aip,
    pub cred_format: CredFormat,
    pub wallet_type: String,
    pub revocation: bool,
    pub self_attested: bool,
    pub cred_def_id: String,
    pub issuer_did: String,
    /// Id this console puts in `registrar_id` / `admin_id`.
    pub party_id: String,
    pub request_timeout_secs: u64,
    /// Upper bound for waiting on a connection to become active.
    pub connect_timeout_secs: u64,
    /// Delete a holder's connection once its credential is issued.
    pub auto_terminate: bool,
    /// Exchange tracing flag sent with offers and proof requests.
    pub trace: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            admin_url: DEFAULT_ADMIN_URL.into(),
            admin_api_key: None,
            webhook_port: DEFAULT_WEBHOOK_PORT,
            webhook_secret: None,
            webhook_target: None,
            aip: Aip::V20,
            cred_format: CredFormat::Indy,
            wallet_type: "askar".into(),
            revocation: false,
            self_attested: false,
            cred_def_id: String::new(),
            issuer_did: String::new(),
            party_id: "unicred".into(),
            request_timeout_secs: 30,
            connect_timeout_secs: 30,
            auto_terminate: true,
            trace: false,
        }
    }
}

impl Config {
    pub fn is_anoncreds(&self) -> bool {
        self.wallet_type == ANONCREDS_WALLET
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    /// Reject combinations the agent cannot serve. Run again after CLI
    /// overrides are applied.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.aip == Aip::V10 && self.cred_format == CredFormat::JsonLd {
            anyhow::bail!("credential format json-ld requires AIP 20");
        }
        Ok(())
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"))
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let defaults = Config::default();

    let aip = match env_nonempty("UNICRED_AIP") {
        Some(v) => v.parse().map_err(anyhow::Error::msg)?,
        None => defaults.aip,
    };
    let cred_format = match env_nonempty("UNICRED_CRED_FORMAT") {
        Some(v) => v.parse().map_err(anyhow::Error::msg)?,
        None => defaults.cred_format,
    };

    let cfg = Config {
        admin_url: env_nonempty("UNICRED_ADMIN_URL").unwrap_or(defaults.admin_url),
        admin_api_key: env_nonempty("UNICRED_ADMIN_API_KEY"),
        webhook_port: std::env::var("UNICRED_WEBHOOK_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.webhook_port),
        webhook_secret: env_nonempty("UNICRED_WEBHOOK_SECRET"),
        webhook_target: env_nonempty("WEBHOOK_TARGET"),
        aip,
        cred_format,
        wallet_type: env_nonempty("UNICRED_WALLET_TYPE").unwrap_or(defaults.wallet_type),
        revocation: env_flag("UNICRED_REVOCATION").unwrap_or(defaults.revocation),
        self_attested: env_flag("UNICRED_SELF_ATTESTED")
            .or_else(|| env_flag("SELF_ATTESTED"))
            .unwrap_or(defaults.self_attested),
        cred_def_id: env_nonempty("UNICRED_CRED_DEF_ID").unwrap_or_default(),
        issuer_did: env_nonempty("UNICRED_ISSUER_DID").unwrap_or_default(),
        party_id: env_nonempty("UNICRED_PARTY_ID").unwrap_or(defaults.party_id),
        request_timeout_secs: std::env::var("UNICRED_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.request_timeout_secs),
        connect_timeout_secs: std::env::var("UNICRED_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.connect_timeout_secs),
        auto_terminate: env_flag("UNICRED_AUTO_TERMINATE").unwrap_or(defaults.auto_terminate),
        trace: false,
    };

    cfg.validate()?;
    Ok(cfg)
}
