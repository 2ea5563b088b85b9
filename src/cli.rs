use clap::{Args, Parser, Subcommand};

use crate::config::Config;
use crate::payload::{Aip, CredFormat};

/// unicred: registrar, admin and verifier consoles for an identity agent
#[derive(Parser)]
#[command(name = "unicred", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub agent: AgentArgs,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Request approvals from the admin and issue approved credentials
    Registrar,

    /// Approve or reject the registrar's requests
    Admin,

    /// Request and verify proofs from holders
    Verifier,
}

/// Overrides for values otherwise read by `config::load`.
#[derive(Args, Debug, Default)]
pub struct AgentArgs {
    /// Agent admin API base URL
    #[arg(long, global = true, env = "UNICRED_ADMIN_URL")]
    pub admin_url: Option<String>,

    /// Port for the webhook receiver
    #[arg(long, global = true, env = "UNICRED_WEBHOOK_PORT")]
    pub webhook_port: Option<u16>,

    /// Aries Interop Profile: 10 or 20
    #[arg(long, global = true, env = "UNICRED_AIP")]
    pub aip: Option<Aip>,

    /// Credential format: indy or json-ld
    #[arg(long, global = true, env = "UNICRED_CRED_FORMAT")]
    pub cred_format: Option<CredFormat>,

    /// Wallet type; askar-anoncreds switches to the /anoncreds endpoints
    #[arg(long, global = true, env = "UNICRED_WALLET_TYPE")]
    pub wallet_type: Option<String>,

    /// Enable revocation support
    #[arg(long, global = true)]
    pub revocation: bool,

    /// Start with exchange tracing on
    #[arg(long, global = true)]
    pub trace: bool,
}

impl AgentArgs {
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(url) = &self.admin_url {
            cfg.admin_url = url.clone();
        }
        if let Some(port) = self.webhook_port {
            cfg.webhook_port = port;
        }
        if let Some(aip) = self.aip {
            cfg.aip = aip;
        }
        if let Some(format) = self.cred_format {
            cfg.cred_format = format;
        }
        if let Some(wallet) = &self.wallet_type {
            cfg.wallet_type = wallet.clone();
        }
        cfg.revocation |= self.revocation;
        cfg.trace |= self.trace;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "unicred",
            "registrar",
            "--admin-url",
            "http://agent:9021",
            "--aip",
            "10",
            "--revocation",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Registrar)));

        let mut cfg = Config::default();
        cli.agent.apply(&mut cfg);
        assert_eq!(cfg.admin_url, "http://agent:9021");
        assert_eq!(cfg.aip, Aip::V10);
        assert!(cfg.revocation);
        assert_eq!(cfg.webhook_port, crate::config::DEFAULT_WEBHOOK_PORT);
    }

    #[test]
    fn test_overrides_are_validated_again() {
        let cli = Cli::try_parse_from([
            "unicred",
            "registrar",
            "--aip",
            "10",
            "--cred-format",
            "json-ld",
        ])
        .unwrap();

        let mut cfg = Config::default();
        assert!(cfg.validate().is_ok());
        cli.agent.apply(&mut cfg);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bad_aip_rejected() {
        assert!(Cli::try_parse_from(["unicred", "admin", "--aip", "30"]).is_err());
    }
}
