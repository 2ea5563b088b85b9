//! Verifier: requests presentations of the university credential from
//! holders and keeps a log of the verified ones.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::registrar::print_invitation;
use super::{fmt_time, proof_request_url, Flow, RoleHandler, Session};
use crate::agent::client::string_field;
use crate::console::Console;
use crate::errors::{AppError, AppResult};
use crate::models::envelope::{Envelope, Inbound};
use crate::models::event::{AgentEvent, BasicMessageEvent, ConnectionEvent, PresentationEvent};
use crate::payload::proof::{
    generic_proof_request, university_proof_request, ProofSpec, DEFAULT_GENERIC_SCHEMA,
};
use crate::store::holders::HolderRegistry;
use crate::store::proofs::ProofLog;
use crate::watch::ConnectionState;

/// Attributes asked for when the operator accepts the generic request's
/// defaults.
const MENU_GENERIC_ATTRS: [&str; 3] = ["student_name", "university_name", "graduation_year"];

pub struct Verifier {
    session: Session,
    holders: HolderRegistry,
    proofs: ProofLog,
    trace: bool,
}

impl Verifier {
    pub fn new(session: Session) -> Self {
        let trace = session.cfg.trace;
        Self {
            session,
            holders: HolderRegistry::new(),
            proofs: ProofLog::new(),
            trace,
        }
    }

    pub fn holders(&self) -> &HolderRegistry {
        &self.holders
    }

    pub fn proofs(&self) -> &ProofLog {
        &self.proofs
    }

    pub fn on_connection(&mut self, ev: &ConnectionEvent) {
        let id = ev.connection_id.as_str();
        match self.session.watch.observe(id, ev.connection_state()) {
            ConnectionState::Active => {
                let label = ev
                    .alias
                    .as_deref()
                    .or(ev.their_label.as_deref())
                    .filter(|l| !l.trim().is_empty());
                if self.holders.register_holder(id, label) {
                    println!("Connected to holder: {}", id);
                }
            }
            ConnectionState::Terminated => {
                self.holders.terminate(id, &format!("connection_{}", ev.state));
            }
            ConnectionState::Pending => {}
        }
    }

    pub fn on_presentation(&mut self, ev: &PresentationEvent) {
        tracing::info!(pres_ex_id = %ev.pres_ex_id, state = %ev.state, "proof exchange");

        if ev.is_verified() {
            let revealed = ev.revealed_attrs();
            if !self
                .proofs
                .record(&ev.pres_ex_id, ev.connection_id.as_deref(), revealed.clone())
            {
                return;
            }
            if let Some(conn) = ev.connection_id.as_deref() {
                self.holders.increment_verified(conn);
            }
            println!("PROOF VERIFICATION SUCCESSFUL ({})", ev.pres_ex_id);
            for (name, value) in &revealed {
                println!("   {}: {}", name, value);
            }
        } else if ev.state == "done" && ev.verified.as_deref() == Some("false") {
            println!("Proof {} FAILED verification", ev.pres_ex_id);
        } else if ev.state == "abandoned" {
            tracing::warn!(pres_ex_id = %ev.pres_ex_id, "proof exchange abandoned");
        }
    }

    fn on_basic_message(&mut self, ev: &BasicMessageEvent) {
        let from = ev.connection_id.as_deref().unwrap_or("unknown");
        match Envelope::decode(&ev.content) {
            Ok(Inbound::Text(text)) => println!("Message from {}: {}", from, text),
            Ok(Inbound::Envelope(env)) => {
                tracing::info!(approval_id = env.approval_id(), "verifier ignores approval messages");
            }
            Err(e) => tracing::warn!(connection_id = from, "dropping malformed message: {}", e),
        }
    }

    fn proof_spec<'a>(&self, connection_id: Option<&'a str>) -> ProofSpec<'a> {
        let cfg = &self.session.cfg;
        ProofSpec {
            aip: cfg.aip,
            format: cfg.cred_format,
            revocation: cfg.revocation,
            self_attested: cfg.self_attested,
            trace: self.trace,
            connection_id,
            now: Utc::now().timestamp(),
        }
    }

    async fn pick_holder(&self, console: &mut Console) -> AppResult<String> {
        let active = self.holders.active_holders();
        match active.len() {
            0 => Err(AppError::InvalidUserInput("no active holder connections".into())),
            1 => Ok(active[0].connection_id.clone()),
            _ => {
                let ids: Vec<String> = active.iter().map(|h| h.connection_id.clone()).collect();
                let labels: Vec<String> = active
                    .iter()
                    .map(|h| format!("{} ({})", h.label, h.connection_id))
                    .collect();
                let i = console.choose("ACTIVE HOLDER CONNECTIONS", &labels).await?;
                Ok(ids[i].clone())
            }
        }
    }

    /// Send a proof request to `connection_id` and count it.
    pub async fn request_proof(&mut self, connection_id: &str, body: &Value) -> AppResult<()> {
        self.session
            .client
            .send_proof_request(self.session.cfg.aip, body)
            .await?;
        self.holders.increment_requested(connection_id);
        println!("Proof request sent to {}", connection_id);
        Ok(())
    }

    async fn cmd_university_request(&mut self, console: &mut Console) -> AppResult<()> {
        let conn = self.pick_holder(console).await?;
        let body = university_proof_request(&self.proof_spec(Some(&conn)))?;
        self.request_proof(&conn, &body).await
    }

    async fn cmd_generic_request(&mut self, console: &mut Console) -> AppResult<()> {
        let conn = self.pick_holder(console).await?;
        let schema = console
            .prompt_default("Enter schema name", DEFAULT_GENERIC_SCHEMA)
            .await?;
        let mut attrs: Vec<String> = console
            .prompt(&format!(
                "Enter attribute names, comma separated [{}]: ",
                MENU_GENERIC_ATTRS.join(", ")
            ))
            .await?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if attrs.is_empty() {
            attrs = MENU_GENERIC_ATTRS.iter().map(|a| a.to_string()).collect();
        }
        let body = generic_proof_request(&self.proof_spec(Some(&conn)), &schema, &attrs)?;
        self.request_proof(&conn, &body).await
    }

    async fn cmd_connectionless_request(&mut self) -> AppResult<()> {
        let body = university_proof_request(&self.proof_spec(None))?;
        let record = self
            .session
            .client
            .create_proof_request(self.session.cfg.aip, &body)
            .await?;
        let id = string_field(
            &record,
            &["pres_ex_id", "presentation_exchange_id"],
            "create-request response",
        )?;
        println!("Proof request url: {}", proof_request_url(&self.session.cfg, &id));
        Ok(())
    }

    async fn cmd_message(&mut self, console: &mut Console) -> AppResult<()> {
        let conn = self.pick_holder(console).await?;
        let msg = console.prompt("Enter message: ").await?;
        self.session.client.send_message(&conn, &msg).await
    }

    async fn cmd_create_invitation(&mut self) -> AppResult<()> {
        let alias = format!("{} verifier", self.session.cfg.party_id);
        let invitation = self.session.client.create_invitation(&alias).await?;
        print_invitation(&invitation);
        Ok(())
    }

    fn print_holders(&self) {
        let all = self.holders.all();
        if all.is_empty() {
            println!("No holder connections.");
            return;
        }
        println!("\n=== HOLDER CONNECTIONS ===");
        for h in all {
            println!(
                "{} ({})  status: {:?}  connected: {}  requested: {}  verified: {}",
                h.label,
                h.connection_id,
                h.status,
                fmt_time(&h.connected_at),
                h.proofs_requested,
                h.proofs_verified
            );
        }
    }

    fn print_proofs(&self) {
        if self.proofs.is_empty() {
            println!("No verified proofs yet.");
            return;
        }
        println!("\n=== VERIFIED PROOFS ===");
        for p in self.proofs.all() {
            println!(
                "\n{}  from {}  at {}",
                p.pres_ex_id,
                p.connection_id.as_deref().unwrap_or("connectionless"),
                fmt_time(&p.verified_at)
            );
            for (name, value) in &p.revealed {
                println!("   {}: {}", name, value);
            }
        }
    }

    fn print_stats(&self) {
        let all = self.holders.all();
        let requested: u32 = all.iter().map(|h| h.proofs_requested).sum();
        let verified: u32 = all.iter().map(|h| h.proofs_verified).sum();
        println!("\n=== VERIFICATION STATISTICS ===");
        println!("Holder connections: {} ({} active)", all.len(), self.holders.active_holders().len());
        println!("Proof requests sent: {}", requested);
        println!("Proofs verified: {}", self.proofs.len());
        if requested > 0 {
            println!("Success rate: {:.1}%", f64::from(verified) * 100.0 / f64::from(requested));
        }
    }
}

#[async_trait]
impl RoleHandler for Verifier {
    fn name(&self) -> &'static str {
        "verifier"
    }

    fn print_menu(&self) {
        println!(
            "\n    (1) Request University Credential Proof\n\
             \x20   (2) Request Generic Credential Proof\n\
             \x20   (2a) Send *Connectionless* Proof Request\n\
             \x20   (3) Send Message\n\
             \x20   (4) Create New Invitation\n\
             \x20   (5) List Holder Connections\n\
             \x20   (6) Show Verified Proofs\n\
             \x20   (7) Verification Statistics\n\
             \x20   (T) Toggle tracing on proof exchange\n\
             \x20   (X) Exit?\n"
        );
    }

    async fn on_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Connection(ev) => self.on_connection(&ev),
            AgentEvent::PresentProof(ev) => self.on_presentation(&ev),
            AgentEvent::BasicMessage(ev) => self.on_basic_message(&ev),
            other => tracing::debug!(?other, "verifier ignores event"),
        }
    }

    async fn on_command(&mut self, command: &str, console: &mut Console) -> AppResult<Flow> {
        match command.to_lowercase().as_str() {
            "1" => self.cmd_university_request(console).await?,
            "2" => self.cmd_generic_request(console).await?,
            "2a" => self.cmd_connectionless_request().await?,
            "3" => self.cmd_message(console).await?,
            "4" => self.cmd_create_invitation().await?,
            "5" => self.print_holders(),
            "6" => self.print_proofs(),
            "7" => self.print_stats(),
            "t" => {
                self.trace = !self.trace;
                println!(
                    ">>> Proof Exchange Tracing is {}",
                    if self.trace { "ON" } else { "OFF" }
                );
            }
            "x" => return Ok(Flow::Exit),
            other => {
                return Err(AppError::InvalidUserInput(format!("unknown option '{}'", other)))
            }
        }
        Ok(Flow::Continue)
    }

    fn open_connections(&self) -> Vec<String> {
        self.holders
            .active_holders()
            .into_iter()
            .map(|h| h.connection_id.clone())
            .collect()
    }

    fn session(&self) -> &Session {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AdminClient;
    use crate::config::Config;
    use crate::watch::ConnectionWatch;
    use serde_json::json;

    fn verifier() -> Verifier {
        let cfg = Config::default();
        Verifier::new(Session {
            client: AdminClient::new(&cfg).unwrap(),
            watch: ConnectionWatch::new(),
            cfg,
        })
    }

    #[test]
    fn test_every_connection_is_a_holder() {
        let mut v = verifier();
        v.on_connection(&ConnectionEvent {
            connection_id: "c-1".into(),
            state: "active".into(),
            rfc23_state: None,
            their_label: Some("Uni Admin".into()),
            alias: None,
        });
        assert_eq!(v.holders().active_holders().len(), 1);
        assert_eq!(v.holders().get("c-1").unwrap().label, "Uni Admin");
        assert!(v.holders().admin_connection().is_none());
    }

    #[test]
    fn test_verified_presentation_counted_once() {
        let mut v = verifier();
        v.holders.register_holder("c-1", Some("Alice"));
        let ev: PresentationEvent = serde_json::from_value(json!({
            "pres_ex_id": "p-1",
            "connection_id": "c-1",
            "state": "done",
            "verified": "true",
            "by_format": {"pres": {"indy": {"requested_proof": {"revealed_attrs": {
                "0_student_name_uuid": {"raw": "Jane Doe"}
            }}}}}
        }))
        .unwrap();

        v.on_presentation(&ev);
        v.on_presentation(&ev);

        assert_eq!(v.proofs().len(), 1);
        assert_eq!(v.holders().get("c-1").unwrap().proofs_verified, 1);
        assert_eq!(
            v.proofs().all()[0].revealed.get("0_student_name_uuid").map(String::as_str),
            Some("Jane Doe")
        );
    }

    #[test]
    fn test_failed_verification_not_logged() {
        let mut v = verifier();
        let ev: PresentationEvent = serde_json::from_value(json!({
            "pres_ex_id": "p-2",
            "state": "done",
            "verified": "false"
        }))
        .unwrap();
        v.on_presentation(&ev);
        assert!(v.proofs().is_empty());
    }
}
